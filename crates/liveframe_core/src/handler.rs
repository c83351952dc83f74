//! The external page-handler seam.
//!
//! A handler maps one structured event input to output variables plus an
//! optional ordered list of side-effecting commands. The pipeline depends
//! only on the [`PageHandler`] trait, so handlers may be in-process closures
//! (see [`HandlerRegistry`]), sandboxed interpreters, or remote calls.
//!
//! Handlers execute in an isolated scope per call: any state they need
//! across invocations (counters and the like) is a handler concern, owned
//! explicitly by the handler itself, never by the pipeline.

use crate::command::Command;
use crate::error::LiveframeError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The wire event name synthesized for initial page loads.
pub const EVENT_ON_LOAD: &str = "onLoad";

/// Transport-level request metadata carried into every handler input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl RequestMeta {
    /// Metadata for a GET-style request with query parameters only.
    pub fn get(query: HashMap<String, String>) -> Self {
        RequestMeta {
            method: "GET".to_string(),
            query,
            ..Default::default()
        }
    }
}

/// The structured input passed to a page handler for one event.
///
/// For navigation events with a cached input context, the pipeline replays
/// the cached input (with refreshed request metadata) instead of a bare
/// payload, so back/forward navigation reconstructs the exact prior view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventInput {
    /// Request metadata from the transport that delivered the event.
    pub request: RequestMeta,
    /// Event-type tag, e.g. `onLoad`, `login`, `refresh`.
    pub event: String,
    /// Event-specific payload supplied by the client.
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl EventInput {
    /// Build a fresh input for the given event.
    pub fn new(request: RequestMeta, event: impl Into<String>, payload: Map<String, Value>) -> Self {
        EventInput {
            request,
            event: event.into(),
            payload,
        }
    }

    /// Build a synthetic initial-load input with an empty payload.
    pub fn on_load(request: RequestMeta) -> Self {
        EventInput::new(request, EVENT_ON_LOAD, Map::new())
    }
}

/// Handler result: output variables plus declared commands.
///
/// The `commands` key of a raw output mapping is split out here and is never
/// persisted as page state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    /// Variables used for rendering and change detection.
    pub variables: Map<String, Value>,
    /// Ordered side-effecting instructions, processed before rendering.
    pub commands: Vec<Command>,
}

impl HandlerOutput {
    /// Output with variables only.
    pub fn variables(variables: Map<String, Value>) -> Self {
        HandlerOutput {
            variables,
            commands: Vec::new(),
        }
    }

    /// Split a raw output value into variables and commands.
    ///
    /// Non-object outputs are treated as empty. A malformed `commands` array
    /// is logged and dropped rather than failing the event.
    pub fn from_value(value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return HandlerOutput::default();
        };
        let commands = match map.remove("commands") {
            Some(raw) => match serde_json::from_value::<Vec<Command>>(raw) {
                Ok(commands) => commands,
                Err(err) => {
                    tracing::warn!("Dropping malformed commands array: {}", err);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        HandlerOutput {
            variables: map,
            commands,
        }
    }
}

/// A page handler keyed by page identifier.
#[async_trait]
pub trait PageHandler: Send + Sync {
    /// Whether logic exists for this page. The HTTP layer delegates to its
    /// fallback when this returns false.
    fn contains(&self, page: &str) -> bool;

    /// Execute the page's logic for one event.
    async fn handle(&self, page: &str, input: &EventInput)
    -> Result<HandlerOutput, LiveframeError>;
}

type BoxedHandlerFn =
    Box<dyn Fn(EventInput) -> BoxFuture<'static, Result<HandlerOutput, LiveframeError>> + Send + Sync>;

/// In-process handler registry.
///
/// Built once at startup and passed by reference to the pipeline; tests get
/// isolation by constructing a fresh registry per test.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, BoxedHandlerFn>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    /// Register a synchronous handler for a page.
    pub fn register<F>(&mut self, page: impl Into<String>, handler: F)
    where
        F: Fn(&EventInput) -> Result<HandlerOutput, LiveframeError> + Send + Sync + 'static,
    {
        self.handlers.insert(
            page.into(),
            Box::new(move |input| {
                let result = handler(&input);
                Box::pin(async move { result })
            }),
        );
    }

    /// Register an asynchronous handler for a page.
    pub fn register_async<F>(&mut self, page: impl Into<String>, handler: F)
    where
        F: Fn(EventInput) -> BoxFuture<'static, Result<HandlerOutput, LiveframeError>>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(page.into(), Box::new(handler));
    }

    /// Pages with registered logic.
    pub fn pages(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

#[async_trait]
impl PageHandler for HandlerRegistry {
    fn contains(&self, page: &str) -> bool {
        self.handlers.contains_key(page)
    }

    async fn handle(
        &self,
        page: &str,
        input: &EventInput,
    ) -> Result<HandlerOutput, LiveframeError> {
        let handler = self
            .handlers
            .get(page)
            .ok_or_else(|| LiveframeError::UnknownPage(page.to_string()))?;
        handler(input.clone()).await
    }
}
