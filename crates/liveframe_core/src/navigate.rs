//! Navigation coordination.
//!
//! Two navigation sources reach the server as `navigate` events: in-page
//! navigation initiated by the application, and browser history traversal
//! (the client runtime turns back/forward into `navigate` events carrying
//! the target page). Both resolve here: the event is rewritten to an
//! `onLoad` against the target page, the render decision is forced, and the
//! pipeline replays a cached input context when one exists so the exact
//! prior view is reconstructed deterministically.

use crate::handler::EVENT_ON_LOAD;
use serde_json::{Map, Value};

/// The wire event name for in-protocol navigation.
pub const EVENT_NAVIGATE: &str = "navigate";

/// Payload key naming the navigation target.
pub const TARGET_PAGE_KEY: &str = "targetPage";

/// What a fresh navigation does to the target page's cached state.
///
/// Exactly one behavior applies consistently; the two are never mixed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NavigationPolicy {
    /// Keep cached state and force the render despite equality. Cached
    /// input contexts survive, so back/forward replay keeps working.
    #[default]
    ForceRender,
    /// Additionally invalidate the target page's cached variables so a
    /// clean render is produced.
    InvalidateState,
}

/// An inbound event after navigation resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEvent {
    /// Page the handler will run against (the navigation target, when the
    /// event was a navigation).
    pub page: String,
    /// Effective event type (`onLoad` for navigations).
    pub event: String,
    pub payload: Map<String, Value>,
    /// Forces the render decision regardless of change detection.
    pub forced: bool,
    /// Whether a cached input context for the page should be replayed.
    pub replay: bool,
}

/// Resolve a raw inbound event into its effective page and event type.
pub fn resolve(page: String, event_type: String, payload: Map<String, Value>) -> ResolvedEvent {
    if event_type == EVENT_NAVIGATE
        && let Some(target) = payload.get(TARGET_PAGE_KEY).and_then(Value::as_str)
    {
        return ResolvedEvent {
            page: target.to_string(),
            event: EVENT_ON_LOAD.to_string(),
            payload: Map::new(),
            forced: true,
            replay: true,
        };
    }
    ResolvedEvent {
        page,
        event: event_type,
        payload,
        forced: false,
        replay: false,
    }
}
