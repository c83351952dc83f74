//! The event pipeline: one inbound event from session resolution to
//! send-or-suppress.
//!
//! Per-session handling is serialized through the store's event guard for
//! the whole read-modify-write (the change-detection step is a
//! read-then-conditional-write race otherwise); distinct sessions proceed
//! fully in parallel. State mutation happens only after the handler returns
//! successfully, so a failed handler leaves nothing half-updated.

use crate::command::{CommandFlow, CommandProcessor, CommandScope, HttpEffects};
use crate::error::LiveframeError;
use crate::handler::{EventInput, HandlerOutput, PageHandler, RequestMeta};
use crate::navigate::{self, NavigationPolicy};
use crate::render::DeltaRenderer;
use crate::session::SessionStore;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Terminal state of one processed live event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// A delta was rendered and handed to the session's channel.
    Updated,
    /// Output matched the cached page state; no network traffic.
    Suppressed,
    /// A terminating redirect command stopped the pipeline before any
    /// render or state update.
    Redirected,
}

/// Result of an initial HTTP page load.
#[derive(Debug)]
pub struct PageLoad {
    /// Rendered full document; `None` when a redirect command terminated
    /// the pipeline.
    pub html: Option<String>,
    /// Accumulated response side effects (cookies, redirect, reload).
    pub effects: HttpEffects,
}

/// Orchestrates inbound events against the session store, page handler,
/// command processor, and delta renderer.
pub struct EventPipeline {
    store: Arc<SessionStore>,
    handler: Arc<dyn PageHandler>,
    renderer: DeltaRenderer,
    commands: CommandProcessor,
    policy: NavigationPolicy,
}

impl EventPipeline {
    pub fn new(
        store: Arc<SessionStore>,
        handler: Arc<dyn PageHandler>,
        renderer: DeltaRenderer,
    ) -> Self {
        EventPipeline {
            store,
            handler,
            renderer,
            commands: CommandProcessor::new(),
            policy: NavigationPolicy::default(),
        }
    }

    pub fn with_commands(mut self, commands: CommandProcessor) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_navigation_policy(mut self, policy: NavigationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Process one live-channel event to completion.
    ///
    /// Errors are non-fatal to the channel: callers surface them as `error`
    /// messages and keep the connection open.
    pub async fn handle_event(
        &self,
        session_id: &str,
        request: RequestMeta,
        page: String,
        event_type: String,
        payload: Map<String, Value>,
    ) -> Result<EventOutcome, LiveframeError> {
        let guard = self
            .store
            .event_guard(session_id)
            .await
            .ok_or(LiveframeError::SessionNotFound)?;
        let _serialized = guard.lock().await;

        if !self.store.touch(session_id).await {
            return Err(LiveframeError::SessionNotFound);
        }

        let resolved = navigate::resolve(page, event_type, payload);
        if resolved.forced {
            self.store
                .update_current_page(session_id, &resolved.page)
                .await;
            if self.policy == NavigationPolicy::InvalidateState {
                self.store.clear_page_state(session_id, &resolved.page).await;
            }
        }

        let input = if resolved.replay
            && let Some(mut cached) = self.store.last_input(session_id, &resolved.page).await
        {
            debug!(
                "Replaying cached input for session {} on page {}",
                session_id, resolved.page
            );
            cached.request = request;
            cached
        } else {
            EventInput::new(request, resolved.event, resolved.payload)
        };

        let output = self.handler.handle(&resolved.page, &input).await?;
        let HandlerOutput {
            variables,
            commands,
        } = output;

        if !commands.is_empty() {
            let channel = self.store.channel_for(session_id).await;
            let mut scope = CommandScope::Live(channel.as_ref());
            if self.commands.process(&commands, &mut scope).await == CommandFlow::Redirected {
                return Ok(EventOutcome::Redirected);
            }
        }

        let previous = self.store.page_state(session_id, &resolved.page).await;
        if !resolved.forced && previous == variables {
            debug!(
                "Suppressing unchanged render for session {} on page {}",
                session_id, resolved.page
            );
            return Ok(EventOutcome::Suppressed);
        }

        self.store
            .set_page_state(session_id, &resolved.page, variables.clone())
            .await;
        self.store
            .set_last_input(session_id, &resolved.page, input)
            .await;

        let delta = self.renderer.render_delta(&resolved.page, &variables)?;

        // Channel looked up at send time: a rebind while this event was in
        // flight receives the delta. A gone channel discards it best-effort.
        match self.store.channel_for(session_id).await {
            Some(channel) => {
                if !channel.send(delta.into_message()) {
                    debug!("Channel for session {} closed at send time", session_id);
                }
            }
            None => debug!("No channel for session {} at send time", session_id),
        }

        Ok(EventOutcome::Updated)
    }

    /// Execute the initial HTTP load for a page.
    ///
    /// Returns `Ok(None)` when no handler logic exists for the page, so the
    /// HTTP layer can delegate to its fallback. When a stored input context
    /// exists for the session and page, it is replayed (with refreshed
    /// request metadata) so a refresh reproduces the exact prior view.
    pub async fn handle_page_load(
        &self,
        session_id: &str,
        page: &str,
        request: RequestMeta,
    ) -> Result<Option<PageLoad>, LiveframeError> {
        if !self.handler.contains(page) {
            return Ok(None);
        }

        self.store.ensure_session(session_id).await;
        let guard = self
            .store
            .event_guard(session_id)
            .await
            .ok_or(LiveframeError::SessionNotFound)?;
        let _serialized = guard.lock().await;

        let input = match self.store.last_input(session_id, page).await {
            Some(mut stored) => {
                info!(
                    "Using stored input for session {} on page {}",
                    session_id, page
                );
                stored.request = request;
                stored
            }
            None => EventInput::on_load(request),
        };

        let output = self.handler.handle(page, &input).await?;
        let HandlerOutput {
            variables,
            commands,
        } = output;

        let mut effects = HttpEffects::default();
        if !commands.is_empty() {
            let mut scope = CommandScope::Http(&mut effects);
            if self.commands.process(&commands, &mut scope).await == CommandFlow::Redirected {
                return Ok(Some(PageLoad {
                    html: None,
                    effects,
                }));
            }
        }

        self.store.set_last_input(session_id, page, input).await;

        let html = self.renderer.render_document(page, &variables, session_id)?;
        Ok(Some(PageLoad {
            html: Some(html),
            effects,
        }))
    }

    /// Run one staleness sweep, logging the removal count.
    pub async fn sweep_sessions(&self, max_idle: chrono::Duration) -> usize {
        let removed = self.store.sweep_stale(max_idle).await;
        if removed > 0 {
            info!("Swept {} stale sessions", removed);
        } else {
            debug!("Staleness sweep removed nothing");
        }
        removed
    }
}

impl Clone for EventPipeline {
    fn clone(&self) -> Self {
        EventPipeline {
            store: self.store.clone(),
            handler: self.handler.clone(),
            renderer: self.renderer.clone(),
            commands: self.commands.clone(),
            policy: self.policy,
        }
    }
}
