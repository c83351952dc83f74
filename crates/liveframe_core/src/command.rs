//! Handler-declared side-effecting commands.
//!
//! Commands are an ordered sequence interpreted against either an HTTP
//! response context or a live channel. An injectable custom handler gets
//! first refusal on every command; built-in semantics apply only when the
//! custom handler reports the command unhandled. Unrecognized kinds are
//! logged and ignored.

use crate::protocol::ServerMessage;
use crate::session::Channel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cookie attributes accepted from handlers. `max_age` is in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CookieOptions {
    pub max_age: Option<i64>,
    pub http_only: bool,
    pub same_site: Option<String>,
    pub path: Option<String>,
}

/// A declared side-effecting instruction from a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Navigate the client elsewhere. Terminating: the pipeline stops after
    /// command processing, with no render and no state update.
    Redirect { location: String },
    /// Set a cookie on the HTTP response; no-op over a live channel.
    SetCookie {
        name: String,
        value: String,
        #[serde(default)]
        options: CookieOptions,
    },
    /// Ask the client for a full reload (redirect-to-self over HTTP).
    Reload,
    /// Anything else: preserved for the custom handler, otherwise logged
    /// and ignored.
    #[serde(untagged)]
    Other(Value),
}

impl Command {
    fn kind(&self) -> &str {
        match self {
            Command::Redirect { .. } => "redirect",
            Command::SetCookie { .. } => "setCookie",
            Command::Reload => "reload",
            Command::Other(value) => value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("unknown"),
        }
    }
}

/// Side effects accumulated while processing commands for an HTTP response.
///
/// The HTTP layer turns these into response headers after the pipeline
/// returns.
#[derive(Debug, Default)]
pub struct HttpEffects {
    pub cookies: Vec<(String, String, CookieOptions)>,
    pub redirect: Option<String>,
    pub reload: bool,
}

/// The context a command sequence is interpreted against.
pub enum CommandScope<'a> {
    /// A live channel; may be absent if the session has no open channel, in
    /// which case client-directed instructions are dropped best-effort.
    Live(Option<&'a Channel>),
    /// An HTTP response being built.
    Http(&'a mut HttpEffects),
}

/// Whether the pipeline continues to the render decision after commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFlow {
    Continue,
    /// A terminating redirect was issued: no render, no state update.
    Redirected,
}

/// Application hook that may claim commands before built-in processing.
#[async_trait]
pub trait CustomCommandHandler: Send + Sync {
    /// Return true when the command was fully handled, skipping built-ins.
    async fn handle(&self, command: &Command, scope: &mut CommandScope<'_>) -> bool;
}

/// Interprets handler-declared commands in array order.
#[derive(Clone, Default)]
pub struct CommandProcessor {
    custom: Option<Arc<dyn CustomCommandHandler>>,
}

impl CommandProcessor {
    pub fn new() -> Self {
        CommandProcessor::default()
    }

    pub fn with_custom_handler(handler: Arc<dyn CustomCommandHandler>) -> Self {
        CommandProcessor {
            custom: Some(handler),
        }
    }

    /// Process commands in order against the scope.
    pub async fn process(&self, commands: &[Command], scope: &mut CommandScope<'_>) -> CommandFlow {
        let mut flow = CommandFlow::Continue;
        for command in commands {
            if let Some(custom) = &self.custom
                && custom.handle(command, scope).await
            {
                debug!("Command '{}' claimed by custom handler", command.kind());
                continue;
            }
            match (command, &mut *scope) {
                (Command::Redirect { location }, CommandScope::Live(channel)) => {
                    if let Some(channel) = channel {
                        channel.send(ServerMessage::redirect(location.clone()));
                    }
                    flow = CommandFlow::Redirected;
                }
                (Command::Redirect { location }, CommandScope::Http(effects)) => {
                    effects.redirect = Some(location.clone());
                    flow = CommandFlow::Redirected;
                }
                (Command::SetCookie { name, value, options }, CommandScope::Http(effects)) => {
                    effects
                        .cookies
                        .push((name.clone(), value.clone(), options.clone()));
                }
                (Command::SetCookie { name, .. }, CommandScope::Live(_)) => {
                    debug!("Ignoring setCookie '{}' over live channel", name);
                }
                (Command::Reload, CommandScope::Live(channel)) => {
                    if let Some(channel) = channel {
                        channel.send(ServerMessage::reload());
                    }
                }
                (Command::Reload, CommandScope::Http(effects)) => {
                    effects.reload = true;
                }
                (Command::Other(value), _) => {
                    warn!("Unknown command ignored: {}", value);
                }
            }
        }
        flow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Channel;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn live_channel() -> (Channel, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Channel::new("c".to_string(), tx), rx)
    }

    #[test]
    fn commands_parse_known_and_unknown_kinds() {
        let commands: Vec<Command> = serde_json::from_value(json!([
            { "type": "redirect", "location": "/pages/home" },
            { "type": "setCookie", "name": "theme", "value": "dark" },
            { "type": "reload" },
            { "type": "notify", "message": "hi" },
        ]))
        .unwrap();
        assert_eq!(commands.len(), 4);
        assert!(matches!(&commands[0], Command::Redirect { location } if location == "/pages/home"));
        assert!(matches!(&commands[1], Command::SetCookie { name, .. } if name == "theme"));
        assert_eq!(commands[2], Command::Reload);
        assert_eq!(commands[3].kind(), "notify");
    }

    #[tokio::test]
    async fn redirect_over_channel_emits_command_and_terminates() {
        let (channel, mut rx) = live_channel();
        let processor = CommandProcessor::new();
        let flow = processor
            .process(
                &[Command::Redirect {
                    location: "/pages/dashboard".to_string(),
                }],
                &mut CommandScope::Live(Some(&channel)),
            )
            .await;
        assert_eq!(flow, CommandFlow::Redirected);
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::redirect("/pages/dashboard")
        );
    }

    #[tokio::test]
    async fn redirect_over_http_accumulates_effect() {
        let mut effects = HttpEffects::default();
        let processor = CommandProcessor::new();
        let flow = processor
            .process(
                &[
                    Command::SetCookie {
                        name: "theme".to_string(),
                        value: "dark".to_string(),
                        options: CookieOptions::default(),
                    },
                    Command::Redirect {
                        location: "/pages/login".to_string(),
                    },
                ],
                &mut CommandScope::Http(&mut effects),
            )
            .await;
        assert_eq!(flow, CommandFlow::Redirected);
        assert_eq!(effects.redirect.as_deref(), Some("/pages/login"));
        assert_eq!(effects.cookies.len(), 1);
    }

    #[tokio::test]
    async fn set_cookie_is_noop_over_live_channel() {
        let (channel, mut rx) = live_channel();
        let processor = CommandProcessor::new();
        let flow = processor
            .process(
                &[Command::SetCookie {
                    name: "theme".to_string(),
                    value: "dark".to_string(),
                    options: CookieOptions::default(),
                }],
                &mut CommandScope::Live(Some(&channel)),
            )
            .await;
        assert_eq!(flow, CommandFlow::Continue);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn custom_handler_claims_commands() {
        struct ClaimRedirects;
        #[async_trait]
        impl CustomCommandHandler for ClaimRedirects {
            async fn handle(&self, command: &Command, _scope: &mut CommandScope<'_>) -> bool {
                matches!(command, Command::Redirect { .. })
            }
        }

        let (channel, mut rx) = live_channel();
        let processor = CommandProcessor::with_custom_handler(Arc::new(ClaimRedirects));
        let flow = processor
            .process(
                &[Command::Redirect {
                    location: "/elsewhere".to_string(),
                }],
                &mut CommandScope::Live(Some(&channel)),
            )
            .await;
        // claimed by the custom handler: no built-in message, no termination
        assert_eq!(flow, CommandFlow::Continue);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_commands_are_ignored() {
        let mut effects = HttpEffects::default();
        let processor = CommandProcessor::new();
        let commands: Vec<Command> =
            serde_json::from_value(json!([{ "type": "sparkle", "level": 11 }])).unwrap();
        let flow = processor
            .process(&commands, &mut CommandScope::Http(&mut effects))
            .await;
        assert_eq!(flow, CommandFlow::Continue);
        assert!(effects.redirect.is_none());
    }
}
