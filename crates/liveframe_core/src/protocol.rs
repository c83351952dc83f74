//! Wire protocol for the bidirectional page-sync channel.
//!
//! Messages are JSON text frames, internally tagged with `type`. Field names
//! are camelCase for the benefit of the browser runtime.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Messages sent from the client runtime to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Announce which page the client is currently on and bind the channel
    /// to the session.
    #[serde(rename_all = "camelCase")]
    Register {
        #[serde(default)]
        current_page: Option<String>,
    },
    /// A user-triggered page event.
    #[serde(rename_all = "camelCase")]
    Event {
        page: String,
        event_type: String,
        #[serde(default)]
        payload: Map<String, Value>,
    },
}

/// Messages pushed from the server to the client runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A minimal re-render: new body fragment plus head metadata.
    Update { html: String, head: HeadData },
    /// A side-effecting instruction for the client (`redirect` or `reload`).
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<String>,
    },
    /// A non-fatal per-event error notification.
    Error { message: String },
}

impl ServerMessage {
    /// Client-directed redirect instruction.
    pub fn redirect(location: impl Into<String>) -> Self {
        ServerMessage::Command {
            command: "redirect".to_string(),
            location: Some(location.into()),
        }
    }

    /// Client-directed full reload instruction.
    pub fn reload() -> Self {
        ServerMessage::Command {
            command: "reload".to_string(),
            location: None,
        }
    }

    /// Error notification with a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// Head metadata extracted from a rendered document.
///
/// Applied by the client as a separate, unconditional step after body
/// reconciliation: title and meta mapping are updated in place, page-scoped
/// style blocks are fully replaced (never merged) on each navigation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<Vec<String>>,
}

/// The minimal update payload sent for a re-render.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    /// Content between the `<body>` markers of the rendered document.
    pub body: String,
    /// Extracted head metadata.
    pub head: HeadData,
}

impl Delta {
    /// Convert into the wire message for the channel.
    pub fn into_message(self) -> ServerMessage {
        ServerMessage::Update {
            html: self.body,
            head: self.head,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_wire_shape() {
        let json = r#"{"type":"event","page":"login","eventType":"login","payload":{"email":"a@b.com"}}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::Event {
                page,
                event_type,
                payload,
            } => {
                assert_eq!(page, "login");
                assert_eq!(event_type, "login");
                assert_eq!(payload["email"], "a@b.com");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn register_tolerates_missing_page() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"register"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Register { current_page: None });
    }

    #[test]
    fn command_omits_absent_location() {
        let json = serde_json::to_string(&ServerMessage::reload()).unwrap();
        assert!(!json.contains("location"));
        let json = serde_json::to_string(&ServerMessage::redirect("/pages/home")).unwrap();
        assert!(json.contains(r#""location":"/pages/home""#));
    }
}
