//! Wire protocol shared between the couchplay broker and its clients.
//!
//! Every frame is a single newline-delimited JSON object carrying an
//! externally visible `event` tag (kebab-case, e.g. `register-screen`).
//! Payloads and user metadata are opaque [`serde_json::Value`]s: the broker
//! relays them without interpretation, so hosts are free to ship whatever
//! JSON their game needs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server-assigned controller identifier, unique for the lifetime of a
/// broker instance. Never reused while the owning connection is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ControllerId(pub u64);

impl std::fmt::Display for ControllerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Events sent from a connection (screen or controller) to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Claim the screen slot of a room.
    RegisterScreen {
        room: String,
        #[serde(default)]
        user_data: Value,
    },
    /// Ask to join a room as a controller.
    RegisterController {
        room: String,
        #[serde(default)]
        user_data: Value,
    },
    /// Screen's verdict on a pending controller.
    AcknowledgeController {
        controller_id: ControllerId,
        success: bool,
    },
    /// Keyed gameplay event from a controller, addressed to the screen.
    ControllerToScreen {
        key: String,
        #[serde(default)]
        payload: Value,
    },
    /// Keyed gameplay event from the screen, addressed to one controller.
    ScreenToController {
        controller_id: ControllerId,
        key: String,
        #[serde(default)]
        payload: Value,
    },
    /// Keyed gameplay event from a controller for a server-side handler.
    ControllerToServer {
        key: String,
        #[serde(default)]
        payload: Value,
    },
    /// Keyed gameplay event from the screen for a server-side handler.
    ScreenToServer {
        key: String,
        #[serde(default)]
        payload: Value,
    },
}

/// Events sent from the broker to a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Informational text pushed on connect (MOTD).
    ServerMessage { message: String },
    /// Reply to `register-screen`. `state` carries the room's game state
    /// snapshot when screenless mode is enabled.
    ScreenReady {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<Value>,
    },
    /// Sent to the room's screen when a controller asks to join.
    ControllerJoin {
        controller_id: ControllerId,
        user_data: Value,
    },
    /// Sent to a controller once the screen has acknowledged it (or
    /// immediately with `success:false` when the join is rejected).
    ControllerReady {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<Value>,
    },
    /// Sent to the room's screen when a controller disconnects.
    ControllerLeave {
        controller_id: ControllerId,
        user_data: Value,
    },
    /// Relayed controller event, tagged with the sender's identity.
    ControllerToScreen {
        controller_id: ControllerId,
        user_data: Value,
        key: String,
        payload: Value,
    },
    /// Relayed screen event for one controller.
    ScreenToController { key: String, payload: Value },
    /// Handler broadcast addressed to the room's screen.
    ServerToScreen { key: String, payload: Value },
    /// Handler broadcast addressed to a controller.
    ServerToController { key: String, payload: Value },
}

/// Serializes an event into a newline-terminated JSON frame.
pub fn encode_frame<T: Serialize>(event: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}

/// Decodes a single JSON frame (one line, newline optional).
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> serde_json::Result<T> {
    serde_json::from_str(line.trim_end())
}
