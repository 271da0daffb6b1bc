//! Server-authoritative "screenless" game state.
//!
//! Hosts opt in by constructing a [`Screenless`] with an init-state factory
//! and registering handlers keyed by event name, split by direction
//! (controller-originated vs screen-originated). When the broker receives a
//! gameplay event whose key has a handler for that direction, the handler
//! runs *instead of* the default relay, with read/write access to the
//! event's room state and the ability to broadcast results.
//!
//! Handlers execute synchronously on the broker loop: one event finishes,
//! including the broadcasts it triggers, before the next is processed. Two
//! controllers incrementing the same counter therefore never lose an update.

use std::collections::HashMap;

use serde_json::Value;
use shared::{ControllerId, ServerEvent};

use crate::rooms::Room;

/// Host-supplied factory producing the initial game state for a room.
/// Invoked once per room, on the room's first screen registration.
pub type InitStateFn = Box<dyn Fn() -> Value + Send + Sync>;

/// Host-supplied event handler. Receives room-scoped state access, the
/// sending participant, and the opaque payload.
pub type HandlerFn = Box<dyn Fn(&mut RoomApi<'_>, &Origin, &Value) + Send + Sync>;

/// Identity of the participant whose event triggered a handler.
pub struct Origin {
    /// Set for controller-originated events, `None` for the screen.
    pub controller_id: Option<ControllerId>,
    pub user_data: Value,
}

/// Registration surface for screenless mode, built once before the broker
/// starts accepting connections and never mutated afterwards.
pub struct Screenless {
    init_state: InitStateFn,
    on_controller: HashMap<String, HandlerFn>,
    on_screen: HashMap<String, HandlerFn>,
}

impl Screenless {
    pub fn new(init_state: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            init_state: Box::new(init_state),
            on_controller: HashMap::new(),
            on_screen: HashMap::new(),
        }
    }

    /// Registers a handler for controller-originated events with this key.
    /// Registering a key suppresses generic forwarding of that key.
    pub fn register_controller_input(
        &mut self,
        key: impl Into<String>,
        handler: impl Fn(&mut RoomApi<'_>, &Origin, &Value) + Send + Sync + 'static,
    ) {
        self.on_controller.insert(key.into(), Box::new(handler));
    }

    /// Registers a handler for screen-originated events with this key.
    pub fn register_screen_input(
        &mut self,
        key: impl Into<String>,
        handler: impl Fn(&mut RoomApi<'_>, &Origin, &Value) + Send + Sync + 'static,
    ) {
        self.on_screen.insert(key.into(), Box::new(handler));
    }

    pub(crate) fn initial_state(&self) -> Value {
        (self.init_state)()
    }

    pub(crate) fn controller_handler(&self, key: &str) -> Option<&HandlerFn> {
        self.on_controller.get(key)
    }

    pub(crate) fn screen_handler(&self, key: &str) -> Option<&HandlerFn> {
        self.on_screen.get(key)
    }
}

/// Room-scoped accessor handed to handlers: state read/write plus the three
/// broadcast channels. Sends are queued on the recipients' outbound
/// channels and never block the handler.
pub struct RoomApi<'a> {
    room: &'a mut Room,
}

impl<'a> RoomApi<'a> {
    pub(crate) fn new(room: &'a mut Room) -> Self {
        Self { room }
    }

    /// Snapshot of the room's game state (`null` if never initialized).
    pub fn get_state(&self) -> Value {
        self.room.state().cloned().unwrap_or(Value::Null)
    }

    /// Replaces the room's game state.
    pub fn set_state(&mut self, state: Value) {
        self.room.set_state(state);
    }

    /// Sends `server-to-screen` to the room's screen, if present.
    pub fn send_to_screens(&self, key: &str, payload: Value) {
        if let Some(screen) = self.room.screen() {
            screen.conn.send(ServerEvent::ServerToScreen {
                key: key.to_string(),
                payload,
            });
        }
    }

    /// Sends `server-to-controller` to every ready controller in the room.
    pub fn send_to_controllers(&self, key: &str, payload: Value) {
        for entry in self.room.ready_controllers() {
            entry.conn.send(ServerEvent::ServerToController {
                key: key.to_string(),
                payload: payload.clone(),
            });
        }
    }

    /// Sends `server-to-controller` to one specific ready controller.
    /// Unknown or not-yet-ready targets are dropped silently.
    pub fn send_to_controller(&self, id: ControllerId, key: &str, payload: Value) {
        if let Some(entry) = self.room.ready_controllers().find(|c| c.id == id) {
            entry.conn.send(ServerEvent::ServerToController {
                key: key.to_string(),
                payload,
            });
        }
    }
}
