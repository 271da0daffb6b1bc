//! The session broker: pairing protocol, message relay, and dispatch into
//! the screenless state engine.
//!
//! The broker is driven from a single event loop (see `network`), so every
//! operation on a room — registration, acknowledgment, relay, handler
//! invocation — executes one at a time in arrival order. That serialization
//! is what makes the pairing handshake race-free (only one registration can
//! observe an empty screen slot) and what lets handlers read-modify-write
//! game state without losing updates.
//!
//! There are no fatal errors here: every rejected action degrades to a
//! `success:false` reply or a silent drop, local to the offending room or
//! connection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, info};
use serde_json::Value;
use shared::{ClientEvent, ControllerId, ServerEvent};
use tokio::sync::mpsc;

use crate::flood::FloodGate;
use crate::rooms::{ControllerEntry, PairingStatus, RoomRegistry};
use crate::screenless::{Origin, RoomApi, Screenless};

/// Transport-assigned connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connection's identity plus its outbound event queue. Sending queues
/// the event for the connection's writer task and never blocks; if the
/// peer is gone the event is dropped and the reader task delivers the
/// disconnect separately.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { id, sender }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}

/// Which role a connection holds, and in which room. One role per
/// connection; a second registration attempt is rejected.
#[derive(Debug, Clone)]
enum Endpoint {
    Screen { room: String },
    Controller { room: String, id: ControllerId },
}

/// Host configuration, fixed before the broker accepts connections.
pub struct BrokerConfig {
    /// Minimum delay between accepted gameplay events per (connection,
    /// key). Zero disables flood control.
    pub flood_control_delay: Duration,
    /// Message pushed to every new connection.
    pub motd: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            flood_control_delay: Duration::ZERO,
            motd: "MOTD: welcome to couchplay".to_string(),
        }
    }
}

/// Process-scoped owner of all broker state. Constructed once at startup
/// and driven exclusively from the network event loop, which makes every
/// room operation mutually exclusive without locks.
pub struct Broker {
    registry: RoomRegistry,
    flood: FloodGate,
    screenless: Option<Screenless>,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    endpoints: HashMap<ConnectionId, Endpoint>,
    next_controller_id: u64,
    motd: String,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            registry: RoomRegistry::new(),
            flood: FloodGate::new(config.flood_control_delay),
            screenless: None,
            connections: HashMap::new(),
            endpoints: HashMap::new(),
            next_controller_id: 1,
            motd: config.motd,
        }
    }

    /// Opts in to server-authoritative state. Must be called before the
    /// broker starts accepting connections.
    pub fn enable_screenless(&mut self, screenless: Screenless) {
        self.screenless = Some(screenless);
    }

    /// Number of live rooms, exposed for tests and monitoring.
    pub fn room_count(&self) -> usize {
        self.registry.len()
    }

    /// Registers a new connection and pushes the MOTD.
    pub fn connection_opened(&mut self, conn: ConnectionHandle) {
        debug!("connection {} opened", conn.id());
        conn.send(ServerEvent::ServerMessage {
            message: self.motd.clone(),
        });
        self.connections.insert(conn.id(), conn);
    }

    /// Tears down whatever role the connection held. A screen disconnect
    /// frees the room's screen slot; a controller disconnect removes the
    /// entry and notifies the current screen exactly once, whatever the
    /// controller's pairing status was. Empty rooms are reclaimed.
    pub fn connection_closed(&mut self, conn_id: ConnectionId) {
        self.flood.forget(conn_id);
        self.connections.remove(&conn_id);
        let Some(endpoint) = self.endpoints.remove(&conn_id) else {
            debug!("connection {} closed without a role", conn_id);
            return;
        };
        match endpoint {
            Endpoint::Screen { room } => {
                if let Some(r) = self.registry.find_mut(&room) {
                    r.take_screen();
                    info!("screen left room {}", room);
                }
                self.registry.remove_if_empty(&room);
            }
            Endpoint::Controller { room, id } => {
                if let Some(r) = self.registry.find_mut(&room) {
                    if let Some(entry) = r.remove_controller(id) {
                        info!("controller {} left room {}", id, room);
                        if let Some(screen) = r.screen() {
                            screen.conn.send(ServerEvent::ControllerLeave {
                                controller_id: id,
                                user_data: entry.user_data,
                            });
                        }
                    }
                }
                self.registry.remove_if_empty(&room);
            }
        }
    }

    /// Entry point for every decoded inbound event.
    pub fn handle_event(&mut self, conn_id: ConnectionId, event: ClientEvent) {
        self.handle_event_at(conn_id, event, Instant::now());
    }

    /// Like [`Broker::handle_event`] but with an explicit clock, so flood
    /// control windows can be tested without sleeping.
    pub fn handle_event_at(&mut self, conn_id: ConnectionId, event: ClientEvent, now: Instant) {
        match event {
            ClientEvent::RegisterScreen { room, user_data } => {
                self.register_screen(conn_id, room, user_data);
            }
            ClientEvent::RegisterController { room, user_data } => {
                self.register_controller(conn_id, room, user_data);
            }
            ClientEvent::AcknowledgeController {
                controller_id,
                success,
            } => {
                self.acknowledge_controller(conn_id, controller_id, success);
            }
            // Both controller channels share one path: handler dispatch if
            // the key is registered, controller→screen relay otherwise.
            ClientEvent::ControllerToScreen { key, payload }
            | ClientEvent::ControllerToServer { key, payload } => {
                self.controller_event(conn_id, key, payload, now);
            }
            ClientEvent::ScreenToController {
                controller_id,
                key,
                payload,
            } => {
                self.screen_to_controller(conn_id, controller_id, key, payload, now);
            }
            ClientEvent::ScreenToServer { key, payload } => {
                self.screen_to_server(conn_id, key, payload, now);
            }
        }
    }

    fn register_screen(&mut self, conn_id: ConnectionId, room_id: String, user_data: Value) {
        let Some(conn) = self.connections.get(&conn_id).cloned() else {
            return;
        };
        if self.endpoints.contains_key(&conn_id) {
            debug!("connection {} already holds a role", conn_id);
            conn.send(ServerEvent::ScreenReady {
                success: false,
                state: None,
            });
            return;
        }
        let room = self.registry.get_or_create(&room_id);
        if room.screen().is_some() {
            info!("screen registration rejected, room {} occupied", room_id);
            // Rejected screens still get the room's state snapshot, so a
            // late display can observe the game without holding the slot.
            conn.send(ServerEvent::ScreenReady {
                success: false,
                state: room.state().cloned(),
            });
            return;
        }
        room.set_screen(conn.clone(), user_data);
        if let Some(screenless) = &self.screenless {
            if room.state().is_none() {
                room.set_state(screenless.initial_state());
            }
        }
        let state = room.state().cloned();
        self.endpoints
            .insert(conn_id, Endpoint::Screen { room: room_id.clone() });
        info!("screen registered in room {}", room_id);
        conn.send(ServerEvent::ScreenReady {
            success: true,
            state,
        });
    }

    fn register_controller(&mut self, conn_id: ConnectionId, room_id: String, user_data: Value) {
        let Some(conn) = self.connections.get(&conn_id).cloned() else {
            return;
        };
        let reject = |conn: &ConnectionHandle| {
            conn.send(ServerEvent::ControllerReady {
                success: false,
                state: None,
            });
        };
        if self.endpoints.contains_key(&conn_id) {
            debug!("connection {} already holds a role", conn_id);
            reject(&conn);
            return;
        }
        // No screen means no room to join; the room is not created.
        let Some(room) = self.registry.find_mut(&room_id) else {
            info!("controller join rejected, room {} does not exist", room_id);
            reject(&conn);
            return;
        };
        let Some(screen) = room.screen() else {
            info!("controller join rejected, room {} has no screen", room_id);
            reject(&conn);
            return;
        };
        let screen_conn = screen.conn.clone();

        let id = ControllerId(self.next_controller_id);
        self.next_controller_id += 1;
        room.add_controller(ControllerEntry {
            id,
            conn: conn.clone(),
            user_data: user_data.clone(),
            status: PairingStatus::Pending,
        });
        self.endpoints.insert(
            conn_id,
            Endpoint::Controller { room: room_id.clone(), id },
        );
        info!("controller {} pending in room {}", id, room_id);
        screen_conn.send(ServerEvent::ControllerJoin {
            controller_id: id,
            user_data,
        });
    }

    fn acknowledge_controller(
        &mut self,
        conn_id: ConnectionId,
        controller_id: ControllerId,
        success: bool,
    ) {
        // Only the room's screen may acknowledge; anything else is a no-op,
        // as is an acknowledgment for a controller that already left.
        let Some(Endpoint::Screen { room }) = self.endpoints.get(&conn_id).cloned() else {
            return;
        };
        let Some(room) = self.registry.find_mut(&room) else {
            return;
        };
        if success {
            let state = room.state().cloned();
            if let Some(entry) = room.controller_mut(controller_id) {
                if entry.status == PairingStatus::Pending {
                    entry.status = PairingStatus::Ready;
                    info!("controller {} ready", controller_id);
                    entry.conn.send(ServerEvent::ControllerReady {
                        success: true,
                        state,
                    });
                }
            }
        } else {
            let is_pending = room
                .controller(controller_id)
                .is_some_and(|c| c.status == PairingStatus::Pending);
            if is_pending {
                if let Some(entry) = room.remove_controller(controller_id) {
                    info!("controller {} rejected by screen", controller_id);
                    entry.conn.send(ServerEvent::ControllerReady {
                        success: false,
                        state: None,
                    });
                    self.endpoints.remove(&entry.conn.id());
                }
            }
        }
    }

    /// Controller-originated gameplay event (`controller-to-screen` or
    /// `controller-to-server`). Gated by flood control, dropped unless the
    /// sender is a ready controller, then either dispatched to a registered
    /// handler or relayed to the room's screen.
    fn controller_event(&mut self, conn_id: ConnectionId, key: String, payload: Value, now: Instant) {
        if !self.flood.admit(conn_id, &key, now) {
            debug!("flood control dropped {} from connection {}", key, conn_id);
            return;
        }
        let Some(Endpoint::Controller { room, id }) = self.endpoints.get(&conn_id).cloned() else {
            return;
        };
        let Some(room) = self.registry.find_mut(&room) else {
            return;
        };
        let Some(entry) = room.controller(id) else {
            return;
        };
        if entry.status != PairingStatus::Ready {
            debug!("dropped {} from pending controller {}", key, id);
            return;
        }
        let user_data = entry.user_data.clone();

        if let Some(screenless) = &self.screenless {
            if let Some(handler) = screenless.controller_handler(&key) {
                let origin = Origin {
                    controller_id: Some(id),
                    user_data,
                };
                let mut api = RoomApi::new(room);
                handler(&mut api, &origin, &payload);
                return;
            }
        }
        if let Some(screen) = room.screen() {
            screen.conn.send(ServerEvent::ControllerToScreen {
                controller_id: id,
                user_data,
                key,
                payload,
            });
        }
    }

    fn screen_to_controller(
        &mut self,
        conn_id: ConnectionId,
        controller_id: ControllerId,
        key: String,
        payload: Value,
        now: Instant,
    ) {
        if !self.flood.admit(conn_id, &key, now) {
            debug!("flood control dropped {} from connection {}", key, conn_id);
            return;
        }
        let Some(Endpoint::Screen { room }) = self.endpoints.get(&conn_id).cloned() else {
            return;
        };
        let Some(room) = self.registry.find_mut(&room) else {
            return;
        };
        // The screen tracks liveness through join/leave notifications;
        // a stale or not-yet-ready target is a silent drop.
        match room.controller(controller_id) {
            Some(entry) if entry.status == PairingStatus::Ready => {
                entry.conn.send(ServerEvent::ScreenToController { key, payload });
            }
            _ => debug!("dropped {} for absent controller {}", key, controller_id),
        }
    }

    fn screen_to_server(&mut self, conn_id: ConnectionId, key: String, payload: Value, now: Instant) {
        if !self.flood.admit(conn_id, &key, now) {
            debug!("flood control dropped {} from connection {}", key, conn_id);
            return;
        }
        let Some(Endpoint::Screen { room }) = self.endpoints.get(&conn_id).cloned() else {
            return;
        };
        let Some(room) = self.registry.find_mut(&room) else {
            return;
        };
        let user_data = room
            .screen()
            .map(|s| s.user_data.clone())
            .unwrap_or(Value::Null);
        if let Some(screenless) = &self.screenless {
            if let Some(handler) = screenless.screen_handler(&key) {
                let origin = Origin {
                    controller_id: None,
                    user_data,
                };
                let mut api = RoomApi::new(room);
                handler(&mut api, &origin, &payload);
                return;
            }
        }
        debug!("no handler registered for screen event {}", key);
    }
}
