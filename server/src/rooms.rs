//! Room registry and per-room session state.
//!
//! A room groups at most one screen with an ordered set of controllers and,
//! in screenless mode, holds the room's authoritative game state. Rooms are
//! created lazily on registration and removed as soon as they hold neither
//! a screen nor any controller. All mutation happens from the broker's
//! single event loop, so the registry needs no internal locking.

use std::collections::HashMap;

use log::info;
use serde_json::Value;
use shared::ControllerId;

use crate::broker::ConnectionHandle;

/// Pairing state of a controller within its room. A rejected controller is
/// removed outright rather than parked in a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStatus {
    /// Joined, waiting for the screen's acknowledgment.
    Pending,
    /// Acknowledged by the screen; relay traffic flows.
    Ready,
}

/// A controller admitted to (or pending admission to) a room.
pub struct ControllerEntry {
    pub id: ControllerId,
    pub conn: ConnectionHandle,
    pub user_data: Value,
    pub status: PairingStatus,
}

/// The room's screen connection with its registration metadata.
pub struct ScreenEntry {
    pub conn: ConnectionHandle,
    pub user_data: Value,
}

/// A named session: one optional screen, join-ordered controllers, and the
/// optional screenless game state.
pub struct Room {
    id: String,
    screen: Option<ScreenEntry>,
    controllers: Vec<ControllerEntry>,
    state: Option<Value>,
}

impl Room {
    fn new(id: String) -> Self {
        Self {
            id,
            screen: None,
            controllers: Vec::new(),
            state: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn screen(&self) -> Option<&ScreenEntry> {
        self.screen.as_ref()
    }

    /// Occupies the screen slot. Callers must check emptiness first; the
    /// broker rejects duplicate registrations before getting here.
    pub fn set_screen(&mut self, conn: ConnectionHandle, user_data: Value) {
        self.screen = Some(ScreenEntry { conn, user_data });
    }

    /// Frees the screen slot, returning the previous occupant if any.
    pub fn take_screen(&mut self) -> Option<ScreenEntry> {
        self.screen.take()
    }

    /// Appends a controller, preserving join order.
    pub fn add_controller(&mut self, entry: ControllerEntry) {
        self.controllers.push(entry);
    }

    pub fn controller(&self, id: ControllerId) -> Option<&ControllerEntry> {
        self.controllers.iter().find(|c| c.id == id)
    }

    pub fn controller_mut(&mut self, id: ControllerId) -> Option<&mut ControllerEntry> {
        self.controllers.iter_mut().find(|c| c.id == id)
    }

    /// Removes a controller by id, returning its entry if it existed.
    pub fn remove_controller(&mut self, id: ControllerId) -> Option<ControllerEntry> {
        let index = self.controllers.iter().position(|c| c.id == id)?;
        Some(self.controllers.remove(index))
    }

    /// Controllers that have passed the acknowledgment handshake, in join
    /// order.
    pub fn ready_controllers(&self) -> impl Iterator<Item = &ControllerEntry> {
        self.controllers
            .iter()
            .filter(|c| c.status == PairingStatus::Ready)
    }

    pub fn controller_count(&self) -> usize {
        self.controllers.len()
    }

    pub fn state(&self) -> Option<&Value> {
        self.state.as_ref()
    }

    pub fn set_state(&mut self, state: Value) {
        self.state = Some(state);
    }

    /// A room with no screen and no controllers must not persist.
    pub fn is_empty(&self) -> bool {
        self.screen.is_none() && self.controllers.is_empty()
    }
}

/// Owns every live room, keyed by the externally supplied room identifier.
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }

    /// Looks up a room, creating an empty one on first reference.
    pub fn get_or_create(&mut self, room_id: &str) -> &mut Room {
        if !self.rooms.contains_key(room_id) {
            info!("room {} created", room_id);
        }
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(room_id.to_string()))
    }

    pub fn find(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn find_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.get_mut(room_id)
    }

    /// Removes a room unconditionally, freeing its identifier for reuse.
    pub fn remove(&mut self, room_id: &str) -> Option<Room> {
        let removed = self.rooms.remove(room_id);
        if removed.is_some() {
            info!("room {} removed", room_id);
        }
        removed
    }

    /// Reclaims the room if it holds neither a screen nor any controller.
    pub fn remove_if_empty(&mut self, room_id: &str) {
        if self.rooms.get(room_id).is_some_and(|r| r.is_empty()) {
            self.remove(room_id);
        }
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ConnectionId;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn test_handle(id: u64) -> ConnectionHandle {
        let (tx, _rx) = mpsc::unbounded_channel();
        ConnectionHandle::new(ConnectionId(id), tx)
    }

    fn entry(id: u64, conn: u64, status: PairingStatus) -> ControllerEntry {
        ControllerEntry {
            id: ControllerId(id),
            conn: test_handle(conn),
            user_data: json!({"name": format!("c{id}")}),
            status,
        }
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mut registry = RoomRegistry::new();
        registry.get_or_create("123");
        registry.get_or_create("123");
        assert_eq!(registry.len(), 1);
        assert!(registry.find("123").is_some());
        assert!(registry.find("456").is_none());
    }

    #[test]
    fn remove_frees_identifier_for_reuse() {
        let mut registry = RoomRegistry::new();
        registry.get_or_create("123").set_screen(test_handle(1), json!(null));
        assert!(registry.remove("123").is_some());
        assert!(registry.is_empty());
        assert!(registry.get_or_create("123").screen().is_none());
    }

    #[test]
    fn remove_if_empty_keeps_occupied_rooms() {
        let mut registry = RoomRegistry::new();
        registry.get_or_create("a").set_screen(test_handle(1), json!(null));
        registry.get_or_create("b");
        registry.remove_if_empty("a");
        registry.remove_if_empty("b");
        assert_eq!(registry.len(), 1);
        assert!(registry.find("a").is_some());
    }

    #[test]
    fn room_with_only_controllers_is_not_empty() {
        let mut registry = RoomRegistry::new();
        let room = registry.get_or_create("123");
        room.set_screen(test_handle(1), json!(null));
        room.add_controller(entry(1, 2, PairingStatus::Pending));
        room.take_screen();
        assert!(!registry.find("123").unwrap().is_empty());
        registry.remove_if_empty("123");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn controllers_keep_join_order() {
        let mut room = Room::new("123".to_string());
        room.add_controller(entry(3, 1, PairingStatus::Ready));
        room.add_controller(entry(1, 2, PairingStatus::Ready));
        room.add_controller(entry(2, 3, PairingStatus::Pending));

        let ready: Vec<ControllerId> = room.ready_controllers().map(|c| c.id).collect();
        assert_eq!(ready, vec![ControllerId(3), ControllerId(1)]);
    }

    #[test]
    fn remove_controller_returns_entry() {
        let mut room = Room::new("123".to_string());
        room.add_controller(entry(1, 1, PairingStatus::Pending));
        let removed = room.remove_controller(ControllerId(1)).unwrap();
        assert_eq!(removed.user_data["name"], "c1");
        assert!(room.remove_controller(ControllerId(1)).is_none());
        assert_eq!(room.controller_count(), 0);
    }

    #[test]
    fn state_defaults_to_none() {
        let mut room = Room::new("123".to_string());
        assert!(room.state().is_none());
        room.set_state(json!({"team_a": 0}));
        assert_eq!(room.state().unwrap()["team_a"], 0);
    }
}
