//! Couchplay broker: pairs screens with controllers in named rooms, relays
//! keyed gameplay events between them, and optionally runs the game state
//! server-side through host-registered handlers.

pub mod broker;
pub mod flood;
pub mod network;
pub mod rooms;
pub mod screenless;

pub use broker::{Broker, BrokerConfig, ConnectionHandle, ConnectionId};
pub use network::BrokerServer;
pub use screenless::{Origin, RoomApi, Screenless};
