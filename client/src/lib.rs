//! Client helpers for the couchplay broker: a framed connection plus
//! role-specific wrappers for screens and controllers.

pub mod connection;
pub mod controller;
pub mod screen;

pub use connection::Connection;
pub use controller::ControllerClient;
pub use screen::ScreenClient;
