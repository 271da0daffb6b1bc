//! Controller-side client: joins a room, waits out the acknowledgment
//! handshake, and exchanges keyed gameplay events.

use log::info;
use serde_json::Value;
use shared::{ClientEvent, ServerEvent};

use crate::connection::Connection;

pub struct ControllerClient {
    conn: Connection,
    state: Option<Value>,
}

impl ControllerClient {
    pub async fn connect(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let conn = Connection::connect(addr).await?;
        Ok(ControllerClient { conn, state: None })
    }

    /// Sends the join request. The broker stays silent until the screen
    /// acknowledges, so this returns immediately; call
    /// [`ControllerClient::wait_ready`] for the verdict.
    pub async fn register(
        &mut self,
        room: &str,
        user_data: Value,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.conn
            .send(&ClientEvent::RegisterController {
                room: room.to_string(),
                user_data,
            })
            .await?;
        Ok(())
    }

    /// Waits for `controller-ready`. On success in screenless mode, the
    /// room's state snapshot becomes available through
    /// [`ControllerClient::state`].
    pub async fn wait_ready(&mut self) -> Result<bool, Box<dyn std::error::Error>> {
        loop {
            match self.conn.recv().await? {
                Some(ServerEvent::ServerMessage { message }) => {
                    info!("server message: {}", message);
                }
                Some(ServerEvent::ControllerReady { success, state }) => {
                    self.state = state;
                    return Ok(success);
                }
                Some(_) => {}
                None => return Err("connection closed during registration".into()),
            }
        }
    }

    /// Room state snapshot from registration (screenless mode only).
    pub fn state(&self) -> Option<&Value> {
        self.state.as_ref()
    }

    pub async fn send_to_screen(
        &mut self,
        key: &str,
        payload: Value,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.conn
            .send(&ClientEvent::ControllerToScreen {
                key: key.to_string(),
                payload,
            })
            .await?;
        Ok(())
    }

    pub async fn send_to_server(
        &mut self,
        key: &str,
        payload: Value,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.conn
            .send(&ClientEvent::ControllerToServer {
                key: key.to_string(),
                payload,
            })
            .await?;
        Ok(())
    }

    /// Next broker event addressed to this controller. `None` on
    /// disconnect.
    pub async fn next_event(
        &mut self,
    ) -> Result<Option<ServerEvent>, Box<dyn std::error::Error>> {
        self.conn.recv().await
    }
}
