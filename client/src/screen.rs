//! Screen-side client: claims a room's screen slot, acknowledges joining
//! controllers, and exchanges keyed gameplay events.

use log::info;
use serde_json::Value;
use shared::{ClientEvent, ControllerId, ServerEvent};

use crate::connection::Connection;

pub struct ScreenClient {
    conn: Connection,
    state: Option<Value>,
    auto_acknowledge: bool,
}

impl ScreenClient {
    pub async fn connect(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let conn = Connection::connect(addr).await?;
        Ok(ScreenClient {
            conn,
            state: None,
            auto_acknowledge: false,
        })
    }

    /// When enabled, [`ScreenClient::next_event`] replies to every
    /// `controller-join` with a positive acknowledgment before returning
    /// it. Useful for games that admit everyone, and for screenless games
    /// where the screen is a passive display.
    pub fn set_auto_acknowledge(&mut self, enabled: bool) {
        self.auto_acknowledge = enabled;
    }

    /// Registers as the room's screen and waits for the broker's verdict.
    /// On success in screenless mode, the room's state snapshot becomes
    /// available through [`ScreenClient::state`].
    pub async fn register(
        &mut self,
        room: &str,
        user_data: Value,
    ) -> Result<bool, Box<dyn std::error::Error>> {
        self.conn
            .send(&ClientEvent::RegisterScreen {
                room: room.to_string(),
                user_data,
            })
            .await?;
        loop {
            match self.conn.recv().await? {
                Some(ServerEvent::ServerMessage { message }) => {
                    info!("server message: {}", message);
                }
                Some(ServerEvent::ScreenReady { success, state }) => {
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

    pub async fn acknowledge(
        &mut self,
        controller_id: ControllerId,
        success: bool,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.conn
            .send(&ClientEvent::AcknowledgeController {
                controller_id,
                success,
            })
            .await?;
        Ok(())
    }

    pub async fn send_to_controller(
        &mut self,
        controller_id: ControllerId,
        key: &str,
        payload: Value,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.conn
            .send(&ClientEvent::ScreenToController {
                controller_id,
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
            .send(&ClientEvent::ScreenToServer {
                key: key.to_string(),
                payload,
            })
            .await?;
        Ok(())
    }

    /// Next broker event addressed to this screen. `None` on disconnect.
    pub async fn next_event(
        &mut self,
    ) -> Result<Option<ServerEvent>, Box<dyn std::error::Error>> {
        let event = self.conn.recv().await?;
        if self.auto_acknowledge {
            if let Some(ServerEvent::ControllerJoin { controller_id, .. }) = &event {
                self.acknowledge(*controller_id, true).await?;
            }
        }
        Ok(event)
    }
}
