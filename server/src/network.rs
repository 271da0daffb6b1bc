//! TCP transport: accept loop, per-connection reader/writer tasks, and the
//! channel plumbing that funnels everything into the broker.
//!
//! Each accepted connection gets two tasks. The reader decodes
//! newline-delimited JSON frames and forwards them to the broker loop; the
//! writer drains the connection's outbound queue. All inbound traffic,
//! connects and disconnects included, flows through one unbounded channel
//! into [`BrokerServer::run`], which owns the [`Broker`] exclusively. The
//! channel preserves arrival order, so a connection's registration is always
//! processed before any event it sends.

use log::{error, info, warn};
use shared::{ClientEvent, ServerEvent};
use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::broker::{Broker, ConnectionHandle, ConnectionId};

/// Messages sent from connection tasks to the broker loop.
#[derive(Debug)]
pub enum BrokerMessage {
    Connected {
        conn: ConnectionHandle,
    },
    Event {
        conn_id: ConnectionId,
        event: ClientEvent,
    },
    Disconnected {
        conn_id: ConnectionId,
    },
}

/// Listening server that drives a [`Broker`] from its accept loop.
pub struct BrokerServer {
    listener: TcpListener,
    broker: Broker,
}

impl BrokerServer {
    pub async fn bind(addr: &str, broker: Broker) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Broker listening on {}", addr);
        Ok(Self { listener, broker })
    }

    /// The bound address, useful when binding to port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections and processes broker messages until the process
    /// is stopped. Events are handled strictly one at a time.
    pub async fn run(mut self) -> io::Result<()> {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let mut next_conn_id: u64 = 1;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let conn_id = ConnectionId(next_conn_id);
                            next_conn_id += 1;
                            info!("connection {} accepted from {}", conn_id, peer);

                            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                            let handle = ConnectionHandle::new(conn_id, outbound_tx);
                            // Queued ahead of anything the reader task sends,
                            // so registration can never outrun the connect.
                            if inbound_tx
                                .send(BrokerMessage::Connected { conn: handle })
                                .is_err()
                            {
                                break;
                            }
                            spawn_connection(conn_id, stream, outbound_rx, inbound_tx.clone());
                        }
                        Err(e) => {
                            error!("accept failed: {}", e);
                        }
                    }
                },

                message = inbound_rx.recv() => {
                    match message {
                        Some(BrokerMessage::Connected { conn }) => {
                            self.broker.connection_opened(conn);
                        }
                        Some(BrokerMessage::Event { conn_id, event }) => {
                            self.broker.handle_event(conn_id, event);
                        }
                        Some(BrokerMessage::Disconnected { conn_id }) => {
                            info!("connection {} closed", conn_id);
                            self.broker.connection_closed(conn_id);
                        }
                        None => break,
                    }
                },
            }
        }

        Ok(())
    }
}

/// Spawns the writer and reader tasks for one accepted connection.
fn spawn_connection(
    conn_id: ConnectionId,
    stream: TcpStream,
    mut outbound: mpsc::UnboundedReceiver<ServerEvent>,
    inbound: mpsc::UnboundedSender<BrokerMessage>,
) {
    let (read_half, mut write_half) = stream.into_split();

    // Writer: drains the outbound queue. Exits when the broker drops the
    // handle or the peer stops reading.
    tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            match shared::encode_frame(&event) {
                Ok(frame) => {
                    if write_half.write_all(frame.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("failed to encode frame for connection {}: {}", conn_id, e);
                }
            }
        }
    });

    // Reader: owns the connection's lifecycle. Whatever ends the read loop,
    // exactly one Disconnected message reaches the broker.
    tokio::spawn(async move {
        read_frames(conn_id, read_half, &inbound).await;
        let _ = inbound.send(BrokerMessage::Disconnected { conn_id });
    });
}

async fn read_frames(
    conn_id: ConnectionId,
    read_half: OwnedReadHalf,
    inbound: &mpsc::UnboundedSender<BrokerMessage>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match shared::decode_frame::<ClientEvent>(&line) {
                    Ok(event) => {
                        if inbound
                            .send(BrokerMessage::Event { conn_id, event })
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        // Malformed input only costs the sender its frame.
                        warn!("malformed frame from connection {}: {}", conn_id, e);
                    }
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!("read error on connection {}: {}", conn_id, e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, BufReader, Lines};
    use tokio::net::tcp::OwnedWriteHalf;

    async fn start_server() -> SocketAddr {
        let broker = Broker::new(BrokerConfig::default());
        let server = BrokerServer::bind("127.0.0.1:0", broker)
            .await
            .expect("bind failed");
        let addr = server.local_addr().expect("no local addr");
        tokio::spawn(server.run());
        addr
    }

    async fn connect(addr: SocketAddr) -> (Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf) {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        let (read_half, write_half) = stream.into_split();
        (BufReader::new(read_half).lines(), write_half)
    }

    async fn next_event(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> ServerEvent {
        let line = lines
            .next_line()
            .await
            .expect("read failed")
            .expect("connection closed");
        shared::decode_frame(&line).expect("bad frame")
    }

    async fn send(write_half: &mut OwnedWriteHalf, event: &ClientEvent) {
        let frame = shared::encode_frame(event).expect("encode failed");
        write_half
            .write_all(frame.as_bytes())
            .await
            .expect("write failed");
    }

    #[tokio::test]
    async fn motd_then_registration_over_tcp() {
        let addr = start_server().await;
        let (mut lines, mut write_half) = connect(addr).await;

        assert!(matches!(
            next_event(&mut lines).await,
            ServerEvent::ServerMessage { .. }
        ));

        send(
            &mut write_half,
            &ClientEvent::RegisterScreen {
                room: "123".to_string(),
                user_data: Value::Null,
            },
        )
        .await;
        assert!(matches!(
            next_event(&mut lines).await,
            ServerEvent::ScreenReady { success: true, .. }
        ));
    }

    #[tokio::test]
    async fn malformed_frame_does_not_kill_connection() {
        let addr = start_server().await;
        let (mut lines, mut write_half) = connect(addr).await;
        assert!(matches!(
            next_event(&mut lines).await,
            ServerEvent::ServerMessage { .. }
        ));

        write_half
            .write_all(b"this is not json\n")
            .await
            .expect("write failed");
        send(
            &mut write_half,
            &ClientEvent::RegisterScreen {
                room: "123".to_string(),
                user_data: Value::Null,
            },
        )
        .await;
        assert!(matches!(
            next_event(&mut lines).await,
            ServerEvent::ScreenReady { success: true, .. }
        ));
    }

    #[tokio::test]
    async fn disconnect_frees_screen_slot() {
        let addr = start_server().await;
        let (mut lines1, mut write1) = connect(addr).await;
        assert!(matches!(
            next_event(&mut lines1).await,
            ServerEvent::ServerMessage { .. }
        ));
        send(
            &mut write1,
            &ClientEvent::RegisterScreen {
                room: "123".to_string(),
                user_data: Value::Null,
            },
        )
        .await;
        assert!(matches!(
            next_event(&mut lines1).await,
            ServerEvent::ScreenReady { success: true, .. }
        ));

        drop(lines1);
        drop(write1);

        // The broker learns of the disconnect asynchronously; retry until
        // the slot is free.
        let (mut lines2, mut write2) = connect(addr).await;
        assert!(matches!(
            next_event(&mut lines2).await,
            ServerEvent::ServerMessage { .. }
        ));
        let mut claimed = false;
        for _ in 0..50 {
            send(
                &mut write2,
                &ClientEvent::RegisterScreen {
                    room: "123".to_string(),
                    user_data: Value::Null,
                },
            )
            .await;
            match next_event(&mut lines2).await {
                ServerEvent::ScreenReady { success: true, .. } => {
                    claimed = true;
                    break;
                }
                ServerEvent::ScreenReady { success: false, .. } => {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
                other => panic!("expected ScreenReady, got {other:?}"),
            }
        }
        assert!(claimed, "screen slot was never freed");
    }
}
