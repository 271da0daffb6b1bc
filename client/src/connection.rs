//! Framed TCP connection to the broker.

use log::warn;
use shared::{ClientEvent, ServerEvent};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A connected broker session speaking newline-delimited JSON frames.
pub struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write_half: OwnedWriteHalf,
}

impl Connection {
    pub async fn connect(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(Connection {
            lines: BufReader::new(read_half).lines(),
            write_half,
        })
    }

    pub async fn send(&mut self, event: &ClientEvent) -> Result<(), Box<dyn std::error::Error>> {
        let frame = shared::encode_frame(event)?;
        self.write_half.write_all(frame.as_bytes()).await?;
        Ok(())
    }

    /// Reads the next event, returning `None` once the broker closes the
    /// connection. Malformed frames are skipped.
    pub async fn recv(&mut self) -> Result<Option<ServerEvent>, Box<dyn std::error::Error>> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            match shared::decode_frame(&line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => warn!("skipping malformed frame: {}", e),
            }
        }
    }
}
