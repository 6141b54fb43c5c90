//! Client side of a node's single connection to the coordinator.
//!
//! The reader is owned by the node's command loop as an `Inbound`. The
//! sender is cloned into control loops, which push status reports while the
//! command loop may be mid-request; the lock keeps each message whole.

use crate::domain::PlantSnapshot;
use crate::protocol::{BoxedReader, BoxedWriter, Command, Framing, Message, WireError, WireReader, WireWriter};
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct UplinkSender {
    writer: Arc<Mutex<WireWriter<BoxedWriter>>>,
}

impl UplinkSender {
    pub fn new(writer: BoxedWriter, framing: Framing) -> Self {
        Self { writer: Arc::new(Mutex::new(WireWriter::new(writer, framing))) }
    }

    pub async fn send(&self, cmd: Command) -> Result<(), WireError> {
        self.writer.lock().await.write_command(cmd).await
    }

    /// for status reports: a lost report is logged, never fatal
    pub async fn report(&self, cmd: Command) {
        match self.send(cmd).await {
            Ok(()) => tracing::debug!(command = %cmd, "[UPLINK] sent"),
            Err(e) => tracing::warn!(command = %cmd, error = %e, "[UPLINK] send failed"),
        }
    }
}

/// Inbound half. Commands the coordinator pushes while a request is waiting
/// for its text reply are held back and handed out by `next` afterwards.
pub struct Inbound {
    reader: WireReader<BoxedReader>,
    backlog: VecDeque<Message>,
}

impl Inbound {
    pub fn new(reader: WireReader<BoxedReader>) -> Self {
        Self { reader, backlog: VecDeque::new() }
    }

    pub async fn next(&mut self) -> Result<Message, WireError> {
        match self.backlog.pop_front() {
            Some(msg) => Ok(msg),
            None => self.reader.read_message().await,
        }
    }

    /// send `cmd` and wait for the first free-text reply
    pub async fn request(&mut self, uplink: &UplinkSender, cmd: Command) -> Result<String, WireError> {
        uplink.send(cmd).await?;
        loop {
            match self.reader.read_message().await? {
                Message::Text(reply) => return Ok(reply),
                pushed @ Message::Command(_) => {
                    tracing::debug!(pushed = %pushed.as_text(), "[UPLINK] held back during request");
                    self.backlog.push_back(pushed);
                }
            }
        }
    }

    pub async fn read_snapshot(&mut self) -> Result<PlantSnapshot, WireError> {
        self.reader.read_snapshot().await
    }
}

pub async fn connect(addr: &str, framing: Framing) -> Result<(Inbound, UplinkSender)> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("could not connect to coordinator at {}", addr))?;
    tracing::info!(%addr, "[UPLINK] connected to coordinator");
    let (read, write) = stream.into_split();
    let reader = WireReader::new(Box::new(read) as BoxedReader, framing);
    Ok((Inbound::new(reader), UplinkSender::new(Box::new(write), framing)))
}
