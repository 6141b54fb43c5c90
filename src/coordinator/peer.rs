//! One accepted peer: the reading half is owned by its dispatch loop, the
//! writing half is shared behind a send lock so the scheduler and the other
//! dispatcher can inject messages without interleaving bytes.

use crate::domain::{PeerRole, PlantSnapshot};
use crate::protocol::{BoxedReader, BoxedWriter, Command, Framing, WireError, WireReader, WireWriter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct PeerSender {
    role: PeerRole,
    writer: Arc<Mutex<WireWriter<BoxedWriter>>>,
    connected: Arc<AtomicBool>,
}

impl PeerSender {
    pub fn new(role: PeerRole, writer: BoxedWriter, framing: Framing) -> Self {
        Self {
            role,
            writer: Arc::new(Mutex::new(WireWriter::new(writer, framing))),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn send(&self, cmd: Command) -> Result<(), WireError> {
        self.ensure_connected()?;
        self.writer.lock().await.write_command(cmd).await
    }

    pub async fn send_text(&self, text: &str) -> Result<(), WireError> {
        self.ensure_connected()?;
        self.writer.lock().await.write_text(text).await
    }

    /// `PLANT DATA` followed by the record, with no other send in between
    pub async fn send_snapshot(&self, snapshot: &PlantSnapshot) -> Result<(), WireError> {
        self.ensure_connected()?;
        let mut writer = self.writer.lock().await;
        writer.write_command(Command::PlantData).await?;
        writer.write_snapshot(snapshot).await
    }

    /// mark the peer gone and close our side of the stream
    pub async fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.writer.lock().await.shutdown().await {
                tracing::debug!(peer = %self.role, error = %e, "shutdown after disconnect failed");
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), WireError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(WireError::Closed)
        }
    }
}

pub struct PeerConnection {
    pub role: PeerRole,
    pub reader: WireReader<BoxedReader>,
    pub sender: PeerSender,
}

impl PeerConnection {
    pub fn new(role: PeerRole, reader: BoxedReader, writer: BoxedWriter, framing: Framing) -> Self {
        Self {
            role,
            reader: WireReader::new(reader, framing),
            sender: PeerSender::new(role, writer, framing),
        }
    }

    pub fn from_tcp(role: PeerRole, stream: TcpStream, framing: Framing) -> Self {
        let (read, write) = stream.into_split();
        Self::new(role, Box::new(read), Box::new(write), framing)
    }
}
