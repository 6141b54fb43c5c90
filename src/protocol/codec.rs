//! ==============================================================================
//! codec.rs - message framing over a peer byte stream
//! ==============================================================================
//!
//! two framings are supported:
//!
//!     raw             no header. one read (up to 1024 bytes) is one message.
//!                     this is what the deployed peers speak. a read that
//!                     starts with "PLANT DATA" and carries extra bytes is
//!                     split so the tail becomes the start of the snapshot.
//!
//!     length-prefixed every message, snapshot included, is preceded by a
//!                     big-endian u32 length.
//!
//! the snapshot record itself is always 12 bytes (see domain.rs).
//!
//! ==============================================================================

use super::command::Command;
use crate::domain::{PlantSnapshot, SNAPSHOT_LEN};
use serde::Deserialize;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// largest message accepted in either framing
pub const MAX_MESSAGE: usize = 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    #[default]
    Raw,
    LengthPrefixed,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("peer closed the connection")]
    Closed,
    #[error("message of {0} bytes exceeds the 1024 byte limit")]
    TooLarge(usize),
    #[error("snapshot frame has {0} bytes, expected 12")]
    BadSnapshot(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// one inbound message: a known verb or free text (names, numbers, replies)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Command(Command),
    Text(String),
}

impl Message {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        match Command::parse(&text) {
            Some(cmd) => Message::Command(cmd),
            None => Message::Text(text.into_owned()),
        }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Message::Command(cmd) => cmd.as_str(),
            Message::Text(text) => text,
        }
    }
}

pub struct WireReader<R> {
    inner: R,
    framing: Framing,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> WireReader<R> {
    pub fn new(inner: R, framing: Framing) -> Self {
        Self { inner, framing, pending: Vec::new() }
    }

    pub async fn read_message(&mut self) -> Result<Message, WireError> {
        let mut frame = self.read_frame().await?;

        if self.framing == Framing::Raw {
            let marker = Command::PlantData.as_str().as_bytes();
            if frame.len() > marker.len() && frame.starts_with(marker) {
                let mut tail = frame.split_off(marker.len());
                tail.extend_from_slice(&self.pending);
                self.pending = tail;
            }
        }

        Ok(Message::from_bytes(&frame))
    }

    /// read the fixed-size record that follows `PLANT DATA`
    pub async fn read_snapshot(&mut self) -> Result<PlantSnapshot, WireError> {
        let mut record = [0u8; SNAPSHOT_LEN];
        match self.framing {
            Framing::Raw => {
                let have = self.pending.len().min(SNAPSHOT_LEN);
                record[..have].copy_from_slice(&self.pending[..have]);
                self.pending.drain(..have);
                if have < SNAPSHOT_LEN {
                    self.inner
                        .read_exact(&mut record[have..])
                        .await
                        .map_err(eof_as_closed)?;
                }
            }
            Framing::LengthPrefixed => {
                let frame = self.read_frame().await?;
                if frame.len() != SNAPSHOT_LEN {
                    return Err(WireError::BadSnapshot(frame.len()));
                }
                record.copy_from_slice(&frame);
            }
        }
        tracing::trace!(record = %hex::encode(record), "snapshot received");
        Ok(PlantSnapshot::from_bytes(&record))
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, WireError> {
        match self.framing {
            Framing::Raw => {
                if !self.pending.is_empty() {
                    let take = self.pending.len().min(MAX_MESSAGE);
                    return Ok(self.pending.drain(..take).collect());
                }
                let mut buf = vec![0u8; MAX_MESSAGE];
                let n = self.inner.read(&mut buf).await?;
                if n == 0 {
                    return Err(WireError::Closed);
                }
                buf.truncate(n);
                Ok(buf)
            }
            Framing::LengthPrefixed => {
                let len = self.inner.read_u32().await.map_err(eof_as_closed)? as usize;
                if len > MAX_MESSAGE {
                    return Err(WireError::TooLarge(len));
                }
                let mut buf = vec![0u8; len];
                self.inner.read_exact(&mut buf).await.map_err(eof_as_closed)?;
                Ok(buf)
            }
        }
    }
}

pub struct WireWriter<W> {
    inner: W,
    framing: Framing,
}

impl<W: AsyncWrite + Unpin> WireWriter<W> {
    pub fn new(inner: W, framing: Framing) -> Self {
        Self { inner, framing }
    }

    pub async fn write_command(&mut self, cmd: Command) -> Result<(), WireError> {
        self.write_frame(cmd.as_str().as_bytes()).await
    }

    pub async fn write_text(&mut self, text: &str) -> Result<(), WireError> {
        self.write_frame(text.as_bytes()).await
    }

    pub async fn write_snapshot(&mut self, snapshot: &PlantSnapshot) -> Result<(), WireError> {
        let record = snapshot.to_bytes();
        tracing::trace!(record = %hex::encode(record), "snapshot sent");
        self.write_frame(&record).await
    }

    async fn write_frame(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        if bytes.len() > MAX_MESSAGE {
            return Err(WireError::TooLarge(bytes.len()));
        }
        if self.framing == Framing::LengthPrefixed {
            self.inner.write_u32(bytes.len() as u32).await?;
        }
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), WireError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

fn eof_as_closed(e: std::io::Error) -> WireError {
    if e.kind() == ErrorKind::UnexpectedEof {
        WireError::Closed
    } else {
        WireError::Io(e)
    }
}
