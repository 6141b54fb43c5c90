//! wire protocol spoken between the coordinator and its two peers

pub mod codec;
pub mod command;

pub use codec::{Framing, Message, WireError, WireReader, WireWriter, MAX_MESSAGE};
pub use command::{Command, UNKNOWN_REQUEST};

/// type-erased stream halves, so tcp and in-memory pipes share one code path
pub type BoxedReader = Box<dyn tokio::io::AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn tokio::io::AsyncWrite + Send + Unpin>;
