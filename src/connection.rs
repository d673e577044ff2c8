use crate::error::Result;
use bytes::Bytes;
use std::future::Future;

/// Close status reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

/// Outcome of one [`Connection::receive`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// `len` bytes were written to the scratch buffer. `end_of_message` is
    /// false when more chunks of the same message follow.
    Chunk { len: usize, end_of_message: bool },
    /// The connection is closed; no more data will arrive.
    Closed(Option<CloseReason>),
}

/// A bidirectional, message-oriented transport.
///
/// `receive` is only ever called by the demuxer's receive loop. `send` may be
/// called from several tasks; the demuxer serializes those calls itself so
/// implementations need not guarantee atomic concurrent sends.
pub trait Connection: Send + Sync + 'static {
    /// Sends `payload` as part of the current outbound message, completing it
    /// when `end_of_message` is true.
    fn send(&self, payload: Bytes, end_of_message: bool) -> impl Future<Output = Result<()>> + Send;

    /// Receives the next chunk of inbound data into `scratch`.
    fn receive(&self, scratch: &mut [u8]) -> impl Future<Output = Result<Received>> + Send;

    /// Starts a graceful close of the transport.
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}
