//! Channel demultiplexing for the Kubernetes exec, attach and port-forward
//! streaming endpoints.
//!
//! One WebSocket carries several logical byte streams. Every message starts
//! with a one-byte channel id; in port-forward mode the first message of each
//! channel also carries a two-byte port number. A [`Demuxer`] owns the
//! connection, runs a receive loop that routes payload into per-channel
//! [`ByteBuffer`]s, and hands out [`ChannelStream`]s with blocking
//! `std::io::Read` / `std::io::Write`.

pub mod buffer;
pub mod channel;
pub mod config;
pub mod connection;
pub mod demux;
pub mod error;
pub mod frame;
pub mod stream;
pub mod ws;

pub use buffer::ByteBuffer;
pub use channel::StreamMode;
pub use config::{Config, ConfigBuilder};
pub use connection::{CloseReason, Connection, Received};
pub use demux::Demuxer;
pub use error::{MuxError, Result};
pub use frame::{Frame, FrameHeader, FrameParser, HEADER_SIZE};
pub use stream::ChannelStream;
pub use tokio_util::sync::CancellationToken;
pub use ws::WsConnection;
