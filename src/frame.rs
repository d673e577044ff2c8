use crate::channel::StreamMode;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the channel id that starts every message.
pub const HEADER_SIZE: usize = 1;
/// Size of the port number carried by the first port-forward message of a channel.
pub const PORT_PREFIX_SIZE: usize = 2;

/// One outbound message: channel id followed by payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: u8,
    pub data: Bytes,
}

impl Frame {
    pub fn new(channel: u8, data: Bytes) -> Self {
        Self { channel, data }
    }

    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }

    /// Wire representation, `[channel] ++ data`.
    pub fn encode(&self) -> Bytes {
        encode_frame(self.channel, &self.data)
    }
}

/// Builds the wire form of a frame straight from a borrowed payload.
pub fn encode_frame(channel: u8, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + data.len());
    buf.put_u8(channel);
    buf.put_slice(data);
    buf.freeze()
}

/// Header information pulled out of the first chunk of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub channel: u8,
    /// Port number, present only on the first port-forward message of a channel
    pub port: Option<u16>,
    /// Offset of the first payload byte within the chunk
    pub payload_offset: usize,
    /// Port prefix bytes that did not fit in this chunk and open the next one
    pub prefix_remaining: usize,
}

/// Parses the leading bytes of inbound messages.
///
/// Owned by the receive loop. In port-forward mode it remembers which
/// channels have already been seen so that the port prefix is stripped
/// exactly once per channel.
#[derive(Debug)]
pub struct FrameParser {
    mode: StreamMode,
    ports_seen: [bool; 256],
}

impl FrameParser {
    pub fn new(mode: StreamMode) -> Self {
        Self {
            mode,
            ports_seen: [false; 256],
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Parses the first chunk of a message.
    ///
    /// Returns `None` for chunks shorter than two bytes, which carry no
    /// payload and are treated as heartbeats.
    pub fn parse(&mut self, chunk: &[u8]) -> Option<FrameHeader> {
        if chunk.len() < HEADER_SIZE + 1 {
            return None;
        }

        let channel = chunk[0];
        let mut header = FrameHeader {
            channel,
            port: None,
            payload_offset: HEADER_SIZE,
            prefix_remaining: 0,
        };

        let seen = &mut self.ports_seen[channel as usize];
        if self.mode.has_port_prefix() && !*seen {
            *seen = true;
            if chunk.len() >= HEADER_SIZE + PORT_PREFIX_SIZE {
                header.port = Some(u16::from_le_bytes([chunk[1], chunk[2]]));
            }
            let prefix_end = HEADER_SIZE + PORT_PREFIX_SIZE;
            header.payload_offset = prefix_end.min(chunk.len());
            header.prefix_remaining = prefix_end - header.payload_offset;
        }

        Some(header)
    }

    pub fn has_seen_port(&self, channel: u8) -> bool {
        self.ports_seen[channel as usize]
    }
}
