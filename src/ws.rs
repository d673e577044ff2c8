//! [`Connection`] over a tokio-tungstenite WebSocket.

use crate::{
    connection::{CloseReason, Connection, Received},
    error::Result,
};
use bytes::{Bytes, BytesMut};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Mutex,
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Error as WsError, Message},
};

struct SendHalf<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    /// Fragments of a message whose final part has not been sent yet
    partial: BytesMut,
}

struct ReceiveHalf<S> {
    stream: SplitStream<WebSocketStream<S>>,
    /// Rest of a message that did not fit in the caller's scratch buffer
    pending: Bytes,
}

/// WebSocket transport for the Kubernetes streaming endpoints.
///
/// Binary and text messages both carry channel data. Messages larger than
/// the receive buffer are handed out in several chunks.
pub struct WsConnection<S> {
    send: Mutex<SendHalf<S>>,
    receive: Mutex<ReceiveHalf<S>>,
    close_reason: parking_lot::Mutex<Option<CloseReason>>,
}

impl<S> WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    pub fn new(socket: WebSocketStream<S>) -> Self {
        let (sink, stream) = socket.split();
        Self {
            send: Mutex::new(SendHalf {
                sink,
                partial: BytesMut::new(),
            }),
            receive: Mutex::new(ReceiveHalf {
                stream,
                pending: Bytes::new(),
            }),
            close_reason: parking_lot::Mutex::new(None),
        }
    }

    /// Close status sent by the peer, once one has been received.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.lock().clone()
    }
}

impl<S> std::fmt::Debug for WsConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("close_reason", &*self.close_reason.lock())
            .finish_non_exhaustive()
    }
}

impl<S> Connection for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn send(&self, payload: Bytes, end_of_message: bool) -> Result<()> {
        let mut guard = self.send.lock().await;
        let half = &mut *guard;

        if !end_of_message {
            half.partial.extend_from_slice(&payload);
            return Ok(());
        }

        let message = if half.partial.is_empty() {
            payload
        } else {
            half.partial.extend_from_slice(&payload);
            half.partial.split().freeze()
        };
        half.sink.send(Message::Binary(message)).await?;
        Ok(())
    }

    async fn receive(&self, scratch: &mut [u8]) -> Result<Received> {
        let mut guard = self.receive.lock().await;
        let half = &mut *guard;

        loop {
            if !half.pending.is_empty() {
                let len = scratch.len().min(half.pending.len());
                let chunk = half.pending.split_to(len);
                scratch[..len].copy_from_slice(&chunk);
                return Ok(Received::Chunk {
                    len,
                    end_of_message: half.pending.is_empty(),
                });
            }

            match half.stream.next().await {
                Some(Ok(Message::Binary(data))) => half.pending = data,
                Some(Ok(Message::Text(text))) => {
                    half.pending = Bytes::copy_from_slice(text.as_str().as_bytes());
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|frame| CloseReason {
                        code: frame.code.into(),
                        reason: frame.reason.to_string(),
                    });
                    *self.close_reason.lock() = reason.clone();
                    return Ok(Received::Closed(reason));
                }
                // Control frames are answered by tungstenite itself
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Ok(Received::Closed(None));
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut half = self.send.lock().await;
        match half.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
