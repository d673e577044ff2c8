use crate::{
    buffer::ByteBuffer,
    channel::StreamMode,
    config::Config,
    connection::{Connection, Received},
    error::{MuxError, Result},
    frame::{FrameParser, encode_frame},
    stream::ChannelStream,
};
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    sync::{Mutex, Notify},
    task::{self, JoinHandle},
};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Splits one connection into per-channel byte streams.
///
/// Channels are registered with [`get_stream`](Self::get_stream) before the
/// receive loop is started with [`start`](Self::start). Inbound data for a
/// channel nobody registered is dropped.
///
/// `Demuxer` is a cheap handle; clones share the same connection and loop.
/// Dropping the last handle cancels the receive loop.
pub struct Demuxer<C> {
    inner: Arc<DemuxInner<C>>,
    _cancel_on_drop: Arc<DropGuard>,
}

/// State shared between demuxer handles, channel streams and the receive loop
#[derive(Debug)]
pub(crate) struct DemuxInner<C> {
    connection: C,
    mode: StreamMode,
    config: Config,
    /// Registered channel buffers
    buffers: DashMap<u8, Arc<ByteBuffer>>,
    /// Keeps outbound frames whole when several writers race
    send_lock: Mutex<()>,
    /// Runtime that drives the receive loop and blocking writes
    runtime: Handle,
    cancel: CancellationToken,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    closed_notify: Notify,
    connection_closed: AtomicBool,
}

impl<C: std::fmt::Debug> std::fmt::Debug for Demuxer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Demuxer")
            .field("inner", &self.inner)
            .finish()
    }
}

impl<C> Clone for Demuxer<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _cancel_on_drop: Arc::clone(&self._cancel_on_drop),
        }
    }
}

impl<C: Connection> Demuxer<C> {
    /// Creates a demuxer with the default configuration.
    ///
    /// Must be called from within a tokio runtime. No I/O happens until
    /// [`start`](Self::start).
    pub fn new(connection: C, mode: StreamMode) -> Result<Self> {
        Self::with_config(connection, mode, Config::default())
    }

    pub fn with_config(connection: C, mode: StreamMode, config: Config) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| MuxError::NoRuntime)?;
        let cancel = CancellationToken::new();

        let inner = Arc::new(DemuxInner {
            connection,
            mode,
            config,
            buffers: DashMap::new(),
            send_lock: Mutex::new(()),
            runtime,
            cancel: cancel.clone(),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            connection_closed: AtomicBool::new(false),
        });

        Ok(Self {
            inner,
            _cancel_on_drop: Arc::new(cancel.drop_guard()),
        })
    }

    pub fn mode(&self) -> StreamMode {
        self.inner.mode
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn connection(&self) -> &C {
        &self.inner.connection
    }

    /// Returns a stream reading from `read_channel` and writing to
    /// `write_channel`.
    ///
    /// Registers a buffer for `read_channel` on first use; later calls for
    /// the same channel share that buffer. At least one channel is required.
    pub fn get_stream(
        &self,
        read_channel: Option<u8>,
        write_channel: Option<u8>,
    ) -> Result<ChannelStream<C>> {
        let reader = match read_channel {
            Some(channel) => Some((channel, self.inner.register(channel)?)),
            None => None,
        };
        let writer = write_channel.map(|channel| (channel, Arc::clone(&self.inner)));
        ChannelStream::new(reader, writer)
    }

    /// Launches the receive loop. Fails if it was already started.
    pub fn start(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(MuxError::Closed);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(MuxError::AlreadyStarted);
        }
        // Only shutdown holds the lock for long
        let Ok(mut task) = self.inner.task.try_lock() else {
            return Err(MuxError::Closed);
        };
        if self.inner.cancel.is_cancelled() {
            return Err(MuxError::Closed);
        }

        let inner = Arc::clone(&self.inner);
        *task = Some(self.inner.runtime.spawn(recv_loop(inner)));
        Ok(())
    }

    /// Sends `data` on `channel` as one complete frame.
    pub async fn write(&self, channel: u8, data: &[u8]) -> Result<()> {
        self.inner.write(channel, data).await
    }

    /// Like [`write`](Self::write), giving up with [`MuxError::Cancelled`]
    /// when `cancel` fires first. A frame cut short by cancellation may
    /// leave the connection unusable.
    pub async fn write_with_cancel(
        &self,
        channel: u8,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MuxError::Cancelled),
            result = self.inner.write(channel, data) => result,
        }
    }

    /// True once the receive loop has ended, for whatever reason.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Resolves once the receive loop has ended.
    pub async fn closed(&self) {
        loop {
            let notified = self.inner.closed_notify.notified();
            if self.inner.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Stops the receive loop and waits for it to finish.
    ///
    /// Every registered buffer is end-marked before this returns, and none
    /// is written to afterwards. Closes the connection as well when the
    /// configuration says the demuxer owns it. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.cancel.cancel();

        {
            let mut task = self.inner.task.lock().await;
            if let Some(handle) = task.take() {
                if let Err(e) = handle.await {
                    tracing::error!("receive loop failed: {}", e);
                }
            }
        }

        // Covers a demuxer that was never started
        self.inner.finish();

        if self.inner.config.owns_connection
            && !self.inner.connection_closed.swap(true, Ordering::SeqCst)
        {
            self.inner.connection.close().await?;
        }
        Ok(())
    }

    /// Blocking form of [`shutdown`](Self::shutdown).
    ///
    /// Fails with [`MuxError::BlockingInRuntime`] on a current-thread
    /// runtime's own thread, see [`ChannelStream`].
    pub fn shutdown_blocking(&self) -> Result<()> {
        self.inner.block_on(self.shutdown())?
    }
}

impl<C: Connection> DemuxInner<C> {
    fn register(&self, channel: u8) -> Result<Arc<ByteBuffer>> {
        let buffer = match self.buffers.entry(channel) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let buffer = Arc::new(ByteBuffer::new(
                    self.config.initial_buffer_size,
                    self.config.max_buffer_size,
                )?);
                entry.insert(Arc::clone(&buffer));
                buffer
            }
        };

        // Registered after the loop ended: nothing will ever arrive
        if self.is_closed() {
            buffer.write_end();
        }
        Ok(buffer)
    }

    pub(crate) async fn write(&self, channel: u8, data: &[u8]) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(MuxError::Closed);
        }

        let frame = encode_frame(channel, data);
        let _guard = self.send_lock.lock().await;
        self.connection.send(frame, true).await
    }

    /// Sends a frame, blocking the calling thread until it is out.
    pub(crate) fn write_blocking(&self, channel: u8, data: &[u8]) -> Result<()> {
        self.block_on(self.write(channel, data))?
    }

    /// Drives `future` to completion on the demuxer's runtime from
    /// synchronous code.
    ///
    /// A multi-thread worker hands its other tasks off for the duration.
    /// A current-thread runtime cannot do that, so there the call is refused
    /// whenever that runtime is entered on this thread.
    fn block_on<F: Future>(&self, future: F) -> Result<F::Output> {
        match Handle::try_current().map(|current| current.runtime_flavor()) {
            Err(_) => Ok(self.runtime.block_on(future)),
            Ok(RuntimeFlavor::CurrentThread) => Err(MuxError::BlockingInRuntime),
            Ok(_) => Ok(task::block_in_place(|| self.runtime.block_on(future))),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// End-marks every buffer and raises the closed notification once.
    fn finish(&self) {
        let first = !self.closed.swap(true, Ordering::SeqCst);

        for entry in self.buffers.iter() {
            entry.value().write_end();
        }

        if first {
            tracing::debug!(channels = self.buffers.len(), "demuxer closed");
            self.closed_notify.notify_waiters();
        }
    }
}

/// Background task that reads messages from the connection and routes their
/// payload to the registered channel buffers
async fn recv_loop<C: Connection>(inner: Arc<DemuxInner<C>>) {
    let mut parser = FrameParser::new(inner.mode);
    let mut scratch = vec![0u8; inner.config.receive_buffer_size];
    // Destination of the message currently being received
    let mut target: Option<Arc<ByteBuffer>> = None;
    let mut in_message = false;
    // Port prefix bytes still owed by a message whose first chunk was short
    let mut prefix_left = 0;

    tracing::debug!(mode = ?inner.mode, "recv_loop started");

    loop {
        let received = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => {
                tracing::info!("recv_loop shutting down");
                break;
            }
            result = inner.connection.receive(&mut scratch) => result,
        };

        let (len, end_of_message) = match received {
            Ok(Received::Chunk {
                len,
                end_of_message,
            }) => (len, end_of_message),
            Ok(Received::Closed(reason)) => {
                tracing::info!(?reason, "Connection closed");
                break;
            }
            Err(e) => {
                tracing::error!("Receive error: {}", e);
                break;
            }
        };

        let chunk = &scratch[..len];
        let payload = if in_message {
            let skip = prefix_left.min(chunk.len());
            prefix_left -= skip;
            &chunk[skip..]
        } else {
            let Some(header) = parser.parse(chunk) else {
                // Heartbeat
                continue;
            };
            if let Some(port) = header.port {
                tracing::debug!(channel = header.channel, port, "port-forward channel opened");
            }
            target = inner
                .buffers
                .get(&header.channel)
                .map(|buffer| Arc::clone(buffer.value()));
            if target.is_none() {
                tracing::trace!(channel = header.channel, "discarding unregistered channel");
            }
            prefix_left = header.prefix_remaining;
            &chunk[header.payload_offset..]
        };
        in_message = !end_of_message;

        if let Some(buffer) = &target {
            if let Err(e) = buffer.write(payload) {
                tracing::error!("Channel buffer error: {}", e);
                break;
            }
        }
    }

    inner.finish();
}
