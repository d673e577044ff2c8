use crate::{
    buffer::ByteBuffer,
    demux::DemuxInner,
    error::{MuxError, Result},
};
use std::io;
use std::sync::Arc;

/// A blocking byte stream over one channel of a [`Demuxer`](crate::Demuxer).
///
/// Reads come from the channel's receive buffer and block until data or
/// end-of-data arrives. Each write goes out as a single frame. Both sides
/// block the calling thread, so use them from plain threads or
/// `tokio::task::spawn_blocking`; async callers should write through the
/// demuxer directly. On a current-thread runtime's own thread a write fails
/// with [`io::ErrorKind::WouldBlock`] instead of stalling the runtime.
pub struct ChannelStream<C> {
    reader: Option<(u8, Arc<ByteBuffer>)>,
    writer: Option<(u8, Arc<DemuxInner<C>>)>,
}

impl<C: crate::Connection> ChannelStream<C> {
    pub(crate) fn new(
        reader: Option<(u8, Arc<ByteBuffer>)>,
        writer: Option<(u8, Arc<DemuxInner<C>>)>,
    ) -> Result<Self> {
        if reader.is_none() && writer.is_none() {
            return Err(MuxError::NoChannel);
        }
        Ok(Self { reader, writer })
    }

    pub fn can_read(&self) -> bool {
        self.reader.is_some()
    }

    pub fn can_write(&self) -> bool {
        self.writer.is_some()
    }

    pub fn read_channel(&self) -> Option<u8> {
        self.reader.as_ref().map(|(channel, _)| *channel)
    }

    pub fn write_channel(&self) -> Option<u8> {
        self.writer.as_ref().map(|(channel, _)| *channel)
    }

    /// Channel streams have no length.
    pub fn set_len(&mut self, _len: u64) -> Result<()> {
        Err(MuxError::Unsupported("set_len"))
    }

    /// Channel streams have no position.
    pub fn position(&self) -> Result<u64> {
        Err(MuxError::Unsupported("position"))
    }
}

impl<C: crate::Connection> io::Read for ChannelStream<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.reader {
            Some((_, buffer)) => Ok(buffer.read(buf)),
            None => Err(MuxError::Unsupported("read").into()),
        }
    }
}

impl<C: crate::Connection> io::Write for ChannelStream<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.writer {
            // An empty frame would read as a heartbeat
            Some(_) if buf.is_empty() => Ok(0),
            Some((channel, inner)) => {
                inner.write_blocking(*channel, buf)?;
                Ok(buf.len())
            }
            None => Err(MuxError::Unsupported("write").into()),
        }
    }

    /// Writes are sent immediately, there is nothing to flush.
    fn flush(&mut self) -> io::Result<()> {
        Err(MuxError::Unsupported("flush").into())
    }
}

impl<C> io::Seek for ChannelStream<C> {
    fn seek(&mut self, _pos: io::SeekFrom) -> io::Result<u64> {
        Err(MuxError::Unsupported("seek").into())
    }
}

impl<C> std::fmt::Debug for ChannelStream<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStream")
            .field("read_channel", &self.reader.as_ref().map(|(channel, _)| channel))
            .field("write_channel", &self.writer.as_ref().map(|(channel, _)| channel))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Connection, Demuxer, Received, StreamMode, channel};
    use bytes::Bytes;
    use std::io::{Read, Seek, SeekFrom, Write};

    #[derive(Debug, Default)]
    struct RecordingConnection {
        sent: parking_lot::Mutex<Vec<Bytes>>,
    }

    impl Connection for RecordingConnection {
        async fn send(&self, payload: Bytes, _end_of_message: bool) -> crate::Result<()> {
            self.sent.lock().push(payload);
            Ok(())
        }

        async fn receive(&self, _scratch: &mut [u8]) -> crate::Result<Received> {
            std::future::pending().await
        }

        async fn close(&self) -> crate::Result<()> {
            Ok(())
        }
    }

    fn demuxer() -> Demuxer<RecordingConnection> {
        Demuxer::new(RecordingConnection::default(), StreamMode::Exec).unwrap()
    }

    #[tokio::test]
    async fn test_capabilities() {
        let demuxer = demuxer();

        let both = demuxer
            .get_stream(Some(channel::STDOUT), Some(channel::STDIN))
            .unwrap();
        assert!(both.can_read());
        assert!(both.can_write());
        assert_eq!(both.read_channel(), Some(channel::STDOUT));
        assert_eq!(both.write_channel(), Some(channel::STDIN));

        let read_only = demuxer.get_stream(Some(channel::STDERR), None).unwrap();
        assert!(read_only.can_read());
        assert!(!read_only.can_write());

        let write_only = demuxer.get_stream(None, Some(channel::RESIZE)).unwrap();
        assert!(!write_only.can_read());
        assert!(write_only.can_write());
    }

    #[tokio::test]
    async fn test_unsupported_operations() {
        let demuxer = demuxer();
        let mut stream = demuxer
            .get_stream(Some(channel::STDOUT), Some(channel::STDIN))
            .unwrap();

        let err = stream.seek(SeekFrom::Start(0)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        let err = stream.flush().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        assert!(matches!(
            stream.set_len(10),
            Err(MuxError::Unsupported("set_len"))
        ));
        assert!(matches!(
            stream.position(),
            Err(MuxError::Unsupported("position"))
        ));
    }

    #[tokio::test]
    async fn test_missing_side_is_rejected() {
        let demuxer = demuxer();

        let mut read_only = demuxer.get_stream(Some(channel::STDOUT), None).unwrap();
        let err = read_only.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);

        let mut write_only = demuxer.get_stream(None, Some(channel::STDIN)).unwrap();
        let mut buf = [0u8; 4];
        let err = write_only.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_write_sends_frame() {
        let demuxer = demuxer();
        let mut stdin = demuxer.get_stream(None, Some(channel::STDIN)).unwrap();

        let written = tokio::task::spawn_blocking(move || stdin.write(b"ls -l\n").unwrap())
            .await
            .unwrap();
        assert_eq!(written, 6);

        let sent = demuxer.connection().sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].as_ref(), b"\x00ls -l\n");
    }

    #[tokio::test]
    async fn test_empty_write_sends_nothing() {
        let demuxer = demuxer();
        let mut stdin = demuxer.get_stream(None, Some(channel::STDIN)).unwrap();

        assert_eq!(stdin.write(b"").unwrap(), 0);
        assert!(demuxer.connection().sent.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_write_from_async_task() {
        let demuxer = demuxer();
        let mut stdin = demuxer.get_stream(None, Some(channel::STDIN)).unwrap();

        let written = tokio::spawn(async move { stdin.write(b"x").unwrap() })
            .await
            .unwrap();
        assert_eq!(written, 1);

        let sent = demuxer.connection().sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].as_ref(), b"\x00x");
    }

    #[tokio::test]
    async fn test_write_on_current_thread_runtime_fails() {
        let demuxer = demuxer();
        let mut stdin = demuxer.get_stream(None, Some(channel::STDIN)).unwrap();

        let err = stdin.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(demuxer.connection().sent.lock().is_empty());

        assert!(matches!(
            demuxer.shutdown_blocking(),
            Err(MuxError::BlockingInRuntime)
        ));
    }

    #[tokio::test]
    async fn test_read_after_shutdown_returns_eof() {
        let demuxer = demuxer();
        let mut stdout = demuxer.get_stream(Some(channel::STDOUT), None).unwrap();
        demuxer.shutdown().await.unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(stdout.read(&mut buf).unwrap(), 0);
    }
}
