use std::io::{ErrorKind, Read};

use bytes::Bytes;
use muxlink_transport::ReadResult;
use tracing::trace;

use crate::buffer::FrameBuffer;
use crate::codec::FrameConfig;
use crate::error::{FrameError, Result};

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally: callers always get complete payloads.
/// [`fill`](Self::fill) performs exactly one read so loops driving a
/// timed-out channel can inspect every [`ReadResult`].
pub struct FrameReader<T> {
    inner: T,
    buf: FrameBuffer,
    chunk: Vec<u8>,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: FrameBuffer::new(config.max_buffer_size),
            chunk: vec![0u8; config.read_chunk_size.max(1)],
            config,
        }
    }

    /// Perform one read from the stream and buffer whatever arrived.
    ///
    /// `Interrupted` is retried. Fails only with
    /// [`FrameError::BufferOverflow`]; channel failures are reported through
    /// the returned [`ReadResult`].
    pub fn fill(&mut self) -> Result<ReadResult> {
        let result = loop {
            match self.inner.read(&mut self.chunk) {
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                other => break ReadResult::classify(other),
            }
        };
        if let ReadResult::Data(n) = result {
            trace!(bytes = n, buffered = self.buf.len(), "read chunk");
            self.buf.extend(&self.chunk[..n])?;
        }
        Ok(result)
    }

    /// Pop the next already-buffered frame without touching the stream.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        self.buf.next_frame()
    }

    /// Pop every already-buffered frame.
    pub fn drain_frames(&mut self) -> Vec<Bytes> {
        self.buf.drain_frames()
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached and
    /// an `Io` error of kind `TimedOut` if the stream's read timeout fires.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(frame) = self.next_frame() {
                return Ok(frame);
            }

            match self.fill()? {
                ReadResult::Data(_) => {}
                ReadResult::EndOfStream => return Err(FrameError::ConnectionClosed),
                ReadResult::Timeout => {
                    return Err(FrameError::Io(std::io::Error::from(ErrorKind::TimedOut)))
                }
                ReadResult::TransportError(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// The accumulation buffer.
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buf
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::{TcpListener, TcpStream};

    use super::*;
    use crate::codec::encode;
    use crate::writer::write_frame;

    fn wire<P: AsRef<[u8]>>(payloads: &[P]) -> Vec<u8> {
        payloads
            .iter()
            .flat_map(|p| encode(p.as_ref()).unwrap().to_vec())
            .collect()
    }

    #[test]
    fn read_single_frame() {
        let mut reader = FrameReader::new(Cursor::new(wire(&["hello"])));
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.as_ref(), b"hello");
    }

    #[test]
    fn read_multiple_frames() {
        let mut reader = FrameReader::new(Cursor::new(wire(&["one", "two", "three"])));

        assert_eq!(reader.read_frame().unwrap().as_ref(), b"one");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"two");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"three");
    }

    #[test]
    fn one_fill_can_yield_several_frames() {
        let mut reader = FrameReader::new(Cursor::new(wire(&["a", "b", "c"])));
        assert!(matches!(reader.fill().unwrap(), ReadResult::Data(_)));
        assert_eq!(reader.drain_frames().len(), 3);
    }

    #[test]
    fn read_frame_with_large_payload() {
        let payload = vec![0xAB; 64 * 1024];
        let mut reader = FrameReader::new(Cursor::new(wire(&[payload.as_slice()])));
        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.as_ref(), payload.as_slice());
    }

    #[test]
    fn partial_read_handling() {
        let byte_reader = ByteByByteReader {
            bytes: wire(&["slow"]),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"slow");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut partial = wire(&["only-part-of-this"]);
        partial.truncate(10);

        let mut reader = FrameReader::new(Cursor::new(partial));
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn oversized_buffer_in_stream() {
        // Header announces 1 KiB; the cap is hit long before it completes.
        let mut bytes = 1024u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 64]);

        let cfg = FrameConfig {
            max_buffer_size: 32,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(bytes), cfg);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::BufferOverflow { max: 32, .. }));
    }

    #[test]
    fn small_chunks_respect_chunk_size() {
        let cfg = FrameConfig {
            read_chunk_size: 3,
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire(&["chunky"])), cfg);
        assert!(matches!(reader.fill().unwrap(), ReadResult::Data(3)));
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"chunky");
    }

    #[test]
    fn would_block_is_reported_as_timeout() {
        let reader = WouldBlockThenData {
            state: 0,
            bytes: wire(&["ok"]),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        assert!(matches!(framed.fill().unwrap(), ReadResult::Timeout));
        assert_eq!(framed.read_frame().unwrap().as_ref(), b"ok");
    }

    #[test]
    fn read_frame_surfaces_timeout_as_io_error() {
        let reader = WouldBlockThenData {
            state: 0,
            bytes: wire(&["ok"]),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        let err = framed.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::TimedOut));
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            state: 0,
            bytes: wire(&["ok"]),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        assert_eq!(framed.read_frame().unwrap().as_ref(), b"ok");
    }

    #[test]
    fn roundtrip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let mut reader = FrameReader::new(server);

        write_frame(&mut client, b"ping").unwrap();
        write_frame(&mut client, b"pong").unwrap();

        assert_eq!(reader.read_frame().unwrap().as_ref(), b"ping");
        assert_eq!(reader.read_frame().unwrap().as_ref(), b"pong");
    }

    #[test]
    fn accessors_and_into_inner() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let _ = reader.get_ref();
        let _ = reader.get_mut();
        assert!(reader.buffer().is_empty());
        assert_eq!(reader.config().read_chunk_size, 4096);
        let _inner = reader.into_inner();
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct WouldBlockThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for WouldBlockThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::WouldBlock));
            }
            let n = (self.bytes.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    struct InterruptedThenData {
        state: u8,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.state == 0 {
                self.state = 1;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let n = (self.bytes.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
