use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_frame, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Frame `payload` and write it to `dst` in full, then flush.
///
/// `Interrupted` is retried; a zero-length write means the peer is gone.
pub fn write_frame<W: Write + ?Sized>(dst: &mut W, payload: &[u8]) -> Result<()> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    encode_frame(payload, &mut buf)?;

    let mut offset = 0usize;
    while offset < buf.len() {
        match dst.write(&buf[offset..]) {
            Ok(0) => return Err(FrameError::ConnectionClosed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }

    loop {
        match dst.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::codec::decode;

    #[test]
    fn write_single_frame() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        write_frame(&mut cursor, b"hello").unwrap();

        let wire = cursor.into_inner();
        assert_eq!(&wire[..4], &[0, 0, 0, 5]);
        let (messages, rest) = decode(&wire);
        assert_eq!(messages, vec![&b"hello"[..]]);
        assert!(rest.is_empty());
    }

    #[test]
    fn write_multiple_frames() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        write_frame(&mut cursor, b"one").unwrap();
        write_frame(&mut cursor, b"two").unwrap();
        write_frame(&mut cursor, b"three").unwrap();

        let wire = cursor.into_inner();
        let (messages, _) = decode(&wire);
        assert_eq!(messages, vec![&b"one"[..], &b"two"[..], &b"three"[..]]);
    }

    #[test]
    fn works_through_trait_objects() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let dst: &mut dyn Write = &mut cursor;
        write_frame(dst, b"dyn").unwrap();
        assert_eq!(cursor.into_inner().len(), 4 + 3);
    }

    #[test]
    fn flush_propagates() {
        let mut sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);

        write_frame(&mut sink, b"x").unwrap();

        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(sink.data.len(), 5);
    }

    #[test]
    fn handles_interrupted_write_and_flush() {
        let mut sink = InterruptedWriteThenFlush {
            wrote_once: false,
            flush_interrupted: false,
            data: Vec::new(),
        };

        write_frame(&mut sink, b"retry").unwrap();
        assert_eq!(&sink.data[4..], b"retry");
    }

    #[test]
    fn short_writes_are_completed() {
        let mut sink = OneByteWriter { data: Vec::new() };
        write_frame(&mut sink, b"drip").unwrap();
        assert_eq!(sink.data, [0, 0, 0, 4, b'd', b'r', b'i', b'p']);
    }

    #[test]
    fn would_block_is_an_error() {
        let err = write_frame(&mut WouldBlockWriter, b"x").unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let err = write_frame(&mut ZeroWriter, b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct InterruptedWriteThenFlush {
        wrote_once: bool,
        flush_interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedWriteThenFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.wrote_once {
                self.wrote_once = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_interrupted {
                self.flush_interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            Ok(())
        }
    }

    struct OneByteWriter {
        data: Vec<u8>,
    }

    impl Write for OneByteWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            match buf.first() {
                Some(byte) => {
                    self.data.push(*byte);
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct WouldBlockWriter;

    impl Write for WouldBlockWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::WouldBlock))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
