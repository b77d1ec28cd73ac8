//! Receive side of the daemon data port.
use std::{
    io::{ErrorKind, Read},
    net::{Shutdown, TcpStream},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::lock;

/// Outcome of a single fill attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// The buffer holds exactly the requested number of bytes.
    Filled,
    /// The read timed out before the buffer was full. Bytes received so far are kept.
    Pending,
    /// The peer closed the connection.
    Closed,
}

/// A fixed length byte buffer filled across one or more reads.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    data: Vec<u8>,
    filled: usize,
}

impl ReceiveBuffer {
    #[must_use]
    pub fn new(len: usize) -> Self {
        ReceiveBuffer {
            data: vec![0u8; len],
            filled: 0,
        }
    }

    /// Total length of the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of bytes received so far.
    #[must_use]
    pub fn filled(&self) -> usize {
        self.filled
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.filled == self.data.len()
    }

    /// The buffer contents, only meaningful once full.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// Discard any received bytes, resizing to `len`.
    pub fn reset(&mut self, len: usize) {
        self.data.resize(len, 0);
        self.filled = 0;
    }

    /// Fill the remainder of the buffer from `reader`.
    ///
    /// A zero length read reports [Fill::Closed] and discards partial data. A read timeout
    /// reports [Fill::Pending] and keeps partial data so a later call continues where this
    /// one stopped.
    ///
    /// # Errors
    /// [crate::Error::Transport] for any other read error; partial data is discarded.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> Result<Fill> {
        while self.filled < self.data.len() {
            match reader.read(&mut self.data[self.filled..]) {
                Ok(0) => {
                    self.filled = 0;
                    return Ok(Fill::Closed);
                }
                Ok(n) => self.filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(Fill::Pending);
                }
                Err(err) => {
                    self.filled = 0;
                    return Err(err.into());
                }
            }
        }
        Ok(Fill::Filled)
    }
}

#[derive(Default)]
struct DataState {
    stream: Option<TcpStream>,
    buffer: ReceiveBuffer,
}

impl DataState {
    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.buffer.reset(self.buffer.len());
    }
}

/// Streaming reader for the daemon data port.
///
/// The socket and the receive buffer share one lock, held for the duration of connect,
/// disconnect and fill, so a disconnect never invalidates a read in progress.
pub struct DataChannel {
    host: String,
    port: u16,
    timeout: Duration,
    state: Mutex<DataState>,
}

impl DataChannel {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        DataChannel {
            host: host.into(),
            port,
            timeout,
            state: Mutex::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, DataState> {
        lock(&self.state)
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().stream.is_some()
    }

    /// Connect if not already connected. Any partially received data is discarded.
    ///
    /// # Errors
    /// [crate::Error::Transport] if the connection cannot be established.
    pub fn connect(&self) -> Result<()> {
        let mut state = self.state();
        if state.stream.is_some() {
            return Ok(());
        }
        debug!(host = %self.host, port = self.port, "connecting data channel");
        let stream = TcpStream::connect((self.host.as_str(), self.port))?;
        stream.set_read_timeout(Some(self.timeout))?;
        let len = state.buffer.len();
        state.buffer.reset(len);
        state.stream = Some(stream);
        Ok(())
    }

    /// Close the connection, if any, discarding partially received data.
    pub fn disconnect(&self) {
        let mut state = self.state();
        if state.stream.is_some() {
            debug!(port = self.port, "data channel disconnected");
        }
        state.close();
    }

    /// Fill a buffer of `len` bytes from the connection. Once full, `decode` is called with
    /// the complete buffer and its result returned.
    ///
    /// Returns `None` without reading if not connected. If `len` differs from the previous
    /// call any partial data is discarded. A closed or failed connection is dropped.
    ///
    /// # Errors
    /// [crate::Error::Transport] on read failure.
    pub fn fill<T, F>(&self, len: usize, decode: F) -> Result<Option<Received<T>>>
    where
        F: FnOnce(&[u8]) -> T,
    {
        let mut state = self.state();
        let DataState { stream, buffer } = &mut *state;
        let Some(reader) = stream.as_mut() else {
            return Ok(None);
        };
        if buffer.len() != len {
            buffer.reset(len);
        }

        match buffer.fill_from(reader) {
            Ok(Fill::Filled) => {
                trace!(len, "data buffer filled");
                let zult = decode(buffer.as_slice());
                buffer.reset(len);
                Ok(Some(Received::Data(zult)))
            }
            Ok(Fill::Pending) => {
                trace!(filled = buffer.filled(), len, "data read timed out");
                Ok(Some(Received::Pending))
            }
            Ok(Fill::Closed) => {
                debug!(port = self.port, "data connection closed by peer");
                state.close();
                Ok(Some(Received::Closed))
            }
            Err(err) => {
                warn!(port = self.port, "data read failed, dropping connection: {err}");
                state.close();
                Err(err)
            }
        }
    }
}

/// Result of [DataChannel::fill] for a connected channel.
#[derive(Debug, PartialEq, Eq)]
pub enum Received<T> {
    Data(T),
    Pending,
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use rand::Rng;
    use std::{
        collections::VecDeque,
        io::{self, Write},
        net::TcpListener,
        thread,
    };

    /// Hands out scripted chunks, one per read call.
    struct ChunkedReader {
        chunks: VecDeque<io::Result<Vec<u8>>>,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                None => Ok(0),
                Some(Err(err)) => Err(err),
                Some(Ok(mut chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(Ok(chunk.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    fn chunked(dat: &[u8], sizes: impl Iterator<Item = usize>) -> ChunkedReader {
        let mut chunks = VecDeque::new();
        let mut start = 0;
        for size in sizes {
            if start >= dat.len() {
                break;
            }
            let end = (start + size).min(dat.len());
            chunks.push_back(Ok(dat[start..end].to_vec()));
            start = end;
        }
        ChunkedReader { chunks }
    }

    #[test]
    fn test_fill_single_byte_chunks() {
        let dat: Vec<u8> = (0..=255).collect();
        let mut reader = chunked(&dat, std::iter::repeat(1));
        let mut buf = ReceiveBuffer::new(256);

        assert_eq!(buf.fill_from(&mut reader).unwrap(), Fill::Filled);
        assert_eq!(buf.as_slice(), &dat[..]);
    }

    #[test]
    fn test_fill_random_chunks() {
        let mut rng = rand::thread_rng();
        let dat: Vec<u8> = (0..10_000).map(|_| rng.gen()).collect();
        let sizes: Vec<usize> = (0..10_000).map(|_| rng.gen_range(1..97)).collect();
        let mut reader = chunked(&dat, sizes.into_iter());
        let mut buf = ReceiveBuffer::new(dat.len());

        assert_eq!(buf.fill_from(&mut reader).unwrap(), Fill::Filled);
        assert_eq!(buf.as_slice(), &dat[..]);
    }

    #[test]
    fn test_fill_closed_discards_partial() {
        let mut reader = ChunkedReader {
            chunks: VecDeque::from([Ok(vec![1u8; 100]), Ok(vec![])]),
        };
        let mut buf = ReceiveBuffer::new(256);

        assert_eq!(buf.fill_from(&mut reader).unwrap(), Fill::Closed);
        assert_eq!(buf.filled(), 0);
    }

    #[test]
    fn test_fill_timeout_keeps_partial() {
        let mut reader = ChunkedReader {
            chunks: VecDeque::from([
                Ok(vec![1u8; 100]),
                Err(io::Error::from(ErrorKind::WouldBlock)),
                Err(io::Error::from(ErrorKind::Interrupted)),
                Ok(vec![2u8; 156]),
            ]),
        };
        let mut buf = ReceiveBuffer::new(256);

        assert_eq!(buf.fill_from(&mut reader).unwrap(), Fill::Pending);
        assert_eq!(buf.filled(), 100);
        assert_eq!(buf.fill_from(&mut reader).unwrap(), Fill::Filled);
        assert_eq!(&buf.as_slice()[99..101], &[1, 2]);
    }

    #[test]
    fn test_fill_error() {
        let mut reader = ChunkedReader {
            chunks: VecDeque::from([
                Ok(vec![1u8; 10]),
                Err(io::Error::from(ErrorKind::ConnectionReset)),
            ]),
        };
        let mut buf = ReceiveBuffer::new(256);

        assert!(matches!(
            buf.fill_from(&mut reader),
            Err(Error::Transport(_))
        ));
        assert_eq!(buf.filled(), 0);
    }

    #[test]
    fn test_channel_not_connected() {
        let chan = DataChannel::new("127.0.0.1", 1, Duration::from_millis(10));

        assert_eq!(chan.fill(16, |b| b.len()).unwrap(), None);
    }

    #[test]
    fn test_channel_fill_over_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            for chunk in (0u8..64).collect::<Vec<_>>().chunks(7) {
                stream.write_all(chunk).unwrap();
                stream.flush().unwrap();
            }
            stream
        });

        let chan = DataChannel::new("127.0.0.1", port, Duration::from_millis(100));
        chan.connect().unwrap();
        let mut got = Vec::new();
        for _ in 0..50 {
            match chan.fill(32, |b| b.to_vec()).unwrap() {
                Some(Received::Data(dat)) => got.extend(dat),
                Some(Received::Pending) => {}
                other => panic!("unexpected fill result {other:?}"),
            }
            if got.len() == 64 {
                break;
            }
        }
        let stream = server.join().unwrap();

        assert_eq!(got, (0u8..64).collect::<Vec<_>>());

        drop(stream);
        let mut closed = false;
        for _ in 0..50 {
            if chan.fill(32, |b| b.to_vec()).unwrap() == Some(Received::Closed) {
                closed = true;
                break;
            }
        }
        assert!(closed);
        assert!(!chan.is_connected());
    }
}
