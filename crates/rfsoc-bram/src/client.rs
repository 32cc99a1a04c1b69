//! Client transport for the BRAM server
//!
//! Responses carry no framing, so the caller states how many bytes it
//! expects. A single `read` may return only part of a response that spans
//! several TCP segments; [`BramClient::send_request`] keeps reading until
//! the full count has arrived and fails if the peer closes first.
//!
//! A rejected request is answered with the 5-byte `ERROR` marker instead of
//! the expected count. [`BramClient::fetch`] recognizes it: once the bytes
//! received so far could be the marker, it waits up to
//! [`ClientConfig::marker_wait`] to see whether the response ends there.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rfsoc_bram::BramClient;
//!
//! let mut client = BramClient::connect("192.168.7.187", 12345).unwrap();
//! let counter = client.fetch("acc_cnt", 0, 4).unwrap();
//! let spectrum = client.fetch("synth0_0", 0, 4096).unwrap();
//! assert_eq!(spectrum.len(), 4096);
//! ```

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::error::ClientError;
use crate::protocol::{Request, ERROR_MARKER};

/// Receive chunk size
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Client connection settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connect timeout per resolved address (none uses the OS default)
    pub connect_timeout: Option<Duration>,
    /// Per-read timeout
    pub read_timeout: Option<Duration>,
    /// Per-write timeout
    pub write_timeout: Option<Duration>,
    /// Receive chunk size in bytes
    pub chunk_size: usize,
    /// Idle time after which a marker-shaped response is taken as complete
    pub marker_wait: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(10)),
            read_timeout: Some(Duration::from_secs(30)),
            write_timeout: Some(Duration::from_secs(10)),
            chunk_size: DEFAULT_CHUNK_SIZE,
            marker_wait: Duration::from_millis(100),
        }
    }
}

/// Connection to a BRAM server
#[derive(Debug)]
pub struct BramClient {
    stream: TcpStream,
    chunk: Vec<u8>,
    /// Bytes read ahead of the current response
    pending: Vec<u8>,
    read_timeout: Option<Duration>,
    marker_wait: Duration,
}

impl BramClient {
    /// Connect with default settings
    pub fn connect(host: &str, port: u16) -> Result<Self, ClientError> {
        Self::connect_with(host, port, &ClientConfig::default())
    }

    /// Connect, trying every address `host` resolves to
    pub fn connect_with(host: &str, port: u16, config: &ClientConfig) -> Result<Self, ClientError> {
        let label = format!("{}:{}", host, port);
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| ClientError::connect(&label, e))?
            .collect();

        let mut last_err =
            io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing");
        for addr in addrs {
            let attempt = match config.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    return Self::from_stream(stream, config)
                        .map_err(|e| ClientError::connect(&label, e))
                }
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    last_err = e;
                }
            }
        }

        Err(ClientError::connect(label, last_err))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, config: &ClientConfig) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;

        Ok(Self {
            stream,
            chunk: vec![0u8; config.chunk_size.max(1)],
            pending: Vec::new(),
            read_timeout: config.read_timeout,
            // The socket API rejects a zero timeout
            marker_wait: config.marker_wait.max(Duration::from_millis(1)),
        })
    }

    /// Send `request` verbatim and receive exactly `expected` bytes
    ///
    /// No line terminator is appended and the response is not inspected:
    /// an error marker comes back as five bytes of data. Each read asks for
    /// at most the bytes still missing, so a later response is never
    /// consumed here.
    pub fn send_request(&mut self, request: &str, expected: usize) -> Result<Vec<u8>, ClientError> {
        self.send(request)?;

        let mut response = Vec::with_capacity(expected);
        self.receive(&mut response, expected, expected)?;

        tracing::trace!(bytes = response.len(), "received response to '{}'", request);
        Ok(response)
    }

    /// Read `length` bytes of `region` starting at `offset`
    ///
    /// Fails with [`ClientError::ServerError`] when the server answers with
    /// the error marker, leaving the connection ready for the next request.
    /// The server clamps reads that run past the end of a region, so
    /// `length` must fit inside it or this call fails with a short read
    /// or timeout.
    pub fn fetch(&mut self, region: &str, offset: u64, length: usize) -> Result<Vec<u8>, ClientError> {
        let request = Request::new(region, offset, length as u64).to_string();
        self.send(&request)?;

        let marker_len = ERROR_MARKER.len();
        let mut response = Vec::with_capacity(length);
        self.receive(&mut response, length.min(marker_len), length)?;

        if ERROR_MARKER.starts_with(&response) {
            if response.len() < marker_len {
                // Everything expected has arrived; the marker would be longer
                let tail = self.wait_for(marker_len - response.len())?;
                if tail == ERROR_MARKER[response.len()..] {
                    return Err(ClientError::ServerError { request });
                }
                self.unread(tail);
            } else if length == marker_len {
                return Err(ClientError::ServerError { request });
            } else {
                // Data keeps coming after a marker-shaped head; the marker does not
                let next = self.wait_for(1)?;
                if next.is_empty() {
                    return Err(ClientError::ServerError { request });
                }
                response.extend_from_slice(&next);
            }
        }

        self.receive(&mut response, length, length)?;

        tracing::trace!(bytes = response.len(), "received response to '{}'", request);
        Ok(response)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// Change the per-read timeout
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)?;
        self.read_timeout = timeout;
        Ok(())
    }

    fn send(&mut self, request: &str) -> Result<(), ClientError> {
        self.stream
            .write_all(request.as_bytes())
            .and_then(|_| self.stream.flush())
            .map_err(ClientError::Send)
    }

    /// Read until `response` holds `target` bytes
    fn receive(
        &mut self,
        response: &mut Vec<u8>,
        target: usize,
        expected: usize,
    ) -> Result<(), ClientError> {
        let buffered = target.saturating_sub(response.len()).min(self.pending.len());
        response.extend(self.pending.drain(..buffered));

        while response.len() < target {
            let want = (target - response.len()).min(self.chunk.len());
            match self.stream.read(&mut self.chunk[..want]) {
                Ok(0) => {
                    return Err(ClientError::ShortRead {
                        expected,
                        received: response.len(),
                    })
                }
                Ok(n) => response.extend_from_slice(&self.chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ClientError::Receive(e)),
            }
        }

        Ok(())
    }

    /// Read up to `count` bytes, stopping once the peer has been idle for
    /// `marker_wait` or has closed
    fn wait_for(&mut self, count: usize) -> Result<Vec<u8>, ClientError> {
        let mut tail = Vec::with_capacity(count);
        let buffered = count.min(self.pending.len());
        tail.extend(self.pending.drain(..buffered));

        let deadline = Instant::now() + self.marker_wait;
        let mut result = Ok(());
        while tail.len() < count {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if let Err(e) = self.stream.set_read_timeout(Some(deadline - now)) {
                result = Err(e);
                break;
            }

            let want = (count - tail.len()).min(self.chunk.len());
            match self.stream.read(&mut self.chunk[..want]) {
                Ok(0) => break,
                Ok(n) => tail.extend_from_slice(&self.chunk[..n]),
                Err(ref e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    break
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        let restored = self.stream.set_read_timeout(self.read_timeout);
        result.and(restored).map_err(ClientError::Receive)?;
        Ok(tail)
    }

    /// Return read-ahead bytes to the front of the receive queue
    fn unread(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        tracing::debug!(bytes = bytes.len(), "Server sent more than requested");
        let rest = std::mem::replace(&mut self.pending, bytes);
        self.pending.extend(rest);
    }
}

/// Check if a response is the server's error marker
pub fn is_error_marker(response: &[u8]) -> bool {
    response == ERROR_MARKER
}
