//! BRAM server: accepts a TCP peer and answers read requests
//!
//! Connections are served one at a time. Each receive on the socket is one
//! request; the handler writes the response before the next receive.
//!
//! ```text
//! Listening ──accept──> Connected ──peer closed──> Listening (Forever)
//!                                                 └──> Terminated (Once)
//! ```

use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::context::BramContext;
use crate::error::{BramError, BramResult};
use crate::protocol::RequestHandler;

/// Default server port
pub const DEFAULT_PORT: u16 = 12345;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What to do after a peer disconnects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcceptPolicy {
    /// Serve a single connection, then terminate
    Once,
    /// Return to accepting until stopped
    #[default]
    Forever,
}

/// Counters for one served connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub requests: u64,
    pub errors: u64,
    pub bytes_sent: u64,
}

/// Stops a running server from another thread
///
/// The accept loop notices within one poll interval. A connection being
/// served is finished first.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// TCP front end over a [`BramContext`]
pub struct BramServer {
    listener: TcpListener,
    config: ServerConfig,
    handler: RequestHandler,
    running: Arc<AtomicBool>,
}

impl BramServer {
    /// Bind the listening socket
    pub fn bind(config: &ServerConfig, ctx: Arc<BramContext>) -> BramResult<Self> {
        let addr = config.listen_addr();
        let listener =
            TcpListener::bind(&addr).map_err(|source| BramError::Bind { addr, source })?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            config: config.clone(),
            handler: RequestHandler::new(ctx),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Run the accept loop (blocking)
    ///
    /// Returns the number of connections served.
    pub fn serve(&self) -> BramResult<u64> {
        let local = self.local_addr()?;
        tracing::info!(
            regions = self.handler.context().region_count(),
            policy = ?self.config.accept_policy,
            "BRAM server listening on {}",
            local
        );

        let mut served = 0u64;
        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!("Client connected: {}", peer);
                    match self.serve_connection(stream) {
                        Ok(stats) => tracing::info!(
                            requests = stats.requests,
                            errors = stats.errors,
                            bytes_sent = stats.bytes_sent,
                            "Client disconnected: {}",
                            peer
                        ),
                        Err(e) => tracing::warn!("Connection to {} dropped: {}", peer, e),
                    }
                    served += 1;

                    if self.config.accept_policy == AcceptPolicy::Once {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!("Accept error: {}", e);
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(served)
    }

    /// Serve requests on one connection until the peer closes
    ///
    /// Malformed or invalid requests are answered with the error marker and
    /// do not end the connection. Socket errors do.
    pub fn serve_connection(&self, mut stream: TcpStream) -> io::Result<ConnectionStats> {
        // Accepted sockets may inherit the listener's non-blocking mode
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(self.config.read_timeout())?;
        stream.set_write_timeout(self.config.write_timeout())?;
        stream.set_nodelay(true)?;

        let mut buffer = vec![0u8; self.config.max_request_len];
        let mut stats = ConnectionStats::default();

        loop {
            let n = match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            let outcome = self.handler.respond(&mut stream, &buffer[..n])?;
            stats.requests += 1;
            if outcome.is_error() {
                stats.errors += 1;
            }
            stats.bytes_sent += outcome.payload().len() as u64;
        }

        Ok(stats)
    }
}
