//! TCP and Unix socket server
//!
//! One task accepts on each listener and one task serves each connection.
//! Connections execute commands in order against the shared [`Storage`].
//! Everything stops when the server's [`CancellationToken`] fires.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use trikv_core::Storage;

use crate::error::{NetError, NetResult};
use crate::mux::{Multiplexer, DEFAULT_MAX_FRAME_SIZE};
use crate::protocol::{time_greeting, Command, CommandType, Response};

/// Port used when an address omits one.
pub const DEFAULT_PORT: u16 = 5555;

/// Where a server listens or a client connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddress {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(std::path::PathBuf),
}

impl FromStr for ListenAddress {
    type Err = NetError;

    /// Accepts `tcp://host:port`, `unix:///path/to/socket` or a bare `host:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix://") {
            return unix_address(path);
        }
        let host = s.strip_prefix("tcp://").unwrap_or(s);
        let with_port = if host.rsplit_once(':').map_or(true, |(_, port)| port.parse::<u16>().is_err()) {
            format!("{}:{}", host, DEFAULT_PORT)
        } else {
            host.to_string()
        };
        with_port
            .to_socket_addrs()
            .map_err(|e| NetError::InvalidAddress(format!("{}: {}", s, e)))?
            .next()
            .map(ListenAddress::Tcp)
            .ok_or_else(|| NetError::InvalidAddress(format!("{}: no address resolved", s)))
    }
}

#[cfg(unix)]
fn unix_address(path: &str) -> NetResult<ListenAddress> {
    Ok(ListenAddress::Unix(path.into()))
}

#[cfg(not(unix))]
fn unix_address(path: &str) -> NetResult<ListenAddress> {
    Err(NetError::InvalidAddress(format!("unix sockets are not supported on this platform: {}", path)))
}

impl fmt::Display for ListenAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddress::Tcp(addr) => write!(f, "tcp://{}", addr),
            #[cfg(unix)]
            ListenAddress::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Addresses to listen on
    pub listen: Vec<ListenAddress>,
    /// Largest request payload accepted
    pub max_frame_size: u64,
    /// How long an accept waits before re-checking for shutdown
    pub accept_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: vec![ListenAddress::Tcp(SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))],
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            accept_timeout: Duration::from_secs(1),
        }
    }
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener, std::path::PathBuf),
}

impl Listener {
    fn socket_path(&self) -> Option<&std::path::Path> {
        match self {
            Listener::Tcp(_) => None,
            #[cfg(unix)]
            Listener::Unix(_, path) => Some(path),
        }
    }
}

/// A server with every listener bound, ready to [`run`](Server::run).
pub struct Server {
    storage: Arc<Storage>,
    listeners: Vec<Listener>,
    local: Vec<ListenAddress>,
    config: ServerConfig,
    cancel: CancellationToken,
}

impl Server {
    /// Bind every configured address.
    pub async fn bind(storage: Arc<Storage>, config: ServerConfig, cancel: CancellationToken) -> NetResult<Self> {
        let mut listeners = Vec::with_capacity(config.listen.len());
        let mut local = Vec::with_capacity(config.listen.len());
        for address in &config.listen {
            match address {
                ListenAddress::Tcp(addr) => {
                    let listener = TcpListener::bind(addr).await?;
                    let bound = listener.local_addr()?;
                    info!(address = %bound, "listening on tcp");
                    local.push(ListenAddress::Tcp(bound));
                    listeners.push(Listener::Tcp(listener));
                }
                #[cfg(unix)]
                ListenAddress::Unix(path) => {
                    if path.exists() {
                        debug!(path = %path.display(), "removing stale socket");
                        std::fs::remove_file(path)?;
                    }
                    let listener = tokio::net::UnixListener::bind(path)?;
                    info!(path = %path.display(), "listening on unix socket");
                    local.push(address.clone());
                    listeners.push(Listener::Unix(listener, path.clone()));
                }
            }
        }
        Ok(Self { storage, listeners, local, config, cancel })
    }

    /// Bound addresses, with any port 0 resolved.
    pub fn local_addresses(&self) -> &[ListenAddress] {
        &self.local
    }

    /// Serve until the cancellation token fires and every connection has ended.
    pub async fn run(self) {
        let tracker = TaskTracker::new();
        for listener in self.listeners {
            tracker.spawn(accept_loop(
                listener,
                Arc::clone(&self.storage),
                self.config.clone(),
                self.cancel.clone(),
                tracker.clone(),
            ));
        }
        tracker.close();
        tracker.wait().await;
        info!("server stopped");
    }
}

async fn accept_loop(
    listener: Listener,
    storage: Arc<Storage>,
    config: ServerConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = tokio::time::timeout(config.accept_timeout, accept(&listener)) => accepted,
        };
        match accepted {
            Err(_elapsed) => continue,
            Ok(Err(e)) => warn!(error = %e, "accept failed"),
            Ok(Ok(Accepted::Tcp(stream, peer))) => {
                let _ = stream.set_nodelay(true);
                tracker.spawn(serve_connection(
                    stream,
                    peer.to_string(),
                    Arc::clone(&storage),
                    config.max_frame_size,
                    cancel.clone(),
                ));
            }
            #[cfg(unix)]
            Ok(Ok(Accepted::Unix(stream))) => {
                tracker.spawn(serve_connection(
                    stream,
                    "unix".to_string(),
                    Arc::clone(&storage),
                    config.max_frame_size,
                    cancel.clone(),
                ));
            }
        }
    }

    if let Some(path) = listener.socket_path() {
        let _ = std::fs::remove_file(path);
    }
    debug!("listener stopping");
}

enum Accepted {
    Tcp(tokio::net::TcpStream, SocketAddr),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

async fn accept(listener: &Listener) -> std::io::Result<Accepted> {
    match listener {
        Listener::Tcp(listener) => {
            let (stream, peer) = listener.accept().await?;
            Ok(Accepted::Tcp(stream, peer))
        }
        #[cfg(unix)]
        Listener::Unix(listener, _) => {
            let (stream, _) = listener.accept().await?;
            Ok(Accepted::Unix(stream))
        }
    }
}

/// Serve frames from one connection until it closes or the server stops.
pub async fn serve_connection<S>(
    stream: S,
    peer: String,
    storage: Arc<Storage>,
    max_frame_size: u64,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    info!(%peer, "connection accepted");
    // Only requests are capped; a reply to a small request may be large.
    let mut mux = Multiplexer::with_limits(stream, max_frame_size, u64::MAX);
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = mux.receive() => frame,
        };
        let response = match frame {
            Ok(Some(bytes)) => match Command::decode(&bytes) {
                Ok(command) => execute(&storage, command).await,
                Err(e) => {
                    debug!(%peer, error = %e, "bad command payload");
                    Response::failure("", e.to_string())
                }
            },
            Ok(None) => break,
            Err(e) if e.is_fatal() => {
                debug!(%peer, error = %e, "stream ended mid-frame");
                break;
            }
            Err(e) => {
                debug!(%peer, error = %e, "rejected frame");
                Response::failure("", e.to_string())
            }
        };

        let sent = match response.encode() {
            Ok(bytes) => mux.send(&bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(%peer, error = %e, "failed to send response");
            break;
        }
    }
    info!(%peer, "connection closed");
}

/// Run one command against `storage`.
pub async fn execute(storage: &Storage, command: Command) -> Response {
    let Command { kind, id, value } = command;
    let result = match kind {
        CommandType::Time => Ok(time_greeting(SystemTime::now())),
        CommandType::Get => storage.get_async(id.as_str()).await,
        CommandType::Set => storage.set_async(id.as_str(), value).await,
        CommandType::Remove => storage.remove_async(id.as_str()).await,
        CommandType::Unknown => return Response::failure(id, "unknown command"),
    };
    match result {
        Ok(value) => Response::ok(id, value),
        Err(e) => Response::failure(id, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trikv_core::Config;

    #[test]
    fn test_parse_addresses() {
        assert_eq!(
            "tcp://127.0.0.1:6000".parse::<ListenAddress>().unwrap(),
            ListenAddress::Tcp(SocketAddr::from(([127, 0, 0, 1], 6000)))
        );
        assert_eq!(
            "127.0.0.1".parse::<ListenAddress>().unwrap(),
            ListenAddress::Tcp(SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
        );
        #[cfg(unix)]
        assert_eq!(
            "unix:///tmp/trikv.sock".parse::<ListenAddress>().unwrap(),
            ListenAddress::Unix("/tmp/trikv.sock".into())
        );
        assert!("tcp://".parse::<ListenAddress>().is_err());
    }

    #[test]
    fn test_address_display() {
        let addr = ListenAddress::Tcp(SocketAddr::from(([0, 0, 0, 0], 5555)));
        assert_eq!(addr.to_string(), "tcp://0.0.0.0:5555");
    }

    #[tokio::test]
    async fn test_execute_commands() {
        let storage = Storage::open(Config::in_memory()).unwrap();

        let response = execute(&storage, Command::set("foo", "bar")).await;
        assert_eq!(response, Response::ok("foo", "bar"));
        assert_eq!(execute(&storage, Command::get("foo")).await.value, "bar");
        assert_eq!(execute(&storage, Command::remove("foo")).await.value, "bar");
        assert_eq!(execute(&storage, Command::remove("foo")).await, Response::ok("foo", ""));

        let time = execute(&storage, Command::time()).await;
        assert!(time.is_ok());
        assert!(time.value.starts_with("Hello! The time is currently "));

        let unknown = execute(&storage, Command::default()).await;
        assert_eq!(unknown.error, "unknown command");
    }

    #[tokio::test]
    async fn test_closed_storage_reported_in_response() {
        let storage = Storage::open(Config::in_memory()).unwrap();
        storage.shutdown();
        let response = execute(&storage, Command::get("foo")).await;
        assert_eq!(response.error, "storage instance is closed");
    }

    #[tokio::test]
    async fn test_oversized_set_reported_in_response() {
        let storage = Storage::open(Config { max_value_size: 4, ..Config::in_memory() }).unwrap();
        let response = execute(&storage, Command::set("k", "too long")).await;
        assert!(!response.is_ok());
        assert!(response.error.contains("too large"));
        assert_eq!(execute(&storage, Command::get("k")).await, Response::ok("k", ""));
    }
}
