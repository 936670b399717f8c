//! Client for the trikv wire protocol

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{NetError, NetResult};
use crate::mux::{Multiplexer, DEFAULT_MAX_FRAME_SIZE, PREFIX_LEN};
use crate::protocol::{Command, Response};
use crate::server::ListenAddress;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Largest response payload accepted
    pub max_frame_size: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { max_frame_size: DEFAULT_MAX_FRAME_SIZE }
    }
}

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// One connection to a trikv server. Requests are sent one at a time.
pub struct Client {
    config: ClientConfig,
    connection: Option<Multiplexer<Box<dyn Stream>>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self { config, connection: None }
    }

    /// Connect, replacing any existing connection.
    pub async fn connect(&mut self, address: &ListenAddress) -> NetResult<()> {
        let stream: Box<dyn Stream> = match address {
            ListenAddress::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                Box::new(stream)
            }
            #[cfg(unix)]
            ListenAddress::Unix(path) => Box::new(tokio::net::UnixStream::connect(path).await?),
        };
        debug!(%address, "connected");
        self.connection = Some(Multiplexer::with_max_frame_size(stream, self.config.max_frame_size));
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Send `command` and wait for its response.
    ///
    /// The connection is dropped after any error that leaves the stream unusable.
    pub async fn command(&mut self, command: Command) -> NetResult<Response> {
        let payload = command.encode()?;
        let mux = self.connection.as_mut().ok_or(NetError::NotConnected)?;
        let result = exchange(mux, &payload).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                debug!(error = %e, "dropping connection");
                self.connection = None;
            }
        }
        result
    }

    /// The server's greeting with its current time.
    pub async fn time(&mut self) -> NetResult<String> {
        self.command(Command::time()).await?.into_result()
    }

    /// Value for `key`, or `""` if absent.
    pub async fn get(&mut self, key: impl Into<String>) -> NetResult<String> {
        self.command(Command::get(key)).await?.into_result()
    }

    /// Store `value` under `key`. Returns the value written.
    pub async fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> NetResult<String> {
        self.command(Command::set(key, value)).await?.into_result()
    }

    /// Delete `key`. Returns the removed value, or `""` if absent.
    pub async fn remove(&mut self, key: impl Into<String>) -> NetResult<String> {
        self.command(Command::remove(key)).await?.into_result()
    }

    /// Drop the connection. Later calls fail with [`NetError::NotConnected`].
    pub fn close(&mut self) {
        self.connection = None;
    }
}

async fn exchange<S>(mux: &mut Multiplexer<S>, payload: &[u8]) -> NetResult<Response>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    mux.send(payload).await?;
    match mux.receive().await? {
        Some(bytes) => Response::decode(&bytes),
        None => Err(NetError::UnexpectedEof { expected: PREFIX_LEN as u64, received: 0 }),
    }
}

impl Default for Client {
    fn default() -> Self { Self::new(ClientConfig::default()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_connected() {
        let mut client = Client::default();
        assert!(!client.is_connected());
        assert!(matches!(client.get("foo").await, Err(NetError::NotConnected)));
        assert!(matches!(client.time().await, Err(NetError::NotConnected)));
    }

    #[tokio::test]
    async fn test_truncated_reply_drops_connection() {
        use tokio::io::AsyncWriteExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut mux = Multiplexer::new(&mut stream);
            mux.receive().await.unwrap().unwrap();
            // Promise ten bytes, deliver three, hang up.
            stream.write_all(&10u64.to_be_bytes()).await.unwrap();
            stream.write_all(b"abc").await.unwrap();
        });

        let mut client = Client::default();
        client.connect(&ListenAddress::Tcp(addr)).await.unwrap();
        assert!(matches!(client.get("foo").await, Err(NetError::UnexpectedEof { expected: 10, received: 3 })));
        assert!(!client.is_connected());
        assert!(matches!(client.get("foo").await, Err(NetError::NotConnected)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_is_returned() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = Client::default();
        assert!(client.connect(&ListenAddress::Tcp(addr)).await.is_err());
        assert!(!client.is_connected());
    }
}
