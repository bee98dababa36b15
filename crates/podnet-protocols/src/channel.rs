//! Peer messaging channel.
//!
//! Newline-delimited JSON over TCP. Each outbound request opens a fresh
//! connection, writes one frame and waits for one response frame. The whole
//! exchange is bounded by the configured timeout; a silent peer yields
//! [`Error::ConnectionTimeout`] instead of blocking the caller.
//!
//! Inbound connections are served by [`serve`], which reads frames until the
//! peer hangs up and answers each with whatever the [`MessageHandler`]
//! returns. Broadcast frames are handled but never answered.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::message::{Message, MessageCategory};

/// Largest frame accepted from a peer.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Default bound on a request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Answers inbound messages.
pub trait MessageHandler: Send + Sync + 'static {
    /// Produce the response frame for `message` received from `from`.
    fn handle(&self, from: SocketAddr, message: Message) -> impl Future<Output = Message> + Send;
}

/// Outbound side of the channel.
#[derive(Debug)]
pub struct PeerChannel {
    request_timeout: Duration,
    connections_opened: AtomicU64,
}

impl Default for PeerChannel {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl PeerChannel {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            connections_opened: AtomicU64::new(0),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Number of outbound connections attempted so far.
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Send `message` to `location` and wait for the correlated response.
    pub async fn request(&self, location: SocketAddr, message: &Message) -> Result<Message> {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        debug!(%location, kind = message.kind(), "Sending request");

        let timeout = self.request_timeout;
        match tokio::time::timeout(timeout, exchange(location, message)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%location, kind = message.kind(), ?timeout, "Request timed out");
                Err(Error::ConnectionTimeout { location, timeout })
            }
        }
    }

    /// Deliver `message` to `location` without waiting for a response.
    pub async fn notify(&self, location: SocketAddr, message: &Message) -> Result<()> {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);

        let timeout = self.request_timeout;
        let send = async {
            let mut stream = TcpStream::connect(location).await?;
            write_frame(&mut stream, message).await?;
            stream.shutdown().await?;
            Ok::<_, Error>(())
        };
        match tokio::time::timeout(timeout, send).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionTimeout { location, timeout }),
        }
    }

    /// Deliver `message` to every location concurrently. Returns how many
    /// deliveries succeeded.
    pub async fn broadcast<I>(&self, locations: I, message: &Message) -> usize
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        let sends = locations.into_iter().map(|location| async move {
            let outcome = self.notify(location, message).await;
            if let Err(e) = &outcome {
                debug!(%location, kind = message.kind(), "Broadcast delivery failed: {}", e);
            }
            outcome.is_ok()
        });
        join_all(sends).await.into_iter().filter(|ok| *ok).count()
    }
}

async fn exchange(location: SocketAddr, message: &Message) -> Result<Message> {
    let stream = TcpStream::connect(location).await?;
    let (read_half, mut write_half) = stream.into_split();
    write_frame(&mut write_half, message).await?;

    let mut reader = BufReader::new(read_half);
    read_frame(&mut reader)
        .await?
        .ok_or(Error::ConnectionClosed(location))
}

/// Write one message as a JSON line.
pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next message. `Ok(None)` on clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = String::new();
        let n = (&mut *reader)
            .take(MAX_FRAME_BYTES as u64 + 1)
            .read_line(&mut line)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if n > MAX_FRAME_BYTES {
            return Err(Error::FrameTooLarge(n));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return Ok(Some(serde_json::from_str(trimmed)?));
    }
}

/// Accept connections forever, answering each frame through `handler`.
pub async fn serve<H: MessageHandler>(listener: TcpListener, handler: Arc<H>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "Incoming peer connection");
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, addr, handler).await {
                        debug!(%addr, "Connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Accept error: {}", e);
            }
        }
    }
}

async fn serve_connection<H: MessageHandler>(
    stream: TcpStream,
    addr: SocketAddr,
    handler: Arc<H>,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let response = match read_frame(&mut reader).await {
            Ok(Some(message)) => {
                let category = message.category();
                let response = handler.handle(addr, message).await;
                if category == MessageCategory::Broadcast {
                    continue;
                }
                response
            }
            Ok(None) => return Ok(()),
            Err(Error::Serialization(e)) => {
                warn!(%addr, "Malformed frame: {}", e);
                Message::error(format!("malformed message: {}", e))
            }
            Err(e) => return Err(e),
        };
        write_frame(&mut write_half, &response).await?;
    }
}
