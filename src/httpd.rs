//! ==============================================================================
//! httpd.rs - minimal HTTP/1.0 responder serving the store as json
//! ==============================================================================
//!
//! purpose:
//!     answers `GET /` with the current snapshot and closes the connection.
//!     everything else is closed without a single byte written back.
//!
//! relationships:
//!     - reads: store.rs (snapshot per request)
//!     - built by: node.rs from the `httpd` config section
//!     - driven by: runtime.rs (accept loop is a supervised task)
//!
//! wire format:
//!
//! ```text
//!     HTTP/1.0 200 OK\r\n
//!     Content-Type: application/json\r\n
//!     \r\n
//!     {"inside":{"rel":40.0,"temp":22.0},"outside":{"temp":3.5}}
//!
//!     no content-length, no keep-alive: end of body is end of connection.
//!     the route comes from the request line alone. header lines that follow
//!     get a short grace period and are discarded unread.
//! ```
//!
//! ==============================================================================

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::runtime::Task;
use crate::store::SharedStateStore;

/// longest request or header line we are willing to buffer
const MAX_LINE: u64 = 1024;
/// header lines drained before answering
const MAX_HEADERS: usize = 64;
/// how long a client gets to finish its headers once the request line is in
const HEADER_GRACE: Duration = Duration::from_millis(50);
const ACCEPT_RETRY: Duration = Duration::from_millis(200);

const RESPONSE_HEAD: &[u8] = b"HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n";

pub struct HttpResponder {
    listener: TcpListener,
    store: SharedStateStore,
    request_timeout: Option<Duration>,
}

impl HttpResponder {
    /// Binds and starts listening right away, so a taken port fails startup
    /// rather than the first task run. Must be called inside a tokio runtime.
    pub fn bind(
        addr: SocketAddr,
        backlog: u32,
        store: SharedStateStore,
        request_timeout: Option<Duration>,
    ) -> io::Result<Self> {
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(backlog)?;
        Ok(Self {
            listener,
            store,
            request_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Task for HttpResponder {
    fn name(&self) -> &str {
        "httpd"
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "http responder listening");
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let store = self.store.clone();
                    let timeout = self.request_timeout;
                    tokio::task::spawn_local(async move {
                        if let Err(e) = handle_connection(stream, store, timeout).await {
                            debug!(%peer, error = %e, "connection dropped");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_RETRY).await;
                }
            }
        }
    }
}

/// Serves one connection, bounded by `timeout` when given. The stream is
/// closed on return in every case.
pub async fn handle_connection(
    stream: TcpStream,
    store: SharedStateStore,
    timeout: Option<Duration>,
) -> Result<(), ConnectionError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, serve(stream, store))
            .await
            .map_err(|_| ConnectionError::Timeout)?,
        None => serve(stream, store).await,
    }
}

async fn serve(mut stream: TcpStream, store: SharedStateStore) -> Result<(), ConnectionError> {
    let (read_half, mut write_half) = stream.split();
    let mut reader = BufReader::new(read_half);

    let Some(request_line) = read_line(&mut reader).await? else {
        return Ok(());
    };
    // the route is decided by the request line alone; headers are drained
    // only so the close does not reset a client still sending them
    let route = parse_request_line(&request_line);
    let _ = tokio::time::timeout(HEADER_GRACE, drain_headers(&mut reader)).await;

    match route {
        Some(("GET", "/")) => {
            let body = store.snapshot().to_json()?;
            write_half.write_all(RESPONSE_HEAD).await?;
            write_half.write_all(body.as_bytes()).await?;
            write_half.shutdown().await?;
            debug!(bytes = body.len(), "served snapshot");
        }
        other => debug!(request = ?other, "no route, closing"),
    }
    Ok(())
}

/// Reads header lines up to the blank line, at most [`MAX_HEADERS`] of them.
async fn drain_headers<R>(reader: &mut R) -> io::Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    for _ in 0..MAX_HEADERS {
        match read_line(reader).await? {
            Some(line) if !line.trim_end().is_empty() => continue,
            _ => break,
        }
    }
    Ok(())
}

/// One `\n`-terminated line. `None` on end of stream or when the line does
/// not fit in [`MAX_LINE`] bytes.
async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.take(MAX_LINE).read_line(&mut line).await?;
    if n == 0 || !line.ends_with('\n') {
        return Ok(None);
    }
    Ok(Some(line))
}

/// Splits `METHOD SP PATH [SP VERSION]` into method and path.
pub fn parse_request_line(line: &str) -> Option<(&str, &str)> {
    let mut parts = line.trim_end_matches(&['\r', '\n'][..]).split(' ');
    let method = parts.next().filter(|m| !m.is_empty())?;
    let path = parts.next().filter(|p| !p.is_empty())?;
    Some((method, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_with_version() {
        assert_eq!(parse_request_line("GET / HTTP/1.1\r\n"), Some(("GET", "/")));
    }

    #[test]
    fn request_line_without_version() {
        assert_eq!(parse_request_line("GET /\n"), Some(("GET", "/")));
    }

    #[test]
    fn query_strings_are_part_of_the_path() {
        assert_eq!(parse_request_line("GET /?x=1 HTTP/1.0\r\n"), Some(("GET", "/?x=1")));
    }

    #[test]
    fn garbage_has_no_route() {
        assert_eq!(parse_request_line("\r\n"), None);
        assert_eq!(parse_request_line("GET\r\n"), None);
    }

    #[tokio::test]
    async fn header_drain_stops_at_the_blank_line() {
        let mut reader = &b"Host: x\r\nAccept: */*\r\n\r\nleftover"[..];
        drain_headers(&mut reader).await.unwrap();
        assert_eq!(reader, b"leftover");
    }

    #[tokio::test]
    async fn overlong_request_line_is_rejected() {
        let long = vec![b'a'; MAX_LINE as usize + 10];
        let mut reader = &long[..];
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }
}
