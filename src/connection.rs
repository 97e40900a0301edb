//! Raw TCP sockets to IMAP servers, direct or tunneled through a proxy.
//!
//! Supports HTTP `CONNECT` and SOCKS5 tunnels. The returned stream is a plain
//! TCP stream positioned at the start of the tunneled byte stream, ready for
//! the TLS handshake.

use crate::error::{Error, Result};
use crate::proxy::{ProxyAuth, ProxyConfig, ProxyKind};
use crate::retry::RetryPolicy;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, instrument};

/// Default timeout for direct connections, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Upper bound on the size of an HTTP proxy response head.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

static STATUS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^HTTP/1\.[01] (\d{3})").expect("valid regex"));

/// Produces TCP streams to `host:port`, through the configured proxy if any.
///
/// Every network step (TCP connect, proxy handshake) is bounded by
/// [`timeout`](Self::timeout), and a whole connect attempt is retried
/// according to the factory's [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct ProxySocketFactory {
    proxy: Option<ProxyConfig>,
    direct_timeout: Duration,
    retry: RetryPolicy,
}

impl ProxySocketFactory {
    /// Creates a factory.
    ///
    /// `direct_timeout` applies when no proxy is configured; otherwise the
    /// proxy's own timeout is used.
    #[must_use]
    pub fn new(proxy: Option<ProxyConfig>, direct_timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            proxy,
            direct_timeout,
            retry,
        }
    }

    /// The configured proxy, if any.
    #[must_use]
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    /// Timeout bounding each network step.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.proxy
            .as_ref()
            .map_or(self.direct_timeout, ProxyConfig::timeout)
    }

    /// Opens a TCP stream to `host:port`.
    ///
    /// # Errors
    ///
    /// Returns the last connectivity error ([`Error::TcpConnect`],
    /// [`Error::ProxyConnect`], [`Error::ProxyAuth`] or
    /// [`Error::ConnectTimeout`]) once the retry policy is exhausted.
    #[instrument(
        name = "connection::connect",
        skip_all,
        fields(
            host = %host,
            port = port,
            proxy_enabled = self.proxy.is_some()
        )
    )]
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        self.retry
            .run("socket connect", || self.connect_once(host, port))
            .await
    }

    async fn connect_once(&self, host: &str, port: u16) -> Result<TcpStream> {
        let target = format!("{host}:{port}");
        match &self.proxy {
            None => connect_direct(&target, self.direct_timeout).await,
            Some(proxy) => match proxy.kind() {
                ProxyKind::Http => connect_via_http(&target, proxy).await,
                ProxyKind::Socks5 => connect_via_socks5(&target, proxy).await,
            },
        }
    }
}

/// Awaits `fut`, failing with [`Error::ConnectTimeout`] after `timeout`.
async fn within<T>(target: &str, timeout: Duration, fut: impl Future<Output = T>) -> Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::ConnectTimeout {
            target: target.to_string(),
            timeout,
        })
}

/// Direct TCP connection.
#[instrument(name = "connection::direct", skip_all)]
async fn connect_direct(target: &str, timeout: Duration) -> Result<TcpStream> {
    debug!(target = %target, "Establishing direct TCP connection");

    within(target, timeout, TcpStream::connect(target))
        .await?
        .map_err(|source| Error::TcpConnect {
            target: target.to_string(),
            source,
        })
}

/// TCP connection tunneled with HTTP `CONNECT`.
#[instrument(
    name = "connection::http_connect",
    skip_all,
    fields(
        proxy_host = %proxy.host(),
        has_auth = proxy.requires_auth()
    )
)]
async fn connect_via_http(target: &str, proxy: &ProxyConfig) -> Result<TcpStream> {
    debug!(proxy = %proxy, target = %target, "Connecting via HTTP proxy");

    let timeout = proxy.timeout();
    let mut stream = within(target, timeout, TcpStream::connect((proxy.host(), proxy.port())))
        .await?
        .map_err(|source| Error::TcpConnect {
            target: proxy.address(),
            source,
        })?;

    let handshake_error = |message: String| Error::ProxyConnect {
        proxy: proxy.to_string(),
        target: target.to_string(),
        message,
    };

    let request = connect_request(target, proxy.auth());
    within(target, timeout, stream.write_all(request.as_bytes()))
        .await?
        .map_err(|e| handshake_error(format!("failed to send CONNECT: {e}")))?;

    let head = within(target, timeout, read_response_head(&mut stream))
        .await?
        .map_err(|e| handshake_error(format!("failed to read proxy response: {e}")))?;

    match parse_status(&head) {
        Some(status) if (200..300).contains(&status) => {
            debug!(status, "HTTP tunnel established");
            Ok(stream)
        }
        Some(407) => Err(Error::ProxyAuth {
            proxy: proxy.to_string(),
            target: target.to_string(),
        }),
        Some(status) => Err(handshake_error(format!("proxy answered with status {status}"))),
        None => Err(handshake_error("malformed proxy response".into())),
    }
}

/// Builds the `CONNECT` request for `target`.
fn connect_request(target: &str, auth: Option<&ProxyAuth>) -> String {
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some(auth) = auth {
        let token = BASE64.encode(format!("{}:{}", auth.username(), auth.password()));
        request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }
    request.push_str("\r\n");
    request
}

/// Reads the response head byte by byte, so nothing past the blank line is
/// consumed from the tunnel.
async fn read_response_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut head = Vec::with_capacity(128);
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "response head too large",
            ));
        }
        head.push(stream.read_u8().await?);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

/// Extracts the status code from an HTTP response head.
fn parse_status(head: &str) -> Option<u16> {
    STATUS_LINE
        .captures(head)
        .and_then(|caps| caps.get(1))
        .and_then(|code| code.as_str().parse().ok())
}

/// TCP connection via SOCKS5 proxy. The target hostname is resolved by the
/// proxy.
#[instrument(
    name = "connection::socks5",
    skip_all,
    fields(
        proxy_host = %proxy.host(),
        has_auth = proxy.requires_auth()
    )
)]
async fn connect_via_socks5(target: &str, proxy: &ProxyConfig) -> Result<TcpStream> {
    debug!(proxy = %proxy, target = %target, "Connecting via SOCKS5 proxy");

    let proxy_addr = (proxy.host(), proxy.port());
    let handshake = async {
        match proxy.auth() {
            Some(auth) => {
                Socks5Stream::connect_with_password(
                    proxy_addr,
                    target,
                    auth.username(),
                    auth.password(),
                )
                .await
            }
            None => Socks5Stream::connect(proxy_addr, target).await,
        }
    };

    within(target, proxy.timeout(), handshake)
        .await?
        .map(Socks5Stream::into_inner)
        .map_err(|source| match source {
            tokio_socks::Error::PasswordAuthFailure(_)
            | tokio_socks::Error::NoAcceptableAuthMethods => Error::ProxyAuth {
                proxy: proxy.to_string(),
                target: target.to_string(),
            },
            other => Error::ProxyConnect {
                proxy: proxy.to_string(),
                target: target.to_string(),
                message: other.to_string(),
            },
        })
}
