//! TLS transport over a direct or proxy-tunneled TCP socket.
//!
//! [`Transport`] is the seam through which an [`ImapSession`](crate::ImapSession)
//! obtains its byte stream. The production implementation,
//! [`TunneledTlsTransport`], asks a [`ProxySocketFactory`] for a TCP stream and
//! performs the rustls handshake on top of it, so direct and tunneled
//! connections look the same to the session.
//!
//! [`TunneledTlsTransport::open`] does not retry on its own. Socket connects
//! are retried by the factory's policy; a failed handshake is returned as is,
//! since the tunnel it ran over is spent.

use crate::connection::ProxySocketFactory;
use crate::error::{Error, Result};
use async_trait::async_trait;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ServerName};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument, warn};
use webpki_roots::TLS_SERVER_ROOTS;

/// A TLS stream over TCP.
pub type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Byte stream an IMAP client can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

/// Boxed stream handed to the IMAP client.
pub type ImapStream = Box<dyn AsyncStream>;

/// Opens byte streams to IMAP servers.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Opens a ready-to-use stream to `host:port`. The server greeting has not
    /// been read yet.
    async fn open(&self, host: &str, port: u16) -> Result<ImapStream>;
}

/// TLS over a [`ProxySocketFactory`] stream.
#[derive(Clone)]
pub struct TunneledTlsTransport {
    sockets: ProxySocketFactory,
    connector: TlsConnector,
    verify_certificates: bool,
}

impl TunneledTlsTransport {
    /// Creates a transport that verifies server certificates against the
    /// webpki root store.
    #[must_use]
    pub fn new(sockets: ProxySocketFactory) -> Self {
        Self {
            sockets,
            connector: verifying_connector(),
            verify_certificates: true,
        }
    }

    /// Disables certificate verification.
    ///
    /// Any certificate is accepted, for any hostname. A warning is logged now
    /// and on every handshake.
    #[must_use]
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        warn!("TLS certificate verification disabled");
        self.connector = TlsConnector::from(Arc::new(
            ClientConfig::builder()
                .with_safe_defaults()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
                .with_no_client_auth(),
        ));
        self.verify_certificates = false;
        self
    }

    /// Whether server certificates are verified.
    #[must_use]
    pub fn verifies_certificates(&self) -> bool {
        self.verify_certificates
    }

    /// The underlying socket factory.
    #[must_use]
    pub fn sockets(&self) -> &ProxySocketFactory {
        &self.sockets
    }

    /// Performs the TLS handshake on `stream`, sending `hostname` as SNI and
    /// checking the certificate against it.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidDnsName`] if `hostname` is not a valid DNS name,
    /// [`Error::TlsConnect`] if the handshake fails.
    #[instrument(name = "transport::wrap", skip_all, fields(hostname = %hostname))]
    pub async fn wrap(&self, stream: TcpStream, hostname: &str) -> Result<TlsStream> {
        let server_name = parse_server_name(hostname)?;
        debug!("Performing TLS handshake");

        self.connector
            .connect(server_name, stream)
            .await
            .map_err(|source| Error::TlsConnect {
                target: hostname.to_string(),
                source,
            })
    }
}

#[async_trait]
impl Transport for TunneledTlsTransport {
    #[instrument(
        name = "transport::open",
        skip_all,
        fields(
            imap_host = %host,
            port = port,
            proxy_enabled = self.sockets.proxy().is_some()
        )
    )]
    async fn open(&self, host: &str, port: u16) -> Result<ImapStream> {
        // Fail fast on a bad hostname before touching the network.
        parse_server_name(host)?;
        let timeout = self.sockets.timeout();

        let tcp = self.sockets.connect(host, port).await?;
        let tls = tokio::time::timeout(timeout, self.wrap(tcp, host))
            .await
            .map_err(|_| Error::ConnectTimeout {
                target: format!("{host}:{port}"),
                timeout,
            })??;
        Ok(Box::new(tls) as ImapStream)
    }
}

impl fmt::Debug for TunneledTlsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunneledTlsTransport")
            .field("sockets", &self.sockets)
            .field("verify_certificates", &self.verify_certificates)
            .finish_non_exhaustive()
    }
}

/// Creates a TLS connector with the webpki root certificates.
fn verifying_connector() -> TlsConnector {
    let mut root_cert_store = rustls::RootCertStore::empty();
    root_cert_store.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let tls_config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(tls_config))
}

/// Parses server name for TLS SNI.
fn parse_server_name(host: &str) -> Result<ServerName> {
    ServerName::try_from(host).map_err(|source| Error::InvalidDnsName {
        host: host.to_string(),
        source,
    })
}

/// Verifier installed by [`TunneledTlsTransport::danger_accept_invalid_certs`].
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        warn!(server_name = ?server_name, "Accepting unverified TLS certificate");
        Ok(ServerCertVerified::assertion())
    }

    fn request_scts(&self) -> bool {
        false
    }
}
