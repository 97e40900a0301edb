//! Configuration for a mailbox client.
//!
//! Use [`MailboxConfigBuilder`] to create a configuration with sensible defaults:
//!
//! ```
//! use mailkit::{MailboxConfig, ProxyConfig, ProxyKind};
//!
//! let config = MailboxConfig::builder()
//!     .email("user@gmail.com")
//!     .password("app-password")
//!     .proxy(
//!         ProxyConfig::builder()
//!             .kind(ProxyKind::Socks5)
//!             .address("127.0.0.1")
//!             .port(1080)
//!             .build()
//!             .expect("valid proxy"),
//!     )
//!     .build()
//!     .expect("valid config");
//!
//! assert_eq!(config.resolve_imap_host().unwrap(), "imap.gmail.com");
//! ```

use crate::error::{Error, Result};
use crate::known_servers::{email_domain, ServerRegistry};
use crate::proxy::ProxyConfig;
use crate::retry::RetryPolicy;
use email_address::EmailAddress;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// Default IMAPS port.
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// Default timeout for direct (unproxied) connections and IMAP exchanges.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Folders visited by a scan, in order.
///
/// Providers name their folders differently; names a server does not know
/// are skipped during the scan.
pub const DEFAULT_FOLDERS: &[&str] = &[
    "INBOX", "SENT", "DRAFTS", "JUNK", "TRASH", "ARCHIVE", "Trash", "DraftBox", "Spam", "Sentbox",
    "Archive", "Deleted", "Drafts", "Inbox", "Junk", "Notes", "Outbox", "Sent",
];

/// Configuration for a [`MailboxClient`](crate::MailboxClient).
///
/// Create using [`MailboxConfig::builder()`].
///
/// The password is stored as a [`SecretString`] and redacted from `Debug`.
#[derive(Clone)]
pub struct MailboxConfig {
    email: EmailAddress,
    password: SecretString,
    imap_host: Option<String>,
    imap_port: u16,
    proxy: Option<ProxyConfig>,
    timeout: Duration,
    retry_policy: RetryPolicy,
    mark_seen: bool,
    folders: Vec<String>,
    accept_invalid_certs: bool,
    server_registry: ServerRegistry,
}

impl std::fmt::Debug for MailboxConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxConfig")
            .field("email", &self.email.as_str())
            .field("password", &"[REDACTED]")
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .field("proxy", &self.proxy.as_ref().map(ToString::to_string))
            .field("timeout", &self.timeout)
            .field("retry_policy", &self.retry_policy)
            .field("mark_seen", &self.mark_seen)
            .field("folders", &self.folders.len())
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish_non_exhaustive()
    }
}

impl MailboxConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> MailboxConfigBuilder {
        MailboxConfigBuilder::default()
    }

    /// Returns the email address as a string slice.
    #[must_use]
    pub fn email(&self) -> &str {
        self.email.as_str()
    }

    /// Returns the password.
    ///
    /// Only meant to be passed to `LOGIN`; never log it.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// IMAP server port.
    #[must_use]
    pub fn imap_port(&self) -> u16 {
        self.imap_port
    }

    /// Proxy the connection is tunneled through, if any.
    #[must_use]
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref()
    }

    /// Timeout for direct connections.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Timeout actually applied: the proxy's when a proxy is configured,
    /// otherwise the direct one.
    #[must_use]
    pub fn effective_timeout(&self) -> Duration {
        self.proxy
            .as_ref()
            .map_or(self.timeout, ProxyConfig::timeout)
    }

    /// Retry policy for every network operation.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Whether fetched messages are flagged `\Seen`.
    #[must_use]
    pub fn mark_seen(&self) -> bool {
        self.mark_seen
    }

    /// Folders visited by a scan, in order.
    #[must_use]
    pub fn folders(&self) -> &[String] {
        &self.folders
    }

    /// Whether TLS certificate verification is disabled.
    #[must_use]
    pub fn accepts_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }

    /// Resolves the IMAP host: the explicit host if set, otherwise the
    /// registry entry for the email domain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedDomain`] if the domain is not in the registry.
    pub fn resolve_imap_host(&self) -> Result<String> {
        if let Some(host) = &self.imap_host {
            return Ok(host.clone());
        }
        self.server_registry
            .resolve(self.email.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::UnsupportedDomain {
                domain: self.email.domain().to_lowercase(),
            })
    }
}

/// Validates an email address: exactly one '@' and a valid address format.
fn validate_email(email: &str) -> Result<EmailAddress> {
    let invalid = || Error::InvalidEmailFormat {
        email: email.to_string(),
    };
    if email_domain(email).is_none() {
        return Err(invalid());
    }
    EmailAddress::parse_with_options(email, email_address::Options::default())
        .map_err(|_| invalid())
}

/// Builder for [`MailboxConfig`].
#[derive(Debug, Default)]
pub struct MailboxConfigBuilder {
    email: Option<String>,
    password: Option<String>,
    imap_host: Option<String>,
    imap_port: Option<u16>,
    proxy: Option<ProxyConfig>,
    timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
    mark_seen: Option<bool>,
    folders: Option<Vec<String>>,
    accept_invalid_certs: bool,
    server_registry: Option<ServerRegistry>,
}

impl MailboxConfigBuilder {
    /// Sets the email address (required).
    ///
    /// Its domain selects the IMAP server unless [`imap_host`](Self::imap_host)
    /// is set.
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the password (required).
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the IMAP server hostname explicitly.
    #[must_use]
    pub fn imap_host(mut self, host: impl Into<String>) -> Self {
        self.imap_host = Some(host.into());
        self
    }

    /// Sets the IMAP server port (default 993).
    #[must_use]
    pub fn imap_port(mut self, port: u16) -> Self {
        self.imap_port = Some(port);
        self
    }

    /// Tunnels the connection through a proxy.
    #[must_use]
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Sets the direct-connection timeout (default 10 seconds).
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry policy (default: 3 attempts, 3 seconds apart).
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Whether fetched messages are flagged `\Seen` (default `true`).
    #[must_use]
    pub fn mark_seen(mut self, mark_seen: bool) -> Self {
        self.mark_seen = Some(mark_seen);
        self
    }

    /// Replaces the scanned folder list.
    #[must_use]
    pub fn folders<I, S>(mut self, folders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.folders = Some(folders.into_iter().map(Into::into).collect());
        self
    }

    /// Disables TLS certificate verification.
    #[must_use]
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Sets a custom server registry for IMAP host resolution.
    ///
    /// # Example
    ///
    /// ```
    /// use mailkit::{MailboxConfig, ServerRegistry};
    ///
    /// let mut registry = ServerRegistry::with_defaults();
    /// registry.register("mycompany.com", "mail.internal.mycompany.com");
    ///
    /// let config = MailboxConfig::builder()
    ///     .email("user@mycompany.com")
    ///     .password("secret")
    ///     .server_registry(registry)
    ///     .build()
    ///     .expect("valid config");
    ///
    /// assert_eq!(config.resolve_imap_host().unwrap(), "mail.internal.mycompany.com");
    /// ```
    #[must_use]
    pub fn server_registry(mut self, registry: ServerRegistry) -> Self {
        self.server_registry = Some(registry);
        self
    }

    /// Builds the configuration.
    ///
    /// Host resolution is deferred to [`MailboxConfig::resolve_imap_host`], so
    /// an unsupported domain is reported when connecting.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] for missing fields, a zero port or timeout, or
    /// an empty folder list; [`Error::InvalidEmailFormat`] for a malformed
    /// address.
    pub fn build(self) -> Result<MailboxConfig> {
        let email_raw = self.email.ok_or_else(|| Error::InvalidConfig {
            message: "email is required".into(),
        })?;
        let email = validate_email(email_raw.trim())?;

        let password_raw = self.password.ok_or_else(|| Error::InvalidConfig {
            message: "password is required".into(),
        })?;

        let imap_port = self.imap_port.unwrap_or(DEFAULT_IMAP_PORT);
        if imap_port == 0 {
            return Err(Error::InvalidConfig {
                message: "IMAP port must be between 1 and 65535".into(),
            });
        }

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(Error::InvalidConfig {
                message: "timeout must be positive".into(),
            });
        }

        let folders = self
            .folders
            .unwrap_or_else(|| DEFAULT_FOLDERS.iter().map(|f| (*f).to_string()).collect());
        if folders.is_empty() {
            return Err(Error::InvalidConfig {
                message: "at least one folder is required".into(),
            });
        }

        Ok(MailboxConfig {
            email,
            password: SecretString::from(password_raw),
            imap_host: self.imap_host,
            imap_port,
            proxy: self.proxy,
            timeout,
            retry_policy: self.retry_policy.unwrap_or_default(),
            mark_seen: self.mark_seen.unwrap_or(true),
            folders,
            accept_invalid_certs: self.accept_invalid_certs,
            server_registry: self.server_registry.unwrap_or_default(),
        })
    }
}
