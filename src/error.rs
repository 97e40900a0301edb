//! Errors returned by mailkit.
//!
//! Every variant belongs to an [`ErrorCategory`]. Network, timeout and
//! protocol failures are transient and retried by [`RetryPolicy`](crate::RetryPolicy);
//! configuration, state and parse failures are not. Logout failures are never
//! retried either, since logout is best-effort.

use crate::session::SessionState;
use std::time::Duration;
use thiserror::Error;

/// `Result` with [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while configuring, connecting or scanning.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────────
    /// The email address is malformed.
    #[error("malformed email address: {email}")]
    InvalidEmailFormat {
        /// The rejected address.
        email: String,
    },

    /// A required setting is missing or out of range.
    #[error("bad configuration: {message}")]
    InvalidConfig {
        /// What is wrong.
        message: String,
    },

    /// Invalid proxy parameters.
    #[error("bad proxy configuration: {message}")]
    InvalidProxy {
        /// What is wrong.
        message: String,
    },

    /// A scan was requested without any subject, sender or keyword filter.
    #[error("bad scan query: {message}")]
    InvalidQuery {
        /// What is wrong.
        message: String,
    },

    /// The email domain has no known IMAP server.
    #[error("no IMAP server known for domain '{domain}'")]
    UnsupportedDomain {
        /// Domain part of the address, lowercased.
        domain: String,
    },

    /// The IMAP host is not usable as a TLS server name.
    #[error("'{host}' is not a valid TLS server name")]
    InvalidDnsName {
        /// The rejected hostname.
        host: String,
        /// Underlying cause.
        #[source]
        source: rustls::client::InvalidDnsNameError,
    },

    /// Invalid CSS selector used to query a parsed body.
    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector {
        /// The selector that failed to parse.
        selector: String,
        /// Parser message.
        message: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Network
    // ─────────────────────────────────────────────────────────────────────────
    /// TCP connection to the server (or to the proxy) failed.
    #[error("TCP connection to {target} failed")]
    TcpConnect {
        /// `host:port` that was dialed.
        target: String,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// The proxy refused or failed to open a tunnel.
    #[error("tunnel through {proxy} to {target} failed: {message}")]
    ProxyConnect {
        /// The proxy, with credentials masked.
        proxy: String,
        /// `host:port` behind the proxy.
        target: String,
        /// What went wrong during the handshake.
        message: String,
    },

    /// The proxy rejected the supplied credentials.
    #[error("proxy {proxy} rejected credentials for tunnel to {target}")]
    ProxyAuth {
        /// The proxy, with credentials masked.
        proxy: String,
        /// `host:port` behind the proxy.
        target: String,
    },

    /// TLS handshake failed.
    #[error("TLS handshake with {target} failed")]
    TlsConnect {
        /// `host:port` of the IMAP server.
        target: String,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Timeouts
    // ─────────────────────────────────────────────────────────────────────────
    /// TCP connect, proxy handshake or TLS handshake took too long.
    #[error("connecting to {target} timed out after {timeout:?}")]
    ConnectTimeout {
        /// `host:port` of the IMAP server.
        target: String,
        /// Limit that was hit.
        timeout: Duration,
    },

    /// LOGIN took too long.
    #[error("login as {email} timed out after {timeout:?}")]
    AuthTimeout {
        /// Account being logged in.
        email: String,
        /// Limit that was hit.
        timeout: Duration,
    },

    /// SELECT took too long.
    #[error("selecting '{mailbox}' timed out after {timeout:?}")]
    SelectTimeout {
        /// Folder being selected.
        mailbox: String,
        /// Limit that was hit.
        timeout: Duration,
    },

    /// UID SEARCH took too long.
    #[error("search timed out after {timeout:?}")]
    SearchTimeout {
        /// Limit that was hit.
        timeout: Duration,
    },

    /// UID FETCH took too long.
    #[error("fetching UIDs {uid_set} timed out after {timeout:?}")]
    FetchTimeout {
        /// UIDs being fetched.
        uid_set: String,
        /// Limit that was hit.
        timeout: Duration,
    },

    /// LOGOUT took too long.
    #[error("logout timed out after {timeout:?}")]
    LogoutTimeout {
        /// Limit that was hit.
        timeout: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // IMAP protocol
    // ─────────────────────────────────────────────────────────────────────────
    /// The server rejected LOGIN.
    #[error("login rejected for {email}")]
    ImapLogin {
        /// Account being logged in.
        email: String,
        /// Underlying cause.
        #[source]
        source: async_imap::error::Error,
    },

    /// SELECT failed with something other than `NO`.
    #[error("selecting '{mailbox}' failed")]
    SelectMailbox {
        /// Folder being selected.
        mailbox: String,
        /// Underlying cause.
        #[source]
        source: async_imap::error::Error,
    },

    /// UID SEARCH failed.
    #[error("search '{query}' failed")]
    ImapSearch {
        /// Search keys sent to the server.
        query: String,
        /// Underlying cause.
        #[source]
        source: async_imap::error::Error,
    },

    /// UID FETCH failed.
    #[error("fetching UIDs {uid_set} failed")]
    ImapFetch {
        /// UIDs being fetched.
        uid_set: String,
        /// Underlying cause.
        #[source]
        source: async_imap::error::Error,
    },

    /// LOGOUT failed.
    #[error("logout failed")]
    ImapLogout {
        /// Underlying cause.
        #[source]
        source: async_imap::error::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Session state
    // ─────────────────────────────────────────────────────────────────────────
    /// The client never reached an authenticated state.
    #[error("not authenticated as {email}")]
    NotAuthenticated {
        /// Account of the client.
        email: String,
    },

    /// A command was issued in a state that does not allow it.
    #[error("{operation} requires {expected} state, session is {actual}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// The state the operation needs.
        expected: SessionState,
        /// The state the session was in.
        actual: SessionState,
    },

    /// The session was logged out and cannot be reused.
    #[error("session is closed")]
    SessionClosed,

    /// The server refused to open a mailbox that must exist.
    #[error("mailbox '{mailbox}' is unavailable")]
    MailboxUnavailable {
        /// The mailbox name.
        mailbox: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Message content
    // ─────────────────────────────────────────────────────────────────────────
    /// A fetched message is not valid MIME.
    #[error("message UID {uid} could not be parsed")]
    ParseEmail {
        /// UID of the message.
        uid: u32,
        /// Underlying cause.
        #[source]
        source: mailparse::MailParseError,
    },
}

impl Error {
    /// Whether the failure is transient and the operation worth repeating.
    ///
    /// This is the default predicate of [`RetryPolicy`](crate::RetryPolicy).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::LogoutTimeout { .. } | Error::ImapLogout { .. } => false,
            _ => matches!(
                self.category(),
                ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Protocol
            ),
        }
    }

    /// Whether this is misconfiguration that should halt the caller immediately.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// Coarse classification, used for logging.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidEmailFormat { .. }
            | Error::InvalidConfig { .. }
            | Error::InvalidProxy { .. }
            | Error::InvalidQuery { .. }
            | Error::UnsupportedDomain { .. }
            | Error::InvalidDnsName { .. }
            | Error::InvalidSelector { .. } => ErrorCategory::Configuration,

            Error::TcpConnect { .. }
            | Error::ProxyConnect { .. }
            | Error::ProxyAuth { .. }
            | Error::TlsConnect { .. } => ErrorCategory::Network,

            Error::ConnectTimeout { .. }
            | Error::AuthTimeout { .. }
            | Error::SelectTimeout { .. }
            | Error::SearchTimeout { .. }
            | Error::FetchTimeout { .. }
            | Error::LogoutTimeout { .. } => ErrorCategory::Timeout,

            Error::ImapLogin { .. }
            | Error::SelectMailbox { .. }
            | Error::ImapSearch { .. }
            | Error::ImapFetch { .. }
            | Error::ImapLogout { .. } => ErrorCategory::Protocol,

            Error::NotAuthenticated { .. }
            | Error::InvalidState { .. }
            | Error::SessionClosed
            | Error::MailboxUnavailable { .. } => ErrorCategory::State,

            Error::ParseEmail { .. } => ErrorCategory::Parse,
        }
    }
}

/// Kind of failure, see [`Error::category`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad input; fix the configuration or the query.
    Configuration,
    /// TCP, proxy or TLS failure.
    Network,
    /// An exchange exceeded its time limit.
    Timeout,
    /// The IMAP server answered with an error.
    Protocol,
    /// Operation not allowed in the current session state.
    State,
    /// Malformed message content.
    Parse,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::State => "state",
            ErrorCategory::Parse => "parse",
        };
        f.write_str(name)
    }
}
