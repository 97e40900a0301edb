//! Mailbox client: login and multi-folder scans.
//!
//! The [`MailboxClient`] is the main entry point for this crate. Connecting
//! resolves the IMAP host from the email domain and immediately performs
//! connect, login and `SELECT INBOX` as one retried unit. A failed login does
//! not fail construction: the client reports it through
//! [`is_authenticated`](MailboxClient::is_authenticated).
//!
//! # Example
//!
//! ```no_run
//! use mailkit::{MailboxClient, MailboxConfig, ScanQuery};
//! use std::time::Duration;
//!
//! # async fn example() -> mailkit::Result<()> {
//! let config = MailboxConfig::builder()
//!     .email("user@gmail.com")
//!     .password("app-password")
//!     .build()?;
//!
//! let mut client = MailboxClient::connect(config).await?;
//! if client.is_authenticated() {
//!     let query = ScanQuery::new()
//!         .subject("Invoice")
//!         .max_age(Duration::from_secs(300));
//!     if let Some(hits) = client.scan(&query).await? {
//!         for hit in &hits {
//!             println!("{}: {}", hit.folder(), hit.text());
//!         }
//!     }
//! }
//!
//! // Clean up
//! client.close().await;
//! # Ok(())
//! # }
//! ```

use crate::config::MailboxConfig;
use crate::connection::ProxySocketFactory;
use crate::error::{Error, Result};
use crate::parser::{MessageRecord, ParsedBody};
use crate::query::ScanQuery;
use crate::retry::RetryPolicy;
use crate::session::{ImapSession, SessionState};
use crate::transport::{Transport, TunneledTlsTransport};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

const INBOX: &str = "INBOX";

/// What happened to one folder during a scan.
#[derive(Debug)]
pub enum FolderOutcome {
    /// The folder was searched; `matched` messages passed every filter.
    Scanned {
        /// Number of hits in this folder.
        matched: usize,
    },
    /// The server refused to select the folder (it does not exist).
    Absent,
    /// Another spelling of a folder already scanned (`Inbox` after `INBOX`).
    Duplicate,
    /// Selecting, searching or fetching failed; the scan moved on.
    Failed(Error),
}

/// Per-folder outcomes and hits of a scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    folders: Vec<(String, FolderOutcome)>,
    hits: Vec<ParsedBody>,
}

impl ScanReport {
    /// Outcomes, in scan order.
    #[must_use]
    pub fn folders(&self) -> &[(String, FolderOutcome)] {
        &self.folders
    }

    /// Outcome for `folder`, if it was part of the scan.
    #[must_use]
    pub fn outcome(&self, folder: &str) -> Option<&FolderOutcome> {
        self.folders
            .iter()
            .find(|(name, _)| name == folder)
            .map(|(_, outcome)| outcome)
    }

    /// Folders that failed, with their error.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.folders.iter().filter_map(|(name, outcome)| match outcome {
            FolderOutcome::Failed(e) => Some((name.as_str(), e)),
            _ => None,
        })
    }

    /// Matching messages, grouped by folder in scan order.
    #[must_use]
    pub fn hits(&self) -> &[ParsedBody] {
        &self.hits
    }

    /// The hits, or `None` if nothing matched.
    #[must_use]
    pub fn into_hits(self) -> Option<Vec<ParsedBody>> {
        if self.hits.is_empty() {
            None
        } else {
            Some(self.hits)
        }
    }
}

/// Async IMAP client scanning one mailbox.
///
/// Create using [`MailboxClient::connect`].
///
/// # Lifecycle
///
/// 1. Create a client with [`connect`](Self::connect)
/// 2. Check [`is_authenticated`](Self::is_authenticated), then [`scan`](Self::scan)
/// 3. Call [`close`](Self::close) when done, or use [`scoped`](Self::scoped) /
///    [`into_guard`](Self::into_guard)
pub struct MailboxClient {
    config: MailboxConfig,
    imap_host: String,
    session: ImapSession,
    authenticated: bool,
    closed: bool,
}

impl MailboxClient {
    /// Connects over TLS (through the configured proxy, if any) and logs in.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned, such as
    /// [`Error::UnsupportedDomain`]; nothing touches the network in that case.
    /// Network and login failures are logged and leave the client
    /// unauthenticated.
    pub async fn connect(config: MailboxConfig) -> Result<Self> {
        let transport = Arc::new(tls_transport(&config));
        Self::connect_with_transport(config, transport).await
    }

    /// Like [`connect`](Self::connect), over a caller-provided transport.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    #[instrument(
        name = "MailboxClient::connect",
        skip_all,
        fields(
            email = %config.email(),
            proxy_enabled = config.proxy().is_some()
        )
    )]
    pub async fn connect_with_transport(
        config: MailboxConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let imap_host = config.resolve_imap_host()?;
        debug!(imap_host = %imap_host, "Resolved IMAP host");

        let session = ImapSession::new(transport, config.effective_timeout());
        let mut client = Self {
            config,
            imap_host,
            session,
            authenticated: false,
            closed: false,
        };

        match client.authenticate().await {
            Ok(()) => {
                info!("Logged in");
                client.authenticated = true;
            }
            Err(e) if e.is_validation() => return Err(e),
            Err(e) => {
                error!(
                    error = %e,
                    category = %e.category(),
                    "Login failed"
                );
            }
        }

        Ok(client)
    }

    /// Connects, runs `f` with the client, then closes it whatever `f` returned.
    ///
    /// # Errors
    ///
    /// Configuration errors from [`connect`](Self::connect).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mailkit::{MailboxClient, MailboxConfig, ScanQuery};
    ///
    /// # async fn example() -> mailkit::Result<()> {
    /// # let config = MailboxConfig::builder().email("a@gmail.com").password("x").build()?;
    /// let hits = MailboxClient::scoped(config, async |client| {
    ///     client.scan(&ScanQuery::new().sender("billing@shop.example")).await
    /// })
    /// .await??;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn scoped<T, F>(config: MailboxConfig, f: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut MailboxClient) -> T,
    {
        let transport = Arc::new(tls_transport(&config));
        Self::scoped_with_transport(config, transport, f).await
    }

    /// Like [`scoped`](Self::scoped), over a caller-provided transport.
    ///
    /// # Errors
    ///
    /// Configuration errors from [`connect`](Self::connect).
    pub async fn scoped_with_transport<T, F>(
        config: MailboxConfig,
        transport: Arc<dyn Transport>,
        f: F,
    ) -> Result<T>
    where
        F: AsyncFnOnce(&mut MailboxClient) -> T,
    {
        let mut client = Self::connect_with_transport(config, transport).await?;
        let output = f(&mut client).await;
        client.close().await;
        Ok(output)
    }

    /// `true` once logged in with INBOX selected, until [`close`](Self::close).
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated && !self.closed
    }

    /// Returns the email address used for this connection.
    #[must_use]
    pub fn email(&self) -> &str {
        self.config.email()
    }

    /// Returns the IMAP host used for this connection.
    #[must_use]
    pub fn imap_host(&self) -> &str {
        &self.imap_host
    }

    /// State of the underlying IMAP session.
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    /// Scans every configured folder and returns the matching messages, or
    /// `None` if nothing matched.
    ///
    /// Folders that do not exist or fail are skipped; see
    /// [`scan_report`](Self::scan_report) for the per-folder outcomes.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidQuery`] before any network traffic if the query has no
    /// subject, sender or keyword; [`Error::NotAuthenticated`] if login failed.
    pub async fn scan(&mut self, query: &ScanQuery) -> Result<Option<Vec<ParsedBody>>> {
        let report = self.scan_report(query).await?;
        Ok(report.into_hits())
    }

    /// Scans every configured folder, reporting what happened to each.
    ///
    /// # Errors
    ///
    /// See [`scan`](Self::scan).
    #[instrument(
        name = "MailboxClient::scan",
        skip_all,
        fields(
            email = %self.config.email(),
            query = %query.criteria().to_imap_query()
        )
    )]
    pub async fn scan_report(&mut self, query: &ScanQuery) -> Result<ScanReport> {
        query.validate()?;
        if !self.is_authenticated() {
            error!("Scan requested on an unauthenticated client");
            return Err(Error::NotAuthenticated {
                email: self.config.email().to_string(),
            });
        }

        let now = Utc::now();
        let folders = self.config.folders().to_vec();
        let mut report = ScanReport::default();
        let mut inbox_scanned = false;

        for folder in folders {
            if folder.eq_ignore_ascii_case(INBOX) {
                if inbox_scanned {
                    debug!(folder = %folder, "INBOX already scanned, skipping");
                    report.folders.push((folder, FolderOutcome::Duplicate));
                    continue;
                }
                inbox_scanned = true;
            }

            let outcome = match self.scan_folder(&folder, query, now).await {
                Ok(Some(hits)) => {
                    let matched = hits.len();
                    debug!(folder = %folder, matched, "Folder scanned");
                    report.hits.extend(hits);
                    FolderOutcome::Scanned { matched }
                }
                Ok(None) => {
                    debug!(folder = %folder, "Folder not found, skipping");
                    FolderOutcome::Absent
                }
                Err(e) => {
                    warn!(folder = %folder, error = %e, "Folder scan failed, skipping");
                    FolderOutcome::Failed(e)
                }
            };
            report.folders.push((folder, outcome));
        }

        if report.hits.is_empty() {
            info!("No matching messages");
        } else {
            info!(hits = report.hits.len(), "Scan complete");
        }
        Ok(report)
    }

    /// Closes the session with a best-effort logout. Calling it again does
    /// nothing.
    #[instrument(name = "MailboxClient::close", skip_all)]
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        match self.session.logout().await {
            Ok(()) => debug!("Logged out"),
            Err(e) => warn!(error = %e, "Logout failed, connection dropped"),
        }
    }

    /// Converts this client into a guard that logs out on drop.
    #[must_use]
    pub fn into_guard(self) -> MailboxClientGuard {
        MailboxClientGuard { inner: Some(self) }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Private methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Connect, login and `SELECT INBOX`, retried as a unit.
    ///
    /// This is the only retry level on the connect path: the transport built
    /// by [`tls_transport`] dials each attempt exactly once.
    async fn authenticate(&mut self) -> Result<()> {
        let policy = self.config.retry_policy();
        let mut attempt = 1;
        loop {
            match self.open_session().await {
                Ok(()) => return Ok(()),
                Err(e) if policy.backoff("connect and login", attempt, &e).await => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// One connect + login + `SELECT INBOX` attempt on a fresh connection.
    async fn open_session(&mut self) -> Result<()> {
        self.session.disconnect();
        self.session
            .connect(&self.imap_host, self.config.imap_port())
            .await?;
        self.session
            .login(self.config.email(), self.config.password())
            .await?;
        if self.session.select_folder(INBOX).await? {
            Ok(())
        } else {
            Err(Error::MailboxUnavailable {
                mailbox: INBOX.to_string(),
            })
        }
    }

    /// Makes sure `folder` is selected, logging in again if a timed out
    /// exchange dropped the connection. `Ok(false)` if the folder is refused.
    async fn ensure_selected(&mut self, folder: &str) -> Result<bool> {
        if self.session.selected_folder() == Some(folder) {
            return Ok(true);
        }
        if !matches!(
            self.session.state(),
            SessionState::Authenticated | SessionState::FolderSelected
        ) {
            warn!(state = %self.session.state(), "Connection lost, logging in again");
            self.open_session().await?;
        }
        self.session.select_folder(folder).await
    }

    /// Like [`ensure_selected`](Self::ensure_selected) for operations that
    /// need the folder to exist.
    async fn require_selected(&mut self, folder: &str) -> Result<()> {
        if self.ensure_selected(folder).await? {
            Ok(())
        } else {
            Err(Error::MailboxUnavailable {
                mailbox: folder.to_string(),
            })
        }
    }

    async fn search_in(&mut self, folder: &str, query: &ScanQuery) -> Result<Vec<u32>> {
        self.require_selected(folder).await?;
        self.session.search(query.criteria()).await
    }

    async fn fetch_in(
        &mut self,
        folder: &str,
        uids: &[u32],
        mark_seen: bool,
    ) -> Result<Vec<MessageRecord>> {
        self.require_selected(folder).await?;
        self.session.fetch(uids, mark_seen).await
    }

    #[instrument(name = "MailboxClient::scan_folder", skip_all, fields(folder = %folder))]
    async fn scan_folder(
        &mut self,
        folder: &str,
        query: &ScanQuery,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<ParsedBody>>> {
        let policy = self.config.retry_policy();
        let mark_seen = self.config.mark_seen();

        let mut attempt = 1;
        let selected = loop {
            match self.ensure_selected(folder).await {
                Ok(selected) => break selected,
                Err(e) if policy.backoff("select", attempt, &e).await => attempt += 1,
                Err(e) => return Err(e),
            }
        };
        if !selected {
            return Ok(None);
        }

        let mut attempt = 1;
        let uids = loop {
            match self.search_in(folder, query).await {
                Ok(uids) => break uids,
                Err(e) if policy.backoff("search", attempt, &e).await => attempt += 1,
                Err(e) => return Err(e),
            }
        };
        if uids.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let mut attempt = 1;
        let records = loop {
            match self.fetch_in(folder, &uids, mark_seen).await {
                Ok(records) => break records,
                Err(e) if policy.backoff("fetch", attempt, &e).await => attempt += 1,
                Err(e) => return Err(e),
            }
        };

        let mut hits = Vec::new();
        for record in records {
            if let Some(reason) = query.rejects(&record, now) {
                debug!(uid = record.uid, reason = %reason, "Message filtered out");
                continue;
            }
            hits.push(ParsedBody::new(folder, record));
        }
        Ok(Some(hits))
    }
}

/// Builds the TLS transport described by `config`.
fn tls_transport(config: &MailboxConfig) -> TunneledTlsTransport {
    let sockets = ProxySocketFactory::new(
        config.proxy().cloned(),
        config.timeout(),
        RetryPolicy::no_retry(),
    );
    let transport = TunneledTlsTransport::new(sockets);
    if config.accepts_invalid_certs() {
        transport.danger_accept_invalid_certs()
    } else {
        transport
    }
}

impl std::fmt::Debug for MailboxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxClient")
            .field("email", &self.config.email())
            .field("imap_host", &self.imap_host)
            .field("authenticated", &self.authenticated)
            .field("closed", &self.closed)
            .field("session_state", &self.session.state())
            .finish_non_exhaustive()
    }
}

/// RAII guard for [`MailboxClient`] that logs out on drop.
///
/// Created by [`MailboxClient::into_guard`].
pub struct MailboxClientGuard {
    inner: Option<MailboxClient>,
}

impl MailboxClientGuard {
    /// See [`MailboxClient::scan`].
    ///
    /// # Panics
    ///
    /// Panics if the guard has already been consumed.
    ///
    /// # Errors
    ///
    /// See [`MailboxClient::scan`].
    pub async fn scan(&mut self, query: &ScanQuery) -> Result<Option<Vec<ParsedBody>>> {
        self.inner
            .as_mut()
            .expect("guard already consumed")
            .scan(query)
            .await
    }

    /// See [`MailboxClient::is_authenticated`].
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(MailboxClient::is_authenticated)
    }

    /// Closes the client now and consumes the guard.
    pub async fn close(mut self) {
        if let Some(mut client) = self.inner.take() {
            client.close().await;
        }
    }
}

impl Drop for MailboxClientGuard {
    fn drop(&mut self) {
        let Some(mut client) = self.inner.take() else {
            return;
        };
        if client.closed {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    client.close().await;
                });
            }
            Err(_) => {
                // No runtime: the connection is dropped without LOGOUT.
                warn!(
                    "MailboxClientGuard dropped outside of tokio runtime context. \
                     Connection will be closed without proper IMAP logout."
                );
            }
        }
    }
}

impl std::fmt::Debug for MailboxClientGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxClientGuard")
            .field("inner", &self.inner)
            .finish()
    }
}
