//! IMAP session state machine.
//!
//! [`ImapSession`] wraps async-imap's `Client`/`Session` pair behind a single
//! owned state, so commands can only be issued in the state that allows them:
//!
//! ```text
//! Disconnected --connect--> Connected --login--> Authenticated --select--> FolderSelected
//!       ^                                              ^                        |
//!       |                                              +---- select refused ----+
//!       +------------- exchange timed out ------------------------------------ +
//!
//! any state --logout--> Closed (terminal)
//! ```
//!
//! Every exchange with the server is bounded by the session timeout. A timed
//! out exchange drops the connection, since the stream may be mid-response.

use crate::error::{Error, Result};
use crate::parser::{parse_message, MessageRecord};
use crate::query::SearchCriteria;
use crate::transport::{ImapStream, Transport};
use futures::TryStreamExt;
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

type Client = async_imap::Client<ImapStream>;
type Session = async_imap::Session<ImapStream>;

/// Fetch items when messages may be flagged `\Seen`.
const FETCH_ITEMS: &str = "(UID INTERNALDATE BODY[])";

/// Fetch items leaving the `\Seen` flag untouched.
const PEEK_ITEMS: &str = "(UID INTERNALDATE BODY.PEEK[])";

/// Observable state of an [`ImapSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No connection.
    Disconnected,
    /// Connected, not logged in.
    Connected,
    /// Logged in, no folder selected.
    Authenticated,
    /// Logged in with a folder selected; search and fetch are allowed.
    FolderSelected,
    /// Logged out. The session cannot be reused.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::FolderSelected => write!(f, "folder-selected"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

enum Connection {
    Disconnected,
    Connected(Client),
    Authenticated(Session),
    Selected { session: Session, folder: String },
    Closed,
}

impl Connection {
    fn state(&self) -> SessionState {
        match self {
            Connection::Disconnected => SessionState::Disconnected,
            Connection::Connected(_) => SessionState::Connected,
            Connection::Authenticated(_) => SessionState::Authenticated,
            Connection::Selected { .. } => SessionState::FolderSelected,
            Connection::Closed => SessionState::Closed,
        }
    }
}

/// One IMAP connection and its protocol state.
pub struct ImapSession {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    connection: Connection,
}

impl ImapSession {
    /// Creates a disconnected session.
    ///
    /// `timeout` bounds every IMAP exchange (login, select, search, fetch,
    /// logout).
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            connection: Connection::Disconnected,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.connection.state()
    }

    /// The selected folder, in [`SessionState::FolderSelected`].
    #[must_use]
    pub fn selected_folder(&self) -> Option<&str> {
        match &self.connection {
            Connection::Selected { folder, .. } => Some(folder),
            _ => None,
        }
    }

    /// Exchange timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn invalid_state(&self, operation: &'static str, expected: SessionState) -> Error {
        Error::InvalidState {
            operation,
            expected,
            actual: self.state(),
        }
    }

    /// Opens the transport to `host:port`.
    ///
    /// # Errors
    ///
    /// [`Error::SessionClosed`] after [`logout`](Self::logout),
    /// [`Error::InvalidState`] unless disconnected, or the transport's
    /// connectivity error (the session stays disconnected).
    #[instrument(name = "session::connect", skip_all, fields(imap_host = %host, port = port))]
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        match self.connection {
            Connection::Disconnected => {}
            Connection::Closed => return Err(Error::SessionClosed),
            _ => return Err(self.invalid_state("connect", SessionState::Disconnected)),
        }

        let stream = self.transport.open(host, port).await?;
        self.connection = Connection::Connected(async_imap::Client::new(stream));
        debug!("Connected");
        Ok(())
    }

    /// Logs in with a plain `LOGIN`.
    ///
    /// On rejection the session stays connected, so login can be attempted
    /// again without reconnecting.
    ///
    /// # Errors
    ///
    /// [`Error::ImapLogin`] if the server rejects the credentials,
    /// [`Error::AuthTimeout`] (connection dropped), or
    /// [`Error::InvalidState`] unless connected.
    #[instrument(name = "session::login", skip_all, fields(email = %email))]
    pub async fn login(&mut self, email: &str, password: &str) -> Result<()> {
        let client = match mem::replace(&mut self.connection, Connection::Disconnected) {
            Connection::Connected(client) => client,
            other => {
                self.connection = other;
                return Err(self.invalid_state("login", SessionState::Connected));
            }
        };

        debug!("Authenticating to IMAP server");
        match tokio::time::timeout(self.timeout, client.login(email, password)).await {
            Ok(Ok(session)) => {
                self.connection = Connection::Authenticated(session);
                debug!("Authenticated");
                Ok(())
            }
            Ok(Err((source, client))) => {
                self.connection = Connection::Connected(client);
                Err(Error::ImapLogin {
                    email: email.to_string(),
                    source,
                })
            }
            Err(_) => Err(Error::AuthTimeout {
                email: email.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    /// Selects `folder`.
    ///
    /// Returns `Ok(false)` when the server answers `NO` (the folder does not
    /// exist or is not accessible); the session is then authenticated with no
    /// folder selected.
    ///
    /// # Errors
    ///
    /// [`Error::SelectMailbox`] for other server failures,
    /// [`Error::SelectTimeout`] (connection dropped), or
    /// [`Error::InvalidState`] unless authenticated.
    #[instrument(name = "session::select", skip_all, fields(folder = %folder))]
    pub async fn select_folder(&mut self, folder: &str) -> Result<bool> {
        let mut session = match mem::replace(&mut self.connection, Connection::Disconnected) {
            Connection::Authenticated(session) | Connection::Selected { session, .. } => session,
            other => {
                self.connection = other;
                return Err(self.invalid_state("select", SessionState::Authenticated));
            }
        };

        debug!("Selecting folder");
        let result = tokio::time::timeout(self.timeout, session.select(folder)).await;
        match result {
            Ok(Ok(mailbox)) => {
                debug!(exists = mailbox.exists, "Folder selected");
                self.connection = Connection::Selected {
                    session,
                    folder: folder.to_string(),
                };
                Ok(true)
            }
            Ok(Err(async_imap::error::Error::No(message))) => {
                debug!(response = %message, "Folder refused");
                self.connection = Connection::Authenticated(session);
                Ok(false)
            }
            Ok(Err(source)) => {
                self.connection = Connection::Authenticated(session);
                Err(Error::SelectMailbox {
                    mailbox: folder.to_string(),
                    source,
                })
            }
            Err(_) => Err(Error::SelectTimeout {
                mailbox: folder.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    fn selected_session(&mut self, operation: &'static str) -> Result<&mut Session> {
        let actual = self.state();
        match &mut self.connection {
            Connection::Selected { session, .. } => Ok(session),
            _ => Err(Error::InvalidState {
                operation,
                expected: SessionState::FolderSelected,
                actual,
            }),
        }
    }

    /// Searches the selected folder, returning matching UIDs in ascending order.
    ///
    /// # Errors
    ///
    /// [`Error::ImapSearch`], [`Error::SearchTimeout`] (connection dropped),
    /// [`Error::InvalidState`] unless a folder is selected, or
    /// [`Error::InvalidQuery`] before anything is sent if the criteria hold
    /// control characters.
    #[instrument(name = "session::search", skip_all, fields(folder = ?self.selected_folder()))]
    pub async fn search(&mut self, criteria: &SearchCriteria) -> Result<Vec<u32>> {
        criteria.validate()?;
        let timeout = self.timeout;
        let query = criteria.to_imap_query();
        let session = self.selected_session("search")?;

        debug!(query = %query, "Searching");
        let result = tokio::time::timeout(timeout, session.uid_search(&query)).await;
        match result {
            Ok(Ok(uids)) => {
                let mut uids: Vec<u32> = uids.into_iter().collect();
                uids.sort_unstable();
                debug!(uid_count = uids.len(), "Search complete");
                Ok(uids)
            }
            Ok(Err(source)) => Err(Error::ImapSearch { query, source }),
            Err(_) => {
                self.connection = Connection::Disconnected;
                Err(Error::SearchTimeout { timeout })
            }
        }
    }

    /// Fetches and decodes the messages with the given UIDs.
    ///
    /// With `mark_seen` the server flags fetched messages `\Seen`; without it
    /// the bodies are peeked. An empty UID list returns immediately.
    /// Messages that fail to parse are logged and skipped.
    ///
    /// # Errors
    ///
    /// [`Error::ImapFetch`], [`Error::FetchTimeout`] (connection dropped), or
    /// [`Error::InvalidState`] unless a folder is selected.
    #[instrument(
        name = "session::fetch",
        skip_all,
        fields(folder = ?self.selected_folder(), count = uids.len(), mark_seen = mark_seen)
    )]
    pub async fn fetch(&mut self, uids: &[u32], mark_seen: bool) -> Result<Vec<MessageRecord>> {
        let timeout = self.timeout;
        let session = self.selected_session("fetch")?;
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let uid_set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let items = if mark_seen { FETCH_ITEMS } else { PEEK_ITEMS };

        debug!(uid_set = %uid_set, "Fetching messages");
        let fetches = tokio::time::timeout(timeout, async {
            session
                .uid_fetch(&uid_set, items)
                .await?
                .try_collect::<Vec<_>>()
                .await
        })
        .await;

        let fetches = match fetches {
            Ok(Ok(fetches)) => fetches,
            Ok(Err(source)) => return Err(Error::ImapFetch { uid_set, source }),
            Err(_) => {
                self.connection = Connection::Disconnected;
                return Err(Error::FetchTimeout { uid_set, timeout });
            }
        };

        let mut records = Vec::with_capacity(fetches.len());
        for fetch in &fetches {
            let Some(uid) = fetch.uid else {
                debug!("Fetch response without UID, skipping");
                continue;
            };
            let Some(body) = fetch.body() else {
                debug!(uid, "Message has no body");
                continue;
            };
            match parse_message(uid, body, fetch.internal_date()) {
                Ok(record) => records.push(record),
                Err(e) => warn!(uid, error = %e, "Failed to parse email, skipping message"),
            }
        }

        debug!(fetched = records.len(), "Fetch complete");
        Ok(records)
    }

    /// Drops the connection without logging out. No effect once closed.
    pub fn disconnect(&mut self) {
        if !matches!(self.connection, Connection::Closed) {
            self.connection = Connection::Disconnected;
        }
    }

    /// Logs out and releases the connection. The session ends up closed
    /// whatever the outcome; calling this again is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::ImapLogout`] or [`Error::LogoutTimeout`]. Neither is worth
    /// acting upon beyond logging.
    #[instrument(name = "session::logout", skip_all)]
    pub async fn logout(&mut self) -> Result<()> {
        let mut session = match mem::replace(&mut self.connection, Connection::Closed) {
            Connection::Authenticated(session) | Connection::Selected { session, .. } => session,
            Connection::Connected(_) | Connection::Disconnected | Connection::Closed => {
                return Ok(());
            }
        };

        debug!("Logging out");
        match tokio::time::timeout(self.timeout, session.logout()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(Error::ImapLogout { source }),
            Err(_) => Err(Error::LogoutTimeout {
                timeout: self.timeout,
            }),
        }
    }
}

impl fmt::Debug for ImapSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapSession")
            .field("transport", &self.transport)
            .field("timeout", &self.timeout)
            .field("state", &self.state())
            .field("folder", &self.selected_folder())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
        assert_eq!(SessionState::FolderSelected.to_string(), "folder-selected");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }
}
