//! # mailkit
//!
//! Async IMAP client for scanning a mailbox, directly or through an HTTP or
//! SOCKS5 proxy.
//!
//! This crate provides a high-level, async API for:
//! - Resolving the IMAP server from the email domain
//! - Connecting over TLS, optionally tunneled through a proxy, with bounded retries
//! - Scanning a fixed list of folders for messages matching subject, sender,
//!   seen flag, age, date and body keyword
//! - Querying the matching message bodies as HTML documents
//!
//! ## Features
//!
//! - **`cli`**: Builds the `mailkit` binary and the [`logging`] module
//!   (console plus timestamped log file).
//! - **`integration-tests`**: Enables the tests running against a live server.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mailkit::{MailboxClient, MailboxConfig, ScanQuery};
//!
//! # async fn example() -> mailkit::Result<()> {
//! // Configure the client
//! let config = MailboxConfig::builder()
//!     .email("user@gmail.com")
//!     .password("app-password")  // Use app-specific password for Gmail
//!     .build()?;
//!
//! // Connect and log in; failures are logged, not returned
//! let mut client = MailboxClient::connect(config).await?;
//! if !client.is_authenticated() {
//!     return Ok(());
//! }
//!
//! // Every message with "Invoice" in the subject, in every folder
//! if let Some(hits) = client.scan(&ScanQuery::new().subject("Invoice")).await? {
//!     for hit in &hits {
//!         println!("[{}] {}", hit.folder(), hit.text());
//!     }
//! }
//!
//! // Clean up
//! client.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Using a Proxy
//!
//! ```no_run
//! use mailkit::{MailboxClient, MailboxConfig, ProxyConfig, ProxyKind};
//!
//! # async fn example() -> mailkit::Result<()> {
//! let proxy = ProxyConfig::builder()
//!     .kind(ProxyKind::Socks5)
//!     .address("proxy.example.com")
//!     .port(1080)
//!     .credentials("user", "pass")
//!     .build()?;
//!
//! let config = MailboxConfig::builder()
//!     .email("user@gmx.com")
//!     .password("password")
//!     .proxy(proxy)
//!     .build()?;
//!
//! let client = MailboxClient::connect(config).await?;
//! // ... use client ...
//! # Ok(())
//! # }
//! ```
//!
//! ## Querying Message Bodies
//!
//! ```no_run
//! use mailkit::{MailboxClient, ScanQuery};
//!
//! # async fn example(client: &mut MailboxClient) -> mailkit::Result<()> {
//! let query = ScanQuery::new().sender("noreply@shop.example").keyword("confirm");
//! for hit in client.scan(&query).await?.unwrap_or_default() {
//!     let links = hit.select("a.button[href]")?;
//!     println!("{:?} {:?}", hit.links(), links);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## RAII Guard for Automatic Cleanup
//!
//! ```no_run
//! use mailkit::{MailboxClient, MailboxConfig, ScanQuery};
//!
//! # async fn example() -> mailkit::Result<()> {
//! # let config = MailboxConfig::builder().email("a@gmail.com").password("x").build()?;
//! let client = MailboxClient::connect(config).await?;
//! let mut guard = client.into_guard();  // Will logout on drop
//!
//! let hits = guard.scan(&ScanQuery::new().subject("Welcome")).await?;
//! // Guard automatically logs out when dropped
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All errors implement `std::error::Error` and provide context. Use [`Error::is_retryable`]
//! to determine if an operation can be retried:
//!
//! ```
//! use mailkit::Error;
//!
//! fn handle_error(error: &Error) {
//!     if error.is_retryable() {
//!         println!("Transient error, can retry: {}", error);
//!     } else {
//!         println!("Permanent error: {}", error);
//!     }
//! }
//! ```
//!
//! ## Observability
//!
//! The crate uses `tracing` for instrumentation. All major operations emit spans with
//! structured fields.
//!
//! ### Span Naming Convention
//!
//! - `MailboxClient::connect` - Host resolution and login
//! - `MailboxClient::scan` / `MailboxClient::scan_folder` - Scanning
//! - `MailboxClient::close` - Logout
//! - `session::login`, `session::select`, `session::fetch`, ... - IMAP commands
//! - `transport::open` - TLS connection
//! - `connection::http_connect` / `connection::socks5` - Proxy handshakes
//!
//! ### Standard Fields
//!
//! - `email` - Email address
//! - `imap_host` - IMAP server hostname
//! - `proxy_enabled` - Whether proxy is used
//! - `folder` - Folder being scanned
//! - `uid` - Email UID

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Public modules
pub mod config;
pub mod connection;
pub mod error;
pub mod known_servers;
#[cfg(feature = "cli")]
pub mod logging;
pub mod parser;
pub mod proxy;
pub mod query;
pub mod retry;
pub mod session;
pub mod transport;

// Internal modules
mod client;

// Re-exports for ergonomic API
pub use client::{FolderOutcome, MailboxClient, MailboxClientGuard, ScanReport};
pub use config::{MailboxConfig, MailboxConfigBuilder};
pub use connection::ProxySocketFactory;
pub use error::{Error, ErrorCategory, Result};
pub use known_servers::ServerRegistry;
pub use parser::{MessageRecord, ParsedBody};
pub use proxy::{ProxyConfig, ProxyKind};
pub use query::{ScanQuery, SearchCriteria};
pub use retry::RetryPolicy;
pub use session::{ImapSession, SessionState};
pub use transport::{Transport, TunneledTlsTransport};
