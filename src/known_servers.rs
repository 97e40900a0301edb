//! IMAP host resolution from email domains.
//!
//! Only domains present in the table (or registered at runtime) resolve.
//! There is no `imap.{domain}` guess: an unknown domain is reported to the
//! caller as [`Error::UnsupportedDomain`](crate::Error::UnsupportedDomain).
//!
//! # Example
//!
//! ```
//! use mailkit::known_servers::{resolve_imap_host, ServerRegistry};
//!
//! assert_eq!(resolve_imap_host("user@gmail.com"), Some("imap.gmail.com"));
//! assert_eq!(resolve_imap_host("user@example.invalid"), None);
//!
//! let mut registry = ServerRegistry::with_defaults();
//! registry.register("mycompany.com", "mail.mycompany.com");
//! assert_eq!(registry.resolve("user@mycompany.com"), Some("mail.mycompany.com"));
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

/// Built-in domain to IMAP host table.
const DEFAULT_SERVERS: &[(&str, &str)] = &[
    // Google
    ("gmail.com", "imap.gmail.com"),
    ("googlemail.com", "imap.gmail.com"),
    // Yahoo
    ("yahoo.com", "imap.mail.yahoo.com"),
    // Microsoft
    ("outlook.com", "outlook.office365.com"),
    ("hotmail.com", "outlook.office365.com"),
    ("live.com", "outlook.office365.com"),
    // AOL
    ("aol.com", "imap.aol.com"),
    // mail.com / GMX
    ("mail.com", "imap.mail.com"),
    ("gmx.com", "imap.gmx.com"),
    ("gmx.net", "imap.gmx.net"),
    ("gmx.de", "imap.gmx.net"),
    ("gmx.at", "imap.gmx.net"),
    ("gmx.ch", "imap.gmx.net"),
    // Mail.ru network
    ("mail.ru", "imap.mail.ru"),
    ("internet.ru", "imap.mail.ru"),
    ("bk.ru", "imap.mail.ru"),
    ("inbox.ru", "imap.mail.ru"),
    ("list.ru", "imap.mail.ru"),
    // Rambler
    ("rambler.ru", "imap.rambler.ru"),
    ("autorambler.ru", "imap.rambler.ru"),
    // Yandex
    ("yandex.ru", "imap.yandex.ru"),
    ("yandex.com", "imap.yandex.ru"),
    // Apple
    ("icloud.com", "imap.mail.me.com"),
    ("me.com", "imap.mail.me.com"),
    ("mac.com", "imap.mail.me.com"),
    // German providers
    ("web.de", "imap.web.de"),
    ("t-online.de", "secureimap.t-online.de"),
];

static KNOWN_SERVERS: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| DEFAULT_SERVERS.iter().copied().collect());

/// Returns the lowercased domain part of `email`, if it has exactly one '@'.
#[must_use]
pub fn email_domain(email: &str) -> Option<String> {
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(domain.to_lowercase())
}

/// A domain to IMAP host registry, optionally layered over the built-in table.
///
/// # Example
///
/// ```
/// use mailkit::known_servers::ServerRegistry;
///
/// let mut registry = ServerRegistry::new();
/// registry.register_many([
///     ("corp.com", "mail.corp.com"),
///     ("partner.org", "imap.partner.org"),
/// ]);
///
/// assert_eq!(registry.resolve("user@corp.com"), Some("mail.corp.com"));
/// assert_eq!(registry.resolve("user@gmail.com"), None);
/// ```
#[derive(Debug, Clone)]
pub struct ServerRegistry {
    custom: HashMap<String, String>,
    use_defaults: bool,
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ServerRegistry {
    /// Creates an empty registry without the built-in table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            custom: HashMap::new(),
            use_defaults: false,
        }
    }

    /// Creates a registry backed by the built-in table.
    ///
    /// Mappings added with [`Self::register`] take precedence.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            custom: HashMap::new(),
            use_defaults: true,
        }
    }

    /// Adds or replaces a mapping. Domains are case-insensitive.
    pub fn register(&mut self, domain: impl Into<String>, imap_host: impl Into<String>) {
        self.custom
            .insert(domain.into().to_lowercase(), imap_host.into());
    }

    /// Adds several mappings at once.
    pub fn register_many<I, D, H>(&mut self, mappings: I)
    where
        I: IntoIterator<Item = (D, H)>,
        D: Into<String>,
        H: Into<String>,
    {
        for (domain, host) in mappings {
            self.register(domain, host);
        }
    }

    /// Removes a custom mapping. Built-in entries are not affected.
    pub fn unregister(&mut self, domain: &str) -> Option<String> {
        self.custom.remove(&domain.to_lowercase())
    }

    /// Looks up the IMAP host for a bare domain.
    #[must_use]
    pub fn lookup(&self, domain: &str) -> Option<&str> {
        let domain = domain.to_lowercase();
        if let Some(host) = self.custom.get(&domain) {
            return Some(host);
        }
        if self.use_defaults {
            return KNOWN_SERVERS.get(domain.as_str()).copied();
        }
        None
    }

    /// Resolves the IMAP host for an email address.
    ///
    /// Returns `None` for malformed addresses and unknown domains.
    #[must_use]
    pub fn resolve(&self, email: &str) -> Option<&str> {
        self.lookup(&email_domain(email)?)
    }

    /// Returns `true` if the domain resolves.
    #[must_use]
    pub fn is_known(&self, domain: &str) -> bool {
        self.lookup(domain).is_some()
    }

    /// Returns all resolvable domains.
    #[must_use]
    pub fn domains(&self) -> Vec<&str> {
        let mut domains: Vec<&str> = self.custom.keys().map(String::as_str).collect();
        if self.use_defaults {
            domains.extend(
                KNOWN_SERVERS
                    .keys()
                    .copied()
                    .filter(|domain| !self.custom.contains_key(*domain)),
            );
        }
        domains
    }

    /// Returns the number of resolvable domains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains().len()
    }

    /// Returns `true` if nothing resolves.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.custom.is_empty() && !self.use_defaults
    }
}

/// Resolves the IMAP host for an email address from the built-in table.
#[must_use]
pub fn resolve_imap_host(email: &str) -> Option<&'static str> {
    KNOWN_SERVERS.get(email_domain(email)?.as_str()).copied()
}

/// Returns all domains of the built-in table.
#[must_use]
pub fn known_domains() -> Vec<&'static str> {
    DEFAULT_SERVERS.iter().map(|(domain, _)| *domain).collect()
}
