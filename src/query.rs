//! Scan queries: server-side search criteria plus client-side filters.
//!
//! A [`ScanQuery`] is split in two. Its [`SearchCriteria`] (subject, sender,
//! seen flag) become an IMAP `UID SEARCH` command. The keyword, age and date
//! filters are applied to fetched messages, since IMAP servers disagree on
//! body search and on date semantics.
//!
//! # Example
//!
//! ```
//! use mailkit::ScanQuery;
//! use std::time::Duration;
//!
//! let query = ScanQuery::new()
//!     .subject("Invoice")
//!     .sender("billing@shop.example")
//!     .max_age(Duration::from_secs(5 * 60));
//! assert!(query.validate().is_ok());
//! assert_eq!(
//!     query.criteria().to_imap_query(),
//!     r#"SUBJECT "Invoice" FROM "billing@shop.example""#
//! );
//!
//! // At least one of subject, sender or keyword is required.
//! assert!(ScanQuery::new().seen(false).validate().is_err());
//! ```

use crate::error::{Error, Result};
use crate::parser::MessageRecord;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use std::fmt;
use std::time::Duration;

/// Criteria sent to the server with `UID SEARCH`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Substring of the `Subject` header.
    pub subject: Option<String>,
    /// Sender address, matched by the server against `From`.
    pub from: Option<String>,
    /// `Some(true)` for seen messages only, `Some(false)` for unseen only.
    pub seen: Option<bool>,
}

impl SearchCriteria {
    /// Checks that the string arguments can be sent as IMAP quoted strings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuery`] if the subject or sender contains a
    /// control character. A CR or LF would end the command line early and let
    /// the rest of the value run as a separate command.
    pub fn validate(&self) -> Result<()> {
        let fields = [("subject", &self.subject), ("sender", &self.from)];
        for (name, value) in fields {
            if value.as_deref().is_some_and(|v| v.chars().any(char::is_control)) {
                return Err(Error::InvalidQuery {
                    message: format!("{name} must not contain control characters"),
                });
            }
        }
        Ok(())
    }

    /// Renders the search keys. An empty criteria set searches `ALL`.
    #[must_use]
    pub fn to_imap_query(&self) -> String {
        let mut keys = Vec::new();
        if let Some(subject) = &self.subject {
            keys.push(format!("SUBJECT {}", quote(subject)));
        }
        if let Some(from) = &self.from {
            keys.push(format!("FROM {}", quote(from)));
        }
        match self.seen {
            Some(true) => keys.push("SEEN".to_string()),
            Some(false) => keys.push("UNSEEN".to_string()),
            None => {}
        }

        if keys.is_empty() {
            return "ALL".to_string();
        }
        let query = keys.join(" ");
        if query.is_ascii() {
            query
        } else {
            format!("CHARSET UTF-8 {query}")
        }
    }
}

/// Quotes an IMAP string argument.
fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Why a fetched message was dropped by the client-side filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Older than the allowed age.
    TooOld,
    /// Sent on another calendar date.
    OtherDate,
    /// The keyword does not appear in the body.
    MissingKeyword,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::TooOld => write!(f, "older than the time window"),
            Rejection::OtherDate => write!(f, "sent on another date"),
            Rejection::MissingKeyword => write!(f, "keyword not found"),
        }
    }
}

/// What to look for during a mailbox scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanQuery {
    criteria: SearchCriteria,
    keyword: Option<String>,
    max_age: Option<Duration>,
    on_date: Option<NaiveDate>,
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    Some(value.into()).filter(|v| !v.is_empty())
}

impl ScanQuery {
    /// Creates an empty query. At least one of [`subject`](Self::subject),
    /// [`sender`](Self::sender) or [`keyword`](Self::keyword) must be set
    /// before scanning.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches messages whose subject contains `subject` (server-side).
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.criteria.subject = non_empty(subject);
        self
    }

    /// Matches messages from `sender` (server-side).
    #[must_use]
    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.criteria.from = non_empty(sender);
        self
    }

    /// Restricts to seen (`true`) or unseen (`false`) messages (server-side).
    #[must_use]
    pub fn seen(mut self, seen: bool) -> Self {
        self.criteria.seen = Some(seen);
        self
    }

    /// Keeps messages whose body contains `keyword`, case-sensitively.
    #[must_use]
    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = non_empty(keyword);
        self
    }

    /// Keeps messages sent at most `max_age` ago.
    #[must_use]
    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Keeps messages sent on `date`, in the sender's own UTC offset.
    #[must_use]
    pub fn on_date(mut self, date: NaiveDate) -> Self {
        self.on_date = Some(date);
        self
    }

    /// The server-side part of the query.
    #[must_use]
    pub fn criteria(&self) -> &SearchCriteria {
        &self.criteria
    }

    /// The body keyword, if any.
    #[must_use]
    pub fn keyword_filter(&self) -> Option<&str> {
        self.keyword.as_deref()
    }

    /// The time window, if any.
    #[must_use]
    pub fn max_age_filter(&self) -> Option<Duration> {
        self.max_age
    }

    /// The calendar date filter, if any.
    #[must_use]
    pub fn on_date_filter(&self) -> Option<NaiveDate> {
        self.on_date
    }

    /// Checks that the query selects something narrower than the whole mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidQuery`] if none of subject, sender or keyword
    /// is set, or if the search criteria are rejected by
    /// [`SearchCriteria::validate`].
    pub fn validate(&self) -> Result<()> {
        if self.criteria.subject.is_none() && self.criteria.from.is_none() && self.keyword.is_none()
        {
            return Err(Error::InvalidQuery {
                message: "at least one of subject, sender or keyword is required".into(),
            });
        }
        self.criteria.validate()
    }

    /// Applies the client-side filters to a fetched message.
    ///
    /// Returns the first filter the message fails, or `None` if it is kept.
    #[must_use]
    pub fn rejects(&self, record: &MessageRecord, now: DateTime<Utc>) -> Option<Rejection> {
        if let Some(max_age) = self.max_age {
            // A window too large for chrono is unbounded.
            if let Ok(window) = TimeDelta::from_std(max_age) {
                if now.signed_duration_since(record.date) > window {
                    return Some(Rejection::TooOld);
                }
            }
        }
        if let Some(date) = self.on_date {
            if record.date.date_naive() != date {
                return Some(Rejection::OtherDate);
            }
        }
        if let Some(keyword) = &self.keyword {
            if !record.contains(keyword) {
                return Some(Rejection::MissingKeyword);
            }
        }
        None
    }

    /// Returns `true` if the message passes every client-side filter.
    #[must_use]
    pub fn retains(&self, record: &MessageRecord, now: DateTime<Utc>) -> bool {
        self.rejects(record, now).is_none()
    }
}
