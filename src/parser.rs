//! Parsing of fetched messages and their bodies.
//!
//! Raw RFC 5322 messages become [`MessageRecord`]s (headers plus the text and
//! HTML bodies). Messages that survive the scan filters are turned into
//! [`ParsedBody`] documents that can be queried with CSS selectors.

use crate::error::{Error, Result};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use mailparse::{parse_mail, DispositionType, MailHeaderMap, ParsedMail};
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tracing::{debug, warn};

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));

/// A fetched message, decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    /// UID within the folder it was fetched from.
    pub uid: u32,
    /// Sending date, keeping the sender's UTC offset.
    pub date: DateTime<FixedOffset>,
    /// Decoded `Subject` header.
    pub subject: Option<String>,
    /// Decoded `From` header.
    pub from: Option<String>,
    /// Concatenated `text/plain` parts.
    pub text: Option<String>,
    /// Concatenated `text/html` parts.
    pub html: Option<String>,
}

impl MessageRecord {
    /// The plain-text body if it is non-empty, otherwise the HTML body.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|text| !text.is_empty())
            .or(self.html.as_deref())
    }

    /// Whether [`content`](Self::content) contains `keyword` (case-sensitive).
    #[must_use]
    pub fn contains(&self, keyword: &str) -> bool {
        self.content().is_some_and(|content| content.contains(keyword))
    }
}

/// Decodes a raw message.
///
/// The date comes from the `Date` header when it parses, otherwise from the
/// server's INTERNALDATE, otherwise the Unix epoch.
///
/// # Errors
///
/// Returns [`Error::ParseEmail`] if the MIME structure cannot be parsed.
pub fn parse_message(
    uid: u32,
    raw: &[u8],
    internal_date: Option<DateTime<FixedOffset>>,
) -> Result<MessageRecord> {
    let parsed = parse_mail(raw).map_err(|source| Error::ParseEmail { uid, source })?;

    let subject = parsed.headers.get_first_value("Subject");
    let from = parsed.headers.get_first_value("From");
    let date = parsed
        .headers
        .get_first_value("Date")
        .and_then(|value| parse_date_header(&value))
        .or(internal_date)
        .unwrap_or_else(|| {
            debug!(uid, "Message has no usable date, using epoch");
            DateTime::<Utc>::UNIX_EPOCH.fixed_offset()
        });

    let mut text = Vec::new();
    let mut html = Vec::new();
    collect_bodies(uid, &parsed, &mut text, &mut html);

    Ok(MessageRecord {
        uid,
        date,
        subject,
        from,
        text: join_parts(text),
        html: join_parts(html),
    })
}

fn parse_date_header(value: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc2822(value.trim()).ok().or_else(|| {
        mailparse::dateparse(value)
            .ok()
            .and_then(|timestamp| Utc.timestamp_opt(timestamp, 0).single())
            .map(|date| date.fixed_offset())
    })
}

/// Walks the MIME tree collecting inline text and HTML parts.
fn collect_bodies(uid: u32, part: &ParsedMail<'_>, text: &mut Vec<String>, html: &mut Vec<String>) {
    if !part.subparts.is_empty() {
        for subpart in &part.subparts {
            collect_bodies(uid, subpart, text, html);
        }
        return;
    }

    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return;
    }

    let target = match part.ctype.mimetype.to_lowercase().as_str() {
        "text/plain" => text,
        "text/html" => html,
        _ => return,
    };
    match part.get_body() {
        Ok(body) => target.push(body),
        Err(e) => warn!(uid, error = %e, "Failed to decode body part, skipping it"),
    }
}

fn join_parts(parts: Vec<String>) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(parts.concat())
    }
}

/// A matching message, with its body parsed as a queryable document.
#[derive(Debug, Clone)]
pub struct ParsedBody {
    folder: String,
    uid: u32,
    date: DateTime<FixedOffset>,
    subject: Option<String>,
    from: Option<String>,
    source: String,
    text: String,
    links: Vec<String>,
}

impl ParsedBody {
    /// Parses the content of `record` found in `folder`.
    ///
    /// A message without any body yields an empty document.
    #[must_use]
    pub fn new(folder: &str, record: MessageRecord) -> Self {
        let source = record.content().unwrap_or_default().to_string();
        let document = Html::parse_document(&source);

        let text = document
            .root_element()
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ");
        let links = document
            .select(&LINK_SELECTOR)
            .filter_map(|element| element.value().attr("href"))
            .map(str::to_string)
            .collect();

        Self {
            folder: folder.to_string(),
            uid: record.uid,
            date: record.date,
            subject: record.subject,
            from: record.from,
            source,
            text,
            links,
        }
    }

    /// Folder the message was found in.
    #[must_use]
    pub fn folder(&self) -> &str {
        &self.folder
    }

    /// UID of the message within its folder.
    #[must_use]
    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Sending date of the message.
    #[must_use]
    pub fn date(&self) -> DateTime<FixedOffset> {
        self.date
    }

    /// Subject of the message.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Sender of the message.
    #[must_use]
    pub fn from(&self) -> Option<&str> {
        self.from.as_deref()
    }

    /// The body the document was built from (text, or HTML when there is no text).
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Visible text of the document, whitespace-normalized.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Targets of all `<a href>` elements, in document order.
    #[must_use]
    pub fn links(&self) -> &[String] {
        &self.links
    }

    /// Parses the body into a fresh [`Html`] document.
    #[must_use]
    pub fn document(&self) -> Html {
        Html::parse_document(&self.source)
    }

    /// Returns the text of every element matching the CSS `selector`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelector`] if `selector` does not parse.
    pub fn select(&self, selector: &str) -> Result<Vec<String>> {
        let parsed = Selector::parse(selector).map_err(|e| Error::InvalidSelector {
            selector: selector.to_string(),
            message: e.to_string(),
        })?;

        let document = self.document();
        let matches = document
            .select(&parsed)
            .map(|element| element.text().collect::<String>())
            .collect();
        Ok(matches)
    }
}
