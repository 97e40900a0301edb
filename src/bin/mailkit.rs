//! CLI scanning one mailbox, optionally through an HTTP or SOCKS5 proxy.
//!
//! ```text
//! mailkit -e user@gmail.com -p app-password --scrap Invoice --max-age-secs 300 \
//!     --proxy-type SOCKS5 --proxy-addr 127.0.0.1 --proxy-port 1080
//! ```
//!
//! The text of every matching message is printed to stdout. Connection and
//! login problems are logged; only invalid arguments end with a failure exit.

use chrono::NaiveDate;
use clap::Parser;
use mailkit::logging::{LogSession, DEFAULT_LOG_DIR};
use mailkit::{MailboxClient, MailboxConfig, ProxyConfig, ProxyKind, ScanQuery};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mailkit")]
#[command(about = "Scan a mailbox for matching messages over IMAP, optionally through a proxy")]
struct Args {
    /// Email address
    #[arg(short = 'e', long)]
    email: String,

    /// Email password (or app password)
    #[arg(short = 'p', long)]
    password: String,

    /// Subject of the email to scrap
    #[arg(long)]
    scrap: Option<String>,

    /// Sender of the email to scrap
    #[arg(long)]
    sender: Option<String>,

    /// Keyword to search for in the email body
    #[arg(long)]
    keyword: Option<String>,

    /// Only seen (true) or unseen (false) messages
    #[arg(long)]
    seen: Option<bool>,

    /// Only messages sent at most this many seconds ago
    #[arg(long)]
    max_age_secs: Option<u64>,

    /// Only messages sent on this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    date: Option<NaiveDate>,

    /// Type of the proxy, either HTTP or SOCKS5
    #[arg(long, default_value = "HTTP", value_parser = parse_proxy_kind)]
    proxy_type: ProxyKind,

    /// IP address or hostname of the proxy
    #[arg(long)]
    proxy_addr: Option<String>,

    /// Port number of the proxy
    #[arg(long)]
    proxy_port: Option<u32>,

    /// Username for proxy authentication
    #[arg(long)]
    proxy_username: Option<String>,

    /// Password for proxy authentication
    #[arg(long)]
    proxy_password: Option<String>,

    /// Connection timeout in seconds
    #[arg(long, default_value = "10")]
    timeout: u64,

    /// Directory for log files
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Log to the console only
    #[arg(long)]
    no_log_file: bool,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("Invalid date '{s}': {e}"))
}

fn parse_proxy_kind(s: &str) -> Result<ProxyKind, String> {
    s.parse().map_err(|e: mailkit::Error| e.to_string())
}

impl Args {
    fn proxy(&self) -> mailkit::Result<Option<ProxyConfig>> {
        let (Some(addr), Some(port)) = (&self.proxy_addr, self.proxy_port) else {
            return Ok(None);
        };

        let mut builder = ProxyConfig::builder()
            .kind(self.proxy_type)
            .address(addr)
            .port(port)
            .timeout_secs(self.timeout);
        if let Some(username) = &self.proxy_username {
            builder = builder.username(username);
        }
        if let Some(password) = &self.proxy_password {
            builder = builder.password(password);
        }
        builder.build().map(Some)
    }

    fn config(&self) -> mailkit::Result<MailboxConfig> {
        let mut builder = MailboxConfig::builder()
            .email(&self.email)
            .password(&self.password)
            .timeout(Duration::from_secs(self.timeout));
        if let Some(proxy) = self.proxy()? {
            builder = builder.proxy(proxy);
        }
        builder.build()
    }

    /// `None` when no subject, sender or keyword was given.
    fn query(&self) -> Option<ScanQuery> {
        if self.scrap.is_none() && self.sender.is_none() && self.keyword.is_none() {
            return None;
        }

        let mut query = ScanQuery::new();
        if let Some(subject) = &self.scrap {
            query = query.subject(subject);
        }
        if let Some(sender) = &self.sender {
            query = query.sender(sender);
        }
        if let Some(keyword) = &self.keyword {
            query = query.keyword(keyword);
        }
        if let Some(seen) = self.seen {
            query = query.seen(seen);
        }
        if let Some(secs) = self.max_age_secs {
            query = query.max_age(Duration::from_secs(secs));
        }
        if let Some(date) = self.date {
            query = query.on_date(date);
        }
        Some(query)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let logs = if args.no_log_file {
        LogSession::console()
    } else {
        LogSession::with_file(&args.log_dir)?
    };
    if let Some(path) = logs.file() {
        info!(path = %path.display(), "Logging to file");
    }

    let config = args.config()?;
    let query = args.query();
    if let Some(query) = &query {
        query.validate()?;
    }

    let mut client = MailboxClient::connect(config).await?;
    if !client.is_authenticated() {
        client.close().await;
        return Ok(());
    }

    if let Some(query) = &query {
        match client.scan(query).await {
            Ok(Some(hits)) => {
                for hit in &hits {
                    println!("{}", hit.text());
                }
            }
            Ok(None) => info!("No matching messages"),
            Err(e) => error!(error = %e, "Scan failed"),
        }
    }

    client.close().await;
    Ok(())
}
