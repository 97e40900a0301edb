//! Scan inside a scope that always logs out, and inspect the per-folder report.
//!
//! # Usage
//!
//! ```bash
//! export EMAIL_ADDRESS="your@gmail.com"
//! export EMAIL_PASSWORD="your-app-password"
//! export SENDER="billing@shop.example"
//!
//! RUST_LOG=mailkit=debug cargo run --example scoped
//! ```

use mailkit::{FolderOutcome, MailboxClient, MailboxConfig, ScanQuery};
use std::env;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> mailkit::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mailkit=info")),
        )
        .init();

    let email = env::var("EMAIL_ADDRESS").expect("EMAIL_ADDRESS environment variable required");
    let password =
        env::var("EMAIL_PASSWORD").expect("EMAIL_PASSWORD environment variable required");
    let sender = env::var("SENDER").expect("SENDER environment variable required");

    let config = MailboxConfig::builder()
        .email(email)
        .password(password)
        .folders(["INBOX", "[Gmail]/Spam", "Archive"])
        .mark_seen(false)
        .build()?;

    let query = ScanQuery::new().sender(sender).seen(false);
    let report = MailboxClient::scoped(config, async |client| client.scan_report(&query).await)
        .await??;

    for (folder, outcome) in report.folders() {
        match outcome {
            FolderOutcome::Scanned { matched } => println!("{folder}: {matched} unread"),
            FolderOutcome::Absent => println!("{folder}: not on this server"),
            FolderOutcome::Duplicate => println!("{folder}: already scanned"),
            FolderOutcome::Failed(e) => println!("{folder}: failed ({e})"),
        }
    }

    for hit in report.hits() {
        println!("---\n{}", hit.text());
        for link in hit.links() {
            println!("  link: {link}");
        }
    }
    Ok(())
}
