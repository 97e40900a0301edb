//! Scan a mailbox through an HTTP or SOCKS5 proxy.
//!
//! # Usage
//!
//! ```bash
//! export EMAIL_ADDRESS="your@gmail.com"
//! export EMAIL_PASSWORD="your-app-password"
//! export PROXY_HOST="proxy.example.com"
//! export PROXY_PORT="1080"
//! export PROXY_TYPE="SOCKS5"   # or HTTP (default)
//! # Optional: for authenticated proxies
//! export PROXY_USER="username"
//! export PROXY_PASS="password"
//!
//! cargo run --example with_proxy
//! ```

use mailkit::{MailboxClient, MailboxConfig, ProxyConfig, ProxyKind, ScanQuery};
use std::env;
use std::time::Duration;

#[tokio::main]
async fn main() -> mailkit::Result<()> {
    let email = env::var("EMAIL_ADDRESS").expect("EMAIL_ADDRESS environment variable required");
    let password =
        env::var("EMAIL_PASSWORD").expect("EMAIL_PASSWORD environment variable required");

    let proxy_host = env::var("PROXY_HOST").expect("PROXY_HOST environment variable required");
    let proxy_port: u32 = env::var("PROXY_PORT")
        .expect("PROXY_PORT environment variable required")
        .parse()
        .expect("PROXY_PORT must be a number");
    let proxy_kind = env::var("PROXY_TYPE")
        .ok()
        .map(|kind| kind.parse::<ProxyKind>())
        .transpose()?
        .unwrap_or_default();

    let mut proxy = ProxyConfig::builder()
        .kind(proxy_kind)
        .address(proxy_host)
        .port(proxy_port)
        // Tunnels are slower to set up than direct connections.
        .timeout_secs(30);
    if let (Ok(user), Ok(pass)) = (env::var("PROXY_USER"), env::var("PROXY_PASS")) {
        proxy = proxy.credentials(user, pass);
    }
    let proxy = proxy.build()?;
    println!("Using proxy {proxy}");

    let config = MailboxConfig::builder()
        .email(&email)
        .password(password)
        .proxy(proxy)
        .build()?;

    let mut client = MailboxClient::connect(config).await?;
    if !client.is_authenticated() {
        println!("Could not log in as {email} through the proxy");
        client.close().await;
        return Ok(());
    }
    println!("Logged in to {} via proxy", client.imap_host());

    let query = ScanQuery::new()
        .subject("Invoice")
        .max_age(Duration::from_secs(24 * 3600));
    match client.scan(&query).await? {
        Some(hits) => {
            for hit in &hits {
                println!(
                    "[{}] #{} {}",
                    hit.folder(),
                    hit.uid(),
                    hit.subject().unwrap_or("(no subject)")
                );
            }
        }
        None => println!("No invoices in the last 24 hours"),
    }

    client.close().await;
    Ok(())
}
