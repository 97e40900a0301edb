//! In-process IMAP server and transport for driving the client in tests.
//!
//! [`FakeTransport`] hands out in-memory duplex streams, each served by a task
//! running [`FakeServer::serve`]. The server speaks just enough IMAP4rev1 for
//! login, select, UID search, UID fetch and logout, and records every command
//! it receives. [`RefusingProxy`] is a real TCP listener for counting how
//! often the production transport dials a proxy.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mailkit::transport::{ImapStream, Transport};
use mailkit::{Error, MailboxConfig, MailboxConfigBuilder, ProxyConfig, ProxyKind, RetryPolicy};
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;

pub const EMAIL: &str = "user@gmail.com";
pub const PASSWORD: &str = "app-password";

/// Three attempts without the production delay.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(10))
}

/// Builder for the test account with fast retries.
pub fn config() -> MailboxConfigBuilder {
    MailboxConfig::builder()
        .email(EMAIL)
        .password(PASSWORD)
        .retry_policy(fast_retry())
}

/// A message stored on the fake server.
#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub uid: u32,
    pub subject: String,
    pub from: String,
    pub date: DateTime<Utc>,
    pub raw: String,
    pub seen: bool,
}

impl FakeMessage {
    /// A single-part `text/plain` message.
    pub fn text(uid: u32, from: &str, subject: &str, date: DateTime<Utc>, body: &str) -> Self {
        Self::with_content(uid, from, subject, date, "text/plain", body)
    }

    /// A single-part `text/html` message.
    pub fn html(uid: u32, from: &str, subject: &str, date: DateTime<Utc>, html: &str) -> Self {
        Self::with_content(uid, from, subject, date, "text/html", html)
    }

    fn with_content(
        uid: u32,
        from: &str,
        subject: &str,
        date: DateTime<Utc>,
        content_type: &str,
        body: &str,
    ) -> Self {
        let raw = format!(
            "From: {from}\r\n\
             To: {EMAIL}\r\n\
             Subject: {subject}\r\n\
             Date: {date}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: {content_type}; charset=utf-8\r\n\
             \r\n\
             {body}\r\n",
            date = date.to_rfc2822(),
        );
        Self {
            uid,
            subject: subject.to_string(),
            from: from.to_string(),
            date,
            raw,
            seen: false,
        }
    }

    pub fn seen(mut self) -> Self {
        self.seen = true;
        self
    }
}

#[derive(Debug)]
enum Folder {
    Messages(Vec<FakeMessage>),
    /// SELECT answers `BAD`.
    Broken,
    /// SELECT never answers.
    Hanging,
}

#[derive(Debug, Default)]
struct State {
    folders: BTreeMap<String, Folder>,
    password: String,
    commands: Vec<String>,
}

/// Shared mailbox contents and command log.
#[derive(Debug, Clone)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
}

enum Reply {
    Send(Vec<u8>),
    Hang,
    Close(Vec<u8>),
}

impl FakeServer {
    /// A server accepting [`PASSWORD`], with an empty INBOX.
    pub fn new() -> Self {
        let server = Self {
            state: Arc::new(Mutex::new(State {
                password: PASSWORD.to_string(),
                ..State::default()
            })),
        };
        server.folder("INBOX", Vec::new())
    }

    pub fn folder(self, name: &str, messages: Vec<FakeMessage>) -> Self {
        self.insert(name, Folder::Messages(messages))
    }

    pub fn broken_folder(self, name: &str) -> Self {
        self.insert(name, Folder::Broken)
    }

    pub fn hanging_folder(self, name: &str) -> Self {
        self.insert(name, Folder::Hanging)
    }

    pub fn without_folder(self, name: &str) -> Self {
        self.state.lock().unwrap().folders.remove(name);
        self
    }

    pub fn password(self, password: &str) -> Self {
        self.state.lock().unwrap().password = password.to_string();
        self
    }

    fn insert(self, name: &str, folder: Folder) -> Self {
        self.state
            .lock()
            .unwrap()
            .folders
            .insert(name.to_string(), folder);
        self
    }

    /// Every command received so far, without tags.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Number of received commands starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|command| command.starts_with(prefix))
            .count()
    }

    pub fn is_seen(&self, folder: &str, uid: u32) -> bool {
        match self.state.lock().unwrap().folders.get(folder) {
            Some(Folder::Messages(messages)) => messages
                .iter()
                .any(|message| message.uid == uid && message.seen),
            _ => false,
        }
    }

    /// Serves one connection until LOGOUT or EOF.
    pub async fn serve(self, stream: DuplexStream) {
        let (read, mut write) = tokio::io::split(stream);
        let mut lines = BufReader::new(read).lines();

        if write.write_all(b"* OK Fake IMAP ready\r\n").await.is_err() {
            return;
        }

        let mut selected: Option<String> = None;
        while let Ok(Some(line)) = lines.next_line().await {
            let Some((tag, command)) = line.split_once(' ') else {
                continue;
            };
            self.state
                .lock()
                .unwrap()
                .commands
                .push(command.to_string());

            match self.respond(tag, command, &mut selected) {
                Reply::Send(bytes) => {
                    if write.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
                Reply::Hang => {}
                Reply::Close(bytes) => {
                    let _ = write.write_all(&bytes).await;
                    let _ = write.shutdown().await;
                    return;
                }
            }
        }
    }

    fn respond(&self, tag: &str, command: &str, selected: &mut Option<String>) -> Reply {
        let args = tokens(command);
        let verb = args.first().map(|verb| verb.to_ascii_uppercase());
        let tagged = |status: &str| Reply::Send(format!("{tag} {status}\r\n").into_bytes());

        match verb.as_deref() {
            Some("LOGIN") => {
                let state = self.state.lock().unwrap();
                if args.get(1).map(String::as_str) == Some(EMAIL)
                    && args.get(2) == Some(&state.password)
                {
                    tagged("OK LOGIN completed")
                } else {
                    tagged("NO [AUTHENTICATIONFAILED] Invalid credentials")
                }
            }
            Some("SELECT" | "EXAMINE") => {
                let Some(name) = args.get(1) else {
                    return tagged("BAD Missing mailbox");
                };
                let state = self.state.lock().unwrap();
                match state.folders.get(name) {
                    Some(Folder::Messages(messages)) => {
                        *selected = Some(name.clone());
                        Reply::Send(
                            format!(
                                "* FLAGS (\\Seen)\r\n\
                                 * {} EXISTS\r\n\
                                 * 0 RECENT\r\n\
                                 {tag} OK [READ-WRITE] SELECT completed\r\n",
                                messages.len()
                            )
                            .into_bytes(),
                        )
                    }
                    Some(Folder::Broken) => {
                        *selected = None;
                        tagged("BAD Internal server error")
                    }
                    Some(Folder::Hanging) => Reply::Hang,
                    None => {
                        *selected = None;
                        tagged("NO Mailbox doesn't exist")
                    }
                }
            }
            Some("UID") => {
                let Some(folder) = selected.as_deref() else {
                    return tagged("BAD No mailbox selected");
                };
                match args.get(1).map(|sub| sub.to_ascii_uppercase()).as_deref() {
                    Some("SEARCH") => self.search(tag, folder, &args[2..]),
                    Some("FETCH") => self.fetch(tag, folder, command),
                    _ => tagged("BAD Unknown UID command"),
                }
            }
            Some("NOOP") => tagged("OK NOOP completed"),
            Some("LOGOUT") => Reply::Close(
                format!("* BYE Logging out\r\n{tag} OK LOGOUT completed\r\n").into_bytes(),
            ),
            _ => tagged("BAD Unknown command"),
        }
    }

    fn search(&self, tag: &str, folder: &str, keys: &[String]) -> Reply {
        let state = self.state.lock().unwrap();
        let Some(Folder::Messages(messages)) = state.folders.get(folder) else {
            return Reply::Send(format!("{tag} NO Folder gone\r\n").into_bytes());
        };

        let uids: Vec<String> = messages
            .iter()
            .filter(|message| matches_keys(message, keys))
            .map(|message| message.uid.to_string())
            .collect();

        let mut reply = String::from("* SEARCH");
        for uid in &uids {
            reply.push(' ');
            reply.push_str(uid);
        }
        reply.push_str(&format!("\r\n{tag} OK SEARCH completed\r\n"));
        Reply::Send(reply.into_bytes())
    }

    fn fetch(&self, tag: &str, folder: &str, command: &str) -> Reply {
        // UID FETCH <set> (<items>)
        let mut parts = command.splitn(4, ' ');
        let set = parts.nth(2).unwrap_or_default();
        let items = parts.next().unwrap_or_default().to_ascii_uppercase();
        let peek = items.contains("BODY.PEEK[]");
        let wanted = parse_uid_set(set);

        let mut state = self.state.lock().unwrap();
        let Some(Folder::Messages(messages)) = state.folders.get_mut(folder) else {
            return Reply::Send(format!("{tag} NO Folder gone\r\n").into_bytes());
        };

        let mut reply = Vec::new();
        for (index, message) in messages.iter_mut().enumerate() {
            if !wanted.contains(&message.uid) {
                continue;
            }
            if !peek {
                message.seen = true;
            }
            reply.extend_from_slice(
                format!(
                    "* {seq} FETCH (UID {uid} INTERNALDATE \"{date}\" BODY[] {{{len}}}\r\n",
                    seq = index + 1,
                    uid = message.uid,
                    date = message.date.format("%d-%b-%Y %H:%M:%S %z"),
                    len = message.raw.len(),
                )
                .as_bytes(),
            );
            reply.extend_from_slice(message.raw.as_bytes());
            reply.extend_from_slice(b")\r\n");
        }
        reply.extend_from_slice(format!("{tag} OK FETCH completed\r\n").as_bytes());
        Reply::Send(reply)
    }
}

fn matches_keys(message: &FakeMessage, keys: &[String]) -> bool {
    let mut keys = keys.iter();
    while let Some(key) = keys.next() {
        let matched = match key.to_ascii_uppercase().as_str() {
            "ALL" => true,
            "SEEN" => message.seen,
            "UNSEEN" => !message.seen,
            "SUBJECT" => keys.next().is_some_and(|value| {
                message
                    .subject
                    .to_lowercase()
                    .contains(&value.to_lowercase())
            }),
            "FROM" => keys
                .next()
                .is_some_and(|value| message.from.to_lowercase().contains(&value.to_lowercase())),
            "CHARSET" => {
                keys.next();
                true
            }
            _ => false,
        };
        if !matched {
            return false;
        }
    }
    true
}

fn parse_uid_set(set: &str) -> Vec<u32> {
    let mut uids = Vec::new();
    for part in set.split(',') {
        match part.split_once(':') {
            Some((start, end)) => {
                if let (Ok(start), Ok(end)) = (start.parse::<u32>(), end.parse::<u32>()) {
                    uids.extend(start..=end);
                }
            }
            None => uids.extend(part.parse::<u32>().ok()),
        }
    }
    uids
}

/// Splits IMAP arguments into atoms and unquoted strings.
fn tokens(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c == ' ' {
            chars.next();
            continue;
        }
        let mut token = String::new();
        if c == '"' {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => token.extend(chars.next()),
                    '"' => break,
                    c => token.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }
    tokens
}

/// Transport connecting to a [`FakeServer`] over in-memory streams.
#[derive(Debug)]
pub struct FakeTransport {
    server: FakeServer,
    opens: AtomicUsize,
    failures_left: AtomicUsize,
    targets: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new(server: FakeServer) -> Arc<Self> {
        Self::failing_first(server, 0)
    }

    /// The first `failures` opens fail with a refused connection.
    pub fn failing_first(server: FakeServer, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            server,
            opens: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(failures),
            targets: Mutex::new(Vec::new()),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// `host:port` of every open attempt.
    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, host: &str, port: u16) -> mailkit::Result<ImapStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let target = format!("{host}:{port}");
        self.targets.lock().unwrap().push(target.clone());

        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::TcpConnect {
                target,
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            });
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(self.server.clone().serve(server));
        Ok(Box::new(client))
    }
}

/// HTTP proxy on a local port answering every `CONNECT` with `502`.
#[derive(Debug, Clone)]
pub struct RefusingProxy {
    port: u16,
    accepted: Arc<AtomicUsize>,
}

impl RefusingProxy {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut reader = BufReader::new(socket);
                    let mut line = String::new();
                    while reader.read_line(&mut line).await.unwrap_or(0) > 0 {
                        if line == "\r\n" {
                            break;
                        }
                        line.clear();
                    }
                    let _ = reader
                        .into_inner()
                        .write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n")
                        .await;
                });
            }
        });

        Self { port, accepted }
    }

    /// Proxy settings pointing at this listener.
    pub fn config(&self) -> ProxyConfig {
        ProxyConfig::builder()
            .kind(ProxyKind::Http)
            .address("127.0.0.1")
            .port(u32::from(self.port))
            .timeout_secs(1)
            .build()
            .unwrap()
    }

    /// Number of TCP connections accepted so far.
    pub fn attempts(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}
