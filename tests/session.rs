//! IMAP session state machine against the in-process server.

mod support;

use chrono::{TimeDelta, Utc};
use mailkit::{Error, ImapSession, ScanQuery, SearchCriteria, SessionState};
use std::time::Duration;
use support::{FakeMessage, FakeServer, FakeTransport, EMAIL, PASSWORD};

const TIMEOUT: Duration = Duration::from_secs(5);

fn session(server: &FakeServer) -> ImapSession {
    ImapSession::new(FakeTransport::new(server.clone()), TIMEOUT)
}

async fn selected(server: &FakeServer) -> ImapSession {
    let mut session = session(server);
    session.connect("imap.gmail.com", 993).await.unwrap();
    session.login(EMAIL, PASSWORD).await.unwrap();
    assert!(session.select_folder("INBOX").await.unwrap());
    session
}

fn mailbox() -> FakeServer {
    let now = Utc::now();
    FakeServer::new().folder(
        "INBOX",
        vec![
            FakeMessage::text(9, "a@shop.example", "Invoice 9", now, "nine"),
            FakeMessage::text(4, "a@shop.example", "Invoice 4", now, "four"),
            FakeMessage::text(
                5,
                "b@other.example",
                "Newsletter",
                now - TimeDelta::hours(1),
                "five",
            ),
        ],
    )
}

#[tokio::test]
async fn test_happy_path_transitions() {
    let server = mailbox();
    let mut session = session(&server);
    assert_eq!(session.state(), SessionState::Disconnected);

    session.connect("imap.gmail.com", 993).await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);

    session.login(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);

    assert!(session.select_folder("INBOX").await.unwrap());
    assert_eq!(session.state(), SessionState::FolderSelected);
    assert_eq!(session.selected_folder(), Some("INBOX"));

    session.logout().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(server.count("LOGOUT"), 1);
}

#[tokio::test]
async fn test_commands_out_of_order() {
    let server = mailbox();
    let mut session = session(&server);

    let err = session.login(EMAIL, PASSWORD).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            operation: "login",
            expected: SessionState::Connected,
            actual: SessionState::Disconnected,
        }
    ));

    session.connect("imap.gmail.com", 993).await.unwrap();
    let err = session.connect("imap.gmail.com", 993).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { operation: "connect", .. }));

    let err = session.select_folder("INBOX").await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { operation: "select", .. }));

    session.login(EMAIL, PASSWORD).await.unwrap();
    let criteria = ScanQuery::new().subject("Invoice").criteria().clone();
    let err = session.search(&criteria).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidState {
            operation: "search",
            expected: SessionState::FolderSelected,
            actual: SessionState::Authenticated,
        }
    ));
    let err = session.fetch(&[], true).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { operation: "fetch", .. }));

    assert!(!err.is_retryable());
    // Nothing reached the server but the login.
    assert_eq!(server.commands().len(), 1);
}

#[tokio::test]
async fn test_rejected_login_stays_connected() {
    let server = mailbox();
    let mut session = session(&server);
    session.connect("imap.gmail.com", 993).await.unwrap();

    let err = session.login(EMAIL, "wrong").await.unwrap_err();
    assert!(matches!(err, Error::ImapLogin { ref email, .. } if email == EMAIL));
    assert_eq!(session.state(), SessionState::Connected);

    session.login(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_refused_select_keeps_session() {
    let server = mailbox();
    let mut session = selected(&server).await;

    assert!(!session.select_folder("Nope").await.unwrap());
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(session.selected_folder(), None);

    assert!(session.select_folder("INBOX").await.unwrap());
}

#[tokio::test]
async fn test_bad_select_is_an_error() {
    let server = mailbox().broken_folder("SENT");
    let mut session = selected(&server).await;

    let err = session.select_folder("SENT").await.unwrap_err();
    assert!(matches!(err, Error::SelectMailbox { ref mailbox, .. } if mailbox == "SENT"));
    assert!(err.is_retryable());
    assert_eq!(session.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_select_timeout_drops_connection() {
    let server = mailbox().hanging_folder("Slow");
    let mut session = ImapSession::new(
        FakeTransport::new(server.clone()),
        Duration::from_millis(200),
    );
    session.connect("imap.gmail.com", 993).await.unwrap();
    session.login(EMAIL, PASSWORD).await.unwrap();

    let err = session.select_folder("Slow").await.unwrap_err();
    assert!(matches!(err, Error::SelectTimeout { .. }));
    assert_eq!(session.state(), SessionState::Disconnected);

    // A dropped session can be opened again.
    session.connect("imap.gmail.com", 993).await.unwrap();
    assert_eq!(session.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_search_returns_sorted_uids() {
    let server = mailbox();
    let mut session = selected(&server).await;

    let criteria = ScanQuery::new().subject("Invoice").criteria().clone();
    assert_eq!(session.search(&criteria).await.unwrap(), [4, 9]);

    let criteria = ScanQuery::new().sender("b@other.example").criteria().clone();
    assert_eq!(session.search(&criteria).await.unwrap(), [5]);

    let criteria = ScanQuery::new().subject("Receipt").criteria().clone();
    assert!(session.search(&criteria).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_with_line_break_sends_nothing() {
    let server = mailbox();
    let mut session = selected(&server).await;
    let before = server.commands().len();

    let criteria = SearchCriteria {
        subject: Some("x\r\nA999 DELETE Trash".into()),
        ..SearchCriteria::default()
    };
    let err = session.search(&criteria).await.unwrap_err();

    assert!(matches!(err, Error::InvalidQuery { .. }));
    assert_eq!(server.commands().len(), before);
    assert_eq!(server.count("DELETE"), 0);
    assert_eq!(session.state(), SessionState::FolderSelected);
}

#[tokio::test]
async fn test_fetch_decodes_messages() {
    let server = mailbox();
    let mut session = selected(&server).await;

    let records = session.fetch(&[4, 5], false).await.unwrap();
    assert_eq!(records.len(), 2);

    let four = records.iter().find(|record| record.uid == 4).unwrap();
    assert_eq!(four.subject.as_deref(), Some("Invoice 4"));
    assert_eq!(four.from.as_deref(), Some("a@shop.example"));
    assert_eq!(four.content().map(str::trim), Some("four"));
    assert!(!server.is_seen("INBOX", 4));

    session.fetch(&[9], true).await.unwrap();
    assert!(server.is_seen("INBOX", 9));
}

#[tokio::test]
async fn test_fetch_nothing_sends_nothing() {
    let server = mailbox();
    let mut session = selected(&server).await;
    let before = server.commands().len();

    assert!(session.fetch(&[], true).await.unwrap().is_empty());
    assert_eq!(server.commands().len(), before);
}

#[tokio::test]
async fn test_closed_session_is_terminal() {
    let server = mailbox();
    let mut session = selected(&server).await;

    session.logout().await.unwrap();
    session.logout().await.unwrap();
    assert_eq!(server.count("LOGOUT"), 1);

    session.disconnect();
    assert_eq!(session.state(), SessionState::Closed);

    let err = session.connect("imap.gmail.com", 993).await.unwrap_err();
    assert!(matches!(err, Error::SessionClosed));
}

#[tokio::test]
async fn test_logout_without_login_sends_nothing() {
    let server = mailbox();
    let mut session = session(&server);
    session.connect("imap.gmail.com", 993).await.unwrap();

    session.logout().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert!(server.commands().is_empty());
}

#[tokio::test]
async fn test_disconnect_resets_to_disconnected() {
    let server = mailbox();
    let mut session = selected(&server).await;

    session.disconnect();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert_eq!(session.selected_folder(), None);
}
