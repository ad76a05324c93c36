//! End-to-end tests for the SMTP engine.
//!
//! These drive the public `SmtpClient` against a scripted server listening
//! on a loopback socket, so the full pipeline is exercised: TCP connect,
//! banner, EHLO, the submission dialog, and teardown.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use mailferry_smtp::{AuthMechanism, AuthMode, Capability, SessionState, SmtpClient, SmtpEvent};

/// Starts a minimal scripted SMTP server for a single connection.
async fn spawn_server() -> (std::net::SocketAddr, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept");
        serve(socket).await
    });

    (addr, handle)
}

/// Answers one SMTP session, returning every command line received.
async fn serve(mut socket: TcpStream) -> Vec<String> {
    let (reader, mut writer) = socket.split();
    let mut lines = BufReader::new(reader).lines();
    let mut received = Vec::new();
    let mut in_data = false;

    writer
        .write_all(b"220 test.example.com ready\r\n")
        .await
        .expect("banner");

    while let Ok(Some(line)) = lines.next_line().await {
        received.push(line.clone());

        if in_data {
            if line == "." {
                in_data = false;
                writer.write_all(b"250 queued\r\n").await.expect("queued");
            }
            continue;
        }

        let reply: &[u8] = if line.starts_with("EHLO") {
            b"250-test.example.com\r\n250-PIPELINING\r\n250-8BITMIME\r\n250 AUTH PLAIN LOGIN\r\n"
        } else if line.starts_with("MAIL FROM") || line.starts_with("RCPT TO") {
            b"250 ok\r\n"
        } else if line == "DATA" {
            in_data = true;
            b"354 go ahead\r\n"
        } else if line == "AUTH PLAIN" {
            b"334 \r\n"
        } else if line == "QUIT" {
            writer.write_all(b"221 bye\r\n").await.expect("bye");
            break;
        } else {
            // the AUTH PLAIN answer, or anything else
            b"235 ok\r\n"
        };
        writer.write_all(reply).await.expect("reply");
    }

    received
}

/// Collects events until `Done(true)` or the timeout trips.
async fn collect_until_done(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<SmtpEvent>,
) -> Vec<SmtpEvent> {
    let mut collected = Vec::new();
    let deadline = Duration::from_secs(10);
    loop {
        let event = tokio::time::timeout(deadline, events.recv())
            .await
            .expect("timed out waiting for events")
            .expect("event channel closed");
        let done = event == SmtpEvent::Done(true);
        collected.push(event);
        if done {
            return collected;
        }
    }
}

fn finished(events: &[SmtpEvent], id: mailferry_smtp::CommandId) -> Option<bool> {
    events.iter().find_map(|event| match event {
        SmtpEvent::CommandFinished { id: fid, error } if *fid == id => Some(*error),
        _ => None,
    })
}

#[tokio::test]
async fn submit_a_message_end_to_end() {
    let (addr, server) = spawn_server().await;
    let (client, mut events) = SmtpClient::spawn();

    let connect_id = client.connect_to_host(addr.ip().to_string(), addr.port());
    let mail_id = client.send_mail(
        "sender@example.com",
        ["one@example.net", "two@example.net"],
        &b"Subject: greetings\r\n\r\nHello over loopback.\r\n"[..],
    );
    let quit_id = client.disconnect_from_host();

    let events = collect_until_done(&mut events).await;

    assert_eq!(finished(&events, connect_id), Some(false));
    assert_eq!(finished(&events, mail_id), Some(false));
    assert_eq!(finished(&events, quit_id), Some(false));
    assert!(events.contains(&SmtpEvent::Connected));
    assert!(events.contains(&SmtpEvent::Disconnected));

    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(client.options().contains(Capability::Pipelining));
    assert!(client.options().contains(Capability::EightBitMime));
    assert_eq!(
        client.supported_auth_modes(),
        [AuthMechanism::Plain, AuthMechanism::Login].into()
    );

    let received = server.await.expect("server task");
    let commands: Vec<&str> = received
        .iter()
        .map(String::as_str)
        .filter(|line| {
            line.starts_with("MAIL FROM")
                || line.starts_with("RCPT TO")
                || *line == "DATA"
                || *line == "QUIT"
        })
        .collect();
    assert_eq!(
        commands,
        vec![
            "MAIL FROM:<sender@example.com>",
            "RCPT TO:<one@example.net>",
            "RCPT TO:<two@example.net>",
            "DATA",
            "QUIT",
        ]
    );
    assert!(received.contains(&"Subject: greetings".to_string()));
    assert!(received.contains(&".".to_string()));
}

#[tokio::test]
async fn authenticate_end_to_end() {
    let (addr, server) = spawn_server().await;
    let (client, mut events) = SmtpClient::spawn();

    let connect_id = client.connect_to_host(addr.ip().to_string(), addr.port());
    let auth_id = client.authenticate("user", "secret", AuthMode::Any);
    let quit_id = client.disconnect_from_host();

    let events = collect_until_done(&mut events).await;

    assert_eq!(finished(&events, connect_id), Some(false));
    assert_eq!(finished(&events, auth_id), Some(false));
    assert_eq!(finished(&events, quit_id), Some(false));
    assert!(events.contains(&SmtpEvent::Authenticated));

    // the wire log shows a placeholder, never the credentials
    assert!(events
        .iter()
        .any(|event| matches!(event, SmtpEvent::Sent(bytes)
            if bytes.starts_with(b"*** [sending authentication data"))));

    let received = server.await.expect("server task");
    assert!(received.contains(&"AUTH PLAIN".to_string()));
    // base64("\0user\0secret")
    assert!(received.contains(&"AHVzZXIAc2VjcmV0".to_string()));
}

#[tokio::test]
async fn raw_command_round_trip() {
    let (addr, _server) = spawn_server().await;
    let (client, mut events) = SmtpClient::spawn();

    client.connect_to_host(addr.ip().to_string(), addr.port());
    let raw_id = client.raw_command("NOOP");
    let quit_id = client.disconnect_from_host();

    let events = collect_until_done(&mut events).await;

    assert_eq!(finished(&events, raw_id), Some(false));
    assert_eq!(finished(&events, quit_id), Some(false));
    assert!(events.iter().any(|event| matches!(
        event,
        SmtpEvent::RawReply { code: 235, .. }
    )));
}

#[tokio::test]
async fn connection_refused_is_an_aggregate_failure() {
    // bind-then-drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let (client, mut events) = SmtpClient::spawn();
    let connect_id = client.connect_to_host(addr.ip().to_string(), addr.port());

    let mut collected = Vec::new();
    let deadline = Duration::from_secs(10);
    loop {
        let event = tokio::time::timeout(deadline, events.recv())
            .await
            .expect("timed out waiting for events")
            .expect("event channel closed");
        let done = event == SmtpEvent::Done(false);
        collected.push(event);
        if done {
            break;
        }
    }

    assert_eq!(finished(&collected, connect_id), Some(true));
    assert!(collected
        .iter()
        .any(|event| matches!(event, SmtpEvent::SocketError { .. })));
    assert_eq!(client.state(), SessionState::Disconnected);
}
