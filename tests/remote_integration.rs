//! Purpose: End-to-end tests for the HTTP server and the remote client.
//! Exports: None (integration test module).
//! Role: Validate publish/list/delete and error propagation across TCP.
//! Invariants: Uses a loopback-only server on a freshly picked port.
//! Invariants: Bounded waits avoid test flakiness.
//! Invariants: Server processes are cleaned up on drop.

use murmur::api::{ErrorKind, Message, RemoteClient, short_id};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::process::{Child, Command, Output, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

struct TestServer {
    child: Child,
    base_url: String,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    fn start() -> TestResult<Self> {
        Self::start_with_args(&[])
    }

    fn start_with_args(extra_args: &[&str]) -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let mut last_err: Option<Box<dyn std::error::Error>> = None;
        for _attempt in 0..3 {
            let port = pick_port()?;
            let bind = format!("127.0.0.1:{port}");
            let base_url = format!("http://{bind}");

            let mut child = Command::new(env!("CARGO_BIN_EXE_murmur"))
                .arg("serve")
                .arg("--bind")
                .arg(&bind)
                .args(extra_args)
                .env("RUST_LOG", "warn")
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()?;

            match wait_for_server(&mut child, bind.parse()?) {
                Ok(()) => {
                    return Ok(Self {
                        child,
                        base_url,
                        _server_guard: guard,
                    });
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    last_err = Some(err);
                    sleep(Duration::from_millis(30));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "server failed to start".into()))
    }

    fn client(&self) -> TestResult<RemoteClient> {
        Ok(RemoteClient::new(self.base_url.clone())?)
    }

    fn cli(&self, args: &[&str], stdin: Option<&str>) -> TestResult<Output> {
        let mut child = Command::new(env!("CARGO_BIN_EXE_murmur"))
            .args(args)
            .arg("--server")
            .arg(&self.base_url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut pipe) = child.stdin.take() {
            if let Some(text) = stdin {
                pipe.write_all(text.as_bytes())?;
            }
        }
        Ok(child.wait_with_output()?)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn collect(client: &RemoteClient) -> TestResult<Vec<Message>> {
    let mut stream = client.list()?;
    let mut messages = Vec::new();
    while let Some(message) = stream.next_message()? {
        messages.push(message);
    }
    Ok(messages)
}

#[test]
fn healthz_reports_ok_with_version_header() -> TestResult<()> {
    let server = TestServer::start()?;
    let resp = ureq::get(&format!("{}/healthz", server.base_url)).call()?;
    assert_eq!(resp.header("murmur-version"), Some("0"));
    let body: Value = serde_json::from_str(&resp.into_string()?)?;
    assert_eq!(body["ok"], true);
    Ok(())
}

#[test]
fn publish_then_list_preserves_order() -> TestResult<()> {
    let server = TestServer::start()?;
    let client = server.client()?;

    assert!(collect(&client)?.is_empty());

    let first = client.publish("alice", "hi")?;
    let second = client.publish("bob", "yo")?;
    let third = client.publish("alice", "")?;

    let messages = collect(&client)?;
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![first.as_str(), second.as_str(), third.as_str()]);
    assert_eq!(messages[0].sender_username, "alice");
    assert_eq!(messages[1].body, "yo");
    assert_eq!(messages[2].body, "");
    assert!(messages[0].sent_at <= messages[1].sent_at);
    Ok(())
}

#[test]
fn delete_by_prefix_removes_one_message() -> TestResult<()> {
    let server = TestServer::start()?;
    let client = server.client()?;

    let keep = client.publish("alice", "keep")?;
    let drop_id = client.publish("bob", "drop")?;

    let deleted = client.delete(short_id(&drop_id))?;
    assert_eq!(deleted, drop_id);

    let messages = collect(&client)?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, keep);
    Ok(())
}

#[test]
fn delete_missing_prefix_is_not_found() -> TestResult<()> {
    let server = TestServer::start()?;
    let client = server.client()?;
    client.publish("alice", "hi")?;

    // Uppercase never matches a lowercase hyphenated uuid.
    let err = client
        .delete("ZZZZ")
        .expect_err("no message should match");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.id(), Some("ZZZZ"));
    assert_eq!(collect(&client)?.len(), 1);
    Ok(())
}

#[test]
fn not_found_uses_error_envelope_and_404() -> TestResult<()> {
    let server = TestServer::start()?;
    let url = format!("{}/v0/messages/nothing-here", server.base_url);
    match ureq::delete(&url).call() {
        Err(ureq::Error::Status(code, resp)) => {
            assert_eq!(code, 404);
            let body: Value = serde_json::from_str(&resp.into_string()?)?;
            assert_eq!(body["error"]["kind"], "NotFound");
            assert_eq!(body["error"]["id"], "nothing-here");
        }
        other => panic!("expected 404, got {other:?}"),
    }
    Ok(())
}

#[test]
fn malformed_publish_is_usage_error() -> TestResult<()> {
    let server = TestServer::start()?;
    let url = format!("{}/v0/messages", server.base_url);
    match ureq::post(&url)
        .set("Content-Type", "application/json")
        .send_string("{\"sender_username\": 7}")
    {
        Err(ureq::Error::Status(code, _)) => assert!((400..500).contains(&code)),
        other => panic!("expected 4xx, got {other:?}"),
    }
    Ok(())
}

#[test]
fn oversized_publish_body_is_rejected() -> TestResult<()> {
    let server = TestServer::start_with_args(&["--max-body-bytes", "64"])?;
    let client = server.client()?;
    let long_body = "x".repeat(200);

    let url = format!("{}/v0/messages", server.base_url);
    let payload = serde_json::json!({ "sender_username": "alice", "body": long_body });
    match ureq::post(&url)
        .set("Content-Type", "application/json")
        .send_string(&payload.to_string())
    {
        Err(ureq::Error::Status(code, _)) => assert_eq!(code, 413),
        other => panic!("expected 413, got {other:?}"),
    }

    let err = client
        .publish("alice", &long_body)
        .expect_err("body over the limit");
    assert_eq!(err.kind(), ErrorKind::Usage);

    // Small bodies still fit.
    client.publish("alice", "short")?;
    assert_eq!(collect(&client)?.len(), 1);
    Ok(())
}

#[test]
fn list_concurrency_limit_reports_busy_until_stream_ends() -> TestResult<()> {
    let server = TestServer::start_with_args(&["--max-list-concurrency", "1"])?;
    let client = server.client()?;

    // Far more than loopback socket buffers plus the list channel can hold,
    // so an unread stream keeps its permit.
    let chunk = "m".repeat(64 * 1024);
    for _ in 0..512 {
        client.publish("alice", &chunk)?;
    }

    let mut held = client.list()?;

    let url = format!("{}/v0/messages", server.base_url);
    match ureq::get(&url).call() {
        Err(ureq::Error::Status(code, resp)) => {
            assert_eq!(code, 423);
            let body: Value = serde_json::from_str(&resp.into_string()?)?;
            assert_eq!(body["error"]["kind"], "Busy");
        }
        other => panic!("expected 423, got {other:?}"),
    }
    match client.list() {
        Err(err) => assert_eq!(err.kind(), ErrorKind::Busy),
        Ok(_) => panic!("second list should be refused"),
    }

    held.cancel();
    drop(held);

    let start = Instant::now();
    loop {
        match collect(&client) {
            Ok(messages) => {
                assert_eq!(messages.len(), 512);
                break;
            }
            Err(err) => {
                let busy = err
                    .downcast_ref::<murmur::api::Error>()
                    .is_some_and(|err| err.kind() == ErrorKind::Busy);
                assert!(busy, "unexpected list error: {err}");
                assert!(
                    start.elapsed() < Duration::from_secs(8),
                    "list permit was never released"
                );
                sleep(Duration::from_millis(20));
            }
        }
    }
    Ok(())
}

#[test]
fn two_users_chat_and_delete_flow() -> TestResult<()> {
    let server = TestServer::start()?;
    let alice = server.client()?;
    let bob = server.client()?;

    let hello = alice.publish("alice", "hello")?;
    bob.publish("bob", "hey alice")?;
    alice.publish("alice", "bye")?;

    let seen_by_bob = collect(&bob)?;
    let bodies: Vec<&str> = seen_by_bob.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["hello", "hey alice", "bye"]);

    alice.delete(&hello[..4])?;
    let bodies: Vec<String> = collect(&bob)?.into_iter().map(|m| m.body).collect();
    assert_eq!(bodies, vec!["hey alice".to_string(), "bye".to_string()]);
    Ok(())
}

#[test]
fn cancelled_list_does_not_wedge_server() -> TestResult<()> {
    let server = TestServer::start()?;
    let client = server.client()?;
    for i in 0..64 {
        client.publish("alice", &format!("message {i}"))?;
    }

    let mut stream = client.list()?;
    assert!(stream.next_message()?.is_some());
    stream.cancel();

    let id = client.publish("bob", "still here")?;
    let messages = collect(&client)?;
    assert_eq!(messages.len(), 65);
    assert_eq!(messages.last().map(|m| m.id.as_str()), Some(id.as_str()));
    Ok(())
}

#[test]
fn cli_chat_listen_delete_round() -> TestResult<()> {
    let server = TestServer::start()?;

    let chat = server.cli(&["chat", "--username", "alice", "--message", "hi there"], None)?;
    assert!(chat.status.success());
    let stdout = String::from_utf8(chat.stdout)?;
    let short = stdout
        .trim()
        .strip_prefix("sent message ")
        .ok_or("missing sent message line")?
        .to_string();
    assert_eq!(short.len(), 8);

    // Prompted input, one answer per line.
    let chat = server.cli(&["chat", "--json"], Some("bob\nhello from stdin\n"))?;
    assert!(chat.status.success());
    let stdout = String::from_utf8(chat.stdout)?;
    assert!(stdout.starts_with("enter your username: enter your message: "));
    let start = stdout.find('{').ok_or("missing json object")?;
    let prompted_id = serde_json::from_str::<Value>(stdout[start..].trim())?["id"]
        .as_str()
        .ok_or("id")?
        .to_string();

    let listen = server.cli(&["listen"], None)?;
    assert!(listen.status.success());
    let text = String::from_utf8(listen.stdout)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("[@alice] "));
    assert_eq!(lines[1], "  hi there");
    assert!(lines[2].starts_with("[@bob] "));
    assert_eq!(lines[3], "  hello from stdin");

    let delete = server.cli(&["delete", &short], None)?;
    assert!(delete.status.success());
    assert_eq!(String::from_utf8(delete.stdout)?.trim(), format!("deleted {short}"));

    let listen = server.cli(&["listen", "--json"], None)?;
    let text = String::from_utf8(listen.stdout)?;
    let remaining: Vec<Message> = text
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, prompted_id);
    Ok(())
}

#[test]
fn cli_delete_missing_prefix_exits_not_found() -> TestResult<()> {
    let server = TestServer::start()?;
    let delete = server.cli(&["delete", "ZZZZ"], None)?;
    assert_eq!(delete.status.code(), Some(3));
    let stderr = String::from_utf8(delete.stderr)?;
    let value: Value = serde_json::from_str(stderr.trim())?;
    assert_eq!(value["error"]["kind"], "NotFound");
    assert_eq!(value["error"]["id"], "ZZZZ");
    Ok(())
}

fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn wait_for_server(child: &mut Child, addr: SocketAddr) -> TestResult<()> {
    let url = format!("http://{addr}/healthz");
    let start = Instant::now();
    loop {
        if let Ok(resp) = ureq::get(&url).call() {
            if resp.status() == 200 {
                return Ok(());
            }
        }
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            let detail = stderr.trim();
            return Err(format!(
                "server exited before ready (status: {status}, stderr: {})",
                if detail.is_empty() { "<empty>" } else { detail }
            )
            .into());
        }
        if start.elapsed() > Duration::from_secs(8) {
            return Err("server did not start in time".into());
        }
        sleep(Duration::from_millis(20));
    }
}
