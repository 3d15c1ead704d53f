//! End-to-end tests against a running broker: real sockets, real frames.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use stompmq::{BrokerConfig, ReactorHandle, ReactorServer};

const HOST: &str = "stomp.cs.bgu.ac.il";

/// Bind a broker on an ephemeral port and run it on a background thread.
fn start_broker() -> (SocketAddr, ReactorHandle) {
    let config = BrokerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    let server = ReactorServer::bind(config).expect("failed to bind broker");
    let addr = server.local_addr();
    let handle = server.handle();
    std::thread::spawn(move || server.run().expect("broker loop failed"));
    (addr, handle)
}

/// Minimal test client: writes raw bytes, reassembles zero-terminated
/// frames off the stream.
struct TestClient {
    stream: TcpStream,
    pending: Vec<u8>,
}

impl TestClient {
    fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("failed to connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write failed");
    }

    /// Block until one full frame arrives; returns its text without the
    /// terminator.
    fn read_frame(&mut self) -> String {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == 0) {
                let frame: Vec<u8> = self.pending.drain(..=pos).collect();
                return String::from_utf8_lossy(&frame[..frame.len() - 1]).to_string();
            }
            let mut buf = [0u8; 1024];
            let n = self.stream.read(&mut buf).expect("read failed");
            assert!(n > 0, "connection closed while waiting for a frame");
            self.pending.extend_from_slice(&buf[..n]);
        }
    }

    fn login(&mut self, user: &str, passcode: &str) {
        self.send_raw(
            format!(
                "CONNECT\naccept-version:1.2\nhost:{}\nlogin:{}\npasscode:{}\n\n\0",
                HOST, user, passcode
            )
            .as_bytes(),
        );
        let reply = self.read_frame();
        assert!(reply.starts_with("CONNECTED"), "unexpected reply: {}", reply);
        assert!(reply.contains("version:1.2"));
    }

    fn subscribe(&mut self, destination: &str, id: u32) {
        self.send_raw(
            format!("SUBSCRIBE\ndestination:{}\nid:{}\n\n\0", destination, id).as_bytes(),
        );
    }

    fn send_message(&mut self, destination: &str, user: &str, body: &str) {
        self.send_raw(
            format!("SEND\ndestination:{}\nuser:{}\n\n{}\0", destination, user, body).as_bytes(),
        );
    }
}

#[test]
fn test_connect_yields_connected_frame() {
    let (addr, _handle) = start_broker();
    let mut client = TestClient::connect(addr);
    client.login("alice", "secret");
}

#[test]
fn test_connect_with_wrong_password_is_rejected() {
    let (addr, _handle) = start_broker();
    let mut alice = TestClient::connect(addr);
    alice.login("alice", "secret");

    let mut intruder = TestClient::connect(addr);
    intruder.send_raw(
        format!(
            "CONNECT\naccept-version:1.2\nhost:{}\nlogin:alice\npasscode:wrong\n\n\0",
            HOST
        )
        .as_bytes(),
    );
    let reply = intruder.read_frame();
    assert!(reply.starts_with("ERROR"), "unexpected reply: {}", reply);
    assert!(reply.contains("Incorrect password"));
}

#[test]
fn test_second_login_while_logged_in_is_rejected() {
    let (addr, _handle) = start_broker();
    let mut alice = TestClient::connect(addr);
    alice.login("alice", "secret");

    let mut twin = TestClient::connect(addr);
    twin.send_raw(
        format!(
            "CONNECT\naccept-version:1.2\nhost:{}\nlogin:alice\npasscode:secret\n\n\0",
            HOST
        )
        .as_bytes(),
    );
    let reply = twin.read_frame();
    assert!(reply.starts_with("ERROR"), "unexpected reply: {}", reply);
    assert!(reply.contains("already logged in"));
}

#[test]
fn test_frame_split_across_writes_is_reassembled() {
    let (addr, _handle) = start_broker();
    let mut client = TestClient::connect(addr);

    let frame = format!(
        "CONNECT\naccept-version:1.2\nhost:{}\nlogin:carol\npasscode:pw\n\n\0",
        HOST
    );
    let bytes = frame.as_bytes();
    let (first, second) = bytes.split_at(bytes.len() / 2);
    client.send_raw(first);
    std::thread::sleep(Duration::from_millis(50));
    client.send_raw(second);

    let reply = client.read_frame();
    assert!(reply.starts_with("CONNECTED"), "unexpected reply: {}", reply);
}

#[test]
fn test_send_without_subscription_is_rejected() {
    let (addr, _handle) = start_broker();
    let mut client = TestClient::connect(addr);
    client.login("dave", "pw");

    client.send_message("/news", "dave", "hello");
    let reply = client.read_frame();
    assert!(reply.starts_with("ERROR"), "unexpected reply: {}", reply);
    assert!(reply.contains("not subscribed"));
}

#[test]
fn test_publish_fans_out_to_all_subscribers() {
    let (addr, _handle) = start_broker();

    let mut alice = TestClient::connect(addr);
    alice.login("alice", "secret");
    alice.subscribe("news", 1);
    // SUBSCRIBE has no acknowledgement; a self-delivered message proves the
    // subscription is registered before anyone else publishes.
    alice.send_message("/news", "alice", "warmup");
    let warmup = alice.read_frame();
    assert!(warmup.starts_with("MESSAGE"), "unexpected reply: {}", warmup);
    assert!(warmup.contains("destination:/news"));

    let mut bob = TestClient::connect(addr);
    bob.login("bob", "hunter2");
    bob.subscribe("news", 7);
    bob.send_message("/news", "bob", "hello from bob");

    // Bob receives his own message; the subscription header carries the
    // sender's subscription id.
    let to_bob = bob.read_frame();
    assert!(to_bob.starts_with("MESSAGE"), "unexpected reply: {}", to_bob);
    assert!(to_bob.contains("subscription:7"));
    assert!(to_bob.contains("user:bob"));
    assert!(to_bob.ends_with("hello from bob"));

    // Alice receives the same publish with a later message id than her
    // warmup message.
    let to_alice = alice.read_frame();
    assert!(to_alice.starts_with("MESSAGE"));
    assert!(to_alice.ends_with("hello from bob"));
    let warmup_id = extract_message_id(&warmup);
    let fanout_id = extract_message_id(&to_alice);
    assert!(fanout_id > warmup_id);
}

#[test]
fn test_disconnect_yields_receipt() {
    let (addr, _handle) = start_broker();
    let mut client = TestClient::connect(addr);
    client.login("erin", "pw");

    client.send_raw(b"DISCONNECT\nreceipt:77\n\n\0");
    let reply = client.read_frame();
    assert!(reply.starts_with("RECEIPT"), "unexpected reply: {}", reply);
    assert!(reply.contains("receipt-id:77"));
}

#[test]
fn test_disconnect_before_connect_is_an_error() {
    let (addr, _handle) = start_broker();
    let mut client = TestClient::connect(addr);

    client.send_raw(b"DISCONNECT\nreceipt:9\n\n\0");
    let reply = client.read_frame();
    assert!(reply.starts_with("ERROR"), "unexpected reply: {}", reply);
    assert!(reply.contains("not logged in"));
}

#[test]
fn test_unknown_command_yields_error_and_connection_survives() {
    let (addr, _handle) = start_broker();
    let mut client = TestClient::connect(addr);

    client.send_raw(b"NACK\n\n\0");
    let reply = client.read_frame();
    assert!(reply.starts_with("ERROR"), "unexpected reply: {}", reply);
    assert!(reply.contains("Unknown command: NACK"));

    // The connection is still usable after an ERROR.
    client.login("frank", "pw");
}

#[test]
fn test_user_can_relogin_after_disconnect() {
    let (addr, _handle) = start_broker();
    let mut first = TestClient::connect(addr);
    first.login("grace", "pw");
    first.send_raw(b"DISCONNECT\nreceipt:1\n\n\0");
    let reply = first.read_frame();
    assert!(reply.starts_with("RECEIPT"));

    // The session was released, so a fresh connection may log in again.
    let mut second = TestClient::connect(addr);
    second.login("grace", "pw");
}

#[test]
fn test_shutdown_stops_the_reactor() {
    let config = BrokerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    };
    let server = ReactorServer::bind(config).unwrap();
    let handle = server.handle();
    let join = std::thread::spawn(move || server.run());

    handle.shutdown();
    join.join().unwrap().expect("broker loop failed");
}

fn extract_message_id(frame: &str) -> u64 {
    frame
        .lines()
        .find_map(|line| line.strip_prefix("message-id:"))
        .expect("frame has no message-id header")
        .parse()
        .expect("message-id is not an integer")
}
