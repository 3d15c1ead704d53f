//! Per-connection protocol state machine.
//!
//! One engine per connection. The engine consumes decoded frames in the
//! order the connection's worker lane delivers them, enforces the command
//! grammar, and talks to the rest of the broker only through the injected
//! [`Registry`]. Validation short-circuits: the first failing check sends an
//! ERROR frame back to the same connection and performs no state change.
//! An ERROR frame does not terminate the connection.

use crate::broker::registry::{FrameSink, Registry};
use crate::config::BrokerConfig;
use crate::protocol::{Command, ConnectionId, Frame, SubscriptionId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Pause after sending RECEIPT so it flushes ahead of teardown. Blocks only
/// this connection's lane, never the control thread.
const RECEIPT_DRAIN_PAUSE: Duration = Duration::from_millis(100);

/// Protocol state machine for a single connection.
pub struct StompEngine {
    connection_id: ConnectionId,
    registry: Arc<Registry>,
    sink: Arc<dyn FrameSink>,
    config: Arc<BrokerConfig>,
    /// Topic key -> subscription id for this connection only.
    subscriptions: HashMap<String, SubscriptionId>,
    connected: bool,
    should_terminate: bool,
}

impl StompEngine {
    pub fn new(
        connection_id: ConnectionId,
        registry: Arc<Registry>,
        sink: Arc<dyn FrameSink>,
        config: Arc<BrokerConfig>,
    ) -> Self {
        Self {
            connection_id,
            registry,
            sink,
            config,
            subscriptions: HashMap::new(),
            connected: false,
            should_terminate: false,
        }
    }

    /// Process one decoded frame. Frames for one connection arrive here
    /// strictly in the order they were read off the socket.
    pub fn process(&mut self, frame: Frame) {
        debug!("connection {}: {}", self.connection_id, frame);
        match Command::parse(frame.command()) {
            Some(Command::Connect) => self.handle_connect(&frame),
            Some(Command::Send) => self.handle_send(&frame),
            Some(Command::Subscribe) => self.handle_subscribe(&frame),
            Some(Command::Unsubscribe) => self.handle_unsubscribe(&frame),
            Some(Command::Disconnect) => self.handle_disconnect(&frame),
            None => self.send_error(
                &format!("Unknown command: {}", frame.command()),
                &format!("The command {} is not recognized", frame.command()),
            ),
        }
    }

    /// True once the connection should be torn down. The close sequence
    /// itself (socket teardown, registry removal) is driven by the reactor
    /// observing this flag, not by the engine.
    pub fn should_terminate(&self) -> bool {
        self.should_terminate
    }

    fn handle_connect(&mut self, frame: &Frame) {
        if self.connected {
            self.send_error(
                "Client is already connected",
                "client is already connected, logout before trying to login",
            );
            return;
        }

        let supported = self.config.supported_version.as_str();
        let version = frame.header("accept-version");
        if version != Some(supported) {
            self.send_error(
                "accept-version is invalid or missing",
                &format!(
                    "version is invalid or missing, expected version: {}",
                    supported
                ),
            );
            return;
        }

        let valid_host = self.config.valid_host.as_str();
        if frame.header("host") != Some(valid_host) {
            self.send_error(
                "host is invalid or missing",
                &format!("host is invalid or missing, expected host: {}", valid_host),
            );
            return;
        }

        let (login, passcode) = match (frame.header("login"), frame.header("passcode")) {
            (Some(login), Some(passcode)) => (login.to_string(), passcode.to_string()),
            _ => {
                self.send_error(
                    "login or passcode are missing",
                    "need to enter login and passcode",
                );
                return;
            }
        };

        if self.registry.user_exists(&login) {
            if !self.registry.credentials_match(&login, &passcode) {
                self.send_error(
                    "Incorrect password",
                    &format!("Incorrect password for existing user: {}", login),
                );
                return;
            }
            if self.registry.is_logged_in(&login) {
                self.send_error("User is already logged in", "User is already logged in");
                return;
            }
        }

        self.registry.register_credentials(&login, &passcode);
        // login() is the atomic gate: of two racing CONNECTs for the same
        // user, exactly one binds the session.
        if !self.registry.login(&login, self.connection_id) {
            self.send_error("User is already logged in", "User is already logged in");
            return;
        }
        self.registry
            .register_connection(self.connection_id, self.sink.clone());

        self.connected = true;
        self.registry
            .deliver(self.connection_id, Frame::connected(supported));
        info!(
            "connection {} authenticated as '{}'",
            self.connection_id, login
        );
    }

    fn handle_subscribe(&mut self, frame: &Frame) {
        let (destination, id) = match (frame.header("destination"), frame.header("id")) {
            (Some(destination), Some(id)) => (destination, id),
            _ => {
                self.send_error("destination or id are missing", "destination or id are null");
                return;
            }
        };

        let topic = format!("/{}", destination);
        if self.subscriptions.contains_key(&topic) {
            // Already subscribed: silent no-op, not an error.
            return;
        }

        match id.parse::<SubscriptionId>() {
            Ok(subscription_id) => {
                self.subscriptions.insert(topic.clone(), subscription_id);
                self.registry.subscribe(self.connection_id, &topic);
                debug!(
                    "connection {} subscribed to {} (id {})",
                    self.connection_id, topic, subscription_id
                );
            }
            Err(_) => {
                self.send_error("Invalid 'id': must be an integer", "id must be an integer");
            }
        }
    }

    fn handle_unsubscribe(&mut self, frame: &Frame) {
        let id = match frame.header("id") {
            Some(id) => id,
            None => {
                self.send_error("id is missing", "id is missing");
                return;
            }
        };

        let subscription_id = match id.parse::<SubscriptionId>() {
            Ok(subscription_id) => subscription_id,
            Err(_) => {
                self.send_error("id must be an integer", "id must be an integer");
                return;
            }
        };

        let topic = self
            .subscriptions
            .iter()
            .find(|(_, sub_id)| **sub_id == subscription_id)
            .map(|(topic, _)| topic.clone());
        let topic = match topic {
            Some(topic) => topic,
            // No subscription with that id: no-op.
            None => return,
        };

        self.subscriptions.remove(&topic);
        self.registry.unsubscribe(self.connection_id, &topic);
        debug!(
            "connection {} unsubscribed from {}",
            self.connection_id, topic
        );
    }

    fn handle_send(&mut self, frame: &Frame) {
        let destination = match frame.header("destination") {
            Some(destination) if !destination.is_empty() => destination,
            _ => {
                self.send_error(
                    "destination header is empty in SEND frame",
                    "The SEND frame must contain a destination header",
                );
                return;
            }
        };

        let body = frame.body();
        if body.is_empty() {
            self.send_error(
                "message body is empty in SEND frame",
                "The SEND frame must contain a non-empty message body",
            );
            return;
        }

        // Senders must hold a subscription to the destination they publish
        // to. Unusual for a broker, but observable behavior of this
        // protocol, so it stays.
        let subscription_id = match self.subscriptions.get(destination) {
            Some(subscription_id) => *subscription_id,
            None => {
                let reason = format!("Client is not subscribed to: {}", destination);
                self.send_error(&reason, &reason);
                return;
            }
        };

        let user = match frame.header("user") {
            Some(user) if !user.is_empty() => user,
            _ => {
                self.send_error(
                    "user not found in message body",
                    "The SEND frame must contain a 'user' in the message body",
                );
                return;
            }
        };

        let message_id = self.registry.next_message_id();
        let message = Frame::message(destination, subscription_id, user, message_id, body);
        self.registry.publish(destination, message);
        debug!(
            "connection {} published message {} to {}",
            self.connection_id, message_id, destination
        );
    }

    fn handle_disconnect(&mut self, frame: &Frame) {
        let receipt_id = match frame.header("receipt") {
            Some(receipt_id) => receipt_id.to_string(),
            None => {
                self.send_error("receiptID is missing", "receiptID is missing");
                return;
            }
        };
        if !self.connected {
            self.send_error(
                "user is not logged in",
                "user is not logged in, need to login first",
            );
            return;
        }

        self.registry
            .deliver(self.connection_id, Frame::receipt(&receipt_id));
        self.should_terminate = true;
        self.registry.logout(self.connection_id);

        // Let the receipt flush before subscriptions are torn down. Only
        // this connection's lane blocks here.
        std::thread::sleep(RECEIPT_DRAIN_PAUSE);

        self.connected = false;
        for topic in self.subscriptions.keys() {
            self.registry.unsubscribe(self.connection_id, topic);
        }
        self.subscriptions.clear();
        info!("connection {} disconnected", self.connection_id);
    }

    fn send_error(&self, message: &str, description: &str) {
        self.registry
            .deliver(self.connection_id, Frame::error(message, description));
    }
}
