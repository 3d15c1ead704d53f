//! Non-blocking I/O reactor.
//!
//! One control thread multiplexes readiness across the listener and every
//! client socket with a mio [`Poll`]. The loop never runs protocol logic:
//! read-ready sockets are drained into leased buffers and handed to the
//! worker lane owning the connection; decoded responses come back as bytes
//! on per-connection write queues. Readiness interest is mutated only here,
//! on the control thread; worker lanes request changes through
//! [`ReactorCommand`]s plus a poll wakeup.

use crate::broker::buffer::BufferPool;
use crate::broker::connection::{
    ConnectionHandle, ConnectionProtocol, ReactorCommand, ReactorNotifier,
};
use crate::broker::engine::StompEngine;
use crate::broker::registry::Registry;
use crate::broker::worker::WorkerPool;
use crate::config::BrokerConfig;
use crate::protocol::ConnectionId;
use crate::{Result, StompmqError};
use bytes::{Buf, Bytes};
use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
/// Connection tokens start after the fixed tokens; token = id + this offset.
const FIRST_CONNECTION: usize = 2;

/// Reactor-owned view of one client connection. The registry and engine
/// reference the connection by id only; the socket lives here.
struct Connection {
    socket: TcpStream,
    peer: SocketAddr,
    /// Codec + engine, locked only by this connection's lane.
    protocol: Arc<Mutex<ConnectionProtocol>>,
    /// Outbound FIFO; a partial write leaves the remainder at the head.
    write_queue: Arc<Mutex<VecDeque<Bytes>>>,
    /// Whether the socket is currently registered for write readiness.
    write_interest: bool,
}

enum WriteOutcome {
    Drained,
    Pending,
    Failed,
}

/// The broker server: listener, poll loop, worker lanes, and shared state.
pub struct ReactorServer {
    config: Arc<BrokerConfig>,
    poll: Poll,
    listener: TcpListener,
    waker: Arc<Waker>,
    registry: Arc<Registry>,
    pool: WorkerPool,
    buffers: BufferPool,
    connections: HashMap<ConnectionId, Connection>,
    commands_tx: Sender<ReactorCommand>,
    commands_rx: Receiver<ReactorCommand>,
    next_connection_id: ConnectionId,
    local_addr: SocketAddr,
}

impl ReactorServer {
    /// Bind the listener and set up the poll, waker, worker lanes, and
    /// buffer pool. The loop does not run until [`ReactorServer::run`].
    pub fn bind(config: BrokerConfig) -> Result<Self> {
        config.validate().map_err(StompmqError::Config)?;

        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| StompmqError::Config(format!("invalid listen address: {}", e)))?;
        let mut listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        let (commands_tx, commands_rx) = unbounded();
        let pool = WorkerPool::new(config.num_workers)?;
        let buffers = BufferPool::new(config.buffer_size);

        Ok(Self {
            config: Arc::new(config),
            poll,
            listener,
            waker,
            registry: Arc::new(Registry::new()),
            pool,
            buffers,
            connections: HashMap::new(),
            commands_tx,
            commands_rx,
            next_connection_id: 0,
            local_addr,
        })
    }

    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Handle for requesting shutdown from another thread.
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            notifier: self.notifier(),
        }
    }

    /// Run the readiness loop on the calling thread until shutdown is
    /// requested. The control thread suspends only inside the poll wait.
    pub fn run(mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        info!(
            "stompmq listening on {} ({} worker lanes)",
            self.local_addr, self.config.num_workers
        );

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept_ready()?,
                    // Wakeups exist only to get the loop to the command
                    // drain below.
                    WAKER => {}
                    token => {
                        let id = (token.0 - FIRST_CONNECTION) as ConnectionId;
                        if event.is_readable() {
                            self.read_ready(id);
                        }
                        if event.is_writable() {
                            self.write_ready(id);
                        }
                    }
                }
            }

            if self.drain_commands() {
                break;
            }
        }

        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.close_connection(id);
        }
        self.pool.shutdown();
        info!("stompmq shut down");
        Ok(())
    }

    fn notifier(&self) -> ReactorNotifier {
        ReactorNotifier::new(self.commands_tx.clone(), Arc::clone(&self.waker))
    }

    /// Accept every pending connection; ids are monotonic and never reused.
    fn accept_ready(&mut self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut socket, peer)) => {
                    let id = self.next_connection_id;
                    self.next_connection_id += 1;
                    let token = Token(id as usize + FIRST_CONNECTION);
                    self.poll
                        .registry()
                        .register(&mut socket, token, Interest::READABLE)?;

                    let write_queue = Arc::new(Mutex::new(VecDeque::new()));
                    let handle = Arc::new(ConnectionHandle::new(
                        id,
                        Arc::clone(&write_queue),
                        self.notifier(),
                    ));
                    // Registered before CONNECT so ERROR frames reach
                    // not-yet-authenticated clients.
                    self.registry.register_connection(id, handle.clone());
                    let engine = StompEngine::new(
                        id,
                        Arc::clone(&self.registry),
                        handle,
                        Arc::clone(&self.config),
                    );
                    self.connections.insert(
                        id,
                        Connection {
                            socket,
                            peer,
                            protocol: Arc::new(Mutex::new(ConnectionProtocol::new(engine))),
                            write_queue,
                            write_interest: false,
                        },
                    );
                    debug!("accepted connection {} from {}", id, peer);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drain the socket into leased buffers, one lane task per chunk. The
    /// lane releases each buffer back to the pool once the codec has
    /// consumed it.
    fn read_ready(&mut self, id: ConnectionId) {
        loop {
            let mut buf = self.buffers.lease();
            buf.resize(self.buffers.buffer_size(), 0);

            let read = match self.connections.get_mut(&id) {
                Some(conn) => conn.socket.read(&mut buf),
                None => return,
            };
            match read {
                Ok(0) => {
                    // Peer closed.
                    self.close_connection(id);
                    return;
                }
                Ok(n) => {
                    buf.truncate(n);
                    let Some(conn) = self.connections.get(&id) else {
                        return;
                    };
                    let protocol = Arc::clone(&conn.protocol);
                    let notifier = self.notifier();
                    self.pool.submit(
                        id,
                        Box::new(move || {
                            let terminate = protocol.lock().accept_bytes(&buf);
                            drop(buf);
                            if terminate {
                                notifier.notify(ReactorCommand::Close(id));
                            }
                        }),
                    );
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("read error on connection {}: {}", id, e);
                    self.close_connection(id);
                    return;
                }
            }
        }
    }

    /// Flush the outbound queue as far as the socket allows. A partial
    /// write keeps the remainder at the head for the next write-ready
    /// event; a fully drained queue drops write interest.
    fn write_ready(&mut self, id: ConnectionId) {
        let outcome = {
            let Some(conn) = self.connections.get_mut(&id) else {
                return;
            };
            let mut queue = conn.write_queue.lock();
            loop {
                let Some(front) = queue.front_mut() else {
                    break WriteOutcome::Drained;
                };
                match conn.socket.write(front) {
                    Ok(n) => {
                        front.advance(n);
                        if front.is_empty() {
                            queue.pop_front();
                        } else {
                            break WriteOutcome::Pending;
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break WriteOutcome::Pending,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("write error on connection {}: {}", id, e);
                        break WriteOutcome::Failed;
                    }
                }
            }
        };

        match outcome {
            WriteOutcome::Drained => {
                if let Some(conn) = self.connections.get_mut(&id) {
                    if conn.write_interest {
                        let token = Token(id as usize + FIRST_CONNECTION);
                        if let Err(e) =
                            self.poll
                                .registry()
                                .reregister(&mut conn.socket, token, Interest::READABLE)
                        {
                            warn!("failed to drop write interest on connection {}: {}", id, e);
                        }
                        conn.write_interest = false;
                    }
                }
            }
            WriteOutcome::Pending => {}
            WriteOutcome::Failed => self.close_connection(id),
        }
    }

    /// Run interest/lifecycle changes requested by worker lanes. Returns
    /// `true` when shutdown was requested.
    fn drain_commands(&mut self) -> bool {
        let mut shutdown = false;
        while let Ok(command) = self.commands_rx.try_recv() {
            match command {
                ReactorCommand::EnableWrite(id) => self.enable_write(id),
                ReactorCommand::Close(id) => self.close_connection(id),
                ReactorCommand::Shutdown => shutdown = true,
            }
        }
        shutdown
    }

    /// Write interest stays enabled only while the outbound queue is
    /// non-empty.
    fn enable_write(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if conn.write_interest || conn.write_queue.lock().is_empty() {
            return;
        }
        let token = Token(id as usize + FIRST_CONNECTION);
        match self.poll.registry().reregister(
            &mut conn.socket,
            token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            Ok(()) => conn.write_interest = true,
            Err(e) => warn!("failed to enable write interest on connection {}: {}", id, e),
        }
    }

    /// Tear a connection down exactly once, tolerating the race between
    /// protocol-requested termination and remote close: whichever path gets
    /// here second finds the id already gone and no-ops.
    fn close_connection(&mut self, id: ConnectionId) {
        let Some(mut conn) = self.connections.remove(&id) else {
            return;
        };

        // Best-effort flush of queued output before the socket drops.
        {
            let mut queue = conn.write_queue.lock();
            while let Some(front) = queue.front_mut() {
                match conn.socket.write(front) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        front.advance(n);
                        if front.is_empty() {
                            queue.pop_front();
                        }
                    }
                }
            }
        }

        let _ = self.poll.registry().deregister(&mut conn.socket);
        self.registry.remove_connection(id);
        debug!("connection {} from {} closed", id, conn.peer);
    }
}

/// Cloneable handle for stopping a running reactor from another thread.
#[derive(Clone)]
pub struct ReactorHandle {
    notifier: ReactorNotifier,
}

impl ReactorHandle {
    pub fn shutdown(&self) {
        self.notifier.notify(ReactorCommand::Shutdown);
    }
}
