//! In-memory cluster: one `ServerDriver`, many clients, no sockets.
//!
//! Tests drive the cluster step by step. A step delivers every responsive
//! client's outbound bytes, ticks the server once, executes the resulting
//! actions immediately, and ticks every client. Time only moves when the test
//! calls [`SimCluster::advance`], so timeouts are exact.
//!
//! The directory's invariants are checked after every step.

use std::{fmt, net::SocketAddr};

use parley_client::{Client, ClientConfig, ClientEvent};
use parley_server::{DriverConfig, LogLevel, ServerAction, ServerDriver, ServerEvent};

use crate::SimEnv;

/// Handle to a peer in a [`SimCluster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(usize);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer{}", self.0)
    }
}

/// What sits on the far end of a connection.
enum Endpoint {
    /// A real client state machine
    Client(Box<Client<SimEnv>>),
    /// A connection that never speaks; counts what it receives
    Raw { received: usize },
}

struct Peer {
    descriptor: u64,
    addr: SocketAddr,
    endpoint: Endpoint,
    connected: bool,
    /// Unresponsive peers neither send nor receive
    responsive: bool,
    events: Vec<ClientEvent>,
    close_reason: Option<String>,
}

/// Deterministic server plus clients.
pub struct SimCluster {
    env: SimEnv,
    driver: ServerDriver<SimEnv>,
    peers: Vec<Peer>,
    next_descriptor: u64,
    logs: Vec<(LogLevel, String)>,
}

impl SimCluster {
    /// Cluster with a seeded environment and the given server config.
    pub fn new(seed: u64, config: DriverConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        let driver = ServerDriver::new(env.clone(), config);
        Self { env, driver, peers: Vec::new(), next_descriptor: 1, logs: Vec::new() }
    }

    /// Connect a client from a fresh address and start its handshake.
    pub fn connect(&mut self, username: &str, password: &str) -> Result<PeerId, String> {
        let addr = self.fresh_addr();
        self.connect_from(addr, username, password)
    }

    /// Connect a client from a specific address.
    pub fn connect_from(
        &mut self,
        addr: SocketAddr,
        username: &str,
        password: &str,
    ) -> Result<PeerId, String> {
        let mut client = Client::new(self.env.clone(), ClientConfig::new(username, password));
        client.begin().map_err(|e| format!("begin failed: {e}"))?;
        self.accept(addr, Endpoint::Client(Box::new(client)))
    }

    /// Open a connection that never sends anything.
    pub fn connect_raw(&mut self) -> Result<PeerId, String> {
        let addr = self.fresh_addr();
        self.accept(addr, Endpoint::Raw { received: 0 })
    }

    /// One loop iteration: client bytes in, server tick, client ticks.
    pub fn step(&mut self) -> Result<(), String> {
        for index in 0..self.peers.len() {
            let peer = &mut self.peers[index];
            if !peer.connected || !peer.responsive {
                continue;
            }
            let Endpoint::Client(client) = &mut peer.endpoint else {
                continue;
            };
            let Some(data) = client.take_outbound() else {
                continue;
            };

            let descriptor = peer.descriptor;
            self.process(ServerEvent::BytesReceived { descriptor, data })?;
        }

        self.process(ServerEvent::Tick)?;

        for peer in &mut self.peers {
            if !peer.connected || !peer.responsive {
                continue;
            }
            if let Endpoint::Client(client) = &mut peer.endpoint {
                peer.events.extend(client.tick());
            }
        }

        self.driver.directory().check_consistency()
    }

    /// Step `n` times.
    pub fn run(&mut self, n: usize) -> Result<(), String> {
        for _ in 0..n {
            self.step()?;
        }
        Ok(())
    }

    /// Advance the shared clock.
    pub fn advance(&self, by: std::time::Duration) {
        self.env.advance(by);
    }

    /// Stop (or resume) a peer's traffic in both directions without closing
    /// its connection.
    pub fn set_responsive(&mut self, peer: PeerId, responsive: bool) {
        self.peers[peer.0].responsive = responsive;
    }

    /// Drop a peer's connection as if the socket reset.
    pub fn disconnect(&mut self, peer: PeerId) -> Result<(), String> {
        let state = &mut self.peers[peer.0];
        if !state.connected {
            return Ok(());
        }
        state.connected = false;
        state.close_reason = Some("reset by peer".to_string());

        let descriptor = state.descriptor;
        self.process(ServerEvent::ConnectionClosed { descriptor, reason: "reset".to_string() })
    }

    /// Events the peer's client produced since the last call.
    pub fn take_events(&mut self, peer: PeerId) -> Vec<ClientEvent> {
        std::mem::take(&mut self.peers[peer.0].events)
    }

    /// Client state machine for a peer. `None` for raw connections.
    pub fn client(&self, peer: PeerId) -> Option<&Client<SimEnv>> {
        match &self.peers[peer.0].endpoint {
            Endpoint::Client(client) => Some(&**client),
            Endpoint::Raw { .. } => None,
        }
    }

    /// Mutable client state machine, for queueing requests.
    pub fn client_mut(&mut self, peer: PeerId) -> Option<&mut Client<SimEnv>> {
        match &mut self.peers[peer.0].endpoint {
            Endpoint::Client(client) => Some(&mut **client),
            Endpoint::Raw { .. } => None,
        }
    }

    /// Bytes a raw connection has received.
    pub fn raw_received(&self, peer: PeerId) -> usize {
        match self.peers[peer.0].endpoint {
            Endpoint::Raw { received } => received,
            Endpoint::Client(_) => 0,
        }
    }

    /// Server-side user ID of a peer, while connected.
    pub fn user_id(&self, peer: PeerId) -> Option<u64> {
        let state = &self.peers[peer.0];
        if !state.connected {
            return None;
        }
        self.driver.directory().id_for_descriptor(state.descriptor)
    }

    /// Whether the server still has the peer's connection open.
    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.peers[peer.0].connected
    }

    /// Reason the server gave when it closed the peer.
    pub fn close_reason(&self, peer: PeerId) -> Option<&str> {
        self.peers[peer.0].close_reason.as_deref()
    }

    /// Peer address.
    pub fn addr(&self, peer: PeerId) -> SocketAddr {
        self.peers[peer.0].addr
    }

    /// Every peer, in connection order.
    pub fn peers(&self) -> impl Iterator<Item = PeerId> {
        (0..self.peers.len()).map(PeerId)
    }

    /// The server driver.
    pub fn driver(&self) -> &ServerDriver<SimEnv> {
        &self.driver
    }

    /// Shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Driver log lines so far.
    pub fn logs(&self) -> &[(LogLevel, String)] {
        &self.logs
    }

    fn fresh_addr(&self) -> SocketAddr {
        let n = self.peers.len();
        let port = u16::try_from(40_000 + n % 20_000).unwrap_or(40_000);
        let host = u8::try_from(n / 20_000 % 250).unwrap_or(0);
        SocketAddr::from(([10, 0, host, 1], port))
    }

    fn accept(&mut self, addr: SocketAddr, endpoint: Endpoint) -> Result<PeerId, String> {
        let descriptor = self.next_descriptor;
        self.next_descriptor += 1;

        self.peers.push(Peer {
            descriptor,
            addr,
            endpoint,
            connected: true,
            responsive: true,
            events: Vec::new(),
            close_reason: None,
        });
        self.process(ServerEvent::ConnectionAccepted { descriptor, addr })?;
        Ok(PeerId(self.peers.len() - 1))
    }

    fn process(&mut self, event: ServerEvent) -> Result<(), String> {
        let actions = self.driver.process_event(event).map_err(|e| format!("driver: {e}"))?;
        self.execute(actions);
        Ok(())
    }

    fn execute(&mut self, actions: Vec<ServerAction>) {
        for action in actions {
            match action {
                ServerAction::Write { descriptor, data } => {
                    let Some(peer) = self.peer_mut(descriptor) else {
                        continue;
                    };
                    if !peer.responsive {
                        continue;
                    }
                    match &mut peer.endpoint {
                        Endpoint::Client(client) => peer.events.extend(client.handle_bytes(&data)),
                        Endpoint::Raw { received } => *received += data.len(),
                    }
                },

                ServerAction::Close { descriptor, reason } => {
                    let Some(peer) = self.peer_mut(descriptor) else {
                        continue;
                    };
                    peer.connected = false;
                    peer.close_reason = Some(reason);
                    if let Endpoint::Client(client) = &mut peer.endpoint {
                        peer.events.extend(client.handle_disconnect());
                    }
                },

                ServerAction::Log { level, message } => {
                    match level {
                        LogLevel::Debug => tracing::debug!("{}", message),
                        LogLevel::Info => tracing::info!("{}", message),
                        LogLevel::Warn => tracing::warn!("{}", message),
                        LogLevel::Error => tracing::error!("{}", message),
                    }
                    self.logs.push((level, message));
                },
            }
        }
    }

    fn peer_mut(&mut self, descriptor: u64) -> Option<&mut Peer> {
        self.peers.iter_mut().find(|peer| peer.connected && peer.descriptor == descriptor)
    }
}
