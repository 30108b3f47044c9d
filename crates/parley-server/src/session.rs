//! Per-connection server state.

use std::{net::SocketAddr, ops::Sub, time::Duration};

use parley_core::{AuthPhase, FramedChannel, Responder};
use parley_crypto::{CipherState, NonceParity};

/// One connection, from accept to teardown.
///
/// Owned by the driver. The directory refers to it only by ID.
#[derive(Debug)]
pub struct Session<I> {
    id: u64,
    descriptor: u64,
    addr: SocketAddr,
    last_activity: I,
    live: bool,
    promoted: bool,
    channel: FramedChannel,
    handshake: Responder<I>,
}

impl<I> Session<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Fresh session waiting for the client's public key.
    pub fn new(
        id: u64,
        descriptor: u64,
        addr: SocketAddr,
        now: I,
        password: &[u8],
        handshake_timeout: Duration,
        transfer_limit: u64,
    ) -> Self {
        let cipher = CipherState::new(NonceParity::Even).with_transfer_limit(transfer_limit);
        Self {
            id,
            descriptor,
            addr,
            last_activity: now,
            live: true,
            promoted: false,
            channel: FramedChannel::new(cipher),
            handshake: Responder::new(now, password, handshake_timeout),
        }
    }

    /// Directory ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runtime descriptor.
    pub fn descriptor(&self) -> u64 {
        self.descriptor
    }

    /// Peer address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Record inbound traffic.
    pub fn touch(&mut self, now: I) {
        self.last_activity = now;
    }

    /// Time since the last inbound traffic.
    pub fn idle_for(&self, now: I) -> Duration {
        now - self.last_activity
    }

    /// False once a write or read on this session has failed.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Mark the session for removal on the next sweep.
    pub fn mark_dead(&mut self) {
        self.live = false;
    }

    /// True once moved into the authenticated partition.
    pub fn is_promoted(&self) -> bool {
        self.promoted
    }

    /// Record promotion into the authenticated partition.
    pub fn set_promoted(&mut self) {
        self.promoted = true;
    }

    /// Coarse phase. `Authenticated` only after promotion, so the router never
    /// sees a session the directory does not yet list.
    pub fn auth_phase(&self) -> AuthPhase {
        if self.promoted { AuthPhase::Authenticated } else { self.handshake.auth_phase() }
    }

    /// The framed channel.
    pub fn channel_mut(&mut self) -> &mut FramedChannel {
        &mut self.channel
    }

    /// Handshake machine.
    pub fn handshake(&self) -> &Responder<I> {
        &self.handshake
    }

    /// Fail the handshake if its window has passed. True if it just failed.
    pub fn check_handshake_timeout(&mut self, now: I) -> bool {
        self.handshake.check_timeout(now)
    }

    /// Handshake machine and channel together, for polling.
    pub fn handshake_parts(&mut self) -> (&mut Responder<I>, &mut FramedChannel) {
        (&mut self.handshake, &mut self.channel)
    }
}
