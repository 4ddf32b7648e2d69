//! The handshake FSM and the agent that hosts it (§4).
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::address::{KnownAddress, Locator, PeerAddress, Protocol, MAX_DISTANCE};
use crate::constants::{
    ADDR_QUEUE_INTERVAL, ADDR_RATE_LIMIT, ANNOUNCE_ADDR_INTERVAL, CONNECTIVITY_CHECK_INTERVAL,
    HANDSHAKE_TIMEOUT, MAX_ADDR_PER_MESSAGE, MAX_ADDR_RELAY_PER_MESSAGE, PROTOCOL_VERSION,
    REJECT_OBSOLETE, RELAY_THROTTLE, VERSION_ATTEMPTS_MAX, VERSION_RETRY_DELAY,
};
use crate::crypto::PeerId;
use crate::error::CloseReason;
use crate::events::{AgentEvent, InboundFrame, Peer};
use crate::fsm::admitter::admit;
use crate::fsm::relay::{OutboundAddrQueue, RateLimiter};
use crate::time::{LocalDuration, LocalTime, Timers};
use crate::traits::{AddressBook, BlockchainProvider, Channel, NetworkConfig, ProtocolMask};

const TIMER_VERSION: &str = "version";
const TIMER_VERACK: &str = "verack";
const TIMER_CONNECTIVITY: &str = "connectivity";
const TIMER_ANNOUNCE: &str = "announce-addr";
const TIMER_RELAY: &str = "relay-tick";

fn ping_timer(nonce: u32) -> String {
    format!("ping_{nonce}")
}

/// The handshake FSM's coarse state (§4.1). `peer_address_verified` is tracked separately
/// as an orthogonal flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Fresh,
    VersionSent,
    VersionExchanged,
    Handshaken,
    Closed,
}

/// One agent per peer channel (§3). Owns all handshake, relay, and liveness state for a
/// single connection and is driven to completion by [`Agent::run`].
pub struct Agent<C, B, A, N> {
    channel: Arc<C>,
    blockchain: Arc<B>,
    address_book: Arc<A>,
    network: Arc<N>,
    genesis_hash: [u8; 32],

    state: HandshakeState,
    peer_address_verified: bool,
    version_sent: bool,
    version_received: bool,
    verack_sent: bool,
    verack_received: bool,
    handshake_fired: bool,

    version_attempts: u32,
    challenge_nonce: crate::crypto::ChallengeNonce,
    peer_challenge_nonce: Option<crate::crypto::ChallengeNonce>,

    peer: Option<Peer>,
    known_addresses: HashMap<[u8; 20], KnownAddress>,
    ping_times: HashMap<u32, LocalTime>,
    addr_queue: OutboundAddrQueue,
    addr_limit: RateLimiter,
    timers: Timers,

    events: mpsc::UnboundedSender<AgentEvent>,
}

impl<C, B, A, N> Agent<C, B, A, N>
where
    C: Channel,
    B: BlockchainProvider,
    A: AddressBook,
    N: NetworkConfig,
{
    pub fn new(
        channel: Arc<C>,
        blockchain: Arc<B>,
        address_book: Arc<A>,
        network: Arc<N>,
        genesis_hash: [u8; 32],
    ) -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let now = LocalTime::now();
        let (events, events_rx) = mpsc::unbounded_channel();
        let challenge_nonce = network.crypto().challenge_nonce();

        let agent = Self {
            channel,
            blockchain,
            address_book,
            network,
            genesis_hash,
            state: HandshakeState::Fresh,
            peer_address_verified: false,
            version_sent: false,
            version_received: false,
            verack_sent: false,
            verack_received: false,
            handshake_fired: false,
            version_attempts: 0,
            challenge_nonce,
            peer_challenge_nonce: None,
            peer: None,
            known_addresses: HashMap::new(),
            ping_times: HashMap::new(),
            addr_queue: OutboundAddrQueue::new(
                ADDR_RATE_LIMIT as usize,
                MAX_ADDR_RELAY_PER_MESSAGE,
                ADDR_RATE_LIMIT,
                LocalDuration::from_secs(600),
                now,
            ),
            addr_limit: RateLimiter::new(ADDR_RATE_LIMIT, LocalDuration::from_secs(600), now),
            timers: Timers::default(),
            events,
        };

        (agent, events_rx)
    }

    fn emit(&self, event: AgentEvent) {
        // The supervisor may have dropped its receiver; that's not this agent's problem.
        let _ = self.events.send(event);
    }

    fn is_closed(&self) -> bool {
        self.state == HandshakeState::Closed
    }

    /// Drive this agent until the channel closes, consuming inbound frames from `inbox`.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<InboundFrame>) {
        self.handshake().await;

        loop {
            let now = LocalTime::now();
            let deadline = self.timers.next_deadline();
            let sleep = match deadline {
                Some(when) if when > now => tokio::time::sleep((when - now).into()),
                Some(_) => tokio::time::sleep(std::time::Duration::ZERO),
                None => tokio::time::sleep(std::time::Duration::from_secs(3600)),
            };

            tokio::select! {
                frame = inbox.recv() => {
                    match frame {
                        Some(frame) => self.on_frame(frame).await,
                        None => break,
                    }
                }
                _ = sleep => {
                    self.on_tick().await;
                }
            }

            if self.is_closed() {
                break;
            }
        }
    }

    // -- Handshake FSM (§4.1) ------------------------------------------------------------

    /// Initiate the handshake. Idempotent once `versionSent` is true.
    pub async fn handshake(&mut self) {
        if self.version_sent {
            return;
        }

        let self_address = self.network.peer_address();
        let head_hash = self.blockchain.head_hash();

        let sent = self
            .channel
            .send_version(&self_address, head_hash, self.challenge_nonce)
            .await;

        if !sent {
            self.version_attempts += 1;
            if self.version_attempts >= VERSION_ATTEMPTS_MAX || self.channel.is_closed() {
                self.close(CloseReason::SendingOfVersionMessageFailed).await;
            } else {
                let when = LocalTime::now() + VERSION_RETRY_DELAY;
                self.timers.set(TIMER_VERSION, when);
                // A real retry needs a wake-up; `run`'s sleep-until-next-deadline loop
                // re-checks `version_sent` every time the version timer fires early.
            }
            return;
        }

        self.version_sent = true;
        self.state = HandshakeState::VersionSent;

        if !self.version_received {
            self.timers.set(TIMER_VERSION, LocalTime::now() + HANDSHAKE_TIMEOUT);
        } else if self.peer_address_verified {
            self.send_verack().await;
        }

        self.timers
            .set(TIMER_VERACK, LocalTime::now() + HANDSHAKE_TIMEOUT * 2);
    }

    async fn send_verack(&mut self) {
        assert!(self.peer_address_verified, "verack sent before address verification");

        let peer_id = self.peer.as_ref().expect("peer set before verack").peer_id;
        let nonce = self
            .peer_challenge_nonce
            .expect("peer challenge nonce set before verack");

        let mut payload = Vec::with_capacity(20 + nonce.len());
        payload.extend_from_slice(peer_id.as_bytes());
        payload.extend_from_slice(&nonce);

        let signature = self.network.crypto().sign(&payload);
        let public_key = self.network.crypto().public_key();

        if self.channel.send_verack(public_key, signature).await {
            self.verack_sent = true;
            if self.verack_received {
                self.finish().await;
            }
        }
    }

    async fn finish(&mut self) {
        if self.handshake_fired {
            return;
        }
        self.handshake_fired = true;
        self.state = HandshakeState::Handshaken;

        let now = LocalTime::now();
        self.timers.set(TIMER_CONNECTIVITY, now + CONNECTIVITY_CHECK_INTERVAL);
        self.timers.set(TIMER_ANNOUNCE, now + ANNOUNCE_ADDR_INTERVAL);
        self.timers.set(TIMER_RELAY, now + ADDR_QUEUE_INTERVAL);

        let peer = self.peer.clone().expect("peer set before finish");
        self.emit(AgentEvent::Handshake(peer));

        self.channel
            .send_get_addr(self.network.protocol_mask(), self.network.accepted_services())
            .await;
    }

    async fn on_version(&mut self, frame: InboundFrame) {
        let InboundFrame::Version {
            peer_address,
            protocol_version,
            genesis_hash,
            head_hash,
            challenge_nonce,
        } = frame
        else {
            unreachable!("on_version called with a non-version frame")
        };

        if self.version_received {
            return;
        }
        self.timers.cancel(TIMER_VERSION);

        if protocol_version < PROTOCOL_VERSION {
            self.channel
                .send_reject(
                    "version",
                    REJECT_OBSOLETE,
                    "protocol version is no longer supported",
                )
                .await;
            self.close(CloseReason::IncompatibleVersion).await;
            return;
        }

        if genesis_hash != self.genesis_hash {
            self.close(CloseReason::DifferentGenesisBlock).await;
            return;
        }

        if !peer_address.verify_signature(self.network.crypto()) {
            self.close(CloseReason::InvalidPeerAddressInVersionMessage).await;
            return;
        }

        if let Some(expected) = self.channel.peer_address() {
            if expected.peer_id() != peer_address.peer_id() {
                self.close(CloseReason::UnexpectedPeerAddressInVersionMessage).await;
                return;
            }
            self.peer_address_verified = true;
        }

        let enriched = match self.address_book.get(&peer_address.peer_id()).await {
            Some(known) if matches!(peer_address.locator, Locator::WebRtcId(_)) => known,
            _ => peer_address.clone(),
        };
        self.channel.set_peer_address(enriched);

        let now = LocalTime::now();
        let local_time = now.as_millis() as i64 / 1000;
        let remote_time = 0i64; // the wire layer doesn't carry a remote wall-clock timestamp in `version`.

        self.peer = Some(Peer {
            peer_id: peer_address.peer_id(),
            protocol_version,
            head_hash,
            time_offset: remote_time - local_time,
        });
        self.peer_challenge_nonce = Some(challenge_nonce);
        self.version_received = true;
        self.state = HandshakeState::VersionExchanged;

        self.emit(AgentEvent::Version(self.peer.clone().unwrap()));
        if self.is_closed() {
            return;
        }

        if !self.version_sent {
            self.handshake().await;
        }
        if self.peer_address_verified && !self.verack_sent {
            self.send_verack().await;
        }
    }

    async fn on_verack(&mut self, public_key: bitcoin::secp256k1::PublicKey, signature: crate::crypto::Signature) {
        if self.verack_received {
            return;
        }
        self.timers.cancel(TIMER_VERACK);

        let Some(peer) = self.peer.clone() else {
            // A verack before a version has already been dropped by the admitter.
            return;
        };

        if self.network.crypto().derive_peer_id(&public_key) != peer.peer_id {
            self.close(CloseReason::InvalidPublicKeyInVerackMessage).await;
            return;
        }

        let self_peer_id = self
            .network
            .crypto()
            .derive_peer_id(&self.network.crypto().public_key());
        let mut payload = Vec::with_capacity(20 + self.challenge_nonce.len());
        payload.extend_from_slice(self_peer_id.as_bytes());
        payload.extend_from_slice(&self.challenge_nonce);

        if !self.network.crypto().verify(&public_key, &payload, &signature) {
            self.close(CloseReason::InvalidSignatureInVerackMessage).await;
            return;
        }

        if !self.peer_address_verified {
            self.peer_address_verified = true;
            self.send_verack().await;
            if self.is_closed() {
                return;
            }
        }

        if let Some(address) = self.channel.peer_address() {
            self.remember(address);
        }

        self.verack_received = true;
        if self.verack_sent {
            self.finish().await;
        }
    }

    // -- Address relay & request (§4.3, §4.4) --------------------------------------------

    /// Enqueue addresses for throttled relay to this peer. No-op until both version is sent
    /// and verack has been received.
    pub fn relay_addresses(&mut self, addresses: Vec<PeerAddress>) {
        if !(self.verack_received && self.version_sent) {
            return;
        }
        for address in addresses {
            self.addr_queue.enqueue(address);
        }
    }

    async fn on_relay_tick(&mut self) {
        let now = LocalTime::now();
        let batch = self.addr_queue.drain_batch(now);
        if batch.is_empty() {
            return;
        }

        let filtered: Vec<PeerAddress> = batch
            .into_iter()
            .filter(|address| self.should_relay(address, now))
            .collect();

        if filtered.is_empty() {
            return;
        }

        if self.channel.send_addr(filtered.clone()).await {
            for address in filtered {
                self.remember(address);
            }
        }
    }

    fn should_relay(&self, address: &PeerAddress, now: LocalTime) -> bool {
        if address.protocol == Protocol::WebRtc && address.distance >= MAX_DISTANCE {
            return false;
        }
        if address.protocol == Protocol::Dumb {
            return false;
        }
        if address.is_seed() {
            return false;
        }

        match self.known_addresses.get(&address.peer_id) {
            None => true,
            Some(known) => {
                (address.protocol == Protocol::WebRtc && address.distance < known.address.distance)
                    || now.duration_since(known.inserted_at) > RELAY_THROTTLE
            }
        }
    }

    fn remember(&mut self, address: PeerAddress) {
        let id = address.peer_id;
        self.known_addresses
            .insert(id, KnownAddress::new(address, LocalTime::now()));
    }

    async fn on_addr(&mut self, addresses: Vec<PeerAddress>) {
        if addresses.len() > MAX_ADDR_PER_MESSAGE {
            self.close(CloseReason::AddrMessageTooLarge).await;
            return;
        }

        let now = LocalTime::now();
        if !self.addr_limit.note(now, addresses.len() as u32) {
            self.close(CloseReason::RateLimitExceeded).await;
            return;
        }

        for address in &addresses {
            if !address.verify_signature(self.network.crypto()) {
                self.close(CloseReason::InvalidAddr).await;
                return;
            }
            if address.protocol == Protocol::WebSocket && !address.is_globally_reachable() {
                self.close(CloseReason::AddrNotGloballyReachable).await;
                return;
            }
        }

        for address in addresses.clone() {
            self.remember(address);
        }

        let source = self
            .peer
            .as_ref()
            .map(|p| p.peer_id)
            .unwrap_or(PeerId([0; 20]));
        self.address_book.add(source, addresses.clone()).await;

        self.emit(AgentEvent::Addr(addresses));
    }

    async fn on_get_addr(&mut self, protocols: ProtocolMask, services: crate::address::Services) {
        let now = LocalTime::now();
        let candidates = self
            .address_book
            .query(protocols, services, MAX_ADDR_PER_MESSAGE)
            .await;

        let filtered: Vec<PeerAddress> = candidates
            .into_iter()
            .filter(|address| {
                if address.protocol == Protocol::WebRtc && address.distance >= MAX_DISTANCE {
                    return false;
                }
                match self.known_addresses.get(&address.peer_id) {
                    None => true,
                    Some(known) => now.duration_since(known.inserted_at) > RELAY_THROTTLE,
                }
            })
            .collect();

        if !filtered.is_empty() {
            self.channel.send_addr(filtered).await;
        }
    }

    // -- Liveness prober (§4.5) -----------------------------------------------------------

    async fn on_connectivity_tick(&mut self) {
        let nonce = self.network.crypto().ping_nonce();
        let now = LocalTime::now();

        if !self.channel.send_ping(nonce).await {
            self.close(CloseReason::SendingPingMessageFailed).await;
            return;
        }
        self.ping_times.insert(nonce, now);

        if now.duration_since(self.channel.last_message_received_at()) > CONNECTIVITY_CHECK_INTERVAL {
            self.timers.set(ping_timer(nonce), now + crate::constants::PING_TIMEOUT);
        }
    }

    async fn on_ping(&mut self, nonce: u32) {
        self.channel.send_pong(nonce).await;
    }

    async fn on_pong(&mut self, nonce: u32) {
        self.timers.cancel(&ping_timer(nonce));

        if let Some(start) = self.ping_times.remove(&nonce) {
            let now = LocalTime::now();
            let delta = now.duration_since(start).as_millis() as u64;
            if delta > 0 {
                self.emit(AgentEvent::PingPong(delta));
            }
        }
    }

    async fn on_ping_timeout(&mut self, nonce: u32) {
        if self.ping_times.remove(&nonce).is_some() {
            self.close(CloseReason::PingTimeout).await;
        }
    }

    // -- Frame & timer dispatch -------------------------------------------------------------

    async fn on_frame(&mut self, frame: InboundFrame) {
        if self.is_closed() {
            return;
        }

        if matches!(frame, InboundFrame::Close) {
            self.close(CloseReason::Command).await;
            return;
        }

        if !admit(&frame, self.version_received, self.verack_received) {
            warn!(kind = frame.kind(), "dropping frame: not admitted by current handshake state");
            return;
        }

        trace!(kind = frame.kind(), "admitted inbound frame");

        match frame {
            InboundFrame::Version { .. } => self.on_version(frame).await,
            InboundFrame::Verack { public_key, signature } => self.on_verack(public_key, signature).await,
            InboundFrame::Addr(addresses) => self.on_addr(addresses).await,
            InboundFrame::GetAddr { protocols, services } => self.on_get_addr(protocols, services).await,
            InboundFrame::Ping(nonce) => self.on_ping(nonce).await,
            InboundFrame::Pong(nonce) => self.on_pong(nonce).await,
            InboundFrame::Close => unreachable!("handled above"),
        }
    }

    async fn on_tick(&mut self) {
        let now = LocalTime::now();

        if !self.version_sent && self.timers.take_expired(TIMER_VERSION, now) {
            self.handshake().await;
            if self.is_closed() {
                return;
            }
        } else if self.timers.take_expired(TIMER_VERSION, now) {
            self.close(CloseReason::VersionTimeout).await;
            return;
        }

        if self.timers.take_expired(TIMER_VERACK, now) {
            self.close(CloseReason::VerackTimeout).await;
            return;
        }

        if self.timers.take_expired(TIMER_CONNECTIVITY, now) {
            self.on_connectivity_tick().await;
            if self.is_closed() {
                return;
            }
            self.timers.set(TIMER_CONNECTIVITY, now + CONNECTIVITY_CHECK_INTERVAL);
        }

        if self.timers.take_expired(TIMER_ANNOUNCE, now) {
            let self_address = self.network.peer_address();
            self.relay_addresses(vec![self_address]);
            self.timers.set(TIMER_ANNOUNCE, now + ANNOUNCE_ADDR_INTERVAL);
        }

        if self.timers.take_expired(TIMER_RELAY, now) {
            self.on_relay_tick().await;
            if self.is_closed() {
                return;
            }
            self.timers.set(TIMER_RELAY, now + ADDR_QUEUE_INTERVAL);
        }

        let expired_pings: Vec<u32> = self
            .ping_times
            .keys()
            .copied()
            .filter(|nonce| self.timers.take_expired(&ping_timer(*nonce), now))
            .collect();

        for nonce in expired_pings {
            self.on_ping_timeout(nonce).await;
            if self.is_closed() {
                return;
            }
        }
    }

    /// Close the channel, cancel every timer, and stop the relay queue. Idempotent (§4.6).
    pub async fn close(&mut self, reason: CloseReason) {
        if self.is_closed() {
            return;
        }
        debug!(%reason, "closing agent");

        self.state = HandshakeState::Closed;
        self.timers.cancel_all();
        self.addr_queue.stop();
        self.channel.close(reason, reason.code()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::LocalKeyPair;
    use crate::traits::MockChannel;

    struct NoChain;
    impl BlockchainProvider for NoChain {
        fn head_hash(&self) -> [u8; 32] {
            [0; 32]
        }
    }

    struct NoAddresses;
    #[async_trait::async_trait]
    impl AddressBook for NoAddresses {
        async fn get(&self, _: &PeerId) -> Option<PeerAddress> {
            None
        }
        async fn query(&self, _: ProtocolMask, _: crate::address::Services, _: usize) -> Vec<PeerAddress> {
            Vec::new()
        }
        async fn add(&self, _: PeerId, _: Vec<PeerAddress>) {}
    }

    struct Identity(LocalKeyPair, PeerAddress);
    impl NetworkConfig for Identity {
        fn peer_address(&self) -> PeerAddress {
            self.1.clone()
        }
        fn crypto(&self) -> &dyn crate::crypto::Crypto {
            &self.0
        }
        fn protocol_mask(&self) -> ProtocolMask {
            ProtocolMask::ALL
        }
        fn accepted_services(&self) -> crate::address::Services {
            crate::address::Services::NONE
        }
    }

    fn identity() -> Identity {
        let keys = LocalKeyPair::generate();
        let address = PeerAddress::new_signed(
            &keys,
            Protocol::WebSocket,
            Locator::Socket("127.0.0.1:9000".parse().unwrap()),
            crate::address::Services::NONE,
            0,
            0,
            false,
        );
        Identity(keys, address)
    }

    /// A version send that fails outright (not just "the peer hung up") closes the agent
    /// once the retry budget is exhausted, rather than retrying forever.
    #[tokio::test]
    async fn exhausting_version_retries_closes_the_agent() {
        let mut channel = MockChannel::new();
        channel.expect_peer_address().returning(|| None);
        channel.expect_is_closed().returning(|| true);
        channel.expect_send_version().returning(|_, _, _| false);
        channel.expect_close().returning(|_, _| ());

        let (mut agent, _events) = Agent::new(
            Arc::new(channel),
            Arc::new(NoChain),
            Arc::new(NoAddresses),
            Arc::new(identity()),
            [0; 32],
        );

        agent.handshake().await;

        assert!(agent.is_closed());
    }
}
