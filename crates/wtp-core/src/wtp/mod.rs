//! WTP supervisory state machine.
//!
//! [`Wtp`] owns every piece of session state: the timer table, the AC
//! registry, the discovery engine, the security bootstrap and the reliable
//! control transport. It performs no I/O. The event loop feeds it datagrams
//! and timer expiries and drains the datagrams it wants sent:
//!
//! ```text
//!            handle_datagram / handle_timeout / teardown
//!                              │
//!                              ▼
//!   ┌──────────────────────── Wtp ────────────────────────┐
//!   │ Discovery ─► SecuritySetup ─► SecurityConnect ─► Join│
//!   │     ▲                                            │   │
//!   │   Reset ◄── Run ◄── DataCheck ◄── Configure ◄────┘   │
//!   └──────────────────────────────────────────────────────┘
//!                              │
//!                 poll_transmit / poll_timeout
//! ```
//!
//! [`runner::run`] is the Tokio event loop that drives a `Wtp` over a
//! [`wtp_transport::Transport`].

mod join;
mod run;
pub mod runner;
pub mod state;

pub use state::WtpState;

use crate::config::WtpConfig;
use crate::discovery::{self, DiscoveryEngine, DiscoveryResponse, Selection};
use crate::error::Result;
use crate::fragment::{self, Preamble};
use crate::message::{Message, MessageCodec, MessageElement, MessageType, TlvCodec};
use crate::registry::{AcRegistry, HostResolver, SystemResolver};
use crate::reliable::{Inbound, ReliableStats, ReliableTransport, RetransmitOutcome};
use crate::security::{SecurityBootstrap, SecurityOutcome, SecuritySession};
use crate::session::SessionId;
use crate::timer::{TimerId, TimerManager};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use wtp_crypto::SecurityService;

/// Transitions kept in [`WtpStats::history`].
pub const STATE_HISTORY_LEN: usize = 64;

/// Discovery Type element value when ACs are configured statically.
const DISCOVERY_TYPE_STATIC: u8 = 1;

/// Discovery Type element value when the AC is found by probing.
const DISCOVERY_TYPE_UNKNOWN: u8 = 0;

/// A datagram the event loop should send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmit {
    /// Destination
    pub destination: SocketAddr,
    /// Datagram bytes
    pub contents: Vec<u8>,
}

/// Control plane counters
#[derive(Debug, Clone, Default)]
pub struct WtpStats {
    /// Most recent transitions, oldest first
    pub history: VecDeque<(WtpState, WtpState)>,
    /// Discovery rounds started
    pub discovery_rounds: u64,
    /// Times the WTP gave up and sulked
    pub sulks: u64,
    /// Successful joins
    pub joins: u64,
    /// Session resets
    pub resets: u64,
    /// ACs excluded after security or join failures
    pub excluded_acs: u64,
    /// Reliable transport counters
    pub transport: ReliableStats,
}

/// The WTP control plane.
pub struct Wtp {
    config: WtpConfig,
    state: WtpState,
    timers: TimerManager,
    registry: AcRegistry,
    discovery: DiscoveryEngine,
    security: SecurityBootstrap,
    reliable: ReliableTransport,
    codec: Box<dyn MessageCodec>,
    resolver: Box<dyn HostResolver>,
    selected: Option<DiscoveryResponse>,
    awaiting: Option<MessageType>,
    echo_outstanding: bool,
    echo_interval: Duration,
    outgoing: VecDeque<Transmit>,
    stats: WtpStats,
}

impl Wtp {
    /// Create a control plane in `Idle`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration does not validate.
    pub fn new(config: WtpConfig, service: Box<dyn SecurityService>) -> Result<Self> {
        config.validate()?;
        let registry = AcRegistry::from_config(&config.discovery)?;
        let security = SecurityBootstrap::new(
            service,
            &config.security,
            config.timers.security_session,
        );
        let reliable = ReliableTransport::new(config.timers.retransmit, config.timers.max_retransmit);

        Ok(Self {
            discovery: DiscoveryEngine::new(config.discovery.clone()),
            echo_interval: config.timers.echo,
            config,
            state: WtpState::Idle,
            timers: TimerManager::new(),
            registry,
            security,
            reliable,
            codec: Box::new(TlvCodec),
            resolver: Box::new(SystemResolver),
            selected: None,
            awaiting: None,
            echo_outstanding: false,
            outgoing: VecDeque::new(),
            stats: WtpStats::default(),
        })
    }

    /// Replace the hostname resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl HostResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Replace the message codec.
    #[must_use]
    pub fn with_codec(mut self, codec: impl MessageCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Leave `Idle` and begin discovery.
    pub fn start(&mut self, now: Instant) {
        if self.state == WtpState::Idle {
            tracing::info!("WTP {} starting", self.config.identity.name);
            self.transition(now, WtpState::Discovery);
        }
    }

    /// Administrative teardown. The state machine ends in `Dead`.
    pub fn teardown(&mut self, now: Instant) {
        if self.state != WtpState::Dead {
            self.transition(now, WtpState::Dead);
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> WtpState {
        self.state
    }

    /// Counters and recent transitions.
    #[must_use]
    pub fn stats(&self) -> WtpStats {
        WtpStats {
            transport: self.reliable.stats(),
            ..self.stats.clone()
        }
    }

    /// Identifier of the open control session.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.reliable.session().map(|s| s.id())
    }

    /// The AC currently selected, if any.
    #[must_use]
    pub fn selected_ac(&self) -> Option<SocketAddr> {
        self.selected.as_ref().map(|r| r.from)
    }

    /// Security state for the selected AC.
    #[must_use]
    pub fn security_session(&self) -> &SecuritySession {
        self.security.session()
    }

    /// Whether `addr` is excluded from the current discovery cycle or
    /// rejected our credentials.
    #[must_use]
    pub fn is_excluded(&self, addr: SocketAddr) -> bool {
        self.discovery.is_excluded(addr)
    }

    /// Allow an AC that rejected our credentials to be selected again,
    /// for instance after the operator fixed the key. Returns whether `addr`
    /// was rejected.
    pub fn forgive_ac(&mut self, addr: SocketAddr) -> bool {
        let forgiven = self.discovery.forgive(addr);
        if forgiven {
            tracing::info!("AC {} may be selected again", addr);
        }
        forgiven
    }

    /// Whether a request awaits its response.
    #[must_use]
    pub fn has_pending_request(&self) -> bool {
        self.reliable.has_pending()
    }

    /// Partially reassembled control messages held.
    #[must_use]
    pub fn buffered_messages(&self) -> usize {
        self.reliable.buffered_messages()
    }

    /// Echo interval in effect, including any AC override.
    #[must_use]
    pub fn echo_interval(&self) -> Duration {
        self.echo_interval
    }

    /// Earliest timer deadline.
    #[must_use]
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Next datagram to send.
    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.outgoing.pop_front()
    }

    /// Process every timer due at `now`.
    pub fn handle_timeout(&mut self, now: Instant) {
        while let Some(id) = self.timers.poll_expired(now) {
            tracing::trace!("Timer {:?} expired in {}", id, self.state);
            self.on_timer(now, id);
        }
    }

    /// Process one inbound datagram.
    pub fn handle_datagram(&mut self, now: Instant, from: SocketAddr, datagram: &[u8]) {
        let (preamble, body) = match fragment::split_preamble(datagram) {
            Ok(parts) => parts,
            Err(e) => {
                tracing::debug!("Dropping datagram from {}: {}", from, e);
                return;
            }
        };

        match preamble {
            Preamble::Clear => self.on_clear(from, body),
            _ if self.selected_ac() != Some(from) => {
                tracing::debug!("Dropping {:?} datagram from unselected {}", preamble, from);
            }
            Preamble::Handshake => {
                if self.state == WtpState::SecurityConnect {
                    self.security.handle_datagram(body);
                    self.check_security(now);
                }
            }
            Preamble::Control => {
                if self.state.has_control_session() {
                    self.on_control(now, body);
                }
            }
            Preamble::Keepalive => {
                if self.state == WtpState::Run
                    && self.reliable.is_keepalive(body, self.security.service_mut())
                {
                    tracing::trace!("Keep-alive from {}", from);
                    self.timers.reset(TimerId::KeepaliveDead, now);
                }
            }
        }
    }

    fn on_clear(&mut self, from: SocketAddr, body: &[u8]) {
        if self.state != WtpState::Discovery {
            return;
        }
        let Some((sequence, bytes)) = discovery::decode_clear(body) else {
            return;
        };
        match self.codec.decode(bytes) {
            Ok(message) if message.message_type == MessageType::DiscoveryResponse => {
                self.discovery
                    .on_response(from, sequence, &message, &self.registry);
            }
            Ok(message) => {
                tracing::debug!("Unexpected {:?} from {}", message.message_type, from);
            }
            Err(e) => tracing::debug!("Undecodable discovery message from {}: {}", from, e),
        }
    }

    fn on_control(&mut self, now: Instant, body: &[u8]) {
        let inbound = self
            .reliable
            .on_datagram(body, self.security.service_mut(), &mut self.timers);

        match inbound {
            Inbound::Response(bytes) => match self.codec.decode(&bytes) {
                Ok(message) => self.on_response(now, message),
                Err(e) => tracing::warn!("Undecodable response: {}", e),
            },
            Inbound::Request { sequence, payload } => match self.codec.decode(&payload) {
                Ok(message) => self.on_ac_request(now, sequence, &message),
                Err(e) => tracing::warn!("Undecodable AC request seq {}: {}", sequence, e),
            },
            Inbound::Replay(datagrams) => self.queue_to_ac(datagrams),
            Inbound::Pending | Inbound::Discarded(_) => {}
        }
    }

    fn on_timer(&mut self, now: Instant, id: TimerId) {
        match (self.state, id) {
            (WtpState::Discovery, TimerId::Discovery) => self.end_discovery_round(now),
            (WtpState::Sulking, TimerId::Silent) => self.transition(now, WtpState::Discovery),
            (WtpState::SecurityConnect, TimerId::SecuritySession) => {
                let outcome = self.security.on_timeout();
                self.apply_security_outcome(now, outcome);
            }
            (state, TimerId::Retransmit) if state.has_control_session() => {
                match self.reliable.on_retransmit_timeout(&mut self.timers, now) {
                    RetransmitOutcome::Resend(datagrams) => self.queue_to_ac(datagrams),
                    RetransmitOutcome::PeerUnreachable => self.on_peer_unreachable(now),
                    RetransmitOutcome::Idle => {}
                }
            }
            (WtpState::Run, TimerId::Echo) => self.on_echo_timer(now),
            (WtpState::Run, TimerId::Keepalive) => self.on_keepalive_timer(now),
            (WtpState::Run, TimerId::KeepaliveDead) => {
                tracing::warn!("No keep-alive from AC, resetting");
                self.transition(now, WtpState::Reset);
            }
            (WtpState::Run, TimerId::Statistics) => self.on_statistics_timer(now),
            (state, id) => tracing::debug!("Ignoring {:?} expiry in {}", id, state),
        }
    }

    fn on_peer_unreachable(&mut self, now: Instant) {
        self.awaiting = None;
        if self.state == WtpState::Join {
            tracing::warn!("AC {:?} unreachable during join", self.selected_ac());
            self.transition(now, WtpState::Discovery);
        } else {
            tracing::warn!("AC {:?} unreachable in {}", self.selected_ac(), self.state);
            self.transition(now, WtpState::Reset);
        }
    }

    fn transition(&mut self, now: Instant, next: WtpState) {
        let previous = self.state;
        if !previous.can_transition_to(next) {
            tracing::warn!("Unexpected transition {} -> {}", previous, next);
        }
        tracing::info!("{} -> {}", previous, next);

        self.timers.disable_all();
        if self.stats.history.len() == STATE_HISTORY_LEN {
            self.stats.history.pop_front();
        }
        self.stats.history.push_back((previous, next));
        self.state = next;

        match next {
            WtpState::Idle | WtpState::SecurityConnect => {}
            WtpState::Discovery => self.enter_discovery(now),
            WtpState::Sulking => {
                self.stats.sulks += 1;
                self.discovery.clear_exclusions();
                self.timers
                    .enable(TimerId::Silent, self.config.discovery.silent_interval, now);
            }
            WtpState::SecuritySetup => self.enter_security_setup(now),
            WtpState::Join => self.enter_join(now),
            WtpState::Configure => self.enter_configure(now),
            WtpState::DataCheck => self.enter_data_check(now),
            WtpState::Run => self.enter_run(now),
            WtpState::Reset => {
                self.stats.resets += 1;
                self.transition(now, WtpState::Discovery);
            }
            WtpState::Dead => {
                self.reliable.reset();
                self.security.reset();
                self.selected = None;
                self.awaiting = None;
            }
        }
    }

    fn enter_discovery(&mut self, now: Instant) {
        self.reliable.reset();
        self.security.reset();
        self.selected = None;
        self.awaiting = None;
        self.echo_outstanding = false;
        self.echo_interval = self.config.timers.echo;
        self.discovery.begin_cycle();
        self.start_discovery_round(now);
    }

    fn start_discovery_round(&mut self, now: Instant) {
        let discovery_type = if self.registry.is_fallback() {
            DISCOVERY_TYPE_UNKNOWN
        } else {
            DISCOVERY_TYPE_STATIC
        };
        let request = Message::new(MessageType::DiscoveryRequest)
            .with(MessageElement::DiscoveryType(discovery_type))
            .with(MessageElement::WtpName(self.config.identity.name.clone()))
            .with(MessageElement::BoardData(self.config.identity.board.clone()))
            .with(MessageElement::WtpDescriptor(
                self.config.identity.descriptor.clone(),
            ));
        let bytes = match self.codec.encode(&request) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Cannot encode discovery request: {}", e);
                Vec::new()
            }
        };

        let round = self.discovery.start_round(
            &mut self.registry,
            self.resolver.as_ref(),
            &bytes,
            &mut self.timers,
            now,
        );
        self.stats.discovery_rounds += 1;
        self.outgoing
            .extend(round.into_iter().map(|(destination, contents)| Transmit {
                destination,
                contents,
            }));
    }

    fn end_discovery_round(&mut self, now: Instant) {
        match self.discovery.select() {
            Selection::Selected(response) => {
                self.selected = Some(response);
                self.transition(now, WtpState::SecuritySetup);
            }
            Selection::RetryRound => self.start_discovery_round(now),
            Selection::Exhausted => self.transition(now, WtpState::Sulking),
        }
    }

    fn enter_security_setup(&mut self, now: Instant) {
        let Some(ac) = self.selected_ac() else {
            self.transition(now, WtpState::Discovery);
            return;
        };
        match self.security.begin(ac, &mut self.timers, now) {
            Ok(()) => {
                self.transition(now, WtpState::SecurityConnect);
                // Re-arm after the state change cleared the table
                self.timers.enable(
                    TimerId::SecuritySession,
                    self.config.timers.security_session,
                    now,
                );
                self.check_security(now);
            }
            Err(e) => {
                tracing::warn!("Cannot start handshake with {}: {}", ac, e);
                self.exclude_selected();
                self.transition(now, WtpState::Discovery);
            }
        }
    }

    fn check_security(&mut self, now: Instant) {
        self.flush_handshake();
        let outcome = self.security.poll(&mut self.timers);
        self.apply_security_outcome(now, outcome);
    }

    fn flush_handshake(&mut self) {
        let Some(ac) = self.selected_ac() else {
            return;
        };
        while let Some(message) = self.security.poll_transmit() {
            self.outgoing.push_back(Transmit {
                destination: ac,
                contents: fragment::with_preamble(Preamble::Handshake, &message),
            });
        }
    }

    fn apply_security_outcome(&mut self, now: Instant, outcome: SecurityOutcome) {
        match outcome {
            SecurityOutcome::Pending => {}
            SecurityOutcome::Established(policy) => {
                tracing::debug!("Data channel policy {:#04x}", policy.bits());
                self.transition(now, WtpState::Join);
            }
            SecurityOutcome::Retry => self.transition(now, WtpState::SecuritySetup),
            SecurityOutcome::AuthenticationFailure => {
                if let Some(ac) = self.selected_ac() {
                    tracing::warn!("AC {} rejected our credentials, not retrying it", ac);
                    self.discovery.reject(ac);
                    self.stats.excluded_acs += 1;
                }
                self.transition(now, WtpState::Discovery);
            }
            SecurityOutcome::PermanentFailure | SecurityOutcome::PolicyMismatch => {
                self.exclude_selected();
                self.transition(now, WtpState::Discovery);
            }
        }
    }

    fn exclude_selected(&mut self) {
        if let Some(ac) = self.selected_ac() {
            tracing::warn!("Excluding AC {} from this discovery cycle", ac);
            self.discovery.exclude(ac);
            self.stats.excluded_acs += 1;
        }
    }

    fn queue_to_ac(&mut self, datagrams: Vec<Vec<u8>>) {
        let Some(ac) = self.selected_ac() else {
            return;
        };
        self.outgoing
            .extend(datagrams.into_iter().map(|contents| Transmit {
                destination: ac,
                contents,
            }));
    }

    /// Encode and send a WTP-initiated request.
    fn send_request(&mut self, now: Instant, message: &Message) -> Result<()> {
        let bytes = self.codec.encode(message)?;
        let datagrams = self.reliable.send_request(
            &bytes,
            self.security.service_mut(),
            &mut self.timers,
            now,
        )?;
        self.awaiting = Some(message.message_type);
        self.queue_to_ac(datagrams);
        Ok(())
    }

    /// Encode and send the response to AC request `sequence`.
    fn send_response(&mut self, sequence: u8, message: &Message) -> Result<()> {
        let bytes = self.codec.encode(message)?;
        let datagrams = self
            .reliable
            .send_response(sequence, &bytes, self.security.service_mut())?;
        self.queue_to_ac(datagrams);
        Ok(())
    }
}

impl std::fmt::Debug for Wtp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wtp")
            .field("state", &self.state)
            .field("selected", &self.selected_ac())
            .field("session", &self.session_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AcDescriptor;
    use wtp_crypto::ClearSecurityService;

    fn config(hosts: &[&str]) -> WtpConfig {
        let mut config = WtpConfig::default();
        config.discovery.static_hosts = hosts.iter().map(|h| (*h).to_string()).collect();
        config.discovery.search = false;
        config
    }

    fn discovery_response(sequence: u8, priority: u8) -> Vec<u8> {
        let message = Message::new(MessageType::DiscoveryResponse)
            .with(MessageElement::AcDescriptor(AcDescriptor {
                max_wtps: 10,
                ..AcDescriptor::default()
            }))
            .with(MessageElement::AcNameWithPriority {
                priority,
                name: "ac".into(),
            });
        discovery::encode_clear(sequence, &TlvCodec.encode(&message).unwrap())
    }

    fn drain(wtp: &mut Wtp) -> Vec<Transmit> {
        std::iter::from_fn(|| wtp.poll_transmit()).collect()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = WtpConfig::default();
        config.network.mtu = 10;
        assert!(Wtp::new(config, Box::new(ClearSecurityService::default())).is_err());
    }

    #[test]
    fn test_start_sends_discovery() {
        let now = Instant::now();
        let mut wtp = Wtp::new(
            config(&["192.0.2.1"]),
            Box::new(ClearSecurityService::default()),
        )
        .unwrap();
        assert_eq!(wtp.state(), WtpState::Idle);
        wtp.start(now);

        assert_eq!(wtp.state(), WtpState::Discovery);
        let sent = drain(&mut wtp);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, "192.0.2.1:5246".parse().unwrap());
        assert_eq!(sent[0].contents[0], Preamble::Clear as u8);
        assert_eq!(wtp.poll_timeout(), Some(now + Duration::from_secs(20)));

        let (_, body) = discovery::decode_clear(&sent[0].contents[1..]).unwrap();
        let request = TlvCodec.decode(body).unwrap();
        assert_eq!(request.message_type, MessageType::DiscoveryRequest);
        assert_eq!(request.board_data(), Some(&wtp.config.identity.board));
        assert_eq!(request.wtp_descriptor(), Some(&wtp.config.identity.descriptor));
    }

    #[test]
    fn test_cleartext_path_reaches_join() {
        let now = Instant::now();
        let ac: SocketAddr = "192.0.2.1:5246".parse().unwrap();
        let mut wtp = Wtp::new(config(&["192.0.2.1"]), Box::new(ClearSecurityService::default()))
            .unwrap();
        wtp.start(now);
        let sequence = drain(&mut wtp)[0].contents[1];

        wtp.handle_datagram(now, ac, &discovery_response(sequence, 1));
        wtp.handle_timeout(now + Duration::from_secs(20));

        assert_eq!(wtp.state(), WtpState::Join);
        assert_eq!(wtp.selected_ac(), Some(ac));
        assert!(wtp.session_id().is_some());
        assert!(wtp.has_pending_request());
        let sent = drain(&mut wtp);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].contents[0], Preamble::Control as u8);
    }

    #[test]
    fn test_exhaustion_sulks_then_retries() {
        let now = Instant::now();
        let mut config = config(&["192.0.2.1"]);
        config.discovery.max_rounds = 2;
        let mut wtp = Wtp::new(config, Box::new(ClearSecurityService::default())).unwrap();
        wtp.start(now);

        let mut t = now;
        for _ in 0..2 {
            t += Duration::from_secs(20);
            wtp.handle_timeout(t);
        }
        assert_eq!(wtp.state(), WtpState::Sulking);
        assert_eq!(wtp.stats().sulks, 1);

        wtp.handle_timeout(t + Duration::from_secs(30));
        assert_eq!(wtp.state(), WtpState::Discovery);
    }

    #[test]
    fn test_teardown_is_terminal() {
        let now = Instant::now();
        let mut wtp = Wtp::new(config(&["192.0.2.1"]), Box::new(ClearSecurityService::default()))
            .unwrap();
        wtp.start(now);
        wtp.teardown(now);
        assert_eq!(wtp.state(), WtpState::Dead);
        assert_eq!(wtp.poll_timeout(), None);

        wtp.start(now);
        wtp.handle_timeout(now + Duration::from_secs(100));
        assert_eq!(wtp.state(), WtpState::Dead);
    }

    #[test]
    fn test_history_bounded() {
        let now = Instant::now();
        let mut config = config(&["192.0.2.1"]);
        config.discovery.max_rounds = 1;
        let mut wtp = Wtp::new(config, Box::new(ClearSecurityService::default())).unwrap();
        wtp.start(now);

        let mut t = now;
        for _ in 0..STATE_HISTORY_LEN {
            t += Duration::from_secs(60);
            wtp.handle_timeout(t);
        }
        assert_eq!(wtp.stats().history.len(), STATE_HISTORY_LEN);
    }
}
