//! Reliable control transport.
//!
//! Stop-and-wait request/response delivery over protected datagrams. The
//! transport never performs I/O: every operation returns the datagrams to
//! send and the caller hands them to the socket.
//!
//! ```text
//! send_request ──► PendingRequest ──(Retransmit timer)──► resend ×max_retries
//!                        │                                      │
//!                   response complete                      PeerUnreachable
//!                        ▼
//!                  Inbound::Response
//! ```
//!
//! AC-initiated requests use a second, independent sequence space. The last
//! response is cached so a retransmitted request is answered byte-for-byte
//! without being processed twice.

use crate::error::ReliableError;
use crate::fragment::{self, Fragment, Preamble, HEADER_SIZE, PREAMBLE_SIZE};
use crate::reassembly::{ReassemblyBuffer, MAX_MESSAGE_SIZE};
use crate::session::ControlSession;
use crate::timer::{TimerId, TimerManager};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use wtp_crypto::{HandshakeStatus, SecurityService};

/// Control transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReliableStats {
    /// New requests sent
    pub requests_sent: u64,
    /// Request retransmissions
    pub retransmissions: u64,
    /// Complete responses delivered
    pub responses_delivered: u64,
    /// Complete AC requests delivered
    pub requests_received: u64,
    /// Cached responses replayed
    pub replays: u64,
    /// Datagrams discarded
    pub discarded: u64,
}

/// Why an inbound datagram was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No control session open
    NoSession,
    /// Channel protection rejected the datagram
    Decrypt,
    /// Fragment header malformed
    Malformed,
    /// Fragment belongs to another session
    SessionMismatch,
    /// Response without a matching pending request
    UnexpectedResponse,
    /// Request outside the expected sequence
    StaleRequest,
    /// Fragment contradicts its message
    Reassembly,
}

/// Result of processing one inbound control datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Response to the pending request
    Response(Vec<u8>),
    /// New AC-initiated request; answer with [`ReliableTransport::send_response`]
    Request {
        /// Request sequence
        sequence: u8,
        /// Message bytes
        payload: Vec<u8>,
    },
    /// Repeat of the last request; resend these datagrams
    Replay(Vec<Vec<u8>>),
    /// Fragment buffered, message incomplete
    Pending,
    /// Datagram dropped
    Discarded(DiscardReason),
}

/// Retransmit timer outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetransmitOutcome {
    /// Resend these datagrams
    Resend(Vec<Vec<u8>>),
    /// Retry budget exhausted, pending request dropped
    PeerUnreachable,
    /// Nothing pending
    Idle,
}

#[derive(Debug, Clone)]
struct PendingRequest {
    sequence: u8,
    datagrams: Vec<Vec<u8>>,
    sent_at: Instant,
    retry_count: u32,
    max_retries: u32,
}

/// Stop-and-wait transport for one control session.
#[derive(Debug, Clone)]
pub struct ReliableTransport {
    session: Option<ControlSession>,
    retransmit_interval: Duration,
    max_retries: u32,
    pending: Option<PendingRequest>,
    responses: BTreeMap<u8, ReassemblyBuffer>,
    requests: BTreeMap<u8, ReassemblyBuffer>,
    last_response: Option<(u8, Vec<Vec<u8>>)>,
    stats: ReliableStats,
}

impl ReliableTransport {
    /// Create a transport with no session.
    #[must_use]
    pub fn new(retransmit_interval: Duration, max_retries: u8) -> Self {
        Self {
            session: None,
            retransmit_interval,
            max_retries: u32::from(max_retries),
            pending: None,
            responses: BTreeMap::new(),
            requests: BTreeMap::new(),
            last_response: None,
            stats: ReliableStats::default(),
        }
    }

    /// Attach a freshly opened control session.
    pub fn open(&mut self, session: ControlSession) {
        self.clear();
        tracing::debug!("Control session {} opened with {}", session.id(), session.ac());
        self.session = Some(session);
    }

    /// Drop the session, pending request, buffers and cached response.
    ///
    /// Counters are kept.
    pub fn reset(&mut self) {
        self.clear();
        self.session = None;
    }

    fn clear(&mut self) {
        self.pending = None;
        self.responses.clear();
        self.requests.clear();
        self.last_response = None;
    }

    /// Current session.
    #[must_use]
    pub fn session(&self) -> Option<&ControlSession> {
        self.session.as_ref()
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> ReliableStats {
        self.stats
    }

    /// Whether a request awaits its response.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Sequence of the pending request.
    #[must_use]
    pub fn pending_sequence(&self) -> Option<u8> {
        self.pending.as_ref().map(|p| p.sequence)
    }

    /// When the pending request was first sent.
    #[must_use]
    pub fn pending_since(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.sent_at)
    }

    /// Partially reassembled messages held.
    #[must_use]
    pub fn buffered_messages(&self) -> usize {
        self.responses.len() + self.requests.len()
    }

    fn ready<'a>(
        session: Option<&'a mut ControlSession>,
        security: &dyn SecurityService,
    ) -> Result<&'a mut ControlSession, ReliableError> {
        match session {
            Some(session) if security.poll() == HandshakeStatus::Established => Ok(session),
            _ => Err(ReliableError::NotReady),
        }
    }

    fn max_payload(mtu: usize, overhead: usize) -> Result<usize, ReliableError> {
        let required = PREAMBLE_SIZE + overhead + HEADER_SIZE;
        if mtu <= required {
            return Err(ReliableError::MtuTooSmall { mtu, required });
        }
        Ok(mtu - required)
    }

    fn protect(
        session: &ControlSession,
        sequence: u8,
        response: bool,
        payload: &[u8],
        security: &mut dyn SecurityService,
    ) -> Result<Vec<Vec<u8>>, ReliableError> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ReliableError::MessageTooLarge {
                len: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let max_payload = Self::max_payload(session.mtu(), security.overhead())?;
        fragment::split(session.id(), sequence, response, payload, max_payload)
            .iter()
            .map(|f| {
                security
                    .encrypt(f)
                    .map(|sealed| fragment::with_preamble(Preamble::Control, &sealed))
                    .map_err(ReliableError::Encrypt)
            })
            .collect()
    }

    /// Fragment, protect and register a new request.
    ///
    /// Returns the datagrams for the first transmission and arms the
    /// Retransmit timer.
    ///
    /// # Errors
    ///
    /// `TransportBusy` while a request is pending, `NotReady` without an
    /// established session, `MtuTooSmall`/`MessageTooLarge` for sizes that
    /// cannot be framed.
    pub fn send_request(
        &mut self,
        payload: &[u8],
        security: &mut dyn SecurityService,
        timers: &mut TimerManager,
        now: Instant,
    ) -> Result<Vec<Vec<u8>>, ReliableError> {
        if let Some(pending) = &self.pending {
            return Err(ReliableError::TransportBusy(pending.sequence));
        }
        let session = Self::ready(self.session.as_mut(), security)?;

        let sequence = session.local_sequence();
        let datagrams = Self::protect(session, sequence, false, payload, security)?;
        session.next_local_sequence();

        self.responses.clear();
        self.pending = Some(PendingRequest {
            sequence,
            datagrams: datagrams.clone(),
            sent_at: now,
            retry_count: 0,
            max_retries: self.max_retries,
        });
        timers.enable(TimerId::Retransmit, self.retransmit_interval, now);
        self.stats.requests_sent += 1;
        tracing::trace!(
            "Request seq {} sent in {} fragment(s)",
            sequence,
            datagrams.len()
        );
        Ok(datagrams)
    }

    /// Retransmit timer expired.
    pub fn on_retransmit_timeout(
        &mut self,
        timers: &mut TimerManager,
        now: Instant,
    ) -> RetransmitOutcome {
        let Some(pending) = self.pending.as_mut() else {
            return RetransmitOutcome::Idle;
        };

        if pending.retry_count < pending.max_retries {
            pending.retry_count += 1;
            self.stats.retransmissions += 1;
            timers.enable(TimerId::Retransmit, self.retransmit_interval, now);
            tracing::debug!(
                "Retransmitting seq {} ({}/{})",
                pending.sequence,
                pending.retry_count,
                pending.max_retries
            );
            return RetransmitOutcome::Resend(pending.datagrams.clone());
        }

        tracing::warn!(
            "No response to seq {} after {} transmissions",
            pending.sequence,
            pending.retry_count + 1
        );
        self.pending = None;
        self.responses.clear();
        RetransmitOutcome::PeerUnreachable
    }

    /// Process the body of a `Control` datagram.
    pub fn on_datagram(
        &mut self,
        body: &[u8],
        security: &mut dyn SecurityService,
        timers: &mut TimerManager,
    ) -> Inbound {
        let inbound = self.process(body, security, timers);
        if let Inbound::Discarded(reason) = inbound {
            self.stats.discarded += 1;
            tracing::debug!("Control datagram discarded: {:?}", reason);
        }
        inbound
    }

    fn process(
        &mut self,
        body: &[u8],
        security: &mut dyn SecurityService,
        timers: &mut TimerManager,
    ) -> Inbound {
        let Some(session) = self.session.as_ref() else {
            return Inbound::Discarded(DiscardReason::NoSession);
        };
        let Ok(plaintext) = security.decrypt(body) else {
            return Inbound::Discarded(DiscardReason::Decrypt);
        };
        let Ok(fragment) = Fragment::parse(&plaintext) else {
            return Inbound::Discarded(DiscardReason::Malformed);
        };
        let header = fragment.header;
        if header.session_id != session.id() {
            return Inbound::Discarded(DiscardReason::SessionMismatch);
        }

        if header.flags.is_response() {
            let Some(expected) = self.pending_sequence() else {
                self.responses.clear();
                return Inbound::Discarded(DiscardReason::UnexpectedResponse);
            };
            self.responses.retain(|&sequence, _| sequence == expected);
            if header.sequence != expected {
                return Inbound::Discarded(DiscardReason::UnexpectedResponse);
            }

            let buffer = self.responses.entry(header.sequence).or_default();
            match buffer.insert(header.offset, fragment.payload, header.flags.is_last()) {
                Ok(None) => Inbound::Pending,
                Ok(Some(message)) => {
                    self.pending = None;
                    self.responses.clear();
                    timers.disable(TimerId::Retransmit);
                    self.stats.responses_delivered += 1;
                    Inbound::Response(message)
                }
                Err(e) => {
                    tracing::debug!("Response seq {} dropped: {}", header.sequence, e);
                    self.responses.remove(&header.sequence);
                    Inbound::Discarded(DiscardReason::Reassembly)
                }
            }
        } else {
            let remote = session.remote_sequence();
            if remote.is_repeat(header.sequence) {
                return match &self.last_response {
                    Some((sequence, datagrams))
                        if *sequence == header.sequence && header.flags.is_last() =>
                    {
                        self.stats.replays += 1;
                        tracing::debug!("Replaying response to seq {}", sequence);
                        Inbound::Replay(datagrams.clone())
                    }
                    _ => Inbound::Discarded(DiscardReason::StaleRequest),
                };
            }
            if !remote.accepts(header.sequence) {
                return Inbound::Discarded(DiscardReason::StaleRequest);
            }

            self.requests.retain(|&sequence, _| sequence == header.sequence);
            let buffer = self.requests.entry(header.sequence).or_default();
            match buffer.insert(header.offset, fragment.payload, header.flags.is_last()) {
                Ok(None) => Inbound::Pending,
                Ok(Some(payload)) => {
                    self.requests.clear();
                    self.stats.requests_received += 1;
                    Inbound::Request {
                        sequence: header.sequence,
                        payload,
                    }
                }
                Err(e) => {
                    tracing::debug!("Request seq {} dropped: {}", header.sequence, e);
                    self.requests.remove(&header.sequence);
                    Inbound::Discarded(DiscardReason::Reassembly)
                }
            }
        }
    }

    /// Fragment and protect the response to AC request `sequence`.
    ///
    /// The request is recorded as processed and the datagrams cached for
    /// replay.
    ///
    /// # Errors
    ///
    /// `NotReady` without an established session, or a framing error.
    pub fn send_response(
        &mut self,
        sequence: u8,
        payload: &[u8],
        security: &mut dyn SecurityService,
    ) -> Result<Vec<Vec<u8>>, ReliableError> {
        let session = Self::ready(self.session.as_mut(), security)?;
        let datagrams = Self::protect(session, sequence, true, payload, security)?;
        session.set_remote_sequence(sequence);
        self.last_response = Some((sequence, datagrams.clone()));
        Ok(datagrams)
    }

    /// Build a protected keep-alive datagram.
    ///
    /// # Errors
    ///
    /// `NotReady` without an established session.
    pub fn keepalive(&self, security: &mut dyn SecurityService) -> Result<Vec<u8>, ReliableError> {
        let session = self.session.as_ref().ok_or(ReliableError::NotReady)?;
        let sealed = security
            .encrypt(session.id().as_bytes())
            .map_err(ReliableError::Encrypt)?;
        Ok(fragment::with_preamble(Preamble::Keepalive, &sealed))
    }

    /// Whether a `Keepalive` datagram body echoes this session.
    pub fn is_keepalive(&self, body: &[u8], security: &mut dyn SecurityService) -> bool {
        let Some(session) = self.session.as_ref() else {
            return false;
        };
        security
            .decrypt(body)
            .is_ok_and(|plain| plain.as_slice() == session.id().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::split_preamble;
    use crate::session::SessionId;
    use wtp_crypto::ClearSecurityService;
    use wtp_transport::TransportKind;

    const SID: SessionId = SessionId::from_bytes([7; 16]);

    struct Harness {
        transport: ReliableTransport,
        security: ClearSecurityService,
        timers: TimerManager,
        now: Instant,
    }

    impl Harness {
        fn new(mtu: usize) -> Self {
            let mut security = ClearSecurityService::default();
            security
                .start_handshake("192.0.2.1:5246".parse().unwrap())
                .unwrap();
            let mut transport = ReliableTransport::new(Duration::from_secs(3), 5);
            transport.open(ControlSession::with_id(
                SID,
                "192.0.2.1:5246".parse().unwrap(),
                TransportKind::Udp,
                mtu,
            ));
            Self {
                transport,
                security,
                timers: TimerManager::new(),
                now: Instant::now(),
            }
        }

        fn send(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>, ReliableError> {
            self.transport
                .send_request(payload, &mut self.security, &mut self.timers, self.now)
        }

        fn deliver(&mut self, datagram: &[u8]) -> Inbound {
            let (preamble, body) = split_preamble(datagram).unwrap();
            assert_eq!(preamble, Preamble::Control);
            self.transport
                .on_datagram(body, &mut self.security, &mut self.timers)
        }
    }

    fn from_ac(sequence: u8, response: bool, message: &[u8], max_payload: usize) -> Vec<Vec<u8>> {
        fragment::split(SID, sequence, response, message, max_payload)
            .iter()
            .map(|f| fragment::with_preamble(Preamble::Control, f))
            .collect()
    }

    #[test]
    fn test_request_response() {
        let mut h = Harness::new(1400);
        let sent = h.send(b"join").unwrap();
        assert_eq!(sent.len(), 1);
        assert!(h.timers.is_enabled(TimerId::Retransmit));
        assert!(matches!(h.send(b"again"), Err(ReliableError::TransportBusy(0))));

        let reply = from_ac(0, true, b"ok", 100);
        assert_eq!(h.deliver(&reply[0]), Inbound::Response(b"ok".to_vec()));
        assert!(!h.transport.has_pending());
        assert!(!h.timers.is_enabled(TimerId::Retransmit));
        assert_eq!(h.transport.session().unwrap().local_sequence(), 1);
    }

    #[test]
    fn test_not_ready_without_security() {
        let mut h = Harness::new(1400);
        h.security.close();
        assert!(matches!(h.send(b"x"), Err(ReliableError::NotReady)));

        let mut bare = ReliableTransport::new(Duration::from_secs(3), 5);
        let mut security = ClearSecurityService::default();
        let mut timers = TimerManager::new();
        assert!(matches!(
            bare.send_request(b"x", &mut security, &mut timers, Instant::now()),
            Err(ReliableError::NotReady)
        ));
    }

    #[test]
    fn test_fragments_fit_mtu() {
        let mut h = Harness::new(600);
        let message = vec![0x5A; 2000];
        let sent = h.send(&message).unwrap();
        assert!(sent.len() > 1);
        assert!(sent.iter().all(|d| d.len() <= 600));
    }

    #[test]
    fn test_mtu_too_small() {
        let mut h = Harness::new(HEADER_SIZE + PREAMBLE_SIZE);
        assert!(matches!(h.send(b"x"), Err(ReliableError::MtuTooSmall { .. })));
        // A failed send does not consume a sequence number
        assert_eq!(h.transport.session().unwrap().local_sequence(), 0);
    }

    #[test]
    fn test_bounded_retransmission() {
        let mut h = Harness::new(1400);
        let first = h.send(b"echo").unwrap();
        let mut transmissions = 1;

        loop {
            match h.transport.on_retransmit_timeout(&mut h.timers, h.now) {
                RetransmitOutcome::Resend(datagrams) => {
                    assert_eq!(datagrams, first);
                    transmissions += 1;
                }
                RetransmitOutcome::PeerUnreachable => break,
                RetransmitOutcome::Idle => panic!("request vanished"),
            }
        }
        assert_eq!(transmissions, 6);
        assert!(!h.transport.has_pending());
        assert_eq!(
            h.transport.on_retransmit_timeout(&mut h.timers, h.now),
            RetransmitOutcome::Idle
        );
        assert_eq!(h.transport.stats().retransmissions, 5);
    }

    #[test]
    fn test_duplicate_response_not_redelivered() {
        let mut h = Harness::new(1400);
        h.send(b"req").unwrap();
        let reply = from_ac(0, true, b"resp", 100);
        assert_eq!(h.deliver(&reply[0]), Inbound::Response(b"resp".to_vec()));
        assert_eq!(
            h.deliver(&reply[0]),
            Inbound::Discarded(DiscardReason::UnexpectedResponse)
        );

        // Stale response while the next request is pending
        h.send(b"req2").unwrap();
        assert_eq!(
            h.deliver(&reply[0]),
            Inbound::Discarded(DiscardReason::UnexpectedResponse)
        );
        assert_eq!(h.transport.stats().responses_delivered, 1);
    }

    #[test]
    fn test_out_of_order_response_fragments() {
        let mut h = Harness::new(1400);
        h.send(b"req").unwrap();
        let message: Vec<u8> = (0..=255u8).collect();
        let reply = from_ac(0, true, &message, 100);
        assert_eq!(reply.len(), 3);

        assert_eq!(h.deliver(&reply[2]), Inbound::Pending);
        assert_eq!(h.deliver(&reply[0]), Inbound::Pending);
        assert_eq!(h.transport.buffered_messages(), 1);
        assert_eq!(h.deliver(&reply[1]), Inbound::Response(message));
        assert_eq!(h.transport.buffered_messages(), 0);
    }

    #[test]
    fn test_missing_middle_fragment_never_delivered() {
        let mut h = Harness::new(1400);
        h.send(b"req").unwrap();
        let reply = from_ac(0, true, &[1u8; 300], 100);
        assert_eq!(h.deliver(&reply[0]), Inbound::Pending);
        assert_eq!(h.deliver(&reply[2]), Inbound::Pending);
        assert_eq!(h.deliver(&reply[2]), Inbound::Pending);
        assert!(h.transport.has_pending());
    }

    #[test]
    fn test_session_mismatch_discarded() {
        let mut h = Harness::new(1400);
        h.send(b"req").unwrap();
        let other = fragment::split(SessionId::from_bytes([9; 16]), 0, true, b"x", 100);
        let datagram = fragment::with_preamble(Preamble::Control, &other[0]);
        assert_eq!(
            h.deliver(&datagram),
            Inbound::Discarded(DiscardReason::SessionMismatch)
        );
        assert_eq!(
            h.deliver(&[Preamble::Control as u8, 1, 2, 3]),
            Inbound::Discarded(DiscardReason::Malformed)
        );
    }

    #[test]
    fn test_sequence_wraps() {
        let mut h = Harness::new(1400);
        for expected in (0..=255u8).chain(0..=1) {
            h.send(b"echo").unwrap();
            assert_eq!(h.transport.pending_sequence(), Some(expected));
            let reply = from_ac(expected, true, b"ok", 100);
            assert!(matches!(h.deliver(&reply[0]), Inbound::Response(_)));
        }
    }

    #[test]
    fn test_ac_request_and_replay() {
        let mut h = Harness::new(1400);
        let request = from_ac(40, false, b"update", 100);

        let Inbound::Request { sequence, payload } = h.deliver(&request[0]) else {
            panic!("request not delivered");
        };
        assert_eq!((sequence, payload.as_slice()), (40, &b"update"[..]));
        let response = h
            .transport
            .send_response(sequence, b"done", &mut h.security)
            .unwrap();

        assert_eq!(h.deliver(&request[0]), Inbound::Replay(response));
        assert_eq!(h.transport.stats().replays, 1);

        // Only the next sequence is new
        let skipped = from_ac(42, false, b"x", 100);
        assert_eq!(
            h.deliver(&skipped[0]),
            Inbound::Discarded(DiscardReason::StaleRequest)
        );
        let next = from_ac(41, false, b"y", 100);
        assert!(matches!(h.deliver(&next[0]), Inbound::Request { sequence: 41, .. }));
    }

    #[test]
    fn test_keepalive() {
        let mut h = Harness::new(1400);
        let datagram = h.transport.keepalive(&mut h.security).unwrap();
        let (preamble, body) = split_preamble(&datagram).unwrap();
        assert_eq!(preamble, Preamble::Keepalive);
        assert!(h.transport.is_keepalive(body, &mut h.security));
        assert!(!h.transport.is_keepalive(&[0; 16], &mut h.security));
    }

    #[test]
    fn test_reset_clears_session_state() {
        let mut h = Harness::new(1400);
        h.send(b"req").unwrap();
        let reply = from_ac(0, true, &[1u8; 300], 100);
        h.deliver(&reply[0]);

        h.transport.reset();
        assert!(h.transport.session().is_none());
        assert!(!h.transport.has_pending());
        assert_eq!(h.transport.buffered_messages(), 0);
        assert_eq!(h.transport.stats().requests_sent, 1);
    }
}
