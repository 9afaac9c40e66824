//! AC discovery rounds and selection.
//!
//! A round sends one Discovery Request to every target, collects responses
//! until the Discovery timer fires and then picks an AC. Each round carries
//! its own sequence number in the clear datagram so late answers to an
//! earlier round are recognised and dropped.

use crate::config::{DiscoveryConfig, TieBreak};
use crate::fragment::{Preamble, PREAMBLE_SIZE};
use crate::message::Message;
use crate::registry::{AcOrigin, AcRegistry, HostResolver};
use crate::timer::{TimerId, TimerManager};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Instant;

/// One AC's answer within a round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponse {
    /// Responder address
    pub from: SocketAddr,
    /// How the responder is known
    pub origin: AcOrigin,
    /// Declared priority, higher is preferred
    pub priority: u8,
    /// Declared free WTP capacity
    pub capacity: u16,
    /// Declared AC name
    pub ac_name: Option<String>,
    /// Arrival index within the round
    pub arrival: usize,
}

/// Result of the end-of-round selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Join this AC
    Selected(DiscoveryResponse),
    /// Nobody usable answered, run another round
    RetryRound,
    /// Round limit reached
    Exhausted,
}

/// Discovery round state
#[derive(Debug, Clone)]
pub struct DiscoveryEngine {
    config: DiscoveryConfig,
    sequence: u8,
    responses: Vec<DiscoveryResponse>,
    rounds: u32,
    excluded: HashSet<SocketAddr>,
    rejected: HashSet<SocketAddr>,
}

/// Encode a clear discovery datagram.
#[must_use]
pub fn encode_clear(sequence: u8, message: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(PREAMBLE_SIZE + 1 + message.len());
    datagram.push(Preamble::Clear as u8);
    datagram.push(sequence);
    datagram.extend_from_slice(message);
    datagram
}

/// Split the body of a clear datagram into round sequence and message.
#[must_use]
pub fn decode_clear(body: &[u8]) -> Option<(u8, &[u8])> {
    body.split_first().map(|(&sequence, message)| (sequence, message))
}

impl DiscoveryEngine {
    /// Create an engine for `config`.
    #[must_use]
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            sequence: 0,
            responses: Vec::new(),
            rounds: 0,
            excluded: HashSet::new(),
            rejected: HashSet::new(),
        }
    }

    /// Start a fresh cycle: round count and responses cleared.
    ///
    /// Exclusions survive until [`clear_exclusions`](Self::clear_exclusions),
    /// rejections until [`forgive`](Self::forgive).
    pub fn begin_cycle(&mut self) {
        self.rounds = 0;
        self.responses.clear();
    }

    /// Emit a round of Discovery Requests and arm the Discovery timer.
    ///
    /// Returns `(destination, datagram)` pairs, one per distinct target.
    pub fn start_round(
        &mut self,
        registry: &mut AcRegistry,
        resolver: &dyn HostResolver,
        request: &[u8],
        timers: &mut TimerManager,
        now: Instant,
    ) -> Vec<(SocketAddr, Vec<u8>)> {
        self.responses.clear();
        self.sequence = self.sequence.wrapping_add(1);

        let mut targets: Vec<SocketAddr> = registry
            .resolved_candidates(resolver)
            .into_iter()
            .map(|(addr, _)| addr)
            .filter(|addr| !self.is_excluded(*addr))
            .collect();
        if self.config.search || registry.is_fallback() {
            targets.extend(AcRegistry::standard_addresses());
        }
        let mut seen = HashSet::new();
        targets.retain(|addr| seen.insert(*addr));

        timers.enable(TimerId::Discovery, self.config.interval, now);
        tracing::debug!(
            "Discovery round {} (seq {}) to {} targets",
            self.rounds + 1,
            self.sequence,
            targets.len()
        );

        let datagram = encode_clear(self.sequence, request);
        targets
            .into_iter()
            .map(|addr| (addr, datagram.clone()))
            .collect()
    }

    /// Record a Discovery Response. Returns whether it was kept.
    pub fn on_response(
        &mut self,
        from: SocketAddr,
        sequence: u8,
        message: &Message,
        registry: &AcRegistry,
    ) -> bool {
        if sequence != self.sequence {
            tracing::debug!("Stale discovery response from {} (seq {})", from, sequence);
            return false;
        }
        if self.is_excluded(from) {
            tracing::debug!("Ignoring excluded AC {}", from);
            return false;
        }
        if self.responses.iter().any(|r| r.from == from) {
            return false;
        }

        let (priority, ac_name) = match message.ac_priority() {
            Some((priority, name)) => (priority, Some(name.to_string())),
            None => (0, message.ac_name().map(str::to_string)),
        };
        let response = DiscoveryResponse {
            from,
            origin: registry.origin_of(from).unwrap_or(AcOrigin::Discovered),
            priority,
            capacity: message
                .ac_descriptor()
                .map_or(0, |d| d.free_capacity()),
            ac_name,
            arrival: self.responses.len(),
        };
        tracing::debug!("Discovery response: {:?}", response);
        self.responses.push(response);
        true
    }

    fn rank(&self, a: &DiscoveryResponse, b: &DiscoveryResponse) -> Ordering {
        let first_seen = b.arrival.cmp(&a.arrival);
        a.priority.cmp(&b.priority).then(match self.config.tie_break {
            TieBreak::FirstSeen => first_seen,
            TieBreak::Capacity => a.capacity.cmp(&b.capacity).then(first_seen),
        })
    }

    /// Pick an AC from this round's responses.
    pub fn select(&mut self) -> Selection {
        let best = self
            .responses
            .iter()
            .filter(|r| r.origin == AcOrigin::Preferred)
            .max_by(|a, b| self.rank(a, b))
            .or_else(|| self.responses.iter().max_by(|a, b| self.rank(a, b)))
            .cloned();

        if let Some(best) = best {
            tracing::info!(
                "Selected AC {} ({:?}, priority {})",
                best.from,
                best.origin,
                best.priority
            );
            return Selection::Selected(best);
        }

        self.rounds += 1;
        if self.rounds >= self.config.max_rounds {
            tracing::warn!("No AC after {} discovery rounds", self.rounds);
            Selection::Exhausted
        } else {
            Selection::RetryRound
        }
    }

    /// Discard `addr` for the rest of this cycle.
    pub fn exclude(&mut self, addr: SocketAddr) {
        self.excluded.insert(addr);
        self.responses.retain(|r| r.from != addr);
    }

    /// Discard `addr` until it is forgiven. Sulking does not clear this.
    pub fn reject(&mut self, addr: SocketAddr) {
        self.rejected.insert(addr);
        self.responses.retain(|r| r.from != addr);
    }

    /// Lift a rejection. Returns whether `addr` was rejected.
    pub fn forgive(&mut self, addr: SocketAddr) -> bool {
        self.rejected.remove(&addr)
    }

    /// Forget every cycle exclusion. Rejections stay.
    pub fn clear_exclusions(&mut self) {
        self.excluded.clear();
    }

    /// Whether `addr` is excluded or rejected.
    #[must_use]
    pub fn is_excluded(&self, addr: SocketAddr) -> bool {
        self.excluded.contains(&addr) || self.rejected.contains(&addr)
    }

    /// Whether `addr` rejected our credentials.
    #[must_use]
    pub fn is_rejected(&self, addr: SocketAddr) -> bool {
        self.rejected.contains(&addr)
    }

    /// Current round sequence.
    #[must_use]
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Empty rounds in the current cycle.
    #[must_use]
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Responses collected this round.
    #[must_use]
    pub fn responses(&self) -> &[DiscoveryResponse] {
        &self.responses
    }
}
