//! Security bootstrap.
//!
//! Drives the [`SecurityService`] handshake against the selected AC and turns
//! its status into outcomes the state machine acts on. Handshake failures are
//! counted per AC and become permanent at the configured bound;
//! authentication failures are never retried against the same AC.

use crate::config::SecurityConfig;
use crate::timer::{TimerId, TimerManager};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use wtp_crypto::{CryptoError, DataChannelPolicy, FailureKind, HandshakeStatus, SecurityService};

/// Security session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityPhase {
    /// No handshake attempted
    #[default]
    NotStarted,
    /// Handshake in flight
    Handshaking,
    /// Channel protection available
    Established,
    /// Last attempt failed
    Failed,
}

/// Per-AC security state
#[derive(Debug, Clone, Default)]
pub struct SecuritySession {
    /// Phase
    pub phase: SecurityPhase,
    /// Negotiated data channel policy
    pub policy: Option<DataChannelPolicy>,
    /// Handshake failures against `peer`
    pub failed_handshake_count: u32,
    /// Authentication failures against `peer`
    pub failed_auth_count: u32,
    /// AC the counters refer to
    pub peer: Option<SocketAddr>,
}

/// What the state machine should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityOutcome {
    /// Keep waiting
    Pending,
    /// Channel ready with the negotiated policy
    Established(DataChannelPolicy),
    /// Transient failure below the bound, try the same AC again
    Retry,
    /// Failure bound reached for this AC
    PermanentFailure,
    /// Credentials rejected
    AuthenticationFailure,
    /// No data channel mode in common
    PolicyMismatch,
}

impl SecurityOutcome {
    /// Whether the AC must be discarded for this discovery cycle.
    #[must_use]
    pub const fn excludes_ac(self) -> bool {
        matches!(
            self,
            Self::PermanentFailure | Self::AuthenticationFailure | Self::PolicyMismatch
        )
    }
}

/// Handshake driver wrapped around a security service.
pub struct SecurityBootstrap {
    service: Box<dyn SecurityService>,
    session: SecuritySession,
    local_policy: DataChannelPolicy,
    max_failures: u32,
    timeout: Duration,
}

impl SecurityBootstrap {
    /// Create a bootstrap around `service`.
    #[must_use]
    pub fn new(service: Box<dyn SecurityService>, config: &SecurityConfig, timeout: Duration) -> Self {
        Self {
            service,
            session: SecuritySession::default(),
            local_policy: config.policy,
            max_failures: config.max_handshake_failures,
            timeout,
        }
    }

    /// Open a handshake with `ac` and arm the SecuritySession timer.
    ///
    /// Failure counters carry over when `ac` is the previous peer.
    ///
    /// # Errors
    ///
    /// Returns the service's error if the handshake cannot be started.
    pub fn begin(
        &mut self,
        ac: SocketAddr,
        timers: &mut TimerManager,
        now: Instant,
    ) -> Result<(), CryptoError> {
        if self.session.peer != Some(ac) {
            self.session = SecuritySession {
                peer: Some(ac),
                ..SecuritySession::default()
            };
        }
        self.service.close();
        self.session.policy = None;
        self.service.start_handshake(ac)?;
        self.session.phase = SecurityPhase::Handshaking;
        timers.enable(TimerId::SecuritySession, self.timeout, now);
        tracing::debug!(
            "Security handshake with {} (attempt {})",
            ac,
            self.session.failed_handshake_count + 1
        );
        Ok(())
    }

    /// Feed a handshake datagram body to the service.
    pub fn handle_datagram(&mut self, body: &[u8]) {
        if self.session.phase == SecurityPhase::Handshaking {
            self.service.handle_handshake(body);
        }
    }

    /// Next handshake message to send.
    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.service.poll_transmit()
    }

    /// Check handshake progress.
    pub fn poll(&mut self, timers: &mut TimerManager) -> SecurityOutcome {
        match self.session.phase {
            SecurityPhase::Handshaking => {}
            SecurityPhase::Established => {
                return self
                    .session
                    .policy
                    .map_or(SecurityOutcome::Pending, SecurityOutcome::Established);
            }
            SecurityPhase::NotStarted | SecurityPhase::Failed => return SecurityOutcome::Pending,
        }

        match self.service.poll() {
            HandshakeStatus::Idle | HandshakeStatus::Handshaking => SecurityOutcome::Pending,
            HandshakeStatus::Established => {
                timers.disable(TimerId::SecuritySession);
                let ac_policy = self
                    .service
                    .data_channel_policy()
                    .unwrap_or(DataChannelPolicy::NONE);
                let policy = self.local_policy.intersect(ac_policy);
                if policy.is_empty() {
                    tracing::warn!(
                        "No common data channel policy (local {:#04x}, AC {:#04x})",
                        self.local_policy.bits(),
                        ac_policy.bits()
                    );
                    self.service.close();
                    self.session.phase = SecurityPhase::Failed;
                    return SecurityOutcome::PolicyMismatch;
                }
                self.session.phase = SecurityPhase::Established;
                self.session.policy = Some(policy);
                tracing::info!("Security session established with {:?}", self.session.peer);
                SecurityOutcome::Established(policy)
            }
            HandshakeStatus::Failed(FailureKind::Authentication) => {
                timers.disable(TimerId::SecuritySession);
                self.service.close();
                self.session.phase = SecurityPhase::Failed;
                self.session.failed_auth_count += 1;
                tracing::warn!("Authentication with {:?} failed", self.session.peer);
                SecurityOutcome::AuthenticationFailure
            }
            HandshakeStatus::Failed(FailureKind::Handshake) => {
                timers.disable(TimerId::SecuritySession);
                self.handshake_failed()
            }
        }
    }

    /// SecuritySession timer expired: the attempt counts as a handshake failure.
    pub fn on_timeout(&mut self) -> SecurityOutcome {
        if self.session.phase != SecurityPhase::Handshaking {
            return SecurityOutcome::Pending;
        }
        tracing::warn!("Security handshake with {:?} timed out", self.session.peer);
        self.handshake_failed()
    }

    fn handshake_failed(&mut self) -> SecurityOutcome {
        self.service.close();
        self.session.phase = SecurityPhase::Failed;
        self.session.failed_handshake_count += 1;
        if self.session.failed_handshake_count >= self.max_failures {
            tracing::warn!(
                "Giving up on {:?} after {} handshake failures",
                self.session.peer,
                self.session.failed_handshake_count
            );
            SecurityOutcome::PermanentFailure
        } else {
            SecurityOutcome::Retry
        }
    }

    /// Whether channel protection is available.
    #[must_use]
    pub fn is_established(&self) -> bool {
        self.session.phase == SecurityPhase::Established
    }

    /// Session state.
    #[must_use]
    pub fn session(&self) -> &SecuritySession {
        &self.session
    }

    /// The underlying service, for channel protection.
    pub fn service_mut(&mut self) -> &mut dyn SecurityService {
        self.service.as_mut()
    }

    /// Close the channel. Authentication failures and their peer are kept.
    pub fn reset(&mut self) {
        self.service.close();
        self.session = SecuritySession {
            failed_auth_count: self.session.failed_auth_count,
            peer: self.session.peer,
            ..SecuritySession::default()
        };
    }
}

impl std::fmt::Debug for SecurityBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityBootstrap")
            .field("session", &self.session)
            .field("local_policy", &self.local_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use wtp_crypto::ClearSecurityService;

    /// Service whose status the test controls.
    #[derive(Clone, Default)]
    struct Scripted {
        status: Arc<Mutex<Option<HandshakeStatus>>>,
        policy: DataChannelPolicy,
    }

    impl SecurityService for Scripted {
        fn start_handshake(&mut self, _peer: SocketAddr) -> Result<(), CryptoError> {
            *self.status.lock().unwrap() = Some(HandshakeStatus::Handshaking);
            Ok(())
        }
        fn handle_handshake(&mut self, _message: &[u8]) {}
        fn poll_transmit(&mut self) -> Option<Vec<u8>> {
            None
        }
        fn poll(&self) -> HandshakeStatus {
            self.status.lock().unwrap().unwrap_or(HandshakeStatus::Idle)
        }
        fn data_channel_policy(&self) -> Option<DataChannelPolicy> {
            Some(self.policy)
        }
        fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Ok(plaintext.to_vec())
        }
        fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Ok(ciphertext.to_vec())
        }
        fn overhead(&self) -> usize {
            0
        }
        fn close(&mut self) {}
    }

    fn ac() -> SocketAddr {
        "192.0.2.1:5246".parse().unwrap()
    }

    fn bootstrap(service: Box<dyn SecurityService>) -> SecurityBootstrap {
        SecurityBootstrap::new(service, &SecurityConfig::default(), Duration::from_secs(60))
    }

    #[test]
    fn test_clear_service_establishes() {
        let mut timers = TimerManager::new();
        let mut bootstrap = bootstrap(Box::new(ClearSecurityService::default()));
        bootstrap.begin(ac(), &mut timers, Instant::now()).unwrap();
        assert!(timers.is_enabled(TimerId::SecuritySession));

        assert_eq!(
            bootstrap.poll(&mut timers),
            SecurityOutcome::Established(DataChannelPolicy::CLEAR)
        );
        assert!(bootstrap.is_established());
        assert!(!timers.is_enabled(TimerId::SecuritySession));
    }

    #[test]
    fn test_handshake_failures_reach_bound() {
        let mut timers = TimerManager::new();
        let mut bootstrap = bootstrap(Box::new(Scripted::default()));
        let now = Instant::now();

        for expected in [SecurityOutcome::Retry, SecurityOutcome::Retry] {
            bootstrap.begin(ac(), &mut timers, now).unwrap();
            assert_eq!(bootstrap.poll(&mut timers), SecurityOutcome::Pending);
            assert_eq!(bootstrap.on_timeout(), expected);
        }
        bootstrap.begin(ac(), &mut timers, now).unwrap();
        assert_eq!(bootstrap.on_timeout(), SecurityOutcome::PermanentFailure);
        assert!(SecurityOutcome::PermanentFailure.excludes_ac());
        assert_eq!(bootstrap.session().failed_handshake_count, 3);
    }

    #[test]
    fn test_new_peer_resets_counters() {
        let mut timers = TimerManager::new();
        let mut bootstrap = bootstrap(Box::new(Scripted::default()));
        let now = Instant::now();

        bootstrap.begin(ac(), &mut timers, now).unwrap();
        bootstrap.on_timeout();
        assert_eq!(bootstrap.session().failed_handshake_count, 1);

        bootstrap
            .begin("192.0.2.2:5246".parse().unwrap(), &mut timers, now)
            .unwrap();
        assert_eq!(bootstrap.session().failed_handshake_count, 0);
    }

    #[test]
    fn test_authentication_failure() {
        let scripted = Scripted::default();
        let status = scripted.status.clone();
        let mut timers = TimerManager::new();
        let mut bootstrap = bootstrap(Box::new(scripted));

        bootstrap.begin(ac(), &mut timers, Instant::now()).unwrap();
        *status.lock().unwrap() = Some(HandshakeStatus::Failed(FailureKind::Authentication));
        assert_eq!(
            bootstrap.poll(&mut timers),
            SecurityOutcome::AuthenticationFailure
        );
        assert_eq!(bootstrap.session().failed_auth_count, 1);
        assert_eq!(bootstrap.session().failed_handshake_count, 0);
        // Late timer expiry does not double count
        assert_eq!(bootstrap.on_timeout(), SecurityOutcome::Pending);
    }

    #[test]
    fn test_policy_mismatch() {
        let mut timers = TimerManager::new();
        let config = SecurityConfig {
            policy: DataChannelPolicy::ENCRYPTED,
            ..SecurityConfig::default()
        };
        let mut bootstrap = SecurityBootstrap::new(
            Box::new(ClearSecurityService::new(DataChannelPolicy::CLEAR)),
            &config,
            Duration::from_secs(60),
        );
        bootstrap.begin(ac(), &mut timers, Instant::now()).unwrap();
        assert_eq!(bootstrap.poll(&mut timers), SecurityOutcome::PolicyMismatch);
        assert!(!bootstrap.is_established());
    }

    #[test]
    fn test_reset_closes_channel() {
        let mut timers = TimerManager::new();
        let mut bootstrap = bootstrap(Box::new(ClearSecurityService::default()));
        bootstrap.begin(ac(), &mut timers, Instant::now()).unwrap();
        bootstrap.poll(&mut timers);
        bootstrap.reset();
        assert_eq!(bootstrap.session().phase, SecurityPhase::NotStarted);
        assert_eq!(bootstrap.session().policy, None);
        assert!(bootstrap.service_mut().encrypt(b"x").is_err());
    }

    #[test]
    fn test_reset_keeps_auth_failures() {
        let scripted = Scripted::default();
        let status = scripted.status.clone();
        let mut timers = TimerManager::new();
        let mut bootstrap = bootstrap(Box::new(scripted));

        bootstrap.begin(ac(), &mut timers, Instant::now()).unwrap();
        bootstrap.on_timeout();
        bootstrap.begin(ac(), &mut timers, Instant::now()).unwrap();
        *status.lock().unwrap() = Some(HandshakeStatus::Failed(FailureKind::Authentication));
        bootstrap.poll(&mut timers);

        bootstrap.reset();
        assert_eq!(bootstrap.session().failed_auth_count, 1);
        assert_eq!(bootstrap.session().failed_handshake_count, 0);
        assert_eq!(bootstrap.session().peer, Some(ac()));

        bootstrap.begin(ac(), &mut timers, Instant::now()).unwrap();
        assert_eq!(bootstrap.session().failed_auth_count, 1);
    }
}
