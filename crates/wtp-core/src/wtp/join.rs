//! Join, Configure and DataCheck exchanges.

use super::{Wtp, WtpState};
use crate::message::{Message, MessageElement, MessageType, ResultCode};
use crate::session::ControlSession;
use std::time::{Duration, Instant};

impl Wtp {
    pub(super) fn enter_join(&mut self, now: Instant) {
        let Some(ac) = self.selected_ac() else {
            self.transition(now, WtpState::Discovery);
            return;
        };
        self.reliable.open(ControlSession::new(
            ac,
            self.config.network.transport,
            self.config.network.mtu,
        ));

        let request = self.join_request();
        if let Err(e) = self.send_request(now, &request) {
            tracing::warn!("Cannot send join request to {}: {}", ac, e);
            self.transition(now, WtpState::Discovery);
        }
    }

    fn join_request(&self) -> Message {
        let identity = &self.config.identity;
        let network = &self.config.network;
        let discovery_type = if self.registry.is_fallback() {
            super::DISCOVERY_TYPE_UNKNOWN
        } else {
            super::DISCOVERY_TYPE_STATIC
        };

        let mut request = Message::new(MessageType::JoinRequest)
            .with(MessageElement::WtpName(identity.name.clone()))
            .with(MessageElement::BoardData(identity.board.clone()))
            .with(MessageElement::WtpDescriptor(identity.descriptor.clone()))
            .with(MessageElement::DiscoveryType(discovery_type))
            .with(MessageElement::EcnSupport(network.ecn.wire_value()))
            .with(MessageElement::TransportProtocol(network.transport.wire_value()))
            .with(MessageElement::MaximumMessageLength(
                u16::try_from(network.mtu).unwrap_or(u16::MAX),
            ));
        if let Some(id) = self.session_id() {
            request = request.with(MessageElement::SessionId(id));
        }
        if !identity.location.is_empty() {
            request = request.with(MessageElement::Location(identity.location.clone()));
        }
        request
    }

    pub(super) fn enter_configure(&mut self, now: Instant) {
        let statistics = u16::try_from(self.config.timers.statistics.as_secs()).unwrap_or(u16::MAX);
        let request = Message::new(MessageType::ConfigurationStatusRequest)
            .with(MessageElement::WtpName(self.config.identity.name.clone()))
            .with(MessageElement::StatisticsTimer(statistics));
        if let Err(e) = self.send_request(now, &request) {
            tracing::warn!("Cannot send configuration status: {}", e);
            self.transition(now, WtpState::Reset);
        }
    }

    pub(super) fn enter_data_check(&mut self, now: Instant) {
        let request = Message::new(MessageType::ChangeStateEventRequest)
            .with(MessageElement::ResultCode(ResultCode::SUCCESS));
        if let Err(e) = self.send_request(now, &request) {
            tracing::warn!("Cannot send change state event: {}", e);
            self.transition(now, WtpState::Reset);
        }
    }

    /// Apply an AC-provided echo interval. Zero keeps the current one.
    pub(super) fn apply_timers(&mut self, message: &Message, now: Instant) {
        let Some((_, echo)) = message.timers() else {
            return;
        };
        if echo == 0 {
            return;
        }
        self.echo_interval = Duration::from_secs(u64::from(echo));
        tracing::info!("AC set echo interval to {}s", echo);
        if self.state == WtpState::Run {
            self.timers
                .enable(crate::timer::TimerId::Echo, self.echo_interval, now);
        }
    }

    /// Dispatch the response to the pending request.
    pub(super) fn on_response(&mut self, now: Instant, message: Message) {
        let Some(awaiting) = self.awaiting.take() else {
            tracing::debug!("Response {:?} with nothing awaited", message.message_type);
            return;
        };
        if message.message_type != awaiting.response() {
            tracing::warn!(
                "Expected {:?}, got {:?}",
                awaiting.response(),
                message.message_type
            );
            return;
        }
        let accepted = message.result_code().is_some_and(ResultCode::is_success);

        match (self.state, message.message_type) {
            (WtpState::Join, MessageType::JoinResponse) => {
                if accepted {
                    self.stats.joins += 1;
                    tracing::info!("Joined AC {:?}", self.selected_ac());
                    self.transition(now, WtpState::Configure);
                } else {
                    tracing::warn!(
                        "AC {:?} rejected join: {:?}",
                        self.selected_ac(),
                        message.result_code()
                    );
                    self.exclude_selected();
                    self.transition(now, WtpState::Discovery);
                }
            }
            (WtpState::Configure, MessageType::ConfigurationStatusResponse) => {
                if accepted {
                    self.apply_timers(&message, now);
                    self.transition(now, WtpState::DataCheck);
                } else {
                    tracing::warn!("Configuration refused: {:?}", message.result_code());
                    self.transition(now, WtpState::Reset);
                }
            }
            (WtpState::DataCheck, MessageType::ChangeStateEventResponse) => {
                if accepted {
                    self.transition(now, WtpState::Run);
                } else {
                    tracing::warn!("Data check refused: {:?}", message.result_code());
                    self.transition(now, WtpState::Reset);
                }
            }
            (WtpState::Run, MessageType::EchoResponse) => {
                self.echo_outstanding = false;
                tracing::trace!("Echo response");
            }
            (WtpState::Run, MessageType::WtpEventResponse) => {
                tracing::trace!("WTP event acknowledged");
            }
            (state, message_type) => {
                tracing::debug!("Ignoring {:?} in {}", message_type, state);
            }
        }
    }
}
