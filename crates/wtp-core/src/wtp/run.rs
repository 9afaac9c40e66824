//! Run state: echo, keep-alive, statistics and AC-initiated requests.

use super::{Transmit, Wtp, WtpState};
use crate::error::{Error, ReliableError};
use crate::message::{Message, MessageElement, MessageType, ResultCode, TransportCounters};
use crate::timer::TimerId;
use std::time::Instant;

impl Wtp {
    pub(super) fn enter_run(&mut self, now: Instant) {
        let timers = &self.config.timers;
        self.echo_outstanding = false;
        self.timers.enable(TimerId::Echo, self.echo_interval, now);
        self.timers.enable(TimerId::Keepalive, timers.keepalive, now);
        self.timers
            .enable(TimerId::KeepaliveDead, timers.keepalive_dead, now);
        self.timers
            .enable(TimerId::Statistics, timers.statistics, now);
        tracing::info!(
            "Session {:?} with {:?} running",
            self.session_id(),
            self.selected_ac()
        );
    }

    pub(super) fn on_echo_timer(&mut self, now: Instant) {
        if self.echo_outstanding {
            tracing::warn!("Echo request unanswered, resetting");
            self.transition(now, WtpState::Reset);
            return;
        }

        match self.send_request(now, &Message::new(MessageType::EchoRequest)) {
            Ok(()) => self.echo_outstanding = true,
            Err(Error::Reliable(ReliableError::TransportBusy(sequence))) => {
                tracing::debug!("Echo deferred, request {} pending", sequence);
            }
            Err(e) => {
                tracing::warn!("Cannot send echo request: {}", e);
                self.transition(now, WtpState::Reset);
                return;
            }
        }
        self.timers.enable(TimerId::Echo, self.echo_interval, now);
    }

    pub(super) fn on_keepalive_timer(&mut self, now: Instant) {
        match self.reliable.keepalive(self.security.service_mut()) {
            Ok(contents) => {
                if let Some(destination) = self.selected_ac() {
                    self.outgoing.push_back(Transmit {
                        destination,
                        contents,
                    });
                }
            }
            Err(e) => tracing::warn!("Cannot build keep-alive: {}", e),
        }
        self.timers
            .enable(TimerId::Keepalive, self.config.timers.keepalive, now);
    }

    pub(super) fn on_statistics_timer(&mut self, now: Instant) {
        if self.reliable.has_pending() {
            tracing::debug!("Statistics event skipped, transport busy");
        } else {
            let stats = self.reliable.stats();
            let saturate = |v: u64| u32::try_from(v).unwrap_or(u32::MAX);
            let event = Message::new(MessageType::WtpEventRequest).with(
                MessageElement::TransportStatistics(TransportCounters {
                    requests: saturate(stats.requests_sent),
                    retransmissions: saturate(stats.retransmissions),
                    discarded: saturate(stats.discarded),
                }),
            );
            if let Err(e) = self.send_request(now, &event) {
                tracing::warn!("Cannot send statistics event: {}", e);
            }
        }
        self.timers
            .enable(TimerId::Statistics, self.config.timers.statistics, now);
    }

    /// Handle a complete AC-initiated request.
    pub(super) fn on_ac_request(&mut self, now: Instant, sequence: u8, request: &Message) {
        let request_type = request.message_type;
        if self.state != WtpState::Run {
            tracing::debug!("{:?} not valid in {}", request_type, self.state);
            self.respond(
                now,
                sequence,
                Message::response_to(request_type, ResultCode::INVALID_IN_CURRENT_STATE),
            );
            return;
        }

        match request_type {
            MessageType::ConfigurationUpdateRequest => {
                self.apply_timers(request, now);
                self.respond(
                    now,
                    sequence,
                    Message::response_to(request_type, ResultCode::SUCCESS),
                );
            }
            MessageType::ClearConfigurationRequest => {
                self.echo_interval = self.config.timers.echo;
                self.timers.enable(TimerId::Echo, self.echo_interval, now);
                tracing::info!("Configuration cleared by AC");
                self.respond(
                    now,
                    sequence,
                    Message::response_to(request_type, ResultCode::SUCCESS),
                );
            }
            MessageType::ResetRequest => {
                tracing::info!("Reset requested by AC");
                self.respond(
                    now,
                    sequence,
                    Message::response_to(request_type, ResultCode::SUCCESS),
                );
                if self.state == WtpState::Run {
                    self.transition(now, WtpState::Reset);
                }
            }
            other => {
                tracing::debug!("Unrecognized AC request {:?}", other);
                self.respond(
                    now,
                    sequence,
                    Message::response_to(other, ResultCode::UNRECOGNIZED_REQUEST),
                );
            }
        }
    }

    fn respond(&mut self, now: Instant, sequence: u8, response: Message) {
        if let Err(e) = self.send_response(sequence, &response) {
            tracing::warn!("Cannot answer AC request {}: {}", sequence, e);
            if self.state == WtpState::Run {
                self.transition(now, WtpState::Reset);
            }
        }
    }
}
