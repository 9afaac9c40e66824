//! # WTP Core
//!
//! Control plane of a CAPWAP Wireless Termination Point: finds an Access
//! Controller, secures a channel to it and keeps a reliable control session
//! alive over plain datagrams.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 runner::run (Tokio task)                 │
//! ├──────────────────────────────────────────────────────────┤
//! │                    Wtp state machine                     │
//! ├──────────────┬──────────────┬──────────────┬─────────────┤
//! │  Discovery   │   Security   │   Reliable   │   Timers    │
//! │  + Registry  │  Bootstrap   │  Transport   │             │
//! ├──────────────┴──────────────┼──────────────┴─────────────┤
//! │  message (TLV codec)        │  fragment + reassembly     │
//! └─────────────────────────────┴────────────────────────────┘
//!         wtp-crypto (SecurityService)   wtp-transport (UDP)
//! ```
//!
//! The state machine is sans-IO: [`Wtp`] consumes datagrams and timer
//! expiries and produces [`Transmit`]s. Everything it needs to know about time
//! arrives as an `Instant` argument, so tests drive it step by step.
//!
//! ## Example
//!
//! ```no_run
//! use wtp_core::{Wtp, WtpConfig};
//! use wtp_crypto::ClearSecurityService;
//! use wtp_transport::{AsyncUdpTransport, TransportConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = WtpConfig::default();
//! config.discovery.static_hosts.push("192.0.2.10".into());
//!
//! let mut wtp = Wtp::new(config, Box::new(ClearSecurityService::default()))?;
//! let socket = AsyncUdpTransport::bind(
//!     "0.0.0.0:0".parse::<std::net::SocketAddr>()?,
//!     &TransportConfig::default(),
//! )
//! .await?;
//!
//! wtp_core::runner::run(&mut wtp, &socket, async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod fragment;
pub mod message;
pub mod reassembly;
pub mod registry;
pub mod reliable;
pub mod security;
pub mod session;
pub mod timer;
pub mod wtp;

pub use config::WtpConfig;
pub use error::{Error, Result};
pub use message::{Message, MessageCodec, MessageElement, MessageType, ResultCode, TlvCodec};
pub use registry::{AcOrigin, HostResolver, SystemResolver};
pub use session::SessionId;
pub use wtp::{Transmit, Wtp, WtpState, WtpStats, runner};
