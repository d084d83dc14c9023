//! Conference orchestration core for a Jitsi-style conference focus.
//!
//! This crate has no XMPP transport, websocket, or thread-pool of its
//! own: every suspension point crosses the traits in [`interfaces`]. The
//! `focus` binary crate supplies live implementations; tests supply
//! in-memory fakes.

pub mod bridge;
pub mod bridge_event_router;
pub mod bridge_session;
pub mod channel_allocator;
pub mod config;
pub mod conference;
pub mod error;
pub mod events;
pub mod gateway;
pub mod gid;
pub mod interfaces;
pub mod jingle_offer;
pub mod participant;
pub mod registry;
pub mod role_manager;
pub mod source;
pub mod util;

pub use crate::{
  conference::{Conference, ConferenceState},
  config::FocusConfig,
  error::{FocusError, FocusResult},
  gateway::{Gateway, GatewayKind, GatewaySelector},
  gid::Gid,
  registry::{ConferenceRegistry, Services},
  source::MediaType,
};

#[cfg(feature = "tracing-subscriber")]
pub fn init_tracing(level: tracing::Level) {
  tracing_subscriber::fmt()
    .with_max_level(level)
    .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
    .with_target(false)
    .init();
}
