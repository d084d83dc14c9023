//! Typed event fan-out (spec §9: "prefer typed event enums delivered
//! through an explicit channel over listener/observer interfaces").
//!
//! [`Conference`](crate::conference::Conference) and
//! [`ConferenceRegistry`](crate::registry::ConferenceRegistry) each expose a
//! `subscribe()` returning a [`tokio::sync::broadcast::Receiver`] of one of
//! these enums rather than taking `Fn` callbacks, so adding a new observer
//! never requires touching the emitting code.

use jid::Jid;

use crate::{
  bridge::BridgeId,
  gid::Gid,
  source::{MediaSource, MediaType, SourceGroup},
};

/// Emitted by a single [`Conference`](crate::conference::Conference).
#[derive(Debug, Clone)]
pub enum ConferenceEvent {
  ParticipantJoined { endpoint_id: String, jid: Option<Jid> },
  ParticipantLeft { endpoint_id: String },
  SourcesAdded { endpoint_id: String, sources: Vec<MediaSource>, groups: Vec<SourceGroup> },
  SourcesRemoved { endpoint_id: String, sources: Vec<MediaSource>, groups: Vec<SourceGroup> },
  Muted { endpoint_id: String, media_type: MediaType, muted: bool },
  BridgeAdded { bridge_id: BridgeId },
  BridgeRemoved { bridge_id: BridgeId },
  Expired,
}

/// Emitted by the process-wide [`ConferenceRegistry`](crate::registry::ConferenceRegistry).
#[derive(Debug, Clone)]
pub enum RegistryEvent {
  ConferenceCreated { gid: Gid, room: jid::BareJid },
  ConferenceExpired { gid: Gid, room: jid::BareJid },
}
