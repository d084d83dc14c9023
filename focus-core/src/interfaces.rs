//! Capability interfaces at the conference's external boundary (spec §6).
//!
//! `focus-core` never talks to an XMPP stream, a websocket, or a
//! thread-pool directly; every suspension point crosses one of these
//! traits. The `focus` binary crate supplies live implementations backed
//! by the XMPP connection machinery it inherited from its teacher; tests
//! supply in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;
use jid::{FullJid, Jid};

use crate::{
  bridge_session::ChannelsInfo,
  error::FocusResult,
  source::{MediaSource, MediaType, SourceGroup},
};

/// Connection-state transitions `XmppTransport` publishes (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
  Registered,
  Unregistered,
}

/// Generic XMPP stanza transport (spec §6 `XmppTransport`).
#[async_trait]
pub trait XmppTransport: Send + Sync {
  async fn send_and_await_reply(
    &self,
    to: &Jid,
    stanza: xmpp_parsers::Element,
    timeout: Duration,
  ) -> FocusResult<xmpp_parsers::Element>;

  async fn send(&self, to: &Jid, stanza: xmpp_parsers::Element) -> FocusResult<()>;
}

/// A member's membership snapshot as seen through room presence (spec §6
/// `MucRoom`).
#[derive(Debug, Clone)]
pub struct MucMember {
  pub endpoint_id: String,
  pub jid: Option<Jid>,
  pub region: Option<String>,
  pub is_robot: bool,
  pub is_owner: bool,
}

/// Membership and local-role-change notifications a `MucRoom` publishes as
/// it parses inbound presence (spec §6).
#[derive(Debug, Clone)]
pub enum MucRoomEvent {
  MemberJoined { endpoint_id: String, jid: Option<Jid>, region: Option<String>, is_robot: bool },
  MemberLeft { endpoint_id: String },
  MemberKicked { endpoint_id: String, reason: Option<String> },
  LocalRoleChanged { is_owner: bool },
}

/// A MUC room the focus is joined to (spec §6 `MucRoom`).
#[async_trait]
pub trait MucRoom: Send + Sync {
  async fn join(&self) -> FocusResult<()>;
  async fn leave(&self) -> FocusResult<()>;
  async fn destroy(&self, reason: &str) -> FocusResult<()>;
  async fn grant_ownership(&self, jid: &Jid) -> FocusResult<()>;
  async fn add_presence_extension(&self, element: xmpp_parsers::Element) -> FocusResult<()>;
  async fn remove_presence_extension(&self, element_name: &str) -> FocusResult<()>;

  /// Current membership snapshot, as last observed via presence.
  async fn members(&self) -> Vec<MucMember>;

  async fn find_member(&self, endpoint_id: &str) -> Option<MucMember>;

  /// Subscribes to membership/local-role-change notifications (spec §6).
  fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MucRoomEvent>;
}

/// Per-participant Jingle signalling channel (spec §6 `JingleChannel`).
#[async_trait]
pub trait JingleChannel: Send + Sync {
  async fn initiate_session(
    &self,
    peer: &FullJid,
    bundled: bool,
    offer_contents: Vec<xmpp_parsers::Element>,
    start_muted: (bool, bool),
  ) -> FocusResult<bool>;

  async fn terminate_session(&self, peer: &FullJid, reason: &str, message: Option<&str>) -> FocusResult<()>;

  async fn send_add_source_iq(
    &self,
    peer: &FullJid,
    sources: &[MediaSource],
    groups: &[SourceGroup],
  ) -> FocusResult<()>;

  async fn send_remove_source_iq(
    &self,
    peer: &FullJid,
    sources: &[MediaSource],
    groups: &[SourceGroup],
  ) -> FocusResult<()>;

  async fn send_transport_replace(
    &self,
    peer: &FullJid,
    offer_contents: Vec<xmpp_parsers::Element>,
  ) -> FocusResult<()>;
}

/// COLIBRI control-plane session for one bridge (spec §6 `ColibriConference`).
#[async_trait]
pub trait ColibriConference: Send + Sync {
  async fn create_channels(
    &self,
    endpoint_id: &str,
    bundled: bool,
    contents: Vec<xmpp_parsers::Element>,
  ) -> FocusResult<ChannelsInfo>;

  async fn update_channels_info(
    &self,
    channels: &ChannelsInfo,
    sources: &[MediaSource],
    groups: &[SourceGroup],
    endpoint_id: &str,
    relays: &[String],
  ) -> FocusResult<()>;

  async fn update_sources_info(
    &self,
    sources: &[MediaSource],
    groups: &[SourceGroup],
    channels: &ChannelsInfo,
  ) -> FocusResult<()>;

  async fn mute_participant(&self, channels: &ChannelsInfo, media_type: MediaType, muted: bool) -> FocusResult<bool>;

  async fn expire_channels(&self, channels: &ChannelsInfo) -> FocusResult<()>;

  async fn expire_conference(&self) -> FocusResult<()>;

  async fn set_gid(&self, gid: u32) -> FocusResult<()>;

  async fn set_name(&self, name: &str) -> FocusResult<()>;
}

/// Optional authentication authority (spec §6 `AuthenticationAuthority`).
#[async_trait]
pub trait AuthenticationAuthority: Send + Sync {
  async fn session_for_jid(&self, jid: &Jid) -> Option<String>;
}

/// Opens a fresh COLIBRI control session to a specific bridge. Not named
/// in spec §6 directly, but required to let `Conference` create a
/// [`ColibriConference`] per `BridgeSession` without depending on any
/// particular transport.
#[async_trait]
pub trait ColibriConferenceFactory: Send + Sync {
  async fn open(&self, bridge: &crate::bridge::Bridge, gid: u32, room_local_part: &str) -> FocusResult<std::sync::Arc<dyn ColibriConference>>;
}
