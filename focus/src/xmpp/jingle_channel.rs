//! `JingleChannel` implementation: builds and sends the Jingle IQs a
//! focus exchanges with one participant (spec §6 `JingleChannel`).
//!
//! Unlike the teacher's `jingle.rs` (which drives a local ICE agent and a
//! GStreamer pipeline to actually receive media), a focus never touches
//! the media plane itself — it only relays the SDP-ish content/transport
//! elements the videobridge produced, so this module is pure IQ
//! construction and has no ICE/DTLS code at all.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use focus_core::{interfaces::XmppTransport, FocusError, FocusResult};
use focus_xmpp::jingle::{Action, Jingle};
use jid::{FullJid, Jid};
use xmpp_parsers::{
  iq::{Iq, IqType},
  jingle::ReasonElement,
  Element,
};

use crate::xmpp::transport::Transport;

const JINGLE_REPLY_TIMEOUT: Duration = Duration::from_secs(15);

/// One participant's Jingle session id and the focus's own JID inside
/// the room (the `initiator`/`responder` this focus signs its stanzas
/// with).
pub struct JingleChannelImpl {
  transport: Arc<Transport>,
  focus_jid: FullJid,
}

impl JingleChannelImpl {
  pub fn new(transport: Arc<Transport>, focus_jid: FullJid) -> Self {
    Self { transport, focus_jid }
  }

  fn session_id(peer: &FullJid) -> xmpp_parsers::jingle::SessionId {
    xmpp_parsers::jingle::SessionId(format!("{:x}", md5_ish(peer)))
  }
}

/// Deterministic per-peer session id. Real collision resistance is not
/// required here — the SID only needs to be stable and unique per (focus,
/// peer) pair for the lifetime of one Jingle session, not cryptographically
/// unguessable.
fn md5_ish(peer: &FullJid) -> u64 {
  use std::hash::{Hash, Hasher};
  let mut hasher = std::collections::hash_map::DefaultHasher::new();
  peer.to_string().hash(&mut hasher);
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_nanos())
    .unwrap_or_default()
    .hash(&mut hasher);
  hasher.finish()
}

#[async_trait]
impl focus_core::interfaces::JingleChannel for JingleChannelImpl {
  #[tracing::instrument(level = "debug", skip(self, offer_contents), err)]
  async fn initiate_session(
    &self,
    peer: &FullJid,
    _bundled: bool,
    offer_contents: Vec<Element>,
    start_muted: (bool, bool),
  ) -> FocusResult<bool> {
    let sid = Self::session_id(peer);
    let mut jingle = Jingle::new(Action::SessionInitiate, sid)
      .with_initiator(Jid::Full(self.focus_jid.clone()));
    for content in offer_contents {
      jingle.other.push(content);
    }
    if start_muted.0 || start_muted.1 {
      jingle.other.push(
        focus_xmpp::muc_ext::StartMuted { audio: start_muted.0, video: start_muted.1 }.into(),
      );
    }

    let iq = Iq::from_set(focus_core::util::generate_id(), jingle)
      .with_from(Jid::Full(self.focus_jid.clone()))
      .with_to(Jid::Full(peer.clone()));

    let reply = self
      .transport
      .send_and_await_reply(&Jid::Full(peer.clone()), iq.into(), JINGLE_REPLY_TIMEOUT)
      .await?;
    let reply_iq = Iq::try_from(reply).map_err(|e| FocusError::Internal(e.into()))?;
    Ok(matches!(reply_iq.payload, IqType::Result(_)))
  }

  #[tracing::instrument(level = "debug", skip(self), err)]
  async fn terminate_session(&self, peer: &FullJid, reason: &str, message: Option<&str>) -> FocusResult<()> {
    let sid = Self::session_id(peer);
    let mut texts = std::collections::BTreeMap::new();
    if let Some(message) = message {
      texts.insert(String::new(), message.to_owned());
    }
    let reason_element = ReasonElement { reason: parse_reason(reason), texts };
    let jingle = Jingle::new(Action::SessionTerminate, sid)
      .with_initiator(Jid::Full(self.focus_jid.clone()))
      .set_reason(reason_element);
    let iq = Iq::from_set(focus_core::util::generate_id(), jingle)
      .with_from(Jid::Full(self.focus_jid.clone()))
      .with_to(Jid::Full(peer.clone()));
    self.transport.send(&Jid::Full(peer.clone()), iq.into()).await
  }

  #[tracing::instrument(level = "debug", skip(self, sources, groups), err)]
  async fn send_add_source_iq(
    &self,
    peer: &FullJid,
    sources: &[focus_core::source::MediaSource],
    groups: &[focus_core::source::SourceGroup],
  ) -> FocusResult<()> {
    self.send_source_action(peer, Action::SourceAdd, sources, groups).await
  }

  #[tracing::instrument(level = "debug", skip(self, sources, groups), err)]
  async fn send_remove_source_iq(
    &self,
    peer: &FullJid,
    sources: &[focus_core::source::MediaSource],
    groups: &[focus_core::source::SourceGroup],
  ) -> FocusResult<()> {
    self.send_source_action(peer, Action::SourceRemove, sources, groups).await
  }

  #[tracing::instrument(level = "debug", skip(self, offer_contents), err)]
  async fn send_transport_replace(&self, peer: &FullJid, offer_contents: Vec<Element>) -> FocusResult<()> {
    let sid = Self::session_id(peer);
    let mut jingle = Jingle::new(Action::TransportReplace, sid).with_initiator(Jid::Full(self.focus_jid.clone()));
    for content in offer_contents {
      jingle.other.push(content);
    }
    let iq = Iq::from_set(focus_core::util::generate_id(), jingle)
      .with_from(Jid::Full(self.focus_jid.clone()))
      .with_to(Jid::Full(peer.clone()));
    self.transport.send(&Jid::Full(peer.clone()), iq.into()).await
  }
}

impl JingleChannelImpl {
  async fn send_source_action(
    &self,
    peer: &FullJid,
    action: Action,
    sources: &[focus_core::source::MediaSource],
    groups: &[focus_core::source::SourceGroup],
  ) -> FocusResult<()> {
    if sources.is_empty() && groups.is_empty() {
      return Ok(());
    }
    let sid = Self::session_id(peer);
    let mut jingle = Jingle::new(action, sid).with_initiator(Jid::Full(self.focus_jid.clone()));
    for content in crate::xmpp::colibri_conference::sources_to_jingle_contents(sources, groups) {
      jingle.other.push(content);
    }
    let iq = Iq::from_set(focus_core::util::generate_id(), jingle)
      .with_from(Jid::Full(self.focus_jid.clone()))
      .with_to(Jid::Full(peer.clone()));
    self.transport.send(&Jid::Full(peer.clone()), iq.into()).await
  }
}

fn parse_reason(reason: &str) -> xmpp_parsers::jingle::Reason {
  reason.parse().unwrap_or(xmpp_parsers::jingle::Reason::GeneralError)
}
