//! The focus's wire-level IQ surface (spec §6): health-check,
//! conference-request, mute-audio/mute-video, `dial`, and
//! `login-url`/`logout`, all multiplexed onto one `StanzaFilter` since
//! `Transport::register_handler` only dispatches on the outer stanza
//! element and can't tell IQ payloads apart (the way `Pinger` already
//! dispatches `urn:xmpp:ping`).

use std::{convert::TryFrom, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use focus_core::{error::FocusError, gateway::GatewayKind, interfaces::XmppTransport, registry::ConferenceRegistry};
use focus_xmpp::{
  auth::{LoginUrlQuery, LoginUrlResult, LogoutIq},
  conference_iq::{ConferenceRequest, ConferenceResult},
  health::HealthCheckQuery,
  mute::{MuteAudioIq, MuteVideoIq},
  rayo::Dial,
};
use jid::{BareJid, FullJid, Jid};
use tokio::sync::mpsc;
use tracing::warn;
use xmpp_parsers::{
  iq::{Iq, IqType},
  stanza_error::{DefinedCondition, ErrorType, StanzaError},
  Element,
};

use crate::{
  conference_directory::ConferenceDirectory,
  xmpp::{stanza_filter::StanzaFilter, transport::Transport},
};

const NS_FOCUS: &str = "http://jitsi.org/protocol/focus";
const NS_HEALTHCHECK: &str = "http://jitsi.org/protocol/healthcheck";
const NS_MUTE_AUDIO: &str = "http://jitsi.org/jitmeet/audio";
const NS_MUTE_VIDEO: &str = "http://jitsi.org/jitmeet/video";
const NS_RAYO: &str = "urn:xmpp:rayo:1";

/// spec §6 `dial`: "retry budget 2".
const DIAL_RETRY_BUDGET: u8 = 2;
const DIAL_REPLY_TIMEOUT: Duration = Duration::from_secs(15);

fn error_condition(err: &FocusError) -> (ErrorType, DefinedCondition) {
  match err {
    FocusError::InvalidSources(_) => (ErrorType::Modify, DefinedCondition::BadRequest),
    FocusError::NoBridgeAvailable => (ErrorType::Wait, DefinedCondition::ResourceConstraint),
    FocusError::BridgeFailure => (ErrorType::Wait, DefinedCondition::RemoteServerTimeout),
    FocusError::NotAllowed(_) => (ErrorType::Auth, DefinedCondition::NotAllowed),
    FocusError::Forbidden(_) => (ErrorType::Auth, DefinedCondition::Forbidden),
    FocusError::NoGatewayAvailable => (ErrorType::Cancel, DefinedCondition::ServiceUnavailable),
    FocusError::RoomNotFound(_) => (ErrorType::Cancel, DefinedCondition::ItemNotFound),
    FocusError::Cancelled => (ErrorType::Cancel, DefinedCondition::UndefinedCondition),
    FocusError::Timeout => (ErrorType::Wait, DefinedCondition::RemoteServerTimeout),
    FocusError::Internal(_) => (ErrorType::Cancel, DefinedCondition::InternalServerError),
  }
}

/// Resolves the endpoint id of the sender of a client IQ: the sender's own
/// MUC occupant JID, which the client addresses itself by for everything
/// in this surface bar `dial` (spec §6; no `original_source/` grounding
/// distinguishes real-JID-to-occupant resolution from this, so the
/// simpler, directly-addressable occupant JID is used throughout).
fn endpoint_of(jid: &Jid) -> Option<String> {
  match jid {
    Jid::Full(full) => Some(full.resource.clone()),
    Jid::Bare(_) => None,
  }
}

fn room_of(jid: &Jid) -> BareJid {
  match jid {
    Jid::Full(full) => full.clone().into(),
    Jid::Bare(bare) => bare.clone(),
  }
}

/// Multiplexed handler for every client-facing IQ the focus answers
/// directly (as opposed to Jingle/COLIBRI signalling, which rides its own
/// typed adapters).
pub(crate) struct IqSurface {
  pub(crate) tx: mpsc::Sender<Element>,
  pub(crate) transport: Arc<Transport>,
  pub(crate) focus_jid: FullJid,
  pub(crate) conferences: Arc<ConferenceDirectory>,
  pub(crate) registry: Arc<ConferenceRegistry>,
}

impl IqSurface {
  async fn reply(&self, to: Jid, id: String, payload: Element) -> Result<()> {
    let iq = Iq { from: Some(Jid::Full(self.focus_jid.clone())), to: Some(to), id, payload: IqType::Result(Some(payload)) };
    self.tx.send(iq.into()).await.map_err(|e| anyhow!(e.to_string()))
  }

  async fn reply_empty(&self, to: Jid, id: String) -> Result<()> {
    let iq = Iq::empty_result(to, id).with_from(Jid::Full(self.focus_jid.clone()));
    self.tx.send(iq.into()).await.map_err(|e| anyhow!(e.to_string()))
  }

  async fn reply_error(&self, to: Jid, id: String, err: &FocusError) -> Result<()> {
    let (type_, condition) = error_condition(err);
    self.reply_error_raw(to, id, type_, condition, &err.to_string()).await
  }

  async fn reply_error_raw(&self, to: Jid, id: String, type_: ErrorType, condition: DefinedCondition, text: &str) -> Result<()> {
    let stanza_error = StanzaError::new(type_, condition, "en", text);
    let iq = Iq::from_error(id, stanza_error).with_to(to).with_from(Jid::Full(self.focus_jid.clone()));
    self.tx.send(iq.into()).await.map_err(|e| anyhow!(e.to_string()))
  }

  async fn handle_health_check(&self, from: Jid, id: String) -> Result<()> {
    if self.registry.is_accepting_conferences().await {
      self.reply_empty(from, id).await
    }
    else {
      let err = FocusError::Internal(anyhow!("graceful shutdown in progress"));
      self.reply_error(from, id, &err).await
    }
  }

  async fn handle_conference_request(&self, from: Jid, id: String, request: ConferenceRequest) -> Result<()> {
    let room: BareJid = match request.room.parse() {
      Ok(room) => room,
      Err(_) => {
        return self
          .reply_error_raw(from, id, ErrorType::Modify, DefinedCondition::BadRequest, "invalid room jid")
          .await;
      },
    };
    match self.conferences.get_or_create(room).await {
      Ok((conference, _created)) => {
        let result = ConferenceResult {
          ready: true,
          focus_jid: Some(Jid::Full(self.focus_jid.clone())),
          participant_count: conference.participant_count().await as u32,
          conference_started: true,
        };
        self.reply(from, id, result.into()).await
      },
      Err(err) => self.reply_error(from, id, &err).await,
    }
  }

  async fn handle_mute(&self, from: Jid, id: String, room: BareJid, target: &Jid, media_type: focus_core::source::MediaType, muted: bool) -> Result<()> {
    let Some(conference) = self.conferences.get(&room).await
    else {
      let err = FocusError::RoomNotFound(Jid::Bare(room));
      return self.reply_error(from, id, &err).await;
    };
    let (Some(requester), Some(target_endpoint)) = (endpoint_of(&from), endpoint_of(target))
    else {
      let err = FocusError::NotAllowed("mute request missing an occupant jid".to_owned());
      return self.reply_error(from, id, &err).await;
    };
    match conference.handle_mute_request(&requester, &target_endpoint, media_type, muted).await {
      Ok(()) => self.reply_empty(from, id).await,
      Err(err) => self.reply_error(from, id, &err).await,
    }
  }

  /// Relays the gateway's own reply back to the original client under the
  /// original stanza id (spec §6 `dial`), rather than fabricating a
  /// `RefResult` the gateway never actually produced.
  async fn relay_gateway_reply(&self, from: Jid, id: String, reply: Element) -> Result<()> {
    let reply_iq = Iq::try_from(reply)?;
    match reply_iq.payload {
      IqType::Result(Some(payload)) => self.reply(from, id, payload).await,
      IqType::Result(None) => self.reply_empty(from, id).await,
      IqType::Error(stanza_error) => {
        let text = stanza_error.texts.values().next().cloned().unwrap_or_default();
        self.reply_error_raw(from, id, stanza_error.type_, stanza_error.defined_condition, &text).await
      },
      IqType::Get(_) | IqType::Set(_) => self.reply_empty(from, id).await,
    }
  }

  async fn handle_dial(&self, from: Jid, id: String, dial: Dial) -> Result<()> {
    let room = room_of(&from);
    let Some(endpoint_id) = endpoint_of(&from)
    else {
      let err = FocusError::Forbidden("dial request missing an occupant jid".to_owned());
      return self.reply_error(from, id, &err).await;
    };
    let Some(conference) = self.conferences.get(&room).await
    else {
      let err = FocusError::Forbidden("not a conference member".to_owned());
      return self.reply_error(from, id, &err).await;
    };
    if !conference.is_member(&endpoint_id).await {
      let err = FocusError::Forbidden("not a conference member".to_owned());
      return self.reply_error(from, id, &err).await;
    }
    if !conference.is_moderator(&endpoint_id).await {
      let err = FocusError::NotAllowed("dial requires the moderator role".to_owned());
      return self.reply_error(from, id, &err).await;
    }

    let Some(gateway_selector) = self.registry.services().gateway_selector.clone()
    else {
      return self.reply_error(from, id, &FocusError::NoGatewayAvailable).await;
    };
    let Some(gateway) = gateway_selector.select_gateway(GatewayKind::Sip).await
    else {
      return self.reply_error(from, id, &FocusError::NoGatewayAvailable).await;
    };

    let mut last_err = FocusError::Timeout;
    for _ in 0..DIAL_RETRY_BUDGET {
      let relay = Iq::from_set(focus_core::util::generate_id(), dial.clone())
        .with_from(Jid::Full(self.focus_jid.clone()))
        .with_to(gateway.jid.clone());
      match self.transport.send_and_await_reply(&gateway.jid, relay.into(), DIAL_REPLY_TIMEOUT).await {
        Ok(reply) => return self.relay_gateway_reply(from, id, reply).await,
        Err(err) => last_err = err,
      }
    }
    self.reply_error(from, id, &last_err).await
  }

  async fn handle_login_url(&self, from: Jid, id: String, query: LoginUrlQuery) -> Result<()> {
    let Some(auth) = self.registry.services().auth.clone()
    else {
      let err = FocusError::Internal(anyhow!("no authentication authority configured"));
      return self.reply_error(from, id, &err).await;
    };
    let result = match auth.session_for_jid(&from).await {
      Some(session_id) => LoginUrlResult { url: None, session_id: Some(session_id) },
      None => LoginUrlResult {
        url: Some(format!("https://{}/login?room={}", self.focus_jid.domain, query.room)),
        session_id: None,
      },
    };
    self.reply(from, id, result.into()).await
  }

  async fn handle_logout(&self, from: Jid, id: String) -> Result<()> {
    self.reply_empty(from, id).await
  }
}

#[async_trait]
impl StanzaFilter for IqSurface {
  #[tracing::instrument(level = "trace", skip(self))]
  fn filter(&self, element: &Element) -> bool {
    if !element.is("iq", "jabber:client") {
      return false;
    }
    element.has_child("healthcheck", NS_HEALTHCHECK)
      || element.has_child("conference", NS_FOCUS)
      || element.has_child("mute", NS_MUTE_AUDIO)
      || element.has_child("mute-video", NS_MUTE_VIDEO)
      || element.has_child("dial", NS_RAYO)
      || element.has_child("login-url", NS_FOCUS)
      || element.has_child("logout", NS_FOCUS)
  }

  #[tracing::instrument(level = "debug", skip(self, element), err)]
  async fn take(&self, element: Element) -> Result<()> {
    let iq = Iq::try_from(element)?;
    let from = iq.from.clone().ok_or_else(|| anyhow!("iq missing from"))?;
    let id = iq.id.clone();

    let payload = match iq.payload {
      IqType::Get(payload) | IqType::Set(payload) => payload,
      _ => return Ok(()),
    };

    if HealthCheckQuery::try_from(payload.clone()).is_ok() {
      return self.handle_health_check(from, id).await;
    }
    if let Ok(request) = ConferenceRequest::try_from(payload.clone()) {
      return self.handle_conference_request(from, id, request).await;
    }
    if let Ok(mute) = MuteAudioIq::try_from(payload.clone()) {
      let room = room_of(&from);
      return self.handle_mute(from, id, room, &mute.jid, focus_core::source::MediaType::Audio, mute.muted).await;
    }
    if let Ok(mute) = MuteVideoIq::try_from(payload.clone()) {
      let room = room_of(&from);
      return self.handle_mute(from, id, room, &mute.jid, focus_core::source::MediaType::Video, mute.muted).await;
    }
    if let Ok(dial) = Dial::try_from(payload.clone()) {
      return self.handle_dial(from, id, dial).await;
    }
    if let Ok(query) = LoginUrlQuery::try_from(payload.clone()) {
      return self.handle_login_url(from, id, query).await;
    }
    if LogoutIq::try_from(payload.clone()).is_ok() {
      return self.handle_logout(from, id).await;
    }

    warn!("unrecognised IQ payload on focus surface: {:?}", payload);
    Ok(())
  }
}
