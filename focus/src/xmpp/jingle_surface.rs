//! Inbound Jingle IQ dispatcher (spec §6 `JingleChannel` upcalls):
//! `session-accept`, `source-add`/`source-remove`, `transport-info`/
//! `transport-accept`/`transport-reject`, and `session-terminate`, all
//! multiplexed onto one `StanzaFilter` the same way `IqSurface` multiplexes
//! the client-facing IQ surface.

use std::{convert::TryFrom, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use focus_core::{error::FocusError, jingle_offer};
use focus_xmpp::jingle::{Action, Jingle};
use jid::{BareJid, FullJid, Jid};
use tokio::sync::mpsc;
use tracing::warn;
use xmpp_parsers::{
  iq::{Iq, IqType},
  ns::JINGLE,
  stanza_error::{DefinedCondition, ErrorType, StanzaError},
  Element,
};

use crate::{conference_directory::ConferenceDirectory, xmpp::stanza_filter::StanzaFilter};

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

pub(crate) struct JingleSurface {
  pub(crate) tx: mpsc::Sender<Element>,
  pub(crate) focus_jid: FullJid,
  pub(crate) conferences: Arc<ConferenceDirectory>,
}

impl JingleSurface {
  async fn reply_empty(&self, to: Jid, id: String) -> Result<()> {
    let iq = Iq::empty_result(to, id).with_from(Jid::Full(self.focus_jid.clone()));
    self.tx.send(iq.into()).await.map_err(|e| anyhow!(e.to_string()))
  }

  async fn reply_error(&self, to: Jid, id: String, err: &FocusError) -> Result<()> {
    let (type_, condition) = error_condition(err);
    let stanza_error = StanzaError::new(type_, condition, "en", &err.to_string());
    let iq = Iq::from_error(id, stanza_error).with_to(to).with_from(Jid::Full(self.focus_jid.clone()));
    self.tx.send(iq.into()).await.map_err(|e| anyhow!(e.to_string()))
  }

  async fn dispatch(&self, endpoint_id: &str, conference: &Arc<focus_core::conference::Conference>, jingle: Jingle) -> FocusResult {
    match jingle.action {
      Action::SessionAccept => {
        if let Some((ufrag, pwd, fingerprint, candidates)) = jingle_offer::parse_transport_from_contents(&jingle.contents) {
          if let Err(e) = conference.merge_transport(endpoint_id, ufrag, pwd, fingerprint, candidates).await {
            warn!(endpoint_id, "merge_transport on session-accept failed: {:?}", e);
          }
        }
        let (sources, groups) = jingle_offer::parse_sources_from_contents(endpoint_id, &jingle.contents);
        conference.handle_session_accept(endpoint_id, jingle.sid.0.clone(), sources, groups).await
      },
      Action::SourceAdd => {
        let (sources, groups) = jingle_offer::parse_sources_from_contents(endpoint_id, &jingle.contents);
        conference.handle_source_add(endpoint_id, sources, groups).await
      },
      Action::SourceRemove => {
        let (sources, groups) = jingle_offer::parse_sources_from_contents(endpoint_id, &jingle.contents);
        conference.handle_source_remove(endpoint_id, sources, groups).await
      },
      Action::TransportInfo | Action::TransportAccept => {
        match jingle_offer::parse_transport_from_contents(&jingle.contents) {
          Some((ufrag, pwd, fingerprint, candidates)) => conference.merge_transport(endpoint_id, ufrag, pwd, fingerprint, candidates).await,
          None => Ok(()),
        }
      },
      Action::TransportReject => {
        conference.handle_transport_rejected(endpoint_id).await;
        Ok(())
      },
      Action::SessionTerminate => {
        conference.handle_session_terminate(endpoint_id, "remote session-terminate").await;
        Ok(())
      },
      _ => Ok(()),
    }
  }
}

type FocusResult = focus_core::FocusResult<()>;

#[async_trait]
impl StanzaFilter for JingleSurface {
  #[tracing::instrument(level = "trace", skip(self))]
  fn filter(&self, element: &Element) -> bool {
    element.is("iq", "jabber:client") && element.has_child("jingle", JINGLE)
  }

  #[tracing::instrument(level = "debug", skip(self, element), err)]
  async fn take(&self, element: Element) -> Result<()> {
    let iq = Iq::try_from(element)?;
    let from = iq.from.clone().ok_or_else(|| anyhow!("jingle iq missing from"))?;
    let id = iq.id.clone();

    let payload = match iq.payload {
      IqType::Get(payload) | IqType::Set(payload) => payload,
      _ => return Ok(()),
    };
    let Ok(jingle) = Jingle::try_from(payload)
    else {
      return Ok(());
    };

    let Some(endpoint_id) = endpoint_of(&from)
    else {
      let err = FocusError::NotAllowed("jingle iq missing an occupant jid".to_owned());
      return self.reply_error(from, id, &err).await;
    };
    let room = room_of(&from);
    let Some(conference) = self.conferences.get(&room).await
    else {
      let err = FocusError::RoomNotFound(Jid::Bare(room));
      return self.reply_error(from, id, &err).await;
    };

    match self.dispatch(&endpoint_id, &conference, jingle).await {
      Ok(()) => self.reply_empty(from, id).await,
      Err(err) => self.reply_error(from, id, &err).await,
    }
  }
}
