//! The Jitsi `conference` IQ (`http://jitsi.org/protocol/focus`).
//!
//! A client sends this to the focus component to request that a focus join
//! (or confirm it has already joined) the MUC named by `room`. The focus
//! replies with a `result` carrying `ready` and the current room status.

use std::convert::TryFrom;

use xmpp_parsers::{iq::IqSetPayload, Element, Error};

const NS_FOCUS: &str = "http://jitsi.org/protocol/focus";

/// `<conference/>` request sent by a client to allocate/join a focus.
#[derive(Debug, Clone)]
pub struct ConferenceRequest {
  pub machine_uid: Option<String>,
  pub room: String,
  pub properties: Vec<(String, String)>,
}

impl IqSetPayload for ConferenceRequest {}

impl TryFrom<Element> for ConferenceRequest {
  type Error = Error;

  fn try_from(elem: Element) -> Result<ConferenceRequest, Error> {
    if !elem.is("conference", NS_FOCUS) {
      return Err(Error::ParseError("not a conference element"));
    }
    let room = elem
      .attr("room")
      .ok_or(Error::ParseError("conference element missing room attr"))?
      .to_owned();
    let machine_uid = elem.attr("machine-uid").map(ToOwned::to_owned);
    let properties = elem
      .children()
      .filter(|child| child.is("property", NS_FOCUS))
      .filter_map(|child| Some((child.attr("name")?.to_owned(), child.attr("value")?.to_owned())))
      .collect();
    Ok(ConferenceRequest {
      machine_uid,
      room,
      properties,
    })
  }
}

impl From<ConferenceRequest> for Element {
  fn from(request: ConferenceRequest) -> Element {
    let mut builder = Element::builder("conference", NS_FOCUS).attr("room", request.room);
    if let Some(machine_uid) = request.machine_uid {
      builder = builder.attr("machine-uid", machine_uid);
    }
    for (name, value) in request.properties {
      builder = builder.append(
        Element::builder("property", NS_FOCUS)
          .attr("name", name)
          .attr("value", value)
          .build(),
      );
    }
    builder.build()
  }
}

/// The focus's reply: whether the room is ready, and a coarse status
/// summary. The `participant_count`/`conference_started` fields are not
/// part of upstream `jicofo`'s wire format as retrieved; they are a narrow
/// completion (spec §C.2) so a caller allocating a focus can tell an
/// in-progress join from an already-running conference without a second
/// round trip.
#[derive(Debug, Clone)]
pub struct ConferenceResult {
  pub ready: bool,
  pub focus_jid: Option<jid::Jid>,
  pub participant_count: u32,
  pub conference_started: bool,
}

impl From<ConferenceResult> for Element {
  fn from(result: ConferenceResult) -> Element {
    let mut builder = Element::builder("conference", NS_FOCUS)
      .attr("ready", result.ready.to_string())
      .attr("participant-count", result.participant_count.to_string())
      .attr("conference-started", result.conference_started.to_string());
    if let Some(focus_jid) = result.focus_jid {
      builder = builder.attr("focusjid", focus_jid.to_string());
    }
    builder.build()
  }
}

impl TryFrom<Element> for ConferenceResult {
  type Error = Error;

  fn try_from(elem: Element) -> Result<ConferenceResult, Error> {
    if !elem.is("conference", NS_FOCUS) {
      return Err(Error::ParseError("not a conference element"));
    }
    Ok(ConferenceResult {
      ready: elem
        .attr("ready")
        .ok_or(Error::ParseError("missing ready attr"))?
        .parse()
        .map_err(|_| Error::ParseError("invalid ready attr"))?,
      focus_jid: elem.attr("focusjid").and_then(|s| s.parse().ok()),
      participant_count: elem
        .attr("participant-count")
        .and_then(|s| s.parse().ok())
        .unwrap_or_default(),
      conference_started: elem
        .attr("conference-started")
        .and_then(|s| s.parse().ok())
        .unwrap_or_default(),
    })
  }
}
