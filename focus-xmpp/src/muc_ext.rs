//! Presence extensions the focus and moderators exchange inside the MUC:
//! start-muted policy, the region hint, and the "bridge not available"
//! warning (spec §4.6, §4.7, §7).

use std::convert::TryFrom;

use xmpp_parsers::{Element, Error};

const NS_JITSI_MEET: &str = "http://jitsi.org/jitmeet";

/// `<startmuted audio="true" video="false" xmlns="http://jitsi.org/jitmeet"/>`
/// conveyed by a moderator to set the conference-wide start-muted policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartMuted {
  pub audio: bool,
  pub video: bool,
}

impl From<StartMuted> for Element {
  fn from(start_muted: StartMuted) -> Element {
    Element::builder("startmuted", NS_JITSI_MEET)
      .attr("audio", start_muted.audio.to_string())
      .attr("video", start_muted.video.to_string())
      .build()
  }
}

impl TryFrom<Element> for StartMuted {
  type Error = Error;

  fn try_from(elem: Element) -> Result<StartMuted, Error> {
    if !elem.is("startmuted", NS_JITSI_MEET) {
      return Err(Error::ParseError("not a startmuted element"));
    }
    Ok(StartMuted {
      audio: elem
        .attr("audio")
        .and_then(|s| s.parse().ok())
        .unwrap_or_default(),
      video: elem
        .attr("video")
        .and_then(|s| s.parse().ok())
        .unwrap_or_default(),
    })
  }
}

/// Advertised by the focus on its own presence when `BridgeSelector` could
/// not supply a bridge for an invite (spec §4.7, §7: `NoBridgeAvailable`).
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeNotAvailable;

impl From<BridgeNotAvailable> for Element {
  fn from(_: BridgeNotAvailable) -> Element {
    Element::builder("bridge-not-available", NS_JITSI_MEET).build()
  }
}

impl TryFrom<Element> for BridgeNotAvailable {
  type Error = Error;

  fn try_from(elem: Element) -> Result<BridgeNotAvailable, Error> {
    if !elem.is("bridge-not-available", NS_JITSI_MEET) {
      return Err(Error::ParseError("not a bridge-not-available element"));
    }
    Ok(BridgeNotAvailable)
  }
}

/// `<region id="..." xmlns="http://jitsi.org/jitsi-meet"/>`, the region hint
/// a participant's client advertises so `BridgeSelector` can prefer a
/// same-region bridge (spec §4.7).
#[derive(Debug, Clone)]
pub struct Region {
  pub id: String,
}

const NS_JITSI_MEET_REGION: &str = "http://jitsi.org/jitsi-meet";

impl From<Region> for Element {
  fn from(region: Region) -> Element {
    Element::builder("region", NS_JITSI_MEET_REGION)
      .attr("id", region.id)
      .build()
  }
}

impl TryFrom<Element> for Region {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Region, Error> {
    if !elem.is("region", NS_JITSI_MEET_REGION) {
      return Err(Error::ParseError("not a region element"));
    }
    Ok(Region {
      id: elem
        .attr("id")
        .ok_or(Error::ParseError("region element missing id attr"))?
        .to_owned(),
    })
  }
}
