//! `mute-audio`/`mute-video` IQs: a moderator (or a participant muting
//! themselves) asking the focus to flip one participant's send direction
//! for one media type (spec §6 IQ surface).

use std::convert::TryFrom;

use jid::Jid;
use xmpp_parsers::{iq::IqSetPayload, Element, Error};

const NS_MUTE_AUDIO: &str = "http://jitsi.org/jitmeet/audio";
const NS_MUTE_VIDEO: &str = "http://jitsi.org/jitmeet/video";

fn parse(elem: Element, name: &'static str, ns: &'static str) -> Result<(Jid, bool), Error> {
  if !elem.is(name, ns) {
    return Err(Error::ParseError("This is not a mute element."));
  }
  let jid: Jid = elem
    .attr("jid")
    .ok_or(Error::ParseError("mute element is missing the 'jid' attribute."))?
    .parse()
    .map_err(|_| Error::ParseError("mute element has an invalid 'jid' attribute."))?;
  let muted = match elem.text().trim() {
    "true" | "1" => true,
    "false" | "0" | "" => false,
    _ => return Err(Error::ParseError("mute element has non-boolean content.")),
  };
  Ok((jid, muted))
}

fn build(name: &'static str, ns: &'static str, jid: &Jid, muted: bool) -> Element {
  Element::builder(name, ns)
    .attr("jid", jid.to_string())
    .append(if muted { "true" } else { "false" })
    .build()
}

/// `<mute jid='...' xmlns='http://jitsi.org/jitmeet/audio'>true</mute>`
#[derive(Debug, Clone, PartialEq)]
pub struct MuteAudioIq {
  pub jid: Jid,
  pub muted: bool,
}

impl IqSetPayload for MuteAudioIq {}

impl TryFrom<Element> for MuteAudioIq {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Self, Error> {
    let (jid, muted) = parse(elem, "mute", NS_MUTE_AUDIO)?;
    Ok(MuteAudioIq { jid, muted })
  }
}

impl From<MuteAudioIq> for Element {
  fn from(mute: MuteAudioIq) -> Element {
    build("mute", NS_MUTE_AUDIO, &mute.jid, mute.muted)
  }
}

/// `<mute-video jid='...' xmlns='http://jitsi.org/jitmeet/video'>true</mute-video>`
#[derive(Debug, Clone, PartialEq)]
pub struct MuteVideoIq {
  pub jid: Jid,
  pub muted: bool,
}

impl IqSetPayload for MuteVideoIq {}

impl TryFrom<Element> for MuteVideoIq {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Self, Error> {
    let (jid, muted) = parse(elem, "mute-video", NS_MUTE_VIDEO)?;
    Ok(MuteVideoIq { jid, muted })
  }
}

impl From<MuteVideoIq> for Element {
  fn from(mute: MuteVideoIq) -> Element {
    build("mute-video", NS_MUTE_VIDEO, &mute.jid, mute.muted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roundtrips_mute_audio() {
    let elem: Element = "<mute jid='room@conference.example/alice' xmlns='http://jitsi.org/jitmeet/audio'>true</mute>"
      .parse()
      .unwrap();
    let iq = MuteAudioIq::try_from(elem.clone()).unwrap();
    assert!(iq.muted);
    assert_eq!(Element::from(iq), elem);
  }

  #[test]
  fn roundtrips_mute_video_false() {
    let elem: Element =
      "<mute-video jid='room@conference.example/alice' xmlns='http://jitsi.org/jitmeet/video'>false</mute-video>"
        .parse()
        .unwrap();
    let iq = MuteVideoIq::try_from(elem.clone()).unwrap();
    assert!(!iq.muted);
    assert_eq!(Element::from(iq), elem);
  }
}
