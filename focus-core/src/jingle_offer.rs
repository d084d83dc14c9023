//! Builds the Jingle `<content>` elements a channel allocation offer
//! carries (spec §4.4): one per media type, holding the conference's
//! existing SSRCs/groups so the new participant learns about everyone
//! already present, plus a bundled-transport content when the
//! participant's own ICE/DTLS state is already known (re-invites after a
//! bridge migration).

use xmpp_parsers::Element;

use crate::{
  participant::{BundledTransport, IceCandidate},
  source::{GroupSemantics, MediaSource, MediaType, SourceGroup},
};

fn media_type_name(media_type: MediaType) -> &'static str {
  match media_type {
    MediaType::Audio => "audio",
    MediaType::Video => "video",
  }
}

/// Jitsi's groups only ever use simulcast (`SIM`) and audio/video pairing
/// (`FID`); `Sid` has no RFC5888 counterpart in practice, so it rides on
/// `SRF` the way the rest of the ecosystem's occasional non-standard group
/// tags do.
fn to_ssma_semantics(semantics: GroupSemantics) -> focus_xmpp::jingle_ssma::Semantics {
  match semantics {
    GroupSemantics::Simulcast => focus_xmpp::jingle_ssma::Semantics::Sim,
    GroupSemantics::Fid => focus_xmpp::jingle_ssma::Semantics::Fid,
    GroupSemantics::Sid => focus_xmpp::jingle_ssma::Semantics::Srf,
  }
}

fn description_content(media_type: MediaType, sources: &[&MediaSource], groups: &[&SourceGroup]) -> Element {
  let ssrcs = sources.iter().map(|source| {
    let mut ssma = focus_xmpp::jingle_ssma::Source::new(source.ssrc);
    ssma.info = Some(focus_xmpp::jingle_ssma::SsrcInfo { owner: source.owner.clone() });
    Element::from(ssma)
  });
  let ssrc_groups = groups.iter().map(|group| {
    Element::from(focus_xmpp::jingle_ssma::Group {
      semantics: to_ssma_semantics(group.semantics),
      sources: group.ssrcs.iter().map(|ssrc| focus_xmpp::jingle_ssma::Source::new(*ssrc)).collect(),
    })
  });
  Element::builder("content", xmpp_parsers::ns::JINGLE)
    .attr("name", media_type_name(media_type))
    .append(
      Element::builder("description", xmpp_parsers::ns::JINGLE_RTP)
        .attr("media", media_type_name(media_type))
        .append_all(ssrcs)
        .append_all(ssrc_groups)
        .build(),
    )
    .build()
}

fn transport_element(transport: &BundledTransport) -> Element {
  let mut ice = focus_xmpp::jingle_ice_udp::Transport::new();
  ice.ufrag = transport.ufrag.clone();
  ice.pwd = transport.pwd.clone();
  ice.fingerprint = transport.fingerprint.clone();
  for candidate in &transport.candidates {
    ice = ice.add_candidate(candidate.raw.clone());
  }
  Element::from(ice)
}

/// Builds the offer's `<content>` elements: one per media type carrying
/// the conference's existing sources/groups of that type (spec §4.4
/// `inviteParticipant`), merged with a bundled-transport `<transport>`
/// child when `transport` is already known (re-invite after a bridge
/// migration, spec §4.2).
pub fn build_offer_contents(
  conference_sources: &[MediaSource],
  conference_groups: &[SourceGroup],
  transport: Option<&BundledTransport>,
) -> Vec<Element> {
  MediaType::all()
    .into_iter()
    .map(|media_type| {
      let sources: Vec<&MediaSource> = conference_sources.iter().filter(|s| s.media_type == media_type).collect();
      let groups: Vec<&SourceGroup> = conference_groups.iter().filter(|g| g.media_type == media_type).collect();
      let mut content = description_content(media_type, &sources, &groups);
      if let Some(transport) = transport {
        content.append_child(transport_element(transport));
      }
      content
    })
    .collect()
}

fn media_type_from_content_name(name: &str) -> Option<MediaType> {
  match name {
    "audio" => Some(MediaType::Audio),
    "video" => Some(MediaType::Video),
    _ => None,
  }
}

/// Inverse of `to_ssma_semantics`. Jitsi only ever sends `SIM`/`FID`/`SRF`
/// in practice; the RFC5888 semantics with no internal counterpart (`LS`,
/// `ANAT`, `FEC`, `DDP`) are dropped rather than guessed at.
fn from_ssma_semantics(semantics: focus_xmpp::jingle_ssma::Semantics) -> Option<GroupSemantics> {
  match semantics {
    focus_xmpp::jingle_ssma::Semantics::Sim => Some(GroupSemantics::Simulcast),
    focus_xmpp::jingle_ssma::Semantics::Fid => Some(GroupSemantics::Fid),
    focus_xmpp::jingle_ssma::Semantics::Srf => Some(GroupSemantics::Sid),
    _ => None,
  }
}

/// Parses the sources/groups a `session-accept`/`source-add`/`source-remove`
/// Jingle carries (spec §4.6), stamping `owner` on every source the way
/// `Participant::claim_sources` does for every other ingress path.
pub fn parse_sources_from_contents(owner: &str, contents: &[focus_xmpp::jingle::Content]) -> (Vec<MediaSource>, Vec<SourceGroup>) {
  let mut sources = Vec::new();
  let mut groups = Vec::new();
  for content in contents {
    let Some(focus_xmpp::jingle::Description::Rtp(rtp)) = &content.description
    else {
      continue;
    };
    let Some(media_type) =
      media_type_from_content_name(&rtp.media).or_else(|| media_type_from_content_name(content.name.0.as_str()))
    else {
      continue;
    };
    for source in &rtp.ssrcs {
      let mut media_source = MediaSource::new(owner, source.id, media_type);
      for parameter in &source.parameters {
        media_source = media_source.with_parameter(parameter.name.clone(), parameter.value.clone().unwrap_or_default());
      }
      sources.push(media_source);
    }
    for group in &rtp.ssrc_groups {
      let Some(semantics) = from_ssma_semantics(group.semantics)
      else {
        continue;
      };
      groups.push(SourceGroup::new(semantics, media_type, group.sources.iter().map(|s| s.id).collect()));
    }
  }
  (sources, groups)
}

/// Extracts the first `ice-udp` transport a Jingle's contents carry (spec
/// §4.2 `addTransportFromJingle`): ufrag/pwd/fingerprint plus every
/// candidate, ready to hand to `Participant::merge_transport`.
pub fn parse_transport_from_contents(
  contents: &[focus_xmpp::jingle::Content],
) -> Option<(Option<String>, Option<String>, Option<focus_xmpp::jingle_dtls_srtp::Fingerprint>, Vec<IceCandidate>)> {
  for content in contents {
    if let Some(focus_xmpp::jingle::Transport::IceUdp(transport)) = &content.transport {
      let candidates = transport.candidates.iter().cloned().map(IceCandidate::from).collect();
      return Some((transport.ufrag.clone(), transport.pwd.clone(), transport.fingerprint.clone(), candidates));
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use std::convert::TryFrom;

  use super::*;

  #[test]
  fn builds_one_content_per_media_type_even_when_empty() {
    let contents = build_offer_contents(&[], &[], None);
    assert_eq!(contents.len(), 2);
    assert!(contents.iter().any(|c| c.attr("name") == Some("audio")));
    assert!(contents.iter().any(|c| c.attr("name") == Some("video")));
  }

  #[test]
  fn carries_conference_sources_by_media_type() {
    let sources = vec![MediaSource::new("alice", 111, MediaType::Audio), MediaSource::new("alice", 222, MediaType::Video)];
    let contents = build_offer_contents(&sources, &[], None);
    let audio = contents.iter().find(|c| c.attr("name") == Some("audio")).unwrap();
    let description = audio.get_child("description", xmpp_parsers::ns::JINGLE_RTP).unwrap();
    assert!(description.get_child("source", xmpp_parsers::ns::JINGLE_SSMA).is_some());
  }

  #[test]
  fn parses_sources_back_out_of_offer_contents() {
    let sources = vec![MediaSource::new("alice", 111, MediaType::Audio), MediaSource::new("alice", 222, MediaType::Video)];
    let groups = vec![SourceGroup::new(GroupSemantics::Fid, MediaType::Video, vec![222, 333])];
    let mut all_sources = sources.clone();
    all_sources.push(MediaSource::new("alice", 333, MediaType::Video));
    let elements = build_offer_contents(&all_sources, &groups, None);
    let contents: Vec<focus_xmpp::jingle::Content> =
      elements.into_iter().map(|e| focus_xmpp::jingle::Content::try_from(e).unwrap()).collect();

    let (parsed_sources, parsed_groups) = parse_sources_from_contents("bob", &contents);
    assert_eq!(parsed_sources.len(), 3);
    assert!(parsed_sources.iter().all(|s| s.owner == "bob"));
    assert_eq!(parsed_groups.len(), 1);
    assert_eq!(parsed_groups[0].semantics, GroupSemantics::Fid);
  }

  #[test]
  fn drops_rfc5888_semantics_with_no_internal_counterpart() {
    assert_eq!(from_ssma_semantics(focus_xmpp::jingle_ssma::Semantics::Ls), None);
    assert_eq!(from_ssma_semantics(focus_xmpp::jingle_ssma::Semantics::Sim), Some(GroupSemantics::Simulcast));
  }
}
