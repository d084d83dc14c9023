//! Participant (spec §3, §4.2).
//!
//! One chat member's signalling state: capability set, Jingle session
//! handle, bundled transport, owned sources, pending `source-add`/
//! `source-remove` deltas, mute flags, and a restart-request rate limiter.

use std::{
  collections::VecDeque,
  time::{Duration, Instant},
};

use jid::{FullJid, Jid};

use crate::source::{MediaSource, MediaType, SourceGroup, SourceMap};

/// Capabilities a client advertised via disco#info / presence (spec §3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
  pub bundle: bool,
  pub dtls: bool,
  pub rtx: bool,
  pub ice: bool,
  pub audio: bool,
  pub video: bool,
  pub audio_mute: bool,
  pub tcc: bool,
  pub remb: bool,
  pub opus_red: bool,
  pub lip_sync: bool,
  pub jigasi: bool,
  pub jibri: bool,
}

/// Handle to an established Jingle session. The session's actual stanza
/// traffic is owned by the `JingleChannel` collaborator (spec §6); the
/// core only needs to know whether one exists and correlate replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JingleSessionHandle {
  pub session_id: String,
  pub accepted: bool,
}

/// A single ICE-UDP candidate, deduplicated by foundation+component+ip+port
/// (spec §4.2 `addTransportFromJingle`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
  pub foundation: String,
  pub component: u32,
  pub ip: String,
  pub port: u16,
  pub raw: focus_xmpp::jingle_ice_udp::Candidate,
}

impl IceCandidate {
  fn identity(&self) -> (&str, u32, &str, u16) {
    (&self.foundation, self.component, &self.ip, self.port)
  }
}

impl From<focus_xmpp::jingle_ice_udp::Candidate> for IceCandidate {
  fn from(raw: focus_xmpp::jingle_ice_udp::Candidate) -> Self {
    Self { foundation: raw.foundation.clone(), component: raw.component as u32, ip: raw.ip.to_string(), port: raw.port, raw }
  }
}

/// Bundled ICE-UDP transport, built up incrementally from `transport-info`
/// stanzas (spec §4.2).
#[derive(Debug, Clone, Default)]
pub struct BundledTransport {
  pub ufrag: Option<String>,
  pub pwd: Option<String>,
  pub fingerprint: Option<focus_xmpp::jingle_dtls_srtp::Fingerprint>,
  pub candidates: Vec<IceCandidate>,
}

impl BundledTransport {
  /// Merges `candidates` not already present (by foundation+component+ip+
  /// port) into this transport, and fills in `ufrag`/`pwd`/`fingerprint` if
  /// not yet set.
  pub fn merge(
    &mut self,
    ufrag: Option<String>,
    pwd: Option<String>,
    fingerprint: Option<focus_xmpp::jingle_dtls_srtp::Fingerprint>,
    candidates: Vec<IceCandidate>,
  ) {
    if self.ufrag.is_none() {
      self.ufrag = ufrag;
    }
    if self.pwd.is_none() {
      self.pwd = pwd;
    }
    if self.fingerprint.is_none() {
      self.fingerprint = fingerprint;
    }
    for candidate in candidates {
      if !self
        .candidates
        .iter()
        .any(|existing| existing.identity() == candidate.identity())
      {
        self.candidates.push(candidate);
      }
    }
  }
}

const RESTART_MIN_GAP: Duration = Duration::from_secs(10);
const RESTART_WINDOW: Duration = Duration::from_secs(60);
const RESTART_WINDOW_MAX: usize = 3;

/// Rate limiter for Jingle `session-initiate` restart requests (spec §4.2,
/// law checked in spec §8: a pure function of a monotonic clock and prior
/// call history).
#[derive(Debug, Default)]
pub struct RestartRateLimiter {
  history: VecDeque<Instant>,
}

impl RestartRateLimiter {
  /// Accepts if the previous request is older than 10s AND, after pruning
  /// requests older than 60s, fewer than 3 remain.
  pub fn increment_and_check(&mut self, now: Instant) -> bool {
    if let Some(&last) = self.history.back() {
      if now.saturating_duration_since(last) < RESTART_MIN_GAP {
        return false;
      }
    }
    while let Some(&front) = self.history.front() {
      if now.saturating_duration_since(front) > RESTART_WINDOW {
        self.history.pop_front();
      }
      else {
        break;
      }
    }
    if self.history.len() >= RESTART_WINDOW_MAX {
      return false;
    }
    self.history.push_back(now);
    true
  }
}

/// One chat member's signalling state (spec §3 `Participant`).
#[derive(Debug)]
pub struct Participant {
  /// MUC nickname — the room-local endpoint id used throughout the core.
  pub endpoint_id: String,
  pub room_jid: FullJid,
  pub real_jid: Option<Jid>,
  pub join_order: u32,
  pub capabilities: Capabilities,
  pub is_moderator: bool,

  jingle_session: Option<JingleSessionHandle>,
  transport: Option<BundledTransport>,
  sources: SourceMap,
  pending_add: Vec<(MediaSource, Vec<SourceGroup>)>,
  pending_remove: Vec<(MediaSource, Vec<SourceGroup>)>,
  muted: [bool; 2],
  restart_limiter: RestartRateLimiter,

  bridge_session_id: Option<crate::bridge_session::BridgeSessionId>,
  has_active_allocator: bool,
}

impl Participant {
  pub fn new(endpoint_id: impl Into<String>, room_jid: FullJid, join_order: u32) -> Self {
    Self {
      endpoint_id: endpoint_id.into(),
      room_jid,
      real_jid: None,
      join_order,
      capabilities: Capabilities::default(),
      is_moderator: false,
      jingle_session: None,
      transport: None,
      sources: SourceMap::new(),
      pending_add: Vec::new(),
      pending_remove: Vec::new(),
      muted: [false; 2],
      restart_limiter: RestartRateLimiter::default(),
      bridge_session_id: None,
      has_active_allocator: false,
    }
  }

  pub fn jingle_session(&self) -> Option<&JingleSessionHandle> {
    self.jingle_session.as_ref()
  }

  pub fn has_jingle_session(&self) -> bool {
    self.jingle_session.is_some()
  }

  /// Replaces the handle. If one already exists, the caller (always
  /// `session-accept`) overwrites it; this is logged by the caller, not
  /// here, so this function stays a pure setter.
  pub fn set_jingle_session(&mut self, session: JingleSessionHandle) {
    self.jingle_session = Some(session);
  }

  pub fn clear_jingle_session(&mut self) {
    self.jingle_session = None;
  }

  pub fn transport(&self) -> Option<&BundledTransport> {
    self.transport.as_ref()
  }

  pub fn merge_transport(
    &mut self,
    ufrag: Option<String>,
    pwd: Option<String>,
    fingerprint: Option<focus_xmpp::jingle_dtls_srtp::Fingerprint>,
    candidates: Vec<IceCandidate>,
  ) {
    self
      .transport
      .get_or_insert_with(BundledTransport::default)
      .merge(ufrag, pwd, fingerprint, candidates);
  }

  pub fn sources(&self) -> &SourceMap {
    &self.sources
  }

  pub fn sources_mut(&mut self) -> &mut SourceMap {
    &mut self.sources
  }

  /// Stamps each source with this participant's endpoint id as owner
  /// before validation (spec §4.2 `claimSources`).
  pub fn claim_sources(&self, mut sources: Vec<MediaSource>) -> Vec<MediaSource> {
    for source in &mut sources {
      source.owner = self.endpoint_id.clone();
    }
    sources
  }

  pub fn schedule_sources_to_add(&mut self, sources: Vec<MediaSource>, groups: Vec<SourceGroup>) {
    for source in sources {
      self.pending_add.push((source, groups.clone()));
    }
  }

  pub fn schedule_sources_to_remove(&mut self, sources: Vec<MediaSource>, groups: Vec<SourceGroup>) {
    for source in sources {
      self.pending_remove.push((source, groups.clone()));
    }
  }

  pub fn has_sources_to_add(&self) -> bool {
    !self.pending_add.is_empty()
  }

  pub fn has_sources_to_remove(&self) -> bool {
    !self.pending_remove.is_empty()
  }

  pub fn take_sources_to_add(&mut self) -> Vec<(MediaSource, Vec<SourceGroup>)> {
    std::mem::take(&mut self.pending_add)
  }

  pub fn take_sources_to_remove(&mut self) -> Vec<(MediaSource, Vec<SourceGroup>)> {
    std::mem::take(&mut self.pending_remove)
  }

  pub fn is_muted(&self, media_type: MediaType) -> bool {
    self.muted[media_type as usize]
  }

  /// Sets the mute flag; the caller is responsible for flipping the
  /// allocated channel's direction as the side effect spec §4.2 describes,
  /// since that requires the bridge session this participant is not aware
  /// of.
  pub fn set_muted(&mut self, media_type: MediaType, muted: bool) {
    self.muted[media_type as usize] = muted;
  }

  pub fn incremented_and_check_restart_requests(&mut self, now: Instant) -> bool {
    self.restart_limiter.increment_and_check(now)
  }

  pub fn bridge_session_id(&self) -> Option<crate::bridge_session::BridgeSessionId> {
    self.bridge_session_id
  }

  pub fn set_bridge_session_id(&mut self, id: Option<crate::bridge_session::BridgeSessionId>) {
    self.bridge_session_id = id;
  }

  pub fn has_active_allocator(&self) -> bool {
    self.has_active_allocator
  }

  pub fn set_has_active_allocator(&mut self, value: bool) {
    self.has_active_allocator = value;
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;

  #[test]
  fn restart_rate_limit_matches_seed_scenario() {
    let mut limiter = RestartRateLimiter::default();
    let t0 = Instant::now();
    assert!(limiter.increment_and_check(t0), "t=0 accept");
    assert!(
      !limiter.increment_and_check(t0 + Duration::from_secs(5)),
      "t=5 deny (gap < 10s)"
    );
    assert!(
      limiter.increment_and_check(t0 + Duration::from_secs(12)),
      "t=12 accept"
    );
    assert!(
      limiter.increment_and_check(t0 + Duration::from_secs(22)),
      "t=22 accept"
    );
    assert!(
      !limiter.increment_and_check(t0 + Duration::from_secs(32)),
      "t=32 deny (3 in last minute)"
    );
    assert!(
      limiter.increment_and_check(t0 + Duration::from_secs(80)),
      "t=80 accept (oldest aged out)"
    );
  }

  #[test]
  fn pending_queues_flush_in_insertion_order() {
    let mut p = Participant::new("abcd1234", "room@conf.example/abcd1234".parse().unwrap(), 1);
    p.schedule_sources_to_add(
      vec![MediaSource::new("abcd1234", 1, MediaType::Audio)],
      vec![],
    );
    p.schedule_sources_to_add(
      vec![MediaSource::new("abcd1234", 2, MediaType::Video)],
      vec![],
    );
    let flushed = p.take_sources_to_add();
    assert_eq!(flushed[0].0.ssrc, 1);
    assert_eq!(flushed[1].0.ssrc, 2);
    assert!(!p.has_sources_to_add());
  }

  #[test]
  fn set_muted_is_monotonic_until_explicitly_cleared() {
    let mut p = Participant::new("abcd1234", "room@conf.example/abcd1234".parse().unwrap(), 1);
    p.set_muted(MediaType::Audio, true);
    assert!(p.is_muted(MediaType::Audio));
    // a source claim does not clear the flag
    let _ = p.claim_sources(vec![MediaSource::new("x", 1, MediaType::Audio)]);
    assert!(p.is_muted(MediaType::Audio));
  }

  mod props {
    use proptest::prelude::*;

    use super::*;

    /// Reference model of the same law the limiter implements: accept iff
    /// the gap since the last accepted request is at least 10s and fewer
    /// than 3 accepted requests remain in the trailing 60s window.
    fn model_accept(history: &mut VecDeque<Instant>, now: Instant) -> bool {
      if let Some(&last) = history.back() {
        if now.saturating_duration_since(last) < RESTART_MIN_GAP {
          return false;
        }
      }
      while let Some(&front) = history.front() {
        if now.saturating_duration_since(front) > RESTART_WINDOW {
          history.pop_front();
        }
        else {
          break;
        }
      }
      if history.len() >= RESTART_WINDOW_MAX {
        return false;
      }
      history.push_back(now);
      true
    }

    proptest! {
      /// For any sequence of request gaps (in seconds), the limiter's
      /// accept/deny decisions match the reference model exactly.
      #[test]
      fn matches_reference_model(gaps in proptest::collection::vec(0u64..40, 1..30)) {
        let mut limiter = RestartRateLimiter::default();
        let mut model = VecDeque::new();
        let t0 = Instant::now();
        let mut elapsed = Duration::ZERO;
        for gap in gaps {
          elapsed += Duration::from_secs(gap);
          let now = t0 + elapsed;
          prop_assert_eq!(limiter.increment_and_check(now), model_accept(&mut model, now));
        }
      }
    }
  }
}
