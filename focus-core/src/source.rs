//! SourceModel / SourceValidator (spec §3, §4.1).
//!
//! A [`MediaSource`] is identified by `(owner, ssrc, media_type)`. A
//! [`SourceGroup`] is an ordered tuple of SSRCs carrying a semantic tag
//! (simulcast/FID/SID groupings). [`SourceMap`] is the per-participant (or,
//! inside [`SourceValidator`], conference-wide) mapping of media type to the
//! set of sources owned there. [`SourceValidator::try_add`] is the atomic
//! gate every inbound `source-add` and `session-accept` passes through
//! before conference state changes (spec §4.1, invariants 2-4 of spec §3).

use std::{
  collections::{HashMap, HashSet},
  fmt,
};

use thiserror::Error;

/// The two media kinds a Jingle session negotiates (spec glossary).
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum MediaType {
  Audio,
  Video,
}

impl MediaType {
  pub fn jitsi_muted_presence_element_name(&self) -> &'static str {
    match self {
      MediaType::Audio => "audiomuted",
      MediaType::Video => "videomuted",
    }
  }

  pub fn all() -> [MediaType; 2] {
    [MediaType::Audio, MediaType::Video]
  }
}

impl fmt::Display for MediaType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MediaType::Audio => write!(f, "audio"),
      MediaType::Video => write!(f, "video"),
    }
  }
}

/// One RTP media stream, owned by a single participant (room-local endpoint
/// id). Immutable apart from the owner tag stamped at ingress by
/// `Participant::claim_sources`.
#[derive(Debug, Clone)]
pub struct MediaSource {
  pub owner: String,
  pub ssrc: u32,
  pub media_type: MediaType,
  pub parameters: Vec<(String, String)>,
}

impl MediaSource {
  pub fn new(owner: impl Into<String>, ssrc: u32, media_type: MediaType) -> Self {
    Self {
      owner: owner.into(),
      ssrc,
      media_type,
      parameters: Vec::new(),
    }
  }

  pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.parameters.push((name.into(), value.into()));
    self
  }

  fn identity(&self) -> (&str, u32, MediaType) {
    (&self.owner, self.ssrc, self.media_type)
  }
}

impl PartialEq for MediaSource {
  fn eq(&self, other: &Self) -> bool {
    self.identity() == other.identity()
  }
}
impl Eq for MediaSource {}

impl std::hash::Hash for MediaSource {
  fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
    self.identity().hash(state);
  }
}

/// The semantic tag on a [`SourceGroup`].
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum GroupSemantics {
  Simulcast,
  Fid,
  Sid,
}

impl fmt::Display for GroupSemantics {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      GroupSemantics::Simulcast => write!(f, "SIM"),
      GroupSemantics::Fid => write!(f, "FID"),
      GroupSemantics::Sid => write!(f, "SID"),
    }
  }
}

/// An ordered grouping of SSRCs (spec §3: invariant "every SSRC referenced
/// by a group must also be present as a `MediaSource` with the same
/// owner").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceGroup {
  pub semantics: GroupSemantics,
  pub media_type: MediaType,
  pub ssrcs: Vec<u32>,
}

impl SourceGroup {
  pub fn new(semantics: GroupSemantics, media_type: MediaType, ssrcs: Vec<u32>) -> Self {
    Self {
      semantics,
      media_type,
      ssrcs,
    }
  }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceValidationError {
  #[error("ssrc 0 is not a valid source identifier")]
  ZeroSsrc,
  #[error("ssrc {0} is already owned")]
  AlreadyOwned(u32),
  #[error("ssrc {0} was declared twice in the same request")]
  DuplicateInRequest(u32),
  #[error("adding these sources would exceed the per-user limit of {max} for {media_type}")]
  TooManySources { media_type: MediaType, max: usize },
  #[error("source group references ssrc {0} which is not among the owner's sources")]
  GroupReferencesUnknownSsrc(u32),
  #[error("a simulcast group must have at least two ssrcs")]
  SimulcastGroupTooSmall,
  #[error("a simulcast group's ssrcs must all belong to the same owner")]
  SimulcastGroupMixedOwners,
}

/// Per-owner mapping of media type to the set of sources placed there.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
  sources: HashMap<MediaType, HashSet<MediaSource>>,
  groups: Vec<SourceGroup>,
}

impl SourceMap {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn sources_of(&self, media_type: MediaType) -> impl Iterator<Item = &MediaSource> {
    self.sources.get(&media_type).into_iter().flatten()
  }

  pub fn all_sources(&self) -> impl Iterator<Item = &MediaSource> {
    self.sources.values().flatten()
  }

  pub fn groups(&self) -> &[SourceGroup] {
    &self.groups
  }

  pub fn count(&self, media_type: MediaType) -> usize {
    self.sources.get(&media_type).map_or(0, HashSet::len)
  }

  pub fn contains_ssrc(&self, media_type: MediaType, ssrc: u32) -> bool {
    self
      .sources
      .get(&media_type)
      .map_or(false, |set| set.iter().any(|s| s.ssrc == ssrc))
  }

  pub(crate) fn insert(&mut self, source: MediaSource) {
    self.sources.entry(source.media_type).or_default().insert(source);
  }

  fn remove_source(&mut self, source: &MediaSource) -> bool {
    self
      .sources
      .get_mut(&source.media_type)
      .map_or(false, |set| set.remove(source))
  }

  pub(crate) fn add_group(&mut self, group: SourceGroup) {
    self.groups.push(group);
  }

  fn remove_group(&mut self, group: &SourceGroup) -> bool {
    if let Some(pos) = self.groups.iter().position(|g| g == group) {
      self.groups.remove(pos);
      true
    }
    else {
      false
    }
  }

  /// Deep-copy for propagation (spec §5: "source maps are copied before
  /// propagation ... so that neither writers nor in-flight notifications
  /// observe torn state").
  pub fn snapshot(&self) -> SourceMap {
    self.clone()
  }
}

/// Conference-wide source bookkeeping: validates additions against
/// cross-participant invariants (spec §3 invariants 2-4) and tracks which
/// endpoint currently owns each SSRC so that a second participant cannot
/// claim it.
#[derive(Debug, Default)]
pub struct SourceValidator {
  max_sources_per_user: usize,
  ssrc_owners: HashMap<u32, String>,
}

impl SourceValidator {
  pub fn new(max_sources_per_user: usize) -> Self {
    Self {
      max_sources_per_user,
      ssrc_owners: HashMap::new(),
    }
  }

  /// Atomically validates and, on success, applies `new_sources`/
  /// `new_groups` onto `owner_map`. On any validation failure, `owner_map`
  /// and the validator's own bookkeeping are left untouched.
  pub fn try_add(
    &mut self,
    owner: &str,
    owner_map: &mut SourceMap,
    new_sources: Vec<MediaSource>,
    new_groups: Vec<SourceGroup>,
  ) -> Result<(Vec<MediaSource>, Vec<SourceGroup>), SourceValidationError> {
    let mut seen_in_request: HashSet<u32> = HashSet::new();
    for source in &new_sources {
      if source.ssrc == 0 {
        return Err(SourceValidationError::ZeroSsrc);
      }
      if !seen_in_request.insert(source.ssrc) {
        return Err(SourceValidationError::DuplicateInRequest(source.ssrc));
      }
      if let Some(existing_owner) = self.ssrc_owners.get(&source.ssrc) {
        if existing_owner != owner || owner_map.contains_ssrc(source.media_type, source.ssrc) {
          return Err(SourceValidationError::AlreadyOwned(source.ssrc));
        }
      }
    }

    for media_type in MediaType::all() {
      let added = new_sources.iter().filter(|s| s.media_type == media_type).count();
      if owner_map.count(media_type) + added > self.max_sources_per_user {
        return Err(SourceValidationError::TooManySources {
          media_type,
          max: self.max_sources_per_user,
        });
      }
    }

    let will_have_ssrc = |ssrc: u32, media_type: MediaType| {
      owner_map.contains_ssrc(media_type, ssrc)
        || new_sources.iter().any(|s| s.ssrc == ssrc && s.media_type == media_type)
    };

    for group in &new_groups {
      for &ssrc in &group.ssrcs {
        if !will_have_ssrc(ssrc, group.media_type) {
          return Err(SourceValidationError::GroupReferencesUnknownSsrc(ssrc));
        }
      }
      if group.semantics == GroupSemantics::Simulcast {
        if group.ssrcs.len() < 2 {
          return Err(SourceValidationError::SimulcastGroupTooSmall);
        }
        let owners: HashSet<&str> = group
          .ssrcs
          .iter()
          .map(|ssrc| {
            new_sources
              .iter()
              .find(|s| s.ssrc == *ssrc)
              .map(|s| s.owner.as_str())
              .or_else(|| {
                owner_map
                  .all_sources()
                  .find(|s| s.ssrc == *ssrc)
                  .map(|s| s.owner.as_str())
              })
              .unwrap_or(owner)
          })
          .collect();
        if owners.len() > 1 {
          return Err(SourceValidationError::SimulcastGroupMixedOwners);
        }
      }
    }

    for source in &new_sources {
      self.ssrc_owners.insert(source.ssrc, owner.to_owned());
      owner_map.insert(source.clone());
    }
    for group in &new_groups {
      owner_map.add_group(group.clone());
    }

    Ok((new_sources, new_groups))
  }

  /// Removes only the intersection with `owner_map`'s current state — a
  /// participant cannot remove another's sources (spec §4.1).
  pub fn remove(
    &mut self,
    owner_map: &mut SourceMap,
    sources: &[MediaSource],
    groups: &[SourceGroup],
  ) -> (Vec<MediaSource>, Vec<SourceGroup>) {
    let mut removed_sources = Vec::new();
    for source in sources {
      if owner_map.remove_source(source) {
        self.ssrc_owners.remove(&source.ssrc);
        removed_sources.push(source.clone());
      }
    }
    let mut removed_groups = Vec::new();
    for group in groups {
      if owner_map.remove_group(group) {
        removed_groups.push(group.clone());
      }
    }
    (removed_sources, removed_groups)
  }

  /// Drops all bookkeeping for a departing participant's sources, e.g. when
  /// a participant is terminated outright rather than removing sources one
  /// at a time.
  pub fn forget_all(&mut self, owner_map: &SourceMap) {
    for source in owner_map.all_sources() {
      self.ssrc_owners.remove(&source.ssrc);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn source(owner: &str, ssrc: u32, media_type: MediaType) -> MediaSource {
    MediaSource::new(owner, ssrc, media_type)
  }

  #[test]
  fn rejects_zero_ssrc() {
    let mut validator = SourceValidator::new(10);
    let mut map = SourceMap::new();
    let err = validator
      .try_add("a", &mut map, vec![source("a", 0, MediaType::Audio)], vec![])
      .unwrap_err();
    assert_eq!(err, SourceValidationError::ZeroSsrc);
    assert_eq!(map.count(MediaType::Audio), 0);
  }

  #[test]
  fn rejects_ssrc_owned_by_another_participant() {
    let mut validator = SourceValidator::new(10);
    let mut map_a = SourceMap::new();
    validator
      .try_add("a", &mut map_a, vec![source("a", 111, MediaType::Audio)], vec![])
      .unwrap();

    let mut map_b = SourceMap::new();
    let err = validator
      .try_add("b", &mut map_b, vec![source("b", 111, MediaType::Audio)], vec![])
      .unwrap_err();
    assert_eq!(err, SourceValidationError::AlreadyOwned(111));
    assert_eq!(map_b.count(MediaType::Audio), 0);
  }

  #[test]
  fn rejects_duplicate_within_request() {
    let mut validator = SourceValidator::new(10);
    let mut map = SourceMap::new();
    let err = validator
      .try_add(
        "a",
        &mut map,
        vec![source("a", 1, MediaType::Audio), source("a", 1, MediaType::Audio)],
        vec![],
      )
      .unwrap_err();
    assert_eq!(err, SourceValidationError::DuplicateInRequest(1));
  }

  #[test]
  fn enforces_max_sources_per_user_per_media_type() {
    let mut validator = SourceValidator::new(2);
    let mut map = SourceMap::new();
    validator
      .try_add(
        "a",
        &mut map,
        vec![source("a", 1, MediaType::Video), source("a", 2, MediaType::Video)],
        vec![],
      )
      .unwrap();

    let err = validator
      .try_add("a", &mut map, vec![source("a", 3, MediaType::Video)], vec![])
      .unwrap_err();
    assert_eq!(
      err,
      SourceValidationError::TooManySources {
        media_type: MediaType::Video,
        max: 2
      }
    );
    // state unchanged after rejection
    assert_eq!(map.count(MediaType::Video), 2);
    assert!(!map.contains_ssrc(MediaType::Video, 3));
  }

  #[test]
  fn group_must_reference_known_sources() {
    let mut validator = SourceValidator::new(10);
    let mut map = SourceMap::new();
    let err = validator
      .try_add(
        "a",
        &mut map,
        vec![],
        vec![SourceGroup::new(GroupSemantics::Fid, MediaType::Video, vec![1, 2])],
      )
      .unwrap_err();
    assert_eq!(err, SourceValidationError::GroupReferencesUnknownSsrc(1));
  }

  #[test]
  fn simulcast_group_needs_two_ssrcs_same_owner() {
    let mut validator = SourceValidator::new(10);
    let mut map = SourceMap::new();
    let err = validator
      .try_add(
        "a",
        &mut map,
        vec![source("a", 1, MediaType::Video)],
        vec![SourceGroup::new(GroupSemantics::Simulcast, MediaType::Video, vec![1])],
      )
      .unwrap_err();
    assert_eq!(err, SourceValidationError::SimulcastGroupTooSmall);
  }

  #[test]
  fn add_remove_round_trip_restores_prior_state() {
    let mut validator = SourceValidator::new(10);
    let mut map = SourceMap::new();
    let sources = vec![
      source("a", 1, MediaType::Audio),
      source("a", 2, MediaType::Video),
      source("a", 3, MediaType::Video),
    ];
    let groups = vec![SourceGroup::new(GroupSemantics::Simulcast, MediaType::Video, vec![2, 3])];
    validator
      .try_add("a", &mut map, sources.clone(), groups.clone())
      .unwrap();
    assert_eq!(map.count(MediaType::Audio), 1);
    assert_eq!(map.count(MediaType::Video), 2);

    validator.remove(&mut map, &sources, &groups);
    assert_eq!(map.count(MediaType::Audio), 0);
    assert_eq!(map.count(MediaType::Video), 0);
    assert!(map.groups().is_empty());

    // the ssrcs are free again
    validator
      .try_add("b", &mut map, vec![source("b", 1, MediaType::Audio)], vec![])
      .unwrap();
  }

  #[test]
  fn remove_only_intersects_owners_current_state() {
    let mut validator = SourceValidator::new(10);
    let mut map_a = SourceMap::new();
    validator
      .try_add("a", &mut map_a, vec![source("a", 1, MediaType::Audio)], vec![])
      .unwrap();

    let mut map_b = SourceMap::new();
    // "b" never had ssrc 1; removing it from b's map is a no-op.
    let (removed, _) = validator.remove(&mut map_b, &[source("a", 1, MediaType::Audio)], &[]);
    assert!(removed.is_empty());
    assert_eq!(map_a.count(MediaType::Audio), 1);
  }

  mod props {
    use proptest::prelude::*;

    use super::*;

    /// Arbitrary ssrcs, distinct and non-zero, with a matching media type so
    /// that no group/limit invariant needs to be satisfied for this law.
    fn ssrc_batch() -> impl Strategy<Value = Vec<u32>> {
      proptest::collection::hash_set(1u32..10_000, 1..8).prop_map(|set| set.into_iter().collect())
    }

    proptest! {
      /// Adding a batch of sources then removing the same batch always
      /// restores the owner map to empty and frees the ssrcs for reuse,
      /// whatever the batch's size or ssrc values (spec §4.1).
      #[test]
      fn add_then_remove_is_identity(ssrcs in ssrc_batch(), media_type_is_video in any::<bool>()) {
        let media_type = if media_type_is_video { MediaType::Video } else { MediaType::Audio };
        let mut validator = SourceValidator::new(ssrcs.len().max(1));
        let mut map = SourceMap::new();
        let sources: Vec<MediaSource> = ssrcs.iter().map(|&ssrc| source("owner", ssrc, media_type)).collect();

        validator.try_add("owner", &mut map, sources.clone(), vec![]).unwrap();
        prop_assert_eq!(map.count(media_type), sources.len());

        validator.remove(&mut map, &sources, &[]);
        prop_assert_eq!(map.count(media_type), 0);
        for &ssrc in &ssrcs {
          prop_assert!(!map.contains_ssrc(media_type, ssrc));
        }

        // the ssrcs are unowned again, so a different owner can claim them.
        validator.try_add("other", &mut map, sources.iter().map(|s| source("other", s.ssrc, s.media_type)).collect(), vec![]).unwrap();
      }
    }
  }
}
