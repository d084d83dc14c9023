//! BridgeSession and its Octo pseudo-participant (spec §4.3, §4.8).

use std::sync::{atomic::{AtomicU64, Ordering}, Arc};

use tracing::{debug, info, warn};

use crate::{
  bridge::Bridge,
  interfaces::ColibriConference,
  source::{MediaSource, MediaType, SourceGroup, SourceMap},
};

/// Identifies a [`BridgeSession`] within a single conference. Plain integer
/// rather than a reference, per spec §9's cyclic-reference avoidance
/// strategy: participants and allocators hold this id and look the
/// session up in the owning `Conference`'s registry rather than holding a
/// strong reference to it.
pub type BridgeSessionId = u64;

fn next_bridge_session_id() -> BridgeSessionId {
  static COUNTER: AtomicU64 = AtomicU64::new(1);
  COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Opaque COLIBRI channel allocation handle returned by
/// [`ColibriConference::create_channels`] and required by every later
/// update/expire call for the same endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelsInfo {
  pub endpoint_id: String,
  pub channel_bundle_id: String,
}

/// The Octo pseudo-participant a `BridgeSession` maintains once
/// `|bridges| > 1` (spec §4.8). It carries the replicated sources of every
/// *other* bridge's real participants and the relay ids those bridges
/// expose.
#[derive(Debug, Default)]
pub struct OctoParticipant {
  pub channels: Option<ChannelsInfo>,
  pub remote_relays: Vec<String>,
  sources: SourceMap,
  pending_sources: Vec<(Vec<MediaSource>, Vec<SourceGroup>)>,
}

impl OctoParticipant {
  pub fn sources(&self) -> &SourceMap {
    &self.sources
  }
}

/// One videobridge's participation in a conference (spec §4.3).
pub struct BridgeSession {
  pub id: BridgeSessionId,
  pub bridge: Bridge,
  colibri: Arc<dyn ColibriConference>,
  participant_ids: Vec<String>,
  octo: OctoParticipant,
  has_failed: bool,
  transport_up: bool,
}

impl std::fmt::Debug for BridgeSession {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("BridgeSession")
      .field("id", &self.id)
      .field("bridge", &self.bridge)
      .field("participant_ids", &self.participant_ids)
      .field("has_failed", &self.has_failed)
      .finish()
  }
}

impl BridgeSession {
  pub fn new(bridge: Bridge, colibri: Arc<dyn ColibriConference>) -> Self {
    Self {
      id: next_bridge_session_id(),
      bridge,
      colibri,
      participant_ids: Vec::new(),
      octo: OctoParticipant::default(),
      has_failed: false,
      transport_up: true,
    }
  }

  pub fn participant_ids(&self) -> &[String] {
    &self.participant_ids
  }

  pub fn colibri(&self) -> Arc<dyn ColibriConference> {
    self.colibri.clone()
  }

  pub fn has_failed(&self) -> bool {
    self.has_failed
  }

  pub fn mark_failed(&mut self) {
    self.has_failed = true;
  }

  pub fn add_participant(&mut self, endpoint_id: impl Into<String>) {
    let endpoint_id = endpoint_id.into();
    if !self.participant_ids.contains(&endpoint_id) {
      self.participant_ids.push(endpoint_id);
    }
  }

  pub fn has_octo(&self) -> bool {
    self.octo.channels.is_some()
  }

  /// Recomputes `remoteRelays = allRelays \ ownRelayId` and pushes it to
  /// the bridge if Octo channels are already established (spec §4.8).
  #[tracing::instrument(level = "debug", skip(self), err)]
  pub async fn set_relays(&mut self, all_relays: &[String]) -> crate::error::FocusResult<()> {
    let own = self.bridge.relay_id.as_deref();
    let remote: Vec<String> = all_relays.iter().filter(|r| Some(r.as_str()) != own).cloned().collect();
    self.octo.remote_relays = remote.clone();
    if let Some(channels) = &self.octo.channels {
      self
        .colibri
        .update_channels_info(
          channels,
          &self.octo.sources.all_sources().cloned().collect::<Vec<_>>(),
          self.octo.sources.groups(),
          "octo",
          &remote,
        )
        .await?;
    }
    Ok(())
  }

  /// Replicates sources from another bridge's real participant onto this
  /// bridge's Octo pseudo-participant (spec §4.8: "never to its own").
  #[tracing::instrument(level = "debug", skip(self, sources, groups), err)]
  pub async fn add_octo_sources(
    &mut self,
    sources: Vec<MediaSource>,
    groups: Vec<SourceGroup>,
  ) -> crate::error::FocusResult<()> {
    if !self.has_octo() {
      debug!(bridge = %self.bridge.jid, "octo session not yet established, queueing sources");
      self.octo.pending_sources.push((sources, groups));
      return Ok(());
    }
    for source in sources.iter().cloned() {
      self.octo.sources.insert(source);
    }
    for group in groups.iter().cloned() {
      self.octo.sources.add_group(group);
    }
    if let Some(channels) = &self.octo.channels {
      self
        .colibri
        .update_sources_info(
          &self.octo.sources.all_sources().cloned().collect::<Vec<_>>(),
          self.octo.sources.groups(),
          channels,
        )
        .await?;
    }
    Ok(())
  }

  /// Establishes the Octo pseudo-participant's COLIBRI channel and flushes
  /// any sources that were queued while it was not yet up.
  #[tracing::instrument(level = "debug", skip(self, offer_contents), err)]
  pub async fn establish_octo(
    &mut self,
    offer_contents: Vec<xmpp_parsers::Element>,
  ) -> crate::error::FocusResult<()> {
    let channels = self.colibri.create_channels("octo", true, offer_contents).await?;
    self.octo.channels = Some(channels.clone());
    let pending = std::mem::take(&mut self.octo.pending_sources);
    for (sources, groups) in pending {
      self.add_octo_sources(sources, groups).await?;
    }
    Ok(())
  }

  /// Calls [`Self::establish_octo`] only if Octo channels are not already
  /// up, so a caller that re-checks every time the bridge count changes
  /// does not repeatedly re-allocate them (spec §4.8).
  pub async fn ensure_octo(&mut self, offer_contents: Vec<xmpp_parsers::Element>) -> crate::error::FocusResult<()> {
    if self.has_octo() {
      return Ok(());
    }
    self.establish_octo(offer_contents).await
  }

  /// Removes `endpoint_id` and, if the session had not already failed,
  /// expires its COLIBRI channels without waiting synchronously (spec
  /// §4.3 `terminate`).
  #[tracing::instrument(level = "debug", skip(self))]
  pub fn terminate(&mut self, endpoint_id: &str, channels: Option<ChannelsInfo>) {
    self.participant_ids.retain(|id| id != endpoint_id);
    if self.has_failed {
      return;
    }
    if let Some(channels) = channels {
      let colibri = self.colibri.clone();
      tokio::spawn(async move {
        if let Err(e) = colibri.expire_channels(&channels).await {
          warn!("failed to expire channels for {}: {:?}", channels.endpoint_id, e);
        }
      });
    }
  }

  /// Removes every participant id, returning the snapshot used for
  /// re-invite (spec §4.3 `terminateAll`).
  pub fn terminate_all(&mut self) -> Vec<String> {
    std::mem::take(&mut self.participant_ids)
  }

  /// If not failed and the transport is still up, expires the whole
  /// COLIBRI conference; otherwise only drops local state (spec §4.3
  /// `dispose`).
  #[tracing::instrument(level = "debug", skip(self))]
  pub fn dispose(&mut self) {
    if !self.has_failed && self.transport_up {
      let colibri = self.colibri.clone();
      tokio::spawn(async move {
        if let Err(e) = colibri.expire_conference().await {
          warn!("failed to expire conference: {:?}", e);
        }
      });
    }
    info!(bridge = %self.bridge.jid, "bridge session disposed");
    self.participant_ids.clear();
    self.transport_up = false;
  }
}
