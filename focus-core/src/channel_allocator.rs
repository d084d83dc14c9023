//! ChannelAllocator (spec §4.4).
//!
//! Runs on the shared worker pool (here: `tokio::spawn` on the runtime's
//! default executor, which plays the role of the teacher's shared
//! thread-pool) and is cancellable at every suspension point via a
//! one-shot flag, per spec §5's cancellation contract.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use tracing::{debug, warn};

use crate::{
  bridge_session::{BridgeSessionId, ChannelsInfo},
  error::{FocusError, FocusResult},
  interfaces::{ColibriConference, JingleChannel},
  source::{MediaSource, SourceGroup},
};

/// One-shot cancellation flag shared between the allocator task and
/// whoever replaces it in the `Participant` slot (spec §5).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Describes the Jingle offer a `ChannelAllocator` must send once COLIBRI
/// channels are ready (spec §4.4: own SSRCs, conference SSRCs of other
/// participants with owner tags, source-groups, bundle transport, and
/// start-muted flags).
pub struct AllocationOffer {
  pub endpoint_id: String,
  pub is_reinvite: bool,
  pub is_octo: bool,
  pub offer_contents: Vec<xmpp_parsers::Element>,
  pub conference_sources: Vec<MediaSource>,
  pub conference_groups: Vec<SourceGroup>,
  pub start_muted: (bool, bool),
}

pub struct ChannelAllocator {
  pub bridge_session_id: BridgeSessionId,
  pub token: CancellationToken,
  offer: AllocationOffer,
  colibri: Arc<dyn ColibriConference>,
  jingle: Arc<dyn JingleChannel>,
}

/// Result of a completed allocation: the caller stores `channels` on the
/// participant and, on success, the Jingle session is already
/// established by the time this returns.
pub struct AllocationOutcome {
  pub channels: ChannelsInfo,
}

impl ChannelAllocator {
  pub fn new(
    bridge_session_id: BridgeSessionId,
    offer: AllocationOffer,
    colibri: Arc<dyn ColibriConference>,
    jingle: Arc<dyn JingleChannel>,
  ) -> Self {
    Self {
      bridge_session_id,
      token: CancellationToken::new(),
      offer,
      colibri,
      jingle,
    }
  }

  pub fn is_reinvite(&self) -> bool {
    self.offer.is_reinvite
  }

  pub fn cancel(&self) {
    self.token.cancel();
  }

  /// Runs the allocation. On COLIBRI failure returns
  /// [`FocusError::BridgeFailure`] (the caller invokes
  /// `onChannelAllocationFailed`, per spec §4.4). On cancellation observed
  /// at any suspension point, expires any channels already allocated and
  /// returns `Ok(None)` with no wire traffic sent (spec §5).
  #[tracing::instrument(level = "debug", skip(self), fields(endpoint_id = %self.offer.endpoint_id), err)]
  pub async fn run(mut self, peer: jid::FullJid) -> FocusResult<Option<AllocationOutcome>> {
    if self.token.is_cancelled() {
      debug!("cancelled before channel creation");
      return Ok(None);
    }

    let channels = self
      .colibri
      .create_channels(&self.offer.endpoint_id, true, self.offer.offer_contents.clone())
      .await
      .map_err(|_| FocusError::BridgeFailure)?;

    if self.token.is_cancelled() {
      debug!("cancelled after channel creation, expiring");
      if let Err(e) = self.colibri.expire_channels(&channels).await {
        warn!("failed to expire channels after cancellation: {:?}", e);
      }
      return Ok(None);
    }

    self
      .colibri
      .update_sources_info(&self.offer.conference_sources, &self.offer.conference_groups, &channels)
      .await
      .map_err(|_| FocusError::BridgeFailure)?;

    if self.token.is_cancelled() {
      debug!("cancelled after source push, expiring");
      if let Err(e) = self.colibri.expire_channels(&channels).await {
        warn!("failed to expire channels after cancellation: {:?}", e);
      }
      return Ok(None);
    }

    let offer_contents = std::mem::take(&mut self.offer.offer_contents);
    let sent = if self.offer.is_reinvite {
      self
        .jingle
        .send_transport_replace(&peer, offer_contents)
        .await
        .map(|_| true)?
    }
    else {
      self
        .jingle
        .initiate_session(&peer, true, offer_contents, self.offer.start_muted)
        .await?
    };

    if !sent {
      warn!("jingle channel refused to send the offer");
      if let Err(e) = self.colibri.expire_channels(&channels).await {
        warn!("failed to expire channels after refused offer: {:?}", e);
      }
      return Err(FocusError::BridgeFailure);
    }

    Ok(Some(AllocationOutcome { channels }))
  }
}
