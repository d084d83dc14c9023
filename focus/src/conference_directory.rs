//! Routes incoming stanzas to a live [`Conference`] by room.
//!
//! `ConferenceRegistry` (spec §3/§5) deliberately owns only the room→GID
//! mapping and the idle-expiration loop; the actual `Arc<Conference>`
//! handles live here, alongside the wiring needed to build one's adapters.

use std::{collections::HashMap, sync::Arc};

use focus_core::{
  bridge_event_router::BridgeEventRouter,
  conference::Conference,
  error::FocusError,
  events::ConferenceEvent,
  interfaces::{MucRoom, MucRoomEvent},
  registry::ConferenceRegistry,
  FocusResult,
};
use jid::{BareJid, FullJid};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::xmpp::{
  colibri_conference::ColibriConferenceFactoryImpl, jingle_channel::JingleChannelImpl, muc_room::MucRoomImpl,
  transport::Transport,
};

pub struct ConferenceDirectory {
  transport: Arc<Transport>,
  nick: String,
  focus_jid: FullJid,
  registry: Arc<ConferenceRegistry>,
  bridge_events: Arc<BridgeEventRouter>,
  conferences: Mutex<HashMap<BareJid, Arc<Conference>>>,
}

impl ConferenceDirectory {
  pub fn new(
    transport: Arc<Transport>,
    nick: String,
    focus_jid: FullJid,
    registry: Arc<ConferenceRegistry>,
    bridge_events: Arc<BridgeEventRouter>,
  ) -> Arc<Self> {
    Arc::new(Self { transport, nick, focus_jid, registry, bridge_events, conferences: Mutex::new(HashMap::new()) })
  }

  pub async fn get(&self, room: &BareJid) -> Option<Arc<Conference>> {
    self.conferences.lock().await.get(room).cloned()
  }

  pub async fn rooms(&self) -> Vec<BareJid> {
    self.conferences.lock().await.keys().cloned().collect()
  }

  pub async fn remove(&self, room: &BareJid) {
    self.conferences.lock().await.remove(room);
  }

  /// Returns the conference for `room`, creating and starting a fresh one
  /// (spec §4.6 `start()`) if none exists yet. The `bool` is true when a
  /// new conference was created.
  #[tracing::instrument(level = "info", skip(self), err)]
  pub async fn get_or_create(self: &Arc<Self>, room: BareJid) -> FocusResult<(Arc<Conference>, bool)> {
    if let Some(existing) = self.get(&room).await {
      return Ok((existing, false));
    }

    let gid = self
      .registry
      .create_conference(room.clone())
      .await
      .ok_or_else(|| FocusError::NotAllowed("graceful shutdown in progress".to_owned()))?;

    let muc = Arc::new(MucRoomImpl::new(self.transport.clone(), room.clone(), &self.nick));
    let jingle = Arc::new(JingleChannelImpl::new(self.transport.clone(), self.focus_jid.clone()));
    let colibri_factory = Arc::new(ColibriConferenceFactoryImpl::new(self.transport.clone()));
    let conference = Conference::new(
      room.clone(),
      gid,
      self.registry.services().config.clone(),
      self.registry.services().clone(),
      muc.clone(),
      jingle,
      colibri_factory,
      self.registry.clone(),
    );
    conference.start().await?;
    self.bridge_events.register(&conference).await;
    self.transport.add_stanza_filter(muc.clone()).await;
    spawn_muc_event_glue(conference.clone(), muc.clone());

    self.conferences.lock().await.insert(room.clone(), conference.clone());
    self.spawn_expiry_watch(room, conference.clone());
    Ok((conference, true))
  }

  /// Drops the local handle once the conference reports `Expired` (spec
  /// §4.6 `stop()`), so a later request for the same room starts fresh.
  fn spawn_expiry_watch(self: &Arc<Self>, room: BareJid, conference: Arc<Conference>) {
    let this = self.clone();
    let mut events = conference.subscribe();
    tokio::spawn(async move {
      while let Ok(event) = events.recv().await {
        if matches!(event, ConferenceEvent::Expired) {
          this.remove(&room).await;
          info!(%room, "conference expired, dropped from directory");
          break;
        }
      }
    });
  }
}

/// Turns a room's membership/local-role-change notifications into the
/// `Conference` calls they drive (spec §6): join/leave/kick become
/// `on_member_joined`/`terminate_participant`, and a local-role change
/// becomes `on_local_role_changed`.
fn spawn_muc_event_glue(conference: Arc<Conference>, muc: Arc<MucRoomImpl>) {
  let mut events = muc.subscribe();
  tokio::spawn(async move {
    while let Ok(event) = events.recv().await {
      match event {
        MucRoomEvent::MemberJoined { endpoint_id, jid, region, is_robot } => {
          if let Err(e) = conference.on_member_joined(endpoint_id, jid, region, is_robot).await {
            warn!("on_member_joined failed: {:?}", e);
          }
        },
        MucRoomEvent::MemberLeft { endpoint_id } => {
          if let Err(e) = conference.terminate_participant(&endpoint_id, "left").await {
            warn!("terminate_participant (left) failed: {:?}", e);
          }
        },
        MucRoomEvent::MemberKicked { endpoint_id, reason } => {
          let reason = reason.unwrap_or_else(|| "kicked".to_owned());
          if let Err(e) = conference.terminate_participant(&endpoint_id, &reason).await {
            warn!("terminate_participant (kicked) failed: {:?}", e);
          }
        },
        MucRoomEvent::LocalRoleChanged { is_owner } => {
          if let Err(e) = conference.on_local_role_changed(is_owner).await {
            warn!("on_local_role_changed failed: {:?}", e);
          }
        },
      }
    }
  });
}
