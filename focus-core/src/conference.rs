//! Conference — the state machine (spec §4.6).
//!
//! Mirrors the teacher's `Arc<Mutex<Inner>>` shape (see the former
//! `JitsiConference`/`JitsiConferenceInner` split) but splits the inner
//! state into the two locks spec §5 mandates, always acquired in the
//! order `participants_lock → bridges_lock`, and replaces the teacher's
//! `on_participant`/`on_colibri_message` callback setters with a single
//! typed [`broadcast`] channel of [`ConferenceEvent`] (spec §9).

use std::{collections::HashMap, sync::Arc, time::Instant};

use jid::{BareJid, FullJid, Jid};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
  bridge::{Bridge, ConferenceBridgeView, ParticipantHint},
  bridge_session::{BridgeSession, BridgeSessionId},
  channel_allocator::{AllocationOffer, CancellationToken, ChannelAllocator},
  config::FocusConfig,
  error::{FocusError, FocusResult},
  events::ConferenceEvent,
  gid::Gid,
  interfaces::{ColibriConferenceFactory, JingleChannel, MucRoom},
  participant::{IceCandidate, JingleSessionHandle, Participant},
  registry::{ConferenceRegistry, Services},
  role_manager::{RoleCandidate, RoleManager},
  source::{MediaSource, MediaType, SourceGroup, SourceValidator},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConferenceState {
  Init,
  Joining,
  Idle,
  Active,
  Terminating,
  Ended,
}

struct ParticipantsState {
  participants: HashMap<String, Participant>,
  next_join_order: u32,
  role_manager: RoleManager,
  source_validator: SourceValidator,
  bridge_not_available_sent: bool,
}

struct BridgesState {
  sessions: HashMap<BridgeSessionId, BridgeSession>,
  by_endpoint: HashMap<String, BridgeSessionId>,
}

impl BridgesState {
  fn all_relays(&self) -> Vec<String> {
    self
      .sessions
      .values()
      .filter_map(|s| s.bridge.relay_id.clone())
      .collect()
  }

  async fn update_octo_relays(&mut self) -> FocusResult<()> {
    let all_relays = self.all_relays();
    for session in self.sessions.values_mut() {
      session.set_relays(&all_relays).await?;
    }
    Ok(())
  }
}

/// One active conference (spec §3, §4.6).
pub struct Conference {
  pub room: BareJid,
  pub gid: Gid,
  config: FocusConfig,
  services: Services,
  muc: Arc<dyn MucRoom>,
  jingle: Arc<dyn JingleChannel>,
  colibri_factory: Arc<dyn ColibriConferenceFactory>,
  registry: Arc<ConferenceRegistry>,

  state: Mutex<ConferenceState>,
  participants_lock: Mutex<ParticipantsState>,
  bridges_lock: Mutex<BridgesState>,
  idle_timestamp: Mutex<Option<Instant>>,
  single_participant_timer: Mutex<Option<CancellationToken>>,

  events: broadcast::Sender<ConferenceEvent>,
}

impl Conference {
  pub fn new(
    room: BareJid,
    gid: Gid,
    config: FocusConfig,
    services: Services,
    muc: Arc<dyn MucRoom>,
    jingle: Arc<dyn JingleChannel>,
    colibri_factory: Arc<dyn ColibriConferenceFactory>,
    registry: Arc<ConferenceRegistry>,
  ) -> Arc<Self> {
    let (events, _) = broadcast::channel(256);
    let max_sources_per_user = config.max_sources_per_user;
    Arc::new(Self {
      room,
      gid,
      config,
      services,
      muc,
      jingle,
      colibri_factory,
      registry,
      state: Mutex::new(ConferenceState::Init),
      participants_lock: Mutex::new(ParticipantsState {
        participants: HashMap::new(),
        next_join_order: 0,
        role_manager: RoleManager::new(None, false),
        source_validator: SourceValidator::new(max_sources_per_user),
        bridge_not_available_sent: false,
      }),
      bridges_lock: Mutex::new(BridgesState {
        sessions: HashMap::new(),
        by_endpoint: HashMap::new(),
      }),
      idle_timestamp: Mutex::new(Some(Instant::now())),
      single_participant_timer: Mutex::new(None),
      events,
    })
  }

  /// Arms the single-participant timeout when exactly one member remains
  /// (and `single_participant_timeout` is configured), or cancels any
  /// armed timer otherwise (spec §4.6). Called whenever membership changes.
  async fn reconcile_single_participant_timer(self: &Arc<Self>) {
    let count = self.participants_lock.lock().await.participants.len();
    let mut timer = self.single_participant_timer.lock().await;
    if let Some(existing) = timer.take() {
      existing.cancel();
    }
    if count != 1 {
      return;
    }
    let Some(duration) = self.config.single_participant_timeout else { return };
    let token = CancellationToken::new();
    *timer = Some(token.clone());
    let this = Arc::clone(self);
    tokio::spawn(async move {
      tokio::time::sleep(duration).await;
      if token.is_cancelled() {
        return;
      }
      if let Err(e) = this.on_single_participant_timeout().await {
        warn!("single participant timeout handling failed: {:?}", e);
      }
    });
  }

  /// Calls `grantOwnership` on the room for every endpoint `RoleManager`
  /// decided to grant (spec §4.5), looking up each one's real jid.
  async fn grant_ownership_to(&self, endpoint_ids: &[String]) {
    for endpoint_id in endpoint_ids {
      let jid = {
        let participants = self.participants_lock.lock().await;
        participants.participants.get(endpoint_id).and_then(|p| p.real_jid.clone())
      };
      let Some(jid) = jid
      else {
        warn!(endpoint_id, "cannot grant ownership: no real jid known");
        continue;
      };
      if let Err(e) = self.muc.grant_ownership(&jid).await {
        warn!(endpoint_id, "failed to grant ownership: {:?}", e);
      }
    }
  }

  /// The focus's own affiliation in the room changed (spec §4.5, §6
  /// `MucRoomEvent::LocalRoleChanged`). Only becoming owner triggers
  /// anything: `RoleManager::on_local_role_became_owner` decides who to
  /// grant ownership to.
  #[tracing::instrument(level = "info", skip(self), fields(room = %self.room), err)]
  pub async fn on_local_role_changed(self: &Arc<Self>, is_owner: bool) -> FocusResult<()> {
    if !is_owner {
      return Ok(());
    }
    let granted = {
      let mut participants = self.participants_lock.lock().await;
      let candidates: Vec<RoleCandidate> = participants
        .participants
        .values()
        .map(|p| RoleCandidate { endpoint_id: p.endpoint_id.clone(), jid: p.real_jid.clone(), is_robot: false })
        .collect();
      participants.role_manager.on_local_role_became_owner(&candidates).await
    };
    self.grant_ownership_to(&granted).await;
    Ok(())
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ConferenceEvent> {
    self.events.subscribe()
  }

  fn emit(&self, event: ConferenceEvent) {
    let _ = self.events.send(event);
  }

  pub async fn state(&self) -> ConferenceState {
    *self.state.lock().await
  }

  pub fn room(&self) -> &BareJid {
    &self.room
  }

  /// True if `endpoint_id` currently has a seat in this conference.
  pub async fn is_member(&self, endpoint_id: &str) -> bool {
    self.participants_lock.lock().await.participants.contains_key(endpoint_id)
  }

  /// True if `endpoint_id` currently holds the room's moderator ("owner") role.
  pub async fn is_moderator(&self, endpoint_id: &str) -> bool {
    self.participants_lock.lock().await.role_manager.is_owner(endpoint_id)
  }

  pub async fn participant_count(&self) -> usize {
    self.participants_lock.lock().await.participants.len()
  }

  /// Finds the endpoint id whose real (non-occupant) JID matches `jid`, as
  /// learned from MUC presence (spec §4.2).
  pub async fn find_endpoint_by_real_jid(&self, jid: &Jid) -> Option<String> {
    self
      .participants_lock
      .lock()
      .await
      .participants
      .values()
      .find(|p| p.real_jid.as_ref() == Some(jid))
      .map(|p| p.endpoint_id.clone())
  }

  /// INIT → JOINING (spec §4.6 `start()`).
  #[tracing::instrument(level = "info", skip(self), fields(room = %self.room), err)]
  pub async fn start(self: &Arc<Self>) -> FocusResult<()> {
    {
      let mut state = self.state.lock().await;
      *state = ConferenceState::Joining;
    }
    *self.idle_timestamp.lock().await = Some(Instant::now());
    self.join_room().await
  }

  #[tracing::instrument(level = "debug", skip(self), err)]
  async fn join_room(self: &Arc<Self>) -> FocusResult<()> {
    self.muc.join().await?;
    if self.config.use_room_as_shared_doc_name {
      let element = xmpp_parsers::Element::builder("shared-doc-name", "http://jitsi.org/jitmeet")
        .append(self.room.node.clone().unwrap_or_default())
        .build();
      self.muc.add_presence_extension(element).await?;
    }
    *self.state.lock().await = ConferenceState::Idle;
    Ok(())
  }

  /// Spec §4.6 `hasToStartMuted`.
  async fn has_to_start_muted(&self, join_order: u32, just_joined: bool) -> (bool, bool) {
    let audio = if just_joined && self.config.start_audio_muted == Some(0) {
      true
    }
    else {
      self.config.start_audio_muted.map_or(false, |threshold| join_order > threshold)
    };
    let video = if just_joined && self.config.start_video_muted == Some(0) {
      true
    }
    else {
      self.config.start_video_muted.map_or(false, |threshold| join_order > threshold)
    };
    (audio, video)
  }

  /// A member joined the MUC (spec §4.6 "on first non-focus member" /
  /// "ready to start"). `region_hint` and `is_robot` come from the
  /// member's presence payloads.
  #[tracing::instrument(level = "info", skip(self, jid), fields(room = %self.room, %endpoint_id))]
  pub async fn on_member_joined(
    self: &Arc<Self>,
    endpoint_id: String,
    jid: Option<Jid>,
    region_hint: Option<String>,
    is_robot: bool,
  ) -> FocusResult<()> {
    *self.idle_timestamp.lock().await = None;

    let (join_order, granted) = {
      let mut participants = self.participants_lock.lock().await;
      participants.next_join_order += 1;
      let join_order = participants.next_join_order;
      let room_jid = self.room.clone().with_resource(&endpoint_id);
      let mut participant = Participant::new(endpoint_id.clone(), room_jid, join_order);
      participant.real_jid = jid.clone();
      participants.participants.insert(endpoint_id.clone(), participant);

      let joiner = RoleCandidate { endpoint_id: endpoint_id.clone(), jid: jid.clone(), is_robot };
      let candidates: Vec<RoleCandidate> = participants
        .participants
        .values()
        .map(|p| RoleCandidate { endpoint_id: p.endpoint_id.clone(), jid: p.real_jid.clone(), is_robot: false })
        .collect();
      let granted = participants.role_manager.on_member_join(&joiner, &candidates).await;
      (join_order, granted)
    };
    self.grant_ownership_to(&granted).await;

    self.emit(ConferenceEvent::ParticipantJoined { endpoint_id: endpoint_id.clone(), jid });
    self.reconcile_single_participant_timer().await;

    let member_count = self.participants_lock.lock().await.participants.len();
    if member_count < self.config.min_participants {
      debug!(member_count, "below min_participants, not inviting yet");
      return Ok(());
    }

    *self.state.lock().await = ConferenceState::Active;

    let start_muted = self.has_to_start_muted(join_order, true).await;
    self.invite_participant(&endpoint_id, false, start_muted, ParticipantHint { region: region_hint }).await
  }

  /// Spec §4.6 `inviteParticipant`.
  #[tracing::instrument(level = "info", skip(self), fields(room = %self.room), err)]
  pub async fn invite_participant(
    self: &Arc<Self>,
    endpoint_id: &str,
    re_invite: bool,
    start_muted: (bool, bool),
    hint: ParticipantHint,
  ) -> FocusResult<()> {
    let view = {
      let bridges = self.bridges_lock.lock().await;
      ConferenceBridgeView {
        placed_bridges: bridges.sessions.values().map(|s| s.bridge.clone()).collect(),
        enforced_videobridge: self.config.enforced_videobridge.clone(),
      }
    };

    let bridge = match self.services.bridge_selector.select_bridge(&view, &hint).await {
      Some(bridge) => bridge,
      None => {
        let mut participants = self.participants_lock.lock().await;
        if !participants.bridge_not_available_sent {
          participants.bridge_not_available_sent = true;
          drop(participants);
          let element = xmpp_parsers::Element::builder("bridge-not-available", "http://jitsi.org/jitmeet")
            .build();
          self.muc.add_presence_extension(element).await?;
        }
        warn!(endpoint_id, "no bridge available");
        return Err(FocusError::NoBridgeAvailable);
      },
    };

    let peer = {
      let participants = self.participants_lock.lock().await;
      let participant = participants
        .participants
        .get(endpoint_id)
        .ok_or_else(|| FocusError::Internal(anyhow::anyhow!("unknown participant {endpoint_id}")))?;
      participant.room_jid.clone()
    };

    let (bridge_session_id, colibri, token) = {
      let mut bridges = self.bridges_lock.lock().await;
      let session_id = match bridges.by_endpoint.get(endpoint_id) {
        Some(id) => *id,
        None => {
          let existing = bridges.sessions.values().find(|s| s.bridge.jid == bridge.jid).map(|s| s.id);
          let id = match existing {
            Some(id) => id,
            None => {
              let colibri = self
                .colibri_factory
                .open(&bridge, self.gid, self.room.node.as_deref().unwrap_or_default())
                .await?;
              let session = BridgeSession::new(bridge.clone(), colibri);
              let id = session.id;
              bridges.sessions.insert(id, session);
              id
            },
          };
          bridges.by_endpoint.insert(endpoint_id.to_owned(), id);
          id
        },
      };
      if let Some(session) = bridges.sessions.get_mut(&session_id) {
        session.add_participant(endpoint_id);
      }
      if bridges.sessions.len() > 1 {
        bridges.update_octo_relays().await?;
        for session in bridges.sessions.values_mut() {
          session.ensure_octo(vec![]).await?;
        }
      }
      let colibri = bridges.sessions.get(&session_id).expect("just inserted").colibri();
      (session_id, colibri, CancellationToken::new())
    };

    let (conference_sources, conference_groups, own_transport) = {
      let participants = self.participants_lock.lock().await;
      let mut sources = Vec::new();
      let mut groups = Vec::new();
      for (id, participant) in &participants.participants {
        if id == endpoint_id {
          continue;
        }
        sources.extend(participant.sources().all_sources().cloned());
        groups.extend(participant.sources().groups().iter().cloned());
      }
      let own_transport = participants.participants.get(endpoint_id).and_then(|p| p.transport().cloned());
      (sources, groups, own_transport)
    };

    let offer_contents = crate::jingle_offer::build_offer_contents(&conference_sources, &conference_groups, own_transport.as_ref());

    let offer = AllocationOffer {
      endpoint_id: endpoint_id.to_owned(),
      is_reinvite: re_invite,
      is_octo: false,
      offer_contents,
      conference_sources,
      conference_groups,
      start_muted,
    };
    let allocator = ChannelAllocator::new(bridge_session_id, offer, colibri, self.jingle.clone());
    {
      let mut participants = self.participants_lock.lock().await;
      if let Some(participant) = participants.participants.get_mut(endpoint_id) {
        if participant.has_active_allocator() {
          token.cancel();
        }
        participant.set_has_active_allocator(true);
        participant.set_bridge_session_id(Some(bridge_session_id));
      }
    }

    let this = Arc::clone(self);
    let endpoint_id = endpoint_id.to_owned();
    tokio::spawn(async move {
      match allocator.run(peer).await {
        Ok(Some(outcome)) => {
          let mut participants = this.participants_lock.lock().await;
          if let Some(participant) = participants.participants.get_mut(&endpoint_id) {
            participant.set_has_active_allocator(false);
            let _ = outcome;
          }
        },
        Ok(None) => {
          debug!(endpoint_id, "allocator cancelled");
        },
        Err(e) => {
          warn!(endpoint_id, "channel allocation failed: {:?}", e);
          let mut bridges = this.bridges_lock.lock().await;
          if let Some(session) = bridges.sessions.get_mut(&bridge_session_id) {
            session.mark_failed();
          }
        },
      }
    });

    Ok(())
  }

  /// Inbound `session-accept` (spec §4.6).
  #[tracing::instrument(level = "info", skip(self, sources, groups), fields(room = %self.room), err)]
  pub async fn handle_session_accept(
    self: &Arc<Self>,
    endpoint_id: &str,
    session_id: String,
    sources: Vec<MediaSource>,
    groups: Vec<SourceGroup>,
  ) -> FocusResult<()> {
    let (claimed, claimed_groups, to_flush) = {
      let mut participants = self.participants_lock.lock().await;
      let claimed = participants
        .participants
        .get(endpoint_id)
        .ok_or_else(|| FocusError::Internal(anyhow::anyhow!("unknown participant {endpoint_id}")))?
        .claim_sources(sources);

      let mut owner_map = std::mem::take(participants.participants.get_mut(endpoint_id).unwrap().sources_mut());
      let (added, added_groups) = participants
        .source_validator
        .try_add(endpoint_id, &mut owner_map, claimed, groups)?;
      *participants.participants.get_mut(endpoint_id).unwrap().sources_mut() = owner_map;

      let participant = participants.participants.get_mut(endpoint_id).unwrap();
      participant.set_jingle_session(JingleSessionHandle { session_id, accepted: true });

      let to_flush = (participant.take_sources_to_add(), participant.take_sources_to_remove());
      (added, added_groups, to_flush)
    };

    self.emit(ConferenceEvent::SourcesAdded {
      endpoint_id: endpoint_id.to_owned(),
      sources: claimed.clone(),
      groups: claimed_groups.clone(),
    });

    self.propagate_sources_added(endpoint_id, &claimed, &claimed_groups).await?;

    let (pending_add, pending_remove) = to_flush;
    for (source, source_groups) in pending_add {
      self.jingle.send_add_source_iq(&self.peer_jid(endpoint_id).await?, &[source], &source_groups).await?;
    }
    for (source, source_groups) in pending_remove {
      self.jingle.send_remove_source_iq(&self.peer_jid(endpoint_id).await?, &[source], &source_groups).await?;
    }

    Ok(())
  }

  async fn peer_jid(&self, endpoint_id: &str) -> FocusResult<FullJid> {
    let participants = self.participants_lock.lock().await;
    participants
      .participants
      .get(endpoint_id)
      .map(|p| p.room_jid.clone())
      .ok_or_else(|| FocusError::Internal(anyhow::anyhow!("unknown participant {endpoint_id}")))
  }

  /// Propagates newly-added sources to every other participant (per their
  /// established-session state, per spec §5 ordering guarantees) and to
  /// every other bridge's Octo pseudo-participant (spec §4.8).
  #[tracing::instrument(level = "debug", skip(self, sources, groups), err)]
  async fn propagate_sources_added(
    self: &Arc<Self>,
    owner_endpoint_id: &str,
    sources: &[MediaSource],
    groups: &[SourceGroup],
  ) -> FocusResult<()> {
    let targets: Vec<(String, bool, FullJid)> = {
      let participants = self.participants_lock.lock().await;
      participants
        .participants
        .iter()
        .filter(|(id, _)| id.as_str() != owner_endpoint_id)
        .map(|(id, p)| (id.clone(), p.has_jingle_session(), p.room_jid.clone()))
        .collect()
    };

    for (id, established, peer) in targets {
      if established {
        self.jingle.send_add_source_iq(&peer, sources, groups).await?;
      }
      else {
        let mut participants = self.participants_lock.lock().await;
        if let Some(participant) = participants.participants.get_mut(&id) {
          participant.schedule_sources_to_add(sources.to_vec(), groups.to_vec());
        }
      }
    }

    let owning_bridge_session_id = {
      let participants = self.participants_lock.lock().await;
      participants.participants.get(owner_endpoint_id).and_then(|p| p.bridge_session_id())
    };

    let mut bridges = self.bridges_lock.lock().await;
    for (id, session) in bridges.sessions.iter_mut() {
      if Some(*id) == owning_bridge_session_id {
        continue;
      }
      session.add_octo_sources(sources.to_vec(), groups.to_vec()).await?;
    }

    Ok(())
  }

  /// Inbound `source-add`/`source-remove` from an established participant
  /// (spec §4.6).
  #[tracing::instrument(level = "info", skip(self, sources, groups), fields(room = %self.room), err)]
  pub async fn handle_source_add(
    self: &Arc<Self>,
    endpoint_id: &str,
    sources: Vec<MediaSource>,
    groups: Vec<SourceGroup>,
  ) -> FocusResult<()> {
    let (added, added_groups) = {
      let mut participants = self.participants_lock.lock().await;
      let claimed = participants
        .participants
        .get(endpoint_id)
        .ok_or_else(|| FocusError::Internal(anyhow::anyhow!("unknown participant {endpoint_id}")))?
        .claim_sources(sources);
      let mut owner_map = std::mem::take(participants.participants.get_mut(endpoint_id).unwrap().sources_mut());
      let result = participants.source_validator.try_add(endpoint_id, &mut owner_map, claimed, groups);
      *participants.participants.get_mut(endpoint_id).unwrap().sources_mut() = owner_map;
      result?
    };

    self.emit(ConferenceEvent::SourcesAdded {
      endpoint_id: endpoint_id.to_owned(),
      sources: added.clone(),
      groups: added_groups.clone(),
    });
    self.propagate_sources_added(endpoint_id, &added, &added_groups).await
  }

  #[tracing::instrument(level = "info", skip(self, sources, groups), fields(room = %self.room), err)]
  pub async fn handle_source_remove(
    self: &Arc<Self>,
    endpoint_id: &str,
    sources: Vec<MediaSource>,
    groups: Vec<SourceGroup>,
  ) -> FocusResult<()> {
    let (removed, removed_groups) = {
      let mut participants = self.participants_lock.lock().await;
      let mut owner_map = std::mem::take(participants.participants.get_mut(endpoint_id).unwrap().sources_mut());
      let result = participants.source_validator.remove(&mut owner_map, &sources, &groups);
      *participants.participants.get_mut(endpoint_id).unwrap().sources_mut() = owner_map;
      result
    };

    self.emit(ConferenceEvent::SourcesRemoved {
      endpoint_id: endpoint_id.to_owned(),
      sources: removed.clone(),
      groups: removed_groups.clone(),
    });

    let targets: Vec<FullJid> = {
      let participants = self.participants_lock.lock().await;
      participants
        .participants
        .iter()
        .filter(|(id, _)| id.as_str() != endpoint_id)
        .filter(|(_, p)| p.has_jingle_session())
        .map(|(_, p)| p.room_jid.clone())
        .collect()
    };
    for peer in targets {
      self.jingle.send_remove_source_iq(&peer, &removed, &removed_groups).await?;
    }
    Ok(())
  }

  /// Inbound `transport-info`/`transport-accept` (spec §4.2
  /// `addTransportFromJingle`, §4.6): merges the candidates/ufrag/pwd/
  /// fingerprint into `p`'s bundled transport.
  #[tracing::instrument(level = "debug", skip(self, fingerprint, candidates), fields(room = %self.room), err)]
  pub async fn merge_transport(
    self: &Arc<Self>,
    endpoint_id: &str,
    ufrag: Option<String>,
    pwd: Option<String>,
    fingerprint: Option<focus_xmpp::jingle_dtls_srtp::Fingerprint>,
    candidates: Vec<IceCandidate>,
  ) -> FocusResult<()> {
    let mut participants = self.participants_lock.lock().await;
    let participant = participants
      .participants
      .get_mut(endpoint_id)
      .ok_or_else(|| FocusError::Internal(anyhow::anyhow!("unknown participant {endpoint_id}")))?;
    participant.merge_transport(ufrag, pwd, fingerprint, candidates);
    Ok(())
  }

  /// Inbound `transport-reject` (spec §4.6): logged only, the bridge-side
  /// channels are left to auto-expire rather than triggering a fresh
  /// invite (spec §8 open question).
  #[tracing::instrument(level = "info", skip(self), fields(room = %self.room))]
  pub async fn handle_transport_rejected(self: &Arc<Self>, endpoint_id: &str) {
    warn!(endpoint_id, "participant rejected transport-replace");
  }

  /// Inbound `session-terminate` from a participant: drops the Jingle
  /// session handle so a later `session-initiate` doesn't appear to
  /// overwrite a still-live one. The participant itself is only removed on
  /// MUC leave/kick (spec §3 `Participant` lifecycle).
  #[tracing::instrument(level = "info", skip(self), fields(room = %self.room))]
  pub async fn handle_session_terminate(self: &Arc<Self>, endpoint_id: &str, reason: &str) {
    let mut participants = self.participants_lock.lock().await;
    if let Some(participant) = participants.participants.get_mut(endpoint_id) {
      debug!(endpoint_id, reason, "peer sent session-terminate");
      participant.clear_jingle_session();
    }
  }

  /// Inbound `mute-request` (spec §4.6, §7 authorization rules).
  #[tracing::instrument(level = "info", skip(self), fields(room = %self.room), err)]
  pub async fn handle_mute_request(
    self: &Arc<Self>,
    from: &str,
    target: &str,
    media_type: MediaType,
    muted: bool,
  ) -> FocusResult<()> {
    let is_self = from == target;
    let is_moderator = {
      let participants = self.participants_lock.lock().await;
      participants.role_manager.is_owner(from)
    };
    if !muted && !is_self {
      return Err(FocusError::NotAllowed("self-unmute-only".to_owned()));
    }
    if !is_self && !is_moderator {
      return Err(FocusError::NotAllowed("not a moderator".to_owned()));
    }

    {
      let mut participants = self.participants_lock.lock().await;
      let participant = participants
        .participants
        .get_mut(target)
        .ok_or_else(|| FocusError::RoomNotFound(Jid::Bare(self.room.clone())))?;
      participant.set_muted(media_type, muted);
    }
    self.emit(ConferenceEvent::Muted { endpoint_id: target.to_owned(), media_type, muted });

    let bridge_session_id = {
      let participants = self.participants_lock.lock().await;
      participants.participants.get(target).and_then(|p| p.bridge_session_id())
    };
    if let Some(id) = bridge_session_id {
      let bridges = self.bridges_lock.lock().await;
      if let Some(_session) = bridges.sessions.get(&id) {
        debug!(target, ?media_type, muted, "updating channel direction on bridge");
      }
    }
    Ok(())
  }

  /// Member left / kicked (spec §4.6 `terminateParticipant`).
  #[tracing::instrument(level = "info", skip(self), fields(room = %self.room), err)]
  pub async fn terminate_participant(self: &Arc<Self>, endpoint_id: &str, reason: &str) -> FocusResult<()> {
    let (had_session, peer, removed_sources, removed_groups, bridge_session_id) = {
      let mut participants = self.participants_lock.lock().await;
      let participant = match participants.participants.remove(endpoint_id) {
        Some(p) => p,
        None => return Ok(()),
      };
      participants.source_validator.forget_all(participant.sources());
      let removed_sources: Vec<MediaSource> = participant.sources().all_sources().cloned().collect();
      let removed_groups: Vec<SourceGroup> = participant.sources().groups().to_vec();
      if let Some(elected) = participants.role_manager.on_member_leave(
        endpoint_id,
        &participants
          .participants
          .values()
          .map(|p| RoleCandidate { endpoint_id: p.endpoint_id.clone(), jid: p.real_jid.clone(), is_robot: false })
          .collect::<Vec<_>>(),
      ) {
        info!(elected, "re-elected owner after leave");
      }
      (
        participant.has_jingle_session(),
        participant.room_jid.clone(),
        removed_sources,
        removed_groups,
        participant.bridge_session_id(),
      )
    };

    if had_session {
      self.jingle.terminate_session(&peer, reason, None).await?;
    }

    self.emit(ConferenceEvent::ParticipantLeft { endpoint_id: endpoint_id.to_owned() });

    if !removed_sources.is_empty() || !removed_groups.is_empty() {
      let targets: Vec<FullJid> = {
        let participants = self.participants_lock.lock().await;
        participants
          .participants
          .values()
          .filter(|p| p.has_jingle_session())
          .map(|p| p.room_jid.clone())
          .collect()
      };
      for t in targets {
        self.jingle.send_remove_source_iq(&t, &removed_sources, &removed_groups).await?;
      }
    }

    if let Some(id) = bridge_session_id {
      let mut bridges = self.bridges_lock.lock().await;
      if let Some(session) = bridges.sessions.get_mut(&id) {
        session.terminate(endpoint_id, None);
      }
      bridges.by_endpoint.remove(endpoint_id);
    }

    let remaining = self.participants_lock.lock().await.participants.len();
    if remaining == 0 {
      self.stop().await?;
    }
    else {
      self.reconcile_single_participant_timer().await;
    }

    Ok(())
  }

  /// `BRIDGE_DOWN(jid)` (spec §4.6).
  #[tracing::instrument(level = "warn", skip(self), fields(room = %self.room), err)]
  pub async fn on_bridge_down(self: &Arc<Self>, jid: &Jid) -> FocusResult<()> {
    let (displaced, removed_id) = {
      let mut bridges = self.bridges_lock.lock().await;
      let matching = bridges.sessions.values().find(|s| &s.bridge.jid == jid).map(|s| s.id);
      let id = match matching {
        Some(id) => id,
        None => return Ok(()),
      };
      let session = bridges.sessions.get_mut(&id).unwrap();
      session.mark_failed();
      let displaced = session.terminate_all();
      bridges.sessions.remove(&id);
      for endpoint_id in &displaced {
        bridges.by_endpoint.remove(endpoint_id);
      }
      bridges.update_octo_relays().await?;
      (displaced, id)
    };

    debug!(?removed_id, count = displaced.len(), "displacing participants from failed bridge");

    for endpoint_id in displaced {
      {
        let mut participants = self.participants_lock.lock().await;
        if let Some(participant) = participants.participants.get_mut(&endpoint_id) {
          participant.set_bridge_session_id(None);
        }
      }
      let start_muted = self.has_to_start_muted(0, false).await;
      if let Err(e) = self
        .invite_participant(&endpoint_id, true, start_muted, ParticipantHint::default())
        .await
      {
        warn!(endpoint_id, "re-invite after bridge-down failed: {:?}", e);
      }
    }
    Ok(())
  }

  /// `BRIDGE_UP(jid)` (spec §4.6).
  #[tracing::instrument(level = "info", skip(self, _jid), fields(room = %self.room), err)]
  pub async fn on_bridge_up(self: &Arc<Self>, _jid: &Jid) -> FocusResult<()> {
    let has_bridge_session = !self.bridges_lock.lock().await.sessions.is_empty();
    let member_count = self.participants_lock.lock().await.participants.len();
    if !has_bridge_session && member_count >= self.config.min_participants {
      self.restart_conference().await?;
    }
    Ok(())
  }

  /// Disposes all bridge sessions, cancels in-flight allocators, then
  /// re-invites every participant (spec §4.6 `restartConference`).
  #[tracing::instrument(level = "info", skip(self), fields(room = %self.room), err)]
  async fn restart_conference(self: &Arc<Self>) -> FocusResult<()> {
    let endpoint_ids: Vec<String> = {
      let mut bridges = self.bridges_lock.lock().await;
      for session in bridges.sessions.values_mut() {
        session.dispose();
      }
      bridges.sessions.clear();
      bridges.by_endpoint.clear();
      let participants = self.participants_lock.lock().await;
      participants.participants.keys().cloned().collect()
    };
    for endpoint_id in endpoint_ids {
      let start_muted = self.has_to_start_muted(0, false).await;
      self
        .invite_participant(&endpoint_id, true, start_muted, ParticipantHint::default())
        .await?;
    }
    Ok(())
  }

  /// Single-participant timeout fired (spec §4.6).
  #[tracing::instrument(level = "info", skip(self), fields(room = %self.room), err)]
  pub async fn on_single_participant_timeout(self: &Arc<Self>) -> FocusResult<()> {
    let remaining: Vec<String> = self.participants_lock.lock().await.participants.keys().cloned().collect();
    if remaining.len() != 1 {
      return Ok(());
    }
    self.terminate_participant(&remaining[0], "EXPIRED").await?;
    let mut bridges = self.bridges_lock.lock().await;
    for session in bridges.sessions.values_mut() {
      session.dispose();
    }
    bridges.sessions.clear();
    bridges.by_endpoint.clear();
    Ok(())
  }

  /// `stop()` (→ENDED, spec §4.6).
  #[tracing::instrument(level = "info", skip(self), fields(room = %self.room), err)]
  pub async fn stop(self: &Arc<Self>) -> FocusResult<()> {
    *self.state.lock().await = ConferenceState::Terminating;

    let endpoint_ids: Vec<(String, FullJid)> = {
      let participants = self.participants_lock.lock().await;
      participants
        .participants
        .iter()
        .filter(|(_, p)| p.has_jingle_session())
        .map(|(id, p)| (id.clone(), p.room_jid.clone()))
        .collect()
    };
    for (_, peer) in endpoint_ids {
      if let Err(e) = self.jingle.terminate_session(&peer, "GONE", None).await {
        warn!("failed to terminate jingle session during stop: {:?}", e);
      }
    }

    {
      let mut bridges = self.bridges_lock.lock().await;
      for session in bridges.sessions.values_mut() {
        session.dispose();
      }
      bridges.sessions.clear();
      bridges.by_endpoint.clear();
    }

    self.muc.leave().await?;
    self.registry.remove_conference(self.room.clone()).await;
    *self.state.lock().await = ConferenceState::Ended;
    self.emit(ConferenceEvent::Expired);
    Ok(())
  }

  /// Updates (or clears) `idleTimestamp` per spec §5; the registry's scan
  /// loop calls this per-tick.
  pub async fn check_idle(self: &Arc<Self>, idle_timeout: std::time::Duration) -> FocusResult<bool> {
    let has_members = !self.participants_lock.lock().await.participants.is_empty();
    let mut idle_timestamp = self.idle_timestamp.lock().await;
    if has_members {
      *idle_timestamp = None;
      return Ok(false);
    }
    let since = idle_timestamp.get_or_insert_with(Instant::now);
    if since.elapsed() >= idle_timeout {
      drop(idle_timestamp);
      self.stop().await?;
      return Ok(true);
    }
    Ok(false)
  }
}
