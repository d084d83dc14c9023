//! ConferenceRegistry (spec §3 "ConferenceRegistry state", §5, §9
//! "Global singletons").
//!
//! `Services` replaces the teacher's implicit module-level globals
//! (`glib_main_context`, process-wide config) with an explicit value
//! threaded through construction, per spec §9.

use std::{collections::HashMap, sync::Arc, time::Duration};

use jid::BareJid;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::{
  bridge::BridgeSelector,
  config::FocusConfig,
  events::RegistryEvent,
  gateway::GatewaySelector,
  gid::{Gid, GidAllocator},
  interfaces::AuthenticationAuthority,
};

const SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Process-wide collaborators, passed by value to every conference the
/// registry creates (spec §9: replaces global singletons with an explicit
/// `Services` value).
#[derive(Clone)]
pub struct Services {
  pub bridge_selector: Arc<dyn BridgeSelector>,
  pub gateway_selector: Option<Arc<dyn GatewaySelector>>,
  pub auth: Option<Arc<dyn AuthenticationAuthority>>,
  pub config: FocusConfig,
}

struct RegistryInner {
  rooms: HashMap<BareJid, Gid>,
  gids: GidAllocator,
  graceful_shutdown: bool,
}

/// Tracks the set of live conferences by room and GID (spec §3). The
/// actual per-conference state lives in [`crate::conference::Conference`];
/// this type only owns the room→GID mapping, GID allocation, and the
/// idle-expiration timer loop (spec §5).
pub struct ConferenceRegistry {
  inner: Mutex<RegistryInner>,
  events: broadcast::Sender<RegistryEvent>,
  services: Services,
}

impl ConferenceRegistry {
  pub fn new(services: Services) -> Arc<Self> {
    let (events, _) = broadcast::channel(64);
    Arc::new(Self {
      inner: Mutex::new(RegistryInner {
        rooms: HashMap::new(),
        gids: GidAllocator::new(services.config.jicofo_short_id),
        graceful_shutdown: false,
      }),
      events,
      services,
    })
  }

  pub fn services(&self) -> &Services {
    &self.services
  }

  pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
    self.events.subscribe()
  }

  /// Registers a newly-created conference, allocating it a fresh GID.
  /// Returns `None` if graceful shutdown has been enabled (spec §5:
  /// "blocks new conferences").
  #[tracing::instrument(level = "debug", skip(self))]
  pub async fn create_conference(&self, room: BareJid) -> Option<Gid> {
    let mut inner = self.inner.lock().await;
    if inner.graceful_shutdown {
      warn!(%room, "refusing to create conference: graceful shutdown in progress");
      return None;
    }
    let gid = inner.gids.allocate();
    inner.rooms.insert(room.clone(), gid);
    let _ = self.events.send(RegistryEvent::ConferenceCreated { gid, room });
    Some(gid)
  }

  /// Unregisters a conference that has reached `ENDED` (spec §4.6
  /// `stop()`: "notify the registry"). If this was the last conference
  /// and graceful shutdown is in progress, the caller should now exit the
  /// process.
  #[tracing::instrument(level = "debug", skip(self))]
  pub async fn remove_conference(&self, room: BareJid) -> bool {
    let mut inner = self.inner.lock().await;
    if let Some(gid) = inner.rooms.remove(&room) {
      inner.gids.release(gid);
      let _ = self.events.send(RegistryEvent::ConferenceExpired { gid, room });
      inner.graceful_shutdown && inner.rooms.is_empty()
    }
    else {
      false
    }
  }

  pub async fn gid_for(&self, room: &BareJid) -> Option<Gid> {
    self.inner.lock().await.rooms.get(room).copied()
  }

  /// Spec §8 invariant: `conferenceGids` equals `{c.id : c in registry}`.
  pub async fn conference_gids(&self) -> Vec<Gid> {
    self.inner.lock().await.rooms.values().copied().collect()
  }

  pub async fn enable_graceful_shutdown(&self) {
    info!("graceful shutdown enabled; new conferences will be refused");
    self.inner.lock().await.graceful_shutdown = true;
  }

  pub async fn is_empty(&self) -> bool {
    self.inner.lock().await.rooms.is_empty()
  }

  /// False once `enable_graceful_shutdown` has been called (spec §6
  /// health-check IQ: "answered with an empty result when the process can
  /// still accept conferences").
  pub async fn is_accepting_conferences(&self) -> bool {
    !self.inner.lock().await.graceful_shutdown
  }

  /// The shared idle-expiration loop (spec §5): every 5 s, invoke
  /// `on_tick` for each live room so the caller's per-conference idle
  /// timestamps can be checked against `idleTimeoutMs`.
  pub async fn run_idle_scan_loop(self: Arc<Self>, mut on_tick: impl FnMut(BareJid) + Send + 'static) {
    let mut interval = tokio::time::interval(SCAN_INTERVAL);
    loop {
      interval.tick().await;
      let rooms: Vec<BareJid> = self.inner.lock().await.rooms.keys().cloned().collect();
      for room in rooms {
        on_tick(room);
      }
    }
  }
}
