//! Configuration surface (spec §6).

use std::time::Duration;

use jid::Jid;
use serde::Deserialize;

fn default_idle_timeout_ms() -> u64 {
  15_000
}

fn default_min_participants() -> u32 {
  2
}

fn default_max_sources_per_user() -> usize {
  20
}

/// Per-process configuration, loaded by the `focus` binary and passed by
/// value into every [`crate::conference::Conference`] it creates. A
/// per-room `startMuted` override conveyed via presence (spec §6) overrides
/// `start_audio_muted`/`start_video_muted` for that room only and is
/// applied by the caller before `Conference::new`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
  #[serde(with = "duration_millis", default = "default_idle_timeout_ms_duration")]
  pub idle_timeout: Duration,

  pub single_participant_timeout: Option<Duration>,

  #[serde(default = "default_min_participants")]
  pub min_participants: u32,

  #[serde(default = "default_max_sources_per_user")]
  pub max_sources_per_user: usize,

  pub start_audio_muted: Option<u32>,
  pub start_video_muted: Option<u32>,

  #[serde(default)]
  pub enable_auto_owner: bool,

  #[serde(default)]
  pub use_room_as_shared_doc_name: bool,

  pub enforced_videobridge: Option<Jid>,

  #[serde(default)]
  pub lip_sync_enabled: bool,

  #[serde(default)]
  pub jicofo_short_id: u16,
}

fn default_idle_timeout_ms_duration() -> Duration {
  Duration::from_millis(default_idle_timeout_ms())
}

impl Default for FocusConfig {
  fn default() -> Self {
    Self {
      idle_timeout: default_idle_timeout_ms_duration(),
      single_participant_timeout: None,
      min_participants: default_min_participants(),
      max_sources_per_user: default_max_sources_per_user(),
      start_audio_muted: None,
      start_video_muted: None,
      enable_auto_owner: true,
      use_room_as_shared_doc_name: false,
      enforced_videobridge: None,
      lip_sync_enabled: false,
      jicofo_short_id: 0,
    }
  }
}

mod duration_millis {
  use std::time::Duration;

  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(deserializer)?))
  }
}
