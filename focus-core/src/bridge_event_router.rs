//! BridgeEventRouter (spec §2, §4.6 `onBridgeUp`/`onBridgeDown`).
//!
//! `BridgeSelector` emits `BRIDGE_UP(jid)`/`BRIDGE_DOWN(jid)` process-wide
//! (spec §6); this router fans each event out to every conference that
//! currently has (or, for `BRIDGE_UP`, might want) a session on that
//! bridge, replacing the teacher's single-conference callback wiring with
//! an explicit multi-conference broadcast per spec §9's "collapse
//! listeners into typed events" note.

use std::sync::{Arc, Weak};

use jid::Jid;
use tokio::sync::Mutex;
use tracing::warn;

use crate::conference::Conference;

/// A bridge health transition (spec §6).
#[derive(Debug, Clone)]
pub enum BridgeHealthEvent {
  Up(Jid),
  Down(Jid),
}

/// Routes [`BridgeHealthEvent`]s to every registered conference. Holds
/// only weak handles so a conference reaching `ENDED` and being dropped
/// by the registry does not keep this router from cleaning it up.
#[derive(Default)]
pub struct BridgeEventRouter {
  conferences: Mutex<Vec<Weak<Conference>>>,
}

impl BridgeEventRouter {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub async fn register(&self, conference: &Arc<Conference>) {
    self.conferences.lock().await.push(Arc::downgrade(conference));
  }

  #[tracing::instrument(level = "debug", skip(self))]
  pub async fn dispatch(&self, event: BridgeHealthEvent) {
    let mut conferences = self.conferences.lock().await;
    conferences.retain(|weak| weak.strong_count() > 0);
    for weak in conferences.iter() {
      if let Some(conference) = weak.upgrade() {
        let event = event.clone();
        tokio::spawn(async move {
          let result = match event {
            BridgeHealthEvent::Up(jid) => conference.on_bridge_up(&jid).await,
            BridgeHealthEvent::Down(jid) => conference.on_bridge_down(&jid).await,
          };
          if let Err(e) = result {
            warn!("bridge event handler failed: {:?}", e);
          }
        });
      }
    }
  }
}
