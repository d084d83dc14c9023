//! Bridge handle and selection (spec §4.7, §6 `BridgeSelector`).

use async_trait::async_trait;
use jid::Jid;

/// Opaque identifier for a videobridge, stable for the lifetime of the
/// process's view of it. The videobridge's own JID is the natural choice
/// but callers are free to intern however their `BridgeSelector` does.
pub type BridgeId = Jid;

/// A known videobridge (spec §6 `Bridge`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bridge {
  pub jid: Jid,
  pub relay_id: Option<String>,
  pub region: Option<String>,
}

/// A hint about the participant being placed, used to bias bridge
/// selection towards the same region (spec §4.7 rule 2).
#[derive(Debug, Clone, Default)]
pub struct ParticipantHint {
  pub region: Option<String>,
}

/// A read-only view of the conference's current bridge placement, passed
/// into [`BridgeSelector::select_bridge`] so the selector can prefer a
/// region already present in the conference (spec §4.7 rule 2).
#[derive(Debug, Clone, Default)]
pub struct ConferenceBridgeView {
  pub placed_bridges: Vec<Bridge>,
  pub enforced_videobridge: Option<Jid>,
}

/// External collaborator (spec §6): tracks bridge health and picks a
/// placement. Concrete implementations live outside `focus-core` and are
/// supplied by the process wiring the conference up.
#[async_trait]
pub trait BridgeSelector: Send + Sync {
  /// Implements spec §4.7's three-step policy. Returns `None` to signal
  /// `NO_BRIDGE_AVAILABLE`.
  async fn select_bridge(
    &self,
    view: &ConferenceBridgeView,
    hint: &ParticipantHint,
  ) -> Option<Bridge>;

  async fn get_bridge(&self, jid: &Jid) -> Option<Bridge>;

  async fn update_bridge_operational_status(&self, jid: &Jid, alive: bool);
}

/// Picks the standard spec §4.7 policy given an in-process list of known
/// bridges with simple load counters — a reference implementation that a
/// full deployment would replace with a real health-tracking selector.
#[derive(Debug, Default)]
pub struct StaticBridgeSelector {
  pub bridges: Vec<(Bridge, u32)>,
}

impl StaticBridgeSelector {
  pub fn new(bridges: Vec<(Bridge, u32)>) -> Self {
    Self { bridges }
  }

  fn pick(&self, view: &ConferenceBridgeView, hint: &ParticipantHint) -> Option<Bridge> {
    if let Some(enforced) = &view.enforced_videobridge {
      if let Some((bridge, _)) = self.bridges.iter().find(|(b, _)| &b.jid == enforced) {
        return Some(bridge.clone());
      }
    }

    if let Some(region) = &hint.region {
      if let Some((bridge, _)) = self
        .bridges
        .iter()
        .find(|(b, _)| b.region.as_deref() == Some(region.as_str()))
      {
        return Some(bridge.clone());
      }
    }

    let conference_regions: Vec<&str> = view
      .placed_bridges
      .iter()
      .filter_map(|b| b.region.as_deref())
      .collect();
    if let Some((bridge, _)) = self
      .bridges
      .iter()
      .find(|(b, _)| b.region.as_deref().map_or(false, |r| conference_regions.contains(&r)))
    {
      return Some(bridge.clone());
    }

    self
      .bridges
      .iter()
      .min_by_key(|(_, load)| *load)
      .map(|(bridge, _)| bridge.clone())
  }
}

#[async_trait]
impl BridgeSelector for StaticBridgeSelector {
  async fn select_bridge(&self, view: &ConferenceBridgeView, hint: &ParticipantHint) -> Option<Bridge> {
    self.pick(view, hint)
  }

  async fn get_bridge(&self, jid: &Jid) -> Option<Bridge> {
    self.bridges.iter().find(|(b, _)| &b.jid == jid).map(|(b, _)| b.clone())
  }

  async fn update_bridge_operational_status(&self, _jid: &Jid, _alive: bool) {}
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bridge(name: &str, region: &str) -> Bridge {
    Bridge {
      jid: format!("{name}.example").parse().unwrap(),
      relay_id: Some(name.to_owned()),
      region: Some(region.to_owned()),
    }
  }

  #[tokio::test]
  async fn enforced_bridge_wins_when_known() {
    let selector = StaticBridgeSelector::new(vec![(bridge("jvb1", "eu"), 0), (bridge("jvb2", "us"), 0)]);
    let view = ConferenceBridgeView {
      placed_bridges: vec![],
      enforced_videobridge: Some("jvb2.example".parse().unwrap()),
    };
    let selected = selector.select_bridge(&view, &ParticipantHint::default()).await.unwrap();
    assert_eq!(selected.jid.to_string(), "jvb2.example");
  }

  #[tokio::test]
  async fn falls_back_to_least_loaded_when_no_region_match() {
    let selector = StaticBridgeSelector::new(vec![(bridge("jvb1", "eu"), 5), (bridge("jvb2", "us"), 1)]);
    let view = ConferenceBridgeView::default();
    let selected = selector
      .select_bridge(&view, &ParticipantHint { region: Some("ap".to_owned()) })
      .await
      .unwrap();
    assert_eq!(selected.jid.to_string(), "jvb2.example");
  }
}
