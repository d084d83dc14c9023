//! Gateway selection for the `dial` IQ surface (spec §6, §9): forwarding a
//! dial-out request to a SIP or recording gateway component is the same
//! shape of problem as picking a videobridge, so this mirrors
//! [`crate::bridge::BridgeSelector`] rather than inventing a new one.

use async_trait::async_trait;
use jid::Jid;

/// The kind of gateway component behind a [`Gateway`] handle, named as a
/// tagged union per spec §9 rather than as separate traits, since a focus
/// only ever needs to address one by its JID and kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayKind {
  /// A SIP gateway (jigasi), dialled via the rayo `dial` IQ.
  Sip,
  /// A recording/streaming gateway (jibri).
  Recording,
}

/// A known gateway component (spec §6: "the `dial` IQ... forwards to a
/// selected gateway component").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
  pub jid: Jid,
  pub kind: GatewayKind,
}

/// External collaborator, analogous to `BridgeSelector`: tracks available
/// gateway components and picks one to forward a `dial` IQ to. Concrete
/// implementations live outside `focus-core`.
#[async_trait]
pub trait GatewaySelector: Send + Sync {
  /// Picks an available gateway of `kind`. Returns `None` to signal
  /// `service-unavailable` (spec §7).
  async fn select_gateway(&self, kind: GatewayKind) -> Option<Gateway>;

  async fn update_gateway_operational_status(&self, jid: &Jid, alive: bool);
}

/// Reference implementation: a fixed, round-trip-free pool of gateways
/// with simple load counters, the same shape as `StaticBridgeSelector`.
#[derive(Debug, Default)]
pub struct StaticGatewaySelector {
  pub gateways: Vec<(Gateway, u32)>,
}

impl StaticGatewaySelector {
  pub fn new(gateways: Vec<(Gateway, u32)>) -> Self {
    Self { gateways }
  }
}

#[async_trait]
impl GatewaySelector for StaticGatewaySelector {
  async fn select_gateway(&self, kind: GatewayKind) -> Option<Gateway> {
    self
      .gateways
      .iter()
      .filter(|(g, _)| g.kind == kind)
      .min_by_key(|(_, load)| *load)
      .map(|(g, _)| g.clone())
  }

  async fn update_gateway_operational_status(&self, _jid: &Jid, _alive: bool) {}
}

#[cfg(test)]
mod tests {
  use super::*;

  fn gateway(name: &str, kind: GatewayKind) -> Gateway {
    Gateway { jid: format!("{name}.example").parse().unwrap(), kind }
  }

  #[tokio::test]
  async fn picks_least_loaded_of_the_requested_kind() {
    let selector = StaticGatewaySelector::new(vec![
      (gateway("jigasi1", GatewayKind::Sip), 3),
      (gateway("jigasi2", GatewayKind::Sip), 1),
      (gateway("jibri1", GatewayKind::Recording), 0),
    ]);
    let selected = selector.select_gateway(GatewayKind::Sip).await.unwrap();
    assert_eq!(selected.jid.to_string(), "jigasi2.example");
  }

  #[tokio::test]
  async fn returns_none_when_no_gateway_of_kind_is_known() {
    let selector = StaticGatewaySelector::new(vec![(gateway("jibri1", GatewayKind::Recording), 0)]);
    assert!(selector.select_gateway(GatewayKind::Sip).await.is_none());
  }
}
