//! The health-check IQ (`http://jitsi.org/protocol/healthcheck`).
//!
//! Ambient observability surface (spec §SPEC_FULL.C.1): answered with an
//! empty `result` when the process can still accept conferences, or
//! `internal-server-error` otherwise. Carried regardless of the spec's
//! Non-goal on REST admin/metrics, since liveness probing is not an
//! external surface, it is the same IQ-based wire protocol as the rest of
//! the focus.

use std::convert::TryFrom;

use xmpp_parsers::{iq::IqGetPayload, Element, Error};

const NS_HEALTHCHECK: &str = "http://jitsi.org/protocol/healthcheck";

#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCheckQuery;

impl IqGetPayload for HealthCheckQuery {}

impl TryFrom<Element> for HealthCheckQuery {
  type Error = Error;

  fn try_from(elem: Element) -> Result<HealthCheckQuery, Error> {
    if !elem.is("healthcheck", NS_HEALTHCHECK) {
      return Err(Error::ParseError("not a healthcheck element"));
    }
    Ok(HealthCheckQuery)
  }
}

impl From<HealthCheckQuery> for Element {
  fn from(_: HealthCheckQuery) -> Element {
    Element::builder("healthcheck", NS_HEALTHCHECK).build()
  }
}
