//! Rayo `dial` IQ (`urn:xmpp:rayo:1`), used to ask a SIP gateway ("Jigasi")
//! component to place an outbound call into the conference (spec §6).

use std::convert::TryFrom;

use xmpp_parsers::{iq::IqSetPayload, Element, Error};

const NS_RAYO: &str = "urn:xmpp:rayo:1";

#[derive(Debug, Clone)]
pub struct Dial {
  pub to: String,
  pub from: Option<String>,
  pub headers: Vec<(String, String)>,
}

impl IqSetPayload for Dial {}

impl From<Dial> for Element {
  fn from(dial: Dial) -> Element {
    let mut builder = Element::builder("dial", NS_RAYO).attr("to", dial.to);
    if let Some(from) = dial.from {
      builder = builder.attr("from", from);
    }
    for (name, value) in dial.headers {
      builder = builder.append(
        Element::builder("header", NS_RAYO)
          .attr("name", name)
          .attr("value", value)
          .build(),
      );
    }
    builder.build()
  }
}

impl TryFrom<Element> for Dial {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Dial, Error> {
    if !elem.is("dial", NS_RAYO) {
      return Err(Error::ParseError("not a dial element"));
    }
    Ok(Dial {
      to: elem
        .attr("to")
        .ok_or(Error::ParseError("dial element missing to attr"))?
        .to_owned(),
      from: elem.attr("from").map(ToOwned::to_owned),
      headers: elem
        .children()
        .filter(|child| child.is("header", NS_RAYO))
        .filter_map(|child| Some((child.attr("name")?.to_owned(), child.attr("value")?.to_owned())))
        .collect(),
    })
  }
}

/// Reply carrying the gateway call's ref, or an error condition mapped per
/// spec §6/§7 (`forbidden`, `not-allowed`, `service-unavailable`,
/// `remote-server-timeout`).
#[derive(Debug, Clone)]
pub struct RefResult {
  pub uri: String,
}

impl From<RefResult> for Element {
  fn from(result: RefResult) -> Element {
    Element::builder("ref", NS_RAYO)
      .attr("uri", result.uri)
      .build()
  }
}

impl TryFrom<Element> for RefResult {
  type Error = Error;

  fn try_from(elem: Element) -> Result<RefResult, Error> {
    if !elem.is("ref", NS_RAYO) {
      return Err(Error::ParseError("not a ref element"));
    }
    Ok(RefResult {
      uri: elem
        .attr("uri")
        .ok_or(Error::ParseError("ref element missing uri attr"))?
        .to_owned(),
    })
  }
}
