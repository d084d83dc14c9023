//! `login-url`/`logout` IQs (`http://jitsi.org/protocol/focus`): a client
//! asking the focus for (or revoking) an authenticated moderator session
//! in a room, backed by an `AuthenticationAuthority` (spec §6 IQ surface,
//! §4.5 role management).

use std::convert::TryFrom;

use xmpp_parsers::{
  iq::{IqGetPayload, IqSetPayload},
  Element, Error,
};

const NS_FOCUS: &str = "http://jitsi.org/protocol/focus";

/// `<login-url room='...' popup='true' machine-uid='...' xmlns='http://jitsi.org/protocol/focus'/>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginUrlQuery {
  pub room: String,
  pub popup: bool,
  pub machine_uid: Option<String>,
}

impl IqGetPayload for LoginUrlQuery {}

impl TryFrom<Element> for LoginUrlQuery {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Self, Error> {
    if !elem.is("login-url", NS_FOCUS) {
      return Err(Error::ParseError("not a login-url element"));
    }
    let room = elem
      .attr("room")
      .ok_or(Error::ParseError("login-url element is missing the 'room' attribute."))?
      .to_owned();
    let popup = elem.attr("popup").map(|v| v == "true" || v == "1").unwrap_or(false);
    let machine_uid = elem.attr("machine-uid").map(str::to_owned);
    Ok(LoginUrlQuery { room, popup, machine_uid })
  }
}

impl From<LoginUrlQuery> for Element {
  fn from(query: LoginUrlQuery) -> Element {
    let mut builder = Element::builder("login-url", NS_FOCUS)
      .attr("room", query.room)
      .attr("popup", if query.popup { "true" } else { "false" });
    if let Some(machine_uid) = query.machine_uid {
      builder = builder.attr("machine-uid", machine_uid);
    }
    builder.build()
  }
}

/// Result of a successful `login-url` request: either a URL to complete
/// login out-of-band, or (if already authenticated) a session id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoginUrlResult {
  pub url: Option<String>,
  pub session_id: Option<String>,
}

impl TryFrom<Element> for LoginUrlResult {
  type Error = Error;

  fn try_from(elem: Element) -> Result<Self, Error> {
    if !elem.is("login-url", NS_FOCUS) {
      return Err(Error::ParseError("not a login-url element"));
    }
    Ok(LoginUrlResult {
      url: elem.attr("url").map(str::to_owned),
      session_id: elem.attr("session-id").map(str::to_owned),
    })
  }
}

impl From<LoginUrlResult> for Element {
  fn from(result: LoginUrlResult) -> Element {
    let mut builder = Element::builder("login-url", NS_FOCUS);
    if let Some(url) = result.url {
      builder = builder.attr("url", url);
    }
    if let Some(session_id) = result.session_id {
      builder = builder.attr("session-id", session_id);
    }
    builder.build()
  }
}

/// `<logout xmlns='http://jitsi.org/protocol/focus'/>`: revokes the
/// sender's authenticated session for the conference it was issued in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogoutIq;

impl IqSetPayload for LogoutIq {}

impl TryFrom<Element> for LogoutIq {
  type Error = Error;

  fn try_from(elem: Element) -> Result<LogoutIq, Error> {
    if !elem.is("logout", NS_FOCUS) {
      return Err(Error::ParseError("not a logout element"));
    }
    Ok(LogoutIq)
  }
}

impl From<LogoutIq> for Element {
  fn from(_: LogoutIq) -> Element {
    Element::builder("logout", NS_FOCUS).build()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn roundtrips_login_url_query() {
    let elem: Element = "<login-url room='room@conference.example' popup='true' machine-uid='abc' xmlns='http://jitsi.org/protocol/focus'/>"
      .parse()
      .unwrap();
    let query = LoginUrlQuery::try_from(elem.clone()).unwrap();
    assert_eq!(query.room, "room@conference.example");
    assert!(query.popup);
    assert_eq!(query.machine_uid.as_deref(), Some("abc"));
    assert_eq!(Element::from(query), elem);
  }

  #[test]
  fn parses_logout() {
    let elem: Element = "<logout xmlns='http://jitsi.org/protocol/focus'/>".parse().unwrap();
    LogoutIq::try_from(elem).unwrap();
  }
}
