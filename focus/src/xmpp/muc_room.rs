//! `MucRoom` implementation: the focus's own occupancy in one conference's
//! MUC (spec §6 `MucRoom`).
//!
//! The focus holds a single standing presence in the room (nickname
//! `"focus"`) carrying a list of extension elements; `add_presence_extension`/
//! `remove_presence_extension` mutate that list and resend presence, the way
//! the teacher's `JitsiConference::set_muted`/`send_presence` maintain their
//! own participant's presence payload list.
//!
//! It also watches every other occupant's presence to maintain a membership
//! snapshot and publish join/leave/kick/local-role-change notifications
//! (spec §6): parsed by hand against the raw `muc#user` payload rather than
//! through a typed `xmpp_parsers::muc::user` presence struct, the same way
//! `colibri_conference` hand-builds COLIBRI stanzas instead of relying on a
//! typed COLIBRI crate.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use focus_core::{
  interfaces::{MucMember, MucRoomEvent},
  FocusError, FocusResult,
};
use jid::{BareJid, FullJid, Jid};
use tokio::sync::{broadcast, Mutex};
use xmpp_parsers::{
  iq::{Iq, IqType},
  muc::{
    user::{Affiliation, Item, Role},
    Muc,
  },
  ns::DEFAULT_NS,
  presence::{self, Presence},
  Element,
};

use crate::xmpp::{
  ns::{MUC_ADMIN, MUC_OWNER, MUC_USER},
  stanza_filter::StanzaFilter,
  transport::Transport,
};

const MUC_REPLY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

/// XEP-0045 self-presence status code: "this presence refers to me".
const STATUS_SELF_PRESENCE: &str = "110";
/// XEP-0045 status codes that mean "removed by an admin", as opposed to a
/// voluntary leave.
const STATUS_KICKED: &str = "307";
const STATUS_BANNED: &str = "301";

const NS_JITSI_MEET_REGION: &str = "http://jitsi.org/jitsi-meet";

fn room_of(jid: &Jid) -> BareJid {
  match jid {
    Jid::Full(full) => full.clone().into(),
    Jid::Bare(bare) => bare.clone(),
  }
}

/// The focus's standing presence in one room, plus the membership snapshot
/// it builds up from other occupants' presence.
pub struct MucRoomImpl {
  transport: Arc<Transport>,
  room: BareJid,
  room_jid: FullJid,
  extensions: Mutex<Vec<Element>>,
  members: Mutex<HashMap<String, MucMember>>,
  local_is_owner: Mutex<bool>,
  events: broadcast::Sender<MucRoomEvent>,
}

impl MucRoomImpl {
  pub fn new(transport: Arc<Transport>, room: BareJid, nick: &str) -> Self {
    let (events, _) = broadcast::channel(64);
    Self {
      transport,
      room_jid: room.clone().with_resource(nick),
      room,
      extensions: Mutex::new(Vec::new()),
      members: Mutex::new(HashMap::new()),
      local_is_owner: Mutex::new(false),
      events,
    }
  }

  async fn send_presence(&self, r#type: presence::Type, payloads: Vec<Element>) -> FocusResult<()> {
    let mut pres = Presence::new(r#type).with_to(Jid::Full(self.room_jid.clone()));
    pres.payloads = payloads;
    self
      .transport
      .send(&Jid::Full(self.room_jid.clone()), pres.into())
      .await
  }

  /// Sends `query` as the sole child of a fresh `<iq type="set">` to the
  /// room and waits for the reply, erroring on anything but a success
  /// result (no typed `muc#admin`/`muc#owner` support upstream, so this
  /// hand-builds the stanza the way `colibri_conference` does for COLIBRI).
  async fn send_iq_set(&self, query: Element) -> FocusResult<()> {
    let iq = Element::builder("iq", DEFAULT_NS).attr("type", "set").append(query).build();
    let reply = self
      .transport
      .send_and_await_reply(&Jid::Bare(self.room.clone()), iq, MUC_REPLY_TIMEOUT)
      .await?;
    let reply_iq = Iq::try_from(reply).map_err(|e| FocusError::Internal(e.into()))?;
    match reply_iq.payload {
      IqType::Result(_) => Ok(()),
      _ => Err(FocusError::BridgeFailure),
    }
  }
}

#[async_trait]
impl focus_core::interfaces::MucRoom for MucRoomImpl {
  #[tracing::instrument(level = "debug", skip(self), err)]
  async fn join(&self) -> FocusResult<()> {
    let extensions = self.extensions.lock().await.clone();
    let mut payloads = vec![Element::from(Muc::new())];
    payloads.extend(extensions);
    self.send_presence(presence::Type::None, payloads).await
  }

  #[tracing::instrument(level = "debug", skip(self), err)]
  async fn leave(&self) -> FocusResult<()> {
    self.send_presence(presence::Type::Unavailable, vec![]).await
  }

  #[tracing::instrument(level = "debug", skip(self), err)]
  async fn destroy(&self, reason: &str) -> FocusResult<()> {
    let destroy = Element::builder("destroy", MUC_OWNER)
      .append(Element::builder("reason", MUC_OWNER).append(reason).build())
      .build();
    let query = Element::builder("query", MUC_OWNER).append(destroy).build();
    self.send_iq_set(query).await
  }

  #[tracing::instrument(level = "debug", skip(self), err)]
  async fn grant_ownership(&self, jid: &Jid) -> FocusResult<()> {
    let mut item = Item::new(Affiliation::Owner, Role::Moderator);
    item.jid = match jid {
      Jid::Full(full) => Some(full.clone()),
      Jid::Bare(_) => None,
    };
    let query = Element::builder("query", MUC_ADMIN).append(Element::from(item)).build();
    self.send_iq_set(query).await
  }

  #[tracing::instrument(level = "debug", skip(self, element), err)]
  async fn add_presence_extension(&self, element: Element) -> FocusResult<()> {
    let mut extensions = self.extensions.lock().await;
    extensions.retain(|el| el.name() != element.name() || el.ns() != element.ns());
    extensions.push(element);
    let mut payloads = vec![Element::from(Muc::new())];
    payloads.extend(extensions.clone());
    drop(extensions);
    self.send_presence(presence::Type::None, payloads).await
  }

  #[tracing::instrument(level = "debug", skip(self), err)]
  async fn remove_presence_extension(&self, element_name: &str) -> FocusResult<()> {
    let mut extensions = self.extensions.lock().await;
    extensions.retain(|el| el.name() != element_name);
    let mut payloads = vec![Element::from(Muc::new())];
    payloads.extend(extensions.clone());
    drop(extensions);
    self.send_presence(presence::Type::None, payloads).await
  }

  async fn members(&self) -> Vec<MucMember> {
    self.members.lock().await.values().cloned().collect()
  }

  async fn find_member(&self, endpoint_id: &str) -> Option<MucMember> {
    self.members.lock().await.get(endpoint_id).cloned()
  }

  fn subscribe(&self) -> broadcast::Receiver<MucRoomEvent> {
    self.events.subscribe()
  }
}

/// Parses inbound room presence into membership/local-role-change events
/// (spec §6). Self-presence (status code 110, or a `from` resource matching
/// the focus's own nick) only ever updates `local_is_owner`; every other
/// occupant's presence updates the membership map.
///
/// Implemented on `Arc<MucRoomImpl>` rather than on `MucRoomImpl` directly
/// so the very instance handed to `Conference` as a `MucRoom` is the one
/// registered as a stanza filter, sharing one membership map between both
/// roles.
#[async_trait]
impl StanzaFilter for Arc<MucRoomImpl> {
  fn filter(&self, element: &Element) -> bool {
    if !element.is("presence", "jabber:client") {
      return false;
    }
    element
      .attr("from")
      .and_then(|from| from.parse::<Jid>().ok())
      .map(|from| room_of(&from) == self.room)
      .unwrap_or(false)
  }

  #[tracing::instrument(level = "debug", skip(self, element), err)]
  async fn take(&self, element: Element) -> anyhow::Result<()> {
    let Some(from) = element.attr("from").and_then(|s| s.parse::<FullJid>().ok()) else {
      return Ok(());
    };
    let endpoint_id = from.resource.clone();
    let is_unavailable = element.attr("type") == Some("unavailable");

    let mut status_codes: Vec<String> = Vec::new();
    let mut is_owner = false;
    let mut item_jid: Option<Jid> = None;
    if let Some(x) = element.get_child("x", MUC_USER) {
      for child in x.children() {
        if child.is("status", MUC_USER) {
          if let Some(code) = child.attr("code") {
            status_codes.push(code.to_owned());
          }
        }
        else if child.is("item", MUC_USER) {
          is_owner = child.attr("affiliation") == Some("owner") || child.attr("role") == Some("moderator");
          item_jid = child.attr("jid").and_then(|s| s.parse().ok());
        }
      }
    }
    let region = element
      .get_child("region", NS_JITSI_MEET_REGION)
      .and_then(|r| r.attr("id"))
      .map(ToOwned::to_owned);

    let is_self = endpoint_id == self.room_jid.resource || status_codes.iter().any(|c| c.as_str() == STATUS_SELF_PRESENCE);
    if is_self {
      let mut local_is_owner = self.local_is_owner.lock().await;
      if *local_is_owner != is_owner {
        *local_is_owner = is_owner;
        let _ = self.events.send(MucRoomEvent::LocalRoleChanged { is_owner });
      }
      return Ok(());
    }

    if is_unavailable {
      self.members.lock().await.remove(&endpoint_id);
      let kicked = status_codes.iter().any(|c| c.as_str() == STATUS_KICKED || c.as_str() == STATUS_BANNED);
      let event = if kicked {
        MucRoomEvent::MemberKicked { endpoint_id, reason: None }
      }
      else {
        MucRoomEvent::MemberLeft { endpoint_id }
      };
      let _ = self.events.send(event);
    }
    else {
      let is_new = {
        let mut members = self.members.lock().await;
        let is_new = !members.contains_key(&endpoint_id);
        members.insert(
          endpoint_id.clone(),
          MucMember {
            endpoint_id: endpoint_id.clone(),
            jid: item_jid.clone(),
            region: region.clone(),
            is_robot: false,
            is_owner,
          },
        );
        is_new
      };
      if is_new {
        let _ = self.events.send(MucRoomEvent::MemberJoined { endpoint_id, jid: item_jid, region, is_robot: false });
      }
    }
    Ok(())
  }
}
