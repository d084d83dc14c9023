//! RoleManager (spec §4.5).

use std::sync::Arc;

use jid::Jid;
use tracing::{debug, warn};

use crate::interfaces::AuthenticationAuthority;

/// A room member as the role manager sees it: just enough to decide
/// eligibility for ownership.
#[derive(Debug, Clone)]
pub struct RoleCandidate {
  pub endpoint_id: String,
  pub jid: Option<Jid>,
  pub is_robot: bool,
}

/// Grants or revokes moderator ("owner") rights in the room (spec §4.5).
/// The actual `grantOwnership` wire call is the caller's responsibility
/// (via `MucRoom`); this type only decides *who*.
pub struct RoleManager {
  auth: Option<Arc<dyn AuthenticationAuthority>>,
  auto_owner: bool,
  current_owner: Option<String>,
}

impl RoleManager {
  pub fn new(auth: Option<Arc<dyn AuthenticationAuthority>>, auto_owner: bool) -> Self {
    Self {
      auth,
      auto_owner,
      current_owner: None,
    }
  }

  pub fn current_owner(&self) -> Option<&str> {
    self.current_owner.as_deref()
  }

  pub fn is_owner(&self, endpoint_id: &str) -> bool {
    self.current_owner.as_deref() == Some(endpoint_id)
  }

  /// Local role became owner: if authentication-backed, grant ownership
  /// to every member with an active session; otherwise, if `autoOwner`,
  /// elect the first non-robot member present (spec §4.5).
  ///
  /// Returns the endpoints that should be granted ownership.
  pub async fn on_local_role_became_owner(&mut self, members: &[RoleCandidate]) -> Vec<String> {
    if let Some(auth) = &self.auth {
      let mut granted = Vec::new();
      for member in members {
        if let Some(jid) = &member.jid {
          if auth.session_for_jid(jid).await.is_some() {
            granted.push(member.endpoint_id.clone());
          }
        }
      }
      if let Some(first) = granted.first() {
        self.current_owner = Some(first.clone());
      }
      return granted;
    }

    if self.auto_owner && self.current_owner.is_none() {
      if let Some(elected) = self.elect(members) {
        self.current_owner = Some(elected.clone());
        return vec![elected];
      }
    }
    Vec::new()
  }

  /// Member joined: elect if ownerless and `autoOwner`; additionally
  /// grant ownership if the joiner has an authentication session (spec
  /// §4.5).
  pub async fn on_member_join(&mut self, joiner: &RoleCandidate, members: &[RoleCandidate]) -> Vec<String> {
    let mut granted = Vec::new();

    if let Some(auth) = &self.auth {
      if let Some(jid) = &joiner.jid {
        if auth.session_for_jid(jid).await.is_some() {
          granted.push(joiner.endpoint_id.clone());
          self.current_owner.get_or_insert_with(|| joiner.endpoint_id.clone());
        }
      }
    }

    if self.current_owner.is_none() && self.auto_owner {
      if let Some(elected) = self.elect(members) {
        self.current_owner = Some(elected.clone());
        granted.push(elected);
      }
    }

    granted
  }

  /// Member left: if they were the owner, clear and re-elect among the
  /// remaining members (spec §4.5).
  pub fn on_member_leave(&mut self, leaver_endpoint_id: &str, remaining: &[RoleCandidate]) -> Option<String> {
    if self.current_owner.as_deref() != Some(leaver_endpoint_id) {
      return None;
    }
    self.current_owner = None;
    if self.auto_owner {
      if let Some(elected) = self.elect(remaining) {
        self.current_owner = Some(elected.clone());
        return Some(elected);
      }
    }
    None
  }

  /// Skips robot members (SIP gateways, recorder clients) during election
  /// (spec §4.5). Logs and continues past any candidate the caller later
  /// fails to grant ownership to.
  fn elect(&self, members: &[RoleCandidate]) -> Option<String> {
    for candidate in members {
      if candidate.is_robot {
        debug!(endpoint_id = %candidate.endpoint_id, "skipping robot member during owner election");
        continue;
      }
      return Some(candidate.endpoint_id.clone());
    }
    warn!("no eligible member found for owner election");
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn candidate(id: &str, is_robot: bool) -> RoleCandidate {
    RoleCandidate { endpoint_id: id.to_owned(), jid: None, is_robot }
  }

  #[tokio::test]
  async fn elects_first_non_robot_on_join() {
    let mut rm = RoleManager::new(None, true);
    let members = vec![candidate("jibri1", true), candidate("alice", false)];
    let granted = rm.on_member_join(&candidate("alice", false), &members).await;
    assert_eq!(granted, vec!["alice".to_owned()]);
    assert!(rm.is_owner("alice"));
  }

  #[tokio::test]
  async fn re_elects_when_owner_leaves() {
    let mut rm = RoleManager::new(None, true);
    let members = vec![candidate("alice", false), candidate("bob", false)];
    rm.on_member_join(&candidate("alice", false), &members).await;
    assert!(rm.is_owner("alice"));

    let remaining = vec![candidate("bob", false)];
    let elected = rm.on_member_leave("alice", &remaining);
    assert_eq!(elected, Some("bob".to_owned()));
  }

  #[tokio::test]
  async fn leave_of_non_owner_is_a_no_op() {
    let mut rm = RoleManager::new(None, true);
    let members = vec![candidate("alice", false), candidate("bob", false)];
    rm.on_member_join(&candidate("alice", false), &members).await;
    assert_eq!(rm.on_member_leave("bob", &[candidate("alice", false)]), None);
    assert!(rm.is_owner("alice"));
  }
}
