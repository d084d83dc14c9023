//! Conference GID allocation (spec §3 "ConferenceRegistry state", spec §6
//! "Conference GID").
//!
//! A GID is `(jicofo_short_id << 16) | random16`, unique among the live
//! conferences of a single process. `jicofo_short_id` is fixed for the
//! lifetime of the process; `0` is accepted with a warning as
//! "unconfigured".

use std::collections::HashSet;

use rand::Rng;
use tracing::warn;

pub type Gid = u32;

#[derive(Debug)]
pub struct GidAllocator {
  short_id: u16,
  in_use: HashSet<Gid>,
}

impl GidAllocator {
  pub fn new(short_id: u16) -> Self {
    if short_id == 0 {
      warn!("jicofoShortId is unconfigured (0); conference GIDs will not be distinguishable from another unconfigured process");
    }
    Self {
      short_id,
      in_use: HashSet::new(),
    }
  }

  /// Allocates a fresh GID, retrying on collision against the in-use set.
  pub fn allocate(&mut self) -> Gid {
    loop {
      let nonce: u16 = rand::thread_rng().gen();
      let gid = ((self.short_id as u32) << 16) | nonce as u32;
      if self.in_use.insert(gid) {
        return gid;
      }
    }
  }

  pub fn release(&mut self, gid: Gid) {
    self.in_use.remove(&gid);
  }

  /// Spec §8 invariant: `conferenceGids` equals `{c.id : c in registry}`.
  pub fn in_use(&self) -> &HashSet<Gid> {
    &self.in_use
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn allocated_gids_are_unique_and_carry_short_id() {
    let mut allocator = GidAllocator::new(7);
    let mut seen = HashSet::new();
    for _ in 0..1000 {
      let gid = allocator.allocate();
      assert_eq!(gid >> 16, 7);
      assert!(seen.insert(gid), "duplicate gid allocated");
    }
    assert_eq!(allocator.in_use().len(), 1000);
  }

  #[test]
  fn released_gid_can_be_reused() {
    let mut allocator = GidAllocator::new(1);
    let gid = allocator.allocate();
    allocator.release(gid);
    assert!(!allocator.in_use().contains(&gid));
  }

  #[test]
  fn zero_short_id_is_allowed() {
    let mut allocator = GidAllocator::new(0);
    let gid = allocator.allocate();
    assert_eq!(gid >> 16, 0);
  }
}
