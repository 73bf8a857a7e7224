//! State-facet version vector for the optimistic-concurrency guard.
//!
//! Every state change that could invalidate a pending command bumps the
//! server sequence counter and records the new value against the facets it
//! touched. A command is stale when any facet in its declared risk set was
//! bumped after the sequence number its sender last echoed.

use std::collections::HashMap;

use crate::core::message::RiskSet;
use crate::core::metainfo::InfoHash;
use crate::core::seq::SeqNum;

#[derive(Debug, Default)]
pub struct FacetClock {
    client_count: SeqNum,
    bth_set: HashMap<usize, SeqNum>,
    bth_active: HashMap<(usize, InfoHash), SeqNum>,
}

impl FacetClock {
    pub fn new() -> FacetClock {
        FacetClock::default()
    }

    pub fn bump_client_count(&mut self, seq: SeqNum) {
        self.client_count = seq;
    }

    /// Forget per-index facets after the client set itself changed: the
    /// indices they are keyed by may now name different entities.
    pub fn clear_per_index(&mut self) {
        self.bth_set.clear();
        self.bth_active.clear();
    }

    pub fn bump_bth_set(&mut self, client_idx: usize, seq: SeqNum) {
        self.bth_set.insert(client_idx, seq);
    }

    pub fn bump_bth_active(&mut self, client_idx: usize, info_hash: InfoHash, seq: SeqNum) {
        self.bth_active.insert((client_idx, info_hash), seq);
    }

    pub fn client_count_last_bump(&self) -> SeqNum {
        self.client_count
    }

    /// Whether a command with the given risk set and addressing is stale
    /// relative to the sequence number its sender echoed.
    pub fn is_stale(
        &self,
        risks: RiskSet,
        client_idx: Option<usize>,
        info_hash: Option<&InfoHash>,
        echoed: SeqNum,
    ) -> bool {
        if risks.client_count && self.client_count.newer_than(echoed) {
            return true;
        }
        if risks.bth_set {
            if let Some(idx) = client_idx {
                if let Some(bump) = self.bth_set.get(&idx) {
                    if bump.newer_than(echoed) {
                        return true;
                    }
                }
            }
        }
        if risks.bth_active {
            if let (Some(idx), Some(hash)) = (client_idx, info_hash) {
                if let Some(bump) = self.bth_active.get(&(idx, *hash)) {
                    if bump.newer_than(echoed) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> InfoHash {
        InfoHash::from_bytes(&[byte; 20]).unwrap()
    }

    #[test]
    fn fresh_clock_is_never_stale() {
        let clock = FacetClock::new();
        assert!(!clock.is_stale(RiskSet::DROP, Some(0), Some(&hash(1)), SeqNum::ZERO));
    }

    #[test]
    fn client_count_bump_stales_echoes_before_it() {
        let mut clock = FacetClock::new();
        clock.bump_client_count(SeqNum::new(5));
        assert!(clock.is_stale(RiskSet::CLIENT_COUNT, None, None, SeqNum::new(4)));
        assert!(!clock.is_stale(RiskSet::CLIENT_COUNT, None, None, SeqNum::new(5)));
        assert!(!clock.is_stale(RiskSet::NONE, None, None, SeqNum::ZERO));
    }

    #[test]
    fn per_facet_bumps_only_affect_their_instance() {
        let mut clock = FacetClock::new();
        clock.bump_bth_active(0, hash(1), SeqNum::new(3));

        // Same client, different torrent: fresh.
        assert!(!clock.is_stale(RiskSet::DROP, Some(0), Some(&hash(2)), SeqNum::ZERO));
        // The touched torrent: stale.
        assert!(clock.is_stale(RiskSet::DROP, Some(0), Some(&hash(1)), SeqNum::ZERO));
        // Commands that do not declare bth-active ignore the bump.
        assert!(!clock.is_stale(
            RiskSet::CLIENT_COUNT,
            Some(0),
            Some(&hash(1)),
            SeqNum::ZERO
        ));
    }

    #[test]
    fn client_count_bump_clears_per_index_facets() {
        let mut clock = FacetClock::new();
        clock.bump_bth_set(3, SeqNum::new(2));
        clock.bump_client_count(SeqNum::new(4));
        clock.clear_per_index();
        // Stale through client-count, not through the cleared bth-set entry.
        assert!(clock.is_stale(RiskSet::DROP, Some(3), None, SeqNum::new(3)));
        assert!(!clock.is_stale(
            RiskSet {
                client_count: false,
                bth_set: true,
                bth_active: false
            },
            Some(3),
            None,
            SeqNum::new(3)
        ));
    }
}
