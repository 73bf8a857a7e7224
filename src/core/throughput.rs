//! Throughput history rings.
//!
//! One ring per direction per torrent handler. A slot is `None` until its
//! cycle has happened; the wire projection renders unfilled slots as `-1`.

#[derive(Debug, Clone)]
pub struct SampleRing {
    slots: Vec<Option<u64>>,
    index: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> SampleRing {
        SampleRing {
            slots: vec![None; capacity.max(1)],
            index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Advance one cycle and record its sample.
    pub fn push(&mut self, sample: u64) {
        self.index = (self.index + 1) % self.slots.len();
        self.slots[self.index] = Some(sample);
    }

    /// Sample of the most recent completed cycle.
    pub fn latest(&self) -> Option<u64> {
        self.slots[self.index]
    }

    /// The last `max` samples, oldest first. Shorter than `max` only when the
    /// ring itself is shorter.
    pub fn recent(&self, max: usize) -> Vec<Option<u64>> {
        let take = max.min(self.slots.len());
        let len = self.slots.len();
        (0..take)
            .map(|i| {
                let offset = take - 1 - i;
                self.slots[(self.index + len - offset) % len]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ring_reads_unfilled() {
        let ring = SampleRing::new(4);
        assert_eq!(ring.latest(), None);
        assert_eq!(ring.recent(2), vec![None, None]);
    }

    #[test]
    fn push_tracks_latest() {
        let mut ring = SampleRing::new(4);
        ring.push(10);
        ring.push(20);
        assert_eq!(ring.latest(), Some(20));
    }

    #[test]
    fn recent_returns_oldest_first() {
        let mut ring = SampleRing::new(4);
        for sample in [1, 2, 3] {
            ring.push(sample);
        }
        assert_eq!(ring.recent(2), vec![Some(2), Some(3)]);
        assert_eq!(ring.recent(4), vec![None, Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn recent_is_clamped_to_capacity() {
        let mut ring = SampleRing::new(3);
        for sample in [1, 2, 3, 4, 5] {
            ring.push(sample);
        }
        assert_eq!(ring.recent(10), vec![Some(3), Some(4), Some(5)]);
    }

    #[test]
    fn wraparound_overwrites_oldest() {
        let mut ring = SampleRing::new(2);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        assert_eq!(ring.recent(2), vec![Some(2), Some(3)]);
    }
}
