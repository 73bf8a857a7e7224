//! Per-connection registry entry owned by the state thread.
//!
//! The writer half of a connection is a bounded frame channel drained by a
//! dedicated thread; the registry entry tracks the peer's echoed sequence
//! number, its subscription set, and its lifecycle phase.

use std::collections::BTreeSet;

use bytes::Bytes;
use crossbeam::channel::{Sender, TrySendError};

use crate::core::seq::SeqNum;

pub type ConnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnPhase {
    Open,
    /// Queued frames still flush, inbound messages are no longer processed.
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The outbound queue is full; the peer has lagged too far behind.
    Lagged,
    /// The writer is gone.
    Disconnected,
}

#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    outbound: Sender<Bytes>,
    phase: ConnPhase,
    /// Last server seq the peer echoed; 0 before its first frame.
    pub echoed_seq: SeqNum,
    /// Client indices with a live throughput subscription.
    pub throughput_subs: BTreeSet<usize>,
}

impl Connection {
    pub fn new(id: ConnId, outbound: Sender<Bytes>) -> Connection {
        Connection {
            id,
            outbound,
            phase: ConnPhase::Open,
            echoed_seq: SeqNum::ZERO,
            throughput_subs: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn phase(&self) -> ConnPhase {
        self.phase
    }

    pub fn begin_drain(&mut self) {
        self.phase = ConnPhase::Draining;
    }

    pub fn is_open(&self) -> bool {
        self.phase == ConnPhase::Open
    }

    /// Queue one encoded frame for the writer thread.
    pub fn enqueue(&self, frame: Bytes) -> Result<(), EnqueueError> {
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(EnqueueError::Lagged),
            Err(TrySendError::Disconnected(_)) => Err(EnqueueError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_reports_lag_on_full_queue() {
        let (tx, _rx) = crossbeam::channel::bounded(1);
        let conn = Connection::new(1, tx);
        conn.enqueue(Bytes::from_static(b"one")).unwrap();
        assert_eq!(
            conn.enqueue(Bytes::from_static(b"two")),
            Err(EnqueueError::Lagged)
        );
    }

    #[test]
    fn enqueue_reports_disconnect() {
        let (tx, rx) = crossbeam::channel::bounded(1);
        let conn = Connection::new(1, tx);
        drop(rx);
        assert_eq!(
            conn.enqueue(Bytes::from_static(b"x")),
            Err(EnqueueError::Disconnected)
        );
    }

    #[test]
    fn drain_is_terminal_for_reads() {
        let (tx, _rx) = crossbeam::channel::bounded(1);
        let mut conn = Connection::new(1, tx);
        assert!(conn.is_open());
        conn.begin_drain();
        assert!(!conn.is_open());
        assert_eq!(conn.phase(), ConnPhase::Draining);
    }
}
