//! Control-plane state: dispatcher, staleness guard, and subscription bus.
//!
//! Exactly one thread owns a [`ControlState`]; every decode, guard check,
//! handler, facet bump, and outbound enqueue happens there. That thread is
//! the linearisation point of the protocol: a handler runs to completion
//! between frames, so the facet clock cannot advance under a command while
//! it executes, and a state change's invalidation broadcast is always
//! enqueued before the acknowledgement of the command that caused it.

use bytes::Bytes;
use std::collections::BTreeMap;

use crossbeam::channel::Sender;

use crate::bt::{BtError, BtManager, DomainSignal};
use crate::config::ClientConfig;
use crate::core::bencode::{self, Value};
use crate::core::frame::encode_frame;
use crate::core::message::{Command, CommandParseError, Reply};
use crate::core::metainfo::MetaInfo;
use crate::core::seq::SeqNum;

use super::connection::{ConnId, Connection};
use super::facets::FacetClock;
use super::snapshot;

pub struct ControlState {
    manager: BtManager,
    server_seq: SeqNum,
    facets: FacetClock,
    connections: BTreeMap<ConnId, Connection>,
}

impl ControlState {
    pub fn new(manager: BtManager) -> ControlState {
        ControlState {
            manager,
            server_seq: SeqNum::ZERO,
            facets: FacetClock::new(),
            connections: BTreeMap::new(),
        }
    }

    pub fn manager(&self) -> &BtManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut BtManager {
        &mut self.manager
    }

    pub fn server_seq(&self) -> SeqNum {
        self.server_seq
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_opened(&mut self, id: ConnId, outbound: Sender<Bytes>) {
        tracing::info!(conn = id, "control connection opened");
        self.connections.insert(id, Connection::new(id, outbound));
    }

    /// Transport closed: release subscriptions without any UNSUBSCRIBE, the
    /// peer is gone.
    pub fn connection_closed(&mut self, id: ConnId) {
        if self.connections.remove(&id).is_some() {
            tracing::info!(conn = id, "control connection closed");
        }
    }

    /// Shutdown path: every connection enters Draining. Inbound messages are
    /// no longer processed; the writers flush what is already queued and
    /// close once the registry (and with it the queue senders) goes away.
    pub fn begin_drain_all(&mut self) {
        for conn in self.connections.values_mut() {
            conn.begin_drain();
        }
    }

    /// An oversize frame header arrived: framing corruption is fatal for the
    /// connection only. The BENCERROR echoes the 8-byte header, which is all
    /// that can be buffered of the offending frame, then the connection goes
    /// away (flushing what is queued).
    pub fn handle_oversize(&mut self, id: ConnId, header: &[u8]) {
        self.send_to(
            id,
            &Reply::BencError {
                original: header.to_vec(),
            },
        );
        // Drain rather than drop: the fatal reply still flushes. The reader
        // stops at the poisoned stream and its close event removes the entry.
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.begin_drain();
        }
    }

    /// One inbound frame from a frontend. This is the single entry point of
    /// the protocol state machine.
    pub fn handle_frame(&mut self, id: ConnId, seq: SeqNum, payload: &[u8]) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        if !conn.is_open() {
            return;
        }
        // The echoed seq updates before anything else, including for NOOPs
        // and malformed payloads.
        conn.echoed_seq = seq;
        if payload.is_empty() {
            return;
        }

        let value = match bencode::decode(payload) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(conn = id, %err, "undecodable control message");
                self.send_to(
                    id,
                    &Reply::BencError {
                        original: payload.to_vec(),
                    },
                );
                return;
            }
        };
        let items = match value {
            Value::List(items)
                if items.first().and_then(Value::as_bytes).is_some() =>
            {
                items
            }
            _ => {
                tracing::debug!(conn = id, "control message has wrong outer shape");
                self.send_to(
                    id,
                    &Reply::BencError {
                        original: payload.to_vec(),
                    },
                );
                return;
            }
        };

        let cmd = match Command::parse(&items) {
            Ok(cmd) => cmd,
            Err(CommandParseError::UnknownTag) => {
                self.send_to(id, &Reply::UnknownCmd { original: items });
                return;
            }
            Err(CommandParseError::Args(message)) => {
                self.send_to(
                    id,
                    &Reply::ArgError {
                        original: items,
                        message,
                    },
                );
                return;
            }
        };

        // Staleness guard, before the handler. A facet in the command's risk
        // set bumped past the sender's echoed seq means the sender decided
        // on a view that no longer holds.
        if self
            .facets
            .is_stale(cmd.risks(), cmd.client_idx(), cmd.info_hash(), seq)
        {
            tracing::debug!(conn = id, cmd = cmd.tag(), echoed = %seq, "stale view rejected");
            self.send_to(id, &Reply::RcRej { original: items });
            return;
        }

        let reply = self.dispatch(id, &items, cmd);
        self.send_to(id, &reply);
    }

    fn dispatch(&mut self, id: ConnId, original: &[Value], cmd: Command) -> Reply {
        match cmd {
            Command::GetClientCount => snapshot::client_count(&self.manager),
            Command::GetClientData { client_idx } => {
                snapshot::client_data(&self.manager, client_idx)
                    .unwrap_or_else(|err| fail(original, &err))
            }
            Command::GetClientTorrents { client_idx } => {
                snapshot::client_torrents(&self.manager, client_idx)
                    .unwrap_or_else(|err| fail(original, &err))
            }
            Command::GetBthData {
                client_idx,
                info_hash,
            } => snapshot::bth_data(&self.manager, client_idx, &info_hash)
                .unwrap_or_else(|err| fail(original, &err)),
            Command::GetBthThroughput {
                client_idx,
                info_hash,
                max_history,
            } => snapshot::bth_throughput(&self.manager, client_idx, &info_hash, max_history)
                .unwrap_or_else(|err| fail(original, &err)),
            Command::BuildBthFromMetaInfo {
                client_idx,
                metainfo,
                active,
            } => self.handle_build(original, client_idx, &metainfo, active),
            Command::DropBth {
                client_idx,
                info_hash,
            } => match self.manager.torrent_drop(client_idx, &info_hash) {
                Ok(()) => {
                    self.note_torrent_set_changed(client_idx);
                    ok(original)
                }
                Err(err) => fail(original, &err),
            },
            Command::ForceBtcReannounce { client_idx } => {
                match self.manager.client_mut(client_idx) {
                    Ok(client) => {
                        let ordered = client.reannounce_all();
                        tracing::debug!(client_idx, ordered, "forced tracker reannounce");
                        if ordered > 0 {
                            ok(original)
                        } else {
                            noop(original)
                        }
                    }
                    Err(err) => fail(original, &err),
                }
            }
            Command::StartBth {
                client_idx,
                info_hash,
            } => {
                let handler = self
                    .manager
                    .client_mut(client_idx)
                    .map_err(|err| fail(original, &err))
                    .and_then(|client| {
                        client
                            .torrent_mut(&info_hash)
                            .ok_or_else(|| fail(original, &BtError::UnknownTorrent(info_hash)))
                    });
                match handler {
                    Err(reply) => reply,
                    Ok(handler) => {
                        if handler.is_active() {
                            return noop(original);
                        }
                        handler.start().expect("inactive handler starts");
                        self.note_active_flag_changed(client_idx, info_hash);
                        ok(original)
                    }
                }
            }
            Command::StopBth {
                client_idx,
                info_hash,
            } => {
                let handler = self
                    .manager
                    .client_mut(client_idx)
                    .map_err(|err| fail(original, &err))
                    .and_then(|client| {
                        client
                            .torrent_mut(&info_hash)
                            .ok_or_else(|| fail(original, &BtError::UnknownTorrent(info_hash)))
                    });
                match handler {
                    Err(reply) => reply,
                    Ok(handler) => {
                        if !handler.is_active() {
                            return noop(original);
                        }
                        handler.stop().expect("active handler stops");
                        self.note_active_flag_changed(client_idx, info_hash);
                        ok(original)
                    }
                }
            }
            Command::SubscribeBthThroughput { client_idx } => {
                if let Err(err) = self.manager.client(client_idx) {
                    return fail(original, &err);
                }
                let Some(conn) = self.connections.get_mut(&id) else {
                    return noop(original);
                };
                if conn.throughput_subs.insert(client_idx) {
                    ok(original)
                } else {
                    noop(original)
                }
            }
            Command::UnsubscribeBthThroughput { client_idx } => {
                if let Err(err) = self.manager.client(client_idx) {
                    return fail(original, &err);
                }
                let Some(conn) = self.connections.get_mut(&id) else {
                    return noop(original);
                };
                if conn.throughput_subs.remove(&client_idx) {
                    ok(original)
                } else {
                    noop(original)
                }
            }
        }
    }

    fn handle_build(
        &mut self,
        original: &[Value],
        client_idx: usize,
        metainfo_bytes: &[u8],
        active: bool,
    ) -> Reply {
        if let Err(err) = self.manager.client(client_idx) {
            return fail(original, &err);
        }
        let metainfo = match MetaInfo::from_benc_bytes(metainfo_bytes) {
            Ok(metainfo) => metainfo,
            Err(err) => {
                return fail(original, &BtError::MetaInfo(err));
            }
        };
        let info_hash = metainfo.info_hash;
        let client = self.manager.client_mut(client_idx).expect("checked above");
        if let Some(existing) = client.torrent(&info_hash) {
            if existing.is_active() == active {
                return noop(original);
            }
            return Reply::CommandFail {
                original: original.to_vec(),
                message: format!(
                    "already tracking torrent {info_hash} with a conflicting active state"
                ),
                extra: Some(Value::bytes(info_hash.as_bytes().to_vec())),
            };
        }
        client
            .torrent_add(metainfo, active)
            .expect("absence checked above");
        self.note_torrent_set_changed(client_idx);
        ok(original)
    }

    /// Torrent set of `client_idx` changed: bump the facets that guard
    /// commands addressed to this client and tell every frontend.
    fn note_torrent_set_changed(&mut self, client_idx: usize) {
        let seq = self.server_seq.bump();
        self.facets.bump_bth_set(client_idx, seq);
        // A changed torrent set alters what commands naming this client
        // mean, which is what the client-count facet guards.
        self.facets.bump_client_count(seq);
        self.broadcast(&Reply::InvalidClientTorrents { client_idx });
    }

    fn note_active_flag_changed(
        &mut self,
        client_idx: usize,
        info_hash: crate::core::metainfo::InfoHash,
    ) {
        let seq = self.server_seq.bump();
        self.facets.bump_bth_active(client_idx, info_hash, seq);
    }

    /// The client set itself changed: invalidate every frontend's view and
    /// cancel all per-client subscriptions, one UNSUBSCRIBE each.
    fn note_client_set_changed(&mut self) {
        let seq = self.server_seq.bump();
        self.facets.bump_client_count(seq);
        self.facets.clear_per_index();
        self.broadcast(&Reply::InvalidClientCount);

        let mut cancelled: Vec<(ConnId, Vec<usize>)> = Vec::new();
        for (id, conn) in self.connections.iter_mut() {
            if conn.throughput_subs.is_empty() {
                continue;
            }
            let subs: Vec<usize> = conn.throughput_subs.iter().copied().collect();
            conn.throughput_subs.clear();
            cancelled.push((*id, subs));
        }
        for (id, subs) in cancelled {
            for client_idx in subs {
                self.send_to(id, &Reply::Unsubscribe { client_idx });
            }
        }
    }

    /// One domain state-change signal, translated into the matching
    /// unsolicited traffic on the right subset of connections.
    pub fn apply_signal(&mut self, signal: DomainSignal) {
        match signal {
            DomainSignal::ClientCountChanged => self.note_client_set_changed(),
            DomainSignal::TorrentSetChanged { client_idx } => {
                self.note_torrent_set_changed(client_idx);
            }
            DomainSignal::ThroughputTick {
                client_idx,
                down,
                up,
            } => self.deliver_slice(client_idx, down, up),
            DomainSignal::DownloadFinished {
                client_idx,
                info_hash,
            } => self.manager.note_download_finished(client_idx, &info_hash),
        }
    }

    /// Close one throughput cycle for a client and deliver the slice to its
    /// subscribers.
    pub fn throughput_tick(&mut self, client_idx: usize) {
        let Ok(client) = self.manager.client_mut(client_idx) else {
            return;
        };
        let (down, up) = client.cycle_tick();
        self.apply_signal(DomainSignal::ThroughputTick {
            client_idx,
            down,
            up,
        });
    }

    fn deliver_slice(&mut self, client_idx: usize, down: Vec<Option<u64>>, up: Vec<Option<u64>>) {
        self.server_seq.bump();
        let reply = Reply::BthThroughputSlice {
            client_idx,
            down,
            up,
        };
        let subscribed: Vec<ConnId> = self
            .connections
            .values()
            .filter(|conn| conn.is_open() && conn.throughput_subs.contains(&client_idx))
            .map(Connection::id)
            .collect();
        for id in subscribed {
            self.send_to(id, &reply);
        }
    }

    /// Apply a reloaded client configuration. A changed client set
    /// invalidates all frontend views.
    pub fn reconcile_clients(&mut self, configs: &[ClientConfig]) {
        if self.manager.reconcile_clients(configs) {
            tracing::info!(clients = configs.len(), "client set reconfigured");
            self.apply_signal(DomainSignal::ClientCountChanged);
        }
    }

    /// Remove one client (maintenance path); invalidates all views.
    pub fn remove_client(&mut self, client_idx: usize) -> Result<(), BtError> {
        self.manager.remove_client(client_idx)?;
        self.apply_signal(DomainSignal::ClientCountChanged);
        Ok(())
    }

    fn encode_reply(&self, reply: &Reply) -> Bytes {
        encode_frame(self.server_seq, &reply.encode())
    }

    fn send_to(&mut self, id: ConnId, reply: &Reply) {
        let frame = self.encode_reply(reply);
        let dead = match self.connections.get(&id) {
            Some(conn) => conn.enqueue(frame).is_err(),
            None => false,
        };
        if dead {
            tracing::warn!(conn = id, tag = reply.tag(), "outbound queue gone or full");
            self.connection_closed(id);
        }
    }

    fn broadcast(&mut self, reply: &Reply) {
        let frame = self.encode_reply(reply);
        let mut dead = Vec::new();
        for (id, conn) in &self.connections {
            if !conn.is_open() {
                continue;
            }
            if conn.enqueue(frame.clone()).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            tracing::warn!(conn = id, tag = reply.tag(), "dropping lagged connection");
            self.connection_closed(id);
        }
    }
}

fn ok(original: &[Value]) -> Reply {
    Reply::CommandOk {
        original: original.to_vec(),
    }
}

fn noop(original: &[Value]) -> Reply {
    Reply::CommandNoop {
        original: original.to_vec(),
    }
}

fn fail(original: &[Value], err: &BtError) -> Reply {
    Reply::CommandFail {
        original: original.to_vec(),
        message: err.to_string(),
        extra: None,
    }
}
