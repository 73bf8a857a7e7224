//! Server thread loops.
//!
//! Three kinds of threads:
//! - State thread: owns [`ControlState`] and processes events sequentially.
//!   This is THE serialisation point; nothing else touches protocol state.
//! - Reader thread per connection: frame reassembly, forwards decoded frames
//!   as events. Never touches shared state.
//! - Writer thread per connection: drains the bounded outbound queue in
//!   enqueue order.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{bounded, Receiver, Sender};

use crate::config::ClientConfig;
use crate::core::frame::FrameDecoder;
use crate::core::seq::SeqNum;

use super::connection::ConnId;
use super::state::ControlState;

/// Message into the state thread.
pub enum ServerEvent {
    Opened {
        id: ConnId,
        outbound: Sender<Bytes>,
    },
    Frame {
        id: ConnId,
        seq: SeqNum,
        payload: Bytes,
    },
    /// Oversize frame header: answer with a fatal BENCERROR echoing the
    /// header, then drop the connection.
    Oversize {
        id: ConnId,
        header: [u8; 8],
    },
    Closed {
        id: ConnId,
    },
    ReloadClients(Vec<ClientConfig>),
    Shutdown,
}

struct TickEntry {
    client_idx: usize,
    period: Duration,
    next: Instant,
}

fn tick_schedule(state: &ControlState) -> Vec<TickEntry> {
    state
        .manager()
        .clients()
        .iter()
        .enumerate()
        .map(|(client_idx, client)| {
            let period = Duration::from_millis(client.cycle_ms().max(10));
            TickEntry {
                client_idx,
                period,
                next: Instant::now() + period,
            }
        })
        .collect()
}

/// Run the state thread until shutdown or channel close.
pub fn run_state_loop(mut state: ControlState, events: Receiver<ServerEvent>) {
    let mut ticks = tick_schedule(&state);

    loop {
        let next_deadline = ticks.iter().map(|tick| tick.next).min();
        let timer = match next_deadline {
            Some(deadline) => {
                crossbeam::channel::after(deadline.saturating_duration_since(Instant::now()))
            }
            None => crossbeam::channel::never(),
        };

        crossbeam::select! {
            recv(events) -> msg => match msg {
                Ok(ServerEvent::Opened { id, outbound }) => {
                    state.connection_opened(id, outbound);
                }
                Ok(ServerEvent::Frame { id, seq, payload }) => {
                    state.handle_frame(id, seq, &payload);
                }
                Ok(ServerEvent::Oversize { id, header }) => {
                    state.handle_oversize(id, &header);
                }
                Ok(ServerEvent::Closed { id }) => {
                    state.connection_closed(id);
                }
                Ok(ServerEvent::ReloadClients(configs)) => {
                    state.reconcile_clients(&configs);
                    ticks = tick_schedule(&state);
                }
                Ok(ServerEvent::Shutdown) | Err(_) => {
                    tracing::info!("state thread draining");
                    state.begin_drain_all();
                    return;
                }
            },
            recv(timer) -> _ => {
                let now = Instant::now();
                for tick in &mut ticks {
                    if tick.next <= now {
                        state.throughput_tick(tick.client_idx);
                        tick.next = now + tick.period;
                    }
                }
            }
        }
    }
}

/// Frame reassembly loop for one connection. The stream must carry a read
/// timeout so the shutdown flag is observed.
pub(super) fn run_reader<R: Read>(
    mut stream: R,
    id: ConnId,
    events: Sender<ServerEvent>,
    max_frame: u32,
    shutdown: Arc<AtomicBool>,
) {
    let mut decoder = FrameDecoder::new(max_frame);
    let mut buf = [0u8; 8192];

    'outer: while !shutdown.load(Ordering::Relaxed) {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::debug!(conn = id, %err, "read error");
                break;
            }
        };
        decoder.extend(&buf[..n]);
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    let sent = events.send(ServerEvent::Frame {
                        id,
                        seq: frame.seq,
                        payload: frame.payload,
                    });
                    if sent.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::warn!(conn = id, %err, "fatal framing error");
                    let header = decoder.pending_header().unwrap_or_default();
                    let _ = events.send(ServerEvent::Oversize { id, header });
                    break 'outer;
                }
            }
        }
    }
    let _ = events.send(ServerEvent::Closed { id });
}

/// Outbound flush loop for one connection; exits when the state thread drops
/// the sender or the peer goes away.
pub(super) fn run_writer<W: Write>(mut stream: W, frames: Receiver<Bytes>) {
    while let Ok(frame) = frames.recv() {
        if stream.write_all(&frame).is_err() {
            return;
        }
        if stream.flush().is_err() {
            return;
        }
    }
}

#[derive(Debug)]
pub enum ControlListener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

pub struct AcceptorConfig {
    pub max_frame: u32,
    pub outbound_queue_frames: usize,
}

/// Accept loop; spawns a reader and a writer thread per connection. Returns
/// when the shutdown flag is raised.
pub fn run_acceptor(
    listener: ControlListener,
    events: Sender<ServerEvent>,
    config: AcceptorConfig,
    shutdown: Arc<AtomicBool>,
) {
    let next_id = AtomicU64::new(1);
    match &listener {
        ControlListener::Unix(unix) => {
            if let Err(err) = unix.set_nonblocking(true) {
                tracing::error!(%err, "acceptor setup failed");
                return;
            }
        }
        ControlListener::Tcp(tcp) => {
            if let Err(err) = tcp.set_nonblocking(true) {
                tracing::error!(%err, "acceptor setup failed");
                return;
            }
        }
    }

    while !shutdown.load(Ordering::Relaxed) {
        let accepted: Option<std::io::Result<()>> = match &listener {
            ControlListener::Unix(unix) => match unix.accept() {
                Ok((stream, _)) => {
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    Some(setup_unix(stream, id, &events, &config, &shutdown))
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => None,
                Err(err) => Some(Err(err)),
            },
            ControlListener::Tcp(tcp) => match tcp.accept() {
                Ok((stream, addr)) => {
                    tracing::info!(%addr, "tcp control connection");
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    Some(setup_tcp(stream, id, &events, &config, &shutdown))
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => None,
                Err(err) => Some(Err(err)),
            },
        };
        match accepted {
            None => std::thread::sleep(Duration::from_millis(100)),
            Some(Ok(())) => {}
            Some(Err(err)) => tracing::error!(%err, "accept error"),
        }
    }
}

fn setup_unix(
    stream: std::os::unix::net::UnixStream,
    id: ConnId,
    events: &Sender<ServerEvent>,
    config: &AcceptorConfig,
    shutdown: &Arc<AtomicBool>,
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_millis(250)))?;
    let reader = stream.try_clone()?;
    spawn_connection(id, reader, stream, events, config, shutdown);
    Ok(())
}

fn setup_tcp(
    stream: std::net::TcpStream,
    id: ConnId,
    events: &Sender<ServerEvent>,
    config: &AcceptorConfig,
    shutdown: &Arc<AtomicBool>,
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_millis(250)))?;
    stream.set_nodelay(true)?;
    let reader = stream.try_clone()?;
    spawn_connection(id, reader, stream, events, config, shutdown);
    Ok(())
}

fn spawn_connection<R, W>(
    id: ConnId,
    reader: R,
    writer: W,
    events: &Sender<ServerEvent>,
    config: &AcceptorConfig,
    shutdown: &Arc<AtomicBool>,
) where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let (outbound_tx, outbound_rx) = bounded::<Bytes>(config.outbound_queue_frames.max(1));
    if events
        .send(ServerEvent::Opened {
            id,
            outbound: outbound_tx,
        })
        .is_err()
    {
        return;
    }
    std::thread::spawn(move || run_writer(writer, outbound_rx));

    let events = events.clone();
    let max_frame = config.max_frame;
    let shutdown = Arc::clone(shutdown);
    std::thread::spawn(move || run_reader(reader, id, events, max_frame, shutdown));
}
