//! Worker runtime and network handling for the Raft adapter.
//!
//! - **Worker thread**: owns the [`RaftNode`], ticks it, resolves proposals
//! - **Network listener thread**: accepts TCP connections from peers until
//!   the worker exits
//! - **Connection handler threads**: read one message and forward it to the worker
//!
//! Threads talk over crossbeam channels so the Raft state stays
//! single-threaded. Committed payloads and the current leader are published
//! through shared state, so reads never wait on the worker.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ::raft::prelude::Message;
use ::raft::StateRole;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use prost::Message as ProstMessage;
use tracing::{debug, info, warn};

use super::node::{CommittedLog, ProposalOutcome, RaftNode};
use crate::consensus::{ConsensusService, LogEntry, ReplicaId, Submission};
use crate::errors::ConsensusError;

/// Raft logical clock interval; election and heartbeat timeouts are in ticks.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// How long the idle listener sleeps between checks for a stopped worker.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Largest peer frame accepted. Raft messages are batched by
/// `max_inflight_msgs` and stay far below this.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Replica ids are address-book positions; Raft reserves id 0 for "none".
fn raft_id(replica: ReplicaId) -> u64 {
    replica + 1
}

fn replica_id(raft_id: u64) -> Option<ReplicaId> {
    raft_id.checked_sub(1)
}

/// Identity and reachability of one Raft replica.
pub struct RaftConfig {
    /// This replica's position in `peers`.
    pub replica: ReplicaId,
    /// Peer addresses for Raft traffic, indexed by replica id.
    pub peers: Vec<String>,
    /// Upper bound on how long `submit` waits for a commit.
    pub submit_timeout: Duration,
}

/// Handle to a running Raft worker.
///
/// Cloning is cheap; every clone talks to the same worker.
#[derive(Clone)]
pub struct RaftHandle {
    request_tx: Sender<WorkerRequest>,
    committed: CommittedLog,
    leader: Arc<AtomicU64>,
    submit_timeout: Duration,
}

impl RaftHandle {
    /// Forces this replica to start an election.
    pub fn campaign(&self) -> Result<()> {
        let (resp_tx, resp_rx) = bounded(1);
        self.request_tx
            .send(WorkerRequest::Campaign {
                respond_to: resp_tx,
            })
            .context("failed to send campaign request")?;
        resp_rx.recv().context("campaign response channel closed")?
    }

    /// Signals the worker to stop. Pending submissions fail as unavailable.
    ///
    /// Returns once the request is queued. The worker exits on its next loop
    /// iteration and the peer listener releases its port shortly after.
    pub fn shutdown(&self) -> Result<()> {
        self.request_tx
            .send(WorkerRequest::Shutdown)
            .context("failed to send shutdown")?;
        Ok(())
    }
}

impl ConsensusService for RaftHandle {
    fn submit(&self, payload: Vec<u8>) -> Result<Submission, ConsensusError> {
        let (resp_tx, resp_rx) = bounded(1);
        self.request_tx
            .send(WorkerRequest::Propose {
                data: payload,
                respond_to: resp_tx,
            })
            .map_err(|_| ConsensusError::Unavailable("raft worker has stopped".into()))?;
        match resp_rx.recv_timeout(self.submit_timeout) {
            Ok(submission) => Ok(submission),
            Err(RecvTimeoutError::Timeout) => Err(ConsensusError::Timeout(self.submit_timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ConsensusError::Unavailable(
                "raft worker dropped the submission".into(),
            )),
        }
    }

    fn retrieve(&self, from: u64) -> Result<Vec<LogEntry>, ConsensusError> {
        Ok(self
            .committed
            .read_from(from)
            .into_iter()
            .map(|(position, payload)| LogEntry { position, payload })
            .collect())
    }

    fn current_leader(&self) -> Option<ReplicaId> {
        replica_id(self.leader.load(Ordering::Acquire))
    }
}

enum WorkerRequest {
    Propose {
        data: Vec<u8>,
        respond_to: Sender<Submission>,
    },
    Campaign {
        respond_to: Sender<Result<()>>,
    },
    Shutdown,
}

/// Starts a Raft replica and returns a handle implementing
/// [`ConsensusService`].
///
/// Binds the peer listener before returning, so an address already in use
/// is reported here rather than from a background thread.
pub fn spawn_raft(config: RaftConfig) -> Result<RaftHandle> {
    let replica = config.replica;
    let listen_addr = config
        .peers
        .get(replica as usize)
        .cloned()
        .ok_or_else(|| anyhow!("replica {replica} missing from peer list"))?;

    let peers: HashMap<u64, String> = config
        .peers
        .iter()
        .enumerate()
        .map(|(pos, addr)| (raft_id(pos as u64), addr.clone()))
        .collect();
    let mut voters: Vec<u64> = peers.keys().copied().collect();
    voters.sort_unstable();

    let committed = CommittedLog::new();
    let node = RaftNode::new(raft_id(replica), &voters, committed.clone())?;
    let leader = Arc::new(AtomicU64::new(0));
    let (client_tx, client_rx) = unbounded();
    let (network_tx, network_rx) = unbounded();

    let stopped = Arc::new(AtomicBool::new(false));

    let listener = TcpListener::bind(&listen_addr)
        .with_context(|| format!("failed to bind raft listener on {listen_addr}"))?;
    spawn_network_listener(listener, listen_addr, network_tx, Arc::clone(&stopped))?;

    let worker = Worker::new(
        node,
        peers,
        client_rx,
        network_rx,
        Arc::clone(&leader),
        config.submit_timeout,
    );
    thread::Builder::new()
        .name(format!("raft-worker-{replica}"))
        .spawn(move || {
            let mut worker = worker;
            if let Err(err) = worker.run() {
                warn!(replica, error = ?err, "raft worker crashed");
            }
            stopped.store(true, Ordering::Release);
            info!(replica, "raft worker stopped");
        })
        .context("failed to spawn raft worker")?;

    Ok(RaftHandle {
        request_tx: client_tx,
        committed,
        leader,
        submit_timeout: config.submit_timeout,
    })
}

/// A submission waiting for its Raft index to resolve.
///
/// `deadline` mirrors the caller's `submit_timeout`. Once it passes the
/// caller has stopped listening, so the entry is dropped on the next tick
/// instead of waiting for an index that may never resolve (for example when
/// the leader has lost its quorum).
struct PendingProposal {
    respond_to: Sender<Submission>,
    deadline: Instant,
}

/// Runs the Raft event loop.
///
/// Each iteration waits for a client request or peer message (bounded by
/// the time left until the next tick), ticks if due, then drains every
/// ready state the node has produced.
///
/// The worker is the only owner of the [`RaftNode`]. Everything other
/// threads observe goes through three outputs:
///
/// - the [`CommittedLog`] the node appends to while applying entries
/// - the `leader` atomic, refreshed after every iteration
/// - per-proposal reply channels held in `pending`, keyed by Raft index
struct Worker {
    node: RaftNode,
    peers: HashMap<u64, String>,
    client_rx: Receiver<WorkerRequest>,
    network_rx: Receiver<Message>,
    leader: Arc<AtomicU64>,
    pending: HashMap<u64, PendingProposal>,
    submit_timeout: Duration,
    last_role: StateRole,
}

impl Worker {
    fn new(
        node: RaftNode,
        peers: HashMap<u64, String>,
        client_rx: Receiver<WorkerRequest>,
        network_rx: Receiver<Message>,
        leader: Arc<AtomicU64>,
        submit_timeout: Duration,
    ) -> Self {
        let last_role = node.role();
        Self {
            node,
            peers,
            client_rx,
            network_rx,
            leader,
            pending: HashMap::new(),
            submit_timeout,
            last_role,
        }
    }

    fn run(&mut self) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            let timeout = TICK_INTERVAL
                .checked_sub(last_tick.elapsed())
                .unwrap_or(Duration::from_secs(0));

            crossbeam_channel::select! {
                recv(self.client_rx) -> req => {
                    match req {
                        Ok(req) => {
                            if !self.handle_request(req)? {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                recv(self.network_rx) -> msg => {
                    match msg {
                        Ok(msg) => {
                            let from = msg.from;
                            if let Err(err) = self.node.step(msg) {
                                debug!(peer = from, error = ?err, "dropped peer message");
                            }
                        }
                        Err(_) => break,
                    }
                }
                default(timeout) => {}
            }

            if last_tick.elapsed() >= TICK_INTERVAL {
                self.node.tick();
                last_tick = Instant::now();
                self.prune_expired(last_tick);
            }

            self.process_ready()?;
            self.publish_leader();
        }
        Ok(())
    }

    /// Returns `false` once shutdown is requested.
    fn handle_request(&mut self, req: WorkerRequest) -> Result<bool> {
        match req {
            WorkerRequest::Propose { data, respond_to } => match self.node.propose(data) {
                Ok(Some(index)) => {
                    debug!(index, "proposal appended");
                    self.pending.insert(
                        index,
                        PendingProposal {
                            respond_to,
                            deadline: Instant::now() + self.submit_timeout,
                        },
                    );
                }
                Ok(None) => {
                    let _ = respond_to.send(Submission::rejected(self.leader_replica()));
                }
                Err(err) => {
                    warn!(error = ?err, "proposal failed");
                    let _ = respond_to.send(Submission::rejected(self.leader_replica()));
                }
            },
            WorkerRequest::Campaign { respond_to } => {
                let _ = respond_to.send(self.node.campaign());
            }
            WorkerRequest::Shutdown => return Ok(false),
        }
        Ok(true)
    }

    fn process_ready(&mut self) -> Result<()> {
        while let Some(bundle) = self.node.poll_ready()? {
            for msg in bundle.messages {
                self.dispatch_message(msg)?;
            }
            for outcome in bundle.resolved {
                self.resolve(outcome);
            }
        }
        Ok(())
    }

    /// Messages addressed to this node are stepped locally; others go over TCP.
    fn dispatch_message(&mut self, msg: Message) -> Result<()> {
        if msg.to == self.node.id() {
            self.node.step(msg)?;
            return Ok(());
        }
        let to = msg.to;
        let Some(addr) = self.peers.get(&to) else {
            warn!(peer = to, "no address for peer, dropping message");
            return Ok(());
        };
        send_message(addr, &msg);
        Ok(())
    }

    /// Answers the submission waiting on `outcome.index`, if any.
    ///
    /// A committed outcome is an acceptance. An index won by another term's
    /// entry means this replica lost leadership before the proposal
    /// committed, so the caller is rejected with the current leader hint and
    /// redirects there. Outcomes with no waiter (already pruned, or proposed
    /// before a restart of the caller) are ignored.
    fn resolve(&mut self, outcome: ProposalOutcome) {
        let Some(PendingProposal { respond_to, .. }) = self.pending.remove(&outcome.index) else {
            return;
        };
        let leader = self.leader_replica();
        let submission = if outcome.committed {
            Submission::accepted(leader)
        } else {
            info!(index = outcome.index, "proposal superseded by a newer term");
            Submission::rejected(leader)
        };
        let _ = respond_to.send(submission);
    }

    /// Drops submissions whose caller has already timed out.
    fn prune_expired(&mut self, now: Instant) {
        let before = self.pending.len();
        self.pending.retain(|_, pending| pending.deadline > now);
        let pruned = before - self.pending.len();
        if pruned > 0 {
            debug!(pruned, "dropped expired proposals");
        }
    }

    fn leader_replica(&self) -> Option<ReplicaId> {
        replica_id(self.node.leader_id())
    }

    fn publish_leader(&mut self) {
        self.leader.store(self.node.leader_id(), Ordering::Release);

        let current = self.node.role();
        if current != self.last_role {
            info!(
                raft_id = self.node.id(),
                term = self.node.term(),
                leader = ?self.leader_replica(),
                "role changed {:?} -> {:?}",
                self.last_role,
                current
            );
            self.last_role = current;
        }
    }
}

/// Accepts peer connections, one short-lived thread per connection.
///
/// The listener is non-blocking so the thread can notice `stopped` and drop
/// the socket, releasing the port once the worker has exited.
fn spawn_network_listener(
    listener: TcpListener,
    addr: String,
    tx: Sender<Message>,
    stopped: Arc<AtomicBool>,
) -> Result<()> {
    listener
        .set_nonblocking(true)
        .context("failed to make raft listener non-blocking")?;
    thread::Builder::new()
        .name(format!("raft-net-listener-{addr}"))
        .spawn(move || {
            while !stopped.load(Ordering::Acquire) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let tx = tx.clone();
                        thread::spawn(move || {
                            if let Err(err) = handle_connection(stream, tx) {
                                debug!(error = %err, "peer connection error");
                            }
                        });
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_POLL_INTERVAL);
                    }
                    Err(err) => warn!(error = %err, "accept error"),
                }
            }
            debug!(addr = %addr, "raft listener stopped");
        })
        .map(|_| ())
        .context("failed to spawn network listener")
}

fn handle_connection(mut stream: TcpStream, tx: Sender<Message>) -> io::Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    let msg = read_frame(&mut stream)?;
    tx.send(msg)
        .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "worker gone"))?;
    Ok(())
}

/// Reads one length-prefixed message: a big-endian `u32` length followed by
/// the protobuf-encoded `Message`.
///
/// The length comes from the peer, so it is checked against
/// [`MAX_FRAME_LEN`] before anything is allocated.
fn read_frame<R: Read>(reader: &mut R) -> io::Result<Message> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"),
        ));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Message::decode(&buf[..]).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

/// Fire-and-forget send over a fresh connection; Raft retransmits on loss.
fn send_message(addr: &str, msg: &Message) {
    let bytes = msg.encode_to_vec();
    if let Err(err) = try_send(addr, &bytes) {
        debug!(peer = addr, error = %err, "failed to send raft message");
    }
}

fn try_send(addr: &str, bytes: &[u8]) -> io::Result<()> {
    let mut stream = TcpStream::connect(addr)?;
    let len = bytes.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(bytes)?;
    Ok(())
}
