//! Command ingress - the only producer/consumer structure in the core.
//!
//! Presentation layers submit [`RawCommand`]s from any thread through a
//! [`CommandSender`]. Once per tick the bridge drains everything queued and
//! stamps each command with `(tick, sequence)`.
//!
//! Each sender carries an origin id and a local submission counter. Ingress
//! sorts a drained batch by `(origin, local order)` before assigning global
//! sequence numbers, so the stamped order depends only on what was
//! submitted, never on how producers interleaved.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tickview_env::{EntityRef, Tick};
use tracing::{debug, warn};

use crate::arbitration::Intent;
use crate::ids::ActionId;
use crate::value::PropertyValue;

/// Overflow warnings are logged for the first event and then every N-th.
const OVERFLOW_LOG_EVERY: u64 = 64;

/// What a presentation layer sends. Carries no time information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawCommand {
    pub action: ActionId,
    pub target: Option<EntityRef>,
    pub payload: PropertyValue,
}

impl RawCommand {
    pub fn new(action: ActionId) -> Self {
        Self {
            action,
            target: None,
            payload: PropertyValue::Empty,
        }
    }

    pub fn with_target(mut self, target: EntityRef) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<PropertyValue>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// A command after ingress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StampedCommand {
    pub tick: Tick,
    pub sequence: u64,
    pub origin: u32,
    pub action: ActionId,
    pub target: Option<EntityRef>,
    pub payload: PropertyValue,
}

impl StampedCommand {
    /// The command as an arbitration candidate.
    pub fn intent(&self) -> Intent {
        Intent {
            action: self.action,
            target: self.target,
            payload: self.payload,
        }
    }
}

/// Behavior when a submit finds the queue full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued command to make room.
    #[default]
    DropOldest,
    /// Refuse the incoming command; the queue is untouched.
    RejectNewest,
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowPolicy::DropOldest => f.write_str("drop_oldest"),
            OverflowPolicy::RejectNewest => f.write_str("reject_newest"),
        }
    }
}

/// Result of one submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    Queued,
    /// Queued after evicting the oldest command
    QueuedAfterDrop,
    /// Refused under [`OverflowPolicy::RejectNewest`]
    Rejected,
}

/// Counters shared by the channel and all of its senders.
#[derive(Debug, Default)]
pub struct ChannelStats {
    submitted: AtomicU64,
    dropped_oldest: AtomicU64,
    rejected_newest: AtomicU64,
    drained: AtomicU64,
}

/// Point-in-time copy of [`ChannelStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStatsSnapshot {
    pub submitted: u64,
    pub dropped_oldest: u64,
    pub rejected_newest: u64,
    pub drained: u64,
}

impl ChannelStats {
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dropped_oldest: self.dropped_oldest.load(Ordering::Relaxed),
            rejected_newest: self.rejected_newest.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct Envelope {
    origin: u32,
    local_seq: u64,
    command: RawCommand,
}

/// Bounded FIFO between presentation producers and the tick loop.
pub struct CommandChannel {
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    policy: OverflowPolicy,
    capacity: usize,
    next_origin: AtomicU32,
    next_sequence: u64,
    stats: Arc<ChannelStats>,
}

impl CommandChannel {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            policy,
            capacity,
            next_origin: AtomicU32::new(0),
            next_sequence: 0,
            stats: Arc::new(ChannelStats::default()),
        }
    }

    /// Creates a producer handle with a fresh origin id.
    ///
    /// Origins are handed out in creation order, and a lower origin drains
    /// first within a tick. Create higher-priority manual sources first.
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            origin: self.next_origin.fetch_add(1, Ordering::Relaxed),
            local: AtomicU64::new(0),
            policy: self.policy,
            stats: Arc::clone(&self.stats),
        }
    }

    /// Takes every command queued right now and stamps it for `tick`.
    ///
    /// Commands submitted while the drain runs wait for the next tick.
    /// The batch is ordered by `(origin, local_seq)` and not by arrival, so
    /// the origin id acts as a manual-source priority: when two senders both
    /// submit a valid action in one tick, the lower origin's command wins
    /// arbitration.
    pub fn drain(&mut self, tick: Tick) -> Vec<StampedCommand> {
        let queued = self.rx.len();
        let mut batch: Vec<Envelope> = Vec::with_capacity(queued);
        for _ in 0..queued {
            match self.rx.try_recv() {
                Ok(envelope) => batch.push(envelope),
                Err(_) => break,
            }
        }
        batch.sort_by_key(|e| (e.origin, e.local_seq));

        let stamped: Vec<StampedCommand> = batch
            .into_iter()
            .map(|e| {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                StampedCommand {
                    tick,
                    sequence,
                    origin: e.origin,
                    action: e.command.action,
                    target: e.command.target,
                    payload: e.command.payload,
                }
            })
            .collect();

        self.stats
            .drained
            .fetch_add(stamped.len() as u64, Ordering::Relaxed);
        if !stamped.is_empty() {
            debug!("Tick {}: drained {} command(s)", tick, stamped.len());
        }
        stamped
    }

    /// Commands currently waiting.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Producer handle. `Send + Sync`; callable without coordinating with the
/// tick loop.
pub struct CommandSender {
    tx: Sender<Envelope>,
    /// Used to evict under drop-oldest
    rx: Receiver<Envelope>,
    origin: u32,
    local: AtomicU64,
    policy: OverflowPolicy,
    stats: Arc<ChannelStats>,
}

impl CommandSender {
    pub fn origin(&self) -> u32 {
        self.origin
    }

    pub fn submit(&self, command: RawCommand) -> SubmitStatus {
        let envelope = Envelope {
            origin: self.origin,
            local_seq: self.local.fetch_add(1, Ordering::Relaxed),
            command,
        };
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);

        let mut envelope = match self.tx.try_send(envelope) {
            Ok(()) => return SubmitStatus::Queued,
            Err(TrySendError::Full(envelope)) => envelope,
            Err(TrySendError::Disconnected(_)) => return self.reject(),
        };

        match self.policy {
            OverflowPolicy::RejectNewest => self.reject(),
            OverflowPolicy::DropOldest => loop {
                if self.rx.try_recv().is_ok() {
                    let dropped = self.stats.dropped_oldest.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 || dropped % OVERFLOW_LOG_EVERY == 0 {
                        warn!(
                            "Command queue full: dropped oldest command ({} dropped so far)",
                            dropped
                        );
                    }
                }
                envelope = match self.tx.try_send(envelope) {
                    Ok(()) => return SubmitStatus::QueuedAfterDrop,
                    Err(TrySendError::Full(envelope)) => envelope,
                    Err(TrySendError::Disconnected(_)) => return self.reject(),
                };
            },
        }
    }

    fn reject(&self) -> SubmitStatus {
        let rejected = self.stats.rejected_newest.fetch_add(1, Ordering::Relaxed) + 1;
        if rejected == 1 || rejected % OVERFLOW_LOG_EVERY == 0 {
            warn!(
                "Command queue full: rejected newest command ({} rejected so far)",
                rejected
            );
        }
        SubmitStatus::Rejected
    }
}
