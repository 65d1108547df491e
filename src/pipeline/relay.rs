//! Packet fan-out from the inbound track to the encoder sinks

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use super::EncoderRole;
use super::health::RelayHealth;
use super::sink::UnitSink;
use crate::error::{SinkWriteError, TrackError};
use crate::utils::helpers::{SendResult, try_send};

/// Failed writes are logged on the first failure and then every N-th.
const SINK_FAILURE_LOG_EVERY: u64 = 500;

/// Blocking source of media units; an error terminates the sequence.
#[async_trait]
pub trait UnitSource: Send + Sync {
    async fn read_unit(&self) -> Result<Bytes, TrackError>;
}

/// Fires once, on the first unit relayed after the sink was attached.
pub type ReadinessReceiver = mpsc::Receiver<()>;

struct SinkSlot {
    sink: Arc<dyn UnitSink>,
    primed: AtomicBool,
    ready_tx: mpsc::Sender<()>,
    failures: AtomicU64,
}

/// Duplicates every unit of the inbound track to the attached sinks.
///
/// The slot table is behind an async `RwLock`: the relay holds a read guard
/// while a unit is written, `detach` takes the write guard. Once `detach`
/// returns, the detached sink receives nothing more.
pub struct RelayFanout {
    slots: RwLock<[Option<SinkSlot>; 2]>,
    has_data: AtomicBool,
    generation: AtomicU64,
    health: Arc<RelayHealth>,
}

impl RelayFanout {
    pub fn new(health: Arc<RelayHealth>) -> Self {
        Self {
            slots: RwLock::new([None, None]),
            has_data: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            health,
        }
    }

    pub fn health(&self) -> &Arc<RelayHealth> {
        &self.health
    }

    /// Attach (or replace) the sink for `role` and arm its readiness latch.
    pub async fn attach(&self, role: EncoderRole, sink: Arc<dyn UnitSink>) -> ReadinessReceiver {
        let (ready_tx, ready_rx) = mpsc::channel(1);
        info!("Relay: attaching {} sink {}", role, sink.describe());

        self.slots.write().await[role.index()] = Some(SinkSlot {
            sink,
            primed: AtomicBool::new(false),
            ready_tx,
            failures: AtomicU64::new(0),
        });

        ready_rx
    }

    /// Detach the sink for `role`. Returns whether one was attached.
    pub async fn detach(&self, role: EncoderRole) -> bool {
        let removed = self.slots.write().await[role.index()].take();
        if let Some(slot) = &removed {
            info!(
                "Relay: detached {} sink {} ({} failed writes)",
                role,
                slot.sink.describe(),
                slot.failures.load(Ordering::Relaxed)
            );
        }
        removed.is_some()
    }

    pub async fn is_attached(&self, role: EncoderRole) -> bool {
        self.slots.read().await[role.index()].is_some()
    }

    /// Start a new relay session: resets the data-flow flag and returns the
    /// generation the session's `run` must be called with.
    pub fn begin_session(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.has_data.store(false, Ordering::Release);
        generation
    }

    /// Whether a unit was observed during the current session
    pub fn has_data(&self) -> bool {
        self.has_data.load(Ordering::Acquire)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Relay units until the source terminates or the session is cancelled.
    ///
    /// Returns the number of units read.
    pub async fn run(
        &self,
        generation: u64,
        source: Arc<dyn UnitSource>,
        cancel: CancellationToken,
    ) -> u64 {
        info!("Relay: session {} started", generation);
        let mut relayed = 0u64;

        loop {
            let unit = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Relay: session {} cancelled", generation);
                    break;
                }
                result = source.read_unit() => match result {
                    Ok(unit) => unit,
                    Err(TrackError::Ended) => {
                        info!("Relay: track of session {} ended", generation);
                        break;
                    }
                    Err(e) => {
                        warn!("Relay: session {} terminated: {}", generation, e);
                        break;
                    }
                }
            };

            if unit.is_empty() {
                continue;
            }

            if self.is_current(generation) && !self.has_data.swap(true, Ordering::AcqRel) {
                info!("Relay: first packet received ({} bytes)", unit.len());
            }

            self.health.record_unit(unit.len());
            self.fan_out(&unit).await;
            relayed += 1;
        }

        if self.is_current(generation) {
            self.has_data.store(false, Ordering::Release);
        }

        info!("Relay: session {} finished after {} packets", generation, relayed);
        relayed
    }

    async fn fan_out(&self, unit: &[u8]) {
        let slots = self.slots.read().await;

        for (role, slot) in EncoderRole::ALL.iter().zip(slots.iter()) {
            let Some(slot) = slot else {
                continue;
            };

            if let Err(source) = slot.sink.send_unit(unit).await {
                self.health.record_sink_failure();
                let failures = slot.failures.fetch_add(1, Ordering::Relaxed);
                if failures % SINK_FAILURE_LOG_EVERY == 0 {
                    warn!(
                        "Relay: {} (failure #{})",
                        SinkWriteError { role: *role, source },
                        failures + 1
                    );
                }
            }

            if !slot.primed.swap(true, Ordering::AcqRel) {
                match try_send(&slot.ready_tx, ()) {
                    SendResult::Sent => debug!("Relay: {} sink is ready", role),
                    SendResult::Full | SendResult::Closed => {}
                }
            }
        }
    }
}
