//! Background tile decoding on a thread pool.
//!
//! The render thread submits coordinates, worker threads decode them out of the
//! shared raster, and the render thread drains finished tiles once per frame and
//! uploads them. Uploading stays on the render thread; only decoding moves off it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use dashmap::DashMap;
use tracing::warn;

use crate::coord::GridCoordinate;
use crate::decoder::{DecodedTile, TileDecoder, TileSource};
use crate::error::DecodeError;

/// A finished decode, successful or not.
#[derive(Debug)]
pub struct DecodeResult {
    pub coord: GridCoordinate,
    pub tile: Result<DecodedTile, DecodeError>,
    pub decode_time_us: u64,
}

struct DecodeTask {
    coord: GridCoordinate,
    cancelled: Arc<AtomicBool>,
}

/// Decodes tiles of one [`TileDecoder`] on worker threads.
///
/// Dropping the worker closes the task channel; threads exit once the queue
/// drains.
pub struct DecodeWorker {
    task_sender: Sender<DecodeTask>,
    result_receiver: Receiver<DecodeResult>,
    /// Cancellation flag per submitted coordinate.
    pending: Arc<DashMap<GridCoordinate, Arc<AtomicBool>>>,
    in_flight: Arc<AtomicUsize>,
}

impl DecodeWorker {
    /// Spawn `threads` workers (0 = derive from the CPU count) with room for
    /// `queue_capacity` queued tasks.
    pub fn new(decoder: TileDecoder, threads: usize, queue_capacity: usize) -> std::io::Result<Self> {
        let threads = if threads == 0 { default_thread_count() } else { threads };
        let (task_sender, task_receiver) = bounded::<DecodeTask>(queue_capacity.max(1));
        let (result_sender, result_receiver) = unbounded::<DecodeResult>();
        let in_flight = Arc::new(AtomicUsize::new(0));

        for index in 0..threads {
            let receiver = task_receiver.clone();
            let sender = result_sender.clone();
            let decoder = decoder.clone();
            let in_flight = Arc::clone(&in_flight);

            std::thread::Builder::new()
                .name(format!("tile-decode-{index}"))
                .spawn(move || {
                    while let Ok(task) = receiver.recv() {
                        if task.cancelled.load(Ordering::Relaxed) {
                            in_flight.fetch_sub(1, Ordering::Relaxed);
                            continue;
                        }

                        let start = std::time::Instant::now();
                        let tile = decoder.decode(task.coord);
                        let decode_time_us = start.elapsed().as_micros() as u64;

                        if !task.cancelled.load(Ordering::Relaxed) {
                            let _ = sender.send(DecodeResult {
                                coord: task.coord,
                                tile,
                                decode_time_us,
                            });
                        }
                        in_flight.fetch_sub(1, Ordering::Relaxed);
                    }
                })?;
        }

        Ok(Self {
            task_sender,
            result_receiver,
            pending: Arc::new(DashMap::new()),
            in_flight,
        })
    }

    /// Queue `coord` for decoding. Returns `false` if it is already pending or
    /// the queue is full; a full queue is retried on a later pass.
    pub fn submit(&self, coord: GridCoordinate) -> bool {
        if self.pending.contains_key(&coord) {
            return false;
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        self.pending.insert(coord, Arc::clone(&cancelled));
        self.in_flight.fetch_add(1, Ordering::Relaxed);

        match self.task_sender.try_send(DecodeTask { coord, cancelled }) {
            Ok(()) => true,
            Err(err) => {
                self.in_flight.fetch_sub(1, Ordering::Relaxed);
                self.pending.remove(&coord);
                if let TrySendError::Disconnected(_) = err {
                    warn!(%coord, "decode workers have stopped");
                }
                false
            }
        }
    }

    /// Drop a pending decode. No-op if it already finished.
    pub fn cancel(&self, coord: GridCoordinate) {
        if let Some((_, cancelled)) = self.pending.remove(&coord) {
            cancelled.store(true, Ordering::Relaxed);
        }
    }

    /// Take up to `max` finished decodes.
    pub fn drain(&self, max: usize) -> Vec<DecodeResult> {
        let mut results = Vec::new();
        while results.len() < max {
            let Ok(result) = self.result_receiver.try_recv() else {
                break;
            };
            if self.pending.remove(&result.coord).is_none() {
                // Cancelled after decoding finished.
                continue;
            }
            results.push(result);
        }
        results
    }

    pub fn is_pending(&self, coord: GridCoordinate) -> bool {
        self.pending.contains_key(&coord)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Tasks queued or executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

fn default_thread_count() -> usize {
    let cpus = num_cpus::get().max(2);
    (cpus - 1).clamp(1, 4)
}
