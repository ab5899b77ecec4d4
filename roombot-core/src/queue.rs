// ABOUTME: Per-room FIFO action queues that serialize all state changes for a room.
// ABOUTME: One worker task drains a room's queue at a time; rooms never block each other.

use crate::error::QueueError;
use crate::metrics;
use crate::room::RoomIdentity;
use futures_util::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

type BoxedAction = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Default)]
struct RoomQueue {
    pending: VecDeque<BoxedAction>,
    running: bool,
}

/// Registry of every room's action queue.
///
/// Queues are created on first use and live for the rest of the process.
/// They are unbounded: nothing pushes back on a caller that enqueues faster
/// than the room worker drains.
#[derive(Clone, Default)]
pub struct RoomActionQueues {
    rooms: Arc<Mutex<HashMap<RoomIdentity, RoomQueue>>>,
}

impl RoomActionQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `action` to the room's queue and return a handle to its result.
    ///
    /// Actions for the same room run one at a time in submission order.
    pub fn enqueue<F, T>(&self, room: &RoomIdentity, action: F) -> ActionHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: BoxedAction = Box::pin(async move {
            // Receiver may have been dropped by a fire-and-forget caller
            let _ = tx.send(action.await);
        });

        let start_worker = {
            let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
            let queue = rooms.entry(room.clone()).or_default();
            queue.pending.push_back(job);
            if queue.running {
                false
            } else {
                queue.running = true;
                true
            }
        };

        if start_worker {
            let queues = self.clone();
            let room = room.clone();
            tokio::spawn(async move {
                queues.drain(room).await;
            });
        }

        ActionHandle {
            room: room.ident(),
            rx,
        }
    }

    async fn drain(&self, room: RoomIdentity) {
        tracing::trace!(room = %room, "Room worker started");
        loop {
            let next = {
                let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
                let queue = rooms.entry(room.clone()).or_default();
                match queue.pending.pop_front() {
                    Some(job) => job,
                    None => {
                        queue.running = false;
                        break;
                    }
                }
            };

            let started = std::time::Instant::now();
            if AssertUnwindSafe(next).catch_unwind().await.is_err() {
                tracing::error!(room = %room, "Queued room action panicked");
            }
            metrics::record_queue_action_duration(started.elapsed().as_secs_f64());
        }
        tracing::trace!(room = %room, "Room worker idle");
    }

    /// Number of actions waiting (not counting the one running)
    pub fn pending_len(&self, room: &RoomIdentity) -> usize {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms.get(room).map(|q| q.pending.len()).unwrap_or(0)
    }

    /// Whether a worker is currently draining the room's queue
    pub fn is_running(&self, room: &RoomIdentity) -> bool {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms.get(room).map(|q| q.running).unwrap_or(false)
    }

    /// Rooms that have ever had an action queued
    pub fn known_rooms(&self) -> Vec<RoomIdentity> {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let mut known: Vec<RoomIdentity> = rooms.keys().cloned().collect();
        known.sort();
        known
    }
}

/// Resolves to the queued action's output once the room worker has run it
pub struct ActionHandle<T> {
    room: String,
    rx: oneshot::Receiver<T>,
}

impl<T> Future for ActionHandle<T> {
    type Output = Result<T, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let room = self.room.clone();
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| QueueError { room }))
    }
}
