//! Finite streams: ordered queues with an explicit end-of-stream marker.
//!
//! The producer side never blocks. `enqueue` and `close` are plain locked
//! pushes so the delivery path can call them while dispatching. Consumers
//! suspend in [`FiniteStream::next`] until an item or the end marker shows
//! up.

use futures_util::stream::{self, Stream};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    #[error("attempted to enqueue onto a closed stream")]
    Closed,
    #[error("stream is at capacity ({capacity} items)")]
    Full { capacity: usize },
    #[error("attempted to dequeue past the end of a closed stream")]
    Exhausted,
}

/// `End` is the terminal marker. It is tagged separately from items so no
/// payload can ever be mistaken for it.
enum Slot<T> {
    Item(T),
    End,
}

struct StreamState<T> {
    queue: VecDeque<Slot<T>>,
    capacity: Option<usize>,
    closed: bool,
    /// Set once the end marker has been handed to a consumer.
    drained: bool,
    /// Items rejected because the stream was at capacity.
    dropped: usize,
}

struct Shared<T> {
    state: Mutex<StreamState<T>>,
    changed: Notify,
}

/// Cloning yields another handle onto the same queue.
pub struct FiniteStream<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for FiniteStream<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for FiniteStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for FiniteStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("FiniteStream")
            .field("queued", &state.queue.len())
            .field("capacity", &state.capacity)
            .field("closed", &state.closed)
            .field("drained", &state.drained)
            .field("dropped", &state.dropped)
            .finish()
    }
}

impl<T> FiniteStream<T> {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// A stream that rejects items beyond `capacity` pending entries.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    pub(crate) fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StreamState {
                    queue: VecDeque::new(),
                    capacity,
                    closed: false,
                    drained: false,
                    dropped: 0,
                }),
                changed: Notify::new(),
            }),
        }
    }

    pub fn enqueue(&self, item: T) -> Result<(), StreamError> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(StreamError::Closed);
            }
            if let Some(capacity) = state.capacity {
                if state.queue.len() >= capacity {
                    state.dropped += 1;
                    return Err(StreamError::Full { capacity });
                }
            }
            state.queue.push_back(Slot::Item(item));
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }

    /// Enqueue the end marker. Closing is irrevocable; a second close fails
    /// like any other enqueue after close. The marker never counts against
    /// capacity.
    pub fn close(&self) -> Result<(), StreamError> {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(StreamError::Closed);
            }
            state.queue.push_back(Slot::End);
            state.closed = true;
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// True once a consumer has observed the end of the stream.
    pub fn is_drained(&self) -> bool {
        self.shared.state.lock().drained
    }

    /// How many items a full stream has turned away. A consumer that sees a
    /// non-zero count knows the sequence it read has gaps.
    pub fn dropped(&self) -> usize {
        self.shared.state.lock().dropped
    }

    /// Items waiting to be consumed, not counting the end marker.
    pub fn len(&self) -> usize {
        let state = self.shared.state.lock();
        state
            .queue
            .iter()
            .filter(|slot| matches!(slot, Slot::Item(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn same_stream(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Next item in order.
    ///
    /// Returns `Ok(None)` exactly once, when the end marker is dequeued, and
    /// `Err(StreamError::Exhausted)` on any later call. With several
    /// consumers on one stream only one of them sees `Ok(None)`.
    pub async fn next(&self) -> Result<Option<T>, StreamError> {
        loop {
            let changed = self.shared.changed.notified();
            {
                let mut state = self.shared.state.lock();
                match state.queue.pop_front() {
                    Some(Slot::Item(item)) => return Ok(Some(item)),
                    Some(Slot::End) => {
                        state.drained = true;
                        drop(state);
                        self.shared.changed.notify_waiters();
                        return Ok(None);
                    }
                    None if state.drained => return Err(StreamError::Exhausted),
                    None => {}
                }
            }
            changed.await;
        }
    }

    /// Wait until the stream is closed and everything up to and including
    /// the end marker has been consumed.
    pub async fn join(&self) {
        loop {
            let changed = self.shared.changed.notified();
            if self.shared.state.lock().drained {
                return;
            }
            changed.await;
        }
    }

    /// Lazy, forward-only view of the remaining items. Ends at the end
    /// marker, which is never yielded.
    pub fn into_stream(self) -> impl Stream<Item = T> {
        stream::unfold(self, |stream| async move {
            match stream.next().await {
                Ok(Some(item)) => Some((item, stream)),
                Ok(None) | Err(_) => None,
            }
        })
    }
}
