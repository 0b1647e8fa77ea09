use super::stream::{FiniteStream, StreamError};
use crate::channels::ChannelKind;
use crate::message::{Envelope, Predicate};
use futures_util::stream::{self, Stream};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{channel} registry never issued waiter {waiter} for `{causation_id}`")]
    UnknownWaiter {
        channel: ChannelKind,
        causation_id: String,
        waiter: u64,
    },
    #[error("{channel} waiter for `{causation_id}` was cancelled before it resolved")]
    Cancelled {
        channel: ChannelKind,
        causation_id: String,
    },
}

/// Identifies one registered waiter: the registry that issued it, the
/// causation id it listens on and a per-registry sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WaiterKey {
    registry: u64,
    causation_id: String,
    waiter: u64,
}

impl WaiterKey {
    pub fn causation_id(&self) -> &str {
        &self.causation_id
    }

    pub fn waiter(&self) -> u64 {
        self.waiter
    }
}

enum WaiterKind {
    Promise(oneshot::Sender<Arc<Envelope>>),
    Latch(oneshot::Sender<()>),
    Stream {
        stream: FiniteStream<Arc<Envelope>>,
        close_predicate: Predicate,
    },
}

impl WaiterKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Promise(_) => "promise",
            Self::Latch(_) => "latch",
            Self::Stream { .. } => "stream",
        }
    }
}

struct Waiter {
    id: u64,
    predicate: Predicate,
    kind: WaiterKind,
}

/// Result of offering one envelope to one waiter.
struct Offer {
    matched: bool,
    pending: Option<Waiter>,
}

impl Waiter {
    fn offer(self, envelope: &Arc<Envelope>, channel: ChannelKind) -> Offer {
        let Waiter {
            id,
            predicate,
            kind,
        } = self;

        match kind {
            WaiterKind::Promise(sender) => {
                // Handle dropped: nobody can observe this waiter any more.
                if sender.is_closed() {
                    return Offer {
                        matched: false,
                        pending: None,
                    };
                }
                if predicate.evaluate(envelope) {
                    tracing::debug!(%channel, waiter = id, msg_type = envelope.msg_type(), "promise resolved");
                    let _ = sender.send(Arc::clone(envelope));
                    return Offer {
                        matched: true,
                        pending: None,
                    };
                }
                Offer {
                    matched: false,
                    pending: Some(Waiter {
                        id,
                        predicate,
                        kind: WaiterKind::Promise(sender),
                    }),
                }
            }
            WaiterKind::Latch(sender) => {
                if sender.is_closed() {
                    return Offer {
                        matched: false,
                        pending: None,
                    };
                }
                if predicate.evaluate(envelope) {
                    tracing::debug!(%channel, waiter = id, msg_type = envelope.msg_type(), "latch set");
                    let _ = sender.send(());
                    return Offer {
                        matched: true,
                        pending: None,
                    };
                }
                Offer {
                    matched: false,
                    pending: Some(Waiter {
                        id,
                        predicate,
                        kind: WaiterKind::Latch(sender),
                    }),
                }
            }
            WaiterKind::Stream {
                stream,
                close_predicate,
            } => {
                // Match and close are evaluated independently; one envelope
                // may do both.
                let matched = predicate.evaluate(envelope);
                if matched {
                    if let Err(error) = stream.enqueue(Arc::clone(envelope)) {
                        tracing::warn!(%channel, waiter = id, %error, "dropping envelope for stream waiter");
                    }
                }
                if close_predicate.evaluate(envelope) {
                    tracing::debug!(%channel, waiter = id, msg_type = envelope.msg_type(), "stream closed");
                    if let Err(error) = stream.close() {
                        tracing::warn!(%channel, waiter = id, %error, "stream waiter was already closed");
                    }
                    return Offer {
                        matched,
                        pending: None,
                    };
                }
                Offer {
                    matched,
                    pending: Some(Waiter {
                        id,
                        predicate,
                        kind: WaiterKind::Stream {
                            stream,
                            close_predicate,
                        },
                    }),
                }
            }
        }
    }
}

/// Per-channel table of pending waiters keyed by causation id.
///
/// Registration, unregistration and dispatch each take the table lock
/// once and never await while holding it. Predicates run under the lock,
/// so they must not call back into the registry.
pub struct Registry {
    id: u64,
    channel: ChannelKind,
    next_waiter: AtomicU64,
    stream_capacity: Option<usize>,
    waiters: Mutex<HashMap<String, Vec<Waiter>>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("channel", &self.channel)
            .field("causation_ids", &self.waiters.lock().len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(channel: ChannelKind) -> Arc<Self> {
        Self::with_stream_capacity(channel, None)
    }

    /// `stream_capacity` bounds every stream this registry hands out.
    pub fn with_stream_capacity(channel: ChannelKind, stream_capacity: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            channel,
            next_waiter: AtomicU64::new(0),
            stream_capacity,
            waiters: Mutex::new(HashMap::new()),
        })
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    pub fn register_promise(self: &Arc<Self>, causation_id: impl Into<String>, predicate: Predicate) -> Promise {
        let (sender, receiver) = oneshot::channel();
        let key = self.insert(causation_id.into(), predicate, WaiterKind::Promise(sender));
        Promise {
            key,
            channel: self.channel,
            receiver,
            registry: Arc::downgrade(self),
            outcome: None,
        }
    }

    pub fn register_latch(self: &Arc<Self>, causation_id: impl Into<String>, predicate: Predicate) -> Latch {
        let (sender, receiver) = oneshot::channel();
        let key = self.insert(causation_id.into(), predicate, WaiterKind::Latch(sender));
        Latch {
            key,
            channel: self.channel,
            receiver,
            registry: Arc::downgrade(self),
            set: false,
            settled: false,
        }
    }

    /// Register a stream waiter. Envelopes matching `match_predicate` are
    /// enqueued in dispatch order; the first envelope matching
    /// `close_predicate` closes the stream and removes the waiter.
    pub fn register_stream(
        self: &Arc<Self>,
        causation_id: impl Into<String>,
        match_predicate: Predicate,
        close_predicate: Predicate,
    ) -> StreamSubscription {
        let stream = FiniteStream::with_capacity(self.stream_capacity);
        let key = self.insert(
            causation_id.into(),
            match_predicate,
            WaiterKind::Stream {
                stream: stream.clone(),
                close_predicate,
            },
        );
        StreamSubscription {
            key,
            stream,
            registry: Arc::downgrade(self),
        }
    }

    /// Remove a waiter before it fires.
    ///
    /// Returns `Ok(false)` when the waiter already fired or was removed, and
    /// an error for keys this registry never issued.
    pub fn unregister(&self, key: &WaiterKey) -> Result<bool, RegistryError> {
        if key.registry != self.id || key.waiter >= self.next_waiter.load(Ordering::Acquire) {
            return Err(RegistryError::UnknownWaiter {
                channel: self.channel,
                causation_id: key.causation_id.clone(),
                waiter: key.waiter,
            });
        }

        let mut waiters = self.waiters.lock();
        let Some(pending) = waiters.get_mut(&key.causation_id) else {
            return Ok(false);
        };
        let Some(position) = pending.iter().position(|waiter| waiter.id == key.waiter) else {
            return Ok(false);
        };
        let removed = pending.remove(position);
        if pending.is_empty() {
            waiters.remove(&key.causation_id);
        }
        drop(waiters);

        tracing::debug!(
            channel = %self.channel,
            causation_id = %key.causation_id,
            waiter = key.waiter,
            kind = removed.kind.name(),
            "waiter unregistered"
        );
        Ok(true)
    }

    /// Offer one inbound envelope to every waiter on its causation id.
    ///
    /// Every matching waiter fires, not just the first. Waiters that reach
    /// a terminal state are removed, and the causation id entry goes away
    /// with its last waiter. Envelopes without a causation id, or for ids
    /// nobody waits on, are ignored. Returns how many waiters matched.
    pub fn dispatch(&self, envelope: &Arc<Envelope>) -> usize {
        let Some(causation_id) = envelope.causation_id() else {
            tracing::trace!(channel = %self.channel, msg_type = envelope.msg_type(), "unsolicited envelope");
            return 0;
        };

        let mut waiters = self.waiters.lock();
        let Some(pending) = waiters.get_mut(causation_id) else {
            tracing::trace!(channel = %self.channel, causation_id, msg_type = envelope.msg_type(), "no waiters");
            return 0;
        };

        let mut matched = 0;
        let mut survivors = Vec::with_capacity(pending.len());
        for waiter in pending.drain(..) {
            let offer = waiter.offer(envelope, self.channel);
            if offer.matched {
                matched += 1;
            }
            if let Some(waiter) = offer.pending {
                survivors.push(waiter);
            }
        }

        if survivors.is_empty() {
            waiters.remove(causation_id);
        } else {
            *pending = survivors;
        }

        tracing::trace!(
            channel = %self.channel,
            causation_id,
            msg_type = envelope.msg_type(),
            matched,
            "dispatched"
        );
        matched
    }

    /// Waiters still pending on `causation_id`.
    pub fn pending(&self, causation_id: &str) -> usize {
        self.waiters.lock().get(causation_id).map_or(0, Vec::len)
    }

    /// Total pending waiters across all causation ids.
    pub fn len(&self) -> usize {
        self.waiters.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    pub fn causation_ids(&self) -> Vec<String> {
        let mut ids = self.waiters.lock().keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids
    }

    fn insert(&self, causation_id: String, predicate: Predicate, kind: WaiterKind) -> WaiterKey {
        let waiter = self.next_waiter.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(
            channel = %self.channel,
            causation_id = %causation_id,
            waiter,
            kind = kind.name(),
            predicate = predicate.label(),
            "waiter registered"
        );
        self.waiters
            .lock()
            .entry(causation_id.clone())
            .or_default()
            .push(Waiter {
                id: waiter,
                predicate,
                kind,
            });
        WaiterKey {
            registry: self.id,
            causation_id,
            waiter,
        }
    }
}

/// One-shot handle resolved with the first matching envelope.
///
/// Dropping an unresolved promise unregisters its waiter. Once settled it
/// keeps returning the same outcome when polled again.
#[derive(Debug)]
pub struct Promise {
    key: WaiterKey,
    channel: ChannelKind,
    receiver: oneshot::Receiver<Arc<Envelope>>,
    registry: Weak<Registry>,
    outcome: Option<Result<Arc<Envelope>, RegistryError>>,
}

impl Promise {
    pub fn key(&self) -> &WaiterKey {
        &self.key
    }
}

impl Future for Promise {
    type Output = Result<Arc<Envelope>, RegistryError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Some(outcome) = &this.outcome {
            return Poll::Ready(outcome.clone());
        }
        let outcome = match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(envelope)) => Ok(envelope),
            Poll::Ready(Err(_)) => Err(RegistryError::Cancelled {
                channel: this.channel,
                causation_id: this.key.causation_id.clone(),
            }),
            Poll::Pending => return Poll::Pending,
        };
        this.outcome = Some(outcome.clone());
        Poll::Ready(outcome)
    }
}

impl Drop for Promise {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            release(&self.registry, &self.key);
        }
    }
}

/// Payload-free signal set by the first matching envelope.
///
/// Dropping an unset latch unregisters its waiter.
#[derive(Debug)]
pub struct Latch {
    key: WaiterKey,
    channel: ChannelKind,
    receiver: oneshot::Receiver<()>,
    registry: Weak<Registry>,
    set: bool,
    settled: bool,
}

impl Latch {
    pub fn key(&self) -> &WaiterKey {
        &self.key
    }

    /// Non-blocking check.
    pub fn is_set(&mut self) -> bool {
        if !self.set && self.receiver.try_recv().is_ok() {
            self.set = true;
            self.settled = true;
        }
        self.set
    }
}

impl Future for Latch {
    type Output = Result<(), RegistryError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if this.set {
            return Poll::Ready(Ok(()));
        }
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(())) => {
                this.set = true;
                this.settled = true;
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(_)) => {
                this.settled = true;
                Poll::Ready(Err(RegistryError::Cancelled {
                    channel: this.channel,
                    causation_id: this.key.causation_id.clone(),
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Latch {
    fn drop(&mut self) {
        if !self.settled {
            release(&self.registry, &self.key);
        }
    }
}

fn release(registry: &Weak<Registry>, key: &WaiterKey) {
    if let Some(registry) = registry.upgrade() {
        let _ = registry.unregister(key);
    }
}

/// Consumer handle for a registered stream waiter.
///
/// Dropping the subscription before the stream closes unregisters the
/// waiter, even if clones of the underlying [`FiniteStream`] are still
/// alive; those clones simply stop receiving items.
#[derive(Debug)]
pub struct StreamSubscription {
    key: WaiterKey,
    stream: FiniteStream<Arc<Envelope>>,
    registry: Weak<Registry>,
}

impl StreamSubscription {
    pub fn key(&self) -> &WaiterKey {
        &self.key
    }

    pub fn stream(&self) -> &FiniteStream<Arc<Envelope>> {
        &self.stream
    }

    /// See [`FiniteStream::next`].
    pub async fn next(&self) -> Result<Option<Arc<Envelope>>, StreamError> {
        self.stream.next().await
    }

    /// See [`FiniteStream::join`].
    pub async fn join(&self) {
        self.stream.join().await;
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_closed()
    }

    pub fn is_drained(&self) -> bool {
        self.stream.is_drained()
    }

    /// Envelopes that matched but were turned away by a full stream.
    pub fn dropped(&self) -> usize {
        self.stream.dropped()
    }

    /// Lazy view of the remaining envelopes. The subscription lives inside
    /// the returned stream, so dropping it early unregisters the waiter.
    pub fn into_stream(self) -> impl Stream<Item = Arc<Envelope>> {
        stream::unfold(self, |subscription| async move {
            match subscription.next().await {
                Ok(Some(envelope)) => Some((envelope, subscription)),
                Ok(None) | Err(_) => None,
            }
        })
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        // A closed stream was already removed by the dispatch that closed it.
        if !self.stream.is_closed() {
            release(&self.registry, &self.key);
        }
    }
}
