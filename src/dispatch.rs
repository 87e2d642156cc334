//! Per-topic fan-out to independent, bounded subscriber queues.
//!
//! Publishing never waits on a subscriber. A subscriber whose queue is full is
//! evicted on the spot: it still drains what was queued before the overflow,
//! then sees a single [`Event::Resync`] and its stream ends. Ordering inside a
//! topic is whatever order `publish` was called in, so callers publish while
//! holding the lane that serializes their writes.

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::model::{Event, ResyncNotice};

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Channel creations.
    Registry,
    Channel(String),
}

impl Topic {
    fn channel_id(&self) -> Option<String> {
        match self {
            Topic::Registry => None,
            Topic::Channel(id) => Some(id.clone()),
        }
    }
}

/// Which events on a topic a subscriber wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    All,
    Messages,
    Typing,
}

impl Interest {
    fn wants(self, event: &Event) -> bool {
        match (self, event) {
            (Interest::All, _) => true,
            (Interest::Messages, Event::Message(_) | Event::MessageUpdated(_)) => true,
            (Interest::Typing, Event::Typing(_)) => true,
            _ => false,
        }
    }
}

struct Slot {
    id: u64,
    interest: Interest,
    tx: mpsc::Sender<Arc<Event>>,
    overflowed: Arc<AtomicBool>,
}

struct Inner {
    topics: DashMap<Topic, Vec<Slot>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Inner {
    fn remove(&self, topic: &Topic, id: u64) {
        if let Some(mut slots) = self.topics.get_mut(topic) {
            slots.retain(|s| s.id != id);
        }
        self.topics.remove_if(topic, |_, slots| slots.is_empty());
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: DashMap::new(),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Register a subscriber. `backlog` is yielded before anything live and
    /// does not count against the queue capacity.
    pub fn subscribe(&self, topic: Topic, interest: Interest, backlog: Vec<Event>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let overflowed = Arc::new(AtomicBool::new(false));

        self.inner.topics.entry(topic.clone()).or_default().push(Slot {
            id,
            interest,
            tx,
            overflowed: overflowed.clone(),
        });
        debug!(?topic, subscriber = id, "subscribed");

        Subscription {
            id,
            topic,
            backlog: backlog.into_iter().map(Arc::new).collect(),
            rx,
            overflowed,
            finished: false,
            dispatcher: Arc::downgrade(&self.inner),
        }
    }

    /// A subscription that is never registered: it yields one resync notice
    /// for `topic` and ends.
    pub fn resync(&self, topic: Topic, reason: &str) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (_, rx) = mpsc::channel(1);
        let notice = Event::Resync(ResyncNotice {
            channel_id: topic.channel_id(),
            reason: reason.to_owned(),
        });

        Subscription {
            id,
            topic,
            backlog: VecDeque::from([Arc::new(notice)]),
            rx,
            overflowed: Arc::new(AtomicBool::new(false)),
            finished: false,
            dispatcher: Arc::downgrade(&self.inner),
        }
    }

    /// Push `event` to every interested subscriber of `topic`. Returns how many
    /// queues accepted it.
    pub fn publish(&self, topic: &Topic, event: Event) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut emptied = false;

        if let Some(mut slots) = self.inner.topics.get_mut(topic) {
            slots.retain(|slot| {
                if !slot.interest.wants(&event) {
                    return true;
                }
                match slot.tx.try_send(event.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        warn!(?topic, subscriber = slot.id, "subscriber queue full, evicting");
                        slot.overflowed.store(true, Ordering::Release);
                        false
                    }
                    Err(TrySendError::Closed(_)) => false,
                }
            });
            emptied = slots.is_empty();
        }
        if emptied {
            self.inner.topics.remove_if(topic, |_, slots| slots.is_empty());
        }

        delivered
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner.topics.get(topic).map_or(0, |slots| slots.len())
    }
}

/// A live feed of events for one topic. Dropping it unsubscribes and discards
/// anything still queued.
pub struct Subscription {
    id: u64,
    topic: Topic,
    backlog: VecDeque<Arc<Event>>,
    rx: mpsc::Receiver<Arc<Event>>,
    overflowed: Arc<AtomicBool>,
    finished: bool,
    dispatcher: Weak<Inner>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_next(cx)).await
    }
}

impl Stream for Subscription {
    type Item = Arc<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        if let Some(event) = self.backlog.pop_front() {
            return Poll::Ready(Some(event));
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(event)),
            Poll::Ready(None) => {
                self.finished = true;
                if self.overflowed.load(Ordering::Acquire) {
                    Poll::Ready(Some(Arc::new(Event::Resync(ResyncNotice {
                        channel_id: self.topic.channel_id(),
                        reason: "subscriber queue overflow".to_owned(),
                    }))))
                } else {
                    Poll::Ready(None)
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.dispatcher.upgrade() {
            inner.remove(&self.topic, self.id);
        }
    }
}
