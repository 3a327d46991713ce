//! The single-source notification primitive.
//!
//! A [`Progress`] is the handle through which a producer reports successive values and
//! to which consumers subscribe. It is deliberately small:
//!
//! * **Report:** [`Progress::report`] stores the value and then invokes the optional
//!   construction-time handler followed by every subscriber, synchronously on the
//!   reporting thread.
//! * **Subscribe:** [`Progress::subscribe`] registers a `(SourceId, value)` callback and
//!   hands back a [`SubscriptionId`] for [`Progress::unsubscribe`].
//!
//! # Identity
//!
//! Cloning a `Progress` is cheap (Arc bump) and the clone *is* the same source: it shares
//! the same [`SourceId`], state and subscribers. Two handles refer to the same source iff
//! their ids are equal.
//!
//! # Dispatch
//!
//! The subscriber list is copied under a short read lock and the lock is released before
//! any callback runs. Callbacks may therefore subscribe, unsubscribe or report again
//! without deadlocking, and a callback removed mid-dispatch may still receive the report
//! that was already in flight.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use compact_str::CompactString;
use parking_lot::RwLock;
use web_time::Instant;

use crate::value::ProgressValue;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a progress source.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct SourceId(u64);

impl SourceId {
    fn next() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle returned by [`Progress::subscribe`], unique per source.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SubscriptionId(u64);

pub(crate) type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;
type Subscriber<T> = Arc<dyn Fn(SourceId, T) + Send + Sync>;

/// A thread-safe, cloneable progress source.
///
/// Any thread may call [`report`](Self::report). Consumers are notified on the
/// reporting thread.
pub struct Progress<T> {
    id: SourceId,

    /// Invoked on every report before the subscribers.
    handler: Option<Handler<T>>,

    /// Last value, name and report time.
    state: Arc<RwLock<State<T>>>,

    subscribers: Arc<RwLock<Subscribers<T>>>,
}

struct State<T> {
    name: CompactString,
    last: T,
    reported: Option<Instant>,
}

struct Subscribers<T> {
    next: u64,
    entries: Vec<(SubscriptionId, Subscriber<T>)>,
}

// Manual impl: `T` itself does not need to be `Clone` for the handle to be.
impl<T> Clone for Progress<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            handler: self.handler.clone(),
            state: Arc::clone(&self.state),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T> PartialEq for Progress<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Progress<T> {}

impl<T: ProgressValue> fmt::Debug for Progress<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Progress")
            .field("id", &self.id)
            .field("name", &state.name)
            .field("last", &state.last)
            .finish_non_exhaustive()
    }
}

impl<T: ProgressValue> Default for Progress<T> {
    fn default() -> Self {
        Self::new(CompactString::default())
    }
}

impl<T: ProgressValue> AsRef<Self> for Progress<T> {
    fn as_ref(&self) -> &Self {
        self
    }
}

impl<T: ProgressValue> Progress<T> {
    /// Creates a new source with no handler and no subscribers.
    #[must_use]
    pub fn new(name: impl Into<CompactString>) -> Self {
        Self::from_parts(name.into(), None)
    }

    /// Creates a new source that invokes `handler` for every reported value.
    ///
    /// The handler runs in addition to any subscribers, on whichever thread reports. It
    /// may be invoked concurrently with itself.
    #[must_use]
    pub fn with_handler<F>(name: impl Into<CompactString>, handler: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::from_parts(name.into(), Some(Arc::new(handler)))
    }

    pub(crate) fn from_parts(name: CompactString, handler: Option<Handler<T>>) -> Self {
        Self {
            id: SourceId::next(),
            handler,
            state: Arc::new(RwLock::new(State {
                name,
                last: T::zero(),
                reported: None,
            })),
            subscribers: Arc::new(RwLock::new(Subscribers {
                next: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Returns the identity shared by this handle and all of its clones.
    #[must_use]
    pub const fn id(&self) -> SourceId {
        self.id
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    /// Reports a new value.
    ///
    /// Records `value` as the last value, then notifies the handler and every subscriber
    /// registered at the moment of the call. No lock is held while they run.
    pub fn report(&self, value: T) {
        {
            let mut state = self.state.write();
            state.last = value;
            state.reported = Some(Instant::now());
        }

        if let Some(handler) = &self.handler {
            handler(value);
        }

        let subscribers: Vec<Subscriber<T>> = self
            .subscribers
            .read()
            .entries
            .iter()
            .map(|(_, subscriber)| Arc::clone(subscriber))
            .collect();

        for subscriber in subscribers {
            subscriber(self.id, value);
        }
    }

    /// Returns the most recently reported value, or zero if nothing was reported yet.
    #[must_use]
    pub fn last_value(&self) -> T {
        self.state.read().last
    }

    /// Time since the last [`report`](Self::report), or `None` if never reported.
    #[must_use]
    pub fn since_last_report(&self) -> Option<Duration> {
        self.state.read().reported.map(|at| at.elapsed())
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Registers `subscriber` to be called with `(source id, value)` after every report.
    pub fn subscribe<F>(&self, subscriber: F) -> SubscriptionId
    where
        F: Fn(SourceId, T) + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers.write();
        let id = SubscriptionId(subscribers.next);
        subscribers.next += 1;
        subscribers.entries.push((id, Arc::new(subscriber)));
        id
    }

    /// Removes a subscription. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.entries.len();
        subscribers.entries.retain(|(entry, _)| *entry != id);
        subscribers.entries.len() != before
    }

    /// Returns the number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().entries.len()
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Gets the name/label of the source.
    #[must_use]
    pub fn get_name(&self) -> CompactString {
        self.state.read().name.clone()
    }

    /// Updates the name/label of the source.
    pub fn set_name(&self, name: impl Into<CompactString>) {
        self.state.write().name = name.into();
    }
}
