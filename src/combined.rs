//! Aggregation of many progress sources into one.
//!
//! [`CombinedProgress`] observes any number of [`Progress`] sources. Whenever one of them
//! reports, the aggregator records that value, recomputes the mean over every attached
//! source and re-emits it through its own [`Progress`]. Because that output is an ordinary
//! source, aggregators compose: attach one aggregator to another to build a tree.
//!
//! # Synchronization Strategy
//!
//! A single [`Mutex`](parking_lot::Mutex) guards the list of attached sources together
//! with their last values. The whole recomputation runs under that guard, so every
//! emitted value reflects one consistent set of inputs. The guard is released *before*
//! the combined value is emitted: downstream consumers never run while it is held and may
//! call back into the aggregator.
//!
//! Subscriptions placed on attached sources hold only a [`Weak`] reference to the
//! aggregator, so a source never keeps its aggregator alive. Dropping the last handle
//! to an aggregator detaches it from every source.
//!
//! # Integer Averaging
//!
//! Dividing each value by the source count and summing the quotients would drop the
//! fractional parts (three sources at `1` would average to `0`). The combination
//! instead carries the remainders forward and folds them back into the sum each time they
//! add up to one more whole unit, which yields the truncated true mean without ever
//! forming the (possibly overflowing) total.

use std::{
    any::type_name,
    fmt,
    sync::{Arc, Weak},
};

use compact_str::CompactString;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    builder::CombinedProgressBuilder,
    error::ProgressError,
    progress::{Progress, SourceId, SubscriptionId},
    value::ProgressValue,
};

/// A progress source whose value is the mean of its attached sources.
///
/// Cloning is cheap (Arc bump) and every clone manages the same set of sources.
///
/// Attaching an aggregator to itself, directly or through a cycle of aggregators,
/// makes every report recurse without bound.
pub struct CombinedProgress<T: ProgressValue> {
    inner: Arc<Inner<T>>,
}

struct Inner<T: ProgressValue> {
    /// Emits the combined value.
    output: Progress<T>,

    /// Attached sources, in attach order.
    sources: Mutex<Vec<SourceRecord<T>>>,
}

struct SourceRecord<T> {
    source: Progress<T>,
    subscription: SubscriptionId,
    last: T,
}

impl<T: ProgressValue> Clone for CombinedProgress<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ProgressValue> Default for CombinedProgress<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ProgressValue> fmt::Debug for CombinedProgress<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombinedProgress")
            .field("id", &self.inner.output.id())
            .field("count", &self.count())
            .field("value", &self.value())
            .finish()
    }
}

impl<T: ProgressValue> AsRef<Progress<T>> for CombinedProgress<T> {
    fn as_ref(&self) -> &Progress<T> {
        &self.inner.output
    }
}

impl<T: ProgressValue> CombinedProgress<T> {
    /// Creates an aggregator with no sources attached.
    #[must_use]
    pub fn new() -> Self {
        Self::from_output(Progress::new("combined"))
    }

    /// Creates an aggregator that invokes `handler` with every combined value.
    ///
    /// The handler runs in addition to any subscribers of [`progress`](Self::progress),
    /// on the thread of the source whose report triggered the combination.
    #[must_use]
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self::from_output(Progress::with_handler("combined", handler))
    }

    /// Starts building an aggregator.
    #[must_use]
    pub fn builder() -> CombinedProgressBuilder<T> {
        CombinedProgressBuilder::new()
    }

    pub(crate) fn from_output(output: Progress<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                output,
                sources: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The aggregator's own progress source, which emits every combined value.
    ///
    /// Subscribe to it, or attach it to another aggregator.
    #[must_use]
    pub fn progress(&self) -> &Progress<T> {
        &self.inner.output
    }

    /// The last combined value emitted (zero before the first emission).
    #[must_use]
    pub fn value(&self) -> T {
        self.inner.output.last_value()
    }

    // ========================================================================
    // Attachment
    // ========================================================================

    /// Attaches `source` unless it is already attached.
    ///
    /// Returns `true` on success and when `source` was already attached. Returns `false`,
    /// without changing anything, if the new source count would not be exactly
    /// representable in `T`.
    pub fn try_attach(&self, source: &impl AsRef<Progress<T>>) -> bool {
        let source = source.as_ref();
        let mut sources = self.inner.sources.lock();

        if sources.iter().any(|record| record.source == *source) {
            return true;
        }

        let count = sources.len() + 1;
        if T::from_count(count).is_none() {
            warn!(
                source = %source.id(),
                count,
                value_type = type_name::<T>(),
                "source count exceeds the exact range of the value type"
            );
            return false;
        }

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let subscription = source.subscribe(move |sender, value| {
            if let Some(inner) = weak.upgrade() {
                inner.combine(sender, value);
            }
        });

        sources.push(SourceRecord {
            source: source.clone(),
            subscription,
            last: T::zero(),
        });
        debug!(source = %source.id(), count, "attached progress source");
        true
    }

    /// Attaches `source`, failing if the source count would leave the exact range of `T`.
    ///
    /// Attaching an already attached source succeeds and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::RangeExceeded`] when [`try_attach`](Self::try_attach)
    /// would return `false`.
    pub fn attach(&self, source: &impl AsRef<Progress<T>>) -> Result<(), ProgressError> {
        if self.try_attach(source) {
            Ok(())
        } else {
            Err(ProgressError::RangeExceeded {
                count: self.count() + 1,
                type_name: type_name::<T>(),
            })
        }
    }

    /// Detaches `source`. Returns `false` if it was not attached.
    ///
    /// The subscription on `source` is removed under the same guard as its record, so a
    /// report racing with the removal either counts fully or is ignored.
    pub fn try_remove(&self, source: &impl AsRef<Progress<T>>) -> bool {
        let source = source.as_ref();
        let mut sources = self.inner.sources.lock();

        let Some(index) = sources.iter().position(|record| record.source == *source) else {
            return false;
        };

        let record = sources.remove(index);
        record.source.unsubscribe(record.subscription);
        debug!(source = %source.id(), count = sources.len(), "removed progress source");
        true
    }

    /// Detaches every source at once.
    ///
    /// Concurrent reports observe either the full pre-reset list or the empty one.
    pub fn reset(&self) {
        let mut sources = self.inner.sources.lock();
        let removed = sources.len();
        for record in sources.drain(..) {
            record.source.unsubscribe(record.subscription);
        }
        debug!(removed, "reset combined progress");
    }

    /// Returns `true` if `source` is currently attached.
    #[must_use]
    pub fn contains(&self, source: &impl AsRef<Progress<T>>) -> bool {
        let source = source.as_ref();
        self.inner
            .sources
            .lock()
            .iter()
            .any(|record| record.source == *source)
    }

    /// Returns the number of attached sources.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.sources.lock().len()
    }

    /// Returns `true` if no sources are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.sources.lock().is_empty()
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    /// Reports `value` on every attached source.
    ///
    /// Each source then notifies its own consumers, including this aggregator, so one
    /// combined value is emitted per source. The source list is copied first and the
    /// reports are issued without holding the guard.
    pub fn report_to_all(&self, value: T) {
        let sources: Vec<Progress<T>> = self
            .inner
            .sources
            .lock()
            .iter()
            .map(|record| record.source.clone())
            .collect();

        trace!(?value, count = sources.len(), "reporting to all sources");
        for source in &sources {
            source.report(value);
        }
    }

    /// Captures the attached sources and the value they combine to.
    ///
    /// Taken under the guard, so it is consistent with some point between two
    /// combinations.
    #[must_use]
    pub fn snapshot(&self) -> CombinedSnapshot<T> {
        let sources = self.inner.sources.lock();
        let combined = average(sources.iter().map(|record| record.last), sources.len())
            .unwrap_or_else(T::zero);
        let sources = sources
            .iter()
            .map(|record| SourceSnapshot {
                id: record.source.id().get(),
                name: record.source.get_name(),
                value: record.last,
            })
            .collect();

        CombinedSnapshot { sources, combined }
    }
}

impl<T: ProgressValue> Inner<T> {
    /// Records a report from `sender` and emits the new combined value.
    fn combine(&self, sender: SourceId, value: T) {
        let combined = {
            let mut sources = self.sources.lock();
            let Some(record) = sources.iter_mut().find(|record| record.source.id() == sender)
            else {
                trace!(%sender, "ignoring report from detached source");
                return;
            };
            record.last = value;

            // The attach guard keeps the count representable; fall back to the raw
            // value should that ever not hold.
            average(sources.iter().map(|record| record.last), sources.len()).unwrap_or(value)
        };

        trace!(%sender, ?value, ?combined, "combined progress");
        self.output.report(combined);
    }
}

impl<T: ProgressValue> Drop for Inner<T> {
    fn drop(&mut self) {
        for record in self.sources.get_mut().drain(..) {
            record.source.unsubscribe(record.subscription);
        }
    }
}

/// Truncated mean of `values` over `count` entries, carrying remainders between steps.
///
/// Returns `None` when `count` is zero or not exactly representable in `T`.
fn average<T: ProgressValue>(values: impl IntoIterator<Item = T>, count: usize) -> Option<T> {
    if count == 0 {
        return None;
    }
    let n = T::from_count(count)?;

    let mut average = T::zero();
    let mut remainder = T::zero();
    for value in values {
        let (quotient, rest) = value.div_rem(n);
        let (carry, rest) = carry(remainder, rest, n);
        average = average + quotient + carry;
        remainder = rest;
    }
    Some(average)
}

/// Adds two remainders (each strictly between `-n` and `n`) and splits the sum into a
/// whole-unit carry and a new remainder, without overflowing `T`.
fn carry<T: ProgressValue>(remainder: T, rest: T, n: T) -> (T, T) {
    let zero = T::zero();
    if remainder >= zero && rest >= zero {
        // remainder + rest >= n  <=>  rest >= n - remainder
        let room = n - remainder;
        if rest >= room {
            return (T::one(), rest - room);
        }
    } else if remainder < zero && rest < zero {
        let room = zero - n - remainder;
        if rest <= room {
            return (zero - T::one(), rest - room);
        }
    }
    (zero, remainder + rest)
}

/// A point-in-time view of one attached source.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceSnapshot<T> {
    id: u64,
    name: CompactString,
    value: T,
}

impl<T: Copy> SourceSnapshot<T> {
    /// Returns the raw [`SourceId`] of the source.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the name/label of the source.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the last value the aggregator recorded for the source.
    #[must_use]
    pub const fn value(&self) -> T {
        self.value
    }
}

/// A point-in-time view of an aggregator: every source in attach order, and the value
/// they combine to.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CombinedSnapshot<T> {
    sources: Vec<SourceSnapshot<T>>,
    combined: T,
}

impl<T: Copy> CombinedSnapshot<T> {
    /// Returns the snapshots of the attached sources, in attach order.
    #[must_use]
    pub fn sources(&self) -> &[SourceSnapshot<T>] {
        &self.sources
    }

    /// Returns the combined value of the captured sources.
    #[must_use]
    pub const fn combined(&self) -> T {
        self.combined
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread};

    use parking_lot::Mutex;
    use proptest::prelude::*;

    use super::{CombinedProgress, average};
    use crate::{ProgressError, progress::Progress};

    /// Collects every value an aggregator emits.
    fn recording<T: crate::ProgressValue>() -> (CombinedProgress<T>, Arc<Mutex<Vec<T>>>) {
        let emitted: Arc<Mutex<Vec<T>>> = Arc::new(Mutex::new(Vec::new()));
        let emitted_ref = emitted.clone();
        let combined = CombinedProgress::with_handler(move |v| emitted_ref.lock().push(v));
        (combined, emitted)
    }

    fn sources<T: crate::ProgressValue>(n: usize) -> Vec<Progress<T>> {
        (0..n).map(|i| Progress::new(format!("source_{i}"))).collect()
    }

    /// End-to-End Averaging
    /// Two sources report, the aggregator emits the mean after each report.
    #[test]
    fn test_two_sources() {
        let (combined, emitted) = recording::<u32>();
        let a = Progress::new("a");
        let b = Progress::new("b");
        combined.attach(&a).unwrap();
        combined.attach(&b).unwrap();

        a.report(4);
        b.report(6);
        assert_eq!(combined.value(), 5);

        a.report(10);
        assert_eq!(combined.value(), 8);
        assert_eq!(*emitted.lock(), vec![2, 5, 8]);
    }

    /// Remainder Carry
    /// Three sources at one average to one, not zero.
    #[test]
    fn test_remainder_carry() {
        let combined = CombinedProgress::<u8>::new();
        let all = sources::<u8>(3);
        for s in &all {
            combined.attach(s).unwrap();
        }
        for s in &all {
            s.report(1);
        }
        assert_eq!(combined.value(), 1);
    }

    /// Order Independence
    /// Every arrival order of (10, 20, 30) ends at 20.
    #[test]
    fn test_order_independence() {
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let values = [10u16, 20, 30];

        for order in orders {
            let combined = CombinedProgress::<u16>::new();
            let all = sources::<u16>(3);
            for s in &all {
                combined.attach(s).unwrap();
            }
            for i in order {
                all[i].report(values[i]);
            }
            assert_eq!(combined.value(), 20, "order {order:?}");
        }
    }

    /// Averaging Helper
    /// Integer means truncate, float means are exact, narrow types never overflow.
    #[test]
    #[allow(clippy::float_cmp)]
    fn test_average() {
        assert_eq!(average([1u32, 2], 2), Some(1));
        assert_eq!(average([7u32, 7, 8], 3), Some(7));
        assert_eq!(average::<u32>([], 0), None);
        assert_eq!(average([5.0f64, 6.0], 2), Some(5.5));
        assert_eq!(average([u8::MAX; 255], 255), Some(u8::MAX));
        assert_eq!(average([254u8, 254, 254], 3), Some(254));
        assert_eq!(average([i8::MAX; 127], 127), Some(i8::MAX));
        assert_eq!(average([-5i32, -6], 2), Some(-5));
        assert_eq!(average([-3i32, 3, -1], 3), Some(0));
    }

    /// Duplicate Attach
    /// Attaching the same source twice succeeds and does not change the count.
    #[test]
    fn test_duplicate_attach() {
        let combined = CombinedProgress::<u32>::new();
        let a = Progress::new("a");

        assert!(combined.try_attach(&a));
        assert!(combined.try_attach(&a.clone()));
        assert_eq!(combined.count(), 1);
        assert_eq!(a.subscriber_count(), 1, "no second subscription");
    }

    /// Remove
    /// Removing unknown sources fails without side effects; removed sources stop counting.
    #[test]
    fn test_remove() {
        let combined = CombinedProgress::<u32>::new();
        let a = Progress::new("a");
        let b = Progress::new("b");
        let stranger = Progress::new("stranger");
        combined.attach(&a).unwrap();
        combined.attach(&b).unwrap();

        assert!(!combined.try_remove(&stranger));
        assert_eq!(combined.count(), 2);

        assert!(combined.try_remove(&a));
        assert!(!combined.contains(&a));
        assert_eq!(a.subscriber_count(), 0);

        b.report(6);
        assert_eq!(combined.value(), 6, "only b remains");

        a.report(100);
        assert_eq!(combined.value(), 6, "a no longer reaches the aggregator");
    }

    /// Reset and Stale Reports
    /// After a reset, late reports are ignored and produce no emission.
    #[test]
    fn test_reset_ignores_stale_reports() {
        let (combined, emitted) = recording::<u64>();
        let all = sources::<u64>(4);
        for s in &all {
            combined.attach(s).unwrap();
        }
        all[0].report(8);
        assert_eq!(emitted.lock().len(), 1);

        combined.reset();
        assert!(combined.is_empty());
        assert!(all.iter().all(|s| s.subscriber_count() == 0));

        // A report that was already in flight when the subscription was removed.
        combined.inner.combine(all[1].id(), 50);
        all[2].report(70);

        assert_eq!(emitted.lock().len(), 1, "no emission after reset");
    }

    /// Capacity Guard
    /// An `i8` aggregator holds at most 127 sources; the 128th attach is refused.
    #[test]
    fn test_range_exceeded() {
        let combined = CombinedProgress::<i8>::new();
        let all = sources::<i8>(130);

        for s in &all[..127] {
            assert!(combined.try_attach(s));
        }
        assert!(!combined.try_attach(&all[127]));
        assert_eq!(combined.count(), 127);
        assert_eq!(all[127].subscriber_count(), 0);

        assert_eq!(
            combined.attach(&all[128]),
            Err(ProgressError::RangeExceeded {
                count: 128,
                type_name: "i8",
            })
        );

        // Re-attaching a known source is still fine at capacity.
        assert!(combined.try_attach(&all[0]));
    }

    /// Report To All
    /// Broadcasting a value reaches every source and emits once per source.
    #[test]
    fn test_report_to_all() {
        let (combined, emitted) = recording::<u32>();
        let all = sources::<u32>(3);
        for s in &all {
            combined.attach(s).unwrap();
        }

        combined.report_to_all(9);

        assert!(all.iter().all(|s| s.last_value() == 9));
        assert_eq!(*emitted.lock(), vec![3, 6, 9]);
    }

    /// Composition
    /// An aggregator attached to another aggregator feeds its mean upward.
    #[test]
    fn test_nested_aggregators() {
        let outer = CombinedProgress::<u32>::new();
        let inner = CombinedProgress::<u32>::new();
        let a = Progress::new("a");
        let b = Progress::new("b");
        let c = Progress::new("c");

        inner.attach(&a).unwrap();
        inner.attach(&b).unwrap();
        outer.attach(&inner).unwrap();
        outer.attach(&c).unwrap();

        a.report(40);
        b.report(60);
        c.report(100);

        assert_eq!(inner.value(), 50);
        assert_eq!(outer.value(), 75);
    }

    /// Re-entrant Consumer
    /// A consumer of the combined value may mutate the aggregator.
    #[test]
    fn test_reentrant_consumer() {
        let combined = CombinedProgress::<u32>::new();
        let a = Progress::new("a");
        let b = Progress::new("b");
        combined.attach(&a).unwrap();

        let handle = combined.clone();
        let b_ref = b.clone();
        combined.progress().subscribe(move |_, _| {
            handle.try_attach(&b_ref);
        });

        a.report(10);
        assert!(combined.contains(&b));
    }

    /// Drop Detaches
    /// Dropping the aggregator removes its subscriptions from every source.
    #[test]
    fn test_drop_detaches() {
        let a = Progress::<u32>::new("a");
        {
            let combined = CombinedProgress::new();
            combined.attach(&a).unwrap();
            let _clone = combined.clone();
            assert_eq!(a.subscriber_count(), 1);
        }
        assert_eq!(a.subscriber_count(), 0);
        a.report(1);
    }

    /// Snapshot
    /// Captures names, last values and the combined value.
    #[test]
    fn test_snapshot() {
        let combined = CombinedProgress::<u32>::new();
        let a = Progress::new("a");
        let b = Progress::new("b");
        combined.attach(&a).unwrap();
        combined.attach(&b).unwrap();
        a.report(3);

        let snap = combined.snapshot();
        assert_eq!(snap.sources().len(), 2);
        assert_eq!(snap.sources()[0].name(), "a");
        assert_eq!(snap.sources()[0].value(), 3);
        assert_eq!(snap.sources()[1].id(), b.id().get());
        assert_eq!(snap.combined(), 1);
        assert_eq!(CombinedProgress::<u32>::new().snapshot().combined(), 0);
    }

    /// Concurrent Reports
    /// Each report triggers exactly one emission and the settled state is the full mean.
    #[test]
    fn test_concurrent_reports() {
        const N: usize = 16;
        let (combined, emitted) = recording::<u64>();
        let all = sources::<u64>(N);
        for s in &all {
            combined.attach(s).unwrap();
        }

        let handles: Vec<_> = all
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let s = s.clone();
                let value = (i as u64 + 1) * 10;
                thread::spawn(move || s.report(value))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Sequential replay of all reports: mean of 10, 20, ..., 160.
        let expected = 85;
        let emitted = emitted.lock();
        assert_eq!(emitted.len(), N, "one emission per report");
        assert_eq!(emitted.iter().copied().max(), Some(expected));
        assert_eq!(combined.snapshot().combined(), expected);
    }

    /// Concurrent Lifecycle
    /// Attach, remove and reset racing with reports never corrupt the source list.
    #[test]
    fn test_concurrent_lifecycle() {
        let combined = CombinedProgress::<u32>::new();
        let all = sources::<u32>(8);

        let reporters: Vec<_> = all
            .iter()
            .map(|s| {
                let s = s.clone();
                thread::spawn(move || {
                    for v in 0..200 {
                        s.report(v);
                    }
                })
            })
            .collect();

        for round in 0..50 {
            for s in &all {
                combined.try_attach(s);
            }
            if round % 2 == 0 {
                combined.try_remove(&all[round % all.len()]);
            } else {
                combined.reset();
            }
        }

        for h in reporters {
            h.join().unwrap();
        }

        let count = combined.count();
        assert!(count <= all.len());
        assert_eq!(combined.snapshot().sources().len(), count);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Attach(usize),
        Remove(usize),
        Reset,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0..8usize).prop_map(Op::Attach),
            3 => (0..8usize).prop_map(Op::Remove),
            1 => Just(Op::Reset),
        ]
    }

    proptest! {
        /// The count always matches the set of distinct attached sources.
        #[test]
        fn prop_count_matches_attached(ops in prop::collection::vec(op(), 0..64)) {
            let combined = CombinedProgress::<u32>::new();
            let all = sources::<u32>(8);
            let mut model = HashSet::new();

            for op in ops {
                match op {
                    Op::Attach(i) => {
                        prop_assert!(combined.try_attach(&all[i]));
                        model.insert(i);
                    }
                    Op::Remove(i) => {
                        prop_assert_eq!(combined.try_remove(&all[i]), model.remove(&i));
                    }
                    Op::Reset => {
                        combined.reset();
                        model.clear();
                    }
                }
                prop_assert_eq!(combined.count(), model.len());
                for (i, s) in all.iter().enumerate() {
                    prop_assert_eq!(combined.contains(s), model.contains(&i));
                    prop_assert_eq!(s.subscriber_count(), usize::from(model.contains(&i)));
                }
            }
        }
    }
}
