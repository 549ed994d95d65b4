//! Multicast dispatch to a mutable subscriber list.
//!
//! The list lives behind a `std::sync::Mutex` held only long enough to
//! snapshot or mutate it, never across an await: add/remove during a
//! dispatch does not affect the in-flight invocation. Three dispatch modes:
//! sequential, all-at-once, and first-successful with an optional deadline.

use futures::future::join_all;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::handler::BoxError;

/// Ticket returned by [`Fanout::add`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct Fanout<S: ?Sized> {
    subscribers: Mutex<Vec<(SubscriptionId, Arc<S>)>>,
    next_id: AtomicU64,
}

impl<S: ?Sized> Default for Fanout<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized> Fanout<S> {
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(Vec::new()), next_id: AtomicU64::new(0) }
    }

    pub fn add(&self, subscriber: Arc<S>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, subscriber));
        id
    }

    /// Removes a subscriber; returns whether it was present.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Copies the current subscriber list; dispatch always works on such a
    /// snapshot.
    pub fn snapshot(&self) -> Vec<Arc<S>> {
        self.lock().iter().map(|(_, subscriber)| subscriber.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Arc<S>)>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Awaits each subscriber in registration order. The closure isolates
    /// per-subscriber failures itself.
    pub async fn for_each<F, Fut>(&self, mut f: F)
    where
        F: FnMut(Arc<S>) -> Fut,
        Fut: Future<Output = ()>,
    {
        for subscriber in self.snapshot() {
            f(subscriber).await;
        }
    }

    /// Starts every subscriber at once and waits for all of them.
    pub async fn for_each_concurrent<F, Fut>(&self, f: F)
    where
        F: Fn(Arc<S>) -> Fut,
        Fut: Future<Output = ()>,
    {
        join_all(self.snapshot().into_iter().map(f)).await;
    }

    /// Races all subscribers, returning the first result that satisfies
    /// `predicate`.
    ///
    /// A per-subscriber error counts as "did not satisfy" and is discarded.
    /// When the deadline expires first, or every subscriber finishes without
    /// a satisfying result, `default` is computed from the elapsed time.
    pub async fn first_match<F, Fut, T, P, D>(&self, f: F, predicate: P, deadline: Option<Duration>, default: D) -> T
    where
        F: Fn(Arc<S>) -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
        P: Fn(&T) -> bool,
        D: FnOnce(Duration) -> T,
    {
        let started = Instant::now();
        let mut pending: FuturesUnordered<Fut> = self.snapshot().into_iter().map(f).collect();

        loop {
            let next = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(started + deadline, pending.next()).await {
                        Ok(next) => next,
                        Err(_elapsed) => return default(started.elapsed()),
                    }
                }
                None => pending.next().await,
            };

            match next {
                Some(Ok(value)) if predicate(&value) => return value,
                Some(_) => continue,
                None => return default(started.elapsed()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    trait Probe: Send + Sync {
        fn index(&self) -> usize;
    }

    struct Indexed(usize);
    impl Probe for Indexed {
        fn index(&self) -> usize {
            self.0
        }
    }

    fn fanout_of(n: usize) -> Fanout<dyn Probe> {
        let fanout = Fanout::new();
        for i in 0..n {
            fanout.add(Arc::new(Indexed(i)) as Arc<dyn Probe>);
        }
        fanout
    }

    #[tokio::test]
    async fn sequential_dispatch_preserves_registration_order() {
        let fanout = fanout_of(4);
        let seen = Mutex::new(Vec::new());

        fanout
            .for_each(|subscriber| {
                let seen = &seen;
                async move {
                    seen.lock().unwrap().push(subscriber.index());
                }
            })
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn concurrent_dispatch_reaches_everyone() {
        let fanout = fanout_of(8);
        let count = AtomicUsize::new(0);

        fanout
            .for_each_concurrent(|_subscriber| async {
                count.fetch_add(1, Ordering::Relaxed);
            })
            .await;

        assert_eq!(count.load(Ordering::Relaxed), 8);
    }

    #[tokio::test]
    async fn remove_unsubscribes() {
        let fanout: Fanout<dyn Probe> = Fanout::new();
        let id = fanout.add(Arc::new(Indexed(0)));
        fanout.add(Arc::new(Indexed(1)));

        assert_eq!(fanout.len(), 2);
        assert!(fanout.remove(id));
        assert!(!fanout.remove(id));

        let snapshot = fanout.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].index(), 1);
    }

    #[tokio::test]
    async fn mutation_during_dispatch_does_not_affect_snapshot() {
        let fanout = Arc::new(fanout_of(2));
        let count = AtomicUsize::new(0);

        let inner = fanout.clone();
        fanout
            .for_each(|_subscriber| {
                // subscribe while a dispatch is running
                inner.add(Arc::new(Indexed(99)) as Arc<dyn Probe>);
                let count = &count;
                async move {
                    count.fetch_add(1, Ordering::Relaxed);
                }
            })
            .await;

        // only the two snapshotted subscribers were invoked
        assert_eq!(count.load(Ordering::Relaxed), 2);
        assert_eq!(fanout.len(), 4);
    }

    #[tokio::test]
    async fn first_match_returns_first_satisfying_result() {
        let fanout = fanout_of(3);

        let result = fanout
            .first_match(
                |subscriber| async move {
                    let index = subscriber.index();
                    // the slowest subscriber has the satisfying answer
                    tokio::time::sleep(Duration::from_millis(10 * (3 - index as u64))).await;
                    Ok(index)
                },
                |index| *index == 0,
                None,
                |_elapsed| usize::MAX,
            )
            .await;

        assert_eq!(result, 0);
    }

    #[tokio::test]
    async fn first_match_swallows_subscriber_errors() {
        let fanout = fanout_of(3);

        let result = fanout
            .first_match(
                |subscriber| async move {
                    let index = subscriber.index();
                    if index != 2 {
                        return Err::<usize, BoxError>("transient".into());
                    }
                    Ok(index)
                },
                |_index| true,
                None,
                |_elapsed| usize::MAX,
            )
            .await;

        assert_eq!(result, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn first_match_deadline_yields_default() {
        let fanout = fanout_of(2);

        let result = fanout
            .first_match(
                |_subscriber| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(1usize)
                },
                |_index| true,
                Some(Duration::from_millis(50)),
                |elapsed| {
                    assert!(elapsed >= Duration::from_millis(50));
                    0usize
                },
            )
            .await;

        assert_eq!(result, 0);
    }

    #[tokio::test]
    async fn first_match_exhaustion_yields_default() {
        let fanout = fanout_of(2);

        let result = fanout
            .first_match(
                |subscriber| async move { Ok(subscriber.index()) },
                |_index| false,
                None,
                |_elapsed| 42usize,
            )
            .await;

        assert_eq!(result, 42);
    }
}
