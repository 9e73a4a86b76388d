//! Bounded-concurrency batch execution.
//!
//! Each network-bound stage hands its whole batch to [`run_batch`], which
//! fans out over a [`JoinSet`] gated by a semaphore and blocks until every
//! call resolves. Workers only see their own input and return an isolated
//! value; the caller folds results back into the store after the barrier.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Run `f` over every item with at most `width` calls in flight.
///
/// The effective width is `min(width, items.len())`, never less than one.
/// Returns `(key, result)` pairs in completion order; the batch itself is a
/// barrier, so nothing streams out before the slowest call finishes.
pub async fn run_batch<K, I, R, F, Fut>(items: Vec<(K, I)>, width: usize, f: F) -> Vec<(K, R)>
where
    K: Send + 'static,
    I: Send + 'static,
    R: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    if items.is_empty() {
        return Vec::new();
    }

    let width = width.clamp(1, items.len());
    let semaphore = Arc::new(Semaphore::new(width));
    let mut set = JoinSet::new();

    for (key, item) in items {
        let semaphore = Arc::clone(&semaphore);
        let fut = f(item);
        set.spawn(async move {
            // The semaphore is never closed, so acquisition only fails in
            // an unreachable state; proceeding unbounded there is harmless.
            let _permit = semaphore.acquire().await.ok();
            (key, fut.await)
        });
    }

    let mut results = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        if let Ok(pair) = joined {
            results.push(pair);
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn completes_every_item() {
        let items: Vec<(usize, usize)> = (0..20).map(|i| (i, i)).collect();
        let mut results = run_batch(items, 3, |i| async move { i * 2 }).await;
        results.sort();
        assert_eq!(results.len(), 20);
        assert_eq!(results[7], (7, 14));
    }

    #[tokio::test]
    async fn respects_width_bound() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let items: Vec<(usize, ())> = (0..16).map(|i| (i, ())).collect();

        let results = {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            run_batch(items, 4, move |()| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await
        };

        assert_eq!(results.len(), 16);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let results: Vec<(u8, u8)> = run_batch(vec![], 5, |i| async move { i }).await;
        assert!(results.is_empty());
    }
}
