//! Bounded parallel executor
//!
//! Fixed pool of workers pulling the next unclaimed item. Results come back
//! in input order.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use parking_lot::Mutex;

/// Runs async work over a list with a concurrency ceiling.
#[derive(Debug, Clone, Copy)]
pub struct BoundedExecutor {
    concurrency: usize,
}

impl BoundedExecutor {
    /// A ceiling of 0 is treated as 1.
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `f(item, index)` for every item, at most `concurrency` at once.
    ///
    /// Per-item failures belong inside `f`. An `Err` returned by `f` stops
    /// workers from claiming further items; in-flight items finish and the
    /// first error is returned.
    pub async fn run<T, R, E, F, Fut>(&self, items: Vec<T>, f: F) -> Result<Vec<R>, E>
    where
        F: Fn(T, usize) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let queue = Mutex::new(items.into_iter().enumerate());
        let halted = AtomicBool::new(false);
        let worker_count = self.concurrency.min(total);

        let workers = (0..worker_count).map(|_| {
            let queue = &queue;
            let halted = &halted;
            let f = &f;
            async move {
                let mut done: Vec<(usize, R)> = Vec::new();
                loop {
                    if halted.load(Ordering::Acquire) {
                        return Ok(done);
                    }
                    let claimed = queue.lock().next();
                    let Some((index, item)) = claimed else {
                        return Ok(done);
                    };
                    match f(item, index).await {
                        Ok(result) => done.push((index, result)),
                        Err(e) => {
                            halted.store(true, Ordering::Release);
                            return Err(e);
                        }
                    }
                }
            }
        });

        let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut first_err = None;
        for outcome in join_all(workers).await {
            match outcome {
                Ok(done) => {
                    for (index, result) in done {
                        slots[index] = Some(result);
                    }
                }
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_err {
            return Err(e);
        }
        // Without an error every index was claimed and completed
        Ok(slots.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_order_preserved_and_ceiling_respected() {
        let in_flight = &AtomicUsize::new(0);
        let max_seen = &AtomicUsize::new(0);
        let completion_order = &Mutex::new(Vec::new());

        let items: Vec<u64> = (0..10).collect();
        let results = BoundedExecutor::new(3)
            .run(items, move |item, index| {
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    // later items finish faster, so completion order differs
                    tokio::time::sleep(Duration::from_millis(100 * (10 - item))).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    completion_order.lock().push(index);
                    Ok::<_, ()>(item * 2)
                }
            })
            .await
            .unwrap();

        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
        assert_eq!(max_seen.load(Ordering::SeqCst), 3);
        let order = completion_order.lock().clone();
        assert_ne!(order, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_proportional_to_index() {
        let max_seen = &AtomicUsize::new(0);
        let in_flight = &AtomicUsize::new(0);
        let results = BoundedExecutor::new(3)
            .run((0..10u64).collect(), move |item, _| {
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10 * item)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ()>(item)
                }
            })
            .await
            .unwrap();
        assert_eq!(results, (0..10).collect::<Vec<_>>());
        assert!(max_seen.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results = BoundedExecutor::new(5)
            .run(Vec::<u32>::new(), |item, _| async move { Ok::<_, ()>(item) })
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_error_halts_claiming() {
        let started = &AtomicUsize::new(0);
        let err = BoundedExecutor::new(1)
            .run((0..10).collect::<Vec<u32>>(), move |item, _| {
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    if item == 2 {
                        Err("halt")
                    } else {
                        Ok(item)
                    }
                }
            })
            .await
            .unwrap_err();
        assert_eq!(err, "halt");
        assert_eq!(started.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_concurrency_runs_serially() {
        let exec = BoundedExecutor::new(0);
        assert_eq!(exec.concurrency(), 1);
        let results = exec
            .run(vec!["a", "b"], |item, index| async move { Ok::<_, ()>((index, item)) })
            .await
            .unwrap();
        assert_eq!(results, vec![(0, "a"), (1, "b")]);
    }
}
