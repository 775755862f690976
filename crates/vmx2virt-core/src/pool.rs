//! Bounded worker pool for independent per-disk work.
//!
//! Results are written back into their input index, so callers see them in
//! input order regardless of which worker finished first.

use crossbeam_channel::unbounded;
use rayon::ThreadPoolBuilder;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Run `work` over `items` on at most `jobs` threads.
///
/// With `jobs <= 1` (or a single item) the items are processed in order on
/// the calling thread and processing stops at the first error. Otherwise
/// every item is processed and the error of the lowest failing index is
/// returned.
pub fn run_indexed<T, R, F>(jobs: usize, items: Vec<T>, work: F) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(usize, T) -> Result<R> + Sync,
{
    if jobs <= 1 || items.len() <= 1 {
        return run_sequential(items, &work);
    }

    let pool = match ThreadPoolBuilder::new().num_threads(jobs).build() {
        Ok(pool) => pool,
        Err(e) => {
            warn!(error = %e, "could not start worker pool, running sequentially");
            return run_sequential(items, &work);
        }
    };

    let total = items.len();
    debug!(jobs, total, "running worker pool");

    let (tx, rx) = unbounded();
    pool.scope(|scope| {
        for (index, item) in items.into_iter().enumerate() {
            let tx = tx.clone();
            let work = &work;
            scope.spawn(move |_| {
                // The receiver outlives the scope, so send cannot fail.
                let _ = tx.send((index, work(index, item)));
            });
        }
    });
    drop(tx);

    let mut slots: Vec<Option<Result<R>>> = (0..total).map(|_| None).collect();
    for (index, result) in rx.iter() {
        slots[index] = Some(result);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| {
                Err(Error::conversion(
                    format!("item {}", index + 1),
                    "worker produced no result",
                ))
            })
        })
        .collect()
}

fn run_sequential<T, R, F>(items: Vec<T>, work: &F) -> Result<Vec<R>>
where
    F: Fn(usize, T) -> Result<R>,
{
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| work(index, item))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_results_keep_input_order() {
        let items: Vec<u64> = (0..16).collect();
        let results = run_indexed(4, items, |index, item| {
            // Early items finish last.
            thread::sleep(Duration::from_millis(16 - item));
            Ok((index, item * 10))
        })
        .unwrap();

        for (position, (index, value)) in results.iter().enumerate() {
            assert_eq!(*index, position);
            assert_eq!(*value, position as u64 * 10);
        }
    }

    #[test]
    fn test_sequential_stops_at_first_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<Vec<()>> = run_indexed(1, vec![1, 2, 3], |index, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            if index == 1 {
                Err(Error::conversion("b.vmdk", "boom"))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_parallel_reports_lowest_failing_index() {
        let result: Result<Vec<()>> = run_indexed(3, vec!["a", "b", "c", "d"], |index, name| {
            if index >= 2 {
                Err(Error::conversion(name, "boom"))
            } else {
                Ok(())
            }
        });
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to convert c"));
    }

    #[test]
    fn test_empty_items() {
        let results: Vec<u8> = run_indexed(4, Vec::<u8>::new(), |_, item| Ok(item)).unwrap();
        assert!(results.is_empty());
    }
}
