//! Fork/join fan-out over a slice of independent tasks

use crate::error::{IntoHicError, Result};

/// Resolves a requested thread count.
///
/// `0` means one thread per available core; any other value is capped at the
/// number of cores.
#[must_use]
pub fn resolve_num_threads(num_threads: usize) -> usize {
    if num_threads == 0 {
        num_cpus::get()
    } else {
        num_threads.min(num_cpus::get())
    }
}

#[derive(thiserror::Error, Debug)]
#[error("Worker thread panicked")]
struct WorkerPanic;

/// Runs `task` on every item, spreading contiguous chunks over worker threads.
///
/// Results come back in the order of `items`. A failing item does not stop
/// the others, and a worker that panics fails every item of its chunk.
pub fn fork_join<T, R, F>(items: &[T], num_threads: usize, task: F) -> Vec<Result<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let num_threads = resolve_num_threads(num_threads).min(items.len());
    if num_threads <= 1 {
        return items.iter().map(&task).collect();
    }

    let items_per_thread = items.len().div_ceil(num_threads);
    let task = &task;
    std::thread::scope(|scope| {
        let handles: Vec<_> = items
            .chunks(items_per_thread)
            .map(|chunk| {
                let handle = scope.spawn(move || chunk.iter().map(task).collect::<Vec<_>>());
                (chunk.len(), handle)
            })
            .collect();

        let mut results = Vec::with_capacity(items.len());
        for (len, handle) in handles {
            match handle.join() {
                Ok(chunk_results) => results.extend(chunk_results),
                Err(_) => results.extend((0..len).map(|_| Err(WorkerPanic.into_hic_error()))),
            }
        }
        results
    })
}
