//! C7 — coordination plumbing: bounded producer/worker/serializer pipelines,
//! a reorder buffer restoring input order, a cooperative cancel signal, and
//! a progress counter. Worker fan-out runs on `rayon::scope`, message
//! passing runs over `crossbeam-channel` bounded queues. The counting
//! semaphore has no crate in this dependency set, so it is a small
//! `Mutex`+`Condvar` primitive.

use crossbeam_channel::bounded;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use crate::error::{KmcpError, Result};

/// A cooperative cancellation flag. Workers poll it between items rather
/// than being forcibly interrupted.
#[derive(Default)]
pub struct CancelToken(AtomicBool);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(AtomicBool::new(false))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Caps the number of concurrently open artifact files. Neither `std` nor
/// this crate's dependency set ships a counting semaphore, so it's a small
/// `Mutex`+`Condvar` counter.
pub struct Semaphore {
    count: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Semaphore {
            count: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> SemaphoreGuard<'_> {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.available.wait(count).unwrap();
        }
        *count -= 1;
        SemaphoreGuard { sem: self }
    }
}

pub struct SemaphoreGuard<'a> {
    sem: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.sem.count.lock().unwrap();
        *count += 1;
        self.sem.available.notify_one();
    }
}

/// Restores ascending order over results keyed by a monotonic index, even
/// when they complete out of order: a single serializer applies
/// `idx -> result` against a monotonic cursor.
pub struct ReorderBuffer<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> Default for ReorderBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReorderBuffer<T> {
    pub fn new() -> Self {
        ReorderBuffer {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Stores `item` under `idx`; returns every item now ready for emission,
    /// in ascending index order (zero, one, or several if a run of gaps was
    /// just closed).
    pub fn insert(&mut self, idx: u64, item: T) -> Vec<T> {
        self.pending.insert(idx, item);
        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            ready.push(item);
            self.next += 1;
        }
        ready
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty()
    }
}

/// A simple atomic progress counter for an optional injected progress
/// accumulator.
pub struct ProgressCounter {
    processed: AtomicU64,
    total: u64,
}

impl ProgressCounter {
    pub fn new(total: u64) -> Self {
        ProgressCounter {
            processed: AtomicU64::new(0),
            total,
        }
    }

    pub fn inc(&self, n: u64) -> u64 {
        self.processed.fetch_add(n, Ordering::SeqCst) + n
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            100.0 * self.processed() as f64 / self.total as f64
        }
    }
}

/// Runs `work` over `items` with `n_workers` concurrent workers (fanned out
/// on `rayon::scope`) and returns results in the same order as `items`,
/// regardless of completion order. A worker error cancels the run; the
/// first error observed is returned.
pub fn run_ordered<I, O, F>(
    items: Vec<I>,
    n_workers: usize,
    buffer_len: usize,
    cancel: &CancelToken,
    work: F,
) -> Result<Vec<O>>
where
    I: Send,
    O: Send,
    F: Fn(usize, I) -> Result<O> + Sync,
{
    let total = items.len();
    let (work_tx, work_rx) = bounded::<(u64, I)>(buffer_len.max(1));
    let (result_tx, result_rx) = bounded::<(u64, Result<O>)>(buffer_len.max(1));
    let work = &work;

    let mut first_err: Option<KmcpError> = None;
    let mut ordered: Vec<Option<O>> = Vec::new();
    ordered.resize_with(total, || None);

    rayon::scope(|scope| {
        scope.spawn(|_| {
            for (idx, item) in items.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    break;
                }
                if work_tx.send((idx as u64, item)).is_err() {
                    break;
                }
            }
        });

        for _ in 0..n_workers.max(1) {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move |_| {
                while let Ok((idx, item)) = work_rx.recv() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let out = work(idx as usize, item);
                    let is_err = out.is_err();
                    if result_tx.send((idx, out)).is_err() {
                        break;
                    }
                    if is_err {
                        break;
                    }
                }
            });
        }
        drop(result_tx);
        drop(work_rx);

        for (idx, res) in result_rx.iter() {
            match res {
                Ok(v) => ordered[idx as usize] = Some(v),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                    cancel.cancel();
                }
            }
        }
    });

    if let Some(e) = first_err {
        return Err(e);
    }
    Ok(ordered.into_iter().flatten().collect())
}

/// Like [`run_ordered`], but returns results as workers complete rather than
/// in input order. With ordering off, each `O` here is still one item's
/// whole, contiguous result group. Cheaper than `run_ordered` under high
/// thread counts since nothing waits on a cursor.
pub fn run_unordered<I, O, F>(
    items: Vec<I>,
    n_workers: usize,
    buffer_len: usize,
    cancel: &CancelToken,
    work: F,
) -> Result<Vec<O>>
where
    I: Send,
    O: Send,
    F: Fn(usize, I) -> Result<O> + Sync,
{
    let (work_tx, work_rx) = bounded::<(u64, I)>(buffer_len.max(1));
    let (result_tx, result_rx) = bounded::<Result<O>>(buffer_len.max(1));
    let work = &work;

    let mut first_err: Option<KmcpError> = None;
    let mut out = Vec::new();

    rayon::scope(|scope| {
        scope.spawn(|_| {
            for (idx, item) in items.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    break;
                }
                if work_tx.send((idx as u64, item)).is_err() {
                    break;
                }
            }
        });

        for _ in 0..n_workers.max(1) {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move |_| {
                while let Ok((idx, item)) = work_rx.recv() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let out = work(idx as usize, item);
                    let is_err = out.is_err();
                    if result_tx.send(out).is_err() {
                        break;
                    }
                    if is_err {
                        break;
                    }
                }
            });
        }
        drop(result_tx);
        drop(work_rx);

        for res in result_rx.iter() {
            match res {
                Ok(v) => out.push(v),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                    cancel.cancel();
                }
            }
        }
    });

    if let Some(e) = first_err {
        return Err(e);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorder_buffer_emits_only_contiguous_runs() {
        let mut buf: ReorderBuffer<u32> = ReorderBuffer::new();
        assert_eq!(buf.insert(1, 10), Vec::<u32>::new());
        assert_eq!(buf.insert(0, 5), vec![5, 10]);
        assert_eq!(buf.insert(2, 15), vec![15]);
        assert!(buf.is_drained());
    }

    #[test]
    fn semaphore_limits_concurrent_holders() {
        use std::sync::Arc;
        let sem = Arc::new(Semaphore::new(1));
        let _guard = sem.acquire();
        let sem2 = Arc::clone(&sem);
        let handle = std::thread::spawn(move || {
            let _g = sem2.acquire();
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!handle.is_finished());
        drop(_guard);
        handle.join().unwrap();
    }

    #[test]
    fn run_ordered_preserves_input_order() {
        let items: Vec<u64> = (0..50).collect();
        let cancel = CancelToken::new();
        let results = run_ordered(items.clone(), 4, 8, &cancel, |_idx, x| Ok(x * 2)).unwrap();
        let expected: Vec<u64> = items.iter().map(|x| x * 2).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn run_ordered_propagates_worker_error() {
        let items = vec![1u64, 2, 3];
        let cancel = CancelToken::new();
        let result = run_ordered(items, 2, 4, &cancel, |_idx, x| {
            if x == 2 {
                Err(KmcpError::Cancelled)
            } else {
                Ok(x)
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn run_unordered_yields_every_item_regardless_of_completion_order() {
        let items: Vec<u64> = (0..50).collect();
        let cancel = CancelToken::new();
        let mut results = run_unordered(items.clone(), 4, 8, &cancel, |_idx, x| Ok(x * 2)).unwrap();
        results.sort_unstable();
        let mut expected: Vec<u64> = items.iter().map(|x| x * 2).collect();
        expected.sort_unstable();
        assert_eq!(results, expected);
    }

    #[test]
    fn run_unordered_propagates_worker_error() {
        let items = vec![1u64, 2, 3];
        let cancel = CancelToken::new();
        let result = run_unordered(items, 2, 4, &cancel, |_idx, x| {
            if x == 2 {
                Err(KmcpError::Cancelled)
            } else {
                Ok(x)
            }
        });
        assert!(result.is_err());
    }
}
