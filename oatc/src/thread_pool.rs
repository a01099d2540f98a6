//! Parallel execution of indexed work.

use crate::error::DriverResult;
use rayon::prelude::*;
use std::fmt::Debug;

/// Runs `task(i)` for every `i < count` and returns once all calls are done.
///
/// Implementations may run tasks in any order and on any thread, but must
/// not return early: every phase of the driver is a barrier.
pub trait ThreadPool: Send + Sync + Debug {
    fn thread_count(&self) -> usize;

    fn run(&self, count: usize, task: &(dyn Fn(usize) + Sync));
}

/// A dedicated rayon pool, built once per driver and reused by every phase.
#[derive(Debug)]
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> DriverResult<Self> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("oatc-worker-{i}"))
            .build()?;
        Ok(Self { pool, threads })
    }
}

impl ThreadPool for WorkerPool {
    fn thread_count(&self) -> usize {
        self.threads
    }

    fn run(&self, count: usize, task: &(dyn Fn(usize) + Sync)) {
        self.pool.install(|| (0..count).into_par_iter().for_each(task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    #[test]
    fn test_every_index_runs_once() {
        for threads in [1, 3, 8] {
            let pool = WorkerPool::new(threads).unwrap();
            assert_eq!(pool.thread_count(), threads);
            let seen = Mutex::new(Vec::new());
            pool.run(100, &|i| seen.lock().push(i));
            let mut seen = seen.into_inner();
            seen.sort_unstable();
            assert_eq!(seen, (0..100).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_work_stays_on_pool_threads() {
        let pool = WorkerPool::new(3).unwrap();
        let names = Mutex::new(BTreeSet::new());
        pool.run(64, &|_| {
            let name = std::thread::current().name().map(str::to_string);
            names.lock().insert(name);
        });
        let names = names.into_inner();
        assert!(!names.is_empty());
        assert!(names.len() <= 3);
        for name in names {
            assert!(name.is_some_and(|n| n.starts_with("oatc-worker-")));
        }
    }

    #[test]
    fn test_zero_threads_means_one() {
        assert_eq!(WorkerPool::new(0).unwrap().thread_count(), 1);
    }

    #[test]
    fn test_zero_work() {
        let pool = WorkerPool::new(4).unwrap();
        pool.run(0, &|_| panic!("no work expected"));
    }
}
