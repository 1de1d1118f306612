use std::ops::Range;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Splits index ranges over a private thread pool and gathers one result per partition, in
/// partition order. Below the threshold (or with a single thread) everything runs on the
/// calling thread, as one partition.
pub struct PartitionRunner {
    pool: Option<ThreadPool>,
    threshold: usize,
}

impl PartitionRunner {
    pub fn new(threads: Option<usize>, threshold: usize) -> Result<Self> {
        let pool = match threads {
            Some(0) | Some(1) => None,
            Some(threads) => Some(
                ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .context("could not create the thread pool")?,
            ),
            None => {
                let pool = ThreadPoolBuilder::new()
                    .build()
                    .context("could not create the thread pool")?;
                if pool.current_num_threads() > 1 {
                    Some(pool)
                } else {
                    None
                }
            }
        };
        Ok(Self { pool, threshold })
    }

    /// A runner that never forks.
    pub fn sequential() -> Self {
        Self {
            pool: None,
            threshold: usize::MAX,
        }
    }

    pub fn number_threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or(1, |pool| pool.current_num_threads())
    }

    /// Number of partitions `0..length` would be cut into.
    pub fn number_partitions(&self, length: usize) -> usize {
        if length < self.threshold.max(2) {
            1
        } else {
            self.number_threads().min(length)
        }
    }

    /// Applies `kernel` to contiguous partitions of `0..length` and returns the partition
    /// results ordered by partition start.
    pub fn map_partitions<T, F>(&self, length: usize, kernel: F) -> Vec<T>
    where
        T: Send,
        F: Fn(Range<usize>) -> T + Sync,
    {
        let number_partitions = self.number_partitions(length);
        let pool = match &self.pool {
            Some(pool) if number_partitions > 1 => pool,
            _ => return vec![kernel(0..length)],
        };

        let ranges = partition(length, number_partitions);
        let results: Mutex<Vec<Option<T>>> =
            Mutex::new((0..ranges.len()).map(|_| None).collect());

        let kernel = &kernel;
        let results_ref = &results;
        pool.install(|| {
            pool.scope(|scope| {
                for (index, range) in ranges.iter().cloned().enumerate() {
                    scope.spawn(move |_| {
                        let result = kernel(range);
                        results_ref.lock()[index] = Some(result);
                    });
                }
            });
        });

        results.into_inner().into_iter().flatten().collect()
    }
}

impl std::fmt::Debug for PartitionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionRunner")
            .field("threads", &self.number_threads())
            .field("threshold", &self.threshold)
            .finish()
    }
}

/// Cuts `0..length` into `number` contiguous ranges whose sizes differ by at most one.
pub fn partition(length: usize, number: usize) -> Vec<Range<usize>> {
    let number = number.max(1);
    let base = length / number;
    let extra = length % number;
    let mut start = 0;
    (0..number)
        .map(|index| {
            let size = base + usize::from(index < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_cover_range() {
        let ranges = partition(10, 3);
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);
        assert_eq!(partition(2, 4).iter().map(|r| r.len()).sum::<usize>(), 2);
    }

    #[test]
    fn results_in_partition_order() {
        let runner = PartitionRunner::new(Some(4), 16).unwrap();
        let values: Vec<usize> = (0..1000).collect();
        let sums = runner.map_partitions(values.len(), |range| {
            (range.start, values[range].iter().sum::<usize>())
        });
        assert!(sums.windows(2).all(|pair| pair[0].0 < pair[1].0));
        assert_eq!(sums.iter().map(|(_, sum)| sum).sum::<usize>(), 499500);
    }

    #[test]
    fn small_work_stays_sequential() {
        let runner = PartitionRunner::new(Some(4), 1000).unwrap();
        assert_eq!(runner.number_partitions(999), 1);
        let result = runner.map_partitions(10, |range| range.len());
        assert_eq!(result, vec![10]);

        let runner = PartitionRunner::sequential();
        assert_eq!(runner.number_threads(), 1);
        assert_eq!(runner.map_partitions(5, |range| range.end), vec![5]);
    }
}
