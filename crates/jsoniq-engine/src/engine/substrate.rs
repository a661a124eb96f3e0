//! Distributed-computation substrate.
//!
//! Delegated pipeline stages never talk to a concrete backend; they go
//! through [`Substrate`], which offers the four operations a delegated FLWOR
//! prefix needs: distribute tuples into partitions, map, filter, and collect
//! back into one ordered sequence.

use std::sync::Arc;

use itertools::Itertools;
use rayon::ThreadPool;
use rayon::prelude::*;
use tracing::debug;

use crate::engine::context::Tuple;
use crate::engine::runtime::{Error, ErrorCode, Result};

/// Per-tuple transformation shipped to workers.
pub type TupleFn = Arc<dyn Fn(Tuple) -> Result<Tuple> + Send + Sync>;

/// Per-tuple predicate shipped to workers.
pub type TuplePredicate = Arc<dyn Fn(&Tuple) -> Result<bool> + Send + Sync>;

/// A distributed collection of tuples. Partition order and the order inside
/// each partition are significant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partitioned {
    partitions: Vec<Vec<Tuple>>,
}

impl Partitioned {
    pub fn new(partitions: Vec<Vec<Tuple>>) -> Self {
        Self { partitions }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Total number of tuples over all partitions.
    pub fn len(&self) -> usize {
        self.partitions.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(Vec::is_empty)
    }

    pub fn partitions(&self) -> &[Vec<Tuple>] {
        &self.partitions
    }

    pub fn into_partitions(self) -> Vec<Vec<Tuple>> {
        self.partitions
    }
}

pub trait Substrate: Send + Sync {
    fn name(&self) -> &'static str;

    /// Split `tuples` into at most `partitions` contiguous, order-preserving
    /// chunks.
    fn distribute(&self, tuples: Vec<Tuple>, partitions: usize) -> Result<Partitioned> {
        let partitions = partitions.max(1);
        let chunk = tuples.len().div_ceil(partitions).max(1);
        let chunks: Vec<Vec<Tuple>> = tuples
            .into_iter()
            .chunks(chunk)
            .into_iter()
            .map(Iterator::collect)
            .collect();
        debug!(substrate = self.name(), partitions = chunks.len(), "distribute");
        Ok(Partitioned::new(chunks))
    }

    fn map(&self, data: Partitioned, f: TupleFn) -> Result<Partitioned>;

    fn filter(&self, data: Partitioned, predicate: TuplePredicate) -> Result<Partitioned>;

    /// Concatenate all partitions in order.
    fn collect(&self, data: Partitioned) -> Result<Vec<Tuple>> {
        let tuples: Vec<Tuple> = data.into_partitions().into_iter().flatten().collect();
        debug!(substrate = self.name(), tuples = tuples.len(), "collect");
        Ok(tuples)
    }
}

fn map_partition(part: Vec<Tuple>, f: &TupleFn) -> Result<Vec<Tuple>> {
    part.into_iter().map(|t| f(t)).collect()
}

fn filter_partition(part: Vec<Tuple>, predicate: &TuplePredicate) -> Result<Vec<Tuple>> {
    let mut kept = Vec::with_capacity(part.len());
    for tuple in part {
        if predicate(&tuple)? {
            kept.push(tuple);
        }
    }
    Ok(kept)
}

/// Runs every stage sequentially on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineSubstrate;

impl Substrate for InlineSubstrate {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn map(&self, data: Partitioned, f: TupleFn) -> Result<Partitioned> {
        let parts = data
            .into_partitions()
            .into_iter()
            .map(|p| map_partition(p, &f))
            .collect::<Result<Vec<_>>>()?;
        Ok(Partitioned::new(parts))
    }

    fn filter(&self, data: Partitioned, predicate: TuplePredicate) -> Result<Partitioned> {
        let parts = data
            .into_partitions()
            .into_iter()
            .map(|p| filter_partition(p, &predicate))
            .collect::<Result<Vec<_>>>()?;
        Ok(Partitioned::new(parts))
    }
}

/// Processes partitions in parallel on a rayon pool, one task per partition.
#[derive(Clone, Default)]
pub struct RayonSubstrate {
    pool: Option<Arc<ThreadPool>>,
}

impl RayonSubstrate {
    /// Use rayon's global pool.
    pub fn new() -> Self {
        Self { pool: None }
    }

    /// Use a dedicated pool of `threads` workers.
    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("jsoniq-substrate-{i}"))
            .build()
            .map_err(|e| {
                Error::from_code(ErrorCode::ENGN0002, "failed to build substrate thread pool")
                    .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
            })?;
        Ok(Self {
            pool: Some(Arc::new(pool)),
        })
    }

    fn run<R: Send>(&self, job: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(job),
            None => job(),
        }
    }
}

impl Substrate for RayonSubstrate {
    fn name(&self) -> &'static str {
        "rayon"
    }

    fn map(&self, data: Partitioned, f: TupleFn) -> Result<Partitioned> {
        let parts = self.run(|| {
            data.into_partitions()
                .into_par_iter()
                .map(|p| map_partition(p, &f))
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(Partitioned::new(parts))
    }

    fn filter(&self, data: Partitioned, predicate: TuplePredicate) -> Result<Partitioned> {
        let parts = self.run(|| {
            data.into_partitions()
                .into_par_iter()
                .map(|p| filter_partition(p, &predicate))
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(Partitioned::new(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Item;

    fn tuples(n: i64) -> Vec<Tuple> {
        (1..=n).map(|i| Tuple::new().with("x", vec![Item::Integer(i)])).collect()
    }

    #[test]
    fn distribute_keeps_order_and_bounds_partitions() {
        let data = InlineSubstrate.distribute(tuples(10), 3).unwrap();
        assert_eq!(data.partition_count(), 3);
        assert_eq!(data.len(), 10);
        assert_eq!(InlineSubstrate.collect(data).unwrap(), tuples(10));
    }

    #[test]
    fn more_partitions_than_tuples() {
        let data = InlineSubstrate.distribute(tuples(2), 8).unwrap();
        assert_eq!(data.partition_count(), 2);
        let empty = InlineSubstrate.distribute(Vec::new(), 4).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn rayon_filter_matches_inline() {
        let keep_even: TuplePredicate = Arc::new(|t: &Tuple| {
            Ok(matches!(t.get("x").map(Vec::as_slice), Some([Item::Integer(i)]) if i % 2 == 0))
        });
        let inline = {
            let data = InlineSubstrate.distribute(tuples(20), 4).unwrap();
            InlineSubstrate.collect(InlineSubstrate.filter(data, keep_even.clone()).unwrap()).unwrap()
        };
        let rayon = {
            let substrate = RayonSubstrate::with_threads(2).unwrap();
            let data = substrate.distribute(tuples(20), 4).unwrap();
            substrate.collect(substrate.filter(data, keep_even).unwrap()).unwrap()
        };
        assert_eq!(inline, rayon);
        assert_eq!(inline.len(), 10);
    }

    #[test]
    fn map_errors_propagate() {
        let failing: TupleFn = Arc::new(|_| Err(Error::type_mismatch("boom")));
        let data = InlineSubstrate.distribute(tuples(3), 2).unwrap();
        assert!(RayonSubstrate::new().map(data, failing).is_err());
    }
}
