//! Thread policies for evaluating partitioned data.
//!
//! An [`ExecutionContext`] is created once and reused across many evaluations:
//! - [`ThreadPolicy::Single`] runs every partition on the caller thread.
//! - [`ThreadPolicy::GlobalPool`] spreads partitions over the global Rayon pool.
//! - [`ThreadPolicy::Dedicated`] builds a private Rayon pool; setup is costly, so the context
//!   should outlive many calls.
//!
//! Partition results are combined only after every partition has finished.

use serde::{Deserialize, Serialize};

use crate::{SaplingError, SaplingResult};

/// Where partition work executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThreadPolicy {
    /// Run work on the current thread.
    #[default]
    Single,
    /// Use the global Rayon pool.
    GlobalPool,
    /// Use a dedicated Rayon pool with `n_threads`.
    Dedicated(usize),
}

impl ThreadPolicy {
    /// Returns `true` if partitions may be evaluated concurrently.
    pub fn is_parallel(&self) -> bool {
        !matches!(self, ThreadPolicy::Single)
    }
}

/// Owns a thread policy and, for [`ThreadPolicy::Dedicated`], the pool that serves it.
#[derive(Debug)]
pub struct ExecutionContext {
    thread_policy: ThreadPolicy,
    #[cfg(feature = "rayon")]
    dedicated_pool: Option<rayon::ThreadPool>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            thread_policy: ThreadPolicy::Single,
            #[cfg(feature = "rayon")]
            dedicated_pool: None,
        }
    }
}

impl ExecutionContext {
    /// Create a new context with the requested thread policy.
    ///
    /// # Errors
    ///
    /// [`SaplingError::ExecutionContextError`] for a non-single policy without the `rayon`
    /// feature or for a dedicated pool of zero threads, and [`SaplingError::ThreadPoolError`] if
    /// the pool cannot be built.
    pub fn new(thread_policy: ThreadPolicy) -> SaplingResult<Self> {
        #[cfg(not(feature = "rayon"))]
        {
            if thread_policy != ThreadPolicy::Single {
                return Err(SaplingError::ExecutionContextError {
                    reason: "Rayon feature is required for non-single thread policies".into(),
                });
            }
        }

        #[cfg(feature = "rayon")]
        let dedicated_pool = match thread_policy {
            ThreadPolicy::Dedicated(n_threads) => {
                if n_threads == 0 {
                    return Err(SaplingError::ExecutionContextError {
                        reason: "Dedicated thread pool size must be >= 1".into(),
                    });
                }
                Some(
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(n_threads)
                        .build()?,
                )
            }
            ThreadPolicy::Single | ThreadPolicy::GlobalPool => None,
        };

        Ok(Self {
            thread_policy,
            #[cfg(feature = "rayon")]
            dedicated_pool,
        })
    }

    /// Return the configured thread policy.
    pub fn thread_policy(&self) -> ThreadPolicy {
        self.thread_policy
    }

    /// Number of threads work may be spread over.
    pub fn n_threads(&self) -> usize {
        match self.thread_policy {
            ThreadPolicy::Single => 1,
            #[cfg(feature = "rayon")]
            ThreadPolicy::GlobalPool => rayon::current_num_threads(),
            #[cfg(not(feature = "rayon"))]
            ThreadPolicy::GlobalPool => 1,
            ThreadPolicy::Dedicated(n) => n,
        }
    }

    /// Execute work under this context's thread policy.
    ///
    /// `Dedicated` runs inside the dedicated pool. Other policies run the closure directly.
    #[cfg(feature = "rayon")]
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.dedicated_pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    /// Execute work under this context's thread policy.
    #[cfg(not(feature = "rayon"))]
    pub fn install<R>(&self, op: impl FnOnce() -> R) -> R {
        op()
    }

    /// Apply `op` to every item, concurrently unless the policy is [`ThreadPolicy::Single`], and
    /// collect the results in input order. The first error aborts the collection.
    #[cfg(feature = "rayon")]
    pub fn map_collect<T, R, F>(&self, items: Vec<T>, op: F) -> SaplingResult<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> SaplingResult<R> + Send + Sync,
    {
        use rayon::prelude::*;
        if !self.thread_policy.is_parallel() {
            return items.into_iter().map(op).collect();
        }
        self.install(|| items.into_par_iter().map(op).collect())
    }

    /// Apply `op` to every item on the caller thread and collect the results in input order.
    #[cfg(not(feature = "rayon"))]
    pub fn map_collect<T, R, F>(&self, items: Vec<T>, op: F) -> SaplingResult<Vec<R>>
    where
        F: Fn(T) -> SaplingResult<R>,
    {
        items.into_iter().map(op).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_policy() {
        let ctx = ExecutionContext::new(ThreadPolicy::Single).unwrap();
        assert_eq!(ctx.thread_policy(), ThreadPolicy::Single);
        assert_eq!(ctx.n_threads(), 1);
        assert_eq!(ctx.install(|| 2 + 2), 4);
        let squares = ctx.map_collect(vec![1, 2, 3], |x| Ok(x * x)).unwrap();
        assert_eq!(squares, vec![1, 4, 9]);
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_dedicated_policy() {
        assert!(matches!(
            ExecutionContext::new(ThreadPolicy::Dedicated(0)),
            Err(SaplingError::ExecutionContextError { .. })
        ));
        let ctx = ExecutionContext::new(ThreadPolicy::Dedicated(2)).unwrap();
        assert_eq!(ctx.n_threads(), 2);
        assert_eq!(ctx.install(rayon::current_num_threads), 2);
        let squares = ctx
            .map_collect((0..100).collect(), |x: usize| Ok(x * x))
            .unwrap();
        assert_eq!(squares[99], 99 * 99);
        let failed = ctx.map_collect(vec![1, 2, 3], |x| {
            if x == 2 {
                Err(SaplingError::Custom("two".to_string()))
            } else {
                Ok(x)
            }
        });
        assert!(failed.is_err());
    }

    #[cfg(not(feature = "rayon"))]
    #[test]
    fn test_parallel_policies_need_rayon() {
        assert!(ExecutionContext::new(ThreadPolicy::GlobalPool).is_err());
    }
}
