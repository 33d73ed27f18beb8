// Query selection for preference labeling
// Picks which candidate queries are shown to the labeler next

use crate::errors::{PrefError, PrefResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Strategy for choosing queries out of a candidate pool.
pub trait QuerySelector {
    fn select_queries<Q: Clone>(&mut self, queries: &[Q], num_queries: usize) -> PrefResult<Vec<Q>>;
}

/// Uniform sampling with replacement.
#[derive(Debug, Clone)]
pub struct RandomQuerySelector {
    rng: StdRng,
}

impl RandomQuerySelector {
    /// Seed from the operating system.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Reproducible selector for tests and replayable runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn select_query<Q: Clone>(&mut self, queries: &[Q]) -> Q {
        let index = self.rng.random_range(0..queries.len());
        queries[index].clone()
    }
}

impl Default for RandomQuerySelector {
    fn default() -> Self {
        Self::new()
    }
}

impl QuerySelector for RandomQuerySelector {
    fn select_queries<Q: Clone>(&mut self, queries: &[Q], num_queries: usize) -> PrefResult<Vec<Q>> {
        if num_queries == 0 {
            return Ok(Vec::new());
        }
        if queries.is_empty() {
            return Err(PrefError::EmptyQueryPool);
        }

        Ok((0..num_queries).map(|_| self.select_query(queries)).collect())
    }
}

/// Returns the newest queries, assuming the pool is ordered oldest first.
#[derive(Debug, Clone, Copy, Default)]
pub struct MostRecentlyGeneratedQuerySelector;

impl QuerySelector for MostRecentlyGeneratedQuerySelector {
    fn select_queries<Q: Clone>(&mut self, queries: &[Q], num_queries: usize) -> PrefResult<Vec<Q>> {
        if num_queries > queries.len() {
            warn!(
                requested = num_queries,
                available = queries.len(),
                "requested more recent queries than the pool holds; returning the whole pool"
            );
        }

        let start = queries.len().saturating_sub(num_queries);
        Ok(queries[start..].to_vec())
    }
}

/// Selection policy as named in configuration and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    #[default]
    Random,
    MostRecent,
}

/// Selector built from a `SelectionPolicy`.
#[derive(Debug, Clone)]
pub enum Selector {
    Random(RandomQuerySelector),
    MostRecent(MostRecentlyGeneratedQuerySelector),
}

impl Selector {
    pub fn from_policy(policy: SelectionPolicy, seed: Option<u64>) -> Self {
        match policy {
            SelectionPolicy::Random => Selector::Random(match seed {
                Some(seed) => RandomQuerySelector::seeded(seed),
                None => RandomQuerySelector::new(),
            }),
            SelectionPolicy::MostRecent => Selector::MostRecent(MostRecentlyGeneratedQuerySelector),
        }
    }
}

impl QuerySelector for Selector {
    fn select_queries<Q: Clone>(&mut self, queries: &[Q], num_queries: usize) -> PrefResult<Vec<Q>> {
        match self {
            Selector::Random(selector) => selector.select_queries(queries, num_queries),
            Selector::MostRecent(selector) => selector.select_queries(queries, num_queries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_selection_draws_members_of_the_pool() {
        let pool = vec![3, 5, 7, 11];
        let mut selector = RandomQuerySelector::seeded(42);

        let selected = selector.select_queries(&pool, 25).unwrap();

        assert_eq!(selected.len(), 25);
        assert!(selected.iter().all(|q| pool.contains(q)));
    }

    #[test]
    fn random_selection_samples_with_replacement() {
        let pool = vec!["only"];
        let mut selector = RandomQuerySelector::seeded(1);

        let selected = selector.select_queries(&pool, 3).unwrap();
        assert_eq!(selected, vec!["only", "only", "only"]);
    }

    #[test]
    fn random_selection_is_reproducible_with_a_seed() {
        let pool: Vec<u32> = (0..100).collect();

        let first = RandomQuerySelector::seeded(7).select_queries(&pool, 10).unwrap();
        let second = RandomQuerySelector::seeded(7).select_queries(&pool, 10).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn random_selection_from_empty_pool_fails() {
        let pool: Vec<u32> = Vec::new();
        let mut selector = RandomQuerySelector::seeded(0);

        let err = selector.select_queries(&pool, 1).unwrap_err();
        assert!(matches!(err, PrefError::EmptyQueryPool));

        assert!(selector.select_queries(&pool, 0).unwrap().is_empty());
    }

    #[test]
    fn most_recent_returns_suffix_in_order() {
        let pool = vec![1, 2, 3, 4, 5];
        let mut selector = MostRecentlyGeneratedQuerySelector;

        assert_eq!(selector.select_queries(&pool, 2).unwrap(), vec![4, 5]);
        assert_eq!(selector.select_queries(&pool, 5).unwrap(), pool);
        assert!(selector.select_queries(&pool, 0).unwrap().is_empty());
    }

    #[test]
    fn most_recent_with_oversized_request_returns_whole_pool() {
        let pool = vec!['a', 'b'];
        let mut selector = MostRecentlyGeneratedQuerySelector;

        assert_eq!(selector.select_queries(&pool, 10).unwrap(), pool);
    }

    #[test]
    fn selector_dispatches_on_policy() {
        let pool = vec![10, 20, 30];

        let mut recent = Selector::from_policy(SelectionPolicy::MostRecent, None);
        assert_eq!(recent.select_queries(&pool, 1).unwrap(), vec![30]);

        let mut random = Selector::from_policy(SelectionPolicy::Random, Some(3));
        let picked = random.select_queries(&pool, 4).unwrap();
        assert_eq!(picked.len(), 4);
    }
}
