//! Weighted random choice over a fixed candidate list.

use epidemia_env::RandomSource;

/// Chooses among fixed candidates with probability proportional to a weight.
///
/// Weights are extracted once at construction and stored as cumulative
/// boundaries, so each draw is one uniform sample plus a binary search.
#[derive(Debug, Clone)]
pub struct Chooser<T> {
    /// Candidates, in construction order
    items: Vec<T>,

    /// Running total of weights; `cumulative[i]` is the upper bound for item `i`
    cumulative: Vec<f64>,
}

impl<T> Chooser<T> {
    /// Builds a chooser, extracting each candidate's weight with `weight`.
    /// Negative or non-finite weights count as zero.
    pub fn new(items: Vec<T>, weight: impl Fn(&T) -> f64) -> Self {
        let mut total = 0.0;
        let cumulative = items
            .iter()
            .map(|item| {
                let w = weight(item);
                if w.is_finite() && w > 0.0 {
                    total += w;
                }
                total
            })
            .collect();
        Self { items, cumulative }
    }

    /// Sum of all weights.
    pub fn total_weight(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when there is nothing to choose.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Candidates in construction order.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Draws one candidate. When every weight is zero the draw is uniform.
    pub fn choose<R: RandomSource>(&self, rng: &mut R) -> Option<&T> {
        if self.items.is_empty() {
            return None;
        }
        let total = self.total_weight();
        if total <= 0.0 {
            let index = rng.uniform_int(0, self.items.len() as u64 - 1) as usize;
            return self.items.get(index);
        }
        let target = rng.uniform() * total;
        let index = self
            .cumulative
            .partition_point(|&bound| bound <= target)
            .min(self.items.len() - 1);
        self.items.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epidemia_env::RngFactory;
    use proptest::prelude::*;

    #[test]
    fn test_empty_chooser() {
        let chooser: Chooser<u32> = Chooser::new(Vec::new(), |_| 1.0);
        let mut rng = RngFactory::new(1).stream(0);
        assert!(chooser.choose(&mut rng).is_none());
        assert_eq!(chooser.total_weight(), 0.0);
    }

    #[test]
    fn test_zero_weight_never_chosen() {
        let chooser = Chooser::new(vec![0u32, 1, 2], |&i| if i == 1 { 0.0 } else { 1.0 });
        let mut rng = RngFactory::new(3).stream(0);
        for _ in 0..1000 {
            assert_ne!(chooser.choose(&mut rng), Some(&1));
        }
    }

    #[test]
    fn test_weights_respected() {
        let chooser = Chooser::new(vec![0usize, 1], |&i| if i == 0 { 1.0 } else { 3.0 });
        let mut rng = RngFactory::new(11).stream(0);
        let mut counts = [0u32; 2];
        for _ in 0..20_000 {
            counts[*chooser.choose(&mut rng).unwrap()] += 1;
        }
        let ratio = counts[1] as f64 / counts[0] as f64;
        assert!((2.7..3.3).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn test_all_zero_is_uniform() {
        let chooser = Chooser::new(vec![10u32, 20], |_| 0.0);
        let mut rng = RngFactory::new(5).stream(0);
        let picks: Vec<u32> = (0..200).map(|_| *chooser.choose(&mut rng).unwrap()).collect();
        assert!(picks.contains(&10));
        assert!(picks.contains(&20));
    }

    proptest! {
        #[test]
        fn prop_choice_is_a_candidate(
            weights in proptest::collection::vec(0.0f64..10.0, 1..20),
            seed in 1u64..500,
        ) {
            let items: Vec<usize> = (0..weights.len()).collect();
            let chooser = Chooser::new(items, |&i| weights[i]);
            let mut rng = RngFactory::new(seed).stream(0);
            let picked = *chooser.choose(&mut rng).unwrap();
            prop_assert!(picked < weights.len());
            if chooser.total_weight() > 0.0 {
                prop_assert!(weights[picked] > 0.0);
            }
        }
    }
}
