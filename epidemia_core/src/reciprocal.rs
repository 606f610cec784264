//! Skewed size distribution for cities and clusters.
//!
//! Samples are `min + (max - min) * u^power` with `u` uniform, where the
//! power is chosen so that the expected value is `mean`. Most samples land
//! near the minimum with a long tail towards the maximum, which is the
//! shape of real household and city size distributions.

use epidemia_env::RandomSource;

/// Size distribution with fixed minimum, maximum, mean and count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reciprocal {
    min: f64,
    max: f64,
    mean: f64,
    count: usize,
    /// `None` when `min < mean < max` does not hold and every value is the mean
    power: Option<f64>,
}

impl Reciprocal {
    pub fn new(min: f64, max: f64, count: usize, mean: f64) -> Self {
        let power = if min < mean && mean < max {
            Some((max - min) / (mean - min) - 1.0)
        } else {
            None
        };
        Self {
            min,
            max,
            mean,
            count,
            power,
        }
    }

    /// Draws a single value.
    pub fn sample<R: RandomSource>(&self, rng: &mut R) -> f64 {
        match self.power {
            Some(power) => self.min + (self.max - self.min) * rng.uniform().powf(power),
            None => self.mean,
        }
    }

    /// Target sum of an integer draw.
    pub fn total(&self) -> u64 {
        (self.mean * self.count as f64).round().max(0.0) as u64
    }

    /// Draws `count` integers, largest first, that sum exactly to
    /// `round(mean * count)`.
    ///
    /// The largest value is pinned to `max` and the smallest to `min`; the
    /// values in between are scaled to hit the total and then nudged by one
    /// until it is exact. No value is ever below `min`.
    pub fn values_int<R: RandomSource>(&self, rng: &mut R) -> Vec<u32> {
        let total = self.total() as i64;
        let floor = self.min.max(0.0).round() as i64;
        let mut values: Vec<i64> = match (self.count, self.power) {
            (0, _) => return Vec::new(),
            (1, _) => return vec![total.max(0) as u32],
            (n, None) => vec![total / n as i64; n],
            (n, Some(_)) => {
                let mut drawn: Vec<i64> = (0..n)
                    .map(|_| (self.sample(rng).round() as i64).max(floor))
                    .collect();
                drawn.sort_unstable_by(|a, b| b.cmp(a));
                drawn[0] = self.max.round() as i64;
                drawn[n - 1] = floor;
                if n > 2 {
                    let ends = drawn[0] + drawn[n - 1];
                    let middle: i64 = drawn[1..n - 1].iter().sum();
                    let wanted = total - ends;
                    if middle > 0 && wanted > 0 {
                        let ratio = wanted as f64 / middle as f64;
                        for v in &mut drawn[1..n - 1] {
                            *v = ((*v as f64 * ratio).round() as i64).max(floor);
                        }
                    }
                }
                drawn
            }
        };
        settle(&mut values, total, floor);
        values.sort_unstable_by(|a, b| b.cmp(a));
        values.into_iter().map(|v| v.max(0) as u32).collect()
    }
}

/// Adjusts values by one at a time until they sum to `total`, interior
/// values first, never taking any value below `floor`.
fn settle(values: &mut [i64], total: i64, floor: i64) {
    let n = values.len();
    let order: Vec<usize> = (1..n.saturating_sub(1)).chain([0, n - 1]).collect();
    let mut diff = total - values.iter().sum::<i64>();
    while diff != 0 {
        let step = diff.signum();
        let mut moved = false;
        for &i in &order {
            if diff == 0 {
                break;
            }
            if step > 0 || values[i] > floor {
                values[i] += step;
                diff -= step;
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epidemia_env::RngFactory;
    use proptest::prelude::*;

    #[test]
    fn test_sample_within_bounds() {
        let recip = Reciprocal::new(2.0, 50.0, 100, 8.0);
        let mut rng = RngFactory::new(9).stream(0);
        for _ in 0..1000 {
            let v = recip.sample(&mut rng);
            assert!((2.0..=50.0).contains(&v));
        }
    }

    #[test]
    fn test_degenerate_is_even_split() {
        let recip = Reciprocal::new(5.0, 5.0, 4, 5.0);
        let mut rng = RngFactory::new(9).stream(0);
        assert_eq!(recip.values_int(&mut rng), vec![5, 5, 5, 5]);
    }

    #[test]
    fn test_single_value_is_total() {
        let recip = Reciprocal::new(1.0, 10.0, 1, 7.0);
        let mut rng = RngFactory::new(9).stream(0);
        assert_eq!(recip.values_int(&mut rng), vec![7]);
    }

    #[test]
    fn test_city_sized_draw() {
        let recip = Reciprocal::new(560.0, 3000.0, 5, 2000.0);
        let mut rng = RngFactory::new(4).stream(0);
        let values = recip.values_int(&mut rng);
        assert_eq!(values.iter().map(|&v| v as u64).sum::<u64>(), 10_000);
        assert!(values.windows(2).all(|w| w[0] >= w[1]));
        assert!(values.iter().all(|&v| v >= 560));
    }

    proptest! {
        #[test]
        fn prop_values_sum_exactly(
            min in 1u32..10,
            extra_mean in 1u32..50,
            extra_max in 1u32..200,
            count in 2usize..200,
            seed in 1u64..1000,
        ) {
            let mean = (min + extra_mean) as f64;
            let max = mean + extra_max as f64;
            let recip = Reciprocal::new(min as f64, max, count, mean);
            let mut rng = RngFactory::new(seed).stream(0);
            let values = recip.values_int(&mut rng);
            prop_assert_eq!(values.len(), count);
            prop_assert_eq!(values.iter().map(|&v| v as u64).sum::<u64>(), recip.total());
            prop_assert!(values.iter().all(|&v| v >= min));
        }
    }
}
