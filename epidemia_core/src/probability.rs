//! Probability combination.
//!
//! Exposure values are probabilities. Independent contributions combine as
//! `1 - (1-a)(1-b)`, the chance that at least one of them fires, so repeated
//! deposits saturate towards 1 instead of overflowing it.

/// Combines two independent probabilities.
#[inline]
pub fn combine(a: f32, b: f32) -> f32 {
    (1.0 - (1.0 - a) * (1.0 - b)).clamp(0.0, 1.0)
}

/// Combines any number of independent probabilities.
pub fn combine_all(values: impl IntoIterator<Item = f32>) -> f32 {
    values.into_iter().fold(0.0, combine)
}

/// Clamps a scaled probability back into `[0, 1]`.
#[inline]
pub fn scaled(p: f32, factor: f32) -> f32 {
    (p * factor).clamp(0.0, 1.0)
}
