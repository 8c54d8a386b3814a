//! Split criterion.
//!
//! The criterion inspects one leaf at a time and either refuses to split
//! it, tagging the refusal cause, or names the feature and value to
//! split on. The Gini criterion searches a random subset of features;
//! per feature it histograms the candidate split points, sub-samples
//! them, and keeps the candidate maximising the gain in Gini index
//! between the training points and the uniform reference mass.

use log::debug;

use fspt_exec::Executor;
use fspt_num::{binomial, rng, solve_quadratic, sort};
use fspt_stats::uniformity_p_value;

use crate::config::{GiniConfig, UniformityTestLevel};
use crate::error::Result;
use crate::node::RefusalCause;

const EPS: f32 = 1e-5;

/// Identifies a criterion implementation in persisted trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum CriterionKind {
    #[default]
    Gini,
}

impl CriterionKind {
    pub(crate) fn to_tag(self) -> i32 {
        match self {
            CriterionKind::Gini => 0,
        }
    }

    pub(crate) fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(CriterionKind::Gini),
            _ => None,
        }
    }
}

/// What the criterion decided for one leaf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Refuse(RefusalCause),
    Split {
        feature: usize,
        value: f32,
        /// The accepted split's gain fell below the gain threshold; the
        /// children inherit an incremented violation counter.
        increment_count: bool,
    },
}

/// Read view of the leaf under scrutiny.
///
/// `samples` is the leaf's block of the tree-level point matrix. The
/// single-threaded search sorts it in place feature by feature; worker
/// tasks only ever copy a column out.
pub struct SplitContext<'a> {
    pub samples: &'a mut [f32],
    pub n_features: usize,
    pub bounds: &'a [(f32, f32)],
    pub root_bounds: &'a [(f32, f32)],
    pub importance: &'a [f32],
    pub n_empty: f32,
    pub volume: f64,
    pub root_volume: f64,
    pub depth: usize,
    pub gain_violations: u32,
}

impl SplitContext<'_> {
    pub fn n_samples(&self) -> usize {
        self.samples.len() / self.n_features
    }

    fn relative_extent(&self, feature: usize) -> f64 {
        let (lo, hi) = self.bounds[feature];
        let (root_lo, root_hi) = self.root_bounds[feature];
        (hi - lo) as f64 / (root_hi - root_lo) as f64
    }
}

/// Strategy seam for split selection; the kind tag names the
/// implementation in persisted trees.
pub trait SplitCriterion {
    fn kind(&self) -> CriterionKind;
    fn select_split(&self, ctx: &mut SplitContext<'_>) -> Result<Decision>;
}

/// The Gini-gain criterion.
pub struct GiniCriterion {
    config: GiniConfig,
    executor: Option<Executor>,
}

impl GiniCriterion {
    pub fn new(config: GiniConfig) -> Self {
        let executor = config.multi_threads.then(|| {
            Executor::builder()
                .queue_capacity(4 * num_cpus::get())
                .build()
        });
        Self { config, executor }
    }

    pub fn config(&self) -> &GiniConfig {
        &self.config
    }
}

impl Drop for GiniCriterion {
    fn drop(&mut self) {
        if let Some(executor) = self.executor.take() {
            executor.shutdown();
        }
    }
}

impl SplitCriterion for GiniCriterion {
    fn kind(&self) -> CriterionKind {
        CriterionKind::Gini
    }

    fn select_split(&self, ctx: &mut SplitContext<'_>) -> Result<Decision> {
        let config = &self.config;
        let n = ctx.n_samples();
        let d = ctx.n_features;

        if n == 0 {
            return Ok(Decision::Refuse(RefusalCause::NoSample));
        }
        if (n as f64 + ctx.n_empty as f64) < 2.0 * config.min_samples as f64 {
            return Ok(Decision::Refuse(RefusalCause::MinSamples));
        }
        if ctx.depth >= config.max_depth {
            return Ok(Decision::Refuse(RefusalCause::MaxDepth));
        }
        if ctx.volume < 2.0 * config.min_volume_p * ctx.root_volume {
            return Ok(Decision::Refuse(RefusalCause::MinVolume));
        }
        if config.min_length_p > 0.0
            && (0..d).any(|f| ctx.relative_extent(f) < config.min_length_p)
        {
            return Ok(Decision::Refuse(RefusalCause::MinLength));
        }
        if config.uniformity_test_level == UniformityTestLevel::Always {
            let p = uniformity_p_value(ctx.samples, ctx.bounds);
            if p > config.unf_alpha {
                return Ok(Decision::Refuse(RefusalCause::Uniformity));
            }
        }

        let max_features = ((d as f32 * config.max_features_p).floor() as usize).clamp(1, d);
        let order = rng::index_order(d);
        let selected = &order[..max_features];
        let min_volume = config.min_volume_p * ctx.root_volume;

        let mut tallies = CandidateTallies::default();
        let searches = match &self.executor {
            Some(executor) => search_features_pooled(executor, ctx, config, selected, min_volume)?,
            None => selected
                .iter()
                .map(|&feature| {
                    sort::sort_rows_by_column(feature, d, ctx.samples);
                    let column: Vec<f32> =
                        ctx.samples.iter().skip(feature).step_by(d).copied().collect();
                    search_one_feature(
                        &column,
                        ctx.bounds[feature],
                        ctx.n_empty,
                        ctx.volume,
                        min_volume,
                        config,
                    )
                })
                .collect(),
        };

        let mut best: Option<(f64, usize, f32)> = None;
        for (&feature, search) in selected.iter().zip(&searches) {
            tallies.merge(&search.tallies);
            if let Some((gain, split)) = search.best {
                let weighted =
                    gain * ctx.importance[feature] as f64 * ctx.relative_extent(feature);
                if best.map_or(true, |(g, _, _)| weighted > g) {
                    best = Some((weighted, feature, split));
                }
            }
        }

        let Some((gain, feature, split)) = best else {
            return Ok(Decision::Refuse(tallies.majority_cause()));
        };

        if gain >= config.gini_gain_thresh {
            debug!("split on feature {feature} at {split} with gain {gain:.6}");
            return Ok(Decision::Split {
                feature,
                value: split,
                increment_count: false,
            });
        }

        if config.uniformity_test_level == UniformityTestLevel::Mixed && config.unf_alpha < 1.0 {
            let p = uniformity_p_value(ctx.samples, ctx.bounds);
            if p > config.unf_alpha {
                return Ok(Decision::Refuse(RefusalCause::Uniformity));
            }
        }
        if ctx.gain_violations >= config.max_consecutive_gain_violations {
            return Ok(Decision::Refuse(RefusalCause::MaxCount));
        }

        let (feature, value) = if config.middle_split {
            // Low gain everywhere: halve the relatively longest feature
            // instead of trusting the histogram argmax. Ties keep the
            // first feature.
            let mut longest = feature;
            let mut longest_extent = 0.0;
            for f in 0..d {
                let extent = ctx.relative_extent(f);
                if extent > longest_extent {
                    longest_extent = extent;
                    longest = f;
                }
            }
            let (lo, hi) = ctx.bounds[longest];
            (longest, (lo + hi) / 2.0)
        } else {
            (feature, split)
        };
        debug!(
            "low-gain split on feature {feature} at {value} (gain {gain:.6}, violations {})",
            ctx.gain_violations
        );
        Ok(Decision::Split {
            feature,
            value,
            increment_count: true,
        })
    }
}

/// Per-candidate refusal tallies, kept per feature and merged by the
/// driver to classify an all-refused search.
#[derive(Debug, Clone, Copy, Default)]
struct CandidateTallies {
    min_samples: usize,
    min_volume: usize,
    min_length: usize,
}

impl CandidateTallies {
    fn merge(&mut self, other: &CandidateTallies) {
        self.min_samples += other.min_samples;
        self.min_volume += other.min_volume;
        self.min_length += other.min_length;
    }

    fn majority_cause(&self) -> RefusalCause {
        let ranked = [
            (self.min_volume, RefusalCause::MinVolume),
            (self.min_samples, RefusalCause::MinSamples),
            (self.min_length, RefusalCause::MinLength),
        ];
        let max = ranked.iter().map(|&(count, _)| count).max().unwrap_or(0);
        if max == 0 {
            return RefusalCause::Unknown;
        }
        // Ties go to the first cause in rank order.
        ranked
            .into_iter()
            .find(|&(count, _)| count == max)
            .map(|(_, cause)| cause)
            .unwrap_or(RefusalCause::Unknown)
    }
}

/// Best split found on one feature: the raw (unweighted) gain and the
/// split value, or `None` when every candidate was refused.
struct FeatureSearch {
    best: Option<(f64, f32)>,
    tallies: CandidateTallies,
}

fn search_features_pooled(
    executor: &Executor,
    ctx: &SplitContext<'_>,
    config: &GiniConfig,
    selected: &[usize],
    min_volume: f64,
) -> Result<Vec<FeatureSearch>> {
    let d = ctx.n_features;
    let futures = selected
        .iter()
        .map(|&feature| {
            let mut column: Vec<f32> =
                ctx.samples.iter().skip(feature).step_by(d).copied().collect();
            let bounds = ctx.bounds[feature];
            let n_empty = ctx.n_empty;
            let volume = ctx.volume;
            let config = config.clone();
            executor.submit_blocking(move || {
                sort::sort_floats(&mut column);
                search_one_feature(&column, bounds, n_empty, volume, min_volume, &config)
            })
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    futures
        .into_iter()
        .map(|future| future.get().map_err(Into::into))
        .collect()
}

/// Scans the candidate histogram of one (sorted) column for the best
/// admissible split.
fn search_one_feature(
    sorted_column: &[f32],
    (node_min, node_max): (f32, f32),
    n_empty: f32,
    volume: f64,
    min_volume: f64,
    config: &GiniConfig,
) -> FeatureSearch {
    let n_samples = sorted_column.len();
    let mut tallies = CandidateTallies::default();
    let (bins, cdf) = histogram(sorted_column, node_min);
    if bins.is_empty() {
        return FeatureSearch {
            best: None,
            tallies,
        };
    }

    let max_tries = ((bins.len() as f32 * config.max_tries_p).floor() as usize).max(1);
    let candidate_order = rng::index_order(bins.len());

    let mut best: Option<(f64, f32)> = None;
    for &index in candidate_order.iter().take(max_tries) {
        let split = bins[index];
        let n_left = cdf[index];
        let n_right = n_samples - n_left;
        let Some(score) = gini_after_split(
            node_min,
            node_max,
            split,
            n_left,
            n_right,
            n_empty,
            volume,
            config.min_samples,
            min_volume,
            config.min_length_p,
            &mut tallies,
        ) else {
            continue;
        };
        let gain = 0.5 - score;
        if gain > 0.0 && best.map_or(true, |(g, _)| gain > g) {
            best = Some((gain, split));
        }
    }
    FeatureSearch { best, tallies }
}

/// Weighted Gini index of the two children produced by splitting at
/// `split`, or `None` when the candidate is inadmissible.
#[allow(clippy::too_many_arguments)]
fn gini_after_split(
    node_min: f32,
    node_max: f32,
    split: f32,
    n_left: usize,
    n_right: usize,
    n_empty: f32,
    volume: f64,
    min_samples: usize,
    min_volume: f64,
    min_length_p: f64,
    tallies: &mut CandidateTallies,
) -> Option<f64> {
    let length = (node_max - node_min) as f64;
    if length == 0.0 {
        return None;
    }
    let prop_left = (split - node_min) as f64 / length;
    let prop_right = (node_max - split) as f64 / length;
    let empty_left = n_empty as f64 * prop_left;
    let empty_right = n_empty as f64 * prop_right;
    let volume_left = volume * prop_left;
    let volume_right = volume * prop_right;

    let mut admissible = true;
    // A split value on the boundary would give a zero-width child.
    if split <= node_min || split >= node_max {
        tallies.min_length += 1;
        admissible = false;
    }
    if empty_left + (n_left as f64) < min_samples as f64
        || empty_right + (n_right as f64) < min_samples as f64
    {
        tallies.min_samples += 1;
        admissible = false;
    }
    if volume_left < min_volume || volume_right < min_volume {
        tallies.min_volume += 1;
        admissible = false;
    }
    if prop_left < min_length_p || prop_right < min_length_p {
        tallies.min_length += 1;
        admissible = false;
    }
    if !admissible {
        return None;
    }

    let gini_left = gini(empty_left, n_left as f64);
    let gini_right = gini(empty_right, n_right as f64);
    let total_left = n_left as f64 + empty_left;
    let total_right = n_right as f64 + empty_right;
    let total = total_left + total_right;
    Some(gini_left * total_left / total + gini_right * total_right / total)
}

/// Gini index of a two-class set: `2xy / (x + y)^2`.
fn gini(x: f64, y: f64) -> f64 {
    2.0 * x * y / ((x + y) * (x + y))
}

/// Candidate-split histogram of a sorted column.
///
/// For every strictly increasing value `v` the histogram holds the pair
/// `(v - eps, cdf_before)` and `(v, cdf_through)`, with `eps` halved
/// from its 1e-5 start until `v - eps` stays above the previous value.
/// Duplicates extend the cdf of their existing bin.
fn histogram(sorted_column: &[f32], lower_bound: f32) -> (Vec<f32>, Vec<usize>) {
    let n = sorted_column.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let mut bins = Vec::with_capacity(2 * n);
    let mut cdf = Vec::with_capacity(2 * n);

    let first = sorted_column[0];
    if first > lower_bound {
        if let Some(eps) = shrink_eps(first, lower_bound) {
            bins.push(first - eps);
            cdf.push(0);
        }
    }
    bins.push(first);
    cdf.push(1);
    let mut last_cdf = 1;
    let mut last_value = first;

    for &value in &sorted_column[1..] {
        debug_assert!(value >= last_value);
        if value > last_value {
            if let Some(eps) = shrink_eps(value, last_value) {
                bins.push(value - eps);
                cdf.push(last_cdf);
            }
            bins.push(value);
            last_cdf += 1;
            cdf.push(last_cdf);
        } else {
            last_cdf += 1;
            *cdf.last_mut().expect("histogram is never empty here") = last_cdf;
        }
        last_value = value;
    }
    (bins, cdf)
}

/// Halves `EPS` until `value - eps` no longer crosses `floor`; `None`
/// when no positive epsilon fits.
fn shrink_eps(value: f32, floor: f32) -> Option<f32> {
    let mut eps = EPS;
    while value - eps < floor {
        eps /= 2.0;
        if eps == 0.0 {
            return None;
        }
    }
    Some(eps)
}

/// P(G(s) <= t): probability that splitting `n` points drawn uniformly
/// on [0, 1] at `s` yields a Gini gain of at most `t`.
///
/// The admissible empirical CDF values form an interval whose ends are
/// the roots of a quadratic in the left-count fraction; the probability
/// is the binomial mass of that interval.
pub fn gain_probability_bound(t: f64, s: f64, n: usize) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    if t >= 0.5 {
        return 1.0;
    }
    let a = t + 0.5;
    let b = 2.0 * t * s - s - 2.0 * t;
    let c = 0.5 * s * (2.0 * (s - 2.0) * t + s);
    match solve_quadratic(a, b, c) {
        Some((x1, x2)) => binomial_interval_mass(x1, x2, n, s),
        None => 0.0,
    }
}

/// P(A <= X/n <= B) for X ~ Binomial(n, s).
fn binomial_interval_mass(a: f64, b: f64, n: usize, s: f64) -> f64 {
    if s <= 0.0 {
        return 0.0;
    }
    if s >= 1.0 {
        return 1.0;
    }
    let a = a.clamp(0.0, 1.0);
    let b = b.clamp(0.0, 1.0);
    let nf = n as f64;
    let to = (nf * b).floor() as usize;
    let from = if nf * a - (nf * a).floor() <= 1e-12 {
        (nf * a).floor() as usize
    } else {
        (nf * a).ceil() as usize
    };
    let mut p = 0.0;
    for i in from..=to.min(n) {
        p += binomial(n, i) as f64 * s.powi(i as i32) * (1.0 - s).powi((n - i) as i32);
    }
    p
}
