//! Leaf scores.
//!
//! Scores are assigned by one post-fit pass over the leaves and stay
//! fixed afterwards; `predict` only ever reads them. All variants map
//! into `[0, 1]`: 0 is "no evidence", 1 is "as densely sampled as the
//! densest region the tree knows".

use log::debug;

use crate::config::{ScoreConfig, ScoreKind, ScoreReport};
use crate::node::{NodeId, NodeKind};
use crate::tree::Fspt;

/// Computes and stores every leaf's score; called at the end of `fit`.
pub(crate) fn assign_scores(fspt: &mut Fspt) {
    let leaves = fspt.leaves();
    let config = fspt.score_config.clone();
    let (scores, report) = match config.kind {
        ScoreKind::Heuristic => (heuristic_scores(fspt, &leaves), ScoreReport::default()),
        ScoreKind::Density => (density_scores(fspt, &leaves, &config), ScoreReport::default()),
        ScoreKind::AutoDensity => auto_density_scores(fspt, &leaves, &config),
    };
    for (&id, score) in leaves.iter().zip(scores) {
        debug_assert!((0.0..=1.0).contains(&score), "score {score} out of range");
        if let NodeKind::Leaf { score: slot, .. } = &mut fspt.nodes[id].kind {
            *slot = score;
        }
    }
    fspt.score_report = Some(report);
}

/// Importance-weighted sampling heuristic:
/// `sum_i w_i / (1 + E * len_i / (n * len_i^root)) / sum_i w_i`, with
/// `E` the tree's samples-per-feature quotient.
fn heuristic_scores(fspt: &Fspt, leaves: &[NodeId]) -> Vec<f32> {
    let expected = (fspt.n_samples / fspt.n_features) as f32;
    leaves
        .iter()
        .map(|&id| {
            let node = &fspt.nodes[id];
            if node.n_samples == 0 {
                return 0.0;
            }
            let bounds = fspt.node_bounds(id);
            let mut weighted = 0.0f32;
            let mut total = 0.0f32;
            for (feature, &(lo, hi)) in bounds.iter().enumerate() {
                let (root_lo, root_hi) = fspt.bounds[feature];
                let crowding =
                    expected * (hi - lo) / (node.n_samples as f32 * (root_hi - root_lo));
                weighted += fspt.importance[feature] / (1.0 + crowding);
                total += fspt.importance[feature];
            }
            (weighted / total).clamp(0.0, 1.0)
        })
        .collect()
}

/// Sample density of the leaf relative to the tree's overall density.
/// A leaf holding fewer than `min_samples` points carries no evidence
/// and rates 0.
pub(crate) fn raw_density(fspt: &Fspt, id: NodeId) -> f64 {
    let node = &fspt.nodes[id];
    if node.n_samples < fspt.min_samples || node.volume <= 0.0 || fspt.n_samples == 0 {
        return 0.0;
    }
    let leaf_density = node.n_samples as f64 / node.volume;
    let tree_density = fspt.n_samples as f64 / fspt.volume;
    leaf_density / tree_density
}

fn density_scores(fspt: &Fspt, leaves: &[NodeId], config: &ScoreConfig) -> Vec<f32> {
    let raws: Vec<f64> = leaves.iter().map(|&id| raw_density(fspt, id)).collect();
    match config.calibration {
        Some(cal) => {
            let reference = cal.n_samples_p / cal.volume_p;
            raws.iter()
                .map(|&raw| calibrated(raw, reference, cal.score, config.exponential_normalization))
                .collect()
        }
        None => {
            // Without a calibration point the densest leaf defines 1.
            let max = raws.iter().cloned().fold(0.0f64, f64::max);
            if max <= 0.0 {
                return vec![0.0; raws.len()];
            }
            raws.iter().map(|&raw| (raw / max) as f32).collect()
        }
    }
}

fn calibrated(raw: f64, reference: f64, score_at_reference: f64, exponential: bool) -> f32 {
    let scaled = if exponential {
        1.0 - (1.0 - score_at_reference).powf(raw / reference)
    } else {
        score_at_reference * raw / reference
    };
    scaled.clamp(0.0, 1.0) as f32
}

/// Density rescaled so that the automatically chosen threshold `tau`
/// maps to 0.5: leaves above tau hold `samples_p` of the training mass.
fn auto_density_scores(
    fspt: &Fspt,
    leaves: &[NodeId],
    config: &ScoreConfig,
) -> (Vec<f32>, ScoreReport) {
    let raws: Vec<f64> = leaves.iter().map(|&id| raw_density(fspt, id)).collect();
    let mut order: Vec<usize> = (0..leaves.len()).collect();
    order.sort_by(|&a, &b| raws[b].partial_cmp(&raws[a]).expect("density is finite"));

    let total_samples = fspt.n_samples as f64;
    let mut covered = 0.0;
    let mut tau = 0.0;
    let mut above = 0usize;
    for &idx in &order {
        let node = &fspt.nodes[leaves[idx]];
        covered += node.n_samples as f64;
        above += 1;
        tau = raws[idx];
        if total_samples > 0.0 && covered / total_samples >= config.samples_p {
            break;
        }
    }

    if tau <= 0.0 {
        debug!("auto-density found no positive threshold");
        return (
            vec![0.0; leaves.len()],
            ScoreReport {
                tau: None,
                verification_passed: Some(false),
            },
        );
    }

    let above_volume: f64 = order[..above]
        .iter()
        .map(|&idx| fspt.nodes[leaves[idx]].volume)
        .sum();
    let volume_fraction = above_volume / fspt.volume;
    let node_fraction = above as f64 / leaves.len() as f64;
    let passed = volume_fraction <= config.verify_density_thresh
        && node_fraction <= config.verify_n_nodes_p_thresh;
    debug!(
        "auto-density tau {tau:.6}: volume fraction {volume_fraction:.4}, \
         node fraction {node_fraction:.4}, verification {passed}"
    );

    let scores = raws
        .iter()
        .map(|&raw| ((0.5 * raw / tau).clamp(0.0, 1.0)) as f32)
        .collect();
    (
        scores,
        ScoreReport {
            tau: Some(tau),
            verification_passed: Some(passed),
        },
    )
}
