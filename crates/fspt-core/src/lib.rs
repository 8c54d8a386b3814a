/*!
Feature space partitioning trees.

An FSPT partitions a bounded feature space with axis-aligned splits,
fitted so that regions holding many training points separate from
regions holding few. Each leaf carries a score in `[0, 1]`; querying a
point returns the score of the leaf it falls into, which makes the tree
a drop-in out-of-distribution detector for a predictor trained on the
same features: a low score means "this region was barely sampled, do
not trust the prediction here".

# Usage Example

```rust,no_run
use fspt_core::{Fspt, CriterionKind, GiniConfig, ScoreConfig, ScoreKind};
use ndarray::Array2;

let bounds = vec![(0.0, 1.0), (0.0, 1.0)];
let mut tree = Fspt::new(
    bounds,
    None,
    CriterionKind::Gini,
    ScoreConfig::new(ScoreKind::Density),
).unwrap();

let x = Array2::from_shape_vec((100, 2), vec![0.5; 200]).unwrap();
tree.fit(x, &GiniConfig::default()).unwrap();

let queries = Array2::from_shape_vec((1, 2), vec![0.5, 0.5]).unwrap();
let scores = tree.predict(queries.view()).unwrap();
assert!(scores[0] >= 0.0 && scores[0] <= 1.0);
```

# Features
- `parallel`: batch `predict` fans out over rayon
- `serde-support`: serde derives on the config records
*/

pub mod config;
pub mod criterion;
pub mod error;
mod io;
pub mod node;
mod score;
pub mod stats;
pub mod tree;

pub use config::{
    Calibration, FitCounters, GiniConfig, ScoreConfig, ScoreKind, ScoreReport,
    UniformityTestLevel,
};
pub use criterion::{CriterionKind, Decision, GiniCriterion, SplitContext, SplitCriterion};
pub use error::{Error, Result};
pub use node::{Node, NodeId, NodeKind, RefusalCause};
pub use stats::{tree_stats, TreeStats};
pub use tree::Fspt;
