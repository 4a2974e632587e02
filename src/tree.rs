//! Regression trees for the landmark cascade.
//!
//! Trees are stored the way dlib serializes them: a complete binary tree
//! whose split nodes come first, so node `i` has children `2i + 1` and
//! `2i + 2`, and any index past the last split addresses a leaf.

use crate::error::{Error, Result};
use crate::types::Shape;

/// Compare the intensities of two sampled feature pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Split {
    pub idx1: usize,
    pub idx2: usize,
    pub threshold: f32,
}

#[derive(Debug, Clone)]
pub(crate) struct RegressionTree {
    splits: Vec<Split>,
    leaves: Vec<Shape>,
}

impl RegressionTree {
    pub fn new(splits: Vec<Split>, leaves: Vec<Shape>) -> Result<Self> {
        if leaves.len() != splits.len() + 1 {
            return Err(Error::InvalidModel(format!(
                "tree with {} splits needs {} leaves, got {}",
                splits.len(),
                splits.len() + 1,
                leaves.len()
            )));
        }
        Ok(Self { splits, leaves })
    }

    /// Largest feature index any split reads.
    pub fn max_feature(&self) -> Option<usize> {
        self.splits.iter().map(|s| s.idx1.max(s.idx2)).max()
    }

    /// Walk from the root to a leaf.
    ///
    /// `pixels` holds the sampled intensity of every feature point of the
    /// stage. A split goes left when `pixels[idx1] - pixels[idx2]` exceeds
    /// its threshold.
    pub fn leaf(&self, pixels: &[f32]) -> &Shape {
        let mut node = 0;
        while let Some(split) = self.splits.get(node) {
            node = if pixels[split.idx1] - pixels[split.idx2] > split.threshold {
                2 * node + 1
            } else {
                2 * node + 2
            };
        }
        &self.leaves[node - self.splits.len()]
    }
}

/// The trees of one cascade stage; their leaf deltas are summed.
#[derive(Debug, Clone)]
pub(crate) struct Forest {
    trees: Vec<RegressionTree>,
}

impl Forest {
    pub fn new(trees: Vec<RegressionTree>) -> Self {
        Self { trees }
    }

    pub fn max_feature(&self) -> Option<usize> {
        self.trees.iter().filter_map(RegressionTree::max_feature).max()
    }

    pub fn predict(&self, pixels: &[f32], num_landmarks: usize) -> Shape {
        let mut delta = Shape::zeros(num_landmarks);
        for tree in &self.trees {
            delta.add_delta(tree.leaf(pixels));
        }
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn leaf(x: f32) -> Shape {
        Shape::new(vec![Point::new(x, -x)])
    }

    #[test]
    fn split_goes_left_above_threshold() {
        //        [0]
        //      /     \
        //    [1]     [2]
        //   /   \   /   \
        //  L0   L1 L2   L3
        let tree = RegressionTree::new(
            vec![
                Split { idx1: 0, idx2: 1, threshold: 10.0 },
                Split { idx1: 2, idx2: 1, threshold: 0.0 },
                Split { idx1: 1, idx2: 2, threshold: 0.0 },
            ],
            vec![leaf(0.0), leaf(1.0), leaf(2.0), leaf(3.0)],
        )
        .unwrap();

        assert_eq!(tree.leaf(&[50.0, 20.0, 40.0])[0].x, 0.0);
        assert_eq!(tree.leaf(&[50.0, 20.0, 10.0])[0].x, 1.0);
        assert_eq!(tree.leaf(&[25.0, 20.0, 10.0])[0].x, 2.0);
        // Equal to the threshold is not above it.
        assert_eq!(tree.leaf(&[30.0, 20.0, 20.0])[0].x, 3.0);
        assert_eq!(tree.max_feature(), Some(2));
    }

    #[test]
    fn leaf_count_must_match_splits() {
        let err = RegressionTree::new(
            vec![Split { idx1: 0, idx2: 1, threshold: 0.0 }],
            vec![leaf(0.0)],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidModel(_)));
    }

    #[test]
    fn forest_sums_leaves() {
        let forest = Forest::new(vec![
            RegressionTree::new(vec![], vec![leaf(0.25)]).unwrap(),
            RegressionTree::new(vec![], vec![leaf(0.5)]).unwrap(),
        ]);
        let delta = forest.predict(&[], 1);
        assert_eq!(delta[0], Point::new(0.75, -0.75));
        assert_eq!(forest.max_feature(), None);
    }
}
