//! Random forest inference over trees stored as parallel node arrays

use crate::error::ClassifyError;
use serde::{Deserialize, Serialize};

/// Marker in `children_left` for leaf nodes
pub const LEAF: i64 = -1;

/// Serialized tree: node `i` is described by index `i` of every array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSpec {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    /// Per-node class counts (or weights), `n_classes` entries each
    pub value: Vec<Vec<f64>>,
}

/// Serialized classifier section of the artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestSpec {
    pub n_classes: usize,
    pub classes: Vec<i64>,
    pub trees: Vec<TreeSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Leaf distribution, stored already normalized in `DecisionTree::leaf_probs`
    Leaf { offset: usize },
}

/// Validated decision tree
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    nodes: Vec<Node>,
    leaf_probs: Vec<f64>,
    n_classes: usize,
}

impl DecisionTree {
    /// Validate a serialized tree against the classifier's input width and class count
    ///
    /// Children must point forward, so traversal always terminates.
    pub fn from_spec(spec: &TreeSpec, n_features: usize, n_classes: usize) -> Result<Self, String> {
        let n = spec.children_left.len();
        if n == 0 {
            return Err("tree has no nodes".to_string());
        }
        if spec.children_right.len() != n
            || spec.feature.len() != n
            || spec.threshold.len() != n
            || spec.value.len() != n
        {
            return Err("tree node arrays differ in length".to_string());
        }

        let mut nodes = Vec::with_capacity(n);
        let mut leaf_probs = Vec::new();

        for i in 0..n {
            let (left, right) = (spec.children_left[i], spec.children_right[i]);
            if left == LEAF {
                let counts = &spec.value[i];
                if counts.len() != n_classes {
                    return Err(format!(
                        "leaf {} has {} class values, expected {}",
                        i,
                        counts.len(),
                        n_classes
                    ));
                }
                if counts.iter().any(|c| !c.is_finite() || *c < 0.0) {
                    return Err(format!("leaf {} has invalid class values", i));
                }
                let total: f64 = counts.iter().sum();
                if total <= 0.0 {
                    return Err(format!("leaf {} has no samples", i));
                }
                nodes.push(Node::Leaf {
                    offset: leaf_probs.len(),
                });
                leaf_probs.extend(counts.iter().map(|c| c / total));
                continue;
            }

            let in_range = |c: i64| c > i as i64 && (c as usize) < n;
            if !in_range(left) || !in_range(right) {
                return Err(format!("node {} has invalid children ({}, {})", i, left, right));
            }
            let feature = spec.feature[i];
            if feature < 0 || feature as usize >= n_features {
                return Err(format!(
                    "node {} splits on feature {} outside 0..{}",
                    i, feature, n_features
                ));
            }
            if !spec.threshold[i].is_finite() {
                return Err(format!("node {} has a non-finite threshold", i));
            }
            nodes.push(Node::Split {
                feature: feature as usize,
                threshold: spec.threshold[i],
                left: left as usize,
                right: right as usize,
            });
        }

        Ok(Self {
            nodes,
            leaf_probs,
            n_classes,
        })
    }

    /// Normalized class distribution of the leaf `x` falls into
    pub fn predict_proba(&self, x: &[f64]) -> &[f64] {
        let mut i = 0;
        loop {
            match self.nodes[i] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    i = if x[feature] <= threshold { left } else { right };
                }
                Node::Leaf { offset } => {
                    return &self.leaf_probs[offset..offset + self.n_classes];
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Bagged ensemble; class probabilities are the mean over trees
#[derive(Debug, Clone, PartialEq)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    classes: Vec<i64>,
    n_features: usize,
}

impl RandomForest {
    pub fn from_spec(spec: &ForestSpec, n_features: usize) -> Result<Self, String> {
        if spec.n_classes < 2 {
            return Err(format!("classifier needs at least 2 classes, has {}", spec.n_classes));
        }
        if spec.classes.len() != spec.n_classes {
            return Err(format!(
                "classifier lists {} classes but n_classes is {}",
                spec.classes.len(),
                spec.n_classes
            ));
        }
        if spec.trees.is_empty() {
            return Err("classifier has no trees".to_string());
        }
        let trees = spec
            .trees
            .iter()
            .enumerate()
            .map(|(i, t)| {
                DecisionTree::from_spec(t, n_features, spec.n_classes)
                    .map_err(|e| format!("tree {}: {}", i, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            trees,
            classes: spec.classes.clone(),
            n_features,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn predict_proba(&self, x: &[f64]) -> Result<Vec<f64>, ClassifyError> {
        if x.len() != self.n_features {
            return Err(ClassifyError::ClassificationFailed(format!(
                "classifier expects {} features, got {}",
                self.n_features,
                x.len()
            )));
        }
        let mut probs = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            for (acc, p) in probs.iter_mut().zip(tree.predict_proba(x)) {
                *acc += p;
            }
        }
        let n = self.trees.len() as f64;
        for p in probs.iter_mut() {
            *p /= n;
        }
        Ok(probs)
    }

    /// Index of the first maximum
    pub fn argmax(probs: &[f64]) -> usize {
        let mut best = 0;
        for (i, p) in probs.iter().enumerate().skip(1) {
            if *p > probs[best] {
                best = i;
            }
        }
        best
    }
}
