//! Isolation forest inference over an exported tree ensemble.
//!
//! Training happens offline. The exporter writes every tree as a flat node
//! array in depth-first order, so a child index is always greater than its
//! parent's. Scoring follows the usual definition: average path length,
//! normalised by the expected path length of an unsuccessful BST search
//! over `max_samples` points.

use std::path::Path;

use plantwatch_core::feature::{check_layout, FEATURE_COUNT};
use plantwatch_core::FeatureVector;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        /// Training samples that reached this leaf.
        samples: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    pub nodes: Vec<TreeNode>,
}

impl IsolationTree {
    /// Path length of `x` through this tree, including the leaf correction.
    fn path_length(&self, x: &[f64]) -> f64 {
        let mut index = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[index] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if x[*feature] <= *threshold { *left } else { *right };
                    depth += 1.0;
                }
                TreeNode::Leaf { samples } => return depth + average_path_length(*samples),
            }
        }
    }

    fn validate(&self, tree: usize) -> Result<(), ModelError> {
        if self.nodes.is_empty() {
            return Err(ModelError::Invalid(format!("tree {tree} has no nodes")));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } = node
            {
                if *feature >= FEATURE_COUNT {
                    return Err(ModelError::Invalid(format!(
                        "tree {tree} node {i} splits on feature {feature}"
                    )));
                }
                if !threshold.is_finite() {
                    return Err(ModelError::Invalid(format!(
                        "tree {tree} node {i} has a non-finite threshold"
                    )));
                }
                for child in [*left, *right] {
                    if child <= i || child >= self.nodes.len() {
                        return Err(ModelError::Invalid(format!(
                            "tree {tree} node {i} points to child {child}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Expected path length of an unsuccessful search in a BST of `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        n => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Exported isolation forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    /// Artifact label, stamped into logs.
    #[serde(default)]
    pub version: Option<String>,
    /// Training column names; must equal the live feature layout.
    pub feature_names: Vec<String>,
    /// Sub-sample size each tree was grown on.
    pub max_samples: usize,
    /// Threshold learned from the contamination setting.
    pub offset: f64,
    pub trees: Vec<IsolationTree>,
}

impl IsolationForest {
    pub fn from_json(raw: &str) -> Result<Self, ModelError> {
        let forest: Self = serde_json::from_str(raw)?;
        forest.validate()?;
        Ok(forest)
    }

    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    fn validate(&self) -> Result<(), ModelError> {
        check_layout(&self.feature_names)?;
        if self.trees.is_empty() {
            return Err(ModelError::Invalid("forest has no trees".into()));
        }
        if self.max_samples < 2 {
            return Err(ModelError::Invalid(format!(
                "max_samples must be at least 2, got {}",
                self.max_samples
            )));
        }
        if !self.offset.is_finite() {
            return Err(ModelError::Invalid("offset is not finite".into()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(i)?;
        }
        Ok(())
    }

    /// Anomaly score in `[-1, 0)`: lower is more abnormal.
    pub fn score_samples(&self, x: &FeatureVector) -> f64 {
        let values = x.as_slice();
        let mean_path = self
            .trees
            .iter()
            .map(|t| t.path_length(values))
            .sum::<f64>()
            / self.trees.len() as f64;
        -(2f64.powf(-mean_path / average_path_length(self.max_samples)))
    }

    /// Score shifted by the learned offset: negative means outlier.
    pub fn decision_function(&self, x: &FeatureVector) -> f64 {
        self.score_samples(x) - self.offset
    }
}
