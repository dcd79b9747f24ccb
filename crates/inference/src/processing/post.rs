use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// How class scores become display probabilities.
///
/// There is deliberately no `Default`: picking one silently changes what the
/// numbers mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbabilityMode {
    /// Mutually exclusive classes; probabilities sum to one.
    #[serde(alias = "exclusive")]
    Softmax,
    /// Independent findings (multi-label); each probability stands alone.
    #[serde(alias = "independent", alias = "multilabel")]
    Sigmoid,
}

impl ProbabilityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbabilityMode::Softmax => "softmax",
            ProbabilityMode::Sigmoid => "sigmoid",
        }
    }

    pub fn apply(&self, scores: &[f32]) -> Vec<f32> {
        match self {
            ProbabilityMode::Softmax => softmax(scores),
            ProbabilityMode::Sigmoid => scores.iter().copied().map(sigmoid).collect(),
        }
    }
}

impl fmt::Display for ProbabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sigmoid activation function
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable softmax (max-shifted).
pub fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![0.0; scores.len()];
    }
    let exps: Vec<f32> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the first maximum, ignoring NaN. `None` when nothing is comparable.
pub fn top_class<'a>(values: impl IntoIterator<Item = &'a f32>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.into_iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        if best.is_none_or(|(_, b)| v > b) {
            best = Some((i, v));
        }
    }
    best.map(|(i, _)| i)
}

/// Pair every configured label with its probability.
pub fn label_probabilities(labels: &[String], probabilities: &[f32]) -> BTreeMap<String, f32> {
    labels
        .iter()
        .cloned()
        .zip(probabilities.iter().copied())
        .collect()
}
