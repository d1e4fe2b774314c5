//! Similarity spaces and their distance functions.
//!
//! Every space returns a distance where **lower is better**. Converting back to
//! a "higher is better" similarity score goes through [`Space::similarity`] so
//! the sign convention of each space lives in exactly one place.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance metric family the graph is built against.
///
/// Serialized with the short names used in artifact sidecars and on the
/// command line: `cosine`, `l2`, `ip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Space {
    /// Cosine distance: `1 - cosine_similarity`. Range: \[0, 2\].
    #[serde(rename = "cosine")]
    Cosine,
    /// Squared Euclidean distance (L2²). Range: \[0, ∞).
    #[serde(rename = "l2")]
    Euclidean,
    /// Negative inner product: `-dot(a, b)`.
    #[serde(rename = "ip")]
    InnerProduct,
}

impl Space {
    /// Distance between two equal-length vectors.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Space::Cosine => 1.0 - cosine_similarity(a, b),
            Space::Euclidean => euclidean_sq(a, b),
            Space::InnerProduct => -dot_product(a, b),
        }
    }

    /// Converts a raw graph distance into a similarity score where higher is
    /// better: `1 - d` for cosine, `-d` for the other spaces.
    #[inline]
    pub fn similarity(&self, distance: f32) -> f32 {
        match self {
            Space::Cosine => 1.0 - distance,
            Space::Euclidean | Space::InnerProduct => -distance,
        }
    }

    /// Short name stored in the artifact sidecar.
    pub fn as_str(&self) -> &'static str {
        match self {
            Space::Cosine => "cosine",
            Space::Euclidean => "l2",
            Space::InnerProduct => "ip",
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Space {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Space::Cosine),
            "l2" | "euclidean" => Ok(Space::Euclidean),
            "ip" | "inner_product" | "dot" => Ok(Space::InnerProduct),
            other => Err(format!(
                "unknown similarity space '{other}' (expected cosine, l2, or ip)"
            )),
        }
    }
}

/// Cosine similarity of two f32 slices. Zero-norm inputs score 0.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (&x, &y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    dot / denom
}

/// Squared Euclidean distance between two f32 slices.
#[inline]
pub fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Dot product of two f32 slices.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(&x, &y)| x * y).sum()
}
