// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vector math shared by the index and the embedders

/// Borrowed view over an embedding vector
#[derive(Debug, Clone, Copy)]
pub struct Embedding<'a> {
    data: &'a [f32],
}

impl<'a> Embedding<'a> {
    pub fn new(data: &'a [f32]) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[f32] {
        self.data
    }

    pub fn dimension(&self) -> usize {
        self.data.len()
    }

    pub fn magnitude(&self) -> f32 {
        self.data.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    pub fn dot_product(&self, other: &Embedding) -> f32 {
        if self.dimension() != other.dimension() {
            return 0.0;
        }

        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Cosine similarity in [-1.0, 1.0]; 0.0 for zero vectors or mismatched dimensions
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        if self.dimension() != other.dimension() {
            return 0.0;
        }

        let magnitude_self = self.magnitude();
        let magnitude_other = other.magnitude();

        if magnitude_self == 0.0 || magnitude_other == 0.0 {
            0.0
        } else {
            self.dot_product(other) / (magnitude_self * magnitude_other)
        }
    }

    /// True when every component is a finite number
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// Normalize vector to unit length (L2).
///
/// Zero and non-finite-magnitude vectors are returned unchanged.
pub fn normalize_vector(vector: &[f32]) -> Vec<f32> {
    let magnitude: f32 = vector.iter().map(|&x| x * x).sum::<f32>().sqrt();

    if magnitude == 0.0 || !magnitude.is_finite() {
        return vector.to_vec();
    }

    vector.iter().map(|&x| x / magnitude).collect()
}
