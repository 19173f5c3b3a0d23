//! Attention-masked mean pooling and L2 normalization

use super::EmbeddingError;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

/// Lower bound on the mask sum so an all-padding input never divides by zero.
const MASK_EPSILON: f32 = 1e-9;

/// Average token rows weighted by the attention mask
///
/// `sum(hidden * mask) / max(sum(mask), 1e-9)`, taken over the token axis.
pub fn mean_pool(
    hidden_states: ArrayView2<f32>,
    attention_mask: ArrayView1<f32>,
) -> Result<Array1<f32>, EmbeddingError> {
    if hidden_states.nrows() != attention_mask.len() {
        return Err(EmbeddingError::GenerationError(format!(
            "Attention mask covers {} tokens but encoder produced {}",
            attention_mask.len(),
            hidden_states.nrows()
        )));
    }

    let count = attention_mask.sum().max(MASK_EPSILON);
    let mask = attention_mask.insert_axis(Axis(1));
    let summed = (&hidden_states * &mask).sum_axis(Axis(0));

    Ok(summed / count)
}

/// Scale `vector` to unit length in place; zero vectors are left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Euclidean length
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}
