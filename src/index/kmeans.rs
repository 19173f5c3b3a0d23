//! Spherical K-means for training the clustered index quantizer.
//!
//! Inputs are expected to be unit vectors; similarity is the inner product
//! and every centroid is re-normalized after each update, so assignment by
//! maximum inner product equals assignment by cosine similarity.
//!
//! # Algorithm Details
//! - Initialization: K-means++ over cosine distance (1 - inner product)
//! - Max iterations: 100
//! - Convergence: unchanged assignments, or centroid movement below 1e-4

use crate::embedding::pooling::l2_normalize;
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::Rng;
use thiserror::Error;

/// Maximum number of iterations for K-means clustering.
const MAX_ITERATIONS: usize = 100;

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-10;

/// Trained centroids plus how long training took to settle.
#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// One unit-length centroid per row
    pub centroids: Array2<f32>,
    /// Iterations until convergence
    pub iterations: usize,
}

#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error("Empty vector set provided for clustering")]
    EmptyVectorSet,

    #[error("Invalid cluster count {k} for {n} training vectors")]
    InvalidClusterCount { k: usize, n: usize },
}

/// Cluster `data` (one vector per row) into `k` groups.
pub fn spherical_kmeans<R: Rng>(
    data: ArrayView2<f32>,
    k: usize,
    rng: &mut R,
) -> Result<KMeansResult, ClusteringError> {
    let n = data.nrows();
    if n == 0 {
        return Err(ClusteringError::EmptyVectorSet);
    }
    if k == 0 || k > n {
        return Err(ClusteringError::InvalidClusterCount { k, n });
    }

    let mut centroids = initialize_kmeans_plus_plus(data, k, rng);
    let mut assignments = vec![usize::MAX; n];
    let mut iterations = 0;

    loop {
        iterations += 1;

        let new_assignments: Vec<usize> = data
            .rows()
            .into_iter()
            .map(|row| nearest_centroid(row, centroids.view()))
            .collect();

        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= MAX_ITERATIONS {
            break;
        }

        let new_centroids = update_centroids(data, &assignments, k, rng);
        let movement = centroid_movement(centroids.view(), new_centroids.view());
        centroids = new_centroids;

        if movement < CONVERGENCE_TOLERANCE {
            break;
        }
    }

    if iterations >= MAX_ITERATIONS {
        tracing::warn!(
            "K-means did not fully converge after {} iterations",
            MAX_ITERATIONS
        );
    }

    Ok(KMeansResult {
        centroids,
        iterations,
    })
}

/// Index of the centroid with the highest inner product; ties go to the lower index.
pub fn nearest_centroid(vector: ArrayView1<f32>, centroids: ArrayView2<f32>) -> usize {
    let scores = centroids.dot(&vector);
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (i, &score) in scores.iter().enumerate() {
        if score > best_score {
            best_score = score;
            best = i;
        }
    }
    best
}

fn initialize_kmeans_plus_plus<R: Rng>(data: ArrayView2<f32>, k: usize, rng: &mut R) -> Array2<f32> {
    let n = data.nrows();
    let dimension = data.ncols();
    let mut chosen: Vec<usize> = Vec::with_capacity(k);
    chosen.push(rng.random_range(0..n));

    // Squared cosine distance of every point to its closest chosen centroid
    let mut min_distances = vec![f32::MAX; n];

    while chosen.len() < k {
        let latest = data.row(chosen[chosen.len() - 1]);
        let mut total = 0.0f32;
        for (i, row) in data.rows().into_iter().enumerate() {
            let distance = (1.0 - row.dot(&latest)).max(0.0);
            let squared = distance * distance;
            if squared < min_distances[i] {
                min_distances[i] = squared;
            }
            total += min_distances[i];
        }

        let next = if total < EPSILON {
            // Remaining points coincide with chosen centroids; fill uniformly.
            rng.random_range(0..n)
        } else {
            let target = rng.random::<f32>() * total;
            let mut cumulative = 0.0f32;
            let mut picked = n - 1;
            for (i, &distance) in min_distances.iter().enumerate() {
                cumulative += distance;
                if cumulative >= target {
                    picked = i;
                    break;
                }
            }
            picked
        };
        chosen.push(next);
    }

    let mut centroids = Array2::zeros((k, dimension));
    for (mut centroid, &index) in centroids.rows_mut().into_iter().zip(chosen.iter()) {
        centroid.assign(&data.row(index));
        if let Some(slice) = centroid.as_slice_mut() {
            l2_normalize(slice);
        }
    }
    centroids
}

fn update_centroids<R: Rng>(
    data: ArrayView2<f32>,
    assignments: &[usize],
    k: usize,
    rng: &mut R,
) -> Array2<f32> {
    let mut centroids = Array2::<f32>::zeros((k, data.ncols()));
    let mut sizes = vec![0usize; k];

    for (row, &cluster) in data.rows().into_iter().zip(assignments.iter()) {
        let mut centroid = centroids.row_mut(cluster);
        centroid += &row;
        sizes[cluster] += 1;
    }

    for (mut centroid, &size) in centroids.rows_mut().into_iter().zip(sizes.iter()) {
        if size == 0 {
            // Empty cluster: reseed from a random training vector
            let random_idx = rng.random_range(0..data.nrows());
            centroid.assign(&data.row(random_idx));
        }
        if let Some(slice) = centroid.as_slice_mut() {
            l2_normalize(slice);
        }
    }

    centroids
}

fn centroid_movement(old: ArrayView2<f32>, new: ArrayView2<f32>) -> f32 {
    old.rows()
        .into_iter()
        .zip(new.rows())
        .map(|(a, b)| {
            a.iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt()
        })
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn two_groups() -> Array2<f32> {
        array![
            [1.0f32, 0.0, 0.0],
            [0.99, 0.14, 0.0],
            [0.98, 0.0, 0.2],
            [0.0, 0.0, 1.0],
            [0.1, 0.0, 0.995],
            [0.0, 0.14, 0.99],
        ]
    }

    #[test]
    fn test_two_clear_groups_separate() {
        let mut data = two_groups();
        for mut row in data.rows_mut() {
            l2_normalize(row.as_slice_mut().unwrap());
        }
        let mut rng = StdRng::seed_from_u64(7);

        let result = spherical_kmeans(data.view(), 2, &mut rng).unwrap();
        let labels: Vec<usize> = data
            .rows()
            .into_iter()
            .map(|row| nearest_centroid(row, result.centroids.view()))
            .collect();

        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
    }

    #[test]
    fn test_centroids_are_unit_length() {
        let data = two_groups();
        let mut rng = StdRng::seed_from_u64(1);
        let result = spherical_kmeans(data.view(), 3, &mut rng).unwrap();
        for row in result.centroids.rows() {
            let norm = row.dot(&row).sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_invalid_k() {
        let data = two_groups();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            spherical_kmeans(data.view(), 0, &mut rng),
            Err(ClusteringError::InvalidClusterCount { .. })
        ));
        assert!(matches!(
            spherical_kmeans(data.view(), 7, &mut rng),
            Err(ClusteringError::InvalidClusterCount { k: 7, n: 6 })
        ));
    }

    #[test]
    fn test_duplicate_points_do_not_stall() {
        let data = Array2::from_elem((5, 4), 0.5f32);
        let mut rng = StdRng::seed_from_u64(3);
        let result = spherical_kmeans(data.view(), 2, &mut rng).unwrap();
        assert_eq!(result.centroids.nrows(), 2);
    }

    #[test]
    fn test_nearest_centroid_tie_goes_low() {
        let centroids = array![[1.0f32, 0.0], [1.0, 0.0]];
        let v = array![1.0f32, 0.0];
        assert_eq!(nearest_centroid(v.view(), centroids.view()), 0);
    }
}
