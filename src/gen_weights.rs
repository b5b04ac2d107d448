//! Node weight generators for benchmarks and tests.

use rand::Rng;

use crate::NodeWeight;

/// Generate the weight vector where each node has the same weight.
pub fn gen_uniform_weights(num_nodes: usize) -> Vec<NodeWeight> {
    vec![1; num_nodes]
}

/// Generate the weight vector where each node has a random weight in
/// `[min_weight, max_weight)`.
pub fn gen_random_weights(
    num_nodes: usize,
    min_weight: NodeWeight,
    max_weight: NodeWeight,
) -> Vec<NodeWeight> {
    assert!(
        min_weight >= 1 && max_weight > min_weight,
        "weights must be positive and max must exceed min"
    );
    let mut rng = rand::thread_rng();

    (0..num_nodes).map(|_| rng.gen_range(min_weight..max_weight)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_weights() {
        // Arrange and Act
        let weights = gen_uniform_weights(5);

        // Assert
        assert_eq!(weights, vec![1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_random_weights_stay_in_range() {
        // Arrange and Act
        let weights = gen_random_weights(100, 2, 7);

        // Assert
        assert!(weights.iter().all(|&w| (2..7).contains(&w)));
    }
}
