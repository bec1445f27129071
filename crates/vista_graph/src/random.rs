//! Deterministic seeding helpers shared by stochastic nodes and kernels.
use rand::Rng;

use crate::graph::NodeId;

/// Uniform value in `[0, 1)` from the next `u32` of `rng`.
#[inline]
pub(crate) fn rand01(rng: &mut dyn Rng) -> f32 {
    (rng.next_u32() as f32) / ((u32::MAX as f32) + 1.0)
}

/// Seed for a node, mixing the evaluation seed with the node identity and a per-node salt.
pub fn seed_for_node(base_seed: i64, node: NodeId, salt: u64) -> u64 {
    let mixed = (base_seed as u64)
        ^ (node.0 as u64).wrapping_mul(0x9E3779B97F4A7C15)
        ^ salt.wrapping_mul(0xBF58476D1CE4E5B9);
    mix_u64(mixed)
}

/// Hash of an integer lattice point, in `[0, 1)`.
#[inline]
pub(crate) fn lattice01(seed: u64, x: i32, y: i32) -> f32 {
    let h = mix_u64(
        seed ^ (x as i64 as u64).wrapping_mul(0x9E3779B97F4A7C15)
            ^ (y as i64 as u64).wrapping_mul(0xBF58476D1CE4E5B9),
    );
    (h >> 40) as f32 / (1u64 << 24) as f32
}

#[inline]
fn mix_u64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58476D1CE4E5B9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn node_seeds_differ_by_node_and_salt() {
        let a = seed_for_node(7, NodeId(1), 0);
        assert_eq!(a, seed_for_node(7, NodeId(1), 0));
        assert_ne!(a, seed_for_node(7, NodeId(2), 0));
        assert_ne!(a, seed_for_node(7, NodeId(1), 1));
        assert_ne!(a, seed_for_node(8, NodeId(1), 0));
    }

    #[test]
    fn lattice_values_stay_in_unit_range() {
        for x in -20..20 {
            for y in -20..20 {
                let v = lattice01(3, x, y);
                assert!((0.0..1.0).contains(&v));
            }
        }
    }

    #[test]
    fn rand01_values_in_range() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..1000 {
            let v = rand01(&mut rng);
            assert!((0.0..1.0).contains(&v));
        }
    }
}
