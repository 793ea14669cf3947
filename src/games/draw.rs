//! Draw engine.
//!
//! A game draws by playing back one permutation of 1..=90 fixed at start.
//! The permutation is a ChaCha20 shuffle keyed by a recorded 32-byte seed,
//! so anyone holding the seed can replay the exact draw order.

use super::types::{DrawnSet, POOL_SIZE};
use crate::errors::GameError;
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Full draw order for a seed
pub fn shuffled_pool(seed: [u8; 32]) -> Vec<u8> {
    let mut pool: Vec<u8> = (1..=POOL_SIZE as u8).collect();
    let mut rng = ChaCha20Rng::from_seed(seed);
    pool.shuffle(&mut rng);
    pool
}

/// Next undrawn number chosen uniformly from the remaining pool
pub fn draw_next<R: Rng + ?Sized>(drawn: &DrawnSet, rng: &mut R) -> Result<u8, GameError> {
    drawn
        .remaining()
        .choose(rng)
        .copied()
        .ok_or(GameError::DrawPoolExhausted)
}

/// True when `drawn` has no repeats, stays within 1..=90 and has at most 90 entries
pub fn is_permutation_prefix(drawn: &[u8]) -> bool {
    let mut set = DrawnSet::new();
    drawn.len() <= POOL_SIZE && drawn.iter().all(|n| set.insert(*n))
}

/// Cursor over a seeded permutation
#[derive(Debug, Clone)]
pub struct DrawSequence {
    order: Vec<u8>,
    cursor: usize,
}

impl DrawSequence {
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            order: shuffled_pool(seed),
            cursor: 0,
        }
    }

    /// Continue a game that already drew `drawn` from this seed
    pub fn resume(seed: [u8; 32], drawn: &[u8]) -> Result<Self, GameError> {
        let mut sequence = Self::new(seed);
        if drawn.len() > sequence.order.len() || sequence.order[..drawn.len()] != *drawn {
            return Err(GameError::SeedFailed(
                "persisted draws do not match the committed seed".to_string(),
            ));
        }
        sequence.cursor = drawn.len();
        Ok(sequence)
    }

    pub fn next(&mut self) -> Result<u8, GameError> {
        let number = self
            .order
            .get(self.cursor)
            .copied()
            .ok_or(GameError::DrawPoolExhausted)?;
        self.cursor += 1;
        Ok(number)
    }

    pub fn drawn(&self) -> &[u8] {
        &self.order[..self.cursor]
    }

    pub fn remaining(&self) -> usize {
        self.order.len() - self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_same_seed_same_order() {
        assert_eq!(shuffled_pool([3; 32]), shuffled_pool([3; 32]));
        assert_ne!(shuffled_pool([3; 32]), shuffled_pool([4; 32]));
    }

    #[test]
    fn test_sequence_exhausts_after_90() {
        let mut sequence = DrawSequence::new([9; 32]);
        for _ in 0..90 {
            sequence.next().unwrap();
        }
        assert_eq!(sequence.remaining(), 0);
        assert!(matches!(sequence.next(), Err(GameError::DrawPoolExhausted)));

        let mut sorted = sequence.drawn().to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, (1..=90).collect::<Vec<u8>>());
    }

    #[test]
    fn test_resume_continues_where_it_left_off() {
        let seed = [1; 32];
        let mut original = DrawSequence::new(seed);
        let prefix: Vec<u8> = (0..25).map(|_| original.next().unwrap()).collect();

        let mut resumed = DrawSequence::resume(seed, &prefix).unwrap();
        assert_eq!(resumed.next().unwrap(), original.next().unwrap());

        let mut tampered = prefix.clone();
        tampered.swap(0, 1);
        assert!(DrawSequence::resume(seed, &tampered).is_err());
    }

    #[test]
    fn test_draw_next_exhausted_pool() {
        let full = DrawnSet::from_numbers(&(1..=90).collect::<Vec<u8>>());
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(draw_next(&full, &mut rng), Err(GameError::DrawPoolExhausted)));

        let almost = DrawnSet::from_numbers(&(1..=89).collect::<Vec<u8>>());
        assert_eq!(draw_next(&almost, &mut rng).unwrap(), 90);
    }

    #[test]
    fn test_permutation_prefix_check() {
        assert!(is_permutation_prefix(&[]));
        assert!(is_permutation_prefix(&[5, 90, 1]));
        assert!(!is_permutation_prefix(&[5, 5]));
        assert!(!is_permutation_prefix(&[0]));
        assert!(!is_permutation_prefix(&[91]));
    }

    proptest! {
        #[test]
        fn prop_seeded_draws_are_permutation_prefixes(seed in any::<[u8; 32]>(), take in 0usize..=90) {
            let mut sequence = DrawSequence::new(seed);
            for _ in 0..take {
                sequence.next().unwrap();
            }
            prop_assert_eq!(sequence.drawn().len(), take);
            prop_assert!(is_permutation_prefix(sequence.drawn()));
        }

        #[test]
        fn prop_random_draws_never_repeat(seed in any::<u64>(), take in 0usize..=90) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut drawn = DrawnSet::new();
            let mut order = Vec::new();
            for _ in 0..take {
                let n = draw_next(&drawn, &mut rng).unwrap();
                prop_assert!(drawn.insert(n));
                order.push(n);
            }
            prop_assert!(is_permutation_prefix(&order));
        }
    }
}
