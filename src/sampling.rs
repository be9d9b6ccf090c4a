use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

/// Picks which stop-time rows get examined. Seeded runs are reproducible.
pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }

    /// Returns `min(size, items.len())` uniformly chosen items in random order, or all items
    /// shuffled when no size is given.
    pub fn sample<T>(&mut self, items: Vec<T>, size: Option<usize>) -> Vec<T> {
        let mut selected = match size {
            Some(size) => self.reservoir(items, size),
            None => items,
        };
        selected.shuffle(&mut self.rng);
        selected
    }

    fn reservoir<T>(&mut self, items: Vec<T>, size: usize) -> Vec<T> {
        let mut reservoir = Vec::with_capacity(size.min(items.len()));
        for (seen, item) in items.into_iter().enumerate() {
            if seen < size {
                reservoir.push(item);
            } else {
                let slot = self.rng.gen_range(0..=seen);
                if slot < size {
                    reservoir[slot] = item;
                }
            }
        }
        reservoir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn same_seed_same_sample() {
        let items: Vec<u32> = (0..1000).collect();
        let first = Sampler::new(Some(7)).sample(items.clone(), Some(25));
        let second = Sampler::new(Some(7)).sample(items, Some(25));
        assert_eq!(first, second);
    }

    #[test]
    fn sample_has_requested_size_without_duplicates() {
        let items: Vec<u32> = (0..1000).collect();
        let sample = Sampler::new(Some(1)).sample(items, Some(100));
        assert_eq!(sample.len(), 100);
        let unique: HashSet<_> = sample.iter().collect();
        assert_eq!(unique.len(), 100);
        assert!(sample.iter().all(|item| *item < 1000));
    }

    #[test]
    fn small_inputs_are_kept_whole() {
        let sample = Sampler::new(Some(3)).sample(vec![1, 2, 3], Some(10));
        let mut sorted = sample.clone();
        sorted.sort();
        assert_eq!(sorted, vec![1, 2, 3]);
        assert!(Sampler::new(Some(3)).sample(vec![1, 2, 3], Some(0)).is_empty());
    }

    #[test]
    fn without_size_everything_is_shuffled() {
        let items: Vec<u32> = (0..200).collect();
        let shuffled = Sampler::new(Some(11)).sample(items.clone(), None);
        assert_ne!(shuffled, items);
        let mut sorted = shuffled;
        sorted.sort();
        assert_eq!(sorted, items);
    }

    #[test]
    fn reservoir_reaches_the_tail_of_the_input() {
        let items: Vec<u32> = (0..1000).collect();
        let hits_tail = (0..20).any(|seed| {
            Sampler::new(Some(seed))
                .sample(items.clone(), Some(10))
                .iter()
                .any(|item| *item >= 500)
        });
        assert!(hits_tail);
    }
}
