//! Checkpoint pair enumeration.

/// All index pairs `(i, j)` with `i < j` over `n` ordered checkpoints,
/// row by row: `(0, 1), (0, 2), .., (1, 2), ..`.
#[derive(Debug, Clone)]
pub struct CheckpointPairs {
    n: usize,
    i: usize,
    j: usize,
}

impl CheckpointPairs {
    pub fn new(n: usize) -> Self {
        Self { n, i: 0, j: 1 }
    }

    /// Number of pairs over `n` checkpoints.
    pub fn total(n: usize) -> usize {
        n * n.saturating_sub(1) / 2
    }

    fn remaining(&self) -> usize {
        if self.i >= self.n {
            return 0;
        }
        let in_row = self.n.saturating_sub(self.j);
        in_row + Self::total(self.n - self.i - 1)
    }
}

impl Iterator for CheckpointPairs {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        while self.i < self.n {
            if self.j < self.n {
                let pair = (self.i, self.j);
                self.j += 1;
                return Some(pair);
            }
            self.i += 1;
            self.j = self.i + 1;
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for CheckpointPairs {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_checkpoints_ten_pairs() {
        let pairs: Vec<_> = CheckpointPairs::new(5).collect();
        assert_eq!(pairs.len(), 10);
        assert_eq!(CheckpointPairs::total(5), 10);
        assert_eq!(pairs[0], (0, 1));
        assert_eq!(pairs[3], (0, 4));
        assert_eq!(pairs[4], (1, 2));
        assert_eq!(pairs[9], (3, 4));
        assert!(pairs.iter().all(|(i, j)| i < j));
    }

    #[test]
    fn test_degenerate_counts() {
        assert_eq!(CheckpointPairs::new(0).count(), 0);
        assert_eq!(CheckpointPairs::new(1).count(), 0);
        assert_eq!(CheckpointPairs::new(2).collect::<Vec<_>>(), vec![(0, 1)]);
    }

    #[test]
    fn test_exact_size() {
        let mut pairs = CheckpointPairs::new(4);
        assert_eq!(pairs.len(), 6);
        pairs.next();
        pairs.next();
        pairs.next();
        assert_eq!(pairs.len(), 3);
        pairs.next();
        assert_eq!(pairs.len(), 2);
    }
}
