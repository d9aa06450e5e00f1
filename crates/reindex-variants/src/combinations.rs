//! N-ary Cartesian product over per-dimension value lists.

use reindex_types::{StateValue, VariantStateVector};

/// Iterates every combination of one value per dimension.
///
/// The last dimension varies fastest. With no dimensions the iterator
/// yields exactly one empty vector; a dimension with no values makes the
/// product empty. Clone it (or call [`reset`](Self::reset)) to restart.
#[derive(Debug, Clone)]
pub struct Combinations {
    axes: Vec<(String, Vec<StateValue>)>,
    cursor: Vec<usize>,
    done: bool,
}

impl Combinations {
    pub fn new(axes: Vec<(String, Vec<StateValue>)>) -> Self {
        let done = axes.iter().any(|(_, values)| values.is_empty());
        Self {
            cursor: vec![0; axes.len()],
            axes,
            done,
        }
    }

    pub fn reset(&mut self) {
        self.cursor.iter_mut().for_each(|c| *c = 0);
        self.done = self.axes.iter().any(|(_, values)| values.is_empty());
    }

    /// Total number of combinations.
    pub fn total(&self) -> usize {
        self.axes.iter().map(|(_, values)| values.len()).product()
    }

    fn advance(&mut self) {
        for axis in (0..self.axes.len()).rev() {
            self.cursor[axis] += 1;
            if self.cursor[axis] < self.axes[axis].1.len() {
                return;
            }
            self.cursor[axis] = 0;
        }
        self.done = true;
    }
}

impl Iterator for Combinations {
    type Item = VariantStateVector;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let state = self
            .axes
            .iter()
            .zip(&self.cursor)
            .map(|((id, values), &i)| (id.clone(), values[i].clone()))
            .collect();
        self.advance();
        Some(state)
    }
}
