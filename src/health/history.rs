//! Bounded pass/fail history of one health check.

use std::collections::VecDeque;

/// Most recent check results, oldest first.
///
/// The length always equals the capacity: missing evidence counts as a
/// failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultHistory {
    results: VecDeque<bool>,
}

impl ResultHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            results: std::iter::repeat(false).take(capacity).collect(),
        }
    }

    pub fn push(&mut self, result: bool) {
        if self.results.is_empty() {
            return;
        }
        self.results.pop_front();
        self.results.push_back(result);
    }

    /// Change capacity, keeping the most recent results and padding the old
    /// end with failures.
    pub fn resize(&mut self, capacity: usize) {
        while self.results.len() > capacity {
            self.results.pop_front();
        }
        while self.results.len() < capacity {
            self.results.push_front(false);
        }
    }

    /// True if the latest `n` results all equal `value`.
    pub fn latest_all(&self, n: usize, value: bool) -> bool {
        n <= self.results.len() && self.results.iter().rev().take(n).all(|result| *result == value)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn to_vec(&self) -> Vec<bool> {
        self.results.iter().copied().collect()
    }
}
