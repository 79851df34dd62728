//! In-memory doubles of the database and clock interfaces, used to drive the
//! jobs through simulated time.

use std::collections::VecDeque;

pub mod clock;
pub mod faults;
pub mod fixtures;
pub mod ledger;
pub mod polls;
pub mod procedures;
pub mod watermarks;

pub use clock::*;
pub use faults::*;
pub use ledger::*;
pub use polls::*;
pub use procedures::*;
pub use watermarks::*;

/// A sequence of values handed out one per call, the last one repeating
/// forever.
#[derive(Debug, Clone, Default)]
pub struct Script<T> {
    values: VecDeque<T>,
}

impl<T: Clone> Script<T> {
    pub fn new(values: impl IntoIterator<Item = T>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    pub fn next(&mut self) -> Option<T> {
        if self.values.len() > 1 {
            self.values.pop_front()
        } else {
            self.values.front().cloned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_repeats_last_value() {
        let mut script = Script::new([1, 2]);

        assert_eq!(script.next(), Some(1));
        assert_eq!(script.next(), Some(2));
        assert_eq!(script.next(), Some(2));

        let mut empty = Script::<u64>::default();
        assert_eq!(empty.next(), None);
    }
}
