// Copyright 2021 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use tracing::trace;

/// Bounded insertion-ordered set used for message dedup.
///
/// On overflow the oldest 10% of entries (at least one) are dropped, so the
/// set provides idempotent dedup under reorder and replay while holding a
/// bounded amount of memory.
#[derive(Debug)]
pub(crate) struct SeenSet<T> {
    order: VecDeque<T>,
    members: HashSet<T>,
    max_seen: usize,
}

impl<T: Hash + Eq + Clone> SeenSet<T> {
    pub fn new(max_seen: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            max_seen,
        }
    }

    pub fn contains(&self, value: &T) -> bool {
        self.members.contains(value)
    }

    /// Inserts `value`, trimming first when over the high-water mark.
    /// Re-inserting an existing value does not refresh its age.
    pub fn add(&mut self, value: T) {
        if self.members.contains(&value) {
            return;
        }

        if self.order.len() > self.max_seen {
            let trim = (self.max_seen / 10).max(1);
            trace!("trimming seen-set by {} from {}", trim, self.order.len());
            for _ in 0..trim {
                if let Some(old) = self.order.pop_front() {
                    let _ = self.members.remove(&old);
                }
            }
        }

        self.order.push_back(value.clone());
        let _ = self.members.insert(value);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_contains() {
        let mut seen = SeenSet::new(100);
        assert!(!seen.contains(&1));
        seen.add(1);
        assert!(seen.contains(&1));
        seen.add(1);
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn trims_oldest_tenth_on_overflow() {
        let mut seen = SeenSet::new(100);
        for uuid in 0..101i64 {
            seen.add(uuid);
        }
        assert_eq!(seen.len(), 101);

        // The next add crosses the high-water mark: 10 oldest entries go.
        seen.add(101);
        assert_eq!(seen.len(), 92);
        assert!(!seen.contains(&0));
        assert!(!seen.contains(&9));
        assert!(seen.contains(&10));
        assert!(seen.contains(&101));
    }

    #[test]
    fn tiny_sets_trim_at_least_one() {
        let mut seen = SeenSet::new(2);
        seen.add(1);
        seen.add(2);
        seen.add(3);
        // len 3 > max 2, so the next add drops exactly one entry first.
        seen.add(4);
        assert_eq!(seen.len(), 3);
        assert!(!seen.contains(&1));
        assert!(seen.contains(&4));
    }
}
