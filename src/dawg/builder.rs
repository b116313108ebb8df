use hashbrown::HashTable;
use log::debug;

use super::state::DawgState;
use super::Dawg;

/// Incremental minimal-trie builder over a sorted key set.
///
/// Keys are inserted in reverse order, so the unfixed stack always holds the
/// spine of the most recently inserted key. That spine is the only part of
/// the graph still open to change: everything to its right has been merged
/// into the canonical state set. When a new key diverges from the spine, the
/// states below the branch point are folded one by one — each is either
/// matched against an equivalent canonical state (and its handle recycled)
/// or installed as a new canonical state itself.
///
/// The caller is expected to have validated the key set: strictly ascending,
/// no empty keys, no interior zero bytes, one non-negative value per key.
/// The double-array builder does this before handing keys over.
pub struct DawgBuilder {
    states: Vec<DawgState>,
    labels: Vec<u8>,
    table: HashTable<u32>,
    unfixed: Vec<u32>,
    recycled: Vec<u32>,
    num_merged: u32,
}

impl DawgBuilder {
    /// Creates a builder holding only the root state.
    pub fn new() -> Self {
        let mut builder = DawgBuilder {
            states: Vec::new(),
            labels: Vec::new(),
            table: HashTable::new(),
            unfixed: Vec::new(),
            recycled: Vec::new(),
            num_merged: 0,
        };
        let root = builder.alloc_state();
        builder.labels[root as usize] = 0;
        builder.unfixed.push(root);
        builder
    }

    /// Inserts every key and folds the graph down to its minimal form.
    ///
    /// `values` must hold one value per key. The progress callback, when
    /// present, is invoked once per key with a total of
    /// `num_keys + num_keys / 4`; the remaining quarter is reported by the
    /// double-array packing that follows.
    pub fn build<K: AsRef<[u8]>>(
        mut self,
        keys: &[K],
        values: &[i32],
        mut progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> Dawg {
        let max_progress = keys.len() + keys.len() / 4;
        for key_id in (0..keys.len()).rev() {
            self.insert_key(keys[key_id].as_ref(), values[key_id]);
            if let Some(report) = progress.as_mut() {
                report(keys.len() - key_id, max_progress);
            }
        }

        // Folds the states of the first key, the last spine standing.
        self.merge(0);

        debug!(
            "dawg: {} pooled states, {} live, {} merged, table of {}",
            self.states.len(),
            self.states.len() - self.recycled.len(),
            self.num_merged,
            self.table.len(),
        );

        Dawg {
            states: self.states,
            labels: self.labels,
            num_merged: self.num_merged,
            num_recycled: self.recycled.len() as u32,
        }
    }

    /// Walks the unfixed spine as far as `key` agrees with it, then grows a
    /// fresh chain of states for the remaining suffix. The chain ends in the
    /// terminator-labeled state, which becomes the leaf carrying `value`.
    fn insert_key(&mut self, key: &[u8], value: i32) {
        let mut index = 0u32;
        let mut key_pos = 0usize;

        // Finds the branch point. The first child of each spine state is the
        // most recently inserted one, which is the only candidate a smaller
        // key can extend.
        while key_pos <= key.len() {
            let child = self.states[index as usize].child();
            if child == 0 {
                break;
            }
            if self.labels[child as usize] != key_label(key, key_pos) {
                self.merge(index);
                break;
            }
            index = child;
            key_pos += 1;
        }

        // Grows the new suffix, prepending each state to its parent's child
        // chain and pushing it onto the spine.
        while key_pos <= key.len() {
            let state = self.alloc_state();
            let first_child = self.states[index as usize].child();
            self.states[state as usize].set_sibling(first_child);
            self.labels[state as usize] = key_label(key, key_pos);
            self.unfixed.push(state);
            self.states[index as usize].set_child(state);
            index = state;
            key_pos += 1;
        }
        self.states[index as usize].set_value(value);
    }

    /// Pops spine states down to (but not including) `index`, replacing each
    /// with its canonical equivalent.
    fn merge(&mut self, index: u32) {
        while self.top() != index {
            let popped = self
                .unfixed
                .pop()
                .expect("the unfixed stack always holds at least the root");
            let hash = hash_state(&self.states, &self.labels, popped);

            let states = &self.states;
            let labels = &self.labels;
            let matched = self
                .table
                .find(hash, |&candidate| {
                    states[candidate as usize] == states[popped as usize]
                        && labels[candidate as usize] == labels[popped as usize]
                })
                .copied();

            let canonical = match matched {
                Some(found) => {
                    self.recycled.push(popped);
                    self.num_merged += 1;
                    found
                }
                None => {
                    self.table.insert_unique(hash, popped, |&candidate| {
                        hash_state(states, labels, candidate)
                    });
                    popped
                }
            };

            let parent = self.top();
            self.states[parent as usize].set_child(canonical);
        }
    }

    fn top(&self) -> u32 {
        *self
            .unfixed
            .last()
            .expect("the unfixed stack always holds at least the root")
    }

    /// Hands out a state handle, reusing one recycled by a merge when
    /// possible.
    fn alloc_state(&mut self) -> u32 {
        match self.recycled.pop() {
            Some(index) => {
                self.states[index as usize] = DawgState::default();
                index
            }
            None => {
                let index = self.states.len() as u32;
                self.states.push(DawgState::default());
                self.labels.push(0);
                index
            }
        }
    }
}

impl Default for DawgBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The label read at `key_pos`: the key byte, or 0 past the end of the key.
#[inline]
fn key_label(key: &[u8], key_pos: usize) -> u8 {
    key.get(key_pos).copied().unwrap_or(0)
}

fn hash_state(states: &[DawgState], labels: &[u8], index: u32) -> u64 {
    let (first, second) = states[index as usize].words();
    u64::from(mix(first, second, u32::from(labels[index as usize])))
}

/// Bob Jenkins' 96-bit mix, reduced to the final word.
fn mix(mut a: u32, mut b: u32, mut c: u32) -> u32 {
    a = a.wrapping_sub(b).wrapping_sub(c) ^ c.rotate_right(13);
    b = b.wrapping_sub(c).wrapping_sub(a) ^ (a << 8);
    c = c.wrapping_sub(a).wrapping_sub(b) ^ b.rotate_right(13);
    a = a.wrapping_sub(b).wrapping_sub(c) ^ c.rotate_right(12);
    b = b.wrapping_sub(c).wrapping_sub(a) ^ (a << 16);
    c = c.wrapping_sub(a).wrapping_sub(b) ^ b.rotate_right(5);
    a = a.wrapping_sub(b).wrapping_sub(c) ^ c.rotate_right(3);
    b = b.wrapping_sub(c).wrapping_sub(a) ^ (a << 10);
    c = c.wrapping_sub(a).wrapping_sub(b) ^ b.rotate_right(15);
    c
}

#[cfg(test)]
mod test {
    use super::*;

    fn build(keys: &[&[u8]], values: &[i32]) -> Dawg {
        DawgBuilder::new().build(keys, values, None)
    }

    /// Collects `(label, handle)` pairs of a state's children in chain
    /// order.
    fn children(dawg: &Dawg, index: u32) -> Vec<(u8, u32)> {
        let mut result = Vec::new();
        let mut child = dawg.child(index);
        while child != 0 {
            result.push((dawg.label(child), child));
            child = dawg.sibling(child);
        }
        result
    }

    fn walk(dawg: &Dawg, key: &[u8]) -> Option<u32> {
        let mut index = 0;
        for pos in 0..=key.len() {
            let label = key.get(pos).copied().unwrap_or(0);
            let (_, found) = children(dawg, index)
                .into_iter()
                .find(|&(l, _)| l == label)?;
            index = found;
        }
        Some(index)
    }

    #[test]
    fn empty_key_set_is_just_the_root() {
        let dawg = build(&[], &[]);
        assert_eq!(dawg.num_states(), 1);
        assert_eq!(dawg.child(0), 0);
    }

    #[test]
    fn single_key_forms_a_chain() {
        let dawg = build(&[b"abc"], &[5]);
        // Root, one state per byte, one terminal leaf.
        assert_eq!(dawg.num_states(), 5);
        let leaf = walk(&dawg, b"abc").unwrap();
        assert!(dawg.is_leaf(leaf));
        assert_eq!(dawg.value(leaf), 5);
    }

    #[test]
    fn values_reach_their_leaves() {
        let keys: &[&[u8]] = &[b"apple", b"banana", b"cherry"];
        let dawg = build(keys, &[10, 20, 30]);
        for (key, value) in keys.iter().zip([10, 20, 30]) {
            let leaf = walk(&dawg, key).unwrap();
            assert!(dawg.is_leaf(leaf));
            assert_eq!(dawg.value(leaf), value);
        }
    }

    #[test]
    fn child_chains_are_label_sorted() {
        let keys: &[&[u8]] = &[b"a", b"ab", b"ac", b"b"];
        let dawg = build(keys, &[0, 1, 2, 3]);
        let mut stack = vec![0u32];
        while let Some(index) = stack.pop() {
            let labels: Vec<u8> = children(&dawg, index).iter().map(|&(l, _)| l).collect();
            let mut sorted = labels.clone();
            sorted.sort_unstable();
            assert_eq!(labels, sorted);
            for (label, child) in children(&dawg, index) {
                if label != 0 {
                    stack.push(child);
                }
            }
        }
    }

    #[test]
    fn shared_suffix_with_equal_values_is_merged() {
        // Two keys sharing a six-byte suffix and the same value: the six
        // suffix states plus the terminal leaf fold into one chain.
        let keys: &[&[u8]] = &[b"axsuffix", b"bysuffix"];
        let dawg = build(keys, &[7, 7]);
        assert!(dawg.num_merged_states() >= 5);

        let tail_a = walk(&dawg, b"axsuffix").unwrap();
        let tail_b = walk(&dawg, b"bysuffix").unwrap();
        assert_eq!(tail_a, tail_b);
        assert_eq!(dawg.value(tail_a), 7);
    }

    #[test]
    fn distinct_values_block_suffix_sharing() {
        let shared = build(&[b"axsuffix", b"bysuffix"], &[7, 7]);
        let split = build(&[b"axsuffix", b"bysuffix"], &[7, 8]);
        assert!(split.num_states() > shared.num_states());
        assert_eq!(split.num_merged_states(), 0);
    }

    #[test]
    fn merged_states_shrink_the_pool() {
        let keys: &[&[u8]] = &[b"barking", b"hacking", b"jogging", b"walking"];
        let dawg = build(keys, &[1, 1, 1, 1]);
        // Every key contributes its own prefix but the "king"/"ging" tails
        // collapse onto one "ing" chain; the naive trie needs 33 states.
        assert!(dawg.num_states() < 25);
        assert!(dawg.num_merged_states() > 0);
        for key in keys {
            let leaf = walk(&dawg, key).unwrap();
            assert_eq!(dawg.value(leaf), 1);
        }
    }

    #[test]
    fn recycled_handles_stay_within_the_pool() {
        // Heavy merging recycles handles; the pool must never hand out a
        // handle past its own length.
        let keys: Vec<Vec<u8>> = (0..50u8)
            .map(|i| {
                let mut key = vec![b'a' + i % 26, b'A' + i / 26];
                key.extend_from_slice(b"commontail");
                key
            })
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        let values = vec![3; sorted.len()];
        let dawg = DawgBuilder::new().build(&sorted, &values, None);
        assert!(dawg.num_states() <= dawg.size());
        for key in &sorted {
            let leaf = walk(&dawg, key).unwrap();
            assert_eq!(dawg.value(leaf), 3);
        }
    }

    #[test]
    fn progress_reports_once_per_key() {
        let keys: &[&[u8]] = &[b"a", b"b", b"c", b"d"];
        let mut calls = Vec::new();
        let mut progress = |done: usize, total: usize| calls.push((done, total));
        DawgBuilder::new().build(keys, &[0, 1, 2, 3], Some(&mut progress));
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], (1, 5));
        assert_eq!(calls[3], (4, 5));
    }

    #[test]
    fn jenkins_mix_spreads_neighboring_states() {
        let a = mix(1, 0, 0);
        let b = mix(2, 0, 0);
        let c = mix(1, 1, 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }
}
