use log::debug;
use smallvec::SmallVec;

use crate::dawg::{Dawg, DawgBuilder};
use crate::BuildError;

use super::extra::Extra;
use super::unit::{Unit, OFFSET_MAX};

/// Units are allocated one block at a time.
pub(crate) const BLOCK_SIZE: u32 = 256;
/// Only this many trailing blocks keep their extras and stay editable.
const NUM_OF_UNFIXED_BLOCKS: u32 = 16;

/// A relative offset must fall entirely inside one of these halves to be
/// representable: below `OFFSET_MAX` in the compact form, or with a clear
/// low part in the extended form.
const LOWER_MASK: u32 = OFFSET_MAX - 1;
const UPPER_MASK: u32 = !LOWER_MASK;

/// A run of keys sharing a prefix, waiting to be placed at `depth` under
/// the unit at `index`.
#[derive(Clone, Copy)]
struct KeyRange {
    begin: usize,
    end: usize,
    depth: usize,
    index: u32,
}

/// Packs a key set into a double-array unit vector.
///
/// With values, the keys are first folded into a DAWG and the graph is
/// placed depth-first, reusing offsets of shared subtrees. Without values, a
/// plain trie is carved directly out of the sorted key order and each key's
/// value is its rank.
pub(crate) struct DatBuilder<'a, 'b, K> {
    keys: &'a [K],
    values: Option<&'a [i32]>,
    progress: Option<&'b mut dyn FnMut(usize, usize)>,
    progress_pos: usize,
    progress_max: usize,
    units: Vec<Unit>,
    extras: Vec<Option<Box<[Extra; BLOCK_SIZE as usize]>>>,
    labels: SmallVec<[u8; 32]>,
    unfixed_index: u32,
    num_unused_units: usize,
}

/// Reborrows a stored progress callback for a single call without tying the
/// borrow's lifetime to the callback's own, which the borrow checker cannot
/// shorten automatically through `Option::as_deref_mut`.
fn reborrow_progress<'s>(
    progress: &'s mut Option<&mut dyn FnMut(usize, usize)>,
) -> Option<&'s mut dyn FnMut(usize, usize)> {
    match progress {
        Some(p) => Some(&mut **p),
        None => None,
    }
}

impl<'a, 'b, K: AsRef<[u8]>> DatBuilder<'a, 'b, K> {
    pub(crate) fn new(
        keys: &'a [K],
        values: Option<&'a [i32]>,
        progress: Option<&'b mut dyn FnMut(usize, usize)>,
    ) -> Self {
        DatBuilder {
            keys,
            values,
            progress,
            progress_pos: 0,
            progress_max: 0,
            units: Vec::new(),
            extras: Vec::new(),
            labels: SmallVec::new(),
            unfixed_index: 0,
            num_unused_units: 0,
        }
    }

    pub(crate) fn build(mut self) -> Result<Vec<Unit>, BuildError> {
        self.validate_keys()?;

        if self.values.is_some() && !self.keys.is_empty() {
            self.build_from_dawg()?;
        } else {
            self.build_from_keys()?;
        }

        debug!(
            "double-array: {} units, {} padding",
            self.units.len(),
            self.num_unused_units
        );

        self.units.shrink_to_fit();
        Ok(self.units)
    }

    fn validate_keys(&self) -> Result<(), BuildError> {
        if let Some(values) = self.values {
            if values.len() != self.keys.len() {
                return Err(BuildError::ValueCount {
                    expected: self.keys.len(),
                    actual: values.len(),
                });
            }
        }

        for (i, key) in self.keys.iter().enumerate() {
            let key = key.as_ref();
            if key.is_empty() {
                return Err(BuildError::EmptyKey { index: i });
            }
            if key.contains(&0) {
                return Err(BuildError::NullByte { index: i });
            }
            if let Some(values) = self.values {
                if values[i] < 0 {
                    return Err(BuildError::NegativeValue { index: i });
                }
            }
            if i > 0 && self.keys[i - 1].as_ref() >= key {
                return Err(BuildError::KeyOrder { index: i });
            }
        }
        Ok(())
    }

    /// Reserves unit 0 for the root and seeds it so that no byte can
    /// transition anywhere before the real children are placed.
    fn init_root(&mut self) -> Result<(), BuildError> {
        self.reserve_unit(0);
        self.extra_mut(0).set_is_used();
        self.units[0].set_offset(1)?;
        self.units[0].set_label(0);
        Ok(())
    }

    /// The plain-trie front: no DAWG, values are key ranks.
    fn build_from_keys(&mut self) -> Result<(), BuildError> {
        self.init_root()?;

        self.progress_pos = 0;
        self.progress_max = self.keys.len();

        if !self.keys.is_empty() {
            self.place_key_ranges()?;
        }
        self.fix_all_blocks();
        Ok(())
    }

    fn place_key_ranges(&mut self) -> Result<(), BuildError> {
        let mut range_stack = vec![KeyRange {
            begin: 0,
            end: self.keys.len(),
            depth: 0,
            index: 0,
        }];
        let mut child_ranges: Vec<KeyRange> = Vec::new();

        while let Some(range) = range_stack.pop() {
            // Splits the range into one run per child label.
            self.labels.clear();
            child_ranges.clear();
            let mut child_begin = range.begin;
            let mut last_label = self.key_label(child_begin, range.depth);
            self.labels.push(last_label);
            for i in range.begin + 1..range.end {
                let label = self.key_label(i, range.depth);
                if label != last_label {
                    self.labels.push(label);
                    child_ranges.push(KeyRange {
                        begin: child_begin,
                        end: i,
                        depth: range.depth + 1,
                        index: 0,
                    });
                    child_begin = i;
                    last_label = label;
                }
            }
            child_ranges.push(KeyRange {
                begin: child_begin,
                end: range.end,
                depth: range.depth + 1,
                index: 0,
            });

            // A terminator run means one key ends inside this range.
            if self.labels[0] == 0 {
                self.progress();
            }

            let offset = self.find_offset(range.index);
            self.units[range.index as usize].set_offset(range.index ^ offset)?;

            // Children are reserved in reverse label order so the stack pops
            // them smallest-first.
            for i in (0..child_ranges.len()).rev() {
                let label = self.labels[i];
                let child = offset ^ u32::from(label);
                self.reserve_unit(child);

                if label == 0 {
                    self.units[range.index as usize].set_has_leaf();
                    self.units[child as usize].set_value(child_ranges[i].begin as i32);
                } else {
                    self.units[child as usize].set_label(label);
                    let mut child_range = child_ranges[i];
                    child_range.index = child;
                    range_stack.push(child_range);
                }
            }
            self.extra_mut(offset).set_is_used();
        }
        Ok(())
    }

    /// The DAWG front: fold the key set first, then place the graph.
    fn build_from_dawg(&mut self) -> Result<(), BuildError> {
        let values = self.values.expect("the DAWG front requires values");
        let keys = self.keys;
        let progress = reborrow_progress(&mut self.progress);
        let dawg = DawgBuilder::new().build(keys, values, progress);
        let mut offsets = vec![0u32; dawg.size() as usize];

        self.init_root()?;

        // Key insertion already reported the first four fifths.
        self.progress_pos = dawg.num_states() as usize * 4;
        self.progress_max = dawg.num_states() as usize * 5;

        self.place_dawg_state(&dawg, &mut offsets, 0, 0)?;
        self.fix_all_blocks();
        Ok(())
    }

    /// Places the subtree of `dawg_index`, whose unit is already reserved at
    /// `da_index`, in depth-first order.
    fn place_dawg_state(
        &mut self,
        dawg: &Dawg,
        offsets: &mut [u32],
        dawg_index: u32,
        da_index: u32,
    ) -> Result<(), BuildError> {
        self.progress();

        if dawg.is_leaf(dawg_index) {
            return Ok(());
        }

        // A shared subtree may already have a home; reuse its offset if the
        // relative form stays representable from here.
        let dawg_child = dawg.child(dawg_index);
        if offsets[dawg_child as usize] != 0 {
            let relative = offsets[dawg_child as usize] ^ da_index;
            if relative & LOWER_MASK == 0 || relative & UPPER_MASK == 0 {
                if dawg.label(dawg_child) == 0 {
                    self.units[da_index as usize].set_has_leaf();
                }
                self.units[da_index as usize].set_offset(relative)?;
                return Ok(());
            }
        }

        let offset = self.place_children(dawg, dawg_index, da_index)?;
        offsets[dawg_child as usize] = offset;

        let mut child = dawg_child;
        while child != 0 {
            let da_child = offset ^ u32::from(dawg.label(child));
            self.place_dawg_state(dawg, offsets, child, da_child)?;
            child = dawg.sibling(child);
        }
        Ok(())
    }

    /// Finds a base offset for the children of `dawg_index` and reserves one
    /// unit per child. Returns the chosen absolute offset.
    fn place_children(
        &mut self,
        dawg: &Dawg,
        dawg_index: u32,
        da_index: u32,
    ) -> Result<u32, BuildError> {
        self.labels.clear();
        let mut child = dawg.child(dawg_index);
        while child != 0 {
            self.labels.push(dawg.label(child));
            child = dawg.sibling(child);
        }

        let offset = self.find_offset(da_index);
        self.units[da_index as usize].set_offset(da_index ^ offset)?;

        let mut child = dawg.child(dawg_index);
        for i in 0..self.labels.len() {
            let label = self.labels[i];
            let da_child = offset ^ u32::from(label);
            self.reserve_unit(da_child);

            if dawg.is_leaf(child) {
                self.units[da_index as usize].set_has_leaf();
                self.units[da_child as usize].set_value(dawg.value(child));
            } else {
                self.units[da_child as usize].set_label(label);
            }
            child = dawg.sibling(child);
        }
        self.extra_mut(offset).set_is_used();

        Ok(offset)
    }

    /// Scans the free-list for an offset satisfying [`is_good_offset`].
    ///
    /// When the list is empty or exhausted, falls back past the end of the
    /// array; the low byte is copied from `index` so the relative offset is
    /// 256-aligned and always encodable.
    fn find_offset(&self, index: u32) -> u32 {
        if self.unfixed_index >= self.num_units() {
            return self.num_units() | (index & 0xFF);
        }

        let mut unfixed = self.unfixed_index;
        loop {
            let offset = unfixed ^ u32::from(self.labels[0]);
            if self.is_good_offset(index, offset) {
                return offset;
            }
            unfixed = self.extra(unfixed).next();
            if unfixed == self.unfixed_index {
                break;
            }
        }

        self.num_units() | (index & 0xFF)
    }

    fn is_good_offset(&self, index: u32, offset: u32) -> bool {
        if self.extra(offset).is_used() {
            return false;
        }

        let relative = index ^ offset;
        if relative & LOWER_MASK != 0 && relative & UPPER_MASK != 0 {
            return false;
        }

        // The first label's slot is the free slot being probed; only the
        // remaining labels can collide.
        self.labels[1..]
            .iter()
            .all(|&label| !self.extra(offset ^ u32::from(label)).is_fixed())
    }

    /// Takes `index` off the free-list and marks it fixed, growing the
    /// array first if the slot does not exist yet.
    fn reserve_unit(&mut self, index: u32) {
        if index >= self.num_units() {
            self.expand_units();
        }

        if index == self.unfixed_index {
            self.unfixed_index = self.extra(index).next();
            if self.unfixed_index == index {
                self.unfixed_index = self.num_units();
            }
        }
        let prev = self.extra(index).prev();
        let next = self.extra(index).next();
        self.extra_mut(prev).set_next(next);
        self.extra_mut(next).set_prev(prev);
        self.extra_mut(index).set_is_fixed();
    }

    /// Appends one block of fresh units, retiring the oldest unfixed block
    /// once the window is full, and splices the new slots into the
    /// free-list just before `unfixed_index`.
    fn expand_units(&mut self) {
        let src_num_units = self.num_units();
        let src_num_blocks = self.num_blocks();
        let dest_num_units = src_num_units + BLOCK_SIZE;
        let dest_num_blocks = src_num_blocks + 1;

        if dest_num_blocks > NUM_OF_UNFIXED_BLOCKS {
            self.fix_block(src_num_blocks - NUM_OF_UNFIXED_BLOCKS);
        }

        self.units
            .resize(dest_num_units as usize, Unit::default());

        if dest_num_blocks > NUM_OF_UNFIXED_BLOCKS {
            // The retired block's extras storage is reused for the new one.
            let retired = (src_num_blocks - NUM_OF_UNFIXED_BLOCKS) as usize;
            let mut block = self.extras[retired]
                .take()
                .expect("a block keeps its extras until it is retired");
            for extra in block.iter_mut() {
                extra.clear();
            }
            self.extras.push(Some(block));
        } else {
            self.extras
                .push(Some(Box::new([Extra::default(); BLOCK_SIZE as usize])));
        }

        // Threads the new slots into a ring of their own.
        for i in src_num_units + 1..dest_num_units {
            self.extra_mut(i - 1).set_next(i);
            self.extra_mut(i).set_prev(i - 1);
        }
        self.extra_mut(src_num_units).set_prev(dest_num_units - 1);
        self.extra_mut(dest_num_units - 1).set_next(src_num_units);

        // Splices the ring into the free-list. When the list was empty,
        // `unfixed_index` equals `src_num_units` and this collapses into the
        // fresh ring by itself.
        let before = self.extra(self.unfixed_index).prev();
        self.extra_mut(src_num_units).set_prev(before);
        let unfixed_index = self.unfixed_index;
        self.extra_mut(dest_num_units - 1).set_next(unfixed_index);
        self.extra_mut(before).set_next(src_num_units);
        self.extra_mut(self.unfixed_index).set_prev(dest_num_units - 1);
    }

    fn fix_all_blocks(&mut self) {
        let begin = self.num_blocks().saturating_sub(NUM_OF_UNFIXED_BLOCKS);
        for block_id in begin..self.num_blocks() {
            self.fix_block(block_id);
        }
    }

    /// Converts every still-free slot of a block into padding and retires
    /// the block from further editing.
    fn fix_block(&mut self, block_id: u32) {
        let begin = block_id * BLOCK_SIZE;
        let end = begin + BLOCK_SIZE;

        // Any index of this block not taken as a base offset works as the
        // padding reference: labels derived from it can never satisfy a
        // real transition, whose base offset is by definition used.
        let mut unused_offset = 0;
        for offset in begin..end {
            if !self.extra(offset).is_used() {
                unused_offset = offset;
                break;
            }
        }

        for index in begin..end {
            if !self.extra(index).is_fixed() {
                self.reserve_unit(index);
                self.units[index as usize].set_label((index ^ unused_offset) as u8);
                self.num_unused_units += 1;
            }
        }
    }

    fn num_units(&self) -> u32 {
        self.units.len() as u32
    }

    fn num_blocks(&self) -> u32 {
        self.extras.len() as u32
    }

    fn extra(&self, index: u32) -> &Extra {
        let block = self.extras[(index / BLOCK_SIZE) as usize]
            .as_ref()
            .expect("extras are only dropped when their block is retired");
        &block[(index % BLOCK_SIZE) as usize]
    }

    fn extra_mut(&mut self, index: u32) -> &mut Extra {
        let block = self.extras[(index / BLOCK_SIZE) as usize]
            .as_mut()
            .expect("extras are only dropped when their block is retired");
        &mut block[(index % BLOCK_SIZE) as usize]
    }

    /// The label of key `key_id` at `depth`: the key byte, or 0 past the
    /// end of the key.
    fn key_label(&self, key_id: usize, depth: usize) -> u8 {
        self.keys[key_id].as_ref().get(depth).copied().unwrap_or(0)
    }

    fn progress(&mut self) {
        if self.progress_pos >= self.progress_max {
            return;
        }
        self.progress_pos += 1;
        if let Some(report) = self.progress.as_mut() {
            report(self.progress_pos, self.progress_max);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::trie::DoubleArray;

    fn build_ranked(keys: &[&[u8]]) -> DoubleArray {
        DoubleArray::build(keys, None, None).unwrap()
    }

    #[test]
    fn empty_key_set_builds_one_padded_block() {
        let da = build_ranked(&[]);
        assert_eq!(da.num_units(), BLOCK_SIZE as usize);
        assert_eq!(da.units()[0].label(), 0);
    }

    #[test]
    fn root_keeps_label_zero() {
        let da = build_ranked(&[b"abc", b"abd"]);
        assert_eq!(da.units()[0].label(), 0);
        assert!(!da.units()[0].has_leaf());
    }

    #[test]
    fn unit_count_is_block_aligned() {
        let da = build_ranked(&[b"a", b"b", b"c"]);
        assert_eq!(da.num_units() % BLOCK_SIZE as usize, 0);
    }

    #[test]
    fn every_key_walks_to_its_leaf() {
        // The structural invariant: from any unit, the child for byte `c`
        // sits at `index ^ offset ^ c` and carries label `c`; the value
        // leaf hangs off the terminator slot `index ^ offset`.
        let keys: &[&[u8]] = &[b"app", b"apple", b"apply", b"bank", b"bet"];
        let da = build_ranked(keys);
        let units = da.units();

        for (rank, key) in keys.iter().enumerate() {
            let mut index = 0u32;
            for &byte in key.iter() {
                index ^= units[index as usize].offset() ^ u32::from(byte);
                assert_eq!(units[index as usize].label(), u32::from(byte));
            }
            assert!(units[index as usize].has_leaf());
            let leaf = units[(index ^ units[index as usize].offset()) as usize];
            assert_eq!(leaf.value(), rank as i32);
        }
    }

    #[test]
    fn children_never_collide() {
        let keys: Vec<Vec<u8>> = (b'a'..=b'z')
            .flat_map(|a| (b'a'..=b'z').map(move |b| vec![a, b]))
            .collect();
        let da = DoubleArray::build(&keys, None, None).unwrap();
        let units = da.units();

        // Walks the whole trie, asserting each slot is claimed exactly once.
        let mut claimed = vec![false; units.len()];
        claimed[0] = true;
        let mut stack = vec![0u32];
        while let Some(index) = stack.pop() {
            let offset = units[index as usize].offset();
            if units[index as usize].has_leaf() {
                let leaf = index ^ offset;
                assert!(!claimed[leaf as usize], "slot {leaf} claimed twice");
                claimed[leaf as usize] = true;
            }
            for byte in 1..=255u32 {
                let child = index ^ offset ^ byte;
                if (child as usize) < units.len() && units[child as usize].label() == byte {
                    assert!(!claimed[child as usize], "slot {child} claimed twice");
                    claimed[child as usize] = true;
                    stack.push(child);
                }
            }
        }
    }

    #[test]
    fn rejects_empty_key() {
        let keys: &[&[u8]] = &[b"a", b""];
        assert_eq!(
            DoubleArray::build(keys, None, None).unwrap_err(),
            BuildError::EmptyKey { index: 1 },
        );
        let keys: &[&[u8]] = &[b"", b"a"];
        assert_eq!(
            DoubleArray::build(keys, None, None).unwrap_err(),
            BuildError::EmptyKey { index: 0 },
        );
    }

    #[test]
    fn rejects_interior_null_byte() {
        let keys: &[&[u8]] = &[b"a\0b"];
        assert_eq!(
            DoubleArray::build(keys, None, None).unwrap_err(),
            BuildError::NullByte { index: 0 },
        );
    }

    #[test]
    fn rejects_unsorted_keys() {
        let keys: &[&[u8]] = &[b"b", b"a"];
        assert_eq!(
            DoubleArray::build(keys, None, None).unwrap_err(),
            BuildError::KeyOrder { index: 1 },
        );
    }

    #[test]
    fn rejects_duplicate_keys() {
        let keys: &[&[u8]] = &[b"a", b"a"];
        assert_eq!(
            DoubleArray::build(keys, None, None).unwrap_err(),
            BuildError::KeyOrder { index: 1 },
        );
    }

    #[test]
    fn only_the_sorted_permutation_builds() {
        use itertools::Itertools;

        const SORTED: [&[u8]; 4] = [b"ant", b"bee", b"cat", b"dog"];
        let mut sorted_count = 0;
        for permutation in SORTED.iter().copied().permutations(SORTED.len()) {
            let is_sorted = permutation == SORTED;
            let result = DoubleArray::build(&permutation, None, None);
            assert_eq!(result.is_ok(), is_sorted);
            sorted_count += i32::from(is_sorted);
        }
        assert_eq!(sorted_count, 1);
    }

    #[test]
    fn rejects_negative_value() {
        let keys: &[&[u8]] = &[b"a", b"b"];
        assert_eq!(
            DoubleArray::build(keys, Some(&[1, -1]), None).unwrap_err(),
            BuildError::NegativeValue { index: 1 },
        );
    }

    #[test]
    fn rejects_value_count_mismatch() {
        let keys: &[&[u8]] = &[b"a", b"b"];
        assert_eq!(
            DoubleArray::build(keys, Some(&[1]), None).unwrap_err(),
            BuildError::ValueCount {
                expected: 2,
                actual: 1,
            },
        );
    }

    #[test]
    fn plain_front_reports_one_tick_per_key() {
        let keys: &[&[u8]] = &[b"aa", b"ab", b"b"];
        let mut ticks = Vec::new();
        let mut progress = |done: usize, total: usize| ticks.push((done, total));
        DoubleArray::build(keys, None, Some(&mut progress)).unwrap();
        assert_eq!(ticks, vec![(1, 3), (2, 3), (3, 3)]);
    }
}
