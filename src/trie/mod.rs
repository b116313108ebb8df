//! The double-array trie: packing, lookup primitives, and the raw on-disk
//! form.
//!
//! A built trie is a flat vector of 32-bit [`Unit`]s encoding a byte-wise
//! DFA: the child of the unit at `index` for byte `c` sits at
//! `index XOR offset XOR c`, where `offset` is the unit's stored relative
//! offset. Lookups are read-only and the whole structure is freely
//! shareable across threads.

pub(crate) mod builder;
mod extra;
mod search;
mod serial;
mod unit;

pub use search::{CommonPrefixIter, Match, Traversal};
pub use unit::Unit;

use crate::BuildError;

/// An immutable double-array trie mapping byte keys to non-negative
/// values.
///
/// Built once from a sorted key set with [`build`](Self::build), or loaded
/// from its raw serialized form. Once built it never changes; every lookup
/// takes `&self` and runs in time linear in the key length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DoubleArray {
    units: Vec<Unit>,
}

impl DoubleArray {
    /// Builds a trie over `keys`, which must be strictly ascending byte
    /// strings without embedded zero bytes.
    ///
    /// When `values` is present it must hold one non-negative value per
    /// key, and common suffixes of keys with equal downstream values are
    /// folded through a DAWG before packing. When absent, each key's value
    /// is its index in `keys`.
    ///
    /// The progress callback receives `(done, total)` ticks; roughly
    /// `num_keys + num_keys / 4` of them on the DAWG path and `num_keys`
    /// on the plain path.
    pub fn build<K: AsRef<[u8]>>(
        keys: &[K],
        values: Option<&[i32]>,
        progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> Result<Self, BuildError> {
        let units = builder::DatBuilder::new(keys, values, progress).build()?;
        Ok(DoubleArray { units })
    }

    /// The number of 32-bit units in the array.
    pub fn num_units(&self) -> usize {
        self.units.len()
    }

    /// The array size in bytes, as stored on disk.
    pub fn total_size(&self) -> usize {
        self.units.len() * std::mem::size_of::<Unit>()
    }

    /// The raw unit array.
    pub fn units(&self) -> &[Unit] {
        &self.units
    }
}
