//! # libdat
//!
//! A compact, immutable, disk-serializable
//! [double-array trie](https://en.wikipedia.org/wiki/Trie#Implementation_strategies):
//! a sorted set of byte-string keys with non-negative integer values is
//! packed into a flat array of 32-bit units encoding a byte-wise DFA, with
//! exact-match, common-prefix, and resumable lookups in O(key length).
//!
//! Construction runs in two stages. When values are supplied, the key set
//! is first folded into a minimal DAWG (suffix-sharing automaton, see
//! [`dawg`]) so that keys ending alike share storage; the graph is then
//! packed into the unit array by XOR-displacement, keeping occupancy above
//! 90%. Without values, a plain trie is packed directly and each key's
//! value is its rank.
//!
//! ## Quick start
//!
//! ```
//! use libdat::DoubleArray;
//!
//! let keys: Vec<&[u8]> = vec![b"apple", b"banana"];
//! let da = DoubleArray::build(&keys, Some(&[1, 2]), None).unwrap();
//!
//! assert_eq!(da.exact_match_search(b"apple").map(|m| m.value), Some(1));
//! assert_eq!(da.exact_match_search(b"app"), None);
//!
//! let prefixes: Vec<_> = da.common_prefix_search(b"applepie").collect();
//! assert_eq!(prefixes[0].value, 1);
//! assert_eq!(prefixes[0].length, 5);
//! ```
//!
//! The built array round-trips through a headerless little-endian dump:
//!
//! ```
//! use libdat::DoubleArray;
//!
//! let keys: Vec<&[u8]> = vec![b"left", b"right"];
//! let da = DoubleArray::build(&keys, None, None).unwrap();
//!
//! let mut bytes = Vec::new();
//! da.write_to(&mut bytes).unwrap();
//! let loaded = DoubleArray::from_bytes(&bytes).unwrap();
//! assert_eq!(loaded.exact_match_search(b"right").map(|m| m.value), Some(1));
//! ```

#![warn(missing_docs)]

pub mod dawg;
pub mod trie;

pub use trie::{CommonPrefixIter, DoubleArray, Match, Traversal, Unit};

/// Errors that abort a build.
///
/// Every variant is fatal: nothing partially built survives, and the input
/// must be corrected before retrying. Lookups never produce errors; a miss
/// is an in-band result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildError {
    /// A key is the empty byte string.
    EmptyKey {
        /// Index of the offending key.
        index: usize,
    },
    /// A key contains a zero byte, which is reserved as the end-of-key
    /// terminator.
    NullByte {
        /// Index of the offending key.
        index: usize,
    },
    /// A key is not strictly greater than its predecessor; duplicates fall
    /// under this too.
    KeyOrder {
        /// Index of the offending key.
        index: usize,
    },
    /// A value is negative.
    NegativeValue {
        /// Index of the offending value.
        index: usize,
    },
    /// The value slice length does not match the key count.
    ValueCount {
        /// Number of keys.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },
    /// A relative offset reached 2²⁹ and no longer fits a unit; the key
    /// set is too large or too pathological for the 32-bit format.
    OffsetOverflow,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::EmptyKey { index } => write!(f, "key {index} is empty"),
            BuildError::NullByte { index } => write!(f, "key {index} contains a zero byte"),
            BuildError::KeyOrder { index } => {
                write!(f, "key {index} is not in strictly ascending order")
            }
            BuildError::NegativeValue { index } => write!(f, "value {index} is negative"),
            BuildError::ValueCount { expected, actual } => {
                write!(f, "expected {expected} values, got {actual}")
            }
            BuildError::OffsetOverflow => {
                write!(f, "offset exceeds the representable range of a unit")
            }
        }
    }
}

impl std::error::Error for BuildError {}
