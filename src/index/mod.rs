//! Process-local view of a distributed index space.

pub mod attribute;
pub mod index_set;
pub mod local_index;
pub mod lookup;
pub mod selection;

use std::fmt::Debug;
use std::hash::Hash;

use crate::algs::wire::WireScalar;

pub use attribute::{Attribute, AttributePredicate, AttributeSet, GridFlag};
pub use index_set::{IndexPair, IndexSetState, ParallelIndexSet};
pub use local_index::{LocalIndex, LocalIndexState, ParallelLocalIndex};
pub use lookup::GlobalLookupIndexSet;
pub use selection::Selection;

/// Process-independent identifier of a degree of freedom.
///
/// Any totally ordered scalar with a registered wire encoding qualifies.
pub trait GlobalIndex: WireScalar + Ord + Hash + Debug + Send + Sync {}

impl<T> GlobalIndex for T where T: WireScalar + Ord + Hash + Debug + Send + Sync {}
