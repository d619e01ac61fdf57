//! Attributes ("roles") carried by parallel index pairs.
//!
//! An attribute tells why a process holds an entity: it owns it, it is on
//! the border, it is part of the overlap, or it is a ghost copy. Attributes
//! are totally ordered; a lower attribute is the more authoritative one and
//! wins when several roles of the same global index compete.

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// A small enumerated role tag that travels as one byte.
pub trait Attribute: Copy + Ord + Hash + Debug + Send + Sync + 'static {
    fn to_wire(self) -> u8;
    fn from_wire(raw: u8) -> Option<Self>;
}

impl Attribute for u8 {
    #[inline]
    fn to_wire(self) -> u8 {
        self
    }
    #[inline]
    fn from_wire(raw: u8) -> Option<Self> {
        Some(raw)
    }
}

/// Roles of a mesh entity in a domain decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GridFlag {
    Owner = 0,
    Border = 1,
    Overlap = 2,
    Ghost = 3,
}

impl Attribute for GridFlag {
    #[inline]
    fn to_wire(self) -> u8 {
        self as u8
    }

    fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(GridFlag::Owner),
            1 => Some(GridFlag::Border),
            2 => Some(GridFlag::Overlap),
            3 => Some(GridFlag::Ghost),
            _ => None,
        }
    }
}

impl std::fmt::Display for GridFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GridFlag::Owner => "owner",
            GridFlag::Border => "border",
            GridFlag::Overlap => "overlap",
            GridFlag::Ghost => "ghost",
        };
        f.write_str(s)
    }
}

/// Membership set over attributes, stored as a 256-bit mask of wire codes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeSet<A> {
    bits: [u64; 4],
    #[serde(skip)]
    _marker: PhantomData<A>,
}

impl<A: Attribute> AttributeSet<A> {
    pub const fn empty() -> Self {
        Self {
            bits: [0; 4],
            _marker: PhantomData,
        }
    }

    /// Every attribute value, including codes `A` does not define.
    pub const fn all() -> Self {
        Self {
            bits: [u64::MAX; 4],
            _marker: PhantomData,
        }
    }

    pub fn of(attributes: &[A]) -> Self {
        attributes.iter().copied().collect()
    }

    pub fn insert(&mut self, attribute: A) -> &mut Self {
        let code = attribute.to_wire();
        self.bits[usize::from(code >> 6)] |= 1 << (code & 63);
        self
    }

    pub fn remove(&mut self, attribute: A) -> &mut Self {
        let code = attribute.to_wire();
        self.bits[usize::from(code >> 6)] &= !(1 << (code & 63));
        self
    }

    #[inline]
    pub fn contains(&self, attribute: A) -> bool {
        let code = attribute.to_wire();
        self.bits[usize::from(code >> 6)] & (1 << (code & 63)) != 0
    }

    pub fn union(mut self, other: &Self) -> Self {
        for (a, b) in self.bits.iter_mut().zip(other.bits) {
            *a |= b;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }
}

impl<A: Attribute> Default for AttributeSet<A> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<A: Attribute> FromIterator<A> for AttributeSet<A> {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        let mut set = Self::empty();
        for a in iter {
            set.insert(a);
        }
        set
    }
}

impl<A: Attribute> Debug for AttributeSet<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut set = f.debug_set();
        for code in 0..=u8::MAX {
            if self.bits[usize::from(code >> 6)] & (1 << (code & 63)) != 0 {
                match A::from_wire(code) {
                    Some(a) => set.entry(&a),
                    None => set.entry(&code),
                };
            }
        }
        set.finish()
    }
}

/// Decides whether an attribute belongs to a role selection.
///
/// Implemented for [`AttributeSet`] and for any `Fn(A) -> bool`.
pub trait AttributePredicate<A> {
    fn admits(&self, attribute: A) -> bool;
}

impl<A: Attribute> AttributePredicate<A> for AttributeSet<A> {
    #[inline]
    fn admits(&self, attribute: A) -> bool {
        self.contains(attribute)
    }
}

impl<A, F: Fn(A) -> bool> AttributePredicate<A> for F {
    #[inline]
    fn admits(&self, attribute: A) -> bool {
        self(attribute)
    }
}
