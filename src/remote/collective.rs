//! Lock-step traversal of the remote index lists of all neighbours.
//!
//! One cursor per neighbour list. Cursors only ever move forward, so a full
//! scan of an index set in order costs O(total entries). Advancing to a
//! target smaller than the current one is a no-op, not a rewind.

use std::collections::BTreeMap;

use crate::index::GlobalIndex;
use crate::index::attribute::Attribute;
use crate::remote::remote_index::RemoteIndex;

#[derive(Debug, Clone)]
struct Cursor<'t, G, A> {
    list: &'t [RemoteIndex<G, A>],
    pos: usize,
}

impl<G: GlobalIndex, A: Attribute> Cursor<'_, G, A> {
    fn current(&self) -> Option<&RemoteIndex<G, A>> {
        self.list.get(self.pos)
    }
}

/// The `(global[, local attribute])` position the iterator currently points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Target<G, A> {
    global: G,
    attribute: Option<A>,
}

impl<G: GlobalIndex, A: Attribute> Target<G, A> {
    fn is_before(&self, e: &RemoteIndex<G, A>) -> bool {
        match self.attribute {
            None => e.global() < self.global,
            Some(a) => e.local_key() < (self.global, a),
        }
    }

    fn matches(&self, e: &RemoteIndex<G, A>) -> bool {
        e.global() == self.global && self.attribute.is_none_or(|a| e.local_attribute() == a)
    }
}

/// Simultaneous cursor over one remote index list per neighbour.
#[derive(Debug, Clone)]
pub struct CollectiveIterator<'t, G, A> {
    cursors: BTreeMap<usize, Cursor<'t, G, A>>,
    target: Option<Target<G, A>>,
}

impl<'t, G: GlobalIndex, A: Attribute> CollectiveIterator<'t, G, A> {
    /// Cursor set over `(rank, list)` pairs; empty lists are skipped.
    pub fn new<I>(lists: I) -> Self
    where
        I: IntoIterator<Item = (usize, &'t [RemoteIndex<G, A>])>,
    {
        let cursors = lists
            .into_iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(rank, list)| (rank, Cursor { list, pos: 0 }))
            .collect();
        Self {
            cursors,
            target: None,
        }
    }

    /// Move every cursor to the first entry with global ≥ `global`.
    pub fn advance(&mut self, global: G) {
        self.advance_to(Target {
            global,
            attribute: None,
        });
    }

    /// Move every cursor to the first entry with `(global, local attribute)` ≥ the target.
    pub fn advance_with_attribute(&mut self, global: G, attribute: A) {
        self.advance_to(Target {
            global,
            attribute: Some(attribute),
        });
    }

    fn advance_to(&mut self, target: Target<G, A>) {
        self.cursors.retain(|_, c| {
            c.pos += c.list[c.pos..].partition_point(|e| target.is_before(e));
            c.pos < c.list.len()
        });
        self.target = Some(target);
    }

    /// Step every cursor that sits on the current target past all of its entries.
    pub fn bump(&mut self) {
        let Some(target) = self.target else {
            return;
        };
        self.cursors.retain(|_, c| {
            while c.current().is_some_and(|e| target.matches(e)) {
                c.pos += 1;
            }
            c.pos < c.list.len()
        });
    }

    /// `(rank, entry)` for every entry at the current target, in rank order.
    pub fn current(&self) -> impl Iterator<Item = (usize, &'t RemoteIndex<G, A>)> + '_ {
        let target = self.target;
        self.cursors.iter().flat_map(move |(&rank, c)| {
            let list: &'t [RemoteIndex<G, A>] = c.list;
            list[c.pos..]
                .iter()
                .take_while(move |e| target.is_some_and(|t| t.matches(e)))
                .map(move |e| (rank, e))
        })
    }

    /// Neighbours whose cursor sits on the current target.
    pub fn matching_ranks(&self) -> impl Iterator<Item = usize> + '_ {
        let target = self.target;
        self.cursors
            .iter()
            .filter(move |(_, c)| {
                c.current()
                    .is_some_and(|e| target.is_some_and(|t| t.matches(e)))
            })
            .map(|(&rank, _)| rank)
    }

    /// All cursors are exhausted.
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::attribute::GridFlag::{self, *};

    fn ri(g: u64, local: GridFlag, remote: GridFlag) -> RemoteIndex<u64, GridFlag> {
        RemoteIndex::new(g, local, remote)
    }

    #[test]
    fn lock_step_over_three_neighbours() {
        let l0 = vec![ri(1, Owner, Ghost), ri(4, Owner, Ghost)];
        let l1 = vec![ri(1, Owner, Overlap), ri(1, Owner, Ghost), ri(2, Border, Owner)];
        let l2: Vec<RemoteIndex<u64, GridFlag>> = vec![];
        let mut it = CollectiveIterator::new([(0, &l0[..]), (1, &l1[..]), (2, &l2[..])]);

        it.advance(1);
        let at_1: Vec<_> = it.current().map(|(r, e)| (r, e.attribute())).collect();
        assert_eq!(at_1, vec![(0, Ghost), (1, Overlap), (1, Ghost)]);

        it.bump();
        assert_eq!(it.current().count(), 0);

        it.advance(2);
        assert_eq!(it.matching_ranks().collect::<Vec<_>>(), vec![1]);
        it.advance(3);
        // neighbour 1 is exhausted
        assert_eq!(it.current().count(), 0);
        assert!(!it.is_empty());
        it.advance(4);
        assert_eq!(it.current().map(|(r, _)| r).collect::<Vec<_>>(), vec![0]);
        it.advance(5);
        assert!(it.is_empty());
    }

    #[test]
    fn attribute_filter_and_no_rewind() {
        let l = vec![ri(3, Owner, Ghost), ri(3, Overlap, Owner), ri(7, Owner, Owner)];
        let mut it = CollectiveIterator::new([(5, &l[..])]);
        it.advance_with_attribute(3, Overlap);
        let hits: Vec<_> = it.current().map(|(_, e)| e.local_attribute()).collect();
        assert_eq!(hits, vec![Overlap]);
        it.advance(1);
        assert_eq!(it.current().count(), 0);
        it.advance(3);
        assert_eq!(it.current().map(|(_, e)| e.local_attribute()).collect::<Vec<_>>(), vec![Overlap]);
    }
}
