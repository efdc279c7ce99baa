//! A worklist that records each element at most once.

use index_vec::{Idx, IndexVec};

#[derive(Debug, Clone, PartialEq, Eq)]
/// A queue of index-typed elements in which every element occurs at most once
/// until it is popped again.
///
/// Used to batch per-bitvector notifications: repeatedly marking the same
/// bitvector while undoing a range of trail entries must result in a single
/// callback.
pub(crate) struct MarkSet<I: Idx> {
	/// Whether an element is currently present in `queue`.
	marked: IndexVec<I, bool>,
	/// The recorded elements, in first-marked order.
	queue: Vec<I>,
}

impl<I: Idx> MarkSet<I> {
	/// Ensure the mark storage covers elements up to and including `index`.
	pub(crate) fn grow_to(&mut self, index: I) {
		if index.index() >= self.marked.len() {
			self.marked.resize(index.index() + 1, false);
		}
	}

	/// Record `index`, unless it is already present.
	pub(crate) fn insert(&mut self, index: I) {
		if !self.marked[index] {
			self.marked[index] = true;
			self.queue.push(index);
		}
	}

	/// Whether no elements are currently recorded.
	pub(crate) fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}

	/// Remove and return the most recently recorded element.
	pub(crate) fn pop(&mut self) -> Option<I> {
		let index = self.queue.pop()?;
		self.marked[index] = false;
		Some(index)
	}
}

impl<I: Idx> Default for MarkSet<I> {
	fn default() -> Self {
		Self {
			marked: IndexVec::new(),
			queue: Vec::new(),
		}
	}
}
