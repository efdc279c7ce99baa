//! Module containing the chronological assignment trail, the sole mechanism
//! for undoing theory state on backtracking.

use index_vec::IndexVec;

use crate::{
	helpers::mark_set::MarkSet,
	lit::{Lit, Var},
	solver::BvId,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The kind of object a trail entry assigned.
pub(crate) enum EntryKind {
	/// A bit of a bitvector.
	Bit,
	/// A comparison literal.
	Comparison,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Record of one theory-variable assignment.
pub(crate) struct TrailEntry {
	/// Whether the variable denotes a bit or a comparison.
	pub(crate) kind: EntryKind,
	/// The bitvector owning the assigned variable.
	pub(crate) bv: BvId,
	/// The assigned variable.
	pub(crate) var: Var,
	/// The truth value the variable was assigned.
	pub(crate) value: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// The assignment log and the decision level boundaries within it.
pub(crate) struct Trail {
	/// The assignments, in chronological order.
	entries: Vec<TrailEntry>,
	/// The trail length at each decision boundary.
	lim: Vec<usize>,
	/// The current value of each theory variable.
	assigns: IndexVec<Var, Option<bool>>,
}

impl Trail {
	/// Record the assignment of a variable.
	pub(crate) fn assign(&mut self, entry: TrailEntry) {
		debug_assert!(
			self.assigns[entry.var].is_none(),
			"variable {:?} is already on the trail",
			entry.var
		);
		self.assigns[entry.var] = Some(entry.value);
		self.entries.push(entry);
	}

	/// The current decision level; `0` is the root level.
	pub(crate) fn decision_level(&self) -> u32 {
		self.lim.len() as u32
	}

	/// The number of assignments currently on the trail.
	pub(crate) fn len(&self) -> usize {
		self.entries.len()
	}

	/// Undo all entries above the boundary for `level`, recording the
	/// bitvector of every undone bit assignment in `touched`.
	///
	/// Returns the number of undone entries.
	pub(crate) fn pop_to_level(&mut self, level: u32, touched: &mut MarkSet<BvId>) -> usize {
		if self.decision_level() <= level {
			return 0;
		}
		let stop = self.lim[level as usize];
		self.lim.truncate(level as usize);
		let mut undone = 0;
		while self.entries.len() > stop {
			self.undo_last(touched);
			undone += 1;
		}
		undone
	}

	/// Undo entries from the top of the trail until just before the entry that
	/// assigned `lit`, leaving that assignment in place.
	pub(crate) fn pop_until_lit(&mut self, lit: Lit, touched: &mut MarkSet<BvId>) {
		while let Some(entry) = self.entries.last() {
			if entry.var == lit.var() {
				debug_assert_eq!(entry.value, !lit.is_negated());
				return;
			}
			self.undo_last(touched);
		}
	}

	/// Open a new decision level boundary.
	pub(crate) fn push_level(&mut self) {
		self.lim.push(self.entries.len());
	}

	/// Add storage for a newly created variable.
	pub(crate) fn register_var(&mut self) -> Var {
		self.assigns.push(None)
	}

	/// Remove the top trail entry and reset its variable to unknown.
	fn undo_last(&mut self, touched: &mut MarkSet<BvId>) {
		let entry = self.entries.pop().expect("trail is empty");
		debug_assert!(self.assigns[entry.var].is_some());
		self.assigns[entry.var] = None;
		if entry.kind == EntryKind::Bit {
			touched.insert(entry.bv);
		}
	}

	/// The current truth value of a literal, if its variable is assigned.
	pub(crate) fn value(&self, lit: Lit) -> Option<bool> {
		self.assigns[lit.var()].map(|b| b != lit.is_negated())
	}

	/// The current truth value of a variable, if it is assigned.
	pub(crate) fn value_var(&self, var: Var) -> Option<bool> {
		self.assigns[var]
	}
}
