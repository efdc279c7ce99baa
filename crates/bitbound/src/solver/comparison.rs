//! Module containing the comparison registry: canonical, deduplicated
//! comparison literals and the per-bitvector sorted indices that the
//! propagation and explanation algorithms rely on.

use std::fmt;

use itertools::Itertools;
use tracing::debug;

use crate::{
	actions::{Oracle, ReasonTag},
	lit::{Lit, SolverLit, SolverVar},
	solver::{bounds::Bounds, BvId, BvSolver, VarOwner},
	value::Weight,
};

index_vec::define_index_type! {
	/// Identifies a comparison within a [`BvSolver`].
	pub(crate) struct CmpId = u32;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// A relation between a bitvector and a constant weight.
pub enum CmpOp {
	/// `bv < w`
	Lt,
	/// `bv ≤ w`
	Leq,
	/// `bv > w`
	Gt,
	/// `bv ≥ w`
	Geq,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// An immutable record of the comparison `bv <op> w`, represented by `lit`.
pub(crate) struct Comparison<W> {
	/// The constant weight the bitvector is compared against.
	pub(crate) w: W,
	/// The canonical literal representing the comparison.
	pub(crate) lit: Lit,
	/// The bitvector the comparison is defined on.
	pub(crate) bv: BvId,
	/// The relation.
	pub(crate) op: CmpOp,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// The four per-bitvector comparison indices, each kept in ascending order of
/// weight.
pub(crate) struct CmpLists {
	/// Comparisons `bv < w`.
	lt: Vec<CmpId>,
	/// Comparisons `bv ≤ w`.
	leq: Vec<CmpId>,
	/// Comparisons `bv > w`.
	gt: Vec<CmpId>,
	/// Comparisons `bv ≥ w`.
	geq: Vec<CmpId>,
}

impl CmpOp {
	/// All relations, in registry order.
	pub(crate) const ALL: [CmpOp; 4] = [CmpOp::Lt, CmpOp::Leq, CmpOp::Gt, CmpOp::Geq];
}

impl fmt::Display for CmpOp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			CmpOp::Lt => "<",
			CmpOp::Leq => "<=",
			CmpOp::Gt => ">",
			CmpOp::Geq => ">=",
		})
	}
}

impl<W: Weight> Comparison<W> {
	/// Tighten `bounds` by the constraint this comparison enforces under the
	/// given truth value, if that shrinks them.
	pub(crate) fn tighten(&self, value: Option<bool>, bounds: &mut Bounds<W>) {
		match (self.op, value) {
			(CmpOp::Lt, Some(true)) if bounds.over >= self.w => bounds.over = self.w.pred(),
			(CmpOp::Lt, Some(false)) if bounds.under < self.w => bounds.under = self.w,
			(CmpOp::Leq, Some(true)) if bounds.over > self.w => bounds.over = self.w,
			(CmpOp::Leq, Some(false)) if bounds.under <= self.w => bounds.under = self.w.succ(),
			(CmpOp::Gt, Some(true)) if bounds.under <= self.w => bounds.under = self.w.succ(),
			(CmpOp::Gt, Some(false)) if bounds.over > self.w => bounds.over = self.w,
			(CmpOp::Geq, Some(true)) if bounds.under < self.w => bounds.under = self.w,
			(CmpOp::Geq, Some(false)) if bounds.over >= self.w => bounds.over = self.w.pred(),
			_ => {}
		}
	}
}

impl CmpLists {
	/// The index for the given relation.
	pub(crate) fn list(&self, op: CmpOp) -> &[CmpId] {
		match op {
			CmpOp::Lt => &self.lt,
			CmpOp::Leq => &self.leq,
			CmpOp::Gt => &self.gt,
			CmpOp::Geq => &self.geq,
		}
	}

	/// Mutable access to the index for the given relation.
	pub(crate) fn list_mut(&mut self, op: CmpOp) -> &mut Vec<CmpId> {
		match op {
			CmpOp::Lt => &mut self.lt,
			CmpOp::Leq => &mut self.leq,
			CmpOp::Gt => &mut self.gt,
			CmpOp::Geq => &mut self.geq,
		}
	}
}

impl<W: Weight, O: Oracle> BvSolver<W, O> {
	/// Return the canonical literal for the comparison `bv <op> w`, creating
	/// it if it does not yet exist.
	///
	/// When `unify` is supplied, the solver literal of that variable is made
	/// logically equivalent to the canonical literal through two implication
	/// clauses. A newly created literal whose value is already determined by
	/// the bitvector's bound is assigned eagerly, before control returns to
	/// the boolean engine.
	pub fn new_comparison(&mut self, op: CmpOp, bv: BvId, w: W, unify: Option<SolverVar>) -> Lit {
		assert!(
			usize::from(bv) < self.state.bitvectors.len(),
			"comparison on unknown bitvector {}",
			usize::from(bv)
		);
		if let Some(lit) = self.find_comparison(op, bv, w) {
			if let Some(outer) = unify {
				let canonical = self.solver_lit(lit);
				self.make_equal_in_solver(SolverLit::from(outer), canonical);
			}
			return lit;
		}

		let cid = CmpId::from_usize(self.state.comparisons.len());
		let var = self.new_var(unify, VarOwner::Comparison(cid));
		let lit = Lit::from(var);
		let pushed = self.state.comparisons.push(Comparison { w, lit, bv, op });
		debug_assert_eq!(pushed, cid);
		let pos = self.state.bitvectors[bv]
			.cmp
			.list(op)
			.partition_point(|&c| self.state.comparisons[c].w < w);
		self.state.bitvectors[bv].cmp.list_mut(op).insert(pos, cid);
		debug_assert!(
			self.state.bitvectors[bv]
				.cmp
				.list(op)
				.iter()
				.map(|&c| self.state.comparisons[c].w)
				.tuple_windows()
				.all(|(a, b)| a < b),
			"comparison index out of order"
		);
		debug!(
			lit = i32::from(lit),
			bv = usize::from(bv),
			op = %op,
			w = ?w,
			"new comparison"
		);

		self.state.update_approximations(bv);
		self.state.requires_propagation = true;

		// A comparison created after bounds were established may already be
		// forced; the boolean engine must learn this before its next decision.
		let Bounds { under, over } = self.state.bitvectors[bv].approx;
		let forced_true = match op {
			CmpOp::Lt => over < w,
			CmpOp::Leq => over <= w,
			CmpOp::Gt => under > w,
			CmpOp::Geq => under >= w,
		};
		let forced_false = match op {
			CmpOp::Lt => under >= w,
			CmpOp::Leq => under > w,
			CmpOp::Gt => over <= w,
			CmpOp::Geq => over < w,
		};
		debug_assert!(!(forced_true && forced_false));
		if forced_true {
			let _ = self.enqueue(lit, ReasonTag::Comparison);
		} else if forced_false {
			let _ = self.enqueue(!lit, ReasonTag::Comparison);
		}
		lit
	}

	/// Look up the literal of an existing comparison `bv <op> w`.
	fn find_comparison(&self, op: CmpOp, bv: BvId, w: W) -> Option<Lit> {
		let list = self.state.bitvectors[bv].cmp.list(op);
		let i = list
			.binary_search_by(|&c| self.state.comparisons[c].w.cmp(&w))
			.ok()?;
		Some(self.state.comparisons[list[i]].lit)
	}
}

#[cfg(test)]
mod tests {
	use crate::{actions::ReasonTag, lit::SolverLit, solver::comparison::CmpOp, tests::TestOracle, BvSolver};

	#[test]
	fn test_dedup_returns_same_literal() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(4);
		let a = slv.new_comparison(CmpOp::Lt, bv, 7, None);
		let b = slv.new_comparison(CmpOp::Lt, bv, 7, None);
		assert_eq!(a, b);
		// A different relation or weight yields a fresh literal.
		assert_ne!(a, slv.new_comparison(CmpOp::Leq, bv, 7, None));
		assert_ne!(a, slv.new_comparison(CmpOp::Lt, bv, 8, None));
	}

	#[test]
	fn test_unify_emits_equivalence() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(4);
		let a = slv.new_comparison(CmpOp::Geq, bv, 3, None);
		let outer = slv.oracle.fresh_var();
		let b = slv.new_comparison(CmpOp::Geq, bv, 3, Some(outer));
		assert_eq!(a, b);

		let canonical = slv.solver_lit(a);
		let outer = SolverLit::from(outer);
		assert!(slv.oracle.clauses.contains(&vec![!outer, canonical]));
		assert!(slv.oracle.clauses.contains(&vec![outer, !canonical]));
	}

	#[test]
	fn test_lists_kept_sorted() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(5);
		for w in [9, 2, 17, 5, 11] {
			let _ = slv.new_comparison(CmpOp::Gt, bv, w, None);
		}
		let weights: Vec<u64> = slv.state.bitvectors[bv]
			.cmp
			.list(CmpOp::Gt)
			.iter()
			.map(|&c| slv.state.comparisons[c].w)
			.collect();
		assert_eq!(weights, vec![2, 5, 9, 11, 17]);
	}

	#[test]
	fn test_eager_assignment_on_creation() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(3);
		let bits: Vec<_> = slv.bits(bv).to_vec();
		slv.assign_root(bits[0]);
		slv.assign_root(!bits[1]);

		// Bounds are [1, 5]: `bv >= 6` is unsatisfiable and must be assigned
		// false immediately.
		let geq = slv.new_comparison(CmpOp::Geq, bv, 6, None);
		assert_eq!(slv.value(geq), Some(false));
		assert_eq!(
			slv.oracle.enqueued.last(),
			Some(&(slv.solver_lit(!geq), ReasonTag::Comparison))
		);

		// `bv < 2` is not determined while bit2 is unknown.
		let lt = slv.new_comparison(CmpOp::Lt, bv, 2, None);
		assert_eq!(slv.value(lt), None);

		// `bv >= 1` is already entailed by the true bit.
		let geq1 = slv.new_comparison(CmpOp::Geq, bv, 1, None);
		assert_eq!(slv.value(geq1), Some(true));
	}

	#[test]
	#[should_panic(expected = "unknown bitvector")]
	fn test_unknown_bitvector_is_fatal() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let _ = slv.new_comparison(CmpOp::Lt, crate::solver::BvId::from_usize(7), 1, None);
	}

	#[test]
	fn test_unify_on_fresh_comparison_uses_outer_var() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(4);
		let outer = slv.oracle.fresh_var();
		let lit = slv.new_comparison(CmpOp::Lt, bv, 9, Some(outer));
		assert_eq!(slv.solver_lit(lit).var(), outer);
	}
}
