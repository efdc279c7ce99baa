//! Module containing the on-demand construction of explanation clauses for
//! bound-implied literals.
//!
//! An explanation is a set of literals, true at the time of a deduction,
//! whose conjunction entails it. The builder prefers the cheapest witnessing
//! evidence: the raw bit assignment, relaxed bit by bit, and otherwise the
//! single sibling comparison whose replay first establishes the implied
//! bound.

use tracing::debug;

use crate::{
	actions::{Oracle, ReasonTag},
	lit::{Lit, SolverLit},
	solver::{
		bounds::Bounds,
		comparison::{CmpId, CmpOp},
		BvId, BvSolver, VarOwner,
	},
	value::Weight,
	Clause,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The bound fact an explanation must witness.
pub(crate) enum Claim<W> {
	/// The over-approximation is strictly below the weight.
	OverBelow(W),
	/// The over-approximation is at most the weight.
	OverAtMost(W),
	/// The under-approximation is at least the weight.
	UnderAtLeast(W),
	/// The under-approximation is strictly above the weight.
	UnderAbove(W),
}

impl<W: Weight> Claim<W> {
	/// The claim witnessing that the comparison `op w` takes the truth value
	/// `positive`.
	pub(crate) fn for_forced(op: CmpOp, w: W, positive: bool) -> Self {
		match (op, positive) {
			(CmpOp::Lt, true) | (CmpOp::Geq, false) => Claim::OverBelow(w),
			(CmpOp::Leq, true) | (CmpOp::Gt, false) => Claim::OverAtMost(w),
			(CmpOp::Geq, true) | (CmpOp::Lt, false) => Claim::UnderAtLeast(w),
			(CmpOp::Gt, true) | (CmpOp::Leq, false) => Claim::UnderAbove(w),
		}
	}

	/// Whether the claim holds for the given bounds.
	fn holds(self, bounds: &Bounds<W>) -> bool {
		match self {
			Claim::OverBelow(w) => bounds.over < w,
			Claim::OverAtMost(w) => bounds.over <= w,
			Claim::UnderAtLeast(w) => bounds.under >= w,
			Claim::UnderAbove(w) => bounds.under > w,
		}
	}

	/// Whether the claim constrains the over-approximation, as opposed to the
	/// under-approximation.
	fn over_driven(self) -> bool {
		matches!(self, Claim::OverBelow(_) | Claim::OverAtMost(_))
	}
}

impl<W: Weight, O: Oracle> BvSolver<W, O> {
	/// Construct the clause justifying the propagated literal `lit`.
	///
	/// The engine's visible state is first rolled back to the point at which
	/// `lit` was derived, so the explanation reflects the assignment that
	/// justified the deduction. The returned clause starts with `lit` itself;
	/// every other literal is false under that assignment.
	pub fn build_reason(&mut self, lit: Lit, tag: ReasonTag) -> Clause<SolverLit> {
		self.state.statistics.reasons += 1;
		debug_assert_ne!(self.value(lit), Some(false));
		self.backtrack_until_lit(lit);

		let mut reason = vec![lit];
		match tag {
			ReasonTag::Comparison => {
				let VarOwner::Comparison(cid) = self.state.vars[lit.var()].owner else {
					panic!("comparison reason requested for a bit variable")
				};
				let c = self.state.comparisons[cid];
				self.state.update_approximations(c.bv);
				let claim = Claim::for_forced(c.op, c.w, !lit.is_negated());
				debug_assert!(claim.holds(&self.state.bitvectors[c.bv].approx));
				self.explain_bound(c.bv, Some(cid), claim, &mut reason);
			}
			ReasonTag::Bit => {}
		}

		let clause: Clause<SolverLit> = reason.into_iter().map(|l| self.solver_lit(l)).collect();
		debug!(clause = ?clause, "reason clause");
		clause
	}

	/// Append to `out` currently-false literals whose negations entail
	/// `claim` on `bv`. `exclude` is the comparison under explanation, which
	/// never contributes to its own claim.
	pub(crate) fn explain_bound(
		&self,
		bv: BvId,
		exclude: Option<CmpId>,
		claim: Claim<W>,
		out: &mut Clause<Lit>,
	) {
		debug_assert!(self.state.approx_up_to_date(bv));
		let mut b = Bounds::from_bits(&self.state.bitvectors[bv].bits, &self.state.trail);
		if claim.holds(&b) {
			self.explain_from_bits(bv, claim, b, out);
			return;
		}

		// The bits alone are insufficient: replay the comparison indices one
		// entry at a time and cite the single comparison whose tightening
		// first establishes the claim.
		for op in CmpOp::ALL {
			for &cid in self.state.bitvectors[bv].cmp.list(op) {
				if Some(cid) == exclude {
					continue;
				}
				let c = self.state.comparisons[cid];
				let value = self.state.trail.value(c.lit);
				c.tighten(value, &mut b);
				if claim.holds(&b) {
					out.push(match value {
						Some(true) => !c.lit,
						Some(false) => c.lit,
						None => unreachable!("unassigned comparison cannot tighten a bound"),
					});
					return;
				}
			}
		}
		unreachable!("bound claim is not entailed by the current assignment")
	}

	/// Bit-level explanation: walk the bits, omitting each one whose
	/// relaxation keeps `b` a witness of `claim`, unless it was assigned at
	/// the root level. Root assignments are always cited, even when
	/// technically redundant.
	fn explain_from_bits(&self, bv: BvId, claim: Claim<W>, mut b: Bounds<W>, out: &mut Clause<Lit>) {
		for (i, &bit) in self.state.bitvectors[bv].bits.iter().enumerate() {
			let weight = W::bit(i as u32);
			if claim.over_driven() {
				if self.state.trail.value(bit) != Some(false) {
					continue;
				}
				let relaxed = Bounds {
					under: b.under,
					over: b.over + weight,
				};
				if claim.holds(&relaxed) && self.level_of(bit.var()) > 0 {
					b = relaxed;
				} else {
					out.push(bit);
				}
			} else {
				if self.state.trail.value(bit) != Some(true) {
					continue;
				}
				let relaxed = Bounds {
					under: b.under - weight,
					over: b.over,
				};
				if claim.holds(&relaxed) && self.level_of(bit.var()) > 0 {
					b = relaxed;
				} else {
					out.push(!bit);
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use expect_test::expect;
	use tracing_test::traced_test;

	use crate::{
		actions::ReasonTag,
		lit::SolverLit,
		solver::comparison::CmpOp,
		tests::TestOracle,
		BvSolver,
	};

	/// Render a solver clause the way it would appear in a DIMACS-style
	/// trace.
	fn fmt_clause(clause: &[SolverLit]) -> String {
		format!(
			"{:?}",
			clause.iter().map(|&l| i32::from(l)).collect::<Vec<_>>()
		)
	}

	/// Every literal of a reason clause other than the asserted one must be
	/// false under the current assignment.
	fn assert_valid_reason<O: crate::Oracle>(slv: &BvSolver<u64, O>, clause: &[SolverLit]) {
		for &l in &clause[1..] {
			assert_eq!(
				slv.oracle.value(l),
				Some(false),
				"reason literal {l:?} is not false"
			);
		}
	}

	#[test]
	#[traced_test]
	fn test_single_comparison_reason() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(3);
		let lt = slv.new_comparison(CmpOp::Lt, bv, 5, None);
		let geq = slv.new_comparison(CmpOp::Geq, bv, 5, None);

		slv.decide(lt);
		assert!(slv.propagate().is_ok());
		assert_eq!(slv.value(geq), Some(false));

		// The deduction `¬(bv ≥ 5)` is explained by `bv < 5` alone.
		let clause = slv.build_reason(!geq, ReasonTag::Comparison);
		assert_eq!(clause.len(), 2);
		assert_eq!(clause[0], slv.solver_lit(!geq));
		assert_eq!(clause[1], slv.solver_lit(!lt));
		assert_valid_reason(&slv, &clause);
	}

	#[test]
	#[traced_test]
	fn test_bit_reason_discharges_redundant_bits() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(4);
		let lt = slv.new_comparison(CmpOp::Lt, bv, 8, None);
		let bits: Vec<_> = slv.bits(bv).to_vec();

		// bit2 = false is redundant for `bv < 8`; bit3 = false is essential.
		slv.decide(!bits[2]);
		slv.decide(!bits[3]);
		assert!(slv.propagate().is_ok());
		assert_eq!(slv.value(lt), Some(true));

		let clause = slv.build_reason(lt, ReasonTag::Comparison);
		// The essential bit is cited in its (currently false) positive form.
		expect![[r#"[5, 4]"#]].assert_eq(&fmt_clause(&clause));
		assert_valid_reason(&slv, &clause);
	}

	#[test]
	#[traced_test]
	fn test_root_level_bits_always_cited() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(4);
		let lt = slv.new_comparison(CmpOp::Lt, bv, 8, None);
		let bits: Vec<_> = slv.bits(bv).to_vec();

		// The same scenario, but with the redundant bit fixed at the root
		// level: it is cited regardless.
		slv.assign_root(!bits[2]);
		slv.decide(!bits[3]);
		assert!(slv.propagate().is_ok());

		let clause = slv.build_reason(lt, ReasonTag::Comparison);
		expect![[r#"[5, 3, 4]"#]].assert_eq(&fmt_clause(&clause));
		assert_valid_reason(&slv, &clause);
	}

	#[test]
	#[traced_test]
	fn test_under_driven_bit_reason() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(4);
		let gt = slv.new_comparison(CmpOp::Gt, bv, 3, None);
		let bits: Vec<_> = slv.bits(bv).to_vec();

		// bit2 = true makes the value at least 4; bit0 = true is redundant.
		slv.decide(bits[0]);
		slv.decide(bits[2]);
		assert!(slv.propagate().is_ok());
		assert_eq!(slv.value(gt), Some(true));

		let clause = slv.build_reason(gt, ReasonTag::Comparison);
		expect![[r#"[5, -3]"#]].assert_eq(&fmt_clause(&clause));
		assert_valid_reason(&slv, &clause);
	}

	#[test]
	#[traced_test]
	fn test_reason_rolls_back_to_derivation_point() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(3);
		let lt = slv.new_comparison(CmpOp::Lt, bv, 5, None);
		let geq = slv.new_comparison(CmpOp::Geq, bv, 5, None);
		let bits: Vec<_> = slv.bits(bv).to_vec();

		slv.decide(lt);
		assert!(slv.propagate().is_ok());
		// Later assignments must not leak into the explanation of the earlier
		// deduction.
		slv.decide(bits[0]);
		slv.decide(bits[1]);
		assert!(slv.propagate().is_ok());

		let clause = slv.build_reason(!geq, ReasonTag::Comparison);
		assert_eq!(clause, vec![slv.solver_lit(!geq), slv.solver_lit(!lt)]);
		// The rollback undid the bit assignments.
		assert_eq!(slv.value(bits[0]), None);
		assert_eq!(slv.value(bits[1]), None);
	}

	#[test]
	fn test_eager_literal_reason() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(3);
		let bits: Vec<_> = slv.bits(bv).to_vec();
		slv.assign_root(bits[0]);
		slv.assign_root(!bits[1]);

		// `bv ≥ 6` is assigned false eagerly on creation; its reason is
		// requested before any propagation pass has run.
		let geq = slv.new_comparison(CmpOp::Geq, bv, 6, None);
		assert_eq!(slv.value(geq), Some(false));
		let clause = slv.build_reason(!geq, ReasonTag::Comparison);
		assert_eq!(clause[0], slv.solver_lit(!geq));
		// The over-approximation 5 < 6 is witnessed by the false bit1.
		assert_eq!(&clause[1..], &[slv.solver_lit(bits[1])]);
	}

	#[test]
	fn test_bit_tag_yields_unit_reason() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(2);
		let bits: Vec<_> = slv.bits(bv).to_vec();
		slv.decide(bits[1]);
		let clause = slv.build_reason(bits[1], ReasonTag::Bit);
		assert_eq!(clause, vec![slv.solver_lit(bits[1])]);
	}
}
