//! Module containing the propagation engine: bringing every bitvector's
//! forced comparison literals into agreement with its bound approximation, or
//! reporting a contradiction.

use tracing::{debug, trace};

use crate::{
	actions::{Oracle, ReasonTag},
	lit::Lit,
	solver::{
		comparison::{CmpId, CmpOp},
		reason::Claim,
		BvId, BvSolver, Conflict,
	},
	value::Weight,
};

impl<W: Weight, O: Oracle> BvSolver<W, O> {
	/// Bring every comparison literal into agreement with its bitvector's
	/// current bound, or report a conflict clause.
	///
	/// Propagation is idempotent; a pass over all bitvectors reaches the
	/// fixed point, since a comparison entailed by a bound can never tighten
	/// that bound further. The pass is skipped entirely when no relevant
	/// literal changed since the last call.
	pub fn propagate(&mut self) -> Result<(), Conflict> {
		self.state.statistics.propagations += 1;
		debug_assert!(self.dbg_synced());
		debug_assert!(self.state.touched.is_empty());
		if !self.state.requires_propagation {
			self.state.statistics.propagations_skipped += 1;
			return Ok(());
		}
		trace!(count = self.state.statistics.propagations, "propagate");

		for i in 0..self.state.bitvectors.len() {
			let bv = BvId::from_usize(i);
			self.state.update_approximations(bv);
			if let Err(conflict) = self.scan_bitvector(bv) {
				self.state.statistics.conflicts += 1;
				debug!(clause = ?conflict.clause(), "conflict");
				return Err(conflict);
			}
			// Subtheories expect an up-to-date bound when notified.
			self.notify_bits_changed(bv);
		}

		self.state.requires_propagation = false;
		Ok(())
	}

	/// Scan the four comparison indices of `bv` in both bound directions.
	fn scan_bitvector(&mut self, bv: BvId) -> Result<(), Conflict> {
		for op in CmpOp::ALL {
			self.scan_over_driven(bv, op)?;
			self.scan_under_driven(bv, op)?;
		}
		Ok(())
	}

	/// Process the entries of the `op` index whose value follows from the
	/// over-approximation.
	///
	/// The forced entries form the upper segment of the ascending index, so
	/// the early-termination scan walks downwards and stops at the first
	/// unforced entry.
	fn scan_over_driven(&mut self, bv: BvId, op: CmpOp) -> Result<(), Conflict> {
		let over = self.state.bitvectors[bv].approx.over;
		let len = self.state.bitvectors[bv].cmp.list(op).len();
		if self.state.config.early_termination {
			for i in (0..len).rev() {
				if !self.over_forces(bv, op, i, over) {
					break;
				}
				self.apply_over_forced(bv, op, i)?;
			}
		} else {
			for i in 0..len {
				if self.over_forces(bv, op, i, over) {
					self.apply_over_forced(bv, op, i)?;
				}
			}
		}
		Ok(())
	}

	/// Process the entries of the `op` index whose value follows from the
	/// under-approximation.
	///
	/// The forced entries form the lower segment of the ascending index, so
	/// the early-termination scan walks upwards and stops at the first
	/// unforced entry.
	fn scan_under_driven(&mut self, bv: BvId, op: CmpOp) -> Result<(), Conflict> {
		let under = self.state.bitvectors[bv].approx.under;
		let len = self.state.bitvectors[bv].cmp.list(op).len();
		if self.state.config.early_termination {
			for i in 0..len {
				if !self.under_forces(bv, op, i, under) {
					break;
				}
				self.apply_under_forced(bv, op, i)?;
			}
		} else {
			for i in (0..len).rev() {
				if self.under_forces(bv, op, i, under) {
					self.apply_under_forced(bv, op, i)?;
				}
			}
		}
		Ok(())
	}

	/// Whether the over-approximation `over` determines the value of the
	/// `i`-th comparison of the `op` index of `bv`.
	fn over_forces(&self, bv: BvId, op: CmpOp, i: usize, over: W) -> bool {
		let w = self.state.comparisons[self.cmp_at(bv, op, i)].w;
		match op {
			CmpOp::Lt | CmpOp::Geq => over < w,
			CmpOp::Leq | CmpOp::Gt => over <= w,
		}
	}

	/// Whether the under-approximation `under` determines the value of the
	/// `i`-th comparison of the `op` index of `bv`.
	fn under_forces(&self, bv: BvId, op: CmpOp, i: usize, under: W) -> bool {
		let w = self.state.comparisons[self.cmp_at(bv, op, i)].w;
		match op {
			CmpOp::Lt | CmpOp::Geq => under >= w,
			CmpOp::Leq | CmpOp::Gt => under > w,
		}
	}

	/// Enact the over-driven forced value of the `i`-th comparison of the
	/// `op` index: `bv < w` and `bv ≤ w` become true, `bv > w` and `bv ≥ w`
	/// become false.
	fn apply_over_forced(&mut self, bv: BvId, op: CmpOp, i: usize) -> Result<(), Conflict> {
		let cid = self.cmp_at(bv, op, i);
		let lit = self.state.comparisons[cid].lit;
		let forced = match op {
			CmpOp::Lt | CmpOp::Leq => lit,
			CmpOp::Gt | CmpOp::Geq => !lit,
		};
		self.apply_forced(cid, forced)
	}

	/// Enact the under-driven forced value of the `i`-th comparison of the
	/// `op` index: `bv > w` and `bv ≥ w` become true, `bv < w` and `bv ≤ w`
	/// become false.
	fn apply_under_forced(&mut self, bv: BvId, op: CmpOp, i: usize) -> Result<(), Conflict> {
		let cid = self.cmp_at(bv, op, i);
		let lit = self.state.comparisons[cid].lit;
		let forced = match op {
			CmpOp::Lt | CmpOp::Leq => !lit,
			CmpOp::Gt | CmpOp::Geq => lit,
		};
		self.apply_forced(cid, forced)
	}

	/// Enqueue the forced value of a comparison literal, or construct the
	/// conflict clause when its current assignment contradicts it.
	fn apply_forced(&mut self, cid: CmpId, forced: Lit) -> Result<(), Conflict> {
		match self.value(forced) {
			Some(true) => Ok(()),
			None => {
				trace!(lit = i32::from(forced), "propagate comparison");
				let _ = self.enqueue(forced, ReasonTag::Comparison);
				Ok(())
			}
			Some(false) => Err(self.conflict_for(cid, forced)),
		}
	}

	/// The conflict clause for a comparison whose current assignment
	/// contradicts its bound-forced value `forced`.
	fn conflict_for(&self, cid: CmpId, forced: Lit) -> Conflict {
		let c = self.state.comparisons[cid];
		let claim = Claim::for_forced(c.op, c.w, !forced.is_negated());
		let mut clause = vec![forced];
		self.explain_bound(c.bv, Some(cid), claim, &mut clause);
		Conflict::new(clause.into_iter().map(|l| self.solver_lit(l)).collect())
	}

	/// The id of the `i`-th comparison of the `op` index of `bv`.
	fn cmp_at(&self, bv: BvId, op: CmpOp, i: usize) -> CmpId {
		self.state.bitvectors[bv].cmp.list(op)[i]
	}
}

#[cfg(test)]
mod tests {
	use tracing_test::traced_test;

	use crate::{
		solver::comparison::CmpOp,
		tests::TestOracle,
		BvSolver, Config,
	};

	#[test]
	#[traced_test]
	fn test_complementary_comparisons() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(3);
		let lt = slv.new_comparison(CmpOp::Lt, bv, 5, None);
		let geq = slv.new_comparison(CmpOp::Geq, bv, 5, None);

		slv.decide(lt);
		assert!(slv.propagate().is_ok());
		assert_eq!(slv.value(geq), Some(false));
	}

	#[test]
	#[traced_test]
	fn test_conflicting_comparisons() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(3);
		let lt = slv.new_comparison(CmpOp::Lt, bv, 5, None);
		let geq = slv.new_comparison(CmpOp::Geq, bv, 5, None);

		slv.decide(lt);
		slv.decide(geq);
		let conflict = slv.propagate().unwrap_err();
		// Both assignments participate in the contradiction.
		let mut clause = conflict.into_clause();
		clause.sort_unstable();
		let mut expected = vec![slv.solver_lit(!lt), slv.solver_lit(!geq)];
		expected.sort_unstable();
		assert_eq!(clause, expected);
		assert_eq!(slv.statistics().conflicts(), 1);
	}

	#[test]
	#[traced_test]
	fn test_bit_assignments_force_comparisons() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(4);
		let leq = slv.new_comparison(CmpOp::Leq, bv, 11, None);
		let gt = slv.new_comparison(CmpOp::Gt, bv, 3, None);
		let bits: Vec<_> = slv.bits(bv).to_vec();

		// bit3 = false bounds the value to [0, 7].
		slv.decide(!bits[3]);
		assert!(slv.propagate().is_ok());
		assert_eq!(slv.value(leq), Some(true));
		assert_eq!(slv.value(gt), None);

		// bit2 = true bounds the value to [4, 7].
		slv.decide(bits[2]);
		assert!(slv.propagate().is_ok());
		assert_eq!(slv.value(gt), Some(true));
	}

	#[test]
	fn test_propagation_completeness() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let bv = slv.new_bitvector(4);
		let cmps: Vec<_> = (0..16)
			.map(|w| (slv.new_comparison(CmpOp::Lt, bv, w, None), w))
			.collect();
		let bits: Vec<_> = slv.bits(bv).to_vec();

		slv.decide(bits[1]);
		slv.decide(!bits[3]);
		assert!(slv.propagate().is_ok());

		// Bounds are [2, 7]: every `bv < w` is assigned iff determined.
		for (lit, w) in cmps {
			let expect = if w > 7 {
				Some(true)
			} else if w <= 2 {
				Some(false)
			} else {
				None
			};
			assert_eq!(slv.value(lit), expect, "bv < {w}");
		}
	}

	#[test]
	fn test_propagation_skipped_when_clean() {
		let mut slv = BvSolver::<u64, _>::new(TestOracle::default());
		let _ = slv.new_bitvector(3);
		assert!(slv.propagate().is_ok());
		assert!(slv.propagate().is_ok());
		assert_eq!(slv.statistics().propagations(), 2);
		assert_eq!(slv.statistics().propagations_skipped(), 1);
	}

	/// Run the same scenario in exhaustive and early-termination mode and
	/// compare every comparison value afterwards.
	fn assert_scan_modes_agree(script: impl Fn(&mut BvSolver<u64, TestOracle>) -> Vec<crate::Lit>) {
		let mut exhaustive = BvSolver::<u64, _>::new(TestOracle::default());
		let mut early = BvSolver::<u64, _>::with_config(
			TestOracle::default(),
			Config {
				early_termination: true,
			},
		);
		let lits_a = script(&mut exhaustive);
		let lits_b = script(&mut early);
		assert_eq!(lits_a, lits_b);
		for (&a, &b) in lits_a.iter().zip(lits_b.iter()) {
			assert_eq!(exhaustive.value(a), early.value(b));
		}
	}

	#[test]
	#[traced_test]
	fn test_early_termination_equivalent() {
		assert_scan_modes_agree(|slv| {
			let bv = slv.new_bitvector(4);
			let mut lits = Vec::new();
			for w in [2, 5, 9, 13] {
				lits.push(slv.new_comparison(CmpOp::Lt, bv, w, None));
				lits.push(slv.new_comparison(CmpOp::Leq, bv, w, None));
				lits.push(slv.new_comparison(CmpOp::Gt, bv, w, None));
				lits.push(slv.new_comparison(CmpOp::Geq, bv, w, None));
			}
			let bits: Vec<_> = slv.bits(bv).to_vec();
			slv.decide(bits[2]);
			slv.decide(!bits[0]);
			assert!(slv.propagate().is_ok());
			lits
		});

		assert_scan_modes_agree(|slv| {
			let bv = slv.new_bitvector(5);
			let mut lits = Vec::new();
			for w in [1, 6, 11, 19, 27, 30] {
				lits.push(slv.new_comparison(CmpOp::Geq, bv, w, None));
				lits.push(slv.new_comparison(CmpOp::Leq, bv, w, None));
			}
			let geq = lits[2];
			slv.decide(geq);
			let bits: Vec<_> = slv.bits(bv).to_vec();
			slv.decide(!bits[4]);
			assert!(slv.propagate().is_ok());
			lits
		});
	}
}
