//! Module containing the bound store: the `[under, over]` approximation of
//! each bitvector's value under the current partial assignment.

use tracing::trace;

use crate::{
	lit::Lit,
	solver::{comparison::CmpOp, trail::Trail, BvId, State},
	value::Weight,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// An inclusive interval approximation of a bitvector's value.
///
/// `under` is the minimum value consistent with all true bits and all
/// entailed lower-bound comparisons; `over` the maximum consistent with all
/// non-false bits and all entailed upper-bound comparisons.
pub(crate) struct Bounds<W> {
	/// The under-approximation.
	pub(crate) under: W,
	/// The over-approximation.
	pub(crate) over: W,
}

impl<W: Weight> Bounds<W> {
	/// The all-zero approximation, the starting point of every recomputation.
	pub(crate) fn new() -> Self {
		Bounds {
			under: W::ZERO,
			over: W::ZERO,
		}
	}

	/// Compute the approximation from the bit assignment alone, ignoring
	/// comparisons: a true bit contributes its weight to both bounds, an
	/// unassigned bit only to `over`.
	pub(crate) fn from_bits(bits: &[Lit], trail: &Trail) -> Self {
		let mut b = Bounds::new();
		for (i, &bit) in bits.iter().enumerate() {
			let weight = W::bit(i as u32);
			match trail.value(bit) {
				Some(true) => {
					b.under = b.under + weight;
					b.over = b.over + weight;
				}
				Some(false) => {}
				None => b.over = b.over + weight,
			}
		}
		b
	}
}

impl<W: Weight> State<W> {
	/// Recompute and cache the `[under, over]` approximation of `bv` from the
	/// current bit and comparison assignments.
	///
	/// Idempotent and order-independent: each entailed comparison only
	/// tightens a bound when that shrinks it.
	pub(crate) fn update_approximations(&mut self, bv: BvId) {
		let b = self.compute_bounds(bv);
		self.bitvectors[bv].approx = b;
		trace!(
			bv = usize::from(bv),
			under = ?b.under,
			over = ?b.over,
			"update approximations"
		);
	}

	/// Derive the approximation of `bv` from the current assignment.
	fn compute_bounds(&self, bv: BvId) -> Bounds<W> {
		let bvec = &self.bitvectors[bv];
		let mut b = Bounds::from_bits(&bvec.bits, &self.trail);
		for op in CmpOp::ALL {
			for &cid in bvec.cmp.list(op) {
				let c = &self.comparisons[cid];
				c.tighten(self.trail.value(c.lit), &mut b);
			}
		}
		b
	}

	/// Whether the cached approximation of `bv` matches a fresh
	/// recomputation.
	pub(crate) fn approx_up_to_date(&self, bv: BvId) -> bool {
		self.bitvectors[bv].approx == self.compute_bounds(bv)
	}
}
