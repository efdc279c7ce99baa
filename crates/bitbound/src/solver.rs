//! Module containing the central theory engine.

pub(crate) mod bounds;
pub(crate) mod comparison;
pub(crate) mod propagation;
pub(crate) mod reason;
pub(crate) mod trail;

pub use comparison::CmpOp;

use std::collections::VecDeque;

use delegate::delegate;
use index_vec::IndexVec;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
	actions::{BoxedSubTheory, Oracle, ReasonTag, SubTheoryContext, Theory},
	helpers::mark_set::MarkSet,
	lit::{Lit, SolverLit, SolverVar, Var},
	solver::{
		bounds::Bounds,
		comparison::{CmpId, Comparison},
		trail::{EntryKind, Trail, TrailEntry},
	},
	value::Weight,
	Clause,
};

index_vec::define_index_type! {
	/// Identifies a bitvector within a [`BvSolver`].
	pub struct BvId = u32;
}

index_vec::define_index_type! {
	/// Identifies a registered subtheory within a [`BvSolver`].
	pub struct SubTheoryId = u32;
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// The state of a single bitvector: its bit literals, its cached bound
/// approximation, the comparison indices defined on it, and its owner.
pub(crate) struct BitVec<W> {
	/// The bit literals, least significant first.
	pub(crate) bits: Vec<Lit>,
	/// The registered subtheory owning this bitvector, if any.
	pub(crate) owner: Option<SubTheoryId>,
	/// The four sorted comparison indices.
	pub(crate) cmp: comparison::CmpLists,
	/// The cached `[under, over]` approximation.
	pub(crate) approx: Bounds<W>,
}

#[derive(Debug)]
/// The bound-propagation theory engine for bitvector reasoning.
///
/// The engine is driven in lock-step by the boolean search engine `O` through
/// the [`Theory`] contract: it keeps a conservative interval approximation of
/// every bitvector consistent with the current partial assignment, deduces the
/// comparison literals the intervals force, reports contradictions as
/// learnable clauses, and justifies every deduction on demand.
pub struct BvSolver<W: Weight, O: Oracle> {
	/// The boolean search engine this theory is attached to.
	pub(crate) oracle: O,
	/// The registered per-bitvector subtheories.
	pub(crate) subtheories: IndexVec<SubTheoryId, BoxedSubTheory<W>>,
	/// The internal state of the engine.
	pub(crate) state: State<W>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Options configuring a [`BvSolver`].
pub struct Config {
	/// Stop each directional comparison scan at the first entry the bound no
	/// longer forces, relying on the sorted-order monotonicity of the lists.
	///
	/// When disabled every comparison is visited on every propagation pass.
	pub early_termination: bool,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("conflict detected: nogood {clause:?}")]
/// A contradiction found during propagation, reported as a clause over
/// currently-false solver literals for the boolean engine to learn from.
pub struct Conflict {
	/// The learnable clause, in the solver's variable space.
	clause: Clause<SolverLit>,
}

#[derive(Clone, Debug)]
/// Internal state of a [`BvSolver`].
pub(crate) struct State<W> {
	/// The theory variable records.
	pub(crate) vars: IndexVec<Var, VarData>,
	/// The bitvector definitions and their cached approximations.
	pub(crate) bitvectors: IndexVec<BvId, BitVec<W>>,
	/// The comparison records, partitioned per bitvector into `BitVec::cmp`.
	pub(crate) comparisons: IndexVec<CmpId, Comparison<W>>,
	/// The chronological assignment trail.
	pub(crate) trail: Trail,
	/// Bitvectors whose bits were undone since the last subtheory
	/// notification.
	pub(crate) touched: MarkSet<BvId>,
	/// Clauses queued by subtheories, handed to the boolean engine once the
	/// theory is consistent.
	pub(crate) clauses: VecDeque<Clause<SolverLit>>,
	/// Whether any relevant literal changed since the last propagation pass.
	pub(crate) requires_propagation: bool,
	/// The engine configuration.
	pub(crate) config: Config,
	/// Propagation and explanation counters.
	pub(crate) statistics: Statistics,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
/// Counters collected while the engine runs.
pub struct Statistics {
	/// Number of conflicts reported by propagation.
	pub(crate) conflicts: u64,
	/// Number of calls to [`BvSolver::propagate`].
	pub(crate) propagations: u64,
	/// Number of propagation calls skipped because nothing changed.
	pub(crate) propagations_skipped: u64,
	/// Number of explanation clauses constructed.
	pub(crate) reasons: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Record connecting a theory variable to the solver's variable space and to
/// the object it stands for.
pub(crate) struct VarData {
	/// The solver variable backing this theory variable.
	pub(crate) solver_var: SolverVar,
	/// The object within the theory that the variable represents.
	pub(crate) owner: VarOwner,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The object a theory variable represents.
pub(crate) enum VarOwner {
	/// A bit of the given bitvector.
	Bit(BvId),
	/// The given comparison.
	Comparison(CmpId),
}

impl<W: Weight> BitVec<W> {
	/// An empty bitvector definition.
	fn new() -> Self {
		Self {
			bits: Vec::new(),
			owner: None,
			cmp: comparison::CmpLists::default(),
			approx: Bounds::new(),
		}
	}
}

impl Conflict {
	/// Wrap a clause of currently-false solver literals.
	pub(crate) fn new(clause: Clause<SolverLit>) -> Self {
		Self { clause }
	}

	/// The learnable clause, in the solver's variable space.
	pub fn clause(&self) -> &[SolverLit] {
		&self.clause
	}

	/// Consume the conflict, returning its clause.
	pub fn into_clause(self) -> Clause<SolverLit> {
		self.clause
	}
}

impl Statistics {
	/// Number of conflicts reported by propagation.
	pub fn conflicts(&self) -> u64 {
		self.conflicts
	}

	/// Number of propagation calls.
	pub fn propagations(&self) -> u64 {
		self.propagations
	}

	/// Number of propagation calls skipped because nothing changed.
	pub fn propagations_skipped(&self) -> u64 {
		self.propagations_skipped
	}

	/// Number of explanation clauses constructed.
	pub fn reasons(&self) -> u64 {
		self.reasons
	}
}

impl<W: Weight, O: Oracle> BvSolver<W, O> {
	/// Create an engine attached to the given boolean search engine.
	pub fn new(oracle: O) -> Self {
		Self::with_config(oracle, Config::default())
	}

	/// Create an engine attached to the given boolean search engine, using the
	/// given configuration.
	pub fn with_config(oracle: O, config: Config) -> Self {
		Self {
			oracle,
			subtheories: IndexVec::new(),
			state: State {
				vars: IndexVec::new(),
				bitvectors: IndexVec::new(),
				comparisons: IndexVec::new(),
				trail: Trail::default(),
				touched: MarkSet::default(),
				clauses: VecDeque::new(),
				requires_propagation: true,
				config,
				statistics: Statistics::default(),
			},
		}
	}

	delegate! {
		to self.state.trail {
			/// The current decision level; `0` is the root level.
			pub fn decision_level(&self) -> u32;
			/// The current truth value of a theory literal, if it is assigned.
			pub fn value(&self, lit: Lit) -> Option<bool>;
		}
	}

	/// Register a subtheory so that bitvectors can be claimed by it.
	pub fn add_subtheory(&mut self, subtheory: BoxedSubTheory<W>) -> SubTheoryId {
		self.subtheories.push(subtheory)
	}

	/// The bit literals of a bitvector, least significant first.
	pub fn bits(&self, bv: BvId) -> &[Lit] {
		&self.state.bitvectors[bv].bits
	}

	/// Create a bitvector of the given width, backed by fresh solver
	/// variables.
	pub fn new_bitvector(&mut self, width: u32) -> BvId {
		assert!(
			width <= W::BITS,
			"bitvector width {width} exceeds the {} bits of the weight type",
			W::BITS
		);
		self.new_bitvector_inner(width, |_| None)
	}

	/// Create a bitvector whose bits are backed by the given solver variables,
	/// least significant first.
	pub fn new_bitvector_from_vars(&mut self, solver_vars: &[SolverVar]) -> BvId {
		assert!(
			solver_vars.len() <= W::BITS as usize,
			"bitvector width {} exceeds the {} bits of the weight type",
			solver_vars.len(),
			W::BITS
		);
		self.new_bitvector_inner(solver_vars.len() as u32, |i| Some(solver_vars[i]))
	}

	/// Allocate a bitvector of `width` bits, resolving the backing solver
	/// variable of each bit through `solver_var`.
	fn new_bitvector_inner(
		&mut self,
		width: u32,
		solver_var: impl Fn(usize) -> Option<SolverVar>,
	) -> BvId {
		let bv = self.state.bitvectors.push(BitVec::new());
		self.state.touched.grow_to(bv);
		for i in 0..width as usize {
			let var = self.new_var(solver_var(i), VarOwner::Bit(bv));
			self.state.bitvectors[bv].bits.push(Lit::from(var));
		}
		self.state.requires_propagation = true;
		debug!(bv = usize::from(bv), width, "new bitvector");
		bv
	}

	/// Allocate a theory variable backed by the given solver variable, or by a
	/// fresh one.
	pub(crate) fn new_var(&mut self, solver_var: Option<SolverVar>, owner: VarOwner) -> Var {
		let solver_var = solver_var.unwrap_or_else(|| self.oracle.new_var());
		let var = self.state.vars.push(VarData { solver_var, owner });
		let registered = self.state.trail.register_var();
		debug_assert_eq!(var, registered);
		self.oracle.attach_theory_var(solver_var, var);
		var
	}

	/// Record the assignment of a theory literal reported by the boolean
	/// engine.
	///
	/// Decision level boundaries are synchronized with the level at which the
	/// solver made the assignment; duplicate notifications are ignored.
	pub fn on_assignment(&mut self, lit: Lit) {
		let var = lit.var();
		let level = self.oracle.level(self.state.vars[var].solver_var);
		while level > self.state.trail.decision_level() {
			self.state.trail.push_level();
		}
		if self.state.trail.value_var(var).is_some() {
			return;
		}
		let (kind, bv) = match self.state.vars[var].owner {
			VarOwner::Bit(bv) => (EntryKind::Bit, bv),
			VarOwner::Comparison(cid) => (EntryKind::Comparison, self.state.comparisons[cid].bv),
		};
		trace!(lit = i32::from(lit), bv = usize::from(bv), "theory assignment");
		self.state.trail.assign(TrailEntry {
			kind,
			bv,
			var,
			value: !lit.is_negated(),
		});
		self.state.requires_propagation = true;
	}

	/// Assign a literal through the boolean engine and record it on the trail.
	///
	/// Returns `false` if the assignment conflicts inside the boolean engine.
	pub fn enqueue(&mut self, lit: Lit, tag: ReasonTag) -> bool {
		debug_assert!(self.value(lit).is_none());
		if self.oracle.enqueue(self.solver_lit(lit), tag) {
			self.on_assignment(lit);
			true
		} else {
			false
		}
	}

	/// Open a new decision level.
	pub fn new_decision_level(&mut self) {
		trace!("new decision level");
		self.state.trail.push_level();
	}

	/// Undo all assignments above the given decision level, notifying the
	/// owning subtheory of every touched bitvector exactly once.
	pub fn backtrack_to(&mut self, level: u32) {
		debug!(level, trail = self.state.trail.len(), "backtrack");
		let state = &mut self.state;
		if state.trail.pop_to_level(level, &mut state.touched) > 0 {
			state.requires_propagation = true;
		}
		self.notify_backtracked();
	}

	/// Undo assignments until just before the entry that assigned `lit`,
	/// leaving that assignment in place.
	///
	/// Used while constructing an explanation, so that the explanation
	/// reflects the state at which `lit` was derived.
	pub(crate) fn backtrack_until_lit(&mut self, lit: Lit) {
		debug_assert_ne!(self.value(lit), Some(false));
		if self.value(lit) != Some(true) {
			// An eagerly explained literal is not yet on the trail.
			return;
		}
		let state = &mut self.state;
		state.trail.pop_until_lit(lit, &mut state.touched);
		state.requires_propagation = true;
		self.notify_backtracked();
	}

	/// Perform a final full-consistency propagation at a solution candidate.
	pub fn solve(&mut self) -> Result<(), Conflict> {
		self.state.requires_propagation = true;
		self.propagate()
	}

	/// Cross-check the current (full) assignment against every registered
	/// comparison by re-deriving the bound from the bits alone.
	pub fn check_final_assignment(&self) -> bool {
		for (bv, bvec) in self.state.bitvectors.iter_enumerated() {
			let b = Bounds::<W>::from_bits(&bvec.bits, &self.state.trail);
			for op in CmpOp::ALL {
				for &cid in bvec.cmp.list(op) {
					let c = &self.state.comparisons[cid];
					let consistent = match (op, self.state.trail.value(c.lit)) {
						(CmpOp::Lt, Some(true)) => b.under < c.w,
						(CmpOp::Lt, Some(false)) => b.over >= c.w,
						(CmpOp::Leq, Some(true)) => b.under <= c.w,
						(CmpOp::Leq, Some(false)) => b.over > c.w,
						(CmpOp::Gt, Some(true)) => b.over > c.w,
						(CmpOp::Gt, Some(false)) => b.under <= c.w,
						(CmpOp::Geq, Some(true)) => b.over >= c.w,
						(CmpOp::Geq, Some(false)) => b.under < c.w,
						(_, None) => true,
					};
					if !consistent {
						debug!(
							bv = usize::from(bv),
							lit = i32::from(c.lit),
							"final assignment check failed"
						);
						return false;
					}
				}
			}
		}
		true
	}

	/// The current over-approximation of a bitvector.
	pub fn over(&self, bv: BvId) -> W {
		self.state.bitvectors[bv].approx.over
	}

	/// Claim a bitvector for a registered subtheory, which will receive change
	/// notifications for it.
	pub fn set_owner(&mut self, bv: BvId, subtheory: SubTheoryId) {
		assert!(
			usize::from(subtheory) < self.subtheories.len(),
			"unknown subtheory {}",
			usize::from(subtheory)
		);
		let slot = &mut self.state.bitvectors[bv].owner;
		assert!(
			slot.is_none(),
			"bitvector {} is already claimed by a subtheory",
			usize::from(bv)
		);
		*slot = Some(subtheory);
	}

	/// The solver literal backing a theory literal.
	pub fn solver_lit(&self, lit: Lit) -> SolverLit {
		SolverLit::new(self.state.vars[lit.var()].solver_var, lit.is_negated())
	}

	/// The counters collected so far.
	pub fn statistics(&self) -> &Statistics {
		&self.state.statistics
	}

	/// The current under-approximation of a bitvector.
	pub fn under(&self, bv: BvId) -> W {
		self.state.bitvectors[bv].approx.under
	}

	/// Whether the theory's assignment mirror agrees with the boolean
	/// engine's.
	pub(crate) fn dbg_synced(&self) -> bool {
		self.state.vars.iter_enumerated().all(|(var, data)| {
			let local = self.state.trail.value_var(var);
			local.is_none() || local == self.oracle.value(SolverLit::from(data.solver_var))
		})
	}

	/// The decision level at which a theory variable was assigned.
	pub(crate) fn level_of(&self, var: Var) -> u32 {
		self.oracle.level(self.state.vars[var].solver_var)
	}

	/// Queue the two implication clauses making two solver literals logically
	/// equivalent.
	pub(crate) fn make_equal_in_solver(&mut self, a: SolverLit, b: SolverLit) {
		self.oracle.add_clause_safely(&[!a, b]);
		self.oracle.add_clause_safely(&[a, !b]);
	}

	/// Invoke the owning subtheory of `bv`, if any, after its bound has been
	/// refreshed.
	pub(crate) fn notify_bits_changed(&mut self, bv: BvId) {
		let Some(owner) = self.state.bitvectors[bv].owner else {
			return;
		};
		let state = &mut self.state;
		let bvec = &state.bitvectors[bv];
		let mut ctx = SubTheoryContext {
			under: bvec.approx.under,
			over: bvec.approx.over,
			bits: &bvec.bits,
			clauses: &mut state.clauses,
		};
		self.subtheories[owner].bits_changed(bv, &mut ctx);
		self.flush_clauses();
	}

	/// Drain the batched set of backtracked bitvectors, notifying each owning
	/// subtheory once, and flush any clauses they queued.
	fn notify_backtracked(&mut self) {
		while let Some(bv) = self.state.touched.pop() {
			let Some(owner) = self.state.bitvectors[bv].owner else {
				continue;
			};
			let state = &mut self.state;
			let bvec = &state.bitvectors[bv];
			let mut ctx = SubTheoryContext {
				under: bvec.approx.under,
				over: bvec.approx.over,
				bits: &bvec.bits,
				clauses: &mut state.clauses,
			};
			self.subtheories[owner].backtracked(bv, &mut ctx);
		}
		self.flush_clauses();
	}

	/// Hand all queued subtheory clauses to the boolean engine.
	pub(crate) fn flush_clauses(&mut self) {
		while let Some(clause) = self.state.clauses.pop_front() {
			self.oracle.add_clause_safely(&clause);
		}
	}
}

impl<W: Weight, O: Oracle> Theory for BvSolver<W, O> {
	fn new_decision_level(&mut self) {
		self.new_decision_level();
	}

	fn backtrack_to(&mut self, level: u32) {
		self.backtrack_to(level);
	}

	fn propagate(&mut self) -> Result<(), Conflict> {
		self.propagate()
	}

	fn solve(&mut self) -> Result<(), Conflict> {
		self.solve()
	}

	fn build_reason(&mut self, lit: Lit, tag: ReasonTag) -> Clause<SolverLit> {
		self.build_reason(lit, tag)
	}
}
