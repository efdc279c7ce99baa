//! Traits that mark the seams between the theory engine, the boolean search
//! engine that drives it, and the per-bitvector subtheories it notifies.

use std::{collections::VecDeque, fmt::Debug};

use crate::{
	lit::{Lit, SolverLit, SolverVar, Var},
	solver::{BvId, Conflict},
	value::Weight,
	Clause,
};

/// Type alias for a boxed [`SubTheory`] trait object.
pub type BoxedSubTheory<W> = Box<dyn SubTheory<W>>;

/// The interface the boolean search engine offers to the theory.
///
/// The engine allocates its variables through this trait, mirrors the current
/// assignment, pushes propagated literals back, and communicates clauses. All
/// literals crossing this boundary are in the solver's variable space.
pub trait Oracle {
	/// Allocate a fresh boolean variable.
	fn new_var(&mut self) -> SolverVar;

	/// Register that `solver_var` is owned by the theory under the local
	/// variable `var`, so that assignments to it are reported back.
	fn attach_theory_var(&mut self, solver_var: SolverVar, var: Var);

	/// The current truth value of a literal, if it is assigned.
	fn value(&self, lit: SolverLit) -> Option<bool>;

	/// The decision level at which a variable was assigned.
	///
	/// Querying an unassigned variable is a caller error.
	fn level(&self, var: SolverVar) -> u32;

	/// Assign a theory-propagated literal, tagged with the reason routine that
	/// will justify it when the solver asks.
	///
	/// Returns `false` if the assignment conflicts inside the boolean engine.
	fn enqueue(&mut self, lit: SolverLit, tag: ReasonTag) -> bool;

	/// Add a clause that may be buffered by the solver until it is in a
	/// consistent state.
	fn add_clause_safely(&mut self, clause: &[SolverLit]);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Identifies the explanation routine to use when a propagated literal must
/// later be justified.
pub enum ReasonTag {
	/// The literal was forced by the owning bitvector's bound approximation.
	Comparison,
	/// The literal is a bit assignment; its justification is the literal
	/// itself.
	Bit,
}

/// The contract a theory implements towards the boolean search engine.
///
/// The solver drives the cycle decide → propagate → (conflict? explain &
/// backtrack : continue) through these methods.
pub trait Theory {
	/// Open a new decision level.
	fn new_decision_level(&mut self);

	/// Undo all assignments above the given decision level.
	fn backtrack_to(&mut self, level: u32);

	/// Bring all theory literals into agreement with the current assignment,
	/// or report a conflict clause.
	fn propagate(&mut self) -> Result<(), Conflict>;

	/// Perform a final full-consistency propagation at a solution candidate.
	fn solve(&mut self) -> Result<(), Conflict>;

	/// Construct the clause justifying a previously propagated literal.
	fn build_reason(&mut self, lit: Lit, tag: ReasonTag) -> Clause<SolverLit>;
}

/// The contract of a per-bitvector subtheory registered as the owner of one or
/// more bitvectors.
///
/// The engine calls into the subtheory; never the reverse. Subtheories read
/// the bound state offered through the [`SubTheoryContext`] and may queue
/// clauses, but cannot mutate trail or bound state.
pub trait SubTheory<W: Weight>: Debug {
	/// Called after every bound refresh of an owned bitvector during
	/// propagation. The bounds in `ctx` are up to date.
	fn bits_changed(&mut self, bv: BvId, ctx: &mut SubTheoryContext<'_, W>);

	/// Called once per backtrack operation for each owned bitvector whose bits
	/// were undone.
	fn backtracked(&mut self, bv: BvId, ctx: &mut SubTheoryContext<'_, W>);
}

#[derive(Debug)]
/// View of a single bitvector's state handed to [`SubTheory`] callbacks.
pub struct SubTheoryContext<'a, W> {
	/// The bitvector's current under-approximation.
	pub(crate) under: W,
	/// The bitvector's current over-approximation.
	pub(crate) over: W,
	/// The bit literals of the bitvector, least significant first.
	pub(crate) bits: &'a [Lit],
	/// Queue of clauses to be handed to the boolean engine once the theory is
	/// in a consistent state.
	pub(crate) clauses: &'a mut VecDeque<Clause<SolverLit>>,
}

impl<W: Weight> SubTheoryContext<'_, W> {
	/// The bitvector's current under-approximation.
	pub fn under(&self) -> W {
		self.under
	}

	/// The bitvector's current over-approximation.
	pub fn over(&self) -> W {
		self.over
	}

	/// The bit literals of the bitvector, least significant first.
	pub fn bits(&self) -> &[Lit] {
		self.bits
	}

	/// Queue a clause to be added to the boolean engine after the current
	/// theory operation completes.
	pub fn add_clause<I: IntoIterator<Item = SolverLit>>(&mut self, clause: I) {
		self.clauses.push_back(clause.into_iter().collect());
	}
}
