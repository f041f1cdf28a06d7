use super::*;

/// Ordered stages of the reachability traversal. Each stage unlocks one more
/// class of deferred edges.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TraversalPhase {
  StrongNonLocal,
  StrongLocal,
  SyntheticTree,
  Soft,
  Weak,
  CleanupReferences,
  Finished,
}

impl TraversalPhase {
  const COUNT: usize = 7;

  #[must_use]
  pub fn next(self) -> Self {
    match self {
      Self::StrongNonLocal => Self::StrongLocal,
      Self::StrongLocal => Self::SyntheticTree,
      Self::SyntheticTree => Self::Soft,
      Self::Soft => Self::Weak,
      Self::Weak => Self::CleanupReferences,
      Self::CleanupReferences | Self::Finished => Self::Finished,
    }
  }

  /// Objects processed in these phases count towards the strong histogram.
  #[must_use]
  pub fn is_strong(self) -> bool {
    self <= Self::SyntheticTree
  }

  fn index(self) -> usize {
    self as usize
  }
}

/// Work postponed until a later phase.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PendingEdge {
  /// Claim the object as its own parent.
  Root(ObjectId),
  /// Claim `referent` with `holder` as its parent.
  Referent {
    referent: ObjectId,
    holder: ObjectId,
    role: ReferenceRole,
  },
  /// Process an object whose visit was skipped earlier. If nothing claimed
  /// it in the meantime it becomes its own parent.
  Revisit(ObjectId),
}

/// One work queue per phase, drained when that phase begins.
#[derive(Debug, Default)]
pub struct PhaseQueues {
  queues: [Vec<PendingEdge>; TraversalPhase::COUNT],
}

impl PhaseQueues {
  /// Postpone `edge` until `phase` begins.
  pub fn defer(&mut self, phase: TraversalPhase, edge: PendingEdge) {
    self.queues[phase.index()].push(edge);
  }

  /// Leave `current` and return the next phase together with the work that
  /// becomes eligible in it.
  pub fn advance(
    &mut self,
    current: TraversalPhase,
  ) -> (TraversalPhase, Vec<PendingEdge>) {
    let next = current.next();
    (next, std::mem::take(&mut self.queues[next.index()]))
  }

  #[must_use]
  pub fn pending(&self, phase: TraversalPhase) -> &[PendingEdge] {
    &self.queues[phase.index()]
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.queues.iter().all(Vec::is_empty)
  }
}
