use super::*;

/// Every per-object array of one analysis run.
///
/// All lists are sized once from the instance count and dropped with the
/// run; nothing outlives it.
pub struct AnalysisRun {
  pub(crate) config: AnalysisConfig,
  object_count: u32,
  /// Object → the object that first claimed it. Roots are their own parent.
  pub(crate) parents: IntList,
  /// Object → size in 4-byte units; holds the folded subtree size once
  /// `Traverser::fold_sizes` has run. `0` for objects never visited.
  pub(crate) sizes: IntList,
  /// Objects in first-visit order.
  pub(crate) visited: IntList,
  pub(crate) roles: UShortList,
  pub(crate) synthetic_tree: Option<SyntheticTree>,
}

impl AnalysisRun {
  /// # Errors
  ///
  /// Returns an error if the provider cannot create the run's lists.
  pub fn new(
    config: AnalysisConfig,
    instance_count: u32,
    provider: &dyn ListProvider,
  ) -> Result<Self, AnalysisError> {
    let capacity = instance_count as usize + 2;
    Ok(Self {
      config,
      object_count: instance_count,
      parents: provider.create_int_list("parents", capacity)?,
      sizes: provider.create_int_list("sizes", capacity)?,
      visited: provider.create_int_list("visited", capacity)?,
      roles: provider.create_ushort_list("refIndex", capacity)?,
      synthetic_tree: None,
    })
  }

  #[must_use]
  pub fn with_synthetic_tree(mut self, tree: SyntheticTree) -> Self {
    self.synthetic_tree = Some(tree);
    self
  }

  #[must_use]
  pub fn config(&self) -> &AnalysisConfig {
    &self.config
  }

  #[must_use]
  pub fn object_count(&self) -> u32 {
    self.object_count
  }

  #[must_use]
  pub fn synthetic_tree(&self) -> Option<&SyntheticTree> {
    self.synthetic_tree.as_ref()
  }

  /// `true` if `id` names an object of this heap.
  #[must_use]
  pub fn is_valid(&self, id: ObjectId) -> bool {
    id != 0 && id <= self.object_count
  }

  /// `None` for objects the traversal never claimed.
  #[must_use]
  pub fn parent(&self, id: ObjectId) -> Option<ObjectId> {
    if !self.is_valid(id) {
      return None;
    }
    Some(self.parents.get(id as usize)).filter(|&parent| parent != 0)
  }

  /// Size of `id` in 4-byte units (own size, or subtree size after the
  /// fold).
  #[must_use]
  pub fn size_units(&self, id: ObjectId) -> u32 {
    if self.is_valid(id) {
      self.sizes.get(id as usize)
    } else {
      0
    }
  }

  #[must_use]
  pub fn role(&self, id: ObjectId) -> Option<ReferenceRole> {
    if !self.is_valid(id) {
      return None;
    }
    ReferenceRole::decode(self.roles.get(id as usize))
  }

  /// The `index`-th object in visit order.
  #[must_use]
  pub fn visited_at(&self, index: usize) -> ObjectId {
    self.visited.get(index)
  }

  /// Claim `id` for `parent` unless it already has one. Returns `true` if
  /// the claim succeeded.
  pub(crate) fn claim(&mut self, id: ObjectId, parent: ObjectId) -> bool {
    if !self.is_valid(id) || self.parents.get(id as usize) != 0 {
      return false;
    }
    self.parents.set(id as usize, parent);
    true
  }

  /// Whether the traversal processed `id` (it has a recorded size).
  pub(crate) fn was_visited(&self, id: ObjectId) -> bool {
    self.is_valid(id) && self.sizes.get(id as usize) != 0
  }
}

impl Debug for AnalysisRun {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.debug_struct("AnalysisRun")
      .field("object_count", &self.object_count)
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

/// Size of an object in 4-byte units, at least one so visited objects are
/// distinguishable from unvisited ones.
#[must_use]
pub fn size_in_units(bytes: u32) -> u32 {
  bytes.div_ceil(4).max(1)
}
