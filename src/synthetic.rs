use super::*;

/// Extra parent → child edges that do not come from object fields, rooted at
/// a single sentinel object.
///
/// The traversal only walks into the sentinel once the strong phases are
/// done, so anything first reached through it is reachable only from the
/// synthetic tree.
#[derive(Debug, Clone, Default)]
pub struct SyntheticTree {
  sentinel: ObjectId,
  children: IntMap<ObjectId, Vec<ObjectId>>,
  registered_children: IntSet<ObjectId>,
}

impl SyntheticTree {
  #[must_use]
  pub fn new(sentinel: ObjectId) -> Self {
    Self {
      sentinel,
      ..Self::default()
    }
  }

  pub fn add_child(&mut self, parent: ObjectId, child: ObjectId) {
    if parent == 0 || child == 0 {
      return;
    }
    self.children.entry(parent).or_default().push(child);
    self.registered_children.insert(child);
  }

  #[must_use]
  pub fn children(&self, parent: ObjectId) -> Option<&[ObjectId]> {
    self.children.get(&parent).map(Vec::as_slice)
  }

  #[must_use]
  pub fn has_children(&self, parent: ObjectId) -> bool {
    self.children.contains_key(&parent)
  }

  #[must_use]
  pub fn is_child(&self, id: ObjectId) -> bool {
    self.registered_children.contains(&id)
  }

  #[must_use]
  pub fn sentinel(&self) -> ObjectId {
    self.sentinel
  }
}

impl FromIterator<(ObjectId, ObjectId)> for SyntheticTree {
  /// Builds a tree without a sentinel from `(parent, child)` pairs.
  fn from_iter<I: IntoIterator<Item = (ObjectId, ObjectId)>>(iter: I) -> Self {
    let mut tree = Self::default();
    for (parent, child) in iter {
      tree.add_child(parent, child);
    }
    tree
  }
}
