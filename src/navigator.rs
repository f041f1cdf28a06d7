use super::*;

/// Dense index into the heap's object table. `0` means "no object".
pub type ObjectId = u32;

/// Identity of a class in the `ClassStore`.
pub type ClassId = u32;

/// Classes whose instances only keep objects alive for cleanup and are
/// therefore visited last.
pub const CLEANUP_MARKER_CLASSES: [&str; 2] =
  ["sun.misc.Cleaner", "java.lang.ref.Finalizer"];

/// How much of an object's outgoing references `ObjectNavigator` exposes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ReferenceResolution {
  AllReferences,
  /// The soft/weak referent slot reads back as `0`.
  OnlyStrongReferences,
}

/// A GC root reported by the heap dump.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct GcRoot {
  pub id: ObjectId,
  /// Held by a stack frame or local variable.
  #[serde(default)]
  pub stack_frame: bool,
}

impl GcRoot {
  #[must_use]
  pub fn new(id: ObjectId) -> Self {
    Self {
      id,
      stack_frame: false,
    }
  }

  #[must_use]
  pub fn stack_frame(id: ObjectId) -> Self {
    Self {
      id,
      stack_frame: true,
    }
  }
}

/// Class metadata needed by the analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDefinition {
  #[serde(default)]
  pub id: ClassId,
  pub name: String,
  /// Object id of the class object itself, `0` if the dump has none.
  #[serde(default)]
  pub object_id: ObjectId,
  #[serde(default)]
  pub static_fields: Vec<ObjectId>,
  #[serde(default)]
  pub constant_fields: Vec<ObjectId>,
}

impl ClassDefinition {
  #[must_use]
  pub fn is_array(&self) -> bool {
    self.name.starts_with('[') || self.name.ends_with("[]")
  }

  /// Name used for flame graph frames.
  #[must_use]
  pub fn frame_name(&self) -> &str {
    self.name.trim_end_matches(';')
  }
}

/// Resolves class identities and enumerates the classes of a heap.
pub trait ClassStore {
  fn get(&self, id: ClassId) -> Option<&ClassDefinition>;

  fn by_name(&self, name: &str) -> Option<&ClassDefinition>;

  fn for_each_class(&self, visit: impl FnMut(&ClassDefinition));

  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Cursor over the objects of a heap dump.
///
/// `go_to` positions the cursor; the remaining accessors describe the object
/// under it. Ids outside `1..=instance_count` describe an empty object.
pub trait ObjectNavigator {
  fn instance_count(&self) -> u32;

  fn go_to(&mut self, id: ObjectId, resolution: ReferenceResolution);

  fn class(&self) -> ClassId;

  /// Size of the current object in bytes.
  fn object_size(&self) -> u32;

  /// Replace the contents of `references` with the outgoing references of
  /// the current object, `0` standing for a null slot.
  fn copy_references_to(&self, references: &mut Vec<ObjectId>);

  /// Referent of the current object if it is a soft reference.
  fn soft_reference_id(&self) -> ObjectId;

  /// Referent of the current object if it is a weak reference.
  fn weak_reference_id(&self) -> ObjectId;

  /// Index of the referent slot within `copy_references_to`'s output.
  fn soft_weak_reference_index(&self) -> usize;

  fn roots(&self) -> Box<dyn Iterator<Item = GcRoot> + '_>;

  fn class_of(&mut self, id: ObjectId) -> ClassId {
    self.go_to(id, ReferenceResolution::AllReferences);
    self.class()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn class(name: &str) -> ClassDefinition {
    ClassDefinition {
      id: 1,
      name: name.to_string(),
      object_id: 0,
      static_fields: Vec::new(),
      constant_fields: Vec::new(),
    }
  }

  #[test]
  fn detects_array_classes() {
    assert!(class("[Ljava.lang.Object;").is_array());
    assert!(class("byte[]").is_array());
    assert!(!class("java.lang.String").is_array());
  }

  #[test]
  fn frame_name_drops_trailing_semicolons() {
    assert_eq!(
      class("[Ljava.lang.Object;").frame_name(),
      "[Ljava.lang.Object"
    );
    assert_eq!(class("Node").frame_name(), "Node");
  }
}
