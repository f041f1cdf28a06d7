use super::*;

/// Highest field index that is recorded verbatim; later fields collapse into
/// `ReferenceRole::FieldOmitted`.
pub const MAX_FIELD_INDEX: usize = 250;

const ARRAY_ELEMENT: u16 = 251;
const SYNTHETIC_TREE_CHILD: u16 = 252;
const FIELD_OMITTED: u16 = 253;
const SOFT_REFERENCE: u16 = 254;
const WEAK_REFERENCE: u16 = 255;

/// How the traversal first reached an object.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub enum ReferenceRole {
  /// Zero-based index of the reference field in its holder.
  Field(u16),
  ArrayElement,
  SyntheticTreeChild,
  FieldOmitted,
  SoftReference,
  WeakReference,
}

impl ReferenceRole {
  /// Role of the `index`-th outgoing reference of a holder whose first
  /// `field_count` references are its own fields and the rest synthetic
  /// tree children.
  #[must_use]
  pub fn for_slot(is_array: bool, index: usize, field_count: usize) -> Self {
    if index >= field_count {
      Self::SyntheticTreeChild
    } else if is_array {
      Self::ArrayElement
    } else if index < MAX_FIELD_INDEX {
      // Bounded by MAX_FIELD_INDEX above.
      Self::Field(index as u16)
    } else {
      Self::FieldOmitted
    }
  }

  #[must_use]
  pub fn encode(self) -> u16 {
    match self {
      Self::Field(index) => index + 1,
      Self::ArrayElement => ARRAY_ELEMENT,
      Self::SyntheticTreeChild => SYNTHETIC_TREE_CHILD,
      Self::FieldOmitted => FIELD_OMITTED,
      Self::SoftReference => SOFT_REFERENCE,
      Self::WeakReference => WEAK_REFERENCE,
    }
  }

  /// `None` for objects without a recorded role, such as roots.
  #[must_use]
  pub fn decode(value: u16) -> Option<Self> {
    match value {
      0 => None,
      ARRAY_ELEMENT => Some(Self::ArrayElement),
      SYNTHETIC_TREE_CHILD => Some(Self::SyntheticTreeChild),
      FIELD_OMITTED => Some(Self::FieldOmitted),
      SOFT_REFERENCE => Some(Self::SoftReference),
      WEAK_REFERENCE => Some(Self::WeakReference),
      index if usize::from(index) <= MAX_FIELD_INDEX => {
        Some(Self::Field(index - 1))
      }
      _ => None,
    }
  }
}

impl Display for ReferenceRole {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::Field(index) => write!(f, "field #{}", index + 1),
      Self::ArrayElement => f.write_str("array element"),
      Self::SyntheticTreeChild => f.write_str("synthetic tree child"),
      Self::FieldOmitted => f.write_str("field (index omitted)"),
      Self::SoftReference => f.write_str("soft reference"),
      Self::WeakReference => f.write_str("weak reference"),
    }
  }
}
