use super::*;

/// Errors surfaced by an analysis run.
///
/// Malformed references never show up here: they are treated as null and
/// only reflected in lower reachable counts.
#[derive(Debug, Error)]
pub enum AnalysisError {
  #[error("analysis was canceled")]
  Canceled,
  #[error("list `{list}` exceeded its capacity of {capacity} entries")]
  CapacityExceeded { list: &'static str, capacity: usize },
  #[error("invalid heap graph: {0}")]
  InvalidGraph(String),
  #[error("i/o error: {0}")]
  Io(#[from] io::Error),
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("unknown class `{0}`")]
  UnknownClass(String),
}

impl AnalysisError {
  /// Render the error and every underlying cause, one per line.
  #[must_use]
  pub fn describe(&self) -> String {
    let mut text = self.to_string();
    let mut source = std::error::Error::source(self);
    while let Some(cause) = source {
      let _ = write!(text, "\n  caused by: {cause}");
      source = cause.source();
    }
    text
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn describe_includes_source_chain() {
    let inner = io::Error::other("disk gone");
    let err = AnalysisError::from(inner);
    let text = err.describe();
    assert!(text.starts_with("i/o error: disk gone"));
  }

  #[test]
  fn capacity_error_names_the_list() {
    let err = AnalysisError::CapacityExceeded {
      list: "childStack",
      capacity: 4,
    };
    assert_eq!(
      err.to_string(),
      "list `childStack` exceeded its capacity of 4 entries"
    );
  }
}
