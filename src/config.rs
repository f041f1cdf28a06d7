use super::*;

/// Controls which edges the reachability traversal follows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraverseOptions {
  /// Drop soft, weak and cleanup-marker edges instead of deferring them.
  pub only_strong_references: bool,
  /// Fold the synthetic tree's extra edges into the traversal.
  pub include_synthetic_tree_edges: bool,
  /// Record a `ReferenceRole` for every claimed object.
  pub include_field_information: bool,
}

impl Default for TraverseOptions {
  fn default() -> Self {
    Self {
      only_strong_references: false,
      include_synthetic_tree_edges: true,
      include_field_information: true,
    }
  }
}

/// Classes whose reachable instances are collected during traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerClassOptions {
  pub class_names: Vec<String>,
  pub include_class_list: bool,
}

impl Default for PerClassOptions {
  fn default() -> Self {
    Self {
      class_names: Vec::new(),
      include_class_list: true,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistogramOptions {
  pub include_by_count: bool,
  pub include_by_size: bool,
  pub include_summary: bool,
  pub class_by_count_limit: usize,
  pub class_by_size_limit: usize,
}

impl Default for HistogramOptions {
  fn default() -> Self {
    Self {
      include_by_count: true,
      include_by_size: true,
      include_summary: true,
      class_by_count_limit: 50,
      class_by_size_limit: 30,
    }
  }
}

/// Limits for the dominator stage and its flame graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DominatorTreeOptions {
  pub include_dominator_tree: bool,
  /// Nodes retaining fewer bytes than this are left out of the flame graph.
  pub min_node_size: u64,
  /// Maximum depth of the rendered flame graph.
  pub max_depth: usize,
  /// Safety valve for the iterative dominance fixpoint.
  pub max_dominator_iterations: usize,
  /// Scratch space that must remain free after the stage's estimated usage.
  pub disk_space_threshold: u64,
  /// Maximum number of flame graph lines.
  pub head_limit: usize,
}

impl Default for DominatorTreeOptions {
  fn default() -> Self {
    Self {
      include_dominator_tree: true,
      min_node_size: 5_000_000,
      max_depth: 40,
      max_dominator_iterations: 2000,
      disk_space_threshold: 500_000_000,
      head_limit: 5000,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaInfoOptions {
  /// Include timings and dominator diagnostics in the report.
  pub include: bool,
}

impl Default for MetaInfoOptions {
  fn default() -> Self {
    Self { include: true }
  }
}

/// Every knob recognized by a single analysis run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
  pub traverse: TraverseOptions,
  pub per_class: PerClassOptions,
  pub histogram: HistogramOptions,
  pub dominator: DominatorTreeOptions,
  pub meta_info: MetaInfoOptions,
}

impl AnalysisConfig {
  #[must_use]
  pub fn builder() -> AnalysisConfigBuilder {
    AnalysisConfigBuilder::new()
  }

  /// Load a configuration from a JSON file. Missing fields keep their
  /// defaults.
  ///
  /// # Errors
  ///
  /// Returns an error if the file cannot be read or is not valid JSON.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(io::BufReader::new(file))?)
  }
}

/// Thin builder over `AnalysisConfig` for the handful of options callers
/// usually touch.
#[derive(Debug, Default)]
pub struct AnalysisConfigBuilder {
  config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
  #[must_use]
  pub fn new() -> Self {
    Self {
      config: AnalysisConfig::default(),
    }
  }

  #[must_use]
  pub fn only_strong_references(mut self, only_strong: bool) -> Self {
    self.config.traverse.only_strong_references = only_strong;
    self
  }

  #[must_use]
  pub fn include_synthetic_tree_edges(mut self, include: bool) -> Self {
    self.config.traverse.include_synthetic_tree_edges = include;
    self
  }

  #[must_use]
  pub fn include_field_information(mut self, include: bool) -> Self {
    self.config.traverse.include_field_information = include;
    self
  }

  #[must_use]
  pub fn nominate_class(mut self, name: impl Into<String>) -> Self {
    self.config.per_class.class_names.push(name.into());
    self
  }

  #[must_use]
  pub fn include_dominator_tree(mut self, include: bool) -> Self {
    self.config.dominator.include_dominator_tree = include;
    self
  }

  #[must_use]
  pub fn min_retained_node_size(mut self, bytes: u64) -> Self {
    self.config.dominator.min_node_size = bytes;
    self
  }

  #[must_use]
  pub fn max_flame_graph_depth(mut self, depth: usize) -> Self {
    self.config.dominator.max_depth = depth;
    self
  }

  #[must_use]
  pub fn max_dominator_iterations(mut self, iterations: usize) -> Self {
    self.config.dominator.max_dominator_iterations = iterations;
    self
  }

  #[must_use]
  pub fn disk_space_threshold(mut self, bytes: u64) -> Self {
    self.config.dominator.disk_space_threshold = bytes;
    self
  }

  #[must_use]
  pub fn flame_graph_line_limit(mut self, lines: usize) -> Self {
    self.config.dominator.head_limit = lines;
    self
  }

  #[must_use]
  pub fn include_meta_info(mut self, include: bool) -> Self {
    self.config.meta_info.include = include;
    self
  }

  #[must_use]
  pub fn finish(self) -> AnalysisConfig {
    self.config
  }
}
