use {
  clap::Parser,
  env_logger::Env,
  heapscope::{
    AnalysisConfig, AnalysisError, AnalyzeGraph, CancelFlag, DominatorOutcome,
    HeapGraph, ListProvider, LogProgress, MemoryListProvider, MmapListProvider,
    ObjectNavigator,
  },
  log::{error, info},
  std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
  },
};

/// Reachability and dominator analysis of a heap graph snapshot.
#[derive(Parser, Debug)]
#[command(name = "heapscope", version, about)]
struct Arguments {
  /// Heap graph in JSON form
  graph: PathBuf,

  /// Analysis options in JSON form; flags below override it
  #[arg(long)]
  config: Option<PathBuf>,

  /// Ignore soft, weak and cleanup references
  #[arg(long)]
  only_strong: bool,

  /// Ignore the graph's synthetic tree
  #[arg(long)]
  no_synthetic_tree: bool,

  /// Skip the dominator tree and its flame graph
  #[arg(long)]
  no_dominators: bool,

  /// Report reachable instances of this class (repeatable)
  #[arg(long = "nominate", value_name = "CLASS")]
  nominated: Vec<String>,

  /// Smallest retained size, in bytes, shown in the flame graph
  #[arg(long, value_name = "BYTES")]
  min_node_size: Option<u64>,

  /// Maximum flame graph depth
  #[arg(long)]
  max_depth: Option<usize>,

  /// Maximum number of flame graph lines
  #[arg(long)]
  line_limit: Option<usize>,

  /// Cap on dominator fixpoint iterations
  #[arg(long)]
  max_iterations: Option<usize>,

  /// Scratch bytes that must stay free after the dominator stage
  #[arg(long, value_name = "BYTES")]
  disk_space_threshold: Option<u64>,

  /// Keep the analysis lists in memory-mapped files under this directory
  #[arg(long, value_name = "DIR")]
  mmap_dir: Option<PathBuf>,

  /// Print the report as JSON
  #[arg(long)]
  json: bool,

  /// Also write the flame graph to this file
  #[arg(long, value_name = "FILE")]
  flame_graph: Option<PathBuf>,
}

impl Arguments {
  fn config(&self) -> Result<AnalysisConfig, AnalysisError> {
    let mut config = match &self.config {
      Some(path) => AnalysisConfig::load(path)?,
      None => AnalysisConfig::default(),
    };

    if self.only_strong {
      config.traverse.only_strong_references = true;
    }
    if self.no_synthetic_tree {
      config.traverse.include_synthetic_tree_edges = false;
    }
    if self.no_dominators {
      config.dominator.include_dominator_tree = false;
    }
    config
      .per_class
      .class_names
      .extend(self.nominated.iter().cloned());

    let dominator = &mut config.dominator;
    if let Some(bytes) = self.min_node_size {
      dominator.min_node_size = bytes;
    }
    if let Some(depth) = self.max_depth {
      dominator.max_depth = depth;
    }
    if let Some(lines) = self.line_limit {
      dominator.head_limit = lines;
    }
    if let Some(iterations) = self.max_iterations {
      dominator.max_dominator_iterations = iterations;
    }
    if let Some(bytes) = self.disk_space_threshold {
      dominator.disk_space_threshold = bytes;
    }

    Ok(config)
  }
}

fn main() -> ExitCode {
  env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

  match run(&Arguments::parse()) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      error!("{}", err.describe());
      ExitCode::FAILURE
    }
  }
}

fn run(arguments: &Arguments) -> Result<(), AnalysisError> {
  let config = arguments.config()?;
  let mut graph = HeapGraph::load(&arguments.graph)?;
  let classes = graph.class_table();
  let synthetic_tree = graph.take_synthetic_tree();
  info!(
    "loaded {} objects from {}",
    graph.instance_count(),
    arguments.graph.display()
  );

  let provider: Box<dyn ListProvider> = match &arguments.mmap_dir {
    Some(dir) => Box::new(MmapListProvider::in_dir(dir)?),
    None => Box::new(MemoryListProvider),
  };

  let mut analyzer =
    AnalyzeGraph::new(&mut graph, &*classes, provider.as_ref(), config);
  if let Some(tree) = synthetic_tree {
    analyzer = analyzer.with_synthetic_tree(tree);
  }
  let analysis = analyzer.analyze(&mut LogProgress::new(CancelFlag::new()))?;

  if let (Some(path), DominatorOutcome::Computed(tree)) =
    (&arguments.flame_graph, &analysis.dominators)
  {
    fs::write(path, tree.flame_graph())?;
    info!("flame graph written to {}", path.display());
  }

  let stdout = io::stdout();
  let mut out = stdout.lock();
  if arguments.json {
    analysis.report.export_json(&mut out)?;
    writeln!(out)?;
  } else {
    out.write_all(analysis.report.to_text().as_bytes())?;
  }
  out.flush()?;
  Ok(())
}
