use super::*;

/// Reason given when the dominator stage would not fit its scratch budget.
pub const LOW_DISK_SPACE: &str = "Omitted due to low disk space";

/// Everything one analysis run produced.
#[derive(Debug)]
pub struct Analysis {
  pub traversal: Traversal,
  pub dominators: DominatorOutcome,
  pub report: AnalysisReport,
  run: AnalysisRun,
}

impl Analysis {
  /// Per-object parents, folded subtree sizes and roles.
  #[must_use]
  pub fn run(&self) -> &AnalysisRun {
    &self.run
  }
}

/// Runs the whole pipeline over one heap: traversal, dominators (on own
/// sizes), the subtree-size fold and the text report.
pub struct AnalyzeGraph<'a, N, C> {
  nav: &'a mut N,
  classes: &'a C,
  provider: &'a dyn ListProvider,
  config: AnalysisConfig,
  synthetic_tree: Option<SyntheticTree>,
}

impl<'a, N: ObjectNavigator, C: ClassStore> AnalyzeGraph<'a, N, C> {
  pub fn new(
    nav: &'a mut N,
    classes: &'a C,
    provider: &'a dyn ListProvider,
    config: AnalysisConfig,
  ) -> Self {
    Self {
      nav,
      classes,
      provider,
      config,
      synthetic_tree: None,
    }
  }

  #[must_use]
  pub fn with_synthetic_tree(mut self, tree: SyntheticTree) -> Self {
    self.synthetic_tree = Some(tree);
    self
  }

  /// # Errors
  ///
  /// Returns `AnalysisError::Canceled` if `progress` asks to stop, or an
  /// error if the run's lists cannot be created. Dominator failures do not
  /// fail the analysis; they end up in the report.
  pub fn analyze(
    self,
    progress: &mut dyn ProgressSink,
  ) -> Result<Analysis, AnalysisError> {
    let started = Instant::now();
    let Self {
      nav,
      classes,
      provider,
      config,
      synthetic_tree,
    } = self;

    let mut run = AnalysisRun::new(config, nav.instance_count(), provider)?;
    if let Some(tree) = synthetic_tree {
      run = run.with_synthetic_tree(tree);
    }

    let mut traversal = Traverser::new(&mut run).traverse(
      nav,
      classes,
      &mut PartialProgress::new(progress, 0.0, 0.5),
    )?;

    let dominators = compute_dominators(
      &run,
      &traversal,
      nav,
      classes,
      provider,
      &mut PartialProgress::new(progress, 0.5, 0.4),
    )?;

    let mut traverser = Traverser::new(&mut run);
    traverser.fold_sizes(&mut traversal);
    let summary = traverser.summary_text(&traversal, nav, classes);

    progress.set_text("Preparing report");
    let full_histogram = Histogram::create(nav, classes);
    let main_report = main_report(
      &run,
      &traversal,
      &full_histogram,
      &summary,
      &dominators,
    );

    let mut meta_info = String::new();
    if run.config.meta_info.include {
      let _ = writeln!(meta_info, "Total analysis time: {:?}", started.elapsed());
      if let Some(tree) = dominators.tree() {
        meta_info.push_str(&tree.stats().render(&run.config.dominator));
      }
    }

    let report = AnalysisReport {
      main_report,
      meta_info,
      strong_histogram: traversal.strong_histogram.clone(),
      non_strong_histogram: traversal.non_strong_histogram.clone(),
      full_histogram: Some(full_histogram),
    };
    progress.set_fraction(1.0);

    info!("analysis completed in {:?}", started.elapsed());

    Ok(Analysis {
      traversal,
      dominators,
      report,
      run,
    })
  }
}

/// Best-effort dominator stage: skipped when the scratch estimate does not
/// fit, and any error or panic becomes `DominatorOutcome::Failed`.
/// Cancellation is the only error passed through.
fn compute_dominators<N, C>(
  run: &AnalysisRun,
  traversal: &Traversal,
  nav: &mut N,
  classes: &C,
  provider: &dyn ListProvider,
  progress: &mut dyn ProgressSink,
) -> Result<DominatorOutcome, AnalysisError>
where
  N: ObjectNavigator,
  C: ClassStore,
{
  let options = &run.config.dominator;
  if !options.include_dominator_tree {
    return Ok(DominatorOutcome::Omitted(
      "Dominator tree not requested".to_string(),
    ));
  }

  let estimate = DominatorAnalyzer::estimate_scratch_bytes(
    traversal.visited_count as u64,
    traversal.summary.edge_count,
  );
  let available = match provider.available_bytes() {
    Ok(available) => available,
    Err(err) => {
      let text = err.describe();
      warn!("dominator tree failed: {text}");
      return Ok(DominatorOutcome::Failed(text));
    }
  };

  let fits = available
    .checked_sub(estimate)
    .is_some_and(|spare| spare > options.disk_space_threshold);
  if !fits {
    warn!(
      "dominator tree omitted: {available} bytes available, {estimate} estimated, {} reserved",
      options.disk_space_threshold
    );
    return Ok(DominatorOutcome::Omitted(LOW_DISK_SPACE.to_string()));
  }

  let result = panic::catch_unwind(AssertUnwindSafe(|| {
    DominatorAnalyzer::new(run, provider).compute(
      nav, classes, traversal, progress,
    )
  }));

  match result {
    Ok(Ok(tree)) => Ok(DominatorOutcome::Computed(Box::new(tree))),
    Ok(Err(AnalysisError::Canceled)) => Err(AnalysisError::Canceled),
    Ok(Err(err)) => {
      let text = err.describe();
      warn!("dominator tree failed: {text}");
      Ok(DominatorOutcome::Failed(text))
    }
    Err(payload) => {
      let text = panic_message(&*payload);
      warn!("dominator tree panicked: {text}");
      Ok(DominatorOutcome::Failed(text))
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    format!("panic: {message}")
  } else if let Some(message) = payload.downcast_ref::<String>() {
    format!("panic: {message}")
  } else {
    "panic with a non-string payload".to_string()
  }
}

fn main_report(
  run: &AnalysisRun,
  traversal: &Traversal,
  full: &Histogram,
  summary: &str,
  dominators: &DominatorOutcome,
) -> String {
  let config = run.config();
  let mut text = String::new();

  let histogram = &config.histogram;
  if histogram.include_by_count || histogram.include_by_size {
    let strong = &traversal.strong_histogram;
    let non_strong = &traversal.non_strong_histogram;
    let _ = writeln!(text, "{}", section_header("Histogram"));
    text.push_str(&Histogram::prepare_merged_report(
      full,
      "All",
      strong,
      "Strong-ref",
      histogram,
    ));
    let _ = writeln!(
      text,
      "Unreachable objects: {}  {}",
      to_padded_short_string_as_count(
        full
          .instance_count()
          .saturating_sub(strong.instance_count() + non_strong.instance_count())
      ),
      to_padded_short_string_as_size(
        full
          .bytes_count()
          .saturating_sub(strong.bytes_count() + non_strong.bytes_count())
      )
    );
  }

  if histogram.include_summary {
    let _ = writeln!(text, "{}", section_header("Heap summary"));
    text.push_str(summary);
  }

  if !config.per_class.class_names.is_empty() {
    let _ = writeln!(
      text,
      "{}",
      section_header("Instances of each nominated class")
    );
    text.push_str(&per_class_section(run, traversal, full));
  }

  if config.dominator.include_dominator_tree {
    let _ = writeln!(text, "{}", section_header("Dominator tree flame graph"));
    text.push_str(&dominators.flame_graph_section());
  }

  text
}

fn per_class_section(
  run: &AnalysisRun,
  traversal: &Traversal,
  full: &Histogram,
) -> String {
  let options = &run.config().per_class;
  let mut text = String::new();

  if options.include_class_list {
    let _ = writeln!(text, "Nominated classes:");
    for entry in options.class_names.iter().filter_map(|name| full.entry(name)) {
      let _ = writeln!(
        text,
        " --> [{}/{}] {}",
        to_short_string_as_count(entry.instances),
        to_short_string_as_size(entry.bytes),
        entry.class_name
      );
    }
    let _ = writeln!(text);
  }

  for name in &options.class_names {
    let Some(instances) = traversal.nominated_instances.get(name) else {
      continue;
    };
    let _ = writeln!(text, "CLASS: {name} ({} objects)", instances.len());

    // Largest subtrees first.
    let mut largest: Vec<ObjectId> = instances.iter().copied().collect();
    largest.sort_unstable_by(|&a, &b| {
      run.size_units(b).cmp(&run.size_units(a)).then(a.cmp(&b))
    });
    let mut buffer = TruncatingPrintBuffer::new(10);
    for id in largest {
      let role = run
        .role(id)
        .map_or_else(|| "root".to_string(), |role| role.to_string());
      buffer.println(format_args!(
        "  #{id} {} via {role}",
        to_padded_short_string_as_size(u64::from(run.size_units(id)) * 4)
      ));
    }
    text.push_str(&buffer.finish());
    let _ = writeln!(text);
  }

  text
}
