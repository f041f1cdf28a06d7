use super::*;

/// Counters collected while walking the graph.
#[derive(Debug, Default, Clone, Serialize)]
pub struct TraversalSummary {
  pub visited_instances: u64,
  pub strong_visited: u64,
  pub non_strong_visited: u64,
  /// Strongly-reachable objects that claimed no child.
  pub leaves: u64,
  /// Non-null outgoing references of processed objects.
  pub edge_count: u64,
  pub finalizable_bytes: u64,
  pub soft_bytes: u64,
  pub weak_bytes: u64,
  /// Synthetic-tree parents processed once only the synthetic tree could
  /// still reach them.
  pub synthetic_only: Vec<ObjectId>,
  #[serde(skip)]
  pub elapsed: Duration,
  #[serde(skip)]
  pub fold_elapsed: Duration,
}

/// Result of the reachability traversal. The per-object arrays stay in the
/// `AnalysisRun`.
#[derive(Debug)]
pub struct Traversal {
  pub visited_count: usize,
  /// Ordinary and stack-frame roots, sorted; the dominator stage's entry
  /// points.
  pub roots: Vec<ObjectId>,
  pub strong_histogram: Histogram,
  pub non_strong_histogram: Histogram,
  /// Reachable instances of each nominated class, keyed by class name.
  pub nominated_instances: HashMap<String, IntSet<ObjectId>>,
  pub summary: TraversalSummary,
}

/// Multi-phase breadth-first walk over the heap.
///
/// Strong edges are walked first; stack roots, the synthetic tree, soft
/// referents, weak referents and cleanup markers each wait for their own
/// phase. Every object is claimed by exactly one parent and processed at
/// most once.
pub struct Traverser<'a> {
  run: &'a mut AnalysisRun,
}

impl<'a> Traverser<'a> {
  pub fn new(run: &'a mut AnalysisRun) -> Self {
    Self { run }
  }

  /// Walk everything reachable from the heap's roots.
  ///
  /// Object sizes are recorded unfolded; call `fold_sizes` to turn them into
  /// subtree sizes.
  ///
  /// # Errors
  ///
  /// Returns `AnalysisError::Canceled` if `progress` requests cancellation
  /// between two waves.
  pub fn traverse<N, C>(
    &mut self,
    nav: &mut N,
    classes: &C,
    progress: &mut dyn ProgressSink,
  ) -> Result<Traversal, AnalysisError>
  where
    N: ObjectNavigator,
    C: ClassStore,
  {
    let started = Instant::now();
    let options = self.run.config.traverse.clone();
    let include_synthetic = options.include_synthetic_tree_edges
      && self.run.synthetic_tree.is_some();
    let instance_count = nav.instance_count();

    let mut nominated: IntMap<ClassId, IntSet<ObjectId>> = IntMap::default();
    for name in &self.run.config.per_class.class_names {
      match classes.by_name(name) {
        Some(class) => {
          nominated.insert(class.id, IntSet::default());
        }
        None => warn!("nominated class `{name}` does not exist in this heap"),
      }
    }

    progress.set_text("Collect all object roots");

    let mut queues = PhaseQueues::default();
    let mut frontier = Vec::new();
    let mut roots = Vec::new();

    let gc_roots: Vec<GcRoot> = nav.roots().collect();
    for root in gc_roots {
      if root.stack_frame {
        if self.run.is_valid(root.id) {
          roots.push(root.id);
          queues.defer(TraversalPhase::StrongLocal, PendingEdge::Root(root.id));
        }
      } else if self.run.claim(root.id, root.id) {
        roots.push(root.id);
        frontier.push(root.id);
      }
    }

    // Class objects and everything held by their statics and constant pools.
    let run = &mut *self.run;
    classes.for_each_class(|class| {
      let held = std::iter::once(class.object_id)
        .chain(class.static_fields.iter().copied())
        .chain(class.constant_fields.iter().copied());
      for id in held {
        if run.claim(id, id) {
          roots.push(id);
          frontier.push(id);
        }
      }
    });

    let sentinel = if include_synthetic {
      self
        .run
        .synthetic_tree
        .as_ref()
        .map_or(0, SyntheticTree::sentinel)
    } else {
      0
    };
    if sentinel != 0 {
      queues.defer(TraversalPhase::SyntheticTree, PendingEdge::Revisit(sentinel));
    }

    let cleanup_classes: Vec<ClassId> = CLEANUP_MARKER_CLASSES
      .iter()
      .filter_map(|name| classes.by_name(name))
      .map(|class| class.id)
      .collect();

    progress.set_text("Traversing instance graph");

    let mut strong_histogram = HistogramBuilder::new();
    let mut non_strong_histogram = HistogramBuilder::new();
    let mut summary = TraversalSummary::default();
    let mut visited_count = 0;
    let mut references = Vec::new();
    let mut next = Vec::new();
    let mut phase = TraversalPhase::StrongNonLocal;

    loop {
      while frontier.is_empty() && phase != TraversalPhase::Finished {
        let (entered, edges) = queues.advance(phase);
        phase = entered;
        for edge in edges {
          self.apply(edge, &mut frontier, &mut roots);
        }
      }

      if frontier.is_empty() {
        break;
      }

      for &id in &frontier {
        // The sentinel was claimed through an ordinary field; its subtree
        // waits for the synthetic tree phase.
        if id == sentinel && phase < TraversalPhase::SyntheticTree {
          continue;
        }

        nav.go_to(id, ReferenceResolution::AllReferences);
        let class = nav.class();

        if phase < TraversalPhase::CleanupReferences
          && cleanup_classes.contains(&class)
        {
          if !options.only_strong_references {
            queues.defer(
              TraversalPhase::CleanupReferences,
              PendingEdge::Revisit(id),
            );
          }
          continue;
        }

        summary.visited_instances += 1;
        if let Some(instances) = nominated.get_mut(&class) {
          instances.insert(id);
        }

        nav.copy_references_to(&mut references);
        for reference in &mut references {
          if !self.run.is_valid(*reference) {
            *reference = 0;
          }
        }

        let referent_slot = nav.soft_weak_reference_index();
        let referents = [
          (
            TraversalPhase::Soft,
            nav.soft_reference_id(),
            ReferenceRole::SoftReference,
          ),
          (
            TraversalPhase::Weak,
            nav.weak_reference_id(),
            ReferenceRole::WeakReference,
          ),
        ];
        for (eligible, referent, role) in referents {
          if referent == 0 || phase >= eligible {
            continue;
          }
          if !options.only_strong_references && self.run.is_valid(referent) {
            queues.defer(
              eligible,
              PendingEdge::Referent {
                referent,
                holder: id,
                role,
              },
            );
          }
          if let Some(reference) = references.get_mut(referent_slot) {
            *reference = 0;
          }
        }

        let size = nav.object_size();
        let field_count = references.len();

        if include_synthetic {
          let children = self
            .run
            .synthetic_tree
            .as_ref()
            .and_then(|tree| tree.children(id));
          if let Some(children) = children {
            if phase >= TraversalPhase::SyntheticTree {
              summary.synthetic_only.push(id);
            }
            references.extend_from_slice(children);
          }
        }

        let is_array = classes.get(class).is_some_and(ClassDefinition::is_array);
        let mut is_leaf = true;
        for (index, &reference) in references.iter().enumerate() {
          if reference == 0 {
            continue;
          }
          summary.edge_count += 1;
          if self.run.claim(reference, id) {
            next.push(reference);
            if options.include_field_information {
              let role = ReferenceRole::for_slot(is_array, index, field_count);
              self.run.roles.set(reference as usize, role.encode());
            }
            is_leaf = false;
          }
        }

        // Parents always precede their children in visit order.
        self.run.visited.set(visited_count, id);
        visited_count += 1;
        self.run.sizes.set(id as usize, size_in_units(size));

        if phase.is_strong() {
          strong_histogram.add_instance(class, size);
          summary.strong_visited += 1;
          if is_leaf {
            summary.leaves += 1;
          }
        } else {
          non_strong_histogram.add_instance(class, size);
          summary.non_strong_visited += 1;
          let bytes = u64::from(size);
          match phase {
            TraversalPhase::Soft => summary.soft_bytes += bytes,
            TraversalPhase::Weak => summary.weak_bytes += bytes,
            TraversalPhase::CleanupReferences => {
              summary.finalizable_bytes += bytes;
            }
            _ => {}
          }
        }
      }

      progress.set_fraction(
        summary.visited_instances as f64 / f64::from(instance_count.max(1)),
      );
      if progress.is_canceled() {
        return Err(AnalysisError::Canceled);
      }

      frontier.clear();
      std::mem::swap(&mut frontier, &mut next);
    }

    debug_assert!(queues.is_empty(), "postponed edges left unvisited");

    roots.sort_unstable();
    roots.dedup();
    summary.elapsed = started.elapsed();

    info!(
      "traversal visited {} instances ({} strong, {} edges) in {:?}",
      summary.visited_instances,
      summary.strong_visited,
      summary.edge_count,
      summary.elapsed
    );

    let nominated_instances = nominated
      .into_iter()
      .filter_map(|(class, instances)| {
        classes.get(class).map(|class| (class.name.clone(), instances))
      })
      .collect();

    Ok(Traversal {
      visited_count,
      roots,
      strong_histogram: strong_histogram.finish(classes),
      non_strong_histogram: non_strong_histogram.finish(classes),
      nominated_instances,
      summary,
    })
  }

  fn apply(
    &mut self,
    edge: PendingEdge,
    frontier: &mut Vec<ObjectId>,
    roots: &mut Vec<ObjectId>,
  ) {
    match edge {
      PendingEdge::Root(id) => {
        if self.run.claim(id, id) {
          frontier.push(id);
        }
      }
      PendingEdge::Referent {
        referent,
        holder,
        role,
      } => {
        if self.run.claim(referent, holder) {
          frontier.push(referent);
          if self.run.config.traverse.include_field_information {
            self.run.roles.set(referent as usize, role.encode());
          }
        }
      }
      PendingEdge::Revisit(id) => {
        if !self.run.is_valid(id) {
          return;
        }
        if self.run.claim(id, id) {
          roots.push(id);
        }
        frontier.push(id);
      }
    }
  }

  /// Fold every object's size into its parent, turning own sizes into
  /// spanning-tree subtree sizes.
  ///
  /// Walks the visit order backwards: children come after their parent, so
  /// each child is complete before it is added upward.
  pub fn fold_sizes(&mut self, traversal: &mut Traversal) {
    let started = Instant::now();
    for index in (0..traversal.visited_count).rev() {
      let id = self.run.visited.get(index);
      let parent = self.run.parents.get(id as usize);
      if parent != id && parent != 0 {
        let folded = self
          .run
          .sizes
          .get(parent as usize)
          .saturating_add(self.run.sizes.get(id as usize));
        self.run.sizes.set(parent as usize, folded);
      }
    }
    traversal.summary.fold_elapsed = started.elapsed();
  }

  /// Text for the heap summary section.
  pub fn summary_text<N, C>(
    &self,
    traversal: &Traversal,
    nav: &mut N,
    classes: &C,
  ) -> String
  where
    N: ObjectNavigator,
    C: ClassStore,
  {
    let summary = &traversal.summary;
    let mut text = String::new();

    if self.run.config.meta_info.include {
      let _ = writeln!(
        text,
        "Analysis completed! Visited instances: {}, time: {:?}",
        summary.visited_instances, summary.elapsed
      );
      let _ = writeln!(text, "Update sizes time: {:?}", summary.fold_elapsed);
      let _ = writeln!(text, "Leaves found: {}", summary.leaves);
    }

    let _ = writeln!(text, "Class count: {}", classes.len());
    let _ = writeln!(
      text,
      "Finalizable size: {}",
      to_short_string_as_size(summary.finalizable_bytes)
    );
    let _ = writeln!(
      text,
      "Soft-reachable size: {}",
      to_short_string_as_size(summary.soft_bytes)
    );
    let _ = writeln!(
      text,
      "Weak-reachable size: {}",
      to_short_string_as_size(summary.weak_bytes)
    );
    let _ = writeln!(
      text,
      "Reachable only from synthetic tree: {}",
      summary.synthetic_only.len()
    );

    // Only list the topmost objects; their synthetic children are implied.
    let mut nested = IntSet::default();
    if let Some(tree) = self.run.synthetic_tree() {
      for &id in &summary.synthetic_only {
        if let Some(children) = tree.children(id) {
          nested.extend(children.iter().copied());
        }
      }
    }

    let mut buffer = TruncatingPrintBuffer::new(10);
    for &id in &summary.synthetic_only {
      if nested.contains(&id) {
        continue;
      }
      let class = nav.class_of(id);
      let name = classes
        .get(class)
        .map_or("<unknown>", |class| class.name.as_str());
      buffer.println(format_args!(
        " * {name} ({})",
        to_short_string_as_size(u64::from(self.run.size_units(id)) * 4)
      ));
    }
    text.push_str(&buffer.finish());
    text
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  fn traverse(
    graph: &mut HeapGraph,
    config: AnalysisConfig,
  ) -> (AnalysisRun, Traversal) {
    let mut run =
      AnalysisRun::new(config, graph.instance_count(), &MemoryListProvider)
        .expect("run");
    if let Some(tree) = graph.synthetic_tree().cloned() {
      run = run.with_synthetic_tree(tree);
    }
    let classes = graph.clone();
    let traversal = Traverser::new(&mut run)
      .traverse(graph, &classes, &mut NoProgress)
      .expect("traversal");
    (run, traversal)
  }

  fn visit_order(run: &AnalysisRun, traversal: &Traversal) -> Vec<ObjectId> {
    (0..traversal.visited_count)
      .map(|index| run.visited_at(index))
      .collect()
  }

  fn position(order: &[ObjectId], id: ObjectId) -> usize {
    order
      .iter()
      .position(|&visited| visited == id)
      .unwrap_or_else(|| panic!("{id} was not visited"))
  }

  #[test]
  fn folds_subtree_sizes_into_the_root() {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let a = builder.object(node, 8);
    let b = builder.object(node, 16);
    let c = builder.object(node, 24);
    let d = builder.object(node, 32);
    builder.reference(a, b).reference(b, c).reference(a, d).root(a);
    let mut graph = builder.finish().expect("graph");

    let (mut run, mut traversal) =
      traverse(&mut graph, AnalysisConfig::default());
    assert_eq!(visit_order(&run, &traversal), vec![a, b, d, c]);
    assert_eq!(run.size_units(a), 2);

    Traverser::new(&mut run).fold_sizes(&mut traversal);
    assert_eq!(run.size_units(a), 20);
    assert_eq!(run.size_units(b), 10);
    assert_eq!(run.size_units(c), 6);
    assert_eq!(run.size_units(d), 8);
    assert_eq!(run.parent(c), Some(b));
    assert_eq!(run.parent(a), Some(a));
    assert_eq!(run.role(b), Some(ReferenceRole::Field(0)));
    assert_eq!(run.role(d), Some(ReferenceRole::Field(1)));
    assert_eq!(traversal.summary.leaves, 2);
    assert_eq!(traversal.summary.edge_count, 3);
  }

  #[test]
  fn soft_referent_is_deferred_and_counted_as_non_strong() {
    let mut builder = HeapGraph::builder();
    let holder_class = builder.class("java.lang.ref.SoftReference");
    let node = builder.class("Node");
    let cached = builder.class("Cached");
    let holder = builder.object(holder_class, 24);
    let plain = builder.object(node, 16);
    let tail = builder.object(node, 16);
    let referent = builder.object(cached, 40);
    builder
      .reference(holder, plain)
      .referent(holder, referent, ReferentStrength::Soft)
      .reference(plain, tail)
      .root(holder);
    let mut graph = builder.finish().expect("graph");

    let (run, traversal) = traverse(&mut graph, AnalysisConfig::default());
    let order = visit_order(&run, &traversal);

    assert_eq!(order.last(), Some(&referent));
    assert!(position(&order, tail) < position(&order, referent));
    assert_eq!(run.parent(referent), Some(holder));
    assert_eq!(run.role(referent), Some(ReferenceRole::SoftReference));
    assert!(traversal.strong_histogram.entry("Cached").is_none());
    assert_eq!(
      traversal
        .non_strong_histogram
        .entry("Cached")
        .map(|entry| entry.instances),
      Some(1)
    );
    assert_eq!(traversal.summary.soft_bytes, 40);
  }

  #[test]
  fn weak_referents_come_after_soft_referents() {
    let mut builder = HeapGraph::builder();
    let soft_class = builder.class("java.lang.ref.SoftReference");
    let weak_class = builder.class("java.lang.ref.WeakReference");
    let node = builder.class("Node");
    let weak_holder = builder.object(weak_class, 24);
    let soft_holder = builder.object(soft_class, 24);
    let weakly = builder.object(node, 8);
    let softly = builder.object(node, 8);
    builder
      .referent(weak_holder, weakly, ReferentStrength::Weak)
      .referent(soft_holder, softly, ReferentStrength::Soft)
      .root(weak_holder)
      .root(soft_holder);
    let mut graph = builder.finish().expect("graph");

    let (run, traversal) = traverse(&mut graph, AnalysisConfig::default());
    let order = visit_order(&run, &traversal);

    assert_eq!(order, vec![weak_holder, soft_holder, softly, weakly]);
    assert_eq!(run.role(weakly), Some(ReferenceRole::WeakReference));
    assert_eq!(traversal.summary.weak_bytes, 8);
  }

  #[test]
  fn only_strong_references_drops_referents_and_cleanup_markers() {
    let mut builder = HeapGraph::builder();
    let soft_class = builder.class("java.lang.ref.SoftReference");
    let finalizer = builder.class("java.lang.ref.Finalizer");
    let node = builder.class("Node");
    let holder = builder.object(soft_class, 24);
    let referent = builder.object(node, 8);
    let marker = builder.object(finalizer, 16);
    let finalizable = builder.object(node, 8);
    builder
      .referent(holder, referent, ReferentStrength::Soft)
      .reference(holder, marker)
      .reference(marker, finalizable)
      .root(holder);
    let mut graph = builder.finish().expect("graph");

    let config = AnalysisConfig::builder().only_strong_references(true).finish();
    let (run, traversal) = traverse(&mut graph, config);

    assert_eq!(visit_order(&run, &traversal), vec![holder]);
    assert_eq!(run.parent(referent), None);
    assert_eq!(traversal.non_strong_histogram.instance_count(), 0);
  }

  #[test]
  fn cleanup_markers_are_visited_last() {
    let mut builder = HeapGraph::builder();
    let finalizer = builder.class("java.lang.ref.Finalizer");
    let node = builder.class("Node");
    let root = builder.object(node, 8);
    let marker = builder.object(finalizer, 16);
    let finalizable = builder.object(node, 20);
    let weak_class = builder.class("java.lang.ref.WeakReference");
    let weak_holder = builder.object(weak_class, 24);
    let weakly = builder.object(node, 4);
    builder
      .reference(root, marker)
      .reference(marker, finalizable)
      .reference(root, weak_holder)
      .referent(weak_holder, weakly, ReferentStrength::Weak)
      .root(root);
    let mut graph = builder.finish().expect("graph");

    let (run, traversal) = traverse(&mut graph, AnalysisConfig::default());
    let order = visit_order(&run, &traversal);

    assert_eq!(order, vec![root, weak_holder, weakly, marker, finalizable]);
    assert_eq!(run.parent(marker), Some(root));
    assert_eq!(traversal.summary.finalizable_bytes, 36);
    assert_eq!(
      traversal
        .non_strong_histogram
        .entry("java.lang.ref.Finalizer")
        .map(|entry| entry.instances),
      Some(1)
    );
  }

  #[test]
  fn stack_roots_wait_for_the_local_phase() {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let global = builder.object(node, 8);
    let shared = builder.object(node, 8);
    let local = builder.object(node, 8);
    builder
      .reference(global, shared)
      .reference(local, shared)
      .stack_root(local)
      .root(global);
    let mut graph = builder.finish().expect("graph");

    let (run, traversal) = traverse(&mut graph, AnalysisConfig::default());

    assert_eq!(visit_order(&run, &traversal), vec![global, shared, local]);
    assert_eq!(run.parent(shared), Some(global));
    assert_eq!(run.parent(local), Some(local));
    assert_eq!(traversal.roots, vec![global, local]);
  }

  #[test]
  fn synthetic_children_are_reached_in_their_own_phase() {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let tree_class = builder.class("ObjectTree");
    let root = builder.object(node, 8);
    let sentinel = builder.object(tree_class, 16);
    let owner = builder.object(node, 8);
    let child = builder.object(node, 8);
    let other = builder.object(node, 8);
    builder
      .reference(root, sentinel)
      .reference(root, other)
      .root(root)
      .synthetic_sentinel(sentinel)
      .synthetic_child(sentinel, owner)
      .synthetic_child(owner, child);
    let mut graph = builder.finish().expect("graph");

    let (run, traversal) = traverse(&mut graph, AnalysisConfig::default());
    let order = visit_order(&run, &traversal);

    assert_eq!(order, vec![root, other, sentinel, owner, child]);
    assert_eq!(run.parent(sentinel), Some(root));
    assert_eq!(run.role(child), Some(ReferenceRole::SyntheticTreeChild));
    assert_eq!(traversal.summary.synthetic_only, vec![sentinel, owner]);
    assert!(traversal.strong_histogram.entry("ObjectTree").is_some());
  }

  #[test]
  fn synthetic_edges_can_be_disabled() {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let root = builder.object(node, 8);
    let orphan = builder.object(node, 8);
    builder
      .root(root)
      .synthetic_sentinel(root)
      .synthetic_child(root, orphan);
    let mut graph = builder.finish().expect("graph");

    let config = AnalysisConfig::builder()
      .include_synthetic_tree_edges(false)
      .finish();
    let (run, traversal) = traverse(&mut graph, config);

    assert_eq!(visit_order(&run, &traversal), vec![root]);
    assert_eq!(run.parent(orphan), None);
  }

  #[test]
  fn malformed_references_are_treated_as_null() {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let root = builder.object(node, 8);
    let child = builder.object(node, 8);
    builder
      .reference(root, 999)
      .reference(root, child)
      .root(root)
      .root(1234);
    let mut graph = builder.finish().expect("graph");

    let (run, traversal) = traverse(&mut graph, AnalysisConfig::default());

    assert_eq!(visit_order(&run, &traversal), vec![root, child]);
    assert_eq!(run.role(child), Some(ReferenceRole::Field(1)));
    assert_eq!(traversal.summary.edge_count, 1);
    assert_eq!(traversal.roots, vec![root]);
  }

  #[test]
  fn statics_and_class_objects_are_roots() {
    let mut builder = HeapGraph::builder();
    let holder = builder.class("Holder");
    let node = builder.class("Node");
    let held = builder.object(node, 8);
    let unrelated = builder.object(node, 8);
    builder.static_field(holder, held);
    let mut data_graph = builder.finish().expect("graph");

    let (run, traversal) = traverse(&mut data_graph, AnalysisConfig::default());

    assert_eq!(visit_order(&run, &traversal), vec![held]);
    assert_eq!(run.parent(unrelated), None);
  }

  #[test]
  fn collects_nominated_instances() {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let leak = builder.class("Leak");
    let root = builder.object(node, 8);
    let first = builder.object(leak, 8);
    let second = builder.object(leak, 8);
    let _unreachable = builder.object(leak, 8);
    builder.reference(root, first).reference(root, second).root(root);
    let mut graph = builder.finish().expect("graph");

    let config = AnalysisConfig::builder()
      .nominate_class("Leak")
      .nominate_class("Missing")
      .finish();
    let (_, traversal) = traverse(&mut graph, config);

    let instances = &traversal.nominated_instances["Leak"];
    assert_eq!(instances.len(), 2);
    assert!(instances.contains(&first) && instances.contains(&second));
    assert!(!traversal.nominated_instances.contains_key("Missing"));
  }

  #[test]
  fn cancellation_stops_between_waves() {
    struct CancelImmediately;
    impl ProgressSink for CancelImmediately {
      fn set_fraction(&mut self, _fraction: f64) {}
      fn is_canceled(&self) -> bool {
        true
      }
    }

    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let root = builder.object(node, 8);
    builder.root(root);
    let mut graph = builder.finish().expect("graph");
    let classes = graph.clone();

    let mut run =
      AnalysisRun::new(AnalysisConfig::default(), 1, &MemoryListProvider)
        .expect("run");
    let result = Traverser::new(&mut run).traverse(
      &mut graph,
      &classes,
      &mut CancelImmediately,
    );
    assert!(matches!(result, Err(AnalysisError::Canceled)));
  }

  #[test]
  fn summary_lists_topmost_synthetic_only_objects() {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let tree_class = builder.class("ObjectTree");
    let sentinel = builder.object(tree_class, 16);
    let owner = builder.object(node, 8);
    let child = builder.object(node, 8);
    builder
      .synthetic_sentinel(sentinel)
      .synthetic_child(sentinel, owner)
      .synthetic_child(owner, child);
    let mut graph = builder.finish().expect("graph");
    let classes = graph.clone();

    let (mut run, mut traversal) =
      traverse(&mut graph, AnalysisConfig::default());
    let mut traverser = Traverser::new(&mut run);
    traverser.fold_sizes(&mut traversal);
    let text = traverser.summary_text(&traversal, &mut graph, &classes);

    assert!(text.contains("Reachable only from synthetic tree: 2"));
    assert!(text.contains(" * ObjectTree (32b)"));
    assert!(!text.contains(" * Node"));
  }

  fn random_graph(
    sizes: Vec<u32>,
    edges: Vec<(usize, usize)>,
    roots: Vec<usize>,
  ) -> HeapGraph {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let ids: Vec<ObjectId> =
      sizes.iter().map(|&size| builder.object(node, size)).collect();
    for (from, to) in edges {
      builder.reference(ids[from % ids.len()], ids[to % ids.len()]);
    }
    for root in roots {
      builder.root(ids[root % ids.len()]);
    }
    builder.finish().expect("graph")
  }

  proptest! {
    #[test]
    fn spanning_tree_invariants(
      sizes in prop::collection::vec(0u32..64, 1..40),
      edges in prop::collection::vec((0usize..40, 0usize..40), 0..120),
      roots in prop::collection::vec(0usize..40, 1..4),
    ) {
      let mut graph = random_graph(sizes, edges, roots);
      let (mut run, mut traversal) =
        traverse(&mut graph, AnalysisConfig::default());
      let order = visit_order(&run, &traversal);

      // Each object is visited at most once.
      let unique: IntSet<ObjectId> = order.iter().copied().collect();
      prop_assert_eq!(unique.len(), order.len());

      // Parents come first.
      for (index, &id) in order.iter().enumerate() {
        let parent = run.parent(id).expect("visited objects have parents");
        if parent != id {
          prop_assert!(position(&order, parent) < index);
        }
      }

      // Folded root sizes equal the own sizes of their spanning tree.
      let own: Vec<u32> = order.iter().map(|&id| run.size_units(id)).collect();
      let mut expected: IntMap<ObjectId, u64> = IntMap::default();
      for (&id, &units) in order.iter().zip(&own) {
        let mut top = id;
        while let Some(parent) = run.parent(top).filter(|&parent| parent != top) {
          top = parent;
        }
        *expected.entry(top).or_default() += u64::from(units);
      }
      Traverser::new(&mut run).fold_sizes(&mut traversal);
      for (root, total) in expected {
        prop_assert_eq!(u64::from(run.size_units(root)), total);
      }
    }
  }
}
