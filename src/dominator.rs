use super::*;

/// Marks a node whose descendants are still on the DFS stack.
const IN_PROGRESS: u32 = u32::MAX;

/// Outcome of the best-effort dominator stage.
#[derive(Debug)]
pub enum DominatorOutcome {
  Computed(Box<DominatorTree>),
  /// The stage was skipped; the string says why.
  Omitted(String),
  /// The stage failed; the string holds the error or panic text.
  Failed(String),
}

impl DominatorOutcome {
  #[must_use]
  pub fn tree(&self) -> Option<&DominatorTree> {
    match self {
      Self::Computed(tree) => Some(tree),
      _ => None,
    }
  }

  /// Flame graph section text, or the reason there is none.
  #[must_use]
  pub fn flame_graph_section(&self) -> String {
    match self {
      Self::Computed(tree) => tree.flame_graph().to_string(),
      Self::Omitted(reason) => format!("{reason}\n"),
      Self::Failed(text) => format!("Dominator tree failed: {text}\n"),
    }
  }
}

/// Diagnostics gathered while computing the dominator tree.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DominatorStats {
  pub edge_count: u64,
  pub po_edge_count: u64,
  pub root_count: usize,
  pub max_ponum: u32,
  pub max_stack_depth: usize,
  pub iterations: usize,
  /// Idoms changed by the final iteration; nonzero means the cap was hit.
  pub last_iteration_changes: u64,
  pub idom_updates: u64,
  pub intersect_calls: u64,
  pub card_count: usize,
  pub card_size: u32,
  pub update_calls_saved_by_card_table: u64,
  pub root_skip_intersect_calls: u64,
  pub rendered_nodes: usize,
  #[serde(skip)]
  pub postorder_elapsed: Duration,
  #[serde(skip)]
  pub incoming_edges_elapsed: Duration,
  #[serde(skip)]
  pub sort_elapsed: Duration,
  #[serde(skip)]
  pub dominators_elapsed: Duration,
  #[serde(skip)]
  pub retained_sizes_elapsed: Duration,
  #[serde(skip)]
  pub flame_graph_elapsed: Duration,
  #[serde(skip)]
  pub total_elapsed: Duration,
}

impl DominatorStats {
  /// Text for the report's meta section.
  #[must_use]
  pub fn render(&self, options: &DominatorTreeOptions) -> String {
    let per_node = self.idom_updates as f64 / f64::from(self.max_ponum.max(1));
    let per_update = if self.idom_updates == 0 {
      0.0
    } else {
      self.intersect_calls as f64 / self.idom_updates as f64
    };
    let truncated = if self.rendered_nodes > options.head_limit {
      format!("(truncated to {})", options.head_limit)
    } else {
      String::new()
    };

    let mut text = String::new();
    let _ = writeln!(text, "Dominator phase total time: {:?}", self.total_elapsed);
    let _ = writeln!(
      text,
      "  Compute postorder numbers: {:?}",
      self.postorder_elapsed
    );
    let _ = writeln!(
      text,
      "    edgeCount = {}, poEdgeCount = {}, roots = {}, maxPonum = {}; max stack depth = {}",
      self.edge_count,
      self.po_edge_count,
      self.root_count,
      self.max_ponum,
      self.max_stack_depth
    );
    let _ = writeln!(
      text,
      "  Compute incoming edges + card refs: {:?}",
      self.incoming_edges_elapsed
    );
    let _ = writeln!(text, "  Sort incoming edges: {:?}", self.sort_elapsed);
    let _ = writeln!(
      text,
      "  Dominator computation: {:?}",
      self.dominators_elapsed
    );
    let _ = writeln!(
      text,
      "    {} iterations, {} idoms changed in the last one",
      self.iterations, self.last_iteration_changes
    );
    let _ = writeln!(
      text,
      "    {} idom updates ({per_node:.2}x per node); {} calls to intersect ({per_update:.2} per idom update)",
      self.idom_updates, self.intersect_calls
    );
    let _ = writeln!(
      text,
      "    card table is {} bits x {} obj/bit, saved {} idom updates",
      self.card_count, self.card_size, self.update_calls_saved_by_card_table
    );
    let _ = writeln!(
      text,
      "    aborting idom update when root is hit saved {} intersect calls",
      self.root_skip_intersect_calls
    );
    let _ = writeln!(
      text,
      "  Compute retained sizes: {:?}",
      self.retained_sizes_elapsed
    );
    let _ = writeln!(text, "  Emit flame graph: {:?}", self.flame_graph_elapsed);
    let _ = writeln!(text, "    retained size cutoff: {}", options.min_node_size);
    let _ = writeln!(text, "    depth cutoff: {}", options.max_depth);
    let _ = writeln!(
      text,
      "    pruned tree contains {} nodes {truncated}",
      self.rendered_nodes
    );
    text
  }
}

/// Immediate dominators and retained sizes of every strongly-reachable
/// object, indexed by postorder number.
///
/// Postorder numbers run from `1` to `super_root() - 1`. The super-root is a
/// virtual node with an edge to every root.
pub struct DominatorTree {
  super_root: u32,
  postorder_list: IntList,
  postorder_numbers: IntList,
  idoms: IntList,
  retained: IntList,
  flame_graph: String,
  stats: DominatorStats,
}

impl DominatorTree {
  /// Number of real (non-virtual) nodes.
  #[must_use]
  pub fn node_count(&self) -> u32 {
    self.super_root - 1
  }

  /// Postorder number of the virtual super-root, the largest one in use.
  #[must_use]
  pub fn super_root(&self) -> u32 {
    self.super_root
  }

  #[must_use]
  pub fn object_at(&self, ponum: u32) -> Option<ObjectId> {
    (ponum != 0 && ponum < self.super_root)
      .then(|| self.postorder_list.get(ponum as usize))
  }

  /// `None` for objects outside the strongly-reachable set.
  #[must_use]
  pub fn postorder_number(&self, id: ObjectId) -> Option<u32> {
    let index = id as usize;
    if id == 0 || index >= self.postorder_numbers.capacity() {
      return None;
    }
    Some(self.postorder_numbers.get(index))
      .filter(|&ponum| ponum != 0 && ponum < self.super_root)
  }

  #[must_use]
  pub fn immediate_dominator(&self, ponum: u32) -> Option<u32> {
    (ponum != 0 && ponum <= self.super_root)
      .then(|| self.idoms.get(ponum as usize))
  }

  /// The object that immediately dominates `id`; `None` when only the
  /// super-root does.
  #[must_use]
  pub fn dominator_of(&self, id: ObjectId) -> Option<ObjectId> {
    let idom = self.immediate_dominator(self.postorder_number(id)?)?;
    self.object_at(idom)
  }

  /// Retained size in 4-byte units.
  #[must_use]
  pub fn retained_units(&self, ponum: u32) -> u32 {
    if ponum <= self.super_root {
      self.retained.get(ponum as usize)
    } else {
      0
    }
  }

  #[must_use]
  pub fn retained_bytes_of(&self, id: ObjectId) -> Option<u64> {
    let ponum = self.postorder_number(id)?;
    Some(u64::from(self.retained_units(ponum)) * 4)
  }

  /// Folded-stack text (`frame;frame;... bytes`).
  #[must_use]
  pub fn flame_graph(&self) -> &str {
    &self.flame_graph
  }

  #[must_use]
  pub fn stats(&self) -> &DominatorStats {
    &self.stats
  }
}

impl Debug for DominatorTree {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.debug_struct("DominatorTree")
      .field("super_root", &self.super_root)
      .field("stats", &self.stats)
      .finish_non_exhaustive()
  }
}

/// Scratch lists of the postorder DFS; later stages reuse them.
struct DfsBuffers {
  postorder_list: IntList,
  postorder_numbers: IntList,
  node_stack: IntList,
  children_stack: IntList,
  stack_capacity: usize,
  frame_offsets: IntList,
  frame_sizes: IntList,
}

/// Compressed incoming-edge lists plus, per node, the cards of its
/// successors.
struct EdgeIndex {
  offsets: IntList,
  edges: IntList,
  card_offsets: IntList,
  card_refs: UShortList,
}

impl EdgeIndex {
  fn incoming(&self, ponum: u32) -> std::ops::Range<usize> {
    let ponum = ponum as usize;
    self.offsets.get(ponum) as usize..self.offsets.get(ponum + 1) as usize
  }

  fn append(&mut self, cursors: &mut IntList, ponum: u32, predecessor: u32) {
    let filled = cursors.get(ponum as usize);
    let slot = self.offsets.get(ponum as usize) + filled;
    self.edges.set(slot as usize, predecessor);
    cursors.set(ponum as usize, filled + 1);
  }
}

/// Computes immediate dominators over the strongly-reachable part of the
/// heap, then retained sizes and a flame graph of the dominator tree.
///
/// Must run after the traversal and before `Traverser::fold_sizes`: the
/// retained sizes start from each object's own size.
pub struct DominatorAnalyzer<'a> {
  run: &'a AnalysisRun,
  provider: &'a dyn ListProvider,
  options: &'a DominatorTreeOptions,
}

impl<'a> DominatorAnalyzer<'a> {
  pub fn new(run: &'a AnalysisRun, provider: &'a dyn ListProvider) -> Self {
    Self {
      run,
      provider,
      options: &run.config.dominator,
    }
  }

  /// Bytes of scratch storage the stage is expected to need.
  #[must_use]
  pub fn estimate_scratch_bytes(visited_count: u64, edge_count: u64) -> u64 {
    20 * visited_count + 10 * edge_count
  }

  /// # Errors
  ///
  /// Returns `AnalysisError::Canceled` if `progress` requests cancellation
  /// between stages, or an error if scratch lists cannot be created or turn
  /// out too small.
  pub fn compute<N, C>(
    &self,
    nav: &mut N,
    classes: &C,
    traversal: &Traversal,
    progress: &mut dyn ProgressSink,
  ) -> Result<DominatorTree, AnalysisError>
  where
    N: ObjectNavigator,
    C: ClassStore,
  {
    let total = Instant::now();
    let mut stats = DominatorStats {
      edge_count: traversal.summary.edge_count,
      ..DominatorStats::default()
    };

    let roots: Vec<ObjectId> = traversal
      .roots
      .iter()
      .copied()
      .filter(|&id| self.run.was_visited(id))
      .collect();
    stats.root_count = roots.len();

    progress.set_text("Computing postorder numbers");
    let started = Instant::now();
    let buffers = self.postorder(nav, traversal, &roots, &mut stats)?;
    stats.postorder_elapsed = started.elapsed();
    self.checkpoint(progress, 0.2)?;

    let root = stats.max_ponum;
    let cards = CardTable::for_max_ponum(root);
    stats.card_count = cards.card_count();
    stats.card_size = cards.card_size();

    progress.set_text("Computing incoming edges");
    let started = Instant::now();
    let DfsBuffers {
      postorder_list,
      postorder_numbers,
      node_stack,
      children_stack,
      stack_capacity,
      frame_offsets,
      frame_sizes,
    } = buffers;
    let (mut index, mut cursors) = self.incoming_edges(
      nav,
      &roots,
      &postorder_list,
      &postorder_numbers,
      &cards,
      IncomingBuffers {
        card_offsets: node_stack,
        children_stack,
        stack_capacity,
        offsets: frame_offsets,
        cursors: frame_sizes,
      },
      &stats,
    )?;
    stats.incoming_edges_elapsed = started.elapsed();

    let started = Instant::now();
    sort_incoming_edges(&mut index, root);
    stats.sort_elapsed = started.elapsed();
    self.checkpoint(progress, 0.4)?;

    progress.set_text("Computing dominators");
    let started = Instant::now();
    cursors.clear(root as usize + 1);
    let mut idoms = cursors;
    self.fixpoint(&index, &mut idoms, cards, &mut stats);
    stats.dominators_elapsed = started.elapsed();
    self.checkpoint(progress, 0.8)?;

    progress.set_text("Computing retained sizes");
    let started = Instant::now();
    let EdgeIndex {
      card_offsets: mut retained,
      ..
    } = index;
    retained.clear(root as usize + 1);
    for ponum in 1..root {
      let id = postorder_list.get(ponum as usize);
      retained.set(ponum as usize, self.run.size_units(id));
    }
    for ponum in 1..root {
      let idom = idoms.get(ponum as usize) as usize;
      let folded = retained
        .get(idom)
        .saturating_add(retained.get(ponum as usize));
      retained.set(idom, folded);
    }
    stats.retained_sizes_elapsed = started.elapsed();

    progress.set_text("Building flame graph");
    let started = Instant::now();
    let (flame_graph, rendered_nodes) =
      self.flame_graph(nav, classes, root, &postorder_list, &idoms, &retained);
    stats.rendered_nodes = rendered_nodes;
    stats.flame_graph_elapsed = started.elapsed();
    stats.total_elapsed = total.elapsed();
    progress.set_fraction(1.0);

    info!(
      "dominator tree over {} nodes computed in {} iterations ({:?})",
      root - 1,
      stats.iterations,
      stats.total_elapsed
    );

    Ok(DominatorTree {
      super_root: root,
      postorder_list,
      postorder_numbers,
      idoms,
      retained,
      flame_graph,
      stats,
    })
  }

  fn checkpoint(
    &self,
    progress: &mut dyn ProgressSink,
    fraction: f64,
  ) -> Result<(), AnalysisError> {
    progress.set_fraction(fraction);
    if progress.is_canceled() {
      return Err(AnalysisError::Canceled);
    }
    Ok(())
  }

  /// Strong references plus synthetic children, restricted to objects the
  /// traversal processed.
  fn successors<N: ObjectNavigator>(
    &self,
    nav: &mut N,
    id: ObjectId,
    successors: &mut Vec<ObjectId>,
  ) {
    nav.go_to(id, ReferenceResolution::OnlyStrongReferences);
    nav.copy_references_to(successors);
    if self.run.config.traverse.include_synthetic_tree_edges {
      if let Some(children) =
        self.run.synthetic_tree().and_then(|tree| tree.children(id))
      {
        successors.extend_from_slice(children);
      }
    }
    for successor in successors.iter_mut() {
      if !self.run.was_visited(*successor) {
        *successor = 0;
      }
    }
  }

  /// Iterative DFS from every root; a node is numbered once all of its
  /// successors are. Each stack frame holds the not-yet-expanded successors
  /// of one node (frame 0 holds the roots).
  fn postorder<N: ObjectNavigator>(
    &self,
    nav: &mut N,
    traversal: &Traversal,
    roots: &[ObjectId],
    stats: &mut DominatorStats,
  ) -> Result<DfsBuffers, AnalysisError> {
    let capacity = self.run.object_count() as usize + 3;
    let stack_capacity =
      (traversal.summary.edge_count as usize + roots.len()).max(1);

    let mut postorder_list =
      self.provider.create_int_list("postorderList", capacity)?;
    let mut postorder_numbers =
      self.provider.create_int_list("postorderNumbers", capacity)?;
    let mut node_stack =
      self.provider.create_int_list("dominatorBuf1", capacity)?;
    let mut children_stack =
      self.provider.create_int_list("childStack", stack_capacity)?;
    let mut frame_offsets =
      self.provider.create_int_list("dominatorBuf2", capacity)?;
    let mut frame_sizes =
      self.provider.create_int_list("dominatorBuf3", capacity)?;

    let mut entries = 0;
    for &root in roots {
      children_stack.set(entries, root);
      entries += 1;
    }
    frame_sizes.set(0, entries as u32);
    frame_offsets.set(0, 0);
    frame_offsets.set(1, entries as u32);

    let mut po_edge_count = roots.len() as u64;
    let mut nodes = 0;
    let mut frames = 1;
    let mut next_ponum = 1u32;
    let mut successors = Vec::new();

    while frames != 0 {
      let top = frames - 1;
      let remaining = frame_sizes.get(top);
      if remaining > 0 {
        let child = children_stack
          .get(frame_offsets.get(top) as usize + remaining as usize - 1);
        frame_sizes.set(top, remaining - 1);
        if postorder_numbers.get(child as usize) != 0 {
          continue;
        }

        postorder_numbers.set(child as usize, IN_PROGRESS);
        node_stack.set(nodes, child);
        nodes += 1;

        self.successors(nav, child, &mut successors);
        let mut added = 0;
        for &successor in successors.iter().filter(|&&id| id != 0) {
          if entries >= stack_capacity {
            return Err(AnalysisError::CapacityExceeded {
              list: "childStack",
              capacity: stack_capacity,
            });
          }
          children_stack.set(entries, successor);
          entries += 1;
          added += 1;
        }
        po_edge_count += u64::from(added);
        frame_sizes.set(frames, added);
        frame_offsets.set(frames + 1, frame_offsets.get(frames) + added);
        frames += 1;
        stats.max_stack_depth = stats.max_stack_depth.max(frames);
      } else {
        frames -= 1;
        if frames == 0 {
          break;
        }
        entries = frame_offsets.get(frames) as usize;
        if nodes != 0 {
          let node = node_stack.get(nodes - 1);
          postorder_list.set(next_ponum as usize, node);
          postorder_numbers.set(node as usize, next_ponum);
          next_ponum += 1;
          nodes -= 1;
        }
      }
    }

    stats.max_ponum = next_ponum;
    stats.po_edge_count = po_edge_count;
    debug!(
      "postorder numbering reached {} nodes over {po_edge_count} edges",
      next_ponum - 1
    );

    Ok(DfsBuffers {
      postorder_list,
      postorder_numbers,
      node_stack,
      children_stack,
      stack_capacity,
      frame_offsets,
      frame_sizes,
    })
  }

  /// Two passes over the numbered nodes: count predecessors (and record
  /// successor cards), then fill the compressed lists.
  #[allow(clippy::too_many_arguments)]
  fn incoming_edges<N: ObjectNavigator>(
    &self,
    nav: &mut N,
    roots: &[ObjectId],
    postorder_list: &IntList,
    postorder_numbers: &IntList,
    cards: &CardTable,
    buffers: IncomingBuffers,
    stats: &DominatorStats,
  ) -> Result<(EdgeIndex, IntList), AnalysisError> {
    let IncomingBuffers {
      mut card_offsets,
      mut children_stack,
      stack_capacity,
      mut offsets,
      mut cursors,
    } = buffers;

    let root = stats.max_ponum;
    let po_edge_count = stats.po_edge_count as usize;
    let mut card_refs = self
      .provider
      .create_ushort_list("cardRefs", po_edge_count.max(1))?;
    card_offsets.clear(root as usize + 1);
    offsets.clear(root as usize + 2);

    let is_root = |id: ObjectId| roots.binary_search(&id).is_ok();
    let mut successors = Vec::new();
    let mut card_ref_count = 0u32;

    for ponum in 1..root {
      let id = postorder_list.get(ponum as usize);
      self.successors(nav, id, &mut successors);
      if is_root(id) {
        increment(&mut offsets, ponum);
      }
      card_offsets.set(ponum as usize, card_ref_count);
      for &successor in successors.iter().filter(|&&id| id != 0) {
        let target = postorder_numbers.get(successor as usize);
        increment(&mut offsets, target);
        card_refs.set(card_ref_count as usize, cards.card_of(target));
        card_ref_count += 1;
      }
    }
    card_offsets.set(root as usize, card_ref_count);

    let mut sum = 0;
    for ponum in 0..=root as usize {
      let count = offsets.get(ponum);
      offsets.set(ponum, sum);
      sum += count;
    }
    offsets.set(root as usize + 1, sum);

    let edges = if po_edge_count <= stack_capacity {
      children_stack.clear(po_edge_count);
      children_stack
    } else {
      self
        .provider
        .create_int_list("incoming", po_edge_count.max(1))?
    };

    let mut index = EdgeIndex {
      offsets,
      edges,
      card_offsets,
      card_refs,
    };

    cursors.clear(root as usize + 1);
    for ponum in 1..root {
      let id = postorder_list.get(ponum as usize);
      self.successors(nav, id, &mut successors);
      if is_root(id) {
        index.append(&mut cursors, ponum, root);
      }
      for &successor in successors.iter().filter(|&&id| id != 0) {
        let target = postorder_numbers.get(successor as usize);
        index.append(&mut cursors, target, ponum);
      }
    }

    Ok((index, cursors))
  }

  /// Recompute idoms card by card, highest postorder numbers first, until
  /// nothing changes or the iteration cap is hit.
  fn fixpoint(
    &self,
    index: &EdgeIndex,
    idoms: &mut IntList,
    mut cards: CardTable,
    stats: &mut DominatorStats,
  ) {
    let root = stats.max_ponum;
    let card_size = cards.card_size();
    idoms.set(root as usize, root);

    let mut changed = 1u64;
    while changed != 0 && stats.iterations < self.options.max_dominator_iterations
    {
      let started = Instant::now();
      let intersect_calls_before = stats.intersect_calls;
      let mut updates = 0u64;
      changed = 0;

      for chunk_index in (0..cards.chunk_count()).rev() {
        let chunk = cards.chunk(chunk_index);
        if chunk == 0 {
          stats.update_calls_saved_by_card_table += u64::from(card_size) * 64;
          continue;
        }
        for bit in (0..64).rev() {
          if chunk & (1 << bit) == 0 {
            stats.update_calls_saved_by_card_table += u64::from(card_size);
            continue;
          }
          let card = chunk_index * 64 + bit;
          cards.clear(card);
          let base = card as u64 * u64::from(card_size);
          for offset in (0..u64::from(card_size)).rev() {
            let ponum = base + offset;
            if ponum == 0 {
              break;
            }
            if ponum >= u64::from(root) {
              continue;
            }
            // Bounded by `root` above.
            let ponum = ponum as u32;
            if idoms.get(ponum as usize) == root {
              continue;
            }

            stats.idom_updates += 1;
            updates += 1;
            if update_idom(index, idoms, ponum, root, stats) {
              let successors_cards = index.card_offsets.get(ponum as usize)
                ..index.card_offsets.get(ponum as usize + 1);
              for slot in successors_cards {
                cards.mark(index.card_refs.get(slot as usize));
              }
              changed += 1;
            }
          }
        }
      }

      debug!(
        "iteration {} recomputed {updates} and changed {changed} idoms in {:?}; called intersect() {} times",
        stats.iterations,
        started.elapsed(),
        stats.intersect_calls - intersect_calls_before
      );
      stats.iterations += 1;
      stats.last_iteration_changes = changed;
    }

    if changed != 0 {
      warn!(
        "dominator computation stopped after {} iterations without converging",
        stats.iterations
      );
    }
  }

  /// Folded-stack rendering of the dominator tree, restricted to nodes that
  /// retain at least `min_node_size` bytes.
  fn flame_graph<N, C>(
    &self,
    nav: &mut N,
    classes: &C,
    root: u32,
    postorder_list: &IntList,
    idoms: &IntList,
    retained: &IntList,
  ) -> (String, usize)
  where
    N: ObjectNavigator,
    C: ClassStore,
  {
    let mut children: IntMap<u32, Vec<u32>> = IntMap::default();
    let mut labels: IntMap<u32, ClassId> = IntMap::default();
    for ponum in 1..root {
      let bytes = u64::from(retained.get(ponum as usize)) * 4;
      if bytes >= self.options.min_node_size {
        children
          .entry(idoms.get(ponum as usize))
          .or_default()
          .push(ponum);
        labels.insert(ponum, nav.class_of(postorder_list.get(ponum as usize)));
      }
    }
    for siblings in children.values_mut() {
      siblings.sort_by(|&a, &b| {
        retained
          .get(b as usize)
          .cmp(&retained.get(a as usize))
          .then(a.cmp(&b))
      });
    }

    let renderer = FlameGraphRenderer {
      classes,
      children: &children,
      labels: &labels,
      retained,
      root,
      max_depth: self.options.max_depth,
    };
    let mut buffer = TruncatingPrintBuffer::new(self.options.head_limit);
    renderer.dump(root, "", 0, &mut buffer);
    let rendered = buffer.line_count();
    (buffer.finish(), rendered)
  }
}

/// Lists handed from the DFS to the incoming-edge stage.
struct IncomingBuffers {
  card_offsets: IntList,
  children_stack: IntList,
  stack_capacity: usize,
  offsets: IntList,
  cursors: IntList,
}

struct FlameGraphRenderer<'a, C> {
  classes: &'a C,
  children: &'a IntMap<u32, Vec<u32>>,
  labels: &'a IntMap<u32, ClassId>,
  retained: &'a IntList,
  root: u32,
  max_depth: usize,
}

impl<C: ClassStore> FlameGraphRenderer<'_, C> {
  fn label(&self, ponum: u32) -> &str {
    if ponum == self.root {
      return "";
    }
    self
      .labels
      .get(&ponum)
      .and_then(|&class| self.classes.get(class))
      .map_or("<unknown>", ClassDefinition::frame_name)
  }

  fn dump(
    &self,
    ponum: u32,
    prefix: &str,
    depth: usize,
    buffer: &mut TruncatingPrintBuffer,
  ) {
    let path = if prefix.is_empty() {
      self.label(ponum).to_string()
    } else {
      format!("{prefix};{}", self.label(ponum))
    };

    let mut rendered_children = 0u64;
    if depth < self.max_depth {
      for &child in self.children.get(&ponum).into_iter().flatten() {
        self.dump(child, &path, depth + 1, buffer);
        rendered_children += u64::from(self.retained.get(child as usize));
      }
    }

    if ponum != self.root {
      let own = u64::from(self.retained.get(ponum as usize))
        .saturating_sub(rendered_children);
      buffer.println(format_args!("{path} {}", own * 4));
    }
  }
}

fn increment(list: &mut IntList, index: u32) {
  let index = index as usize;
  list.set(index, list.get(index) + 1);
}

fn sort_incoming_edges(index: &mut EdgeIndex, root: u32) {
  let mut scratch = Vec::new();
  for ponum in 1..root {
    let range = index.incoming(ponum);
    if range.len() <= 1 {
      continue;
    }
    scratch.clear();
    scratch.extend(range.clone().map(|slot| index.edges.get(slot)));
    scratch.sort_unstable();
    for (slot, &edge) in range.zip(&scratch) {
      index.edges.set(slot, edge);
    }
  }
}

/// Nearest common ancestor of `a` and `b` in the current idom tree. `0`
/// stands for a node whose idom is not known yet.
fn intersect(idoms: &IntList, a: u32, b: u32, stats: &mut DominatorStats) -> u32 {
  stats.intersect_calls += 1;
  let (mut a, mut b) = (a, b);
  while a != b {
    while a < b {
      if a == 0 {
        return b;
      }
      a = idoms.get(a as usize);
    }
    while b < a {
      if b == 0 {
        return a;
      }
      b = idoms.get(b as usize);
    }
  }
  a
}

/// Intersect the idoms of every predecessor of `ponum`. Returns `true` if
/// its idom changed.
fn update_idom(
  index: &EdgeIndex,
  idoms: &mut IntList,
  ponum: u32,
  root: u32,
  stats: &mut DominatorStats,
) -> bool {
  let range = index.incoming(ponum);
  if range.is_empty() {
    return false;
  }

  // Start from the largest predecessor and fold in the rest downwards.
  let last = range.end - 1;
  let mut idom = index.edges.get(last);
  for slot in (range.start..last).rev() {
    let predecessor = index.edges.get(slot);
    if predecessor == 0 {
      break;
    }
    let intersection = intersect(idoms, idom, predecessor, stats);
    if intersection != 0 {
      idom = intersection;
    }
    if idom == root {
      stats.root_skip_intersect_calls += (slot - range.start) as u64;
      break;
    }
  }

  if idom != idoms.get(ponum as usize) {
    idoms.set(ponum as usize, idom);
    return true;
  }
  false
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;

  struct Analyzed {
    graph: HeapGraph,
    run: AnalysisRun,
    traversal: Traversal,
  }

  fn analyze(mut graph: HeapGraph, config: AnalysisConfig) -> Analyzed {
    let mut run =
      AnalysisRun::new(config, graph.instance_count(), &MemoryListProvider)
        .expect("run");
    if let Some(tree) = graph.synthetic_tree().cloned() {
      run = run.with_synthetic_tree(tree);
    }
    let classes = graph.clone();
    let traversal = Traverser::new(&mut run)
      .traverse(&mut graph, &classes, &mut NoProgress)
      .expect("traversal");
    Analyzed {
      graph,
      run,
      traversal,
    }
  }

  fn dominators(analyzed: &mut Analyzed) -> DominatorTree {
    dominators_with(analyzed, &MemoryListProvider)
  }

  fn dominators_with(
    analyzed: &mut Analyzed,
    provider: &dyn ListProvider,
  ) -> DominatorTree {
    let classes = analyzed.graph.clone();
    DominatorAnalyzer::new(&analyzed.run, provider)
      .compute(
        &mut analyzed.graph,
        &classes,
        &analyzed.traversal,
        &mut NoProgress,
      )
      .expect("dominator tree")
  }

  fn chain_graph() -> (HeapGraph, [ObjectId; 4]) {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let a = builder.object(node, 8);
    let b = builder.object(node, 16);
    let c = builder.object(node, 24);
    let d = builder.object(node, 32);
    builder.reference(a, b).reference(b, c).reference(a, d).root(a);
    (builder.finish().expect("graph"), [a, b, c, d])
  }

  #[test]
  fn b_retains_its_only_child() {
    let (graph, [a, b, c, d]) = chain_graph();
    let mut analyzed = analyze(graph, AnalysisConfig::default());
    let tree = dominators(&mut analyzed);

    assert_eq!(tree.node_count(), 4);
    assert_eq!(tree.dominator_of(c), Some(b));
    assert_eq!(tree.dominator_of(b), Some(a));
    assert_eq!(tree.dominator_of(d), Some(a));
    assert_eq!(tree.dominator_of(a), None);
    assert_eq!(tree.retained_bytes_of(b), Some(40));
    assert_eq!(tree.retained_bytes_of(a), Some(80));
    assert_eq!(tree.retained_units(tree.super_root()), 20);
  }

  #[test]
  fn diamond_is_dominated_by_its_top() {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let a = builder.object(node, 4);
    let b = builder.object(node, 4);
    let c = builder.object(node, 4);
    let e = builder.object(node, 4);
    builder
      .reference(a, b)
      .reference(a, c)
      .reference(b, e)
      .reference(c, e)
      .root(a);
    let mut analyzed = analyze(builder.finish().expect("graph"), AnalysisConfig::default());
    let tree = dominators(&mut analyzed);

    let ponum_e = tree.postorder_number(e).expect("e is numbered");
    let ponum_a = tree.postorder_number(a).expect("a is numbered");
    assert_eq!(tree.immediate_dominator(ponum_e), Some(ponum_a));
    assert_eq!(tree.retained_bytes_of(b), Some(4));
    assert_eq!(tree.retained_bytes_of(a), Some(16));
  }

  #[test]
  fn separate_roots_are_dominated_by_the_super_root() {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let first = builder.object(node, 4);
    let second = builder.object(node, 4);
    let shared = builder.object(node, 4);
    builder
      .reference(first, shared)
      .reference(second, shared)
      .root(first)
      .root(second);
    let mut analyzed = analyze(builder.finish().expect("graph"), AnalysisConfig::default());
    let tree = dominators(&mut analyzed);

    let ponum = tree.postorder_number(shared).expect("numbered");
    assert_eq!(tree.immediate_dominator(ponum), Some(tree.super_root()));
    assert_eq!(tree.dominator_of(shared), None);
    assert_eq!(tree.retained_bytes_of(first), Some(4));
  }

  #[test]
  fn cycles_back_to_a_root_keep_the_root_on_top() {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let a = builder.object(node, 4);
    let b = builder.object(node, 4);
    let c = builder.object(node, 4);
    builder
      .reference(a, b)
      .reference(b, c)
      .reference(c, a)
      .reference(c, b)
      .root(a);
    let mut analyzed = analyze(builder.finish().expect("graph"), AnalysisConfig::default());
    let tree = dominators(&mut analyzed);

    assert_eq!(tree.dominator_of(b), Some(a));
    assert_eq!(tree.dominator_of(c), Some(b));
    assert_eq!(tree.retained_bytes_of(a), Some(12));
  }

  #[test]
  fn soft_referents_are_left_out() {
    let mut builder = HeapGraph::builder();
    let soft = builder.class("java.lang.ref.SoftReference");
    let node = builder.class("Node");
    let holder = builder.object(soft, 8);
    let referent = builder.object(node, 400);
    builder
      .referent(holder, referent, ReferentStrength::Soft)
      .root(holder);
    let mut analyzed = analyze(builder.finish().expect("graph"), AnalysisConfig::default());
    let tree = dominators(&mut analyzed);

    assert!(analyzed.run.was_visited(referent));
    assert_eq!(tree.postorder_number(referent), None);
    assert_eq!(tree.node_count(), 1);
    assert_eq!(tree.retained_bytes_of(holder), Some(8));
  }

  #[test]
  fn synthetic_children_are_dominator_edges() {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let tree_class = builder.class("ObjectTree");
    let root = builder.object(node, 4);
    let sentinel = builder.object(tree_class, 4);
    let owned = builder.object(node, 40);
    builder
      .reference(root, sentinel)
      .root(root)
      .synthetic_sentinel(sentinel)
      .synthetic_child(sentinel, owned);
    let mut analyzed = analyze(builder.finish().expect("graph"), AnalysisConfig::default());
    let tree = dominators(&mut analyzed);

    assert_eq!(tree.dominator_of(owned), Some(sentinel));
    assert_eq!(tree.retained_bytes_of(sentinel), Some(44));
    assert_eq!(tree.retained_bytes_of(root), Some(48));
  }

  #[test]
  fn flame_graph_lists_frames_by_retained_size() {
    let mut builder = HeapGraph::builder();
    let app = builder.class("App");
    let cache = builder.class("Cache;");
    let buffer = builder.class("byte[]");
    let root = builder.object(app, 16);
    let big = builder.object(cache, 16);
    let small = builder.object(cache, 16);
    let payload = builder.object(buffer, 1000);
    builder
      .reference(root, small)
      .reference(root, big)
      .reference(big, payload)
      .root(root);
    let config = AnalysisConfig::builder().min_retained_node_size(0).finish();
    let mut analyzed = analyze(builder.finish().expect("graph"), config);
    let tree = dominators(&mut analyzed);

    assert_eq!(
      tree.flame_graph(),
      "App;Cache;byte[] 1000\nApp;Cache 16\nApp;Cache 16\nApp 16\n"
    );
    assert_eq!(tree.stats().rendered_nodes, 4);
  }

  #[test]
  fn flame_graph_respects_size_depth_and_line_limits() {
    let mut builder = HeapGraph::builder();
    let node = builder.class("Node");
    let root = builder.object(node, 8);
    let child = builder.object(node, 8);
    let grandchild = builder.object(node, 800);
    let tiny = builder.object(node, 4);
    builder
      .reference(root, child)
      .reference(child, grandchild)
      .reference(root, tiny)
      .root(root);
    let graph = builder.finish().expect("graph");

    let config = AnalysisConfig::builder()
      .min_retained_node_size(100)
      .max_flame_graph_depth(2)
      .finish();
    let mut analyzed = analyze(graph.clone(), config);
    let tree = dominators(&mut analyzed);
    // `tiny` is below the cutoff and `grandchild` beyond the depth limit, so
    // both stay in their parent's own weight.
    assert_eq!(tree.flame_graph(), "Node;Node 808\nNode 12\n");

    let config = AnalysisConfig::builder()
      .min_retained_node_size(0)
      .flame_graph_line_limit(1)
      .finish();
    let mut analyzed = analyze(graph, config);
    let tree = dominators(&mut analyzed);
    assert_eq!(
      tree.flame_graph(),
      "Node;Node;Node 800\n[...removed 3 lines...]\n"
    );
    assert_eq!(tree.stats().rendered_nodes, 4);
    assert!(tree.stats().render(&analyzed.run.config().dominator).contains("(truncated to 1)"));
  }

  #[test]
  fn works_on_memory_mapped_lists() {
    let (graph, [a, b, ..]) = chain_graph();
    let mut analyzed = analyze(graph, AnalysisConfig::default());
    let scratch = tempfile::tempdir().expect("tempdir");
    let provider = MmapListProvider::in_dir(scratch.path()).expect("provider");
    let tree = dominators_with(&mut analyzed, &provider);

    assert_eq!(tree.dominator_of(b), Some(a));
    assert_eq!(tree.retained_bytes_of(a), Some(80));
  }

  #[test]
  fn cancellation_between_stages() {
    let (graph, _) = chain_graph();
    let mut analyzed = analyze(graph, AnalysisConfig::default());
    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut progress = LogProgress::new(cancel);
    let classes = analyzed.graph.clone();

    let result = DominatorAnalyzer::new(&analyzed.run, &MemoryListProvider)
      .compute(
        &mut analyzed.graph,
        &classes,
        &analyzed.traversal,
        &mut progress,
      );
    assert!(matches!(result, Err(AnalysisError::Canceled)));
  }

  #[test]
  fn stats_render_mentions_every_stage() {
    let (graph, _) = chain_graph();
    let mut analyzed = analyze(graph, AnalysisConfig::default());
    let tree = dominators(&mut analyzed);
    let text = tree.stats().render(&analyzed.run.config().dominator);

    for stage in [
      "Compute postorder numbers",
      "Compute incoming edges + card refs",
      "Sort incoming edges",
      "Dominator computation",
      "Compute retained sizes",
      "Emit flame graph",
    ] {
      assert!(text.contains(stage), "missing {stage}");
    }
    assert!(text.contains("card table is 6 bits x 1 obj/bit"));
  }

  #[test]
  fn iteration_cap_keeps_the_partial_result() {
    let (graph, [a, ..]) = chain_graph();
    let config = AnalysisConfig::builder().max_dominator_iterations(1).finish();
    let mut analyzed = analyze(graph, config);
    let tree = dominators(&mut analyzed);
    assert_eq!(tree.stats().iterations, 1);
    assert!(tree.stats().last_iteration_changes > 0);
    assert_eq!(tree.dominator_of(a), None);

    let (graph, _) = chain_graph();
    let mut analyzed = analyze(graph, AnalysisConfig::default());
    let tree = dominators(&mut analyzed);
    assert_eq!(tree.stats().last_iteration_changes, 0);
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
    fn dominator_tree_is_well_formed(
      sizes in prop::collection::vec(0u32..64, 1..40),
      edges in prop::collection::vec((0usize..40, 0usize..40), 0..120),
      roots in prop::collection::vec(0usize..40, 1..4),
    ) {
      let graph = random_graph(sizes, edges, roots);
      let mut analyzed = analyze(graph.clone(), AnalysisConfig::default());
      let tree = dominators(&mut analyzed);
      let root = tree.super_root();

      let mut own_total = 0u64;
      for ponum in 1..root {
        let idom = tree.immediate_dominator(ponum).expect("idom");
        prop_assert!(idom > ponum && idom <= root);
        let mut up = ponum;
        let mut steps = 0;
        while up != root {
          up = tree.immediate_dominator(up).expect("idom");
          steps += 1;
          prop_assert!(steps <= root);
        }
        let id = tree.object_at(ponum).expect("object");
        own_total += u64::from(analyzed.run.size_units(id));
      }
      prop_assert_eq!(u64::from(tree.retained_units(root)), own_total);
      prop_assert_eq!(
        u64::from(tree.node_count()),
        analyzed.traversal.summary.strong_visited
      );

      // Same input, same output.
      let mut again = analyze(graph, AnalysisConfig::default());
      let second = dominators(&mut again);
      prop_assert_eq!(second.super_root(), root);
      for ponum in 1..root {
        prop_assert_eq!(second.object_at(ponum), tree.object_at(ponum));
        prop_assert_eq!(
          second.immediate_dominator(ponum),
          tree.immediate_dominator(ponum)
        );
      }
    }
  }
}
