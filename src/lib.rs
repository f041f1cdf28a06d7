//! Reachability and dominator analysis for heap graph snapshots.
//!
//! A heap is consumed through the `ObjectNavigator` and `ClassStore` traits.
//! The traversal walks it breadth-first in phases (strong references before
//! stack frames, the synthetic tree, soft, weak and cleanup references) and
//! records a spanning tree, per-class histograms and subtree sizes. The
//! dominator stage then numbers the strongly-reachable objects, computes
//! immediate dominators with a card-table accelerated fixpoint and renders
//! retained sizes as a folded-stack flame graph.

mod analysis;
mod card_table;
mod config;
mod context;
mod dominator;
mod error;
mod graph;
mod histogram;
mod list;
mod navigator;
mod phase;
mod progress;
mod report;
mod role;
mod synthetic;
mod traverse;

use {
  log::{debug, info, warn},
  memmap2::MmapMut,
  nohash_hasher::{IntMap, IntSet},
  serde::{Deserialize, Serialize},
  std::{
    any::Any,
    collections::HashMap,
    fmt::{self, Debug, Display, Formatter, Write as _},
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    marker::PhantomData,
    mem::size_of,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{
      Arc,
      atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
  },
  sysinfo::{Disks, System},
  tempfile::TempDir,
  thiserror::Error,
};

pub use {
  analysis::{Analysis, AnalyzeGraph, LOW_DISK_SPACE},
  card_table::{CardTable, card_bits_for},
  config::{
    AnalysisConfig, AnalysisConfigBuilder, DominatorTreeOptions,
    HistogramOptions, MetaInfoOptions, PerClassOptions, TraverseOptions,
  },
  context::{AnalysisRun, size_in_units},
  dominator::{
    DominatorAnalyzer, DominatorOutcome, DominatorStats, DominatorTree,
  },
  error::AnalysisError,
  graph::{
    ClassTable, HeapGraph, HeapGraphBuilder, HeapGraphData, ObjectRecord,
    ReferentSlot, ReferentStrength, SyntheticTreeData,
  },
  histogram::{Histogram, HistogramBuilder, HistogramEntry},
  list::{
    IntList, ListProvider, MemoryList, MemoryListProvider, MmapList,
    MmapListProvider, Primitive, PrimitiveList, UShortList,
  },
  navigator::{
    CLEANUP_MARKER_CLASSES, ClassDefinition, ClassId, ClassStore, GcRoot,
    ObjectId, ObjectNavigator, ReferenceResolution,
  },
  phase::{PendingEdge, PhaseQueues, TraversalPhase},
  progress::{
    CancelFlag, LogProgress, NoProgress, PartialProgress, ProgressSink,
  },
  report::{
    AnalysisReport, TruncatingPrintBuffer, section_header,
    to_padded_short_string_as_count, to_padded_short_string_as_size,
    to_short_string_as_count, to_short_string_as_size,
  },
  role::{MAX_FIELD_INDEX, ReferenceRole},
  synthetic::SyntheticTree,
  traverse::{Traversal, TraversalSummary, Traverser},
};
