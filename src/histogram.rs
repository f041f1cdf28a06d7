use super::*;

#[derive(Debug, Default, Clone, Copy)]
struct ClassCounter {
  bytes: u64,
  instances: u64,
}

impl ClassCounter {
  fn add_instance(&mut self, size: u64) {
    self.instances = self.instances.saturating_add(1);
    self.bytes = self.bytes.saturating_add(size);
  }
}

/// Accumulates instance counts and byte totals keyed by class.
#[derive(Debug, Default)]
pub struct HistogramBuilder {
  counters: IntMap<ClassId, ClassCounter>,
}

impl HistogramBuilder {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_instance(&mut self, class: ClassId, size: u32) {
    self
      .counters
      .entry(class)
      .or_default()
      .add_instance(u64::from(size));
  }

  /// Resolve class names and produce the sorted histogram.
  #[must_use]
  pub fn finish<C: ClassStore>(self, classes: &C) -> Histogram {
    let entries = self
      .counters
      .into_iter()
      .map(|(class, counter)| HistogramEntry {
        class_name: classes
          .get(class)
          .map_or_else(|| format!("<unknown class {class}>"), |c| c.name.clone()),
        instances: counter.instances,
        bytes: counter.bytes,
      })
      .collect();

    Histogram::new(entries)
  }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct HistogramEntry {
  pub class_name: String,
  pub instances: u64,
  pub bytes: u64,
}

/// Per-class instance counts, sorted by descending instance count.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Histogram {
  bytes_count: u64,
  entries: Vec<HistogramEntry>,
  instance_count: u64,
}

impl Histogram {
  #[must_use]
  pub fn new(mut entries: Vec<HistogramEntry>) -> Self {
    entries.sort_by(|a, b| {
      b.instances
        .cmp(&a.instances)
        .then_with(|| b.bytes.cmp(&a.bytes))
        .then_with(|| a.class_name.cmp(&b.class_name))
    });

    let instance_count = entries.iter().map(|entry| entry.instances).sum();
    let bytes_count = entries.iter().map(|entry| entry.bytes).sum();

    Self {
      bytes_count,
      entries,
      instance_count,
    }
  }

  /// Count every object of the heap, reachable or not.
  pub fn create<N: ObjectNavigator, C: ClassStore>(
    nav: &mut N,
    classes: &C,
  ) -> Self {
    let mut builder = HistogramBuilder::new();
    for id in 1..=nav.instance_count() {
      nav.go_to(id, ReferenceResolution::AllReferences);
      builder.add_instance(nav.class(), nav.object_size());
    }
    builder.finish(classes)
  }

  /// Combine two histograms class by class.
  #[must_use]
  pub fn merge(first: &Histogram, second: &Histogram) -> Self {
    let mut combined: HashMap<&str, (u64, u64)> = HashMap::new();
    for entry in first.entries.iter().chain(&second.entries) {
      let slot = combined.entry(entry.class_name.as_str()).or_default();
      slot.0 += entry.instances;
      slot.1 += entry.bytes;
    }

    Self::new(
      combined
        .into_iter()
        .map(|(class_name, (instances, bytes))| HistogramEntry {
          class_name: class_name.to_string(),
          instances,
          bytes,
        })
        .collect(),
    )
  }

  #[must_use]
  pub fn bytes_count(&self) -> u64 {
    self.bytes_count
  }

  #[must_use]
  pub fn entries(&self) -> &[HistogramEntry] {
    &self.entries
  }

  #[must_use]
  pub fn entry(&self, class_name: &str) -> Option<&HistogramEntry> {
    self
      .entries
      .iter()
      .find(|entry| entry.class_name == class_name)
  }

  #[must_use]
  pub fn instance_count(&self) -> u64 {
    self.instance_count
  }

  /// Side-by-side rendering of `main` and `secondary`, ranked by `main`.
  #[must_use]
  pub fn prepare_merged_report(
    main: &Histogram,
    main_label: &str,
    secondary: &Histogram,
    secondary_label: &str,
    options: &HistogramOptions,
  ) -> String {
    let mut text = String::new();
    let secondary_by_name: HashMap<&str, &HistogramEntry> = secondary
      .entries
      .iter()
      .map(|entry| (entry.class_name.as_str(), entry))
      .collect();

    let append_line = |text: &mut String, rank: usize, entry: &HistogramEntry| {
      let (count2, bytes2) = secondary_by_name
        .get(entry.class_name.as_str())
        .map_or((0, 0), |other| (other.instances, other.bytes));
      let _ = writeln!(
        text,
        "{rank:5}: [{}/{}] [{}/{}] {}",
        to_padded_short_string_as_count(entry.instances),
        to_padded_short_string_as_size(entry.bytes),
        to_padded_short_string_as_count(count2),
        to_padded_short_string_as_size(bytes2),
        entry.class_name,
      );
    };

    if options.include_by_count {
      let _ = writeln!(
        text,
        "Histogram. Top {} by instance count [{main_label}] [{secondary_label}]:",
        options.class_by_count_limit
      );
      for (index, entry) in main
        .entries
        .iter()
        .take(options.class_by_count_limit)
        .enumerate()
      {
        append_line(&mut text, index + 1, entry);
      }
    }

    if options.include_by_size {
      let mut by_size: Vec<&HistogramEntry> = main.entries.iter().collect();
      by_size.sort_by(|a, b| b.bytes.cmp(&a.bytes));
      let _ = writeln!(
        text,
        "Top {} by size:",
        options.class_by_size_limit
      );
      for (index, entry) in
        by_size.into_iter().take(options.class_by_size_limit).enumerate()
      {
        append_line(&mut text, index + 1, entry);
      }
    }

    let _ = writeln!(
      text,
      "Total - {main_label:>10}: {} {} {} classes",
      to_padded_short_string_as_count(main.instance_count),
      to_padded_short_string_as_size(main.bytes_count),
      main.entries.len()
    );
    let _ = writeln!(
      text,
      "Total - {secondary_label:>10}: {} {} {} classes",
      to_padded_short_string_as_count(secondary.instance_count),
      to_padded_short_string_as_size(secondary.bytes_count),
      secondary.entries.len()
    );
    text
  }
}
