use super::*;

/// Rendered sections of one analysis run.
#[derive(Debug, Default, Serialize)]
pub struct AnalysisReport {
  /// Histogram, summary, per-class and flame graph sections.
  pub main_report: String,
  /// Timings and dominator diagnostics.
  pub meta_info: String,
  pub strong_histogram: Histogram,
  pub non_strong_histogram: Histogram,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub full_histogram: Option<Histogram>,
}

impl AnalysisReport {
  /// Serialize the report to JSON using the provided writer.
  ///
  /// # Errors
  ///
  /// Returns an error if serialization to JSON fails.
  pub fn export_json<W: Write>(&self, writer: W) -> Result<(), AnalysisError> {
    serde_json::to_writer_pretty(writer, self)?;
    Ok(())
  }

  /// Plain-text rendering: the main report followed by the meta section.
  #[must_use]
  pub fn to_text(&self) -> String {
    let mut text = self.main_report.clone();
    if !self.meta_info.is_empty() {
      text.push_str(&section_header("Report metadata"));
      text.push('\n');
      text.push_str(&self.meta_info);
    }
    text
  }
}

/// Buffers at most `head_limit` lines and notes how many were dropped.
#[derive(Debug)]
pub struct TruncatingPrintBuffer {
  head_limit: usize,
  lines: usize,
  output: String,
}

impl TruncatingPrintBuffer {
  #[must_use]
  pub fn new(head_limit: usize) -> Self {
    Self {
      head_limit,
      lines: 0,
      output: String::new(),
    }
  }

  pub fn println(&mut self, line: impl Display) {
    if self.lines < self.head_limit {
      let _ = writeln!(self.output, "{line}");
    }
    self.lines += 1;
  }

  /// Number of lines offered so far, printed or not.
  #[must_use]
  pub fn line_count(&self) -> usize {
    self.lines
  }

  #[must_use]
  pub fn finish(mut self) -> String {
    if self.lines > self.head_limit {
      let _ = writeln!(
        self.output,
        "[...removed {} lines...]",
        self.lines - self.head_limit
      );
    }
    self.output
  }
}

#[must_use]
pub fn section_header(name: &str) -> String {
  format!("======== {} ========", name.to_uppercase())
}

fn to_short_string(value: u64, base: f64, suffixes: &[&str]) -> String {
  let mut scaled = value as f64;
  let mut unit = 0;
  while scaled >= base && unit + 1 < suffixes.len() {
    scaled /= base;
    unit += 1;
  }

  if unit == 0 {
    return format!("{value}{}", suffixes[0]);
  }

  let suffix = suffixes[unit];
  if scaled < 10.0 {
    format!("{scaled:.2}{suffix}")
  } else if scaled < 100.0 {
    format!("{scaled:.1}{suffix}")
  } else {
    format!("{scaled:.0}{suffix}")
  }
}

#[must_use]
pub fn to_short_string_as_count(count: u64) -> String {
  to_short_string(count, 1000.0, &["", "K", "M", "G", "T"])
}

#[must_use]
pub fn to_short_string_as_size(bytes: u64) -> String {
  to_short_string(bytes, 1024.0, &["b", "KB", "MB", "GB", "TB"])
}

#[must_use]
pub fn to_padded_short_string_as_count(count: u64) -> String {
  format!("{:>6}", to_short_string_as_count(count))
}

#[must_use]
pub fn to_padded_short_string_as_size(bytes: u64) -> String {
  format!("{:>7}", to_short_string_as_size(bytes))
}
