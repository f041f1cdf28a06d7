use super::*;

/// Receives fractional progress from a long-running analysis and lets the
/// caller request cancellation.
///
/// Cancellation is cooperative: it is polled between traversal waves and
/// between dominator stages, never inside per-object loops.
pub trait ProgressSink {
  /// Completed fraction in `[0.0, 1.0]`.
  fn set_fraction(&mut self, fraction: f64);

  fn set_text(&mut self, text: &str) {
    let _ = text;
  }

  fn is_canceled(&self) -> bool {
    false
  }
}

/// Discards progress updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
  fn set_fraction(&mut self, _fraction: f64) {}
}

/// Maps `[0, 1]` onto the `[start, start + portion]` slice of a parent sink.
pub struct PartialProgress<'a> {
  parent: &'a mut dyn ProgressSink,
  portion: f64,
  start: f64,
}

impl<'a> PartialProgress<'a> {
  pub fn new(parent: &'a mut dyn ProgressSink, start: f64, portion: f64) -> Self {
    Self {
      parent,
      portion,
      start,
    }
  }
}

impl ProgressSink for PartialProgress<'_> {
  fn set_fraction(&mut self, fraction: f64) {
    let fraction = fraction.clamp(0.0, 1.0);
    self.parent.set_fraction(self.start + fraction * self.portion);
  }

  fn set_text(&mut self, text: &str) {
    self.parent.set_text(text);
  }

  fn is_canceled(&self) -> bool {
    self.parent.is_canceled()
  }
}

/// Shared flag a caller flips to stop a running analysis.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag {
  canceled: Arc<AtomicBool>,
}

impl CancelFlag {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.canceled.store(true, Ordering::Release);
  }

  #[must_use]
  pub fn is_canceled(&self) -> bool {
    self.canceled.load(Ordering::Acquire)
  }
}

/// Logs progress in 10% steps.
#[derive(Debug, Default)]
pub struct LogProgress {
  cancel: CancelFlag,
  last_step: i64,
}

impl LogProgress {
  #[must_use]
  pub fn new(cancel: CancelFlag) -> Self {
    Self {
      cancel,
      last_step: -1,
    }
  }
}

impl ProgressSink for LogProgress {
  fn set_fraction(&mut self, fraction: f64) {
    let step = (fraction.clamp(0.0, 1.0) * 10.0) as i64;
    if step > self.last_step {
      self.last_step = step;
      info!("progress: {}%", step * 10);
    }
  }

  fn set_text(&mut self, text: &str) {
    debug!("{text}");
  }

  fn is_canceled(&self) -> bool {
    self.cancel.is_canceled()
  }
}
