use super::*;

/// Card indices must fit the `u16` card reference list.
const MAX_CARDS_AT_FULL_RESOLUTION: u32 = 1 << 16;

/// Dirty bits over power-of-two ranges ("cards") of postorder numbers.
///
/// Card `c` covers postorder numbers `[c << card_bits, (c + 1) << card_bits)`.
/// Cards are packed 64 to a chunk so clean stretches are skipped a word at a
/// time.
#[derive(Debug, Clone)]
pub struct CardTable {
  chunks: Vec<u64>,
  card_bits: u32,
  card_count: usize,
}

impl CardTable {
  /// A table covering `0..=max_ponum` with every card dirty.
  #[must_use]
  pub fn for_max_ponum(max_ponum: u32) -> Self {
    let card_bits = card_bits_for(max_ponum);
    let card_count = (max_ponum >> card_bits) as usize + 1;
    let mut chunks = vec![u64::MAX; card_count.div_ceil(64)];

    let tail = card_count % 64;
    if tail != 0 {
      if let Some(last) = chunks.last_mut() {
        *last = (1 << tail) - 1;
      }
    }

    Self {
      chunks,
      card_bits,
      card_count,
    }
  }

  #[must_use]
  pub fn card_bits(&self) -> u32 {
    self.card_bits
  }

  /// Postorder numbers per card.
  #[must_use]
  pub fn card_size(&self) -> u32 {
    1 << self.card_bits
  }

  #[must_use]
  pub fn card_count(&self) -> usize {
    self.card_count
  }

  #[must_use]
  pub fn chunk_count(&self) -> usize {
    self.chunks.len()
  }

  /// Dirty bits of cards `64 * index .. 64 * index + 64`.
  #[must_use]
  pub fn chunk(&self, index: usize) -> u64 {
    self.chunks[index]
  }

  #[must_use]
  pub fn card_of(&self, ponum: u32) -> u16 {
    // Fits by construction of `card_bits`.
    (ponum >> self.card_bits) as u16
  }

  pub fn mark(&mut self, card: u16) {
    let card = usize::from(card);
    if let Some(chunk) = self.chunks.get_mut(card / 64) {
      *chunk |= 1 << (card % 64);
    }
  }

  pub fn clear(&mut self, card: usize) {
    if let Some(chunk) = self.chunks.get_mut(card / 64) {
      *chunk &= !(1 << (card % 64));
    }
  }

  #[must_use]
  pub fn is_dirty(&self, card: usize) -> bool {
    self
      .chunks
      .get(card / 64)
      .is_some_and(|chunk| chunk & (1 << (card % 64)) != 0)
  }

  #[must_use]
  pub fn dirty_count(&self) -> usize {
    self
      .chunks
      .iter()
      .map(|chunk| chunk.count_ones() as usize)
      .sum()
  }
}

/// Smallest shift that keeps every card index of `0..=max_ponum` in a `u16`.
#[must_use]
pub fn card_bits_for(max_ponum: u32) -> u32 {
  if max_ponum < MAX_CARDS_AT_FULL_RESOLUTION {
    0
  } else {
    (f64::from(max_ponum) / f64::from(MAX_CARDS_AT_FULL_RESOLUTION))
      .log2()
      .floor() as u32
      + 1
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn small_tables_use_one_card_per_ponum() {
    let table = CardTable::for_max_ponum(100);
    assert_eq!(table.card_bits(), 0);
    assert_eq!(table.card_size(), 1);
    assert_eq!(table.card_count(), 101);
    assert_eq!(table.chunk_count(), 2);
    assert_eq!(table.dirty_count(), 101);
    assert_eq!(table.chunk(1), (1 << 37) - 1);
  }

  #[test]
  fn card_indices_fit_in_u16() {
    for max_ponum in [65_535, 65_536, 131_071, 200_000, 10_000_000, u32::MAX] {
      let table = CardTable::for_max_ponum(max_ponum);
      assert!(
        table.card_count() <= usize::from(u16::MAX) + 1,
        "{max_ponum} produced {} cards",
        table.card_count()
      );
      assert_eq!(usize::from(table.card_of(max_ponum)) + 1, table.card_count());
    }
    assert_eq!(card_bits_for(65_535), 0);
    assert_eq!(card_bits_for(65_536), 1);
    assert_eq!(card_bits_for(200_000), 2);
  }

  #[test]
  fn mark_and_clear() {
    let mut table = CardTable::for_max_ponum(300);
    for card in 0..table.card_count() {
      table.clear(card);
    }
    assert_eq!(table.dirty_count(), 0);
    assert_eq!(table.chunk(0), 0);

    table.mark(table.card_of(130));
    assert!(table.is_dirty(130));
    assert!(!table.is_dirty(129));
    assert_eq!(table.chunk(2), 1 << 2);

    table.clear(130);
    assert_eq!(table.dirty_count(), 0);
  }
}
