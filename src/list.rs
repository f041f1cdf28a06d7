use super::*;

/// Fixed-width integer stored in a primitive list.
pub trait Primitive: Copy + Default + Eq + fmt::Debug + 'static {
  const WIDTH: usize;

  fn read(bytes: &[u8]) -> Self;

  fn write(self, bytes: &mut [u8]);
}

macro_rules! impl_primitive {
  ($($ty:ty),*) => {
    $(
      impl Primitive for $ty {
        const WIDTH: usize = size_of::<$ty>();

        fn read(bytes: &[u8]) -> Self {
          let mut raw = [0u8; size_of::<$ty>()];
          raw.copy_from_slice(bytes);
          <$ty>::from_ne_bytes(raw)
        }

        fn write(self, bytes: &mut [u8]) {
          bytes.copy_from_slice(&self.to_ne_bytes());
        }
      }
    )*
  };
}

impl_primitive!(u16, u32);

/// Dense array of fixed-width integers with a capacity fixed at creation.
///
/// Indexing past `capacity` panics, the same as slice indexing.
pub trait PrimitiveList<T: Primitive> {
  fn capacity(&self) -> usize;

  fn get(&self, index: usize) -> T;

  fn set(&mut self, index: usize, value: T);

  /// Zero the first `len` entries.
  fn clear(&mut self, len: usize);
}

pub type IntList = Box<dyn PrimitiveList<u32>>;
pub type UShortList = Box<dyn PrimitiveList<u16>>;

/// Heap-allocated list.
#[derive(Debug)]
pub struct MemoryList<T> {
  values: Vec<T>,
}

impl<T: Primitive> MemoryList<T> {
  #[must_use]
  pub fn new(capacity: usize) -> Self {
    Self {
      values: vec![T::default(); capacity],
    }
  }
}

impl<T: Primitive> PrimitiveList<T> for MemoryList<T> {
  fn capacity(&self) -> usize {
    self.values.len()
  }

  fn get(&self, index: usize) -> T {
    self.values[index]
  }

  fn set(&mut self, index: usize, value: T) {
    self.values[index] = value;
  }

  fn clear(&mut self, len: usize) {
    self.values[..len].fill(T::default());
  }
}

/// List backed by a memory-mapped scratch file.
pub struct MmapList<T> {
  capacity: usize,
  mmap: MmapMut,
  _marker: PhantomData<T>,
}

impl<T: Primitive> MmapList<T> {
  /// # Errors
  ///
  /// Returns an error if the backing file cannot be created, resized, or
  /// mapped into memory.
  pub fn create(path: impl AsRef<Path>, capacity: usize) -> io::Result<Self> {
    let byte_len = capacity
      .checked_mul(T::WIDTH)
      .ok_or_else(|| io::Error::other("list size overflows usize"))?
      .max(1);

    let file = OpenOptions::new()
      .create(true)
      .write(true)
      .read(true)
      .truncate(true)
      .open(path)?;

    let byte_len_u64 = u64::try_from(byte_len)
      .map_err(|_| io::Error::other("list size exceeds u64"))?;

    // Freshly extended files read back as zeroes.
    file.set_len(byte_len_u64)?;

    // SAFETY: the file is private to this list and stays mapped for the
    // lifetime of the mapping; nothing else resizes it.
    let mmap = unsafe { MmapMut::map_mut(&file)? };

    Ok(Self {
      capacity,
      mmap,
      _marker: PhantomData,
    })
  }

  fn range(&self, index: usize) -> std::ops::Range<usize> {
    assert!(
      index < self.capacity,
      "index {index} out of bounds for list of capacity {}",
      self.capacity
    );
    let start = index * T::WIDTH;
    start..start + T::WIDTH
  }
}

impl<T: Primitive> PrimitiveList<T> for MmapList<T> {
  fn capacity(&self) -> usize {
    self.capacity
  }

  fn get(&self, index: usize) -> T {
    T::read(&self.mmap[self.range(index)])
  }

  fn set(&mut self, index: usize, value: T) {
    let range = self.range(index);
    value.write(&mut self.mmap[range]);
  }

  fn clear(&mut self, len: usize) {
    let len = len.min(self.capacity);
    self.mmap[..len * T::WIDTH].fill(0);
  }
}

/// Factory for the primitive lists of an analysis run.
///
/// The host picks the implementation from the estimated size of the heap;
/// the analysis itself only sees the `PrimitiveList` contract.
pub trait ListProvider {
  /// # Errors
  ///
  /// Returns an error if the storage for the list cannot be reserved.
  fn create_int_list(
    &self,
    name: &str,
    capacity: usize,
  ) -> Result<IntList, AnalysisError>;

  /// # Errors
  ///
  /// Returns an error if the storage for the list cannot be reserved.
  fn create_ushort_list(
    &self,
    name: &str,
    capacity: usize,
  ) -> Result<UShortList, AnalysisError>;

  /// Bytes still available to back new lists.
  ///
  /// # Errors
  ///
  /// Returns an error if the available space cannot be determined.
  fn available_bytes(&self) -> Result<u64, AnalysisError>;
}

/// Keeps every list in process memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryListProvider;

impl ListProvider for MemoryListProvider {
  fn create_int_list(
    &self,
    _name: &str,
    capacity: usize,
  ) -> Result<IntList, AnalysisError> {
    Ok(Box::new(MemoryList::<u32>::new(capacity)))
  }

  fn create_ushort_list(
    &self,
    _name: &str,
    capacity: usize,
  ) -> Result<UShortList, AnalysisError> {
    Ok(Box::new(MemoryList::<u16>::new(capacity)))
  }

  fn available_bytes(&self) -> Result<u64, AnalysisError> {
    let mut system = System::new();
    system.refresh_memory();
    Ok(system.available_memory())
  }
}

/// Places every list in its own memory-mapped file inside a scratch
/// directory that is removed when the provider is dropped.
pub struct MmapListProvider {
  dir: TempDir,
  next_file: AtomicU64,
}

impl MmapListProvider {
  /// Create the scratch directory under the system temp directory.
  ///
  /// # Errors
  ///
  /// Returns an error if the directory cannot be created.
  pub fn new() -> io::Result<Self> {
    let dir = tempfile::Builder::new().prefix("heapscope-").tempdir()?;
    Ok(Self::with_dir(dir))
  }

  /// Create the scratch directory under `parent`.
  ///
  /// # Errors
  ///
  /// Returns an error if the directory cannot be created.
  pub fn in_dir(parent: impl AsRef<Path>) -> io::Result<Self> {
    let dir = tempfile::Builder::new()
      .prefix("heapscope-")
      .tempdir_in(parent)?;
    Ok(Self::with_dir(dir))
  }

  fn with_dir(dir: TempDir) -> Self {
    Self {
      dir,
      next_file: AtomicU64::new(0),
    }
  }

  #[must_use]
  pub fn path(&self) -> &Path {
    self.dir.path()
  }

  fn file_for(&self, name: &str) -> PathBuf {
    let n = self.next_file.fetch_add(1, Ordering::Relaxed);
    self.dir.path().join(format!("{name}-{n}.bin"))
  }
}

impl ListProvider for MmapListProvider {
  fn create_int_list(
    &self,
    name: &str,
    capacity: usize,
  ) -> Result<IntList, AnalysisError> {
    let list = MmapList::<u32>::create(self.file_for(name), capacity)?;
    Ok(Box::new(list))
  }

  fn create_ushort_list(
    &self,
    name: &str,
    capacity: usize,
  ) -> Result<UShortList, AnalysisError> {
    let list = MmapList::<u16>::create(self.file_for(name), capacity)?;
    Ok(Box::new(list))
  }

  fn available_bytes(&self) -> Result<u64, AnalysisError> {
    let dir = self.dir.path().canonicalize()?;
    let disks = Disks::new_with_refreshed_list();

    // The disk holding the directory is the one with the longest matching
    // mount point.
    disks
      .list()
      .iter()
      .filter(|disk| dir.starts_with(disk.mount_point()))
      .max_by_key(|disk| disk.mount_point().as_os_str().len())
      .map(|disk| disk.available_space())
      .ok_or_else(|| {
        AnalysisError::Io(io::Error::other(format!(
          "no mounted disk found for {}",
          dir.display()
        )))
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(list: &mut dyn PrimitiveList<u32>) {
    assert_eq!(list.capacity(), 8);
    assert_eq!(list.get(7), 0);

    list.set(0, 11);
    list.set(7, u32::MAX);
    assert_eq!(list.get(0), 11);
    assert_eq!(list.get(7), u32::MAX);

    list.set(3, 5);
    list.clear(4);
    assert_eq!(list.get(0), 0);
    assert_eq!(list.get(3), 0);
    assert_eq!(list.get(7), u32::MAX);
  }

  #[test]
  fn memory_list_get_set_clear() {
    let mut list = MemoryList::<u32>::new(8);
    exercise(&mut list);
  }

  #[test]
  fn mmap_list_get_set_clear() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut list =
      MmapList::<u32>::create(dir.path().join("ints.bin"), 8).expect("mmap");
    exercise(&mut list);
  }

  #[test]
  fn mmap_provider_creates_distinct_files_for_same_name() {
    let parent = tempfile::tempdir().expect("tempdir");
    let provider = MmapListProvider::in_dir(parent.path()).expect("provider");

    let mut first = provider.create_ushort_list("cards", 4).expect("list");
    let second = provider.create_ushort_list("cards", 4).expect("list");
    first.set(2, 7);

    assert_eq!(first.get(2), 7);
    assert_eq!(second.get(2), 0);
    assert_eq!(std::fs::read_dir(provider.path()).expect("dir").count(), 2);
  }

  #[test]
  fn zero_capacity_mmap_list_is_allowed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let list =
      MmapList::<u16>::create(dir.path().join("empty.bin"), 0).expect("mmap");
    assert_eq!(list.capacity(), 0);
  }

  #[test]
  #[should_panic(expected = "out of bounds")]
  fn mmap_list_rejects_out_of_bounds_index() {
    let dir = tempfile::tempdir().expect("tempdir");
    let list =
      MmapList::<u32>::create(dir.path().join("small.bin"), 2).expect("mmap");
    let _ = list.get(2);
  }
}
