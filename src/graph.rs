use super::*;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentStrength {
  Soft,
  Weak,
}

/// The referent slot of a soft or weak reference object.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct ReferentSlot {
  pub strength: ReferentStrength,
  /// Index into the object's `references`.
  pub slot: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
  pub class: ClassId,
  pub size: u32,
  #[serde(default)]
  pub references: Vec<ObjectId>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub referent: Option<ReferentSlot>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyntheticTreeData {
  #[serde(default)]
  pub sentinel: ObjectId,
  /// `(parent, child)` pairs.
  #[serde(default)]
  pub edges: Vec<(ObjectId, ObjectId)>,
}

/// On-disk shape of a `HeapGraph`: object `n` and class `n` live at index
/// `n - 1` of their lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeapGraphData {
  #[serde(default)]
  pub classes: Vec<ClassDefinition>,
  #[serde(default)]
  pub objects: Vec<ObjectRecord>,
  #[serde(default)]
  pub roots: Vec<GcRoot>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub synthetic_tree: Option<SyntheticTreeData>,
}

/// Classes of a `HeapGraph`, shareable independently of the navigator.
#[derive(Debug, Default)]
pub struct ClassTable {
  by_name: HashMap<String, ClassId>,
  classes: Vec<ClassDefinition>,
}

impl ClassStore for ClassTable {
  fn get(&self, id: ClassId) -> Option<&ClassDefinition> {
    (id as usize)
      .checked_sub(1)
      .and_then(|index| self.classes.get(index))
  }

  fn by_name(&self, name: &str) -> Option<&ClassDefinition> {
    self.by_name.get(name).and_then(|&id| self.get(id))
  }

  fn for_each_class(&self, mut visit: impl FnMut(&ClassDefinition)) {
    self.classes.iter().for_each(|class| visit(class));
  }

  fn len(&self) -> usize {
    self.classes.len()
  }
}

/// Fully in-memory heap: both the `ObjectNavigator` and the `ClassStore`.
#[derive(Debug, Clone)]
pub struct HeapGraph {
  classes: Arc<ClassTable>,
  current: Option<usize>,
  objects: Vec<ObjectRecord>,
  resolution: ReferenceResolution,
  roots: Vec<GcRoot>,
  synthetic_tree: Option<SyntheticTree>,
}

impl HeapGraph {
  #[must_use]
  pub fn builder() -> HeapGraphBuilder {
    HeapGraphBuilder::default()
  }

  /// # Errors
  ///
  /// Returns an error if the graph references classes that do not exist or
  /// if the object count does not fit an `ObjectId`.
  pub fn from_data(data: HeapGraphData) -> Result<Self, AnalysisError> {
    let HeapGraphData {
      mut classes,
      objects,
      roots,
      synthetic_tree,
    } = data;

    if u32::try_from(objects.len()).is_err()
      || u32::try_from(classes.len()).is_err()
    {
      return Err(AnalysisError::InvalidGraph(
        "too many objects or classes".to_string(),
      ));
    }

    let mut by_name = HashMap::with_capacity(classes.len());
    for (index, class) in classes.iter_mut().enumerate() {
      class.id = index as ClassId + 1;
      by_name.insert(class.name.clone(), class.id);
    }

    if let Some((index, record)) = objects
      .iter()
      .enumerate()
      .find(|(_, record)| record.class == 0 || record.class as usize > classes.len())
    {
      return Err(AnalysisError::InvalidGraph(format!(
        "object {} refers to unknown class {}",
        index + 1,
        record.class
      )));
    }

    let synthetic_tree = synthetic_tree.map(|data| {
      let mut tree = SyntheticTree::new(data.sentinel);
      for (parent, child) in data.edges {
        tree.add_child(parent, child);
      }
      tree
    });

    Ok(Self {
      classes: Arc::new(ClassTable { by_name, classes }),
      current: None,
      objects,
      resolution: ReferenceResolution::AllReferences,
      roots,
      synthetic_tree,
    })
  }

  /// # Errors
  ///
  /// Returns an error if the JSON is malformed or describes an invalid graph.
  pub fn from_json<R: Read>(reader: R) -> Result<Self, AnalysisError> {
    Self::from_data(serde_json::from_reader(reader)?)
  }

  /// # Errors
  ///
  /// Returns an error if the file cannot be read or is not a valid graph.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
    let file = File::open(path)?;
    Self::from_json(io::BufReader::new(file))
  }

  /// Shared handle to the class table.
  #[must_use]
  pub fn class_table(&self) -> Arc<ClassTable> {
    Arc::clone(&self.classes)
  }

  #[must_use]
  pub fn synthetic_tree(&self) -> Option<&SyntheticTree> {
    self.synthetic_tree.as_ref()
  }

  pub fn take_synthetic_tree(&mut self) -> Option<SyntheticTree> {
    self.synthetic_tree.take()
  }

  fn record(&self) -> Option<&ObjectRecord> {
    self.current.and_then(|index| self.objects.get(index))
  }

  fn referent(&self, strength: ReferentStrength) -> ObjectId {
    self
      .record()
      .and_then(|record| {
        let slot = record.referent.filter(|slot| slot.strength == strength)?;
        record.references.get(slot.slot).copied()
      })
      .unwrap_or(0)
  }
}

impl ObjectNavigator for HeapGraph {
  fn instance_count(&self) -> u32 {
    // Checked in `from_data`.
    self.objects.len() as u32
  }

  fn go_to(&mut self, id: ObjectId, resolution: ReferenceResolution) {
    self.current = (id as usize)
      .checked_sub(1)
      .filter(|&index| index < self.objects.len());
    self.resolution = resolution;
  }

  fn class(&self) -> ClassId {
    self.record().map_or(0, |record| record.class)
  }

  fn object_size(&self) -> u32 {
    self.record().map_or(0, |record| record.size)
  }

  fn copy_references_to(&self, references: &mut Vec<ObjectId>) {
    references.clear();
    let Some(record) = self.record() else {
      return;
    };
    references.extend_from_slice(&record.references);

    if self.resolution == ReferenceResolution::OnlyStrongReferences {
      if let Some(slot) = record.referent {
        if let Some(reference) = references.get_mut(slot.slot) {
          *reference = 0;
        }
      }
    }
  }

  fn soft_reference_id(&self) -> ObjectId {
    self.referent(ReferentStrength::Soft)
  }

  fn weak_reference_id(&self) -> ObjectId {
    self.referent(ReferentStrength::Weak)
  }

  fn soft_weak_reference_index(&self) -> usize {
    self
      .record()
      .and_then(|record| record.referent)
      .map_or(0, |slot| slot.slot)
  }

  fn roots(&self) -> Box<dyn Iterator<Item = GcRoot> + '_> {
    Box::new(self.roots.iter().copied())
  }
}

impl ClassStore for HeapGraph {
  fn get(&self, id: ClassId) -> Option<&ClassDefinition> {
    self.classes.get(id)
  }

  fn by_name(&self, name: &str) -> Option<&ClassDefinition> {
    self.classes.by_name(name)
  }

  fn for_each_class(&self, visit: impl FnMut(&ClassDefinition)) {
    self.classes.for_each_class(visit);
  }

  fn len(&self) -> usize {
    self.classes.len()
  }
}

/// Incremental construction of a `HeapGraph`, mainly for tests and demos.
#[derive(Debug, Default)]
pub struct HeapGraphBuilder {
  data: HeapGraphData,
}

impl HeapGraphBuilder {
  /// Register a class (or return the existing one with that name).
  pub fn class(&mut self, name: &str) -> ClassId {
    if let Some(index) = self
      .data
      .classes
      .iter()
      .position(|class| class.name == name)
    {
      return index as ClassId + 1;
    }

    let id = self.data.classes.len() as ClassId + 1;
    self.data.classes.push(ClassDefinition {
      id,
      name: name.to_string(),
      object_id: 0,
      static_fields: Vec::new(),
      constant_fields: Vec::new(),
    });
    id
  }

  pub fn object(&mut self, class: ClassId, size: u32) -> ObjectId {
    self.data.objects.push(ObjectRecord {
      class,
      size,
      references: Vec::new(),
      referent: None,
    });
    self.data.objects.len() as ObjectId
  }

  pub fn reference(&mut self, from: ObjectId, to: ObjectId) -> &mut Self {
    self.record_mut(from).references.push(to);
    self
  }

  /// Make `holder` a soft (or weak) reference whose referent is `referent`.
  pub fn referent(
    &mut self,
    holder: ObjectId,
    referent: ObjectId,
    strength: ReferentStrength,
  ) -> &mut Self {
    let record = self.record_mut(holder);
    record.referent = Some(ReferentSlot {
      strength,
      slot: record.references.len(),
    });
    record.references.push(referent);
    self
  }

  pub fn root(&mut self, id: ObjectId) -> &mut Self {
    self.data.roots.push(GcRoot::new(id));
    self
  }

  pub fn stack_root(&mut self, id: ObjectId) -> &mut Self {
    self.data.roots.push(GcRoot::stack_frame(id));
    self
  }

  pub fn static_field(&mut self, class: ClassId, id: ObjectId) -> &mut Self {
    self.data.classes[class as usize - 1].static_fields.push(id);
    self
  }

  pub fn synthetic_sentinel(&mut self, sentinel: ObjectId) -> &mut Self {
    self
      .data
      .synthetic_tree
      .get_or_insert_with(SyntheticTreeData::default)
      .sentinel = sentinel;
    self
  }

  pub fn synthetic_child(
    &mut self,
    parent: ObjectId,
    child: ObjectId,
  ) -> &mut Self {
    self
      .data
      .synthetic_tree
      .get_or_insert_with(SyntheticTreeData::default)
      .edges
      .push((parent, child));
    self
  }

  fn record_mut(&mut self, id: ObjectId) -> &mut ObjectRecord {
    &mut self.data.objects[id as usize - 1]
  }

  /// # Errors
  ///
  /// Returns an error if an object refers to a class that was never
  /// registered.
  pub fn finish(self) -> Result<HeapGraph, AnalysisError> {
    HeapGraph::from_data(self.data)
  }
}
