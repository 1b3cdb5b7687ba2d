//! Columnar event datasets made of weighted sources.
//!
//! A [`Dataset`] is an ordered chain of [`Source`]s sharing one [`Schema`].
//! Each source carries its own normalization factor. Sources either hold
//! their columns in memory or point at a JSON payload that is read when a
//! [`Cursor`] first reaches them, the way a chain of ntuple files is opened
//! one file at a time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tf_core::{Error, Result};

/// Storage class of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// One value per row.
    Scalar,
    /// A variable number of values per row.
    Jagged,
}

/// A named field of the dataset schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name, as referenced by expressions.
    pub name: String,
    /// Storage class.
    pub kind: FieldKind,
}

/// Ordered set of fields shared by all sources of a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scalar field (builder style). A duplicate name keeps the first
    /// declaration and logs a warning.
    pub fn scalar(mut self, name: &str) -> Self {
        self.push_or_warn(name, FieldKind::Scalar);
        self
    }

    /// Add a jagged field (builder style). A duplicate name keeps the first
    /// declaration and logs a warning.
    pub fn jagged(mut self, name: &str) -> Self {
        self.push_or_warn(name, FieldKind::Jagged);
        self
    }

    fn push_or_warn(&mut self, name: &str, kind: FieldKind) {
        if let Err(e) = self.push(name, kind) {
            tracing::warn!(field = name, ?kind, error = %e, "duplicate schema field ignored");
        }
    }

    /// Add a field, failing on a duplicate name.
    pub fn push(&mut self, name: &str, kind: FieldKind) -> Result<usize> {
        if self.index_of(name).is_some() {
            return Err(Error::Configuration(format!("duplicate field '{name}'")));
        }
        self.fields.push(Field { name: name.to_string(), kind });
        Ok(self.fields.len() - 1)
    }

    /// Position of field `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Field at position `index`.
    pub fn field(&self, index: usize) -> &Field {
        &self.fields[index]
    }

    /// All fields.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<Field> for Schema {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        let mut schema = Schema::new();
        for f in iter {
            schema.push_or_warn(&f.name, f.kind);
        }
        schema
    }
}

/// Jagged column: variable-length per-row values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JaggedCol {
    /// Flat array of all values across all rows.
    pub flat: Vec<f64>,
    /// Row boundaries: `offsets.len() == n_entries + 1`.
    pub offsets: Vec<usize>,
}

impl JaggedCol {
    /// Build from one vector per row.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        offsets.push(0);
        let mut flat = Vec::new();
        for row in rows {
            flat.extend(row);
            offsets.push(flat.len());
        }
        Self { flat, offsets }
    }

    /// Values of row `row`.
    #[inline]
    pub fn row(&self, row: usize) -> &[f64] {
        &self.flat[self.offsets[row]..self.offsets[row + 1]]
    }

    /// Get element `index` of row `row`. Returns `oor` for out-of-range.
    pub fn get(&self, row: usize, index: usize, oor: f64) -> f64 {
        self.row(row).get(index).copied().unwrap_or(oor)
    }

    /// Number of rows.
    pub fn n_entries(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }
}

/// Values of one field for all rows of a source.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// One value per row.
    Scalar(Vec<f64>),
    /// Variable-length values per row.
    Jagged(JaggedCol),
}

impl Column {
    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            Column::Scalar(v) => v.len(),
            Column::Jagged(j) => j.n_entries(),
        }
    }

    /// `true` if the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Storage class.
    pub fn kind(&self) -> FieldKind {
        match self {
            Column::Scalar(_) => FieldKind::Scalar,
            Column::Jagged(_) => FieldKind::Jagged,
        }
    }
}

impl From<Vec<f64>> for Column {
    fn from(v: Vec<f64>) -> Self {
        Column::Scalar(v)
    }
}

impl From<Vec<Vec<f64>>> for Column {
    fn from(rows: Vec<Vec<f64>>) -> Self {
        Column::Jagged(JaggedCol::from_rows(rows))
    }
}

/// Columns of one source, in schema order.
#[derive(Debug, Clone)]
pub struct SourceData {
    entries: usize,
    columns: Vec<Column>,
}

impl SourceData {
    /// Align named columns to `schema`, checking kinds and lengths.
    ///
    /// Columns that are not part of the schema are ignored.
    pub fn from_columns<S, I>(schema: &Schema, columns: I) -> Result<Self>
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Column)>,
    {
        let mut named: HashMap<String, Column> =
            columns.into_iter().map(|(n, c)| (n.into(), c)).collect();
        let mut aligned = Vec::with_capacity(schema.len());
        let mut entries: Option<usize> = None;
        for field in schema.fields() {
            let col = named.remove(&field.name).ok_or_else(|| {
                Error::Deserialization(format!("missing column '{}'", field.name))
            })?;
            if col.kind() != field.kind {
                return Err(Error::Deserialization(format!(
                    "column '{}' is {:?}, schema declares {:?}",
                    field.name,
                    col.kind(),
                    field.kind
                )));
            }
            match entries {
                None => entries = Some(col.len()),
                Some(n) if n != col.len() => {
                    return Err(Error::Deserialization(format!(
                        "column '{}' has {} rows, expected {}",
                        field.name,
                        col.len(),
                        n
                    )));
                }
                Some(_) => {}
            }
            aligned.push(col);
        }
        if !named.is_empty() {
            let mut extra: Vec<&String> = named.keys().collect();
            extra.sort();
            tracing::debug!(?extra, "ignoring columns not declared in the schema");
        }
        Ok(Self { entries: entries.unwrap_or(0), columns: aligned })
    }

    /// Number of rows.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// View of row `index`.
    #[inline]
    pub fn row(&self, index: usize) -> Row<'_> {
        Row { data: self, index }
    }
}

/// Read-only view of one row.
#[derive(Clone, Copy)]
pub struct Row<'a> {
    data: &'a SourceData,
    index: usize,
}

impl<'a> Row<'a> {
    /// Scalar value of `field`. A jagged field yields its first element, or
    /// `0.0` when the row is empty.
    #[inline]
    pub fn scalar(&self, field: usize) -> f64 {
        match &self.data.columns[field] {
            Column::Scalar(v) => v[self.index],
            Column::Jagged(j) => j.get(self.index, 0, 0.0),
        }
    }

    /// Values of `field` for this row.
    #[inline]
    pub fn array(&self, field: usize) -> &'a [f64] {
        match &self.data.columns[field] {
            Column::Scalar(v) => std::slice::from_ref(&v[self.index]),
            Column::Jagged(j) => j.row(self.index),
        }
    }
}

#[derive(Debug, Clone)]
enum Payload {
    Loaded(Arc<SourceData>),
    File(PathBuf),
}

/// One physical source of rows with its normalization factor.
#[derive(Debug, Clone)]
pub struct Source {
    name: String,
    weight: f64,
    entries: u64,
    payload: Payload,
}

impl Source {
    /// Source name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalization factor applied to every row of this source.
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Declared number of rows.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Payload file, for sources read lazily.
    pub fn path(&self) -> Option<&Path> {
        match &self.payload {
            Payload::File(p) => Some(p),
            Payload::Loaded(_) => None,
        }
    }

    fn load(&self, schema: &Schema) -> Result<Arc<SourceData>> {
        match &self.payload {
            Payload::Loaded(data) => Ok(Arc::clone(data)),
            Payload::File(path) => {
                let data = read_payload(path, schema).map_err(|e| match e {
                    Error::Io(io) => Error::Io(std::io::Error::new(
                        io.kind(),
                        format!("source '{}' ({}): {io}", self.name, path.display()),
                    )),
                    Error::Deserialization(msg) => Error::Deserialization(format!(
                        "source '{}' ({}): {msg}",
                        self.name,
                        path.display()
                    )),
                    other => other,
                })?;
                if data.entries() as u64 != self.entries {
                    return Err(Error::Deserialization(format!(
                        "source '{}' ({}): {} rows, manifest declares {}",
                        self.name,
                        path.display(),
                        data.entries(),
                        self.entries
                    )));
                }
                Ok(Arc::new(data))
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColumnRepr {
    Scalar(Vec<f64>),
    Jagged(Vec<Vec<f64>>),
}

#[derive(Deserialize)]
struct PayloadFile {
    columns: HashMap<String, ColumnRepr>,
}

fn read_payload(path: &Path, schema: &Schema) -> Result<SourceData> {
    let bytes = std::fs::read(path)?;
    let file: PayloadFile = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Deserialization(format!("invalid payload: {e}")))?;
    let columns = file.columns.into_iter().map(|(name, repr)| {
        let col = match repr {
            // `[]` parses as an empty scalar column either way.
            ColumnRepr::Scalar(v) if v.is_empty() => match schema.index_of(&name) {
                Some(i) if schema.field(i).kind == FieldKind::Jagged => {
                    Column::Jagged(JaggedCol::from_rows(Vec::new()))
                }
                _ => Column::Scalar(v),
            },
            ColumnRepr::Scalar(v) => Column::Scalar(v),
            ColumnRepr::Jagged(rows) => Column::from(rows),
        };
        (name, col)
    });
    SourceData::from_columns(schema, columns)
}

#[derive(Deserialize)]
struct Manifest {
    fields: Vec<Field>,
    sources: Vec<ManifestSource>,
}

#[derive(Deserialize)]
struct ManifestSource {
    name: String,
    path: PathBuf,
    #[serde(default = "unit_weight")]
    weight: f64,
    entries: u64,
}

fn unit_weight() -> f64 {
    1.0
}

/// An ordered chain of sources sharing one schema.
#[derive(Debug, Clone)]
pub struct Dataset {
    schema: Schema,
    sources: Vec<Source>,
    /// `starts[i]` is the first global row of source `i`; the last element is the total.
    starts: Vec<u64>,
}

impl Dataset {
    /// Empty dataset with the given schema.
    pub fn new(schema: Schema) -> Self {
        Self { schema, sources: Vec::new(), starts: vec![0] }
    }

    /// Read a YAML/JSON manifest declaring the schema and file-backed sources.
    ///
    /// Payload paths are resolved relative to the manifest directory. Payloads
    /// are not opened here.
    pub fn from_manifest(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let manifest: Manifest = serde_yaml_ng::from_slice(&bytes)?;
        let mut schema = Schema::new();
        for f in &manifest.fields {
            schema.push(&f.name, f.kind)?;
        }
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut ds = Dataset::new(schema);
        for s in manifest.sources {
            ds.add_file_source(s.name, base.join(s.path), s.weight, s.entries);
        }
        tracing::debug!(
            manifest = %path.display(),
            sources = ds.sources.len(),
            entries = ds.entries(),
            "dataset manifest loaded"
        );
        Ok(ds)
    }

    /// Append an in-memory source.
    pub fn add_source<S, I>(&mut self, name: impl Into<String>, weight: f64, columns: I) -> Result<()>
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Column)>,
    {
        let name = name.into();
        let data = SourceData::from_columns(&self.schema, columns)
            .map_err(|e| Error::Configuration(format!("source '{name}': {e}")))?;
        let entries = data.entries() as u64;
        self.push(Source { name, weight, entries, payload: Payload::Loaded(Arc::new(data)) });
        Ok(())
    }

    /// Append a source whose payload is read from `path` when first reached.
    pub fn add_file_source(
        &mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        weight: f64,
        entries: u64,
    ) {
        self.push(Source { name: name.into(), weight, entries, payload: Payload::File(path.into()) });
    }

    fn push(&mut self, source: Source) {
        let total = self.entries() + source.entries;
        self.sources.push(source);
        self.starts.push(total);
    }

    /// Shared schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Total number of rows over all sources.
    pub fn entries(&self) -> u64 {
        self.starts[self.starts.len() - 1]
    }

    /// Sources in scan order.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// One single-source dataset per source, for partitioned processing.
    pub fn split_sources(&self) -> Vec<Dataset> {
        self.sources
            .iter()
            .map(|s| {
                let mut ds = Dataset::new(self.schema.clone());
                ds.push(s.clone());
                ds
            })
            .collect()
    }

    /// A fresh cursor positioned before the first row.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor { dataset: self, current: None, data: None, start: 0, end: 0 }
    }
}

/// Sequential reader over a dataset, tracking the active source.
pub struct Cursor<'d> {
    dataset: &'d Dataset,
    current: Option<usize>,
    data: Option<Arc<SourceData>>,
    start: u64,
    end: u64,
}

impl<'d> Cursor<'d> {
    /// Position the cursor at global row `entry`.
    ///
    /// Returns `true` if the active source changed since the previous call.
    /// Reaching a file-backed source reads its payload; a failure there is
    /// returned as an I/O error.
    pub fn load(&mut self, entry: u64) -> Result<bool> {
        if self.data.is_some() && entry >= self.start && entry < self.end {
            return Ok(false);
        }
        let ds = self.dataset;
        if entry >= ds.entries() {
            return Err(Error::Configuration(format!(
                "entry {entry} out of range ({} rows)",
                ds.entries()
            )));
        }
        let idx = ds.starts[..ds.sources.len()].partition_point(|&s| s <= entry) - 1;
        let switched = self.current != Some(idx);
        let source = &ds.sources[idx];
        // Drop the previous payload before reading the next one.
        self.data = None;
        self.data = Some(source.load(&ds.schema)?);
        self.current = Some(idx);
        self.start = ds.starts[idx];
        self.end = ds.starts[idx + 1];
        Ok(switched)
    }

    /// Index of the active source.
    pub fn source_index(&self) -> Option<usize> {
        self.current
    }

    /// The active source.
    pub fn source(&self) -> Option<&'d Source> {
        self.current.map(|i| &self.dataset.sources[i])
    }

    /// Normalization factor of the active source (`1.0` before the first load).
    pub fn source_weight(&self) -> f64 {
        self.source().map_or(1.0, Source::weight)
    }

    /// View of global row `entry`, or `None` if it is outside the loaded source.
    pub fn row(&self, entry: u64) -> Option<Row<'_>> {
        let data = self.data.as_deref()?;
        if entry < self.start || entry >= self.end {
            return None;
        }
        Some(data.row((entry - self.start) as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_source_dataset() -> Dataset {
        let schema = Schema::new().scalar("a").jagged("jets");
        let mut ds = Dataset::new(schema);
        ds.add_source(
            "first",
            2.0,
            vec![
                ("a", Column::from(vec![1.0, 2.0])),
                ("jets", Column::from(vec![vec![10.0, 20.0], vec![]])),
            ],
        )
        .unwrap();
        ds.add_source(
            "second",
            0.5,
            vec![("jets", Column::from(vec![vec![30.0]])), ("a", Column::from(vec![3.0]))],
        )
        .unwrap();
        ds
    }

    #[test]
    fn schema_lookup_and_duplicates() {
        let mut schema = Schema::new().scalar("pt_1").jagged("jet_pt").scalar("pt_1");
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.index_of("jet_pt"), Some(1));
        assert!(schema.push("pt_1", FieldKind::Scalar).is_err());

        let collected: Schema = [
            Field { name: "dm_2".into(), kind: FieldKind::Scalar },
            Field { name: "dm_2".into(), kind: FieldKind::Jagged },
        ]
        .into_iter()
        .collect();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected.field(0).kind, FieldKind::Scalar);
    }

    #[test]
    fn jagged_rows() {
        let j = JaggedCol::from_rows(vec![vec![1.0, 2.0], vec![], vec![3.0]]);
        assert_eq!(j.offsets, vec![0, 2, 2, 3]);
        assert_eq!(j.row(0), &[1.0, 2.0]);
        assert!(j.row(1).is_empty());
        assert_eq!(j.get(2, 0, -1.0), 3.0);
        assert_eq!(j.get(2, 5, -1.0), -1.0);
        assert_eq!(j.n_entries(), 3);
    }

    #[test]
    fn cursor_reports_source_switches() {
        let ds = two_source_dataset();
        assert_eq!(ds.entries(), 3);
        let mut cur = ds.cursor();
        assert_eq!(cur.source_index(), None);
        assert_eq!(cur.source_weight(), 1.0);
        assert!(cur.load(0).unwrap());
        assert_eq!(cur.source_index(), Some(0));
        assert_eq!(cur.source_weight(), 2.0);
        assert_eq!(cur.row(0).unwrap().scalar(0), 1.0);
        assert_eq!(cur.row(0).unwrap().array(1), &[10.0, 20.0]);
        assert!(!cur.load(1).unwrap());
        assert_eq!(cur.row(1).unwrap().scalar(1), 0.0);
        assert!(cur.load(2).unwrap());
        assert_eq!(cur.source_index(), Some(1));
        assert_eq!(cur.source().unwrap().name(), "second");
        assert_eq!(cur.source_weight(), 0.5);
        assert_eq!(cur.row(2).unwrap().scalar(0), 3.0);
        assert!(cur.row(0).is_none());
        assert!(cur.load(3).is_err());
    }

    #[test]
    fn empty_sources_are_skipped() {
        let schema = Schema::new().scalar("a");
        let mut ds = Dataset::new(schema);
        ds.add_source("empty", 9.0, vec![("a", Column::from(Vec::<f64>::new()))]).unwrap();
        ds.add_source("full", 1.0, vec![("a", Column::from(vec![4.0]))]).unwrap();
        let mut cur = ds.cursor();
        cur.load(0).unwrap();
        assert_eq!(cur.source().unwrap().name(), "full");
    }

    #[test]
    fn add_source_validates_columns() {
        let schema = Schema::new().scalar("a").scalar("b");
        let mut ds = Dataset::new(schema);
        let missing = ds.add_source("s", 1.0, vec![("a", Column::from(vec![1.0]))]);
        assert!(matches!(missing, Err(Error::Configuration(_))));
        let ragged = ds.add_source(
            "s",
            1.0,
            vec![("a", Column::from(vec![1.0])), ("b", Column::from(vec![1.0, 2.0]))],
        );
        assert!(ragged.is_err());
        let wrong_kind = ds.add_source(
            "s",
            1.0,
            vec![("a", Column::from(vec![1.0])), ("b", Column::from(vec![vec![1.0]]))],
        );
        assert!(wrong_kind.is_err());
        assert!(ds.sources().is_empty());
    }

    #[test]
    fn split_sources_keeps_weights() {
        let ds = two_source_dataset();
        let parts = ds.split_sources();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].entries(), 2);
        assert_eq!(parts[1].entries(), 1);
        assert_eq!(parts[1].sources()[0].weight(), 0.5);
    }

    #[test]
    fn missing_payload_is_io_error() {
        let mut ds = Dataset::new(Schema::new().scalar("a"));
        ds.add_file_source("gone", "/nonexistent/tf-tree/payload.json", 1.0, 10);
        assert_eq!(
            ds.sources()[0].path(),
            Some(Path::new("/nonexistent/tf-tree/payload.json"))
        );
        let mut cur = ds.cursor();
        let err = cur.load(0).unwrap_err();
        assert!(err.is_io(), "{err}");
    }
}
