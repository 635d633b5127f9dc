//! Tables on disk: CSV, record-oriented JSON and the fetch metadata sidecar.
//!
//! Every file is written to a temporary file in its final directory and then
//! renamed over the old one, so readers never see half a table.

use std::{
    collections::HashMap,
    fmt,
    fs::{self, File},
    io::{BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{
    de::{MapAccess, SeqAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::Value as JsonValue;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::{
    error::StoreError,
    freshness::{FetchMetadata, LocalState},
    table::{Table, Value},
};

/// The files belonging to one dataset, `<dir>/<stem>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetFiles {
    dir: PathBuf,
    stem: String,
}

impl DatasetFiles {
    pub fn new(dir: impl Into<PathBuf>, stem: &str) -> Self {
        DatasetFiles {
            dir: dir.into(),
            stem: stem.to_string(),
        }
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    fn with_extension(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.stem, extension))
    }

    pub fn csv(&self) -> PathBuf {
        self.with_extension("csv")
    }

    pub fn json(&self) -> PathBuf {
        self.with_extension("json")
    }

    pub fn meta(&self) -> PathBuf {
        self.with_extension("meta.json")
    }

    pub fn parquet(&self) -> PathBuf {
        self.with_extension("parquet")
    }

    /// What the freshness check needs to know about the local copy.
    pub fn local_state(&self) -> LocalState {
        let metadata = match read_metadata(&self.meta()) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable metadata for {}", self.stem);
                None
            }
        };
        LocalState {
            data_present: self.csv().is_file(),
            metadata,
        }
    }
}

/// Replaces `path` with `bytes` in one rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| publish_permissions(tmp.as_file()))
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;

    debug!(bytes = bytes.len(), "wrote {}", path.display());
    Ok(())
}

/// Saved data files are world-readable, unlike a fresh temp file.
#[cfg(unix)]
fn publish_permissions(file: &File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn publish_permissions(_file: &File) -> std::io::Result<()> {
    Ok(())
}

pub fn write_csv(table: &Table, path: &Path) -> Result<(), StoreError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(Value::to_string))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| StoreError::io(path, e.into_error()))?;

    write_atomic(path, &bytes)
}

/// Reads a CSV written by [`write_csv`], inferring integer, float or text per cell.
pub fn read_csv(path: &Path) -> Result<Table, StoreError> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut reader = csv::Reader::from_reader(BufReader::new(file));

    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut table = Table::new(columns);
    for record in reader.records() {
        let record = record?;
        table.push_row(record.iter().map(Value::infer).collect())?;
    }

    Ok(table)
}

struct Cell<'a>(&'a Value);

impl Serialize for Cell<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Text(s) => serializer.serialize_str(s),
            Value::Integer(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Null => serializer.serialize_unit(),
        }
    }
}

/// One row as a JSON object with keys in column order.
struct Record<'a> {
    columns: &'a [String],
    row: &'a [Value],
}

impl Serialize for Record<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(self.row) {
            map.serialize_entry(column, &Cell(value))?;
        }
        map.end()
    }
}

/// Writes the table as an array of objects, one per row.
pub fn write_json(table: &Table, path: &Path) -> Result<(), StoreError> {
    let records: Vec<Record> = table
        .rows()
        .iter()
        .map(|row| Record {
            columns: table.columns(),
            row,
        })
        .collect();
    let mut bytes = serde_json::to_vec_pretty(&records)?;
    bytes.push(b'\n');

    write_atomic(path, &bytes)
}

/// A JSON object with its keys in document order.
struct OrderedObject(Vec<(String, JsonValue)>);

impl<'de> Deserialize<'de> for OrderedObject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ObjectVisitor;

        impl<'de> Visitor<'de> for ObjectVisitor {
            type Value = OrderedObject;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry()? {
                    entries.push(entry);
                }
                Ok(OrderedObject(entries))
            }
        }

        deserializer.deserialize_map(ObjectVisitor)
    }
}

struct Records(Vec<OrderedObject>);

impl<'de> Deserialize<'de> for Records {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordsVisitor;

        impl<'de> Visitor<'de> for RecordsVisitor {
            type Value = Records;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an array of records")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut records = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(record) = seq.next_element()? {
                    records.push(record);
                }
                Ok(Records(records))
            }
        }

        deserializer.deserialize_seq(RecordsVisitor)
    }
}

fn json_cell(value: Option<&JsonValue>) -> Value {
    match value {
        None | Some(JsonValue::Null) => Value::Null,
        Some(JsonValue::String(s)) => Value::Text(s.clone()),
        Some(JsonValue::Number(n)) => match n.as_i64() {
            Some(v) => Value::Integer(v),
            None => Value::from(n.as_f64()),
        },
        Some(other) => Value::Text(other.to_string()),
    }
}

/// Reads a file written by [`write_json`]. Columns come from the keys in the
/// order they are first seen; missing keys read as null.
pub fn read_json(path: &Path) -> Result<Table, StoreError> {
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    let Records(records) = serde_json::from_slice(&bytes)?;

    let mut columns: Vec<String> = Vec::new();
    for OrderedObject(entries) in &records {
        for (key, _) in entries {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut table = Table::new(columns.clone());
    for OrderedObject(entries) in &records {
        let row = columns
            .iter()
            .map(|column| json_cell(entries.iter().find(|(k, _)| k == column).map(|(_, v)| v)))
            .collect();
        table.push_row(row)?;
    }

    Ok(table)
}

pub fn write_metadata(metadata: &FetchMetadata, path: &Path) -> Result<(), StoreError> {
    let mut bytes = serde_json::to_vec_pretty(metadata)?;
    bytes.push(b'\n');
    write_atomic(path, &bytes)
}

/// `Ok(None)` when no sidecar has been written yet.
pub fn read_metadata(path: &Path) -> Result<Option<FetchMetadata>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Writes every format of a freshly fetched table, sidecar last.
pub fn save_dataset(
    files: &DatasetFiles,
    table: &Table,
    metadata: &FetchMetadata,
    with_parquet: bool,
) -> Result<(), StoreError> {
    write_csv(table, &files.csv())?;
    write_json(table, &files.json())?;
    if with_parquet {
        crate::parquet::save_table(table, &files.parquet())?;
    }
    write_metadata(metadata, &files.meta())?;

    info!(
        rows = table.len(),
        columns = table.columns().len(),
        "saved {} to {}",
        files.stem(),
        files.csv().display()
    );
    Ok(())
}

/// Reads the CSV copy of a dataset, or its JSON copy when there is no CSV.
pub fn read_table(files: &DatasetFiles) -> Result<Table, StoreError> {
    let csv = files.csv();
    let json = files.json();
    if !csv.is_file() && json.is_file() {
        debug!("loading {}", json.display());
        return read_json(&json);
    }
    debug!("loading {}", csv.display());
    read_csv(&csv)
}

struct CacheEntry {
    metadata: Option<FetchMetadata>,
    table: Arc<Table>,
}

/// Loaded tables, reused until their sidecar metadata changes.
#[derive(Default)]
pub struct TableCache {
    entries: HashMap<DatasetFiles, CacheEntry>,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, files: &DatasetFiles) -> Result<Arc<Table>, StoreError> {
        let metadata = read_metadata(&files.meta())?;

        if let Some(entry) = self.entries.get(files) {
            if entry.metadata == metadata {
                debug!("cache hit for {}", files.stem());
                return Ok(Arc::clone(&entry.table));
            }
        }

        // a failed reload must not leave the old table behind
        self.invalidate(files);
        let table = Arc::new(read_table(files)?);
        self.entries.insert(
            files.clone(),
            CacheEntry {
                metadata,
                table: Arc::clone(&table),
            },
        );
        Ok(table)
    }

    pub fn invalidate(&mut self, files: &DatasetFiles) {
        self.entries.remove(files);
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Table {
        let mut table = Table::new(["TIME_PERIOD", "REF_AREA", "CO2_Emissions", "Group"]);
        table
            .push_row(vec![
                Value::Text("2019-01".into()),
                Value::Text("USA".into()),
                Value::Float(123.4),
                Value::Text("OECD Country".into()),
            ])
            .unwrap();
        table
            .push_row(vec![
                Value::Text("2019-02".into()),
                Value::Text("FRA".into()),
                Value::Float(5.0),
                Value::Text("OECD Country".into()),
            ])
            .unwrap();
        table
            .push_row(vec![
                Value::Text("2019-03".into()),
                Value::Text("DEU".into()),
                Value::Null,
                Value::Text("OECD Country".into()),
            ])
            .unwrap();
        table
    }

    fn metadata(etag: &str) -> FetchMetadata {
        FetchMetadata {
            etag: Some(etag.into()),
            content_length: 10,
            ..Default::default()
        }
    }

    #[test]
    fn should_round_trip_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.csv");

        write_csv(&sample(), &path).unwrap();
        let table = read_csv(&path).unwrap();

        assert_eq!(table, sample());
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("TIME_PERIOD,REF_AREA,CO2_Emissions,Group\n"));
        assert!(text.contains("2019-02,FRA,5.0,OECD Country"));
        assert!(text.contains("2019-03,DEU,,OECD Country"));
    }

    #[test]
    fn should_round_trip_json_in_column_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.json");

        write_json(&sample(), &path).unwrap();
        let table = read_json(&path).unwrap();

        assert_eq!(table.columns(), sample().columns());
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows()[1][2], Value::Float(5.0));
        assert_eq!(table.rows()[2][2], Value::Null);
    }

    #[test]
    fn should_fill_missing_json_keys_with_null() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.json");
        fs::write(&path, r#"[{"b": 1, "a": "x"}, {"a": "y", "c": 2.5}]"#).unwrap();

        let table = read_json(&path).unwrap();

        assert_eq!(table.columns(), ["b", "a", "c"]);
        assert_eq!(
            table.rows()[1],
            vec![Value::Null, Value::Text("y".into()), Value::Float(2.5)]
        );
    }

    #[test]
    fn should_rewrite_identical_bytes() {
        let dir = tempdir().unwrap();
        let files = DatasetFiles::new(dir.path(), "maritime_world_total");

        save_dataset(&files, &sample(), &metadata("a"), false).unwrap();
        let first_csv = fs::read(files.csv()).unwrap();
        let first_json = fs::read(files.json()).unwrap();
        save_dataset(&files, &sample(), &metadata("a"), false).unwrap();

        assert_eq!(fs::read(files.csv()).unwrap(), first_csv);
        assert_eq!(fs::read(files.json()).unwrap(), first_json);
        assert!(!files.parquet().exists());
    }

    #[test]
    fn should_leave_no_temp_files_behind() {
        let dir = tempdir().unwrap();
        let files = DatasetFiles::new(dir.path().join("nested"), "t");

        save_dataset(&files, &sample(), &metadata("a"), false).unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, ["t.csv", "t.json", "t.meta.json"]);
    }

    #[test]
    fn should_round_trip_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.meta.json");
        assert!(read_metadata(&path).unwrap().is_none());

        write_metadata(&metadata("abc"), &path).unwrap();

        assert_eq!(read_metadata(&path).unwrap(), Some(metadata("abc")));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"fetch_timestamp\""));
        assert!(!text.contains("synthetic"));
    }

    #[test]
    fn should_report_local_state() {
        let dir = tempdir().unwrap();
        let files = DatasetFiles::new(dir.path(), "t");
        assert!(!files.local_state().data_present);

        save_dataset(&files, &sample(), &metadata("abc"), false).unwrap();

        let state = files.local_state();
        assert!(state.data_present);
        assert_eq!(state.metadata.unwrap().etag.as_deref(), Some("abc"));
    }

    #[test]
    fn should_reuse_cached_table_until_metadata_changes() {
        let dir = tempdir().unwrap();
        let files = DatasetFiles::new(dir.path(), "t");
        save_dataset(&files, &sample(), &metadata("a"), false).unwrap();
        let mut cache = TableCache::new();

        let first = cache.load(&files).unwrap();
        // data changes underneath without new metadata
        write_csv(&Table::new(["x"]), &files.csv()).unwrap();
        let second = cache.load(&files).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        write_metadata(&metadata("b"), &files.meta()).unwrap();
        let third = cache.load(&files).unwrap();
        assert_eq!(third.columns(), ["x"]);
    }

    #[test]
    fn should_reload_after_invalidate() {
        let dir = tempdir().unwrap();
        let files = DatasetFiles::new(dir.path(), "t");
        save_dataset(&files, &sample(), &metadata("a"), false).unwrap();
        let mut cache = TableCache::new();

        let first = cache.load(&files).unwrap();
        cache.invalidate(&files);
        let second = cache.load(&files).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*first, *second);
    }

    #[cfg(unix)]
    #[test]
    fn should_write_world_readable_files() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let files = DatasetFiles::new(dir.path(), "t");
        save_dataset(&files, &sample(), &metadata("a"), false).unwrap();

        for path in [files.csv(), files.json(), files.meta()] {
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o644, "{}", path.display());
        }
    }

    #[test]
    fn should_load_json_copy_when_csv_is_gone() {
        let dir = tempdir().unwrap();
        let files = DatasetFiles::new(dir.path(), "t");
        save_dataset(&files, &sample(), &metadata("a"), false).unwrap();
        fs::remove_file(files.csv()).unwrap();
        let mut cache = TableCache::new();

        let table = cache.load(&files).unwrap();

        assert_eq!(*table, sample());
    }

    #[test]
    fn should_drop_stale_entry_when_reload_fails() {
        let dir = tempdir().unwrap();
        let files = DatasetFiles::new(dir.path(), "t");
        save_dataset(&files, &sample(), &metadata("a"), false).unwrap();
        let mut cache = TableCache::new();
        cache.load(&files).unwrap();

        fs::remove_file(files.csv()).unwrap();
        fs::remove_file(files.json()).unwrap();
        write_metadata(&metadata("b"), &files.meta()).unwrap();

        assert!(cache.load(&files).is_err());
        assert!(cache.entries.is_empty());
    }

    #[test]
    fn should_fail_on_missing_file() {
        let dir = tempdir().unwrap();
        let err = read_csv(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
