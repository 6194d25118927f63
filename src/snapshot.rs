use crate::{
    data::{AccountRecord, Error, Identifier},
    read::RecordSink,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{hash_map::Entry, HashMap},
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
};
use tracing::debug;

/// A point-in-time view of the directory. Records are keyed by identifier; nothing
/// mutates a snapshot once built, the next run simply produces a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Snapshot {
    pub name: String,
    pub taken_at: DateTime<Utc>,
    records: HashMap<Identifier, AccountRecord>,
}

/// Collects records while refusing duplicate identifiers. Silently keeping one of two
/// entries would skew every count derived from the snapshot, so a duplicate is an error.
#[derive(Debug, Default)]
pub(crate) struct SnapshotBuilder {
    records: HashMap<Identifier, AccountRecord>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self, name: impl Into<String>, taken_at: DateTime<Utc>) -> Snapshot {
        Snapshot {
            name: name.into(),
            taken_at,
            records: self.records,
        }
    }
}

impl RecordSink for SnapshotBuilder {
    fn push_record(&mut self, record: AccountRecord) -> Result<(), Error> {
        match self.records.entry(record.identifier.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateIdentifier(record.identifier)),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }
}

/// On-disk layout. Records are a list sorted by identifier rather than a map so the
/// file reads naturally and two saves of the same data are byte-identical.
#[derive(Serialize)]
struct SnapshotFileRef<'a> {
    name: &'a str,
    taken_at: DateTime<Utc>,
    records: Vec<&'a AccountRecord>,
}

#[derive(Deserialize)]
struct SnapshotFile {
    name: String,
    taken_at: DateTime<Utc>,
    records: Vec<AccountRecord>,
}

impl Snapshot {
    pub fn build<I>(name: impl Into<String>, taken_at: DateTime<Utc>, records: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = AccountRecord>,
    {
        let mut builder = SnapshotBuilder::new();
        for record in records {
            builder.push_record(record)?;
        }
        Ok(builder.finish(name, taken_at))
    }

    pub fn get(&self, identifier: &str) -> Option<&AccountRecord> {
        self.records.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Records in ascending identifier order.
    pub fn records(&self) -> impl Iterator<Item = &AccountRecord> {
        let mut records: Vec<_> = self.records.values().collect();
        records.sort_unstable_by(|a, b| a.identifier.cmp(&b.identifier));
        records.into_iter()
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let read_error = |reason: String| Error::SnapshotRead {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|e| read_error(e.to_string()))?;
        let snapshot = Self::decode(BufReader::new(file)).map_err(read_error)?;
        debug!(path = %path.display(), records = snapshot.len(), "loaded snapshot");
        Ok(snapshot)
    }

    fn decode<R: std::io::Read>(reader: R) -> Result<Self, String> {
        let file: SnapshotFile = serde_json::from_reader(reader).map_err(|e| e.to_string())?;
        if let Some(blank) = file.records.iter().find(|r| r.identifier.trim().is_empty()) {
            return Err(format!("record with blank identifier {:?}", blank.identifier));
        }
        Self::build(file.name, file.taken_at, file.records).map_err(|e| e.to_string())
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), anyhow::Error> {
        let file = SnapshotFileRef {
            name: &self.name,
            taken_at: self.taken_at,
            records: self.records().collect(),
        };
        serde_json::to_writer_pretty(&mut writer, &file)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    /// Writes next to `path` first and renames into place, so an interrupted save
    /// leaves whatever was at `path` untouched.
    pub fn save(&self, path: &Path) -> Result<(), anyhow::Error> {
        let file_name = path
            .file_name()
            .with_context(|| format!("{} is not a file path", path.display()))?;
        let tmp = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
        {
            let file = File::create(&tmp)
                .with_context(|| format!("cannot create {}", tmp.display()))?;
            let mut writer = BufWriter::new(file);
            self.write_to(&mut writer)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, path)
            .with_context(|| format!("cannot move snapshot into {}", path.display()))?;
        debug!(path = %path.display(), records = self.len(), "saved snapshot");
        Ok(())
    }
}
