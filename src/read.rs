use crate::data::{AccountRecord, Error, RawEntry};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Trait for doing something with an `AccountRecord` that made it through the parse
/// boundary. The snapshot builder is the real consumer; tests use a plain `Vec`.
pub(crate) trait RecordSink {
    fn push_record(&mut self, record: AccountRecord) -> Result<(), Error>;
}

impl RecordSink for Vec<AccountRecord> {
    fn push_record(&mut self, record: AccountRecord) -> Result<(), Error> {
        self.push(record);
        Ok(())
    }
}

/// Parses raw directory entries and hands the good ones to `sink`.
///
/// Malformed entries are logged and skipped, since the directory data isn't under our
/// control, but once more than `max_malformed` of them were seen the whole ingestion
/// fails: at that point the report would describe mostly garbage. Errors raised by the
/// sink (duplicates) are always fatal. Returns how many entries were skipped.
pub(crate) fn ingest<I, S>(entries: I, sink: &mut S, max_malformed: usize) -> Result<usize, Error>
where
    I: IntoIterator<Item = RawEntry>,
    S: RecordSink,
{
    let mut skipped = 0;
    for entry in entries {
        match AccountRecord::parse(entry) {
            Ok(record) => sink.push_record(record)?,
            Err(e) => {
                skipped += 1;
                warn!(error = %e, skipped, "skipping directory record");
                if skipped > max_malformed {
                    return Err(Error::TooManyMalformed {
                        skipped,
                        limit: max_malformed,
                    });
                }
            }
        }
    }
    Ok(skipped)
}

/// One line of a directory CSV export. Every column is optional so that a bad row
/// still reaches `AccountRecord::parse` and gets counted as malformed there.
#[derive(Debug, Deserialize)]
struct ExportRow {
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    join_date: Option<String>,
    #[serde(default)]
    groups: Option<String>,
}

/// `groups` is a whitespace separated list of `group=state` pairs.
fn parse_groups(field: &str) -> BTreeMap<String, String> {
    field
        .split_whitespace()
        .map(|pair| match pair.split_once('=') {
            Some((group, state)) => (group.to_string(), state.to_string()),
            None => {
                debug!(pair, "group membership without a state");
                (pair.to_string(), String::new())
            }
        })
        .collect()
}

/// Simple CSV importer for a directory export.
pub(crate) fn read_export<R: std::io::Read>(reader: R) -> Result<Vec<RawEntry>, anyhow::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let mut entries = Vec::new();
    for result in rdr.deserialize() {
        let row: ExportRow = result?;
        entries.push(RawEntry {
            identifier: row.identifier,
            status: row.status,
            join_date: row.join_date,
            groups: row.groups.as_deref().map(parse_groups).unwrap_or_default(),
        });
    }
    debug!(entries = entries.len(), "read directory export");
    Ok(entries)
}
