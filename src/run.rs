use crate::{
    deliver::Deliver,
    diff::{compare, GroupFilter},
    directory::Directory,
    read::ingest,
    report::render,
    snapshot::{Snapshot, SnapshotBuilder},
    write::write_audit,
};
use anyhow::Context;
use chrono::Utc;
use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::info;

/// Where a new snapshot comes from and what to call it.
pub(crate) struct Source<'a> {
    pub directory: &'a dyn Directory,
    pub max_malformed: usize,
    pub name: String,
}

impl Source<'_> {
    pub fn fetch(&self) -> Result<Snapshot, anyhow::Error> {
        let entries = self.directory.fetch()?;
        let mut builder = SnapshotBuilder::new();
        let skipped = ingest(entries, &mut builder, self.max_malformed)?;
        let snapshot = builder.finish(self.name.clone(), Utc::now());
        info!(name = %snapshot.name, records = snapshot.len(), skipped, "built snapshot");
        Ok(snapshot)
    }
}

/// What to do with the metrics of a comparison.
pub(crate) struct Reporting<'a> {
    pub filter: GroupFilter,
    pub deliverer: &'a dyn Deliver,
    pub recipients: Vec<String>,
    pub audit: Option<PathBuf>,
    /// Write the report to the output instead of delivering it.
    pub dry_run: bool,
}

impl Reporting<'_> {
    /// Compares, renders and delivers. Returns `false` when nothing was delivered
    /// because of `dry_run`.
    pub fn report<W: Write>(&self, old: &Snapshot, new: &Snapshot, mut out: W) -> Result<bool, anyhow::Error> {
        let metrics = compare(old, new);
        let breakdowns = self.filter.breakdowns(&metrics, new);
        if let Some(path) = &self.audit {
            let file = File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
            write_audit(file, &metrics)?;
        }
        let document = render(&metrics, Some(&breakdowns));
        if self.dry_run {
            writeln!(out, "{}", document.html)?;
            out.flush()?;
            return Ok(false);
        }
        self.deliverer.deliver(&document, &self.recipients)?;
        Ok(true)
    }
}

/// One full reporting cycle: load the baseline at `old`, fetch, report, and only once
/// the report went out save the fetched snapshot at `new`. Any failure, or a dry run,
/// leaves `new` untouched so the next run compares against the same baseline.
pub(crate) fn run<W: Write>(
    old: &Path,
    new: &Path,
    source: &Source<'_>,
    reporting: &Reporting<'_>,
    out: W,
) -> Result<(), anyhow::Error> {
    let baseline = Snapshot::load(old)?;
    let snapshot = source.fetch()?;
    if reporting.report(&baseline, &snapshot, out)? {
        snapshot.save(new)?;
        info!(path = %new.display(), "snapshot saved");
    } else {
        info!(path = %new.display(), "dry run, snapshot not saved");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{run, Reporting, Source};
    use crate::{
        data::{AccountRecord, AccountStatus, RawEntry},
        deliver::Deliver,
        diff::GroupFilter,
        directory::Directory,
        report::Document,
        snapshot::Snapshot,
    };
    use chrono::{TimeZone, Utc};
    use std::{cell::RefCell, fs, path::Path};

    struct Fixed(Vec<RawEntry>);

    impl Directory for Fixed {
        fn fetch(&self) -> Result<Vec<RawEntry>, anyhow::Error> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct Mailbag {
        sent: RefCell<Vec<(Document, Vec<String>)>>,
        fail: bool,
    }

    impl Deliver for Mailbag {
        fn deliver(&self, document: &Document, recipients: &[String]) -> Result<(), anyhow::Error> {
            anyhow::ensure!(!self.fail, "mail server said no");
            self.sent
                .borrow_mut()
                .push((document.clone(), recipients.to_vec()));
            Ok(())
        }
    }

    fn entry(identifier: Option<&str>, status: &str) -> RawEntry {
        RawEntry {
            identifier: identifier.map(str::to_string),
            status: Some(status.to_string()),
            ..RawEntry::default()
        }
    }

    fn directory() -> Fixed {
        Fixed(vec![entry(Some("alice"), "active"), entry(Some("bob"), "pending")])
    }

    fn write_baseline(path: &Path) -> Vec<u8> {
        Snapshot::build(
            "old",
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            vec![AccountRecord {
                identifier: "alice".into(),
                status: AccountStatus::Requested,
                join_date: None,
                groups: Default::default(),
            }],
        )
        .unwrap()
        .save(path)
        .unwrap();
        fs::read(path).unwrap()
    }

    fn reporting(deliverer: &Mailbag, dry_run: bool) -> Reporting<'_> {
        Reporting {
            filter: GroupFilter::default(),
            deliverer,
            recipients: vec!["ops@example.org".into()],
            audit: None,
            dry_run,
        }
    }

    #[test]
    fn delivers_then_saves() {
        let dir = tempfile::tempdir().unwrap();
        let (old, new) = (dir.path().join("old.json"), dir.path().join("new.json"));
        let baseline = write_baseline(&old);
        let directory = directory();
        let source = Source {
            directory: &directory,
            max_malformed: 0,
            name: "new".into(),
        };
        let mailbag = Mailbag::default();
        let mut out = Vec::new();
        run(&old, &new, &source, &reporting(&mailbag, false), &mut out).unwrap();

        let sent = mailbag.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.html.contains("New Accounts Requested: 1"));
        assert!(sent[0].0.html.contains("New Accounts Accepted: 1"));
        assert_eq!(sent[0].1, ["ops@example.org"]);
        assert!(out.is_empty());

        let saved = Snapshot::load(&new).unwrap();
        assert_eq!(saved.name, "new");
        assert_eq!(saved.len(), 2);
        assert_eq!(fs::read(&old).unwrap(), baseline);
    }

    #[test]
    fn missing_baseline_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (old, new) = (dir.path().join("old.json"), dir.path().join("new.json"));
        let directory = directory();
        let source = Source {
            directory: &directory,
            max_malformed: 0,
            name: "new".into(),
        };
        let mailbag = Mailbag::default();
        assert!(run(&old, &new, &source, &reporting(&mailbag, false), Vec::new()).is_err());
        assert!(mailbag.sent.borrow().is_empty());
        assert!(!new.exists());
    }

    #[test]
    fn failed_delivery_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (old, new) = (dir.path().join("old.json"), dir.path().join("new.json"));
        let baseline = write_baseline(&old);
        let directory = directory();
        let source = Source {
            directory: &directory,
            max_malformed: 0,
            name: "new".into(),
        };
        let mailbag = Mailbag {
            fail: true,
            ..Mailbag::default()
        };
        assert!(run(&old, &new, &source, &reporting(&mailbag, false), Vec::new()).is_err());
        assert!(!new.exists());
        assert_eq!(fs::read(&old).unwrap(), baseline);
        // the temporary file of an atomic save must not appear either
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn too_many_malformed_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (old, new) = (dir.path().join("old.json"), dir.path().join("new.json"));
        write_baseline(&old);
        let directory = Fixed(vec![entry(None, "active"), entry(Some("bob"), "pending")]);
        let source = Source {
            directory: &directory,
            max_malformed: 0,
            name: "new".into(),
        };
        let mailbag = Mailbag::default();
        assert!(run(&old, &new, &source, &reporting(&mailbag, false), Vec::new()).is_err());
        assert!(mailbag.sent.borrow().is_empty());
        assert!(!new.exists());
    }

    #[test]
    fn dry_run_prints_and_keeps_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let (old, new) = (dir.path().join("old.json"), dir.path().join("new.json"));
        write_baseline(&old);
        let directory = directory();
        let source = Source {
            directory: &directory,
            max_malformed: 0,
            name: "new".into(),
        };
        let mailbag = Mailbag::default();
        let mut out = Vec::new();
        run(&old, &new, &source, &reporting(&mailbag, true), &mut out).unwrap();
        assert!(mailbag.sent.borrow().is_empty());
        assert!(String::from_utf8(out)
            .unwrap()
            .contains("New Accounts Accepted: 1"));
        assert!(!new.exists());
    }

    #[test]
    fn audit_written_alongside() {
        let dir = tempfile::tempdir().unwrap();
        let (old, new) = (dir.path().join("old.json"), dir.path().join("new.json"));
        write_baseline(&old);
        let directory = directory();
        let source = Source {
            directory: &directory,
            max_malformed: 0,
            name: "new".into(),
        };
        let mailbag = Mailbag::default();
        let audit = dir.path().join("audit.csv");
        let reporting = Reporting {
            audit: Some(audit.clone()),
            ..reporting(&mailbag, false)
        };
        run(&old, &new, &source, &reporting, Vec::new()).unwrap();
        assert_eq!(
            fs::read_to_string(&audit).unwrap(),
            "metric,identifier\nnew_requests,bob\nnew_accepted,alice\n"
        );
    }
}
