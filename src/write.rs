use crate::diff::MetricResult;
use serde::Serialize;

#[derive(Serialize)]
struct AuditRow<'a> {
    metric: &'a str,
    identifier: &'a str,
}

/// Basic CSV exporter for the identifiers behind each count.
pub(crate) fn write_audit<W: std::io::Write>(
    writer: W,
    metrics: &MetricResult,
) -> Result<(), anyhow::Error> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(["metric", "identifier"])?;
    for (metric, identifiers) in [
        ("new_requests", &metrics.new_requests),
        ("new_accepted", &metrics.new_accepted),
        ("unclassified", &metrics.unclassified),
    ] {
        for identifier in identifiers {
            wtr.serialize(AuditRow { metric, identifier })?;
        }
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::write_audit;
    use crate::diff::{MetricResult, SnapshotLabel};
    use chrono::{TimeZone, Utc};

    fn label(name: &str, day: u32) -> SnapshotLabel {
        SnapshotLabel {
            name: name.into(),
            taken_at: Utc.with_ymd_and_hms(2021, 1, day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn audit_rows() {
        let metrics = MetricResult {
            from: label("old", 1),
            to: label("new", 8),
            new_requests: vec!["bob".into()],
            new_accepted: vec!["alice".into(), "carol".into()],
            unclassified: vec!["dave".into()],
        };
        let mut out = Vec::new();
        write_audit(&mut out, &metrics).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\
metric,identifier
new_requests,bob
new_accepted,alice
new_accepted,carol
unclassified,dave
"
        );
    }

    #[test]
    fn audit_header_only() {
        let metrics = MetricResult {
            from: label("old", 1),
            to: label("new", 1),
            new_requests: vec![],
            new_accepted: vec![],
            unclassified: vec![],
        };
        let mut out = Vec::new();
        write_audit(&mut out, &metrics).unwrap();
        assert_eq!(out, b"metric,identifier\n");
    }
}
