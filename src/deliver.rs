use crate::report::Document;
use anyhow::{ensure, Context};
use chrono::{DateTime, Utc};
use std::{
    fs,
    io::Write,
    path::PathBuf,
    process::{Command, Stdio},
};
use tracing::info;

/// Hands a rendered report over to whatever actually carries it to people.
pub(crate) trait Deliver {
    fn deliver(&self, document: &Document, recipients: &[String]) -> Result<(), anyhow::Error>;
}

/// Rejects an empty recipient list and anything that could smuggle extra headers
/// into the message.
fn check_addresses(from: &str, recipients: &[String]) -> Result<(), anyhow::Error> {
    ensure!(!recipients.is_empty(), "no report recipients");
    for address in recipients.iter().map(String::as_str).chain([from]) {
        ensure!(
            !address.contains(['\r', '\n']),
            "invalid mail address {address:?}"
        );
    }
    Ok(())
}

/// Builds a single-part HTML mail message.
pub(crate) fn compose_message(
    from: &str,
    recipients: &[String],
    document: &Document,
    date: DateTime<Utc>,
) -> Result<String, anyhow::Error> {
    check_addresses(from, recipients)?;
    Ok(format!(
        "Date: {}\nFrom: {from}\nTo: {}\nSubject: {}\nMIME-Version: 1.0\nContent-Type: text/html; charset=utf-8\nContent-Transfer-Encoding: 8bit\n\n{}",
        date.to_rfc2822(),
        recipients.join(", "),
        document.subject,
        document.html
    ))
}

/// Pipes the message to a sendmail-compatible program.
#[derive(Debug, Clone)]
pub(crate) struct Sendmail {
    pub program: PathBuf,
    pub from: String,
}

impl Deliver for Sendmail {
    fn deliver(&self, document: &Document, recipients: &[String]) -> Result<(), anyhow::Error> {
        let message = compose_message(&self.from, recipients, document, Utc::now())?;
        let mut child = Command::new(&self.program)
            .arg("-i")
            .arg("-f")
            .arg(&self.from)
            .arg("--")
            .args(recipients)
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("cannot run {}", self.program.display()))?;
        // stdin is dropped (closed) before waiting, and the child is always reaped
        let written = child
            .stdin
            .take()
            .context("sendmail stdin is not piped")
            .and_then(|mut stdin| Ok(stdin.write_all(message.as_bytes())?));
        let status = child.wait()?;
        written.with_context(|| format!("cannot write to {}", self.program.display()))?;
        ensure!(
            status.success(),
            "{} exited with {status}",
            self.program.display()
        );
        info!(recipients = recipients.len(), "report sent");
        Ok(())
    }
}

/// Drops the message as an `.eml` file into a directory, for a separate mailer (or a
/// human) to pick up.
#[derive(Debug, Clone)]
pub(crate) struct Outbox {
    pub dir: PathBuf,
    pub from: String,
}

impl Deliver for Outbox {
    fn deliver(&self, document: &Document, recipients: &[String]) -> Result<(), anyhow::Error> {
        let message = compose_message(&self.from, recipients, document, Utc::now())?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("cannot create outbox {}", self.dir.display()))?;
        let path = self
            .dir
            .join(format!("report-{}.eml", Utc::now().format("%Y%m%dT%H%M%S%.6f")));
        fs::write(&path, message)
            .with_context(|| format!("cannot write {}", path.display()))?;
        info!(path = %path.display(), recipients = recipients.len(), "report queued");
        Ok(())
    }
}
