use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, path::PathBuf};
use thiserror::Error;

pub type Identifier = String;

/// Account state as the directory reports it. The directory has its own vocabulary
/// (`pending`, `active`, `nonmember`...) which is folded into these variants on parse.
/// Anything we don't recognize lands in `Unknown` with the raw text kept verbatim, so
/// it survives a save/load cycle and still shows up in the report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub(crate) enum AccountStatus {
    Requested,
    Accepted,
    Denied,
    Disabled,
    Unknown(String),
}

impl AccountStatus {
    /// Whether this state counts as an actual (requested or accepted) membership.
    pub fn is_tracked(&self) -> bool {
        matches!(self, AccountStatus::Requested | AccountStatus::Accepted)
    }
}

impl From<&str> for AccountStatus {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "requested" | "pending" => AccountStatus::Requested,
            "accepted" | "active" | "admin" => AccountStatus::Accepted,
            "denied" | "nonmember" => AccountStatus::Denied,
            "disabled" => AccountStatus::Disabled,
            _ => AccountStatus::Unknown(raw.to_string()),
        }
    }
}

impl From<String> for AccountStatus {
    fn from(raw: String) -> Self {
        AccountStatus::from(raw.as_str())
    }
}

impl From<AccountStatus> for String {
    fn from(status: AccountStatus) -> Self {
        match status {
            AccountStatus::Unknown(raw) => raw,
            known => known.to_string(),
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountStatus::Requested => f.write_str("requested"),
            AccountStatus::Accepted => f.write_str("accepted"),
            AccountStatus::Denied => f.write_str("denied"),
            AccountStatus::Disabled => f.write_str("disabled"),
            AccountStatus::Unknown(raw) => write!(f, "unknown ({raw:?})"),
        }
    }
}

/// One account as captured in a snapshot. Only `identifier` and `status` matter to the
/// comparison; `join_date` and `groups` ride along for the report breakdown and for
/// anyone reading the snapshot files by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct AccountRecord {
    pub identifier: Identifier,
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_date: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, AccountStatus>,
}

/// An entry as handed over by the directory, before any validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RawEntry {
    pub identifier: Option<String>,
    pub status: Option<String>,
    pub join_date: Option<String>,
    pub groups: BTreeMap<String, String>,
}

impl AccountRecord {
    /// Validates a raw directory entry. A missing or blank identifier is the only hard
    /// failure: an odd status just becomes `Unknown`.
    pub fn parse(raw: RawEntry) -> Result<Self, Error> {
        let identifier = match raw.identifier {
            None => return Err(Error::MalformedRecord("missing identifier".into())),
            Some(id) if id.trim().is_empty() => {
                return Err(Error::MalformedRecord("empty identifier".into()))
            }
            Some(id) => id.trim().to_string(),
        };
        let status = raw
            .status
            .map(AccountStatus::from)
            .unwrap_or_else(|| AccountStatus::Unknown(String::new()));
        let groups = raw
            .groups
            .into_iter()
            .map(|(group, state)| (group, AccountStatus::from(state)))
            .collect();
        Ok(Self {
            identifier,
            status,
            join_date: raw.join_date,
            groups,
        })
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Malformed directory record: {0}")]
    MalformedRecord(String),
    #[error("Duplicate identifier {0:?} in snapshot")]
    DuplicateIdentifier(Identifier),
    #[error("Cannot read snapshot {}: {reason}", .path.display())]
    SnapshotRead { path: PathBuf, reason: String },
    #[error("Too many malformed directory records ({skipped} skipped, limit is {limit})")]
    TooManyMalformed { skipped: usize, limit: usize },
}

#[cfg(test)]
mod tests {
    use super::{AccountRecord, AccountStatus, Error, RawEntry};

    #[test]
    fn directory_vocabulary() {
        assert_eq!(AccountStatus::from("pending"), AccountStatus::Requested);
        assert_eq!(AccountStatus::from(" Active "), AccountStatus::Accepted);
        assert_eq!(AccountStatus::from("admin"), AccountStatus::Accepted);
        assert_eq!(AccountStatus::from("nonmember"), AccountStatus::Denied);
        assert_eq!(AccountStatus::from("DISABLED"), AccountStatus::Disabled);
        assert_eq!(
            AccountStatus::from("suspended"),
            AccountStatus::Unknown("suspended".into())
        );
    }

    #[test]
    fn unknown_status_keeps_raw_text() {
        let status = AccountStatus::from("On Hold");
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, "\"On Hold\"");
        let back: AccountStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
        assert_eq!(
            serde_json::to_string(&AccountStatus::Requested).unwrap(),
            "\"requested\""
        );
    }

    #[test]
    fn parse_entry() {
        let record = AccountRecord::parse(RawEntry {
            identifier: Some(" jim_halpert ".into()),
            status: Some("pending".into()),
            join_date: Some("2021-Jan-01 00:00:00.000000 UTC".into()),
            groups: [("root.osg".to_string(), "pending".to_string())].into(),
        })
        .unwrap();
        assert_eq!(record.identifier, "jim_halpert");
        assert_eq!(record.status, AccountStatus::Requested);
        assert_eq!(record.groups["root.osg"], AccountStatus::Requested);
    }

    #[test]
    fn parse_missing_status_is_unknown() {
        let record = AccountRecord::parse(RawEntry {
            identifier: Some("pam".into()),
            ..RawEntry::default()
        })
        .unwrap();
        assert_eq!(record.status, AccountStatus::Unknown(String::new()));
    }

    #[test]
    fn parse_without_identifier() {
        assert_eq!(
            AccountRecord::parse(RawEntry::default()),
            Err(Error::MalformedRecord("missing identifier".into()))
        );
        assert_eq!(
            AccountRecord::parse(RawEntry {
                identifier: Some("   ".into()),
                status: Some("active".into()),
                ..RawEntry::default()
            }),
            Err(Error::MalformedRecord("empty identifier".into()))
        );
    }
}
