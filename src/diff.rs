use crate::{
    data::{AccountStatus, Identifier},
    snapshot::Snapshot,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::info;

/// Which side of the interval a snapshot stands for, as shown in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SnapshotLabel {
    pub name: String,
    pub taken_at: DateTime<Utc>,
}

impl From<&Snapshot> for SnapshotLabel {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            name: snapshot.name.clone(),
            taken_at: snapshot.taken_at,
        }
    }
}

/// Outcome of one comparison. The identifier lists are sorted; the counts are their
/// lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MetricResult {
    pub from: SnapshotLabel,
    pub to: SnapshotLabel,
    pub new_requests: Vec<Identifier>,
    pub new_accepted: Vec<Identifier>,
    /// Accounts with an unrecognized status on either side; never counted.
    pub unclassified: Vec<Identifier>,
}

impl MetricResult {
    /// Whole days between the two snapshots.
    pub fn days(&self) -> i64 {
        (self.to.taken_at - self.from.taken_at).num_days()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    NewRequest,
    NewAccepted,
    Unclassified,
    Untracked,
}

/// Classifies one account given its status in the old snapshot (if it was there) and
/// in the new one.
///
/// An account showing up already accepted only counts as accepted: if it ever went
/// through `requested`, that happened outside what these two snapshots can tell.
/// Likewise `requested -> accepted` is only an acceptance, the request having been
/// counted by the run that first saw it.
pub(crate) fn classify(old: Option<&AccountStatus>, new: &AccountStatus) -> Transition {
    use AccountStatus::*;
    match (old, new) {
        (Some(Unknown(_)), _) | (_, Unknown(_)) => Transition::Unclassified,
        (None, Requested) => Transition::NewRequest,
        (None, Accepted) | (Some(Requested), Accepted) => Transition::NewAccepted,
        _ => Transition::Untracked,
    }
}

/// Compares two snapshots. Only accounts present in `new` are looked at, in identifier
/// order: an account that vanished from the directory contributes nothing.
pub(crate) fn compare(old: &Snapshot, new: &Snapshot) -> MetricResult {
    let mut result = MetricResult {
        from: old.into(),
        to: new.into(),
        new_requests: Vec::new(),
        new_accepted: Vec::new(),
        unclassified: Vec::new(),
    };
    for record in new.records() {
        let before = old.get(&record.identifier).map(|r| &r.status);
        let bucket = match classify(before, &record.status) {
            Transition::NewRequest => &mut result.new_requests,
            Transition::NewAccepted => &mut result.new_accepted,
            Transition::Unclassified => &mut result.unclassified,
            Transition::Untracked => continue,
        };
        bucket.push(record.identifier.clone());
    }
    info!(
        from = %result.from.taken_at,
        to = %result.to.taken_at,
        new_requests = result.new_requests.len(),
        new_accepted = result.new_accepted.len(),
        unclassified = result.unclassified.len(),
        "compared snapshots"
    );
    result
}

/// Identifiers of one metric split by the kind of groups they already belong to.
/// An account can be in both lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct GroupBreakdown {
    pub training: Vec<Identifier>,
    pub non_training: Vec<Identifier>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Breakdowns {
    pub requests: GroupBreakdown,
    pub accepted: GroupBreakdown,
}

/// Tells training groups from the rest. Groups in `excluded` (the directory's root
/// groups, which every account belongs to) count as neither.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct GroupFilter {
    training: BTreeSet<String>,
    excluded: BTreeSet<String>,
}

impl GroupFilter {
    pub fn new<T, E>(training: T, excluded: E) -> Self
    where
        T: IntoIterator<Item = String>,
        E: IntoIterator<Item = String>,
    {
        Self {
            training: training.into_iter().collect(),
            excluded: excluded.into_iter().collect(),
        }
    }

    pub fn breakdown(&self, identifiers: &[Identifier], snapshot: &Snapshot) -> GroupBreakdown {
        let mut breakdown = GroupBreakdown::default();
        for identifier in identifiers {
            let Some(record) = snapshot.get(identifier) else {
                continue;
            };
            let member_of = || {
                record
                    .groups
                    .iter()
                    .filter(|(_, state)| state.is_tracked())
                    .map(|(group, _)| group)
            };
            if member_of().any(|group| self.training.contains(group)) {
                breakdown.training.push(identifier.clone());
            }
            if member_of()
                .any(|group| !self.training.contains(group) && !self.excluded.contains(group))
            {
                breakdown.non_training.push(identifier.clone());
            }
        }
        breakdown
    }

    /// Breaks down both metrics against the memberships found in `new`.
    pub fn breakdowns(&self, metrics: &MetricResult, new: &Snapshot) -> Breakdowns {
        let breakdowns = Breakdowns {
            requests: self.breakdown(&metrics.new_requests, new),
            accepted: self.breakdown(&metrics.new_accepted, new),
        };
        info!(
            requests_training = breakdowns.requests.training.len(),
            requests_non_training = breakdowns.requests.non_training.len(),
            accepted_training = breakdowns.accepted.training.len(),
            accepted_non_training = breakdowns.accepted.non_training.len(),
            "group breakdown"
        );
        breakdowns
    }
}
