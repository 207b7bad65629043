use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to one resource during a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Reused,
    Started,
    Updated,
    Removed,
    Deleted,
    AlreadyPresent,
    AlreadyAbsent,
    Failed,
    Skipped,
}

impl ChangeKind {
    /// Whether the kind left the resource untouched.
    pub fn is_noop(self) -> bool {
        matches!(
            self,
            ChangeKind::Reused | ChangeKind::AlreadyPresent | ChangeKind::AlreadyAbsent
        )
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Created => "created",
            ChangeKind::Reused => "reused",
            ChangeKind::Started => "started",
            ChangeKind::Updated => "updated",
            ChangeKind::Removed => "removed",
            ChangeKind::Deleted => "deleted",
            ChangeKind::AlreadyPresent => "already present",
            ChangeKind::AlreadyAbsent => "already deleted",
            ChangeKind::Failed => "failed",
            ChangeKind::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub resource: String,
    pub kind: ChangeKind,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    // setup
    Cluster,
    Libraries,
    Upload,
    Tables,
    Lockdown,
    // teardown
    RevokeGrants,
    RestorePolicy,
    DeleteGroup,
    DropTables,
    DeleteVolume,
    DeleteSchema,
    DeleteCatalog,
    // administration
    Members,
    Entitlements,
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageName::Cluster => "Cluster",
            StageName::Libraries => "Libraries",
            StageName::Upload => "Data upload",
            StageName::Tables => "Lakehouse tables",
            StageName::Lockdown => "Access lockdown",
            StageName::RevokeGrants => "Revoke catalog grants",
            StageName::RestorePolicy => "Restore Personal Compute policy",
            StageName::DeleteGroup => "Delete workshop group",
            StageName::DropTables => "Drop lakehouse schema",
            StageName::DeleteVolume => "Delete volume",
            StageName::DeleteSchema => "Delete volume schema",
            StageName::DeleteCatalog => "Delete catalog",
            StageName::Members => "Members",
            StageName::Entitlements => "Entitlements",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Failed,
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Passed => f.write_str("PASS"),
            StageStatus::Failed => f.write_str("FAIL"),
            StageStatus::Skipped => f.write_str("SKIP"),
        }
    }
}

/// Record of one stage: every resource it touched and the error that ended it, if any.
///
/// Per-item failures (one library, one table) are recorded as changes of kind
/// [`ChangeKind::Failed`] and fail the stage without an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: StageName,
    pub changes: Vec<Change>,
    pub error: Option<String>,
    pub skipped: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageOutcome {
    pub fn new(stage: StageName) -> Self {
        Self {
            stage,
            changes: Vec::new(),
            error: None,
            skipped: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn skipped(stage: StageName, reason: impl Into<String>) -> Self {
        let mut outcome = Self::new(stage);
        outcome.skipped = Some(reason.into());
        outcome.finish()
    }

    pub fn record(&mut self, resource: impl Into<String>, kind: ChangeKind) {
        self.changes.push(Change {
            resource: resource.into(),
            kind,
            detail: None,
        });
    }

    pub fn record_detail(
        &mut self,
        resource: impl Into<String>,
        kind: ChangeKind,
        detail: impl Into<String>,
    ) {
        self.changes.push(Change {
            resource: resource.into(),
            kind,
            detail: Some(detail.into()),
        });
    }

    pub fn fail(&mut self, error: impl fmt::Display) {
        self.error = Some(error.to_string());
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn status(&self) -> StageStatus {
        if self.error.is_some() || self.changes.iter().any(|c| c.kind == ChangeKind::Failed) {
            StageStatus::Failed
        } else if self.skipped.is_some() {
            StageStatus::Skipped
        } else {
            StageStatus::Passed
        }
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| c.kind == ChangeKind::Failed)
    }

    pub fn elapsed_secs(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_seconds())
    }

    /// One-line tally such as `2 created, 3 reused`.
    pub fn summary(&self) -> String {
        if let Some(reason) = &self.skipped {
            return reason.clone();
        }
        if let Some(error) = &self.error {
            return error.clone();
        }

        let mut tally: Vec<(ChangeKind, usize)> = Vec::new();
        for change in &self.changes {
            match tally.iter_mut().find(|(kind, _)| *kind == change.kind) {
                Some((_, n)) => *n += 1,
                None => tally.push((change.kind, 1)),
            }
        }
        if tally.is_empty() {
            return "nothing to do".to_string();
        }
        tally
            .iter()
            .map(|(kind, n)| format!("{n} {kind}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Aggregate of every stage in one invocation, plus identifiers later stages consume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunResult {
    pub stages: Vec<StageOutcome>,
    pub cluster_id: Option<String>,
    pub group_id: Option<String>,
}

impl RunResult {
    pub fn push(&mut self, outcome: StageOutcome) {
        self.stages.push(outcome);
    }

    pub fn success(&self) -> bool {
        self.stages
            .iter()
            .all(|s| s.status() != StageStatus::Failed)
    }

    pub fn stage(&self, name: StageName) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.stages.iter().map(|s| s.count(kind)).sum()
    }

    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.stages.iter().flat_map(|s| s.changes.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_item_failure_fails_stage() {
        let mut outcome = StageOutcome::new(StageName::Libraries);
        outcome.record("maven:org.neo4j:connector", ChangeKind::Created);
        assert_eq!(outcome.status(), StageStatus::Passed);

        outcome.record_detail("pypi:broken", ChangeKind::Failed, "resolution failed");
        assert_eq!(outcome.status(), StageStatus::Failed);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn skipped_stages_do_not_fail_run() {
        let mut run = RunResult::default();
        run.push(StageOutcome::skipped(StageName::Lockdown, "tables only"));
        assert!(run.success());
        assert_eq!(run.stages[0].status(), StageStatus::Skipped);
    }

    #[test]
    fn summary_tallies_in_order() {
        let mut outcome = StageOutcome::new(StageName::Upload);
        outcome.record("a.csv", ChangeKind::Updated);
        outcome.record("b.csv", ChangeKind::Updated);
        outcome.record("c.csv", ChangeKind::Failed);
        assert_eq!(outcome.summary(), "2 updated, 1 failed");
    }
}
