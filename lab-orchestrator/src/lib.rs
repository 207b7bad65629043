//! Provisioning and teardown for the shared workshop environment.
//!
//! Setup runs two independent tracks (cluster and libraries; data upload and
//! tables) and joins them before the access lockdown. Every step looks
//! resources up by name first, so re-running after a partial failure converges
//! instead of duplicating work.

pub mod cluster;
pub mod libraries;
pub mod lockdown;
pub mod members;
pub mod pipeline;
pub mod report;
pub mod tables;
pub mod teardown;
pub mod upload;
pub mod warehouse;

pub use members::{personal_cluster_name, read_roster, MemberRow};
pub use pipeline::{resolve_owner, Orchestrator, SetupMode};
pub use report::{Change, ChangeKind, RunResult, StageName, StageOutcome, StageStatus};
pub use upload::{UploadEntry, UploadManifest};
