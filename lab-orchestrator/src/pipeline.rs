//! Setup pipeline: two independent tracks joined before the lockdown stage.

use std::sync::Arc;

use lab_config::LabConfig;
use lab_core::{lab_error, lab_header, LabError, Result};
use lab_provider::ResourceClient;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cluster::{ensure_cluster, find_cluster};
use crate::libraries::{ensure_libraries, required_libraries};
use crate::lockdown::{restore_entitlements, run_lockdown};
use crate::members::{add_members, list_members, remove_members, MemberRow};
use crate::report::{RunResult, StageName, StageOutcome};
use crate::tables::{create_tables, table_definitions};
use crate::teardown::run_teardown;
use crate::upload::{upload_manifest, UploadManifest};
use crate::warehouse::{get_or_start_warehouse, StatementRunner};

/// Which tracks `setup` runs. Lockdown needs both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetupMode {
    #[default]
    Full,
    ClusterOnly,
    TablesOnly,
}

impl SetupMode {
    pub fn runs_cluster(self) -> bool {
        matches!(self, SetupMode::Full | SetupMode::ClusterOnly)
    }

    pub fn runs_data(self) -> bool {
        matches!(self, SetupMode::Full | SetupMode::TablesOnly)
    }
}

struct ClusterTrack {
    stages: Vec<StageOutcome>,
    cluster_id: Option<String>,
}

/// Runs provisioning, teardown and member administration against one workspace.
#[derive(Clone)]
pub struct Orchestrator {
    client: Arc<dyn ResourceClient>,
    config: Arc<LabConfig>,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn ResourceClient>, config: LabConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    /// Run the setup tracks for `mode`.
    ///
    /// A failed stage never stops the others; the result records every stage
    /// so the caller can render one summary.
    pub async fn setup(&self, mode: SetupMode) -> RunResult {
        let mut run = RunResult::default();

        let cluster_task = mode.runs_cluster().then(|| {
            let client = Arc::clone(&self.client);
            let config = Arc::clone(&self.config);
            tokio::spawn(async move { cluster_track(client.as_ref(), &config).await })
        });
        let data_task = mode.runs_data().then(|| {
            let client = Arc::clone(&self.client);
            let config = Arc::clone(&self.config);
            tokio::spawn(async move { data_track(client.as_ref(), &config).await })
        });

        match cluster_task {
            Some(handle) => match join(handle, StageName::Cluster).await {
                Ok(track) => {
                    run.stages.extend(track.stages);
                    run.cluster_id = track.cluster_id;
                }
                Err(outcome) => run.push(outcome),
            },
            None => {
                run.push(StageOutcome::skipped(StageName::Cluster, "--tables-only"));
                run.push(StageOutcome::skipped(StageName::Libraries, "--tables-only"));
            }
        }

        match data_task {
            Some(handle) => match join(handle, StageName::Upload).await {
                Ok(stages) => run.stages.extend(stages),
                Err(outcome) => run.push(outcome),
            },
            None => {
                run.push(StageOutcome::skipped(StageName::Upload, "--cluster-only"));
                run.push(StageOutcome::skipped(StageName::Tables, "--cluster-only"));
            }
        }

        if mode == SetupMode::Full {
            let outcome = self.lockdown(&mut run).await;
            run.push(outcome);
        } else {
            run.push(StageOutcome::skipped(
                StageName::Lockdown,
                "requires both the cluster and data tracks",
            ));
        }

        info!(success = run.success(), ?mode, "setup finished");
        run
    }

    async fn lockdown(&self, run: &mut RunResult) -> StageOutcome {
        lab_header!("Access lockdown");
        let client = self.client.as_ref();
        let mut stage = StageOutcome::new(StageName::Lockdown);

        // The cluster track may have failed after the cluster already existed.
        let cluster_id = match run.cluster_id.clone() {
            Some(id) => Some(id),
            None => match find_cluster(client, &self.config.cluster.name).await {
                Ok(found) => found.map(|c| c.cluster_id),
                Err(err) => {
                    warn!(%err, "cluster lookup for lockdown failed");
                    None
                }
            },
        };

        match run_lockdown(
            client,
            &self.config.access,
            &self.config.volume.catalog,
            cluster_id.as_deref(),
            &mut stage,
        )
        .await
        {
            Ok(group_id) => run.group_id = Some(group_id),
            Err(err) => {
                lab_error!("Lockdown failed: {err}");
                stage.fail(&err);
            }
        }
        stage.finish()
    }

    pub async fn teardown(&self) -> RunResult {
        run_teardown(self.client.as_ref(), &self.config).await
    }

    pub async fn add_members(&self, emails: &[String]) -> StageOutcome {
        let mut stage = StageOutcome::new(StageName::Members);
        if let Err(err) = add_members(self.client.as_ref(), &self.config, emails, &mut stage).await {
            lab_error!("{err}");
            stage.fail(&err);
        }
        stage.finish()
    }

    pub async fn remove_members(&self, emails: &[String]) -> StageOutcome {
        let mut stage = StageOutcome::new(StageName::Members);
        if let Err(err) = remove_members(self.client.as_ref(), &self.config, emails, &mut stage).await {
            lab_error!("{err}");
            stage.fail(&err);
        }
        stage.finish()
    }

    pub async fn list_members(&self) -> Result<Vec<MemberRow>> {
        list_members(self.client.as_ref(), &self.config).await
    }

    /// Give creation rights back to the default population.
    pub async fn restore_entitlements(&self) -> StageOutcome {
        let mut stage = StageOutcome::new(StageName::Entitlements);
        let population = &self.config.access.population_group;
        warn!(population, "restoring creation entitlements");
        if let Err(err) = restore_entitlements(self.client.as_ref(), population, &mut stage).await {
            lab_error!("{err}");
            stage.fail(&err);
        }
        stage.finish()
    }
}

/// Cluster owner: the configured user, otherwise the authenticated caller.
pub async fn resolve_owner(client: &dyn ResourceClient, config: &LabConfig) -> Result<String> {
    match &config.user_email {
        Some(email) => Ok(email.clone()),
        None => Ok(client.current_user().await?.user_name),
    }
}

async fn cluster_track(client: &dyn ResourceClient, config: &LabConfig) -> ClusterTrack {
    lab_header!("Cluster: {}", config.cluster.name);
    let mut stage = StageOutcome::new(StageName::Cluster);

    let ensured = match resolve_owner(client, config).await {
        Ok(owner) => ensure_cluster(client, &config.cluster, &config.timeouts, &owner, &mut stage).await,
        Err(err) => Err(err),
    };
    let cluster_id = match ensured {
        Ok(id) => Some(id),
        Err(err) => {
            lab_error!("Cluster failed: {err}");
            stage.fail(&err);
            None
        }
    };
    let cluster = stage.finish();

    let libraries = match &cluster_id {
        Some(id) => {
            let mut stage = StageOutcome::new(StageName::Libraries);
            let libraries = required_libraries(&config.libraries);
            if let Err(err) = ensure_libraries(client, id, &libraries, &config.timeouts, &mut stage).await {
                lab_error!("Library installation failed: {err}");
                stage.fail(&err);
            }
            stage.finish()
        }
        None => StageOutcome::skipped(StageName::Libraries, "no running cluster"),
    };

    ClusterTrack {
        stages: vec![cluster, libraries],
        cluster_id,
    }
}

async fn data_track(client: &dyn ResourceClient, config: &LabConfig) -> Vec<StageOutcome> {
    lab_header!("Data: {}", config.volume);
    let target = &config.volume;

    let mut upload = StageOutcome::new(StageName::Upload);
    let uploaded = match UploadManifest::from_dir(&config.data, target) {
        Ok(manifest) => upload_manifest(client, &manifest, target, &mut upload).await,
        Err(err) => Err(err),
    };
    if let Err(err) = uploaded {
        lab_error!("Upload failed: {err}");
        upload.fail(&err);
    }

    // Tables still run after a failed upload; files already in the volume are used.
    let mut tables = StageOutcome::new(StageName::Tables);
    let created = match get_or_start_warehouse(client, &config.warehouse).await {
        Ok(warehouse_id) => {
            let runner = StatementRunner::from_timeouts(client, warehouse_id, &config.timeouts);
            let definitions = table_definitions(target);
            create_tables(client, &runner, target, &definitions, &mut tables).await
        }
        Err(err) => Err(err),
    };
    if let Err(err) = created {
        lab_error!("Table creation failed: {err}");
        tables.fail(&err);
    }

    vec![upload.finish(), tables.finish()]
}

/// Await a track; a panicked task becomes a failed stage.
async fn join<T>(handle: JoinHandle<T>, stage: StageName) -> std::result::Result<T, StageOutcome> {
    handle.await.map_err(|err| {
        let err = LabError::Internal(format!("{stage} track did not complete: {err}"));
        lab_error!("{err}");
        let mut outcome = StageOutcome::new(stage);
        outcome.fail(&err);
        outcome.finish()
    })
}
