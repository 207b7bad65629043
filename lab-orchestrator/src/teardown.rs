//! Reverse of setup, in dependency order.
//!
//! Each step treats a missing target as already clean. The first step that
//! fails ends the teardown and the remaining steps are reported as skipped, so
//! a container is never deleted while something inside it could not be
//! removed. Removed entitlements are never restored here; the Personal
//! Compute policy lockdown is.

use lab_config::LabConfig;
use lab_core::{lab_error, lab_header, lab_info, lab_success, Result};
use lab_provider::models::{PermissionsChange, SecurableType};
use lab_provider::{ClientResult, ResourceClient};
use tracing::info;

use crate::lockdown::{find_group, held_privileges, restore_personal_compute_policy};
use crate::report::{ChangeKind, RunResult, StageName, StageOutcome};
use crate::warehouse::{get_or_start_warehouse, StatementRunner};

pub const TEARDOWN_ORDER: [StageName; 7] = [
    StageName::RevokeGrants,
    StageName::RestorePolicy,
    StageName::DeleteGroup,
    StageName::DropTables,
    StageName::DeleteVolume,
    StageName::DeleteSchema,
    StageName::DeleteCatalog,
];

pub async fn run_teardown(client: &dyn ResourceClient, config: &LabConfig) -> RunResult {
    lab_header!("Cleanup: {}", config.volume);
    let mut run = RunResult::default();
    let mut failed: Option<StageName> = None;

    for step in TEARDOWN_ORDER {
        if let Some(previous) = failed {
            run.push(StageOutcome::skipped(step, format!("{previous} failed")));
            continue;
        }

        let mut stage = StageOutcome::new(step);
        if let Err(err) = run_step(client, config, step, &mut stage).await {
            lab_error!("{step}: {err}");
            stage.fail(&err);
            failed = Some(step);
        }
        run.push(stage.finish());
    }

    info!(success = run.success(), "teardown finished");
    run
}

async fn run_step(
    client: &dyn ResourceClient,
    config: &LabConfig,
    step: StageName,
    stage: &mut StageOutcome,
) -> Result<()> {
    let target = &config.volume;
    match step {
        StageName::RevokeGrants => {
            revoke_catalog_grants(client, &target.catalog, &config.access.group_name, stage).await
        }
        StageName::RestorePolicy => {
            restore_personal_compute_policy(client, &config.access.population_group, stage).await
        }
        StageName::DeleteGroup => delete_group(client, &config.access.group_name, stage).await,
        StageName::DropTables => drop_lakehouse(client, config, stage).await,
        StageName::DeleteVolume => {
            let name = target.full_name();
            record_delete(stage, format!("volume {name}"), client.delete_volume(&name).await)
        }
        StageName::DeleteSchema => {
            let name = target.schema_full_name();
            record_delete(stage, format!("schema {name}"), client.delete_schema(&name).await)
        }
        StageName::DeleteCatalog => record_delete(
            stage,
            format!("catalog {}", target.catalog),
            client.delete_catalog(&target.catalog, true).await,
        ),
        _ => Ok(()),
    }
}

fn record_delete(stage: &mut StageOutcome, resource: String, result: ClientResult<()>) -> Result<()> {
    match result {
        Ok(()) => {
            lab_success!("Deleted {resource}");
            stage.record(resource, ChangeKind::Deleted);
            Ok(())
        }
        Err(err) if err.is_not_found() => {
            lab_info!("{resource} already deleted");
            stage.record(resource, ChangeKind::AlreadyAbsent);
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Remove whatever the group holds on the catalog. Other principals are untouched.
pub async fn revoke_catalog_grants(
    client: &dyn ResourceClient,
    catalog: &str,
    group: &str,
    stage: &mut StageOutcome,
) -> Result<()> {
    let resource = format!("catalog grants {catalog} -> {group}");
    let assignments = match client.get_grants(SecurableType::Catalog, catalog).await {
        Ok(assignments) => assignments,
        Err(err) if err.is_not_found() => {
            lab_info!("Catalog {catalog} already deleted");
            stage.record(resource, ChangeKind::AlreadyAbsent);
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    let held = held_privileges(&assignments, group);
    if held.is_empty() {
        lab_info!("No grants for {group} on {catalog}");
        stage.record(resource, ChangeKind::AlreadyAbsent);
        return Ok(());
    }

    let change = PermissionsChange {
        principal: group.to_string(),
        add: Vec::new(),
        remove: held.into_iter().collect(),
    };
    client
        .update_grants(SecurableType::Catalog, catalog, &[change])
        .await?;
    lab_success!("Revoked {group} grants on {catalog}");
    stage.record(resource, ChangeKind::Removed);
    Ok(())
}

/// Deleting the group also drops its cluster ACL entries.
pub async fn delete_group(
    client: &dyn ResourceClient,
    name: &str,
    stage: &mut StageOutcome,
) -> Result<()> {
    let resource = format!("group {name}");
    match find_group(client, name).await? {
        Some(group) => record_delete(stage, resource, client.delete_group(&group.id).await),
        None => {
            lab_info!("{resource} already deleted");
            stage.record(resource, ChangeKind::AlreadyAbsent);
            Ok(())
        }
    }
}

/// Drop the lakehouse schema and every table in it.
pub async fn drop_lakehouse(
    client: &dyn ResourceClient,
    config: &LabConfig,
    stage: &mut StageOutcome,
) -> Result<()> {
    let target = &config.volume;
    let schema = target.lakehouse_full_name();
    let resource = format!("schema {schema}");

    match client.get_schema(&schema).await {
        Ok(_) => {}
        Err(err) if err.is_not_found() => {
            lab_info!("{resource} already deleted");
            stage.record(resource, ChangeKind::AlreadyAbsent);
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    }

    let warehouse_id = get_or_start_warehouse(client, &config.warehouse).await?;
    let runner = StatementRunner::from_timeouts(client, warehouse_id, &config.timeouts);
    runner
        .execute(&format!(
            "DROP SCHEMA IF EXISTS {} CASCADE",
            target.lakehouse_target()
        ))
        .await?;
    lab_success!("Dropped {resource} and its tables");
    stage.record(resource, ChangeKind::Deleted);
    Ok(())
}
