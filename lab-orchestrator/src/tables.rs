//! Lakehouse tables derived from the uploaded CSV files.

use std::collections::HashSet;

use lab_config::VolumeTarget;
use lab_core::{lab_error, lab_println, lab_success, lab_warning, Result};
use lab_provider::ResourceClient;
use tracing::{debug, warn};

use crate::report::{ChangeKind, StageOutcome};
use crate::warehouse::StatementRunner;

const TABLE_PROPERTIES: &str = "TBLPROPERTIES ('delta.columnMapping.mode' = 'name')";

/// One create-or-replace statement, the file it reads and the rows it must produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: &'static str,
    pub source_file: &'static str,
    pub expected_rows: u64,
    pub sql: String,
    pub comments: Vec<String>,
}

pub fn schema_sql(target: &VolumeTarget) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", target.lakehouse_target())
}

pub fn count_sql(target: &VolumeTarget, table: &str) -> String {
    format!("SELECT COUNT(*) FROM {}.`{table}`", target.lakehouse_target())
}

fn read_files(target: &VolumeTarget, file: &str) -> String {
    format!(
        "read_files('{}/{file}', format => 'csv', header => 'true', inferSchema => 'true')",
        target.volumes_path()
    )
}

fn comments(t: &str, table: &str, about: &str, columns: &[(&str, &str)]) -> Vec<String> {
    let mut out = vec![format!("COMMENT ON TABLE {t}.`{table}` IS '{about}'")];
    out.extend(
        columns
            .iter()
            .map(|(column, text)| format!("COMMENT ON COLUMN {t}.`{table}`.{column} IS '{text}'")),
    );
    out
}

fn create_sql(t: &str, table: &str, select: &str) -> String {
    format!("CREATE OR REPLACE TABLE {t}.`{table}` {TABLE_PROPERTIES} {select}")
}

pub fn table_definitions(target: &VolumeTarget) -> Vec<TableDefinition> {
    let t = target.lakehouse_target();

    vec![
        TableDefinition {
            name: "aircraft",
            source_file: "nodes_aircraft.csv",
            expected_rows: 20,
            sql: create_sql(
                &t,
                "aircraft",
                &format!("AS SELECT * FROM {}", read_files(target, "nodes_aircraft.csv")),
            ),
            comments: comments(
                &t,
                "aircraft",
                "Fleet of aircraft with tail numbers, models, and operators",
                &[
                    ("`:ID(Aircraft)`", "Unique aircraft identifier"),
                    ("tail_number", "Aircraft registration/tail number (e.g., N95040A)"),
                    ("model", "Aircraft model (e.g., B737-800, A320-200)"),
                    ("operator", "Airline operator name"),
                ],
            ),
        },
        TableDefinition {
            name: "systems",
            source_file: "nodes_systems.csv",
            expected_rows: 80,
            sql: create_sql(
                &t,
                "systems",
                &format!("AS SELECT * FROM {}", read_files(target, "nodes_systems.csv")),
            ),
            comments: comments(
                &t,
                "systems",
                "Aircraft systems including engines, avionics, and hydraulics",
                &[
                    ("`:ID(System)`", "Unique system identifier"),
                    ("type", "System type (Engine, Avionics, Hydraulics)"),
                    ("name", "Human-readable system name"),
                ],
            ),
        },
        TableDefinition {
            name: "sensors",
            source_file: "nodes_sensors.csv",
            expected_rows: 160,
            sql: create_sql(
                &t,
                "sensors",
                &format!("AS SELECT * FROM {}", read_files(target, "nodes_sensors.csv")),
            ),
            comments: comments(
                &t,
                "sensors",
                "Sensors installed on aircraft systems",
                &[
                    ("`:ID(Sensor)`", "Unique sensor identifier"),
                    (
                        "type",
                        "Sensor type: EGT (Exhaust Gas Temperature in Celsius), \
                         Vibration (ips), N1Speed (RPM), FuelFlow (kg/s)",
                    ),
                    ("unit", "Unit of measurement"),
                ],
            ),
        },
        TableDefinition {
            name: "sensor_readings",
            source_file: "nodes_readings.csv",
            expected_rows: 345_600,
            sql: create_sql(
                &t,
                "sensor_readings",
                &format!(
                    "PARTITIONED BY (sensor_id) \
                     AS SELECT reading_id, sensor_id, to_timestamp(ts) AS timestamp, \
                     CAST(value AS DOUBLE) AS value FROM {}",
                    read_files(target, "nodes_readings.csv")
                ),
            ),
            comments: comments(
                &t,
                "sensor_readings",
                "Hourly sensor readings over 90 days (July-September 2024)",
                &[
                    ("reading_id", "Unique reading identifier"),
                    ("sensor_id", "Foreign key to sensors table"),
                    ("timestamp", "Reading timestamp (hourly intervals)"),
                    ("value", "Sensor reading value in the sensor unit"),
                ],
            ),
        },
    ]
}

/// Create the lakehouse schema, then each table independently.
///
/// A table already holding its documented row count is left alone, even when
/// its source file is gone from the volume. Row counts are always checked with
/// a separate `COUNT(*)` query. One table failing does
/// not stop the others; only a schema failure ends the stage early.
pub async fn create_tables(
    client: &dyn ResourceClient,
    runner: &StatementRunner<'_>,
    target: &VolumeTarget,
    definitions: &[TableDefinition],
    stage: &mut StageOutcome,
) -> Result<()> {
    let schema_name = target.lakehouse_full_name();
    let schema_resource = format!("schema {schema_name}");
    match client.get_schema(&schema_name).await {
        Ok(_) => stage.record(schema_resource, ChangeKind::AlreadyPresent),
        Err(err) if err.is_not_found() => {
            lab_println!("Creating lakehouse schema {}...", target.lakehouse_target());
            runner.execute(&schema_sql(target)).await?;
            stage.record(schema_resource, ChangeKind::Created);
        }
        Err(err) => return Err(err.into()),
    }

    let available: HashSet<String> = match client.list_directory(&target.volumes_path()).await {
        Ok(entries) => entries.into_iter().map(|e| e.name).collect(),
        Err(err) if err.is_not_found() => HashSet::new(),
        Err(err) => return Err(err.into()),
    };

    for table in definitions {
        let resource = format!("table {}", table.name);

        let count = count_sql(target, table.name);
        let existing_rows = match runner.query_count(&count).await {
            Ok(rows) => Some(rows),
            Err(err) => {
                debug!(table = table.name, %err, "table not readable, will create");
                None
            }
        };
        if existing_rows == Some(table.expected_rows) {
            lab_println!("  {} already has {} rows", table.name, table.expected_rows);
            let detail = format!("{} rows", table.expected_rows);
            stage.record_detail(resource, ChangeKind::Reused, detail);
            continue;
        }

        if !available.contains(table.source_file) {
            let detail = format!(
                "source file {} not found in {}",
                table.source_file,
                target.volumes_path()
            );
            lab_error!("{}: {detail}", table.name);
            stage.record_detail(resource, ChangeKind::Failed, detail);
            continue;
        }

        lab_println!("  Creating {} table...", table.name);
        if let Err(err) = runner.execute(&table.sql).await {
            lab_error!("{} failed: {err}", table.name);
            stage.record_detail(resource, ChangeKind::Failed, err.to_string());
            continue;
        }

        match runner.query_count(&count).await {
            Ok(rows) if rows == table.expected_rows => {
                let kind = if existing_rows.is_some() {
                    ChangeKind::Updated
                } else {
                    ChangeKind::Created
                };
                lab_success!("{}: {rows} rows", table.name);
                stage.record_detail(resource, kind, format!("{rows} rows"));
                apply_comments(runner, table).await;
            }
            Ok(rows) => {
                let detail = format!("expected {} rows, found {rows}", table.expected_rows);
                lab_error!("{}: {detail}", table.name);
                stage.record_detail(resource, ChangeKind::Failed, detail);
            }
            Err(err) => {
                lab_error!("{}: row count check failed: {err}", table.name);
                let detail = format!("row count check failed: {err}");
                stage.record_detail(resource, ChangeKind::Failed, detail);
            }
        }
    }

    Ok(())
}

async fn apply_comments(runner: &StatementRunner<'_>, table: &TableDefinition) {
    for comment in &table.comments {
        if let Err(err) = runner.execute(comment).await {
            warn!(table = table.name, %err, "comment failed");
            lab_warning!("Could not apply comment on {}: {err}", table.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_cover_documented_tables() {
        let target = VolumeTarget::parse("cat.sch.vol").unwrap();
        let defs = table_definitions(&target);
        let counts: Vec<(&str, u64)> = defs.iter().map(|d| (d.name, d.expected_rows)).collect();
        assert_eq!(
            counts,
            vec![
                ("aircraft", 20),
                ("systems", 80),
                ("sensors", 160),
                ("sensor_readings", 345_600)
            ]
        );
        for def in &defs {
            assert!(def.sql.starts_with("CREATE OR REPLACE TABLE `cat`.`lakehouse`."));
            assert!(def.sql.contains(&format!("/Volumes/cat/sch/vol/{}", def.source_file)));
            assert!(def.sql.contains("delta.columnMapping.mode"));
        }
        assert!(defs[3].sql.contains("PARTITIONED BY (sensor_id)"));
    }

    #[test]
    fn count_query_targets_lakehouse() {
        let target = VolumeTarget::parse("cat.sch.vol").unwrap();
        assert_eq!(
            count_sql(&target, "sensors"),
            "SELECT COUNT(*) FROM `cat`.`lakehouse`.`sensors`"
        );
    }
}
