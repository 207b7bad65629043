//! Warehouse lookup and statement execution.

use lab_config::{Timeouts, WarehouseSettings};
use lab_core::{lab_println, poll_until, LabError, PollPolicy, PollStatus, Result};
use lab_provider::models::{StatementResponse, StatementState, WarehouseState};
use lab_provider::ResourceClient;
use tracing::{debug, warn};

/// Locate the warehouse by name and make sure it is starting or running.
pub async fn get_or_start_warehouse(
    client: &dyn ResourceClient,
    settings: &WarehouseSettings,
) -> Result<String> {
    lab_println!("Looking for warehouse \"{}\"...", settings.name);
    let warehouse = client
        .list_warehouses()
        .await?
        .into_iter()
        .find(|w| w.name == settings.name)
        .ok_or_else(|| {
            LabError::NotFound(format!(
                "Warehouse '{}' (set WAREHOUSE_NAME or create it in the workspace)",
                settings.name
            ))
        })?;

    lab_println!("  Found: {} ({:?})", warehouse.id, warehouse.state);
    if matches!(warehouse.state, WarehouseState::Stopped | WarehouseState::Stopping) {
        lab_println!("  Starting warehouse...");
        client.start_warehouse(&warehouse.id).await?;
    }
    Ok(warehouse.id)
}

/// Submits statements to one warehouse and polls them to completion.
pub struct StatementRunner<'a> {
    client: &'a dyn ResourceClient,
    warehouse_id: String,
    policy: PollPolicy,
}

impl<'a> StatementRunner<'a> {
    pub fn new(
        client: &'a dyn ResourceClient,
        warehouse_id: impl Into<String>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            client,
            warehouse_id: warehouse_id.into(),
            policy,
        }
    }

    pub fn from_timeouts(
        client: &'a dyn ResourceClient,
        warehouse_id: impl Into<String>,
        timeouts: &Timeouts,
    ) -> Self {
        Self::new(client, warehouse_id, timeouts.statement_policy())
    }

    /// Run `sql` to a terminal state. A canceled statement is resubmitted once.
    pub async fn execute(&self, sql: &str) -> Result<StatementResponse> {
        match self.execute_once(sql).await {
            Err(LabError::StatementCanceled(id)) => {
                warn!(statement_id = %id, "statement was canceled, retrying once");
                self.execute_once(sql).await
            }
            other => other,
        }
    }

    /// Run a single-value query and parse the value as a count.
    pub async fn query_count(&self, sql: &str) -> Result<u64> {
        let response = self.execute(sql).await?;
        let value = response.first_value().ok_or_else(|| {
            let id = &response.statement_id;
            LabError::StatementFailed(format!("statement {id} returned no rows"))
        })?;
        value.trim().parse().map_err(|_| {
            LabError::StatementFailed(format!("expected a count, got '{value}'"))
        })
    }

    async fn execute_once(&self, sql: &str) -> Result<StatementResponse> {
        let submitted = self
            .client
            .execute_statement(&self.warehouse_id, sql)
            .await?;
        let statement_id = submitted.statement_id.clone();
        debug!(statement_id, state = %submitted.state(), "submitted statement");

        let response = if submitted.state().is_terminal() {
            submitted
        } else {
            let client = self.client;
            let id = statement_id.as_str();
            let polled = poll_until(self.policy, "statement to finish", move || async move {
                let response = client.get_statement(id).await?;
                if response.state().is_terminal() {
                    Ok(PollStatus::Done(response))
                } else {
                    Ok(PollStatus::Waiting)
                }
            })
            .await;

            match polled {
                Ok(response) => response,
                Err(err) if err.is_timeout() => {
                    // Free the warehouse before reporting.
                    if let Err(cancel_err) = self.client.cancel_statement(&statement_id).await {
                        warn!(statement_id, %cancel_err, "failed to cancel timed-out statement");
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        };

        match response.state() {
            StatementState::Succeeded => Ok(response),
            StatementState::Failed => Err(LabError::StatementFailed(response.error_message())),
            _ => Err(LabError::StatementCanceled(response.statement_id)),
        }
    }
}
