//! Cluster library installation.
//!
//! Libraries already reported INSTALLED are left alone. Everything else is
//! requested in one install call and then polled together; a library that
//! fails, or is still in flight when the timeout expires, fails on its own.

use std::collections::HashMap;

use lab_config::{LibrarySettings, Timeouts};
use lab_core::{lab_println, lab_warning, poll_until, PollStatus, Result};
use lab_provider::models::{Library, LibraryInstallStatus, LibraryStatus};
use lab_provider::ResourceClient;
use tracing::{debug, warn};

use crate::report::{ChangeKind, StageOutcome};

pub fn required_libraries(settings: &LibrarySettings) -> Vec<Library> {
    settings
        .maven
        .iter()
        .map(Library::maven)
        .chain(settings.pypi.iter().map(Library::pypi))
        .collect()
}

pub async fn ensure_libraries(
    client: &dyn ResourceClient,
    cluster_id: &str,
    libraries: &[Library],
    timeouts: &Timeouts,
    stage: &mut StageOutcome,
) -> Result<()> {
    lab_println!("Checking library status...");
    let current = status_map(client.cluster_library_statuses(cluster_id).await?);

    let mut to_install = Vec::new();
    let mut waiting = Vec::new();
    for library in libraries {
        match current.get(library).map(|s| s.status) {
            Some(LibraryInstallStatus::Installed) => {
                stage.record(library.to_string(), ChangeKind::AlreadyPresent);
            }
            Some(status) if status.is_in_flight() => {
                debug!(library = %library, ?status, "install already in progress");
                waiting.push(library.clone());
            }
            _ => to_install.push(library.clone()),
        }
    }

    if to_install.is_empty() && waiting.is_empty() {
        lab_println!("  {} libraries already installed", libraries.len());
        return Ok(());
    }

    if !to_install.is_empty() {
        client.install_libraries(cluster_id, &to_install).await?;
        lab_println!("  Requested installation of {} libraries", to_install.len());
    }
    waiting.extend(to_install);

    let policy = timeouts.library_policy();
    let pending = &waiting;
    let finished = poll_until(policy, "library installation", move || async move {
        let statuses = status_map(client.cluster_library_statuses(cluster_id).await?);
        let in_flight = pending
            .iter()
            .filter(|lib| statuses.get(*lib).map_or(true, |s| s.status.is_in_flight()))
            .count();
        lab_println!("  {} of {} libraries settled", pending.len() - in_flight, pending.len());
        if in_flight == 0 {
            Ok(PollStatus::Done(statuses))
        } else {
            Ok(PollStatus::Waiting)
        }
    })
    .await;

    // A timeout fails only the libraries still in flight.
    let (statuses, timed_out) = match finished {
        Ok(statuses) => (statuses, None),
        Err(err) if err.is_timeout() => {
            warn!(%err, "library installation timed out");
            let statuses = status_map(client.cluster_library_statuses(cluster_id).await?);
            (statuses, Some(err.to_string()))
        }
        Err(err) => return Err(err),
    };

    for library in &waiting {
        let status = statuses.get(library);
        match status.map(|s| s.status) {
            Some(LibraryInstallStatus::Installed) => {
                stage.record(library.to_string(), ChangeKind::Created);
            }
            Some(LibraryInstallStatus::Failed) => {
                let detail = status
                    .and_then(|s| s.messages.first().cloned())
                    .unwrap_or_else(|| "installation failed".to_string());
                lab_warning!("Library {library} failed: {detail}");
                stage.record_detail(library.to_string(), ChangeKind::Failed, detail);
            }
            other => {
                let detail = timed_out
                    .clone()
                    .unwrap_or_else(|| format!("unexpected status {other:?}"));
                lab_warning!("Library {library} did not install: {detail}");
                stage.record_detail(library.to_string(), ChangeKind::Failed, detail);
            }
        }
    }

    Ok(())
}

fn status_map(statuses: Vec<LibraryStatus>) -> HashMap<Library, LibraryStatus> {
    statuses
        .into_iter()
        .map(|s| (s.library.clone(), s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maven_connector_comes_first() {
        let libraries = required_libraries(&LibrarySettings::default());
        assert!(matches!(libraries[0], Library::Maven { .. }));
        assert!(libraries[0].name().starts_with("org.neo4j:neo4j-connector-apache-spark"));
        assert!(libraries.iter().any(|l| l.name() == "neo4j==6.0.2"));
    }
}
