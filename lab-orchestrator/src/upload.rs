//! Reference data upload into the target volume.

use std::collections::HashSet;
use std::path::PathBuf;

use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use lab_config::{DataSettings, VolumeTarget};
use lab_core::{lab_error, lab_println, lab_success, LabError, Result};
use lab_provider::ResourceClient;
use tracing::{debug, info};

use crate::report::{ChangeKind, StageOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEntry {
    pub local: PathBuf,
    pub remote: String,
}

impl UploadEntry {
    pub fn file_name(&self) -> &str {
        self.remote.rsplit('/').next().unwrap_or(&self.remote)
    }
}

/// Ordered (local, remote) pairs. Every entry is uploaded with overwrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadManifest {
    pub entries: Vec<UploadEntry>,
}

impl UploadManifest {
    /// Collect matching files from the data directory, sorted by file name.
    pub fn from_dir(settings: &DataSettings, target: &VolumeTarget) -> Result<Self> {
        let dir = &settings.data_dir;
        if !dir.is_dir() {
            return Err(LabError::Config(format!(
                "Data directory not found: {} (set DATA_DIR)",
                dir.display()
            )));
        }

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for pattern in &settings.patterns {
            let pattern = dir.join(pattern).to_string_lossy().to_string();
            let paths = glob(&pattern)
                .map_err(|e| LabError::Config(format!("Invalid data pattern {pattern}: {e}")))?;

            for path in paths.flatten() {
                let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                    continue;
                };
                if !path.is_file() || settings.excluded_files.contains(&name) {
                    continue;
                }
                if seen.insert(name.clone()) {
                    entries.push(UploadEntry {
                        remote: format!("{}/{name}", target.volumes_path()),
                        local: path,
                    });
                }
            }
        }

        entries.sort_by(|a, b| a.file_name().cmp(b.file_name()));
        debug!(count = entries.len(), dir = %dir.display(), "built upload manifest");
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Upload every manifest entry, then list the volume and confirm each one landed.
///
/// A missing volume ends the stage before any transfer. Individual file
/// failures are recorded and the remaining files are still uploaded.
pub async fn upload_manifest(
    client: &dyn ResourceClient,
    manifest: &UploadManifest,
    target: &VolumeTarget,
    stage: &mut StageOutcome,
) -> Result<()> {
    let volume = target.full_name();
    client.get_volume(&volume).await.map_err(|e| {
        if e.is_not_found() {
            LabError::NotFound(format!(
                "Volume {volume} (create the catalog, schema and volume before running setup)"
            ))
        } else {
            e.into()
        }
    })?;

    lab_println!("Uploading {} files to {}...", manifest.len(), target.volumes_path());
    let progress = ProgressBar::new(manifest.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("  [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    for entry in &manifest.entries {
        let name = entry.file_name().to_string();
        progress.set_message(name.clone());

        let contents = match tokio::fs::read(&entry.local).await {
            Ok(bytes) => bytes,
            Err(err) => {
                stage.record_detail(&name, ChangeKind::Failed, format!("read failed: {err}"));
                progress.inc(1);
                continue;
            }
        };
        let size = contents.len();

        match client.upload_file(&entry.remote, contents, true).await {
            Ok(()) => {
                debug!(file = %name, size, "uploaded");
                stage.record(&name, ChangeKind::Updated);
            }
            Err(err) => {
                stage.record_detail(&name, ChangeKind::Failed, err.to_string());
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    let present: HashSet<String> = client
        .list_directory(&target.volumes_path())
        .await?
        .into_iter()
        .map(|e| e.name)
        .collect();

    let mut verified = 0;
    for entry in &manifest.entries {
        let name = entry.file_name();
        if present.contains(name) {
            verified += 1;
        } else if !stage.failures().any(|c| c.resource == name) {
            lab_error!("{name} is missing from the volume after upload");
            stage.record_detail(name, ChangeKind::Failed, "not present after upload");
        }
    }

    info!(verified, total = manifest.len(), "upload verified");
    if verified == manifest.len() {
        lab_success!("Uploaded {verified} files");
    } else {
        lab_error!("{} of {} files missing", manifest.len() - verified, manifest.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn data_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        for name in [
            "nodes_sensors.csv",
            "nodes_aircraft.csv",
            "README_LARGE_DATASET.md",
            "ARCHITECTURE.md",
            "MAINTENANCE.md",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        dir
    }

    #[test]
    fn manifest_filters_and_sorts() {
        let dir = data_dir();
        let settings = DataSettings {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let target = VolumeTarget::parse("cat.sch.vol").unwrap();

        let manifest = UploadManifest::from_dir(&settings, &target).unwrap();
        let names: Vec<&str> = manifest.entries.iter().map(|e| e.file_name()).collect();

        assert_eq!(names, vec!["MAINTENANCE.md", "nodes_aircraft.csv", "nodes_sensors.csv"]);
        assert_eq!(
            manifest.entries[1].remote,
            "/Volumes/cat/sch/vol/nodes_aircraft.csv"
        );
    }

    #[test]
    fn missing_directory_is_config_error() {
        let settings = DataSettings {
            data_dir: PathBuf::from("/nonexistent/lab-data"),
            ..Default::default()
        };
        let err = UploadManifest::from_dir(&settings, &VolumeTarget::default()).unwrap_err();
        assert!(matches!(err, LabError::Config(_)));
    }
}
