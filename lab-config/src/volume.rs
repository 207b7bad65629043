use std::fmt;
use std::str::FromStr;

use lab_core::{LabError, Result};
use serde::{Deserialize, Serialize};

/// Catalog/schema/volume triple the data files are uploaded to.
///
/// The catalog is created out-of-band; the tool only ever writes into it and,
/// during cleanup, removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeTarget {
    pub catalog: String,
    pub schema: String,
    pub volume: String,
    /// Schema inside `catalog` that holds the derived tables.
    pub lakehouse_schema: String,
}

impl Default for VolumeTarget {
    fn default() -> Self {
        Self {
            catalog: "aws-databricks-neo4j-lab".to_string(),
            schema: "lab-schema".to_string(),
            volume: "lab-volume".to_string(),
            lakehouse_schema: "lakehouse".to_string(),
        }
    }
}

impl VolumeTarget {
    /// Parse `catalog.schema.volume`, keeping the default lakehouse schema.
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split('.').map(str::trim).collect();
        match parts.as_slice() {
            [catalog, schema, volume]
                if !catalog.is_empty() && !schema.is_empty() && !volume.is_empty() =>
            {
                Ok(Self {
                    catalog: catalog.to_string(),
                    schema: schema.to_string(),
                    volume: volume.to_string(),
                    ..Self::default()
                })
            }
            _ => Err(LabError::Config(format!(
                "Invalid volume '{spec}', expected 'catalog.schema.volume'"
            ))),
        }
    }

    /// Replace catalog/schema/volume, keeping the lakehouse schema.
    pub fn with_volume(mut self, other: &VolumeTarget) -> Self {
        self.catalog = other.catalog.clone();
        self.schema = other.schema.clone();
        self.volume = other.volume.clone();
        self
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}.{}", self.catalog, self.schema, self.volume)
    }

    pub fn schema_full_name(&self) -> String {
        format!("{}.{}", self.catalog, self.schema)
    }

    pub fn lakehouse_full_name(&self) -> String {
        format!("{}.{}", self.catalog, self.lakehouse_schema)
    }

    /// `/Volumes/...` path used by file uploads and `read_files`.
    pub fn volumes_path(&self) -> String {
        format!("/Volumes/{}/{}/{}", self.catalog, self.schema, self.volume)
    }

    /// Backtick-quoted `catalog`.`lakehouse` prefix for SQL.
    pub fn lakehouse_target(&self) -> String {
        format!("`{}`.`{}`", self.catalog, self.lakehouse_schema)
    }
}

impl FromStr for VolumeTarget {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for VolumeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_part_names() {
        let target = VolumeTarget::parse("cat.sch.vol").unwrap();
        assert_eq!(target.catalog, "cat");
        assert_eq!(target.schema, "sch");
        assert_eq!(target.volume, "vol");
        assert_eq!(target.lakehouse_schema, "lakehouse");
        assert_eq!(target.volumes_path(), "/Volumes/cat/sch/vol");
        assert_eq!(target.lakehouse_target(), "`cat`.`lakehouse`");
    }

    #[test]
    fn rejects_malformed_names() {
        for bad in ["cat.sch", "cat..vol", "a.b.c.d", ""] {
            assert!(VolumeTarget::parse(bad).is_err(), "{bad} should be rejected");
        }
    }
}
