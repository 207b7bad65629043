use std::fmt;
use std::str::FromStr;

use lab_core::LabError;
use serde::{Deserialize, Serialize};

/// Cloud the workspace runs on. Resolved once when the config is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    #[default]
    Aws,
    Azure,
}

impl CloudProvider {
    /// Machine type used when no explicit node type is configured.
    pub fn default_node_type(self) -> &'static str {
        match self {
            // 8 GB, 2 cores
            CloudProvider::Aws => "m5.large",
            // 16 GB, 4 cores
            CloudProvider::Azure => "Standard_D4ds_v5",
        }
    }

    /// Whether AWS-only attributes (EBS volumes, instance profiles) apply.
    pub fn is_aws(self) -> bool {
        self == CloudProvider::Aws
    }
}

impl FromStr for CloudProvider {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(CloudProvider::Aws),
            "azure" => Ok(CloudProvider::Azure),
            other => Err(LabError::Config(format!(
                "Unknown cloud provider '{other}', expected 'aws' or 'azure'"
            ))),
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudProvider::Aws => write!(f, "aws"),
            CloudProvider::Azure => write!(f, "azure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("AZURE".parse::<CloudProvider>().unwrap(), CloudProvider::Azure);
        assert_eq!(" aws ".parse::<CloudProvider>().unwrap(), CloudProvider::Aws);
        assert!("gcp".parse::<CloudProvider>().is_err());
    }

    #[test]
    fn node_type_follows_provider() {
        assert_eq!(CloudProvider::Aws.default_node_type(), "m5.large");
        assert_eq!(CloudProvider::Azure.default_node_type(), "Standard_D4ds_v5");
    }
}
