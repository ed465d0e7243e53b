use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of probing for one external requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementReport {
    pub service_name: String,
    pub resolved_path: Option<PathBuf>,
}

impl RequirementReport {
    pub fn new(service_name: impl Into<String>, resolved_path: Option<PathBuf>) -> Self {
        Self {
            service_name: service_name.into(),
            resolved_path,
        }
    }

    pub fn is_present(&self) -> bool {
        self.resolved_path.is_some()
    }
}

/// What happened when an install was offered for a missing requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum InstallOutcome {
    Installed { service_name: String },
    Declined { service_name: String },
    Failed { service_name: String, error: String },
}

impl InstallOutcome {
    pub fn service_name(&self) -> &str {
        match self {
            InstallOutcome::Installed { service_name }
            | InstallOutcome::Declined { service_name }
            | InstallOutcome::Failed { service_name, .. } => service_name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementSummary {
    pub reports: Vec<RequirementReport>,
    #[serde(default)]
    pub installs: Vec<InstallOutcome>,
}

impl RequirementSummary {
    pub fn missing(&self) -> impl Iterator<Item = &RequirementReport> {
        self.reports.iter().filter(|report| !report.is_present())
    }

    pub fn all_present(&self) -> bool {
        self.missing().next().is_none()
    }
}
