//! `runs:/` model locators

use std::fmt;

/// Locator of a model artifact logged under a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelUri {
    pub run_id: String,
    pub artifact_path: String,
}

impl ModelUri {
    pub fn runs(run_id: impl Into<String>, artifact_path: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            artifact_path: artifact_path.into().trim_matches('/').to_string(),
        }
    }

    /// Path of a file inside the artifact directory, relative to the run root.
    pub fn artifact_file(&self, name: &str) -> String {
        format!("{}/{}", self.artifact_path, name)
    }
}

impl fmt::Display for ModelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runs:/{}/{}", self.run_id, self.artifact_path)
    }
}
