//! Pipeline configuration.
//!
//! Stored as TOML. Every field has a default, so an empty file is a valid
//! configuration:
//!
//! ```toml
//! analysts = ["market", "news"]
//! max_debate_rounds = 1
//! max_risk_rounds = 2
//! node_timeout_secs = 120
//! recall_matches = 2
//! online_tools = true
//! memory_dir = "./memory"
//! audit_dir = "./eval_results"
//!
//! [retry]
//! max_retries = 2
//! backoff_base_ms = 500
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{AnalystRole, FlowError, Result};
use crate::retry::RetryPolicy;
use crate::step::StepOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Analyst role names run in the entry phase.
    pub analysts: Vec<String>,
    /// Bull/bear exchanges before the trader. At least 1.
    pub max_debate_rounds: u32,
    /// Extra aggressive → neutral → conservative rounds.
    pub max_risk_rounds: u32,
    /// Per-node deadline. Unset means no deadline.
    pub node_timeout_secs: Option<u64>,
    /// Past lessons attached to each memory-owning role's prompt.
    pub recall_matches: usize,
    /// Run the analyst tool sub-step.
    pub online_tools: bool,
    /// Where per-run audit artifacts are written. Unset disables them.
    pub audit_dir: Option<PathBuf>,
    /// Where memory stores persist. Unset keeps memories in process.
    pub memory_dir: Option<PathBuf>,
    /// Kept last: TOML tables must follow plain values.
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysts: ["market", "social", "news", "fundamentals"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_debate_rounds: 1,
            max_risk_rounds: 1,
            node_timeout_secs: None,
            recall_matches: 2,
            online_tools: true,
            audit_dir: None,
            memory_dir: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| FlowError::InvalidConfig(format!("config parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FlowError::InvalidConfig(format!("config serialize error: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        self.analyst_roles()?;
        if self.max_debate_rounds == 0 {
            return Err(FlowError::InvalidConfig(
                "max_debate_rounds must be at least 1".into(),
            ));
        }
        if self.node_timeout_secs == Some(0) {
            return Err(FlowError::InvalidConfig(
                "node_timeout_secs must be positive when set".into(),
            ));
        }
        Ok(())
    }

    /// The analyst selection, parsed and checked for duplicates.
    pub fn analyst_roles(&self) -> Result<Vec<AnalystRole>> {
        Ok(AnalystRole::parse_selection(&self.analysts)?)
    }

    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_secs.map(Duration::from_secs)
    }

    pub fn step_options(&self) -> StepOptions {
        StepOptions {
            recall_matches: self.recall_matches,
            online_tools: self.online_tools,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GraphConfigurationError;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.analyst_roles().unwrap().len(), 4);
    }

    #[test]
    fn test_partial_document_overrides() {
        let config = PipelineConfig::from_toml_str(
            r#"
            analysts = ["metaphysics"]
            max_risk_rounds = 3
            node_timeout_secs = 30

            [retry]
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.analyst_roles().unwrap(), vec![AnalystRole::Metaphysics]);
        assert_eq!(config.max_risk_rounds, 3);
        assert_eq!(config.node_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff_base_ms, 500);
    }

    #[test]
    fn test_validation_failures() {
        let err = PipelineConfig::from_toml_str("max_debate_rounds = 0").unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig(_)));

        let err = PipelineConfig::from_toml_str(r#"analysts = ["tarot"]"#).unwrap_err();
        assert!(matches!(
            err,
            FlowError::GraphConfiguration(GraphConfigurationError::UnknownRole(_))
        ));

        let err = PipelineConfig::from_toml_str("max_risk_rounds = \"many\"").unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_from_file_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tradeflow.toml");
        let mut config = PipelineConfig::default();
        config.memory_dir = Some(dir.path().join("memory"));
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
    }
}
