//! TOML run configuration.
//!
//! A `RunSpec` bundles a backtest config with optional optimization and
//! risk-limit sections. Parsing validates everything up front so an
//! illegal configuration never starts a run.

use crate::engine::BacktestConfig;
use crate::error::Result;
use crate::optimize::OptimizationConfig;
use crate::risk::RiskLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A full run specification loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub backtest: BacktestConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization: Option<OptimizationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_limits: Option<RiskLimits>,
}

impl RunSpec {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let spec: RunSpec = toml::from_str(content)?;
        spec.backtest.validate()?;
        if let Some(optimization) = &spec.optimization {
            optimization.validate()?;
        }
        Ok(spec)
    }

    /// Parse and validate a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}
