//! Engine configuration: limits applied to custom formulas.

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid engine config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Engine config bound '{0}' must be greater than zero")]
    ZeroBound(&'static str),
    #[error("Engine config bound '{name}' must be at most {max}")]
    BoundTooLarge { name: &'static str, max: usize },
}

/// Ceiling on `maxNestingDepth`. Evaluation recurses once per tree level, so a
/// deeper bound could exhaust the stack of a default-sized thread.
pub const MAX_NESTING_DEPTH: usize = 200;

/// Limits applied to custom formulas.
///
/// Every bound keeps a single evaluation finite no matter what an author types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum formula source length, in characters.
    pub max_formula_length: usize,
    /// Maximum expression tree depth: parentheses, unary operators,
    /// conditionals, and each link of an operator or member chain. Capped at
    /// [`MAX_NESTING_DEPTH`].
    pub max_nesting_depth: usize,
    /// Maximum expression nodes visited during one evaluation.
    pub max_evaluation_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_formula_length: 4096,
            max_nesting_depth: 64,
            max_evaluation_steps: 10_000,
        }
    }
}

impl EngineConfig {
    /// Reads a config from JSON. Missing keys keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_formula_length == 0 {
            return Err(ConfigError::ZeroBound("maxFormulaLength"));
        }
        if self.max_nesting_depth == 0 {
            return Err(ConfigError::ZeroBound("maxNestingDepth"));
        }
        if self.max_nesting_depth > MAX_NESTING_DEPTH {
            return Err(ConfigError::BoundTooLarge { name: "maxNestingDepth", max: MAX_NESTING_DEPTH });
        }
        if self.max_evaluation_steps == 0 {
            return Err(ConfigError::ZeroBound("maxEvaluationSteps"));
        }
        Ok(())
    }
}
