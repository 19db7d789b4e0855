use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// What to do with a phrase containing a token the symbol table does
/// not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownTokenPolicy {
    /// Keep the arcs built before the unknown token. The path never
    /// reaches the final state.
    #[default]
    Truncate,
    /// Drop the whole phrase.
    Skip,
}

/// Options for building a context graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Contexts after this many are ignored
    pub max_contexts: usize,
    /// Contexts with more tokens than this are skipped
    pub max_context_length: usize,
    /// Reward per matched token
    pub context_score: f32,
    pub unknown_token_policy: UnknownTokenPolicy,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_contexts: 5000,
            max_context_length: 100,
            context_score: 3.0,
            unknown_token_policy: UnknownTokenPolicy::default(),
        }
    }
}

impl ContextConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.context_score.is_finite() || self.context_score <= 0.0 {
            return Err(anyhow!(
                "context_score must be finite and positive, got {}",
                self.context_score
            ));
        }
        if self.max_context_length == 0 {
            return Err(anyhow!("max_context_length must be at least 1"));
        }
        Ok(())
    }

    /// Penalty on the escape arc leaving a state `depth` tokens deep.
    pub fn escape_score(&self, depth: usize) -> f32 {
        -self.context_score * depth as f32
    }
}
