use std::collections::HashMap;

use concord_core::Micros;

use crate::error::AgentError;

/// Rates are expressed per 1,000 tokens, in micros, matching the ledger's
/// no-floating-point convention.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: String,
    pub provider_model_id: String,
    pub input_rate_micro_per_1k: Micros,
    pub output_rate_micro_per_1k: Micros,
}

impl ModelSpec {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> Micros {
        let input = (input_tokens as Micros) * self.input_rate_micro_per_1k / 1_000;
        let output = (output_tokens as Micros) * self.output_rate_micro_per_1k / 1_000;
        input + output
    }
}

/// Model alias → provider resolution (§4.5 step 2). Aliases form a closed
/// enumeration and are the single source of truth — callers never address a
/// provider or model id directly.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    aliases: HashMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, alias: impl Into<String>, spec: ModelSpec) {
        self.aliases.insert(alias.into(), spec);
    }

    pub fn resolve(&self, alias: &str) -> Result<&ModelSpec, AgentError> {
        self.aliases
            .get(alias)
            .ok_or_else(|| AgentError::UnknownModelAlias(alias.to_string()))
    }
}
