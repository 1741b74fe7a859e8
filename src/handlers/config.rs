//! Handler configuration as declared in pipeline files

use crate::handlers::{CommandHandler, EchoHandler, HandlerRegistry, StepHandler};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// How a role is served
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HandlerConfig {
    /// Echo the composed input back as the step output
    Echo,

    /// Run a subprocess; the composed input is passed as the last argument
    Command {
        program: String,

        #[serde(default)]
        args: Vec<String>,

        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_timeout_secs() -> u64 {
    300
}

impl HandlerConfig {
    pub fn build(&self) -> Arc<dyn StepHandler> {
        match self {
            HandlerConfig::Echo => Arc::new(EchoHandler),
            HandlerConfig::Command {
                program,
                args,
                timeout_secs,
            } => Arc::new(CommandHandler::new(program.clone(), args.clone(), *timeout_secs)),
        }
    }
}

/// Build a registry from a role -> config map
pub fn registry_from_configs(configs: &HashMap<String, HandlerConfig>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for (role, config) in configs {
        registry.register(role.clone(), config.build());
    }
    registry
}
