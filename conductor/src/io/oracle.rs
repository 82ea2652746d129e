//! Oracle abstraction for content generation.
//!
//! The [`Oracle`] trait decouples agents and the planner from the actual
//! generation backend (by default a CLI such as `gemini`). Tests use scripted
//! oracles that answer from canned responses without spawning processes.

use std::process::Command;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::error::ConductorError;
use crate::io::config::OracleConfig;
use crate::io::process::run_command_with_timeout;

/// A completed generation and the model that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub model: String,
}

/// Abstraction over content-generation backends.
pub trait Oracle: Send + Sync {
    /// Short backend name used in status records (e.g. `gemini-cli`).
    fn name(&self) -> &str;

    /// Primary model identity; part of the plan cache fingerprint.
    fn model_id(&self) -> &str;

    /// Turn a prompt into text. Falling back to another model is allowed as
    /// long as usable text comes back; anything else is an error.
    fn generate(&self, prompt: &str) -> Result<Generation>;

    /// `name:model` label for the model that served `generation`.
    fn identity(&self, generation: &Generation) -> String {
        format!("{}:{}", self.name(), generation.model)
    }
}

/// Oracle that shells out to a completion CLI, trying each configured model
/// in order.
pub struct CommandOracle {
    name: String,
    config: OracleConfig,
}

impl CommandOracle {
    pub fn new(config: OracleConfig) -> Self {
        let program = config
            .command
            .first()
            .map(|c| c.rsplit(['/', '\\']).next().unwrap_or(c).to_string())
            .unwrap_or_default();
        Self {
            name: format!("{program}-cli"),
            config,
        }
    }

    /// Flag to pass the prompt with, or `None` when it must go to stdin.
    fn prompt_flag_for(&self, prompt: &str) -> Option<&str> {
        let flag = self.config.prompt_flag.as_deref()?;
        if prompt.len() > self.config.max_arg_bytes {
            debug!(
                prompt_bytes = prompt.len(),
                max_arg_bytes = self.config.max_arg_bytes,
                "prompt too large for the command line, using stdin"
            );
            return None;
        }
        Some(flag)
    }

    fn command_for(&self, model: Option<&str>, prompt_flag: Option<&str>, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.config.command[0]);
        cmd.args(&self.config.command[1..]);
        if let (Some(flag), Some(model)) = (&self.config.model_flag, model) {
            cmd.arg(flag).arg(model);
        }
        if let Some(flag) = prompt_flag {
            cmd.arg(flag).arg(prompt);
        }
        cmd
    }

    fn attempt(&self, model: Option<&str>, prompt: &str) -> Result<String, String> {
        let prompt_flag = self.prompt_flag_for(prompt);
        let cmd = self.command_for(model, prompt_flag, prompt);
        let stdin = prompt_flag.is_none().then_some(prompt.as_bytes());
        let output = run_command_with_timeout(
            cmd,
            stdin,
            self.config.timeout(),
            self.config.output_limit_bytes,
        )
        .map_err(|err| format!("{err:#}"))?;

        if output.timed_out {
            return Err(format!("timed out after {}s", self.config.timeout_secs));
        }
        if !output.status.success() {
            return Err(format!(
                "exit status {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            ));
        }
        let text = output.stdout_text();
        if text.trim().is_empty() {
            return Err("empty response".to_string());
        }
        Ok(text)
    }
}

impl Oracle for CommandOracle {
    fn name(&self) -> &str {
        &self.name
    }

    fn model_id(&self) -> &str {
        self.config.models.first().map_or("default", String::as_str)
    }

    #[instrument(skip_all, fields(oracle = %self.name, prompt_bytes = prompt.len()))]
    fn generate(&self, prompt: &str) -> Result<Generation> {
        let candidates: Vec<Option<&str>> = if self.config.models.is_empty() {
            vec![None]
        } else {
            self.config.models.iter().map(|m| Some(m.as_str())).collect()
        };

        let mut failures = Vec::new();
        for model in candidates {
            let label = model.unwrap_or("default");
            debug!(model = label, "requesting generation");
            match self.attempt(model, prompt) {
                Ok(text) => {
                    if !failures.is_empty() {
                        info!(model = label, "generation served by fallback model");
                    }
                    return Ok(Generation {
                        text,
                        model: label.to_string(),
                    });
                }
                Err(reason) => {
                    warn!(model = label, %reason, "generation attempt failed");
                    failures.push(format!("{label}: {reason}"));
                }
            }
        }
        Err(ConductorError::Oracle(failures.join("; ")).into())
    }
}
