//! Steps that run an external program, declared in manifests.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::step::Step;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CommandStepSpec {
    #[serde(default = "default_step_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

fn default_step_version() -> String {
    "0.0.0".to_string()
}

impl CommandStepSpec {
    /// Builds a step that spawns the command and waits for it. A non-zero
    /// exit status fails the step.
    pub fn to_step(&self, name: &str) -> Result<Step> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(PipelineError::invalid_argument(format!(
                "Step '{name}' has an empty command"
            )));
        };
        if program.trim().is_empty() {
            return Err(PipelineError::invalid_argument(format!(
                "Step '{name}' has an empty program name"
            )));
        }

        let program = program.clone();
        let args = args.to_vec();
        let env = self.env.clone();
        let cwd = self.cwd.clone();
        let rendered = self.command.join(" ");

        Ok(Step::new(
            name,
            self.version.clone(),
            self.description.clone(),
            move || {
                let mut cmd = Command::new(&program);
                cmd.args(&args).envs(&env);
                if let Some(dir) = &cwd {
                    cmd.current_dir(dir);
                }
                debug!(command = rendered.as_str(), "Spawning command");
                let status = cmd
                    .status()
                    .with_context(|| format!("Failed to spawn command: {rendered}"))?;
                if !status.success() {
                    match status.code() {
                        Some(code) => bail!("Command `{rendered}` exited with status {code}"),
                        None => bail!("Command `{rendered}` was terminated by a signal"),
                    }
                }
                Ok(())
            },
        ))
    }
}
