use std::process::Stdio;

use anyhow::{Context, bail};
use shield_core::{EligibilityCheck, EligibilityFut};
use tokio::process::Command;

/// Runs an external program; exit status 0 means the install is eligible.
///
/// A failure to spawn is an error, any other exit status is a plain `false`.
#[derive(Debug, Clone)]
pub struct CommandEligibility {
    program: String,
    args: Vec<String>,
    label: String,
}

impl CommandEligibility {
    pub fn new(command: &[String]) -> anyhow::Result<Self> {
        let Some((program, args)) = command.split_first() else {
            bail!("eligibility command is empty");
        };
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            label: command.join(" "),
        })
    }
}

impl EligibilityCheck for CommandEligibility {
    fn check(&self) -> EligibilityFut<'_> {
        Box::pin(async move {
            let status = Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await
                .with_context(|| format!("failed to run eligibility command `{}`", self.label))?;
            tracing::debug!(command = %self.label, code = ?status.code(), "Eligibility command finished");
            Ok(status.success())
        })
    }

    fn describe(&self) -> &str {
        &self.label
    }
}
