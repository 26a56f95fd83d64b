//! JSON-lines lifecycle scripts.
//!
//! Each non-blank line is one of:
//!
//! ```text
//! {"event": "startup", "reason": "ADDON_INSTALL"}     host lifecycle event
//! {"end_study": "expired"}                            programmatic ending
//! {"message": {"shield": true, "msg": "info"}}        embedded extension message
//! ```
//!
//! Lines starting with `#` are comments. Every line produces one JSON report
//! on the output, plus one per uninstall event the host performs on its own.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use shield_core::{
    EndingOutcome, ExtensionChannel, InstallMetadata, LifecycleController, LifecycleOutcome,
    MessageDispatcher, MessageResponse,
};
use shield_types::{EndingReason, HostReason, LifecycleEvent, LifecycleState};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScriptLine {
    Event(LifecycleEvent),
    EndStudy { end_study: EndingReason },
    Message { message: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Report {
    Event {
        event: LifecycleEvent,
        state: LifecycleState,
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<LifecycleOutcome>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    EndStudy {
        state: LifecycleState,
        outcome: EndingOutcome,
    },
    Message {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<MessageResponse>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Invalid {
        line: usize,
        error: String,
    },
}

impl Report {
    /// Script lines that could not be parsed. Rejected events and messages
    /// are reported but do not count.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }
}

/// Extension channel whose messages come from the script.
#[derive(Debug, Default)]
pub struct ScriptExtension {
    dispatcher: Mutex<Option<MessageDispatcher>>,
}

impl ScriptExtension {
    fn dispatcher(&self) -> Option<MessageDispatcher> {
        self.dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ExtensionChannel for ScriptExtension {
    fn connect(&self, dispatcher: MessageDispatcher) {
        *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(dispatcher);
    }

    fn disconnect(&self) {
        *self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Plays the host loader: feeds script lines to the controller and, unless
/// told otherwise, uninstalls the study after an ending it did not ask for,
/// including one left over from an earlier run.
pub struct ScriptHost {
    controller: LifecycleController,
    metadata: InstallMetadata,
    extension: Arc<ScriptExtension>,
    auto_uninstall: bool,
}

impl ScriptHost {
    pub fn new(controller: LifecycleController, metadata: InstallMetadata) -> Self {
        let extension = Arc::new(ScriptExtension::default());
        let metadata = metadata.with_extension(extension.clone());
        Self {
            controller,
            metadata,
            extension,
            auto_uninstall: true,
        }
    }

    pub fn with_auto_uninstall(mut self, enabled: bool) -> Self {
        self.auto_uninstall = enabled;
        self
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    pub async fn apply(&mut self, line: ScriptLine) -> Vec<Report> {
        let mut reports = Vec::new();
        let ended = match line {
            ScriptLine::Event(event) => {
                let report = self.event(event).await;
                let ended = !event.is_terminal()
                    && matches!(
                        report,
                        Report::Event {
                            outcome: Some(
                                LifecycleOutcome::Ended { .. }
                                    | LifecycleOutcome::AwaitingUninstall { .. }
                            ),
                            ..
                        }
                    );
                reports.push(report);
                ended
            }
            ScriptLine::EndStudy { end_study } => {
                let outcome = self.controller.end_study(end_study);
                let ended = outcome.is_effected();
                reports.push(Report::EndStudy {
                    state: self.controller.state(),
                    outcome,
                });
                ended
            }
            ScriptLine::Message { message } => {
                let report = self.message(&message);
                let ended = matches!(
                    report,
                    Report::Message {
                        response: Some(MessageResponse::Ending(EndingOutcome::Effected { .. })),
                        ..
                    }
                );
                reports.push(report);
                ended
            }
        };

        if ended && self.auto_uninstall {
            tracing::info!("Study ended itself; uninstalling");
            for event in [
                LifecycleEvent::Shutdown(HostReason::AddonUninstall),
                LifecycleEvent::Uninstall(HostReason::AddonUninstall),
            ] {
                reports.push(self.event(event).await);
            }
        }
        reports
    }

    async fn event(&mut self, event: LifecycleEvent) -> Report {
        let result = self.controller.on_event(event, &self.metadata).await;
        let (outcome, error) = match result {
            Ok(outcome) => (Some(outcome), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Report::Event {
            event,
            state: self.controller.state(),
            outcome,
            error,
        }
    }

    fn message(&self, message: &Value) -> Report {
        let Some(dispatcher) = self.extension.dispatcher() else {
            return Report::Message {
                response: None,
                error: Some("extension is not connected".to_string()),
            };
        };
        match dispatcher.respond_raw(message) {
            Ok(response) => Report::Message {
                response,
                error: None,
            },
            Err(e) => Report::Message {
                response: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Run every line of `input`, writing one JSON report per line to `out`.
    /// Returns the number of lines that could not be parsed.
    pub async fn run<R, W>(&mut self, input: R, out: &mut W) -> anyhow::Result<usize>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        let mut line_no = 0;
        let mut failures = 0;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let reports = match serde_json::from_str::<ScriptLine>(trimmed) {
                Ok(parsed) => self.apply(parsed).await,
                Err(e) => {
                    tracing::warn!(line = line_no, "Unparseable script line: {e}");
                    vec![Report::Invalid {
                        line: line_no,
                        error: e.to_string(),
                    }]
                }
            };
            for report in reports {
                if report.is_failure() {
                    failures += 1;
                }
                serde_json::to_writer(&mut *out, &report)?;
                out.write_all(b"\n")?;
            }
        }
        out.flush()?;
        Ok(failures)
    }
}
