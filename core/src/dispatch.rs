//! Message dispatch for the embedded extension channel.

use serde::Serialize;
use serde_json::Value;

use shield_types::{
    AddonInfo, ClientId, ExtensionMessage, InstallIdentity, MessageError, StudyName,
    VariationName,
};

use crate::ending::{EndingOutcome, EndingResolver};
use crate::telemetry::Telemetry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyInfo {
    pub study_name: StudyName,
    pub addon: AddonInfo,
    pub variation: VariationName,
    pub client_id: ClientId,
    pub is_ending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "response", content = "body", rename_all = "kebab-case")]
pub enum MessageResponse {
    Info(StudyInfo),
    Ending(EndingOutcome),
    TelemetrySent,
}

/// Handles `info`, `endStudy` and `telemetry` messages for an active study.
#[derive(Debug, Clone)]
pub struct MessageDispatcher {
    resolver: EndingResolver,
    telemetry: Telemetry,
    study: StudyName,
    identity: InstallIdentity,
    variation: VariationName,
}

impl MessageDispatcher {
    #[must_use]
    pub fn new(
        resolver: EndingResolver,
        telemetry: Telemetry,
        study: StudyName,
        identity: InstallIdentity,
        variation: VariationName,
    ) -> Self {
        Self {
            resolver,
            telemetry,
            study,
            identity,
            variation,
        }
    }

    #[must_use]
    pub fn info(&self) -> StudyInfo {
        StudyInfo {
            study_name: self.study.clone(),
            addon: self.identity.addon().clone(),
            variation: self.variation.clone(),
            client_id: self.identity.client_id().clone(),
            is_ending: self.resolver.is_ending(),
        }
    }

    pub fn respond(&self, message: ExtensionMessage) -> MessageResponse {
        tracing::debug!(msg = message.kind(), "Extension message");
        match message {
            ExtensionMessage::Info => MessageResponse::Info(self.info()),
            ExtensionMessage::EndStudy { reason } => {
                MessageResponse::Ending(self.resolver.end_study(reason, Some(&self.variation)))
            }
            ExtensionMessage::Telemetry { payload } => {
                self.telemetry.addon(Some(&self.variation), payload);
                MessageResponse::TelemetrySent
            }
        }
    }

    /// Parse and answer a raw message. `Ok(None)` for messages meant for
    /// another listener.
    pub fn respond_raw(&self, raw: &Value) -> Result<Option<MessageResponse>, MessageError> {
        match ExtensionMessage::from_value(raw) {
            Ok(Some(message)) => Ok(Some(self.respond(message))),
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!("Rejected extension message: {e}");
                Err(e)
            }
        }
    }
}
