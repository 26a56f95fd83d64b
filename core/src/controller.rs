//! Lifecycle controller: the entry point the host loader calls.
//!
//! ```text
//! NotStarted --install/startup(ADDON_INSTALL)--> Installing --eligible--> Evaluating --> Active
//!     |                                              |
//!     +--startup(other)--> Evaluating                +--ineligible--> Ending --> Stopped
//!
//! Active --shutdown/uninstall/disable(ADDON_UNINSTALL | ADDON_DISABLE)--> Ending --> Stopped
//! ```
//!
//! Startup steps run strictly in order. Every shutdown-class event with a
//! terminal reason goes through the ending latch: if nothing has ended the
//! study yet, the event is the user's doing and ends it with `user-disable`;
//! otherwise it is the second half of an ending already in progress and only
//! releases the install. `Stopped` is terminal: the only event it still
//! answers is the second half of an ending, which releases the install again.
//!
//! The latch is loaded from the store on construction, so a study that ended
//! in an earlier session stays ended: its next start event moves straight to
//! `Ending` and waits for the host to uninstall it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use shield_types::{
    ConfigError, EndingReason, InstallIdentity, LifecycleEvent, LifecycleState, VariationName,
};

use crate::config::StudyConfig;
use crate::dispatch::MessageDispatcher;
use crate::eligibility::{EligibilityCheckError, check_eligibility};
use crate::ending::{EndingOutcome, EndingResolver, EndingState};
use crate::host::{ExtensionChannel, InstallMetadata};
use crate::selector::select_variation;
use crate::store::{PersistedStudy, StudyStore};
use crate::telemetry::{EventType, Telemetry, TelemetrySink};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("lifecycle event {event} is not accepted in state {state}")]
    InvalidState {
        state: LifecycleState,
        event: LifecycleEvent,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Eligibility(#[from] EligibilityCheckError),
}

impl LifecycleError {
    /// Fatal errors abort the current install attempt and are surfaced to the
    /// host; invalid-state events are logged and ignored.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidState { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum LifecycleOutcome {
    /// Startup completed; the study is running this variation.
    Activated { variation: VariationName },
    /// This event ended the study. The host should open `url` (if any) and
    /// uninstall the study.
    Ended {
        reason: EndingReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<Url>,
    },
    /// An ending was already in progress; the install was released.
    Released { reason: EndingReason },
    /// The study ended in an earlier session. Nothing was started; the host
    /// should uninstall the study.
    AwaitingUninstall { reason: EndingReason },
    /// Normal shutdown without ending the study.
    Unloaded,
    /// Event accepted with no state change.
    PassThrough,
}

impl From<EndingOutcome> for LifecycleOutcome {
    fn from(outcome: EndingOutcome) -> Self {
        match outcome {
            EndingOutcome::Effected { reason, url } => Self::Ended { reason, url },
            EndingOutcome::AlreadyEnded { reason } => Self::Released { reason },
        }
    }
}

pub struct LifecycleController {
    config: StudyConfig,
    identity: InstallIdentity,
    telemetry: Telemetry,
    resolver: EndingResolver,
    store: Arc<dyn StudyStore>,
    state: LifecycleState,
    history: Vec<LifecycleState>,
    variation: Option<VariationName>,
    extension: Option<Arc<dyn ExtensionChannel>>,
}

impl LifecycleController {
    #[must_use]
    pub fn new(
        config: StudyConfig,
        identity: InstallIdentity,
        sink: Arc<dyn TelemetrySink>,
        store: Arc<dyn StudyStore>,
    ) -> Self {
        Self::with_ending_state(config, identity, sink, store, Arc::new(EndingState::new()))
    }

    /// Build a controller around an existing ending latch.
    #[must_use]
    pub fn with_ending_state(
        config: StudyConfig,
        identity: InstallIdentity,
        sink: Arc<dyn TelemetrySink>,
        store: Arc<dyn StudyStore>,
        ending: Arc<EndingState>,
    ) -> Self {
        match store.load() {
            Ok(PersistedStudy {
                ended: Some(reason),
                ..
            }) => {
                tracing::info!(reason = %reason, "Study already ended for this install");
                // An injected latch that already holds a reason keeps it.
                let _ = ending.try_begin(reason);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to load study state: {e}"),
        }

        let settings = config.settings();
        let telemetry = Telemetry::new(sink, settings.name().clone(), settings.telemetry());
        let resolver = EndingResolver::new(
            ending,
            telemetry.clone(),
            settings.name().clone(),
            settings.endings().clone(),
            identity.clone(),
        )
        .with_store(Arc::clone(&store));
        Self {
            config,
            identity,
            telemetry,
            resolver,
            store,
            state: LifecycleState::NotStarted,
            history: vec![LifecycleState::NotStarted],
            variation: None,
            extension: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Every state visited so far, starting with `NotStarted`.
    #[must_use]
    pub fn history(&self) -> &[LifecycleState] {
        &self.history
    }

    #[must_use]
    pub fn variation(&self) -> Option<&VariationName> {
        self.variation.as_ref()
    }

    #[must_use]
    pub fn ending_state(&self) -> &Arc<EndingState> {
        self.resolver.state()
    }

    #[must_use]
    pub fn resolver(&self) -> &EndingResolver {
        &self.resolver
    }

    /// Dispatcher for the embedded extension channel, once a variation is committed.
    #[must_use]
    pub fn dispatcher(&self) -> Option<MessageDispatcher> {
        let variation = self.variation.clone()?;
        Some(MessageDispatcher::new(
            self.resolver.clone(),
            self.telemetry.clone(),
            self.config.settings().name().clone(),
            self.identity.clone(),
            variation,
        ))
    }

    /// Programmatic study ending. The host is expected to follow up with an
    /// uninstall, which is then recognised as the second half of this ending.
    pub fn end_study(&mut self, reason: EndingReason) -> EndingOutcome {
        let outcome = self.resolver.end_study(reason, self.variation.as_ref());
        if outcome.is_effected()
            && matches!(
                self.state,
                LifecycleState::Installing | LifecycleState::Active
            )
        {
            self.transition(LifecycleState::Ending);
        }
        outcome
    }

    pub async fn on_event(
        &mut self,
        event: LifecycleEvent,
        metadata: &InstallMetadata,
    ) -> Result<LifecycleOutcome, LifecycleError> {
        tracing::info!(event = %event, state = %self.state, "Lifecycle event");
        let result = self.handle(event, metadata).await;
        match &result {
            Ok(outcome) => tracing::debug!(?outcome, state = %self.state, "Lifecycle event handled"),
            Err(e) if e.is_fatal() => tracing::error!(event = %event, "Lifecycle event failed: {e}"),
            Err(e) => tracing::warn!(event = %event, "Ignoring lifecycle event: {e}"),
        }
        result
    }

    async fn handle(
        &mut self,
        event: LifecycleEvent,
        metadata: &InstallMetadata,
    ) -> Result<LifecycleOutcome, LifecycleError> {
        // An ending may have been effected through the message channel.
        if self.state == LifecycleState::Active && self.resolver.is_ending() {
            self.transition(LifecycleState::Ending);
        }

        if event.is_terminal() {
            return match self.state {
                LifecycleState::NotStarted => Err(self.invalid(event)),
                LifecycleState::Stopped => self.release_stopped(event),
                _ => Ok(self.terminal_shutdown()),
            };
        }

        match (self.state, event) {
            (
                LifecycleState::NotStarted | LifecycleState::Installing,
                LifecycleEvent::Install(_) | LifecycleEvent::Startup(_),
            ) => self.start(event, metadata).await,
            (LifecycleState::Active | LifecycleState::Ending, LifecycleEvent::Shutdown(_)) => {
                self.disconnect_extension();
                self.transition(LifecycleState::Stopped);
                Ok(LifecycleOutcome::Unloaded)
            }
            (
                LifecycleState::Active,
                LifecycleEvent::Upgrade(_) | LifecycleEvent::Disable(_) | LifecycleEvent::Uninstall(_),
            ) => Ok(LifecycleOutcome::PassThrough),
            _ => Err(self.invalid(event)),
        }
    }

    async fn start(
        &mut self,
        event: LifecycleEvent,
        metadata: &InstallMetadata,
    ) -> Result<LifecycleOutcome, LifecycleError> {
        if let Some(reason) = self.resolver.state().reason().cloned() {
            tracing::info!(reason = %reason, "Not starting an ended study; awaiting uninstall");
            self.transition(LifecycleState::Ending);
            return Ok(LifecycleOutcome::AwaitingUninstall { reason });
        }

        let mut persisted = self.load_persisted();
        // First-seen recorded but eligibility never completed: a previous
        // install attempt failed and is retried now.
        let interrupted = persisted.first_seen_at.is_some() && persisted.installed_at.is_none();
        let installing =
            event.is_first_install() || self.state == LifecycleState::Installing || interrupted;

        if installing {
            self.transition(LifecycleState::Installing);
            if persisted.first_seen_at.is_none() {
                self.telemetry.study_state(EventType::Enter, None, None);
                persisted.first_seen_at = Some(Utc::now());
                self.save_persisted(&persisted);
            }

            if !check_eligibility(self.config.eligibility()).await? {
                self.transition(LifecycleState::Ending);
                let outcome = self.resolver.end_study(EndingReason::INELIGIBLE, None);
                self.transition(LifecycleState::Stopped);
                return Ok(outcome.into());
            }
        }

        self.transition(LifecycleState::Evaluating);
        let variation = self.resolve_variation(&mut persisted)?;

        if installing {
            persisted.installed_at = Some(Utc::now());
            self.save_persisted(&persisted);
            self.telemetry
                .study_state(EventType::Installed, Some(&variation), None);
        }
        self.telemetry
            .info(&variation, startup_data(event, metadata));
        tracing::info!(variation = %variation, installing, "Study active");

        self.variation = Some(variation.clone());
        self.transition(LifecycleState::Active);

        if let Some(channel) = &metadata.embedded_extension
            && let Some(dispatcher) = self.dispatcher()
        {
            channel.connect(dispatcher);
            self.extension = Some(Arc::clone(channel));
            tracing::debug!("Embedded extension connected");
        }

        Ok(LifecycleOutcome::Activated { variation })
    }

    /// Forced variation, else the committed one, else a fresh selection that
    /// is committed to the store.
    fn resolve_variation(
        &self,
        persisted: &mut PersistedStudy,
    ) -> Result<VariationName, ConfigError> {
        let settings = self.config.settings();
        let forced = settings.force_variation();
        if forced.is_none()
            && let Some(stored) = &persisted.variation
        {
            tracing::debug!(variation = %stored, "Using committed variation");
            return Ok(stored.clone());
        }

        let variation = select_variation(
            &self.identity,
            settings.name(),
            settings.variations().as_slice(),
            forced,
        )?;
        if forced.is_none() {
            persisted.variation = Some(variation.clone());
            self.save_persisted(persisted);
        }
        Ok(variation)
    }

    fn terminal_shutdown(&mut self) -> LifecycleOutcome {
        self.transition(LifecycleState::Ending);
        let outcome = self
            .resolver
            .end_study(EndingReason::USER_DISABLE, self.variation.as_ref());
        if outcome.is_effected() {
            tracing::info!("User requested shutdown");
        } else {
            tracing::info!(reason = %outcome.reason(), "Ending already in progress; releasing install");
            self.release();
        }
        self.transition(LifecycleState::Stopped);
        outcome.into()
    }

    /// A stopped study only accepts the second half of an ending.
    fn release_stopped(
        &mut self,
        event: LifecycleEvent,
    ) -> Result<LifecycleOutcome, LifecycleError> {
        let Some(reason) = self.resolver.state().reason().cloned() else {
            return Err(self.invalid(event));
        };
        self.release();
        Ok(LifecycleOutcome::Released { reason })
    }

    fn release(&mut self) {
        self.disconnect_extension();
        if let Err(e) = self.store.clear() {
            tracing::warn!("Failed to clear study state: {e}");
        }
    }

    fn disconnect_extension(&mut self) {
        if let Some(channel) = self.extension.take() {
            channel.disconnect();
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state == next {
            return;
        }
        tracing::debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
        self.history.push(next);
    }

    fn invalid(&self, event: LifecycleEvent) -> LifecycleError {
        LifecycleError::InvalidState {
            state: self.state,
            event,
        }
    }

    fn load_persisted(&self) -> PersistedStudy {
        self.store.load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load study state; starting fresh: {e}");
            PersistedStudy::default()
        })
    }

    fn save_persisted(&self, persisted: &PersistedStudy) {
        if let Err(e) = self.store.save(persisted) {
            tracing::warn!("Failed to save study state: {e}");
        }
    }
}

fn startup_data(event: LifecycleEvent, metadata: &InstallMetadata) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    data.insert("reason".to_string(), event.reason().to_string());
    data.insert("addonId".to_string(), metadata.id.clone());
    data.insert("addonVersion".to_string(), metadata.version.clone());
    data.insert(
        "installPath".to_string(),
        metadata.install_path.display().to_string(),
    );
    if !metadata.resource_uri.is_empty() {
        data.insert("resourceUri".to_string(), metadata.resource_uri.clone());
    }
    if !metadata.instance_id.is_empty() {
        data.insert("instanceId".to_string(), metadata.instance_id.clone());
    }
    data
}
