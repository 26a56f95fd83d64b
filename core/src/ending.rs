//! Ending resolver: the single authority for "is the study over, and why".
//!
//! Host shutdown and uninstall hooks fire both when the user removes the
//! study and when the study removes itself, and both paths converge on the
//! same hook. [`EndingState`] is a set-once latch: the first caller records
//! its reason and performs the ending side effects, every later caller only
//! observes the recorded reason. With a store attached, the winning reason
//! is also written to the install's persisted state so later sessions see
//! the study as ended.

use std::sync::{Arc, OnceLock};

use serde::Serialize;
use url::Url;

use shield_types::{EndingReason, EndingUrl, Endings, InstallIdentity, StudyName, VariationName};

use crate::store::StudyStore;
use crate::telemetry::{EventType, Telemetry};

/// Set-once ending latch shared by every path that can end the study.
#[derive(Debug, Default)]
pub struct EndingState {
    reason: OnceLock<EndingReason>,
}

impl EndingState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the ending. `Err` carries the reason that already won.
    pub fn try_begin(&self, reason: EndingReason) -> Result<(), EndingReason> {
        let mut claimed = false;
        let winner = self.reason.get_or_init(|| {
            claimed = true;
            reason
        });
        if claimed { Ok(()) } else { Err(winner.clone()) }
    }

    #[must_use]
    pub fn is_ending(&self) -> bool {
        self.reason.get().is_some()
    }

    #[must_use]
    pub fn reason(&self) -> Option<&EndingReason> {
        self.reason.get()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum EndingOutcome {
    /// This call ended the study.
    Effected {
        reason: EndingReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<Url>,
    },
    /// Another call already ended the study; nothing was done.
    AlreadyEnded { reason: EndingReason },
}

impl EndingOutcome {
    #[must_use]
    pub fn reason(&self) -> &EndingReason {
        match self {
            Self::Effected { reason, .. } | Self::AlreadyEnded { reason } => reason,
        }
    }

    #[must_use]
    pub fn is_effected(&self) -> bool {
        matches!(self, Self::Effected { .. })
    }
}

#[derive(Debug, Clone)]
pub struct EndingResolver {
    state: Arc<EndingState>,
    telemetry: Telemetry,
    study: StudyName,
    endings: Endings,
    identity: InstallIdentity,
    store: Option<Arc<dyn StudyStore>>,
}

impl EndingResolver {
    #[must_use]
    pub fn new(
        state: Arc<EndingState>,
        telemetry: Telemetry,
        study: StudyName,
        endings: Endings,
        identity: InstallIdentity,
    ) -> Self {
        Self {
            state,
            telemetry,
            study,
            endings,
            identity,
            store: None,
        }
    }

    /// Persist the winning reason into `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StudyStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn state(&self) -> &Arc<EndingState> {
        &self.state
    }

    #[must_use]
    pub fn is_ending(&self) -> bool {
        self.state.is_ending()
    }

    /// End the study for `reason` unless it has already ended.
    ///
    /// Only the winning call emits the ending record, the `exit` record, and
    /// resolves the ending URL.
    pub fn end_study(
        &self,
        reason: EndingReason,
        variation: Option<&VariationName>,
    ) -> EndingOutcome {
        if let Err(existing) = self.state.try_begin(reason.clone()) {
            tracing::debug!(
                requested = %reason,
                recorded = %existing,
                "Study already ending; ignoring"
            );
            return EndingOutcome::AlreadyEnded { reason: existing };
        }

        let config = self.endings.get(&reason);
        let event = EventType::for_ending(&reason, config.and_then(|c| c.category()));
        tracing::info!(reason = %reason, event = %event, "Ending study");
        self.record(&reason);

        self.telemetry.study_state(event, variation, Some(&reason));
        self.telemetry.study_state(EventType::Exit, variation, Some(&reason));

        let url = config
            .and_then(|c| c.url())
            .map(|url| self.resolve_url(url, &reason, variation));
        EndingOutcome::Effected { reason, url }
    }

    fn record(&self, reason: &EndingReason) {
        let Some(store) = &self.store else {
            return;
        };
        let result = store.load().and_then(|mut study| {
            study.ended = Some(reason.clone());
            store.save(&study)
        });
        if let Err(e) = result {
            tracing::warn!("Failed to record study ending: {e}");
        }
    }

    fn resolve_url(
        &self,
        url: &EndingUrl,
        reason: &EndingReason,
        variation: Option<&VariationName>,
    ) -> Url {
        match url {
            EndingUrl::Exact(url) => url.clone(),
            EndingUrl::Base(base) => {
                let mut url = base.clone();
                {
                    let mut query = url.query_pairs_mut();
                    query
                        .append_pair("reason", reason.as_str())
                        .append_pair("study", self.study.as_str());
                    if let Some(variation) = variation {
                        query.append_pair("variation", variation.as_str());
                    }
                    query
                        .append_pair("addon_version", &self.identity.addon().version)
                        .append_pair("who", self.identity.client_id().as_str());
                }
                url
            }
        }
    }
}
