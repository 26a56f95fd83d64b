//! Eligibility gate.
//!
//! The predicate is domain-supplied and may perform asynchronous I/O. The gate
//! adds no timeout; it runs the predicate once and maps failure to
//! [`EligibilityCheckError`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

pub type EligibilityFut<'a> = Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + 'a>>;

/// Decides whether this profile may enter the study.
pub trait EligibilityCheck: Send + Sync {
    fn check(&self) -> EligibilityFut<'_>;

    fn describe(&self) -> &str {
        "custom"
    }
}

#[derive(Debug, Error)]
#[error("eligibility check '{check}' failed: {message}")]
pub struct EligibilityCheckError {
    pub check: String,
    pub message: String,
}

/// Run the predicate once.
pub async fn check_eligibility(
    check: &dyn EligibilityCheck,
) -> Result<bool, EligibilityCheckError> {
    tracing::debug!(check = check.describe(), "Running eligibility check");
    match check.check().await {
        Ok(eligible) => {
            tracing::info!(check = check.describe(), eligible, "Eligibility decided");
            Ok(eligible)
        }
        Err(e) => Err(EligibilityCheckError {
            check: check.describe().to_string(),
            message: format!("{e:#}"),
        }),
    }
}

/// Every profile is eligible.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysEligible;

impl EligibilityCheck for AlwaysEligible {
    fn check(&self) -> EligibilityFut<'_> {
        Box::pin(async { Ok(true) })
    }

    fn describe(&self) -> &str {
        "always"
    }
}

/// Adapts a closure returning a future into an [`EligibilityCheck`].
pub struct FnEligibility<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnEligibility<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F, Fut> EligibilityCheck for FnEligibility<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    fn check(&self) -> EligibilityFut<'_> {
        Box::pin((self.f)())
    }

    fn describe(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for FnEligibility<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnEligibility")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
