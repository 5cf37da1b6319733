//! Per-fetch record of what happened to each candidate provider.

use std::fmt;

use crate::models::ProviderId;

/// Why a provider was passed over without being called.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The provider does not serve the requested dataset.
    DatasetNotSupported,
    /// The health monitor has taken the provider out of rotation.
    ProviderUnavailable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DatasetNotSupported => "dataset not supported",
            Self::ProviderUnavailable => "unavailable",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Skipped(SkipReason),
    /// Called and gave up on, with the last error seen.
    Failed(String),
    Succeeded,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub provider_id: ProviderId,
    pub outcome: AttemptOutcome,
}

impl ProviderAttempt {
    pub fn was_called(&self) -> bool {
        !matches!(self.outcome, AttemptOutcome::Skipped(_))
    }
}

impl fmt::Display for ProviderAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Skipped(reason) => {
                write!(f, "{} skipped ({})", self.provider_id, reason)
            }
            AttemptOutcome::Failed(error) => write!(f, "{} failed: {}", self.provider_id, error),
            AttemptOutcome::Succeeded => write!(f, "{} ok", self.provider_id),
        }
    }
}

/// Provider attempts of one fetch, in the order they were made.
///
/// Travels on [`ResolvedSeries`](crate::ResolvedSeries) and on
/// [`MarketDataError::AllProvidersExhausted`](crate::MarketDataError::AllProvidersExhausted).
/// `Display` renders the whole chain for logs and error messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchDiagnostics {
    attempts: Vec<ProviderAttempt>,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, provider_id: ProviderId, outcome: AttemptOutcome) {
        self.attempts.push(ProviderAttempt {
            provider_id,
            outcome,
        });
    }

    pub fn record_skip(&mut self, provider_id: ProviderId, reason: SkipReason) {
        self.push(provider_id, AttemptOutcome::Skipped(reason));
    }

    pub fn record_error(&mut self, provider_id: ProviderId, error: String) {
        self.push(provider_id, AttemptOutcome::Failed(error));
    }

    pub fn record_success(&mut self, provider_id: ProviderId) {
        self.push(provider_id, AttemptOutcome::Succeeded);
    }

    pub fn attempts(&self) -> &[ProviderAttempt] {
        &self.attempts
    }

    /// Providers that were actually called, in order.
    pub fn providers_called(&self) -> impl Iterator<Item = &ProviderId> {
        self.attempts
            .iter()
            .filter(|a| a.was_called())
            .map(|a| &a.provider_id)
    }
}

impl fmt::Display for FetchDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return f.write_str("no providers tried");
        }
        for (i, attempt) in self.attempts.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{attempt}")?;
        }
        Ok(())
    }
}
