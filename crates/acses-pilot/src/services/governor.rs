//! Model tiers and request pacing.
//!
//! Pacing is derived from the tier's requests-per-minute budget with a 10%
//! safety margin: `delay = 60 / rpm * 1.1`. Unknown models fall back to the
//! default tier instead of failing.

use std::{num::NonZeroU32, sync::Arc, time::Duration};

use governor::clock::DefaultClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use governor::{Quota, RateLimiter};
use serde::Deserialize;

use crate::constants::{DEFAULT_RPM, RATE_SAFETY_MARGIN};

pub type GenericRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const MODEL_PREFIX: &str = "models/";

/// Remote model and its free-tier request budget.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelTier {
    pub id: String,
    pub requests_per_minute: u32,
    #[serde(default)]
    pub description: String,
}

impl ModelTier {
    pub fn new(id: impl Into<String>, requests_per_minute: u32, description: impl Into<String>) -> Self {
        Self {
            id: normalize_model_id(&id.into()),
            requests_per_minute,
            description: description.into(),
        }
    }

    pub fn default_tier() -> Self {
        Self {
            id: "default".to_string(),
            requests_per_minute: DEFAULT_RPM,
            description: "Unlisted model (free-tier default)".to_string(),
        }
    }

    /// Minimum spacing between consecutive requests for this tier.
    pub fn delay(&self) -> Duration {
        delay_for_rpm(self.requests_per_minute)
    }

    /// Hard per-minute ceiling enforced in front of the HTTP client.
    pub fn limiter(&self) -> Arc<GenericRateLimiter> {
        let rpm = NonZeroU32::new(self.requests_per_minute)
            .or(NonZeroU32::new(DEFAULT_RPM))
            .unwrap_or(NonZeroU32::MIN);
        Arc::new(RateLimiter::direct(Quota::per_minute(rpm)))
    }
}

/// `60 / rpm * 1.1` seconds; a zero budget is treated as the default tier.
pub fn delay_for_rpm(rpm: u32) -> Duration {
    let rpm = if rpm == 0 { DEFAULT_RPM } else { rpm };
    Duration::from_secs_f64(60.0 / f64::from(rpm) * RATE_SAFETY_MARGIN)
}

/// Accept both `gemini-2.5-flash-lite` and `models/gemini-2.5-flash-lite`.
pub fn normalize_model_id(model: &str) -> String {
    let trimmed = model.trim();
    if trimmed.starts_with(MODEL_PREFIX) {
        trimmed.to_string()
    } else {
        format!("{MODEL_PREFIX}{trimmed}")
    }
}

/// Explicit registry of known tiers with a well-defined fallback.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    tiers: Vec<ModelTier>,
    fallback: ModelTier,
}

impl ModelRegistry {
    pub fn builtin() -> Self {
        Self {
            tiers: vec![
                ModelTier::new("models/gemini-1.5-flash-latest", 15, "Gemini 1.5 Flash (Latest)"),
                ModelTier::new("models/gemini-1.5-pro-latest", 2, "Gemini 1.5 Pro (Latest)"),
                ModelTier::new("models/gemini-2.5-flash-lite", 15, "Gemini 2.5 Flash Lite"),
            ],
            fallback: ModelTier::default_tier(),
        }
    }

    /// Add or replace a tier (configured tiers override built-ins).
    #[must_use]
    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        let tier = ModelTier {
            id: normalize_model_id(&tier.id),
            ..tier
        };
        match self.tiers.iter_mut().find(|known| known.id == tier.id) {
            Some(existing) => *existing = tier,
            None => self.tiers.push(tier),
        }
        self
    }

    pub fn tiers(&self) -> &[ModelTier] {
        &self.tiers
    }

    pub fn get(&self, model: &str) -> Option<&ModelTier> {
        let id = normalize_model_id(model);
        self.tiers.iter().find(|tier| tier.id == id)
    }

    pub fn tier_for(&self, model: &str) -> &ModelTier {
        self.get(model).unwrap_or(&self.fallback)
    }

    pub fn is_known(&self, model: &str) -> bool {
        self.get(model).is_some()
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
