//! Configuration Provider: versioned matching weights, radii, timeouts.
//!
//! Grounded in the teacher's `config/mod.rs` load hierarchy (env > file >
//! defaults). Each new dispatch attempt calls [`ConfigProvider::matching`]
//! to get a fresh snapshot; a snapshot already in use by an in-flight
//! attempt is never mutated underneath it (`Arc` clone, not shared `&mut`).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{DispatchError, DispatchResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub distance: f64,
    pub capability: f64,
    pub availability: f64,
    pub acceptance_rate: f64,
    pub rating: f64,
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.distance + self.capability + self.availability + self.acceptance_rate + self.rating
    }
}

/// Effective matching configuration for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    pub weights: ScoringWeights,
    pub default_radius_miles: f64,
    pub max_radius_miles: f64,
    pub radius_expansion_factor: f64,
    pub max_expansion_attempts: u32,
    pub offer_timeout_seconds: u64,
    pub max_concurrent_offers_per_attempt: usize,
    pub arrival_deadline_minutes: u64,
    pub arrival_poll_interval_minutes: u64,
    /// Per spec §9 Open Questions: tier multipliers are accepted in config
    /// for forward compatibility but are not applied by the engine yet.
    #[serde(default)]
    pub tier_multipliers: HashMap<String, f64>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights {
                distance: 0.30,
                capability: 0.25,
                availability: 0.20,
                acceptance_rate: 0.15,
                rating: 0.10,
            },
            default_radius_miles: 50.0,
            max_radius_miles: 200.0,
            radius_expansion_factor: 0.25,
            max_expansion_attempts: 3,
            offer_timeout_seconds: 120,
            max_concurrent_offers_per_attempt: 3,
            arrival_deadline_minutes: 30,
            arrival_poll_interval_minutes: 5,
            tier_multipliers: HashMap::new(),
        }
    }
}

impl MatchingConfig {
    pub fn validate(&self) -> DispatchResult<()> {
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(DispatchError::Validation(format!(
                "scoring weights must sum to 1.0 (±1e-3), got {sum}"
            )));
        }
        if self.max_radius_miles < self.default_radius_miles {
            return Err(DispatchError::Validation(
                "max_radius_miles must be >= default_radius_miles".into(),
            ));
        }
        if self.radius_expansion_factor <= 0.0 {
            return Err(DispatchError::Validation("radius_expansion_factor must be > 0".into()));
        }
        if self.max_expansion_attempts == 0 {
            return Err(DispatchError::Validation("max_expansion_attempts must be positive".into()));
        }
        if self.max_concurrent_offers_per_attempt == 0 {
            return Err(DispatchError::Validation(
                "max_concurrent_offers_per_attempt must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration provider interface (spec §6: `Config.matching()`).
#[async_trait::async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn matching(&self) -> Arc<MatchingConfig>;
}

/// In-memory configuration provider. Supports hot-reload via [`StaticConfigProvider::set`];
/// a snapshot already handed out to an in-flight attempt stays valid for that
/// attempt's duration because `Arc<MatchingConfig>` is immutable once built.
pub struct StaticConfigProvider {
    current: RwLock<Arc<MatchingConfig>>,
}

impl StaticConfigProvider {
    pub fn new(config: MatchingConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn from_defaults() -> Self {
        Self::new(MatchingConfig::default())
    }

    /// Load from a TOML string, falling back to defaults for absent fields
    /// being handled by serde's `#[serde(default)]` on the struct, then
    /// environment-variable overrides for a small set of hot keys
    /// (`DISPATCH_DEFAULT_RADIUS_MILES`, `DISPATCH_OFFER_TIMEOUT_SECONDS`,
    /// `DISPATCH_MAX_EXPANSION_ATTEMPTS`), matching the teacher's
    /// env-override-after-file-load pattern.
    pub fn from_toml_str(contents: &str) -> DispatchResult<Self> {
        let mut config: MatchingConfig =
            toml::from_str(contents).map_err(|e| DispatchError::Validation(format!("invalid config: {e}")))?;
        apply_env_overrides(&mut config);
        config.validate()?;
        Ok(Self::new(config))
    }

    pub async fn set(&self, config: MatchingConfig) -> DispatchResult<()> {
        config.validate()?;
        *self.current.write().await = Arc::new(config);
        Ok(())
    }
}

fn apply_env_overrides(config: &mut MatchingConfig) {
    if let Ok(v) = std::env::var("DISPATCH_DEFAULT_RADIUS_MILES") {
        if let Ok(parsed) = v.parse() {
            config.default_radius_miles = parsed;
        }
    }
    if let Ok(v) = std::env::var("DISPATCH_OFFER_TIMEOUT_SECONDS") {
        if let Ok(parsed) = v.parse() {
            config.offer_timeout_seconds = parsed;
        }
    }
    if let Ok(v) = std::env::var("DISPATCH_MAX_EXPANSION_ATTEMPTS") {
        if let Ok(parsed) = v.parse() {
            config.max_expansion_attempts = parsed;
        }
    }
}

#[async_trait::async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn matching(&self) -> Arc<MatchingConfig> {
        self.current.read().await.clone()
    }
}
