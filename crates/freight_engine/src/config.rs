//! Engine configuration.
//!
//! One flat struct with every tunable and its default; derived configs for
//! the core components are built from it at startup.

use std::time::Duration;

use freight_core::demand::{DemandPredictorConfig, RegionSpec};
use freight_core::hubs::{DbscanParams, DiscoveryConfig};
use freight_core::predict::PredictorConfig;
use freight_core::relay::RelayConfig;

/// Event producer name stamped on published envelopes.
pub const PRODUCER: &str = "freight-optimization-engine";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size.
    pub max_concurrent_jobs: usize,
    /// A PROCESSING job with no progress for this long is stalled.
    pub job_timeout: Duration,
    /// Stall monitor cadence.
    pub stall_check_interval: Duration,
    /// Position-debounce distance, meters (geodesic).
    pub position_trigger_distance_m: f64,
    /// Position-debounce cooldown.
    pub position_trigger_cooldown: Duration,
    /// Master switch for the predictor cache.
    pub use_prediction_cache: bool,
    /// Predictor cache entry lifetime.
    pub prediction_cache_ttl: Duration,
    /// Minimum confidence for filtered results.
    pub confidence_threshold: f64,
    /// Exclusion radius around existing hubs during discovery, miles.
    pub min_hub_distance_mi: f64,
    /// DBSCAN ε, miles.
    pub cluster_epsilon_mi: f64,
    /// DBSCAN minPts.
    pub cluster_min_points: usize,
    /// Cap on relay segments per plan.
    pub max_relay_segments: usize,
    /// Relay duration estimator speed, mph.
    pub relay_segment_speed_mph: f64,
    /// Relay duration buffer above the great-circle estimate.
    pub relay_segment_buffer_fraction: f64,
    /// Matching reachability estimator speed, mph.
    pub speed_factor_mph: f64,
    /// Queue length at which position-driven triggers stop.
    pub queue_high_watermark: usize,
    /// Queue length below which position-driven triggers resume.
    pub queue_low_watermark: usize,
    /// Job-level attempts for retryable failures.
    pub max_job_attempts: u32,
    /// Exponential backoff base.
    pub retry_base_delay: Duration,
    /// Exponential backoff cap.
    pub retry_max_delay: Duration,
    /// Backoff jitter fraction, ± around the computed delay.
    pub retry_jitter: f64,
    /// Regions swept by demand-prediction jobs with no explicit region.
    pub forecast_regions: Vec<RegionSpec>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 10,
            job_timeout: Duration::from_millis(300_000),
            stall_check_interval: Duration::from_millis(5_000),
            position_trigger_distance_m: 5_000.0,
            position_trigger_cooldown: Duration::from_millis(300_000),
            use_prediction_cache: true,
            prediction_cache_ttl: Duration::from_millis(300_000),
            confidence_threshold: 0.7,
            min_hub_distance_mi: 50.0,
            cluster_epsilon_mi: 25.0,
            cluster_min_points: 5,
            max_relay_segments: 3,
            relay_segment_speed_mph: 55.0,
            relay_segment_buffer_fraction: 0.15,
            speed_factor_mph: 55.0,
            queue_high_watermark: 100,
            queue_low_watermark: 50,
            max_job_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            retry_jitter: 0.20,
            forecast_regions: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn predictor_config(&self) -> PredictorConfig {
        PredictorConfig {
            cache_enabled: self.use_prediction_cache,
            cache_ttl: self.prediction_cache_ttl,
            confidence_threshold: self.confidence_threshold,
            ..PredictorConfig::default()
        }
    }

    pub fn demand_config(&self) -> DemandPredictorConfig {
        DemandPredictorConfig {
            cache_ttl: self.prediction_cache_ttl,
            ..DemandPredictorConfig::default()
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            cluster: DbscanParams {
                epsilon_mi: self.cluster_epsilon_mi,
                min_points: self.cluster_min_points,
            },
            min_hub_distance_mi: self.min_hub_distance_mi,
            ..DiscoveryConfig::default()
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            max_segments: self.max_relay_segments,
            segment_speed_mph: self.relay_segment_speed_mph,
            segment_buffer_fraction: self.relay_segment_buffer_fraction,
            ..RelayConfig::default()
        }
    }
}
