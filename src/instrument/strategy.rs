//! Aggregation strategies for statistical gauges.
//!
//! A strategy is an ordered list of `(mode, suffix)` pairs describing which
//! reductions an [`AggregateGauge`](crate::instrument::AggregateGauge)
//! computes each interval and under which name suffixes the results are
//! reported. Strategies are validated once at construction; how values are
//! tracked during recording (running scalars vs the raw-value list) is also
//! decided here, once, not per interval.

use crate::core::{Result, TallyError};
use parking_lot::Mutex;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// One statistical reduction applied to an interval's recorded values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregationMode {
    /// Arithmetic mean (sum / count)
    Average,
    /// Nearest-rank 50th percentile
    Median,
    /// Nearest-rank percentile, `p` in [0, 1]
    Percentile(f64),
    /// Largest recorded value
    Max,
    /// Smallest recorded value
    Min,
    /// Most recently recorded value
    Last,
    /// Number of recorded values
    Count,
}

impl AggregationMode {
    /// Default reporting suffix for this mode. `Last` reports under the
    /// bare metric name.
    pub fn default_suffix(&self) -> String {
        match self {
            AggregationMode::Average => "avg".to_string(),
            AggregationMode::Median => "median".to_string(),
            AggregationMode::Percentile(p) => format!("{}", p),
            AggregationMode::Max => "max".to_string(),
            AggregationMode::Min => "min".to_string(),
            AggregationMode::Last => String::new(),
            AggregationMode::Count => "count".to_string(),
        }
    }

    /// Whether this mode needs the raw-value list rather than running
    /// scalars.
    fn needs_raw_values(&self) -> bool {
        matches!(self, AggregationMode::Median | AggregationMode::Percentile(_))
    }
}

/// Validated, immutable aggregation configuration.
///
/// Tracking flags are resolved at build time: when any percentile mode is
/// present the raw-value list is authoritative for min/max too, and the
/// O(1) scalar tracking is skipped.
#[derive(Debug, Clone)]
pub struct AggregationStrategy {
    modes: Vec<(AggregationMode, String)>,
    track_mean: bool,
    track_last: bool,
    scalar_min_max: bool,
    track_raw: bool,
    has_count: bool,
}

impl AggregationStrategy {
    /// Start building a strategy.
    pub fn builder() -> StrategyBuilder {
        StrategyBuilder { modes: Vec::new() }
    }

    /// The configured `(mode, suffix)` pairs, in reporting order.
    pub fn modes(&self) -> &[(AggregationMode, String)] {
        &self.modes
    }

    pub(crate) fn track_mean(&self) -> bool {
        self.track_mean
    }

    pub(crate) fn track_last(&self) -> bool {
        self.track_last
    }

    pub(crate) fn scalar_min_max(&self) -> bool {
        self.scalar_min_max
    }

    pub(crate) fn track_raw(&self) -> bool {
        self.track_raw
    }

    pub(crate) fn has_count(&self) -> bool {
        self.has_count
    }
}

/// Builder for [`AggregationStrategy`].
pub struct StrategyBuilder {
    modes: Vec<(AggregationMode, Option<String>)>,
}

impl StrategyBuilder {
    /// Add a mode with its default suffix.
    pub fn mode(mut self, mode: AggregationMode) -> Self {
        self.modes.push((mode, None));
        self
    }

    /// Add a mode reporting under an explicit suffix.
    pub fn mode_as<S: Into<String>>(mut self, mode: AggregationMode, suffix: S) -> Self {
        self.modes.push((mode, Some(suffix.into())));
        self
    }

    /// Validate and build the strategy.
    pub fn build(self) -> Result<AggregationStrategy> {
        if self.modes.is_empty() {
            return Err(TallyError::NoAggregationModes);
        }

        let mut modes = Vec::with_capacity(self.modes.len());
        for (mode, suffix) in self.modes {
            if let AggregationMode::Percentile(p) = mode {
                if !(0.0..=1.0).contains(&p) || !p.is_finite() {
                    return Err(TallyError::InvalidPercentile(p));
                }
            }
            let suffix = suffix.unwrap_or_else(|| mode.default_suffix());
            if !suffix.is_empty() && !crate::instrument::is_valid_name(&suffix) {
                return Err(TallyError::InvalidName(suffix));
            }
            if modes.iter().any(|(_, s): &(_, String)| *s == suffix) {
                return Err(TallyError::DuplicateSuffix(suffix));
            }
            modes.push((mode, suffix));
        }

        let track_raw = modes.iter().any(|(m, _)| m.needs_raw_values());
        let has_min_max = modes
            .iter()
            .any(|(m, _)| matches!(m, AggregationMode::Min | AggregationMode::Max));

        Ok(AggregationStrategy {
            track_mean: modes.iter().any(|(m, _)| matches!(m, AggregationMode::Average)),
            track_last: modes.iter().any(|(m, _)| matches!(m, AggregationMode::Last)),
            scalar_min_max: has_min_max && !track_raw,
            has_count: modes.iter().any(|(m, _)| matches!(m, AggregationMode::Count)),
            track_raw,
            modes,
        })
    }
}

/// A concrete gauge profile: a type standing for one gauge flavor whose
/// strategy is resolved once and cached by type identity.
pub trait GaugeProfile: 'static {
    /// Build this profile's aggregation strategy. Called at most once per
    /// registry; the result is cached.
    fn strategy() -> Result<AggregationStrategy>;

    /// Per-profile minimum-events override. `None` uses the collector
    /// default.
    fn minimum_events() -> Option<u64> {
        None
    }
}

/// Lock-protected type-keyed cache of resolved strategies.
///
/// Owned by a collector and passed explicitly; there is no process-global
/// registry.
#[derive(Default)]
pub struct StrategyRegistry {
    cache: Mutex<HashMap<TypeId, Arc<AggregationStrategy>>>,
}

impl StrategyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get-or-create the strategy for a profile type.
    pub fn resolve<P: GaugeProfile>(&self) -> Result<Arc<AggregationStrategy>> {
        let mut cache = self.cache.lock();
        if let Some(strategy) = cache.get(&TypeId::of::<P>()) {
            return Ok(Arc::clone(strategy));
        }
        let strategy = Arc::new(P::strategy()?);
        cache.insert(TypeId::of::<P>(), Arc::clone(&strategy));
        Ok(strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_suffixes() {
        assert_eq!(AggregationMode::Average.default_suffix(), "avg");
        assert_eq!(AggregationMode::Median.default_suffix(), "median");
        assert_eq!(AggregationMode::Percentile(0.95).default_suffix(), "0.95");
        assert_eq!(AggregationMode::Last.default_suffix(), "");
        assert_eq!(AggregationMode::Count.default_suffix(), "count");
    }

    #[test]
    fn test_empty_strategy_rejected() {
        assert!(matches!(
            AggregationStrategy::builder().build(),
            Err(TallyError::NoAggregationModes)
        ));
    }

    #[test]
    fn test_percentile_out_of_range() {
        let err = AggregationStrategy::builder()
            .mode(AggregationMode::Percentile(1.5))
            .build();
        assert!(matches!(err, Err(TallyError::InvalidPercentile(_))));

        let err = AggregationStrategy::builder()
            .mode(AggregationMode::Percentile(-0.1))
            .build();
        assert!(matches!(err, Err(TallyError::InvalidPercentile(_))));
    }

    #[test]
    fn test_duplicate_suffix_rejected() {
        let err = AggregationStrategy::builder()
            .mode_as(AggregationMode::Min, "p")
            .mode_as(AggregationMode::Max, "p")
            .build();
        assert!(matches!(err, Err(TallyError::DuplicateSuffix(_))));
    }

    #[test]
    fn test_scalar_min_max_without_percentiles() {
        let strategy = AggregationStrategy::builder()
            .mode(AggregationMode::Min)
            .mode(AggregationMode::Max)
            .mode(AggregationMode::Average)
            .build()
            .unwrap();
        assert!(strategy.scalar_min_max());
        assert!(!strategy.track_raw());
        assert!(strategy.track_mean());
    }

    #[test]
    fn test_percentile_makes_list_authoritative() {
        let strategy = AggregationStrategy::builder()
            .mode(AggregationMode::Min)
            .mode(AggregationMode::Max)
            .mode(AggregationMode::Median)
            .build()
            .unwrap();
        assert!(!strategy.scalar_min_max());
        assert!(strategy.track_raw());
    }

    struct LatencyProfile;

    impl GaugeProfile for LatencyProfile {
        fn strategy() -> Result<AggregationStrategy> {
            AggregationStrategy::builder()
                .mode(AggregationMode::Median)
                .mode(AggregationMode::Percentile(0.99))
                .mode(AggregationMode::Count)
                .build()
        }

        fn minimum_events() -> Option<u64> {
            Some(5)
        }
    }

    #[test]
    fn test_registry_caches_by_type() {
        let registry = StrategyRegistry::new();
        let a = registry.resolve::<LatencyProfile>().unwrap();
        let b = registry.resolve::<LatencyProfile>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.modes().len(), 3);
        assert_eq!(LatencyProfile::minimum_events(), Some(5));
    }
}
