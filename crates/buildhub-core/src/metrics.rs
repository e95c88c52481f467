//! Metrics (component G, spec §4.G). Registered once at startup and
//! passed by reference into sessions, rather than imported as module
//! globals — see SPEC_FULL "Metrics as module-level singletons".

use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, IntGauge, Opts, Registry};

const BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, f64::INFINITY];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

pub struct Metrics {
    registry: Registry,
    build_time_seconds: HistogramVec,
    launch_time_seconds: HistogramVec,
    inprogress_builds: IntGauge,
    inprogress_launches: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let build_time_seconds = HistogramVec::new(
            HistogramOpts::new("build_time_seconds", "Histogram of build times")
                .buckets(BUCKETS.to_vec()),
            &["status"],
        )?;
        let launch_time_seconds = HistogramVec::new(
            HistogramOpts::new("launch_time_seconds", "Histogram of launch times")
                .buckets(BUCKETS.to_vec()),
            &["status"],
        )?;
        let inprogress_builds =
            IntGauge::with_opts(Opts::new("inprogress_builds", "Builds currently in progress"))?;
        let inprogress_launches = IntGauge::with_opts(Opts::new(
            "inprogress_launches",
            "Launches currently in progress",
        ))?;

        registry.register(Box::new(build_time_seconds.clone()))?;
        registry.register(Box::new(launch_time_seconds.clone()))?;
        registry.register(Box::new(inprogress_builds.clone()))?;
        registry.register(Box::new(inprogress_launches.clone()))?;

        Ok(Self {
            registry,
            build_time_seconds,
            launch_time_seconds,
            inprogress_builds,
            inprogress_launches,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observe_build(&self, outcome: Outcome, elapsed: Duration) {
        self.build_time_seconds
            .with_label_values(&[outcome.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn observe_launch(&self, outcome: Outcome, elapsed: Duration) {
        self.launch_time_seconds
            .with_label_values(&[outcome.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    /// Increments the gauge now; decrements it when the returned guard
    /// drops, on every exit path (including `?`-propagated errors) —
    /// closes the gap noted in SPEC_FULL §4.G where the original never
    /// decremented `builds_inprogress` on exceptions.
    #[must_use]
    pub fn track_build(&self) -> InProgressGuard<'_> {
        self.inprogress_builds.inc();
        InProgressGuard { gauge: &self.inprogress_builds }
    }

    #[must_use]
    pub fn track_launch(&self) -> InProgressGuard<'_> {
        self.inprogress_launches.inc();
        InProgressGuard { gauge: &self.inprogress_launches }
    }
}

pub struct InProgressGuard<'a> {
    gauge: &'a IntGauge,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_decrements_on_drop() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.inprogress_builds.get(), 0);
        {
            let _guard = metrics.track_build();
            assert_eq!(metrics.inprogress_builds.get(), 1);
        }
        assert_eq!(metrics.inprogress_builds.get(), 0);
    }

    #[test]
    fn guard_decrements_on_early_return() {
        let metrics = Metrics::new().unwrap();
        fn fallible(metrics: &Metrics) -> Result<(), ()> {
            let _guard = metrics.track_launch();
            Err(())?;
            Ok(())
        }
        let _ = fallible(&metrics);
        assert_eq!(metrics.inprogress_launches.get(), 0);
    }

    #[test]
    fn observations_are_labeled_by_status() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_build(Outcome::Success, Duration::from_secs(2));
        metrics.observe_build(Outcome::Failure, Duration::from_secs(3));
        let families = metrics.registry.gather();
        let build_family = families
            .iter()
            .find(|f| f.get_name() == "build_time_seconds")
            .expect("build_time_seconds registered");
        assert_eq!(build_family.get_metric().len(), 2);
    }
}
