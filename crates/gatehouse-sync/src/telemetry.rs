use crate::config::AppConfig;

#[cfg(feature = "telemetry")]
use opentelemetry::trace::TracerProvider as _;
#[cfg(feature = "telemetry")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "telemetry")]
use opentelemetry_sdk::trace::{Sampler, TracerProvider};

/// How many traces are exported, derived from `tracing.sample_rate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sampling {
    Always,
    Never,
    Ratio(f64),
}

impl Sampling {
    /// Rates at or above 1 keep every trace. Rates at or below 0, and NaN,
    /// keep none.
    pub fn from_rate(rate: f64) -> Self {
        if rate >= 1.0 {
            Sampling::Always
        } else if rate > 0.0 {
            Sampling::Ratio(rate)
        } else {
            Sampling::Never
        }
    }

    #[cfg(feature = "telemetry")]
    fn sampler(self) -> Sampler {
        match self {
            Sampling::Always => Sampler::AlwaysOn,
            Sampling::Never => Sampler::AlwaysOff,
            Sampling::Ratio(rate) => Sampler::TraceIdRatioBased(rate),
        }
    }
}

/// Attributes attached to every exported span, so traces from several
/// deployments can be told apart by the index they feed.
pub fn resource_attributes(config: &AppConfig) -> Vec<(&'static str, String)> {
    vec![
        ("service.name", config.tracing.service_name.clone()),
        ("service.version", env!("CARGO_PKG_VERSION").to_string()),
        ("gatehouse.index.name", config.index.name.clone()),
        (
            "gatehouse.browse_permission",
            config.index.browse_permission.clone(),
        ),
    ]
}

/// Installs the OTLP exporter. Logging is not up yet at this point, so
/// installation failures go to stderr and tracing continues without export.
#[cfg(feature = "telemetry")]
pub fn init_telemetry(config: &AppConfig) -> Option<TracerProvider> {
    let tracing_config = &config.tracing;
    if !tracing_config.enabled {
        return None;
    }

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(&tracing_config.otlp_endpoint);

    let resource = opentelemetry_sdk::Resource::new(
        resource_attributes(config)
            .into_iter()
            .map(|(key, value)| opentelemetry::KeyValue::new(key, value)),
    );

    let installed = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampling::from_rate(tracing_config.sample_rate).sampler())
                .with_resource(resource),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio);

    match installed {
        Ok(provider) => Some(provider),
        Err(e) => {
            eprintln!("failed to install OpenTelemetry tracer: {e}");
            None
        }
    }
}

#[cfg(feature = "telemetry")]
pub fn make_otel_layer(
    provider: &TracerProvider,
) -> tracing_opentelemetry::OpenTelemetryLayer<
    tracing_subscriber::Registry,
    opentelemetry_sdk::trace::Tracer,
> {
    let tracer = provider.tracer("gatehouse");
    tracing_opentelemetry::layer().with_tracer(tracer)
}

#[cfg(feature = "telemetry")]
pub fn shutdown_telemetry(provider: TracerProvider) {
    if let Err(e) = provider.shutdown() {
        tracing::warn!(error = %e, "failed to shut down tracer provider");
    }
}

#[cfg(not(feature = "telemetry"))]
pub fn init_telemetry(_config: &AppConfig) -> Option<()> {
    None
}

#[cfg(not(feature = "telemetry"))]
pub fn shutdown_telemetry(_provider: ()) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_telemetry_returns_none_when_disabled() {
        let mut config = AppConfig::default();
        config.tracing.enabled = false;
        config.tracing.otlp_endpoint = "http://collector:4317".to_string();

        assert!(init_telemetry(&config).is_none());
    }

    #[test]
    fn sample_rate_maps_to_sampling() {
        assert_eq!(Sampling::from_rate(1.0), Sampling::Always);
        assert_eq!(Sampling::from_rate(2.5), Sampling::Always);
        assert_eq!(Sampling::from_rate(0.25), Sampling::Ratio(0.25));
        assert_eq!(Sampling::from_rate(0.0), Sampling::Never);
        assert_eq!(Sampling::from_rate(-1.0), Sampling::Never);
        assert_eq!(Sampling::from_rate(f64::NAN), Sampling::Never);
    }

    #[test]
    fn resource_attributes_name_service_and_index() {
        let mut config = AppConfig::default();
        config.tracing.service_name = "gatehouse-eu".to_string();
        config.index.name = "authorizations-eu".to_string();

        let attributes = resource_attributes(&config);

        assert!(attributes.contains(&("service.name", "gatehouse-eu".to_string())));
        assert!(attributes.contains(&("gatehouse.index.name", "authorizations-eu".to_string())));
        assert!(
            attributes
                .iter()
                .any(|(key, value)| *key == "service.version" && !value.is_empty())
        );
    }

    #[cfg(feature = "telemetry")]
    #[test]
    fn sampling_builds_matching_sampler() {
        assert!(matches!(Sampling::Always.sampler(), Sampler::AlwaysOn));
        assert!(matches!(Sampling::Never.sampler(), Sampler::AlwaysOff));
        assert!(matches!(
            Sampling::Ratio(0.5).sampler(),
            Sampler::TraceIdRatioBased(rate) if rate == 0.5
        ));
    }
}
