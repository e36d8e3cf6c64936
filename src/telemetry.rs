//! Logging and OpenTelemetry bootstrap for shardmesh processes.

use crate::{Error, Result};

use opentelemetry::global;
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{self, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;
use std::collections::BTreeMap;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const ATTR_SERVICE_NAME: &str = "service.name";
const ATTR_SERVICE_NAMESPACE: &str = "service.namespace";
const ATTR_RUN_ID: &str = "shardmesh.run_id";

/// Log line encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "pretty" => Ok(LogFormat::Text),
            other => Err(Error::Config(format!(
                "SHARDMESH_LOG_FORMAT must be one of [json, text], got '{other}'"
            ))),
        }
    }
}

/// Telemetry settings read from `OTEL_*` and `SHARDMESH_*` variables
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Install SDK tracer and meter providers
    pub enabled: bool,
    pub service_name: String,
    pub log_format: LogFormat,
    pub traces_sampler: String,
    pub run_id: Option<String>,
    pub resource_attributes: Vec<KeyValue>,
    sampler: Sampler,
}

impl TelemetryConfig {
    pub fn from_env(default_service_name: &str) -> Result<Self> {
        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| default_service_name.to_string());
        let service_name = service_name.trim();
        if service_name.is_empty() {
            return Err(Error::Config("OTEL_SERVICE_NAME cannot be empty".to_string()));
        }

        let enabled = parse_optional_bool("SHARDMESH_TELEMETRY_ENABLED")?.unwrap_or(false);
        let log_format = match std::env::var("SHARDMESH_LOG_FORMAT") {
            Ok(raw) => raw.parse()?,
            Err(_) => LogFormat::Json,
        };
        let run_id = std::env::var("SHARDMESH_TELEMETRY_RUN_ID")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let sampler_name = std::env::var("OTEL_TRACES_SAMPLER")
            .unwrap_or_else(|_| "parentbased_always_on".to_string());
        let sampler_arg = std::env::var("OTEL_TRACES_SAMPLER_ARG").ok();
        let sampler = parse_sampler(&sampler_name, sampler_arg.as_deref())?;

        let extra = match std::env::var("OTEL_RESOURCE_ATTRIBUTES") {
            Ok(raw) => parse_resource_attributes(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            enabled,
            service_name: service_name.to_string(),
            log_format,
            traces_sampler: sampler_name,
            resource_attributes: resource_attributes(service_name, run_id.as_deref(), extra),
            run_id,
            sampler,
        })
    }
}

fn resource_attributes(
    service_name: &str,
    run_id: Option<&str>,
    extra: Vec<(String, String)>,
) -> Vec<KeyValue> {
    let mut attributes: BTreeMap<String, String> = extra.into_iter().collect();
    attributes.insert(ATTR_SERVICE_NAME.to_string(), service_name.to_string());
    attributes
        .entry(ATTR_SERVICE_NAMESPACE.to_string())
        .or_insert_with(|| "shardmesh".to_string());
    if let Some(run_id) = run_id {
        attributes.insert(ATTR_RUN_ID.to_string(), run_id.to_string());
    }
    attributes
        .into_iter()
        .map(|(k, v)| KeyValue::new(k, v))
        .collect()
}

/// Keeps the SDK providers alive until dropped
pub struct Telemetry {
    config: TelemetryConfig,
    providers: Option<(TracerProvider, SdkMeterProvider)>,
}

impl Telemetry {
    /// Install the log subscriber and, when enabled, the OTel SDK providers
    pub fn init_for_component(default_service_name: &str, log_level: &str) -> Result<Self> {
        let config = TelemetryConfig::from_env(default_service_name)?;
        let level = parse_log_level(log_level)?;

        let builder = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_writer(std::io::stderr);
        let installed = match config.log_format {
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Text => builder.try_init(),
        };
        installed.map_err(|e| Error::Config(format!("failed to initialize log subscriber: {e}")))?;

        let providers = if config.enabled {
            let resource =
                Resource::default().merge(&Resource::new(config.resource_attributes.clone()));
            let tracer_provider = TracerProvider::builder()
                .with_config(
                    trace::Config::default()
                        .with_sampler(config.sampler.clone())
                        .with_resource(resource.clone()),
                )
                .build();
            let _ = global::set_tracer_provider(tracer_provider.clone());

            let meter_provider = SdkMeterProvider::builder().with_resource(resource).build();
            global::set_meter_provider(meter_provider.clone());
            global::set_text_map_propagator(TraceContextPropagator::new());
            Some((tracer_provider, meter_provider))
        } else {
            None
        };

        info!(
            service_name = %config.service_name,
            telemetry_enabled = config.enabled,
            log_format = config.log_format.as_str(),
            traces_sampler = %config.traces_sampler,
            run_id = %config.run_id.as_deref().unwrap_or("none"),
            "Telemetry initialized"
        );

        Ok(Self { config, providers })
    }

    pub fn run_id(&self) -> Option<&str> {
        self.config.run_id.as_deref()
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    pub fn is_enabled(&self) -> bool {
        self.providers.is_some()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some((tracer_provider, meter_provider)) = self.providers.take() {
            let _ = meter_provider.shutdown();
            let _ = tracer_provider.shutdown();
        }
    }
}

fn parse_log_level(raw: &str) -> Result<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::Config(format!(
            "invalid log level '{other}', expected one of [trace, debug, info, warn, error]"
        ))),
    }
}

pub(crate) fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{name} must be a boolean (true/false/1/0), got '{raw}'"
        ))),
    }
}

fn parse_optional_bool(name: &str) -> Result<Option<bool>> {
    match std::env::var(name) {
        Ok(raw) => parse_bool(name, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_sampler(name: &str, arg: Option<&str>) -> Result<Sampler> {
    match name.trim().to_ascii_lowercase().as_str() {
        "always_on" => Ok(Sampler::AlwaysOn),
        "always_off" => Ok(Sampler::AlwaysOff),
        "traceidratio" => Ok(Sampler::TraceIdRatioBased(parse_ratio(arg)?)),
        "parentbased_always_on" => Ok(Sampler::ParentBased(Box::new(Sampler::AlwaysOn))),
        "parentbased_traceidratio" => Ok(Sampler::ParentBased(Box::new(
            Sampler::TraceIdRatioBased(parse_ratio(arg)?),
        ))),
        other => Err(Error::Config(format!(
            "OTEL_TRACES_SAMPLER '{other}' is not supported. Supported values: always_on, always_off, traceidratio, parentbased_always_on, parentbased_traceidratio"
        ))),
    }
}

fn parse_ratio(arg: Option<&str>) -> Result<f64> {
    let raw = arg.ok_or_else(|| {
        Error::Config("OTEL_TRACES_SAMPLER_ARG is required for ratio samplers".to_string())
    })?;
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|e| Error::Config(format!("OTEL_TRACES_SAMPLER_ARG must be a float in [0,1]: {e}")))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::Config(format!(
            "OTEL_TRACES_SAMPLER_ARG must be in [0,1], got {value}"
        )));
    }
    Ok(value)
}

fn parse_resource_attributes(raw: &str) -> Result<Vec<(String, String)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                Error::Config(format!(
                    "OTEL_RESOURCE_ATTRIBUTES entry '{pair}' is invalid, expected key=value"
                ))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::Config(
                    "OTEL_RESOURCE_ATTRIBUTES contains an empty attribute key".to_string(),
                ));
            }
            Ok((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_attributes_keep_service_identity() {
        let extra = parse_resource_attributes("deployment=staging, service.namespace=edge").unwrap();
        let attributes = resource_attributes("shardmesh-router", Some("run-7"), extra);
        let find = |key: &str| {
            attributes
                .iter()
                .find(|kv| kv.key.as_str() == key)
                .map(|kv| kv.value.to_string())
        };
        assert_eq!(find("service.name").as_deref(), Some("shardmesh-router"));
        assert_eq!(find("service.namespace").as_deref(), Some("edge"));
        assert_eq!(find("shardmesh.run_id").as_deref(), Some("run-7"));
        assert_eq!(find("deployment").as_deref(), Some("staging"));
    }

    #[test]
    fn test_resource_attributes_reject_invalid_pairs() {
        let err = parse_resource_attributes("broken").unwrap_err();
        assert!(format!("{err}").contains("key=value"));
    }

    #[test]
    fn test_ratio_sampler_needs_argument() {
        let err = parse_sampler("traceidratio", None).unwrap_err();
        assert!(format!("{err}").contains("OTEL_TRACES_SAMPLER_ARG"));
        assert!(parse_sampler("traceidratio", Some("1.5")).is_err());
        assert!(parse_sampler("traceidratio", Some("0.25")).is_ok());
    }

    #[test]
    fn test_log_format_and_bools() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
        assert!(parse_bool("FLAG", "on").unwrap());
        assert!(!parse_bool("FLAG", "0").unwrap());
        assert!(parse_bool("FLAG", "maybe").is_err());
    }
}
