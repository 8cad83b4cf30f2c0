//! Configuration types for the meter and tracer providers.
//!
//! Every layer maps to and from its standard `OTEL_*` environment
//! representation through the [`Environment`] trait. Loading is a figment
//! merge: the current value forms the base layer and environment overrides
//! are merged over it.
//!
//! Serialization is deliberately asymmetric. Optional fields (service name,
//! resource attributes, endpoint, headers and TLS paths) are omitted when
//! empty, while fields with a meaningful default (protocol, timeouts,
//! enabled flags, sampler and sampler argument) are always emitted.

use crate::error::TelemetryError;
use figment::Figment;
use figment::providers::{Format, Serialized, Toml};
use opentelemetry_sdk::trace::Sampler;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable names read and written by the configuration types.
pub mod keys {
    /// Service identity.
    pub const SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
    /// Resource attributes as a `key=value` list.
    pub const RESOURCE_ATTRIBUTES: &str = "OTEL_RESOURCE_ATTRIBUTES";
    /// Shared OTLP endpoint.
    pub const EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
    /// Shared OTLP headers as a `key=value` list.
    pub const EXPORTER_OTLP_HEADERS: &str = "OTEL_EXPORTER_OTLP_HEADERS";
    /// OTLP transport protocol.
    pub const EXPORTER_OTLP_PROTOCOL: &str = "OTEL_EXPORTER_OTLP_PROTOCOL";
    /// OTLP request timeout in milliseconds.
    pub const EXPORTER_OTLP_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";
    /// Path to the CA certificate used to verify the collector.
    pub const EXPORTER_OTLP_CERTIFICATE: &str = "OTEL_EXPORTER_OTLP_CERTIFICATE";
    /// Path to the client private key for mTLS.
    pub const EXPORTER_OTLP_CLIENT_KEY: &str = "OTEL_EXPORTER_OTLP_CLIENT_KEY";
    /// Path to the client certificate for mTLS.
    pub const EXPORTER_OTLP_CLIENT_CERTIFICATE: &str = "OTEL_EXPORTER_OTLP_CLIENT_CERTIFICATE";
    /// Whether the meter provider is built.
    pub const METRIC_ENABLED: &str = "OTEL_METRIC_ENABLED";
    /// Interval between metric exports in milliseconds.
    pub const METRIC_EXPORT_INTERVAL: &str = "OTEL_METRIC_EXPORT_INTERVAL";
    /// Maximum duration of a metric export in milliseconds.
    pub const METRIC_EXPORT_TIMEOUT: &str = "OTEL_METRIC_EXPORT_TIMEOUT";
    /// Whether the tracer provider is built.
    pub const TRACES_ENABLED: &str = "OTEL_TRACES_ENABLED";
    /// Sampler name.
    pub const TRACES_SAMPLER: &str = "OTEL_TRACES_SAMPLER";
    /// Sampler argument.
    pub const TRACES_SAMPLER_ARG: &str = "OTEL_TRACES_SAMPLER_ARG";

    /// Every key, in table order.
    pub const ALL: [&str; 15] = [
        SERVICE_NAME,
        RESOURCE_ATTRIBUTES,
        EXPORTER_OTLP_ENDPOINT,
        EXPORTER_OTLP_HEADERS,
        EXPORTER_OTLP_PROTOCOL,
        EXPORTER_OTLP_TIMEOUT,
        EXPORTER_OTLP_CERTIFICATE,
        EXPORTER_OTLP_CLIENT_KEY,
        EXPORTER_OTLP_CLIENT_CERTIFICATE,
        METRIC_ENABLED,
        METRIC_EXPORT_INTERVAL,
        METRIC_EXPORT_TIMEOUT,
        TRACES_ENABLED,
        TRACES_SAMPLER,
        TRACES_SAMPLER_ARG,
    ];
}

/// Sampler that records every span.
pub const SAMPLER_ALWAYS_ON: &str = "always_on";
/// Sampler that records no spans.
pub const SAMPLER_ALWAYS_OFF: &str = "always_off";
/// Sampler that records a ratio of traces.
pub const SAMPLER_TRACE_ID_RATIO: &str = "traceidratio";
/// Parent-based sampler with an always-on root.
pub const SAMPLER_PARENT_BASED_ALWAYS_ON: &str = "parentbased_always_on";
/// Parent-based sampler with an always-off root.
pub const SAMPLER_PARENT_BASED_ALWAYS_OFF: &str = "parentbased_always_off";
/// Parent-based sampler with a ratio root.
pub const SAMPLER_PARENT_BASED_TRACE_ID_RATIO: &str = "parentbased_traceidratio";

const DEFAULT_EXPORTER_TIMEOUT: Duration = Duration::from_millis(10_000);
const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_millis(60_000);
const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_millis(30_000);
const DEFAULT_SAMPLER: &str = SAMPLER_PARENT_BASED_TRACE_ID_RATIO;
const DEFAULT_SAMPLER_ARG: &str = "0.5";

/// Environment snapshot keyed by variable name.
pub type EnvMap = BTreeMap<String, String>;

/// A configuration layer with an environment representation.
pub trait Environment {
    /// Serializes the layer to its environment variables.
    fn environ(&self) -> EnvMap;

    /// Loads overrides from `source`, which returns the value of a variable
    /// if it is set.
    ///
    /// Absent keys keep the current value; an absent key whose field is
    /// empty or zero gets the field's default.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidEnv`] naming the first malformed key.
    fn load_from(&mut self, source: &dyn Fn(&str) -> Option<String>)
    -> Result<(), TelemetryError>;

    /// Loads overrides from the process environment.
    ///
    /// # Errors
    ///
    /// See [`Environment::load_from`].
    fn load_env(&mut self) -> Result<(), TelemetryError> {
        self.load_from(&|key| std::env::var(key).ok())
    }

    /// Loads overrides from an environment snapshot.
    ///
    /// # Errors
    ///
    /// See [`Environment::load_from`].
    fn load_from_map(&mut self, env: &EnvMap) -> Result<(), TelemetryError> {
        self.load_from(&|key| env.get(key).cloned())
    }
}

/// OTLP transport protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// gRPC transport.
    #[default]
    #[serde(rename = "grpc")]
    Grpc,
    /// HTTP with protobuf encoding. Recognised but not wired by this crate.
    #[serde(rename = "http/protobuf")]
    HttpProtobuf,
}

impl Protocol {
    /// Returns the environment representation of the protocol.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::HttpProtobuf => "http/protobuf",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`Protocol`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol (expected \"grpc\" or \"http/protobuf\")")]
pub struct ParseProtocolError;

impl FromStr for Protocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "grpc" => Ok(Protocol::Grpc),
            "http/protobuf" => Ok(Protocol::HttpProtobuf),
            _ => Err(ParseProtocolError),
        }
    }
}

/// Complete telemetry configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name reported as `service.name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Additional resource attributes shared by both providers.
    pub resource_attributes: HashMap<String, String>,

    /// OTLP exporter settings.
    pub exporter: ExporterOtlpConfig,

    /// Meter provider settings.
    pub meter: MeterProviderConfig,

    /// Tracer provider settings.
    pub tracer: TracerProviderConfig,
}

impl Config {
    /// Loads configuration from defaults layered with a TOML file.
    ///
    /// If the file doesn't exist it is skipped and the defaults are returned.
    /// Environment overrides are applied later, when a builder is finalised.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Config`] if the file cannot be parsed.
    ///
    /// # Example
    ///
    /// ```toml
    /// service_name = "checkout"
    ///
    /// [exporter]
    /// endpoint = "http://collector:4317"
    /// timeout = 5000
    ///
    /// [tracer]
    /// sampler = "always_on"
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TelemetryError> {
        let path = path.as_ref();
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
        Ok(figment.extract()?)
    }

    /// Returns the attributes describing this service: `service.name` when
    /// set, followed by the resource attributes ordered by key.
    #[must_use]
    pub fn resource_key_values(&self) -> Vec<opentelemetry::KeyValue> {
        let mut attrs: Vec<_> = self.resource_attributes.iter().collect();
        attrs.sort_by(|a, b| a.0.cmp(b.0));

        let mut result: Vec<_> = attrs
            .into_iter()
            .map(|(k, v)| opentelemetry::KeyValue::new(k.clone(), v.clone()))
            .collect();

        if let Some(name) = self.service_name.as_deref().filter(|n| !n.is_empty()) {
            result.insert(
                0,
                opentelemetry::KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    name.to_string(),
                ),
            );
        }
        result
    }

    /// Loads overrides for the fields not owned by a provider config.
    pub(crate) fn load_shared_from(
        &mut self,
        source: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), TelemetryError> {
        let partial = PartialConfig {
            service_name: lookup(source, keys::SERVICE_NAME),
            resource_attributes: lookup(source, keys::RESOURCE_ATTRIBUTES)
                .map(|raw| parse_key_values(keys::RESOURCE_ATTRIBUTES, &raw))
                .transpose()?,
        };
        *self = merge(self, partial)?;
        self.exporter.load_from(source)
    }
}

impl Environment for Config {
    fn environ(&self) -> EnvMap {
        let mut env = EnvMap::new();
        if let Some(name) = self.service_name.as_deref().filter(|n| !n.is_empty()) {
            env.insert(keys::SERVICE_NAME.to_string(), name.to_string());
        }
        if !self.resource_attributes.is_empty() {
            env.insert(
                keys::RESOURCE_ATTRIBUTES.to_string(),
                format_key_values(&self.resource_attributes),
            );
        }
        env.extend(self.exporter.environ());
        env.extend(self.meter.environ());
        env.extend(self.tracer.environ());
        env
    }

    fn load_from(
        &mut self,
        source: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), TelemetryError> {
        self.load_shared_from(source)?;
        self.meter.load_from(source)?;
        self.tracer.load_from(source)
    }
}

/// OTLP exporter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterOtlpConfig {
    /// Collector endpoint. No exporter is wired by default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Metadata sent with every export request.
    pub headers: HashMap<String, String>,

    /// Transport protocol.
    pub protocol: Protocol,

    /// Request timeout.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,

    /// Path to a PEM CA certificate used to verify the collector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    /// Path to a PEM private key for client authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,

    /// Path to a PEM certificate for client authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,
}

impl Default for ExporterOtlpConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            headers: HashMap::new(),
            protocol: Protocol::default(),
            timeout: DEFAULT_EXPORTER_TIMEOUT,
            certificate: None,
            client_key: None,
            client_certificate: None,
        }
    }
}

impl ExporterOtlpConfig {
    /// Returns the endpoint if one is set and non-empty.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref().filter(|e| !e.is_empty())
    }
}

impl Environment for ExporterOtlpConfig {
    fn environ(&self) -> EnvMap {
        let mut env = EnvMap::new();
        insert_non_empty(&mut env, keys::EXPORTER_OTLP_ENDPOINT, &self.endpoint);
        if !self.headers.is_empty() {
            env.insert(
                keys::EXPORTER_OTLP_HEADERS.to_string(),
                format_key_values(&self.headers),
            );
        }
        env.insert(
            keys::EXPORTER_OTLP_PROTOCOL.to_string(),
            self.protocol.to_string(),
        );
        env.insert(
            keys::EXPORTER_OTLP_TIMEOUT.to_string(),
            self.timeout.as_millis().to_string(),
        );
        insert_non_empty(&mut env, keys::EXPORTER_OTLP_CERTIFICATE, &self.certificate);
        insert_non_empty(&mut env, keys::EXPORTER_OTLP_CLIENT_KEY, &self.client_key);
        insert_non_empty(
            &mut env,
            keys::EXPORTER_OTLP_CLIENT_CERTIFICATE,
            &self.client_certificate,
        );
        env
    }

    fn load_from(
        &mut self,
        source: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), TelemetryError> {
        let partial = PartialExporterConfig {
            endpoint: lookup(source, keys::EXPORTER_OTLP_ENDPOINT),
            headers: lookup(source, keys::EXPORTER_OTLP_HEADERS)
                .map(|raw| parse_key_values(keys::EXPORTER_OTLP_HEADERS, &raw))
                .transpose()?,
            protocol: parse(source, keys::EXPORTER_OTLP_PROTOCOL)?,
            timeout: parse_millis(source, keys::EXPORTER_OTLP_TIMEOUT)?
                .or_else(|| self.timeout.is_zero().then_some(DEFAULT_EXPORTER_TIMEOUT)),
            certificate: lookup(source, keys::EXPORTER_OTLP_CERTIFICATE),
            client_key: lookup(source, keys::EXPORTER_OTLP_CLIENT_KEY),
            client_certificate: lookup(source, keys::EXPORTER_OTLP_CLIENT_CERTIFICATE),
        };
        *self = merge(self, partial)?;
        Ok(())
    }
}

/// Meter provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterProviderConfig {
    /// Whether the meter provider is built.
    pub enabled: bool,

    /// Time between the start of two export attempts.
    #[serde(with = "duration_ms")]
    pub export_interval: Duration,

    /// Maximum time allowed for one export.
    #[serde(with = "duration_ms")]
    pub export_timeout: Duration,
}

impl Default for MeterProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            export_interval: DEFAULT_EXPORT_INTERVAL,
            export_timeout: DEFAULT_EXPORT_TIMEOUT,
        }
    }
}

impl Environment for MeterProviderConfig {
    fn environ(&self) -> EnvMap {
        EnvMap::from([
            (keys::METRIC_ENABLED.to_string(), self.enabled.to_string()),
            (
                keys::METRIC_EXPORT_INTERVAL.to_string(),
                self.export_interval.as_millis().to_string(),
            ),
            (
                keys::METRIC_EXPORT_TIMEOUT.to_string(),
                self.export_timeout.as_millis().to_string(),
            ),
        ])
    }

    fn load_from(
        &mut self,
        source: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), TelemetryError> {
        let partial = PartialMeterConfig {
            enabled: parse_bool(source, keys::METRIC_ENABLED)?,
            export_interval: parse_millis(source, keys::METRIC_EXPORT_INTERVAL)?.or_else(|| {
                self.export_interval
                    .is_zero()
                    .then_some(DEFAULT_EXPORT_INTERVAL)
            }),
            export_timeout: parse_millis(source, keys::METRIC_EXPORT_TIMEOUT)?
                .or_else(|| self.export_timeout.is_zero().then_some(DEFAULT_EXPORT_TIMEOUT)),
        };
        *self = merge(self, partial)?;
        Ok(())
    }
}

/// Tracer provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerProviderConfig {
    /// Whether the tracer provider is built.
    pub enabled: bool,

    /// Sampler name, e.g. `parentbased_traceidratio`.
    pub sampler: String,

    /// Sampler argument; the ratio for ratio-based samplers.
    pub sampler_arg: String,
}

impl Default for TracerProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sampler: DEFAULT_SAMPLER.to_string(),
            sampler_arg: DEFAULT_SAMPLER_ARG.to_string(),
        }
    }
}

impl TracerProviderConfig {
    /// Resolves the configured sampler.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidSampler`] for an unknown sampler name
    /// and [`TelemetryError::InvalidEnv`] when a ratio sampler's argument is
    /// not a number between 0 and 1.
    pub fn sampler(&self) -> Result<Sampler, TelemetryError> {
        let sampler = match self.sampler.as_str() {
            SAMPLER_ALWAYS_ON => Sampler::AlwaysOn,
            SAMPLER_ALWAYS_OFF => Sampler::AlwaysOff,
            SAMPLER_TRACE_ID_RATIO => Sampler::TraceIdRatioBased(self.ratio()?),
            SAMPLER_PARENT_BASED_ALWAYS_ON => Sampler::ParentBased(Box::new(Sampler::AlwaysOn)),
            SAMPLER_PARENT_BASED_ALWAYS_OFF => Sampler::ParentBased(Box::new(Sampler::AlwaysOff)),
            SAMPLER_PARENT_BASED_TRACE_ID_RATIO => {
                Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(self.ratio()?)))
            }
            name => {
                return Err(TelemetryError::InvalidSampler {
                    name: name.to_string(),
                });
            }
        };
        Ok(sampler)
    }

    fn ratio(&self) -> Result<f64, TelemetryError> {
        let invalid = |source: Box<dyn std::error::Error + Send + Sync>| TelemetryError::InvalidEnv {
            key: keys::TRACES_SAMPLER_ARG,
            value: self.sampler_arg.clone(),
            source,
        };

        let ratio: f64 = self
            .sampler_arg
            .trim()
            .parse()
            .map_err(|err| invalid(Box::new(err)))?;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(invalid("ratio must be between 0 and 1".into()));
        }
        Ok(ratio)
    }
}

impl Environment for TracerProviderConfig {
    fn environ(&self) -> EnvMap {
        EnvMap::from([
            (keys::TRACES_ENABLED.to_string(), self.enabled.to_string()),
            (keys::TRACES_SAMPLER.to_string(), self.sampler.clone()),
            (keys::TRACES_SAMPLER_ARG.to_string(), self.sampler_arg.clone()),
        ])
    }

    fn load_from(
        &mut self,
        source: &dyn Fn(&str) -> Option<String>,
    ) -> Result<(), TelemetryError> {
        let partial = PartialTracerConfig {
            enabled: parse_bool(source, keys::TRACES_ENABLED)?,
            sampler: lookup(source, keys::TRACES_SAMPLER)
                .map(|s| s.trim().to_lowercase())
                .or_else(|| {
                    self.sampler
                        .is_empty()
                        .then(|| DEFAULT_SAMPLER.to_string())
                }),
            sampler_arg: lookup(source, keys::TRACES_SAMPLER_ARG).or_else(|| {
                self.sampler_arg
                    .is_empty()
                    .then(|| DEFAULT_SAMPLER_ARG.to_string())
            }),
        };
        *self = merge(self, partial)?;
        Ok(())
    }
}

#[derive(Debug, Default, Serialize)]
struct PartialConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_attributes: Option<HashMap<String, String>>,
}

#[derive(Debug, Default, Serialize)]
struct PartialExporterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<Protocol>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "duration_ms::serialize_some"
    )]
    timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_certificate: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct PartialMeterConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "duration_ms::serialize_some"
    )]
    export_interval: Option<Duration>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "duration_ms::serialize_some"
    )]
    export_timeout: Option<Duration>,
}

#[derive(Debug, Default, Serialize)]
struct PartialTracerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sampler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sampler_arg: Option<String>,
}

/// Merges `overrides` over `current` and extracts the result.
fn merge<T, P>(current: &T, overrides: P) -> Result<T, TelemetryError>
where
    T: Serialize + DeserializeOwned,
    P: Serialize,
{
    Ok(Figment::from(Serialized::defaults(current))
        .merge(Serialized::defaults(overrides))
        .extract()?)
}

fn lookup(source: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    source(key).filter(|v| !v.trim().is_empty())
}

fn parse<T>(
    source: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, TelemetryError>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(source, key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|err| TelemetryError::InvalidEnv {
                    key,
                    value: raw.clone(),
                    source: Box::new(err),
                })
        })
        .transpose()
}

fn parse_bool(
    source: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<bool>, TelemetryError> {
    let lowered = |key: &str| source(key).map(|v| v.trim().to_lowercase());
    parse(&lowered, key)
}

fn parse_millis(
    source: &dyn Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<Duration>, TelemetryError> {
    Ok(parse::<u64>(source, key)?.map(Duration::from_millis))
}

/// Parses a `key1=value1,key2=value2` list.
pub(crate) fn parse_key_values(
    key: &'static str,
    raw: &str,
) -> Result<HashMap<String, String>, TelemetryError> {
    let mut map = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let invalid = |reason: &str| TelemetryError::InvalidEnv {
            key,
            value: raw.to_string(),
            source: format!("{reason} in entry {pair:?}").into(),
        };

        let (k, v) = pair.split_once('=').ok_or_else(|| invalid("missing '='"))?;
        let k = k.trim();
        if k.is_empty() {
            return Err(invalid("empty key"));
        }
        map.insert(k.to_string(), v.trim().to_string());
    }
    Ok(map)
}

/// Formats a map as a `key=value` list ordered by key.
pub(crate) fn format_key_values(map: &HashMap<String, String>) -> String {
    let mut pairs: Vec<_> = map.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn insert_non_empty(env: &mut EnvMap, key: &str, value: &Option<String>) {
    if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
        env.insert(key.to_string(), value.to_string());
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn serialize_some<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
