//! Attribute helpers shared by the meter and tracer builders.

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use std::collections::HashMap;
use std::hash::BuildHasher;

/// An attribute could not be merged into a resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("attribute at position {index} has an empty key")]
pub struct AttributeError {
    /// Position of the offending attribute in the accumulated list.
    pub index: usize,
}

/// Converts a string map into a list of string attributes.
///
/// The order of the result follows the map's iteration order.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use telemetry_builder::attributes_from_map;
///
/// let map = HashMap::from([("deployment.environment.name", "staging")]);
/// let attrs = attributes_from_map(&map);
/// assert_eq!(attrs[0].key.as_str(), "deployment.environment.name");
/// ```
pub fn attributes_from_map<K, V, S>(map: &HashMap<K, V, S>) -> Vec<KeyValue>
where
    K: AsRef<str>,
    V: AsRef<str>,
    S: BuildHasher,
{
    map.iter()
        .map(|(k, v)| KeyValue::new(k.as_ref().to_string(), v.as_ref().to_string()))
        .collect()
}

/// Builds a resource from the SDK defaults merged with `attributes`.
///
/// The SDK defaults include `telemetry.sdk.*` and whatever
/// `OTEL_SERVICE_NAME` / `OTEL_RESOURCE_ATTRIBUTES` hold in the process
/// environment. Later attributes win over earlier ones with the same key.
pub(crate) fn build_resource(attributes: &[KeyValue]) -> Result<Resource, AttributeError> {
    if let Some(index) = attributes.iter().position(|kv| kv.key.as_str().is_empty()) {
        return Err(AttributeError { index });
    }

    Ok(Resource::builder()
        .with_attributes(attributes.iter().cloned())
        .build())
}
