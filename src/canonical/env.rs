//! Environment canonicalization.

use crate::error::{Error, Result};
use crate::inspect::scalar_string;
use crate::spec::EnvironmentSpec;
use std::collections::BTreeMap;

/// Parses `KEY=VALUE` entries into a mapping.
///
/// Values may contain `=`; only the first one separates the key.
pub fn parse_env_list<S: AsRef<str>>(items: &[S]) -> Result<BTreeMap<String, String>> {
    items
        .iter()
        .map(|item| {
            item.as_ref()
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| Error::InvalidEnvironment(item.as_ref().to_string()))
        })
        .collect()
}

/// Canonical desired environment; `null` values become empty strings.
pub fn desired_environment(spec: &EnvironmentSpec) -> Result<BTreeMap<String, String>> {
    match spec {
        EnvironmentSpec::Map(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), v.as_ref().map(scalar_string).unwrap_or_default()))
            .collect()),
        EnvironmentSpec::List(items) => parse_env_list(items),
    }
}
