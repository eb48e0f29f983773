//! Per-component configuration overrides given on the command line.

use crate::error::{Error, Result};

use std::collections::BTreeMap;
use std::str::FromStr;

use localkv_etcd::EtcdConfig;
use tracing::debug;

/// One `component.key=value` override.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtraConfig {
    /// Component the override is addressed to.
    pub component: String,

    /// Configuration key within the component.
    pub key: String,

    /// Replacement value.
    pub value: String,
}

impl FromStr for ExtraConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidExtraConfig(s.to_string());

        let (path, value) = s.split_once('=').ok_or_else(invalid)?;
        let (component, key) = path.split_once('.').ok_or_else(invalid)?;

        let component = component.trim();
        let key = key.trim();
        if component.is_empty() || key.is_empty() {
            return Err(invalid());
        }

        Ok(Self {
            component: component.to_string(),
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// Overrides for every component, and the configurations they produced.
#[derive(Debug, Default)]
pub struct ExtraConfigs {
    overrides: Vec<ExtraConfig>,
    registered: BTreeMap<&'static str, EtcdConfig>,
}

impl ExtraConfigs {
    /// Parses `component.key=value` entries.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidExtraConfig` for the first malformed entry.
    pub fn parse<S>(entries: &[S]) -> Result<Self>
    where
        S: AsRef<str>,
    {
        let overrides = entries
            .iter()
            .map(|entry| entry.as_ref().parse())
            .collect::<Result<Vec<ExtraConfig>>>()?;

        Ok(Self {
            overrides,
            registered: BTreeMap::new(),
        })
    }

    /// Applies the overrides addressed to etcd, in order, and registers the
    /// result under the component's name.
    ///
    /// # Errors
    ///
    /// Returns an error if an override names an unknown key or carries a bad
    /// value.
    pub fn apply(&mut self, mut config: EtcdConfig) -> Result<EtcdConfig> {
        let component = EtcdConfig::component_name();

        for extra in self.overrides.iter().filter(|o| o.component == component) {
            debug!("overriding {}.{} = {}", component, extra.key, extra.value);
            config = config.with_override(&extra.key, &extra.value)?;
        }

        self.registered.insert(component, config.clone());

        Ok(config)
    }

    /// The configuration registered for `component`, if any.
    #[must_use]
    pub fn get(&self, component: &str) -> Option<&EtcdConfig> {
        self.registered.get(component)
    }

    /// Names of the components that registered a configuration.
    pub fn components(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.registered.keys().copied()
    }

    /// Overrides addressed to components that never registered.
    pub fn unclaimed(&self) -> impl Iterator<Item = &ExtraConfig> {
        self.overrides
            .iter()
            .filter(|o| !self.registered.contains_key(o.component.as_str()))
    }
}
