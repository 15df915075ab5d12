use std::{env, path::PathBuf};

use crate::{
    annexb::ParameterSetPolicy,
    marshal::{Error, Result},
};

pub const OUTPUT_VAR: &str = "MP4DEMUX_OUTPUT";
pub const PARAMETER_SETS_VAR: &str = "MP4DEMUX_PARAMETER_SETS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Where the elementary stream is written.
    pub output: PathBuf,
    pub policy: ParameterSetPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output: PathBuf::from("out.h264"),
            policy: ParameterSetPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from `lookup`, falling back to the defaults
    /// for unset or empty keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let lookup = |key: &str| lookup(key).filter(|value: &String| !value.is_empty());

        if let Some(output) = lookup(OUTPUT_VAR) {
            config.output = PathBuf::from(output);
        }
        if let Some(policy) = lookup(PARAMETER_SETS_VAR) {
            config.policy = policy.parse().map_err(|value| Error::InvalidConfig {
                key: PARAMETER_SETS_VAR,
                value,
            })?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.output, PathBuf::from("out.h264"));
        assert_eq!(config.policy, ParameterSetPolicy::SyncSamples);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn overrides() {
        let config = config(&[
            (OUTPUT_VAR, "/tmp/video.264"),
            (PARAMETER_SETS_VAR, "stream-head"),
        ])
        .unwrap();
        assert_eq!(config.output, PathBuf::from("/tmp/video.264"));
        assert_eq!(config.policy, ParameterSetPolicy::StreamHead);
    }

    #[test]
    fn empty_values_are_unset() {
        let config = config(&[(OUTPUT_VAR, ""), (PARAMETER_SETS_VAR, "")]).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn unknown_policy() {
        assert!(matches!(
            config(&[(PARAMETER_SETS_VAR, "keyframes")]),
            Err(Error::InvalidConfig {
                key: PARAMETER_SETS_VAR,
                value,
            }) if value == "keyframes"
        ));
    }
}
