use crate::error::ConfigError;
use std::num::NonZeroUsize;

/// What happens to the published writes of a transaction that fails validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidationPolicy {
    /// Drop the writes, so that later transactions read through them.
    #[default]
    Remove,
    /// Keep the writes as estimates,
    /// so that later transactions reading them abort until it re-executes.
    Estimate,
}

/// Configuration for the [`Scheduler`](crate::Scheduler).
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerOptions {
    /// Number of threads executing and validating transactions.
    ///
    /// Must be within `1..=512`.
    ///
    /// Default: the available parallelism of the machine
    #[serde(default = "SchedulerOptions::default_workers")]
    pub workers: usize,
    /// Number of parallel execute-and-validate rounds
    /// before the remaining transactions are re-executed sequentially.
    ///
    /// Must be within `1..=1000`.
    ///
    /// Default: 10
    #[serde(default = "SchedulerOptions::default_max_iterations")]
    pub max_iterations: usize,
    /// Default: `remove`
    #[serde(default)]
    pub invalidation: InvalidationPolicy,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
            ..Self::DEFAULT
        }
    }
}

impl SchedulerOptions {
    pub const MAX_WORKERS: usize = 512;
    pub const MAX_ITERATIONS: usize = 1000;

    const DEFAULT_WORKERS: usize = 4;
    const DEFAULT_MAX_ITERATIONS: usize = 10;

    /// The defaults, with a fixed worker count instead of the available parallelism.
    pub const DEFAULT: Self = Self {
        workers: Self::DEFAULT_WORKERS,
        max_iterations: Self::DEFAULT_MAX_ITERATIONS,
        invalidation: InvalidationPolicy::Remove,
    };

    fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map_or(Self::DEFAULT_WORKERS, NonZeroUsize::get)
            .min(Self::MAX_WORKERS)
    }

    const fn default_max_iterations() -> usize {
        Self::DEFAULT_MAX_ITERATIONS
    }

    /// Parses options from TOML, filling in defaults for missing keys.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let options: Self = toml::from_str(s)?;
        options.validate()?;
        Ok(options)
    }

    /// Checks that every option is within its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("workers", self.workers, 1, Self::MAX_WORKERS)?;
        check_range("max-iterations", self.max_iterations, 1, Self::MAX_ITERATIONS)
    }
}

fn check_range(option: &'static str, value: usize, min: usize, max: usize) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { option, value, min, max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn options_toml_roundtrip() {
        let options = SchedulerOptions::default();
        let toml = toml::to_string(&options).unwrap();
        assert!(toml.contains(r#"invalidation = "remove""#), "{toml}");
        assert_eq!(options, toml::from_str::<SchedulerOptions>(&toml).unwrap());

        let options = SchedulerOptions {
            invalidation: InvalidationPolicy::Estimate,
            ..options
        };
        let toml = toml::to_string(&options).unwrap();
        assert_eq!(options, toml::from_str::<SchedulerOptions>(&toml).unwrap());
    }

    #[test]
    fn options_from_partial_toml() {
        let toml = r#"
            max-iterations = 3
            invalidation = "estimate"
"#;

        let expected = SchedulerOptions {
            max_iterations: 3,
            invalidation: InvalidationPolicy::Estimate,
            ..<_>::default()
        };

        assert_eq!(expected, SchedulerOptions::from_toml_str(toml).unwrap());
    }

    #[test]
    fn invalidation_defaults_to_remove() {
        assert_eq!(SchedulerOptions::DEFAULT.invalidation, InvalidationPolicy::Remove);
        assert_eq!(SchedulerOptions::from_toml_str("").unwrap().invalidation, InvalidationPolicy::Remove);
    }

    #[test]
    fn default_options_are_valid() {
        SchedulerOptions::default().validate().unwrap();
        SchedulerOptions::DEFAULT.validate().unwrap();
    }

    #[test]
    fn magnitude_is_bounded() {
        for (toml, option) in [
            ("workers = 0", "workers"),
            ("workers = 100000", "workers"),
            ("max-iterations = 0", "max-iterations"),
            ("max-iterations = 1000001", "max-iterations"),
        ] {
            match SchedulerOptions::from_toml_str(toml) {
                Err(ConfigError::OutOfRange { option: got, .. }) => assert_eq!(got, option),
                other => panic!("expected `{option}` to be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn unknown_policy_is_a_parse_error() {
        assert!(matches!(
            SchedulerOptions::from_toml_str(r#"invalidation = "ignore""#),
            Err(ConfigError::Parse(_))
        ));
    }
}
