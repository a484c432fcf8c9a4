use std::str::FromStr;

use lazy_static::lazy_static;
use log::warn;

lazy_static! {
    static ref CONFIG: Config = Config;
}

/// Returns the process-wide configuration.
///
pub fn config() -> &'static Config {
    &CONFIG
}

/// Configuration read from the environment.
///
#[derive(Debug, Clone, Default)]
pub struct Config;

impl Config {
    /// Returns the value of `key`, if set.
    ///
    pub fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    /// Returns the value of `key`, or `default` if it isn't set.
    ///
    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Returns the value of `key` parsed as `T`.
    ///
    /// Falls back to `default` if the key isn't set or its value can't be parsed.
    ///
    pub fn get_parsed_or<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                warn!("Ignoring unparsable value '{}' for {}", value, key);
                default
            }),
            None => default,
        }
    }
}
