// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    fs::File,
    io::Read,
    ops::Index,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Substrate options.
mod substrate_config {
    pub const SECTION_NAME: &str = "substrate";
    // Number of worker fibers of the default fiber pool.
    pub const POOL_WORKERS: &str = "pool_workers";
    // Name of the default mailbox scheduler.
    pub const MAILBOX_NAME: &str = "mailbox_name";
    // Time source driving timer dispatchers: "system" or "virtual".
    pub const CLOCK: &str = "clock";
    // Upper bound on host loop iterations when running on virtual time.
    pub const MAX_IDLE_STEPS: &str = "max_idle_steps";
}

//======================================================================================================================
// Static Variables
//======================================================================================================================

/// Serializes tests that touch the process environment, which every getter reads.
#[cfg(test)]
pub(crate) static ENVIRONMENT: ::std::sync::Mutex<()> = ::std::sync::Mutex::new(());

//======================================================================================================================
// Structures
//======================================================================================================================

/// Substrate configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

/// Time source selected by the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockKind {
    /// Monotonic wall clock.
    System,
    /// Simulated clock that only moves when told to.
    Virtual,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        Self::from_yaml_str(&config_s)
    }

    /// Parses a configuration from a YAML document.
    pub fn from_yaml_str(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed configuration: {}", e);
                error!("from_yaml_str(): {}", cause);
                return Err(Fail::invalid(&cause));
            },
        };
        match &config[..] {
            [c] => Ok(Self(c.clone())),
            _ => Err(Fail::invalid("Wrong number of config objects")),
        }
    }

    /// Reads the number of pool workers from the environment variable first and then the configuration file.
    pub fn pool_workers(&self) -> Result<usize, Fail> {
        let workers: usize = self.lookup(substrate_config::POOL_WORKERS, Self::as_usize)?;
        if workers == 0 {
            let cause: String = format!("parameter \"{}\" must be positive", substrate_config::POOL_WORKERS);
            error!("pool_workers(): {}", cause);
            return Err(Fail::new(libc::ERANGE, &cause));
        }
        Ok(workers)
    }

    pub fn mailbox_name(&self) -> Result<String, Fail> {
        self.lookup(substrate_config::MAILBOX_NAME, |value: &Yaml| value.as_str().map(str::to_string))
    }

    pub fn clock(&self) -> Result<ClockKind, Fail> {
        self.lookup(substrate_config::CLOCK, |value: &Yaml| value.as_str().and_then(|s| s.parse().ok()))
    }

    pub fn max_idle_steps(&self) -> Result<usize, Fail> {
        self.lookup(substrate_config::MAX_IDLE_STEPS, Self::as_usize)
    }

    /// Reads `key` from the environment variable named after it in upper case, or else from the substrate section,
    /// converting the file's value with `from_yaml`.
    fn lookup<T, F>(&self, key: &str, from_yaml: F) -> Result<T, Fail>
    where
        T: FromStr,
        F: FnOnce(&Yaml) -> Option<T>,
    {
        if let Ok(var) = ::std::env::var(key.to_uppercase()) {
            return var.parse().map_err(|_| Self::unexpected(key));
        }
        let section: &Yaml = self.0.index(substrate_config::SECTION_NAME);
        match section {
            Yaml::Hash(_) => (),
            Yaml::BadValue => return Err(Self::missing(substrate_config::SECTION_NAME)),
            _ => return Err(Self::unexpected(substrate_config::SECTION_NAME)),
        }
        match section.index(key) {
            Yaml::BadValue => Err(Self::missing(key)),
            value => from_yaml(value).ok_or_else(|| Self::unexpected(key)),
        }
    }

    fn as_usize(value: &Yaml) -> Option<usize> {
        value.as_i64().and_then(|value: i64| usize::try_from(value).ok())
    }

    fn missing(key: &str) -> Fail {
        Fail::invalid(&format!("missing configuration option \"{}\"", key))
    }

    fn unexpected(key: &str) -> Fail {
        Fail::invalid(&format!("parameter \"{}\" has unexpected type", key))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl FromStr for ClockKind {
    type Err = Fail;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "system" => Ok(ClockKind::System),
            "virtual" => Ok(ClockKind::Virtual),
            _ => Err(Fail::invalid(&format!("unknown clock kind \"{}\"", value))),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
