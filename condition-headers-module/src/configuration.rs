// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Structures required to deserialize Condition Headers Module configuration from YAML
//! configuration files.

use log::trace;
use pingora_error::{Error, ErrorType};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt::Debug;
use std::fs::File;
use std::io::Read;
use std::ops::Deref;
use std::path::Path;

/// Error type used for all configuration problems detected when a handler is created
pub const CONFIGURATION_ERROR: ErrorType = ErrorType::Custom("ConfigurationError");

/// A list of header name/value pairs, deserialized from a map
///
/// Unlike a `HashMap` this keeps the entries in the order they were listed in the configuration
/// file. Header names are kept as they were written, validation happens when the rules are
/// compiled. A missing value (`null` in YAML) is stored as an empty string.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderPairs(pub(crate) Vec<(String, String)>);

impl Deref for HeaderPairs {
    type Target = [(String, String)];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<N, V> FromIterator<(N, V)> for HeaderPairs
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

/// A single rule: a set of conditions and the header changes applied if all of them hold
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuleConf {
    /// Response headers to be checked, mapped to a regular expression
    ///
    /// An empty regular expression means that the header has to be absent. Otherwise the header
    /// has to be present and its value has to contain a match for the regular expression.
    pub conditions: HeaderPairs,

    /// Response headers to be changed if all conditions hold
    ///
    /// An empty value removes the header, any other value replaces it.
    pub headers: HeaderPairs,
}

/// Configuration file settings of the condition headers module
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConditionHeadersConf {
    /// Rules to be applied in order. Processing stops at the first rule with conditions that
    /// don’t hold.
    pub rules: Vec<RuleConf>,
}

/// Trait for configuration structures that can be loaded from YAML. This trait has a blanket
/// implementation for any structure implementing [`serde::Deserialize`].
pub trait FromYaml {
    /// Parses configuration from a YAML string.
    fn from_yaml(yaml_conf: impl AsRef<str>) -> Result<Self, Box<Error>>
    where
        Self: Sized;

    /// Loads configuration from a YAML file.
    fn load_from_yaml(path: impl AsRef<Path>) -> Result<Self, Box<Error>>
    where
        Self: Sized;
}

impl<D> FromYaml for D
where
    D: DeserializeOwned + Debug,
{
    fn from_yaml(yaml_conf: impl AsRef<str>) -> Result<Self, Box<Error>> {
        let conf = serde_yaml::from_str(yaml_conf.as_ref()).map_err(|err| {
            Error::because(CONFIGURATION_ERROR, "failed parsing configuration", err)
        })?;
        trace!("Parsed configuration: {conf:#?}");

        Ok(conf)
    }

    fn load_from_yaml(path: impl AsRef<Path>) -> Result<Self, Box<Error>> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|err| {
            Error::because(
                ErrorType::FileOpenError,
                format!("failed opening configuration file {}", path.display()),
                err,
            )
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|err| {
            Error::because(
                ErrorType::FileReadError,
                format!("failed reading configuration file {}", path.display()),
                err,
            )
        })?;

        trace!("Loading configuration from {}", path.display());
        Self::from_yaml(contents)
    }
}
