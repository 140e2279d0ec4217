//! The registry of everything a controller session defines.
//!
//! A [`Session`] is built once from configuration and passed to every run. All names are
//! validated on registration and must be unique per kind.

use std::collections::BTreeMap;

use loadgen_types::{ConfigError, Distribution, RequestType, validate_name};

/// Pairs a request type with the distribution it is driven along.
#[derive(Clone, Debug, PartialEq)]
pub struct PerformanceProfile {
    name: String,
    request_type: RequestType,
    distribution: Distribution,
}

impl PerformanceProfile {
    /// Returns the profile name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the request type.
    pub fn request_type(&self) -> &RequestType {
        &self.request_type
    }

    /// Returns the distribution.
    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }
}

/// A list of request types that are each executed once.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionalProfile {
    name: String,
    request_types: Vec<RequestType>,
}

impl FunctionalProfile {
    /// Returns the profile name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the request types in definition order.
    pub fn request_types(&self) -> &[RequestType] {
        &self.request_types
    }
}

/// Named request types, distributions and profiles of one controller session.
#[derive(Clone, Debug, Default)]
pub struct Session {
    request_types: BTreeMap<String, RequestType>,
    distributions: BTreeMap<String, Distribution>,
    performance_profiles: BTreeMap<String, PerformanceProfile>,
    functional_profiles: BTreeMap<String, FunctionalProfile>,
}

fn insert_unique<T>(
    map: &mut BTreeMap<String, T>,
    kind: &'static str,
    name: &str,
    value: T,
) -> Result<(), ConfigError> {
    validate_name(kind, name)?;
    if map.contains_key(name) {
        return Err(ConfigError::Duplicate {
            kind,
            name: name.to_owned(),
        });
    }
    map.insert(name.to_owned(), value);
    Ok(())
}

fn lookup<'a, T>(
    map: &'a BTreeMap<String, T>,
    kind: &'static str,
    name: &str,
) -> Result<&'a T, ConfigError> {
    map.get(name).ok_or_else(|| ConfigError::Unknown {
        kind,
        name: name.to_owned(),
    })
}

impl Session {
    /// Creates an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request type.
    pub fn add_request_type(&mut self, request_type: RequestType) -> Result<(), ConfigError> {
        request_type.validate()?;
        let name = request_type.name().to_owned();
        insert_unique(&mut self.request_types, "request type", &name, request_type)
    }

    /// Registers a distribution.
    pub fn add_distribution(&mut self, distribution: Distribution) -> Result<(), ConfigError> {
        distribution.validate()?;
        let name = distribution.name().to_owned();
        insert_unique(&mut self.distributions, "distribution", &name, distribution)
    }

    /// Registers a performance profile over a registered request type and distribution.
    pub fn add_performance_profile(
        &mut self,
        name: &str,
        request_type: &str,
        distribution: &str,
    ) -> Result<(), ConfigError> {
        let profile = PerformanceProfile {
            name: name.to_owned(),
            request_type: self.request_type(request_type)?.clone(),
            distribution: self.distribution(distribution)?.clone(),
        };
        insert_unique(
            &mut self.performance_profiles,
            "performance profile",
            name,
            profile,
        )
    }

    /// Registers a functional profile over registered request types.
    pub fn add_functional_profile(
        &mut self,
        name: &str,
        request_types: &[impl AsRef<str>],
    ) -> Result<(), ConfigError> {
        let request_types = request_types
            .iter()
            .map(|rt| self.request_type(rt.as_ref()).cloned())
            .collect::<Result<_, _>>()?;
        let profile = FunctionalProfile {
            name: name.to_owned(),
            request_types,
        };
        insert_unique(
            &mut self.functional_profiles,
            "functional profile",
            name,
            profile,
        )
    }

    /// Looks up a request type.
    pub fn request_type(&self, name: &str) -> Result<&RequestType, ConfigError> {
        lookup(&self.request_types, "request type", name)
    }

    /// Looks up a distribution.
    pub fn distribution(&self, name: &str) -> Result<&Distribution, ConfigError> {
        lookup(&self.distributions, "distribution", name)
    }

    /// Looks up a performance profile.
    pub fn performance_profile(&self, name: &str) -> Result<&PerformanceProfile, ConfigError> {
        lookup(&self.performance_profiles, "performance profile", name)
    }

    /// Looks up a functional profile.
    pub fn functional_profile(&self, name: &str) -> Result<&FunctionalProfile, ConfigError> {
        lookup(&self.functional_profiles, "functional profile", name)
    }

    /// Returns all request types by name.
    pub fn request_types(&self) -> impl Iterator<Item = &RequestType> {
        self.request_types.values()
    }
}
