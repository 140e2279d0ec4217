//! The plain-text profile file format.
//!
//! The controller writes one profile file per profile onto every node, and the node-side
//! scheduler reads them back. The format is line based:
//!
//! ```text
//! PerformanceProfile BaselineLoad
//! --tags @Performance --tags @Future
//! 1.0, 10.0
//! 5.0, 1.0
//! ```
//!
//! The first line names the profile kind and the request type. The second line holds zero
//! or more `--tags <tag>` entries. Performance profiles continue with one
//! `requests_per_sec, delta_minutes` level per line; functional profiles have no levels.

use std::fmt;
use std::str::FromStr;

use crate::distribution::Level;
use crate::request::validate_name;
use crate::{ConfigError, Distribution, RequestType};

const PERFORMANCE: &str = "PerformanceProfile";
const FUNCTIONAL: &str = "FunctionalProfile";
const TAGS_FLAG: &str = "--tags";

/// Distinguishes rate driven profiles from run-once profiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    /// Requests are dispatched following a ramp distribution.
    Performance,
    /// The request type is executed exactly once.
    Functional,
}

impl ProfileKind {
    fn keyword(self) -> &'static str {
        match self {
            ProfileKind::Performance => PERFORMANCE,
            ProfileKind::Functional => FUNCTIONAL,
        }
    }
}

/// The contents of one profile file.
#[derive(Clone, Debug, PartialEq)]
pub struct ProfileDefinition {
    /// Whether the profile is rate driven or run once.
    pub kind: ProfileKind,
    /// Name of the request type executed by this profile.
    pub request_type: String,
    /// Tags forwarded to the test harness.
    pub tags: Vec<String>,
    /// The ramp, only present for performance profiles.
    pub levels: Vec<Level>,
}

impl ProfileDefinition {
    /// Builds the definition of a performance profile for one of `nodes` nodes.
    ///
    /// The rate of every level is divided by the number of nodes.
    pub fn performance(
        request_type: &RequestType,
        distribution: &Distribution,
        nodes: usize,
    ) -> Self {
        Self {
            kind: ProfileKind::Performance,
            request_type: request_type.name().to_owned(),
            tags: request_type.tags().to_vec(),
            levels: distribution.split_across(nodes).levels().to_vec(),
        }
    }

    /// Builds the definition of a functional profile.
    pub fn functional(request_type: &RequestType) -> Self {
        Self {
            kind: ProfileKind::Functional,
            request_type: request_type.name().to_owned(),
            tags: request_type.tags().to_vec(),
            levels: Vec::new(),
        }
    }

    /// Returns the tags as a single `--tags a --tags b` string.
    pub fn tag_string(&self) -> String {
        let mut out = String::new();
        for tag in &self.tags {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(TAGS_FLAG);
            out.push(' ');
            out.push_str(tag);
        }
        out
    }

    /// Returns the levels as a [`Distribution`] named after the request type.
    pub fn distribution(&self) -> Result<Distribution, ConfigError> {
        Distribution::new(self.request_type.clone(), self.levels.clone())
    }
}

impl fmt::Display for ProfileDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.kind.keyword(), self.request_type)?;
        writeln!(f, "{}", self.tag_string())?;
        for level in &self.levels {
            writeln!(f, "{}, {}", level.rate, level.delta_minutes)?;
        }
        Ok(())
    }
}

fn malformed(line: usize, reason: impl Into<String>) -> ConfigError {
    ConfigError::Profile {
        line,
        reason: reason.into(),
    }
}

fn parse_tags(line: usize, data: &str) -> Result<Vec<String>, ConfigError> {
    let mut tags = Vec::new();
    let mut tokens = data.split_whitespace();
    while let Some(flag) = tokens.next() {
        if flag != TAGS_FLAG {
            return Err(malformed(line, format!("expected `{TAGS_FLAG}`, found `{flag}`")));
        }
        let tag = tokens
            .next()
            .ok_or_else(|| malformed(line, format!("missing value after `{TAGS_FLAG}`")))?;
        tags.push(tag.to_owned());
    }
    Ok(tags)
}

fn parse_level(line: usize, data: &str) -> Result<Level, ConfigError> {
    let (rate, delta) = data
        .split_once(',')
        .ok_or_else(|| malformed(line, "expected `requests_per_sec, delta_minutes`"))?;
    let rate: f64 = rate
        .trim()
        .parse()
        .map_err(|_| malformed(line, format!("invalid rate `{}`", rate.trim())))?;
    let delta: f64 = delta
        .trim()
        .parse()
        .map_err(|_| malformed(line, format!("invalid duration `{}`", delta.trim())))?;
    Level::new(rate, delta).map_err(|err| malformed(line, err.to_string()))
}

impl FromStr for ProfileDefinition {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut lines = s.lines().enumerate().map(|(i, l)| (i + 1, l.trim()));

        let (_, header) = lines
            .next()
            .ok_or_else(|| malformed(1, "empty profile"))?;
        let mut parts = header.split_whitespace();
        let kind = match parts.next() {
            Some(PERFORMANCE) => ProfileKind::Performance,
            Some(FUNCTIONAL) => ProfileKind::Functional,
            Some(other) => return Err(malformed(1, format!("unknown profile type `{other}`"))),
            None => return Err(malformed(1, "missing profile type")),
        };
        let request_type = parts
            .next()
            .ok_or_else(|| malformed(1, "missing request type"))?
            .to_owned();
        if parts.next().is_some() {
            return Err(malformed(1, "unexpected trailing tokens"));
        }
        validate_name("request type", &request_type).map_err(|e| malformed(1, e.to_string()))?;

        let tags = match lines.next() {
            Some((line, data)) => parse_tags(line, data)?,
            None => Vec::new(),
        };

        let mut levels = Vec::new();
        for (line, data) in lines {
            if data.is_empty() {
                continue;
            }
            if kind == ProfileKind::Functional {
                return Err(malformed(line, "functional profiles cannot have levels"));
            }
            levels.push(parse_level(line, data)?);
        }

        Ok(Self {
            kind,
            request_type,
            tags,
            levels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_performance_profile() {
        let profile: ProfileDefinition =
            "PerformanceProfile BaselineLoad\n--tags @Performance --tags @Future\n1.0, 10.0\n5.0, 1.0\n"
                .parse()
                .unwrap();

        assert_eq!(profile.kind, ProfileKind::Performance);
        assert_eq!(profile.request_type, "BaselineLoad");
        assert_eq!(profile.tags, vec!["@Performance", "@Future"]);
        assert_eq!(
            profile.levels,
            vec![Level::new(1.0, 10.0).unwrap(), Level::new(5.0, 1.0).unwrap()]
        );
    }

    #[test]
    fn parses_functional_profile_without_tags() {
        let profile: ProfileDefinition = "FunctionalProfile LogonTests\n\n".parse().unwrap();
        assert_eq!(profile.kind, ProfileKind::Functional);
        assert!(profile.tags.is_empty());
        assert!(profile.levels.is_empty());
    }

    #[test]
    fn written_profile_reads_back() {
        let request_type = RequestType::new("Login").unwrap().with_tag("@Logon");
        let distribution = Distribution::ramp("ramp", [(10.0, 1.0), (10.0, 5.0)]).unwrap();
        let profile = ProfileDefinition::performance(&request_type, &distribution, 2);

        let text = profile.to_string();
        assert_eq!(text, "PerformanceProfile Login\n--tags @Logon\n5, 1\n5, 5\n");
        assert_eq!(text.parse::<ProfileDefinition>().unwrap(), profile);
    }

    #[test]
    fn reports_line_of_error() {
        let err = "PerformanceProfile Login\n\n1.0, 0\n"
            .parse::<ProfileDefinition>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Profile { line: 3, .. }));

        let err = "OtherProfile Login\n".parse::<ProfileDefinition>().unwrap_err();
        assert!(matches!(err, ConfigError::Profile { line: 1, .. }));

        let err = "FunctionalProfile Login\n--tags\n"
            .parse::<ProfileDefinition>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Profile { line: 2, .. }));

        let err = "FunctionalProfile Login\n\n1.0, 1.0\n"
            .parse::<ProfileDefinition>()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Profile { line: 3, .. }));
    }
}
