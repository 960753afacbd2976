use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::common::TargetId;
use crate::domains::deployment::errors::AppError;

/// Environment slots an app can be deployed to.
///
/// This closed set is the only source of the `{env}_*` column prefixes on the
/// `apps` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
}

impl Environment {
    pub const ALL: [Environment; 2] = [Environment::Production, Environment::Staging];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
        }
    }

    /// Prefix of the columns holding this slot's configuration.
    pub fn column_prefix(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "production" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            _ => Err(anyhow::anyhow!("Invalid environment: {}", s)),
        }
    }
}

/// Environment variables per service: `service name -> (key -> value)`.
pub type EnvVars = BTreeMap<String, BTreeMap<String, String>>;

/// Where and with which variables an app environment is deployed.
///
/// `version` changes whenever the target changes, so resources left on a
/// previous target can be told apart from current ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    target: TargetId,
    version: DateTime<Utc>,
    vars: Option<EnvVars>,
}

impl EnvironmentConfig {
    pub fn new(target: TargetId) -> Self {
        Self {
            target,
            version: Utc::now(),
            vars: None,
        }
    }

    pub fn with_vars(mut self, vars: EnvVars) -> Self {
        self.vars = Some(vars);
        self
    }

    pub(crate) fn from_parts(target: TargetId, version: DateTime<Utc>, vars: Option<EnvVars>) -> Self {
        Self {
            target,
            version,
            vars,
        }
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn version(&self) -> DateTime<Utc> {
        self.version
    }

    pub fn vars(&self) -> Option<&EnvVars> {
        self.vars.as_ref()
    }

    /// Same target and same variables, versions aside.
    pub fn has_same_values(&self, other: &EnvironmentConfig) -> bool {
        self.target == other.target && self.vars == other.vars
    }

    /// Keep `previous`'s version when the target did not move.
    pub(crate) fn consolidate(mut self, previous: &EnvironmentConfig) -> Self {
        if self.target == previous.target {
            self.version = previous.version;
        }
        self
    }
}

/// A valid app name: lowercase letters, digits and hyphens, never at either end.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AppName(String);

impl AppName {
    pub fn parse(value: impl Into<String>) -> Result<Self, AppError> {
        let value = value.into();
        let valid = !value.is_empty()
            && !value.starts_with('-')
            && !value.ends_with('-')
            && value
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

        if valid {
            Ok(Self(value))
        } else {
            Err(AppError::InvalidName(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AppName {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AppName> for String {
    fn from(name: AppName) -> Self {
        name.0
    }
}

/// Remote repository an app is deployed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionControl {
    url: Url,
    token: Option<String>,
}

impl VersionControl {
    pub fn new(url: Url) -> Self {
        Self { url, token: None }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_prefixes_are_closed() {
        let prefixes: Vec<_> = Environment::ALL.iter().map(|e| e.column_prefix()).collect();
        assert_eq!(prefixes, vec!["production", "staging"]);
    }

    #[test]
    fn test_environment_parse() {
        assert_eq!("staging".parse::<Environment>().unwrap(), Environment::Staging);
        assert!("production; DROP TABLE apps".parse::<Environment>().is_err());
    }

    #[test]
    fn test_app_name_validation() {
        assert!(AppName::parse("my-app-2").is_ok());
        for invalid in ["", "My-App", "-app", "app-", "app_name", "app name"] {
            assert_eq!(
                AppName::parse(invalid),
                Err(AppError::InvalidName(invalid.to_string())),
                "{invalid:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_consolidate_keeps_version_on_same_target() {
        let target = TargetId::new();
        let previous = EnvironmentConfig::from_parts(target, DateTime::<Utc>::MIN_UTC, None);

        let same_target = EnvironmentConfig::new(target).consolidate(&previous);
        assert_eq!(same_target.version(), previous.version());

        let moved = EnvironmentConfig::new(TargetId::new()).consolidate(&previous);
        assert_ne!(moved.version(), previous.version());
    }

    #[test]
    fn test_same_values_ignores_version() {
        let target = TargetId::new();
        let a = EnvironmentConfig::from_parts(target, DateTime::<Utc>::MIN_UTC, None);
        let b = EnvironmentConfig::new(target);
        assert!(a.has_same_values(&b));

        let mut vars = EnvVars::new();
        vars.entry("app".into())
            .or_default()
            .insert("DEBUG".into(), "1".into());
        assert!(!a.has_same_values(&b.with_vars(vars)));
    }
}
