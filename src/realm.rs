use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RespectfulError, Result};

/// Longest accepted window, 100 years in seconds. Keeps window expiries
/// representable as a clock instant and as a Redis `PEXPIRE` argument.
pub const MAX_TIMESPAN: u64 = 100 * 365 * 24 * 60 * 60;

/// A named rate-limit domain: at most `max_requests` actions per `timespan` seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Realm {
    pub name: String,
    pub max_requests: u64,
    pub timespan: u64,
    pub safety_threshold: u64,
}

impl Realm {
    /// Build a realm, rejecting limits that could never admit anything
    pub fn new(
        name: impl Into<String>,
        max_requests: u64,
        timespan: u64,
        safety_threshold: u64,
    ) -> Result<Self> {
        let realm = Self {
            name: name.into(),
            max_requests,
            timespan,
            safety_threshold,
        };
        realm.validate()?;
        Ok(realm)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RespectfulError::Validation(
                "realm name must not be empty".to_string(),
            ));
        }
        validate_limits(&self.name, self.max_requests, self.timespan, self.safety_threshold)
    }

    /// Highest usage count that is still admitted within one window
    pub fn admission_limit(&self) -> u64 {
        self.max_requests.saturating_sub(self.safety_threshold)
    }

    /// Window length
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.timespan)
    }
}

pub(crate) fn validate_limits(
    name: &str,
    max_requests: u64,
    timespan: u64,
    safety_threshold: u64,
) -> Result<()> {
    if max_requests == 0 {
        return Err(RespectfulError::Validation(format!(
            "realm '{}': max_requests must be positive",
            name
        )));
    }
    if timespan == 0 {
        return Err(RespectfulError::Validation(format!(
            "realm '{}': timespan must be positive",
            name
        )));
    }
    if timespan > MAX_TIMESPAN {
        return Err(RespectfulError::Validation(format!(
            "realm '{}': timespan ({}) must not exceed {} seconds",
            name, timespan, MAX_TIMESPAN
        )));
    }
    if safety_threshold >= max_requests {
        return Err(RespectfulError::Validation(format!(
            "realm '{}': safety_threshold ({}) must be lower than max_requests ({})",
            name, safety_threshold, max_requests
        )));
    }
    Ok(())
}

/// One entry of a batch registration, as read from code or a YAML file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmSpec {
    pub name: String,
    pub max_requests: u64,
    pub timespan: u64,
    /// Falls back to the process-wide default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safety_threshold: Option<u64>,
}

impl RealmSpec {
    pub fn new(name: impl Into<String>, max_requests: u64, timespan: u64) -> Self {
        Self {
            name: name.into(),
            max_requests,
            timespan,
            safety_threshold: None,
        }
    }

    pub fn with_safety_threshold(mut self, safety_threshold: u64) -> Self {
        self.safety_threshold = Some(safety_threshold);
        self
    }

    pub(crate) fn into_realm(self, default_safety_threshold: u64) -> Result<Realm> {
        let threshold = self.safety_threshold.unwrap_or(default_safety_threshold);
        Realm::new(self.name, self.max_requests, self.timespan, threshold)
    }
}

impl<S: Into<String>> From<(S, u64, u64)> for RealmSpec {
    fn from((name, max_requests, timespan): (S, u64, u64)) -> Self {
        RealmSpec::new(name, max_requests, timespan)
    }
}

/// Parse a batch of realm definitions from YAML
pub fn load_realm_specs_from_yaml(yaml: &str) -> Result<Vec<RealmSpec>> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Parse a batch of realm definitions from a YAML file
pub fn load_realm_specs_from_file(path: &str) -> Result<Vec<RealmSpec>> {
    let content = std::fs::read_to_string(path)?;
    load_realm_specs_from_yaml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_limit_subtracts_threshold() {
        let realm = Realm::new("A", 11, 300, 10).unwrap();
        assert_eq!(realm.admission_limit(), 1);
        assert_eq!(realm.window(), Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_limits_are_rejected() {
        assert!(matches!(Realm::new("A", 0, 5, 0), Err(RespectfulError::Validation(_))));
        assert!(matches!(Realm::new("A", 5, 0, 0), Err(RespectfulError::Validation(_))));
        assert!(matches!(Realm::new("A", 5, 5, 5), Err(RespectfulError::Validation(_))));
        assert!(matches!(Realm::new("", 5, 5, 0), Err(RespectfulError::Validation(_))));
    }

    #[test]
    fn test_timespan_upper_bound() {
        assert!(Realm::new("A", 5, MAX_TIMESPAN, 0).is_ok());
        assert!(matches!(
            Realm::new("A", 5, MAX_TIMESPAN + 1, 0),
            Err(RespectfulError::Validation(_))
        ));
        assert!(matches!(Realm::new("A", 5, u64::MAX, 0), Err(RespectfulError::Validation(_))));
    }

    #[test]
    fn test_spec_uses_default_threshold_unless_overridden() {
        let realm = RealmSpec::from(("A", 10, 1)).into_realm(2).unwrap();
        assert_eq!(realm.safety_threshold, 2);

        let realm = RealmSpec::new("A", 10, 1)
            .with_safety_threshold(0)
            .into_realm(2)
            .unwrap();
        assert_eq!(realm.safety_threshold, 0);
    }

    #[test]
    fn test_load_realm_specs_from_yaml() {
        let yaml = r#"
- name: api.example.com
  max_requests: 100
  timespan: 60
- name: search
  max_requests: 10
  timespan: 1
  safety_threshold: 2
"#;

        let specs = load_realm_specs_from_yaml(yaml).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0], RealmSpec::new("api.example.com", 100, 60));
        assert_eq!(specs[1].safety_threshold, Some(2));
    }
}
