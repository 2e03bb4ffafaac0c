//! Instance connection names: `project:region:instance`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A parsed, immutable instance connection name.
///
/// Case is preserved; fields are never normalized, since the control plane
/// treats project/region/instance identifiers as case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceName {
    project_id: String,
    region_id: String,
    instance_id: String,
    raw: String,
}

/// Errors produced while parsing an instance connection name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstanceNameError {
    #[error(
        "malformed instance connection name '{raw}': expected exactly 3 colon-delimited fields (project:region:instance), found {found}"
    )]
    WrongFieldCount { raw: String, found: usize },
}

impl InstanceName {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn region_id(&self) -> &str {
        &self.region_id
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The original `project:region:instance` string this was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for InstanceName {
    type Err = InstanceNameError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 3 {
            return Err(InstanceNameError::WrongFieldCount {
                raw: raw.to_string(),
                found: parts.len(),
            });
        }

        Ok(InstanceName {
            project_id: parts[0].to_string(),
            region_id: parts[1].to_string(),
            instance_id: parts[2].to_string(),
            raw: raw.to_string(),
        })
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<&str> for InstanceName {
    type Error = InstanceNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<String> for InstanceName {
    type Error = InstanceNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_name() {
        let name: InstanceName = "my-project:us-east1:my-instance".parse().unwrap();
        assert_eq!(name.project_id(), "my-project");
        assert_eq!(name.region_id(), "us-east1");
        assert_eq!(name.instance_id(), "my-instance");
        assert_eq!(name.as_str(), "my-project:us-east1:my-instance");
    }

    #[test]
    fn preserves_case() {
        let name: InstanceName = "MyProject:US-East1:MyInstance".parse().unwrap();
        assert_eq!(name.project_id(), "MyProject");
        assert_eq!(name.region_id(), "US-East1");
    }

    #[test]
    fn rejects_zero_fields() {
        let err = "".parse::<InstanceName>().unwrap_err();
        assert!(matches!(err, InstanceNameError::WrongFieldCount { found: 1, .. }));
    }

    #[test]
    fn rejects_one_field() {
        let err = "p".parse::<InstanceName>().unwrap_err();
        assert!(matches!(err, InstanceNameError::WrongFieldCount { found: 1, .. }));
    }

    #[test]
    fn rejects_two_fields() {
        let err = "p:r".parse::<InstanceName>().unwrap_err();
        assert!(matches!(err, InstanceNameError::WrongFieldCount { found: 2, .. }));
    }

    #[test]
    fn rejects_four_fields() {
        let err = "p:r:i:extra".parse::<InstanceName>().unwrap_err();
        assert!(matches!(err, InstanceNameError::WrongFieldCount { found: 4, .. }));
    }

    #[test]
    fn display_round_trips_raw_string() {
        let name: InstanceName = "p:r:i".parse().unwrap();
        assert_eq!(name.to_string(), "p:r:i");
    }
}
