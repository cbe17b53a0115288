//! Subscription scopes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A (facility, role filter) pair. An empty role filter matches every role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub facility_id: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl Scope {
    pub fn facility(facility_id: impl Into<String>) -> Self {
        Self {
            facility_id: facility_id.into(),
            roles: BTreeSet::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Parse a comma-separated role list, as sent in query strings
    pub fn parse_roles(raw: Option<&str>) -> BTreeSet<String> {
        raw.map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
    }

    /// Whether an event in `facility_id` targeting `roles` is visible here
    pub fn matches(&self, facility_id: &str, roles: &BTreeSet<String>) -> bool {
        self.facility_id == facility_id
            && (self.roles.is_empty() || !self.roles.is_disjoint(roles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_matches_all_roles() {
        let scope = Scope::facility("f1");
        assert!(scope.matches("f1", &roles(&["nurse"])));
        assert!(scope.matches("f1", &roles(&[])));
        assert!(!scope.matches("f2", &roles(&["nurse"])));
    }

    #[test]
    fn test_role_filter() {
        let scope = Scope::facility("f1").with_roles(["physician"]);
        assert!(!scope.matches("f1", &roles(&["nurse"])));
        assert!(scope.matches("f1", &roles(&["nurse", "physician"])));
    }

    #[test]
    fn test_parse_roles() {
        assert_eq!(
            Scope::parse_roles(Some("nurse, physician,,")),
            roles(&["nurse", "physician"])
        );
        assert!(Scope::parse_roles(None).is_empty());
    }
}
