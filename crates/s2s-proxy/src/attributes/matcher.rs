//! Identity matching on a single attribute.

use serde::Deserialize;

use super::{AttributeSet, UserRecord};

/// Matches a user when any inbound value of `idp_attribute` is among the
/// user's values of `backing_attribute`. Comparison is case-sensitive and a
/// missing attribute on either side never matches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SingleAttributeMatcher {
    /// Attribute name in the upstream assertion.
    pub idp_attribute: String,
    /// Attribute name in the local user record.
    pub backing_attribute: String,
}

impl SingleAttributeMatcher {
    /// Creates a matcher.
    #[must_use]
    pub fn new(idp_attribute: impl Into<String>, backing_attribute: impl Into<String>) -> Self {
        Self {
            idp_attribute: idp_attribute.into(),
            backing_attribute: backing_attribute.into(),
        }
    }

    /// Whether `user` matches `inbound`.
    #[must_use]
    pub fn matches(&self, user: &UserRecord, inbound: &AttributeSet) -> bool {
        let (Some(inbound_values), Some(backing_values)) = (
            inbound.get(&self.idp_attribute),
            user.get(&self.backing_attribute),
        ) else {
            return false;
        };
        inbound_values.iter().any(|v| backing_values.contains(v))
    }
}
