//! Node identity used to classify feed entries and authenticate.
//!
//! A node is identified by the pair `(organization, id)`, rendered `org/id`
//! everywhere the Exchange sees it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InvalidIdentity;

/// The `(organization, id)` pair naming one node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub org: String,
    pub id: String,
}

impl NodeIdentity {
    pub fn new(org: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            id: id.into(),
        }
    }

    /// Parse the `org/id` rendering. The id may itself contain slashes; only
    /// the first separator splits.
    pub fn parse(raw: &str) -> Result<Self, InvalidIdentity> {
        let Some((org, id)) = raw.split_once('/') else {
            return Err(InvalidIdentity {
                raw: raw.to_string(),
                reason: "missing `/` separator".to_string(),
            });
        };
        if org.is_empty() || id.is_empty() {
            return Err(InvalidIdentity {
                raw: raw.to_string(),
                reason: "organization and id must both be non-empty".to_string(),
            });
        }
        Ok(Self::new(org, id))
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render() {
        let node = NodeIdentity::parse("acme/n1").expect("identity");
        assert_eq!(node.org, "acme");
        assert_eq!(node.id, "n1");
        assert_eq!(node.to_string(), "acme/n1");
    }

    #[test]
    fn id_may_contain_slashes() {
        let node = NodeIdentity::parse("acme/site/n1").expect("identity");
        assert_eq!(node.org, "acme");
        assert_eq!(node.id, "site/n1");
    }

    #[test]
    fn rejects_malformed() {
        assert!(NodeIdentity::parse("acme").is_err());
        assert!(NodeIdentity::parse("/n1").is_err());
        assert!(NodeIdentity::parse("acme/").is_err());
    }
}
