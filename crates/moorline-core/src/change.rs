//! Exchange change-feed records and their classification.
//!
//! The feed is a totally ordered stream of `{resource, orgID, id, operation,
//! changeID}` records. The agent recognizes five resource kinds; everything
//! else still advances the cursor but fires no event.

use serde::{Deserialize, Serialize};

use crate::identity::NodeIdentity;

pub const RESOURCE_MESSAGE: &str = "message";
pub const RESOURCE_NODE: &str = "node";
pub const RESOURCE_NODE_POLICY: &str = "nodePolicy";
pub const RESOURCE_NODE_ERROR: &str = "nodeError";
pub const RESOURCE_SERVICE: &str = "service";

/// The change kinds the agent reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    Message,
    Node,
    NodePolicy,
    NodeError,
    Service,
}

impl ChangeKind {
    /// Stable dispatch order for change events within one tick.
    pub const ALL: [ChangeKind; 5] = [
        ChangeKind::Message,
        ChangeKind::Node,
        ChangeKind::NodePolicy,
        ChangeKind::NodeError,
        ChangeKind::Service,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Message => RESOURCE_MESSAGE,
            ChangeKind::Node => RESOURCE_NODE,
            ChangeKind::NodePolicy => RESOURCE_NODE_POLICY,
            ChangeKind::NodeError => RESOURCE_NODE_ERROR,
            ChangeKind::Service => RESOURCE_SERVICE,
        }
    }
}

/// One entry of the Exchange change feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub resource: String,
    #[serde(rename = "orgID")]
    pub org_id: String,
    pub id: String,
    #[serde(default)]
    pub operation: String,
    #[serde(rename = "changeID")]
    pub change_id: u64,
}

impl ChangeRecord {
    fn is_own(&self, node: &NodeIdentity) -> bool {
        self.id == node.id && self.org_id == node.org
    }

    pub fn is_message(&self, node: &NodeIdentity) -> bool {
        self.resource == RESOURCE_MESSAGE && self.is_own(node)
    }

    pub fn is_node(&self, node: &NodeIdentity) -> bool {
        self.resource == RESOURCE_NODE && self.is_own(node)
    }

    pub fn is_node_policy(&self, node: &NodeIdentity) -> bool {
        self.resource == RESOURCE_NODE_POLICY && self.is_own(node)
    }

    pub fn is_node_error(&self, node: &NodeIdentity) -> bool {
        self.resource == RESOURCE_NODE_ERROR && self.is_own(node)
    }

    /// Service changes are interesting regardless of org and id.
    pub fn is_service(&self) -> bool {
        self.resource == RESOURCE_SERVICE
    }

    /// Classify this record against the local node. `None` means the record
    /// is uninteresting (but still advances the cursor).
    pub fn classify(&self, node: &NodeIdentity) -> Option<ChangeKind> {
        if self.is_message(node) {
            Some(ChangeKind::Message)
        } else if self.is_node(node) {
            Some(ChangeKind::Node)
        } else if self.is_node_policy(node) {
            Some(ChangeKind::NodePolicy)
        } else if self.is_node_error(node) {
            Some(ChangeKind::NodeError)
        } else if self.is_service() {
            Some(ChangeKind::Service)
        } else {
            None
        }
    }
}
