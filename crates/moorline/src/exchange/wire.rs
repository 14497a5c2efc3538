//! Serde types for the Exchange HTTP API.
//!
//! Only the fields the agent reads are modeled; the Exchange is free to add
//! more. Containers default missing fields so older Exchanges stay
//! decodable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use moorline_core::ChangeRecord;

// --- change feed -----------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesRequest {
    pub change_id: u64,
    pub max_records: u32,
}

/// One page of the change feed, starting at the requested cursor.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChangesPage {
    pub changes: Vec<ChangeRecord>,
    /// Highest change id the Exchange knows about; `0` when the feed is
    /// empty.
    pub most_recent_change_id: u64,
    pub exchange_version: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MaxChangeIdResponse {
    pub max_change_id: u64,
}

// --- nodes -----------------------------------------------------------------

/// Poll bounds a node may store on its own Exchange record. Zero fields mean
/// "no override".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeartbeatIntervals {
    pub min_interval: u64,
    pub max_interval: u64,
    pub interval_adjustment: u64,
}

impl HeartbeatIntervals {
    pub fn is_empty(&self) -> bool {
        self.min_interval == 0 && self.max_interval == 0 && self.interval_adjustment == 0
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeRecord {
    pub name: String,
    pub owner: String,
    pub msg_end_point: String,
    pub last_heartbeat: String,
    pub heartbeat_intervals: HeartbeatIntervals,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetNodesResponse {
    pub nodes: BTreeMap<String, NodeRecord>,
    pub last_index: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostHeartbeatResponse {
    pub code: String,
    pub msg: String,
}

// --- organizations ---------------------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Organization {
    pub label: String,
    pub description: String,
    pub last_updated: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetOrganizationResponse {
    pub orgs: BTreeMap<String, Organization>,
    pub last_index: u64,
}

// --- workloads and microservices -------------------------------------------

/// A dependency a workload declares on a microservice, by spec reference,
/// organization, version range, and architecture.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiSpec {
    pub spec_ref: String,
    pub org: String,
    pub version: String,
    pub arch: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserInput {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub default_value: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadDeployment {
    pub deployment: String,
    pub deployment_signature: String,
    pub torrent: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkloadDefinition {
    pub owner: String,
    pub label: String,
    pub description: String,
    pub workload_url: String,
    pub version: String,
    pub arch: String,
    pub download_url: String,
    #[serde(rename = "apiSpec")]
    pub api_specs: Vec<ApiSpec>,
    #[serde(rename = "userInput")]
    pub user_inputs: Vec<UserInput>,
    pub workloads: Vec<WorkloadDeployment>,
    pub last_updated: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetWorkloadsResponse {
    pub workloads: BTreeMap<String, WorkloadDefinition>,
    pub last_index: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HardwareMatch {
    pub usb_device_ids: String,
    pub dev_files: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MicroserviceDefinition {
    pub owner: String,
    pub label: String,
    pub description: String,
    pub spec_ref: String,
    pub version: String,
    pub arch: String,
    pub sharable: String,
    pub download_url: String,
    pub match_hardware: HardwareMatch,
    #[serde(rename = "userInput")]
    pub user_inputs: Vec<UserInput>,
    pub workloads: Vec<WorkloadDeployment>,
    pub last_updated: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetMicroservicesResponse {
    pub microservices: BTreeMap<String, MicroserviceDefinition>,
    pub last_index: u64,
}

// --- blockchain clients ----------------------------------------------------

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlockchainDef {
    pub description: String,
    pub defined_by: String,
    /// Opaque client metadata; the agent hands it over verbatim.
    pub details: String,
    pub last_updated: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetBlockchainsResponse {
    pub blockchains: BTreeMap<String, BlockchainDef>,
    pub last_index: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changes_page_decodes_wire_names() {
        let json = r#"{
            "changes": [
                {"resource":"service","orgID":"acme","id":"svc","operation":"created","changeID":7}
            ],
            "mostRecentChangeId": 7,
            "exchangeVersion": "2.4.0"
        }"#;
        let page: ChangesPage = serde_json::from_str(json).expect("decode");
        assert_eq!(page.changes.len(), 1);
        assert_eq!(page.most_recent_change_id, 7);
        assert_eq!(page.exchange_version, "2.4.0");
    }

    #[test]
    fn changes_request_encodes_wire_names() {
        let body = serde_json::to_string(&ChangesRequest {
            change_id: 100,
            max_records: 1000,
        })
        .expect("encode");
        assert_eq!(body, r#"{"changeId":100,"maxRecords":1000}"#);
    }

    #[test]
    fn workload_decodes_api_spec_dependencies() {
        let json = r#"{
            "owner": "acme/admin",
            "workloadUrl": "https://workloads.example.com/gps",
            "version": "1.2.0",
            "arch": "amd64",
            "apiSpec": [
                {"specRef":"https://ms.example.com/gps","org":"acme","version":"[1.0.0,2.0.0)","arch":"amd64"}
            ],
            "workloads": [{"deployment":"{}","deployment_signature":"sig","torrent":""}]
        }"#;
        let def: WorkloadDefinition = serde_json::from_str(json).expect("decode");
        assert_eq!(def.api_specs.len(), 1);
        assert_eq!(def.api_specs[0].spec_ref, "https://ms.example.com/gps");
        assert_eq!(def.workloads.len(), 1);
    }

    #[test]
    fn node_record_defaults_missing_intervals() {
        let json = r#"{"name":"n1","owner":"acme/admin"}"#;
        let node: NodeRecord = serde_json::from_str(json).expect("decode");
        assert!(node.heartbeat_intervals.is_empty());
    }
}
