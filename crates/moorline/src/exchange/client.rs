//! Blocking HTTP client for the Exchange.
//!
//! One private request primitive owns the transport concerns: headers,
//! Basic credentials, the method/status matrix, transport-vs-application
//! error classification, and the retry policy. Everything public is a typed
//! operation with its own decoded return type.

use std::thread;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, trace, warn};

use moorline_core::{NodeIdentity, Transience};

use crate::config::HttpConfig;

use super::wire::{
    ChangesPage, ChangesRequest, GetBlockchainsResponse, GetMicroservicesResponse,
    GetNodesResponse, GetOrganizationResponse, GetWorkloadsResponse, MaxChangeIdResponse,
    MicroserviceDefinition, NodeRecord, Organization, PostHeartbeatResponse, WorkloadDefinition,
};

/// Node credentials: the `org/id` identity plus its Exchange token.
#[derive(Clone, Debug)]
pub struct NodeAuth {
    pub identity: NodeIdentity,
    pub token: String,
}

impl NodeAuth {
    pub fn new(identity: NodeIdentity, token: impl Into<String>) -> Self {
        Self {
            identity,
            token: token.into(),
        }
    }

    fn user(&self) -> String {
        self.identity.to_string()
    }
}

/// How many times a transport failure is retried, and how long to sleep
/// between attempts. `attempts: None` retries until the call succeeds or
/// fails with an application error.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    attempts: Option<u32>,
    interval: Duration,
}

impl RetryPolicy {
    pub fn limited(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: Some(attempts),
            interval,
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self {
            attempts: None,
            interval,
        }
    }

    /// The short policy the change worker runs with: transport failures
    /// surface quickly and the tick loop itself retries.
    pub fn worker() -> Self {
        Self::limited(2, Duration::from_secs(3))
    }

    fn allows(&self, attempt: u32) -> bool {
        match self.attempts {
            None => true,
            Some(n) => attempt < n,
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExchangeError {
    /// Connection-level failure, or a 5xx the Exchange marks as a timeout.
    /// Retrying may help.
    #[error("transport failure for {method} {url}: {reason}")]
    Transport {
        method: &'static str,
        url: String,
        reason: String,
    },

    /// The Exchange no longer recognizes the node's credentials; the node
    /// entry is gone. Never retried.
    #[error("credentials rejected (status 401) for {url}")]
    AuthDead { url: String },

    #[error("unexpected status {status} for {method} {url}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("{what} `{key}` not found")]
    NotFound { what: &'static str, key: String },

    #[error("expected exactly one {what} for {query}, got {got}")]
    WrongCount {
        what: &'static str,
        query: String,
        got: usize,
    },

    #[error("unable to find microservice {spec_ref} ({org}) within {range}")]
    UnresolvedDependency {
        spec_ref: String,
        org: String,
        range: String,
    },

    /// The Exchange acknowledged the request but refused it.
    #[error("exchange refused the request: {msg}")]
    Refused { msg: String },

    #[error(transparent)]
    Core(#[from] moorline_core::CoreError),

    /// A broken internal invariant, surfaced with a diagnostic instead of a
    /// panic.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl ExchangeError {
    pub fn transience(&self) -> Transience {
        match self {
            ExchangeError::Transport { .. } => Transience::Retryable,
            _ => Transience::Permanent,
        }
    }

    pub fn is_auth_dead(&self) -> bool {
        matches!(self, ExchangeError::AuthDead { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Method {
    Get,
    Put,
    Post,
    Patch,
    Delete,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    fn accepts(self, status: u16) -> bool {
        match self {
            Method::Get => status == 200,
            Method::Put | Method::Post | Method::Patch => status == 201,
            Method::Delete => status == 204,
        }
    }
}

/// Typed client for one Exchange base URL.
pub struct HttpExchangeClient {
    agent: ureq::Agent,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpExchangeClient {
    /// `base_url` is normalized to end with `/` so relative paths append
    /// directly.
    pub fn new(base_url: &str, http: &HttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(http.connect_timeout_secs))
            .timeout_read(Duration::from_secs(http.read_timeout_secs))
            .build();
        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        Self {
            agent,
            base_url,
            retry: RetryPolicy::limited(
                http.retry_count,
                Duration::from_secs(http.retry_interval_secs),
            ),
        }
    }

    /// Replace the default retry policy for subsequent calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// The single entry point every typed operation funnels through.
    ///
    /// `Ok(None)` means "no content": a 404 on GET, or a 204 on DELETE.
    fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        auth: Option<&NodeAuth>,
        body: Option<&str>,
        retry: &RetryPolicy,
    ) -> Result<Option<T>, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt: u32 = 0;
        loop {
            trace!(method = method.as_str(), %url, attempt, "invoking exchange");
            let mut request = self.agent.request(method.as_str(), &url);
            request = request.set("Accept", "application/json");
            if let Some(auth) = auth
                && !auth.user().is_empty()
                && !auth.token.is_empty()
            {
                let encoded = BASE64.encode(format!("{}:{}", auth.user(), auth.token));
                request = request.set("Authorization", &format!("Basic {encoded}"));
            }
            let outcome = match body {
                Some(json) => request
                    .set("Content-Type", "application/json")
                    .send_string(json),
                None => request.call(),
            };

            let transport_reason = match outcome {
                Ok(response) => return decode_response(method, &url, response),
                Err(ureq::Error::Status(status, response)) => {
                    let text = response.into_string().unwrap_or_default();
                    // The Exchange reports its own upstream timeouts as 500s;
                    // those are worth retrying like any other outage.
                    if status == 500 && text.contains("timed out") {
                        format!("status 500: {text}")
                    } else if status == 401 {
                        return Err(ExchangeError::AuthDead { url });
                    } else if status == 404 && method == Method::Get {
                        return Ok(None);
                    } else {
                        return Err(ExchangeError::Status {
                            method: method.as_str(),
                            url,
                            status,
                            body: text,
                        });
                    }
                }
                Err(ureq::Error::Transport(transport)) => transport.to_string(),
            };

            if retry.allows(attempt) {
                attempt += 1;
                warn!(
                    method = method.as_str(),
                    %url,
                    attempt,
                    reason = %transport_reason,
                    "transport failure, retrying"
                );
                thread::sleep(retry.interval);
                continue;
            }
            return Err(ExchangeError::Transport {
                method: method.as_str(),
                url,
                reason: transport_reason,
            });
        }
    }

    // --- typed operations --------------------------------------------------

    /// Metadata for one organization.
    pub fn get_organization(
        &self,
        auth: &NodeAuth,
        org: &str,
    ) -> Result<Organization, ExchangeError> {
        debug!(%org, "getting organization definition");
        let path = format!("orgs/{org}");
        let response: Option<GetOrganizationResponse> =
            self.call(Method::Get, &path, Some(auth), None, &self.retry)?;
        response
            .and_then(|mut r| r.orgs.remove(org))
            .ok_or_else(|| ExchangeError::NotFound {
                what: "organization",
                key: org.to_string(),
            })
    }

    /// Workload search by URL and architecture, optionally filtered to one
    /// version. An absent org or empty result set is an empty vector.
    pub fn get_workloads(
        &self,
        auth: &NodeAuth,
        org: &str,
        workload_url: &str,
        arch: &str,
        version: Option<&str>,
    ) -> Result<Vec<WorkloadDefinition>, ExchangeError> {
        let path = match version {
            Some(v) => {
                format!("orgs/{org}/workloads?workloadUrl={workload_url}&version={v}&arch={arch}")
            }
            None => format!("orgs/{org}/workloads?workloadUrl={workload_url}&arch={arch}"),
        };
        let response: Option<GetWorkloadsResponse> =
            self.call(Method::Get, &path, Some(auth), None, &self.retry)?;
        Ok(response
            .map(|r| r.workloads.into_values().collect())
            .unwrap_or_default())
    }

    /// Microservice search by spec reference and architecture.
    pub fn get_microservices(
        &self,
        auth: &NodeAuth,
        org: &str,
        spec_ref: &str,
        arch: &str,
        version: Option<&str>,
    ) -> Result<Vec<MicroserviceDefinition>, ExchangeError> {
        let path = match version {
            Some(v) => {
                format!("orgs/{org}/microservices?specRef={spec_ref}&version={v}&arch={arch}")
            }
            None => format!("orgs/{org}/microservices?specRef={spec_ref}&arch={arch}"),
        };
        let response: Option<GetMicroservicesResponse> =
            self.call(Method::Get, &path, Some(auth), None, &self.retry)?;
        Ok(response
            .map(|r| r.microservices.into_values().collect())
            .unwrap_or_default())
    }

    /// Blockchain client metadata. The `details` payload is opaque to the
    /// agent and returned verbatim.
    pub fn get_blockchain_client(
        &self,
        auth: &NodeAuth,
        org: &str,
        name: &str,
        chain_type: &str,
    ) -> Result<String, ExchangeError> {
        debug!(%org, %name, %chain_type, "getting blockchain client metadata");
        let path = format!("orgs/{org}/bctypes/{chain_type}/blockchains/{name}");
        let response: Option<GetBlockchainsResponse> =
            self.call(Method::Get, &path, Some(auth), None, &self.retry)?;
        response
            .and_then(|mut r| r.blockchains.remove(name))
            .map(|def| def.details)
            .ok_or_else(|| ExchangeError::NotFound {
                what: "blockchain",
                key: format!("{org}/{name}"),
            })
    }

    /// The node's own Exchange record, or `None` when the entry is absent.
    pub fn get_node(
        &self,
        auth: &NodeAuth,
        node: &NodeIdentity,
    ) -> Result<Option<NodeRecord>, ExchangeError> {
        let path = format!("orgs/{}/nodes/{}", node.org, node.id);
        let response: Option<GetNodesResponse> =
            self.call(Method::Get, &path, Some(auth), None, &self.retry)?;
        Ok(response.and_then(|mut r| {
            r.nodes
                .remove(&node.to_string())
                .or_else(|| r.nodes.remove(&node.id))
        }))
    }

    /// Liveness signal from node to Exchange.
    pub fn post_heartbeat(
        &self,
        auth: &NodeAuth,
        node: &NodeIdentity,
    ) -> Result<(), ExchangeError> {
        let path = format!("orgs/{}/nodes/{}/heartbeat", node.org, node.id);
        let url = format!("{}{}", self.base_url, path);
        let response: Option<PostHeartbeatResponse> =
            self.call(Method::Post, &path, Some(auth), None, &self.retry)?;
        let response = response.ok_or(ExchangeError::Internal {
            reason: format!("heartbeat response missing for {url}"),
        })?;
        if response.code == "ok" {
            Ok(())
        } else {
            Err(ExchangeError::Refused { msg: response.msg })
        }
    }

    /// One page of the change feed starting at `change_id`.
    pub fn fetch_changes(
        &self,
        auth: &NodeAuth,
        org: &str,
        change_id: u64,
        max_records: u32,
        retry: &RetryPolicy,
    ) -> Result<ChangesPage, ExchangeError> {
        let path = format!("orgs/{org}/changes");
        let body = encode_body(&ChangesRequest {
            change_id,
            max_records,
        })?;
        let response: Option<ChangesPage> =
            self.call(Method::Post, &path, Some(auth), Some(&body), retry)?;
        response.ok_or(ExchangeError::Internal {
            reason: format!("changes response missing for orgs/{org}/changes"),
        })
    }

    /// The Exchange's current global maximum change id.
    pub fn max_change_id(
        &self,
        auth: &NodeAuth,
        org: &str,
        retry: &RetryPolicy,
    ) -> Result<u64, ExchangeError> {
        let path = format!("orgs/{org}/changes/maxchangeid");
        let response: Option<MaxChangeIdResponse> =
            self.call(Method::Get, &path, Some(auth), None, retry)?;
        response
            .map(|r| r.max_change_id)
            .ok_or(ExchangeError::NotFound {
                what: "organization",
                key: org.to_string(),
            })
    }
}

fn decode_response<T: DeserializeOwned>(
    method: Method,
    url: &str,
    response: ureq::Response,
) -> Result<Option<T>, ExchangeError> {
    let status = response.status();
    if !method.accepts(status) {
        let body = response.into_string().unwrap_or_default();
        return Err(ExchangeError::Status {
            method: method.as_str(),
            url: url.to_string(),
            status,
            body,
        });
    }
    if method == Method::Delete {
        return Ok(None);
    }
    let text = response.into_string().map_err(|e| ExchangeError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| ExchangeError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
}

fn encode_body<T: serde::Serialize>(value: &T) -> Result<String, ExchangeError> {
    serde_json::to_string(value).map_err(|e| ExchangeError::Internal {
        reason: format!("request body failed to serialize: {e}"),
    })
}
