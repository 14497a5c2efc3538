//! Workload and microservice definition lookup.
//!
//! Definitions are immutable per `(url, org, version, arch)`. Callers may
//! ask for a specific version (then exactly one record must exist) or for
//! a range, in which case the highest in-range version wins. Microservice
//! definitions are not queryable by range on the Exchange side, so range
//! filtering happens here.

use tracing::debug;

use moorline_core::{CoreError, Version, VersionRange, is_range_str};

use super::client::{ExchangeError, HttpExchangeClient, NodeAuth};
use super::wire::{ApiSpec, MicroserviceDefinition, WorkloadDefinition};

/// The version filter to send to the Exchange: a specific version is passed
/// through, a range (or empty input) searches all versions for local
/// filtering. Anything else is a caller error.
fn search_version(version: &str) -> Result<Option<String>, ExchangeError> {
    if version.is_empty() || is_range_str(version) {
        return Ok(None);
    }
    Version::parse(version).map_err(CoreError::from)?;
    Ok(Some(version.to_string()))
}

/// The record with the highest in-range version. A stored definition with an
/// unparseable version is an application error.
fn pick_highest<T>(
    records: Vec<T>,
    range: &VersionRange,
    version_of: impl Fn(&T) -> &str,
) -> Result<Option<T>, ExchangeError> {
    let mut best: Option<(Version, T)> = None;
    for record in records {
        let version = Version::parse(version_of(&record)).map_err(CoreError::from)?;
        if !range.contains(&version) {
            continue;
        }
        match &best {
            Some((current, _)) if *current >= version => {}
            _ => best = Some((version, record)),
        }
    }
    Ok(best.map(|(_, record)| record))
}

impl HttpExchangeClient {
    /// Look up a workload definition.
    ///
    /// With a specific `version`, exactly one record must match. With a
    /// range (or empty string), the highest in-range record is returned,
    /// `None` when nothing matches.
    pub fn get_workload(
        &self,
        auth: &NodeAuth,
        org: &str,
        workload_url: &str,
        version: &str,
        arch: &str,
    ) -> Result<Option<WorkloadDefinition>, ExchangeError> {
        debug!(%org, %workload_url, %version, %arch, "getting workload definition");
        let search = search_version(version)?;
        let mut records =
            self.get_workloads(auth, org, workload_url, arch, search.as_deref())?;
        if search.is_some() {
            if records.len() != 1 {
                return Err(ExchangeError::WrongCount {
                    what: "workload",
                    query: format!("{org}/{workload_url} {version} {arch}"),
                    got: records.len(),
                });
            }
            return Ok(records.pop());
        }
        let range = VersionRange::parse(version).map_err(CoreError::from)?;
        pick_highest(records, &range, |w| &w.version)
    }

    /// Look up a microservice definition; same version semantics as
    /// [`Self::get_workload`].
    pub fn get_microservice(
        &self,
        auth: &NodeAuth,
        org: &str,
        spec_ref: &str,
        version: &str,
        arch: &str,
    ) -> Result<Option<MicroserviceDefinition>, ExchangeError> {
        debug!(%org, %spec_ref, %version, %arch, "getting microservice definition");
        let search = search_version(version)?;
        let mut records =
            self.get_microservices(auth, org, spec_ref, arch, search.as_deref())?;
        if search.is_some() {
            if records.len() != 1 {
                return Err(ExchangeError::WrongCount {
                    what: "microservice",
                    query: format!("{org}/{spec_ref} {version} {arch}"),
                    got: records.len(),
                });
            }
            return Ok(records.pop());
        }
        let range = VersionRange::parse(version).map_err(CoreError::from)?;
        pick_highest(records, &range, |m| &m.version)
    }

    /// Verify that a workload and all of its declared `apiSpec` dependencies
    /// exist on the Exchange, and return the dependency list for policy
    /// checks.
    pub fn resolve_workload(
        &self,
        auth: &NodeAuth,
        org: &str,
        workload_url: &str,
        version: &str,
        arch: &str,
    ) -> Result<Vec<ApiSpec>, ExchangeError> {
        debug!(%org, %workload_url, %version, %arch, "resolving workload");
        let workload = self
            .get_workload(auth, org, workload_url, version, arch)?
            .ok_or_else(|| ExchangeError::WrongCount {
                what: "workload",
                query: format!("{org}/{workload_url} {version} {arch}"),
                got: 0,
            })?;
        if workload.workloads.len() != 1 {
            return Err(ExchangeError::WrongCount {
                what: "deployment in the workloads array",
                query: format!("{org}/{workload_url} {} {arch}", workload.version),
                got: workload.workloads.len(),
            });
        }

        // Dependencies name a sub-range; widen bare versions so the search
        // below accepts anything the declaration allows.
        for spec in &workload.api_specs {
            let range = VersionRange::parse(&spec.version).map_err(CoreError::from)?;
            let found = self.get_microservice(
                auth,
                &spec.org,
                &spec.spec_ref,
                &range.to_string(),
                &spec.arch,
            )?;
            if found.is_none() {
                return Err(ExchangeError::UnresolvedDependency {
                    spec_ref: spec.spec_ref.clone(),
                    org: spec.org.clone(),
                    range: range.to_string(),
                });
            }
        }
        debug!(%org, %workload_url, "resolved workload");
        Ok(workload.api_specs)
    }
}
