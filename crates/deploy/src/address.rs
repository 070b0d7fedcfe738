//! Address resolver: endpoint status → externally reachable address.

use tether_core::{EndpointStatus, Error};
use tether_flow::Deferred;

/// Derive the component's address from the endpoint's eventual status.
///
/// When allocation was not requested the result is an already-resolved empty
/// string with no dependency on the endpoint at all. Otherwise the first
/// ingress entry yields `ip` if non-empty, else `hostname`, else the empty
/// string; an empty ingress list is a data error from the engine
/// ([`Error::AddressUnavailable`]), never silently treated as empty.
pub fn resolve(status: &Deferred<EndpointStatus>, allocate_address: bool) -> Deferred<String> {
    if !allocate_address {
        return Deferred::ready(String::new());
    }
    status.try_project(|st| {
        let entry = st.ingress.first().ok_or(Error::AddressUnavailable)?;
        Ok(entry
            .ip
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| entry.hostname.clone().filter(|s| !s.is_empty()))
            .unwrap_or_default())
    })
}
