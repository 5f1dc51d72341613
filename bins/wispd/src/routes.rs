//! The kernel route channel implementation shipped with the daemon.
//!
//! Installing routes is an external concern; this backend only logs the
//! requests and acks them immediately, which keeps the reconciliation
//! logic observable on systems where the daemon is not allowed to touch
//! the FIB. A netlink-backed implementation slots in through the same
//! trait.

use async_trait::async_trait;

use wisp_core::addr::AddrFamily;
use wisp_olsrv2::routing::{RouteBackend, RouteRequest};
use wisp_olsrv2::RouteError;

#[derive(Debug, Default)]
pub struct LogRouteBackend;

#[async_trait]
impl RouteBackend for LogRouteBackend {
    async fn set_route(&mut self, request: &RouteRequest) -> Result<(), RouteError> {
        tracing::info!(
            dst = %request.dst,
            gateway = ?request.gateway,
            if_index = request.if_index,
            metric = request.metric,
            table = request.table,
            "set route"
        );
        Ok(())
    }

    async fn delete_route(&mut self, request: &RouteRequest) -> Result<(), RouteError> {
        tracing::info!(dst = %request.dst, table = request.table, "delete route");
        Ok(())
    }

    async fn query(&mut self, _family: AddrFamily) -> Result<Vec<RouteRequest>, RouteError> {
        Ok(Vec::new())
    }
}
