//! Control API: read, set and clear the target of a failover address.
//!
//! The routes mirror the hosting provider's failover web service, so
//! existing clients can talk to the daemon unchanged:
//!
//! - `GET /{ip}` returns the current state
//! - `POST /{ip}` with form field `active_server_ip` routes the address to
//!   that server
//! - `DELETE /{ip}` removes the route
//!
//! Mutations never wait for the entry lock. A request that finds the address
//! locked fails with `409 FAILOVER_LOCKED` and is expected to retry.

use crate::error::ApiError;
use crate::metrics::MetricsRegistry;
use crate::registry::{FailoverEntry, Registry, Server};
use crate::types::{FailoverBody, FailoverInfo, FailoverStatus, TargetForm};
use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Form, Json, Router};
use base64::prelude::*;
use routing::RoutingBackend;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Everything a request handler needs, built once at startup.
pub struct ControlContext {
    pub registry: Registry,
    pub routing: Arc<dyn RoutingBackend>,
    pub metrics: Option<Arc<MetricsRegistry>>,
}

impl ControlContext {
    pub fn new(
        registry: Registry,
        routing: Arc<dyn RoutingBackend>,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            registry,
            routing,
            metrics,
        }
    }

    async fn install_route(&self, failover: IpAddr, target: IpAddr) -> common::Result<()> {
        let start = Instant::now();
        let result = self.routing.install_route(failover, target).await;
        self.record_route_operation("install", result.is_ok(), start);
        result
    }

    async fn remove_route(&self, failover: IpAddr) -> common::Result<()> {
        let start = Instant::now();
        let result = self.routing.remove_route(failover).await;
        self.record_route_operation("remove", result.is_ok(), start);
        result
    }

    fn record_route_operation(&self, operation: &str, success: bool, start: Instant) {
        if let Some(ref m) = self.metrics {
            m.record_route_operation(operation, success, start.elapsed());
        }
    }

    /// Publish the number of routed addresses; call once a mutation settled.
    pub async fn refresh_routed_gauge(&self) {
        if let Some(ref m) = self.metrics {
            m.set_routed_addresses(self.registry.routed_count().await);
        }
    }
}

/// Build the control API router.
pub fn router(ctx: Arc<ControlContext>) -> Router {
    Router::new()
        .route(
            "/:ip",
            get(read_failover).post(set_target).delete(clear_target),
        )
        .layer(middleware::from_fn_with_state(ctx.clone(), track_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn track_requests(
    State(ctx): State<Arc<ControlContext>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let response = next.run(request).await;

    if let Some(ref m) = ctx.metrics {
        m.record_request(method.as_str(), response.status().as_u16());
    }

    response
}

/// Resolve the path parameter to an entry and check the caller's credentials.
///
/// Order matters: a malformed address is a 400 and an unknown one a 404, both
/// before credentials are looked at.
fn authorize<'a>(
    ctx: &'a ControlContext,
    ip: &str,
    headers: &HeaderMap,
) -> Result<&'a FailoverEntry, ApiError> {
    let address: IpAddr = ip
        .parse()
        .map_err(|_| ApiError::bad_request("No valid IP"))?;

    let entry = ctx.registry.entry(address).ok_or(ApiError::NotFound)?;

    if let Err(e) = check_credentials(entry, headers) {
        warn!(failover = %address, reason = %e, "Rejected credentials");
        return Err(e);
    }

    Ok(entry)
}

fn check_credentials(entry: &FailoverEntry, headers: &HeaderMap) -> Result<(), ApiError> {
    let value = headers
        .get(AUTHORIZATION)
        .map(|v| v.to_str().unwrap_or_default())
        .unwrap_or_default();
    if value.is_empty() {
        return Err(ApiError::unauthorized("Auth empty"));
    }

    let encoded = value
        .strip_prefix("Basic ")
        .ok_or_else(|| ApiError::unauthorized("Auth not basic"))?;

    let decoded = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|_| ApiError::unauthorized("Auth decode failed"))?;

    let expected = entry.credentials();
    if !bool::from(decoded.as_slice().ct_eq(expected.as_bytes())) {
        return Err(ApiError::unauthorized("Auth wrong"));
    }

    Ok(())
}

fn failover_info(
    entry: &FailoverEntry,
    target: Option<&Server>,
    status: FailoverStatus,
) -> FailoverInfo {
    let owner = entry.owner();

    FailoverInfo {
        ip: entry.address().to_string(),
        netmask: entry.netmask().to_string(),
        status,
        server_ip: owner.v4.to_string(),
        server_ipv6_net: owner.v6.to_string(),
        server_number: owner.id,
        active_server_ip: target.map(|server| server.address_for(entry.address()).to_string()),
    }
}

/// `GET /{ip}`
async fn read_failover(
    State(ctx): State<Arc<ControlContext>>,
    Path(ip): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FailoverBody>, ApiError> {
    let entry = authorize(&ctx, &ip, &headers)?;

    let target = entry.target().await;
    let status = if entry.is_locked() {
        FailoverStatus::Processing
    } else {
        FailoverStatus::Ready
    };

    Ok(Json(FailoverBody {
        failover: failover_info(entry, target.as_deref(), status),
    }))
}

/// Combine query string and body fields; a body value wins.
///
/// A body without a form content type counts as empty. Only a query string or
/// urlencoded body that fails to parse is an error.
fn merge_target_form(
    query: Result<Query<TargetForm>, QueryRejection>,
    form: Result<Form<TargetForm>, FormRejection>,
) -> Result<TargetForm, ApiError> {
    let invalid = |e: &dyn std::fmt::Display| {
        debug!(error = %e, "Rejected form data");
        ApiError::bad_request("No valid form data")
    };

    let Query(query) = query.map_err(|e| invalid(&e))?;
    let body = match form {
        Ok(Form(body)) => body,
        Err(FormRejection::InvalidFormContentType(_)) => TargetForm::default(),
        Err(e) => return Err(invalid(&e)),
    };

    Ok(TargetForm {
        active_server_ip: body.active_server_ip.or(query.active_server_ip),
    })
}

/// `POST /{ip}` with `active_server_ip=<address>`
async fn set_target(
    State(ctx): State<Arc<ControlContext>>,
    Path(ip): Path<String>,
    headers: HeaderMap,
    query: Result<Query<TargetForm>, QueryRejection>,
    form: Result<Form<TargetForm>, FormRejection>,
) -> Result<Json<FailoverBody>, ApiError> {
    let entry = authorize(&ctx, &ip, &headers)?;
    let failover = entry.address();

    let form = merge_target_form(query, form)?;

    let requested = form
        .active_server_ip
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("No target IP provided"))?;

    let requested: IpAddr = requested
        .parse()
        .map_err(|_| ApiError::bad_request("Target IP not valid IP"))?;

    let server = ctx
        .registry
        .server_by_address(requested)
        .cloned()
        .ok_or_else(|| ApiError::bad_request("Target IP not a valid server"))?;

    if entry
        .target()
        .await
        .is_some_and(|current| current.id == server.id)
    {
        return Err(ApiError::AlreadyRouted);
    }

    let Some(guard) = entry.try_lock() else {
        if let Some(ref m) = ctx.metrics {
            m.record_lock_conflict();
        }
        return Err(ApiError::Locked);
    };

    let previous = guard.set_target(Some(server.clone())).await;
    let next_hop = server.address_for(failover);

    let result = ctx.install_route(failover, next_hop).await;
    if let Err(e) = result {
        guard.set_target(previous).await;
        drop(guard);
        ctx.refresh_routed_gauge().await;
        error!(failover = %failover, target = %next_hop, error = %e, "Could not replace route");
        return Err(ApiError::Routing("Could not replace route".to_string()));
    }

    drop(guard);
    ctx.refresh_routed_gauge().await;
    info!(failover = %failover, target = %next_hop, server = server.id, "Failover routed");

    Ok(Json(FailoverBody {
        failover: failover_info(entry, Some(server.as_ref()), FailoverStatus::Ready),
    }))
}

/// `DELETE /{ip}`
///
/// Removing an address without a target is a no-op that still succeeds.
async fn clear_target(
    State(ctx): State<Arc<ControlContext>>,
    Path(ip): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FailoverBody>, ApiError> {
    let entry = authorize(&ctx, &ip, &headers)?;
    let failover = entry.address();

    let Some(guard) = entry.try_lock() else {
        if let Some(ref m) = ctx.metrics {
            m.record_lock_conflict();
        }
        return Err(ApiError::Locked);
    };

    let previous = guard.set_target(None).await;

    let result = ctx.remove_route(failover).await;
    if let Err(e) = result {
        guard.set_target(previous).await;
        drop(guard);
        ctx.refresh_routed_gauge().await;
        error!(failover = %failover, error = %e, "Could not delete route");
        return Err(ApiError::Routing("Could not remove route".to_string()));
    }

    drop(guard);
    ctx.refresh_routed_gauge().await;
    info!(failover = %failover, "Failover route removed");

    Ok(Json(FailoverBody {
        failover: failover_info(entry, None, FailoverStatus::Ready),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AddressPair, ServerDefinition};
    use axum::http::HeaderValue;

    fn entry_registry() -> Registry {
        Registry::new(&[ServerDefinition {
            id: 1,
            token: "tok1".to_string(),
            main: AddressPair {
                v4: "10.0.0.1".parse().unwrap(),
                v6: "fd00::1".parse().unwrap(),
            },
            failover: AddressPair {
                v4: "10.0.0.100".parse().unwrap(),
                v6: "fd00::100".parse().unwrap(),
            },
        }])
        .unwrap()
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn basic(credentials: &str) -> HeaderMap {
        headers(&format!("Basic {}", BASE64_STANDARD.encode(credentials)))
    }

    fn reason(result: Result<(), ApiError>) -> String {
        match result {
            Err(ApiError::Unauthorized(reason)) => reason,
            other => panic!("expected Unauthorized, got {:?}", other),
        }
    }

    #[test]
    fn test_credentials_accepted() {
        let registry = entry_registry();
        let entry = registry.entry("10.0.0.100".parse().unwrap()).unwrap();
        assert!(check_credentials(entry, &basic("1:tok1")).is_ok());
    }

    #[test]
    fn test_credentials_rejections() {
        let registry = entry_registry();
        let entry = registry.entry("fd00::100".parse().unwrap()).unwrap();

        assert_eq!(reason(check_credentials(entry, &HeaderMap::new())), "Auth empty");
        assert_eq!(reason(check_credentials(entry, &headers("Bearer abc"))), "Auth not basic");
        assert_eq!(reason(check_credentials(entry, &headers("Basic !!!"))), "Auth decode failed");
        assert_eq!(reason(check_credentials(entry, &basic("1:wrong"))), "Auth wrong");
        assert_eq!(reason(check_credentials(entry, &basic("2:tok1"))), "Auth wrong");
        assert_eq!(reason(check_credentials(entry, &basic("1:tok1 "))), "Auth wrong");
    }

    #[test]
    fn test_failover_info_uses_requested_family() {
        let registry = entry_registry();
        let owner = registry.server(1).unwrap().clone();

        let v6 = registry.entry("fd00::100".parse().unwrap()).unwrap();
        let info = failover_info(v6, Some(owner.as_ref()), FailoverStatus::Processing);
        assert_eq!(info.netmask, "ffff:ffff:ffff:ffff::");
        assert_eq!(info.active_server_ip.as_deref(), Some("fd00::1"));
        assert_eq!(info.server_ip, "10.0.0.1");
        assert_eq!(info.server_ipv6_net, "fd00::1");
        assert_eq!(info.status, FailoverStatus::Processing);

        let v4 = registry.entry("10.0.0.100".parse().unwrap()).unwrap();
        let info = failover_info(v4, None, FailoverStatus::Ready);
        assert_eq!(info.netmask, "255.255.255.255");
        assert!(info.active_server_ip.is_none());
    }
}
