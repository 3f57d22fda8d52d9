//! 请求中间件：客户端识别、设备跟踪和可选的审批检查

use super::AppState;
use crate::error::AppError;
use crate::presence::{is_loopback, normalize_address};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap, header},
    middleware::Next,
    response::Response,
};
use log::warn;
use std::net::SocketAddr;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// 用于设备识别的客户端地址，由 [`track_devices`] 写入请求扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

/// 审批检查使用的可信地址，由 [`track_devices`] 写入请求扩展
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr(pub String);

fn forwarded_for(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn connect_peer(extensions: &Extensions) -> Option<String> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(peer)| normalize_address(&peer.ip().to_string()))
}

/// 优先使用 `X-Forwarded-For` 的第一项，其次是连接的对端地址
pub fn resolve_client_addr(headers: &HeaderMap, extensions: &Extensions) -> String {
    forwarded_for(headers)
        .map(normalize_address)
        .or_else(|| connect_peer(extensions))
        .unwrap_or_default()
}

/// 连接的对端地址
///
/// 只有对端是本机（本地反向代理）或没有连接信息（进程内调用）时
/// 才采用 `X-Forwarded-For`。
pub fn resolve_peer_addr(headers: &HeaderMap, extensions: &Extensions) -> String {
    match connect_peer(extensions) {
        Some(peer) if !is_loopback(&peer) => peer,
        peer => forwarded_for(headers)
            .map(normalize_address)
            .or(peer)
            .unwrap_or_default(),
    }
}

pub async fn track_devices(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let address = resolve_client_addr(req.headers(), req.extensions());
    let peer = resolve_peer_addr(req.headers(), req.extensions());
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());
    state.devices.observe(&address, user_agent);

    req.extensions_mut().insert(ClientAddr(address));
    req.extensions_mut().insert(PeerAddr(peer));
    next.run(req).await
}

/// 启用 `require_approval` 时拒绝未获批准的非本机设备
pub fn ensure_approved(state: &AppState, address: &str) -> Result<(), AppError> {
    if !state.require_approval || is_loopback(address) || state.access.is_approved(address) {
        return Ok(());
    }
    warn!("Blocked unapproved client {:?}", address);
    Err(AppError::Forbidden("Access not approved".into()))
}

fn peer_of(req: &Request) -> &str {
    req.extensions()
        .get::<PeerAddr>()
        .map(|PeerAddr(a)| a.as_str())
        .unwrap_or_default()
}

pub async fn approval_gate(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    ensure_approved(&state, peer_of(&req))?;
    Ok(next.run(req).await)
}

/// 启用 `require_approval` 时，只有本机可以查看和决定访问请求
pub async fn host_only(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let address = peer_of(&req);
    if state.require_approval && !is_loopback(address) {
        warn!("Blocked access decision from {:?}", address);
        return Err(AppError::Forbidden(
            "Only the host can manage access requests".into(),
        ));
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::net::{IpAddr, Ipv6Addr};

    #[test]
    fn test_forwarded_for_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("::ffff:192.168.1.8, 10.0.0.1"),
        );
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 2], 5000))));

        assert_eq!(resolve_client_addr(&headers, &extensions), "192.168.1.8");
    }

    #[test]
    fn test_peer_address_fallback() {
        let mut extensions = Extensions::new();
        let mapped = Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0xc0a8, 0x0107);
        extensions.insert(ConnectInfo(SocketAddr::new(IpAddr::V6(mapped), 5000)));

        assert_eq!(
            resolve_client_addr(&HeaderMap::new(), &extensions),
            "192.168.1.7"
        );
        assert_eq!(
            resolve_client_addr(&HeaderMap::new(), &Extensions::new()),
            ""
        );
    }

    #[test]
    fn test_peer_ignores_forwarded_for_from_remote() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("127.0.0.1"));
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 60], 5000))));

        assert_eq!(resolve_peer_addr(&headers, &extensions), "192.168.1.60");
        // 设备识别仍使用转发头
        assert_eq!(resolve_client_addr(&headers, &extensions), "127.0.0.1");
    }

    #[test]
    fn test_peer_trusts_local_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("192.168.1.9"));
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5000))));
        assert_eq!(resolve_peer_addr(&headers, &extensions), "192.168.1.9");

        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5000))));
        assert_eq!(
            resolve_peer_addr(&HeaderMap::new(), &extensions),
            "127.0.0.1"
        );
    }
}
