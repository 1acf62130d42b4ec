use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};

/// Extension key for the extracted client IP.
#[derive(Clone, Copy, Debug)]
pub struct ClientIp(pub IpAddr);

/// Extracts the client IP, preferring `X-Forwarded-For` then `X-Real-Ip`
/// over the raw socket address, and stores it in request extensions for
/// downstream handlers and middleware (login lockout, rate limiting).
pub async fn extract_client_ip(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request,
    next: Next,
) -> Response {
    let ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .or_else(|| {
            request
                .headers()
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<IpAddr>().ok())
        })
        .unwrap_or_else(|| addr.ip());

    request.extensions_mut().insert(ClientIp(ip));
    next.run(request).await
}
