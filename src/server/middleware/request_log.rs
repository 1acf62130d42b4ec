use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

/// Assigns a request id, logs method/path/status/duration as a single
/// structured event per request, and stamps the id back onto the response
/// so it can be correlated with client-side logs.
pub async fn log_requests(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    request.extensions_mut().insert(request_id);

    let start = Instant::now();
    let mut response = next.run(request).await;
    let elapsed_ms = start.elapsed().as_millis();

    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms,
        "request"
    );

    response.headers_mut().insert(
        "x-request-id",
        request_id.to_string().parse().expect("uuid string is a valid header value"),
    );
    response
}
