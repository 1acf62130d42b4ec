//! Not an axum layer: the login handler needs the email from the request
//! body, which isn't available to generic middleware without buffering and
//! re-parsing it. Kept alongside the other auth guards as a thin wrapper
//! the login route calls directly at the top and bottom of the attempt.

use std::net::IpAddr;

use crate::common::error::AppError;
use crate::common::state::AppState;

pub fn check(state: &AppState, email: &str, ip: IpAddr) -> Result<(), AppError> {
    state.login_limiter.check(email, ip)
}

pub fn record_failure(state: &AppState, email: &str, ip: IpAddr) {
    state.login_limiter.record_failure(email, ip);
}

pub fn record_success(state: &AppState, email: &str, ip: IpAddr) {
    state.login_limiter.record_success(email, ip);
}
