pub mod admin_auth;
pub mod ip_extractor;
pub mod login_lockout;
pub mod origin_allowlist;
pub mod request_log;
pub mod session_auth;
