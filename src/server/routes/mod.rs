pub mod auth;
pub mod billing;
pub mod credits;
pub mod health;
pub mod incidents;
pub mod jobs;
pub mod ops;
