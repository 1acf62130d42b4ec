//! Transactional storage for users, sessions, the ledger, jobs, webhook
//! events, and incidents. Not one monolithic struct: small per-entity
//! modules exposing free functions over a `&PgPool` or
//! `&mut Transaction<'_, Postgres>`, following the teacher's
//! raw-`sqlx::query_as` style rather than a repository-interface
//! abstraction nothing else implements.

pub mod incidents;
pub mod jobs;
pub mod ledger;
pub mod sessions;
pub mod users;
pub mod webhooks;
