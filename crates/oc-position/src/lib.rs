//! Position normalization and persistence (C4): turns a raw exchange
//! payload into a canonical [`oc_schemas::PositionWire`] and persists it to
//! Postgres.

pub mod normalizer;
pub mod store;

pub use normalizer::normalize_position;
pub use store::{connect_from_env, fetch_active, migrate, upsert};
