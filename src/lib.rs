//! Species occurrence acquisition from GBIF, cached by query fingerprint, with
//! coordinate validation for the cached tables.

pub mod app;
pub mod config;
pub mod coordinates;
pub mod dataset;
pub mod domain;
pub mod error;
pub mod fingerprint;
pub mod gbif;
pub mod output;
pub mod pipeline;
pub mod query;
pub mod record;
pub mod store;
