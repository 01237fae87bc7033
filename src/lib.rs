//! A Rust client for the SEED Platform building energy data REST API.
//!
//! Two layers are provided:
//! - [`SeedReadWriteClient`] and friends: endpoint-name based CRUD calls that
//!   add the organization, authenticate, and normalize SEED's inconsistent
//!   success signaling and response envelopes.
//! - [`SeedClient`]: organization-level workflows (cycles, labels, uploads
//!   through matching, meters, Portfolio Manager downloads).
//!
//! ## Quick start
//! - Configure the connection via environment variables (`SEED_BASE_URL`,
//!   `SEED_USERNAME`, `SEED_API_KEY`, `SEED_PORT`, `SEED_USE_SSL`) or a
//!   `seed-config.json` file (current directory or home directory).
//! - Pick a cycle and upload a file.
//!
//! ```no_run
//! use anyhow::Result;
//! use chrono::NaiveDate;
//! use seedapi::{SeedClient, UploadOptions};
//!
//! fn main() -> Result<()> {
//!     let mut client = SeedClient::from_env(1)?.with_progress(true);
//!     client.get_or_create_cycle(
//!         "2021 Benchmarking",
//!         NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
//!         NaiveDate::from_ymd_opt(2021, 12, 31).unwrap(),
//!         true,
//!     )?;
//!     let summary = client.upload_and_match_datafile(
//!         "benchmarking",
//!         "data/buildings.xlsx",
//!         "Benchmarking Mappings",
//!         "data/mappings.csv",
//!         &UploadOptions::default(),
//!     )?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```
//!
//! Errors are [`anyhow::Error`]; failures reported by SEED carry an
//! [`ApiClientError`], reachable with [`api_error`].

#![forbid(unsafe_code)]

pub mod api;
pub mod auth;
pub mod base;
mod client;
mod config;
mod error;
pub mod geo;
pub mod mapping;
pub mod response;
pub mod urls;
pub mod util;

pub use auth::{AccessTokenSource, Auth, AuthMethod, JwtGrant, JwtGrantClient, StaticToken};
pub use base::{
    Call, Create, Delete, Read, SeedApi, SeedBaseClient, SeedClientBuilder,
    SeedOAuthReadOnlyClient, SeedOAuthReadWriteClient, SeedReadOnlyClient, SeedReadWriteClient,
    Update,
};
pub use client::{InventoryType, SeedClient, UploadOptions, resolve_label_ids};
pub use config::{CONFIG_FILE_NAME, ConnectionParams, config_candidates, load_config};
pub use error::{ApiClientError, api_error};
pub use response::Payload;
