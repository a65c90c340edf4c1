//! Request and caching core for the Valtro dashboard.
//!
//! # Overview
//! `ApiClient` talks to the backend: it attaches the bearer token, enforces
//! the request timeout, classifies failures into `ApiError` and strips the
//! `{ message, data }` envelope. `QueryClient` sits above it and owns cached
//! server state: freshness, de-duplication, retries with backoff and
//! invalidation after mutations. `Dashboard` wires the two together under
//! the cache keys the UI reads.
//!
//! # Design
//! - Every operation is split into `build_*` (produces an `HttpRequest`) and
//!   `parse_*` (consumes an `HttpResponse`), so the I/O boundary is explicit
//!   and testable without a network.
//! - The round-trip itself goes through the `Transport` trait;
//!   `ReqwestTransport` is the default implementation.
//! - Tokens come from a `TokenProvider`, read fresh for every request.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod auth;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod http;
pub mod query;
pub mod retry;
pub mod transport;
pub mod types;

pub use auth::{token_fn, StaticToken, TokenProvider};
pub use client::ApiClient;
pub use config::{ClientConfig, QueryConfig, UserIdHeader};
pub use dashboard::Dashboard;
pub use error::{ApiError, NameRule, ValidationError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use query::{QueryClient, QueryEvent, QueryKey, QueryOptions};
pub use transport::{ReqwestTransport, Transport};
pub use types::{
    OnboardingResult, OnboardingStatus, Organization, OrganizationId, OrganizationPatch, OrganizationWithProjects,
    Project, ProjectId,
};
