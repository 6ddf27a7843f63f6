//! Client core for the users service.
//!
//! # Overview
//! `UsersClient` builds `HttpRequest` values and parses `HttpResponse`
//! values without touching the network. `UsersApi` pairs it with a
//! `Transport` (reqwest by default) to run the round-trip. On top of that
//! sit the screen-level pieces: cached queries, the form controller, the
//! write controller, the table with image retry, and the pages that wire
//! them together.
//!
//! # Design
//! - Each CRUD operation is split into `build_*` and `parse_*`, so the I/O
//!   boundary is explicit and the request shapes are unit-testable.
//! - Non-2xx responses become `ApiError::Http` carrying status and the
//!   parsed body (JSON, raw text, or null).
//! - `QueryCache` is an explicit, cloneable handle rather than a global.
//!   Fetches run on spawned tasks and are shared by every caller of a key.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod form;
pub mod http;
pub mod image_retry;
pub mod operations;
pub mod pages;
pub mod query;
pub mod table;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use api::{HttpClient, UsersApi};
pub use cache::{CacheKey, QueryCache, QuerySnapshot};
pub use client::UsersClient;
pub use config::ClientConfig;
pub use error::{ApiError, ConfigError};
pub use form::{FormField, FormMode, UserForm};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use image_retry::{ImageRetryTracker, RetryPolicy};
pub use operations::{OperationError, OperationsOptions, UserOperations};
pub use pages::{EditUserPage, NewUserPage, SubmitError, UsersPage};
pub use query::{QueryOptions, UserQuery, UsersQuery};
pub use table::{ImageCell, UserRow, UserTable};
pub use transport::{ReqwestTransport, Transport};
pub use types::{
    CreateUser, DeleteUserResponse, ImageFile, ListUsersParams, UpdateUser, User,
    UsersListResponse,
};
