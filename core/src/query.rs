//! Cached, revalidating reads of the users resource.
//!
//! `UsersQuery` and `UserQuery` are thin typed views over a shared
//! `QueryCache`: any number of them built with the same parameters share one
//! cache entry, one in-flight request and one result.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use crate::api::UsersApi;
use crate::cache::{CacheKey, QueryCache, QuerySnapshot};
use crate::error::ApiError;
use crate::types::{ListUsersParams, User, UsersListResponse};

pub const LIST_OPERATION: &str = "users.list";
pub const GET_OPERATION: &str = "users.get";

/// Revalidation policy shared by both queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Refetch when the owning view regains focus.
    pub revalidate_on_focus: bool,
    /// Retry failed fetches with a fixed interval.
    pub retry_on_error: bool,
    pub error_retry_count: u32,
    pub error_retry_interval: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            revalidate_on_focus: false,
            retry_on_error: false,
            error_retry_count: 3,
            error_retry_interval: Duration::from_secs(5),
        }
    }
}

pub fn list_key(params: &ListUsersParams) -> CacheKey {
    CacheKey::new(LIST_OPERATION, params.to_query_string())
}

pub fn get_key(id: &str) -> CacheKey {
    CacheKey::new(GET_OPERATION, id)
}

/// Retry `attempt` while it fails, up to the configured count, when
/// `retry_on_error` is set. 404 is never retried.
async fn with_retry<T, F, Fut>(options: QueryOptions, key: &CacheKey, mut attempt: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ApiError>>,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(error)
                if options.retry_on_error
                    && retries < options.error_retry_count
                    && !error.is_not_found() =>
            {
                retries += 1;
                warn!(%key, %error, retries, "Fetch failed, retrying");
                tokio::time::sleep(options.error_retry_interval).await;
            }
            Err(error) => return Err(error),
        }
    }
}

/// List query keyed by `("users.list", params)`.
#[derive(Clone)]
pub struct UsersQuery {
    api: UsersApi,
    cache: QueryCache,
    params: ListUsersParams,
    options: QueryOptions,
    key: CacheKey,
}

impl UsersQuery {
    pub fn new(api: UsersApi, cache: QueryCache, params: ListUsersParams) -> Self {
        Self::with_options(api, cache, params, QueryOptions::default())
    }

    pub fn with_options(
        api: UsersApi,
        cache: QueryCache,
        params: ListUsersParams,
        options: QueryOptions,
    ) -> Self {
        let key = list_key(&params);
        Self {
            api,
            cache,
            params,
            options,
            key,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn params(&self) -> &ListUsersParams {
        &self.params
    }

    fn fetcher(
        &self,
    ) -> impl FnOnce() -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<UsersListResponse, ApiError>> + Send>,
    > {
        let api = self.api.clone();
        let params = self.params.clone();
        let options = self.options;
        let key = self.key.clone();
        move || {
            Box::pin(async move {
                with_retry(options, &key, || api.list(&params)).await
            })
        }
    }

    /// Load the list, reusing a cached or in-flight result for this key.
    pub async fn load(&self) -> Result<Vec<User>, ApiError> {
        let response = self.cache.fetch(self.key.clone(), self.fetcher()).await?;
        Ok(response.users().to_vec())
    }

    /// Invalidate this key and fetch it again.
    pub async fn refetch(&self) -> Result<Vec<User>, ApiError> {
        let response = self
            .cache
            .revalidate(self.key.clone(), self.fetcher())
            .await?;
        Ok(response.users().to_vec())
    }

    /// Called when the owning view regains focus. Refetches only when
    /// `revalidate_on_focus` is enabled; returns whether it did.
    pub async fn on_focus(&self) -> Result<bool, ApiError> {
        if !self.options.revalidate_on_focus {
            return Ok(false);
        }
        self.refetch().await?;
        Ok(true)
    }

    pub fn snapshot(&self) -> QuerySnapshot {
        self.cache.snapshot(&self.key)
    }

    /// Raw response as the backend sent it.
    pub fn data(&self) -> Option<Arc<UsersListResponse>> {
        self.snapshot().data::<UsersListResponse>()
    }

    /// Current users; empty until the first fetch lands.
    pub fn users(&self) -> Vec<User> {
        self.data()
            .map(|response| response.users().to_vec())
            .unwrap_or_default()
    }

    pub fn error(&self) -> Option<ApiError> {
        self.snapshot().error().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot().is_loading()
    }

    pub fn is_empty(&self) -> bool {
        self.users().is_empty()
    }

    pub fn subscribe(&self) -> watch::Receiver<QuerySnapshot> {
        self.cache.subscribe(&self.key)
    }
}

/// Single-user query keyed by `("users.get", id)`. An empty id disables it.
#[derive(Clone)]
pub struct UserQuery {
    api: UsersApi,
    cache: QueryCache,
    id: String,
    options: QueryOptions,
    key: Option<CacheKey>,
}

impl UserQuery {
    pub fn new(api: UsersApi, cache: QueryCache, id: &str) -> Self {
        Self::with_options(api, cache, id, QueryOptions::default())
    }

    pub fn with_options(api: UsersApi, cache: QueryCache, id: &str, options: QueryOptions) -> Self {
        let key = (!id.is_empty()).then(|| get_key(id));
        Self {
            api,
            cache,
            id: id.to_string(),
            options,
            key,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> Option<&CacheKey> {
        self.key.as_ref()
    }

    /// True when the query has no id and never fetches.
    pub fn is_skipped(&self) -> bool {
        self.key.is_none()
    }

    fn fetcher(
        &self,
    ) -> impl FnOnce() -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<User, ApiError>> + Send>,
    > {
        let api = self.api.clone();
        let id = self.id.clone();
        let options = self.options;
        let key = get_key(&self.id);
        move || Box::pin(async move { with_retry(options, &key, || api.get(&id)).await })
    }

    /// Load the user. Returns `Ok(None)` without any request when skipped.
    pub async fn load(&self) -> Result<Option<User>, ApiError> {
        let Some(key) = self.key.clone() else {
            return Ok(None);
        };
        let user = self.cache.fetch(key, self.fetcher()).await?;
        Ok(Some(User::clone(&user)))
    }

    pub async fn refetch(&self) -> Result<Option<User>, ApiError> {
        let Some(key) = self.key.clone() else {
            return Ok(None);
        };
        let user = self.cache.revalidate(key, self.fetcher()).await?;
        Ok(Some(User::clone(&user)))
    }

    pub async fn on_focus(&self) -> Result<bool, ApiError> {
        if !self.options.revalidate_on_focus || self.is_skipped() {
            return Ok(false);
        }
        self.refetch().await?;
        Ok(true)
    }

    pub fn snapshot(&self) -> QuerySnapshot {
        self.key
            .as_ref()
            .map(|key| self.cache.snapshot(key))
            .unwrap_or_default()
    }

    pub fn user(&self) -> Option<User> {
        self.snapshot().data::<User>().map(|user| User::clone(&user))
    }

    pub fn error(&self) -> Option<ApiError> {
        self.snapshot().error().cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.snapshot().is_loading()
    }

    /// The last fetch failed with 404.
    pub fn not_found(&self) -> bool {
        self.snapshot().error().is_some_and(ApiError::is_not_found)
    }

    /// `None` when skipped.
    pub fn subscribe(&self) -> Option<watch::Receiver<QuerySnapshot>> {
        self.key.as_ref().map(|key| self.cache.subscribe(key))
    }
}
