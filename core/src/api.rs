//! Async facade that executes `UsersClient` requests over a `Transport`.
//!
//! `HttpClient` is the generic `request(path, method, headers, body)` entry
//! point; `UsersApi` is the typed resource client on top of it. Neither
//! retries: every `ApiError` reaches the caller unmodified.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::client::UsersClient;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::http::{self, HttpMethod, HttpRequest, HttpResponse, RequestBody};
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{
    CreateUser, DeleteUserResponse, ImageFile, ListUsersParams, UpdateUser, User,
    UsersListResponse,
};

/// JSON HTTP client bound to one base URL.
#[derive(Clone)]
pub struct HttpClient {
    base_url: String,
    transport: Arc<dyn Transport>,
}

impl HttpClient {
    pub fn new(base_url: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a request and return the parsed body of a 2xx response.
    pub async fn request(
        &self,
        path: &str,
        method: HttpMethod,
        headers: Vec<(String, String)>,
        body: Option<RequestBody>,
    ) -> Result<Value, ApiError> {
        let request = http::build_request(&self.base_url, method, path, headers, body);
        let response = self.send(request).await?;
        http::into_result(&response)
    }

    /// Execute a prepared request, returning the raw response for any status.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.transport.execute(request).await
    }
}

/// Typed users resource client.
#[derive(Clone)]
pub struct UsersApi {
    client: UsersClient,
    http: HttpClient,
}

impl UsersApi {
    pub fn new(base_url: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            client: UsersClient::new(base_url),
            http: HttpClient::new(base_url, transport),
        }
    }

    /// Build an API backed by reqwest from loaded configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(config.timeout())?;
        Ok(Self::new(config.base_url(), Arc::new(transport)))
    }

    pub fn client(&self) -> &UsersClient {
        &self.client
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub async fn list(&self, params: &ListUsersParams) -> Result<UsersListResponse, ApiError> {
        let response = self.http.send(self.client.build_list(params)).await?;
        self.client.parse_list(&response)
    }

    pub async fn get(&self, id: &str) -> Result<User, ApiError> {
        let response = self.http.send(self.client.build_get(id)).await?;
        self.client.parse_get(&response)
    }

    pub async fn create(&self, input: &CreateUser) -> Result<User, ApiError> {
        let response = self.http.send(self.client.build_create(input)?).await?;
        let user = self.client.parse_create(&response)?;
        info!(id = %user.id, "Created user");
        Ok(user)
    }

    pub async fn update(&self, id: &str, input: &UpdateUser) -> Result<User, ApiError> {
        let response = self.http.send(self.client.build_update(id, input)?).await?;
        let user = self.client.parse_update(&response)?;
        info!(id = %user.id, "Updated user");
        Ok(user)
    }

    pub async fn remove(&self, id: &str) -> Result<DeleteUserResponse, ApiError> {
        let response = self.http.send(self.client.build_delete(id)).await?;
        let confirmation = self.client.parse_delete(&response)?;
        info!(id = %confirmation.id, "Deleted user");
        Ok(confirmation)
    }

    /// Upload a profile image, returning its URL.
    pub async fn upload_image(
        &self,
        file: &ImageFile,
        user_id: Option<&str>,
    ) -> Result<String, ApiError> {
        debug!(file = %file.file_name, size = file.bytes.len(), "Uploading image");
        let response = self
            .http
            .send(self.client.build_upload_image(file, user_id))
            .await?;
        self.client.parse_upload_image(&response)
    }
}
