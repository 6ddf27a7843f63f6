//! Stateless HTTP request builder and response parser for the users API.
//!
//! # Design
//! `UsersClient` holds only a `base_url` and carries no mutable state between
//! calls. Each operation is split into a `build_*` method that produces an
//! `HttpRequest` and a `parse_*` method that consumes an `HttpResponse`.
//! `UsersApi` (see `api`) glues the two halves to a `Transport`; tests can
//! drive either half directly.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ApiError;
use crate::http::{self, FormPart, HttpMethod, HttpRequest, HttpResponse, RequestBody};
use crate::types::{
    CreateUser, DeleteUserResponse, ImageFile, ListUsersParams, UpdateUser, UploadImageResponse,
    User, UsersListResponse,
};

pub const USERS_PATH: &str = "/users";
pub const UPLOAD_IMAGE_PATH: &str = "/users/upload-image";

/// Synchronous, stateless client for the users API.
#[derive(Debug, Clone)]
pub struct UsersClient {
    base_url: String,
}

impl UsersClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: HttpMethod, path: &str, body: Option<RequestBody>) -> HttpRequest {
        http::build_request(&self.base_url, method, path, Vec::new(), body)
    }

    pub fn build_list(&self, params: &ListUsersParams) -> HttpRequest {
        let query = params.to_query_string();
        let path = if query.is_empty() {
            USERS_PATH.to_string()
        } else {
            format!("{USERS_PATH}?{query}")
        };
        self.request(HttpMethod::Get, &path, None)
    }

    pub fn build_get(&self, id: &str) -> HttpRequest {
        self.request(HttpMethod::Get, &user_path(id), None)
    }

    pub fn build_create(&self, input: &CreateUser) -> Result<HttpRequest, ApiError> {
        let body = json_body(input)?;
        Ok(self.request(HttpMethod::Post, USERS_PATH, Some(body)))
    }

    pub fn build_update(&self, id: &str, input: &UpdateUser) -> Result<HttpRequest, ApiError> {
        let body = json_body(input)?;
        Ok(self.request(HttpMethod::Patch, &user_path(id), Some(body)))
    }

    pub fn build_delete(&self, id: &str) -> HttpRequest {
        self.request(HttpMethod::Delete, &user_path(id), None)
    }

    /// Multipart upload of the raw file, plus `userId` when known.
    pub fn build_upload_image(&self, file: &ImageFile, user_id: Option<&str>) -> HttpRequest {
        let mut parts = vec![FormPart::File {
            name: "image".to_string(),
            file_name: file.file_name.clone(),
            mime_type: file.mime_type.clone(),
            bytes: file.bytes.clone(),
        }];
        if let Some(user_id) = user_id.filter(|id| !id.is_empty()) {
            parts.push(FormPart::Text {
                name: "userId".to_string(),
                value: user_id.to_string(),
            });
        }
        self.request(
            HttpMethod::Post,
            UPLOAD_IMAGE_PATH,
            Some(RequestBody::Multipart(parts)),
        )
    }

    pub fn parse_list(&self, response: &HttpResponse) -> Result<UsersListResponse, ApiError> {
        decode(response)
    }

    pub fn parse_get(&self, response: &HttpResponse) -> Result<User, ApiError> {
        decode(response)
    }

    pub fn parse_create(&self, response: &HttpResponse) -> Result<User, ApiError> {
        decode(response)
    }

    pub fn parse_update(&self, response: &HttpResponse) -> Result<User, ApiError> {
        decode(response)
    }

    pub fn parse_delete(&self, response: &HttpResponse) -> Result<DeleteUserResponse, ApiError> {
        decode(response)
    }

    /// Returns the URL of the stored image.
    pub fn parse_upload_image(&self, response: &HttpResponse) -> Result<String, ApiError> {
        decode::<UploadImageResponse>(response).map(|r| r.image_url)
    }
}

/// `/users/{id}` with the id encoded as a single path segment.
fn user_path(id: &str) -> String {
    format!("{USERS_PATH}/{}", urlencoding::encode(id))
}

fn json_body<T: Serialize>(input: &T) -> Result<RequestBody, ApiError> {
    serde_json::to_string(input)
        .map(RequestBody::Json)
        .map_err(|e| ApiError::Serialization(e.to_string()))
}

/// Map non-2xx statuses to `ApiError`, then decode the parsed body.
fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
    let body = http::into_result(response)?;
    serde_json::from_value(body).map_err(|e| ApiError::Deserialization(e.to_string()))
}
