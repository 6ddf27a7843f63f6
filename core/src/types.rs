//! Domain DTOs for the users API.
//!
//! # Design
//! These types mirror the mock-server's schema but are defined independently;
//! the integration tests catch schema drift between the two crates.
//!
//! `User` decodes leniently: string fields also accept numbers or null, run
//! through `loose_string`, so a loosely-typed upstream payload never fails
//! the whole list. The list endpoint answers either with a bare array or with
//! a paging envelope; `UsersListResponse` models both and `into_users` is the
//! one place that normalises them.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::form::loose_string;

/// A user record as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(deserialize_with = "de_loose")]
    pub id: String,
    #[serde(default, deserialize_with = "de_loose")]
    pub email: String,
    #[serde(default, deserialize_with = "de_loose")]
    pub name: String,
    #[serde(default, deserialize_with = "de_loose_opt")]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "de_loose_opt")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

fn de_loose<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(loose_string(&value))
}

fn de_loose_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Sortable columns of the list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortField {
    #[serde(rename = "createdAt")]
    CreatedAt,
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "email")]
    Email,
}

impl SortField {
    pub fn as_str(self) -> &'static str {
        match self {
            SortField::CreatedAt => "createdAt",
            SortField::Name => "name",
            SortField::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Query parameters for listing users. Absent values are left to the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListUsersParams {
    pub q: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort: Option<SortField>,
    pub order: Option<SortOrder>,
}

impl ListUsersParams {
    /// Encode the present parameters in the order q, page, limit, sort, order.
    ///
    /// Empty `q` and zero `page`/`limit` count as absent. Returns an empty
    /// string when nothing is set.
    pub fn to_query_string(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        if let Some(q) = self.q.as_deref().filter(|q| !q.is_empty()) {
            query.append_pair("q", q);
        }
        if let Some(page) = self.page.filter(|p| *p > 0) {
            query.append_pair("page", &page.to_string());
        }
        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            query.append_pair("limit", &limit.to_string());
        }
        if let Some(sort) = self.sort {
            query.append_pair("sort", sort.as_str());
        }
        if let Some(order) = self.order {
            query.append_pair("order", order.as_str());
        }
        query.finish()
    }
}

/// Paging envelope returned by newer backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsersPage {
    pub items: Vec<User>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// Either shape of the list endpoint's reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum UsersListResponse {
    List(Vec<User>),
    Page(UsersPage),
}

impl UsersListResponse {
    /// Normalise either shape to the ordered list of users.
    pub fn into_users(self) -> Vec<User> {
        match self {
            UsersListResponse::List(users) => users,
            UsersListResponse::Page(page) => page.items,
        }
    }

    pub fn users(&self) -> &[User] {
        match self {
            UsersListResponse::List(users) => users,
            UsersListResponse::Page(page) => &page.items,
        }
    }
}

/// Request payload for creating a user.
///
/// `phone` is always sent; an empty phone goes out as an explicit `null`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Request payload for a partial update. Omitted fields stay unchanged on
/// the server; `Some(None)` on `phone` or `image_url` clears the value.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Option<String>>,
}

impl From<CreateUser> for UpdateUser {
    fn from(input: CreateUser) -> Self {
        UpdateUser {
            email: Some(input.email),
            name: Some(input.name),
            phone: Some(input.phone),
            image_url: input.image_url.map(Some),
        }
    }
}

/// Confirmation returned by `DELETE /users/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteUserResponse {
    pub deleted: bool,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadImageResponse {
    pub image_url: String,
}

/// An image picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_decodes_numeric_and_null_fields() {
        let user: User = serde_json::from_value(json!({
            "id": 7,
            "email": "a@b.io",
            "name": 42,
            "phone": null,
            "imageUrl": "http://img/7.png"
        }))
        .unwrap();
        assert_eq!(user.id, "7");
        assert_eq!(user.name, "42");
        assert_eq!(user.phone, None);
        assert_eq!(user.image_url.as_deref(), Some("http://img/7.png"));
        assert_eq!(user.created_at, None);
    }

    #[test]
    fn user_without_id_is_rejected() {
        let result: Result<User, _> = serde_json::from_value(json!({"email": "a@b.io"}));
        assert!(result.is_err());
    }

    #[test]
    fn bare_array_normalises_to_users() {
        let raw = json!([{"id": "1", "email": "a@b.io", "name": "A"}]);
        let response: UsersListResponse = serde_json::from_value(raw).unwrap();
        assert!(matches!(response, UsersListResponse::List(_)));
        let users = response.into_users();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "1");
    }

    #[test]
    fn envelope_normalises_to_items() {
        let raw = json!({
            "items": [{"id": "1", "email": "a@b.io", "name": "A"}],
            "total": 1,
            "page": 1,
            "limit": 10
        });
        let response: UsersListResponse = serde_json::from_value(raw).unwrap();
        assert!(matches!(response, UsersListResponse::Page(_)));
        assert_eq!(response.users().len(), 1);
        assert_eq!(response.into_users()[0].email, "a@b.io");
    }

    #[test]
    fn query_string_includes_only_present_params() {
        let params = ListUsersParams {
            q: Some("ali ce".into()),
            page: None,
            limit: Some(20),
            sort: Some(SortField::CreatedAt),
            order: Some(SortOrder::Desc),
        };
        assert_eq!(
            params.to_query_string(),
            "q=ali+ce&limit=20&sort=createdAt&order=DESC"
        );
    }

    #[test]
    fn empty_and_zero_params_are_skipped() {
        let params = ListUsersParams {
            q: Some(String::new()),
            page: Some(0),
            ..Default::default()
        };
        assert_eq!(params.to_query_string(), "");
    }

    #[test]
    fn create_user_sends_explicit_null_phone() {
        let input = CreateUser {
            email: "a@b.io".into(),
            name: "A".into(),
            phone: None,
            image_url: None,
        };
        let body = serde_json::to_value(&input).unwrap();
        assert_eq!(body, json!({"email": "a@b.io", "name": "A", "phone": null}));
    }

    #[test]
    fn update_user_distinguishes_untouched_from_cleared() {
        let input = UpdateUser {
            name: Some("B".into()),
            image_url: Some(None),
            ..Default::default()
        };
        let body = serde_json::to_value(&input).unwrap();
        assert_eq!(body, json!({"name": "B", "imageUrl": null}));
    }
}
