use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering as AtomicOrdering},
        Arc,
    },
};

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: usize = 20;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Insertion order; breaks `createdAt` ties.
    #[serde(skip)]
    pub seq: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// `phone` and `imageUrl` distinguish absent (keep) from `null` (clear).
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub email: Option<String>,
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub image_url: Option<Option<String>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize, Default)]
pub struct ListQuery {
    pub q: Option<String>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct UsersPage {
    pub items: Vec<User>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

#[derive(Clone)]
struct StoredImage {
    content_type: String,
    bytes: Bytes,
}

#[derive(Default)]
pub struct Store {
    users: RwLock<HashMap<Uuid, User>>,
    images: RwLock<HashMap<String, StoredImage>>,
    next_seq: AtomicU64,
}

pub type Db = Arc<Store>;

/// Error response with a JSON `{"message": ...}` body.
#[derive(Debug)]
pub enum AppError {
    NotFound,
    Conflict(String),
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found".to_string()),
            AppError::Conflict(message) => (StatusCode::CONFLICT, message),
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

pub fn app() -> Router {
    router(Db::default())
}

pub fn router(db: Db) -> Router {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/upload-image", post(upload_image))
        .route(
            "/users/{id}",
            get(get_user).patch(update_user).delete(delete_user),
        )
        .route("/images/{name}", get(get_image))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn parse_id(id: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(id).map_err(|_| AppError::NotFound)
}

fn email_taken(users: &HashMap<Uuid, User>, email: &str, except: Option<Uuid>) -> bool {
    users
        .values()
        .any(|u| Some(u.id) != except && u.email.eq_ignore_ascii_case(email))
}

fn compare(a: &User, b: &User, sort: &str) -> Ordering {
    let by_created = a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq));
    match sort {
        "name" => a.name.cmp(&b.name).then(by_created),
        "email" => a.email.cmp(&b.email).then(by_created),
        _ => by_created,
    }
}

async fn list_users(State(db): State<Db>, Query(query): Query<ListQuery>) -> Response {
    let users = db.users.read().await;
    let needle = query.q.as_deref().unwrap_or("").trim().to_lowercase();
    let mut items: Vec<User> = users
        .values()
        .filter(|u| {
            needle.is_empty()
                || u.email.to_lowercase().contains(&needle)
                || u.name.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect();

    let sort = query.sort.as_deref().unwrap_or("createdAt");
    items.sort_by(|a, b| compare(a, b, sort));
    if query.order.as_deref() == Some("DESC") {
        items.reverse();
    }

    if query.page.is_none() && query.limit.is_none() {
        return Json(items).into_response();
    }

    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_PAGE_LIMIT);
    let total = items.len();
    let items = items
        .into_iter()
        .skip(page.saturating_sub(1).saturating_mul(limit))
        .take(limit)
        .collect();
    Json(UsersPage {
        items,
        total,
        page,
        limit,
    })
    .into_response()
}

async fn create_user(
    State(db): State<Db>,
    Json(input): Json<CreateUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let mut users = db.users.write().await;
    if email_taken(&users, &input.email, None) {
        return Err(AppError::Conflict("Email already exists".to_string()));
    }
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        email: input.email,
        name: input.name,
        phone: input.phone.filter(|p| !p.is_empty()),
        image_url: input.image_url,
        created_at: now,
        updated_at: now,
        seq: db.next_seq.fetch_add(1, AtomicOrdering::Relaxed),
    };
    users.insert(user.id, user.clone());
    info!(id = %user.id, "Created user");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(State(db): State<Db>, Path(id): Path<String>) -> Result<Json<User>, AppError> {
    let id = parse_id(&id)?;
    let users = db.users.read().await;
    users.get(&id).cloned().map(Json).ok_or(AppError::NotFound)
}

async fn update_user(
    State(db): State<Db>,
    Path(id): Path<String>,
    Json(input): Json<UpdateUser>,
) -> Result<Json<User>, AppError> {
    let id = parse_id(&id)?;
    let mut users = db.users.write().await;
    if !users.contains_key(&id) {
        return Err(AppError::NotFound);
    }
    if let Some(email) = &input.email {
        if email_taken(&users, email, Some(id)) {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }
    }
    let user = users.get_mut(&id).ok_or(AppError::NotFound)?;
    if let Some(email) = input.email {
        user.email = email;
    }
    if let Some(name) = input.name {
        user.name = name;
    }
    if let Some(phone) = input.phone {
        user.phone = phone.filter(|p| !p.is_empty());
    }
    if let Some(image_url) = input.image_url {
        user.image_url = image_url;
    }
    user.updated_at = Utc::now();
    Ok(Json(user.clone()))
}

async fn delete_user(
    State(db): State<Db>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let uuid = parse_id(&id)?;
    let removed = db.users.write().await.remove(&uuid);
    match removed {
        Some(_) => {
            info!(%id, "Deleted user");
            Ok(Json(json!({ "deleted": true, "id": id })))
        }
        None => Err(AppError::NotFound),
    }
}

fn extension(file_name: &str) -> &str {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin")
}

async fn upload_image(
    State(db): State<Db>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut image: Option<(String, StoredImage)> = None;
    let mut user_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("image") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                let name = format!("{}.{}", Uuid::new_v4(), extension(&file_name));
                image = Some((name, StoredImage { content_type, bytes }));
            }
            Some("userId") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.body_text()))?;
                user_id = Some(text).filter(|t| !t.is_empty());
            }
            other => debug!(field = ?other, "Ignoring multipart field"),
        }
    }

    let (name, stored) =
        image.ok_or_else(|| AppError::BadRequest("image field is required".to_string()))?;
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost");
    let image_url = format!("http://{host}/images/{name}");

    debug!(%name, size = stored.bytes.len(), "Stored image");
    db.images.write().await.insert(name, stored);

    if let Some(id) = user_id.as_deref().and_then(|id| Uuid::parse_str(id).ok()) {
        if let Some(user) = db.users.write().await.get_mut(&id) {
            user.image_url = Some(image_url.clone());
            user.updated_at = Utc::now();
        }
    }

    Ok(Json(json!({ "imageUrl": image_url })))
}

async fn get_image(State(db): State<Db>, Path(name): Path<String>) -> Result<Response, AppError> {
    let images = db.images.read().await;
    let image = images.get(&name).cloned().ok_or(AppError::NotFound)?;
    Ok(([(header::CONTENT_TYPE, image.content_type)], image.bytes).into_response())
}
