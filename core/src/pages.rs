//! Screen-level flows that tie queries, the form, and operations together.
//!
//! Pages own navigation: the `UserOperations` they build never navigate on
//! their own, so a create that still has an image to attach does not leave
//! the page half way through.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::api::UsersApi;
use crate::cache::QueryCache;
use crate::error::ApiError;
use crate::form::{FormMode, UserForm};
use crate::image_retry::{ImageProbe, RetryPolicy};
use crate::operations::{Confirm, Navigator, OperationError, OperationsOptions, UserOperations};
use crate::query::{get_key, QueryOptions, UserQuery, UsersQuery, LIST_OPERATION};
use crate::table::UserTable;
use crate::types::{CreateUser, DeleteUserResponse, ListUsersParams, UpdateUser, User};

pub const IMAGE_UPLOAD_FAILED_MESSAGE: &str = "Image upload failed";

#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    #[error("form has validation errors")]
    Invalid,

    #[error("a submission is already in progress")]
    Busy,

    #[error("the user has not been loaded")]
    NotLoaded,

    #[error(transparent)]
    Operation(#[from] OperationError),

    /// Nothing was written.
    #[error("image upload failed: {0}")]
    Upload(#[source] ApiError),

    /// The user was created but its image was not attached.
    #[error("image upload failed: {source}")]
    ImageNotAttached { user: Box<User>, source: ApiError },
}

impl SubmitError {
    /// Text shown next to the form.
    pub fn user_message(&self) -> String {
        match self {
            SubmitError::Operation(OperationError::Failed { message, .. }) => message.clone(),
            SubmitError::Upload(_) | SubmitError::ImageNotAttached { .. } => {
                IMAGE_UPLOAD_FAILED_MESSAGE.to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Where a page goes once its flow completes.
#[derive(Clone)]
struct Redirect {
    path: Option<String>,
    navigator: Option<Arc<dyn Navigator>>,
}

impl Redirect {
    /// Take navigation out of `options` so the page can do it last.
    fn split(mut options: OperationsOptions) -> (Self, OperationsOptions) {
        let redirect = Self {
            path: options.redirect_to.take(),
            navigator: options.navigator.take(),
        };
        (redirect, options)
    }

    fn go(&self) {
        if let (Some(path), Some(navigator)) = (&self.path, &self.navigator) {
            navigator.navigate(path);
        }
    }
}

/// The users list with a delete action per row.
pub struct UsersPage {
    query: UsersQuery,
    operations: UserOperations,
    table: UserTable,
}

impl UsersPage {
    pub fn new(
        api: UsersApi,
        cache: QueryCache,
        probe: Arc<dyn ImageProbe>,
        options: OperationsOptions,
    ) -> Self {
        Self::with_settings(
            api,
            cache,
            ListUsersParams::default(),
            QueryOptions::default(),
            probe,
            RetryPolicy::default(),
            options,
        )
    }

    pub fn with_settings(
        api: UsersApi,
        cache: QueryCache,
        params: ListUsersParams,
        query_options: QueryOptions,
        probe: Arc<dyn ImageProbe>,
        retry: RetryPolicy,
        options: OperationsOptions,
    ) -> Self {
        Self {
            query: UsersQuery::with_options(api.clone(), cache, params, query_options),
            operations: UserOperations::new(api, options),
            table: UserTable::with_policy(probe, retry),
        }
    }

    pub fn query(&self) -> &UsersQuery {
        &self.query
    }

    pub fn operations(&self) -> &UserOperations {
        &self.operations
    }

    pub fn table(&self) -> &UserTable {
        &self.table
    }

    pub fn is_loading(&self) -> bool {
        self.query.is_loading()
    }

    pub fn error(&self) -> Option<ApiError> {
        self.query.error()
    }

    /// Load the list (cached when possible) into the table.
    pub async fn load(&mut self) -> Result<(), ApiError> {
        let users = self.query.load().await?;
        self.table.set_users(users);
        Ok(())
    }

    /// Refetch the list, e.g. from a retry button.
    pub async fn reload(&mut self) -> Result<(), ApiError> {
        let users = self.query.refetch().await?;
        self.table.set_users(users);
        Ok(())
    }

    /// Confirm and delete, then refresh the list. A failed refresh after a
    /// successful delete is logged and left on the query.
    pub async fn delete(
        &mut self,
        id: &str,
        confirm: &dyn Confirm,
    ) -> Result<Option<DeleteUserResponse>, OperationError> {
        let Some(deleted) = self.operations.delete_user(id, confirm).await? else {
            return Ok(None);
        };
        if let Err(e) = self.reload().await {
            warn!(error = %e, "List refresh after delete failed");
        }
        Ok(Some(deleted))
    }
}

/// Create form. An optional image is uploaded after the user exists and
/// attached with a follow-up update.
pub struct NewUserPage {
    api: UsersApi,
    cache: QueryCache,
    form: UserForm,
    operations: UserOperations,
    redirect: Redirect,
    message: Option<String>,
}

impl NewUserPage {
    pub fn new(api: UsersApi, cache: QueryCache, options: OperationsOptions) -> Self {
        let (redirect, options) = Redirect::split(options);
        Self {
            operations: UserOperations::new(api.clone(), options),
            api,
            cache,
            form: UserForm::create(),
            redirect,
            message: None,
        }
    }

    pub fn form(&self) -> &UserForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut UserForm {
        &mut self.form
    }

    /// Message from the last failed submit.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub async fn submit(&mut self) -> Result<User, SubmitError> {
        if self.form.is_submitting() {
            return Err(SubmitError::Busy);
        }
        if !self.form.validate() {
            return Err(SubmitError::Invalid);
        }
        self.message = None;
        self.form.set_submitting(true);
        let result = self.create().await;
        self.form.set_submitting(false);

        match &result {
            Ok(_) => self.redirect.go(),
            Err(e) => self.message = Some(e.user_message()),
        }
        result
    }

    async fn create(&mut self) -> Result<User, SubmitError> {
        let input = CreateUser::from(self.form.submit_data());
        let user = self.operations.create_user(&input).await?;
        self.cache.invalidate_operation(LIST_OPERATION);

        let Some(file) = self.form.selected_image().cloned() else {
            return Ok(user);
        };
        let attach = async {
            let url = self.api.upload_image(&file, Some(&user.id)).await?;
            let update = UpdateUser {
                image_url: Some(Some(url)),
                ..Default::default()
            };
            self.api.update(&user.id, &update).await
        };
        match attach.await {
            Ok(user) => {
                info!(id = %user.id, "Attached image to new user");
                self.cache.invalidate_operation(LIST_OPERATION);
                Ok(user)
            }
            Err(source) => {
                warn!(id = %user.id, error = %source, "Image upload for new user failed");
                Err(SubmitError::ImageNotAttached {
                    user: Box::new(user),
                    source,
                })
            }
        }
    }
}

/// Edit form seeded from the user query.
pub struct EditUserPage {
    api: UsersApi,
    cache: QueryCache,
    query: UserQuery,
    form: UserForm,
    operations: UserOperations,
    redirect: Redirect,
    message: Option<String>,
}

impl EditUserPage {
    pub fn new(api: UsersApi, cache: QueryCache, id: &str, options: OperationsOptions) -> Self {
        let (redirect, options) = Redirect::split(options);
        Self {
            query: UserQuery::new(api.clone(), cache.clone(), id),
            operations: UserOperations::new(api.clone(), options),
            api,
            cache,
            form: UserForm::new(FormMode::Edit, None),
            redirect,
            message: None,
        }
    }

    pub fn id(&self) -> &str {
        self.query.id()
    }

    pub fn query(&self) -> &UserQuery {
        &self.query
    }

    pub fn form(&self) -> &UserForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut UserForm {
        &mut self.form
    }

    pub fn not_found(&self) -> bool {
        self.query.not_found()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Fetch the user and seed the form. A different record than the one
    /// already shown replaces the form state; the same record keeps edits.
    pub async fn load(&mut self) -> Result<Option<User>, ApiError> {
        let user = self.query.load().await?;
        if let Some(user) = &user {
            self.form.sync_source(FormMode::Edit, Some(user));
        }
        Ok(user)
    }

    pub async fn submit(&mut self) -> Result<User, SubmitError> {
        if self.form.is_submitting() {
            return Err(SubmitError::Busy);
        }
        if self.query.user().is_none() {
            return Err(SubmitError::NotLoaded);
        }
        if !self.form.validate() {
            return Err(SubmitError::Invalid);
        }
        self.message = None;
        self.form.set_submitting(true);
        let result = self.update().await;
        self.form.set_submitting(false);

        match &result {
            Ok(_) => self.redirect.go(),
            Err(e) => self.message = Some(e.user_message()),
        }
        result
    }

    async fn update(&mut self) -> Result<User, SubmitError> {
        let id = self.query.id().to_string();
        let mut update = UpdateUser::from(self.form.submit_data());

        if let Some(file) = self.form.selected_image().cloned() {
            let url = self
                .api
                .upload_image(&file, Some(&id))
                .await
                .map_err(SubmitError::Upload)?;
            update.image_url = Some(Some(url));
        } else if self.form.remove_image() {
            update.image_url = Some(None);
        }

        let user = self.operations.update_user(&id, &update).await?;
        self.cache.invalidate_operation(LIST_OPERATION);
        self.cache.invalidate(&get_key(&id));
        Ok(user)
    }
}
