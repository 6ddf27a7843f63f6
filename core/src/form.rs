//! Editable user form state and validation.
//!
//! # Design
//! `UserForm` never aliases a server `User`: seeding copies the editable
//! fields (already coerced by `loose_string` when the record was decoded),
//! and `reset_for` replaces the whole state so a form re-seeded with another
//! record carries nothing over from the previous one. The last seeded record
//! is kept as a copy so a repeated render with the same record does not wipe
//! in-progress edits.
//!
//! The image preview is derived, never stored: a selected file wins, then
//! the remove flag (no image), then the record's existing URL.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;

use crate::types::{CreateUser, ImageFile, UpdateUser, User};

pub const REQUIRED_MESSAGE: &str = "Required";
pub const INVALID_EMAIL_MESSAGE: &str = "Please enter a valid email address";

/// Total conversion of a loosely-typed JSON value to form text.
///
/// | Input | Output |
/// |---|---|
/// | string | the string itself |
/// | number | its decimal representation |
/// | null, bool, array, object | `""` |
pub fn loose_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => String::new(),
    }
}

/// `local@domain.tld`: no whitespace or extra `@`, and a dotted suffix.
pub fn is_valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FormField {
    Email,
    Name,
    Phone,
}

impl FormField {
    pub fn as_str(self) -> &'static str {
        match self {
            FormField::Email => "email",
            FormField::Name => "name",
            FormField::Phone => "phone",
        }
    }
}

pub type FieldErrors = BTreeMap<FormField, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    pub email: String,
    pub name: String,
    pub phone: String,
}

impl FormData {
    fn from_user(user: &User) -> Self {
        Self {
            email: user.email.clone(),
            name: user.name.clone(),
            phone: user.phone.clone().unwrap_or_default(),
        }
    }

    fn field_mut(&mut self, field: FormField) -> &mut String {
        match field {
            FormField::Email => &mut self.email,
            FormField::Name => &mut self.name,
            FormField::Phone => &mut self.phone,
        }
    }
}

/// What the image area should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePreview<'a> {
    Selected(&'a ImageFile),
    Existing(&'a str),
    None,
}

/// Outbound payload. `phone` is `None` when the field was left empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitData {
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
}

impl From<SubmitData> for CreateUser {
    fn from(data: SubmitData) -> Self {
        CreateUser {
            email: data.email,
            name: data.name,
            phone: data.phone,
            image_url: None,
        }
    }
}

impl From<SubmitData> for UpdateUser {
    fn from(data: SubmitData) -> Self {
        UpdateUser {
            email: Some(data.email),
            name: Some(data.name),
            phone: Some(data.phone),
            image_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserForm {
    mode: FormMode,
    source: Option<User>,
    data: FormData,
    errors: FieldErrors,
    is_submitting: bool,
    selected_file: Option<ImageFile>,
    remove_image: bool,
    initial_image_url: Option<String>,
}

impl UserForm {
    pub fn new(mode: FormMode, source: Option<&User>) -> Self {
        let mut form = Self {
            mode,
            source: None,
            data: FormData::default(),
            errors: FieldErrors::new(),
            is_submitting: false,
            selected_file: None,
            remove_image: false,
            initial_image_url: None,
        };
        form.reset_for(mode, source);
        form
    }

    pub fn create() -> Self {
        Self::new(FormMode::Create, None)
    }

    pub fn edit(user: &User) -> Self {
        Self::new(FormMode::Edit, Some(user))
    }

    /// Replace the whole form state for a (possibly new) mode and source.
    ///
    /// Create mode always starts empty. Edit mode copies the source's
    /// editable fields; an edit form without a source stays empty until one
    /// arrives.
    pub fn reset_for(&mut self, mode: FormMode, source: Option<&User>) {
        let source = source.filter(|_| mode == FormMode::Edit);
        self.mode = mode;
        self.source = source.cloned();
        self.data = source.map(FormData::from_user).unwrap_or_default();
        self.initial_image_url = source.and_then(|u| u.image_url.clone());
        self.errors.clear();
        self.is_submitting = false;
        self.selected_file = None;
        self.remove_image = false;
    }

    /// Re-seed only when the mode or the source record changed; a record
    /// equal to the one last seeded keeps the user's edits.
    ///
    /// Returns whether the form was reset.
    pub fn sync_source(&mut self, mode: FormMode, source: Option<&User>) -> bool {
        let incoming = source.filter(|_| mode == FormMode::Edit);
        if self.mode == mode && self.source.as_ref() == incoming {
            return false;
        }
        self.reset_for(mode, source);
        true
    }

    /// Empty every field and drop the image selection and errors.
    pub fn reset(&mut self) {
        self.reset_for(FormMode::Create, None);
    }

    pub fn mode(&self) -> FormMode {
        self.mode
    }

    pub fn data(&self) -> &FormData {
        &self.data
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn error(&self, field: FormField) -> Option<&str> {
        self.errors.get(&field).map(String::as_str)
    }

    pub fn handle_change(&mut self, field: FormField, value: impl Into<String>) {
        *self.data.field_mut(field) = value.into();
        self.errors.remove(&field);
    }

    /// Change a field from a loosely-typed value.
    pub fn handle_change_value(&mut self, field: FormField, value: &Value) {
        self.handle_change(field, loose_string(value));
    }

    /// Recompute the whole error map; true when it is empty.
    pub fn validate(&mut self) -> bool {
        let mut errors = FieldErrors::new();
        if self.data.email.is_empty() {
            errors.insert(FormField::Email, REQUIRED_MESSAGE.to_string());
        } else if !is_valid_email(&self.data.email) {
            errors.insert(FormField::Email, INVALID_EMAIL_MESSAGE.to_string());
        }
        if self.data.name.is_empty() {
            errors.insert(FormField::Name, REQUIRED_MESSAGE.to_string());
        }
        self.errors = errors;
        self.errors.is_empty()
    }

    /// No stored errors and both required fields filled.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && !self.data.email.is_empty() && !self.data.name.is_empty()
    }

    pub fn submit_data(&self) -> SubmitData {
        SubmitData {
            email: self.data.email.clone(),
            name: self.data.name.clone(),
            phone: (!self.data.phone.is_empty()).then(|| self.data.phone.clone()),
        }
    }

    pub fn is_submitting(&self) -> bool {
        self.is_submitting
    }

    pub fn set_submitting(&mut self, submitting: bool) {
        self.is_submitting = submitting;
    }

    /// Pick a file; this cancels a pending removal.
    pub fn select_image(&mut self, file: ImageFile) {
        self.selected_file = Some(file);
        self.remove_image = false;
    }

    pub fn clear_selected_image(&mut self) {
        self.selected_file = None;
    }

    /// Toggle removal of the existing image; setting it drops any selection.
    pub fn set_remove_image(&mut self, remove: bool) {
        self.remove_image = remove;
        if remove {
            self.selected_file = None;
        }
    }

    pub fn selected_image(&self) -> Option<&ImageFile> {
        self.selected_file.as_ref()
    }

    pub fn remove_image(&self) -> bool {
        self.remove_image
    }

    pub fn initial_image_url(&self) -> Option<&str> {
        self.initial_image_url.as_deref()
    }

    /// Whether the "remove image" toggle applies: editing a record that has
    /// an image, with no new file selected.
    pub fn can_remove_image(&self) -> bool {
        self.mode == FormMode::Edit && self.initial_image_url.is_some() && self.selected_file.is_none()
    }

    pub fn preview(&self) -> ImagePreview<'_> {
        if let Some(file) = &self.selected_file {
            return ImagePreview::Selected(file);
        }
        if self.remove_image {
            return ImagePreview::None;
        }
        match &self.initial_image_url {
            Some(url) => ImagePreview::Existing(url),
            None => ImagePreview::None,
        }
    }
}
