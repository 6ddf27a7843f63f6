//! Row model for the users table.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinSet;
use tracing::debug;

use crate::image_retry::{
    load_image_with_retry, ImageLoadOutcome, ImageProbe, ImageRetryTracker, RetryDecision,
    RetryPolicy,
};
use crate::types::User;

pub use crate::image_retry::ImageCell;

pub const EMPTY_MESSAGE: &str = "No users yet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub phone: String,
    pub image: ImageCell,
}

pub struct UserTable {
    users: Vec<User>,
    images: Arc<Mutex<ImageRetryTracker>>,
    probe: Arc<dyn ImageProbe>,
}

impl std::fmt::Debug for UserTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserTable")
            .field("users", &self.users)
            .field("images", &self.images)
            .finish_non_exhaustive()
    }
}

impl UserTable {
    pub fn new(probe: Arc<dyn ImageProbe>) -> Self {
        Self::with_policy(probe, RetryPolicy::default())
    }

    pub fn with_policy(probe: Arc<dyn ImageProbe>, policy: RetryPolicy) -> Self {
        Self {
            users: Vec::new(),
            images: Arc::new(Mutex::new(ImageRetryTracker::new(policy))),
            probe,
        }
    }

    fn tracker(&self) -> MutexGuard<'_, ImageRetryTracker> {
        self.images.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the rows with a freshly fetched list. Any retry bookkeeping
    /// from the previous list is dropped, even when the ids are unchanged.
    pub fn set_users(&mut self, users: Vec<User>) {
        let mut tracker = self.tracker();
        tracker.reset();
        tracker.sync_rows(users.iter().map(|u| u.id.as_str()));
        drop(tracker);
        self.users = users;
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Shown instead of the table when there are no rows.
    pub fn empty_message(&self) -> Option<&'static str> {
        self.is_empty().then_some(EMPTY_MESSAGE)
    }

    pub fn rows(&self) -> Vec<UserRow> {
        let tracker = self.tracker();
        self.users
            .iter()
            .map(|user| UserRow {
                id: user.id.clone(),
                email: user.email.clone(),
                name: user.name.clone(),
                phone: user.phone.clone().unwrap_or_default(),
                image: tracker.image_state(&user.id, user.image_url.as_deref()),
            })
            .collect()
    }

    /// The renderer reports a failed image load for `user_id`.
    pub fn on_image_error(&self, user_id: &str) -> RetryDecision {
        let Some(url) = self.image_url(user_id) else {
            return RetryDecision::GiveUp;
        };
        self.tracker().on_error(user_id, &url)
    }

    /// The renderer reports a successful image load for `user_id`.
    pub fn on_image_load(&self, user_id: &str) {
        self.tracker().on_load(user_id);
    }

    fn image_url(&self, user_id: &str) -> Option<String> {
        self.users
            .iter()
            .find(|u| u.id == user_id)
            .and_then(|u| u.image_url.clone())
            .filter(|url| !url.is_empty())
    }

    /// Drive every row image to a final state concurrently. Rows refreshed
    /// away while loading come back as `Superseded`.
    pub async fn load_images(&self) -> Vec<(String, ImageLoadOutcome)> {
        let mut tasks = JoinSet::new();
        for user in &self.users {
            let Some(url) = user.image_url.clone().filter(|url| !url.is_empty()) else {
                continue;
            };
            let id = user.id.clone();
            let probe = Arc::clone(&self.probe);
            let images = Arc::clone(&self.images);
            tasks.spawn(async move {
                let outcome = load_image_with_retry(probe.as_ref(), &images, &id, &url).await;
                (id, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => debug!(error = %e, "Image load task ended early"),
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn user(id: &str, image: Option<&str>) -> User {
        User {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            name: format!("User {id}"),
            phone: None,
            image_url: image.map(str::to_string),
            created_at: None,
            updated_at: None,
        }
    }

    /// Fails each URL prefix a fixed number of times before succeeding.
    #[derive(Default)]
    struct PerUrlProbe {
        failures: HashMap<String, u32>,
        calls: Mutex<HashMap<String, u32>>,
        total: AtomicU32,
    }

    #[async_trait]
    impl ImageProbe for PerUrlProbe {
        async fn probe(&self, url: &str) -> bool {
            self.total.fetch_add(1, Ordering::SeqCst);
            let base = url.split('?').next().unwrap_or(url).to_string();
            let mut calls = self.calls.lock().unwrap();
            let seen = calls.entry(base.clone()).or_insert(0);
            *seen += 1;
            *seen > self.failures.get(&base).copied().unwrap_or(0)
        }
    }

    #[test]
    fn empty_table_shows_message() {
        let table = UserTable::new(Arc::new(PerUrlProbe::default()));
        assert_eq!(table.empty_message(), Some(EMPTY_MESSAGE));
        assert!(table.rows().is_empty());
    }

    #[test]
    fn rows_reflect_users_and_images() {
        let mut table = UserTable::new(Arc::new(PerUrlProbe::default()));
        let mut with_phone = user("1", Some("http://i/1.png"));
        with_phone.phone = Some("555".to_string());
        table.set_users(vec![with_phone, user("2", None)]);

        assert_eq!(table.empty_message(), None);
        let rows = table.rows();
        assert_eq!(rows[0].phone, "555");
        assert_eq!(rows[0].image, ImageCell::Image("http://i/1.png".to_string()));
        assert_eq!(rows[1].phone, "");
        assert_eq!(rows[1].image, ImageCell::None);
    }

    #[test]
    fn exhausted_row_shows_placeholder_until_refresh() {
        let mut table = UserTable::new(Arc::new(PerUrlProbe::default()));
        let users = vec![user("1", Some("http://i/1.png")), user("2", Some("http://i/2.png"))];
        table.set_users(users.clone());

        for _ in 0..10 {
            assert!(matches!(table.on_image_error("1"), RetryDecision::Retry { .. }));
        }
        assert_eq!(table.on_image_error("1"), RetryDecision::GiveUp);

        let rows = table.rows();
        assert_eq!(rows[0].image, ImageCell::Placeholder);
        assert_eq!(rows[1].image, ImageCell::Image("http://i/2.png".to_string()));

        table.set_users(users);
        assert_eq!(
            table.rows()[0].image,
            ImageCell::Image("http://i/1.png".to_string())
        );
    }

    #[test]
    fn late_load_clears_retry_state() {
        let mut table = UserTable::new(Arc::new(PerUrlProbe::default()));
        table.set_users(vec![user("1", Some("http://i/1.png"))]);
        for _ in 0..3 {
            table.on_image_error("1");
        }
        assert_eq!(
            table.rows()[0].image,
            ImageCell::Image("http://i/1.png?_retry=3".to_string())
        );
        table.on_image_load("1");
        assert_eq!(
            table.rows()[0].image,
            ImageCell::Image("http://i/1.png".to_string())
        );
    }

    #[test]
    fn error_for_row_without_image_gives_up() {
        let mut table = UserTable::new(Arc::new(PerUrlProbe::default()));
        table.set_users(vec![user("1", None)]);
        assert_eq!(table.on_image_error("1"), RetryDecision::GiveUp);
        assert_eq!(table.on_image_error("missing"), RetryDecision::GiveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn load_images_settles_each_row_independently() {
        let probe = PerUrlProbe {
            failures: HashMap::from([
                ("http://i/1.png".to_string(), 3),
                ("http://i/2.png".to_string(), u32::MAX),
            ]),
            ..Default::default()
        };
        let mut table = UserTable::new(Arc::new(probe));
        table.set_users(vec![
            user("1", Some("http://i/1.png")),
            user("2", Some("http://i/2.png")),
            user("3", None),
        ]);

        let outcomes = table.load_images().await;
        assert_eq!(
            outcomes,
            vec![
                (
                    "1".to_string(),
                    ImageLoadOutcome::Loaded("http://i/1.png?_retry=3".to_string())
                ),
                ("2".to_string(), ImageLoadOutcome::Placeholder),
            ]
        );
        let rows = table.rows();
        assert_eq!(rows[0].image, ImageCell::Image("http://i/1.png".to_string()));
        assert_eq!(rows[1].image, ImageCell::Placeholder);
        assert_eq!(rows[2].image, ImageCell::None);
    }
}
