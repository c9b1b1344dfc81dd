//! Records passed into the repositories.

/// A user as captured by onboarding, before any sync cycle ran.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: String,
    pub username: String,
    pub chat_handle: String,
    pub refresh_token: String,
}

impl NewUser {
    /// Chat handles are matched case-insensitively; store them lower-cased
    /// and without a leading `@`.
    pub fn normalize_handle(handle: &str) -> String {
        handle.trim().trim_start_matches('@').to_lowercase()
    }
}
