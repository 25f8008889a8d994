use std::sync::Mutex;
use tracing::error;

/// Maximum accepted user id length, matching the ingestion service limit.
const MAX_USER_ID_LENGTH: usize = 256;

/// Ambient user identity, stamped onto records that do not carry one.
pub struct UserIdContext {
    user_id: Mutex<Option<String>>,
}

impl UserIdContext {
    pub fn new() -> Self {
        Self {
            user_id: Mutex::new(None),
        }
    }

    /// Set the ambient user id. Returns false (and leaves the previous
    /// value in place) if the id exceeds the service limit.
    pub fn set_user_id(&self, user_id: Option<String>) -> bool {
        if let Some(id) = &user_id {
            if id.len() > MAX_USER_ID_LENGTH {
                error!(
                    length = id.len(),
                    limit = MAX_USER_ID_LENGTH,
                    "Rejected user id above the length limit"
                );
                return false;
            }
        }
        *self.user_id.lock().unwrap() = user_id;
        true
    }

    pub fn user_id(&self) -> Option<String> {
        self.user_id.lock().unwrap().clone()
    }
}

impl Default for UserIdContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let context = UserIdContext::new();
        assert_eq!(context.user_id(), None);
        assert!(context.set_user_id(Some("alice".to_string())));
        assert_eq!(context.user_id().as_deref(), Some("alice"));
        assert!(context.set_user_id(None));
        assert_eq!(context.user_id(), None);
    }

    #[test]
    fn test_overlong_id_is_rejected() {
        let context = UserIdContext::new();
        context.set_user_id(Some("alice".to_string()));
        let long = "x".repeat(MAX_USER_ID_LENGTH + 1);
        assert!(!context.set_user_id(Some(long)));
        assert_eq!(context.user_id().as_deref(), Some("alice"));
    }
}
