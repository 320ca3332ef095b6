use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::observability;

/// Login passwords. With a user list, only listed users get in, each with
/// their own password. Without one, every user name shares one password.
#[derive(Debug, Clone)]
pub struct SlotbookAuthSource {
    shared: String,
    users: Arc<BTreeMap<String, String>>,
}

impl SlotbookAuthSource {
    pub fn new(shared: String, users: BTreeMap<String, String>) -> Self {
        Self {
            shared,
            users: Arc::new(users),
        }
    }

    pub fn shared(password: String) -> Self {
        Self::new(password, BTreeMap::new())
    }

    pub fn password_for(&self, user: &str) -> Option<&str> {
        if self.users.is_empty() {
            return Some(&self.shared);
        }
        self.users.get(user).map(String::as_str)
    }
}

/// Parse `name:password` pairs separated by commas. `None` on an empty name
/// or password, a missing colon, or a repeated name.
pub fn parse_users(raw: &str) -> Option<BTreeMap<String, String>> {
    let mut users = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, password) = entry.split_once(':')?;
        let name = name.trim();
        if name.is_empty() || password.is_empty() {
            return None;
        }
        if users.insert(name.to_string(), password.to_string()).is_some() {
            return None;
        }
    }
    Some(users)
}

#[async_trait]
impl AuthSource for SlotbookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let login_user = login.user();
        let user = login_user.as_deref().unwrap_or("");
        match self.password_for(user) {
            Some(password) => Ok(Password::new(None, password.as_bytes().to_vec())),
            None => {
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                tracing::warn!(user, "login refused: unknown user");
                Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                    "FATAL".into(),
                    "28P01".into(),
                    format!("password authentication failed for user \"{user}\""),
                ))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_password_for_any_user() {
        let auth = SlotbookAuthSource::shared("s3cret".into());
        assert_eq!(auth.password_for("alice"), Some("s3cret"));
        assert_eq!(auth.password_for(""), Some("s3cret"));
    }

    #[test]
    fn user_list_is_closed() {
        let users = parse_users("front-desk:desk1, reports:r3p").unwrap();
        let auth = SlotbookAuthSource::new("ignored".into(), users);
        assert_eq!(auth.password_for("front-desk"), Some("desk1"));
        assert_eq!(auth.password_for("reports"), Some("r3p"));
        assert_eq!(auth.password_for("slotbook"), None);
    }

    #[test]
    fn password_may_contain_colons() {
        let users = parse_users("ops:a:b").unwrap();
        assert_eq!(users.get("ops").map(String::as_str), Some("a:b"));
    }

    #[test]
    fn malformed_user_lists() {
        assert!(parse_users("nocolon").is_none());
        assert!(parse_users(":pw").is_none());
        assert!(parse_users("name:").is_none());
        assert!(parse_users("a:1,a:2").is_none());
        assert_eq!(parse_users(""), Some(BTreeMap::new()));
    }
}
