use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkchatError};
use crate::workchat::{Workchat, ids::UserId, message_streaming::ChatUpdate};

/// A member of the company directory. Read-only from the chat's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "_id")]
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl User {
    pub fn new(id: impl Into<UserId>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            first_name: None,
            last_name: None,
            email: None,
            avatar: None,
        }
    }

    /// Resolves the name shown in the sidebar and message headers.
    ///
    /// Fallback chain: "first last" -> first -> last -> username
    pub fn display_name(&self) -> String {
        let first = self.first_name.as_deref().map(str::trim).unwrap_or("");
        let last = self.last_name.as_deref().map(str::trim).unwrap_or("");
        match (first.is_empty(), last.is_empty()) {
            (false, false) => format!("{} {}", first, last),
            (false, true) => first.to_string(),
            (true, false) => last.to_string(),
            (true, true) => self.username.clone(),
        }
    }

    /// Case-insensitive match against the display name and the username.
    pub(crate) fn matches(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.display_name().to_lowercase().contains(&needle)
            || self.username.to_lowercase().contains(&needle)
    }
}

/// Every user the client knows about, in the order the directory returned them.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: Vec<User>,
}

impl UserDirectory {
    pub fn replace_all(&mut self, users: Vec<User>) {
        let mut deduped: Vec<User> = Vec::with_capacity(users.len());
        for user in users {
            if !deduped.iter().any(|u| u.id == user.id) {
                deduped.push(user);
            }
        }
        self.users = deduped;
    }

    pub fn get(&self, id: &UserId) -> Option<&User> {
        self.users.iter().find(|u| &u.id == id)
    }

    pub fn all(&self) -> &[User] {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Workchat {
    /// Reloads the user directory from `GET /users`.
    pub async fn refresh_users(&self) -> Result<Vec<User>> {
        let result = self.api.list_users().await.map_err(WorkchatError::from);
        let users = self.surface("refresh_users", result)?;

        tracing::debug!(
            target: "workchat::users::refresh_users",
            "Loaded {} users",
            users.len()
        );

        let mut state = self.state.write().await;
        state.users.replace_all(users.clone());
        self.streams.publish(ChatUpdate::UsersReplaced);
        Ok(users)
    }

    /// Looks up a user from the last directory load.
    pub async fn find_user(&self, id: &UserId) -> Option<User> {
        self.state.read().await.users.get(id).cloned()
    }
}
