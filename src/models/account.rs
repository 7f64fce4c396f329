use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Connection state of a user's marketplace account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccountStatus {
    Connected,
    NeedsReauth,
    Disconnected,
}

/// A browser cookie captured during the out-of-band login.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

/// Decrypted credential bundle that lets the browser act as the logged-in user.
///
/// Only ever held in memory for the duration of one platform run.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionPayload {
    pub cookies: Vec<SessionCookie>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

// Cookie values are credentials; keep them out of logs.
impl std::fmt::Debug for SessionPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPayload")
            .field("cookies", &self.cookies.len())
            .field("user_agent", &self.user_agent)
            .finish()
    }
}
