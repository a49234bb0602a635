//! Channel abstraction for fetching chat messages.

pub mod discord;

pub use discord::{DiscordClient, LoginOutcome, RetryPolicy};

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// A chat message as returned by the channel API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    #[serde(default)]
    pub author: Author,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    #[serde(default)]
    pub timestamp: String,
}

impl ChannelMessage {
    pub fn new(id: &str, author_id: &str, content: &str) -> Self {
        Self {
            id: id.to_string(),
            author: Author {
                id: author_id.to_string(),
                username: "Unknown".to_string(),
            },
            content: content.to_string(),
            timestamp: String::new(),
        }
    }

    pub fn author_id(&self) -> &str {
        &self.author.id
    }
}

/// Message author. Only the id takes part in filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub id: String,
    #[serde(default = "unknown_username")]
    pub username: String,
}

impl Default for Author {
    fn default() -> Self {
        Self {
            id: String::new(),
            username: unknown_username(),
        }
    }
}

fn unknown_username() -> String {
    "Unknown".to_string()
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// The account the token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    #[serde(default = "unknown_username")]
    pub username: String,
}

/// One page of channel history, in server order (newest first).
pub type Page = Vec<ChannelMessage>;

/// Source of channel history.
///
/// Implementations own their transport-level retries; whatever error comes
/// back has already exhausted them.
#[async_trait]
pub trait ChannelFetcher: Send + Sync {
    /// Fetch up to `limit` messages, optionally older than `before`.
    async fn fetch(
        &self,
        token: &SecretString,
        limit: u8,
        before: Option<&str>,
    ) -> Result<Page, FetchError>;

    /// Look up the account behind `token`.
    async fn current_user(&self, token: &SecretString) -> Result<CurrentUser, FetchError>;
}
