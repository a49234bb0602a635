//! Token cache and interactive login.
//!
//! The poll loop only sees [`TokenSource`]: ask for a token, or throw the
//! current one away. How a fresh one is obtained (cache file, password
//! prompt, two-factor code) stays behind that trait.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::fs;
use tracing::{error, info, warn};

use crate::channels::{DiscordClient, LoginOutcome};
use crate::error::AuthError;
use crate::prompt::Prompt;

/// Opaque credential persisted in a local file.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached token, if any.
    pub async fn load(&self) -> Option<SecretString> {
        let raw = fs::read_to_string(&self.path).await.ok()?;
        let token = raw.trim();
        (!token.is_empty()).then(|| SecretString::from(token))
    }

    pub async fn store(&self, token: &SecretString) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, token.expose_secret()).await?;
        info!(path = %self.path.display(), "Token saved");
        Ok(())
    }

    /// Delete the cache file. A missing file is not an error.
    pub async fn clear(&self) -> std::io::Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "Token cache cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Supplies the credential used for every fetch.
#[async_trait]
pub trait TokenSource: Send {
    /// A usable token, authenticating first if none is held.
    async fn token(&mut self) -> Result<SecretString, AuthError>;

    /// Forget the current token so the next [`TokenSource::token`] call
    /// re-authenticates.
    async fn invalidate(&mut self);
}

/// Cache-first token source that falls back to a password login.
pub struct InteractiveLogin {
    client: DiscordClient,
    cache: TokenCache,
    prompt: Arc<dyn Prompt>,
    current: Option<SecretString>,
}

impl InteractiveLogin {
    pub fn new(client: DiscordClient, cache: TokenCache, prompt: Arc<dyn Prompt>) -> Self {
        Self {
            client,
            cache,
            prompt,
            current: None,
        }
    }

    /// One full login attempt: credentials, then a 2FA code if asked for.
    async fn login_once(&self) -> Result<SecretString, AuthError> {
        let email = self.prompt.ask("Email: ")?;
        let password = SecretString::from(self.prompt.ask_secret("Password: ")?);

        info!("Logging in via API");
        match self.client.login(email.trim(), &password).await? {
            LoginOutcome::Token(token) => Ok(token),
            LoginOutcome::MfaRequired { ticket } => {
                println!("Two-factor authentication required");
                let code = self.prompt.ask("Enter your 2FA code: ")?;
                self.client.submit_mfa(&ticket, code.trim()).await
            }
        }
    }

    async fn authenticate(&mut self) -> Result<SecretString, AuthError> {
        println!("Discord token not found. Please log in:");
        loop {
            match self.login_once().await {
                Ok(token) => {
                    info!("Login successful");
                    if let Err(e) = self.cache.store(&token).await {
                        warn!("Could not write token cache: {e}");
                    }
                    return Ok(token);
                }
                Err(e) => {
                    error!("Login failed: {e}");
                    if !self.prompt.confirm("Could not obtain a token. Retry login? (y/n): ")? {
                        return Err(AuthError::Declined);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TokenSource for InteractiveLogin {
    async fn token(&mut self) -> Result<SecretString, AuthError> {
        if let Some(token) = &self.current {
            return Ok(token.clone());
        }

        let token = match self.cache.load().await {
            Some(token) => {
                info!("Using saved token");
                token
            }
            None => self.authenticate().await?,
        };
        self.current = Some(token.clone());
        Ok(token)
    }

    async fn invalidate(&mut self) {
        self.current = None;
        if let Err(e) = self.cache.clear().await {
            warn!("Could not delete token cache: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::discord::{DEFAULT_TIMEOUT, RetryPolicy};
    use crate::prompt::ScriptedPrompt;
    use tempfile::TempDir;

    fn offline_client() -> DiscordClient {
        DiscordClient::new("1", DEFAULT_TIMEOUT)
            .unwrap()
            .with_base_url("http://127.0.0.1:1")
            .with_retry(RetryPolicy::none())
    }

    #[tokio::test]
    async fn cache_store_load_clear() {
        let dir = TempDir::new().unwrap();
        let cache = TokenCache::new(dir.path().join("discord_token.txt"));

        assert!(cache.load().await.is_none());
        cache.store(&SecretString::from("abc.def")).await.unwrap();
        assert_eq!(cache.load().await.unwrap().expose_secret(), "abc.def");

        cache.clear().await.unwrap();
        assert!(cache.load().await.is_none());
        cache.clear().await.unwrap();
    }

    #[tokio::test]
    async fn cache_trims_whitespace_and_ignores_blank() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("discord_token.txt");
        let cache = TokenCache::new(&path);

        std::fs::write(&path, "  tok\n").unwrap();
        assert_eq!(cache.load().await.unwrap().expose_secret(), "tok");

        std::fs::write(&path, "\n").unwrap();
        assert!(cache.load().await.is_none());
    }

    #[tokio::test]
    async fn cached_token_used_without_prompting() {
        let dir = TempDir::new().unwrap();
        let cache = TokenCache::new(dir.path().join("t.txt"));
        cache.store(&SecretString::from("cached")).await.unwrap();

        let prompt = Arc::new(ScriptedPrompt::default());
        let mut source = InteractiveLogin::new(offline_client(), cache, prompt.clone());

        assert_eq!(source.token().await.unwrap().expose_secret(), "cached");
        assert_eq!(source.token().await.unwrap().expose_secret(), "cached");
        assert!(prompt.asked().is_empty());
    }

    #[tokio::test]
    async fn invalidate_deletes_cache_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.txt");
        let cache = TokenCache::new(&path);
        cache.store(&SecretString::from("cached")).await.unwrap();

        let prompt = Arc::new(ScriptedPrompt::default());
        let mut source = InteractiveLogin::new(offline_client(), cache, prompt);
        source.token().await.unwrap();
        source.invalidate().await;

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn declining_retry_is_fatal() {
        let dir = TempDir::new().unwrap();
        let cache = TokenCache::new(dir.path().join("t.txt"));
        let prompt = Arc::new(ScriptedPrompt::new(["me@example.com", "pw", "n"]));
        let mut source = InteractiveLogin::new(offline_client(), cache, prompt.clone());

        let err = source.token().await.unwrap_err();
        assert!(matches!(err, AuthError::Declined));
        assert_eq!(prompt.asked().len(), 3);
    }
}
