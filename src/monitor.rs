//! Poll loop — fetch → filter → dedup → extract → deliver.
//!
//! One [`Monitor`] owns every piece of mutable state: the filters, the
//! dedup ledger, the current token and the consecutive-error counter.
//! It runs on a single task and never issues two requests at once.
//!
//! Each fetch takes the newest page only, with no `before` cursor. A burst
//! of more than `page_limit` messages between two polls will skip the
//! oldest ones.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use secrecy::SecretString;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::auth::TokenSource;
use crate::channels::{ChannelFetcher, ChannelMessage};
use crate::codes::extract_codes;
use crate::config::MonitorConfig;
use crate::error::{AuthError, FetchError};
use crate::filters::{FilterConfig, FilterStore};
use crate::ledger::DedupLedger;
use crate::sink::{CodeSink, Delivery};

/// Linear backoff over consecutive fetch failures.
#[derive(Debug, Clone)]
pub struct ErrorBackoff {
    poll_interval: Duration,
    threshold: u32,
    consecutive: u32,
}

/// What to do after a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffStep {
    /// Sleep this long before the next attempt.
    pub wait: Duration,
    /// Too many failures in a row: get a fresh token.
    pub refresh_token: bool,
    /// Counter value after this failure.
    pub consecutive: u32,
}

impl ErrorBackoff {
    pub fn new(poll_interval: Duration, threshold: u32) -> Self {
        Self {
            poll_interval,
            threshold: threshold.max(1),
            consecutive: 0,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Count a failure. Hitting the threshold requests a token refresh and
    /// resets the counter.
    pub fn record_failure(&mut self) -> BackoffStep {
        self.consecutive += 1;
        let refresh_token = self.consecutive >= self.threshold;
        if refresh_token {
            self.consecutive = 0;
        }
        BackoffStep {
            wait: self.poll_interval.saturating_mul(1 + self.consecutive),
            refresh_token,
            consecutive: self.consecutive,
        }
    }
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Fetched(PageReport),
    Failed(BackoffStep),
}

/// Counts from processing one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageReport {
    /// Messages in the page.
    pub fetched: usize,
    /// Messages not seen before.
    pub new_messages: usize,
    /// New messages whose author passed the filter.
    pub admitted: usize,
    /// Codes handed to the sink, whether it accepted them or not.
    pub offered: Vec<String>,
}

/// The channel monitor.
pub struct Monitor {
    poll_interval: Duration,
    page_limit: u8,
    tick: Duration,
    fetcher: Box<dyn ChannelFetcher>,
    tokens: Box<dyn TokenSource>,
    sink: Box<dyn CodeSink>,
    store: Box<dyn FilterStore>,
    filters: FilterConfig,
    ledger: DedupLedger,
    backoff: ErrorBackoff,
    token: Option<SecretString>,
}

impl Monitor {
    pub fn new(
        config: &MonitorConfig,
        fetcher: Box<dyn ChannelFetcher>,
        tokens: Box<dyn TokenSource>,
        sink: Box<dyn CodeSink>,
        store: Box<dyn FilterStore>,
        filters: FilterConfig,
    ) -> Self {
        Self {
            poll_interval: config.poll_interval,
            page_limit: config.page_limit,
            tick: config.tick,
            fetcher,
            tokens,
            sink,
            store,
            filters,
            ledger: DedupLedger::new(),
            backoff: ErrorBackoff::new(config.poll_interval, config.max_consecutive_errors),
            token: None,
        }
    }

    pub fn filters(&self) -> &FilterConfig {
        &self.filters
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.backoff.consecutive()
    }

    async fn ensure_token(&mut self) -> Result<SecretString, AuthError> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        let token = self.tokens.token().await?;
        self.token = Some(token.clone());
        Ok(token)
    }

    async fn drop_token(&mut self) {
        self.token = None;
        self.tokens.invalidate().await;
    }

    /// Learn the logged-in user's id and persist it the first time.
    ///
    /// Lookup failures are logged and ignored; only a refused login is
    /// returned as an error.
    pub async fn discover_self(&mut self) -> Result<(), AuthError> {
        if self.filters.self_id().is_some() {
            return Ok(());
        }

        let token = self.ensure_token().await?;
        match self.fetcher.current_user(&token).await {
            Ok(user) => {
                info!(user_id = %user.id, username = %user.username, "Logged in");
                if self.filters.set_self_id(&user.id) {
                    info!("Current user {} will be automatically whitelisted", user.username);
                    if let Err(e) = self.store.save(&self.filters).await {
                        warn!("Could not save user filters: {e}");
                    }
                }
            }
            Err(e) => {
                warn!("Failed to get user info: {e}");
                if e.is_auth() {
                    self.drop_token().await;
                }
            }
        }
        Ok(())
    }

    /// Fetch the newest page once and process it, or account for the failure.
    ///
    /// Does not sleep; the returned [`BackoffStep`] says how long to wait.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, AuthError> {
        let token = self.ensure_token().await?;

        match self.fetcher.fetch(&token, self.page_limit, None).await {
            Ok(page) => {
                self.backoff.record_success();
                Ok(PollOutcome::Fetched(self.process_page(&page).await))
            }
            Err(e) => self.handle_fetch_error(e).await.map(PollOutcome::Failed),
        }
    }

    async fn handle_fetch_error(&mut self, error: FetchError) -> Result<BackoffStep, AuthError> {
        warn!("Error fetching messages: {error}");
        if error.is_auth() {
            info!("Token expired or invalid, will log in again");
            self.drop_token().await;
        }

        let step = self.backoff.record_failure();
        if step.refresh_token {
            warn!("Too many consecutive errors, refreshing token");
            self.drop_token().await;
            self.ensure_token().await?;
        }
        Ok(step)
    }

    /// Run a fetched page through filter, ledger, extractor and sink.
    ///
    /// Messages are handled in the order given.
    pub async fn process_page(&mut self, page: &[ChannelMessage]) -> PageReport {
        let mut report = PageReport {
            fetched: page.len(),
            ..Default::default()
        };

        for msg in page {
            if !self.ledger.mark_message_seen(&msg.id) {
                continue;
            }
            report.new_messages += 1;

            if !self.filters.admit(msg.author_id()) {
                debug!(
                    message_id = %msg.id,
                    author_id = %msg.author_id(),
                    "Skipping message from filtered user"
                );
                continue;
            }
            report.admitted += 1;

            info!(
                message_id = %msg.id,
                author = %msg.author.username,
                author_id = %msg.author_id(),
                timestamp = %msg.timestamp,
                "New message: {}",
                msg.content
            );

            let codes = extract_codes(&msg.content);
            if codes.is_empty() {
                continue;
            }
            info!("Found potential invite code(s): {}", codes.join(", "));

            for code in codes {
                if !self.ledger.is_new_code(&code) {
                    continue;
                }
                info!(code = %code, "New invite code detected");
                let delivery = self.sink.deliver(&code).await;
                self.ledger.mark_code_seen(&code);
                if delivery == Delivery::Declined {
                    debug!(code = %code, "Code declined, not retrying");
                }
                report.offered.push(code);
            }
        }

        report
    }

    /// Poll until `shutdown` is set.
    ///
    /// The flag is checked between iterations; a fetch or an operator
    /// prompt already in progress runs to completion first. Returns an
    /// error only when no token can be obtained.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<(), AuthError> {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            "Channel monitor started"
        );
        if self.filters.allow_active() {
            info!(
                "Whitelist active: only processing messages from {} users",
                self.filters.allow_count()
                    + usize::from(
                        self.filters
                            .self_id()
                            .is_some_and(|id| !self.filters.allowed().any(|a| a == id))
                    )
            );
        }
        if self.filters.ban_count() > 0 {
            info!(
                "Ban list active: ignoring messages from {} users",
                self.filters.ban_count()
            );
        }

        let mut last_check: Option<Instant> = None;
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Monitoring stopped by user");
                return Ok(());
            }

            let now = Instant::now();
            if last_check.is_none_or(|t| now.duration_since(t) >= self.poll_interval) {
                info!(
                    "Checking for new messages... ({})",
                    chrono::Local::now().format("%H:%M:%S")
                );
                if let PollOutcome::Failed(step) = self.poll_once().await? {
                    info!("Will retry in {} seconds", step.wait.as_secs());
                    tokio::time::sleep(step.wait).await;
                }
                last_check = Some(now);
            }

            tokio::time::sleep(self.tick).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use secrecy::ExposeSecret;

    use crate::channels::{CurrentUser, Page};
    use crate::error::ConfigError;

    // ── Fakes ───────────────────────────────────────────────────────

    type Script = Arc<Mutex<VecDeque<Result<Page, FetchError>>>>;

    /// Replays scripted fetch results; an exhausted script returns empty pages.
    struct ScriptedFetcher {
        script: Script,
        tokens_seen: Arc<Mutex<Vec<String>>>,
        user: Option<CurrentUser>,
    }

    #[async_trait]
    impl ChannelFetcher for ScriptedFetcher {
        async fn fetch(
            &self,
            token: &SecretString,
            _limit: u8,
            before: Option<&str>,
        ) -> Result<Page, FetchError> {
            assert!(before.is_none());
            self.tokens_seen
                .lock()
                .unwrap()
                .push(token.expose_secret().to_string());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn current_user(&self, _token: &SecretString) -> Result<CurrentUser, FetchError> {
            self.user.clone().ok_or(FetchError::Unauthorized {
                endpoint: "current user".into(),
            })
        }
    }

    #[derive(Default)]
    struct TokenLog {
        issued: u32,
        invalidated: u32,
    }

    /// Issues `token-1`, `token-2`, ... and counts invalidations.
    struct CountingTokens {
        log: Arc<Mutex<TokenLog>>,
        refuse: bool,
    }

    #[async_trait]
    impl TokenSource for CountingTokens {
        async fn token(&mut self) -> Result<SecretString, AuthError> {
            if self.refuse {
                return Err(AuthError::Declined);
            }
            let mut log = self.log.lock().unwrap();
            log.issued += 1;
            Ok(SecretString::from(format!("token-{}", log.issued)))
        }

        async fn invalidate(&mut self) {
            self.log.lock().unwrap().invalidated += 1;
        }
    }

    struct RecordingSink {
        delivered: Arc<Mutex<Vec<String>>>,
        answer: Delivery,
    }

    #[async_trait]
    impl CodeSink for RecordingSink {
        async fn deliver(&mut self, code: &str) -> Delivery {
            self.delivered.lock().unwrap().push(code.to_string());
            self.answer
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        saved: Arc<Mutex<Vec<FilterConfig>>>,
    }

    #[async_trait]
    impl FilterStore for MemoryStore {
        async fn load(&self) -> FilterConfig {
            self.saved.lock().unwrap().last().cloned().unwrap_or_default()
        }

        async fn save(&self, config: &FilterConfig) -> Result<(), ConfigError> {
            self.saved.lock().unwrap().push(config.clone());
            Ok(())
        }
    }

    struct Harness {
        monitor: Monitor,
        script: Script,
        tokens_seen: Arc<Mutex<Vec<String>>>,
        token_log: Arc<Mutex<TokenLog>>,
        delivered: Arc<Mutex<Vec<String>>>,
        saved: Arc<Mutex<Vec<FilterConfig>>>,
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_secs(5),
            ..MonitorConfig::default()
        }
    }

    fn harness_with(
        config: &MonitorConfig,
        filters: FilterConfig,
        answer: Delivery,
        user: Option<CurrentUser>,
    ) -> Harness {
        let script: Script = Arc::default();
        let tokens_seen = Arc::new(Mutex::new(Vec::new()));
        let token_log = Arc::new(Mutex::new(TokenLog::default()));
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let saved = Arc::new(Mutex::new(Vec::new()));

        let monitor = Monitor::new(
            config,
            Box::new(ScriptedFetcher {
                script: Arc::clone(&script),
                tokens_seen: Arc::clone(&tokens_seen),
                user,
            }),
            Box::new(CountingTokens {
                log: Arc::clone(&token_log),
                refuse: false,
            }),
            Box::new(RecordingSink {
                delivered: Arc::clone(&delivered),
                answer,
            }),
            Box::new(MemoryStore {
                saved: Arc::clone(&saved),
            }),
            filters,
        );

        Harness {
            monitor,
            script,
            tokens_seen,
            token_log,
            delivered,
            saved,
        }
    }

    fn harness(filters: FilterConfig) -> Harness {
        harness_with(&config(), filters, Delivery::Accepted, None)
    }

    impl Harness {
        fn push(&self, result: Result<Page, FetchError>) {
            self.script.lock().unwrap().push_back(result);
        }

        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().unwrap().clone()
        }
    }

    fn msg(id: &str, author: &str, content: &str) -> ChannelMessage {
        ChannelMessage::new(id, author, content)
    }

    fn transient() -> Result<Page, FetchError> {
        Err(FetchError::Status {
            status: 503,
            body: "unavailable".into(),
        })
    }

    fn unauthorized() -> Result<Page, FetchError> {
        Err(FetchError::Unauthorized {
            endpoint: "channel messages".into(),
        })
    }

    // ── Backoff ─────────────────────────────────────────────────────

    #[test]
    fn backoff_grows_linearly_then_refreshes() {
        let mut backoff = ErrorBackoff::new(Duration::from_secs(5), 5);
        let waits: Vec<_> = (0..4).map(|_| backoff.record_failure()).collect();
        assert_eq!(
            waits.iter().map(|s| s.wait.as_secs()).collect::<Vec<_>>(),
            vec![10, 15, 20, 25]
        );
        assert!(waits.iter().all(|s| !s.refresh_token));

        let fifth = backoff.record_failure();
        assert!(fifth.refresh_token);
        assert_eq!(fifth.consecutive, 0);
        assert_eq!(fifth.wait, Duration::from_secs(5));
        assert_eq!(backoff.consecutive(), 0);
    }

    #[test]
    fn backoff_saturates_on_huge_interval() {
        let mut backoff = ErrorBackoff::new(Duration::from_secs(u64::MAX), 5);
        let step = backoff.record_failure();
        assert_eq!(step.wait, Duration::MAX);
        assert_eq!(step.consecutive, 1);
    }

    #[test]
    fn backoff_resets_on_success() {
        let mut backoff = ErrorBackoff::new(Duration::from_secs(2), 5);
        backoff.record_failure();
        backoff.record_failure();
        backoff.record_success();
        assert_eq!(backoff.consecutive(), 0);
        assert_eq!(backoff.record_failure().wait, Duration::from_secs(4));
    }

    // ── Page processing ─────────────────────────────────────────────

    #[tokio::test]
    async fn whitelisted_code_delivered_once() {
        let mut h = harness(FilterConfig::new().with_allowed(["42"]));
        let page = vec![msg("100", "42", "code: XJ7K2M here")];
        h.push(Ok(page.clone()));
        h.push(Ok(page));

        let report = match h.monitor.poll_once().await.unwrap() {
            PollOutcome::Fetched(report) => report,
            other => panic!("expected a fetched page, got {other:?}"),
        };
        assert_eq!(report.offered, vec!["XJ7K2M"]);
        assert_eq!(h.delivered(), vec!["XJ7K2M"]);
        assert!(!h.monitor.ledger().is_new_message("100"));
        assert!(!h.monitor.ledger().is_new_code("XJ7K2M"));

        let second = h.monitor.poll_once().await.unwrap();
        assert_eq!(
            second,
            PollOutcome::Fetched(PageReport {
                fetched: 1,
                ..Default::default()
            })
        );
        assert_eq!(h.delivered(), vec!["XJ7K2M"]);
    }

    #[tokio::test]
    async fn same_code_in_two_messages_delivered_once() {
        let mut h = harness(FilterConfig::new());
        let report = h
            .monitor
            .process_page(&[
                msg("2", "7", "again CDNQ4Q"),
                msg("1", "8", "first CDNQ4Q CDNQ4Q"),
            ])
            .await;
        assert_eq!(report.new_messages, 2);
        assert_eq!(report.admitted, 2);
        assert_eq!(h.delivered(), vec!["CDNQ4Q"]);
    }

    #[tokio::test]
    async fn codes_delivered_in_page_order() {
        let mut h = harness(FilterConfig::new());
        h.monitor
            .process_page(&[
                msg("3", "1", "AAAAAA BBBBBB"),
                msg("2", "1", "nothing here"),
                msg("1", "1", "CCCCCC"),
            ])
            .await;
        assert_eq!(h.delivered(), vec!["AAAAAA", "BBBBBB", "CCCCCC"]);
    }

    #[tokio::test]
    async fn banned_message_marked_seen_without_delivery() {
        let mut h = harness(FilterConfig::new().with_banned(["7"]));
        let report = h
            .monitor
            .process_page(&[msg("1", "7", "XJ7K2M"), msg("2", "8", "CDNQ4Q")])
            .await;
        assert_eq!(report.admitted, 1);
        assert_eq!(h.delivered(), vec!["CDNQ4Q"]);
        assert!(!h.monitor.ledger().is_new_message("1"));
        assert!(h.monitor.ledger().is_new_code("XJ7K2M"));

        // Unbanning later does not resurrect the already-seen message.
        h.monitor.filters = FilterConfig::new();
        h.monitor.process_page(&[msg("1", "7", "XJ7K2M")]).await;
        assert_eq!(h.delivered(), vec!["CDNQ4Q"]);
    }

    #[tokio::test]
    async fn non_whitelisted_message_ignored() {
        let mut h = harness(FilterConfig::new().with_allowed(["42"]).with_banned(["42"]));
        h.monitor
            .process_page(&[msg("1", "43", "XJ7K2M"), msg("2", "42", "CDNQ4Q")])
            .await;
        assert_eq!(h.delivered(), vec!["CDNQ4Q"]);
        assert_eq!(h.monitor.ledger().message_count(), 2);
    }

    #[tokio::test]
    async fn declined_code_is_not_offered_again() {
        let mut h = harness_with(&config(), FilterConfig::new(), Delivery::Declined, None);
        h.monitor.process_page(&[msg("1", "1", "XJ7K2M")]).await;
        h.monitor.process_page(&[msg("2", "1", "repost XJ7K2M")]).await;
        assert_eq!(h.delivered(), vec!["XJ7K2M"]);
    }

    #[tokio::test]
    async fn message_without_codes_still_marked() {
        let mut h = harness(FilterConfig::new());
        h.monitor.process_page(&[msg("1", "1", "")]).await;
        assert_eq!(h.monitor.ledger().message_count(), 1);
        assert!(h.delivered().is_empty());
    }

    // ── Failure handling ────────────────────────────────────────────

    #[tokio::test]
    async fn empty_page_counts_as_success() {
        let mut h = harness(FilterConfig::new());
        h.push(transient());
        h.monitor.poll_once().await.unwrap();
        assert_eq!(h.monitor.consecutive_errors(), 1);

        h.push(Ok(Vec::new()));
        let outcome = h.monitor.poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Fetched(_)));
        assert_eq!(h.monitor.consecutive_errors(), 0);
    }

    #[tokio::test]
    async fn transient_failures_back_off_and_refresh_at_five() {
        let mut h = harness(FilterConfig::new());
        for _ in 0..5 {
            h.push(transient());
        }

        let mut waits = Vec::new();
        for _ in 0..5 {
            match h.monitor.poll_once().await.unwrap() {
                PollOutcome::Failed(step) => waits.push(step),
                other => panic!("expected failure, got {other:?}"),
            }
        }

        assert_eq!(
            waits.iter().map(|s| s.wait.as_secs()).collect::<Vec<_>>(),
            vec![10, 15, 20, 25, 5]
        );
        assert!(waits[4].refresh_token);
        assert_eq!(h.monitor.consecutive_errors(), 0);

        let log = h.token_log.lock().unwrap();
        assert_eq!(log.invalidated, 1);
        assert_eq!(log.issued, 2);
    }

    #[tokio::test]
    async fn unauthorized_invalidates_token_immediately() {
        let mut h = harness(FilterConfig::new());
        h.push(unauthorized());
        h.push(Ok(Vec::new()));

        let outcome = h.monitor.poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Failed(BackoffStep { consecutive: 1, .. })));
        assert_eq!(h.token_log.lock().unwrap().invalidated, 1);

        h.monitor.poll_once().await.unwrap();
        assert_eq!(
            *h.tokens_seen.lock().unwrap(),
            vec!["token-1".to_string(), "token-2".to_string()]
        );
    }

    #[tokio::test]
    async fn refused_login_surfaces_error() {
        let mut h = harness(FilterConfig::new());
        h.monitor.tokens = Box::new(CountingTokens {
            log: Arc::clone(&h.token_log),
            refuse: true,
        });
        let err = h.monitor.poll_once().await.unwrap_err();
        assert!(matches!(err, AuthError::Declined));
    }

    // ── Self discovery ──────────────────────────────────────────────

    #[tokio::test]
    async fn discover_self_saves_and_whitelists() {
        let user = CurrentUser {
            id: "99".into(),
            username: "me".into(),
        };
        let mut h = harness_with(
            &config(),
            FilterConfig::new().with_allowed(["42"]),
            Delivery::Accepted,
            Some(user),
        );
        h.monitor.discover_self().await.unwrap();

        assert_eq!(h.monitor.filters().self_id(), Some("99"));
        let saved = h.saved.lock().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].allowed().collect::<Vec<_>>(), vec!["42", "99"]);
    }

    #[tokio::test]
    async fn discover_self_skipped_when_known() {
        let mut h = harness(FilterConfig::new().with_self_id("99"));
        h.monitor.discover_self().await.unwrap();
        assert!(h.saved.lock().unwrap().is_empty());
        assert_eq!(h.token_log.lock().unwrap().issued, 0);
    }

    #[tokio::test]
    async fn discover_self_rejected_token_dropped() {
        let mut h = harness(FilterConfig::new());
        h.monitor.discover_self().await.unwrap();
        assert_eq!(h.monitor.filters().self_id(), None);
        assert_eq!(h.token_log.lock().unwrap().invalidated, 1);
    }

    // ── Run loop ────────────────────────────────────────────────────

    #[tokio::test]
    async fn run_returns_when_shutdown_already_set() {
        let mut h = harness(FilterConfig::new());
        let shutdown = Arc::new(AtomicBool::new(true));
        h.monitor.run(shutdown).await.unwrap();
        assert!(h.tokens_seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_polls_until_cancelled() {
        let config = MonitorConfig {
            poll_interval: Duration::from_millis(5),
            tick: Duration::from_millis(1),
            ..MonitorConfig::default()
        };
        let mut h = harness_with(&config, FilterConfig::new(), Delivery::Accepted, None);
        h.push(Ok(vec![msg("1", "1", "XJ7K2M")]));
        h.push(Ok(vec![msg("2", "1", "CDNQ4Q"), msg("1", "1", "XJ7K2M")]));

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let delivered = Arc::clone(&h.delivered);
        tokio::spawn(async move {
            loop {
                if delivered.lock().unwrap().len() >= 2 {
                    flag.store(true, Ordering::Relaxed);
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        tokio::time::timeout(Duration::from_secs(5), h.monitor.run(shutdown))
            .await
            .expect("monitor did not stop")
            .unwrap();
        assert_eq!(h.delivered(), vec!["XJ7K2M", "CDNQ4Q"]);
    }
}
