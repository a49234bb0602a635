use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use code_relay::auth::{InteractiveLogin, TokenCache};
use code_relay::channels::DiscordClient;
use code_relay::config::MonitorConfig;
use code_relay::error::AuthError;
use code_relay::filters::{FilterEdit, JsonFilterStore, apply_edits};
use code_relay::monitor::Monitor;
use code_relay::prompt::{Prompt, StdinPrompt};
use code_relay::selftest::{SelfTestOptions, run_self_test};
use code_relay::sink::{AppControl, AutoTypeSink, CodeSink, ManualSink, Platform, TargetApp};

#[derive(Parser, Debug)]
#[command(name = "code-relay")]
#[command(author, version, about = "Watch a Discord channel for invite codes and type them in", long_about = None)]
struct Args {
    /// Seconds between checks
    #[arg(short, long)]
    interval: Option<u64>,

    /// Channel to monitor (overrides CODE_RELAY_CHANNEL_ID)
    #[arg(long)]
    channel: Option<String>,

    /// Application to type codes into (overrides CODE_RELAY_TARGET_APP)
    #[arg(long)]
    app: Option<String>,

    /// Add a user ID to the ban list
    #[arg(long, value_name = "USER_ID")]
    ban: Vec<String>,

    /// Remove a user ID from the ban list
    #[arg(long, value_name = "USER_ID")]
    unban: Vec<String>,

    /// Add a user ID to the whitelist
    #[arg(long, value_name = "USER_ID")]
    whitelist: Vec<String>,

    /// Remove a user ID from the whitelist
    #[arg(long, value_name = "USER_ID")]
    unwhitelist: Vec<String>,

    /// Print the ban list and whitelist
    #[arg(long)]
    list_filters: bool,

    /// Type a sample code into the target app and exit
    #[arg(long)]
    test: bool,

    /// Code to use with --test
    #[arg(long, requires = "test")]
    code: Option<String>,

    /// Show codes and wait for confirmation instead of typing them
    #[arg(long)]
    manual: bool,
}

impl Args {
    fn filter_edits(&self) -> Vec<FilterEdit> {
        let ids = |list: &[String], edit: fn(String) -> FilterEdit| {
            list.iter().cloned().map(edit).collect::<Vec<_>>()
        };
        [
            ids(&self.ban, FilterEdit::Ban),
            ids(&self.unban, FilterEdit::Unban),
            ids(&self.whitelist, FilterEdit::Allow),
            ids(&self.unwhitelist, FilterEdit::Disallow),
        ]
        .concat()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut config = MonitorConfig::from_env()?;
    if let Some(secs) = args.interval {
        config.poll_interval = Duration::from_secs(secs);
    }
    if let Some(channel) = &args.channel {
        config.channel_id = channel.clone();
    }
    if let Some(app) = &args.app {
        config.target_app = app.clone();
    }
    config.validate()?;

    // ── Filter management ───────────────────────────────────────────────
    let store = JsonFilterStore::new(&config.filters_file);
    let edits = args.filter_edits();
    let (filters, outcomes) = apply_edits(&store, &edits).await?;
    for outcome in &outcomes {
        println!("{outcome}");
    }
    let changed = outcomes.iter().any(|o| o.changed);
    if args.list_filters || changed {
        println!("\n{filters}");
    }
    if (args.list_filters || !edits.is_empty()) && !args.test {
        return Ok(());
    }

    // ── Sinks ───────────────────────────────────────────────────────────
    let platform = Platform::current();
    let prompt: Arc<dyn Prompt> = Arc::new(StdinPrompt::new());
    let app: Arc<dyn AppControl> = Arc::new(TargetApp::new(&config.target_app, platform));
    let mut sink: Box<dyn CodeSink> = if args.manual {
        Box::new(ManualSink::new(Arc::clone(&app), Arc::clone(&prompt)))
    } else {
        Box::new(AutoTypeSink::for_platform(Arc::clone(&app), platform))
    };

    if args.test {
        let options = SelfTestOptions {
            code: args.code.clone(),
            ..Default::default()
        };
        run_self_test(app.as_ref(), sink.as_mut(), prompt.as_ref(), platform, &options).await?;
        return Ok(());
    }

    // ── Monitor ─────────────────────────────────────────────────────────
    let client = DiscordClient::new(&config.channel_id, config.request_timeout)?
        .with_base_url(&config.api_base);
    let tokens = InteractiveLogin::new(
        client.clone(),
        TokenCache::new(&config.token_file),
        Arc::clone(&prompt),
    );

    eprintln!("📡 Code Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Channel: {}", config.channel_url());
    eprintln!("   Target app: {}", config.target_app);
    eprintln!(
        "   Mode: {}",
        if args.manual { "manual confirmation" } else { "automatic input" }
    );
    eprintln!("   Interval: {}s", config.poll_interval.as_secs());
    eprintln!("   Press Ctrl+C to stop.\n");

    let mut monitor = Monitor::new(
        &config,
        Box::new(client),
        Box::new(tokens),
        sink,
        Box::new(store),
        filters,
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {e}");
                return;
            }
            info!("Ctrl-C received, stopping after the current check");
            flag.store(true, Ordering::Relaxed);
        });
    }

    let result = match monitor.discover_self().await {
        Ok(()) => monitor.run(shutdown).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(AuthError::Declined) => {
            eprintln!("Could not obtain a Discord token. Exiting.");
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
