use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use meditation_core::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "meditate")]
#[command(about = "Meditation practice tracker with streaks and trial access", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Pretend the current time is this RFC 3339 instant (for testing)
    #[arg(long, global = true, hide = true, value_parser = parse_instant)]
    at: Option<DateTime<Local>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the app-launch checks and show status (default)
    Launch,

    /// Record a finished meditation session
    Complete {
        /// Session length in minutes (defaults to the timer setting)
        #[arg(long)]
        minutes: Option<u32>,

        /// Heart-rate samples in bpm, comma separated
        #[arg(long, value_delimiter = ',')]
        bpm: Vec<f64>,
    },

    /// Show streak and practice statistics
    Stats,

    /// Show trial and purchase status
    Access,

    /// Apply a purchase result from the store
    Purchase {
        /// Product identifier (defaults to the full-access product)
        product_id: Option<String>,

        /// The transaction failed verification
        #[arg(long, conflicts_with_all = ["cancelled", "pending"])]
        unverified: bool,

        /// The user cancelled the purchase sheet
        #[arg(long, conflicts_with = "pending")]
        cancelled: bool,

        /// The purchase awaits approval
        #[arg(long)]
        pending: bool,
    },

    /// Replay verified entitlements from the store
    Restore {
        product_ids: Vec<String>,
    },

    /// List purchasable products
    Products {
        /// Simulate an unreachable store
        #[arg(long)]
        offline: bool,
    },

    /// Show or change the timer length
    Timer {
        /// New length in minutes
        #[arg(long)]
        set: Option<u32>,
    },

    /// Write or read journal entries
    Journal {
        #[command(subcommand)]
        action: JournalAction,
    },

    /// Test controls for trial and statistics
    Debug {
        #[command(subcommand)]
        action: DebugAction,
    },
}

#[derive(Subcommand)]
enum JournalAction {
    /// Add an entry
    Add {
        text: String,

        /// Length of the sitting the entry refers to
        #[arg(long)]
        minutes: Option<u32>,
    },

    /// List entries, newest first
    List {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum DebugAction {
    /// Start a fresh 7-day trial from now
    StartTrial,
    /// Forget the trial as if freshly installed
    ResetTrial,
    /// End the trial immediately
    ExpireTrial,
    /// Clear all streak and session statistics
    ResetStats,
}

fn parse_instant(s: &str) -> std::result::Result<DateTime<Local>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Local))
        .map_err(|e| format!("invalid RFC 3339 time '{}': {}", s, e))
}

/// Everything a command needs, wired once per invocation
struct App {
    config: Config,
    data: config::DataConfig,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl App {
    fn tracker(&self) -> StreakTracker {
        StreakTracker::new(self.store.clone(), self.clock.clone())
    }

    fn entitlements(&self) -> EntitlementManager {
        EntitlementManager::new(self.store.clone(), self.clock.clone())
    }

    fn timer(&self) -> TimerSettings {
        TimerSettings::new(self.store.clone(), self.config.timer.clone())
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now().with_timezone(&Utc)
    }
}

fn main() -> Result<()> {
    // Initialize logging
    meditation_core::logging::init();

    let cli = Cli::parse();

    let config = Config::load()?;
    let mut data = config.data.clone();
    if let Some(dir) = cli.data_dir {
        data.data_dir = dir;
    }

    tracing::debug!("Using data directory {:?}", data.data_dir);

    let clock: Arc<dyn Clock> = match cli.at {
        Some(at) => Arc::new(FixedClock::new(at)),
        None => Arc::new(SystemClock),
    };
    let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(data.store_path())?);

    let app = App {
        config,
        data,
        store,
        clock,
    };

    match cli.command.unwrap_or(Commands::Launch) {
        Commands::Launch => cmd_launch(&app),
        Commands::Complete { minutes, bpm } => cmd_complete(&app, minutes, bpm),
        Commands::Stats => cmd_stats(&app),
        Commands::Access => cmd_access(&app),
        Commands::Purchase {
            product_id,
            unverified,
            cancelled,
            pending,
        } => cmd_purchase(&app, product_id, unverified, cancelled, pending),
        Commands::Restore { product_ids } => cmd_restore(&app, product_ids),
        Commands::Products { offline } => cmd_products(&app, offline),
        Commands::Timer { set } => cmd_timer(&app, set),
        Commands::Journal { action } => cmd_journal(&app, action),
        Commands::Debug { action } => cmd_debug(&app, action),
    }
}

fn cmd_launch(app: &App) -> Result<()> {
    let mut tracker = app.tracker();
    let entitlements = app.entitlements();

    // Run both checks before reporting the first failure
    let streak = tracker.on_launch();
    let trial = entitlements.check_trial_status();

    let report = streak?;
    if report.streak_reset {
        println!("Streak reset: no full practice day yesterday.");
    }
    display_trial(&trial?);
    display_access(&entitlements);
    display_streak(&tracker);
    Ok(())
}

fn cmd_complete(app: &App, minutes: Option<u32>, bpm: Vec<f64>) -> Result<()> {
    let duration = match minutes {
        Some(m) => Duration::from_secs(u64::from(m) * 60),
        None => app.timer().duration(),
    };

    let elapsed = chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
    let started_at = app.now_utc() - elapsed;
    let samples = spread_samples(started_at, duration, &bpm);
    let session = MeditationSession::new(started_at, duration.as_secs_f64(), samples);

    let mut sink: JsonlSink<MeditationSession> = JsonlSink::new(app.data.sessions_path());
    sink.append(&session)?;

    let mut tracker = app.tracker();
    let outcome = tracker.record_session_completed(duration)?;

    LogNotifier.notify(
        "Meditation Complete",
        "Great job! You've finished your meditation session.",
    );

    println!(
        "✓ Session logged ({})",
        format_countdown(duration.as_secs())
    );
    if let Some(avg) = session.average_heart_rate {
        println!("  Average heart rate: {:.0} bpm", avg);
    }
    println!(
        "  Today: {}/{} sessions",
        outcome.daily_session_count, QUALIFYING_SESSIONS
    );
    if outcome.day_qualified {
        println!(
            "✓ Day complete! Streak: {} (best {})",
            outcome.current_streak, outcome.best_streak
        );
    }
    Ok(())
}

/// Timestamp bpm readings evenly across the session
fn spread_samples(started_at: DateTime<Utc>, duration: Duration, bpm: &[f64]) -> Vec<HeartRateSample> {
    if bpm.is_empty() {
        return Vec::new();
    }
    let step = duration.as_secs_f64() / bpm.len() as f64;
    bpm.iter()
        .enumerate()
        .map(|(i, &value)| HeartRateSample {
            timestamp: started_at + chrono::Duration::milliseconds((step * i as f64 * 1000.0) as i64),
            bpm: value,
        })
        .collect()
}

fn cmd_stats(app: &App) -> Result<()> {
    let tracker = app.tracker();
    display_streak(&tracker);
    println!(
        "Total time: {}",
        format_total_time(tracker.total_meditation_time())
    );
    println!("This week: {} days", tracker.meditations_this_week());

    let recent = load_recent_sessions(&app.data.sessions_path(), app.now_utc(), 7)?;
    println!("Sessions in last 7 days: {}", recent.len());
    if let Some(avg) = overall_average_heart_rate(&recent) {
        println!("Average heart rate: {:.0} bpm", avg);
    }
    Ok(())
}

fn cmd_access(app: &App) -> Result<()> {
    let entitlements = app.entitlements();
    display_trial(&entitlements.trial_status());
    display_access(&entitlements);
    let purchased = entitlements.purchased_products();
    if !purchased.is_empty() {
        println!("Purchased:");
        for id in purchased {
            println!("  - {}", id);
        }
    }
    Ok(())
}

fn cmd_purchase(
    app: &App,
    product_id: Option<String>,
    unverified: bool,
    cancelled: bool,
    pending: bool,
) -> Result<()> {
    let product_id =
        product_id.unwrap_or_else(|| app.config.store.full_access_product_id.clone());

    let result = if cancelled {
        PurchaseResult::UserCancelled
    } else if pending {
        PurchaseResult::Pending
    } else if unverified {
        PurchaseResult::Success(TransactionEvent::unverified(
            &product_id,
            "transaction signature could not be verified",
        ))
    } else {
        PurchaseResult::Success(TransactionEvent::verified(&product_id))
    };

    let entitlements = app.entitlements();
    match entitlements.apply_purchase_result(result)? {
        PurchaseOutcome::Purchased {
            product_id,
            newly_added: true,
        } => println!("✓ Purchased {}", product_id),
        PurchaseOutcome::Purchased { product_id, .. } => {
            println!("Already owned: {}", product_id)
        }
        PurchaseOutcome::Unverified { product_id, reason } => {
            println!("✗ Purchase of {} could not be verified: {}", product_id, reason);
            println!("  Access was not changed. Please try again.");
        }
        PurchaseOutcome::Cancelled => println!("Purchase cancelled."),
        PurchaseOutcome::Pending => println!("Purchase is pending approval."),
    }
    display_access(&entitlements);
    Ok(())
}

fn cmd_restore(app: &App, product_ids: Vec<String>) -> Result<()> {
    let entitlements = app.entitlements();
    let summary =
        entitlements.restore_purchases(product_ids.into_iter().map(TransactionEvent::verified))?;
    println!("✓ Restored {} products", summary.restored.len());
    display_access(&entitlements);
    Ok(())
}

fn cmd_products(app: &App, offline: bool) -> Result<()> {
    let catalog = if offline {
        StaticCatalog::offline()
    } else {
        StaticCatalog::new(app.config.store.products.clone())
    };

    match load_catalog(&catalog, &app.config.store.product_ids()) {
        CatalogStatus::Loaded(products) => {
            for product in products {
                println!("  {} - {} ({})", product.display_name, product.display_price, product.id);
            }
        }
        CatalogStatus::Unavailable(reason) => {
            println!("Store unavailable: {}", reason);
        }
    }

    // Access never depends on the catalog
    display_access(&app.entitlements());
    Ok(())
}

fn cmd_timer(app: &App, set: Option<u32>) -> Result<()> {
    let timer = app.timer();
    if let Some(minutes) = set {
        timer.set_minutes(minutes)?;
        println!("✓ Timer set to {} minutes", minutes);
    }
    println!("Timer: {}", format_countdown(timer.duration().as_secs()));
    println!("Available: {:?} minutes", timer.available_minutes());
    Ok(())
}

fn cmd_journal(app: &App, action: JournalAction) -> Result<()> {
    let path = app.data.journal_path();
    match action {
        JournalAction::Add { text, minutes } => {
            let duration = match minutes {
                Some(m) => Duration::from_secs(u64::from(m) * 60),
                None => app.timer().duration(),
            };
            let entry = JournalEntry::new(app.now_utc(), text, duration.as_secs_f64());
            JsonlSink::<JournalEntry>::new(&path).append(&entry)?;
            println!("✓ Journal entry saved");
        }
        JournalAction::List { limit } => {
            let mut entries: Vec<JournalEntry> = read_records(&path)?;
            entries.sort_by(|a, b| b.written_at.cmp(&a.written_at));
            if entries.is_empty() {
                println!("No journal entries yet.");
            }
            for entry in entries.into_iter().take(limit) {
                println!(
                    "{} ({} min)",
                    entry.written_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                    (entry.meditation_duration_secs / 60.0).round()
                );
                println!("  {}", entry.content);
            }
        }
    }
    Ok(())
}

fn cmd_debug(app: &App, action: DebugAction) -> Result<()> {
    match action {
        DebugAction::StartTrial => {
            let ends_at = app.entitlements().start_trial_explicitly()?;
            println!("Trial started, ends {}", ends_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"));
        }
        DebugAction::ResetTrial => {
            app.entitlements().reset_trial_for_testing()?;
            println!("Trial reset; the next launch starts a new trial.");
        }
        DebugAction::ExpireTrial => {
            app.entitlements().expire_trial_immediately()?;
            println!("Trial expired.");
        }
        DebugAction::ResetStats => {
            app.tracker().reset_all()?;
            println!("Statistics cleared.");
        }
    }
    Ok(())
}

fn display_trial(status: &TrialStatus) {
    match status {
        TrialStatus::NoTrial => println!("Trial: not started"),
        TrialStatus::Active {
            ends_at,
            days_remaining,
        } => println!(
            "Trial: active, {} days remaining (ends {})",
            days_remaining,
            ends_at.with_timezone(&Local).format("%Y-%m-%d")
        ),
        TrialStatus::Expired { ended_at } => println!(
            "Trial: expired on {}",
            ended_at.with_timezone(&Local).format("%Y-%m-%d")
        ),
    }
}

fn display_access(entitlements: &EntitlementManager) {
    if entitlements.evaluate_access() {
        println!("Access: full");
    } else {
        println!("Access: locked");
    }
}

fn display_streak(tracker: &StreakTracker) {
    println!(
        "Streak: {} (best {})",
        tracker.current_streak(),
        tracker.best_streak()
    );
    println!(
        "Today: {}/{} sessions",
        tracker.daily_session_count(),
        QUALIFYING_SESSIONS
    );
}
