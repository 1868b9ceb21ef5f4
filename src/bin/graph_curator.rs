//! Graph Curator CLI
//!
//! Inspects and curates an account's followers/followings:
//! - Snapshots and diffs against the previous run
//! - Non-mutual and low-value follower detection
//! - Budgeted bulk unfollow/remove/block/follow
//!
//! ## Configuration
//!
//! A JSON config file (`--config`) overlaid with environment variables
//! (`GRAPH_*`, `DATABASE_URL`, see `social_graph_kernel::config`), plus:
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for terminals (default: pretty)
//!
//! Logs go to stderr; stdout carries only command output.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin graph_curator --features cli -- --fixture account.json --list unmutual
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use social_graph_kernel::{
    ActionReport, CancellationToken, ChannelProgress, DiffDirection, DiffHistory, DiffPair,
    EngineConfig, EngineError, FixtureClient, GraphService, InMemorySnapshotStore, Outcome,
    PostgresSnapshotStore, ProgressEvent, RemoteClient, SnapshotStore, StorageKind, User,
};

type Service = GraphService<FixtureClient, dyn SnapshotStore>;

#[derive(Debug, Parser)]
#[command(name = "graph_curator", version, about = "Inspect and curate an account's social graph")]
struct Cli {
    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Account export to run against.
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Print `username<TAB>id<TAB>full_name` rows after counts.
    #[arg(long)]
    list: bool,

    /// Log mutations without performing them.
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Direction {
    Followers,
    Followings,
}

impl From<Direction> for DiffDirection {
    fn from(d: Direction) -> Self {
        match d {
            Direction::Followers => DiffDirection::Followers,
            Direction::Followings => DiffDirection::Followings,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Snapshot our followers.
    Followers,
    /// Snapshot our followings.
    Followings,
    /// Accounts we follow that do not follow back.
    Unmutual,
    /// Flag low-value followers.
    Bots,
    /// Lost and new accounts since the last snapshot.
    Diff {
        #[arg(value_enum)]
        direction: Direction,
    },
    /// Stored diffs grouped by day.
    DiffHistory {
        #[arg(value_enum)]
        direction: Direction,
    },
    /// Unfollow every non-mutual account that is not whitelisted.
    CleanFollowers,
    /// Force-remove the named followers.
    RemoveFollowers {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Unfollow the named accounts.
    Unfollow {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Block the named accounts.
    Block {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Follow the named accounts.
    Follow {
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Another account's followers.
    UserFollowers { name: String },
    /// Another account's followings.
    UserFollowings { name: String },
}

/// Initialize the tracing subscriber with JSON or pretty format, on stderr.
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "graph_curator=info,social_graph_kernel=info,sqlx=warn".into());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }
}

/// Cancel `token` on Ctrl-C.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current user and stopping");
            token.cancel();
        }
    });
}

/// Render progress events on stderr until the sender side is dropped.
fn spawn_renderer(mut rx: UnboundedReceiver<ProgressEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (mut done, mut total) = (0usize, 0usize);
        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Started(n) => {
                    total = n;
                    done = 0;
                }
                ProgressEvent::Tick => {
                    done += 1;
                    eprint!("\r{done}/{total}");
                }
                ProgressEvent::Finished => eprintln!(),
            }
        }
    })
}

fn load_config(cli: &Cli, client: &FixtureClient) -> Result<EngineConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env();
    if cli.debug {
        config.debug = true;
    }
    if config.username.is_empty() {
        config.username = client.username();
    }
    config.validate()?;
    Ok(config)
}

async fn open_store(config: &EngineConfig) -> Result<Arc<dyn SnapshotStore>, Box<dyn Error>> {
    let store: Arc<dyn SnapshotStore> = match config.storage.kind {
        StorageKind::Local => Arc::new(InMemorySnapshotStore::new()),
        StorageKind::DocumentStore => {
            Arc::new(PostgresSnapshotStore::new(config.document_store_config()).await?)
        }
    };
    Ok(store)
}

fn print_users(users: &[User], list: bool) {
    println!("{}", users.len());
    if list {
        for user in users {
            println!("{}\t{}\t{}", user.username, user.id, user.full_name);
        }
    }
}

fn print_diff(pair: &DiffPair, list: bool) {
    print!("lost ");
    print_users(&pair.lost.users, list);
    print!("new ");
    print_users(&pair.new.users, list);
}

fn print_history(history: &DiffHistory, list: bool) {
    println!("{}", history.len());
    for (date, batches) in history.newest_first() {
        for batch in batches {
            print!("{date} {} ", batch.batch_type);
            print_users(&batch.users, list);
        }
    }
}

fn report_exit(report: &ActionReport) -> ExitCode {
    println!("{} {} ({})", report.performed, report.mutation, report.outcome);
    match report.outcome {
        Outcome::Completed | Outcome::NoUsers => ExitCode::SUCCESS,
        _ => ExitCode::from(2),
    }
}

async fn run_mutation(
    service: &Service,
    command: &Command,
    cancel: &CancellationToken,
) -> Result<ActionReport, EngineError> {
    let (progress, rx) = ChannelProgress::channel();
    let renderer = spawn_renderer(rx);

    let report = match command {
        Command::CleanFollowers => {
            service
                .unfollow_all_not_mutual_except_whitelisted(cancel, &progress)
                .await
        }
        Command::RemoveFollowers { names } => {
            service.remove_followers_by_username(names.as_slice(), cancel, &progress).await
        }
        Command::Unfollow { names } => service.unfollow_users(names.as_slice(), cancel, &progress).await,
        Command::Block { names } => service.block_users(names.as_slice(), cancel, &progress).await,
        Command::Follow { names } => service.follow_users(names.as_slice(), cancel, &progress).await,
        _ => Err(EngineError::Failure("not a mutation command".to_string())),
    };

    drop(progress);
    let _ = renderer.await;
    report
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<ExitCode, Box<dyn Error>> {
    let fixture = cli
        .fixture
        .as_ref()
        .ok_or("no remote client available, pass --fixture")?;
    let client = FixtureClient::load(fixture)?;
    let config = load_config(&cli, &client)?;
    let store = open_store(&config).await?;

    info!(
        username = %config.username,
        storage = ?config.storage.kind,
        debug = config.debug,
        incognito = config.incognito,
        "starting"
    );
    let service: Service = GraphService::from_config(Arc::new(client), store, &config);

    let code = match &cli.command {
        Command::Followers => {
            print_users(&service.get_followers(&cancel).await?.users, cli.list);
            ExitCode::SUCCESS
        }
        Command::Followings => {
            print_users(&service.get_followings(&cancel).await?.users, cli.list);
            ExitCode::SUCCESS
        }
        Command::Unmutual => {
            print_users(&service.get_not_mutual_followers(&cancel).await?.users, cli.list);
            ExitCode::SUCCESS
        }
        Command::Bots => {
            let (progress, rx) = ChannelProgress::channel();
            let renderer = spawn_renderer(rx);
            let result = service
                .business_accounts_or_bots_from_followers(&cancel, &progress)
                .await;
            drop(progress);
            let _ = renderer.await;
            let batch = result?;
            print!("{} ", batch.batch_type);
            print_users(&batch.users, cli.list);
            ExitCode::SUCCESS
        }
        Command::Diff { direction } => {
            let pair = match DiffDirection::from(*direction) {
                DiffDirection::Followers => service.get_diff_followers(&cancel).await?,
                DiffDirection::Followings => service.get_diff_followings(&cancel).await?,
            };
            print_diff(&pair, cli.list);
            ExitCode::SUCCESS
        }
        Command::DiffHistory { direction } => {
            let history = match DiffDirection::from(*direction) {
                DiffDirection::Followers => service.get_history_diff_followers(&cancel).await?,
                DiffDirection::Followings => service.get_history_diff_followings(&cancel).await?,
            };
            print_history(&history, cli.list);
            ExitCode::SUCCESS
        }
        Command::UserFollowers { name } => {
            print_users(&service.get_user_followers(name, &cancel).await?, cli.list);
            ExitCode::SUCCESS
        }
        Command::UserFollowings { name } => {
            print_users(&service.get_user_followings(name, &cancel).await?, cli.list);
            ExitCode::SUCCESS
        }
        mutation => report_exit(&run_mutation(&service, mutation, &cancel).await?),
    };

    Ok(code)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match run(cli, cancel).await {
        Ok(code) => code,
        Err(e) if matches!(e.downcast_ref::<EngineError>(), Some(EngineError::Cancelled)) => {
            warn!("cancelled");
            ExitCode::from(2)
        }
        Err(e) => {
            error!(error = %e, "fatal");
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}
