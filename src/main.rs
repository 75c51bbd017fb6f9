use anyhow::Result;
use apwatch::app::{self, Application};
use apwatch::config;
use apwatch::data::UserId;
use apwatch::tracking::PollScheduler;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "apwatch")]
#[command(about = "Watch Archipelago trackers and DM subscribers about new items")]
#[command(version)]
struct Args {
    /// Path to config file
    #[arg(long, short)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll on startup and then every interval until Ctrl-C (default)
    Run,
    /// Deliver leftover notifications, run a single poll pass and exit
    Once,
    /// Run one chat command line, e.g. `!ap add <room> <slot>`
    Chat {
        #[arg(long)]
        user_id: u64,
        #[arg(long)]
        username: String,
        /// The chat line, words may be passed separately
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        line: Vec<String>,
    },
    /// List every tracked (user, room, slot)
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("apwatch=info".parse()?),
        )
        .init();

    let config = config::load(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            let app = Arc::new(Application::from_config(config).await?);
            let scheduler = PollScheduler::new(app);

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutting down after the current tracker");
                    on_signal.cancel();
                }
            });

            scheduler.run(cancel).await;
        }
        Command::Once => {
            let app = Arc::new(Application::from_config(config).await?);
            let scheduler = PollScheduler::new(app);
            let report = scheduler.run_once(&CancellationToken::new()).await?;
            println!(
                "Polled {} trackers ({} failed), {} new items, {} notifications sent",
                report.trackers,
                report.failed,
                report.new_items,
                report.dispatch.sent()
            );
        }
        Command::Chat {
            user_id,
            username,
            line,
        } => {
            let store = app::open_subscriptions(&config)?;
            let line = line.join(" ");
            match apwatch::commands::handle_line(&store, UserId(user_id), &username, &line).await {
                Some(reply) => println!("{}", reply),
                None => anyhow::bail!(
                    "Not a command: lines must start with {}",
                    apwatch::commands::PREFIX
                ),
            }
        }
        Command::List => {
            let store = app::open_subscriptions(&config)?;
            let snapshot = store.list_all().await;
            if snapshot.is_empty() {
                println!("No trackers.");
            }
            for slot in snapshot.iter() {
                println!(
                    "{}\t{}\t{}\t{}",
                    slot.user_id, slot.username, slot.tracker.room, slot.tracker.slot
                );
            }
        }
    }

    Ok(())
}
