use std::io::{self, Write};

use clap::{ArgGroup, Args, Parser, Subcommand};
use lifeos_server::mail::{DateRange, MailboxCredentials};
use lifeos_server::state::{AppConfig, AppState};
use lifeos_server::sync::SyncRequest;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "lifeos-sync",
    about = "Run LifeOS email sync and maintenance against the configured database"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print message store and index counts for a user.
    Stats {
        #[arg(long)]
        user: String,
    },
    /// Pull new mail, store it and embed pending messages.
    Sync(SyncArgs),
    /// Delete a user's stored messages, vectors, or both.
    #[command(group(ArgGroup::new("target").required(true).args(["store", "index", "all"])))]
    Clear {
        #[arg(long)]
        user: String,
        /// Delete stored messages only.
        #[arg(long)]
        store: bool,
        /// Delete vectors only and requeue messages for embedding.
        #[arg(long)]
        index: bool,
        /// Delete both.
        #[arg(long)]
        all: bool,
    },
}

#[derive(Args, Debug)]
struct SyncArgs {
    #[arg(long)]
    user: String,
    /// Mailbox OAuth access token.
    #[arg(long)]
    token: String,
    #[arg(long)]
    max_emails: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    /// YYYY/MM/DD or YYYY-MM-DD, inclusive.
    #[arg(long)]
    start_date: Option<String>,
    /// YYYY/MM/DD or YYYY-MM-DD, inclusive.
    #[arg(long)]
    end_date: Option<String>,
}

fn fail(message: impl std::fmt::Display) -> ! {
    let _ = writeln!(io::stderr(), "error: {message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    lifeos_server::init_logger();
    let cli = Cli::parse();

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    lifeos_server::db::run_migrations(&pool).await?;

    let config = AppConfig::from_env();
    let backends = match lifeos_server::build_backends(pool, &config).await {
        Ok(backends) => backends,
        Err(err) => fail(err),
    };
    let state = AppState::new(backends, config);

    match cli.command {
        Command::Stats { user } => {
            let stats = state.store.compute_stats(&user).await?;
            let index = state.index.stats(&user).await?;
            println!("user:                {user}");
            println!("stored emails:       {}", stats.total_emails_count);
            println!("processed emails:    {}", stats.processed_emails_count);
            println!("unprocessed emails:  {}", stats.unprocessed_emails_count);
            match stats.last_sync_date {
                Some(date) => println!("last sync:           {}", date.to_rfc3339()),
                None => println!("last sync:           never"),
            }
            println!("namespace:           {}", index.namespace_name);
            println!("vectors:             {}", index.total_vectors);
        }
        Command::Sync(args) => {
            let (max_emails, batch_size) = match state
                .sync
                .config()
                .resolve(args.max_emails, args.batch_size)
            {
                Ok(sizes) => sizes,
                Err(err) => fail(err),
            };
            let date_range =
                match DateRange::parse(args.start_date.as_deref(), args.end_date.as_deref()) {
                    Ok(range) => range,
                    Err(err) => fail(err),
                };

            let request = SyncRequest {
                user_id: args.user,
                max_emails,
                batch_size,
                date_range,
            };
            let credentials = MailboxCredentials::new(args.token);

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("interrupt received, stopping after the current step");
                    on_interrupt.cancel();
                }
            });

            let report = state.sync.run(&credentials, &request, &cancel).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.error.is_some() {
                std::process::exit(2);
            }
        }
        Command::Clear {
            user,
            store,
            index,
            all,
        } => {
            if store || all {
                let deleted = state.store.clear_all(&user).await?;
                println!("deleted {deleted} stored emails for {user}");
            }
            if index || all {
                let deleted = state.index.delete_namespace(&user).await?;
                println!("deleted {deleted} vectors for {user}");
                if index {
                    let requeued = state.store.reset_processed(&user).await?;
                    println!("requeued {requeued} emails for embedding");
                }
            }
        }
    }

    Ok(())
}
