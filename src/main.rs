use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use rssagg::config::Config;
use rssagg::feed::Fetcher;
use rssagg::scheduler::Scheduler;
use rssagg::storage::Database;

/// Get the config directory path (~/.config/rssagg/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("rssagg"))
}

fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    // The database holds user emails; keep the directory user-only
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "rssagg", about = "RSS aggregator that keeps followed feeds up to date")]
struct Args {
    /// Config file (default: ~/.config/rssagg/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// SQLite database path, overrides the config file
    #[arg(long, value_name = "PATH", env = "RSSAGG_DATABASE", global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scrape feeds periodically until interrupted
    Scrape {
        /// Feeds fetched per tick
        #[arg(long, env = "RSSAGG_CONCURRENCY")]
        concurrency: Option<u64>,

        /// Seconds between ticks
        #[arg(long, env = "RSSAGG_INTERVAL_SECS")]
        interval_secs: Option<u64>,
    },
    /// Register a user
    AddUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Show a user as JSON
    User {
        #[arg(long)]
        id: Uuid,
    },
    /// Change a user's name and email
    UpdateUser {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Delete a user with their feeds and follows
    DeleteUser {
        #[arg(long)]
        id: Uuid,
    },
    /// Register a feed; the owner follows it automatically
    AddFeed {
        /// Owner's user ID
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
    },
    /// Rename or re-point a feed you own
    UpdateFeed {
        /// Owner's user ID
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        feed: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
    },
    /// Delete a feed you own, with its posts
    DeleteFeed {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        feed: Uuid,
    },
    /// Follow an existing feed
    Follow {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        feed: Uuid,
    },
    /// Stop following a feed
    Unfollow {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        feed: Uuid,
    },
    /// List a user's follows as JSON lines
    Follows {
        #[arg(long)]
        user: Uuid,
    },
    /// List all feeds as JSON lines
    Feeds,
    /// List a user's newest posts as JSON lines
    Posts {
        #[arg(long)]
        user: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(value).context("Failed to serialize output")?
    );
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal(
    mut sigterm: tokio::signal::unix::Signal,
    mut sigint: tokio::signal::unix::Signal,
) {
    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, finishing current batch");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, finishing current batch");
        }
    }
}

async fn scrape(db: Database, config: &Config) -> Result<()> {
    let scraper_config = config
        .scraper_config()
        .context("Invalid scraper configuration")?;
    let fetcher = Fetcher::new().context("Failed to build HTTP client")?;
    let scheduler = Scheduler::new(db.clone(), fetcher, scraper_config);

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let sigterm = signal(SignalKind::terminate())?;
        let sigint = signal(SignalKind::interrupt())?;
        scheduler.run(shutdown_signal(sigterm, sigint)).await;
    }
    #[cfg(not(unix))]
    scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    db.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so listing commands keep stdout clean
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if let Some(database) = args.database {
        config.database_path = Some(database);
    }
    if let Command::Scrape {
        concurrency,
        interval_secs,
    } = &args.command
    {
        if let Some(concurrency) = concurrency {
            config.concurrency = *concurrency;
        }
        if let Some(interval_secs) = interval_secs {
            config.interval_secs = *interval_secs;
        }
    }

    let db_path = match config.database_path.clone() {
        Some(path) => path,
        None => {
            ensure_config_dir(&config_dir)?;
            config_dir
                .join("rssagg.db")
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?
                .to_string()
        }
    };
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {db_path}"))?;

    match args.command {
        Command::Scrape { .. } => scrape(db, &config).await?,
        Command::AddUser { name, email } => {
            let user = db
                .create_user(&name, &email)
                .await
                .context("Failed to create user")?;
            print_json(&user)?;
        }
        Command::User { id } => {
            let user = db
                .get_user(id)
                .await
                .context("Failed to load user")?
                .ok_or_else(|| anyhow::anyhow!("No user with id {id}"))?;
            print_json(&user)?;
        }
        Command::UpdateUser { id, name, email } => {
            let user = db
                .update_user(id, &name, &email)
                .await
                .context("Failed to update user")?;
            print_json(&user)?;
        }
        Command::DeleteUser { id } => {
            db.delete_user(id).await.context("Failed to delete user")?;
        }
        Command::AddFeed { user, name, url } => {
            let feed = db
                .create_feed(user, &name, &url)
                .await
                .context("Failed to create feed")?;
            print_json(&feed)?;
        }
        Command::Follow { user, feed } => {
            db.follow_feed(user, feed)
                .await
                .context("Failed to follow feed")?;
        }
        Command::UpdateFeed {
            user,
            feed,
            name,
            url,
        } => {
            let feed = db
                .update_feed(user, feed, &name, &url)
                .await
                .context("Failed to update feed")?;
            print_json(&feed)?;
        }
        Command::DeleteFeed { user, feed } => {
            db.delete_feed(user, feed)
                .await
                .context("Failed to delete feed")?;
        }
        Command::Unfollow { user, feed } => {
            db.unfollow_feed(user, feed)
                .await
                .context("Failed to unfollow feed")?;
        }
        Command::Follows { user } => {
            for follow in db.get_follows(user).await.context("Failed to load follows")? {
                print_json(&follow)?;
            }
        }
        Command::Feeds => {
            for feed in db.get_feeds().await.context("Failed to load feeds")? {
                print_json(&feed)?;
            }
        }
        Command::Posts { user, limit } => {
            let posts = db
                .get_posts_for_user(user, limit)
                .await
                .context("Failed to load posts")?;
            for post in posts {
                print_json(&post)?;
            }
        }
    }

    Ok(())
}
