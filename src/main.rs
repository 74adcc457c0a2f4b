use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod db;
mod error;
mod feed;
mod matcher;
mod models;
mod services;

use app::App;
use config::Config;
use error::Result;
use matcher::Keyword;
use models::{NewSubscription, SettingsSnapshot, SettingsUpdate, Subscription};

/// Watch an RSS feed and push posts matching keyword subscriptions to Telegram.
#[derive(Debug, Parser)]
#[command(name = "rss-push", version, about)]
struct Cli {
    /// Path to the config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll the feed periodically until interrupted
    Run,
    /// Run a single fetch, match and deliver cycle
    Fetch,
    /// Deliver one post for one subscription
    Push { post_id: i64, subscription_id: i64 },
    /// Deliver every post that matched but was never delivered
    RetryUndelivered,
    /// Manage subscriptions
    #[command(subcommand)]
    Sub(SubCommand),
    /// Show or change runtime settings
    Settings(SettingsArgs),
    /// Check the bot credential and print the bot's name
    CheckBot,
}

#[derive(Debug, Subcommand)]
enum SubCommand {
    /// Add a subscription
    Add {
        /// Keyword, `regex:<pattern>` or `/pattern/flags` (up to three)
        #[arg(long = "keyword", short = 'k')]
        keywords: Vec<String>,
        #[arg(long)]
        creator: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Delete a subscription by id
    Del { id: i64 },
    /// List subscriptions, newest first
    List,
}

#[derive(Debug, Args)]
struct SettingsArgs {
    /// Match keywords against titles only
    #[arg(long)]
    only_title: Option<bool>,
    /// Pause all delivery
    #[arg(long)]
    stop_push: Option<bool>,
    /// Chat id that receives notifications
    #[arg(long, conflicts_with = "unbind")]
    bind: Option<String>,
    /// Forget the bound chat
    #[arg(long)]
    unbind: bool,
    /// Bot token used for delivery
    #[arg(long)]
    bot_token: Option<String>,
}

impl SettingsArgs {
    fn into_update(self) -> SettingsUpdate {
        let bound_chat_id = if self.unbind {
            Some(None)
        } else {
            self.bind.map(Some)
        };
        SettingsUpdate {
            only_title: self.only_title,
            stop_push: self.stop_push,
            bound_chat_id,
            bot_token: self.bot_token.map(Some),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    config.log_adjustments();

    let app = App::new(&config).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            tokio::select! {
                _ = app.run(config.poll_interval()) => {}
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, shutting down");
                }
            }
        }
        Command::Fetch => {
            let report = app.run_cycle().await?;
            println!("{}", report);
        }
        Command::Push {
            post_id,
            subscription_id,
        } => {
            let outcome = app.push_post(post_id, subscription_id).await?;
            println!("{}", outcome.message);
        }
        Command::RetryUndelivered => {
            let report = app.retry_undelivered().await?;
            println!("{}", report);
        }
        Command::Sub(SubCommand::Add {
            keywords,
            creator,
            category,
        }) => {
            let subscription = app
                .repository
                .insert_subscription(NewSubscription {
                    keywords,
                    creator,
                    category,
                })
                .await?;
            println!("Added subscription {}", subscription.id);
            print_subscription(&subscription);
            for keyword in subscription.keywords() {
                if let Some(e) = Keyword::directive_error(keyword) {
                    tracing::warn!(
                        "Keyword {:?} is not a valid regex and will match literally: {}",
                        keyword,
                        e
                    );
                }
            }
        }
        Command::Sub(SubCommand::Del { id }) => {
            app.repository.delete_subscription(id).await?;
            println!("Deleted subscription {}", id);
        }
        Command::Sub(SubCommand::List) => {
            let subscriptions = app.repository.list_subscriptions().await?;
            if subscriptions.is_empty() {
                println!("No subscriptions");
            }
            for subscription in &subscriptions {
                print_subscription(subscription);
            }
        }
        Command::Settings(args) => {
            let update = args.into_update();
            let settings = if update.is_empty() {
                app.repository.get_settings().await?
            } else {
                app.repository.update_settings(update).await?
            };
            print_settings(&settings);
        }
        Command::CheckBot => {
            let name = app.check_bot().await?;
            println!("Bot is reachable as {}", name);
        }
    }

    Ok(())
}

fn print_subscription(subscription: &Subscription) {
    let keywords = subscription.keywords();
    println!(
        "#{:<4} keywords: {:<30} creator: {:<12} category: {}",
        subscription.id,
        if keywords.is_empty() {
            "(any)".to_string()
        } else {
            keywords.join(", ")
        },
        subscription.creator_filter().unwrap_or("-"),
        subscription.category_filter().unwrap_or("-"),
    );
}

fn print_settings(settings: &SettingsSnapshot) {
    println!("only_title:  {}", settings.only_title);
    println!("stop_push:   {}", settings.stop_push);
    println!(
        "bound chat:  {}",
        settings.bound_chat_id.as_deref().unwrap_or("(not bound)")
    );
    println!("bot token:   {}", settings.masked_token());
}
