mod api;
mod autosave;
mod cache;
mod commands;
mod config;
mod dispatch;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::api::auth::FileCredentials;
use crate::api::types::{MediaKind, PostSort};
use crate::api::{ApiClient, CachedApiClient};
use crate::cache::EntityCache;
use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "draftdeck")]
#[command(about = "A terminal client for the Draftdeck publishing API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/draftdeck/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Log in and store credentials (password from DRAFTDECK_PASSWORD)
  Login {
    #[arg(long)]
    email: String,
  },
  /// Forget stored credentials
  Logout,
  /// Blog posts
  #[command(subcommand)]
  Posts(PostsCmd),
  /// Media nested under a post
  #[command(subcommand)]
  Media(MediaCmd),
  /// Flow charts
  #[command(subcommand)]
  Flow(FlowCmd),
  /// Slide presentations
  #[command(subcommand)]
  Deck(DeckCmd),
  /// Slides within a presentation
  #[command(subcommand)]
  Slide(SlideCmd),
}

#[derive(Subcommand, Debug)]
enum PostsCmd {
  /// List all posts
  List {
    #[arg(long, value_enum, default_value_t)]
    sort: PostSort,
  },
  /// Show one post
  Show { id: Uuid },
  /// Create a post
  Create {
    title: String,
    #[arg(long, default_value = "")]
    body: String,
  },
  /// Delete a post
  Delete { id: Uuid },
}

#[derive(Subcommand, Debug)]
enum MediaCmd {
  /// List media of one kind on a post
  List {
    post: Uuid,
    #[arg(long, value_enum)]
    kind: MediaKind,
  },
  /// Upload a media file to a post
  Add {
    post: Uuid,
    #[arg(long, value_enum)]
    kind: MediaKind,
    /// Display label (defaults to the file name)
    #[arg(long)]
    label: Option<String>,
    file: PathBuf,
  },
  /// Delete a media entity from a post
  Rm {
    post: Uuid,
    #[arg(long, value_enum)]
    kind: MediaKind,
    id: Uuid,
  },
}

#[derive(Subcommand, Debug)]
enum FlowCmd {
  /// List flow charts
  List,
  /// Download a flow snapshot to a local file
  Pull { id: Uuid, out: PathBuf },
  /// Save a local snapshot file to the backend (manual save)
  Push {
    id: Uuid,
    file: PathBuf,
    #[arg(long)]
    message: Option<String>,
  },
  /// Watch a local snapshot file and autosave changes
  Edit { id: Uuid, file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum DeckCmd {
  /// List presentations
  List,
  /// Show a presentation's slides
  Show { id: Uuid },
}

#[derive(Subcommand, Debug)]
enum SlideCmd {
  /// Add a slide to a presentation
  Add { deck: Uuid, position: u32 },
  /// Delete a slide
  Rm { deck: Uuid, id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging()?;

  let config = Config::load(args.config.as_deref())?;

  let store = Arc::new(FileCredentials::open()?);
  let api = ApiClient::new(&config.api.url, store)?;
  let cache = Arc::new(EntityCache::new(config.cache_config()));
  let client = CachedApiClient::new(api, cache);

  match args.command {
    Command::Login { email } => {
      let password = Config::get_password()?;
      commands::login(&client, &email, &password).await
    }
    Command::Logout => commands::logout(&client),
    Command::Posts(cmd) => match cmd {
      PostsCmd::List { sort } => commands::list_posts(&client, sort).await,
      PostsCmd::Show { id } => commands::show_post(&client, id).await,
      PostsCmd::Create { title, body } => commands::create_post(&client, title, body).await,
      PostsCmd::Delete { id } => commands::delete_post(&client, id).await,
    },
    Command::Media(cmd) => match cmd {
      MediaCmd::List { post, kind } => commands::list_media(&client, post, kind).await,
      MediaCmd::Add {
        post,
        kind,
        label,
        file,
      } => commands::add_media(&client, post, kind, label, &file).await,
      MediaCmd::Rm { post, kind, id } => commands::rm_media(&client, post, kind, id).await,
    },
    Command::Flow(cmd) => match cmd {
      FlowCmd::List => commands::list_flows(&client).await,
      FlowCmd::Pull { id, out } => commands::pull_flow(&client, id, &out).await,
      FlowCmd::Push { id, file, message } => {
        commands::push_flow(&client, id, &file, message).await
      }
      FlowCmd::Edit { id, file } => {
        commands::edit_flow(&client, id, file, config.debounce()).await
      }
    },
    Command::Deck(cmd) => match cmd {
      DeckCmd::List => commands::list_decks(&client).await,
      DeckCmd::Show { id } => commands::show_deck(&client, id).await,
    },
    Command::Slide(cmd) => match cmd {
      SlideCmd::Add { deck, position } => commands::add_slide(&client, deck, position).await,
      SlideCmd::Rm { deck, id } => commands::rm_slide(&client, deck, id).await,
    },
  }
}

/// Log to a file so command output stays clean. Filter via RUST_LOG.
fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("draftdeck")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "draftdeck.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
