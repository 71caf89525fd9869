//! # Recall Chat CLI (`rchat`)
//!
//! The `rchat` binary is the primary interface for Recall Chat. It provides
//! commands for database initialization, user registration, interactive
//! chat, history inspection, retrieval diagnostics, and starting the HTTP
//! server.
//!
//! ## Usage
//!
//! ```bash
//! rchat --config ./config/rchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rchat init` | Create the SQLite database and run schema migrations |
//! | `rchat register <user>` | Create a user account |
//! | `rchat chat <user>` | Log in and chat interactively |
//! | `rchat history <user>` | Print the persisted conversation log |
//! | `rchat search <user> "<query>"` | Show recent stored messages matching a query |
//! | `rchat serve` | Start the JSON HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! rchat init --config ./config/rchat.toml
//!
//! # Create a user (prompts for a password on a TTY)
//! rchat register alice
//!
//! # Chat; one message per line, /quit or EOF logs out
//! rchat chat alice
//!
//! # Inspect what retrieval would ground a prompt in
//! rchat search alice "cats" --limit 5
//! ```

mod auth;
mod config;
mod db;
mod error;
mod migrate;
mod model;
mod models;
mod render;
mod retrieval;
mod server;
mod session;
mod store;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use auth::CredentialStore;
use session::Session;
use store::MessageStore;

/// Recall Chat — a retrieval-grounded chat service with per-user
/// full-text history.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rchat",
    about = "Recall Chat — a retrieval-grounded chat service with per-user full-text history",
    version,
    long_about = "Recall Chat stores every conversation turn in a per-user SQLite log, \
    grounds each new prompt in the most recent matching turns (FTS5 keyword search), \
    sends the augmented prompt to a hosted chat model, and persists the reply. \
    The same core is exposed as an interactive CLI and a JSON HTTP server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rchat.toml`. Database, retrieval, model, and
    /// server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/rchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (users, messages, messages_fts). This command is idempotent —
    /// running it multiple times is safe.
    Init,

    /// Register a new user.
    ///
    /// Fails if the username is already taken. The password is read from
    /// `--password` or, when absent, from standard input.
    Register {
        /// Username to create.
        username: String,

        /// Password. Prompted for when omitted.
        #[arg(long)]
        password: Option<String>,
    },

    /// Log in and chat interactively.
    ///
    /// Prints the persisted history, then reads one submission per line.
    /// Each reply is grounded in the most recent stored turns matching the
    /// new message. `/quit` or end-of-input logs out.
    Chat {
        /// Username to log in as.
        username: String,

        /// Password. Prompted for when omitted.
        #[arg(long)]
        password: Option<String>,
    },

    /// Print a user's persisted conversation log, oldest first.
    History {
        /// Username whose log to print.
        username: String,

        /// Password. Prompted for when omitted.
        #[arg(long)]
        password: Option<String>,
    },

    /// Show the most recent stored messages matching a query.
    ///
    /// A diagnostic view of exactly what retrieval would ground a prompt
    /// in: tokenized keyword match, newest first, at most `--limit` items.
    Search {
        /// Username whose messages to search.
        username: String,

        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,

        /// Password. Prompted for when omitted.
        #[arg(long)]
        password: Option<String>,
    },

    /// Start the JSON HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and exposes the
    /// register/login/submit/history endpoints.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Register { username, password } => {
            let password = read_password(password, "Password: ")?;
            let pool = db::connect(&cfg.db.path).await?;
            let users = CredentialStore::new(pool.clone());
            users.register(&username, &password).await?;
            pool.close().await;
            println!("Registration successful. You can now log in.");
        }
        Commands::Chat { username, password } => {
            run_chat(&cfg, &username, password).await?;
        }
        Commands::History { username, password } => {
            let pool = db::connect(&cfg.db.path).await?;
            let users = CredentialStore::new(pool.clone());
            authenticate_or_bail(&users, &username, password).await?;

            let store = MessageStore::new(pool.clone());
            let messages = store.history(&username).await?;
            if messages.is_empty() {
                println!("No messages.");
            } else {
                print!("{}", render::render_history(&messages));
            }
            pool.close().await;
        }
        Commands::Search {
            username,
            query,
            limit,
            password,
        } => {
            let pool = db::connect(&cfg.db.path).await?;
            let users = CredentialStore::new(pool.clone());
            authenticate_or_bail(&users, &username, password).await?;

            let store = MessageStore::new(pool.clone());
            let k = limit.unwrap_or(cfg.retrieval.limit);
            let results = retrieval::retrieve(&store, &username, &query, k).await?;
            if results.is_empty() {
                println!("No results.");
            } else {
                for (i, text) in results.iter().enumerate() {
                    println!("{}. {}", i + 1, text);
                }
            }
            pool.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

/// Log in and run the read-submit-render loop.
async fn run_chat(cfg: &config::Config, username: &str, password: Option<String>) -> Result<()> {
    let pool = db::connect(&cfg.db.path).await?;
    let users = CredentialStore::new(pool.clone());
    authenticate_or_bail(&users, username, password).await?;

    let store = MessageStore::new(pool.clone());
    // Fail before the first prompt if the provider is unusable
    let model = model::create_model(&cfg.model)?;
    println!("Logged in as {}. Model: {}.", username, model.name());
    let mut session = Session::open(username, store.clone(), model, cfg.retrieval.clone());

    // Previous conversations come straight from the store, not the session
    if store.count(username).await? > 0 {
        println!("--- history ---");
        print!("{}", render::render_history(&store.history(username).await?));
        println!("---------------");
    }

    let interactive = atty::is(atty::Stream::Stdin);
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        if interactive {
            print!("> ");
            io::stdout().flush()?;
        }
        let Some(line) = lines.next() else {
            break; // EOF
        };
        let line = line?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            break;
        }

        let before = session.turns().len();
        session.submit(text).await?;
        print!("{}", render::render_turns(&session.turns()[before..]));
    }

    session.logout();
    println!("Logged out.");
    pool.close().await;
    Ok(())
}

/// Resolve a password and verify it, converting a mismatch into the
/// login-rejection error.
async fn authenticate_or_bail(
    users: &CredentialStore,
    username: &str,
    password: Option<String>,
) -> Result<()> {
    let password = read_password(password, "Password: ")?;
    if !users.authenticate(username, &password).await? {
        return Err(error::ChatError::InvalidCredentials.into());
    }
    Ok(())
}

/// Take the password from the flag, or read one line from stdin. The
/// prompt is only printed on a TTY.
fn read_password(flag: Option<String>, prompt: &str) -> Result<String> {
    if let Some(p) = flag {
        return Ok(p);
    }
    if atty::is(atty::Stream::Stdin) {
        print!("{}", prompt);
        io::stdout().flush()?;
    }
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
