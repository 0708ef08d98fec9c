//! # Grounded Chat CLI (`gchat`)
//!
//! The `gchat` binary administers tenants' agents and knowledge spaces,
//! runs single chat turns, and starts the chat server.
//!
//! ## Usage
//!
//! ```bash
//! gchat --config ./config/gchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gchat init` | Create the SQLite database and run schema migrations |
//! | `gchat serve` | Start the chat completion HTTP server |
//! | `gchat agent add/list` | Register or list a tenant's agents |
//! | `gchat space add/list/delete` | Register, list or delete a tenant's knowledge spaces |
//! | `gchat conversations` | Show recent conversations of an agent |
//! | `gchat chat "<message>"` | Answer one message through the full pipeline |
//! | `gchat namespace` | Print the vector namespace of a knowledge space version |
//! | `gchat completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! gchat init
//! gchat space add --tenant acme --id docs --name "Docs" \
//!     --url https://acme.test/docs --version 2024-05-01
//! gchat agent add --tenant acme --id helper --name "Helper" --spaces docs --strict
//! gchat chat --tenant acme --user u1 --agent helper "How do I reset my password?"
//! gchat serve
//! ```

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use grounded_chat::chat_cmd::ChatArgs;
use grounded_chat::{admin, chat_cmd, config, logging, migrate, server};
use grounded_chat_core::models::{Agent, KnowledgeSpace};
use grounded_chat_core::namespace::Namespace;

/// Grounded Chat: retrieval-augmented chat over tenants' knowledge spaces.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file.
#[derive(Parser)]
#[command(
    name = "gchat",
    about = "Grounded Chat: retrieval-augmented chat over tenants' knowledge spaces",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Start the chat server on `[server].bind`.
    Serve,

    /// Manage agents.
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Manage knowledge spaces.
    Space {
        #[command(subcommand)]
        action: SpaceAction,
    },

    /// Show an agent's most recent conversations.
    Conversations {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        agent: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Answer a single message.
    ///
    /// Requires the `[embedding]` and `[completion]` providers to be enabled.
    Chat {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        agent: String,
        /// The user message.
        message: String,
        /// Print the answer as SSE frames.
        #[arg(long)]
        stream: bool,
    },

    /// Print the vector namespace for a knowledge space version.
    Namespace {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        space: String,
        #[arg(long)]
        version: String,
    },

    /// Generate shell completions.
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Create or replace an agent.
    Add {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// Linked knowledge space ids, comma separated, in search order.
        #[arg(long, value_delimiter = ',', required = true)]
        spaces: Vec<String>,
        /// Refuse to answer when nothing relevant is retrieved.
        #[arg(long)]
        strict: bool,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List a tenant's agents.
    List {
        #[arg(long)]
        tenant: String,
    },
}

#[derive(Subcommand)]
enum SpaceAction {
    /// Create or replace a knowledge space.
    Add {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// Source URL; repeat for several.
        #[arg(long = "url", required = true)]
        urls: Vec<String>,
        /// Current ingestion version (YYYY-MM-DD).
        #[arg(long)]
        version: String,
    },
    /// Delete a knowledge space and its vector collection.
    Delete {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        id: String,
    },
    /// List a tenant's knowledge spaces.
    List {
        #[arg(long)]
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Namespace {
            tenant,
            space,
            version,
        } => {
            println!("{}", Namespace::new(tenant, space, version));
            return Ok(());
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "gchat", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Agent { action } => match action {
            AgentAction::Add {
                tenant,
                id,
                name,
                spaces,
                strict,
                description,
            } => {
                let agent = Agent::new(tenant, id, name, spaces, strict, description)?;
                admin::run_agent_add(&cfg, agent).await?;
            }
            AgentAction::List { tenant } => {
                admin::run_agent_list(&cfg, &tenant).await?;
            }
        },
        Commands::Space { action } => match action {
            SpaceAction::Add {
                tenant,
                id,
                name,
                urls,
                version,
            } => {
                let space = KnowledgeSpace::new(tenant, id, name, urls, version)?;
                admin::run_space_add(&cfg, space).await?;
            }
            SpaceAction::Delete { tenant, id } => {
                admin::run_space_delete(&cfg, &tenant, &id).await?;
            }
            SpaceAction::List { tenant } => {
                admin::run_space_list(&cfg, &tenant).await?;
            }
        },
        Commands::Conversations {
            tenant,
            agent,
            limit,
        } => {
            admin::run_conversations(&cfg, &tenant, &agent, limit).await?;
        }
        Commands::Chat {
            tenant,
            user,
            agent,
            message,
            stream,
        } => {
            chat_cmd::run_chat(
                &cfg,
                ChatArgs {
                    tenant_id: tenant,
                    user_id: user,
                    agent_id: agent,
                    message,
                    stream,
                },
            )
            .await?;
        }
        Commands::Namespace { .. } | Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
