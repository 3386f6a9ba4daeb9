use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "sluice", version, about = "Tenant-isolated query gateway")]
struct Cli {
    /// Gateway configuration (sluice.yaml). Defaults apply when omitted.
    #[arg(long, global = true, env = "SLUICE_CONFIG")]
    config: Option<PathBuf>,

    /// Schema snapshot JSON, overriding `snapshot_file` from the configuration.
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    /// Cursor signing secret, overriding the configuration.
    #[arg(long, global = true, env = "SLUICE_CURSOR_SECRET", hide_env_values = true)]
    cursor_secret: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify a statement against the read-only statement policy.
    Classify {
        sql: String,
    },

    /// Show the tenant-scoped rewrite of a statement without executing it.
    Explain {
        #[arg(long)]
        tenant: String,

        /// Bind parameters as a JSON array, e.g. '["open", 3]'
        #[arg(long)]
        params: Option<String>,

        sql: String,
    },

    /// Run a statement through the gateway against Postgres.
    Query {
        #[arg(long)]
        tenant: String,

        /// Bind parameters as a JSON array, e.g. '["open", 3]'
        #[arg(long)]
        params: Option<String>,

        #[arg(long)]
        page_token: Option<String>,

        #[arg(long)]
        page_size: Option<u64>,

        /// Include column names and types in the envelope.
        #[arg(long, default_value_t = false)]
        columns: bool,

        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        database_url: String,

        sql: String,
    },

    /// Capture a schema snapshot from the database.
    Snapshot {
        #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
        database_url: String,

        /// Write the snapshot here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Continuation token utilities.
    Cursor {
        #[command(subcommand)]
        cmd: CursorCommand,
    },
}

#[derive(Subcommand, Debug)]
enum CursorCommand {
    /// Verify a token and print its non-secret metadata.
    Inspect { token: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries JSON output only.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = commands::load_config(cli.config.as_deref())?;
    if let Some(secret) = cli.cursor_secret {
        config.cursor.secret = Some(secret);
    }
    if let Some(snapshot) = cli.snapshot {
        config.snapshot_file = Some(snapshot);
    }

    match cli.cmd {
        Command::Classify { sql } => commands::classify::run(&config, &sql),
        Command::Explain {
            tenant,
            params,
            sql,
        } => commands::explain::run(&config, &tenant, params.as_deref(), &sql),
        Command::Query {
            tenant,
            params,
            page_token,
            page_size,
            columns,
            timeout_ms,
            database_url,
            sql,
        } => {
            let args = commands::query::QueryArgs {
                tenant,
                params,
                page_token,
                page_size,
                columns,
                timeout_ms,
                sql,
            };
            commands::query::run(&config, &database_url, args).await
        }
        Command::Snapshot { database_url, out } => {
            commands::snapshot::run(&database_url, out.as_deref()).await
        }
        Command::Cursor {
            cmd: CursorCommand::Inspect { token },
        } => commands::cursor::inspect(&config, &token),
    }
}
