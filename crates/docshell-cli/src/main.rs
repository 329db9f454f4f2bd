//! Docshell CLI - Document storage with atomic ingestion

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Docshell - Store documents and their metadata as one
#[derive(Parser)]
#[command(name = "docshell")]
#[command(version)]
#[command(about = "Store documents and their metadata as one", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the platform default
    #[arg(long, global = true, env = "DOCSHELL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize Docshell (create config, database and volume)
    Init,

    /// Ingest a file, or every file in a directory
    Ingest {
        /// Path to file or directory to ingest
        path: PathBuf,

        /// Author user ID
        #[arg(short, long)]
        author: i64,

        /// Uploader user ID (defaults to the author)
        #[arg(short, long)]
        uploader: Option<i64>,

        /// Target directory inside the volume
        #[arg(short = 'p', long = "path", default_value = "")]
        target: String,

        /// Per-document timeout in seconds (default: from config)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// List stored documents
    List {
        /// Only documents by this author
        #[arg(short, long)]
        author: Option<i64>,

        /// Only documents uploaded by this user
        #[arg(short, long, conflicts_with = "author")]
        uploader: Option<i64>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show details of a document and verify its blob
    Show {
        /// Document ID
        id: i64,
    },

    /// Copy a stored document out of the volume
    Download {
        /// Volume-relative path (as shown by `list`)
        path: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Print the config file location
    Path,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docshell=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docshell=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = commands::Session::load(cli.config).and_then(|session| match cli.command {
        Commands::Init => commands::init::run(&session),
        Commands::Ingest {
            path,
            author,
            uploader,
            target,
            timeout,
        } => commands::ingest::run(
            &session,
            &path,
            author,
            uploader.unwrap_or(author),
            &target,
            timeout,
        ),
        Commands::List {
            author,
            uploader,
            json,
        } => commands::list::run(&session, author, uploader, json),
        Commands::Show { id } => commands::show::run(&session, id),
        Commands::Download { path, output } => {
            commands::download::run(&session, &path, output.as_deref())
        }
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => commands::config::show(&session),
            ConfigCommands::Path => commands::config::path(&session),
        },
    });

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
