//! `scoreplay`: upload, resume and fetch files through the file API.

mod commands;
mod config;
mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::Context;
use config::{ConfigFile, Settings};

#[derive(Parser)]
#[command(name = "scoreplay", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file to read instead of <config dir>/scoreplay/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Control-plane base URL
    #[arg(long, global = true, env = "API_URL")]
    api_url: Option<String>,

    /// Storage host[:port] to use instead of the one in presigned URLs
    #[arg(long, global = true, env = "S3_HOST")]
    s3_host: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Upload and retrieve files
    #[command(subcommand)]
    File(FileCommand),
}

#[derive(Subcommand)]
enum FileCommand {
    /// Register a single-request upload and print its destination
    RequestUpload { path: PathBuf, tags: Vec<String> },

    /// Upload a file in a single request
    Upload { path: PathBuf, tags: Vec<String> },

    /// Open a multipart session and print it
    RequestMultipart { path: PathBuf, tags: Vec<String> },

    /// Upload a file in verified parts
    UploadMultipart {
        path: PathBuf,
        tags: Vec<String>,
        /// Parts in flight at once
        #[arg(long)]
        concurrency: Option<usize>,
        /// Halt after this many parts without completing
        #[arg(long)]
        stop_after: Option<u32>,
    },

    /// Continue an interrupted multipart upload
    Resume {
        path: PathBuf,
        /// Session to continue (defaults to the saved session for this file)
        #[arg(long, requires = "part_size")]
        session: Option<String>,
        /// Part size of that session
        #[arg(long, requires = "session")]
        part_size: Option<u64>,
        /// Parts in flight at once
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Upload part of a file, list the server's parts, then resume
    TestResumeFlow {
        path: PathBuf,
        tags: Vec<String>,
        /// Parts to send before halting (default: half)
        #[arg(long)]
        stop_after: Option<u32>,
    },

    /// Send a part whose bytes do not match its authorized checksum
    TestBadChecksum { path: PathBuf, tags: Vec<String> },

    /// List the parts the server holds for a session
    ListParts {
        session: String,
        nb_parts: u32,
        /// List parts after this part number
        #[arg(long)]
        marker: Option<u32>,
        /// Keep following markers until the listing is exhausted
        #[arg(long)]
        auto: bool,
    },

    /// Print file info with a reachable download URL
    Get { file_id: String },

    /// Download a file
    Download {
        file_id: String,
        /// Destination (default: downloaded_<filename>)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,scoreplay=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(config::default_config_path);
    let file = ConfigFile::load(&config_path)?;
    let settings = Settings::resolve(file, cli.api_url, cli.s3_host, &config::app_dir());
    tracing::debug!(api_url = %settings.client.api_url, "configuration resolved");

    let ctx = Context::new(settings)?;
    match cli.command {
        Command::File(cmd) => run_file(&ctx, cmd).await,
    }
}

async fn run_file(ctx: &Context, cmd: FileCommand) -> anyhow::Result<()> {
    match cmd {
        FileCommand::RequestUpload { path, tags } => ctx.request_upload(&path, tags).await,
        FileCommand::Upload { path, tags } => ctx.upload(&path, tags).await,
        FileCommand::RequestMultipart { path, tags } => ctx.request_multipart(&path, tags).await,
        FileCommand::UploadMultipart {
            path,
            tags,
            concurrency,
            stop_after,
        } => {
            ctx.upload_multipart(&path, tags, concurrency, stop_after)
                .await
        }
        FileCommand::Resume {
            path,
            session,
            part_size,
            concurrency,
        } => ctx.resume(&path, session, part_size, concurrency).await,
        FileCommand::TestResumeFlow {
            path,
            tags,
            stop_after,
        } => ctx.test_resume_flow(&path, tags, stop_after).await,
        FileCommand::TestBadChecksum { path, tags } => ctx.test_bad_checksum(&path, tags).await,
        FileCommand::ListParts {
            session,
            nb_parts,
            marker,
            auto,
        } => ctx.list_parts(&session, nb_parts, marker, auto).await,
        FileCommand::Get { file_id } => ctx.get(&file_id).await,
        FileCommand::Download { file_id, output } => ctx.download(&file_id, output).await,
    }
}
