mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use commands::attachments::{AttachArgs, DownloadArgs};
use commands::{CommandContext, VerbArgs};
use jira_cli_api::{ApiClient, ApiError, VerboseLog};
use jira_cli_config::Settings;
use jira_cli_output::{OutputFormat, OutputRenderer};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "jira-cli", version, about = "Command-line client for Jira Cloud", long_about = None)]
struct Cli {
    /// Path to config file (defaults to ~/.jira-cli/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format for command results
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    /// Print every HTTP request with its status and duration to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: JiraCommand,
}

#[derive(Subcommand, Debug, Clone)]
enum JiraCommand {
    /// GET a path below /rest/api/3
    Get(VerbArgs),
    /// POST to a path below /rest/api/3
    Post(VerbArgs),
    /// PUT to a path below /rest/api/3
    Put(VerbArgs),
    /// DELETE a path below /rest/api/3
    Delete(VerbArgs),
    /// Download binary content (e.g. attachment/content/{id})
    Download(DownloadArgs),
    /// Attach a file to an issue
    Attach(AttachArgs),
    /// Show the authenticated user
    Whoami,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.debug) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            if let Some(hint) = err.downcast_ref::<ApiError>().and_then(ApiError::suggestion) {
                eprintln!("Hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_ref())?;
    let client = build_client(&settings, cli.verbose)?;
    let renderer = OutputRenderer::new(cli.output);

    let cancel = client.cancellation().clone();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let ctx = CommandContext {
        client,
        renderer: &renderer,
    };

    tokio::select! {
        result = dispatch(cli.command, &ctx) => result,
        _ = cancel.cancelled() => Err(anyhow!("Interrupted")),
    }
}

async fn dispatch(command: JiraCommand, ctx: &CommandContext<'_>) -> Result<()> {
    match command {
        JiraCommand::Get(args) => commands::get(ctx, &args).await,
        JiraCommand::Post(args) => commands::post(ctx, &args).await,
        JiraCommand::Put(args) => commands::put(ctx, &args).await,
        JiraCommand::Delete(args) => commands::delete(ctx, &args).await,
        JiraCommand::Download(args) => commands::attachments::download(ctx, &args).await,
        JiraCommand::Attach(args) => commands::attachments::attach(ctx, &args).await,
        JiraCommand::Whoami => commands::whoami(ctx).await,
    }
}

fn init_tracing(debug: bool) -> Result<()> {
    let default = if debug {
        "warn,jira_cli=debug,jira_cli_api=debug,jira_cli_config=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("failed to initialize logger: {err}"))
}

fn build_client(settings: &Settings, verbose: bool) -> Result<ApiClient> {
    let client = ApiClient::new(settings.base_url.as_str())?
        .with_basic_auth(settings.email.clone(), settings.api_token.clone())
        .with_timeout(settings.timeout);

    Ok(if verbose {
        client.with_verbose(VerboseLog::stderr())
    } else {
        client
    })
}
