use std::fs;

use anyhow::{Context, Result};
use clap::Args;
use jira_cli_api::ApiClient;
use jira_cli_output::OutputRenderer;

pub mod attachments;

pub struct CommandContext<'a> {
    pub client: ApiClient,
    pub renderer: &'a OutputRenderer,
}

#[derive(Args, Debug, Clone)]
pub struct VerbArgs {
    /// Path below /rest/api/3 (e.g. /issue/DEV-123)
    pub path: String,

    /// JSON request body, or @file to read it from a file
    #[arg(short, long)]
    pub data: Option<String>,
}

pub async fn get(ctx: &CommandContext<'_>, args: &VerbArgs) -> Result<()> {
    let body = ctx.client.get(&args.path).await?;
    ctx.renderer.render_bytes(&body)
}

pub async fn post(ctx: &CommandContext<'_>, args: &VerbArgs) -> Result<()> {
    let payload = read_data(args.data.as_deref())?;
    let body = ctx.client.post(&args.path, payload).await?;
    ctx.renderer.render_bytes(&body)
}

pub async fn put(ctx: &CommandContext<'_>, args: &VerbArgs) -> Result<()> {
    let payload = read_data(args.data.as_deref())?;
    let body = ctx.client.put(&args.path, payload).await?;
    ctx.renderer.render_bytes(&body)
}

pub async fn delete(ctx: &CommandContext<'_>, args: &VerbArgs) -> Result<()> {
    let body = ctx.client.delete(&args.path).await?;
    ctx.renderer.render_bytes(&body)
}

pub async fn whoami(ctx: &CommandContext<'_>) -> Result<()> {
    let body = ctx.client.get("/myself").await?;
    ctx.renderer.render_bytes(&body)
}

/// Resolves `--data`: inline JSON, or `@path` to load it from disk. The
/// payload must be valid JSON so typos fail before reaching the server.
fn read_data(data: Option<&str>) -> Result<Option<Vec<u8>>> {
    let Some(data) = data else {
        return Ok(None);
    };

    let bytes = match data.strip_prefix('@') {
        Some(path) => fs::read(path).with_context(|| format!("Failed to read file: {path}"))?,
        None => data.as_bytes().to_vec(),
    };

    serde_json::from_slice::<serde_json::Value>(&bytes).context("Request body is not valid JSON")?;
    Ok(Some(bytes))
}
