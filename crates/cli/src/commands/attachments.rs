use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use jira_cli_api::multipart::{Form, Part};

use super::CommandContext;

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Path below /rest/api/3 (e.g. /attachment/content/10000)
    pub path: String,

    /// File to write the downloaded bytes to
    #[arg(short, long)]
    pub out: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct AttachArgs {
    /// Issue key (e.g. DEV-123)
    pub issue: String,

    /// File to upload
    pub file: PathBuf,
}

pub async fn download(ctx: &CommandContext<'_>, args: &DownloadArgs) -> Result<()> {
    let raw = ctx.client.get_raw(&args.path).await?;

    fs::write(&args.out, &raw.body)
        .with_context(|| format!("Failed to write {}", args.out.display()))?;

    eprintln!(
        "Saved {} bytes ({}) to {}",
        raw.body.len(),
        raw.content_type.as_deref().unwrap_or("unknown type"),
        args.out.display()
    );
    tracing::info!(path = %args.path, out = %args.out.display(), "Attachment downloaded successfully");
    Ok(())
}

pub async fn attach(ctx: &CommandContext<'_>, args: &AttachArgs) -> Result<()> {
    let content = fs::read(&args.file)
        .with_context(|| format!("Failed to read file: {}", args.file.display()))?;

    let file_name = args
        .file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment")
        .to_string();

    let form_name = file_name.clone();
    let response = ctx
        .client
        .post_form(&format!("/issue/{}/attachments", args.issue), move || {
            Form::new().part(
                "file",
                Part::bytes(content.clone()).file_name(form_name.clone()),
            )
        })
        .await
        .with_context(|| format!("Failed to attach {} to {}", file_name, args.issue))?;

    tracing::info!(issue = %args.issue, file = %file_name, "Attachment uploaded successfully");
    ctx.renderer.render_bytes(&response)
}
