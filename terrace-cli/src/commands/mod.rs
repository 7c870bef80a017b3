pub mod get;
pub mod put;

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use terrace_core::{Action, Request, Response};

fn read_request() -> Result<Request> {
    let mut raw = Vec::new();
    std::io::stdin()
        .read_to_end(&mut raw)
        .context("Failed to read request from stdin")?;
    Ok(Request::from_json(&raw)?)
}

fn write_response(response: &Response) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, response).context("Failed to write response")?;
    writeln!(stdout)?;
    Ok(())
}

fn write_file(dir: &Path, name: &str, contents: &[u8]) -> Result<()> {
    let path = dir.join(name);
    std::fs::write(&path, contents)
        .with_context(|| format!("Failed to create {} file at path '{}'", name, path.display()))
}

fn banner(title: &str, env_name: &str) {
    eprintln!("{} {}", title.cyan().bold(), env_name.bold());
}

/// Engine version for metadata; absence is not worth failing the step
async fn engine_version(action: &Action) -> Option<String> {
    match action.engine_version().await {
        Ok(version) => Some(version),
        Err(e) => {
            log::warn!("Failed to read terraform version: {}", e);
            None
        }
    }
}
