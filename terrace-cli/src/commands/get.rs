use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use terrace_core::{ActionKind, ActionResult, Response};
use terrace_state::{StateFile, scratch_dir};

use super::{banner, engine_version, read_request, write_file, write_response};

pub async fn run(output_dir: &Path) -> Result<()> {
    let request = read_request()?;
    let requested = request
        .version
        .clone()
        .context("Missing `version` in request")?;
    requested.validate().context("Invalid Version request")?;

    // The get after a destroy has nothing to read
    if request.params.action == ActionKind::Destroy {
        return write_response(&Response::new(requested));
    }

    let settings = request.get_settings(output_dir)?;
    banner("Fetching", &settings.env_name);

    let scratch = scratch_dir()?;
    let action = settings.build_action(scratch.path()).await?;
    let result = action.fetch(requested.is_plan()).await?;

    write_file(output_dir, "name", settings.env_name.as_bytes())?;
    if result.version.is_zero() {
        eprintln!("{}", "No state yet; nothing to fetch".yellow());
        return write_response(&Response::new(requested));
    }

    let state = if settings.output_statefile {
        Some(action.state_contents().await?)
    } else {
        None
    };
    write_outputs(output_dir, &result, state.as_deref())?;

    let mut response = Response::from_result(&result, engine_version(&action).await);
    if requested.is_plan() {
        response.version = requested;
    }
    write_response(&response)
}

/// Write `metadata` (raw outputs as JSON) and optionally the state document
fn write_outputs(output_dir: &Path, result: &ActionResult, state: Option<&[u8]>) -> Result<()> {
    let metadata =
        serde_json::to_vec(&result.raw_output()).context("Failed to write output file")?;
    write_file(output_dir, "metadata", &metadata)?;

    if let Some(state) = state {
        write_file(output_dir, StateFile::LOCAL_FILE_NAME, state)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use terrace_core::Version;

    #[test]
    fn test_write_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let result = ActionResult::new(
            Version::from_serial("prod", 3),
            serde_json::from_value(json!({
                "pw": {"value": "secret123", "sensitive": true},
                "ports": {"value": [80, 443]},
            }))
            .unwrap(),
        );

        write_outputs(dir.path(), &result, Some(br#"{"serial": 3}"#)).unwrap();

        let metadata: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("metadata")).unwrap()).unwrap();
        // the metadata file is for downstream tasks, so it keeps raw values
        assert_eq!(metadata, json!({"pw": "secret123", "ports": [80, 443]}));
        assert!(dir.path().join("terraform.tfstate").is_file());
    }

    #[test]
    fn test_write_outputs_without_state() {
        let dir = tempfile::tempdir().unwrap();
        let result = ActionResult::without_output(Version::from_serial("prod", 1));

        write_outputs(dir.path(), &result, None).unwrap();
        assert_eq!(std::fs::read(dir.path().join("metadata")).unwrap(), b"{}");
        assert!(!dir.path().join("terraform.tfstate").exists());
    }
}
