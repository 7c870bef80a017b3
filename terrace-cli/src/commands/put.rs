use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use terrace_core::{ActionKind, Error, Response};
use terrace_state::scratch_dir;

use super::{banner, engine_version, read_request, write_response};

pub async fn run(work_dir: &Path) -> Result<()> {
    let request = read_request()?;
    let settings = request.put_settings(work_dir)?;

    let scratch = scratch_dir()?;
    let action = settings.build_action(scratch.path()).await?;
    let env_name = settings.env_name.as_str();

    let result = if settings.plan_only {
        banner("Previewing", env_name);
        let mut result = action.fetch(true).await?;
        result.version.plan_only = true;
        result
    } else {
        match settings.action {
            ActionKind::Create => {
                banner("Terraform Apply", env_name);
                let result = action
                    .apply()
                    .await
                    .inspect_err(|e| warn_if_live(env_name, e))?;
                eprintln!("{}", "Apply complete!".green().bold());
                result
            }
            ActionKind::Destroy => {
                banner("Terraform Destroy", env_name);
                let result = action.destroy().await?;
                eprintln!("{}", "Destroy complete!".green().bold());
                result
            }
        }
    };

    let response = Response::from_result(&result, engine_version(&action).await);
    write_response(&response)
}

fn warn_if_live(env_name: &str, err: &Error) {
    if let Some(warning) = live_warning(env_name, err) {
        eprintln!("{}", warning.yellow().bold());
    }
}

/// Warning for failures that may have left resources running
fn live_warning(env_name: &str, err: &Error) -> Option<String> {
    err.infrastructure_may_be_live().then(|| {
        format!(
            "Warning: resources for '{}' may still exist; inspect or destroy them before retrying",
            env_name
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_warning_only_after_mutation() {
        let apply = Error::apply_failed(Error::external_tool(
            "terraform apply",
            "exit status: 1",
            "Error: quota exceeded",
        ));
        let warning = live_warning("staging", &apply).unwrap();
        assert!(warning.contains("'staging'"));

        let post = Error::post_apply(Error::malformed_state("missing serial"));
        assert!(live_warning("staging", &post).is_some());

        let setup = Error::validation("env_name must not be empty");
        assert!(live_warning("staging", &setup).is_none());
    }
}
