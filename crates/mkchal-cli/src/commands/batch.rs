use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use mkchal_core::config::MkchalConfig;
use mkchal_core::pipeline::{GenerationRequest, Pipeline, RequestSpec};

use crate::commands::report_run_error;
use crate::output;

/// Read a JSON array of requests from `file`.
pub fn load_requests(file: &Path) -> Result<Vec<RequestSpec>> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed to parse {}", file.display()))
}

/// Generate every request in `file`, up to `jobs` at a time.
///
/// All requests are validated against the registry before any run starts. Runs are
/// independent: one failure does not stop the others.
pub async fn run(config: MkchalConfig, file: &Path, jobs: Option<usize>) -> Result<()> {
    let specs = load_requests(file)?;
    let workers = jobs.unwrap_or(config.workers);
    let registry = config.registry()?;

    output::print_header(&format!("mkchal batch: {}", file.display()));
    output::print_key_value("Requests", &specs.len().to_string());
    output::print_key_value("Workers", &workers.to_string());

    let requests = specs
        .into_iter()
        .enumerate()
        .map(|(i, spec)| {
            spec.into_request(&registry)
                .with_context(|| format!("request #{} is invalid", i + 1))
        })
        .collect::<Result<Vec<GenerationRequest>>>()?;

    let pipeline = Pipeline::new(registry, Arc::new(config));
    let progress = ProgressBar::new(requests.len() as u64);
    progress.set_style(ProgressStyle::with_template(
        "{spinner} [{bar:30}] {pos}/{len} {msg}",
    )?);

    let results = pipeline
        .generate_all(requests, workers, |result| {
            match result {
                Ok(bundle) => progress.set_message(bundle.manifest.name.clone()),
                Err(err) => progress.set_message(format!("{} failed", err.template)),
            }
            progress.inc(1);
        })
        .await;
    progress.finish_and_clear();

    let mut failed = 0;
    for result in &results {
        match result {
            Ok(bundle) => output::print_success(&format!(
                "{} -> {}",
                bundle.manifest.template,
                bundle.root.display()
            )),
            Err(err) => {
                failed += 1;
                report_run_error(err);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} runs failed", results.len());
    }
    output::print_success(&format!("All {} challenges generated", results.len()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_requests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        std::fs::write(
            &path,
            r#"[
                { "category": "pwn", "name": "heap one", "author": "neil", "difficulty": "hard" },
                { "category": "web", "name": "portal", "author": "neil", "port": 8080,
                  "values": { "motd": "hi" } }
            ]"#,
        )
        .unwrap();

        let specs = load_requests(&path).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].port, Some(8080));
        assert_eq!(specs[1].values.get("motd").map(String::as_str), Some("hi"));

        std::fs::write(&path, r#"{ "category": "pwn" }"#).unwrap();
        assert!(load_requests(&path).is_err());
    }
}
