use std::path::Path;

use anyhow::Result;

use mkchal_core::challenge;
use mkchal_core::config::MkchalConfig;

use crate::output;

/// Check every generated challenge for a well-formed `chal.json`.
///
/// Fails when any challenge has a violation, so it can gate CI.
pub fn run(config: &MkchalConfig, output_dir: Option<&Path>) -> Result<()> {
    let root = output_dir.unwrap_or(&config.output_dir);
    output::print_header(&format!("mkchal verify: {}", root.display()));

    let violations = challenge::verify(root)?;
    if violations.is_empty() {
        output::print_success("All challenges have valid manifests");
        return Ok(());
    }

    for violation in &violations {
        output::print_error(&violation.to_string());
    }
    anyhow::bail!("{} challenge(s) failed verification", violations.len())
}
