use std::io::Write;
use std::path::Path;

use anyhow::Result;

use mkchal_core::challenge::Category;
use mkchal_core::config::MkchalConfig;
use mkchal_core::templates::renderer::{render, RenderContext};

use crate::output;

/// Render a template with the given values and print or write the result.
///
/// Only the render stage runs: nothing is built and no bundle is written.
pub fn run(
    config: &MkchalConfig,
    category: Category,
    template: &str,
    values: Vec<(String, String)>,
    out: Option<&Path>,
) -> Result<()> {
    let registry = config.registry()?;
    let template = registry.load(category.as_str(), template)?;
    let context: RenderContext = values.into_iter().collect();
    let rendered = render(&template, &context)?;

    match out {
        Some(path) => {
            std::fs::write(path, rendered.content())?;
            output::print_success(&format!(
                "Rendered {} to {}",
                template.id(),
                path.display()
            ));
        }
        None => std::io::stdout().write_all(rendered.content())?,
    }

    Ok(())
}
