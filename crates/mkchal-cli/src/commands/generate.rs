use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use dialoguer::Select;

use mkchal_core::bundle::Bundle;
use mkchal_core::challenge::{Category, Difficulty};
use mkchal_core::config::MkchalConfig;
use mkchal_core::pipeline::{Pipeline, RequestSpec, RunError, DEFAULT_TEMPLATE};
use mkchal_core::templates::registry::TemplateRegistry;

use crate::commands::report_run_error;
use crate::output;

/// Arguments of `mkchal generate`.
pub struct GenerateArgs {
    pub name: String,
    pub author: String,
    pub description: String,
    pub category: Category,
    pub template: Option<String>,
    pub difficulty: Difficulty,
    pub flag: Option<String>,
    pub port: Option<u16>,
    pub values: Vec<(String, String)>,
    pub output: Option<PathBuf>,
    pub timeout: Option<u64>,
}

/// Run one challenge through load, render, build and package.
///
/// If no template is given and stdin is a terminal, prompts for one.
pub async fn run(mut config: MkchalConfig, args: GenerateArgs) -> Result<()> {
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }

    let registry = config.registry()?;
    let template = match args.template {
        Some(t) => t,
        None => select_template(&registry, args.category)?,
    };

    output::print_header(&format!("mkchal generate: {}", args.name));

    let spec = RequestSpec {
        category: args.category,
        template: Some(template),
        name: args.name,
        author: args.author,
        description: args.description,
        difficulty: args.difficulty,
        flag: args.flag,
        port: args.port,
        values: args.values.into_iter().collect(),
    };
    let request = spec.into_request(&registry)?;
    let pipeline = Pipeline::new(registry, Arc::new(config));

    output::print_key_value("Template", &request.template.to_string());
    output::print_key_value(
        "Values",
        &request.context.keys().collect::<Vec<_>>().join(", "),
    );
    output::print_key_value(
        "Destination",
        &pipeline.destination(&request).display().to_string(),
    );

    finish(pipeline.generate(request).await)
}

/// Print the outcome of a run. A failure is reported once here; the returned error
/// only names the template.
fn finish(result: Result<Bundle, RunError>) -> Result<()> {
    match result {
        Ok(bundle) => {
            output::print_success(&format!(
                "Challenge '{}' packaged at {}",
                bundle.manifest.name,
                bundle.root.display()
            ));
            for file in &bundle.files {
                println!("    {}", file.display());
            }
            Ok(())
        }
        Err(err) => {
            report_run_error(&err);
            anyhow::bail!("generation of '{}' failed", err.template)
        }
    }
}

fn select_template(registry: &TemplateRegistry, category: Category) -> Result<String> {
    let ids = registry.list(category.as_str());
    if ids.len() < 2 || !std::io::stdin().is_terminal() {
        return Ok(DEFAULT_TEMPLATE.to_string());
    }

    let names: Vec<&str> = ids.iter().map(|id| id.name.as_str()).collect();
    let default = names
        .iter()
        .position(|n| *n == DEFAULT_TEMPLATE)
        .unwrap_or(0);
    let selection = Select::new()
        .with_prompt(format!("Select {category} template"))
        .items(&names)
        .default(default)
        .interact()?;

    Ok(names[selection].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mkchal_core::error::MkchalError;
    use mkchal_core::pipeline::Stage;
    use mkchal_core::templates::TemplateId;

    #[test]
    fn test_failed_run_error_is_not_repeated() {
        let err = finish(Err(RunError {
            stage: Stage::Build,
            template: TemplateId::new("pwn", "sample"),
            source: MkchalError::Build {
                template: TemplateId::new("pwn", "sample"),
                status: "exit status: 1".into(),
                diagnostics: "sample.c:3: error: expected ';'".into(),
            },
        }))
        .unwrap_err();

        assert_eq!(err.to_string(), "generation of 'pwn/sample' failed");
        assert_eq!(err.chain().count(), 1);
    }
}
