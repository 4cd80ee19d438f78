use anyhow::Result;

use mkchal_core::challenge::Category;
use mkchal_core::config::MkchalConfig;

use crate::output;

/// List templates per category with the placeholders each one declares.
pub fn run(config: &MkchalConfig, category: Option<Category>) -> Result<()> {
    let registry = config.registry()?;
    output::print_header("mkchal templates");

    let categories = match category {
        Some(c) => vec![c.to_string()],
        None => registry.categories(),
    };

    if categories.is_empty() {
        output::print_warning("no templates found");
        return Ok(());
    }

    for category in categories {
        let ids = registry.list(&category);
        println!("\n{category}");
        if ids.is_empty() {
            output::print_warning(&format!("no templates in `{category}`"));
            continue;
        }
        for id in ids {
            let template = registry.load(&id.category, &id.name)?;
            let placeholders = if template.placeholders().is_empty() {
                "(none)".to_string()
            } else {
                template.placeholders().join(", ")
            };
            output::print_key_value(&id.name, &placeholders);
        }
    }

    Ok(())
}
