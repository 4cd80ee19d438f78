//! The set of known templates, keyed by category and name.
//!
//! A registry is built once and never mutated afterwards; the pipeline shares it
//! between concurrent runs behind an [`Arc`] without any locking.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::error::{MkchalError, Result};
use crate::templates::embedded;
use crate::templates::syntax::MarkerSyntax;
use crate::templates::{Template, TemplateId};

static BUILTIN: OnceLock<Arc<TemplateRegistry>> = OnceLock::new();

/// Read-only collection of scanned templates.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<TemplateId, Template>,
}

impl TemplateRegistry {
    /// The templates compiled into the binary, initialized on first use.
    pub fn builtin() -> Arc<Self> {
        BUILTIN
            .get_or_init(|| {
                let registry = Self::from_embedded(embedded::CHALLENGES, &MarkerSyntax::default())
                    .expect("embedded templates are scanned by the registry tests");
                Arc::new(registry)
            })
            .clone()
    }

    /// Build a registry from in-memory `(category, name, extension, content)` entries.
    pub fn from_embedded(
        entries: &[(&str, &str, &str, &str)],
        markers: &MarkerSyntax,
    ) -> Result<Self> {
        let mut registry = Self::default();
        for (category, name, extension, content) in entries {
            let ext = (!extension.is_empty()).then(|| extension.to_string());
            let template = Template::parse(
                TemplateId::new(*category, *name),
                ext,
                content.as_bytes().to_vec(),
                markers,
            )?;
            registry.insert(template)?;
        }
        Ok(registry)
    }

    /// Load every `<root>/<category>/<file>` as a template named by the file stem.
    ///
    /// Top-level files, nested directories and hidden entries are skipped.
    pub fn from_dir(root: &Path, markers: &MarkerSyntax) -> Result<Self> {
        markers.validate()?;
        let mut registry = Self::default();

        for category_entry in std::fs::read_dir(root)? {
            let category_entry = category_entry?;
            if !category_entry.file_type()?.is_dir() {
                continue;
            }
            let Some(category) = visible_name(&category_entry.path()) else {
                continue;
            };

            for entry in std::fs::read_dir(category_entry.path())? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                let path = entry.path();
                if visible_name(&path).is_none() {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    tracing::warn!("skipping template with non UTF-8 name: {}", path.display());
                    continue;
                };
                let extension = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(str::to_string);

                let content = std::fs::read(&path)?;
                let template = Template::parse(
                    TemplateId::new(category.clone(), stem),
                    extension,
                    content,
                    markers,
                )?;
                tracing::debug!(
                    "registered template {} ({} placeholders)",
                    template.id(),
                    template.placeholders().len()
                );
                registry.insert(template)?;
            }
        }

        Ok(registry)
    }

    fn insert(&mut self, template: Template) -> Result<()> {
        let id = template.id().clone();
        if self.templates.contains_key(&id) {
            return Err(MkchalError::DuplicateTemplate(id));
        }
        self.templates.insert(id, template);
        Ok(())
    }

    /// Categories that contain at least one template, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> =
            self.templates.keys().map(|id| id.category.clone()).collect();
        categories.dedup();
        categories
    }

    /// Template identifiers in `category`, sorted by name. Empty for unknown categories.
    pub fn list(&self, category: &str) -> Vec<TemplateId> {
        self.templates
            .keys()
            .filter(|id| id.category == category)
            .cloned()
            .collect()
    }

    pub fn load(&self, category: &str, name: &str) -> Result<Template> {
        let id = TemplateId::new(category, name);
        self.templates
            .get(&id)
            .cloned()
            .ok_or(MkchalError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn visible_name(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    (!name.starts_with('.')).then(|| name.to_string())
}
