//! Strict placeholder substitution.
//!
//! Rendering refuses to run unless the render context and the template's declared
//! placeholders match exactly. A missing value would leave a marker in generated
//! source; an extra value usually means the template and the caller drifted apart.
//!
//! Substitution is a single pass over the pre-scanned segments. Inserted values are
//! copied verbatim and never scanned again, so a value like `"{flag}"` lands in the
//! output as those six characters.
//!
//! ## Usage
//!
//! ```ignore
//! use mkchal_core::templates::renderer::{render, RenderContext};
//!
//! let template = registry.load("pwn", "sample")?;
//! let context = RenderContext::new().with("name", "warmup");
//! let rendered = render(&template, &context)?;
//! ```

use std::collections::BTreeMap;

use crate::error::{MkchalError, Result};
use crate::templates::syntax::Segment;
use crate::templates::{Template, TemplateId};

/// Values for a template's placeholders, keyed by placeholder name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    values: BTreeMap<String, String>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a value, returning the previous one for that name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Placeholder names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RenderContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Output of [`render`], handed to the build stage by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSource {
    template: TemplateId,
    file_name: String,
    content: Vec<u8>,
}

impl RenderedSource {
    pub fn template(&self) -> &TemplateId {
        &self.template
    }

    /// File name the source is materialized under (e.g. `sample.c`).
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

/// Substitute every placeholder of `template` with its value from `context`.
///
/// Fails with [`MkchalError::UnresolvedPlaceholder`] for the first declared slot that has
/// no value, then with [`MkchalError::UnusedValue`] for the first context key the template
/// never references.
pub fn render(template: &Template, context: &RenderContext) -> Result<RenderedSource> {
    if let Some(missing) = template
        .placeholders()
        .iter()
        .find(|name| !context.contains(name))
    {
        return Err(MkchalError::UnresolvedPlaceholder {
            template: template.id().clone(),
            name: missing.clone(),
        });
    }

    if let Some(extra) = context.keys().find(|key| !template.declares(key)) {
        return Err(MkchalError::UnusedValue {
            template: template.id().clone(),
            name: extra.to_string(),
        });
    }

    let raw = template.content();
    let mut content = Vec::with_capacity(raw.len());
    for segment in template.segments() {
        match segment {
            Segment::Text(range) => content.extend_from_slice(&raw[range.clone()]),
            Segment::Literal(marker) => content.push(*marker),
            Segment::Slot(name) => {
                // Presence was checked above.
                if let Some(value) = context.get(name) {
                    content.extend_from_slice(value.as_bytes());
                }
            }
        }
    }

    Ok(RenderedSource {
        template: template.id().clone(),
        file_name: template.source_file_name(),
        content,
    })
}
