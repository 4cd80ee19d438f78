//! Template system for challenge generation.
//!
//! Challenge sources live under `templates/challenges/<category>/` and are embedded into
//! the binary at compile-time via [`include_str!`] in the [`embedded`] module. A
//! directory with the same layout can be loaded at runtime instead (see
//! [`registry::TemplateRegistry::from_dir`]).
//!
//! ## Placeholder syntax
//!
//! Slots are a name between a pair of single-character markers, `{` and `}` by default:
//! - `{name}`: replaced by the `name` value of the render context
//! - `{{` / `}}`: a literal `{` / `}` in the output
//!
//! Any other marker use is a syntax error reported when the template is loaded, so a C
//! source with `int a[] = { 0 };` must be written as `int a[] = {{ 0 }};`.
//!
//! ## Adding a new template
//!
//! 1. Create the file under `templates/challenges/<category>/`
//! 2. Add a `pub const` with `include_str!` in [`embedded`] and list it in
//!    [`embedded::CHALLENGES`]
//! 3. Run `cargo test -p mkchal-core`; the registry tests parse every embedded template

pub mod embedded;
pub mod registry;
pub mod renderer;
pub mod syntax;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use syntax::{MarkerSyntax, Segment};

/// Identifies a template by category directory and file stem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TemplateId {
    pub category: String,
    pub name: String,
}

impl TemplateId {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

/// An immutable, pre-scanned template.
///
/// The content is scanned once at construction; [`Template::placeholders`] lists every
/// declared slot in first-occurrence order without duplicates.
#[derive(Debug, Clone)]
pub struct Template {
    id: TemplateId,
    extension: Option<String>,
    content: Vec<u8>,
    segments: Vec<Segment>,
    placeholders: Vec<String>,
}

impl Template {
    /// Scan `content` and build a template. Fails with `TemplateSyntax` on stray markers.
    pub fn parse(
        id: TemplateId,
        extension: Option<String>,
        content: Vec<u8>,
        markers: &MarkerSyntax,
    ) -> Result<Self> {
        let segments = markers.scan(&id, &content)?;

        let mut placeholders: Vec<String> = Vec::new();
        for segment in &segments {
            if let Segment::Slot(name) = segment {
                if !placeholders.contains(name) {
                    placeholders.push(name.clone());
                }
            }
        }

        Ok(Self {
            id,
            extension,
            content,
            segments,
            placeholders,
        })
    }

    pub fn id(&self) -> &TemplateId {
        &self.id
    }

    /// Raw template bytes, markers included.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    pub fn declares(&self, name: &str) -> bool {
        self.placeholders.iter().any(|p| p == name)
    }

    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// File name the rendered source is written under (e.g. `sample.c`).
    pub fn source_file_name(&self) -> String {
        match &self.extension {
            Some(ext) => format!("{}.{ext}", self.id.name),
            None => self.id.name.clone(),
        }
    }
}
