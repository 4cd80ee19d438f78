//! Unified error types for the mkchal toolkit.

use std::path::PathBuf;
use thiserror::Error;

use crate::templates::TemplateId;

/// All errors that can occur during mkchal operations.
#[derive(Error, Debug)]
pub enum MkchalError {
    // --- Configuration ---

    /// The configuration file (`mkchal.config.json`) was not found.
    #[error("config file not found at {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file exists but contains invalid JSON.
    #[error("failed to parse {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The marker pair configured for placeholders cannot be scanned unambiguously.
    #[error("invalid marker syntax: {0}")]
    InvalidMarkers(String),

    // --- Templates ---

    /// No template is registered under the requested identifier.
    #[error("template not found: {0}")]
    NotFound(TemplateId),

    /// Two files in one category directory share a file stem.
    #[error("duplicate template {0} (two files share the same stem)")]
    DuplicateTemplate(TemplateId),

    /// A marker in the template is neither a valid slot nor a doubled escape.
    #[error("{template}:{line}: {reason}")]
    TemplateSyntax {
        template: TemplateId,
        line: usize,
        reason: String,
    },

    /// The template declares a slot the render context has no value for.
    #[error("template {template} references `{name}` but no value was supplied")]
    UnresolvedPlaceholder { template: TemplateId, name: String },

    /// The render context carries a value the template never references.
    #[error("value `{name}` is not referenced by template {template}")]
    UnusedValue { template: TemplateId, name: String },

    // --- Build ---

    /// A required external tool (e.g. `cc`, `python3`) is not installed.
    #[error("required tool '{name}' not found (install: {install})")]
    MissingTool { name: String, install: String },

    /// No toolchain is configured for the template's category.
    #[error("no toolchain configured for category '{0}'")]
    UnknownToolchain(String),

    /// The toolchain configuration itself is unusable.
    #[error("invalid toolchain configuration: {0}")]
    InvalidToolchain(String),

    /// The external toolchain rejected the rendered source.
    #[error("build of {template} failed ({status}):\n{diagnostics}")]
    Build {
        template: TemplateId,
        status: String,
        diagnostics: String,
    },

    /// The external toolchain ran longer than the configured bound and was killed.
    #[error("build of {template} timed out after {secs}s")]
    Timeout { template: TemplateId, secs: u64 },

    // --- Packaging ---

    /// A bundle path is absolute, escapes the bundle, or collides with another path.
    #[error("invalid bundle layout: {0}")]
    Layout(String),

    /// A caller-supplied flag does not match the configured format.
    #[error("invalid secret: {0}")]
    InvalidSecret(String),

    /// The bundle destination already exists.
    #[error("bundle destination already exists: {0}")]
    BundleExists(PathBuf),

    /// A challenge manifest (`chal.json`) could not be read.
    #[error("failed to read manifest {path}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A challenge manifest could not be parsed or serialized.
    #[error("malformed manifest {path}")]
    ManifestFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // --- Challenge metadata ---

    /// A challenge with the same safe name already exists in the category.
    #[error("name {name} conflicts with challenge {existing} in category {category}")]
    NameConflict {
        name: String,
        existing: String,
        category: String,
    },

    /// The challenge name is empty once reduced to its safe form.
    #[error("invalid challenge name: {0:?}")]
    InvalidName(String),

    /// The category is not one of the known challenge types.
    #[error("unknown category: {0} (supported: rev, pwn, crypto, web, misc, blockchain, osint)")]
    UnknownCategory(String),

    /// The difficulty is not one of: `easy`, `medium`, `hard`, `impossible`.
    #[error("unknown difficulty: {0} (supported: easy, medium, hard, impossible)")]
    UnknownDifficulty(String),

    // --- General ---

    /// A filesystem I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A catch-all for errors from dependencies.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Alias for `Result<T, MkchalError>`.
pub type Result<T> = std::result::Result<T, MkchalError>;
