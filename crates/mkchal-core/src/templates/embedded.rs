//! Compile-time embedded templates.
//!
//! Each constant loads a template file from `templates/` via [`include_str!`]. The paths
//! are relative to this source file (`crates/mkchal-core/src/templates/embedded.rs`).
//!
//! ## Warning
//!
//! Do NOT rename or move template files without updating the `include_str!` path here.
//! Do NOT modify template files without checking that the placeholders still match
//! what the pipeline supplies (`name`, `author`, `port` for challenges).

// -------------------------------------------------------
// Challenge starter templates
// -------------------------------------------------------

pub const PWN_SAMPLE: &str = include_str!("../../../../templates/challenges/pwn/sample.c");
pub const WEB_SAMPLE: &str = include_str!("../../../../templates/challenges/web/sample.py");

/// Every built-in challenge template as `(category, name, extension, content)`.
pub const CHALLENGES: &[(&str, &str, &str, &str)] = &[
    ("pwn", "sample", "c", PWN_SAMPLE),
    ("web", "sample", "py", WEB_SAMPLE),
];

// -------------------------------------------------------
// Bundle templates
// -------------------------------------------------------

/// Bundle README. Placeholders: `name`, `author`, `description`, `category`, `difficulty`.
pub const BUNDLE_README: &str = include_str!("../../../../templates/bundle/README.md.tmpl");
