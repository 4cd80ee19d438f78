//! Core library for the mkchal challenge generator.
//!
//! A generation run takes a challenge template from the [`templates::registry`], renders
//! it with caller-supplied values ([`templates::renderer`]), builds the result with a
//! per-category [`toolchain`], and packages the artifact, a fresh flag and a manifest into
//! a challenge directory ([`bundle`]). [`pipeline`] sequences the stages and runs
//! independent requests concurrently.

pub mod bundle;
pub mod challenge;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod secret;
pub mod templates;
pub mod toolchain;
