//! Packaging stage: assemble a built challenge into its distributable directory.
//!
//! ## Bundle layout (defaults)
//!
//! ```text
//! <output>/<category>/<name>/
//! ├── chall          # the artifact, next to the flag it opens as ./flag.txt
//! ├── flag.txt       # the secret
//! ├── chal.json      # Manifest (never contains the flag)
//! ├── README.md
//! ├── dist/chall     # copy handed to competitors
//! ├── src/sample.c   # rendered source
//! └── solve/         # writeups, created empty
//! ```
//!
//! The bundle is staged in a hidden sibling directory and renamed into place only after
//! every file is written. A failure at any point drops the staging directory, so a
//! destination either holds a complete bundle or does not exist.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::challenge::{Category, ChallengeInfo, Difficulty};
use crate::error::{MkchalError, Result};
use crate::secret::{Secret, SecretConfig};
use crate::templates::renderer::{render, RenderContext};
use crate::templates::syntax::MarkerSyntax;
use crate::templates::{embedded, Template, TemplateId};
use crate::toolchain::CompiledArtifact;

/// Default manifest file name, also what [`crate::challenge::verify`] looks for.
pub const MANIFEST_FILE: &str = "chal.json";

/// Where each part of a bundle goes, relative to the bundle root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSpec {
    /// Directory holding the runnable artifact. `.` is the bundle root.
    pub artifact_dir: PathBuf,
    pub secret: PathBuf,
    pub manifest: PathBuf,
    /// Directory that receives a copy of the artifact for competitors.
    pub dist_dir: Option<PathBuf>,
    /// Directory that receives the rendered source.
    pub source_dir: Option<PathBuf>,
    pub readme: Option<PathBuf>,
    /// Empty directory for writeups and solve scripts.
    pub solve_dir: Option<PathBuf>,
}

impl Default for LayoutSpec {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("."),
            secret: PathBuf::from("flag.txt"),
            manifest: PathBuf::from(MANIFEST_FILE),
            dist_dir: Some(PathBuf::from("dist")),
            source_dir: Some(PathBuf::from("src")),
            readme: Some(PathBuf::from("README.md")),
            solve_dir: Some(PathBuf::from("solve")),
        }
    }
}

/// A layout with concrete file names filled in and every path checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLayout {
    pub artifact: PathBuf,
    pub secret: PathBuf,
    pub manifest: PathBuf,
    pub dist: Option<PathBuf>,
    pub source: Option<PathBuf>,
    pub readme: Option<PathBuf>,
    pub solve_dir: Option<PathBuf>,
}

impl LayoutSpec {
    /// Resolve the layout for an artifact and source file name.
    ///
    /// Fails with `Layout` if a path is empty, absolute, leaves the bundle through `..`,
    /// or collides with another path (equal, or one inside the other).
    pub fn resolve(&self, artifact_name: &str, source_name: &str) -> Result<ResolvedLayout> {
        let artifact_dir = normalize("artifact_dir", &self.artifact_dir, true)?;
        let resolved = ResolvedLayout {
            artifact: normalize("artifact", &artifact_dir.join(artifact_name), false)?,
            secret: normalize("secret", &self.secret, false)?,
            manifest: normalize("manifest", &self.manifest, false)?,
            dist: self
                .dist_dir
                .as_ref()
                .map(|d| normalize("dist_dir", &d.join(artifact_name), false))
                .transpose()?,
            source: self
                .source_dir
                .as_ref()
                .map(|d| normalize("source_dir", &d.join(source_name), false))
                .transpose()?,
            readme: self
                .readme
                .as_ref()
                .map(|p| normalize("readme", p, false))
                .transpose()?,
            solve_dir: self
                .solve_dir
                .as_ref()
                .map(|p| normalize("solve_dir", p, false))
                .transpose()?,
        };

        let entries = resolved.entries();
        for (i, (label_a, a)) in entries.iter().enumerate() {
            for (label_b, b) in &entries[i + 1..] {
                if a.starts_with(b) || b.starts_with(a) {
                    return Err(MkchalError::Layout(format!(
                        "{label_a} ({}) collides with {label_b} ({})",
                        a.display(),
                        b.display()
                    )));
                }
            }
        }

        Ok(resolved)
    }

    /// Check the layout up front, before any artifact name is known.
    pub fn validate(&self) -> Result<()> {
        self.resolve("chall", "chall.src").map(|_| ())
    }
}

impl ResolvedLayout {
    fn entries(&self) -> Vec<(&'static str, &Path)> {
        let mut entries: Vec<(&'static str, &Path)> = vec![
            ("artifact", self.artifact.as_path()),
            ("secret", self.secret.as_path()),
            ("manifest", self.manifest.as_path()),
        ];
        let optional = [
            ("dist", &self.dist),
            ("source", &self.source),
            ("readme", &self.readme),
            ("solve_dir", &self.solve_dir),
        ];
        for (label, path) in optional {
            if let Some(path) = path {
                entries.push((label, path.as_path()));
            }
        }
        entries
    }
}

/// Strip `.` components and reject anything that is not a plain relative path.
fn normalize(label: &str, path: &Path, allow_empty: bool) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(MkchalError::Layout(format!(
                    "{label} ({}) must not contain `..`",
                    path.display()
                )))
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(MkchalError::Layout(format!(
                    "{label} ({}) must be relative",
                    path.display()
                )))
            }
        }
    }
    if out.as_os_str().is_empty() && !allow_empty {
        return Err(MkchalError::Layout(format!("{label} must not be empty")));
    }
    Ok(out)
}

/// Audit record written to `chal.json`. Carries the render-context keys but no values
/// and never the flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub author: String,
    pub description: String,
    pub category: Category,
    pub difficulty: Difficulty,
    pub template: TemplateId,
    pub context_keys: Vec<String>,
    pub artifact: PathBuf,
    pub artifact_sha256: String,
    pub secret_file: PathBuf,
    pub generator: String,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| MkchalError::ManifestRead {
                path: path.to_path_buf(),
                source: e,
            })?;
        serde_json::from_str(&contents).map_err(|e| MkchalError::ManifestFormat {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn to_json(&self, path: &Path) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| MkchalError::ManifestFormat {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// A packaged challenge.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Bundle root directory.
    pub root: PathBuf,
    /// Every file written, relative to `root`, in write order.
    pub files: Vec<PathBuf>,
    pub manifest: Manifest,
}

impl Bundle {
    /// Absolute path of the secret file.
    pub fn secret_path(&self) -> PathBuf {
        self.root.join(&self.manifest.secret_file)
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.root.join(&self.manifest.artifact)
    }
}

/// Writes bundles according to a layout.
pub struct Packager<'a> {
    layout: &'a LayoutSpec,
    secret_config: &'a SecretConfig,
}

impl<'a> Packager<'a> {
    pub fn new(layout: &'a LayoutSpec, secret_config: &'a SecretConfig) -> Self {
        Self {
            layout,
            secret_config,
        }
    }

    /// Package `artifact` into `dest`, generating a flag when `secret` is `None`.
    ///
    /// `context_keys` are recorded in the manifest for auditability.
    pub fn package(
        &self,
        artifact: CompiledArtifact,
        secret: Option<Secret>,
        info: &ChallengeInfo,
        context_keys: &[String],
        dest: &Path,
    ) -> Result<Bundle> {
        let layout = self
            .layout
            .resolve(artifact.file_name(), artifact.source().file_name())?;

        if dest.exists() {
            return Err(MkchalError::BundleExists(dest.to_path_buf()));
        }

        let secret = match secret {
            Some(secret) => secret,
            None => Secret::generate(self.secret_config)?,
        };

        let parent = dest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(parent)?;
        let staging = tempfile::Builder::new()
            .prefix(".mkchal-staging-")
            .tempdir_in(parent)?;

        let mut files = Vec::new();
        let mut write = |relative: &Path, contents: &[u8]| -> Result<()> {
            let path = staging.path().join(relative);
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&path, contents)?;
            files.push(relative.to_path_buf());
            Ok(())
        };

        let artifact_bytes = std::fs::read(artifact.path())?;
        write(&layout.artifact, &artifact_bytes)?;
        if let Some(dist) = &layout.dist {
            write(dist, &artifact_bytes)?;
        }
        write(&layout.secret, secret.expose().as_bytes())?;
        if let Some(source) = &layout.source {
            write(source, artifact.source().content())?;
        }
        if let Some(readme) = &layout.readme {
            write(readme, &render_readme(info)?)?;
        }

        let mut context_keys = context_keys.to_vec();
        context_keys.sort();
        let manifest = Manifest {
            name: info.name.clone(),
            author: info.author.clone(),
            description: info.description.clone(),
            category: info.category,
            difficulty: info.difficulty,
            template: artifact.template().clone(),
            context_keys,
            artifact: layout.artifact.clone(),
            artifact_sha256: hex::encode(Sha256::digest(&artifact_bytes)),
            secret_file: layout.secret.clone(),
            generator: format!("mkchal {}", env!("CARGO_PKG_VERSION")),
        };
        write(&layout.manifest, manifest.to_json(&layout.manifest)?.as_bytes())?;

        if artifact.executable() {
            let mut executables = vec![layout.artifact.clone()];
            executables.extend(layout.dist.clone());
            for relative in executables {
                mark_executable(&staging.path().join(relative))?;
            }
        }

        if let Some(solve) = &layout.solve_dir {
            std::fs::create_dir_all(staging.path().join(solve))?;
        }

        publish(staging.path(), dest)?;
        // The staging path is gone; dropping the handle is a no-op.
        drop(staging);

        tracing::info!("packaged {} into {}", artifact.template(), dest.display());

        Ok(Bundle {
            root: dest.to_path_buf(),
            files,
            manifest,
        })
    }
}

/// Move a finished staging directory to `dest`.
///
/// `dest` is first created exclusively, so a destination that appeared after the
/// early existence check (another process, another run) fails with `BundleExists`
/// instead of being replaced by the rename.
fn publish(staging: &Path, dest: &Path) -> Result<()> {
    match std::fs::create_dir(dest) {
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(MkchalError::BundleExists(dest.to_path_buf()));
        }
        other => other?,
    }

    // Replaces only the empty directory claimed above.
    if let Err(e) = std::fs::rename(staging, dest) {
        if let Err(cleanup) = std::fs::remove_dir(dest) {
            tracing::warn!("failed to remove {}: {cleanup}", dest.display());
        }
        return Err(match e.kind() {
            std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::DirectoryNotEmpty => {
                MkchalError::BundleExists(dest.to_path_buf())
            }
            _ => e.into(),
        });
    }
    Ok(())
}

fn render_readme(info: &ChallengeInfo) -> Result<Vec<u8>> {
    let template = Template::parse(
        TemplateId::new("bundle", "README"),
        Some("md".into()),
        embedded::BUNDLE_README.as_bytes().to_vec(),
        &MarkerSyntax::default(),
    )?;
    let context = RenderContext::new()
        .with("name", info.name.as_str())
        .with("author", info.author.as_str())
        .with("description", info.description.as_str())
        .with("category", info.category.as_str())
        .with("difficulty", info.difficulty.as_str());
    Ok(render(&template, &context)?.content().to_vec())
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}
