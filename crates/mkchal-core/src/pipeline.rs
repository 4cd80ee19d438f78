//! Challenge generation pipeline.
//!
//! One run walks a single request through four stages:
//!
//! ```text
//! load ──▶ render ──▶ build ──▶ package
//!   │         │         │          │
//!   └─────────┴─────────┴──────────┴──▶ failed (RunError carries the stage)
//! ```
//!
//! No stage is retried and a failed run is never resumed; callers start a new run.
//! Independent runs share only the read-only template registry and config, and each
//! writes to its own `<output>/<category>/<name>` directory, so [`Pipeline::generate_all`]
//! can execute them concurrently without locks.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::bundle::{Bundle, Packager};
use crate::challenge::{ensure_unique_name, Category, ChallengeInfo, Difficulty};
use crate::config::MkchalConfig;
use crate::error::MkchalError;
use crate::secret::Secret;
use crate::templates::registry::TemplateRegistry;
use crate::templates::renderer::{render, RenderContext};
use crate::templates::TemplateId;
use crate::toolchain::{CommandToolchain, Toolchain};

/// Template used when a request does not name one.
pub const DEFAULT_TEMPLATE: &str = "sample";

/// Pipeline stage, used to report where a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Render,
    Build,
    Package,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Render => "render",
            Self::Build => "build",
            Self::Package => "package",
        })
    }
}

/// A failed run: which stage, which template, and the underlying error.
#[derive(Debug, Error)]
#[error("{stage} stage failed for {template}")]
pub struct RunError {
    pub stage: Stage,
    pub template: TemplateId,
    #[source]
    pub source: MkchalError,
}

impl RunError {
    fn at(stage: Stage, template: &TemplateId) -> impl FnOnce(MkchalError) -> Self + '_ {
        move |source| {
            tracing::info!("{template}: {stage} -> failed");
            Self {
                stage,
                template: template.clone(),
                source,
            }
        }
    }
}

/// Everything needed for one run.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub template: TemplateId,
    pub context: RenderContext,
    pub info: ChallengeInfo,
    /// Caller-supplied flag; validated against the configured format in the package stage.
    pub flag: Option<String>,
}

/// Serializable description of a request, as read from a batch file or built from CLI
/// arguments.
///
/// Well-known values (`name`, `author`, `port`) are filled in only for slots the
/// template declares. Explicit `values` are always passed on, so a value the template
/// does not use still fails the render stage with `UnusedValue`.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestSpec {
    pub category: Category,
    #[serde(default)]
    pub template: Option<String>,
    pub name: String,
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl RequestSpec {
    pub fn template_id(&self) -> TemplateId {
        TemplateId::new(
            self.category.as_str(),
            self.template.as_deref().unwrap_or(DEFAULT_TEMPLATE),
        )
    }

    /// Resolve against `registry` into a runnable request.
    pub fn into_request(
        self,
        registry: &TemplateRegistry,
    ) -> Result<GenerationRequest, MkchalError> {
        let id = self.template_id();
        let template = registry.load(&id.category, &id.name)?;
        let info = ChallengeInfo::new(
            &self.name,
            self.author,
            self.description,
            self.category,
            self.difficulty,
        )?;

        let mut context = RenderContext::new();
        if template.declares("name") {
            context.insert("name", info.name.as_str());
        }
        if template.declares("author") {
            context.insert("author", info.author.as_str());
        }
        if let Some(port) = self.port.filter(|_| template.declares("port")) {
            context.insert("port", port.to_string());
        }
        for (key, value) in self.values {
            context.insert(key, value);
        }

        Ok(GenerationRequest {
            template: id,
            context,
            info,
            flag: self.flag,
        })
    }
}

/// Runs generation requests against a shared registry and config.
#[derive(Clone)]
pub struct Pipeline {
    registry: Arc<TemplateRegistry>,
    config: Arc<MkchalConfig>,
}

impl Pipeline {
    pub fn new(registry: Arc<TemplateRegistry>, config: Arc<MkchalConfig>) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn config(&self) -> &MkchalConfig {
        &self.config
    }

    /// Bundle directory for a request: `<output>/<category>/<name>`.
    pub fn destination(&self, request: &GenerationRequest) -> PathBuf {
        self.config
            .output_dir
            .join(request.info.category.as_str())
            .join(&request.info.name)
    }

    /// Run one request through every stage.
    pub async fn generate(&self, request: GenerationRequest) -> Result<Bundle, RunError> {
        let id = request.template.clone();
        let dest = self.destination(&request);

        // Load
        let template = self
            .registry
            .load(&id.category, &id.name)
            .and_then(|t| {
                ensure_unique_name(
                    &self.config.output_dir,
                    request.info.category,
                    &request.info.name,
                )?;
                Ok(t)
            })
            .map_err(RunError::at(Stage::Load, &id))?;
        tracing::info!("{id}: loaded");

        // Render
        let rendered =
            render(&template, &request.context).map_err(RunError::at(Stage::Render, &id))?;
        tracing::info!("{id}: loaded -> rendered");

        // Build
        let toolchain = self
            .config
            .toolchain_for(&id.category)
            .and_then(CommandToolchain::new)
            .map_err(RunError::at(Stage::Build, &id))?;
        if let Err(missing) = toolchain.check_prerequisites() {
            let tool = missing.into_iter().next();
            return Err(RunError::at(Stage::Build, &id)(MkchalError::MissingTool {
                name: tool.as_ref().map(|t| t.tool_name.clone()).unwrap_or_default(),
                install: tool.map(|t| t.install_instructions).unwrap_or_default(),
            }));
        }
        let artifact = toolchain
            .build(rendered)
            .await
            .map_err(RunError::at(Stage::Build, &id))?;
        tracing::info!("{id}: rendered -> built ({})", artifact.file_name());

        // Package
        let context_keys: Vec<String> = request.context.keys().map(str::to_string).collect();
        let bundle = request
            .flag
            .as_deref()
            .map(|flag| Secret::from_user(flag, &self.config.secret))
            .transpose()
            .and_then(|secret| {
                Packager::new(&self.config.layout, &self.config.secret).package(
                    artifact,
                    secret,
                    &request.info,
                    &context_keys,
                    &dest,
                )
            })
            .map_err(RunError::at(Stage::Package, &id))?;
        tracing::info!("{id}: built -> packaged at {}", bundle.root.display());

        Ok(bundle)
    }

    /// Run independent requests concurrently, at most `workers` at a time.
    ///
    /// Results come back in request order. Requests that would write to the same bundle
    /// directory as an earlier request fail with `Layout` before any stage runs.
    /// `on_done` is called as each run finishes.
    pub async fn generate_all<F>(
        &self,
        requests: Vec<GenerationRequest>,
        workers: usize,
        mut on_done: F,
    ) -> Vec<Result<Bundle, RunError>>
    where
        F: FnMut(&Result<Bundle, RunError>),
    {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut results: Vec<Option<Result<Bundle, RunError>>> =
            (0..requests.len()).map(|_| None).collect();
        let ids: Vec<TemplateId> = requests.iter().map(|r| r.template.clone()).collect();
        let mut claimed = HashSet::new();
        let mut set = JoinSet::new();

        for (index, request) in requests.into_iter().enumerate() {
            let dest = self.destination(&request);
            if !claimed.insert(dest.clone()) {
                let result = Err(RunError::at(Stage::Load, &request.template)(
                    MkchalError::Layout(format!(
                        "{} is the destination of an earlier request",
                        dest.display()
                    )),
                ));
                on_done(&result);
                results[index] = Some(result);
                continue;
            }

            let pipeline = self.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => pipeline.generate(request).await,
                    Err(e) => Err(RunError::at(Stage::Load, &request.template)(
                        MkchalError::Other(e.into()),
                    )),
                };
                (index, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    on_done(&result);
                    results[index] = Some(result);
                }
                Err(e) => tracing::warn!("generation task ended abnormally: {e}"),
            }
        }

        results
            .into_iter()
            .zip(ids)
            .map(|(result, id)| {
                result.unwrap_or_else(|| {
                    Err(RunError::at(Stage::Load, &id)(MkchalError::Other(
                        anyhow::anyhow!("generation task ended before reporting a result"),
                    )))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::syntax::MarkerSyntax;
    use crate::toolchain::{ToolchainConfig, SOURCE_TOKEN};

    /// A `misc` category built with `sh -n`, so tests need no compiler.
    fn fixture(templates: &[(&str, &str)]) -> (tempfile::TempDir, Pipeline) {
        let dir = tempfile::tempdir().unwrap();
        let templates_dir = dir.path().join("templates");
        std::fs::create_dir_all(templates_dir.join("misc")).unwrap();
        for (file, content) in templates {
            std::fs::write(templates_dir.join("misc").join(file), content).unwrap();
        }

        let mut config = MkchalConfig {
            templates_dir: Some(templates_dir.clone()),
            output_dir: dir.path().join("out"),
            ..MkchalConfig::default()
        };
        config.toolchains.insert(
            "misc".into(),
            ToolchainConfig {
                command: vec!["sh".into(), "-n".into(), SOURCE_TOKEN.into()],
                artifact: None,
                executable: true,
                timeout_secs: Some(10),
            },
        );

        let registry =
            TemplateRegistry::from_dir(&templates_dir, &MarkerSyntax::default()).unwrap();
        let pipeline = Pipeline::new(Arc::new(registry), Arc::new(config));
        (dir, pipeline)
    }

    fn spec(name: &str, template: &str) -> RequestSpec {
        RequestSpec {
            category: Category::Misc,
            template: Some(template.into()),
            name: name.into(),
            author: "neil".into(),
            description: "test challenge".into(),
            difficulty: Difficulty::Medium,
            flag: None,
            port: None,
            values: BTreeMap::new(),
        }
    }

    const GREET: &str = "#!/bin/sh\necho \"Hello I am challenge: {name}\"\ncat ./flag.txt\n";

    #[tokio::test]
    async fn test_generate_end_to_end() {
        let (_dir, pipeline) = fixture(&[("greet.sh", GREET)]);
        let request = spec("Warm Up", "greet").into_request(pipeline.registry()).unwrap();
        let dest = pipeline.destination(&request);

        let bundle = pipeline.generate(request).await.unwrap();
        assert_eq!(bundle.root, dest);
        assert!(dest.ends_with("misc/warmup"));

        let source = std::fs::read_to_string(dest.join("src/greet.sh")).unwrap();
        assert!(source.contains("Hello I am challenge: warmup"));
        assert!(!source.contains("{name}"));

        let flag = std::fs::read_to_string(bundle.secret_path()).unwrap();
        assert!(!flag.is_empty());
        assert_eq!(bundle.manifest.context_keys, ["name"]);
        assert_eq!(bundle.manifest.difficulty, Difficulty::Medium);
    }

    #[tokio::test]
    async fn test_build_error_halts_before_packaging() {
        let (_dir, pipeline) = fixture(&[("broken.sh", "main() {{\n  echo {name}\n")]);
        let request = spec("broken", "broken").into_request(pipeline.registry()).unwrap();
        let dest = pipeline.destination(&request);

        let err = pipeline.generate(request).await.unwrap_err();
        assert_eq!(err.stage, Stage::Build);
        assert_eq!(err.template, TemplateId::new("misc", "broken"));
        match err.source {
            MkchalError::Build { diagnostics, .. } => assert!(!diagnostics.is_empty()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_render_errors_report_stage() {
        let (_dir, pipeline) = fixture(&[("greet.sh", GREET)]);

        let mut extra = spec("extra", "greet");
        extra.values.insert("port".into(), "1337".into());
        let err = pipeline
            .generate(extra.into_request(pipeline.registry()).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Render);
        assert!(matches!(err.source, MkchalError::UnusedValue { .. }));

        let mut missing = spec("missing", "greet")
            .into_request(pipeline.registry())
            .unwrap();
        missing.context = RenderContext::new();
        let err = pipeline.generate(missing).await.unwrap_err();
        assert_eq!(err.stage, Stage::Render);
        assert!(matches!(err.source, MkchalError::UnresolvedPlaceholder { .. }));
    }

    #[tokio::test]
    async fn test_name_conflict_fails_at_load() {
        let (_dir, pipeline) = fixture(&[("greet.sh", GREET)]);
        let first = spec("warmup", "greet").into_request(pipeline.registry()).unwrap();
        pipeline.generate(first).await.unwrap();

        let second = spec("WarmUp", "greet").into_request(pipeline.registry()).unwrap();
        let err = pipeline.generate(second).await.unwrap_err();
        assert_eq!(err.stage, Stage::Load);
        assert!(matches!(err.source, MkchalError::NameConflict { .. }));
    }

    #[tokio::test]
    async fn test_invalid_flag_fails_at_package() {
        let (_dir, pipeline) = fixture(&[("greet.sh", GREET)]);
        let mut request = spec("flagged", "greet");
        request.flag = Some("flag{wrong prefix}".into());
        let request = request.into_request(pipeline.registry()).unwrap();
        let dest = pipeline.destination(&request);

        let err = pipeline.generate(request).await.unwrap_err();
        assert_eq!(err.stage, Stage::Package);
        assert!(matches!(err.source, MkchalError::InvalidSecret(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_unknown_toolchain_fails_at_build() {
        let (_dir, pipeline) = fixture(&[]);
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("osint")).unwrap();
        std::fs::write(dir.path().join("osint/sample.txt"), "{name}").unwrap();
        let registry = TemplateRegistry::from_dir(dir.path(), &MarkerSyntax::default()).unwrap();
        let pipeline = Pipeline::new(Arc::new(registry), Arc::new(pipeline.config().clone()));

        let mut request = spec("osint", "sample");
        request.category = Category::Osint;
        let err = pipeline
            .generate(request.into_request(pipeline.registry()).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.stage, Stage::Build);
        assert!(matches!(err.source, MkchalError::UnknownToolchain(_)));
    }

    #[tokio::test]
    async fn test_generated_flags_differ_between_runs() {
        let (_dir, pipeline) = fixture(&[("greet.sh", GREET)]);
        let a = pipeline
            .generate(spec("one", "greet").into_request(pipeline.registry()).unwrap())
            .await
            .unwrap();
        let b = pipeline
            .generate(spec("two", "greet").into_request(pipeline.registry()).unwrap())
            .await
            .unwrap();

        let flag_a = std::fs::read_to_string(a.secret_path()).unwrap();
        let flag_b = std::fs::read_to_string(b.secret_path()).unwrap();
        assert!(!flag_a.is_empty() && !flag_b.is_empty());
        assert_ne!(flag_a, flag_b);
    }

    #[tokio::test]
    async fn test_generate_all_runs_concurrently_without_interference() {
        let (_dir, pipeline) = fixture(&[
            ("greet.sh", GREET),
            ("broken.sh", "main() {{\n  echo {name}\n"),
        ]);
        let requests: Vec<GenerationRequest> = [
            spec("alpha", "greet"),
            spec("beta", "greet"),
            spec("gamma", "broken"),
            spec("Alpha", "greet"),
        ]
        .into_iter()
        .map(|s| s.into_request(pipeline.registry()).unwrap())
        .collect();

        let mut finished = 0;
        let results = pipeline
            .generate_all(requests, 2, |_| finished += 1)
            .await;
        assert_eq!(finished, 4);
        assert_eq!(results.len(), 4);

        let alpha = results[0].as_ref().unwrap();
        let beta = results[1].as_ref().unwrap();
        assert_ne!(alpha.root, beta.root);
        let source_a = std::fs::read_to_string(alpha.root.join("src/greet.sh")).unwrap();
        let source_b = std::fs::read_to_string(beta.root.join("src/greet.sh")).unwrap();
        assert!(source_a.contains("challenge: alpha"));
        assert!(source_b.contains("challenge: beta"));
        assert_ne!(
            std::fs::read_to_string(alpha.secret_path()).unwrap(),
            std::fs::read_to_string(beta.secret_path()).unwrap()
        );

        let gamma = results[2].as_ref().unwrap_err();
        assert_eq!(gamma.stage, Stage::Build);

        let duplicate = results[3].as_ref().unwrap_err();
        assert!(matches!(duplicate.source, MkchalError::Layout(_)));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancelled_run_leaves_others_untouched() {
        use crate::toolchain::testing;

        let (dir, pipeline) = fixture(&[("greet.sh", GREET)]);
        let templates_dir = dir.path().join("templates");
        std::fs::create_dir_all(templates_dir.join("crypto")).unwrap();
        std::fs::write(templates_dir.join("crypto/slow.txt"), "{name}\n").unwrap();

        let pid_file = dir.path().join("sleep.pid");
        let mut config = pipeline.config().clone();
        config.toolchains.insert(
            "crypto".into(),
            ToolchainConfig {
                command: testing::sleeper_command(&pid_file, 317),
                artifact: None,
                executable: false,
                timeout_secs: Some(60),
            },
        );
        let registry =
            TemplateRegistry::from_dir(&templates_dir, &MarkerSyntax::default()).unwrap();
        let pipeline = Pipeline::new(Arc::new(registry), Arc::new(config));

        let mut slow = spec("slow", "slow");
        slow.category = Category::Crypto;
        let slow = slow.into_request(pipeline.registry()).unwrap();
        let slow_dest = pipeline.destination(&slow);
        let slow_run = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.generate(slow).await }
        });
        let pid = testing::read_pid(&pid_file).await;

        let fast = spec("fast", "greet").into_request(pipeline.registry()).unwrap();
        let fast_run = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.generate(fast).await }
        });

        slow_run.abort();
        assert!(slow_run.await.unwrap_err().is_cancelled());

        let bundle = fast_run.await.unwrap().unwrap();
        let source = std::fs::read_to_string(bundle.root.join("src/greet.sh")).unwrap();
        assert!(source.contains("challenge: fast"));
        assert!(bundle.secret_path().is_file());

        assert!(!slow_dest.exists());
        let crypto_dir = pipeline.config().output_dir.join("crypto");
        if crypto_dir.exists() {
            assert_eq!(std::fs::read_dir(&crypto_dir).unwrap().count(), 0);
        }
        assert!(
            testing::wait_for_exit(pid).await,
            "build subprocess {pid} outlived the cancelled run"
        );
    }

    #[test]
    fn test_request_spec_fills_only_declared_slots() {
        let registry = TemplateRegistry::builtin();

        let mut web = spec("Web Warmup", "sample");
        web.category = Category::Web;
        web.port = Some(1337);
        let request = web.into_request(&registry).unwrap();
        assert_eq!(request.context.get("name"), Some("webwarmup"));
        assert_eq!(request.context.get("port"), Some("1337"));
        assert!(!request.context.contains("author"));

        let mut pwn = spec("heap", "sample");
        pwn.category = Category::Pwn;
        pwn.port = Some(1337);
        let request = pwn.into_request(&registry).unwrap();
        assert_eq!(request.context.keys().collect::<Vec<_>>(), ["name"]);
    }

    #[test]
    fn test_request_spec_from_json() {
        let json = r#"{ "category": "pwn", "name": "warmup", "author": "neil" }"#;
        let spec: RequestSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.template_id(), TemplateId::new("pwn", DEFAULT_TEMPLATE));
        assert_eq!(spec.difficulty, Difficulty::Easy);
        assert!(spec.values.is_empty());
    }
}
