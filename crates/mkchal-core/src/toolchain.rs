//! Build stage: turn a rendered source into a runnable artifact.
//!
//! The actual compiler is an external program described by a [`ToolchainConfig`].
//! Every build runs in its own scratch directory, which lives exactly as long as the
//! resulting [`CompiledArtifact`]. The toolchain runs in its own process group, and the
//! whole group is killed when the build finishes, times out or is dropped, so compiler
//! subprocesses (`cc1`, `as`, `ld`, shell children) never outlive a run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::error::{MkchalError, Result};
use crate::templates::renderer::RenderedSource;
use crate::templates::TemplateId;

/// Default bound on a single toolchain invocation.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Replaced by the rendered source's file name in command arguments.
pub const SOURCE_TOKEN: &str = "{source}";
/// Replaced by the artifact's file name in command arguments.
pub const ARTIFACT_TOKEN: &str = "{artifact}";

/// How to build one category of templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Program followed by its arguments. `{source}` and `{artifact}` are substituted;
    /// the command runs inside the scratch directory.
    pub command: Vec<String>,
    /// File the command produces. `None` means the rendered source is itself the
    /// artifact and the command only validates it.
    #[serde(default)]
    pub artifact: Option<String>,
    /// Mark the artifact executable (0755).
    #[serde(default)]
    pub executable: bool,
    /// Overrides the global build timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ToolchainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    fn validate(&self) -> Result<()> {
        if self.program().is_none_or(str::is_empty) {
            return Err(MkchalError::InvalidToolchain("command is empty".into()));
        }
        if let Some(artifact) = &self.artifact {
            if !is_plain_file_name(artifact) {
                return Err(MkchalError::InvalidToolchain(format!(
                    "artifact must be a plain file name, got {artifact:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Toolchains used when the config does not override a category.
///
/// - `pwn`: `cc -o chall sample.c`, producing an executable `chall`
/// - `web`: `python3 -m py_compile sample.py`, shipping the source itself
pub fn default_toolchains() -> BTreeMap<String, ToolchainConfig> {
    let mut toolchains = BTreeMap::new();
    toolchains.insert(
        "pwn".to_string(),
        ToolchainConfig {
            command: ["cc", "-o", ARTIFACT_TOKEN, SOURCE_TOKEN]
                .map(String::from)
                .to_vec(),
            artifact: Some("chall".into()),
            executable: true,
            timeout_secs: None,
        },
    );
    toolchains.insert(
        "web".to_string(),
        ToolchainConfig {
            command: ["python3", "-m", "py_compile", SOURCE_TOKEN]
                .map(String::from)
                .to_vec(),
            artifact: None,
            executable: false,
            timeout_secs: None,
        },
    );
    toolchains
}

/// Information about a missing prerequisite tool.
#[derive(Debug, Clone)]
pub struct PrerequisiteError {
    pub tool_name: String,
    pub install_instructions: String,
}

/// The product of a successful build.
///
/// Owns the scratch directory the build ran in; dropping the artifact removes it.
#[derive(Debug)]
pub struct CompiledArtifact {
    template: TemplateId,
    file_name: String,
    path: PathBuf,
    executable: bool,
    diagnostics: String,
    source: RenderedSource,
    _workdir: TempDir,
}

impl CompiledArtifact {
    pub fn template(&self) -> &TemplateId {
        &self.template
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Location of the artifact inside the scratch directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn executable(&self) -> bool {
        self.executable
    }

    /// Compiler output of the successful build (warnings, usually empty).
    pub fn diagnostics(&self) -> &str {
        &self.diagnostics
    }

    pub fn source(&self) -> &RenderedSource {
        &self.source
    }
}

/// Every build toolchain implements this trait.
#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Human-readable name for output.
    fn name(&self) -> &str;

    /// Check that the external programs are installed.
    fn check_prerequisites(&self) -> std::result::Result<(), Vec<PrerequisiteError>>;

    /// Materialize `source` into an artifact. Build failures are never retried.
    async fn build(&self, source: RenderedSource) -> Result<CompiledArtifact>;
}

/// Toolchain that runs an external command.
pub struct CommandToolchain {
    config: ToolchainConfig,
}

impl CommandToolchain {
    pub fn new(config: ToolchainConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    fn missing_tool(&self, program: &str) -> MkchalError {
        MkchalError::MissingTool {
            name: program.to_string(),
            install: format!(
                "install `{program}` or set `toolchains.<category>.command` in the config"
            ),
        }
    }
}

#[async_trait]
impl Toolchain for CommandToolchain {
    fn name(&self) -> &str {
        self.config.program().unwrap_or_default()
    }

    fn check_prerequisites(&self) -> std::result::Result<(), Vec<PrerequisiteError>> {
        let program = self.name();
        if which::which(program).is_ok() {
            return Ok(());
        }
        Err(vec![PrerequisiteError {
            tool_name: program.to_string(),
            install_instructions: format!("install `{program}` and make sure it is on PATH"),
        }])
    }

    async fn build(&self, source: RenderedSource) -> Result<CompiledArtifact> {
        let template = source.template().clone();
        let workdir = tempfile::Builder::new().prefix("mkchal-build-").tempdir()?;

        let source_path = workdir.path().join(source.file_name());
        tokio::fs::write(&source_path, source.content()).await?;

        let artifact_name = self
            .config
            .artifact
            .clone()
            .unwrap_or_else(|| source.file_name().to_string());
        let artifact_path = workdir.path().join(&artifact_name);

        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| MkchalError::InvalidToolchain("command is empty".into()))?;
        let args: Vec<String> = args
            .iter()
            .map(|arg| {
                arg.replace(SOURCE_TOKEN, source.file_name())
                    .replace(ARTIFACT_TOKEN, &artifact_name)
            })
            .collect();

        tracing::debug!("building {template}: {program} {}", args.join(" "));

        let mut command = Command::new(program);
        command
            .args(&args)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(self.missing_tool(program))
            }
            Err(e) => return Err(e.into()),
        };
        // Declared after `child`, so it is dropped first on every exit path.
        let mut group = ProcessGroup::new(child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let timeout = self.config.timeout();

        let finished = tokio::time::timeout(timeout, async {
            let (status, out, err) =
                tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
            Ok::<_, std::io::Error>((status?, out?, err?))
        })
        .await;

        let (status, out, err) = match finished {
            Ok(result) => result?,
            Err(_) => {
                group.kill();
                // kill() also reaps the group leader.
                if let Err(e) = child.kill().await {
                    tracing::warn!("failed to kill toolchain for {template}: {e}");
                }
                return Err(MkchalError::Timeout {
                    template,
                    secs: timeout.as_secs(),
                });
            }
        };

        let diagnostics = combine_output(&out, &err);

        if !status.success() {
            return Err(MkchalError::Build {
                template,
                status: status.to_string(),
                diagnostics,
            });
        }

        if !artifact_path.is_file() {
            return Err(MkchalError::Build {
                template,
                status: status.to_string(),
                diagnostics: format!(
                    "toolchain exited successfully but did not produce `{artifact_name}`\n\
                     {diagnostics}"
                ),
            });
        }

        if self.config.executable {
            set_executable(&artifact_path)?;
        }

        tracing::debug!(
            "built {template} -> {artifact_name} ({} bytes of diagnostics)",
            diagnostics.len()
        );

        Ok(CompiledArtifact {
            template,
            file_name: artifact_name,
            path: artifact_path,
            executable: self.config.executable,
            diagnostics,
            source,
            _workdir: workdir,
        })
    }
}

/// Process group of a running toolchain, killed with SIGKILL on drop.
///
/// The group id equals the leader's pid because the child is spawned with
/// `process_group(0)`.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        // Every member already exited.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!("failed to kill toolchain process group {pgid}: {e}"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Stdout followed by stderr, verbatim.
fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    match (stdout.is_empty(), stderr.is_empty()) {
        (true, _) => stderr.into_owned(),
        (false, true) => stdout.into_owned(),
        (false, false) => format!("{stdout}\n{stderr}"),
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

pub(crate) fn is_plain_file_name(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty()
        && path.file_name().and_then(|n| n.to_str()) == Some(name)
        && name != "."
        && name != ".."
}


/// Helpers for tests that need to observe toolchain subprocesses.
#[cfg(all(test, target_os = "linux"))]
pub(crate) mod testing {
    use std::path::Path;
    use std::time::Duration;

    /// A command that backgrounds `sleep secs`, records the sleeper's pid in `pid_file`
    /// and waits for it. The sleeper is a grandchild of the build.
    pub(crate) fn sleeper_command(pid_file: &Path, secs: u32) -> Vec<String> {
        vec![
            "sh".into(),
            "-c".into(),
            format!("sleep {secs} & echo $! > '{}'; wait", pid_file.display()),
        ]
    }

    /// Wait until `pid_file` holds a pid.
    pub(crate) async fn read_pid(pid_file: &Path) -> i32 {
        for _ in 0..100 {
            if let Ok(contents) = std::fs::read_to_string(pid_file) {
                if let Ok(pid) = contents.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("no pid written to {}", pid_file.display());
    }

    /// Zombies count as exited: they are gone once their new parent reaps them.
    fn is_running(pid: i32) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .ok()
            .and_then(|stat| {
                let (_, rest) = stat.rsplit_once(')')?;
                rest.trim_start().chars().next()
            })
            .is_some_and(|state| state != 'Z' && state != 'X')
    }

    /// Poll for up to five seconds; `true` once `pid` is no longer running.
    pub(crate) async fn wait_for_exit(pid: i32) -> bool {
        for _ in 0..100 {
            if !is_running(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}
