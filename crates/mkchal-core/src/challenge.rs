//! Challenge metadata and checks over a tree of generated challenges.
//!
//! Generated challenges live at `<output>/<category>/<safe name>/`, each with a
//! `chal.json` manifest (see [`crate::bundle::Manifest`]).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MkchalError, Result};

/// Fields every `chal.json` must carry as strings.
const REQUIRED_MANIFEST_FIELDS: &[&str] = &["name", "author", "description"];

/// Challenge category; also the name of the category directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Rev,
    Pwn,
    Crypto,
    Web,
    Misc,
    Blockchain,
    Osint,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Self::Rev,
        Self::Pwn,
        Self::Crypto,
        Self::Web,
        Self::Misc,
        Self::Blockchain,
        Self::Osint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rev => "rev",
            Self::Pwn => "pwn",
            Self::Crypto => "crypto",
            Self::Web => "web",
            Self::Misc => "misc",
            Self::Blockchain => "blockchain",
            Self::Osint => "osint",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = MkchalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| MkchalError::UnknownCategory(s.to_string()))
    }
}

/// Challenge difficulty. Recorded in the manifest only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Easy,
    Medium,
    Hard,
    Impossible,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
            Self::Impossible => "impossible",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = MkchalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            "impossible" => Ok(Self::Impossible),
            _ => Err(MkchalError::UnknownDifficulty(s.to_string())),
        }
    }
}

/// Descriptive metadata for one challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeInfo {
    /// Already reduced with [`safe_name`].
    pub name: String,
    pub author: String,
    pub description: String,
    pub category: Category,
    pub difficulty: Difficulty,
}

impl ChallengeInfo {
    /// Build the info, reducing `name` to its safe form.
    pub fn new(
        name: &str,
        author: impl Into<String>,
        description: impl Into<String>,
        category: Category,
        difficulty: Difficulty,
    ) -> Result<Self> {
        let safe = safe_name(name);
        if safe.is_empty() {
            return Err(MkchalError::InvalidName(name.to_string()));
        }
        Ok(Self {
            name: safe,
            author: author.into(),
            description: description.into(),
            category,
            difficulty,
        })
    }
}

/// Reduce a name to lowercase `[a-z0-9-]` without leading or trailing dashes.
///
/// The result is used as the challenge directory and service name.
pub fn safe_name(name: &str) -> String {
    let kept: String = name
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .collect();
    kept.trim_matches('-').to_string()
}

/// Fail with `NameConflict` if `<output>/<category>/` already holds a challenge whose
/// safe name equals `name`'s.
pub fn ensure_unique_name(output_root: &Path, category: Category, name: &str) -> Result<()> {
    let category_dir = output_root.join(category.as_str());
    if !category_dir.is_dir() {
        return Ok(());
    }

    let wanted = safe_name(name);
    for entry in std::fs::read_dir(&category_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let existing = entry.file_name().to_string_lossy().into_owned();
        if safe_name(&existing) == wanted {
            return Err(MkchalError::NameConflict {
                name: name.to_string(),
                existing,
                category: category.to_string(),
            });
        }
    }
    Ok(())
}

/// A problem found by [`verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub challenge: PathBuf,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.challenge.display(), self.reason)
    }
}

/// Check that every challenge under the known category directories of `output_root`
/// has a readable `chal.json` with the required fields.
///
/// Returns the violations in directory order; an empty list means the tree is valid.
pub fn verify(output_root: &Path) -> Result<Vec<Violation>> {
    let mut violations = Vec::new();

    for category in Category::ALL {
        let category_dir = output_root.join(category.as_str());
        if !category_dir.is_dir() {
            continue;
        }

        let mut challenges: Vec<PathBuf> = std::fs::read_dir(&category_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        challenges.sort();

        for challenge in challenges {
            let relative = challenge
                .strip_prefix(output_root)
                .unwrap_or(&challenge)
                .to_path_buf();

            let manifest_path = challenge.join(crate::bundle::MANIFEST_FILE);
            let contents = match std::fs::read_to_string(&manifest_path) {
                Ok(c) => c,
                Err(_) => {
                    violations.push(Violation {
                        challenge: relative,
                        reason: format!("could not find {}", crate::bundle::MANIFEST_FILE),
                    });
                    continue;
                }
            };

            let parsed: serde_json::Value = match serde_json::from_str(&contents) {
                Ok(v) => v,
                Err(e) => {
                    violations.push(Violation {
                        challenge: relative,
                        reason: format!("malformed {}: {e}", crate::bundle::MANIFEST_FILE),
                    });
                    continue;
                }
            };

            for field in REQUIRED_MANIFEST_FIELDS {
                if !parsed[field].is_string() {
                    violations.push(Violation {
                        challenge: relative.clone(),
                        reason: format!(
                            "malformed {}: missing `{field}`",
                            crate::bundle::MANIFEST_FILE
                        ),
                    });
                }
            }
        }
    }

    Ok(violations)
}
