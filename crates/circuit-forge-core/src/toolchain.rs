//! Prerequisite and version checks for the compiler and key generator.
//!
//! Version detection is best effort: a tool that does not answer `--version`
//! with something containing `X.Y.Z` is simply not reported.

use std::fmt;

use tokio::process::Command;

use crate::config::ForgeConfig;

/// Oldest compiler release known to emit the bundle layout the pipeline expects.
pub const MIN_COMPILER: ToolVersion = ToolVersion::new(2, 1, 0);
/// Oldest key generator with `zkey new` / `zkey export verificationkey`.
pub const MIN_KEYGEN: ToolVersion = ToolVersion::new(0, 7, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ToolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ToolVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// First `X.Y.Z` in `text`, e.g. `circom compiler 2.1.8` or `snarkjs@0.7.4`.
    pub fn find(text: &str) -> Option<Self> {
        text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .find_map(Self::from_dotted)
    }

    fn from_dotted(token: &str) -> Option<Self> {
        let mut parts = token.split('.').filter(|p| !p.is_empty());
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = parts.next()?.parse().ok()?;
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A configured tool that does not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingTool {
    pub tool: String,
    pub install: &'static str,
}

/// A tool older than the recommended minimum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionWarning {
    pub tool: String,
    pub found: ToolVersion,
    pub minimum: ToolVersion,
}

fn tools(config: &ForgeConfig) -> [(&str, &'static str, ToolVersion); 2] {
    [
        (
            config.compiler.as_str(),
            "https://docs.circom.io/getting-started/installation/",
            MIN_COMPILER,
        ),
        (config.keygen.as_str(), "npm install snarkjs", MIN_KEYGEN),
    ]
}

/// Confirm the compiler and key generator resolve on `PATH` (or as given paths).
pub fn check_prerequisites(config: &ForgeConfig) -> Result<(), Vec<MissingTool>> {
    let missing: Vec<_> = tools(config)
        .into_iter()
        .filter(|(tool, _, _)| which::which(tool).is_err())
        .map(|(tool, install, _)| MissingTool {
            tool: tool.to_string(),
            install,
        })
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing)
    }
}

/// Run `tool --version` and parse the result from stdout, then stderr.
///
/// Exit status is ignored: some releases print their version and exit non-zero.
pub async fn detect_version(tool: &str) -> Option<ToolVersion> {
    let output = Command::new(tool).arg("--version").output().await.ok()?;
    ToolVersion::find(&String::from_utf8_lossy(&output.stdout))
        .or_else(|| ToolVersion::find(&String::from_utf8_lossy(&output.stderr)))
}

/// Warn about tools below their minimum version. Undetectable versions are skipped.
pub async fn check_versions(config: &ForgeConfig) -> Vec<VersionWarning> {
    let mut warnings = Vec::new();
    for (tool, _, minimum) in tools(config) {
        match detect_version(tool).await {
            Some(found) if found < minimum => warnings.push(VersionWarning {
                tool: tool.to_string(),
                found,
                minimum,
            }),
            Some(found) => tracing::debug!("{tool} {found}"),
            None => tracing::debug!("could not detect {tool} version"),
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_version_formats() {
        assert_eq!(
            ToolVersion::find("circom compiler 2.1.8"),
            Some(ToolVersion::new(2, 1, 8))
        );
        assert_eq!(
            ToolVersion::find("snarkjs@0.7.4"),
            Some(ToolVersion::new(0, 7, 4))
        );
        assert_eq!(ToolVersion::find("v20.11.1\n"), Some(ToolVersion::new(20, 11, 1)));
        assert_eq!(
            ToolVersion::find("release 0.7.0-rc1"),
            Some(ToolVersion::new(0, 7, 0))
        );
    }

    #[test]
    fn test_find_rejects_partial() {
        assert!(ToolVersion::find("").is_none());
        assert!(ToolVersion::find("version 1.2").is_none());
        assert!(ToolVersion::find("no digits here").is_none());
    }

    #[test]
    fn test_ordering() {
        assert!(ToolVersion::new(2, 0, 9) < MIN_COMPILER);
        assert!(ToolVersion::new(2, 1, 0) >= MIN_COMPILER);
        assert!(ToolVersion::new(0, 6, 11) < MIN_KEYGEN);
        assert_eq!(MIN_KEYGEN.to_string(), "0.7.0");
    }

    #[test]
    fn test_missing_prerequisites_reported() {
        let config = ForgeConfig {
            compiler: "circuit-forge-no-such-compiler".into(),
            keygen: "circuit-forge-no-such-keygen".into(),
            ..ForgeConfig::default()
        };
        let missing = check_prerequisites(&config).unwrap_err();
        let names: Vec<_> = missing.iter().map(|m| m.tool.as_str()).collect();
        assert_eq!(
            names,
            ["circuit-forge-no-such-compiler", "circuit-forge-no-such-keygen"]
        );
    }

    #[tokio::test]
    async fn test_detect_version_missing_tool() {
        assert!(detect_version("circuit-forge-no-such-tool").await.is_none());
    }
}
