//! External tool detection.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Information about an external tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    /// Name of the tool.
    pub name: String,
    /// Whether the tool is available.
    pub available: bool,
    /// Version string if available.
    pub version: Option<String>,
    /// Path to the tool executable.
    pub path: Option<PathBuf>,
}

/// Check if a tool is available and get its information.
///
/// FFmpeg tools take a single-dash `-version` flag.
///
/// # Example
///
/// ```no_run
/// use streamsweep_probe::check_tool;
///
/// let info = check_tool("ffprobe", "-version");
/// if info.available {
///     println!("ffprobe version: {:?}", info.version);
/// }
/// ```
pub fn check_tool(name: &str, version_arg: &str) -> ToolInfo {
    let path = which::which(name).ok();
    let program = path.clone().unwrap_or_else(|| PathBuf::from(name));

    match Command::new(&program).arg(version_arg).output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(|s| s.to_string());

            ToolInfo {
                name: name.to_string(),
                available: true,
                version,
                path: Some(program),
            }
        }
        _ => ToolInfo {
            name: name.to_string(),
            available: false,
            version: None,
            path: None,
        },
    }
}

/// Check the tools the prober can use, honoring a configured ffprobe path.
pub fn check_tools(ffprobe_path: Option<&Path>) -> Vec<ToolInfo> {
    let ffprobe = match ffprobe_path.filter(|p| p.exists()) {
        Some(path) => {
            let mut info = check_tool(&path.to_string_lossy(), "-version");
            info.name = "ffprobe".to_string();
            info
        }
        None => check_tool("ffprobe", "-version"),
    };
    vec![ffprobe]
}

/// Require that a tool is available, returning its path.
///
/// # Errors
///
/// Returns an error if the tool is not found.
pub fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| Error::tool_not_found(name))
}

/// Get the path to a tool, preferring a configured path over PATH lookup.
pub fn get_tool_path(name: &str, config_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = config_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "Configured {} path does not exist, falling back to PATH", name);
    }

    require_tool(name)
}
