//! Runner settings loaded from the environment and command line.

use std::path::PathBuf;

use anyhow::bail;

/// Default directory for downloaded images.
pub const DEFAULT_OUTPUT_DIR: &str = "./output";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSettings {
    /// API-format prompt JSON to submit.
    pub prompt_file: PathBuf,
    pub output_dir: PathBuf,
}

impl RunnerSettings {
    /// Load settings from the process environment and arguments.
    ///
    /// The prompt file is the first argument, falling back to
    /// `COMFYUI_PROMPT_FILE`. `COMFYUI_OUTPUT_DIR` defaults to `./output`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_sources(|key| std::env::var(key).ok(), std::env::args().skip(1))
    }

    fn from_sources(
        lookup: impl Fn(&str) -> Option<String>,
        mut args: impl Iterator<Item = String>,
    ) -> anyhow::Result<Self> {
        let prompt_file = match args.next().or_else(|| lookup("COMFYUI_PROMPT_FILE")) {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => bail!("usage: comfyui-runner <prompt.json> (or set COMFYUI_PROMPT_FILE)"),
        };

        let output_dir = lookup("COMFYUI_OUTPUT_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string());

        Ok(Self {
            prompt_file,
            output_dir: PathBuf::from(output_dir),
        })
    }
}
