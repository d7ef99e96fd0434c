// src/core/oracle.rs

//! The script version oracle.
//!
//! Answers "what version is the script?" by preferring dynamic evaluation
//! through an external interpreter and falling back to a static scan of the
//! file. Also owns the in-place version bump used by the hot-reload command.
//! Script-file I/O is unsynchronized: there is a single writer, the
//! hot-reload handler, and it runs as one in-flight task.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::core::HostError;

/// Wall-clock bound on one interpreter invocation.
const INTERPRETER_TIMEOUT: Duration = Duration::from_secs(2);

/// Body written when hot reload has to create the script from scratch.
const CANONICAL_V1_BODY: &str = "-- VERSION:v1\nfunction runtime_hello()\n  return \"v1\"\nend\n";

lazy_static! {
    static ref VERSION_MARKER: Regex = Regex::new(r"VERSION:(v[0-9]+)").unwrap();
    static ref QUOTED_RETURN: Regex = Regex::new(r#"return\s+"(v[0-9]+)""#).unwrap();
    static ref VERSION_TOKEN: Regex = Regex::new(r"v[0-9]+").unwrap();
    static ref VERSION_EXACT: Regex = Regex::new(r"^v([0-9]+)$").unwrap();
}

#[derive(Debug, Clone)]
pub struct ScriptOracle {
    script_path: Option<PathBuf>,
    interpreter_command: String,
}

impl ScriptOracle {
    pub fn new(script_path: Option<PathBuf>, interpreter_command: &str) -> Self {
        Self {
            script_path,
            interpreter_command: interpreter_command.trim().to_string(),
        }
    }

    /// Reads the current script version, preferring the interpreter when one
    /// is configured and the script exists. Any interpreter failure (missing
    /// binary, non-zero exit, empty output, timeout) degrades to the static
    /// scan; this never returns an error.
    pub async fn read_version(&self) -> String {
        if let Some(path) = self.script_path.as_ref()
            && !self.interpreter_command.is_empty()
            && path.exists()
        {
            let expression = format!(
                "dofile([[{}]]) if type(runtime_hello) == 'function' then io.write(runtime_hello()) else io.write('v0') end",
                path.display()
            );
            let output = Command::new(&self.interpreter_command)
                .arg("-e")
                .arg(expression)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output();

            match tokio::time::timeout(INTERPRETER_TIMEOUT, output).await {
                Ok(Ok(out)) if out.status.success() => {
                    let stdout = String::from_utf8_lossy(&out.stdout);
                    let trimmed = stdout.trim();
                    if !trimmed.is_empty() {
                        return trimmed.to_string();
                    }
                }
                Ok(Ok(out)) => {
                    debug!("Interpreter exited with {}; using static scan", out.status);
                }
                Ok(Err(e)) => {
                    debug!("Interpreter spawn failed ({e}); using static scan");
                }
                Err(_) => {
                    warn!(
                        "Interpreter did not answer within {INTERPRETER_TIMEOUT:?}; using static scan"
                    );
                }
            }
        }

        self.read_version_fallback()
    }

    /// Static scan: first `VERSION:vN` marker, else first `return "vN"`,
    /// else `v0`. Also `v0` when no script is configured or present.
    pub fn read_version_fallback(&self) -> String {
        let Some(path) = self.script_path.as_ref() else {
            return "v0".to_string();
        };
        let Ok(content) = std::fs::read_to_string(path) else {
            return "v0".to_string();
        };

        if let Some(caps) = VERSION_MARKER.captures(&content) {
            return caps[1].to_string();
        }
        if let Some(caps) = QUOTED_RETURN.captures(&content) {
            return caps[1].to_string();
        }
        "v0".to_string()
    }

    /// Bumps the script version in place. An absent file is created with the
    /// canonical `v1` body; otherwise every `vN`-shaped token is rewritten to
    /// the successor of the current version, and if that changes nothing a
    /// `-- VERSION:` marker line is appended.
    pub fn hot_reload(&self) -> Result<(), HostError> {
        let Some(path) = self.script_path.as_ref() else {
            return Ok(());
        };

        if !path.exists() {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, CANONICAL_V1_BODY)?;
            debug!("Created script {} at v1", path.display());
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let next = next_version(&self.read_version_fallback());
        let replaced = VERSION_TOKEN.replace_all(&content, next.as_str());
        let new_content = if replaced == content {
            format!("{content}\n-- VERSION:{next}\n")
        } else {
            replaced.into_owned()
        };
        std::fs::write(path, new_content)?;
        debug!("Script {} bumped to {next}", path.display());
        Ok(())
    }
}

/// `vN` -> `v(N+1)`; anything unparseable restarts at `v1`.
fn next_version(version: &str) -> String {
    match VERSION_EXACT
        .captures(version)
        .and_then(|caps| caps[1].parse::<u64>().ok())
    {
        Some(n) => format!("v{}", n + 1),
        None => "v1".to_string(),
    }
}
