//! Command execution against the target, local or over ssh.
//!
//! Two variants of every call: the default (mutating) one is suppressed
//! under dry-run and replaced by a printed `DRY-RUN>>` line, while the
//! read-only one always executes so diagnostic checks stay accurate.
//!
//! Remote commands are never built by naive string concatenation: each
//! argv word is shell-quoted individually before being handed to ssh.

use anyhow::{bail, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use crate::error::EngineError;
use crate::target::Target;

/// Stable, greppable prefix for suppressed mutating actions.
pub const DRY_RUN_MARKER: &str = "DRY-RUN>>";

// ============================================================================
// Run log
// ============================================================================

/// Append-only per-invocation log capturing all transport output.
///
/// Never consulted by the orchestrator itself; it exists for humans
/// digging into a failed run.
#[derive(Clone)]
pub struct RunLog {
    file: Arc<Mutex<Option<File>>>,
}

impl RunLog {
    /// Create a timestamped log file under `dir`.
    pub fn create(dir: &Path) -> Result<(Self, PathBuf)> {
        fs::create_dir_all(dir)?;
        let name = format!("run-{}.log", chrono::Local::now().format("%Y%m%d-%H%M%S"));
        let path = dir.join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok((
            Self {
                file: Arc::new(Mutex::new(Some(file))),
            },
            path,
        ))
    }

    /// A log that discards everything (tests, `--list`).
    pub fn disabled() -> Self {
        Self {
            file: Arc::new(Mutex::new(None)),
        }
    }

    /// Append one line. Log failures are swallowed: losing a log line
    /// must never fail a provisioning step.
    pub fn line(&self, text: &str) {
        let mut guard = match self.file.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(file) = guard.as_mut() {
            let _ = writeln!(file, "{text}");
        }
    }
}

// ============================================================================
// Command output
// ============================================================================

/// Exit code plus combined stdout/stderr of one command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub code: i32,
    pub output: String,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Synthetic success returned for suppressed dry-run actions, so the
    /// calling code's control flow is unaffected.
    fn synthetic_ok() -> Self {
        Self {
            code: 0,
            output: String::new(),
        }
    }

    /// Turn a non-zero exit into an error carrying the output tail.
    pub fn check(self, what: &str) -> Result<CmdOutput> {
        if self.success() {
            return Ok(self);
        }
        let tail: Vec<&str> = self.output.lines().rev().take(15).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        bail!(
            "{what} exited with code {}\n{}",
            self.code,
            tail.join("\n")
        );
    }
}

// ============================================================================
// Shell quoting
// ============================================================================

/// Quote one word for the shell using single quotes.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Double-quote a path so the target's shell still expands `$HOME`.
///
/// Config paths deliberately reference the *target's* environment; this
/// escapes everything except `$`.
pub fn shell_dquote(path: &str) -> String {
    let escaped = path
        .replace('\\', r"\\")
        .replace('"', "\\\"")
        .replace('`', "\\`");
    format!("\"{escaped}\"")
}

// ============================================================================
// Transport
// ============================================================================

pub struct Transport {
    target: Target,
    dry_run: bool,
    log: RunLog,
}

impl Transport {
    pub fn new(target: Target, dry_run: bool, log: RunLog) -> Self {
        Self {
            target,
            dry_run,
            log,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    /// Run a command (mutating: suppressed under dry-run).
    pub fn run(&self, argv: &[&str]) -> Result<CmdOutput, EngineError> {
        if self.dry_run {
            self.announce(&render_argv(argv));
            return Ok(CmdOutput::synthetic_ok());
        }
        self.exec_argv(argv)
    }

    /// Run a command (read-only: always executes).
    pub fn run_ro(&self, argv: &[&str]) -> Result<CmdOutput, EngineError> {
        self.exec_argv(argv)
    }

    /// Run a shell snippet (mutating: suppressed under dry-run).
    pub fn run_script(&self, script: &str) -> Result<CmdOutput, EngineError> {
        if self.dry_run {
            self.announce(script);
            return Ok(CmdOutput::synthetic_ok());
        }
        self.exec_script(script)
    }

    /// Run a shell snippet (read-only: always executes).
    pub fn run_script_ro(&self, script: &str) -> Result<CmdOutput, EngineError> {
        self.exec_script(script)
    }

    fn announce(&self, rendered: &str) {
        let line = format!("{DRY_RUN_MARKER} {rendered}");
        println!("{line}");
        self.log.line(&line);
    }

    fn exec_argv(&self, argv: &[&str]) -> Result<CmdOutput, EngineError> {
        match &self.target {
            Target::Local => {
                let Some((program, args)) = argv.split_first() else {
                    return Err(EngineError::Spawn {
                        program: String::new(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::InvalidInput,
                            "empty argv",
                        ),
                    });
                };
                let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
                self.spawn(program, &args)
            }
            Target::Remote { .. } => {
                let command = render_argv(argv);
                self.spawn_ssh(&command)
            }
        }
    }

    fn exec_script(&self, script: &str) -> Result<CmdOutput, EngineError> {
        match &self.target {
            Target::Local => self.spawn("sh", &["-c".to_string(), script.to_string()]),
            Target::Remote { .. } => self.spawn_ssh(script),
        }
    }

    fn spawn_ssh(&self, command: &str) -> Result<CmdOutput, EngineError> {
        let Target::Remote {
            user,
            host,
            port,
            key,
        } = &self.target
        else {
            unreachable!("spawn_ssh on local target");
        };

        let mut args: Vec<String> = vec![
            "-p".to_string(),
            port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if let Some(key) = key {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args.push(format!("{user}@{host}"));
        args.push(command.to_string());

        let out = self.spawn("ssh", &args)?;

        // ssh reserves 255 for its own failures (unreachable host, auth).
        if out.code == 255 {
            return Err(EngineError::Unreachable {
                target: self.target.to_string(),
                message: out.output.trim().to_string(),
            });
        }
        Ok(out)
    }

    fn spawn(&self, program: &str, args: &[String]) -> Result<CmdOutput, EngineError> {
        log::debug!("exec: {} {}", program, args.join(" "));
        self.log.line(&format!("$ {} {}", program, args.join(" ")));

        let out =
            Command::new(program)
                .args(args)
                .output()
                .map_err(|source| EngineError::Spawn {
                    program: program.to_string(),
                    source,
                })?;

        let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&out.stderr));

        for line in combined.lines() {
            self.log.line(line);
        }

        Ok(CmdOutput {
            code: out.status.code().unwrap_or(-1),
            output: combined,
        })
    }
}

fn render_argv(argv: &[&str]) -> String {
    argv.iter()
        .map(|w| shell_quote(w))
        .collect::<Vec<_>>()
        .join(" ")
}
