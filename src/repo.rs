//! Conflict resolution for resources that must exist in a particular
//! shape: git checkouts and plain directories.
//!
//! Policy: never silently delete pre-existing content. Anything in the
//! way is renamed to `<path>.bak.<timestamp>` first, leaving a
//! recoverable trace.

use anyhow::{Context, Result};

use crate::transport::{shell_dquote, Transport};
use crate::ui;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoAction {
    /// Valid checkout present: best-effort update.
    Update,
    /// Something else occupies the path: move it aside, then clone.
    MoveAsideAndClone,
    /// Nothing there: clone directly.
    Clone,
}

/// Decide what `ensure_repository` has to do. Pure, so the branch table
/// is testable without git or a network.
pub fn plan_repo_action(exists: bool, is_repo: bool) -> RepoAction {
    match (exists, is_repo) {
        (true, true) => RepoAction::Update,
        (true, false) => RepoAction::MoveAsideAndClone,
        (false, _) => RepoAction::Clone,
    }
}

/// Ensure a valid git checkout of `url` exists at `path`.
///
/// An update failure on an existing checkout is a logged warning, not a
/// step failure: a degraded network must not block using an
/// already-working checkout.
pub fn ensure_repository(transport: &Transport, path: &str, url: &str, label: &str) -> Result<()> {
    let exists = path_exists(transport, path)?;
    let is_repo = exists && path_exists(transport, &format!("{path}/.git"))?;

    match plan_repo_action(exists, is_repo) {
        RepoAction::Update => {
            let out = transport
                .run_script(&format!(
                    "git -C {} pull --ff-only",
                    shell_dquote(path)
                ))
                .with_context(|| format!("{label}: updating checkout"))?;
            if !out.success() {
                ui::warn(&format!(
                    "{label}: update fetch failed, continuing with existing checkout"
                ));
                log::warn!(
                    "{label}: update fetch failed (continuing with existing checkout): {}",
                    out.output.trim()
                );
            }
        }
        RepoAction::MoveAsideAndClone => {
            let backup = move_aside(transport, path)?;
            log::info!("{label}: moved conflicting path to {backup}");
            clone(transport, path, url, label)?;
        }
        RepoAction::Clone => clone(transport, path, url, label)?,
    }
    Ok(())
}

/// Ensure `path` is a directory, moving aside anything else in the way.
pub fn ensure_dir_or_move_aside(transport: &Transport, path: &str) -> Result<()> {
    let exists = path_exists(transport, path)?;
    if exists && !is_dir(transport, path)? {
        let backup = move_aside(transport, path)?;
        log::info!("moved conflicting path to {backup}");
    }
    transport
        .run_script(&format!("mkdir -p {}", shell_dquote(path)))
        .context("creating directory")?
        .check(&format!("mkdir -p {path}"))?;
    Ok(())
}

fn clone(transport: &Transport, path: &str, url: &str, label: &str) -> Result<()> {
    transport
        .run_script(&format!(
            "git clone {} {}",
            shell_dquote(url),
            shell_dquote(path)
        ))
        .with_context(|| format!("{label}: cloning"))?
        .check(&format!("git clone of {label}"))?;
    Ok(())
}

/// Rename to a timestamped backup. Returns the backup path.
fn move_aside(transport: &Transport, path: &str) -> Result<String> {
    let backup = format!(
        "{path}.bak.{}",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    );
    transport
        .run_script(&format!(
            "mv {} {}",
            shell_dquote(path),
            shell_dquote(&backup)
        ))
        .context("moving conflicting path aside")?
        .check(&format!("mv {path} {backup}"))?;
    Ok(backup)
}

fn path_exists(transport: &Transport, path: &str) -> Result<bool> {
    let out = transport
        .run_script_ro(&format!("test -e {}", shell_dquote(path)))
        .context("checking path")?;
    Ok(out.success())
}

fn is_dir(transport: &Transport, path: &str) -> Result<bool> {
    let out = transport
        .run_script_ro(&format!("test -d {}", shell_dquote(path)))
        .context("checking path type")?;
    Ok(out.success())
}
