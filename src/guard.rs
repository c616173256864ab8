//! Skip-vs-execute decisions for steps and expensive sub-operations.
//!
//! Two gates: a boolean completion marker, and a content fingerprint for
//! work whose cost depends on changing inputs (dependency installs from a
//! manifest). The fingerprint gate also re-checks a post-condition, since
//! a stale marker must not mask an environment that was wiped after the
//! marker was written (pods lose `/root` on restart but keep `/workspace`).
//!
//! The guard never rolls anything back: a step that fails mid-way leaves
//! no marker, so the next invocation retries the whole step.

use anyhow::{Context, Result};

use crate::state::StateStore;
use crate::transport::{shell_dquote, Transport};

pub struct Guard<'a> {
    store: &'a StateStore<'a>,
    force: bool,
}

impl<'a> Guard<'a> {
    pub fn new(store: &'a StateStore<'a>, force: bool) -> Self {
        Self { store, force }
    }

    /// Boolean gate: run iff forced or not yet recorded as done.
    pub fn should_run(&self, key: &str) -> Result<bool> {
        if self.force {
            return Ok(true);
        }
        Ok(!self.store.is_done(key)?)
    }

    /// Fingerprint gate: run iff forced, the stored fingerprint differs,
    /// or the post-condition check failed.
    pub fn should_run_fp(
        &self,
        key: &str,
        current: &str,
        postcondition_ok: bool,
    ) -> Result<bool> {
        if self.force {
            return Ok(true);
        }
        if !postcondition_ok {
            log::debug!("{key}: post-condition failed, ignoring stored fingerprint");
            return Ok(true);
        }
        Ok(self.store.fingerprint(key)?.as_deref() != Some(current))
    }

    pub fn mark_done(&self, key: &str) -> Result<()> {
        self.store.mark_done(key)
    }

    pub fn record_fingerprint(&self, key: &str, value: &str) -> Result<()> {
        self.store.set_fingerprint(key, value)
    }
}

/// Hash the watched manifest files (read through the transport, so this
/// works for remote targets) plus a version discriminator.
///
/// Missing manifests hash as empty, so creating one later changes the
/// fingerprint and triggers a re-run.
pub fn manifest_fingerprint(
    transport: &Transport,
    files: &[String],
    discriminator: &str,
) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    for file in files {
        let out = transport
            .run_script_ro(&format!("cat {} 2>/dev/null || true", shell_dquote(file)))
            .with_context(|| format!("reading manifest {file}"))?;
        hasher.update(out.output.as_bytes());
        hasher.update(&[0]);
    }
    hasher.update(discriminator.as_bytes());
    Ok(hasher.finalize().to_hex().to_string())
}
