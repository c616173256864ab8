//! Persistent completion record, stored as flat text *on the target*.
//!
//! The record lives with the machine being provisioned, so a rerun from a
//! fresh invocation (or a different operator laptop) still knows what is
//! done. Format: one `DONE_<KEY>=1` or `FP_<KEY>=<hash>` line per entry.
//!
//! Writes are read-modify-write with an atomic `mv` over the original, so
//! a crashed writer never leaves a half-written record behind.

use anyhow::{Context, Result};

use crate::transport::{shell_dquote, shell_quote, Transport};

pub struct StateStore<'a> {
    transport: &'a Transport,
    /// Record path as a target-side shell string (may reference `$HOME`).
    path: String,
}

impl<'a> StateStore<'a> {
    pub fn new(transport: &'a Transport, path: String) -> Self {
        Self { transport, path }
    }

    pub fn is_done(&self, key: &str) -> Result<bool> {
        let record = self.read_record()?;
        Ok(lookup(&record, &done_key(key)).as_deref() == Some("1"))
    }

    pub fn mark_done(&self, key: &str) -> Result<()> {
        self.update(&done_key(key), "1")
    }

    pub fn fingerprint(&self, key: &str) -> Result<Option<String>> {
        let record = self.read_record()?;
        Ok(lookup(&record, &fp_key(key)))
    }

    pub fn set_fingerprint(&self, key: &str, value: &str) -> Result<()> {
        self.update(&fp_key(key), value)
    }

    /// Read the whole record; a missing file is an empty record.
    fn read_record(&self) -> Result<String> {
        let out = self
            .transport
            .run_script_ro(&format!(
                "cat {} 2>/dev/null || true",
                shell_dquote(&self.path)
            ))
            .context("reading state record")?;
        Ok(out.output)
    }

    fn update(&self, line_key: &str, value: &str) -> Result<()> {
        let record = self.read_record()?;
        let updated = upsert_line(&record, line_key, value);
        self.write_record(&updated)
    }

    /// Write the full record to a temp file on the target, then rename.
    fn write_record(&self, content: &str) -> Result<()> {
        let p = shell_dquote(&self.path);
        let script = format!(
            "set -e\n\
             d=$(dirname {p})\n\
             mkdir -p \"$d\"\n\
             printf '%s' {content} > {p}.tmp.$$\n\
             mv {p}.tmp.$$ {p}",
            p = p,
            content = shell_quote(content),
        );
        self.transport
            .run_script(&script)
            .context("writing state record")?
            .check("state record update")?;
        Ok(())
    }
}

/// Sanitize a step/sub-step key into a record token.
fn token(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn done_key(key: &str) -> String {
    format!("DONE_{}", token(key))
}

fn fp_key(key: &str) -> String {
    format!("FP_{}", token(key))
}

/// Find the value of `line_key` in a record.
fn lookup(record: &str, line_key: &str) -> Option<String> {
    record.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k == line_key).then(|| v.to_string())
    })
}

/// Replace the entry for `line_key`, or append it. Last-write-wins.
fn upsert_line(record: &str, line_key: &str, value: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut replaced = false;
    for line in record.lines() {
        match line.split_once('=') {
            Some((k, _)) if k == line_key => {
                lines.push(format!("{line_key}={value}"));
                replaced = true;
            }
            _ => lines.push(line.to_string()),
        }
    }
    if !replaced {
        lines.push(format!("{line_key}={value}"));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
