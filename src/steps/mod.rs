//! Step registry: the ordered table of provisioning units.
//!
//! Step names carry a numeric ordering prefix (`10_sysdeps`), so plain
//! lexicographic sort makes the prefix the primary ordering key. Short
//! names resolve by exact match first, then first-prefix-match in
//! registry order, which keeps resolution deterministic.

mod pod;

use anyhow::Result;

use crate::config::PodupConfig;
use crate::error::EngineError;
use crate::state::StateStore;
use crate::transport::Transport;

/// Everything a step body may touch. Explicit context instead of ambient
/// environment variables threaded through sourced scripts.
pub struct StepContext<'a> {
    pub transport: &'a Transport,
    pub store: &'a StateStore<'a>,
    pub config: &'a PodupConfig,
    pub force: bool,
}

pub type StepFn = fn(&StepContext) -> Result<()>;

#[derive(Clone)]
pub struct Step {
    pub name: &'static str,
    pub description: &'static str,
    pub run: StepFn,
    /// Whether the orchestrator records and honors a step-level DONE
    /// marker. Steps whose bodies gate their own sub-operations opt out,
    /// so a changed manifest can still trigger a gated re-install even
    /// after the step once completed.
    pub track_done: bool,
}

pub struct Registry {
    steps: Vec<Step>,
}

impl Registry {
    /// The built-in GPU pod provisioning steps.
    pub fn builtin() -> Self {
        Self::from_steps(pod::steps())
    }

    pub fn from_steps(mut steps: Vec<Step>) -> Self {
        // Only units following the NN_name convention participate; the
        // numeric prefix is what makes lexicographic order meaningful.
        steps.retain(|s| is_step_name(s.name));
        steps.sort_by(|a, b| a.name.cmp(b.name));
        steps.dedup_by(|a, b| a.name == b.name);
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Resolve an abbreviated step name to the canonical step.
    pub fn resolve(&self, short: &str) -> Result<&Step, EngineError> {
        if let Some(step) = self.steps.iter().find(|s| s.name == short) {
            return Ok(step);
        }
        self.steps
            .iter()
            .find(|s| s.name.starts_with(short))
            .ok_or_else(|| EngineError::Resolution {
                name: short.to_string(),
            })
    }

    /// Compute the run list. `only` wins and yields a singleton;
    /// otherwise `[from..end]` minus the skip set, in registry order.
    /// Every named step must resolve, or nothing runs.
    pub fn select(
        &self,
        from: Option<&str>,
        only: Option<&str>,
        skip: &[String],
    ) -> Result<Vec<&Step>, EngineError> {
        if let Some(only) = only {
            return Ok(vec![self.resolve(only)?]);
        }

        let start = match from {
            Some(from) => {
                let name = self.resolve(from)?.name;
                self.steps
                    .iter()
                    .position(|s| s.name == name)
                    .unwrap_or(0)
            }
            None => 0,
        };

        let mut skipped: Vec<&str> = Vec::new();
        for name in skip {
            skipped.push(self.resolve(name)?.name);
        }

        Ok(self.steps[start..]
            .iter()
            .filter(|s| !skipped.contains(&s.name))
            .collect())
    }
}

fn is_step_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_digit()) && name.contains('_')
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    fn noop(_ctx: &StepContext) -> Result<()> {
        Ok(())
    }

    pub fn step(name: &'static str, description: &'static str) -> Step {
        Step {
            name,
            description,
            run: noop,
            track_done: true,
        }
    }

    /// The four-step registry used across selection tests.
    pub fn sample_registry() -> Registry {
        Registry::from_steps(vec![
            step("30_c", "c"),
            step("10_a", "a"),
            step("40_d", "d"),
            step("20_b", "b"),
        ])
    }
}
