//! Built-in provisioning steps for a GPU pod.
//!
//! Bodies stay thin: real work happens in the transport/guard/repo
//! primitives, so each step reads as a short recipe. Sub-operations are
//! individually gated where they are expensive (pip installs), and every
//! action is safe to attempt more than once.

use anyhow::Result;

use crate::guard::{manifest_fingerprint, Guard};
use crate::repo;
use crate::transport::{shell_dquote, shell_quote};
use crate::ui;

use super::{Step, StepContext};

pub(super) fn steps() -> Vec<Step> {
    vec![
        Step {
            name: "10_sysdeps",
            description: "base system packages (apt)",
            run: sysdeps,
            track_done: true,
        },
        // The python and comfyui steps gate their expensive parts with
        // manifest fingerprints, so they run their (cheap) bodies every
        // time instead of hiding behind a step-level marker.
        Step {
            name: "20_python",
            description: "python virtualenv and pinned requirements",
            run: python_env,
            track_done: false,
        },
        Step {
            name: "30_comfyui",
            description: "ComfyUI checkout and its dependencies",
            run: comfyui,
            track_done: false,
        },
        Step {
            name: "40_models",
            description: "model and output directory skeleton",
            run: model_dirs,
            track_done: true,
        },
    ]
}

fn venv_path(ctx: &StepContext) -> String {
    format!("{}/venv", ctx.config.workspace)
}

fn sysdeps(ctx: &StepContext) -> Result<()> {
    ctx.transport
        .run(&["apt-get", "update", "-qq"])?
        .check("apt-get update")?;

    let packages: Vec<String> = ctx.config.packages.iter().map(|p| shell_quote(p)).collect();
    ctx.transport
        .run_script(&format!(
            "DEBIAN_FRONTEND=noninteractive apt-get install -y --no-install-recommends {}",
            packages.join(" ")
        ))?
        .check("apt-get install")?;
    Ok(())
}

fn python_env(ctx: &StepContext) -> Result<()> {
    let venv = venv_path(ctx);

    let have_venv = ctx
        .transport
        .run_script_ro(&format!("test -x {}/bin/python", shell_dquote(&venv)))?
        .success();
    if !have_venv {
        ctx.transport
            .run_script(&format!("python3 -m venv {}", shell_dquote(&venv)))?
            .check("python3 -m venv")?;
    } else {
        ui::dim("virtualenv already present");
    }

    if ctx.config.requirements.is_empty() {
        return Ok(());
    }

    // Fingerprint the manifests together with the interpreter version: a
    // pod image swap with a newer python is a different environment even
    // if the manifests did not change.
    let pyver = python_version(ctx)?;
    let fp = manifest_fingerprint(ctx.transport, &ctx.config.requirements, &pyver)?;
    let pip_ok = ctx
        .transport
        .run_script_ro(&format!("{}/bin/pip --version", shell_dquote(&venv)))?
        .success();

    let guard = Guard::new(ctx.store, ctx.force);
    if guard.should_run_fp("20_python/pip", &fp, pip_ok)? {
        for manifest in &ctx.config.requirements {
            ctx.transport
                .run_script(&format!(
                    "{}/bin/pip install -r {}",
                    shell_dquote(&venv),
                    shell_dquote(manifest)
                ))?
                .check(&format!("pip install -r {manifest}"))?;
        }
        guard.record_fingerprint("20_python/pip", &fp)?;
    } else {
        ui::dim("requirements unchanged, skipping pip install");
    }
    Ok(())
}

fn comfyui(ctx: &StepContext) -> Result<()> {
    let path = format!("{}/ComfyUI", ctx.config.workspace);
    let venv = venv_path(ctx);

    repo::ensure_repository(ctx.transport, &path, &ctx.config.comfyui_url, "ComfyUI")?;

    let manifest = format!("{path}/requirements.txt");
    let pyver = python_version(ctx)?;
    let fp = manifest_fingerprint(ctx.transport, &[manifest.clone()], &pyver)?;

    // The stored fingerprint is only trusted while the environment it
    // describes still exists: checkout marker plus a working venv.
    let post_ok = ctx
        .transport
        .run_script_ro(&format!(
            "test -d {}/.git && test -x {}/bin/python",
            shell_dquote(&path),
            shell_dquote(&venv)
        ))?
        .success();

    let guard = Guard::new(ctx.store, ctx.force);
    if guard.should_run_fp("30_comfyui/pip", &fp, post_ok)? {
        ctx.transport
            .run_script(&format!(
                "{}/bin/pip install -r {}",
                shell_dquote(&venv),
                shell_dquote(&manifest)
            ))?
            .check("pip install ComfyUI requirements")?;
        guard.record_fingerprint("30_comfyui/pip", &fp)?;
    } else {
        ui::dim("ComfyUI requirements unchanged, skipping pip install");
    }
    Ok(())
}

fn model_dirs(ctx: &StepContext) -> Result<()> {
    for dir in &ctx.config.model_dirs {
        let path = format!("{}/{}", ctx.config.workspace, dir);
        repo::ensure_dir_or_move_aside(ctx.transport, &path)?;
    }
    Ok(())
}

fn python_version(ctx: &StepContext) -> Result<String> {
    let out = ctx.transport.run_script_ro("python3 --version 2>&1")?;
    Ok(out.output.trim().to_string())
}
