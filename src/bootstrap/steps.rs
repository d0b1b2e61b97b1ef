//! Individual bootstrap steps.
//!
//! Each step returns a [`BootstrapStepResult`] and never an error, so one
//! failing step cannot abort the ones after it.

use std::ffi::OsStr;
use std::path::Path;

use tokio::process::Command;

use super::types::BootstrapStepResult;
use crate::runtime::config::BootstrapSettings;
use crate::runtime::resolver::{is_executable, InstallResolver};
use crate::runtime::RuntimeLayout;

pub const RECOMMENDATION_STEP: &str = "recommendation-cli";
pub const SPEECH_STEP: &str = "speech-cli";
pub const VENV_STEP: &str = "venv";
pub const PACKAGES_STEP: &str = "runtime-packages";

/// Entry points the private environment must expose to count as healthy.
pub const HEALTH_ENTRY_POINTS: [&str; 3] = ["pip", "python", "mlx_lm.lora"];

/// Entry points the required package set provides.
const PACKAGE_ENTRY_POINTS: [&str; 2] = ["mlx_lm.lora", "mlx_lm.server"];

// ─── Subprocess Helper ──────────────────────────────────────────────────────

/// Run a tool to completion, mapping non-zero exit to its trimmed stderr.
pub(super) async fn run_tool<I, S>(program: &Path, args: I) -> Result<(), String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map_err(|e| format!("failed to run {}: {e}", program.display()))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let code = output
        .status
        .code()
        .map_or_else(|| "signal".to_string(), |c| c.to_string());
    Err(format!(
        "{} exited with {code}: {}",
        program.display(),
        stderr.trim()
    ))
}

// ─── Optional CLIs ──────────────────────────────────────────────────────────

/// Ensure one of `candidates` is runnable, installing `formula` if possible.
pub(super) async fn ensure_optional_cli(
    step: &str,
    candidates: &[&str],
    formula: &str,
    package_manager: &str,
    resolver: &InstallResolver,
) -> BootstrapStepResult {
    if let Some((name, path)) = resolver.resolve_first(candidates) {
        return BootstrapStepResult::ok(step, format!("{name} found at {}", path.display()));
    }

    let wanted = candidates.first().copied().unwrap_or(formula);
    let Some(manager) = resolver.resolve_system(package_manager) else {
        tracing::warn!(step, tool = wanted, package_manager, "optional tool missing, no package manager");
        return BootstrapStepResult::failed(
            step,
            format!("{wanted} not found and {package_manager} is not available to install it"),
        );
    };

    tracing::info!(step, formula, manager = %manager.display(), "installing optional tool");
    if let Err(e) = run_tool(&manager, ["install", formula]).await {
        tracing::warn!(step, error = %e, "optional tool install failed");
        return BootstrapStepResult::failed(step, format!("{package_manager} install {formula} failed: {e}"));
    }

    match resolver.resolve_first(candidates) {
        Some((name, path)) => BootstrapStepResult::installed(
            step,
            format!("installed {formula}; {name} at {}", path.display()),
        ),
        None => BootstrapStepResult::failed(
            step,
            format!("installed {formula} but none of [{}] is runnable", candidates.join(", ")),
        ),
    }
}

pub(super) async fn ensure_recommendation_cli(
    settings: &BootstrapSettings,
    resolver: &InstallResolver,
) -> BootstrapStepResult {
    ensure_optional_cli(
        RECOMMENDATION_STEP,
        &[settings.recommendation_cli.as_str()],
        &settings.recommendation_formula,
        &settings.package_manager,
        resolver,
    )
    .await
}

pub(super) async fn ensure_speech_cli(
    settings: &BootstrapSettings,
    resolver: &InstallResolver,
) -> BootstrapStepResult {
    let candidates: Vec<&str> = settings.speech_candidates.iter().map(String::as_str).collect();
    ensure_optional_cli(
        SPEECH_STEP,
        &candidates,
        &settings.speech_formula,
        &settings.package_manager,
        resolver,
    )
    .await
}

// ─── Interpreter Environment ────────────────────────────────────────────────

/// Create the private environment if its interpreter is missing.
pub(super) async fn ensure_venv(
    layout: &RuntimeLayout,
    resolver: &InstallResolver,
) -> BootstrapStepResult {
    let venv_dir = layout.venv_dir();
    if is_executable(&layout.venv_executable("python")) {
        return BootstrapStepResult::ok(VENV_STEP, format!("environment present at {}", venv_dir.display()));
    }

    let Some(system_python) = resolver
        .resolve_system("python3")
        .or_else(|| resolver.resolve_system("python"))
    else {
        return BootstrapStepResult::failed(
            VENV_STEP,
            "Python 3 not found; install Python 3.11+ to create the runtime environment",
        );
    };

    tracing::info!(python = %system_python.display(), venv = %venv_dir.display(), "creating environment");
    let args = [OsStr::new("-m"), OsStr::new("venv"), venv_dir.as_os_str()];
    if let Err(e) = run_tool(&system_python, args).await {
        return BootstrapStepResult::failed(VENV_STEP, format!("failed to create environment: {e}"));
    }

    if !is_executable(&layout.venv_executable("python")) {
        return BootstrapStepResult::failed(
            VENV_STEP,
            format!("environment created at {} but has no interpreter", venv_dir.display()),
        );
    }
    BootstrapStepResult::installed(VENV_STEP, format!("created environment at {}", venv_dir.display()))
}

/// Entry points of the required package set that are not yet executable.
pub(super) fn missing_package_entry_points(layout: &RuntimeLayout) -> Vec<&'static str> {
    std::iter::once("pip")
        .chain(PACKAGE_ENTRY_POINTS)
        .filter(|name| !is_executable(&layout.venv_executable(name)))
        .collect()
}

/// Install or upgrade pip and the required packages when missing or repairing.
pub(super) async fn ensure_packages(
    layout: &RuntimeLayout,
    settings: &BootstrapSettings,
    repair: bool,
) -> BootstrapStepResult {
    let missing = missing_package_entry_points(layout);
    if !repair && missing.is_empty() {
        return BootstrapStepResult::ok(PACKAGES_STEP, "required packages present");
    }

    let pip = layout.venv_executable("pip");
    if !is_executable(&pip) {
        return BootstrapStepResult::failed(
            PACKAGES_STEP,
            format!("{} is missing; recreate the environment with repair", pip.display()),
        );
    }

    tracing::info!(repair, missing = ?missing, packages = ?settings.packages, "installing runtime packages");

    // Upgrading pip is best-effort; the existing pip usually works.
    if let Err(e) = run_tool(&pip, ["install", "--quiet", "--upgrade", "pip"]).await {
        tracing::warn!(error = %e, "pip upgrade failed (non-fatal)");
    }

    let args = ["install", "--quiet", "--upgrade"]
        .into_iter()
        .map(String::from)
        .chain(settings.packages.iter().cloned());
    if let Err(e) = run_tool(&pip, args).await {
        return BootstrapStepResult::failed(PACKAGES_STEP, format!("package install failed: {e}"));
    }

    let still_missing = missing_package_entry_points(layout);
    if !still_missing.is_empty() {
        return BootstrapStepResult::failed(
            PACKAGES_STEP,
            format!("installed packages but entry points are missing: {}", still_missing.join(", ")),
        );
    }
    BootstrapStepResult::installed(PACKAGES_STEP, format!("installed {}", settings.packages.join(" ")))
}
