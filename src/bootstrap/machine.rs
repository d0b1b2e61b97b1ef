//! Bootstrap state machine: idempotent install and repair of runtime tools.
//!
//! The flow:
//!   1. Health check (private env entry points + current marker). Healthy and
//!      not repairing → a single `skipped` step, no subprocesses.
//!   2. Optional recommendation CLI
//!   3. Optional speech-to-text CLI
//!   4. Private interpreter environment, then the required package set
//!   5. Marker, only once the environment steps succeeded
//!
//! `bootstrap` never returns an error: faults become a failed step.

use chrono::Utc;

use super::marker::{read_marker, write_marker};
use super::steps::{self, HEALTH_ENTRY_POINTS};
use super::types::{BootstrapReport, BootstrapStepResult, StepState};
use crate::runtime::config::BootstrapSettings;
use crate::runtime::resolver::{is_executable, InstallResolver};
use crate::runtime::{RuntimeLayout, RuntimeSettings};

/// Name of the step reported for whole-run outcomes.
pub const BOOTSTRAP_STEP: &str = "bootstrap";

/// Drives the bootstrap steps for one runtime root.
///
/// Concurrent calls on the same root must be serialised by the caller.
pub struct Bootstrapper {
    layout: RuntimeLayout,
    resolver: InstallResolver,
    settings: BootstrapSettings,
}

impl Bootstrapper {
    pub fn new(layout: RuntimeLayout, settings: BootstrapSettings) -> Self {
        let resolver = InstallResolver::new(&layout);
        Self {
            layout,
            resolver,
            settings,
        }
    }

    /// Replace the resolver (tests isolate system lookups this way).
    pub fn with_resolver(mut self, resolver: InstallResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.layout
    }

    /// True when the private environment is complete and the marker is current.
    ///
    /// Optional tools are deliberately not consulted.
    pub fn is_healthy(&self) -> bool {
        HEALTH_ENTRY_POINTS
            .iter()
            .all(|name| is_executable(&self.layout.venv_executable(name)))
            && read_marker(&self.layout.state_file()).is_some()
    }

    /// Run a bootstrap pass. See the module docs for the step order.
    pub async fn bootstrap(&self, repair: bool) -> BootstrapReport {
        let started_at = Utc::now();

        if !repair && self.is_healthy() {
            tracing::info!(root = %self.layout.root().display(), "runtime healthy, bootstrap skipped");
            return BootstrapReport {
                started_at,
                finished_at: Utc::now(),
                steps: vec![BootstrapStepResult::skipped(BOOTSTRAP_STEP, "runtime already healthy")],
            };
        }

        tracing::info!(repair, root = %self.layout.root().display(), "bootstrap started");
        let steps = match self.run_steps(repair).await {
            Ok(steps) => steps,
            Err(e) => {
                tracing::error!(error = %e, "bootstrap aborted");
                vec![BootstrapStepResult::failed(BOOTSTRAP_STEP, e)]
            }
        };

        for step in &steps {
            tracing::info!(step = %step.name, state = ?step.state, detail = %step.detail, "bootstrap step");
        }

        BootstrapReport {
            started_at,
            finished_at: Utc::now(),
            steps,
        }
    }

    async fn run_steps(&self, repair: bool) -> Result<Vec<BootstrapStepResult>, String> {
        self.layout.ensure().map_err(|e| e.to_string())?;

        let mut results = vec![
            steps::ensure_recommendation_cli(&self.settings, &self.resolver).await,
            steps::ensure_speech_cli(&self.settings, &self.resolver).await,
        ];

        let venv = steps::ensure_venv(&self.layout, &self.resolver).await;
        let packages = if venv.is_failed() {
            BootstrapStepResult::skipped(steps::PACKAGES_STEP, "environment unavailable")
        } else {
            steps::ensure_packages(&self.layout, &self.settings, repair).await
        };
        let environment_ready = matches!(packages.state, StepState::Ok | StepState::Installed);
        results.push(venv);
        results.push(packages);

        // Optional-tool failures never block the marker.
        if environment_ready {
            match write_marker(&self.layout.state_file()) {
                Ok(marker) => tracing::info!(schema = marker.schema_version, "bootstrap marker written"),
                Err(e) => results.push(BootstrapStepResult::failed(BOOTSTRAP_STEP, e)),
            }
        }

        Ok(results)
    }
}

/// Bootstrap the default runtime root with its saved settings.
///
/// Root resolution failures are reported as a failed step, like any other fault.
pub async fn bootstrap_default(repair: bool) -> BootstrapReport {
    let started_at = Utc::now();
    match RuntimeLayout::resolve() {
        Ok(layout) => {
            let settings = RuntimeSettings::load_or_default(&layout);
            Bootstrapper::new(layout, settings.bootstrap).bootstrap(repair).await
        }
        Err(e) => BootstrapReport {
            started_at,
            finished_at: Utc::now(),
            steps: vec![BootstrapStepResult::failed(BOOTSTRAP_STEP, e.to_string())],
        },
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::bootstrap::marker::MARKER_SCHEMA_VERSION;
    use crate::bootstrap::steps::{PACKAGES_STEP, RECOMMENDATION_STEP, SPEECH_STEP, VENV_STEP};
    use crate::test_support::{count_lines, write_script};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        layout: RuntimeLayout,
        sysbin: PathBuf,
        calls: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let layout = RuntimeLayout::at(tmp.path().join("root"));
            let sysbin = tmp.path().join("sysbin");
            std::fs::create_dir_all(&sysbin).unwrap();
            let calls = tmp.path().join("calls.log");
            Self {
                _tmp: tmp,
                layout,
                sysbin,
                calls,
            }
        }

        fn bootstrapper(&self) -> Bootstrapper {
            let resolver = InstallResolver::new(&self.layout)
                .with_system_dirs(vec![self.sysbin.clone()])
                .with_path_lookup(false);
            Bootstrapper::new(self.layout.clone(), BootstrapSettings::default()).with_resolver(resolver)
        }

        /// A fake `python3` whose `-m venv` creates an env with a fake pip.
        /// The fake pip drops the package entry points next to itself.
        fn install_fake_python(&self) {
            let log = self.calls.display();
            let body = format!(
                r##"echo "python3 $*" >> "{log}"
if [ "$1" = "-m" ] && [ "$2" = "venv" ]; then
  mkdir -p "$3/bin"
  printf '#!/bin/sh\nexit 0\n' > "$3/bin/python"
  cat > "$3/bin/pip" <<'EOF'
#!/bin/sh
echo "pip $*" >> "{log}"
dir=$(dirname "$0")
for tool in mlx_lm.lora mlx_lm.server; do
  printf '#!/bin/sh\nexit 0\n' > "$dir/$tool"
  chmod +x "$dir/$tool"
done
EOF
  chmod +x "$3/bin/python" "$3/bin/pip"
fi"##
            );
            write_script(&self.sysbin.join("python3"), &body);
        }

        fn install_fake_brew(&self) {
            let log = self.calls.display();
            let sysbin = self.sysbin.display();
            let body = format!(
                r##"echo "brew $*" >> "{log}"
printf '#!/bin/sh\nexit 0\n' > "{sysbin}/$2"
chmod +x "{sysbin}/$2""##
            );
            write_script(&self.sysbin.join("brew"), &body);
        }

        fn seed_healthy_env(&self) {
            for name in ["pip", "python", "mlx_lm.lora", "mlx_lm.server"] {
                write_script(&self.layout.venv_executable(name), "exit 0");
            }
        }
    }

    fn states(report: &BootstrapReport) -> Vec<(&str, StepState)> {
        report.steps.iter().map(|s| (s.name.as_str(), s.state)).collect()
    }

    fn marker_path(layout: &RuntimeLayout) -> PathBuf {
        layout.state_file()
    }

    fn write_stale_marker(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let json = format!(
            r#"{{"schemaVersion":{},"updatedAt":"2025-01-01T00:00:00Z"}}"#,
            MARKER_SCHEMA_VERSION + 1
        );
        std::fs::write(path, json).unwrap();
    }

    #[tokio::test]
    async fn test_repair_without_package_manager_end_to_end() {
        let fx = Fixture::new();
        fx.install_fake_python();
        let boot = fx.bootstrapper();

        let report = boot.bootstrap(true).await;
        assert_eq!(
            states(&report),
            vec![
                (RECOMMENDATION_STEP, StepState::Failed),
                (SPEECH_STEP, StepState::Failed),
                (VENV_STEP, StepState::Installed),
                (PACKAGES_STEP, StepState::Installed),
            ]
        );
        assert!(marker_path(&fx.layout).exists());
        assert!(boot.is_healthy());

        let second = boot.bootstrap(false).await;
        assert_eq!(states(&second), vec![(BOOTSTRAP_STEP, StepState::Skipped)]);
    }

    #[tokio::test]
    async fn test_healthy_runtime_skips_without_subprocesses() {
        let fx = Fixture::new();
        fx.install_fake_python();
        let boot = fx.bootstrapper();
        boot.bootstrap(false).await;
        let calls_after_first = count_lines(&fx.calls);
        assert!(calls_after_first > 0);

        let report = boot.bootstrap(false).await;
        assert_eq!(states(&report), vec![(BOOTSTRAP_STEP, StepState::Skipped)]);
        assert_eq!(count_lines(&fx.calls), calls_after_first);
    }

    #[tokio::test]
    async fn test_stale_marker_forces_recheck() {
        let fx = Fixture::new();
        fx.seed_healthy_env();
        write_stale_marker(&marker_path(&fx.layout));
        let boot = fx.bootstrapper();
        assert!(!boot.is_healthy());

        let report = boot.bootstrap(false).await;
        assert_eq!(report.step(VENV_STEP).unwrap().state, StepState::Ok);
        assert_eq!(report.step(PACKAGES_STEP).unwrap().state, StepState::Ok);
        assert!(boot.is_healthy());
        // Nothing needed installing, so no tool was invoked.
        assert_eq!(count_lines(&fx.calls), 0);
    }

    #[tokio::test]
    async fn test_repair_reinstalls_packages_in_populated_env() {
        let fx = Fixture::new();
        fx.seed_healthy_env();
        let pip = format!("echo \"pip $*\" >> \"{}\"", fx.calls.display());
        write_script(&fx.layout.venv_executable("pip"), &pip);
        let boot = fx.bootstrapper();

        let report = boot.bootstrap(true).await;

        assert_eq!(report.step(VENV_STEP).unwrap().state, StepState::Ok);
        assert_eq!(report.step(PACKAGES_STEP).unwrap().state, StepState::Installed);
        let calls = std::fs::read_to_string(&fx.calls).unwrap();
        assert!(calls.contains("pip install --quiet --upgrade pip"), "calls: {calls}");
        assert!(calls.contains("pip install --quiet --upgrade mlx-lm"), "calls: {calls}");
        assert!(!calls.contains("python3"), "existing env must be reused");
        assert!(marker_path(&fx.layout).exists());
        assert!(boot.is_healthy());
    }

    #[tokio::test]
    async fn test_default_root_uses_saved_settings() {
        let fx = Fixture::new();
        fx.seed_healthy_env();
        let pip = format!("echo \"pip $*\" >> \"{}\"", fx.calls.display());
        write_script(&fx.layout.venv_executable("pip"), &pip);
        let yaml = "bootstrap:\n  packages: [custom-pkg]\n  recommendation_cli: __absent_cli__\n  speech_candidates: [__absent_cli__]\n  package_manager: __absent_manager__\n";
        std::fs::write(fx.layout.config_file(), yaml).unwrap();
        // The only test that points the default root somewhere.
        std::env::set_var(crate::runtime::layout::ROOT_ENV_VAR, fx.layout.root());

        let report = bootstrap_default(true).await;

        assert_eq!(report.step(PACKAGES_STEP).unwrap().state, StepState::Installed);
        let calls = std::fs::read_to_string(&fx.calls).unwrap();
        assert!(calls.contains("pip install --quiet --upgrade custom-pkg"), "calls: {calls}");
        assert!(marker_path(&fx.layout).exists());
    }

    #[tokio::test]
    async fn test_missing_optional_tools_do_not_block_health() {
        let fx = Fixture::new();
        fx.seed_healthy_env();
        let boot = fx.bootstrapper();
        let report = boot.bootstrap(false).await;
        assert_eq!(report.step(RECOMMENDATION_STEP).unwrap().state, StepState::Failed);
        assert!(boot.is_healthy());
        assert_eq!(states(&boot.bootstrap(false).await), vec![(BOOTSTRAP_STEP, StepState::Skipped)]);
    }

    #[tokio::test]
    async fn test_optional_tools_installed_via_package_manager() {
        let fx = Fixture::new();
        fx.seed_healthy_env();
        fx.install_fake_brew();
        let report = fx.bootstrapper().bootstrap(false).await;
        assert_eq!(report.step(RECOMMENDATION_STEP).unwrap().state, StepState::Installed);
        assert_eq!(report.step(SPEECH_STEP).unwrap().state, StepState::Installed);

        let again = fx.bootstrapper().bootstrap(true).await;
        assert_eq!(again.step(RECOMMENDATION_STEP).unwrap().state, StepState::Ok);
        assert!(again.step(SPEECH_STEP).unwrap().detail.contains("whisper-cpp"));
    }

    #[tokio::test]
    async fn test_missing_python_fails_env_and_writes_no_marker() {
        let fx = Fixture::new();
        let report = fx.bootstrapper().bootstrap(true).await;
        assert_eq!(report.step(VENV_STEP).unwrap().state, StepState::Failed);
        assert_eq!(report.step(PACKAGES_STEP).unwrap().state, StepState::Skipped);
        assert!(!report.succeeded());
        assert!(!marker_path(&fx.layout).exists());
    }

    #[tokio::test]
    async fn test_layout_fault_becomes_single_failed_step() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let layout = RuntimeLayout::at(blocker.join("root"));
        let resolver = InstallResolver::new(&layout)
            .with_system_dirs(vec![])
            .with_path_lookup(false);
        let report = Bootstrapper::new(layout, BootstrapSettings::default())
            .with_resolver(resolver)
            .bootstrap(false)
            .await;
        assert_eq!(states(&report), vec![(BOOTSTRAP_STEP, StepState::Failed)]);
    }
}
