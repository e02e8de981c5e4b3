//! Run driver
//!
//! Sequences one invocation: validate inputs, resolve the toolchain, probe the
//! board, optionally set the probe clock, build, deliver and tidy up. The
//! process environment is snapshotted before the toolchain touches it and put
//! back on every exit path.

use std::path::PathBuf;

use super::cancel::CancellationToken;
use super::flash::{ClockSpeed, DeliveryMethod, Programmer};
use super::global_config::GlobalConfig;
use super::pipeline::{BuildArtifacts, BuildPipeline};
use super::request::BuildRequest;
use crate::error::FlashError;
use crate::infra::device::check_usb_presence;
use crate::infra::environment::EnvironmentGuard;
use crate::infra::filesystem::remove_files;
use crate::infra::mass_storage::MassStorageDetector;
use crate::infra::toolchain::{ToolchainEnvironment, ToolchainResolver};

/// Options for one run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip the programmer tool and copy to the mass-storage volume
    pub force_mass_storage: bool,
    /// Probe clock to set before building
    pub clock: Option<ClockSpeed>,
    /// Delete the artifacts after a successful delivery
    pub clean: bool,
    /// Stop after the build
    pub build_only: bool,
}

/// What a successful run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Build outputs, possibly deleted again when `cleaned`
    pub artifacts: BuildArtifacts,
    /// How the bitstream was delivered, `None` for build-only runs
    pub delivery: Option<DeliveryMethod>,
    /// Artifacts removed after delivery
    pub cleaned: Vec<PathBuf>,
}

/// Runs builds and deliveries with one configuration
#[derive(Debug)]
pub struct Driver<'a> {
    config: &'a GlobalConfig,
    token: &'a CancellationToken,
}

impl<'a> Driver<'a> {
    /// Create a driver
    pub fn new(config: &'a GlobalConfig, token: &'a CancellationToken) -> Self {
        Self { config, token }
    }

    /// Executables this run needs
    pub fn required_tools(&self, options: &RunOptions) -> Vec<String> {
        let pipeline = self.config.pipeline_config();
        let mut tools: Vec<String> = pipeline.tools().iter().map(ToString::to_string).collect();
        let needs_programmer =
            !options.build_only && (!options.force_mass_storage || options.clock.is_some());
        if needs_programmer {
            tools.push(self.config.programmer().to_string());
        }
        tools
    }

    /// Run `request` to completion. The process environment is restored
    /// before this returns, whatever the outcome.
    pub async fn run(
        &self,
        request: &BuildRequest,
        options: &RunOptions,
    ) -> Result<RunOutcome, FlashError> {
        request.validate()?;

        let mut guard = EnvironmentGuard::new();
        let result = self.run_guarded(request, options, &mut guard).await;
        guard.restore();

        match &result {
            Ok(outcome) => match &outcome.delivery {
                Some(method) => tracing::info!("FPGA programmed via {method}"),
                None => tracing::info!("Build finished: {}", outcome.artifacts.bin.display()),
            },
            Err(e) if e.is_cancelled() => tracing::warn!("Run cancelled"),
            Err(e) => tracing::error!("{e}"),
        }
        result
    }

    /// Resolve the toolchain and apply its augmentation to `guard`
    pub async fn prepare_toolchain(
        &self,
        tools: &[String],
        guard: &mut EnvironmentGuard,
    ) -> Result<ToolchainEnvironment, FlashError> {
        let mut resolver = ToolchainResolver::new(
            self.config.activation_script(),
            self.config.activation_timeout(),
        );
        let tools: Vec<&str> = tools.iter().map(String::as_str).collect();
        let environment = resolver.resolve(&tools, self.token).await?;
        if environment.is_augmented() {
            guard.apply(environment.augmentation());
        }
        Ok(environment)
    }

    async fn run_guarded(
        &self,
        request: &BuildRequest,
        options: &RunOptions,
        guard: &mut EnvironmentGuard,
    ) -> Result<RunOutcome, FlashError> {
        let environment = self
            .prepare_toolchain(&self.required_tools(options), guard)
            .await?;
        let env = environment.vars();

        let pipeline = BuildPipeline::new(self.config.pipeline_config(), env, self.token);
        if options.build_only {
            let artifacts = pipeline.build(request).await?;
            return Ok(RunOutcome {
                artifacts,
                delivery: None,
                cleaned: Vec::new(),
            });
        }

        let usb_id = self.config.usb_id().map_err(anyhow::Error::from)?;
        check_usb_presence(usb_id, env, self.config.probe_timeout(), self.token).await?;

        let locator = MassStorageDetector::new(self.config.mass_storage_config(), env);
        let programmer = Programmer::new(
            self.config.delivery_config(request.verbose()),
            locator,
            env,
            self.token,
        );
        if let Some(clock) = options.clock {
            programmer.set_clock(clock).await?;
        }

        let artifacts = pipeline.build(request).await?;
        let delivery = programmer
            .deliver(&artifacts.bin, options.force_mass_storage)
            .await?;

        let cleaned = if options.clean {
            tracing::info!("Cleaning up intermediate files...");
            remove_files(&artifacts.paths())
        } else {
            Vec::new()
        };

        Ok(RunOutcome {
            artifacts,
            delivery: Some(delivery),
            cleaned,
        })
    }
}
