//! Build pipeline
//!
//! Runs synthesis, place-and-route and packing in order. Each stage is retried
//! on its own, bounded by its own timeout, and a failed build never leaves
//! partial artifacts behind.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::cancel::CancellationToken;
use super::request::BuildRequest;
use super::retry::{retry, RetryError, RetryPolicy};
use crate::config::defaults;
use crate::error::{BuildError, StageError};
use crate::infra::filesystem::{is_non_empty_file, remove_files};
use crate::infra::process::{self, Invocation, OutputMode, ProcessError};

/// One step of the toolchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Verilog to JSON netlist
    Synthesize,
    /// Netlist to placed and routed ASCII bitstream
    PlaceRoute,
    /// ASCII bitstream to binary
    Pack,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 3] = [Stage::Synthesize, Stage::PlaceRoute, Stage::Pack];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synthesize => write!(f, "Synthesis"),
            Self::PlaceRoute => write!(f, "Place and route"),
            Self::Pack => write!(f, "Bitstream packing"),
        }
    }
}

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Synthesizer executable
    pub synthesizer: String,
    /// Place-and-route executable
    pub place_route: String,
    /// Packer executable
    pub packer: String,
    /// Device flag for place-and-route, without dashes
    pub fpga_device: String,
    /// Package name for place-and-route
    pub fpga_package: String,
    /// Retry budget applied to each stage separately
    pub policy: RetryPolicy,
    /// Synthesis timeout
    pub synthesize_timeout: Duration,
    /// Place-and-route timeout
    pub place_route_timeout: Duration,
    /// Packing timeout
    pub pack_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            synthesizer: defaults::SYNTHESIZER.to_string(),
            place_route: defaults::PLACE_ROUTE.to_string(),
            packer: defaults::PACKER.to_string(),
            fpga_device: defaults::FPGA_DEVICE.to_string(),
            fpga_package: defaults::FPGA_PACKAGE.to_string(),
            policy: RetryPolicy::new(
                defaults::BUILD_ATTEMPTS,
                Duration::from_millis(defaults::BASE_DELAY_MS),
            ),
            synthesize_timeout: Duration::from_secs(defaults::SYNTHESIZE_TIMEOUT_SECS),
            place_route_timeout: Duration::from_secs(defaults::PLACE_ROUTE_TIMEOUT_SECS),
            pack_timeout: Duration::from_secs(defaults::PACK_TIMEOUT_SECS),
        }
    }
}

impl PipelineConfig {
    /// Executables the pipeline needs on `PATH`
    pub fn tools(&self) -> [&str; 3] {
        [&self.synthesizer, &self.place_route, &self.packer]
    }
}

/// A stage ready to run
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// Which stage
    pub stage: Stage,
    /// Command to run
    pub invocation: Invocation,
    /// File the stage must produce
    pub artifact: PathBuf,
}

/// Outputs of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifacts {
    /// Synthesized netlist
    pub json: PathBuf,
    /// Placed and routed design
    pub asc: PathBuf,
    /// Bitstream to deliver
    pub bin: PathBuf,
}

impl BuildArtifacts {
    /// Every artifact path
    pub fn paths(&self) -> [PathBuf; 3] {
        [self.json.clone(), self.asc.clone(), self.bin.clone()]
    }
}

/// Stage commands for `request`, in execution order
pub fn stage_specs(config: &PipelineConfig, request: &BuildRequest) -> [StageSpec; 3] {
    let mode = if request.verbose() {
        OutputMode::Streamed
    } else {
        OutputMode::Captured
    };
    let json = request.json_path();
    let asc = request.asc_path();
    let bin = request.bin_path();

    let sources = request
        .sources()
        .iter()
        .map(|source| quote_script_word(&source.display().to_string()))
        .collect::<Vec<_>>()
        .join(" ");
    let script = format!(
        "read_verilog {sources}; synth_ice40 -json {}",
        quote_script_word(&json.display().to_string())
    );

    [
        StageSpec {
            stage: Stage::Synthesize,
            invocation: Invocation::new(&config.synthesizer, config.synthesize_timeout)
                .args(["-p".to_string(), script])
                .with_mode(mode),
            artifact: json.clone(),
        },
        StageSpec {
            stage: Stage::PlaceRoute,
            invocation: Invocation::new(&config.place_route, config.place_route_timeout)
                .arg(format!("--{}", config.fpga_device))
                .args(["--package", config.fpga_package.as_str(), "--json"])
                .arg(&json)
                .arg("--pcf")
                .arg(request.pin_constraints())
                .arg("--asc")
                .arg(&asc)
                .with_mode(mode),
            artifact: asc.clone(),
        },
        StageSpec {
            stage: Stage::Pack,
            invocation: Invocation::new(&config.packer, config.pack_timeout)
                .arg(&asc)
                .arg(&bin)
                .with_mode(mode),
            artifact: bin,
        },
    ]
}

/// Runs the three stages for one request
#[derive(Debug)]
pub struct BuildPipeline<'a> {
    config: PipelineConfig,
    env: &'a BTreeMap<String, String>,
    token: &'a CancellationToken,
}

impl<'a> BuildPipeline<'a> {
    /// Create a pipeline running tools with exactly `env`
    pub fn new(
        config: PipelineConfig,
        env: &'a BTreeMap<String, String>,
        token: &'a CancellationToken,
    ) -> Self {
        Self { config, env, token }
    }

    /// Pipeline settings
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Build `request`, deleting every artifact of this build on failure
    pub async fn build(&self, request: &BuildRequest) -> Result<BuildArtifacts, BuildError> {
        let result = self.run_stages(request).await;
        if result.is_err() {
            let removed = remove_files(&request.artifacts());
            if !removed.is_empty() {
                tracing::info!("Removed {} partial artifact(s)", removed.len());
            }
        }
        result
    }

    async fn run_stages(&self, request: &BuildRequest) -> Result<BuildArtifacts, BuildError> {
        if self.token.is_requested() {
            return Err(BuildError::Cancelled);
        }

        let out_dir = request.output_dir();
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| BuildError::Io {
                path: out_dir.to_path_buf(),
                error: e.to_string(),
            })?;

        let stale = remove_files(&request.artifacts());
        if !stale.is_empty() {
            tracing::debug!("Removed {} artifact(s) from a previous build", stale.len());
        }

        for spec in stage_specs(&self.config, request) {
            tracing::info!("Running {} with {}...", spec.stage, spec.invocation.program);
            let output = retry(self.config.policy, &spec.stage.to_string(), self.token, |_| {
                run_stage(&spec, self.env, self.token)
            })
            .await
            .map_err(|e| match e {
                RetryError::Cancelled { .. } => BuildError::Cancelled,
                RetryError::Exhausted {
                    attempts, source, ..
                } => BuildError::StageFailed {
                    stage: spec.stage,
                    attempts,
                    source,
                },
            })?;
            tracing::debug!(
                "{} finished in {:.1}s",
                spec.stage,
                output.elapsed.as_secs_f64()
            );
        }

        let missing: Vec<PathBuf> = request
            .artifacts()
            .into_iter()
            .filter(|path| !is_non_empty_file(path))
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::MissingArtifacts { paths: missing });
        }

        tracing::info!("Bitstream ready: {}", request.bin_path().display());
        Ok(BuildArtifacts {
            json: request.json_path(),
            asc: request.asc_path(),
            bin: request.bin_path(),
        })
    }
}

async fn run_stage(
    spec: &StageSpec,
    env: &BTreeMap<String, String>,
    token: &CancellationToken,
) -> Result<process::ToolOutput, StageError> {
    let stage = spec.stage;
    match process::run(&spec.invocation, env, token).await {
        Ok(output) if output.success => Ok(output),
        Ok(output) => {
            if spec.invocation.mode == OutputMode::Captured && !output.output.trim().is_empty() {
                tracing::error!("{stage} output:\n{}", output.output.trim_end());
            }
            Err(StageError::Execution {
                stage,
                code: output.code,
                output: output.output,
            })
        }
        Err(ProcessError::TimedOut { timeout, .. }) => Err(StageError::Timeout { stage, timeout }),
        Err(source) => Err(StageError::Launch { stage, source }),
    }
}

/// Quote a word for a yosys script when it contains whitespace or quotes
fn quote_script_word(word: &str) -> String {
    if word.chars().any(|c| c.is_whitespace() || c == '"' || c == ';') {
        format!("\"{}\"", word.replace('"', "\\\""))
    } else {
        word.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(spec: &StageSpec) -> Vec<String> {
        spec.invocation
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_stage_commands() {
        let request = BuildRequest::new(vec![PathBuf::from("top.v"), PathBuf::from("uart.v")]).unwrap();
        let [synth, pnr, pack] = stage_specs(&PipelineConfig::default(), &request);

        assert_eq!(synth.invocation.program, "yosys");
        assert_eq!(
            args(&synth),
            vec!["-p", "read_verilog top.v uart.v; synth_ice40 -json out/top.json"]
        );
        assert_eq!(
            args(&pnr),
            vec![
                "--lp1k",
                "--package",
                "cm36",
                "--json",
                "out/top.json",
                "--pcf",
                "top.pcf",
                "--asc",
                "out/top.asc"
            ]
        );
        assert_eq!(args(&pack), vec!["out/top.asc", "out/top.bin"]);
        assert_eq!(pack.artifact, PathBuf::from("out/top.bin"));
    }

    #[test]
    fn test_verbose_streams_output() {
        let request = BuildRequest::new(vec![PathBuf::from("top.v")])
            .unwrap()
            .with_verbose(true);
        let specs = stage_specs(&PipelineConfig::default(), &request);
        assert!(specs
            .iter()
            .all(|spec| spec.invocation.mode == OutputMode::Streamed));
    }

    #[test]
    fn test_script_words_with_spaces_are_quoted() {
        assert_eq!(quote_script_word("top.v"), "top.v");
        assert_eq!(quote_script_word("my design/top.v"), "\"my design/top.v\"");
    }

    #[test]
    fn test_stage_order_and_names() {
        assert_eq!(
            Stage::ALL.map(|s| s.to_string()),
            ["Synthesis", "Place and route", "Bitstream packing"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_build_touches_nothing() {
        let temp = tempfile::TempDir::new().unwrap();
        let token = CancellationToken::new();
        token.request();
        let env = BTreeMap::new();
        let request = BuildRequest::new(vec![temp.path().join("top.v")]).unwrap();

        let result = BuildPipeline::new(PipelineConfig::default(), &env, &token)
            .build(&request)
            .await;

        assert!(matches!(result, Err(BuildError::Cancelled)));
        assert!(!request.output_dir().exists());
    }
}
