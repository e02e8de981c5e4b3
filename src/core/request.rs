//! Build request
//!
//! Describes one design to build: its Verilog sources, pin constraints and
//! where the artifacts go. Names and output locations are derived from the
//! first source file unless overridden.

use std::path::{Path, PathBuf};

use crate::error::ValidationError;

/// Directory, next to the first source, that receives the artifacts
pub const OUTPUT_DIR_NAME: &str = "out";

/// Source file extension
pub const SOURCE_EXTENSION: &str = "v";

/// Pin constraint file extension
pub const CONSTRAINT_EXTENSION: &str = "pcf";

/// A fully resolved build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    sources: Vec<PathBuf>,
    pin_constraints: PathBuf,
    base_name: String,
    output_dir: PathBuf,
    verbose: bool,
}

impl BuildRequest {
    /// Derive a request from `sources`, the first of which names the design
    pub fn new(sources: Vec<PathBuf>) -> Result<Self, ValidationError> {
        let first = sources.first().ok_or(ValidationError::NoSources)?;
        let base_name = first
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| ValidationError::NoBaseName {
                path: first.clone(),
            })?;
        let pin_constraints = first.with_extension(CONSTRAINT_EXTENSION);
        let output_dir = first
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(OUTPUT_DIR_NAME);

        Ok(Self {
            sources,
            pin_constraints,
            base_name,
            output_dir,
            verbose: false,
        })
    }

    /// Use an explicit pin constraint file
    #[must_use]
    pub fn with_pin_constraints(mut self, path: impl Into<PathBuf>) -> Self {
        self.pin_constraints = path.into();
        self
    }

    /// Use an explicit design name for the artifacts
    #[must_use]
    pub fn with_base_name(mut self, name: impl Into<String>) -> Self {
        self.base_name = name.into();
        self
    }

    /// Write artifacts into `dir`
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Stream tool output live
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Check that every input exists and carries the right extension
    pub fn validate(&self) -> Result<(), ValidationError> {
        for source in &self.sources {
            check_input(source, SOURCE_EXTENSION)?;
        }
        check_input(&self.pin_constraints, CONSTRAINT_EXTENSION)
    }

    /// Verilog sources, in order
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Pin constraint file
    pub fn pin_constraints(&self) -> &Path {
        &self.pin_constraints
    }

    /// Design name used for artifact files
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Artifact directory
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Whether tool output is streamed
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Synthesized netlist
    pub fn json_path(&self) -> PathBuf {
        self.artifact("json")
    }

    /// Placed and routed design
    pub fn asc_path(&self) -> PathBuf {
        self.artifact("asc")
    }

    /// Packed bitstream
    pub fn bin_path(&self) -> PathBuf {
        self.artifact("bin")
    }

    /// All three artifact paths in stage order
    pub fn artifacts(&self) -> [PathBuf; 3] {
        [self.json_path(), self.asc_path(), self.bin_path()]
    }

    fn artifact(&self, extension: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{extension}", self.base_name))
    }
}

/// Split comma-separated arguments into individual source paths
pub fn split_sources<S: AsRef<str>>(args: &[S]) -> Vec<PathBuf> {
    args.iter()
        .flat_map(|arg| arg.as_ref().split(','))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn check_input(path: &Path, expected: &'static str) -> Result<(), ValidationError> {
    if !path.is_file() {
        return Err(ValidationError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let matches = path
        .extension()
        .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case(expected));
    if !matches {
        return Err(ValidationError::WrongExtension {
            path: path.to_path_buf(),
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::generators::{design_name, relative_dir};
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_derives_names_from_first_source() {
        let request = BuildRequest::new(vec![PathBuf::from("top.v")]).unwrap();

        assert_eq!(request.pin_constraints(), Path::new("top.pcf"));
        assert_eq!(request.base_name(), "top");
        assert_eq!(request.json_path(), PathBuf::from("out/top.json"));
        assert_eq!(request.asc_path(), PathBuf::from("out/top.asc"));
        assert_eq!(request.bin_path(), PathBuf::from("out/top.bin"));
    }

    #[test]
    fn test_output_dir_sits_next_to_first_source() {
        let request = BuildRequest::new(vec![
            PathBuf::from("rtl/blink.v"),
            PathBuf::from("lib/uart.v"),
        ])
        .unwrap();

        assert_eq!(request.output_dir(), Path::new("rtl/out"));
        assert_eq!(request.pin_constraints(), Path::new("rtl/blink.pcf"));
    }

    #[test]
    fn test_overrides_win() {
        let request = BuildRequest::new(vec![PathBuf::from("top.v")])
            .unwrap()
            .with_pin_constraints("board.pcf")
            .with_base_name("blinky")
            .with_output_dir("/tmp/build");

        assert_eq!(request.pin_constraints(), Path::new("board.pcf"));
        assert_eq!(request.bin_path(), PathBuf::from("/tmp/build/blinky.bin"));
    }

    #[test]
    fn test_empty_sources_rejected() {
        assert_eq!(BuildRequest::new(Vec::new()), Err(ValidationError::NoSources));
    }

    #[test]
    fn test_validate_reports_missing_and_wrong_extension() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("top.v");

        let request = BuildRequest::new(vec![source.clone()]).unwrap();
        assert_eq!(
            request.validate(),
            Err(ValidationError::FileNotFound {
                path: source.clone()
            })
        );

        std::fs::write(&source, "module top; endmodule\n").unwrap();
        let wrong = temp.path().join("top.txt");
        std::fs::write(&wrong, "").unwrap();
        let request = request.with_pin_constraints(&wrong);
        assert_eq!(
            request.validate(),
            Err(ValidationError::WrongExtension {
                path: wrong,
                expected: "pcf"
            })
        );
    }

    #[test]
    fn test_validate_accepts_uppercase_extensions() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("TOP.V");
        let pcf = temp.path().join("TOP.PCF");
        std::fs::write(&source, "").unwrap();
        std::fs::write(&pcf, "").unwrap();

        let request = BuildRequest::new(vec![source]).unwrap().with_pin_constraints(pcf);

        assert_eq!(request.validate(), Ok(()));
    }

    #[test]
    fn test_split_sources_handles_commas() {
        let sources = split_sources(&["a.v,b.v", " c.v ", ","]);
        assert_eq!(
            sources,
            vec![
                PathBuf::from("a.v"),
                PathBuf::from("b.v"),
                PathBuf::from("c.v")
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_artifacts_share_design_name(dir in relative_dir(), name in design_name()) {
            let source = PathBuf::from(&dir).join(format!("{name}.v"));
            let request = BuildRequest::new(vec![source]).unwrap();

            let out = PathBuf::from(&dir).join(OUTPUT_DIR_NAME);
            prop_assert_eq!(request.base_name(), name.as_str());
            prop_assert_eq!(request.output_dir(), out.as_path());
            for artifact in request.artifacts() {
                prop_assert_eq!(artifact.parent(), Some(out.as_path()));
                prop_assert_eq!(artifact.file_stem().map(|s| s.to_string_lossy().into_owned()), Some(name.clone()));
            }
        }
    }
}
