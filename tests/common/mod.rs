//! Common test utilities and helpers
//!
//! Temporary projects with a small Verilog design and fake toolchain scripts
//! standing in for yosys, nextpnr-ice40, icepack and icesprog.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Minimal design used by every test
pub const SAMPLE_VERILOG: &str = r"module top(input clk, output led);
  reg [23:0] counter;
  always @(posedge clk) counter <= counter + 1;
  assign led = counter[23];
endmodule
";

/// Pin constraints for [`SAMPLE_VERILOG`]
pub const SAMPLE_PCF: &str = "set_io clk 35\nset_io led 11\n";

/// Fake synthesizer: writes the netlist named after `-json` in the script
pub const FAKE_YOSYS: &str = r#"#!/bin/sh
script="$2"
json="${script##*-json }"
echo "2. Executing SYNTH_ICE40 pass."
printf '{"modules":{}}\n' > "$json"
"#;

/// Fake place-and-route: writes the file named by `--asc`
pub const FAKE_NEXTPNR: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  if [ "$1" = "--asc" ]; then asc="$2"; fi
  shift
done
echo "Info: Max frequency for clock 'clk': 120.00 MHz"
echo ".device 1k" > "$asc"
"#;

/// Fake packer: writes its second argument
pub const FAKE_ICEPACK: &str = r#"#!/bin/sh
printf 'BITSTREAM' > "$2"
"#;

/// Test project context
///
/// Creates a temporary directory with a design and provides helpers for
/// writing fake tools into its `bin/` directory.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Create a project holding `top.v` and `top.pcf`
    pub fn with_design() -> Self {
        let project = Self::new();
        project.create_file("top.v", SAMPLE_VERILOG);
        project.create_file("top.pcf", SAMPLE_PCF);
        project
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Absolute path of `name` inside the project
    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Create a directory in the test project
    pub fn create_dir(&self, name: &str) -> PathBuf {
        let path = self.join(name);
        std::fs::create_dir_all(&path).expect("Failed to create directory");
        path
    }

    /// Check if a file exists in the test project
    pub fn file_exists(&self, name: &str) -> bool {
        self.join(name).exists()
    }

    /// Read a file from the test project
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.join(name)).expect("Failed to read file")
    }

    /// Directory holding fake tools
    pub fn bin_dir(&self) -> PathBuf {
        self.create_dir("bin")
    }

    /// Write an executable script into `bin/` and return its path.
    /// Every script appends its arguments to `bin/<name>.calls`.
    pub fn write_tool(&self, name: &str, body: &str) -> PathBuf {
        let path = self.bin_dir().join(name);
        let calls = self.bin_dir().join(format!("{name}.calls"));
        let (shebang, rest) = body.split_once('\n').unwrap_or((body, ""));
        let script = format!("{shebang}\necho \"$*\" >> '{}'\n{rest}", calls.display());
        std::fs::write(&path, script).expect("Failed to write tool script");
        make_executable(&path);
        path
    }

    /// Write a tool that fails its first `failures` invocations, then runs `body`
    pub fn write_flaky_tool(&self, name: &str, failures: u32, body: &str) -> PathBuf {
        let counter = self.bin_dir().join(format!("{name}.count"));
        let (_, rest) = body.split_once('\n').unwrap_or(("", body));
        let script = format!(
            "#!/bin/sh\n\
             n=$(cat '{counter}' 2>/dev/null || echo 0)\n\
             n=$((n + 1))\n\
             echo $n > '{counter}'\n\
             if [ $n -le {failures} ]; then echo \"ERROR: transient failure $n\" >&2; exit 1; fi\n\
             {rest}",
            counter = counter.display(),
        );
        self.write_tool(name, &script)
    }

    /// Write the three fake build tools
    pub fn write_fake_toolchain(&self) -> FakeToolchain {
        FakeToolchain {
            yosys: self.write_tool("yosys", FAKE_YOSYS),
            nextpnr: self.write_tool("nextpnr-ice40", FAKE_NEXTPNR),
            icepack: self.write_tool("icepack", FAKE_ICEPACK),
        }
    }

    /// How many times the tool `name` in `bin/` ran
    pub fn calls(&self, name: &str) -> Vec<String> {
        std::fs::read_to_string(self.bin_dir().join(format!("{name}.calls")))
            .map(|content| content.lines().map(String::from).collect())
            .unwrap_or_default()
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Paths of the fake build tools
pub struct FakeToolchain {
    pub yosys: PathBuf,
    pub nextpnr: PathBuf,
    pub icepack: PathBuf,
}

impl FakeToolchain {
    /// `config.toml` pointing at these tools, with instant retries
    pub fn config_toml(&self, programmer: &Path) -> String {
        format!(
            r#"
[retry.build]
max_attempts = 3
base_delay_ms = 1

[retry.direct_write]
max_attempts = 2
base_delay_ms = 1

[retry.mass_storage]
max_attempts = 1
base_delay_ms = 1

[device]
settle_delay_ms = 0

[toolchain]
activation_script = "/nonexistent/oss-cad-suite/environment"
synthesizer = "{}"
place_route = "{}"
packer = "{}"
programmer = "{}"
"#,
            self.yosys.display(),
            self.nextpnr.display(),
            self.icepack.display(),
            programmer.display()
        )
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to make script executable");
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) {}
