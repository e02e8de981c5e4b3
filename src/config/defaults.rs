//! Default configuration values

/// USB vendor:product identifier of the iCESugar-nano iCELink probe
pub const USB_ID: &str = "1d50:602b";

/// Volume label of the iCELink mass-storage drive
pub const VOLUME_LABEL: &str = "iCELink";

/// Mount point created when the volume has to be mounted by hand
pub const MOUNT_POINT: &str = "/mnt/iCELink";

/// Mount locations desktop automounters commonly use, `*` matches one path component
pub const MOUNT_PATTERNS: &[&str] = &[
    "/media/*/iCELink",
    "/run/media/*/iCELink",
    "/media/iCELink",
    "/mnt/iCELink",
];

/// Device nodes probed for the volume label when the block listing has no match
pub const DEVICE_NODE_CANDIDATES: &[&str] = &[
    "/dev/sda", "/dev/sda1", "/dev/sdb", "/dev/sdb1", "/dev/sdc", "/dev/sdc1", "/dev/sdd",
    "/dev/sdd1",
];

/// Serial device name prefixes scanned under `/dev`, in priority order
pub const SERIAL_PATTERNS: &[&str] = &["/dev/ttyACM*", "/dev/ttyUSB*"];

/// nextpnr device flag (iCE40 LP1K)
pub const FPGA_DEVICE: &str = "lp1k";

/// nextpnr package flag
pub const FPGA_PACKAGE: &str = "cm36";

/// Synthesizer executable
pub const SYNTHESIZER: &str = "yosys";

/// Place-and-route executable
pub const PLACE_ROUTE: &str = "nextpnr-ice40";

/// Bitstream packer executable
pub const PACKER: &str = "icepack";

/// Programmer executable
pub const PROGRAMMER: &str = "icesprog";

/// Activation script of the OSS CAD Suite, relative to the home directory
pub const ACTIVATION_SCRIPT: &str = "oss-cad-suite/environment";

/// Maximum attempts per build stage
pub const BUILD_ATTEMPTS: u32 = 3;

/// Maximum direct-write attempts
pub const DIRECT_WRITE_ATTEMPTS: u32 = 3;

/// Maximum mass-storage copy attempts
pub const MASS_STORAGE_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
pub const BASE_DELAY_MS: u64 = 1000;

/// Synthesis timeout (in seconds)
pub const SYNTHESIZE_TIMEOUT_SECS: u64 = 300;

/// Place-and-route timeout (in seconds)
pub const PLACE_ROUTE_TIMEOUT_SECS: u64 = 600;

/// Packing timeout (in seconds)
pub const PACK_TIMEOUT_SECS: u64 = 120;

/// Programmer tool timeout (in seconds)
pub const PROGRAMMER_TIMEOUT_SECS: u64 = 60;

/// Timeout for short host utilities like `lsusb`, `lsblk`, `blkid` (in seconds)
pub const PROBE_TIMEOUT_SECS: u64 = 10;

/// `mount` timeout (in seconds)
pub const MOUNT_TIMEOUT_SECS: u64 = 30;

/// `sync` timeout (in seconds)
pub const SYNC_TIMEOUT_SECS: u64 = 30;

/// Activation script timeout (in seconds)
pub const ACTIVATION_TIMEOUT_SECS: u64 = 30;

/// Wait after copying to the mass-storage drive (in milliseconds)
pub const SETTLE_DELAY_MS: u64 = 5000;

/// Maximum number of lines kept in the run log
pub const LOG_MAX_LINES: usize = 5000;

/// Run log file name inside the data directory
pub const LOG_FILE_NAME: &str = "icesugar-flash.log";

/// Substrings that mark tool output worth echoing prominently when streaming
pub const PROGRESS_KEYWORDS: &[&str] = &[
    "Executing",
    "Printing statistics",
    "Device utilisation",
    "Max frequency",
    "Placing",
    "Routing",
    "Program finished",
    "ERROR",
    "Warning",
];
