//! Output formatting
//!
//! User-facing messages on stdout and error reports on stderr. Diagnostics go
//! through `tracing` instead.

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";

    /// Info prefix (blue circle)
    pub const INFO: &str = "ℹ";
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {message}", status::SUCCESS);
}

/// Print an informational message
pub fn print_info(message: &str) {
    println!("{} {message}", status::INFO);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {message}", status::WARNING);
}

/// Print an indented detail line
pub fn print_detail(message: &str) {
    println!("    {message}");
}

/// Print an error and its cause chain to stderr
pub fn display_error(error: &anyhow::Error) {
    eprintln!("{} {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("    caused by: {cause}");
    }
}
