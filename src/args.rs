//! Command-line argument parsing for the trainwatch binary
//!
//! Provides the shared argument structure so every subcommand resolves the
//! store and training root the same way.

use std::path::PathBuf;

use clap::Parser;

/// Common command-line arguments shared by all subcommands
///
/// Use `#[command(flatten)]` in subcommand argument structs to include these
/// fields.
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to the metrics database
    #[arg(long, default_value = "trainwatch.db", env = "TRAINWATCH_DB")]
    pub db: PathBuf,

    /// Training output root holding one directory per job
    #[arg(
        long = "training-root",
        default_value = "output",
        env = "TRAINWATCH_ROOT"
    )]
    pub training_root: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        common: CommonArgs,
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::parse_from(["trainwatch"]);
        assert_eq!(cli.common.db, PathBuf::from("trainwatch.db"));
        assert_eq!(cli.common.training_root, PathBuf::from("output"));
    }

    #[test]
    fn test_overrides() {
        let cli = TestCli::parse_from([
            "trainwatch",
            "--db",
            "/data/metrics.db",
            "--training-root",
            "/data/jobs",
        ]);
        assert_eq!(cli.common.db, PathBuf::from("/data/metrics.db"));
        assert_eq!(cli.common.training_root, PathBuf::from("/data/jobs"));
    }
}
