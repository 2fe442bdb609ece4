use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Page sharing analysis over memory snapshots
#[derive(Parser, Debug)]
#[command(name = "pageshare", version, about = "pageshare CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Capture snapshots through the kernel producer ("pid:flags" or "*:flags")
    Capture {
        #[arg(required = true)]
        requests: Vec<String>,
        /// Capture rounds (env PGS_SNAPSHOT_COUNT)
        #[arg(short = 'n', long)]
        count: Option<u32>,
        /// Seconds to sleep after each request (env PGS_INTERVAL_SECS)
        #[arg(short = 't', long)]
        interval: Option<u64>,
        /// Save every snapshot as <pid>-<ts hex>.snapshot (env PGS_AUTOSAVE)
        #[arg(short = 's', long)]
        save: bool,
        /// Directory for saved snapshots (env PGS_SNAPSHOT_DIR)
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Print snapshot info as a ';' record (env PGS_CSV)
        #[arg(short = 'c', long)]
        csv: bool,
        /// Producer control file (env PGS_PRODUCER_PATH)
        #[arg(long)]
        producer: Option<PathBuf>,
    },
    /// Show a saved snapshot
    Print {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = PrintWhat::All)]
        what: PrintWhat,
    },
    /// Sharing analysis over snapshots (files or capture requests)
    Analyze {
        #[command(subcommand)]
        op: AnalyzeOp,
        /// Mark heap/stack regions before indexing
        #[arg(long, global = true)]
        mark: bool,
        /// Print results as JSON
        #[arg(long, global = true)]
        json: bool,
    },
    /// Print the column header of the stats record
    StatsHeader,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrintWhat {
    /// Info block, regions and their pages
    All,
    /// Info block only
    Info,
    /// Region lines
    Regions,
    /// Every available page
    Pages,
}

#[derive(Subcommand, Debug)]
pub enum AnalyzeOp {
    /// Add every input to one index; print cumulative stats per input
    Add {
        #[arg(required = true)]
        inputs: Vec<String>,
    },
    /// Test inputs against an index built from the reference
    Test {
        reference: String,
        #[arg(required = true)]
        inputs: Vec<String>,
    },
    /// Index each input separately and merge into the reference index
    Merge {
        reference: String,
        #[arg(required = true)]
        inputs: Vec<String>,
    },
    /// Like merge, without modifying the reference index
    Probe {
        reference: String,
        #[arg(required = true)]
        inputs: Vec<String>,
    },
    /// Digest set difference between two inputs
    Diff { a: String, b: String },
}
