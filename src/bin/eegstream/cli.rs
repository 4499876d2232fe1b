use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "eegstream",
    version,
    about = "Stream multi-channel EEG samples through sources, transforms and sinks",
    long_about = "Build and run streaming pipelines for multi-channel physiological data.\n\
                  Pipelines are described in JSON (`run`) or assembled from flags (`record`)."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a pipeline described by a JSON file
    Run(RunArgs),
    /// Record a simulated or random source to a file
    Record(RecordArgs),
    /// List known device profiles and their channels
    Profiles(ProfilesArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Pipeline description (JSON)
    #[arg(long, env = "EEGSTREAM_CONFIG")]
    pub config: String,

    /// Stop after this many seconds of wall time (0 = until the sources end)
    #[arg(long, default_value_t = 0.0)]
    pub duration: f64,

    /// Only validate the pipeline description
    #[arg(long, default_value_t = false)]
    pub check: bool,

    /// Print run summaries as JSON on stdout
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Suppress progress messages on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RecordSource {
    /// Smoothed random voltages on the device's electrodes
    Simulated,
    /// Random integers in [-10, 10] on numbered channels
    Random,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum RecordFormat {
    Json,
    Csv,
}

#[derive(Args)]
pub struct RecordArgs {
    /// Destination file
    #[arg(short, long)]
    pub output: String,

    /// Where samples come from
    #[arg(long, value_enum, default_value_t = RecordSource::Simulated)]
    pub source: RecordSource,

    /// Device profile: muse, crown or generic-N
    #[arg(long, default_value = "muse")]
    pub device: String,

    /// Channel count for the random source
    #[arg(long, default_value_t = 2)]
    pub channels: usize,

    /// Sample rate in Hz
    #[arg(long, default_value_t = 256.0)]
    pub sample_rate: f64,

    /// Seconds of data to record (0 = until interrupted)
    #[arg(long, default_value_t = 10.0)]
    pub duration: f64,

    /// Average down to this rate in Hz before writing
    #[arg(long, conflicts_with = "analysis")]
    pub downsample: Option<f64>,

    /// Record band-power analysis results instead of raw samples
    #[arg(long, default_value_t = false)]
    pub analysis: bool,

    /// Analysis window length in seconds
    #[arg(long, default_value_t = 5)]
    pub window_seconds: usize,

    /// Output format (default: from the file extension)
    #[arg(long, value_enum)]
    pub format: Option<RecordFormat>,

    /// Append to an existing file instead of refusing to overwrite it
    #[arg(long, default_value_t = false)]
    pub append: bool,

    /// Seed for reproducible recordings
    #[arg(long)]
    pub seed: Option<u64>,

    /// Suppress progress messages on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct ProfilesArgs {
    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
