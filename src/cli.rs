//! Command-line interface definitions.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::model::{OutputFormat, Preset, QualityTier, Resolution};
use crate::config::Settings;

/// Batch media conversion queue driven by FFmpeg.
#[derive(Parser, Debug)]
#[command(name = "convert-queue", version, about, long_about = None)]
pub struct Cli {
    /// Directory holding settings, the queue snapshot and the history log.
    #[arg(long, env = "CONVERT_QUEUE_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Returns the log level based on verbosity flags.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Queue files or folders, convert everything pending and wait for the queue to drain.
    Run(RunArgs),

    /// Queue files or folders for a later run without converting.
    Add(AddArgs),

    /// List the jobs saved in the queue snapshot.
    #[command(name = "queue-list")]
    QueueList,

    /// Remove every saved job.
    #[command(name = "queue-clear")]
    QueueClear,

    /// Display the current settings.
    #[command(name = "config-show")]
    ConfigShow,

    /// Check the settings against this machine.
    #[command(name = "config-validate")]
    ConfigValidate,

    /// Change one setting and save it.
    #[command(name = "config-set")]
    ConfigSet {
        /// Setting name, e.g. max_concurrency.
        key: String,
        /// New value.
        value: String,
    },

    /// Show the FFmpeg binary and hardware encoders in use.
    Encoders,

    /// Print the end of the history log.
    History {
        /// Number of lines.
        #[arg(short = 'n', long, default_value_t = 20)]
        lines: usize,
    },
}

/// Arguments for the run subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Files or folders to add before starting.
    pub paths: Vec<PathBuf>,

    /// Parallel conversions (1-6); saved to settings.
    #[arg(short = 'j', long)]
    pub concurrency: Option<i64>,

    #[command(flatten)]
    pub options: JobOverrides,
}

/// Arguments for the add subcommand.
#[derive(Args, Debug)]
pub struct AddArgs {
    /// Files or folders to add.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub options: JobOverrides,
}

/// Per-invocation changes to the options new jobs receive.
#[derive(Args, Debug, Default, Clone)]
pub struct JobOverrides {
    /// Start from a named preset, e.g. "social-burst".
    #[arg(long)]
    pub preset: Option<Preset>,

    /// Output container, e.g. mp4, mkv, flac.
    #[arg(short, long)]
    pub format: Option<OutputFormat>,

    /// Target resolution, e.g. 1080p or 1280x720.
    #[arg(short, long)]
    pub resolution: Option<Resolution>,

    /// Quality tier: high, medium, low or custom.
    #[arg(short, long)]
    pub quality: Option<QualityTier>,

    /// Bitrate in kbps; implies custom quality.
    #[arg(long)]
    pub bitrate: Option<String>,

    /// Drop the audio track.
    #[arg(long)]
    pub mute: bool,

    /// Drop the video track.
    #[arg(long)]
    pub audio_only: bool,

    /// Audio file mixed over the source audio.
    #[arg(long)]
    pub overlay: Option<PathBuf>,

    /// Directory for converted files.
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Use the detected hardware encoder.
    #[arg(long)]
    pub gpu: bool,
}

impl JobOverrides {
    /// Settings used as the template for jobs added by this invocation.
    pub fn apply(&self, base: &Settings) -> Settings {
        let mut settings = base.clone();
        if let Some(preset) = self.preset {
            preset.apply(&mut settings);
        }
        if let Some(format) = self.format {
            settings.default_format = format;
        }
        if let Some(resolution) = self.resolution {
            settings.default_resolution = resolution;
        }
        if let Some(quality) = self.quality {
            settings.default_quality = quality;
        }
        if let Some(bitrate) = &self.bitrate {
            settings.default_quality = QualityTier::Custom;
            settings.custom_bitrate = bitrate.clone();
        }
        if let Some(dir) = &self.output_dir {
            settings.output_dir = dir.clone();
        }
        settings.mute_audio |= self.mute;
        settings.audio_only |= self.audio_only;
        settings.use_gpu |= self.gpu;
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_loose_option_values() {
        let cli = Cli::try_parse_from([
            "convert-queue",
            "-vv",
            "run",
            "clip.mov",
            "-f",
            "mkv",
            "-r",
            "720p",
            "--bitrate",
            "2500k",
            "-j",
            "4",
        ])
        .unwrap();
        assert_eq!(cli.log_level(), "trace");

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.paths, vec![PathBuf::from("clip.mov")]);
        assert_eq!(args.concurrency, Some(4));

        let settings = args.options.apply(&Settings::default());
        assert_eq!(settings.default_format, OutputFormat::Mkv);
        assert_eq!(settings.default_resolution, Resolution::Hd720);
        assert_eq!(settings.default_quality, QualityTier::Custom);
        assert_eq!(settings.custom_bitrate, "2500k");
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = Cli::try_parse_from(["convert-queue", "add", "a.mov", "-f", "mpk"]).unwrap_err();
        assert!(err.to_string().contains("did you mean"), "{err}");
    }

    #[test]
    fn explicit_options_win_over_preset() {
        let overrides = JobOverrides {
            preset: Some(Preset::SocialBurst),
            quality: Some(QualityTier::High),
            ..JobOverrides::default()
        };
        let settings = overrides.apply(&Settings::default());
        assert_eq!(settings.default_resolution, Resolution::Sd480);
        assert_eq!(settings.default_quality, QualityTier::High);
    }
}
