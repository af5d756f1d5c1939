//! Settings data structures and the conversion option vocabulary.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;

/// Lowest accepted parallel conversion limit.
pub const MIN_CONCURRENCY: usize = 1;

/// Highest accepted parallel conversion limit.
pub const MAX_CONCURRENCY: usize = 6;

/// Limit used when the stored value is missing or not positive.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Bitrate (kbps) applied to custom quality jobs that carry none.
pub const DEFAULT_CUSTOM_BITRATE: &str = "5000";

/// Persisted user settings.
///
/// Every field has a serde default so older or partial files still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Container/format used for newly added files.
    #[serde(default)]
    pub default_format: OutputFormat,

    /// Resolution used for newly added files.
    #[serde(default)]
    pub default_resolution: Resolution,

    /// Quality tier used for newly added files.
    #[serde(default)]
    pub default_quality: QualityTier,

    /// Last applied preset.
    #[serde(default)]
    pub preset: Preset,

    /// Bitrate in kbps for custom quality.
    #[serde(default = "default_custom_bitrate")]
    pub custom_bitrate: String,

    /// Strip the audio track.
    #[serde(default)]
    pub mute_audio: bool,

    /// Produce an audio-only output.
    #[serde(default)]
    pub audio_only: bool,

    /// Use the detected hardware encoder when the format allows it.
    #[serde(default)]
    pub use_gpu: bool,

    /// Power off the machine once the queue drains with at least one success.
    #[serde(default)]
    pub auto_shutdown: bool,

    /// Directory that receives converted files.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum number of parallel conversions.
    #[serde(
        default = "default_concurrency",
        deserialize_with = "deserialize_concurrency"
    )]
    pub max_concurrency: usize,

    /// Whether processing was active at last close; restored jobs start automatically.
    #[serde(default)]
    pub auto_resume: bool,

    /// Retries granted to a job after its first failed attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Optional wall-clock limit for a single conversion attempt.
    #[serde(default)]
    pub conversion_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_format: OutputFormat::default(),
            default_resolution: Resolution::default(),
            default_quality: QualityTier::default(),
            preset: Preset::default(),
            custom_bitrate: default_custom_bitrate(),
            mute_audio: false,
            audio_only: false,
            use_gpu: false,
            auto_shutdown: false,
            output_dir: default_output_dir(),
            max_concurrency: default_concurrency(),
            auto_resume: false,
            max_retries: default_max_retries(),
            conversion_timeout_secs: None,
        }
    }
}

impl Settings {
    /// Clamps the concurrency limit and normalizes the custom bitrate.
    pub fn normalized(mut self) -> Self {
        self.max_concurrency = clamp_concurrency(self.max_concurrency as i64);
        self.custom_bitrate =
            normalize_bitrate(&self.custom_bitrate).unwrap_or_else(default_custom_bitrate);
        self
    }

    /// Names accepted by [`Settings::set`].
    pub const KEYS: [&'static str; 13] = [
        "default_format",
        "default_resolution",
        "default_quality",
        "preset",
        "custom_bitrate",
        "mute_audio",
        "audio_only",
        "use_gpu",
        "auto_shutdown",
        "output_dir",
        "max_concurrency",
        "max_retries",
        "conversion_timeout_secs",
    ];

    /// Sets one field from its textual form, as typed on the command line.
    ///
    /// `conversion_timeout_secs` accepts `none` to remove the limit. Choosing
    /// a preset rewrites format, resolution, quality and audio-only.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "default_format" => self.default_format = value.parse()?,
            "default_resolution" => self.default_resolution = value.parse()?,
            "default_quality" => self.default_quality = value.parse()?,
            "preset" => value.parse::<Preset>()?.apply(self),
            "custom_bitrate" => {
                self.custom_bitrate =
                    normalize_bitrate(value).ok_or_else(|| ConfigError::InvalidValue {
                        field: "custom_bitrate",
                        value: value.to_string(),
                        hint: " (expected kbps, e.g. 5000)".to_string(),
                    })?;
            }
            "mute_audio" => self.mute_audio = parse_flag("mute_audio", value)?,
            "audio_only" => self.audio_only = parse_flag("audio_only", value)?,
            "use_gpu" => self.use_gpu = parse_flag("use_gpu", value)?,
            "auto_shutdown" => self.auto_shutdown = parse_flag("auto_shutdown", value)?,
            "output_dir" => self.output_dir = PathBuf::from(value),
            "max_concurrency" => {
                self.max_concurrency = clamp_concurrency(parse_number("max_concurrency", value)?);
            }
            "max_retries" => {
                self.max_retries = u32::try_from(parse_number("max_retries", value)?)
                    .map_err(|_| invalid_number("max_retries", value))?;
            }
            "conversion_timeout_secs" => {
                self.conversion_timeout_secs = match value.to_ascii_lowercase().as_str() {
                    "none" | "off" | "" => None,
                    _ => Some(
                        u64::try_from(parse_number("conversion_timeout_secs", value)?)
                            .map_err(|_| invalid_number("conversion_timeout_secs", value))?,
                    ),
                };
            }
            _ => {
                let choices: Vec<_> = Self::KEYS.iter().map(|k| (*k, *k)).collect();
                let canonical = parse_choice("setting name", key, &choices)?;
                return self.set(canonical, value);
            }
        }
        Ok(())
    }
}

fn default_custom_bitrate() -> String {
    DEFAULT_CUSTOM_BITRATE.to_string()
}

fn default_output_dir() -> PathBuf {
    dirs::video_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_max_retries() -> u32 {
    2
}

fn deserialize_concurrency<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    Ok(clamp_concurrency(raw))
}

/// Maps a requested parallel limit onto the supported range.
///
/// Non-positive values fall back to [`DEFAULT_CONCURRENCY`].
pub fn clamp_concurrency(requested: i64) -> usize {
    if requested <= 0 {
        return DEFAULT_CONCURRENCY;
    }
    (requested as usize).clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

/// Keeps only the digits of a bitrate and accepts it if it is a positive integer.
pub fn normalize_bitrate(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.parse::<u32>() {
        Ok(value) if value > 0 => Some(value.to_string()),
        _ => None,
    }
}

/// Output container or audio format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Avi,
    Mkv,
    Mov,
    Wmv,
    Flv,
    Webm,
    Mp3,
    Aac,
    Wav,
    Flac,
    Ogg,
}

impl OutputFormat {
    /// Every supported format, video formats first.
    pub const ALL: [OutputFormat; 12] = [
        OutputFormat::Mp4,
        OutputFormat::Avi,
        OutputFormat::Mkv,
        OutputFormat::Mov,
        OutputFormat::Wmv,
        OutputFormat::Flv,
        OutputFormat::Webm,
        OutputFormat::Mp3,
        OutputFormat::Aac,
        OutputFormat::Wav,
        OutputFormat::Flac,
        OutputFormat::Ogg,
    ];

    /// Display label, e.g. `MKV`.
    pub fn label(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "MP4",
            OutputFormat::Avi => "AVI",
            OutputFormat::Mkv => "MKV",
            OutputFormat::Mov => "MOV",
            OutputFormat::Wmv => "WMV",
            OutputFormat::Flv => "FLV",
            OutputFormat::Webm => "WEBM",
            OutputFormat::Mp3 => "MP3",
            OutputFormat::Aac => "AAC",
            OutputFormat::Wav => "WAV",
            OutputFormat::Flac => "FLAC",
            OutputFormat::Ogg => "OGG",
        }
    }

    /// Lowercase file extension.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Avi => "avi",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Mov => "mov",
            OutputFormat::Wmv => "wmv",
            OutputFormat::Flv => "flv",
            OutputFormat::Webm => "webm",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Aac => "aac",
            OutputFormat::Wav => "wav",
            OutputFormat::Flac => "flac",
            OutputFormat::Ogg => "ogg",
        }
    }

    /// True for formats that carry no video stream.
    pub fn is_audio(self) -> bool {
        matches!(
            self,
            OutputFormat::Mp3
                | OutputFormat::Aac
                | OutputFormat::Wav
                | OutputFormat::Flac
                | OutputFormat::Ogg
        )
    }

    /// Formats the hardware encoders can target.
    pub fn supports_gpu(self) -> bool {
        matches!(
            self,
            OutputFormat::Mp4
                | OutputFormat::Mkv
                | OutputFormat::Mov
                | OutputFormat::Avi
                | OutputFormat::Wmv
                | OutputFormat::Flv
        )
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let choices: Vec<_> = Self::ALL.iter().map(|f| (f.label(), *f)).collect();
        parse_choice("format", s, &choices)
    }
}

/// Target frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "original")]
    Original,
    #[serde(rename = "3840x2160")]
    Uhd2160,
    #[serde(rename = "2560x1440")]
    Qhd1440,
    #[serde(rename = "1920x1080")]
    Fhd1080,
    #[serde(rename = "1280x720")]
    Hd720,
    #[serde(rename = "854x480")]
    Sd480,
    #[serde(rename = "640x360")]
    Low360,
}

impl Resolution {
    /// Every supported resolution, largest first after `Original`.
    pub const ALL: [Resolution; 7] = [
        Resolution::Original,
        Resolution::Uhd2160,
        Resolution::Qhd1440,
        Resolution::Fhd1080,
        Resolution::Hd720,
        Resolution::Sd480,
        Resolution::Low360,
    ];

    /// Width and height, or `None` to keep the source size.
    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            Resolution::Original => None,
            Resolution::Uhd2160 => Some((3840, 2160)),
            Resolution::Qhd1440 => Some((2560, 1440)),
            Resolution::Fhd1080 => Some((1920, 1080)),
            Resolution::Hd720 => Some((1280, 720)),
            Resolution::Sd480 => Some((854, 480)),
            Resolution::Low360 => Some((640, 360)),
        }
    }

    /// Short name accepted on the command line.
    pub fn short_name(self) -> &'static str {
        match self {
            Resolution::Original => "original",
            Resolution::Uhd2160 => "4k",
            Resolution::Qhd1440 => "2k",
            Resolution::Fhd1080 => "1080p",
            Resolution::Hd720 => "720p",
            Resolution::Sd480 => "480p",
            Resolution::Low360 => "360p",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dimensions() {
            None => f.write_str("Original"),
            Some((w, h)) => {
                let tag = match self {
                    Resolution::Uhd2160 => "4K",
                    Resolution::Qhd1440 => "2K",
                    other => other.short_name(),
                };
                write!(f, "{w}x{h} ({tag})")
            }
        }
    }
}

impl FromStr for Resolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dims: Vec<String> = Self::ALL
            .iter()
            .map(|r| match r.dimensions() {
                Some((w, h)) => format!("{w}x{h}"),
                None => "original".to_string(),
            })
            .collect();
        let mut choices: Vec<(&str, Resolution)> =
            Self::ALL.iter().map(|r| (r.short_name(), *r)).collect();
        choices.extend(dims.iter().map(String::as_str).zip(Self::ALL));
        parse_choice("resolution", s, &choices)
    }
}

/// Encoding quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    #[default]
    High,
    Medium,
    Low,
    /// Fixed bitrate taken from the job's custom bitrate.
    Custom,
}

impl QualityTier {
    /// Constant-quality value shared by the x264, NVENC, QSV and AMF mappings.
    pub fn constant_quality(self) -> u8 {
        match self {
            QualityTier::High => 18,
            QualityTier::Medium | QualityTier::Custom => 23,
            QualityTier::Low => 28,
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QualityTier::High => "High (Original)",
            QualityTier::Medium => "Medium (Balanced)",
            QualityTier::Low => "Low (Compressed)",
            QualityTier::Custom => "Custom Bitrate",
        })
    }
}

impl FromStr for QualityTier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_choice(
            "quality",
            s,
            &[
                ("high", QualityTier::High),
                ("medium", QualityTier::Medium),
                ("low", QualityTier::Low),
                ("custom", QualityTier::Custom),
            ],
        )
    }
}

/// Named bundles of format, resolution and quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// MKV, 4K, high quality.
    #[default]
    CinematicHdr,
    /// MP4, 720p, medium quality.
    MobileLightning,
    /// MOV, 1080p, high quality.
    ArchiveMaster,
    /// MP4, 480p, low quality.
    SocialBurst,
    /// Lossless FLAC audio.
    AudioDiamond,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::CinematicHdr,
        Preset::MobileLightning,
        Preset::ArchiveMaster,
        Preset::SocialBurst,
        Preset::AudioDiamond,
    ];

    /// Human-readable preset name.
    pub fn label(self) -> &'static str {
        match self {
            Preset::CinematicHdr => "Cinematic HDR",
            Preset::MobileLightning => "Mobile Lightning",
            Preset::ArchiveMaster => "Archive Master",
            Preset::SocialBurst => "Social Burst",
            Preset::AudioDiamond => "Audio Diamond",
        }
    }

    /// Rewrites the default job options in `settings` to this preset.
    pub fn apply(self, settings: &mut Settings) {
        settings.preset = self;
        let (format, resolution, quality, audio_only) = match self {
            Preset::CinematicHdr => (OutputFormat::Mkv, Resolution::Uhd2160, QualityTier::High, false),
            Preset::MobileLightning => (OutputFormat::Mp4, Resolution::Hd720, QualityTier::Medium, false),
            Preset::ArchiveMaster => (OutputFormat::Mov, Resolution::Fhd1080, QualityTier::High, false),
            Preset::SocialBurst => (OutputFormat::Mp4, Resolution::Sd480, QualityTier::Low, false),
            Preset::AudioDiamond => (OutputFormat::Flac, settings.default_resolution, settings.default_quality, true),
        };
        settings.default_format = format;
        settings.default_resolution = resolution;
        settings.default_quality = quality;
        settings.audio_only = audio_only;
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let choices: Vec<_> = Self::ALL.iter().map(|p| (p.label(), *p)).collect();
        parse_choice("preset", s, &choices)
    }
}

/// Lowercases and drops punctuation so `Cinematic-HDR` matches `Cinematic HDR`.
fn choice_key(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Matches `input` against named choices, suggesting the closest name on failure.
fn parse_choice<T: Copy>(
    field: &'static str,
    input: &str,
    choices: &[(&str, T)],
) -> Result<T, ConfigError> {
    let key = choice_key(input);
    if let Some((_, value)) = choices.iter().find(|(name, _)| choice_key(name) == key) {
        return Ok(*value);
    }

    let hint = choices
        .iter()
        .min_by_key(|(name, _)| strsim::levenshtein(&key, &choice_key(name)))
        .filter(|(name, _)| strsim::levenshtein(&key, &choice_key(name)) <= 2)
        .map(|(name, _)| format!(" (did you mean '{name}'?)"))
        .unwrap_or_default();

    Err(ConfigError::InvalidValue {
        field,
        value: input.to_string(),
        hint,
    })
}

fn parse_flag(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field,
            value: value.to_string(),
            hint: " (expected true or false)".to_string(),
        }),
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<i64, ConfigError> {
    value.trim().parse().map_err(|_| invalid_number(field, value))
}

fn invalid_number(field: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        value: value.to_string(),
        hint: " (expected a whole number)".to_string(),
    }
}
