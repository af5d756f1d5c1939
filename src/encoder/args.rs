//! FFmpeg argument construction for a conversion job.

use crate::config::model::{OutputFormat, QualityTier};
use crate::queue::job::{Job, JobOptions};

/// Hardware encoder vendor family, derived from the FFmpeg encoder name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareFamily {
    /// NVIDIA NVENC (`*_nvenc`).
    Nvenc,
    /// Intel Quick Sync (`*_qsv`).
    Qsv,
    /// AMD AMF (`*_amf`).
    Amf,
}

impl HardwareFamily {
    /// Classifies an encoder name such as `hevc_qsv`.
    pub fn from_encoder(encoder: &str) -> Option<Self> {
        if encoder.contains("nvenc") {
            Some(HardwareFamily::Nvenc)
        } else if encoder.contains("qsv") {
            Some(HardwareFamily::Qsv)
        } else if encoder.contains("amf") {
            Some(HardwareFamily::Amf)
        } else {
            None
        }
    }

    /// Value for FFmpeg's `-hwaccel` input option.
    pub fn hwaccel(self) -> &'static str {
        match self {
            HardwareFamily::Nvenc => "cuda",
            HardwareFamily::Qsv => "qsv",
            HardwareFamily::Amf => "d3d11va",
        }
    }
}

/// Builds the complete FFmpeg argument list for `job`, output path last.
pub fn build_invocation(job: &Job) -> Vec<String> {
    let opts = &job.options;
    let mut args = Args::default();

    args.push("-hide_banner");

    let hardware = hardware_encoder(opts);
    if let Some(family) = hardware.and_then(HardwareFamily::from_encoder) {
        args.pair("-hwaccel", family.hwaccel());
    }

    args.pair("-i", job.input_path.display());

    if let Some(overlay) = opts.audio_overlay.as_ref().filter(|p| p.is_file()) {
        args.pair("-i", overlay.display());
        args.pair("-filter_complex", "[0:a][1:a]amix=inputs=2:duration=first");
    }

    if !opts.audio_only {
        if let Some((width, height)) = opts.resolution.dimensions() {
            args.pair("-vf", format!("scale={width}:{height}"));
        }

        match hardware {
            Some(encoder) => {
                args.pair("-c:v", encoder);
                push_hardware_quality(&mut args, opts, encoder);
            }
            None => push_software_quality(&mut args, opts),
        }
    }

    push_audio(&mut args, opts);
    push_container(&mut args, opts.output_format);

    args.pair("-progress", "pipe:1");
    args.push("-y");
    args.push(job.output_path.display());

    args.0
}

/// The encoder to use, if hardware encoding survived normalization.
fn hardware_encoder(opts: &JobOptions) -> Option<&str> {
    if opts.use_hardware && !opts.audio_only {
        opts.hardware_encoder.as_deref()
    } else {
        None
    }
}

/// Custom bitrate in kbps when the tier asks for one.
fn custom_bitrate(opts: &JobOptions) -> Option<&str> {
    if opts.quality == QualityTier::Custom {
        opts.custom_bitrate.as_deref()
    } else {
        None
    }
}

fn push_software_quality(args: &mut Args, opts: &JobOptions) {
    let bitrate = custom_bitrate(opts);

    if opts.output_format == OutputFormat::Webm {
        args.pair("-c:v", "libvpx-vp9");
        match bitrate {
            Some(kbps) => args.pair("-b:v", format!("{kbps}k")),
            None => {
                let crf = match opts.quality {
                    QualityTier::High => 24,
                    QualityTier::Low => 40,
                    QualityTier::Medium | QualityTier::Custom => 32,
                };
                args.pair("-crf", crf);
                args.pair("-b:v", "0");
            }
        }
        return;
    }

    args.pair("-c:v", "libx264");
    match bitrate {
        Some(kbps) => {
            args.pair("-preset", "medium");
            args.pair("-b:v", format!("{kbps}k"));
        }
        None => {
            let preset = match opts.quality {
                QualityTier::High => "slow",
                QualityTier::Low => "fast",
                QualityTier::Medium | QualityTier::Custom => "medium",
            };
            args.pair("-preset", preset);
            args.pair("-crf", opts.quality.constant_quality());
        }
    }
}

fn push_hardware_quality(args: &mut Args, opts: &JobOptions, encoder: &str) {
    let bitrate = custom_bitrate(opts);
    let q = opts.quality.constant_quality();

    match HardwareFamily::from_encoder(encoder) {
        Some(HardwareFamily::Nvenc) => {
            let preset = match opts.quality {
                QualityTier::High => "p4",
                QualityTier::Low => "p6",
                QualityTier::Medium | QualityTier::Custom => "p5",
            };
            args.pair("-preset", preset);
            args.pair("-rc", "vbr");
            match bitrate {
                Some(kbps) => args.pair("-b:v", format!("{kbps}k")),
                None => args.pair("-cq", q),
            }
        }
        Some(HardwareFamily::Qsv) => {
            let preset = if opts.quality == QualityTier::Low {
                "speed"
            } else {
                "balanced"
            };
            args.pair("-preset", preset);
            match bitrate {
                Some(kbps) => args.pair("-b:v", format!("{kbps}k")),
                None => args.pair("-global_quality", q),
            }
        }
        Some(HardwareFamily::Amf) => {
            let quality = match opts.quality {
                QualityTier::High => "quality",
                QualityTier::Low => "speed",
                QualityTier::Medium | QualityTier::Custom => "balanced",
            };
            args.pair("-quality", quality);
            match bitrate {
                Some(kbps) => args.pair("-b:v", format!("{kbps}k")),
                None => {
                    args.pair("-rc", "cqp");
                    args.pair("-qp_i", q);
                    args.pair("-qp_p", q);
                    args.pair("-qp_b", q);
                }
            }
        }
        None => {
            if let Some(kbps) = bitrate {
                args.pair("-b:v", format!("{kbps}k"));
            }
        }
    }
}

fn push_audio(args: &mut Args, opts: &JobOptions) {
    if opts.audio_only {
        args.push("-vn");
        let codec = match opts.output_format {
            OutputFormat::Mp3 => "libmp3lame",
            OutputFormat::Aac => "aac",
            OutputFormat::Wav => "pcm_s16le",
            OutputFormat::Flac => "flac",
            OutputFormat::Ogg => "libvorbis",
            _ => "copy",
        };
        args.pair("-acodec", codec);
    } else if opts.mute_audio {
        args.push("-an");
    } else {
        let codec = if opts.output_format == OutputFormat::Webm {
            "libopus"
        } else {
            "aac"
        };
        args.pair("-c:a", codec);
        args.pair("-b:a", "192k");
    }
}

fn push_container(args: &mut Args, format: OutputFormat) {
    match format {
        OutputFormat::Mp4 => {
            args.pair("-f", "mp4");
            args.pair("-movflags", "+faststart");
        }
        OutputFormat::Avi => args.pair("-f", "avi"),
        OutputFormat::Mkv => args.pair("-f", "matroska"),
        _ => {}
    }
}

/// Small builder so call sites read like the command line.
#[derive(Default)]
struct Args(Vec<String>);

impl Args {
    fn push(&mut self, value: impl ToString) {
        self.0.push(value.to_string());
    }

    fn pair(&mut self, flag: &str, value: impl ToString) {
        self.0.push(flag.to_string());
        self.0.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{Resolution, Settings};
    use std::path::PathBuf;

    fn job_with(edit: impl FnOnce(&mut JobOptions)) -> Job {
        let mut opts = JobOptions::from_settings(&Settings::default());
        opts.output_dir = PathBuf::from("/out");
        edit(&mut opts);
        Job::new(
            PathBuf::from("/in/a.mov"),
            opts.normalized(Some("h264_nvenc")),
            PathBuf::from("/out/a.mp4"),
        )
    }

    fn joined(job: &Job) -> String {
        build_invocation(job).join(" ")
    }

    #[test]
    fn default_mp4_uses_x264_high_and_faststart() {
        let job = job_with(|_| {});
        assert_eq!(
            joined(&job),
            "-hide_banner -i /in/a.mov -c:v libx264 -preset slow -crf 18 \
             -c:a aac -b:a 192k -f mp4 -movflags +faststart -progress pipe:1 -y /out/a.mp4"
        );
    }

    #[test]
    fn scaling_and_custom_bitrate() {
        let job = job_with(|o| {
            o.resolution = Resolution::Hd720;
            o.quality = QualityTier::Custom;
            o.custom_bitrate = Some("2500kbps".into());
            o.output_format = OutputFormat::Mkv;
        });
        let args = joined(&job);
        assert!(args.contains("-vf scale=1280:720 -c:v libx264 -preset medium -b:v 2500k"), "{args}");
        assert!(args.contains("-f matroska"));
    }

    #[test]
    fn nvenc_gets_hwaccel_before_input() {
        let job = job_with(|o| {
            o.use_hardware = true;
            o.quality = QualityTier::Low;
        });
        let args = build_invocation(&job);
        assert_eq!(&args[1..5], ["-hwaccel", "cuda", "-i", "/in/a.mov"]);
        let joined = args.join(" ");
        assert!(joined.contains("-c:v h264_nvenc -preset p6 -rc vbr -cq 28"), "{joined}");
    }

    #[test]
    fn amf_constant_quality() {
        let mut job = job_with(|o| o.use_hardware = true);
        job.options.hardware_encoder = Some("hevc_amf".into());
        let args = joined(&job);
        assert!(args.starts_with("-hide_banner -hwaccel d3d11va"));
        assert!(args.contains("-quality quality -rc cqp -qp_i 18 -qp_p 18 -qp_b 18"), "{args}");
    }

    #[test]
    fn audio_only_flac_drops_video() {
        let job = job_with(|o| {
            o.audio_only = true;
            o.output_format = OutputFormat::Flac;
            o.resolution = Resolution::Fhd1080;
            o.use_hardware = true;
        });
        let args = joined(&job);
        assert!(args.contains("-vn -acodec flac"));
        assert!(!args.contains("-vf"));
        assert!(!args.contains("-c:v"));
        assert!(!args.contains("-hwaccel"));
    }

    #[test]
    fn muted_webm_uses_vp9_without_audio() {
        let job = job_with(|o| {
            o.output_format = OutputFormat::Webm;
            o.mute_audio = true;
            o.quality = QualityTier::Medium;
        });
        let args = joined(&job);
        assert!(args.contains("-c:v libvpx-vp9 -crf 32 -b:v 0 -an"), "{args}");
        assert!(!args.contains("-f "));
    }

    #[test]
    fn missing_overlay_is_skipped() {
        let job = job_with(|o| o.audio_overlay = Some(PathBuf::from("/nowhere/music.mp3")));
        assert!(!joined(&job).contains("amix"));
    }

    #[test]
    fn existing_overlay_is_mixed() {
        let dir = tempfile::tempdir().unwrap();
        let overlay = dir.path().join("music.mp3");
        std::fs::write(&overlay, b"id3").unwrap();
        let job = job_with(|o| o.audio_overlay = Some(overlay.clone()));
        let args = build_invocation(&job);
        let pos = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert_eq!(args[pos - 1], overlay.display().to_string());
        assert_eq!(args[pos + 1], "[0:a][1:a]amix=inputs=2:duration=first");
    }

    #[test]
    fn family_classification() {
        assert_eq!(HardwareFamily::from_encoder("hevc_qsv"), Some(HardwareFamily::Qsv));
        assert_eq!(HardwareFamily::from_encoder("libx264"), None);
    }
}
