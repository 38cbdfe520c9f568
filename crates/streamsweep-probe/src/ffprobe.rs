//! FFprobe argument building and JSON output parsing.

use serde::Deserialize;
use std::collections::HashMap;
use streamsweep_common::TechMetadata;

/// Request headers forwarded to ffprobe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

impl RequestHeaders {
    fn push_args(&self, args: &mut Vec<String>) {
        if let Some(ua) = self.user_agent.as_deref().filter(|s| !s.is_empty()) {
            args.push("-user_agent".to_string());
            args.push(ua.to_string());
        }
        if let Some(referer) = self.referer.as_deref().filter(|s| !s.is_empty()) {
            args.push("-headers".to_string());
            args.push(format!("Referer: {referer}\r\n"));
        }
    }
}

/// Tuning knobs for the validity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeLimits {
    /// Socket I/O timeout handed to ffprobe, in microseconds.
    pub io_timeout_us: u64,
    pub probesize: u64,
    pub analyzeduration_us: u64,
}

/// Arguments for the fast validity probe.
pub fn validity_args(address: &str, limits: ProbeLimits, headers: &RequestHeaders) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-v".into(),
        "error".into(),
        "-timeout".into(),
        limits.io_timeout_us.to_string(),
        "-probesize".into(),
        limits.probesize.to_string(),
        "-analyzeduration".into(),
        limits.analyzeduration_us.to_string(),
    ];
    headers.push_args(&mut args);
    args.extend([
        "-show_entries".into(),
        "format=duration:stream=codec_type".into(),
        "-of".into(),
        "json".into(),
        address.to_string(),
    ]);
    args
}

/// Arguments for the deep metadata probe.
pub fn inspect_args(address: &str, headers: &RequestHeaders) -> Vec<String> {
    let mut args: Vec<String> = vec!["-v".into(), "quiet".into()];
    headers.push_args(&mut args);
    args.extend([
        "-print_format".into(),
        "json".into(),
        "-show_format".into(),
        "-show_streams".into(),
        "-show_programs".into(),
        address.to_string(),
    ]);
    args
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    programs: Vec<FfprobeProgram>,
    #[serde(default)]
    error: Option<FfprobeError>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    coded_width: Option<u32>,
    coded_height: Option<u32>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeProgram {
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeError {
    #[serde(default)]
    string: Option<String>,
}

/// What the validity probe's stdout says about a stream that exited cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidityReport {
    /// Format or a video stream was found.
    Playable,
    /// ffprobe printed nothing.
    Empty,
    /// Output parsed but holds neither a format nor a video stream.
    NoVideo,
    /// ffprobe reported a structured error object.
    Error(String),
}

/// Interpret the JSON printed by [`validity_args`].
///
/// Output that is not JSON at all is accepted as playable: some servers
/// make ffprobe print diagnostics but still exit cleanly.
pub fn parse_validity(stdout: &str) -> ValidityReport {
    if stdout.trim().is_empty() {
        return ValidityReport::Empty;
    }

    let output: FfprobeOutput = match serde_json::from_str(stdout) {
        Ok(output) => output,
        Err(_) => return ValidityReport::Playable,
    };

    if let Some(error) = output.error {
        return ValidityReport::Error(error.string.unwrap_or_else(|| "unknown ffprobe error".into()));
    }

    let has_video = output
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("video"));

    if has_video || output.format.is_some() {
        ValidityReport::Playable
    } else {
        ValidityReport::NoVideo
    }
}

/// Extract technical metadata from the JSON printed by [`inspect_args`].
///
/// # Errors
///
/// Returns the JSON error when the output is not a valid ffprobe document.
pub fn parse_metadata(stdout: &str) -> serde_json::Result<TechMetadata> {
    let output: FfprobeOutput = serde_json::from_str(stdout)?;
    Ok(metadata_from_output(&output))
}

fn metadata_from_output(output: &FfprobeOutput) -> TechMetadata {
    let primary = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .or_else(|| output.streams.first());

    let resolution = primary.and_then(|s| {
        let (w, h) = match (s.width, s.height) {
            (Some(w), Some(h)) => (w, h),
            _ => (s.coded_width?, s.coded_height?),
        };
        (w > 0 && h > 0).then(|| format!("{w}x{h}"))
    });

    let bitrate = primary
        .and_then(|s| s.bit_rate.clone())
        .or_else(|| output.format.as_ref().and_then(|f| f.bit_rate.clone()));

    TechMetadata {
        service_name: service_name(output),
        resolution,
        codec: primary.and_then(|s| s.codec_name.clone()),
        bitrate,
    }
}

/// Program tags first, then stream tags, then container tags.
fn service_name(output: &FfprobeOutput) -> Option<String> {
    let from_tags = |tags: &HashMap<String, String>| {
        tags.get("service_name")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    output
        .programs
        .first()
        .and_then(|p| from_tags(&p.tags))
        .or_else(|| output.streams.iter().find_map(|s| from_tags(&s.tags)))
        .or_else(|| output.format.as_ref().and_then(|f| from_tags(&f.tags)))
}
