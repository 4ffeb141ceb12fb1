//! Simulcast/SVC encoding plans for published tracks.

use crate::config::SimulcastThresholds;
use crate::rtc::TrackSettings;
use strata_core::model::{
    AudioBitrateProfile, PublishOption, VideoDimension, VideoLayer, VideoQuality,
};

pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_MAX_SPATIAL_LAYERS: u32 = 3;
pub const DEFAULT_MAX_TEMPORAL_LAYERS: u32 = 3;
pub const DEFAULT_VIDEO_DIMENSION: VideoDimension = VideoDimension::new(1280, 720);

const SVC_CODECS: [&str; 2] = ["vp9", "av1"];
const RIDS: [&str; 3] = ["q", "h", "f"];

/// One encoding of a published video track.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimalLayer {
    pub rid: String,
    pub width: u32,
    pub height: u32,
    pub max_bitrate: u32,
    pub max_framerate: u32,
    pub scale_resolution_down_by: Option<f64>,
    pub scalability_mode: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioLayer {
    pub max_bitrate: u32,
}

/// Per-publish knobs chosen by the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackPublishOptions {
    pub audio_bitrate_profile: AudioBitrateProfile,
    /// Overrides the publish option's codec when choosing codec preferences.
    pub preferred_codec: Option<String>,
}

pub fn is_svc_codec(codec: Option<&str>) -> bool {
    codec.is_some_and(|name| SVC_CODECS.iter().any(|svc| name.eq_ignore_ascii_case(svc)))
}

fn default_bitrate(rid: &str) -> u32 {
    match rid {
        "q" => 300_000,
        "h" => 750_000,
        _ => 1_250_000,
    }
}

fn scalability_mode(spatial: u32, temporal: u32) -> String {
    let key = if spatial > 1 { "_KEY" } else { "" };
    format!("L{spatial}T{temporal}{key}")
}

/// Scales `bitrate` down when the track is smaller than the target resolution.
pub fn computed_max_bitrate(target: VideoDimension, width: u32, height: u32, bitrate: u32) -> u32 {
    if width < target.width || height < target.height {
        let current = f64::from(width) * f64::from(height);
        let wanted = f64::from(target.width) * f64::from(target.height);
        if wanted == 0.0 {
            return bitrate;
        }
        let factor = (current / wanted).min(1.0);
        return (f64::from(bitrate) * factor).round() as u32;
    }
    bitrate
}

/// Computes the layers to announce for a video track, ordered low to high (`q`, `h`, `f`).
///
/// Returns `None` for audio track types.
pub fn compute_video_layers(
    settings: &TrackSettings,
    option: &PublishOption,
    thresholds: &SimulcastThresholds,
) -> Option<Vec<OptimalLayer>> {
    if option.track_type.is_audio() {
        return None;
    }

    let fps = non_zero(option.fps, DEFAULT_FPS);
    let max_spatial = non_zero(option.max_spatial_layers, DEFAULT_MAX_SPATIAL_LAYERS);
    let max_temporal = non_zero(option.max_temporal_layers, DEFAULT_MAX_TEMPORAL_LAYERS);
    let target = option.video_dimension.unwrap_or(DEFAULT_VIDEO_DIMENSION);
    let width = settings.width.unwrap_or(target.width);
    let height = settings.height.unwrap_or(target.height);

    let max_bitrate = computed_max_bitrate(target, width, height, option.bitrate);
    let svc = is_svc_codec(option.codec.as_ref().map(|c| c.name.as_str()));

    let mut layers = Vec::with_capacity(RIDS.len());
    let mut factor = 1u32;
    for rid in RIDS.iter().rev().take(max_spatial as usize) {
        let bitrate = (f64::from(max_bitrate) / f64::from(factor)).round() as u32;
        let mut layer = OptimalLayer {
            rid: rid.to_string(),
            width: (f64::from(width) / f64::from(factor)).round() as u32,
            height: (f64::from(height) / f64::from(factor)).round() as u32,
            max_bitrate: if bitrate == 0 { default_bitrate(rid) } else { bitrate },
            max_framerate: fps,
            scale_resolution_down_by: None,
            scalability_mode: None,
            active: true,
        };
        if svc {
            let spatial = if option.use_single_layer { 1 } else { max_spatial };
            layer.scalability_mode = Some(scalability_mode(spatial, max_temporal));
        } else {
            layer.scale_resolution_down_by = Some(f64::from(factor));
        }
        factor *= 2;
        // Encoders drop layers by index under pressure, so lower resolutions come first.
        layers.insert(0, layer);
    }

    Some(with_simulcast_constraints(
        width,
        height,
        layers,
        option.use_single_layer,
        thresholds,
    ))
}

/// Layer plan reshaped into the encodings handed to the sender.
pub fn compute_video_encodings(
    settings: &TrackSettings,
    option: &PublishOption,
    thresholds: &SimulcastThresholds,
) -> Option<Vec<OptimalLayer>> {
    let layers = compute_video_layers(settings, option, thresholds)?;
    if is_svc_codec(option.codec.as_ref().map(|c| c.name.as_str())) {
        to_svc_encodings(&layers)
    } else {
        Some(layers)
    }
}

fn with_simulcast_constraints(
    width: u32,
    height: u32,
    layers: Vec<OptimalLayer>,
    use_single_layer: bool,
    thresholds: &SimulcastThresholds,
) -> Vec<OptimalLayer> {
    let size = width.max(height);
    let kept: Vec<OptimalLayer> = if size <= thresholds.single_layer_max {
        layers.into_iter().filter(|l| l.rid == "f").collect()
    } else if size <= thresholds.two_layer_max {
        layers.into_iter().filter(|l| l.rid != "q").collect()
    } else {
        layers
    };

    let count = kept.len();
    kept.into_iter()
        .enumerate()
        .map(|(index, mut layer)| {
            layer.rid = RIDS[index].to_string();
            if use_single_layer && index + 1 < count {
                layer.active = false;
            }
            layer
        })
        .collect()
}

/// SVC sends a single encoding: the highest layer, relabelled `q`.
pub fn to_svc_encodings(layers: &[OptimalLayer]) -> Option<Vec<OptimalLayer>> {
    let highest = ["f", "h", "q"]
        .iter()
        .find_map(|rid| layers.iter().find(|l| l.rid == *rid))?;
    let mut encoding = highest.clone();
    encoding.rid = "q".to_string();
    Some(vec![encoding])
}

pub fn rid_to_video_quality(rid: &str) -> VideoQuality {
    match rid {
        "q" => VideoQuality::Low,
        "h" => VideoQuality::Mid,
        _ => VideoQuality::High,
    }
}

pub fn to_video_layers(layers: &[OptimalLayer]) -> Vec<VideoLayer> {
    layers
        .iter()
        .map(|layer| VideoLayer {
            rid: layer.rid.clone(),
            bitrate: layer.max_bitrate,
            fps: layer.max_framerate,
            quality: rid_to_video_quality(&layer.rid),
            video_dimension: VideoDimension::new(layer.width, layer.height),
        })
        .collect()
}

pub fn compute_audio_layers(option: &PublishOption, options: &TrackPublishOptions) -> Vec<AudioLayer> {
    let profile = options.audio_bitrate_profile;
    let max_bitrate = option
        .audio_bitrate_profiles
        .iter()
        .find(|config| config.profile == profile && config.bitrate > 0)
        .map(|config| config.bitrate)
        .unwrap_or(match profile {
            AudioBitrateProfile::VoiceStandard => 64_000,
            AudioBitrateProfile::VoiceHighQuality => 128_000,
            AudioBitrateProfile::MusicHighQuality => 128_000,
        });
    vec![AudioLayer { max_bitrate }]
}

fn non_zero(value: u32, fallback: u32) -> u32 {
    if value == 0 { fallback } else { value }
}
