use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::command::{Preset, VideoCodec, MAX_CRF, MIN_CRF};

pub const DEFAULT_ENGINE_VERSION: &str = "7.1";
const DEFAULT_CRF: u8 = 23;
const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 128;
const CONFIG_FILE_NAME: &str = "media-transform.toml";

// ============================================================================
// File Layer
// ============================================================================

#[derive(Deserialize, Default, Debug, Clone)]
pub struct FileConfig {
    pub engine: Option<EngineFileConfig>,
    pub encode: Option<EncodeFileConfig>,
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct EngineFileConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    /// `file://` URL or plain path of a versioned engine directory.
    pub location: Option<String>,
    pub version: Option<String>,
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct EncodeFileConfig {
    pub codec: Option<String>,
    pub crf: Option<u8>,
    pub preset: Option<String>,
    pub audio_bitrate: Option<u32>,
    pub threads: Option<u32>,
}

/// Values given on the command line. They win over the file.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub ffmpeg_path: Option<PathBuf>,
    pub codec: Option<String>,
    pub crf: Option<u8>,
    pub preset: Option<String>,
    pub scratch_dir: Option<PathBuf>,
}

// ============================================================================
// Resolved Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub location: Option<PathBuf>,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct EncodeDefaults {
    pub codec: VideoCodec,
    pub crf: u8,
    pub preset: Preset,
    pub audio_bitrate_kbps: u32,
    pub threads: Option<u32>,
}

impl Default for EncodeDefaults {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            crf: DEFAULT_CRF,
            preset: Preset::Medium,
            audio_bitrate_kbps: DEFAULT_AUDIO_BITRATE_KBPS,
            threads: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub engine: EngineConfig,
    pub encode: EncodeDefaults,
    pub scratch_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig {
                ffmpeg_path: None,
                ffprobe_path: None,
                location: None,
                version: DEFAULT_ENGINE_VERSION.to_string(),
            },
            encode: EncodeDefaults::default(),
            scratch_dir: None,
        }
    }
}

impl Config {
    pub fn resolve(file: Option<FileConfig>, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        let file = file.unwrap_or_default();
        let engine_file = file.engine.unwrap_or_default();
        let encode_file = file.encode.unwrap_or_default();

        let location = match &engine_file.location {
            Some(raw) => Some(parse_location(raw)?),
            None => None,
        };

        let codec = match overrides.codec.as_deref().or(encode_file.codec.as_deref()) {
            Some(name) => name.parse::<VideoCodec>().map_err(ConfigError::Invalid)?,
            None => VideoCodec::H264,
        };
        let preset = match overrides.preset.as_deref().or(encode_file.preset.as_deref()) {
            Some(name) => name.parse::<Preset>().map_err(ConfigError::Invalid)?,
            None => Preset::Medium,
        };
        let crf = overrides.crf.or(encode_file.crf).unwrap_or(DEFAULT_CRF);
        if !(MIN_CRF..=MAX_CRF).contains(&crf) {
            return Err(ConfigError::Invalid(format!(
                "crf {} outside {}-{}",
                crf, MIN_CRF, MAX_CRF
            )));
        }

        Ok(Config {
            engine: EngineConfig {
                ffmpeg_path: overrides.ffmpeg_path.clone().or(engine_file.ffmpeg_path),
                ffprobe_path: engine_file.ffprobe_path,
                location,
                version: engine_file
                    .version
                    .unwrap_or_else(|| DEFAULT_ENGINE_VERSION.to_string()),
            },
            encode: EncodeDefaults {
                codec,
                crf,
                preset,
                audio_bitrate_kbps: encode_file.audio_bitrate.unwrap_or(DEFAULT_AUDIO_BITRATE_KBPS),
                threads: encode_file.threads.filter(|t| *t > 0),
            },
            scratch_dir: overrides.scratch_dir.clone().or(file.scratch_dir),
        })
    }
}

/// Engine directories are local. Remote URLs are refused rather than fetched.
fn parse_location(raw: &str) -> Result<PathBuf, ConfigError> {
    match url::Url::parse(raw) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|_| ConfigError::Invalid(format!("bad engine location: {}", raw))),
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
            Err(ConfigError::Invalid(format!("remote engine location not supported: {}", raw)))
        }
        // Plain paths (and Windows drive letters, which parse as a scheme).
        _ => Ok(PathBuf::from(raw)),
    }
}

pub fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_owned());
    }
    let cwd_config = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }
    if let Some(config_dir) = dirs::config_dir() {
        let user_config = config_dir.join("media-transform").join("config.toml");
        if user_config.exists() {
            return Some(user_config);
        }
    }
    None
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0}")]
    Invalid(String),
}

pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: FileConfig = toml::from_str(&content)?;
    Ok(config)
}
