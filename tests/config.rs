use media_transform::command::{Preset, VideoCodec};
use media_transform::config::{find_config_file, load_config, Config, ConfigError, ConfigOverrides, FileConfig};
use std::io::Write;
use std::path::PathBuf;

fn parse(text: &str) -> FileConfig {
    toml::from_str(text).unwrap()
}

#[test]
fn defaults_without_any_file() {
    let config = Config::resolve(None, &ConfigOverrides::default()).unwrap();
    assert_eq!(config.encode.codec, VideoCodec::H264);
    assert_eq!(config.encode.crf, 23);
    assert_eq!(config.encode.preset, Preset::Medium);
    assert_eq!(config.encode.audio_bitrate_kbps, 128);
    assert_eq!(config.engine.version, "7.1");
    assert!(config.engine.ffmpeg_path.is_none());
}

#[test]
fn file_values_are_applied() {
    let file = parse(
        r#"
        scratch_dir = "/var/tmp/mt"

        [engine]
        ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
        location = "file:///opt/ffmpeg/7.0"
        version = "7.0"

        [encode]
        codec = "hevc"
        crf = 26
        preset = "slow"
        audio_bitrate = 192
        threads = 0
        "#,
    );
    let config = Config::resolve(Some(file), &ConfigOverrides::default()).unwrap();
    assert_eq!(config.engine.ffmpeg_path, Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg")));
    assert_eq!(config.engine.location, Some(PathBuf::from("/opt/ffmpeg/7.0")));
    assert_eq!(config.engine.version, "7.0");
    assert_eq!(config.encode.codec, VideoCodec::H265);
    assert_eq!(config.encode.crf, 26);
    assert_eq!(config.encode.preset, Preset::Slow);
    assert_eq!(config.encode.audio_bitrate_kbps, 192);
    assert_eq!(config.encode.threads, None);
    assert_eq!(config.scratch_dir, Some(PathBuf::from("/var/tmp/mt")));
}

#[test]
fn command_line_wins_over_file() {
    let file = parse(
        r#"
        [engine]
        ffmpeg_path = "/from/file"
        [encode]
        crf = 26
        codec = "h264"
        "#,
    );
    let overrides = ConfigOverrides {
        ffmpeg_path: Some(PathBuf::from("/from/cli")),
        crf: Some(20),
        codec: Some("vp9".into()),
        ..ConfigOverrides::default()
    };
    let config = Config::resolve(Some(file), &overrides).unwrap();
    assert_eq!(config.engine.ffmpeg_path, Some(PathBuf::from("/from/cli")));
    assert_eq!(config.encode.crf, 20);
    assert_eq!(config.encode.codec, VideoCodec::Vp9);
}

#[test]
fn unknown_keys_are_ignored() {
    let file = parse(
        r#"
        theme = "dark"
        [encode]
        crf = 24
        hwaccel = "cuda"
        "#,
    );
    let config = Config::resolve(Some(file), &ConfigOverrides::default()).unwrap();
    assert_eq!(config.encode.crf, 24);
}

#[test]
fn remote_engine_location_is_refused() {
    let file = parse(
        r#"
        [engine]
        location = "https://example.com/ffmpeg-7.1.zip"
        "#,
    );
    let err = Config::resolve(Some(file), &ConfigOverrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(ref m) if m.contains("remote")));
}

#[test]
fn out_of_range_quality_is_refused() {
    let overrides = ConfigOverrides {
        crf: Some(40),
        ..ConfigOverrides::default()
    };
    assert!(matches!(
        Config::resolve(None, &overrides),
        Err(ConfigError::Invalid(_))
    ));

    let bad_preset = parse("[encode]\npreset = \"placebo\"\n");
    assert!(Config::resolve(Some(bad_preset), &ConfigOverrides::default()).is_err());
}

#[test]
fn load_reads_an_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "[encode]\ncrf = 19").unwrap();

    assert_eq!(find_config_file(Some(&path)), Some(path.clone()));
    let loaded = load_config(&path).unwrap();
    assert_eq!(loaded.encode.and_then(|e| e.crf), Some(19));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[encode\ncrf = ").unwrap();
    assert!(matches!(load_config(&path), Err(ConfigError::Parse(_))));
}
