use anyhow::{bail, Context, Result};
use rollcall_core::{DetectionParams, ACCEPT_THRESHOLD, DEFAULT_SAMPLE_QUOTA};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "rollcall.toml";

/// CLI configuration.
///
/// Layers, lowest to highest priority: built-in defaults, the TOML file named
/// by `ROLLCALL_CONFIG` (or `<data_dir>/rollcall.toml` if present), then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Flat directory of `{name}-{sequence}-{id}.png` samples.
    pub samples_dir: PathBuf,
    pub model_path: PathBuf,
    pub attendance_path: PathBuf,
    /// SCRFD face detector ONNX model.
    pub detector_model: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Frames discarded after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Samples captured per enrollment.
    pub sample_quota: u32,
    /// LBPH distance below which a face is accepted.
    pub accept_threshold: f64,
    pub detection: DetectionParams,
}

/// On-disk form; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    samples_dir: Option<PathBuf>,
    model_path: Option<PathBuf>,
    attendance_path: Option<PathBuf>,
    detector_model: Option<PathBuf>,
    camera_device: Option<String>,
    camera_width: Option<u32>,
    camera_height: Option<u32>,
    warmup_frames: Option<usize>,
    sample_quota: Option<u32>,
    accept_threshold: Option<f64>,
    detection: Option<DetectionParams>,
}

impl Config {
    /// Load from the process environment and optional config file.
    pub fn load() -> Result<Self> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    fn resolve(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let default_data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");
        let env_data_dir = env("ROLLCALL_DATA_DIR").map(PathBuf::from);

        let file_path = match env("ROLLCALL_CONFIG") {
            Some(path) => Some(PathBuf::from(path)),
            None => {
                let candidate = env_data_dir
                    .as_deref()
                    .unwrap_or(&default_data_dir)
                    .join(CONFIG_FILE_NAME);
                candidate.exists().then_some(candidate)
            }
        };
        let file = match file_path {
            Some(path) => read_file(&path)?,
            None => FileConfig::default(),
        };

        let data_dir = env_data_dir
            .or(file.data_dir)
            .unwrap_or(default_data_dir);

        let path_var = |key: &str, from_file: Option<PathBuf>, default: PathBuf| -> PathBuf {
            env(key).map(PathBuf::from).or(from_file).unwrap_or(default)
        };

        let mut detection = file.detection.unwrap_or_default();
        detection.scale_factor = env_parse(&env, "ROLLCALL_SCALE_FACTOR")?.unwrap_or(detection.scale_factor);
        detection.min_neighbors = env_parse(&env, "ROLLCALL_MIN_NEIGHBORS")?.unwrap_or(detection.min_neighbors);
        detection.min_size = env_parse(&env, "ROLLCALL_MIN_SIZE")?.unwrap_or(detection.min_size);

        let config = Self {
            samples_dir: path_var("ROLLCALL_SAMPLES_DIR", file.samples_dir, data_dir.join("persons")),
            model_path: path_var("ROLLCALL_MODEL_PATH", file.model_path, data_dir.join("model.json")),
            attendance_path: path_var(
                "ROLLCALL_ATTENDANCE_PATH",
                file.attendance_path,
                data_dir.join("attendance.csv"),
            ),
            detector_model: path_var(
                "ROLLCALL_DETECTOR_MODEL",
                file.detector_model,
                data_dir.join("models").join("det_10g.onnx"),
            ),
            camera_device: env("ROLLCALL_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            camera_width: env_parse(&env, "ROLLCALL_CAMERA_WIDTH")?
                .or(file.camera_width)
                .unwrap_or(640),
            camera_height: env_parse(&env, "ROLLCALL_CAMERA_HEIGHT")?
                .or(file.camera_height)
                .unwrap_or(480),
            warmup_frames: env_parse(&env, "ROLLCALL_WARMUP_FRAMES")?
                .or(file.warmup_frames)
                .unwrap_or(4),
            sample_quota: env_parse(&env, "ROLLCALL_SAMPLE_QUOTA")?
                .or(file.sample_quota)
                .unwrap_or(DEFAULT_SAMPLE_QUOTA),
            accept_threshold: env_parse(&env, "ROLLCALL_ACCEPT_THRESHOLD")?
                .or(file.accept_threshold)
                .unwrap_or(ACCEPT_THRESHOLD),
            detection,
            data_dir,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sample_quota == 0 {
            bail!("sample_quota must be at least 1");
        }
        if !(self.accept_threshold > 0.0) {
            bail!("accept_threshold must be positive, got {}", self.accept_threshold);
        }
        self.detection.validate()?;
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}

/// Parse an environment variable; unset is `None`, unparseable is an error.
fn env_parse<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{key}={raw:?}: {e}")),
    }
}
