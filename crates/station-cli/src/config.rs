use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use station_link::sensor::PollerConfig;
use station_link::SerialConfig;
use station_profile::FEEDS;
use station_vision::{CameraWorkerConfig, TaskKind};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub gamepad: GamepadCfg,
    #[serde(default)]
    pub sensors: SensorsCfg,
    #[serde(default)]
    pub cameras: CamerasCfg,
    pub profile: ProfileCfg,
    #[serde(default)]
    pub vision: Vec<VisionCfg>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GamepadCfg {
    pub identity: String,
    pub poll_hz: u32,
    pub rebind_ms: u64,
}

impl Default for GamepadCfg {
    fn default() -> Self {
        Self { identity: "Controller (Xbox One For Windows)".into(), poll_hz: 60, rebind_ms: 1000 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SensorsCfg {
    pub poll_hz: f64,
    pub reply_timeout_ms: u64,
}

impl Default for SensorsCfg {
    fn default() -> Self {
        Self { poll_hz: 1.0, reply_timeout_ms: 1500 }
    }
}

impl SensorsCfg {
    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            period: Duration::from_secs_f64(1.0 / self.poll_hz.max(0.01)),
            reply_timeout: Duration::from_millis(self.reply_timeout_ms),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CamerasCfg {
    pub target_fps: u32,
    pub reconnect_ms: u64,
    pub ffmpeg: String,
    /// A feed with no frame for this long is treated as lost.
    pub stall_ms: u64,
    /// Where mosaic snapshots are written.
    pub snapshot_dir: String,
}

impl Default for CamerasCfg {
    fn default() -> Self {
        Self {
            target_fps: 30,
            reconnect_ms: 500,
            ffmpeg: "ffmpeg".into(),
            stall_ms: 2000,
            snapshot_dir: "mosaic".into(),
        }
    }
}

impl CamerasCfg {
    pub fn worker(&self) -> CameraWorkerConfig {
        CameraWorkerConfig { target_fps: self.target_fps, reconnect_ms: self.reconnect_ms }
    }

    pub fn stall(&self) -> Duration {
        Duration::from_millis(self.stall_ms)
    }
}

#[derive(Debug, Deserialize)]
pub struct ProfileCfg {
    pub path: String,
}

/// Attach a vision task to a display feed at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct VisionCfg {
    pub feed: usize,
    pub task: TaskKind,
}

impl Config {
    pub fn task_for(&self, feed: usize) -> Option<TaskKind> {
        self.vision.iter().find(|v| v.feed == feed).map(|v| v.task)
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {path}"))?;
    toml::from_str(&s).context("parse config toml")
}

pub fn check(cfg: &Config) -> Result<()> {
    let s = &cfg.serial;
    anyhow::ensure!(s.baud > 0, "serial.baud must be positive");
    anyhow::ensure!(!s.identity.trim().is_empty(), "serial.identity is empty");
    anyhow::ensure!(s.retries >= 1, "serial.retries must be at least 1");
    anyhow::ensure!(s.timeout_ms > 0 && s.handshake_ms >= s.timeout_ms, "serial.handshake_ms must cover one read timeout");
    anyhow::ensure!((1..=250).contains(&cfg.gamepad.poll_hz), "gamepad.poll_hz out of range");
    anyhow::ensure!(cfg.sensors.poll_hz > 0.0, "sensors.poll_hz must be positive");
    anyhow::ensure!(cfg.cameras.target_fps > 0, "cameras.target_fps must be positive");
    anyhow::ensure!(cfg.cameras.stall_ms > 0, "cameras.stall_ms must be positive");
    anyhow::ensure!(!cfg.profile.path.trim().is_empty(), "profile.path is empty");
    for (i, v) in cfg.vision.iter().enumerate() {
        anyhow::ensure!(v.feed < FEEDS, "vision[{i}]: feed {} out of range (0..{FEEDS})", v.feed);
        anyhow::ensure!(
            !cfg.vision[..i].iter().any(|o| o.feed == v.feed),
            "vision[{i}]: feed {} already has a task",
            v.feed
        );
    }
    Ok(())
}
