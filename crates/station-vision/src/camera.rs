use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::imgproc;

/// Where a feed's frames come from: a local capture device index or a
/// network stream URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraSource {
    Usb(u32),
    Rtsp(String),
}

impl CameraSource {
    /// Integer addresses are local devices, anything else is a stream URL.
    pub fn from_address(addr: &str) -> Option<Self> {
        let addr = addr.trim();
        if addr.is_empty() {
            return None;
        }
        Some(match addr.parse::<u32>() {
            Ok(n) => CameraSource::Usb(n),
            Err(_) => CameraSource::Rtsp(addr.to_string()),
        })
    }
}

impl std::fmt::Display for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CameraSource::Usb(n) => write!(f, "usb:{n}"),
            CameraSource::Rtsp(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    R1920x1080,
    R1600x900,
    R1280x720,
    R1024x576,
    R640x360,
    R256x144,
}

impl Resolution {
    pub const ALL: [Resolution; 6] = [
        Resolution::R1920x1080,
        Resolution::R1600x900,
        Resolution::R1280x720,
        Resolution::R1024x576,
        Resolution::R640x360,
        Resolution::R256x144,
    ];

    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::R1920x1080 => (1920, 1080),
            Resolution::R1600x900 => (1600, 900),
            Resolution::R1280x720 => (1280, 720),
            Resolution::R1024x576 => (1024, 576),
            Resolution::R640x360 => (640, 360),
            Resolution::R256x144 => (256, 144),
        }
    }

    /// Index stored in the profile.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Self> {
        Self::ALL.get(i).copied()
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::R640x360
    }
}

/// Blocking frame source owned by one camera worker.
pub trait FrameGrabber: Send {
    fn open(&mut self, source: &CameraSource, resolution: Resolution) -> Result<()>;
    /// Next frame at the opened resolution.
    fn grab(&mut self) -> Result<RgbImage>;
    fn release(&mut self);
}

/// No frame within this long counts as a lost feed.
pub const DEFAULT_STALL: Duration = Duration::from_secs(2);

struct Capture {
    child: Child,
    frames: Receiver<io::Result<Vec<u8>>>,
}

/// Decodes through an `ffmpeg` child process writing raw RGB24 to stdout.
/// Frames are read on a helper thread so a silent stream cannot block `grab`
/// past the stall timeout.
pub struct FfmpegGrabber {
    binary: String,
    stall: Duration,
    capture: Option<Capture>,
    size: (u32, u32),
}

impl FfmpegGrabber {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into(), stall: DEFAULT_STALL, capture: None, size: (0, 0) }
    }

    pub fn with_stall_timeout(mut self, stall: Duration) -> Self {
        self.stall = stall;
        self
    }

    fn input_args(source: &CameraSource, (w, h): (u32, u32), stall: Duration) -> Vec<String> {
        let size = format!("{w}x{h}");
        match source {
            CameraSource::Usb(n) => {
                let (format, device) = if cfg!(target_os = "linux") {
                    ("video4linux2", format!("/dev/video{n}"))
                } else if cfg!(target_os = "macos") {
                    ("avfoundation", n.to_string())
                } else {
                    ("dshow", format!("video={n}"))
                };
                vec!["-f".into(), format.into(), "-video_size".into(), size, "-i".into(), device]
            }
            // small queue and no input buffering keep stream latency low
            CameraSource::Rtsp(url) => vec![
                "-rtsp_transport".into(),
                "tcp".into(),
                "-timeout".into(),
                stall.as_micros().to_string(),
                "-fflags".into(),
                "nobuffer".into(),
                "-flags".into(),
                "low_delay".into(),
                "-thread_queue_size".into(),
                "3".into(),
                "-i".into(),
                url.clone(),
            ],
        }
    }

    pub fn command_args(&self, source: &CameraSource, resolution: Resolution) -> Vec<String> {
        let (w, h) = resolution.dimensions();
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"].map(String::from).to_vec();
        args.extend(Self::input_args(source, (w, h), self.stall));
        args.extend(
            ["-vf", &format!("scale={w}:{h}"), "-pix_fmt", "rgb24", "-f", "rawvideo", "-"].map(String::from),
        );
        args
    }
}

impl FrameGrabber for FfmpegGrabber {
    fn open(&mut self, source: &CameraSource, resolution: Resolution) -> Result<()> {
        self.release();
        let args = self.command_args(source, resolution);
        debug!(%source, "capture: {} {}", self.binary, args.join(" "));
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("run {}", self.binary))?;
        let mut stdout = child.stdout.take().context("ffmpeg stdout not captured")?;

        let (w, h) = resolution.dimensions();
        let frame_len = (w * h * 3) as usize;
        let (tx, frames) = mpsc::sync_channel(1);
        let spawned = std::thread::Builder::new().name(format!("ffmpeg-{source}")).spawn(move || loop {
            let mut buf = vec![0u8; frame_len];
            let read = stdout.read_exact(&mut buf).map(|()| buf);
            let failed = read.is_err();
            // the receiver is gone once the grabber releases
            if tx.send(read).is_err() || failed {
                break;
            }
        });
        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e).context("spawn ffmpeg reader");
        }

        self.capture = Some(Capture { child, frames });
        self.size = (w, h);
        Ok(())
    }

    fn grab(&mut self) -> Result<RgbImage> {
        let (w, h) = self.size;
        let capture = self.capture.as_mut().context("camera not open")?;
        let buf = match capture.frames.recv_timeout(self.stall) {
            Ok(read) => read.context("read frame from ffmpeg")?,
            Err(RecvTimeoutError::Timeout) => bail!("no frame from ffmpeg within {} ms", self.stall.as_millis()),
            Err(RecvTimeoutError::Disconnected) => bail!("ffmpeg reader stopped"),
        };
        RgbImage::from_raw(w, h, buf).context("frame size mismatch")
    }

    fn release(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            let _ = capture.child.kill();
            let _ = capture.child.wait();
        }
    }
}

impl Drop for FfmpegGrabber {
    fn drop(&mut self) {
        self.release();
    }
}

/// Frame shown while a feed has no signal: dark background with a red cross.
pub fn no_signal(resolution: Resolution) -> Result<RgbImage> {
    let (w, h) = resolution.dimensions();
    let (wi, hi) = (w as i32, h as i32);
    let mut img = imgproc::blank(wi, hi, [24, 24, 24])?;
    let thick = (hi / 90).max(2);
    imgproc::draw_line(&mut img, (wi / 3, hi / 3), (2 * wi / 3, 2 * hi / 3), [160, 0, 0], thick)?;
    imgproc::draw_line(&mut img, (2 * wi / 3, hi / 3), (wi / 3, 2 * hi / 3), [160, 0, 0], thick)?;
    imgproc::to_rgb(&img)
}
