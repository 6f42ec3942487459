use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Deserialize;
use station_proto::{EventKind, EventSource, StationEvent};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::camera::{no_signal, CameraSource, FrameGrabber, Resolution};
use crate::task::{TaskData, TaskKind, VisionTask};

/// Live settings of one display feed. Published as whole snapshots.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedSettings {
    pub source: Option<CameraSource>,
    pub resolution: Resolution,
    pub enabled: bool,
    pub task: Option<TaskKind>,
}

impl FeedSettings {
    fn same_device(&self, other: &Self) -> bool {
        self.source == other.source && self.resolution == other.resolution && self.enabled == other.enabled
    }
}

#[derive(Debug, Clone)]
pub enum FeedMessage {
    Frame { feed: usize, image: RgbImage },
    TaskData { feed: usize, data: TaskData },
    Event(StationEvent),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraWorkerConfig {
    pub target_fps: u32,
    pub reconnect_ms: u64,
}

impl Default for CameraWorkerConfig {
    fn default() -> Self {
        Self { target_fps: 30, reconnect_ms: 500 }
    }
}

/// Control surface of a running camera worker.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    feed: usize,
    settings: Arc<watch::Sender<FeedSettings>>,
    running: Arc<AtomicBool>,
    capture: Arc<AtomicBool>,
    reset: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl FeedHandle {
    pub fn feed(&self) -> usize {
        self.feed
    }

    pub fn settings(&self) -> FeedSettings {
        self.settings.borrow().clone()
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    /// Pause capture after the current frame; the device is released.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn update(&self, settings: FeedSettings) {
        self.settings.send_replace(settings);
    }

    pub fn set_task(&self, task: Option<TaskKind>) {
        self.settings.send_modify(|s| s.task = task);
    }

    /// Ask the attached task to keep the next frame.
    pub fn request_capture(&self) {
        self.capture.store(true, Ordering::Relaxed);
    }

    /// Start the attached task over, e.g. clear the mosaic snapshots.
    pub fn reset_task(&self) {
        self.reset.store(true, Ordering::Relaxed);
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// The station-wide stop flag plus the feed's own shutdown flag.
struct StopFlags {
    station: Arc<AtomicBool>,
    feed: Arc<AtomicBool>,
}

impl StopFlags {
    fn raised(&self) -> bool {
        self.station.load(Ordering::Relaxed) || self.feed.load(Ordering::Relaxed)
    }
}

fn nap(total: Duration, stop: &StopFlags) {
    let step = Duration::from_millis(20);
    let deadline = Instant::now() + total;
    while !stop.raised() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(step.min(deadline - now));
    }
}

fn fit(image: RgbImage, resolution: Resolution) -> RgbImage {
    let (w, h) = resolution.dimensions();
    if image.dimensions() == (w, h) {
        image
    } else {
        imageops::resize(&image, w, h, FilterType::Triangle)
    }
}

struct Worker<G> {
    feed: usize,
    grabber: G,
    open: bool,
    lost_reported: bool,
    tx: mpsc::Sender<FeedMessage>,
}

impl<G: FrameGrabber> Worker<G> {
    fn event(&self, kind: EventKind, msg: impl Into<String>) -> bool {
        let ev = StationEvent::new(EventSource::Camera(self.feed), kind, msg);
        self.tx.blocking_send(FeedMessage::Event(ev)).is_ok()
    }

    fn placeholder(&self, resolution: Resolution) {
        match no_signal(resolution) {
            Ok(image) => {
                let _ = self.tx.try_send(FeedMessage::Frame { feed: self.feed, image });
            }
            Err(e) => debug!(feed = self.feed, "placeholder: {e:#}"),
        }
    }

    fn release(&mut self) {
        if self.open {
            self.grabber.release();
            self.open = false;
            debug!(feed = self.feed, "camera released");
        }
    }

    fn lost(&mut self, err: &anyhow::Error) -> bool {
        self.release();
        if self.lost_reported {
            return true;
        }
        self.lost_reported = true;
        warn!(feed = self.feed, "camera lost: {err:#}");
        self.event(EventKind::DeviceLost, format!("{err:#}"))
    }
}

/// Spawn the capture loop for one feed. The worker exits when the station
/// `stop` flag is set, when [`FeedHandle::shutdown`] is called, or when the
/// returned handle and all its clones are dropped.
pub fn spawn_camera_worker<G>(
    feed: usize,
    grabber: G,
    cfg: CameraWorkerConfig,
    initial: FeedSettings,
    tx: mpsc::Sender<FeedMessage>,
    stop: Arc<AtomicBool>,
) -> (FeedHandle, tokio::task::JoinHandle<()>)
where
    G: FrameGrabber + 'static,
{
    let (settings_tx, mut settings_rx) = watch::channel(initial);
    let handle = FeedHandle {
        feed,
        settings: Arc::new(settings_tx),
        running: Arc::new(AtomicBool::new(true)),
        capture: Arc::new(AtomicBool::new(false)),
        reset: Arc::new(AtomicBool::new(false)),
        shutdown: Arc::new(AtomicBool::new(false)),
    };
    let running = handle.running.clone();
    let capture = handle.capture.clone();
    let reset = handle.reset.clone();
    let stop = StopFlags { station: stop, feed: handle.shutdown.clone() };

    let join = tokio::task::spawn_blocking(move || {
        let period = Duration::from_secs_f64(1.0 / f64::from(cfg.target_fps.max(1)));
        let backoff = Duration::from_millis(cfg.reconnect_ms);
        let mut current = settings_rx.borrow_and_update().clone();
        let mut task = current.task.map(VisionTask::new);
        let mut w = Worker { feed, grabber, open: false, lost_reported: false, tx };

        while !stop.raised() {
            match settings_rx.has_changed() {
                Ok(true) => {
                    let next = settings_rx.borrow_and_update().clone();
                    if !next.same_device(&current) {
                        w.release();
                        w.lost_reported = false;
                    }
                    if next.task != current.task {
                        info!(feed, task = ?next.task, "vision task changed");
                        task = next.task.map(VisionTask::new);
                    }
                    current = next;
                }
                Ok(false) => {}
                Err(_) => break,
            }

            let source = match (&current.source, current.enabled, running.load(Ordering::Relaxed)) {
                (Some(src), true, true) => src.clone(),
                _ => {
                    w.release();
                    w.placeholder(current.resolution);
                    nap(backoff, &stop);
                    continue;
                }
            };

            if !w.open {
                match w.grabber.open(&source, current.resolution) {
                    Ok(()) => {
                        w.open = true;
                        w.lost_reported = false;
                        info!(feed, %source, "camera open");
                        if !w.event(EventKind::Connected, source.to_string()) {
                            break;
                        }
                    }
                    Err(e) => {
                        if !w.lost(&e) {
                            break;
                        }
                        w.placeholder(current.resolution);
                        nap(backoff, &stop);
                        continue;
                    }
                }
            }

            let t0 = Instant::now();
            let frame = match w.grabber.grab() {
                Ok(f) => fit(f, current.resolution),
                Err(e) => {
                    if !w.lost(&e) {
                        break;
                    }
                    w.placeholder(current.resolution);
                    nap(backoff, &stop);
                    continue;
                }
            };

            if reset.swap(false, Ordering::Relaxed) {
                if let Some(t) = task.as_mut() {
                    t.reset();
                    info!(feed, task = ?t.kind(), "vision task reset");
                }
            }
            if capture.swap(false, Ordering::Relaxed) {
                match task.as_mut() {
                    Some(t) if t.request_capture() => {}
                    _ => debug!(feed, "capture request ignored"),
                }
            }

            let (image, data) = match task.as_mut() {
                Some(t) => match t.process(frame) {
                    Ok(out) => out,
                    Err(e) => {
                        debug!(feed, "vision task: {e:#}");
                        continue;
                    }
                },
                None => (frame, None),
            };
            // frames are dropped when the consumer lags
            let _ = w.tx.try_send(FeedMessage::Frame { feed, image });
            if let Some(data) = data {
                if w.tx.blocking_send(FeedMessage::TaskData { feed, data }).is_err() {
                    break;
                }
            }

            if let Some(rest) = period.checked_sub(t0.elapsed()) {
                std::thread::sleep(rest);
            }
        }
        w.release();
        debug!(feed, "camera worker exit");
    });
    (handle, join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use image::Rgb;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Script {
        opens: usize,
        grabs: usize,
        fail_after: Option<usize>,
        refuse_open: bool,
    }

    struct Synthetic(Arc<Mutex<Script>>);

    impl FrameGrabber for Synthetic {
        fn open(&mut self, _source: &CameraSource, _resolution: Resolution) -> Result<()> {
            let mut s = self.0.lock().unwrap();
            if s.refuse_open {
                bail!("no such device");
            }
            s.opens += 1;
            Ok(())
        }

        fn grab(&mut self) -> Result<RgbImage> {
            let mut s = self.0.lock().unwrap();
            s.grabs += 1;
            if s.fail_after == Some(s.grabs) {
                s.fail_after = None;
                bail!("stream ended");
            }
            Ok(RgbImage::from_pixel(320, 180, Rgb([10, 200, 30])))
        }

        fn release(&mut self) {}
    }

    fn usb_feed() -> FeedSettings {
        FeedSettings {
            source: Some(CameraSource::Usb(0)),
            resolution: Resolution::R256x144,
            enabled: true,
            task: None,
        }
    }

    fn fast() -> CameraWorkerConfig {
        CameraWorkerConfig { target_fps: 200, reconnect_ms: 30 }
    }

    async fn next(rx: &mut mpsc::Receiver<FeedMessage>) -> FeedMessage {
        tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("worker went quiet")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn frames_arrive_at_feed_resolution() {
        let script = Arc::new(Mutex::new(Script::default()));
        let (tx, mut rx) = mpsc::channel(16);
        let stop = Arc::new(AtomicBool::new(false));
        let (handle, join) = spawn_camera_worker(2, Synthetic(script.clone()), fast(), usb_feed(), tx, stop.clone());

        match next(&mut rx).await {
            FeedMessage::Event(ev) => {
                assert_eq!(ev.kind, EventKind::Connected);
                assert_eq!(ev.source, EventSource::Camera(2));
            }
            other => panic!("expected connect event, got {other:?}"),
        }
        match next(&mut rx).await {
            FeedMessage::Frame { feed, image } => {
                assert_eq!(feed, 2);
                assert_eq!(image.dimensions(), (256, 144));
                let px = image.get_pixel(10, 10).0;
                assert!(px[1] >= 199 && px[0] <= 11, "resized colour drifted: {px:?}");
            }
            other => panic!("expected frame, got {other:?}"),
        }

        handle.shutdown();
        join.await.unwrap();
        assert_eq!(script.lock().unwrap().opens, 1);
    }

    #[tokio::test]
    async fn read_failure_reconnects() {
        let script = Arc::new(Mutex::new(Script { fail_after: Some(2), ..Script::default() }));
        let (tx, mut rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let (_handle, join) = spawn_camera_worker(0, Synthetic(script.clone()), fast(), usb_feed(), tx, stop.clone());

        let mut kinds = Vec::new();
        while kinds.len() < 3 {
            if let FeedMessage::Event(ev) = next(&mut rx).await {
                kinds.push(ev.kind);
            }
        }
        assert_eq!(kinds, vec![EventKind::Connected, EventKind::DeviceLost, EventKind::Connected]);

        stop.store(true, Ordering::Relaxed);
        join.await.unwrap();
        assert_eq!(script.lock().unwrap().opens, 2);
    }

    #[tokio::test]
    async fn disabled_feed_shows_placeholder() {
        let script = Arc::new(Mutex::new(Script::default()));
        let (tx, mut rx) = mpsc::channel(16);
        let stop = Arc::new(AtomicBool::new(false));
        let settings = FeedSettings { enabled: false, ..usb_feed() };
        let (handle, join) = spawn_camera_worker(1, Synthetic(script.clone()), fast(), settings, tx, stop);

        match next(&mut rx).await {
            FeedMessage::Frame { image, .. } => assert_eq!(image, no_signal(Resolution::R256x144).unwrap()),
            other => panic!("expected placeholder, got {other:?}"),
        }
        assert_eq!(script.lock().unwrap().opens, 0);

        handle.shutdown();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn open_failure_reported_once() {
        let script = Arc::new(Mutex::new(Script { refuse_open: true, ..Script::default() }));
        let (tx, mut rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let (handle, join) = spawn_camera_worker(3, Synthetic(script), fast(), usb_feed(), tx, stop);

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.shutdown();
        join.await.unwrap();

        let mut lost = 0;
        while let Ok(msg) = rx.try_recv() {
            if let FeedMessage::Event(ev) = msg {
                assert_eq!(ev.kind, EventKind::DeviceLost);
                lost += 1;
            }
        }
        assert_eq!(lost, 1);
    }

    #[tokio::test]
    async fn mosaic_capture_emits_snapshot() {
        let script = Arc::new(Mutex::new(Script::default()));
        let (tx, mut rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let settings = FeedSettings { task: Some(TaskKind::Mosaic), ..usb_feed() };
        let (handle, join) = spawn_camera_worker(0, Synthetic(script), fast(), settings, tx, stop);

        handle.request_capture();
        let snap = loop {
            if let FeedMessage::TaskData { data, .. } = next(&mut rx).await {
                break data;
            }
        };
        match snap {
            TaskData::MosaicSnapshot { index, image } => {
                assert_eq!(index, 0);
                assert_eq!(image.dimensions(), (256, 144));
            }
            other => panic!("unexpected task data {other:?}"),
        }

        handle.shutdown();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn task_change_keeps_device_open() {
        let script = Arc::new(Mutex::new(Script::default()));
        let (tx, mut rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let (handle, join) = spawn_camera_worker(0, Synthetic(script.clone()), fast(), usb_feed(), tx, stop);

        while !matches!(next(&mut rx).await, FeedMessage::Frame { .. }) {}
        handle.set_task(Some(TaskKind::TransectLine));
        let steering = loop {
            if let FeedMessage::TaskData { data: TaskData::Steering(s), .. } = next(&mut rx).await {
                break s;
            }
        };
        assert_eq!(steering.angle, 90);
        assert_eq!(handle.settings().task, Some(TaskKind::TransectLine));

        handle.shutdown();
        join.await.unwrap();
        assert_eq!(script.lock().unwrap().opens, 1);
    }

    #[tokio::test]
    async fn pause_and_resolution_change_reopen() {
        let script = Arc::new(Mutex::new(Script::default()));
        let (tx, mut rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let (handle, join) = spawn_camera_worker(0, Synthetic(script.clone()), fast(), usb_feed(), tx, stop);

        while !matches!(next(&mut rx).await, FeedMessage::Frame { .. }) {}
        handle.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.start();
        handle.update(FeedSettings { resolution: Resolution::R640x360, ..usb_feed() });

        let image = loop {
            if let FeedMessage::Frame { image, .. } = next(&mut rx).await {
                if image.dimensions() == (640, 360) {
                    break image;
                }
            }
        };
        assert_ne!(image, no_signal(Resolution::R640x360).unwrap());

        handle.shutdown();
        join.await.unwrap();
        assert!(script.lock().unwrap().opens >= 2);
    }

    #[tokio::test]
    async fn feed_shutdown_leaves_station_flag_alone() {
        let script = Arc::new(Mutex::new(Script::default()));
        let (tx, mut rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let (first, first_join) = spawn_camera_worker(0, Synthetic(script.clone()), fast(), usb_feed(), tx.clone(), stop.clone());
        let (_second, second_join) = spawn_camera_worker(1, Synthetic(script), fast(), usb_feed(), tx, stop.clone());

        first.shutdown();
        first_join.await.unwrap();
        assert!(!stop.load(Ordering::Relaxed));

        // the other feed keeps delivering
        while rx.try_recv().is_ok() {}
        let feed = loop {
            if let FeedMessage::Frame { feed, .. } = next(&mut rx).await {
                break feed;
            }
        };
        assert_eq!(feed, 1);

        stop.store(true, Ordering::Relaxed);
        second_join.await.unwrap();
    }

    #[tokio::test]
    async fn task_reset_restarts_mosaic_numbering() {
        let script = Arc::new(Mutex::new(Script::default()));
        let (tx, mut rx) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let settings = FeedSettings { task: Some(TaskKind::Mosaic), ..usb_feed() };
        let (handle, join) = spawn_camera_worker(0, Synthetic(script), fast(), settings, tx, stop);

        let mut indices = Vec::new();
        for round in 0..3 {
            if round == 2 {
                handle.reset_task();
            }
            handle.request_capture();
            loop {
                if let FeedMessage::TaskData { data: TaskData::MosaicSnapshot { index, .. }, .. } = next(&mut rx).await {
                    indices.push(index);
                    break;
                }
            }
        }
        assert_eq!(indices, vec![0, 1, 0]);

        handle.shutdown();
        join.await.unwrap();
    }
}
