mod config;
mod console;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use station_control::gamepad::{spawn_gamepad_worker, GamepadReader};
use station_control::{GamepadMessage, GamepadWorkerConfig, GilrsBackend, PilotSession, Stopwatch};
use station_link::autodetect::discover;
use station_link::sensor::{spawn_sensor_poller, SensorMessage, SensorType};
use station_link::{spawn_link_worker, LinkHandle, LinkMessage, SerialLink, SystemPorts};
use station_profile::{doctor as profile_doctor, Profile, ProfileStore, FEEDS};
use station_proto::frame::{NEUTRAL_US, THRUSTER_COUNT};
use station_proto::{Frame, StationEvent};
use station_vision::{spawn_camera_worker, FeedHandle, FeedMessage, FfmpegGrabber, Steering, TaskData};

use config::{load_config, Config};
use console::{ConsoleCommand, Switch, TimerAction};

#[derive(Debug, Parser)]
#[command(name = "station", version, about = "Avalon ROV surface station")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the station config and the pilot profile.
    Doctor,
    /// Probe serial ports for the ROV identity.
    Ports,
    /// List connected gamepads.
    Gamepads,
    Run,
    Thruster { #[command(subcommand)] cmd: ThrusterCmd },
    Profile { #[command(subcommand)] cmd: ProfileCmd },
}

#[derive(Debug, Subcommand)]
enum ThrusterCmd {
    /// Spin one channel, then return every thruster to neutral.
    Test {
        #[arg(long)]
        channel: usize,
        #[arg(long, default_value_t = 10)]
        percent: u8,
        #[arg(long, default_value_t = 2000)]
        hold_ms: u64,
    },
}

#[derive(Debug, Subcommand)]
enum ProfileCmd {
    Show,
    /// Write a default profile to the configured path.
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the JSON event stream
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Ports => ports(&cfg).await?,
        Command::Gamepads => gamepads(&cfg)?,
        Command::Run => run(&cfg).await?,
        Command::Thruster { cmd } => thruster_cmd(&cfg, cmd).await?,
        Command::Profile { cmd } => profile_cmd(&cfg, cmd)?,
    }
    Ok(())
}

fn store(cfg: &Config) -> ProfileStore {
    ProfileStore::new(&cfg.profile.path)
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    config::check(cfg)?;

    let store = store(cfg);
    if store.exists() {
        let profile = store.load()?;
        profile_doctor::check_profile(&profile)?;
    } else {
        warn!(path = %store.path().display(), "profile missing; `station profile init` writes a default one");
    }

    info!("doctor: OK");
    Ok(())
}

async fn ports(cfg: &Config) -> Result<()> {
    let serial = cfg.serial.clone();
    let res = tokio::task::spawn_blocking(move || {
        let hs = SerialLink::new(SystemPorts, serial.clone()).handshake_config();
        discover(&SystemPorts, serial.candidate_ports.as_deref(), &hs).0
    })
    .await?;

    match &res.chosen {
        Some(port) => println!("CHOSEN: {port}"),
        None => println!("CHOSEN: none"),
    }
    for p in res.probes {
        println!("probe port={} matched={} {}ms note={}", p.port, p.matched, p.elapsed_ms, p.note);
    }
    Ok(())
}

fn gamepads(cfg: &Config) -> Result<()> {
    let mut reader = GamepadReader::new(GilrsBackend::new()?);
    let devices = reader.enumerate();
    if devices.is_empty() {
        println!("no gamepads");
    }
    for d in devices {
        let mark = if d.identity == cfg.gamepad.identity { " (configured)" } else { "" };
        println!("#{} {}{mark}", d.index, d.identity);
    }
    Ok(())
}

fn profile_cmd(cfg: &Config, cmd: ProfileCmd) -> Result<()> {
    let store = store(cfg);
    match cmd {
        ProfileCmd::Show => {
            let p = store.load()?;
            print_profile(&p);
        }
        ProfileCmd::Init { force } => {
            anyhow::ensure!(force || !store.exists(), "{} already exists (use --force)", store.path().display());
            store.save(&Profile::default())?;
            info!(path = %store.path().display(), "profile: initialized");
        }
    }
    Ok(())
}

fn print_profile(p: &Profile) {
    println!("theme={:?}", p.theme);
    let t = &p.thrusters;
    println!(
        "sensitivity={:.2} yaw_sensitivity={:.2} orientation={:?}",
        t.joystick_sensitivity.value(),
        t.yaw_sensitivity.value(),
        t.orientation
    );
    for (i, ch) in t.channels.iter().enumerate() {
        let slot = ch.slot.map_or("None".to_string(), |s| s.to_string());
        println!("thruster{i} slot={slot} reversed={}", ch.reverse);
    }
    for (i, a) in p.actuators.actuators.iter().enumerate() {
        println!("actuator{i} {:?} off={:?} on={:?}", a.name, a.off, a.on);
    }
    for (i, s) in p.sensors.types.iter().enumerate() {
        println!("sensor{i} {}", s.label());
    }
    for (i, f) in p.feed_settings().iter().enumerate() {
        let src = f.source.as_ref().map_or("none".to_string(), |s| s.to_string());
        let (w, h) = f.resolution.dimensions();
        println!("feed{i} source={src} enabled={} {w}x{h}", f.enabled);
    }
    for (control, button) in p.keybindings.iter() {
        println!("{} = {}", control.tag(), button.map_or("None", |b| b.token()));
    }
}

async fn thruster_cmd(cfg: &Config, cmd: ThrusterCmd) -> Result<()> {
    let ThrusterCmd::Test { channel, percent, hold_ms } = cmd;
    anyhow::ensure!(channel < THRUSTER_COUNT, "channel must be 0..{}", THRUSTER_COUNT - 1);
    anyhow::ensure!((1..=100).contains(&percent), "percent must be 1..=100");

    let profile = store(cfg).load_or_default()?;
    let serial = cfg.serial.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut link = SerialLink::new(SystemPorts, serial);
        let port = link.connect()?;
        info!(%port, channel, percent, "thruster test");

        let mut session = PilotSession::new(profile.thrusters, profile.keybindings, profile.actuators.len());
        let frame = session.begin_test(channel, percent);
        println!("{frame}");
        anyhow::ensure!(link.send(&frame), "test frame not delivered");
        std::thread::sleep(Duration::from_millis(hold_ms));
        let neutral = session.end_test();
        anyhow::ensure!(link.send(&neutral), "neutral frame not delivered");
        println!("{neutral}");
        Ok(())
    })
    .await?
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Output<'a> {
    Event(&'a StationEvent),
    Sensors { ts_unix_ms: i64, readings: Vec<SensorOut> },
    Steering { feed: usize, steering: &'a Steering },
    Snapshot { feed: usize, index: usize, path: String },
    Stats { frames: [u64; FEEDS], frames_sent: u64, failed_frames: u64, connected: bool, timer: String },
    Timer { running: bool, elapsed: String },
}

#[derive(Serialize)]
struct SensorOut {
    label: &'static str,
    value: Option<f64>,
}

fn emit(out: &Output<'_>) {
    match serde_json::to_string(out) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!("event not serializable: {e}"),
    }
}

fn save_snapshot(dir: &Path, feed: usize, index: usize, image: &image::RgbImage) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(format!("feed{feed}_{index}.png"));
    image.save(&path).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");
    config::check(cfg)?;

    let profile = store(cfg).load_or_default()?;
    if let Err(e) = profile_doctor::check_profile(&profile) {
        warn!("profile has problems: {e:#}");
    }
    let stop = Arc::new(AtomicBool::new(false));
    let mut joins = Vec::new();

    // Serial link: one worker owns the port
    let (link_tx, mut link_rx) = mpsc::channel(64);
    let (link, join) = spawn_link_worker(SerialLink::new(SystemPorts, cfg.serial.clone()), link_tx, stop.clone());
    joins.push(join);
    link.connect().await;

    let (sensor_tx, mut sensor_rx) = mpsc::channel(16);
    joins.push(spawn_sensor_poller(link.clone(), cfg.sensors.poller(), sensor_tx, stop.clone()));

    let (pad_tx, mut pad_rx) = mpsc::channel(8);
    let pad_cfg = GamepadWorkerConfig {
        identity: cfg.gamepad.identity.clone(),
        poll_hz: cfg.gamepad.poll_hz,
        rebind_interval: Duration::from_millis(cfg.gamepad.rebind_ms),
    };
    joins.push(spawn_gamepad_worker(GilrsBackend::new, pad_cfg, pad_tx, stop.clone()));

    let (feed_tx, mut feed_rx) = mpsc::channel(16);
    let mut feeds: Vec<FeedHandle> = Vec::with_capacity(FEEDS);
    for (i, mut settings) in profile.feed_settings().into_iter().enumerate() {
        settings.task = cfg.task_for(i);
        let grabber = FfmpegGrabber::new(&cfg.cameras.ffmpeg).with_stall_timeout(cfg.cameras.stall());
        let (handle, join) =
            spawn_camera_worker(i, grabber, cfg.cameras.worker(), settings, feed_tx.clone(), stop.clone());
        feeds.push(handle);
        joins.push(join);
    }
    drop(feed_tx);

    // operator console; a detached thread so a pending read never holds up exit
    let (console_tx, mut console_rx) = mpsc::channel::<String>(8);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    let mut timer = Stopwatch::default();

    let mut session = PilotSession::new(profile.thrusters.clone(), profile.keybindings.clone(), profile.actuators.len());
    let snapshot_dir = PathBuf::from(&cfg.cameras.snapshot_dir);
    let mut frames = [0u64; FEEDS];
    let mut stats = tokio::time::interval(Duration::from_secs(5));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("run: ctrl-c");
                break;
            }
            Some(msg) = pad_rx.recv() => match msg {
                GamepadMessage::Snapshot(snap) => {
                    for frame in session.on_input(&snap) {
                        link.send(frame);
                    }
                }
                GamepadMessage::Event(ev) => emit(&Output::Event(&ev)),
            },
            Some(msg) = link_rx.recv() => match msg {
                LinkMessage::Scan(scan) => {
                    for p in &scan.probes {
                        info!(port = %p.port, matched = p.matched, elapsed_ms = p.elapsed_ms, "probe: {}", p.note);
                    }
                }
                LinkMessage::Event(ev) => {
                    if ev.kind == station_proto::EventKind::Connected {
                        // bring the actuators in line with the station state
                        link.send(session.actuators().frame());
                    }
                    emit(&Output::Event(&ev));
                }
            },
            Some(msg) = sensor_rx.recv() => match msg {
                SensorMessage::Reading(r) => {
                    let readings = if profile.sensors.types.is_empty() {
                        r.values.iter().map(|v| SensorOut { label: SensorType::None.label(), value: Some(*v) }).collect()
                    } else {
                        r.aligned(&profile.sensors)
                            .into_iter()
                            .map(|(t, value)| SensorOut { label: t.label(), value })
                            .collect()
                    };
                    emit(&Output::Sensors { ts_unix_ms: r.ts_unix_ms, readings });
                }
                SensorMessage::Event(ev) => emit(&Output::Event(&ev)),
            },
            Some(msg) = feed_rx.recv() => match msg {
                FeedMessage::Frame { feed, .. } => {
                    if let Some(n) = frames.get_mut(feed) {
                        *n += 1;
                    }
                }
                FeedMessage::TaskData { feed, data: TaskData::Steering(s) } => {
                    emit(&Output::Steering { feed, steering: &s });
                }
                FeedMessage::TaskData { feed, data: TaskData::MosaicSnapshot { index, image } } => {
                    match save_snapshot(&snapshot_dir, feed, index, &image) {
                        Ok(path) => emit(&Output::Snapshot { feed, index, path: path.display().to_string() }),
                        Err(e) => warn!(feed, "mosaic snapshot lost: {e:#}"),
                    }
                }
                FeedMessage::Event(ev) => emit(&Output::Event(&ev)),
            },
            Some(line) = console_rx.recv() => {
                if line.trim().is_empty() {
                    continue;
                }
                match console::parse(&line) {
                    Ok(ConsoleCommand::Quit) => {
                        info!("run: quit");
                        break;
                    }
                    Ok(cmd) => operate(cmd, &mut session, &link, &feeds, &mut timer),
                    Err(e) => warn!("console: {}", e.to_string().lines().next().unwrap_or_default()),
                }
            }
            _ = stats.tick() => {
                let st = link.status();
                emit(&Output::Stats {
                    frames,
                    frames_sent: st.frames_sent,
                    failed_frames: st.failed_frames,
                    connected: st.is_connected(),
                    timer: timer.display(),
                });
            }
        }
    }

    // leave the ROV drifting in neutral before the link goes away
    link.send(Frame::Thrusters([NEUTRAL_US; THRUSTER_COUNT]));
    tokio::time::sleep(Duration::from_millis(100)).await;

    stop.store(true, Ordering::Relaxed);
    for f in &feeds {
        f.shutdown();
        tracing::debug!(feed = f.feed(), "feed shutdown requested");
    }
    let drained = tokio::time::timeout(Duration::from_secs(1), async {
        for j in joins {
            let _ = j.await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("run: workers still busy after 1s, exiting anyway");
        std::process::exit(0);
    }
    info!("run: stopped");
    Ok(())
}

fn operate(cmd: ConsoleCommand, session: &mut PilotSession, link: &LinkHandle, feeds: &[FeedHandle], timer: &mut Stopwatch) {
    let feed = |i: usize| {
        let f = feeds.get(i);
        if f.is_none() {
            warn!("console: no feed {i} (0..{})", feeds.len());
        }
        f
    };
    match cmd {
        ConsoleCommand::Capture { feed: i } => {
            if let Some(f) = feed(i) {
                f.request_capture();
            }
        }
        ConsoleCommand::Task { feed: i, kind } => {
            if let Some(f) = feed(i) {
                f.set_task(kind.kind());
            }
        }
        ConsoleCommand::Reset { feed: i } => {
            if let Some(f) = feed(i) {
                f.reset_task();
            }
        }
        ConsoleCommand::Feed { feed: i, state } => {
            if let Some(f) = feed(i) {
                match state {
                    Switch::On => f.start(),
                    Switch::Off => f.stop(),
                }
            }
        }
        ConsoleCommand::Toggle { actuator } => match session.toggle_actuator(actuator) {
            Some(frame) => {
                link.send(frame);
            }
            None => warn!("console: no actuator {actuator}"),
        },
        ConsoleCommand::Actuators { states } => {
            match console::parse_states(&states).and_then(|s| session.set_actuators(s)) {
                Some(frame) => {
                    link.send(frame);
                }
                None => warn!(
                    "console: expected {} digits of 0/1, got {states:?}",
                    session.actuators().states().len()
                ),
            }
        }
        ConsoleCommand::Timer { action } => {
            match action {
                TimerAction::Start => timer.start(),
                TimerAction::Stop => timer.stop(),
                TimerAction::Reset => {
                    if !timer.reset() {
                        warn!("console: stop the timer before resetting it");
                    }
                }
            }
            emit(&Output::Timer { running: timer.is_running(), elapsed: timer.display() });
        }
        ConsoleCommand::Quit => {}
    }
}
