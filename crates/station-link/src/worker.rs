use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use station_proto::frame::THRUSTER_COUNT;
use station_proto::{EventKind, EventSource, Frame, StationEvent};

use crate::autodetect::DiscoveryResult;
use crate::link::SerialLink;
use crate::port::PortOpener;
use crate::state::{LinkState, LinkStatus};

const COMMAND_QUEUE: usize = 32;

#[derive(Debug)]
pub enum LinkCommand {
    Connect,
    Disconnect,
    Send(Frame),
    Request { frame: Frame, reply: oneshot::Sender<Option<String>> },
}

#[derive(Debug, Clone)]
pub enum LinkMessage {
    Scan(DiscoveryResult),
    Event(StationEvent),
}

/// Cloneable front for the link worker.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    tx: mpsc::Sender<LinkCommand>,
    status: watch::Receiver<LinkStatus>,
}

impl LinkHandle {
    pub async fn connect(&self) -> bool {
        self.tx.send(LinkCommand::Connect).await.is_ok()
    }

    pub async fn disconnect(&self) -> bool {
        self.tx.send(LinkCommand::Disconnect).await.is_ok()
    }

    /// Hand a frame to the worker without waiting. A full queue drops the
    /// frame; the next tick supersedes it.
    pub fn send(&self, frame: Frame) -> bool {
        match self.tx.try_send(LinkCommand::Send(frame)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(LinkCommand::Send(f))) => {
                debug!("link busy, dropped {f}");
                false
            }
            Err(_) => false,
        }
    }

    /// Round-trip through the worker, bounded by `timeout`.
    pub async fn request(&self, frame: Frame, timeout: Duration) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(LinkCommand::Request { frame, reply }).await.ok()?;
        tokio::time::timeout(timeout, rx).await.ok()?.ok()?
    }

    /// Status as of the last command the worker finished. Never waits.
    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }
}

fn event(kind: EventKind, msg: impl Into<String>) -> LinkMessage {
    LinkMessage::Event(StationEvent::new(EventSource::Link, kind, msg))
}

/// Collapse a run of queued thruster frames into the newest one. The first
/// other command met is handed back so it runs next, in order.
fn newest_thrusters(
    mut speeds: [u16; THRUSTER_COUNT],
    rx: &mut mpsc::Receiver<LinkCommand>,
) -> ([u16; THRUSTER_COUNT], usize, Option<LinkCommand>) {
    let mut skipped = 0;
    loop {
        match rx.try_recv() {
            Ok(LinkCommand::Send(Frame::Thrusters(next))) => {
                speeds = next;
                skipped += 1;
            }
            Ok(other) => return (speeds, skipped, Some(other)),
            Err(_) => return (speeds, skipped, None),
        }
    }
}

/// Start the only owner of the serial device. Commands are served in arrival
/// order, except that stale thruster frames are skipped.
pub fn spawn_link_worker<O>(
    mut link: SerialLink<O>,
    tx: mpsc::Sender<LinkMessage>,
    stop: Arc<AtomicBool>,
) -> (LinkHandle, tokio::task::JoinHandle<()>)
where
    O: PortOpener + 'static,
{
    let (cmd_tx, mut rx) = mpsc::channel(COMMAND_QUEUE);
    let (status_tx, status_rx) = watch::channel(link.status().clone());
    let handle = LinkHandle { tx: cmd_tx, status: status_rx };

    let join = tokio::task::spawn_blocking(move || {
        let mut degraded = false;
        let mut held: Option<LinkCommand> = None;

        while !stop.load(Ordering::Relaxed) {
            let cmd = match held.take().map_or_else(|| rx.try_recv(), Ok) {
                Ok(cmd) => cmd,
                Err(mpsc::error::TryRecvError::Empty) => {
                    // Light sleep to avoid busy loop
                    std::thread::sleep(Duration::from_millis(2));
                    continue;
                }
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            };

            let out = match cmd {
                LinkCommand::Connect => {
                    status_tx.send_modify(|s| s.state = LinkState::Scanning);
                    let res = link.connect();
                    let _ = tx.blocking_send(LinkMessage::Scan(link.last_scan().clone()));
                    degraded = false;
                    match res {
                        Ok(port) => {
                            info!(port = %port, "ROV link up");
                            Some(event(EventKind::Connected, port))
                        }
                        Err(e) => {
                            warn!("ROV not found: {e}");
                            Some(event(EventKind::Disconnected, e.to_string()))
                        }
                    }
                }
                LinkCommand::Disconnect => {
                    link.forget();
                    Some(event(EventKind::Disconnected, "disconnected by user"))
                }
                LinkCommand::Send(Frame::Thrusters(speeds)) => {
                    let (speeds, skipped, next) = newest_thrusters(speeds, &mut rx);
                    if skipped > 0 {
                        debug!(skipped, "stale thruster frames skipped");
                    }
                    held = next;
                    let frame = Frame::Thrusters(speeds);
                    let ok = link.send(&frame);
                    track(&mut degraded, ok, &frame)
                }
                LinkCommand::Send(frame) => {
                    let ok = link.send(&frame);
                    track(&mut degraded, ok, &frame)
                }
                LinkCommand::Request { frame, reply } => {
                    let line = link.request(&frame);
                    let ok = line.is_some();
                    let _ = reply.send(line);
                    track(&mut degraded, ok, &frame)
                }
            };
            status_tx.send_replace(link.status().clone());

            if let Some(msg) = out {
                if tx.blocking_send(msg).is_err() {
                    break;
                }
            }
        }
        link.disconnect();
        status_tx.send_replace(link.status().clone());
        debug!("link worker stopped");
    });
    (handle, join)
}

/// Report the first failure of a streak and the first success after it.
fn track(degraded: &mut bool, ok: bool, frame: &Frame) -> Option<LinkMessage> {
    match (ok, *degraded) {
        (false, false) => {
            *degraded = true;
            Some(event(EventKind::CommsDegraded, format!("{frame} failed after retries")))
        }
        (true, true) => {
            *degraded = false;
            Some(event(EventKind::Connected, "comms restored"))
        }
        _ => None,
    }
}
