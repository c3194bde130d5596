//! Background worker: one task per connected device.
//!
//! The worker owns its [`DeviceSession`] outright; callers talk to it only
//! through channels. Inbound commands are drained and de-duplicated each
//! iteration, applied in order, then exactly one blocking acquisition runs
//! and its outcome is published. A poison sentinel terminates the loop after
//! every command ahead of it has been applied, so "disable laser, then shut
//! down" behaves as written. A hardware-fatal condition makes the worker
//! poison itself: it performs the laser safety action, closes the transport
//! and publishes [`WorkerEvent::Poison`] without waiting for the caller.

use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::autoexposure::{AutoExposure, AutoExposureResult};
use crate::command::{dedupe, Command};
use crate::config::DriverSettings;
use crate::eeprom::ConfigurationRecord;
use crate::reading::{AcquireOutcome, Reading};
use crate::session::DeviceSession;
use crate::transport::Transport;

/// Everything the worker publishes on its outbound channel.
#[derive(Debug)]
pub enum WorkerEvent {
    /// One completed measurement.
    Reading(Box<Reading>),
    /// Acquisition produced no data yet; the session is alive.
    KeepAlive,
    /// A non-fatal error; polling continues.
    Error(String),
    /// Result of a [`Command::RunAutoExposure`] run.
    AutoExposure(Box<AutoExposureResult>),
    /// The worker has terminated. Callers must treat this exactly as if
    /// they had requested shutdown themselves.
    Poison,
}

/// Caller-side handle to one worker task.
pub struct WorkerHandle {
    commands: mpsc::UnboundedSender<Command>,
    /// Outbound measurements and status; poll at the caller's own cadence.
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
    snapshot: Option<oneshot::Receiver<Option<Box<ConfigurationRecord>>>>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Enqueue a command; never blocks. Returns false once the worker has
    /// terminated.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// The one-time configuration snapshot published after connect; `None`
    /// when connect failed (or on any call after the first).
    pub async fn configuration(&mut self) -> Option<Box<ConfigurationRecord>> {
        match self.snapshot.take() {
            Some(receiver) => receiver.await.ok().flatten(),
            None => None,
        }
    }

    /// Enqueue the poison sentinel. Commands already enqueued are applied
    /// before the worker terminates.
    pub fn request_shutdown(&self) {
        let _ = self.commands.send(Command::Poison);
    }

    /// Wait for the worker task to finish.
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Spawn a worker for one transport. Connect happens on the worker task; the
/// snapshot channel reports whether it succeeded.
pub fn spawn(transport: Box<dyn Transport>, settings: DriverSettings) -> WorkerHandle {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = oneshot::channel();

    let join = tokio::spawn(run(transport, settings, command_rx, event_tx, snapshot_tx));

    WorkerHandle {
        commands: command_tx,
        events: event_rx,
        snapshot: Some(snapshot_rx),
        join,
    }
}

async fn run(
    transport: Box<dyn Transport>,
    settings: DriverSettings,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    snapshot: oneshot::Sender<Option<Box<ConfigurationRecord>>>,
) {
    let mut session = match DeviceSession::connect(transport, settings.clone()).await {
        Ok(session) => session,
        Err(err) => {
            error!("connect failed: {err}");
            let _ = snapshot.send(None);
            return;
        }
    };
    let _ = snapshot.send(Some(Box::new(session.record().clone())));

    let poll_interval = Duration::from_millis(settings.poll_interval_ms);
    let mut device_count: u32 = 1;

    loop {
        // drain and de-duplicate the inbound queue
        let mut drained = Vec::new();
        let mut channel_closed = false;
        loop {
            match commands.try_recv() {
                Ok(command) => drained.push(command),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    channel_closed = true;
                    break;
                }
            }
        }
        let batch = dedupe(drained);

        let mut poisoned = false;
        let mut fatal = false;
        for command in batch {
            match command {
                Command::Poison => {
                    // no break: commands behind the sentinel still apply, so
                    // a caller can sequence "laser off" ahead of shutdown
                    info!("poison sentinel received");
                    poisoned = true;
                }
                Command::SetConnectedDeviceCount(count) => {
                    device_count = count.max(1);
                }
                Command::RunAutoExposure(request) => {
                    let controller = AutoExposure::new(Duration::from_millis(
                        session.settings().settling_delay_ms,
                    ));
                    match controller.run(&mut session, &request).await {
                        Ok(result) => {
                            let _ = events.send(WorkerEvent::AutoExposure(Box::new(result)));
                        }
                        Err(err) if err.is_fatal() => {
                            error!("auto-exposure failed fatally: {err}");
                            fatal = true;
                            break;
                        }
                        Err(err) => {
                            warn!("auto-exposure failed: {err}");
                            let _ = events.send(WorkerEvent::Error(err.to_string()));
                        }
                    }
                }
                command => {
                    if let Err(err) = session.apply(command).await {
                        if err.is_fatal() {
                            error!("command failed fatally: {err}");
                            fatal = true;
                            break;
                        }
                        warn!("command failed: {err}");
                        let _ = events.send(WorkerEvent::Error(err.to_string()));
                    }
                }
            }
        }

        if channel_closed && !poisoned {
            // caller dropped its handle without sending the sentinel
            warn!("command channel closed; shutting down");
        }
        if poisoned || fatal || channel_closed || session.disconnect_pending() {
            break;
        }

        match session.acquire().await {
            Ok(AcquireOutcome::KeepAlive) => {
                let _ = events.send(WorkerEvent::KeepAlive);
            }
            Ok(AcquireOutcome::Reading(reading)) => {
                if reading.failure.is_some() {
                    // hardware-level failure: poison ourselves
                    error!("reading carries failure marker: {:?}", reading.failure);
                    let _ = events.send(WorkerEvent::Reading(reading));
                    break;
                }
                debug!("publishing reading {}", reading.session_count);
                let _ = events.send(WorkerEvent::Reading(reading));
            }
            Err(err) if err.is_fatal() => {
                error!("acquisition failed fatally: {err}");
                break;
            }
            Err(err) => {
                warn!("acquisition failed: {err}");
                let _ = events.send(WorkerEvent::Error(err.to_string()));
            }
        }

        // bound aggregate bus contention across concurrently managed devices
        tokio::time::sleep(poll_interval * device_count).await;
    }

    session.shutdown().await;
    let _ = events.send(WorkerEvent::Poison);
    info!("worker terminated");
}
