//! Teleoperation: streaming device input as Cartesian velocity commands
//!
//! A teleoperation session claims the command stream, maps normalized input
//! samples onto clamped velocity setpoints at a fixed rate, and always sends
//! a halt as its final command, whether it ends by request, device
//! disconnect or command failure.

use crate::arbiter::{CommandStreamArbiter, CommandStreamGuard, StreamOwner};
use crate::backend::ActuationBackend;
use crate::config::RobotModel;
use crate::events::{current_timestamp, EventSink, ModeEvent};
use crate::{ArmError, Result};
use async_trait::async_trait;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One reading from an input device, axes normalized to [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct InputSample {
    pub axes: Vec<f64>,
    pub buttons: Vec<bool>,
    pub timestamp: f64,
}

impl InputSample {
    pub fn from_axes(axes: Vec<f64>) -> Self {
        Self {
            axes,
            buttons: Vec::new(),
            timestamp: current_timestamp(),
        }
    }
}

/// A source of teleoperation input (gamepad, spacemouse, haptic rig).
///
/// `start` hands back the sample stream; closing that stream (device
/// unplugged, driver stopped) ends the teleoperation session safely.
#[async_trait]
pub trait InputDevice: Send + Sync {
    async fn start(&self) -> Result<mpsc::Receiver<InputSample>>;
    async fn stop(&self) -> Result<()>;
}

/// Per-session overrides of the model's teleoperation settings.
#[derive(Debug, Clone, Default)]
pub struct TeleopParams {
    pub command_rate_hz: Option<u32>,
    pub max_linear_speed: Option<f64>,
    pub max_angular_speed: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct ResolvedTeleop {
    period: Duration,
    max_linear: f64,
    max_angular: f64,
}

impl ResolvedTeleop {
    fn new(params: &TeleopParams, model: &RobotModel) -> Result<Self> {
        let config = model.teleop();
        let rate = params
            .command_rate_hz
            .unwrap_or_else(|| config.command_rate_hz());
        if rate == 0 {
            return Err(ArmError::Config(
                "teleop command rate must be positive".to_string(),
            ));
        }
        let max_linear = params
            .max_linear_speed
            .unwrap_or_else(|| config.max_linear_speed());
        let max_angular = params
            .max_angular_speed
            .unwrap_or_else(|| config.max_angular_speed());
        if max_linear < 0.0 || max_angular < 0.0 {
            return Err(ArmError::Config(
                "teleop speed caps must be non-negative".to_string(),
            ));
        }
        Ok(Self {
            period: Duration::from_secs_f64(1.0 / rate as f64),
            max_linear,
            max_angular,
        })
    }
}

fn map_sample(sample: &InputSample, limits: &ResolvedTeleop) -> [f64; 6] {
    let mut twist = [0.0; 6];
    for (i, value) in twist.iter_mut().enumerate() {
        let axis = sample.axes.get(i).copied().unwrap_or(0.0).clamp(-1.0, 1.0);
        let cap = if i < 3 {
            limits.max_linear
        } else {
            limits.max_angular
        };
        *value = axis * cap;
    }
    twist
}

struct ActiveSession {
    id: Uuid,
    link: String,
    device: Arc<dyn InputDevice>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the {Idle, Active} teleoperation state machine.
pub struct TeleopArbiter {
    model: Arc<RobotModel>,
    backend: Arc<dyn ActuationBackend>,
    arbiter: CommandStreamArbiter,
    events: Arc<dyn EventSink>,
    session: Mutex<Option<ActiveSession>>,
}

impl TeleopArbiter {
    pub fn new(
        model: Arc<RobotModel>,
        backend: Arc<dyn ActuationBackend>,
        arbiter: CommandStreamArbiter,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            model,
            backend,
            arbiter,
            events,
            session: Mutex::new(None),
        }
    }

    /// Begin streaming `device` input to `link`.
    ///
    /// Fails with `ModeConflict` while an execution or another teleop
    /// session holds the command stream.
    pub async fn start_teleop(
        &self,
        device: Arc<dyn InputDevice>,
        link: &str,
        params: TeleopParams,
    ) -> Result<Uuid> {
        self.model.ensure_link(link)?;
        let limits = ResolvedTeleop::new(&params, &self.model)?;

        let mut slot = self.session.lock().await;
        // A session whose device vanished has already halted and released
        // the stream; clean up its remains before judging conflicts.
        if slot.as_ref().map(|s| s.task.is_finished()).unwrap_or(false) {
            if let Some(stale) = slot.take() {
                Self::reap(stale).await;
            }
        }
        if slot.is_some() {
            return Err(ArmError::ModeConflict {
                held_by: StreamOwner::Teleop,
                requested: StreamOwner::Teleop,
            });
        }

        let guard = self.arbiter.try_acquire(StreamOwner::Teleop)?;
        let samples = device.start().await?;

        let id = Uuid::new_v4();
        let (stop_tx, stop_rx) = watch::channel(false);
        if let Err(e) = self
            .events
            .publish_mode(&ModeEvent::teleop_started(id, link))
            .await
        {
            warn!("Failed to publish mode event: {}", e);
        }
        let task = tokio::spawn(stream_commands(
            self.backend.clone(),
            self.events.clone(),
            guard,
            samples,
            stop_rx,
            id,
            link.to_string(),
            limits,
        ));
        *slot = Some(ActiveSession {
            id,
            link: link.to_string(),
            device,
            stop_tx,
            task,
        });
        info!("Teleoperation active on '{}' (session {})", link, id);
        Ok(id)
    }

    /// End the active session, if any.
    ///
    /// Always succeeds: by the time this returns the robot has been halted
    /// and the command stream released. Calling it while idle is a no-op.
    pub async fn stop_teleop(&self) -> Result<()> {
        let mut slot = self.session.lock().await;
        let Some(session) = slot.take() else {
            debug!("Teleoperation stop requested with no active session");
            return Ok(());
        };
        let _ = session.stop_tx.send(true);
        let id = session.id;
        Self::reap(session).await;
        info!("Teleoperation stopped (session {})", id);
        Ok(())
    }

    pub async fn is_active(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| !s.task.is_finished())
            .unwrap_or(false)
    }

    pub async fn active_session(&self) -> Option<(Uuid, String)> {
        self.session
            .lock()
            .await
            .as_ref()
            .filter(|s| !s.task.is_finished())
            .map(|s| (s.id, s.link.clone()))
    }

    async fn reap(session: ActiveSession) {
        if let Err(e) = session.task.await {
            warn!("Teleop task join failed: {}", e);
        }
        if let Err(e) = session.device.stop().await {
            warn!("Input device stop failed: {}", e);
        }
    }
}

enum ExitCause {
    StopRequested,
    DeviceClosed,
    CommandFailed,
}

#[allow(clippy::too_many_arguments)]
async fn stream_commands(
    backend: Arc<dyn ActuationBackend>,
    events: Arc<dyn EventSink>,
    guard: CommandStreamGuard,
    mut samples: mpsc::Receiver<InputSample>,
    mut stop_rx: watch::Receiver<bool>,
    id: Uuid,
    link: String,
    limits: ResolvedTeleop,
) {
    let mut interval = tokio::time::interval(limits.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut twist = [0.0f64; 6];

    let cause = loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                match changed {
                    Ok(()) if *stop_rx.borrow() => break ExitCause::StopRequested,
                    Ok(()) => {}
                    Err(_) => break ExitCause::StopRequested,
                }
            }
            sample = samples.recv() => {
                match sample {
                    Some(sample) => twist = map_sample(&sample, &limits),
                    None => break ExitCause::DeviceClosed,
                }
            }
            _ = interval.tick() => {
                if let Err(e) = backend.send_velocity(&link, twist).await {
                    error!("Teleop session {} command failed: {}", id, e);
                    break ExitCause::CommandFailed;
                }
            }
        }
    };

    // The final command on the stream is always a halt.
    if let Err(e) = backend.halt().await {
        warn!("Failed to halt after teleoperation: {}", e);
    }
    if let ExitCause::DeviceClosed = cause {
        info!("Teleop session {} input stream ended", id);
    }
    if let Err(e) = events.publish_mode(&ModeEvent::teleop_stopped(id)).await {
        warn!("Failed to publish mode event: {}", e);
    }
    drop(guard);
}

/// Input device that replays a fixed sample sequence.
///
/// With `hold_open` the stream stays alive after the last sample, which
/// also makes it a stand-in for rigs with no physical device attached
/// (`ScriptedDevice::idle`).
pub struct ScriptedDevice {
    samples: Vec<InputSample>,
    interval: Duration,
    hold_open: bool,
    live: std::sync::Mutex<Option<mpsc::Sender<InputSample>>>,
}

impl ScriptedDevice {
    pub fn new(samples: Vec<InputSample>, interval: Duration) -> Self {
        Self {
            samples,
            interval,
            hold_open: false,
            live: std::sync::Mutex::new(None),
        }
    }

    /// A device that never reports input; the session idles until stopped.
    pub fn idle() -> Self {
        Self::new(Vec::new(), Duration::from_millis(10)).hold_open()
    }

    /// Keep the sample stream open after the script runs out.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

#[async_trait]
impl InputDevice for ScriptedDevice {
    async fn start(&self) -> Result<mpsc::Receiver<InputSample>> {
        let (tx, rx) = mpsc::channel(32);
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) =
            self.hold_open.then(|| tx.clone());
        let samples = self.samples.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            for sample in samples {
                if tx.send(sample).await.is_err() {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });
        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}
