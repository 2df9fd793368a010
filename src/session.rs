use crate::buffer::{CaptureBuffer, FrozenCapture};
use crate::clock::{ClockEvent, SessionClock};
use crate::error::{CaptureError, CaptureResult};
use crate::readings::Timebase;
use crate::source::{ReadingSink, SensorSource};
use crate::upload::{Collector, UploadCoordinator, UploadReport};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, waiting for permission
    Idle,
    /// Sensors subscribed and the countdown running
    Capturing,
    /// Countdown expired; buffer frozen
    Finished,
    /// Left early; nothing uploaded
    Cancelled,
}

/// Timing of one capture window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub duration_ticks: u32,
    pub tick_interval: Duration,
    pub event_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_ticks: 10,
            tick_interval: Duration::from_secs(1),
            event_channel_capacity: 500,
        }
    }
}

/// How a session ended
#[derive(Debug)]
pub enum SessionReport {
    Finished {
        capture: FrozenCapture,
        upload: UploadReport,
    },
    Cancelled,
}

impl SessionReport {
    pub fn capture(&self) -> Option<&FrozenCapture> {
        match self {
            SessionReport::Finished { capture, .. } => Some(capture),
            SessionReport::Cancelled => None,
        }
    }

    pub fn upload(&self) -> Option<&UploadReport> {
        match self {
            SessionReport::Finished { upload, .. } => Some(upload),
            SessionReport::Cancelled => None,
        }
    }
}

/// UI-side handle: remaining-time and state signals plus early cancellation.
#[derive(Clone)]
pub struct SessionHandle {
    cancel: Arc<watch::Sender<bool>>,
    remaining: watch::Receiver<u32>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    /// Abandon the capture (e.g. navigating away). Returns `true` only for
    /// the first call.
    pub fn cancel(&self) -> bool {
        self.cancel.send_if_modified(|cancelled| !std::mem::replace(cancelled, true))
    }

    pub fn remaining(&self) -> u32 {
        *self.remaining.borrow()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver for the countdown display
    pub fn watch_remaining(&self) -> watch::Receiver<u32> {
        self.remaining.clone()
    }
}

/// One fixed-duration capture: permission, sampling, freeze, upload.
///
/// Consumed by [`CaptureSession::run`]; a new capture needs a new session.
pub struct CaptureSession<C> {
    config: SessionConfig,
    source: SensorSource,
    coordinator: UploadCoordinator<C>,
    cancel_rx: watch::Receiver<bool>,
    remaining_tx: watch::Sender<u32>,
    state_tx: watch::Sender<SessionState>,
}

impl<C: Collector> CaptureSession<C> {
    pub fn new(
        config: SessionConfig,
        source: SensorSource,
        coordinator: UploadCoordinator<C>,
    ) -> (Self, SessionHandle) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (remaining_tx, remaining_rx) = watch::channel(config.duration_ticks);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let session = CaptureSession {
            config,
            source,
            coordinator,
            cancel_rx,
            remaining_tx,
            state_tx,
        };
        let handle = SessionHandle {
            cancel: Arc::new(cancel_tx),
            remaining: remaining_rx,
            state: state_rx,
        };
        (session, handle)
    }

    /// Drive the session to completion.
    ///
    /// Fails only on permission denial, before any capture happens. Upload
    /// failures are reported inside [`SessionReport::Finished`].
    pub async fn run(self) -> CaptureResult<SessionReport> {
        let CaptureSession {
            config,
            source,
            coordinator,
            mut cancel_rx,
            remaining_tx,
            state_tx,
        } = self;

        if config.duration_ticks == 0 {
            return Err(CaptureError::InvalidState(
                "capture duration must be at least one tick".to_string(),
            ));
        }

        let permission = source.authorize();
        let granted = tokio::select! {
            biased;
            _ = cancelled(&mut cancel_rx) => None,
            granted = permission => Some(granted),
        };
        match granted {
            Some(granted) => granted?,
            None => {
                transition(&state_tx, SessionState::Cancelled);
                return Ok(SessionReport::Cancelled);
            }
        }

        // Sensors and clock start together off one time origin
        let timebase = Timebase::start();
        let mut buffer = CaptureBuffer::new(timebase.now_ms());
        let (event_tx, mut events) = mpsc::channel(config.event_channel_capacity.max(1));
        let mut subscription = source.subscribe(ReadingSink::new(event_tx, timebase));
        let (clock, mut ticks) = SessionClock::start(config.duration_ticks, config.tick_interval);
        transition(&state_tx, SessionState::Capturing);

        let mut sensors_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel_rx) => {
                    subscription.unsubscribe();
                    clock.cancel();
                    let (motion, rotation) = buffer.len();
                    debug!("Discarding {} motion / {} rotation readings", motion, rotation);
                    transition(&state_tx, SessionState::Cancelled);
                    return Ok(SessionReport::Cancelled);
                }
                Some(tick) = ticks.recv() => {
                    if clock.is_cancelled() {
                        continue;
                    }
                    match tick {
                        ClockEvent::Tick { remaining } => {
                            remaining_tx.send_replace(remaining);
                        }
                        ClockEvent::Expired => break,
                    }
                }
                event = events.recv(), if sensors_open => match event {
                    Some(event) if !subscription.is_closed() => buffer.record(event),
                    Some(_) => {}
                    None => {
                        sensors_open = false;
                        debug!("All sensor mechanisms have stopped");
                    }
                },
            }
        }

        // Freeze order: stop the sensors, keep what they already handed
        // over, seal the buffer, then upload
        subscription.unsubscribe();
        let finished_at = timebase.now_ms();
        let mut drained = 0usize;
        while let Ok(event) = events.try_recv() {
            buffer.record(event);
            drained += 1;
        }
        if drained > 0 {
            debug!("Appended {} readings queued at expiry", drained);
        }
        drop(events);
        let capture = buffer.freeze(finished_at);
        transition(&state_tx, SessionState::Finished);

        let (motion, rotation) = (capture.motion().len(), capture.rotation().len());
        info!(
            "Captured {} motion / {} rotation readings via {:?}",
            motion,
            rotation,
            subscription.active_mechanisms()
        );
        if motion == 0 {
            warn!("No motion readings captured; uploading empty payloads");
        }

        let upload = coordinator.deliver(&capture).await;
        Ok(SessionReport::Finished { capture, upload })
    }
}

fn transition(state_tx: &watch::Sender<SessionState>, next: SessionState) {
    let prev = state_tx.send_replace(next);
    info!("Session {:?} → {:?}", prev, next);
}

/// Resolves once cancellation is requested; never if the handle is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UploadError;
    use crate::readings::{DeviceMotionEvent, Vector3};
    use crate::sensors::{SimulatedDeviceMotion, SimulatedStream};
    use crate::source::{Permission, PermissionGate, SensorMechanism};
    use crate::upload::UploadPayload;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::task::JoinHandle;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingCollector {
        sent: Mutex<Vec<(String, usize)>>,
    }

    impl Collector for Arc<RecordingCollector> {
        fn send<'a>(&'a self, payload: &'a UploadPayload<'a>) -> BoxFuture<'a, Result<(), UploadError>> {
            self.sent
                .lock()
                .unwrap()
                .push((payload.sensor.to_string(), payload.data.len()));
            futures::future::ready(Ok(())).boxed()
        }
    }

    struct Unavailable;

    impl SensorMechanism for Unavailable {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        fn start(self: Box<Self>, _sink: crate::source::ReadingSink) -> CaptureResult<JoinHandle<()>> {
            Err(CaptureError::SensorUnavailable("no motion hardware".into()))
        }
    }

    /// Sends one combined event at each offset and counts what the sink accepted
    struct AtOffsets {
        offsets_ms: Vec<u64>,
        accepted: Arc<AtomicUsize>,
    }

    impl SensorMechanism for AtOffsets {
        fn name(&self) -> &'static str {
            "offsets"
        }

        fn start(self: Box<Self>, sink: crate::source::ReadingSink) -> CaptureResult<JoinHandle<()>> {
            Ok(tokio::spawn(async move {
                let started = tokio::time::Instant::now();
                for offset in self.offsets_ms {
                    tokio::time::sleep_until(started + Duration::from_millis(offset)).await;
                    let event = DeviceMotionEvent::new(Vector3::new(0.0, 0.0, 9.81), None);
                    if !sink.combined(event).await {
                        break;
                    }
                    self.accepted.fetch_add(1, Ordering::SeqCst);
                }
            }))
        }
    }

    /// Permission prompt that never answers
    struct PendingPrompt;

    impl PermissionGate for PendingPrompt {
        fn request(&self) -> BoxFuture<'static, Permission> {
            futures::future::pending().boxed()
        }
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            duration_ticks: 10,
            tick_interval: Duration::from_millis(100),
            event_channel_capacity: 64,
        }
    }

    fn session(
        source: SensorSource,
    ) -> (CaptureSession<Arc<RecordingCollector>>, SessionHandle, Arc<RecordingCollector>) {
        let collector = Arc::new(RecordingCollector::default());
        let coordinator = UploadCoordinator::new(Arc::clone(&collector), Uuid::nil());
        let (session, handle) = CaptureSession::new(fast_config(), source, coordinator);
        (session, handle, collector)
    }

    #[tokio::test(start_paused = true)]
    async fn test_combined_path_finishes_aligned() {
        let source = SensorSource::new(Permission::Granted)
            .with_mechanism(SimulatedDeviceMotion::new(Duration::from_millis(16)).dropping_rotation_every(5));
        let (session, handle, collector) = session(source);

        let report = session.run().await.unwrap();
        let capture = report.capture().unwrap();

        assert_eq!(handle.state(), SessionState::Finished);
        assert_eq!(handle.remaining(), 0);
        assert!(!capture.motion().is_empty());
        assert_eq!(capture.motion().len(), capture.rotation().len());

        let times = capture.motion_times();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert!(times.iter().all(|t| *t >= 0.0 && *t <= 1.0));

        assert!(report.upload().unwrap().all_delivered());
        assert_eq!(collector.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readings_accepted_at_expiry_are_kept() {
        let accepted = Arc::new(AtomicUsize::new(0));
        let source = SensorSource::new(Permission::Granted).with_mechanism(AtOffsets {
            offsets_ms: vec![500, 1000],
            accepted: Arc::clone(&accepted),
        });
        let collector = Arc::new(RecordingCollector::default());
        let config = SessionConfig {
            duration_ticks: 1,
            tick_interval: Duration::from_millis(1000),
            event_channel_capacity: 8,
        };
        let (session, _handle) = CaptureSession::new(
            config,
            source,
            UploadCoordinator::new(Arc::clone(&collector), Uuid::nil()),
        );

        let report = session.run().await.unwrap();
        let capture = report.capture().unwrap();

        assert_eq!(capture.motion().len(), accepted.load(Ordering::SeqCst));
        assert_eq!(capture.motion().len(), capture.rotation().len());
        assert!(capture.motion().iter().all(|r| r.ts <= capture.finished_at()));
        assert_eq!(capture.motion()[0].ts - capture.session_start(), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_secondary_streams_add_samples() {
        let source = SensorSource::new(Permission::Granted)
            .with_mechanism(SimulatedDeviceMotion::new(Duration::from_millis(50)))
            .with_mechanism(SimulatedStream::accelerometer(Duration::from_millis(10)));
        let (session, _handle, _collector) = session(source);

        let report = session.run().await.unwrap();
        let capture = report.capture().unwrap();

        assert!(capture.motion().len() > capture.rotation().len());
        let times = capture.rotation_times();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_reading_session_still_uploads() {
        let source = SensorSource::new(Permission::Granted).with_mechanism(Unavailable);
        let (session, handle, collector) = session(source);

        let report = session.run().await.unwrap();
        let capture = report.capture().unwrap();

        assert_eq!(handle.state(), SessionState::Finished);
        assert!(capture.is_empty());
        let sent = collector.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![("accel".to_string(), 0), ("gyro".to_string(), 0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_aborts_before_capture() {
        let source = SensorSource::new(Permission::Denied)
            .with_mechanism(SimulatedDeviceMotion::new(Duration::from_millis(16)));
        let (session, handle, collector) = session(source);

        let result = session.run().await;

        assert_eq!(result.err(), Some(CaptureError::PermissionDenied));
        assert_eq!(handle.state(), SessionState::Idle);
        assert!(collector.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_capture_skips_upload() {
        let source = SensorSource::new(Permission::Granted)
            .with_mechanism(SimulatedDeviceMotion::new(Duration::from_millis(16)));
        let (session, handle, collector) = session(source);

        let mut remaining = handle.watch_remaining();
        let task = tokio::spawn(session.run());

        remaining.wait_for(|r| *r <= 7).await.unwrap();
        assert!(handle.cancel());
        assert!(!handle.cancel());

        let report = task.await.unwrap().unwrap();
        assert!(matches!(report, SessionReport::Cancelled));
        assert_eq!(handle.state(), SessionState::Cancelled);
        assert!(collector.sent.lock().unwrap().is_empty());

        // Countdown froze where it was cancelled
        let frozen = handle.remaining();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.remaining(), frozen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_for_permission() {
        let source = SensorSource::new(PendingPrompt);
        let (session, handle, collector) = session(source);

        let task = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        let report = task.await.unwrap().unwrap();
        assert!(matches!(report, SessionReport::Cancelled));
        assert!(collector.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down_each_tick() {
        let source = SensorSource::new(Permission::NotRequired);
        let (session, handle, _collector) = session(source);
        assert_eq!(handle.remaining(), 10);

        let seen = Arc::new(AtomicUsize::new(0));
        let mut remaining = handle.watch_remaining();
        let counter = Arc::clone(&seen);
        let watcher = tokio::spawn(async move {
            let mut values = Vec::new();
            while remaining.changed().await.is_ok() {
                values.push(*remaining.borrow_and_update());
                counter.fetch_add(1, Ordering::SeqCst);
            }
            values
        });

        session.run().await.unwrap();
        let values = watcher.await.unwrap();

        assert_eq!(values, (0..10).rev().collect::<Vec<u32>>());
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_duration_rejected() {
        let collector = Arc::new(RecordingCollector::default());
        let config = SessionConfig {
            duration_ticks: 0,
            ..fast_config()
        };
        let (session, _handle) = CaptureSession::new(
            config,
            SensorSource::new(Permission::Granted),
            UploadCoordinator::new(collector, Uuid::nil()),
        );

        assert!(matches!(session.run().await, Err(CaptureError::InvalidState(_))));
    }

    #[test]
    fn test_combined_event_construction() {
        let event = DeviceMotionEvent::new(Vector3::new(0.0, 0.0, 9.81), None);
        let (motion, rotation) = event.decompose(1);
        assert_eq!(motion.ts, rotation.ts);
    }
}
