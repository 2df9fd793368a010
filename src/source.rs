//! Sensor ingestion.
//!
//! A [`SensorSource`] groups one or more [`SensorMechanism`]s behind a single
//! permission gate. Each mechanism runs as its own task and pushes readings
//! through a shared [`ReadingSink`] onto the session's event channel.

use crate::error::{CaptureError, CaptureResult};
use crate::readings::{
    motion_reading, rotation_reading, DeviceMotionEvent, MotionReading, RotationRate,
    RotationReading, Timebase, Vector3,
};
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use log::{debug, info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Reading delivered to the capture buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorEvent {
    /// Both halves of one combined event. Delivered as a unit so the two
    /// sequences grow together.
    Combined(MotionReading, RotationReading),
    Motion(MotionReading),
    Rotation(RotationReading),
}

/// Result of a runtime permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// Platform does not gate motion access
    NotRequired,
}

/// Platform hook asked for motion/rotation access before capture starts.
pub trait PermissionGate: Send + Sync {
    fn request(&self) -> BoxFuture<'static, Permission>;
}

impl PermissionGate for Permission {
    fn request(&self) -> BoxFuture<'static, Permission> {
        future::ready(*self).boxed()
    }
}

/// One underlying sensor-event mechanism (combined stream, motion-only
/// stream, external reader, ...).
pub trait SensorMechanism: Send {
    fn name(&self) -> &'static str;

    /// Spawn the mechanism's producer task.
    ///
    /// Returns [`CaptureError::SensorUnavailable`] when the mechanism does not
    /// exist on this platform.
    fn start(self: Box<Self>, sink: ReadingSink) -> CaptureResult<JoinHandle<()>>;
}

/// Handle mechanisms use to publish readings.
///
/// Stamps every reading through the session [`Timebase`] and drops
/// everything once the owning subscription is closed.
#[derive(Clone)]
pub struct ReadingSink {
    tx: mpsc::Sender<SensorEvent>,
    closed: Arc<AtomicBool>,
    timebase: Timebase,
}

impl ReadingSink {
    pub fn new(tx: mpsc::Sender<SensorEvent>, timebase: Timebase) -> Self {
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            timebase,
        }
    }

    /// Publish one combined device-motion event.
    ///
    /// Returns `false` once the sink is closed; producers should stop.
    pub async fn combined(&self, event: DeviceMotionEvent) -> bool {
        let (motion, rotation) = event.decompose(self.timebase.now_ms());
        self.publish(SensorEvent::Combined(motion, rotation)).await
    }

    pub async fn motion(&self, accel: Vector3) -> bool {
        let reading = motion_reading(self.timebase.now_ms(), accel);
        self.publish(SensorEvent::Motion(reading)).await
    }

    pub async fn rotation(&self, rate: RotationRate) -> bool {
        let reading = rotation_reading(self.timebase.now_ms(), rate);
        self.publish(SensorEvent::Rotation(reading)).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    async fn publish(&self, event: SensorEvent) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.tx.send(event).await.is_ok()
    }
}

/// Permission gate plus the mechanisms to run once access is granted.
pub struct SensorSource {
    permission: Box<dyn PermissionGate>,
    mechanisms: Vec<Box<dyn SensorMechanism>>,
}

impl SensorSource {
    pub fn new(permission: impl PermissionGate + 'static) -> Self {
        Self {
            permission: Box::new(permission),
            mechanisms: Vec::new(),
        }
    }

    pub fn with_mechanism(mut self, mechanism: impl SensorMechanism + 'static) -> Self {
        self.mechanisms.push(Box::new(mechanism));
        self
    }

    pub fn push_mechanism(&mut self, mechanism: Box<dyn SensorMechanism>) {
        self.mechanisms.push(mechanism);
    }

    pub fn mechanism_count(&self) -> usize {
        self.mechanisms.len()
    }

    /// Ask the platform for motion access.
    ///
    /// The returned future does not borrow the source.
    pub fn authorize(&self) -> impl Future<Output = CaptureResult<()>> + Send + 'static {
        let request = self.permission.request();
        async move {
            match request.await {
                Permission::Granted => {
                    info!("Motion permission granted");
                    Ok(())
                }
                Permission::NotRequired => Ok(()),
                Permission::Denied => {
                    warn!("Motion permission denied");
                    Err(CaptureError::PermissionDenied)
                }
            }
        }
    }

    /// Start every mechanism against `sink`.
    ///
    /// Unavailable mechanisms are logged and skipped. Having none available
    /// is not an error: the session simply captures nothing.
    pub fn subscribe(self, sink: ReadingSink) -> Subscription {
        let closed = Arc::clone(&sink.closed);
        let mut tasks = Vec::with_capacity(self.mechanisms.len());
        let mut active = Vec::with_capacity(self.mechanisms.len());

        for mechanism in self.mechanisms {
            let name = mechanism.name();
            match mechanism.start(sink.clone()) {
                Ok(task) => {
                    info!("Sensor mechanism '{}' started", name);
                    tasks.push(task);
                    active.push(name);
                }
                Err(e) => warn!("Sensor mechanism '{}' skipped: {}", name, e),
            }
        }

        if active.is_empty() {
            warn!("No sensor mechanism available, capturing empty sequences");
        }

        Subscription {
            closed,
            tasks,
            active,
        }
    }
}

/// Live set of started mechanisms.
///
/// Dropping the subscription unsubscribes.
pub struct Subscription {
    closed: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
    active: Vec<&'static str>,
}

impl Subscription {
    /// Stop all mechanisms. Only the first call has any effect and returns `true`.
    pub fn unsubscribe(&mut self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        debug!("Unsubscribed {} sensor mechanism(s)", self.active.len());
        true
    }

    /// Whether readings must now be discarded.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn active_mechanisms(&self) -> &[&'static str] {
        &self.active
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Duration;

    struct Missing;

    impl SensorMechanism for Missing {
        fn name(&self) -> &'static str {
            "missing"
        }

        fn start(self: Box<Self>, _sink: ReadingSink) -> CaptureResult<JoinHandle<()>> {
            Err(CaptureError::SensorUnavailable("not on this device".into()))
        }
    }

    /// Emits combined events forever; counts how often its task is torn down.
    struct Counting {
        stops: Arc<AtomicUsize>,
    }

    struct StopGuard(Arc<AtomicUsize>);

    impl Drop for StopGuard {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SensorMechanism for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn start(self: Box<Self>, sink: ReadingSink) -> CaptureResult<JoinHandle<()>> {
            let guard = StopGuard(self.stops);
            Ok(tokio::spawn(async move {
                let _guard = guard;
                loop {
                    let event = DeviceMotionEvent::new(Vector3::new(0.0, 0.0, 9.81), None);
                    if !sink.combined(event).await {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }))
        }
    }

    #[tokio::test]
    async fn test_denied_permission_is_fatal() {
        let source = SensorSource::new(Permission::Denied);
        assert_eq!(source.authorize().await, Err(CaptureError::PermissionDenied));

        let source = SensorSource::new(Permission::NotRequired);
        assert!(source.authorize().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_mechanism_is_skipped() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = ReadingSink::new(tx, Timebase::starting_at(0));
        let stops = Arc::new(AtomicUsize::new(0));

        let source = SensorSource::new(Permission::Granted)
            .with_mechanism(Missing)
            .with_mechanism(Counting {
                stops: Arc::clone(&stops),
            });
        let subscription = source.subscribe(sink);

        assert_eq!(subscription.active_mechanisms(), &["counting"]);
        assert!(matches!(rx.recv().await, Some(SensorEvent::Combined(_, _))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_mechanisms_still_subscribes() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = ReadingSink::new(tx, Timebase::starting_at(0));

        let subscription = SensorSource::new(Permission::Granted)
            .with_mechanism(Missing)
            .subscribe(sink);

        assert!(subscription.active_mechanisms().is_empty());
        // Every sender is gone, so the event stream is already finished
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_twice_stops_once() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = ReadingSink::new(tx, Timebase::starting_at(0));
        let stops = Arc::new(AtomicUsize::new(0));

        let mut subscription = SensorSource::new(Permission::Granted)
            .with_mechanism(Counting {
                stops: Arc::clone(&stops),
            })
            .subscribe(sink);
        rx.recv().await;

        assert!(subscription.unsubscribe());
        assert!(!subscription.unsubscribe());
        assert!(subscription.is_closed());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        drop(subscription);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_sink_rejects_readings() {
        let (tx, mut rx) = mpsc::channel(16);
        let sink = ReadingSink::new(tx, Timebase::starting_at(0));

        assert!(sink.motion(Vector3::new(1.0, 2.0, 3.0)).await);
        sink.closed.store(true, Ordering::Release);
        assert!(!sink.rotation(RotationRate::new(1.0, 1.0, 1.0)).await);
        assert!(sink.is_closed());

        drop(sink);
        assert!(matches!(rx.recv().await, Some(SensorEvent::Motion(_))));
        assert_eq!(rx.recv().await, None);
    }
}
