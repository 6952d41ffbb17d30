//! Timer service.
//!
//! A single delay queue keyed by fire-at instant. The escalation engine
//! schedules timers tagged `(alert_id, cursor_version)`; a tick loop
//! driven by the clock port delivers due entries back to the engine as
//! `Timer` events. Staleness is the engine's concern: a fired timer whose
//! cursor version has advanced is ignored there, so the queue itself
//! needs no cancel operation.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::ports::Clock;
use crate::services::engine::{EngineEvent, EngineHandle};

/// One scheduled escalation timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEntry {
    pub fire_at: DateTime<Utc>,
    /// Insertion sequence; makes ordering total for equal fire instants
    pub seq: u64,
    pub alert_id: Uuid,
    pub cursor_version: u64,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.fire_at
            .cmp(&other.fire_at)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Delay queue delivering `Timer` events to the engine.
pub struct TimerService {
    queue: Mutex<BinaryHeap<Reverse<TimerEntry>>>,
    seq: AtomicU64,
    clock: Arc<dyn Clock>,
    tick: Duration,
    running: AtomicBool,
}

impl TimerService {
    pub fn new(clock: Arc<dyn Clock>, tick_ms: u64) -> Self {
        Self {
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            clock,
            tick: Duration::from_millis(tick_ms.max(1)),
            running: AtomicBool::new(false),
        }
    }

    /// Schedule a timer. The engine stamps it with the alert's current
    /// cursor version so a later ack/resolve/merge invalidates it.
    pub fn schedule(&self, fire_at: DateTime<Utc>, alert_id: Uuid, cursor_version: u64) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let entry = TimerEntry {
            fire_at,
            seq,
            alert_id,
            cursor_version,
        };
        debug!(
            alert_id = %alert_id,
            cursor_version,
            fire_at = %fire_at,
            "Timer scheduled"
        );
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Reverse(entry));
    }

    /// Pop every entry due at or before `now`, in fire order.
    ///
    /// Exposed so tests can drive the queue deterministically without the
    /// tick loop.
    pub fn poll_due(&self, now: DateTime<Utc>) -> Vec<TimerEntry> {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let mut due = Vec::new();
        while let Some(Reverse(entry)) = queue.peek() {
            if entry.fire_at > now {
                break;
            }
            if let Some(Reverse(entry)) = queue.pop() {
                due.push(entry);
            }
        }
        due
    }

    /// Number of entries still queued (for tests/monitoring).
    pub fn pending_count(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Spawn the tick loop. Runs until `stop` is called.
    ///
    /// Ticks on the runtime timer but reads due-ness from the clock port,
    /// so a virtual clock controls firing without stalling the loop.
    pub fn spawn(self: &Arc<Self>, engine: EngineHandle) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let service = Arc::clone(self);
        tokio::spawn(async move {
            while service.running.load(Ordering::SeqCst) {
                tokio::time::sleep(service.tick).await;
                let now = service.clock.now();
                for entry in service.poll_due(now) {
                    let event = EngineEvent::Timer {
                        alert_id: entry.alert_id,
                        cursor_version: entry.cursor_version,
                    };
                    if engine.send(event).await.is_err() {
                        warn!("Engine stopped; timer service exiting");
                        return;
                    }
                }
            }
        })
    }

    /// Ask the tick loop to exit after the current tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::VirtualClock;
    use chrono::Duration as ChronoDuration;

    fn service() -> (Arc<TimerService>, Arc<VirtualClock>) {
        let clock = Arc::new(VirtualClock::new(Utc::now()));
        let service = Arc::new(TimerService::new(
            Arc::clone(&clock) as Arc<dyn Clock>,
            10,
        ));
        (service, clock)
    }

    #[tokio::test]
    async fn test_poll_due_returns_in_fire_order() {
        let (service, clock) = service();
        let now = clock.now();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        service.schedule(now + ChronoDuration::seconds(20), b, 1);
        service.schedule(now + ChronoDuration::seconds(10), a, 1);

        assert!(service.poll_due(now).is_empty());

        let due = service.poll_due(now + ChronoDuration::seconds(30));
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].alert_id, a);
        assert_eq!(due[1].alert_id, b);
        assert_eq!(service.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_poll_due_leaves_future_entries() {
        let (service, clock) = service();
        let now = clock.now();

        service.schedule(now + ChronoDuration::seconds(5), Uuid::new_v4(), 1);
        service.schedule(now + ChronoDuration::minutes(15), Uuid::new_v4(), 1);

        let due = service.poll_due(now + ChronoDuration::seconds(5));
        assert_eq!(due.len(), 1);
        assert_eq!(service.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_equal_fire_instants_preserve_schedule_order() {
        let (service, clock) = service();
        let at = clock.now() + ChronoDuration::seconds(1);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        service.schedule(at, first, 1);
        service.schedule(at, second, 2);

        let due = service.poll_due(at);
        assert_eq!(due[0].alert_id, first);
        assert_eq!(due[1].alert_id, second);
    }

    #[tokio::test]
    async fn test_tick_loop_delivers_to_engine() {
        let (service, clock) = service();
        let (engine, mut receivers) = EngineHandle::channels(1, 16);

        let alert_id = Uuid::new_v4();
        service.schedule(clock.now() + ChronoDuration::seconds(5), alert_id, 7);

        let handle = service.spawn(engine);
        clock.advance(ChronoDuration::seconds(6));

        let mut rx = receivers.remove(0);
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");

        match event {
            EngineEvent::Timer {
                alert_id: id,
                cursor_version,
            } => {
                assert_eq!(id, alert_id);
                assert_eq!(cursor_version, 7);
            }
            other => panic!("unexpected event: {}", other.kind()),
        }

        service.stop();
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
}
