/// render.rs – Single-flight render coalescing with a minimum redraw interval.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Schedule = dyn Fn() + Send + Sync;

/// Outcome of a scheduled render reaching the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderGate {
    /// Draw now; the pending flag has already been cleared.
    Draw,
    /// Too soon after the previous draw. The request stays pending and must be
    /// rescheduled after the given delay.
    Defer(Duration),
}

/// Cheap to clone and safe to call from any thread. Only the hand-off to the
/// loop crosses threads; drawing always happens on the loop.
#[derive(Clone)]
pub struct RenderScheduler {
    pending: Arc<AtomicBool>,
    last_draw: Arc<Mutex<Option<Instant>>>,
    min_interval: Duration,
    schedule: Arc<Schedule>,
}

impl RenderScheduler {
    /// `schedule` must enqueue exactly one render task on the event loop.
    pub fn new<F>(min_interval: Duration, schedule: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            pending: Arc::new(AtomicBool::new(false)),
            last_draw: Arc::new(Mutex::new(None)),
            min_interval,
            schedule: Arc::new(schedule),
        }
    }

    /// Ask for a redraw. Bursts collapse into one scheduled render.
    pub fn request_render(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            (self.schedule)();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Called by the loop when a scheduled render arrives. Clears the pending
    /// flag before the caller draws so that requests made while drawing
    /// schedule a follow-up instead of being lost.
    pub fn begin(&self, now: Instant) -> RenderGate {
        let mut last = match self.last_draw.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(prev) = *last {
            let elapsed = now.saturating_duration_since(prev);
            if elapsed < self.min_interval {
                return RenderGate::Defer(self.min_interval - elapsed);
            }
        }
        *last = Some(now);
        self.pending.store(false, Ordering::Release);
        RenderGate::Draw
    }

    /// Drop any pending request (dashboard closed).
    pub fn cancel(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(min_interval: Duration) -> (RenderScheduler, Arc<AtomicUsize>) {
        let scheduled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&scheduled);
        let sched = RenderScheduler::new(min_interval, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (sched, scheduled)
    }

    #[test]
    fn burst_schedules_one_render() {
        let (sched, scheduled) = counting(Duration::ZERO);
        for _ in 0..100 {
            sched.request_render();
        }
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn request_during_draw_schedules_follow_up() {
        let (sched, scheduled) = counting(Duration::ZERO);
        sched.request_render();
        assert_eq!(sched.begin(Instant::now()), RenderGate::Draw);
        sched.request_render();
        assert_eq!(scheduled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn draws_closer_than_interval_are_deferred() {
        let (sched, scheduled) = counting(Duration::from_millis(20));
        let t0 = Instant::now();
        sched.request_render();
        assert_eq!(sched.begin(t0), RenderGate::Draw);

        sched.request_render();
        let gate = sched.begin(t0 + Duration::from_millis(5));
        assert_eq!(gate, RenderGate::Defer(Duration::from_millis(15)));
        assert!(sched.is_pending());

        sched.request_render();
        assert_eq!(scheduled.load(Ordering::SeqCst), 2);
        assert_eq!(sched.begin(t0 + Duration::from_millis(20)), RenderGate::Draw);
        assert!(!sched.is_pending());
    }

    #[test]
    fn requests_from_another_thread_coalesce() {
        let (sched, scheduled) = counting(Duration::ZERO);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = sched.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        s.request_render();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
    }
}
