//! Fixed interval scheduling of synchronization cycles
//!
//! A single thread polls once per tick whether the next cycle is due and runs
//! it synchronously, so cycles never overlap. Firings that fall due while a
//! cycle is still running are coalesced into the next one.

use std::{
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

/// Polling period of [Scheduler::run]
pub const TICK: Duration = Duration::from_secs(1);

/// Time source of the scheduler
pub trait Clock {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Waiting,
}

/// Runs a job once on start and then every `interval`
#[derive(Debug)]
pub struct Scheduler<C> {
    clock: C,
    interval: Duration,
    state: SchedulerState,
    next_due: Option<Instant>,
    runs: u64,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(clock: C, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            state: SchedulerState::Idle,
            next_due: None,
            runs: 0,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Instant the next cycle is due, `None` before [Scheduler::start]
    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Run the job immediately and arm the timer
    ///
    /// Does nothing unless the scheduler is idle.
    pub fn start(&mut self, job: &mut impl FnMut()) {
        if self.state != SchedulerState::Idle {
            return;
        }
        let started = self.clock.now();
        self.next_due = self.after(started);
        self.execute(job);
    }

    /// Run the job if it is due, returns whether it ran
    pub fn run_pending(&mut self, job: &mut impl FnMut()) -> bool {
        if self.state != SchedulerState::Waiting {
            return false;
        }
        let Some(due) = self.next_due else {
            return false;
        };
        if self.clock.now() < due {
            return false;
        }

        self.next_due = self.after(due);
        self.execute(job);
        true
    }

    /// Run the job now and every interval until the process is terminated
    pub fn run(mut self, mut job: impl FnMut()) -> ! {
        self.start(&mut job);
        loop {
            self.run_pending(&mut job);
            self.clock.sleep(TICK);
        }
    }

    fn execute(&mut self, job: &mut impl FnMut()) {
        self.state = SchedulerState::Running;
        self.runs += 1;
        debug!("Starting cycle {}", self.runs);

        job();

        self.state = SchedulerState::Waiting;
        self.coalesce_missed();
        if let Some(due) = self.next_due {
            let wait = due.saturating_duration_since(self.clock.now());
            info!("Next cycle in {}s", wait.as_secs());
        }
    }

    /// Drop firings that fell due while the job was running
    fn coalesce_missed(&mut self) {
        let Some(mut due) = self.next_due else {
            return;
        };
        let now = self.clock.now();
        let mut missed = 0;
        while due < now {
            let Some(next) = self.after(due) else {
                self.next_due = None;
                return;
            };
            due = next;
            missed += 1;
        }
        if missed > 0 {
            debug!("Cycle overran the interval, skipped {missed} firings");
        }
        self.next_due = Some(due);
    }

    /// Firing one interval after `instant`, `None` if that is not representable
    fn after(&self, instant: Instant) -> Option<Instant> {
        let next = instant.checked_add(self.interval);
        if next.is_none() {
            warn!(
                "Interval of {}s is out of range, no further cycles are scheduled",
                self.interval.as_secs()
            );
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;

    /// Clock advanced by hand, sleeping advances it
    struct ManualClock {
        now: Cell<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Cell::new(Instant::now()),
            }
        }

        fn advance(&self, duration: Duration) {
            self.now.set(self.now.get() + duration);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.advance(duration);
        }
    }

    const INTERVAL: Duration = Duration::from_secs(10);

    /// Poll like [Scheduler::run] for `polls` ticks
    fn poll(
        scheduler: &mut Scheduler<&ManualClock>,
        clock: &ManualClock,
        job: &mut impl FnMut(),
        polls: usize,
    ) {
        for _ in 0..polls {
            scheduler.run_pending(job);
            clock.sleep(TICK);
        }
    }

    #[test]
    fn starts_idle_and_runs_immediately() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        let mut scheduler = Scheduler::new(&clock, INTERVAL);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        let mut runs = 0;
        let mut job = || runs += 1;
        scheduler.start(&mut job);

        assert_eq!(scheduler.state(), SchedulerState::Waiting);
        assert_eq!(scheduler.next_due(), Some(t0 + INTERVAL));
        drop(job);
        assert_eq!(runs, 1);
    }

    #[test]
    fn cycles_start_at_fixed_intervals() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        let starts = RefCell::new(Vec::new());
        let mut job = || starts.borrow_mut().push(clock.now());

        let mut scheduler = Scheduler::new(&clock, INTERVAL);
        scheduler.start(&mut job);
        poll(&mut scheduler, &clock, &mut job, 35);

        let starts = starts.into_inner();
        assert_eq!(starts.len(), 4);
        for (n, start) in starts.iter().enumerate() {
            assert_eq!(*start, t0 + INTERVAL * n as u32);
        }
    }

    #[test]
    fn never_runs_before_due() {
        let clock = ManualClock::new();
        let mut runs = 0;
        let mut job = || runs += 1;

        let mut scheduler = Scheduler::new(&clock, INTERVAL);
        scheduler.start(&mut job);
        clock.advance(INTERVAL - Duration::from_millis(1));
        assert!(!scheduler.run_pending(&mut job));

        clock.advance(Duration::from_millis(1));
        assert!(scheduler.run_pending(&mut job));
        drop(job);
        assert_eq!(runs, 2);
    }

    #[test]
    fn overrunning_cycles_are_coalesced() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        let starts = RefCell::new(Vec::new());
        let mut job = || {
            starts.borrow_mut().push(clock.now());
            // each cycle takes two and a half intervals
            clock.advance(INTERVAL * 5 / 2);
        };

        let mut scheduler = Scheduler::new(&clock, INTERVAL);
        scheduler.start(&mut job);
        assert_eq!(scheduler.next_due(), Some(t0 + INTERVAL * 3));
        poll(&mut scheduler, &clock, &mut job, 10);

        let starts = starts.into_inner();
        assert_eq!(starts.len(), 2);
        assert_eq!(starts[1], t0 + INTERVAL * 3);
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= INTERVAL * 5 / 2);
        }
    }

    #[test]
    fn unrepresentable_interval_runs_once() {
        let clock = ManualClock::new();
        let mut runs = 0;
        let mut job = || runs += 1;

        let mut scheduler = Scheduler::new(&clock, Duration::from_secs(u64::MAX));
        scheduler.start(&mut job);
        assert_eq!(scheduler.next_due(), None);
        assert_eq!(scheduler.state(), SchedulerState::Waiting);

        clock.advance(INTERVAL);
        assert!(!scheduler.run_pending(&mut job));
        drop(job);
        assert_eq!(runs, 1);
    }

    #[test]
    fn start_only_once() {
        let clock = ManualClock::new();
        let mut runs = 0;
        let mut job = || runs += 1;

        let mut scheduler = Scheduler::new(&clock, INTERVAL);
        scheduler.start(&mut job);
        scheduler.start(&mut job);
        drop(job);
        assert_eq!(runs, 1);
    }
}
