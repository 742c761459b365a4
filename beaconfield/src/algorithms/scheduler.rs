//! Deferred, cooldown-gated pattern analysis.
//!
//! Only one request is ever live. A new request cancels the pending one, and a run
//! whose request stopped being current by the time it finishes is dropped instead
//! of delivered. Time comes from the injected [`Clock`]; the host's render loop
//! drives the state machine through [`AnalysisScheduler::poll`] with an
//! [`IdleSignal`].

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::algorithms::patterns::PatternAnalyzer;
use crate::algorithms::spatial_hash::SpatialHash;
use crate::clock::{Clock, IdleSignal};
use crate::config::SchedulerConfig;
use crate::error::AnalysisError;
use crate::model::{Beacon, PatternCompletionAnalysis, RequestId, Viewport};

pub type AnalysisResult = Result<PatternCompletionAnalysis, AnalysisError>;
type Slot = Rc<RefCell<Option<AnalysisResult>>>;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SchedulerState {
    Idle,
    CooldownPending { ready_at_ms: f64 },
    WaitingForIdleSlot { frames_remaining: u32 },
    Running,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryOutcome {
    Completed,
    Superseded,
}

/// Handle to the eventual result of one `analyze_async` call.
#[derive(Clone, Debug)]
pub struct AnalysisTicket {
    request: Option<RequestId>,
    slot: Slot,
}

impl AnalysisTicket {
    fn resolved(result: AnalysisResult) -> Self {
        AnalysisTicket { request: None, slot: Rc::new(RefCell::new(Some(result))) }
    }

    /// `None` when the call was answered immediately without being queued.
    pub fn request(&self) -> Option<RequestId> {
        self.request
    }

    pub fn is_settled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Copy of the result without consuming it.
    pub fn result(&self) -> Option<AnalysisResult> {
        self.slot.borrow().clone()
    }

    /// Take the result once it has arrived. Later calls return `None`.
    pub fn try_take(&self) -> Option<AnalysisResult> {
        self.slot.borrow_mut().take()
    }
}

struct PendingRequest {
    id: RequestId,
    beacons: Vec<Beacon>,
    viewport: Option<Viewport>,
    slot: Slot,
}

/// A request taken out of the queue by [`AnalysisScheduler::begin`].
pub struct AnalysisJob {
    id: RequestId,
    beacons: Vec<Beacon>,
    viewport: Option<Viewport>,
    slot: Slot,
}

impl AnalysisJob {
    pub fn request(&self) -> RequestId {
        self.id
    }
    pub fn beacons(&self) -> &[Beacon] {
        &self.beacons
    }

    /// Rebuild `index` over the snapshot and analyze it. Panics inside the analysis
    /// come back as `AnalysisError::Geometry`.
    pub fn run(&self, index: &mut SpatialHash, analyzer: &PatternAnalyzer) -> AnalysisResult {
        guarded(self.id, || {
            index.rebuild(&self.beacons);
            analyzer.analyze(index, &self.beacons, self.viewport.as_ref())
        })
    }
}

fn guarded(id: RequestId, f: impl FnOnce() -> AnalysisResult) -> AnalysisResult {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => r.map_err(|e| e.with_request(id)),
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "analysis panicked".to_string());
            Err(AnalysisError::Geometry { request: id, detail })
        }
    }
}

pub struct AnalysisScheduler {
    config: SchedulerConfig,
    clock: Rc<dyn Clock>,
    state: SchedulerState,
    pending: Option<PendingRequest>,
    // request whose result may still be delivered
    current: Option<RequestId>,
    next_id: RequestId,
    // when the last run began; the cooldown is measured from here
    last_run_ms: Option<f64>,
    last_outcome: Option<(RequestId, DeliveryOutcome)>,
}

impl AnalysisScheduler {
    pub fn new(config: SchedulerConfig, clock: Rc<dyn Clock>) -> Self {
        AnalysisScheduler {
            config,
            clock,
            state: SchedulerState::Idle,
            pending: None,
            current: None,
            next_id: 1,
            last_run_ms: None,
            last_outcome: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig { &self.config }
    pub fn state(&self) -> SchedulerState { self.state }
    pub fn has_pending(&self) -> bool { self.pending.is_some() }
    pub fn current_request(&self) -> Option<RequestId> { self.current }
    pub fn last_outcome(&self) -> Option<(RequestId, DeliveryOutcome)> { self.last_outcome }

    /// Queue an analysis of `beacons`. Any pending request is cancelled first, so
    /// a burst of calls collapses into the last one. Small snapshots, and requests
    /// within `cooldown_ms` of the last run starting, resolve at once with an
    /// empty analysis.
    pub fn analyze_async(&mut self, beacons: Vec<Beacon>, viewport: Option<Viewport>, cooldown_ms: f64) -> AnalysisTicket {
        self.cancel_pending();
        if beacons.len() < self.config.min_beacons {
            trace!(beacons = beacons.len(), "analysis skipped: too few beacons");
            return AnalysisTicket::resolved(Ok(PatternCompletionAnalysis::default()));
        }
        let now = self.clock.now_ms();
        if let Some(last) = self.last_run_ms {
            if now - last < cooldown_ms {
                trace!(since_ms = now - last, cooldown_ms, "analysis skipped: cooling down");
                return AnalysisTicket::resolved(Ok(PatternCompletionAnalysis::default()));
            }
        }
        let id = self.next_id;
        self.next_id += 1;
        let slot: Slot = Rc::new(RefCell::new(None));
        self.pending = Some(PendingRequest { id, beacons, viewport, slot: slot.clone() });
        self.current = Some(id);
        self.state = SchedulerState::CooldownPending { ready_at_ms: now + cooldown_ms };
        debug!(request = id, ready_at_ms = now + cooldown_ms, "analysis accepted");
        AnalysisTicket { request: Some(id), slot }
    }

    /// Drop the pending request; its ticket never settles. A run already begun is
    /// dropped at `finish`. Calling this with nothing pending is a no-op.
    pub fn cancel_pending(&mut self) {
        let Some(id) = self.current.take() else { return };
        let queued = self.pending.take().is_some();
        if self.state != SchedulerState::Running {
            self.state = SchedulerState::Idle;
        }
        debug!(request = id, queued, "analysis cancelled");
    }

    /// Step the state machine. Returns true once the pending request may run.
    pub fn advance(&mut self, idle: &dyn IdleSignal) -> bool {
        match self.state {
            SchedulerState::CooldownPending { ready_at_ms } => {
                if self.clock.now_ms() >= ready_at_ms && idle.is_idle() {
                    let frames = self.config.frame_gaps;
                    self.state = SchedulerState::WaitingForIdleSlot { frames_remaining: frames };
                    return frames == 0;
                }
                false
            }
            SchedulerState::WaitingForIdleSlot { frames_remaining } => {
                if frames_remaining == 0 {
                    return true;
                }
                if idle.is_idle() {
                    let left = frames_remaining - 1;
                    self.state = SchedulerState::WaitingForIdleSlot { frames_remaining: left };
                    return left == 0;
                }
                false
            }
            SchedulerState::Idle | SchedulerState::Running => false,
        }
    }

    /// Take the ready request and enter `Running`.
    pub fn begin(&mut self) -> Option<AnalysisJob> {
        if self.state != (SchedulerState::WaitingForIdleSlot { frames_remaining: 0 }) {
            return None;
        }
        let p = self.pending.take()?;
        self.state = SchedulerState::Running;
        self.last_run_ms = Some(self.clock.now_ms());
        trace!(request = p.id, "analysis running");
        Some(AnalysisJob { id: p.id, beacons: p.beacons, viewport: p.viewport, slot: p.slot })
    }

    /// Deliver `result` if `job` is still the current request, otherwise drop it.
    pub fn finish(&mut self, job: AnalysisJob, result: AnalysisResult) -> DeliveryOutcome {
        // a request accepted while this one ran owns the state machine now
        if self.state == SchedulerState::Running {
            self.state = SchedulerState::Idle;
        }
        let outcome = if self.current == Some(job.id) {
            self.current = None;
            if let Err(e) = &result {
                warn!(request = job.id, error = %e, "analysis failed");
            }
            *job.slot.borrow_mut() = Some(result);
            DeliveryOutcome::Completed
        } else {
            trace!(request = job.id, current = ?self.current, "analysis superseded");
            DeliveryOutcome::Superseded
        };
        self.last_outcome = Some((job.id, outcome));
        outcome
    }

    /// One host frame: advance and, when ready, run and deliver in place.
    pub fn poll(
        &mut self,
        index: &mut SpatialHash,
        analyzer: &PatternAnalyzer,
        idle: &dyn IdleSignal,
    ) -> Option<DeliveryOutcome> {
        if !self.advance(idle) {
            return None;
        }
        let job = self.begin()?;
        #[cfg(feature = "analysis_prof")]
        let t0 = self.clock.now_ms();
        let result = job.run(index, analyzer);
        #[cfg(feature = "analysis_prof")]
        debug!(request = job.id, run_ms = self.clock.now_ms() - t0, beacons = job.beacons.len(), "analysis timing");
        Some(self.finish(job, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{PatternConfig, SpatialHashConfig};

    struct Rig {
        clock: Rc<ManualClock>,
        sched: AnalysisScheduler,
        index: SpatialHash,
        analyzer: PatternAnalyzer,
    }

    fn rig(frame_gaps: u32) -> Rig {
        let clock = ManualClock::new(0.0);
        let cfg = SchedulerConfig { min_beacons: 3, cooldown_ms: 300.0, frame_gaps };
        Rig {
            sched: AnalysisScheduler::new(cfg, clock.clone()),
            index: SpatialHash::new(SpatialHashConfig::default(), clock.clone()),
            analyzer: PatternAnalyzer::new(PatternConfig::default()),
            clock,
        }
    }

    fn triangle() -> Vec<Beacon> {
        let h = 50.0 * 3f32.sqrt() / 2.0;
        vec![Beacon::new(1, 0.0, 0.0), Beacon::new(2, 50.0, 0.0), Beacon::new(3, 25.0, h)]
    }

    impl Rig {
        fn poll(&mut self, idle: bool) -> Option<DeliveryOutcome> {
            self.sched.poll(&mut self.index, &self.analyzer, &idle)
        }
    }

    #[test]
    fn too_few_beacons_resolves_empty() {
        let mut r = rig(2);
        let t = r.sched.analyze_async(triangle()[..2].to_vec(), None, 300.0);
        assert!(t.request().is_none());
        let res = t.try_take().unwrap().unwrap();
        assert!(res.is_empty());
        assert_eq!(r.sched.state(), SchedulerState::Idle);
    }

    #[test]
    fn waits_for_cooldown_then_idle_frames() {
        let mut r = rig(2);
        let t = r.sched.analyze_async(triangle(), None, 300.0);
        assert!(t.request().is_some());
        r.clock.advance(100.0);
        assert_eq!(r.poll(true), None);
        r.clock.advance(200.0);
        assert_eq!(r.poll(false), None, "not idle yet");
        assert_eq!(r.poll(true), None);
        assert_eq!(r.sched.state(), SchedulerState::WaitingForIdleSlot { frames_remaining: 2 });
        assert_eq!(r.poll(true), None);
        assert_eq!(r.poll(false), None, "busy frames do not count");
        assert_eq!(r.poll(true), Some(DeliveryOutcome::Completed));
        assert_eq!(r.sched.state(), SchedulerState::Idle);
        let res = t.try_take().unwrap().unwrap();
        assert_eq!(res.complete_patterns.len(), 1);
        assert!(t.try_take().is_none());
    }

    #[test]
    fn back_to_back_requests_deliver_only_the_second() {
        let mut r = rig(0);
        let first = r.sched.analyze_async(triangle(), None, 300.0);
        r.clock.advance(50.0);
        let second = r.sched.analyze_async(triangle(), None, 300.0);
        assert!(second.request().is_some(), "a burst is debounced, not dropped");
        assert!(!second.is_settled());
        let mut delivered = 0;
        for _ in 0..20 {
            r.clock.advance(100.0);
            if r.poll(true) == Some(DeliveryOutcome::Completed) {
                delivered += 1;
            }
        }
        assert_eq!(delivered, 1);
        assert!(!first.is_settled(), "cancelled tickets never settle");
        let res = second.try_take().unwrap().unwrap();
        assert!(!res.is_empty());
        assert_eq!(res.complete_patterns.len(), 1);
        assert_eq!(r.sched.state(), SchedulerState::Idle);
    }

    #[test]
    fn request_soon_after_a_run_resolves_empty() {
        let mut r = rig(0);
        let _ = r.sched.analyze_async(triangle(), None, 0.0);
        assert_eq!(r.poll(true), Some(DeliveryOutcome::Completed));
        r.clock.advance(100.0);
        let t = r.sched.analyze_async(triangle(), None, 300.0);
        assert!(t.request().is_none());
        assert!(t.try_take().unwrap().unwrap().is_empty());
        r.clock.advance(200.0);
        assert!(r.sched.analyze_async(triangle(), None, 300.0).request().is_some());
    }

    #[test]
    fn newer_request_supersedes_running_one() {
        let mut r = rig(0);
        let a = r.sched.analyze_async(triangle(), None, 300.0);
        r.clock.advance(300.0);
        assert!(r.sched.advance(&true));
        let job = r.sched.begin().unwrap();
        let result = job.run(&mut r.index, &r.analyzer);

        r.clock.advance(300.0);
        let b = r.sched.analyze_async(triangle(), None, 300.0);
        assert_eq!(r.sched.finish(job, result), DeliveryOutcome::Superseded);
        assert!(!a.is_settled());
        assert!(matches!(r.sched.state(), SchedulerState::CooldownPending { .. }));

        r.clock.advance(300.0);
        assert_eq!(r.poll(true), Some(DeliveryOutcome::Completed));
        assert!(b.try_take().unwrap().is_ok());
        assert_eq!(r.sched.last_outcome(), Some((b.request().unwrap(), DeliveryOutcome::Completed)));
    }

    #[test]
    fn input_errors_carry_the_request_id() {
        let mut r = rig(0);
        let mut bs = triangle();
        bs.push(Beacon::new(7, f32::INFINITY, 1.0));
        let t = r.sched.analyze_async(bs, None, 0.0);
        assert_eq!(r.poll(true), Some(DeliveryOutcome::Completed));
        let err = t.try_take().unwrap().unwrap_err();
        assert!(err.is_input_error());
        assert_eq!(err.request(), t.request().unwrap());
        assert_eq!(r.sched.state(), SchedulerState::Idle);
    }

    #[test]
    fn panics_become_geometry_errors() {
        let err = guarded(42, || panic!("boom")).unwrap_err();
        assert_eq!(err, AnalysisError::Geometry { request: 42, detail: "boom".into() });
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut r = rig(0);
        let t = r.sched.analyze_async(triangle(), None, 0.0);
        r.sched.cancel_pending();
        r.sched.cancel_pending();
        assert!(!r.sched.has_pending());
        assert_eq!(r.poll(true), None);
        assert!(!t.is_settled());
    }
}
