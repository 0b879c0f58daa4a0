//! Controller state tracking and per-phase time-to-change prediction.
//!
//! Runs on every raw SPaT push: reconciles the dual-ring state machine,
//! then walks barrier-by-barrier, ring-by-ring, lead-then-lag to fill a
//! `(bound_L, bound_U)` decisecond window for every permitted vehicular and
//! pedestrian phase.

use crate::ab3418::{barrier_of, ring_of, SignalStatus};
use crate::timecard::{
    phase_on, ConcurrentType, ControlMode, CoordPlan, LeadLagMode, PedState, PhaseCall,
    PhaseFlags, PhaseRecall, PhaseState, PhaseTiming, TimingCard,
};

/// Small observation latency compensation applied to elapsed-time math,
/// milliseconds.
const CLOCK_SKEW_MS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PredictedBound {
    /// deciseconds
    pub bound_l: u16,
    pub bound_u: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseStatus {
    pub state: PhaseState,
    pub pedstate: PedState,
    pub call_status: PhaseCall,
    pub recall_status: PhaseRecall,
    /// absolute milliseconds of the last state change
    pub state_start_time: u64,
    pub pedstate_start_time: u64,
    pub time2next: PredictedBound,
    pub pedtime2next: PredictedBound,
}

/// Outcome of feeding a raw SPaT to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatOutcome {
    Updated,
    /// Pattern changed to a plan the card does not hold; the caller should
    /// re-poll the coordination plans.
    PlanUnknown,
}

/// Live controller state fused from the timing card and push messages.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControllerStatus {
    pub controller_addr: u8,
    /// milliseconds of the last update
    pub msec: u64,
    pub is_plan_timing_ready: bool,
    pub signal_status: SignalStatus,
    /// cabinet status byte from status8e
    pub status: u8,
    /// per-phase force-off captured from the active rings, seconds
    pub active_force_off: [u8; 8],
    pub mode: ControlMode,
    pub permitted_phases: u8,
    pub permitted_ped_phases: u8,
    pub curbarrier: u8,
    pub curbarrier_start_time: u64,
    /// onset of the last per-ring interval/timer change
    pub timer_time: [u64; 2],
    pub coordplan_index: Option<usize>,
    pub coordinated_phases: u8,
    pub synch_phase: u8,
    /// deciseconds
    pub cycle_length: u16,
    pub cur_local_cycle_clock: u16,
    /// onset of the cycle (the yield point), milliseconds
    pub cycle_start_time: u64,
    pub cycle_clock_time: u64,
    pub phase_status: [PhaseStatus; 8],
    /// ring start windows left over after the barrier walk, used by the
    /// pedestrian fall-through
    pub final_time2start: [PredictedBound; 2],
}

fn elapsed_ds(since: u64, now: u64) -> u32 {
    ((now + CLOCK_SKEW_MS).saturating_sub(since) / 100) as u32
}

fn walk_interval(timing: &PhaseTiming, flags: &PhaseFlags, phase_idx: usize) -> u32 {
    if phase_on(flags.walk2_phases, phase_idx) {
        u32::from(timing.walk2_interval)
    } else {
        u32::from(timing.walk1_interval)
    }
}

/// Green remaining implied by the active interval code and its countdown.
fn green_left(active_interval: u8, interval_timer: u8, interval_into: u32, timing: &PhaseTiming) -> u32 {
    let countdown = u32::from(interval_timer) * 10;
    match active_interval {
        0x00 => {
            // walk countdown runs in seconds, clearance follows
            let left = if countdown > interval_into {
                countdown - interval_into
            } else {
                countdown
            };
            left + u32::from(timing.walk_clearance) * 10
        },
        0x01..=0x04 => {
            if countdown > interval_into {
                countdown - interval_into
            } else {
                countdown
            }
        },
        // passage / max gap / min gap countdown is already deciseconds
        _ => u32::from(interval_timer),
    }
}

/// `minGreen + the selected maximum extension`, deciseconds.
fn green_to_maxout(timing: &PhaseTiming, flags: &PhaseFlags, phase_idx: usize) -> u32 {
    let extension = if phase_on(flags.maxgreen2_phases, phase_idx) {
        timing.maximum_extensions[1]
    } else if phase_on(flags.maxgreen3_phases, phase_idx) {
        timing.maximum_extensions[2]
    } else {
        timing.maximum_extensions[0]
    };
    (u32::from(timing.minimum_green) + u32::from(extension)) * 10
}

/// Guaranteed green for the active phase, keyed on the live interval.
fn guaranteed_green_active(
    timing: &PhaseTiming,
    flags: &PhaseFlags,
    phase_idx: usize,
    active_interval: u8,
) -> u32 {
    if active_interval <= 0x01 {
        (walk_interval(timing, flags, phase_idx) + u32::from(timing.walk_clearance)) * 10
    } else if active_interval < 0x05 {
        u32::from(timing.minimum_green) * 10
    } else {
        0
    }
}

/// Guaranteed green for a phase that is not active: the walk service when a
/// pedestrian call/recall stands, minimum green otherwise.
fn guaranteed_green_pending(
    timing: &PhaseTiming,
    flags: &PhaseFlags,
    phase_idx: usize,
    status: &PhaseStatus,
) -> u32 {
    if status.recall_status == PhaseRecall::Ped || status.call_status == PhaseCall::Ped {
        (walk_interval(timing, flags, phase_idx) + u32::from(timing.walk_clearance)) * 10
    } else {
        u32::from(timing.minimum_green) * 10
    }
}

/// Barrier crossing synchronizes both rings on the larger bound.
fn barrier_cross_adjust(time2start: &mut [PredictedBound; 2]) {
    let bound_l = time2start[0].bound_l.max(time2start[1].bound_l);
    let bound_u = time2start[0].bound_u.max(time2start[1].bound_u);
    time2start[0] = PredictedBound { bound_l, bound_u };
    time2start[1] = PredictedBound { bound_l, bound_u };
}

/// Deciseconds from `local_cycle_clock` to a force-off point. The sync phase
/// terminates at the yield point, with a one-decisecond grace when its
/// force-off rides at local zero, and wraps through cycle end.
fn time_to_forceoff(force_off: u8, local_cycle_clock: u16, cycle_length: u16, is_sync: bool) -> u32 {
    let forceoff = if is_sync && force_off == 0 {
        10u32
    } else {
        u32::from(force_off) * 10
    };
    let clock = u32::from(local_cycle_clock);
    if is_sync {
        if forceoff > clock {
            forceoff - clock
        } else {
            forceoff + u32::from(cycle_length) - clock
        }
    } else if forceoff > clock {
        forceoff - clock
    } else {
        0
    }
}

fn forceoff_only_active(concurrent: ConcurrentType, is_sync: bool, is_lag: bool) -> bool {
    concurrent == ConcurrentType::MajorMajor
        || (concurrent == ConcurrentType::MinorMajor && (is_sync || is_lag))
}

fn forceoff_only_pending(is_sync: bool, is_leadlag_mode: bool, is_minor_lag: bool) -> bool {
    is_sync || (is_leadlag_mode && is_minor_lag)
}

fn green_end(time2maxout: u32, time2forceoff: u32, forceoff_only: bool) -> u32 {
    if forceoff_only {
        time2forceoff
    } else {
        time2maxout.min(time2forceoff)
    }
}

/// Active-phase prediction when running free: no force-off constraint.
#[allow(clippy::too_many_arguments)]
fn update_active_free(
    status: &mut PhaseStatus,
    time2start: &mut PredictedBound,
    signal: &SignalStatus,
    timing: &PhaseTiming,
    flags: &PhaseFlags,
    ring: usize,
    timer_time: u64,
    msec: u64,
) {
    let interval_into = elapsed_ds(timer_time, msec);
    if status.state.is_green() {
        let state_into = elapsed_ds(status.state_start_time, msec);
        let timeleft = green_left(
            signal.active_interval[ring],
            signal.interval_timer[ring],
            interval_into,
            timing,
        );
        let phase_idx = usize::from(signal.active_phases[ring] - 1);
        let maxgreen = green_to_maxout(timing, flags, phase_idx);
        let time2maxout = maxgreen.saturating_sub(state_into);
        let guaranteed = if status.recall_status == PhaseRecall::Maximum {
            maxgreen
        } else {
            guaranteed_green_active(timing, flags, phase_idx, signal.active_interval[ring])
        };
        let time2gapout = guaranteed.saturating_sub(state_into);
        let time2maxout = time2maxout.max(time2gapout);
        status.time2next.bound_l = if time2gapout == 0 {
            timeleft as u16
        } else {
            time2gapout as u16
        };
        status.time2next.bound_u = if time2maxout == 0 {
            timeleft as u16
        } else {
            time2maxout as u16
        };
        let clearance = u32::from(timing.yellow_interval) + u32::from(timing.red_clearance);
        time2start.bound_l = status.time2next.bound_l + clearance as u16;
        time2start.bound_u = status.time2next.bound_u + clearance as u16;
    } else if status.state.is_yellow() {
        let timeleft = u32::from(signal.interval_timer[ring]);
        let left = if timeleft >= interval_into {
            timeleft - interval_into
        } else {
            timeleft
        };
        status.time2next.bound_l = left as u16;
        status.time2next.bound_u = status.time2next.bound_l;
        let clearance = if signal.next_phases[ring] == signal.active_phases[ring] {
            u32::from(flags.red_revert_interval).max(u32::from(timing.red_clearance))
        } else {
            u32::from(timing.red_clearance)
        };
        time2start.bound_l = status.time2next.bound_l + clearance as u16;
        time2start.bound_u = time2start.bound_l;
    } else {
        // red clearance / red revert countdowns are fixed
        let timeleft = u32::from(signal.interval_timer[ring]);
        let left = if timeleft >= interval_into {
            timeleft - interval_into
        } else {
            timeleft
        };
        status.time2next.bound_l = left as u16;
        status.time2next.bound_u = status.time2next.bound_l;
        time2start.bound_l = status.time2next.bound_l;
        time2start.bound_u = time2start.bound_l;
    }
}

/// Active-phase prediction under coordination: force-off constrains green.
#[allow(clippy::too_many_arguments)]
fn update_active_coord(
    status: &mut PhaseStatus,
    time2start: &mut PredictedBound,
    plan: &CoordPlan,
    signal: &SignalStatus,
    timing: &PhaseTiming,
    flags: &PhaseFlags,
    ring: usize,
    local_cycle_clock: u16,
    cycle_length: u16,
    concurrent: ConcurrentType,
    timer_time: u64,
    msec: u64,
) {
    let interval_into = elapsed_ds(timer_time, msec);
    if status.state.is_green() {
        let state_into = elapsed_ds(status.state_start_time, msec);
        let timeleft = green_left(
            signal.active_interval[ring],
            signal.interval_timer[ring],
            interval_into,
            timing,
        );
        let phase_idx = usize::from(signal.active_phases[ring] - 1);
        let maxgreen = green_to_maxout(timing, flags, phase_idx);
        let time2maxout = maxgreen.saturating_sub(state_into);
        let is_sync = signal.active_phases[ring] == plan.coordinated_phases[ring];
        let time2forceoff = time_to_forceoff(
            signal.active_force_off[ring],
            local_cycle_clock,
            cycle_length,
            is_sync,
        );
        let forceoff_only =
            forceoff_only_active(concurrent, is_sync, phase_on(plan.lag_phases, phase_idx));
        let mut time2terminate = green_end(time2maxout, time2forceoff, forceoff_only);
        let guaranteed = if status.recall_status == PhaseRecall::Maximum {
            time2terminate
        } else {
            guaranteed_green_active(timing, flags, phase_idx, signal.active_interval[ring])
        };
        let time2gapout = guaranteed.saturating_sub(state_into);
        if time2terminate < time2gapout {
            time2terminate = time2gapout;
        }
        status.time2next.bound_u = if time2terminate == 0 {
            timeleft as u16
        } else {
            time2terminate as u16
        };
        status.time2next.bound_l = if forceoff_only {
            status.time2next.bound_u
        } else if time2gapout == 0 {
            timeleft as u16
        } else {
            time2gapout as u16
        };
        let clearance = u32::from(timing.yellow_interval) + u32::from(timing.red_clearance);
        time2start.bound_l = status.time2next.bound_l + clearance as u16;
        time2start.bound_u = status.time2next.bound_u + clearance as u16;
    } else {
        // yellow and red intervals behave as in free running
        update_active_free(status, time2start, signal, timing, flags, ring, timer_time, msec);
    }
}

/// Rolls a pending phase's service window into `time2start`: free variant.
fn next_phase_start_free(
    time2start: &mut PredictedBound,
    timing: &PhaseTiming,
    flags: &PhaseFlags,
    phase_idx: usize,
    status: &PhaseStatus,
) {
    let maxgreen = green_to_maxout(timing, flags, phase_idx);
    let guaranteed = if status.recall_status == PhaseRecall::Maximum {
        maxgreen
    } else {
        guaranteed_green_pending(timing, flags, phase_idx, status)
    };
    let maxgreen = maxgreen.max(guaranteed);
    let clearance = u32::from(timing.yellow_interval) + u32::from(timing.red_clearance);
    if status.recall_status != PhaseRecall::None || status.call_status != PhaseCall::None {
        time2start.bound_l = (u32::from(time2start.bound_l) + guaranteed + clearance) as u16;
    }
    time2start.bound_u = (u32::from(time2start.bound_u) + maxgreen + clearance) as u16;
}

/// Rolls a pending phase's service window into `time2start` under
/// coordination, recomputing force-off from the predicted cycle clock.
#[allow(clippy::too_many_arguments)]
fn next_phase_start_coord(
    time2start: &mut PredictedBound,
    timing: &PhaseTiming,
    flags: &PhaseFlags,
    phase_idx: usize,
    status: &PhaseStatus,
    plan: &CoordPlan,
    local_cycle_clock: u16,
    cycle_length: u16,
) {
    let maxgreen = green_to_maxout(timing, flags, phase_idx);
    let is_sync = phase_on(plan.sync_phases, phase_idx);
    let is_leadlag_mode = matches!(plan.lead_lag_mode, LeadLagMode::LeadLag | LeadLagMode::LagLead);
    let minor_lag = plan.leadlag_phases[usize::from(plan.sync_barrier)][usize::from(plan.sync_ring)]
        [1]
        == phase_idx as u8 + 1;
    let forceoff_only = forceoff_only_pending(is_sync, is_leadlag_mode, minor_lag);
    let clearance = u32::from(timing.yellow_interval) + u32::from(timing.red_clearance);

    let roll = |start_bound: u16| -> u32 {
        let mut clock = start_bound + local_cycle_clock;
        if clock > cycle_length {
            clock -= cycle_length;
        }
        let time2forceoff = time_to_forceoff(plan.force_off[phase_idx], clock, cycle_length, is_sync);
        let mut time2terminate = green_end(maxgreen, time2forceoff, forceoff_only);
        let guaranteed = if status.recall_status == PhaseRecall::Maximum {
            time2terminate
        } else {
            guaranteed_green_pending(timing, flags, phase_idx, status)
        };
        if time2terminate < guaranteed {
            time2terminate = guaranteed;
        }
        time2terminate
    };
    let time2terminate_l = roll(time2start.bound_l);
    let time2terminate_u = roll(time2start.bound_u);
    if forceoff_only {
        time2start.bound_l = (u32::from(time2start.bound_l) + time2terminate_l + clearance) as u16;
        time2start.bound_u = (u32::from(time2start.bound_u) + time2terminate_u + clearance) as u16;
    } else {
        time2start.bound_u = (u32::from(time2start.bound_u) + time2terminate_u + clearance) as u16;
        if status.recall_status != PhaseRecall::None || status.call_status != PhaseCall::None {
            let guaranteed = if status.recall_status == PhaseRecall::Maximum {
                time2terminate_l
            } else {
                guaranteed_green_pending(timing, flags, phase_idx, status)
            };
            time2start.bound_l =
                (u32::from(time2start.bound_l) + guaranteed + clearance) as u16;
        }
    }
}

fn ped_interval_left(interval_timer: u8, timer_time: u64, msec: u64) -> u16 {
    let timeinto = elapsed_ds(timer_time, msec) as u16;
    let countdown = u16::from(interval_timer) * 10;
    if countdown > timeinto {
        countdown - timeinto
    } else {
        countdown
    }
}

impl ControllerStatus {
    /// First full initialization once every required poll has returned and
    /// the first raw SPaT is in hand.
    pub fn initialize(
        &mut self,
        card: &TimingCard,
        signal: &SignalStatus,
        cabinet_status: u8,
        msec: u64,
    ) -> SpatOutcome {
        self.controller_addr = signal.controller_addr;
        self.msec = msec;
        self.status = cabinet_status;
        for ring in 0..2 {
            if signal.active_phases[ring] > 0 {
                self.active_force_off[usize::from(signal.active_phases[ring] - 1)] =
                    signal.active_force_off[ring];
            }
        }
        self.mode = TimingCard::control_mode(self.status, signal.preempt, signal.pattern_num);
        self.coordplan_index = card.plan_index(self.mode, signal.plan_num);
        if self.mode == ControlMode::Coordination && self.coordplan_index.is_none() {
            return SpatOutcome::PlanUnknown;
        }
        let (permitted, permitted_ped) = card.permitted_phases(self.coordplan_index);
        self.permitted_phases = permitted;
        self.permitted_ped_phases = permitted_ped;
        let (coordinated, synch) = card.sync_phase(self.coordplan_index);
        self.coordinated_phases = coordinated;
        self.synch_phase = synch;
        self.cycle_length = card.cycle_length(self.coordplan_index);
        self.curbarrier = barrier_of(signal.active_phase);
        self.curbarrier_start_time = msec;
        self.timer_time = [msec, msec];
        self.cycle_start_time = msec;
        self.cycle_clock_time = msec;
        for i in 0..8 {
            let ring = ring_of(i as u8 + 1);
            let status = &mut self.phase_status[i];
            if !phase_on(self.permitted_phases, i) {
                status.state = PhaseState::Dark;
            } else {
                status.state = TimingCard::phase_state(
                    self.mode,
                    signal.active_phases[ring],
                    signal.active_interval[ring],
                    i as u8 + 1,
                );
                status.state_start_time = msec;
                status.call_status = PhaseCall::None;
                status.recall_status = card.phase_recall(self.mode, self.coordplan_index, i);
            }
            if !phase_on(self.permitted_ped_phases, i) {
                status.pedstate = PedState::Dark;
            } else {
                status.pedstate = TimingCard::ped_state(
                    self.mode,
                    signal.active_phases[ring],
                    signal.active_interval[ring],
                    i as u8 + 1,
                );
                status.pedstate_start_time = msec;
            }
        }
        self.signal_status = *signal;
        self.is_plan_timing_ready = true;
        SpatOutcome::Updated
    }

    /// Per-SPaT update: state reconciliation followed by prediction.
    pub fn on_new_spat(
        &mut self,
        card: &TimingCard,
        signal: &SignalStatus,
        msec: u64,
    ) -> SpatOutcome {
        let mut signal = *signal;
        self.msec = msec;
        for ring in 0..2 {
            if signal.active_phases[ring] > 0 {
                self.active_force_off[usize::from(signal.active_phases[ring] - 1)] =
                    signal.active_force_off[ring];
            }
        }
        // plan transition
        if signal.pattern_num != self.signal_status.pattern_num {
            self.is_plan_timing_ready = false;
            self.mode = TimingCard::control_mode(self.status, signal.preempt, signal.pattern_num);
            self.coordplan_index = card.plan_index(self.mode, signal.plan_num);
            if self.mode == ControlMode::Coordination && self.coordplan_index.is_none() {
                return SpatOutcome::PlanUnknown;
            }
            let (permitted, permitted_ped) = card.permitted_phases(self.coordplan_index);
            self.permitted_phases = permitted;
            self.permitted_ped_phases = permitted_ped;
            let (coordinated, synch) = card.sync_phase(self.coordplan_index);
            self.coordinated_phases = coordinated;
            self.synch_phase = synch;
            self.cycle_length = card.cycle_length(self.coordplan_index);
            for i in 0..8 {
                if phase_on(self.permitted_phases, i) {
                    self.phase_status[i].recall_status =
                        card.phase_recall(self.mode, self.coordplan_index, i);
                }
            }
            self.is_plan_timing_ready = true;
        }
        // barrier change
        let curbarrier = barrier_of(signal.active_phase);
        if curbarrier != self.curbarrier {
            self.curbarrier = curbarrier;
            self.curbarrier_start_time = msec;
        }
        // cycle clock traces
        if signal.local_cycle_clock != self.signal_status.local_cycle_clock {
            self.cycle_clock_time = msec;
        }
        if signal.local_cycle_clock < self.signal_status.local_cycle_clock
            && signal.local_cycle_clock < 3
        {
            self.cycle_start_time = msec - u64::from(signal.local_cycle_clock) * 1000;
        }
        // per-ring interval timers
        for ring in 0..2 {
            if signal.active_phases[ring] != self.signal_status.active_phases[ring]
                || signal.active_interval[ring] != self.signal_status.active_interval[ring]
                || signal.interval_timer[ring] != self.signal_status.interval_timer[ring]
            {
                self.timer_time[ring] = msec;
            }
        }
        // phase state and call changes
        for i in 0..8 {
            let ring = ring_of(i as u8 + 1);
            if phase_on(self.permitted_phases, i) {
                let state = TimingCard::phase_state(
                    self.mode,
                    signal.active_phases[ring],
                    signal.active_interval[ring],
                    i as u8 + 1,
                );
                let status = &mut self.phase_status[i];
                if state != status.state {
                    status.state = state;
                    status.state_start_time = msec;
                }
                status.call_status = PhaseCall::None;
                if phase_on(signal.veh_call, i) {
                    status.call_status = PhaseCall::Vehicle;
                }
                // a ped call outranks the vehicle call
                if phase_on(signal.ped_call, i) {
                    status.call_status = PhaseCall::Ped;
                }
            }
            if phase_on(self.permitted_ped_phases, i) {
                let pedstate = TimingCard::ped_state(
                    self.mode,
                    signal.active_phases[ring],
                    signal.active_interval[ring],
                    i as u8 + 1,
                );
                let status = &mut self.phase_status[i];
                if pedstate != status.pedstate {
                    status.pedstate = pedstate;
                    status.pedstate_start_time = msec;
                }
            }
        }

        match self.mode {
            ControlMode::RunningFree => {
                self.cur_local_cycle_clock = 0;
                self.predict_free(card, &signal, msec);
            },
            ControlMode::Coordination => {
                self.cur_local_cycle_clock = ((elapsed_ds(self.cycle_clock_time, msec) as u16)
                    .wrapping_add(u16::from(signal.local_cycle_clock) * 10))
                    % self.cycle_length.max(1);
                self.predict_coord(card, &mut signal, msec);
            },
            _ => {},
        }
        self.predict_ped(card, &signal, msec);
        self.signal_status = signal;
        SpatOutcome::Updated
    }

    /// Walks the future phases from `time2start`, free variant.
    fn predict_free(&mut self, card: &TimingCard, signal: &SignalStatus, msec: u64) {
        let flags = card.phaseflags;
        let mut time2start = [PredictedBound::default(); 2];
        for ring in 0..2 {
            let phase = signal.active_phases[ring];
            if phase > 0 {
                let (status, timing) = (
                    &mut self.phase_status[usize::from(phase - 1)],
                    &card.phasetiming[usize::from(phase - 1)],
                );
                update_active_free(
                    status,
                    &mut time2start[ring],
                    signal,
                    timing,
                    &flags,
                    ring,
                    self.timer_time[ring],
                    msec,
                );
            }
        }
        self.walk_future_phases(card, signal, &mut time2start, None);
    }

    fn predict_coord(&mut self, card: &TimingCard, signal: &mut SignalStatus, msec: u64) {
        let Some(plan_idx) = self.coordplan_index else {
            return;
        };
        let plan = card.coordplans[plan_idx];
        let flags = card.phaseflags;
        let concurrent = TimingCard::concurrent_phase_type(signal.active_phase, plan.sync_phases);
        // force-off alignment across rings
        match concurrent {
            ConcurrentType::MinorMajor => {
                let sync_ring = usize::from(plan.sync_ring);
                let ring = (sync_ring + 1) % 2;
                let lag_phase = signal.active_phases[sync_ring];
                let ring_phase = signal.active_phases[ring];
                if lag_phase > 0
                    && ring_phase > 0
                    && phase_on(plan.lag_phases, usize::from(ring_phase - 1))
                    && signal.active_force_off[0] != signal.active_force_off[1]
                    && signal.active_force_off[ring] < signal.active_force_off[sync_ring]
                {
                    signal.active_force_off[ring] = signal.active_force_off[sync_ring];
                }
            },
            ConcurrentType::MajorMajor => {
                if plan.sync_phases.count_ones() == 2
                    && signal.active_force_off[0] > 0
                    && signal.active_force_off[1] > 0
                    && signal.active_force_off[0] != signal.active_force_off[1]
                {
                    let aligned = signal.active_force_off[0].min(signal.active_force_off[1]);
                    signal.active_force_off = [aligned, aligned];
                }
            },
            ConcurrentType::MinorMinor => {},
        }
        // the coordinated phases stand called
        for ring in 0..2 {
            let phase = signal.active_phases[ring];
            if phase > 0 && phase == plan.coordinated_phases[ring] {
                let status = &mut self.phase_status[usize::from(phase - 1)];
                if status.call_status == PhaseCall::None {
                    status.call_status = PhaseCall::Vehicle;
                }
            }
        }
        let mut time2start = [PredictedBound::default(); 2];
        for ring in 0..2 {
            let phase = signal.active_phases[ring];
            if phase > 0 {
                let idx = usize::from(phase - 1);
                update_active_coord(
                    &mut self.phase_status[idx],
                    &mut time2start[ring],
                    &plan,
                    signal,
                    &card.phasetiming[idx],
                    &flags,
                    ring,
                    self.cur_local_cycle_clock,
                    self.cycle_length,
                    concurrent,
                    self.timer_time[ring],
                    msec,
                );
            }
        }
        self.walk_future_phases(card, signal, &mut time2start, Some(plan_idx));
    }

    /// Barrier/ring/lead-lag walk shared by both modes. `plan_idx` selects
    /// the coordination variant of the pending-phase roll.
    fn walk_future_phases(
        &mut self,
        card: &TimingCard,
        signal: &SignalStatus,
        time2start: &mut [PredictedBound; 2],
        plan_idx: Option<usize>,
    ) {
        let flags = card.phaseflags;
        let leadlag = match plan_idx {
            Some(i) => card.coordplans[i].leadlag_phases,
            None => card.freeplan.leadlag_phases,
        };
        let lag_mask = match plan_idx {
            Some(i) => card.coordplans[i].lag_phases,
            None => card.freeplan.lag_phases,
        };
        let curbarrier = usize::from(self.curbarrier);
        let mut startbarrier = curbarrier;
        let mut startphases = [signal.active_phases[0], signal.active_phases[1]];
        let local_cycle_clock = self.cur_local_cycle_clock;
        let cycle_length = self.cycle_length;

        let roll = |time2start: &mut PredictedBound, phase_idx: usize, status: &PhaseStatus| {
            match plan_idx {
                Some(i) => next_phase_start_coord(
                    time2start,
                    &card.phasetiming[phase_idx],
                    &flags,
                    phase_idx,
                    status,
                    &card.coordplans[i],
                    local_cycle_clock,
                    cycle_length,
                ),
                None => next_phase_start_free(
                    time2start,
                    &card.phasetiming[phase_idx],
                    &flags,
                    phase_idx,
                    status,
                ),
            }
        };

        // next_phase is on when an active phase is clearing
        if signal.next_phase != 0 {
            let nextbarrier = usize::from(barrier_of(signal.next_phase));
            if nextbarrier != curbarrier {
                barrier_cross_adjust(time2start);
                startbarrier = nextbarrier;
            }
            for ring in 0..2 {
                let ring_phase = signal.next_phases[ring];
                if startbarrier != curbarrier {
                    startphases[ring] = ring_phase;
                }
                if ring_phase > 0 {
                    startphases[ring] = ring_phase;
                    let idx = usize::from(ring_phase - 1);
                    if self.phase_status[idx].state == PhaseState::ProtectedRed {
                        self.phase_status[idx].time2next.bound_l = time2start[ring].bound_l;
                        self.phase_status[idx].time2next.bound_u = time2start[ring].bound_u;
                    }
                    if self.phase_status[idx].call_status == PhaseCall::None {
                        self.phase_status[idx].call_status = PhaseCall::Vehicle;
                    }
                    let status = self.phase_status[idx];
                    roll(&mut time2start[ring], idx, &status);
                }
            }
        }
        // lag phase of the start barrier
        for ring in 0..2 {
            let lagphase = leadlag[startbarrier][ring][1];
            if lagphase > 0
                && lagphase != startphases[ring]
                && lagphase != signal.active_phases[ring]
            {
                let idx = usize::from(lagphase - 1);
                self.phase_status[idx].time2next.bound_l = time2start[ring].bound_l;
                self.phase_status[idx].time2next.bound_u = time2start[ring].bound_u;
                let status = self.phase_status[idx];
                roll(&mut time2start[ring], idx, &status);
            }
        }
        barrier_cross_adjust(time2start);
        if startbarrier == curbarrier {
            // phases on the other barrier
            let other = (startbarrier + 1) % 2;
            for ring in 0..2 {
                let leadphase = leadlag[other][ring][0];
                let lagphase = leadlag[other][ring][1];
                if leadphase > 0 {
                    let idx = usize::from(leadphase - 1);
                    self.phase_status[idx].time2next.bound_l = time2start[ring].bound_l;
                    self.phase_status[idx].time2next.bound_u = time2start[ring].bound_u;
                    let status = self.phase_status[idx];
                    roll(&mut time2start[ring], idx, &status);
                }
                if lagphase > 0 && lagphase != leadphase {
                    let idx = usize::from(lagphase - 1);
                    self.phase_status[idx].time2next.bound_l = time2start[ring].bound_l;
                    self.phase_status[idx].time2next.bound_u = time2start[ring].bound_u;
                    let status = self.phase_status[idx];
                    roll(&mut time2start[ring], idx, &status);
                }
            }
            barrier_cross_adjust(time2start);
            // remaining phases back on the start barrier
            for ring in 0..2 {
                let leadphase = leadlag[startbarrier][ring][0];
                let lagphase = leadlag[startbarrier][ring][1];
                if leadphase > 0 {
                    let idx = usize::from(leadphase - 1);
                    let active = signal.active_phases[ring];
                    if (leadphase == active && self.phase_status[idx].state == PhaseState::ProtectedRed)
                        || (leadphase != active && leadphase != startphases[ring])
                    {
                        self.phase_status[idx].time2next.bound_l = time2start[ring].bound_l;
                        self.phase_status[idx].time2next.bound_u = time2start[ring].bound_u;
                        let status = self.phase_status[idx];
                        roll(&mut time2start[ring], idx, &status);
                    }
                }
                if lagphase > 0 && lagphase != leadphase {
                    let idx = usize::from(lagphase - 1);
                    if lagphase == signal.active_phases[ring]
                        && self.phase_status[idx].state == PhaseState::ProtectedRed
                    {
                        self.phase_status[idx].time2next.bound_l = time2start[ring].bound_l;
                        self.phase_status[idx].time2next.bound_u = time2start[ring].bound_u;
                        let status = self.phase_status[idx];
                        roll(&mut time2start[ring], idx, &status);
                    }
                }
            }
        } else {
            // start phases already crossed onto the other barrier
            for ring in 0..2 {
                let leadphase = leadlag[curbarrier][ring][0];
                let lagphase = leadlag[curbarrier][ring][1];
                if leadphase > 0 {
                    let idx = usize::from(leadphase - 1);
                    let active = signal.active_phases[ring];
                    if (leadphase == active && self.phase_status[idx].state == PhaseState::ProtectedRed)
                        || (leadphase != active && leadphase != startphases[ring])
                    {
                        self.phase_status[idx].time2next.bound_l = time2start[ring].bound_l;
                        self.phase_status[idx].time2next.bound_u = time2start[ring].bound_u;
                        let status = self.phase_status[idx];
                        roll(&mut time2start[ring], idx, &status);
                    }
                }
                if lagphase > 0 && lagphase != leadphase {
                    let idx = usize::from(lagphase - 1);
                    let active = signal.active_phases[ring];
                    if (lagphase == active && self.phase_status[idx].state == PhaseState::ProtectedRed)
                        || leadphase == active
                    {
                        self.phase_status[idx].time2next.bound_l = time2start[ring].bound_l;
                        self.phase_status[idx].time2next.bound_u = time2start[ring].bound_u;
                        let status = self.phase_status[idx];
                        roll(&mut time2start[ring], idx, &status);
                    }
                }
            }
            // remaining lead phases on the start barrier after a lag start
            let lagging_start = (startphases[0] > 0
                && phase_on(lag_mask, usize::from(startphases[0] - 1)))
                || (startphases[1] > 0 && phase_on(lag_mask, usize::from(startphases[1] - 1)));
            if lagging_start {
                barrier_cross_adjust(time2start);
                for ring in 0..2 {
                    let leadphase = leadlag[startbarrier][ring][0];
                    if leadphase > 0 && leadphase != startphases[ring] {
                        let idx = usize::from(leadphase - 1);
                        self.phase_status[idx].time2next.bound_l = time2start[ring].bound_l;
                        self.phase_status[idx].time2next.bound_u = time2start[ring].bound_u;
                        let status = self.phase_status[idx];
                        roll(&mut time2start[ring], idx, &status);
                    }
                }
            }
        }
        // remember the final window for pedestrian fall-through
        self.final_time2start = *time2start;
    }

    /// Pedestrian bounds derived after the vehicular walk.
    fn predict_ped(&mut self, card: &TimingCard, signal: &SignalStatus, msec: u64) {
        if self.mode == ControlMode::Flashing {
            return;
        }
        for i in 0..8 {
            if !phase_on(self.permitted_ped_phases, i) {
                continue;
            }
            let ring = ring_of(i as u8 + 1);
            let status = &mut self.phase_status[i];
            if status.pedstate == PedState::Walk || status.pedstate == PedState::FlashDontWalk {
                let left =
                    ped_interval_left(signal.interval_timer[ring], self.timer_time[ring], msec);
                status.pedtime2next = PredictedBound {
                    bound_l: left,
                    bound_u: left,
                };
            } else if status.state == PhaseState::ProtectedRed {
                status.pedtime2next = status.time2next;
            } else if status.state.is_yellow() && (i as u8 + 1) == signal.next_phases[ring] {
                let timing = &card.phasetiming[i];
                let clearance = u32::from(card.phaseflags.red_revert_interval)
                    .max(u32::from(timing.red_clearance));
                status.pedtime2next = PredictedBound {
                    bound_l: status.time2next.bound_l + clearance as u16,
                    bound_u: status.time2next.bound_u + clearance as u16,
                };
            } else {
                status.pedtime2next = self.final_time2start[ring];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timecard::tests::eight_phase_card;

    fn spat(active: u8, interval: [u8; 2], timer: [u8; 2], pattern: u8, clock: u8) -> SignalStatus {
        SignalStatus {
            controller_addr: 5,
            active_phase: active,
            active_phases: crate::ab3418::ring_phases(active),
            active_interval: interval,
            interval_timer: timer,
            pattern_num: pattern,
            plan_num: crate::ab3418::pattern_to_plan(pattern).0,
            local_cycle_clock: clock,
            ..SignalStatus::default()
        }
    }

    fn started(card: &TimingCard, signal: &SignalStatus, msec: u64) -> ControllerStatus {
        let mut status = ControllerStatus::default();
        assert_eq!(
            status.initialize(card, signal, 0, msec),
            SpatOutcome::Updated
        );
        status
    }

    #[test]
    fn initialize_classifies_plan_and_states() {
        let card = eight_phase_card();
        // pattern 7 = plan 3 offset 0; phases 2+6 green in min-green
        let signal = spat(0b0010_0010, [2, 2], [60, 60], 7, 0);
        let status = started(&card, &signal, 1_000_000);
        assert_eq!(status.mode, ControlMode::Coordination);
        assert_eq!(status.coordplan_index, Some(0));
        assert_eq!(status.synch_phase, 2);
        assert_eq!(status.permitted_phases, 0xFF);
        assert_eq!(status.cycle_length, 800);
        assert!(status.phase_status[1].state.is_green());
        assert!(status.phase_status[5].state.is_green());
        assert_eq!(status.phase_status[0].state, PhaseState::ProtectedRed);
    }

    #[test]
    fn unknown_plan_requests_replanning() {
        let card = eight_phase_card();
        let signal = spat(0b0010_0010, [2, 2], [60, 60], 13, 0); // plan 5, not polled
        let mut status = ControllerStatus::default();
        assert_eq!(
            status.initialize(&card, &signal, 0, 1_000_000),
            SpatOutcome::PlanUnknown
        );
    }

    #[test]
    fn forceoff_only_sync_phases_have_equal_bounds() {
        let card = eight_phase_card();
        let mut signal = spat(0b0010_0010, [2, 2], [60, 60], 7, 25);
        signal.active_force_off = [40, 40];
        let mut status = started(&card, &signal, 1_000_000);
        let outcome = status.on_new_spat(&card, &signal, 1_000_000);
        assert_eq!(outcome, SpatOutcome::Updated);
        // both sync phases active: majorMajor, force-off only; 40 s force-off
        // at 25 s clock leaves 150 ds
        let p2 = status.phase_status[1].time2next;
        let p6 = status.phase_status[5].time2next;
        assert_eq!(p2.bound_l, p2.bound_u);
        assert_eq!(p6.bound_l, p6.bound_u);
        assert_eq!(p2.bound_l, 150);
        assert_eq!(p6.bound_l, 150);
    }

    #[test]
    fn bounds_are_ordered_for_every_phase() {
        let card = eight_phase_card();
        let mut signal = spat(0b0010_0010, [2, 2], [60, 60], 7, 25);
        signal.active_force_off = [40, 40];
        signal.veh_call = 0xFF;
        let mut status = started(&card, &signal, 1_000_000);
        status.on_new_spat(&card, &signal, 1_000_100);
        for i in 0..8 {
            let b = status.phase_status[i].time2next;
            assert!(b.bound_l <= b.bound_u, "phase {} bounds inverted", i + 1);
            assert!(b.bound_u <= 2 * status.cycle_length, "phase {}", i + 1);
        }
    }

    #[test]
    fn rings_synchronize_across_barriers() {
        let card = eight_phase_card();
        let mut signal = spat(0b0010_0010, [2, 2], [60, 60], 7, 25);
        signal.active_force_off = [40, 40];
        signal.veh_call = 0xFF;
        let mut status = started(&card, &signal, 1_000_000);
        status.on_new_spat(&card, &signal, 1_000_100);
        // lead phases of the next barrier (3 and 7) start together
        let p3 = status.phase_status[2].time2next;
        let p7 = status.phase_status[6].time2next;
        assert_eq!(p3.bound_l, p7.bound_l);
        assert_eq!(p3.bound_u, p7.bound_u);
    }

    #[test]
    fn max_recall_pins_green_bounds_when_free() {
        let mut card = eight_phase_card();
        card.phaseflags.maximum_recall_phases = 0b0010_0010;
        let signal = spat(0b0010_0010, [2, 2], [60, 60], crate::ab3418::PATTERN_FREE, 0);
        let mut status = started(&card, &signal, 1_000_000);
        status.on_new_spat(&card, &signal, 1_000_000);
        assert_eq!(status.mode, ControlMode::RunningFree);
        let p2 = status.phase_status[1].time2next;
        // maxGreen = (8 + 25) * 10 = 330 ds with no elapsed green
        assert_eq!(p2.bound_l, p2.bound_u);
        assert_eq!(p2.bound_u, 330);
    }

    #[test]
    fn yellow_bounds_track_the_interval_timer() {
        let card = eight_phase_card();
        let signal = spat(0b0010_0010, [2, 2], [60, 60], 7, 10);
        let mut status = started(&card, &signal, 1_000_000);
        // phases clear: yellow termination interval with 35 ds on the timer
        let mut next = spat(0b0010_0010, [0x0C, 0x0C], [35, 35], 7, 40);
        next.next_phase = 0b0100_0100;
        next.next_phases = crate::ab3418::ring_phases(next.next_phase);
        status.on_new_spat(&card, &next, 1_000_100);
        let p2 = status.phase_status[1];
        assert_eq!(p2.state, PhaseState::ProtectedYellow);
        assert_eq!(p2.time2next.bound_l, 35);
        assert_eq!(p2.time2next.bound_u, 35);
        // the next phases inherit yellow + red clearance as their start bound
        let p3 = status.phase_status[2].time2next;
        assert_eq!(p3.bound_l, 35 + 15);
    }

    #[test]
    fn ped_walk_counts_the_interval_down() {
        let card = eight_phase_card();
        // walk interval on phase 2: interval code 0, 7 s on the timer
        let signal = spat(0b0010_0010, [0x00, 0x00], [7, 7], 7, 5);
        let mut status = started(&card, &signal, 1_000_000);
        status.on_new_spat(&card, &signal, 1_000_000);
        let p2 = status.phase_status[1];
        assert_eq!(p2.pedstate, PedState::Walk);
        assert_eq!(p2.pedtime2next.bound_l, p2.pedtime2next.bound_u);
        assert_eq!(p2.pedtime2next.bound_l, 70);
    }
}
