//! Controller timing card: the static configuration reconstructed from
//! AB3418 polls (or re-read from the on-disk card file), plus the plan
//! derivations the predictor consumes.
//!
//! Phase masks throughout are 8-bit with bit i for phase i+1.

use crate::ab3418::{barrier_of, ring_phases, PATTERN_FLASHING, PATTERN_FREE};
use crate::error::CardError;

/// Controller operating mode classified from status and pattern number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ControlMode {
    RunningFree = 0,
    Coordination = 1,
    Flashing = 2,
    Preemption = 3,
    #[default]
    Unavailable = 4,
}

/// Vehicular signal head state of one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PhaseState {
    #[default]
    Dark = 0,
    FlashingRed = 1,
    ProtectedRed = 2,
    ProtectedGreen = 3,
    PermissiveGreen = 4,
    ProtectedYellow = 5,
    PermissiveYellow = 6,
}

impl PhaseState {
    pub fn is_green(self) -> bool {
        matches!(self, PhaseState::ProtectedGreen | PhaseState::PermissiveGreen)
    }

    pub fn is_yellow(self) -> bool {
        matches!(self, PhaseState::ProtectedYellow | PhaseState::PermissiveYellow)
    }

    pub fn from_u8(raw: u8) -> PhaseState {
        match raw {
            1 => PhaseState::FlashingRed,
            2 => PhaseState::ProtectedRed,
            3 => PhaseState::ProtectedGreen,
            4 => PhaseState::PermissiveGreen,
            5 => PhaseState::ProtectedYellow,
            6 => PhaseState::PermissiveYellow,
            _ => PhaseState::Dark,
        }
    }
}

/// Pedestrian signal state of one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PedState {
    #[default]
    Dark = 0,
    Walk = 1,
    FlashDontWalk = 2,
    DontWalk = 3,
    FlashingRed = 4,
}

impl PedState {
    pub fn from_u8(raw: u8) -> PedState {
        match raw {
            1 => PedState::Walk,
            2 => PedState::FlashDontWalk,
            3 => PedState::DontWalk,
            4 => PedState::FlashingRed,
            _ => PedState::Dark,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PhaseCall {
    #[default]
    None = 0,
    Vehicle = 1,
    Ped = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PhaseRecall {
    #[default]
    None = 0,
    Minimum = 1,
    Maximum = 2,
    Ped = 3,
    Bike = 4,
}

/// Sync-phase occupancy of the active phase pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrentType {
    MinorMinor,
    MinorMajor,
    MajorMajor,
}

/// Left-turn service order of the sync barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LeadLagMode {
    #[default]
    LeadLead = 0,
    LeadLag = 1,
    LagLead = 2,
    LagLag = 3,
}

pub(crate) fn phase_on(mask: u8, phase_idx: usize) -> bool {
    mask & (1 << phase_idx) != 0
}

/// Per-phase flag masks polled from page 2 plus the red-revert interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseFlags {
    pub permitted_phases: u8,
    /// phases that cannot be timed concurrently
    pub restricted_phases: u8,
    pub permitted_ped_phases: u8,
    pub minimum_recall_phases: u8,
    pub maximum_recall_phases: u8,
    pub ped_recall_phases: u8,
    pub bike_recall_phases: u8,
    /// retain calls received during red
    pub redlock_phases: u8,
    /// retain calls received during yellow and red
    pub yewlock_phases: u8,
    /// retain calls received during force-off and max-out
    pub fomaxlock_phases: u8,
    pub double_entry_phases: u8,
    pub rest_in_walk_phases: u8,
    pub rest_in_red_phases: u8,
    pub walk2_phases: u8,
    pub maxgreen2_phases: u8,
    pub maxgreen3_phases: u8,
    pub startup_green_phases: u8,
    pub startup_yellow_phases: u8,
    pub startup_veh_calls: u8,
    pub startup_ped_calls: u8,
    pub startup_yellow_overlaps: u8,
    /// deciseconds
    pub startup_all_red: u8,
    /// red interval before returning to green on the same phase, deciseconds
    pub red_revert_interval: u8,
}

/// Page 3 per-phase timing values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseTiming {
    pub phase_num: u8,
    // seconds
    pub walk1_interval: u8,
    pub walk_clearance: u8,
    pub minimum_green: u8,
    pub detector_limit: u8,
    pub maximum_initial: u8,
    pub maximum_extensions: [u8; 3],
    // deciseconds
    pub passage: u8,
    pub minimum_gap: u8,
    pub maximum_gap: u8,
    pub added_initial_per_vehicle: u8,
    pub reduce_gap_by: u8,
    pub reduce_gap_every: u8,
    pub yellow_interval: u8,
    pub red_clearance: u8,
    // seconds
    pub walk2_interval: u8,
    pub delay_early_walk_time: u8,
    pub solid_walk_clearance: u8,
    pub bike_green: u8,
    // deciseconds
    pub bike_red_clearance: u8,
}

/// One coordination plan (1..9, 11..19, 21..29) and its derived layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoordPlan {
    pub plan_num: u8,
    /// seconds
    pub cycle_length: u8,
    /// green factors, or force-off points when `force_off_flag` is set; seconds
    pub green_factor: [u8; 8],
    pub cycle_multiplier: u8,
    pub offsets: [u8; 3],
    pub laggapout_phase: u8,
    pub lag_phases: u8,
    pub sync_phases: u8,
    pub hold_phases: u8,
    pub omit_phases: u8,
    pub minimum_recall_phases: u8,
    pub maximum_recall_phases: u8,
    pub ped_recall_phases: u8,
    pub bike_recall_phases: u8,
    pub force_off_flag: u8,
    // TSP parameters merged from page 13
    pub tsp_enabled: bool,
    pub max_early_green: u8,
    pub max_green_extension: u8,
    pub inhibit_cycles: u8,
    pub tsp_force_off: [u8; 8],
    // derived
    pub coord_lagphase_gapout: bool,
    pub permitted_phases: u8,
    pub permitted_ped_phases: u8,
    /// coordinated phase per ring, zero when none on that ring
    pub coordinated_phases: [u8; 2],
    pub lead_lag_mode: LeadLagMode,
    pub sync_ring: u8,
    pub sync_barrier: u8,
    /// [barrier][ring][lead, lag]
    pub leadlag_phases: [[[u8; 2]; 2]; 2],
    /// per-phase force-off point within the cycle, seconds
    pub force_off: [u8; 8],
    /// per-phase permissive-window start, seconds
    pub permissive: [u8; 8],
    pub ped_permissive: [u8; 8],
    /// deciseconds within the cycle
    pub noncoord_barrier_green_onset: u32,
    pub coord_barrier_green_onset: u32,
    pub coord_phase_green_onset: [u32; 2],
    pub coord_phase_green_end: [u32; 2],
}

/// Free-run plan (page 4 block 10) and its derived layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FreePlan {
    pub lag_phases: u8,
    pub omit_phases: u8,
    pub minimum_recall_phases: u8,
    pub maximum_recall_phases: u8,
    pub ped_recall_phases: u8,
    pub bike_recall_phases: u8,
    /// odd phases that may be served twice per cycle
    pub conditional_service_phases: u8,
    pub conditional_service_minimum_green: u8,
    pub tsp_enabled: bool,
    pub tsp_hold_phases: u8,
    pub tsp_max_green_hold_time: u8,
    // derived
    pub permitted_phases: u8,
    pub permitted_ped_phases: u8,
    pub leadlag_phases: [[[u8; 2]; 2]; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManualPlan {
    pub plan_on: bool,
    pub plan_num: u8,
    pub offset_index: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CicPlan {
    /// local plans 1..9 enabled for critical-intersection control
    pub enabled_plans: u16,
    pub smoothing_volume: u8,
    pub smoothing_occupancy: u8,
    pub smoothing_demand: u8,
    pub multiplier_volume: u8,
    pub multiplier_occupancy: u8,
    pub exponent_volume: u8,
    pub exponent_occupancy: u8,
    pub phase_assignment: [u8; 16],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectorConf {
    /// 1..=44
    pub id: u8,
    pub detector_type: u8,
    pub phase_assignment: u8,
    pub lock: u8,
    pub delay_time: u8,
    /// deciseconds
    pub extend_time: u8,
    pub recall_time: u8,
    pub input_port: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemDetectorAssignment {
    /// minutes to flag a stuck detector
    pub max_on_time: u8,
    pub fail_reset_time: u8,
    pub fail_override: u64,
    pub detector_input: [u8; 16],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TodTableEntry {
    pub table_num: u8,
    pub start_hour: u8,
    pub start_min: u8,
    pub plan_num: u8,
    pub offset_index: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TodFunction {
    pub start_hour: u8,
    pub start_min: u8,
    pub end_hour: u8,
    pub end_min: u8,
    /// bit 0 = Monday
    pub day_of_week: u8,
    pub action_code: u8,
    pub affect_phases: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RrPreemptionStep {
    pub step_time: u8,
    pub ped_walk_phases: u8,
    pub ped_clear_phases: u8,
    pub ped_red_phases: u8,
    pub green_hold_phases: u8,
    pub yew_flashing_phases: u8,
    pub red_flashing_phases: u8,
    pub green_hold_overlaps: u8,
    pub yew_flashing_overlaps: u8,
    pub red_flashing_overlaps: u8,
}

/// Railroad preemption sequence: delay, four clearance/hold steps, exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RrPreemption {
    /// deciseconds
    pub delay_time: u8,
    pub minimum_green: u8,
    pub ped_clear_time: u8,
    pub steps: [RrPreemptionStep; 4],
    pub exit_time: u8,
    pub exit_phases_green: u8,
    pub exit_overlaps_green: u8,
    pub exit_veh_call: u8,
    pub exit_ped_call: u8,
    pub input_port: u8,
    pub gate_port: u8,
    pub latching_flag: u8,
    pub power_up: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EvPreemption {
    pub delay_time: u8,
    /// green time after the preempt input drops, seconds
    pub green_hold_time: u8,
    pub maximum_clearance_time: u8,
    pub clearance_phase_green: u8,
    pub clearance_overlap_green: u8,
    pub input_port: u8,
    pub latching_flag: u8,
    /// 0 force-off, 2 advance
    pub phase_termination_flag: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TspPlan {
    pub max_early_green: u8,
    pub max_green_extension: u8,
    pub inhibit_cycles: u8,
    pub green_factor: [u8; 8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TspConf {
    /// bit i = coordination plan i+1 (plans 1..9 then 11..19)
    pub enable_coordination_plans: u32,
    pub plans: [TspPlan; 18],
}

/// The whole card.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimingCard {
    pub controller_addr: u8,
    pub phaseflags: PhaseFlags,
    pub phasetiming: [PhaseTiming; 8],
    pub freeplan: FreePlan,
    pub manualplan: ManualPlan,
    pub cicplan: CicPlan,
    pub detectorconf: Vec<DetectorConf>,
    pub system_detector: SystemDetectorAssignment,
    pub tod_tables: Vec<TodTableEntry>,
    /// plan assignment starting Monday
    pub weekday: [u8; 7],
    pub tod_functions: Vec<TodFunction>,
    pub rr_preemption: [RrPreemption; 2],
    pub ev_preemption: [EvPreemption; 4],
    pub tsp_conf: TspConf,
    pub coordplans: Vec<CoordPlan>,
    initiated: bool,
}

/// Candidate phases of a `(barrier, ring)` cell in the NEMA dual-ring layout.
const RING_BARRIER_PHASES: [[[u8; 2]; 2]; 2] = [
    // barrier 0: phases 1,2 on ring 0; 5,6 on ring 1
    [[1, 2], [5, 6]],
    // barrier 1: phases 3,4 on ring 0; 7,8 on ring 1
    [[3, 4], [7, 8]],
];

fn leadlag_matrix(permitted: u8, lag_phases: u8) -> [[[u8; 2]; 2]; 2] {
    let mut matrix = [[[0u8; 2]; 2]; 2];
    for barrier in 0..2 {
        for ring in 0..2 {
            let [a, b] = RING_BARRIER_PHASES[barrier][ring];
            let a_on = phase_on(permitted, usize::from(a - 1));
            let b_on = phase_on(permitted, usize::from(b - 1));
            matrix[barrier][ring] = match (a_on, b_on) {
                (true, true) => {
                    if phase_on(lag_phases, usize::from(a - 1)) {
                        [b, a]
                    } else {
                        [a, b]
                    }
                },
                (true, false) => [a, a],
                (false, true) => [b, b],
                (false, false) => [0, 0],
            };
        }
    }
    matrix
}

impl TimingCard {
    pub fn is_initiated(&self) -> bool {
        self.initiated
    }

    pub fn set_initiated(&mut self) {
        self.initiated = true;
    }

    pub fn reset_plans(&mut self) {
        self.coordplans.clear();
    }

    fn coordplan_mut(&mut self, plan_num: u8) -> &mut CoordPlan {
        if let Some(i) = self.coordplans.iter().position(|p| p.plan_num == plan_num) {
            return &mut self.coordplans[i];
        }
        self.coordplans.push(CoordPlan {
            plan_num,
            ..CoordPlan::default()
        });
        self.coordplans.last_mut().expect("just pushed")
    }

    pub fn coordplan_index(&self, plan_num: u8) -> Option<usize> {
        self.coordplans.iter().position(|p| p.plan_num == plan_num)
    }

    /// Ingests one matched poll-response payload. Block responses carry
    /// `[pageId, blockId, data...]`; timing-data responses carry
    /// `[msb, lsb, nbytes, data...]`.
    pub fn update_from_poll(&mut self, desc: &str, payload: &[u8]) -> Result<(), CardError> {
        let short = |what: &str| CardError::Syntax {
            line: 0,
            what: format!("truncated {what} response"),
        };
        match desc {
            "red revert" => {
                self.phaseflags.red_revert_interval =
                    *payload.get(3).ok_or_else(|| short(desc))?;
            },
            "phase flags" => {
                let d = payload.get(2..23).ok_or_else(|| short(desc))?;
                let f = &mut self.phaseflags;
                f.permitted_phases = d[0];
                f.restricted_phases = d[1];
                f.minimum_recall_phases = d[2];
                f.maximum_recall_phases = d[3];
                f.ped_recall_phases = d[4];
                f.bike_recall_phases = d[5];
                f.redlock_phases = d[6];
                f.yewlock_phases = d[7];
                f.fomaxlock_phases = d[8];
                f.double_entry_phases = d[9];
                f.rest_in_walk_phases = d[10];
                f.rest_in_red_phases = d[11];
                f.walk2_phases = d[12];
                f.maxgreen2_phases = d[13];
                f.maxgreen3_phases = d[14];
                f.startup_green_phases = d[15];
                f.startup_yellow_phases = d[16];
                f.startup_veh_calls = d[17];
                f.startup_ped_calls = d[18];
                f.startup_yellow_overlaps = d[19];
                f.startup_all_red = d[20];
            },
            "ped flags" => {
                self.phaseflags.permitted_ped_phases =
                    *payload.get(2).ok_or_else(|| short(desc))?;
            },
            d if d.starts_with("phase timing ") => {
                let phase: usize = d["phase timing ".len()..]
                    .parse()
                    .map_err(|_| CardError::UnknownPoll { desc: d.into() })?;
                let data = payload.get(2..23).ok_or_else(|| short(desc))?;
                let t = &mut self.phasetiming[phase - 1];
                t.phase_num = phase as u8;
                t.walk1_interval = data[0];
                t.walk_clearance = data[1];
                t.minimum_green = data[2];
                t.detector_limit = data[3];
                t.maximum_initial = data[4];
                t.maximum_extensions = [data[5], data[6], data[7]];
                t.passage = data[8];
                t.minimum_gap = data[9];
                t.maximum_gap = data[10];
                t.added_initial_per_vehicle = data[11];
                t.reduce_gap_by = data[12];
                t.reduce_gap_every = data[13];
                t.yellow_interval = data[14];
                t.red_clearance = data[15];
                t.walk2_interval = data[16];
                t.delay_early_walk_time = data[17];
                t.solid_walk_clearance = data[18];
                t.bike_green = data[19];
                t.bike_red_clearance = data[20];
            },
            d if d.starts_with("coord plan ") => {
                let plan_num: u8 = d["coord plan ".len()..]
                    .parse()
                    .map_err(|_| CardError::UnknownPoll { desc: d.into() })?;
                let data = payload.get(2..28).ok_or_else(|| short(desc))?.to_vec();
                let plan = self.coordplan_mut(plan_num);
                plan.cycle_length = data[0];
                plan.green_factor.copy_from_slice(&data[1..9]);
                plan.cycle_multiplier = data[9];
                plan.offsets = [data[10], data[11], data[12]];
                plan.laggapout_phase = data[13];
                plan.lag_phases = data[14];
                plan.sync_phases = data[15];
                plan.hold_phases = data[16];
                plan.omit_phases = data[17];
                plan.minimum_recall_phases = data[18];
                plan.maximum_recall_phases = data[19];
                plan.ped_recall_phases = data[20];
                plan.bike_recall_phases = data[21];
                plan.force_off_flag = data[22];
            },
            "free plan" => {
                let data = payload.get(2..20).ok_or_else(|| short(desc))?;
                let f = &mut self.freeplan;
                f.lag_phases = data[8];
                f.omit_phases = data[9];
                f.minimum_recall_phases = data[10];
                f.maximum_recall_phases = data[11];
                f.ped_recall_phases = data[12];
                f.bike_recall_phases = data[13];
                f.conditional_service_phases = data[14];
                f.conditional_service_minimum_green = data[15];
                let selection = data[16];
                self.manualplan = ManualPlan {
                    plan_on: selection != 0,
                    plan_num: selection,
                    offset_index: data[17],
                };
            },
            d if d.starts_with("detector group ") => {
                let group: usize = d["detector group ".len()..]
                    .parse()
                    .map_err(|_| CardError::UnknownPoll { desc: d.into() })?;
                let data = payload.get(2..30).ok_or_else(|| short(desc))?;
                for i in 0..4 {
                    let id = ((group - 1) * 4 + i + 1) as u8;
                    let d = &data[i * 7..i * 7 + 7];
                    let conf = DetectorConf {
                        id,
                        detector_type: d[0],
                        phase_assignment: d[1],
                        lock: d[2],
                        delay_time: d[3],
                        extend_time: d[4],
                        recall_time: d[5],
                        input_port: d[6],
                    };
                    match self.detectorconf.iter_mut().find(|c| c.id == id) {
                        Some(slot) => *slot = conf,
                        None => self.detectorconf.push(conf),
                    }
                }
            },
            "system detector" => {
                let data = payload.get(2..26).ok_or_else(|| short(desc))?;
                let s = &mut self.system_detector;
                s.max_on_time = data[0];
                s.fail_reset_time = data[1];
                s.fail_override = data[2..8]
                    .iter()
                    .enumerate()
                    .fold(0u64, |acc, (i, &b)| acc | (u64::from(b) << (8 * i)));
                s.detector_input.copy_from_slice(&data[8..24]);
            },
            "CIC plan" => {
                let data = payload.get(2..27).ok_or_else(|| short(desc))?;
                let c = &mut self.cicplan;
                c.enabled_plans = u16::from(data[0]) | (u16::from(data[1]) << 8);
                c.smoothing_volume = data[2];
                c.smoothing_occupancy = data[3];
                c.smoothing_demand = data[4];
                c.multiplier_volume = data[5];
                c.multiplier_occupancy = data[6];
                c.exponent_volume = data[7];
                c.exponent_occupancy = data[8];
                c.phase_assignment.copy_from_slice(&data[9..25]);
            },
            d if d.starts_with("TOD table ") => {
                let block: usize = d["TOD table ".len()..]
                    .parse()
                    .map_err(|_| CardError::UnknownPoll { desc: d.into() })?;
                let data = payload.get(2..18).ok_or_else(|| short(desc))?;
                let table_num = ((block - 1) / 4 + 1) as u8;
                for entry in data.chunks_exact(4) {
                    if entry == [0, 0, 0, 0] {
                        continue;
                    }
                    let item = TodTableEntry {
                        table_num,
                        start_hour: entry[0],
                        start_min: entry[1],
                        plan_num: entry[2],
                        offset_index: entry[3],
                    };
                    if !self.tod_tables.contains(&item) {
                        self.tod_tables.push(item);
                    }
                }
            },
            "weekday" => {
                let data = payload.get(2..9).ok_or_else(|| short(desc))?;
                self.weekday.copy_from_slice(data);
            },
            d if d.starts_with("TOD Function ") => {
                let data = payload.get(2..30).ok_or_else(|| short(desc))?;
                for entry in data.chunks_exact(7) {
                    if entry.iter().all(|&b| b == 0) {
                        continue;
                    }
                    let item = TodFunction {
                        start_hour: entry[0],
                        start_min: entry[1],
                        end_hour: entry[2],
                        end_min: entry[3],
                        day_of_week: entry[4],
                        action_code: entry[5],
                        affect_phases: entry[6],
                    };
                    if !self.tod_functions.contains(&item) {
                        self.tod_functions.push(item);
                    }
                }
            },
            d if d.starts_with("RR") => {
                let unit = usize::from(&d[2..3] == "2");
                let rr = &mut self.rr_preemption[unit];
                if d.ends_with("phase flags") {
                    let data = payload.get(2..14).ok_or_else(|| short(desc))?;
                    for (i, chunk) in data.chunks_exact(3).enumerate() {
                        rr.steps[i].green_hold_phases = chunk[0];
                        rr.steps[i].yew_flashing_phases = chunk[1];
                        rr.steps[i].red_flashing_phases = chunk[2];
                    }
                } else if d.ends_with("ped flags") {
                    let data = payload.get(2..14).ok_or_else(|| short(desc))?;
                    for (i, chunk) in data.chunks_exact(3).enumerate() {
                        rr.steps[i].ped_walk_phases = chunk[0];
                        rr.steps[i].ped_clear_phases = chunk[1];
                        rr.steps[i].ped_red_phases = chunk[2];
                    }
                } else if d.ends_with("overlap flags") {
                    let data = payload.get(2..14).ok_or_else(|| short(desc))?;
                    for (i, chunk) in data.chunks_exact(3).enumerate() {
                        rr.steps[i].green_hold_overlaps = chunk[0];
                        rr.steps[i].yew_flashing_overlaps = chunk[1];
                        rr.steps[i].red_flashing_overlaps = chunk[2];
                    }
                } else if d.ends_with("exit parameters") {
                    let data = payload.get(2..6).ok_or_else(|| short(desc))?;
                    rr.exit_phases_green = data[0];
                    rr.exit_overlaps_green = data[1];
                    rr.exit_veh_call = data[2];
                    rr.exit_ped_call = data[3];
                } else if d.ends_with("Configuration") {
                    let data = payload.get(2..14).ok_or_else(|| short(desc))?;
                    rr.delay_time = data[0];
                    rr.minimum_green = data[1];
                    rr.ped_clear_time = data[2];
                    for i in 0..4 {
                        rr.steps[i].step_time = data[3 + i];
                    }
                    rr.exit_time = data[7];
                    rr.input_port = data[8];
                    rr.gate_port = data[9];
                    rr.latching_flag = data[10];
                    rr.power_up = data[11];
                } else {
                    return Err(CardError::UnknownPoll { desc: d.into() });
                }
            },
            "EVA" | "EVB" | "EVC" | "EVD" => {
                let unit = usize::from(desc.as_bytes()[2] - b'A');
                let data = payload.get(2..10).ok_or_else(|| short(desc))?;
                self.ev_preemption[unit] = EvPreemption {
                    delay_time: data[0],
                    green_hold_time: data[1],
                    maximum_clearance_time: data[2],
                    clearance_phase_green: data[3],
                    clearance_overlap_green: data[4],
                    input_port: data[5],
                    latching_flag: data[6],
                    phase_termination_flag: data[7],
                };
            },
            d if d.starts_with("TSP plan group ") => {
                let group: usize = d["TSP plan group ".len()..]
                    .parse()
                    .map_err(|_| CardError::UnknownPoll { desc: d.into() })?;
                let data = payload.get(2..35).ok_or_else(|| short(desc))?;
                for i in 0..3 {
                    let d = &data[i * 11..i * 11 + 11];
                    let plan = &mut self.tsp_conf.plans[(group - 1) * 3 + i];
                    plan.max_early_green = d[0];
                    plan.max_green_extension = d[1];
                    plan.inhibit_cycles = d[2];
                    plan.green_factor.copy_from_slice(&d[3..11]);
                }
            },
            "TSP enable plans" => {
                let data = payload.get(2..5).ok_or_else(|| short(desc))?;
                self.tsp_conf.enable_coordination_plans = u32::from(data[0])
                    | (u32::from(data[1]) << 8)
                    | (u32::from(data[2]) << 16);
            },
            other => {
                return Err(CardError::UnknownPoll { desc: other.into() });
            },
        }
        Ok(())
    }

    /// Fills the derived members of the free plan.
    pub fn set_free_plan_parameters(&mut self) {
        let permitted = self.phaseflags.permitted_phases & !self.freeplan.omit_phases;
        self.freeplan.permitted_phases = permitted;
        self.freeplan.permitted_ped_phases = self.phaseflags.permitted_ped_phases & permitted;
        self.freeplan.leadlag_phases = leadlag_matrix(permitted, self.freeplan.lag_phases);
    }

    /// Fills the derived members of every polled coordination plan.
    pub fn set_coord_plan_parameters(&mut self) -> Result<(), CardError> {
        let phaseflags = self.phaseflags;
        let phasetiming = self.phasetiming;
        let tsp = self.tsp_conf;
        for plan in &mut self.coordplans {
            derive_coord_plan(plan, &phaseflags, &phasetiming, &tsp)?;
        }
        Ok(())
    }

    /// §mode classification from cabinet status, preempt bits and pattern.
    pub fn control_mode(status: u8, preempt: u8, pattern_num: u8) -> ControlMode {
        if status & 0x02 != 0 {
            // cabinet flash
            ControlMode::Flashing
        } else if preempt != 0 {
            ControlMode::Preemption
        } else if pattern_num == 0 || pattern_num == PATTERN_FLASHING {
            ControlMode::Unavailable
        } else if pattern_num == PATTERN_FREE {
            ControlMode::RunningFree
        } else {
            ControlMode::Coordination
        }
    }

    /// Plan lookup for the current mode; coordination consults the manual
    /// plan override first.
    pub fn plan_index(&self, mode: ControlMode, plan_num: u8) -> Option<usize> {
        match mode {
            ControlMode::Coordination => {
                let effective = if self.manualplan.plan_on
                    && self.manualplan.plan_num != PATTERN_FLASHING
                    && self.manualplan.plan_num != PATTERN_FREE
                {
                    self.manualplan.plan_num
                } else {
                    plan_num
                };
                self.coordplan_index(effective)
            },
            _ => None,
        }
    }

    pub fn permitted_phases(&self, plan_idx: Option<usize>) -> (u8, u8) {
        match plan_idx {
            Some(i) => (
                self.coordplans[i].permitted_phases,
                self.coordplans[i].permitted_ped_phases,
            ),
            None => (
                self.freeplan.permitted_phases,
                self.freeplan.permitted_ped_phases,
            ),
        }
    }

    /// `(sync_phase_mask, synch_phase)`: the coordinated phases and the one
    /// reported in status records.
    pub fn sync_phase(&self, plan_idx: Option<usize>) -> (u8, u8) {
        match plan_idx {
            Some(i) => {
                let plan = &self.coordplans[i];
                let phase = if plan.coordinated_phases[0] > 0 {
                    plan.coordinated_phases[0]
                } else {
                    plan.coordinated_phases[1]
                };
                (plan.sync_phases, phase)
            },
            None => (0, 0),
        }
    }

    /// Cycle length in deciseconds.
    pub fn cycle_length(&self, plan_idx: Option<usize>) -> u16 {
        plan_idx.map_or(0, |i| u16::from(self.coordplans[i].cycle_length) * 10)
    }

    pub fn concurrent_phase_type(active_phase: u8, sync_phases: u8) -> ConcurrentType {
        match (active_phase & sync_phases).count_ones() {
            0 => ConcurrentType::MinorMinor,
            1 => ConcurrentType::MinorMajor,
            _ => ConcurrentType::MajorMajor,
        }
    }

    /// Vehicular head color for `check_phase` given the live interval codes.
    pub fn phase_state(
        mode: ControlMode,
        active_phase_on_ring: u8,
        active_interval: u8,
        check_phase: u8,
    ) -> PhaseState {
        if mode == ControlMode::Flashing {
            return PhaseState::FlashingRed;
        }
        if active_phase_on_ring != check_phase {
            return PhaseState::ProtectedRed;
        }
        match active_interval {
            // walk through the vehicular extension intervals
            0x00..=0x07 => PhaseState::ProtectedGreen,
            // max-out, gap-out and force-off terminations time the yellow
            0x0C..=0x0E => PhaseState::ProtectedYellow,
            _ => PhaseState::ProtectedRed,
        }
    }

    /// Pedestrian signal for `check_phase` given the live interval codes.
    pub fn ped_state(
        mode: ControlMode,
        active_phase_on_ring: u8,
        active_interval: u8,
        check_phase: u8,
    ) -> PedState {
        if mode == ControlMode::Flashing {
            return PedState::FlashingRed;
        }
        if active_phase_on_ring != check_phase {
            return PedState::DontWalk;
        }
        match active_interval {
            0x00 => PedState::Walk,
            0x01 => PedState::FlashDontWalk,
            _ => PedState::DontWalk,
        }
    }

    pub fn phase_recall(&self, mode: ControlMode, plan_idx: Option<usize>, phase_idx: usize) -> PhaseRecall {
        let (min_recall, max_recall, ped_recall, bike_recall) = match (mode, plan_idx) {
            (ControlMode::Coordination, Some(i)) => {
                let plan = &self.coordplans[i];
                (
                    plan.minimum_recall_phases | self.phaseflags.minimum_recall_phases,
                    plan.maximum_recall_phases | self.phaseflags.maximum_recall_phases,
                    plan.ped_recall_phases | self.phaseflags.ped_recall_phases,
                    plan.bike_recall_phases | self.phaseflags.bike_recall_phases,
                )
            },
            _ => (
                self.freeplan.minimum_recall_phases | self.phaseflags.minimum_recall_phases,
                self.freeplan.maximum_recall_phases | self.phaseflags.maximum_recall_phases,
                self.freeplan.ped_recall_phases | self.phaseflags.ped_recall_phases,
                self.freeplan.bike_recall_phases | self.phaseflags.bike_recall_phases,
            ),
        };
        if phase_on(max_recall, phase_idx) {
            PhaseRecall::Maximum
        } else if phase_on(min_recall, phase_idx) {
            PhaseRecall::Minimum
        } else if phase_on(ped_recall, phase_idx) {
            PhaseRecall::Ped
        } else if phase_on(bike_recall, phase_idx) {
            PhaseRecall::Bike
        } else {
            PhaseRecall::None
        }
    }
}

impl TimingCard {
    /// Text serialization of every polled field; the daily poll cycle
    /// rewrites this file and the previous copy is renamed with a date
    /// suffix by the caller.
    pub fn to_text(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        let f = &self.phaseflags;
        let _ = writeln!(out, "Controller_addr {}", self.controller_addr);
        let _ = writeln!(
            out,
            "Phase_flags {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {} {}",
            f.permitted_phases, f.restricted_phases, f.permitted_ped_phases,
            f.minimum_recall_phases, f.maximum_recall_phases, f.ped_recall_phases,
            f.bike_recall_phases, f.redlock_phases, f.yewlock_phases, f.fomaxlock_phases,
            f.double_entry_phases, f.rest_in_walk_phases, f.rest_in_red_phases,
            f.walk2_phases, f.maxgreen2_phases, f.maxgreen3_phases,
            f.startup_green_phases, f.startup_yellow_phases, f.startup_veh_calls,
            f.startup_ped_calls, f.startup_all_red, f.red_revert_interval
        );
        for t in &self.phasetiming {
            let _ = writeln!(
                out,
                "Phase_timing {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
                t.phase_num, t.walk1_interval, t.walk_clearance, t.minimum_green,
                t.detector_limit, t.maximum_initial, t.maximum_extensions[0],
                t.maximum_extensions[1], t.maximum_extensions[2], t.passage,
                t.minimum_gap, t.maximum_gap, t.added_initial_per_vehicle,
                t.reduce_gap_by, t.reduce_gap_every, t.yellow_interval, t.red_clearance,
                t.walk2_interval, t.delay_early_walk_time, t.solid_walk_clearance,
                t.bike_green, t.bike_red_clearance
            );
        }
        let fp = &self.freeplan;
        let _ = writeln!(
            out,
            "Free_plan {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {}",
            fp.lag_phases, fp.omit_phases, fp.minimum_recall_phases,
            fp.maximum_recall_phases, fp.ped_recall_phases, fp.bike_recall_phases,
            fp.conditional_service_phases, fp.conditional_service_minimum_green
        );
        let _ = writeln!(
            out,
            "Manual_plan {} {} {}",
            u8::from(self.manualplan.plan_on),
            self.manualplan.plan_num,
            self.manualplan.offset_index
        );
        for plan in &self.coordplans {
            let _ = writeln!(
                out,
                "Coord_plan {} {} {} {} {} {} {} {} {} {} {} {} {} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {:02x} {}",
                plan.plan_num, plan.cycle_length,
                plan.green_factor[0], plan.green_factor[1], plan.green_factor[2],
                plan.green_factor[3], plan.green_factor[4], plan.green_factor[5],
                plan.green_factor[6], plan.green_factor[7], plan.cycle_multiplier,
                plan.offsets[0], plan.laggapout_phase, plan.lag_phases, plan.sync_phases,
                plan.hold_phases, plan.omit_phases, plan.minimum_recall_phases,
                plan.maximum_recall_phases, plan.ped_recall_phases,
                plan.bike_recall_phases, plan.force_off_flag
            );
        }
        for d in &self.detectorconf {
            let _ = writeln!(
                out,
                "Detector {} {} {:02x} {} {} {} {} {}",
                d.id, d.detector_type, d.phase_assignment, d.lock, d.delay_time,
                d.extend_time, d.recall_time, d.input_port
            );
        }
        for e in &self.tod_tables {
            let _ = writeln!(
                out,
                "TOD_table {} {} {} {} {}",
                e.table_num, e.start_hour, e.start_min, e.plan_num, e.offset_index
            );
        }
        let _ = writeln!(
            out,
            "Weekday {} {} {} {} {} {} {}",
            self.weekday[0], self.weekday[1], self.weekday[2], self.weekday[3],
            self.weekday[4], self.weekday[5], self.weekday[6]
        );
        for (i, ev) in self.ev_preemption.iter().enumerate() {
            let _ = writeln!(
                out,
                "EV_preempt {} {} {} {} {:02x} {:02x} {} {} {}",
                i + 1, ev.delay_time, ev.green_hold_time, ev.maximum_clearance_time,
                ev.clearance_phase_green, ev.clearance_overlap_green, ev.input_port,
                ev.latching_flag, ev.phase_termination_flag
            );
        }
        let _ = writeln!(
            out,
            "TSP_enable {:05x}",
            self.tsp_conf.enable_coordination_plans
        );
        for (i, p) in self.tsp_conf.plans.iter().enumerate() {
            if p.max_early_green == 0 && p.max_green_extension == 0 {
                continue;
            }
            let _ = writeln!(
                out,
                "TSP_plan {} {} {} {} {} {} {} {} {} {} {} {}",
                i + 1, p.max_early_green, p.max_green_extension, p.inhibit_cycles,
                p.green_factor[0], p.green_factor[1], p.green_factor[2], p.green_factor[3],
                p.green_factor[4], p.green_factor[5], p.green_factor[6], p.green_factor[7]
            );
        }
        let _ = writeln!(out, "end_card");
        out
    }

    /// Parses a timing-card file previously written by [`TimingCard::to_text`]
    /// and re-runs the plan derivations.
    pub fn from_text(text: &str) -> Result<TimingCard, CardError> {
        let mut card = TimingCard::default();
        let hex = |tok: Option<&str>, line: usize| -> Result<u8, CardError> {
            u8::from_str_radix(tok.unwrap_or_default(), 16).map_err(|_| CardError::Syntax {
                line,
                what: "bad hex field".into(),
            })
        };
        let num = |tok: Option<&str>, line: usize| -> Result<u8, CardError> {
            tok.unwrap_or_default()
                .parse::<u8>()
                .map_err(|_| CardError::Syntax {
                    line,
                    what: "bad numeric field".into(),
                })
        };
        let mut seen_end = false;
        for (lineno, raw) in text.lines().enumerate() {
            let lineno = lineno + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let mut toks = line.split_whitespace();
            match toks.next().unwrap_or_default() {
                "Controller_addr" => card.controller_addr = num(toks.next(), lineno)?,
                "Phase_flags" => {
                    let f = &mut card.phaseflags;
                    for slot in [
                        &mut f.permitted_phases, &mut f.restricted_phases,
                        &mut f.permitted_ped_phases, &mut f.minimum_recall_phases,
                        &mut f.maximum_recall_phases, &mut f.ped_recall_phases,
                        &mut f.bike_recall_phases, &mut f.redlock_phases,
                        &mut f.yewlock_phases, &mut f.fomaxlock_phases,
                        &mut f.double_entry_phases, &mut f.rest_in_walk_phases,
                        &mut f.rest_in_red_phases, &mut f.walk2_phases,
                        &mut f.maxgreen2_phases, &mut f.maxgreen3_phases,
                        &mut f.startup_green_phases, &mut f.startup_yellow_phases,
                        &mut f.startup_veh_calls, &mut f.startup_ped_calls,
                    ] {
                        *slot = hex(toks.next(), lineno)?;
                    }
                    f.startup_all_red = num(toks.next(), lineno)?;
                    f.red_revert_interval = num(toks.next(), lineno)?;
                },
                "Phase_timing" => {
                    let phase = num(toks.next(), lineno)?;
                    if !(1..=8).contains(&phase) {
                        return Err(CardError::Syntax {
                            line: lineno,
                            what: "phase number out of range".into(),
                        });
                    }
                    let t = &mut card.phasetiming[usize::from(phase - 1)];
                    t.phase_num = phase;
                    let [max_ext0, max_ext1, max_ext2] = &mut t.maximum_extensions;
                    for slot in [
                        &mut t.walk1_interval, &mut t.walk_clearance, &mut t.minimum_green,
                        &mut t.detector_limit, &mut t.maximum_initial,
                        max_ext0, max_ext1,
                        max_ext2, &mut t.passage, &mut t.minimum_gap,
                        &mut t.maximum_gap, &mut t.added_initial_per_vehicle,
                        &mut t.reduce_gap_by, &mut t.reduce_gap_every,
                        &mut t.yellow_interval, &mut t.red_clearance, &mut t.walk2_interval,
                        &mut t.delay_early_walk_time, &mut t.solid_walk_clearance,
                        &mut t.bike_green, &mut t.bike_red_clearance,
                    ] {
                        *slot = num(toks.next(), lineno)?;
                    }
                },
                "Free_plan" => {
                    let f = &mut card.freeplan;
                    for slot in [
                        &mut f.lag_phases, &mut f.omit_phases, &mut f.minimum_recall_phases,
                        &mut f.maximum_recall_phases, &mut f.ped_recall_phases,
                        &mut f.bike_recall_phases, &mut f.conditional_service_phases,
                    ] {
                        *slot = hex(toks.next(), lineno)?;
                    }
                    f.conditional_service_minimum_green = num(toks.next(), lineno)?;
                },
                "Manual_plan" => {
                    card.manualplan.plan_on = num(toks.next(), lineno)? != 0;
                    card.manualplan.plan_num = num(toks.next(), lineno)?;
                    card.manualplan.offset_index = num(toks.next(), lineno)?;
                },
                "Coord_plan" => {
                    let plan_num = num(toks.next(), lineno)?;
                    let plan = card.coordplan_mut(plan_num);
                    plan.cycle_length = num(toks.next(), lineno)?;
                    for i in 0..8 {
                        plan.green_factor[i] = num(toks.next(), lineno)?;
                    }
                    plan.cycle_multiplier = num(toks.next(), lineno)?;
                    plan.offsets[0] = num(toks.next(), lineno)?;
                    plan.laggapout_phase = num(toks.next(), lineno)?;
                    for slot in [
                        &mut plan.lag_phases, &mut plan.sync_phases, &mut plan.hold_phases,
                        &mut plan.omit_phases, &mut plan.minimum_recall_phases,
                        &mut plan.maximum_recall_phases, &mut plan.ped_recall_phases,
                        &mut plan.bike_recall_phases,
                    ] {
                        *slot = hex(toks.next(), lineno)?;
                    }
                    plan.force_off_flag = num(toks.next(), lineno)?;
                },
                "Detector" => {
                    let conf = DetectorConf {
                        id: num(toks.next(), lineno)?,
                        detector_type: num(toks.next(), lineno)?,
                        phase_assignment: hex(toks.next(), lineno)?,
                        lock: num(toks.next(), lineno)?,
                        delay_time: num(toks.next(), lineno)?,
                        extend_time: num(toks.next(), lineno)?,
                        recall_time: num(toks.next(), lineno)?,
                        input_port: num(toks.next(), lineno)?,
                    };
                    card.detectorconf.push(conf);
                },
                "TOD_table" => {
                    card.tod_tables.push(TodTableEntry {
                        table_num: num(toks.next(), lineno)?,
                        start_hour: num(toks.next(), lineno)?,
                        start_min: num(toks.next(), lineno)?,
                        plan_num: num(toks.next(), lineno)?,
                        offset_index: num(toks.next(), lineno)?,
                    });
                },
                "Weekday" => {
                    for i in 0..7 {
                        card.weekday[i] = num(toks.next(), lineno)?;
                    }
                },
                "EV_preempt" => {
                    let unit = num(toks.next(), lineno)?;
                    if !(1..=4).contains(&unit) {
                        return Err(CardError::Syntax {
                            line: lineno,
                            what: "EV unit out of range".into(),
                        });
                    }
                    let ev = &mut card.ev_preemption[usize::from(unit - 1)];
                    ev.delay_time = num(toks.next(), lineno)?;
                    ev.green_hold_time = num(toks.next(), lineno)?;
                    ev.maximum_clearance_time = num(toks.next(), lineno)?;
                    ev.clearance_phase_green = hex(toks.next(), lineno)?;
                    ev.clearance_overlap_green = hex(toks.next(), lineno)?;
                    ev.input_port = num(toks.next(), lineno)?;
                    ev.latching_flag = num(toks.next(), lineno)?;
                    ev.phase_termination_flag = num(toks.next(), lineno)?;
                },
                "TSP_enable" => {
                    card.tsp_conf.enable_coordination_plans =
                        u32::from_str_radix(toks.next().unwrap_or_default(), 16).map_err(|_| {
                            CardError::Syntax {
                                line: lineno,
                                what: "bad TSP enable mask".into(),
                            }
                        })?;
                },
                "TSP_plan" => {
                    let index = num(toks.next(), lineno)?;
                    if !(1..=18).contains(&index) {
                        return Err(CardError::Syntax {
                            line: lineno,
                            what: "TSP plan index out of range".into(),
                        });
                    }
                    let p = &mut card.tsp_conf.plans[usize::from(index - 1)];
                    p.max_early_green = num(toks.next(), lineno)?;
                    p.max_green_extension = num(toks.next(), lineno)?;
                    p.inhibit_cycles = num(toks.next(), lineno)?;
                    for i in 0..8 {
                        p.green_factor[i] = num(toks.next(), lineno)?;
                    }
                },
                "end_card" => seen_end = true,
                other => {
                    return Err(CardError::Syntax {
                        line: lineno,
                        what: format!("unrecognized keyword {other}"),
                    });
                },
            }
        }
        if !seen_end {
            return Err(CardError::Syntax {
                line: 0,
                what: "truncated card: missing end_card".into(),
            });
        }
        card.set_free_plan_parameters();
        card.set_coord_plan_parameters()?;
        card.set_initiated();
        Ok(card)
    }
}

/// Service sequence of one ring starting right after the coordinated phase.
fn ring_service_order(plan: &CoordPlan, ring: usize) -> Vec<u8> {
    let sync_barrier = usize::from(plan.sync_barrier);
    let mut order: Vec<u8> = Vec::with_capacity(4);
    for barrier in [next_barrier(sync_barrier), sync_barrier] {
        let [lead, lag] = plan.leadlag_phases[barrier][ring];
        if lead > 0 {
            order.push(lead);
        }
        if lag > 0 && lag != lead {
            order.push(lag);
        }
    }
    // rotate so the sequence follows the coordinated phase
    let coord = plan.coordinated_phases[ring];
    if let Some(pos) = order.iter().position(|&p| p == coord) {
        order.rotate_left(pos + 1);
        order.pop(); // the coordinated phase itself closes the cycle
    }
    order
}

fn next_barrier(barrier: usize) -> usize {
    (barrier + 1) % 2
}

fn derive_coord_plan(
    plan: &mut CoordPlan,
    phaseflags: &PhaseFlags,
    phasetiming: &[PhaseTiming; 8],
    tsp: &TspConf,
) -> Result<(), CardError> {
    // a phase is permitted when globally permitted, not omitted by the plan,
    // and allocated green time
    let mut green_allocated: u8 = 0;
    for i in 0..8 {
        if plan.green_factor[i] > 0 || plan.force_off_flag != 0 {
            green_allocated |= 1 << i;
        }
    }
    plan.permitted_phases = phaseflags.permitted_phases & !plan.omit_phases & green_allocated;
    plan.permitted_ped_phases = phaseflags.permitted_ped_phases & plan.permitted_phases;
    let sync_permitted = plan.sync_phases & plan.permitted_phases;
    if sync_permitted == 0 {
        return Err(CardError::Derivation {
            plan_num: plan.plan_num,
            what: "no permitted sync phase".into(),
        });
    }
    plan.coordinated_phases = ring_phases(sync_permitted);
    plan.sync_ring = u8::from(plan.coordinated_phases[0] == 0);
    plan.sync_barrier = barrier_of(sync_permitted);
    plan.leadlag_phases = leadlag_matrix(plan.permitted_phases, plan.lag_phases);
    plan.coord_lagphase_gapout = plan.laggapout_phase > 0
        && phase_on(plan.lag_phases, usize::from(plan.laggapout_phase - 1));
    let ring0_lag = plan.coordinated_phases[0] > 0
        && phase_on(plan.lag_phases, usize::from(plan.coordinated_phases[0] - 1));
    let ring1_lag = plan.coordinated_phases[1] > 0
        && phase_on(plan.lag_phases, usize::from(plan.coordinated_phases[1] - 1));
    plan.lead_lag_mode = match (ring0_lag, ring1_lag) {
        (false, false) => LeadLagMode::LeadLead,
        (false, true) => LeadLagMode::LeadLag,
        (true, false) => LeadLagMode::LagLead,
        (true, true) => LeadLagMode::LagLag,
    };

    // force-off points, permissive windows and green onsets around the cycle
    let cycle_ds = u32::from(plan.cycle_length) * 10;
    let mut onset_ds = [0u32; 8];
    plan.force_off = [0; 8];
    plan.permissive = [0; 8];
    plan.ped_permissive = [0; 8];
    for ring in 0..2 {
        let coord = plan.coordinated_phases[ring];
        if coord == 0 {
            continue;
        }
        let order = ring_service_order(plan, ring);
        let mut t: u32 = 0;
        let mut prev = usize::from(coord - 1);
        for &p in &order {
            let idx = usize::from(p - 1);
            t += u32::from(phasetiming[prev].yellow_interval)
                + u32::from(phasetiming[prev].red_clearance);
            onset_ds[idx] = t;
            if plan.force_off_flag != 0 {
                // green factors already are force-off points
                plan.force_off[idx] = plan.green_factor[idx];
                t = u32::from(plan.green_factor[idx]) * 10;
            } else {
                t += u32::from(plan.green_factor[idx]) * 10;
                plan.force_off[idx] = (t / 10).min(255) as u8;
            }
            plan.permissive[idx] = (onset_ds[idx] / 10).min(255) as u8;
            if phase_on(plan.permitted_ped_phases, idx) {
                let walk = if phase_on(phaseflags.walk2_phases, idx) {
                    phasetiming[idx].walk2_interval
                } else {
                    phasetiming[idx].walk1_interval
                };
                let ped_need = (u32::from(walk) + u32::from(phasetiming[idx].walk_clearance)) * 10;
                let fo = u32::from(plan.force_off[idx]) * 10;
                plan.ped_permissive[idx] = (fo.saturating_sub(ped_need) / 10).min(255) as u8;
            }
            prev = idx;
        }
        // the coordinated phase yields at local zero and comes back on after
        // the last minor phase clears
        let coord_idx = usize::from(coord - 1);
        plan.force_off[coord_idx] = 0;
        let onset = t
            + u32::from(phasetiming[prev].yellow_interval)
            + u32::from(phasetiming[prev].red_clearance);
        plan.coord_phase_green_onset[ring] = onset.min(cycle_ds);
        plan.coord_phase_green_end[ring] = cycle_ds;
        onset_ds[coord_idx] = plan.coord_phase_green_onset[ring];
    }
    plan.coord_barrier_green_onset = plan
        .coord_phase_green_onset
        .iter()
        .copied()
        .filter(|&v| v > 0)
        .min()
        .unwrap_or(0);
    // non-coordinated barrier opens with its lead phases
    let noncoord_barrier = next_barrier(usize::from(plan.sync_barrier));
    plan.noncoord_barrier_green_onset = (0..2)
        .filter_map(|ring| {
            let lead = plan.leadlag_phases[noncoord_barrier][ring][0];
            (lead > 0).then(|| onset_ds[usize::from(lead - 1)])
        })
        .min()
        .unwrap_or(0);

    // TSP parameters ride on the page-13 plan table
    let tsp_index = match plan.plan_num {
        1..=9 => Some(usize::from(plan.plan_num) - 1),
        11..=19 => Some(usize::from(plan.plan_num) - 2),
        _ => None,
    };
    if let Some(i) = tsp_index {
        plan.tsp_enabled = tsp.enable_coordination_plans & (1 << i) != 0;
        plan.max_early_green = tsp.plans[i].max_early_green;
        plan.max_green_extension = tsp.plans[i].max_green_extension;
        plan.inhibit_cycles = tsp.plans[i].inhibit_cycles;
        plan.tsp_force_off = tsp.plans[i].green_factor;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn eight_phase_card() -> TimingCard {
        let mut card = TimingCard {
            controller_addr: 5,
            ..TimingCard::default()
        };
        card.phaseflags.permitted_phases = 0xFF;
        card.phaseflags.permitted_ped_phases = 0b0010_0010;
        for i in 0..8 {
            card.phasetiming[i] = PhaseTiming {
                phase_num: i as u8 + 1,
                walk1_interval: 7,
                walk_clearance: 11,
                minimum_green: 8,
                maximum_extensions: [25, 35, 45],
                passage: 25,
                yellow_interval: 35,
                red_clearance: 15,
                ..PhaseTiming::default()
            };
        }
        // plan 3: 80 s cycle, sync phases 2 and 6 leading; greens plus the
        // four 5 s clearances close the cycle exactly
        let mut plan = CoordPlan {
            plan_num: 3,
            cycle_length: 80,
            green_factor: [8, 30, 10, 12, 8, 30, 10, 12],
            lag_phases: 0b1000_1000, // phases 4 and 8 lag
            sync_phases: 0b0010_0010,
            ..CoordPlan::default()
        };
        plan.laggapout_phase = 0;
        card.coordplans.push(plan);
        card.set_free_plan_parameters();
        card.set_coord_plan_parameters().unwrap();
        card.set_initiated();
        card
    }

    #[test]
    fn control_mode_classification() {
        assert_eq!(TimingCard::control_mode(0x02, 0, 7), ControlMode::Flashing);
        assert_eq!(
            TimingCard::control_mode(0, 0b0001_0000, 7),
            ControlMode::Preemption
        );
        assert_eq!(TimingCard::control_mode(0, 0, 0), ControlMode::Unavailable);
        assert_eq!(
            TimingCard::control_mode(0, 0, PATTERN_FLASHING),
            ControlMode::Unavailable
        );
        assert_eq!(
            TimingCard::control_mode(0, 0, PATTERN_FREE),
            ControlMode::RunningFree
        );
        assert_eq!(TimingCard::control_mode(0, 0, 7), ControlMode::Coordination);
    }

    #[test]
    fn leadlag_matrix_honors_lag_mask() {
        let matrix = leadlag_matrix(0xFF, 0b1000_1000);
        assert_eq!(matrix[0][0], [1, 2]);
        assert_eq!(matrix[1][0], [3, 4]); // phase 4 lags
        assert_eq!(matrix[1][1], [7, 8]);
        let matrix = leadlag_matrix(0xFF, 0b0000_0100);
        assert_eq!(matrix[1][0], [4, 3]); // phase 3 lags, 4 leads
    }

    #[test]
    fn plan_derivation_finds_sync_layout() {
        let card = eight_phase_card();
        let plan = &card.coordplans[0];
        assert_eq!(plan.permitted_phases, 0xFF);
        assert_eq!(plan.coordinated_phases, [2, 6]);
        assert_eq!(plan.sync_ring, 0);
        assert_eq!(plan.sync_barrier, 0);
        assert_eq!(plan.lead_lag_mode, LeadLagMode::LeadLead);
        // sync phases yield at local zero
        assert_eq!(plan.force_off[1], 0);
        assert_eq!(plan.force_off[5], 0);
        // minor phases accumulate clearance + green around the cycle
        assert_eq!(plan.force_off[2], 15); // 5 s clearance + 10 s green
        assert_eq!(plan.force_off[3], 32); // + 5 + 12
        assert_eq!(plan.force_off[0], 45);
        assert_eq!(plan.coord_phase_green_onset[0], 500);
        assert_eq!(plan.coord_phase_green_end[0], 800);
    }

    #[test]
    fn concurrent_type_counts_sync_phases() {
        assert_eq!(
            TimingCard::concurrent_phase_type(0b0010_0010, 0b0010_0010),
            ConcurrentType::MajorMajor
        );
        assert_eq!(
            TimingCard::concurrent_phase_type(0b0100_0010, 0b0010_0010),
            ConcurrentType::MinorMajor
        );
        assert_eq!(
            TimingCard::concurrent_phase_type(0b0100_0100, 0b0010_0010),
            ConcurrentType::MinorMinor
        );
    }

    #[test]
    fn phase_state_follows_interval_codes() {
        use ControlMode::Coordination;
        assert_eq!(
            TimingCard::phase_state(Coordination, 2, 0x02, 2),
            PhaseState::ProtectedGreen
        );
        assert_eq!(
            TimingCard::phase_state(Coordination, 2, 0x0C, 2),
            PhaseState::ProtectedYellow
        );
        assert_eq!(
            TimingCard::phase_state(Coordination, 2, 0x0F, 2),
            PhaseState::ProtectedRed
        );
        assert_eq!(
            TimingCard::phase_state(Coordination, 2, 0x02, 4),
            PhaseState::ProtectedRed
        );
        assert_eq!(
            TimingCard::phase_state(ControlMode::Flashing, 2, 0x02, 2),
            PhaseState::FlashingRed
        );
    }

    #[test]
    fn ped_state_follows_interval_codes() {
        use ControlMode::Coordination;
        assert_eq!(
            TimingCard::ped_state(Coordination, 2, 0x00, 2),
            PedState::Walk
        );
        assert_eq!(
            TimingCard::ped_state(Coordination, 2, 0x01, 2),
            PedState::FlashDontWalk
        );
        assert_eq!(
            TimingCard::ped_state(Coordination, 2, 0x05, 2),
            PedState::DontWalk
        );
    }

    #[test]
    fn poll_ingestion_fills_phase_flags_and_timing() {
        let mut card = TimingCard::default();
        let mut payload = vec![2u8, 1];
        payload.extend_from_slice(&[
            0xFF, 0x00, 0x00, 0x22, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 30,
        ]);
        card.update_from_poll("phase flags", &payload).unwrap();
        assert_eq!(card.phaseflags.permitted_phases, 0xFF);
        assert_eq!(card.phaseflags.maximum_recall_phases, 0x22);
        assert_eq!(card.phaseflags.startup_all_red, 30);

        let mut payload = vec![3u8, 2];
        payload.extend_from_slice(&[
            7, 11, 8, 0, 0, 25, 35, 45, 25, 20, 30, 0, 0, 0, 35, 15, 0, 0, 0, 0, 0,
        ]);
        card.update_from_poll("phase timing 2", &payload).unwrap();
        let t = card.phasetiming[1];
        assert_eq!(t.minimum_green, 8);
        assert_eq!(t.maximum_extensions, [25, 35, 45]);
        assert_eq!(t.yellow_interval, 35);
        assert_eq!(t.red_clearance, 15);

        assert!(matches!(
            card.update_from_poll("bogus poll", &payload),
            Err(CardError::UnknownPoll { .. })
        ));
    }

    #[test]
    fn card_file_roundtrip() {
        let mut card = eight_phase_card();
        card.detectorconf.push(DetectorConf {
            id: 3,
            detector_type: 2,
            phase_assignment: 0b0000_0100,
            extend_time: 20,
            ..DetectorConf::default()
        });
        card.tod_tables.push(TodTableEntry {
            table_num: 1,
            start_hour: 6,
            start_min: 30,
            plan_num: 3,
            offset_index: 10,
        });
        card.tsp_conf.enable_coordination_plans = 0b101;
        card.tsp_conf.plans[2] = TspPlan {
            max_early_green: 15,
            max_green_extension: 12,
            inhibit_cycles: 2,
            green_factor: [8, 30, 10, 12, 8, 30, 10, 12],
        };
        let text = card.to_text();
        let read_back = TimingCard::from_text(&text).unwrap();
        assert_eq!(read_back.phaseflags, card.phaseflags);
        assert_eq!(read_back.phasetiming, card.phasetiming);
        assert_eq!(read_back.detectorconf, card.detectorconf);
        assert_eq!(read_back.tod_tables, card.tod_tables);
        assert_eq!(read_back.tsp_conf.plans[2], card.tsp_conf.plans[2]);
        // derivations rerun on load
        assert_eq!(
            read_back.coordplans[0].coordinated_phases,
            card.coordplans[0].coordinated_phases
        );
        assert!(read_back.is_initiated());
    }

    #[test]
    fn truncated_card_file_is_rejected() {
        let card = eight_phase_card();
        let text = card.to_text();
        let cut = &text[..text.len() - 10];
        assert!(matches!(
            TimingCard::from_text(cut),
            Err(CardError::Syntax { .. })
        ));
    }

    #[test]
    fn recall_priority_order() {
        let mut card = eight_phase_card();
        card.phaseflags.maximum_recall_phases = 0b0000_0010;
        card.phaseflags.minimum_recall_phases = 0b0000_0011;
        assert_eq!(
            card.phase_recall(ControlMode::Coordination, Some(0), 1),
            PhaseRecall::Maximum
        );
        assert_eq!(
            card.phase_recall(ControlMode::Coordination, Some(0), 0),
            PhaseRecall::Minimum
        );
        assert_eq!(
            card.phase_recall(ControlMode::Coordination, Some(0), 4),
            PhaseRecall::None
        );
    }
}
