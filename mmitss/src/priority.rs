//! Vehicle awareness and signal-priority decisions: per-vehicle tracking on
//! the map, vehicular phase calls and green extensions, early-green /
//! green-extension priority grants fused from SRMs, and SSM assembly.
//!
//! The engine is pure state + transitions: inputs are decoded records and a
//! millisecond clock, outputs are soft-call requests, trajectory records and
//! SSM payload records for the caller to ship.

use std::collections::HashMap;

use log::info;

use crate::fanout::{ControllerStateRecord, SoftCallObj, SoftCallType, SoftcallRequest, VehTrajectory};
use crate::j2735::{
    Bsm, IntersectionAccessPoint, PrioritizationResponseStatus, PriorityRequestType,
    SignalStatusPackage, Srm, Ssm, INVALID_MINUTE_OF_YEAR,
};
use crate::map::{ConnectedVehicle, MapDb, MapLocType, MotionState};
use crate::timecard::{phase_on, ControlMode, PhaseCall, PhaseRecall, PhaseState};

/// Engine timing knobs; defaults mirror the deployed configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AwareConfig {
    /// speed floor for travel-time estimates and the stop counter, m/s
    pub stop_speed: f64,
    /// movement threshold below which the prior map match is reused, meters
    pub stop_dist: f64,
    /// phase call horizon, deciseconds
    pub max_time2go_phase_call: u16,
    /// proximity to green end required before extending, deciseconds
    pub max_time2change_phase_ext: u16,
    /// non-TSP extension window past minEndTime, deciseconds
    pub max_time2phase_ext: u16,
    /// priority green-extension window past minEndTime, deciseconds
    pub max_green_extension: u16,
    /// per-phase vehicle call holdoff, milliseconds
    pub veh_phase_call_interval: u64,
    /// BSM/SRM staleness bound, milliseconds
    pub dsrc_timeout: u64,
    /// SSM cadence, milliseconds
    pub ssm_interval: u64,
}

impl Default for AwareConfig {
    fn default() -> Self {
        AwareConfig {
            stop_speed: 2.0,
            stop_dist: 5.0,
            max_time2go_phase_call: 200,
            max_time2change_phase_ext: 40,
            max_time2phase_ext: 50,
            max_green_extension: 100,
            veh_phase_call_interval: 1000,
            dsrc_timeout: 2000,
            ssm_interval: 1000,
        }
    }
}

/// Per-vehicle track: the latest BSM-derived state plus the trail of
/// located points while the vehicle rides an inbound approach.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VehicleTrack {
    pub msec: u64,
    pub msg_cnt: u8,
    pub is_on_approach: bool,
    pub is_phase_called: bool,
    pub is_extension_called: bool,
    /// trail[0] is the entry point; non-empty once tracked
    pub trail: Vec<ConnectedVehicle>,
}

impl VehicleTrack {
    fn latest(&self) -> Option<&ConnectedVehicle> {
        self.trail.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RequestStatus {
    Requested,
    Processing,
    Granted,
    Rejected,
    Completed,
    Cancelled,
}

impl RequestStatus {
    fn to_response(self) -> PrioritizationResponseStatus {
        match self {
            RequestStatus::Requested => PrioritizationResponseStatus::Requested,
            RequestStatus::Processing => PrioritizationResponseStatus::Processing,
            RequestStatus::Granted => PrioritizationResponseStatus::Granted,
            RequestStatus::Rejected => PrioritizationResponseStatus::Rejected,
            RequestStatus::Completed | RequestStatus::Cancelled => {
                PrioritizationResponseStatus::Unknown
            },
        }
    }
}

/// One tracked SRM conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct SrmEntry {
    pub msec: u64,
    pub srm: Srm,
    pub requested_phase: u8,
    pub status: RequestStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrantType {
    #[default]
    None,
    EarlyGreen,
    GreenExtension,
}

/// The single active priority grant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PriorityGrant {
    pub grant_type: GrantType,
    pub msec: u64,
    pub phase: u8,
    pub veh_id: u32,
    pub cycle_cnt: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ExtState {
    #[default]
    None,
    Called,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct PhaseExtension {
    state: ExtState,
    serving_veh_ids: Vec<u32>,
}

/// Everything the engine can hand back from one input or tick.
#[derive(Debug, Clone, PartialEq)]
pub enum AwareOutput {
    SoftCall(SoftcallRequest),
    Trajectory(VehTrajectory),
    Ssm(Ssm),
}

/// The awareness engine for one intersection.
#[derive(Debug, Clone, Default)]
pub struct AwareEngine {
    config: AwareConfig,
    intersection_id: u16,
    intersection_index: usize,
    vehicles: HashMap<u32, VehicleTrack>,
    srm_list: Vec<SrmEntry>,
    grant: PriorityGrant,
    /// increments on sync-phase protected-yellow onset
    cycle_cnt: u8,
    last_sync_state: Option<PhaseState>,
    phase_call_msec: [u64; 8],
    phase_ext: [PhaseExtension; 8],
    ssm_msg_cnt: u8,
    ssm_update_cnt: u8,
    ssm_msec: u64,
    request_status_updated: bool,
}

fn time2go_ds(dist_long_m: f64, speed_mps: f64, stop_speed: f64) -> u16 {
    let speed = speed_mps.max(stop_speed);
    ((dist_long_m.max(0.0) / speed) * 10.0).round() as u16
}

/// TimeMark arithmetic on deciseconds of the hour (mod 36000).
fn mark_add(now_mark: u16, delta_ds: u16) -> u16 {
    ((u32::from(now_mark) + u32::from(delta_ds)) % 36000) as u16
}

fn mark_duration(from: u16, to: u16) -> u16 {
    if to >= from {
        to - from
    } else {
        36000 - from + to
    }
}

/// `t` within `[min_end, min_end + window]` in wrap-around hour time.
fn within_window(min_end: u16, window: u16, t: u16) -> bool {
    mark_duration(min_end, t) <= window
}

fn is_before(t: u16, mark: u16) -> bool {
    mark_duration(t, mark) < 18000
}

impl AwareEngine {
    pub fn new(config: AwareConfig, intersection_id: u16, intersection_index: usize) -> AwareEngine {
        AwareEngine {
            config,
            intersection_id,
            intersection_index,
            ..AwareEngine::default()
        }
    }

    pub fn grant(&self) -> &PriorityGrant {
        &self.grant
    }

    pub fn cycle_cnt(&self) -> u8 {
        self.cycle_cnt
    }

    pub fn vehicle(&self, id: u32) -> Option<&VehicleTrack> {
        self.vehicles.get(&id)
    }

    pub fn srm_entries(&self) -> &[SrmEntry] {
        &self.srm_list
    }

    /// Ingests a BSM: updates the vehicle track, re-locates it on the map
    /// when it moved enough, and emits the trajectory record when the
    /// vehicle completes an approach traversal.
    pub fn on_bsm(
        &mut self,
        bsm: &Bsm,
        map: &MapDb,
        now: u64,
    ) -> Option<AwareOutput> {
        if !bsm.has_position() {
            return None;
        }
        let track = self.vehicles.entry(bsm.id).or_default();
        // stale or repeated messages are dropped on msgCnt
        if !track.trail.is_empty() && track.msg_cnt == bsm.msg_cnt && now < track.msec + 1000 {
            return None;
        }
        track.msec = now;
        track.msg_cnt = bsm.msg_cnt;

        let mut cv_in = ConnectedVehicle {
            id: bsm.id,
            msec: now,
            geo_point: crate::geo::GeoPoint {
                latitude: f64::from(bsm.latitude) / 1e7,
                longitude: f64::from(bsm.longitude) / 1e7,
                elevation: if bsm.elevation == crate::j2735::UNAVAILABLE_ELEVATION {
                    f64::NAN
                } else {
                    f64::from(bsm.elevation) / 10.0
                },
            },
            motion: MotionState {
                speed: bsm.speed_mps().unwrap_or(0.0),
                heading: bsm.heading_deg().unwrap_or(0.0),
            },
            ..ConnectedVehicle::default()
        };
        let first_bsm = track.trail.is_empty();
        let prior = track.trail.last().cloned().unwrap_or_else(|| cv_in.clone());
        // a slow, barely moved vehicle keeps its previous map match
        let do_mapping = first_bsm
            || cv_in.motion.speed >= self.config.stop_speed
            || crate::geo::geo_distance(cv_in.geo_point, prior.geo_point).abs()
                >= self.config.stop_dist;
        if !do_mapping {
            cv_in.is_in_map = prior.is_in_map;
            cv_in.tracking = prior.tracking;
            cv_in.location = prior.location.clone();
        } else {
            let mut prior_for_locate = prior.clone();
            prior_for_locate.geo_point = cv_in.geo_point;
            prior_for_locate.motion = cv_in.motion;
            match map.locate_vehicle_in_map(&prior_for_locate) {
                Some(tracking) => {
                    cv_in.is_in_map = true;
                    cv_in.tracking = tracking;
                    cv_in.location = map.update_location_aware(&tracking);
                },
                None => {
                    cv_in.is_in_map = false;
                },
            }
        }

        let mut output = None;
        if track.is_on_approach {
            let same_intersection =
                cv_in.is_in_map && cv_in.tracking.intersection == self.intersection_index;
            let still_inbound = same_intersection
                && matches!(
                    cv_in.tracking.status,
                    MapLocType::OnInbound | MapLocType::AtIntersectionBox
                )
                && cv_in.tracking.approach == prior.tracking.approach;
            if still_inbound {
                if do_mapping {
                    track.trail.push(cv_in);
                }
            } else {
                // traversal over: outbound, another intersection, or gone
                if track.trail.len() >= 10 {
                    output = Some(AwareOutput::Trajectory(form_trajectory(
                        track,
                        map,
                        self.intersection_id,
                        self.config.stop_speed,
                    )));
                }
                info!("vehicle {} left the approach", bsm.id);
                track.is_on_approach = false;
                track.is_phase_called = false;
                track.is_extension_called = false;
                track.trail.clear();
                track.trail.push(cv_in);
            }
        } else if cv_in.is_in_map
            && cv_in.tracking.intersection == self.intersection_index
            && cv_in.tracking.status == MapLocType::OnInbound
        {
            info!(
                "vehicle {} entered inbound lane {}, phase {}",
                cv_in.id, cv_in.location.lane_id, cv_in.location.control_phase
            );
            track.is_on_approach = true;
            track.trail.clear();
            track.trail.push(cv_in);
        } else {
            track.trail.clear();
            track.trail.push(cv_in);
        }
        output
    }

    /// Ingests an SRM addressed to this intersection.
    pub fn on_srm(&mut self, srm: &Srm, map: &MapDb, cntrl: &ControllerStateRecord, now: u64) {
        if srm.intersection_id != self.intersection_id {
            return;
        }
        let requested_phase = match srm.in_bound {
            IntersectionAccessPoint::Lane(lane) => {
                match map.control_phase_by_lane(self.intersection_id, lane) {
                    Some(phase) => phase,
                    None => {
                        // unknown lane: reject the conversation outright
                        self.upsert_srm(srm, 0, RequestStatus::Rejected, now);
                        return;
                    },
                }
            },
            IntersectionAccessPoint::Approach(approach) => map
                .control_phase_by_approach(self.intersection_id, approach)
                .unwrap_or(0),
            IntersectionAccessPoint::Connection(_) => 0,
        };
        // the requesting vehicle must be tracked through its BSMs
        let on_inbound = self
            .vehicles
            .get(&srm.requestor.veh_id)
            .is_some_and(|t| t.is_on_approach);
        if let Some(entry) = self
            .srm_list
            .iter_mut()
            .find(|e| e.srm.requestor.veh_id == srm.requestor.veh_id)
        {
            // update SRM keeps its original requested phase
            if srm.msg_cnt > entry.srm.msg_cnt || srm.time_stamp_sec > entry.srm.time_stamp_sec {
                entry.msec = now;
                entry.srm = *srm;
                self.request_status_updated = true;
            }
            return;
        }
        let grantable = matches!(
            srm.request_type,
            PriorityRequestType::PriorityRequest | PriorityRequestType::RequestUpdate
        ) && requested_phase > 0
            && phase_on(cntrl.permitted_phases, usize::from(requested_phase - 1))
            && cntrl.mode == ControlMode::Coordination
            && phase_on(cntrl.coordinated_phases, usize::from(requested_phase - 1))
            && on_inbound;
        let status = if grantable {
            RequestStatus::Requested
        } else {
            RequestStatus::Rejected
        };
        self.upsert_srm(srm, requested_phase, status, now);
    }

    fn upsert_srm(&mut self, srm: &Srm, requested_phase: u8, status: RequestStatus, now: u64) {
        self.srm_list.push(SrmEntry {
            msec: now,
            srm: *srm,
            requested_phase,
            status,
        });
        self.request_status_updated = true;
    }

    /// Pedestrian SRM relayed by the cloud peer: a one-shot ped soft-call.
    pub fn on_psrm(
        &mut self,
        psrm: &Srm,
        map: &MapDb,
        cntrl: &ControllerStateRecord,
        now: u64,
    ) -> Option<AwareOutput> {
        let _ = now;
        if psrm.intersection_id != self.intersection_id {
            return None;
        }
        let phase = match psrm.in_bound {
            IntersectionAccessPoint::Lane(lane) => {
                map.control_phase_by_lane(self.intersection_id, lane)?
            },
            IntersectionAccessPoint::Approach(approach) => {
                map.control_phase_by_approach(self.intersection_id, approach)?
            },
            IntersectionAccessPoint::Connection(_) => return None,
        };
        if phase == 0 || !phase_on(cntrl.permitted_ped_phases, usize::from(phase - 1)) {
            return None;
        }
        let idx = usize::from(phase - 1);
        if phase_on(cntrl.ped_call, idx)
            || cntrl.call_status[idx] == PhaseCall::Ped
            || cntrl.recall_status[idx] == PhaseRecall::Ped
        {
            return None;
        }
        Some(AwareOutput::SoftCall(SoftcallRequest {
            phases: 1 << idx,
            obj: SoftCallObj::Ped,
            call_type: SoftCallType::Call,
        }))
    }

    /// Tracks the signal-cycle counter on sync-phase yellow onset.
    pub fn on_controller_state(&mut self, cntrl: &ControllerStateRecord) {
        if cntrl.synch_phase == 0 {
            return;
        }
        let sync_state = cntrl.phase_state[usize::from(cntrl.synch_phase - 1)].state;
        match self.last_sync_state {
            None => self.last_sync_state = Some(sync_state),
            Some(prev) if prev != sync_state => {
                if sync_state == PhaseState::ProtectedYellow {
                    self.cycle_cnt = (self.cycle_cnt + 1) % 127;
                }
                self.last_sync_state = Some(sync_state);
            },
            _ => {},
        }
    }

    /// One engine pass against the latest controller state. `now_mark` is
    /// derived from `now` internally (deciseconds of the hour).
    pub fn tick(&mut self, cntrl: &ControllerStateRecord, now: u64) -> Vec<AwareOutput> {
        let mut outputs = Vec::new();
        self.prune(now);
        if cntrl.mode == ControlMode::Unavailable {
            return outputs;
        }
        let now_mark = ((now % 3_600_000) / 100) as u16;

        self.check_priority_cancel(cntrl, &mut outputs);
        self.check_priority_grant(cntrl, now, now_mark, &mut outputs);
        self.check_phase_calls(cntrl, now, &mut outputs);
        self.check_extension_cancel(cntrl, &mut outputs);
        self.check_extension_calls(cntrl, now_mark, &mut outputs);
        self.check_ssm(cntrl, now, &mut outputs);
        outputs
    }

    fn prune(&mut self, now: u64) {
        let timeout = self.config.dsrc_timeout;
        self.vehicles
            .retain(|_, track| now < track.msec + timeout);
        let before = self.srm_list.len();
        self.srm_list.retain(|entry| {
            entry.status == RequestStatus::Granted || now < entry.msec + timeout
        });
        if self.srm_list.len() != before {
            self.request_status_updated = true;
        }
    }

    fn check_priority_cancel(
        &mut self,
        cntrl: &ControllerStateRecord,
        outputs: &mut Vec<AwareOutput>,
    ) {
        if self.grant.grant_type == GrantType::None {
            return;
        }
        let phase_idx = usize::from(self.grant.phase - 1);
        let in_green = cntrl.phase_state[phase_idx].state.is_green();
        let vehicle_gone = !self
            .vehicles
            .get(&self.grant.veh_id)
            .is_some_and(|t| t.is_on_approach);
        let cancelled_by_srm = self
            .srm_list
            .iter()
            .find(|e| e.srm.requestor.veh_id == self.grant.veh_id)
            .is_some_and(|e| e.srm.is_cancel());
        let cancel = match self.grant.grant_type {
            GrantType::EarlyGreen => in_green,
            GrantType::GreenExtension => !in_green,
            GrantType::None => false,
        } || vehicle_gone
            || cancelled_by_srm;
        if cancel {
            info!("cancel priority on phase {}", self.grant.phase);
            self.srm_list
                .retain(|e| e.srm.requestor.veh_id != self.grant.veh_id);
            outputs.push(AwareOutput::SoftCall(SoftcallRequest {
                phases: 1 << phase_idx,
                obj: SoftCallObj::Priority,
                call_type: SoftCallType::Cancel,
            }));
            self.grant.grant_type = GrantType::None;
            self.request_status_updated = true;
        }
    }

    fn check_priority_grant(
        &mut self,
        cntrl: &ControllerStateRecord,
        now: u64,
        now_mark: u16,
        outputs: &mut Vec<AwareOutput>,
    ) {
        if self.grant.grant_type != GrantType::None
            || cntrl.mode != ControlMode::Coordination
            || self.cycle_cnt == self.grant.cycle_cnt && self.grant.msec > 0
            || cntrl.synch_phase == 0
        {
            return;
        }
        struct Candidate {
            veh_id: u32,
            phase: u8,
            duration: u16,
        }
        let mut green_extension: Vec<Candidate> = Vec::new();
        let mut early_green: Vec<Candidate> = Vec::new();
        let sync_state = cntrl.phase_state[usize::from(cntrl.synch_phase - 1)];
        for entry in &mut self.srm_list {
            if !matches!(
                entry.status,
                RequestStatus::Requested | RequestStatus::Processing
            ) {
                continue;
            }
            if !matches!(
                entry.srm.request_type,
                PriorityRequestType::PriorityRequest | PriorityRequestType::RequestUpdate
            ) {
                continue;
            }
            if entry.status == RequestStatus::Requested {
                entry.status = RequestStatus::Processing;
                self.request_status_updated = true;
            }
            let Some(track) = self.vehicles.get(&entry.srm.requestor.veh_id) else {
                continue;
            };
            if !track.is_on_approach {
                continue;
            }
            let Some(cv) = track.latest() else {
                continue;
            };
            let time2go = time2go_ds(cv.location.dist_long, cv.motion.speed, self.config.stop_speed);
            let time2arrival = mark_add(now_mark, time2go);
            let phase_state = cntrl.phase_state[usize::from(entry.requested_phase - 1)];
            let in_green = phase_state.state.is_green();
            let sync_in_green = sync_state.state.is_green();
            if in_green
                && sync_in_green
                && within_window(phase_state.min_end_time, self.config.max_green_extension, time2arrival)
                && cntrl.local_cycle_clock + self.config.max_time2change_phase_ext
                    >= cntrl.cycle_length
            {
                green_extension.push(Candidate {
                    veh_id: entry.srm.requestor.veh_id,
                    phase: entry.requested_phase,
                    duration: mark_duration(phase_state.min_end_time, time2arrival),
                });
            } else if !in_green
                && !phase_state.state.is_yellow()
                && is_before(time2arrival, phase_state.min_end_time)
            {
                early_green.push(Candidate {
                    veh_id: entry.srm.requestor.veh_id,
                    phase: entry.requested_phase,
                    duration: mark_duration(time2arrival, phase_state.min_end_time),
                });
            }
        }
        // a green extension avoids the stop entirely, so it outranks
        let (granted, call_type) = if let Some(best) =
            green_extension.iter().max_by_key(|c| c.duration)
        {
            self.grant = PriorityGrant {
                grant_type: GrantType::GreenExtension,
                msec: now,
                phase: cntrl.synch_phase,
                veh_id: best.veh_id,
                cycle_cnt: self.cycle_cnt,
            };
            for entry in &mut self.srm_list {
                if green_extension.iter().any(|c| c.veh_id == entry.srm.requestor.veh_id) {
                    entry.status = RequestStatus::Granted;
                }
            }
            (true, SoftCallType::Extension)
        } else if let Some(best) = early_green.iter().max_by_key(|c| c.duration) {
            self.grant = PriorityGrant {
                grant_type: GrantType::EarlyGreen,
                msec: now,
                phase: best.phase,
                veh_id: best.veh_id,
                cycle_cnt: self.cycle_cnt,
            };
            for entry in &mut self.srm_list {
                if entry.srm.requestor.veh_id == best.veh_id {
                    entry.status = RequestStatus::Granted;
                }
            }
            (true, SoftCallType::Call)
        } else {
            (false, SoftCallType::Call)
        };
        if granted {
            self.request_status_updated = true;
            info!(
                "grant {:?} on phase {} for vehicle {}",
                self.grant.grant_type, self.grant.phase, self.grant.veh_id
            );
            outputs.push(AwareOutput::SoftCall(SoftcallRequest {
                phases: 1 << (self.grant.phase - 1),
                obj: SoftCallObj::Priority,
                call_type,
            }));
        }
    }

    fn check_phase_calls(
        &mut self,
        cntrl: &ControllerStateRecord,
        now: u64,
        outputs: &mut Vec<AwareOutput>,
    ) {
        let mut phases2call: u8 = 0;
        for track in self.vehicles.values_mut() {
            if !track.is_on_approach || track.is_phase_called {
                continue;
            }
            let Some(cv) = track.trail.last() else {
                continue;
            };
            if cv.location.control_phase == 0 {
                continue;
            }
            let idx = usize::from(cv.location.control_phase - 1);
            let time2go = time2go_ds(cv.location.dist_long, cv.motion.speed, self.config.stop_speed);
            let in_green = cntrl.phase_state[idx].state.is_green();
            if !in_green
                && phase_on(cntrl.permitted_phases, idx)
                && !phase_on(cntrl.veh_call, idx)
                && cntrl.call_status[idx] == PhaseCall::None
                && cntrl.recall_status[idx] == PhaseRecall::None
                && time2go < self.config.max_time2go_phase_call
                && now > self.phase_call_msec[idx] + self.config.veh_phase_call_interval
            {
                phases2call |= 1 << idx;
                track.is_phase_called = true;
                self.phase_call_msec[idx] = now;
            }
        }
        if phases2call != 0 {
            outputs.push(AwareOutput::SoftCall(SoftcallRequest {
                phases: phases2call,
                obj: SoftCallObj::Vehicle,
                call_type: SoftCallType::Call,
            }));
        }
    }

    fn check_extension_cancel(
        &mut self,
        cntrl: &ControllerStateRecord,
        outputs: &mut Vec<AwareOutput>,
    ) {
        let mut phases2cancel: u8 = 0;
        for i in 0..8 {
            let ext = &mut self.phase_ext[i];
            if ext.state != ExtState::Called {
                continue;
            }
            let in_green = cntrl.phase_state[i].state.is_green();
            if !in_green {
                // green expired on its own
                ext.state = ExtState::Cancelled;
                ext.serving_veh_ids.clear();
                continue;
            }
            let vehicles = &self.vehicles;
            ext.serving_veh_ids
                .retain(|id| vehicles.get(id).is_some_and(|t| t.is_on_approach));
            if ext.serving_veh_ids.is_empty() {
                phases2cancel |= 1 << i;
                ext.state = ExtState::None;
            }
        }
        if phases2cancel != 0 {
            outputs.push(AwareOutput::SoftCall(SoftcallRequest {
                phases: phases2cancel,
                obj: SoftCallObj::Vehicle,
                call_type: SoftCallType::Cancel,
            }));
        }
    }

    fn check_extension_calls(
        &mut self,
        cntrl: &ControllerStateRecord,
        now_mark: u16,
        outputs: &mut Vec<AwareOutput>,
    ) {
        if self.grant.grant_type != GrantType::None {
            return;
        }
        if cntrl.mode == ControlMode::Flashing || cntrl.mode == ControlMode::Preemption {
            return;
        }
        let mut phases2ext: u8 = 0;
        for track in self.vehicles.values_mut() {
            if !track.is_on_approach || track.is_extension_called {
                continue;
            }
            let Some(cv) = track.trail.last() else {
                continue;
            };
            if cv.location.control_phase == 0 {
                continue;
            }
            let idx = usize::from(cv.location.control_phase - 1);
            if !phase_on(cntrl.permitted_phases, idx)
                || self.phase_ext[idx].state == ExtState::Called
            {
                continue;
            }
            if cntrl.mode == ControlMode::Coordination
                && phase_on(cntrl.coordinated_phases, idx)
            {
                continue;
            }
            let phase_state = cntrl.phase_state[idx];
            if !phase_state.state.is_green() {
                continue;
            }
            let time2go = time2go_ds(cv.location.dist_long, cv.motion.speed, self.config.stop_speed);
            let time2arrival = mark_add(now_mark, time2go);
            if within_window(phase_state.min_end_time, self.config.max_time2phase_ext, time2arrival)
                && mark_duration(now_mark, phase_state.min_end_time)
                    < self.config.max_time2change_phase_ext
            {
                phases2ext |= 1 << idx;
                track.is_extension_called = true;
                self.phase_ext[idx].state = ExtState::Called;
                self.phase_ext[idx].serving_veh_ids.push(cv.id);
            }
        }
        if phases2ext != 0 {
            outputs.push(AwareOutput::SoftCall(SoftcallRequest {
                phases: phases2ext,
                obj: SoftCallObj::Vehicle,
                call_type: SoftCallType::Extension,
            }));
        }
    }

    fn check_ssm(&mut self, cntrl: &ControllerStateRecord, now: u64, outputs: &mut Vec<AwareOutput>) {
        if now < self.ssm_msec + self.config.ssm_interval {
            return;
        }
        let requests: Vec<SignalStatusPackage> = self
            .srm_list
            .iter()
            .filter(|e| {
                !matches!(e.status, RequestStatus::Completed | RequestStatus::Cancelled)
            })
            .take(32)
            .map(|e| SignalStatusPackage {
                veh_id: e.srm.requestor.veh_id,
                request_id: e.srm.request_id,
                msg_cnt: if e.srm.msg_cnt <= 127 { e.srm.msg_cnt } else { 0 },
                role: e.srm.requestor.role,
                in_bound: e.srm.in_bound,
                out_bound: e.srm.out_bound,
                eta_minute: e.srm.eta_minute,
                eta_sec: e.srm.eta_sec,
                duration: e.srm.duration,
                status: e.status.to_response(),
            })
            .collect();
        self.ssm_msec = now;
        if requests.is_empty() {
            return;
        }
        if self.request_status_updated {
            self.ssm_update_cnt = (self.ssm_update_cnt + 1) % 127;
            self.request_status_updated = false;
        }
        self.ssm_msg_cnt = (self.ssm_msg_cnt + 1) % 127;
        outputs.push(AwareOutput::Ssm(Ssm {
            time_stamp_minute: INVALID_MINUTE_OF_YEAR,
            time_stamp_sec: (now % 60000) as u16,
            msg_cnt: self.ssm_msg_cnt,
            update_cnt: self.ssm_update_cnt,
            id: self.intersection_id,
            requests,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::PhaseTimeView;
    use crate::map::nmap::tests::SIMPLE_NMAP;

    fn test_map() -> MapDb {
        let db = crate::map::nmap::parse_nmap(SIMPLE_NMAP).unwrap();
        MapDb::from_intersections(db.intersections().to_vec()).unwrap()
    }

    fn northbound_bsm(id: u32, msg_cnt: u8, latitude: f64, speed_mps: f64) -> Bsm {
        Bsm {
            msg_cnt,
            id,
            latitude: (latitude * 1e7).round() as i32,
            longitude: -1_221_500_000,
            elevation: 1200,
            speed: (speed_mps / 0.02).round() as u16,
            heading: 0,
            ..Bsm::default()
        }
    }

    fn coordination_record(now: u64, min_end_delta_ds: u16, clock: u16) -> ControllerStateRecord {
        let now_mark = ((now % 3_600_000) / 100) as u16;
        let mut record = ControllerStateRecord {
            permitted_phases: 0xFF,
            permitted_ped_phases: 0b0010_0010,
            mode: ControlMode::Coordination,
            pattern_num: 7,
            synch_phase: 2,
            cycle_length: 800,
            local_cycle_clock: clock,
            coordinated_phases: 0b0010_0010,
            ..ControllerStateRecord::default()
        };
        for i in 0..8 {
            record.phase_state[i] = PhaseTimeView {
                state: if i == 1 || i == 5 {
                    PhaseState::ProtectedGreen
                } else {
                    PhaseState::ProtectedRed
                },
                start_time: now_mark.saturating_sub(100),
                min_end_time: mark_add(now_mark, min_end_delta_ds),
                max_end_time: mark_add(now_mark, min_end_delta_ds + 150),
            };
        }
        record
    }

    fn drive_inbound(engine: &mut AwareEngine, map: &MapDb, id: u32, speed: f64, now: u64) {
        // 100 m upstream of the stop-bar
        let bsm = northbound_bsm(id, 1, 37.78890, speed);
        assert!(engine.on_bsm(&bsm, map, now).is_none());
        assert!(engine.vehicle(id).unwrap().is_on_approach);
    }

    fn inbound_srm(veh_id: u32) -> Srm {
        Srm {
            intersection_id: 1000,
            request_id: 7,
            request_type: PriorityRequestType::PriorityRequest,
            in_bound: IntersectionAccessPoint::Lane(1),
            requestor: crate::j2735::RequestorDescription {
                veh_id,
                ..crate::j2735::RequestorDescription::default()
            },
            ..Srm::default()
        }
    }

    #[test]
    fn fast_bus_is_not_granted_extension() {
        let map = test_map();
        let mut engine = AwareEngine::new(AwareConfig::default(), 1000, 0);
        let now = 10_000_000;
        // arrival ~ 100 m / 15 m/s = 67 ds, earlier than minEndTime (85 ds)
        drive_inbound(&mut engine, &map, 7, 15.0, now);
        let cntrl = coordination_record(now, 85, 770);
        engine.on_srm(&inbound_srm(7), &map, &cntrl, now);
        assert_eq!(engine.srm_entries()[0].status, RequestStatus::Requested);
        let outputs = engine.tick(&cntrl, now);
        assert!(outputs.iter().all(|o| !matches!(
            o,
            AwareOutput::SoftCall(SoftcallRequest {
                obj: SoftCallObj::Priority,
                ..
            })
        )));
        assert_eq!(engine.grant().grant_type, GrantType::None);
        assert_eq!(engine.srm_entries()[0].status, RequestStatus::Processing);
    }

    #[test]
    fn slow_bus_gets_green_extension_once_per_cycle() {
        let map = test_map();
        let mut engine = AwareEngine::new(AwareConfig::default(), 1000, 0);
        let now = 10_000_000;
        // arrival ~ 100 m / 6 m/s = 167 ds, 8.2 s past minEndTime (85 ds)
        drive_inbound(&mut engine, &map, 7, 6.0, now);
        let cntrl = coordination_record(now, 85, 770);
        engine.on_srm(&inbound_srm(7), &map, &cntrl, now);
        let outputs = engine.tick(&cntrl, now);
        let grant_call = outputs.iter().find_map(|o| match o {
            AwareOutput::SoftCall(call) if call.obj == SoftCallObj::Priority => Some(*call),
            _ => None,
        });
        let call = grant_call.expect("extension soft-call expected");
        assert_eq!(call.call_type, SoftCallType::Extension);
        assert_eq!(call.phases, 0b0000_0010); // sync phase 2
        assert_eq!(engine.grant().grant_type, GrantType::GreenExtension);
        assert_eq!(engine.grant().veh_id, 7);
        assert_eq!(engine.srm_entries()[0].status, RequestStatus::Granted);

        // the grant sticks within the same cycle, even for a second request
        drive_inbound(&mut engine, &map, 8, 6.0, now + 100);
        engine.on_srm(&inbound_srm(8), &map, &cntrl, now + 100);
        let outputs = engine.tick(&cntrl, now + 100);
        assert!(outputs.iter().all(|o| !matches!(
            o,
            AwareOutput::SoftCall(SoftcallRequest {
                obj: SoftCallObj::Priority,
                call_type: SoftCallType::Extension,
                ..
            })
        )));
    }

    #[test]
    fn extension_grant_cancels_when_green_expires() {
        let map = test_map();
        let mut engine = AwareEngine::new(AwareConfig::default(), 1000, 0);
        let now = 10_000_000;
        drive_inbound(&mut engine, &map, 7, 6.0, now);
        let cntrl = coordination_record(now, 85, 770);
        engine.on_srm(&inbound_srm(7), &map, &cntrl, now);
        engine.tick(&cntrl, now);
        assert_eq!(engine.grant().grant_type, GrantType::GreenExtension);
        // sync phase drops out of green
        let mut after = coordination_record(now + 500, 85, 790);
        after.phase_state[1].state = PhaseState::ProtectedYellow;
        // keep the vehicle fresh
        let bsm = northbound_bsm(7, 2, 37.78891, 6.0);
        engine.on_bsm(&bsm, &map, now + 500);
        let outputs = engine.tick(&after, now + 500);
        let cancel = outputs.iter().any(|o| {
            matches!(
                o,
                AwareOutput::SoftCall(SoftcallRequest {
                    obj: SoftCallObj::Priority,
                    call_type: SoftCallType::Cancel,
                    ..
                })
            )
        });
        assert!(cancel);
        assert_eq!(engine.grant().grant_type, GrantType::None);
    }

    #[test]
    fn vehicle_phase_call_fires_once_per_visit() {
        let map = test_map();
        let mut engine = AwareEngine::new(AwareConfig::default(), 1000, 0);
        let now = 10_000_000;
        drive_inbound(&mut engine, &map, 42, 10.0, now);
        let mut cntrl = coordination_record(now, 85, 400);
        // control phase 2 red so a call is warranted
        cntrl.phase_state[1].state = PhaseState::ProtectedRed;
        let outputs = engine.tick(&cntrl, now);
        let calls: Vec<_> = outputs
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    AwareOutput::SoftCall(SoftcallRequest {
                        obj: SoftCallObj::Vehicle,
                        call_type: SoftCallType::Call,
                        ..
                    })
                )
            })
            .collect();
        assert_eq!(calls.len(), 1);
        // second tick produces no repeat call
        let bsm = northbound_bsm(42, 2, 37.78891, 10.0);
        engine.on_bsm(&bsm, &map, now + 200);
        let outputs = engine.tick(&cntrl, now + 200);
        assert!(outputs.iter().all(|o| !matches!(
            o,
            AwareOutput::SoftCall(SoftcallRequest {
                obj: SoftCallObj::Vehicle,
                call_type: SoftCallType::Call,
                ..
            })
        )));
    }

    #[test]
    fn traversal_emits_exactly_one_trajectory() {
        let map = test_map();
        let mut engine = AwareEngine::new(AwareConfig::default(), 1000, 0);
        let mut now = 10_000_000;
        // 12 BSMs walking up the inbound lane over 1.1 s
        for i in 0..12u8 {
            let latitude = 37.78885 + f64::from(i) * 0.0000135;
            let bsm = northbound_bsm(9, i + 1, latitude, 15.0);
            assert!(engine.on_bsm(&bsm, &map, now).is_none());
            now += 100;
        }
        assert!(engine.vehicle(9).unwrap().is_on_approach);
        assert!(engine.vehicle(9).unwrap().trail.len() >= 10);
        // next fix lands on the outbound lane
        let bsm = northbound_bsm(9, 13, 37.79030, 15.0);
        let output = engine.on_bsm(&bsm, &map, now);
        let Some(AwareOutput::Trajectory(traj)) = output else {
            panic!("expected a trajectory record, got {output:?}");
        };
        assert_eq!(traj.veh_id, 9);
        assert_eq!(traj.entry_lane_id, 1);
        assert_eq!(traj.entry_phase, 2);
        assert!(traj.dist_traveled > 0);
        assert!(traj.time_traveled >= 11);
        assert!(traj.inbound_lane_length > 0);
        // no second emission for the same traversal
        let bsm = northbound_bsm(9, 14, 37.79040, 15.0);
        assert!(engine.on_bsm(&bsm, &map, now + 100).is_none());
    }

    #[test]
    fn stale_tracks_are_pruned() {
        let map = test_map();
        let mut engine = AwareEngine::new(AwareConfig::default(), 1000, 0);
        let now = 10_000_000;
        drive_inbound(&mut engine, &map, 42, 10.0, now);
        let cntrl = coordination_record(now, 85, 400);
        engine.tick(&cntrl, now + 3000);
        assert!(engine.vehicle(42).is_none());
    }

    #[test]
    fn srm_for_unknown_lane_is_rejected() {
        let map = test_map();
        let mut engine = AwareEngine::new(AwareConfig::default(), 1000, 0);
        let now = 10_000_000;
        let cntrl = coordination_record(now, 85, 400);
        let mut srm = inbound_srm(7);
        srm.in_bound = IntersectionAccessPoint::Lane(77);
        engine.on_srm(&srm, &map, &cntrl, now);
        assert_eq!(engine.srm_entries()[0].status, RequestStatus::Rejected);
    }

    #[test]
    fn ssm_reflects_request_statuses_and_paces_itself() {
        let map = test_map();
        let mut engine = AwareEngine::new(AwareConfig::default(), 1000, 0);
        let now = 10_000_000;
        drive_inbound(&mut engine, &map, 7, 6.0, now);
        let cntrl = coordination_record(now, 85, 770);
        engine.on_srm(&inbound_srm(7), &map, &cntrl, now);
        let outputs = engine.tick(&cntrl, now + 1500);
        let ssm = outputs
            .iter()
            .find_map(|o| match o {
                AwareOutput::Ssm(ssm) => Some(ssm.clone()),
                _ => None,
            })
            .expect("SSM due after the interval");
        assert_eq!(ssm.id, 1000);
        assert_eq!(ssm.requests.len(), 1);
        assert_eq!(ssm.requests[0].veh_id, 7);
        // within the cadence no second SSM is assembled
        let outputs = engine.tick(&cntrl, now + 1600);
        assert!(outputs.iter().all(|o| !matches!(o, AwareOutput::Ssm(_))));
    }
}

/// Packs a finished approach traversal into the trajectory record.
fn form_trajectory(
    track: &VehicleTrack,
    map: &MapDb,
    intersection_id: u16,
    stop_speed: f64,
) -> VehTrajectory {
    let entry = track.trail.first().expect("trail checked non-empty");
    let leave = track.trail.last().expect("trail checked non-empty");
    let dist_traveled_m = (entry.location.dist_long - leave.location.dist_long).max(0.0);
    let time_traveled_ms = leave.msec.saturating_sub(entry.msec);
    let stopped = track
        .trail
        .iter()
        .filter(|cv| cv.motion.speed < stop_speed)
        .count() as u16;
    let lane_len_dm = map
        .lane_length(intersection_id, entry.location.lane_id)
        .map_or(0, |cm| (cm / 10).min(u32::from(u16::MAX)) as u16);
    VehTrajectory {
        veh_id: entry.id,
        entry_lane_id: entry.location.lane_id,
        entry_phase: entry.location.control_phase,
        leave_lane_id: leave.location.lane_id,
        leave_phase: leave.location.control_phase,
        dist_traveled: (dist_traveled_m * 10.0).clamp(0.0, 65535.0) as u16,
        time_traveled: (time_traveled_ms / 100).min(65535) as u16,
        stopped_samples: stopped,
        inbound_lane_length: lane_len_dm,
    }
}
