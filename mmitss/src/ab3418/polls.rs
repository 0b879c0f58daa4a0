//! Scheduled controller polls that reconstruct the static timing card.
//!
//! The poll list is fixed; the driver walks it, issuing the next un-returned
//! poll at a bounded rate and matching responses back to entries by message
//! type and block/memory address. Entries not marked required are auto
//! completed at the end of a pass so a later pass can finish the cycle.

use crate::ab3418::{
    Frame, FLAG, GET_BLOCK_MSG, GET_BLOCK_MSG_ERR, GET_BLOCK_MSG_RES, GET_TIMING_DATA,
    GET_TIMING_DATA_ERR, GET_TIMING_DATA_RES, GET_CONTROL, IPI,
};
use crate::bytes::{append_fcs, byte_stuff};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    GetBlock,
    GetTimingData,
}

/// One row of the poll table.
#[derive(Debug, Clone)]
pub struct PollConf {
    pub kind: PollKind,
    pub desc: &'static str,
    pub control_byte: u8,
    pub mess_type: u8,
    /// pageId for getBlockMsg, memory MSB for getTimingData
    pub data1: u8,
    /// blockId for getBlockMsg, memory LSB for getTimingData
    pub data2: u8,
    /// byte count for getTimingData, unused for getBlockMsg
    pub data3: u8,
    pub res_mess_type: u8,
    pub err_mess_type: u8,
    /// expected response frame size including both flags
    pub res_size: usize,
    pub required: bool,
    pub fcs_required: bool,
    pub returned: bool,
}

const fn block(desc: &'static str, page: u8, block: u8, size: usize, required: bool) -> PollConf {
    PollConf {
        kind: PollKind::GetBlock,
        desc,
        control_byte: GET_CONTROL,
        mess_type: GET_BLOCK_MSG,
        data1: page,
        data2: block,
        data3: 0,
        res_mess_type: GET_BLOCK_MSG_RES,
        err_mess_type: GET_BLOCK_MSG_ERR,
        res_size: size,
        required,
        fcs_required: true,
        returned: false,
    }
}

const fn timing(desc: &'static str, msb: u8, lsb: u8, nbytes: u8, size: usize) -> PollConf {
    PollConf {
        kind: PollKind::GetTimingData,
        desc,
        control_byte: GET_CONTROL,
        mess_type: GET_TIMING_DATA,
        data1: msb,
        data2: lsb,
        data3: nbytes,
        res_mess_type: GET_TIMING_DATA_RES,
        err_mess_type: GET_TIMING_DATA_ERR,
        res_size: size,
        required: true,
        fcs_required: true,
        returned: false,
    }
}

fn poll_list() -> Vec<PollConf> {
    let mut list = vec![
        timing("red revert", 0x72, 0x00, 1, 12),
        block("phase flags", 2, 1, 31, true),
        block("ped flags", 2, 3, 18, true),
    ];
    // phase timing, one block per phase
    const PHASE_TIMING: [&str; 8] = [
        "phase timing 1",
        "phase timing 2",
        "phase timing 3",
        "phase timing 4",
        "phase timing 5",
        "phase timing 6",
        "phase timing 7",
        "phase timing 8",
    ];
    for (i, desc) in PHASE_TIMING.iter().enumerate() {
        list.push(block(desc, 3, i as u8 + 1, 31, true));
    }
    // local coordination plans 1-9 (required), 11-19 and 21-29 (optional)
    const LOCAL_PLANS: [&str; 9] = [
        "coord plan 1",
        "coord plan 2",
        "coord plan 3",
        "coord plan 4",
        "coord plan 5",
        "coord plan 6",
        "coord plan 7",
        "coord plan 8",
        "coord plan 9",
    ];
    for (i, desc) in LOCAL_PLANS.iter().enumerate() {
        list.push(block(desc, 4, i as u8 + 1, 36, true));
    }
    list.push(block("free plan", 4, 10, 28, true));
    const COORD_PLANS: [(&str, u8, u8, bool); 18] = [
        ("coord plan 11", 5, 1, false),
        ("coord plan 12", 5, 2, false),
        ("coord plan 13", 5, 3, false),
        ("coord plan 14", 5, 4, false),
        ("coord plan 15", 5, 5, false),
        ("coord plan 16", 5, 6, false),
        ("coord plan 17", 5, 7, false),
        ("coord plan 18", 5, 8, false),
        ("coord plan 19", 5, 9, false),
        ("coord plan 21", 6, 1, false),
        ("coord plan 22", 6, 2, false),
        ("coord plan 23", 6, 3, false),
        ("coord plan 24", 6, 4, false),
        ("coord plan 25", 6, 5, false),
        ("coord plan 26", 6, 6, false),
        ("coord plan 27", 6, 7, false),
        ("coord plan 28", 6, 8, false),
        ("coord plan 29", 6, 9, false),
    ];
    for &(desc, page, blk, required) in &COORD_PLANS {
        list.push(block(desc, page, blk, 36, required));
    }
    // detectors
    const DETECTOR_GROUPS: [&str; 11] = [
        "detector group 1",
        "detector group 2",
        "detector group 3",
        "detector group 4",
        "detector group 5",
        "detector group 6",
        "detector group 7",
        "detector group 8",
        "detector group 9",
        "detector group 10",
        "detector group 11",
    ];
    for (i, desc) in DETECTOR_GROUPS.iter().enumerate() {
        list.push(block(desc, 7, i as u8 + 1, 38, false));
    }
    list.push(block("system detector", 7, 12, 34, false));
    list.push(block("CIC plan", 7, 13, 35, false));
    // TOD tables: 6 tables, 4 entries per block
    const TOD_TABLES: [&str; 24] = [
        "TOD table 1",
        "TOD table 2",
        "TOD table 3",
        "TOD table 4",
        "TOD table 5",
        "TOD table 6",
        "TOD table 7",
        "TOD table 8",
        "TOD table 9",
        "TOD table 10",
        "TOD table 11",
        "TOD table 12",
        "TOD table 13",
        "TOD table 14",
        "TOD table 15",
        "TOD table 16",
        "TOD table 17",
        "TOD table 18",
        "TOD table 19",
        "TOD table 20",
        "TOD table 21",
        "TOD table 22",
        "TOD table 23",
        "TOD table 24",
    ];
    for (i, desc) in TOD_TABLES.iter().enumerate() {
        list.push(block(desc, 8, i as u8 + 1, 26, false));
    }
    list.push(block("weekday", 8, 25, 17, false));
    const TOD_FUNCTIONS: [&str; 4] = [
        "TOD Function 1",
        "TOD Function 2",
        "TOD Function 3",
        "TOD Function 4",
    ];
    for (i, desc) in TOD_FUNCTIONS.iter().enumerate() {
        list.push(block(desc, 9, i as u8 + 6, 38, false));
    }
    // railroad and emergency-vehicle preemption
    const RR_BLOCKS: [(&str, u8, usize); 10] = [
        ("RR1 phase flags", 1, 22),
        ("RR1 ped flags", 2, 22),
        ("RR1 overlap flags", 3, 22),
        ("RR1 exit parameters", 4, 14),
        ("RR1 Configuration", 5, 22),
        ("RR2 phase flags", 6, 22),
        ("RR2 ped flags", 7, 22),
        ("RR2 overlap flags", 8, 22),
        ("RR2 exit parameters", 9, 14),
        ("RR2 Configuration", 10, 22),
    ];
    for &(desc, blk, size) in &RR_BLOCKS {
        list.push(block(desc, 11, blk, size, false));
    }
    const EV_BLOCKS: [(&str, u8); 4] = [("EVA", 11), ("EVB", 12), ("EVC", 13), ("EVD", 14)];
    for &(desc, blk) in &EV_BLOCKS {
        list.push(block(desc, 11, blk, 18, true));
    }
    // transit signal priority plans
    const TSP_GROUPS: [(&str, u8, bool); 6] = [
        ("TSP plan group 1", 2, true),
        ("TSP plan group 2", 3, true),
        ("TSP plan group 3", 4, true),
        ("TSP plan group 4", 5, false),
        ("TSP plan group 5", 6, false),
        ("TSP plan group 6", 7, false),
    ];
    for &(desc, blk, required) in &TSP_GROUPS {
        list.push(block(desc, 13, blk, 43, required));
    }
    list.push(block("TSP enable plans", 13, 8, 28, true));
    list
}

/// Walks the poll table, pacing requests and matching responses.
#[derive(Debug)]
pub struct Polls {
    list: Vec<PollConf>,
    index: usize,
    current: Option<usize>,
    /// maximum repeats of one poll per request, and passes over the list
    max_polls: u32,
    nums_polled: u32,
    cycle_nums: u32,
    poll_msec: u64,
    poll_interval_ms: u64,
}

impl Polls {
    pub fn new(max_polls_per_request: u32, poll_interval_ms: u64) -> Polls {
        Polls {
            list: poll_list(),
            index: 0,
            current: None,
            max_polls: max_polls_per_request,
            nums_polled: 0,
            cycle_nums: 0,
            poll_msec: 0,
            poll_interval_ms,
        }
    }

    pub fn entries(&self) -> &[PollConf] {
        &self.list
    }

    /// Advances to the next un-returned entry (or rewinds to the first).
    pub fn get_next_poll(&mut self, from_start: bool) {
        self.current = None;
        self.index = if from_start { 0 } else { self.index + 1 };
        for i in self.index..self.list.len() {
            if !self.list[i].returned {
                self.index = i;
                self.current = Some(i);
                self.nums_polled = 0;
                break;
            }
        }
    }

    /// End-of-pass bookkeeping: marks optional entries returned and reports
    /// whether another pass is allowed.
    pub fn finish_pass(&mut self) -> bool {
        self.cycle_nums += 1;
        if self.cycle_nums >= self.max_polls {
            return false;
        }
        for item in &mut self.list {
            if !item.required && !item.returned {
                item.returned = true;
            }
        }
        true
    }

    pub fn reset_poll_return(&mut self) {
        for item in &mut self.list {
            item.returned = false;
        }
        self.cycle_nums = 0;
    }

    /// Re-opens the required coordination-plan polls after a plan change the
    /// card cannot resolve.
    pub fn reset_plan_polls(&mut self) {
        for item in &mut self.list {
            if item.required && item.desc.starts_with("coord plan") {
                item.returned = false;
            }
        }
    }

    pub fn set_poll_returned(&mut self, desc: &str) {
        if let Some(item) = self.list.iter_mut().find(|i| i.desc == desc) {
            item.returned = true;
        }
    }

    /// True when the driver should move to the next entry: the current one
    /// returned, or it was retried too many times.
    pub fn move_on(&self) -> bool {
        match self.current {
            Some(i) => self.list[i].returned || self.nums_polled >= self.max_polls,
            None => false,
        }
    }

    pub fn at_end(&self) -> bool {
        self.current.is_none()
    }

    pub fn all_returned(&self) -> bool {
        self.list.iter().all(|i| !i.required || i.returned)
    }

    /// Rate gate: true when the current poll should be written now.
    pub fn should_send(&mut self, msec: u64) -> bool {
        let Some(i) = self.current else {
            return false;
        };
        if !self.list[i].returned && msec >= self.poll_msec + self.poll_interval_ms {
            self.poll_msec = msec;
            self.nums_polled += 1;
            return true;
        }
        false
    }

    pub fn current_desc(&self) -> Option<&'static str> {
        self.current.map(|i| self.list[i].desc)
    }

    /// Matches a response (or error) frame back to a poll entry, checking
    /// the expected size and FCS requirement. Returns the entry description.
    pub fn match_response(&self, frame: &Frame) -> Option<&'static str> {
        let payload = frame.payload();
        let mess_type = frame.mess_type();
        let fcs_ok = frame.verify_fcs().is_ok();
        let item = self.list.iter().find(|item| {
            let addressed = match mess_type {
                t if t == item.res_mess_type && item.kind == PollKind::GetTimingData => {
                    payload.len() >= 3
                        && item.data1 == payload[0]
                        && item.data2 == payload[1]
                        && item.data3 == payload[2]
                },
                t if t == item.res_mess_type || t == item.err_mess_type => {
                    payload.len() >= 2 && item.data1 == payload[0] && item.data2 == payload[1]
                },
                _ => false,
            };
            addressed
        })?;
        if item.returned
            || frame.wire_len() != item.res_size
            || (item.fcs_required && !fcs_ok)
        {
            return None;
        }
        Some(item.desc)
    }

    /// Wire bytes of the current poll request.
    pub fn pack_request(&self, addr: u8) -> Option<Vec<u8>> {
        let item = &self.list[self.current?];
        let mut frame = vec![
            FLAG,
            addr,
            item.control_byte,
            IPI,
            item.mess_type,
            item.data1,
            item.data2,
        ];
        if item.kind == PollKind::GetTimingData {
            frame.push(item.data3);
        }
        append_fcs(&mut frame);
        let mut wire = byte_stuff(&frame);
        wire.push(FLAG);
        Some(wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ab3418::FrameParser;

    #[test]
    fn table_shape_matches_the_controller_memory_map() {
        let polls = Polls::new(5, 500);
        assert_eq!(polls.entries().len(), 102);
        let required = polls.entries().iter().filter(|p| p.required).count();
        assert_eq!(required, 1 + 2 + 8 + 9 + 1 + 4 + 3 + 1);
        let free_plan = polls
            .entries()
            .iter()
            .find(|p| p.desc == "free plan")
            .unwrap();
        assert_eq!((free_plan.data1, free_plan.data2), (4, 10));
        assert_eq!(free_plan.res_size, 28);
    }

    #[test]
    fn walks_only_unreturned_entries() {
        let mut polls = Polls::new(5, 500);
        polls.get_next_poll(true);
        assert_eq!(polls.current_desc(), Some("red revert"));
        polls.set_poll_returned("red revert");
        assert!(polls.move_on());
        polls.get_next_poll(false);
        assert_eq!(polls.current_desc(), Some("phase flags"));
    }

    #[test]
    fn rate_gate_enforces_interval() {
        let mut polls = Polls::new(5, 500);
        polls.get_next_poll(true);
        assert!(polls.should_send(1000));
        assert!(!polls.should_send(1200));
        assert!(polls.should_send(1501));
    }

    #[test]
    fn retry_budget_moves_on() {
        let mut polls = Polls::new(2, 500);
        polls.get_next_poll(true);
        assert!(polls.should_send(500));
        assert!(!polls.move_on());
        assert!(polls.should_send(1000));
        assert!(polls.move_on()); // polled twice without an answer
    }

    #[test]
    fn optional_entries_auto_complete_after_a_pass() {
        let mut polls = Polls::new(5, 500);
        assert!(polls.finish_pass());
        assert!(polls
            .entries()
            .iter()
            .filter(|p| !p.required)
            .all(|p| p.returned));
        assert!(!polls.all_returned());
    }

    #[test]
    fn request_frame_layout() {
        let mut polls = Polls::new(5, 500);
        polls.get_next_poll(true); // red revert, getTimingData
        let wire = polls.pack_request(5).unwrap();
        // flag addr ctrl ipi type msb lsb nbytes fcs fcs flag
        assert_eq!(wire.len(), 11);
        assert_eq!(wire[4], GET_TIMING_DATA);
        assert_eq!(&wire[5..8], &[0x72, 0x00, 1]);
    }

    #[test]
    fn matches_block_response_by_page_and_block() {
        let polls = Polls::new(5, 500);
        // synthesize a phase-flags response: page 2 block 1, 31-byte frame
        let mut frame = vec![FLAG, 5, 0x13, IPI, GET_BLOCK_MSG_RES, 2, 1];
        frame.extend_from_slice(&[0u8; 20]);
        append_fcs(&mut frame);
        let mut wire = byte_stuff(&frame);
        wire.push(FLAG);
        assert_eq!(wire.len(), 31);
        let mut parser = FrameParser::new();
        let mut it = parser.consume(&wire);
        let frame = it.next().unwrap().unwrap();
        assert_eq!(polls.match_response(&frame), Some("phase flags"));
    }

    #[test]
    fn wrong_size_response_is_ignored() {
        let polls = Polls::new(5, 500);
        let mut frame = vec![FLAG, 5, 0x13, IPI, GET_BLOCK_MSG_RES, 2, 1];
        frame.extend_from_slice(&[0u8; 10]);
        append_fcs(&mut frame);
        let mut wire = byte_stuff(&frame);
        wire.push(FLAG);
        let mut parser = FrameParser::new();
        let mut it = parser.consume(&wire);
        let frame = it.next().unwrap().unwrap();
        assert_eq!(polls.match_response(&frame), None);
    }
}
