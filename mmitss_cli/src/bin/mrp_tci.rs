//! Controller interface: polls the AB3418 timing card, consumes pushed
//! status frames, runs the phase predictor and writes soft-calls, bridging
//! the serial controller to the UDP fabric.

use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};

use mmitss::ab3418::{
    Frame, FrameParser, LongStatus8e, SignalStatus, Status8e, Polls,
    pack_softcall_request, error_code_name, GET_BLOCK_MSG_ERR, GET_BLOCK_MSG_RES,
    GET_TIMING_DATA_ERR, GET_TIMING_DATA_RES, LONG_STATUS8E, RAW_SPAT, STATUS8E,
};
use mmitss::fanout::{
    self, unpack_header, unpack_softcall, DetectorCounts, HEADER_LEN, MSGID_SOFTCALL,
};
use mmitss::predictor::{ControllerStatus, SpatOutcome};
use mmitss::timecard::TimingCard;
use mmitss_cli::{cli, config::Config, date_stamp, local_day, ms_of_day, msec_now, net, sig};

/// Wire pacing
const SOFTCALL_INTERVAL_MS: u64 = 20;
const POLL_INTERVAL_MS: u64 = 500;
const MAX_POLLS_PER_REQUEST: u32 = 5;

/// Pending soft-call bits, refreshed against the live phase states.
#[derive(Debug, Default)]
struct SoftcallState {
    msec: u64,
    ped_call: u8,
    veh_call: u8,
    veh_ext: u8,
    prio_call: u8,
    prio_ext: u8,
}

impl SoftcallState {
    fn any(&self) -> bool {
        (self.ped_call | self.veh_call | self.veh_ext | self.prio_call | self.prio_ext) != 0
    }

    fn apply(&mut self, request: &fanout::SoftcallRequest) {
        use fanout::{SoftCallObj, SoftCallType};
        match request.call_type {
            SoftCallType::Cancel => match request.obj {
                SoftCallObj::Vehicle => self.veh_ext &= !request.phases,
                SoftCallObj::Priority => {
                    self.prio_call &= !request.phases;
                    self.prio_ext &= !request.phases;
                },
                SoftCallObj::Ped => {},
            },
            SoftCallType::Call => match request.obj {
                SoftCallObj::Ped => self.ped_call |= request.phases,
                SoftCallObj::Vehicle => self.veh_call |= request.phases,
                SoftCallObj::Priority => self.prio_call |= request.phases,
            },
            SoftCallType::Extension => match request.obj {
                SoftCallObj::Vehicle => self.veh_ext |= request.phases,
                SoftCallObj::Priority => self.prio_ext |= request.phases,
                SoftCallObj::Ped => {},
            },
        }
    }

    /// Calls persist while the phase is red, extensions while it is green.
    fn refresh(&mut self, status: &ControllerStatus) {
        for i in 0..8u8 {
            let in_green = status.phase_status[usize::from(i)].state.is_green();
            let bit = 1 << i;
            if in_green {
                self.veh_call &= !bit;
                self.prio_call &= !bit;
            } else {
                self.veh_ext &= !bit;
                self.prio_ext &= !bit;
            }
        }
    }
}

fn open_serial(device: &str, baud: u32) -> Result<Box<dyn serialport::SerialPort>> {
    serialport::new(device, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .timeout(Duration::from_millis(1))
        .open()
        .with_context(|| format!("failed to open serial port {device}"))
}

fn read_port(
    port: &mut Box<dyn serialport::SerialPort>,
    parser: &mut FrameParser,
    scratch: &mut [u8],
) -> Vec<Frame> {
    let mut frames = Vec::new();
    loop {
        match port.read(scratch) {
            Ok(0) => break,
            Ok(n) => {
                let mut it = parser.consume(&scratch[..n]);
                loop {
                    match it.next() {
                        Some(Ok(frame)) => frames.push(frame),
                        Some(Err(e)) => warn!("dropping frame: {e}"),
                        None => break,
                    }
                }
                if n < scratch.len() {
                    break;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                error!("serial read error: {e}");
                break;
            },
        }
    }
    frames
}

fn rotate_card_file(path: &std::path::Path) {
    if path.exists() {
        let rotated = path.with_extension(format!("timecard.{}", date_stamp()));
        if let Err(e) = std::fs::rename(path, &rotated) {
            warn!("failed to rotate timing card: {e}");
        }
    }
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    cli::init_logging(args.verbose);
    sig::install();
    let config = Config::load(&args.config)?;

    let baud = config.integer_or("baudRate", 38400) as u32;
    let mut port_spat = open_serial(config.string("spatPort")?, baud)?;
    let mut port_spat2 = open_serial(config.string("spat2Port")?, baud)?;
    let card_path = config.path("timeCardPath")?.join(format!("{}.timecard", args.name));

    let (send_socket, mgr_addr) = net::sender(config.string("mgrSocket")?)?;
    let recv_socket = net::bind(config.string_or("tciSocket", "127.0.0.1:15050"))?;

    let mut spat_parser = FrameParser::new();
    let mut spat2_parser = FrameParser::new();
    let mut scratch = [0u8; 512];
    let mut recv_buf = [0u8; 2048];

    let mut card = TimingCard::default();
    let mut polls = Polls::new(MAX_POLLS_PER_REQUEST, POLL_INTERVAL_MS);
    polls.get_next_poll(true);
    let mut poll_time_card = true;
    let mut controller_status = ControllerStatus::default();
    let mut softcall = SoftcallState::default();
    let mut status8e = Status8e::default();
    let mut msg_cnt: u8 = 0;
    let mut poll_day = local_day();
    info!("{}: polling controller timing card", args.name);

    loop {
        let signum = sig::pending();
        if signum != 0 {
            info!("received signal {signum}, draining");
            std::process::exit(sig::exit_code(signum));
        }
        let msec = msec_now();

        // the poll cycle reruns daily at local midnight
        let today = local_day();
        if today != poll_day {
            poll_day = today;
            info!("midnight: repolling the controller");
            card = TimingCard::default();
            polls.reset_poll_return();
            polls.get_next_poll(true);
            poll_time_card = true;
            controller_status.is_plan_timing_ready = false;
        }

        // port A: listen-only raw SPaT stream
        let mut fresh_spat: Option<SignalStatus> = None;
        for frame in read_port(&mut port_spat, &mut spat_parser, &mut scratch) {
            if frame.mess_type() == RAW_SPAT && frame.verify_fcs().is_ok() {
                match SignalStatus::parse(&frame) {
                    Ok(status) => fresh_spat = Some(status),
                    Err(e) => warn!("bad rawSPaT frame: {e}"),
                }
            }
        }

        // port B: poll responses plus pushed detector status
        for frame in read_port(&mut port_spat2, &mut spat2_parser, &mut scratch) {
            match frame.mess_type() {
                STATUS8E => match Status8e::parse(&frame) {
                    Ok(status) => {
                        status8e = status;
                        let mut buf = Vec::with_capacity(32);
                        fanout::pack_detector_presence(
                            &mut buf,
                            status.detector_presence,
                            ms_of_day(),
                        );
                        net::send_to(&send_socket, mgr_addr, &buf);
                    },
                    Err(e) => warn!("bad status8e frame: {e}"),
                },
                LONG_STATUS8E => match LongStatus8e::parse(&frame) {
                    Ok(status) => {
                        let counts = DetectorCounts {
                            seq_num: status.seq_num,
                            volume: status.volume,
                            occupancy: status.occupancy,
                        };
                        let mut buf = Vec::with_capacity(64);
                        fanout::pack_detector_counts(&mut buf, &counts, ms_of_day());
                        net::send_to(&send_socket, mgr_addr, &buf);
                    },
                    Err(e) => warn!("bad longStatus8e frame: {e}"),
                },
                GET_BLOCK_MSG_RES | GET_TIMING_DATA_RES => {
                    if let Some(desc) = polls.match_response(&frame) {
                        match card.update_from_poll(desc, frame.payload()) {
                            Ok(()) => polls.set_poll_returned(desc),
                            Err(e) => warn!("poll {desc}: {e}"),
                        }
                    }
                },
                GET_BLOCK_MSG_ERR | GET_TIMING_DATA_ERR => {
                    let err_num = frame.payload().get(2).copied().unwrap_or(0xFF);
                    warn!(
                        "controller rejected poll {}: {}",
                        polls.current_desc().unwrap_or("unknown"),
                        error_code_name(err_num)
                    );
                },
                other => warn!("unexpected message type 0x{other:02x} on port B"),
            }
        }

        // walk the poll table
        if poll_time_card {
            if polls.move_on() {
                polls.get_next_poll(false);
            }
            if polls.at_end() {
                if polls.all_returned() {
                    info!("finished polling controller");
                    card.set_free_plan_parameters();
                    if let Err(e) = card.set_coord_plan_parameters() {
                        error!("plan derivation failed: {e}");
                    }
                    card.set_initiated();
                    rotate_card_file(&card_path);
                    if let Err(e) = std::fs::write(&card_path, card.to_text()) {
                        warn!("failed to write timing card: {e}");
                    }
                    poll_time_card = false;
                } else if !polls.finish_pass() {
                    // too many passes: fall back to the on-disk card
                    warn!("reached maximum polling cycles, reading timing card file");
                    poll_time_card = false;
                    if !card.is_initiated() {
                        let text = std::fs::read_to_string(&card_path)
                            .context("poll fallback needs the timing card file")?;
                        card = TimingCard::from_text(&text)
                            .context("failed to parse the timing card file")?;
                    }
                } else {
                    polls.get_next_poll(true);
                }
            }
            if let Some(spat) = &fresh_spat {
                // controller address discovered from the first inbound SPaT
                controller_status.controller_addr = spat.controller_addr;
            }
            if controller_status.controller_addr != 0 && polls.should_send(msec) {
                if let Some(wire) = polls.pack_request(controller_status.controller_addr) {
                    if let Err(e) = std::io::Write::write_all(&mut port_spat2, &wire) {
                        error!("failed to write poll: {e}");
                    }
                }
            }
        }

        // feed the predictor and publish controller status
        if !poll_time_card {
            if let Some(spat) = fresh_spat {
                let outcome = if controller_status.is_plan_timing_ready {
                    controller_status.on_new_spat(&card, &spat, msec)
                } else {
                    controller_status.initialize(&card, &spat, status8e.status, msec)
                };
                match outcome {
                    SpatOutcome::Updated => {
                        softcall.refresh(&controller_status);
                        msg_cnt = (msg_cnt + 1) % 127;
                        let record = fanout::controller_state_record(
                            &controller_status,
                            mmitss_cli::minute_of_year(),
                            mmitss_cli::ms_of_minute(),
                        );
                        let mut buf = Vec::with_capacity(160);
                        fanout::pack_controller_state(&mut buf, &record, ms_of_day(), msg_cnt);
                        net::send_to(&send_socket, mgr_addr, &buf);
                    },
                    SpatOutcome::PlanUnknown => {
                        warn!("pattern references an unpolled plan, repolling plans");
                        card.reset_plans();
                        polls.reset_plan_polls();
                        polls.get_next_poll(true);
                        poll_time_card = true;
                    },
                }
            }
        }

        // soft-call requests from the awareness process
        while let Some(n) = net::recv_from(&recv_socket, &mut recv_buf) {
            let Ok(header) = unpack_header(&recv_buf[..n]) else {
                continue;
            };
            if header.msgid == MSGID_SOFTCALL {
                match unpack_softcall(&recv_buf[HEADER_LEN..n]) {
                    Ok(request) => softcall.apply(&request),
                    Err(e) => warn!("bad softcall request: {e}"),
                }
            }
        }

        // write soft-calls under the 20 ms pace; ped bits are one-shot
        if softcall.any() && msec > softcall.msec + SOFTCALL_INTERVAL_MS {
            let mut veh = 0u8;
            let mut prio = 0u8;
            for i in 0..8u8 {
                let bit = 1 << i;
                let in_green = controller_status.phase_status[usize::from(i)].state.is_green();
                if softcall.veh_call & bit != 0 && !in_green {
                    veh |= bit;
                }
                if softcall.veh_ext & bit != 0 && in_green {
                    veh |= bit;
                }
                if softcall.prio_call & bit != 0 && !in_green {
                    prio |= bit;
                }
                if softcall.prio_ext & bit != 0 && in_green {
                    prio |= bit;
                }
            }
            let ped = softcall.ped_call;
            if veh | ped | prio != 0 {
                let wire = pack_softcall_request(
                    controller_status.controller_addr,
                    veh,
                    ped,
                    prio,
                );
                match std::io::Write::write_all(&mut port_spat2, &wire) {
                    Ok(()) => {
                        softcall.ped_call = 0;
                        softcall.msec = msec;
                    },
                    Err(e) => error!("failed to write soft-call: {e}"),
                }
            }
        }

        std::thread::sleep(Duration::from_millis(5));
    }
}
