//! Awareness process: locates connected vehicles on the intersection map,
//! decides phase calls, extensions and priority grants, and assembles SSMs.

use std::io::Write as _;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn};

use mmitss::fanout::{
    self, unpack_controller_state, unpack_header, ControllerStateRecord, HEADER_LEN, MSGID_BSM,
    MSGID_CNTRLSTATUS, MSGID_PSRM, MSGID_SRM, MSGID_SSM,
};
use mmitss::j2735::{Bsm, Srm};
use mmitss::map::MapDb;
use mmitss::priority::{AwareConfig, AwareEngine, AwareOutput};
use mmitss_cli::{cli, config::Config, ms_of_day, msec_now, net, sig};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    cli::init_logging(args.verbose);
    sig::install();
    let config = Config::load(&args.config)?;

    let map = MapDb::load(&config.path("nmapFile")?)?;
    let intersection = map
        .intersection_by_name(&args.name)
        .ok_or_else(|| anyhow!("intersection {} not in the nmap", args.name))?;
    let intersection_id = intersection.id;
    let intersection_index = map
        .intersections()
        .iter()
        .position(|i| i.id == intersection_id)
        .expect("listed above");

    let aware_config = AwareConfig {
        dsrc_timeout: config.integer_or("dsrcTimeout", 2000) as u64,
        max_green_extension: config.integer_or("maxGreenExtension", 100) as u16,
        max_time2change_phase_ext: config.integer_or("maxTime2change4Ext", 40) as u16,
        ..AwareConfig::default()
    };
    let mut engine = AwareEngine::new(aware_config, intersection_id, intersection_index);

    let recv_socket = net::bind(config.string("awareSocket")?)?;
    let (send_socket, mgr_addr) = net::sender(config.string("mgrSocket")?)?;

    // per-vehicle awareness rows for the offline performance analysis
    let mut aware_log = config
        .string("logPath")
        .ok()
        .map(|dir| {
            let path = std::path::Path::new(dir).join(format!("{}.aware.log", args.name));
            std::fs::OpenOptions::new().create(true).append(true).open(path)
        })
        .transpose()
        .context("failed to open the awareness log")?;

    let mut recv_buf = [0u8; 4096];
    let mut cntrl = ControllerStateRecord::default();
    info!("{}: awareness engine started", args.name);

    loop {
        let signum = sig::pending();
        if signum != 0 {
            info!("received signal {signum}, draining");
            if let Some(log) = aware_log.as_mut() {
                let _ = log.flush();
            }
            std::process::exit(sig::exit_code(signum));
        }
        let msec = msec_now();
        let mut outputs = Vec::new();

        while let Some(n) = net::recv_from(&recv_socket, &mut recv_buf) {
            let Ok(header) = unpack_header(&recv_buf[..n]) else {
                continue;
            };
            let body = &recv_buf[HEADER_LEN..n];
            match header.msgid {
                MSGID_BSM => match Bsm::decode(body) {
                    Ok(bsm) => {
                        if let Some(output) = engine.on_bsm(&bsm, &map, msec) {
                            outputs.push(output);
                        }
                        if let (Some(log), Some(track)) = (aware_log.as_mut(), engine.vehicle(bsm.id))
                        {
                            if let Some(cv) = track.trail.last() {
                                let _ = writeln!(
                                    log,
                                    "{msec} {} {} {} {:.1} {:.2}",
                                    cv.id,
                                    cv.location.lane_id,
                                    cv.location.control_phase,
                                    cv.location.dist_long,
                                    cv.motion.speed,
                                );
                            }
                        }
                    },
                    Err(e) => {
                        warn!("failed to decode BSM: {e}, payload {}", hex_dump(body));
                    },
                },
                MSGID_SRM => match Srm::decode(body) {
                    Ok(srm) => engine.on_srm(&srm, &map, &cntrl, msec),
                    Err(e) => {
                        warn!("failed to decode SRM: {e}, payload {}", hex_dump(body));
                    },
                },
                MSGID_PSRM => match Srm::decode(body) {
                    Ok(psrm) => {
                        if let Some(output) = engine.on_psrm(&psrm, &map, &cntrl, msec) {
                            outputs.push(output);
                        }
                    },
                    Err(e) => {
                        warn!("failed to decode PSRM: {e}, payload {}", hex_dump(body));
                    },
                },
                MSGID_CNTRLSTATUS => match unpack_controller_state(body) {
                    Ok(record) => {
                        cntrl = record;
                        engine.on_controller_state(&cntrl);
                    },
                    Err(e) => warn!("bad controller status record: {e}"),
                },
                other => warn!("unrouted msgid 0x{other:02x}"),
            }
        }

        outputs.extend(engine.tick(&cntrl, msec));
        for output in outputs {
            match output {
                AwareOutput::SoftCall(request) => {
                    let mut buf = Vec::with_capacity(HEADER_LEN + 3);
                    fanout::pack_softcall(&mut buf, &request, ms_of_day());
                    net::send_to(&send_socket, mgr_addr, &buf);
                },
                AwareOutput::Trajectory(traj) => {
                    let mut buf = Vec::with_capacity(HEADER_LEN + 16);
                    fanout::pack_trajectory(&mut buf, &traj, ms_of_day());
                    net::send_to(&send_socket, mgr_addr, &buf);
                },
                AwareOutput::Ssm(ssm) => {
                    let mut payload = [0u8; 512];
                    match ssm.encode(&mut payload) {
                        Ok(used) => {
                            let mut buf = Vec::with_capacity(HEADER_LEN + used);
                            fanout::pack_payload(&mut buf, MSGID_SSM, &payload[..used], ms_of_day());
                            net::send_to(&send_socket, mgr_addr, &buf);
                        },
                        Err(e) => warn!("SSM encode failed: {e}"),
                    }
                },
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn hex_dump(payload: &[u8]) -> String {
    payload
        .iter()
        .take(64)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}
