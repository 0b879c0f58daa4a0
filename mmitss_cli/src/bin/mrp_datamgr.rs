//! Data manager: the UDP hub between the radio stack, the controller
//! interface and the awareness process. Broadcasts MAP on a timer, turns
//! controller status into SPaT, and relays BSM/SRM/SSM/soft-call traffic.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn};

use mmitss::fanout::{
    self, unpack_controller_state, unpack_header, HEADER_LEN, MSGID_BSM, MSGID_CNTRLSTATUS,
    MSGID_DET_CNT, MSGID_DET_PRES, MSGID_MAP, MSGID_PSRM, MSGID_SOFTCALL, MSGID_SPAT, MSGID_SRM,
    MSGID_SSM, MSGID_TRAJ, SavariHeader,
};
use mmitss::map::MapDb;
use mmitss_cli::{cli, config::Config, ms_of_day, msec_now, net, sig};

const MAP_INTERVAL_MS: u64 = 1000;

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
    let map_payload = map
        .map_payload(intersection_id)
        .context("intersection has no MAP payload")?
        .to_vec();
    info!(
        "{}: intersection {intersection_id}, MAP payload {} bytes",
        args.name,
        map_payload.len()
    );

    // wired peers
    let recv_socket = net::bind(config.string("mgrSocket")?)?;
    let (send_socket, aware_addr) = net::sender(config.string("awareSocket")?)?;
    let tci_addr = net::peer(config.string_or("tciSocket", "127.0.0.1:15050"))?;
    let radio_addr = net::peer(config.string("radioSocket")?)?;
    let cloud_addr = config.string("cloudSocket").ok().map(net::peer).transpose()?;

    let mut recv_buf = [0u8; 4096];
    let mut map_msec: u64 = 0;
    let mut spat_msg_cnt: u8 = 0;

    loop {
        let signum = sig::pending();
        if signum != 0 {
            info!("received signal {signum}, draining");
            std::process::exit(sig::exit_code(signum));
        }
        let msec = msec_now();

        // periodic MAP broadcast to the radios and the pedestrian cloud
        if msec > map_msec + MAP_INTERVAL_MS {
            map_msec = msec;
            let mut buf = Vec::with_capacity(map_payload.len() + HEADER_LEN);
            fanout::pack_payload(&mut buf, MSGID_MAP, &map_payload, ms_of_day());
            net::send_to(&send_socket, radio_addr, &buf);
            if let Some(cloud) = cloud_addr {
                let mut framed = Vec::with_capacity(map_payload.len() + 16);
                fanout::pack_savari_header(
                    &mut framed,
                    &SavariHeader {
                        msg_type: MSGID_MAP,
                        intersection_id,
                        seconds: (msec / 1000) as u32,
                        msecs: (msec % 1000) as u16,
                        length: map_payload.len() as u32,
                    },
                );
                framed.extend_from_slice(&map_payload);
                net::send_to(&send_socket, cloud, &framed);
            }
        }

        while let Some(n) = net::recv_from(&recv_socket, &mut recv_buf) {
            let Ok(header) = unpack_header(&recv_buf[..n]) else {
                warn!("dropping datagram with a bad header");
                continue;
            };
            let body = &recv_buf[HEADER_LEN..n];
            match header.msgid {
                // vehicle-to-intersection traffic goes to the awareness engine
                MSGID_BSM | MSGID_SRM | MSGID_PSRM => {
                    net::send_to(&send_socket, aware_addr, &recv_buf[..n]);
                },
                // controller status fans out to aware and becomes SPaT
                MSGID_CNTRLSTATUS => {
                    net::send_to(&send_socket, aware_addr, &recv_buf[..n]);
                    match unpack_controller_state(body) {
                        Ok(record) => {
                            spat_msg_cnt = (spat_msg_cnt + 1) % 128;
                            let spat = fanout::spat_from_controller_state(
                                &record,
                                intersection_id,
                                spat_msg_cnt,
                            );
                            let mut payload = [0u8; 256];
                            match spat.encode(&mut payload) {
                                Ok(used) => {
                                    let mut buf = Vec::with_capacity(used + HEADER_LEN);
                                    fanout::pack_payload(
                                        &mut buf,
                                        MSGID_SPAT,
                                        &payload[..used],
                                        ms_of_day(),
                                    );
                                    net::send_to(&send_socket, radio_addr, &buf);
                                },
                                Err(e) => warn!("SPaT encode failed: {e}"),
                            }
                        },
                        Err(e) => warn!("bad controller status record: {e}"),
                    }
                },
                // awareness outputs
                MSGID_SOFTCALL => net::send_to(&send_socket, tci_addr, &recv_buf[..n]),
                MSGID_SSM => net::send_to(&send_socket, radio_addr, &recv_buf[..n]),
                MSGID_TRAJ | MSGID_DET_CNT | MSGID_DET_PRES => {
                    // performance records are retained by the observer side
                },
                other => warn!("unrouted msgid 0x{other:02x}"),
            }
        }

        std::thread::sleep(Duration::from_millis(5));
    }
}
