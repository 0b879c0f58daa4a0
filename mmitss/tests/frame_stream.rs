//! AB3418 reassembly under realistic serial conditions: fragmentation,
//! noise, stuffing and FCS corruption.

use mmitss::ab3418::{FrameParser, Polls, RAW_SPAT};
use mmitss::bytes::{append_fcs, byte_stuff, byte_unstuff, fcs16, FLAG};
use proptest::prelude::*;

fn wire_frame(mess_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![FLAG, 0x05, 0x13, 0xC0, mess_type];
    frame.extend_from_slice(payload);
    append_fcs(&mut frame);
    let mut wire = byte_stuff(&frame);
    wire.push(FLAG);
    wire
}

#[test]
fn byte_by_byte_feed_recovers_every_frame() {
    let mut stream = Vec::new();
    stream.extend_from_slice(&[0x00, 0x13, 0x7D]); // line noise
    stream.extend_from_slice(&wire_frame(RAW_SPAT, &[0x22; 30]));
    stream.extend_from_slice(&wire_frame(0xC8, &[0x11; 27]));
    stream.extend_from_slice(&[0xAA; 4]);
    stream.extend_from_slice(&wire_frame(0xCD, &[0x33; 60]));

    let mut parser = FrameParser::new();
    let mut collected = Vec::new();
    for &byte in &stream {
        let mut it = parser.consume(&[byte]);
        loop {
            match it.next() {
                Some(Ok(frame)) => collected.push(frame),
                Some(Err(_)) => {},
                None => break,
            }
        }
    }
    let types: Vec<u8> = collected.iter().map(|f| f.mess_type()).collect();
    assert!(types.ends_with(&[RAW_SPAT, 0xC8, 0xCD]));
    for frame in &collected[collected.len() - 3..] {
        assert!(frame.verify_fcs().is_ok());
    }
}

#[test]
fn corrupted_byte_invalidates_only_one_frame() {
    let mut stream = wire_frame(RAW_SPAT, &[0x22; 30]);
    let corrupt_at = stream.len() / 2;
    stream[corrupt_at] ^= 0x5A;
    stream.extend_from_slice(&wire_frame(RAW_SPAT, &[0x44; 30]));

    let mut parser = FrameParser::new();
    let mut it = parser.consume(&stream);
    let mut good = 0;
    loop {
        match it.next() {
            Some(Ok(frame)) => {
                if frame.verify_fcs().is_ok() {
                    good += 1;
                    assert_eq!(frame.payload(), &[0x44; 30]);
                }
            },
            Some(Err(_)) => {},
            None => break,
        }
    }
    assert_eq!(good, 1);
}

#[test]
fn poll_responses_route_through_the_table() {
    let polls = Polls::new(5, 500);
    // coord plan 3 response: page 4 block 3, 36-byte frame
    let mut payload = vec![4u8, 3];
    payload.extend_from_slice(&[0u8; 26]);
    let wire = wire_frame(0xC7, &payload);
    assert_eq!(wire.len(), 36);
    let mut parser = FrameParser::new();
    let mut it = parser.consume(&wire);
    let frame = it.next().unwrap().unwrap();
    assert_eq!(polls.match_response(&frame), Some("coord plan 3"));
}

proptest! {
    #[test]
    fn fcs_detects_single_bit_flips(
        payload in proptest::collection::vec(any::<u8>(), 1..64),
        flip_bit in 0usize..64,
    ) {
        let mut frame = vec![0x05, 0x13, 0xC0, 0xCE];
        frame.extend_from_slice(&payload);
        let fcs = fcs16(&frame);
        let bit = flip_bit % (frame.len() * 8);
        frame[bit / 8] ^= 1 << (bit % 8);
        prop_assert_ne!(fcs16(&frame), fcs);
    }

    #[test]
    fn stuffing_never_leaks_flags(body in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut frame = vec![FLAG];
        frame.extend_from_slice(&body);
        let stuffed = byte_stuff(&frame);
        prop_assert!(!stuffed[1..].contains(&FLAG));
        prop_assert_eq!(byte_unstuff(&stuffed[1..]).unwrap(), body);
    }
}
