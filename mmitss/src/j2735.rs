//! UPER codec for the five SAE J2735 (201601) message types the roadside
//! processor exchanges: BSM, MapData, SPaT, SRM and SSM.
//!
//! Each message module exposes a plain record type with `encode`/`decode`
//! methods. Both directions are pure and allocation-bounded: `encode` writes
//! into a caller-provided buffer and returns the bytes used, `decode` consumes
//! a payload slice and leaves no trailing bytes unaccounted.

mod bsm;
mod map_data;
mod spat;
mod srm;
mod ssm;
mod types;

pub use bsm::*;
pub use map_data::*;
pub use spat::*;
pub use srm::*;
pub use ssm::*;
pub use types::*;

use crate::error::CodecError;
use crate::per::BitReader;

pub(crate) fn reader_done(reader: &BitReader<'_>, total: usize) -> Result<usize, CodecError> {
    let consumed = reader.bytes_consumed();
    if consumed > total {
        return Err(CodecError::DecodeMissingMandatory { field: "payload" });
    }
    Ok(consumed)
}
