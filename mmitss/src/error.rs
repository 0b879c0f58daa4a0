use core::fmt;

/// Cause of a PER-level decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerCause {
    /// Ran past the end of the payload
    OutOfData,
    /// A length determinant exceeded what the payload can hold
    BadLength,
    /// A constrained value fell outside its PER range
    ValueOutOfRange,
    /// An extension addition could not be skipped
    BadExtension,
}

impl fmt::Display for PerCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerCause::OutOfData => f.write_str("out of data"),
            PerCause::BadLength => f.write_str("bad length determinant"),
            PerCause::ValueOutOfRange => f.write_str("value out of range"),
            PerCause::BadExtension => f.write_str("unskippable extension"),
        }
    }
}

/// Error that is possible during J2735 payload encoding/decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The output buffer cannot hold the encoded payload
    EncodeBufferTooSmall,
    /// A record field violates its documented range
    EncodeInvariantViolation {
        field: &'static str,
    },
    /// Bit-level PER failure at `offset` (in bits from payload start)
    DecodePerError {
        offset: usize,
        cause: PerCause,
    },
    /// A mandatory field was absent from the payload
    DecodeMissingMandatory {
        field: &'static str,
    },
    DecodeUnexpectedValue {
        field: &'static str,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::EncodeBufferTooSmall => f.write_str("encode buffer too small"),
            CodecError::EncodeInvariantViolation { field } => {
                write!(f, "invalid value for field {field}")
            },
            CodecError::DecodePerError { offset, cause } => {
                write!(f, "PER error at bit {offset}: {cause}")
            },
            CodecError::DecodeMissingMandatory { field } => {
                write!(f, "missing mandatory field {field}")
            },
            CodecError::DecodeUnexpectedValue { field } => {
                write!(f, "unexpected value for field {field}")
            },
        }
    }
}

impl std::error::Error for CodecError {}

/// Error that is possible during AB3418 frame reassembly and parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Unpaired escape byte, or a span that cannot be a frame
    MalformedFrame,
    /// Frame shorter than the 7-byte minimum
    FrameTooShort {
        got: usize,
    },
    InvalidFcs {
        expect: u16,
        got: u16,
    },
    /// Response size does not match the poll table entry
    InvalidFrameLen {
        mess_type: u8,
        expect: usize,
        got: usize,
    },
    UnknownMessType {
        mess_type: u8,
    },
    /// Returned when the reassembly buffer cannot store the frame
    OutOfMemory {
        required_size: usize,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::MalformedFrame => f.write_str("malformed frame"),
            FrameError::FrameTooShort { got } => write!(f, "frame too short, got {got} bytes"),
            FrameError::InvalidFcs { expect, got } => {
                write!(f, "not valid frame FCS, expect 0x{expect:04x}, got 0x{got:04x}")
            },
            FrameError::InvalidFrameLen {
                mess_type,
                expect,
                got,
            } => write!(
                f,
                "invalid frame (type 0x{mess_type:02x}) length, expect {expect}, got {got}"
            ),
            FrameError::UnknownMessType { mess_type } => {
                write!(f, "unknown message type 0x{mess_type:02x}")
            },
            FrameError::OutOfMemory { required_size } => write!(
                f,
                "insufficient reassembly buffer size, required {required_size} bytes"
            ),
        }
    }
}

impl std::error::Error for FrameError {}

/// Error raised while loading or querying the intersection map
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    Io(String),
    /// nmap file syntax error with the offending line number
    Syntax {
        line: usize,
        what: String,
    },
    /// Referenced lane/approach/intersection does not exist
    UnknownId {
        intersection: u16,
        lane: u8,
    },
    /// Map loaded but geometry failed a sanity check
    Geometry(String),
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::Io(e) => write!(f, "nmap i/o error: {e}"),
            MapError::Syntax { line, what } => write!(f, "nmap syntax error at line {line}: {what}"),
            MapError::UnknownId { intersection, lane } => {
                write!(f, "unknown lane {lane} at intersection {intersection}")
            },
            MapError::Geometry(e) => write!(f, "map geometry error: {e}"),
        }
    }
}

impl std::error::Error for MapError {}

/// Error raised while reading or deriving the controller timing card
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardError {
    Io(String),
    /// Timing-card file syntax error
    Syntax {
        line: usize,
        what: String,
    },
    /// A poll response did not match any timing-card slot
    UnknownPoll {
        desc: String,
    },
    /// Plan derivation failed (e.g. no sync phase on a coordinated plan)
    Derivation {
        plan_num: u8,
        what: String,
    },
}

impl fmt::Display for CardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardError::Io(e) => write!(f, "timing card i/o error: {e}"),
            CardError::Syntax { line, what } => {
                write!(f, "timing card syntax error at line {line}: {what}")
            },
            CardError::UnknownPoll { desc } => write!(f, "unmatched poll response: {desc}"),
            CardError::Derivation { plan_num, what } => {
                write!(f, "plan {plan_num} derivation failed: {what}")
            },
        }
    }
}

impl std::error::Error for CardError {}
