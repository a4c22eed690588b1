//! Wire types for the control sideband.
//!
//! The sideband is a request/response channel with no streaming semantics:
//! one archived [`Request`] per message, one archived [`Response`] back. The
//! request code set and payload shapes are the contract; the transport (a
//! Unix-domain stream socket in this workspace) is not.
//!
//! `Attach` is the only request with out-of-band payload: the responder
//! passes the ring's memory file descriptor alongside the `AttachOk` bytes.

use rkyv::rancor::Error as CodecError;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

/// Ring geometry as carried on the wire. Mirrors the ring header's
/// write-once metadata; attaching peers validate the mapped header against
/// it.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct WireGeometry {
    pub capacity: u64,
    pub idx_mask: u64,
    pub shm_size_unaligned: u64,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum Request {
    /// Acquire the shared region: the response carries geometry, the
    /// calibrated cycle ratio and the ring memfd via `SCM_RIGHTS`.
    Attach,
    /// Geometry only. Idempotent; same record for the life of the ring.
    GetGeometry,
    /// Calibrated cycles-per-microsecond. Nacked if calibration has not
    /// completed.
    GetCyclesPerUs,
    /// Zero head/tail/dropped and clear every VALID bit. The caller must
    /// have quiesced all producers.
    Reset,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[rkyv(compare(PartialEq))]
pub enum Response {
    AttachOk {
        geometry: WireGeometry,
        cycles_per_us: u64,
    },
    Geometry(WireGeometry),
    CyclesPerUs(u64),
    ResetDone,
    Nack {
        error: String,
    },
}

pub fn encode_request(request: &Request) -> Result<AlignedVec, CodecError> {
    rkyv::to_bytes::<CodecError>(request)
}

pub fn encode_response(response: &Response) -> Result<AlignedVec, CodecError> {
    rkyv::to_bytes::<CodecError>(response)
}

pub fn decode_request(bytes: &[u8]) -> Result<&ArchivedRequest, CodecError> {
    rkyv::access::<ArchivedRequest, CodecError>(bytes)
}

pub fn decode_response(bytes: &[u8]) -> Result<&ArchivedResponse, CodecError> {
    rkyv::access::<ArchivedResponse, CodecError>(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case(Request::Attach)]
    #[case(Request::GetGeometry)]
    #[case(Request::GetCyclesPerUs)]
    #[case(Request::Reset)]
    fn request_round_trip(#[case] request: Request) {
        let bytes = encode_request(&request).unwrap();
        let archived = decode_request(&bytes).unwrap();
        let decoded: Request = rkyv::deserialize::<Request, CodecError>(archived).unwrap();
        assert_eq!(decoded, request);
    }

    #[rstest]
    fn response_round_trip() {
        let responses = [
            Response::AttachOk {
                geometry: WireGeometry {
                    capacity: 1 << 16,
                    idx_mask: (1 << 16) - 1,
                    shm_size_unaligned: 192 + (1 << 16) * 40,
                },
                cycles_per_us: 2400,
            },
            Response::Geometry(WireGeometry {
                capacity: 4,
                idx_mask: 3,
                shm_size_unaligned: 352,
            }),
            Response::CyclesPerUs(3000),
            Response::ResetDone,
            Response::Nack {
                error: "calibration unavailable".to_string(),
            },
        ];

        for response in &responses {
            let bytes = encode_response(response).unwrap();
            let archived = decode_response(&bytes).unwrap();
            let decoded: Response =
                rkyv::deserialize::<Response, CodecError>(archived).unwrap();
            assert_eq!(&decoded, response);
        }
    }

    #[rstest]
    fn truncated_response_is_rejected() {
        let bytes = encode_response(&Response::CyclesPerUs(1)).unwrap();
        assert!(decode_response(&bytes[..bytes.len() - 1]).is_err());
    }
}
