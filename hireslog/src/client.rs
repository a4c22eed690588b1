//! Client side of the control sideband: one request/response round trip per
//! call over a connected Unix-domain stream.

use control::{Request, Response, WireGeometry};
use nix::sys::socket::{recvmsg, sendmsg, ControlMessageOwned, MsgFlags};
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use tracing::debug;

use crate::{AttachError, Result};

/// Response buffer. rkyv access needs alignment the plain stack array would
/// not guarantee.
#[repr(C, align(16))]
struct RecvBuf([u8; 1024]);

pub struct ControlClient {
    stream: UnixStream,
}

impl ControlClient {
    pub fn connect<P: AsRef<Path>>(socket_path: P) -> Result<Self> {
        let stream = UnixStream::connect(socket_path.as_ref())?;
        debug!(socket_path = %socket_path.as_ref().display(), "connected to collector sideband");
        Ok(ControlClient { stream })
    }

    /// Acquire the shared region: geometry, calibrated cycle ratio and the
    /// ring memfd.
    pub fn attach(&mut self) -> Result<(WireGeometry, u64, OwnedFd)> {
        let (response, mut fds) = self.round_trip(&Request::Attach)?;
        match response {
            Response::AttachOk {
                geometry,
                cycles_per_us,
            } => {
                if fds.is_empty() {
                    return Err(AttachError::MissingFd);
                }
                Ok((geometry, cycles_per_us, fds.remove(0)))
            }
            Response::Nack { error } => Err(AttachError::Rejected(error)),
            _ => Err(AttachError::UnexpectedResponse("attach")),
        }
    }

    pub fn geometry(&mut self) -> Result<WireGeometry> {
        match self.round_trip(&Request::GetGeometry)?.0 {
            Response::Geometry(geometry) => Ok(geometry),
            Response::Nack { error } => Err(AttachError::Rejected(error)),
            _ => Err(AttachError::UnexpectedResponse("geometry")),
        }
    }

    pub fn cycles_per_us(&mut self) -> Result<u64> {
        match self.round_trip(&Request::GetCyclesPerUs)?.0 {
            Response::CyclesPerUs(ratio) => Ok(ratio),
            Response::Nack { error } => Err(AttachError::Rejected(error)),
            _ => Err(AttachError::UnexpectedResponse("cycles-per-us")),
        }
    }

    /// Ask the collector to reset the ring. The caller must have quiesced
    /// every producer first; the collector cannot verify that.
    pub fn reset(&mut self) -> Result<()> {
        match self.round_trip(&Request::Reset)?.0 {
            Response::ResetDone => Ok(()),
            Response::Nack { error } => Err(AttachError::Rejected(error)),
            _ => Err(AttachError::UnexpectedResponse("reset")),
        }
    }

    fn round_trip(&mut self, request: &Request) -> Result<(Response, Vec<OwnedFd>)> {
        let bytes = control::encode_request(request)?;
        let iov = [IoSlice::new(&bytes)];
        sendmsg::<()>(self.stream.as_raw_fd(), &iov, &[], MsgFlags::empty(), None)?;

        let mut cmsg_buffer = nix::cmsg_space!([RawFd; 1]);
        let mut buf = RecvBuf([0u8; 1024]);
        let mut iov: [IoSliceMut<'_>; 1] = [IoSliceMut::new(&mut buf.0)];
        let msg = recvmsg::<()>(
            self.stream.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            MsgFlags::empty(),
        )?;

        let mut fds = Vec::new();
        for cmsg in msg.cmsgs()? {
            if let ControlMessageOwned::ScmRights(raw_fds) = cmsg {
                fds.extend(
                    raw_fds
                        .into_iter()
                        .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }),
                );
            }
        }

        let data = msg.iovs().next().ok_or(AttachError::ChannelClosed)?;
        if data.is_empty() {
            return Err(AttachError::ChannelClosed);
        }

        let archived = control::decode_response(data)?;
        let response = rkyv::deserialize::<Response, rkyv::rancor::Error>(archived)?;
        Ok((response, fds))
    }
}
