//! Sideband server: accepts connections on the collector's socket and
//! answers control requests. Attach responses carry the ring memfd via
//! `SCM_RIGHTS`.

use control::{ArchivedRequest, Response, WireGeometry};
use eventring::Ring;
use nix::sys::socket::{recv, sendmsg, ControlMessage, MsgFlags};
use std::io::IoSlice;
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::thread;
use tracing::{debug, warn};

use crate::Result;

#[repr(C, align(16))]
struct RecvBuf([u8; 1024]);

pub(crate) fn serve(listener: UnixListener, ring: Ring, cycles_per_us: u64) {
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                debug!("sideband client connected");
                let ring = ring.clone();
                let spawned = thread::Builder::new()
                    .name("hireslog-sideband".to_string())
                    .spawn(move || {
                        if let Err(e) = handle_connection(stream, ring, cycles_per_us) {
                            warn!(error = %e, "sideband connection failed");
                        }
                    });
                if let Err(e) = spawned {
                    warn!(error = %e, "failed to spawn sideband handler");
                }
            }
            Err(e) => {
                warn!(error = %e, "sideband accept failed");
                continue;
            }
        }
    }
}

fn wire_geometry(ring: &Ring) -> WireGeometry {
    let geometry = ring.geometry();
    WireGeometry {
        capacity: geometry.capacity,
        idx_mask: geometry.idx_mask,
        shm_size_unaligned: geometry.shm_size_unaligned,
    }
}

fn handle_connection(stream: UnixStream, ring: Ring, cycles_per_us: u64) -> Result<()> {
    let mut buf = RecvBuf([0u8; 1024]);

    loop {
        let bytes_read = recv(stream.as_raw_fd(), &mut buf.0, MsgFlags::empty())?;
        if bytes_read == 0 {
            debug!("sideband client disconnected");
            return Ok(());
        }

        match control::decode_request(&buf.0[..bytes_read])? {
            ArchivedRequest::Attach => {
                debug!("sideband attach request");
                let fd = ring.clone_fd()?;
                let response = Response::AttachOk {
                    geometry: wire_geometry(&ring),
                    cycles_per_us,
                };
                let bytes = control::encode_response(&response)?;
                let iov = [IoSlice::new(&bytes)];
                let fds = [fd.as_raw_fd()];
                let cmsg = ControlMessage::ScmRights(&fds);
                sendmsg::<()>(
                    stream.as_raw_fd(),
                    &iov,
                    &[cmsg],
                    MsgFlags::empty(),
                    None,
                )?;
            }
            ArchivedRequest::GetGeometry => {
                debug!("sideband geometry request");
                send_response(&stream, &Response::Geometry(wire_geometry(&ring)))?;
            }
            ArchivedRequest::GetCyclesPerUs => {
                debug!("sideband cycles-per-us request");
                send_response(&stream, &Response::CyclesPerUs(cycles_per_us))?;
            }
            ArchivedRequest::Reset => {
                // Producers must be quiesced by the caller; nothing here can
                // check that.
                debug!("sideband reset request");
                ring.reset();
                send_response(&stream, &Response::ResetDone)?;
            }
        }
    }
}

fn send_response(stream: &UnixStream, response: &Response) -> Result<()> {
    let bytes = control::encode_response(response)?;
    let iov = [IoSlice::new(&bytes)];
    sendmsg::<()>(stream.as_raw_fd(), &iov, &[], MsgFlags::empty(), None)?;
    Ok(())
}
