//! Socket options and peer-disconnect classification.

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

/// Enable TCP keep-alive probes on `stream`, first after `period` of idle
/// time and then every `period`.
#[cfg(unix)]
pub fn set_keepalive(stream: &TcpStream, period: Duration) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();
    let secs = libc::c_int::try_from(period.as_secs().max(1)).unwrap_or(libc::c_int::MAX);

    setsockopt_int(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)?;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, secs)?;
        setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, secs)?;
    }

    #[cfg(target_vendor = "apple")]
    {
        setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPALIVE, secs)?;
        setsockopt_int(fd, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, secs)?;
    }

    let _ = secs;
    Ok(())
}

#[cfg(not(unix))]
pub fn set_keepalive(_stream: &TcpStream, _period: Duration) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn setsockopt_int(
    fd: std::os::fd::RawFd,
    level: libc::c_int,
    optname: libc::c_int,
    val: libc::c_int,
) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            optname,
            &val as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Whether `err` means the peer went away rather than a server fault.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
