use libc::{close, pipe2, read, write, O_CLOEXEC, O_NONBLOCK};
use std::io;
use std::os::fd::RawFd;

pub(crate) fn sys_read(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe { read(fd, buffer.as_mut_ptr() as *mut _, buffer.len()) }
}

pub(crate) fn sys_write(fd: RawFd, buffer: &[u8]) -> isize {
    unsafe { write(fd, buffer.as_ptr() as *const _, buffer.len()) }
}

pub(crate) fn sys_close(fd: RawFd) {
    unsafe { close(fd) };
}

/// Creates a non-blocking, close-on-exec pipe and returns
/// `(read_end, write_end)`.
pub(crate) fn sys_pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];

    let rc = unsafe { pipe2(fds.as_mut_ptr(), O_NONBLOCK | O_CLOEXEC) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok((fds[0], fds[1]))
}
