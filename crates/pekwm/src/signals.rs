//! Signal-to-event bridging via the self-pipe idiom: handlers do nothing but
//! write a single byte to a pipe whose read end lives in the reactor's
//! `poll`/`select` descriptor set. All real work (reaping children, setting
//! the stop flag) happens synchronously at the top of the next loop
//! iteration, never in signal context.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd;

static SELF_PIPE_WRITE: AtomicI32 = AtomicI32::new(-1);
static SIGCHLD_FLAG: AtomicBool = AtomicBool::new(false);
static SIGHUP_FLAG: AtomicBool = AtomicBool::new(false);
static SIGTERM_FLAG: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigchld(_: libc::c_int) {
    SIGCHLD_FLAG.store(true, Ordering::SeqCst);
    wake();
}

extern "C" fn on_sighup(_: libc::c_int) {
    SIGHUP_FLAG.store(true, Ordering::SeqCst);
    wake();
}

extern "C" fn on_sigterm(_: libc::c_int) {
    SIGTERM_FLAG.store(true, Ordering::SeqCst);
    wake();
}

fn wake() {
    let fd = SELF_PIPE_WRITE.load(Ordering::SeqCst);
    if fd >= 0 {
        // SAFETY: async-signal-safe write(2) on a fd we own; errors (e.g. a
        // full pipe) are harmless since the reader only cares that *some*
        // byte arrived.
        unsafe {
            let byte: u8 = 0;
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

/// Read end of the self-pipe, registered into the reactor's poll set, plus
/// accessors for the flags the handlers set.
pub struct SignalChannel {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl SignalChannel {
    /// Install handlers for `SIGCHLD`, `SIGHUP`, `SIGINT`, `SIGTERM` and
    /// return the channel. Must be called once, before the reactor enters
    /// its main loop.
    pub fn install() -> Result<SignalChannel, String> {
        let (read_fd, write_fd) = unistd::pipe().map_err(|e| format!("failed to create self-pipe: {e}"))?;
        let (read_fd, write_fd) = (
            std::os::fd::IntoRawFd::into_raw_fd(read_fd),
            std::os::fd::IntoRawFd::into_raw_fd(write_fd),
        );
        set_nonblocking(read_fd)?;
        SELF_PIPE_WRITE.store(write_fd, Ordering::SeqCst);

        // SAFETY: installing simple self-pipe handlers before the reactor's
        // main loop starts; no other thread exists yet.
        unsafe {
            let action = |handler: SigHandler| {
                SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty())
            };
            signal::sigaction(Signal::SIGCHLD, &action(SigHandler::Handler(on_sigchld)))
                .map_err(|e| format!("sigaction(SIGCHLD): {e}"))?;
            signal::sigaction(Signal::SIGHUP, &action(SigHandler::Handler(on_sighup)))
                .map_err(|e| format!("sigaction(SIGHUP): {e}"))?;
            signal::sigaction(Signal::SIGINT, &action(SigHandler::Handler(on_sigterm)))
                .map_err(|e| format!("sigaction(SIGINT): {e}"))?;
            signal::sigaction(Signal::SIGTERM, &action(SigHandler::Handler(on_sigterm)))
                .map_err(|e| format!("sigaction(SIGTERM): {e}"))?;
        }

        Ok(SignalChannel { read_fd, write_fd })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Drain every pending wake byte from the pipe. Call once per loop
    /// iteration after the pipe's fd is reported readable.
    pub fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            // SAFETY: `read_fd` is our own nonblocking pipe read end.
            let n = unsafe {
                libc::read(self.read_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if n <= 0 {
                break;
            }
        }
    }

    pub fn take_sigchld(&self) -> bool {
        SIGCHLD_FLAG.swap(false, Ordering::SeqCst)
    }

    pub fn take_sighup(&self) -> bool {
        SIGHUP_FLAG.swap(false, Ordering::SeqCst)
    }

    pub fn take_sigterm(&self) -> bool {
        SIGTERM_FLAG.swap(false, Ordering::SeqCst)
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        SELF_PIPE_WRITE.store(-1, Ordering::SeqCst);
        // SAFETY: fds created by this struct and not shared elsewhere.
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

fn set_nonblocking(fd: RawFd) -> Result<(), String> {
    // SAFETY: `fd` is a freshly created pipe end owned by this process.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err("fcntl(F_GETFL) failed".to_owned());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err("fcntl(F_SETFL) failed".to_owned());
        }
    }
    Ok(())
}

/// Reap every exited child with `waitpid(-1, WNOHANG)`, logging each exit.
/// Called once per loop iteration after [`SignalChannel::take_sigchld`].
pub fn reap_children() {
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::Pid;
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(nix::Error::ECHILD) => break,
            Ok(WaitStatus::Exited(pid, code)) => {
                log::debug!("reaped child {pid} (exit {code})");
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                log::debug!("reaped child {pid} (signal {sig})");
            }
            Ok(_) => continue,
            Err(e) => {
                log::warn!("waitpid failed: {e}");
                break;
            }
        }
    }
}
