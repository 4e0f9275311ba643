//! Thin wrapper over a udev monitor socket watching the `drm` subsystem,
//! used to notice monitor hotplug/unplug events without polling XRandR.

use std::os::unix::io::{AsRawFd, RawFd};

pub struct MonitorWatch {
    socket: udev::MonitorSocket,
}

impl MonitorWatch {
    pub fn open() -> Result<MonitorWatch, String> {
        let socket = udev::MonitorBuilder::new()
            .map_err(|e| format!("failed to create udev monitor: {e}"))?
            .match_subsystem("drm")
            .map_err(|e| format!("failed to filter udev monitor: {e}"))?
            .listen()
            .map_err(|e| format!("failed to listen on udev monitor: {e}"))?;
        Ok(MonitorWatch { socket })
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Drain exactly one event (there may be several coalesced together;
    /// the caller re-polls the fd if more are pending). Returns whether a
    /// device event was actually received, mirroring the original
    /// implementation's gating of load/auto-configure on a genuine event.
    pub fn consume_one(&mut self) -> bool {
        let mut iter = self.socket.iter();
        iter.next().is_some()
    }
}
