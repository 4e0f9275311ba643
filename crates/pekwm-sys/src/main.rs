//! `pekwm_sys`: the system-services daemon that keeps time-of-day,
//! XSETTINGS and the XRandR monitor layout in sync for the pekwm suite.
//!
//! A single-threaded cooperative reactor: every iteration drains pending
//! signals, fires any due timeout, then blocks in `poll(2)` on the X11
//! connection, the self-pipe, stdin and (if available) a udev monitor
//! socket. Ordering within one iteration is always timeouts, then X events,
//! then stdin — so a flood of commands on stdin can never starve a pending
//! day/night transition.

mod location;
mod monitor_watch;

use std::cell::RefCell;
use std::os::fd::{BorrowedFd, RawFd};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use pekwm::config::{self, LoggingConfig};
use pekwm::daytime::{Daytime, TimeOfDay};
use pekwm::entry::Entry;
use pekwm::expander::{EnvExpander, X11AtomExpander, X11ResourceExpander};
use pekwm::logging;
use pekwm::monitors::{MonitorsConfig, MonitorsStore};
use pekwm::parser::{CfgParser, ParserOptions};
use pekwm::signals::{self, SignalChannel};
use pekwm::sysconfig::Sys;
use pekwm::timeouts::{TimeoutAction, Timeouts};
use pekwm::x11::X11;
use pekwm::xsettings::XSettings;

use location::{GeoPosition, LocationService, NullLocationService};
use monitor_watch::MonitorWatch;

const TIMEOUT_DAY_CHANGED: i64 = 1;

#[derive(Parser)]
#[command(
    name = "pekwm_sys",
    about = "pekwm system services: time-of-day, XSETTINGS, XRandR monitors"
)]
struct Cli {
    /// Path to the configuration file, default ~/.pekwm/config.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// X display to connect to, default from $DISPLAY.
    #[arg(short = 'd', long = "display")]
    display: Option<String>,

    /// Log to a file instead of (or in addition to) stdout.
    #[arg(short = 'f', long = "log-file")]
    log_file: Option<PathBuf>,

    /// error, warn, info, debug or trace.
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    log_level: String,

    /// Theme config to load XResources from at startup.
    #[arg(short = 't', long = "theme")]
    theme: Option<PathBuf>,

    /// Read line-oriented commands from stdin instead of length-prefixed
    /// framing (used by `pekwm_ctrl`-style tooling).
    #[arg(short = 'i', long = "interactive")]
    interactive: bool,
}

fn parse_log_level(s: &str) -> log::LevelFilter {
    match s.to_ascii_lowercase().as_str() {
        "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "debug" => log::LevelFilter::Debug,
        "trace" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn main() {
    let cli = Cli::parse();

    let logging_conf = LoggingConfig {
        log_to_stdout: true,
        log_file: cli.log_file.clone(),
        level: parse_log_level(&cli.log_level),
    };
    if let Err(e) = logging::setup_logging(&logging_conf) {
        eprintln!("pekwm_sys: {e}");
    }

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_file);

    let x11 = match X11::connect(cli.display.as_deref()) {
        Ok(x11) => Rc::new(RefCell::new(x11)),
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };

    let mut reactor = match Reactor::new(x11, config_path, cli.theme, cli.interactive) {
        Ok(r) => r,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };

    let code = reactor.run();
    std::process::exit(code);
}

/// Parse `path` with every expander the configuration spine supports:
/// environment variables, `$@atom` root-window properties and `$&resource`
/// resource-manager lookups. The X11 queries these need are read-only and
/// idempotent against the server, so the closures simply borrow the
/// reactor's own connection handle rather than opening a second one.
fn parse_config(path: &std::path::Path, x11: &Rc<RefCell<X11>>) -> Entry {
    let root_window = x11.borrow().root();

    let mut parser = CfgParser::new(ParserOptions::default());
    parser.add_expander(Box::new(EnvExpander));

    let atom_x11 = Rc::clone(x11);
    parser.add_expander(Box::new(X11AtomExpander::new(move |name: &str| {
        atom_x11.borrow_mut().get_string_property(root_window, name)
    })));

    let resource_x11 = Rc::clone(x11);
    parser.add_expander(Box::new(X11ResourceExpander::new(
        move |name: &str| resource_x11.borrow_mut().resource_manager().get(name).cloned(),
        false,
    )));

    if !parser.parse_file(path, false) {
        log::warn!("{path:?}: parse completed with errors, using partial tree");
    }
    parser.root().clone()
}

/// Pull the flat `XResources { ... }` section (if any) out of a theme
/// config file — distinct from `Sys { XResources { Day { ... } } }`'s
/// per-time-of-day layout, since a theme only ever contributes one fixed
/// set of resources, layered underneath whatever the active time-of-day
/// overrides.
fn load_theme_resources(
    path: &std::path::Path,
    x11: &Rc<RefCell<X11>>,
) -> std::collections::HashMap<String, String> {
    let root = parse_config(path, x11);
    let mut out = std::collections::HashMap::new();
    if let Some(section) = root.find_entry("XResources") {
        for entry in section.entries() {
            out.insert(entry.name.clone(), entry.value.clone());
        }
    }
    out
}

/// Parse `#RRGGBB` or `#RRGGBBAA` into 16-bit-per-channel XSETTINGS color
/// components (each byte replicated into the high and low halves).
fn parse_color(raw: &str) -> Option<(u16, u16, u16, u16)> {
    let hex = raw.strip_prefix('#')?;
    let byte = |s: &str| u8::from_str_radix(s, 16).ok().map(|b| (b as u16) << 8 | b as u16);
    match hex.len() {
        6 => Some((byte(&hex[0..2])?, byte(&hex[2..4])?, byte(&hex[4..6])?, 0xffff)),
        8 => Some((byte(&hex[0..2])?, byte(&hex[2..4])?, byte(&hex[4..6])?, byte(&hex[6..8])?)),
        _ => None,
    }
}

fn set_stdin_nonblocking() {
    // SAFETY: fd 0 is our own stdin; setting O_NONBLOCK only affects reads
    // from this process.
    unsafe {
        let flags = libc::fcntl(0, libc::F_GETFL, 0);
        if flags >= 0 {
            libc::fcntl(0, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }
    }
}

struct Reactor {
    x11: Rc<RefCell<X11>>,
    config_path: PathBuf,
    sys: Sys,
    xsettings: XSettings,
    theme_resources: std::collections::HashMap<String, String>,
    monitors: MonitorsStore,
    timeouts: Timeouts,
    signals: SignalChannel,
    monitor_watch: Option<MonitorWatch>,
    location: Box<dyn LocationService>,
    position: Option<GeoPosition>,
    daytime: Option<Daytime>,
    current_tod: TimeOfDay,
    interactive: bool,
    stop: bool,
    exit_code: i32,
    stdin_buf: Vec<u8>,
}

impl Reactor {
    fn new(
        x11: Rc<RefCell<X11>>,
        config_path: PathBuf,
        theme: Option<PathBuf>,
        interactive: bool,
    ) -> Result<Reactor, String> {
        let root = parse_config(&config_path, &x11);
        let sys = Sys::load(&root);

        let screen_num = x11.borrow().screen_num;
        let mut xsettings = XSettings::new(screen_num);
        if let Err(e) = xsettings.load(&sys.xsettings_path) {
            log::debug!("{}: {e}", sys.xsettings_path.display());
        }

        let mut monitors = MonitorsStore::new();
        if let Err(e) = monitors.load(&sys.monitors_path) {
            log::debug!("{}: {e}", sys.monitors_path.display());
        }

        let signals = SignalChannel::install()?;

        let monitor_watch = match MonitorWatch::open() {
            Ok(w) => Some(w),
            Err(e) => {
                log::warn!("monitor hotplug watch unavailable: {e}");
                None
            }
        };

        let theme_resources = theme
            .map(|path| load_theme_resources(&path, &x11))
            .unwrap_or_default();

        let mut reactor = Reactor {
            x11,
            config_path,
            sys,
            xsettings,
            theme_resources,
            monitors,
            timeouts: Timeouts::new(),
            signals,
            monitor_watch,
            location: Box::new(NullLocationService),
            position: None,
            daytime: None,
            current_tod: TimeOfDay::Day,
            interactive,
            stop: false,
            exit_code: 0,
            stdin_buf: Vec::new(),
        };

        reactor.startup();
        Ok(reactor)
    }

    fn startup(&mut self) {
        self.refresh_position();
        self.refresh_daytime(unix_now());

        let tod = self.compute_time_of_day(unix_now());
        self.apply_time_of_day_transition(tod, true);
        self.schedule_next_daytime_wake();

        if self.sys.xsettings {
            match self.xsettings.set_server_owner(&mut self.x11.borrow_mut()) {
                Ok(true) => {
                    let _ = self.xsettings.update_server(&mut self.x11.borrow_mut());
                }
                Ok(false) => log::info!("XSETTINGS selection already owned, will retry on its death"),
                Err(e) => log::warn!("failed to acquire XSETTINGS selection: {e}"),
            }
        }

        if self.sys.monitor_auto_configure {
            if let Err(e) = self.monitors.auto_config(&mut self.x11.borrow_mut()) {
                log::warn!("monitor auto-configure failed: {e}");
            }
        }
    }

    fn refresh_position(&mut self) {
        self.position = if self.sys.location_lookup {
            self.location.lookup().or_else(|| self.position_from_config())
        } else {
            self.position_from_config()
        };
    }

    fn position_from_config(&self) -> Option<GeoPosition> {
        if self.sys.latitude.is_nan() || self.sys.longitude.is_nan() {
            None
        } else {
            Some(GeoPosition {
                latitude: self.sys.latitude,
                longitude: self.sys.longitude,
            })
        }
    }

    fn refresh_daytime(&mut self, now: i64) {
        self.daytime = self
            .position
            .map(|pos| Daytime::new(now, pos.latitude, pos.longitude, 0.0));
    }

    fn compute_time_of_day(&self, now: i64) -> TimeOfDay {
        if let Some(ov) = self.sys.time_of_day_override() {
            return ov;
        }
        match &self.daytime {
            Some(d) => d.time_of_day(now),
            None => TimeOfDay::Day,
        }
    }

    /// Recompute the next daytime boundary and arm the `day-changed` timeout
    /// for it, bounded by the next calendar midnight so Daytime is
    /// periodically re-derived even across multi-day idle stretches.
    fn schedule_next_daytime_wake(&mut self) {
        let Some(daytime) = &self.daytime else { return };
        let now = unix_now();
        let end = daytime.time_of_day_end(now);
        let midnight = ((now / 86400) + 1) * 86400;
        let target = end.min(midnight).max(now + 1);
        let wait = Duration::from_secs((target - now) as u64);
        self.timeouts
            .replace(TimeoutAction::new(TIMEOUT_DAY_CHANGED, std::time::Instant::now() + wait));
    }

    /// The side effects of entering a new `TimeOfDay`: theme variant
    /// property, RESOURCE_MANAGER merge, XSETTINGS theme name and the
    /// configured `DaytimeCommands`. A no-op unless `tod` actually differs
    /// from the current one, unless `force` is set (startup, Reload, and
    /// every config-touching stdin command force it).
    fn apply_time_of_day_transition(&mut self, tod: TimeOfDay, force: bool) {
        if !force && tod == self.current_tod {
            return;
        }
        self.current_tod = tod;
        log::info!("time of day: {tod}");

        let variant = match tod {
            TimeOfDay::Day | TimeOfDay::Dawn => "light",
            TimeOfDay::Dusk | TimeOfDay::Night => "dark",
        };

        {
            let mut x11 = self.x11.borrow_mut();
            let root = x11.root();
            if let Err(e) = x11.set_string_property(root, "_PEKWM_THEME_VARIANT", variant) {
                log::warn!("failed to set _PEKWM_THEME_VARIANT: {e}");
            }

            if let Err(e) = x11.grab_server() {
                log::warn!("failed to grab server for resource update: {e}");
            } else {
                let mut resources = x11.resource_manager();
                resources.extend(self.theme_resources.clone());
                if let Some(tod_resources) = self.sys.resources_for(tod) {
                    resources.extend(tod_resources.clone());
                }
                resources.insert("pekwm.daylight".to_owned(), variant.to_owned());
                resources.insert("pekwm.theme.variant".to_owned(), variant.to_owned());
                if let Some(pos) = self.position {
                    resources.insert("pekwm.location.latitude".to_owned(), pos.latitude.to_string());
                    resources.insert("pekwm.location.longitude".to_owned(), pos.longitude.to_string());
                }
                if !self.sys.dpi.is_nan() {
                    resources.insert("Xft.dpi".to_owned(), self.sys.dpi.to_string());
                }

                if let Err(e) = x11.set_resource_manager(&resources) {
                    log::warn!("failed to write RESOURCE_MANAGER: {e}");
                }
                if let Err(e) = x11.ungrab_server(true) {
                    log::warn!("failed to ungrab server: {e}");
                }
            }
        }

        if self.sys.xsettings && !self.sys.net_theme.is_empty() {
            let _ = self.xsettings.set_string("Net/ThemeName", self.sys.net_theme.clone());
            let _ = self.xsettings.update_server(&mut self.x11.borrow_mut());
        }

        for command in self.sys.daytime_commands.clone() {
            self.spawn_command(&command, tod);
        }
    }

    fn spawn_command(&self, command: &str, tod: TimeOfDay) {
        let result = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .env("PEKWM_SYS_TIMEOFDAY", tod.to_string())
            .spawn();
        if let Err(e) = result {
            log::warn!("failed to run {command:?}: {e}");
        }
    }

    fn reload(&mut self) {
        log::info!("reloading {}", self.config_path.display());
        let root = parse_config(&self.config_path, &self.x11);
        let new_sys = Sys::load(&root);

        if new_sys.xsettings != self.sys.xsettings {
            if new_sys.xsettings {
                match self.xsettings.set_server_owner(&mut self.x11.borrow_mut()) {
                    Ok(true) => {}
                    Ok(false) => log::info!("XSETTINGS selection already owned, will retry on its death"),
                    Err(e) => log::warn!("failed to acquire XSETTINGS selection: {e}"),
                }
            } else {
                let selection = format!("_XSETTINGS_S{}", self.x11.borrow().screen_num);
                if let Err(e) = self.x11.borrow_mut().release_selection(&selection) {
                    log::warn!("failed to release XSETTINGS selection: {e}");
                }
            }
        }

        self.sys = new_sys;
        self.refresh_position();
        self.refresh_daytime(unix_now());
        let tod = self.compute_time_of_day(unix_now());
        self.apply_time_of_day_transition(tod, true);
        self.schedule_next_daytime_wake();
    }

    fn handle_timeout(&mut self, key: i64) {
        if key != TIMEOUT_DAY_CHANGED {
            return;
        }
        self.refresh_daytime(unix_now());
        let tod = self.compute_time_of_day(unix_now());
        self.apply_time_of_day_transition(tod, false);
        self.schedule_next_daytime_wake();
    }

    fn handle_monitor_change(&mut self) {
        let Some(watch) = &mut self.monitor_watch else { return };
        if !watch.consume_one() {
            return;
        }

        if self.sys.monitor_load_on_change && self.find_and_apply_monitor_layout() {
            return;
        }
        if self.sys.monitor_auto_configure {
            if let Err(e) = self.monitors.auto_config(&mut self.x11.borrow_mut()) {
                log::warn!("monitor auto-configure failed: {e}");
            }
        }
    }

    /// Capture the live monitor id, find a saved layout matching it and
    /// apply it. Returns whether a matching layout was found (regardless of
    /// whether `apply` itself succeeded) — the shared sequence behind both
    /// `MonLoad` and the udev-driven `MonitorLoadOnChange` path, per
    /// `monLoad()`'s `config.load(path) && config.find(monitors) &&
    /// config.apply(monitors)`.
    fn find_and_apply_monitor_layout(&mut self) -> bool {
        let id = MonitorsConfig::capture(&mut self.x11.borrow_mut()).id;
        let Some(cfg) = self.monitors.find(&id).cloned() else {
            return false;
        };
        if let Err(e) = self.monitors.apply(&cfg, &mut self.x11.borrow_mut()) {
            log::warn!("failed to apply monitor layout {id}: {e}");
        }
        true
    }

    fn handle_x_event(&mut self, event: x11rb::protocol::Event) {
        use x11rb::protocol::Event;
        match event {
            Event::SelectionClear(_) => {
                if let Err(e) = self.xsettings.on_selection_clear(&mut self.x11.borrow_mut()) {
                    log::warn!("failed to handle SelectionClear: {e}");
                }
            }
            Event::DestroyNotify(_) => match self.xsettings.try_reclaim(&mut self.x11.borrow_mut()) {
                Ok(true) => {
                    let _ = self.xsettings.update_server(&mut self.x11.borrow_mut());
                }
                Ok(false) => {}
                Err(e) => log::warn!("failed to reclaim XSETTINGS selection: {e}"),
            },
            _ => {}
        }
    }

    fn drain_x_events(&mut self) {
        loop {
            let event = match self.x11.borrow_mut().poll_event() {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(e) => {
                    log::error!("X11 connection error: {e}");
                    self.stop = true;
                    self.exit_code = 1;
                    break;
                }
            };
            self.handle_x_event(event);
        }
    }

    /// Execute one already-split command line, verbs per the stdin command
    /// protocol (`Exit`, `Reload`, `Theme`, `TimeOfDay`, `Dpi`, `MonLoad`,
    /// `MonSave`, `XSet`, `XSetInt`, `XSetColor`, `XSave`).
    fn execute_command(&mut self, line: &str) {
        let Some(argv) = shlex::split(line) else {
            log::warn!("failed to split command: {line:?}");
            return;
        };
        let Some(verb) = argv.first() else { return };

        match verb.as_str() {
            "Exit" => {
                self.stop = true;
                self.exit_code = 0;
            }
            "Reload" => self.reload(),
            "Theme" => match argv.get(1) {
                Some(path) => {
                    self.theme_resources = load_theme_resources(std::path::Path::new(path), &self.x11);
                    let tod = self.current_tod;
                    self.apply_time_of_day_transition(tod, true);
                }
                None => log::warn!("Theme command requires a path argument"),
            },
            "TimeOfDay" => match argv.get(1) {
                Some(arg) => {
                    self.sys.time_of_day = match arg.as_str() {
                        s if s.eq_ignore_ascii_case("Auto") => "Auto".to_owned(),
                        s if s.eq_ignore_ascii_case("Toggle") => match self.current_tod {
                            TimeOfDay::Day | TimeOfDay::Dawn => TimeOfDay::Night.to_string(),
                            TimeOfDay::Night | TimeOfDay::Dusk => TimeOfDay::Day.to_string(),
                        },
                        s if s.eq_ignore_ascii_case("Next") => match self.current_tod {
                            TimeOfDay::Night => TimeOfDay::Dawn.to_string(),
                            TimeOfDay::Dawn => TimeOfDay::Day.to_string(),
                            TimeOfDay::Day => TimeOfDay::Dusk.to_string(),
                            TimeOfDay::Dusk => TimeOfDay::Night.to_string(),
                        },
                        s => s.to_owned(),
                    };
                    let tod = self.compute_time_of_day(unix_now());
                    self.apply_time_of_day_transition(tod, true);
                }
                None => log::warn!("TimeOfDay command requires an argument"),
            },
            "Dpi" => match argv.get(1).and_then(|v| v.parse::<f64>().ok()) {
                Some(dpi) if dpi > 0.0 => {
                    self.sys.dpi = dpi;
                    let tod = self.current_tod;
                    self.apply_time_of_day_transition(tod, true);
                }
                Some(dpi) => log::warn!("Set Dpi {dpi} must be greater than 0.0"),
                None => log::warn!("Dpi command requires a numeric argument"),
            },
            "MonLoad" => {
                if let Err(e) = self.monitors.load(&self.sys.monitors_path) {
                    log::warn!("MonLoad: {e}");
                    return;
                }
                self.find_and_apply_monitor_layout();
            }
            "MonSave" => {
                let cfg = MonitorsConfig::capture(&mut self.x11.borrow_mut());
                self.monitors.upsert(cfg);
                if let Err(e) = self.monitors.save(&self.sys.monitors_path) {
                    log::warn!("MonSave: {e}");
                }
            }
            "XSet" => match (argv.get(1), argv.get(2)) {
                (Some(name), Some(value)) => {
                    if let Err(e) = self.xsettings.set_string(name, value.clone()) {
                        log::warn!("XSet {name}: {e}");
                    } else {
                        let _ = self.xsettings.update_server(&mut self.x11.borrow_mut());
                    }
                }
                _ => log::warn!("XSet requires a name and a string value"),
            },
            "XSetInt" => match (argv.get(1), argv.get(2).and_then(|v| v.parse::<i32>().ok())) {
                (Some(name), Some(value)) => {
                    if let Err(e) = self.xsettings.set_int(name, value) {
                        log::warn!("XSetInt {name}: {e}");
                    } else {
                        let _ = self.xsettings.update_server(&mut self.x11.borrow_mut());
                    }
                }
                _ => log::warn!("XSetInt requires a name and an integer value"),
            },
            "XSetColor" => match (argv.get(1), argv.get(2).map(|v| parse_color(v))) {
                (Some(name), Some(Some((r, g, b, a)))) => {
                    if let Err(e) = self.xsettings.set_color(name, r, g, b, a) {
                        log::warn!("XSetColor {name}: {e}");
                    } else {
                        let _ = self.xsettings.update_server(&mut self.x11.borrow_mut());
                    }
                }
                _ => log::warn!("XSetColor requires a name and a #RRGGBB[AA] value"),
            },
            "XSave" => {
                if let Err(e) = self.xsettings.save(&self.sys.xsettings_path) {
                    log::warn!("XSave: {e}");
                }
            }
            other => log::warn!("unknown command {other:?}"),
        }
    }

    /// Drain every complete command currently buffered from stdin: a
    /// newline-terminated line in interactive mode, or a 4-byte
    /// little-endian length prefix followed by that many bytes otherwise.
    fn drain_stdin_commands(&mut self) {
        let mut chunk = [0u8; 4096];
        loop {
            // SAFETY: fd 0 is our own stdin, set nonblocking at startup.
            let n = unsafe { libc::read(0, chunk.as_mut_ptr() as *mut libc::c_void, chunk.len()) };
            if n <= 0 {
                break;
            }
            self.stdin_buf.extend_from_slice(&chunk[..n as usize]);
        }

        loop {
            let command = if self.interactive {
                let Some(pos) = self.stdin_buf.iter().position(|&b| b == b'\n') else {
                    break;
                };
                let line: Vec<u8> = self.stdin_buf.drain(..=pos).collect();
                String::from_utf8_lossy(&line[..line.len() - 1]).into_owned()
            } else {
                if self.stdin_buf.len() < 4 {
                    break;
                }
                let len = u32::from_le_bytes(self.stdin_buf[0..4].try_into().unwrap()) as usize;
                if self.stdin_buf.len() < 4 + len {
                    break;
                }
                let frame: Vec<u8> = self.stdin_buf.drain(..4 + len).collect();
                String::from_utf8_lossy(&frame[4..]).into_owned()
            };
            self.execute_command(command.trim());
        }
    }

    fn run(&mut self) -> i32 {
        set_stdin_nonblocking();

        while !self.stop {
            if self.signals.take_sigterm() {
                self.stop = true;
                self.exit_code = 0;
                break;
            }
            if self.signals.take_sigchld() {
                signals::reap_children();
            }
            if self.signals.take_sighup() {
                self.reload();
            }

            let (wait, action) = self.timeouts.get_next_timeout();
            if let Some(action) = action {
                self.handle_timeout(action.key);
                continue;
            }

            let x11_fd = self.x11.borrow().file_descriptor();
            let signal_fd = self.signals.read_fd();
            let udev_fd = self.monitor_watch.as_ref().map(|w| w.fd());

            // SAFETY: all three/four fds are owned for at least the
            // duration of this call and outlive the `fds` slice below.
            let x11_borrow = unsafe { BorrowedFd::borrow_raw(x11_fd) };
            let signal_borrow = unsafe { BorrowedFd::borrow_raw(signal_fd) };
            let stdin_borrow = unsafe { BorrowedFd::borrow_raw(0 as RawFd) };
            let udev_borrow = udev_fd.map(|fd| unsafe { BorrowedFd::borrow_raw(fd) });

            let mut fds = vec![
                PollFd::new(x11_borrow, PollFlags::POLLIN),
                PollFd::new(signal_borrow, PollFlags::POLLIN),
                PollFd::new(stdin_borrow, PollFlags::POLLIN),
            ];
            if let Some(udev_borrow) = udev_borrow {
                fds.push(PollFd::new(udev_borrow, PollFlags::POLLIN));
            }

            let timeout = match wait {
                Some(d) => {
                    let ms = d.as_millis().min(i32::MAX as u128) as i32;
                    PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX)
                }
                None => PollTimeout::NONE,
            };

            if let Err(e) = poll(&mut fds, timeout) {
                if e != nix::errno::Errno::EINTR {
                    log::warn!("poll failed: {e}");
                }
                continue;
            }

            self.signals.drain();
            self.drain_x_events();

            let udev_ready = fds
                .get(3)
                .and_then(|f| f.revents())
                .map(|r| r.contains(PollFlags::POLLIN))
                .unwrap_or(false);
            if udev_ready {
                self.handle_monitor_change();
            }

            let stdin_ready = fds[2]
                .revents()
                .map(|r| r.contains(PollFlags::POLLIN))
                .unwrap_or(false);
            if stdin_ready {
                self.drain_stdin_commands();
            }
        }

        self.exit_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_color_without_alpha_defaults_to_opaque() {
        let (r, g, b, a) = parse_color("#ff0080").unwrap();
        assert_eq!(r, 0xffff);
        assert_eq!(g, 0x0000);
        assert_eq!(b, 0x8080);
        assert_eq!(a, 0xffff);
    }

    #[test]
    fn parse_color_with_alpha() {
        let (_, _, _, a) = parse_color("#00000080").unwrap();
        assert_eq!(a, 0x8080);
    }

    #[test]
    fn parse_color_rejects_missing_hash() {
        assert!(parse_color("ff0080").is_none());
    }

    #[test]
    fn parse_log_level_defaults_to_info_for_unknown() {
        assert_eq!(parse_log_level("nonsense"), log::LevelFilter::Info);
        assert_eq!(parse_log_level("DEBUG"), log::LevelFilter::Debug);
    }
}
