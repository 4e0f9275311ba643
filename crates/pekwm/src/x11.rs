//! Thin collaborator over `x11rb`: atom interning, root window string
//! properties, selection ownership, `MANAGER` announcements, and XRandR
//! resource queries. Everything above this module (`expander`, `xsettings`,
//! `monitors`) talks to X11 only through here, so none of it needs to know
//! about wire-level protocol details.

use std::collections::HashMap;

use md5::Digest;
use x11rb::connection::Connection;
use x11rb::protocol::randr::ConnectionExt as _;
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ClientMessageData, ClientMessageEvent, ConnectionExt as _,
    EventMask, PropMode, Screen, Window,
};
use x11rb::rust_connection::RustConnection;

pub struct X11 {
    pub conn: RustConnection,
    pub screen_num: usize,
    atom_cache: HashMap<String, u32>,
}

impl X11 {
    pub fn connect(display: Option<&str>) -> Result<X11, String> {
        let (conn, screen_num) = x11rb::connect(display)
            .map_err(|e| format!("failed to open X display: {e}"))?;
        Ok(X11 {
            conn,
            screen_num,
            atom_cache: HashMap::new(),
        })
    }

    pub fn screen(&self) -> &Screen {
        &self.conn.setup().roots[self.screen_num]
    }

    pub fn root(&self) -> Window {
        self.screen().root
    }

    /// Intern (and cache) an atom by name.
    pub fn atom(&mut self, name: &str) -> Result<u32, String> {
        if let Some(&atom) = self.atom_cache.get(name) {
            return Ok(atom);
        }
        let atom = self
            .conn
            .intern_atom(false, name.as_bytes())
            .map_err(|e| e.to_string())?
            .reply()
            .map_err(|e| e.to_string())?
            .atom;
        self.atom_cache.insert(name.to_owned(), atom);
        Ok(atom)
    }

    /// Read a `STRING`/`UTF8_STRING` property on `window` as a UTF-8 string,
    /// lossily. Used by the `$@atom` expander to read root-window
    /// properties.
    pub fn get_string_property(&mut self, window: Window, name: &str) -> Option<String> {
        let atom = self.atom(name).ok()?;
        let reply = self
            .conn
            .get_property(false, window, atom, AtomEnum::ANY, 0, u32::MAX)
            .ok()?
            .reply()
            .ok()?;
        if reply.value.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&reply.value).into_owned())
    }

    pub fn set_string_property(&mut self, window: Window, name: &str, value: &str) -> Result<(), String> {
        let atom = self.atom(name).map_err(|e| e.to_string())?;
        self.conn
            .change_property8(
                PropMode::REPLACE,
                window,
                atom,
                AtomEnum::STRING,
                value.as_bytes(),
            )
            .map_err(|e| e.to_string())?;
        self.conn.flush().map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Read the raw bytes of an arbitrary-type property, used for the
    /// XSETTINGS wire blob and `RESOURCE_MANAGER`.
    pub fn get_property_bytes(&mut self, window: Window, name: &str) -> Option<Vec<u8>> {
        let atom = self.atom(name).ok()?;
        let reply = self
            .conn
            .get_property(false, window, atom, AtomEnum::ANY, 0, u32::MAX)
            .ok()?
            .reply()
            .ok()?;
        Some(reply.value)
    }

    pub fn set_property_bytes(
        &mut self,
        window: Window,
        name: &str,
        type_name: &str,
        data: &[u8],
    ) -> Result<(), String> {
        let name_atom = self.atom(name).map_err(|e| e.to_string())?;
        let type_atom = self.atom(type_name).map_err(|e| e.to_string())?;
        self.conn
            .change_property8(PropMode::REPLACE, window, name_atom, type_atom, data)
            .map_err(|e| e.to_string())?;
        self.conn.flush().map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Try to become the owner of `_XSETTINGS_S<screen>`. Returns the
    /// previous owner window if someone else already holds it (so the
    /// caller can watch it for `StructureNotify` to retry later), or `None`
    /// if ownership was acquired.
    pub fn acquire_selection(
        &mut self,
        selection_name: &str,
        control_window: Window,
    ) -> Result<Option<Window>, String> {
        let selection = self.atom(selection_name).map_err(|e| e.to_string())?;
        let current = self
            .conn
            .get_selection_owner(selection)
            .map_err(|e| e.to_string())?
            .reply()
            .map_err(|e| e.to_string())?
            .owner;

        if current != x11rb::NONE && current != control_window {
            self.conn
                .change_window_attributes(
                    current,
                    &ChangeWindowAttributesAux::new().event_mask(EventMask::STRUCTURE_NOTIFY),
                )
                .map_err(|e| e.to_string())?;
            return Ok(Some(current));
        }

        self.conn
            .set_selection_owner(control_window, selection, x11rb::CURRENT_TIME)
            .map_err(|e| e.to_string())?;

        let verify = self
            .conn
            .get_selection_owner(selection)
            .map_err(|e| e.to_string())?
            .reply()
            .map_err(|e| e.to_string())?
            .owner;
        if verify != control_window {
            return Err(format!("failed to acquire selection {selection_name}"));
        }

        self.announce_manager(selection, control_window)?;
        Ok(None)
    }

    fn announce_manager(&mut self, selection: u32, control_window: Window) -> Result<(), String> {
        let manager_atom = self.atom("MANAGER").map_err(|e| e.to_string())?;
        let event = ClientMessageEvent {
            response_type: x11rb::protocol::xproto::CLIENT_MESSAGE_EVENT,
            format: 32,
            sequence: 0,
            window: self.root(),
            type_: manager_atom,
            data: ClientMessageData::from([
                x11rb::CURRENT_TIME,
                selection,
                control_window,
                0,
                0,
            ]),
        };
        self.conn
            .send_event(false, self.root(), EventMask::STRUCTURE_NOTIFY, event)
            .map_err(|e| e.to_string())?;
        self.conn.flush().map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn release_selection(&mut self, selection_name: &str) -> Result<(), String> {
        let selection = self.atom(selection_name).map_err(|e| e.to_string())?;
        self.conn
            .set_selection_owner(x11rb::NONE, selection, x11rb::CURRENT_TIME)
            .map_err(|e| e.to_string())?;
        self.conn.flush().map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Re-select `StructureNotify` on whatever now owns `selection_name`,
    /// called after a `SelectionClear` to track the new owner's death.
    pub fn watch_new_owner(&mut self, selection_name: &str) -> Result<(), String> {
        let selection = self.atom(selection_name).map_err(|e| e.to_string())?;
        let owner = self
            .conn
            .get_selection_owner(selection)
            .map_err(|e| e.to_string())?
            .reply()
            .map_err(|e| e.to_string())?
            .owner;
        if owner != x11rb::NONE {
            self.conn
                .change_window_attributes(
                    owner,
                    &ChangeWindowAttributesAux::new().event_mask(EventMask::STRUCTURE_NOTIFY),
                )
                .map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    pub fn create_input_only_window(&mut self) -> Result<Window, String> {
        let win = self.conn.generate_id().map_err(|e| e.to_string())?;
        self.conn
            .create_window(
                x11rb::COPY_DEPTH_FROM_PARENT,
                win,
                self.root(),
                -1,
                -1,
                1,
                1,
                0,
                x11rb::protocol::xproto::WindowClass::INPUT_ONLY,
                x11rb::protocol::xproto::COPY_FROM_PARENT,
                &Default::default(),
            )
            .map_err(|e| e.to_string())?;
        self.conn.flush().map_err(|e| e.to_string())?;
        Ok(win)
    }

    /// Grab the server for the duration of a read-then-write sequence on a
    /// root property (selection takeover, resource manager update).
    pub fn grab_server(&mut self) -> Result<(), String> {
        self.conn.grab_server().map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn ungrab_server(&mut self, sync: bool) -> Result<(), String> {
        self.conn.ungrab_server().map_err(|e| e.to_string())?;
        if sync {
            self.conn.sync().map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    /// Current XRandR screen resources: `(output_name, mode_name, refresh,
    /// edid_md5)` for every connected output, plus the screen's pixel and
    /// millimetre dimensions.
    pub fn randr_outputs(&mut self) -> Result<RandrSnapshot, String> {
        let root = self.root();
        let resources = self
            .conn
            .randr_get_screen_resources_current(root)
            .map_err(|e| e.to_string())?
            .reply()
            .map_err(|e| e.to_string())?;

        let mut outputs = Vec::new();
        for &output in &resources.outputs {
            let info = self
                .conn
                .randr_get_output_info(output, resources.config_timestamp)
                .map_err(|e| e.to_string())?
                .reply()
                .map_err(|e| e.to_string())?;
            if info.connection != x11rb::protocol::randr::Connection::CONNECTED {
                continue;
            }
            let name = String::from_utf8_lossy(&info.name).into_owned();
            let edid_md5 = self.output_edid_md5(output).unwrap_or_default();

            let mode = info
                .modes
                .first()
                .and_then(|&id| resources.modes.iter().find(|m| m.id == id));
            let mode_name = mode
                .map(|m| String::from_utf8_lossy(&m.name).into_owned())
                .unwrap_or_default();
            let refresh = mode.map(mode_refresh_rate).unwrap_or(0.0);

            let (x, y, rotation) = if info.crtc != 0 {
                match self.conn.randr_get_crtc_info(info.crtc, resources.config_timestamp) {
                    Ok(cookie) => match cookie.reply() {
                        Ok(crtc_info) => (crtc_info.x, crtc_info.y, crtc_info.rotation.0),
                        Err(_) => (0, 0, 1),
                    },
                    Err(_) => (0, 0, 1),
                }
            } else {
                (0, 0, 1)
            };

            outputs.push(RandrOutput {
                output,
                name,
                mode_name,
                refresh,
                edid_md5,
                crtc: info.crtc,
                x,
                y,
                rotation,
            });
        }

        let geom = self
            .conn
            .get_geometry(root)
            .map_err(|e| e.to_string())?
            .reply()
            .map_err(|e| e.to_string())?;
        let screen = self.screen();

        Ok(RandrSnapshot {
            width_px: geom.width,
            height_px: geom.height,
            width_mm: screen.width_in_millimeters,
            height_mm: screen.height_in_millimeters,
            outputs,
        })
    }

    /// All CRTCs known to the screen, connected or not — used by
    /// `monitors::apply`/`autoConfig` to find a free one.
    pub fn randr_crtcs(&mut self) -> Result<Vec<u32>, String> {
        let root = self.root();
        let resources = self
            .conn
            .randr_get_screen_resources_current(root)
            .map_err(|e| e.to_string())?
            .reply()
            .map_err(|e| e.to_string())?;
        Ok(resources.crtcs)
    }

    /// Which output(s) (if any) a CRTC currently drives.
    pub fn randr_crtc_outputs(&mut self, crtc: u32) -> Result<Vec<u32>, String> {
        let info = self
            .conn
            .randr_get_crtc_info(crtc, x11rb::CURRENT_TIME)
            .map_err(|e| e.to_string())?
            .reply()
            .map_err(|e| e.to_string())?;
        Ok(info.outputs)
    }

    /// Find a mode by name with a refresh rate within `tolerance_hz` of
    /// `refresh`, returning `(mode_id, width, height)`.
    pub fn randr_find_mode(
        &mut self,
        mode_name: &str,
        refresh: f64,
        tolerance_hz: f64,
    ) -> Result<Option<(u32, u16, u16)>, String> {
        let root = self.root();
        let resources = self
            .conn
            .randr_get_screen_resources_current(root)
            .map_err(|e| e.to_string())?
            .reply()
            .map_err(|e| e.to_string())?;
        for mode in &resources.modes {
            let name = String::from_utf8_lossy(&mode.name);
            if name != mode_name {
                continue;
            }
            if (mode_refresh_rate(mode) - refresh).abs() <= tolerance_hz {
                return Ok(Some((mode.id, mode.width, mode.height)));
            }
        }
        Ok(None)
    }

    /// Configure `crtc` to drive `outputs` at `mode` (0 disables it),
    /// positioned at `(x, y)` with the given rotation (`1`=normal, `2`=90,
    /// `4`=180, `8`=270, matching `randr::Rotation` bit values).
    pub fn randr_set_crtc_config(
        &mut self,
        crtc: u32,
        mode: u32,
        x: i16,
        y: i16,
        rotation: u16,
        outputs: &[u32],
    ) -> Result<(), String> {
        let root = self.root();
        let resources = self
            .conn
            .randr_get_screen_resources_current(root)
            .map_err(|e| e.to_string())?
            .reply()
            .map_err(|e| e.to_string())?;
        self.conn
            .randr_set_crtc_config(
                crtc,
                resources.config_timestamp,
                x11rb::CURRENT_TIME,
                x,
                y,
                mode,
                x11rb::protocol::randr::Rotation(rotation),
                outputs,
            )
            .map_err(|e| e.to_string())?
            .reply()
            .map_err(|e| e.to_string())?;
        self.conn.flush().map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn randr_disable_crtc(&mut self, crtc: u32) -> Result<(), String> {
        self.randr_set_crtc_config(crtc, 0, 0, 0, 1, &[])
    }

    pub fn randr_set_screen_size(
        &mut self,
        width_px: u16,
        height_px: u16,
        width_mm: u32,
        height_mm: u32,
    ) -> Result<(), String> {
        let root = self.root();
        self.conn
            .randr_set_screen_size(root, width_px, height_px, width_mm, height_mm)
            .map_err(|e| e.to_string())?;
        self.conn.flush().map_err(|e| e.to_string())?;
        Ok(())
    }

    fn output_edid_md5(&mut self, output: u32) -> Option<String> {
        let edid_atom = self.atom("EDID").ok()?;
        let props = self
            .conn
            .randr_get_output_property(output, edid_atom, AtomEnum::ANY, 0, u32::MAX, false, false)
            .ok()?
            .reply()
            .ok()?;
        if props.data.is_empty() {
            return None;
        }
        let mut hasher = md5::Md5::new();
        hasher.update(&props.data);
        Some(format!("{:x}", hasher.finalize()))
    }

    /// `RESOURCE_MANAGER` property on the root window, parsed as
    /// `name:\tvalue\n` pairs (the standard `xrdb` text format).
    pub fn resource_manager(&mut self) -> HashMap<String, String> {
        let root = self.root();
        let mut out = HashMap::new();
        let Some(bytes) = self.get_property_bytes(root, "RESOURCE_MANAGER") else {
            return out;
        };
        let text = String::from_utf8_lossy(&bytes);
        for line in text.lines() {
            if let Some((name, value)) = line.split_once(':') {
                out.insert(name.trim().to_owned(), value.trim_start().to_owned());
            }
        }
        out
    }

    pub fn set_resource_manager(&mut self, resources: &HashMap<String, String>) -> Result<(), String> {
        let mut names: Vec<&String> = resources.keys().collect();
        names.sort();
        let mut text = String::new();
        for name in names {
            text.push_str(name);
            text.push_str(":\t");
            text.push_str(&resources[name]);
            text.push('\n');
        }
        let root = self.root();
        self.set_property_bytes(root, "RESOURCE_MANAGER", "STRING", text.as_bytes())
    }

    pub fn next_event(&mut self) -> Result<x11rb::protocol::Event, String> {
        self.conn.wait_for_event().map_err(|e| e.to_string())
    }

    pub fn poll_event(&mut self) -> Result<Option<x11rb::protocol::Event>, String> {
        self.conn.poll_for_event().map_err(|e| e.to_string())
    }

    pub fn file_descriptor(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.conn.stream().as_raw_fd()
    }
}

fn mode_refresh_rate(mode: &x11rb::protocol::randr::ModeInfo) -> f64 {
    if mode.htotal == 0 || mode.vtotal == 0 {
        return 0.0;
    }
    mode.dot_clock as f64 / (mode.htotal as f64 * mode.vtotal as f64)
}

pub struct RandrOutput {
    pub output: u32,
    pub name: String,
    pub mode_name: String,
    pub refresh: f64,
    pub edid_md5: String,
    pub crtc: u32,
    pub x: i16,
    pub y: i16,
    pub rotation: u16,
}

pub struct RandrSnapshot {
    pub width_px: u16,
    pub height_px: u16,
    pub width_mm: u16,
    pub height_mm: u16,
    pub outputs: Vec<RandrOutput>,
}
