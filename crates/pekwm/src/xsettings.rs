//! XSETTINGS manager: owns the `_XSETTINGS_S<n>` selection, serialises typed
//! settings to the wire format described by the XSETTINGS freedesktop spec,
//! and persists them across restarts.
//!
//! The wire format and selection dance are deliberately kept separate from
//! the X11 plumbing in [`crate::x11`]: this module only ever talks to the
//! server through the narrow operation set `x11::X11` exposes, the same way
//! `parser` only ever talks to a source through `CfgParserSource`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::x11::X11;

#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Int(i32),
    Str(String),
    Color { r: u16, g: u16, b: u16, a: u16 },
}

impl SettingValue {
    fn type_byte(&self) -> u8 {
        match self {
            SettingValue::Int(_) => 0,
            SettingValue::Str(_) => 1,
            SettingValue::Color { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub value: SettingValue,
    pub last_changed: u32,
}

/// Insertion order is significant for `save`, so settings live in a
/// `BTreeMap` keyed by a monotonically increasing insertion index paired
/// with the name — simpler: we just keep a `Vec` alongside a name index.
#[derive(Default)]
pub struct XSettings {
    order: Vec<String>,
    settings: BTreeMap<String, Setting>,
    serial: u32,
    control_window: Option<u32>,
    owned: bool,
    screen: usize,
}

/// Validate a setting name per the XSETTINGS rules: non-empty, first byte in
/// `[A-Za-z]`, remaining bytes in `[A-Za-z0-9/]`, no leading/trailing `/`,
/// no `//`.
pub fn validate_name(name: &str) -> Result<(), String> {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return Err("setting name must not be empty".to_owned());
    }
    if !bytes[0].is_ascii_alphabetic() {
        return Err(format!("setting name \"{name}\" must start with a letter"));
    }
    for &b in &bytes[1..] {
        if !(b.is_ascii_alphanumeric() || b == b'/') {
            return Err(format!(
                "setting name \"{name}\" contains an invalid character"
            ));
        }
    }
    if bytes[bytes.len() - 1] == b'/' {
        return Err(format!("setting name \"{name}\" must not end with '/'"));
    }
    if name.contains("//") {
        return Err(format!("setting name \"{name}\" must not contain \"//\""));
    }
    Ok(())
}

fn pad4(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

impl XSettings {
    pub fn new(screen: usize) -> XSettings {
        XSettings {
            screen,
            ..XSettings::default()
        }
    }

    pub fn get(&self, name: &str) -> Option<&Setting> {
        self.settings.get(name)
    }

    pub fn is_owner(&self) -> bool {
        self.owned
    }

    fn bump(&mut self, name: &str, value: SettingValue) {
        let next_changed = self.settings.get(name).map(|s| s.last_changed + 1).unwrap_or(0);
        if !self.settings.contains_key(name) {
            self.order.push(name.to_owned());
        }
        self.settings.insert(
            name.to_owned(),
            Setting {
                value,
                last_changed: next_changed,
            },
        );
    }

    pub fn set_string(&mut self, name: &str, value: impl Into<String>) -> Result<(), String> {
        validate_name(name)?;
        self.bump(name, SettingValue::Str(value.into()));
        Ok(())
    }

    pub fn set_int(&mut self, name: &str, value: i32) -> Result<(), String> {
        validate_name(name)?;
        self.bump(name, SettingValue::Int(value));
        Ok(())
    }

    pub fn set_color(&mut self, name: &str, r: u16, g: u16, b: u16, a: u16) -> Result<(), String> {
        validate_name(name)?;
        self.bump(name, SettingValue::Color { r, g, b, a });
        Ok(())
    }

    /// Serialise the full settings map to the `_XSETTINGS_SETTINGS` wire
    /// format: byte-order marker, 3 padding bytes, serial, count, then each
    /// setting.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(0u8); // byte order: 0 = little-endian
        out.extend_from_slice(&[0, 0, 0]);
        out.extend_from_slice(&self.serial.to_le_bytes());
        out.extend_from_slice(&(self.order.len() as u32).to_le_bytes());

        for name in &self.order {
            let Some(setting) = self.settings.get(name) else {
                continue;
            };
            out.push(setting.value.type_byte());
            out.push(0); // unused
            let name_bytes = name.as_bytes();
            out.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
            out.extend_from_slice(name_bytes);
            out.extend(std::iter::repeat(0u8).take(pad4(name_bytes.len())));
            out.extend_from_slice(&setting.last_changed.to_le_bytes());
            match &setting.value {
                SettingValue::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
                SettingValue::Str(s) => {
                    let bytes = s.as_bytes();
                    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                    out.extend_from_slice(bytes);
                    out.extend(std::iter::repeat(0u8).take(pad4(bytes.len())));
                }
                // Note the r-b-g-a ordering: preserved for wire compatibility
                // with existing consumers, not a typo.
                SettingValue::Color { r, g, b, a } => {
                    out.extend_from_slice(&r.to_le_bytes());
                    out.extend_from_slice(&b.to_le_bytes());
                    out.extend_from_slice(&g.to_le_bytes());
                    out.extend_from_slice(&a.to_le_bytes());
                }
            }
        }
        out
    }

    /// Persist the current settings to `path` as a `Settings { ... }`
    /// section, one type-tagged value per key: `s...` string, `i...` signed
    /// int, `c(r,g,b,a)` colour.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), String> {
        let mut text = String::from("Settings {\n");
        for name in &self.order {
            let Some(setting) = self.settings.get(name) else {
                continue;
            };
            let tagged = match &setting.value {
                SettingValue::Int(v) => format!("i{v}"),
                SettingValue::Str(s) => format!("s{s}"),
                SettingValue::Color { r, g, b, a } => format!("c({r},{g},{b},{a})"),
            };
            text.push_str(&format!(
                "\t{} = \"{}\"\n",
                name,
                escape_value(&tagged)
            ));
        }
        text.push_str("}\n");

        let tmp = path.as_ref().with_extension("tmp");
        let mut file = std::fs::File::create(&tmp)
            .map_err(|e| format!("failed to create {tmp:?}: {e}"))?;
        file.write_all(text.as_bytes())
            .map_err(|e| format!("failed to write {tmp:?}: {e}"))?;
        std::fs::rename(&tmp, path.as_ref())
            .map_err(|e| format!("failed to replace {:?}: {e}", path.as_ref()))?;
        Ok(())
    }

    /// Load settings previously written by [`XSettings::save`].
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), String> {
        use crate::parser::{CfgParser, ParserOptions};
        let mut parser = CfgParser::new(ParserOptions::default());
        if !parser.parse_file(path.as_ref(), false) {
            return Err(format!("failed to parse {:?}", path.as_ref()));
        }
        let Some(section) = parser.root().find_entry("Settings") else {
            return Ok(());
        };
        for entry in section.entries() {
            if let Err(e) = self.load_one(&entry.name, &entry.value) {
                log::warn!("{}: {e}", entry.name);
            }
        }
        Ok(())
    }

    fn load_one(&mut self, name: &str, tagged: &str) -> Result<(), String> {
        let mut chars = tagged.chars();
        let tag = chars.next().ok_or_else(|| "empty setting value".to_owned())?;
        let rest = chars.as_str();
        match tag {
            's' => self.set_string(name, rest),
            'i' => {
                let v: i32 = rest
                    .parse()
                    .map_err(|_| format!("invalid int setting value {rest:?}"))?;
                self.set_int(name, v)
            }
            'c' => {
                let inner = rest
                    .strip_prefix('(')
                    .and_then(|s| s.strip_suffix(')'))
                    .ok_or_else(|| format!("invalid color setting value {rest:?}"))?;
                let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
                if parts.len() != 4 {
                    return Err(format!("invalid color setting value {rest:?}"));
                }
                let nums: Result<Vec<u16>, _> = parts.iter().map(|p| p.parse::<u16>()).collect();
                let nums = nums.map_err(|_| format!("invalid color setting value {rest:?}"))?;
                self.set_color(name, nums[0], nums[1], nums[2], nums[3])
            }
            other => Err(format!("unknown setting type tag '{other}'")),
        }
    }

    fn selection_name(&self) -> String {
        format!("_XSETTINGS_S{}", self.screen)
    }

    /// Try to become the owner of `_XSETTINGS_S<screen>`. Returns `Ok(true)`
    /// if ownership was acquired, `Ok(false)` if someone else already owns
    /// it (we are now watching them for `StructureNotify` so we can retry
    /// once they die).
    pub fn set_server_owner(&mut self, x11: &mut X11) -> Result<bool, String> {
        x11.grab_server()?;
        let window = match self.control_window {
            Some(w) => w,
            None => {
                let w = x11.create_input_only_window()?;
                self.control_window = Some(w);
                w
            }
        };
        let result = x11.acquire_selection(&self.selection_name(), window);
        x11.ungrab_server(true)?;
        match result? {
            Some(_previous_owner) => {
                self.owned = false;
                Ok(false)
            }
            None => {
                self.owned = true;
                Ok(true)
            }
        }
    }

    /// A `SelectionClear` for the XSETTINGS atom: we have lost ownership.
    /// Further [`XSettings::update_server`] calls are no-ops until
    /// [`XSettings::set_server_owner`] reclaims it.
    pub fn on_selection_clear(&mut self, x11: &mut X11) -> Result<(), String> {
        self.owned = false;
        x11.watch_new_owner(&self.selection_name())
    }

    /// A previous owner's window was destroyed: try to reclaim the
    /// selection.
    pub fn try_reclaim(&mut self, x11: &mut X11) -> Result<bool, String> {
        if self.owned {
            return Ok(true);
        }
        self.set_server_owner(x11)
    }

    /// Re-serialise and push the current settings to the server, bumping the
    /// wire serial. No-op while we do not own the selection.
    pub fn update_server(&mut self, x11: &mut X11) -> Result<(), String> {
        let Some(window) = self.control_window else {
            return Ok(());
        };
        if !self.owned {
            return Ok(());
        }
        self.serial += 1;
        let bytes = self.serialize();
        x11.set_property_bytes(window, "_XSETTINGS_SETTINGS", "_XSETTINGS_SETTINGS", &bytes)
    }
}

fn escape_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_rejects_leading_slash() {
        assert!(validate_name("/Foo").is_err());
    }

    #[test]
    fn validate_name_rejects_trailing_slash() {
        assert!(validate_name("Foo/").is_err());
    }

    #[test]
    fn validate_name_rejects_double_slash() {
        assert!(validate_name("Net//ThemeName").is_err());
    }

    #[test]
    fn validate_name_rejects_leading_digit() {
        assert!(validate_name("1Foo").is_err());
    }

    #[test]
    fn validate_name_accepts_namespaced_name() {
        assert!(validate_name("Net/ThemeName").is_ok());
    }

    #[test]
    fn set_increments_last_changed_from_zero() {
        let mut s = XSettings::new(0);
        s.set_string("Net/ThemeName", "Adwaita").unwrap();
        assert_eq!(s.get("Net/ThemeName").unwrap().last_changed, 0);
        s.set_string("Net/ThemeName", "Breeze").unwrap();
        assert_eq!(s.get("Net/ThemeName").unwrap().last_changed, 1);
    }

    #[test]
    fn serialize_matches_expected_layout_for_single_string_setting() {
        let mut s = XSettings::new(0);
        s.set_string("Net/ThemeName", "Adwaita").unwrap();
        s.settings.get_mut("Net/ThemeName").unwrap().last_changed = 3;
        s.serial = 0;
        let bytes = s.serialize();

        assert_eq!(bytes[0], 0); // byte order marker
        assert_eq!(&bytes[4..8], &0u32.to_le_bytes()); // serial
        assert_eq!(&bytes[8..12], &1u32.to_le_bytes()); // count

        let entry = &bytes[12..];
        assert_eq!(entry[0], 1); // type = string
        assert_eq!(entry[1], 0); // unused
        let name_len = u16::from_le_bytes([entry[2], entry[3]]);
        assert_eq!(name_len, 13); // "Net/ThemeName"
        let name_end = 4 + 13;
        assert_eq!(&entry[4..name_end], b"Net/ThemeName");
        let padded_name_end = name_end + pad4(13);
        assert_eq!(padded_name_end - name_end, 3); // padded to 16 bytes total
        let last_changed =
            u32::from_le_bytes(entry[padded_name_end..padded_name_end + 4].try_into().unwrap());
        assert_eq!(last_changed, 3);
        let value_len_off = padded_name_end + 4;
        let value_len = u32::from_le_bytes(
            entry[value_len_off..value_len_off + 4].try_into().unwrap(),
        );
        assert_eq!(value_len, 7);
        assert_eq!(&entry[value_len_off + 4..value_len_off + 4 + 7], b"Adwaita");
    }

    #[test]
    fn save_then_load_round_trips_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xsettings.save");

        let mut s = XSettings::new(0);
        s.set_string("Net/ThemeName", "Adwaita").unwrap();
        s.set_int("Xft/DPI", 96 * 1024).unwrap();
        s.set_color("Pekwm/Accent", 10, 20, 30, 40).unwrap();
        s.save(&path).unwrap();

        let mut loaded = XSettings::new(0);
        loaded.load(&path).unwrap();
        assert_eq!(loaded.get("Net/ThemeName").unwrap().value, SettingValue::Str("Adwaita".to_owned()));
        assert_eq!(loaded.get("Xft/DPI").unwrap().value, SettingValue::Int(96 * 1024));
        assert_eq!(
            loaded.get("Pekwm/Accent").unwrap().value,
            SettingValue::Color { r: 10, g: 20, b: 30, a: 40 }
        );
    }

    #[test]
    fn reload_into_live_instance_never_decreases_last_changed() {
        // `load` shares `set_string`'s bump logic, so re-loading the
        // persisted file into the *same* still-running instance (as
        // opposed to a freshly constructed one at startup) can only ever
        // advance `last_changed`, never roll it back.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xsettings.save");

        let mut s = XSettings::new(0);
        s.set_string("k", "a").unwrap();
        s.set_string("k", "b").unwrap();
        let before = s.get("k").unwrap().last_changed;
        s.save(&path).unwrap();

        s.load(&path).unwrap();
        assert!(s.get("k").unwrap().last_changed >= before);
    }

    #[test]
    fn load_into_fresh_instance_starts_last_changed_at_zero() {
        // A brand-new process loading a persisted file has no prior state
        // to compare against, so every setting starts at 0 regardless of
        // how many times it changed before the save — matching the
        // upstream `XSettings::set` semantics, which only bump when an
        // entry already exists in `_settings`.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xsettings.save");

        let mut s = XSettings::new(0);
        s.set_string("k", "a").unwrap();
        s.set_string("k", "b").unwrap();
        s.save(&path).unwrap();

        let mut loaded = XSettings::new(0);
        loaded.load(&path).unwrap();
        assert_eq!(loaded.get("k").unwrap().last_changed, 0);
    }
}
