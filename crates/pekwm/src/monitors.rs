//! Monitor-configuration store: captures the live XRandR topology, keys it
//! by an MD5 of the connected (output, EDID) pairs so a saved layout survives
//! attach/detach, and can re-apply a saved layout or auto-arrange unassigned
//! outputs.

use std::path::Path;

use md5::Digest;

use crate::entry::Entry;
use crate::x11::X11;

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub output_name: String,
    pub mode_name: String,
    pub edid_md5: String,
    pub refresh: f64,
    pub x: i16,
    pub y: i16,
    pub rotation: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorsConfig {
    pub id: String,
    pub width_px: u16,
    pub height_px: u16,
    pub width_mm: u32,
    pub height_mm: u32,
    pub monitors: Vec<MonitorConfig>,
}

/// MD5 of `(output_name || edid_md5)*` over all connected outputs in
/// iteration order. Stable across attach/detach of *other* outputs, which is
/// exactly what makes a saved layout matchable to the currently-connected
/// set.
pub fn compute_id<'a>(outputs: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut hasher = md5::Md5::new();
    for (name, edid) in outputs {
        hasher.update(name.as_bytes());
        hasher.update(edid.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

impl MonitorsConfig {
    /// Populate from the live XRandR resources, or a single synthetic
    /// `"X11"` entry if XRandR is unavailable.
    pub fn capture(x11: &mut X11) -> MonitorsConfig {
        match x11.randr_outputs() {
            Ok(snapshot) => {
                let id = compute_id(
                    snapshot
                        .outputs
                        .iter()
                        .map(|o| (o.name.as_str(), o.edid_md5.as_str())),
                );
                let monitors = snapshot
                    .outputs
                    .iter()
                    .map(|o| MonitorConfig {
                        output_name: o.name.clone(),
                        mode_name: o.mode_name.clone(),
                        edid_md5: o.edid_md5.clone(),
                        refresh: o.refresh,
                        x: o.x,
                        y: o.y,
                        rotation: o.rotation,
                    })
                    .collect();
                MonitorsConfig {
                    id,
                    width_px: snapshot.width_px,
                    height_px: snapshot.height_px,
                    width_mm: snapshot.width_mm as u32,
                    height_mm: snapshot.height_mm as u32,
                    monitors,
                }
            }
            Err(e) => {
                log::warn!("XRandR unavailable, falling back to synthetic X11 output: {e}");
                MonitorsConfig {
                    id: compute_id(std::iter::once(("X11", ""))),
                    width_px: 0,
                    height_px: 0,
                    width_mm: 0,
                    height_mm: 0,
                    monitors: vec![MonitorConfig {
                        output_name: "X11".to_owned(),
                        mode_name: String::new(),
                        edid_md5: String::new(),
                        refresh: 0.0,
                        x: 0,
                        y: 0,
                        rotation: 1,
                    }],
                }
            }
        }
    }

    fn to_entry(&self) -> Entry {
        let mut section = Entry::new("", self.id.clone());
        let mut out = Entry::new("Monitors", self.id.clone());

        section.children.push(leaf("Width", self.width_px.to_string()));
        section.children.push(leaf("Height", self.height_px.to_string()));
        section.children.push(leaf("WidthMm", self.width_mm.to_string()));
        section.children.push(leaf("HeightMm", self.height_mm.to_string()));

        for m in &self.monitors {
            let mut monitor_section = Entry::new("", m.output_name.clone());
            monitor_section.children.push(leaf("Mode", m.mode_name.clone()));
            monitor_section.children.push(leaf("Edid", m.edid_md5.clone()));
            monitor_section.children.push(leaf("Refresh", m.refresh.to_string()));
            monitor_section.children.push(leaf("X", m.x.to_string()));
            monitor_section.children.push(leaf("Y", m.y.to_string()));
            monitor_section.children.push(leaf("Rotation", m.rotation.to_string()));
            let mut monitor_entry = Entry::new("Output", m.output_name.clone());
            monitor_entry.section = Some(Box::new(monitor_section));
            section.children.push(monitor_entry);
        }

        out.section = Some(Box::new(section));
        out
    }

    fn from_entry(entry: &Entry) -> MonitorsConfig {
        let mut cfg = MonitorsConfig {
            id: entry.value.clone(),
            width_px: 0,
            height_px: 0,
            width_mm: 0,
            height_mm: 0,
            monitors: Vec::new(),
        };
        for child in entry.entries() {
            match child.name.as_str() {
                "Width" => cfg.width_px = child.value.parse().unwrap_or(0),
                "Height" => cfg.height_px = child.value.parse().unwrap_or(0),
                "WidthMm" => cfg.width_mm = child.value.parse().unwrap_or(0),
                "HeightMm" => cfg.height_mm = child.value.parse().unwrap_or(0),
                "Output" => {
                    let mut m = MonitorConfig {
                        output_name: child.value.clone(),
                        mode_name: String::new(),
                        edid_md5: String::new(),
                        refresh: 0.0,
                        x: 0,
                        y: 0,
                        rotation: 1,
                    };
                    for field in child.entries() {
                        match field.name.as_str() {
                            "Mode" => m.mode_name = field.value.clone(),
                            "Edid" => m.edid_md5 = field.value.clone(),
                            "Refresh" => m.refresh = field.value.parse().unwrap_or(0.0),
                            "X" => m.x = field.value.parse().unwrap_or(0),
                            "Y" => m.y = field.value.parse().unwrap_or(0),
                            "Rotation" => m.rotation = field.value.parse().unwrap_or(1),
                            _ => {}
                        }
                    }
                    cfg.monitors.push(m);
                }
                _ => {}
            }
        }
        cfg
    }
}

fn leaf(name: &str, value: String) -> Entry {
    Entry::new(name, value)
}

/// MD5-keyed registry of named XRandR layouts.
#[derive(Default)]
pub struct MonitorsStore {
    pub configs: Vec<MonitorsConfig>,
}

impl MonitorsStore {
    pub fn new() -> MonitorsStore {
        MonitorsStore::default()
    }

    pub fn find(&self, id: &str) -> Option<&MonitorsConfig> {
        self.configs.iter().find(|c| c.id == id)
    }

    /// Append (or replace) a config, keyed by its `id`.
    pub fn upsert(&mut self, cfg: MonitorsConfig) {
        if let Some(existing) = self.configs.iter_mut().find(|c| c.id == cfg.id) {
            *existing = cfg;
        } else {
            self.configs.push(cfg);
        }
    }

    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), String> {
        use crate::parser::{CfgParser, ParserOptions};
        let mut parser = CfgParser::new(ParserOptions::default());
        if !parser.parse_file(path.as_ref(), false) {
            return Err(format!("failed to parse {:?}", path.as_ref()));
        }
        self.configs = parser
            .root()
            .entries()
            .iter()
            .filter(|e| e.name_eq("Monitors"))
            .map(MonitorsConfig::from_entry)
            .collect();
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), String> {
        let mut text = String::new();
        for cfg in &self.configs {
            text.push_str(&render_section(&cfg.to_entry(), 0));
        }
        let tmp = path.as_ref().with_extension("tmp");
        std::fs::write(&tmp, text).map_err(|e| format!("failed to write {tmp:?}: {e}"))?;
        std::fs::rename(&tmp, path.as_ref())
            .map_err(|e| format!("failed to replace {:?}: {e}", path.as_ref()))?;
        Ok(())
    }

    /// Resolve modes/CRTCs and apply every monitor in `cfg` to the live
    /// server. An output's existing CRTC is reused if allocated; otherwise
    /// the first free CRTC is taken. If a mode ends up on a different CRTC
    /// than before, the previous one is disabled. Screen size is set last.
    pub fn apply(&self, cfg: &MonitorsConfig, x11: &mut X11) -> Result<(), String> {
        let live = x11.randr_outputs()?;
        let all_crtcs = x11.randr_crtcs()?;

        for monitor in &cfg.monitors {
            let Some(live_output) = live.outputs.iter().find(|o| o.name == monitor.output_name) else {
                log::warn!("output {} not present, skipping", monitor.output_name);
                continue;
            };
            let Some((mode_id, _w, _h)) =
                x11.randr_find_mode(&monitor.mode_name, monitor.refresh, 1.0)?
            else {
                log::warn!(
                    "mode {} @ {}Hz not available for {}, skipping",
                    monitor.mode_name,
                    monitor.refresh,
                    monitor.output_name
                );
                continue;
            };

            let previous_crtc = live_output.crtc;
            let target_crtc = if previous_crtc != 0 {
                previous_crtc
            } else {
                find_free_crtc(&all_crtcs, &live.outputs)
                    .ok_or_else(|| "no free CRTC available".to_owned())?
            };

            x11.randr_set_crtc_config(
                target_crtc,
                mode_id,
                monitor.x,
                monitor.y,
                monitor.rotation,
                &[live_output.output],
            )?;

            if previous_crtc != 0 && previous_crtc != target_crtc {
                x11.randr_disable_crtc(previous_crtc)?;
            }
        }

        x11.randr_set_screen_size(cfg.width_px, cfg.height_px, cfg.width_mm, cfg.height_mm)?;
        Ok(())
    }

    /// For every connected output with no CRTC allocated, assign the next
    /// free CRTC and place it to the right of whatever has already been
    /// placed. Layout policy is deterministic (left-to-right by output
    /// iteration order) but otherwise unspecified.
    pub fn auto_config(&self, x11: &mut X11) -> Result<bool, String> {
        let live = x11.randr_outputs()?;
        let all_crtcs = x11.randr_crtcs()?;
        let unassigned: Vec<_> = live
            .outputs
            .iter()
            .filter(|o| o.crtc == 0)
            .map(|o| (o.output, o.mode_name.clone(), o.refresh))
            .collect();
        if unassigned.is_empty() {
            return Ok(false);
        }

        let mut used_crtcs: std::collections::HashSet<u32> =
            live.outputs.iter().map(|o| o.crtc).filter(|&c| c != 0).collect();
        let mut cursor_x: i16 = live
            .outputs
            .iter()
            .filter(|o| o.crtc != 0)
            .map(|o| o.x)
            .max()
            .unwrap_or(0);

        let mut changed = false;
        for (output, mode_name, refresh) in unassigned {
            if mode_name.is_empty() {
                continue;
            }
            let Some((mode_id, width, _height)) = x11.randr_find_mode(&mode_name, refresh, 1.0)?
            else {
                continue;
            };
            let Some(&crtc) = all_crtcs.iter().find(|c| !used_crtcs.contains(c)) else {
                break;
            };
            x11.randr_set_crtc_config(crtc, mode_id, cursor_x, 0, 1, &[output])?;
            used_crtcs.insert(crtc);
            cursor_x += width as i16;
            changed = true;
        }
        Ok(changed)
    }
}

fn find_free_crtc(all_crtcs: &[u32], live_outputs: &[crate::x11::RandrOutput]) -> Option<u32> {
    let used: std::collections::HashSet<u32> =
        live_outputs.iter().map(|o| o.crtc).filter(|&c| c != 0).collect();
    all_crtcs.iter().find(|c| !used.contains(c)).copied()
}

fn render_section(entry: &Entry, depth: usize) -> String {
    let indent = "\t".repeat(depth);
    let mut out = String::new();
    match &entry.section {
        Some(section) => {
            out.push_str(&format!("{indent}{} = \"{}\" {{\n", entry.name, entry.value));
            for child in &section.children {
                out.push_str(&render_section(child, depth + 1));
            }
            out.push_str(&format!("{indent}}}\n"));
        }
        None => {
            out.push_str(&format!("{indent}{} = \"{}\"\n", entry.name, entry.value));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_id_is_order_sensitive_and_stable() {
        let a = compute_id([("eDP-1", "aaa"), ("HDMI-1", "bbb")].into_iter());
        let b = compute_id([("eDP-1", "aaa"), ("HDMI-1", "bbb")].into_iter());
        let c = compute_id([("HDMI-1", "bbb"), ("eDP-1", "aaa")].into_iter());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn save_then_load_round_trips_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitors.save");

        let cfg = MonitorsConfig {
            id: "deadbeef".to_owned(),
            width_px: 1920,
            height_px: 1080,
            width_mm: 520,
            height_mm: 290,
            monitors: vec![MonitorConfig {
                output_name: "eDP-1".to_owned(),
                mode_name: "1920x1080".to_owned(),
                edid_md5: "abc123".to_owned(),
                refresh: 60.0,
                x: 0,
                y: 0,
                rotation: 1,
            }],
        };

        let mut store = MonitorsStore::new();
        store.upsert(cfg.clone());
        store.save(&path).unwrap();

        let mut loaded = MonitorsStore::new();
        loaded.load(&path).unwrap();
        assert_eq!(loaded.find("deadbeef"), Some(&cfg));
    }

    #[test]
    fn find_returns_none_for_unknown_id() {
        let store = MonitorsStore::new();
        assert!(store.find("nope").is_none());
    }
}
