//! Typed view of the `Sys { ... }` section of `~/.pekwm/config`.
//!
//! Built on the generic key-binding layer in [`crate::keys`], the same way
//! other typed config sections in this suite build on a shared
//! key-coercion helper instead of parsing each field by hand.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::{default_monitors_path, default_xsettings_path};
use crate::daytime::TimeOfDay;
use crate::entry::Entry;
use crate::keys::{parse_key_values, Key};

#[derive(Debug, Clone)]
pub struct Sys {
    pub xsettings: bool,
    pub xsettings_path: PathBuf,
    pub location_lookup: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub time_of_day: String,
    pub dpi: f64,
    pub net_theme: String,
    pub net_icon_theme: String,
    pub monitors_path: PathBuf,
    pub monitor_load_on_change: bool,
    pub monitor_auto_configure: bool,
    pub daytime_commands: Vec<String>,
    pub location_commands: Vec<String>,
    pub x_resources: HashMap<TimeOfDay, HashMap<String, String>>,
}

impl Default for Sys {
    fn default() -> Sys {
        Sys {
            xsettings: true,
            xsettings_path: default_xsettings_path(),
            location_lookup: false,
            latitude: f64::NAN,
            longitude: f64::NAN,
            time_of_day: "Auto".to_owned(),
            dpi: f64::NAN,
            net_theme: String::new(),
            net_icon_theme: String::new(),
            monitors_path: default_monitors_path(),
            monitor_load_on_change: false,
            monitor_auto_configure: false,
            daytime_commands: Vec::new(),
            location_commands: Vec::new(),
            x_resources: HashMap::new(),
        }
    }
}

impl Sys {
    /// `None` if the parsed config has no `Sys` section at all; callers
    /// treat that as "use every default".
    pub fn load(root: &Entry) -> Sys {
        let mut sys = Sys::default();
        let Some(section) = root.find_entry("Sys") else {
            return sys;
        };

        parse_key_values(
            section,
            vec![
                Key::boolean("XSettings", &mut sys.xsettings),
                Key::path("XSettingsPath", &mut sys.xsettings_path),
                Key::boolean("LocationLookup", &mut sys.location_lookup),
                Key::float("Latitude", &mut sys.latitude, -90.0, 90.0),
                Key::float("Longitude", &mut sys.longitude, -180.0, 180.0),
                Key::string("TimeOfDay", &mut sys.time_of_day),
                Key::float("Dpi", &mut sys.dpi, 0.0, f64::MAX),
                Key::string("NetTheme", &mut sys.net_theme),
                Key::string("NetIconTheme", &mut sys.net_icon_theme),
                Key::path("MonitorsPath", &mut sys.monitors_path),
                Key::boolean("MonitorLoadOnChange", &mut sys.monitor_load_on_change),
                Key::boolean("MonitorAutoConfigure", &mut sys.monitor_auto_configure),
            ],
        );

        if let Some(commands) = section.find_entry("DaytimeCommands") {
            sys.daytime_commands = commands.entries().iter().map(|e| e.value.clone()).collect();
        }
        if let Some(commands) = section.find_entry("LocationCommands") {
            sys.location_commands = commands.entries().iter().map(|e| e.value.clone()).collect();
        }

        if let Some(resources) = section.find_entry("XResources") {
            for tod in [TimeOfDay::Dawn, TimeOfDay::Day, TimeOfDay::Dusk, TimeOfDay::Night] {
                let name = tod.to_string();
                let Some(tod_section) = resources.entries().iter().find(|e| e.name_eq(&name)) else {
                    continue;
                };
                let map = tod_section
                    .entries()
                    .iter()
                    .map(|e| (e.name.clone(), e.value.clone()))
                    .collect();
                sys.x_resources.insert(tod, map);
            }
        }

        sys
    }

    /// `TimeOfDay` if this isn't `Auto`, i.e. an explicit operator override
    /// that should take precedence over the Daytime engine's computation.
    pub fn time_of_day_override(&self) -> Option<TimeOfDay> {
        if self.time_of_day.eq_ignore_ascii_case("Auto") {
            None
        } else {
            Some(TimeOfDay::from_str_loose(&self.time_of_day))
        }
    }

    pub fn resources_for(&self, tod: TimeOfDay) -> Option<&HashMap<String, String>> {
        self.x_resources.get(&tod)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{CfgParser, ParserOptions};

    fn parse(src: &str) -> Entry {
        let mut parser = CfgParser::new(ParserOptions::default());
        parser.parse_string("test", src, false);
        parser.root().clone()
    }

    #[test]
    fn missing_sys_section_yields_all_defaults() {
        let root = parse("Other { k = \"v\" }");
        let sys = Sys::load(&root);
        assert!(sys.xsettings);
        assert_eq!(sys.time_of_day, "Auto");
        assert!(sys.latitude.is_nan());
    }

    #[test]
    fn parses_scalar_keys() {
        let root = parse(
            r#"
            Sys {
                XSettings = "False"
                Latitude = "59.33"
                Longitude = "18.07"
                TimeOfDay = "Dusk"
                Dpi = "96.0"
                NetTheme = "Adwaita"
            }
            "#,
        );
        let sys = Sys::load(&root);
        assert!(!sys.xsettings);
        assert_eq!(sys.latitude, 59.33);
        assert_eq!(sys.longitude, 18.07);
        assert_eq!(sys.time_of_day, "Dusk");
        assert_eq!(sys.dpi, 96.0);
        assert_eq!(sys.net_theme, "Adwaita");
        assert_eq!(sys.time_of_day_override(), Some(TimeOfDay::Dusk));
    }

    #[test]
    fn auto_time_of_day_has_no_override() {
        let root = parse("Sys { TimeOfDay = \"Auto\" }");
        let sys = Sys::load(&root);
        assert_eq!(sys.time_of_day_override(), None);
    }

    #[test]
    fn collects_daytime_commands() {
        let root = parse(
            r#"
            Sys {
                DaytimeCommands {
                    Command = "notify-send hello"
                    Command = "xsetroot -solid black"
                }
            }
            "#,
        );
        let sys = Sys::load(&root);
        assert_eq!(sys.daytime_commands.len(), 2);
        assert_eq!(sys.daytime_commands[0], "notify-send hello");
    }

    #[test]
    fn collects_x_resources_per_time_of_day() {
        let root = parse(
            r#"
            Sys {
                XResources {
                    Day {
                        Foreground = "#000000"
                    }
                    Night {
                        Foreground = "#ffffff"
                    }
                }
            }
            "#,
        );
        let sys = Sys::load(&root);
        assert_eq!(
            sys.resources_for(TimeOfDay::Day).unwrap().get("Foreground").unwrap(),
            "#000000"
        );
        assert_eq!(
            sys.resources_for(TimeOfDay::Night).unwrap().get("Foreground").unwrap(),
            "#ffffff"
        );
        assert!(sys.resources_for(TimeOfDay::Dawn).is_none());
    }
}
