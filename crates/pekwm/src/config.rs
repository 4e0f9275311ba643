//! Well-known paths for the pekwm configuration spine.
//!
//! There is no compiled-in search path list the way systemd has one for unit
//! directories: pekwm's configuration lives under a single per-user
//! directory, `~/.pekwm`, whose location can be overridden by
//! `PEKWM_CONFIG_FILE` for the main config file specifically.

use std::path::PathBuf;

#[derive(Debug)]
pub struct LoggingConfig {
    pub log_to_stdout: bool,
    pub log_file: Option<PathBuf>,
    pub level: log::LevelFilter,
}

impl Default for LoggingConfig {
    fn default() -> LoggingConfig {
        LoggingConfig {
            log_to_stdout: true,
            log_file: None,
            level: log::LevelFilter::Info,
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/"))
}

fn pekwm_dir() -> PathBuf {
    home_dir().join(".pekwm")
}

/// The main configuration file: `$PEKWM_CONFIG_FILE` if set, else
/// `~/.pekwm/config`.
pub fn default_config_file() -> PathBuf {
    if let Ok(path) = std::env::var("PEKWM_CONFIG_FILE") {
        return PathBuf::from(path);
    }
    pekwm_dir().join("config")
}

pub fn default_xsettings_path() -> PathBuf {
    pekwm_dir().join("xsettings.save")
}

pub fn default_monitors_path() -> PathBuf {
    pekwm_dir().join("monitors.save")
}

/// Expand a leading `~` to `$HOME`, then expand any `$NAME` / `${NAME}`
/// environment references appearing in the rest of the path. Unset
/// variables are left as-is rather than collapsed to an empty string, so a
/// typo'd variable name stays visible in the resulting path instead of
/// silently producing a plausible-looking but wrong one.
pub fn expand_user_path(raw: &str) -> PathBuf {
    let tilde_expanded = if let Some(rest) = raw.strip_prefix('~') {
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        home_dir().join(rest).to_string_lossy().into_owned()
    } else {
        raw.to_owned()
    };
    PathBuf::from(expand_env_vars(&tilde_expanded))
}

fn expand_env_vars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let rest = &raw[i + 1..];
        let (name, consumed) = if let Some(braced) = rest.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => {
                    out.push('$');
                    continue;
                }
            }
        } else {
            let end = rest
                .find(|c: char| !c.is_alphanumeric() && c != '_')
                .unwrap_or(rest.len());
            if end == 0 {
                out.push('$');
                continue;
            }
            (&rest[..end], end)
        };
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => {
                out.push('$');
                out.push_str(&raw[i + 1..i + 1 + consumed]);
            }
        }
        for _ in 0..consumed {
            chars.next();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_tilde_relative_to_home() {
        unsafe { std::env::set_var("HOME", "/home/test") };
        assert_eq!(expand_user_path("~/foo"), PathBuf::from("/home/test/foo"));
    }

    #[test]
    fn leaves_absolute_paths_untouched() {
        assert_eq!(expand_user_path("/etc/foo"), PathBuf::from("/etc/foo"));
    }

    #[test]
    fn expands_braced_env_var() {
        unsafe { std::env::set_var("PEKWM_TEST_DIR", "themes") };
        assert_eq!(
            expand_user_path("/usr/share/${PEKWM_TEST_DIR}/default"),
            PathBuf::from("/usr/share/themes/default")
        );
    }

    #[test]
    fn expands_bare_env_var() {
        unsafe { std::env::set_var("PEKWM_TEST_DIR", "themes") };
        assert_eq!(
            expand_user_path("/usr/share/$PEKWM_TEST_DIR/default"),
            PathBuf::from("/usr/share/themes/default")
        );
    }

    #[test]
    fn unset_env_var_is_left_literal() {
        unsafe { std::env::remove_var("PEKWM_TEST_UNSET") };
        assert_eq!(
            expand_user_path("/usr/share/$PEKWM_TEST_UNSET/default"),
            PathBuf::from("/usr/share/$PEKWM_TEST_UNSET/default")
        );
    }
}
