//! `pekwm` is the configuration-and-resource spine shared by the pekwm
//! window-manager suite: a recursive, variable-expanding,
//! include/command-substituting configuration parser (`parser::CfgParser`),
//! a typed facade over the `Sys { ... }` section it produces
//! (`sysconfig::Sys`), and the primitives `pekwm_sys` drives its event loop
//! with — day/night computation, a timeout wheel, XSETTINGS serialisation,
//! and XRandR monitor-layout persistence.
//!
//! Everything above the character-stream/parser layer talks to X11 only
//! through [`x11::X11`]'s narrow operation set, so none of it needs to know
//! about wire-level protocol details, and none of it is exercised by tests
//! that don't have a display to connect to.

pub mod config;
pub mod daytime;
pub mod entry;
pub mod error;
pub mod expander;
pub mod keys;
pub mod logging;
pub mod monitors;
pub mod parser;
pub mod signals;
pub mod source;
pub mod sysconfig;
pub mod timeouts;
pub mod x11;
pub mod xsettings;
