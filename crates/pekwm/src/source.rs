//! Character stream sources: a uniform pull-based byte stream over files,
//! in-memory strings, and piped child-process stdout.
//!
//! Every source implements the same narrow operation set: `open`, `close`,
//! `get_char`, `unget_char`. The scanner in `parser` only ever talks to this
//! trait, never to the concrete kinds directly, so adding a new source kind
//! never touches the grammar.

use crate::error::Diagnostic;
use std::fs::File;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};

use nix::sys::signal::{self, SigHandler, Signal};

pub const EOF: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    File,
    String,
    Command,
    Virtual,
}

/// A single pushed-back byte. The grammar never needs more than one byte of
/// lookahead at the source level (the scanner does its own small buffering
/// on top).
pub trait CfgParserSource {
    fn open(&mut self) -> Result<(), Diagnostic>;
    fn close(&mut self) -> Result<(), Diagnostic>;
    fn get_char(&mut self) -> i32;
    fn unget_char(&mut self, c: i32);

    fn name(&self) -> &str;
    fn source_type(&self) -> SourceType;
    fn line(&self) -> u32;

    /// Command sources are not memoised: their content can differ between
    /// runs, so nothing downstream should cache based on their contents.
    fn is_dynamic(&self) -> bool {
        false
    }
}

/// Shared line-counting and single-byte pushback bookkeeping used by every
/// concrete source.
#[derive(Debug, Default)]
struct Cursor {
    line: u32,
    pushed_back: Option<u8>,
}

impl Cursor {
    fn new() -> Cursor {
        Cursor {
            line: 1,
            pushed_back: None,
        }
    }

    fn note_read(&mut self, byte: u8) {
        if byte == b'\n' {
            self.line += 1;
        }
    }

    fn note_unget(&mut self, byte: u8) {
        if byte == b'\n' {
            self.line = self.line.saturating_sub(1);
        }
    }
}

pub struct FileSource {
    name: String,
    file: Option<File>,
    cursor: Cursor,
}

impl FileSource {
    pub fn new(path: impl Into<String>) -> FileSource {
        FileSource {
            name: path.into(),
            file: None,
            cursor: Cursor::new(),
        }
    }
}

impl CfgParserSource for FileSource {
    fn open(&mut self) -> Result<(), Diagnostic> {
        if self.file.is_some() {
            return Err(Diagnostic::generic("source already open"));
        }
        self.file = Some(
            File::open(&self.name)
                .map_err(|e| Diagnostic::generic(format!("failed to open file {}: {e}", self.name)))?,
        );
        self.cursor = Cursor::new();
        Ok(())
    }

    fn close(&mut self) -> Result<(), Diagnostic> {
        if self.file.take().is_none() {
            return Err(Diagnostic::generic("trying to close already closed source"));
        }
        Ok(())
    }

    fn get_char(&mut self) -> i32 {
        if let Some(byte) = self.cursor.pushed_back.take() {
            self.cursor.note_read(byte);
            return byte as i32;
        }
        let Some(file) = self.file.as_mut() else {
            return EOF;
        };
        let mut buf = [0u8; 1];
        match file.read(&mut buf) {
            Ok(1) => {
                self.cursor.note_read(buf[0]);
                buf[0] as i32
            }
            _ => EOF,
        }
    }

    fn unget_char(&mut self, c: i32) {
        if c == EOF {
            return;
        }
        let byte = c as u8;
        self.cursor.note_unget(byte);
        self.cursor.pushed_back = Some(byte);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::File
    }

    fn line(&self) -> u32 {
        self.cursor.line
    }
}

pub struct StringSource {
    name: String,
    data: Vec<u8>,
    pos: usize,
    cursor: Cursor,
}

impl StringSource {
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> StringSource {
        StringSource {
            name: name.into(),
            data: data.into().into_bytes(),
            pos: 0,
            cursor: Cursor::new(),
        }
    }
}

impl CfgParserSource for StringSource {
    fn open(&mut self) -> Result<(), Diagnostic> {
        self.pos = 0;
        self.cursor = Cursor::new();
        Ok(())
    }

    fn close(&mut self) -> Result<(), Diagnostic> {
        self.pos = self.data.len();
        Ok(())
    }

    fn get_char(&mut self) -> i32 {
        if let Some(byte) = self.cursor.pushed_back.take() {
            self.cursor.note_read(byte);
            return byte as i32;
        }
        if self.pos >= self.data.len() {
            return EOF;
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        self.cursor.note_read(byte);
        byte as i32
    }

    fn unget_char(&mut self, c: i32) {
        if c == EOF || self.pos == 0 {
            return;
        }
        let byte = c as u8;
        self.cursor.note_unget(byte);
        self.cursor.pushed_back = Some(byte);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::String
    }

    fn line(&self) -> u32 {
        self.cursor.line
    }
}

/// Process-wide count of currently open command sources, used to decide
/// whether `SIGCHLD` needs to be temporarily restored to its default
/// disposition. Blocking reads from a command's stdout pipe can otherwise be
/// interrupted (`EINTR`) by an ignored-but-still-delivered `SIGCHLD`.
static OPEN_COMMAND_SOURCES: AtomicU32 = AtomicU32::new(0);
static SAVED_SIGCHLD: std::sync::Mutex<Option<SigHandler>> = std::sync::Mutex::new(None);

fn command_source_opened() {
    if OPEN_COMMAND_SOURCES.fetch_add(1, Ordering::SeqCst) == 0 {
        // SAFETY: `sigaction` touches global process state; this runs only
        // while parsing is single-threaded on the main thread.
        let result = unsafe {
            signal::sigaction(
                Signal::SIGCHLD,
                &nix::sys::signal::SigAction::new(
                    SigHandler::SigDfl,
                    nix::sys::signal::SaFlags::empty(),
                    nix::sys::signal::SigSet::empty(),
                ),
            )
        };
        match result {
            Ok(old) => *SAVED_SIGCHLD.lock().unwrap() = Some(old.handler()),
            Err(e) => log::warn!("failed to reset SIGCHLD disposition: {e}"),
        }
    }
}

fn command_source_closed() {
    if OPEN_COMMAND_SOURCES.fetch_sub(1, Ordering::SeqCst) == 1 {
        if let Some(handler) = SAVED_SIGCHLD.lock().unwrap().take() {
            // SAFETY: see above.
            let _ = unsafe {
                signal::sigaction(
                    Signal::SIGCHLD,
                    &nix::sys::signal::SigAction::new(
                        handler,
                        nix::sys::signal::SaFlags::empty(),
                        nix::sys::signal::SigSet::empty(),
                    ),
                )
            };
        }
    }
}

pub struct CommandSource {
    name: String,
    command_path: String,
    child: Option<Child>,
    stdout: Option<std::process::ChildStdout>,
    cursor: Cursor,
}

impl CommandSource {
    pub fn new(command: impl Into<String>, command_path: impl Into<String>) -> CommandSource {
        CommandSource {
            name: command.into(),
            command_path: command_path.into(),
            child: None,
            stdout: None,
            cursor: Cursor::new(),
        }
    }
}

impl CfgParserSource for CommandSource {
    fn open(&mut self) -> Result<(), Diagnostic> {
        if self.child.is_some() {
            return Err(Diagnostic::generic("source already open"));
        }
        command_source_opened();

        let path = std::env::var("PATH").unwrap_or_default();
        let path = format!("{}:{}", self.command_path, path);

        let mut child = match Command::new("/bin/sh")
            .arg("-c")
            .arg(&self.name)
            .env("PATH", path)
            .stdout(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                command_source_closed();
                return Err(Diagnostic::generic(format!(
                    "failed to run command {}: {e}",
                    self.name
                )));
            }
        };
        self.stdout = child.stdout.take();
        self.child = Some(child);
        self.cursor = Cursor::new();
        Ok(())
    }

    fn close(&mut self) -> Result<(), Diagnostic> {
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return Err(Diagnostic::generic("trying to close already closed source"));
        };
        let status = child.wait();
        command_source_closed();
        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(Diagnostic::generic(format!(
                "command {} exited with {status}",
                self.name
            ))),
            Err(e) => Err(Diagnostic::generic(format!(
                "failed to wait for command {}: {e}",
                self.name
            ))),
        }
    }

    fn get_char(&mut self) -> i32 {
        if let Some(byte) = self.cursor.pushed_back.take() {
            self.cursor.note_read(byte);
            return byte as i32;
        }
        let Some(stdout) = self.stdout.as_mut() else {
            return EOF;
        };
        let mut buf = [0u8; 1];
        match stdout.read(&mut buf) {
            Ok(1) => {
                self.cursor.note_read(buf[0]);
                buf[0] as i32
            }
            _ => EOF,
        }
    }

    fn unget_char(&mut self, c: i32) {
        if c == EOF {
            return;
        }
        let byte = c as u8;
        self.cursor.note_unget(byte);
        self.cursor.pushed_back = Some(byte);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        SourceType::Command
    }

    fn line(&self) -> u32 {
        self.cursor.line
    }

    fn is_dynamic(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_source_roundtrips_pushback() {
        let mut s = StringSource::new("<test>", "ab\nc");
        s.open().unwrap();
        assert_eq!(s.get_char(), b'a' as i32);
        assert_eq!(s.get_char(), b'b' as i32);
        assert_eq!(s.get_char(), b'\n' as i32);
        assert_eq!(s.line(), 2);
        s.unget_char(b'\n' as i32);
        assert_eq!(s.line(), 1);
        assert_eq!(s.get_char(), b'\n' as i32);
        assert_eq!(s.line(), 2);
        assert_eq!(s.get_char(), b'c' as i32);
        assert_eq!(s.get_char(), EOF);
    }

    #[test]
    fn file_source_rejects_double_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.cfg");
        std::fs::write(&path, "x").unwrap();
        let mut s = FileSource::new(path.to_str().unwrap());
        s.open().unwrap();
        assert!(s.open().is_err());
    }

    #[test]
    fn file_source_missing_path_errors() {
        let mut s = FileSource::new("/nonexistent/path/for/pekwm/test");
        assert!(s.open().is_err());
    }

    #[test]
    fn command_source_reads_stdout_and_reaps_exit_code() {
        let mut s = CommandSource::new("echo hello", "");
        s.open().unwrap();
        let mut out = Vec::new();
        loop {
            let c = s.get_char();
            if c == EOF {
                break;
            }
            out.push(c as u8);
        }
        assert_eq!(String::from_utf8(out).unwrap(), "hello\n");
        assert!(s.close().is_ok());
    }

    #[test]
    fn command_source_propagates_nonzero_exit() {
        let mut s = CommandSource::new("exit 3", "");
        s.open().unwrap();
        while s.get_char() != EOF {}
        assert!(s.close().is_err());
    }
}
