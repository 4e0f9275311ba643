//! `CfgParser` — the recursive, variable-expanding, include/command
//! substituting configuration parser.
//!
//! The scanner is a single-pass, character-at-a-time state machine (see
//! [`Scanner`]) that feeds a small accumulator; finalisation rules turn an
//! accumulated `(name, value)` pair into an [`Entry`], a variable
//! definition, an include/command directive, a template definition, or a
//! template reference. Variable expansion and diagnostics are kept local to
//! the operation that triggers them — nothing here ever unwinds across a
//! parse.

use crate::entry::Entry;
use crate::error::Diagnostic;
use crate::expander::{Expander, MemExpander};
use crate::source::{CfgParserSource, CommandSource, FileSource, StringSource, EOF};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Options governing a single parse. `command_path` is prefixed onto `PATH`
/// for any `COMMAND = "..."` child processes; `early_end_key`, when set,
/// stops the whole parse (all sources, not just the innermost) as soon as a
/// section with that name is closed.
pub struct ParserOptions {
    pub command_path: String,
    pub early_end_key: Option<String>,
    pub register_x_resource: bool,
}

impl Default for ParserOptions {
    fn default() -> ParserOptions {
        ParserOptions {
            command_path: String::new(),
            early_end_key: None,
            register_x_resource: false,
        }
    }
}

type SectionPath = Vec<usize>;

/// Where a currently-open section's children are being accumulated: either
/// directly in the real tree rooted at `self.root`, or in one of the
/// scratch roots used while a `DEFINE` block is being collected (its
/// content is never linked into the real tree — only stashed in
/// `self.templates` once the block closes).
enum Scope {
    Tree(SectionPath),
    Template(usize, SectionPath),
}

pub struct CfgParser {
    root: Entry,
    template_roots: Vec<Entry>,
    templates: HashMap<String, Entry>,
    mem: MemExpander,
    expanders: Vec<Box<dyn Expander>>,
    options: ParserOptions,
    diagnostics: Vec<Diagnostic>,
}

impl CfgParser {
    pub fn new(options: ParserOptions) -> CfgParser {
        CfgParser {
            root: Entry::root(),
            template_roots: Vec::new(),
            templates: HashMap::new(),
            mem: MemExpander::new(),
            expanders: Vec::new(),
            options,
            diagnostics: Vec::new(),
        }
    }

    /// Register an expander. Order matters: expanders are tried in
    /// registration order, so prefixed adapters (env/atom/resource) must be
    /// registered before anything that would otherwise shadow them.
    pub fn add_expander(&mut self, expander: Box<dyn Expander>) {
        self.expanders.push(expander);
    }

    pub fn root(&self) -> &Entry {
        &self.root
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.mem.set(name, value);
    }

    /// Look up a previously defined template by name (for tests / introspection).
    pub fn template(&self, name: &str) -> Option<&Entry> {
        self.templates.get(name)
    }

    fn warn(&mut self, source: &str, line: u32, message: impl Into<String>) {
        let d = Diagnostic::new(source, line, message);
        d.log_warn();
        self.diagnostics.push(d);
    }

    /// Parse a file on disk. Top-level entry point used by consumers (e.g.
    /// `~/.pekwm/config`).
    pub fn parse_file(&mut self, path: impl AsRef<Path>, overwrite: bool) -> bool {
        let source = FileSource::new(path.as_ref().to_string_lossy().into_owned());
        self.parse(Box::new(source), overwrite)
    }

    /// Parse an in-memory string, identified by `name` for diagnostics.
    pub fn parse_string(
        &mut self,
        name: impl Into<String>,
        data: impl Into<String>,
        overwrite: bool,
    ) -> bool {
        let source = StringSource::new(name, data);
        self.parse(Box::new(source), overwrite)
    }

    /// Drive the scanner over `source` (and transitively over any
    /// include/command directives it triggers) until the source stack is
    /// empty. Returns `true` on a structurally complete parse; partial trees
    /// are preserved even on `false`.
    pub fn parse(&mut self, source: Box<dyn CfgParserSource>, overwrite: bool) -> bool {
        let mut stack: Vec<Box<dyn CfgParserSource>> = vec![source];
        let mut scope_stack: Vec<Scope> = vec![Scope::Tree(Vec::new())];
        let mut ok = true;

        'outer: while let Some(mut current) = stack.pop() {
            if let Err(d) = current.open() {
                self.warn(current.name(), 0, d.message);
                ok = false;
                continue;
            }

            let mut scanner = Scanner::new();
            loop {
                let c = current.get_char();
                if c == EOF {
                    if scanner.in_string {
                        self.warn(
                            current.name(),
                            current.line(),
                            "unterminated string at end of file",
                        );
                        ok = false;
                    } else if scanner.has_content() {
                        self.finalize(
                            &mut scanner,
                            current.name(),
                            current.line(),
                            &mut scope_stack,
                            overwrite,
                            &mut stack,
                        );
                    }
                    let _ = current.close();
                    break;
                }

                match scanner.feed(c, &mut *current) {
                    ScanEvent::None => {}
                    ScanEvent::Finalize => {
                        if self.finalize(
                            &mut scanner,
                            current.name(),
                            current.line(),
                            &mut scope_stack,
                            overwrite,
                            &mut stack,
                        ) == FinalizeOutcome::EarlyEnd
                        {
                            let _ = current.close();
                            stack.clear();
                            break 'outer;
                        }
                    }
                    ScanEvent::OpenSection => {
                        self.open_section(
                            &mut scanner,
                            current.name(),
                            current.line(),
                            &mut scope_stack,
                            overwrite,
                        );
                    }
                    ScanEvent::CloseSection => {
                        if scope_stack.len() <= 1 {
                            self.warn(current.name(), current.line(), "unbalanced '}' ignored");
                            continue;
                        }
                        if self.close_section(&mut scope_stack) == FinalizeOutcome::EarlyEnd {
                            let _ = current.close();
                            stack.clear();
                            break 'outer;
                        }
                    }
                    ScanEvent::Error(msg) => {
                        self.warn(current.name(), current.line(), msg);
                        ok = false;
                    }
                }
            }
        }

        if scope_stack.len() != 1 {
            self.warn("", 0, "unbalanced '{' at end of parse");
            ok = false;
        }

        ok
    }

    fn entry_at_mut<'a>(&'a mut self, scope: &Scope) -> &'a mut Entry {
        match scope {
            Scope::Tree(path) => {
                let mut entry = &mut self.root;
                for &idx in path {
                    entry = &mut entry.entries_mut()[idx];
                }
                entry
            }
            Scope::Template(root_idx, path) => {
                let mut entry = &mut self.template_roots[*root_idx];
                for &idx in path {
                    entry = &mut entry.entries_mut()[idx];
                }
                entry
            }
        }
    }

    fn children_mut<'a>(&'a mut self, scope: &Scope) -> &'a mut Vec<Entry> {
        self.entry_at_mut(scope).entries_mut()
    }

    fn entry_at<'a>(&'a self, scope: &Scope) -> &'a Entry {
        match scope {
            Scope::Tree(path) => {
                let mut entry = &self.root;
                for &idx in path {
                    entry = &entry.entries()[idx];
                }
                entry
            }
            Scope::Template(root_idx, path) => {
                let mut entry = &self.template_roots[*root_idx];
                for &idx in path {
                    entry = &entry.entries()[idx];
                }
                entry
            }
        }
    }

    fn open_section(
        &mut self,
        scanner: &mut Scanner,
        source_name: &str,
        line: u32,
        scope_stack: &mut Vec<Scope>,
        overwrite: bool,
    ) {
        let label = self.expand(&scanner.value, source_name, line);
        let name = scanner.take_name();
        scanner.reset();

        if name.eq_ignore_ascii_case("DEFINE") {
            let root_idx = self.template_roots.len();
            self.template_roots.push(Entry::new("TEMPLATE", ""));
            scope_stack.push(Scope::Template(root_idx, Vec::new()));
            // The template name travels along on a side channel: stash it as
            // the scratch root's own value so close_section can retrieve it.
            self.template_roots[root_idx].value = label;
            return;
        }

        let mut new_entry =
            Entry::new(name, label.clone()).with_location(source_name, line);
        new_entry.section = Some(Box::new(Entry::new("", label)));

        let top = scope_stack.last().unwrap();
        let children = self.children_mut(top);
        children.push(new_entry);
        let new_index = children.len() - 1;

        let child_scope = match top {
            Scope::Tree(path) => {
                let mut p = path.clone();
                p.push(new_index);
                Scope::Tree(p)
            }
            Scope::Template(root_idx, path) => {
                let mut p = path.clone();
                p.push(new_index);
                Scope::Template(*root_idx, p)
            }
        };
        scope_stack.push(child_scope);
    }

    fn close_section(&mut self, scope_stack: &mut Vec<Scope>) -> FinalizeOutcome {
        let closed = scope_stack.pop().unwrap();
        match &closed {
            Scope::Tree(path) => {
                let closed_entry = self.entry_at(&closed);
                let closed_name = closed_entry.name.clone();
                if let Some(early) = &self.options.early_end_key {
                    if closed_name.eq_ignore_ascii_case(early) {
                        return FinalizeOutcome::EarlyEnd;
                    }
                }
                let _ = path;
            }
            Scope::Template(root_idx, path) if path.is_empty() => {
                let root = self.template_roots.remove(*root_idx);
                let name = root.value.clone();
                self.templates.insert(name, root);
                // Removing shifts later indices; any still-open Template
                // scopes referencing higher indices would be invalidated,
                // but DEFINE blocks cannot nest (checked on open), so no
                // other open scope ever holds a Template root index.
            }
            Scope::Template(_, _) => {}
        }
        FinalizeOutcome::Continue
    }

    /// Turn a finished `(name, value)` accumulation into a side effect:
    /// variable definition, include/command directive, template reference,
    /// or a plain leaf entry. Returns whether the early-end marker fired.
    fn finalize(
        &mut self,
        scanner: &mut Scanner,
        source_name: &str,
        line: u32,
        scope_stack: &mut Vec<Scope>,
        overwrite: bool,
        stack: &mut Vec<Box<dyn CfgParserSource>>,
    ) -> FinalizeOutcome {
        if !scanner.has_content() {
            scanner.reset();
            return FinalizeOutcome::Continue;
        }
        let name = scanner.take_name();
        let raw_value = std::mem::take(&mut scanner.value);
        let had_value = scanner.have_value;
        scanner.reset();

        if name.is_empty() {
            self.warn(source_name, line, "empty entry name dropped");
            return FinalizeOutcome::Continue;
        }

        // `@name` with no value attached is a template reference: splice a
        // deep copy of the named template's children into the current scope.
        if let Some(template_name) = name.strip_prefix('@') {
            if !had_value {
                let top_idx = scope_stack.len() - 1;
                match self.templates.get(template_name) {
                    Some(template) => {
                        let cloned_children = template.entries().to_vec();
                        let children = self.children_mut(&scope_stack[top_idx]);
                        children.extend(cloned_children);
                    }
                    None => {
                        self.warn(
                            source_name,
                            line,
                            format!("unknown template \"{template_name}\" referenced"),
                        );
                    }
                }
                return FinalizeOutcome::Continue;
            }
        }

        if let Some(var_name) = name.strip_prefix('$') {
            let value = self.expand(&raw_value, source_name, line);
            self.mem.set(var_name, value.clone());
            if let Some(env_name) = var_name.strip_prefix('_') {
                // SAFETY: single-threaded parse.
                unsafe { std::env::set_var(env_name, &value) };
            }
            return FinalizeOutcome::Continue;
        }

        match name.as_str() {
            "INCLUDE" => {
                let path = self.expand(&raw_value, source_name, line);
                match self.open_include(&path, source_name) {
                    Some(source) => stack.push(source),
                    None => {
                        self.warn(source_name, line, format!("failed to include \"{path}\""))
                    }
                }
                return FinalizeOutcome::Continue;
            }
            "COMMAND" => {
                let cmd = self.expand(&raw_value, source_name, line);
                stack.push(Box::new(CommandSource::new(
                    cmd,
                    self.options.command_path.clone(),
                )));
                return FinalizeOutcome::Continue;
            }
            _ => {}
        }

        let value = self.expand(&raw_value, source_name, line);
        let entry = Entry::new(name, value).with_location(source_name, line);
        let top_idx = scope_stack.len() - 1;
        match &scope_stack[top_idx] {
            Scope::Tree(_) => {
                let parent = self.entry_at_mut(&scope_stack[top_idx]);
                parent.push_entry(entry, overwrite);
            }
            Scope::Template(_, _) => {
                self.children_mut(&scope_stack[top_idx]).push(entry);
            }
        }
        FinalizeOutcome::Continue
    }

    fn open_include(&self, path: &str, current_source: &str) -> Option<Box<dyn CfgParserSource>> {
        let mut source = FileSource::new(path);
        if source.open().is_ok() {
            let _ = source.close();
            return Some(Box::new(FileSource::new(path)));
        }
        if !Path::new(path).is_absolute() {
            if let Some(dir) = Path::new(current_source).parent() {
                let joined: PathBuf = dir.join(path);
                let mut retry = FileSource::new(joined.to_string_lossy().into_owned());
                if retry.open().is_ok() {
                    let _ = retry.close();
                    return Some(Box::new(retry));
                }
            }
        }
        None
    }

    /// Expand `$name` / `${name}` references to a fixed point: repeat a
    /// single left-to-right pass until it produces no further replacement.
    pub fn expand(&mut self, input: &str, source_name: &str, line: u32) -> String {
        let mut current = input.to_owned();
        let mut guard = 0;
        loop {
            let (next, changed) = self.expand_once(&current, source_name, line);
            if !changed || guard > 64 {
                return next;
            }
            current = next;
            guard += 1;
        }
    }

    fn expand_once(&mut self, input: &str, source_name: &str, line: u32) -> (String, bool) {
        let bytes = input.as_bytes();
        let mut out = String::with_capacity(input.len());
        let mut changed = false;
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            if c == b'\\' && i + 1 < bytes.len() {
                if bytes[i + 1] == b'$' {
                    out.push('$');
                    i += 2;
                    continue;
                }
                out.push(bytes[i] as char);
                i += 1;
                continue;
            }
            if c != b'$' || i + 1 >= bytes.len() {
                out.push(c as char);
                i += 1;
                continue;
            }

            let rest = &input[i + 1..];
            let (name, consumed, braced_unterminated) = scan_var_name(rest);
            if braced_unterminated {
                self.warn(source_name, line, "unterminated variable reference");
                out.push('$');
                i += 1;
                continue;
            }
            if name.is_empty() {
                out.push('$');
                i += 1;
                continue;
            }

            let recognised = self.expanders.iter().any(|e| e.matches(&name));
            let mut found = false;
            let mut value = String::new();
            let mut err = String::new();
            for expander in &self.expanders {
                if !expander.matches(&name) {
                    continue;
                }
                let result = expander.lookup(&name);
                if result.found {
                    found = true;
                    value = result.value;
                } else {
                    err = result.error;
                }
                break;
            }
            if !found && !recognised {
                let result = self.mem.lookup(&name);
                if result.found {
                    found = true;
                    value = result.value;
                } else {
                    err = result.error;
                }
            }

            if found {
                out.push_str(&value);
                changed = true;
            } else if recognised {
                // A recognised prefix with no value expands to empty string.
                if !err.is_empty() {
                    self.warn(source_name, line, err);
                }
            } else {
                if !err.is_empty() {
                    self.warn(source_name, line, err);
                }
                out.push('$');
                out.push_str(&name);
            }
            i += 1 + consumed;
        }
        (out, changed)
    }
}

#[derive(PartialEq, Eq)]
enum FinalizeOutcome {
    Continue,
    EarlyEnd,
}

/// Scan a variable name starting right after the `$`. Returns
/// `(name, bytes_consumed, unterminated_braced)`.
fn scan_var_name(rest: &str) -> (String, usize, bool) {
    let bytes = rest.as_bytes();
    if bytes.is_empty() {
        return (String::new(), 0, false);
    }
    if bytes[0] == b'{' {
        if let Some(end) = rest.find('}') {
            return (rest[1..end].to_owned(), end + 1, false);
        }
        return (String::new(), rest.len(), true);
    }

    let mut i = 0;
    if matches!(bytes[0], b'@' | b'&') {
        i += 1;
    }
    let start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    if i == start && start > 0 {
        return (String::new(), 0, false);
    }
    (rest[..i].to_owned(), i, false)
}

/// Scanner state machine: accumulates a bareword/quoted name and an optional
/// quoted value, recognising the three comment forms, `;`/newline
/// finalisation, and `{`/`}` section transitions.
struct Scanner {
    buf: String,
    value: String,
    have_value: bool,
    in_string: bool,
    escape_next: bool,
    state: ScanState,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum ScanState {
    Name,
    LineComment,
    BlockComment,
    BlockCommentStar,
}

enum ScanEvent {
    None,
    Finalize,
    OpenSection,
    CloseSection,
    Error(String),
}

impl Scanner {
    fn new() -> Scanner {
        Scanner {
            buf: String::new(),
            value: String::new(),
            have_value: false,
            in_string: false,
            escape_next: false,
            state: ScanState::Name,
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.value.clear();
        self.have_value = false;
        self.in_string = false;
        self.escape_next = false;
        self.state = ScanState::Name;
    }

    fn has_content(&self) -> bool {
        !self.buf.trim().is_empty() || self.have_value
    }

    fn take_name(&mut self) -> String {
        parse_name(&self.buf)
    }

    /// Feed one byte from `src` into the scanner, possibly pulling
    /// additional bytes for lookahead (the newline-before-`{` rule) or to
    /// skip a block comment.
    fn feed(&mut self, c: i32, src: &mut dyn CfgParserSource) -> ScanEvent {
        let byte = c as u8;

        match self.state {
            ScanState::LineComment => {
                if byte == b'\n' {
                    src.unget_char(c);
                    self.state = ScanState::Name;
                }
                return ScanEvent::None;
            }
            ScanState::BlockComment => {
                if byte == b'*' {
                    self.state = ScanState::BlockCommentStar;
                }
                return ScanEvent::None;
            }
            ScanState::BlockCommentStar => {
                if byte == b'/' {
                    self.state = ScanState::Name;
                } else if byte != b'*' {
                    self.state = ScanState::BlockComment;
                }
                return ScanEvent::None;
            }
            ScanState::Name => {}
        }

        if self.in_string {
            if self.escape_next {
                self.escape_next = false;
                match byte {
                    b'\n' => {}
                    other => self.value.push(other as char),
                }
                return ScanEvent::None;
            }
            match byte {
                b'\\' => {
                    self.escape_next = true;
                }
                b'"' => {
                    self.in_string = false;
                }
                _ => self.value.push(byte as char),
            }
            return ScanEvent::None;
        }

        match byte {
            b'#' => {
                self.state = ScanState::LineComment;
                return ScanEvent::None;
            }
            b'/' => {
                let next = src.get_char();
                if next == '/' as i32 {
                    self.state = ScanState::LineComment;
                    return ScanEvent::None;
                } else if next == '*' as i32 {
                    self.state = ScanState::BlockComment;
                    return ScanEvent::None;
                }
                src.unget_char(next);
            }
            b'"' => {
                self.in_string = true;
                self.have_value = true;
                return ScanEvent::None;
            }
            b';' => return ScanEvent::Finalize,
            b'{' => return ScanEvent::OpenSection,
            b'}' => return ScanEvent::CloseSection,
            b'\n' => {
                let mut skipped = Vec::new();
                loop {
                    let next = src.get_char();
                    if next == EOF {
                        break;
                    }
                    if next == b' ' as i32 || next == b'\t' as i32 || next == b'\n' as i32 {
                        skipped.push(next);
                        continue;
                    }
                    if next == b'{' as i32 {
                        for s in skipped.into_iter().rev() {
                            src.unget_char(s);
                        }
                        return ScanEvent::None;
                    }
                    for s in skipped.into_iter().rev() {
                        src.unget_char(s);
                    }
                    src.unget_char(next);
                    break;
                }
                return ScanEvent::Finalize;
            }
            _ => {}
        }

        self.buf.push(byte as char);
        ScanEvent::None
    }
}

/// Parse a bareword or quoted name out of the raw accumulator text.
fn parse_name(raw: &str) -> String {
    let trimmed = raw.trim_start();
    if let Some(rest) = trimmed.strip_prefix('"') {
        let mut out = String::new();
        let mut escape = false;
        for c in rest.chars() {
            if escape {
                out.push(c);
                escape = false;
                continue;
            }
            match c {
                '\\' => escape = true,
                '"' => break,
                _ => out.push(c),
            }
        }
        out
    } else {
        trimmed.split_whitespace().next().unwrap_or("").to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expander::EnvExpander;

    fn parser() -> CfgParser {
        let mut p = CfgParser::new(ParserOptions::default());
        p.add_expander(Box::new(EnvExpander));
        p
    }

    #[test]
    fn parses_simple_leaf() {
        let mut p = parser();
        assert!(p.parse_string("<test>", "a = \"1\"\n", false));
        assert_eq!(p.root().find_entry("a").unwrap().value, "1");
    }

    #[test]
    fn parses_section() {
        let mut p = parser();
        assert!(p.parse_string("<test>", "S = \"label\" {\n k = \"v\"\n}\n", false));
        let s = p.root().find_entry("S").unwrap();
        assert_eq!(s.value, "label");
        assert_eq!(s.find_entry("k").unwrap().value, "v");
    }

    #[test]
    fn newline_before_brace_does_not_finalize() {
        let mut p = parser();
        assert!(p.parse_string("<test>", "S\n{\n k = \"v\"\n}\n", false));
        let s = p.root().find_entry("S").unwrap();
        assert_eq!(s.find_entry("k").unwrap().value, "v");
    }

    #[test]
    fn semicolon_terminates_entries_on_one_line() {
        let mut p = parser();
        assert!(p.parse_string("<test>", "a = \"1\"; b = \"2\";", false));
        assert_eq!(p.root().find_entry("a").unwrap().value, "1");
        assert_eq!(p.root().find_entry("b").unwrap().value, "2");
    }

    #[test]
    fn line_comment_preserves_terminating_newline() {
        let mut p = parser();
        assert!(p.parse_string("<test>", "a = \"1\" # comment\nb = \"2\"\n", false));
        assert_eq!(p.root().find_entry("a").unwrap().value, "1");
        assert_eq!(p.root().find_entry("b").unwrap().value, "2");
    }

    #[test]
    fn block_comment_is_skipped() {
        let mut p = parser();
        assert!(p.parse_string("<test>", "a = /* x */ \"1\"\n", false));
        assert_eq!(p.root().find_entry("a").unwrap().value, "1");
    }

    #[test]
    fn empty_name_is_dropped_with_warning() {
        let mut p = parser();
        let ok = p.parse_string("<test>", "= \"1\"\n", false);
        assert!(ok);
        assert!(p.root().entries().is_empty());
        assert!(!p.diagnostics().is_empty());
    }

    #[test]
    fn variable_expansion_nested_braces_and_env_precedence() {
        let mut p = parser();
        unsafe { std::env::set_var("HOME", "/real") };
        let ok = p.parse_string(
            "<test>",
            "$x = \"outer\"\n$_HOME = \"/fake\"\na = \"$x/${x}/$_HOME\"\n",
            false,
        );
        assert!(ok);
        assert_eq!(p.root().find_entry("a").unwrap().value, "outer/outer//fake");
    }

    #[test]
    fn overwrite_replaces_leaf_value() {
        let mut p = parser();
        p.parse_string("<test>", "a = \"1\"\n", false);
        p.parse_string("<test>", "a = \"2\"\n", true);
        assert_eq!(p.root().find_entry("a").unwrap().value, "2");
        assert_eq!(p.root().entries().len(), 1);
    }

    #[test]
    fn unbalanced_close_brace_is_dropped_with_warning() {
        let mut p = parser();
        let ok = p.parse_string("<test>", "a = \"1\"\n}\n", false);
        assert!(ok);
        assert!(!p.diagnostics().is_empty());
        assert_eq!(p.root().find_entry("a").unwrap().value, "1");
    }

    #[test]
    fn missing_include_warns_but_continues() {
        let mut p = parser();
        let ok = p.parse_string(
            "<test>",
            "INCLUDE = \"/no/such/file/pekwm.cfg\"\nk = \"after\"\n",
            false,
        );
        assert!(ok);
        assert!(!p.diagnostics().is_empty());
        assert_eq!(p.root().find_entry("k").unwrap().value, "after");
    }

    #[test]
    fn command_source_output_is_parsed() {
        let mut p = parser();
        let ok = p.parse_string("<test>", "COMMAND = \"echo 'k = \\\"v\\\"'\"\n", false);
        assert!(ok);
        assert_eq!(p.root().find_entry("k").unwrap().value, "v");
    }

    #[test]
    fn escape_sequences_in_values() {
        let mut p = parser();
        p.parse_string("<test>", "a = \"back\\\\slash and \\\"quote\\\"\"\n", false);
        assert_eq!(
            p.root().find_entry("a").unwrap().value,
            "back\\slash and \"quote\""
        );
    }

    #[test]
    fn define_registers_template_without_touching_tree() {
        let mut p = parser();
        let ok = p.parse_string(
            "<test>",
            "DEFINE = \"Tpl\" {\n k = \"v\"\n}\n",
            false,
        );
        assert!(ok);
        assert!(p.root().entries().is_empty());
        assert!(p.template("Tpl").is_some());
        assert_eq!(p.template("Tpl").unwrap().find_entry("k").unwrap().value, "v");
    }

    #[test]
    fn template_reference_splices_clone_into_current_section() {
        let mut p = parser();
        let ok = p.parse_string(
            "<test>",
            "DEFINE = \"Tpl\" {\n k = \"v\"\n}\nS = \"label\" {\n @Tpl\n}\n",
            false,
        );
        assert!(ok);
        let s = p.root().find_entry("S").unwrap();
        assert_eq!(s.find_entry("k").unwrap().value, "v");
    }

    #[test]
    fn unknown_template_reference_warns_but_continues() {
        let mut p = parser();
        let ok = p.parse_string("<test>", "@NoSuchTemplate\nk = \"after\"\n", false);
        assert!(ok);
        assert!(!p.diagnostics().is_empty());
        assert_eq!(p.root().find_entry("k").unwrap().value, "after");
    }
}
