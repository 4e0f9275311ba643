//! The parsed configuration tree.
//!
//! A [`CfgParser`](crate::parser::CfgParser) produces a tree of [`Entry`]
//! nodes. Each entry is either a *leaf* (`name = "value"`) or a
//! *section-valued* entry (`name = "value" { ... }`), where the section owns
//! an ordered list of child entries. Entries never point back at their
//! parent — traversal only ever goes downward from the root, so the parser
//! keeps parent context on an explicit section stack instead (see
//! `parser::Scope`).

/// A single node in the parsed configuration tree.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub name: String,
    pub value: String,
    pub source_name: String,
    pub line: u32,
    pub children: Vec<Entry>,
    pub section: Option<Box<Entry>>,
}

impl Entry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Entry {
        Entry {
            name: name.into(),
            value: value.into(),
            source_name: String::new(),
            line: 0,
            children: Vec::new(),
            section: None,
        }
    }

    pub fn root() -> Entry {
        Entry::new("ROOT", "")
    }

    pub fn with_location(mut self, source_name: impl Into<String>, line: u32) -> Entry {
        self.source_name = source_name.into();
        self.line = line;
        self
    }

    /// True for entries with no section (and thus no children living under
    /// `section`). Note: the *root* entry itself stores children directly,
    /// see [`Entry::is_section`].
    pub fn is_leaf(&self) -> bool {
        self.section.is_none()
    }

    pub fn is_section(&self) -> bool {
        self.section.is_some()
    }

    /// Children of this entry: either the owning section's children, or (for
    /// the synthetic root) its own `children` list.
    pub fn entries(&self) -> &[Entry] {
        match &self.section {
            Some(section) => &section.children,
            None => &self.children,
        }
    }

    pub fn entries_mut(&mut self) -> &mut Vec<Entry> {
        match &mut self.section {
            Some(section) => &mut section.children,
            None => &mut self.children,
        }
    }

    /// Case-insensitive name equality, used for every lookup.
    pub fn name_eq(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Return the first child entry whose name matches, case-insensitively.
    pub fn find_entry(&self, name: &str) -> Option<&Entry> {
        self.entries().iter().find(|e| e.name_eq(name))
    }

    pub fn find_entry_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.entries_mut().iter_mut().find(|e| e.name_eq(name))
    }

    /// Append a leaf or section entry. If `overwrite` is set and an entry of
    /// the same name (and, for sections, the same case-insensitive label)
    /// already exists, merge into it instead of appending a duplicate.
    ///
    /// Overwrite semantics for sections are deliberately conservative: a
    /// section is only merged into an existing one when both the name *and*
    /// the section label match case-insensitively. This preserves the
    /// ability to have e.g. multiple `Frame = "1"{ ... }` sections with
    /// distinct labels that do not clobber one another.
    pub fn push_entry(&mut self, new_entry: Entry, overwrite: bool) {
        if overwrite {
            let is_section = new_entry.is_section();
            let existing = self.entries_mut().iter_mut().find(|e| {
                e.name_eq(&new_entry.name)
                    && (!is_section || e.value.eq_ignore_ascii_case(&new_entry.value))
            });
            if let Some(existing) = existing {
                existing.value = new_entry.value;
                existing.source_name = new_entry.source_name;
                existing.line = new_entry.line;
                match (&mut existing.section, new_entry.section) {
                    (Some(old_section), Some(new_section)) => {
                        old_section.children.extend(new_section.children);
                    }
                    (existing_section @ None, Some(new_section)) => {
                        *existing_section = Some(new_section);
                    }
                    _ => {}
                }
                return;
            }
        }
        self.entries_mut().push(new_entry);
    }

    /// Deep copy `self` (used to materialise template expansions and to
    /// implement `copyTreeInto` semantics: the copy is wholly independent of
    /// the source, so later mutation of one never touches the other).
    pub fn deep_clone(&self) -> Entry {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_lookup_is_case_insensitive() {
        let mut root = Entry::root();
        root.push_entry(Entry::new("Foo", "bar"), false);
        assert!(root.find_entry("foo").is_some());
        assert!(root.find_entry("FOO").is_some());
        assert_eq!(root.find_entry("foo").unwrap().value, "bar");
    }

    #[test]
    fn push_entry_appends_duplicates_without_overwrite() {
        let mut root = Entry::root();
        root.push_entry(Entry::new("k", "1"), false);
        root.push_entry(Entry::new("k", "2"), false);
        assert_eq!(root.entries().len(), 2);
        assert_eq!(root.find_entry("k").unwrap().value, "1");
    }

    #[test]
    fn push_entry_overwrite_replaces_leaf_value() {
        let mut root = Entry::root();
        root.push_entry(Entry::new("k", "1"), false);
        root.push_entry(Entry::new("k", "2"), true);
        assert_eq!(root.entries().len(), 1);
        assert_eq!(root.find_entry("k").unwrap().value, "2");
    }

    #[test]
    fn push_entry_overwrite_merges_same_label_sections() {
        let mut root = Entry::root();
        let mut s1 = Entry::new("S", "label");
        s1.section = Some(Box::new(Entry::new("", "label")));
        s1.section.as_mut().unwrap().children.push(Entry::new("a", "1"));
        root.push_entry(s1, true);

        let mut s2 = Entry::new("S", "label");
        s2.section = Some(Box::new(Entry::new("", "label")));
        s2.section.as_mut().unwrap().children.push(Entry::new("b", "2"));
        root.push_entry(s2, true);

        assert_eq!(root.entries().len(), 1);
        let merged = root.find_entry("S").unwrap();
        assert_eq!(merged.entries().len(), 2);
    }

    #[test]
    fn push_entry_overwrite_keeps_distinct_labels_separate() {
        let mut root = Entry::root();
        let mut s1 = Entry::new("S", "one");
        s1.section = Some(Box::new(Entry::new("", "one")));
        root.push_entry(s1, true);

        let mut s2 = Entry::new("S", "two");
        s2.section = Some(Box::new(Entry::new("", "two")));
        root.push_entry(s2, true);

        assert_eq!(root.entries().len(), 2);
    }

    #[test]
    fn deep_clone_is_independent() {
        let mut root = Entry::root();
        root.push_entry(Entry::new("k", "1"), false);
        let mut clone = root.deep_clone();
        clone.find_entry_mut("k").unwrap().value = "2".into();
        assert_eq!(root.find_entry("k").unwrap().value, "1");
        assert_eq!(clone.find_entry("k").unwrap().value, "2");
    }
}
