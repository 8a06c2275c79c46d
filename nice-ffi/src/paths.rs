//! # Library Search Paths
//!
//! A [`PathSet`] holds two ordered maps, `paths` and `files`. Both are keyed
//! by a regular expression matched against the operating system name
//! (`std::env::consts::OS`, e.g. `linux`, `macos`, `windows`, `freebsd`).
//!
//! - `paths` values are directories to search, in order.
//! - `files` values are file name templates. `[NAME]` is replaced by the
//!   library name, so `lib[NAME].so` becomes `libSDL_ttf.so`.
//!
//! [`PathSet::find`] combines every matching directory with every matching
//! template and every requested name, and keeps the files that exist.
//!
//! ```rust
//! use nice_ffi::PathSet;
//!
//! let set = PathSet::new()
//!     .with_paths("linux", ["/opt/a/", "/opt/b/"])
//!     .unwrap()
//!     .with_files("linux", ["lib[NAME].so"])
//!     .unwrap();
//!
//! let candidates = set.candidates_for("linux", &["foo"]).unwrap();
//! assert_eq!(candidates.len(), 2);
//! assert!(candidates[0].ends_with("libfoo.so"));
//! ```

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{FfiError, FfiResult};

/// Placeholder replaced by the library name in file templates.
pub const NAME_PLACEHOLDER: &str = "[NAME]";

/// Selects one half of a [`PathSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    /// Directory templates.
    Paths,
    /// File name templates.
    Files,
}

/// A compiled OS pattern. Two patterns are the same key iff their sources match.
#[derive(Clone)]
pub struct OsPattern {
    regex: Regex,
}

impl OsPattern {
    /// Compile `pattern`.
    pub fn new(pattern: &str) -> FfiResult<Self> {
        let regex = Regex::new(pattern).map_err(|source| FfiError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self { regex })
    }

    /// Pattern source text.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Check if the pattern matches `os`.
    pub fn matches(&self, os: &str) -> bool {
        self.regex.is_match(os)
    }
}

impl PartialEq for OsPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for OsPattern {}

impl fmt::Debug for OsPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/", self.as_str())
    }
}

/// Ordered map from OS pattern to templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rules {
    entries: Vec<(OsPattern, Vec<String>)>,
}

impl Rules {
    /// Number of OS keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no OS keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Templates registered for exactly `pattern`.
    pub fn get(&self, pattern: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(p, _)| p.as_str() == pattern)
            .map(|(_, v)| v.as_slice())
    }

    /// OS patterns in insertion order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(p, _)| p.as_str())
    }

    /// Every template whose pattern matches `os`, in key order.
    pub fn matching(&self, os: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(p, _)| p.matches(os))
            .flat_map(|(_, v)| v.iter().map(String::as_str))
            .collect()
    }

    /// Combine `other` into these rules key by key.
    fn merge<F>(&mut self, other: &Rules, op: F)
    where
        F: Fn(&[String], &[String]) -> Vec<String>,
    {
        for (pattern, theirs) in &other.entries {
            let ours = self.get(pattern.as_str()).map(<[String]>::to_vec).unwrap_or_default();
            self.apply(pattern.clone(), op(&ours, theirs));
        }
    }

    /// Combine `templates` into the templates of every existing key.
    fn merge_all<F>(&mut self, templates: &[String], op: F)
    where
        F: Fn(&[String], &[String]) -> Vec<String>,
    {
        let patterns: Vec<OsPattern> = self.entries.iter().map(|(p, _)| p.clone()).collect();
        for pattern in patterns {
            let ours = self.get(pattern.as_str()).map(<[String]>::to_vec).unwrap_or_default();
            self.apply(pattern, op(&ours, templates));
        }
    }

    /// Store `result` under `pattern`; an empty result deletes the key.
    fn apply(&mut self, pattern: OsPattern, result: Vec<String>) {
        let existing = self.entries.iter().position(|(p, _)| *p == pattern);
        match (existing, result.is_empty()) {
            (Some(i), true) => {
                self.entries.remove(i);
            }
            (Some(i), false) => self.entries[i].1 = result,
            (None, true) => {}
            (None, false) => self.entries.push((pattern, result)),
        }
    }

    fn delete(&mut self, pattern: &str) {
        self.entries.retain(|(p, _)| p.as_str() != pattern);
    }
}

fn append(a: &[String], b: &[String]) -> Vec<String> {
    a.iter().chain(b).cloned().collect()
}

fn prepend(a: &[String], b: &[String]) -> Vec<String> {
    b.iter().chain(a).cloned().collect()
}

fn replace(_: &[String], b: &[String]) -> Vec<String> {
    b.to_vec()
}

fn remove(a: &[String], b: &[String]) -> Vec<String> {
    a.iter().filter(|t| !b.contains(t)).cloned().collect()
}

/// OS-keyed directory and file name templates used to locate libraries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSet {
    paths: Rules,
    files: Rules,
}

impl PathSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default directories and templates for Linux/BSD, macOS and Windows.
    pub fn defaults() -> Self {
        let mut set = Self::new();
        let defaults: [(Part, &str, &[&str]); 6] = [
            (Part::Paths, "linux|bsd", &["/usr/local/lib/", "/usr/lib/"]),
            (
                Part::Paths,
                "macos|darwin",
                &[
                    "/usr/local/lib/",
                    "/sw/lib/",
                    "/opt/local/lib/",
                    "~/Library/Frameworks/",
                    "/Library/Frameworks/",
                ],
            ),
            (
                Part::Paths,
                "windows|win32",
                &["C:\\windows\\system32\\", "C:\\windows\\system\\"],
            ),
            (Part::Files, "linux|bsd", &["lib[NAME].so"]),
            (
                Part::Files,
                "macos|darwin",
                &["lib[NAME].dylib", "[NAME].framework/[NAME]"],
            ),
            (Part::Files, "windows|win32", &["[NAME].dll"]),
        ];
        for (part, pattern, templates) in defaults {
            // Patterns above are literals known to compile.
            if let Ok(pattern) = OsPattern::new(pattern) {
                set.rules_mut(part)
                    .apply(pattern, templates.iter().map(|t| t.to_string()).collect());
            }
        }
        set
    }

    /// Add directory templates for `pattern`, after any existing ones.
    pub fn with_paths<I, S>(mut self, pattern: &str, templates: I) -> FfiResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(Part::Paths, pattern, templates)?;
        Ok(self)
    }

    /// Add file name templates for `pattern`, after any existing ones.
    pub fn with_files<I, S>(mut self, pattern: &str, templates: I) -> FfiResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(Part::Files, pattern, templates)?;
        Ok(self)
    }

    fn add<I, S>(&mut self, part: Part, pattern: &str, templates: I) -> FfiResult<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pattern = OsPattern::new(pattern)?;
        let templates: Vec<String> = templates.into_iter().map(Into::into).collect();
        let ours = self
            .rules(part)
            .get(pattern.as_str())
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        self.rules_mut(part).apply(pattern, append(&ours, &templates));
        Ok(self)
    }

    /// Directory templates.
    pub fn paths(&self) -> &Rules {
        &self.paths
    }

    /// File name templates.
    pub fn files(&self) -> &Rules {
        &self.files
    }

    /// One half of the set.
    pub fn rules(&self, part: Part) -> &Rules {
        match part {
            Part::Paths => &self.paths,
            Part::Files => &self.files,
        }
    }

    fn rules_mut(&mut self, part: Part) -> &mut Rules {
        match part {
            Part::Paths => &mut self.paths,
            Part::Files => &mut self.files,
        }
    }

    /// Add `other`'s templates after ours, per OS key.
    pub fn append(&mut self, other: &PathSet) -> &mut Self {
        self.combine(other, append)
    }

    /// Add `other`'s templates before ours, per OS key.
    pub fn prepend(&mut self, other: &PathSet) -> &mut Self {
        self.combine(other, prepend)
    }

    /// Replace our templates with `other`'s for every OS key `other` has.
    pub fn replace(&mut self, other: &PathSet) -> &mut Self {
        self.combine(other, replace)
    }

    /// Remove `other`'s templates from ours, per OS key.
    pub fn remove(&mut self, other: &PathSet) -> &mut Self {
        self.combine(other, remove)
    }

    /// Like [`append`](Self::append), restricted to one part.
    pub fn append_part(&mut self, part: Part, other: &PathSet) -> &mut Self {
        self.rules_mut(part).merge(other.rules(part), append);
        self
    }

    /// Like [`prepend`](Self::prepend), restricted to one part.
    pub fn prepend_part(&mut self, part: Part, other: &PathSet) -> &mut Self {
        self.rules_mut(part).merge(other.rules(part), prepend);
        self
    }

    /// Like [`replace`](Self::replace), restricted to one part.
    pub fn replace_part(&mut self, part: Part, other: &PathSet) -> &mut Self {
        self.rules_mut(part).merge(other.rules(part), replace);
        self
    }

    /// Like [`remove`](Self::remove), restricted to one part.
    pub fn remove_part(&mut self, part: Part, other: &PathSet) -> &mut Self {
        self.rules_mut(part).merge(other.rules(part), remove);
        self
    }

    /// Put `dirs` in front of the directories of every OS key.
    pub fn prepend_paths<I, P>(&mut self, dirs: I) -> &mut Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let dirs: Vec<String> = dirs
            .into_iter()
            .map(|d| d.as_ref().to_string_lossy().into_owned())
            .collect();
        self.paths.merge_all(&dirs, prepend);
        self
    }

    /// Remove `templates` from every OS key of one part.
    pub fn remove_all<I, S>(&mut self, part: Part, templates: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let templates: Vec<String> = templates.into_iter().map(Into::into).collect();
        self.rules_mut(part).merge_all(&templates, remove);
        self
    }

    /// Delete every entry for `pattern` from both parts.
    pub fn delete(&mut self, pattern: &str) -> &mut Self {
        self.paths.delete(pattern);
        self.files.delete(pattern);
        self
    }

    fn combine<F>(&mut self, other: &PathSet, op: F) -> &mut Self
    where
        F: Fn(&[String], &[String]) -> Vec<String> + Copy,
    {
        self.paths.merge(&other.paths, op);
        self.files.merge(&other.files, op);
        self
    }

    /// Existing files for `names` on the current OS.
    pub fn find<S: AsRef<str>>(&self, names: &[S]) -> FfiResult<Vec<PathBuf>> {
        self.find_for(env::consts::OS, names)
    }

    /// Existing files for `names` on `os`.
    pub fn find_for<S: AsRef<str>>(&self, os: &str, names: &[S]) -> FfiResult<Vec<PathBuf>> {
        Ok(self
            .candidates_for(os, names)?
            .into_iter()
            .filter(|p| p.exists())
            .collect())
    }

    /// Every candidate path for `names` on `os`, existing or not, ordered by
    /// directory, then template, then name.
    pub fn candidates_for<S: AsRef<str>>(&self, os: &str, names: &[S]) -> FfiResult<Vec<PathBuf>> {
        let paths = self.paths.matching(os);
        let files = self.files.matching(os);
        if paths.is_empty() && files.is_empty() {
            return Err(FfiError::UnsupportedPlatform { os: os.to_string() });
        }

        let mut candidates = Vec::with_capacity(paths.len() * files.len() * names.len());
        for dir in &paths {
            for file in &files {
                for name in names {
                    let dir = expand_home(&dir.replace(NAME_PLACEHOLDER, name.as_ref()));
                    candidates.push(dir.join(file.replace(NAME_PLACEHOLDER, name.as_ref())));
                }
            }
        }
        Ok(candidates)
    }
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with(['/', '\\']) => rest,
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
        None => PathBuf::from(path),
    }
}
