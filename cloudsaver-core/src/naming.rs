//! On-disk naming grammar for saves and fragments.
//!
//! ```text
//! <name>.<ext>                  whole save (a fragment set of one)
//! <name>.firstof.<N>.<ext>      first fragment of N (N >= 2)
//! <name>.partidx.<k>.<ext>      fragment k of N (2 <= k <= N)
//! ```
//!
//! `<name>` never contains `.`. Files that do not end in `.<ext>` are not
//! saves at all and parse to `None`; files that end in `.<ext>` but break the
//! grammar are a [`NameError`] so callers can surface them instead of
//! mistaking them for whole saves.
//!
//! Autosaves are saves whose name starts with the configured prefix. The game
//! writes `<prefix><digits>`; those are promoted to
//! `<prefix>-<YYYYMMDDTHHMMSS±hhmm>` so that history sorts by name.

use chrono::{DateTime, FixedOffset};

use crate::error::NameError;
use crate::types::SaveName;

const FIRST_TAG: &str = "firstof";
const PART_TAG: &str = "partidx";

/// Suffix appended to a target file name while it is being written.
pub const TEMP_SUFFIX: &str = ".cloudsaver.tmp";

/// `chrono` format of the timestamp embedded in promoted autosave names.
pub const AUTOSAVE_STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%z";

// ---------------------------------------------------------------------------
// Fragment names
// ---------------------------------------------------------------------------

/// Parsed identity of one file in a save directory or fragment store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentName {
    Whole(SaveName),
    First { name: SaveName, count: u32 },
    Part { name: SaveName, index: u32 },
}

impl FragmentName {
    /// Name of fragment `index` (1-based) in a set of `count`.
    pub fn for_index(name: &SaveName, index: u32, count: u32) -> Self {
        match (count, index) {
            (0 | 1, _) => FragmentName::Whole(name.clone()),
            (_, 1) => FragmentName::First {
                name: name.clone(),
                count,
            },
            _ => FragmentName::Part {
                name: name.clone(),
                index,
            },
        }
    }

    pub fn save_name(&self) -> &SaveName {
        match self {
            FragmentName::Whole(name)
            | FragmentName::First { name, .. }
            | FragmentName::Part { name, .. } => name,
        }
    }

    /// 1-based position within the set.
    pub fn index(&self) -> u32 {
        match self {
            FragmentName::Whole(_) | FragmentName::First { .. } => 1,
            FragmentName::Part { index, .. } => *index,
        }
    }

    /// Set size announced by this member; parts do not announce one.
    pub fn declared_count(&self) -> Option<u32> {
        match self {
            FragmentName::Whole(_) => Some(1),
            FragmentName::First { count, .. } => Some(*count),
            FragmentName::Part { .. } => None,
        }
    }

    pub fn file_name(&self, ext: &str) -> String {
        match self {
            FragmentName::Whole(name) => format!("{name}.{ext}"),
            FragmentName::First { name, count } => format!("{name}.{FIRST_TAG}.{count}.{ext}"),
            FragmentName::Part { name, index } => format!("{name}.{PART_TAG}.{index}.{ext}"),
        }
    }

    /// Parse a directory entry name.
    ///
    /// Returns `Ok(None)` for files without the save extension (sync client
    /// metadata, temp files, ...).
    pub fn parse(file_name: &str, ext: &str) -> Result<Option<Self>, NameError> {
        let Some(stem) = file_name
            .strip_suffix(ext)
            .and_then(|rest| rest.strip_suffix('.'))
        else {
            return Ok(None);
        };

        let unparseable = |reason| NameError::Unparseable {
            name: file_name.to_string(),
            reason,
        };

        let segments: Vec<&str> = stem.split('.').collect();
        let parsed = match segments.as_slice() {
            [name] => FragmentName::Whole(SaveName::from(*name)),
            [name, FIRST_TAG, count] => {
                let count = parse_counter(count).ok_or_else(|| unparseable("bad fragment count"))?;
                if count < 2 {
                    return Err(unparseable("fragment count must be at least 2"));
                }
                FragmentName::First {
                    name: SaveName::from(*name),
                    count,
                }
            }
            [name, PART_TAG, index] => {
                let index = parse_counter(index).ok_or_else(|| unparseable("bad fragment index"))?;
                if index < 2 {
                    return Err(unparseable("part index must be at least 2"));
                }
                FragmentName::Part {
                    name: SaveName::from(*name),
                    index,
                }
            }
            _ => return Err(unparseable("unexpected '.'-separated segments")),
        };

        if parsed.save_name().as_str().is_empty() {
            return Err(unparseable("empty save name"));
        }
        Ok(Some(parsed))
    }
}

/// Canonical decimal: digits only, no sign, no leading zero.
fn parse_counter(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) || (s.len() > 1 && s.starts_with('0'))
    {
        return None;
    }
    s.parse().ok()
}

/// `true` for files we left behind mid-write.
pub fn is_temp_file(file_name: &str) -> bool {
    file_name.ends_with(TEMP_SUFFIX)
}

// ---------------------------------------------------------------------------
// Autosaves
// ---------------------------------------------------------------------------

/// How an autosave name encodes (or fails to encode) its creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveKind {
    /// Game-assigned rotating slot, e.g. `_autosave3`.
    Numbered(u32),
    /// Promoted name carrying its creation time.
    Stamped(DateTime<FixedOffset>),
    /// Has the prefix but neither form; callers fall back to the file mtime.
    Unstamped,
}

impl AutosaveKind {
    /// Classify `name`; `None` if it is not an autosave at all.
    pub fn classify(name: &SaveName, prefix: &str) -> Option<Self> {
        let rest = name.as_str().strip_prefix(prefix)?;
        if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
            return Some(
                rest.parse()
                    .map(AutosaveKind::Numbered)
                    .unwrap_or(AutosaveKind::Unstamped),
            );
        }
        let stamped = rest
            .strip_prefix('-')
            .and_then(|stamp| DateTime::parse_from_str(stamp, AUTOSAVE_STAMP_FORMAT).ok());
        Some(stamped.map_or(AutosaveKind::Unstamped, AutosaveKind::Stamped))
    }
}

/// Promoted autosave name for a save created at `created`.
pub fn stamped_autosave_name(prefix: &str, created: DateTime<FixedOffset>) -> SaveName {
    SaveName(format!("{prefix}-{}", created.format(AUTOSAVE_STAMP_FORMAT)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn whole_and_fragment_names_format() {
        let name = SaveName::from("foo");
        assert_eq!(FragmentName::for_index(&name, 1, 1).file_name("zip"), "foo.zip");
        assert_eq!(
            FragmentName::for_index(&name, 1, 3).file_name("zip"),
            "foo.firstof.3.zip"
        );
        assert_eq!(
            FragmentName::for_index(&name, 3, 3).file_name("zip"),
            "foo.partidx.3.zip"
        );
    }

    #[test]
    fn non_save_files_parse_to_none() {
        assert_eq!(FragmentName::parse("Steam_Autocloud.vdf", "zip"), Ok(None));
        assert_eq!(FragmentName::parse("foo.zip.cloudsaver.tmp", "zip"), Ok(None));
        assert_eq!(FragmentName::parse("foozip", "zip"), Ok(None));
    }

    #[test]
    fn declared_count_and_index() {
        let first = FragmentName::parse("a.firstof.4.zip", "zip").unwrap().unwrap();
        assert_eq!(first.declared_count(), Some(4));
        assert_eq!(first.index(), 1);
        let part = FragmentName::parse("a.partidx.3.zip", "zip").unwrap().unwrap();
        assert_eq!(part.declared_count(), None);
        assert_eq!(part.index(), 3);
    }

    #[test]
    fn autosave_classification() {
        let prefix = "_autosave";
        assert_eq!(
            AutosaveKind::classify(&SaveName::from("_autosave3"), prefix),
            Some(AutosaveKind::Numbered(3))
        );
        assert_eq!(AutosaveKind::classify(&SaveName::from("base"), prefix), None);
        assert_eq!(
            AutosaveKind::classify(&SaveName::from("_autosave-garbage"), prefix),
            Some(AutosaveKind::Unstamped)
        );

        let created = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 18, 14, 25, 30)
            .unwrap();
        let promoted = stamped_autosave_name(prefix, created);
        assert_eq!(promoted.as_str(), "_autosave-20261018T142530+0200");
        assert_eq!(
            AutosaveKind::classify(&promoted, prefix),
            Some(AutosaveKind::Stamped(created))
        );
    }

    #[test]
    fn promoted_names_are_valid_whole_saves() {
        let created = FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 1, 2, 3, 4, 5)
            .unwrap();
        let promoted = stamped_autosave_name("_autosave", created);
        let parsed = FragmentName::parse(&promoted.file_name("zip"), "zip")
            .unwrap()
            .unwrap();
        assert_eq!(parsed, FragmentName::Whole(promoted));
    }
}
