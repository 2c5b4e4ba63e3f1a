//! File attributes, stat collections and declared file modes

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// The kind of filesystem object a path resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Link,
    /// Block device
    BlockDevice,
    /// Named pipe
    Fifo,
    /// Unix socket
    Socket,
    /// Could not be classified
    Indeterminable,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileType::File => "file",
            FileType::Directory => "directory",
            FileType::Link => "link",
            FileType::BlockDevice => "block_device",
            FileType::Fifo => "fifo",
            FileType::Socket => "socket",
            FileType::Indeterminable => "indeterminable",
        };
        write!(f, "{name}")
    }
}

/// Attribute names participating in the symmetric-difference comparison
pub const STAT_ATTRS: [&str; 5] = ["exists", "owner", "group", "mode", "ftype"];

/// The detected (or expected) attributes of a single path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Whether the path exists
    pub exists: bool,
    /// Owning user name
    pub owner: Option<String>,
    /// Owning group name
    pub group: Option<String>,
    /// Permission bits
    pub mode: Option<u32>,
    /// File type
    pub ftype: Option<FileType>,
    /// Why the stat is incomplete; required when the path does not exist
    pub issue: Option<String>,
}

impl FileStat {
    /// Build a stat, enforcing that a non-existing path explains itself
    pub fn new(
        exists: bool,
        owner: Option<String>,
        group: Option<String>,
        mode: Option<u32>,
        ftype: Option<FileType>,
        issue: Option<String>,
    ) -> Result<Self> {
        if !exists && issue.is_none() {
            return Err(Error::InvalidFileStat(
                "issue must be provided if file does not exist".to_string(),
            ));
        }
        Ok(Self {
            exists,
            owner,
            group,
            mode,
            ftype,
            issue,
        })
    }

    /// A stat for a path that could not be probed or does not exist
    pub fn from_issue(issue: impl Into<String>) -> Self {
        Self {
            exists: false,
            owner: None,
            group: None,
            mode: None,
            ftype: None,
            issue: Some(issue.into()),
        }
    }

    /// The mode rendered as a four-digit octal string
    pub fn mode_octal_str(&self) -> Option<String> {
        self.mode.map(|m| format!("{m:04o}"))
    }

    /// The named attributes as a comparable set of (name, rendered value)
    pub fn relevant_state(&self, relevant_attrs: &[&str]) -> BTreeSet<(String, String)> {
        relevant_attrs
            .iter()
            .map(|attr| {
                let value = match *attr {
                    "exists" => self.exists.to_string(),
                    "owner" => render_opt(&self.owner),
                    "group" => render_opt(&self.group),
                    "mode" => self.mode_octal_str().unwrap_or_else(|| "none".to_string()),
                    "ftype" => self
                        .ftype
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "none".to_string()),
                    other => format!("unknown-attr-{other}"),
                };
                (attr.to_string(), value)
            })
            .collect()
    }
}

fn render_opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "none".to_string())
}

/// A path → stat map for one detection pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    stats: BTreeMap<PathBuf, FileStat>,
}

impl FileStats {
    /// Build a collection from path/stat pairs
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (PathBuf, FileStat)>,
    {
        Self {
            stats: pairs.into_iter().collect(),
        }
    }

    /// Insert or replace the stat for a path
    pub fn insert(&mut self, path: impl Into<PathBuf>, stat: FileStat) {
        self.stats.insert(path.into(), stat);
    }

    /// The stat recorded for a path
    pub fn get(&self, path: &Path) -> Option<&FileStat> {
        self.stats.get(path)
    }

    /// All paths with a recorded stat
    pub fn paths(&self) -> Vec<&Path> {
        self.stats.keys().map(PathBuf::as_path).collect()
    }

    /// Whether the path exists according to its recorded stat
    ///
    /// Errors when no stat was recorded for the path at all.
    pub fn exists(&self, path: &Path) -> Result<bool> {
        self.stats
            .get(path)
            .map(|s| s.exists)
            .ok_or_else(|| Error::UnknownDiffResource {
                resource: path.display().to_string(),
                collection: "file_stats".to_string(),
                available: self
                    .stats
                    .keys()
                    .map(|p| p.display().to_string())
                    .collect(),
            })
    }

    /// Iterate over (path, stat) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &FileStat)> {
        self.stats.iter()
    }
}

/// Declared permission modes for managed directories and files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileModes {
    /// Mode for managed directories
    pub dir: u32,
    /// Mode for non-executable files
    pub file: u32,
    /// Mode for executable files
    pub exe: u32,
}

impl FileModes {
    /// Parse the three declared mode strings
    pub fn parse(dir: &str, file: &str, exe: &str) -> Result<Self> {
        Ok(Self {
            dir: parse_mode(dir)?,
            file: parse_mode(file)?,
            exe: parse_mode(exe)?,
        })
    }
}

/// Parse a mode string, either octal (`0750`) or symbolic (`u=rwx,g=rx,o=`)
///
/// Symbolic clauses use `=` assignment only; an incomplete specification
/// (`u=rw,g=rw`) leaves the unmentioned classes at zero, which is why
/// declared modes should always spell out all three classes.
pub fn parse_mode(mode: &str) -> Result<u32> {
    let trimmed = mode.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidMode {
            mode: mode.to_string(),
            reason: "blank".to_string(),
        });
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return u32::from_str_radix(trimmed, 8).map_err(|e| Error::InvalidMode {
            mode: mode.to_string(),
            reason: e.to_string(),
        });
    }

    let mut bits: u32 = 0;
    for clause in trimmed.split(',') {
        let (who, perms) = clause.split_once('=').ok_or_else(|| Error::InvalidMode {
            mode: mode.to_string(),
            reason: format!("clause {clause:?} is not of the form who=perms"),
        })?;
        let mut clause_bits: u32 = 0;
        for p in perms.chars() {
            clause_bits |= match p {
                'r' => 0o4,
                'w' => 0o2,
                'x' => 0o1,
                other => {
                    return Err(Error::InvalidMode {
                        mode: mode.to_string(),
                        reason: format!("unsupported permission {other:?}"),
                    });
                }
            };
        }
        for w in who.chars() {
            bits |= match w {
                'u' => clause_bits << 6,
                'g' => clause_bits << 3,
                'o' => clause_bits,
                'a' => clause_bits << 6 | clause_bits << 3 | clause_bits,
                other => {
                    return Err(Error::InvalidMode {
                        mode: mode.to_string(),
                        reason: format!("unsupported class {other:?}"),
                    });
                }
            };
        }
    }
    Ok(bits)
}
