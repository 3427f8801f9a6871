//! Parse errors.
//!
//! Every failure is terminal for the parse that produced it. A [`ParseError`]
//! pairs the [`ErrorKind`] with where it happened (section and entry), so the
//! caller can print a useful diagnostic without re-reading the input.

use std::fmt;

/// The index space an invalid reference pointed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSpace {
    Type,
    Function,
    Global,
    Table,
    Memory,
    Section,
    Symbol,
    DataSegment,
}

impl fmt::Display for IndexSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexSpace::Type => "type",
            IndexSpace::Function => "function",
            IndexSpace::Global => "global",
            IndexSpace::Table => "table",
            IndexSpace::Memory => "memory",
            IndexSpace::Section => "section",
            IndexSpace::Symbol => "symbol",
            IndexSpace::DataSegment => "data segment",
        };
        f.write_str(name)
    }
}

/// Coarse classification of an [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A read ran past the end of the input.
    Truncated,
    /// The bytes are present but do not follow the format.
    Malformed,
    /// An index or name refers to something that does not exist.
    InvalidReference,
    /// Metadata that may appear once appeared again, or contradicts itself.
    Duplicate,
}

/// What went wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("unexpected end of input at offset {offset} ({needed} more bytes needed)")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("bad magic number")]
    BadMagic,

    #[error("bad version number {0} (expected 1)")]
    BadVersion(u32),

    #[error("malformed LEB128 integer at offset {offset}")]
    BadLeb { offset: usize },

    #[error("{0}")]
    Malformed(String),

    #[error("invalid {space} index {index} (count is {limit})")]
    InvalidIndex {
        space: IndexSpace,
        index: u32,
        limit: u32,
    },

    #[error("section not found: {0}")]
    SectionNotFound(String),

    #[error("duplicate {0}")]
    Duplicate(String),
}

impl ErrorKind {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::UnexpectedEof { .. } => ErrorCategory::Truncated,
            ErrorKind::BadMagic
            | ErrorKind::BadVersion(_)
            | ErrorKind::BadLeb { .. }
            | ErrorKind::Malformed(_) => ErrorCategory::Malformed,
            ErrorKind::InvalidIndex { .. } | ErrorKind::SectionNotFound(_) => {
                ErrorCategory::InvalidReference
            }
            ErrorKind::Duplicate(_) => ErrorCategory::Duplicate,
        }
    }
}

/// Where in the input an error was detected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// Section label: the standard kind name (`CODE`) or the custom name.
    pub section: Option<String>,
    /// Zero-based entry within the section (or sub-section).
    pub entry: Option<u32>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.section, self.entry) {
            (Some(section), Some(entry)) => write!(f, "{section} section, entry {entry}: "),
            (Some(section), None) => write!(f, "{section} section: "),
            (None, Some(entry)) => write!(f, "entry {entry}: "),
            (None, None) => Ok(()),
        }
    }
}

/// Error returned by [`crate::parse_object`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{location}{kind}")]
pub struct ParseError {
    kind: ErrorKind,
    location: Location,
}

impl ParseError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            location: Location::default(),
        }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed(msg.into()))
    }

    pub fn invalid_index(space: IndexSpace, index: u32, limit: usize) -> Self {
        Self::new(ErrorKind::InvalidIndex {
            space,
            index,
            limit: limit as u32,
        })
    }

    pub fn duplicate(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate(what.into()))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Attach the section label unless an inner parser already did.
    pub fn in_section(mut self, label: impl Into<String>) -> Self {
        if self.location.section.is_none() {
            self.location.section = Some(label.into());
        }
        self
    }

    /// Attach the entry index unless an inner parser already did.
    pub fn at_entry(mut self, entry: u32) -> Self {
        if self.location.entry.is_none() {
            self.location.entry = Some(entry);
        }
        self
    }

    /// Reinterpret running out of bytes inside a complete, length-framed
    /// region as a framing error: the declared length was too short.
    pub(crate) fn overran_frame(self, what: &str) -> Self {
        match self.kind {
            ErrorKind::UnexpectedEof { offset, .. } => Self {
                kind: ErrorKind::Malformed(format!(
                    "{what} ended prematurely (read past declared end at offset {offset})"
                )),
                location: self.location,
            },
            _ => self,
        }
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;
