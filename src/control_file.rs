//! Control file format: three prefixed lines naming the project to open.
//!
//! ```text
//! folder: <path>
//! maidata: <filename>
//! track: <filename>
//! ```
//!
//! Prefixes are case-sensitive and must appear in this order on the first
//! three lines. Anything after the third line is ignored.

/// Name of the control file dropped by the converter.
pub const CONTROL_FILE_NAME: &str = "HachimiDX-Convert-Majdata-Control.txt";

pub const FOLDER_PREFIX: &str = "folder: ";
pub const MAIDATA_PREFIX: &str = "maidata: ";
pub const TRACK_PREFIX: &str = "track: ";

/// A parsed control file. Lives only as long as it takes to hand it to the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFileRecord {
    pub folder_path: String,
    pub maidata_filename: String,
    pub track_filename: String,
}

/// Malformed control file contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Fewer than the three required lines.
    TooFewLines { found: usize },
    /// A required line did not start with its prefix.
    MissingPrefix {
        /// Zero-based line index.
        line: usize,
        expected: &'static str,
        actual: String,
    },
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::TooFewLines { found } => {
                write!(f, "control file needs 3 lines, found {}", found)
            }
            FormatError::MissingPrefix {
                line,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "line {} should start with {:?}, got {:?}",
                    line + 1,
                    expected,
                    actual
                )
            }
        }
    }
}

impl std::error::Error for FormatError {}

/// Parse control file text into a record.
///
/// Each of the first three lines is trimmed before the prefix check, and the
/// value after the prefix is trimmed again. A leading UTF-8 byte-order mark
/// is ignored. Lines may end in `\n`, `\r\n` or a lone `\r`.
pub fn parse(contents: &str) -> Result<ControlFileRecord, FormatError> {
    let contents = contents.strip_prefix('\u{feff}').unwrap_or(contents);
    let lines = split_lines(contents);
    if lines.len() < 3 {
        return Err(FormatError::TooFewLines { found: lines.len() });
    }

    let folder_path = strip_field(0, FOLDER_PREFIX, lines[0])?;
    let maidata_filename = strip_field(1, MAIDATA_PREFIX, lines[1])?;
    let track_filename = strip_field(2, TRACK_PREFIX, lines[2])?;

    Ok(ControlFileRecord {
        folder_path,
        maidata_filename,
        track_filename,
    })
}

/// Split on `\r\n`, `\n` or `\r`. A trailing terminator does not add an empty line.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        match rest.find(['\r', '\n']) {
            Some(end) => {
                lines.push(&rest[..end]);
                let width = if rest[end..].starts_with("\r\n") { 2 } else { 1 };
                rest = &rest[end + width..];
            }
            None => {
                lines.push(rest);
                break;
            }
        }
    }
    lines
}

fn strip_field(line: usize, prefix: &'static str, raw: &str) -> Result<String, FormatError> {
    let trimmed = raw.trim();
    match trimmed.strip_prefix(prefix) {
        Some(value) => Ok(value.trim().to_string()),
        None => Err(FormatError::MissingPrefix {
            line,
            expected: prefix,
            actual: trimmed.to_string(),
        }),
    }
}
