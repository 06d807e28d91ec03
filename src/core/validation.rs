//! Validation for entry names and storage paths
//!
//! Entry names are stored as at most 31 UTF-16 code units and may not
//! contain the path separators `/`, `\`, `:` or `!`. Paths address entries
//! from the root with `/`-separated names; a leading `/` is optional and the
//! empty path (or `/`) names the root storage.

use crate::directory::entry::MAX_NAME_UNITS;
use crate::error::{CfbError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// A validated directory entry name
///
/// # Rules
/// - 1 to 31 UTF-16 code units
/// - None of `/`, `\`, `:`, `!` and no NUL
///
/// # Examples
///
/// ```
/// use cfb_store::core::validation::EntryName;
///
/// let name = EntryName::new("WordDocument").unwrap();
/// assert_eq!(name.as_str(), "WordDocument");
///
/// assert!(EntryName::new("").is_err());
/// assert!(EntryName::new("a/b").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryName(String);

impl EntryName {
    /// Characters allowed anywhere in a name
    const PATTERN: &'static str = r"^[^/\\:!\x00]+$";

    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate_name(&name)?;
        Ok(EntryName(name))
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(CfbError::InvalidName("name cannot be empty".to_string()));
        }

        let units = name.encode_utf16().count();
        if units > MAX_NAME_UNITS {
            return Err(CfbError::InvalidName(format!(
                "'{}' is {} UTF-16 units long (max {})",
                name, units, MAX_NAME_UNITS
            )));
        }

        if !Self::pattern()?.is_match(name) {
            return Err(CfbError::InvalidName(format!(
                "'{}' contains one of / \\ : ! or NUL",
                name
            )));
        }

        Ok(())
    }

    fn pattern() -> Result<&'static Regex> {
        static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
        PATTERN
            .get_or_init(|| Regex::new(Self::PATTERN))
            .as_ref()
            .map_err(|err| CfbError::InvalidName(err.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for EntryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Split a storage path into its components
///
/// Empty components (leading, trailing or doubled `/`) are skipped, so
/// `""`, `"/"` and `"//"` all yield no components.
///
/// # Examples
///
/// ```
/// use cfb_store::core::validation::split_path;
///
/// assert_eq!(split_path("/Dir1/Stream1"), vec!["Dir1", "Stream1"]);
/// assert!(split_path("/").is_empty());
/// ```
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

/// Split a path into its parent components and final name
///
/// Fails with `InvalidName` for paths naming the root, and validates the
/// final name.
pub fn split_parent(path: &str) -> Result<(Vec<&str>, EntryName)> {
    let mut parts = split_path(path);
    let name = parts
        .pop()
        .ok_or_else(|| CfbError::InvalidName(format!("'{}' names the root storage", path)))?;
    Ok((parts, EntryName::new(name)?))
}

/// Join path components back into canonical `/a/b` form
pub fn join_path(parts: &[&str]) -> String {
    let mut path = String::new();
    for part in parts {
        path.push('/');
        path.push_str(part);
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}
