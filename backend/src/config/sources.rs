//! Layered lookup over the process environment and the dotfile.
//!
//! The environment always wins; the dotfile only fills gaps. The environment
//! is any key lookup, normally [`mockable::Env::string`], so tests can supply
//! a scripted environment.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use cap_std::{ambient_authority, fs::Dir};

use super::ConfigError;
use super::duration::parse_duration;

const BOOL_EXPECTED: &str = "1|0|true|false|yes|no|y|n";
const DURATION_EXPECTED: &str = "seconds or a value suffixed with ms|s|m|h|d";

/// Key/value pairs parsed from a dotfile.
pub type Dotfile = HashMap<String, String>;

/// Read a dotfile into memory.
///
/// A missing file yields an empty map so deployments without a dotfile keep
/// working on environment variables alone.
///
/// # Errors
/// Returns [`ConfigError::DotfileRead`] when the file exists but cannot be
/// opened and [`ConfigError::DotfileParse`] when a line is malformed.
pub fn read_dotfile(path: &Path) -> Result<Dotfile, ConfigError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let Some(file_name) = path.file_name() else {
        return Ok(Dotfile::new());
    };

    let read_error = |source: std::io::Error| ConfigError::DotfileRead {
        path: path.to_path_buf(),
        source,
    };
    let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Dotfile::new()),
        Err(err) => return Err(read_error(err)),
    };
    let mut file = match dir.open(file_name) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Dotfile::new()),
        Err(err) => return Err(read_error(err)),
    };
    let mut contents = String::new();
    file.read_to_string(&mut contents).map_err(read_error)?;
    parse_dotfile(&contents).map_err(|source| ConfigError::DotfileParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse dotfile contents without touching the process environment.
///
/// # Errors
/// Returns the parser error for the first malformed line.
pub fn parse_dotfile(contents: &str) -> Result<Dotfile, dotenvy::Error> {
    dotenvy::from_read_iter(contents.as_bytes()).collect()
}

/// Environment-first view over both configuration sources.
pub(crate) struct Sources<'a> {
    env: &'a dyn Fn(&str) -> Option<String>,
    dotfile: &'a Dotfile,
}

impl<'a> Sources<'a> {
    pub(crate) fn new(env: &'a dyn Fn(&str) -> Option<String>, dotfile: &'a Dotfile) -> Self {
        Self { env, dotfile }
    }

    /// Trimmed value for `key`; blank values count as unset.
    pub(crate) fn optional(&self, key: &str) -> Option<String> {
        (self.env)(key)
            .or_else(|| self.dotfile.get(key).cloned())
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    }

    pub(crate) fn string_or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_owned())
    }

    pub(crate) fn parse_or<T: FromStr>(
        &self,
        key: &'static str,
        default: T,
        expected: &'static str,
    ) -> Result<T, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: key,
                value,
                expected,
            }),
        }
    }

    pub(crate) fn duration_or(
        &self,
        key: &'static str,
        default: Duration,
    ) -> Result<Duration, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => parse_duration(&value).ok_or(ConfigError::Invalid {
                name: key,
                value,
                expected: DURATION_EXPECTED,
            }),
        }
    }

    pub(crate) fn flag_or(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(value) => parse_bool(&value).ok_or(ConfigError::Invalid {
                name: key,
                value,
                expected: BOOL_EXPECTED,
            }),
        }
    }

    /// Comma separated `name<sep>value` pairs, e.g. `critical=6,low=1`.
    pub(crate) fn pairs(
        &self,
        key: &'static str,
        separator: char,
        expected: &'static str,
    ) -> Result<Option<Vec<(String, String)>>, ConfigError> {
        let Some(value) = self.optional(key) else {
            return Ok(None);
        };
        let invalid = || ConfigError::Invalid {
            name: key,
            value: value.clone(),
            expected,
        };
        let mut pairs = Vec::new();
        for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let (name, entry) = item.split_once(separator).ok_or_else(invalid)?;
            let name = name.trim();
            if name.is_empty() {
                return Err(invalid());
            }
            pairs.push((name.to_owned(), entry.trim().to_owned()));
        }
        Ok(Some(pairs))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Some(true),
        "0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}
