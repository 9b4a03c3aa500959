//! `@file` argument expansion.
//!
//! An argument of the form `@path` is replaced by the contents of `path`,
//! where every whitespace-separated token becomes one argument. This lets
//! cron entries keep a short command line:
//!
//! ```text
//! edgecert @/etc/edgecert/args
//! ```
//!
//! Expanded tokens may themselves reference further argument files.

use std::ffi::OsString;
use std::fs;
use std::path::Path;

use tracing::trace;

use crate::error::ConfigError;

/// Prefix marking an argument file
pub const ARG_FILE_PREFIX: char = '@';

/// Maximum nesting of argument files referencing argument files
const MAX_NESTING: usize = 8;

/// Split one argument file's contents into arguments.
pub fn split_arg_line(content: &str) -> Vec<String> {
    content.split_whitespace().map(str::to_string).collect()
}

/// Expand every `@path` argument in `args`.
///
/// Arguments that are not valid UTF-8 are passed through unchanged.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if a referenced file cannot be read, and
/// [`ConfigError::ArgFileNesting`] if files reference each other too deeply.
pub fn expand_arg_files<I, T>(args: I) -> Result<Vec<OsString>, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut expanded = Vec::new();
    for arg in args {
        expand_into(arg.into(), 0, &mut expanded)?;
    }
    Ok(expanded)
}

fn expand_into(arg: OsString, depth: usize, out: &mut Vec<OsString>) -> Result<(), ConfigError> {
    let Some(path) = arg.to_str().and_then(|s| s.strip_prefix(ARG_FILE_PREFIX)) else {
        out.push(arg);
        return Ok(());
    };

    if depth >= MAX_NESTING {
        return Err(ConfigError::ArgFileNesting(MAX_NESTING));
    }

    let path = Path::new(path);
    let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    let tokens = split_arg_line(&content);
    trace!(path = %path.display(), tokens = tokens.len(), "Expanded argument file");

    for token in tokens {
        expand_into(OsString::from(token), depth + 1, out)?;
    }
    Ok(())
}
