//! convenience fns for parsing env vars and comma separated lists
#![warn(
    missing_debug_implementations,
    missing_docs,
    missing_copy_implementations,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![allow(clippy::cognitive_complexity)]
#![deny(rustdoc::broken_intra_doc_links)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]
use anyhow::Context;

use std::{env, str};

/// Returns the value of the environment variable with the given key. If it
/// doesn't exist, returns `default` Casts the value to the type of `default`
/// # Examples
/// ```
/// let val: u16 = env_parser::parse_var("ENV_PARSER_DOC_UNSET_PORT", 4222).unwrap();
/// assert_eq!(val, 4222);
/// ```
pub fn parse_var<T, S>(name: &str, default: S) -> Result<T, <T as str::FromStr>::Err>
where
    T: str::FromStr,
    S: ToString,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
}

/// Calls [`parse_var`] but gives a default error message with the environment
/// variable name in it
///
/// [`parse_var`]: crate::parse_var
pub fn parse_var_with_err<T, S>(name: &str, default: S) -> anyhow::Result<T>
where
    T: str::FromStr,
    <T as str::FromStr>::Err: std::error::Error + Send + Sync + 'static,
    S: ToString + Send,
{
    parse_var::<T, S>(name, default).with_context(|| format!("error parsing env var {name}"))
}

/// Splits a comma separated list, trimming every entry. A single trailing
/// comma is tolerated; any other empty entry is an error so that positional
/// lists keep their raw length.
/// # Examples
/// ```
/// assert_eq!(env_parser::split_list("a, b,c ,").unwrap(), vec!["a", "b", "c"]);
/// assert!(env_parser::split_list("").unwrap().is_empty());
/// assert!(env_parser::split_list("a,,c").is_err());
/// ```
pub fn split_list(raw: &str) -> anyhow::Result<Vec<String>> {
    let mut entries: Vec<&str> = raw.split(',').map(str::trim).collect();
    if entries.last().is_some_and(|s| s.is_empty()) {
        entries.pop();
    }
    if let Some(pos) = entries.iter().position(|s| s.is_empty()) {
        anyhow::bail!("empty entry at position {} in list '{raw}'", pos + 1);
    }
    Ok(entries.into_iter().map(str::to_owned).collect())
}

/// Like [`split_list`] but treats a missing value the same as an empty one.
///
/// [`split_list`]: crate::split_list
pub fn split_opt_list(raw: Option<&str>) -> anyhow::Result<Vec<String>> {
    raw.map_or_else(|| Ok(Vec::new()), split_list)
}
