//! convenience fns for parsing env vars
use anyhow::Context;

use std::{env, str};

/// Returns the value of the environment variable with the given key. If it
/// doesn't exist, returns `default` Casts the value to the type of `default`
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
/// [`parse_var`]: crate::env::parse_var
pub fn parse_var_with_err<T, S>(name: &str, default: S) -> anyhow::Result<T>
where
    T: str::FromStr,
    <T as str::FromStr>::Err: std::error::Error + Send + Sync + 'static,
    S: ToString + Send,
{
    parse_var::<T, S>(name, default).with_context(|| format!("error parsing env var {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_when_unset() {
        let val: String = parse_var("PROVISIONER_TEST_SURELY_UNSET", "standard").unwrap();
        assert_eq!(val, "standard");
        let val: u32 = parse_var("PROVISIONER_TEST_SURELY_UNSET", 7).unwrap();
        assert_eq!(val, 7);
    }

    #[test]
    fn test_error_names_the_var() {
        let err =
            parse_var_with_err::<u32, _>("PROVISIONER_TEST_SURELY_UNSET", "ten").unwrap_err();
        assert!(err.to_string().contains("PROVISIONER_TEST_SURELY_UNSET"));
    }
}
