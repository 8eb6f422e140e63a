use std::{env, str::FromStr};

/// Interprets an optional flag value. `1/true/yes/on` and `0/false/no/off` are recognised (case-insensitive); anything
/// else, including a missing value, yields `default`.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let Some(value) = value else {
        return default;
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Reads and parses an environment variable. Returns `None` if the variable is unset, and `Some(Err)` if it is set but
/// cannot be parsed, so that callers can log the two cases differently.
pub fn parse_env_var<T: FromStr>(key: &str) -> Option<Result<T, T::Err>> {
    env::var(key).ok().map(|s| s.trim().parse::<T>())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn boolean_flags() {
        assert!(parse_boolean_flag(Some("YES".into()), false));
        assert!(parse_boolean_flag(Some(" on ".into()), false));
        assert!(!parse_boolean_flag(Some("0".into()), true));
        assert!(parse_boolean_flag(Some("maybe".into()), true));
        assert!(!parse_boolean_flag(None, false));
    }

    #[test]
    fn env_var_parsing() {
        env::set_var("LEDGER_COMMON_TEST_U64", "42");
        env::set_var("LEDGER_COMMON_TEST_BAD", "forty-two");
        assert_eq!(parse_env_var::<u64>("LEDGER_COMMON_TEST_U64").map(|r| r.ok()), Some(Some(42)));
        assert!(matches!(parse_env_var::<u64>("LEDGER_COMMON_TEST_BAD"), Some(Err(_))));
        assert!(parse_env_var::<u64>("LEDGER_COMMON_TEST_UNSET").is_none());
    }
}
