//! Line splitting and command-name resolution

use taskline_foundation::UsageError;

/// Split a line into shell-like tokens, dropping everything from the first
/// unquoted `comment_char` on
pub fn split(line: &str, comment_char: char) -> Result<Vec<String>, UsageError> {
    let code = strip_comment(line, comment_char);
    shlex::split(code).ok_or_else(|| UsageError::new(format!("unbalanced quotes in {:?}", line.trim())))
}

fn strip_comment(line: &str, comment_char: char) -> &str {
    let mut single = false;
    let mut double = false;
    let mut escaped = false;

    for (idx, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if !single => escaped = true,
            '\'' if !double => single = !single,
            '"' if !single => double = !double,
            c if c == comment_char && !single && !double => return &line[..idx],
            _ => {}
        }
    }
    line
}

/// Resolve a possibly abbreviated command name
///
/// An exact match wins, then a unique prefix. `Ok(None)` means nothing
/// matched; several prefix matches are a usage error.
pub fn match_name<'a, I>(abbrev: &str, names: I) -> Result<Option<String>, UsageError>
where
    I: IntoIterator<Item = &'a str>,
{
    let names: Vec<&str> = names.into_iter().collect();
    if names.contains(&abbrev) {
        return Ok(Some(abbrev.to_string()));
    }

    let mut matches: Vec<&str> = names.into_iter().filter(|n| n.starts_with(abbrev)).collect();
    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches[0].to_string())),
        _ => {
            matches.sort_unstable();
            Err(UsageError::new(format!(
                "Ambiguous command '{}': matching {:?}",
                abbrev, matches
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_honors_quotes_and_comments() {
        assert_eq!(split("set a 'b c'", '#').unwrap(), vec!["set", "a", "b c"]);
        assert_eq!(split("set a 1 # note", '#').unwrap(), vec!["set", "a", "1"]);
        assert_eq!(split("set a '#1'", '#').unwrap(), vec!["set", "a", "#1"]);
        assert_eq!(split("# only a comment", '#').unwrap(), Vec::<String>::new());
        assert_eq!(split("   ", '#').unwrap(), Vec::<String>::new());
        assert_eq!(split("show a ; rest", ';').unwrap(), vec!["show", "a"]);
    }

    #[test]
    fn test_split_rejects_open_quote() {
        let err = split("set a 'oops", '#').unwrap_err();
        assert!(err.message.starts_with("unbalanced quotes"));
    }

    #[test]
    fn test_match_name() {
        let names = ["show", "showall", "set", ".kill", ".list", ".last_failure"];
        assert_eq!(match_name("show", names).unwrap().as_deref(), Some("show"));
        assert_eq!(match_name("showa", names).unwrap().as_deref(), Some("showall"));
        assert_eq!(match_name(".k", names).unwrap().as_deref(), Some(".kill"));
        assert_eq!(match_name("del", names).unwrap(), None);

        let err = match_name(".l", names).unwrap_err();
        assert_eq!(
            err.message,
            r#"Ambiguous command '.l': matching [".last_failure", ".list"]"#
        );
    }
}
