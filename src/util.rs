//! Small shared helpers.

/// Glob matching supporting `*`, `?` and `**` segments.
///
/// `*` matches any run of characters except `/`; `**/` matches zero or
/// more whole directories; a trailing `/**` matches everything below.
#[must_use]
pub fn glob_match(pattern: &str, path: &str) -> bool {
    if pattern == "**" {
        return true;
    }

    let mut escaped = String::new();
    for c in pattern.chars() {
        match c {
            '.' | '+' | '^' | '$' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }

    let regex_pattern = escaped
        .replace("**/", "\u{0}")
        .replace("/**", "\u{1}")
        .replace('*', "[^/]*")
        .replace('?', "[^/]")
        .replace('\u{0}', "(?:[^/]+/)*")
        .replace('\u{1}', "(?:/.*)?");

    regex::Regex::new(&format!("^{regex_pattern}$"))
        .map(|re| re.is_match(path))
        .unwrap_or(false)
}

/// Saturating u128 → u64 conversion for durations.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn millis_to_u64(millis: u128) -> u64 {
    if millis > u64::MAX as u128 {
        u64::MAX
    } else {
        millis as u64
    }
}

/// Truncate a string for display, appending an ellipsis when cut.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_does_not_cross_directories() {
        assert!(glob_match("*.rs", "main.rs"));
        assert!(!glob_match("*.rs", "src/main.rs"));
    }

    #[test]
    fn double_star_crosses_directories() {
        assert!(glob_match("**/*.rs", "src/deep/main.rs"));
        assert!(glob_match("**/*.rs", "main.rs"));
        assert!(glob_match("src/**", "src/a/b/c.txt"));
        assert!(glob_match("/etc/**", "/etc/hosts"));
        assert!(!glob_match("src/**", "lib/a.txt"));
    }

    #[test]
    fn question_mark_matches_single_char() {
        assert!(glob_match("a?.txt", "ab.txt"));
        assert!(!glob_match("a?.txt", "abc.txt"));
    }

    #[test]
    fn literal_dots_are_escaped() {
        assert!(!glob_match("a.rs", "axrs"));
    }

    #[test]
    fn truncate_respects_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijk", 5), "abcde...");
    }
}
