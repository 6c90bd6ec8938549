use regex::Regex;

use crate::store::RemoteEntry;

/// Compiled name patterns. `*` matches any run of characters, `?` exactly
/// one; everything else is literal and the whole name must match.
#[derive(Debug, Clone)]
pub struct NamePatterns {
    compiled: Vec<Regex>,
}

impl NamePatterns {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let compiled = patterns
            .iter()
            .map(|p| Regex::new(&glob_to_regex(p.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { compiled })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.compiled.iter().any(|re| re.is_match(name))
    }

    /// Keep the entries whose name matches any pattern, order preserved.
    pub fn filter(&self, entries: &[RemoteEntry]) -> Vec<RemoteEntry> {
        entries
            .iter()
            .filter(|e| self.matches(&e.name))
            .cloned()
            .collect()
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 12);
    out.push_str("(?s)^");
    let mut literal = String::new();
    for c in glob.chars() {
        match c {
            '*' | '?' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if c == '*' { ".*" } else { "." });
            }
            _ => literal.push(c),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("db-*.sql", "db-shop-2024.sql", true)]
    #[case("db-*.sql", "shop-2024.sql", false)]
    #[case("db-*.sql", "db-shop-2024.sql.gz", false)]
    #[case("*.tar.gz", "website-2024-05-01T03-00-00-000Z.tar.gz", true)]
    #[case("*.tar.gz", "website.tar_gz", false)]
    #[case("db-?.sql", "db-a.sql", true)]
    #[case("db-?.sql", "db-ab.sql", false)]
    #[case("all-databases-*.sql", "all-databases-.sql", true)]
    #[case("report(1).txt", "report(1).txt", true)]
    #[case("a+b", "aab", false)]
    #[case("db-*.sql", "db-shop\nold.sql", true)]
    #[case("db-?.sql", "db-\n.sql", true)]
    #[case("db-*.sql", "db-shop.sql\n", false)]
    fn test_glob_matching(#[case] glob: &str, #[case] name: &str, #[case] expected: bool) {
        let patterns = NamePatterns::new(&[glob]).unwrap();
        assert_eq!(patterns.matches(name), expected, "{glob} vs {name}");
    }

    #[test]
    fn test_any_pattern_matches() {
        let patterns = NamePatterns::new(&["db-*.sql", "*.tar.gz"]).unwrap();
        assert!(patterns.matches("db-crm.sql"));
        assert!(patterns.matches("etc.tar.gz"));
        assert!(!patterns.matches("notes.txt"));
    }

    #[test]
    fn test_no_patterns_match_nothing() {
        let patterns = NamePatterns::new::<&str>(&[]).unwrap();
        assert!(!patterns.matches("db-shop.sql"));
    }

    #[test]
    fn test_filter_is_idempotent() {
        let now = Utc::now();
        let entries: Vec<RemoteEntry> = ["db-a.sql", "notes.txt", "x.tar.gz", "db-b.sql.bak"]
            .iter()
            .map(|name| RemoteEntry {
                id: name.to_string(),
                name: name.to_string(),
                created_at: now,
                size_bytes: None,
            })
            .collect();
        let patterns = NamePatterns::new(&["db-*.sql", "*.tar.gz"]).unwrap();

        let once = patterns.filter(&entries);
        let twice = patterns.filter(&once);
        assert_eq!(once, twice);
        assert_eq!(
            once.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            vec!["db-a.sql", "x.tar.gz"]
        );
    }
}
