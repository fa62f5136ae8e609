/// CQL statement classification, by leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// SELECT and anything unrecognized
    Read,
    /// Data or schema mutation
    Write,
    /// USE, which must track the keyspace on both clusters
    UseKeyspace,
}

/// Classify a CQL query by its first keyword. CQL has no multi-statement
/// requests, so the first keyword is decisive. Unknown statements default to
/// Read so they reach a single cluster only.
pub fn classify(query: &str) -> StatementKind {
    let keyword = first_keyword(query);

    if keyword.eq_ignore_ascii_case("SELECT") {
        return StatementKind::Read;
    }
    if keyword.eq_ignore_ascii_case("USE") {
        return StatementKind::UseKeyspace;
    }

    const WRITE_KEYWORDS: &[&str] = &[
        "INSERT", "UPDATE", "DELETE", "BATCH", "BEGIN", "TRUNCATE", "CREATE", "ALTER", "DROP",
        "GRANT", "REVOKE",
    ];
    if WRITE_KEYWORDS
        .iter()
        .any(|kw| keyword.eq_ignore_ascii_case(kw))
    {
        return StatementKind::Write;
    }

    StatementKind::Read
}

/// First keyword of the statement, skipping leading whitespace and
/// `--`/`//` line comments and `/* */` block comments
fn first_keyword(query: &str) -> &str {
    let mut rest = query.trim_start();
    loop {
        if let Some(stripped) = rest.strip_prefix("--").or_else(|| rest.strip_prefix("//")) {
            rest = match stripped.find('\n') {
                Some(pos) => stripped[pos + 1..].trim_start(),
                None => "",
            };
        } else if let Some(stripped) = rest.strip_prefix("/*") {
            rest = match stripped.find("*/") {
                Some(pos) => stripped[pos + 2..].trim_start(),
                None => "",
            };
        } else {
            break;
        }
    }
    rest.split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or("")
}
