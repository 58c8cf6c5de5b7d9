/// Statement building helpers: literal quoting and boolean condition lists

/// Quotes text as a double-quoted string literal
pub fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Quotes text as a backtick identifier
pub fn quote_identifier(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}

/// Conjunction of conditions, rendered as a WHERE clause or AND suffix
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    parts: Vec<String>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn push(&mut self, condition: impl Into<String>) -> &mut Self {
        let condition = condition.into();
        if !condition.is_empty() {
            self.parts.push(condition);
        }
        self
    }

    /// Adds `(a OR b OR ...)`; nothing when the list is empty
    pub fn push_any<I, S>(&mut self, alternatives: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let alts: Vec<String> = alternatives.into_iter().map(Into::into).collect();
        if !alts.is_empty() {
            self.parts.push(format!("({})", alts.join(" OR ")));
        }
        self
    }

    /// `a AND b`
    pub fn joined(&self) -> String {
        self.parts.join(" AND ")
    }

    /// `WHERE a AND b`, or empty
    pub fn where_clause(&self) -> String {
        if self.parts.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.joined())
        }
    }

    /// ` AND a AND b`, for appending to an existing predicate
    pub fn and_suffix(&self) -> String {
        if self.parts.is_empty() {
            String::new()
        } else {
            format!(" AND {}", self.joined())
        }
    }
}
