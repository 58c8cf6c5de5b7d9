/// Revoked credentials
///
/// File format: one token per line, surrounding whitespace trimmed, blank
/// lines and `#` comments ignored.
use anyhow::{Context, Result};
use dashmap::DashSet;
use std::path::Path;

#[derive(Debug, Default)]
pub struct TokenBlocklist {
    tokens: DashSet<String>,
}

/// Tokens listed in blocklist file text
pub fn parse_tokens(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

impl TokenBlocklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, token: impl Into<String>) {
        self.tokens.insert(token.into());
    }

    pub fn remove(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    pub fn is_blocked(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// Replaces the whole list
    pub fn replace<I, S>(&self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens.clear();
        for token in tokens {
            self.tokens.insert(token.into());
        }
    }

    pub fn count(&self) -> usize {
        self.tokens.len()
    }

    /// Replaces the list with the contents of `path`; returns the new count
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read token blocklist {}", path.display()))?;
        self.replace(parse_tokens(&text));
        Ok(self.count())
    }
}
