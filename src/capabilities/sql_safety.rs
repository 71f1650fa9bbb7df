use super::{SafetyValidator, ValidationVerdict};
use regex::Regex;

const BANNED_KEYWORDS: &[&str] = &[
    "drop", "delete", "truncate", "update", "insert", "alter", "create", "grant", "revoke",
    "exec", "execute", "pragma",
];

const INJECTION_PATTERNS: &[&str] = &[
    r";\s*drop",
    r";\s*delete",
    r"union.*select",
    r"--",
    r"/\*.*\*/",
];

/// Rejects generated SQL that is not a plain read query.
///
/// Checks run in order on the lowercased, trimmed text: banned keywords as whole
/// words, then injection patterns, then the leading `select`/`with` requirement.
#[derive(Debug, Clone)]
pub struct KeywordSafetyValidator {
    keywords: Vec<(String, Regex)>,
    injection: Vec<Regex>,
}

impl KeywordSafetyValidator {
    pub fn new() -> Self {
        let keywords = BANNED_KEYWORDS
            .iter()
            .map(|keyword| {
                let re = Regex::new(&format!(r"\b{keyword}\b"))
                    .expect("keyword pattern compiles");
                (keyword.to_string(), re)
            })
            .collect();
        let injection = INJECTION_PATTERNS
            .iter()
            .map(|pattern| {
                Regex::new(&format!("(?s){pattern}")).expect("injection pattern compiles")
            })
            .collect();
        Self {
            keywords,
            injection,
        }
    }

    /// Adds a further banned word, matched as a whole word.
    pub fn with_banned_keyword(mut self, keyword: &str) -> Result<Self, regex::Error> {
        let keyword = keyword.trim().to_ascii_lowercase();
        let re = Regex::new(&format!(r"\b{}\b", regex::escape(&keyword)))?;
        self.keywords.push((keyword, re));
        Ok(self)
    }
}

impl Default for KeywordSafetyValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SafetyValidator for KeywordSafetyValidator {
    fn validate(&self, query: &str) -> ValidationVerdict {
        let lowered = query.trim().to_lowercase();

        if let Some((keyword, _)) = self.keywords.iter().find(|(_, re)| re.is_match(&lowered)) {
            return ValidationVerdict::rejected(format!(
                "dangerous keyword detected: {}",
                keyword.to_uppercase()
            ));
        }
        if self.injection.iter().any(|re| re.is_match(&lowered)) {
            return ValidationVerdict::rejected("potential SQL injection pattern detected");
        }
        if !(lowered.starts_with("select") || lowered.starts_with("with")) {
            return ValidationVerdict::rejected("only SELECT queries are allowed");
        }
        ValidationVerdict::safe()
    }
}
