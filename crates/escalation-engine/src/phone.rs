//! Regional phone validation
//!
//! Acceptance filter for E.164 numbers restricted to the configured
//! country prefixes. Wave sends and outbound offers skip staff whose
//! number fails this check.

/// E.164 validator limited to a set of country calling prefixes.
#[derive(Debug, Clone)]
pub struct PhoneValidator {
    allowed_prefixes: Vec<String>,
}

impl PhoneValidator {
    pub fn new(allowed_prefixes: Vec<String>) -> Self {
        Self { allowed_prefixes }
    }

    /// Strip formatting characters, keeping a leading '+'.
    pub fn normalize(raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        for (i, c) in raw.trim().chars().enumerate() {
            match c {
                '+' if i == 0 => out.push('+'),
                '0'..='9' => out.push(c),
                ' ' | '-' | '(' | ')' | '.' => {}
                _ => {
                    // Any other character invalidates the number outright.
                    return raw.trim().to_string();
                }
            }
        }
        out
    }

    /// Whether `raw` is a valid E.164 number in an allowed region.
    pub fn is_valid(&self, raw: &str) -> bool {
        let normalized = Self::normalize(raw);
        let Some(digits) = normalized.strip_prefix('+') else {
            return false;
        };
        if digits.is_empty()
            || digits.len() > 15
            || digits.len() < 7
            || !digits.chars().all(|c| c.is_ascii_digit())
            || digits.starts_with('0')
        {
            return false;
        }
        self.allowed_prefixes
            .iter()
            .any(|p| normalized.starts_with(p.as_str()))
    }
}
