//! Contact address validation and normalization.

/// Normalizes a phone number to the restricted Martinique E.164 format.
///
/// Accepted inputs:
/// - already-international numbers (`+...`, at least 11 characters);
/// - national 10-digit numbers starting with `0` (rewritten to `+596`);
/// - numbers already carrying the `596` prefix without the `+`;
/// - bare 9-digit local numbers.
///
/// Returns `None` for anything else.
pub fn normalize_phone(phone: &str) -> Option<String> {
    let digits: String = phone
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    if digits.is_empty() {
        return None;
    }

    if let Some(rest) = digits.strip_prefix('+') {
        // A second '+' somewhere inside is garbage.
        if rest.contains('+') || digits.len() < 11 {
            return None;
        }
        return Some(digits);
    }

    if digits.contains('+') {
        return None;
    }

    if digits.starts_with('0') && digits.len() == 10 {
        return Some(format!("+596{}", &digits[1..]));
    }

    if digits.starts_with("596") && digits.len() >= 12 {
        return Some(format!("+{digits}"));
    }

    if digits.len() == 9 {
        return Some(format!("+596{digits}"));
    }

    None
}

/// Validates and normalizes an email address (lowercased).
///
/// Syntactic check only: one `@`, non-empty local part, domain with a dot
/// and no leading/trailing dot, no whitespace.
pub fn normalize_email(email: &str) -> Option<String> {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return None;
    }

    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.contains('@') {
        return None;
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return None;
    }

    Some(email.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_national_format() {
        assert_eq!(
            normalize_phone("0696 12 34 56").as_deref(),
            Some("+596696123456")
        );
    }

    #[test]
    fn keeps_international_format() {
        assert_eq!(
            normalize_phone("+596696123456").as_deref(),
            Some("+596696123456")
        );
        assert_eq!(
            normalize_phone("+33 6 12 34 56 78").as_deref(),
            Some("+33612345678")
        );
    }

    #[test]
    fn adds_plus_to_prefixed_numbers() {
        assert_eq!(
            normalize_phone("596696123456").as_deref(),
            Some("+596696123456")
        );
    }

    #[test]
    fn expands_bare_local_numbers() {
        assert_eq!(
            normalize_phone("696123456").as_deref(),
            Some("+596696123456")
        );
    }

    #[test]
    fn rejects_invalid_phones() {
        assert_eq!(normalize_phone(""), None);
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone("+596"), None);
        assert_eq!(normalize_phone("hello"), None);
    }

    #[test]
    fn validates_emails() {
        assert_eq!(
            normalize_email(" User@Example.COM ").as_deref(),
            Some("user@example.com")
        );
        assert_eq!(normalize_email("no-at-sign"), None);
        assert_eq!(normalize_email("@example.com"), None);
        assert_eq!(normalize_email("user@nodot"), None);
        assert_eq!(normalize_email("user@.com"), None);
        assert_eq!(normalize_email("us er@example.com"), None);
    }
}
