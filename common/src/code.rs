/// Canonical form of a claim code as typed by a user or sent by a device.
///
/// Codes are matched case-insensitively and surrounding whitespace is ignored.
/// Returns `None` when nothing is left after trimming.
pub fn normalize_code(raw: &str) -> Option<String> {
    let code = raw.trim();
    if code.is_empty() {
        return None;
    }
    Some(code.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uppercases_and_trims() {
        assert_eq!(normalize_code("  abc-123\n").as_deref(), Some("ABC-123"));
        assert_eq!(normalize_code("XYZ789").as_deref(), Some("XYZ789"));
    }

    #[test]
    fn blank_is_rejected() {
        assert_eq!(normalize_code(""), None);
        assert_eq!(normalize_code(" \t "), None);
    }
}
