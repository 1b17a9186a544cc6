//! Helpers for turning ASCII replies into values.

/// Trim the reply and collapse internal runs of whitespace to one space.
pub fn simplified(reply: &str) -> String {
    reply.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a numeric reply such as `"1.25E-3\n"` or `"+9.91E+37"`.
pub fn parse_f64(reply: &str) -> Option<f64> {
    reply.trim().parse::<f64>().ok()
}

/// Parse an integer reply such as `" 1 \r\n"`.
pub fn parse_i64(reply: &str) -> Option<i64> {
    let s = simplified(reply);
    let s = s.strip_prefix('+').unwrap_or(&s);
    s.parse::<i64>().ok()
}

/// Interpret a boolean-ish reply: `1`, `ON`, or anything containing one
/// of `markers` (case-insensitive).
pub fn is_truthy(reply: &str, markers: &[&str]) -> bool {
    let s = reply.trim().to_ascii_uppercase();
    s == "1" || s == "ON" || markers.iter().any(|m| s.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats() {
        assert_eq!(parse_f64("1.25E-3\n"), Some(1.25e-3));
        assert_eq!(parse_f64(" +9.91E+37 "), Some(9.91e37));
        assert_eq!(parse_f64("N/A"), None);
        assert_eq!(parse_f64(""), None);
    }

    #[test]
    fn ints() {
        assert_eq!(parse_i64(" 1 \r\n"), Some(1));
        assert_eq!(parse_i64("+42"), Some(42));
        assert_eq!(parse_i64("-3"), Some(-3));
        assert_eq!(parse_i64("1 0"), None);
        assert_eq!(parse_i64("ON"), None);
    }

    #[test]
    fn simplify_whitespace() {
        assert_eq!(simplified("  a \t b\n"), "a b");
    }

    #[test]
    fn truthy_replies() {
        assert!(is_truthy("1\n", &[]));
        assert!(is_truthy("on", &[]));
        assert!(is_truthy("RUNSTOP", &["RUN"]));
        assert!(!is_truthy("0", &["RUN"]));
        assert!(!is_truthy("STOP", &[]));
    }
}
