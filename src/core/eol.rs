//! End-of-reply detection
//!
//! GCS replies may span several lines. Every line but the last ends in
//! `" \n"`; the last one ends in a line feed preceded by any other character.
//! Single control bytes (e.g. the answer to `#5`) are complete on their own.

use super::error::GcsError;

/// Return true if `rcvbuf` holds a complete GCS reply.
pub fn is_complete(rcvbuf: &str) -> bool {
    let mut chars = rcvbuf.chars().rev();
    let Some(last) = chars.next() else {
        return false;
    };
    match chars.next() {
        None => (last as u32) < 32,
        Some(prev) => last == '\n' && prev != ' ',
    }
}

/// Verify that `answer` contains no line break without a preceding space
/// except at its very end.
pub fn check_no_inner_eol(answer: &str) -> Result<(), GcsError> {
    let chars: Vec<char> = answer.chars().collect();
    if chars.len() < 2 {
        return Ok(());
    }
    for i in 1..chars.len() - 1 {
        if (chars[i] == '\n' || chars[i] == '\r') && chars[i - 1] != ' ' {
            let start = i.saturating_sub(10);
            let end = (i + 10).min(chars.len());
            let around: String = chars[start..end].iter().collect();
            return Err(GcsError::UnexpectedResponse(format!(
                "LF/CR at {around:?}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_incomplete() {
        assert!(!is_complete(""));
    }

    #[test]
    fn test_single_control_byte() {
        assert!(is_complete("\x01"));
        assert!(is_complete("\n"));
        assert!(!is_complete("1"));
    }

    #[test]
    fn test_continuation_line() {
        assert!(!is_complete("1 = 5.0 \n"));
        assert!(is_complete("1 = 5.0\n"));
        assert!(is_complete("1 = 1.0 \n2 = 2.0\n"));
        assert!(!is_complete("1 = 1.0 \n2 = 2.0"));
    }

    #[test]
    fn test_matches_definition_for_all_short_strings() {
        let alphabet = ['a', ' ', '\n', '\x02'];
        let mut inputs = vec![String::new()];
        for _ in 0..3 {
            let mut next = Vec::new();
            for s in &inputs {
                for c in alphabet {
                    let mut t = s.clone();
                    t.push(c);
                    next.push(t);
                }
            }
            inputs.extend(next);
        }
        for s in inputs {
            let c: Vec<char> = s.chars().collect();
            let expected = (c.len() == 1 && (c[0] as u32) < 32)
                || (c.len() >= 2 && c[c.len() - 1] == '\n' && c[c.len() - 2] != ' ');
            assert_eq!(is_complete(&s), expected, "{s:?}");
        }
    }

    #[test]
    fn test_inner_eol() {
        assert!(check_no_inner_eol("1 = 1.0 \n2 = 2.0\n").is_ok());
        assert!(check_no_inner_eol("1 = 1.0\n2 = 2.0\n").is_err());
        assert!(check_no_inner_eol("\n").is_ok());
    }
}
