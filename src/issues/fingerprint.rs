use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

const ISSUE_NAMESPACE: Uuid = Uuid::from_u128(0x5b1f_6c2e_8d4a_4f0b_9e3c_27a1_d0c4_e8f6);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("error type is empty")]
    EmptyErrorType,
    #[error("log group is empty")]
    EmptyLogGroup,
}

/// Computes the grouping key for an error.
///
/// Fields are length-prefixed before hashing so that no two distinct input
/// triples can produce the same byte stream.
pub fn group_key(
    error_type: &str,
    top_frame: Option<&str>,
    log_group: &str,
) -> Result<String, FingerprintError> {
    let error_type = error_type.trim();
    let log_group = log_group.trim();
    if error_type.is_empty() {
        return Err(FingerprintError::EmptyErrorType);
    }
    if log_group.is_empty() {
        return Err(FingerprintError::EmptyLogGroup);
    }
    let frame = top_frame.map(normalize_frame).unwrap_or_default();

    let mut hasher = Sha256::new();
    for field in [error_type, frame.as_str(), log_group] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field.as_bytes());
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Stable issue identity for a `(workspace, group)` pair.
pub fn issue_id(workspace: &str, group: &str) -> Uuid {
    Uuid::new_v5(&ISSUE_NAMESPACE, format!("{workspace}\n{group}").as_bytes())
}

/// Strips the parts of a stack frame that change between deploys without the
/// failing code path changing: line/column positions and raw addresses.
pub fn normalize_frame(frame: &str) -> String {
    let frame = frame.trim();
    let frame = frame.strip_prefix("at ").unwrap_or(frame);

    let mut out = String::with_capacity(frame.len());
    let mut rest = frame;
    while let Some(c) = rest.chars().next() {
        if c == ':' && starts_with_digit(&rest[1..]) {
            rest = skip_digits(&rest[1..]);
            continue;
        }
        if let Some(after) = rest.strip_prefix("line ")
            && starts_with_digit(after)
        {
            out.push_str("line");
            rest = skip_digits(after);
            continue;
        }
        if let Some(after) = rest.strip_prefix("0x")
            && after.starts_with(|c: char| c.is_ascii_hexdigit())
            && at_token_start(&out)
        {
            rest = after.trim_start_matches(|c: char| c.is_ascii_hexdigit());
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn starts_with_digit(s: &str) -> bool {
    s.starts_with(|c: char| c.is_ascii_digit())
}

fn skip_digits(s: &str) -> &str {
    s.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn at_token_start(out: &str) -> bool {
    out.chars()
        .last()
        .is_none_or(|c| !c.is_ascii_alphanumeric() && c != '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_hash_identically() {
        let a = group_key("TypeError", Some("at run (/var/task/index.js:10:5)"), "/aws/lambda/api");
        let b = group_key("TypeError", Some("at run (/var/task/index.js:10:5)"), "/aws/lambda/api");
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[test]
    fn line_numbers_do_not_split_groups() {
        let a = group_key("TypeError", Some("at run (/var/task/index.js:10:5)"), "g").unwrap();
        let b = group_key("TypeError", Some("at run (/var/task/index.js:42:17)"), "g").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn each_input_participates_in_the_key() {
        let base = group_key("TypeError", Some("at run (index.js:1:1)"), "g1").unwrap();
        assert_ne!(base, group_key("RangeError", Some("at run (index.js:1:1)"), "g1").unwrap());
        assert_ne!(base, group_key("TypeError", Some("at walk (index.js:1:1)"), "g1").unwrap());
        assert_ne!(base, group_key("TypeError", Some("at run (index.js:1:1)"), "g2").unwrap());
        assert_ne!(base, group_key("TypeError", None, "g1").unwrap());
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let a = group_key("ab", Some("c"), "g").unwrap();
        let b = group_key("a", Some("bc"), "g").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_empty_inputs() {
        assert_eq!(group_key(" ", None, "g"), Err(FingerprintError::EmptyErrorType));
        assert_eq!(group_key("Error", None, ""), Err(FingerprintError::EmptyLogGroup));
    }

    #[test]
    fn normalizes_common_frame_shapes() {
        assert_eq!(
            normalize_frame("    at Runtime.handler (file:///var/task/index.mjs:12:9)"),
            "Runtime.handler (file:///var/task/index.mjs)"
        );
        assert_eq!(
            normalize_frame("File \"/var/task/app.py\", line 31, in handler"),
            "File \"/var/task/app.py\", line, in handler"
        );
        assert_eq!(
            normalize_frame("0: 0x55d0c1a2 - app::main"),
            "0: - app::main"
        );
    }

    #[test]
    fn issue_id_is_stable_per_workspace_and_group() {
        assert_eq!(issue_id("ws", "g"), issue_id("ws", "g"));
        assert_ne!(issue_id("ws", "g"), issue_id("other", "g"));
    }
}
