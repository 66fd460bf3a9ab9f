use chrono::DateTime;
use serde::Deserialize;

const TRACEBACK_HEADER: &str = "Traceback (most recent call last):";
const PANIC_MARKER: &str = "panicked at ";

/// The parts of a log line that identify an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSignature {
    pub error: String,
    pub message: String,
    pub stack: Vec<String>,
    /// Innermost frame, the one closest to where the error was raised.
    pub top_frame: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokeError {
    error_type: String,
    #[serde(default)]
    error_message: String,
    #[serde(default)]
    stack: Vec<String>,
    #[serde(default)]
    stack_trace: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameStyle {
    // innermost frame first
    CallerLast,
    // innermost frame last
    CallerFirst,
}

/// Looks for an error in a single log line. Returns `None` for lines that do
/// not look like errors.
pub fn detect(line: &str) -> Option<ErrorSignature> {
    let (body, leveled) = match runtime_level(line) {
        Some((level, body)) if matches!(level, "ERROR" | "FATAL") => (body, true),
        Some(_) => return None,
        None => (line, false),
    };

    structured(body)
        .or_else(|| traceback(body))
        .or_else(|| panic(body))
        .or_else(|| headed_trace(body))
        .or_else(|| leveled.then(|| bare(body)).flatten())
}

/// Splits runtime-formatted lines into their level and body. Handles both
/// `<ts>\t<request>\t<LEVEL>\t<body>` and `[LEVEL]\t<ts>\t<request>\t<body>`.
fn runtime_level(line: &str) -> Option<(&str, &str)> {
    let fields: Vec<&str> = line.splitn(4, '\t').collect();
    if fields.len() != 4 {
        return None;
    }
    if let Some(level) = fields[0]
        .strip_prefix('[')
        .and_then(|f| f.strip_suffix(']'))
        && is_level(level)
    {
        return Some((level, fields[3]));
    }
    if DateTime::parse_from_rfc3339(fields[0].trim()).is_ok() && is_level(fields[2].trim()) {
        return Some((fields[2].trim(), fields[3]));
    }
    None
}

fn is_level(s: &str) -> bool {
    matches!(s, "TRACE" | "DEBUG" | "INFO" | "WARN" | "WARNING" | "ERROR" | "FATAL")
}

fn structured(body: &str) -> Option<ErrorSignature> {
    let start = body.find('{')?;
    let invoke: InvokeError = serde_json::from_str(body[start..].trim_end()).ok()?;
    if invoke.error_type.trim().is_empty() {
        return None;
    }
    let raw = if invoke.stack.is_empty() {
        invoke.stack_trace
    } else {
        invoke.stack
    };
    let lines: Vec<&str> = raw.iter().flat_map(|entry| entry.lines()).collect();
    let (stack, style) = collect_frames(&lines);
    Some(ErrorSignature {
        error: invoke.error_type.trim().to_string(),
        message: invoke.error_message.trim().to_string(),
        top_frame: top_of(&stack, style),
        stack,
    })
}

fn traceback(body: &str) -> Option<ErrorSignature> {
    let lines: Vec<&str> = body.lines().collect();
    let start = lines.iter().position(|l| l.trim() == TRACEBACK_HEADER)?;
    let tail = &lines[start + 1..];
    let (stack, style) = collect_frames(tail);
    let last = tail
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())?;
    let (error, message) = parse_header(last).unwrap_or_else(|| (last.to_string(), String::new()));
    Some(ErrorSignature {
        error,
        message,
        top_frame: top_of(&stack, style),
        stack,
    })
}

fn panic(body: &str) -> Option<ErrorSignature> {
    let mut lines = body.lines();
    let location = lines.by_ref().find_map(|l| {
        l.split_once(PANIC_MARKER)
            .map(|(_, rest)| rest.trim().trim_end_matches(':').to_string())
    })?;
    let message = lines
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("note:"))
        .map(ToString::to_string)
        .unwrap_or_else(|| location.clone());
    Some(ErrorSignature {
        error: "panic".to_string(),
        message,
        stack: vec![location.clone()],
        top_frame: Some(location),
    })
}

fn headed_trace(body: &str) -> Option<ErrorSignature> {
    let lines: Vec<&str> = body.lines().collect();
    let (idx, (error, message)) = lines
        .iter()
        .enumerate()
        .find_map(|(i, l)| parse_header(l.trim()).map(|h| (i, h)))?;
    let (stack, style) = collect_frames(&lines[idx + 1..]);
    Some(ErrorSignature {
        error,
        message,
        top_frame: top_of(&stack, style),
        stack,
    })
}

fn bare(body: &str) -> Option<ErrorSignature> {
    let lines: Vec<&str> = body.lines().collect();
    let first = lines.iter().map(|l| l.trim()).find(|l| !l.is_empty())?;
    let (stack, style) = collect_frames(&lines);
    Some(ErrorSignature {
        error: "Error".to_string(),
        message: first.to_string(),
        top_frame: top_of(&stack, style),
        stack,
    })
}

/// Parses `SomeError: message`, `pkg.SomeException: message` or a bare error
/// type name. Text before the type (e.g. `Exception in thread "main"`) is
/// ignored.
fn parse_header(line: &str) -> Option<(String, String)> {
    let (head, message) = match line.split_once(": ") {
        Some((head, message)) => (head, message.trim()),
        None => (line.trim_end_matches(':'), ""),
    };
    let error = head.split_whitespace().last()?;
    if !is_error_type(error) {
        return None;
    }
    Some((error.to_string(), message.to_string()))
}

fn is_error_type(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_alphabetic())
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$'))
        && (token.ends_with("Error") || token.ends_with("Exception"))
}

fn collect_frames(lines: &[&str]) -> (Vec<String>, FrameStyle) {
    let mut frames = Vec::new();
    let mut style = FrameStyle::CallerLast;
    for line in lines {
        let trimmed = line.trim();
        if trimmed.starts_with("at ") {
            frames.push(trimmed.to_string());
        } else if trimmed.starts_with("File \"") {
            style = FrameStyle::CallerFirst;
            frames.push(trimmed.to_string());
        }
    }
    (frames, style)
}

fn top_of(stack: &[String], style: FrameStyle) -> Option<String> {
    match style {
        FrameStyle::CallerLast => stack.first().cloned(),
        FrameStyle::CallerFirst => stack.last().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_lines_without_errors() {
        assert_eq!(detect("START RequestId: 1f2e Version: $LATEST"), None);
        assert_eq!(
            detect("2024-01-01T00:00:00.000Z\t1f2e\tINFO\tuser signed in"),
            None
        );
        assert_eq!(detect("Found 3 errors: see above"), None);
    }

    #[test]
    fn non_error_levels_are_ignored_even_with_stack() {
        let line = "2024-01-01T00:00:00.000Z\t1f2e\tWARN\tTypeError: x\n    at a (a.js:1:1)";
        assert_eq!(detect(line), None);
    }

    #[test]
    fn parses_structured_invoke_error() {
        let line = "2024-01-01T00:00:00.000Z\t1f2e\tERROR\tInvoke Error \t{\"errorType\":\"TypeError\",\"errorMessage\":\"Cannot read properties of undefined\",\"stack\":[\"TypeError: Cannot read properties of undefined\",\"    at Runtime.handler (file:///var/task/index.mjs:4:11)\",\"    at Runtime.handleOnceNonStreaming (file:///var/runtime/index.mjs:1173:29)\"]}";
        let sig = detect(line).unwrap();
        assert_eq!(sig.error, "TypeError");
        assert_eq!(sig.message, "Cannot read properties of undefined");
        assert_eq!(sig.stack.len(), 2);
        assert_eq!(
            sig.top_frame.as_deref(),
            Some("at Runtime.handler (file:///var/task/index.mjs:4:11)")
        );
    }

    #[test]
    fn parses_python_structured_error_with_innermost_frame_last() {
        let line = "[ERROR]\t2024-01-01T00:00:00.000Z\t1f2e\t{\"errorMessage\": \"'id'\", \"errorType\": \"KeyError\", \"stackTrace\": [\"  File \\\"/var/task/app.py\\\", line 3, in handler\\n    return event['id']\\n\", \"  File \\\"/var/task/util.py\\\", line 9, in lookup\\n    x\\n\"]}";
        let sig = detect(line).unwrap();
        assert_eq!(sig.error, "KeyError");
        assert_eq!(
            sig.top_frame.as_deref(),
            Some("File \"/var/task/util.py\", line 9, in lookup")
        );
    }

    #[test]
    fn parses_textual_js_trace() {
        let line = "2024-01-01T00:00:00.000Z\t1f2e\tERROR\tRangeError: Invalid array length\n    at build (/var/task/index.js:10:3)\n    at main (/var/task/index.js:20:1)";
        let sig = detect(line).unwrap();
        assert_eq!(sig.error, "RangeError");
        assert_eq!(sig.message, "Invalid array length");
        assert_eq!(sig.top_frame.as_deref(), Some("at build (/var/task/index.js:10:3)"));
    }

    #[test]
    fn parses_unleveled_java_trace() {
        let line = "Exception in thread \"main\" java.lang.IllegalStateException: closed\n\tat com.acme.Pool.get(Pool.java:44)\n\tat com.acme.Main.main(Main.java:7)";
        let sig = detect(line).unwrap();
        assert_eq!(sig.error, "java.lang.IllegalStateException");
        assert_eq!(sig.message, "closed");
        assert_eq!(sig.top_frame.as_deref(), Some("at com.acme.Pool.get(Pool.java:44)"));
    }

    #[test]
    fn parses_python_traceback() {
        let line = "Traceback (most recent call last):\n  File \"/app/main.py\", line 5, in <module>\n    run()\n  File \"/app/main.py\", line 2, in run\n    1 / 0\nZeroDivisionError: division by zero";
        let sig = detect(line).unwrap();
        assert_eq!(sig.error, "ZeroDivisionError");
        assert_eq!(sig.message, "division by zero");
        assert_eq!(
            sig.top_frame.as_deref(),
            Some("File \"/app/main.py\", line 2, in run")
        );
    }

    #[test]
    fn parses_rust_panic() {
        let line = "thread 'main' panicked at src/main.rs:12:5:\nindex out of bounds\nnote: run with `RUST_BACKTRACE=1`";
        let sig = detect(line).unwrap();
        assert_eq!(sig.error, "panic");
        assert_eq!(sig.message, "index out of bounds");
        assert_eq!(sig.top_frame.as_deref(), Some("src/main.rs:12:5"));
    }

    #[test]
    fn error_level_without_header_falls_back_to_generic_error() {
        let line = "2024-01-01T00:00:00.000Z\t1f2e\tERROR\tpayment provider unavailable";
        let sig = detect(line).unwrap();
        assert_eq!(sig.error, "Error");
        assert_eq!(sig.message, "payment provider unavailable");
        assert!(sig.stack.is_empty());
        assert_eq!(sig.top_frame, None);
    }
}
