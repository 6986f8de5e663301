//! Inline-code extraction for interpreter invocations
//!
//! A shell line like `python -c 'import os; os.system("rm -rf /")'` carries a
//! second program as a string argument. Each extractor recognizes one family
//! of carriers and returns the inner command strings so the scanner can
//! re-analyze them as if they were their own lines. Extraction respects
//! quote nesting and backslash escapes; recursion is bounded by the scanner.

/// One way of smuggling code as a string argument.
pub trait InlineExtractor: Send + Sync {
    /// Interpreter token this extractor keys on, for diagnostics.
    fn name(&self) -> &'static str;

    /// Return every inner command string found in the line.
    fn extract(&self, line: &str) -> Vec<String>;
}

/// Built-in extractor registry, in evaluation order.
pub fn default_extractors() -> Vec<Box<dyn InlineExtractor>> {
    vec![
        Box::new(InterpreterFlagExtractor),
        Box::new(PythonCallExtractor),
    ]
}

/// `python -c '…'`, `sh -c '…'`, `node -e '…'` and friends: an interpreter
/// token followed by a code-carrying flag and a quoted string.
pub struct InterpreterFlagExtractor;

/// (interpreter token, code flag) pairs this extractor recognizes.
const INTERPRETER_FLAGS: &[(&str, &str)] = &[
    ("python3", "-c"),
    ("python", "-c"),
    ("perl", "-e"),
    ("ruby", "-e"),
    ("node", "-e"),
    ("node", "--eval"),
    ("bash", "-c"),
    ("sh", "-c"),
    ("zsh", "-c"),
];

impl InlineExtractor for InterpreterFlagExtractor {
    fn name(&self) -> &'static str {
        "interpreter-flag"
    }

    fn extract(&self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut inner = Vec::new();

        for (interp, flag) in INTERPRETER_FLAGS {
            for (i, token) in tokens.iter().enumerate() {
                let base = token.rsplit('/').next().unwrap_or(token);
                if base != *interp {
                    continue;
                }
                if tokens.get(i + 1) != Some(flag) {
                    continue;
                }
                // Find the flag in the raw line, then pull the quoted string
                // that follows it.
                if let Some(flag_idx) = line.find(&format!(" {flag} ")) {
                    let rest = &line[flag_idx + flag.len() + 2..];
                    if let Some(code) = first_quoted(rest) {
                        inner.push(code);
                    }
                }
            }
        }

        inner
    }
}

/// Python stdlib calls that execute a shell string or argv:
/// `os.system`, `os.popen`, `subprocess.{call,run,Popen,check_call,
/// check_output}`, plus bare `eval`/`exec` of a string literal.
pub struct PythonCallExtractor;

const PYTHON_CALL_SITES: &[&str] = &[
    "os.system(",
    "os.popen(",
    "subprocess.call(",
    "subprocess.run(",
    "subprocess.popen(",
    "subprocess.check_call(",
    "subprocess.check_output(",
    "eval(",
    "exec(",
];

impl InlineExtractor for PythonCallExtractor {
    fn name(&self) -> &'static str {
        "python-call"
    }

    fn extract(&self, line: &str) -> Vec<String> {
        let lower = line.to_lowercase();
        let mut inner = Vec::new();

        for call in PYTHON_CALL_SITES {
            let mut search_from = 0;
            while let Some(pos) = lower[search_from..].find(call) {
                let arg_start = search_from + pos + call.len();
                let rest = &line[arg_start..];
                let trimmed = rest.trim_start();

                if trimmed.starts_with('[') {
                    if let Some(cmd) = join_array_elements(trimmed) {
                        inner.push(cmd);
                    }
                } else if let Some(code) = first_quoted(trimmed) {
                    inner.push(code);
                }

                search_from = arg_start;
            }
        }

        inner
    }
}

/// Extract the first single- or double-quoted string, honoring backslash
/// escapes inside double quotes. Returns the unquoted content.
pub fn first_quoted(s: &str) -> Option<String> {
    first_quoted_at(s).map(|(content, _)| content)
}

/// Like [`first_quoted`], additionally returning the byte offset just past
/// the closing quote (or the string end when unterminated).
fn first_quoted_at(s: &str) -> Option<(String, usize)> {
    let bytes = s.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let quote = bytes[i];
        if quote == b'\'' || quote == b'"' {
            let mut content = String::new();
            let mut j = i + 1;
            while j < bytes.len() {
                let c = bytes[j];
                if c == b'\\' && quote == b'"' && j + 1 < bytes.len() {
                    content.push(bytes[j + 1] as char);
                    j += 2;
                    continue;
                }
                if c == quote {
                    return Some((content, j + 1));
                }
                content.push(c as char);
                j += 1;
            }
            // Unterminated quote: take the remainder.
            return Some((content, bytes.len()));
        }
        i += 1;
    }

    None
}

/// Reconstruct a command from a Python-style array literal: the quoted
/// elements joined with spaces. `["rm", "-rf", "/"]` becomes `rm -rf /`.
fn join_array_elements(s: &str) -> Option<String> {
    let close = s.find(']')?;
    let body = &s[1..close];

    let mut elements = Vec::new();
    let mut rest = body;
    while let Some((element, end)) = first_quoted_at(rest) {
        elements.push(element);
        if end >= rest.len() {
            break;
        }
        rest = &rest[end..];
    }

    if elements.is_empty() {
        None
    } else {
        Some(elements.join(" "))
    }
}
