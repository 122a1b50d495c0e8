//! Submission parsing and test-input binding.
//!
//! A submission may carry a delimiter separating student "setup" code
//! (variable declarations the tests will rebind) from the logic under test.
//! `parse` produces a structured pair; `inject` builds the binding statement
//! for one test case's input with enumerable fallback rules, so the edge
//! cases are unit-testable in isolation.

use lazy_static::lazy_static;
use regex::Regex;

/// Structural marker between declarations and graded logic.
pub const SETUP_DELIMITER: &str = "# solution code below";

lazy_static! {
    /// Simple top-level `name = …` assignment targets. `=[^=]` keeps
    /// comparisons (`==`) out.
    static ref ASSIGN_TARGET: Regex = Regex::new(r"(?m)^([A-Za-z_]\w*)\s*=[^=]").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionParts {
    /// Names declared in the setup segment, in order of appearance.
    pub setup_vars: Vec<String>,
    /// The logic under test: everything after the delimiter, or the whole
    /// submission when no delimiter is present.
    pub logic: String,
    /// False when the delimiter was absent; failure logs then carry a hint.
    pub had_delimiter: bool,
}

pub fn parse(code: &str) -> SubmissionParts {
    match code.split_once(SETUP_DELIMITER) {
        Some((setup, logic)) => SubmissionParts {
            setup_vars: ASSIGN_TARGET
                .captures_iter(setup)
                .map(|cap| cap[1].to_string())
                .collect(),
            logic: logic.to_string(),
            had_delimiter: true,
        },
        None => SubmissionParts {
            setup_vars: Vec::new(),
            logic: code.to_string(),
            had_delimiter: false,
        },
    }
}

/// How a test case's input gets bound before the logic runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// One unpacking assignment: component count matched the declared names.
    Unpack(String),
    /// A single declared name bound to the entire raw input text.
    Direct { name: String, value: String },
    /// The input is executed as a statement (covers direct function calls).
    /// `ambiguous` is set when names were declared but did not line up with
    /// the input's shape; that is the injection-ambiguity advisory.
    Statement { code: String, ambiguous: bool },
}

pub fn inject(setup_vars: &[String], test_input: &str) -> Binding {
    let input = test_input.trim();
    if setup_vars.is_empty() {
        return Binding::Statement {
            code: input.to_string(),
            ambiguous: false,
        };
    }

    if split_components(input).len() == setup_vars.len() {
        return Binding::Unpack(format!("{} = ({})", setup_vars.join(", "), input));
    }
    if let [only] = setup_vars {
        return Binding::Direct {
            name: only.clone(),
            value: input.to_string(),
        };
    }
    Binding::Statement {
        code: input.to_string(),
        ambiguous: true,
    }
}

/// Split on top-level commas only: commas nested in brackets or string
/// literals do not count as component separators.
pub fn split_components(input: &str) -> Vec<&str> {
    let mut components = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (idx, ch) in input.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                components.push(input[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    components.push(input[start..].trim());
    components
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_without_delimiter_keeps_whole_submission() {
        let parts = parse("print(km * 1000)");
        assert!(!parts.had_delimiter);
        assert!(parts.setup_vars.is_empty());
        assert_eq!(parts.logic, "print(km * 1000)");
    }

    #[test]
    fn parse_extracts_setup_targets_in_order() {
        let code = "a = 1\nb = 2\n# solution code below\nprint(a + b)";
        let parts = parse(code);
        assert!(parts.had_delimiter);
        assert_eq!(parts.setup_vars, vec!["a", "b"]);
        assert_eq!(parts.logic, "\nprint(a + b)");
    }

    #[test]
    fn parse_ignores_comparisons_and_indented_lines() {
        let code = "x = 5\nif x == 5:\n    y = 2\n# solution code below\nprint(x)";
        let parts = parse(code);
        assert_eq!(parts.setup_vars, vec!["x"]);
    }

    #[test]
    fn split_respects_brackets_and_quotes() {
        assert_eq!(split_components("5, 7"), vec!["5", "7"]);
        assert_eq!(split_components("[1, 2, 3], 4"), vec!["[1, 2, 3]", "4"]);
        assert_eq!(
            split_components("'a,b', \"c,d\""),
            vec!["'a,b'", "\"c,d\""]
        );
        assert_eq!(split_components("{'k': 1}, (2, 3)"), vec!["{'k': 1}", "(2, 3)"]);
        assert_eq!(split_components(""), vec![""]);
    }

    #[test]
    fn inject_unpacks_when_shapes_match() {
        let vars = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            inject(&vars, "5, 7"),
            Binding::Unpack("a, b = (5, 7)".to_string())
        );
    }

    #[test]
    fn inject_binds_single_var_to_raw_input() {
        let vars = vec!["nums".to_string()];
        assert_eq!(
            inject(&vars, "1, 2, 3"),
            Binding::Direct {
                name: "nums".to_string(),
                value: "1, 2, 3".to_string(),
            }
        );
    }

    #[test]
    fn inject_falls_back_to_statement_with_advisory() {
        let vars = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            inject(&vars, "1, 2, 3"),
            Binding::Statement {
                code: "1, 2, 3".to_string(),
                ambiguous: true,
            }
        );
    }

    #[test]
    fn inject_without_vars_is_a_plain_statement() {
        assert_eq!(
            inject(&[], "convert(5)"),
            Binding::Statement {
                code: "convert(5)".to_string(),
                ambiguous: false,
            }
        );
    }
}
