//! Static analysis of job requirement programs.
//!
//! A requirement program has one boolean expression per line, for example
//! `package.name == "fwts" and package.version >= "1.0"`. Each expression
//! operates on records produced by resource jobs; the bare names it uses are
//! the ids (or import aliases) of those resource jobs.
//!
//! Only the referenced resource ids are computed here. Expressions are never
//! evaluated.

use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

/// Functions an expression may call.
const ALLOWED_CALLS: &[&str] = &["len", "bool", "int", "float"];

/// Names that are operators or constants rather than resource references.
const OPERATOR_KEYWORDS: &[&str] = &["and", "or", "not", "in", "is", "True", "False", "None"];

/// Keywords that introduce constructs expressions may not use.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "lambda", "if", "else", "for", "while", "import", "from", "def", "class", "return", "yield",
    "await", "async", "del", "global", "nonlocal", "with", "assert", "raise", "try", "except",
    "finally", "pass", "break", "continue", "as",
];

/// Problems found while analysing a requirement program or its imports.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum ResourceProgramError {
    /// The expression uses a construct that is not allowed.
    #[error("this kind of code is not allowed: {construct}")]
    #[diagnostic(
        code(certbox::session::code_not_allowed),
        help(
            "Only comparisons, boolean operators and calls to len, bool, int and float are allowed"
        )
    )]
    CodeNotAllowed {
        /// The offending expression.
        expression: String,
        /// The construct that was rejected.
        construct: String,
    },

    /// The expression does not look at any resource.
    #[error("expression did not reference any resources")]
    #[diagnostic(code(certbox::session::no_resources_referenced))]
    NoResourcesReferenced {
        /// The offending expression.
        expression: String,
    },

    /// The expression cannot be tokenized.
    #[error("syntax error in resource expression: {message}")]
    #[diagnostic(code(certbox::session::resource_syntax))]
    Syntax {
        /// The offending expression.
        expression: String,
        /// Description of the problem.
        message: String,
    },

    /// An `imports` line is malformed.
    #[error("unable to parse imports statement {line:?}: {message}")]
    #[diagnostic(
        code(certbox::session::invalid_import),
        help("Use 'from <namespace> import <partial-id> [as <alias>]', one per line")
    )]
    InvalidImport {
        /// The offending line.
        line: String,
        /// Description of the problem.
        message: String,
    },
}

/// One imported resource job: `from NS import ID as ALIAS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Import {
    /// Fully qualified id of the imported job.
    pub job_id: String,
    /// Name used for it inside expressions.
    pub alias: String,
}

/// Parse an `imports` field.
///
/// Each line has the form `from <namespace> import <partial-id>`, optionally
/// followed by `as <alias>`.
///
/// # Errors
///
/// Returns [`ResourceProgramError::InvalidImport`] for the first line that
/// does not follow that form.
pub fn parse_imports(text: &str) -> Result<Vec<Import>, ResourceProgramError> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_import_line)
        .collect()
}

fn parse_import_line(line: &str) -> Result<Import, ResourceProgramError> {
    let fail = |message: &str| ResourceProgramError::InvalidImport {
        line: line.to_string(),
        message: message.to_string(),
    };

    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 4 && parts.len() != 6 {
        return Err(fail("expected exactly four or six tokens"));
    }
    if parts[0] != "from" {
        return Err(fail("expected 'from' keyword"));
    }
    let namespace = parts[1];
    if namespace.contains("::") {
        return Err(fail("expected a namespace, not fully qualified job identifier"));
    }
    if parts[2] != "import" {
        return Err(fail("expected 'import' keyword"));
    }
    let partial_id = parts[3];
    if partial_id.contains("::") {
        return Err(fail(
            "expected a partial job identifier, not a fully qualified job identifier",
        ));
    }
    let alias = if parts.len() == 6 {
        if parts[4] != "as" {
            return Err(fail("expected 'as' keyword"));
        }
        parts[5]
    } else {
        partial_id
    };

    Ok(Import {
        job_id: format!("{namespace}::{partial_id}"),
        alias: alias.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    Literal,
    Dot,
    Open(char),
    Close(char),
    Assign,
    Operator,
}

/// Split an expression into tokens.
fn tokenize(text: &str) -> Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    let mut depth: Vec<char> = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push(Token::Ident(&text[start..i]));
            }
            '0'..='9' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                    i += 1;
                }
                tokens.push(Token::Literal);
            }
            '\'' | '"' => {
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        Some(b'\\') => i += 2,
                        Some(&b) if b as char == c => {
                            i += 1;
                            break;
                        }
                        Some(_) => i += 1,
                    }
                }
                tokens.push(Token::Literal);
            }
            '.' => {
                i += 1;
                tokens.push(Token::Dot);
            }
            '(' | '[' => {
                i += 1;
                depth.push(c);
                tokens.push(Token::Open(c));
            }
            ')' | ']' => {
                i += 1;
                let expected = if c == ')' { '(' } else { '[' };
                if depth.pop() != Some(expected) {
                    return Err(format!("unbalanced '{c}'"));
                }
                tokens.push(Token::Close(c));
            }
            '=' | '!' | '<' | '>' => {
                let two = text.get(i..i + 2).unwrap_or_default();
                if matches!(two, "==" | "!=" | "<=" | ">=") {
                    i += 2;
                    tokens.push(Token::Operator);
                } else if c == '=' {
                    i += 1;
                    tokens.push(Token::Assign);
                } else if c == '!' {
                    return Err("unexpected '!'".to_string());
                } else {
                    i += 1;
                    tokens.push(Token::Operator);
                }
            }
            '+' | '-' | '*' | '/' | '%' | '&' | '|' | '^' | '~' | ',' | ':' => {
                i += 1;
                tokens.push(Token::Operator);
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }

    if let Some(open) = depth.pop() {
        return Err(format!("unclosed '{open}'"));
    }
    Ok(tokens)
}

/// One line of a requirement program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceExpression {
    text: String,
    resource_aliases: Vec<String>,
    resource_ids: Vec<String>,
}

impl ResourceExpression {
    /// Analyse one expression.
    ///
    /// Aliases introduced by `imports` map to the imported id; any other name
    /// is qualified with `implicit_namespace` when one is given.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceProgramError`] if the expression cannot be
    /// tokenized, uses a construct that is not allowed, or references no
    /// resource.
    pub fn parse(
        text: &str,
        implicit_namespace: Option<&str>,
        imports: &[Import],
    ) -> Result<Self, ResourceProgramError> {
        let tokens = tokenize(text).map_err(|message| ResourceProgramError::Syntax {
            expression: text.to_string(),
            message,
        })?;
        let not_allowed = |construct: &str| ResourceProgramError::CodeNotAllowed {
            expression: text.to_string(),
            construct: construct.to_string(),
        };

        let mut resource_aliases: Vec<String> = Vec::new();
        for (index, token) in tokens.iter().enumerate() {
            let previous = index.checked_sub(1).map(|i| tokens[i]);
            let is_call = matches!(tokens.get(index + 1), Some(Token::Open('(')));
            match *token {
                Token::Assign => return Err(not_allowed("assignment")),
                Token::Open('(') if matches!(previous, Some(Token::Close(_))) => {
                    return Err(not_allowed("call of a computed value"));
                }
                Token::Ident(name) => {
                    let is_attribute = matches!(previous, Some(Token::Dot));
                    if FORBIDDEN_KEYWORDS.contains(&name) {
                        return Err(not_allowed(name));
                    }
                    if is_call && (is_attribute || !ALLOWED_CALLS.contains(&name)) {
                        return Err(not_allowed(&format!("call to {name}()")));
                    }
                    if is_attribute || is_call || OPERATOR_KEYWORDS.contains(&name) {
                        continue;
                    }
                    if !resource_aliases.iter().any(|seen| seen == name) {
                        resource_aliases.push(name.to_string());
                    }
                }
                _ => {}
            }
        }

        if resource_aliases.is_empty() {
            return Err(ResourceProgramError::NoResourcesReferenced {
                expression: text.to_string(),
            });
        }

        let resource_ids = resource_aliases
            .iter()
            .map(|alias| {
                imports
                    .iter()
                    .find(|import| &import.alias == alias)
                    .map_or_else(
                        || qualify(alias, implicit_namespace),
                        |import| import.job_id.clone(),
                    )
            })
            .collect();

        Ok(Self {
            text: text.to_string(),
            resource_aliases,
            resource_ids,
        })
    }

    /// The text of the expression.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Names used for resources inside the expression, in first-seen order.
    #[must_use]
    pub fn resource_aliases(&self) -> &[String] {
        &self.resource_aliases
    }

    /// Ids of the resource jobs the expression reads.
    #[must_use]
    pub fn resource_ids(&self) -> &[String] {
        &self.resource_ids
    }
}

fn qualify(id: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() && !id.contains("::") => format!("{ns}::{id}"),
        _ => id.to_string(),
    }
}

/// A whole requirement program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResourceProgram {
    expressions: Vec<ResourceExpression>,
}

impl ResourceProgram {
    /// Analyse a program, one expression per non-empty line.
    ///
    /// # Errors
    ///
    /// Returns the error of the first expression that fails to analyse.
    pub fn parse(
        text: &str,
        implicit_namespace: Option<&str>,
        imports: &[Import],
    ) -> Result<Self, ResourceProgramError> {
        let expressions = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| ResourceExpression::parse(line.trim(), implicit_namespace, imports))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { expressions })
    }

    /// The analysed expressions.
    #[must_use]
    pub fn expressions(&self) -> &[ResourceExpression] {
        &self.expressions
    }

    /// Ids of all resource jobs needed to evaluate the program, in first-seen
    /// order without duplicates.
    #[must_use]
    pub fn required_resources(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for id in self.expressions.iter().flat_map(|e| &e.resource_ids) {
            if !ids.contains(&id.as_str()) {
                ids.push(id);
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(program: &str, namespace: Option<&str>) -> Vec<String> {
        ResourceProgram::parse(program, namespace, &[])
            .unwrap()
            .required_resources()
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_simple_expression() {
        assert_eq!(ids("package.name == 'fwts'", None), vec!["package"]);
    }

    #[test]
    fn test_implicit_namespace() {
        assert_eq!(
            ids("package.name == 'fwts'", Some("com.example")),
            vec!["com.example::package"]
        );
    }

    #[test]
    fn test_multiple_lines_dedupe_in_order() {
        let program =
            "device.category == 'WIRELESS'\n\npackage.name == 'iw'\ndevice.driver != 'x'\n";
        assert_eq!(ids(program, None), vec!["device", "package"]);
    }

    #[test]
    fn test_keywords_and_constants_are_not_resources() {
        let program = "cpu.count > 1 and not cpu.other is None or cpu.flag in ['a', \"b\"]";
        assert_eq!(ids(program, None), vec!["cpu"]);
    }

    #[test]
    fn test_allowed_calls() {
        assert_eq!(ids("len(block.name) > 0", None), vec!["block"]);
        assert_eq!(ids("int(memory.size) >= 1024", None), vec!["memory"]);
    }

    #[test]
    fn test_two_resources_in_one_expression() {
        let expr = ResourceExpression::parse("a.x == b.y", None, &[]).unwrap();
        assert_eq!(expr.resource_aliases(), ["a", "b"]);
    }

    #[test]
    fn test_disallowed_call() {
        let err = ResourceProgram::parse("open('/etc/passwd')", None, &[]).unwrap_err();
        assert!(matches!(err, ResourceProgramError::CodeNotAllowed { .. }));
        let err = ResourceProgram::parse("package.name.upper() == 'X'", None, &[]).unwrap_err();
        assert!(matches!(err, ResourceProgramError::CodeNotAllowed { .. }));
    }

    #[test]
    fn test_assignment_and_lambda_are_rejected() {
        for program in ["package = 1", "(lambda: package)", "len(x)(y)"] {
            let err = ResourceProgram::parse(program, None, &[]).unwrap_err();
            assert!(
                matches!(err, ResourceProgramError::CodeNotAllowed { .. }),
                "{program} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn test_no_resources() {
        let err = ResourceProgram::parse("1 == 1", None, &[]).unwrap_err();
        assert_eq!(err.to_string(), "expression did not reference any resources");
    }

    #[test]
    fn test_syntax_errors() {
        for program in ["package.name == 'x", "len(package.name", "a.b)", "a $ b"] {
            let err = ResourceProgram::parse(program, None, &[]).unwrap_err();
            assert!(
                matches!(err, ResourceProgramError::Syntax { .. }),
                "{program} should be a syntax error, got {err:?}"
            );
        }
    }

    #[test]
    fn test_escaped_quote_in_string() {
        assert_eq!(ids(r"pkg.name == 'it\'s'", None), vec!["pkg"]);
    }

    #[test]
    fn test_imports() {
        let imports = parse_imports(
            "from com.canonical.certification import cpuinfo as cpu\nfrom ns import package\n",
        )
        .unwrap();
        assert_eq!(
            imports,
            vec![
                Import {
                    job_id: "com.canonical.certification::cpuinfo".to_string(),
                    alias: "cpu".to_string(),
                },
                Import {
                    job_id: "ns::package".to_string(),
                    alias: "package".to_string(),
                },
            ]
        );

        let program = ResourceProgram::parse(
            "cpu.count > 1\nother.x == 'y'",
            Some("local"),
            &imports,
        )
        .unwrap();
        assert_eq!(
            program.required_resources(),
            vec!["com.canonical.certification::cpuinfo", "local::other"]
        );
    }

    #[test]
    fn test_invalid_imports() {
        for line in [
            "import x",
            "form ns import x",
            "from ns::x import y",
            "from ns export x",
            "from ns import a::b",
            "from ns import x like y",
        ] {
            let err = parse_imports(line).unwrap_err();
            assert!(
                matches!(err, ResourceProgramError::InvalidImport { .. }),
                "{line} should be rejected"
            );
        }
    }
}
