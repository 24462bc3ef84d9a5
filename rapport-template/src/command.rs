use serde_json::Value;

use crate::expr::{parse_expr, Expr};
use crate::TemplateError;

/// A parsed template command, without its delimiters.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `INS expr`, `= expr`, or a bare expression.
    Insert(Expr),
    /// `FOR var IN expr`
    For { var: String, source: Expr },
    /// `END-FOR var`
    EndFor { var: Option<String> },
    /// `IF expr`
    If(Expr),
    /// `END-IF`
    EndIf,
}

/// Why a command was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("expected `FOR <name> IN <expression>`")]
    MalformedFor,
    #[error("invalid loop variable `{0}`")]
    LoopVariable(String),
    #[error("`{0}` commands are not supported")]
    Unsupported(String),
    #[error("{0}")]
    Expression(String),
    #[error("loop source is not a list: {0}")]
    NotAList(String),
}

const UNSUPPORTED: &[&str] = &["EXEC", "EXEC!", "IMAGE", "LINK", "HTML", "ALIAS", "CMD_NODE"];

impl Command {
    pub fn is_block_marker(&self) -> bool {
        !matches!(self, Command::Insert(_))
    }

    fn expressions(&self) -> Vec<&Expr> {
        match self {
            Command::Insert(expr) | Command::If(expr) => vec![expr],
            Command::For { source, .. } => vec![source],
            Command::EndFor { .. } | Command::EndIf => Vec::new(),
        }
    }
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(at) => (&text[..at], text[at..].trim_start()),
        None => (text, ""),
    }
}

fn loop_var(name: &str) -> Option<String> {
    let name = name.strip_prefix('$').unwrap_or(name);
    let valid = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    valid.then(|| name.to_string())
}

/// Parses the text between the delimiters of one command.
pub fn parse_command(text: &str) -> Result<Command, TemplateError> {
    let invalid = |reason: CommandError| TemplateError::InvalidCommand {
        command: text.to_string(),
        reason,
    };
    let expr = |src: &str| parse_expr(src).map_err(|message| invalid(CommandError::Expression(message)));

    let body = text.trim();
    if body.is_empty() {
        return Err(invalid(CommandError::Empty));
    }
    if let Some(rest) = body.strip_prefix('=') {
        return expr(rest).map(Command::Insert);
    }

    let (keyword, rest) = split_word(body);
    match keyword.to_ascii_uppercase().as_str() {
        "INS" => expr(rest).map(Command::Insert),
        "FOR" => {
            let (var, after) = split_word(rest);
            let (in_keyword, source) = split_word(after);
            if !in_keyword.eq_ignore_ascii_case("IN") {
                return Err(invalid(CommandError::MalformedFor));
            }
            let var = loop_var(var).ok_or_else(|| invalid(CommandError::LoopVariable(var.to_string())))?;
            Ok(Command::For {
                var,
                source: expr(source)?,
            })
        }
        "END-FOR" => {
            let var = match rest {
                "" => None,
                name => Some(loop_var(name).ok_or_else(|| invalid(CommandError::LoopVariable(name.to_string())))?),
            };
            Ok(Command::EndFor { var })
        }
        "IF" => expr(rest).map(Command::If),
        "END-IF" => Ok(Command::EndIf),
        upper if UNSUPPORTED.contains(&upper) => Err(invalid(CommandError::Unsupported(upper.to_string()))),
        _ => expr(body).map(Command::Insert),
    }
}

/// Data paths a command reads that have no value in `data`.
///
/// Loop references (`$name`) are skipped since they only exist while rendering.
pub fn missing_data_paths(command: &str, data: &Value) -> Result<Vec<String>, TemplateError> {
    let command = parse_command(command)?;
    let mut missing = Vec::new();
    for expr in command.expressions() {
        for path in expr.data_paths() {
            if !path.resolves_in(data) {
                missing.push(path.to_string());
            }
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_expression_is_an_insert() {
        assert!(matches!(parse_command(" patient.name "), Ok(Command::Insert(_))));
        assert!(matches!(parse_command("= patient.name"), Ok(Command::Insert(_))));
        assert!(matches!(parse_command("INS patient.name"), Ok(Command::Insert(_))));
    }

    #[test]
    fn parses_block_commands() {
        match parse_command("FOR m IN measures.tensiometre").unwrap() {
            Command::For { var, .. } => assert_eq!(var, "m"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            parse_command("END-FOR $m").unwrap(),
            Command::EndFor { var: Some("m".into()) }
        );
        assert_eq!(parse_command("END-FOR").unwrap(), Command::EndFor { var: None });
        assert!(matches!(parse_command("IF patient.gender == 'Masculin'"), Ok(Command::If(_))));
        assert_eq!(parse_command("end-if").unwrap(), Command::EndIf);
    }

    #[test]
    fn rejects_bad_commands() {
        let reason = |text: &str| match parse_command(text) {
            Err(TemplateError::InvalidCommand { reason, .. }) => reason,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(reason("   "), CommandError::Empty);
        assert_eq!(reason("FOR m OF items"), CommandError::MalformedFor);
        assert_eq!(reason("FOR m-1 IN items"), CommandError::LoopVariable("m-1".into()));
        assert_eq!(reason("IMAGE logo()"), CommandError::Unsupported("IMAGE".into()));
        assert!(matches!(reason("a = b"), CommandError::Expression(_)));

        let err = parse_command("IMAGE logo()").unwrap_err();
        assert_eq!(err.to_string(), "invalid command `IMAGE logo()`: `IMAGE` commands are not supported");
    }

    #[test]
    fn reports_missing_data_paths() {
        let data = json!({ "patient": { "name": "Martin" }, "measures": [] });
        assert_eq!(missing_data_paths("patient.name", &data).unwrap(), Vec::<String>::new());
        assert_eq!(
            missing_data_paths("patient.birthDate || doctor.name", &data).unwrap(),
            vec!["patient.birthDate".to_string(), "doctor.name".to_string()]
        );
        assert!(missing_data_paths("FOR m IN measures", &data).unwrap().is_empty());
        assert!(missing_data_paths("$m.heure", &data).unwrap().is_empty());
        assert!(missing_data_paths("END-FOR m", &data).unwrap().is_empty());
    }
}
