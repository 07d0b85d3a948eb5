//! REPL (Read-Eval-Print Loop) for sandeval
//!
//! Provides an interactive shell for trying expressions against a names
//! table that `:let` can extend.

use crate::context::{EvalContext, Names};
use crate::error::format_eval_error;
use crate::evaluator::Evaluator;
use crate::value::Value;
use anyhow::Result;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::{history::FileHistory, CompletionType, Config, Editor};
use std::env;
use std::path::PathBuf;

/// Outcome of one line of REPL input
#[derive(Debug, Clone, PartialEq)]
pub enum ReplOutput {
    /// An expression's value
    Value(Value),
    /// `:let` bound a name
    Bound(String, Value),
    /// A command that only prints (`:help`, `:names`, `:clear`)
    Handled,
    /// `:quit`
    Quit,
}

/// REPL state without the terminal, so the command handling can be tested
#[derive(Debug)]
pub struct Session {
    evaluator: Evaluator,
    compound: bool,
}

impl Session {
    pub fn new(compound: bool) -> Self {
        Self {
            evaluator: Evaluator::with_context(base_context(compound)),
            compound,
        }
    }

    /// Names bound with `:let`, sorted by name
    pub fn names(&self) -> Vec<(String, Value)> {
        let mut names: Vec<_> = self
            .evaluator
            .context()
            .names
            .table()
            .map(|table| table.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        names
    }

    /// Run one line of input: a `:command` or an expression
    pub fn handle(&mut self, input: &str) -> Result<ReplOutput> {
        let input = input.trim();

        if let Some(rest) = input.strip_prefix(":let") {
            return self.bind(rest);
        }

        match input {
            ":quit" | ":q" | ":exit" => Ok(ReplOutput::Quit),
            ":help" | ":h" => {
                print_help();
                Ok(ReplOutput::Handled)
            }
            ":clear" | ":c" => {
                self.evaluator = Evaluator::with_context(base_context(self.compound));
                println!("{}", "✓ Names cleared".green());
                Ok(ReplOutput::Handled)
            }
            ":names" | ":n" => {
                self.print_names();
                Ok(ReplOutput::Handled)
            }
            command if command.starts_with(':') => {
                anyhow::bail!("unknown command: {} (type :help for available commands)", command)
            }
            expression => Ok(ReplOutput::Value(self.evaluator.eval(expression)?)),
        }
    }

    fn bind(&mut self, rest: &str) -> Result<ReplOutput> {
        let Some((name, expression)) = rest.split_once('=') else {
            anyhow::bail!("usage: :let NAME = EXPR");
        };
        let name = name.trim();
        if name.is_empty() || !is_identifier(name) {
            anyhow::bail!("'{}' is not a valid name", name);
        }

        let value = self.evaluator.eval(expression.trim())?;
        if let Names::Table(table) = &mut self.evaluator.context_mut().names {
            table.insert(name.to_string(), value.clone());
        }
        Ok(ReplOutput::Bound(name.to_string(), value))
    }

    fn print_names(&self) {
        let names = self.names();
        if names.is_empty() {
            println!("{}", "No names defined".dimmed());
            return;
        }

        println!("{}", "Names:".cyan().bold());
        for (name, value) in names {
            println!("  {} = {}", name.green(), format_value(&value));
        }
    }
}

fn base_context(compound: bool) -> EvalContext {
    let ctx = if compound {
        EvalContext::compound()
    } else {
        EvalContext::new()
    };
    ctx.with_standard_library()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Run the interactive REPL
pub fn run_repl(compound: bool) -> Result<()> {
    println!(
        "{}",
        format!("sandeval REPL v{}", crate::VERSION).cyan().bold()
    );
    println!("{}", "Type :help for help, :quit to exit".dimmed());
    println!();

    let config = Config::builder()
        .completion_type(CompletionType::List)
        .auto_add_history(true)
        .build();

    let mut rl: Editor<(), FileHistory> = Editor::with_config(config)?;

    let history_path = get_history_path();
    if let Some(path) = &history_path {
        let _ = rl.load_history(path); // missing on first run
    }

    let mut session = Session::new(compound);
    let mut line_number = 1;

    loop {
        let prompt = format!("sandeval:{} ", line_number).green().bold().to_string();

        match rl.readline(&prompt) {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                match session.handle(input) {
                    Ok(ReplOutput::Quit) => {
                        println!("{}", "Goodbye!".cyan());
                        break;
                    }
                    Ok(ReplOutput::Value(value)) => {
                        println!("{}", format_value(&value));
                        line_number += 1;
                    }
                    Ok(ReplOutput::Bound(name, value)) => {
                        println!("{} = {}", name.green(), format_value(&value));
                        line_number += 1;
                    }
                    Ok(ReplOutput::Handled) => {}
                    Err(e) => match e.downcast_ref::<crate::error::EvalError>() {
                        Some(eval_error) => eprint!("{}", format_eval_error(eval_error, input)),
                        None => eprintln!("{} {}", "✗".red().bold(), e),
                    },
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}", "^C".dimmed());
                println!("{}", "Use :quit to exit".dimmed());
            }
            Err(ReadlineError::Eof) => {
                println!("{}", "Goodbye!".cyan());
                break;
            }
            Err(err) => {
                eprintln!("{} {:?}", "Error:".red().bold(), err);
                break;
            }
        }
    }

    if let Some(path) = history_path {
        let _ = rl.save_history(&path);
    }

    Ok(())
}

/// Get the history file path
fn get_history_path() -> Option<PathBuf> {
    env::var_os("HOME").map(|home| {
        let mut path = PathBuf::from(home);
        path.push(".sandeval_history");
        path
    })
}

fn print_help() {
    println!("{}", "sandeval REPL Commands:".cyan().bold());
    println!("  {}  - Show this help message", ":help, :h".green());
    println!("  {}  - Exit the REPL", ":quit, :q, :exit".green());
    println!("  {}  - Bind a name to a value", ":let NAME = EXPR".green());
    println!("  {}  - Show bound names", ":names, :n".green());
    println!("  {}  - Forget all names", ":clear, :c".green());
    println!();
    println!("{}", "Examples:".cyan().bold());
    println!("  {}  - Evaluate an expression", "2 + 2".dimmed());
    println!("  {}  - Bind a name", ":let x = 42".dimmed());
    println!("  {}  - Use it", "'big' if x > 10 else 'small'".dimmed());
}

/// Colour a value by type for terminal output
pub fn format_value(value: &Value) -> String {
    let repr = value.repr();
    match value {
        Value::String(_) => repr.yellow().to_string(),
        Value::Int(_) | Value::BigInt(_) | Value::Float(_) => repr.cyan().to_string(),
        Value::Bool(_) => repr.magenta().to_string(),
        Value::Null => repr.dimmed().to_string(),
        Value::List(_) | Value::Tuple(_) | Value::Set(_) | Value::Map(_) => repr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_let_binds_names() {
        let mut session = Session::new(false);
        assert_eq!(
            session.handle(":let x = 20 + 1").unwrap(),
            ReplOutput::Bound("x".to_string(), Value::Int(21))
        );
        assert_eq!(session.handle("x * 2").unwrap(), ReplOutput::Value(Value::Int(42)));
        assert_eq!(session.names(), vec![("x".to_string(), Value::Int(21))]);
    }

    #[test]
    fn test_clear_forgets_names() {
        let mut session = Session::new(false);
        session.handle(":let y = 1").unwrap();
        assert_eq!(session.handle(":clear").unwrap(), ReplOutput::Handled);
        assert!(session.names().is_empty());
        assert!(session.handle("y").is_err());
    }

    #[test]
    fn test_commands() {
        let mut session = Session::new(true);
        assert_eq!(session.handle(":q").unwrap(), ReplOutput::Quit);
        assert!(session.handle(":bogus").is_err());
        assert!(session.handle(":let 1x = 2").is_err());
        assert!(session.handle(":let x 2").is_err());
        assert_eq!(
            session.handle("[n * n for n in range(3)]").unwrap(),
            ReplOutput::Value(Value::List(vec![Value::Int(0), Value::Int(1), Value::Int(4)]))
        );
    }

    #[test]
    fn test_basic_mode_rejects_literals() {
        let mut session = Session::new(false);
        let error = session.handle("[1, 2]").unwrap_err();
        assert!(matches!(
            error.downcast_ref::<crate::error::EvalError>(),
            Some(crate::error::EvalError::FeatureNotAvailable(_))
        ));
    }
}
