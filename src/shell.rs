use std::io::{self, BufRead, Write};

use log::error;

use crate::controller::ExecutionController;
use crate::error::BasicError;
use crate::evaluator::Evaluator;
use crate::lexer::Lexer;
use crate::program::ProgramStore;
use crate::token::TokenKind;

/// The interactive front end: sniffs each line of input for a leading line
/// number (program-line edit) versus an immediate command (§6 "External
/// Interfaces"). Owns the Program Store and Evaluator for the lifetime of
/// the session so variables and program text survive across RUNs.
pub struct Shell {
    program: ProgramStore,
    evaluator: Evaluator,
    controller: ExecutionController,
}

impl Shell {
    pub fn new() -> Self {
        Self {
            program: ProgramStore::new(),
            evaluator: Evaluator::new(),
            controller: ExecutionController::new(),
        }
    }

    /// Load a file and drop straight into RUN, without an interactive
    /// prompt (the `--run FILE` batch mode).
    pub fn run_file(&mut self, path: &str) -> Result<(), BasicError> {
        self.program.load(path)?;
        self.run_and_report();
        Ok(())
    }

    /// Load a file, then drop into the interactive REPL with it already
    /// in the Program Store (so the user can LIST/RUN/edit it).
    pub fn load_and_enter_repl(&mut self, path: &str) -> Result<(), BasicError> {
        self.program.load(path)?;
        self.repl();
        Ok(())
    }

    /// The REPL: read-eval-print until EOF or EXIT.
    pub fn repl(&mut self) {
        let stdin = io::stdin();
        loop {
            print!("] ");
            io::stdout().flush().ok();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break, // EOF
                Ok(_) => {}
                Err(e) => {
                    error!("stdin read failed: {e}");
                    break;
                }
            }
            let line = line.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }
            match self.dispatch(line) {
                Ok(Dispatch::Continue) => {}
                Ok(Dispatch::Exit) => break,
                Err(e) => println!("{e}"),
            }
        }
    }

    fn dispatch(&mut self, line: &str) -> Result<Dispatch, BasicError> {
        let trimmed = line.trim_start();
        if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
            let digits_end = trimmed
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(trimmed.len());
            let num: i64 = trimmed[..digits_end]
                .parse()
                .map_err(|_| BasicError::syntax("invalid line number"))?;
            self.program.add_line(num, trimmed[digits_end..].trim_start())?;
            return Ok(Dispatch::Continue);
        }

        let tokens = Lexer::tokenize(trimmed)?;
        let Some(first) = tokens.first() else {
            return Ok(Dispatch::Continue);
        };

        match first.kind {
            TokenKind::New => {
                self.program.clear();
                self.evaluator.new_program();
                self.controller = ExecutionController::new();
            }
            TokenKind::List => {
                let (from, to) = parse_optional_range(&tokens[1..]);
                print!("{}", self.program.list(from, to));
            }
            TokenKind::Run => {
                let start = if tokens.len() > 1 {
                    Some(tokens[1].value.parse().map_err(|_| {
                        BasicError::syntax("expected a line number after RUN")
                    })?)
                } else {
                    None
                };
                self.program.data.restore(0)?;
                match self.controller.run(&mut self.evaluator, &mut self.program, start) {
                    Ok(()) => {}
                    Err(e) => println!("{e}"),
                }
            }
            TokenKind::Save => {
                let path = string_arg(&tokens)?;
                self.program.save(&path)?;
            }
            TokenKind::Load => {
                let path = string_arg(&tokens)?;
                self.program.load(&path)?;
            }
            TokenKind::Renum => {
                let (start, step) = parse_renum_args(&tokens[1..]);
                self.program.renum(start.unwrap_or(10), step.unwrap_or(10))?;
            }
            TokenKind::Exit => return Ok(Dispatch::Exit),
            _ => {
                // Immediate-mode execution: evaluate the statement right now
                // without storing it as a program line.
                match self.evaluator.exec_line(0, &tokens, &mut self.program.data, None) {
                    Ok(_) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(Dispatch::Continue)
    }

    fn run_and_report(&mut self) {
        self.program.data.restore(0).ok();
        if let Err(e) = self.controller.run(&mut self.evaluator, &mut self.program, None) {
            eprintln!("{e}");
            std::process::exit(if e.is_interrupted() { 0 } else { 1 });
        }
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

enum Dispatch {
    Continue,
    Exit,
}

/// LIST's range grammar, per `basicui.py`'s four-tier dispatch: no args lists
/// everything; one number lists just that line; two tokens are either `x y`
/// (a range), `- y` (up to y) or `x -` (from x to the end); three tokens are
/// `x - y`. A single bare number means "just this line" (`from == to`).
fn parse_optional_range(tokens: &[crate::token::Token]) -> (Option<i64>, Option<i64>) {
    parse_range_tiers(tokens, true)
}

/// RENUM's `start`/`step` pair, using the same four-tier grammar as
/// [`parse_optional_range`] but with different single-token semantics: a
/// bare number is `start` alone, with `step` left to its default.
fn parse_renum_args(tokens: &[crate::token::Token]) -> (Option<i64>, Option<i64>) {
    parse_range_tiers(tokens, false)
}

fn parse_range_tiers(
    tokens: &[crate::token::Token],
    bare_number_fills_both: bool,
) -> (Option<i64>, Option<i64>) {
    match tokens.len() {
        0 => (None, None),
        1 => {
            let x = tokens[0].value.parse().ok();
            if bare_number_fills_both {
                (x, x)
            } else {
                (x, None)
            }
        }
        2 => {
            if tokens[0].kind == TokenKind::Minus {
                (None, tokens[1].value.parse().ok())
            } else if tokens[1].kind == TokenKind::Minus {
                (tokens[0].value.parse().ok(), None)
            } else {
                (tokens[0].value.parse().ok(), tokens[1].value.parse().ok())
            }
        }
        3 => (tokens[0].value.parse().ok(), tokens[2].value.parse().ok()),
        _ => (None, None),
    }
}

fn string_arg(tokens: &[crate::token::Token]) -> Result<String, BasicError> {
    tokens
        .get(1)
        .filter(|t| t.kind == TokenKind::String)
        .map(|t| t.value.clone())
        .ok_or_else(|| BasicError::syntax("expected a quoted filename"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_line_number_stores_a_program_line() {
        let mut shell = Shell::new();
        shell.dispatch("10 PRINT \"HI\"").unwrap();
        assert_eq!(shell.program.line_numbers(), vec![10]);
    }

    #[test]
    fn bare_line_number_with_nothing_after_deletes_it() {
        let mut shell = Shell::new();
        shell.dispatch("10 PRINT \"HI\"").unwrap();
        shell.dispatch("10").unwrap();
        assert!(shell.program.line_numbers().is_empty());
    }

    #[test]
    fn new_clears_the_program_and_variables() {
        let mut shell = Shell::new();
        shell.dispatch("10 PRINT \"HI\"").unwrap();
        shell.dispatch("LET A = 1").unwrap();
        shell.dispatch("NEW").unwrap();
        assert!(shell.program.line_numbers().is_empty());
        assert!(shell.evaluator.variables.get_scalar("A").is_err());
    }

    #[test]
    fn immediate_mode_executes_without_storing_a_line() {
        let mut shell = Shell::new();
        shell.dispatch("LET A = 5").unwrap();
        assert!(shell.program.line_numbers().is_empty());
        assert_eq!(
            *shell.evaluator.variables.get_scalar("A").unwrap(),
            crate::value::Value::Int(5)
        );
    }

    #[test]
    fn exit_ends_the_session() {
        let mut shell = Shell::new();
        assert!(matches!(shell.dispatch("EXIT").unwrap(), Dispatch::Exit));
    }

    fn sample_program() -> Shell {
        let mut shell = Shell::new();
        shell.dispatch("10 PRINT \"A\"").unwrap();
        shell.dispatch("20 PRINT \"B\"").unwrap();
        shell.dispatch("30 PRINT \"C\"").unwrap();
        shell
    }

    #[test]
    fn list_with_no_args_lists_every_line() {
        let shell = sample_program();
        let (from, to) = parse_optional_range(&[]);
        let listing = shell.program.list(from, to);
        assert!(listing.contains("10 ") && listing.contains("20 ") && listing.contains("30 "));
    }

    #[test]
    fn list_x_y_lists_only_the_given_range() {
        let shell = sample_program();
        let tokens = Lexer::tokenize("10 20").unwrap();
        let (from, to) = parse_optional_range(&tokens);
        let listing = shell.program.list(from, to);
        assert!(listing.contains("10 ") && listing.contains("20 ") && !listing.contains("30 "));
    }

    #[test]
    fn list_dash_y_lists_up_to_y() {
        let shell = sample_program();
        let tokens = Lexer::tokenize("- 20").unwrap();
        let (from, to) = parse_optional_range(&tokens);
        let listing = shell.program.list(from, to);
        assert!(listing.contains("10 ") && listing.contains("20 ") && !listing.contains("30 "));
    }

    #[test]
    fn list_x_dash_lists_from_x_to_the_end() {
        let shell = sample_program();
        let tokens = Lexer::tokenize("20 -").unwrap();
        let (from, to) = parse_optional_range(&tokens);
        let listing = shell.program.list(from, to);
        assert!(listing.contains("20 ") && listing.contains("30 ") && !listing.contains("10 "));
    }

    #[test]
    fn renum_with_dash_form_parses_start_and_step() {
        let mut shell = sample_program();
        shell.dispatch("RENUM 100 - 25").unwrap();
        assert_eq!(shell.program.line_numbers(), vec![100, 125, 150]);
    }
}
