use std::collections::BTreeMap;
use std::fs;

use log::error;

use crate::data_pool::DataPool;
use crate::error::BasicError;
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

/// Ordered line-number -> token-list store, plus the DATA pool that mirrors
/// every DATA line's literals (§3 "Program Store", §4.4).
#[derive(Default)]
pub struct ProgramStore {
    lines: BTreeMap<i64, Vec<Token>>,
    pub data: DataPool,
}

impl ProgramStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.data.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line_numbers(&self) -> Vec<i64> {
        self.lines.keys().copied().collect()
    }

    pub fn get(&self, line: i64) -> Option<Vec<Token>> {
        self.lines.get(&line).cloned()
    }

    pub fn first_line(&self) -> Option<i64> {
        self.lines.keys().next().copied()
    }

    pub fn next_line_after(&self, line: i64) -> Option<i64> {
        self.lines.range((line + 1)..).next().map(|(&l, _)| l)
    }

    /// Store or delete a program line. A bare line number with nothing
    /// after it deletes the line (§4.4). If the statement is DATA, its
    /// literals are also registered in the DATA pool.
    pub fn add_line(&mut self, line: i64, rest: &str) -> Result<(), BasicError> {
        let tokens = Lexer::tokenize(rest)?;
        if tokens.is_empty() {
            self.lines.remove(&line);
            self.data.del(line);
            return Ok(());
        }
        if tokens[0].is(TokenKind::Data) {
            self.data.add(line, &tokens)?;
        } else {
            self.data.del(line);
        }
        self.lines.insert(line, tokens);
        Ok(())
    }

    pub fn del_line(&mut self, line: i64) {
        self.lines.remove(&line);
        self.data.del(line);
    }

    /// Textual listing, one line per statement, lowest-numbered first.
    pub fn list(&self, from: Option<i64>, to: Option<i64>) -> String {
        let mut out = String::new();
        for (&line, tokens) in &self.lines {
            if from.is_some_and(|f| line < f) {
                continue;
            }
            if to.is_some_and(|t| line > t) {
                continue;
            }
            out.push_str(&format!("{line} {}\n", render_tokens(tokens)));
        }
        out
    }

    /// Renumber every line to `start, start+step, start+2*step, ...`,
    /// rewriting any GOTO/GOSUB/THEN/ELSE/ON/RESTORE targets that refer to
    /// old line numbers.
    pub fn renum(&mut self, start: i64, step: i64) -> Result<(), BasicError> {
        if step <= 0 {
            return Err(BasicError::value("RENUM step must be positive"));
        }
        let old_lines: Vec<i64> = self.lines.keys().copied().collect();
        let mapping: BTreeMap<i64, i64> = old_lines
            .iter()
            .enumerate()
            .map(|(i, &old)| (old, start + i as i64 * step))
            .collect();

        let mut new_lines = BTreeMap::new();
        for (old, tokens) in self.lines.iter() {
            let new_num = mapping[old];
            let rewritten = rewrite_targets(tokens, &mapping);
            new_lines.insert(new_num, rewritten);
        }

        let mut new_data = DataPool::new();
        for old in &old_lines {
            if let Some(tokens) = new_lines.get(&mapping[old]) {
                if tokens.first().map(|t| t.kind) == Some(TokenKind::Data) {
                    new_data.add(mapping[old], tokens)?;
                }
            }
        }

        self.lines = new_lines;
        self.data = new_data;
        Ok(())
    }

    pub fn save(&self, path: &str) -> Result<(), BasicError> {
        fs::write(path, self.list(None, None)).map_err(|e| {
            error!("cannot save '{path}': {e}");
            BasicError::io(format!("cannot save '{path}': {e}"))
        })
    }

    pub fn load(&mut self, path: &str) -> Result<(), BasicError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            error!("cannot load '{path}': {e}");
            BasicError::io(format!("cannot load '{path}': {e}"))
        })?;
        self.clear();
        for raw in contents.lines() {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let (num, rest) = split_line_number(trimmed)?;
            self.add_line(num, rest)?;
        }
        Ok(())
    }
}

fn split_line_number(line: &str) -> Result<(i64, &str), BasicError> {
    let digits_end = line.find(|c: char| !c.is_ascii_digit()).unwrap_or(line.len());
    if digits_end == 0 {
        return Err(BasicError::syntax(format!("expected a line number in '{line}'")));
    }
    let num: i64 = line[..digits_end]
        .parse()
        .map_err(|_| BasicError::syntax(format!("invalid line number in '{line}'")))?;
    Ok((num, line[digits_end..].trim_start()))
}

fn render_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && needs_space_before(&tokens[i - 1], token) {
            out.push(' ');
        }
        match token.kind {
            TokenKind::String => out.push_str(&format!("\"{}\"", token.value)),
            TokenKind::Rem => {
                out.push_str("REM");
                if !token.value.is_empty() {
                    out.push(' ');
                    out.push_str(&token.value);
                }
            }
            _ => out.push_str(&token.value),
        }
    }
    out
}

fn needs_space_before(prev: &Token, cur: &Token) -> bool {
    use TokenKind::*;
    !matches!(
        (prev.kind, cur.kind),
        (LParen, _) | (_, RParen) | (_, LParen) | (_, Comma) | (Hash, _)
    )
}

/// Rewrite any line-number references a statement carries (GOTO/GOSUB
/// targets, THEN/ELSE numeric jump forms, ON ... GOTO/GOSUB lists, RESTORE)
/// under a RENUM line-number mapping. Heuristic: any UNSIGNEDINT token that
/// directly follows GOTO/GOSUB/THEN/ELSE/ON-list punctuation and is a known
/// old line number gets rewritten; this mirrors how the original BASIC's
/// RENUM command walks tokens rather than re-parsing full expressions.
///
/// `ON k GOTO 100,200,300` needs every comma-separated target rewritten, not
/// just the first, so an ON-list is tracked separately from the single-shot
/// GOTO/GOSUB/THEN/ELSE/RESTORE case: once GOTO/GOSUB follows ON, every
/// UNSIGNEDINT up to the next colon (or end of statement) is a target.
fn rewrite_targets(tokens: &[Token], mapping: &BTreeMap<i64, i64>) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut expect_single = false;
    let mut in_on_list = false;
    let mut saw_on = false;
    for token in tokens {
        let mut token = token.clone();
        match token.kind {
            TokenKind::On => {
                saw_on = true;
            }
            TokenKind::Goto | TokenKind::Gosub => {
                if saw_on {
                    in_on_list = true;
                } else {
                    expect_single = true;
                }
                saw_on = false;
            }
            TokenKind::Then | TokenKind::Else => {
                expect_single = true;
                in_on_list = false;
                saw_on = false;
            }
            TokenKind::Restore => {
                expect_single = true;
            }
            TokenKind::UnsignedInt if expect_single || in_on_list => {
                if let Ok(old) = token.value.parse::<i64>() {
                    if let Some(&new) = mapping.get(&old) {
                        token.value = new.to_string();
                    }
                }
                expect_single = false;
            }
            TokenKind::Comma => {
                // ON ... GOTO/GOSUB n1, n2, ... keeps expecting targets between commas
            }
            TokenKind::Colon => {
                expect_single = false;
                in_on_list = false;
                saw_on = false;
            }
            _ => {
                in_on_list = false;
            }
        }
        out.push(token);
    }
    out
}
