use std::collections::BTreeMap;

use crate::error::BasicError;
use crate::token::{Token, TokenKind};
use crate::value::Value;

/// Per-line literal constants plus a monotone read cursor, consumed by
/// READ and reset by RESTORE (§4.5, §3 "DATA Pool").
#[derive(Debug, Default)]
pub struct DataPool {
    lines: BTreeMap<i64, Vec<Value>>,
    /// Line currently being consumed, or 0 meaning "before the first DATA line".
    next_data: i64,
    /// Position of the next value to pop within `lines[next_data]`.
    cursor: usize,
}

impl DataPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.next_data = 0;
        self.cursor = 0;
    }

    pub fn add(&mut self, line: i64, tokens: &[Token]) -> Result<(), BasicError> {
        let values = decode_literals(tokens)?;
        self.lines.insert(line, values);
        Ok(())
    }

    pub fn del(&mut self, line: i64) {
        self.lines.remove(&line);
        if self.next_data == line {
            self.next_data = 0;
            self.cursor = 0;
        }
    }

    fn line_after(&self, line: i64) -> Option<i64> {
        self.lines.range((line + 1)..).next().map(|(&l, _)| l)
    }

    fn lowest_line(&self) -> Option<i64> {
        self.lines.keys().next().copied()
    }

    /// Pop the next literal, advancing to the next DATA line when the
    /// current one is exhausted.
    pub fn read(&mut self) -> Result<Value, BasicError> {
        loop {
            if self.next_data == 0 {
                let Some(first) = self.lowest_line() else {
                    return Err(BasicError::runtime("READ: no DATA to read"));
                };
                self.next_data = first;
                self.cursor = 0;
            }
            let values = self
                .lines
                .get(&self.next_data)
                .expect("next_data always points at a live DATA line");
            if self.cursor < values.len() {
                let value = values[self.cursor].clone();
                self.cursor += 1;
                return Ok(value);
            }
            match self.line_after(self.next_data) {
                Some(next) => {
                    self.next_data = next;
                    self.cursor = 0;
                }
                None => return Err(BasicError::runtime("READ past end of DATA")),
            }
        }
    }

    /// Reset the cursor so the next READ advances into DATA line `n`
    /// (`n == 0` resets to "before the first DATA line").
    pub fn restore(&mut self, n: i64) -> Result<(), BasicError> {
        if n == 0 {
            self.next_data = 0;
            self.cursor = 0;
            return Ok(());
        }
        if !self.lines.contains_key(&n) {
            return Err(BasicError::runtime(format!("RESTORE: no DATA at line {n}")));
        }
        // Position the cursor at the predecessor of `n` so the next read()
        // advances forward into `n` itself.
        self.next_data = self.lines.range(..n).next_back().map(|(&l, _)| l).unwrap_or(0);
        self.cursor = if self.next_data == 0 {
            0
        } else {
            self.lines[&self.next_data].len()
        };
        Ok(())
    }
}

/// Decode a DATA line's token list (keyword + literals + commas) into
/// values, honoring a unary `-` sign latch that resets at each comma.
fn decode_literals(tokens: &[Token]) -> Result<Vec<Value>, BasicError> {
    let mut values = Vec::new();
    let mut negate = false;
    let mut i = 0;
    // skip the leading DATA keyword token, if present
    if tokens.first().map(|t| t.kind) == Some(TokenKind::Data) {
        i = 1;
    }
    while i < tokens.len() {
        let token = &tokens[i];
        match token.kind {
            TokenKind::Comma => {
                negate = false;
            }
            TokenKind::Minus => {
                negate = true;
            }
            TokenKind::UnsignedInt => {
                let mut n: i64 = token.value.parse().map_err(|_| {
                    BasicError::syntax(format!("invalid integer literal '{}'", token.value))
                })?;
                if negate {
                    n = -n;
                }
                values.push(Value::Int(n));
                negate = false;
            }
            TokenKind::UnsignedFloat => {
                let mut f: f64 = token.value.parse().map_err(|_| {
                    BasicError::syntax(format!("invalid float literal '{}'", token.value))
                })?;
                if negate {
                    f = -f;
                }
                values.push(Value::Float(f));
                negate = false;
            }
            TokenKind::String => {
                values.push(Value::Str(token.value.clone()));
                negate = false;
            }
            _ => {
                return Err(BasicError::syntax(format!(
                    "unexpected token '{}' in DATA statement",
                    token.value
                )))
            }
        }
        i += 1;
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn tokens_of(src: &str) -> Vec<Token> {
        Lexer::tokenize(src).unwrap()
    }

    #[test]
    fn reads_literals_left_to_right_honoring_sign() {
        let mut pool = DataPool::new();
        pool.add(10, &tokens_of("DATA 1, -2, 3.5, \"X\"")).unwrap();
        assert_eq!(pool.read().unwrap(), Value::Int(1));
        assert_eq!(pool.read().unwrap(), Value::Int(-2));
        assert_eq!(pool.read().unwrap(), Value::Float(3.5));
        assert_eq!(pool.read().unwrap(), Value::Str("X".into()));
    }

    #[test]
    fn advances_to_next_data_line_when_exhausted() {
        let mut pool = DataPool::new();
        pool.add(10, &tokens_of("DATA 1, 2")).unwrap();
        pool.add(20, &tokens_of("DATA 3")).unwrap();
        assert_eq!(pool.read().unwrap(), Value::Int(1));
        assert_eq!(pool.read().unwrap(), Value::Int(2));
        assert_eq!(pool.read().unwrap(), Value::Int(3));
    }

    #[test]
    fn read_past_end_is_a_runtime_error() {
        let mut pool = DataPool::new();
        pool.add(10, &tokens_of("DATA 1")).unwrap();
        pool.read().unwrap();
        assert!(pool.read().is_err());
    }

    #[test]
    fn restore_to_zero_rewinds_to_the_start() {
        let mut pool = DataPool::new();
        pool.add(10, &tokens_of("DATA 1, 2")).unwrap();
        pool.read().unwrap();
        pool.restore(0).unwrap();
        assert_eq!(pool.read().unwrap(), Value::Int(1));
    }

    #[test]
    fn restore_to_a_line_reenters_at_that_lines_start() {
        let mut pool = DataPool::new();
        pool.add(10, &tokens_of("DATA 1, 2")).unwrap();
        pool.add(20, &tokens_of("DATA 3")).unwrap();
        pool.read().unwrap();
        pool.read().unwrap();
        pool.read().unwrap();
        pool.restore(10).unwrap();
        assert_eq!(pool.read().unwrap(), Value::Int(1));
    }

    #[test]
    fn restore_to_a_non_data_line_is_an_error() {
        let mut pool = DataPool::new();
        pool.add(10, &tokens_of("DATA 1")).unwrap();
        assert!(pool.restore(15).is_err());
    }
}
