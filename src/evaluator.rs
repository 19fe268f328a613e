use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};

use log::error;

use crate::control::ControlMsg;
use crate::data_pool::DataPool;
use crate::error::BasicError;
use crate::token::{Token, TokenKind};
use crate::value::Value;
use crate::variables::VariableStore;

/// One process-wide xorshift RNG stream (§5, §9 "Global RNG"), reseeded by
/// RANDOMIZE or a negative RND argument.
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    pub fn reseed(&mut self, seed: i64) {
        self.state = (seed as u64).max(1);
    }

    /// Returns a value in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn range_inclusive(&mut self, lo: i64, hi: i64) -> i64 {
        if hi <= lo {
            return lo;
        }
        let span = (hi - lo + 1) as f64;
        lo + (self.next_f64() * span) as i64
    }
}

enum FileHandle {
    Input(BufReader<File>),
    Output(BufWriter<File>),
    Append(BufWriter<File>),
}

/// Owns everything that survives across RUNs until NEW: variables/arrays,
/// open file handles, the print column, and the RNG stream (§5).
pub struct Evaluator {
    pub variables: VariableStore,
    files: HashMap<i64, FileHandle>,
    print_col: usize,
    rng: Rng,
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            variables: VariableStore::new(),
            files: HashMap::new(),
            print_col: 0,
            rng: Rng::new(0x2545F4914F6CDD1D),
        }
    }

    pub fn new_program(&mut self) {
        self.variables.clear();
        self.close_all_files();
        self.print_col = 0;
    }

    pub fn close_all_files(&mut self) {
        for (_, handle) in self.files.drain() {
            let _ = match handle {
                FileHandle::Input(_) => Ok(()),
                FileHandle::Output(mut w) => w.flush(),
                FileHandle::Append(mut w) => w.flush(),
            };
        }
    }

    /// Execute one logical program line (already split off its leading
    /// line-number token). `last_msg` is the ControlMsg the controller saw
    /// from the previous statement, used by FOR to distinguish first entry
    /// from NEXT re-entry (§4.2, §9 open question (a)).
    pub fn exec_line(
        &mut self,
        line_num: i64,
        tokens: &[Token],
        data: &mut DataPool,
        last_msg: Option<&ControlMsg>,
    ) -> Result<Option<ControlMsg>, BasicError> {
        let mut ctx = StmtCtx {
            eval: self,
            data,
            tokens,
            pos: 0,
            last_msg,
        };
        ctx.exec_stmt_sequence(tokens)
            .map_err(|e| e.with_line(line_num))
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution context for a single statement/line: bundles the mutable
/// collaborators a recursive-descent evaluator needs (variables, DATA
/// pool, file table, RNG, print column) plus the token cursor.
struct StmtCtx<'a> {
    eval: &'a mut Evaluator,
    data: &'a mut DataPool,
    tokens: &'a [Token],
    pos: usize,
    last_msg: Option<&'a ControlMsg>,
}

impl<'a> StmtCtx<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token, BasicError> {
        match self.peek_kind() {
            Some(k) if k == kind => Ok(self.advance().unwrap()),
            Some(_) => Err(BasicError::syntax(format!(
                "unexpected token '{}'",
                self.peek().unwrap().value
            ))),
            None => Err(BasicError::syntax("unexpected end of statement")),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // ---- statement sequencing ------------------------------------------

    /// Run a colon-separated sequence of statements over `tokens`, stopping
    /// early on the first ControlMsg. An `IF` consumes the rest of the
    /// slice as its conditional body (§4.2).
    fn exec_stmt_sequence(&mut self, tokens: &'a [Token]) -> Result<Option<ControlMsg>, BasicError> {
        let saved_tokens = self.tokens;
        let saved_pos = self.pos;
        self.tokens = tokens;
        self.pos = 0;
        let result = self.run_sequence();
        self.tokens = saved_tokens;
        self.pos = saved_pos;
        result
    }

    fn run_sequence(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        loop {
            if self.at_end() {
                return Ok(None);
            }
            if self.peek_kind() == Some(TokenKind::If) {
                return self.exec_if();
            }
            if let Some(msg) = self.exec_one_statement()? {
                return Ok(Some(msg));
            }
            if self.at_end() {
                return Ok(None);
            }
            self.expect(TokenKind::Colon)?;
        }
    }

    fn exec_if(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // IF
        let cond = self.parse_logexpr()?;
        self.expect(TokenKind::Then)?;
        let truthy = cond.truthy()?;

        let then_start = self.pos;
        let else_pos = self.find_top_level_else(then_start);
        let then_end = else_pos.unwrap_or(self.tokens.len());
        let then_tokens: &'a [Token] = &self.tokens[then_start..then_end];

        if truthy {
            if let Some(target) = single_line_number(then_tokens) {
                self.pos = self.tokens.len();
                return Ok(Some(ControlMsg::SimpleJump { target }));
            }
            return self.exec_stmt_sequence(then_tokens);
        }

        match else_pos {
            Some(ep) => {
                let else_tokens = &self.tokens[ep + 1..];
                if let Some(target) = single_line_number(else_tokens) {
                    self.pos = self.tokens.len();
                    return Ok(Some(ControlMsg::SimpleJump { target }));
                }
                self.exec_stmt_sequence(else_tokens)
            }
            None => {
                self.pos = self.tokens.len();
                Ok(None)
            }
        }
    }

    fn find_top_level_else(&self, from: usize) -> Option<usize> {
        let mut depth = 0i32;
        for (i, t) in self.tokens.iter().enumerate().skip(from) {
            match t.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => depth -= 1,
                TokenKind::Else if depth == 0 => return Some(i),
                _ => {}
            }
        }
        None
    }

    // ---- statement dispatch ---------------------------------------------

    fn exec_one_statement(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        use TokenKind::*;
        match self.peek_kind() {
            Some(Let) => {
                self.advance();
                self.assignment_stmt()
            }
            Some(Name) => self.assignment_stmt(),
            Some(Dim) => self.dim_stmt(),
            Some(Print) => self.print_stmt(),
            Some(Input) => self.input_stmt(),
            Some(Open) => self.open_stmt(),
            Some(Close) => self.close_stmt(),
            Some(Fseek) => self.fseek_stmt(),
            Some(Goto) => self.goto_stmt(),
            Some(Gosub) => self.gosub_stmt(),
            Some(Return) => {
                self.advance();
                Ok(Some(ControlMsg::Return))
            }
            Some(Stop) | Some(End) => {
                self.advance();
                self.eval.close_all_files();
                Ok(Some(ControlMsg::Stop))
            }
            Some(For) => self.for_stmt(),
            Some(Next) => self.next_stmt(),
            Some(On) => self.on_stmt(),
            Some(Data) => {
                self.pos = self.tokens.len();
                Ok(None)
            }
            Some(Read) => self.read_stmt(),
            Some(Restore) => self.restore_stmt(),
            Some(Randomize) => self.randomize_stmt(),
            Some(Rem) => {
                self.advance();
                Ok(None)
            }
            Some(List) | Some(Run) | Some(Save) | Some(Load) | Some(New) | Some(Exit)
            | Some(Renum) => Err(BasicError::syntax(format!(
                "'{}' is a shell command, not a program statement",
                self.peek().unwrap().value
            ))),
            Some(_) => Err(BasicError::syntax(format!(
                "unexpected token '{}'",
                self.peek().unwrap().value
            ))),
            None => Ok(None),
        }
    }

    // ---- assignment -------------------------------------------------

    fn assignment_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        let name_token = self.expect(TokenKind::Name)?.clone();
        let name = name_token.value.clone();

        if self.peek_kind() == Some(TokenKind::LParen) && self.eval.variables.has_array(&name) {
            self.advance(); // (
            let indices = self.parse_index_list()?;
            self.expect(TokenKind::RParen)?;
            self.expect(TokenKind::Assign)?;
            let value = self.parse_logexpr()?;
            self.eval.variables.set_array_element(&name, &indices, value)?;
            return Ok(None);
        }

        self.expect(TokenKind::Assign)?;
        let value = self.parse_logexpr()?;
        self.eval.variables.set_scalar(&name, value)?;
        Ok(None)
    }

    fn parse_index_list(&mut self) -> Result<Vec<i64>, BasicError> {
        let mut indices = Vec::new();
        loop {
            let v = self.parse_logexpr()?;
            indices.push(v.as_i64()?);
            if self.peek_kind() == Some(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        if indices.len() > 3 {
            return Err(BasicError::index("arrays support at most 3 dimensions"));
        }
        Ok(indices)
    }

    // ---- DIM ----------------------------------------------------------

    fn dim_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // DIM
        loop {
            let name = self.expect(TokenKind::Name)?.value.clone();
            self.expect(TokenKind::LParen)?;
            let mut dims = Vec::new();
            loop {
                let size = self.parse_logexpr()?;
                dims.push(non_negative_int(&size)?);
                if self.peek_kind() == Some(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(TokenKind::RParen)?;
            self.eval.variables.dim(&name, dims)?;
            if self.peek_kind() == Some(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(None)
    }

    // ---- PRINT ----------------------------------------------------------

    fn print_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // PRINT
        self.print_items(None)
    }

    fn print_items(&mut self, handle: Option<i64>) -> Result<Option<ControlMsg>, BasicError> {
        let mut suppress_newline = false;
        loop {
            if self.at_end() || self.peek_kind() == Some(TokenKind::Colon) {
                break;
            }
            suppress_newline = false;
            if self.peek_kind() == Some(TokenKind::Function)
                && self.peek().unwrap().value == "TAB"
            {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let n = self.parse_logexpr()?.as_i64()?;
                self.expect(TokenKind::RParen)?;
                self.tab_to(handle, n)?;
            } else {
                let value = self.parse_logexpr()?;
                self.write_out(handle, &value.to_string())?;
            }

            match self.peek_kind() {
                Some(TokenKind::Semicolon) => {
                    self.advance();
                    suppress_newline = true;
                }
                Some(TokenKind::Comma) => {
                    self.advance();
                    let target = ((self.eval_print_col() / 14) + 1) * 14;
                    self.pad_to(handle, target)?;
                    suppress_newline = true;
                }
                _ => break,
            }
        }
        if !suppress_newline {
            self.write_out(handle, "\n")?;
            self.set_print_col(0);
        }
        Ok(None)
    }

    fn eval_print_col(&self) -> usize {
        self.eval.print_col
    }

    fn set_print_col(&mut self, col: usize) {
        self.eval.print_col = col;
    }

    fn write_out(&mut self, handle: Option<i64>, text: &str) -> Result<(), BasicError> {
        match handle {
            None => {
                print!("{text}");
                io::stdout().flush().ok();
            }
            Some(fh) => {
                let file = self.output_handle(fh)?;
                file.write_all(text.as_bytes())
                    .map_err(|e| BasicError::io(format!("write failed: {e}")))?;
            }
        }
        for c in text.chars() {
            if c == '\n' {
                self.eval.print_col = 0;
            } else {
                self.eval.print_col += 1;
            }
        }
        Ok(())
    }

    fn tab_to(&mut self, handle: Option<i64>, n: i64) -> Result<(), BasicError> {
        let n = n.max(0) as usize;
        if self.eval_print_col() > n {
            self.write_out(handle, "\n")?;
        }
        self.pad_to(handle, n)
    }

    fn pad_to(&mut self, handle: Option<i64>, target: usize) -> Result<(), BasicError> {
        let col = self.eval_print_col();
        if target > col {
            let padding = " ".repeat(target - col);
            self.write_out(handle, &padding)?;
        }
        Ok(())
    }

    fn output_handle(&mut self, fh: i64) -> Result<&mut dyn Write, BasicError> {
        match self.eval.files.get_mut(&fh) {
            Some(FileHandle::Output(w)) => Ok(w),
            Some(FileHandle::Append(w)) => Ok(w),
            Some(FileHandle::Input(_)) => {
                Err(BasicError::io(format!("file #{fh} is not open for output")))
            }
            None => Err(BasicError::io(format!("file #{fh} is not open"))),
        }
    }

    // ---- INPUT ----------------------------------------------------------

    fn input_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // INPUT

        let mut handle = None;
        if self.peek_kind() == Some(TokenKind::Hash) {
            self.advance();
            handle = Some(self.parse_logexpr()?.as_i64()?);
            self.expect(TokenKind::Comma)?;
        }

        let mut prompt = "? ".to_string();
        if handle.is_none() && self.peek_kind() == Some(TokenKind::String) {
            prompt = self.advance().unwrap().value.clone();
            self.expect(TokenKind::Semicolon)?;
        }

        let mut names = Vec::new();
        loop {
            names.push(self.expect(TokenKind::Name)?.value.clone());
            if self.peek_kind() == Some(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }

        loop {
            let line = match handle {
                None => {
                    print!("{prompt}");
                    io::stdout().flush().ok();
                    read_stdin_line()?
                }
                Some(fh) => read_handle_line(self.input_handle(fh)?)?,
            };
            let parts: Vec<&str> = splitn_trim(&line, names.len());
            match self.apply_input(&names, &parts) {
                Ok(()) => break,
                Err(BasicError::Type { .. }) => {
                    println!("Non-numeric input...redo from start");
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(None)
    }

    fn apply_input(&mut self, names: &[String], parts: &[&str]) -> Result<(), BasicError> {
        for (name, part) in names.iter().zip(parts.iter()) {
            let value = if crate::variables::is_string_name(name) {
                Value::Str(part.trim().to_string())
            } else {
                let parsed: f64 = part
                    .trim()
                    .parse()
                    .map_err(|_| BasicError::type_err(format!("non-numeric input for {name}")))?;
                if parsed.fract() == 0.0 && parsed.is_finite() {
                    Value::Int(parsed as i64)
                } else {
                    Value::Float(parsed)
                }
            };
            self.eval.variables.set_scalar(name, value)?;
        }
        Ok(())
    }

    fn input_handle(&mut self, fh: i64) -> Result<&mut BufReader<File>, BasicError> {
        match self.eval.files.get_mut(&fh) {
            Some(FileHandle::Input(r)) => Ok(r),
            Some(_) => Err(BasicError::io(format!("file #{fh} is not open for input"))),
            None => Err(BasicError::io(format!("file #{fh} is not open"))),
        }
    }

    // ---- OPEN / CLOSE / FSEEK -----------------------------------------

    fn open_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // OPEN
        let path = self.parse_logexpr()?.as_str()?.to_string();
        self.expect(TokenKind::For)?;
        let mode = match self.peek_kind() {
            Some(TokenKind::Input) => {
                self.advance();
                "input"
            }
            Some(TokenKind::Output) => {
                self.advance();
                "output"
            }
            Some(TokenKind::Append) => {
                self.advance();
                "append"
            }
            _ => return Err(BasicError::syntax("expected INPUT, OUTPUT or APPEND")),
        };
        self.expect(TokenKind::As)?;
        self.expect(TokenKind::Hash)?;
        let handle_num = self.parse_logexpr()?.as_i64()?;

        let mut else_target = None;
        if self.peek_kind() == Some(TokenKind::Else) {
            self.advance();
            if self.peek_kind() == Some(TokenKind::Goto) {
                self.advance();
            }
            else_target = Some(self.parse_logexpr()?.as_i64()?);
        }

        match self.do_open(&path, mode, handle_num) {
            Ok(()) => Ok(None),
            Err(e) => match else_target {
                Some(target) => Ok(Some(ControlMsg::SimpleJump { target })),
                None => Err(e),
            },
        }
    }

    fn do_open(&mut self, path: &str, mode: &str, handle_num: i64) -> Result<(), BasicError> {
        if self.eval.files.contains_key(&handle_num) {
            return Err(BasicError::io(format!("file #{handle_num} is already open")));
        }
        let handle = match mode {
            "input" => {
                let file = File::open(path).map_err(|e| {
                    error!("cannot open '{path}': {e}");
                    BasicError::io(format!("cannot open '{path}': {e}"))
                })?;
                FileHandle::Input(BufReader::new(file))
            }
            "output" => {
                let file = File::create(path).map_err(|e| {
                    error!("cannot create '{path}': {e}");
                    BasicError::io(format!("cannot create '{path}': {e}"))
                })?;
                FileHandle::Output(BufWriter::new(file))
            }
            "append" => {
                let file = OpenOptions::new().create(true).append(true).open(path).map_err(|e| {
                    error!("cannot open '{path}': {e}");
                    BasicError::io(format!("cannot open '{path}': {e}"))
                })?;
                FileHandle::Append(BufWriter::new(file))
            }
            _ => unreachable!(),
        };
        self.eval.files.insert(handle_num, handle);
        Ok(())
    }

    fn close_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // CLOSE
        self.expect(TokenKind::Hash)?;
        let handle_num = self.parse_logexpr()?.as_i64()?;
        match self.eval.files.remove(&handle_num) {
            Some(FileHandle::Output(mut w)) => {
                w.flush().map_err(|e| BasicError::io(e.to_string()))?;
            }
            Some(FileHandle::Append(mut w)) => {
                w.flush().map_err(|e| BasicError::io(e.to_string()))?;
            }
            Some(FileHandle::Input(_)) => {}
            None => return Err(BasicError::io(format!("file #{handle_num} is not open"))),
        }
        Ok(None)
    }

    fn fseek_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // FSEEK
        self.expect(TokenKind::Hash)?;
        let handle_num = self.parse_logexpr()?.as_i64()?;
        self.expect(TokenKind::Comma)?;
        let offset = self.parse_logexpr()?.as_i64()?;
        match self.eval.files.get_mut(&handle_num) {
            Some(FileHandle::Input(r)) => r
                .seek(SeekFrom::Start(offset as u64))
                .map(|_| ())
                .map_err(|e| BasicError::io(e.to_string())),
            Some(FileHandle::Output(w)) => w
                .seek(SeekFrom::Start(offset as u64))
                .map(|_| ())
                .map_err(|e| BasicError::io(e.to_string())),
            Some(FileHandle::Append(w)) => w
                .seek(SeekFrom::Start(offset as u64))
                .map(|_| ())
                .map_err(|e| BasicError::io(e.to_string())),
            None => Err(BasicError::io(format!("file #{handle_num} is not open"))),
        }?;
        Ok(None)
    }

    // ---- control flow ---------------------------------------------------

    fn goto_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // GOTO
        let target = self.parse_logexpr()?.as_i64()?;
        Ok(Some(ControlMsg::SimpleJump { target }))
    }

    fn gosub_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // GOSUB
        let target = self.parse_logexpr()?.as_i64()?;
        Ok(Some(ControlMsg::Gosub { target }))
    }

    fn for_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // FOR
        let var = self.expect(TokenKind::Name)?.value.clone();
        self.expect(TokenKind::Assign)?;
        let start = self.parse_logexpr()?;
        self.expect(TokenKind::To)?;
        let limit = self.parse_logexpr()?;
        let mut step = Value::Int(1);
        if self.peek_kind() == Some(TokenKind::Step) {
            self.advance();
            step = self.parse_logexpr()?;
        }
        let step_f = step.as_f64()?;
        if step_f == 0.0 {
            return Err(BasicError::value("FOR step must not be zero"));
        }

        let re_entering = matches!(
            self.last_msg,
            Some(ControlMsg::LoopRepeat { loop_var }) if loop_var == &var
        );

        let current = if re_entering {
            let prev = self.eval.variables.get_scalar(&var)?.clone();
            prev.add(&step)?
        } else {
            start
        };
        self.eval.variables.set_scalar(&var, current.clone())?;

        let limit_f = limit.as_f64()?;
        let cur_f = current.as_f64()?;
        let terminated = (step_f > 0.0 && cur_f > limit_f) || (step_f < 0.0 && cur_f < limit_f);

        if terminated {
            Ok(Some(ControlMsg::LoopSkip { loop_var: var }))
        } else {
            Ok(Some(ControlMsg::LoopBegin { loop_var: var }))
        }
    }

    fn next_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // NEXT
        let var = self.expect(TokenKind::Name)?.value.clone();
        Ok(Some(ControlMsg::LoopRepeat { loop_var: var }))
    }

    fn on_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // ON
        let k = self.parse_logexpr()?.as_i64()?;
        let gosub = match self.peek_kind() {
            Some(TokenKind::Goto) => {
                self.advance();
                false
            }
            Some(TokenKind::Gosub) => {
                self.advance();
                true
            }
            _ => return Err(BasicError::syntax("expected GOTO or GOSUB after ON")),
        };
        let mut targets = Vec::new();
        loop {
            targets.push(self.parse_logexpr()?.as_i64()?);
            if self.peek_kind() == Some(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        if k < 1 || (k as usize) > targets.len() {
            return Ok(None);
        }
        let target = targets[(k - 1) as usize];
        if gosub {
            Ok(Some(ControlMsg::Gosub { target }))
        } else {
            Ok(Some(ControlMsg::SimpleJump { target }))
        }
    }

    fn read_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // READ
        loop {
            let name = self.expect(TokenKind::Name)?.value.clone();
            let raw = self.data.read()?;
            let value = coerce_for_name(&name, raw)?;
            self.eval.variables.set_scalar(&name, value)?;
            if self.peek_kind() == Some(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(None)
    }

    fn restore_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // RESTORE
        let target = if self.at_end() || self.peek_kind() == Some(TokenKind::Colon) {
            0
        } else {
            self.parse_logexpr()?.as_i64()?
        };
        self.data.restore(target)?;
        Ok(None)
    }

    fn randomize_stmt(&mut self) -> Result<Option<ControlMsg>, BasicError> {
        self.advance(); // RANDOMIZE
        let seed = if self.at_end() || self.peek_kind() == Some(TokenKind::Colon) {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(1)
        } else {
            self.parse_logexpr()?.as_i64()?
        };
        self.eval.rng.reseed(seed);
        Ok(None)
    }

    // ---- expression grammar ----------------------------------------------

    fn parse_logexpr(&mut self) -> Result<Value, BasicError> {
        let mut left = self.parse_notexpr()?;
        loop {
            match self.peek_kind() {
                Some(TokenKind::Or) => {
                    self.advance();
                    let right = self.parse_notexpr()?;
                    left = Value::from_bool(left.truthy()? || right.truthy()?);
                }
                Some(TokenKind::And) => {
                    self.advance();
                    let right = self.parse_notexpr()?;
                    left = Value::from_bool(left.truthy()? && right.truthy()?);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_notexpr(&mut self) -> Result<Value, BasicError> {
        if self.peek_kind() == Some(TokenKind::Not) {
            self.advance();
            let value = self.parse_relexpr()?;
            return Ok(Value::from_bool(!value.truthy()?));
        }
        self.parse_relexpr()
    }

    fn parse_relexpr(&mut self) -> Result<Value, BasicError> {
        let left = self.parse_expr()?;
        let op = match self.peek_kind() {
            Some(TokenKind::Assign) => Some(TokenKind::Assign),
            Some(TokenKind::NotEqual) => Some(TokenKind::NotEqual),
            Some(TokenKind::Less) => Some(TokenKind::Less),
            Some(TokenKind::Greater) => Some(TokenKind::Greater),
            Some(TokenKind::LessEq) => Some(TokenKind::LessEq),
            Some(TokenKind::GreaterEq) => Some(TokenKind::GreaterEq),
            _ => None,
        };
        let Some(op) = op else { return Ok(left) };
        self.advance();
        let right = self.parse_expr()?;
        let result = match op {
            TokenKind::Assign => left.eq_val(&right)?,
            TokenKind::NotEqual => left.ne_val(&right)?,
            TokenKind::Less => left.lt_val(&right)?,
            TokenKind::Greater => left.gt_val(&right)?,
            TokenKind::LessEq => left.le_val(&right)?,
            TokenKind::GreaterEq => left.ge_val(&right)?,
            _ => unreachable!(),
        };
        Ok(Value::from_bool(result))
    }

    fn parse_expr(&mut self) -> Result<Value, BasicError> {
        let mut left = self.parse_term()?;
        loop {
            match self.peek_kind() {
                Some(TokenKind::Plus) => {
                    self.advance();
                    let right = self.parse_term()?;
                    left = left.add(&right)?;
                }
                Some(TokenKind::Minus) => {
                    self.advance();
                    let right = self.parse_term()?;
                    left = left.sub(&right)?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Value, BasicError> {
        let mut left = self.parse_factor()?;
        loop {
            match self.peek_kind() {
                Some(TokenKind::Star) => {
                    self.advance();
                    let right = self.parse_factor()?;
                    left = left.mul(&right)?;
                }
                Some(TokenKind::Slash) => {
                    self.advance();
                    let right = self.parse_factor()?;
                    left = left.div(&right)?;
                }
                Some(TokenKind::Percent) => {
                    self.advance();
                    let right = self.parse_factor()?;
                    left = left.modulo(&right)?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Value, BasicError> {
        let mut sign = 1i64;
        loop {
            match self.peek_kind() {
                Some(TokenKind::Plus) => {
                    self.advance();
                }
                Some(TokenKind::Minus) => {
                    sign = -sign;
                    self.advance();
                }
                _ => break,
            }
        }

        let value = match self.peek_kind() {
            Some(TokenKind::UnsignedInt) => {
                let token = self.advance().unwrap();
                Value::Int(token.value.parse().map_err(|_| {
                    BasicError::syntax(format!("invalid integer literal '{}'", token.value))
                })?)
            }
            Some(TokenKind::UnsignedFloat) => {
                let token = self.advance().unwrap();
                Value::Float(token.value.parse().map_err(|_| {
                    BasicError::syntax(format!("invalid float literal '{}'", token.value))
                })?)
            }
            Some(TokenKind::String) => Value::Str(self.advance().unwrap().value.clone()),
            Some(TokenKind::LParen) => {
                self.advance();
                let value = self.parse_logexpr()?;
                self.expect(TokenKind::RParen)?;
                value
            }
            Some(TokenKind::Function) => self.parse_function_call()?,
            Some(TokenKind::Name) => self.parse_name_ref()?,
            _ => {
                return Err(BasicError::syntax(format!(
                    "unexpected token{}",
                    self.peek()
                        .map(|t| format!(" '{}'", t.value))
                        .unwrap_or_default()
                )))
            }
        };

        if sign < 0 {
            value.negate()
        } else {
            Ok(value)
        }
    }

    fn parse_name_ref(&mut self) -> Result<Value, BasicError> {
        let name = self.advance().unwrap().value.clone();
        if self.eval.variables.has_array(&name) && self.peek_kind() == Some(TokenKind::LParen) {
            self.advance();
            let indices = self.parse_index_list()?;
            self.expect(TokenKind::RParen)?;
            return self.eval.variables.get_array_element(&name, &indices);
        }
        Ok(self.eval.variables.get_scalar(&name)?.clone())
    }

    fn parse_function_call(&mut self) -> Result<Value, BasicError> {
        let name = self.advance().unwrap().value.clone();

        if name == "PI" && self.peek_kind() != Some(TokenKind::LParen) {
            return Ok(Value::Float(std::f64::consts::PI));
        }

        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if self.peek_kind() != Some(TokenKind::RParen) {
            loop {
                args.push(self.parse_logexpr()?);
                if self.peek_kind() == Some(TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        self.call_builtin(&name, args)
    }

    fn call_builtin(&mut self, name: &str, args: Vec<Value>) -> Result<Value, BasicError> {
        call_builtin(&mut self.eval.rng, name, args)
    }
}

fn non_negative_int(value: &Value) -> Result<i64, BasicError> {
    match value {
        Value::Int(i) if *i >= 0 => Ok(*i),
        Value::Float(f) if *f >= 0.0 && f.fract() == 0.0 => Ok(*f as i64),
        Value::Int(_) | Value::Float(_) => {
            Err(BasicError::value("dimension size must be a non-negative integer"))
        }
        Value::Str(_) => Err(BasicError::type_err("dimension size must be numeric")),
    }
}

fn coerce_for_name(name: &str, value: Value) -> Result<Value, BasicError> {
    if crate::variables::is_string_name(name) {
        match value {
            Value::Str(_) => Ok(value),
            _ => Err(BasicError::type_err(format!("READ: expected a string for {name}"))),
        }
    } else {
        match value {
            Value::Str(_) => Err(BasicError::value(format!("READ: non-numeric DATA for {name}"))),
            _ => Ok(value),
        }
    }
}

/// If `tokens` is exactly one UNSIGNEDINT token, this is the line-number
/// form of a THEN/ELSE target.
fn single_line_number(tokens: &[Token]) -> Option<i64> {
    if tokens.len() == 1 && tokens[0].kind == TokenKind::UnsignedInt {
        tokens[0].value.parse().ok()
    } else {
        None
    }
}

fn splitn_trim(line: &str, n: usize) -> Vec<&str> {
    if n == 0 {
        return Vec::new();
    }
    line.splitn(n, ',').collect()
}

fn read_stdin_line() -> Result<String, BasicError> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| BasicError::io(format!("stdin read failed: {e}")))?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

fn read_handle_line(reader: &mut BufReader<File>) -> Result<String, BasicError> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .map_err(|e| BasicError::io(format!("file read failed: {e}")))?;
    if n == 0 {
        return Err(BasicError::io("end of file"));
    }
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

fn call_builtin(rng: &mut Rng, name: &str, args: Vec<Value>) -> Result<Value, BasicError> {
    fn arity(name: &str, args: &[Value], n: usize) -> Result<(), BasicError> {
        if args.len() != n {
            return Err(BasicError::value(format!(
                "{name} expects {n} argument(s), got {}",
                args.len()
            )));
        }
        Ok(())
    }

    match name {
        "POW" => {
            arity(name, &args, 2)?;
            Ok(Value::Float(args[0].as_f64()?.powf(args[1].as_f64()?)))
        }
        "SQR" => {
            arity(name, &args, 1)?;
            let x = args[0].as_f64()?;
            if x < 0.0 {
                return Err(BasicError::value("SQR of a negative number"));
            }
            Ok(Value::Float(x.sqrt()))
        }
        "ABS" => {
            arity(name, &args, 1)?;
            match &args[0] {
                Value::Int(i) => Ok(Value::Int(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::Str(_) => Err(BasicError::type_err("ABS expects a number")),
            }
        }
        "RND" => {
            arity(name, &args, 1)?;
            let x = args[0].as_f64()?;
            if x < 0.0 {
                rng.reseed(x as i64);
            }
            Ok(Value::Float(rng.next_f64()))
        }
        "RNDINT" => {
            arity(name, &args, 2)?;
            Ok(Value::Int(rng.range_inclusive(args[0].as_i64()?, args[1].as_i64()?)))
        }
        "ATN" => {
            arity(name, &args, 1)?;
            Ok(Value::Float(args[0].as_f64()?.atan()))
        }
        "COS" => {
            arity(name, &args, 1)?;
            Ok(Value::Float(args[0].as_f64()?.cos()))
        }
        "SIN" => {
            arity(name, &args, 1)?;
            Ok(Value::Float(args[0].as_f64()?.sin()))
        }
        "TAN" => {
            arity(name, &args, 1)?;
            Ok(Value::Float(args[0].as_f64()?.tan()))
        }
        "EXP" => {
            arity(name, &args, 1)?;
            Ok(Value::Float(args[0].as_f64()?.exp()))
        }
        "LOG" => {
            arity(name, &args, 1)?;
            let x = args[0].as_f64()?;
            if x <= 0.0 {
                return Err(BasicError::value("LOG of a non-positive number"));
            }
            Ok(Value::Float(x.ln()))
        }
        "INT" => {
            arity(name, &args, 1)?;
            Ok(Value::Int(args[0].as_f64()?.floor() as i64))
        }
        "ROUND" => {
            arity(name, &args, 1)?;
            Ok(Value::Int(args[0].as_f64()?.round() as i64))
        }
        "CHR$" => {
            arity(name, &args, 1)?;
            let code = args[0].as_i64()?;
            let c = u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| BasicError::value("CHR$: invalid character code"))?;
            Ok(Value::Str(c.to_string()))
        }
        "ASC" => {
            arity(name, &args, 1)?;
            let s = args[0].as_str()?;
            let c = s.chars().next().ok_or_else(|| BasicError::value("ASC of an empty string"))?;
            Ok(Value::Int(c as i64))
        }
        "STR$" => {
            arity(name, &args, 1)?;
            Ok(Value::Str(args[0].to_string()))
        }
        "MID$" => {
            if args.len() != 2 && args.len() != 3 {
                return Err(BasicError::value("MID$ expects 2 or 3 arguments"));
            }
            let s = args[0].as_str()?;
            let chars: Vec<char> = s.chars().collect();
            let start = (args[1].as_i64()? - 1).max(0) as usize;
            let count = if args.len() == 3 {
                args[2].as_i64()?.max(0) as usize
            } else {
                chars.len().saturating_sub(start)
            };
            let end = (start + count).min(chars.len());
            let result = if start >= chars.len() {
                String::new()
            } else {
                chars[start..end].iter().collect()
            };
            Ok(Value::Str(result))
        }
        "LEFT$" => {
            arity(name, &args, 2)?;
            let s = args[0].as_str()?;
            let n = args[1].as_i64()?.max(0) as usize;
            Ok(Value::Str(s.chars().take(n).collect()))
        }
        "RIGHT$" => {
            arity(name, &args, 2)?;
            let s = args[0].as_str()?;
            let n = args[1].as_i64()?.max(0) as usize;
            let chars: Vec<char> = s.chars().collect();
            let start = chars.len().saturating_sub(n);
            Ok(Value::Str(chars[start..].iter().collect()))
        }
        "VAL" => {
            arity(name, &args, 1)?;
            let s = args[0].as_str()?.trim();
            let parsed: f64 = s.parse().unwrap_or(0.0);
            if parsed.fract() == 0.0 {
                Ok(Value::Int(parsed as i64))
            } else {
                Ok(Value::Float(parsed))
            }
        }
        "LEN" => {
            arity(name, &args, 1)?;
            Ok(Value::Int(args[0].as_str()?.chars().count() as i64))
        }
        "UPPER$" => {
            arity(name, &args, 1)?;
            Ok(Value::Str(args[0].as_str()?.to_uppercase()))
        }
        "LOWER$" => {
            arity(name, &args, 1)?;
            Ok(Value::Str(args[0].as_str()?.to_lowercase()))
        }
        "MAX" => {
            arity(name, &args, 2)?;
            Ok(if args[0].gt_val(&args[1])? { args[0].clone() } else { args[1].clone() })
        }
        "MIN" => {
            arity(name, &args, 2)?;
            Ok(if args[0].lt_val(&args[1])? { args[0].clone() } else { args[1].clone() })
        }
        "INSTR" => {
            if args.len() < 2 || args.len() > 4 {
                return Err(BasicError::value("INSTR expects 2 to 4 arguments"));
            }
            let hay: Vec<char> = args[0].as_str()?.chars().collect();
            let needle = args[1].as_str()?;
            let start = if args.len() >= 3 { (args[2].as_i64()? - 1).max(0) as usize } else { 0 };
            let end = if args.len() == 4 {
                ((args[3].as_i64()? - 1).max(0) as usize).min(hay.len())
            } else {
                hay.len()
            };
            if needle.is_empty() || start >= hay.len() {
                return Ok(Value::Int(0));
            }
            let haystack: String = hay[start..end.max(start)].iter().collect();
            match haystack.find(needle) {
                Some(byte_idx) => {
                    let char_idx = haystack[..byte_idx].chars().count();
                    Ok(Value::Int((start + char_idx + 1) as i64))
                }
                None => Ok(Value::Int(0)),
            }
        }
        "PI" => Ok(Value::Float(std::f64::consts::PI)),
        "TAB" => {
            arity(name, &args, 1)?;
            let n = args[0].as_i64()?.max(0) as usize;
            Ok(Value::Str(" ".repeat(n)))
        }
        "IFF" | "IF$" => {
            arity(name, &args, 3)?;
            if args[0].truthy()? {
                Ok(args[1].clone())
            } else {
                Ok(args[2].clone())
            }
        }
        other => Err(BasicError::name(format!("unknown function '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn run(src: &str) -> Result<Option<ControlMsg>, BasicError> {
        let tokens = Lexer::tokenize(src).unwrap();
        let mut evaluator = Evaluator::new();
        let mut data = DataPool::new();
        evaluator.exec_line(10, &tokens, &mut data, None)
    }

    #[test]
    fn let_assigns_a_scalar() {
        let tokens = Lexer::tokenize("LET A = 1 + 2").unwrap();
        let mut evaluator = Evaluator::new();
        let mut data = DataPool::new();
        evaluator.exec_line(10, &tokens, &mut data, None).unwrap();
        assert_eq!(*evaluator.variables.get_scalar("A").unwrap(), Value::Int(3));
    }

    #[test]
    fn goto_emits_simple_jump() {
        let msg = run("GOTO 100").unwrap();
        assert_eq!(msg, Some(ControlMsg::SimpleJump { target: 100 }));
    }

    #[test]
    fn gosub_then_return_in_sequence_returns_first() {
        let msg = run("GOSUB 100 : PRINT \"unreached\"").unwrap();
        assert_eq!(msg, Some(ControlMsg::Gosub { target: 100 }));
    }

    #[test]
    fn for_without_reentry_initializes_loop_var() {
        let tokens = Lexer::tokenize("FOR I = 1 TO 3").unwrap();
        let mut evaluator = Evaluator::new();
        let mut data = DataPool::new();
        let msg = evaluator.exec_line(10, &tokens, &mut data, None).unwrap();
        assert_eq!(msg, Some(ControlMsg::LoopBegin { loop_var: "I".into() }));
        assert_eq!(*evaluator.variables.get_scalar("I").unwrap(), Value::Int(1));
    }

    #[test]
    fn for_reentry_increments_by_step_only_for_same_variable() {
        let tokens = Lexer::tokenize("FOR J = 1 TO 3").unwrap();
        let mut evaluator = Evaluator::new();
        let mut data = DataPool::new();
        // a NEXT for a *different* variable must not be mistaken for re-entry
        let other = ControlMsg::LoopRepeat { loop_var: "K".into() };
        let msg = evaluator
            .exec_line(10, &tokens, &mut data, Some(&other))
            .unwrap();
        assert_eq!(msg, Some(ControlMsg::LoopBegin { loop_var: "J".into() }));
        assert_eq!(*evaluator.variables.get_scalar("J").unwrap(), Value::Int(1));
    }

    #[test]
    fn for_terminates_when_step_exceeds_limit() {
        let tokens = Lexer::tokenize("FOR I = 5 TO 1").unwrap();
        let mut evaluator = Evaluator::new();
        let mut data = DataPool::new();
        let msg = evaluator.exec_line(10, &tokens, &mut data, None).unwrap();
        assert_eq!(msg, Some(ControlMsg::LoopSkip { loop_var: "I".into() }));
    }

    #[test]
    fn for_zero_step_is_a_value_error() {
        assert!(run("FOR I = 1 TO 3 STEP 0").is_err());
    }

    #[test]
    fn if_then_with_line_number_jumps() {
        let msg = run("IF 1 = 1 THEN 100").unwrap();
        assert_eq!(msg, Some(ControlMsg::SimpleJump { target: 100 }));
    }

    #[test]
    fn if_then_else_picks_the_false_branch() {
        let tokens = Lexer::tokenize("IF 1 = 2 THEN LET A = 1 ELSE LET A = 2").unwrap();
        let mut evaluator = Evaluator::new();
        let mut data = DataPool::new();
        evaluator.exec_line(10, &tokens, &mut data, None).unwrap();
        assert_eq!(*evaluator.variables.get_scalar("A").unwrap(), Value::Int(2));
    }

    #[test]
    fn on_goto_out_of_range_is_a_no_op() {
        let msg = run("ON 5 GOTO 100, 200").unwrap();
        assert_eq!(msg, None);
    }

    #[test]
    fn on_gosub_selects_the_kth_target() {
        let msg = run("ON 2 GOSUB 100, 200, 300").unwrap();
        assert_eq!(msg, Some(ControlMsg::Gosub { target: 200 }));
    }

    #[test]
    fn and_or_are_truthiness_based() {
        let tokens = Lexer::tokenize("LET A = 1 AND 2").unwrap();
        let mut evaluator = Evaluator::new();
        let mut data = DataPool::new();
        evaluator.exec_line(10, &tokens, &mut data, None).unwrap();
        assert_eq!(*evaluator.variables.get_scalar("A").unwrap(), Value::Int(1));
    }

    #[test]
    fn instr_returns_one_based_index() {
        let v = call_builtin(
            &mut Rng::new(1),
            "INSTR",
            vec![Value::Str("hello".into()), Value::Str("ll".into())],
        )
        .unwrap();
        assert_eq!(v, Value::Int(3));
    }

    #[test]
    fn instr_four_arg_end_bound_is_one_based_and_exclusive() {
        // window is chars [start, end) after both get the -1 one-based
        // adjustment: start=1 -> index 0, end=5 -> index 3, so the searched
        // slice is "ABCD" and "DE" is not found in it.
        let v = call_builtin(
            &mut Rng::new(1),
            "INSTR",
            vec![
                Value::Str("ABCDE".into()),
                Value::Str("DE".into()),
                Value::Int(1),
                Value::Int(5),
            ],
        )
        .unwrap();
        assert_eq!(v, Value::Int(0));
    }

    #[test]
    fn mid_is_one_based() {
        let v = call_builtin(
            &mut Rng::new(1),
            "MID$",
            vec![Value::Str("hello".into()), Value::Int(2), Value::Int(3)],
        )
        .unwrap();
        assert_eq!(v, Value::Str("ell".into()));
    }

    #[test]
    fn unary_minus_applies_to_next_factor_only() {
        let tokens = Lexer::tokenize("LET A = -2 + 3").unwrap();
        let mut evaluator = Evaluator::new();
        let mut data = DataPool::new();
        evaluator.exec_line(10, &tokens, &mut data, None).unwrap();
        assert_eq!(*evaluator.variables.get_scalar("A").unwrap(), Value::Int(1));
    }
}
