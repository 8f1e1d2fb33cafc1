use super::console::Console;
use super::emit::Emitter;
use super::expr::{ExprSink, EXPR_STACK};
use super::frame::{Frame, Skip, EXPR_CALL_LINE, IMMEDIATE_LINE, RET_STACK};
use super::link::Linker;
use super::op::Opcode;
use super::program::Program;
use super::stack::Stack;
use super::var::{BaseType, Shape, Var, VarTab};
use super::Address;
use crate::error;
use crate::lang::{ArgShape, Error, ErrorCode, Keyword, Source, Token};

type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Interpret,
    Compile,
}

/// How `parse_line` finished.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Flow {
    /// End of line; keep executing.
    Continue,
    /// Normal stop: `end`, `quit`, or a return to an expression call.
    Stop,
    /// User interrupt.
    Break,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EditMode {
    Off,
    On,
    /// Waiting for the new first line.
    InsertFirst,
}

/// The five statements that share the assignment parser.
#[derive(Debug, Clone, Copy, PartialEq)]
enum AssignMode {
    Word,
    Byte,
    Const,
    Let,
    For,
}

/// ## Runtime
///
/// The whole engine: program store, symbol table, expression and return
/// stacks, code emitter and linker, threaded through every operation
/// instead of living in globals. One `Runtime` drives both immediate
/// execution and compilation; `mode` selects which half of each statement
/// runs, and `sink` carries the matching expression behaviour.
pub struct Runtime {
    program: Program,
    vars: VarTab,
    frames: Stack<Frame>,
    operators: Stack<Token>,
    sink: ExprSink,
    emitter: Emitter,
    linker: Linker,
    console: Box<dyn Console>,
    src: Source,
    /// The line being edited at the prompt, kept so control can return to
    /// it mid-line after a call.
    immediate: String,
    /// 0-based index of the current program line, or a sentinel.
    cur: i32,
    mode: Mode,
    compiling_sub: bool,
    only_constants: bool,
    skip: bool,
    ret_register: i16,
    pc_before_eval: Address,
    edit: EditMode,
    /// An interrupt surfaced inside an expression call, still to be
    /// delivered to the statement loop.
    pending_break: bool,
    /// 0-based index where the next edited line is inserted.
    edit_at: usize,
    filename: String,
    quit: Option<i32>,
}

impl Runtime {
    pub fn new(console: Box<dyn Console>) -> Runtime {
        Runtime {
            program: Program::new(),
            vars: VarTab::new(),
            frames: Stack::new(RET_STACK, ErrorCode::StackOverflow),
            operators: Stack::new(EXPR_STACK, ErrorCode::TooComplex),
            sink: ExprSink::fold(),
            emitter: Emitter::new(),
            linker: Linker::new(),
            console,
            src: Source::default(),
            immediate: String::new(),
            cur: IMMEDIATE_LINE,
            mode: Mode::Interpret,
            compiling_sub: false,
            only_constants: false,
            skip: false,
            ret_register: 0,
            pc_before_eval: 0,
            edit: EditMode::Off,
            pending_break: false,
            edit_at: 0,
            filename: String::new(),
            quit: None,
        }
    }

    /// Exit code once `quit` has run.
    pub fn finished(&self) -> Option<i32> {
        self.quit
    }

    /// Load a source file into the program store.
    pub fn load_program(&mut self, filename: &str) -> Result<usize> {
        self.program.load(filename)
    }

    /// Feed one line from the prompt: either an edit-mode insertion or an
    /// immediate statement. All error reporting and the warm reset happen
    /// here, at the boundary.
    pub fn enter(&mut self, input: &str) {
        match self.edit {
            EditMode::Off => self.enter_immediate(input),
            EditMode::On => {
                if input == "." {
                    self.edit = EditMode::Off;
                } else if let Err(e) = self.program.insert(self.edit_at, input) {
                    self.console.print(&format!("?{}\n", e));
                } else {
                    self.edit_at += 1;
                }
            }
            EditMode::InsertFirst => {
                if let Err(e) = self.program.insert(0, input) {
                    self.console.print(&format!("?{}\n", e));
                }
                self.edit_at = 1;
                self.edit = EditMode::On;
            }
        }
    }

    fn enter_immediate(&mut self, input: &str) {
        self.operators.clear();
        let _ = self.operators.push(Token::Sentinel);
        self.sink = ExprSink::fold();
        self.mode = Mode::Interpret;
        self.immediate = input.to_string();
        self.src.load(input);
        self.cur = IMMEDIATE_LINE;
        match self.parse_line() {
            Ok(Flow::Continue) | Ok(Flow::Stop) => {
                self.console.put_char(b'\n');
            }
            Ok(Flow::Break) => {
                if self.cur >= 0 {
                    self.console.print(&format!("\nBrk at {}\n", self.cur + 1));
                } else {
                    self.console.print("Brk\n");
                }
            }
            Err(e) => {
                if e.is_fatal() {
                    self.console.print(&format!("?{}\nRestart\n", e));
                } else {
                    match e.line() {
                        Some(line) => {
                            self.console.print(&format!("?{} err at {}\n", e, line))
                        }
                        None => self.console.print(&format!("?{} err\n", e)),
                    }
                }
            }
        }
        if !self.frames.is_empty() {
            self.console.print("?stack\n");
        }
        self.warm_reset();
    }

    /// Clear all stacks and `skip`, back to a clean prompt. Variables and
    /// the program are kept.
    fn warm_reset(&mut self) {
        self.frames.clear();
        self.operators.clear();
        let _ = self.operators.push(Token::Sentinel);
        self.sink = ExprSink::fold();
        self.mode = Mode::Interpret;
        self.compiling_sub = false;
        self.only_constants = false;
        self.skip = false;
        self.pending_break = false;
        self.cur = IMMEDIATE_LINE;
    }

    /*
     * Expression engine.
     *
     * Shunting-yard: `expr` alternates primaries and binary operators,
     * reducing whichever operators on the stack bind at least as tightly
     * before pushing the next. Reduction is dispatched through the sink,
     * so the same walk either computes a value or emits code.
     */

    fn apply_top(&mut self) -> Result<()> {
        let token = self.operators.pop()?;
        self.sink.apply(token, &mut self.emitter, &self.vars.heap)
    }

    fn push_operator(&mut self, token: Token) -> Result<()> {
        while self.operators.last().map_or(0, |t| t.precedence()) >= token.precedence() {
            self.apply_top()?;
        }
        self.operators.push(token)
    }

    fn reduce_to_sentinel(&mut self) -> Result<()> {
        while !matches!(self.operators.last(), Some(Token::Sentinel) | None) {
            self.apply_top()?;
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<()> {
        self.primary()?;
        while let Some((op, len)) = self.src.binary_op() {
            self.push_operator(op)?;
            self.src.advance(len);
            self.primary()?;
        }
        self.reduce_to_sentinel()
    }

    /// Evaluate the expression at the cursor. With `check_no_more`, only
    /// a statement separator may follow.
    fn eval(&mut self, check_no_more: bool) -> Result<i16> {
        self.src.eat_space();
        if self.src.at_end() {
            return Err(error!(BadExpression));
        }
        self.expr()?;
        if check_no_more && !self.src.at_end() && self.src.peek() != b';' {
            return Err(error!(UnexpectedExtra; &format!(" {}", self.src.rest())));
        }
        self.sink.pop()
    }

    /// A bracketed subscript, evaluated as its own expression.
    fn subscript(&mut self) -> Result<i16> {
        self.operators.push(Token::Sentinel)?;
        self.src.expect(b'[')?;
        self.src.eat_space();
        if self.src.at_end() {
            return Err(error!(BadExpression));
        }
        self.expr()?;
        self.src.expect(b']')?;
        let val = self.sink.pop()?;
        self.operators.pop()?;
        Ok(val)
    }

    /// Run `f` with interpret-mode expression machinery, even inside a
    /// compilation. Array dimensions and `const` initialisers need their
    /// values now, not at run time.
    fn forced_interpret<T>(
        &mut self,
        f: impl FnOnce(&mut Runtime) -> Result<T>,
    ) -> Result<T> {
        match self.mode {
            Mode::Interpret => f(self),
            Mode::Compile => {
                self.mode = Mode::Interpret;
                let saved = std::mem::replace(&mut self.sink, ExprSink::fold());
                let result = f(self);
                self.sink = saved;
                self.mode = Mode::Compile;
                result
            }
        }
    }

    /// A primary: literal, parenthesised expression, unary operator, or
    /// identifier (variable, array element, or call).
    fn primary(&mut self) -> Result<()> {
        self.src.eat_space();
        if self.src.at_end() {
            return Err(error!(BadExpression));
        }
        let ch = self.src.peek();
        if ch == b'&' || ch.is_ascii_alphabetic() {
            let address_of = ch == b'&';
            if address_of {
                self.src.advance(1);
                if !self.src.peek().is_ascii_alphabetic() {
                    return Err(error!(ExpectedVar));
                }
            }
            let name = self.src.scan_name()?;
            if self.src.peek() == b'(' {
                if self.only_constants {
                    return Err(error!(NotConstant));
                }
                if address_of {
                    return Err(error!(ExpectedVar));
                }
                self.call_in_expression(&name)?;
            } else {
                let idx = if self.src.peek() == b'[' {
                    Some(self.subscript().map_err(|e| match e.code() {
                        ErrorCode::ExpectedChar => error!(BadSubscript),
                        _ => e,
                    })?)
                } else {
                    None
                };
                self.push_variable(&name, idx, address_of)?;
            }
            self.src.eat_space();
        } else if ch.is_ascii_digit() {
            let val = self.src.parse_int()?;
            self.sink.push(val, &mut self.emitter)?;
            self.src.eat_space();
        } else if ch == b'$' {
            self.src.advance(1);
            let val = self.src.parse_hex()?;
            self.sink.push(val, &mut self.emitter)?;
            self.src.eat_space();
        } else if ch == b'\'' {
            let val = self.src.char_literal()?;
            self.sink.push(val, &mut self.emitter)?;
            self.src.eat_space();
        } else if ch == b'(' {
            self.src.advance(1);
            self.operators.push(Token::Sentinel)?;
            self.expr()?;
            self.src.expect(b')')?;
            self.operators.pop()?;
        } else if let Some(op) = self.src.unary_op() {
            self.operators.push(op)?;
            self.src.advance(1);
            self.primary()?;
        } else {
            return Err(error!(UnexpectedExtra; &format!(" {}", (ch as char))));
        }
        Ok(())
    }

    /// Function invocation inside an expression. The callee runs as a
    /// nested statement loop; RETURN lands back here and the return
    /// register becomes the operand.
    fn call_in_expression(&mut self, name: &str) -> Result<()> {
        self.operators.push(Token::Sentinel)?;
        match self.mode {
            Mode::Compile => {
                self.do_call(name, EXPR_CALL_LINE)?;
            }
            Mode::Interpret => {
                let saved_cur = self.cur;
                let saved_src = self.src.clone();
                self.do_call(name, EXPR_CALL_LINE)?;
                if self.exec_from_current()? == Flow::Break {
                    self.pending_break = true;
                }
                self.cur = saved_cur;
                self.src = saved_src;
                let ret = self.ret_register;
                self.sink.push(ret, &mut self.emitter)?;
            }
        }
        self.operators.pop()?;
        Ok(())
    }

    /*
     * Variable access, both directions and both modes.
     */

    fn var_record(&self, name: &str) -> Result<(Var, bool)> {
        match self.vars.find(name, false) {
            Some((index, local)) => Ok((self.vars.get(index).clone(), local)),
            None => Err(error!(ExpectedVar)),
        }
    }

    /// Push a variable (or its address) as an expression operand.
    fn push_variable(&mut self, name: &str, idx: Option<i16>, address_of: bool) -> Result<()> {
        let (var, local) = self.var_record(name)?;
        if self.only_constants && !var.is_const {
            return Err(error!(NotConstant));
        }
        match self.mode {
            Mode::Compile => {
                if var.is_const {
                    // The value is known now; no load is emitted.
                    let value = var.addr;
                    self.sink.push(value, &mut self.emitter)
                } else {
                    self.compile_load(&var, local, idx.is_some(), address_of)
                }
            }
            Mode::Interpret => {
                let val = self.interp_load(&var, idx, address_of)?;
                self.sink.push(val, &mut self.emitter)
            }
        }
    }

    fn interp_load(&self, var: &Var, idx: Option<i16>, address_of: bool) -> Result<i16> {
        match var.shape {
            Shape::Scalar => {
                if idx.is_some() {
                    return Err(error!(BadSubscript));
                }
                if address_of {
                    Ok(var.addr)
                } else {
                    match var.ty {
                        BaseType::Word => self.vars.heap.read_word(var.addr as Address),
                        BaseType::Byte => {
                            Ok(self.vars.heap.read_byte(var.addr as Address)? as i16)
                        }
                    }
                }
            }
            Shape::Array { len } => {
                // A bare array name is &name[0]; that is what makes
                // pass-by-reference work.
                let (idx, address_of) = match idx {
                    Some(i) => (i, address_of),
                    None => (0, true),
                };
                if idx < 0 || idx >= len {
                    return Err(error!(BadSubscript));
                }
                let cell = (var.addr as Address).wrapping_add(idx as Address * var.ty.size() as Address);
                if address_of {
                    Ok(cell as i16)
                } else {
                    match var.ty {
                        BaseType::Word => self.vars.heap.read_word(cell),
                        BaseType::Byte => Ok(self.vars.heap.read_byte(cell)? as i16),
                    }
                }
            }
            Shape::ArrayRef => Err(error!(Type)),
        }
    }

    fn interp_store(&mut self, var: &Var, idx: Option<i16>, value: i16) -> Result<()> {
        if var.is_const {
            return Err(error!(AssignToConst));
        }
        match var.shape {
            Shape::Scalar => {
                if idx.is_some() {
                    return Err(error!(BadSubscript));
                }
                match var.ty {
                    BaseType::Word => self.vars.heap.write_word(var.addr as Address, value),
                    BaseType::Byte => self.vars.heap.write_byte(var.addr as Address, value as u8),
                }
            }
            Shape::Array { len } => {
                let idx = match idx {
                    Some(i) => i,
                    None => return Err(error!(BadSubscript)),
                };
                if idx < 0 || idx >= len {
                    return Err(error!(BadSubscript));
                }
                let cell = (var.addr as Address).wrapping_add(idx as Address * var.ty.size() as Address);
                match var.ty {
                    BaseType::Word => self.vars.heap.write_word(cell, value),
                    BaseType::Byte => self.vars.heap.write_byte(cell, value as u8),
                }
            }
            Shape::ArrayRef => Err(error!(Type)),
        }
    }

    /// Emit a load of a variable, or of its address. For arrays the
    /// subscript has already been emitted and is on the VM stack.
    fn compile_load(&mut self, var: &Var, local: bool, has_idx: bool, address_of: bool) -> Result<()> {
        let relative = local && self.compiling_sub;
        match var.shape {
            Shape::Scalar => {
                if has_idx {
                    return Err(error!(BadSubscript));
                }
                if address_of {
                    self.emitter.emit_ldi(var.addr)?;
                    if relative {
                        self.emitter.emit(Opcode::Rtoa)?;
                    }
                } else {
                    let op = match (relative, var.ty) {
                        (true, BaseType::Word) => Opcode::Ldrwordimm,
                        (true, BaseType::Byte) => Opcode::Ldrbyteimm,
                        (false, BaseType::Word) => Opcode::Ldawordimm,
                        (false, BaseType::Byte) => Opcode::Ldabyteimm,
                    };
                    self.emitter.emit_imm(op, var.addr)?;
                }
                Ok(())
            }
            Shape::Array { .. } | Shape::ArrayRef => {
                let byref = var.shape == Shape::ArrayRef;
                let mut address_of = address_of;
                if !has_idx {
                    address_of = true;
                    self.emitter.emit_ldi(0)?;
                }
                self.compile_element_addr(var, byref)?;
                if !address_of {
                    let abs = !relative || byref;
                    let op = match (abs, var.ty) {
                        (true, BaseType::Word) => Opcode::Ldaword,
                        (true, BaseType::Byte) => Opcode::Ldabyte,
                        (false, BaseType::Word) => Opcode::Ldrword,
                        (false, BaseType::Byte) => Opcode::Ldrbyte,
                    };
                    self.emitter.emit(op)?;
                } else if relative && !byref {
                    self.emitter.emit(Opcode::Rtoa)?;
                }
                Ok(())
            }
        }
    }

    /// Scale the on-stack subscript and add the body address, with the
    /// extra indirection for a borrowed array.
    fn compile_element_addr(&mut self, var: &Var, byref: bool) -> Result<()> {
        if var.ty == BaseType::Word {
            self.emitter.emit_ldi(1)?;
            self.emitter.emit(Opcode::Lsh)?;
        }
        self.emitter.emit_ldi(var.addr)?;
        if byref {
            self.emitter.emit(Opcode::Ldrword)?;
        }
        self.emitter.emit(Opcode::Add)
    }

    /// Store into a variable. Interpreting, `value` is stored directly;
    /// generating, the value (and for arrays the subscript below it) is
    /// already on the VM stack.
    fn set_var(&mut self, name: &str, idx: Option<i16>, value: i16) -> Result<()> {
        let (var, local) = self.var_record(name)?;
        if self.mode == Mode::Interpret {
            return self.interp_store(&var, idx, value);
        }
        if var.is_const {
            return Err(error!(AssignToConst));
        }
        let relative = local && self.compiling_sub;
        match var.shape {
            Shape::Scalar => {
                if idx.is_some() {
                    return Err(error!(BadSubscript));
                }
                let op = match (relative, var.ty) {
                    (true, BaseType::Word) => Opcode::Strwordimm,
                    (true, BaseType::Byte) => Opcode::Strbyteimm,
                    (false, BaseType::Word) => Opcode::Stawordimm,
                    (false, BaseType::Byte) => Opcode::Stabyteimm,
                };
                self.emitter.emit_imm(op, var.addr)
            }
            Shape::Array { .. } | Shape::ArrayRef => {
                let byref = var.shape == Shape::ArrayRef;
                if idx.is_none() {
                    return Err(error!(BadSubscript));
                }
                // Stack holds subscript then value; bring the subscript up.
                self.emitter.emit(Opcode::Swap)?;
                self.compile_element_addr(&var, byref)?;
                let abs = !relative || byref;
                let op = match (abs, var.ty) {
                    (true, BaseType::Word) => Opcode::Staword,
                    (true, BaseType::Byte) => Opcode::Stabyte,
                    (false, BaseType::Word) => Opcode::Strword,
                    (false, BaseType::Byte) => Opcode::Strbyte,
                };
                self.emitter.emit(op)
            }
        }
    }
}

/// Value of one actual argument, captured in the caller's frame before the
/// callee's frame exists.
enum ArgVal {
    Scalar(i16),
    Array { body: Address, len: i16 },
}

fn parse_type(src: &mut Source) -> Result<BaseType> {
    match src.scan_name() {
        Ok(name) if name == "word" => Ok(BaseType::Word),
        Ok(name) if name == "byte" => Ok(BaseType::Byte),
        _ => Err(error!(Argument)),
    }
}

fn parse_byref(src: &mut Source) -> Result<bool> {
    if src.peek() != b'[' {
        return Ok(false);
    }
    src.advance(1);
    if src.peek() != b']' {
        return Err(error!(Argument));
    }
    src.advance(1);
    Ok(true)
}

impl Runtime {
    /*
     * Statement loop.
     */

    /// Execute program lines starting at the current one, until a stop,
    /// a break, or control returns to the immediate buffer.
    fn exec_from_current(&mut self) -> Result<Flow> {
        loop {
            if self.mode == Mode::Compile {
                self.console.put_char(b'.');
            }
            let flow = self.parse_line().map_err(|e| {
                if self.cur >= 0 {
                    e.in_line((self.cur + 1) as u16)
                } else {
                    e
                }
            })?;
            match flow {
                Flow::Stop => return Ok(Flow::Stop),
                Flow::Break => return Ok(Flow::Break),
                Flow::Continue => {}
            }
            if self.cur < 0 {
                return Ok(Flow::Continue);
            }
            let next = (self.cur + 1) as usize;
            match self.program.get(next) {
                Some(text) => {
                    let text = text.to_string();
                    self.cur = next as i32;
                    self.src.load(&text);
                }
                None => return Ok(Flow::Continue),
            }
        }
    }

    /// `run`: reset the machine and execute from the first line.
    fn do_run(&mut self) -> Result<Flow> {
        self.skip = false;
        self.frames.clear();
        self.vars.clear();
        self.cur = 0;
        match self.program.get(0) {
            None => Ok(Flow::Continue),
            Some(text) => {
                let text = text.to_string();
                self.src.load(&text);
                self.exec_from_current()
            }
        }
    }

    fn check_no_more_args(&mut self) -> Result<()> {
        self.src.eat_space();
        if !self.src.at_end() && self.src.peek() != b';' {
            return Err(error!(UnexpectedExtra; &format!(" {}", self.src.rest())));
        }
        Ok(())
    }

    /// Resume execution at a stored source position.
    fn back_to(&mut self, line: i32, pos: usize) -> Result<()> {
        if line == IMMEDIATE_LINE {
            let text = self.immediate.clone();
            self.cur = IMMEDIATE_LINE;
            self.src.load(&text);
        } else {
            let text = self
                .program
                .get(line as usize)
                .ok_or_else(|| error!(BadLine))?
                .to_string();
            self.cur = line;
            self.src.load(&text);
        }
        self.src.set_pos(pos);
        Ok(())
    }

    /// Process the statements on the current line. Statements are
    /// separated by `;`. In skip mode only the constructs that observe
    /// `skip` are interpreted; everything else is consumed.
    fn parse_line(&mut self) -> Result<Flow> {
        loop {
            if self.pending_break || self.console.interrupted() {
                self.pending_break = false;
                return Ok(Flow::Break);
            }
            self.src.eat_space();
            while self.src.peek() == b';' {
                self.src.advance(1);
                if self.src.at_end() {
                    return Ok(Flow::Continue);
                }
                self.src.eat_space();
            }
            if self.src.at_end() {
                return Ok(Flow::Continue);
            }
            let start_pos = self.src.pos();
            let matched = self.src.keyword();
            if self.skip {
                let observes_skip = matches!(
                    matched,
                    Some((Keyword::If, ..))
                        | Some((Keyword::Else, ..))
                        | Some((Keyword::EndIf, ..))
                        | Some((Keyword::While, ..))
                        | Some((Keyword::EndWhile, ..))
                );
                if !observes_skip {
                    while !self.src.at_end() && self.src.peek() != b';' {
                        self.src.advance(1);
                    }
                    continue;
                }
            }
            let (keyword, shape, len) = match matched {
                None => {
                    // A bare identifier starts an assignment.
                    self.assign_or_create(AssignMode::Let)?;
                    continue;
                }
                Some(t) => t,
            };
            self.src.advance(len);
            self.src.eat_space();
            // Stash the PC from before argument handling; WHILE needs to
            // know where its guard begins.
            self.pc_before_eval = self.emitter.pc();
            let mut arg: i16 = 0;
            let mut arg2: i16 = 0;
            let mut text = String::new();
            match shape {
                ArgShape::NoArgs => self.check_no_more_args()?,
                ArgShape::OneArg => arg = self.eval(true)?,
                ArgShape::TwoArgs => {
                    arg = self.eval(false)?;
                    self.src.eat_space();
                    self.src.expect(b',')?;
                    arg2 = self.eval(false)?;
                }
                ArgShape::InitialArg => arg = self.eval(false)?,
                ArgShape::OneStrArg => {
                    text = self.src.scan_quoted()?;
                    self.check_no_more_args()?;
                }
                ArgShape::InitialNameArg => {
                    text = self.src.scan_name()?;
                }
                ArgShape::FullLine => {
                    while !self.src.at_end() {
                        self.src.advance(1);
                    }
                }
                ArgShape::Custom => {}
            }
            match keyword {
                Keyword::Comment => {}
                Keyword::Quit => {
                    self.console.print("Bye!\n");
                    self.quit = Some(0);
                    return Ok(Flow::Stop);
                }
                Keyword::PrDec => match self.mode {
                    Mode::Compile => self.emitter.emit(Opcode::Prdec)?,
                    Mode::Interpret => self.console.print(&format!("{}", arg as u16)),
                },
                Keyword::PrDecS => match self.mode {
                    Mode::Compile => {
                        self.emitter.emit(Opcode::Dup)?;
                        self.emitter.emit_ldi(i16::MIN)?;
                        self.emitter.emit(Opcode::Bitand)?;
                        self.emitter.emit(Opcode::Not)?;
                        // Branch over the sign handling to the PRDEC.
                        let target = self.emitter.pc() + 3 + 5;
                        self.emitter.emit_imm(Opcode::Brnchimm, target as i16)?;
                        self.emitter.emit_ldi(b'-' as i16)?;
                        self.emitter.emit(Opcode::Prch)?;
                        self.emitter.emit(Opcode::Neg)?;
                        self.emitter.emit(Opcode::Prdec)?;
                    }
                    Mode::Interpret => {
                        if arg < 0 {
                            self.console.put_char(b'-');
                            self.console
                                .print(&format!("{}", arg.wrapping_neg() as u16));
                        } else {
                            self.console.print(&format!("{}", arg as u16));
                        }
                    }
                },
                Keyword::PrHex => match self.mode {
                    Mode::Compile => self.emitter.emit(Opcode::Prhex)?,
                    Mode::Interpret => self.console.print(&format!("{:04x}", arg as u16)),
                },
                Keyword::PrMsg => match self.mode {
                    Mode::Compile => self.emitter.emit_msg(&text)?,
                    Mode::Interpret => self.console.print(&text),
                },
                Keyword::PrNl => match self.mode {
                    Mode::Compile => {
                        self.emitter.emit_ldi(b'\n' as i16)?;
                        self.emitter.emit(Opcode::Prch)?;
                    }
                    Mode::Interpret => self.console.put_char(b'\n'),
                },
                Keyword::PrStr => match self.mode {
                    Mode::Compile => self.emitter.emit(Opcode::Prstr)?,
                    Mode::Interpret => {
                        let s = self.vars.heap.read_str(arg as Address)?;
                        self.console.print(&s);
                    }
                },
                Keyword::PrCh => match self.mode {
                    Mode::Compile => self.emitter.emit(Opcode::Prch)?,
                    Mode::Interpret => self.console.put_char(arg as u8),
                },
                Keyword::KbdCh => match self.mode {
                    Mode::Compile => {
                        self.emitter.emit(Opcode::Kbdch)?;
                        self.emitter.emit(Opcode::Swap)?;
                        self.emitter.emit(Opcode::Stabyte)?;
                    }
                    Mode::Interpret => {
                        let key = self.console.get_char()?;
                        self.vars.heap.write_byte(arg as Address, key)?;
                    }
                },
                Keyword::KbdLn => match self.mode {
                    Mode::Compile => self.emitter.emit(Opcode::Kbdln)?,
                    Mode::Interpret => {
                        let line = self.console.get_line()?;
                        self.vars
                            .heap
                            .write_str(arg as Address, &line, arg2 as u16 as usize)?;
                    }
                },
                Keyword::Clear => self.vars.clear(),
                Keyword::Vars => self.print_vars(),
                Keyword::Free => self.print_free(),
                Keyword::Word => self.assign_or_create(AssignMode::Word)?,
                Keyword::Byte => self.assign_or_create(AssignMode::Byte)?,
                Keyword::Const => self.assign_or_create(AssignMode::Const)?,
                Keyword::Run => {
                    if self.do_run()? == Flow::Break {
                        return Ok(Flow::Break);
                    }
                    if self.quit.is_some() {
                        return Ok(Flow::Stop);
                    }
                }
                Keyword::Comp => {
                    if self.do_compile(&text)? == Flow::Break {
                        return Ok(Flow::Break);
                    }
                }
                Keyword::New => self.program.clear(),
                Keyword::Sub => self.do_sub(&text)?,
                Keyword::EndSub => {
                    if self.do_endsub()? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                Keyword::If => self.do_if(arg)?,
                Keyword::Else => self.do_else()?,
                Keyword::EndIf => self.do_endif()?,
                Keyword::Call => match self.mode {
                    Mode::Compile => {
                        self.do_call(&text, 0)?;
                        // The return value is not wanted.
                        self.emitter.emit(Opcode::Drop)?;
                    }
                    Mode::Interpret => {
                        let was_immediate = self.cur == IMMEDIATE_LINE;
                        self.do_call(&text, self.cur)?;
                        if was_immediate {
                            if self.exec_from_current()? == Flow::Break {
                                return Ok(Flow::Break);
                            }
                            if self.quit.is_some() {
                                return Ok(Flow::Stop);
                            }
                        }
                    }
                },
                Keyword::Return => {
                    if self.do_return(arg)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
                Keyword::For => self.assign_or_create(AssignMode::For)?,
                Keyword::EndFor => self.do_endfor()?,
                Keyword::While => self.do_while(start_pos, arg)?,
                Keyword::EndWhile => self.do_endwhile()?,
                Keyword::End => match self.mode {
                    Mode::Compile => self.emitter.emit(Opcode::End)?,
                    Mode::Interpret => return Ok(Flow::Stop),
                },
                Keyword::Mode => {
                    // Console width hint; meaningless off the original
                    // hardware, but the argument must not be left behind.
                    if self.mode == Mode::Compile {
                        self.emitter.emit(Opcode::Drop)?;
                    }
                }
                Keyword::PokeWord => {
                    self.src.eat_space();
                    self.src.expect(b'=')?;
                    let value = self.eval(true)?;
                    match self.mode {
                        Mode::Compile => {
                            self.emitter.emit(Opcode::Swap)?;
                            self.emitter.emit(Opcode::Staword)?;
                        }
                        Mode::Interpret => {
                            self.vars.heap.write_word(arg as Address, value)?
                        }
                    }
                }
                Keyword::PokeByte => {
                    self.src.eat_space();
                    self.src.expect(b'=')?;
                    let value = self.eval(true)?;
                    match self.mode {
                        Mode::Compile => {
                            self.emitter.emit(Opcode::Swap)?;
                            self.emitter.emit(Opcode::Stabyte)?;
                        }
                        Mode::Interpret => {
                            self.vars.heap.write_byte(arg as Address, value as u8)?
                        }
                    }
                }
                Keyword::Append => {
                    if arg < 1 || arg as usize > self.program.len() {
                        return Err(error!(BadLine));
                    }
                    self.edit_at = arg as usize;
                    self.edit = EditMode::On;
                }
                Keyword::Insert => {
                    if arg <= 1 {
                        self.edit = EditMode::InsertFirst;
                    } else {
                        if (arg - 1) as usize > self.program.len() {
                            return Err(error!(BadLine));
                        }
                        self.edit_at = (arg - 1) as usize;
                        self.edit = EditMode::On;
                    }
                }
                Keyword::Delete => {
                    self.src.eat_space();
                    if self.src.at_end() {
                        self.program.delete(arg, arg);
                    } else {
                        self.src.expect(b',')?;
                        arg2 = self.eval(true)?;
                        self.program.delete(arg, arg2);
                    }
                }
                Keyword::Change => {
                    self.src.eat_space();
                    self.src.expect(b':')?;
                    let text = self.src.rest();
                    self.program.replace(arg as u16 as usize, &text)?;
                    // The rest of the line is the replacement, not code.
                    return Ok(Flow::Continue);
                }
                Keyword::List => {
                    if self.src.at_end() {
                        self.list_lines(1, i32::MAX);
                    } else {
                        arg = self.eval(false)?;
                        self.src.eat_space();
                        if self.src.at_end() {
                            self.list_lines(arg as i32, i32::MAX);
                        } else {
                            self.src.expect(b',')?;
                            arg2 = self.eval(true)?;
                            self.list_lines(arg as i32, arg2 as i32);
                        }
                    }
                }
                Keyword::Load => {
                    self.console.print(&format!("Reading {}:\n", text));
                    self.vars.clear();
                    self.program.clear();
                    let count = self.program.load(&text)?;
                    self.console.print(&format!("{} lines\n", count));
                    return Ok(Flow::Continue);
                }
                Keyword::Save => {
                    self.console.print(&format!("Writing {}:\n", text));
                    self.program.save(&text)?;
                    self.console.print("OK\n");
                }
            }
        }
    }

    /*
     * Declaration, assignment and FOR entry share one parser: all of them
     * read `name (subscript)? = expr`, and FOR adds `: limit`.
     */

    fn assign_or_create(&mut self, mode: AssignMode) -> Result<()> {
        self.src.eat_space();
        if !self.src.peek().is_ascii_alphabetic() {
            return Err(error!(ExpectedVar));
        }
        let name = self.src.scan_name()?;
        let mut subscripted = false;
        let mut idx: i16 = 0;
        if self.src.peek() == b'[' {
            subscripted = true;
            idx = match mode {
                AssignMode::Word | AssignMode::Byte => self.dimension()?,
                _ => self.subscript()?,
            };
        }
        if mode == AssignMode::Const && subscripted {
            return Err(error!(BadDimension));
        }
        self.src.eat_space();
        // A declaration may omit the initialiser; the cell starts at zero.
        if matches!(mode, AssignMode::Word | AssignMode::Byte)
            && (self.src.at_end() || self.src.peek() == b';')
        {
            let ty = if mode == AssignMode::Byte {
                BaseType::Byte
            } else {
                BaseType::Word
            };
            if self.mode == Mode::Compile && !subscripted {
                self.emitter.emit_ldi(0)?;
            }
            let size = if subscripted { idx } else { 1 };
            self.create_var(&name, ty, false, subscripted, size, 0)?;
            return Ok(());
        }
        self.src.expect(b'=')?;
        self.src.eat_space();
        let value = match mode {
            AssignMode::Const => {
                self.only_constants = true;
                let value = self.forced_interpret(|rt| rt.eval(true));
                self.only_constants = false;
                value?
            }
            AssignMode::Let => self.eval(true)?,
            AssignMode::For => self.eval(false)?,
            AssignMode::Word | AssignMode::Byte => {
                // Array initialisers are consumed during creation.
                if subscripted {
                    0
                } else {
                    self.eval(true)?
                }
            }
        };
        match mode {
            AssignMode::Word | AssignMode::Byte | AssignMode::Const => {
                let ty = if mode == AssignMode::Byte {
                    BaseType::Byte
                } else {
                    BaseType::Word
                };
                let size = if subscripted { idx } else { 1 };
                self.create_var(&name, ty, mode == AssignMode::Const, subscripted, size, value)?;
            }
            AssignMode::Let | AssignMode::For => {
                let idx = if subscripted { Some(idx) } else { None };
                self.set_var(&name, idx, value)?;
            }
        }
        if mode != AssignMode::For {
            return Ok(());
        }
        self.src.expect(b':')?;
        let limit = self.eval(true)?;
        let idx = if subscripted { Some(idx) } else { None };
        match self.mode {
            Mode::Interpret => {
                let (var, _) = self.var_record(&name)?;
                let var_addr = self.interp_load(&var, idx, true)? as Address;
                self.frames.push(Frame::For {
                    line: self.cur,
                    pos: self.src.pos(),
                    limit,
                    var_addr,
                    ty: var.ty,
                })?;
            }
            Mode::Compile => {
                let (var, local) = self.var_record(&name)?;
                let relative = local && self.compiling_sub;
                // Park the limit on the VM call stack for ENDFOR.
                self.emitter.emit(Opcode::Pshword)?;
                self.frames.push(Frame::ForLoop {
                    relative,
                    loop_pc: self.emitter.pc(),
                    var_addr: var.addr,
                    ty: var.ty,
                })?;
            }
        }
        Ok(())
    }

    /// An array dimension must be a constant expression, evaluated now
    /// even when compiling.
    fn dimension(&mut self) -> Result<i16> {
        self.only_constants = true;
        let result = self.forced_interpret(|rt| rt.subscript());
        self.only_constants = false;
        result
    }

    fn create_var(
        &mut self,
        name: &str,
        ty: BaseType,
        is_const: bool,
        is_array: bool,
        size: i16,
        value: i16,
    ) -> Result<()> {
        let collision = match self.mode {
            Mode::Interpret => {
                if is_array {
                    let (body, collision) = self.vars.create_array(name, ty, size)?;
                    self.init_array(body, ty, size)?;
                    collision
                } else {
                    self.vars.create_scalar(name, ty, is_const, value)?
                }
            }
            Mode::Compile => {
                if is_const {
                    self.vars.create_const(name, value)?
                } else if is_array {
                    self.compile_array_decl(name, ty, size)?
                } else {
                    // The initialiser is on the VM stack; pushing it to
                    // the call stack makes it the variable's cell.
                    let cell = self.emitter.rt_push(ty.size() as Address)?;
                    let addr = self.cell_addr(cell);
                    self.emitter.emit(match ty {
                        BaseType::Word => Opcode::Pshword,
                        BaseType::Byte => Opcode::Pshbyte,
                    })?;
                    self.vars.create_compiled(name, ty, Shape::Scalar, addr)?
                }
            }
        };
        if let Some(other) = collision {
            self.console.print(&format!("{} masks {}\n", name, other));
        }
        Ok(())
    }

    /// Target address for a freshly pushed cell: frame-relative inside a
    /// sub, absolute at top level.
    fn cell_addr(&self, cell: Address) -> i16 {
        if self.compiling_sub {
            (cell as i32 - self.emitter.rt_fp() as i32) as i16
        } else {
            (cell + 1) as i16
        }
    }

    /// Consume an interpreted array initialiser: `"text"` or `{e, e, ...}`.
    /// Cells not covered stay zero; a string reserves its last cell for
    /// the terminator.
    fn init_array(&mut self, body: Address, ty: BaseType, size: i16) -> Result<()> {
        let cell = |i: i16| body.wrapping_add(i as Address * ty.size() as Address);
        if self.src.peek() == b'"' {
            self.src.advance(1);
            let mut i = 0;
            while i < size - 1 && !self.src.at_end() && self.src.peek() != b'"' {
                let ch = self.src.peek() as i16;
                self.write_cell(cell(i), ty, ch)?;
                self.src.advance(1);
                i += 1;
            }
            if self.src.peek() != b'"' {
                return Err(error!(InitializerTooLong));
            }
            self.src.advance(1);
        } else if self.src.peek() == b'{' {
            self.src.advance(1);
            let mut i = 0;
            loop {
                self.src.eat_space();
                if self.src.peek() == b'}' {
                    break;
                }
                if self.src.at_end() || i >= size {
                    return Err(error!(InitializerTooLong));
                }
                let val = self.eval(false)?;
                self.write_cell(cell(i), ty, val)?;
                i += 1;
                self.src.eat_space();
                if self.src.peek() == b',' {
                    self.src.advance(1);
                }
            }
            self.src.advance(1);
        }
        Ok(())
    }

    fn write_cell(&mut self, addr: Address, ty: BaseType, val: i16) -> Result<()> {
        match ty {
            BaseType::Word => self.vars.heap.write_word(addr, val),
            BaseType::Byte => self.vars.heap.write_byte(addr, val as u8),
        }
    }

    /// Compiled array declaration: allocate the body on the simulated
    /// call stack, emit a fill loop that zeroes it at run time, then emit
    /// per-element stores for the initialiser.
    fn compile_array_decl(&mut self, name: &str, ty: BaseType, size: i16) -> Result<Option<String>> {
        if size < 1 {
            return Err(error!(BadDimension));
        }
        let push_op = match ty {
            BaseType::Word => Opcode::Pshword,
            BaseType::Byte => Opcode::Pshbyte,
        };
        let cell = self.emitter.rt_push(size as Address * ty.size() as Address)?;
        let body = self.cell_addr(cell);
        // counter = size; do { counter--; push 0 } while counter != 0
        self.emitter.emit_ldi(size)?;
        let loop_top = self.emitter.pc();
        self.emitter.emit(Opcode::Dec)?;
        self.emitter.emit(Opcode::Dup)?;
        self.emitter.emit_ldi(0)?;
        self.emitter.emit(push_op)?;
        self.emitter.emit_ldi(0)?;
        self.emitter.emit(Opcode::Neql)?;
        self.emitter.emit_imm(Opcode::Brnchimm, loop_top as i16)?;
        self.emitter.emit(Opcode::Drop)?;
        let collision = self
            .vars
            .create_compiled(name, ty, Shape::Array { len: size }, body)?;
        if self.src.peek() == b'"' {
            self.src.advance(1);
            let mut i = 0;
            while i < size - 1 && !self.src.at_end() && self.src.peek() != b'"' {
                let ch = self.src.peek() as i16;
                self.emitter.emit_ldi(ch)?;
                self.store_array_cell(i, ty)?;
                self.src.advance(1);
                i += 1;
            }
            if self.src.peek() != b'"' {
                return Err(error!(InitializerTooLong));
            }
            self.src.advance(1);
        } else if self.src.peek() == b'{' {
            self.src.advance(1);
            let mut i = 0;
            loop {
                self.src.eat_space();
                if self.src.peek() == b'}' {
                    break;
                }
                if self.src.at_end() || i >= size {
                    return Err(error!(InitializerTooLong));
                }
                self.eval(false)?;
                self.store_array_cell(i, ty)?;
                i += 1;
                self.src.eat_space();
                if self.src.peek() == b',' {
                    self.src.advance(1);
                }
            }
            self.src.advance(1);
        }
        Ok(collision)
    }

    /// Store the value on the VM stack into element `index` of the array
    /// just allocated at the simulated stack pointer.
    fn store_array_cell(&mut self, index: i16, ty: BaseType) -> Result<()> {
        let offset = (self.emitter.rt_sp() as i32 - self.emitter.rt_fp() as i32) as i16
            + index * ty.size() as i16;
        self.emitter.emit_ldi(offset)?;
        self.emitter.emit(match ty {
            BaseType::Word => Opcode::Strword,
            BaseType::Byte => Opcode::Strbyte,
        })
    }

    /*
     * IF / ELSE / ENDIF.
     */

    fn do_if(&mut self, arg: i16) -> Result<()> {
        match self.mode {
            Mode::Compile => {
                // Condition is on the VM stack. Branch around the block
                // when it is false; destination patched later.
                self.emitter.emit(Opcode::Not)?;
                let then_fixup = self.emitter.pc() + 1;
                self.emitter.emit_imm(Opcode::Brnchimm, -1)?;
                self.frames.push(Frame::IfPatch {
                    then_fixup: Some(then_fixup),
                    else_fixup: None,
                })
            }
            Mode::Interpret => {
                let status = if self.skip {
                    Skip::Skipping
                } else if arg == 0 {
                    self.skip = true;
                    Skip::SetSkip
                } else {
                    Skip::Run
                };
                self.frames.push(Frame::If { status })
            }
        }
    }

    fn do_else(&mut self) -> Result<()> {
        match self.frames.last().copied() {
            Some(Frame::IfPatch { then_fixup, .. }) => {
                let else_fixup = self.emitter.pc() + 1;
                self.emitter.emit_imm(Opcode::Jmpimm, -1)?;
                if let Some(addr) = then_fixup {
                    let here = self.emitter.pc();
                    self.emitter.fixup(addr, here);
                }
                *self.frames.last_mut().unwrap() = Frame::IfPatch {
                    then_fixup: None,
                    else_fixup: Some(else_fixup),
                };
                Ok(())
            }
            Some(Frame::If { status }) => {
                match status {
                    Skip::Run => self.skip = true,
                    Skip::SetSkip => self.skip = false,
                    Skip::Skipping => {}
                }
                Ok(())
            }
            _ => Err(error!(NoIf)),
        }
    }

    fn do_endif(&mut self) -> Result<()> {
        match self.frames.last().copied() {
            Some(Frame::IfPatch {
                then_fixup,
                else_fixup,
            }) => {
                let here = self.emitter.pc();
                if let Some(addr) = then_fixup {
                    self.emitter.fixup(addr, here);
                }
                if let Some(addr) = else_fixup {
                    self.emitter.fixup(addr, here);
                }
                self.frames.pop()?;
                Ok(())
            }
            Some(Frame::If { status }) => {
                if status != Skip::Skipping {
                    self.skip = false;
                }
                self.frames.pop()?;
                Ok(())
            }
            _ => Err(error!(NoIf)),
        }
    }

    /*
     * WHILE / ENDWHILE.
     */

    fn do_while(&mut self, start_pos: usize, arg: i16) -> Result<()> {
        match self.mode {
            Mode::Compile => {
                let guard_pc = self.pc_before_eval;
                self.emitter.emit(Opcode::Not)?;
                let fixup = self.emitter.pc() + 1;
                self.emitter.emit_imm(Opcode::Brnchimm, -1)?;
                self.frames.push(Frame::WhileLoop { guard_pc, fixup })
            }
            Mode::Interpret => {
                let status = if self.skip {
                    Skip::Skipping
                } else if arg == 0 {
                    self.skip = true;
                    Skip::SetSkip
                } else {
                    Skip::Run
                };
                self.frames.push(Frame::While {
                    status,
                    line: self.cur,
                    pos: start_pos,
                })
            }
        }
    }

    fn do_endwhile(&mut self) -> Result<()> {
        match self.frames.last().copied() {
            Some(Frame::WhileLoop { guard_pc, fixup }) => {
                self.emitter.emit_imm(Opcode::Jmpimm, guard_pc as i16)?;
                let here = self.emitter.pc();
                self.emitter.fixup(fixup, here);
                self.frames.pop()?;
                Ok(())
            }
            Some(Frame::While { status, line, pos }) => {
                self.frames.pop()?;
                match status {
                    Skip::Skipping => {}
                    Skip::SetSkip => self.skip = false,
                    // Loop back to the WHILE itself so the guard is
                    // evaluated afresh.
                    Skip::Run => self.back_to(line, pos)?,
                }
                Ok(())
            }
            _ => Err(error!(NoWhile)),
        }
    }

    /*
     * ENDFOR. Loop entry lives in assign_or_create.
     */

    fn do_endfor(&mut self) -> Result<()> {
        match self.frames.last().copied() {
            Some(Frame::ForLoop {
                relative,
                loop_pc,
                var_addr,
                ty,
            }) => {
                // Limit comes back from the call stack, stays for the
                // next pass.
                self.emitter.emit(Opcode::Popword)?;
                self.emitter.emit(Opcode::Dup)?;
                self.emitter.emit(Opcode::Pshword)?;
                let (load, store) = match (relative, ty) {
                    (true, BaseType::Word) => (Opcode::Ldrwordimm, Opcode::Strwordimm),
                    (true, BaseType::Byte) => (Opcode::Ldrbyteimm, Opcode::Strbyteimm),
                    (false, BaseType::Word) => (Opcode::Ldawordimm, Opcode::Stawordimm),
                    (false, BaseType::Byte) => (Opcode::Ldabyteimm, Opcode::Stabyteimm),
                };
                self.emitter.emit_imm(load, var_addr)?;
                self.emitter.emit(Opcode::Inc)?;
                self.emitter.emit(Opcode::Dup)?;
                self.emitter.emit_imm(store, var_addr)?;
                // Keep going while the stepped variable is below the
                // limit (the limit is the deeper operand).
                self.emitter.emit(Opcode::Gt)?;
                self.emitter.emit_imm(Opcode::Brnchimm, loop_pc as i16)?;
                self.emitter.emit(Opcode::Popword)?;
                self.emitter.emit(Opcode::Drop)?;
                self.frames.pop()?;
                Ok(())
            }
            Some(Frame::For {
                line,
                pos,
                limit,
                var_addr,
                ty,
            }) => {
                let stepped = match ty {
                    BaseType::Word => {
                        let v = self.vars.heap.read_word(var_addr)?.wrapping_add(1);
                        self.vars.heap.write_word(var_addr, v)?;
                        v
                    }
                    BaseType::Byte => {
                        let v = self.vars.heap.read_byte(var_addr)?.wrapping_add(1);
                        self.vars.heap.write_byte(var_addr, v)?;
                        v as i16
                    }
                };
                if stepped < limit {
                    self.back_to(line, pos)?;
                } else {
                    self.frames.pop()?;
                }
                Ok(())
            }
            _ => Err(error!(NoFor)),
        }
    }

    /*
     * SUB / ENDSUB / CALL / RETURN.
     */

    fn do_sub(&mut self, name: &str) -> Result<()> {
        match self.mode {
            Mode::Compile => {
                if self.compiling_sub {
                    return Err(error!(RanIntoSub));
                }
                self.compiling_sub = true;
                self.console.print(&format!("\n[{}]", name));
                if let Some(other) = self.linker.define(name, self.emitter.pc()) {
                    self.console.print(&format!("\n{} masks {}\n", name, other));
                }
                self.vars.enter_scope();
                self.emitter.emit(Opcode::Sptofp)?;
                self.emitter.rt_enter_frame();
                self.parse_params()
            }
            Mode::Interpret => {
                // Definitions are not executable; step over the body.
                let end = self.find_endsub(self.cur)?;
                let text = self.program.get(end).unwrap().to_string();
                self.cur = end as i32;
                self.src.load(&text);
                self.src.eat_space();
                self.src.advance("endsub".len());
                Ok(())
            }
        }
    }

    /// Parse the formal parameter list of a `sub` being compiled. The
    /// caller has already pushed the actuals, so each formal is bound to
    /// a frame offset rather than fresh storage.
    fn parse_params(&mut self) -> Result<()> {
        self.src.expect(b'(')?;
        loop {
            self.src.eat_space();
            if self.src.peek() == b')' {
                break;
            }
            if self.src.at_end() {
                return Err(error!(Argument));
            }
            let ty = parse_type(&mut self.src)?;
            self.src.eat_space();
            let name = match self.src.scan_name() {
                Ok(name) => name,
                Err(_) => return Err(error!(Argument)),
            };
            let byref = parse_byref(&mut self.src)?;
            if let Some(other) = self.vars.create_param(&name, ty, byref)? {
                self.console.print(&format!("{} masks {}\n", name, other));
            }
            self.src.eat_space();
            if self.src.peek() == b',' {
                self.src.advance(1);
            }
        }
        self.src.expect(b')')
    }

    fn do_endsub(&mut self) -> Result<Flow> {
        if self.mode == Mode::Compile {
            self.emitter.rt_leave_frame();
            self.compiling_sub = false;
            self.vars.leave_scope();
            // Falling out of a sub returns 0.
            self.emitter.emit_ldi(0)?;
        }
        self.do_return(0)
    }

    /// Locate a definition line: `sub <name>(...)`. Names match on their
    /// full spelling here; the linker applies the 8-character rule.
    fn find_sub(&self, name: &str) -> Option<usize> {
        for (index, line) in self.program.iter().enumerate() {
            let t = line.trim_start();
            if let Some(rest) = t.strip_prefix("sub ") {
                let rest = rest.trim_start();
                let end = rest
                    .find(|c: char| c == '(' || c == ' ')
                    .unwrap_or(rest.len());
                if &rest[..end] == name {
                    return Some(index);
                }
            }
        }
        None
    }

    fn find_endsub(&self, from: i32) -> Result<usize> {
        let start = if from < 0 { 0 } else { (from + 1) as usize };
        for index in start..self.program.len() {
            let t = self.program.get(index).unwrap().trim_start();
            if let Some(rest) = t.strip_prefix("endsub") {
                if matches!(rest.as_bytes().first(), None | Some(b' ') | Some(b';')) {
                    return Ok(index);
                }
            }
        }
        Err(error!(NoSub))
    }

    /// Perform a call. Walks the definition's formal list and the call's
    /// actual list in step: interpreting, actuals are evaluated in the
    /// caller's frame and bound as fresh locals in the callee's;
    /// generating, they are pushed to the VM call stack and a `JSRIMM`
    /// with a placeholder operand is recorded for the linker.
    fn do_call(&mut self, name: &str, ret_line: i32) -> Result<()> {
        let sub_line = match self.find_sub(name) {
            Some(index) => index,
            None => return Err(error!(NoSub)),
        };
        let def_text = self.program.get(sub_line).unwrap().to_string();
        let mut def = Source::default();
        def.load(&def_text);
        while !def.at_end() && def.peek() != b'(' {
            def.advance(1);
        }
        if def.at_end() {
            return Err(error!(ExpectedChar; "("));
        }
        def.advance(1);
        self.src.eat_space();
        self.src.expect(b'(')?;
        match self.mode {
            Mode::Compile => {
                let mut argbytes: i16 = 0;
                loop {
                    def.eat_space();
                    if def.peek() == b')' {
                        break;
                    }
                    if def.at_end() {
                        return Err(error!(Argument));
                    }
                    let ty = parse_type(&mut def)?;
                    def.eat_space();
                    if def.scan_name().is_err() {
                        return Err(error!(Argument));
                    }
                    let byref = parse_byref(&mut def)?;
                    self.src.eat_space();
                    if self.src.at_end() || self.src.peek() == b')' {
                        return Err(error!(Argument));
                    }
                    self.eval_argument()?;
                    if byref || ty == BaseType::Word {
                        self.emitter.emit(Opcode::Pshword)?;
                        argbytes += 2;
                    } else {
                        self.emitter.emit(Opcode::Pshbyte)?;
                        argbytes += 1;
                    }
                    self.src.eat_space();
                    if self.src.peek() == b',' {
                        self.src.advance(1);
                        self.src.eat_space();
                    }
                    def.eat_space();
                    if def.peek() == b',' {
                        def.advance(1);
                    }
                }
                self.src.eat_space();
                self.src.expect(b')')?;
                let operand_at = self.emitter.pc() + 1;
                self.emitter.emit_imm(Opcode::Jsrimm, -1)?;
                self.linker.call_site(name, operand_at);
                // The caller drops its pushed argument bytes.
                if argbytes > 0 {
                    self.emitter.emit_ldi(argbytes)?;
                    self.emitter.emit(Opcode::Discard)?;
                }
                Ok(())
            }
            Mode::Interpret => {
                let mut actuals: Vec<(String, BaseType, ArgVal)> = vec![];
                loop {
                    def.eat_space();
                    if def.peek() == b')' {
                        break;
                    }
                    if def.at_end() {
                        return Err(error!(Argument));
                    }
                    let ty = parse_type(&mut def)?;
                    def.eat_space();
                    let formal = match def.scan_name() {
                        Ok(formal) => formal,
                        Err(_) => return Err(error!(Argument)),
                    };
                    let byref = parse_byref(&mut def)?;
                    self.src.eat_space();
                    if self.src.at_end() || self.src.peek() == b')' {
                        return Err(error!(Argument));
                    }
                    if byref {
                        // Arrays pass by reference: the callee's record
                        // shares the caller's body.
                        let actual = self.src.scan_name()?;
                        let (var, _) = self.var_record(&actual)?;
                        match var.shape {
                            Shape::Array { len } if var.ty == ty => {
                                actuals.push((
                                    formal,
                                    ty,
                                    ArgVal::Array {
                                        body: var.addr as Address,
                                        len,
                                    },
                                ));
                            }
                            _ => return Err(error!(Type)),
                        }
                    } else {
                        let val = self.eval_argument()?;
                        actuals.push((formal, ty, ArgVal::Scalar(val)));
                    }
                    self.src.eat_space();
                    if self.src.peek() == b',' {
                        self.src.advance(1);
                        self.src.eat_space();
                    }
                    def.eat_space();
                    if def.peek() == b',' {
                        def.advance(1);
                    }
                }
                self.src.eat_space();
                self.src.expect(b')')?;
                self.vars.enter_scope();
                for (formal, ty, val) in actuals {
                    let collision = match val {
                        ArgVal::Scalar(v) => self.vars.create_scalar(&formal, ty, false, v)?,
                        ArgVal::Array { body, len } => {
                            self.vars.create_array_shared(&formal, ty, len, body)?
                        }
                    };
                    if let Some(other) = collision {
                        self.console.print(&format!("{} masks {}\n", formal, other));
                    }
                }
                self.frames.push(Frame::Call {
                    line: ret_line,
                    pos: self.src.pos(),
                })?;
                let body = sub_line + 1;
                let text = match self.program.get(body) {
                    Some(text) => text.to_string(),
                    None => return Err(error!(NoSub)),
                };
                self.cur = body as i32;
                self.src.load(&text);
                Ok(())
            }
        }
    }

    /// One actual argument, as its own expression.
    fn eval_argument(&mut self) -> Result<i16> {
        self.operators.push(Token::Sentinel)?;
        let val = self.eval(false)?;
        self.operators.pop()?;
        Ok(val)
    }

    /// RETURN. Interpreting, unwind to the first enclosing call frame,
    /// skipping any loop or branch frames opened inside the sub.
    fn do_return(&mut self, value: i16) -> Result<Flow> {
        if self.mode == Mode::Compile {
            // Return value is on the VM stack; drop the locals and go.
            self.emitter.emit(Opcode::Fptosp)?;
            self.emitter.emit(Opcode::Rts)?;
            return Ok(Flow::Continue);
        }
        loop {
            match self.frames.pop()? {
                Frame::Call { line, pos } => {
                    self.ret_register = value;
                    self.vars.leave_scope();
                    return if line == EXPR_CALL_LINE {
                        Ok(Flow::Stop)
                    } else {
                        self.back_to(line, pos)?;
                        Ok(Flow::Continue)
                    };
                }
                _ => continue,
            }
        }
    }

    /*
     * Compilation driver and reports.
     */

    /// `comp "file"`: compile the whole program, link, and write the
    /// image.
    fn do_compile(&mut self, filename: &str) -> Result<Flow> {
        self.filename = filename.to_string();
        self.mode = Mode::Compile;
        self.sink = ExprSink::Emit;
        self.compiling_sub = false;
        self.linker.clear();
        self.emitter.reset();
        if self.do_run()? == Flow::Break {
            return Ok(Flow::Break);
        }
        // An open IF/WHILE/FOR means an unpatched forward branch.
        if !self.frames.is_empty() {
            return Err(error!(Link));
        }
        self.emitter.emit(Opcode::End)?;
        self.linker.link(&mut self.emitter)?;
        let filename = self.filename.clone();
        self.console.print(&format!("\nWriting {}\n", filename));
        self.emitter.write_file(&filename)?;
        self.mode = Mode::Interpret;
        self.sink = ExprSink::fold();
        Ok(Flow::Continue)
    }

    /// The emitted image, for inspection.
    pub fn bytecode(&self) -> &[u8] {
        self.emitter.code()
    }

    fn print_vars(&mut self) {
        let mut out = String::new();
        for var in self.vars.iter() {
            out.push_str(&format!("{}", var.name()));
            match var.shape {
                Shape::Array { len } => out.push_str(&format!("[{}]", len)),
                Shape::ArrayRef => out.push_str("[]"),
                Shape::Scalar => {}
            }
            out.push(' ');
            out.push(match var.ty {
                BaseType::Word => 'w',
                BaseType::Byte => 'b',
            });
            out.push(if var.is_const { 'c' } else { ' ' });
            if var.shape == Shape::Scalar {
                let val = match self.mode {
                    Mode::Compile => var.addr,
                    Mode::Interpret => match var.ty {
                        BaseType::Word => {
                            self.vars.heap.read_word(var.addr as Address).unwrap_or(0)
                        }
                        BaseType::Byte => self
                            .vars
                            .heap
                            .read_byte(var.addr as Address)
                            .unwrap_or(0) as i16,
                    },
                };
                out.push_str(&format!(" {}", val as u16));
            }
            out.push('\n');
        }
        self.console.print(&out);
    }

    fn print_free(&mut self) {
        self.console.print(&format!(
            "free:\n{} / {} vars\n{} lines\n",
            self.vars.heap.free(),
            self.vars.heap.total(),
            self.program.len()
        ));
    }

    fn list_lines(&mut self, from: i32, to: i32) {
        let mut out = String::new();
        for (index, line) in self.program.iter().enumerate() {
            let number = index as i32 + 1;
            if number >= from && number <= to {
                out.push_str(&format!("{} {}\n", number, line));
            }
        }
        self.console.print(&out);
    }
}
