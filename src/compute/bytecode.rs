//! Compiles arithmetic expressions over named series and parameters into a
//! flat stack program evaluated once per timestep.

use crate::error::FunctionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Const = 0,
    Input = 1,
    Param = 2,
    Add = 3,
    Sub = 4,
    Mul = 5,
    Div = 6,
    Neg = 7,
}

/// Structure-of-Arrays layout for the execution tape.
/// `operand[i]` indexes `constants`, the input list or the parameter list
/// depending on `ops[i]`; it is 0 for arithmetic ops.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub ops: Vec<OpCode>,
    pub operand: Vec<u32>,
    pub constants: Vec<f64>,
    pub max_stack: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>, FunctionError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent part, e.g. 1e-3
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    i += 1;
                    if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                        i += 1;
                    }
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| FunctionError::Expression(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(FunctionError::Expression(format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

pub struct Compiler<'a> {
    inputs: &'a [String],
    params: &'a [String],
    tokens: Vec<Token>,
    pos: usize,
    program: Program,
    depth: usize,
}

impl<'a> Compiler<'a> {
    pub fn new(inputs: &'a [String], params: &'a [String]) -> Self {
        Self { inputs, params, tokens: Vec::new(), pos: 0, program: Program::default(), depth: 0 }
    }

    /// Compiles `src` into a program. Identifiers resolve to inputs first,
    /// then parameters.
    pub fn compile(mut self, src: &str) -> Result<Program, FunctionError> {
        self.tokens = tokenize(src)?;
        if self.tokens.is_empty() {
            return Err(FunctionError::Expression("empty expression".into()));
        }
        self.expr()?;
        if self.pos != self.tokens.len() {
            return Err(FunctionError::Expression(format!("unexpected token {:?}", self.tokens[self.pos])));
        }
        Ok(self.program)
    }

    fn emit(&mut self, op: OpCode, operand: u32) {
        match op {
            OpCode::Const | OpCode::Input | OpCode::Param => {
                self.depth += 1;
                self.program.max_stack = self.program.max_stack.max(self.depth);
            }
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => self.depth -= 1,
            OpCode::Neg => {}
        }
        self.program.ops.push(op);
        self.program.operand.push(operand);
    }

    fn peek(&self) -> Option<&Token> { self.tokens.get(self.pos) }

    fn expr(&mut self) -> Result<(), FunctionError> {
        self.term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            self.term()?;
            self.emit(if c == '+' { OpCode::Add } else { OpCode::Sub }, 0);
        }
        Ok(())
    }

    fn term(&mut self) -> Result<(), FunctionError> {
        self.unary()?;
        while let Some(Token::Op(c @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            self.unary()?;
            self.emit(if c == '*' { OpCode::Mul } else { OpCode::Div }, 0);
        }
        Ok(())
    }

    fn unary(&mut self) -> Result<(), FunctionError> {
        if let Some(Token::Op('-')) = self.peek() {
            self.pos += 1;
            self.unary()?;
            self.emit(OpCode::Neg, 0);
            return Ok(());
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<(), FunctionError> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| FunctionError::Expression("unexpected end of expression".into()))?;
        self.pos += 1;
        match token {
            Token::Number(v) => {
                let idx = self.program.constants.len() as u32;
                self.program.constants.push(v);
                self.emit(OpCode::Const, idx);
            }
            Token::Ident(name) => {
                if let Some(i) = self.inputs.iter().position(|n| *n == name) {
                    self.emit(OpCode::Input, i as u32);
                } else if let Some(i) = self.params.iter().position(|n| *n == name) {
                    self.emit(OpCode::Param, i as u32);
                } else {
                    return Err(FunctionError::Expression(format!("unknown identifier '{}'", name)));
                }
            }
            Token::LParen => {
                self.expr()?;
                match self.peek() {
                    Some(Token::RParen) => self.pos += 1,
                    _ => return Err(FunctionError::Expression("missing ')'".into())),
                }
            }
            other => return Err(FunctionError::Expression(format!("unexpected token {:?}", other))),
        }
        Ok(())
    }
}

impl Program {
    /// Evaluates the program at every timestep. Non-finite results (e.g.
    /// division by zero) are reported as missing.
    pub fn eval(&self, inputs: &[&[f64]], params: &[f64], len: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(len);
        let mut stack: Vec<f64> = Vec::with_capacity(self.max_stack);
        for t in 0..len {
            stack.clear();
            for (op, &arg) in self.ops.iter().zip(&self.operand) {
                let arg = arg as usize;
                match op {
                    OpCode::Const => stack.push(self.constants[arg]),
                    OpCode::Input => stack.push(inputs[arg].get(t).copied().unwrap_or(f64::NAN)),
                    OpCode::Param => stack.push(params[arg]),
                    OpCode::Neg => {
                        if let Some(top) = stack.last_mut() {
                            *top = -*top;
                        }
                    }
                    _ => {
                        let rhs = stack.pop().unwrap_or(f64::NAN);
                        let lhs = stack.pop().unwrap_or(f64::NAN);
                        stack.push(match op {
                            OpCode::Add => lhs + rhs,
                            OpCode::Sub => lhs - rhs,
                            OpCode::Mul => lhs * rhs,
                            _ => lhs / rhs,
                        });
                    }
                }
            }
            let v = stack.pop().unwrap_or(f64::NAN);
            out.push(if v.is_finite() { v } else { f64::NAN });
        }
        out
    }
}
