//! Recursive-descent parser for render scripts.

use crate::script::lexer::{Token, TokenKind, tokenize};
use crate::script::{ScriptError, ScriptErrorKind};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Program {
    pub name: String,
    pub param: String,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Var(Vec<(String, Option<Expr>)>),
    Expr(Expr),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    While(Expr, Box<Stmt>),
    ForIn {
        var: String,
        declare: bool,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Break,
    Continue,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignOp {
    Set,
    Add,
    Sub,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Expr {
    pub kind: ExprKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExprKind {
    Literal(Value),
    Array(Vec<Expr>),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    /// `++`/`--`; `delta` is `1.0` or `-1.0`.
    Update {
        delta: f64,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(AssignOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn new(kind: ExprKind, line: usize) -> Self {
        Self { kind, line }
    }

    fn is_assignable(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Ident(_) | ExprKind::Member(..) | ExprKind::Index(..)
        )
    }
}

const RESERVED: &[&str] = &[
    "var", "let", "const", "if", "else", "while", "for", "in", "break", "continue", "function",
    "true", "false", "null", "undefined", "return",
];

/// Deepest allowed nesting of statements, sub-expressions and operator
/// chains. Parsing and evaluation both recurse on it.
const MAX_NESTING: usize = 96;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    loop_depth: usize,
    nesting: usize,
}

type PResult<T> = Result<T, ScriptError>;

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn line(&self) -> usize {
        self.peek().line
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Punct(q) if *q == p)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(name) if name == kw)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self) -> ScriptError {
        let found = match &self.peek().kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Number(n) => format!("number {}", crate::value::format_number(*n)),
            TokenKind::Str(_) => "string".to_string(),
            TokenKind::Ident(name) => format!("identifier '{}'", name),
            TokenKind::Punct(p) => format!("token '{}'", p),
        };
        ScriptError::new(
            ScriptErrorKind::Syntax,
            format!("Unexpected {}", found),
            Some(self.line()),
        )
    }

    fn expect_punct(&mut self, p: &str) -> PResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> PResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn identifier(&mut self) -> PResult<String> {
        match &self.peek().kind {
            TokenKind::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Takes one level of the nesting budget; the caller gives it back.
    fn descend(&mut self) -> PResult<()> {
        if self.nesting >= MAX_NESTING {
            return Err(ScriptError::new(
                ScriptErrorKind::Syntax,
                "expression nested too deeply",
                Some(self.line()),
            ));
        }
        self.nesting += 1;
        Ok(())
    }

    /// True when a line break separates the next token from the previous one.
    fn after_line_break(&self) -> bool {
        self.pos > 0 && self.peek().line > self.tokens[self.pos - 1].line
    }

    /// `;`, or nothing before `}`, a line break or end of input.
    fn end_statement(&mut self) -> PResult<()> {
        if self.eat_punct(";")
            || self.is_punct("}")
            || self.peek().kind == TokenKind::Eof
            || self.after_line_break()
        {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn program(&mut self) -> PResult<Program> {
        self.expect_keyword("function")?;
        let name = self.identifier()?;
        self.expect_punct("(")?;
        let param = self.identifier()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;
        let body = self.statements_until_brace()?;
        if self.peek().kind != TokenKind::Eof {
            return Err(self.unexpected());
        }
        Ok(Program { name, param, body })
    }

    /// Statements up to and including the closing `}`.
    fn statements_until_brace(&mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.eat_punct("}") {
            if self.peek().kind == TokenKind::Eof {
                return Err(self.unexpected());
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn statement(&mut self) -> PResult<Stmt> {
        self.descend()?;
        let stmt = self.statement_inner();
        self.nesting -= 1;
        stmt
    }

    fn statement_inner(&mut self) -> PResult<Stmt> {
        if self.eat_punct("{") {
            return Ok(Stmt::Block(self.statements_until_brace()?));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.is_keyword("var") || self.is_keyword("let") || self.is_keyword("const") {
            self.advance();
            let stmt = self.var_declarations()?;
            self.end_statement()?;
            return Ok(stmt);
        }
        if self.eat_keyword("if") {
            self.expect_punct("(")?;
            let cond = self.expression()?;
            self.expect_punct(")")?;
            let then = Box::new(self.statement()?);
            let otherwise = if self.eat_keyword("else") {
                Some(Box::new(self.statement()?))
            } else {
                None
            };
            return Ok(Stmt::If(cond, then, otherwise));
        }
        if self.eat_keyword("while") {
            self.expect_punct("(")?;
            let cond = self.expression()?;
            self.expect_punct(")")?;
            let body = Box::new(self.loop_body()?);
            return Ok(Stmt::While(cond, body));
        }
        if self.eat_keyword("for") {
            return self.for_in();
        }
        if self.is_keyword("break") || self.is_keyword("continue") {
            let line = self.line();
            let is_break = self.is_keyword("break");
            self.advance();
            if self.loop_depth == 0 {
                let word = if is_break { "break" } else { "continue" };
                return Err(ScriptError::new(
                    ScriptErrorKind::Syntax,
                    format!("Illegal {} statement", word),
                    Some(line),
                ));
            }
            self.end_statement()?;
            return Ok(if is_break { Stmt::Break } else { Stmt::Continue });
        }

        let expr = self.expression()?;
        self.end_statement()?;
        Ok(Stmt::Expr(expr))
    }

    fn var_declarations(&mut self) -> PResult<Stmt> {
        let mut decls = Vec::new();
        loop {
            let name = self.identifier()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push((name, init));
            if !self.eat_punct(",") {
                return Ok(Stmt::Var(decls));
            }
        }
    }

    fn for_in(&mut self) -> PResult<Stmt> {
        self.expect_punct("(")?;
        let declare =
            self.eat_keyword("var") || self.eat_keyword("let") || self.eat_keyword("const");
        let var = self.identifier()?;
        self.expect_keyword("in")?;
        let iterable = self.expression()?;
        self.expect_punct(")")?;
        let body = Box::new(self.loop_body()?);
        Ok(Stmt::ForIn {
            var,
            declare,
            iterable,
            body,
        })
    }

    fn loop_body(&mut self) -> PResult<Stmt> {
        self.loop_depth += 1;
        let body = self.statement();
        self.loop_depth -= 1;
        body
    }

    // -----------------------------------------------------------------------
    // Expressions, lowest precedence first
    // -----------------------------------------------------------------------

    fn expression(&mut self) -> PResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        self.descend()?;
        let expr = self.assignment_inner();
        self.nesting -= 1;
        expr
    }

    fn assignment_inner(&mut self) -> PResult<Expr> {
        let target = self.conditional()?;
        let op = if self.is_punct("=") {
            AssignOp::Set
        } else if self.is_punct("+=") {
            AssignOp::Add
        } else if self.is_punct("-=") {
            AssignOp::Sub
        } else {
            return Ok(target);
        };
        let line = self.line();
        if !target.is_assignable() {
            return Err(ScriptError::new(
                ScriptErrorKind::Syntax,
                "Invalid left-hand side in assignment",
                Some(line),
            ));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::new(
            ExprKind::Assign(op, Box::new(target), Box::new(value)),
            line,
        ))
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let cond = self.logical_or()?;
        if !self.is_punct("?") {
            return Ok(cond);
        }
        let line = self.line();
        self.advance();
        let then = self.assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.assignment()?;
        Ok(Expr::new(
            ExprKind::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)),
            line,
        ))
    }

    fn logical_or(&mut self) -> PResult<Expr> {
        let mut left = self.logical_and()?;
        let outer = self.nesting;
        while self.is_punct("||") {
            let line = self.line();
            self.descend()?;
            self.advance();
            let right = self.logical_and()?;
            left = Expr::new(
                ExprKind::Logical(LogicalOp::Or, Box::new(left), Box::new(right)),
                line,
            );
        }
        self.nesting = outer;
        Ok(left)
    }

    fn logical_and(&mut self) -> PResult<Expr> {
        let mut left = self.binary(0)?;
        let outer = self.nesting;
        while self.is_punct("&&") {
            let line = self.line();
            self.descend()?;
            self.advance();
            let right = self.binary(0)?;
            left = Expr::new(
                ExprKind::Logical(LogicalOp::And, Box::new(left), Box::new(right)),
                line,
            );
        }
        self.nesting = outer;
        Ok(left)
    }

    /// Left-associative binary levels: equality, relational, additive,
    /// multiplicative.
    fn binary(&mut self, level: usize) -> PResult<Expr> {
        const LEVELS: &[&[(&str, BinaryOp)]] = &[
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
            ],
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
        ];

        let Some(ops) = LEVELS.get(level) else {
            return self.unary();
        };
        let mut left = self.binary(level + 1)?;
        let outer = self.nesting;
        while let Some(&(_, op)) = ops.iter().find(|(p, _)| self.is_punct(p)) {
            let line = self.line();
            self.descend()?;
            self.advance();
            let right = self.binary(level + 1)?;
            left = Expr::new(ExprKind::Binary(op, Box::new(left), Box::new(right)), line);
        }
        self.nesting = outer;
        Ok(left)
    }

    fn unary(&mut self) -> PResult<Expr> {
        self.descend()?;
        let expr = self.unary_inner();
        self.nesting -= 1;
        expr
    }

    fn unary_inner(&mut self) -> PResult<Expr> {
        let line = self.line();
        let op = if self.is_punct("!") {
            UnaryOp::Not
        } else if self.is_punct("-") {
            UnaryOp::Neg
        } else if self.is_punct("+") {
            UnaryOp::Plus
        } else if self.is_punct("++") || self.is_punct("--") {
            let delta = if self.is_punct("++") { 1.0 } else { -1.0 };
            self.advance();
            let target = self.unary()?;
            return self.update(delta, true, target, line);
        } else {
            return self.postfix();
        };
        self.advance();
        let operand = self.unary()?;
        Ok(Expr::new(ExprKind::Unary(op, Box::new(operand)), line))
    }

    fn update(&self, delta: f64, prefix: bool, target: Expr, line: usize) -> PResult<Expr> {
        if !target.is_assignable() {
            let kind = if prefix { "prefix" } else { "postfix" };
            return Err(ScriptError::new(
                ScriptErrorKind::Syntax,
                format!("Invalid left-hand side expression in {} operation", kind),
                Some(line),
            ));
        }
        Ok(Expr::new(
            ExprKind::Update {
                delta,
                prefix,
                target: Box::new(target),
            },
            line,
        ))
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let expr = self.call_member()?;
        if self.is_punct("++") || self.is_punct("--") {
            let line = self.line();
            let delta = if self.is_punct("++") { 1.0 } else { -1.0 };
            self.advance();
            return self.update(delta, false, expr, line);
        }
        Ok(expr)
    }

    fn call_member(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        let outer = self.nesting;
        loop {
            let line = self.line();
            if !(self.is_punct(".") || self.is_punct("[") || self.is_punct("(")) {
                self.nesting = outer;
                return Ok(expr);
            }
            self.descend()?;
            if self.eat_punct(".") {
                let name = match &self.peek().kind {
                    // keywords are fine as property names
                    TokenKind::Ident(name) => name.clone(),
                    _ => return Err(self.unexpected()),
                };
                self.advance();
                expr = Expr::new(ExprKind::Member(Box::new(expr), name), line);
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::new(ExprKind::Index(Box::new(expr), Box::new(index)), line);
            } else if self.eat_punct("(") {
                let args = self.arguments(")")?;
                expr = Expr::new(ExprKind::Call(Box::new(expr), args), line);
            }
        }
    }

    /// Comma-separated expressions up to `close`, which is consumed.
    fn arguments(&mut self, close: &str) -> PResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat_punct(close) {
            return Ok(args);
        }
        loop {
            args.push(self.assignment()?);
            if self.eat_punct(close) {
                return Ok(args);
            }
            self.expect_punct(",")?;
            // trailing comma
            if self.eat_punct(close) {
                return Ok(args);
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let line = self.line();
        let kind = match self.peek().kind.clone() {
            TokenKind::Number(n) => ExprKind::Literal(Value::Number(n)),
            TokenKind::Str(s) => ExprKind::Literal(Value::Str(s)),
            TokenKind::Punct("(") => {
                self.advance();
                let inner = self.expression()?;
                self.expect_punct(")")?;
                return Ok(inner);
            }
            TokenKind::Punct("[") => {
                self.advance();
                let items = self.arguments("]")?;
                return Ok(Expr::new(ExprKind::Array(items), line));
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" => ExprKind::Literal(Value::Bool(true)),
                "false" => ExprKind::Literal(Value::Bool(false)),
                "null" => ExprKind::Literal(Value::Null),
                "undefined" => ExprKind::Literal(Value::Undefined),
                _ if RESERVED.contains(&name.as_str()) => return Err(self.unexpected()),
                _ => ExprKind::Ident(name),
            },
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(Expr::new(kind, line))
    }
}

/// Parses a whole render script: exactly one `function name(param) { ... }`.
pub(crate) fn parse_program(source: &str) -> Result<Program, ScriptError> {
    let tokens = tokenize(source)?;
    Parser {
        tokens,
        pos: 0,
        loop_depth: 0,
        nesting: 0,
    }
    .program()
}
