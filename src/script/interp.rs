use std::cmp::Ordering;
use std::collections::HashMap;

use crate::script::parser::{
    AssignOp, BinaryOp, Expr, ExprKind, LogicalOp, Program, Stmt, UnaryOp, parse_program,
};
use crate::script::{Backend, RenderFn, ScriptError, ScriptErrorKind};
use crate::tpl::render_context::RenderContext;
use crate::value::Value;

/// Lists grow on assignment past their end, but not unboundedly.
const MAX_LIST_GROWTH: usize = 1 << 16;

static UNDEFINED: Value = Value::Undefined;

/// Tree-walking interpreter for render scripts.
///
/// Names resolve against script locals first, then against the keys of the
/// render data; anything else is `undefined`. Lists and maps are values, not
/// references, so `===` on them compares contents.
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

impl Backend for Interpreter {
    fn name(&self) -> &str {
        "interpreter"
    }

    fn compile(&self, source: &str) -> Result<Box<dyn RenderFn>, ScriptError> {
        let program = parse_program(source)?;
        Ok(Box::new(Script { program }))
    }
}

struct Script {
    program: Program,
}

impl RenderFn for Script {
    fn call(&self, ctx: &mut RenderContext<'_>) -> Result<(), ScriptError> {
        let mut exec = Exec {
            param: &self.program.param,
            locals: HashMap::new(),
            ctx,
        };
        exec.block(&self.program.body).map(|_| ())
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
}

/// Where an assignment lands: a variable or the render data, then a path
/// of property keys below it.
enum Root {
    Var(String),
    Data,
}

type Eval<T> = Result<T, ScriptError>;

fn type_error(message: impl Into<String>, line: usize) -> ScriptError {
    ScriptError::new(ScriptErrorKind::Type, message, Some(line))
}

struct Exec<'p, 'c, 'r> {
    param: &'p str,
    locals: HashMap<String, Value>,
    ctx: &'c mut RenderContext<'r>,
}

impl Exec<'_, '_, '_> {
    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn block(&mut self, stmts: &[Stmt]) -> Eval<Flow> {
        for stmt in stmts {
            match self.stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn stmt(&mut self, stmt: &Stmt) -> Eval<Flow> {
        match stmt {
            Stmt::Var(decls) => {
                for (name, init) in decls {
                    match init {
                        Some(init) => {
                            let value = self.eval(init)?;
                            self.locals.insert(name.clone(), value);
                        }
                        None => {
                            self.locals.entry(name.clone()).or_default();
                        }
                    }
                }
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::If(cond, then, otherwise) => {
                if self.eval(cond)?.is_truthy() {
                    return self.stmt(then);
                }
                if let Some(otherwise) = otherwise {
                    return self.stmt(otherwise);
                }
            }
            Stmt::While(cond, body) => {
                while self.eval(cond)?.is_truthy() {
                    if let Flow::Break = self.stmt(body)? {
                        break;
                    }
                }
            }
            Stmt::ForIn {
                var,
                declare,
                iterable,
                body,
            } => {
                let keys = self.eval(iterable)?.keys();
                for key in keys {
                    if *declare {
                        self.locals.insert(var.clone(), key);
                    } else {
                        *self.variable_mut(var) = key;
                    }
                    if let Flow::Break = self.stmt(body)? {
                        break;
                    }
                }
            }
            Stmt::Block(stmts) => return self.block(stmts),
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Empty => {}
        }
        Ok(Flow::Normal)
    }

    // -----------------------------------------------------------------------
    // Names
    // -----------------------------------------------------------------------

    /// True for the bare render-context parameter (unless a local shadows it).
    fn is_context(&self, expr: &Expr) -> bool {
        matches!(&expr.kind, ExprKind::Ident(name) if name == self.param && !self.locals.contains_key(name))
    }

    fn lookup_ref(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.locals.get(name) {
            return Some(value);
        }
        match self.ctx.data() {
            Value::Map(map) => map.get(name),
            _ => None,
        }
    }

    /// The storage behind `name`: a local, else a data key, else a new local.
    fn variable_mut(&mut self, name: &str) -> &mut Value {
        if !self.locals.contains_key(name) {
            if let Value::Map(map) = self.ctx.data_mut() {
                if let Some(slot) = map.get_mut(name) {
                    return slot;
                }
            }
        }
        self.locals.entry(name.to_string()).or_default()
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn eval(&mut self, expr: &Expr) -> Eval<Value> {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Literal(value) => Ok(value.clone()),
            ExprKind::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Eval<Vec<_>>>()
                .map(Value::List),
            ExprKind::Ident(name) => {
                if self.is_context(expr) {
                    return Err(type_error(
                        format!("{} can only be used to call its methods", name),
                        line,
                    ));
                }
                Ok(self.lookup_ref(name).cloned().unwrap_or_default())
            }
            ExprKind::Member(object, name) => {
                if self.is_context(object) {
                    return Ok(match name.as_str() {
                        "data" => self.ctx.data().clone(),
                        _ => Value::Undefined,
                    });
                }
                if let ExprKind::Ident(base) = &object.kind {
                    if let Some(target) = self.lookup_ref(base) {
                        return target
                            .get_property(name)
                            .ok_or_else(|| cannot_read(name, target, line));
                    }
                }
                let target = self.eval(object)?;
                target
                    .get_property(name)
                    .ok_or_else(|| cannot_read(name, &target, line))
            }
            ExprKind::Index(object, index) => {
                // A plain variable is indexed in place instead of cloned.
                if let ExprKind::Ident(base) = &object.kind {
                    if !self.is_context(object) {
                        let key = self.eval(index)?;
                        let target = self.lookup_ref(base).unwrap_or(&UNDEFINED);
                        return target
                            .get_index(&key)
                            .ok_or_else(|| cannot_read(&key.to_string(), target, line));
                    }
                }
                let target = self.eval(object)?;
                let key = self.eval(index)?;
                target
                    .get_index(&key)
                    .ok_or_else(|| cannot_read(&key.to_string(), &target, line))
            }
            ExprKind::Call(callee, args) => self.call(callee, args, line),
            ExprKind::Unary(op, operand) => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                })
            }
            ExprKind::Update {
                delta,
                prefix,
                target,
            } => {
                let path = self.place(target)?;
                let slot = self.slot(path, line)?;
                let old = slot.to_number();
                let new = old + delta;
                *slot = Value::Number(new);
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            ExprKind::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(binary(*op, &left, &right))
            }
            ExprKind::Logical(op, left, right) => {
                let left = self.eval(left)?;
                match (op, left.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
            ExprKind::Conditional(cond, then, otherwise) => {
                if self.eval(cond)?.is_truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            ExprKind::Assign(op, target, value) => {
                let path = self.place(target)?;
                let rhs = self.eval(value)?;
                let slot = self.slot(path, line)?;
                let new = match op {
                    AssignOp::Set => rhs,
                    AssignOp::Add => binary(BinaryOp::Add, slot, &rhs),
                    AssignOp::Sub => binary(BinaryOp::Sub, slot, &rhs),
                };
                *slot = new.clone();
                Ok(new)
            }
        }
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], line: usize) -> Eval<Value> {
        if let ExprKind::Member(object, method) = &callee.kind {
            if self.is_context(object) {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Eval<Vec<_>>>()?;
                return self.context_method(method, args, line);
            }
        }
        // Evaluated for its errors: reading through undefined fails first.
        self.eval(callee)?;
        Err(type_error(format!("{} is not a function", describe(callee)), line))
    }

    fn context_method(&mut self, method: &str, args: Vec<Value>, line: usize) -> Eval<Value> {
        let mut args = args.into_iter();
        match method {
            "write" => {
                let value = args.next().unwrap_or_default();
                let ignore_undefined = args.next().is_some_and(|flag| flag.is_truthy());
                self.ctx.write(&value, ignore_undefined);
                Ok(Value::Undefined)
            }
            "filter" => {
                let name = args.next().unwrap_or_default().to_string();
                let value = args.next().unwrap_or_default();
                self.ctx
                    .filter(&name, value)
                    .map_err(|message| ScriptError::new(ScriptErrorKind::Error, message, Some(line)))
            }
            other => Err(type_error(
                format!("{}.{} is not a function", self.param, other),
                line,
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Assignment targets
    // -----------------------------------------------------------------------

    /// Resolves an assignable expression to its root and key path, evaluating
    /// computed keys left to right.
    fn place(&mut self, target: &Expr) -> Eval<(Root, Vec<Value>)> {
        match &target.kind {
            ExprKind::Ident(name) => Ok((Root::Var(name.clone()), Vec::new())),
            ExprKind::Member(object, name) if self.is_context(object) => {
                if name == "data" {
                    Ok((Root::Data, Vec::new()))
                } else {
                    Err(type_error(
                        format!("Cannot assign to {}.{}", self.param, name),
                        target.line,
                    ))
                }
            }
            ExprKind::Member(object, name) => {
                let (root, mut keys) = self.place(object)?;
                keys.push(Value::Str(name.clone()));
                Ok((root, keys))
            }
            ExprKind::Index(object, index) => {
                let (root, mut keys) = self.place(object)?;
                keys.push(self.eval(index)?);
                Ok((root, keys))
            }
            _ => Err(ScriptError::new(
                ScriptErrorKind::Reference,
                "Invalid assignment target",
                Some(target.line),
            )),
        }
    }

    fn slot(&mut self, (root, keys): (Root, Vec<Value>), line: usize) -> Eval<&mut Value> {
        let mut slot = match root {
            Root::Data => self.ctx.data_mut(),
            Root::Var(name) => self.variable_mut(&name),
        };
        for key in &keys {
            slot = property_mut(slot, key).map_err(|message| type_error(message, line))?;
        }
        Ok(slot)
    }
}

fn cannot_read(property: &str, of: &Value, line: usize) -> ScriptError {
    type_error(
        format!("Cannot read property '{}' of {}", property, of.type_name()),
        line,
    )
}

fn property_mut<'v>(target: &'v mut Value, key: &Value) -> Result<&'v mut Value, String> {
    let kind = target.type_name();
    match target {
        Value::Map(map) => Ok(map.entry(key.to_string()).or_default()),
        Value::List(items) => {
            let index = match key {
                Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
                Value::Str(s) => s.parse::<usize>().ok(),
                _ => None,
            };
            let Some(index) = index else {
                return Err(format!("Cannot set property '{}' of list", key));
            };
            if index >= items.len() {
                if index - items.len() > MAX_LIST_GROWTH {
                    return Err(format!("Invalid list index {}", index));
                }
                items.resize(index + 1, Value::Undefined);
            }
            Ok(&mut items[index])
        }
        Value::Undefined | Value::Null => {
            Err(format!("Cannot set property '{}' of {}", key, kind))
        }
        _ => Err(format!("Cannot create property '{}' on {}", key, kind)),
    }
}

/// Source-like rendering of a callee for error messages.
fn describe(expr: &Expr) -> String {
    match &expr.kind {
        ExprKind::Ident(name) => name.clone(),
        ExprKind::Member(object, name) => format!("{}.{}", describe(object), name),
        ExprKind::Index(object, _) => format!("{}[...]", describe(object)),
        ExprKind::Call(callee, _) => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Lt => Value::Bool(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::Le => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => Value::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::Ge => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Eq => Value::Bool(loose_eq(left, right)),
        BinaryOp::Ne => Value::Bool(!loose_eq(left, right)),
        BinaryOp::StrictEq => Value::Bool(strict_eq(left, right)),
        BinaryOp::StrictNe => Value::Bool(!strict_eq(left, right)),
    }
}

/// `+`: concatenation when either side is a string (or stringifies to one),
/// numeric addition otherwise.
fn add(left: &Value, right: &Value) -> Value {
    let stringy = |v: &Value| matches!(v, Value::Str(_) | Value::List(_) | Value::Map(_));
    if stringy(left) || stringy(right) {
        Value::Str(format!("{}{}", left, right))
    } else {
        Value::Number(left.to_number() + right.to_number())
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}

fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a == b,
        _ => left == right,
    }
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    use Value::*;
    match (left, right) {
        (Undefined | Null, Undefined | Null) => true,
        (Undefined | Null, _) | (_, Undefined | Null) => false,
        (Number(_), Str(_)) | (Str(_), Number(_)) | (Bool(_), _) | (_, Bool(_)) => {
            left.to_number() == right.to_number()
        }
        (List(_) | Map(_), Str(_) | Number(_)) => loose_eq(&Str(left.to_string()), right),
        (Str(_) | Number(_), List(_) | Map(_)) => loose_eq(left, &Str(right.to_string())),
        _ => strict_eq(left, right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::filters::FilterRegistry;
    use crate::value::to_value;
    use serde_json::json;

    fn run(body: &str, data: serde_json::Value) -> Result<String, ScriptError> {
        let source = format!("function render(__context) {{\n{}\n}}\n", body);
        let script = Interpreter.compile(&source)?;
        let filters = FilterRegistry::builtin();
        let mut ctx = RenderContext::new(to_value(&data).unwrap(), &filters);
        script.call(&mut ctx)?;
        Ok(ctx.into_output())
    }

    fn out(body: &str, data: serde_json::Value) -> String {
        run(body, data).unwrap()
    }

    #[test]
    fn test_write_and_names() {
        assert_eq!(
            out("__context.write(greeting + \", \" + who);", json!({"greeting": "Hi", "who": "Bo"})),
            "Hi, Bo"
        );
        assert_eq!(out("__context.write(missing, true);", json!({})), "");
        assert_eq!(out("__context.write(null);", json!({})), "");
    }

    #[test]
    fn test_locals_shadow_data() {
        assert_eq!(
            out("var x = 2; __context.write(x * 3);", json!({"x": 10})),
            "6"
        );
    }

    #[test]
    fn test_arithmetic_and_concat() {
        assert_eq!(out("__context.write(1 + 2 * 3 - 4 / 2);", json!({})), "5");
        assert_eq!(out("__context.write(\"a\" + 1 + 2);", json!({})), "a12");
        assert_eq!(out("__context.write(1 + 2 + \"a\");", json!({})), "3a");
        assert_eq!(out("__context.write(7 % 3);", json!({})), "1");
        assert_eq!(out("__context.write(undefined + 1);", json!({})), "NaN");
    }

    #[test]
    fn test_equality() {
        let body = "__context.write([1 == \"1\", 1 === \"1\", null == undefined, null === undefined, 0 == false, \"\" != 0]);";
        assert_eq!(out(body, json!({})), "true,false,true,false,true,false");
    }

    #[test]
    fn test_logical_operators_yield_operands() {
        assert_eq!(out("__context.write(name || \"anon\");", json!({})), "anon");
        assert_eq!(out("__context.write(a && a.b);", json!({"a": {"b": 4}})), "4");
        assert_eq!(out("__context.write(a && a.b, true);", json!({})), "");
        assert_eq!(out("__context.write(n > 1 ? \"many\" : \"one\");", json!({"n": 3})), "many");
    }

    #[test]
    fn test_for_in_and_loops() {
        let body = "var t = (items);\nfor (var k in t) {\nvar v = t[k];\nif (v == 2) continue;\nif (v == 4) break;\n__context.write(k + \"=\" + v + \";\");\n}";
        assert_eq!(out(body, json!({"items": [1, 2, 3, 4, 5]})), "0=1;2=3;");

        let body = "var i = 0; while (i < 3) { __context.write(i); i++; }";
        assert_eq!(out(body, json!({})), "012");

        let body = "for (var k in obj) { __context.write(k); }";
        assert_eq!(out(body, json!({"obj": {"a": 1, "b": 2}})), "ab");
        assert_eq!(out("for (var k in nothing) { __context.write(k); }", json!({})), "");
    }

    #[test]
    fn test_assignment_updates_data_and_paths() {
        let body = "count += 2; user.name = \"Ann\"; list[3] = \"d\"; --count; __context.write(count + user.name + list.length + list);";
        assert_eq!(
            out(body, json!({"count": 1, "user": {}, "list": ["a"]})),
            "2Ann4a,,,d"
        );
    }

    #[test]
    fn test_update_returns_old_or_new() {
        assert_eq!(out("var i = 5; __context.write(i++); __context.write(++i);", json!({})), "57");
    }

    #[test]
    fn test_filter_calls() {
        assert_eq!(
            out("__context.write(__context.filter(\"h\", v));", json!({"v": "<a>"})),
            "&lt;a&gt;"
        );
        let err = run("__context.write(__context.filter(\"nope\", v));", json!({"v": 1})).unwrap_err();
        assert_eq!(err.kind, ScriptErrorKind::Error);
        assert_eq!(err.message, "no such filter: nope");
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_runtime_errors_carry_lines() {
        let err = run("var a = 1;\n\n__context.write(bad.expr);", json!({})).unwrap_err();
        assert_eq!(err.kind, ScriptErrorKind::Type);
        assert_eq!(err.message, "Cannot read property 'expr' of undefined");
        assert_eq!(err.line, Some(4));

        let err = run("x.y.z = 1;", json!({"x": {}})).unwrap_err();
        assert!(err.message.contains("Cannot set property 'z'"), "{}", err.message);

        let err = run("name.toUpperCase();", json!({"name": "a"})).unwrap_err();
        assert_eq!(err.message, "name.toUpperCase is not a function");
    }

    #[test]
    fn test_context_data_member() {
        assert_eq!(
            out("__context.write(__context.data.title);", json!({"title": "T"})),
            "T"
        );
    }

    #[test]
    fn test_compile_errors_carry_lines() {
        let err = Interpreter
            .compile("function render(__context) {\n__context.write(1);\n__context.write((invalid expression), true);\n}\n")
            .err()
            .unwrap();
        assert_eq!(err.kind, ScriptErrorKind::Syntax);
        assert_eq!(err.line, Some(3));
    }
}
