//! Code execution seam.
//!
//! The kernel does not know the embedded language. It hands cell source to
//! an [`Executor`], which runs it against the runtime and returns the value
//! of the cell (if any). [`LineExecutor`] is a small line-oriented executor
//! that drives the runtime's globals directly.

use embedkern_comm::CommManager;
use embedkern_runtime::{Exception, Object, RuntimeGuard};
use embedkern_wire::{JsonMap, WireCodec};
use serde_json::json;
use tracing::warn;

use crate::magics::MagicRegistry;
use crate::publisher::Publisher;

/// Everything an executor may touch while a request runs.
pub struct ExecutionContext<'a, 'g> {
    pub guard: &'a RuntimeGuard<'g>,
    pub comms: &'a CommManager,
    pub publisher: &'a Publisher,
    /// Magics available to this request.
    pub magics: &'a MagicRegistry,
    /// Header of the request being handled.
    pub parent: &'a JsonMap,
    pub execution_count: u64,
    /// Silent requests publish nothing.
    pub silent: bool,
}

impl ExecutionContext<'_, '_> {
    /// Publish text on a stream (`stdout` or `stderr`).
    pub fn stream(&self, name: &str, text: &str) {
        if self.silent {
            return;
        }
        if let Err(e) = self.publisher.stream(self.parent, name, text) {
            warn!(stream = name, error = %e, "failed to publish stream output");
        }
    }

    /// Publish a rich display bundle.
    pub fn display(&self, data: JsonMap, metadata: JsonMap) {
        if self.silent {
            return;
        }
        if let Err(e) = self.publisher.display_data(self.parent, data, metadata) {
            warn!(error = %e, "failed to publish display data");
        }
    }
}

/// Runs code for the kernel.
///
/// Only [`execute`](Executor::execute) is required. The other requests get
/// empty but well-formed answers by default.
pub trait Executor: Send {
    /// Run `code`, returning the cell's value.
    fn execute(
        &mut self,
        ctx: &ExecutionContext<'_, '_>,
        code: &str,
    ) -> Result<Option<Object>, Exception>;

    fn complete(
        &mut self,
        _ctx: &ExecutionContext<'_, '_>,
        _code: &str,
        cursor_pos: usize,
    ) -> JsonMap {
        object(json!({
            "status": "ok",
            "matches": [],
            "cursor_start": cursor_pos,
            "cursor_end": cursor_pos,
            "metadata": {},
        }))
    }

    fn inspect(
        &mut self,
        _ctx: &ExecutionContext<'_, '_>,
        _code: &str,
        _cursor_pos: usize,
        _detail_level: u8,
    ) -> JsonMap {
        object(json!({"status": "ok", "found": false, "data": {}, "metadata": {}}))
    }

    fn is_complete(&mut self, _code: &str) -> JsonMap {
        object(json!({"status": "unknown"}))
    }

    fn history(&mut self, _request: &JsonMap) -> JsonMap {
        object(json!({"status": "ok", "history": []}))
    }
}

fn object(value: serde_json::Value) -> JsonMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

/// Executes one statement per line.
///
/// A line is either `name = expr` or an expression. Expressions are JSON
/// literals, global names, or calls `name(expr, ...)` of global functions.
/// `print(expr, ...)` writes to stdout. Blank lines and `#` comments are
/// skipped. The cell's value is the value of its last expression line.
#[derive(Debug, Default)]
pub struct LineExecutor {
    codec: WireCodec,
}

impl LineExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn eval(&self, ctx: &ExecutionContext<'_, '_>, expr: &str) -> Result<Object, Exception> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(syntax_error(expr));
        }
        if let Some(open) = expr.find('(') {
            let name = expr[..open].trim();
            if is_identifier(name) {
                let inner = expr[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| syntax_error(expr))?;
                let args = split_args(inner)
                    .ok_or_else(|| syntax_error(expr))?
                    .into_iter()
                    .map(|arg| self.eval(ctx, arg))
                    .collect::<Result<Vec<_>, _>>()?;
                return self.call(ctx, name, &args);
            }
        }
        if is_identifier(expr) {
            return ctx
                .guard
                .get_global(expr)
                .ok_or_else(|| {
                    Exception::new("NameError", format!("name '{}' is not defined", expr))
                });
        }
        let value = self.codec.from_text(expr).map_err(|_| syntax_error(expr))?;
        Ok(self.codec.decode(ctx.guard, &value))
    }

    fn call(
        &self,
        ctx: &ExecutionContext<'_, '_>,
        name: &str,
        args: &[Object],
    ) -> Result<Object, Exception> {
        let Some(value) = ctx.guard.get_global(name) else {
            if name == "print" {
                let text: Vec<String> = args.iter().map(display_text).collect();
                ctx.stream("stdout", &format!("{}\n", text.join(" ")));
                return Ok(Object::None);
            }
            return Err(Exception::new("NameError", format!("name '{}' is not defined", name)));
        };
        let function = value.as_function().ok_or_else(|| {
            Exception::type_error(format!("'{}' object is not callable", value.type_name()))
        })?;
        ctx.guard.call(function, args)
    }
}

impl Executor for LineExecutor {
    fn execute(
        &mut self,
        ctx: &ExecutionContext<'_, '_>,
        code: &str,
    ) -> Result<Option<Object>, Exception> {
        let mut last = None;
        for line in code.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match assignment(line) {
                Some((name, expr)) => {
                    let value = self.eval(ctx, expr)?;
                    ctx.guard.set_global(name, value);
                    last = None;
                }
                None => last = Some(self.eval(ctx, line)?),
            }
        }
        Ok(last.filter(|value| !value.is_none()))
    }

    fn complete(
        &mut self,
        ctx: &ExecutionContext<'_, '_>,
        code: &str,
        cursor_pos: usize,
    ) -> JsonMap {
        let before: String = code.chars().take(cursor_pos).collect();
        let start = before
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_alphanumeric() || *c == '_')
            .last()
            .map_or(before.len(), |(i, _)| i);
        let prefix = &before[start..];
        let matches: Vec<String> = ctx
            .guard
            .global_names()
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .collect();
        let cursor_start = before[..start].chars().count();
        object(json!({
            "status": "ok",
            "matches": matches,
            "cursor_start": cursor_start,
            "cursor_end": cursor_pos,
            "metadata": {},
        }))
    }

    fn inspect(
        &mut self,
        ctx: &ExecutionContext<'_, '_>,
        code: &str,
        cursor_pos: usize,
        _detail_level: u8,
    ) -> JsonMap {
        let chars: Vec<char> = code.chars().collect();
        let is_word = |c: &char| c.is_alphanumeric() || *c == '_';
        let cursor = cursor_pos.min(chars.len());
        let start = chars[..cursor]
            .iter()
            .rposition(|c| !is_word(c))
            .map_or(0, |i| i + 1);
        let end = chars[cursor..]
            .iter()
            .position(|c| !is_word(c))
            .map_or(chars.len(), |i| cursor + i);
        let name: String = chars[start..end].iter().collect();

        match ctx.guard.get_global(&name) {
            Some(value) => object(json!({
                "status": "ok",
                "found": true,
                "data": {"text/plain": format!("{}: {}", value.type_name(), value.repr())},
                "metadata": {},
            })),
            None => object(json!({"status": "ok", "found": false, "data": {}, "metadata": {}})),
        }
    }

    fn is_complete(&mut self, code: &str) -> JsonMap {
        match bracket_depth(code) {
            Some(0) => object(json!({"status": "complete"})),
            Some(_) => object(json!({"status": "incomplete", "indent": ""})),
            None => object(json!({"status": "invalid"})),
        }
    }
}

fn syntax_error(expr: &str) -> Exception {
    Exception::new("SyntaxError", format!("invalid syntax: {}", expr))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Split `name = expr`, leaving `==` and `=` inside calls alone.
fn assignment(line: &str) -> Option<(&str, &str)> {
    let (name, expr) = line.split_once('=')?;
    let name = name.trim();
    if !is_identifier(name) || expr.starts_with('=') {
        return None;
    }
    Some((name, expr))
}

/// Split call arguments on top-level commas.
fn split_args(inner: &str) -> Option<Vec<&str>> {
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                args.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 || in_string {
        return None;
    }
    args.push(&inner[start..]);
    Some(args)
}

/// Net open brackets in `code`, or `None` if a bracket closes too early.
fn bracket_depth(code: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for c in code.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.checked_sub(1)?,
            _ => {}
        }
    }
    Some(if in_string { depth + 1 } else { depth })
}

fn display_text(value: &Object) -> String {
    match value {
        Object::Str(s) => s.clone(),
        other => other.repr(),
    }
}
