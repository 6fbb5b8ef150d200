//! Line and cell magics.
//!
//! A cell whose first line starts with `%%name` is handed whole to the cell
//! magic `name`. A single-line cell `%name args` runs the line magic `name`.
//!
//! Built-in line magics:
//! - `%lsmagic` / `%magic` - List available magics
//! - `%who` - List non-function globals
//! - `%comms` - List open comms and their targets
//! - `%pwd` - Print the working directory
//! - `%cd <dir>` - Change the working directory
//! - `%env [NAME]` - Show the environment, or one variable
//! - `%set_env NAME VALUE` - Set an environment variable
//!
//! Built-in cell magics:
//! - `%%writefile <path>` - Write the cell body to a file

use std::collections::BTreeMap;
use std::fmt;

use embedkern_runtime::{Exception, Object};
use thiserror::Error;

use crate::executor::ExecutionContext;

pub type LineMagic = fn(&ExecutionContext<'_, '_>, &str) -> Result<Option<Object>, MagicError>;
pub type CellMagic =
    fn(&ExecutionContext<'_, '_>, &str, &str) -> Result<Option<Object>, MagicError>;

#[derive(Clone, Copy)]
pub enum Magic {
    Line(LineMagic),
    Cell(CellMagic),
}

#[derive(Debug, Error)]
pub enum MagicError {
    #[error("Line magic function `%{0}` not found.")]
    LineNotFound(String),

    #[error("Cell magic `%%{0}` not found.")]
    CellNotFound(String),

    /// Bad arguments.
    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl From<MagicError> for Exception {
    fn from(error: MagicError) -> Self {
        let name = match &error {
            MagicError::Io(_) => "OSError",
            _ => "UsageError",
        };
        Exception::new(name, error.to_string())
    }
}

/// A parsed magic invocation.
#[derive(Debug, PartialEq, Eq)]
pub enum Invocation<'a> {
    Line { name: &'a str, args: &'a str },
    Cell { name: &'a str, args: &'a str, body: &'a str },
}

impl<'a> Invocation<'a> {
    /// Recognize a magic cell. Anything else is ordinary code.
    pub fn parse(code: &'a str) -> Option<Self> {
        let code = code.trim_start();
        if let Some(rest) = code.strip_prefix("%%") {
            let (first, body) = rest.split_once('\n').unwrap_or((rest, ""));
            let (name, args) = split_name(first);
            return Some(Invocation::Cell { name, args, body });
        }
        let rest = code.trim_end().strip_prefix('%')?;
        if rest.contains('\n') {
            return None;
        }
        let (name, args) = split_name(rest);
        Some(Invocation::Line { name, args })
    }
}

fn split_name(line: &str) -> (&str, &str) {
    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (line, ""),
    }
}

/// Named magics.
#[derive(Default)]
pub struct MagicRegistry {
    line: BTreeMap<String, LineMagic>,
    cell: BTreeMap<String, CellMagic>,
}

impl MagicRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in magics.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("lsmagic", Magic::Line(lsmagic));
        registry.register("magic", Magic::Line(lsmagic));
        registry.register("who", Magic::Line(who));
        registry.register("comms", Magic::Line(comms));
        registry.register("pwd", Magic::Line(pwd));
        registry.register("cd", Magic::Line(cd));
        registry.register("env", Magic::Line(env));
        registry.register("set_env", Magic::Line(set_env));
        registry.register("writefile", Magic::Cell(writefile));
        registry
    }

    /// Add or replace a magic.
    pub fn register(&mut self, name: impl Into<String>, magic: Magic) {
        match magic {
            Magic::Line(f) => {
                self.line.insert(name.into(), f);
            }
            Magic::Cell(f) => {
                self.cell.insert(name.into(), f);
            }
        }
    }

    pub fn line_names(&self) -> impl Iterator<Item = &str> {
        self.line.keys().map(String::as_str)
    }

    pub fn cell_names(&self) -> impl Iterator<Item = &str> {
        self.cell.keys().map(String::as_str)
    }

    /// Run a parsed invocation.
    pub fn run(
        &self,
        ctx: &ExecutionContext<'_, '_>,
        invocation: &Invocation<'_>,
    ) -> Result<Option<Object>, MagicError> {
        match *invocation {
            Invocation::Line { name, args } => {
                let magic = self
                    .line
                    .get(name)
                    .ok_or_else(|| MagicError::LineNotFound(name.to_string()))?;
                magic(ctx, args)
            }
            Invocation::Cell { name, args, body } => {
                let magic = self
                    .cell
                    .get(name)
                    .ok_or_else(|| MagicError::CellNotFound(name.to_string()))?;
                magic(ctx, args, body)
            }
        }
    }

    /// The `%lsmagic` listing.
    pub fn listing(&self) -> String {
        let line: Vec<String> = self.line_names().map(|n| format!("%{}", n)).collect();
        let cell: Vec<String> = self.cell_names().map(|n| format!("%%{}", n)).collect();
        format!(
            "Available line magics:\n{}\n\nAvailable cell magics:\n{}\n",
            line.join("  "),
            cell.join("  ")
        )
    }
}

impl fmt::Debug for MagicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MagicRegistry")
            .field("line", &self.line.keys().collect::<Vec<_>>())
            .field("cell", &self.cell.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn lsmagic(ctx: &ExecutionContext<'_, '_>, _: &str) -> Result<Option<Object>, MagicError> {
    ctx.stream("stdout", &ctx.magics.listing());
    Ok(None)
}

fn who(ctx: &ExecutionContext<'_, '_>, _: &str) -> Result<Option<Object>, MagicError> {
    let names: Vec<String> = ctx
        .guard
        .global_names()
        .into_iter()
        .filter(|name| {
            ctx.guard
                .get_global(name)
                .is_some_and(|value| value.as_function().is_none())
        })
        .collect();
    if names.is_empty() {
        ctx.stream("stdout", "Interactive namespace is empty.\n");
    } else {
        ctx.stream("stdout", &format!("{}\n", names.join("\t")));
    }
    Ok(None)
}

fn comms(ctx: &ExecutionContext<'_, '_>, args: &str) -> Result<Option<Object>, MagicError> {
    let target = Some(args).filter(|a| !a.is_empty());
    let info: embedkern_runtime::Dict = ctx
        .comms
        .comm_info(target)
        .into_iter()
        .map(|(id, target_name)| (id.to_string(), target_name))
        .collect();
    Ok(Some(Object::Dict(info)))
}

fn pwd(_: &ExecutionContext<'_, '_>, _: &str) -> Result<Option<Object>, MagicError> {
    let dir = std::env::current_dir()?;
    Ok(Some(Object::from(dir.display().to_string())))
}

fn cd(ctx: &ExecutionContext<'_, '_>, args: &str) -> Result<Option<Object>, MagicError> {
    if args.is_empty() {
        return Err(MagicError::Usage("%cd needs a directory".to_string()));
    }
    std::env::set_current_dir(args)?;
    let dir = std::env::current_dir()?;
    ctx.stream("stdout", &format!("{}\n", dir.display()));
    Ok(None)
}

fn env(_: &ExecutionContext<'_, '_>, args: &str) -> Result<Option<Object>, MagicError> {
    if args.is_empty() {
        let vars: embedkern_runtime::Dict = std::env::vars().collect();
        return Ok(Some(Object::Dict(vars)));
    }
    std::env::var(args)
        .map(|value| Some(Object::from(value)))
        .map_err(|_| MagicError::Usage(format!("Environment does not have key: {}", args)))
}

fn set_env(_: &ExecutionContext<'_, '_>, args: &str) -> Result<Option<Object>, MagicError> {
    let (name, value) = args
        .split_once(char::is_whitespace)
        .or_else(|| args.split_once('='))
        .ok_or_else(|| MagicError::Usage("usage: %set_env NAME VALUE".to_string()))?;
    std::env::set_var(name.trim(), value.trim());
    Ok(None)
}

fn writefile(
    ctx: &ExecutionContext<'_, '_>,
    args: &str,
    body: &str,
) -> Result<Option<Object>, MagicError> {
    if args.is_empty() {
        return Err(MagicError::Usage("%%writefile needs a path".to_string()));
    }
    let existed = std::path::Path::new(args).exists();
    std::fs::write(args, body)?;
    let verb = if existed { "Overwriting" } else { "Writing" };
    ctx.stream("stdout", &format!("{} {}\n", verb, args));
    Ok(None)
}
