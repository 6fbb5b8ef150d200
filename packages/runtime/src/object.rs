//! The Object type - the embedded runtime's native value.
//!
//! Objects look like a JSON tree at first glance, but containers are shared
//! and mutable: two names can refer to the same list, and a list can contain
//! itself. Anything that walks an Object graph has to cope with that.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::function::Function;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A value living inside the embedded runtime.
///
/// # Design Notes
///
/// - `List` and `Dict` are reference types. Cloning an `Object::List` clones
///   the reference, not the elements.
/// - `Dict` keys are strings and iterate in sorted order.
/// - `Bytes` is immutable binary data and is never text-decoded.
/// - `Handle` wraps a host value the runtime can pass around but not inspect.
#[derive(Clone, Default)]
pub enum Object {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
    List(List),
    Dict(Dict),
    Function(Function),
    Handle(Handle),
}

/// A shared, mutable sequence of objects.
#[derive(Clone, Default)]
pub struct List(Arc<Mutex<Vec<Object>>>);

impl List {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Object>) -> Self {
        Self(Arc::new(Mutex::new(items)))
    }

    pub fn push(&self, item: impl Into<Object>) {
        lock(&self.0).push(item.into());
    }

    pub fn get(&self, index: usize) -> Option<Object> {
        lock(&self.0).get(index).cloned()
    }

    /// Replace the element at `index`, returning the previous one.
    ///
    /// Returns `None` (and stores nothing) when `index` is out of range.
    pub fn set(&self, index: usize, item: impl Into<Object>) -> Option<Object> {
        let mut items = lock(&self.0);
        let slot = items.get_mut(index)?;
        Some(std::mem::replace(slot, item.into()))
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    /// Copy out the current elements.
    ///
    /// The copy shares nested containers with the list. Walk the snapshot
    /// instead of holding the list locked while recursing.
    pub fn snapshot(&self) -> Vec<Object> {
        lock(&self.0).clone()
    }

    /// Identity of the underlying container.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &List) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Vec<Object>> for List {
    fn from(items: Vec<Object>) -> Self {
        List::from_vec(items)
    }
}

/// A shared, mutable mapping from string keys to objects.
#[derive(Clone, Default)]
pub struct Dict(Arc<Mutex<BTreeMap<String, Object>>>);

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, Object>) -> Self {
        Self(Arc::new(Mutex::new(map)))
    }

    /// Insert a value, returning the one previously stored under `key`.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Object>) -> Option<Object> {
        lock(&self.0).insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<Object> {
        lock(&self.0).get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Object> {
        lock(&self.0).remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        lock(&self.0).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.0).is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.0).keys().cloned().collect()
    }

    /// Copy out the current entries in key order. See [`List::snapshot`].
    pub fn snapshot(&self) -> Vec<(String, Object)> {
        lock(&self.0)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Identity of the underlying container.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Dict) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<K: Into<String>, V: Into<Object>> FromIterator<(K, V)> for Dict {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Dict::from_map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// An opaque reference to a host value.
///
/// Runtime code can store and pass handles around; only host code that knows
/// the concrete type can look inside via [`Handle::downcast_ref`].
#[derive(Clone)]
pub struct Handle {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

impl Handle {
    pub fn new<T: Any + Send + Sync>(type_name: &'static str, value: T) -> Self {
        Self {
            type_name,
            value: Arc::new(value),
        }
    }

    /// The runtime-visible type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Handle) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.value) as *const (),
            Arc::as_ptr(&other.value) as *const (),
        )
    }
}

impl Object {
    /// Create an empty dict.
    pub fn dict() -> Self {
        Object::Dict(Dict::new())
    }

    /// Create an empty list.
    pub fn list() -> Self {
        Object::List(List::new())
    }

    /// Wrap a host value in a handle.
    pub fn handle<T: Any + Send + Sync>(type_name: &'static str, value: T) -> Self {
        Object::Handle(Handle::new(type_name, value))
    }

    /// The runtime-visible type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::None => "NoneType",
            Object::Bool(_) => "bool",
            Object::Int(_) => "int",
            Object::Float(_) => "float",
            Object::Str(_) => "str",
            Object::Bytes(_) => "bytes",
            Object::List(_) => "list",
            Object::Dict(_) => "dict",
            Object::Function(_) => "function",
            Object::Handle(h) => h.type_name(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Object::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Object::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric value as a float; ints are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Object::Float(f) => Some(*f),
            Object::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Object::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Object::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Object::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Object::Handle(h) => Some(h),
            _ => None,
        }
    }

    /// Look up `key` if this is a dict.
    pub fn get_item(&self, key: &str) -> Option<Object> {
        self.as_dict()?.get(key)
    }

    /// A printable representation, safe on self-referencing containers.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        let mut active = Vec::new();
        self.write_repr(&mut out, &mut active);
        out
    }

    fn write_repr(&self, out: &mut String, active: &mut Vec<usize>) {
        match self {
            Object::None => out.push_str("None"),
            Object::Bool(true) => out.push_str("True"),
            Object::Bool(false) => out.push_str("False"),
            Object::Int(i) => out.push_str(&i.to_string()),
            Object::Float(f) => out.push_str(&float_repr(*f)),
            Object::Str(s) => write_quoted(out, s),
            Object::Bytes(b) => write_bytes(out, b),
            Object::List(list) => {
                if active.contains(&list.id()) {
                    out.push_str("[...]");
                    return;
                }
                active.push(list.id());
                out.push('[');
                for (i, item) in list.snapshot().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out, active);
                }
                out.push(']');
                active.pop();
            }
            Object::Dict(dict) => {
                if active.contains(&dict.id()) {
                    out.push_str("{...}");
                    return;
                }
                active.push(dict.id());
                out.push('{');
                for (i, (key, value)) in dict.snapshot().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_quoted(out, key);
                    out.push_str(": ");
                    value.write_repr(out, active);
                }
                out.push('}');
                active.pop();
            }
            Object::Function(f) => out.push_str(&format!("<function {}>", f.name())),
            Object::Handle(h) => out.push_str(&format!("<{} object>", h.type_name())),
        }
    }
}

fn float_repr(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f == f64::INFINITY {
        "inf".to_string()
    } else if f == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{:?}", f)
    }
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
}

fn write_bytes(out: &mut String, bytes: &[u8]) {
    out.push_str("b'");
    for &b in bytes {
        match b {
            b'\'' => out.push_str("\\'"),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push('\'');
}

/// Structural equality.
///
/// Containers compare by content (identical containers short-circuit),
/// functions and handles by identity. `Int(1)` and `Float(1.0)` are distinct.
impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::None, Object::None) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a == b,
            (Object::Str(a), Object::Str(b)) => a == b,
            (Object::Bytes(a), Object::Bytes(b)) => a == b,
            (Object::List(a), Object::List(b)) => a.ptr_eq(b) || a.snapshot() == b.snapshot(),
            (Object::Dict(a), Object::Dict(b)) => a.ptr_eq(b) || a.snapshot() == b.snapshot(),
            (Object::Function(a), Object::Function(b)) => a.ptr_eq(b),
            (Object::Handle(a), Object::Handle(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

/// `str()`-style formatting: strings print bare, everything else as `repr`.
impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Str(s) => f.write_str(s),
            other => f.write_str(&other.repr()),
        }
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Object::List(self.clone()).repr())
    }
}

impl fmt::Debug for Dict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Object::Dict(self.clone()).repr())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object>", self.type_name)
    }
}

// Conversion from common types

impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Object::Bool(v)
    }
}

impl From<i64> for Object {
    fn from(v: i64) -> Self {
        Object::Int(v)
    }
}

impl From<i32> for Object {
    fn from(v: i32) -> Self {
        Object::Int(v as i64)
    }
}

impl From<f64> for Object {
    fn from(v: f64) -> Self {
        Object::Float(v)
    }
}

impl From<String> for Object {
    fn from(v: String) -> Self {
        Object::Str(v)
    }
}

impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Object::Str(v.to_string())
    }
}

impl From<Bytes> for Object {
    fn from(v: Bytes) -> Self {
        Object::Bytes(v)
    }
}

impl From<Vec<u8>> for Object {
    fn from(v: Vec<u8>) -> Self {
        Object::Bytes(Bytes::from(v))
    }
}

impl From<Vec<Object>> for Object {
    fn from(v: Vec<Object>) -> Self {
        Object::List(List::from_vec(v))
    }
}

impl From<List> for Object {
    fn from(v: List) -> Self {
        Object::List(v)
    }
}

impl From<Dict> for Object {
    fn from(v: Dict) -> Self {
        Object::Dict(v)
    }
}

impl From<Function> for Object {
    fn from(v: Function) -> Self {
        Object::Function(v)
    }
}

impl From<Handle> for Object {
    fn from(v: Handle) -> Self {
        Object::Handle(v)
    }
}

impl<T: Into<Object>> From<Option<T>> for Object {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collection_literals::btree;

    #[test]
    fn dict_insert_get_remove() {
        let dict = Dict::new();
        assert!(dict.insert("n", 1).is_none());
        assert_eq!(dict.insert("n", 2), Some(Object::Int(1)));
        assert_eq!(dict.get("n"), Some(Object::Int(2)));
        assert!(dict.contains_key("n"));
        assert_eq!(dict.remove("n"), Some(Object::Int(2)));
        assert!(dict.is_empty());
    }

    #[test]
    fn list_is_shared_between_clones() {
        let list = List::new();
        let alias = Object::List(list.clone());
        list.push("a");
        assert_eq!(alias.as_list().map(List::len), Some(1));
        assert_eq!(list.set(0, "b"), Some(Object::from("a")));
        assert_eq!(list.set(5, "c"), None);
        assert_eq!(list.get(0), Some(Object::from("b")));
    }

    #[test]
    fn structural_equality() {
        let a = Object::Dict(Dict::from_map(btree! {
            "items".to_string() => Object::from(vec![Object::Int(1), Object::from("two")]),
            "flag".to_string() => Object::Bool(true),
        }));
        let b: Dict = [
            ("flag", Object::Bool(true)),
            (
                "items",
                Object::from(vec![Object::Int(1), Object::from("two")]),
            ),
        ]
        .into_iter()
        .collect();
        assert_eq!(a, Object::Dict(b));
        assert_ne!(Object::Int(1), Object::Float(1.0));
        assert_ne!(Object::Float(f64::NAN), Object::Float(f64::NAN));
    }

    #[test]
    fn handles_compare_by_identity() {
        let h = Handle::new("Widget", 7u32);
        let same = Object::Handle(h.clone());
        let other = Object::handle("Widget", 7u32);
        assert_eq!(Object::Handle(h.clone()), same);
        assert_ne!(Object::Handle(h.clone()), other);
        assert_eq!(h.downcast_ref::<u32>(), Some(&7));
        assert_eq!(h.downcast_ref::<String>(), None);
        assert_eq!(other.type_name(), "Widget");
    }

    #[test]
    fn repr_of_scalars() {
        assert_eq!(Object::None.repr(), "None");
        assert_eq!(Object::Bool(false).repr(), "False");
        assert_eq!(Object::Float(1.0).repr(), "1.0");
        assert_eq!(Object::Float(f64::NEG_INFINITY).repr(), "-inf");
        assert_eq!(Object::from("it's").repr(), "'it\\'s'");
        assert_eq!(Object::from(vec![0u8, b'a', 0xff]).repr(), "b'\\x00a\\xff'");
    }

    #[test]
    fn repr_survives_cycles() {
        let list = List::new();
        list.push(1);
        list.push(Object::List(list.clone()));
        assert_eq!(Object::List(list.clone()).repr(), "[1, [...]]");

        let dict = Dict::new();
        dict.insert("self", Object::Dict(dict.clone()));
        assert_eq!(Object::Dict(dict).repr(), "{'self': {...}}");
    }

    #[test]
    fn display_leaves_strings_bare() {
        assert_eq!(Object::from("hi").to_string(), "hi");
        assert_eq!(Object::from(vec![Object::from("hi")]).to_string(), "['hi']");
    }

    #[test]
    fn option_converts_to_none() {
        assert_eq!(Object::from(None::<i64>), Object::None);
        assert_eq!(Object::from(Some(3)), Object::Int(3));
    }
}
