//! The object model.

use std::{
    cell::RefCell,
    fmt,
    rc::Rc,
    sync::Arc,
};

use itertools::Itertools;
use pyrite_lang::{CodeObject, Constant};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::{
    error::{TraceEntry, Unwind, type_error},
    frame::{Captured, Frame, Globals},
    generator::Generator,
    iter::Iter,
};

pub type Namespace = FxHashMap<SmolStr, Value>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(SmolStr),
    Tuple(Rc<[Value]>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<Dict>>),
    /// A dictionary whose values are all `None`.
    Set(Rc<RefCell<Dict>>),
    /// `start`, `stop`, `step`; `None` when omitted.
    Slice(Rc<[Value; 3]>),
    Function(Rc<Function>),
    Builtin(Rc<Builtin>),
    BoundMethod(Rc<BoundMethod>),
    Class(Rc<Class>),
    Instance(Rc<Instance>),
    Module(Rc<Module>),
    Iterator(Rc<RefCell<Iter>>),
    Generator(Rc<Generator>),
    Super(Rc<Super>),
}

impl Value {
    pub fn from_constant(constant: &Constant) -> Value {
        match constant {
            Constant::None | Constant::Missing => Value::None,
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Int(i) => Value::Int(*i),
            Constant::Float(f) => Value::Float(*f),
            Constant::Str(s) => Value::Str(s.clone()),
            Constant::Tuple(items) => Value::Tuple(items.iter().map(Value::from_constant).collect()),
        }
    }

    pub fn str(s: impl Into<SmolStr>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(items.into())
    }

    pub fn dict(dict: Dict) -> Value {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(dict: Dict) -> Value {
        Value::Set(Rc::new(RefCell::new(dict)))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn type_name(&self) -> SmolStr {
        match self {
            Value::None => SmolStr::new_static("NoneType"),
            Value::Bool(_) => SmolStr::new_static("bool"),
            Value::Int(_) => SmolStr::new_static("int"),
            Value::Float(_) => SmolStr::new_static("float"),
            Value::Str(_) => SmolStr::new_static("str"),
            Value::Tuple(_) => SmolStr::new_static("tuple"),
            Value::List(_) => SmolStr::new_static("list"),
            Value::Dict(_) => SmolStr::new_static("dict"),
            Value::Set(_) => SmolStr::new_static("set"),
            Value::Slice(_) => SmolStr::new_static("slice"),
            Value::Function(_) => SmolStr::new_static("function"),
            Value::Builtin(_) => SmolStr::new_static("builtin_function_or_method"),
            Value::BoundMethod(_) => SmolStr::new_static("method"),
            Value::Class(_) => SmolStr::new_static("type"),
            Value::Instance(i) => i.class.name.clone(),
            Value::Module(_) => SmolStr::new_static("module"),
            Value::Iterator(_) => SmolStr::new_static("iterator"),
            Value::Generator(_) => SmolStr::new_static("generator"),
            Value::Super(_) => SmolStr::new_static("super"),
        }
    }

    /// Truthiness without user-defined `__bool__`/`__len__`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Dict(d) | Value::Set(d) => !d.borrow().is_empty(),
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&SmolStr> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&Rc<Class>> {
        match self {
            Value::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Rc<Instance>> {
        match self {
            Value::Instance(i) => Some(i),
            _ => None,
        }
    }

    /// Identity, as `is` compares.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    fn identity(&self) -> Option<usize> {
        let ptr = match self {
            Value::Tuple(v) => Rc::as_ptr(v) as *const () as usize,
            Value::List(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Dict(v) | Value::Set(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Slice(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Function(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Builtin(v) => Rc::as_ptr(v) as *const () as usize,
            Value::BoundMethod(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Class(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Instance(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Module(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Iterator(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Generator(v) => Rc::as_ptr(v) as *const () as usize,
            Value::Super(v) => Rc::as_ptr(v) as *const () as usize,
            _ => return None,
        };
        Some(ptr)
    }

    /// Hash key; mutable containers are unhashable.
    pub fn key(&self) -> Result<Key, Unwind> {
        Ok(match self {
            Value::None => Key::None,
            Value::Bool(b) => Key::Int(*b as i64),
            Value::Int(i) => Key::Int(*i),
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Key::Int(*f as i64),
            Value::Float(f) => Key::Float(f.to_bits()),
            Value::Str(s) => Key::Str(s.clone()),
            Value::Tuple(items) => Key::Tuple(items.iter().map(Value::key).collect::<Result<_, _>>()?),
            Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Slice(_) => {
                return Err(type_error(format!("unhashable type: '{}'", self.type_name())));
            }
            other => Key::Identity(other.identity().unwrap_or_default()),
        })
    }

    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => quote(s),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", items.iter().map(Value::repr).join(", ")),
            Value::List(items) => format!("[{}]", items.borrow().iter().map(Value::repr).join(", ")),
            Value::Dict(d) => format!(
                "{{{}}}",
                d.borrow().iter().map(|(k, v)| format!("{}: {}", k.repr(), v.repr())).join(", ")
            ),
            Value::Set(d) if d.borrow().is_empty() => "set()".to_string(),
            Value::Set(d) => format!("{{{}}}", d.borrow().iter().map(|(k, _)| k.repr()).join(", ")),
            Value::Instance(i) if i.is_exception() => {
                format!("{}({})", i.class.name, i.args().iter().map(Value::repr).join(", "))
            }
            other => other.to_string(),
        }
    }
}

fn quote(s: &str) -> String {
    let delimiter = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delimiter);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// `str()` form, without user-defined `__str__`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::Str(s) => write!(f, "{s}"),
            Value::Slice(parts) => write!(f, "slice({}, {}, {})", parts[0].repr(), parts[1].repr(), parts[2].repr()),
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::Builtin(b) => write!(f, "<built-in function {}>", b.name),
            Value::BoundMethod(m) => write!(f, "<bound method {} of {}>", m.function, m.receiver.repr()),
            Value::Class(c) => write!(f, "<class '{}'>", c.name),
            Value::Instance(i) if i.is_exception() => {
                let args = i.args();
                match args.as_slice() {
                    [] => Ok(()),
                    [single] => write!(f, "{single}"),
                    many => write!(f, "({})", many.iter().map(Value::repr).join(", ")),
                }
            }
            Value::Instance(i) => write!(f, "<{} object>", i.class.name),
            Value::Module(m) => write!(f, "<module '{}'>", m.name),
            Value::Iterator(_) => write!(f, "<iterator object>"),
            Value::Generator(g) => write!(f, "<generator object {}>", g.name()),
            Value::Super(s) => write!(f, "<super: <class '{}'>>", s.class.name),
            other => write!(f, "{}", other.repr()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

/// Structural equality for builtin values, identity for everything else.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a[..] == b[..],
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Set(a), Value::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|(k, _)| b.contains(k))
            }
            (Value::Float(_), _) | (_, Value::Float(_)) => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => self.as_int() == other.as_int(),
            (Value::BoundMethod(a), Value::BoundMethod(b)) => a.receiver.is(&b.receiver) && a.function.is(&b.function),
            _ => self.is(other),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

/// Hashable projection of a value; numbers that compare equal share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    None,
    Int(i64),
    Float(u64),
    Str(SmolStr),
    Tuple(Vec<Key>),
    Identity(usize),
}

/// Insertion-ordered hash map keyed by [`Key`].
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<Option<(Value, Value)>>,
    index: FxHashMap<Key, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>, Unwind> {
        let key = key.key()?;
        Ok(self.lookup(&key).map(|(_, v)| v.clone()))
    }

    fn lookup(&self, key: &Key) -> Option<&(Value, Value)> {
        self.index.get(key).and_then(|&i| self.entries[i].as_ref())
    }

    pub fn contains(&self, key: &Value) -> bool {
        key.key().is_ok_and(|k| self.index.contains_key(&k))
    }

    /// Keeps the original key object and position when the key exists.
    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), Unwind> {
        let hashed = key.key()?;
        match self.index.get(&hashed) {
            Some(&i) => {
                if let Some(entry) = &mut self.entries[i] {
                    entry.1 = value;
                }
            }
            None => {
                self.index.insert(hashed, self.entries.len());
                self.entries.push(Some((key, value)));
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Result<Option<Value>, Unwind> {
        let hashed = key.key()?;
        let Some(i) = self.index.remove(&hashed) else {
            return Ok(None);
        };
        let removed = self.entries[i].take().map(|(_, v)| v);
        if self.entries.len() > 8 && self.index.len() * 2 < self.entries.len() {
            self.compact();
        }
        Ok(removed)
    }

    fn compact(&mut self) {
        self.entries.retain(Option::is_some);
        for (i, (key, _)) in self.entries.iter().flatten().enumerate() {
            if let Ok(hashed) = key.key() {
                self.index.insert(hashed, i);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().flatten().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<Value> {
        self.iter().map(|(k, v)| Value::tuple(vec![k.clone(), v.clone()])).collect()
    }
}

impl PartialEq for Dict {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.iter().all(|(k, v)| {
                k.key()
                    .ok()
                    .and_then(|key| other.lookup(&key))
                    .is_some_and(|(_, w)| v == w)
            })
    }
}

/// A user function: a code object closed over its defining frame.
pub struct Function {
    pub name: SmolStr,
    pub code: Arc<CodeObject>,
    pub globals: Rc<Globals>,
    pub closure: Vec<Captured>,
    /// Defaults of the trailing positional parameters.
    pub defaults: Vec<Value>,
    pub kw_defaults: Vec<(SmolStr, Value)>,
    pub attrs: RefCell<Namespace>,
}

/// Call arguments after star expansion.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(SmolStr, Value)>,
}

impl Args {
    pub fn positional(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

pub type BuiltinFn = fn(&mut Frame, Args) -> Result<Value, Unwind>;

pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub function: Value,
}

/// Builtin types a class object stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native {
    Object,
    Type,
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    Tuple,
    List,
    Dict,
    Set,
    Exception,
}

pub struct Class {
    pub name: SmolStr,
    pub bases: Vec<Rc<Class>>,
    /// Linearized ancestors, excluding the class itself.
    pub mro: Vec<Rc<Class>>,
    pub dict: RefCell<Namespace>,
    /// Attribute names `__init__` assigns through `self`.
    pub self_attrs: Vec<SmolStr>,
    pub native: Option<Native>,
}

impl Class {
    pub fn new(
        name: SmolStr,
        bases: Vec<Rc<Class>>,
        dict: Namespace,
        self_attrs: Vec<SmolStr>,
        native: Option<Native>,
    ) -> Rc<Class> {
        // Depth-first, keeping the last occurrence of a shared ancestor.
        let mut order: Vec<Rc<Class>> = Vec::new();
        for base in &bases {
            for class in std::iter::once(base).chain(base.mro.iter()) {
                order.retain(|c| !Rc::ptr_eq(c, class));
                order.push(Rc::clone(class));
            }
        }
        Rc::new(Class {
            name,
            bases,
            mro: order,
            dict: RefCell::new(dict),
            self_attrs,
            native,
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.dict.borrow().get(name) {
            return Some(v.clone());
        }
        self.mro.iter().find_map(|c| c.dict.borrow().get(name).cloned())
    }

    /// Lookup in the ancestors that follow `after` in the linearization.
    pub fn lookup_after(&self, after: &Rc<Class>, name: &str) -> Option<Value> {
        let position = self.mro.iter().position(|c| Rc::ptr_eq(c, after));
        let start = match position {
            Some(p) => p + 1,
            None if std::ptr::eq(self, Rc::as_ptr(after)) => 0,
            None => return None,
        };
        self.mro[start..].iter().find_map(|c| c.dict.borrow().get(name).cloned())
    }

    pub fn is_subclass(self: &Rc<Self>, other: &Rc<Class>) -> bool {
        Rc::ptr_eq(self, other) || self.mro.iter().any(|c| Rc::ptr_eq(c, other))
    }

    /// The nearest builtin ancestor type.
    pub fn native_base(&self) -> Option<Native> {
        self.native.or_else(|| self.mro.iter().find_map(|c| c.native))
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub attrs: RefCell<Namespace>,
    /// Filled only for exceptions; outermost frame last.
    pub traceback: RefCell<Vec<TraceEntry>>,
}

impl Instance {
    pub fn new(class: Rc<Class>) -> Rc<Instance> {
        let attrs = FxHashMap::with_capacity_and_hasher(class.self_attrs.len(), Default::default());
        Rc::new(Instance {
            class,
            attrs: RefCell::new(attrs),
            traceback: RefCell::new(Vec::new()),
        })
    }

    pub fn is_exception(&self) -> bool {
        self.class.native_base() == Some(Native::Exception)
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.attrs.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<SmolStr>, value: Value) {
        self.attrs.borrow_mut().insert(name.into(), value);
    }

    /// The `args` tuple of an exception.
    pub fn args(&self) -> Vec<Value> {
        match self.get("args") {
            Some(Value::Tuple(items)) => items.to_vec(),
            _ => Vec::new(),
        }
    }
}

pub struct Module {
    pub name: SmolStr,
    pub globals: Rc<Globals>,
}

/// `super(class, receiver)`: attribute lookup resumes after `class`.
pub struct Super {
    pub class: Rc<Class>,
    pub receiver: Value,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::int_float(Value::Int(1), Value::Float(1.0), true)]
    #[case::bool_int(Value::Bool(true), Value::Int(1), true)]
    #[case::str(Value::str("a"), Value::str("a"), true)]
    #[case::tuple(Value::tuple(vec![1.into(), "x".into()]), Value::tuple(vec![1.into(), "x".into()]), true)]
    #[case::list(Value::list(vec![1.into()]), Value::list(vec![2.into()]), false)]
    #[case::none_zero(Value::None, Value::Int(0), false)]
    fn test_equality(#[case] a: Value, #[case] b: Value, #[case] expected: bool) {
        assert_eq!(a == b, expected);
    }

    #[rstest]
    #[case::float(Value::Float(0.5), "0.5")]
    #[case::whole_float(Value::Float(3.0), "3.0")]
    #[case::str(Value::str("it's"), "\"it's\"")]
    #[case::singleton(Value::tuple(vec![1.into()]), "(1,)")]
    #[case::nested(Value::list(vec![Value::str("a"), Value::None]), "['a', None]")]
    fn test_repr(#[case] value: Value, #[case] expected: &str) {
        assert_eq!(value.repr(), expected);
    }

    #[test]
    fn test_dict_keeps_insertion_order_and_merges_numeric_keys() {
        let mut dict = Dict::new();
        dict.insert("b".into(), 1.into()).unwrap();
        dict.insert(Value::Int(1), "one".into()).unwrap();
        dict.insert(Value::Float(1.0), "uno".into()).unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.keys(), vec![Value::str("b"), Value::Int(1)]);
        assert_eq!(dict.get(&Value::Bool(true)).unwrap(), Some(Value::str("uno")));

        assert_eq!(dict.remove(&"b".into()).unwrap(), Some(Value::Int(1)));
        assert_eq!(dict.keys(), vec![Value::Int(1)]);
    }

    #[test]
    fn test_dict_compacts_after_many_removals() {
        let mut dict = Dict::new();
        for i in 0..20 {
            dict.insert(Value::Int(i), Value::Int(i * 10)).unwrap();
        }
        for i in 0..15 {
            dict.remove(&Value::Int(i)).unwrap();
        }
        assert_eq!(dict.len(), 5);
        assert_eq!(dict.get(&Value::Int(17)).unwrap(), Some(Value::Int(170)));
        assert_eq!(dict.values().len(), 5);
    }

    #[test]
    fn test_lists_are_unhashable() {
        assert!(Value::list(vec![]).key().is_err());
        assert!(Value::tuple(vec![Value::list(vec![])]).key().is_err());
    }

    #[test]
    fn test_mro_keeps_last_occurrence_of_shared_base() {
        let a = Class::new("A".into(), vec![], Namespace::default(), vec![], None);
        let b = Class::new("B".into(), vec![a.clone()], Namespace::default(), vec![], None);
        let c = Class::new("C".into(), vec![a.clone()], Namespace::default(), vec![], None);
        let d = Class::new("D".into(), vec![b.clone(), c.clone()], Namespace::default(), vec![], None);
        let names: Vec<_> = d.mro.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["B", "C", "A"]);
        assert!(d.is_subclass(&a));
        assert!(!a.is_subclass(&d));

        c.dict.borrow_mut().insert("m".into(), Value::Int(3));
        assert_eq!(d.lookup("m"), Some(Value::Int(3)));
        assert_eq!(d.lookup_after(&b, "m"), Some(Value::Int(3)));
        assert_eq!(d.lookup_after(&c, "m"), None);
    }
}
