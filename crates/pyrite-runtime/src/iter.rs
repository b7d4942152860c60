//! Iterator objects behind `for` loops, unpacking and the iteration builtins.

use std::{cell::RefCell, rc::Rc};

use crate::{
    builtins,
    call::{call, call_method},
    error::{ErrorKind, Unwind, type_error},
    frame::Frame,
    generator::Generator,
    value::{Args, Value},
};

enum Source {
    /// Reads the list live, so appends during iteration are seen.
    List { list: Rc<RefCell<Vec<Value>>>, index: usize },
    Items { items: Rc<[Value]>, index: usize },
    Range { next: i64, stop: i64, step: i64 },
    Generator(Rc<Generator>),
    /// A user object implementing `__next__`.
    Object(Value),
    Exhausted,
}

/// Iteration state plus the item produced by the last successful advance.
pub struct Iter {
    source: Source,
    current: Option<Value>,
}

enum Step {
    Ready(Option<Value>),
    Generator(Rc<Generator>),
    Object(Value),
}

impl Iter {
    fn new(source: Source) -> Rc<RefCell<Iter>> {
        Rc::new(RefCell::new(Iter { source, current: None }))
    }

    pub fn over(items: Vec<Value>) -> Rc<RefCell<Iter>> {
        Iter::new(Source::Items {
            items: items.into(),
            index: 0,
        })
    }

    pub fn range(start: i64, stop: i64, step: i64) -> Rc<RefCell<Iter>> {
        Iter::new(Source::Range { next: start, stop, step })
    }

    pub fn current(&self) -> Option<Value> {
        self.current.clone()
    }

    /// Items left without running user code, when that is knowable.
    pub fn remaining(&self) -> Option<usize> {
        match &self.source {
            Source::List { list, index } => Some(list.borrow().len().saturating_sub(*index)),
            Source::Items { items, index } => Some(items.len().saturating_sub(*index)),
            Source::Range { next, stop, step } => {
                let span = if *step > 0 { stop - next } else { next - stop };
                Some(if span <= 0 { 0 } else { ((span - 1) / step.abs() + 1) as usize })
            }
            Source::Exhausted => Some(0),
            Source::Generator(_) | Source::Object(_) => None,
        }
    }

    fn step(&mut self) -> Step {
        match &mut self.source {
            Source::List { list, index } => {
                let item = list.borrow().get(*index).cloned();
                *index += 1;
                Step::Ready(item)
            }
            Source::Items { items, index } => {
                let item = items.get(*index).cloned();
                *index += 1;
                Step::Ready(item)
            }
            Source::Range { next, stop, step } => {
                let more = if *step > 0 { *next < *stop } else { *next > *stop };
                if !more {
                    return Step::Ready(None);
                }
                let item = *next;
                *next = next.saturating_add(*step);
                Step::Ready(Some(Value::Int(item)))
            }
            Source::Generator(g) => Step::Generator(Rc::clone(g)),
            Source::Object(o) => Step::Object(o.clone()),
            Source::Exhausted => Step::Ready(None),
        }
    }

    fn disposable(&self) -> Option<Value> {
        match &self.source {
            Source::Object(o @ Value::Instance(i)) if i.class.lookup("close").is_some() => Some(o.clone()),
            _ => None,
        }
    }
}

/// The iterator for `value`, as `iter()` and `for` acquire it.
pub fn iterate(frame: &mut Frame, value: &Value) -> Result<Rc<RefCell<Iter>>, Unwind> {
    let source = match value {
        Value::Iterator(it) => return Ok(Rc::clone(it)),
        Value::List(list) => Source::List {
            list: Rc::clone(list),
            index: 0,
        },
        Value::Tuple(items) => Source::Items {
            items: Rc::clone(items),
            index: 0,
        },
        Value::Str(s) => Source::Items {
            items: s.chars().map(|c| Value::Str(c.to_string().into())).collect(),
            index: 0,
        },
        Value::Dict(d) | Value::Set(d) => Source::Items {
            items: d.borrow().keys().into(),
            index: 0,
        },
        Value::Generator(g) => Source::Generator(Rc::clone(g)),
        Value::Instance(instance) => {
            if instance.class.lookup("__iter__").is_some() {
                let iterator = call_method(frame, value, "__iter__", Vec::new())?;
                return match iterator {
                    Some(result @ (Value::Iterator(_) | Value::Generator(_) | Value::List(_) | Value::Tuple(_))) => {
                        iterate(frame, &result)
                    }
                    Some(result @ Value::Instance(_)) => Ok(Iter::new(Source::Object(result))),
                    Some(other) => Err(type_error(format!(
                        "iter() returned non-iterator of type '{}'",
                        other.type_name()
                    ))),
                    None => Err(not_iterable(value)),
                };
            }
            if instance.class.lookup("__next__").is_some() {
                Source::Object(value.clone())
            } else {
                return Err(not_iterable(value));
            }
        }
        other => return Err(not_iterable(other)),
    };
    Ok(Iter::new(source))
}

fn not_iterable(value: &Value) -> Unwind {
    type_error(format!("'{}' object is not iterable", value.type_name()))
}

/// Advances the iterator; `Ok(false)` once exhausted.
pub fn move_next(frame: &mut Frame, iterator: &Rc<RefCell<Iter>>) -> Result<bool, Unwind> {
    let step = iterator.borrow_mut().step();
    let next = match step {
        Step::Ready(item) => item,
        Step::Generator(generator) => generator.resume(Value::None, None)?,
        Step::Object(object) => match call_method(frame, &object, "__next__", Vec::new()) {
            Ok(item) => item,
            Err(Unwind::Exception(e)) if builtins::is_instance_of(&e, ErrorKind::StopIteration) => None,
            Err(e) => return Err(e),
        },
    };
    let mut iterator = iterator.borrow_mut();
    if next.is_none() {
        iterator.source = Source::Exhausted;
    }
    let advanced = next.is_some();
    iterator.current = next;
    Ok(advanced)
}

pub fn next_item(frame: &mut Frame, iterator: &Rc<RefCell<Iter>>) -> Result<Option<Value>, Unwind> {
    Ok(if move_next(frame, iterator)? {
        iterator.borrow().current()
    } else {
        None
    })
}

/// Every remaining item of an iterable.
pub fn collect(frame: &mut Frame, value: &Value) -> Result<Vec<Value>, Unwind> {
    match value {
        Value::List(list) => return Ok(list.borrow().clone()),
        Value::Tuple(items) => return Ok(items.to_vec()),
        _ => {}
    }
    let iterator = iterate(frame, value)?;
    let mut out = Vec::with_capacity(iterator.borrow().remaining().unwrap_or_default());
    while let Some(item) = next_item(frame, &iterator)? {
        out.push(item);
    }
    Ok(out)
}

pub fn needs_disposal(iterator: &Rc<RefCell<Iter>>) -> bool {
    iterator.borrow().disposable().is_some()
}

pub fn dispose(frame: &mut Frame, iterator: &Rc<RefCell<Iter>>) -> Result<(), Unwind> {
    let disposable = iterator.borrow().disposable();
    if let Some(object) = disposable {
        let close = crate::ops::get_attr(frame, &object, "close")?;
        call(frame, &close, Args::default())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::up(0, 5, 2, 3)]
    #[case::down(5, 0, -1, 5)]
    #[case::empty(3, 3, 1, 0)]
    #[case::wrong_direction(0, 4, -1, 0)]
    fn test_range_remaining(#[case] start: i64, #[case] stop: i64, #[case] step: i64, #[case] expected: usize) {
        assert_eq!(Iter::range(start, stop, step).borrow().remaining(), Some(expected));
    }

    #[test]
    fn test_range_steps() {
        let range = Iter::range(1, 7, 3);
        let mut items = Vec::new();
        while let Step::Ready(Some(v)) = range.borrow_mut().step() {
            items.push(v);
        }
        assert_eq!(items, vec![Value::Int(1), Value::Int(4)]);
    }
}
