//! Generator objects: a suspended frame driven through the resumption table
//! of its code object.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use pyrite_lang::ir::YieldId;
use smol_str::SmolStr;

use crate::{
    builtins,
    error::{ErrorKind, Unwind, raise, type_error},
    frame::Frame,
    value::Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    NotStarted,
    Suspended(YieldId),
    Running,
    Completed,
    Faulted,
}

pub struct Generator {
    name: SmolStr,
    state: Cell<GeneratorState>,
    frame: RefCell<Option<Frame>>,
}

impl Generator {
    pub(crate) fn new(frame: Frame) -> Rc<Generator> {
        Rc::new(Generator {
            name: frame.code.name.clone(),
            state: Cell::new(GeneratorState::NotStarted),
            frame: RefCell::new(Some(frame)),
        })
    }

    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    pub fn state(&self) -> GeneratorState {
        self.state.get()
    }

    /// Runs the body until the next suspension; `Ok(None)` once it returns.
    ///
    /// `injected` is raised at the suspension point instead of producing
    /// `sent`.
    pub fn resume(&self, sent: Value, injected: Option<Value>) -> Result<Option<Value>, Unwind> {
        let state = self.state.get();
        match state {
            GeneratorState::Running => return Err(raise(ErrorKind::ValueError, "generator already executing")),
            GeneratorState::Completed | GeneratorState::Faulted => {
                return match injected {
                    Some(exception) => Err(Unwind::Exception(exception)),
                    None => Ok(None),
                };
            }
            GeneratorState::NotStarted => {
                if let Some(exception) = injected {
                    self.finish(GeneratorState::Completed);
                    return Err(Unwind::Exception(exception));
                }
                if !sent.is_none() {
                    return Err(type_error("can't send non-None value to a just-started generator"));
                }
            }
            GeneratorState::Suspended(_) => {}
        }

        let Some(mut frame) = self.frame.borrow_mut().take() else {
            return Err(raise(ErrorKind::SystemError, "generator frame missing"));
        };
        if let GeneratorState::Suspended(id) = state {
            if let Err(e) = frame.start_resume(id) {
                self.state.set(GeneratorState::Faulted);
                return Err(e);
            }
            frame.sent = Some(sent);
            frame.injected = injected;
        }

        self.state.set(GeneratorState::Running);
        let rt = Rc::clone(&frame.rt);
        let outcome = rt.enter().and_then(|_depth| {
            let delegate = frame.code.compiled(&*rt.compiler);
            delegate.run(&mut frame)
        });
        match outcome {
            Err(Unwind::Suspend { id, value }) => {
                tracing::trace!(generator = %self.name, yield_id = id, "suspended");
                self.state.set(GeneratorState::Suspended(id));
                *self.frame.borrow_mut() = Some(frame);
                Ok(Some(value))
            }
            Ok(_) | Err(Unwind::Return(_)) => {
                self.finish(GeneratorState::Completed);
                Ok(None)
            }
            Err(Unwind::Exception(exception)) => {
                frame.record_traceback(&exception);
                self.finish(GeneratorState::Faulted);
                Err(Unwind::Exception(exception))
            }
            Err(Unwind::Break(_) | Unwind::Continue(_)) => {
                self.finish(GeneratorState::Faulted);
                Err(raise(ErrorKind::SystemError, "loop exit escaped a generator body"))
            }
        }
    }

    fn finish(&self, state: GeneratorState) {
        self.state.set(state);
        self.frame.borrow_mut().take();
    }

    /// `next(g)`: raises `StopIteration` once the body has returned.
    pub fn next(&self) -> Result<Value, Unwind> {
        self.send(Value::None)
    }

    pub fn send(&self, value: Value) -> Result<Value, Unwind> {
        self.resume(value, None)?
            .ok_or_else(|| raise(ErrorKind::StopIteration, ""))
    }

    pub fn throw(&self, exception: Value) -> Result<Value, Unwind> {
        self.resume(Value::None, Some(exception))?
            .ok_or_else(|| raise(ErrorKind::StopIteration, ""))
    }

    /// Raises `GeneratorExit` inside a suspended body so its `finally`
    /// blocks run.
    pub fn close(&self) -> Result<(), Unwind> {
        match self.state.get() {
            GeneratorState::NotStarted => {
                self.finish(GeneratorState::Completed);
                Ok(())
            }
            GeneratorState::Suspended(_) => {
                let exit = builtins::new_exception(ErrorKind::GeneratorExit, String::new());
                match self.resume(Value::None, Some(exit)) {
                    Ok(Some(_)) => Err(raise(ErrorKind::RuntimeError, "generator ignored GeneratorExit")),
                    Ok(None) => Ok(()),
                    Err(Unwind::Exception(e))
                        if builtins::is_instance_of(&e, ErrorKind::GeneratorExit)
                            || builtins::is_instance_of(&e, ErrorKind::StopIteration) =>
                    {
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            _ => Ok(()),
        }
    }
}
