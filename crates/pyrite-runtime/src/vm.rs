//! The light tier: a stack machine over [`LightCode`].

use std::rc::Rc;

use pyrite_lang::{
    ir::ArgKind,
    light::{Instruction, LightCode},
};
use smallvec::SmallVec;

use crate::{
    call,
    error::{ErrorKind, Unwind, raise},
    frame::Frame,
    ops,
    value::{Args, Value},
};

type Stack = SmallVec<[Value; 16]>;

fn pop(stack: &mut Stack) -> Value {
    stack.pop().unwrap_or_default()
}

fn pop_n(stack: &mut Stack, n: usize) -> SmallVec<[Value; 4]> {
    let at = stack.len().saturating_sub(n);
    stack.drain(at..).collect()
}

/// Runs the instruction stream until `Return` or an unwind.
pub fn run(code: &LightCode, frame: &mut Frame) -> Result<Value, Unwind> {
    let mut stack = Stack::new();
    let mut pc = 0usize;
    loop {
        let Some(instruction) = code.instructions.get(pc) else {
            return Err(raise(ErrorKind::SystemError, format!("light code ran past its end at {pc}")));
        };
        pc += 1;
        match instruction {
            Instruction::Const(c) => stack.push(Value::from_constant(c)),
            Instruction::Load { var, guarded } => {
                let value = frame.load(var, *guarded).map_err(|e| frame.failed(e))?;
                stack.push(value);
            }
            Instruction::Store(var) => {
                let value = pop(&mut stack);
                frame.store(var, value).map_err(|e| frame.failed(e))?;
                stack.push(Value::None);
            }
            Instruction::Delete { var, checked } => {
                frame.delete(var, *checked).map_err(|e| frame.failed(e))?;
                stack.push(Value::None);
            }
            Instruction::LoadTemp(temp) => stack.push(frame.temp(*temp)?),
            Instruction::StoreTemp(temp) => {
                let value = pop(&mut stack);
                frame.set_temp(*temp, value);
                stack.push(Value::None);
            }
            Instruction::Op { op, argc } => {
                let args = pop_n(&mut stack, *argc as usize);
                let result = ops::apply(frame, op, args).map_err(|e| frame.failed(e))?;
                stack.push(result);
            }
            Instruction::Call(kinds) => {
                let values = pop_n(&mut stack, kinds.len());
                let callee = pop(&mut stack);
                let args = if kinds.iter().all(|k| *k == ArgKind::Positional) {
                    Args::positional(values.into_vec())
                } else {
                    call::collect_args(frame, kinds.iter().zip(values)).map_err(|e| frame.failed(e))?
                };
                stack.push(call::call(frame, &callee, args)?);
            }
            Instruction::Jump(target) => pc = *target as usize,
            Instruction::JumpIfFalse(target) => {
                let condition = pop(&mut stack);
                if !ops::truthy(frame, &condition)? {
                    pc = *target as usize;
                }
            }
            Instruction::Exit(label) => {
                let Some(target) = code.target(*label) else {
                    return Err(raise(ErrorKind::SystemError, format!("no target for label {label}")));
                };
                stack.truncate(target.depth as usize);
                pc = target.pc as usize;
            }
            Instruction::Pop => {
                stack.pop();
            }
            Instruction::Return => return Ok(pop(&mut stack)),
            Instruction::SetLine(line) => {
                frame.line = *line;
                stack.push(Value::None);
            }
            Instruction::LineFlag(flag) => {
                frame.line_flag(*flag);
                stack.push(Value::None);
            }
            Instruction::Throw => {
                let exception = pop(&mut stack);
                return Err(frame.failed(Unwind::Exception(exception)));
            }
            Instruction::Rethrow => return Err(frame.rethrow()),
            Instruction::Eval(fallback) => {
                let rt = Rc::clone(&frame.rt);
                let delegate = fallback.cache.get_or_compile(&*rt.compiler, &fallback.expr);
                match delegate.run(frame) {
                    Ok(value) => stack.push(value),
                    Err(Unwind::Break(label) | Unwind::Continue(label)) if code.target(label).is_some() => {
                        if let Some(target) = code.target(label) {
                            stack.truncate(target.depth as usize);
                            pc = target.pc as usize;
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}
