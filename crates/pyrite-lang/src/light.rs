//! Light instructions: a compact stack-machine form of a lowered tree.
//!
//! Every instruction sequence for an expression leaves exactly one value on
//! the stack. Nodes without an instruction form are wrapped in
//! [`Instruction::Eval`], which compiles the subtree on first use and runs it
//! against the same frame.

use std::{fmt, sync::Arc};

use rustc_hash::FxHashMap;

use crate::{
    backend::DelegateCache,
    constant::Constant,
    ir::{self, ArgKind, LabelId, LineFlag, RuntimeOp, TempId, VarAccess},
};

/// Fallback for a subtree without a light form.
#[derive(Debug)]
pub struct Fallback {
    pub expr: ir::Expr,
    pub cache: DelegateCache,
}

#[derive(Debug)]
pub enum Instruction {
    Const(Constant),
    Load { var: VarAccess, guarded: bool },
    /// Pops the value; pushes `None`.
    Store(VarAccess),
    Delete { var: VarAccess, checked: bool },
    LoadTemp(TempId),
    /// Pops the value; pushes `None`.
    StoreTemp(TempId),
    /// Pops `argc` operands.
    Op { op: RuntimeOp, argc: u32 },
    /// Pops the callee and one value per argument kind.
    Call(Arc<[ArgKind]>),
    Jump(u32),
    /// Pops the condition.
    JumpIfFalse(u32),
    /// `break`/`continue`: truncates the stack and jumps to the label's
    /// [`Target`].
    Exit(LabelId),
    Pop,
    Return,
    SetLine(u32),
    LineFlag(LineFlag),
    Throw,
    Rethrow,
    Eval(Box<Fallback>),
}

/// Where a `break` or `continue` lands: a program counter and the stack
/// depth to truncate to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub pc: u32,
    pub depth: u32,
}

#[derive(Debug, Default)]
pub struct LightCode {
    pub instructions: Vec<Instruction>,
    /// Targets of every break and continue label, also used to map control
    /// transfers escaping a fallback back onto the stream.
    pub labels: FxHashMap<LabelId, Target>,
    pub fallbacks: usize,
}

impl LightCode {
    pub fn compile(body: &ir::Expr) -> Self {
        let mut compiler = LightCompiler::default();
        compiler.emit(body);
        compiler.push(Instruction::Return);
        let code = compiler.finish();
        tracing::trace!(instructions = code.len(), fallbacks = code.fallbacks, "light code emitted");
        code
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn target(&self, label: LabelId) -> Option<Target> {
        self.labels.get(&label).copied()
    }
}

impl fmt::Display for LightCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (pc, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "{pc:>4} {instruction}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Const(c) => write!(f, "const {c}"),
            Instruction::Load { var, guarded } => {
                write!(f, "load {var}{}", if *guarded { "!" } else { "" })
            }
            Instruction::Store(var) => write!(f, "store {var}"),
            Instruction::Delete { var, checked } => {
                write!(f, "{} {var}", if *checked { "del" } else { "unbind" })
            }
            Instruction::LoadTemp(t) => write!(f, "load ${t}"),
            Instruction::StoreTemp(t) => write!(f, "store ${t}"),
            Instruction::Op { op, argc } => write!(f, "op {op}/{argc}"),
            Instruction::Call(kinds) => write!(f, "call/{}", kinds.len()),
            Instruction::Jump(pc) => write!(f, "jump {pc}"),
            Instruction::JumpIfFalse(pc) => write!(f, "jump-if-false {pc}"),
            Instruction::Exit(label) => write!(f, "exit L{label}"),
            Instruction::Pop => write!(f, "pop"),
            Instruction::Return => write!(f, "return"),
            Instruction::SetLine(line) => write!(f, "line {line}"),
            Instruction::LineFlag(flag) => write!(f, "line-flag {flag:?}"),
            Instruction::Throw => write!(f, "throw"),
            Instruction::Rethrow => write!(f, "rethrow"),
            Instruction::Eval(fallback) => write!(f, "eval {}", fallback.expr),
        }
    }
}

#[derive(Default)]
struct LightCompiler {
    instructions: Vec<Instruction>,
    labels: FxHashMap<LabelId, Target>,
    depth: u32,
    fallbacks: usize,
}

impl LightCompiler {
    fn finish(self) -> LightCode {
        LightCode {
            instructions: self.instructions,
            labels: self.labels,
            fallbacks: self.fallbacks,
        }
    }

    fn pc(&self) -> u32 {
        self.instructions.len() as u32
    }

    fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    fn patch(&mut self, at: usize, target: u32) {
        match &mut self.instructions[at] {
            Instruction::Jump(pc) | Instruction::JumpIfFalse(pc) => *pc = target,
            other => unreachable!("patching a non-jump instruction {other}"),
        }
    }

    fn bind_label(&mut self, label: LabelId, target: Target) {
        self.labels.insert(label, target);
    }

    fn emit(&mut self, expr: &ir::Expr) {
        match expr {
            ir::Expr::Constant(c) => self.emit_push(Instruction::Const(c.clone())),
            ir::Expr::Load { var, guarded } => self.emit_push(Instruction::Load {
                var: var.clone(),
                guarded: *guarded,
            }),
            ir::Expr::Store { var, value } => {
                self.emit(value);
                self.push(Instruction::Store(var.clone()));
            }
            ir::Expr::Delete { var, checked } => self.emit_push(Instruction::Delete {
                var: var.clone(),
                checked: *checked,
            }),
            ir::Expr::Temp(t) => self.emit_push(Instruction::LoadTemp(*t)),
            ir::Expr::SetTemp { temp, value } => {
                self.emit(value);
                self.push(Instruction::StoreTemp(*temp));
            }
            ir::Expr::Op { op, args } => {
                for arg in args {
                    self.emit(arg);
                }
                self.push(Instruction::Op {
                    op: op.clone(),
                    argc: args.len() as u32,
                });
                self.depth -= args.len() as u32;
                self.depth += 1;
            }
            ir::Expr::Call { callee, args } => {
                self.emit(callee);
                for arg in args {
                    self.emit(&arg.value);
                }
                let kinds: Arc<[ArgKind]> = args.iter().map(|a| a.kind.clone()).collect();
                self.push(Instruction::Call(kinds));
                self.depth -= args.len() as u32;
            }
            ir::Expr::Block(items) => self.emit_block(items),
            ir::Expr::If { test, then, orelse } => {
                self.emit(test);
                let jump_else = self.instructions.len();
                self.push(Instruction::JumpIfFalse(u32::MAX));
                self.depth -= 1;
                self.emit(then);
                let jump_end = self.instructions.len();
                self.push(Instruction::Jump(u32::MAX));
                self.depth -= 1;
                let else_pc = self.pc();
                self.patch(jump_else, else_pc);
                self.emit(orelse);
                let end = self.pc();
                self.patch(jump_end, end);
            }
            ir::Expr::Loop {
                body,
                break_label,
                continue_label,
            } => {
                let top = Target {
                    pc: self.pc(),
                    depth: self.depth,
                };
                self.bind_label(*continue_label, top);
                self.emit(body);
                self.push(Instruction::Pop);
                self.depth -= 1;
                self.push(Instruction::Jump(top.pc));
                let exit = Target {
                    pc: self.pc(),
                    depth: self.depth,
                };
                self.bind_label(*break_label, exit);
                self.emit_push(Instruction::Const(Constant::None));
            }
            ir::Expr::Labeled { label, body } => {
                let depth = self.depth;
                self.emit(body);
                let jump_end = self.instructions.len();
                self.push(Instruction::Jump(u32::MAX));
                self.depth = depth;
                let exit = Target { pc: self.pc(), depth };
                self.bind_label(*label, exit);
                self.emit_push(Instruction::Const(Constant::None));
                let end = self.pc();
                self.patch(jump_end, end);
            }
            ir::Expr::Break(label) | ir::Expr::Continue(label) => {
                // Pushes nothing at runtime; counted to keep the static depth
                // balanced on the unreachable path.
                self.emit_push(Instruction::Exit(*label));
            }
            ir::Expr::Return(value) => {
                self.emit(value);
                self.push(Instruction::Return);
            }
            ir::Expr::Throw(value) => {
                self.emit(value);
                self.push(Instruction::Throw);
            }
            ir::Expr::Rethrow => self.emit_push(Instruction::Rethrow),
            ir::Expr::SetLine(line) => self.emit_push(Instruction::SetLine(*line)),
            ir::Expr::LineFlag(flag) => self.emit_push(Instruction::LineFlag(*flag)),
            ir::Expr::Try(_)
            | ir::Expr::MakeFunction(_)
            | ir::Expr::MakeClass(_)
            | ir::Expr::Yield { .. }
            | ir::Expr::GeneratorCheck
            | ir::Expr::YieldBreak(_) => {
                self.fallbacks += 1;
                self.emit_push(Instruction::Eval(Box::new(Fallback {
                    expr: expr.clone(),
                    cache: DelegateCache::new(),
                })));
            }
        }
    }

    /// Emits an instruction that pushes one value.
    fn emit_push(&mut self, instruction: Instruction) {
        self.push(instruction);
        self.depth += 1;
    }

    fn emit_block(&mut self, items: &[ir::Expr]) {
        let Some((last, init)) = items.split_last() else {
            self.emit_push(Instruction::Const(Constant::None));
            return;
        };
        for item in init {
            self.emit(item);
            self.push(Instruction::Pop);
            self.depth -= 1;
        }
        self.emit(last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast::CompareOp, scope::Storage};

    fn local(name: &str, slot: u32) -> VarAccess {
        VarAccess::new(name, Storage::Local(slot))
    }

    #[test]
    fn test_if_jumps_are_patched() {
        let expr = ir::Expr::if_(
            ir::Expr::Constant(Constant::Bool(true)),
            ir::Expr::Constant(Constant::Int(1)),
            ir::Expr::Constant(Constant::Int(2)),
        );
        let code = LightCode::compile(&expr);
        assert_eq!(
            code.to_string(),
            "   0 const True\n   1 jump-if-false 4\n   2 const 1\n   3 jump 5\n   4 const 2\n   5 return\n"
        );
    }

    #[test]
    fn test_while_loop_labels() {
        // while x < 3: x = x + 1
        let x = local("x", 0);
        let body = ir::Expr::Loop {
            body: Box::new(ir::Expr::if_(
                ir::Expr::op(
                    RuntimeOp::Compare(CompareOp::Lt),
                    vec![
                        ir::Expr::Load { var: x.clone(), guarded: false },
                        ir::Expr::Constant(Constant::Int(3)),
                    ],
                ),
                ir::Expr::store(x.clone(), ir::Expr::Constant(Constant::Int(9))),
                ir::Expr::Break(0),
            )),
            break_label: 0,
            continue_label: 1,
        };
        let code = LightCode::compile(&body);

        assert_eq!(code.target(1), Some(Target { pc: 0, depth: 0 }));
        let exit = code.target(0).unwrap();
        assert_eq!(exit.depth, 0);
        assert!(matches!(code.instructions[exit.pc as usize], Instruction::Const(Constant::None)));
        assert!(matches!(code.instructions[7], Instruction::Exit(0)));
        assert_eq!(exit.pc, 10);
        assert_eq!(code.fallbacks, 0);
    }

    #[test]
    fn test_try_region_falls_back() {
        let region = ir::Expr::Try(Box::new(ir::TryRegion {
            id: 0,
            body: ir::Expr::none(),
            handler: None,
            finally: Some(ir::Expr::none()),
        }));
        let code = LightCode::compile(&ir::Expr::Block(vec![region, ir::Expr::temp(0)]));
        assert_eq!(code.fallbacks, 1);
        assert!(matches!(code.instructions[0], Instruction::Eval(_)));
        assert!(matches!(code.instructions[1], Instruction::Pop));
    }
}
