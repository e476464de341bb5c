//! Reference interpreter.
//!
//! Executes IR functions over element-addressed buffers so transforms can be
//! checked by behavior rather than by shape: each pointer argument is a
//! buffer, `getelementptr` moves an element offset, and loads and stores
//! read and write single elements. Calls to functions without a body are
//! recorded in a trace instead of being executed.

use std::collections::HashMap;

use super::function::Function;
use super::inst::{BinaryOp, CastOp, FloatPredicate, InstKind, IntPredicate};
use super::module::Module;
use super::types::{Constant, Type, Value};
use super::{BlockId, InstId};
use crate::utils::errors::{InterpError, InterpErrorKind};

/// Default instruction budget per top-level call.
pub const DEFAULT_STEP_LIMIT: u64 = 10_000_000;

/// A runtime value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RtValue {
    /// Integer, sign-extended from its type's width
    Int(i64),
    Float(f64),
    /// Element `offset` of buffer `buffer`
    Ptr { buffer: usize, offset: i64 },
    Null,
    Undef,
}

impl RtValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RtValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            RtValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// A call to a function without a body.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub callee: String,
    pub args: Vec<RtValue>,
}

fn error(kind: InterpErrorKind, message: impl Into<String>) -> InterpError {
    InterpError {
        message: message.into(),
        kind,
    }
}

fn wrap(bits: u32, value: i64) -> i64 {
    match bits {
        1 => value & 1,
        b if b >= 64 => value,
        _ => {
            let shift = 64 - bits;
            (value << shift) >> shift
        }
    }
}

fn unsigned(bits: u32, value: i64) -> u64 {
    if bits >= 64 {
        value as u64
    } else {
        (value as u64) & ((1u64 << bits) - 1)
    }
}

fn round_to(ty: Type, value: f64) -> f64 {
    if ty == Type::Float {
        value as f32 as f64
    } else {
        value
    }
}

/// Interpreter over the functions of one module.
pub struct Interpreter<'m> {
    module: &'m Module,
    buffers: Vec<Vec<RtValue>>,
    trace: Vec<CallRecord>,
    step_limit: u64,
    steps: u64,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            buffers: Vec::new(),
            trace: Vec::new(),
            step_limit: DEFAULT_STEP_LIMIT,
            steps: 0,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Allocate a buffer and return a pointer to its first element.
    pub fn alloc(&mut self, data: Vec<RtValue>) -> RtValue {
        self.buffers.push(data);
        RtValue::Ptr {
            buffer: self.buffers.len() - 1,
            offset: 0,
        }
    }

    pub fn alloc_floats(&mut self, data: &[f64]) -> RtValue {
        self.alloc(data.iter().map(|v| RtValue::Float(*v)).collect())
    }

    pub fn alloc_ints(&mut self, data: &[i64]) -> RtValue {
        self.alloc(data.iter().map(|v| RtValue::Int(*v)).collect())
    }

    /// Contents of the buffer `ptr` points into.
    pub fn buffer(&self, ptr: RtValue) -> Option<&[RtValue]> {
        match ptr {
            RtValue::Ptr { buffer, .. } => self.buffers.get(buffer).map(Vec::as_slice),
            _ => None,
        }
    }

    /// Calls to bodiless functions, in execution order.
    pub fn trace(&self) -> &[CallRecord] {
        &self.trace
    }

    /// Instructions executed by the last call.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Call module function `name`.
    pub fn call(&mut self, name: &str, args: &[RtValue]) -> Result<Option<RtValue>, InterpError> {
        let module = self.module;
        let func = module
            .function(name)
            .ok_or_else(|| error(InterpErrorKind::UndefinedValue, format!("No function '@{}'", name)))?;
        self.run_function(func, args)
    }

    /// Execute `func`, which need not belong to the module. Callees are
    /// still resolved against the module.
    pub fn run_function(&mut self, func: &Function, args: &[RtValue]) -> Result<Option<RtValue>, InterpError> {
        self.steps = 0;
        self.execute(func, args)
    }

    fn execute(&mut self, func: &Function, args: &[RtValue]) -> Result<Option<RtValue>, InterpError> {
        if args.len() != func.params.len() {
            return Err(error(
                InterpErrorKind::TypeMismatch,
                format!(
                    "'@{}' takes {} arguments, {} given",
                    func.name,
                    func.params.len(),
                    args.len()
                ),
            ));
        }
        let mut frame = Frame {
            func,
            args,
            env: HashMap::new(),
        };

        let mut block = func
            .entry()
            .ok_or_else(|| error(InterpErrorKind::Unsupported, format!("'@{}' has no body", func.name)))?;
        let mut prev: Option<BlockId> = None;

        loop {
            let phis = func.phis(block);
            let mut incoming = Vec::with_capacity(phis.len());
            for &phi in &phis {
                let from = prev.ok_or_else(|| error(InterpErrorKind::Unsupported, "Phi in entry block"))?;
                let value = func.inst(phi).kind.incoming_for(from).ok_or_else(|| {
                    error(
                        InterpErrorKind::UndefinedValue,
                        format!("Phi has no entry for '{}'", func.block_name(from)),
                    )
                })?;
                incoming.push((phi, frame.eval(value)?));
            }
            frame.env.extend(incoming);

            let mut next = None;
            for &id in &func.block(block).insts()[phis.len()..] {
                self.steps += 1;
                if self.steps > self.step_limit {
                    return Err(error(
                        InterpErrorKind::StepLimit,
                        format!("Step limit of {} exceeded", self.step_limit),
                    ));
                }
                match self.step(&mut frame, id)? {
                    Flow::Continue => {}
                    Flow::Jump(dest) => {
                        next = Some(dest);
                        break;
                    }
                    Flow::Return(value) => return Ok(value),
                }
            }

            let dest = next.ok_or_else(|| {
                error(
                    InterpErrorKind::Unsupported,
                    format!("Fell off the end of block '{}'", func.block_name(block)),
                )
            })?;
            prev = Some(block);
            block = dest;
        }
    }

    fn step(&mut self, frame: &mut Frame<'_>, id: InstId) -> Result<Flow, InterpError> {
        let func = frame.func;
        let inst = func.inst(id);
        let result = match &inst.kind {
            InstKind::Phi { .. } => {
                return Err(error(InterpErrorKind::Unsupported, "Phi after non-phi instruction"));
            }
            InstKind::Binary { op, lhs, rhs } => {
                let ty = func.value_type(lhs);
                binary(*op, ty, frame.eval(lhs)?, frame.eval(rhs)?)?
            }
            InstKind::Cast { op, value } => {
                let from = func.value_type(value);
                cast(*op, from, inst.ty, frame.eval(value)?)?
            }
            InstKind::ICmp { pred, lhs, rhs } => {
                let bits = func.value_type(lhs).int_bits().unwrap_or(64);
                let result = icmp(*pred, bits, frame.eval(lhs)?, frame.eval(rhs)?)?;
                RtValue::Int(result as i64)
            }
            InstKind::FCmp { pred, lhs, rhs } => {
                let result = fcmp(*pred, frame.eval(lhs)?, frame.eval(rhs)?)?;
                RtValue::Int(result as i64)
            }
            InstKind::Select {
                cond,
                then_value,
                else_value,
            } => match frame.eval(cond)? {
                RtValue::Int(0) => frame.eval(else_value)?,
                RtValue::Int(_) => frame.eval(then_value)?,
                other => return Err(mismatch("select condition", other)),
            },
            InstKind::GetElementPtr { base, indices, .. } => {
                let [index] = indices.as_slice() else {
                    return Err(error(
                        InterpErrorKind::Unsupported,
                        "Only single-index getelementptr is supported",
                    ));
                };
                let index = match frame.eval(index)? {
                    RtValue::Int(v) => v,
                    other => return Err(mismatch("getelementptr index", other)),
                };
                match frame.eval(base)? {
                    RtValue::Ptr { buffer, offset } => RtValue::Ptr {
                        buffer,
                        offset: offset.wrapping_add(index),
                    },
                    other => return Err(mismatch("getelementptr base", other)),
                }
            }
            InstKind::Load { addr } => {
                let (buffer, offset) = self.locate(frame.eval(addr)?)?;
                self.buffers[buffer][offset]
            }
            InstKind::Store { value, addr } => {
                let value = frame.eval(value)?;
                let (buffer, offset) = self.locate(frame.eval(addr)?)?;
                self.buffers[buffer][offset] = value;
                return Ok(Flow::Continue);
            }
            InstKind::Call { callee, args } => {
                let args = args.iter().map(|a| frame.eval(a)).collect::<Result<Vec<_>, _>>()?;
                let module = self.module;
                let target = module.function(callee).filter(|f| f.entry().is_some());
                let returned = match target {
                    Some(target) => self.execute(target, &args)?,
                    None => {
                        self.trace.push(CallRecord {
                            callee: callee.clone(),
                            args,
                        });
                        (inst.ty != Type::Void).then_some(RtValue::Undef)
                    }
                };
                match returned {
                    Some(value) => value,
                    None => return Ok(Flow::Continue),
                }
            }
            InstKind::Br { dest } => return Ok(Flow::Jump(*dest)),
            InstKind::CondBr {
                cond,
                then_dest,
                else_dest,
            } => {
                return match frame.eval(cond)? {
                    RtValue::Int(0) => Ok(Flow::Jump(*else_dest)),
                    RtValue::Int(_) => Ok(Flow::Jump(*then_dest)),
                    other => Err(mismatch("branch condition", other)),
                };
            }
            InstKind::Ret { value } => {
                let value = value.as_ref().map(|v| frame.eval(v)).transpose()?;
                return Ok(Flow::Return(value));
            }
            InstKind::Unreachable => {
                return Err(error(InterpErrorKind::Unsupported, "Reached 'unreachable'"));
            }
        };
        frame.env.insert(id, result);
        Ok(Flow::Continue)
    }

    fn locate(&self, ptr: RtValue) -> Result<(usize, usize), InterpError> {
        let RtValue::Ptr { buffer, offset } = ptr else {
            return Err(error(
                InterpErrorKind::OutOfBounds,
                format!("Memory access through {:?}", ptr),
            ));
        };
        let len = self.buffers.get(buffer).map(Vec::len).unwrap_or(0);
        if offset < 0 || offset as usize >= len {
            return Err(error(
                InterpErrorKind::OutOfBounds,
                format!("Offset {} outside buffer {} of {} elements", offset, buffer, len),
            ));
        }
        Ok((buffer, offset as usize))
    }
}

enum Flow {
    Continue,
    Jump(BlockId),
    Return(Option<RtValue>),
}

struct Frame<'a> {
    func: &'a Function,
    args: &'a [RtValue],
    env: HashMap<InstId, RtValue>,
}

impl Frame<'_> {
    fn eval(&self, value: &Value) -> Result<RtValue, InterpError> {
        match value {
            Value::Inst(id) => self.env.get(id).copied().ok_or_else(|| {
                error(
                    InterpErrorKind::UndefinedValue,
                    format!("'%{}' read before it was computed", self.func.value_name(value)),
                )
            }),
            Value::Param(index) => self.args.get(*index as usize).copied().ok_or_else(|| {
                error(InterpErrorKind::UndefinedValue, format!("No argument #{}", index))
            }),
            Value::Const(Constant::Int { ty, value }) => Ok(RtValue::Int(wrap(ty.int_bits().unwrap_or(64), *value))),
            Value::Const(Constant::Float { bits, .. }) => Ok(RtValue::Float(f64::from_bits(*bits))),
            Value::Const(Constant::Null) => Ok(RtValue::Null),
            Value::Const(Constant::Undef(_)) | Value::Function(_) => Ok(RtValue::Undef),
        }
    }
}

fn mismatch(what: &str, found: RtValue) -> InterpError {
    error(InterpErrorKind::TypeMismatch, format!("Unexpected {:?} as {}", found, what))
}

fn binary(op: BinaryOp, ty: Type, lhs: RtValue, rhs: RtValue) -> Result<RtValue, InterpError> {
    if op.is_float() {
        let (RtValue::Float(a), RtValue::Float(b)) = (lhs, rhs) else {
            return Err(mismatch("float operands", if lhs.as_float().is_some() { rhs } else { lhs }));
        };
        let value = match op {
            BinaryOp::FAdd => a + b,
            BinaryOp::FSub => a - b,
            BinaryOp::FMul => a * b,
            BinaryOp::FDiv => a / b,
            _ => a % b,
        };
        return Ok(RtValue::Float(round_to(ty, value)));
    }

    let (RtValue::Int(a), RtValue::Int(b)) = (lhs, rhs) else {
        return Err(mismatch("integer operands", if lhs.as_int().is_some() { rhs } else { lhs }));
    };
    let bits = ty.int_bits().unwrap_or(64);
    let divide_by_zero = || error(InterpErrorKind::DivisionByZero, format!("{} by zero", op.mnemonic()));
    let value = match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::SDiv => {
            if b == 0 {
                return Err(divide_by_zero());
            }
            a.wrapping_div(b)
        }
        BinaryOp::SRem => {
            if b == 0 {
                return Err(divide_by_zero());
            }
            a.wrapping_rem(b)
        }
        BinaryOp::UDiv | BinaryOp::URem => {
            let (ua, ub) = (unsigned(bits, a), unsigned(bits, b));
            if ub == 0 {
                return Err(divide_by_zero());
            }
            if op == BinaryOp::UDiv {
                (ua / ub) as i64
            } else {
                (ua % ub) as i64
            }
        }
        BinaryOp::Shl => a.wrapping_shl(b as u32),
        BinaryOp::LShr => (unsigned(bits, a) >> (b as u32 % 64)) as i64,
        BinaryOp::AShr => a.wrapping_shr(b as u32),
        BinaryOp::And => a & b,
        BinaryOp::Or => a | b,
        BinaryOp::Xor => a ^ b,
        BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv | BinaryOp::FRem => {
            return Err(mismatch("integer operator", lhs));
        }
    };
    Ok(RtValue::Int(wrap(bits, value)))
}

fn cast(op: CastOp, from: Type, to: Type, value: RtValue) -> Result<RtValue, InterpError> {
    let from_bits = from.int_bits().unwrap_or(64);
    let to_bits = to.int_bits().unwrap_or(64);
    let result = match (op, value) {
        (CastOp::SExt | CastOp::Trunc, RtValue::Int(v)) => RtValue::Int(wrap(to_bits, v)),
        (CastOp::ZExt, RtValue::Int(v)) => RtValue::Int(wrap(to_bits, unsigned(from_bits, v) as i64)),
        (CastOp::SIToFP, RtValue::Int(v)) => RtValue::Float(round_to(to, v as f64)),
        (CastOp::UIToFP, RtValue::Int(v)) => RtValue::Float(round_to(to, unsigned(from_bits, v) as f64)),
        (CastOp::FPToSI | CastOp::FPToUI, RtValue::Float(v)) => RtValue::Int(wrap(to_bits, v as i64)),
        (CastOp::FPExt | CastOp::FPTrunc, RtValue::Float(v)) => RtValue::Float(round_to(to, v)),
        (CastOp::BitCast, v) => v,
        (CastOp::PtrToInt | CastOp::IntToPtr, _) => {
            return Err(error(
                InterpErrorKind::Unsupported,
                "Pointer/integer conversion is not supported",
            ))
        }
        (_, other) => return Err(mismatch(op.mnemonic(), other)),
    };
    Ok(result)
}

fn icmp(pred: IntPredicate, bits: u32, lhs: RtValue, rhs: RtValue) -> Result<bool, InterpError> {
    let (a, b) = match (lhs, rhs) {
        (RtValue::Int(a), RtValue::Int(b)) => (a, b),
        // Pointer equality.
        _ if pred == IntPredicate::Eq => return Ok(lhs == rhs),
        _ if pred == IntPredicate::Ne => return Ok(lhs != rhs),
        _ => return Err(mismatch("icmp operands", rhs)),
    };
    let (ua, ub) = (unsigned(bits, a), unsigned(bits, b));
    Ok(match pred {
        IntPredicate::Eq => a == b,
        IntPredicate::Ne => a != b,
        IntPredicate::Slt => a < b,
        IntPredicate::Sle => a <= b,
        IntPredicate::Sgt => a > b,
        IntPredicate::Sge => a >= b,
        IntPredicate::Ult => ua < ub,
        IntPredicate::Ule => ua <= ub,
        IntPredicate::Ugt => ua > ub,
        IntPredicate::Uge => ua >= ub,
    })
}

fn fcmp(pred: FloatPredicate, lhs: RtValue, rhs: RtValue) -> Result<bool, InterpError> {
    let (RtValue::Float(a), RtValue::Float(b)) = (lhs, rhs) else {
        return Err(mismatch("fcmp operands", rhs));
    };
    let unordered = a.is_nan() || b.is_nan();
    Ok(match pred {
        FloatPredicate::False => false,
        FloatPredicate::True => true,
        FloatPredicate::Ord => !unordered,
        FloatPredicate::Uno => unordered,
        FloatPredicate::Oeq => !unordered && a == b,
        FloatPredicate::Ogt => !unordered && a > b,
        FloatPredicate::Oge => !unordered && a >= b,
        FloatPredicate::Olt => !unordered && a < b,
        FloatPredicate::Ole => !unordered && a <= b,
        FloatPredicate::One => !unordered && a != b,
        FloatPredicate::Ueq => unordered || a == b,
        FloatPredicate::Ugt => unordered || a > b,
        FloatPredicate::Uge => unordered || a >= b,
        FloatPredicate::Ult => unordered || a < b,
        FloatPredicate::Ule => unordered || a <= b,
        FloatPredicate::Une => unordered || a != b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_module;

    const SCALE: &str = r#"
define void @scale(ptr %A, i32 %N) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %p = getelementptr float, ptr %A, i32 %i
  %v = load float, ptr %p
  %w = fmul float %v, 2.0
  store float %w, ptr %p
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  call void @notify(i32 %N)
  ret void
}

declare void @notify(i32)
"#;

    #[test]
    fn test_loop_over_buffer() {
        let module = parse_module(SCALE).expect("parses");
        let mut interp = Interpreter::new(&module);
        let a = interp.alloc_floats(&[1.0, 2.0, 3.0, 4.0]);
        let result = interp.call("scale", &[a, RtValue::Int(3)]).expect("runs");
        assert_eq!(result, None);

        let values: Vec<f64> = interp
            .buffer(a)
            .expect("buffer")
            .iter()
            .filter_map(RtValue::as_float)
            .collect();
        assert_eq!(values, vec![2.0, 4.0, 6.0, 4.0]);
        assert_eq!(
            interp.trace(),
            &[CallRecord {
                callee: "notify".into(),
                args: vec![RtValue::Int(3)],
            }]
        );
    }

    #[test]
    fn test_out_of_bounds() {
        let module = parse_module(SCALE).expect("parses");
        let mut interp = Interpreter::new(&module);
        let a = interp.alloc_floats(&[1.0, 2.0]);
        let err = interp.call("scale", &[a, RtValue::Int(3)]).expect_err("overruns");
        assert_eq!(err.kind, InterpErrorKind::OutOfBounds);
    }

    #[test]
    fn test_step_limit() {
        let module = parse_module(SCALE).expect("parses");
        let mut interp = Interpreter::new(&module).with_step_limit(20);
        let a = interp.alloc_floats(&[0.0; 100]);
        let err = interp.call("scale", &[a, RtValue::Int(100)]).expect_err("budget exhausted");
        assert_eq!(err.kind, InterpErrorKind::StepLimit);
    }

    #[test]
    fn test_integer_semantics() {
        assert_eq!(wrap(8, 200), -56);
        assert_eq!(wrap(1, 3), 1);
        assert_eq!(unsigned(8, -1), 255);
        let r = binary(BinaryOp::SDiv, Type::I32, RtValue::Int(-7), RtValue::Int(2)).expect("divides");
        assert_eq!(r, RtValue::Int(-3));
        let r = binary(BinaryOp::UDiv, Type::I32, RtValue::Int(1), RtValue::Int(0));
        assert_eq!(r.expect_err("by zero").kind, InterpErrorKind::DivisionByZero);
        assert!(icmp(IntPredicate::Ult, 32, RtValue::Int(1), RtValue::Int(-1)).expect("compares"));
    }
}
