use super::emit::Emitter;
use super::heap::Heap;
use super::op::Opcode;
use super::stack::Stack;
use crate::error;
use crate::lang::{Error, ErrorCode, Token};

type Result<T> = std::result::Result<T, Error>;

/// Size of the operand and operator stacks.
pub const EXPR_STACK: usize = 16;

/// x to the power y, by repeated multiplication. A negative or zero
/// exponent yields 1.
pub fn pow(x: i16, y: i16) -> i16 {
    let mut ret: i16 = 1;
    for _ in 0..y {
        ret = ret.wrapping_mul(x);
    }
    ret
}

/// ## Expression sink
///
/// The shunting-yard reducer feeds operands and operators to one of these.
/// `Fold` computes: operands live on a bounded stack and every reduction
/// replaces them with a result. `Emit` generates: operands live on the
/// target VM's evaluation stack, so pushing a value emits `LDIMM` and a
/// reduction emits the matching opcode.
#[derive(Debug)]
pub enum ExprSink {
    Fold { operands: Stack<i16> },
    Emit,
}

impl ExprSink {
    pub fn fold() -> ExprSink {
        ExprSink::Fold {
            operands: Stack::new(EXPR_STACK, ErrorCode::TooComplex),
        }
    }

    pub fn push(&mut self, val: i16, emitter: &mut Emitter) -> Result<()> {
        match self {
            ExprSink::Fold { operands } => operands.push(val),
            ExprSink::Emit => emitter.emit_ldi(val),
        }
    }

    /// Take the result of an expression. Generating, the value only
    /// exists on the target's stack, so this yields 0.
    pub fn pop(&mut self) -> Result<i16> {
        match self {
            ExprSink::Fold { operands } => operands.pop(),
            ExprSink::Emit => Ok(0),
        }
    }

    pub fn clear(&mut self) {
        if let ExprSink::Fold { operands } = self {
            operands.clear();
        }
    }

    /// Apply one popped operator.
    pub fn apply(&mut self, token: Token, emitter: &mut Emitter, heap: &Heap) -> Result<()> {
        match self {
            ExprSink::Fold { operands } => {
                let rhs = operands.pop()?;
                let result = if token.is_unary() {
                    fold_unary(token, rhs, heap)?
                } else {
                    let lhs = operands.pop()?;
                    fold_binary(token, lhs, rhs)?
                };
                operands.push(result)
            }
            ExprSink::Emit => {
                if let Some(op) = emitted_op(token)? {
                    emitter.emit(op)?;
                }
                Ok(())
            }
        }
    }
}

fn fold_unary(token: Token, operand: i16, heap: &Heap) -> Result<i16> {
    use Token::*;
    Ok(match token {
        Neg => operand.wrapping_neg(),
        Pos => operand,
        Not => (operand == 0) as i16,
        BitNot => !operand,
        Deref => heap.read_word(operand as u16)?,
        DerefByte => heap.read_byte(operand as u16)? as i16,
        _ => return Err(error!(BadExpression)),
    })
}

fn fold_binary(token: Token, lhs: i16, rhs: i16) -> Result<i16> {
    use Token::*;
    Ok(match token {
        Pow => pow(lhs, rhs),
        Mul => lhs.wrapping_mul(rhs),
        Div => {
            if rhs == 0 {
                return Err(error!(DivideByZero));
            }
            lhs.wrapping_div(rhs)
        }
        Mod => {
            if rhs == 0 {
                return Err(error!(DivideByZero));
            }
            lhs.wrapping_rem(rhs)
        }
        Add => lhs.wrapping_add(rhs),
        Sub => lhs.wrapping_sub(rhs),
        Lsh => lhs.wrapping_shl(rhs as u32),
        Rsh => lhs.wrapping_shr(rhs as u32),
        Lt => (lhs < rhs) as i16,
        LtEq => (lhs <= rhs) as i16,
        Gt => (lhs > rhs) as i16,
        GtEq => (lhs >= rhs) as i16,
        Eq => (lhs == rhs) as i16,
        NotEq => (lhs != rhs) as i16,
        BitAnd => lhs & rhs,
        BitXor => lhs ^ rhs,
        BitOr => lhs | rhs,
        And => (lhs != 0 && rhs != 0) as i16,
        Or => (lhs != 0 || rhs != 0) as i16,
        _ => return Err(error!(BadExpression)),
    })
}

/// Opcode for an operator when generating. Divide-by-zero becomes the
/// VM's responsibility. `+` as a prefix emits nothing. The VM has no
/// power instruction, so `**` cannot be compiled.
fn emitted_op(token: Token) -> Result<Option<Opcode>> {
    use Token::*;
    Ok(Some(match token {
        Neg => Opcode::Neg,
        Pos => return Ok(None),
        Not => Opcode::Not,
        BitNot => Opcode::Bitnot,
        Deref => Opcode::Ldaword,
        DerefByte => Opcode::Ldabyte,
        Pow => return Err(error!(BadExpression)),
        Mul => Opcode::Mul,
        Div => Opcode::Div,
        Mod => Opcode::Mod,
        Add => Opcode::Add,
        Sub => Opcode::Sub,
        Lsh => Opcode::Lsh,
        Rsh => Opcode::Rsh,
        Lt => Opcode::Lt,
        LtEq => Opcode::Lte,
        Gt => Opcode::Gt,
        GtEq => Opcode::Gte,
        Eq => Opcode::Eql,
        NotEq => Opcode::Neql,
        BitAnd => Opcode::Bitand,
        BitXor => Opcode::Bitxor,
        BitOr => Opcode::Bitor,
        And => Opcode::And,
        Or => Opcode::Or,
        Sentinel => return Err(error!(BadExpression)),
    }))
}
