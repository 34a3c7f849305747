use thiserror::Error;

// =============================================================================
// Opcode numbers
// =============================================================================

pub mod opcode {
    pub const LOAD: u8 = 1;
    pub const LOAD_0: u8 = 2;
    pub const STORE: u8 = 6;
    pub const STORE_0: u8 = 7;
    pub const GETSTATIC: u8 = 11;
    pub const PUTSTATIC: u8 = 12;
    pub const GETFIELD: u8 = 13;
    pub const PUTFIELD: u8 = 14;
    pub const CONST_0: u8 = 15;
    pub const CONST_M1: u8 = 21;
    pub const CONST: u8 = 22;
    pub const ADD: u8 = 23;
    pub const SUB: u8 = 24;
    pub const MUL: u8 = 25;
    pub const DIV: u8 = 26;
    pub const REM: u8 = 27;
    pub const NEG: u8 = 28;
    pub const NEW: u8 = 31;
    pub const NEWARRAY: u8 = 32;
    pub const ALOAD: u8 = 33;
    pub const ASTORE: u8 = 34;
    pub const BALOAD: u8 = 35;
    pub const BASTORE: u8 = 36;
    pub const ARRAYLENGTH: u8 = 37;
    pub const POP: u8 = 38;
    pub const JMP: u8 = 39;
    /// `jeq`; the other five conditional jumps follow in `Relop` order.
    pub const JEQ: u8 = 40;
    pub const CALL: u8 = 46;
    pub const RETURN: u8 = 47;
    pub const ENTER: u8 = 48;
    pub const EXIT: u8 = 49;
    pub const READ: u8 = 50;
    pub const PRINT: u8 = 51;
    pub const BREAD: u8 = 52;
    pub const BPRINT: u8 = 53;
    pub const TRAP: u8 = 54;
}

/// Trap code for falling off the end of a value-returning method.
pub const TRAP_MISSING_RETURN: u8 = 1;

/// Relational operators, in conditional-jump opcode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relop {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Relop {
    const ALL: [Relop; 6] = [Relop::Eq, Relop::Ne, Relop::Lt, Relop::Le, Relop::Gt, Relop::Ge];

    /// The operator that holds exactly when `self` does not.
    pub fn inverse(self) -> Relop {
        match self {
            Relop::Eq => Relop::Ne,
            Relop::Ne => Relop::Eq,
            Relop::Lt => Relop::Ge,
            Relop::Le => Relop::Gt,
            Relop::Gt => Relop::Le,
            Relop::Ge => Relop::Lt,
        }
    }

    pub fn is_equality(self) -> bool {
        matches!(self, Relop::Eq | Relop::Ne)
    }

    pub fn holds(self, a: i32, b: i32) -> bool {
        match self {
            Relop::Eq => a == b,
            Relop::Ne => a != b,
            Relop::Lt => a < b,
            Relop::Le => a <= b,
            Relop::Gt => a > b,
            Relop::Ge => a >= b,
        }
    }

    fn index(self) -> u8 {
        Relop::ALL.iter().position(|r| *r == self).unwrap_or(0) as u8
    }
}

/// Element width of an allocated array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemSize {
    Byte = 0,
    Word = 1,
}

// =============================================================================
// OP - one decoded instruction
// =============================================================================

/// A single stack-machine instruction with its immediates.
///
/// Jump and call targets are absolute code addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    // locals (frame slots)
    Load(u8),
    Store(u8),

    // globals and fields
    GetStatic(u16),
    PutStatic(u16),
    GetField(u16),
    PutField(u16),

    Const(i32),

    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,

    // objects and arrays
    New(u16),
    NewArray(ElemSize),
    ALoad,
    AStore,
    BALoad,
    BAStore,
    ArrayLength,

    Pop,

    // control flow
    Jmp(u16),
    /// Pops `b` then `a`; jumps when `a <relop> b`.
    JumpIf(Relop, u16),
    Call(u16),
    Return,
    Enter { params: u8, locals: u8 },
    Exit,

    // I/O
    Read,
    Print,
    BRead,
    BPrint,

    Trap(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {opcode} at {pc}")]
    UnknownOpcode { opcode: u8, pc: usize },

    #[error("truncated instruction at {pc}")]
    Truncated { pc: usize },
}

impl Op {
    /// Appends the encoding of `self`, using the short forms where they
    /// exist.
    pub fn encode(&self, out: &mut Vec<u8>) {
        use opcode::*;
        match *self {
            Op::Load(n) if n < 4 => out.push(LOAD_0 + n),
            Op::Load(n) => out.extend([LOAD, n]),
            Op::Store(n) if n < 4 => out.push(STORE_0 + n),
            Op::Store(n) => out.extend([STORE, n]),
            Op::GetStatic(a) => encode_u16(out, GETSTATIC, a),
            Op::PutStatic(a) => encode_u16(out, PUTSTATIC, a),
            Op::GetField(a) => encode_u16(out, GETFIELD, a),
            Op::PutField(a) => encode_u16(out, PUTFIELD, a),
            Op::Const(-1) => out.push(CONST_M1),
            Op::Const(n @ 0..=5) => out.push(CONST_0 + n as u8),
            Op::Const(n) => {
                out.push(CONST);
                out.extend(n.to_be_bytes());
            }
            Op::Add => out.push(ADD),
            Op::Sub => out.push(SUB),
            Op::Mul => out.push(MUL),
            Op::Div => out.push(DIV),
            Op::Rem => out.push(REM),
            Op::Neg => out.push(NEG),
            Op::New(size) => encode_u16(out, NEW, size),
            Op::NewArray(elem) => out.extend([NEWARRAY, elem as u8]),
            Op::ALoad => out.push(ALOAD),
            Op::AStore => out.push(ASTORE),
            Op::BALoad => out.push(BALOAD),
            Op::BAStore => out.push(BASTORE),
            Op::ArrayLength => out.push(ARRAYLENGTH),
            Op::Pop => out.push(POP),
            Op::Jmp(t) => encode_u16(out, JMP, t),
            Op::JumpIf(rel, t) => encode_u16(out, JEQ + rel.index(), t),
            Op::Call(t) => encode_u16(out, CALL, t),
            Op::Return => out.push(RETURN),
            Op::Enter { params, locals } => out.extend([ENTER, params, locals]),
            Op::Exit => out.push(EXIT),
            Op::Read => out.push(READ),
            Op::Print => out.push(PRINT),
            Op::BRead => out.push(BREAD),
            Op::BPrint => out.push(BPRINT),
            Op::Trap(code) => out.extend([TRAP, code]),
        }
    }

    /// Decodes the instruction at `pc`, returning it with the address of the
    /// instruction that follows.
    pub fn decode(code: &[u8], pc: usize) -> Result<(Op, usize), DecodeError> {
        use opcode::*;
        let opcode = *code.get(pc).ok_or(DecodeError::Truncated { pc })?;
        let u8_at = |offset: usize| -> Result<u8, DecodeError> {
            code.get(pc + offset)
                .copied()
                .ok_or(DecodeError::Truncated { pc })
        };
        let u16_at = |offset: usize| -> Result<u16, DecodeError> {
            Ok(u16::from_be_bytes([u8_at(offset)?, u8_at(offset + 1)?]))
        };

        let decoded = match opcode {
            LOAD => (Op::Load(u8_at(1)?), 2),
            n @ LOAD_0..=5 => (Op::Load(n - LOAD_0), 1),
            STORE => (Op::Store(u8_at(1)?), 2),
            n @ STORE_0..=10 => (Op::Store(n - STORE_0), 1),
            GETSTATIC => (Op::GetStatic(u16_at(1)?), 3),
            PUTSTATIC => (Op::PutStatic(u16_at(1)?), 3),
            GETFIELD => (Op::GetField(u16_at(1)?), 3),
            PUTFIELD => (Op::PutField(u16_at(1)?), 3),
            n @ CONST_0..=20 => (Op::Const((n - CONST_0) as i32), 1),
            CONST_M1 => (Op::Const(-1), 1),
            CONST => {
                let bytes = [u8_at(1)?, u8_at(2)?, u8_at(3)?, u8_at(4)?];
                (Op::Const(i32::from_be_bytes(bytes)), 5)
            }
            ADD => (Op::Add, 1),
            SUB => (Op::Sub, 1),
            MUL => (Op::Mul, 1),
            DIV => (Op::Div, 1),
            REM => (Op::Rem, 1),
            NEG => (Op::Neg, 1),
            NEW => (Op::New(u16_at(1)?), 3),
            NEWARRAY => {
                let elem = match u8_at(1)? {
                    0 => ElemSize::Byte,
                    _ => ElemSize::Word,
                };
                (Op::NewArray(elem), 2)
            }
            ALOAD => (Op::ALoad, 1),
            ASTORE => (Op::AStore, 1),
            BALOAD => (Op::BALoad, 1),
            BASTORE => (Op::BAStore, 1),
            ARRAYLENGTH => (Op::ArrayLength, 1),
            POP => (Op::Pop, 1),
            JMP => (Op::Jmp(u16_at(1)?), 3),
            n @ JEQ..=45 => {
                let rel = Relop::ALL[(n - JEQ) as usize];
                (Op::JumpIf(rel, u16_at(1)?), 3)
            }
            CALL => (Op::Call(u16_at(1)?), 3),
            RETURN => (Op::Return, 1),
            ENTER => (
                Op::Enter {
                    params: u8_at(1)?,
                    locals: u8_at(2)?,
                },
                3,
            ),
            EXIT => (Op::Exit, 1),
            READ => (Op::Read, 1),
            PRINT => (Op::Print, 1),
            BREAD => (Op::BRead, 1),
            BPRINT => (Op::BPrint, 1),
            TRAP => (Op::Trap(u8_at(1)?), 2),
            opcode => return Err(DecodeError::UnknownOpcode { opcode, pc }),
        };

        let (op, len) = decoded;
        Ok((op, pc + len))
    }
}

fn encode_u16(out: &mut Vec<u8>, opcode: u8, value: u16) {
    out.push(opcode);
    out.extend(value.to_be_bytes());
}

/// Decodes a whole code section into `(address, op)` pairs.
pub fn decode_all(code: &[u8]) -> Result<Vec<(usize, Op)>, DecodeError> {
    let mut ops = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let (op, next) = Op::decode(code, pc)?;
        ops.push((pc, op));
        pc = next;
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bytes(op: Op) -> Vec<u8> {
        let mut out = Vec::new();
        op.encode(&mut out);
        out
    }

    #[test]
    fn test_short_forms() {
        assert_eq!(bytes(Op::Load(2)), vec![opcode::LOAD_0 + 2]);
        assert_eq!(bytes(Op::Load(9)), vec![opcode::LOAD, 9]);
        assert_eq!(bytes(Op::Store(0)), vec![opcode::STORE_0]);
        assert_eq!(bytes(Op::Const(5)), vec![opcode::CONST_0 + 5]);
        assert_eq!(bytes(Op::Const(-1)), vec![opcode::CONST_M1]);
        assert_eq!(bytes(Op::Const(300)), vec![opcode::CONST, 0, 0, 1, 44]);
    }

    #[test]
    fn test_jump_targets_are_big_endian() {
        assert_eq!(bytes(Op::Jmp(0x0102)), vec![opcode::JMP, 1, 2]);
        assert_eq!(
            bytes(Op::JumpIf(Relop::Ge, 7)),
            vec![opcode::JEQ + 5, 0, 7]
        );
    }

    #[test]
    fn test_decode_sequence() {
        let mut code = Vec::new();
        for op in [
            Op::Enter { params: 1, locals: 3 },
            Op::Load(0),
            Op::Const(-7),
            Op::JumpIf(Relop::Lt, 12),
            Op::Exit,
            Op::Return,
        ] {
            op.encode(&mut code);
        }

        let decoded: Vec<Op> = decode_all(&code).unwrap().into_iter().map(|(_, op)| op).collect();
        assert_eq!(
            decoded,
            vec![
                Op::Enter { params: 1, locals: 3 },
                Op::Load(0),
                Op::Const(-7),
                Op::JumpIf(Relop::Lt, 12),
                Op::Exit,
                Op::Return,
            ]
        );
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            Op::decode(&[99], 0),
            Err(DecodeError::UnknownOpcode { opcode: 99, pc: 0 })
        );
        assert_eq!(
            Op::decode(&[opcode::JMP, 0], 0),
            Err(DecodeError::Truncated { pc: 0 })
        );
    }

    #[test]
    fn test_relop_inverse() {
        for rel in Relop::ALL {
            assert_eq!(rel.inverse().inverse(), rel);
            for (a, b) in [(1, 2), (2, 2), (3, 2)] {
                assert_ne!(rel.holds(a, b), rel.inverse().holds(a, b));
            }
        }
    }
}
