use thiserror::Error;
use tracing::debug;

use crate::bytecode::object_file::ObjectFile;
use crate::bytecode::op::{ElemSize, Op, Relop, TRAP_MISSING_RETURN};
use crate::bytecode::operand::{Operand, OperandKind};
use crate::symtab::Type;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("method name cannot be used as a value")]
    MethodAsValue,

    #[error("cannot assign to {0}")]
    NotAssignable(&'static str),
}

/// Append-only instruction buffer.
///
/// Every address handed out stays valid; `fixup` is the only way to rewrite
/// bytes already emitted. Immediates that do not fit their field and code
/// beyond the 16-bit address space set the `overflowed` flag instead of
/// panicking.
#[derive(Debug, Default)]
pub struct Code {
    buf: Vec<u8>,
    main_pc: Option<u16>,
    overflowed: bool,
}

impl Code {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address of the next instruction, saturated at `u16::MAX`.
    pub fn pc(&self) -> u16 {
        u16::try_from(self.buf.len()).unwrap_or(u16::MAX)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn main_pc(&self) -> Option<u16> {
        self.main_pc
    }

    pub fn set_main_pc(&mut self, pc: u16) {
        self.main_pc = Some(pc);
    }

    fn fit_u8(&mut self, value: usize) -> u8 {
        match u8::try_from(value) {
            Ok(v) => v,
            Err(_) => {
                self.overflowed = true;
                u8::MAX
            }
        }
    }

    fn fit_u16(&mut self, value: usize) -> u16 {
        match u16::try_from(value) {
            Ok(v) => v,
            Err(_) => {
                self.overflowed = true;
                u16::MAX
            }
        }
    }

    /// Appends one instruction and returns its address.
    pub fn emit(&mut self, op: Op) -> u16 {
        let adr = self.pc();
        op.encode(&mut self.buf);
        if self.buf.len() > usize::from(u16::MAX) {
            self.overflowed = true;
        }
        adr
    }

    /// Leaves the value of `x` on the expression stack.
    ///
    /// Field and element operands expect their object (and index) to be on
    /// the stack already.
    pub fn load(&mut self, x: &mut Operand) -> Result<(), CodeError> {
        let op = match x.kind {
            OperandKind::Const(val) => Op::Const(val),
            OperandKind::Local(adr) => Op::Load(self.fit_u8(adr)),
            OperandKind::Static(adr) => Op::GetStatic(self.fit_u16(adr)),
            OperandKind::Field(adr) => Op::GetField(self.fit_u16(adr)),
            OperandKind::Elem if x.ty == Type::Char => Op::BALoad,
            OperandKind::Elem => Op::ALoad,
            OperandKind::Stack | OperandKind::Error => return Ok(()),
            OperandKind::Method(_) => return Err(CodeError::MethodAsValue),
        };
        self.emit(op);
        x.kind = OperandKind::Stack;
        Ok(())
    }

    /// Pops the top of the stack into the location `x`.
    pub fn store(&mut self, x: &Operand) -> Result<(), CodeError> {
        let op = match x.kind {
            OperandKind::Local(adr) => Op::Store(self.fit_u8(adr)),
            OperandKind::Static(adr) => Op::PutStatic(self.fit_u16(adr)),
            OperandKind::Field(adr) => Op::PutField(self.fit_u16(adr)),
            OperandKind::Elem if x.ty == Type::Char => Op::BAStore,
            OperandKind::Elem => Op::AStore,
            OperandKind::Error => return Ok(()),
            OperandKind::Const(_) => return Err(CodeError::NotAssignable("a constant")),
            OperandKind::Method(_) => return Err(CodeError::NotAssignable("a method")),
            OperandKind::Stack => return Err(CodeError::NotAssignable("an expression")),
        };
        self.emit(op);
        Ok(())
    }

    /// `dest = src`.
    pub fn assign(&mut self, dest: &Operand, src: &mut Operand) -> Result<(), CodeError> {
        self.load(src)?;
        self.store(dest)
    }

    /// Emits a jump taken when `rel` does NOT hold and returns the address
    /// of its target field for a later `fixup`.
    pub fn put_false_jump(&mut self, rel: Relop) -> u16 {
        let adr = self.emit(Op::JumpIf(rel.inverse(), 0));
        adr.saturating_add(1)
    }

    /// Emits an unconditional jump and returns the address of its target
    /// field.
    pub fn put_jump(&mut self, target: u16) -> u16 {
        let adr = self.emit(Op::Jmp(target));
        adr.saturating_add(1)
    }

    /// Points the jump whose target field is at `adr` to the current pc.
    pub fn fixup(&mut self, adr: u16) {
        let target = self.pc();
        self.patch2(adr, target);
    }

    fn patch2(&mut self, adr: u16, value: u16) {
        let adr = adr as usize;
        if let Some(field) = self.buf.get_mut(adr..adr + 2) {
            field.copy_from_slice(&value.to_be_bytes());
        }
    }

    /// Emits the frame setup of a method and returns its entry address.
    pub fn enter(&mut self, params: usize, frame_size: usize) -> u16 {
        let params = self.fit_u8(params);
        let locals = self.fit_u8(frame_size);
        self.emit(Op::Enter { params, locals })
    }

    pub fn exit_and_return(&mut self) {
        self.emit(Op::Exit);
        self.emit(Op::Return);
    }

    /// Run-time failure for a function that ran off its end.
    pub fn missing_return_trap(&mut self) {
        self.emit(Op::Trap(TRAP_MISSING_RETURN));
    }

    pub fn new_array(&mut self, elem: &Type) {
        let size = if *elem == Type::Char {
            ElemSize::Byte
        } else {
            ElemSize::Word
        };
        self.emit(Op::NewArray(size));
    }

    pub fn new_object(&mut self, n_fields: usize) {
        let n = self.fit_u16(n_fields);
        self.emit(Op::New(n));
    }

    /// Finalizes the buffer into the loadable artifact.
    pub fn dump(mut self, data_size: usize) -> ObjectFile {
        let data_size = self.fit_u16(data_size);
        debug!(
            code_size = self.buf.len(),
            data_size,
            main_pc = ?self.main_pc,
            "code generated"
        );
        ObjectFile {
            data_size,
            main_pc: self.main_pc.unwrap_or(0),
            code: self.buf,
        }
    }
}
