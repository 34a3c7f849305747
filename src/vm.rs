//! Reference interpreter for compiled object files.
//!
//! Executes the byte stream directly, one decoded instruction at a time.
//! Heap references are `index + 1` so that 0 can serve as null.

use thiserror::Error;
use tracing::trace;

use crate::bytecode::object_file::ObjectFile;
use crate::bytecode::op::{DecodeError, ElemSize, Op, TRAP_MISSING_RETURN};

/// Widest field `print` and `bprint` will pad to.
pub const MAX_PRINT_WIDTH: usize = 255;

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub max_call_depth: usize,
    pub max_steps: Option<usize>,
    pub max_stack: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 1000,
            max_steps: None,
            max_stack: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("pc {0} is outside the code")]
    PcOutOfRange(usize),

    #[error("stack underflow at {pc}")]
    StackUnderflow { pc: usize },

    #[error("stack size limit exceeded ({0})")]
    StackOverflow(usize),

    #[error("call depth limit exceeded ({0}) - possible infinite recursion")]
    CallDepth(usize),

    #[error("execution step limit exceeded ({0})")]
    StepLimit(usize),

    #[error("no frame for local access at {pc}")]
    NoFrame { pc: usize },

    #[error("invalid {what} {index} at {pc}")]
    BadAddress {
        what: &'static str,
        index: usize,
        pc: usize,
    },

    #[error("division by zero at {pc}")]
    DivisionByZero { pc: usize },

    #[error("null reference at {pc}")]
    NullReference { pc: usize },

    #[error("index {index} out of bounds for length {len} at {pc}")]
    IndexOutOfBounds { index: i32, len: usize, pc: usize },

    #[error("negative array size {size} at {pc}")]
    NegativeSize { size: i32, pc: usize },

    #[error("wrong kind of object at {pc}")]
    WrongObject { pc: usize },

    #[error("end of input at {pc}")]
    EndOfInput { pc: usize },

    #[error("trap {code} at {pc}{}", trap_hint(.code))]
    Trap { code: u8, pc: usize },
}

#[derive(Debug)]
enum HeapObject {
    Record(Vec<i32>),
    Words(Vec<i32>),
    Bytes(Vec<u8>),
}

#[derive(Debug)]
pub struct Vm {
    config: VmConfig,
    code: Vec<u8>,
    main_pc: usize,
    globals: Vec<i32>,
    heap: Vec<HeapObject>,
    stack: Vec<i32>,
    /// Local variables of the active methods.
    frames: Vec<Vec<i32>>,
    /// Return addresses.
    calls: Vec<usize>,
    input: Vec<char>,
    input_pos: usize,
    output: String,
    visits: Vec<u32>,
    steps: usize,
}

impl Vm {
    pub fn new(object: &ObjectFile) -> Self {
        Self::with_config(object, VmConfig::default())
    }

    pub fn with_config(object: &ObjectFile, config: VmConfig) -> Self {
        Vm {
            config,
            code: object.code.clone(),
            main_pc: object.main_pc as usize,
            globals: vec![0; object.data_size as usize],
            heap: Vec::new(),
            stack: Vec::new(),
            frames: Vec::new(),
            calls: Vec::new(),
            input: Vec::new(),
            input_pos: 0,
            output: String::new(),
            visits: vec![0; object.code.len()],
            steps: 0,
        }
    }

    /// Text consumed by `read` and `bread`.
    pub fn with_input(mut self, input: &str) -> Self {
        self.input = input.chars().collect();
        self.input_pos = 0;
        self
    }

    /// Everything printed so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn globals(&self) -> &[i32] {
        &self.globals
    }

    /// How many times the instruction at `pc` was executed.
    pub fn visits(&self, pc: usize) -> u32 {
        self.visits.get(pc).copied().unwrap_or(0)
    }

    /// Runs from `main` until its final `return`.
    pub fn run(&mut self) -> Result<(), VmError> {
        let mut pc = self.main_pc;

        loop {
            self.check_limits()?;

            let (op, next) = Op::decode(&self.code, pc).map_err(|e| match e {
                DecodeError::Truncated { pc } if pc >= self.code.len() => VmError::PcOutOfRange(pc),
                other => VmError::Decode(other),
            })?;
            if let Some(count) = self.visits.get_mut(pc) {
                *count += 1;
            }
            trace!(pc, ?op, depth = self.stack.len(), "step");

            let here = pc;
            pc = next;

            match op {
                Op::Load(slot) => {
                    let value = *self.local(slot, here)?;
                    self.push(value)?;
                }
                Op::Store(slot) => {
                    let value = self.pop(here)?;
                    *self.local(slot, here)? = value;
                }
                Op::GetStatic(adr) => {
                    let value = *self.global(adr, here)?;
                    self.push(value)?;
                }
                Op::PutStatic(adr) => {
                    let value = self.pop(here)?;
                    *self.global(adr, here)? = value;
                }
                Op::GetField(adr) => {
                    let obj = self.pop(here)?;
                    let value = *self.field(obj, adr, here)?;
                    self.push(value)?;
                }
                Op::PutField(adr) => {
                    let value = self.pop(here)?;
                    let obj = self.pop(here)?;
                    *self.field(obj, adr, here)? = value;
                }
                Op::Const(n) => self.push(n)?,

                Op::Add => self.binary(here, |a, b| Ok(a.wrapping_add(b)))?,
                Op::Sub => self.binary(here, |a, b| Ok(a.wrapping_sub(b)))?,
                Op::Mul => self.binary(here, |a, b| Ok(a.wrapping_mul(b)))?,
                Op::Div => self.binary(here, |a, b| {
                    if b == 0 {
                        return Err(VmError::DivisionByZero { pc: here });
                    }
                    Ok(a.wrapping_div(b))
                })?,
                Op::Rem => self.binary(here, |a, b| {
                    if b == 0 {
                        return Err(VmError::DivisionByZero { pc: here });
                    }
                    Ok(a.wrapping_rem(b))
                })?,
                Op::Neg => {
                    let a = self.pop(here)?;
                    self.push(a.wrapping_neg())?;
                }

                Op::New(n_fields) => {
                    let obj = self.alloc(HeapObject::Record(vec![0; n_fields as usize]));
                    self.push(obj)?;
                }
                Op::NewArray(elem) => {
                    let size = self.pop(here)?;
                    let len =
                        usize::try_from(size).map_err(|_| VmError::NegativeSize { size, pc: here })?;
                    let array = match elem {
                        ElemSize::Byte => HeapObject::Bytes(vec![0; len]),
                        ElemSize::Word => HeapObject::Words(vec![0; len]),
                    };
                    let obj = self.alloc(array);
                    self.push(obj)?;
                }
                Op::ALoad | Op::BALoad => {
                    let index = self.pop(here)?;
                    let array = self.pop(here)?;
                    let value = self.load_elem(array, index, here)?;
                    self.push(value)?;
                }
                Op::AStore | Op::BAStore => {
                    let value = self.pop(here)?;
                    let index = self.pop(here)?;
                    let array = self.pop(here)?;
                    self.store_elem(array, index, value, here)?;
                }
                Op::ArrayLength => {
                    let array = self.pop(here)?;
                    let len = match self.heap_object(array, here)? {
                        HeapObject::Words(words) => words.len(),
                        HeapObject::Bytes(bytes) => bytes.len(),
                        HeapObject::Record(_) => return Err(VmError::WrongObject { pc: here }),
                    };
                    self.push(len as i32)?;
                }
                Op::Pop => {
                    self.pop(here)?;
                }

                Op::Jmp(target) => pc = target as usize,
                Op::JumpIf(rel, target) => {
                    let b = self.pop(here)?;
                    let a = self.pop(here)?;
                    if rel.holds(a, b) {
                        pc = target as usize;
                    }
                }
                Op::Call(target) => {
                    if self.calls.len() >= self.config.max_call_depth {
                        return Err(VmError::CallDepth(self.config.max_call_depth));
                    }
                    self.calls.push(pc);
                    pc = target as usize;
                }
                Op::Return => match self.calls.pop() {
                    Some(ret) => pc = ret,
                    None => return Ok(()),
                },
                Op::Enter { params, locals } => {
                    let mut frame = vec![0; (locals as usize).max(params as usize)];
                    for slot in (0..params as usize).rev() {
                        frame[slot] = self.pop(here)?;
                    }
                    self.frames.push(frame);
                }
                Op::Exit => {
                    self.frames.pop().ok_or(VmError::NoFrame { pc: here })?;
                }

                Op::Read => {
                    let value = self.read_int(here)?;
                    self.push(value)?;
                }
                Op::BRead => {
                    let ch = self.read_char(here)?;
                    self.push(ch as i32)?;
                }
                Op::Print => {
                    let width = self.print_width(here)?;
                    let value = self.pop(here)?;
                    self.output.push_str(&format!("{:>width$}", value, width = width));
                }
                Op::BPrint => {
                    let width = self.print_width(here)?;
                    let value = self.pop(here)?;
                    let ch = char::from_u32(value as u32).unwrap_or('?');
                    self.output.push_str(&format!("{:>width$}", ch, width = width));
                }

                Op::Trap(code) => return Err(VmError::Trap { code, pc: here }),
            }
        }
    }

    // Execution

    fn check_limits(&mut self) -> Result<(), VmError> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(VmError::StepLimit(max));
            }
        }
        Ok(())
    }

    fn push(&mut self, value: i32) -> Result<(), VmError> {
        if self.stack.len() >= self.config.max_stack {
            return Err(VmError::StackOverflow(self.config.max_stack));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self, pc: usize) -> Result<i32, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow { pc })
    }

    fn print_width(&mut self, pc: usize) -> Result<usize, VmError> {
        let width = self.pop(pc)?;
        Ok(usize::try_from(width).unwrap_or(0).min(MAX_PRINT_WIDTH))
    }

    fn binary(
        &mut self,
        pc: usize,
        f: impl FnOnce(i32, i32) -> Result<i32, VmError>,
    ) -> Result<(), VmError> {
        let b = self.pop(pc)?;
        let a = self.pop(pc)?;
        let result = f(a, b)?;
        self.push(result)
    }

    fn local(&mut self, slot: u8, pc: usize) -> Result<&mut i32, VmError> {
        let frame = self.frames.last_mut().ok_or(VmError::NoFrame { pc })?;
        frame.get_mut(slot as usize).ok_or(VmError::BadAddress {
            what: "local",
            index: slot as usize,
            pc,
        })
    }

    fn global(&mut self, adr: u16, pc: usize) -> Result<&mut i32, VmError> {
        self.globals.get_mut(adr as usize).ok_or(VmError::BadAddress {
            what: "global",
            index: adr as usize,
            pc,
        })
    }

    // Heap

    fn alloc(&mut self, obj: HeapObject) -> i32 {
        self.heap.push(obj);
        self.heap.len() as i32
    }

    fn heap_object(&mut self, reference: i32, pc: usize) -> Result<&mut HeapObject, VmError> {
        if reference == 0 {
            return Err(VmError::NullReference { pc });
        }
        let index = usize::try_from(reference - 1).map_err(|_| VmError::WrongObject { pc })?;
        self.heap.get_mut(index).ok_or(VmError::WrongObject { pc })
    }

    fn field(&mut self, reference: i32, adr: u16, pc: usize) -> Result<&mut i32, VmError> {
        match self.heap_object(reference, pc)? {
            HeapObject::Record(fields) => fields.get_mut(adr as usize).ok_or(VmError::BadAddress {
                what: "field",
                index: adr as usize,
                pc,
            }),
            _ => Err(VmError::WrongObject { pc }),
        }
    }

    fn load_elem(&mut self, reference: i32, index: i32, pc: usize) -> Result<i32, VmError> {
        match self.heap_object(reference, pc)? {
            HeapObject::Words(words) => {
                let slot = element(index, words.len(), pc)?;
                Ok(words[slot])
            }
            HeapObject::Bytes(bytes) => {
                let slot = element(index, bytes.len(), pc)?;
                Ok(bytes[slot] as i32)
            }
            HeapObject::Record(_) => Err(VmError::WrongObject { pc }),
        }
    }

    fn store_elem(&mut self, reference: i32, index: i32, value: i32, pc: usize) -> Result<(), VmError> {
        match self.heap_object(reference, pc)? {
            HeapObject::Words(words) => {
                let slot = element(index, words.len(), pc)?;
                words[slot] = value;
            }
            HeapObject::Bytes(bytes) => {
                let slot = element(index, bytes.len(), pc)?;
                bytes[slot] = value as u8;
            }
            HeapObject::Record(_) => return Err(VmError::WrongObject { pc }),
        }
        Ok(())
    }

    // Input

    fn read_char(&mut self, pc: usize) -> Result<char, VmError> {
        let ch = *self
            .input
            .get(self.input_pos)
            .ok_or(VmError::EndOfInput { pc })?;
        self.input_pos += 1;
        Ok(ch)
    }

    /// Reads an optionally signed decimal number, skipping leading
    /// whitespace.
    fn read_int(&mut self, pc: usize) -> Result<i32, VmError> {
        while self
            .input
            .get(self.input_pos)
            .is_some_and(|ch| ch.is_whitespace())
        {
            self.input_pos += 1;
        }

        let negative = self.input.get(self.input_pos) == Some(&'-');
        if negative {
            self.input_pos += 1;
        }

        let mut value: i32 = 0;
        let mut digits = 0;
        while let Some(digit) = self.input.get(self.input_pos).and_then(|ch| ch.to_digit(10)) {
            value = value.wrapping_mul(10).wrapping_add(digit as i32);
            digits += 1;
            self.input_pos += 1;
        }

        if digits == 0 {
            return Err(VmError::EndOfInput { pc });
        }
        Ok(if negative { value.wrapping_neg() } else { value })
    }
}

fn trap_hint(code: &u8) -> &'static str {
    if *code == TRAP_MISSING_RETURN {
        ": function ended without return"
    } else {
        ""
    }
}

fn element(index: i32, len: usize, pc: usize) -> Result<usize, VmError> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < len)
        .ok_or(VmError::IndexOutOfBounds { index, len, pc })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::Relop;
    use pretty_assertions::assert_eq;

    fn object(ops: &[Op], data_size: u16) -> ObjectFile {
        let mut code = Vec::new();
        for op in ops {
            op.encode(&mut code);
        }
        ObjectFile {
            data_size,
            main_pc: 0,
            code,
        }
    }

    fn run(ops: &[Op]) -> Result<Vm, VmError> {
        let mut vm = Vm::new(&object(ops, 2));
        vm.run()?;
        Ok(vm)
    }

    #[test]
    fn test_arithmetic_and_print() {
        let vm = run(&[
            Op::Enter { params: 0, locals: 0 },
            Op::Const(6),
            Op::Const(7),
            Op::Mul,
            Op::Const(4),
            Op::Print,
            Op::Exit,
            Op::Return,
        ])
        .unwrap();
        assert_eq!(vm.output(), "  42");
    }

    #[test]
    fn test_print_width_is_capped() {
        let vm = run(&[
            Op::Enter { params: 0, locals: 0 },
            Op::Const(7),
            Op::Const(2_000_000_000),
            Op::Print,
            Op::Const('x' as i32),
            Op::Const(-5),
            Op::BPrint,
            Op::Exit,
            Op::Return,
        ])
        .unwrap();
        assert_eq!(vm.output().len(), MAX_PRINT_WIDTH + 1);
        assert!(vm.output().ends_with("7x"));
    }

    #[test]
    fn test_division_by_zero() {
        let err = run(&[Op::Const(1), Op::Const(0), Op::Div]).unwrap_err();
        assert_eq!(err, VmError::DivisionByZero { pc: 2 });
    }

    #[test]
    fn test_conditional_jump() {
        // 0: const_1  1: const_2  2: jlt 13  5: const 99  10: putstatic  13: return
        let vm = run(&[
            Op::Const(1),
            Op::Const(2),
            Op::JumpIf(Relop::Lt, 13),
            Op::Const(99),
            Op::PutStatic(0),
            Op::Return,
        ])
        .unwrap();
        assert_eq!(vm.globals()[0], 0);
        assert_eq!(vm.visits(5), 0);
    }

    #[test]
    fn test_arrays_and_records() {
        let vm = run(&[
            Op::Const(3),
            Op::NewArray(ElemSize::Byte),
            Op::PutStatic(0),
            Op::GetStatic(0),
            Op::Const(2),
            Op::Const(65),
            Op::BAStore,
            Op::GetStatic(0),
            Op::Const(2),
            Op::BALoad,
            Op::Const(0),
            Op::BPrint,
            Op::New(2),
            Op::PutStatic(1),
            Op::GetStatic(1),
            Op::Const(5),
            Op::PutField(1),
            Op::GetStatic(1),
            Op::GetField(1),
            Op::Const(0),
            Op::Print,
            Op::Return,
        ])
        .unwrap();
        assert_eq!(vm.output(), "A5");
    }

    #[test]
    fn test_index_out_of_bounds() {
        let err = run(&[
            Op::Const(1),
            Op::NewArray(ElemSize::Word),
            Op::Const(1),
            Op::ALoad,
        ])
        .unwrap_err();
        assert!(matches!(err, VmError::IndexOutOfBounds { index: 1, len: 1, .. }));
    }

    #[test]
    fn test_null_reference() {
        let err = run(&[Op::GetStatic(0), Op::ArrayLength]).unwrap_err();
        assert!(matches!(err, VmError::NullReference { .. }));
    }

    #[test]
    fn test_trap() {
        let err = run(&[Op::Trap(TRAP_MISSING_RETURN)]).unwrap_err();
        assert_eq!(err, VmError::Trap { code: 1, pc: 0 });
        assert!(err.to_string().contains("without return"));
    }

    #[test]
    fn test_read_input() {
        let mut vm = Vm::new(&object(
            &[
                Op::Read,
                Op::BRead,
                Op::Pop,
                Op::BRead,
                Op::Const(0),
                Op::BPrint,
                Op::Const(0),
                Op::Print,
                Op::Return,
            ],
            0,
        ))
        .with_input(" -12 x");
        vm.run().unwrap();
        assert_eq!(vm.output(), "x-12");
    }

    #[test]
    fn test_step_limit() {
        let config = VmConfig {
            max_steps: Some(50),
            ..VmConfig::default()
        };
        let mut vm = Vm::with_config(&object(&[Op::Jmp(0)], 0), config);
        assert_eq!(vm.run(), Err(VmError::StepLimit(50)));
    }
}
