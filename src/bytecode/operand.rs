use crate::symtab::{ObjId, Type};

/// Where the value of an expression currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandKind {
    Const(i32),
    /// Frame slot of the running method.
    Local(usize),
    /// Global data slot.
    Static(usize),
    /// Field offset; the object reference is already on the stack.
    Field(usize),
    /// Array element; the array reference and the index are on the stack.
    Elem,
    Method(ObjId),
    /// The value has been loaded onto the expression stack.
    Stack,
    /// Produced after a reported error. Loading or storing it emits nothing.
    Error,
}

/// The value or location produced by parsing an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operand {
    pub kind: OperandKind,
    pub ty: Type,
}

impl Operand {
    pub fn new(kind: OperandKind, ty: Type) -> Self {
        Operand { kind, ty }
    }

    pub fn constant(val: i32, ty: Type) -> Self {
        Operand::new(OperandKind::Const(val), ty)
    }

    pub fn on_stack(ty: Type) -> Self {
        Operand::new(OperandKind::Stack, ty)
    }

    pub fn error() -> Self {
        Operand::new(OperandKind::Error, Type::Error)
    }
}
