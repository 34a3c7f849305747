use super::types::Type;

/// Handle to an entity owned by the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub(crate) usize);

/// The kind requested when declaring a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Const,
    Var,
    Type,
    Method,
    Program,
}

/// Pseudo-methods of the universe scope that never compile to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Ord,
    Chr,
    Len,
}

#[derive(Debug, Clone, Default)]
pub struct MethodInfo {
    pub n_pars: usize,
    /// Parameters first, then local variables.
    pub locals: Vec<ObjId>,
    /// Entry address in the code buffer.
    pub adr: u16,
    pub builtin: Option<Builtin>,
}

#[derive(Debug, Clone)]
pub enum ObjKind {
    Const(i32),
    /// `level` 0 is program-global storage; anything deeper is a frame slot
    /// (or a field, for variables declared in a class body).
    Var {
        adr: usize,
        level: usize,
    },
    Type,
    Method(MethodInfo),
    Program,
    /// Stands in for a name that failed to declare or resolve.
    Error,
}

/// A declared name.
#[derive(Debug, Clone)]
pub struct Obj {
    pub name: String,
    pub kind: ObjKind,
    pub ty: Type,
}

impl Obj {
    pub fn method(&self) -> Option<&MethodInfo> {
        match &self.kind {
            ObjKind::Method(info) => Some(info),
            _ => None,
        }
    }

    pub fn method_mut(&mut self) -> Option<&mut MethodInfo> {
        match &mut self.kind {
            ObjKind::Method(info) => Some(info),
            _ => None,
        }
    }
}
