//! Scope-structured symbol table.
//!
//! Entities and class descriptors live in arenas owned by the table and are
//! referred to by `ObjId` / `ClassId`. Scopes only hold ids, so closing a
//! scope makes its names unreachable while methods and classes that recorded
//! those ids can still see them.

pub mod obj;
pub mod symbol_error;
pub mod types;

use std::collections::HashMap;

use tracing::trace;

pub use obj::{Builtin, EntityKind, MethodInfo, Obj, ObjId, ObjKind};
pub use symbol_error::SymbolError;
pub use types::{ClassId, ClassType, Type};

/// Entities declared directly in one block.
#[derive(Debug, Default)]
pub struct Scope {
    /// Declaration order.
    locals: Vec<ObjId>,
    by_name: HashMap<String, ObjId>,
    n_vars: usize,
}

impl Scope {
    pub fn locals(&self) -> &[ObjId] {
        &self.locals
    }

    pub fn lookup(&self, name: &str) -> Option<ObjId> {
        self.by_name.get(name).copied()
    }

    /// Number of variables declared here; sizes frames and global data.
    pub fn n_vars(&self) -> usize {
        self.n_vars
    }
}

pub struct SymbolTable {
    objs: Vec<Obj>,
    classes: Vec<ClassType>,
    /// `scopes[0]` is the universe and is never popped.
    scopes: Vec<Scope>,
    error_obj: ObjId,
}

impl SymbolTable {
    /// Creates a table whose universe scope holds `int`, `char`, `ord`,
    /// `chr` and `len`.
    pub fn new() -> Self {
        let mut tab = SymbolTable {
            objs: Vec::new(),
            classes: Vec::new(),
            scopes: vec![Scope::default()],
            error_obj: ObjId(0),
        };
        tab.objs.push(Obj {
            name: "???".to_string(),
            kind: ObjKind::Error,
            ty: Type::Error,
        });

        tab.declare_universe("int", EntityKind::Type, Type::Int);
        tab.declare_universe("char", EntityKind::Type, Type::Char);
        tab.declare_builtin("ord", Builtin::Ord, Type::Int, "ch", Type::Char);
        tab.declare_builtin("chr", Builtin::Chr, Type::Char, "i", Type::Int);
        tab.declare_builtin(
            "len",
            Builtin::Len,
            Type::Int,
            "arr",
            Type::array_of(Type::None),
        );
        tab
    }

    fn declare_universe(&mut self, name: &str, kind: EntityKind, ty: Type) -> ObjId {
        // the universe starts empty, so these names cannot clash
        self.insert(kind, name, ty).unwrap_or(self.error_obj)
    }

    fn declare_builtin(
        &mut self,
        name: &str,
        builtin: Builtin,
        ret: Type,
        param: &str,
        param_ty: Type,
    ) {
        let method = self.declare_universe(name, EntityKind::Method, ret);
        self.open_scope();
        let param = self.insert(EntityKind::Var, param, param_ty).unwrap_or(self.error_obj);
        self.close_scope();

        if let Some(info) = self.obj_mut(method).method_mut() {
            info.n_pars = 1;
            info.locals = vec![param];
            info.builtin = Some(builtin);
        }
    }

    pub fn open_scope(&mut self) {
        self.scopes.push(Scope::default());
        trace!(depth = self.scopes.len(), "open scope");
    }

    /// Pops the innermost scope. The universe is never popped.
    pub fn close_scope(&mut self) -> Option<Scope> {
        if self.scopes.len() <= 1 {
            return None;
        }
        trace!(depth = self.scopes.len(), "close scope");
        self.scopes.pop()
    }

    pub fn cur_scope(&self) -> &Scope {
        // scopes is never empty
        &self.scopes[self.scopes.len() - 1]
    }

    fn cur_scope_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Nesting level of the open scope: 0 for the program scope, 1 inside a
    /// method or class body.
    pub fn level(&self) -> usize {
        self.scopes.len().saturating_sub(2)
    }

    /// Declares `name` in the open scope.
    ///
    /// Shadowing a name from an enclosing scope is allowed; redeclaring one
    /// of the same scope is not.
    pub fn insert(&mut self, kind: EntityKind, name: &str, ty: Type) -> Result<ObjId, SymbolError> {
        if self.cur_scope().lookup(name).is_some() {
            return Err(SymbolError::Duplicate(name.to_string()));
        }

        let level = self.level();
        let scope = self.cur_scope_mut();
        let kind = match kind {
            EntityKind::Const => ObjKind::Const(0),
            EntityKind::Var => {
                let adr = scope.n_vars;
                scope.n_vars += 1;
                ObjKind::Var { adr, level }
            }
            EntityKind::Type => ObjKind::Type,
            EntityKind::Method => ObjKind::Method(MethodInfo::default()),
            EntityKind::Program => ObjKind::Program,
        };

        let id = ObjId(self.objs.len());
        self.objs.push(Obj {
            name: name.to_string(),
            kind,
            ty,
        });
        let scope = self.cur_scope_mut();
        scope.locals.push(id);
        scope.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Resolves `name`, searching from the innermost scope outwards.
    pub fn find(&self, name: &str) -> Result<ObjId, SymbolError> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.lookup(name))
            .ok_or_else(|| SymbolError::Undeclared(name.to_string()))
    }

    /// Resolves a field of `class`. Only the class's own fields are searched.
    pub fn find_field(&self, name: &str, class: ClassId) -> Result<ObjId, SymbolError> {
        let desc = self.class(class);
        desc.fields
            .iter()
            .copied()
            .find(|id| self.objs[id.0].name == name)
            .ok_or_else(|| SymbolError::UnknownField {
                field: name.to_string(),
                class: desc.name.clone(),
            })
    }

    /// The shared entity handed out after a failed declaration or lookup.
    pub fn error_obj(&self) -> ObjId {
        self.error_obj
    }

    pub fn obj(&self, id: ObjId) -> &Obj {
        &self.objs[id.0]
    }

    pub fn obj_mut(&mut self, id: ObjId) -> &mut Obj {
        &mut self.objs[id.0]
    }

    /// Allocates an empty class descriptor.
    pub fn new_class(&mut self, name: &str) -> ClassId {
        let id = ClassId(self.classes.len());
        self.classes.push(ClassType {
            name: name.to_string(),
            fields: Vec::new(),
        });
        id
    }

    pub fn class(&self, id: ClassId) -> &ClassType {
        &self.classes[id.0]
    }

    pub fn set_class_fields(&mut self, id: ClassId, fields: Vec<ObjId>) {
        self.classes[id.0].fields = fields;
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_has_builtins() {
        let tab = SymbolTable::new();
        for name in ["int", "char", "ord", "chr", "len"] {
            assert!(tab.find(name).is_ok(), "missing {}", name);
        }

        let len = tab.obj(tab.find("len").unwrap());
        let info = len.method().unwrap();
        assert_eq!(info.builtin, Some(Builtin::Len));
        assert_eq!(info.n_pars, 1);
        assert_eq!(len.ty, Type::Int);
    }

    #[test]
    fn test_duplicate_in_same_scope() {
        let mut tab = SymbolTable::new();
        tab.open_scope();
        let first = tab.insert(EntityKind::Var, "x", Type::Int).unwrap();
        let err = tab.insert(EntityKind::Var, "x", Type::Char).unwrap_err();

        assert_eq!(err, SymbolError::Duplicate("x".to_string()));
        assert_eq!(tab.find("x").unwrap(), first);
        assert_eq!(tab.cur_scope().locals().len(), 1);
        assert_eq!(tab.cur_scope().n_vars(), 1);
    }

    #[test]
    fn test_large_scope_lookup() {
        let mut tab = SymbolTable::new();
        tab.open_scope();
        let ids: Vec<ObjId> = (0..70_000)
            .map(|i| tab.insert(EntityKind::Var, &format!("g{}", i), Type::Int).unwrap())
            .collect();

        assert_eq!(tab.cur_scope().n_vars(), 70_000);
        assert_eq!(tab.cur_scope().lookup("g69999"), Some(ids[69_999]));
        assert_eq!(tab.find("g123").unwrap(), ids[123]);
        assert_eq!(
            tab.insert(EntityKind::Var, "g42", Type::Int),
            Err(SymbolError::Duplicate("g42".to_string()))
        );
    }

    #[test]
    fn test_shadowing_outer_scope() {
        let mut tab = SymbolTable::new();
        tab.open_scope();
        let outer = tab.insert(EntityKind::Var, "x", Type::Int).unwrap();
        tab.open_scope();
        let inner = tab.insert(EntityKind::Var, "x", Type::Char).unwrap();

        assert_eq!(tab.find("x").unwrap(), inner);
        tab.close_scope();
        assert_eq!(tab.find("x").unwrap(), outer);
    }

    #[test]
    fn test_var_addresses_and_levels() {
        let mut tab = SymbolTable::new();
        tab.open_scope();
        let g0 = tab.insert(EntityKind::Var, "a", Type::Int).unwrap();
        tab.insert(EntityKind::Const, "k", Type::Int).unwrap();
        let g1 = tab.insert(EntityKind::Var, "b", Type::Int).unwrap();
        tab.open_scope();
        let l0 = tab.insert(EntityKind::Var, "p", Type::Int).unwrap();

        let slot = |id| match tab.obj(id).kind {
            ObjKind::Var { adr, level } => (adr, level),
            _ => panic!("not a variable"),
        };
        assert_eq!(slot(g0), (0, 0));
        assert_eq!(slot(g1), (1, 0));
        assert_eq!(slot(l0), (0, 1));
    }

    #[test]
    fn test_undeclared_name() {
        let tab = SymbolTable::new();
        assert_eq!(
            tab.find("nope"),
            Err(SymbolError::Undeclared("nope".to_string()))
        );
        assert!(matches!(tab.obj(tab.error_obj()).kind, ObjKind::Error));
        assert_eq!(tab.obj(tab.error_obj()).ty, Type::Error);
    }

    #[test]
    fn test_field_lookup_does_not_walk_outwards() {
        let mut tab = SymbolTable::new();
        tab.open_scope();
        tab.insert(EntityKind::Var, "global", Type::Int).unwrap();

        let class = tab.new_class("Point");
        tab.open_scope();
        tab.insert(EntityKind::Var, "x", Type::Int).unwrap();
        tab.insert(EntityKind::Var, "y", Type::Int).unwrap();
        let fields = tab.cur_scope().locals().to_vec();
        tab.close_scope();
        tab.set_class_fields(class, fields);

        assert_eq!(tab.class(class).n_fields(), 2);
        let y = tab.find_field("y", class).unwrap();
        assert!(matches!(tab.obj(y).kind, ObjKind::Var { adr: 1, .. }));
        assert!(matches!(
            tab.find_field("global", class),
            Err(SymbolError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_universe_is_never_closed() {
        let mut tab = SymbolTable::new();
        assert!(tab.close_scope().is_none());
        assert!(tab.find("int").is_ok());
    }
}
