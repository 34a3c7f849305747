use super::obj::ObjId;

/// Handle to a class descriptor owned by the symbol table.
///
/// Class types are nominal: two class types are equal only if they share
/// the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub(crate) usize);

/// Type descriptor.
///
/// `None` is the type of void methods. `Error` is the sentinel produced
/// after a reported error; every compatibility check accepts it so that one
/// mistake is reported once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    None,
    Int,
    Char,
    Array(Box<Type>),
    Class(ClassId),
    Error,
}

impl Type {
    pub fn array_of(elem: Type) -> Type {
        Type::Array(Box::new(elem))
    }

    pub fn is_ref_type(&self) -> bool {
        matches!(self, Type::Array(_) | Type::Class(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Type::Error)
    }

    /// Element type of an array, if this is one.
    pub fn elem_type(&self) -> Option<&Type> {
        match self {
            Type::Array(elem) => Some(elem),
            _ => None,
        }
    }

    /// Whether two values of these types may be compared for equality.
    pub fn compatible_with(&self, other: &Type) -> bool {
        match (self, other) {
            (Type::Error, _) | (_, Type::Error) => true,
            (Type::Array(a), Type::Array(b)) => a.compatible_with(b),
            _ => self == other,
        }
    }

    /// Whether a value of this type may be stored into a location of type
    /// `target`.
    ///
    /// An array of `None` elements is the formal parameter type of the
    /// built-in `len` and accepts any array.
    pub fn assignable_to(&self, target: &Type) -> bool {
        match (self, target) {
            (Type::Error, _) | (_, Type::Error) => true,
            (Type::Array(_), Type::Array(elem)) if **elem == Type::None => true,
            _ => self.compatible_with(target),
        }
    }
}

/// Fields of a class, in declaration order.
#[derive(Debug, Clone)]
pub struct ClassType {
    pub name: String,
    pub fields: Vec<ObjId>,
}

impl ClassType {
    pub fn n_fields(&self) -> usize {
        self.fields.len()
    }
}
