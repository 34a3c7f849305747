pub mod code;
pub mod disasm;
pub mod object_file;
pub mod op;
pub mod operand;

pub use code::{Code, CodeError};
pub use object_file::{ObjectFile, ObjectFileError};
pub use op::{Op, Relop};
pub use operand::{Operand, OperandKind};
