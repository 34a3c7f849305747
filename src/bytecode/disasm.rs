use std::collections::BTreeSet;
use std::fmt::Write;

use crate::bytecode::object_file::ObjectFile;
use crate::bytecode::op::{DecodeError, ElemSize, Op, Relop, decode_all};

/// Renders an object file as an address-annotated listing.
///
/// Jump and call targets get a rule above them and a `►` marker; the entry
/// point is labelled `main:`.
pub fn disassemble(object: &ObjectFile) -> Result<String, DecodeError> {
    let ops = decode_all(&object.code)?;
    let targets = collect_jump_targets(&ops);
    let mut out = String::new();

    let _ = writeln!(
        out,
        "; code {} bytes, data {} words, main at {:04}",
        object.code.len(),
        object.data_size,
        object.main_pc
    );

    for (pc, op) in &ops {
        let is_target = targets.contains(pc);
        if *pc == object.main_pc as usize {
            out.push_str("main:\n");
        } else if is_target {
            out.push_str("      ┌──────────────────────────────────\n");
        }

        let marker = if is_target { "► " } else { "  " };
        let _ = writeln!(out, "{:04} {}{}", pc, marker, format_op(op));
    }

    Ok(out)
}

fn collect_jump_targets(ops: &[(usize, Op)]) -> BTreeSet<usize> {
    ops.iter()
        .filter_map(|(_, op)| match op {
            Op::Jmp(t) | Op::JumpIf(_, t) | Op::Call(t) => Some(*t as usize),
            _ => None,
        })
        .collect()
}

fn relop_mnemonic(rel: Relop) -> &'static str {
    match rel {
        Relop::Eq => "JEQ",
        Relop::Ne => "JNE",
        Relop::Lt => "JLT",
        Relop::Le => "JLE",
        Relop::Gt => "JGT",
        Relop::Ge => "JGE",
    }
}

fn format_op(op: &Op) -> String {
    match op {
        Op::Load(n) => format!("LOAD        {}", n),
        Op::Store(n) => format!("STORE       {}", n),
        Op::GetStatic(a) => format!("GETSTATIC   {}", a),
        Op::PutStatic(a) => format!("PUTSTATIC   {}", a),
        Op::GetField(a) => format!("GETFIELD    {}", a),
        Op::PutField(a) => format!("PUTFIELD    {}", a),
        Op::Const(n) => format!("CONST       {}", n),
        Op::New(n) => format!("NEW         {}      ; fields", n),
        Op::NewArray(ElemSize::Byte) => "NEWARRAY    char".to_string(),
        Op::NewArray(ElemSize::Word) => "NEWARRAY    word".to_string(),
        Op::ArrayLength => "ARRAYLENGTH".to_string(),
        Op::Jmp(t) => format!("JMP         → {:04}", t),
        Op::JumpIf(rel, t) => format!("{:<11} → {:04}", relop_mnemonic(*rel), t),
        Op::Call(t) => format!("CALL        → {:04}", t),
        Op::Enter { params, locals } => format!("ENTER       {} {}    ; params, frame", params, locals),
        Op::Trap(code) => format!("TRAP        {}", code),
        other => format!("{:?}", other).to_uppercase(),
    }
}
