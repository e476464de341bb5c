//! Textual IR emission.

use std::fmt::Write;

use crate::ir::{BlockId, Declaration, Function, InstId, InstKind, Instruction, MetadataOperand, Module, Type, Value};
use crate::utils::pretty::{format_list_with, CodeFormatter};

/// Writes modules back out in the form the parser reads.
pub struct IrPrinter {
    indent: String,
}

impl Default for IrPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl IrPrinter {
    pub fn new() -> Self {
        Self { indent: "  ".into() }
    }

    /// Print a whole module.
    pub fn print_module(&self, module: &Module) -> String {
        let mut f = CodeFormatter::new(&self.indent);

        for line in &module.header {
            f.writeln(line);
        }
        if !module.header.is_empty() {
            f.newline();
        }

        for func in &module.functions {
            self.write_function(&mut f, func);
            f.newline();
        }

        for decl in &module.declarations {
            f.writeln(&declaration(decl));
        }
        if !module.declarations.is_empty() {
            f.newline();
        }

        for attrs in &module.attributes {
            f.writeln(attrs);
        }
        if !module.attributes.is_empty() {
            f.newline();
        }

        for named in &module.named_metadata {
            let nodes = format_list_with(&named.nodes, ", ", |n| format!("!{}", n));
            f.writeln(&format!("!{} = !{{{}}}", named.name, nodes));
        }
        for (id, operands) in &module.metadata {
            f.writeln(&format!("!{} = {}", id, metadata_body(operands)));
        }

        f.finish()
    }

    /// Print a single function definition.
    pub fn print_function(&self, func: &Function) -> String {
        let mut f = CodeFormatter::new(&self.indent);
        self.write_function(&mut f, func);
        f.finish()
    }

    fn write_function(&self, f: &mut CodeFormatter, func: &Function) {
        let params = format_list_with(&func.params, ", ", |p| format!("{} %{}", p.ty, p.name));
        let header = format!("define {} @{}({})", func.ret_ty, func.name, params);
        f.block(&header, |f| {
            for &block in func.layout() {
                f.label(func.block_name(block));
                for &id in func.block(block).insts() {
                    f.writeln(&instruction(func, func.inst(id), id));
                }
            }
        });
    }
}

fn declaration(decl: &Declaration) -> String {
    let mut params: Vec<String> = decl.params.iter().map(Type::to_string).collect();
    if decl.varargs {
        params.push("...".into());
    }
    format!("declare {} @{}({})", decl.ret_ty, decl.name, params.join(", "))
}

fn metadata_body(operands: &[MetadataOperand]) -> String {
    if let [MetadataOperand::Raw(text)] = operands {
        return text.clone();
    }
    let parts = format_list_with(operands, ", ", |op| match op {
        MetadataOperand::Function(name) => format!("ptr @{}", name),
        MetadataOperand::String(s) => format!("!\"{}\"", s),
        MetadataOperand::Int(ty, v) => format!("{} {}", ty, v),
        MetadataOperand::Node(n) => format!("!{}", n),
        MetadataOperand::Null => "null".into(),
        MetadataOperand::Raw(text) => text.clone(),
    });
    format!("!{{{}}}", parts)
}

/// An operand as it appears in text.
pub fn operand(func: &Function, value: &Value) -> String {
    match value {
        Value::Inst(_) | Value::Param(_) => format!("%{}", func.value_name(value)),
        Value::Const(c) => c.to_string(),
        Value::Function(name) => format!("@{}", name),
    }
}

/// One instruction as it appears in text, without indentation.
pub fn format_instruction(func: &Function, id: InstId) -> String {
    instruction(func, func.inst(id), id)
}

fn typed(func: &Function, value: &Value) -> String {
    format!("{} {}", func.value_type(value), operand(func, value))
}

fn instruction(func: &Function, inst: &Instruction, id: InstId) -> String {
    let mut line = String::new();
    if inst.ty != Type::Void {
        let _ = write!(line, "%{} = ", func.value_name(&Value::Inst(id)));
    }

    let block = |b: &BlockId| format!("%{}", func.block_name(*b));

    let body = match &inst.kind {
        InstKind::Phi { incoming } => {
            let pairs = format_list_with(incoming, ", ", |(v, b)| format!("[ {}, {} ]", operand(func, v), block(b)));
            format!("phi {} {}", inst.ty, pairs)
        }
        InstKind::Binary { op, lhs, rhs } => {
            format!("{} {}, {}", op.mnemonic(), typed(func, lhs), operand(func, rhs))
        }
        InstKind::Cast { op, value } => format!("{} {} to {}", op.mnemonic(), typed(func, value), inst.ty),
        InstKind::ICmp { pred, lhs, rhs } => {
            format!("icmp {} {}, {}", pred.mnemonic(), typed(func, lhs), operand(func, rhs))
        }
        InstKind::FCmp { pred, lhs, rhs } => {
            format!("fcmp {} {}, {}", pred.mnemonic(), typed(func, lhs), operand(func, rhs))
        }
        InstKind::Select {
            cond,
            then_value,
            else_value,
        } => format!(
            "select {}, {}, {}",
            typed(func, cond),
            typed(func, then_value),
            typed(func, else_value)
        ),
        InstKind::GetElementPtr { elem_ty, base, indices } => {
            let mut text = format!("getelementptr {}, {}", elem_ty, typed(func, base));
            for index in indices {
                let _ = write!(text, ", {}", typed(func, index));
            }
            text
        }
        InstKind::Load { addr } => format!("load {}, {}", inst.ty, typed(func, addr)),
        InstKind::Store { value, addr } => format!("store {}, {}", typed(func, value), typed(func, addr)),
        InstKind::Call { callee, args } => {
            let args = format_list_with(args, ", ", |a| typed(func, a));
            format!("call {} @{}({})", inst.ty, callee, args)
        }
        InstKind::Br { dest } => format!("br label {}", block(dest)),
        InstKind::CondBr {
            cond,
            then_dest,
            else_dest,
        } => format!(
            "br {}, label {}, label {}",
            typed(func, cond),
            block(then_dest),
            block(else_dest)
        ),
        InstKind::Ret { value: None } => "ret void".into(),
        InstKind::Ret { value: Some(v) } => format!("ret {}", typed(func, v)),
        InstKind::Unreachable => "unreachable".into(),
    };
    line.push_str(&body);
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_module;

    const SOURCE: &str = r#"target triple = "nvptx64-nvidia-cuda"

define void @k(ptr %A, i32 %N) {
entry:
  br label %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
  %idx = sext i32 %i to i64
  %p = getelementptr float, ptr %A, i64 %idx
  %v = load float, ptr %p
  %w = fadd float %v, 1.0
  store float %w, ptr %p
  call void @sync()
  %i.next = add i32 %i, 1
  %c = icmp slt i32 %i.next, %N
  br i1 %c, label %loop, label %exit
exit:
  ret void
}

declare void @sync()

!nvvm.annotations = !{!0}
!0 = !{ptr @k, !"kernel", i32 1}
"#;

    #[test]
    fn test_prints_parsed_text_verbatim() {
        let module = parse_module(SOURCE).expect("parses");
        let printed = IrPrinter::new().print_module(&module);
        assert_eq!(printed, SOURCE);
    }

    #[test]
    fn test_round_trip_is_stable() {
        let module = parse_module(SOURCE).expect("parses");
        let printer = IrPrinter::new();
        let first = printer.print_module(&module);
        let reparsed = parse_module(&first).expect("printed text parses");
        assert_eq!(printer.print_module(&reparsed), first);
    }

    #[test]
    fn test_raw_metadata_passes_through() {
        let module = parse_module("!3 = !DILocation(line: 4, column: 2, scope: !5)\n").expect("parses");
        let printed = IrPrinter::new().print_module(&module);
        assert_eq!(printed, "!3 = !DILocation(line: 4, column: 2, scope: !5)\n");
    }
}
