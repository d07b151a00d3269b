//! Assembly text emitter
//!
//! Walks a backend [`AsmProgram`] and renders it as AT&T-syntax x86-64 text
//! consumable by an external assembler. This is the thinnest stage in the
//! pipeline: instruction selection already happened in `backend::lower`, so
//! this module's only job is picking the right mnemonic suffix/operand
//! syntax per `AssemblyType` and writing it out.

use std::fmt::Write as _;

use crate::backend::ast::{
    AsmBinaryOp, AsmProgram, AsmUnaryOp, AssemblyType, CondCode, Instruction, Operand, Reg, TopLevel,
};
use crate::symbol::StaticInit;

/// Mirrors the teacher's `CodeGenError`: a logical error (bad tree shape) and
/// a formatting error (writing into the output buffer failed), both
/// propagated with `?` rather than modeled as fatal-only.
#[derive(Debug)]
pub enum EmitError {
    Logic(String),
    Format(std::fmt::Error),
}

impl std::fmt::Display for EmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmitError::Logic(s) => write!(f, "{s}"),
            EmitError::Format(e) => write!(f, "assembly emission error: {e}"),
        }
    }
}

impl std::error::Error for EmitError {}

impl From<std::fmt::Error> for EmitError {
    fn from(e: std::fmt::Error) -> Self {
        EmitError::Format(e)
    }
}

impl From<String> for EmitError {
    fn from(s: String) -> Self {
        EmitError::Logic(s)
    }
}

type EResult<T> = Result<T, EmitError>;

pub fn emit_program(program: &AsmProgram) -> EResult<String> {
    let mut out = String::new();
    for top in &program.top_levels {
        emit_top_level(&mut out, top)?;
    }
    writeln!(out, "    .section .note.GNU-stack,\"\",@progbits")?;
    Ok(out)
}

fn emit_top_level(out: &mut String, top: &TopLevel) -> EResult<()> {
    match top {
        TopLevel::Function { name, is_global, instructions } => {
            if *is_global {
                writeln!(out, "    .globl {name}")?;
            }
            writeln!(out, "    .text")?;
            writeln!(out, "{name}:")?;
            writeln!(out, "    pushq %rbp")?;
            writeln!(out, "    movq %rsp, %rbp")?;
            for instr in instructions {
                emit_instruction(out, instr)?;
            }
            Ok(())
        }
        TopLevel::StaticVariable { name, is_global, alignment, init } => {
            if *is_global {
                writeln!(out, "    .globl {name}")?;
            }
            if init.iter().all(is_zero_initializer) {
                writeln!(out, "    .bss")?;
            } else {
                writeln!(out, "    .data")?;
            }
            writeln!(out, "    .align {alignment}")?;
            writeln!(out, "{name}:")?;
            emit_static_init(out, init)
        }
        TopLevel::StaticConstant { name, alignment, init } => {
            writeln!(out, "    .section .rodata")?;
            writeln!(out, "    .align {alignment}")?;
            writeln!(out, "{name}:")?;
            emit_static_init(out, init)
        }
    }
}

fn emit_static_init(out: &mut String, init: &[StaticInit]) -> EResult<()> {
    for entry in init {
        match entry {
            StaticInit::Int(n) => writeln!(out, "    .long {n}")?,
            StaticInit::UInt(n) => writeln!(out, "    .long {n}")?,
            StaticInit::Long(n) => writeln!(out, "    .quad {n}")?,
            StaticInit::ULong(n) => writeln!(out, "    .quad {n}")?,
            StaticInit::Double(d) => writeln!(out, "    .quad {}", d.to_bits())?,
            StaticInit::Char(n) => writeln!(out, "    .byte {n}")?,
            StaticInit::UChar(n) => writeln!(out, "    .byte {n}")?,
            StaticInit::ZeroBytes(n) => writeln!(out, "    .zero {n}")?,
            StaticInit::StringPointer(label) => writeln!(out, "    .quad {label}")?,
            StaticInit::String { value, null_terminated } => {
                if *null_terminated {
                    writeln!(out, "    .asciz \"{}\"", escape(value))?;
                } else {
                    writeln!(out, "    .ascii \"{}\"", escape(value))?;
                }
            }
        }
    }
    Ok(())
}

/// A static variable whose initializer is entirely zero bytes belongs in
/// `.bss` rather than `.data`, so the linker doesn't waste file space on it.
fn is_zero_initializer(entry: &StaticInit) -> bool {
    match entry {
        StaticInit::Int(n) => *n == 0,
        StaticInit::UInt(n) => *n == 0,
        StaticInit::Long(n) => *n == 0,
        StaticInit::ULong(n) => *n == 0,
        StaticInit::Double(d) => *d == 0.0,
        StaticInit::Char(n) => *n == 0,
        StaticInit::UChar(n) => *n == 0,
        StaticInit::ZeroBytes(_) => true,
        StaticInit::StringPointer(_) | StaticInit::String { .. } => false,
    }
}

fn escape(s: &str) -> String {
    s.chars()
        .flat_map(|c| match c {
            '"' => vec!['\\', '"'],
            '\\' => vec!['\\', '\\'],
            '\n' => vec!['\\', 'n'],
            other => vec![other],
        })
        .collect()
}

fn emit_instruction(out: &mut String, instr: &Instruction) -> EResult<()> {
    match instr {
        Instruction::Mov { asm_type, src, dst } => {
            writeln!(out, "    {} {}, {}", mnemonic("mov", *asm_type), operand(src, *asm_type), operand(dst, *asm_type))?
        }
        Instruction::Movsx { src, dst } => writeln!(out, "    movslq {}, {}", operand(src, AssemblyType::LongWord), operand(dst, AssemblyType::QuadWord))?,
        Instruction::MovZeroExtend { src, dst } => writeln!(out, "    movl {}, {}", operand(src, AssemblyType::LongWord), operand(dst, AssemblyType::LongWord))?,
        Instruction::Lea { src, dst } => writeln!(out, "    leaq {}, {}", operand(src, AssemblyType::QuadWord), operand(dst, AssemblyType::QuadWord))?,
        Instruction::Cvttsd2si { asm_type, src, dst } => {
            writeln!(out, "    cvttsd2si {}, {}", operand(src, AssemblyType::BackendDouble), operand(dst, *asm_type))?
        }
        Instruction::Cvtsi2sd { asm_type, src, dst } => {
            writeln!(out, "    cvtsi2sd {}, {}", operand(src, *asm_type), operand(dst, AssemblyType::BackendDouble))?
        }
        Instruction::Unary { op, asm_type, operand: operand_val } => {
            writeln!(out, "    {} {}", mnemonic(unary_mnemonic(*op), *asm_type), operand(operand_val, *asm_type))?
        }
        Instruction::Binary { op, asm_type, src, dst } => {
            writeln!(out, "    {} {}, {}", mnemonic(binary_mnemonic(*op), *asm_type), operand(src, *asm_type), operand(dst, *asm_type))?
        }
        Instruction::Idiv { asm_type, operand: operand_val } => writeln!(out, "    {} {}", mnemonic("idiv", *asm_type), operand(operand_val, *asm_type))?,
        Instruction::Div { asm_type, operand: operand_val } => writeln!(out, "    {} {}", mnemonic("div", *asm_type), operand(operand_val, *asm_type))?,
        Instruction::Cdq => writeln!(out, "    cdq")?,
        Instruction::Cqo => writeln!(out, "    cqo")?,
        Instruction::Cmp { asm_type, src, dst } => {
            writeln!(out, "    {} {}, {}", mnemonic("cmp", *asm_type), operand(src, *asm_type), operand(dst, *asm_type))?
        }
        Instruction::Jmp(label) => writeln!(out, "    jmp .L{label}")?,
        Instruction::JmpCC { cond, target } => writeln!(out, "    j{} .L{target}", cond_suffix(*cond))?,
        Instruction::SetCC { cond, operand: operand_val } => writeln!(out, "    set{} {}", cond_suffix(*cond), operand(operand_val, AssemblyType::Byte))?,
        Instruction::Label(name) => writeln!(out, ".L{name}:")?,
        Instruction::Push(operand_val) => writeln!(out, "    pushq {}", operand(operand_val, AssemblyType::QuadWord))?,
        Instruction::Call(name) => writeln!(out, "    call {name}")?,
        Instruction::Ret => {
            writeln!(out, "    movq %rbp, %rsp")?;
            writeln!(out, "    popq %rbp")?;
            writeln!(out, "    ret")?
        }
    }
    Ok(())
}

fn mnemonic(base: &str, ty: AssemblyType) -> String {
    let suffix = match ty {
        AssemblyType::Byte => "b",
        AssemblyType::LongWord => "l",
        AssemblyType::QuadWord => "q",
        AssemblyType::BackendDouble => "sd",
    };
    format!("{base}{suffix}")
}

fn unary_mnemonic(op: AsmUnaryOp) -> &'static str {
    match op {
        AsmUnaryOp::Neg => "neg",
        AsmUnaryOp::Not => "not",
    }
}

fn binary_mnemonic(op: AsmBinaryOp) -> &'static str {
    match op {
        AsmBinaryOp::Add => "add",
        AsmBinaryOp::Sub => "sub",
        AsmBinaryOp::Mult => "imul",
        AsmBinaryOp::DivDouble => "div",
        AsmBinaryOp::And => "and",
        AsmBinaryOp::Or => "or",
        AsmBinaryOp::Xor => "xor",
        AsmBinaryOp::Shl => "shl",
        AsmBinaryOp::ShrArithmetic => "sar",
        AsmBinaryOp::ShrLogical => "shr",
    }
}

fn cond_suffix(cond: CondCode) -> &'static str {
    match cond {
        CondCode::E => "e",
        CondCode::NE => "ne",
        CondCode::G => "g",
        CondCode::GE => "ge",
        CondCode::L => "l",
        CondCode::LE => "le",
        CondCode::A => "a",
        CondCode::AE => "ae",
        CondCode::B => "b",
        CondCode::BE => "be",
    }
}

fn reg_name(reg: Reg, ty: AssemblyType) -> &'static str {
    match (reg, ty) {
        (Reg::Ax, AssemblyType::Byte) => "%al",
        (Reg::Ax, AssemblyType::LongWord) => "%eax",
        (Reg::Ax, _) => "%rax",
        (Reg::Cx, AssemblyType::Byte) => "%cl",
        (Reg::Cx, AssemblyType::LongWord) => "%ecx",
        (Reg::Cx, _) => "%rcx",
        (Reg::Dx, AssemblyType::Byte) => "%dl",
        (Reg::Dx, AssemblyType::LongWord) => "%edx",
        (Reg::Dx, _) => "%rdx",
        (Reg::Di, AssemblyType::Byte) => "%dil",
        (Reg::Di, AssemblyType::LongWord) => "%edi",
        (Reg::Di, _) => "%rdi",
        (Reg::Si, AssemblyType::Byte) => "%sil",
        (Reg::Si, AssemblyType::LongWord) => "%esi",
        (Reg::Si, _) => "%rsi",
        (Reg::R8, AssemblyType::Byte) => "%r8b",
        (Reg::R8, AssemblyType::LongWord) => "%r8d",
        (Reg::R8, _) => "%r8",
        (Reg::R9, AssemblyType::Byte) => "%r9b",
        (Reg::R9, AssemblyType::LongWord) => "%r9d",
        (Reg::R9, _) => "%r9",
        (Reg::R10, AssemblyType::Byte) => "%r10b",
        (Reg::R10, AssemblyType::LongWord) => "%r10d",
        (Reg::R10, _) => "%r10",
        (Reg::R11, AssemblyType::Byte) => "%r11b",
        (Reg::R11, AssemblyType::LongWord) => "%r11d",
        (Reg::R11, _) => "%r11",
        (Reg::Sp, _) => "%rsp",
        (Reg::Xmm0, _) => "%xmm0",
        (Reg::Xmm1, _) => "%xmm1",
        (Reg::Xmm2, _) => "%xmm2",
        (Reg::Xmm3, _) => "%xmm3",
        (Reg::Xmm4, _) => "%xmm4",
        (Reg::Xmm5, _) => "%xmm5",
        (Reg::Xmm6, _) => "%xmm6",
        (Reg::Xmm7, _) => "%xmm7",
        (Reg::Xmm14, _) => "%xmm14",
        (Reg::Xmm15, _) => "%xmm15",
    }
}

/// Pseudo registers have no stack-slot allocation pass in this pipeline
/// (out of scope per the component table), so they're rendered as a
/// `%`-free symbolic placeholder keyed by name; a downstream assembler stage
/// integrating this emitter with a real frame allocator would replace this
/// with `offset(%rbp)` operands.
fn operand(op: &Operand, ty: AssemblyType) -> String {
    match op {
        Operand::Immediate(n) => format!("${n}"),
        Operand::ImmediateDouble(bits) => format!("${bits}"),
        Operand::Register(r) => reg_name(*r, ty).to_string(),
        Operand::Pseudo(name) => format!("{name}(%pseudo)"),
        Operand::Memory(base, offset) => format!("{offset}({})", reg_name(*base, AssemblyType::QuadWord)),
        Operand::Data(name) => format!("{name}(%rip)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Identifier;

    #[test]
    fn emits_globl_and_ret_for_trivial_function() {
        let program = AsmProgram {
            top_levels: vec![TopLevel::Function {
                name: Identifier::new("main"),
                is_global: true,
                instructions: vec![
                    Instruction::Mov { asm_type: AssemblyType::LongWord, src: Operand::Immediate(0), dst: Operand::Register(Reg::Ax) },
                    Instruction::Ret,
                ],
            }],
        };
        let text = emit_program(&program).unwrap();
        assert!(text.contains(".globl main"));
        assert!(text.contains("main:"));
        assert!(text.contains("ret"));
    }

    #[test]
    fn static_variable_with_initial_value_goes_in_data_section() {
        let program = AsmProgram {
            top_levels: vec![TopLevel::StaticVariable {
                name: Identifier::new("x"),
                is_global: true,
                alignment: 4,
                init: vec![StaticInit::Int(5)],
            }],
        };
        let text = emit_program(&program).unwrap();
        assert!(text.contains(".data"));
        assert!(text.contains(".long 5"));
    }

    #[test]
    fn tentative_zero_static_goes_in_bss() {
        let program = AsmProgram {
            top_levels: vec![TopLevel::StaticVariable {
                name: Identifier::new("y"),
                is_global: true,
                alignment: 4,
                init: vec![StaticInit::Int(0)],
            }],
        };
        let text = emit_program(&program).unwrap();
        assert!(text.contains(".bss"));
    }
}
