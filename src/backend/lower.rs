//! Backend lowering: TAC to assembly
//!
//! A pure, local rewrite per TAC instruction (§4.7): each instruction becomes
//! one or a short fixed sequence of assembly instructions, operating on
//! `Pseudo` operands the emitter resolves to stack-resident locals. Signed
//! vs. unsigned division and FP comparison-flag handling follow the usual
//! x86-64 conventions but are not specified in fine detail; this lowering
//! picks one consistent convention throughout rather than leaving gaps.

use crate::ast::Type;
use crate::intern::{Constant, Identifier};
use crate::symbol::{StructTable, Symbol, SymbolTable};
use crate::tac;
use crate::typecheck::type_size_align;

use super::ast::{
    AggregateLayout, AsmBinaryOp, AsmProgram, AsmUnaryOp, AssemblyType, CondCode, Instruction, Operand, Reg, TopLevel,
    DOUBLE_ARG_REGS, INT_ARG_REGS,
};

pub struct BackendLowering<'a> {
    symbols: &'a SymbolTable,
    structs: &'a StructTable,
    instructions: Vec<Instruction>,
}

impl<'a> BackendLowering<'a> {
    pub fn new(symbols: &'a SymbolTable, structs: &'a StructTable) -> Self {
        BackendLowering { symbols, structs, instructions: Vec::new() }
    }

    pub fn lower_program(&mut self, program: &tac::TacProgram) -> AsmProgram {
        let top_levels = program.top_levels.iter().map(|t| self.lower_top_level(t)).collect();
        AsmProgram { top_levels }
    }

    fn lower_top_level(&mut self, top: &tac::TopLevel) -> TopLevel {
        match top {
            tac::TopLevel::Function { name, is_global, params, body } => {
                self.instructions = Vec::new();
                self.lower_params(params);
                for instr in body {
                    self.lower_instruction(instr);
                }
                let instructions = std::mem::take(&mut self.instructions);
                TopLevel::Function { name: name.clone(), is_global: *is_global, instructions }
            }
            tac::TopLevel::StaticVariable { name, is_global, var_type, init } => {
                let (_, alignment) = type_size_align(var_type, self.structs).unwrap_or((0, 8));
                TopLevel::StaticVariable { name: name.clone(), is_global: *is_global, alignment, init: init.clone() }
            }
            tac::TopLevel::StaticConstant { name, var_type, init } => {
                let (_, alignment) = type_size_align(var_type, self.structs).unwrap_or((0, 8));
                TopLevel::StaticConstant { name: name.clone(), alignment, init: init.clone() }
            }
        }
    }

    /// Moves incoming arguments out of their calling-convention registers
    /// into the pseudo-registers the body will reference by name.
    fn lower_params(&mut self, params: &[Identifier]) {
        let mut int_idx = 0;
        let mut double_idx = 0;
        for param in params {
            let ty = self.symbol_type(param);
            if ty == Type::Double {
                let reg = DOUBLE_ARG_REGS[double_idx.min(DOUBLE_ARG_REGS.len() - 1)];
                double_idx += 1;
                self.instructions.push(Instruction::Mov {
                    asm_type: AssemblyType::BackendDouble,
                    src: Operand::Register(reg),
                    dst: Operand::Pseudo(param.clone()),
                });
            } else {
                let reg = INT_ARG_REGS[int_idx.min(INT_ARG_REGS.len() - 1)];
                int_idx += 1;
                self.instructions.push(Instruction::Mov {
                    asm_type: self.assembly_scalar_type(&ty),
                    src: Operand::Register(reg),
                    dst: Operand::Pseudo(param.clone()),
                });
            }
        }
    }

    fn symbol_type(&self, name: &Identifier) -> Type {
        self.symbols
            .get(name)
            .map(|Symbol { ty, .. }| ty.clone())
            .unwrap_or_else(|| crate::internal_error!("identifier missing from symbol table during backend lowering"))
    }

    fn assembly_scalar_type(&self, ty: &Type) -> AssemblyType {
        match super::symtab::convert_backend_assembly_type(ty, self.structs) {
            AggregateLayout::Scalar(t) => t,
            AggregateLayout::ByteArray { .. } => AssemblyType::QuadWord,
        }
    }

    fn operand_of(&self, val: &tac::TacValue) -> Operand {
        match val {
            tac::TacValue::Constant(Constant::ConstDouble(d)) => Operand::ImmediateDouble(d.to_bits()),
            tac::TacValue::Constant(c) => Operand::Immediate(constant_bits(c)),
            tac::TacValue::Var(name) => {
                if matches!(self.symbols.get(name).map(|s| &s.attrs), Some(crate::symbol::IdentifierAttrs::Constant(_) | crate::symbol::IdentifierAttrs::Static { .. })) {
                    Operand::Data(name.clone())
                } else {
                    Operand::Pseudo(name.clone())
                }
            }
        }
    }

    fn type_of_value(&self, val: &tac::TacValue) -> Type {
        match val {
            tac::TacValue::Constant(c) => constant_type(c),
            tac::TacValue::Var(name) => self.symbol_type(name),
        }
    }

    fn asm_type_of(&self, val: &tac::TacValue) -> AssemblyType {
        self.assembly_scalar_type(&self.type_of_value(val))
    }

    fn lower_instruction(&mut self, instr: &tac::Instruction) {
        match instr {
            tac::Instruction::Return(val) => self.lower_return(val),
            tac::Instruction::FunCall { name, args, dst } => self.lower_call(name, args, dst),
            tac::Instruction::Unary { op, src, dst } => self.lower_unary(*op, src, dst),
            tac::Instruction::Binary { op, src1, src2, dst } => self.lower_binary(*op, src1, src2, dst),
            tac::Instruction::Copy { src, dst } => {
                let asm_type = self.asm_type_of(dst);
                self.instructions.push(Instruction::Mov { asm_type, src: self.operand_of(src), dst: self.operand_of(dst) });
            }
            tac::Instruction::GetAddress { src, dst } => {
                self.instructions.push(Instruction::Lea { src: self.operand_of(&tac::TacValue::Var(src.clone())), dst: self.operand_of(dst) });
            }
            tac::Instruction::Load { src_ptr, dst } => self.lower_load(src_ptr, dst),
            tac::Instruction::Store { src, dst_ptr } => self.lower_store(src, dst_ptr),
            tac::Instruction::AddPtr { ptr, index, scale, dst } => self.lower_add_ptr(ptr, index, *scale, dst),
            tac::Instruction::CopyToOffset { src, dst, offset } => self.lower_copy_to_offset(src, dst, *offset),
            tac::Instruction::CopyFromOffset { src, offset, dst } => self.lower_copy_from_offset(src, *offset, dst),
            tac::Instruction::Jump(label) => self.instructions.push(Instruction::Jmp(label.clone())),
            tac::Instruction::JumpIfZero { condition, target } => self.lower_conditional_jump(condition, target.clone(), CondCode::E),
            tac::Instruction::JumpIfNotZero { condition, target } => self.lower_conditional_jump(condition, target.clone(), CondCode::NE),
            tac::Instruction::Label(name) => self.instructions.push(Instruction::Label(name.clone())),
            tac::Instruction::SignExtend { src, dst } => {
                self.instructions.push(Instruction::Movsx { src: self.operand_of(src), dst: self.operand_of(dst) });
            }
            tac::Instruction::ZeroExtend { src, dst } => {
                self.instructions.push(Instruction::MovZeroExtend { src: self.operand_of(src), dst: self.operand_of(dst) });
            }
            tac::Instruction::Truncate { src, dst } => {
                let asm_type = self.asm_type_of(dst);
                self.instructions.push(Instruction::Mov { asm_type, src: self.operand_of(src), dst: self.operand_of(dst) });
            }
            tac::Instruction::DoubleToInt { src, dst } | tac::Instruction::DoubleToUInt { src, dst } => {
                let asm_type = self.asm_type_of(dst);
                self.instructions.push(Instruction::Cvttsd2si { asm_type, src: self.operand_of(src), dst: self.operand_of(dst) });
            }
            tac::Instruction::IntToDouble { src, dst } | tac::Instruction::UIntToDouble { src, dst } => {
                let asm_type = self.asm_type_of(src);
                self.instructions.push(Instruction::Cvtsi2sd { asm_type, src: self.operand_of(src), dst: self.operand_of(dst) });
            }
        }
    }

    fn lower_return(&mut self, val: &Option<tac::TacValue>) {
        if let Some(val) = val {
            let asm_type = self.asm_type_of(val);
            let dst = if asm_type == AssemblyType::BackendDouble { Operand::Register(Reg::Xmm0) } else { Operand::Register(Reg::Ax) };
            self.instructions.push(Instruction::Mov { asm_type, src: self.operand_of(val), dst });
        }
        self.instructions.push(Instruction::Ret);
    }

    fn lower_call(&mut self, name: &Identifier, args: &[tac::TacValue], dst: &Option<tac::TacValue>) {
        let mut int_idx = 0;
        let mut double_idx = 0;
        for arg in args {
            let asm_type = self.asm_type_of(arg);
            if asm_type == AssemblyType::BackendDouble {
                let reg = DOUBLE_ARG_REGS[double_idx.min(DOUBLE_ARG_REGS.len() - 1)];
                double_idx += 1;
                self.instructions.push(Instruction::Mov { asm_type, src: self.operand_of(arg), dst: Operand::Register(reg) });
            } else {
                let reg = INT_ARG_REGS[int_idx.min(INT_ARG_REGS.len() - 1)];
                int_idx += 1;
                self.instructions.push(Instruction::Mov { asm_type, src: self.operand_of(arg), dst: Operand::Register(reg) });
            }
        }
        self.instructions.push(Instruction::Call(name.clone()));
        if let Some(dst) = dst {
            let asm_type = self.asm_type_of(dst);
            let src = if asm_type == AssemblyType::BackendDouble { Operand::Register(Reg::Xmm0) } else { Operand::Register(Reg::Ax) };
            self.instructions.push(Instruction::Mov { asm_type, src, dst: self.operand_of(dst) });
        }
    }

    fn lower_unary(&mut self, op: tac::TacUnaryOp, src: &tac::TacValue, dst: &tac::TacValue) {
        let asm_type = self.asm_type_of(dst);
        self.instructions.push(Instruction::Mov { asm_type, src: self.operand_of(src), dst: self.operand_of(dst) });
        let asm_op = match op {
            tac::TacUnaryOp::Complement => AsmUnaryOp::Not,
            tac::TacUnaryOp::Negate => AsmUnaryOp::Neg,
            tac::TacUnaryOp::Not => {
                // Logical not: dst = (src == 0), computed via compare-and-set rather
                // than the arithmetic unary ops above.
                self.instructions.pop();
                self.instructions.push(Instruction::Cmp {
                    asm_type: self.asm_type_of(src),
                    src: Operand::Immediate(0),
                    dst: self.operand_of(src),
                });
                self.instructions.push(Instruction::Mov { asm_type, src: Operand::Immediate(0), dst: self.operand_of(dst) });
                self.instructions.push(Instruction::SetCC { cond: CondCode::E, operand: self.operand_of(dst) });
                return;
            }
        };
        self.instructions.push(Instruction::Unary { op: asm_op, asm_type, operand: self.operand_of(dst) });
    }

    fn lower_binary(&mut self, op: tac::TacBinaryOp, src1: &tac::TacValue, src2: &tac::TacValue, dst: &tac::TacValue) {
        use tac::TacBinaryOp::*;
        let asm_type = self.asm_type_of(src1);
        let is_double = asm_type == AssemblyType::BackendDouble;
        let signed = self.type_of_value(src1).is_signed();
        match op {
            Add | Subtract | Multiply | BitAnd | BitOr | BitXor | ShiftLeft | ShiftRight => {
                let dst_asm_type = self.asm_type_of(dst);
                self.instructions.push(Instruction::Mov { asm_type: dst_asm_type, src: self.operand_of(src1), dst: self.operand_of(dst) });
                let asm_op = match op {
                    Add => AsmBinaryOp::Add,
                    Subtract => AsmBinaryOp::Sub,
                    Multiply => AsmBinaryOp::Mult,
                    BitAnd => AsmBinaryOp::And,
                    BitOr => AsmBinaryOp::Or,
                    BitXor => AsmBinaryOp::Xor,
                    ShiftLeft => AsmBinaryOp::Shl,
                    ShiftRight if signed => AsmBinaryOp::ShrArithmetic,
                    ShiftRight => AsmBinaryOp::ShrLogical,
                    _ => unreachable!(),
                };
                self.instructions.push(Instruction::Binary { op: asm_op, asm_type: dst_asm_type, src: self.operand_of(src2), dst: self.operand_of(dst) });
            }
            Divide if is_double => {
                let dst_asm_type = self.asm_type_of(dst);
                self.instructions.push(Instruction::Mov { asm_type: dst_asm_type, src: self.operand_of(src1), dst: self.operand_of(dst) });
                self.instructions.push(Instruction::Binary { op: AsmBinaryOp::DivDouble, asm_type: dst_asm_type, src: self.operand_of(src2), dst: self.operand_of(dst) });
            }
            Divide | Remainder => {
                self.instructions.push(Instruction::Mov { asm_type, src: self.operand_of(src1), dst: Operand::Register(Reg::Ax) });
                if signed {
                    self.instructions.push(if asm_type == AssemblyType::QuadWord { Instruction::Cqo } else { Instruction::Cdq });
                    self.instructions.push(Instruction::Idiv { asm_type, operand: self.operand_of(src2) });
                } else {
                    self.instructions.push(Instruction::Mov { asm_type, src: Operand::Immediate(0), dst: Operand::Register(Reg::Dx) });
                    self.instructions.push(Instruction::Div { asm_type, operand: self.operand_of(src2) });
                }
                let result_reg = if op == Divide { Reg::Ax } else { Reg::Dx };
                self.instructions.push(Instruction::Mov { asm_type, src: Operand::Register(result_reg), dst: self.operand_of(dst) });
            }
            Equal | NotEqual | LessThan | LessOrEqual | GreaterThan | GreaterOrEqual => {
                self.instructions.push(Instruction::Cmp { asm_type, src: self.operand_of(src2), dst: self.operand_of(src1) });
                let cond = match (op, is_double, signed) {
                    (Equal, _, _) => CondCode::E,
                    (NotEqual, _, _) => CondCode::NE,
                    (LessThan, true, _) | (LessThan, false, true) => CondCode::L,
                    (LessThan, false, false) => CondCode::B,
                    (LessOrEqual, true, _) | (LessOrEqual, false, true) => CondCode::LE,
                    (LessOrEqual, false, false) => CondCode::BE,
                    (GreaterThan, true, _) | (GreaterThan, false, true) => CondCode::G,
                    (GreaterThan, false, false) => CondCode::A,
                    (GreaterOrEqual, true, _) | (GreaterOrEqual, false, true) => CondCode::GE,
                    (GreaterOrEqual, false, false) => CondCode::AE,
                    _ => unreachable!(),
                };
                let dst_asm_type = self.asm_type_of(dst);
                self.instructions.push(Instruction::Mov { asm_type: dst_asm_type, src: Operand::Immediate(0), dst: self.operand_of(dst) });
                self.instructions.push(Instruction::SetCC { cond, operand: self.operand_of(dst) });
            }
        }
    }

    fn lower_load(&mut self, src_ptr: &tac::TacValue, dst: &tac::TacValue) {
        self.instructions.push(Instruction::Mov { asm_type: AssemblyType::QuadWord, src: self.operand_of(src_ptr), dst: Operand::Register(Reg::R10) });
        let asm_type = self.asm_type_of(dst);
        self.instructions.push(Instruction::Mov { asm_type, src: Operand::Memory(Reg::R10, 0), dst: self.operand_of(dst) });
    }

    fn lower_store(&mut self, src: &tac::TacValue, dst_ptr: &tac::TacValue) {
        self.instructions.push(Instruction::Mov { asm_type: AssemblyType::QuadWord, src: self.operand_of(dst_ptr), dst: Operand::Register(Reg::R10) });
        let asm_type = self.asm_type_of(src);
        self.instructions.push(Instruction::Mov { asm_type, src: self.operand_of(src), dst: Operand::Memory(Reg::R10, 0) });
    }

    fn lower_add_ptr(&mut self, ptr: &tac::TacValue, index: &tac::TacValue, scale: i64, dst: &tac::TacValue) {
        self.instructions.push(Instruction::Mov { asm_type: AssemblyType::QuadWord, src: self.operand_of(ptr), dst: Operand::Register(Reg::R10) });
        self.instructions.push(Instruction::Mov { asm_type: AssemblyType::QuadWord, src: self.operand_of(index), dst: Operand::Register(Reg::R11) });
        if scale != 1 {
            self.instructions.push(Instruction::Binary {
                op: AsmBinaryOp::Mult,
                asm_type: AssemblyType::QuadWord,
                src: Operand::Immediate(scale),
                dst: Operand::Register(Reg::R11),
            });
        }
        self.instructions.push(Instruction::Binary {
            op: AsmBinaryOp::Add,
            asm_type: AssemblyType::QuadWord,
            src: Operand::Register(Reg::R11),
            dst: Operand::Register(Reg::R10),
        });
        self.instructions.push(Instruction::Mov { asm_type: AssemblyType::QuadWord, src: Operand::Register(Reg::R10), dst: self.operand_of(dst) });
    }

    fn lower_copy_to_offset(&mut self, src: &tac::TacValue, dst: &Identifier, offset: usize) {
        self.instructions.push(Instruction::Lea { src: Operand::Pseudo(dst.clone()), dst: Operand::Register(Reg::R10) });
        let asm_type = self.asm_type_of(src);
        self.instructions.push(Instruction::Mov { asm_type, src: self.operand_of(src), dst: Operand::Memory(Reg::R10, offset as i64) });
    }

    fn lower_copy_from_offset(&mut self, src: &Identifier, offset: usize, dst: &tac::TacValue) {
        self.instructions.push(Instruction::Lea { src: Operand::Pseudo(src.clone()), dst: Operand::Register(Reg::R10) });
        let asm_type = self.asm_type_of(dst);
        self.instructions.push(Instruction::Mov { asm_type, src: Operand::Memory(Reg::R10, offset as i64), dst: self.operand_of(dst) });
    }

    fn lower_conditional_jump(&mut self, condition: &tac::TacValue, target: Identifier, cond: CondCode) {
        let asm_type = self.asm_type_of(condition);
        self.instructions.push(Instruction::Cmp { asm_type, src: Operand::Immediate(0), dst: self.operand_of(condition) });
        self.instructions.push(Instruction::JmpCC { cond, target });
    }
}

fn constant_bits(c: &Constant) -> i64 {
    match c {
        Constant::ConstInt(n) => *n as i64,
        Constant::ConstLong(n) => *n,
        Constant::ConstUInt(n) => *n as i64,
        Constant::ConstULong(n) => *n as i64,
        Constant::ConstChar(n) => *n as i64,
        Constant::ConstUChar(n) => *n as i64,
        Constant::ConstDouble(_) => crate::internal_error!("double constant read as an integer immediate"),
    }
}

fn constant_type(c: &Constant) -> Type {
    match c {
        Constant::ConstInt(_) => Type::Int,
        Constant::ConstLong(_) => Type::Long,
        Constant::ConstUInt(_) => Type::UInt,
        Constant::ConstULong(_) => Type::ULong,
        Constant::ConstDouble(_) => Type::Double,
        Constant::ConstChar(_) => Type::Char,
        Constant::ConstUChar(_) => Type::UChar,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Symbol;

    #[test]
    fn return_constant_lowers_to_mov_ax_then_ret() {
        let symbols = SymbolTable::new();
        let structs = StructTable::new();
        let mut lowering = BackendLowering::new(&symbols, &structs);
        let program = tac::TacProgram {
            top_levels: vec![tac::TopLevel::Function {
                name: Identifier::new("main"),
                is_global: true,
                params: vec![],
                body: vec![tac::Instruction::Return(Some(tac::TacValue::Constant(Constant::ConstInt(0))))],
            }],
        };
        let asm = lowering.lower_program(&program);
        let TopLevel::Function { instructions, .. } = &asm.top_levels[0] else { panic!() };
        assert!(matches!(instructions[0], Instruction::Mov { dst: Operand::Register(Reg::Ax), .. }));
        assert!(matches!(instructions.last(), Some(Instruction::Ret)));
    }

    #[test]
    fn division_by_signed_int_uses_cqo_or_cdq_then_idiv() {
        let mut symbols = SymbolTable::new();
        let a = Identifier::new("a.0");
        let b = Identifier::new("b.1");
        let dst = Identifier::new("tmp.2");
        symbols.insert(a.clone(), Symbol::local(Type::Int));
        symbols.insert(b.clone(), Symbol::local(Type::Int));
        symbols.insert(dst.clone(), Symbol::local(Type::Int));
        let structs = StructTable::new();
        let mut lowering = BackendLowering::new(&symbols, &structs);
        lowering.lower_binary(tac::TacBinaryOp::Divide, &tac::TacValue::Var(a), &tac::TacValue::Var(b), &tac::TacValue::Var(dst));
        assert!(lowering.instructions.iter().any(|i| matches!(i, Instruction::Cdq)));
        assert!(lowering.instructions.iter().any(|i| matches!(i, Instruction::Idiv { .. })));
    }
}
