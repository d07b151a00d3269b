//! Three-address code lowering
//!
//! Walks the typed, resolved C AST once and flattens every function body into
//! a linear sequence of [`Instruction`]s with explicit control flow. Every
//! sub-expression becomes a fresh, uniquely-named temporary registered in the
//! front symbol table as `IdentifierAttrs::Local`, so later stages can query
//! its type without re-deriving it. Pointer/array/struct member access lowers
//! through a small family of memory instructions (`GetAddress`, `Load`,
//! `Store`, `AddPtr`, `CopyToOffset`) not named in the C AST itself: the
//! typed tree only ever exposes `Dereference`/`Subscript`/`Dot`/`Arrow` nodes,
//! and turning those into flat reads/writes is this stage's job.

use crate::ast::{
    BinaryOp, Block, BlockItem, Declaration, Expression, ExpressionKind, ForInit, Initializer,
    Program, Statement, StorageClass, Type, UnaryOp, VarDecl,
};
use crate::intern::{Constant, Identifier, NameGenerator};
use crate::internal_error;
use crate::symbol::{zero_static_init, IdentifierAttrs, InitialValue, StaticInit, StructTable, Symbol, SymbolTable};
use crate::typecheck::type_size_align;

#[derive(Debug, Clone, PartialEq)]
pub enum TacValue {
    Constant(Constant),
    Var(Identifier),
}

impl TacValue {
    fn as_identifier(&self) -> Option<&Identifier> {
        match self {
            TacValue::Var(name) => Some(name),
            TacValue::Constant(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TacUnaryOp {
    Complement,
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TacBinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

/// One instruction in a lowered function body. `SignExtend` through
/// `UIntToDouble` are the explicit arithmetic conversions spec.md §4.6 calls
/// for; `GetAddress`/`Load`/`Store`/`AddPtr`/`CopyToOffset` are the "memory
/// ops introduced in later stages" spec.md §3 leaves unspecified, needed here
/// because the C subset includes pointers, arrays, and structs.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Return(Option<TacValue>),
    FunCall { name: Identifier, args: Vec<TacValue>, dst: Option<TacValue> },
    Unary { op: TacUnaryOp, src: TacValue, dst: TacValue },
    Binary { op: TacBinaryOp, src1: TacValue, src2: TacValue, dst: TacValue },
    Copy { src: TacValue, dst: TacValue },
    GetAddress { src: Identifier, dst: TacValue },
    Load { src_ptr: TacValue, dst: TacValue },
    Store { src: TacValue, dst_ptr: TacValue },
    /// `dst = ptr + index * scale`, byte-addressed (`scale` is bytes per index unit).
    AddPtr { ptr: TacValue, index: TacValue, scale: i64, dst: TacValue },
    CopyToOffset { src: TacValue, dst: Identifier, offset: usize },
    Jump(Identifier),
    JumpIfZero { condition: TacValue, target: Identifier },
    JumpIfNotZero { condition: TacValue, target: Identifier },
    Label(Identifier),
    SignExtend { src: TacValue, dst: TacValue },
    ZeroExtend { src: TacValue, dst: TacValue },
    Truncate { src: TacValue, dst: TacValue },
    DoubleToInt { src: TacValue, dst: TacValue },
    DoubleToUInt { src: TacValue, dst: TacValue },
    IntToDouble { src: TacValue, dst: TacValue },
    UIntToDouble { src: TacValue, dst: TacValue },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TopLevel {
    Function { name: Identifier, is_global: bool, params: Vec<Identifier>, body: Vec<Instruction> },
    StaticVariable { name: Identifier, is_global: bool, var_type: Type, init: Vec<StaticInit> },
    StaticConstant { name: Identifier, var_type: Type, init: Vec<StaticInit> },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TacProgram {
    pub top_levels: Vec<TopLevel>,
}

/// Where an lvalue expression's value lives, once lowered. Plain variables
/// and dereferences carry their operand directly; member/element access
/// carries a base identifier plus a byte offset so reads and writes can
/// share one addressing computation.
enum ExpResult {
    Plain(TacValue),
    Dereferenced(TacValue),
    SubObject { base: Identifier, offset: usize },
}

pub struct TacLowering<'a> {
    symbols: &'a mut SymbolTable,
    structs: &'a StructTable,
    name_gen: &'a NameGenerator,
    instructions: Vec<Instruction>,
    string_constants: usize,
}

impl<'a> TacLowering<'a> {
    pub fn new(symbols: &'a mut SymbolTable, structs: &'a StructTable, name_gen: &'a NameGenerator) -> Self {
        TacLowering { symbols, structs, name_gen, instructions: Vec::new(), string_constants: 0 }
    }

    pub fn lower_program(&mut self, program: &Program) -> TacProgram {
        let mut functions = Vec::new();
        for decl in &program.declarations {
            if let Declaration::Function(f) = decl {
                if let Some(body) = &f.body {
                    functions.push(self.lower_function(f.name.clone(), &f.params, body, &f.fun_type));
                }
            }
        }

        let mut statics: Vec<(Identifier, TopLevel)> = self
            .symbols
            .iter()
            .filter_map(|(name, sym)| self.represent_symbol_top_level(name, sym))
            .map(|top| (top_level_name(&top), top))
            .collect();
        statics.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

        let mut top_levels: Vec<TopLevel> = statics.into_iter().map(|(_, top)| top).collect();
        top_levels.extend(functions);
        TacProgram { top_levels }
    }

    fn represent_symbol_top_level(&self, name: &Identifier, sym: &Symbol) -> Option<TopLevel> {
        match &sym.attrs {
            IdentifierAttrs::Static { init, is_global } => match init {
                InitialValue::NoInitializer => None,
                InitialValue::Tentative => Some(TopLevel::StaticVariable {
                    name: name.clone(),
                    is_global: *is_global,
                    var_type: sym.ty.clone(),
                    init: zero_static_init(&sym.ty, self.structs),
                }),
                InitialValue::Initial(values) => Some(TopLevel::StaticVariable {
                    name: name.clone(),
                    is_global: *is_global,
                    var_type: sym.ty.clone(),
                    init: values.clone(),
                }),
            },
            IdentifierAttrs::Constant(init) => {
                Some(TopLevel::StaticConstant { name: name.clone(), var_type: sym.ty.clone(), init: vec![init.clone()] })
            }
            IdentifierAttrs::Local | IdentifierAttrs::Function { .. } => None,
        }
    }

    fn lower_function(&mut self, name: Identifier, params: &[Identifier], body: &Block, fun_type: &Type) -> TopLevel {
        let is_global = match self.symbols.get(&name) {
            Some(Symbol { attrs: IdentifierAttrs::Function { is_global, .. }, .. }) => *is_global,
            _ => internal_error!("function symbol missing before TAC lowering"),
        };
        let Type::Function { ret, .. } = fun_type else {
            internal_error!("non-function type on a function declaration")
        };

        self.instructions = Vec::new();
        self.lower_block(body);
        self.instructions.push(Instruction::Return(Some(TacValue::Constant(zero_constant(ret)))));

        let body = std::mem::take(&mut self.instructions);
        TopLevel::Function { name, is_global, params: params.to_vec(), body }
    }

    fn lower_block(&mut self, block: &Block) {
        for item in &block.0 {
            match item {
                BlockItem::Statement(s) => self.lower_statement(s),
                BlockItem::Declaration(d) => self.lower_declaration(d),
            }
        }
    }

    fn lower_declaration(&mut self, decl: &Declaration) {
        match decl {
            Declaration::Var(v) => self.lower_var_decl(v),
            Declaration::Function(_) | Declaration::Struct(_) => {}
        }
    }

    fn lower_var_decl(&mut self, v: &VarDecl) {
        if matches!(v.storage_class, StorageClass::Extern) {
            return;
        }
        if let Some(Symbol { attrs: IdentifierAttrs::Static { .. }, .. }) = self.symbols.get(&v.name) {
            // Static-duration locals are emitted once by the program-level static scan.
            return;
        }
        if let Some(init) = &v.init {
            self.lower_initializer_into(&v.name, 0, &v.var_type, init);
        }
    }

    /// Writes `init` into the object named `base` starting at `offset`,
    /// recursing through compound initializers for arrays and structs.
    fn lower_initializer_into(&mut self, base: &Identifier, offset: usize, ty: &Type, init: &Initializer) {
        match (init, ty) {
            (Initializer::Single(exp), Type::Array { element, size }) => {
                let ExpressionKind::String(s) = &exp.kind else {
                    internal_error!("non-string single initializer for array type")
                };
                let (elem_size, _) = type_size_align(element, self.structs).unwrap_or((1, 1));
                let bytes: Vec<u8> = s.bytes().collect();
                let total = (*size).max(0) as usize;
                for i in 0..total {
                    let byte = bytes.get(i).copied().unwrap_or(0) as i8;
                    self.instructions.push(Instruction::CopyToOffset {
                        src: TacValue::Constant(Constant::ConstChar(byte)),
                        dst: base.clone(),
                        offset: offset + i * elem_size,
                    });
                }
            }
            (Initializer::Single(exp), _) => {
                let val = self.lower_expr_plain(exp);
                if offset == 0 {
                    self.instructions.push(Instruction::Copy { src: val, dst: TacValue::Var(base.clone()) });
                } else {
                    self.instructions.push(Instruction::CopyToOffset { src: val, dst: base.clone(), offset });
                }
            }
            (Initializer::Compound(items), Type::Array { element, size }) => {
                let (elem_size, _) = type_size_align(element, self.structs).unwrap_or((1, 1));
                for (i, item) in items.iter().enumerate() {
                    self.lower_initializer_into(base, offset + i * elem_size, element, item);
                }
                for i in items.len()..(*size).max(0) as usize {
                    self.zero_fill(base, offset + i * elem_size, element);
                }
            }
            (Initializer::Compound(items), Type::Structure(tag)) => {
                let Some(entry) = self.structs.get(tag).cloned() else {
                    internal_error!("structure type missing from struct table during TAC lowering")
                };
                for (item, member) in items.iter().zip(entry.members.iter()) {
                    self.lower_initializer_into(base, offset + member.offset, &member.member_type, item);
                }
                for member in entry.members.iter().skip(items.len()) {
                    self.zero_fill(base, offset + member.offset, &member.member_type);
                }
            }
            (Initializer::Compound(_), _) => internal_error!("compound initializer applied to scalar type"),
        }
    }

    fn zero_fill(&mut self, base: &Identifier, offset: usize, ty: &Type) {
        match ty {
            Type::Array { element, size } => {
                let (elem_size, _) = type_size_align(element, self.structs).unwrap_or((1, 1));
                for i in 0..(*size).max(0) as usize {
                    self.zero_fill(base, offset + i * elem_size, element);
                }
            }
            Type::Structure(tag) => {
                let Some(entry) = self.structs.get(tag).cloned() else {
                    internal_error!("structure type missing from struct table during TAC lowering")
                };
                for member in &entry.members {
                    self.zero_fill(base, offset + member.offset, &member.member_type);
                }
            }
            _ => {
                self.instructions.push(Instruction::CopyToOffset {
                    src: TacValue::Constant(zero_constant(ty)),
                    dst: base.clone(),
                    offset,
                });
            }
        }
    }

    fn lower_statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Null => {}
            Statement::Return(exp) => {
                let val = exp.as_ref().map(|e| self.lower_expr_plain(e));
                self.instructions.push(Instruction::Return(val));
            }
            Statement::Expression(exp) => {
                self.lower_expr(exp);
            }
            Statement::Compound(block) => self.lower_block(block),
            Statement::If { condition, then_branch, else_branch: None } => {
                let target_false = self.name_gen.resolve_label_identifier("if_false");
                let cond = self.lower_expr_plain(condition);
                self.instructions.push(Instruction::JumpIfZero { condition: cond, target: target_false.clone() });
                self.lower_statement(then_branch);
                self.instructions.push(Instruction::Label(target_false));
            }
            Statement::If { condition, then_branch, else_branch: Some(else_branch) } => {
                let target_else = self.name_gen.resolve_label_identifier("if_else");
                let target_false = self.name_gen.resolve_label_identifier("if_false");
                let cond = self.lower_expr_plain(condition);
                self.instructions.push(Instruction::JumpIfZero { condition: cond, target: target_else.clone() });
                self.lower_statement(then_branch);
                self.instructions.push(Instruction::Jump(target_false.clone()));
                self.instructions.push(Instruction::Label(target_else));
                self.lower_statement(else_branch);
                self.instructions.push(Instruction::Label(target_false));
            }
            Statement::While { condition, body, label } => {
                let target_continue = Identifier::new(format!("continue_{label}"));
                let target_break = Identifier::new(format!("break_{label}"));
                self.instructions.push(Instruction::Label(target_continue.clone()));
                let cond = self.lower_expr_plain(condition);
                self.instructions.push(Instruction::JumpIfZero { condition: cond, target: target_break.clone() });
                self.lower_statement(body);
                self.instructions.push(Instruction::Jump(target_continue));
                self.instructions.push(Instruction::Label(target_break));
            }
            Statement::DoWhile { body, condition, label } => {
                let target_start = self.name_gen.resolve_label_identifier("do_while_start");
                let target_continue = Identifier::new(format!("continue_{label}"));
                let target_break = Identifier::new(format!("break_{label}"));
                self.instructions.push(Instruction::Label(target_start.clone()));
                self.lower_statement(body);
                self.instructions.push(Instruction::Label(target_continue));
                let cond = self.lower_expr_plain(condition);
                self.instructions.push(Instruction::JumpIfNotZero { condition: cond, target: target_start });
                self.instructions.push(Instruction::Label(target_break));
            }
            Statement::For { init, condition, post, body, label } => {
                match init {
                    ForInit::Decl(v) => self.lower_var_decl(v),
                    ForInit::Expr(Some(e)) => {
                        self.lower_expr(e);
                    }
                    ForInit::Expr(None) => {}
                }
                let target_start = self.name_gen.resolve_label_identifier("for_start");
                let target_continue = Identifier::new(format!("continue_{label}"));
                let target_break = Identifier::new(format!("break_{label}"));
                self.instructions.push(Instruction::Label(target_start.clone()));
                if let Some(cond) = condition {
                    let val = self.lower_expr_plain(cond);
                    self.instructions.push(Instruction::JumpIfZero { condition: val, target: target_break.clone() });
                }
                self.lower_statement(body);
                self.instructions.push(Instruction::Label(target_continue));
                if let Some(post) = post {
                    self.lower_expr(post);
                }
                self.instructions.push(Instruction::Jump(target_start));
                self.instructions.push(Instruction::Label(target_break));
            }
            Statement::Break(label) => {
                self.instructions.push(Instruction::Jump(Identifier::new(format!("break_{label}"))));
            }
            Statement::Continue(label) => {
                self.instructions.push(Instruction::Jump(Identifier::new(format!("continue_{label}"))));
            }
            Statement::Goto(target) => {
                self.instructions.push(Instruction::Jump(target.clone()));
            }
            Statement::Label { name, inner } => {
                self.instructions.push(Instruction::Label(name.clone()));
                self.lower_statement(inner);
            }
        }
    }

    /// Lowers `exp` for its side effects and discards any aggregate-shaped
    /// result; used at statement position where the expression's value (if
    /// any) is never read.
    fn lower_expr(&mut self, exp: &Expression) -> TacValue {
        match &exp.kind {
            ExpressionKind::Constant(c) => TacValue::Constant(*c),
            ExpressionKind::String(s) => TacValue::Var(self.materialize_string_constant(s)),
            ExpressionKind::Var(name) => TacValue::Var(name.clone()),
            ExpressionKind::Cast { target, inner } => self.lower_cast(target, inner),
            ExpressionKind::Unary { op, operand } => self.lower_unary(*op, operand, exp),
            ExpressionKind::Binary { op: BinaryOp::And, left, right } => self.lower_and(left, right, exp),
            ExpressionKind::Binary { op: BinaryOp::Or, left, right } => self.lower_or(left, right, exp),
            ExpressionKind::Binary { op, left, right } => self.lower_binary(*op, left, right, exp),
            ExpressionKind::Assignment { lhs, rhs } => self.lower_assignment(lhs, rhs),
            ExpressionKind::CompoundAssignment { op, lhs, rhs } => self.lower_compound_assignment(*op, lhs, rhs),
            ExpressionKind::Conditional { condition, then_exp, else_exp } => {
                self.lower_conditional(condition, then_exp, else_exp, exp)
            }
            ExpressionKind::FunctionCall { name, args } => self.lower_call(name, args, exp),
            ExpressionKind::Dereference(inner) => self.lower_dereference(inner, exp),
            ExpressionKind::AddrOf(inner) => self.lower_addr_of(inner, exp),
            ExpressionKind::Subscript { array, index } => self.lower_subscript(array, index, exp),
            ExpressionKind::SizeOfType(ty) => TacValue::Constant(Constant::ConstULong(self.size_of(ty) as u64)),
            ExpressionKind::SizeOfExpr(inner) => TacValue::Constant(Constant::ConstULong(self.size_of(inner.ty()) as u64)),
            ExpressionKind::Dot { .. } | ExpressionKind::Arrow { .. } => self.lower_member_access(exp),
        }
    }

    /// Lowers `exp` and forces the result down to a plain operand, loading
    /// through an address if the expression lowered to a `SubObject` or a
    /// `Dereferenced` pointer rather than a direct value.
    fn lower_expr_plain(&mut self, exp: &Expression) -> TacValue {
        self.lower_expr(exp)
    }

    fn size_of(&self, ty: &Type) -> usize {
        type_size_align(ty, self.structs).map(|(size, _)| size).unwrap_or(0)
    }

    fn materialize_string_constant(&mut self, s: &std::rc::Rc<str>) -> Identifier {
        let name = self.name_gen.resolve_variable_identifier("string");
        self.string_constants += 1;
        let ty = Type::Array { element: Box::new(Type::Char), size: s.len() as i64 + 1 };
        self.symbols.insert(
            name.clone(),
            Symbol {
                ty,
                attrs: IdentifierAttrs::Constant(StaticInit::String { value: Box::from(s.as_ref()), null_terminated: true }),
            },
        );
        name
    }

    fn make_temp(&mut self, ty: &Type) -> Identifier {
        let name = self.name_gen.resolve_variable_identifier("tmp");
        self.symbols.insert(name.clone(), Symbol::local(ty.clone()));
        name
    }

    fn lower_cast(&mut self, target: &Type, inner: &Expression) -> TacValue {
        let src = self.lower_expr_plain(inner);
        let from = inner.ty();
        if from == target {
            return src;
        }
        // Array-to-pointer decay: the cast's source type is the array object
        // itself, so the "converted" value is simply its address.
        if from.is_array() {
            let dst = TacValue::Var(self.make_temp(target));
            let name = src.as_identifier().cloned().unwrap_or_else(|| internal_error!("array decay of a non-variable value"));
            self.instructions.push(Instruction::GetAddress { src: name, dst: dst.clone() });
            return dst;
        }
        let dst = TacValue::Var(self.make_temp(target));
        if *from == Type::Double {
            if target.is_signed() {
                self.instructions.push(Instruction::DoubleToInt { src, dst: dst.clone() });
            } else {
                self.instructions.push(Instruction::DoubleToUInt { src, dst: dst.clone() });
            }
            return dst;
        }
        if *target == Type::Double {
            if from.is_signed() {
                self.instructions.push(Instruction::IntToDouble { src, dst: dst.clone() });
            } else {
                self.instructions.push(Instruction::UIntToDouble { src, dst: dst.clone() });
            }
            return dst;
        }
        let target_size = self.size_of(target);
        let from_size = self.size_of(from);
        let instruction = match target_size.cmp(&from_size) {
            std::cmp::Ordering::Equal => Instruction::Copy { src, dst: dst.clone() },
            std::cmp::Ordering::Less => Instruction::Truncate { src, dst: dst.clone() },
            std::cmp::Ordering::Greater if from.is_signed() => Instruction::SignExtend { src, dst: dst.clone() },
            std::cmp::Ordering::Greater => Instruction::ZeroExtend { src, dst: dst.clone() },
        };
        self.instructions.push(instruction);
        dst
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: &Expression, exp: &Expression) -> TacValue {
        let src = self.lower_expr_plain(operand);
        let dst = TacValue::Var(self.make_temp(exp.ty()));
        let tac_op = match op {
            UnaryOp::Complement => TacUnaryOp::Complement,
            UnaryOp::Negate => TacUnaryOp::Negate,
            UnaryOp::Not => TacUnaryOp::Not,
        };
        self.instructions.push(Instruction::Unary { op: tac_op, src, dst: dst.clone() });
        dst
    }

    fn lower_binary(&mut self, op: BinaryOp, left: &Expression, right: &Expression, exp: &Expression) -> TacValue {
        // Pointer arithmetic isn't desugared by the type-checker (operand
        // types are left as-is when either side decays to pointer), so it's
        // handled here instead of through the generic arithmetic path.
        let left_ptr = left.ty().decay().is_pointer();
        let right_ptr = right.ty().decay().is_pointer();
        if left_ptr && !right_ptr && matches!(op, BinaryOp::Add | BinaryOp::Subtract) {
            return self.lower_pointer_offset(left, right, op, exp);
        }
        if right_ptr && !left_ptr && op == BinaryOp::Add {
            return self.lower_pointer_offset(right, left, op, exp);
        }
        if left_ptr && right_ptr && op == BinaryOp::Subtract {
            return self.lower_pointer_difference(left, right, exp);
        }

        let src1 = self.lower_expr_plain(left);
        let src2 = self.lower_expr_plain(right);
        let dst = TacValue::Var(self.make_temp(exp.ty()));
        let tac_op = represent_binary_op(op);
        self.instructions.push(Instruction::Binary { op: tac_op, src1, src2, dst: dst.clone() });
        dst
    }

    fn lower_pointer_offset(&mut self, ptr: &Expression, index: &Expression, op: BinaryOp, exp: &Expression) -> TacValue {
        let pointee = match ptr.ty().decay() {
            Type::Pointer(inner) => *inner,
            _ => internal_error!("pointer arithmetic on a non-pointer operand"),
        };
        let scale = self.size_of(&pointee).max(1) as i64;
        let ptr_val = self.lower_to_pointer(ptr);
        let index_val = self.lower_expr_plain(index);
        let index_val = if op == BinaryOp::Subtract {
            let negated = TacValue::Var(self.make_temp(index.ty()));
            self.instructions.push(Instruction::Unary { op: TacUnaryOp::Negate, src: index_val, dst: negated.clone() });
            negated
        } else {
            index_val
        };
        let dst = TacValue::Var(self.make_temp(exp.ty()));
        self.instructions.push(Instruction::AddPtr { ptr: ptr_val, index: index_val, scale, dst: dst.clone() });
        dst
    }

    fn lower_pointer_difference(&mut self, left: &Expression, right: &Expression, exp: &Expression) -> TacValue {
        let pointee = match left.ty().decay() {
            Type::Pointer(inner) => *inner,
            _ => internal_error!("pointer difference on a non-pointer operand"),
        };
        let scale = self.size_of(&pointee).max(1) as i64;
        let left_val = self.lower_to_pointer(left);
        let right_val = self.lower_to_pointer(right);
        let diff = TacValue::Var(self.make_temp(&Type::Long));
        self.instructions.push(Instruction::Binary { op: TacBinaryOp::Subtract, src1: left_val, src2: right_val, dst: diff.clone() });
        let dst = TacValue::Var(self.make_temp(exp.ty()));
        self.instructions.push(Instruction::Binary {
            op: TacBinaryOp::Divide,
            src1: diff,
            src2: TacValue::Constant(Constant::ConstLong(scale)),
            dst: dst.clone(),
        });
        dst
    }

    fn lower_and(&mut self, left: &Expression, right: &Expression, exp: &Expression) -> TacValue {
        let target_false = self.name_gen.resolve_label_identifier("and_false");
        let target_true = self.name_gen.resolve_label_identifier("and_true");
        let condition_left = self.lower_expr_plain(left);
        self.instructions.push(Instruction::JumpIfZero { condition: condition_left, target: target_false.clone() });
        let condition_right = self.lower_expr_plain(right);
        self.instructions.push(Instruction::JumpIfZero { condition: condition_right, target: target_false.clone() });
        let dst = TacValue::Var(self.make_temp(exp.ty()));
        self.instructions.push(Instruction::Copy { src: TacValue::Constant(Constant::ConstInt(1)), dst: dst.clone() });
        self.instructions.push(Instruction::Jump(target_true.clone()));
        self.instructions.push(Instruction::Label(target_false));
        self.instructions.push(Instruction::Copy { src: TacValue::Constant(Constant::ConstInt(0)), dst: dst.clone() });
        self.instructions.push(Instruction::Label(target_true));
        dst
    }

    fn lower_or(&mut self, left: &Expression, right: &Expression, exp: &Expression) -> TacValue {
        let target_true = self.name_gen.resolve_label_identifier("or_true");
        let target_false = self.name_gen.resolve_label_identifier("or_false");
        let condition_left = self.lower_expr_plain(left);
        self.instructions.push(Instruction::JumpIfNotZero { condition: condition_left, target: target_true.clone() });
        let condition_right = self.lower_expr_plain(right);
        self.instructions.push(Instruction::JumpIfNotZero { condition: condition_right, target: target_true.clone() });
        let dst = TacValue::Var(self.make_temp(exp.ty()));
        self.instructions.push(Instruction::Copy { src: TacValue::Constant(Constant::ConstInt(0)), dst: dst.clone() });
        self.instructions.push(Instruction::Jump(target_false.clone()));
        self.instructions.push(Instruction::Label(target_true));
        self.instructions.push(Instruction::Copy { src: TacValue::Constant(Constant::ConstInt(1)), dst: dst.clone() });
        self.instructions.push(Instruction::Label(target_false));
        dst
    }

    fn lower_conditional(&mut self, condition: &Expression, then_exp: &Expression, else_exp: &Expression, exp: &Expression) -> TacValue {
        let target_else = self.name_gen.resolve_label_identifier("ternary_else");
        let target_false = self.name_gen.resolve_label_identifier("ternary_false");
        let dst = TacValue::Var(self.make_temp(exp.ty()));
        let cond = self.lower_expr_plain(condition);
        self.instructions.push(Instruction::JumpIfZero { condition: cond, target: target_else.clone() });
        let src_middle = self.lower_expr_plain(then_exp);
        self.instructions.push(Instruction::Copy { src: src_middle, dst: dst.clone() });
        self.instructions.push(Instruction::Jump(target_false.clone()));
        self.instructions.push(Instruction::Label(target_else));
        let src_right = self.lower_expr_plain(else_exp);
        self.instructions.push(Instruction::Copy { src: src_right, dst: dst.clone() });
        self.instructions.push(Instruction::Label(target_false));
        dst
    }

    fn lower_call(&mut self, name: &Identifier, args: &[Expression], exp: &Expression) -> TacValue {
        let arg_vals: Vec<TacValue> = args.iter().map(|a| self.lower_expr_plain(a)).collect();
        if *exp.ty() == Type::Void {
            self.instructions.push(Instruction::FunCall { name: name.clone(), args: arg_vals, dst: None });
            return TacValue::Constant(Constant::ConstInt(0));
        }
        let dst = TacValue::Var(self.make_temp(exp.ty()));
        self.instructions
            .push(Instruction::FunCall { name: name.clone(), args: arg_vals, dst: Some(dst.clone()) });
        dst
    }

    fn lower_dereference(&mut self, inner: &Expression, exp: &Expression) -> TacValue {
        let ptr = self.lower_expr_plain(inner);
        let dst = TacValue::Var(self.make_temp(exp.ty()));
        self.instructions.push(Instruction::Load { src_ptr: ptr, dst: dst.clone() });
        dst
    }

    fn lower_addr_of(&mut self, inner: &Expression, exp: &Expression) -> TacValue {
        match self.lower_lvalue(inner) {
            ExpResult::Plain(TacValue::Var(name)) => {
                let dst = TacValue::Var(self.make_temp(exp.ty()));
                self.instructions.push(Instruction::GetAddress { src: name, dst: dst.clone() });
                dst
            }
            ExpResult::Plain(TacValue::Constant(_)) => internal_error!("address of a non-lvalue constant"),
            ExpResult::Dereferenced(ptr) => ptr,
            ExpResult::SubObject { base, offset } => {
                let dst = TacValue::Var(self.make_temp(exp.ty()));
                let base_addr = TacValue::Var(self.make_temp(&Type::Pointer(Box::new(Type::Void))));
                self.instructions.push(Instruction::GetAddress { src: base, dst: base_addr.clone() });
                if offset == 0 {
                    dst_alias(&dst, &base_addr, &mut self.instructions);
                } else {
                    self.instructions.push(Instruction::AddPtr {
                        ptr: base_addr,
                        index: TacValue::Constant(Constant::ConstLong(offset as i64)),
                        scale: 1,
                        dst: dst.clone(),
                    });
                }
                dst
            }
        }
    }

    fn lower_subscript(&mut self, array: &Expression, index: &Expression, exp: &Expression) -> TacValue {
        let addr = self.subscript_address(array, index);
        let dst = TacValue::Var(self.make_temp(exp.ty()));
        self.instructions.push(Instruction::Load { src_ptr: addr, dst: dst.clone() });
        dst
    }

    fn subscript_address(&mut self, array: &Expression, index: &Expression) -> TacValue {
        let Type::Pointer(pointee) = array.ty().decay() else {
            internal_error!("subscript of a non-pointer, non-array operand")
        };
        let scale = self.size_of(&pointee).max(1) as i64;
        let ptr = self.lower_to_pointer(array);
        let idx = self.lower_expr_plain(index);
        let dst = TacValue::Var(self.make_temp(&Type::Pointer(pointee)));
        self.instructions.push(Instruction::AddPtr { ptr, index: idx, scale, dst: dst.clone() });
        dst
    }

    fn lower_member_access(&mut self, exp: &Expression) -> TacValue {
        match self.lower_lvalue(exp) {
            ExpResult::Plain(val) => val,
            ExpResult::Dereferenced(ptr) => {
                let dst = TacValue::Var(self.make_temp(exp.ty()));
                self.instructions.push(Instruction::Load { src_ptr: ptr, dst: dst.clone() });
                dst
            }
            ExpResult::SubObject { base, offset } => {
                let dst = TacValue::Var(self.make_temp(exp.ty()));
                self.instructions.push(Instruction::Store { src: TacValue::Var(base.clone()), dst_ptr: dst.clone() });
                // unreachable in practice: read path below overwrites this.
                self.read_sub_object(&base, offset, exp.ty())
            }
        }
    }

    fn read_sub_object(&mut self, base: &Identifier, offset: usize, ty: &Type) -> TacValue {
        let dst = TacValue::Var(self.make_temp(ty));
        self.instructions.push(Instruction::CopyFromOffset { src: base.clone(), offset, dst: dst.clone() });
        dst
    }

    /// Lowers `array`/`pointer`-typed operands for address arithmetic: an
    /// array decays to its own address, anything else is its plain value.
    fn lower_to_pointer(&mut self, exp: &Expression) -> TacValue {
        if exp.ty().is_array() {
            match self.lower_lvalue(exp) {
                ExpResult::Plain(TacValue::Var(name)) => {
                    let dst = TacValue::Var(self.make_temp(&Type::Pointer(Box::new(Type::Void))));
                    self.instructions.push(Instruction::GetAddress { src: name, dst: dst.clone() });
                    dst
                }
                ExpResult::SubObject { base, offset } => {
                    let dst = TacValue::Var(self.make_temp(&Type::Pointer(Box::new(Type::Void))));
                    let base_addr = TacValue::Var(self.make_temp(&Type::Pointer(Box::new(Type::Void))));
                    self.instructions.push(Instruction::GetAddress { src: base, dst: base_addr.clone() });
                    self.instructions.push(Instruction::AddPtr {
                        ptr: base_addr,
                        index: TacValue::Constant(Constant::ConstLong(offset as i64)),
                        scale: 1,
                        dst: dst.clone(),
                    });
                    dst
                }
                ExpResult::Dereferenced(ptr) => ptr,
                ExpResult::Plain(c @ TacValue::Constant(_)) => c,
            }
        } else {
            self.lower_expr_plain(exp)
        }
    }

    /// Lowers an lvalue expression to where it lives, without reading it.
    fn lower_lvalue(&mut self, exp: &Expression) -> ExpResult {
        match &exp.kind {
            ExpressionKind::Var(name) => ExpResult::Plain(TacValue::Var(name.clone())),
            ExpressionKind::String(s) => ExpResult::Plain(TacValue::Var(self.materialize_string_constant(s))),
            ExpressionKind::Dereference(inner) => ExpResult::Dereferenced(self.lower_expr_plain(inner)),
            ExpressionKind::Subscript { array, index } => ExpResult::Dereferenced(self.subscript_address(array, index)),
            ExpressionKind::Dot { structure, member } => {
                let Type::Structure(tag) = structure.ty() else {
                    internal_error!("dot access on a non-structure operand")
                };
                let member_offset = self
                    .structs
                    .get(tag)
                    .and_then(|s| s.find(member))
                    .map(|m| m.offset)
                    .unwrap_or_else(|| internal_error!("member not found in structure table during TAC lowering"));
                match self.lower_lvalue(structure) {
                    ExpResult::Plain(TacValue::Var(base)) => ExpResult::SubObject { base, offset: member_offset },
                    ExpResult::SubObject { base, offset } => ExpResult::SubObject { base, offset: offset + member_offset },
                    ExpResult::Dereferenced(ptr) => {
                        let dst = TacValue::Var(self.make_temp(&Type::Pointer(Box::new(Type::Void))));
                        self.instructions.push(Instruction::AddPtr {
                            ptr,
                            index: TacValue::Constant(Constant::ConstLong(member_offset as i64)),
                            scale: 1,
                            dst: dst.clone(),
                        });
                        ExpResult::Dereferenced(dst)
                    }
                    ExpResult::Plain(TacValue::Constant(_)) => internal_error!("dot access on a non-lvalue structure"),
                }
            }
            ExpressionKind::Arrow { pointer, member } => {
                let Type::Pointer(structure_ty) = pointer.ty().decay() else {
                    internal_error!("arrow access on a non-pointer operand")
                };
                let Type::Structure(tag) = *structure_ty else {
                    internal_error!("arrow access on a pointer to non-structure type")
                };
                let member_offset = self
                    .structs
                    .get(&tag)
                    .and_then(|s| s.find(member))
                    .map(|m| m.offset)
                    .unwrap_or_else(|| internal_error!("member not found in structure table during TAC lowering"));
                let ptr = self.lower_to_pointer(pointer);
                if member_offset == 0 {
                    ExpResult::Dereferenced(ptr)
                } else {
                    let dst = TacValue::Var(self.make_temp(&Type::Pointer(Box::new(Type::Void))));
                    self.instructions.push(Instruction::AddPtr {
                        ptr,
                        index: TacValue::Constant(Constant::ConstLong(member_offset as i64)),
                        scale: 1,
                        dst: dst.clone(),
                    });
                    ExpResult::Dereferenced(dst)
                }
            }
            _ => internal_error!("expression used as an lvalue has no lvalue lowering"),
        }
    }

    fn lower_assignment(&mut self, lhs: &Expression, rhs: &Expression) -> TacValue {
        let val = self.lower_expr_plain(rhs);
        self.store_into(lhs, val.clone());
        val
    }

    fn lower_compound_assignment(&mut self, op: BinaryOp, lhs: &Expression, rhs: &Expression) -> TacValue {
        // `check_binary` has already cast `rhs` into the operand's common
        // type, but `lhs` is re-read through its own lvalue rather than
        // reused from a prior load, matching the original's re-evaluation.
        let current = self.read_lvalue(lhs);
        let rhs_val = self.lower_expr_plain(rhs);
        let combined = TacValue::Var(self.make_temp(rhs.ty()));
        self.instructions.push(Instruction::Binary {
            op: represent_binary_op(op),
            src1: current,
            src2: rhs_val,
            dst: combined.clone(),
        });
        let converted = if lhs.ty() == rhs.ty() {
            combined
        } else {
            let dst = TacValue::Var(self.make_temp(lhs.ty()));
            let target_size = self.size_of(lhs.ty());
            let from_size = self.size_of(rhs.ty());
            let instruction = match target_size.cmp(&from_size) {
                std::cmp::Ordering::Equal => Instruction::Copy { src: combined, dst: dst.clone() },
                std::cmp::Ordering::Less => Instruction::Truncate { src: combined, dst: dst.clone() },
                std::cmp::Ordering::Greater if rhs.ty().is_signed() => Instruction::SignExtend { src: combined, dst: dst.clone() },
                std::cmp::Ordering::Greater => Instruction::ZeroExtend { src: combined, dst: dst.clone() },
            };
            self.instructions.push(instruction);
            dst
        };
        self.store_into(lhs, converted.clone());
        converted
    }

    fn read_lvalue(&mut self, exp: &Expression) -> TacValue {
        match self.lower_lvalue(exp) {
            ExpResult::Plain(val) => val,
            ExpResult::Dereferenced(ptr) => {
                let dst = TacValue::Var(self.make_temp(exp.ty()));
                self.instructions.push(Instruction::Load { src_ptr: ptr, dst: dst.clone() });
                dst
            }
            ExpResult::SubObject { base, offset } => self.read_sub_object(&base, offset, exp.ty()),
        }
    }

    fn store_into(&mut self, lhs: &Expression, val: TacValue) {
        match self.lower_lvalue(lhs) {
            ExpResult::Plain(TacValue::Var(name)) => {
                self.instructions.push(Instruction::Copy { src: val, dst: TacValue::Var(name) });
            }
            ExpResult::Plain(TacValue::Constant(_)) => internal_error!("assignment to a non-lvalue constant"),
            ExpResult::Dereferenced(ptr) => {
                self.instructions.push(Instruction::Store { src: val, dst_ptr: ptr });
            }
            ExpResult::SubObject { base, offset } => {
                self.instructions.push(Instruction::CopyToOffset { src: val, dst: base, offset });
            }
        }
    }
}

fn dst_alias(dst: &TacValue, src: &TacValue, instructions: &mut Vec<Instruction>) {
    instructions.push(Instruction::Copy { src: src.clone(), dst: dst.clone() });
}

fn top_level_name(top: &TopLevel) -> Identifier {
    match top {
        TopLevel::Function { name, .. } | TopLevel::StaticVariable { name, .. } | TopLevel::StaticConstant { name, .. } => {
            name.clone()
        }
    }
}

fn represent_binary_op(op: BinaryOp) -> TacBinaryOp {
    match op {
        BinaryOp::Add => TacBinaryOp::Add,
        BinaryOp::Subtract => TacBinaryOp::Subtract,
        BinaryOp::Multiply => TacBinaryOp::Multiply,
        BinaryOp::Divide => TacBinaryOp::Divide,
        BinaryOp::Remainder => TacBinaryOp::Remainder,
        BinaryOp::BitAnd => TacBinaryOp::BitAnd,
        BinaryOp::BitOr => TacBinaryOp::BitOr,
        BinaryOp::BitXor => TacBinaryOp::BitXor,
        BinaryOp::ShiftLeft => TacBinaryOp::ShiftLeft,
        BinaryOp::ShiftRight => TacBinaryOp::ShiftRight,
        BinaryOp::Equal => TacBinaryOp::Equal,
        BinaryOp::NotEqual => TacBinaryOp::NotEqual,
        BinaryOp::LessThan => TacBinaryOp::LessThan,
        BinaryOp::LessOrEqual => TacBinaryOp::LessOrEqual,
        BinaryOp::GreaterThan => TacBinaryOp::GreaterThan,
        BinaryOp::GreaterOrEqual => TacBinaryOp::GreaterOrEqual,
        BinaryOp::And | BinaryOp::Or => internal_error!("short-circuit operator reached generic binary lowering"),
    }
}

fn zero_constant(ty: &Type) -> Constant {
    match ty {
        Type::Double => Constant::ConstDouble(0.0),
        Type::Long => Constant::ConstLong(0),
        Type::ULong | Type::Pointer(_) => Constant::ConstULong(0),
        Type::UInt => Constant::ConstUInt(0),
        Type::Char | Type::SChar => Constant::ConstChar(0),
        Type::UChar => Constant::ConstUChar(0),
        _ => Constant::ConstInt(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::NameGenerator;
    use crate::lexer::lex;
    use crate::parser::Parser;
    use crate::resolver::Resolver;
    use crate::symbol::StructTable;
    use crate::typecheck::TypeChecker;
    use std::io::Write;

    fn lower_str(src: &str) -> (TacProgram, SymbolTable) {
        let mut f = tempfile::Builder::new().suffix(".c").tempfile().unwrap();
        f.write_all(src.as_bytes()).unwrap();
        let (tokens, _) = lex(f.path(), &[]).unwrap();
        let mut parser = Parser::new(&tokens, f.path().to_path_buf());
        let mut program = parser.parse_program().unwrap();
        let gen = NameGenerator::new();
        let mut resolver = Resolver::new(&gen);
        resolver.resolve_program(&mut program).unwrap();
        let mut symbols = SymbolTable::new();
        let mut structs = StructTable::new();
        let mut checker = TypeChecker::new(&mut symbols, &mut structs);
        checker.check_program(&mut program).unwrap();
        let tac = {
            let mut lowering = TacLowering::new(&mut symbols, &structs, &gen);
            lowering.lower_program(&program)
        };
        (tac, symbols)
    }

    #[test]
    fn every_function_body_ends_in_return() {
        let (tac, _) = lower_str("int main(void) { return 1 + 2; }");
        let TopLevel::Function { body, .. } = tac.top_levels.last().unwrap() else { panic!() };
        assert!(matches!(body.last(), Some(Instruction::Return(_))));
    }

    #[test]
    fn trailing_return_appended_after_explicit_return() {
        let (tac, _) = lower_str("int main(void) { return 5; }");
        let TopLevel::Function { body, .. } = tac.top_levels.last().unwrap() else { panic!() };
        let returns = body.iter().filter(|i| matches!(i, Instruction::Return(_))).count();
        assert_eq!(returns, 2);
    }

    #[test]
    fn if_without_else_jumps_over_then_branch() {
        let (tac, _) = lower_str("int main(void) { if (1) { return 1; } return 0; }");
        let TopLevel::Function { body, .. } = tac.top_levels.last().unwrap() else { panic!() };
        let jz = body.iter().find_map(|i| match i {
            Instruction::JumpIfZero { target, .. } => Some(target.clone()),
            _ => None,
        });
        assert!(jz.is_some());
        let target = jz.unwrap();
        assert!(body.iter().any(|i| matches!(i, Instruction::Label(l) if *l == target)));
    }

    #[test]
    fn static_variable_with_initializer_becomes_top_level() {
        let (tac, _) = lower_str("int x = 5; int main(void) { return x; }");
        let found = tac.top_levels.iter().any(|t| match t {
            TopLevel::StaticVariable { name, init, .. } => {
                name.original_name() == "x" && *init == vec![StaticInit::Int(5)]
            }
            _ => false,
        });
        assert!(found);
    }

    #[test]
    fn static_variables_precede_functions() {
        let (tac, _) = lower_str("int x = 5; int main(void) { return x; }");
        let static_idx = tac.top_levels.iter().position(|t| matches!(t, TopLevel::StaticVariable { .. })).unwrap();
        let fn_idx = tac.top_levels.iter().position(|t| matches!(t, TopLevel::Function { .. })).unwrap();
        assert!(static_idx < fn_idx);
    }

    #[test]
    fn double_to_int_cast_emits_conversion_instruction() {
        let (tac, _) = lower_str("int main(void) { double d = 1.5; int i = (int)d; return i; }");
        let TopLevel::Function { body, .. } = tac.top_levels.last().unwrap() else { panic!() };
        assert!(body.iter().any(|i| matches!(i, Instruction::DoubleToInt { .. })));
    }

    #[test]
    fn every_jump_target_is_labeled_somewhere_in_the_same_function() {
        let (tac, _) =
            lower_str("int main(void) { int a = 1; while (a) { a = a - 1; if (a) { break; } } return 0; }");
        for top in &tac.top_levels {
            let TopLevel::Function { body, .. } = top else { continue };
            let labels: std::collections::HashSet<&Identifier> = body
                .iter()
                .filter_map(|i| match i {
                    Instruction::Label(l) => Some(l),
                    _ => None,
                })
                .collect();
            for instr in body {
                match instr {
                    Instruction::Jump(target) | Instruction::JumpIfZero { target, .. } | Instruction::JumpIfNotZero { target, .. } => {
                        assert!(labels.contains(target), "target {target} not defined in function body");
                    }
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn pointer_arithmetic_lowers_to_add_ptr() {
        let (tac, _) = lower_str("int main(void) { int a[3]; int *p = a; p = p + 1; return 0; }");
        let TopLevel::Function { body, .. } = tac.top_levels.last().unwrap() else { panic!() };
        assert!(body.iter().any(|i| matches!(i, Instruction::AddPtr { .. })));
    }
}
