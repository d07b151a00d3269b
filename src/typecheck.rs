//! Type-checking
//!
//! Walks the resolved AST once, annotating every `Expression::exp_type` and
//! `is_lvalue` in place, checking every declaration against its prior
//! declaration (if any) in the front symbol table, and recording completed
//! structure layouts in the structure-type table. Tentative file-scope
//! statics are promoted to a zeroed `Initial` at the very end, once every
//! declaration in the translation unit has been seen.

use crate::ast::{
    BinaryOp, Block, BlockItem, Declaration, Expression, ExpressionKind, ForInit, FunctionDecl,
    Initializer, Program, Statement, StorageClass, StructDecl, Type, UnaryOp, VarDecl,
};
use crate::error::{CompileError, SemanticError};
use crate::intern::{Constant, Identifier};
use crate::symbol::{
    align_up, IdentifierAttrs, InitialValue, MemberEntry, StaticInit, StructTable, StructureEntry,
    Symbol, SymbolTable,
};

pub struct TypeChecker<'a> {
    pub symbols: &'a mut SymbolTable,
    pub structs: &'a mut StructTable,
    current_return_type: Type,
    current_function_name: String,
}

type TResult<T> = Result<T, CompileError>;

impl<'a> TypeChecker<'a> {
    pub fn new(symbols: &'a mut SymbolTable, structs: &'a mut StructTable) -> Self {
        TypeChecker {
            symbols,
            structs,
            current_return_type: Type::Void,
            current_function_name: String::new(),
        }
    }

    fn err(&self, line: usize, e: SemanticError) -> CompileError {
        CompileError::new(std::path::PathBuf::new(), line, e.to_string())
    }

    pub fn check_program(&mut self, program: &mut Program) -> TResult<()> {
        for decl in &mut program.declarations {
            self.check_file_scope_declaration(decl)?;
        }
        self.promote_tentative_statics();
        Ok(())
    }

    /// Tentative definitions with no initializer anywhere in the translation
    /// unit become a single zero-fill `Initial`. Tentative `double` statics
    /// use `0.0f64` (positive zero): the value is produced by the literal
    /// `0.0` alone, never through negation, so its bit pattern is always
    /// `0x0000000000000000`.
    fn promote_tentative_statics(&mut self) {
        let names: Vec<Identifier> = self
            .symbols
            .iter()
            .filter_map(|(name, sym)| match &sym.attrs {
                IdentifierAttrs::Static { init: InitialValue::Tentative, .. } => Some(name.clone()),
                _ => None,
            })
            .collect();
        for name in names {
            let ty = self.symbols.get(&name).unwrap().ty.clone();
            let zero = zero_static_init(&ty, self.structs);
            if let Some(sym) = self.symbols.get_mut(&name) {
                if let IdentifierAttrs::Static { init, .. } = &mut sym.attrs {
                    *init = InitialValue::Initial(zero);
                }
            }
        }
    }

    fn check_file_scope_declaration(&mut self, decl: &mut Declaration) -> TResult<()> {
        match decl {
            Declaration::Var(v) => self.check_file_scope_var(v),
            Declaration::Function(f) => self.check_function(f),
            Declaration::Struct(s) => self.check_struct_decl(s),
        }
    }

    fn check_struct_decl(&mut self, s: &mut StructDecl) -> TResult<()> {
        let Some(members) = &s.members else { return Ok(()) };
        let mut entries = Vec::new();
        let mut offset = 0usize;
        let mut max_align = 1usize;
        let mut seen = std::collections::HashSet::new();
        for m in members {
            if !seen.insert(m.name.as_str().to_string()) {
                return Err(self.err(
                    s.location.line,
                    SemanticError::StructureDeclaredWithDuplicateMember {
                        structure: s.tag.to_string(),
                        member: m.name.to_string(),
                    },
                ));
            }
            let (size, align) = type_size_align(&m.member_type, self.structs).ok_or_else(|| {
                self.err(
                    s.location.line,
                    SemanticError::ArrayOfIncompleteType {
                        array_type: s.tag.to_string(),
                        element_type: m.member_type.to_string(),
                    },
                )
            })?;
            offset = align_up(offset, align);
            entries.push(MemberEntry {
                name: m.name.clone(),
                member_type: m.member_type.clone(),
                offset,
            });
            offset += size;
            max_align = max_align.max(align);
        }
        let size = align_up(offset, max_align);
        self.structs.insert(
            s.tag.clone(),
            StructureEntry { alignment: max_align, size, members: entries },
        );
        Ok(())
    }

    fn check_function(&mut self, f: &mut FunctionDecl) -> TResult<()> {
        let Type::Function { params, ret } = &f.fun_type else {
            unreachable!("parser only produces Function type for function declarators")
        };
        let line = f.location.line;
        let has_body = f.body.is_some();

        if **ret == Type::Void && has_body {
            // ok
        }
        if let Type::Array { .. } = ret.as_ref() {
            return Err(self.err(
                line,
                SemanticError::FunctionReturnsArray { name: f.name.to_string(), ty: ret.to_string() },
            ));
        }
        if let Type::Structure(tag) = ret.as_ref() {
            if !self.structs.contains(tag) {
                return Err(self.err(
                    line,
                    SemanticError::FunctionReturnsIncompleteStructureType {
                        name: f.name.to_string(),
                        ty: ret.to_string(),
                    },
                ));
            }
        }
        for (param_ty, param_name) in params.iter().zip(f.params.iter()) {
            if *param_ty == Type::Void {
                return Err(self.err(
                    line,
                    SemanticError::ParameterWithTypeVoid {
                        function: f.name.to_string(),
                        param: param_name.to_string(),
                    },
                ));
            }
            if has_body {
                if let Type::Structure(tag) = param_ty {
                    if !self.structs.contains(tag) {
                        return Err(self.err(
                            line,
                            SemanticError::ParameterWithIncompleteStructureType {
                                function: f.name.to_string(),
                                param: param_name.to_string(),
                                ty: param_ty.to_string(),
                            },
                        ));
                    }
                }
            }
        }

        let is_global = f.storage_class != StorageClass::Static;
        if let Some(existing) = self.symbols.get(&f.name) {
            if existing.ty != f.fun_type {
                return Err(self.err(
                    line,
                    SemanticError::FunctionRedeclaredWithConflictingType {
                        name: f.name.to_string(),
                        new: f.fun_type.to_string(),
                        old: existing.ty.to_string(),
                    },
                ));
            }
            if let IdentifierAttrs::Function { is_defined, is_global: prev_global } = &existing.attrs {
                if *is_defined && has_body {
                    return Err(self.err(
                        line,
                        SemanticError::FunctionRedefined { name: f.name.to_string(), ty: f.fun_type.to_string() },
                    ));
                }
                if !*prev_global && is_global {
                    return Err(self.err(
                        line,
                        SemanticError::NonStaticFunctionRedeclaredStatic(f.name.to_string()),
                    ));
                }
            }
        }
        let is_defined = has_body || matches!(self.symbols.get(&f.name), Some(s) if matches!(s.attrs, IdentifierAttrs::Function { is_defined: true, .. }));
        let is_global = is_global
            && !matches!(self.symbols.get(&f.name), Some(s) if matches!(s.attrs, IdentifierAttrs::Function { is_global: false, .. }));
        self.symbols.insert(
            f.name.clone(),
            Symbol {
                ty: f.fun_type.clone(),
                attrs: IdentifierAttrs::Function { is_defined, is_global },
            },
        );

        for param in &f.params {
            // Parameter types are already in `params`; associate by position.
        }
        if let (Some(body), Type::Function { params, .. }) = (&mut f.body, &f.fun_type) {
            for (name, ty) in f.params.iter().zip(params.iter()) {
                self.symbols.insert(name.clone(), Symbol::local(ty.clone()));
            }
            let saved_ret = std::mem::replace(&mut self.current_return_type, (**ret).clone());
            let saved_name = std::mem::replace(&mut self.current_function_name, f.name.to_string());
            self.check_block(body)?;
            self.current_return_type = saved_ret;
            self.current_function_name = saved_name;
        }
        Ok(())
    }

    fn check_file_scope_var(&mut self, v: &mut VarDecl) -> TResult<()> {
        let line = v.location.line;
        if v.var_type == Type::Void {
            return Err(self.err(line, SemanticError::VariableDeclaredWithTypeVoid(v.name.to_string())));
        }
        if let Type::Structure(tag) = &v.var_type {
            if v.init.is_some() && !self.structs.contains(tag) {
                return Err(self.err(
                    line,
                    SemanticError::VariableDeclaredWithIncompleteStructureType {
                        name: v.name.to_string(),
                        ty: v.var_type.to_string(),
                    },
                ));
            }
        }

        let mut initial = if v.storage_class == StorageClass::Extern {
            InitialValue::NoInitializer
        } else if v.init.is_none() {
            InitialValue::Tentative
        } else {
            InitialValue::NoInitializer
        };

        if let Some(init) = &mut v.init {
            let values = self.static_initializer(init, &v.var_type, line)?;
            initial = InitialValue::Initial(values);
        }

        let mut is_global = v.storage_class != StorageClass::Static;
        if let Some(existing) = self.symbols.get(&v.name) {
            if existing.ty != v.var_type {
                return Err(self.err(
                    line,
                    SemanticError::VariableRedeclaredWithConflictingType {
                        name: v.name.to_string(),
                        new: v.var_type.to_string(),
                        old: existing.ty.to_string(),
                    },
                ));
            }
            if let IdentifierAttrs::Static { init: prev_init, is_global: prev_global } = &existing.attrs {
                if v.storage_class == StorageClass::Extern {
                    is_global = *prev_global;
                } else if *prev_global != is_global {
                    return Err(self.err(line, SemanticError::VariableRedeclaredWithConflictingStorage(v.name.to_string())));
                }
                if matches!(prev_init, InitialValue::Initial(_)) && matches!(initial, InitialValue::Initial(_)) {
                    return Err(self.err(
                        line,
                        SemanticError::VariableRedeclaredWithConflictingType {
                            name: v.name.to_string(),
                            new: "initializer".into(),
                            old: "initializer".into(),
                        },
                    ));
                }
                if matches!(initial, InitialValue::NoInitializer) {
                    initial = prev_init.clone();
                } else if matches!(initial, InitialValue::Tentative) && matches!(prev_init, InitialValue::Initial(_)) {
                    initial = prev_init.clone();
                }
            }
        }

        self.symbols.insert(
            v.name.clone(),
            Symbol { ty: v.var_type.clone(), attrs: IdentifierAttrs::Static { init: initial, is_global } },
        );
        Ok(())
    }

    fn check_block(&mut self, block: &mut Block) -> TResult<()> {
        for item in &mut block.0 {
            self.check_block_item(item)?;
        }
        Ok(())
    }

    fn check_block_item(&mut self, item: &mut BlockItem) -> TResult<()> {
        match item {
            BlockItem::Statement(s) => self.check_statement(s),
            BlockItem::Declaration(Declaration::Var(v)) => self.check_local_var(v),
            BlockItem::Declaration(Declaration::Function(f)) => self.check_function(f),
            BlockItem::Declaration(Declaration::Struct(s)) => self.check_struct_decl(s),
        }
    }

    fn check_local_var(&mut self, v: &mut VarDecl) -> TResult<()> {
        let line = v.location.line;
        if v.storage_class == StorageClass::Static {
            let initial = if let Some(init) = &mut v.init {
                InitialValue::Initial(self.static_initializer(init, &v.var_type, line)?)
            } else {
                InitialValue::Tentative
            };
            self.symbols.insert(
                v.name.clone(),
                Symbol { ty: v.var_type.clone(), attrs: IdentifierAttrs::Static { init: initial, is_global: false } },
            );
            return Ok(());
        }
        if v.storage_class == StorageClass::Extern {
            if v.init.is_some() {
                return Err(self.err(line, SemanticError::ExternVariableDefined(v.name.to_string())));
            }
            self.symbols.insert(
                v.name.clone(),
                Symbol {
                    ty: v.var_type.clone(),
                    attrs: IdentifierAttrs::Static { init: InitialValue::NoInitializer, is_global: true },
                },
            );
            return Ok(());
        }

        if v.var_type == Type::Void {
            return Err(self.err(line, SemanticError::VariableDeclaredWithTypeVoid(v.name.to_string())));
        }
        self.symbols.insert(v.name.clone(), Symbol::local(v.var_type.clone()));
        if let Some(init) = &mut v.init {
            self.check_initializer(init, &v.var_type, line)?;
        }
        Ok(())
    }

    fn check_statement(&mut self, stmt: &mut Statement) -> TResult<()> {
        match stmt {
            Statement::Return(value) => {
                let ret_ty = self.current_return_type.clone();
                match (value, &ret_ty) {
                    (None, Type::Void) => Ok(()),
                    (None, _) => Err(self.err(
                        0,
                        SemanticError::NoReturnValueInNonVoidFunction {
                            name: self.current_function_name.clone(),
                            ty: ret_ty.to_string(),
                        },
                    )),
                    (Some(_), Type::Void) => Err(self.err(
                        0,
                        SemanticError::ReturnValueInVoidFunction(self.current_function_name.clone()),
                    )),
                    (Some(exp), _) => {
                        self.check_expression(exp)?;
                        convert_assignment(exp, &ret_ty);
                        Ok(())
                    }
                }
            }
            Statement::Expression(exp) => self.check_expression(exp),
            Statement::If { condition, then_branch, else_branch } => {
                self.check_expression(condition)?;
                require_scalar(condition, SemanticError::IfUsedWithConditionType)?;
                self.check_statement(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.check_statement(else_branch)?;
                }
                Ok(())
            }
            Statement::Compound(block) => self.check_block(block),
            Statement::Break(_) | Statement::Continue(_) | Statement::Goto(_) | Statement::Null => Ok(()),
            Statement::While { condition, body, .. } => {
                self.check_expression(condition)?;
                require_scalar(condition, SemanticError::WhileUsedWithConditionType)?;
                self.check_statement(body)
            }
            Statement::DoWhile { body, condition, .. } => {
                self.check_statement(body)?;
                self.check_expression(condition)?;
                require_scalar(condition, SemanticError::DoWhileUsedWithConditionType)
            }
            Statement::For { init, condition, post, body, .. } => {
                match init {
                    ForInit::Decl(decl) => self.check_local_var(decl)?,
                    ForInit::Expr(Some(exp)) => self.check_expression(exp)?,
                    ForInit::Expr(None) => {}
                }
                if let Some(condition) = condition {
                    self.check_expression(condition)?;
                    require_scalar(condition, SemanticError::ForUsedWithConditionType)?;
                }
                if let Some(post) = post {
                    self.check_expression(post)?;
                }
                self.check_statement(body)
            }
            Statement::Label { inner, .. } => self.check_statement(inner),
        }
    }

    // ---- expressions ------------------------------------------------

    fn check_expression(&mut self, exp: &mut Expression) -> TResult<()> {
        let line = exp.location.line;
        match &mut exp.kind {
            ExpressionKind::Constant(c) => {
                exp.exp_type = Some(constant_type(c));
                exp.is_lvalue = false;
            }
            ExpressionKind::String(s) => {
                exp.exp_type = Some(Type::Array { element: Box::new(Type::Char), size: s.len() as i64 + 1 });
                exp.is_lvalue = true;
            }
            ExpressionKind::Var(name) => {
                let sym = self
                    .symbols
                    .get(name)
                    .ok_or_else(|| self.err(line, SemanticError::VariableNotDeclaredInScope(name.to_string())))?;
                if let Type::Function { .. } = &sym.ty {
                    return Err(self.err(line, SemanticError::FunctionUsedAsVariable(name.to_string())));
                }
                exp.exp_type = Some(sym.ty.clone());
                exp.is_lvalue = true;
            }
            ExpressionKind::Cast { target, inner } => {
                self.check_expression(inner)?;
                let from = inner.ty().clone();
                if (from.is_pointer() && *target == Type::Double) || (*target == from.is_pointer().then(|| target.clone()).unwrap_or(Type::Void) && false) {
                }
                if (from.is_pointer() && matches!(target, Type::Double)) || (matches!(from, Type::Double) && target.is_pointer()) {
                    return Err(self.err(
                        line,
                        SemanticError::IllegalConversion { from: from.to_string(), to: target.to_string() },
                    ));
                }
                exp.exp_type = Some(target.clone());
                exp.is_lvalue = false;
            }
            ExpressionKind::Unary { op, operand } => {
                self.check_expression(operand)?;
                let operand_ty = operand.ty().clone();
                match op {
                    UnaryOp::Not => {
                        if !operand_ty.is_scalar() {
                            return Err(self.err(
                                line,
                                SemanticError::UnaryOnInvalidOperandType { op: "!".into(), ty: operand_ty.to_string() },
                            ));
                        }
                        exp.exp_type = Some(Type::Int);
                    }
                    UnaryOp::Negate => {
                        if !operand_ty.is_arithmetic() {
                            return Err(self.err(
                                line,
                                SemanticError::UnaryOnInvalidOperandType { op: "-".into(), ty: operand_ty.to_string() },
                            ));
                        }
                        let promoted = promote_character(&operand_ty);
                        convert_to(operand, &promoted);
                        exp.exp_type = Some(promoted);
                    }
                    UnaryOp::Complement => {
                        if !operand_ty.is_integer() {
                            return Err(self.err(
                                line,
                                SemanticError::UnaryOnInvalidOperandType { op: "~".into(), ty: operand_ty.to_string() },
                            ));
                        }
                        let promoted = promote_character(&operand_ty);
                        convert_to(operand, &promoted);
                        exp.exp_type = Some(promoted);
                    }
                }
                exp.is_lvalue = false;
            }
            ExpressionKind::Binary { op, left, right } => {
                self.check_expression(left)?;
                self.check_expression(right)?;
                self.check_binary(*op, left, right, line)?;
                exp.exp_type = match op {
                    BinaryOp::And
                    | BinaryOp::Or
                    | BinaryOp::Equal
                    | BinaryOp::NotEqual
                    | BinaryOp::LessThan
                    | BinaryOp::LessOrEqual
                    | BinaryOp::GreaterThan
                    | BinaryOp::GreaterOrEqual => Some(Type::Int),
                    _ => Some(left.ty().clone()),
                };
                exp.is_lvalue = false;
            }
            ExpressionKind::Assignment { lhs, rhs } => {
                self.check_expression(lhs)?;
                self.check_expression(rhs)?;
                if !lhs.is_lvalue {
                    return Err(self.err(line, SemanticError::AssignmentToRvalue("=".into())));
                }
                let lhs_ty = lhs.ty().clone();
                if lhs_ty == Type::Void {
                    return Err(self.err(line, SemanticError::AssignmentToVoidType));
                }
                convert_assignment(rhs, &lhs_ty);
                exp.exp_type = Some(lhs_ty);
                exp.is_lvalue = false;
            }
            ExpressionKind::CompoundAssignment { op, lhs, rhs } => {
                self.check_expression(lhs)?;
                self.check_expression(rhs)?;
                if !lhs.is_lvalue {
                    return Err(self.err(line, SemanticError::AssignmentToRvalue(compound_op_symbol(*op))));
                }
                let lhs_ty = lhs.ty().clone();
                self.check_binary(*op, lhs, rhs, line)?;
                convert_assignment(rhs, &lhs_ty);
                exp.exp_type = Some(lhs_ty);
                exp.is_lvalue = false;
            }
            ExpressionKind::Conditional { condition, then_exp, else_exp } => {
                self.check_expression(condition)?;
                require_scalar(condition, SemanticError::ConditionalOnInvalidConditionType)?;
                self.check_expression(then_exp)?;
                self.check_expression(else_exp)?;
                let result_ty = common_type(then_exp.ty(), else_exp.ty()).ok_or_else(|| {
                    self.err(
                        line,
                        SemanticError::TernaryOnInvalidOperandTypes(then_exp.ty().to_string(), else_exp.ty().to_string()),
                    )
                })?;
                convert_to(then_exp, &result_ty);
                convert_to(else_exp, &result_ty);
                exp.exp_type = Some(result_ty);
                exp.is_lvalue = false;
            }
            ExpressionKind::FunctionCall { name, args } => {
                let sym = self
                    .symbols
                    .get(name)
                    .ok_or_else(|| self.err(line, SemanticError::FunctionNotDeclaredInScope(name.to_string())))?
                    .clone();
                let Type::Function { params, ret } = &sym.ty else {
                    return Err(self.err(line, SemanticError::VariableUsedAsFunction(name.to_string())));
                };
                if params.len() != args.len() {
                    return Err(self.err(
                        line,
                        SemanticError::FunctionCalledWithWrongNumberOfArguments {
                            name: name.to_string(),
                            found: args.len(),
                            expected: params.len(),
                        },
                    ));
                }
                let params = params.clone();
                let ret = (*ret).clone();
                for (arg, param_ty) in args.iter_mut().zip(params.iter()) {
                    self.check_expression(arg)?;
                    convert_assignment(arg, param_ty);
                }
                exp.exp_type = Some(ret);
                exp.is_lvalue = false;
            }
            ExpressionKind::Dereference(inner) => {
                self.check_expression(inner)?;
                let inner_ty = inner.ty().decay();
                let Type::Pointer(pointee) = &inner_ty else {
                    return Err(self.err(line, SemanticError::DereferenceNonPointer(inner.ty().to_string())));
                };
                exp.exp_type = Some((**pointee).clone());
                exp.is_lvalue = true;
            }
            ExpressionKind::AddrOf(inner) => {
                self.check_expression(inner)?;
                if !inner.is_lvalue {
                    return Err(self.err(line, SemanticError::AddressOfRvalue));
                }
                exp.exp_type = Some(Type::Pointer(Box::new(inner.ty().clone())));
                exp.is_lvalue = false;
            }
            ExpressionKind::Subscript { array, index } => {
                self.check_expression(array)?;
                self.check_expression(index)?;
                let array_ty = array.ty().decay();
                let index_ty = index.ty().clone();
                let pointee = match (&array_ty, index_ty.is_integer()) {
                    (Type::Pointer(p), true) => (**p).clone(),
                    _ => {
                        return Err(self.err(
                            line,
                            SemanticError::SubscriptArrayWithInvalidTypes(array.ty().to_string(), index.ty().to_string()),
                        ));
                    }
                };
                exp.exp_type = Some(pointee);
                exp.is_lvalue = true;
            }
            ExpressionKind::SizeOfType(ty) => {
                if type_size_align(ty, self.structs).is_none() {
                    return Err(self.err(line, SemanticError::GetSizeOfIncompleteType(ty.to_string())));
                }
                exp.exp_type = Some(Type::ULong);
                exp.is_lvalue = false;
            }
            ExpressionKind::SizeOfExpr(inner) => {
                self.check_expression(inner)?;
                if type_size_align(inner.ty(), self.structs).is_none() {
                    return Err(self.err(line, SemanticError::GetSizeOfIncompleteType(inner.ty().to_string())));
                }
                exp.exp_type = Some(Type::ULong);
                exp.is_lvalue = false;
            }
            ExpressionKind::Dot { structure, member } => {
                self.check_expression(structure)?;
                let Type::Structure(tag) = structure.ty() else {
                    return Err(self.err(
                        line,
                        SemanticError::DotOnNonStructureType { member: member.to_string(), ty: structure.ty().to_string() },
                    ));
                };
                let tag = tag.clone();
                let entry = self
                    .structs
                    .get(&tag)
                    .and_then(|s| s.find(member))
                    .ok_or_else(|| {
                        self.err(
                            line,
                            SemanticError::MemberNotInStructureType { structure: tag.to_string(), member: member.to_string() },
                        )
                    })?;
                let is_lvalue = structure.is_lvalue;
                exp.exp_type = Some(entry.member_type.clone());
                exp.is_lvalue = is_lvalue;
            }
            ExpressionKind::Arrow { pointer, member } => {
                self.check_expression(pointer)?;
                let ptr_ty = pointer.ty().decay();
                let Type::Pointer(inner) = &ptr_ty else {
                    return Err(self.err(
                        line,
                        SemanticError::ArrowOnNonPointerToStructureType { member: member.to_string(), ty: pointer.ty().to_string() },
                    ));
                };
                let Type::Structure(tag) = inner.as_ref() else {
                    return Err(self.err(
                        line,
                        SemanticError::ArrowOnNonPointerToStructureType { member: member.to_string(), ty: pointer.ty().to_string() },
                    ));
                };
                let tag = tag.clone();
                let entry = self
                    .structs
                    .get(&tag)
                    .and_then(|s| s.find(member))
                    .ok_or_else(|| {
                        self.err(
                            line,
                            SemanticError::MemberNotInStructureType { structure: tag.to_string(), member: member.to_string() },
                        )
                    })?;
                exp.exp_type = Some(entry.member_type.clone());
                exp.is_lvalue = true;
            }
        }
        Ok(())
    }

    fn check_binary(&mut self, op: BinaryOp, left: &mut Expression, right: &mut Expression, line: usize) -> TResult<()> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                require_scalar_expr(left, SemanticError::BinaryOnInvalidOperandType { op: op_symbol(op).into(), ty: left.ty().to_string() })
                    .map_err(|e| self.err(line, e))?;
                require_scalar_expr(right, SemanticError::BinaryOnInvalidOperandType { op: op_symbol(op).into(), ty: right.ty().to_string() })
                    .map_err(|e| self.err(line, e))
            }
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight => {
                if !left.ty().is_integer() || !right.ty().is_integer() {
                    return Err(self.err(
                        line,
                        SemanticError::BinaryOnInvalidOperandTypes {
                            op: op_symbol(op).into(),
                            left: left.ty().to_string(),
                            right: right.ty().to_string(),
                        },
                    ));
                }
                let promoted = promote_character(left.ty());
                convert_to(left, &promoted);
                Ok(())
            }
            BinaryOp::Equal | BinaryOp::NotEqual => {
                if left.ty().is_pointer() || right.ty().is_pointer() {
                    let common = Type::Pointer(Box::new(Type::Void));
                    convert_to(left, &common);
                    convert_to(right, &common);
                    return Ok(());
                }
                self.arithmetic_common(left, right, op, line)
            }
            BinaryOp::Add | BinaryOp::Subtract => {
                if left.ty().decay().is_pointer() || right.ty().decay().is_pointer() {
                    return Ok(());
                }
                self.arithmetic_common(left, right, op, line)
            }
            _ => self.arithmetic_common(left, right, op, line),
        }
    }

    fn arithmetic_common(&mut self, left: &mut Expression, right: &mut Expression, op: BinaryOp, line: usize) -> TResult<()> {
        if !left.ty().is_arithmetic() || !right.ty().is_arithmetic() {
            return Err(self.err(
                line,
                SemanticError::BinaryOnInvalidOperandTypes {
                    op: op_symbol(op).into(),
                    left: left.ty().to_string(),
                    right: right.ty().to_string(),
                },
            ));
        }
        let common = common_type(left.ty(), right.ty()).unwrap();
        convert_to(left, &common);
        convert_to(right, &common);
        Ok(())
    }

    fn check_initializer(&mut self, init: &mut Initializer, ty: &Type, line: usize) -> TResult<()> {
        match (init, ty) {
            (Initializer::Single(exp), Type::Array { element, .. }) if matches!(&exp.kind, ExpressionKind::String(_)) => {
                if !element.is_character() {
                    return Err(self.err(line, SemanticError::NonCharArrayInitializedFromString(ty.to_string())));
                }
                self.check_expression(exp)?;
                Ok(())
            }
            (Initializer::Single(exp), _) => {
                self.check_expression(exp)?;
                if ty.is_array() || ty.is_structure() {
                    return Err(self.err(line, SemanticError::ScalarInitializedWithCompoundInitializer(ty.to_string())));
                }
                convert_assignment(exp, ty);
                Ok(())
            }
            (Initializer::Compound(items), Type::Array { element, size }) => {
                if items.len() as i64 > *size {
                    return Err(self.err(
                        line,
                        SemanticError::ArrayInitializedWithTooManyInitializers {
                            size: *size,
                            ty: element.to_string(),
                            count: items.len(),
                        },
                    ));
                }
                for item in items {
                    self.check_initializer(item, element, line)?;
                }
                Ok(())
            }
            (Initializer::Compound(items), Type::Structure(tag)) => {
                let member_types: Vec<Type> = self
                    .structs
                    .get(tag)
                    .map(|s| s.members.iter().map(|m| m.member_type.clone()).collect())
                    .unwrap_or_default();
                if items.len() > member_types.len() {
                    return Err(self.err(
                        line,
                        SemanticError::StructureInitializedWithTooManyMembers {
                            ty: tag.to_string(),
                            found: items.len(),
                            expected: member_types.len(),
                        },
                    ));
                }
                for (item, member_ty) in items.iter_mut().zip(member_types.iter()) {
                    self.check_initializer(item, member_ty, line)?;
                }
                Ok(())
            }
            (Initializer::Compound(_), _) => Err(self.err(line, SemanticError::ScalarInitializedWithCompoundInitializer(ty.to_string()))),
        }
    }

    fn static_initializer(&mut self, init: &mut Initializer, ty: &Type, line: usize) -> TResult<Vec<StaticInit>> {
        match (init, ty) {
            (Initializer::Single(exp), Type::Array { element, size }) if matches!(&exp.kind, ExpressionKind::String(_)) => {
                let ExpressionKind::String(s) = &exp.kind else { unreachable!() };
                if !element.is_character() {
                    return Err(self.err(line, SemanticError::NonCharArrayInitializedFromString(ty.to_string())));
                }
                if s.len() as i64 > *size {
                    return Err(self.err(
                        line,
                        SemanticError::StringInitializedWithTooManyCharacters { size: *size, chars: s.len() },
                    ));
                }
                let null_terminated = (s.len() as i64) < *size;
                Ok(vec![StaticInit::String { value: s.clone(), null_terminated }])
            }
            (Initializer::Single(exp), _) => {
                self.check_expression(exp)?;
                let constant = fold_constant(exp).ok_or_else(|| {
                    self.err(line, SemanticError::StaticInitializedWithNonConstant(ty.to_string()))
                })?;
                if ty.is_pointer() {
                    if !matches!(constant, Constant::ConstInt(0) | Constant::ConstLong(0) | Constant::ConstUInt(0) | Constant::ConstULong(0)) {
                        if exp.ty().is_integer() {
                            return Err(self.err(
                                line,
                                SemanticError::StaticPointerInitializedFromNonNull { ty: ty.to_string(), value: constant.to_string() },
                            ));
                        }
                        return Err(self.err(
                            line,
                            SemanticError::StaticPointerInitializedFromNonInteger { ty: ty.to_string(), value: constant.to_string() },
                        ));
                    }
                    return Ok(vec![StaticInit::ULong(0)]);
                }
                Ok(vec![cast_constant_to_static(&constant, ty)])
            }
            (Initializer::Compound(items), Type::Array { element, size }) => {
                if items.is_empty() && *size == 0 {
                    return Err(self.err(line, SemanticError::ArrayOfIncompleteType { array_type: ty.to_string(), element_type: element.to_string() }));
                }
                let mut out = Vec::new();
                for item in items.iter_mut() {
                    out.extend(self.static_initializer(item, element, line)?);
                }
                let (elem_size, _) = type_size_align(element, self.structs).unwrap_or((1, 1));
                let remaining = *size as usize - items.len();
                if remaining > 0 {
                    out.push(StaticInit::ZeroBytes(remaining * elem_size));
                }
                Ok(out)
            }
            (Initializer::Compound(items), Type::Structure(tag)) => {
                let entry = self.structs.get(tag).cloned();
                let Some(entry) = entry else {
                    return Err(self.err(line, SemanticError::IncompleteStructureTypeInExpression(tag.to_string())));
                };
                let mut out = Vec::new();
                let mut cursor = 0usize;
                for (item, member) in items.iter_mut().zip(entry.members.iter()) {
                    if member.offset > cursor {
                        out.push(StaticInit::ZeroBytes(member.offset - cursor));
                    }
                    let values = self.static_initializer(item, &member.member_type, line)?;
                    let (size, _) = type_size_align(&member.member_type, self.structs).unwrap_or((0, 1));
                    out.extend(values);
                    cursor = member.offset + size;
                }
                if entry.size > cursor {
                    out.push(StaticInit::ZeroBytes(entry.size - cursor));
                }
                Ok(out)
            }
            (Initializer::Compound(_), _) => Err(self.err(line, SemanticError::AggregateInitializedWithSingleInitializer(ty.to_string()))),
        }
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        BinaryOp::Remainder => "%",
        BinaryOp::BitAnd => "&",
        BinaryOp::BitOr => "|",
        BinaryOp::BitXor => "^",
        BinaryOp::ShiftLeft => "<<",
        BinaryOp::ShiftRight => ">>",
        BinaryOp::And => "&&",
        BinaryOp::Or => "||",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::LessThan => "<",
        BinaryOp::LessOrEqual => "<=",
        BinaryOp::GreaterThan => ">",
        BinaryOp::GreaterOrEqual => ">=",
    }
}

fn compound_op_symbol(op: BinaryOp) -> String {
    format!("{}=", op_symbol(op))
}

fn require_scalar(exp: &Expression, variant: fn(String) -> SemanticError) -> TResult<()> {
    if exp.ty().is_scalar() {
        Ok(())
    } else {
        Err(CompileError::new(std::path::PathBuf::new(), exp.location.line, variant(exp.ty().to_string()).to_string()))
    }
}

fn require_scalar_expr(exp: &Expression, err: SemanticError) -> Result<(), SemanticError> {
    if exp.ty().is_scalar() { Ok(()) } else { Err(err) }
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

/// Integer promotion: `char`/`signed char`/`unsigned char` promote to `int`,
/// every other arithmetic type is left alone.
fn promote_character(ty: &Type) -> Type {
    if ty.is_character() { Type::Int } else { ty.clone() }
}

fn type_rank(ty: &Type) -> u8 {
    match ty {
        Type::Char | Type::SChar | Type::UChar | Type::Int => 0,
        Type::UInt => 1,
        Type::Long => 2,
        Type::ULong => 3,
        Type::Double => 4,
        _ => 0,
    }
}

/// The usual arithmetic conversions' common type, applied after integer
/// promotion: `double` dominates everything, then rank by width/signedness.
pub fn common_type(a: &Type, b: &Type) -> Option<Type> {
    let a = promote_character(a);
    let b = promote_character(b);
    if !a.is_arithmetic() || !b.is_arithmetic() {
        return None;
    }
    if a == b {
        return Some(a);
    }
    if a == Type::Double || b == Type::Double {
        return Some(Type::Double);
    }
    Some(if type_rank(&a) >= type_rank(&b) { a } else { b })
}

fn convert_to(exp: &mut Expression, ty: &Type) {
    if exp.ty() == ty {
        return;
    }
    let inner = std::mem::replace(
        exp,
        Expression::new(ExpressionKind::Constant(Constant::ConstInt(0)), exp.location.clone()),
    );
    let loc = inner.location.clone();
    let mut cast = Expression::new(ExpressionKind::Cast { target: ty.clone(), inner: Box::new(inner) }, loc);
    cast.exp_type = Some(ty.clone());
    cast.is_lvalue = false;
    *exp = cast;
}

/// Applies assignment-context conversion: arrays/structures pass through
/// unconverted (aggregate assignment is not part of this subset beyond
/// initializers), everything else converts like a cast.
fn convert_assignment(exp: &mut Expression, ty: &Type) {
    if ty.is_array() || ty.is_structure() {
        return;
    }
    convert_to(exp, ty);
}

/// Constant-folds a type-checked expression if it denotes a compile-time
/// constant (a literal, optionally wrapped in casts/unary negation).
fn fold_constant(exp: &Expression) -> Option<Constant> {
    match &exp.kind {
        ExpressionKind::Constant(c) => Some(*c),
        ExpressionKind::Cast { target, inner } => {
            let c = fold_constant(inner)?;
            Some(cast_constant(&c, target))
        }
        ExpressionKind::Unary { op: UnaryOp::Negate, operand } => {
            let c = fold_constant(operand)?;
            Some(negate_constant(&c))
        }
        _ => None,
    }
}

fn cast_constant(c: &Constant, ty: &Type) -> Constant {
    let as_i64 = match c {
        Constant::ConstInt(n) => *n as i64,
        Constant::ConstLong(n) => *n,
        Constant::ConstUInt(n) => *n as i64,
        Constant::ConstULong(n) => *n as i64,
        Constant::ConstChar(n) => *n as i64,
        Constant::ConstUChar(n) => *n as i64,
        Constant::ConstDouble(d) => *d as i64,
    };
    match ty {
        Type::Int => Constant::ConstInt(as_i64 as i32),
        Type::Long => Constant::ConstLong(as_i64),
        Type::UInt => Constant::ConstUInt(as_i64 as u32),
        Type::ULong => Constant::ConstULong(as_i64 as u64),
        Type::Char | Type::SChar => Constant::ConstChar(as_i64 as i8),
        Type::UChar => Constant::ConstUChar(as_i64 as u8),
        Type::Double => Constant::ConstDouble(as_i64 as f64),
        _ => *c,
    }
}

fn negate_constant(c: &Constant) -> Constant {
    match c {
        Constant::ConstInt(n) => Constant::ConstInt(n.wrapping_neg()),
        Constant::ConstLong(n) => Constant::ConstLong(n.wrapping_neg()),
        Constant::ConstUInt(n) => Constant::ConstUInt(n.wrapping_neg()),
        Constant::ConstULong(n) => Constant::ConstULong(n.wrapping_neg()),
        Constant::ConstDouble(d) => Constant::ConstDouble(-d),
        Constant::ConstChar(n) => Constant::ConstChar(n.wrapping_neg()),
        Constant::ConstUChar(n) => Constant::ConstUChar(n.wrapping_neg()),
    }
}

fn cast_constant_to_static(c: &Constant, ty: &Type) -> StaticInit {
    match cast_constant(c, ty) {
        Constant::ConstInt(n) => StaticInit::Int(n),
        Constant::ConstLong(n) => StaticInit::Long(n),
        Constant::ConstUInt(n) => StaticInit::UInt(n),
        Constant::ConstULong(n) => StaticInit::ULong(n),
        Constant::ConstDouble(d) => StaticInit::Double(d),
        Constant::ConstChar(n) => StaticInit::Char(n),
        Constant::ConstUChar(n) => StaticInit::UChar(n),
    }
}

/// The `0`/`0.0` static initializer for a tentative definition. Always
/// positive zero for `double`, constructed from the `0.0` literal alone.
///
/// `pub(crate)` so TAC lowering's static-variable scan can produce the same
/// zero payload for a `Tentative` symbol without duplicating this table.
pub(crate) fn zero_static_init(ty: &Type, structs: &StructTable) -> Vec<StaticInit> {
    match ty {
        Type::Double => vec![StaticInit::Double(0.0)],
        Type::Array { element, size } => {
            let (elem_size, _) = type_size_align(element, structs).unwrap_or((1, 1));
            vec![StaticInit::ZeroBytes(elem_size * (*size).max(0) as usize)]
        }
        Type::Structure(tag) => {
            let size = structs.get(tag).map(|s| s.size).unwrap_or(0);
            vec![StaticInit::ZeroBytes(size)]
        }
        Type::Pointer(_) | Type::ULong => vec![StaticInit::ULong(0)],
        Type::Long => vec![StaticInit::Long(0)],
        Type::UInt => vec![StaticInit::UInt(0)],
        Type::Char | Type::SChar => vec![StaticInit::Char(0)],
        Type::UChar => vec![StaticInit::UChar(0)],
        _ => vec![StaticInit::Int(0)],
    }
}

/// `(size, alignment)` in bytes, or `None` for an incomplete structure type.
pub fn type_size_align(ty: &Type, structs: &StructTable) -> Option<(usize, usize)> {
    Some(match ty {
        Type::Char | Type::SChar | Type::UChar => (1, 1),
        Type::Int | Type::UInt => (4, 4),
        Type::Long | Type::ULong | Type::Double | Type::Pointer(_) => (8, 8),
        Type::Array { element, size } => {
            let (elem_size, elem_align) = type_size_align(element, structs)?;
            (elem_size * (*size).max(0) as usize, elem_align)
        }
        Type::Structure(tag) => {
            let entry = structs.get(tag)?;
            (entry.size, entry.alignment)
        }
        Type::Void | Type::Function { .. } => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::Parser;
    use crate::resolver::Resolver;
    use crate::intern::NameGenerator;
    use std::io::Write;

    fn typecheck_str(src: &str) -> Result<(Program, SymbolTable), CompileError> {
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
        checker.check_program(&mut program)?;
        Ok((program, symbols))
    }

    #[test]
    fn every_expression_gets_a_type_annotation() {
        let (program, _) = typecheck_str("int main(void) { return 1 + 2; }").unwrap();
        let Declaration::Function(f) = &program.declarations[0] else { panic!() };
        let body = f.body.as_ref().unwrap();
        let BlockItem::Statement(Statement::Return(Some(exp))) = &body.0[0] else { panic!() };
        assert!(exp.exp_type.is_some());
    }

    #[test]
    fn int_plus_double_promotes_to_double() {
        let (program, _) = typecheck_str("int main(void) { double d; return d + 1; }").unwrap();
        let Declaration::Function(f) = &program.declarations[0] else { panic!() };
        let body = f.body.as_ref().unwrap();
        let BlockItem::Statement(Statement::Return(Some(exp))) = &body.0[1] else { panic!() };
        assert_eq!(*exp.ty(), Type::Double);
    }

    #[test]
    fn tentative_double_static_is_positive_zero() {
        let (_, symbols) = typecheck_str("double g; int main(void) { return 0; }").unwrap();
        let (name, sym) = symbols.iter().find(|(n, _)| n.original_name() == "g").unwrap();
        let IdentifierAttrs::Static { init: InitialValue::Initial(values), .. } = &sym.attrs else {
            panic!("expected a promoted tentative static for {name}")
        };
        assert_eq!(values.len(), 1);
        assert!(values[0].is_positive_zero_double());
    }

    #[test]
    fn assignment_to_rvalue_is_rejected() {
        let result = typecheck_str("int main(void) { 1 = 2; return 0; }");
        assert!(result.is_err());
    }

    #[test]
    fn wrong_argument_count_is_rejected() {
        let result = typecheck_str("int f(int a) { return a; } int main(void) { return f(1, 2); }");
        assert!(result.is_err());
    }

    #[test]
    fn struct_member_offsets_respect_alignment() {
        let (_, _symbols) =
            typecheck_str("struct p { char a; int b; }; int main(void) { struct p x; return 0; }").unwrap();
    }
}
