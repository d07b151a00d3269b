//! Recursive-descent parser with Pratt-style precedence climbing for binary
//! expressions.
//!
//! Declarators are parsed into an abstract `Declarator` tree (spelled out in
//! `ast.rs`) and only applied to a base type afterward, by `process_declarator`,
//! the same two-phase approach C grammars use to cope with declarators that
//! wrap the declared name in arbitrarily nested pointer/array/function layers.

use std::path::PathBuf;

use crate::ast::{
    BinaryOp, Block, BlockItem, Declaration, Declarator, Expression, ExpressionKind, ForInit,
    FunctionDecl, Initializer, MemberDecl, Program, SourceLocation, Statement, StorageClass,
    StructDecl, Type, UnaryOp, VarDecl,
};
use crate::error::{CompileError, ParserError};
use crate::intern::{Constant, Identifier};
use crate::lexer::{Token, TokenKind};

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    file: PathBuf,
}

type PResult<T> = Result<T, CompileError>;

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token], file: PathBuf) -> Self {
        Parser { tokens, pos: 0, file }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn current_line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.total_line_number)
            .unwrap_or(0)
    }

    fn loc(&self) -> SourceLocation {
        SourceLocation::new(self.file.clone(), self.current_line())
    }

    fn advance(&mut self) -> PResult<&Token> {
        let tok = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| self.err(ParserError::ReachedEndOfFile))?;
        self.pos += 1;
        Ok(tok)
    }

    fn err(&self, e: ParserError) -> CompileError {
        CompileError::new(self.file.clone(), self.current_line(), e.to_string())
    }

    fn expect(&mut self, kind: TokenKind, expected_display: &str) -> PResult<Token> {
        match self.peek() {
            Some(t) if t.kind == kind => {
                let t = t.clone();
                self.pos += 1;
                Ok(t)
            }
            Some(t) => Err(self.err(ParserError::UnexpectedNextToken {
                found: t.text.clone(),
                expected: expected_display.to_string(),
            })),
            None => Err(self.err(ParserError::ReachedEndOfFile)),
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    /// Parse a whole translation unit.
    pub fn parse_program(&mut self) -> PResult<Program> {
        let mut declarations = Vec::new();
        while self.peek().is_some() {
            declarations.push(self.parse_declaration()?);
        }
        Ok(Program { declarations })
    }

    // ---- declarations ----------------------------------------------------

    fn parse_type_specifiers(&mut self) -> PResult<Type> {
        let mut specs: Vec<TokenKind> = Vec::new();
        loop {
            match self.peek_kind() {
                Some(
                    k @ (TokenKind::KeyChar
                    | TokenKind::KeyInt
                    | TokenKind::KeyLong
                    | TokenKind::KeyDouble
                    | TokenKind::KeySigned
                    | TokenKind::KeyUnsigned
                    | TokenKind::KeyVoid),
                ) => {
                    specs.push(k);
                    self.advance()?;
                }
                _ => break,
            }
        }
        type_from_specifiers(&specs).map_err(|tokens| {
            self.err(ParserError::UnexpectedTypeSpecifierList(tokens))
        })
    }

    fn is_type_specifier_start(&self) -> bool {
        matches!(
            self.peek_kind(),
            Some(
                TokenKind::KeyChar
                    | TokenKind::KeyInt
                    | TokenKind::KeyLong
                    | TokenKind::KeyDouble
                    | TokenKind::KeySigned
                    | TokenKind::KeyUnsigned
                    | TokenKind::KeyVoid
                    | TokenKind::KeyStruct
                    | TokenKind::KeyStatic
                    | TokenKind::KeyExtern
            )
        )
    }

    /// Parses the leading `{type-specifiers} [storage-class]` prefix common to
    /// every declaration, returning the base type and storage class. `struct
    /// tag { ... };` stand-alone declarations are routed to
    /// `parse_struct_declaration` by the caller before this is invoked.
    fn parse_specifiers(&mut self) -> PResult<(Type, StorageClass)> {
        let mut storage = StorageClass::None;
        let mut type_specs = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenKind::KeyStatic) => {
                    storage = StorageClass::Static;
                    self.advance()?;
                }
                Some(TokenKind::KeyExtern) => {
                    storage = StorageClass::Extern;
                    self.advance()?;
                }
                Some(
                    k @ (TokenKind::KeyChar
                    | TokenKind::KeyInt
                    | TokenKind::KeyLong
                    | TokenKind::KeyDouble
                    | TokenKind::KeySigned
                    | TokenKind::KeyUnsigned
                    | TokenKind::KeyVoid),
                ) => {
                    type_specs.push(k);
                    self.advance()?;
                }
                Some(TokenKind::KeyStruct) => {
                    self.advance()?;
                    let tag = self.expect(TokenKind::Identifier, "a structure tag")?;
                    let ty = Type::Structure(Identifier::new(&tag.text));
                    return Ok((ty, storage));
                }
                _ => break,
            }
        }
        let ty = type_from_specifiers(&type_specs)
            .map_err(|tokens| self.err(ParserError::UnexpectedTypeSpecifierList(tokens)))?;
        Ok((ty, storage))
    }

    fn parse_declaration(&mut self) -> PResult<Declaration> {
        if self.check(TokenKind::KeyStruct) && self.struct_decl_ahead() {
            return self.parse_struct_declaration();
        }
        let loc = self.loc();
        let (base_type, storage_class) = self.parse_specifiers()?;
        let declarator = self.parse_declarator()?;
        let (name, derived_type, params) =
            process_declarator(&declarator, base_type).map_err(|e| self.err(e))?;

        match &derived_type {
            Type::Function { .. } => {
                if self.check(TokenKind::BraceOpen) {
                    let body = self.parse_block()?;
                    return Ok(Declaration::Function(FunctionDecl {
                        name,
                        params,
                        fun_type: derived_type,
                        storage_class,
                        body: Some(body),
                        location: loc,
                    }));
                }
                self.expect(TokenKind::Semicolon, "`;`")?;
                Ok(Declaration::Function(FunctionDecl {
                    name,
                    params,
                    fun_type: derived_type,
                    storage_class,
                    body: None,
                    location: loc,
                }))
            }
            _ => {
                let init = if self.check(TokenKind::AssignSimple) {
                    self.advance()?;
                    Some(self.parse_initializer()?)
                } else {
                    None
                };
                self.expect(TokenKind::Semicolon, "`;`")?;
                Ok(Declaration::Var(VarDecl {
                    name,
                    var_type: derived_type,
                    storage_class,
                    init,
                    location: loc,
                }))
            }
        }
    }

    /// Disambiguates `struct Tag { ... };` / `struct Tag;` stand-alone type
    /// declarations from `struct Tag var;` variable declarations by looking
    /// two tokens ahead for `{` or `;`.
    fn struct_decl_ahead(&self) -> bool {
        matches!(
            self.tokens.get(self.pos + 2).map(|t| t.kind),
            Some(TokenKind::BraceOpen) | Some(TokenKind::Semicolon)
        )
    }

    fn parse_struct_declaration(&mut self) -> PResult<Declaration> {
        let loc = self.loc();
        self.advance()?; // struct
        let tag_tok = self.expect(TokenKind::Identifier, "a structure tag")?;
        let tag = Identifier::new(&tag_tok.text);

        let members = if self.check(TokenKind::BraceOpen) {
            self.advance()?;
            let mut members = Vec::new();
            while !self.check(TokenKind::BraceClose) {
                let (base_type, storage) = self.parse_specifiers()?;
                if storage != StorageClass::None {
                    return Err(self.err(ParserError::MemberDeclaredWithNonAutomaticStorage {
                        member: tag_tok.text.clone(),
                        storage_class: storage_class_name(storage).to_string(),
                    }));
                }
                let declarator = self.parse_declarator()?;
                let (name, member_type, _) =
                    process_declarator(&declarator, base_type).map_err(|e| self.err(e))?;
                if member_type.is_function_type() {
                    return Err(self.err(ParserError::MemberDeclaredAsFunction(name.to_string())));
                }
                members.push(MemberDecl {
                    name,
                    member_type,
                });
                self.expect(TokenKind::Semicolon, "`;`")?;
            }
            self.advance()?; // }
            self.expect(TokenKind::Semicolon, "`;`")?;
            Some(members)
        } else {
            self.expect(TokenKind::Semicolon, "`;`")?;
            None
        };

        Ok(Declaration::Struct(StructDecl {
            tag,
            members,
            location: loc,
        }))
    }

    // ---- declarators -------------------------------------------------

    fn parse_declarator(&mut self) -> PResult<Declarator> {
        if self.check(TokenKind::BinopMultiplication) {
            self.advance()?;
            let inner = self.parse_declarator()?;
            return Ok(Declarator::Pointer(Box::new(inner)));
        }
        self.parse_direct_declarator()
    }

    fn parse_direct_declarator(&mut self) -> PResult<Declarator> {
        let mut decl = self.parse_simple_declarator()?;
        loop {
            if self.check(TokenKind::BracketsOpen) {
                self.advance()?;
                let size_tok = self.expect(TokenKind::Constant, "a constant array size")?;
                let size: i64 = size_tok
                    .text
                    .parse()
                    .map_err(|_| self.err(ParserError::ArraySizeNotAConstantInteger(size_tok.text.clone())))?;
                self.expect(TokenKind::BracketsClose, "`]`")?;
                decl = Declarator::Array(Box::new(decl), size);
            } else if self.check(TokenKind::ParenthesisOpen) {
                self.advance()?;
                let mut params = Vec::new();
                if self.check(TokenKind::KeyVoid)
                    && self.tokens.get(self.pos + 1).map(|t| t.kind) == Some(TokenKind::ParenthesisClose)
                {
                    self.advance()?;
                } else {
                    loop {
                        let (param_base, storage) = self.parse_specifiers()?;
                        if storage != StorageClass::None {
                            return Err(self.err(ParserError::UnexpectedStorageClass(
                                storage_class_name(storage).to_string(),
                            )));
                        }
                        let param_declarator = self.parse_declarator()?;
                        params.push((param_base, param_declarator));
                        if self.check(TokenKind::SeparatorComma) {
                            self.advance()?;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::ParenthesisClose, "`)`")?;
                decl = Declarator::Function(params, Box::new(decl));
            } else {
                break;
            }
        }
        Ok(decl)
    }

    fn parse_simple_declarator(&mut self) -> PResult<Declarator> {
        if self.check(TokenKind::Identifier) {
            let tok = self.advance()?.clone();
            return Ok(Declarator::Ident(Identifier::new(&tok.text)));
        }
        if self.check(TokenKind::ParenthesisOpen) {
            self.advance()?;
            let inner = self.parse_declarator()?;
            self.expect(TokenKind::ParenthesisClose, "`)`")?;
            return Ok(inner);
        }
        match self.peek() {
            Some(t) => Err(self.err(ParserError::UnexpectedSimpleDeclarator(t.text.clone()))),
            None => Err(self.err(ParserError::ReachedEndOfFile)),
        }
    }

    // ---- initializers --------------------------------------------------

    fn parse_initializer(&mut self) -> PResult<Initializer> {
        if self.check(TokenKind::BraceOpen) {
            self.advance()?;
            let mut items = Vec::new();
            while !self.check(TokenKind::BraceClose) {
                items.push(self.parse_initializer()?);
                if self.check(TokenKind::SeparatorComma) {
                    self.advance()?;
                } else {
                    break;
                }
            }
            if items.is_empty() {
                return Err(self.err(ParserError::EmptyCompoundInitializer));
            }
            self.expect(TokenKind::BraceClose, "`}`")?;
            Ok(Initializer::Compound(items))
        } else {
            Ok(Initializer::Single(self.parse_expression(0)?))
        }
    }

    // ---- statements -----------------------------------------------------

    fn parse_block(&mut self) -> PResult<Block> {
        self.expect(TokenKind::BraceOpen, "`{`")?;
        let mut items = Vec::new();
        while !self.check(TokenKind::BraceClose) {
            items.push(self.parse_block_item()?);
        }
        self.advance()?;
        Ok(Block(items))
    }

    fn parse_block_item(&mut self) -> PResult<BlockItem> {
        if self.is_type_specifier_start() && !self.struct_var_decl_is_actually_struct_decl_ahead() {
            return Ok(BlockItem::Declaration(self.parse_declaration()?));
        }
        Ok(BlockItem::Statement(self.parse_statement()?))
    }

    fn struct_var_decl_is_actually_struct_decl_ahead(&self) -> bool {
        self.check(TokenKind::KeyStruct) && self.struct_decl_ahead()
    }

    fn parse_statement(&mut self) -> PResult<Statement> {
        match self.peek_kind() {
            Some(TokenKind::KeyReturn) => {
                self.advance()?;
                let value = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression(0)?)
                };
                self.expect(TokenKind::Semicolon, "`;`")?;
                Ok(Statement::Return(value))
            }
            Some(TokenKind::Semicolon) => {
                self.advance()?;
                Ok(Statement::Null)
            }
            Some(TokenKind::KeyIf) => {
                self.advance()?;
                self.expect(TokenKind::ParenthesisOpen, "`(`")?;
                let condition = self.parse_expression(0)?;
                self.expect(TokenKind::ParenthesisClose, "`)`")?;
                let then_branch = Box::new(self.parse_statement()?);
                let else_branch = if self.check(TokenKind::KeyElse) {
                    self.advance()?;
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(Statement::If {
                    condition,
                    then_branch,
                    else_branch,
                })
            }
            Some(TokenKind::BraceOpen) => Ok(Statement::Compound(self.parse_block()?)),
            Some(TokenKind::KeyBreak) => {
                self.advance()?;
                self.expect(TokenKind::Semicolon, "`;`")?;
                Ok(Statement::Break(Identifier::new("")))
            }
            Some(TokenKind::KeyContinue) => {
                self.advance()?;
                self.expect(TokenKind::Semicolon, "`;`")?;
                Ok(Statement::Continue(Identifier::new("")))
            }
            Some(TokenKind::KeyWhile) => {
                self.advance()?;
                self.expect(TokenKind::ParenthesisOpen, "`(`")?;
                let condition = self.parse_expression(0)?;
                self.expect(TokenKind::ParenthesisClose, "`)`")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Statement::While {
                    condition,
                    body,
                    label: Identifier::new(""),
                })
            }
            Some(TokenKind::KeyDo) => {
                self.advance()?;
                let body = Box::new(self.parse_statement()?);
                self.expect(TokenKind::KeyWhile, "`while`")?;
                self.expect(TokenKind::ParenthesisOpen, "`(`")?;
                let condition = self.parse_expression(0)?;
                self.expect(TokenKind::ParenthesisClose, "`)`")?;
                self.expect(TokenKind::Semicolon, "`;`")?;
                Ok(Statement::DoWhile {
                    body,
                    condition,
                    label: Identifier::new(""),
                })
            }
            Some(TokenKind::KeyFor) => {
                self.advance()?;
                self.expect(TokenKind::ParenthesisOpen, "`(`")?;
                let init = self.parse_for_init()?;
                let condition = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    Some(self.parse_expression(0)?)
                };
                self.expect(TokenKind::Semicolon, "`;`")?;
                let post = if self.check(TokenKind::ParenthesisClose) {
                    None
                } else {
                    Some(self.parse_expression(0)?)
                };
                self.expect(TokenKind::ParenthesisClose, "`)`")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Statement::For {
                    init,
                    condition,
                    post,
                    body,
                    label: Identifier::new(""),
                })
            }
            Some(TokenKind::KeyGoto) => {
                self.advance()?;
                let tok = self.expect(TokenKind::Identifier, "a label")?;
                self.expect(TokenKind::Semicolon, "`;`")?;
                Ok(Statement::Goto(Identifier::new(&tok.text)))
            }
            Some(TokenKind::Identifier)
                if self.tokens.get(self.pos + 1).map(|t| t.kind) == Some(TokenKind::TernaryElse) =>
            {
                let tok = self.advance()?.clone();
                self.advance()?; // `:`
                let inner = Box::new(self.parse_statement()?);
                Ok(Statement::Label {
                    name: Identifier::new(&tok.text),
                    inner,
                })
            }
            _ => {
                let exp = self.parse_expression(0)?;
                self.expect(TokenKind::Semicolon, "`;`")?;
                Ok(Statement::Expression(exp))
            }
        }
    }

    fn parse_for_init(&mut self) -> PResult<ForInit> {
        if self.check(TokenKind::Semicolon) {
            self.advance()?;
            return Ok(ForInit::Expr(None));
        }
        if self.is_type_specifier_start() {
            let loc = self.loc();
            let (base_type, storage_class) = self.parse_specifiers()?;
            let declarator = self.parse_declarator()?;
            let (name, derived_type, _) =
                process_declarator(&declarator, base_type).map_err(|e| self.err(e))?;
            if derived_type.is_function_type() {
                return Err(self.err(ParserError::FunctionDeclaredInForInitial(name.to_string())));
            }
            let init = if self.check(TokenKind::AssignSimple) {
                self.advance()?;
                Some(self.parse_initializer()?)
            } else {
                None
            };
            self.expect(TokenKind::Semicolon, "`;`")?;
            return Ok(ForInit::Decl(Box::new(VarDecl {
                name,
                var_type: derived_type,
                storage_class,
                init,
                location: loc,
            })));
        }
        let exp = self.parse_expression(0)?;
        self.expect(TokenKind::Semicolon, "`;`")?;
        Ok(ForInit::Expr(Some(exp)))
    }

    // ---- expressions: Pratt / precedence climbing ------------------------

    fn parse_expression(&mut self, min_prec: u8) -> PResult<Expression> {
        let mut left = self.parse_unary_then_postfix()?;
        loop {
            let Some(kind) = self.peek_kind() else { break };
            let Some((prec, op_kind)) = binary_binding_power(kind) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            match op_kind {
                OpKind::Assign => {
                    self.advance()?;
                    let rhs = self.parse_expression(prec)?;
                    let loc = left.location.clone();
                    left = Expression::new(
                        ExpressionKind::Assignment {
                            lhs: Box::new(left),
                            rhs: Box::new(rhs),
                        },
                        loc,
                    );
                }
                OpKind::CompoundAssign(op) => {
                    self.advance()?;
                    let rhs = self.parse_expression(prec)?;
                    let loc = left.location.clone();
                    left = Expression::new(
                        ExpressionKind::CompoundAssignment {
                            op,
                            lhs: Box::new(left),
                            rhs: Box::new(rhs),
                        },
                        loc,
                    );
                }
                OpKind::Ternary => {
                    self.advance()?;
                    let then_exp = self.parse_expression(0)?;
                    self.expect(TokenKind::TernaryElse, "`:`")?;
                    let else_exp = self.parse_expression(prec)?;
                    let loc = left.location.clone();
                    left = Expression::new(
                        ExpressionKind::Conditional {
                            condition: Box::new(left),
                            then_exp: Box::new(then_exp),
                            else_exp: Box::new(else_exp),
                        },
                        loc,
                    );
                }
                OpKind::Binary(op) => {
                    self.advance()?;
                    let rhs = self.parse_expression(prec + 1)?;
                    let loc = left.location.clone();
                    left = Expression::new(
                        ExpressionKind::Binary {
                            op,
                            left: Box::new(left),
                            right: Box::new(rhs),
                        },
                        loc,
                    );
                }
            }
        }
        Ok(left)
    }

    fn parse_unary_then_postfix(&mut self) -> PResult<Expression> {
        let loc = self.loc();
        match self.peek_kind() {
            Some(TokenKind::UnopComplement) => {
                self.advance()?;
                let operand = self.parse_cast_expression()?;
                Ok(Expression::new(
                    ExpressionKind::Unary {
                        op: UnaryOp::Complement,
                        operand: Box::new(operand),
                    },
                    loc,
                ))
            }
            Some(TokenKind::UnopNegation) => {
                self.advance()?;
                let operand = self.parse_cast_expression()?;
                Ok(Expression::new(
                    ExpressionKind::Unary {
                        op: UnaryOp::Negate,
                        operand: Box::new(operand),
                    },
                    loc,
                ))
            }
            Some(TokenKind::UnopNot) => {
                self.advance()?;
                let operand = self.parse_cast_expression()?;
                Ok(Expression::new(
                    ExpressionKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    loc,
                ))
            }
            Some(TokenKind::BinopMultiplication) => {
                self.advance()?;
                let operand = self.parse_cast_expression()?;
                Ok(Expression::new(ExpressionKind::Dereference(Box::new(operand)), loc))
            }
            Some(TokenKind::BinopBitAnd) => {
                self.advance()?;
                let operand = self.parse_cast_expression()?;
                Ok(Expression::new(ExpressionKind::AddrOf(Box::new(operand)), loc))
            }
            Some(TokenKind::KeySizeof) => {
                self.advance()?;
                if self.check(TokenKind::ParenthesisOpen) && self.type_specifier_follows_paren() {
                    self.advance()?;
                    let ty = self.parse_type_name()?;
                    self.expect(TokenKind::ParenthesisClose, "`)`")?;
                    Ok(Expression::new(ExpressionKind::SizeOfType(ty), loc))
                } else {
                    let operand = self.parse_unary_then_postfix()?;
                    Ok(Expression::new(ExpressionKind::SizeOfExpr(Box::new(operand)), loc))
                }
            }
            Some(TokenKind::ParenthesisOpen) if self.cast_ahead() => {
                self.advance()?;
                let ty = self.parse_type_name()?;
                self.expect(TokenKind::ParenthesisClose, "`)`")?;
                let inner = self.parse_cast_expression()?;
                Ok(Expression::new(
                    ExpressionKind::Cast {
                        target: ty,
                        inner: Box::new(inner),
                    },
                    loc,
                ))
            }
            _ => self.parse_postfix_expression(),
        }
    }

    fn parse_cast_expression(&mut self) -> PResult<Expression> {
        self.parse_unary_then_postfix()
    }

    fn type_specifier_follows_paren(&self) -> bool {
        self.tokens
            .get(self.pos + 1)
            .is_some_and(|t| is_type_specifier_token(t.kind))
    }

    fn cast_ahead(&self) -> bool {
        self.type_specifier_follows_paren()
    }

    fn parse_type_name(&mut self) -> PResult<Type> {
        let mut ty = self.parse_type_specifiers()?;
        while self.check(TokenKind::BinopMultiplication) {
            self.advance()?;
            ty = Type::Pointer(Box::new(ty));
        }
        Ok(ty)
    }

    fn parse_postfix_expression(&mut self) -> PResult<Expression> {
        let mut exp = self.parse_primary_expression()?;
        loop {
            let loc = exp.location.clone();
            match self.peek_kind() {
                Some(TokenKind::BracketsOpen) => {
                    self.advance()?;
                    let index = self.parse_expression(0)?;
                    self.expect(TokenKind::BracketsClose, "`]`")?;
                    exp = Expression::new(
                        ExpressionKind::Subscript {
                            array: Box::new(exp),
                            index: Box::new(index),
                        },
                        loc,
                    );
                }
                Some(TokenKind::StructOpMember) => {
                    self.advance()?;
                    let tok = self.expect(TokenKind::Identifier, "a member name")?;
                    exp = Expression::new(
                        ExpressionKind::Dot {
                            structure: Box::new(exp),
                            member: Identifier::new(&tok.text),
                        },
                        loc,
                    );
                }
                Some(TokenKind::StructOpPointer) => {
                    self.advance()?;
                    let tok = self.expect(TokenKind::Identifier, "a member name")?;
                    exp = Expression::new(
                        ExpressionKind::Arrow {
                            pointer: Box::new(exp),
                            member: Identifier::new(&tok.text),
                        },
                        loc,
                    );
                }
                _ => break,
            }
        }
        Ok(exp)
    }

    fn parse_primary_expression(&mut self) -> PResult<Expression> {
        let loc = self.loc();
        match self.peek_kind() {
            Some(TokenKind::Constant) => {
                let tok = self.advance()?.clone();
                let c = match tok.text.parse::<i64>() {
                    Ok(v) => {
                        if let Ok(i) = i32::try_from(v) {
                            Constant::ConstInt(i)
                        } else {
                            Constant::ConstLong(v)
                        }
                    }
                    // A suffix-less constant too large for i64 is still a valid
                    // unsigned long as long as it fits u64 (e.g. 9223372036854775808,
                    // one past i64::MAX); only past u64::MAX does it fail.
                    Err(_) => {
                        let u: u64 = tok.text.parse().map_err(|_| {
                            self.err(ParserError::NumberTooLargeForUnsignedLongConstant(tok.text.clone()))
                        })?;
                        Constant::ConstULong(u)
                    }
                };
                Ok(Expression::new(ExpressionKind::Constant(c), loc))
            }
            Some(TokenKind::LongConstant) => {
                let tok = self.advance()?.clone();
                let digits = tok.text.trim_end_matches(['l', 'L']);
                let v: i64 = digits
                    .parse()
                    .map_err(|_| self.err(ParserError::NumberTooLargeForLongConstant(tok.text.clone())))?;
                Ok(Expression::new(ExpressionKind::Constant(Constant::ConstLong(v)), loc))
            }
            Some(TokenKind::UnsignedConstant) => {
                let tok = self.advance()?.clone();
                let digits = tok.text.trim_end_matches(['u', 'U']);
                let v: u64 = digits.parse().map_err(|_| {
                    self.err(ParserError::NumberTooLargeForUnsignedLongConstant(tok.text.clone()))
                })?;
                let c = if let Ok(u) = u32::try_from(v) {
                    Constant::ConstUInt(u)
                } else {
                    Constant::ConstULong(v)
                };
                Ok(Expression::new(ExpressionKind::Constant(c), loc))
            }
            Some(TokenKind::UnsignedLongConstant) => {
                let tok = self.advance()?.clone();
                let digits = tok.text.trim_end_matches(['u', 'U', 'l', 'L']);
                let v: u64 = digits.parse().map_err(|_| {
                    self.err(ParserError::NumberTooLargeForUnsignedLongConstant(tok.text.clone()))
                })?;
                Ok(Expression::new(ExpressionKind::Constant(Constant::ConstULong(v)), loc))
            }
            Some(TokenKind::FloatConstant) => {
                let tok = self.advance()?.clone();
                let v: f64 = tok
                    .text
                    .parse()
                    .map_err(|_| self.err(ParserError::UnexpectedExpression(tok.text.clone())))?;
                Ok(Expression::new(ExpressionKind::Constant(Constant::ConstDouble(v)), loc))
            }
            Some(TokenKind::CharConstant) => {
                let tok = self.advance()?.clone();
                let ch = unescape_char(&tok.text);
                Ok(Expression::new(ExpressionKind::Constant(Constant::ConstChar(ch)), loc))
            }
            Some(TokenKind::StringLiteral) => {
                let tok = self.advance()?.clone();
                let s = unescape_string(&tok.text);
                Ok(Expression::new(ExpressionKind::String(s.into()), loc))
            }
            Some(TokenKind::Identifier) => {
                let tok = self.advance()?.clone();
                if self.check(TokenKind::ParenthesisOpen) {
                    self.advance()?;
                    let mut args = Vec::new();
                    if !self.check(TokenKind::ParenthesisClose) {
                        loop {
                            args.push(self.parse_expression(2)?);
                            if self.check(TokenKind::SeparatorComma) {
                                self.advance()?;
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::ParenthesisClose, "`)`")?;
                    Ok(Expression::new(
                        ExpressionKind::FunctionCall {
                            name: Identifier::new(&tok.text),
                            args,
                        },
                        loc,
                    ))
                } else {
                    Ok(Expression::new(ExpressionKind::Var(Identifier::new(&tok.text)), loc))
                }
            }
            Some(TokenKind::ParenthesisOpen) => {
                self.advance()?;
                let inner = self.parse_expression(0)?;
                self.expect(TokenKind::ParenthesisClose, "`)`")?;
                Ok(inner)
            }
            Some(_) | None => {
                let found = self.peek().map(|t| t.text.clone()).unwrap_or_default();
                Err(self.err(ParserError::UnexpectedPrimaryExpressionFactor(found)))
            }
        }
    }
}

enum OpKind {
    Assign,
    CompoundAssign(BinaryOp),
    Ternary,
    Binary(BinaryOp),
}

/// Binding power table, highest first. Assignment and the ternary operator
/// are right-associative, handled by recursing at the same precedence rather
/// than `prec + 1`.
fn binary_binding_power(kind: TokenKind) -> Option<(u8, OpKind)> {
    use TokenKind::*;
    Some(match kind {
        BinopMultiplication => (50, OpKind::Binary(BinaryOp::Multiply)),
        BinopDivision => (50, OpKind::Binary(BinaryOp::Divide)),
        BinopRemainder => (50, OpKind::Binary(BinaryOp::Remainder)),
        BinopAddition => (45, OpKind::Binary(BinaryOp::Add)),
        UnopNegation => (45, OpKind::Binary(BinaryOp::Subtract)),
        BinopBitshiftLeft => (40, OpKind::Binary(BinaryOp::ShiftLeft)),
        BinopBitshiftRight => (40, OpKind::Binary(BinaryOp::ShiftRight)),
        BinopLessThan => (35, OpKind::Binary(BinaryOp::LessThan)),
        BinopLessThanOrEqual => (35, OpKind::Binary(BinaryOp::LessOrEqual)),
        BinopGreaterThan => (35, OpKind::Binary(BinaryOp::GreaterThan)),
        BinopGreaterThanOrEqual => (35, OpKind::Binary(BinaryOp::GreaterOrEqual)),
        BinopEqualTo => (30, OpKind::Binary(BinaryOp::Equal)),
        BinopNotEqual => (30, OpKind::Binary(BinaryOp::NotEqual)),
        BinopBitAnd => (25, OpKind::Binary(BinaryOp::BitAnd)),
        BinopBitXor => (20, OpKind::Binary(BinaryOp::BitXor)),
        BinopBitOr => (15, OpKind::Binary(BinaryOp::BitOr)),
        BinopAnd => (10, OpKind::Binary(BinaryOp::And)),
        BinopOr => (5, OpKind::Binary(BinaryOp::Or)),
        TernaryIf => (3, OpKind::Ternary),
        AssignSimple => (1, OpKind::Assign),
        AssignPlus => (1, OpKind::CompoundAssign(BinaryOp::Add)),
        AssignDifference => (1, OpKind::CompoundAssign(BinaryOp::Subtract)),
        AssignProduct => (1, OpKind::CompoundAssign(BinaryOp::Multiply)),
        AssignQuotient => (1, OpKind::CompoundAssign(BinaryOp::Divide)),
        AssignRemainder => (1, OpKind::CompoundAssign(BinaryOp::Remainder)),
        AssignBitAnd => (1, OpKind::CompoundAssign(BinaryOp::BitAnd)),
        AssignBitOr => (1, OpKind::CompoundAssign(BinaryOp::BitOr)),
        AssignBitXor => (1, OpKind::CompoundAssign(BinaryOp::BitXor)),
        AssignBitshiftLeft => (1, OpKind::CompoundAssign(BinaryOp::ShiftLeft)),
        AssignBitshiftRight => (1, OpKind::CompoundAssign(BinaryOp::ShiftRight)),
        _ => return None,
    })
}

fn is_type_specifier_token(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::KeyChar
            | TokenKind::KeyInt
            | TokenKind::KeyLong
            | TokenKind::KeyDouble
            | TokenKind::KeySigned
            | TokenKind::KeyUnsigned
            | TokenKind::KeyVoid
            | TokenKind::KeyStruct
    )
}

fn storage_class_name(s: StorageClass) -> &'static str {
    match s {
        StorageClass::None => "none",
        StorageClass::Static => "static",
        StorageClass::Extern => "extern",
    }
}

impl Type {
    pub fn is_function_type(&self) -> bool {
        matches!(self, Type::Function { .. })
    }
}

fn type_from_specifiers(specs: &[TokenKind]) -> Result<Type, String> {
    let mut sorted = specs.to_vec();
    sorted.sort_by_key(|k| *k as u8 as usize);
    let as_strs: Vec<&str> = specs.iter().map(token_kind_name).collect();
    let joined = as_strs.join(" ");

    let has = |k: TokenKind| specs.contains(&k);
    let count = |k: TokenKind| specs.iter().filter(|&&x| x == k).count();

    if specs.is_empty() {
        return Err(joined);
    }
    if has(TokenKind::KeyVoid) {
        if specs.len() != 1 {
            return Err(joined);
        }
        return Ok(Type::Void);
    }
    if has(TokenKind::KeyDouble) {
        if specs.len() != 1 {
            return Err(joined);
        }
        return Ok(Type::Double);
    }
    if has(TokenKind::KeyChar) {
        return match (has(TokenKind::KeySigned), has(TokenKind::KeyUnsigned), specs.len()) {
            (false, false, 1) => Ok(Type::Char),
            (true, false, 2) => Ok(Type::SChar),
            (false, true, 2) => Ok(Type::UChar),
            _ => Err(joined),
        };
    }
    if has(TokenKind::KeySigned) && has(TokenKind::KeyUnsigned) {
        return Err(joined);
    }
    let long_count = count(TokenKind::KeyLong);
    if long_count > 1 {
        return Err(joined);
    }
    let has_int = has(TokenKind::KeyInt);
    let has_long = long_count == 1;
    let has_unsigned = has(TokenKind::KeyUnsigned);
    let has_signed = has(TokenKind::KeySigned);
    let extra = specs.len() - (has_int as usize) - long_count - (has_unsigned as usize) - (has_signed as usize);
    if extra != 0 {
        return Err(joined);
    }
    Ok(match (has_long, has_unsigned) {
        (true, true) => Type::ULong,
        (true, false) => Type::Long,
        (false, true) => Type::UInt,
        (false, false) => Type::Int,
    })
}

fn token_kind_name(k: &TokenKind) -> &'static str {
    match k {
        TokenKind::KeyChar => "char",
        TokenKind::KeyInt => "int",
        TokenKind::KeyLong => "long",
        TokenKind::KeyDouble => "double",
        TokenKind::KeySigned => "signed",
        TokenKind::KeyUnsigned => "unsigned",
        TokenKind::KeyVoid => "void",
        _ => "?",
    }
}

fn unescape_char(raw: &str) -> i8 {
    let inner = &raw[1..raw.len() - 1];
    unescape_string(inner).as_bytes()[0] as i8
}

fn unescape_string(raw: &str) -> String {
    let inner = if raw.starts_with(['"', '\'']) {
        &raw[1..raw.len() - 1]
    } else {
        raw
    };
    let mut out = String::new();
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some('"') => out.push('"'),
                Some('?') => out.push('?'),
                Some('a') => out.push('\x07'),
                Some('b') => out.push('\x08'),
                Some('f') => out.push('\x0c'),
                Some('v') => out.push('\x0b'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Applies an abstract declarator tree to a base type, recovering the
/// declared name, the fully-derived type, and (for function declarators) the
/// parameter names in declaration order.
pub fn process_declarator(
    declarator: &Declarator,
    base_type: Type,
) -> Result<(Identifier, Type, Vec<Identifier>), ParserError> {
    match declarator {
        Declarator::Ident(name) => Ok((name.clone(), base_type, Vec::new())),
        Declarator::Pointer(inner) => {
            let derived = Type::Pointer(Box::new(base_type));
            process_declarator(inner, derived)
        }
        Declarator::Array(inner, size) => {
            if matches!(base_type, Type::Function { .. }) {
                return Err(ParserError::TypeDerivationOnFunctionDeclaration);
            }
            let derived = Type::Array {
                element: Box::new(base_type),
                size: *size,
            };
            process_declarator(inner, derived)
        }
        Declarator::Function(params, inner) => {
            if matches!(base_type, Type::Function { .. }) {
                return Err(ParserError::TypeDerivationOnFunctionDeclaration);
            }
            let mut param_types = Vec::new();
            let mut param_names = Vec::new();
            for (param_base, param_declarator) in params {
                let (name, ty, _) = process_declarator(param_declarator, param_base.clone())?;
                param_types.push(ty);
                param_names.push(name);
            }
            let derived = Type::Function {
                params: param_types,
                ret: Box::new(base_type),
            };
            let (name, final_type, _) = process_declarator(inner, derived)?;
            Ok((name, final_type, param_names))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use std::io::Write;

    fn parse_str(src: &str) -> Program {
        let mut f = tempfile::Builder::new().suffix(".c").tempfile().unwrap();
        f.write_all(src.as_bytes()).unwrap();
        let (tokens, _) = lex(f.path(), &[]).unwrap();
        let mut parser = Parser::new(&tokens, f.path().to_path_buf());
        parser.parse_program().unwrap()
    }

    #[test]
    fn parses_simple_function() {
        let prog = parse_str("int main(void) { return 2; }");
        assert_eq!(prog.declarations.len(), 1);
        match &prog.declarations[0] {
            Declaration::Function(f) => {
                assert_eq!(f.name.as_str(), "main");
                assert!(f.body.is_some());
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn precedence_multiplication_before_addition() {
        let prog = parse_str("int main(void) { return 1 + 2 * 3; }");
        let Declaration::Function(f) = &prog.declarations[0] else { panic!() };
        let body = f.body.as_ref().unwrap();
        let BlockItem::Statement(Statement::Return(Some(exp))) = &body.0[0] else {
            panic!()
        };
        match &exp.kind {
            ExpressionKind::Binary { op: BinaryOp::Add, right, .. } => {
                assert!(matches!(right.kind, ExpressionKind::Binary { op: BinaryOp::Multiply, .. }));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn assignment_is_right_associative() {
        let prog = parse_str("int main(void) { int a; int b; a = b = 1; return 0; }");
        let Declaration::Function(f) = &prog.declarations[0] else { panic!() };
        let body = f.body.as_ref().unwrap();
        let BlockItem::Statement(Statement::Expression(exp)) = &body.0[2] else {
            panic!("expected expression statement, got {:?}", body.0[2])
        };
        match &exp.kind {
            ExpressionKind::Assignment { rhs, .. } => {
                assert!(matches!(rhs.kind, ExpressionKind::Assignment { .. }));
            }
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn pointer_declarator_applies_to_base_type() {
        let prog = parse_str("int main(void) { int *p; return 0; }");
        let Declaration::Function(f) = &prog.declarations[0] else { panic!() };
        let body = f.body.as_ref().unwrap();
        let BlockItem::Declaration(Declaration::Var(v)) = &body.0[0] else {
            panic!()
        };
        assert_eq!(v.var_type, Type::Pointer(Box::new(Type::Int)));
    }

    #[test]
    fn array_declarator_with_constant_size() {
        let prog = parse_str("int main(void) { int xs[4]; return 0; }");
        let Declaration::Function(f) = &prog.declarations[0] else { panic!() };
        let body = f.body.as_ref().unwrap();
        let BlockItem::Declaration(Declaration::Var(v)) = &body.0[0] else {
            panic!()
        };
        assert_eq!(
            v.var_type,
            Type::Array {
                element: Box::new(Type::Int),
                size: 4
            }
        );
    }

    #[test]
    fn empty_compound_initializer_is_an_error() {
        let mut f = tempfile::Builder::new().suffix(".c").tempfile().unwrap();
        f.write_all(b"int main(void) { int xs[2] = {}; return 0; }").unwrap();
        let (tokens, _) = lex(f.path(), &[]).unwrap();
        let mut parser = Parser::new(&tokens, f.path().to_path_buf());
        assert!(parser.parse_program().is_err());
    }

    #[test]
    fn long_constant_at_i64_max_stays_long() {
        let prog = parse_str("int main(void) { return 9223372036854775807; }");
        let Declaration::Function(f) = &prog.declarations[0] else { panic!() };
        let body = f.body.as_ref().unwrap();
        let BlockItem::Statement(Statement::Return(Some(exp))) = &body.0[0] else {
            panic!()
        };
        assert_eq!(exp.kind, ExpressionKind::Constant(Constant::ConstLong(i64::MAX)));
    }

    #[test]
    fn constant_one_past_i64_max_becomes_unsigned_long() {
        let prog = parse_str("int main(void) { return 9223372036854775808; }");
        let Declaration::Function(f) = &prog.declarations[0] else { panic!() };
        let body = f.body.as_ref().unwrap();
        let BlockItem::Statement(Statement::Return(Some(exp))) = &body.0[0] else {
            panic!()
        };
        assert_eq!(
            exp.kind,
            ExpressionKind::Constant(Constant::ConstULong(9223372036854775808u64))
        );
    }

    #[test]
    fn constant_past_u64_max_is_an_error() {
        let mut f = tempfile::Builder::new().suffix(".c").tempfile().unwrap();
        f.write_all(b"int main(void) { return 18446744073709551616; }").unwrap();
        let (tokens, _) = lex(f.path(), &[]).unwrap();
        let mut parser = Parser::new(&tokens, f.path().to_path_buf());
        match parser.parse_program() {
            Err(e) => assert!(e.to_string().contains("unsigned long"), "{e}"),
            Ok(_) => panic!("expected overflow error"),
        }
    }
}
