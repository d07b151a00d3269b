//! Error catalog and source map
//!
//! Every fallible stage returns `Result<T, CompileError>`. `CompileError` carries
//! the resolved `(filename, line)` the diagnostic applies to, already formatted
//! into a human-readable message. Internal consistency failures (a tree node
//! variant that validation should have ruled out) are a different, distinct
//! failure mode: see `internal_error!`.

use std::fmt;
use std::path::PathBuf;

/// Wraps a literal token in backticks for message formatting.
///
/// Equivalent to the original implementation's ANSI-markup `em()` helper, using
/// backticks instead of ANSI escapes so messages stay readable when piped to a
/// file or shown in an editor that doesn't render escape codes.
pub fn em(token: &str) -> String {
    format!("`{token}`")
}

/// One frame of active header inclusion: source text ran from `line_number` (in
/// `filename`) starting at `total_line_number` in the flattened token stream.
#[derive(Debug, Clone)]
pub struct FileOpenLine {
    pub line_number: usize,
    pub total_line_number: usize,
    pub filename: PathBuf,
}

/// Stack of active inclusion frames, used to resolve a flattened total line
/// number back to `(filename, line_in_file)` for diagnostics.
#[derive(Debug, Default)]
pub struct SourceMap {
    frames: Vec<FileOpenLine>,
}

impl SourceMap {
    pub fn new() -> Self {
        SourceMap::default()
    }

    pub fn push(&mut self, line_number: usize, total_line_number: usize, filename: PathBuf) {
        self.frames.push(FileOpenLine {
            line_number,
            total_line_number,
            filename,
        });
    }

    /// Resolve a total line number to `(filename, line_in_file)` by scanning the
    /// frame stack for the innermost frame whose range contains it.
    pub fn resolve(&self, total_line_number: usize) -> (PathBuf, usize) {
        for i in 0..self.frames.len().saturating_sub(1) {
            if total_line_number < self.frames[i + 1].total_line_number {
                let frame = &self.frames[i];
                return (
                    frame.filename.clone(),
                    total_line_number - frame.total_line_number + frame.line_number,
                );
            }
        }
        match self.frames.last() {
            Some(frame) => (
                frame.filename.clone(),
                total_line_number - frame.total_line_number + frame.line_number,
            ),
            None => (PathBuf::from("<unknown>"), total_line_number),
        }
    }
}

/// A diagnostic bound to a resolved source location.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub file: PathBuf,
    pub line: usize,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.file.display(), self.line, self.message)
    }
}

impl std::error::Error for CompileError {}

impl CompileError {
    pub fn new(file: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        CompileError {
            file: file.into(),
            line,
            message: message.into(),
        }
    }

    pub fn at(map: &SourceMap, total_line_number: usize, message: impl Into<String>) -> Self {
        let (file, line) = map.resolve(total_line_number);
        CompileError::new(file, line, message)
    }
}

/// Argument-parsing failures (CLI front door).
#[derive(Debug, Clone)]
pub enum ArgumentError {
    NoDebugCode,
    InvalidDebugCode(String),
    NoInputFile,
    NoIncludeDirectories,
}

impl fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentError::NoDebugCode => write!(f, "no debug code passed in first argument"),
            ArgumentError::InvalidDebugCode(code) => {
                write!(f, "invalid debug code {} passed in first argument", em(code))
            }
            ArgumentError::NoInputFile => write!(f, "no input file passed in second argument"),
            ArgumentError::NoIncludeDirectories => {
                write!(f, "no include directories passed in third argument")
            }
        }
    }
}

/// File I/O and string-to-number conversion failures.
#[derive(Debug, Clone)]
pub enum UtilError {
    FailedToReadInputFile(String),
    FailedToWriteOutputFile(String),
    FailedToInterpretAsInteger(String),
    FailedToInterpretAsUnsignedInteger(String),
    FailedToInterpretAsFloat(String),
}

impl fmt::Display for UtilError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UtilError::FailedToReadInputFile(name) => write!(f, "cannot read input file {}", em(name)),
            UtilError::FailedToWriteOutputFile(name) => {
                write!(f, "cannot write output file {}", em(name))
            }
            UtilError::FailedToInterpretAsInteger(s) => {
                write!(f, "cannot interpret string {} to an integer value", em(s))
            }
            UtilError::FailedToInterpretAsUnsignedInteger(s) => write!(
                f,
                "cannot interpret string {} to an unsigned integer value",
                em(s)
            ),
            UtilError::FailedToInterpretAsFloat(s) => {
                write!(f, "cannot interpret string {} to a floating point value", em(s))
            }
        }
    }
}

/// Lexer failures.
#[derive(Debug, Clone)]
pub enum LexerError {
    InvalidToken(String),
    FailedToIncludeHeaderFile(String),
}

impl fmt::Display for LexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexerError::InvalidToken(tok) => write!(f, "found invalid token {}", em(tok)),
            LexerError::FailedToIncludeHeaderFile(name) => write!(
                f,
                "cannot find {} header file in {} directive search",
                em(name),
                em("include")
            ),
        }
    }
}

/// Parser failures, one variant per spec-named parse error kind.
#[derive(Debug, Clone)]
pub enum ParserError {
    UnexpectedNextToken { found: String, expected: String },
    ReachedEndOfFile,
    NumberTooLargeForLongConstant(String),
    NumberTooLargeForUnsignedLongConstant(String),
    ArraySizeNotAConstantInteger(String),
    UnexpectedUnaryOperator(String),
    UnexpectedBinaryOperator(String),
    UnexpectedAbstractDeclarator(String),
    UnexpectedPointerUnaryFactor(String),
    UnexpectedPrimaryExpressionFactor(String),
    UnexpectedExpression(String),
    FunctionDeclaredInForInitial(String),
    UnexpectedTypeSpecifier(String),
    UnexpectedTypeSpecifierList(String),
    UnexpectedStorageClass(String),
    EmptyCompoundInitializer,
    TypeDerivationOnFunctionDeclaration,
    UnexpectedSimpleDeclarator(String),
    UnexpectedParameterList(String),
    MemberDeclaredWithNonAutomaticStorage { member: String, storage_class: String },
    MemberDeclaredAsFunction(String),
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserError::UnexpectedNextToken { found, expected } => {
                write!(f, "found token {}, but expected {} next", em(found), expected)
            }
            ParserError::ReachedEndOfFile => write!(
                f,
                "reached end of file, but expected declaration or statement next"
            ),
            ParserError::NumberTooLargeForLongConstant(s) => write!(
                f,
                "cannot represent {} as a 64 bits signed integer constant, very large number",
                em(s)
            ),
            ParserError::NumberTooLargeForUnsignedLongConstant(s) => write!(
                f,
                "cannot represent {} as a 64 bits unsigned integer constant, very large number",
                em(s)
            ),
            ParserError::ArraySizeNotAConstantInteger(s) => {
                write!(f, "illegal array size {}, requires a constant integer", em(s))
            }
            ParserError::UnexpectedUnaryOperator(found) => write!(
                f,
                "found token {}, but expected {}, {} or {} next",
                em(found),
                em("~"),
                em("-"),
                em("!")
            ),
            ParserError::UnexpectedBinaryOperator(found) => {
                write!(f, "found token {}, but expected a binary or compound-assignment operator next", em(found))
            }
            ParserError::UnexpectedAbstractDeclarator(found) => write!(
                f,
                "found token {}, but expected {}, {} or {} next",
                em(found),
                em("*"),
                em("("),
                em("[")
            ),
            ParserError::UnexpectedPointerUnaryFactor(found) => write!(
                f,
                "found token {}, but expected {} or {} next",
                em(found),
                em("*"),
                em("&")
            ),
            ParserError::UnexpectedPrimaryExpressionFactor(found) => write!(
                f,
                "found token {}, but expected a constant, identifier, string literal or {} next",
                em(found),
                em("(")
            ),
            ParserError::UnexpectedExpression(found) => {
                write!(f, "found token {}, but expected an expression next", em(found))
            }
            ParserError::FunctionDeclaredInForInitial(name) => write!(
                f,
                "function {} declared in {} loop initial declaration",
                em(name),
                em("for")
            ),
            ParserError::UnexpectedTypeSpecifier(found) => {
                write!(f, "found token {}, but expected a type specifier next", em(found))
            }
            ParserError::UnexpectedTypeSpecifierList(found) => write!(
                f,
                "found tokens {}, but expected valid list of unique type specifiers next",
                em(found)
            ),
            ParserError::UnexpectedStorageClass(found) => write!(
                f,
                "found token {}, but expected {} or {} next",
                em(found),
                em("static"),
                em("extern")
            ),
            ParserError::EmptyCompoundInitializer => {
                write!(f, "empty compound initializer requires at least one initializer")
            }
            ParserError::TypeDerivationOnFunctionDeclaration => write!(
                f,
                "cannot apply further type derivation to function declaration"
            ),
            ParserError::UnexpectedSimpleDeclarator(found) => write!(
                f,
                "found token {}, but expected {} or {} next",
                em(found),
                em("identifier"),
                em("(")
            ),
            ParserError::UnexpectedParameterList(found) => {
                write!(f, "found token {}, but expected a type specifier next", em(found))
            }
            ParserError::MemberDeclaredWithNonAutomaticStorage { member, storage_class } => write!(
                f,
                "structure type declared with member {} with {} storage class",
                em(member),
                em(storage_class)
            ),
            ParserError::MemberDeclaredAsFunction(member) => {
                write!(f, "structure type declared with member {} as a function", em(member))
            }
        }
    }
}

/// Semantic (name-resolution + type-checking) failures.
#[derive(Debug, Clone)]
pub enum SemanticError {
    ArrayOfIncompleteType { array_type: String, element_type: String },
    JointPointerTypeMismatch(String, String),
    FunctionUsedAsVariable(String),
    IllegalConversion { from: String, to: String },
    UnaryOnInvalidOperandType { op: String, ty: String },
    BinaryOnInvalidOperandType { op: String, ty: String },
    BinaryOnInvalidOperandTypes { op: String, left: String, right: String },
    AssignmentToVoidType,
    AssignmentToRvalue(String),
    ConditionalOnInvalidConditionType(String),
    TernaryOnInvalidOperandTypes(String, String),
    VariableUsedAsFunction(String),
    FunctionCalledWithWrongNumberOfArguments { name: String, found: usize, expected: usize },
    DereferenceNonPointer(String),
    AddressOfRvalue,
    SubscriptArrayWithInvalidTypes(String, String),
    GetSizeOfIncompleteType(String),
    DotOnNonStructureType { member: String, ty: String },
    MemberNotInStructureType { structure: String, member: String },
    ArrowOnNonPointerToStructureType { member: String, ty: String },
    IncompleteStructureTypeInExpression(String),
    ReturnValueInVoidFunction(String),
    NoReturnValueInNonVoidFunction { name: String, ty: String },
    IfUsedWithConditionType(String),
    WhileUsedWithConditionType(String),
    DoWhileUsedWithConditionType(String),
    ForUsedWithConditionType(String),
    NonCharArrayInitializedFromString(String),
    StringInitializedWithTooManyCharacters { size: i64, chars: usize },
    ArrayInitializedWithTooManyInitializers { size: i64, ty: String, count: usize },
    StructureInitializedWithTooManyMembers { ty: String, found: usize, expected: usize },
    FunctionReturnsArray { name: String, ty: String },
    FunctionReturnsIncompleteStructureType { name: String, ty: String },
    ParameterWithTypeVoid { function: String, param: String },
    ParameterWithIncompleteStructureType { function: String, param: String, ty: String },
    FunctionRedeclaredWithConflictingType { name: String, new: String, old: String },
    FunctionRedefined { name: String, ty: String },
    NonStaticFunctionRedeclaredStatic(String),
    StaticPointerInitializedFromNonInteger { ty: String, value: String },
    StaticPointerInitializedFromNonNull { ty: String, value: String },
    AggregateInitializedWithSingleInitializer(String),
    StaticInitializedWithNonConstant(String),
    ScalarInitializedWithCompoundInitializer(String),
    VariableDeclaredWithTypeVoid(String),
    VariableDeclaredWithIncompleteStructureType { name: String, ty: String },
    VariableRedeclaredWithConflictingType { name: String, new: String, old: String },
    VariableRedeclaredWithConflictingStorage(String),
    ExternVariableDefined(String),
    StructureDeclaredWithDuplicateMember { structure: String, member: String },
    StructureRedeclaredInScope(String),
    BreakOutsideOfLoop,
    ContinueOutsideOfLoop,
    GotoWithUndefinedTargetLabel { label: String, function: String },
    StructureNotDefinedInScope(String),
    VariableNotDeclaredInScope(String),
    FunctionNotDeclaredInScope(String),
    ForInitialDeclaredWithNonAutomaticStorage { name: String, storage_class: String },
    LabelRedefinedInScope(String),
    VariableRedeclaredInScope(String),
    NestedFunctionDefined(String),
    NestedStaticFunctionDeclared(String),
    FunctionRedeclaredInScope(String),
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticError::ArrayOfIncompleteType { array_type, element_type } => write!(
                f,
                "array type {} of incomplete type {}, requires a complete type",
                em(array_type),
                em(element_type)
            ),
            SemanticError::JointPointerTypeMismatch(a, b) => {
                write!(f, "pointer type mismatch {} and {} in operator", em(a), em(b))
            }
            SemanticError::FunctionUsedAsVariable(name) => {
                write!(f, "function {} used as a variable", em(name))
            }
            SemanticError::IllegalConversion { from, to } => write!(
                f,
                "illegal cast, cannot convert expression from type {} to {}",
                em(from),
                em(to)
            ),
            SemanticError::UnaryOnInvalidOperandType { op, ty } => {
                write!(f, "cannot apply unary operator {} on operand type {}", em(op), em(ty))
            }
            SemanticError::BinaryOnInvalidOperandType { op, ty } => {
                write!(f, "cannot apply binary operator {} on operand type {}", em(op), em(ty))
            }
            SemanticError::BinaryOnInvalidOperandTypes { op, left, right } => write!(
                f,
                "cannot apply binary operator {} on operand types {} and {}",
                em(op),
                em(left),
                em(right)
            ),
            SemanticError::AssignmentToVoidType => {
                write!(f, "cannot assign {} to left operand type {}", em("="), em("void"))
            }
            SemanticError::AssignmentToRvalue(op) => write!(
                f,
                "assignment {} requires lvalue left operand, but got rvalue",
                em(op)
            ),
            SemanticError::ConditionalOnInvalidConditionType(ty) => write!(
                f,
                "cannot apply conditional {} on condition operand type {}",
                em("?"),
                em(ty)
            ),
            SemanticError::TernaryOnInvalidOperandTypes(a, b) => write!(
                f,
                "cannot apply ternary operator {} on operand types {} and {}",
                em(":"),
                em(a),
                em(b)
            ),
            SemanticError::VariableUsedAsFunction(name) => {
                write!(f, "variable {} used as a function", em(name))
            }
            SemanticError::FunctionCalledWithWrongNumberOfArguments { name, found, expected } => write!(
                f,
                "function {} called with {} arguments instead of {}",
                em(name),
                found,
                expected
            ),
            SemanticError::DereferenceNonPointer(ty) => write!(
                f,
                "cannot apply dereference operator {} on non-pointer type {}",
                em("*"),
                em(ty)
            ),
            SemanticError::AddressOfRvalue => {
                write!(f, "addresssing {} requires lvalue operand, but got rvalue", em("&"))
            }
            SemanticError::SubscriptArrayWithInvalidTypes(a, b) => write!(
                f,
                "cannot subscript array with operand types {} and {}, requires a complete pointer and an integer types",
                em(a),
                em(b)
            ),
            SemanticError::GetSizeOfIncompleteType(ty) => write!(
                f,
                "cannot get size with {} operator on incomplete type {}",
                em("sizeof"),
                em(ty)
            ),
            SemanticError::DotOnNonStructureType { member, ty } => write!(
                f,
                "cannot access structure member {} with dot operator {} on non-structure type {}",
                em(member),
                em("."),
                em(ty)
            ),
            SemanticError::MemberNotInStructureType { structure, member } => write!(
                f,
                "structure type {} has no member named {}",
                em(structure),
                em(member)
            ),
            SemanticError::ArrowOnNonPointerToStructureType { member, ty } => write!(
                f,
                "cannot access structure member {} with arrow operator {} on non-pointer-to-structure type {}",
                em(member),
                em("->"),
                em(ty)
            ),
            SemanticError::IncompleteStructureTypeInExpression(ty) => {
                write!(f, "incomplete structure type {} in expression", em(ty))
            }
            SemanticError::ReturnValueInVoidFunction(name) => write!(
                f,
                "found {} value in function {} returning type {}",
                em("return"),
                em(name),
                em("void")
            ),
            SemanticError::NoReturnValueInNonVoidFunction { name, ty } => write!(
                f,
                "found {} with no value in function {} returning type {}",
                em("return"),
                em(name),
                em(ty)
            ),
            SemanticError::IfUsedWithConditionType(ty) => write!(
                f,
                "cannot use {} statement with condition expression type {}",
                em("if"),
                em(ty)
            ),
            SemanticError::WhileUsedWithConditionType(ty) => write!(
                f,
                "cannot use {} loop statement with condition expression type {}",
                em("while"),
                em(ty)
            ),
            SemanticError::DoWhileUsedWithConditionType(ty) => write!(
                f,
                "cannot use {} loop statement with condition expression type {}",
                em("do while"),
                em(ty)
            ),
            SemanticError::ForUsedWithConditionType(ty) => write!(
                f,
                "cannot use {} loop statement with condition expression type {}",
                em("for"),
                em(ty)
            ),
            SemanticError::NonCharArrayInitializedFromString(ty) => write!(
                f,
                "non-character array type {} initialized from string literal",
                em(ty)
            ),
            SemanticError::StringInitializedWithTooManyCharacters { size, chars } => write!(
                f,
                "size {} string literal initialized with {} characters",
                size,
                chars
            ),
            SemanticError::ArrayInitializedWithTooManyInitializers { size, ty, count } => write!(
                f,
                "size {} array type {} initialized with {} initializers",
                size,
                em(ty),
                count
            ),
            SemanticError::StructureInitializedWithTooManyMembers { ty, found, expected } => write!(
                f,
                "structure type {} initialized with {} members instead of {}",
                em(ty),
                found,
                expected
            ),
            SemanticError::FunctionReturnsArray { name, ty } => write!(
                f,
                "function {} returns array type {}, instead of pointer type",
                em(name),
                em(ty)
            ),
            SemanticError::FunctionReturnsIncompleteStructureType { name, ty } => write!(
                f,
                "function {} returns incomplete structure type {}",
                em(name),
                em(ty)
            ),
            SemanticError::ParameterWithTypeVoid { function, param } => write!(
                f,
                "function {} declared with parameter {} with type {}",
                em(function),
                em(param),
                em("void")
            ),
            SemanticError::ParameterWithIncompleteStructureType { function, param, ty } => write!(
                f,
                "function {} defined with parameter {} with incomplete structure type {}",
                em(function),
                em(param),
                em(ty)
            ),
            SemanticError::FunctionRedeclaredWithConflictingType { name, new, old } => write!(
                f,
                "function {} redeclared with function type {}, but previous declaration has function type {}",
                em(name),
                em(new),
                em(old)
            ),
            SemanticError::FunctionRedefined { name, ty } => {
                write!(f, "function {} already defined with function type {}", em(name), em(ty))
            }
            SemanticError::NonStaticFunctionRedeclaredStatic(name) => write!(
                f,
                "function {} with {} storage class already declared non-static",
                em(name),
                em("static")
            ),
            SemanticError::StaticPointerInitializedFromNonInteger { ty, value } => write!(
                f,
                "cannot statically initialize pointer type {} from constant {}, requires a constant integer",
                em(ty),
                em(value)
            ),
            SemanticError::StaticPointerInitializedFromNonNull { ty, value } => write!(
                f,
                "cannot statically initialize pointer type {} from non-null value {}",
                em(ty),
                em(value)
            ),
            SemanticError::AggregateInitializedWithSingleInitializer(ty) => write!(
                f,
                "aggregate type {} statically initialized with single initializer",
                em(ty)
            ),
            SemanticError::StaticInitializedWithNonConstant(ty) => write!(
                f,
                "cannot statically initialize variable from non-constant type {}, requires a constant",
                em(ty)
            ),
            SemanticError::ScalarInitializedWithCompoundInitializer(ty) => write!(
                f,
                "cannot initialize scalar type {} with compound initializer",
                em(ty)
            ),
            SemanticError::VariableDeclaredWithTypeVoid(name) => {
                write!(f, "variable {} declared with type {}", em(name), em("void"))
            }
            SemanticError::VariableDeclaredWithIncompleteStructureType { name, ty } => write!(
                f,
                "variable {} declared with incomplete structure type {}",
                em(name),
                em(ty)
            ),
            SemanticError::VariableRedeclaredWithConflictingType { name, new, old } => write!(
                f,
                "variable {} redeclared with conflicting type {}, but previously declared with type {}",
                em(name),
                em(new),
                em(old)
            ),
            SemanticError::VariableRedeclaredWithConflictingStorage(name) => {
                write!(f, "variable {} redeclared with conflicting storage class", em(name))
            }
            SemanticError::ExternVariableDefined(name) => write!(
                f,
                "illegal initializer, can only declare variable {} with {} storage class",
                em(name),
                em("extern")
            ),
            SemanticError::StructureDeclaredWithDuplicateMember { structure, member } => write!(
                f,
                "structure type {} declared with duplicate member name {}",
                em(structure),
                em(member)
            ),
            SemanticError::StructureRedeclaredInScope(name) => {
                write!(f, "structure type {} already declared in this scope", em(name))
            }
            SemanticError::BreakOutsideOfLoop => {
                write!(f, "found {} statement outside of loop", em("break"))
            }
            SemanticError::ContinueOutsideOfLoop => {
                write!(f, "found {} statement outside of loop", em("continue"))
            }
            SemanticError::GotoWithUndefinedTargetLabel { label, function } => write!(
                f,
                "found {} statement, but target label {} not defined in function {}",
                em("goto"),
                em(label),
                em(function)
            ),
            SemanticError::StructureNotDefinedInScope(name) => {
                write!(f, "structure type {} not defined in this scope", em(name))
            }
            SemanticError::VariableNotDeclaredInScope(name) => {
                write!(f, "variable {} not declared in this scope", em(name))
            }
            SemanticError::FunctionNotDeclaredInScope(name) => {
                write!(f, "function {} not declared in this scope", em(name))
            }
            SemanticError::ForInitialDeclaredWithNonAutomaticStorage { name, storage_class } => write!(
                f,
                "variable {} declared with {} storage class in {} loop initial declaration",
                em(name),
                em(storage_class),
                em("for")
            ),
            SemanticError::LabelRedefinedInScope(name) => {
                write!(f, "label {} already defined in this scope", em(name))
            }
            SemanticError::VariableRedeclaredInScope(name) => {
                write!(f, "variable {} already declared in this scope", em(name))
            }
            SemanticError::NestedFunctionDefined(name) => write!(
                f,
                "function {} defined inside another function, but nested function definitions are not permitted",
                em(name)
            ),
            SemanticError::NestedStaticFunctionDeclared(name) => write!(
                f,
                "cannot declare nested function {} in another function with {} storage class",
                em(name),
                em("static")
            ),
            SemanticError::FunctionRedeclaredInScope(name) => {
                write!(f, "function {} already declared in this scope", em(name))
            }
        }
    }
}

/// Raises an internal-consistency failure: the compiler reached a tree shape
/// that prior validation should have made unreachable. This is a compiler bug,
/// not a user error, and is propagated as a distinct panic payload so `main`
/// can map it to a different exit code than `CompileError`.
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        std::panic::panic_any($crate::error::InternalError {
            message: $msg.to_string(),
            location: format!("{}:{}:{}", file!(), line!(), column!()),
        })
    };
}

#[derive(Debug, Clone)]
pub struct InternalError {
    pub message: String,
    pub location: String,
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "internal compiler error at {}: {}", self.location, self.message)
    }
}

impl std::error::Error for InternalError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn em_wraps_in_backticks() {
        assert_eq!(em("int"), "`int`");
    }

    #[test]
    fn source_map_resolves_within_included_file() {
        let mut map = SourceMap::new();
        map.push(1, 1, PathBuf::from("main.c"));
        map.push(1, 11, PathBuf::from("util.h"));
        map.push(6, 15, PathBuf::from("main.c"));

        let (file, line) = map.resolve(12);
        assert_eq!(file, PathBuf::from("util.h"));
        assert_eq!(line, 2);

        let (file, line) = map.resolve(16);
        assert_eq!(file, PathBuf::from("main.c"));
        assert_eq!(line, 7);
    }

    #[test]
    fn argument_error_messages() {
        assert_eq!(
            ArgumentError::InvalidDebugCode("bogus".into()).to_string(),
            "invalid debug code `bogus` passed in first argument"
        );
    }

    #[test]
    fn lexer_error_messages() {
        assert_eq!(
            LexerError::FailedToIncludeHeaderFile("missing.h".into()).to_string(),
            "cannot find `missing.h` header file in `include` directive search"
        );
    }
}
