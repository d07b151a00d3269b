//! Name resolution
//!
//! Two passes over a parsed `Program`. The first walks declarations top to
//! bottom maintaining a stack of scopes, renaming every variable/function
//! declaration to a globally-unique identifier (`original.N`, minted by the
//! session's `NameGenerator`) and rewriting every use to match. The second
//! pass, run per function body after the first completes, resolves
//! `goto`/label targets, which may reference a label declared later in the
//! same function.

use std::collections::HashMap;

use crate::ast::{
    Block, BlockItem, Declaration, Expression, ExpressionKind, ForInit, FunctionDecl, Initializer,
    Program, Statement, StorageClass, StructDecl, VarDecl,
};
use crate::error::{CompileError, SemanticError};
use crate::intern::{Identifier, NameGenerator};

#[derive(Debug, Clone)]
struct ScopeEntry {
    unique_name: Identifier,
    from_current_scope: bool,
    has_linkage: bool,
}

struct Scopes {
    stack: Vec<HashMap<String, ScopeEntry>>,
}

impl Scopes {
    fn new() -> Self {
        Scopes { stack: vec![HashMap::new()] }
    }

    fn push(&mut self) {
        self.stack.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.stack.pop();
    }

    fn is_file_scope(&self) -> bool {
        self.stack.len() == 1
    }

    fn declare(
        &mut self,
        name: &str,
        has_linkage: bool,
        gen: &NameGenerator,
    ) -> Result<Identifier, SemanticError> {
        let top = self.stack.last_mut().unwrap();
        if let Some(existing) = top.get(name) {
            if existing.from_current_scope && !(existing.has_linkage && has_linkage) {
                return Err(SemanticError::VariableRedeclaredInScope(name.to_string()));
            }
        }
        let unique_name = if self.stack.len() == 1 {
            Identifier::new(name)
        } else {
            gen.resolve_variable_identifier(name)
        };
        top.insert(
            name.to_string(),
            ScopeEntry {
                unique_name: unique_name.clone(),
                from_current_scope: true,
                has_linkage,
            },
        );
        Ok(unique_name)
    }

    /// Declares a file-scope-visible function name: functions always keep
    /// their original spelling (external linkage, never renamed) and may be
    /// declared repeatedly in the same scope.
    fn declare_function(&mut self, name: &str) -> Identifier {
        let top = self.stack.last_mut().unwrap();
        let unique_name = Identifier::new(name);
        top.insert(
            name.to_string(),
            ScopeEntry {
                unique_name: unique_name.clone(),
                from_current_scope: true,
                has_linkage: true,
            },
        );
        unique_name
    }

    fn resolve(&self, name: &str) -> Option<Identifier> {
        for scope in self.stack.iter().rev() {
            if let Some(entry) = scope.get(name) {
                return Some(entry.unique_name.clone());
            }
        }
        None
    }

    fn enter_block(&self) -> Vec<HashMap<String, ScopeEntry>> {
        let mut copy = self.stack.clone();
        for scope in copy.iter_mut() {
            for entry in scope.values_mut() {
                entry.from_current_scope = false;
            }
        }
        copy
    }
}

pub struct Resolver<'a> {
    scopes: Scopes,
    name_gen: &'a NameGenerator,
    struct_scopes: Vec<HashMap<String, Identifier>>,
    current_function: String,
    labels: HashMap<String, Identifier>,
    goto_targets: Vec<(String, usize)>,
}

impl<'a> Resolver<'a> {
    pub fn new(name_gen: &'a NameGenerator) -> Self {
        Resolver {
            scopes: Scopes::new(),
            name_gen,
            struct_scopes: vec![HashMap::new()],
            current_function: String::new(),
            labels: HashMap::new(),
            goto_targets: Vec::new(),
        }
    }

    pub fn resolve_program(&mut self, program: &mut Program) -> Result<(), CompileError> {
        for decl in &mut program.declarations {
            self.resolve_file_scope_declaration(decl)?;
        }
        Ok(())
    }

    fn err(&self, line: usize, e: SemanticError) -> CompileError {
        CompileError::new(std::path::PathBuf::new(), line, e.to_string())
    }

    fn resolve_file_scope_declaration(&mut self, decl: &mut Declaration) -> Result<(), CompileError> {
        match decl {
            Declaration::Var(v) => self.resolve_var_decl(v, true),
            Declaration::Function(f) => self.resolve_function_decl(f),
            Declaration::Struct(s) => self.resolve_struct_decl(s),
        }
    }

    fn resolve_struct_decl(&mut self, s: &mut StructDecl) -> Result<(), CompileError> {
        let top = self.struct_scopes.last_mut().unwrap();
        let tag_text = s.tag.as_str().to_string();
        let unique = if self.struct_scopes.len() == 1 {
            Identifier::new(&tag_text)
        } else {
            top.get(&tag_text).cloned().unwrap_or_else(|| Identifier::new(&tag_text))
        };
        top.insert(tag_text, unique.clone());
        s.tag = unique;
        Ok(())
    }

    fn resolve_function_decl(&mut self, f: &mut FunctionDecl) -> Result<(), CompileError> {
        let line = f.location.line;
        let is_nested = !self.scopes.is_file_scope();
        if is_nested {
            if f.body.is_some() {
                return Err(self.err(line, SemanticError::NestedFunctionDefined(f.name.to_string())));
            }
            if f.storage_class == StorageClass::Static {
                return Err(self.err(line, SemanticError::NestedStaticFunctionDeclared(f.name.to_string())));
            }
        }

        let unique_name = self.scopes.declare_function(f.name.as_str());
        f.name = unique_name;

        self.scopes.push();
        let mut resolved_params = Vec::new();
        for param in &f.params {
            let new_name = self
                .scopes
                .declare(param.as_str(), false, self.name_gen)
                .map_err(|e| self.err(line, e))?;
            resolved_params.push(new_name);
        }
        f.params = resolved_params;

        if let Some(body) = &mut f.body {
            let saved_function = std::mem::replace(&mut self.current_function, f.name.to_string());
            let saved_labels = std::mem::take(&mut self.labels);
            let saved_gotos = std::mem::take(&mut self.goto_targets);

            self.resolve_block_no_scope_push(body)?;

            for (label, goto_line) in &self.goto_targets {
                if !self.labels.contains_key(label) {
                    return Err(self.err(
                        *goto_line,
                        SemanticError::GotoWithUndefinedTargetLabel {
                            label: label.clone(),
                            function: self.current_function.clone(),
                        },
                    ));
                }
            }

            rename_gotos_and_labels(body, &self.labels);

            self.current_function = saved_function;
            self.labels = saved_labels;
            self.goto_targets = saved_gotos;
        }
        self.scopes.pop();
        Ok(())
    }

    fn resolve_var_decl(&mut self, v: &mut VarDecl, file_scope: bool) -> Result<(), CompileError> {
        let line = v.location.line;
        if !file_scope && v.storage_class == StorageClass::Extern && v.init.is_some() {
            return Err(self.err(line, SemanticError::ExternVariableDefined(v.name.to_string())));
        }
        let has_linkage = file_scope || v.storage_class != StorageClass::None;
        let unique_name = self
            .scopes
            .declare(v.name.as_str(), has_linkage, self.name_gen)
            .map_err(|e| self.err(line, e))?;
        v.name = unique_name;
        if let Some(init) = &mut v.init {
            self.resolve_initializer(init)?;
        }
        Ok(())
    }

    fn resolve_initializer(&mut self, init: &mut Initializer) -> Result<(), CompileError> {
        match init {
            Initializer::Single(exp) => self.resolve_expression(exp),
            Initializer::Compound(items) => {
                for item in items {
                    self.resolve_initializer(item)?;
                }
                Ok(())
            }
        }
    }

    fn resolve_block_no_scope_push(&mut self, block: &mut Block) -> Result<(), CompileError> {
        for item in &mut block.0 {
            self.resolve_block_item(item)?;
        }
        Ok(())
    }

    fn resolve_block(&mut self, block: &mut Block) -> Result<(), CompileError> {
        let saved = self.scopes.stack.clone();
        self.scopes.stack = self.scopes.enter_block();
        self.scopes.push();
        let result = self.resolve_block_no_scope_push(block);
        self.scopes.pop();
        self.scopes.stack = saved;
        result
    }

    fn resolve_block_item(&mut self, item: &mut BlockItem) -> Result<(), CompileError> {
        match item {
            BlockItem::Declaration(Declaration::Var(v)) => self.resolve_var_decl(v, false),
            BlockItem::Declaration(Declaration::Function(f)) => self.resolve_function_decl(f),
            BlockItem::Declaration(Declaration::Struct(s)) => self.resolve_struct_decl(s),
            BlockItem::Statement(stmt) => self.resolve_statement(stmt),
        }
    }

    fn resolve_statement(&mut self, stmt: &mut Statement) -> Result<(), CompileError> {
        match stmt {
            Statement::Return(Some(exp)) => self.resolve_expression(exp),
            Statement::Return(None) | Statement::Null => Ok(()),
            Statement::Expression(exp) => self.resolve_expression(exp),
            Statement::If { condition, then_branch, else_branch } => {
                self.resolve_expression(condition)?;
                self.resolve_statement(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.resolve_statement(else_branch)?;
                }
                Ok(())
            }
            Statement::Compound(block) => self.resolve_block(block),
            Statement::Break(_) | Statement::Continue(_) => Ok(()),
            Statement::While { condition, body, label } => {
                self.resolve_expression(condition)?;
                *label = self.name_gen.resolve_label_identifier("while");
                self.resolve_statement(body)
            }
            Statement::DoWhile { body, condition, label } => {
                *label = self.name_gen.resolve_label_identifier("do_while");
                self.resolve_statement(body)?;
                self.resolve_expression(condition)
            }
            Statement::For { init, condition, post, body, label } => {
                let saved = self.scopes.stack.clone();
                self.scopes.stack = self.scopes.enter_block();
                self.scopes.push();
                let result = (|| {
                    match init {
                        ForInit::Decl(decl) => {
                            if decl.storage_class != StorageClass::None {
                                return Err(self.err(
                                    decl.location.line,
                                    SemanticError::ForInitialDeclaredWithNonAutomaticStorage {
                                        name: decl.name.to_string(),
                                        storage_class: format!("{:?}", decl.storage_class).to_lowercase(),
                                    },
                                ));
                            }
                            self.resolve_var_decl(decl, false)?;
                        }
                        ForInit::Expr(Some(exp)) => self.resolve_expression(exp)?,
                        ForInit::Expr(None) => {}
                    }
                    if let Some(condition) = condition {
                        self.resolve_expression(condition)?;
                    }
                    if let Some(post) = post {
                        self.resolve_expression(post)?;
                    }
                    *label = self.name_gen.resolve_label_identifier("for");
                    self.resolve_statement(body)
                })();
                self.scopes.pop();
                self.scopes.stack = saved;
                result
            }
            Statement::Goto(target) => {
                self.goto_targets.push((target.to_string(), 0));
                Ok(())
            }
            Statement::Label { name, inner } => {
                let original = name.to_string();
                if self.labels.contains_key(&original) {
                    return Err(self.err(0, SemanticError::LabelRedefinedInScope(original)));
                }
                let unique = Identifier::new(format!("{}.{}", original, self.current_function));
                self.labels.insert(original, unique.clone());
                *name = unique;
                self.resolve_statement(inner)
            }
        }
    }

    fn resolve_expression(&mut self, exp: &mut Expression) -> Result<(), CompileError> {
        let line = exp.location.line;
        match &mut exp.kind {
            ExpressionKind::Constant(_) | ExpressionKind::String(_) => Ok(()),
            ExpressionKind::Var(name) => {
                let resolved = self
                    .scopes
                    .resolve(name.as_str())
                    .ok_or_else(|| self.err(line, SemanticError::VariableNotDeclaredInScope(name.to_string())))?;
                *name = resolved;
                Ok(())
            }
            ExpressionKind::Cast { inner, .. } => self.resolve_expression(inner),
            ExpressionKind::Unary { operand, .. } => self.resolve_expression(operand),
            ExpressionKind::Binary { left, right, .. } => {
                self.resolve_expression(left)?;
                self.resolve_expression(right)
            }
            ExpressionKind::Assignment { lhs, rhs } | ExpressionKind::CompoundAssignment { lhs, rhs, .. } => {
                self.resolve_expression(lhs)?;
                self.resolve_expression(rhs)
            }
            ExpressionKind::Conditional { condition, then_exp, else_exp } => {
                self.resolve_expression(condition)?;
                self.resolve_expression(then_exp)?;
                self.resolve_expression(else_exp)
            }
            ExpressionKind::FunctionCall { name, args } => {
                let resolved = self
                    .scopes
                    .resolve(name.as_str())
                    .ok_or_else(|| self.err(line, SemanticError::FunctionNotDeclaredInScope(name.to_string())))?;
                *name = resolved;
                for arg in args {
                    self.resolve_expression(arg)?;
                }
                Ok(())
            }
            ExpressionKind::Dereference(inner) | ExpressionKind::AddrOf(inner) => self.resolve_expression(inner),
            ExpressionKind::Subscript { array, index } => {
                self.resolve_expression(array)?;
                self.resolve_expression(index)
            }
            ExpressionKind::SizeOfType(_) => Ok(()),
            ExpressionKind::SizeOfExpr(inner) => self.resolve_expression(inner),
            ExpressionKind::Dot { structure, .. } => self.resolve_expression(structure),
            ExpressionKind::Arrow { pointer, .. } => self.resolve_expression(pointer),
        }
    }
}

/// Rewrites every `goto` target in `block` from its original spelling to the
/// label's resolved unique name. Run once per function body, after the first
/// pass has populated every label's unique name (labels may be declared after
/// the `goto` that targets them).
fn rename_gotos_and_labels(block: &mut Block, labels: &HashMap<String, Identifier>) {
    for item in &mut block.0 {
        if let BlockItem::Statement(stmt) = item {
            rename_gotos_in_statement(stmt, labels);
        }
    }
}

fn rename_gotos_in_statement(stmt: &mut Statement, labels: &HashMap<String, Identifier>) {
    match stmt {
        Statement::Goto(target) => {
            if let Some(unique) = labels.get(target.as_str()) {
                *target = unique.clone();
            }
        }
        Statement::Label { inner, .. } => rename_gotos_in_statement(inner, labels),
        Statement::If { then_branch, else_branch, .. } => {
            rename_gotos_in_statement(then_branch, labels);
            if let Some(else_branch) = else_branch {
                rename_gotos_in_statement(else_branch, labels);
            }
        }
        Statement::Compound(block) => rename_gotos_and_labels(block, labels),
        Statement::While { body, .. } | Statement::DoWhile { body, .. } | Statement::For { body, .. } => {
            rename_gotos_in_statement(body, labels)
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::Parser;
    use std::io::Write;

    fn resolve_str(src: &str) -> Result<Program, CompileError> {
        let mut f = tempfile::Builder::new().suffix(".c").tempfile().unwrap();
        f.write_all(src.as_bytes()).unwrap();
        let (tokens, _) = lex(f.path(), &[]).unwrap();
        let mut parser = Parser::new(&tokens, f.path().to_path_buf());
        let mut program = parser.parse_program().unwrap();
        let gen = NameGenerator::new();
        let mut resolver = Resolver::new(&gen);
        resolver.resolve_program(&mut program)?;
        Ok(program)
    }

    #[test]
    fn variable_redeclaration_in_same_scope_is_an_error() {
        let result = resolve_str("int main(void) { int a; int a; return 0; }");
        assert!(result.is_err());
    }

    #[test]
    fn shadowing_in_nested_block_is_allowed() {
        let result = resolve_str("int main(void) { int a; { int a; } return 0; }");
        assert!(result.is_ok());
    }

    #[test]
    fn undeclared_variable_use_is_an_error() {
        let result = resolve_str("int main(void) { return a; }");
        assert!(result.is_err());
    }

    #[test]
    fn goto_to_undefined_label_is_an_error() {
        let result = resolve_str("int main(void) { goto nope; return 0; }");
        assert!(result.is_err());
    }

    #[test]
    fn goto_forward_reference_resolves() {
        let result = resolve_str("int main(void) { goto done; done: return 0; }");
        assert!(result.is_ok());
    }

    #[test]
    fn resolved_local_names_are_unique() {
        let program = resolve_str("int main(void) { int a; { int a; } return 0; }").unwrap();
        let Declaration::Function(f) = &program.declarations[0] else { panic!() };
        let body = f.body.as_ref().unwrap();
        let BlockItem::Declaration(Declaration::Var(outer)) = &body.0[0] else { panic!() };
        let BlockItem::Statement(Statement::Compound(inner_block)) = &body.0[1] else { panic!() };
        let BlockItem::Declaration(Declaration::Var(inner)) = &inner_block.0[0] else { panic!() };
        assert_ne!(outer.name, inner.name);
        assert_eq!(outer.name.original_name(), "a");
        assert_eq!(inner.name.original_name(), "a");
    }
}
