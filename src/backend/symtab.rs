//! Backend symbol table conversion
//!
//! Derives one backend-symbol entry per front-symbol-table entry, fixing an
//! `AssemblyType`/`AggregateLayout` for every object and carrying forward the
//! static/constant linkage facts the emitter needs to decide which section a
//! name belongs in.

use std::collections::HashMap;

use crate::ast::Type;
use crate::intern::Identifier;
use crate::symbol::{IdentifierAttrs, StructTable, SymbolTable};
use crate::typecheck::type_size_align;

use super::ast::{AggregateLayout, AssemblyType};

#[derive(Debug, Clone, PartialEq)]
pub enum BackendSymbol {
    Obj { layout: AggregateLayout, is_static: bool, is_constant: bool },
    Fun { is_defined: bool },
}

#[derive(Debug, Default)]
pub struct BackendSymbolTable {
    symbols: HashMap<Identifier, BackendSymbol>,
}

impl BackendSymbolTable {
    pub fn get(&self, name: &Identifier) -> Option<&BackendSymbol> {
        self.symbols.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &BackendSymbol)> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Maps a front-end `Type` to its backend storage layout, per §4.8's table:
/// characters to `Byte`, `int`/`unsigned int` to `LongWord`, `long`/pointer to
/// `QuadWord`, `double` to `BackendDouble`, and arrays/structs to a
/// size-and-alignment `ByteArray` drawn from the structure-type table.
pub fn convert_backend_assembly_type(ty: &Type, structs: &StructTable) -> AggregateLayout {
    match ty {
        Type::Char | Type::SChar | Type::UChar => AggregateLayout::Scalar(AssemblyType::Byte),
        Type::Int | Type::UInt => AggregateLayout::Scalar(AssemblyType::LongWord),
        Type::Long | Type::ULong | Type::Pointer(_) => AggregateLayout::Scalar(AssemblyType::QuadWord),
        Type::Double => AggregateLayout::Scalar(AssemblyType::BackendDouble),
        Type::Array { .. } | Type::Structure(_) => {
            let (size, alignment) = type_size_align(ty, structs)
                .unwrap_or_else(|| crate::internal_error!("aggregate type missing from structure table during backend conversion"));
            AggregateLayout::ByteArray { size, alignment }
        }
        Type::Void | Type::Function { .. } => {
            crate::internal_error!("void or function type has no backend representation")
        }
    }
}

/// Converts every entry of the front symbol table into its backend
/// counterpart, per §4.8's attribute rules. Called once, after TAC and
/// backend-instruction lowering have finished inserting any temporaries they
/// introduced (the front table is read-only by this point).
pub fn convert_symbol_table(symbols: &SymbolTable, structs: &StructTable) -> BackendSymbolTable {
    let mut table = BackendSymbolTable::default();
    for (name, symbol) in symbols.iter() {
        let backend = match &symbol.attrs {
            IdentifierAttrs::Function { is_defined, .. } => BackendSymbol::Fun { is_defined: *is_defined },
            IdentifierAttrs::Static { .. } => BackendSymbol::Obj {
                layout: convert_backend_assembly_type(&symbol.ty, structs),
                is_static: true,
                is_constant: false,
            },
            IdentifierAttrs::Constant(_) => BackendSymbol::Obj {
                layout: convert_backend_assembly_type(&symbol.ty, structs),
                is_static: true,
                is_constant: true,
            },
            IdentifierAttrs::Local => BackendSymbol::Obj {
                layout: convert_backend_assembly_type(&symbol.ty, structs),
                is_static: false,
                is_constant: false,
            },
        };
        table.symbols.insert(name.clone(), backend);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Symbol;

    #[test]
    fn function_attr_converts_to_backend_fun() {
        let mut symbols = SymbolTable::new();
        let name = Identifier::new("main");
        symbols.insert(
            name.clone(),
            Symbol {
                ty: Type::Function { params: vec![], ret: Box::new(Type::Int) },
                attrs: IdentifierAttrs::Function { is_defined: true, is_global: true },
            },
        );
        let structs = StructTable::new();
        let backend = convert_symbol_table(&symbols, &structs);
        assert_eq!(backend.get(&name), Some(&BackendSymbol::Fun { is_defined: true }));
    }

    #[test]
    fn int_static_converts_to_long_word_obj() {
        let mut symbols = SymbolTable::new();
        let name = Identifier::new("x");
        symbols.insert(
            name.clone(),
            Symbol {
                ty: Type::Int,
                attrs: IdentifierAttrs::Static {
                    init: crate::symbol::InitialValue::Initial(vec![crate::symbol::StaticInit::Int(5)]),
                    is_global: true,
                },
            },
        );
        let structs = StructTable::new();
        let backend = convert_symbol_table(&symbols, &structs);
        assert_eq!(
            backend.get(&name),
            Some(&BackendSymbol::Obj {
                layout: AggregateLayout::Scalar(AssemblyType::LongWord),
                is_static: true,
                is_constant: false,
            })
        );
    }

    #[test]
    fn local_variable_converts_to_non_static_obj() {
        let mut symbols = SymbolTable::new();
        let name = Identifier::new("tmp.4");
        symbols.insert(name.clone(), Symbol::local(Type::Double));
        let structs = StructTable::new();
        let backend = convert_symbol_table(&symbols, &structs);
        assert_eq!(
            backend.get(&name),
            Some(&BackendSymbol::Obj {
                layout: AggregateLayout::Scalar(AssemblyType::BackendDouble),
                is_static: false,
                is_constant: false,
            })
        );
    }
}
