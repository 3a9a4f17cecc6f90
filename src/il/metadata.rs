//! Read-only metadata catalogue
//!
//! The front end hands kiln a compilation unit describing every type, field and
//! method it may reference, plus a token table mapping the 32-bit metadata tokens
//! found in bytecode operands back onto those descriptions. The catalogue is built
//! once per unit and then shared by reference between every method compilation.

use crate::compiler_messages::compiler_errors::{CompilerError, ErrorLocation};
use crate::return_metadata_error;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    /// Built-in integer or float type
    Primitive,

    /// Heap allocated and GC managed. Always a 4-byte reference on the stack.
    Class,

    /// Copied by value. Stack size is the memory size rounded up to 4 bytes.
    ValueType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: String,

    /// Symbol of the runtime type descriptor (the type-metadata pointer stored in each object)
    #[serde(default)]
    pub symbol: String,

    pub kind: TypeKind,

    /// Bytes in memory. For classes this is the instance field area after the object header.
    #[serde(default)]
    pub memory_size: u32,

    #[serde(default)]
    pub is_signed: bool,

    #[serde(default)]
    pub is_float: bool,

    #[serde(default)]
    pub base_type: Option<String>,
}

impl TypeInfo {
    pub fn primitive(name: &str, memory_size: u32, is_signed: bool, is_float: bool) -> TypeInfo {
        TypeInfo {
            name: name.to_owned(),
            symbol: format!("type_{}", name.replace(' ', "_")),
            kind: TypeKind::Primitive,
            memory_size,
            is_signed,
            is_float,
            base_type: None,
        }
    }

    pub fn class(name: &str, memory_size: u32, base_type: Option<&str>) -> TypeInfo {
        TypeInfo {
            name: name.to_owned(),
            symbol: format!("type_{}", name.replace('.', "_")),
            kind: TypeKind::Class,
            memory_size,
            is_signed: false,
            is_float: false,
            base_type: base_type.map(str::to_owned),
        }
    }

    pub fn value_type(name: &str, memory_size: u32) -> TypeInfo {
        TypeInfo {
            name: name.to_owned(),
            symbol: format!("type_{}", name.replace('.', "_")),
            kind: TypeKind::ValueType,
            memory_size,
            is_signed: false,
            is_float: false,
            base_type: None,
        }
    }

    pub fn is_gc_managed(&self) -> bool {
        self.kind == TypeKind::Class
    }

    pub fn is_value_type(&self) -> bool {
        self.kind != TypeKind::Class
    }

    pub fn is_struct(&self) -> bool {
        self.kind == TypeKind::ValueType
    }

    /// Width of one evaluation stack slot holding a value of this type
    pub fn stack_size(&self) -> u32 {
        match self.kind {
            TypeKind::Class => 4,
            TypeKind::Primitive | TypeKind::ValueType => round_to_word(self.memory_size),
        }
    }

    /// Bytes a field, array element or local of this type occupies in memory
    pub fn storage_size(&self) -> u32 {
        match self.kind {
            TypeKind::Class => 4,
            TypeKind::Primitive | TypeKind::ValueType => self.memory_size,
        }
    }
}

pub fn round_to_word(bytes: u32) -> u32 {
    bytes.div_ceil(4).max(1) * 4
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Qualified name, `Type::field`
    pub name: String,

    pub declaring_type: String,

    pub field_type: String,

    /// Byte offset from the start of the instance field area, or from the static symbol
    #[serde(default)]
    pub offset: u32,

    #[serde(default)]
    pub is_static: bool,

    /// Symbol holding the storage of a static field
    #[serde(default)]
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub symbol: String,

    #[serde(default)]
    pub declaring_type: Option<String>,

    /// Declared parameters, not including the implicit receiver
    #[serde(default)]
    pub params: Vec<String>,

    #[serde(default)]
    pub return_type: Option<String>,

    #[serde(default)]
    pub locals: Vec<String>,

    #[serde(default)]
    pub is_static: bool,

    #[serde(default)]
    pub is_virtual: bool,

    #[serde(default)]
    pub is_delegate_invoke: bool,

    #[serde(default)]
    pub is_constructor: bool,

    /// Identifier this method is registered under in method tables
    #[serde(default)]
    pub method_table_id: u32,

    /// Raw bytecode. Methods without a body are external and only referenced.
    #[serde(default)]
    pub il: Option<Vec<u8>>,

    /// Exception handling clauses of the body, in the order the runtime searches them
    #[serde(default)]
    pub handlers: Vec<ExceptionClause>,
}

impl MethodInfo {
    pub fn has_receiver(&self) -> bool {
        !self.is_static
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseKind {
    Catch,
    Filter,
    Finally,
    Fault,
}

/// One protected region and the block the runtime transfers to from it.
/// Offsets are byte offsets into the method's IL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionClause {
    pub kind: ClauseKind,

    #[serde(default)]
    pub try_offset: u32,

    #[serde(default)]
    pub try_length: u32,

    pub handler_offset: u32,

    #[serde(default)]
    pub handler_length: u32,

    /// Start of the filter block, only for `Filter` clauses
    #[serde(default)]
    pub filter_offset: Option<u32>,

    /// Type a `Catch` clause catches
    #[serde(default)]
    pub catch_type: Option<String>,
}

impl ExceptionClause {
    /// Offsets the runtime enters with the exception reference already pushed
    pub fn exception_entries(&self) -> Vec<u32> {
        match self.kind {
            ClauseKind::Catch => vec![self.handler_offset],
            ClauseKind::Filter => self
                .filter_offset
                .into_iter()
                .chain(std::iter::once(self.handler_offset))
                .collect(),
            ClauseKind::Finally | ClauseKind::Fault => Vec::new(),
        }
    }

    /// Offsets the runtime enters with an empty evaluation stack
    pub fn empty_entries(&self) -> Vec<u32> {
        match self.kind {
            ClauseKind::Finally | ClauseKind::Fault => vec![self.handler_offset],
            ClauseKind::Catch | ClauseKind::Filter => Vec::new(),
        }
    }
}

/// What a metadata token in an operand refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTarget {
    Type(String),
    Field(String),
    Method(String),

    /// Symbol of a string literal
    String(String),
}

impl TokenTarget {
    fn kind_name(&self) -> &'static str {
        match self {
            TokenTarget::Type(_) => "type",
            TokenTarget::Field(_) => "field",
            TokenTarget::Method(_) => "method",
            TokenTarget::String(_) => "string",
        }
    }
}

/// A compilation unit as the front end serialises it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompilationUnit {
    #[serde(default)]
    pub types: Vec<TypeInfo>,

    #[serde(default)]
    pub fields: Vec<FieldInfo>,

    #[serde(default)]
    pub methods: Vec<MethodInfo>,

    /// Token (decimal or `0x` hex) to referenced entity
    #[serde(default)]
    pub tokens: BTreeMap<String, TokenTarget>,

    /// String literal symbol to its contents, passed through for the assembly writer
    #[serde(default)]
    pub strings: BTreeMap<String, String>,
}

impl CompilationUnit {
    pub fn from_json(source: &str) -> Result<CompilationUnit, CompilerError> {
        serde_json::from_str(source).map_err(|e| {
            CompilerError::metadata_error(
                format!("Compilation unit is not valid JSON: {e}"),
                ErrorLocation::default(),
            )
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataCatalogue {
    types: FxHashMap<String, TypeInfo>,
    fields: FxHashMap<String, FieldInfo>,
    methods: FxHashMap<String, MethodInfo>,
    tokens: FxHashMap<u32, TokenTarget>,
}

impl MetadataCatalogue {
    /// An empty catalogue that already knows the built-in primitive types.
    pub fn new() -> MetadataCatalogue {
        let mut catalogue = MetadataCatalogue::default();
        for ty in builtin_types() {
            catalogue.add_type(ty);
        }
        catalogue
    }

    pub fn from_unit(unit: &CompilationUnit) -> Result<MetadataCatalogue, CompilerError> {
        let mut catalogue = MetadataCatalogue::new();

        for ty in &unit.types {
            catalogue.add_type(ty.to_owned());
        }
        for field in &unit.fields {
            catalogue.add_field(field.to_owned());
        }
        for method in &unit.methods {
            catalogue.add_method(method.to_owned());
        }
        for (key, target) in &unit.tokens {
            let token = parse_token_key(key)?;
            catalogue.add_token(token, target.to_owned());
        }

        Ok(catalogue)
    }

    pub fn add_type(&mut self, mut ty: TypeInfo) {
        if ty.symbol.is_empty() {
            ty.symbol = format!("type_{}", ty.name.replace(['.', ' '], "_"));
        }
        self.types.insert(ty.name.to_owned(), ty);
    }

    pub fn add_field(&mut self, mut field: FieldInfo) {
        if field.is_static && field.symbol.is_empty() {
            field.symbol = format!("static_{}", field.name.replace(['.', ':'], "_"));
        }
        self.fields.insert(field.name.to_owned(), field);
    }

    pub fn add_method(&mut self, method: MethodInfo) {
        self.methods.insert(method.symbol.to_owned(), method);
    }

    pub fn add_token(&mut self, token: u32, target: TokenTarget) {
        self.tokens.insert(token, target);
    }

    pub fn type_named(&self, name: &str, location: &ErrorLocation) -> Result<&TypeInfo, CompilerError> {
        match self.types.get(name) {
            Some(ty) => Ok(ty),
            None => return_metadata_error!(
                format!("Type '{name}' is not in the metadata catalogue"),
                location.to_owned(),
                { TokenKind => "type" }
            ),
        }
    }

    pub fn method_named(&self, symbol: &str, location: &ErrorLocation) -> Result<&MethodInfo, CompilerError> {
        match self.methods.get(symbol) {
            Some(method) => Ok(method),
            None => return_metadata_error!(
                format!("Method '{symbol}' is not in the metadata catalogue"),
                location.to_owned(),
                { TokenKind => "method" }
            ),
        }
    }

    pub fn field_named(&self, name: &str, location: &ErrorLocation) -> Result<&FieldInfo, CompilerError> {
        match self.fields.get(name) {
            Some(field) => Ok(field),
            None => return_metadata_error!(
                format!("Field '{name}' is not in the metadata catalogue"),
                location.to_owned(),
                { TokenKind => "field" }
            ),
        }
    }

    fn token(&self, token: u32, location: &ErrorLocation) -> Result<&TokenTarget, CompilerError> {
        match self.tokens.get(&token) {
            Some(target) => Ok(target),
            None => return_metadata_error!(
                format!("Token 0x{token:08x} does not resolve to anything"),
                location.to_owned()
            ),
        }
    }

    pub fn type_for_token(&self, token: u32, location: &ErrorLocation) -> Result<&TypeInfo, CompilerError> {
        match self.token(token, location)? {
            TokenTarget::Type(name) => self.type_named(name, location),
            other => wrong_token_kind(token, "type", other, location),
        }
    }

    pub fn field_for_token(&self, token: u32, location: &ErrorLocation) -> Result<&FieldInfo, CompilerError> {
        match self.token(token, location)? {
            TokenTarget::Field(name) => self.field_named(name, location),
            other => wrong_token_kind(token, "field", other, location),
        }
    }

    pub fn method_for_token(&self, token: u32, location: &ErrorLocation) -> Result<&MethodInfo, CompilerError> {
        match self.token(token, location)? {
            TokenTarget::Method(symbol) => self.method_named(symbol, location),
            other => wrong_token_kind(token, "method", other, location),
        }
    }

    pub fn string_for_token(&self, token: u32, location: &ErrorLocation) -> Result<&str, CompilerError> {
        match self.token(token, location)? {
            TokenTarget::String(symbol) => Ok(symbol.as_str()),
            other => wrong_token_kind(token, "string", other, location),
        }
    }

    /// Types of every argument slot in declaration order, receiver first.
    /// A value-type receiver is passed by address.
    pub fn argument_types(
        &self,
        method: &MethodInfo,
        location: &ErrorLocation,
    ) -> Result<Vec<&TypeInfo>, CompilerError> {
        let mut args = Vec::with_capacity(method.params.len() + 1);

        if method.has_receiver() {
            let receiver = match &method.declaring_type {
                Some(name) => {
                    let ty = self.type_named(name, location)?;
                    if ty.is_struct() {
                        self.type_named("native int", location)?
                    } else {
                        ty
                    }
                }
                None => self.type_named("object", location)?,
            };
            args.push(receiver);
        }

        for param in &method.params {
            args.push(self.type_named(param, location)?);
        }

        Ok(args)
    }

    pub fn return_type(
        &self,
        method: &MethodInfo,
        location: &ErrorLocation,
    ) -> Result<Option<&TypeInfo>, CompilerError> {
        match &method.return_type {
            Some(name) if name != "void" => Ok(Some(self.type_named(name, location)?)),
            _ => Ok(None),
        }
    }

    pub fn local_types(
        &self,
        method: &MethodInfo,
        location: &ErrorLocation,
    ) -> Result<Vec<&TypeInfo>, CompilerError> {
        method
            .locals
            .iter()
            .map(|name| self.type_named(name, location))
            .collect()
    }
}

fn wrong_token_kind<T>(
    token: u32,
    expected: &str,
    found: &TokenTarget,
    location: &ErrorLocation,
) -> Result<T, CompilerError> {
    return_metadata_error!(
        format!(
            "Token 0x{token:08x} refers to a {} but a {expected} was expected",
            found.kind_name()
        ),
        location.to_owned(),
        { TokenKind => found.kind_name() }
    )
}

fn parse_token_key(key: &str) -> Result<u32, CompilerError> {
    let parsed = match key.strip_prefix("0x").or_else(|| key.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => key.parse::<u32>(),
    };

    match parsed {
        Ok(token) => Ok(token),
        Err(_) => return_metadata_error!(
            format!("Token key '{key}' is not a decimal or 0x-prefixed hex number"),
            ErrorLocation::default()
        ),
    }
}

fn builtin_types() -> Vec<TypeInfo> {
    vec![
        TypeInfo::primitive("bool", 1, false, false),
        TypeInfo::primitive("char", 2, false, false),
        TypeInfo::primitive("int8", 1, true, false),
        TypeInfo::primitive("uint8", 1, false, false),
        TypeInfo::primitive("int16", 2, true, false),
        TypeInfo::primitive("uint16", 2, false, false),
        TypeInfo::primitive("int32", 4, true, false),
        TypeInfo::primitive("uint32", 4, false, false),
        TypeInfo::primitive("int64", 8, true, false),
        TypeInfo::primitive("uint64", 8, false, false),
        TypeInfo::primitive("native int", 4, true, false),
        TypeInfo::primitive("native uint", 4, false, false),
        TypeInfo::primitive("float32", 4, true, true),
        TypeInfo::primitive("float64", 8, true, true),
        TypeInfo::class("object", 0, None),
        TypeInfo::class("string", 4, Some("object")),
    ]
}
