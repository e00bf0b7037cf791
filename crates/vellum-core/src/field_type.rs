//! Field type contract and registry.
//!
//! A [`FieldType`] describes how values of one kind of field are sanitized, validated,
//! defaulted, stored, read back, populated and turned into search keywords. Callbacks
//! receive an explicit context struct per callback kind.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::conditional::FieldCondition;
use crate::error::CoreError;
use crate::fields;
use crate::record::{Operation, Record, value_to_text};
use crate::schema::{CollectionDefinition, FieldDeclaration};

/// Underlying storage type of a field, used for operator compatibility and coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    Text,
    Number,
    Boolean,
}

impl StorageType {
    /// Whether `gt`/`gte`/`lt`/`lte`/`between`/`notBetween` apply.
    pub fn supports_ordering(self) -> bool {
        matches!(self, Self::Text | Self::Number)
    }

    /// Whether the `like` family applies.
    pub fn supports_patterns(self) -> bool {
        matches!(self, Self::Text)
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

/// Operations a sanitizer or validator runs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationScope {
    /// A bare callback: runs for every operation.
    Always,
    Only { create: bool, read: bool, update: bool },
}

impl OperationScope {
    pub fn on_create() -> Self {
        Self::Only {
            create: true,
            read: false,
            update: false,
        }
    }

    pub fn on_read() -> Self {
        Self::Only {
            create: false,
            read: true,
            update: false,
        }
    }

    pub fn on_update() -> Self {
        Self::Only {
            create: false,
            read: false,
            update: true,
        }
    }

    pub fn applies_to(self, operation: Operation) -> bool {
        match self {
            Self::Always => true,
            Self::Only {
                create,
                read,
                update,
            } => match operation {
                Operation::Create => create,
                Operation::Read => read,
                Operation::Update => update,
                Operation::Delete => false,
            },
        }
    }

    /// Explicitly flagged for reads (bare callbacks are not).
    pub fn is_read_flagged(self) -> bool {
        matches!(self, Self::Only { read: true, .. })
    }
}

/// A failed validation. `subpath` addresses a nested value, e.g. an array index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub subpath: Option<String>,
    pub message: String,
}

impl ValidationFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            subpath: None,
            message: message.into(),
        }
    }

    pub fn at(subpath: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subpath: Some(subpath.into()),
            message: message.into(),
        }
    }

    /// Full error path for a field.
    pub fn path(&self, field_name: &str) -> String {
        match &self.subpath {
            Some(sub) => format!("{field_name}.{sub}"),
            None => field_name.to_string(),
        }
    }
}

/// Context passed to sanitizers.
#[derive(Clone, Copy)]
pub struct SanitizeContext<'a> {
    pub collection: &'a CollectionDefinition,
    pub field_name: &'a str,
    pub field: &'a FieldDeclaration,
    pub value: &'a Value,
    pub input: &'a Record,
    pub operation: Operation,
    pub language: &'a str,
}

/// Context passed to validators.
#[derive(Clone, Copy)]
pub struct ValidateContext<'a> {
    pub collection: &'a CollectionDefinition,
    pub field_name: &'a str,
    pub field: &'a FieldDeclaration,
    pub value: &'a Value,
    pub input: &'a Record,
    pub operation: Operation,
    pub language: &'a str,
    /// Every input of a batch create.
    pub all_inputs: Option<&'a [Record]>,
    pub field_types: &'a FieldTypeRegistry,
}

/// Context passed to default-value functions.
#[derive(Clone, Copy)]
pub struct DefaultContext<'a> {
    pub collection: &'a CollectionDefinition,
    pub field_name: &'a str,
    pub field: &'a FieldDeclaration,
    pub language: &'a str,
}

/// Context passed to keyword extractors.
#[derive(Clone, Copy)]
pub struct KeywordContext<'a> {
    pub collection: &'a CollectionDefinition,
    pub field_name: &'a str,
    pub field: &'a FieldDeclaration,
    pub value: &'a Value,
    pub record: &'a Record,
}

/// Context passed to populators.
#[derive(Clone, Copy)]
pub struct PopulateContext<'a> {
    pub collection: &'a CollectionDefinition,
    pub field_name: &'a str,
    pub field: &'a FieldDeclaration,
    pub value: &'a Value,
    pub language: &'a str,
    pub resolver: &'a dyn RecordResolver,
}

/// Loads records of other collections on behalf of populators.
#[async_trait]
pub trait RecordResolver: Send + Sync {
    async fn resolve_record(
        &self,
        collection: &str,
        id: &Value,
        language: &str,
    ) -> Result<Option<Record>, CoreError>;
}

/// Resolves a stored reference value into its related representation.
#[async_trait]
pub trait Populator: Send + Sync {
    async fn populate(&self, ctx: &PopulateContext<'_>) -> Result<Value, CoreError>;
}

type SanitizeFn = dyn Fn(&SanitizeContext<'_>) -> Value + Send + Sync;
type ValidateFn = dyn Fn(&ValidateContext<'_>) -> Result<(), ValidationFailure> + Send + Sync;

/// A value transformation applied before validation.
#[derive(Clone)]
pub struct Sanitizer {
    scope: OperationScope,
    func: Arc<SanitizeFn>,
}

impl Sanitizer {
    pub fn new(func: impl Fn(&SanitizeContext<'_>) -> Value + Send + Sync + 'static) -> Self {
        Self::scoped(OperationScope::Always, func)
    }

    pub fn scoped(
        scope: OperationScope,
        func: impl Fn(&SanitizeContext<'_>) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            scope,
            func: Arc::new(func),
        }
    }

    pub fn applies_to(&self, operation: Operation) -> bool {
        self.scope.applies_to(operation)
    }

    pub fn apply(&self, ctx: &SanitizeContext<'_>) -> Value {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sanitizer")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// A value check. The first failing validator of a field stops its chain.
#[derive(Clone)]
pub struct Validator {
    scope: OperationScope,
    func: Arc<ValidateFn>,
}

impl Validator {
    pub fn new(
        func: impl Fn(&ValidateContext<'_>) -> Result<(), ValidationFailure> + Send + Sync + 'static,
    ) -> Self {
        Self::scoped(OperationScope::Always, func)
    }

    pub fn scoped(
        scope: OperationScope,
        func: impl Fn(&ValidateContext<'_>) -> Result<(), ValidationFailure> + Send + Sync + 'static,
    ) -> Self {
        Self {
            scope,
            func: Arc::new(func),
        }
    }

    pub fn scope(&self) -> OperationScope {
        self.scope
    }

    pub fn applies_to(&self, operation: Operation) -> bool {
        self.scope.applies_to(operation)
    }

    pub fn validate(&self, ctx: &ValidateContext<'_>) -> Result<(), ValidationFailure> {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Behavior of one kind of field.
pub trait FieldType: Send + Sync {
    fn name(&self) -> &str;

    fn storage_type(&self) -> StorageType;

    /// Value used when input omits the field or fallback repairs it.
    fn default_value(&self, ctx: &DefaultContext<'_>) -> Value {
        ctx.field.option("default").cloned().unwrap_or(Value::Null)
    }

    fn sanitizers(&self) -> Vec<Sanitizer> {
        Vec::new()
    }

    fn validators(&self) -> Vec<Validator> {
        Vec::new()
    }

    /// Converts an application value into its stored form.
    fn serialize(&self, value: &Value) -> Value {
        value.clone()
    }

    /// Converts a stored value back into its application form.
    fn deserialize(&self, value: &Value) -> Value {
        value.clone()
    }

    fn population(&self) -> Option<Arc<dyn Populator>> {
        None
    }

    fn extract_keywords(&self, ctx: &KeywordContext<'_>) -> String {
        value_to_text(ctx.value)
    }

    fn matches_condition(&self, value: &Value, condition: &FieldCondition) -> bool {
        condition.matches(value)
    }
}

/// Field type name → implementation.
#[derive(Clone)]
pub struct FieldTypeRegistry {
    types: HashMap<String, Arc<dyn FieldType>>,
}

impl fmt::Debug for FieldTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.types.keys().collect();
        names.sort();
        f.debug_struct("FieldTypeRegistry")
            .field("types", &names)
            .finish()
    }
}

impl Default for FieldTypeRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl FieldTypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    /// A registry holding every built-in field type.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for field_type in fields::builtin() {
            registry.register(field_type);
        }
        registry
    }

    /// Registers a type, replacing any type with the same name.
    pub fn register(&mut self, field_type: Arc<dyn FieldType>) {
        self.types.insert(field_type.name().to_string(), field_type);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FieldType>> {
        self.types.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn resolve(
        &self,
        field_name: &str,
        declaration: &FieldDeclaration,
    ) -> Result<Arc<dyn FieldType>, CoreError> {
        self.get(&declaration.field_type)
            .ok_or_else(|| CoreError::unknown_field_type(field_name, &declaration.field_type))
    }

    /// Type sanitizers followed by the declaration's own.
    pub fn effective_sanitizers(&self, declaration: &FieldDeclaration) -> Vec<Sanitizer> {
        let mut sanitizers = self
            .get(&declaration.field_type)
            .map(|t| t.sanitizers())
            .unwrap_or_default();
        sanitizers.extend(declaration.additional.sanitizers.iter().cloned());
        sanitizers
    }

    /// Type validators followed by the declaration's own.
    pub fn effective_validators(&self, declaration: &FieldDeclaration) -> Vec<Validator> {
        let mut validators = self
            .get(&declaration.field_type)
            .map(|t| t.validators())
            .unwrap_or_default();
        validators.extend(declaration.additional.validators.iter().cloned());
        validators
    }

    /// The declaration's populator, else the type's.
    pub fn population_for(&self, declaration: &FieldDeclaration) -> Option<Arc<dyn Populator>> {
        declaration.additional.population.clone().or_else(|| {
            self.get(&declaration.field_type)
                .and_then(|t| t.population())
        })
    }

    pub fn default_value(&self, ctx: &DefaultContext<'_>) -> Value {
        match self.get(&ctx.field.field_type) {
            Some(field_type) => field_type.default_value(ctx),
            None => ctx.field.option("default").cloned().unwrap_or(Value::Null),
        }
    }

    /// Storage type of a declaration; unknown types store text.
    pub fn storage_type(&self, declaration: &FieldDeclaration) -> StorageType {
        self.get(&declaration.field_type)
            .map(|t| t.storage_type())
            .unwrap_or(StorageType::Text)
    }

    pub fn serialize(&self, declaration: &FieldDeclaration, value: &Value) -> Value {
        match self.get(&declaration.field_type) {
            Some(field_type) if !value.is_null() => field_type.serialize(value),
            _ => value.clone(),
        }
    }

    pub fn deserialize(&self, declaration: &FieldDeclaration, value: &Value) -> Value {
        match self.get(&declaration.field_type) {
            Some(field_type) if !value.is_null() => field_type.deserialize(value),
            _ => value.clone(),
        }
    }
}
