pub mod definition;
pub mod error;
pub mod field;
pub mod file;
pub mod language;
pub mod validator;
pub mod walk;

use std::sync::Arc;

use mongodb::bson::Document;
use tracing::info;

pub use definition::{Definition, FieldDefinition, TypeSpec};
pub use error::{FieldError, SchemaError};
pub use field::{identify_type, BsonKind, ControllerFlags, ControllerOperation, Field, FieldNode};
pub use file::SchemaFile;
pub use language::Languages;

use crate::database::{Collection, DocumentStore, Namespace};

pub const ID_FIELD: &str = "_id";
pub const VERSION_FIELD: &str = "version";
pub const SOFT_DELETE_FIELD: &str = "isSoftDeleted";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaOptions {
    /// Install the derived validator on the physical collection
    pub enforce: bool,
    /// Maintain `createdAt` / `updatedAt`
    pub timestamps: bool,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            enforce: true,
            timestamps: true,
        }
    }
}

/// An immutable, validated field tree bound to one collection
#[derive(Debug, Clone)]
pub struct Schema {
    namespace: Namespace,
    definition: Definition,
    root: Field,
    options: SchemaOptions,
    languages: Languages,
    validator: Document,
}

impl Schema {
    /// Validate and compile a definition without touching the store
    pub fn define(
        database: &str,
        collection: &str,
        definition: Definition,
        languages: &Languages,
        options: SchemaOptions,
    ) -> Result<Self, SchemaError> {
        validate_namespace(database, collection)?;

        let mut definition = definition;
        let mut reserved = vec![
            (ID_FIELD, "objectId", ControllerFlags::read_only()),
            (VERSION_FIELD, "long", ControllerFlags::read_only()),
            (
                SOFT_DELETE_FIELD,
                "bool",
                ControllerFlags {
                    read: Some(false),
                    read_one_by_id: Some(false),
                    ..ControllerFlags::read_only()
                },
            ),
        ];
        if options.timestamps {
            reserved.push((CREATED_AT_FIELD, "date", ControllerFlags::read_only()));
            reserved.push((UPDATED_AT_FIELD, "date", ControllerFlags::read_only()));
        }
        for (name, bson_type, controller) in reserved {
            match definition.get_mut(name) {
                Some(declared) => {
                    let field = declared.compile(name, languages)?;
                    let kind = BsonKind::parse(bson_type);
                    let matches = match field.node {
                        FieldNode::Primitive(declared_kind) => Some(declared_kind) == kind,
                        _ => false,
                    };
                    if !matches {
                        return Err(SchemaError::invalid(
                            name,
                            format!("reserved field must be declared as {}", bson_type),
                        ));
                    }
                    declared.controller = Some(declared.controller.unwrap_or_default().or(controller));
                }
                None => {
                    definition.insert(name.to_string(), FieldDefinition::new(bson_type).controller(controller));
                }
            }
        }

        let root = Field::object(definition::compile_properties(&definition, None, languages)?);
        let validator = validator::derive_validator(&root);

        Ok(Self {
            namespace: Namespace::new(database, collection),
            definition,
            root,
            options,
            languages: languages.clone(),
            validator,
        })
    }

    /// Define a schema and, when enforcement is on, install its validator before returning
    pub async fn create<S: DocumentStore>(
        store: &S,
        database: &str,
        collection: &str,
        definition: Definition,
        languages: &Languages,
        options: SchemaOptions,
    ) -> Result<Self, SchemaError> {
        let schema = Self::define(database, collection, definition, languages, options)?;
        if schema.options.enforce {
            schema.enforce(store).await?;
        }
        Ok(schema)
    }

    pub async fn enforce<S: DocumentStore>(&self, store: &S) -> Result<(), SchemaError> {
        info!(
            "Enforcing validator on {} (checksum {})",
            self.namespace,
            self.checksum()
        );
        store
            .enforce_validator(&self.namespace, self.validator.clone())
            .await?;
        Ok(())
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn root(&self) -> &Field {
        &self.root
    }

    pub fn options(&self) -> SchemaOptions {
        self.options
    }

    pub fn languages(&self) -> &Languages {
        &self.languages
    }

    pub fn validator(&self) -> &Document {
        &self.validator
    }

    pub fn checksum(&self) -> String {
        validator::checksum(&self.validator)
    }

    pub fn field(&self, path: &str) -> Option<&Field> {
        self.root.resolve(path)
    }

    pub fn collection<S: DocumentStore>(&self, store: Arc<S>) -> Collection<S> {
        Collection::new(store, self.namespace.clone())
    }
}

fn validate_namespace(database: &str, collection: &str) -> Result<(), SchemaError> {
    const FORBIDDEN: &[char] = &['/', '\\', '.', ' ', '"', '$', '\0'];
    if database.is_empty() || database.len() > 63 || database.contains(FORBIDDEN) {
        return Err(SchemaError::InvalidNamespace(format!("invalid database name '{}'", database)));
    }
    if collection.is_empty() || collection.starts_with("system.") || collection.contains(['$', '\0']) {
        return Err(SchemaError::InvalidNamespace(format!(
            "invalid collection name '{}'",
            collection
        )));
    }
    Ok(())
}
