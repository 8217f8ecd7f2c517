#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use docstack::database::{MemoryStore, TransactionOptions};
use docstack::schema::{ControllerFlags, Definition, FieldDefinition, Languages, Schema, SchemaOptions};
use docstack::service::{ControllerService, LifecyclePolicy, LifecycleService};
use mongodb::bson::{Bson, Document};

pub const DATABASE: &str = "docstack_test";
pub const COLLECTION: &str = "products";

pub fn languages() -> Languages {
    Languages::new(["en", "fr"]).expect("valid languages")
}

/// name, price, qty, tags, sku (fixed after create), title (multilingual), address
pub fn product_definition() -> Definition {
    let mut definition = Definition::new();
    definition.insert("name".into(), FieldDefinition::new("string"));
    definition.insert("price".into(), FieldDefinition::new("double"));
    definition.insert("qty".into(), FieldDefinition::new("int"));
    definition.insert("tags".into(), FieldDefinition::array(FieldDefinition::new("string")));
    definition.insert(
        "sku".into(),
        FieldDefinition::new("string").controller(ControllerFlags {
            update_one_by_id_and_version: Some(false),
            replace_one_by_id_and_version: Some(false),
            ..Default::default()
        }),
    );
    definition.insert("title".into(), FieldDefinition::new("string").multilingual());

    let mut address = Definition::new();
    address.insert("city".into(), FieldDefinition::new("string"));
    address.insert("zip".into(), FieldDefinition::new("string"));
    definition.insert("address".into(), FieldDefinition::object(address));
    definition
}

pub async fn product_schema(store: &MemoryStore, options: SchemaOptions) -> Result<Arc<Schema>> {
    let schema = Schema::create(store, DATABASE, COLLECTION, product_definition(), &languages(), options).await?;
    Ok(Arc::new(schema))
}

pub async fn lifecycle(policy: LifecyclePolicy) -> Result<(Arc<MemoryStore>, LifecycleService<MemoryStore>)> {
    let store = Arc::new(MemoryStore::new());
    let schema = product_schema(&store, SchemaOptions::default()).await?;
    let service = LifecycleService::new(schema, Arc::clone(&store), TransactionOptions::default(), policy);
    Ok((store, service))
}

pub async fn controller() -> Result<(Arc<MemoryStore>, ControllerService<MemoryStore>)> {
    let store = Arc::new(MemoryStore::new());
    let schema = product_schema(&store, SchemaOptions::default()).await?;
    let service = ControllerService::new(schema, Arc::clone(&store), TransactionOptions::default());
    Ok((store, service))
}

pub fn id_of(document: &Document) -> Bson {
    document.get("_id").cloned().expect("document has an _id")
}

pub fn version_of(document: &Document) -> i64 {
    document.get_i64("version").expect("document has a long version")
}
