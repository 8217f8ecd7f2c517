mod common;

use std::sync::Arc;

use anyhow::Result;
use docstack::database::{MemoryStore, ReadOptions, TransactionOptions};
use docstack::schema::{ControllerFlags, ControllerOperation, FieldDefinition, FieldError, Schema, SchemaOptions};
use docstack::service::{ControllerService, Hooks, ServiceError, VersionConflict};
use mongodb::bson::{doc, Bson};

use common::{id_of, version_of};

fn hex_id(document: &mongodb::bson::Document) -> Bson {
    match id_of(document) {
        Bson::ObjectId(id) => Bson::String(id.to_hex()),
        other => other,
    }
}

#[tokio::test]
async fn reserved_fields_cannot_be_written() -> Result<()> {
    let (_store, service) = common::controller().await?;
    let hooks = Hooks::new();

    let err = service.create_one(doc! { "version": 5 }, None, &hooks).await.unwrap_err();
    match err {
        ServiceError::Field(FieldError::NotAllowed { path, operation }) => {
            assert_eq!(path, "version");
            assert_eq!(operation, ControllerOperation::CreateOne);
        }
        other => panic!("expected NotAllowed, got {other:?}"),
    }

    for field in ["_id", "isSoftDeleted", "createdAt", "updatedAt"] {
        let mut candidate = doc! { "name": "a" };
        candidate.insert(field, Bson::Null);
        let err = service.create_one(candidate, None, &hooks).await.unwrap_err();
        assert!(
            matches!(err, ServiceError::Field(FieldError::NotAllowed { ref path, .. }) if path == field),
            "{field} should be rejected, got {err:?}"
        );
    }
    Ok(())
}

#[tokio::test]
async fn unknown_fields_are_rejected_not_dropped() -> Result<()> {
    let (store, service) = common::controller().await?;

    let err = service
        .create_one(doc! { "name": "a", "extra": "x" }, None, &Hooks::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Unknown field 'extra'");

    let err = service
        .create_one(doc! { "address": { "city": "Paris", "country": "FR" } }, None, &Hooks::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Field(FieldError::UnknownField { ref path }) if path == "address.country"));

    assert!(store.documents(service.schema().namespace()).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn per_operation_flags_are_enforced() -> Result<()> {
    let (_store, service) = common::controller().await?;
    let hooks = Hooks::new();

    let created = service.create_one(doc! { "name": "a", "sku": "S1" }, None, &hooks).await?;
    let err = service
        .update_one_by_id_and_version(hex_id(&created), Bson::String("0".into()), doc! { "sku": "S2" }, None, &hooks)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Field 'sku' is not allowed for updateOneByIdAndVersion");

    let updated = service
        .update_one_by_id_and_version(hex_id(&created), Bson::String("0".into()), doc! { "name": "b" }, None, &hooks)
        .await?;
    assert_eq!(version_of(&updated), 1);
    assert_eq!(updated.get_str("sku")?, "S1");
    Ok(())
}

#[tokio::test]
async fn ids_and_versions_arrive_as_strings() -> Result<()> {
    let (_store, service) = common::controller().await?;
    let hooks = Hooks::new();
    let created = service.create_one(doc! { "name": "a" }, None, &hooks).await?;

    let found = service.read_one_by_id(hex_id(&created), None, &hooks).await?;
    assert_eq!(found.get("_id"), created.get("_id"));

    let err = service
        .read_one_by_id(Bson::String("not-an-id".into()), None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Field(ref e) if e.path() == "_id"));

    let err = service
        .soft_delete_one_by_id_and_version(hex_id(&created), Bson::String("x".into()), None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Field(ref e) if e.path() == "version"));

    let err = service
        .read_one_by_id(Bson::String("64b7f0a1c2d3e4f5a6b7c8d9".into()), None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn empty_updates_are_bad_requests() -> Result<()> {
    let (_store, service) = common::controller().await?;
    let hooks = Hooks::new();
    let created = service.create_one(doc! { "name": "a" }, None, &hooks).await?;

    let err = service
        .update_one_by_id_and_version(hex_id(&created), Bson::Int32(0), doc! {}, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(_)));
    Ok(())
}

#[tokio::test]
async fn reads_are_authorized_field_by_field() -> Result<()> {
    let (_store, service) = common::controller().await?;
    let hooks = Hooks::new();
    service.create_one(doc! { "name": "a", "qty": 2 }, None, &hooks).await?;
    service.create_one(doc! { "name": "b", "qty": 5 }, None, &hooks).await?;

    let found = service
        .read(doc! { "qty": { "$gte": "3" } }, ReadOptions::default(), None, &hooks)
        .await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get_str("name")?, "b");

    let err = service
        .read(doc! { "isSoftDeleted": true }, ReadOptions::default(), None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Field(FieldError::NotAllowed {
            operation: ControllerOperation::Read,
            ..
        })
    ));

    let options = ReadOptions {
        sort: Some(doc! { "isSoftDeleted": 1 }),
        ..Default::default()
    };
    assert!(service.read(doc! {}, options, None, &hooks).await.is_err());

    let err = service
        .read(doc! { "nope": 1 }, ReadOptions::default(), None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Field(FieldError::UnknownField { .. })));
    Ok(())
}

#[tokio::test]
async fn multilingual_keys_must_be_configured_languages() -> Result<()> {
    let (_store, service) = common::controller().await?;
    let hooks = Hooks::new();

    service
        .create_one(doc! { "title": { "en": "Hello", "fr": "Bonjour" } }, None, &hooks)
        .await?;
    let err = service
        .create_one(doc! { "title": { "de": "Hallo" } }, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Field(FieldError::UnsupportedLanguage { ref language, .. }) if language == "de"
    ));
    Ok(())
}

#[tokio::test]
async fn replace_and_purge_follow_the_version() -> Result<()> {
    let (store, service) = common::controller().await?;
    let hooks = Hooks::new();
    let created = service.create_one(doc! { "name": "a", "price": 1.0 }, None, &hooks).await?;

    let replaced = service
        .replace_one_by_id_and_version(hex_id(&created), Bson::String("0".into()), doc! { "name": "z" }, None, &hooks)
        .await?;
    assert_eq!(version_of(&replaced), 1);
    assert!(replaced.get("price").is_none());

    let err = service
        .delete_one_by_id_and_version(hex_id(&created), Bson::String("0".into()), None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::VersionConflict(VersionConflict::Modified { .. })));

    service
        .delete_one_by_id_and_version(hex_id(&created), Bson::String("1".into()), None, &hooks)
        .await?;
    assert!(store.documents(service.schema().namespace()).await.is_empty());
    Ok(())
}

async fn controller_with(
    extra: Vec<(&str, FieldDefinition)>,
) -> Result<(Arc<MemoryStore>, ControllerService<MemoryStore>)> {
    let store = Arc::new(MemoryStore::new());
    let mut definition = common::product_definition();
    for (name, field) in extra {
        definition.insert(name.to_string(), field);
    }
    let schema = Schema::create(
        store.as_ref(),
        common::DATABASE,
        common::COLLECTION,
        definition,
        &common::languages(),
        SchemaOptions::default(),
    )
    .await?;
    let service = ControllerService::new(Arc::new(schema), Arc::clone(&store), TransactionOptions::default());
    Ok((store, service))
}

#[tokio::test]
async fn declared_version_is_still_managed() -> Result<()> {
    let (_store, service) = controller_with(vec![("version", FieldDefinition::new("long"))]).await?;
    let hooks = Hooks::new();

    let err = service
        .create_one(doc! { "name": "a", "version": 5_i64 }, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Field(FieldError::NotAllowed { ref path, .. }) if path == "version"));

    let created = service.create_one(doc! { "name": "a" }, None, &hooks).await?;
    let err = service
        .update_one_by_id_and_version(hex_id(&created), Bson::Int32(0), doc! { "version": 9_i64 }, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Field(FieldError::NotAllowed { ref path, operation: ControllerOperation::UpdateOneByIdAndVersion })
            if path == "version"
    ));

    // Even an explicit grant cannot make the lifecycle's own fields writable
    let (_store, service) = controller_with(vec![(
        "version",
        FieldDefinition::new("long").controller(ControllerFlags {
            replace_one_by_id_and_version: Some(true),
            ..Default::default()
        }),
    )])
    .await?;
    let created = service.create_one(doc! { "name": "a" }, None, &hooks).await?;
    let err = service
        .replace_one_by_id_and_version(hex_id(&created), Bson::Int32(0), doc! { "version": 3_i64 }, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Field(FieldError::NotAllowed { .. })));
    Ok(())
}

#[tokio::test]
async fn read_one_by_id_honours_its_flag() -> Result<()> {
    let (_store, service) = controller_with(vec![(
        "_id",
        FieldDefinition::new("objectId").controller(ControllerFlags {
            read_one_by_id: Some(false),
            ..Default::default()
        }),
    )])
    .await?;
    let hooks = Hooks::new();
    let created = service.create_one(doc! { "name": "a" }, None, &hooks).await?;

    let err = service.read_one_by_id(hex_id(&created), None, &hooks).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Field(FieldError::NotAllowed { ref path, operation: ControllerOperation::ReadOneById })
            if path == "_id"
    ));

    let found = service.read(doc! { "_id": hex_id(&created) }, ReadOptions::default(), None, &hooks).await?;
    assert_eq!(found.len(), 1);
    Ok(())
}
