mod common;

use std::sync::Arc;

use anyhow::Result;
use docstack::database::{DocumentStore, MemoryStore, ReadOptions, TransactionOptions};
use docstack::schema::{FieldError, SchemaOptions};
use docstack::service::{Hooks, LifecycleOperation, LifecyclePolicy, LifecycleService, ServiceError, VersionConflict};
use mongodb::bson::{doc, Bson};

use common::{id_of, version_of};

#[tokio::test]
async fn create_then_update_is_a_version_cas() -> Result<()> {
    let (_store, service) = common::lifecycle(LifecyclePolicy::crud()).await?;
    let hooks = Hooks::new();

    let created = service.create_one(doc! { "name": "a", "price": "9.5" }, None, &hooks).await?;
    assert_eq!(version_of(&created), 0);
    assert_eq!(created.get_bool("isSoftDeleted")?, false);
    assert_eq!(created.get_f64("price")?, 9.5);
    assert!(created.get_datetime("createdAt").is_ok());
    let id = id_of(&created);

    let updated = service
        .update_one_by_id_and_version(id.clone(), 0, doc! { "name": "b" }, None, &hooks)
        .await?;
    assert_eq!(version_of(&updated), 1);
    assert_eq!(updated.get_str("name")?, "b");
    assert_eq!(updated.get_f64("price")?, 9.5);
    assert!(updated.get_datetime("updatedAt")? >= created.get_datetime("createdAt")?);

    let stale = service
        .update_one_by_id_and_version(id.clone(), 0, doc! { "name": "c" }, None, &hooks)
        .await
        .unwrap_err();
    match stale {
        ServiceError::VersionConflict(conflict) => {
            assert_eq!(
                conflict,
                VersionConflict::Modified {
                    document_version: 1,
                    supplied_version: 0
                }
            );
            assert_eq!(conflict.to_string(), "Document has been modified since version 0; latest version is 1");
        }
        other => panic!("expected a version conflict, got {other:?}"),
    }

    let ahead = service
        .update_one_by_id_and_version(id.clone(), 5, doc! { "name": "c" }, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(ahead, ServiceError::VersionConflict(VersionConflict::Behind { .. })));

    // Every successful update moves the version by exactly one
    let mut version = 1;
    for name in ["d", "e", "f"] {
        let doc = service
            .update_one_by_id_and_version(id.clone(), version, doc! { "name": name }, None, &hooks)
            .await?;
        assert_eq!(version_of(&doc), version + 1);
        version += 1;
    }
    Ok(())
}

#[tokio::test]
async fn soft_deleted_documents_are_hidden() -> Result<()> {
    let (_store, service) = common::lifecycle(LifecyclePolicy::crud()).await?;
    let hooks = Hooks::new();

    let keep = service.create_one(doc! { "name": "keep" }, None, &hooks).await?;
    let gone = service.create_one(doc! { "name": "gone" }, None, &hooks).await?;

    let deleted = service
        .soft_delete_one_by_id_and_version(id_of(&gone), 0, None, &hooks)
        .await?;
    assert_eq!(version_of(&deleted), 1);
    assert_eq!(deleted.get_bool("isSoftDeleted")?, true);

    let visible = service.read(doc! {}, ReadOptions::default(), None, &hooks).await?;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].get("_id"), Some(&id_of(&keep)));
    assert_eq!(service.count(doc! {}, None, &hooks).await?, 1);

    // An explicit isSoftDeleted constraint wins over the injected one
    let trashed = service
        .read(doc! { "isSoftDeleted": true }, ReadOptions::default(), None, &hooks)
        .await?;
    assert_eq!(trashed.len(), 1);

    let err = service.read_one_by_id(id_of(&gone), None, &hooks).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));

    let again = service
        .soft_delete_one_by_id_and_version(id_of(&gone), 1, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(again, ServiceError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn soft_delete_matches_an_update_of_the_flag() -> Result<()> {
    let (_store, service) = common::lifecycle(LifecyclePolicy::crud()).await?;
    let hooks = Hooks::new();

    let a = service.create_one(doc! { "name": "a" }, None, &hooks).await?;
    let b = service.create_one(doc! { "name": "b" }, None, &hooks).await?;

    let soft = service.soft_delete_one_by_id_and_version(id_of(&a), 0, None, &hooks).await?;
    let flagged = service
        .update_one_by_id_and_version(id_of(&b), 0, doc! { "isSoftDeleted": true }, None, &hooks)
        .await?;

    assert_eq!(version_of(&soft), version_of(&flagged));
    assert_eq!(soft.get_bool("isSoftDeleted")?, flagged.get_bool("isSoftDeleted")?);
    Ok(())
}

#[tokio::test]
async fn writes_require_a_single_match_in_crud_policy() -> Result<()> {
    let (_store, service) = common::lifecycle(LifecyclePolicy::crud()).await?;
    let hooks = Hooks::new();

    service.create_one(doc! { "name": "dup" }, None, &hooks).await?;
    service.create_one(doc! { "name": "dup" }, None, &hooks).await?;

    let err = service
        .update_one(doc! { "name": "dup" }, doc! { "qty": 1 }, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::MoreThanOneFound(_)));

    let err = service.delete_one(doc! { "name": "dup" }, None, &hooks).await.unwrap_err();
    assert!(matches!(err, ServiceError::MoreThanOneFound(_)));

    let err = service
        .update_one(doc! { "name": "missing" }, doc! { "qty": 1 }, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn lenient_policy_returns_none_or_first_match() -> Result<()> {
    let (_store, service) = common::lifecycle(LifecyclePolicy::default()).await?;
    let hooks = Hooks::new();

    service.create_one(doc! { "name": "dup" }, None, &hooks).await?;
    service.create_one(doc! { "name": "dup" }, None, &hooks).await?;

    let missing = service
        .update_one(doc! { "name": "missing" }, doc! { "qty": 1 }, None, &hooks)
        .await?;
    assert!(missing.is_none());
    assert!(service.read_one(doc! { "name": "missing" }, ReadOptions::default(), None, &hooks).await?.is_none());

    let updated = service
        .update_one(doc! { "name": "dup" }, doc! { "qty": "3" }, None, &hooks)
        .await?
        .expect("one document updated");
    assert_eq!(updated.get_i32("qty")?, 3);

    let all = service.read(doc! { "name": "dup" }, ReadOptions::default(), None, &hooks).await?;
    let bumped = all.iter().filter(|d| version_of(d) == 1).count();
    assert_eq!(bumped, 1);
    Ok(())
}

#[tokio::test]
async fn replace_keeps_identity_and_creation_time() -> Result<()> {
    let (_store, service) = common::lifecycle(LifecyclePolicy::crud()).await?;
    let hooks = Hooks::new();

    let created = service
        .create_one(doc! { "name": "a", "price": 2.0, "sku": "S1" }, None, &hooks)
        .await?;
    let replaced = service
        .replace_one_by_id_and_version(id_of(&created), 0, doc! { "name": "c" }, None, &hooks)
        .await?;

    assert_eq!(replaced.get("_id"), created.get("_id"));
    assert_eq!(version_of(&replaced), 1);
    assert_eq!(replaced.get_str("name")?, "c");
    assert!(replaced.get("price").is_none());
    assert!(replaced.get("sku").is_none());
    assert_eq!(replaced.get_bool("isSoftDeleted")?, false);
    assert_eq!(replaced.get_datetime("createdAt")?, created.get_datetime("createdAt")?);

    let err = service
        .replace_one_by_id_and_version(id_of(&created), 1, doc! { "_id": id_of(&created) }, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidArgument(_)));
    Ok(())
}

#[tokio::test]
async fn delete_checks_the_version_before_removing() -> Result<()> {
    let (store, service) = common::lifecycle(LifecyclePolicy::crud()).await?;
    let hooks = Hooks::new();
    let ns = service.schema().namespace().clone();

    let created = service.create_one(doc! { "name": "a" }, None, &hooks).await?;

    let err = service
        .delete_one_by_id_and_version(id_of(&created), 3, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::VersionConflict(VersionConflict::Behind { .. })));
    assert_eq!(store.documents(&ns).await.len(), 1);

    let removed = service
        .delete_one_by_id_and_version(id_of(&created), 0, None, &hooks)
        .await?;
    assert_eq!(removed.get_str("name")?, "a");
    assert!(store.documents(&ns).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn concurrent_writer_is_reported_as_a_conflict() -> Result<()> {
    let (store, service) = common::lifecycle(LifecyclePolicy::crud()).await?;
    let created = service.create_one(doc! { "name": "a" }, None, &Hooks::new()).await?;
    let ns = service.schema().namespace().clone();

    // Another writer bumps the version between our read and our write
    let intruder = Arc::clone(&store);
    let hooks = Hooks::new().on_before_persist(move |ctx| {
        let store = Arc::clone(&intruder);
        async move {
            if ctx.operation == LifecycleOperation::Update {
                let id = ctx.query.as_ref().and_then(|q| q.get("_id").cloned()).unwrap_or(Bson::Null);
                store
                    .update_one(&ctx.namespace, doc! { "_id": id }, doc! { "$inc": { "version": 1_i64 } }, None)
                    .await?;
            }
            Ok::<(), ServiceError>(())
        }
    });

    let err = service
        .update_one_by_id_and_version(id_of(&created), 0, doc! { "name": "mine" }, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::VersionConflict(VersionConflict::Modified {
            document_version: 1,
            supplied_version: 0
        })
    ));

    let stored = store.documents(&ns).await;
    assert_eq!(stored[0].get_str("name")?, "a");
    assert_eq!(version_of(&stored[0]), 1);
    Ok(())
}

#[tokio::test]
async fn hooks_rewrite_queries_candidates_and_results() -> Result<()> {
    let (_store, service) = common::lifecycle(LifecyclePolicy::crud()).await?;

    let hooks = Hooks::new()
        .on_candidate_built(|_, mut candidate| async move {
            if let Ok(name) = candidate.get_str("name") {
                let upper = name.to_uppercase();
                candidate.insert("name", upper);
            }
            Ok(candidate)
        })
        .on_after_persist(|_, mut documents| async move {
            for document in &mut documents {
                document.remove("price");
            }
            Ok(documents)
        });

    let created = service.create_one(doc! { "name": "a", "price": 1.0 }, None, &hooks).await?;
    assert_eq!(created.get_str("name")?, "A");
    assert!(created.get("price").is_none());

    service.create_one(doc! { "name": "b", "qty": 0 }, None, &Hooks::new()).await?;

    let only_stocked = Hooks::new().on_query_built(|_, mut query| async move {
        query.insert("qty", doc! { "$gt": 0 });
        Ok(query)
    });
    let found = service.read(doc! {}, ReadOptions::default(), None, &only_stocked).await?;
    assert!(found.is_empty());
    Ok(())
}

#[tokio::test]
async fn reads_accept_query_wrappers_and_coerce_operands() -> Result<()> {
    let (_store, service) = common::lifecycle(LifecyclePolicy::crud()).await?;
    let hooks = Hooks::new();
    for price in [1.0, 3.0, 2.0] {
        service.create_one(doc! { "name": "p", "price": price }, None, &hooks).await?;
    }

    let found = service
        .read(
            doc! { "$query": { "price": { "$gt": "1" } }, "$orderby": { "price": -1 } },
            ReadOptions::default(),
            None,
            &hooks,
        )
        .await?;
    let prices: Vec<f64> = found.iter().map(|d| d.get_f64("price").unwrap()).collect();
    assert_eq!(prices, vec![3.0, 2.0]);

    let aggregated = service
        .aggregate(vec![doc! { "$sort": { "price": 1 } }, doc! { "$limit": 2 }], None, &hooks)
        .await?;
    assert_eq!(aggregated.len(), 2);
    assert_eq!(aggregated[0].get_f64("price")?, 1.0);
    Ok(())
}

#[tokio::test]
async fn aggregate_skips_soft_deleted_documents() -> Result<()> {
    let (_store, service) = common::lifecycle(LifecyclePolicy::crud()).await?;
    let hooks = Hooks::new();
    let a = service.create_one(doc! { "name": "a" }, None, &hooks).await?;
    service.create_one(doc! { "name": "b" }, None, &hooks).await?;
    service.soft_delete_one_by_id_and_version(id_of(&a), 0, None, &hooks).await?;

    let out = service.aggregate(vec![], None, &hooks).await?;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get_str("name")?, "b");
    Ok(())
}

#[tokio::test]
async fn candidates_are_coerced_against_the_schema() -> Result<()> {
    let (_store, service) = common::lifecycle(LifecyclePolicy::crud()).await?;
    let hooks = Hooks::new();

    let err = service
        .create_one(doc! { "name": "a", "extra": "x" }, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Field(FieldError::UnknownField { ref path }) if path == "extra"));

    let err = service
        .create_one(doc! { "qty": "many" }, None, &hooks)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Field(ref e) if e.path() == "qty"));

    let created = service
        .create_one(doc! { "tags": ["x", "y"], "address": { "city": "Paris" }, "title": { "fr": "Bonjour" } }, None, &hooks)
        .await?;
    assert_eq!(created.get_document("address")?.get_str("city")?, "Paris");
    Ok(())
}

#[tokio::test]
async fn schema_options_control_timestamps_and_validators() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let options = SchemaOptions {
        enforce: false,
        timestamps: false,
    };
    let schema = common::product_schema(&store, options).await?;
    assert!(store.validator(schema.namespace()).await.is_none());

    let service = LifecycleService::new(
        Arc::clone(&schema),
        Arc::clone(&store),
        TransactionOptions::default(),
        LifecyclePolicy::crud(),
    );
    let created = service.create_one(doc! { "name": "a" }, None, &Hooks::new()).await?;
    assert!(created.get("createdAt").is_none());
    assert!(created.get("updatedAt").is_none());

    let enforced = common::product_schema(&store, SchemaOptions::default()).await?;
    assert_eq!(store.validator(enforced.namespace()).await.as_ref(), Some(enforced.validator()));
    Ok(())
}
