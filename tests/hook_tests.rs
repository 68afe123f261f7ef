mod common;

use async_trait::async_trait;
use common::{bookkeeping, parent_child_db, parent_with_children};
use softdelete::prelude::*;
use softdelete::transaction::Transaction;
use std::sync::{Arc, Mutex};

type Log = Arc<Mutex<Vec<(HookPoint, String)>>>;

fn recorder(log: &Log) -> Arc<dyn DeletionHook> {
    let log = log.clone();
    Arc::new(FnHook(move |point: HookPoint, entity: &Entity| {
        log.lock().unwrap().push((point, entity.entity_ref().to_string()));
        Ok(())
    }))
}

fn points(log: &Log) -> Vec<HookPoint> {
    log.lock().unwrap().iter().map(|(point, _)| *point).collect()
}

#[tokio::test]
async fn test_soft_delete_hook_order() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let log = Log::default();
    db.subscribe_model("Parent", recorder(&log)).await;

    let parent = parent_with_children(&db, "p", 2).await?;
    parent.delete(&db).await?;
    assert_eq!(
        points(&log),
        vec![
            HookPoint::PreDelete,
            HookPoint::PreSoftDelete,
            HookPoint::PostDelete,
            HookPoint::PostSoftDelete,
        ]
    );

    log.lock().unwrap().clear();
    parent.undelete(&db).await?;
    assert_eq!(points(&log), vec![HookPoint::PreUndelete, HookPoint::PostUndelete]);

    log.lock().unwrap().clear();
    parent.delete(&db).await?;
    parent.delete(&db).await?;
    assert_eq!(
        points(&log)[4..],
        [HookPoint::PreDelete, HookPoint::PostDelete]
    );
    Ok(())
}

#[tokio::test]
async fn test_hooks_see_cascaded_entities() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let log = Log::default();
    db.subscribe(recorder(&log)).await;

    let parent = parent_with_children(&db, "p", 3).await?;
    parent.delete(&db).await?;

    let soft_deleted: Vec<String> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|(point, _)| *point == HookPoint::PostSoftDelete)
        .map(|(_, entity)| entity.clone())
        .collect();
    assert_eq!(soft_deleted.len(), 4);
    assert_eq!(soft_deleted[0], format!("Parent#{}", parent.id()));
    Ok(())
}

struct FailOnChild;

#[async_trait]
impl DeletionHook for FailOnChild {
    async fn on_event(&self, point: HookPoint, entity: &Entity, _tx: &mut Transaction) -> Result<()> {
        if point == HookPoint::PostSoftDelete && entity.model() == "Child" {
            return Err(DbError::ConstraintViolation("children are protected".into()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_hook_error_rolls_back() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let parent = parent_with_children(&db, "p", 2).await?;
    db.subscribe(Arc::new(FailOnChild)).await;

    let result = parent.delete(&db).await;
    assert!(matches!(result, Err(DbError::ConstraintViolation(_))));

    assert!(!db.get("Parent", parent.id()).await?.is_deleted());
    assert_eq!(db.objects("Child").count().await?, 2);
    assert_eq!(bookkeeping(&db).await?, (0, 0));
    Ok(())
}

struct AuditTrail;

#[async_trait]
impl DeletionHook for AuditTrail {
    async fn on_event(&self, point: HookPoint, entity: &Entity, tx: &mut Transaction) -> Result<()> {
        if point == HookPoint::PostSoftDelete {
            tx.insert(
                "audit",
                vec![Value::Null, Value::from(entity.entity_ref().to_string())],
            )?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_hook_writes_join_the_transaction() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    db.create_table(TableSchema::new("audit", vec![Column::new("entity", DataType::Text)]))
        .await?;
    db.subscribe(Arc::new(AuditTrail)).await;

    parent_with_children(&db, "p", 1).await?.delete(&db).await?;
    assert_eq!(db.objects("audit").count().await?, 2);
    Ok(())
}
