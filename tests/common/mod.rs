#![allow(dead_code)]

use softdelete::prelude::*;

/// `parent` (soft) with `child.parent_id -> parent` exposed as `children`.
pub async fn parent_child_db(config: SoftDeleteConfig) -> Result<SoftDeleteDb> {
    parent_child_db_with(config, ModelDef::soft("Parent", "parent")).await
}

pub async fn parent_child_db_with(config: SoftDeleteConfig, parent: ModelDef) -> Result<SoftDeleteDb> {
    let db = SoftDeleteDb::open(config).await?;
    db.create_table(
        TableSchema::new("parent", vec![Column::new("name", DataType::Text)]).soft_deletable(),
    )
    .await?;
    db.create_table(
        TableSchema::new(
            "child",
            vec![
                Column::new("name", DataType::Text),
                Column::new("parent_id", DataType::Integer),
            ],
        )
        .soft_deletable()
        .with_foreign_key(ForeignKey::new("parent_id", "parent").related_name("children")),
    )
    .await?;
    db.register_model(parent).await?;
    db.register_model(ModelDef::soft("Child", "child")).await?;
    Ok(db)
}

pub async fn parent_with_children(db: &SoftDeleteDb, name: &str, children: usize) -> Result<Entity> {
    let parent = db.create("Parent", &[("name", Value::from(name))]).await?;
    for i in 0..children {
        db.create(
            "Child",
            &[
                ("name", Value::from(format!("{}-{}", name, i))),
                ("parent_id", Value::Integer(parent.id())),
            ],
        )
        .await?;
    }
    Ok(parent)
}

pub async fn bookkeeping(db: &SoftDeleteDb) -> Result<(usize, usize)> {
    Ok((db.count_changesets().await?, db.count_records().await?))
}

/// Flags a parent deleted with a raw row write, leaving no bookkeeping.
pub async fn flag_deleted_without_bookkeeping(db: &SoftDeleteDb, parent: &Entity) -> Result<()> {
    let mut session = db.begin().await;
    let row = vec![
        Value::Integer(parent.id()),
        parent.get("name").cloned().unwrap_or(Value::Null),
        Value::Timestamp(chrono::Utc::now()),
    ];
    session.transaction().update("parent", parent.id(), row)?;
    session.commit()
}
