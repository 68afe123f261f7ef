mod common;

use common::{
    bookkeeping, flag_deleted_without_bookkeeping, parent_child_db, parent_child_db_with,
    parent_with_children,
};
use softdelete::prelude::*;

#[tokio::test]
async fn test_simple_delete_and_undelete() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let parent = parent_with_children(&db, "alone", 0).await?;

    let outcome = parent.delete(&db).await?;
    assert!(matches!(outcome, DeleteOutcome::SoftDeleted { .. }));
    assert_eq!(bookkeeping(&db).await?, (1, 1));
    assert_eq!(db.objects("Parent").count().await?, 0);
    assert_eq!(db.objects("Parent").all_with_deleted().count().await?, 1);

    let mut parent = db.get("Parent", parent.id()).await?;
    assert!(parent.is_deleted());
    assert_eq!(parent.undelete(&db).await?, 1);
    parent.refresh(&db).await?;
    assert!(!parent.is_deleted());
    assert_eq!(bookkeeping(&db).await?, (0, 0));
    Ok(())
}

#[tokio::test]
async fn test_delete_with_ten_children() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let parent = parent_with_children(&db, "big", 10).await?;

    parent.delete(&db).await?;
    assert_eq!(bookkeeping(&db).await?, (1, 11));
    assert_eq!(db.objects("Child").count().await?, 0);
    assert_eq!(db.objects("Child").deleted_only().count().await?, 10);

    assert_eq!(parent.undelete(&db).await?, 11);
    assert_eq!(bookkeeping(&db).await?, (0, 0));
    assert_eq!(db.objects("Child").count().await?, 10);
    Ok(())
}

#[tokio::test]
async fn test_undelete_through_child_restores_root() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let parent = parent_with_children(&db, "family", 3).await?;
    parent.delete(&db).await?;

    let child = db.objects("Child").deleted_only().first().await?.unwrap();
    assert_eq!(child.undelete(&db).await?, 4);
    assert!(!db.get("Parent", parent.id()).await?.is_deleted());
    Ok(())
}

#[tokio::test]
async fn test_second_delete_is_physical() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let parent = parent_with_children(&db, "twice", 0).await?;

    parent.delete(&db).await?;
    let outcome = parent.delete(&db).await?;
    assert_eq!(outcome, DeleteOutcome::HardDeleted);
    assert_eq!(bookkeeping(&db).await?, (0, 0));
    assert!(matches!(db.get("Parent", parent.id()).await, Err(DbError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_second_delete_of_root_purges_children_bookkeeping() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let parent = parent_with_children(&db, "gone", 4).await?;

    parent.delete(&db).await?;
    assert_eq!(bookkeeping(&db).await?, (1, 5));

    parent.delete(&db).await?;
    assert_eq!(db.objects("Child").all_with_deleted().count().await?, 0);
    assert_eq!(bookkeeping(&db).await?, (0, 0));
    Ok(())
}

#[tokio::test]
async fn test_confirming_delete_keeps_other_records() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let parent = parent_with_children(&db, "partial", 2).await?;
    parent.delete(&db).await?;

    let child = db.objects("Child").deleted_only().first().await?.unwrap();
    assert_eq!(child.delete(&db).await?, DeleteOutcome::HardDeleted);
    assert_eq!(bookkeeping(&db).await?, (1, 2));

    assert_eq!(parent.undelete(&db).await?, 2);
    assert_eq!(db.objects("Child").count().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_soft_policy_does_not_cascade() -> Result<()> {
    let parent_model = ModelDef::soft("Parent", "parent").with_policy(DeletionPolicy::Soft);
    let db = parent_child_db_with(SoftDeleteConfig::default(), parent_model).await?;
    let parent = parent_with_children(&db, "solo", 3).await?;

    parent.delete(&db).await?;
    assert_eq!(bookkeeping(&db).await?, (1, 1));
    assert_eq!(db.objects("Child").count().await?, 3);
    Ok(())
}

#[tokio::test]
async fn test_relation_do_nothing() -> Result<()> {
    let parent_model = ModelDef::soft("Parent", "parent")
        .with_relation_policy("children", DeletionPolicy::HardPassthrough);
    let db = parent_child_db_with(SoftDeleteConfig::default(), parent_model).await?;
    let parent = parent_with_children(&db, "keep", 3).await?;

    parent.delete(&db).await?;
    let children = db.objects("Child").all().await?;
    assert_eq!(children.len(), 3);
    for child in children {
        assert_eq!(child.get("parent_id"), Some(&Value::Integer(parent.id())));
    }
    assert_eq!(bookkeeping(&db).await?, (1, 1));
    Ok(())
}

#[tokio::test]
async fn test_relation_set_null() -> Result<()> {
    let parent_model =
        ModelDef::soft("Parent", "parent").with_relation_policy("children", DeletionPolicy::SetNull);
    let db = parent_child_db_with(SoftDeleteConfig::default(), parent_model).await?;
    let parent = parent_with_children(&db, "orphans", 2).await?;

    parent.delete(&db).await?;
    let children = db.objects("Child").all().await?;
    assert_eq!(children.len(), 2);
    for child in &children {
        assert_eq!(child.get("parent_id"), Some(&Value::Null));
        assert!(!child.is_deleted());
    }
    assert_eq!(bookkeeping(&db).await?, (1, 1));
    Ok(())
}

#[tokio::test]
async fn test_forced_policy_overrides_model() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let parent = parent_with_children(&db, "forced", 2).await?;

    let outcome = db
        .delete(&parent, DeleteOptions::new().force_policy(DeletionPolicy::HardPassthrough))
        .await?;
    assert_eq!(outcome, DeleteOutcome::HardDeleted);
    assert_eq!(db.objects("Parent").all_with_deleted().count().await?, 0);
    // storage cascade removes the children with their parent
    assert_eq!(db.objects("Child").all_with_deleted().count().await?, 0);
    assert_eq!(bookkeeping(&db).await?, (0, 0));
    Ok(())
}

#[tokio::test]
async fn test_one_to_one_plain_model_is_removed() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    db.create_table(
        TableSchema::new(
            "profile",
            vec![
                Column::new("bio", DataType::Text),
                Column::new("parent_id", DataType::Integer).unique(),
            ],
        )
        .with_foreign_key(ForeignKey::new("parent_id", "parent").related_name("profile")),
    )
    .await?;
    db.register_model(ModelDef::plain("Profile", "profile")).await?;

    let parent = parent_with_children(&db, "with-profile", 1).await?;
    db.create(
        "Profile",
        &[("bio", Value::from("hi")), ("parent_id", Value::Integer(parent.id()))],
    )
    .await?;

    parent.delete(&db).await?;
    assert_eq!(db.objects("Profile").count().await?, 0);
    assert_eq!(bookkeeping(&db).await?, (1, 2));

    // the profile is gone for good; the rest comes back
    assert_eq!(parent.undelete(&db).await?, 2);
    assert_eq!(db.objects("Profile").count().await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_many_to_many_leaves_far_side() -> Result<()> {
    let db = SoftDeleteDb::open(SoftDeleteConfig::default()).await?;
    db.create_table(TableSchema::new("pizza", vec![Column::new("name", DataType::Text)]).soft_deletable())
        .await?;
    db.create_table(TableSchema::new("topping", vec![Column::new("name", DataType::Text)]).soft_deletable())
        .await?;
    db.create_table(
        TableSchema::new(
            "pizza_topping",
            vec![
                Column::new("pizza_id", DataType::Integer).not_null(),
                Column::new("topping_id", DataType::Integer).not_null(),
            ],
        )
        .soft_deletable()
        .with_foreign_key(ForeignKey::new("pizza_id", "pizza").related_name("toppings"))
        .with_foreign_key(ForeignKey::new("topping_id", "topping").related_name("pizzas")),
    )
    .await?;
    db.register_model(ModelDef::soft("Pizza", "pizza")).await?;
    db.register_model(ModelDef::soft("Topping", "topping")).await?;
    db.register_model(ModelDef::soft("PizzaTopping", "pizza_topping")).await?;

    let pizza = db.create("Pizza", &[("name", Value::from("margherita"))]).await?;
    for name in ["cheese", "basil"] {
        let topping = db.create("Topping", &[("name", Value::from(name))]).await?;
        db.create(
            "PizzaTopping",
            &[
                ("pizza_id", Value::Integer(pizza.id())),
                ("topping_id", Value::Integer(topping.id())),
            ],
        )
        .await?;
    }

    pizza.delete(&db).await?;
    assert_eq!(db.objects("PizzaTopping").count().await?, 0);
    assert_eq!(db.objects("Topping").count().await?, 2);
    assert_eq!(bookkeeping(&db).await?, (1, 3));

    pizza.undelete(&db).await?;
    assert_eq!(db.objects("PizzaTopping").count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_plain_model_is_physically_deleted() -> Result<()> {
    let db = SoftDeleteDb::open(SoftDeleteConfig::default()).await?;
    db.create_table(TableSchema::new("note", vec![Column::new("body", DataType::Text)]))
        .await?;

    // unregistered tables behave as plain models named after the table
    let note = db.create("note", &[("body", Value::from("x"))]).await?;
    assert_eq!(note.delete(&db).await?, DeleteOutcome::HardDeleted);
    assert_eq!(db.objects("note").count().await?, 0);
    assert_eq!(bookkeeping(&db).await?, (0, 0));
    Ok(())
}

#[tokio::test]
async fn test_shared_changeset() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let first = parent_with_children(&db, "a", 1).await?;
    let second = parent_with_children(&db, "b", 1).await?;

    let DeleteOutcome::SoftDeleted { changeset_id } = first.delete(&db).await? else {
        panic!("expected a soft delete");
    };
    db.delete(&second, DeleteOptions::new().changeset(changeset_id))
        .await?;
    assert_eq!(bookkeeping(&db).await?, (1, 4));

    assert_eq!(db.undelete_changeset(changeset_id).await?, 4);
    assert_eq!(db.objects("Parent").count().await?, 2);
    Ok(())
}

#[tokio::test]
async fn test_pending_transition_replays_delete_and_undelete() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let mut parent = parent_with_children(&db, "flag", 2).await?;

    parent.set_deleted_flag(true).unwrap().commit(&db).await?;
    parent.refresh(&db).await?;
    assert!(parent.is_deleted());
    assert_eq!(bookkeeping(&db).await?, (1, 3));

    assert!(parent.set_deleted_flag(true).is_none());
    parent.set_deleted_flag(false).unwrap().commit(&db).await?;
    parent.refresh(&db).await?;
    assert!(!parent.is_deleted());
    assert_eq!(bookkeeping(&db).await?, (0, 0));
    Ok(())
}

#[tokio::test]
async fn test_save_never_deletes() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let mut parent = parent_with_children(&db, "renamed", 1).await?;
    parent.set("name", "other");
    parent.save(&db).await?;

    assert_eq!(db.get("Parent", parent.id()).await?.get("name"), Some(&Value::from("other")));
    assert_eq!(bookkeeping(&db).await?, (0, 0));
    Ok(())
}

#[tokio::test]
async fn test_save_cannot_change_deleted_at() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let mut parent = parent_with_children(&db, "sneaky", 1).await?;

    parent.set(DELETED_AT, Value::Timestamp(chrono::Utc::now()));
    assert!(matches!(parent.save(&db).await, Err(DbError::ConstraintViolation(_))));
    assert!(!db.get("Parent", parent.id()).await?.is_deleted());
    assert_eq!(bookkeeping(&db).await?, (0, 0));

    parent.delete(&db).await?;
    let mut deleted = db.get("Parent", parent.id()).await?;
    deleted.set("name", "renamed while deleted");
    deleted.save(&db).await?;
    deleted.set(DELETED_AT, Value::Null);
    assert!(matches!(deleted.save(&db).await, Err(DbError::ConstraintViolation(_))));
    assert!(db.get("Parent", parent.id()).await?.is_deleted());
    assert_eq!(bookkeeping(&db).await?, (1, 2));
    Ok(())
}

#[tokio::test]
async fn test_missing_bookkeeping_fallback() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let parent = parent_with_children(&db, "stray", 0).await?;
    flag_deleted_without_bookkeeping(&db, &parent).await?;

    assert_eq!(
        parent.delete(&db).await?,
        DeleteOutcome::HardDeletedWithoutBookkeeping
    );
    assert!(db.get("Parent", parent.id()).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_strict_bookkeeping() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default().strict_bookkeeping(true)).await?;
    let parent = parent_with_children(&db, "stray", 0).await?;
    flag_deleted_without_bookkeeping(&db, &parent).await?;

    let result = parent.delete(&db).await;
    assert!(matches!(result, Err(DbError::InconsistentState(_))));
    // the failed delete rolled back
    assert!(db.get("Parent", parent.id()).await?.is_deleted());
    Ok(())
}

#[tokio::test]
async fn test_undelete_without_bookkeeping_fails() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    let parent = parent_with_children(&db, "fresh", 0).await?;
    assert!(matches!(parent.undelete(&db).await, Err(DbError::NotFound(_))));
    Ok(())
}

async fn thread_db() -> Result<SoftDeleteDb> {
    let db = SoftDeleteDb::open(SoftDeleteConfig::default()).await?;
    db.create_table(TableSchema::new("post", vec![Column::new("title", DataType::Text)]).soft_deletable())
        .await?;
    db.create_table(
        TableSchema::new(
            "comment",
            vec![
                Column::new("body", DataType::Text),
                Column::new("post_id", DataType::Integer),
                Column::new("reply_to", DataType::Integer),
            ],
        )
        .soft_deletable()
        .with_foreign_key(ForeignKey::new("post_id", "post").related_name("comments"))
        .with_foreign_key(ForeignKey::new("reply_to", "comment").related_name("replies")),
    )
    .await?;
    db.register_model(ModelDef::soft("Post", "post")).await?;
    db.register_model(ModelDef::soft("Comment", "comment")).await?;
    Ok(db)
}

#[tokio::test]
async fn test_member_reached_twice_stays_recoverable() -> Result<()> {
    let db = thread_db().await?;
    let post = db.create("Post", &[("title", Value::from("thread"))]).await?;
    let first = db
        .create(
            "Comment",
            &[("body", Value::from("first")), ("post_id", Value::Integer(post.id()))],
        )
        .await?;
    let reply = db
        .create(
            "Comment",
            &[
                ("body", Value::from("reply")),
                ("post_id", Value::Integer(post.id())),
                ("reply_to", Value::Integer(first.id())),
            ],
        )
        .await?;

    // the reply is reached through the post and through the first comment
    post.delete(&db).await?;
    assert_eq!(bookkeeping(&db).await?, (1, 3));
    assert_eq!(db.objects("Comment").all_with_deleted().count().await?, 2);
    assert_eq!(db.objects("Comment").deleted_only().count().await?, 2);

    assert_eq!(post.undelete(&db).await?, 3);
    assert!(!db.get("Comment", reply.id()).await?.is_deleted());
    assert_eq!(db.objects("Comment").count().await?, 2);
    assert_eq!(bookkeeping(&db).await?, (0, 0));
    Ok(())
}

#[tokio::test]
async fn test_batch_delete_over_overlapping_members() -> Result<()> {
    let db = thread_db().await?;
    let post = db.create("Post", &[("title", Value::from("thread"))]).await?;
    let first = db
        .create(
            "Comment",
            &[("body", Value::from("first")), ("post_id", Value::Integer(post.id()))],
        )
        .await?;
    db.create(
        "Comment",
        &[
            ("body", Value::from("reply")),
            ("post_id", Value::Integer(post.id())),
            ("reply_to", Value::Integer(first.id())),
        ],
    )
    .await?;

    let outcomes = db.objects("Comment").delete(None).await?;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|outcome| matches!(outcome, DeleteOutcome::SoftDeleted { .. })));
    assert_eq!(bookkeeping(&db).await?, (1, 2));
    assert_eq!(db.objects("Comment").deleted_only().count().await?, 2);
    Ok(())
}

fn passport_table() -> TableSchema {
    TableSchema::new(
        "passport",
        vec![
            Column::new("number", DataType::Text),
            Column::new("parent_id", DataType::Integer).unique(),
        ],
    )
    .soft_deletable()
    .with_foreign_key(ForeignKey::new("parent_id", "parent").related_name("passport"))
}

#[tokio::test]
async fn test_one_to_one_soft_child_joins_changeset() -> Result<()> {
    let db = parent_child_db(SoftDeleteConfig::default()).await?;
    db.create_table(passport_table()).await?;
    db.register_model(ModelDef::soft("Passport", "passport")).await?;

    let parent = parent_with_children(&db, "traveller", 1).await?;
    let passport = db
        .create(
            "Passport",
            &[("number", Value::from("X1")), ("parent_id", Value::Integer(parent.id()))],
        )
        .await?;

    let DeleteOutcome::SoftDeleted { changeset_id } = parent.delete(&db).await? else {
        panic!("expected a soft delete");
    };
    assert!(db.get("Passport", passport.id()).await?.is_deleted());
    assert_eq!(bookkeeping(&db).await?, (1, 3));
    let detail = db.changeset(changeset_id).await?;
    assert!(detail
        .records
        .iter()
        .any(|record| record.entity == passport.entity_ref()));

    assert_eq!(parent.undelete(&db).await?, 3);
    assert!(!db.get("Passport", passport.id()).await?.is_deleted());
    Ok(())
}

#[tokio::test]
async fn test_one_to_one_set_null() -> Result<()> {
    let db = SoftDeleteDb::open(SoftDeleteConfig::default()).await?;
    db.create_table(TableSchema::new("parent", vec![Column::new("name", DataType::Text)]).soft_deletable())
        .await?;
    db.create_table(passport_table()).await?;
    db.register_model(
        ModelDef::soft("Parent", "parent").with_relation_policy("passport", DeletionPolicy::SetNull),
    )
    .await?;
    db.register_model(ModelDef::soft("Passport", "passport")).await?;

    let parent = db.create("Parent", &[("name", Value::from("holder"))]).await?;
    let passport = db
        .create(
            "Passport",
            &[("number", Value::from("Y2")), ("parent_id", Value::Integer(parent.id()))],
        )
        .await?;

    parent.delete(&db).await?;
    let passport = db.get("Passport", passport.id()).await?;
    assert_eq!(passport.get("parent_id"), Some(&Value::Null));
    assert!(!passport.is_deleted());
    assert_eq!(bookkeeping(&db).await?, (1, 1));
    Ok(())
}
