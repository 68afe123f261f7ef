//! Observers notified around deletes and undeletes.
//!
//! A hook runs inside the operation's transaction; returning an error aborts
//! the operation and rolls every write back.

use crate::core::Result;
use crate::entity::Entity;
use crate::transaction::Transaction;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    PreDelete,
    PostDelete,
    PreSoftDelete,
    PostSoftDelete,
    PreUndelete,
    PostUndelete,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookPoint::PreDelete => "pre_delete",
            HookPoint::PostDelete => "post_delete",
            HookPoint::PreSoftDelete => "pre_soft_delete",
            HookPoint::PostSoftDelete => "post_soft_delete",
            HookPoint::PreUndelete => "pre_undelete",
            HookPoint::PostUndelete => "post_undelete",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait DeletionHook: Send + Sync {
    async fn on_event(&self, point: HookPoint, entity: &Entity, tx: &mut Transaction) -> Result<()>;
}

struct Subscription {
    /// Only entities of this model; every model when None
    model: Option<String>,
    hook: Arc<dyn DeletionHook>,
}

/// Registered hooks, called in registration order.
#[derive(Default, Clone)]
pub struct HookRegistry {
    subscriptions: Vec<Arc<Subscription>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, hook: Arc<dyn DeletionHook>) {
        self.subscriptions.push(Arc::new(Subscription { model: None, hook }));
    }

    pub fn subscribe_model(&mut self, model: impl Into<String>, hook: Arc<dyn DeletionHook>) {
        self.subscriptions.push(Arc::new(Subscription {
            model: Some(model.into()),
            hook,
        }));
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub async fn dispatch(&self, point: HookPoint, entity: &Entity, tx: &mut Transaction) -> Result<()> {
        for subscription in &self.subscriptions {
            if subscription
                .model
                .as_deref()
                .is_some_and(|model| model != entity.model())
            {
                continue;
            }
            subscription.hook.on_event(point, entity, tx).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

/// Adapts a synchronous callback that does not need the transaction.
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> DeletionHook for FnHook<F>
where
    F: Fn(HookPoint, &Entity) -> Result<()> + Send + Sync,
{
    async fn on_event(&self, point: HookPoint, entity: &Entity, _tx: &mut Transaction) -> Result<()> {
        (self.0)(point, entity)
    }
}
