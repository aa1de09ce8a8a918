// Rating Hooks - Before/After lifecycle hooks for fields, collections and ratings
// A hook returning Err vetoes the mutation; the surrounding transaction rolls back

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::UserId;
use crate::error::{AppError, AppResult};

/// What a hook is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookTarget {
    Field,
    Collection,
    Rating,
}

/// Types of operations that can trigger hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookOperation {
    Create,
    Update,
    Delete,
    Activate,
    Pending,
    Disable,
    StatusChange,
}

/// Hook execution timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookTiming {
    Before,
    After,
}

/// Hook context containing mutation information
#[derive(Debug, Clone)]
pub struct HookContext {
    pub target: HookTarget,
    pub operation: HookOperation,
    pub timing: HookTiming,
    pub entity_id: Option<i64>,
    pub handle: Option<String>,
    pub user_id: Option<UserId>,
    pub data: Option<Value>,
    pub metadata: HashMap<String, Value>,
}

impl HookContext {
    pub fn new(target: HookTarget, operation: HookOperation) -> Self {
        Self {
            target,
            operation,
            timing: HookTiming::Before,
            entity_id: None,
            handle: None,
            user_id: None,
            data: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_entity_id(mut self, id: impl Into<i64>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_user(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach `payload` as the hook data, failing when it cannot be serialized.
    pub fn with_payload<T: Serialize>(self, payload: &T) -> AppResult<Self> {
        let data = serde_json::to_value(payload)
            .map_err(|e| AppError::Internal(format!("Failed to serialize hook payload: {}", e)))?;
        Ok(self.with_data(data))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Trait for implementing rating lifecycle hooks
#[async_trait]
pub trait RatingHook: Send + Sync {
    /// Execute the hook logic; an `Err` vetoes the mutation
    async fn execute(&self, ctx: &HookContext) -> AppResult<()>;

    /// Get hook name for debugging
    fn name(&self) -> &str;

    /// Get supported operations
    fn operations(&self) -> Vec<HookOperation>;

    /// Get hook timing
    fn timing(&self) -> HookTiming;
}

/// Hook registry keyed by target
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<HookTarget, Vec<Arc<dyn RatingHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook for a target
    pub fn register_hook(&mut self, target: HookTarget, hook: Arc<dyn RatingHook>) {
        self.hooks.entry(target).or_default().push(hook);
    }

    pub fn hook_count(&self, target: HookTarget) -> usize {
        self.hooks.get(&target).map(Vec::len).unwrap_or(0)
    }

    /// Run every hook registered for the context's target, operation and timing.
    /// The first failure stops the chain and is reported as a veto.
    pub async fn run(&self, ctx: &HookContext) -> AppResult<()> {
        let Some(hooks) = self.hooks.get(&ctx.target) else {
            return Ok(());
        };
        for hook in hooks {
            if hook.timing() != ctx.timing || !hook.operations().contains(&ctx.operation) {
                continue;
            }
            debug!(hook = hook.name(), target = ?ctx.target, operation = ?ctx.operation, timing = ?ctx.timing, "running hook");
            hook.execute(ctx).await.map_err(|e| AppError::Vetoed {
                hook: hook.name().to_string(),
                reason: match e {
                    AppError::Vetoed { reason, .. } => reason,
                    other => other.to_string(),
                },
            })?;
        }
        Ok(())
    }

    pub async fn before(&self, ctx: &mut HookContext) -> AppResult<()> {
        ctx.timing = HookTiming::Before;
        self.run(ctx).await
    }

    pub async fn after(&self, ctx: &mut HookContext) -> AppResult<()> {
        ctx.timing = HookTiming::After;
        self.run(ctx).await
    }
}

/// Audit log hook - logs every completed mutation
pub struct AuditLogHook;

#[async_trait]
impl RatingHook for AuditLogHook {
    async fn execute(&self, ctx: &HookContext) -> AppResult<()> {
        info!(
            target_kind = ?ctx.target,
            operation = ?ctx.operation,
            entity_id = ?ctx.entity_id,
            handle = ?ctx.handle,
            user_id = ?ctx.user_id.map(|id| id.value()),
            "audit"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "audit_log_hook"
    }

    fn operations(&self) -> Vec<HookOperation> {
        vec![
            HookOperation::Create,
            HookOperation::Update,
            HookOperation::Delete,
            HookOperation::Activate,
            HookOperation::Pending,
            HookOperation::Disable,
            HookOperation::StatusChange,
        ]
    }

    fn timing(&self) -> HookTiming {
        HookTiming::After
    }
}

/// Create default hook registry with the audit hook on every target
pub fn create_default_hook_registry() -> HookRegistry {
    let mut registry = HookRegistry::new();
    let audit: Arc<dyn RatingHook> = Arc::new(AuditLogHook);
    for target in [HookTarget::Field, HookTarget::Collection, HookTarget::Rating] {
        registry.register_hook(target, audit.clone());
    }
    registry
}
