#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;

use rating_engine::collections::{Collection, CollectionDefinition, CollectionFieldSpec};
use rating_engine::core::ElementId;
use rating_engine::fields::{Field, FieldDefinition};
use rating_engine::infrastructure::hooks::{HookContext, HookOperation, HookTarget, HookTiming, RatingHook};
use rating_engine::infrastructure::{Element, InMemoryElementStore, InMemoryLayoutService, InMemoryUserStore, User};
use rating_engine::ratings::Rating;
use rating_engine::{AppError, AppResult, Config, EngineBuilder, RatingEngine};

pub struct TestEngine {
    pub engine: RatingEngine,
    pub elements: Arc<InMemoryElementStore>,
    pub users: Arc<InMemoryUserStore>,
    pub layouts: Arc<InMemoryLayoutService>,
}

pub async fn engine() -> TestEngine {
    engine_with(Config::default(), |builder| builder).await
}

pub async fn engine_with_hook(target: HookTarget, hook: Arc<dyn RatingHook>) -> TestEngine {
    engine_with(Config::default(), |builder| builder.with_hook(target, hook)).await
}

/// Engine over `config` with three blog entries, one photo asset and two users.
pub async fn engine_with(config: Config, customize: impl FnOnce(EngineBuilder) -> EngineBuilder) -> TestEngine {
    let elements = Arc::new(InMemoryElementStore::new(["entry", "asset"]));
    elements.insert(Element::new(1, "entry", "First post").with_uri("blog/first")).await;
    elements.insert(Element::new(2, "entry", "Second post").with_uri("blog/second")).await;
    elements.insert(Element::new(3, "entry", "Third post").with_uri("blog/third")).await;
    elements.insert(Element::new(50, "asset", "Photo").with_uri("media/photo")).await;

    let users = Arc::new(InMemoryUserStore::new());
    users.insert(User::new(1, "ana", "ana@example.com").with_full_name("Ana Ortiz")).await;
    users.insert(User::new(2, "ben", "ben@example.com")).await;

    let layouts = Arc::new(InMemoryLayoutService::new());
    let builder = RatingEngine::builder(config)
        .with_element_store(elements.clone())
        .with_user_store(users.clone())
        .with_layout_service(layouts.clone());
    let engine = customize(builder).build().await.unwrap();

    TestEngine { engine, elements, users, layouts }
}

/// `quality` (1..5, required) in a `reviews` collection rating blog entries.
pub async fn reviews(engine: &RatingEngine) -> (Collection, Field) {
    let quality = engine
        .fields()
        .create(FieldDefinition::new("quality", "Quality").with_range(1.0, 5.0))
        .await
        .unwrap();
    let collection = engine
        .collections()
        .create(
            CollectionDefinition::new("reviews", "Reviews", "entry"),
            vec![CollectionFieldSpec::required(quality.id)],
        )
        .await
        .unwrap();
    (collection, quality)
}

pub async fn rate(engine: &RatingEngine, collection: &Collection, element: i64, quality: f64) -> Rating {
    engine
        .ratings()
        .create(Rating::new(collection.id, ElementId::new(element)).with_value("quality", quality))
        .await
        .unwrap()
}

/// Rejects every matching mutation.
pub struct VetoHook {
    pub operations: Vec<HookOperation>,
    pub timing: HookTiming,
}

impl VetoHook {
    pub fn new(timing: HookTiming, operations: Vec<HookOperation>) -> Arc<Self> {
        Arc::new(Self { operations, timing })
    }
}

#[async_trait]
impl RatingHook for VetoHook {
    async fn execute(&self, _ctx: &HookContext) -> AppResult<()> {
        Err(AppError::Internal("not allowed".to_string()))
    }

    fn name(&self) -> &str {
        "veto"
    }

    fn operations(&self) -> Vec<HookOperation> {
        self.operations.clone()
    }

    fn timing(&self) -> HookTiming {
        self.timing
    }
}
