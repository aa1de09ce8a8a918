// Rating Engine bootstrap - opens the configured store and reports the field catalog

use tracing::info;
use tracing_subscriber::EnvFilter;

use rating_engine::{config::Config, RatingEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let engine = RatingEngine::builder(config).build().await?;
    engine.database().health_check().await?;

    let field_version = engine.fields().field_version().await?;
    let fields = engine.fields().find_all().await?;
    info!(%field_version, count = fields.len(), "field catalog loaded");
    for field in &fields {
        info!(
            handle = %field.handle,
            column = %field.column_name(),
            column_type = %field.column_type(),
            min = field.min,
            max = field.max,
            "rating field"
        );
    }

    let collections = engine.collections().find_all().await?;
    for collection in &collections {
        let handles: Vec<String> = engine
            .collections()
            .get_rating_fields(collection)
            .await?
            .into_iter()
            .map(|field| field.handle.into_string())
            .collect();
        info!(handle = %collection.handle, element_type = %collection.element_type, fields = ?handles, "rating collection");
    }

    let statuses = engine.settings().load().await?.statuses;
    info!(statuses = ?statuses.iter().map(|s| s.key.as_str()).collect::<Vec<_>>(), "rating statuses");
    Ok(())
}
