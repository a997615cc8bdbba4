use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sumstatsr::{
    AssociationSearch, Config,
    block::BlockLayout,
    config::{Backend, Cli, Command, LoadArgs, VerifyArgs},
    handlers::{AppState, create_router},
    loader::{BlockLoader, CollectionWriter, LoadBatch, TableWriter},
    metadata::Catalog,
    partition::PartitionSource,
    storage::{BlockStore, CollectionStore, TableStore, jsonl},
    types::AssociationRecord,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| cli.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Serve(config) => serve(config).await,
        Command::Load(args) => load(args),
        Command::Verify(args) => verify(args),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let source: Arc<dyn PartitionSource> = match config.backend {
        Backend::Blocks => Arc::new(BlockStore::new(
            config.data_dir.clone(),
            BlockLayout::new(config.block_size),
        )),
        Backend::Tables => Arc::new(TableStore::new(config.data_dir.clone())),
        Backend::Collections => {
            let store = CollectionStore::open(&config.data_dir)?;
            tracing::info!(studies = ?store.studies(), "collections opened");
            Arc::new(store)
        }
    };
    let metadata_path = config.metadata_path();
    let catalog = Catalog::open_or_default(&metadata_path)
        .with_context(|| format!("reading metadata catalog {}", metadata_path.display()))?;

    let state = AppState {
        search: Arc::new(AssociationSearch::new(
            source,
            Arc::new(catalog),
            config.search_config(),
        )),
        backend: config.backend,
    };

    let app = create_router(state);
    let app = if config.cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };

    let addr = config.bind_address();
    tracing::info!("Starting sumstatsr server on {}", addr);
    tracing::info!("Data directory: {:?} ({:?} backend)", config.data_dir, config.backend);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn load(args: LoadArgs) -> anyhow::Result<()> {
    let mut records: Vec<AssociationRecord> = jsonl::read_all(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;
    for record in &mut records {
        record.study_id.clone_from(&args.study);
    }
    let uuid = args
        .uuid
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let metadata_path = args.metadata_path();
    let mut catalog = Catalog::open_or_default(&metadata_path)?;
    let partition = match args.backend {
        Backend::Tables => args.dataset.clone().unwrap_or_else(|| args.study.clone()),
        Backend::Blocks | Backend::Collections => args.study.clone(),
    };
    catalog.observe(&partition, &records);

    let summary = match args.backend {
        Backend::Blocks => {
            let store = BlockStore::new(args.data_dir.clone(), BlockLayout::new(args.block_size));
            BlockLoader::new(store).load(LoadBatch {
                study_id: args.study.clone(),
                uuid,
                records,
            })?
        }
        Backend::Tables => {
            TableWriter::new(args.data_dir.clone(), args.chunk_rows).write(&partition, &uuid, records)?
        }
        Backend::Collections => CollectionWriter::new(args.data_dir.clone()).write(&args.study, records)?,
    };
    catalog.save(&metadata_path)?;

    tracing::info!(
        study = %summary.study_id,
        uuid = %summary.uuid,
        records = summary.records,
        partitions = summary.partitions.len(),
        "load complete"
    );
    Ok(())
}

fn verify(args: VerifyArgs) -> anyhow::Result<()> {
    let store = BlockStore::new(args.data_dir.clone(), BlockLayout::new(args.block_size));
    store
        .verify()
        .with_context(|| format!("verifying {}", args.data_dir.display()))?;
    tracing::info!(chromosomes = store.chromosomes()?.len(), "block store sizes verified");
    Ok(())
}
