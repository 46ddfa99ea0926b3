//! SIMRS服务器主程序

use anyhow::Context;
use clap::Parser;
use simrs_admin::{init_logging, Metrics, SimrsConfig, StorageBackend};
use simrs_core::GeoPoint;
use simrs_database::{
    create_tables, DatabasePool, PgAdminStore, PgAttendanceStore, PgDocumentStore,
    PgInventoryStore, PgPrescriptionStore, PgQueueStore, PgRegistryStore, PoolSettings,
};
use simrs_integration::{EventHub, WebhookManager};
use simrs_storage::{DocumentStorage, S3Options};
use simrs_web::{AppState, AuthSettings, ServerOptions, Stores, WebServer};
use simrs_workflow::AttendancePolicy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// SIMRS服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "simrs-server")]
#[command(about = "SIMRS (医院信息管理系统) 服务器")]
struct Args {
    /// 配置文件路径，默认读取 ./simrs.toml
    #[arg(short, long)]
    config: Option<String>,

    /// 输出生效的配置后退出
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = SimrsConfig::load(args.config.as_deref())?;

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&config.logging)?;
    info!("启动SIMRS服务器...");

    let db = DatabasePool::connect(&PoolSettings {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        min_connections: config.database.min_connections,
        connect_timeout: Duration::from_secs(config.database.connect_timeout_secs),
        idle_timeout: Duration::from_secs(config.database.idle_timeout_secs),
    })
    .await
    .context("Failed to connect to database")?;

    if config.database.init_schema {
        create_tables(db.pool()).await?;
        info!("Database schema ready");
    }

    let inventory = Arc::new(PgInventoryStore::new(db.clone()));
    let admin = Arc::new(PgAdminStore::new(db.clone()));
    let stores = Stores {
        registry: Arc::new(PgRegistryStore::new(db.clone())),
        queue: Arc::new(PgQueueStore::new(db.clone())),
        stock: inventory.clone(),
        opnames: inventory,
        prescriptions: Arc::new(PgPrescriptionStore::new(db.clone())),
        attendance: Arc::new(PgAttendanceStore::new(db.clone())),
        documents: Arc::new(PgDocumentStore::new(db.clone())),
        users: admin.clone(),
        access: admin,
    };

    let offset = config.hospital_offset()?;
    let policy = AttendancePolicy {
        geofence_enabled: config.attendance.geofence_enabled,
        center: GeoPoint {
            latitude: config.attendance.center_latitude,
            longitude: config.attendance.center_longitude,
        },
        radius_meters: config.attendance.radius_meters,
        work_start: config.work_start_time()?,
        grace_minutes: config.attendance.grace_minutes,
        offset,
    };
    let storage = document_storage(&config)?;
    let hub = EventHub::new(config.realtime.channel_capacity);

    let mut state = AppState::new(
        stores,
        hub.clone(),
        offset,
        policy,
        storage,
        AuthSettings::new(&config.auth.jwt_secret, config.auth.token_ttl_minutes),
    );

    if config.metrics.enabled {
        let metrics = Metrics::new()?;
        let observer = metrics.clone();
        hub.spawn_listener("metrics", move |event| observer.observe(&event));
        state = state.with_metrics(metrics);
    }

    if config.realtime.webhooks_enabled {
        let webhooks = Arc::new(WebhookManager::new(Duration::from_secs(
            config.realtime.webhook_timeout_secs,
        ))?);
        webhooks.clone().spawn_forwarder(&hub);
        state = state.with_webhooks(webhooks);
        info!("Webhook forwarding enabled");
    }

    state.roles.seed().await?;
    state.access.seed_defaults().await?;
    if let Some(admin) = state
        .users
        .bootstrap_admin(
            &config.auth.bootstrap_admin_username,
            &config.auth.bootstrap_admin_password,
        )
        .await?
    {
        warn!(
            "Created bootstrap administrator '{}', change its password",
            admin.username
        );
    }

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address()))?;
    let options = ServerOptions {
        cors_origins: config.server.cors_origins.clone(),
        body_limit_bytes: config.server.body_limit_bytes,
    };

    WebServer::new(addr, state, &options)
        .run(shutdown_signal())
        .await?;

    db.close().await;
    info!("SIMRS服务器已停止");
    Ok(())
}

fn document_storage(config: &SimrsConfig) -> anyhow::Result<DocumentStorage> {
    let threshold = config.storage.compression_threshold;
    let storage = match config.storage.backend {
        StorageBackend::Local => DocumentStorage::local(&config.storage.root, threshold)?,
        StorageBackend::Memory => {
            warn!("Using in-memory document storage, content is lost on restart");
            DocumentStorage::in_memory(threshold)
        }
        StorageBackend::S3 => DocumentStorage::s3(
            &S3Options {
                bucket: config.storage.s3_bucket.clone(),
                region: config.storage.s3_region.clone(),
                endpoint: config.storage.s3_endpoint.clone(),
                access_key_id: config.storage.s3_access_key_id.clone(),
                secret_access_key: config.storage.s3_secret_access_key.clone(),
                allow_http: config.storage.s3_allow_http,
            },
            threshold,
        )?,
    };
    info!(backend = ?config.storage.backend, "Document storage ready");
    Ok(storage)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
