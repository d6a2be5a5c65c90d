use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yuanjing_verify::api::{self, AppState};
use yuanjing_verify::config::Config;
use yuanjing_verify::mmr_store::AuditLog;
use yuanjing_verify::scoring;
use yuanjing_verify::signer::RecordSigner;
use yuanjing_verify::store::SledRecordStore;
use yuanjing_verify::{Sha256Engine, VerificationService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yuanjing_verify=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ----------------------------------------------------------------
    // 0. 加载配置
    // ----------------------------------------------------------------
    let config = Config::from_env()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        db = %config.db_path,
        key = %config.key_path,
        scorer = %config.scorer.kind,
        "configuration loaded"
    );

    // ----------------------------------------------------------------
    // 1. 身份、存储、打分器
    // ----------------------------------------------------------------
    let signer = RecordSigner::load_or_generate(&config.key_path)?;
    tracing::info!(public_key = %signer.public_key_hex(), "service identity loaded");

    let db = sled::open(&config.db_path)?;
    let store = SledRecordStore::open(&db)?;
    let audit_log = AuditLog::open(&db)?;

    let scorer = scoring::from_config(&config.scorer)?;

    let mut service = VerificationService::new(
        Arc::new(Sha256Engine),
        scorer,
        Arc::new(store),
        Arc::new(signer),
        Arc::new(audit_log),
    )
    .with_max_decode_pixels(config.max_decode_pixels);
    if let Some(version) = &config.policy_version {
        service = service.with_policy_version(version.clone());
    }
    tracing::info!(policy_version = service.policy_version(), "verification service ready");

    // ----------------------------------------------------------------
    // 2. 启动 HTTP 服务
    // ----------------------------------------------------------------
    let state = Arc::new(AppState {
        service,
        max_upload_bytes: config.max_upload_bytes,
    });
    let app = api::app(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(%addr, "listening");
    tracing::info!("  POST /verify          : submit an artifact for verification");
    tracing::info!("  GET  /verify/{{id}}     : fetch a verification record");
    tracing::info!("  GET  /audit/{{index}}   : fetch an audit inclusion proof");
    tracing::info!("  GET  /identity        : service public key");

    axum::serve(listener, app).await?;

    Ok(())
}
