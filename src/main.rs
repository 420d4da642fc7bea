use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use billing_reconciler::adapters::http::{webhook_router, WebhookAppState};
use billing_reconciler::adapters::{PostgresBillingStore, StripeClient, StripeConfig};
use billing_reconciler::application::{ReconcileWebhookHandler, ReconciliationContext};
use billing_reconciler::config::AppConfig;
use billing_reconciler::domain::billing::{PlanMapper, StripeWebhookVerifier};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;
    init_tracing(&config.server.log_level, config.server.json_logs());

    info!(database = %config.database.redacted_url(), "connecting to database");
    let pool = config
        .database
        .pool_options()
        .connect(&config.database.url)
        .await?;
    if config.database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }

    let plans = match &config.payment.price_plan_file {
        Some(path) => {
            let mapper = PlanMapper::from_yaml_file(path)?;
            info!(path = %path.display(), prices = mapper.len(), "loaded price table");
            mapper
        }
        None => PlanMapper::default(),
    };

    let payment = &config.payment;
    if payment.is_test_mode() && payment.require_livemode {
        warn!("stripe test key configured while live-mode events are required");
    }
    let stripe = StripeClient::new(
        StripeConfig::new(payment.stripe_api_key.expose_secret().as_str())
            .with_base_url(payment.api_base_url.clone())
            .with_timeout(payment.request_timeout()),
    )?;
    let verifier = StripeWebhookVerifier::new(payment.stripe_webhook_secret.expose_secret().as_str())?
        .with_tolerance(payment.signature_tolerance_secs);

    let context = ReconciliationContext::new(
        Arc::new(PostgresBillingStore::new(pool)),
        Arc::new(stripe),
        Arc::new(plans),
    );
    let handler = ReconcileWebhookHandler::new(verifier, context)
        .with_require_livemode(payment.require_livemode);

    let app = webhook_router(WebhookAppState::new(Arc::new(handler)), &config.server);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, environment = ?config.server.environment, "billing reconciler listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}
