use std::sync::Arc;

use auto_responder::auth::AuthConfig;
use auto_responder::compose::ReplyComposer;
use auto_responder::config::AppConfig;
use auto_responder::events::EventLog;
use auto_responder::llm::{ReplyGenerator, UnconfiguredGenerator, create_generator};
use auto_responder::mailer::{Mailer, SmtpMailer};
use auto_responder::outbox::Outbox;
use auto_responder::queue::JobQueue;
use auto_responder::server::{AppState, routes};
use auto_responder::settings::SettingsStore;
use auto_responder::store::{ListStore, MemoryStore, UpstashStore};
use auto_responder::worker::{Worker, WorkerDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    // ── Store ───────────────────────────────────────────────────────────
    let store: Arc<dyn ListStore> = match &config.upstash {
        Some(upstash) => {
            eprintln!("   Store: {}", upstash.base_url);
            Arc::new(UpstashStore::new(upstash)?)
        }
        None => {
            eprintln!("   Store: in-memory (set UPSTASH_REDIS_REST_URL for durability)");
            tracing::warn!("No store configured; queue and outbox will not survive restarts");
            Arc::new(MemoryStore::new())
        }
    };

    // ── Capabilities ────────────────────────────────────────────────────
    let generator: Arc<dyn ReplyGenerator> = match &config.llm {
        Some(llm) => {
            eprintln!("   Generator: {} ({})", llm.model, backend_label(llm.backend));
            create_generator(llm)?
        }
        None => {
            eprintln!("   Generator: none (template replies only)");
            Arc::new(UnconfiguredGenerator)
        }
    };

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => {
            eprintln!("   SMTP: {}:{} (from: {})", smtp.host, smtp.port, smtp.from_address);
            Arc::new(SmtpMailer::new(smtp)?)
        }
        None => {
            eprintln!("Error: EMAIL_SMTP_HOST not set");
            eprintln!("  export EMAIL_SMTP_HOST=smtp.example.com");
            std::process::exit(1);
        }
    };

    // ── Pipeline ────────────────────────────────────────────────────────
    let keys = &config.keys;
    let queue = JobQueue::new(store.clone(), keys.queue.clone());
    let settings = SettingsStore::new(store.clone(), keys.settings.clone());
    let events = EventLog::new(store.clone(), keys.log.clone(), keys.log_max);
    let outbox = Outbox::new(store.clone(), keys.outbox.clone(), keys.outbox_max);
    let composer = ReplyComposer::new(generator, events.clone());

    let worker = Arc::new(Worker::new(
        WorkerDeps {
            queue: queue.clone(),
            settings: settings.clone(),
            composer: composer.clone(),
            mailer,
            outbox: outbox.clone(),
            events: events.clone(),
            store: store.clone(),
        },
        config.worker.clone(),
        keys.worker_last_run.clone(),
    ));

    // One-shot CLI drain: `auto-responder worker`
    if std::env::args().nth(1).as_deref() == Some("worker") {
        let summary = worker.run_once().await?;
        println!("processed={} remaining={}", summary.processed, summary.remaining);
        return Ok(());
    }

    // ── Drain ticker ────────────────────────────────────────────────────
    if !config.worker_interval.is_zero() {
        eprintln!("   Drain ticker: every {}s", config.worker_interval.as_secs());
        let ticker_worker = Arc::clone(&worker);
        let interval = config.worker_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            // The immediate first tick would race startup traffic
            tick.tick().await;
            loop {
                tick.tick().await;
                match ticker_worker.run_once().await {
                    Ok(summary) => {
                        if summary.processed > 0 || summary.remaining > 0 {
                            tracing::info!(
                                processed = summary.processed,
                                remaining = summary.remaining,
                                "Scheduled drain"
                            );
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Scheduled drain failed"),
                }
            }
        });
    }

    // ── HTTP ────────────────────────────────────────────────────────────
    let auth = AuthConfig::from_env();
    if auth.admin_password.is_none() {
        eprintln!("   Admin API: locked (set ADMIN_PASSWORD to enable login)");
    }

    let state = AppState {
        queue,
        settings,
        composer,
        worker,
        events,
        outbox,
        auth,
    };

    let app = routes(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    eprintln!("   Listening on 0.0.0.0:{}\n", config.port);
    tracing::info!(port = config.port, "Auto-responder started");
    axum::serve(listener, app).await?;

    Ok(())
}

fn backend_label(backend: auto_responder::llm::LlmBackend) -> &'static str {
    match backend {
        auto_responder::llm::LlmBackend::OpenAi => "openai",
        auto_responder::llm::LlmBackend::Anthropic => "anthropic",
    }
}
