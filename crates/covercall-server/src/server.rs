//! Server lifecycle
//!
//! Wires the engine together (records client, queue, workers, IVR, media
//! capture, HTTP surface) with a builder plus `start`/`run`/`stop` shape.
//! The in-memory mode swaps every external seam for its fake, which is how
//! local development and the scenario tests run the whole system in one
//! process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;

use covercall_escalation::carrier::{HttpCarrier, RecordingCarrier, SmsCarrier, VoiceCarrier};
use covercall_escalation::controller::EscalationController;
use covercall_escalation::events::EventPublisher;
use covercall_escalation::live::LiveCallRegistry;
use covercall_escalation::outbound::OutboundOrchestrator;
use covercall_escalation::records::{HttpRecordsClient, InMemoryRecords, RecordsApi};
use covercall_escalation::sms::{ConfirmationSmsWorker, InboundSmsHandler, SmsWaveWorker};
use covercall_escalation::store::EngineStore;
use covercall_escalation::tts::{CallAudioStore, HttpTts, NullTts, PromptCache, SpeechSynthesizer};
use covercall_escalation::{
    jobs::{QUEUE_CONFIRMATION, QUEUE_OUTBOUND, QUEUE_SMS_WAVES},
    EngineConfig,
};
use covercall_ivr::{IvrMachine, SessionRegistry, TransferCoordinator};
use covercall_media::{
    CapturePipeline, HttpObjectStore, InMemoryRecordingStore, PendingTransferCache, RecordingStore,
};
use covercall_queue::{JobQueue, QueueConfig};

use crate::app;
use crate::config::ServerConfig;
use crate::state::AppState;

/// The assembled covercall process.
pub struct CovercallServer {
    config: ServerConfig,
    state: AppState,
    queue: Arc<JobQueue>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl CovercallServer {
    /// Build every component from configuration.
    pub async fn build(config: ServerConfig) -> anyhow::Result<Self> {
        let queue = Arc::new(
            JobQueue::connect(
                &config.queue_db_url,
                QueueConfig {
                    retention: Duration::from_secs(config.retention_hours * 3600),
                    ..QueueConfig::default()
                },
            )
            .await
            .context("queue database")?,
        );
        let pool = queue.pool().clone();

        let records: Arc<dyn RecordsApi> = if config.in_memory {
            Arc::new(InMemoryRecords::new())
        } else {
            Arc::new(HttpRecordsClient::new(
                &config.records_api_url,
                &config.records_api_key,
            )?)
        };
        let (sms_carrier, voice_carrier): (Arc<dyn SmsCarrier>, Arc<dyn VoiceCarrier>) =
            if config.in_memory {
                let carrier = Arc::new(RecordingCarrier::new());
                (carrier.clone(), carrier)
            } else {
                let carrier = Arc::new(HttpCarrier::new(
                    &config.carrier_api_url,
                    &config.carrier_account_sid,
                    &config.carrier_auth_token,
                )?);
                (carrier.clone(), carrier)
            };
        let tts: Arc<dyn SpeechSynthesizer> = if config.in_memory {
            Arc::new(NullTts)
        } else {
            Arc::new(HttpTts::new(&config.tts_api_url, &config.tts_api_key)?)
        };
        let recording_store: Arc<dyn RecordingStore> = if config.in_memory {
            Arc::new(InMemoryRecordingStore::new())
        } else {
            Arc::new(HttpObjectStore::new(
                &config.object_store_url,
                &config.object_store_key,
            )?)
        };

        let engine_config = EngineConfig {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            allowed_country_prefixes: config.prefixes(),
            ..EngineConfig::default()
        };

        let events = Arc::new(EventPublisher::new(pool.clone()).await?);
        let live = Arc::new(LiveCallRegistry::new());
        let controller = Arc::new(EscalationController::new(
            records,
            queue.clone(),
            events,
            live,
            engine_config,
        ));

        let store = EngineStore::new(pool.clone()).await?;
        let prompts = Arc::new(PromptCache::new());
        let call_audio = Arc::new(CallAudioStore::new());
        let orchestrator = Arc::new(OutboundOrchestrator::new(
            controller.clone(),
            voice_carrier.clone(),
            tts.clone(),
            prompts,
            call_audio.clone(),
            store.clone(),
        ));
        let inbound_sms = Arc::new(InboundSmsHandler::new(controller.clone(), store.clone()));

        let sessions = Arc::new(SessionRegistry::new());
        let machine = Arc::new(IvrMachine::new(controller.clone(), sessions.clone()));
        let pending = Arc::new(PendingTransferCache::new());
        let capture = Arc::new(
            CapturePipeline::new(pool.clone(), pending.clone(), recording_store).await?,
        );
        let transfer = Arc::new(
            TransferCoordinator::new(
                controller.clone(),
                voice_carrier,
                pending,
                sessions,
                capture.clone(),
                pool.clone(),
            )
            .await?,
        );

        let state = AppState {
            controller,
            orchestrator,
            inbound_sms,
            machine,
            transfer,
            capture,
            call_audio,
            tts,
            carrier_auth_token: config.carrier_auth_token.clone(),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // Workers consume the same carrier seams through the state clones.
        let server = Self {
            config,
            state,
            queue,
            shutdown_tx,
            shutdown_rx,
        };
        server.spawn_workers(sms_carrier);
        Ok(server)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The HTTP application (also used directly by integration tests).
    pub fn router(&self) -> axum::Router {
        app::router(self.state.clone())
    }

    fn spawn_workers(&self, sms_carrier: Arc<dyn SmsCarrier>) {
        let wave_worker = Arc::new(SmsWaveWorker::new(
            self.state.controller.clone(),
            sms_carrier.clone(),
        ));
        let confirmation_worker = Arc::new(ConfirmationSmsWorker::new(
            self.state.controller.clone(),
            sms_carrier,
        ));

        tokio::spawn(self.queue.clone().run_worker(
            QUEUE_SMS_WAVES,
            4,
            wave_worker,
            self.shutdown_rx.clone(),
        ));
        tokio::spawn(self.queue.clone().run_worker(
            QUEUE_OUTBOUND,
            4,
            self.state.orchestrator.clone(),
            self.shutdown_rx.clone(),
        ));
        tokio::spawn(self.queue.clone().run_worker(
            QUEUE_CONFIRMATION,
            2,
            confirmation_worker,
            self.shutdown_rx.clone(),
        ));
        tokio::spawn(
            self.queue
                .clone()
                .run_reaper(Duration::from_secs(600), self.shutdown_rx.clone()),
        );

        // Event stream TTL reaper.
        let controller = self.state.controller.clone();
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(3600)) => {}
                    _ = shutdown.changed() => {}
                }
                if *shutdown.borrow() {
                    break;
                }
                if let Err(e) = controller.events().reap().await {
                    tracing::warn!(error = %e, "event reap failed");
                }
            }
        });
    }

    /// Serve until ctrl-c, then stop the workers.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind)
            .await
            .with_context(|| format!("binding {}", self.config.bind))?;
        info!(addr = %self.config.bind, base_url = %self.config.base_url,
              "covercall server listening");

        let router = self.router();
        let shutdown_tx = self.shutdown_tx.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            })
            .await
            .context("http server")?;

        info!("covercall server stopped");
        Ok(())
    }

    /// Stop the background workers (tests and embedders).
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
