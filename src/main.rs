use std::{process, sync::Arc, time::Duration};

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wlcbee::{
    config::Config,
    core::{
        coordinator::{ConfigTargetSource, Coordinator},
        pool::WorkerPool,
        publisher::{BrokerSink, Publisher},
        queue::event_queue,
        readiness::Readiness,
        walker::snmp::SnmpWalkerFactory,
        worker::WorkerSettings,
    },
    logger::LoggerManager,
    print_error,
};

const PUBLISHER_ABORT_AFTER: Duration = Duration::from_secs(1);
#[cfg(feature = "wlcbee-mqtt")]
const TRANSPORT_GRACE: Duration = Duration::from_secs(2);

/// Logs documents instead of sending them; used when built without MQTT.
#[cfg(not(feature = "wlcbee-mqtt"))]
struct LogSink;

#[cfg(not(feature = "wlcbee-mqtt"))]
#[async_trait::async_trait]
impl BrokerSink for LogSink {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<(), wlcbee::core::error::PublishError> {
        info!(topic, key, "{}", String::from_utf8_lossy(&payload));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = Config::config_path().unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });
    let cfg = Config::load(&config_path).unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });

    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting wlcbee version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    debug!("{:#?}", cfg.poller);

    let settings = WorkerSettings::from_config(&cfg.poller).unwrap_or_else(|e| {
        error!("Invalid column OID: {}", e);
        process::exit(1);
    });

    let readiness = Readiness::default();

    #[cfg(feature = "wlcbee-mqtt")]
    let instance = {
        info!("Starting MQTT client...");
        let manager = wlcbee_mqtt::MqttManager::from_config(cfg.transport.clone())
            .unwrap_or_else(|e| {
                error!("Failed to create MqttManager: {}", e);
                process::exit(1);
            });
        let instance = manager.build_and_start().await.unwrap_or_else(|e| {
            error!("Failed to build and start MQTT transport: {}", e);
            process::exit(1);
        });
        readiness.start_listening(instance.state_receiver());
        instance
    };

    #[cfg(feature = "wlcbee-mqtt")]
    let sink: Arc<dyn BrokerSink> = Arc::new(instance.publisher());

    #[cfg(not(feature = "wlcbee-mqtt"))]
    let sink: Arc<dyn BrokerSink> = {
        info!("Running without MQTT, documents are logged");
        readiness.set_state(wlcbee::core::readiness::ReadinessState::Ready);
        Arc::new(LogSink)
    };

    let (events_tx, events_rx) = event_queue();
    let publisher_cancel = CancellationToken::new();
    let mut publisher = tokio::spawn(Publisher::new(sink, cfg.publisher.clone()).run(
        events_rx,
        readiness.subscribe(),
        publisher_cancel.clone(),
    ));

    let factory = Arc::new(SnmpWalkerFactory::new(cfg.poller.walk_settings()));
    let pool = WorkerPool::spawn(factory, Arc::new(settings), events_tx);

    let source = Box::new(ConfigTargetSource::new(&config_path));
    let mut coordinator = Coordinator::bootstrap(source, pool)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to load targets: {}", e);
            process::exit(1);
        });

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = hangup.recv() => {
                info!("Received SIGHUP, reloading targets from {}", config_path.display());
                coordinator.rebuild().await;
            }
            _ = interrupt.recv() => {
                info!("Received SIGINT, initiating graceful shutdown...");
                break;
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown...");
                break;
            }
        }
    }

    let grace = cfg.poller.shutdown_grace();
    match coordinator.pool().shutdown(grace).await {
        Ok(report) => info!(
            stopped = report.stopped,
            aborted = report.aborted,
            "Workers stopped"
        ),
        Err(e) => warn!("Worker pool already closed: {}", e),
    }

    // The queue closes once the last worker is gone; the publisher drains it.
    match tokio::time::timeout(grace, &mut publisher).await {
        Ok(Ok(stats)) => info!(
            published = stats.published,
            dropped = stats.dropped,
            "Publisher drained"
        ),
        Ok(Err(e)) => error!("Publisher task failed: {}", e),
        Err(_) => {
            warn!("Publisher did not drain within {:?}, cancelling", grace);
            publisher_cancel.cancel();
            if tokio::time::timeout(PUBLISHER_ABORT_AFTER, &mut publisher)
                .await
                .is_err()
            {
                publisher.abort();
            }
        }
    }

    #[cfg(feature = "wlcbee-mqtt")]
    instance.shutdown(TRANSPORT_GRACE).await;

    info!("Shutdown complete");
    Ok(())
}
