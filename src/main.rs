// ID document OCR service: consumes scan requests, publishes extracted fields

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use idscan::messaging::kafka::{KafkaSink, KafkaSource};
use idscan::messaging::{
    DeadLetterPublisher, FailurePolicy, MessageSink, MessageSource, QueueConsumer, ResultPublisher,
};
use idscan::processing::{TempStore, TesseractExtractor, TextExtractor};
use idscan::utils::logger;
use idscan::utils::shutdown::spawn_listener;
use idscan::{Config, RequestHandler, ScanHandler};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "idscan", about = "ID document OCR service")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Overrides service.log_level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config {}: {}", args.config.display(), e);
            return Err(e.into());
        }
    };
    logger::init(args.log_level.as_deref().unwrap_or(&config.service.log_level));
    info!(
        "Starting {} with {} workers (language={})",
        config.service.name, config.service.workers, config.ocr.language
    );

    let shutdown = CancellationToken::new();

    let temp_store = Arc::new(TempStore::new(&config.ocr.temp_dir)?);
    if let Err(e) = temp_store.sweep_stale() {
        warn!("Initial temp sweep failed: {}", e);
    }
    let sweeper = Arc::clone(&temp_store).spawn_sweeper(shutdown.clone());

    let extractor: Arc<dyn TextExtractor> =
        Arc::new(TesseractExtractor::new(config.ocr.tesseract_data_path.clone()));
    let handler: Arc<dyn ScanHandler> = Arc::new(RequestHandler::new(
        temp_store,
        extractor,
        config.ocr.language.clone(),
        config.service.workers,
    ));

    let source = Arc::new(KafkaSource::new(&config.kafka)?);
    let sink = Arc::new(KafkaSink::new(&config.kafka)?);
    let publisher = Arc::new(ResultPublisher::new(
        Arc::clone(&sink) as Arc<dyn MessageSink>,
        config.kafka.producer.topic.clone(),
    ));
    let policy = match &config.kafka.producer.dead_letter_topic {
        Some(topic) => {
            info!("Failed records go to dead-letter topic {}", topic);
            FailurePolicy::DeadLetter(DeadLetterPublisher::new(
                Arc::clone(&sink) as Arc<dyn MessageSink>,
                topic.clone(),
            ))
        }
        None => FailurePolicy::Acknowledge,
    };

    let consumer = QueueConsumer::new(
        source as Arc<dyn MessageSource>,
        handler,
        publisher,
        policy,
    );

    spawn_listener(shutdown.clone())?;

    let outcome = consumer.run(shutdown.clone()).await;
    shutdown.cancel();

    if let Err(e) = sink.flush() {
        warn!("Producer flush failed: {}", e);
    }
    let _ = sweeper.await;

    match outcome {
        Ok(()) => {
            info!("Stopped");
            Ok(())
        }
        Err(e) => {
            error!("Consumer stopped with error: {}", e);
            Err(e.into())
        }
    }
}

