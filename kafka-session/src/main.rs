use std::str::FromStr;
use std::sync::Arc;

use envconfig::Envconfig;
use rand::Rng;
use tracing::{error, info};

use kafka_session::{KafkaEnvConfig, Message, Session, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DemoMode {
    Produce,
    Consume,
}

impl FromStr for DemoMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "produce" => Ok(DemoMode::Produce),
            "consume" => Ok(DemoMode::Consume),
            other => Err(format!("unknown demo mode {other}, expected produce or consume")),
        }
    }
}

#[derive(Envconfig)]
struct DemoConfig {
    #[envconfig(default = "produce")]
    demo_mode: DemoMode,

    #[envconfig(default = "100000")]
    demo_message_count: usize,

    #[envconfig(nested = true)]
    kafka: KafkaEnvConfig,
}

async fn produce(session: &Session, count: usize) -> Result<(), SessionError> {
    let producer = session.producer().await?;
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let number: u32 = rng.gen_range(0..1000);
        let message = Message::new(format!("key-{i}"), format!("random data #{i}: {number}"));
        if let Err(e) = producer.send(vec![message]).await {
            error!("failed to send message #{}: {}", i, e);
            continue;
        }
    }

    producer.close().await?;
    info!(count, "finished sending random data");
    Ok(())
}

async fn consume(session: &Session) -> Result<(), SessionError> {
    let consumer = session.consumer()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            fetched = consumer.fetch() => match fetched {
                Ok(Some(message)) => info!(
                    partition = ?message.partition,
                    offset = ?message.offset,
                    "received {}",
                    String::from_utf8_lossy(&message.value)
                ),
                Ok(None) => info!("no message yet"),
                Err(e) => error!("failed to fetch message: {}", e),
            },
        }
    }

    consumer.close().await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = DemoConfig::init_from_env().expect("failed to load configuration from env");
    let mut options = config
        .kafka
        .into_options()
        .expect("invalid kafka configuration");
    options.completion = Some(Arc::new(|messages: &[Message], error: Option<&SessionError>| {
        match error {
            Some(e) => error!(messages = messages.len(), "batch failed: {}", e),
            None => info!(messages = messages.len(), "batch delivered"),
        }
    }));

    let session = match Session::new(options) {
        Ok(session) => session,
        Err(e) => {
            error!("failed to configure kafka session: {}", e);
            return;
        }
    };

    let result = match config.demo_mode {
        DemoMode::Produce => produce(&session, config.demo_message_count).await,
        DemoMode::Consume => consume(&session).await,
    };
    if let Err(e) = result {
        error!("kafka demo failed: {}", e);
    }
}
