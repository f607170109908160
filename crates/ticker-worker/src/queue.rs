//! RabbitMQ queue management.
//!
//! Topology: one durable direct exchange, a primary queue whose rejected
//! messages dead-letter into the companion `_dlq` queue, and a 24 h
//! message TTL on the primary. Messages are persistent JSON. The consumer
//! channel runs with prefetch 1 so exactly one job is in flight.

use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::{debug, error, info};

use ticker_core::JobMessage;

use crate::error::Result;

/// Exchange all queues bind to.
pub const EXCHANGE: &str = "ticker_exchange";

/// How long an unconsumed message survives on the primary queue.
const MESSAGE_TTL_MS: i32 = 86_400_000;

/// Persistent delivery mode per AMQP 0.9.1.
const DELIVERY_PERSISTENT: u8 = 2;

/// Broker connection plus declared topology.
pub struct QueueManager {
    connection: Connection,
    channel: Channel,
    queue_name: String,
    dlq_name: String,
}

impl QueueManager {
    /// Connect and declare the exchange, the primary queue, and its DLQ.
    pub async fn connect(url: &str, queue_name: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        let queue_name = queue_name.to_string();
        let dlq_name = format!("{}_dlq", queue_name);

        declare_topology(&channel, &queue_name, &dlq_name).await?;
        channel.basic_qos(1, BasicQosOptions::default()).await?;

        info!(queue = %queue_name, dlq = %dlq_name, "connected to broker");
        Ok(Self {
            connection,
            channel,
            queue_name,
            dlq_name,
        })
    }

    /// Enqueue a job on the primary queue.
    pub async fn publish_job(&self, job: &JobMessage) -> Result<()> {
        self.publish(&self.queue_name, job).await?;
        info!(job_id = %job.job_id, scheduled = %job.execution_time, "job enqueued");
        Ok(())
    }

    /// Route a job straight to the dead-letter queue.
    pub async fn publish_to_dlq(&self, job: &JobMessage) -> Result<()> {
        self.publish(&self.dlq_name, job).await?;
        error!(job_id = %job.job_id, retry_count = job.retry_count, "job dead-lettered");
        Ok(())
    }

    async fn publish(&self, routing_key: &str, job: &JobMessage) -> Result<()> {
        let payload = job.to_json()?;

        self.channel
            .basic_publish(
                EXCHANGE,
                routing_key,
                BasicPublishOptions::default(),
                payload.as_bytes(),
                BasicProperties::default()
                    .with_delivery_mode(DELIVERY_PERSISTENT)
                    .with_content_type("application/json".into()),
            )
            .await?
            .await?;

        debug!(routing_key = routing_key, bytes = payload.len(), "message published");
        Ok(())
    }

    /// Start consuming the primary queue.
    pub async fn consumer(&self, tag: &str) -> Result<lapin::Consumer> {
        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(consumer)
    }

    /// Broker liveness for the health probe.
    pub fn health_check(&self) -> bool {
        self.connection.status().connected()
    }

    /// Close the connection gracefully.
    pub async fn close(&self) -> Result<()> {
        self.connection.close(200, "shutdown").await?;
        info!("broker connection closed");
        Ok(())
    }
}

/// Declare exchange, DLQ, and the dead-lettering primary queue.
async fn declare_topology(channel: &Channel, queue_name: &str, dlq_name: &str) -> Result<()> {
    channel
        .exchange_declare(
            EXCHANGE,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

    // DLQ first so the primary queue can reference it
    channel
        .queue_declare(
            dlq_name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_bind(
            dlq_name,
            EXCHANGE,
            dlq_name,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(EXCHANGE.into()),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(dlq_name.into()),
    );
    args.insert("x-message-ttl".into(), AMQPValue::LongInt(MESSAGE_TTL_MS));

    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            args,
        )
        .await?;
    channel
        .queue_bind(
            queue_name,
            EXCHANGE,
            queue_name,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    debug!(queue = queue_name, dlq = dlq_name, "topology declared");
    Ok(())
}
