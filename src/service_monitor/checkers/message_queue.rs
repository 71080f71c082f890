//! Broker probes: mqtt, kafka and rabbitmq.
use lapin::{Connection, ConnectionProperties};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, MqttOptions, Packet, QoS, Transport};
use std::time::Duration;

use super::{require, with_timeout, CheckError, ProbeOutcome, ProbeResult};
use crate::service_monitor::models::{KafkaConfig, MqttConfig, RabbitMqConfig};

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTTS_PORT: u16 = 8883;
const DEFAULT_KAFKA_PORT: u16 = 9092;
const DEFAULT_AMQP_PORT: u16 = 5672;

pub async fn check_mqtt(config: &MqttConfig, timeout: Duration) -> ProbeResult {
    let hostname = require(&config.hostname, "Hostname")?;
    let default_port = if config.use_tls {
        DEFAULT_MQTTS_PORT
    } else {
        DEFAULT_MQTT_PORT
    };
    let port = config.port.filter(|p| *p > 0).unwrap_or(default_port);

    let client_id = format!("nodenexus-uptime-{:08x}", rand::random::<u32>());
    let mut options = MqttOptions::new(client_id, hostname, port);
    options.set_keep_alive(Duration::from_secs(30));
    if let Some(username) = config.mqtt_username.as_deref().filter(|u| !u.is_empty()) {
        options.set_credentials(username, config.mqtt_password.as_deref().unwrap_or_default());
    }
    if config.use_tls {
        options.set_transport(Transport::tls_with_default_config());
    }

    let topic = config.mqtt_topic.as_deref().filter(|t| !t.is_empty());
    let expected = config
        .mqtt_success_message
        .as_deref()
        .filter(|m| !m.is_empty());

    let (client, mut event_loop) = AsyncClient::new(options, 10);
    with_timeout(timeout, async {
        loop {
            let event = event_loop
                .poll()
                .await
                .map_err(|e| CheckError::Probe(format!("MQTT connection failed: {e}")))?;
            match event {
                Event::Incoming(Packet::ConnAck(ack)) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Ok(ProbeOutcome::down(format!(
                            "MQTT broker refused connection: {:?}",
                            ack.code
                        )));
                    }
                    let Some(topic) = topic else {
                        return Ok(ProbeOutcome::up("Connected to MQTT broker"));
                    };
                    client
                        .subscribe(topic, QoS::AtMostOnce)
                        .await
                        .map_err(|e| CheckError::Probe(format!("Subscribe failed: {e}")))?;
                }
                Event::Incoming(Packet::Publish(publish)) => {
                    let payload = String::from_utf8_lossy(&publish.payload).to_string();
                    return Ok(mqtt_message_verdict(&publish.topic, &payload, expected));
                }
                _ => {}
            }
        }
    })
    .await
}

fn mqtt_message_verdict(topic: &str, payload: &str, expected: Option<&str>) -> ProbeOutcome {
    match expected {
        Some(expected) if !payload.contains(expected) => ProbeOutcome::down(format!(
            "Message on {topic} does not contain \"{expected}\": {payload}"
        )),
        _ => ProbeOutcome::up(format!("Message received on {topic}: {payload}")),
    }
}

fn kafka_brokers(config: &KafkaConfig) -> Result<Vec<String>, CheckError> {
    let brokers: Vec<String> = config
        .kafka_brokers
        .iter()
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .collect();
    if !brokers.is_empty() {
        return Ok(brokers);
    }
    match config.hostname.as_deref().map(str::trim).filter(|h| !h.is_empty()) {
        Some(host) => Ok(vec![format!(
            "{host}:{}",
            config.port.filter(|p| *p > 0).unwrap_or(DEFAULT_KAFKA_PORT)
        )]),
        None => Err(CheckError::config("At least one Kafka broker is required")),
    }
}

#[cfg(feature = "kafka")]
pub async fn check_kafka(config: &KafkaConfig, timeout: Duration) -> ProbeResult {
    use rdkafka::config::ClientConfig;
    use rdkafka::consumer::{BaseConsumer, Consumer};

    let brokers = kafka_brokers(config)?;
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", brokers.join(","))
        .set("socket.timeout.ms", timeout.as_millis().to_string())
        .set("group.id", "nodenexus-uptime-probe");
    if let Some(mechanism) = config.kafka_sasl_mechanism.as_deref().filter(|m| !m.is_empty() && *m != "None") {
        client_config
            .set("security.protocol", "SASL_PLAINTEXT")
            .set("sasl.mechanism", mechanism.to_uppercase())
            .set("sasl.username", config.kafka_username.clone().unwrap_or_default())
            .set("sasl.password", config.kafka_password.clone().unwrap_or_default());
    }
    let consumer: BaseConsumer = client_config
        .create()
        .map_err(|e| CheckError::config(format!("Invalid Kafka configuration: {e}")))?;

    let topic = config.kafka_topic.clone().filter(|t| !t.is_empty());
    let wanted = topic.clone();
    let metadata = tokio::task::spawn_blocking(move || consumer.fetch_metadata(wanted.as_deref(), timeout))
        .await
        .map_err(CheckError::probe)?
        .map_err(|e| CheckError::Probe(format!("Kafka metadata request failed: {e}")))?;

    match topic {
        Some(topic) => {
            let exists = metadata
                .topics()
                .iter()
                .any(|t| t.name() == topic && t.error().is_none() && !t.partitions().is_empty());
            if exists {
                Ok(ProbeOutcome::up(format!("Topic {topic} is available")))
            } else {
                Ok(ProbeOutcome::down(format!("Topic {topic} does not exist")))
            }
        }
        None => Ok(ProbeOutcome::up(format!(
            "Connected, {} brokers",
            metadata.brokers().len()
        ))),
    }
}

#[cfg(not(feature = "kafka"))]
pub async fn check_kafka(config: &KafkaConfig, _timeout: Duration) -> ProbeResult {
    kafka_brokers(config)?;
    Err(CheckError::config(
        "Kafka monitors are not available: built without the `kafka` feature",
    ))
}

fn amqp_uri(config: &RabbitMqConfig) -> Result<String, CheckError> {
    if let Some(uri) = config
        .database_connection_string
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return Ok(uri.to_string());
    }
    let host = config
        .hostname
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| CheckError::config("RabbitMQ connection string or hostname is required"))?;
    let port = config.port.filter(|p| *p > 0).unwrap_or(DEFAULT_AMQP_PORT);
    let user = config.rabbitmq_username.as_deref().unwrap_or("guest");
    let password = config.rabbitmq_password.as_deref().unwrap_or("guest");
    Ok(format!(
        "amqp://{}:{}@{host}:{port}/%2f",
        urlencoding::encode(user),
        urlencoding::encode(password)
    ))
}

pub async fn check_rabbitmq(config: &RabbitMqConfig, timeout: Duration) -> ProbeResult {
    let uri = amqp_uri(config)?;
    with_timeout(timeout, async {
        let connection = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .map_err(|e| CheckError::Probe(format!("AMQP connection failed: {e}")))?;
        let _ = connection.close(200, "OK").await;
        Ok(ProbeOutcome::up("Connected to RabbitMQ"))
    })
    .await
}
