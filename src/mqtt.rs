use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{MqttOptions, QoS};
use tokio::sync::mpsc;

use crate::config;
use crate::error::MqttError;

/// Inbound message from a subscribed topic.
#[derive(Clone, Debug)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// Fire-and-forget publishing. Failures are reported, never retried.
pub trait Publisher {
    fn publish(
        &self,
        topic: &str,
        payload: String,
        retain: bool,
    ) -> impl Future<Output = Result<(), MqttError>> + Send;
}

impl<T: Publisher + ?Sized> Publisher for &T {
    fn publish(
        &self,
        topic: &str,
        payload: String,
        retain: bool,
    ) -> impl Future<Output = Result<(), MqttError>> + Send {
        (**self).publish(topic, payload, retain)
    }
}

/// Requests rumqttc buffers between the client and its event loop.
const REQUEST_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    subscriptions: Vec<String>,
    /// Set on ConnAck, cleared when polling fails or the client disconnects.
    connected: Arc<AtomicBool>,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig, default_id: &str) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .clone()
            .unwrap_or(default_id.to_string());

        let mut mqttoptions = MqttOptions::new(
            publisher_id,
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(60)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, REQUEST_CAPACITY);

        (
            MqttClient {
                client,
                subscriptions: Vec::new(),
                connected: Arc::new(AtomicBool::new(false)),
            },
            eventloop,
        )
    }

    /// Topics to (re)subscribe to every time the broker acknowledges a connection.
    pub fn with_subscriptions(mut self, topics: Vec<String>) -> Self {
        self.subscriptions = topics;
        self
    }

    async fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        for topic in &self.subscriptions {
            info!("Subscribing to MQTT topic {}", topic);
            self.client.subscribe(topic, QoS::AtMostOnce).await?;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Drives the connection, forwarding publishes on subscribed topics to `tx`.
    /// Reconnects are left to rumqttc; a failed poll is retried after a pause.
    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        tx: Option<mpsc::Sender<MqttMessage>>,
    ) {
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        let payload = match String::from_utf8(p.payload.to_vec()) {
                            Ok(s) => s,
                            Err(err) => {
                                warn!("Invalid UTF-8 in MQTT payload on {}: {}", p.topic, err);
                                continue;
                            }
                        };
                        debug!("Received MQTT message on topic {}: {}", p.topic, payload);

                        if let Some(tx) = tx.as_ref() {
                            let message = MqttMessage {
                                topic: p.topic,
                                payload,
                            };
                            if tx.send(message).await.is_err() {
                                error!("MQTT message receiver closed");
                                break;
                            }
                        }
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        info!("Connected to MQTT broker");
                        self.connected.store(true, Ordering::Relaxed);
                        if let Err(err) = self.subscribe().await {
                            error!("Error subscribing to MQTT topics: {:?}", err);
                        }
                    }
                    rumqttc::Event::Outgoing(rumqttc::Outgoing::Disconnect) => {
                        debug!("MQTT disconnect sent");
                        self.connected.store(false, Ordering::Relaxed);
                        break;
                    }
                    _ => {}
                },
                Err(e) => {
                    self.connected.store(false, Ordering::Relaxed);
                    error!("Error polling MQTT event loop: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

impl Publisher for MqttClient {
    /// Never waits on the broker: while disconnected, or with the request
    /// queue full, the message is rejected instead of queued.
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), MqttError> {
        let failed = |reason: String| MqttError::PublishFailed {
            topic: topic.to_string(),
            reason,
        };
        if !self.is_connected() {
            return Err(failed("not connected to broker".to_string()));
        }
        debug!("Publishing to {} (retain: {}): {}", topic, retain, payload);
        self.client
            .try_publish(topic, QoS::AtMostOnce, retain, payload)
            .map_err(|err| failed(err.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Published {
        pub topic: String,
        pub payload: String,
        pub retain: bool,
    }

    /// Publisher double; topics listed in `failing` report `PublishFailed`.
    #[derive(Default)]
    pub struct RecordingPublisher {
        pub published: Mutex<Vec<Published>>,
        pub failing: Vec<String>,
    }

    impl RecordingPublisher {
        pub fn published(&self) -> Vec<Published> {
            self.published.lock().unwrap().clone()
        }
    }

    impl Publisher for RecordingPublisher {
        async fn publish(
            &self,
            topic: &str,
            payload: String,
            retain: bool,
        ) -> Result<(), MqttError> {
            if self.failing.iter().any(|t| t == topic) {
                return Err(MqttError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "broker unreachable".to_string(),
                });
            }
            self.published.lock().unwrap().push(Published {
                topic: topic.to_string(),
                payload,
                retain,
            });
            Ok(())
        }
    }

    fn test_config() -> config::MqttConfig {
        config::MqttConfig {
            host: "localhost".to_string(),
            port: None,
            username: None,
            password: None,
            publisher_id: None,
            keep_alive_seconds: None,
            power_topic: None,
            control_topic_path: None,
        }
    }

    fn connected_client() -> (MqttClient, rumqttc::EventLoop) {
        let (client, eventloop) = MqttClient::new(&test_config(), "ant-monitor-test");
        client.connected.store(true, Ordering::Relaxed);
        (client, eventloop)
    }

    #[tokio::test]
    async fn test_client_publish_queues_request() {
        let (client, _eventloop) = connected_client();
        client
            .publish("fitness/powermeter", "250".to_string(), false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish_without_event_loop_fails() {
        let (client, eventloop) = connected_client();
        drop(eventloop);
        let result = client
            .publish("fitness/powermeter", "250".to_string(), false)
            .await;
        assert!(matches!(
            result,
            Err(MqttError::PublishFailed { topic, .. }) if topic == "fitness/powermeter"
        ));
    }

    #[tokio::test]
    async fn test_full_request_queue_fails_fast() {
        let (client, _eventloop) = connected_client();
        for _ in 0..REQUEST_CAPACITY {
            client
                .publish("fitness/powermeter", "1".to_string(), false)
                .await
                .unwrap();
        }
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            client.publish("fitness/powermeter", "2".to_string(), false),
        )
        .await
        .expect("publish must not wait for queue space");
        assert!(matches!(result, Err(MqttError::PublishFailed { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_broker_rejects_every_publish() {
        let mut config = test_config();
        config.host = "127.0.0.1".to_string();
        config.port = Some(1);
        let (client, mut eventloop) = MqttClient::new(&config, "ant-monitor-test");
        let poller = {
            let client = client.clone();
            tokio::spawn(async move { client.event_loop(&mut eventloop, None).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut failed = 0;
        for watts in 0..REQUEST_CAPACITY + 2 {
            let result = tokio::time::timeout(
                Duration::from_secs(1),
                client.publish("fitness/powermeter", watts.to_string(), false),
            )
            .await
            .expect("publish must not hang while the broker is down");
            if result.is_err() {
                failed += 1;
            }
        }
        poller.abort();

        assert!(!client.is_connected());
        assert_eq!(failed, REQUEST_CAPACITY + 2);
    }
}
