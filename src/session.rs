use std::path::PathBuf;

use log::{debug, error, info, trace, warn};
use tokio::sync::{mpsc, oneshot};

use crate::ant::{ANTPLUS_NETWORK_KEY, ChannelId, DeviceData, DeviceType, Node, NodeEvent};
use crate::error::SessionError;
use crate::messages::PowerSample;
use crate::mqtt::Publisher;
use crate::registry::{DeviceHandle, DeviceRegistry};
use crate::scanner::{ScanEvent, Scanner};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Zero fields match any transmitter.
    pub filter: ChannelId,
    pub auto_create: bool,
    pub persist_path: Option<PathBuf>,
    pub power_topic: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub devices_found: usize,
    pub devices_created: usize,
    pub samples_published: usize,
    pub samples_dropped: usize,
}

/// Owns the ANT node and the device registry for the duration of one scan.
///
/// Teardown (closing every channel, persisting the registry, stopping the
/// node) runs exactly once: at the end of `run`, or on drop if the session
/// future is abandoned.
pub struct Session<N: Node, P: Publisher> {
    node: N,
    publisher: P,
    options: SessionOptions,
    scanner: Scanner,
    registry: DeviceRegistry,
    scan_channel: Option<u8>,
    report: SessionReport,
    torn_down: bool,
}

impl<N: Node, P: Publisher> Session<N, P> {
    pub fn new(node: N, publisher: P, options: SessionOptions) -> Self {
        Session {
            node,
            publisher,
            scanner: Scanner::new(options.filter),
            options,
            registry: DeviceRegistry::new(),
            scan_channel: None,
            report: SessionReport::default(),
            torn_down: false,
        }
    }

    /// Listens until `shutdown` fires (or its sender goes away) or the node's
    /// event stream ends.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<NodeEvent>,
        shutdown: oneshot::Receiver<()>,
    ) -> Result<SessionReport, SessionError> {
        let result = self.listen(&mut events, shutdown).await;
        self.teardown();
        result.map(|_| {
            let mut report = self.report.clone();
            report.devices_found = self.scanner.found_count();
            report
        })
    }

    async fn listen(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<NodeEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Result<(), SessionError> {
        self.node.set_network_key(0, &ANTPLUS_NETWORK_KEY)?;
        self.scan_channel = Some(self.node.open_scan_channel(self.options.filter)?);

        let filter = self.scanner.filter();
        info!(
            "Starting scanner for #{}, type {}, press Ctrl-C to finish",
            filter.device_number, filter.device_type
        );

        loop {
            tokio::select! {
                // a backlog of broadcasts must not delay shutdown
                biased;
                _ = &mut shutdown => {
                    info!("Closing ANT+ node...");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        info!("ANT event stream ended");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Broadcast {
                channel,
                page,
                extended,
            } if Some(channel) == self.scan_channel => {
                let Some(id) = extended else {
                    trace!("Scan broadcast without channel id");
                    return;
                };
                for scan_event in self.scanner.observe(id, &page) {
                    match scan_event {
                        ScanEvent::Found(id) => self.on_found(id),
                        ScanEvent::Update(id, common) => {
                            info!(
                                "Device #{} common data update: {:?}",
                                id.device_number, common
                            );
                        }
                    }
                }
                if let Some(device) = self.registry.find_by_id(id.device_number) {
                    let (device_id, device_type) = (device.id, device.device_type);
                    self.on_device_data(device_id, device_type, &page).await;
                }
            }
            NodeEvent::Broadcast { channel, page, .. } => {
                match self.registry.find_by_channel(channel) {
                    Some(device) => {
                        let (device_id, device_type) = (device.id, device.device_type);
                        self.on_device_data(device_id, device_type, &page).await;
                    }
                    None => debug!("Ignoring broadcast on unregistered channel {}", channel),
                }
            }
            NodeEvent::ChannelClosed(channel) => {
                debug!("Channel {} closed", channel);
            }
        }
    }

    fn on_found(&mut self, id: ChannelId) {
        let device_type = id.device_type();
        info!(
            "Found new device #{} {}; device_type: {}, transmission_type: {}",
            id.device_number, device_type, id.device_type, id.transmission_type
        );

        if !self.options.auto_create {
            return;
        }
        if self.registry.is_full() {
            debug!("Device registry full, not creating device #{}", id.device_number);
            return;
        }
        if device_type.decoder().is_none() {
            debug!("No decoder for {}, not creating device", device_type);
            return;
        }
        if self.registry.contains(id.device_number) {
            return;
        }

        match self.auto_create(id) {
            Ok(handle) => {
                if self.registry.insert(handle) {
                    self.report.devices_created += 1;
                    info!("Create new device #{} {}", id.device_number, device_type);
                }
            }
            Err(err) => warn!("{}", err),
        }
    }

    fn auto_create(&mut self, id: ChannelId) -> Result<DeviceHandle, SessionError> {
        let channel = self
            .node
            .open_channel(id)
            .map_err(|source| SessionError::AutoCreateFailed {
                device_id: id.device_number,
                source,
            })?;
        Ok(DeviceHandle::new(id, channel))
    }

    async fn on_device_data(&mut self, device_id: u16, device_type: DeviceType, page: &[u8; 8]) {
        let Some(decoder) = device_type.decoder() else {
            return;
        };
        let data = decoder.decode(page);
        debug!(
            "Device #{} broadcast {} data: {:?}",
            device_id,
            data.page_name(),
            data
        );

        if let DeviceData::Power(power) = data {
            info!("Device #{} power data {}", device_id, power);
            self.publish(PowerSample::new(device_id, power.instantaneous_power))
                .await;
        }
    }

    async fn publish(&mut self, sample: PowerSample) {
        let topic = &self.options.power_topic;
        let payload = sample.payload();
        match self.publisher.publish(topic, payload.clone(), false).await {
            Ok(()) => {
                self.report.samples_published += 1;
                debug!("Sent `{}` to topic `{}`", payload, topic);
            }
            Err(err) => {
                self.report.samples_dropped += 1;
                warn!("{}", err);
            }
        }
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(channel) = self.scan_channel.take() {
            if let Err(err) = self.node.close_channel(channel) {
                warn!("Error closing scan channel: {}", err);
            }
        }

        if let Some(path) = self.options.persist_path.as_ref() {
            if let Err(err) = self.registry.persist(path) {
                error!("{}", err);
            }
        }

        self.registry.close_all(&mut self.node);
        self.node.stop();
    }
}

impl<N: Node, P: Publisher> Drop for Session<N, P> {
    fn drop(&mut self) {
        self.teardown();
    }
}
