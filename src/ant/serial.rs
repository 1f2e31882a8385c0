use std::io::{ErrorKind, Read as _, Write as _};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc as std_mpsc};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use serialport::SerialPort;
use tokio::sync::mpsc;

use super::message::{
    EVENT_CHANNEL_CLOSED, FrameDecoder, Inbound, Message, RESPONSE_NO_ERROR, RF_EVENT, ids,
};
use super::{ANTPLUS_RF_FREQUENCY, CHANNEL_TYPE_RECEIVE, ChannelId, Node, NodeEvent};
use crate::error::AntError;

/// Channels available on common ANT USB sticks (USB2 / USB-m).
const MAX_CHANNELS: usize = 8;
const SCAN_CHANNEL: u8 = 0;
const NETWORK: u8 = 0;
/// How long the reader blocks before checking whether it should stop.
const READ_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
struct Reply {
    channel: u8,
    message_id: u8,
    code: u8,
}

/// ANT USB stick driven through its serial port.
pub struct SerialNode {
    writer: Box<dyn SerialPort>,
    replies: std_mpsc::Receiver<Reply>,
    timeout: Duration,
    assigned: [bool; MAX_CHANNELS],
    running: Arc<AtomicBool>,
}

impl SerialNode {
    pub fn open(
        path: &Path,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<NodeEvent>), AntError> {
        let unavailable = |source: std::io::Error| AntError::HardwareUnavailable {
            path: path.to_path_buf(),
            source,
        };

        let writer = serialport::new(path.to_string_lossy(), baud_rate)
            .timeout(READ_POLL)
            .open()
            .map_err(|err| unavailable(err.into()))?;
        let reader = writer.try_clone().map_err(|err| unavailable(err.into()))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (reply_tx, replies) = std_mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));

        let reader_running = running.clone();
        std::thread::Builder::new()
            .name("ant-reader".into())
            .spawn(move || read_loop(reader, event_tx, reply_tx, reader_running))?;

        let mut node = SerialNode {
            writer,
            replies,
            timeout,
            assigned: [false; MAX_CHANNELS],
            running,
        };

        info!(
            "Resetting ANT stick at {} ({} baud)",
            path.display(),
            baud_rate
        );
        node.send(&Message::reset_system())?;
        node.wait_for(0, ids::RESET_SYSTEM)
            .map_err(|err| match err {
                AntError::ResponseTimeout { .. } | AntError::LinkClosed => {
                    unavailable(std::io::Error::new(ErrorKind::TimedOut, err.to_string()))
                }
                other => other,
            })?;

        Ok((node, event_rx))
    }

    fn send(&mut self, message: &Message) -> Result<(), AntError> {
        trace!("ANT send 0x{:02X} {:02X?}", message.id, message.payload);
        self.writer.write_all(&message.encode())?;
        self.writer.flush()?;
        Ok(())
    }

    /// Sends a configuration command and waits for its response code.
    fn command(&mut self, message: Message) -> Result<(), AntError> {
        let channel = message.payload.first().copied().unwrap_or(0);
        self.send(&message)?;
        let code = self.wait_for(channel, message.id)?;
        if code != RESPONSE_NO_ERROR {
            return Err(AntError::Channel {
                channel,
                message_id: message.id,
                code,
            });
        }
        Ok(())
    }

    fn wait_for(&self, channel: u8, message_id: u8) -> Result<u8, AntError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(reply) if reply.channel == channel && reply.message_id == message_id => {
                    return Ok(reply.code);
                }
                Ok(reply) => debug!("Ignoring stale ANT reply {:?}", reply),
                Err(std_mpsc::RecvTimeoutError::Timeout) => {
                    return Err(AntError::ResponseTimeout {
                        channel,
                        message_id,
                    });
                }
                Err(std_mpsc::RecvTimeoutError::Disconnected) => return Err(AntError::LinkClosed),
            }
        }
    }

    fn configure_channel(
        &mut self,
        channel: u8,
        id: ChannelId,
        period: Option<u16>,
    ) -> Result<(), AntError> {
        self.command(Message::assign_channel(channel, CHANNEL_TYPE_RECEIVE, NETWORK))?;
        self.assigned[channel as usize] = true;
        self.command(Message::set_channel_id(channel, id))?;
        // scan mode listens continuously, a period would be ignored
        if let Some(period) = period {
            self.command(Message::set_channel_period(channel, period))?;
        }
        self.command(Message::set_rf_frequency(channel, ANTPLUS_RF_FREQUENCY))
    }

    fn release(&mut self, channel: u8) {
        if let Err(err) = self.command(Message::unassign_channel(channel)) {
            warn!("Could not unassign channel {}: {}", channel, err);
        }
        self.assigned[channel as usize] = false;
    }
}

impl Node for SerialNode {
    fn set_network_key(&mut self, network: u8, key: &[u8; 8]) -> Result<(), AntError> {
        self.command(Message::set_network_key(network, key))
    }

    fn open_scan_channel(&mut self, filter: ChannelId) -> Result<u8, AntError> {
        let result = self
            .configure_channel(SCAN_CHANNEL, filter, None)
            .and_then(|_| self.command(Message::enable_extended_messages(true)))
            .and_then(|_| self.command(Message::open_rx_scan_mode()));
        if let Err(err) = result {
            if self.assigned[SCAN_CHANNEL as usize] {
                self.release(SCAN_CHANNEL);
            }
            return Err(err);
        }
        info!("Opened scan channel {}", SCAN_CHANNEL);
        Ok(SCAN_CHANNEL)
    }

    fn open_channel(&mut self, id: ChannelId) -> Result<u8, AntError> {
        let channel = self
            .assigned
            .iter()
            .position(|used| !used)
            .ok_or(AntError::NoFreeChannel)? as u8;

        let result = self
            .configure_channel(channel, id, Some(id.device_type().channel_period()))
            .and_then(|_| self.command(Message::open_channel(channel)));
        if let Err(err) = result {
            if self.assigned[channel as usize] {
                self.release(channel);
            }
            return Err(err);
        }
        debug!("Opened channel {} for {:?}", channel, id);
        Ok(channel)
    }

    fn close_channel(&mut self, channel: u8) -> Result<(), AntError> {
        self.command(Message::close_channel(channel))?;
        if self.wait_for(channel, RF_EVENT)? != EVENT_CHANNEL_CLOSED {
            warn!("Unexpected event while closing channel {}", channel);
        }
        self.release(channel);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Err(err) = self.send(&Message::reset_system()) {
            warn!("Could not reset ANT stick: {}", err);
        }
        info!("ANT node stopped");
    }
}

fn read_loop(
    mut reader: Box<dyn SerialPort>,
    events: mpsc::UnboundedSender<NodeEvent>,
    replies: std_mpsc::Sender<Reply>,
    running: Arc<AtomicBool>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 256];

    while running.load(Ordering::Relaxed) {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                info!("ANT device closed");
                break;
            }
            Ok(n) => n,
            Err(err) if matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::TimedOut) => {
                continue;
            }
            Err(err) => {
                error!("Error reading from ANT device: {}", err);
                break;
            }
        };
        decoder.push(&buf[..n]);

        while let Some(message) = decoder.next_message() {
            let event = match Inbound::from_message(&message) {
                Some(Inbound::Broadcast {
                    channel,
                    page,
                    extended,
                }) => Some(NodeEvent::Broadcast {
                    channel,
                    page,
                    extended,
                }),
                Some(Inbound::Response {
                    channel,
                    message_id,
                    code,
                }) => {
                    let _ = replies.send(Reply {
                        channel,
                        message_id,
                        code,
                    });
                    None
                }
                Some(Inbound::Event { channel, code }) if code == EVENT_CHANNEL_CLOSED => {
                    let _ = replies.send(Reply {
                        channel,
                        message_id: RF_EVENT,
                        code,
                    });
                    Some(NodeEvent::ChannelClosed(channel))
                }
                Some(Inbound::Event { channel, code }) => {
                    trace!("Channel {} event 0x{:02X}", channel, code);
                    None
                }
                Some(Inbound::Startup) => {
                    let _ = replies.send(Reply {
                        channel: 0,
                        message_id: ids::RESET_SYSTEM,
                        code: RESPONSE_NO_ERROR,
                    });
                    None
                }
                None => {
                    trace!("Unhandled ANT message 0x{:02X}", message.id);
                    None
                }
            };

            if let Some(event) = event {
                if events.send(event).is_err() {
                    debug!("Event receiver dropped, stopping ANT reader");
                    return;
                }
            }
        }
    }
}
