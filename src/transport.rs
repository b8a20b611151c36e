//! Inbound frame routing.
//!
//! Exactly one handshake may listen per device id at a time. The registry
//! runs as a task; handshakes register a oneshot for the next frame, renew
//! it with `Continue` after each delivery, and `Release` when done. Raw
//! inbound frames enter through `Deliver`, typically pushed by the MIDI
//! input callback.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::{
        mpsc::{Receiver, Sender, channel},
        oneshot,
    },
    task::JoinHandle,
};

use crate::error::AppError;
use crate::sysex::SysExMessage;

type Result<T> = std::result::Result<T, AppError>;

/// Outbound MIDI port. Implementations wrap whatever backend carries the
/// bytes; tests use an in-memory channel.
pub trait MidiPort: Send + Sync {
    fn send(&self, frame: &[u8]) -> Result<()>;
}

/// Send one frame after the inter-frame delay. The S-330 drops frames
/// that arrive back to back, so every outbound frame goes through here.
pub async fn send_frame(
    port: &Arc<dyn MidiPort>,
    message: &SysExMessage,
    delay: Duration,
) -> Result<()> {
    tokio::time::sleep(delay).await;
    return port.send(&message.to_frame());
}

pub enum Operation {
    Listen {
        device_id: u8,
        op_resp: oneshot::Sender<Result<()>>,
        frame_resp: oneshot::Sender<SysExMessage>,
    },
    Continue {
        device_id: u8,
        op_resp: oneshot::Sender<Result<()>>,
        frame_resp: oneshot::Sender<SysExMessage>,
    },
    Release {
        device_id: u8,
        op_resp: oneshot::Sender<Result<()>>,
    },
    Deliver {
        frame: Vec<u8>,
    },
}

struct Listener {
    frame_resp: Option<oneshot::Sender<SysExMessage>>,
}

impl Listener {
    fn new(frame_resp: oneshot::Sender<SysExMessage>) -> Self {
        Self {
            frame_resp: Some(frame_resp),
        }
    }
}

pub fn start() -> (Sender<Operation>, JoinHandle<()>) {
    let (operation_tx, operation_rx) = channel(8);
    let handle = tokio::spawn(async move {
        let mut registry = ListenerRegistry::new();
        registry.handle_requests(operation_rx).await;
    });
    return (operation_tx, handle);
}

struct ListenerRegistry {
    listeners: HashMap<u8, Listener>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
        }
    }

    pub async fn handle_requests(&mut self, mut operation_rx: Receiver<Operation>) {
        while let Some(request) = operation_rx.recv().await {
            match request {
                Operation::Listen {
                    device_id,
                    op_resp,
                    frame_resp,
                } => {
                    let response = if self.listeners.contains_key(&device_id) {
                        Err(AppError::conflict(&format!(
                            "device {} already has a listener",
                            device_id
                        )))
                    } else {
                        self.listeners.insert(device_id, Listener::new(frame_resp));
                        Ok(())
                    };
                    let _ = op_resp.send(response);
                }
                Operation::Continue {
                    device_id,
                    op_resp,
                    frame_resp,
                } => {
                    let response = match self.listeners.get_mut(&device_id) {
                        Some(listener) => {
                            listener.frame_resp.replace(frame_resp);
                            Ok(())
                        }
                        None => Err(AppError::runtime(&format!(
                            "no listener for device {}",
                            device_id
                        ))),
                    };
                    let _ = op_resp.send(response);
                }
                Operation::Release { device_id, op_resp } => {
                    // Releasing twice is harmless.
                    self.listeners.remove(&device_id);
                    let _ = op_resp.send(Ok(()));
                }
                Operation::Deliver { frame } => {
                    self.deliver(&frame);
                }
            }
        }
    }

    fn deliver(&mut self, frame: &[u8]) {
        let message = match SysExMessage::parse(frame) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("dropping inbound frame: {}; {}", e, hex::encode(frame));
                return;
            }
        };
        let Some(listener) = self.listeners.get_mut(&message.device_id) else {
            log::debug!(
                "no listener for device {}, dropping {:?} frame",
                message.device_id,
                message.command
            );
            return;
        };
        let Some(frame_resp) = listener.frame_resp.take() else {
            log::warn!(
                "listener for device {} not ready, dropping {:?} frame",
                message.device_id,
                message.command
            );
            return;
        };
        if frame_resp.send(message).is_err() {
            log::debug!("listener went away before delivery");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysex::Command;

    async fn listen(tx: &Sender<Operation>, device_id: u8) -> oneshot::Receiver<SysExMessage> {
        let (op_resp, op_rx) = oneshot::channel();
        let (frame_resp, frame_rx) = oneshot::channel();
        tx.send(Operation::Listen {
            device_id,
            op_resp,
            frame_resp,
        })
        .await
        .unwrap();
        op_rx.await.unwrap().unwrap();
        return frame_rx;
    }

    #[tokio::test]
    async fn test_deliver_routes_by_device_id() {
        let (tx, _handle) = start();
        let frame_rx = listen(&tx, 3).await;

        let ack = SysExMessage::unaddressed(3, Command::Acknowledge);
        tx.send(Operation::Deliver {
            frame: ack.to_frame(),
        })
        .await
        .unwrap();

        let received = frame_rx.await.unwrap();
        assert_eq!(received.command, Command::Acknowledge);
        assert_eq!(received.device_id, 3);
    }

    #[tokio::test]
    async fn test_second_listener_conflicts() {
        let (tx, _handle) = start();
        let _frame_rx = listen(&tx, 5).await;

        let (op_resp, op_rx) = oneshot::channel();
        let (frame_resp, _frame_rx2) = oneshot::channel();
        tx.send(Operation::Listen {
            device_id: 5,
            op_resp,
            frame_resp,
        })
        .await
        .unwrap();
        let err = op_rx.await.unwrap().unwrap_err();
        assert_eq!(err.error_type, crate::error::ErrorType::StreamConflict);
    }

    #[tokio::test]
    async fn test_continue_renews_listener() {
        let (tx, _handle) = start();
        let frame_rx = listen(&tx, 0).await;

        let ack = SysExMessage::unaddressed(0, Command::Acknowledge);
        tx.send(Operation::Deliver {
            frame: ack.to_frame(),
        })
        .await
        .unwrap();
        frame_rx.await.unwrap();

        let (op_resp, op_rx) = oneshot::channel();
        let (frame_resp, frame_rx2) = oneshot::channel();
        tx.send(Operation::Continue {
            device_id: 0,
            op_resp,
            frame_resp,
        })
        .await
        .unwrap();
        op_rx.await.unwrap().unwrap();

        let eod = SysExMessage::unaddressed(0, Command::EndOfData);
        tx.send(Operation::Deliver {
            frame: eod.to_frame(),
        })
        .await
        .unwrap();
        assert_eq!(frame_rx2.await.unwrap().command, Command::EndOfData);
    }

    #[tokio::test]
    async fn test_release_then_listen_again() {
        let (tx, _handle) = start();
        let _frame_rx = listen(&tx, 7).await;

        let (op_resp, op_rx) = oneshot::channel();
        tx.send(Operation::Release {
            device_id: 7,
            op_resp,
        })
        .await
        .unwrap();
        op_rx.await.unwrap().unwrap();

        // slot is free again
        let _frame_rx = listen(&tx, 7).await;

        // releasing a device that has no listener still succeeds
        let (op_resp, op_rx) = oneshot::channel();
        tx.send(Operation::Release {
            device_id: 20,
            op_resp,
        })
        .await
        .unwrap();
        op_rx.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_foreign_frames_dropped() {
        let (tx, _handle) = start();
        let frame_rx = listen(&tx, 1).await;

        // wrong manufacturer, then a frame for a device nobody listens to;
        // neither may consume the listener's pending oneshot
        tx.send(Operation::Deliver {
            frame: vec![0xf0, 0x42, 0x01, 0x1e, 0x43, 0xf7],
        })
        .await
        .unwrap();
        let other = SysExMessage::unaddressed(9, Command::Acknowledge);
        tx.send(Operation::Deliver {
            frame: other.to_frame(),
        })
        .await
        .unwrap();

        let ours = SysExMessage::unaddressed(1, Command::EndOfData);
        tx.send(Operation::Deliver {
            frame: ours.to_frame(),
        })
        .await
        .unwrap();
        let received = frame_rx.await.unwrap();
        assert_eq!(received.device_id, 1);
        assert_eq!(received.command, Command::EndOfData);
    }
}
