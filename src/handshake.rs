//! Flow-controlled transfers.
//!
//! Three exchange shapes share this engine. Direct requests and sets are
//! one-shot: one addressed frame out, at most one reply back. Bulk reads
//! and writes are handshaked: every data frame must be acknowledged before
//! the next one moves, and either side may abort with a rejection or an
//! error report. Every await is bounded by the step timeout; a device that
//! goes quiet mid-transfer never wedges the caller.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use tokio::{
    sync::{mpsc::Sender, oneshot},
    time::timeout,
};

use crate::error::{AppError, ErrorType};
use crate::nibble;
use crate::sysex::{self, Command, SysExMessage};
use crate::transport::{self, MidiPort};

type Result<T> = std::result::Result<T, AppError>;

/// Payload bytes per DataSet frame, before nibblization.
const DATA_SET_PAYLOAD: usize = 128;

#[derive(Debug, Clone)]
pub struct Timing {
    /// Longest wait for any single reply frame.
    pub step_timeout: Duration,
    /// Gap enforced before each outbound frame. The S-330 drops frames
    /// that arrive back to back.
    pub send_delay: Duration,
    /// How many times a bulk write announcement is sent before giving up.
    pub announce_attempts: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_millis(500),
            send_delay: Duration::from_millis(10),
            announce_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferState {
    Announced,
    Receiving,
    Sending,
    Closing,
}

fn set_state(flow: &str, state: &mut TransferState, next: TransferState) {
    log::debug!("{}: {:?} -> {:?}", flow, state, next);
    *state = next;
}

#[derive(Clone)]
pub struct Handshake {
    port: Arc<dyn MidiPort>,
    transport_tx: Sender<transport::Operation>,
    timing: Timing,
    write_gate: Arc<AtomicBool>,
}

impl Handshake {
    pub fn new(
        port: Arc<dyn MidiPort>,
        transport_tx: Sender<transport::Operation>,
        timing: Timing,
    ) -> Self {
        Self {
            port,
            transport_tx,
            timing,
            write_gate: Arc::new(AtomicBool::new(false)),
        }
    }

    // Direct transfers //////////////////////////////////////////

    /// Request one parameter block. `Ok(None)` means the device did not
    /// answer in time, which on this hardware usually means "no such
    /// device on this id", not a fault.
    pub async fn direct_request(
        &self,
        device_id: u8,
        address: [u8; 4],
        size: u32,
    ) -> Result<Option<Vec<u8>>> {
        let frame_rx = self.listen(device_id).await?;
        let result = self.direct_request_core(device_id, address, size, frame_rx).await;
        self.release(device_id).await;
        return result;
    }

    async fn direct_request_core(
        &self,
        device_id: u8,
        address: [u8; 4],
        size: u32,
        frame_rx: oneshot::Receiver<SysExMessage>,
    ) -> Result<Option<Vec<u8>>> {
        let request = SysExMessage::new(
            device_id,
            Command::RequestOne,
            address,
            sysex::encode_size(size).to_vec(),
        );
        self.send(&request).await?;

        let Ok(result) = timeout(self.timing.step_timeout, frame_rx).await else {
            log::debug!("direct request: no reply from device {}", device_id);
            return Ok(None);
        };
        let reply = result.map_err(|_| AppError::runtime("listener dropped"))?;
        match reply.command {
            Command::SetOne | Command::DataSet => Ok(Some(reply.data)),
            Command::Rejection => Err(AppError::rejected()),
            Command::CommunicationError => Err(AppError::device(reply.error_code().unwrap_or(0))),
            other => Err(AppError::runtime(&format!(
                "unexpected reply to direct request: {:?}",
                other
            ))),
        }
    }

    /// Set one parameter block. Returns whether the device confirmed;
    /// a missing confirmation is reported, not raised, because some
    /// firmware revisions apply the write and stay silent.
    pub async fn direct_set(&self, device_id: u8, address: [u8; 4], data: Vec<u8>) -> Result<bool> {
        let frame_rx = self.listen(device_id).await?;
        let result = self.direct_set_core(device_id, address, data, frame_rx).await;
        self.release(device_id).await;
        return result;
    }

    async fn direct_set_core(
        &self,
        device_id: u8,
        address: [u8; 4],
        data: Vec<u8>,
        frame_rx: oneshot::Receiver<SysExMessage>,
    ) -> Result<bool> {
        let request = SysExMessage::new(device_id, Command::SetOne, address, data);
        self.send(&request).await?;

        let Ok(result) = timeout(self.timing.step_timeout, frame_rx).await else {
            log::debug!("direct set: no confirmation from device {}", device_id);
            return Ok(false);
        };
        let reply = result.map_err(|_| AppError::runtime("listener dropped"))?;
        match reply.command {
            Command::Acknowledge => Ok(true),
            Command::Rejection => Err(AppError::rejected()),
            Command::CommunicationError => Err(AppError::device(reply.error_code().unwrap_or(0))),
            other => Err(AppError::runtime(&format!(
                "unexpected reply to direct set: {:?}",
                other
            ))),
        }
    }

    // Bulk transfers ////////////////////////////////////////////

    /// Read `size` bytes starting at `address`, acknowledging each data
    /// frame. The returned buffer is denibblized.
    pub async fn bulk_read(&self, device_id: u8, address: [u8; 4], size: u32) -> Result<Vec<u8>> {
        let frame_rx = self.listen(device_id).await?;
        let result = self.bulk_read_core(device_id, address, size, frame_rx).await;
        self.release(device_id).await;
        return result;
    }

    async fn bulk_read_core(
        &self,
        device_id: u8,
        address: [u8; 4],
        size: u32,
        init_frame_rx: oneshot::Receiver<SysExMessage>,
    ) -> Result<Vec<u8>> {
        let mut frame_rx = Some(init_frame_rx);
        let mut state = TransferState::Announced;

        let request = SysExMessage::new(
            device_id,
            Command::RequestData,
            address,
            sysex::encode_size(size).to_vec(),
        );
        self.send(&request).await?;

        let mut collected = Vec::with_capacity(size as usize);
        loop {
            let reply = self.next_frame(frame_rx.take().unwrap()).await?;
            match reply.command {
                Command::DataSet => {
                    set_state("bulk_read", &mut state, TransferState::Receiving);
                    collected.extend(nibble::decode(&reply.data));
                    // re-arm before acknowledging, the next frame can be
                    // on the wire the moment the device sees the ack
                    frame_rx.replace(self.continue_listen(device_id).await?);
                    self.send(&SysExMessage::unaddressed(device_id, Command::Acknowledge))
                        .await?;
                }
                Command::EndOfData => {
                    set_state("bulk_read", &mut state, TransferState::Closing);
                    self.send(&SysExMessage::unaddressed(device_id, Command::Acknowledge))
                        .await?;
                    return Ok(collected);
                }
                Command::Rejection => return Err(AppError::rejected()),
                Command::CommunicationError => {
                    return Err(AppError::device(reply.error_code().unwrap_or(0)));
                }
                other => {
                    return Err(AppError::runtime(&format!(
                        "unexpected frame during bulk read: {:?}",
                        other
                    )));
                }
            }
        }
    }

    /// Write `payload` starting at `address`. Only one bulk write may be
    /// in flight at a time across all devices; a second caller gets a
    /// `StreamConflict` instead of interleaving frames on the wire.
    pub async fn bulk_write(&self, device_id: u8, address: [u8; 4], payload: &[u8]) -> Result<()> {
        if self.write_gate.swap(true, Ordering::SeqCst) {
            return Err(AppError::conflict("another bulk write is in flight"));
        }
        let result = self.bulk_write_gated(device_id, address, payload).await;
        self.write_gate.store(false, Ordering::SeqCst);
        return result;
    }

    async fn bulk_write_gated(
        &self,
        device_id: u8,
        address: [u8; 4],
        payload: &[u8],
    ) -> Result<()> {
        let frame_rx = self.listen(device_id).await?;
        let result = self
            .bulk_write_core(device_id, address, payload, frame_rx)
            .await;
        self.release(device_id).await;
        return result;
    }

    async fn bulk_write_core(
        &self,
        device_id: u8,
        address: [u8; 4],
        payload: &[u8],
        init_frame_rx: oneshot::Receiver<SysExMessage>,
    ) -> Result<()> {
        let mut frame_rx = Some(init_frame_rx);
        let mut state = TransferState::Announced;

        let announce = SysExMessage::new(
            device_id,
            Command::WantToSend,
            address,
            sysex::encode_size(payload.len() as u32).to_vec(),
        );
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.send(&announce).await?;
            match self.next_frame(frame_rx.take().unwrap()).await {
                Ok(reply) => {
                    expect_ack("bulk_write announce", reply)?;
                    break;
                }
                Err(e)
                    if e.error_type == ErrorType::Timeout
                        && attempt < self.timing.announce_attempts =>
                {
                    log::warn!(
                        "no answer to write announcement, retrying ({}/{})",
                        attempt,
                        self.timing.announce_attempts
                    );
                    frame_rx.replace(self.continue_listen(device_id).await?);
                }
                Err(e) => return Err(e),
            }
        }

        set_state("bulk_write", &mut state, TransferState::Sending);
        // device addresses step per nibble, so a byte advances by two
        let base = sysex::decode_size(&address);
        for (i, chunk) in payload.chunks(DATA_SET_PAYLOAD).enumerate() {
            let chunk_address = sysex::encode_size(base + (i * DATA_SET_PAYLOAD * 2) as u32);
            let data_set = SysExMessage::new(
                device_id,
                Command::DataSet,
                chunk_address,
                nibble::encode(chunk),
            );
            frame_rx.replace(self.continue_listen(device_id).await?);
            self.send(&data_set).await?;
            expect_ack("bulk_write data", self.next_frame(frame_rx.take().unwrap()).await?)?;
        }

        set_state("bulk_write", &mut state, TransferState::Closing);
        frame_rx.replace(self.continue_listen(device_id).await?);
        self.send(&SysExMessage::unaddressed(device_id, Command::EndOfData))
            .await?;
        expect_ack("bulk_write end", self.next_frame(frame_rx.take().unwrap()).await?)?;
        return Ok(());
    }

    // Plumbing //////////////////////////////////////////////////

    async fn send(&self, message: &SysExMessage) -> Result<()> {
        return transport::send_frame(&self.port, message, self.timing.send_delay).await;
    }

    async fn next_frame(&self, frame_rx: oneshot::Receiver<SysExMessage>) -> Result<SysExMessage> {
        let Ok(result) = timeout(self.timing.step_timeout, frame_rx).await else {
            return Err(AppError::timeout());
        };
        return result.map_err(|_| AppError::runtime("listener dropped"));
    }

    async fn listen(&self, device_id: u8) -> Result<oneshot::Receiver<SysExMessage>> {
        return self.listen_or_continue(device_id, true).await;
    }

    async fn continue_listen(&self, device_id: u8) -> Result<oneshot::Receiver<SysExMessage>> {
        return self.listen_or_continue(device_id, false).await;
    }

    async fn listen_or_continue(
        &self,
        device_id: u8,
        is_start: bool,
    ) -> Result<oneshot::Receiver<SysExMessage>> {
        let (op_resp, op_rx) = oneshot::channel();
        let (frame_resp, frame_rx) = oneshot::channel();
        let operation = if is_start {
            transport::Operation::Listen {
                device_id,
                op_resp,
                frame_resp,
            }
        } else {
            transport::Operation::Continue {
                device_id,
                op_resp,
                frame_resp,
            }
        };
        self.transport_tx
            .send(operation)
            .await
            .map_err(|_| AppError::runtime("frame router is gone"))?;
        op_rx
            .await
            .map_err(|_| AppError::runtime("frame router is gone"))??;
        return Ok(frame_rx);
    }

    async fn release(&self, device_id: u8) {
        let (op_resp, op_rx) = oneshot::channel();
        let sent = self
            .transport_tx
            .send(transport::Operation::Release { device_id, op_resp })
            .await;
        if sent.is_err() {
            log::error!("frame router is gone, cannot release device {}", device_id);
            return;
        }
        let _ = op_rx.await;
    }
}

fn expect_ack(step: &str, reply: SysExMessage) -> Result<()> {
    match reply.command {
        Command::Acknowledge => Ok(()),
        Command::Rejection => Err(AppError::rejected()),
        Command::CommunicationError => Err(AppError::device(reply.error_code().unwrap_or(0))),
        other => Err(AppError::runtime(&format!(
            "{}: expected ack, got {:?}",
            step, other
        ))),
    }
}
