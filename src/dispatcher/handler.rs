//! Request dispatcher and run loop
//!
//! The SP only talks when spoken to. Each cycle sleeps until the CP opens
//! a transfer, receives one request, and answers it. Wakes from any other
//! source go to the application's event hook.

use crate::comm::link::{CommError, CommLink};
use crate::comm::traits::LinkPins;
use crate::config::protocol::{
    BOARD_NAME, DATA_MESSAGE_VERSION, LABEL_MESSAGE_VERSION, LOW_SUPPLY_ERROR,
    MIN_SUPPLY_CENTIVOLTS,
};
use crate::config::sensor::CHANNELS;
use crate::dispatcher::traits::{Application, Flash, HardwareId, SupplyMonitor};
use crate::protocol::frame::{Frame, FrameError, MessageBuffer, MessageType, REPORT_LABEL};

/// What one pass of the run loop did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Woken by something other than a start condition
    Event,
    /// A request of this type byte was handled
    Handled(u8),
    /// Reception failed and an error report was sent
    LinkError(CommError),
}

/// SP core: owns the link and routes requests to the board
pub struct Core<P, A, F, V>
where
    P: LinkPins,
    A: Application,
    F: Flash,
    V: SupplyMonitor,
{
    link: CommLink<P>,
    app: A,
    flash: F,
    supply: V,
    hardware_id: HardwareId,
    pending_error: u16,
    message: MessageBuffer,
}

impl<P, A, F, V> Core<P, A, F, V>
where
    P: LinkPins,
    A: Application,
    F: Flash,
    V: SupplyMonitor,
{
    /// Create the core, loading the hardware ID from flash
    pub fn new(link: CommLink<P>, app: A, mut flash: F, supply: V) -> Self {
        let hardware_id = flash.hardware_id();
        Self {
            link,
            app,
            flash,
            supply,
            hardware_id,
            pending_error: 0,
            message: MessageBuffer::new(),
        }
    }

    pub fn hardware_id(&self) -> HardwareId {
        self.hardware_id
    }

    /// OR of the transducer returns from the last command
    pub fn pending_error(&self) -> u16 {
        self.pending_error
    }

    pub fn link(&self) -> &CommLink<P> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut CommLink<P> {
        &mut self.link
    }

    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Identify to the CP at the first transfer it opens
    pub async fn announce(&mut self) {
        while !self.link.wait_for_start_condition().await {
            self.app.event_trigger();
        }

        let supply = self.supply.supply_voltage();
        let frame = if supply < MIN_SUPPLY_CENTIVOLTS {
            log::warn!("Supply at {} cV, reporting low voltage", supply);
            let mut frame = Frame::new(MessageType::ReportError as u8, DATA_MESSAGE_VERSION);
            let _ = frame.extend_from_slice(&LOW_SUPPLY_ERROR);
            frame
        } else {
            log::info!("Identifying as {:?}", self.hardware_id);
            let mut frame = Frame::new(MessageType::Id as u8, DATA_MESSAGE_VERSION);
            let _ = frame.extend_from_slice(&self.hardware_id.to_bytes());
            frame
        };

        self.send(&frame).await;
    }

    /// Announce, then serve requests. Never returns.
    pub async fn run(&mut self) {
        self.announce().await;
        loop {
            self.run_once().await;
        }
    }

    /// Sleep until woken and serve at most one request
    pub async fn run_once(&mut self) -> Cycle {
        if !self.link.wait_for_start_condition().await {
            self.app.event_trigger();
            return Cycle::Event;
        }

        let request = match self.receive().await {
            Ok(request) => request,
            Err(error) => {
                log::warn!("Receive failed: {:?}", error);
                let mut reply = self.reply(MessageType::ReportError as u8, DATA_MESSAGE_VERSION);
                let _ = reply.push(error.code());
                self.send(&reply).await;
                return Cycle::LinkError(error);
            }
        };

        log::debug!("Request {:#04x}, {} payload bytes", request.kind, request.payload.len());

        match self.handle(&request).await {
            Ok(Some(reply)) => self.send(&reply).await,
            Ok(None) => {}
            Err(error) => {
                log::error!("Reply to {:#04x} failed: {:?}", request.kind, error);
                let reply = self.reply(MessageType::ReportError as u8, DATA_MESSAGE_VERSION);
                self.send(&reply).await;
            }
        }

        Cycle::Handled(request.kind)
    }

    async fn receive(&mut self) -> Result<Frame, CommError> {
        self.link.wait_for_message().await?;
        self.link.grab_message_from_buffer(&mut self.message)?;
        Frame::parse(&self.message).map_err(|_| CommError::LengthOutOfRange)
    }

    async fn send(&mut self, frame: &Frame) {
        if let Err(error) = self.link.send_message(&frame.to_bytes()).await {
            log::error!("Dropped reply {:#04x}: {:?}", frame.kind, error);
        }
    }

    /// Empty reply carrying the current shutdown permission
    fn reply(&self, kind: u8, version: u8) -> Frame {
        Frame::new(kind, version).with_shutdown(self.app.shutdown_allowed())
    }

    async fn handle(&mut self, request: &Frame) -> Result<Option<Frame>, FrameError> {
        let reply = match request.message_type() {
            Some(MessageType::Command) => {
                self.handle_command(request).await;
                None
            }
            Some(MessageType::RequestData) => Some(self.handle_request_data()),
            Some(MessageType::RequestLabel) => Some(self.handle_request_label(request)?),
            Some(MessageType::RequestBslPassword) => {
                let mut reply = self.reply(MessageType::RequestBslPassword as u8, DATA_MESSAGE_VERSION);
                reply.extend_from_slice(&self.flash.bsl_password())?;
                Some(reply)
            }
            Some(MessageType::Interrogate) => Some(self.handle_interrogate()?),
            Some(MessageType::SetSerialNumber) => Some(self.handle_set_serial_number(request)?),
            Some(MessageType::CommandSensorType) => {
                for channel in 1..=CHANNELS as u8 {
                    self.app.request_sensor_type(channel).await;
                }
                None
            }
            Some(MessageType::RequestSensorType) => {
                let mut reply = self.reply(MessageType::RequestSensorType as u8, DATA_MESSAGE_VERSION);
                for channel in 1..=CHANNELS as u8 {
                    reply.push(self.app.sensor_type(channel))?;
                }
                Some(reply)
            }
            _ => {
                log::warn!("Unsupported request {:#04x}", request.kind);
                Some(self.reply(MessageType::ReportError as u8, DATA_MESSAGE_VERSION))
            }
        };
        Ok(reply)
    }

    /// Confirm, then run each `[id, len, params...]` record in turn
    async fn handle_command(&mut self, request: &Frame) {
        let confirm = self.reply(MessageType::ConfirmCommand as u8, DATA_MESSAGE_VERSION);
        self.send(&confirm).await;

        self.pending_error = 0;
        let records = &request.payload;
        let mut idx = 0;
        while idx < records.len() {
            let id = records[idx];
            let Some(&len) = records.get(idx + 1) else {
                log::warn!("Command record {} has no length", id);
                break;
            };
            let start = idx + 2;
            let end = start + len as usize;
            let Some(params) = records.get(start..end) else {
                log::warn!("Command record {} truncated", id);
                break;
            };

            let result = self.app.dispatch(id, params).await;
            if result != 0 {
                log::warn!("Transducer {} returned {}", id, result);
            }
            self.pending_error |= result;
            idx = end;
        }
    }

    fn handle_request_data(&mut self) -> Frame {
        let kind = if self.pending_error != 0 {
            MessageType::ReportError
        } else {
            MessageType::ReportData
        };
        let mut reply = self.reply(kind as u8, DATA_MESSAGE_VERSION);
        self.app.fetch_readings(&mut reply.payload);
        reply
    }

    fn handle_request_label(&mut self, request: &Frame) -> Result<Frame, FrameError> {
        let index = request.payload.first().copied().unwrap_or(u8::MAX);
        let mut reply = self.reply(REPORT_LABEL, LABEL_MESSAGE_VERSION);
        reply.extend_from_slice(&self.app.fetch_label(index))?;
        Ok(reply)
    }

    fn handle_interrogate(&mut self) -> Result<Frame, FrameError> {
        let count = self.app.num_transducers();
        let mut reply = self.reply(MessageType::Interrogate as u8, DATA_MESSAGE_VERSION);
        reply.push(count)?;
        for id in 1..=count {
            reply.push(self.app.transducer_type(id))?;
            reply.push(self.app.sample_duration(id))?;
        }
        reply.extend_from_slice(&BOARD_NAME)?;
        Ok(reply)
    }

    /// The in-memory ID only changes once flash has accepted the new one
    fn handle_set_serial_number(&mut self, request: &Frame) -> Result<Frame, FrameError> {
        let Some(bytes) = request
            .payload
            .get(..8)
            .and_then(|bytes| <&[u8; 8]>::try_from(bytes).ok())
        else {
            log::warn!("Serial number payload too short");
            return Ok(self.reply(MessageType::ReportError as u8, DATA_MESSAGE_VERSION));
        };

        let requested = HardwareId::from_bytes(bytes);
        if let Err(error) = self.flash.store_hardware_id(&requested) {
            log::warn!("Serial number write failed: {:?}", error);
            return Ok(self.reply(MessageType::ReportError as u8, DATA_MESSAGE_VERSION));
        }

        self.hardware_id = self.flash.hardware_id();
        log::info!("Serial number now {:?}", self.hardware_id);

        let mut reply = self.reply(MessageType::SetSerialNumber as u8, DATA_MESSAGE_VERSION);
        reply.extend_from_slice(&self.hardware_id.to_bytes())?;
        Ok(reply)
    }
}
