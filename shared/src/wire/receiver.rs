use std::io::Read;

use log::{trace, warn};

use crate::wire::{
    buffer_window::BufferWindow,
    error::is_recoverable_io,
    frame::{FrameHeader, HEADER_LENGTH},
    WireError,
};

const SOCKET_BUFFER_SIZE: usize = 16_384;

/// Side effects of control frames and accepted data frames
pub trait FrameHandler {
    /// The counterpart acknowledged one of our data frames
    fn on_ack(&mut self, seqn: i64);

    fn on_ping(&mut self, timestamp: i32, counterpart: i32);

    /// Acknowledge a data frame we received
    fn send_ack(&mut self, seqn: i64);

    /// Polled after every read timeout, false stops the receiver
    fn keep_going(&self) -> bool;
}

// Outcome of pulling bytes out of the package chain
enum Progress {
    Complete,
    Ended,
    // The counterpart started its sequence over, a new package is waiting
    Restarted,
}

/// Decodes the inbound byte stream into messages.
///
/// Three owned buffers are chained: raw socket reads, the payload of the current
/// data frame, and the message being assembled, which may span several frames.
/// A receiver outlives its connection: after [`FrameReceiver::reconnect`] a
/// message cut by the disconnect resumes with the frames that follow.
pub struct FrameReceiver<R> {
    source: R,
    socket: BufferWindow,
    package: BufferWindow,
    message: Vec<u8>,
    length_bytes: [u8; 4],
    length_filled: usize,
    message_filled: usize,
    reading_body: bool,
    // No data frame seen yet on the current connection
    fresh: bool,
    max_received_seqn: i64,
    max_message_length: usize,
}

impl<R: Read> FrameReceiver<R> {
    pub fn new(source: R, max_received_seqn: i64, max_message_length: usize) -> Self {
        Self {
            source,
            socket: BufferWindow::new(SOCKET_BUFFER_SIZE),
            package: BufferWindow::new(SOCKET_BUFFER_SIZE),
            message: Vec::new(),
            length_bytes: [0; 4],
            length_filled: 0,
            message_filled: 0,
            reading_body: false,
            fresh: true,
            max_received_seqn,
            max_message_length,
        }
    }

    /// Highest data frame sequence number accepted so far
    pub fn max_received_seqn(&self) -> i64 {
        self.max_received_seqn
    }

    /// Continues on a new connection. Socket bytes of the old one are dropped,
    /// the accepted package and the partially assembled message are kept.
    pub fn reconnect(&mut self, source: R) {
        self.source = source;
        self.socket.clear();
        self.fresh = true;
    }

    /// Next complete message, or `None` once the stream ended or the handler asked
    /// to stop. A message cut short stays pending for the next call.
    pub fn read_message(
        &mut self,
        handler: &mut dyn FrameHandler,
    ) -> Result<Option<&[u8]>, WireError> {
        loop {
            match self.fill_message(handler)? {
                Progress::Complete => return Ok(Some(&self.message)),
                Progress::Ended => return Ok(None),
                Progress::Restarted => self.discard_partial_message(),
            }
        }
    }

    fn fill_message(&mut self, handler: &mut dyn FrameHandler) -> Result<Progress, WireError> {
        if !self.reading_body {
            let mut length_bytes = self.length_bytes;
            let mut filled = self.length_filled;
            let progress = self.read_from_packages(&mut length_bytes, &mut filled, handler);
            self.length_bytes = length_bytes;
            self.length_filled = filled;
            match progress? {
                Progress::Complete => {}
                other => return Ok(other),
            }

            self.length_filled = 0;
            let length = i32::from_le_bytes(self.length_bytes);
            if length < 0 {
                return Err(WireError::InvalidMessageLength(length));
            }
            let length = length as usize;
            if length > self.max_message_length {
                warn!("Possible OOM: receiving message of {} bytes", length);
            }
            self.message.clear();
            self.message.resize(length, 0);
            self.message_filled = 0;
            self.reading_body = true;
        }

        let mut message = std::mem::take(&mut self.message);
        let mut filled = self.message_filled;
        let progress = self.read_from_packages(&mut message, &mut filled, handler);
        self.message = message;
        self.message_filled = filled;
        let progress = progress?;
        if let Progress::Complete = progress {
            self.reading_body = false;
        }
        Ok(progress)
    }

    fn discard_partial_message(&mut self) {
        if self.reading_body || self.length_filled > 0 {
            warn!("Dropping a partially received message, the counterpart restarted");
        }
        self.length_filled = 0;
        self.message_filled = 0;
        self.reading_body = false;
    }

    fn read_from_packages(
        &mut self,
        dst: &mut [u8],
        filled: &mut usize,
        handler: &mut dyn FrameHandler,
    ) -> Result<Progress, WireError> {
        while *filled < dst.len() {
            if self.package.available() == 0 {
                match self.next_package(handler)? {
                    Progress::Complete => {}
                    other => return Ok(other),
                }
            }
            *filled += self.package.take_into(&mut dst[*filled..]);
        }
        Ok(Progress::Complete)
    }

    // Consumes frames until a new data frame fills the package buffer
    fn next_package(&mut self, handler: &mut dyn FrameHandler) -> Result<Progress, WireError> {
        loop {
            let mut header_bytes = [0u8; HEADER_LENGTH];
            if !self.read_from_socket(&mut header_bytes, handler)? {
                return Ok(Progress::Ended);
            }
            match FrameHeader::parse(&header_bytes)? {
                FrameHeader::Ack { seqn } => handler.on_ack(seqn),
                FrameHeader::Ping {
                    timestamp,
                    counterpart,
                } => handler.on_ping(timestamp, counterpart),
                FrameHeader::Data { length, seqn } => {
                    let mut package = std::mem::replace(&mut self.package, BufferWindow::new(0));
                    let complete = self.read_from_socket(package.reset_for(length), handler);
                    self.package = package;
                    match complete {
                        Ok(true) => {}
                        Ok(false) => {
                            self.package.clear();
                            return Ok(Progress::Ended);
                        }
                        Err(err) => {
                            self.package.clear();
                            return Err(err);
                        }
                    }
                    handler.send_ack(seqn);

                    let restarted = self.fresh && seqn == 1 && self.max_received_seqn > 1;
                    self.fresh = false;
                    if restarted {
                        warn!(
                            "Counterpart restarted its sequence, had received up to {}",
                            self.max_received_seqn
                        );
                        self.max_received_seqn = 0;
                    }
                    if seqn <= self.max_received_seqn {
                        trace!(
                            "Duplicate frame {} dropped, already received up to {}",
                            seqn,
                            self.max_received_seqn
                        );
                        self.package.clear();
                        continue;
                    }
                    self.max_received_seqn = seqn;
                    if restarted {
                        return Ok(Progress::Restarted);
                    }
                    if length > 0 {
                        return Ok(Progress::Complete);
                    }
                }
            }
        }
    }

    fn read_from_socket(
        &mut self,
        dst: &mut [u8],
        handler: &mut dyn FrameHandler,
    ) -> Result<bool, WireError> {
        let mut filled = 0;
        while filled < dst.len() {
            if self.socket.available() == 0 {
                match self.socket.fill_from(&mut self.source) {
                    Ok(0) => return Ok(false),
                    Ok(_) => {}
                    Err(err) if is_recoverable_io(&err) => {
                        if !handler.keep_going() {
                            return Ok(false);
                        }
                        continue;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            filled += self.socket.take_into(&mut dst[filled..]);
        }
        Ok(true)
    }
}
