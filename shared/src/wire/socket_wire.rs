//! Reliable message wire over a TCP stream.
//!
//! The wire outlives individual sockets: connectors hand it one stream after
//! another through [`SocketWire::connect`], and whatever the previous socket didn't
//! get acknowledged is sent again first.

use std::{
    io::Write,
    net::{Shutdown, TcpStream},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
    thread,
};

use log::{debug, info, trace, warn};
use replica_serde::BufferWriter;
use smol::channel::{unbounded, Receiver, Sender};

use crate::{
    lifetime::Lifetime,
    rd_id::RdId,
    sync::lock,
    wire::{
        frame::FrameHeader,
        heartbeat::Heartbeat,
        receiver::{FrameHandler, FrameReceiver},
        send_buffer::SendBuffer,
        Wire, WireBase, WireConfig, WireError,
    },
};

const DISCONNECTED: &str = "Disconnected";

pub struct SocketWire {
    id: String,
    config: WireConfig,
    lifetime: Lifetime,
    base: WireBase,
    send_buffer: Arc<SendBuffer>,
    // socket send lock, every frame write goes through it
    output: Mutex<Option<TcpStream>>,
    heartbeat: Mutex<Heartbeat>,
    acktor: Sender<i64>,
    // bumped on every connect and disconnect, stops stale heartbeat threads
    generation: AtomicU64,
    // survives reconnects so a message cut by a disconnect resumes
    receiver: Mutex<Option<FrameReceiver<TcpStream>>>,
}

impl SocketWire {
    /// Creates a disconnected wire. Its background threads end with `lifetime`.
    pub fn new(lifetime: &Lifetime, id: &str, config: WireConfig) -> Result<Arc<Self>, WireError> {
        let (acktor, acks): (Sender<i64>, Receiver<i64>) = unbounded();
        let send_buffer = SendBuffer::new(id, config.chunk_size);
        send_buffer.pause(DISCONNECTED);

        let wire = Arc::new(Self {
            id: id.to_string(),
            base: WireBase::new(config.delayed_delivery, config.max_message_length),
            heartbeat: Mutex::new(Heartbeat::new(config.max_heartbeat_delay)),
            config,
            lifetime: lifetime.clone(),
            send_buffer,
            output: Mutex::new(None),
            acktor,
            generation: AtomicU64::new(0),
            receiver: Mutex::new(None),
        });

        let weak = Arc::downgrade(&wire);
        wire.send_buffer.start(move |seqn, data| {
            let Some(wire) = weak.upgrade() else {
                return Err(WireError::Terminated(String::new()));
            };
            let header = FrameHeader::Data {
                length: data.len(),
                seqn,
            };
            let result = wire.write_frame(&header.to_bytes(), data);
            if let Err(err) = &result {
                warn!("{}: send failed, pausing: {}", wire.id, err);
                wire.send_buffer.pause(DISCONNECTED);
            }
            result
        })?;

        let weak = Arc::downgrade(&wire);
        thread::Builder::new()
            .name(format!("{}-acktor", id))
            .spawn(move || Self::run_acktor(weak, acks))?;

        let weak = Arc::downgrade(&wire);
        lifetime.on_termination(move || {
            if let Some(wire) = weak.upgrade() {
                wire.terminate();
            }
        });
        Ok(wire)
    }

    fn run_acktor(weak: Weak<Self>, acks: Receiver<i64>) {
        while let Ok(seqn) = acks.recv_blocking() {
            let Some(wire) = weak.upgrade() else {
                return;
            };
            let frame = FrameHeader::Ack { seqn }.to_bytes();
            if let Err(err) = wire.write_frame(&frame, &[]) {
                debug!("{}: ack {} not sent: {}", wire.id, seqn, err);
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &WireConfig {
        &self.config
    }

    pub fn send_buffer(&self) -> &Arc<SendBuffer> {
        &self.send_buffer
    }

    fn write_frame(&self, header: &[u8], payload: &[u8]) -> Result<(), WireError> {
        let mut output = lock(&self.output);
        let Some(stream) = output.as_mut() else {
            return Err(WireError::NotConnected(self.id.clone()));
        };
        stream.write_all(header)?;
        if !payload.is_empty() {
            stream.write_all(payload)?;
        }
        Ok(())
    }

    /// Runs one connection on the calling thread until the socket fails, the
    /// counterpart closes it or the wire terminates.
    pub fn connect(self: &Arc<Self>, stream: TcpStream) -> Result<(), WireError> {
        if !self.lifetime.is_alive() {
            return Err(WireError::Terminated(self.id.clone()));
        }
        stream.set_read_timeout(Some(self.config.receive_timeout))?;
        stream.set_nodelay(true)?;
        *lock(&self.output) = Some(stream.try_clone()?);
        info!("{}: connected to {:?}", self.id, stream.peer_addr().ok());

        *lock(&self.heartbeat) = Heartbeat::new(self.config.max_heartbeat_delay);
        self.send_buffer.reprocess_unacknowledged();
        self.send_buffer.resume(DISCONNECTED);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.start_heartbeat(generation)?;
        self.base.connected().set(true);
        self.base.heartbeat_alive().set(true);

        let result = self.receive_loop(&stream);

        self.base.connected().set(false);
        self.base.heartbeat_alive().set(false);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.send_buffer.pause(DISCONNECTED);
        if let Some(output) = lock(&self.output).take() {
            let _ = output.shutdown(Shutdown::Both);
        }
        info!("{}: disconnected", self.id);
        result
    }

    /// Closes the current socket, if any. The wire stays usable for the next one.
    pub fn disconnect(&self) {
        if let Some(output) = lock(&self.output).as_ref() {
            let _ = output.shutdown(Shutdown::Both);
        }
    }

    fn receive_loop(&self, stream: &TcpStream) -> Result<(), WireError> {
        let source = stream.try_clone()?;
        let mut receiver = match lock(&self.receiver).take() {
            Some(mut receiver) => {
                receiver.reconnect(source);
                receiver
            }
            None => FrameReceiver::new(source, 0, self.config.max_message_length),
        };
        let mut handler = SocketFrameHandler { wire: self };
        let result = loop {
            match receiver.read_message(&mut handler) {
                Ok(Some(message)) => self.base.deliver(message),
                Ok(None) => break Ok(()),
                Err(err) if err.is_recoverable() => continue,
                Err(err) => break Err(err),
            }
        };
        *lock(&self.receiver) = Some(receiver);
        result
    }

    fn start_heartbeat(self: &Arc<Self>, generation: u64) -> Result<(), WireError> {
        let weak = Arc::downgrade(self);
        let interval = self.config.heartbeat_interval;
        thread::Builder::new()
            .name(format!("{}-heartbeat", self.id))
            .spawn(move || loop {
                thread::sleep(interval);
                let Some(wire) = weak.upgrade() else {
                    return;
                };
                if wire.generation.load(Ordering::SeqCst) != generation
                    || !wire.lifetime.is_alive()
                {
                    return;
                }
                wire.ping();
            })?;
        Ok(())
    }

    fn ping(&self) {
        let tick = lock(&self.heartbeat).tick();
        if !tick.alive && self.base.heartbeat_alive().set(false) {
            debug!("{}: heartbeat lost, counterpart silent", self.id);
        }
        let frame = FrameHeader::Ping {
            timestamp: tick.timestamp,
            counterpart: tick.counterpart,
        }
        .to_bytes();
        if let Err(err) = self.write_frame(&frame, &[]) {
            debug!("{}: ping not sent: {}", self.id, err);
        }
    }

    fn terminate(&self) {
        debug!("{}: terminating", self.id);
        if !self.send_buffer.stop(self.config.stop_timeout) {
            warn!("{}: terminated with unsent data", self.id);
        }
        self.acktor.close();
        self.disconnect();
        self.base.connected().set(false);
    }
}

struct SocketFrameHandler<'w> {
    wire: &'w SocketWire,
}

impl FrameHandler for SocketFrameHandler<'_> {
    fn on_ack(&mut self, seqn: i64) {
        self.wire.send_buffer.acknowledge(seqn);
    }

    fn on_ping(&mut self, timestamp: i32, counterpart: i32) {
        let alive = lock(&self.wire.heartbeat).on_ping(timestamp, counterpart);
        if alive && self.wire.base.heartbeat_alive().set(true) {
            debug!("{}: heartbeat restored", self.wire.id);
        }
    }

    fn send_ack(&mut self, seqn: i64) {
        if self.wire.acktor.try_send(seqn).is_err() {
            trace!("{}: acktor closed, ack {} dropped", self.wire.id, seqn);
        }
    }

    fn keep_going(&self) -> bool {
        self.wire.lifetime.is_alive()
    }
}

impl Wire for SocketWire {
    fn send(&self, id: RdId, write: &mut dyn FnMut(&mut BufferWriter)) {
        let message = self.base.encode(id, write);
        self.send_buffer.put(&message);
    }

    fn base(&self) -> &WireBase {
        &self.base
    }
}
