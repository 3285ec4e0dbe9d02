//! TCP fan-out server: one compressed-frame stream to many clients.
//!
//! A dedicated accept thread owns the listener. Every accepted client gets a
//! `ConnectionSlot` with its own bounded frame queue and send thread, so a
//! slow or dead client can never stall the producer or its neighbors: the
//! queue overwrites its oldest pending frame under backpressure, and a send
//! error tears down only that one slot.
//!
//! `write()` serializes the frame once and fans the same `Arc` out to every
//! live queue.

use crate::container::{self, Frame};
use crate::error::{Error, Result};
use crossbeam_queue::ArrayQueue;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Frames a slow client may have pending before it starts losing the oldest.
const SEND_QUEUE_DEPTH: usize = 8;

/// Accept thread poll interval.
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Send thread idle sleep when its queue is empty.
const SEND_IDLE: Duration = Duration::from_millis(2);

/// Per-client write timeout; a client stalled longer than this is dropped.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

struct ConnectionSlot {
    addr: SocketAddr,
    stream: Arc<TcpStream>,
    queue: Arc<ArrayQueue<Arc<Vec<u8>>>>,
    alive: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Fan-out server for the compressed frame stream.
pub struct FrameServer {
    slots: Arc<Mutex<Vec<ConnectionSlot>>>,
    shutdown: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    closed: bool,
}

impl FrameServer {
    /// Bind the listener and start the accept thread.
    pub fn bind(addr: &str, max_clients: usize) -> Result<Self> {
        if max_clients == 0 {
            return Err(Error::InvalidConfig("max_clients must be at least 1".to_string()));
        }
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let slots: Arc<Mutex<Vec<ConnectionSlot>>> = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let accept_slots = Arc::clone(&slots);
        let accept_shutdown = Arc::clone(&shutdown);
        let accept_handle = thread::Builder::new()
            .name("frame-accept".to_string())
            .spawn(move || accept_loop(listener, accept_slots, accept_shutdown, max_clients))
            .map_err(|e| Error::Other(format!("failed to spawn accept thread: {}", e)))?;

        log::info!(
            "frame server listening on {} (max {} clients)",
            local_addr,
            max_clients
        );

        Ok(Self {
            slots,
            shutdown,
            accept_handle: Some(accept_handle),
            local_addr,
            closed: false,
        })
    }

    /// Actual bound address (useful with an ephemeral port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serialize once and enqueue to every connected client. Queues that are
    /// full lose their oldest pending frame.
    pub fn write(&self, frame: &Frame) -> Result<()> {
        self.write_serialized(Arc::new(container::serialize(frame)))
    }

    /// Fan out an already-serialized frame.
    pub fn write_serialized(&self, bytes: Arc<Vec<u8>>) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for slot in slots.iter() {
            if slot.alive.load(Ordering::Relaxed) {
                if slot.queue.force_push(Arc::clone(&bytes)).is_some() {
                    log::debug!("client {} lagging, dropped its oldest frame", slot.addr);
                }
            }
        }
        Ok(())
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|slot| slot.alive.load(Ordering::Relaxed))
            .count()
    }

    /// Stop the accept thread and every client slot, joining all threads.
    /// Idempotent; also runs from `Drop`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }

        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        for slot in slots.iter_mut() {
            slot.alive.store(false, Ordering::Relaxed);
            let _ = slot.stream.shutdown(Shutdown::Both);
            if let Some(handle) = slot.handle.take() {
                let _ = handle.join();
            }
        }
        slots.clear();
        log::info!("frame server on {} stopped", self.local_addr);
    }
}

impl Drop for FrameServer {
    fn drop(&mut self) {
        self.close();
    }
}

fn accept_loop(
    listener: TcpListener,
    slots: Arc<Mutex<Vec<ConnectionSlot>>>,
    shutdown: Arc<AtomicBool>,
    max_clients: usize,
) {
    while !shutdown.load(Ordering::Relaxed) {
        // Reap slots whose send thread has exited.
        {
            let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.retain_mut(|slot| {
                if slot.alive.load(Ordering::Relaxed) {
                    true
                } else {
                    if let Some(handle) = slot.handle.take() {
                        let _ = handle.join();
                    }
                    false
                }
            });
        }

        match listener.accept() {
            Ok((stream, addr)) => {
                let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
                if slots.len() >= max_clients {
                    log::warn!("refusing client {}: all {} slots in use", addr, max_clients);
                    drop(stream);
                    continue;
                }
                if let Err(e) = stream.set_write_timeout(Some(SEND_TIMEOUT)) {
                    log::warn!("failed to set write timeout for {}: {}", addr, e);
                }
                let _ = stream.set_nodelay(true);

                let stream = Arc::new(stream);
                let queue = Arc::new(ArrayQueue::new(SEND_QUEUE_DEPTH));
                let alive = Arc::new(AtomicBool::new(true));

                let thread_stream = Arc::clone(&stream);
                let thread_queue = Arc::clone(&queue);
                let thread_alive = Arc::clone(&alive);
                let thread_shutdown = Arc::clone(&shutdown);
                let handle = thread::Builder::new()
                    .name("frame-send".to_string())
                    .spawn(move || {
                        send_loop(thread_stream, addr, thread_queue, thread_alive, thread_shutdown)
                    });

                match handle {
                    Ok(handle) => {
                        log::info!("client connected: {}", addr);
                        slots.push(ConnectionSlot {
                            addr,
                            stream,
                            queue,
                            alive,
                            handle: Some(handle),
                        });
                    }
                    Err(e) => {
                        log::error!("failed to spawn send thread for {}: {}", addr, e);
                        let _ = stream.shutdown(Shutdown::Both);
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                // Accept errors are logged and retried; the server stays up.
                log::error!("accept error: {}", e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    log::debug!("accept thread exiting");
}

fn send_loop(
    stream: Arc<TcpStream>,
    addr: SocketAddr,
    queue: Arc<ArrayQueue<Arc<Vec<u8>>>>,
    alive: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) {
    while alive.load(Ordering::Relaxed) && !shutdown.load(Ordering::Relaxed) {
        match queue.pop() {
            Some(bytes) => {
                if let Err(e) = (&*stream).write_all(&bytes) {
                    log::info!("client {} dropped: {}", addr, e);
                    break;
                }
            }
            None => thread::sleep(SEND_IDLE),
        }
    }
    alive.store(false, Ordering::Relaxed);
    let _ = stream.shutdown(Shutdown::Both);
    log::debug!("send thread for {} exiting", addr);
}
