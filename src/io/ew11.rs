//! TCP link to the EW11 serial-to-IP gateway
//!
//! The link actor owns the connection: a read loop forwards raw chunks to
//! the bridge coordinator (socket mode only; in mixed mode the inbound path
//! runs over the broker) and a write loop drains the outbound frame channel.
//! Either loop exiting tears the connection down; reconnects retry forever
//! with a one second backoff.

use crate::infra::config::{CommMode, Config};
use crate::io::Inbound;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct Ew11Link {
    addr: String,
    buffer_size: usize,
    recv_delay: Duration,
    forward_reads: bool,
    inbound_tx: mpsc::Sender<Inbound>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
}

impl Ew11Link {
    pub fn new(
        config: &Config,
        inbound_tx: mpsc::Sender<Inbound>,
        outbound_rx: mpsc::Receiver<Vec<u8>>,
    ) -> Self {
        Self {
            addr: config.ew11_addr(),
            buffer_size: config.ew11_buffer_size(),
            recv_delay: config.serial_recv_delay(),
            forward_reads: config.mode() == CommMode::Socket,
            inbound_tx,
            outbound_rx: Arc::new(Mutex::new(outbound_rx)),
        }
    }

    /// Run the connect/reconnect loop until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(addr = %self.addr, forward_reads = self.forward_reads, "ew11_link_started");

        loop {
            let stream = match TcpStream::connect(&self.addr).await {
                Ok(s) => {
                    info!(addr = %self.addr, "ew11_connected");
                    s
                }
                Err(e) => {
                    warn!(addr = %self.addr, error = %e, "ew11_connect_failed");
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                info!("ew11_shutdown");
                                return;
                            }
                            continue;
                        }
                    }
                }
            };
            let _ = stream.set_nodelay(true);

            let (read_half, write_half) = tokio::io::split(stream);

            let mut read_handle = self.forward_reads.then(|| {
                let inbound_tx = self.inbound_tx.clone();
                let buffer_size = self.buffer_size;
                let recv_delay = self.recv_delay;
                tokio::spawn(read_loop(read_half, inbound_tx, buffer_size, recv_delay))
            });
            let mut write_handle = {
                let outbound_rx = self.outbound_rx.clone();
                tokio::spawn(write_loop(write_half, outbound_rx))
            };

            let mut shutting_down = false;
            tokio::select! {
                _ = join_optional(&mut read_handle) => {
                    warn!("ew11_read_loop_exited");
                }
                _ = &mut write_handle => {
                    warn!("ew11_write_loop_exited");
                }
                _ = shutdown.changed() => {
                    shutting_down = *shutdown.borrow();
                }
            }

            // Tear both loops down before reconnecting so the outbound
            // receiver lock is released.
            if let Some(h) = read_handle {
                h.abort();
            }
            write_handle.abort();

            if shutting_down {
                info!("ew11_shutdown");
                return;
            }

            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }
}

async fn join_optional(handle: &mut Option<JoinHandle<()>>) {
    match handle {
        Some(h) => {
            let _ = h.await;
        }
        None => std::future::pending().await,
    }
}

async fn read_loop(
    mut read_half: ReadHalf<TcpStream>,
    inbound_tx: mpsc::Sender<Inbound>,
    buffer_size: usize,
    recv_delay: Duration,
) {
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                warn!("ew11_connection_closed");
                return;
            }
            Ok(n) => {
                if inbound_tx.try_send(Inbound::Gateway(buf[..n].to_vec())).is_err() {
                    warn!("ew11_recv_dropped: channel full");
                }
                tokio::time::sleep(recv_delay).await;
            }
            Err(e) => {
                warn!(error = %e, "ew11_read_error");
                return;
            }
        }
    }
}

async fn write_loop(
    mut write_half: WriteHalf<TcpStream>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
) {
    let mut rx = outbound_rx.lock().await;
    while let Some(frame) = rx.recv().await {
        if let Err(e) = write_half.write_all(&frame).await {
            // The frame is lost here; the command retry machinery re-sends
            // after the reconnect.
            warn!(error = %e, "ew11_write_error");
            return;
        }
    }
}
