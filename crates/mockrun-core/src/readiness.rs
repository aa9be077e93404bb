use crossbeam_channel::{Receiver, Select, Sender};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

pub const PROBE_INTERVAL: Duration = Duration::from_millis(250);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(120);

/// Sending half of a per-engine cancellation channel.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Sender<()>,
}

impl ShutdownHandle {
    /// Request cancellation. Never blocks; repeated signals coalesce.
    pub fn signal(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Receiving half of a per-engine cancellation channel.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: Receiver<()>,
}

impl ShutdownSignal {
    /// Discard a cancellation left over from a previous cycle.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_signalled(&self) -> bool {
        !self.rx.is_empty()
    }
}

pub fn shutdown_channel() -> (ShutdownHandle, ShutdownSignal) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (ShutdownHandle { tx }, ShutdownSignal { rx })
}

/// Polls a local TCP port until something accepts connections.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    interval: Duration,
    timeout: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            interval: PROBE_INTERVAL,
            timeout: PROBE_TIMEOUT,
        }
    }
}

impl ReadinessProbe {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns true once `127.0.0.1:port` accepts a connection, false on
    /// cancellation or when the timeout elapses.
    pub fn wait_until_ready(&self, port: u16, cancel: &ShutdownSignal) -> bool {
        self.wait_until_ready_any(port, &[cancel])
    }

    /// Like [`wait_until_ready`](Self::wait_until_ready), but any one of
    /// `cancels` firing ends the wait.
    pub fn wait_until_ready_any(&self, port: u16, cancels: &[&ShutdownSignal]) -> bool {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let deadline = Instant::now() + self.timeout;
        debug!("waiting for engine on port {port}");

        loop {
            match TcpStream::connect_timeout(&addr, self.interval) {
                Ok(_) => {
                    debug!("engine is up on port {port}");
                    return true;
                }
                Err(e) => trace!("port {port} not ready: {e}"),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    "engine did not become ready on port {port} within {}s",
                    self.timeout.as_secs()
                );
                return false;
            }

            let pause = self.interval.min(deadline - now);
            if cancelled_within(cancels, pause) {
                debug!("wait for port {port} cancelled");
                return false;
            }
        }
    }
}

/// Blocks for up to `pause`, returning true as soon as one of `cancels`
/// carries a signal.
fn cancelled_within(cancels: &[&ShutdownSignal], pause: Duration) -> bool {
    let until = Instant::now() + pause;
    let mut sel = Select::new();
    for cancel in cancels {
        sel.recv(&cancel.rx);
    }
    let mut live = cancels.len();

    while live > 0 {
        let Ok(oper) = sel.select_deadline(until) else {
            return false;
        };
        let index = oper.index();
        if oper.recv(&cancels[index].rx).is_ok() {
            return true;
        }
        // Every handle for this one is gone: it can never fire.
        sel.remove(index);
        live -= 1;
    }

    let now = Instant::now();
    if until > now {
        std::thread::sleep(until - now);
    }
    false
}
