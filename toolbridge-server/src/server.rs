use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::serve_connection;
use crate::error::ServerError;
use crate::handler::Handler;
use crate::pool::Pools;

const LISTEN_BACKLOG: u32 = 1024;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// State shared by the accept loop and every connection task.
pub(crate) struct Shared<H> {
    pub(crate) config: ServerConfig,
    pub(crate) pools: Pools,
    pub(crate) handler: H,
    pub(crate) keep_alive_hint: String,
}

impl<H> Shared<H> {
    pub(crate) fn new(config: ServerConfig, handler: H) -> Self {
        Self {
            keep_alive_hint: config.keep_alive.hint(),
            pools: Pools::new(&config.pool),
            config,
            handler,
        }
    }
}

/// A bound listener plus everything its connections share.
pub struct Server<H> {
    shared: Arc<Shared<H>>,
    listener: TcpListener,
    local_addr: SocketAddr,
    stop: CancellationToken,
    tracker: TaskTracker,
}

/// Ends a server's accept loop without touching its open connections.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stop: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl<H: Handler> Server<H> {
    /// Binds the configured endpoint. The listening handle is made
    /// non-inheritable before it starts listening.
    pub async fn bind(config: ServerConfig, handler: H) -> Result<Self, ServerError> {
        config.validate()?;
        let addr = config.listen_addr();
        let resolved = tokio::net::lookup_host(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ServerError::Config(format!("{addr} resolves to no address")))?;

        let listener = listen(resolved).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening");

        Ok(Self {
            shared: Arc::new(Shared::new(config, handler)),
            listener,
            local_addr,
            stop: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
        }
    }

    /// Accepts until stopped, with no process-wide cancellation.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.run_until(CancellationToken::new()).await
    }

    /// Accepts connections until `cancel` fires or the server is stopped.
    ///
    /// Each connection runs as its own task. Cancelling `cancel` also aborts
    /// those tasks; stopping only ends the accept loop and lets connections
    /// close after their current exchange.
    pub async fn run_until(&self, cancel: CancellationToken) -> Result<(), ServerError> {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.stop.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, remote)) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%remote, error = %err, "could not disable nagle");
                    }
                    self.tracker.spawn(serve_connection(
                        Arc::clone(&self.shared),
                        stream,
                        remote,
                        cancel.clone(),
                        self.stop.clone(),
                    ));
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        info!(local_addr = %self.local_addr, "accept loop stopped");
        Ok(())
    }

    /// Waits for every connection task spawned so far to finish.
    pub async fn wait_for_connections(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Number of connection tasks still running.
    pub fn active_connections(&self) -> usize {
        self.tracker.len()
    }
}

fn listen(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    mark_non_inheritable(&socket)?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Keeps the listening handle out of child processes the host spawns.
#[cfg(unix)]
fn mark_non_inheritable(socket: &TcpSocket) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let fd = socket.as_raw_fd();
    // SAFETY: `fd` is a valid descriptor owned by `socket` for this call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: as above; only the close-on-exec bit is added.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Sockets are already created with `WSA_FLAG_NO_HANDLE_INHERIT` here.
#[cfg(not(unix))]
fn mark_non_inheritable(_socket: &TcpSocket) -> std::io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::fd::AsRawFd;

    use tokio::net::TcpSocket;

    use super::mark_non_inheritable;

    #[tokio::test]
    async fn sets_close_on_exec() {
        let socket = TcpSocket::new_v4().unwrap();
        mark_non_inheritable(&socket).unwrap();

        let flags = unsafe { libc::fcntl(socket.as_raw_fd(), libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }
}
