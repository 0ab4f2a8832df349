//! TCP acceptor.

use std::net::{SocketAddr, ToSocketAddrs};
use std::rc::Weak;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket};
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

use super::{Acceptor, AcceptorListener, StreamTransport};
use crate::status::{CallError, CallResult};

/// Listen backlog used when none is given.
pub const DEFAULT_BACKLOG: u32 = 1024;

/// Pause after a failed accept, so a persistent failure (out of file
/// descriptors) does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Accepts TCP clients and wraps each one in a [`StreamTransport`].
pub struct TcpAcceptor {
    addr: String,
    listener: Option<Weak<dyn AcceptorListener>>,
    local_addr: Option<SocketAddr>,
    task: Option<JoinHandle<()>>,
}

impl TcpAcceptor {
    /// Acceptor for `addr` (`"host:port"`; port 0 picks a free port).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            listener: None,
            local_addr: None,
            task: None,
        }
    }

    /// Address actually bound, once open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn bind(&self, backlog: u32) -> CallResult<TcpListener> {
        let addr = self
            .addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| CallError::transport(format!("No address for {}", self.addr)))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        Ok(socket.listen(backlog)?)
    }
}

async fn accept_loop(listener: TcpListener, sink: Weak<dyn AcceptorListener>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, error = %e, "set_nodelay failed");
                }
                debug!(%peer, "client accepted");
                let transport = StreamTransport::accepted(stream, format!("tcp://{}", peer));
                match sink.upgrade() {
                    Some(l) => l.on_client_accepted(Box::new(transport)),
                    None => return,
                }
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                match sink.upgrade() {
                    Some(l) => l.on_accept_error(&CallError::from(e)),
                    None => return,
                }
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}

impl Acceptor for TcpAcceptor {
    fn set_listener(&mut self, listener: Weak<dyn AcceptorListener>) {
        self.listener = Some(listener);
    }

    fn open(&mut self, max_pending: Option<u32>) -> CallResult<()> {
        if self.task.is_some() {
            return Err(CallError::already_open());
        }
        let sink = self
            .listener
            .clone()
            .ok_or_else(|| CallError::transport("Acceptor has no listener"))?;

        let listener = self.bind(max_pending.unwrap_or(DEFAULT_BACKLOG))?;
        self.local_addr = listener.local_addr().ok();
        debug!(addr = ?self.local_addr, "listening");

        self.task = Some(task::spawn_local(accept_loop(listener, sink)));
        Ok(())
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(addr = ?self.local_addr, "stopped listening");
        }
    }

    fn is_open(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for TcpAcceptor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::codes;
    use crate::testing::{wait_for, AcceptRecorder};
    use crate::transport::ConnectionState;
    use std::rc::Rc;
    use tokio::task::LocalSet;

    fn acceptor_with(recorder: &Rc<AcceptRecorder>) -> TcpAcceptor {
        let mut acceptor = TcpAcceptor::new("127.0.0.1:0");
        let weak = Rc::downgrade(recorder);
        acceptor.set_listener(weak);
        acceptor
    }

    #[tokio::test]
    async fn test_accepts_tcp_client() {
        LocalSet::new()
            .run_until(async {
                let recorder = Rc::new(AcceptRecorder::default());
                let mut acceptor = acceptor_with(&recorder);
                acceptor.open(None).unwrap();
                assert!(acceptor.is_open());

                let addr = acceptor.local_addr().unwrap();
                assert_ne!(addr.port(), 0);

                let _stream = tokio::net::TcpStream::connect(addr).await.unwrap();
                wait_for(|| recorder.accepted_count() == 1).await;

                let accepted = recorder.take_accepted();
                assert_eq!(accepted[0].state(), ConnectionState::Open);
            })
            .await;
    }

    #[tokio::test]
    async fn test_open_twice() {
        LocalSet::new()
            .run_until(async {
                let recorder = Rc::new(AcceptRecorder::default());
                let mut acceptor = acceptor_with(&recorder);
                acceptor.open(Some(16)).unwrap();

                let err = acceptor.open(Some(16)).unwrap_err();
                assert_eq!(err.code(), codes::ALREADY_OPEN);
            })
            .await;
    }

    #[tokio::test]
    async fn test_bind_failure_is_returned() {
        LocalSet::new()
            .run_until(async {
                let recorder = Rc::new(AcceptRecorder::default());
                let mut first = acceptor_with(&recorder);
                first.open(None).unwrap();
                let addr = first.local_addr().unwrap();

                let mut second = TcpAcceptor::new(addr.to_string());
                let weak = Rc::downgrade(&recorder);
                second.set_listener(weak);

                let err = second.open(None).unwrap_err();
                assert_eq!(err.code(), codes::TRANSPORT);
                assert!(!second.is_open());
            })
            .await;
    }

    #[tokio::test]
    async fn test_open_without_listener() {
        LocalSet::new()
            .run_until(async {
                let mut acceptor = TcpAcceptor::new("127.0.0.1:0");
                assert!(acceptor.open(None).is_err());
            })
            .await;
    }

    #[tokio::test]
    async fn test_close_stops_accepting() {
        LocalSet::new()
            .run_until(async {
                let recorder = Rc::new(AcceptRecorder::default());
                let mut acceptor = acceptor_with(&recorder);
                acceptor.open(None).unwrap();
                let addr = acceptor.local_addr().unwrap();

                acceptor.close();
                assert!(!acceptor.is_open());
                tokio::time::sleep(Duration::from_millis(20)).await;

                assert!(tokio::net::TcpStream::connect(addr).await.is_err());
            })
            .await;
    }
}
