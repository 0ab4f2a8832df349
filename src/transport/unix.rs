//! Unix Domain Socket acceptor.
//!
//! # Example
//!
//! ```ignore
//! use wirecall::transport::{generate_socket_path, UnixAcceptor};
//!
//! let acceptor = UnixAcceptor::new(generate_socket_path());
//! let service = Service::<MyEvent>::builder(acceptor).build()?;
//! ```

use std::path::{Path, PathBuf};
use std::rc::Weak;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::net::UnixListener;
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

use super::{Acceptor, AcceptorListener, StreamTransport};
use crate::status::{CallError, CallResult};

static SOCKET_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique socket path in the system temp directory.
///
/// Format: `{tmp}/wirecall-{pid}-{nanos:x}-{n}.sock`
pub fn generate_socket_path() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let n = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);

    std::env::temp_dir().join(format!(
        "wirecall-{}-{:x}-{}.sock",
        std::process::id(),
        nanos,
        n
    ))
}

/// Accepts clients on a Unix Domain Socket.
///
/// The socket file is removed before binding and again when the acceptor
/// closes or is dropped.
pub struct UnixAcceptor {
    path: PathBuf,
    listener: Option<Weak<dyn AcceptorListener>>,
    task: Option<JoinHandle<()>>,
}

impl UnixAcceptor {
    /// Acceptor bound to `path` on `open`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            listener: None,
            task: None,
        }
    }

    /// Acceptor on a fresh path from [`generate_socket_path`].
    pub fn temporary() -> Self {
        Self::new(generate_socket_path())
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn remove_socket_file(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove socket file");
            }
        }
    }
}

async fn accept_loop(listener: UnixListener, sink: Weak<dyn AcceptorListener>, label: String) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                debug!(socket = %label, "client accepted");
                let transport = StreamTransport::accepted(stream, label.clone());
                match sink.upgrade() {
                    Some(l) => l.on_client_accepted(Box::new(transport)),
                    None => return,
                }
            }
            Err(e) => {
                warn!(socket = %label, error = %e, "accept failed");
                match sink.upgrade() {
                    Some(l) => l.on_accept_error(&CallError::from(e)),
                    None => return,
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }
    }
}

impl Acceptor for UnixAcceptor {
    fn set_listener(&mut self, listener: Weak<dyn AcceptorListener>) {
        self.listener = Some(listener);
    }

    /// The listen backlog is the platform default; `max_pending` is ignored.
    fn open(&mut self, _max_pending: Option<u32>) -> CallResult<()> {
        if self.task.is_some() {
            return Err(CallError::already_open());
        }
        let sink = self
            .listener
            .clone()
            .ok_or_else(|| CallError::transport("Acceptor has no listener"))?;

        // Stale file from a previous run.
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        let listener = UnixListener::bind(&self.path)?;

        let label = format!("unix://{}", self.path.display());
        debug!(socket = %label, "listening");
        self.task = Some(task::spawn_local(accept_loop(listener, sink, label)));
        Ok(())
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.remove_socket_file();
        }
    }

    fn is_open(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for UnixAcceptor {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_for, AcceptRecorder};
    use std::rc::Rc;
    use tokio::task::LocalSet;

    #[test]
    fn test_generate_socket_path_format() {
        let path = generate_socket_path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();

        assert!(name.starts_with("wirecall-"));
        assert!(name.ends_with(".sock"));
        assert!(name.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_generate_socket_path_uniqueness() {
        let paths: Vec<PathBuf> = (0..10).map(|_| generate_socket_path()).collect();
        for (i, p1) in paths.iter().enumerate() {
            for p2 in &paths[i + 1..] {
                assert_ne!(p1, p2);
            }
        }
    }

    #[tokio::test]
    async fn test_accept_and_cleanup() {
        LocalSet::new()
            .run_until(async {
                let recorder = Rc::new(AcceptRecorder::default());
                let mut acceptor = UnixAcceptor::temporary();
                let weak = Rc::downgrade(&recorder);
                acceptor.set_listener(weak);
                acceptor.open(None).unwrap();

                let path = acceptor.path().to_path_buf();
                assert!(path.exists());

                let _stream = tokio::net::UnixStream::connect(&path).await.unwrap();
                wait_for(|| recorder.accepted_count() == 1).await;

                drop(acceptor);
                assert!(!path.exists());
            })
            .await;
    }

    #[tokio::test]
    async fn test_stale_socket_file_is_replaced() {
        LocalSet::new()
            .run_until(async {
                let path = generate_socket_path();
                std::fs::write(&path, b"stale").unwrap();

                let recorder = Rc::new(AcceptRecorder::default());
                let mut acceptor = UnixAcceptor::new(&path);
                let weak = Rc::downgrade(&recorder);
                acceptor.set_listener(weak);

                acceptor.open(None).unwrap();
                assert!(acceptor.is_open());
            })
            .await;
    }
}
