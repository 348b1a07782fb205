// vfs/src/backend/mod.rs

//! HTTP fetch backend: one thread owning the page cache engine, serving
//! every consumer channel over the rendezvous protocol.

mod actor;

use crate::rendezvous::{Envelope, Rendezvous, SharedRegion};
use crate::{Result, VfsError};
use actor::{Actor, Control, Mailbox};
use httpvfs_core::VfsConfig;
use httpvfs_storage::Transport;
use log::{debug, error, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc::{self, UnboundedSender};

const THREAD_NAME: &str = "httpvfs-backend";

/// Consumer end of a completed handshake.
pub struct BackendChannel {
    pub id: u64,
    endpoint: UnboundedSender<Envelope>,
    region: Arc<SharedRegion>,
}

impl BackendChannel {
    pub fn into_rendezvous(self, config: &VfsConfig) -> Rendezvous {
        Rendezvous::new(self.endpoint, self.region, config.timeout)
    }
}

/// Control handle of a running backend thread.
pub struct BackendHandle {
    control: Mailbox,
    thread: Option<JoinHandle<()>>,
    next_id: AtomicU64,
    config: VfsConfig,
}

impl BackendHandle {
    /// Starts the backend thread and initializes its engine with `config`.
    pub fn spawn<T>(config: VfsConfig, transport: T) -> Result<Self>
    where
        T: Transport + Send + 'static,
    {
        let (control, inbox) = mpsc::unbounded_channel();

        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        error!("Failed to start backend runtime: {}", err);
                        return;
                    }
                };
                let local = tokio::task::LocalSet::new();
                local.block_on(&runtime, Actor::new(transport, inbox).run());
                debug!("backend thread exiting");
            })?;

        control
            .send(Control::Init {
                config: config.clone(),
            })
            .map_err(|_| VfsError::Disconnected)?;
        info!("started {} thread", THREAD_NAME);

        Ok(Self {
            control,
            thread: Some(thread),
            next_id: AtomicU64::new(1),
            config,
        })
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    /// Opens a new consumer channel and waits for the backend to hand over
    /// its shared region.
    pub fn create_channel(&self) -> Result<BackendChannel> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (endpoint, requests) = mpsc::unbounded_channel();
        let (ack, acked) = sync_channel(1);

        self.control
            .send(Control::Handshake {
                id,
                endpoint: requests,
                ack,
            })
            .map_err(|_| VfsError::Disconnected)?;

        let region = match acked.recv_timeout(self.config.timeout) {
            Ok(region) => region,
            Err(RecvTimeoutError::Timeout) => {
                error!("Backend timeout on handshake for consumer {}", id);
                return Err(VfsError::Timeout(self.config.timeout));
            }
            Err(RecvTimeoutError::Disconnected) => return Err(VfsError::Disconnected),
        };

        debug!("consumer {} got a {} byte region", id, region.capacity());
        Ok(BackendChannel {
            id,
            endpoint,
            region,
        })
    }

    /// Stops the backend and joins its thread. Callers blocked on a request
    /// are released with a disconnect.
    pub fn close(mut self) -> Result<()> {
        let (ack, acked) = sync_channel(1);
        self.control
            .send(Control::Close { ack })
            .map_err(|_| VfsError::Disconnected)?;

        match acked.recv_timeout(self.config.timeout) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => {
                error!("Backend did not acknowledge close within {:?}", self.config.timeout);
                return Err(VfsError::Timeout(self.config.timeout));
            }
            Err(RecvTimeoutError::Disconnected) => return Err(VfsError::Disconnected),
        }

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("{} thread panicked", THREAD_NAME);
            }
        }
        info!("backend closed");
        Ok(())
    }

    /// Drops the control endpoint without waiting. The thread exits once it
    /// sees the endpoint closed.
    pub fn terminate(self) {
        debug!("terminating backend");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendezvous::{DISCONNECTED, TIMED_OUT};
    use httpvfs_core::Request;
    use httpvfs_storage::mocks::{sample_database, MockOrigin};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const URL: &str = "http://h/db";

    fn config() -> VfsConfig {
        VfsConfig::default().with_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_channel_round_trip() {
        let origin = MockOrigin::new().with_file(URL, sample_database(1024, 4));
        let backend = BackendHandle::spawn(config(), origin).unwrap();

        let rendezvous = backend.create_channel().unwrap().into_rendezvous(backend.config());
        assert_eq!(rendezvous.capacity(), 4096);
        assert_eq!(rendezvous.send_and_wait(Request::open(URL)), 0);
        assert_eq!(rendezvous.send_and_wait(Request::file_size(URL)), 0);
        let size = rendezvous.read_payload(|data| u64::from_le_bytes(data.try_into().unwrap()));
        assert_eq!(size, 4096);

        backend.close().unwrap();
    }

    #[test]
    fn test_channels_share_one_cache() {
        let origin = MockOrigin::new().with_file(URL, sample_database(1024, 4));
        let backend = BackendHandle::spawn(config(), origin.clone()).unwrap();

        let first = backend.create_channel().unwrap().into_rendezvous(backend.config());
        let second = backend.create_channel().unwrap().into_rendezvous(backend.config());

        assert_eq!(first.send_and_wait(Request::open(URL)), 0);
        assert_eq!(first.send_and_wait(Request::read(URL, 0, 1024)), 0);
        assert_eq!(second.send_and_wait(Request::open(URL)), 0);
        assert_eq!(second.send_and_wait(Request::read(URL, 0, 1024)), 0);

        assert_eq!(origin.probe_count(), 1);
        assert_eq!(origin.ranges().len(), 1);

        backend.close().unwrap();
    }

    #[test]
    fn test_timeout_then_recovery() {
        let origin = MockOrigin::new().with_file(URL, sample_database(1024, 4));
        origin.set_latency(Duration::from_millis(300));
        let config = config().with_timeout(Duration::from_millis(50));
        let backend = BackendHandle::spawn(config.clone(), origin.clone()).unwrap();
        let rendezvous = backend
            .create_channel()
            .unwrap()
            .into_rendezvous(&config);

        assert_eq!(rendezvous.send_and_wait(Request::open(URL)), TIMED_OUT);

        // The open finishes in the background and lands in the engine
        thread::sleep(Duration::from_millis(400));
        origin.set_latency(Duration::ZERO);
        assert_eq!(rendezvous.send_and_wait(Request::file_size(URL)), 0);
        let size = rendezvous.read_payload(|data| u64::from_le_bytes(data.try_into().unwrap()));
        assert_eq!(size, 4096);
        assert_eq!(origin.probe_count(), 1);

        backend.terminate();
    }

    #[test]
    fn test_close_releases_blocked_caller() {
        let origin = MockOrigin::new().with_file(URL, sample_database(1024, 4));
        origin.set_latency(Duration::from_secs(2));
        let backend = BackendHandle::spawn(config(), origin).unwrap();
        let rendezvous = backend.create_channel().unwrap().into_rendezvous(backend.config());

        let caller = thread::spawn(move || rendezvous.send_and_wait(Request::open(URL)));
        thread::sleep(Duration::from_millis(50));
        backend.close().unwrap();

        assert_eq!(caller.join().unwrap(), DISCONNECTED);
    }

    #[test]
    fn test_terminate_disconnects_consumers() {
        let origin = MockOrigin::new().with_file(URL, sample_database(1024, 4));
        let backend = BackendHandle::spawn(config(), origin).unwrap();
        let rendezvous = backend.create_channel().unwrap().into_rendezvous(backend.config());

        backend.terminate();
        thread::sleep(Duration::from_millis(200));

        assert_eq!(rendezvous.send_and_wait(Request::open(URL)), DISCONNECTED);
    }
}
