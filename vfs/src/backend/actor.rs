// vfs/src/backend/actor.rs

use crate::rendezvous::{Envelope, SharedRegion};
use bytes::Bytes;
use httpvfs_core::{Operation, Request, VfsConfig};
use httpvfs_storage::{PageCacheEngine, StorageError, Transport};
use log::{debug, error, info, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Messages on the backend's control endpoint.
pub(crate) enum Control {
    Init {
        config: VfsConfig,
    },
    Handshake {
        id: u64,
        endpoint: UnboundedReceiver<Envelope>,
        ack: SyncSender<Arc<SharedRegion>>,
    },
    Close {
        ack: SyncSender<()>,
    },
}

pub(crate) type Mailbox = UnboundedSender<Control>;

struct Consumer {
    region: Arc<SharedRegion>,
}

type Consumers = Rc<RefCell<HashMap<u64, Consumer>>>;

/// Owns the engine and serves every consumer channel. Runs on the
/// backend thread's `LocalSet`; nothing here is `Send`.
pub(crate) struct Actor<T> {
    transport: Option<T>,
    engine: Option<PageCacheEngine<T>>,
    region_size: usize,
    consumers: Consumers,
    control: UnboundedReceiver<Control>,
}

impl<T: Transport + 'static> Actor<T> {
    pub(crate) fn new(transport: T, control: UnboundedReceiver<Control>) -> Self {
        Self {
            transport: Some(transport),
            engine: None,
            region_size: 0,
            consumers: Rc::new(RefCell::new(HashMap::new())),
            control,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(message) = self.control.recv().await {
            match message {
                Control::Init { config } => self.init(config),
                Control::Handshake { id, endpoint, ack } => self.handshake(id, endpoint, ack),
                Control::Close { ack } => {
                    self.close();
                    if ack.send(()).is_err() {
                        warn!("close was not awaited");
                    }
                    return;
                }
            }
        }
        debug!("control endpoint dropped, backend exiting");
        self.close();
    }

    fn init(&mut self, config: VfsConfig) {
        let Some(transport) = self.transport.take() else {
            warn!("backend already initialized, ignoring init");
            return;
        };
        self.region_size = config.max_page_size;
        self.engine = Some(PageCacheEngine::new(transport, &config));
        info!(
            "backend ready, cache {} bytes, max page size {}",
            config.cache_bytes(),
            config.max_page_size
        );
    }

    fn handshake(
        &mut self,
        id: u64,
        endpoint: UnboundedReceiver<Envelope>,
        ack: SyncSender<Arc<SharedRegion>>,
    ) {
        let Some(engine) = self.engine.clone() else {
            // Dropping the ack tells the consumer
            error!("handshake from consumer {} before init", id);
            return;
        };

        let region = SharedRegion::new(self.region_size);
        self.consumers.borrow_mut().insert(
            id,
            Consumer {
                region: region.clone(),
            },
        );
        tokio::task::spawn_local(serve(id, engine, region.clone(), endpoint, self.consumers.clone()));

        if ack.send(region).is_err() {
            warn!("consumer {} gave up before the handshake completed", id);
        }
    }

    fn close(&mut self) {
        let consumers: Vec<Consumer> = self.consumers.borrow_mut().drain().map(|(_, c)| c).collect();
        info!("backend closing with {} consumers", consumers.len());
        for consumer in consumers {
            consumer.region.abort();
        }
    }
}

async fn serve<T: Transport + 'static>(
    id: u64,
    engine: PageCacheEngine<T>,
    region: Arc<SharedRegion>,
    mut endpoint: UnboundedReceiver<Envelope>,
    consumers: Consumers,
) {
    debug!("consumer {} connected", id);

    while let Some(Envelope { ticket, request }) = endpoint.recv().await {
        let engine = engine.clone();
        let region = region.clone();
        tokio::task::spawn_local(async move {
            let (status, payload) = execute(&engine, &request).await;
            if !region.complete(ticket, status, &payload) {
                debug!("dropped late result for {} (ticket {})", request, ticket);
            }
        });
    }

    consumers.borrow_mut().remove(&id);
    debug!("consumer {} disconnected", id);
}

/// Runs one request against the engine. Returns the result word and the
/// payload: page bytes for reads, a little-endian `u64` for sizes, a
/// little-endian `u32` for access checks.
pub(crate) async fn execute<T: Transport + 'static>(
    engine: &PageCacheEngine<T>,
    request: &Request,
) -> (i32, Bytes) {
    debug!("received {}", request);
    let url = request.url.as_str();

    let result = match request.op {
        Operation::Open => engine.open(url).await.map(|()| Bytes::new()),
        Operation::Access => {
            let found = engine.access(url).await;
            Ok(Bytes::copy_from_slice(&u32::from(found).to_le_bytes()))
        }
        Operation::Read => match (request.offset, request.length) {
            (Some(offset), Some(length)) => engine.read(url, offset, length).await,
            _ => Err(StorageError::Malformed(format!("{} without a range", request))),
        },
        Operation::FileSize => engine
            .file_size(url)
            .map(|size| Bytes::copy_from_slice(&size.to_le_bytes())),
    };

    match result {
        Ok(payload) => (0, payload),
        Err(err) => {
            error!("{} failed: {}", request, err);
            (err.status(), Bytes::new())
        }
    }
}
