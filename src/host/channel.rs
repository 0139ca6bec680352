//! In-process message-passing execution context.
//!
//! `ChannelHost` runs a tenant's pipeline on its own task and is reached
//! over an mpsc channel; the request broker is the only way the pipeline
//! touches connection state. Swapping the channel for a pipe or local
//! socket moves the tenant out of process without touching callers.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use crate::broker::{RequestBroker, RequestId};
use crate::error::DispatchError;
use crate::host::{ApplicationHost, HostFactory, HostId, TenantRuntime, UnloadNotifier};
use crate::http::RequestHead;
use crate::routing::RouteEntry;

/// Per-request pipeline run inside the context.
pub type RequestHandler =
    Arc<dyn Fn(RequestId, RequestHead, Arc<RequestBroker>) -> BoxFuture<'static, ()> + Send + Sync>;

enum HostMessage {
    Process {
        id: RequestId,
        head: RequestHead,
        done: oneshot::Sender<()>,
    },
    Unload,
}

/// A tenant context living on an in-process task.
pub struct ChannelHost {
    id: HostId,
    path_prefix: String,
    tx: mpsc::UnboundedSender<HostMessage>,
}

impl ChannelHost {
    /// Spawn the context task and return its handle.
    pub fn spawn(
        path_prefix: String,
        broker: Arc<RequestBroker>,
        handler: RequestHandler,
        on_unload: Arc<dyn UnloadNotifier>,
    ) -> Arc<ChannelHost> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = HostId::new();
        let prefix = path_prefix.clone();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    HostMessage::Process { id: req_id, head, done } => {
                        tracing::debug!(
                            host = %id,
                            request_id = %req_id,
                            path = %head.path,
                            "processing request"
                        );
                        handler(req_id, head, broker.clone()).await;
                        // Receiver may already have been abandoned by stop().
                        let _ = done.send(());
                    }
                    HostMessage::Unload => break,
                }
            }
            tracing::info!(host = %id, path_prefix = %prefix, "tenant context unloading");
            on_unload.notify(id);
        });

        Arc::new(ChannelHost { id, path_prefix, tx })
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }
}

impl ApplicationHost for ChannelHost {
    fn id(&self) -> HostId {
        self.id
    }

    fn process_request(&self, id: RequestId, head: RequestHead) -> BoxFuture<'static, ()> {
        let (done, wait) = oneshot::channel();
        let sent = self.tx.send(HostMessage::Process { id, head, done });
        Box::pin(async move {
            if sent.is_ok() {
                // A dropped sender means the context unloaded mid-request;
                // treat it as end-of-request.
                let _ = wait.await;
            }
        })
    }

    fn unload(&self) {
        let _ = self.tx.send(HostMessage::Unload);
    }
}

/// Default pipeline: answer with a small page describing the tenant.
///
/// Stands in for the application framework, which is out of scope; it
/// exercises the full broker path (write, flush) and honors keep-alive by
/// framing the body with a Content-Length.
pub fn info_page_handler(path_prefix: String, physical_root: String) -> RequestHandler {
    Arc::new(move |id, head, broker| {
        let prefix = path_prefix.clone();
        let root = physical_root.clone();
        Box::pin(async move {
            let body = format!(
                "<html><head><title>{prefix}</title></head><body>\
                 <h1>Application {prefix}</h1>\
                 <p>Physical root: {root}</p>\
                 <p>Requested path: {}</p>\
                 </body></html>",
                head.path
            );
            let connection = if head.keep_alive {
                "keep-alive"
            } else {
                "close"
            };
            let response = format!(
                "HTTP/1.1 200 OK\r\n\
                 Content-Type: text/html; charset=UTF-8\r\n\
                 Content-Length: {}\r\n\
                 Connection: {connection}\r\n\r\n{body}",
                body.len()
            );
            // UnknownRequestId here means the connection is already gone.
            if broker.write(id, response.as_bytes()).await.is_ok() {
                let _ = broker.flush(id).await;
            }
        })
    })
}

/// Factory producing [`ChannelHost`] contexts with the info-page pipeline.
#[derive(Default)]
pub struct ChannelHostFactory;

impl HostFactory for ChannelHostFactory {
    fn create_host(
        &self,
        entry: &RouteEntry,
        on_unload: Arc<dyn UnloadNotifier>,
    ) -> Result<TenantRuntime, DispatchError> {
        let broker = Arc::new(RequestBroker::new());
        let handler = info_page_handler(
            entry.path_prefix().to_string(),
            entry.physical_root().display().to_string(),
        );
        let host = ChannelHost::spawn(
            entry.path_prefix().to_string(),
            broker.clone(),
            handler,
            on_unload,
        );
        Ok(TenantRuntime { host, broker })
    }
}
