use crate::dispatcher::{DispatchOutcome, VoteEventDispatcher};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use topgg_core::{CoreError, ErrorExt, VoteEvent, WebhookError, WebhookSettings};
use tracing::{debug, info};

struct RunningServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// HTTP listener that turns Top.gg vote deliveries into [`VoteEvent`]s.
///
/// Routes may be registered before or after [`WebhookServer::start`]; the
/// router consults the live registry on every request.
pub struct WebhookServer {
    dispatcher: Arc<VoteEventDispatcher>,
    bind_address: IpAddr,
    running: Mutex<Option<RunningServer>>,
    /// Serializes `start` and `stop`; held across the bind.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Default for WebhookServer {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookServer {
    pub fn new() -> Self {
        Self {
            dispatcher: Arc::new(VoteEventDispatcher::new()),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            running: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_settings(settings: &WebhookSettings) -> Self {
        Self::new().with_bind_address(settings.bind_address)
    }

    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    pub fn register_route<F, Fut>(
        &self,
        path: impl Into<String>,
        secret: impl Into<String>,
        handler: F,
    ) -> &Self
    where
        F: Fn(VoteEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.dispatcher.register_route(path, secret, handler);
        self
    }

    /// Receives handler failures. Without a hook they are logged.
    pub fn on_error<F>(&self, hook: F) -> &Self
    where
        F: Fn(&WebhookError) + Send + Sync + 'static,
    {
        self.dispatcher.set_error_hook(Arc::new(hook));
        self
    }

    pub fn dispatcher(&self) -> &Arc<VoteEventDispatcher> {
        &self.dispatcher
    }

    pub fn router(&self) -> Router {
        Router::new()
            .fallback(handle_delivery)
            .with_state(self.dispatcher.clone())
    }

    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .map_or(false, |server| !server.task.is_finished())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().map(|server| server.addr)
    }

    /// Binds `port` (0 picks a free one) and serves in the background.
    /// Starting a running server returns its current address.
    pub async fn start(&self, port: u16) -> Result<SocketAddr, CoreError> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Some(addr) = self.local_addr() {
            debug!("Webhook server already listening on {}", addr);
            return Ok(addr);
        }

        let requested = SocketAddr::new(self.bind_address, port);
        let listener = TcpListener::bind(requested).await.map_err(|source| {
            let error = WebhookError::Bind {
                address: requested.to_string(),
                source,
            };
            error.log_error();
            error
        })?;
        let addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone().cancelled_owned();
        let router = self.router();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
            {
                WebhookError::Server {
                    reason: e.to_string(),
                }
                .log_error();
            }
        });

        *self.lock_running() = Some(RunningServer {
            addr,
            shutdown,
            task,
        });

        info!("Webhook server listening on {}", addr);
        Ok(addr)
    }

    /// Stops accepting deliveries and waits for in-flight ones to finish.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let _lifecycle = self.lifecycle.lock().await;
        let server = self.lock_running().take();
        let Some(server) = server else {
            return Ok(());
        };

        server.shutdown.cancel();
        server.task.await.map_err(|e| WebhookError::Server {
            reason: e.to_string(),
        })?;

        info!("Webhook server on {} stopped", server.addr);
        Ok(())
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<RunningServer>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WebhookServer {
    fn drop(&mut self) {
        if let Some(server) = self.lock_running().as_ref() {
            server.shutdown.cancel();
        }
    }
}

async fn handle_delivery(
    State(dispatcher): State<Arc<VoteEventDispatcher>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if method != Method::POST {
        return StatusCode::NOT_FOUND;
    }

    let authorization = headers.get(AUTHORIZATION).map(|value| value.as_bytes());
    match dispatcher.dispatch(uri.path(), authorization, &body).await {
        DispatchOutcome::Delivered => StatusCode::OK,
        DispatchOutcome::NotFound => StatusCode::NOT_FOUND,
        DispatchOutcome::Unauthorized => StatusCode::UNAUTHORIZED,
        DispatchOutcome::Malformed => StatusCode::BAD_REQUEST,
    }
}
