//! The JSON API on the HTTP port.
//!
//! dropshot runs on a dedicated thread with its own single-threaded runtime
//! so the HTTP listener can be started and stopped independently of the
//! other surfaces.

/// Shared request context for the HTTP handlers.
pub mod context;
/// dropshot endpoint definitions.
pub mod endpoints;
pub mod handlers;

use std::{net::SocketAddr, sync::Arc, thread};

use anyhow::{anyhow, Context as _, Result};
use dropshot::{ApiDescription, ConfigDropshot, HandlerTaskMode, HttpServer, ServerBuilder};
use tokio::sync::oneshot;

use crate::{server::context::Context, state::SharedState};

/// Uploads are kept in memory; cap them.
const MAX_BODY_BYTES: usize = 512 * 1024 * 1024;

/// Create an API description for the server.
pub fn create_api_description() -> Result<ApiDescription<Arc<Context>>> {
    fn register_endpoints(api: &mut ApiDescription<Arc<Context>>) -> Result<(), String> {
        api.register(crate::server::endpoints::product).map_err(|e| e.to_string())?;
        api.register(crate::server::endpoints::detail).map_err(|e| e.to_string())?;
        api.register(crate::server::endpoints::control).map_err(|e| e.to_string())?;
        api.register(crate::server::endpoints::gcode_list).map_err(|e| e.to_string())?;
        api.register(crate::server::endpoints::gcode_thumb).map_err(|e| e.to_string())?;
        api.register(crate::server::endpoints::upload_gcode).map_err(|e| e.to_string())?;
        api.register(crate::server::endpoints::print_gcode).map_err(|e| e.to_string())?;
        Ok(())
    }

    let mut api = ApiDescription::new();
    register_endpoints(&mut api).map_err(|err| anyhow!("failed to register endpoints: {}", err))?;
    Ok(api)
}

/// Build and start the dropshot server on the current runtime.
pub fn create_server(bind: SocketAddr, state: SharedState) -> Result<HttpServer<Arc<Context>>> {
    let api = create_api_description()?;

    let config_dropshot = ConfigDropshot {
        bind_address: bind,
        default_request_body_max_bytes: MAX_BODY_BYTES,
        default_handler_task_mode: HandlerTaskMode::Detached,
        ..Default::default()
    };

    // dropshot logs through slog; route it into tracing with everything else.
    let logger = slog::Logger::root(tracing_slog::TracingSlogDrain, slog::o!("component" => "dropshot"));

    let server = ServerBuilder::new(api, Arc::new(Context::new(state)), logger)
        .config(config_dropshot)
        .start()
        .map_err(|error| anyhow!("failed to create server: {}", error))?;

    Ok(server)
}

/// A running HTTP listener and the thread that owns it.
#[derive(Debug)]
pub struct HttpApiServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl HttpApiServer {
    /// Start the server on its own thread. Returns once the socket is bound.
    pub fn start(bind: SocketAddr, state: SharedState) -> Result<Self> {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<SocketAddr>>();
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("http-api".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.into()));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let server = match create_server(bind, state) {
                        Ok(server) => server,
                        Err(err) => {
                            let _ = ready_tx.send(Err(err));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(server.local_addr()));

                    // A dropped sender means the handle is gone; stop either way.
                    let _ = shutdown_rx.await;
                    if let Err(err) = server.close().await {
                        tracing::warn!(error = %err, "closing the http server failed");
                    }
                });
            })
            .context("spawning the http thread")?;

        let local_addr = ready_rx
            .recv()
            .map_err(|_| anyhow!("http thread exited before binding"))??;
        tracing::info!(addr = %local_addr, "http api listening");

        Ok(HttpApiServer {
            local_addr,
            shutdown,
            thread,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the server and wait for its thread.
    ///
    /// This blocks the calling thread until the server has closed. From
    /// async code use [`HttpApiServer::shutdown`] instead.
    pub fn stop(self) {
        let _ = self.shutdown.send(());
        if self.thread.join().is_err() {
            tracing::error!("http thread panicked");
        }
        tracing::info!(addr = %self.local_addr, "http api stopped");
    }

    /// Stop the server, waiting for its thread on the blocking pool so the
    /// calling runtime keeps running.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        let thread = self.thread;
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => tracing::error!("http thread panicked"),
            Err(err) => tracing::error!(error = %err, "joining the http thread failed"),
        }
        tracing::info!(addr = %self.local_addr, "http api stopped");
    }
}
