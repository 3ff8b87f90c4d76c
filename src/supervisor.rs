//! Owns the printer state and the lifecycle of each listener.

use std::net::SocketAddr;

use anyhow::Result;

use crate::{
    config::Config, discovery::DiscoveryResponder, server::HttpApiServer, state::SharedState, tcp::CommandServer,
};

/// One emulated printer: shared state plus three independently started
/// listeners.
#[derive(Debug)]
pub struct Emulator {
    config: Config,
    state: SharedState,
    discovery: Option<DiscoveryResponder>,
    command: Option<CommandServer>,
    http: Option<HttpApiServer>,
}

impl Emulator {
    /// Build the printer described by `config`. Nothing listens yet.
    pub fn new(config: Config) -> Result<Self> {
        let state = SharedState::new(config.build_state()?);
        Ok(Emulator {
            config,
            state,
            discovery: None,
            command: None,
            http: None,
        })
    }

    /// The shared printer state.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// The configuration the emulator was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Advance the simulation by one step.
    pub async fn tick(&self) {
        self.state.lock().await.tick();
    }

    fn bind_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, port)
    }

    /// Start answering discovery probes. A no-op when already running.
    pub async fn start_discovery(&mut self) -> Result<SocketAddr> {
        if let Some(running) = &self.discovery {
            return Ok(running.local_addr());
        }
        let responder = DiscoveryResponder::start(self.bind_addr(self.config.ports.discovery), self.state.clone()).await?;
        let addr = responder.local_addr();
        self.discovery = Some(responder);
        Ok(addr)
    }

    /// Stop answering discovery probes.
    pub fn stop_discovery(&mut self) {
        if let Some(responder) = self.discovery.take() {
            responder.stop();
        }
    }

    /// Start the command port. A no-op when already running.
    pub async fn start_command(&mut self) -> Result<SocketAddr> {
        if let Some(running) = &self.command {
            return Ok(running.local_addr());
        }
        let server = CommandServer::start(self.bind_addr(self.config.ports.command), self.state.clone()).await?;
        let addr = server.local_addr();
        self.command = Some(server);
        Ok(addr)
    }

    /// Stop the command port. Connected clients keep their session until
    /// they disconnect.
    pub fn stop_command(&mut self) {
        if let Some(server) = self.command.take() {
            server.stop();
        }
    }

    /// Start the HTTP API. A no-op when already running.
    pub fn start_http(&mut self) -> Result<SocketAddr> {
        if let Some(running) = &self.http {
            return Ok(running.local_addr());
        }
        let server = HttpApiServer::start(self.bind_addr(self.config.ports.http), self.state.clone())?;
        let addr = server.local_addr();
        self.http = Some(server);
        Ok(addr)
    }

    /// Stop the HTTP API. Blocks until the server thread exits; async
    /// callers should prefer [`Emulator::shutdown_http`].
    pub fn stop_http(&mut self) {
        if let Some(server) = self.http.take() {
            server.stop();
        }
    }

    /// Stop the HTTP API without blocking the runtime.
    pub async fn shutdown_http(&mut self) {
        if let Some(server) = self.http.take() {
            server.shutdown().await;
        }
    }

    /// Start every listener. Whatever started before a failure is stopped
    /// again.
    pub async fn start_all(&mut self) -> Result<()> {
        let started = async {
            self.start_discovery().await?;
            self.start_command().await?;
            self.start_http()?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if started.is_err() {
            self.shutdown().await;
        }
        started
    }

    /// Stop every listener. Blocks while the HTTP thread exits; see
    /// [`Emulator::shutdown`].
    pub fn stop_all(&mut self) {
        self.stop_http();
        self.stop_command();
        self.stop_discovery();
    }

    /// Stop every listener from async code. Dropping the emulator afterwards
    /// has nothing left to stop.
    pub async fn shutdown(&mut self) {
        self.shutdown_http().await;
        self.stop_command();
        self.stop_discovery();
    }

    /// Where each listener is bound, if running.
    pub fn addresses(&self) -> ListenerAddresses {
        ListenerAddresses {
            discovery: self.discovery.as_ref().map(DiscoveryResponder::local_addr),
            command: self.command.as_ref().map(CommandServer::local_addr),
            http: self.http.as_ref().map(HttpApiServer::local_addr),
        }
    }

    /// The current state as a configuration, for saving.
    pub async fn config_snapshot(&self) -> Config {
        let state = self.state.lock().await;
        self.config.snapshot(&state)
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Bound addresses of the listeners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerAddresses {
    /// UDP discovery.
    pub discovery: Option<SocketAddr>,
    /// TCP commands.
    pub command: Option<SocketAddr>,
    /// HTTP API.
    pub http: Option<SocketAddr>,
}
