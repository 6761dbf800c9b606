//! Blocking HTTP server: one thread per connection, one request per connection.

mod http;
mod routes;

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde_json::json;
use thiserror::Error;

use crate::config::{MetricsSettings, ServerSettings};
use crate::gateway::ReviewGateway;
use crate::ledger::Ledger;

use http::{HttpError, Response};

/// Collaborators shared by every request handler.
pub struct ServiceState {
    pub ledger: Ledger,
    pub gateway: ReviewGateway,
    pub metrics: MetricsSettings,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
    #[error("Server socket error: {0}")]
    Io(#[from] io::Error),
}

/// Bound listener plus the state its handlers share.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServiceState>,
    settings: ServerSettings,
}

impl Server {
    pub fn bind(settings: &ServerSettings, state: ServiceState) -> Result<Self, ServerError> {
        let listener =
            TcpListener::bind(&settings.bind_addr).map_err(|source| ServerError::Bind {
                addr: settings.bind_addr.clone(),
                source,
            })?;
        Ok(Self {
            listener,
            state: Arc::new(state),
            settings: settings.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails.
    pub fn run(self) -> Result<(), ServerError> {
        tracing::info!("Listening on http://{}", self.local_addr()?);
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!("Accept failed: {err}");
                    continue;
                }
            };
            let state = Arc::clone(&self.state);
            let settings = self.settings.clone();
            let spawned = thread::Builder::new()
                .name("http-conn".to_string())
                .spawn(move || handle_connection(stream, &state, &settings));
            if let Err(err) = spawned {
                tracing::error!("Failed to spawn connection thread: {err}");
            }
        }
        Ok(())
    }

    /// Run the accept loop on a background thread.
    pub fn spawn(self) -> Result<JoinHandle<()>, ServerError> {
        let handle = thread::Builder::new()
            .name("http-accept".to_string())
            .spawn(move || {
                if let Err(err) = self.run() {
                    tracing::error!("Server stopped: {err}");
                }
            })?;
        Ok(handle)
    }
}

fn handle_connection(stream: TcpStream, state: &ServiceState, settings: &ServerSettings) {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("request", id = %request_id);
    let _entered = span.enter();

    let timeout = Some(settings.io_timeout());
    if let Err(err) = stream
        .set_read_timeout(timeout)
        .and_then(|()| stream.set_write_timeout(timeout))
    {
        tracing::warn!("Failed to set socket timeouts: {err}");
    }

    let response = match http::read_request(&stream, settings.max_body_bytes) {
        Ok(request) => {
            tracing::debug!("{} {}", request.method, request.path);
            let response = routes::handle(state, &request);
            tracing::info!("{} {} -> {}", request.method, request.path, response.status);
            response
        }
        Err(HttpError::BodyTooLarge { length, limit }) => {
            tracing::warn!("Rejected {length} byte body (limit {limit})");
            Response::json(413, &json!({"error": "payload too large", "limit": limit}))
        }
        Err(HttpError::HeadTooLarge) => {
            Response::json(431, &json!({"error": "request headers too large"}))
        }
        Err(HttpError::Malformed(detail)) => {
            tracing::debug!("Malformed request: {detail}");
            Response::json(400, &json!({"error": "bad request", "detail": detail}))
        }
        Err(HttpError::Io(err)) => {
            tracing::debug!("Connection dropped before a full request: {err}");
            return;
        }
    };
    if let Err(err) = response.write_to(&stream) {
        tracing::debug!("Failed to write response: {err}");
    }
}
