use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::{Arc, Mutex};

use hyper::header::{CONNECTION, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::error::OAuthError;

pub const CALLBACK_PATH: &str = "/Callback";

const SUCCESS_PAGE: &str = include_str!("success.html");
const FAILURE_PAGE: &str = include_str!("failure.html");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What the browser redirect carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Code(String),
    Error(String),
}

impl CallbackOutcome {
    /// Parse the query string of a callback request. `error` wins over `code`.
    pub fn from_query(query: &str) -> Self {
        let mut code = None;
        let mut error = None;
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }
        match (error, code) {
            (Some(error), _) => CallbackOutcome::Error(error),
            (None, Some(code)) => CallbackOutcome::Code(code),
            (None, None) => CallbackOutcome::Error("missing authorization code".to_string()),
        }
    }
}

type OutcomeSlot = Arc<Mutex<Option<oneshot::Sender<CallbackOutcome>>>>;

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<Result<(), hyper::Error>>,
}

/// Local HTTP listener receiving the OAuth redirect from the browser.
///
/// `start` issues the redirect URI, `wait_for_code` waits for the first
/// callback and `stop` shuts the listener down. `stop` must be called on
/// every path and can be called any number of times.
pub struct LoopbackReceiver {
    host: String,
    port: Option<u16>,
    running: Option<Running>,
    outcome: Option<oneshot::Receiver<CallbackOutcome>>,
}

impl LoopbackReceiver {
    /// `port` of `None` lets the OS pick a free port.
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        LoopbackReceiver {
            host: host.into(),
            port,
            running: None,
            outcome: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.addr)
    }

    pub fn redirect_uri(&self) -> Option<String> {
        self.local_addr()
            .map(|addr| format!("http://{}:{}{}", self.host, addr.port(), CALLBACK_PATH))
    }

    /// Bind the listener and return the redirect URI to hand to the browser.
    pub async fn start(&mut self) -> Result<String, OAuthError> {
        if let Some(uri) = self.redirect_uri() {
            return Ok(uri);
        }

        let bind_target = format!("{}:{}", self.host, self.port.unwrap_or(0));
        let bind_error = |source: std::io::Error| OAuthError::Bind {
            addr: bind_target.clone(),
            source,
        };
        let addr = bind_target
            .to_socket_addrs()
            .map_err(bind_error)?
            .find(|addr| addr.ip().is_loopback())
            .ok_or_else(|| {
                bind_error(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "host does not resolve to a loopback address",
                ))
            })?;
        let listener = TcpListener::bind(addr).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;
        // A restart after `stop` reuses the same port, so the redirect URI stays valid.
        self.port = Some(addr.port());

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let slot: OutcomeSlot = Arc::new(Mutex::new(Some(outcome_tx)));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let make_service = make_service_fn(move |_conn| {
            let slot = slot.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| handle_callback(req, slot.clone()))) }
        });
        let server = Server::from_tcp(listener)?
            .serve(make_service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });

        self.running = Some(Running {
            addr,
            shutdown: shutdown_tx,
            server: tokio::spawn(server),
        });
        self.outcome = Some(outcome_rx);

        let uri = format!("http://{}:{}{}", self.host, addr.port(), CALLBACK_PATH);
        info!("🔐 Waiting for the OAuth redirect on {}", uri);
        Ok(uri)
    }

    /// Wait for the browser redirect and return the authorization code.
    pub async fn wait_for_code(&mut self) -> Result<String, OAuthError> {
        let outcome = self.outcome.take().ok_or(OAuthError::NotStarted)?;
        match outcome.await.map_err(|_| OAuthError::CallbackLost)? {
            CallbackOutcome::Code(code) => {
                info!("✅ Authorization code received");
                Ok(code)
            }
            CallbackOutcome::Error(error) => {
                warn!("Authorization failed: {}", error);
                Err(OAuthError::AuthorizationDenied(error))
            }
        }
    }

    /// Shut the listener down. No-op when not running.
    pub async fn stop(&mut self) -> Result<(), OAuthError> {
        self.outcome = None;
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        let _ = running.shutdown.send(());
        let mut server = running.server;
        match timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_error)) => warn!("Loopback server task ended abnormally: {}", join_error),
            Err(_) => {
                warn!("Loopback server did not shut down in time, aborting it");
                server.abort();
            }
        }
        debug!("Loopback receiver on {} stopped", running.addr);
        Ok(())
    }
}

async fn handle_callback(req: Request<Body>, slot: OutcomeSlot) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET || req.uri().path() != CALLBACK_PATH {
        return Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header(CONNECTION, "close")
            .body(Body::empty())
            .unwrap_or_default());
    }

    let outcome = CallbackOutcome::from_query(req.uri().query().unwrap_or(""));
    let page = match outcome {
        CallbackOutcome::Code(_) => SUCCESS_PAGE,
        CallbackOutcome::Error(_) => FAILURE_PAGE,
    };

    // Only the first callback is honored.
    let sender = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
    match sender {
        Some(sender) => {
            let _ = sender.send(outcome);
        }
        None => debug!("Ignoring repeated OAuth callback"),
    }

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/html")
        .header(CONNECTION, "close")
        .body(Body::from(page))
        .unwrap_or_default())
}
