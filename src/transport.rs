//! Local socket bus.
//!
//! Clients connect over a Unix domain socket and exchange JSON-RPC 2.0
//! messages, one per line. A request's method is `<interface>.<member>` and
//! its params name the target object:
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"org.gnome.CodeAssist.v1.Service.Parse",
//!  "params":{"path":"/org/gnome/CodeAssist/v1/css","args":["a.css","",[0,0],{}]}}
//! ```
//!
//! Every connection is given a unique bus name. Calls are forwarded to the
//! event loop tagged with that name, and closing the connection is announced
//! as the name losing its owner.

use std::io;
use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tower_lsp::jsonrpc::{Error, ErrorCode, Id, Request, Response};

use crate::bus::{Call, Event, Reply};
use crate::error::{Fault, ProtocolError};
use crate::reaper::NameOwnerChanged;

/// Built-in method returning the caller's unique name.
pub const HELLO: &str = "org.freedesktop.DBus.Hello";

const SERVER_ERROR: i64 = -32000;

#[derive(Debug, Deserialize)]
struct CallParams {
    path: String,
    #[serde(default)]
    args: Vec<Value>,
}

/// A listening socket and its connections.
pub struct Transport {
    path: PathBuf,
    shutdown: watch::Sender<bool>,
    accept: JoinHandle<()>,
}

impl Transport {
    /// Listen on `path`, forwarding everything clients send into `events`.
    /// A stale socket left at `path` by an earlier run is replaced; one that
    /// still accepts connections is left alone and `AddrInUse` is returned.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(path: impl Into<PathBuf>, events: UnboundedSender<Event>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            if std::os::unix::net::UnixStream::connect(&path).is_ok() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!("{} is served by another process", path.display()),
                ));
            }
            std::fs::remove_file(&path)?;
            log::debug!("Removed stale socket {}", path.display());
        }

        let listener = UnixListener::bind(&path)?;
        log::info!("Listening on {}", path.display());

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept = tokio::spawn(accept_loop(listener, events, shutdown_rx));

        Ok(Self {
            path,
            shutdown,
            accept,
        })
    }

    /// Stop accepting, let open connections deliver their pending reply, and
    /// remove the socket file.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.accept.await {
            log::error!("Accept task failed: {}", e);
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::debug!("Could not remove {}: {}", self.path.display(), e);
        }
        log::info!("Transport closed");
    }
}

async fn accept_loop(
    listener: UnixListener,
    events: UnboundedSender<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    let mut next_name: u64 = 1;

    loop {
        // The select arms borrow `shutdown` and `connections`, so new
        // connections are spawned once it has returned.
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.wait_for(|stop| *stop) => break,
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    log::error!("Connection task failed: {}", e);
                }
                continue;
            }
        };

        match accepted {
            Ok((stream, _)) => {
                let name = format!(":1.{next_name}");
                next_name += 1;
                log::debug!("{} connected", name);
                connections.spawn(serve_connection(
                    stream,
                    name,
                    events.clone(),
                    shutdown.clone(),
                ));
            }
            Err(e) => {
                log::error!("Accept failed: {}", e);
                break;
            }
        }
    }

    while let Some(finished) = connections.join_next().await {
        if let Err(e) = finished {
            log::error!("Connection task failed: {}", e);
        }
    }
}

async fn serve_connection(
    stream: UnixStream,
    name: String,
    events: UnboundedSender<Event>,
    mut shutdown: watch::Receiver<bool>,
) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    loop {
        // Only waiting for input is interruptible; a request that was read
        // is always answered.
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.wait_for(|stop| *stop) => break,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Read from {} failed: {}", name, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let Some(response) = handle_message(&name, &line, &events).await else {
            continue;
        };
        if let Err(e) = write_message(&mut write, &response).await {
            log::error!("Write to {} failed: {}", name, e);
            break;
        }
    }

    log::debug!("{} disconnected", name);
    let _ = events.send(Event::NameOwnerChanged(NameOwnerChanged::vanished(name)));
}

async fn handle_message(
    sender: &str,
    line: &str,
    events: &UnboundedSender<Event>,
) -> Option<Response> {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            log::error!("Malformed message from {}: {}", sender, e);
            return Some(Response::from_error(Id::Null, Error::parse_error()));
        }
    };

    let (method, id, params) = request.into_parts();
    let Some(id) = id else {
        log::debug!("Ignoring notification {} from {}", method, sender);
        return None;
    };

    if method == HELLO {
        return Some(Response::from_ok(id, Value::String(sender.to_string())));
    }

    Some(match forward(sender, &method, params, events).await {
        Ok(body) => Response::from_ok(id, Value::Array(body)),
        Err(fault) => Response::from_error(id, fault_to_error(fault)),
    })
}

/// Hand a call to the event loop and wait for its reply.
async fn forward(
    sender: &str,
    method: &str,
    params: Option<Value>,
    events: &UnboundedSender<Event>,
) -> Reply {
    let Some((interface, member)) = method.rsplit_once('.') else {
        return Err(Fault::protocol(&ProtocolError::UnknownMethod {
            interface: String::new(),
            member: method.to_string(),
        }));
    };
    let params: CallParams = serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|source| {
            Fault::protocol(&ProtocolError::InvalidArgs {
                member: "params",
                source,
            })
        })?;

    let (reply, response) = oneshot::channel();
    let call = Call::new(sender, params.path, interface, member, params.args);
    events
        .send(Event::Call { call, reply })
        .map_err(|_| service_gone())?;
    response.await.map_err(|_| service_gone())?
}

fn service_gone() -> Fault {
    Fault::new("org.freedesktop.DBus.Error.NoReply", "service is shutting down")
}

/// Map a fault onto a JSON-RPC error object.
pub fn fault_to_error(fault: Fault) -> Error {
    let code = match fault.name.as_str() {
        "org.freedesktop.DBus.Error.UnknownObject"
        | "org.freedesktop.DBus.Error.UnknownInterface"
        | "org.freedesktop.DBus.Error.UnknownMethod" => ErrorCode::MethodNotFound,
        "org.freedesktop.DBus.Error.InvalidArgs" => ErrorCode::InvalidParams,
        _ => ErrorCode::ServerError(SERVER_ERROR),
    };

    Error {
        code,
        message: fault.message.into(),
        data: Some(json!({
            "name": fault.name,
            "location": fault.location,
        })),
    }
}

async fn write_message(write: &mut OwnedWriteHalf, response: &Response) -> io::Result<()> {
    let mut out = serde_json::to_vec(response)?;
    out.push(b'\n');
    write.write_all(&out).await?;
    write.flush().await
}
