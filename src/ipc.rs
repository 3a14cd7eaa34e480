use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcRequest {
    Show,
    Hide,
    Status,
    Toggle(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpcError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("missing device path for '{0}'")]
    MissingPath(&'static str),
}

impl FromStr for IpcRequest {
    type Err = IpcError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            None => Err(IpcError::Empty),
            Some("show") => Ok(IpcRequest::Show),
            Some("hide") => Ok(IpcRequest::Hide),
            Some("status") => Ok(IpcRequest::Status),
            Some("toggle") => parts
                .next()
                .map(|path| IpcRequest::Toggle(path.to_string()))
                .ok_or(IpcError::MissingPath("toggle")),
            Some(other) => Err(IpcError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for IpcRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpcRequest::Show => write!(f, "show"),
            IpcRequest::Hide => write!(f, "hide"),
            IpcRequest::Status => write!(f, "status"),
            IpcRequest::Toggle(path) => write!(f, "toggle {}", path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpcReply {
    Ok,
    Json(String),
    Error(String),
}

impl IpcReply {
    pub fn to_line(&self) -> String {
        match self {
            IpcReply::Ok => "OK".to_string(),
            IpcReply::Json(json) => json.clone(),
            IpcReply::Error(message) => format!("ERR {}", message),
        }
    }

    /// Interpret a reply line received by the client.
    pub fn from_line(line: &str) -> Self {
        match line {
            "OK" => IpcReply::Ok,
            _ => match line.strip_prefix("ERR ") {
                Some(message) => IpcReply::Error(message.to_string()),
                None => IpcReply::Json(line.to_string()),
            },
        }
    }
}

type Envelope = (IpcRequest, mpsc::Sender<IpcReply>);

/// IPC server for bt-indicator
pub struct IpcServer {
    socket_path: PathBuf,
}

impl IpcServer {
    pub fn new() -> Result<Self> {
        let socket_path = Self::socket_path()?;
        Ok(Self { socket_path })
    }

    /// Start listening. `handler` runs on the GLib main loop.
    pub fn start<F>(&self, handler: F) -> Result<glib::SourceId>
    where
        F: Fn(IpcRequest) -> IpcReply + 'static,
    {
        // Make sure the directory exists
        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Remove a stale socket
        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to socket: {:?}", self.socket_path))?;

        info!("IPC server started on socket: {:?}", self.socket_path);

        let (sender, receiver) = glib::MainContext::channel::<Envelope>(glib::Priority::DEFAULT);

        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let sender = sender.clone();
                        thread::spawn(move || {
                            if let Err(e) = Self::handle_connection(stream, sender) {
                                error!("Error handling IPC connection: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Error accepting connection: {}", e),
                }
            }
        });

        let source_id = receiver.attach(None, move |(request, reply_tx)| {
            info!("Processing IPC command: {}", request);
            let reply = handler(request);
            let _ = reply_tx.send(reply);
            glib::ControlFlow::Continue
        });

        Ok(source_id)
    }

    fn handle_connection(stream: UnixStream, sender: glib::Sender<Envelope>) -> Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut line = String::new();
        reader.read_line(&mut line)?;

        let reply = match line.trim().parse::<IpcRequest>() {
            Ok(request) => {
                let (reply_tx, reply_rx) = mpsc::channel();
                sender
                    .send((request, reply_tx))
                    .map_err(|e| anyhow::anyhow!("main loop is gone: {}", e))?;
                reply_rx
                    .recv_timeout(REPLY_TIMEOUT)
                    .unwrap_or_else(|_| IpcReply::Error("timed out".to_string()))
            }
            Err(e) => IpcReply::Error(e.to_string()),
        };

        let mut writer = stream;
        writeln!(writer, "{}", reply.to_line())?;
        Ok(())
    }

    pub fn socket_path() -> Result<PathBuf> {
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| {
            format!(
                "/tmp/runtime-{}",
                std::env::var("USER").unwrap_or_else(|_| "user".to_string())
            )
        });

        Ok(Path::new(&runtime_dir).join("bt-indicator.sock"))
    }
}

/// IPC client for sending commands to bt-indicator
pub struct IpcClient;

impl IpcClient {
    pub fn send(request: &IpcRequest) -> Result<IpcReply> {
        let socket_path = IpcServer::socket_path()?;

        let mut stream = UnixStream::connect(&socket_path)
            .with_context(|| format!("Failed to connect to socket: {:?}", socket_path))?;

        writeln!(stream, "{}", request)?;

        let mut reader = BufReader::new(stream);
        let mut response = String::new();
        reader.read_line(&mut response)?;

        Ok(IpcReply::from_line(response.trim()))
    }
}
