//! SmartBand daemon entrypoint.
//!
//! A small local service that owns conversation sessions and the SQLite
//! shadow store. Front ends send one command per request over a Unix socket;
//! bands (or their gateway) publish reported state through the same socket.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use serde_json::Value;
use smartband_core::{load_config, BandConfig};
use smartband_daemon_protocol::{
    parse_command, parse_conversation, parse_register_device, parse_report, parse_shadow,
    ErrorInfo, Method, Request, Response, ERROR_TOO_MANY_CONNECTIONS, MAX_REQUEST_BYTES,
    PROTOCOL_VERSION,
};

mod conversations;
mod db;
mod state;

use db::Db;
use state::SharedState;

const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const WRITE_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const CONVERSATION_REAP_INTERVAL_SECS: u64 = 30;

fn main() {
    init_logging();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let db_path = match daemon_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon database path");
            std::process::exit(1);
        }
    };

    let db = match Db::new(db_path) {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let config = match load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            BandConfig::default()
        }
    };
    info!(
        quiescence_ms = config.shadow.quiescence_ms,
        deadline_ms = config.shadow.deadline().as_millis() as u64,
        on_reidentify = ?config.session.on_reidentify,
        locale = ?config.speech.locale,
        "Runtime config loaded"
    );

    let shared_state = Arc::new(SharedState::new(db, &config));

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "SmartBand daemon started");
    spawn_conversation_reaper(Arc::clone(&shared_state));

    for stream in listener.incoming() {
        match stream {
            Ok(mut stream) => match shared_state.try_acquire_connection() {
                Some(permit) => {
                    let state = Arc::clone(&shared_state);
                    thread::spawn(move || {
                        let _permit = permit;
                        handle_connection(stream, state);
                    });
                }
                None => {
                    warn!("Connection limit reached; rejecting connection");
                    let _ = stream.set_write_timeout(Some(Duration::from_secs(WRITE_TIMEOUT_SECS)));
                    let response = Response::error(
                        None,
                        ERROR_TOO_MANY_CONNECTIONS,
                        "daemon is at its connection limit",
                    );
                    let _ = write_response(&mut stream, response);
                }
            },
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn spawn_conversation_reaper(state: Arc<SharedState>) {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_secs(CONVERSATION_REAP_INTERVAL_SECS));
        state.prune_idle_conversations();
    });
}

fn init_logging() {
    let debug_enabled = env::var("SMARTBAND_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".smartband").join(SOCKET_NAME))
}

fn daemon_db_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".smartband").join("daemon").join("shadow.db"))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };
    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let id = request.id;
    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            });
            if let Ok(Value::Object(snapshot)) = serde_json::to_value(state.health_snapshot()) {
                if let Value::Object(fields) = &mut data {
                    fields.extend(snapshot);
                }
            }
            Response::ok(id, data)
        }
        Method::Command => {
            let params = match require_params(request.params, "command payload is required") {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let parsed = match parse_command(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            to_response(id, &state.handle_command(&parsed), "command reply")
        }
        Method::EndConversation => {
            let params = match require_params(request.params, "conversation_id is required") {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let parsed = match parse_conversation(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            let (ended, message) = state.end_conversation(&parsed.conversation_id);
            Response::ok(
                id,
                serde_json::json!({
                    "conversation_id": parsed.conversation_id,
                    "ended": ended,
                    "message": message,
                }),
            )
        }
        Method::ReportState => {
            let params = match require_params(request.params, "report payload is required") {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let parsed = match parse_report(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            match state.report_state(&parsed) {
                Ok(document) => Response::ok(
                    id,
                    serde_json::json!({
                        "accepted": true,
                        "device_key": document.device_key,
                        "version": document.version,
                    }),
                ),
                Err(err) => Response::error(id, "store_error", err),
            }
        }
        Method::RegisterDevice => {
            let params = match require_params(request.params, "device payload is required") {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let parsed = match parse_register_device(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            match state.register_device(&parsed) {
                Ok(()) => Response::ok(id, serde_json::json!({ "registered": true })),
                Err(err) => Response::error(id, "catalog_error", err),
            }
        }
        Method::GetShadow => {
            let params = match require_params(request.params, "physical_id is required") {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(id, err),
            };
            let parsed = match parse_shadow(params) {
                Ok(parsed) => parsed,
                Err(err) => return Response::error_with_info(id, err),
            };
            match state.shadow(&parsed.physical_id) {
                Ok(Some(document)) => to_response(id, &document, "shadow"),
                Ok(None) => Response::ok(
                    id,
                    serde_json::json!({ "found": false, "physical_id": parsed.physical_id }),
                ),
                Err(err) => Response::error(id, "store_error", err),
            }
        }
    }
}

fn require_params(params: Option<Value>, message: &str) -> Result<Value, ErrorInfo> {
    params.ok_or_else(|| ErrorInfo::new("invalid_params", message))
}

fn to_response<T: serde::Serialize>(id: Option<String>, value: &T, label: &str) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize {}: {}", label, err),
        ),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
