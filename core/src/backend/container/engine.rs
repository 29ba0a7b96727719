//! Docker Engine API client over the engine's Unix socket.
//!
//! Plain HTTP/1.1, one connection per request. Starting an exec hijacks the
//! connection (`Upgrade: tcp`): after the response head the same socket
//! carries stdin one way and the framed output the other.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::runtime::{ContainerRuntime, EngineError, ExecInspect, ExecSpec, ExecStream};

pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";


#[derive(Debug, Clone)]
pub struct DockerEngine {
    socket: PathBuf,
    api_version: Option<String>,
}

impl DockerEngine {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        DockerEngine {
            socket: socket.into(),
            api_version: None,
        }
    }

    /// Pin requests to an API version such as `1.43`.
    pub fn with_api_version(mut self, version: Option<String>) -> Self {
        self.api_version = version;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    fn url(&self, path: &str) -> String {
        match self.api_version {
            Some(ref v) => format!("/v{}{}", v.trim_start_matches('v'), path),
            None => path.to_string(),
        }
    }

    fn send(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
        upgrade: bool,
    ) -> Result<Response, EngineError> {
        let stream = UnixStream::connect(&self.socket).map_err(|source| EngineError::Connect {
            socket: self.socket.clone(),
            source,
        })?;

        let payload = match body {
            Some(v) => serde_json::to_vec(v)?,
            None => Vec::new(),
        };
        let url = self.url(path);
        let mut head = format!(
            "{} {} HTTP/1.1\r\nHost: docker\r\nUser-Agent: runkit\r\n",
            method, url
        );
        if body.is_some() {
            head.push_str("Content-Type: application/json\r\n");
        }
        head.push_str(&format!("Content-Length: {}\r\n", payload.len()));
        if upgrade {
            head.push_str("Connection: Upgrade\r\nUpgrade: tcp\r\n");
        } else {
            head.push_str("Connection: close\r\n");
        }
        head.push_str("\r\n");

        let mut writer = &stream;
        writer.write_all(head.as_bytes())?;
        writer.write_all(&payload)?;
        writer.flush()?;
        debug!(method, url = %url, "engine request");

        Response::read(stream)
    }
}

impl ContainerRuntime for DockerEngine {
    fn create_exec(&self, container: &str, spec: &ExecSpec) -> Result<String, EngineError> {
        #[derive(Deserialize)]
        struct Created {
            #[serde(rename = "Id")]
            id: String,
        }

        let body = json!({
            "AttachStdin": true,
            "AttachStdout": true,
            "AttachStderr": true,
            "Tty": false,
            "Env": spec.env,
            "WorkingDir": spec.working_dir.clone().unwrap_or_default(),
            "Cmd": spec.cmd,
        });
        let resp = self.send(
            "POST",
            &format!("/containers/{}/exec", container),
            Some(&body),
            false,
        )?;
        match resp.status {
            200 | 201 => Ok(resp.json::<Created>()?.id),
            _ => Err(resp.into_error()),
        }
    }

    fn start_exec(&self, exec_id: &str) -> Result<ExecStream, EngineError> {
        let body = json!({ "Detach": false, "Tty": false });
        let resp = self.send("POST", &format!("/exec/{}/start", exec_id), Some(&body), true)?;
        match resp.status {
            101 | 200 => Ok(ExecStream {
                output: Box::new(resp.reader),
                input: Box::new(resp.stream),
            }),
            _ => Err(resp.into_error()),
        }
    }

    fn inspect_exec(&self, exec_id: &str) -> Result<ExecInspect, EngineError> {
        #[derive(Deserialize)]
        struct Inspect {
            #[serde(rename = "Running", default)]
            running: bool,
            #[serde(rename = "ExitCode", default)]
            exit_code: Option<i64>,
        }

        let resp = self.send("GET", &format!("/exec/{}/json", exec_id), None, false)?;
        match resp.status {
            200 => {
                let inspect: Inspect = resp.json()?;
                Ok(ExecInspect {
                    running: inspect.running,
                    exit_code: inspect.exit_code.map(|c| c as i32),
                })
            }
            _ => Err(resp.into_error()),
        }
    }
}


// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// A parsed response head. `reader` is positioned at the first body byte.
struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl Response {
    fn read(stream: UnixStream) -> Result<Response, EngineError> {
        let mut reader = BufReader::new(stream.try_clone()?);

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(EngineError::Protocol(
                "connection closed before a response".into(),
            ));
        }
        let status = line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| EngineError::Protocol(format!("bad status line: {}", line.trim())))?;

        let mut headers = Vec::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Err(EngineError::Protocol("connection closed inside headers".into()));
            }
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                break;
            }
            if let Some((name, value)) = trimmed.split_once(':') {
                headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
            }
        }

        Ok(Response {
            status,
            headers,
            stream,
            reader,
        })
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn body(mut self) -> Result<Vec<u8>, EngineError> {
        let chunked = self
            .header("transfer-encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);
        if chunked {
            return read_chunked(&mut self.reader);
        }
        let length = match self.header("content-length") {
            Some(v) => Some(v.parse::<usize>().map_err(|_| {
                EngineError::Protocol(format!("bad content-length: {}", v))
            })?),
            None => None,
        };
        let mut body = Vec::new();
        match length {
            Some(n) => {
                body.resize(n, 0);
                self.reader.read_exact(&mut body)?;
            }
            None => {
                self.reader.read_to_end(&mut body)?;
            }
        }
        Ok(body)
    }

    fn json<T: DeserializeOwned>(self) -> Result<T, EngineError> {
        let body = self.body()?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Turn a non-success response into an error carrying the engine's
    /// message when it sent one.
    fn into_error(self) -> EngineError {
        let status = self.status;
        let message = match self.body() {
            Ok(body) => match serde_json::from_slice::<Value>(&body) {
                Ok(Value::Object(map)) => match map.get("message") {
                    Some(Value::String(m)) => m.clone(),
                    _ => String::from_utf8_lossy(&body).trim().to_string(),
                },
                _ => String::from_utf8_lossy(&body).trim().to_string(),
            },
            Err(e) => format!("unreadable body: {}", e),
        };
        EngineError::Status { status, message }
    }
}

fn read_chunked<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, EngineError> {
    let mut body = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(EngineError::Protocol("connection closed inside chunked body".into()));
        }
        let size_text = line.trim().split(';').next().unwrap_or("");
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|_| EngineError::Protocol(format!("bad chunk size: {}", line.trim())))?;
        if size == 0 {
            // Trailers, then the blank line.
            loop {
                line.clear();
                if reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
                    break;
                }
            }
            return Ok(body);
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..])?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
    }
}
