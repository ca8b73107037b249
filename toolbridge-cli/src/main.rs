use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use toolbridge_server::{HandlerError, Request, Response, Server, ServerConfig, handler_fn};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "toolbridge")]
struct Cli {
    /// TOML file with the server configuration.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Debug, Serialize)]
struct RequestDescription<'a> {
    method: &'a str,
    target: &'a str,
    version: &'a str,
    remote: String,
    headers: Vec<(&'a str, &'a [String])>,
    body_bytes: usize,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = cli.host {
        config.listen.host = host;
    }
    if let Some(port) = cli.port {
        config.listen.port = port;
    }

    let server = Server::bind(config, handler_fn(describe))
        .await
        .map_err(|err| err.to_string())?;

    let cancel = CancellationToken::new();
    let stop = server.stop_handle();
    let abort = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stopping; interrupt again to abort open connections");
            stop.stop();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.cancel();
        }
    });

    server
        .run_until(cancel)
        .await
        .map_err(|err| err.to_string())?;
    server.wait_for_connections().await;
    info!("all connections closed");
    Ok(())
}

fn load_config(path: &Path) -> Result<ServerConfig, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("{}: {err}", path.display()))?;
    let config: ServerConfig = toml::from_str(&raw).map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}

fn describe(request: &Request<'_>) -> Result<Response, HandlerError> {
    let description = RequestDescription {
        method: request.method(),
        target: request.target(),
        version: request.version().as_str(),
        remote: request.remote.to_string(),
        headers: request
            .headers
            .iter()
            .map(|entry| (entry.name.as_str(), entry.values.as_slice()))
            .collect(),
        body_bytes: request.body_bytes().len(),
    };
    let body = serde_json::to_vec_pretty(&description)?;
    Ok(Response::ok()
        .with_header("Content-Type", "application/json")
        .with_body(body))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use toolbridge_server::{HeaderCollection, HttpVersion, Request, RequestLine};

    use super::{describe, load_config};

    #[test]
    fn describes_request_as_json() {
        let mut headers = HeaderCollection::new();
        headers.append("Accept", "text/html, application/json");
        let request = Request {
            line: RequestLine {
                method: "POST".to_string(),
                target: "/tools/run".to_string(),
                version: HttpVersion::Http11,
            },
            headers,
            body: Some(&b"{}"[..]),
            remote: "10.0.0.1:5000".parse().unwrap(),
        };

        let response = describe(&request).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(
            response.headers.get_first("content-type"),
            Some("application/json")
        );
        assert!(response.content.unwrap().declared_length().unwrap() > 0);
    }

    fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_partial_toml() {
        let file = config_file("[listen]\nport = 8123\n\n[keep_alive]\nmax_requests = 5\n");

        let config = load_config(file.path()).unwrap();

        assert_eq!(config.listen.port, 8123);
        assert_eq!(config.listen.host, "127.0.0.1");
        assert_eq!(config.keep_alive.max_requests, 5);
        assert_eq!(config.keep_alive.idle_timeout_secs, 30);
    }

    #[test]
    fn rejects_invalid_toml_config() {
        let file = config_file("[keep_alive]\nmax_requests = 0\n");

        let result = load_config(file.path());
        assert!(result.unwrap_err().contains("max_requests"));
    }
}
