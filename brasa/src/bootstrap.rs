//! Process-level setup: logging, listen address and the local OpenAPI file.

use std::path::Path;

use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

use crate::error::StartupError;

/// How the global tracing subscriber is set up at server construction.
#[derive(Default)]
pub(crate) enum LogSetup {
    /// `fmt` subscriber filtered by `RUST_LOG` (default `info`).
    #[default]
    Default,
    /// Installs a subscriber that drops everything.
    Disabled,
    Custom(Dispatch),
}

/// 安装全局日志；已存在全局 subscriber 时静默忽略
pub(crate) fn init_logging(setup: LogSetup) {
    let result = match setup {
        LogSetup::Default => tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .try_init()
            .map_err(|e| e.to_string()),
        LogSetup::Disabled => tracing::dispatcher::set_global_default(Dispatch::none()).map_err(|e| e.to_string()),
        LogSetup::Custom(dispatch) => tracing::dispatcher::set_global_default(dispatch).map_err(|e| e.to_string()),
    };
    if let Err(err) = result {
        tracing::debug!(error = %err, "global subscriber already installed");
    }
}

/// `:9999` → `0.0.0.0:9999`; anything else must be `host:port`.
pub(crate) fn socket_addr(addr: &str) -> Result<String, StartupError> {
    let full = if addr.starts_with(':') { format!("0.0.0.0{addr}") } else { addr.to_string() };
    match full.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(full),
        _ => Err(StartupError::Address(addr.to_string())),
    }
}

/// Applies `HOST` / `PORT` over `current`.
pub(crate) fn addr_from_env(current: &str) -> String {
    addr_from(current, std::env::var("HOST").ok(), std::env::var("PORT").ok())
}

fn addr_from(current: &str, host: Option<String>, port: Option<String>) -> String {
    let (current_host, current_port) = current.rsplit_once(':').unwrap_or(("", current));
    let host = host.filter(|h| !h.is_empty()).unwrap_or_else(|| current_host.to_string());
    let port = port.filter(|p| !p.is_empty()).unwrap_or_else(|| current_port.to_string());
    format!("{host}:{port}")
}

/// 保存 OpenAPI 文档到本地，自动创建父目录
pub(crate) fn save_openapi(path: impl AsRef<Path>, spec: &str) -> Result<(), StartupError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, spec)?;
    tracing::info!(file = %path.display(), "saved OpenAPI document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_listens_everywhere() {
        assert_eq!(socket_addr(":9999").unwrap(), "0.0.0.0:9999");
        assert_eq!(socket_addr("127.0.0.1:8080").unwrap(), "127.0.0.1:8080");
        assert!(matches!(socket_addr("localhost"), Err(StartupError::Address(_))));
        assert!(socket_addr(":http").is_err());
    }

    #[test]
    fn env_overrides_parts_of_the_address() {
        assert_eq!(addr_from(":9999", None, Some("8080".into())), ":8080");
        assert_eq!(addr_from(":9999", Some("127.0.0.1".into()), None), "127.0.0.1:9999");
        assert_eq!(addr_from(":9999", None, None), ":9999");
    }

    #[test]
    fn saving_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("doc/nested/openapi.json");
        save_openapi(&file, "{}").unwrap();
        assert_eq!(std::fs::read_to_string(file).unwrap(), "{}");
    }
}
