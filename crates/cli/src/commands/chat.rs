//! `concierge chat`: run one turn in-process and print the SSE frames.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use concierge_core::identity::CallerIdentity;
use concierge_core::message::Role;
use concierge_gateway::GatewayState;
use concierge_gateway::api::{AttachmentDto, ChatRequest, MessageDto};

use super::load_config;

/// User id recorded for sessions started from the command line.
const LOCAL_USER: &str = "local";

pub async fn run(
    config_path: Option<&Path>,
    message: String,
    attach: Vec<PathBuf>,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    if !config.has_api_key() {
        return Err("No API key configured. Set CONCIERGE_API_KEY or api_key in config.toml".into());
    }

    let attachments = attach
        .iter()
        .map(|p| read_attachment(p))
        .collect::<Result<Vec<_>, _>>()?;

    let request = ChatRequest {
        messages: vec![MessageDto {
            role: Role::User,
            content: message,
            attachments,
            tool_invocations: Vec::new(),
        }],
        session_id: session,
        correlation_id: None,
    };

    let state = Arc::new(GatewayState::from_config(config).await?);
    let mut rx = concierge_gateway::stream_turn(state, CallerIdentity::new(LOCAL_USER), request).await?;

    while let Some(event) = rx.recv().await {
        let mut out = std::io::stdout().lock();
        out.write_all(event.to_frame().as_bytes())?;
        out.flush()?;
    }
    Ok(())
}

fn read_attachment(path: &Path) -> Result<AttachmentDto, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path).map_err(|e| format!("Cannot read {}: {e}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".into());
    Ok(AttachmentDto {
        mime_type: mime_for(path).to_string(),
        name,
        data: Some(STANDARD.encode(bytes)),
    })
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "txt" | "md" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_from_extension() {
        assert_eq!(mime_for(Path::new("rfq.PDF")), "application/pdf");
        assert_eq!(mime_for(Path::new("site.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("notes")), "application/octet-stream");
    }
}
