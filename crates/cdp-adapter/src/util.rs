use anyhow::{anyhow, Result};
use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

const STDERR_PREVIEW_LINES: usize = 8;

/// Parses a `DevTools listening on ws://...` banner line.
pub fn ws_url_from_banner(line: &str) -> Option<&str> {
    let (_, tail) = line.rsplit_once("listening on ")?;
    let url = tail.trim();
    (url.starts_with("ws") && url.contains("/devtools/browser/")).then_some(url)
}

/// Reads Chromium stderr until the DevTools websocket banner shows up.
pub async fn extract_ws_url(child: &mut Child) -> Result<String> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("chromium process missing stderr handle"))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut preview = Vec::with_capacity(STDERR_PREVIEW_LINES);

    let reader = async {
        while let Some(line) = lines.next().await {
            let line = line?;
            if let Some(url) = ws_url_from_banner(&line) {
                return Ok(url.to_string());
            }
            if preview.len() < STDERR_PREVIEW_LINES {
                preview.push(line);
            }
        }
        Err(anyhow!(
            "chromium exited before printing its devtools url; stderr: {}",
            preview.join(" | ")
        ))
    };

    timeout(Duration::from_secs(20), reader)
        .await
        .map_err(|_| anyhow!("timed out waiting for chromium devtools websocket url"))?
}

#[cfg(test)]
mod tests {
    use super::ws_url_from_banner;

    #[test]
    fn parses_devtools_banner() {
        let line = "DevTools listening on ws://127.0.0.1:9222/devtools/browser/4f1c-aa\n";
        assert_eq!(
            ws_url_from_banner(line),
            Some("ws://127.0.0.1:9222/devtools/browser/4f1c-aa")
        );
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert_eq!(ws_url_from_banner("[1017/101010.1:ERROR] gpu init failed"), None);
        assert_eq!(ws_url_from_banner("listening on http://localhost:9222"), None);
    }
}
