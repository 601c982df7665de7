//! Quick launch: get the operator in front of a web UI with one command.
//!
//! Network instruments usually serve a UI from their own firmware; when
//! that answers we just point the browser at it. Otherwise (serial
//! instruments in particular) the local proxy webserver is hosted in the
//! background and the browser is pointed there instead.

use std::net::SocketAddr;
use std::process::Command;
use std::time::Duration;

use anyhow::Context;
use tether_core::{Controller, Endpoint};

use crate::web;

/// Address the fallback proxy webserver listens on.
const LOCAL_LISTEN: &str = "127.0.0.1:8000";

/// How long the firmware UI gets to answer before we give up on it.
const REACHABILITY_TIMEOUT: Duration = Duration::from_millis(800);

pub async fn run(controller: Controller) -> anyhow::Result<()> {
    if let Some(url) = firmware_ui_url(controller.endpoint()) {
        tracing::debug!(%url, "checking for a firmware-hosted web UI");
        if is_reachable(&url).await {
            println!("Opening {url}");
            return open_browser(&url);
        }
    }

    let listen: SocketAddr = LOCAL_LISTEN.parse()?;
    let url = format!("http://{listen}");
    tracing::debug!("no firmware web UI answered, hosting the proxy at {url}");
    let server = tokio::spawn(web::serve(controller, listen, None));
    println!("Opening {url}");
    open_browser(&url)?;
    server.await?
}

/// Only network instruments can host their own UI next to the JSONL port.
fn firmware_ui_url(endpoint: &Endpoint) -> Option<String> {
    match endpoint {
        Endpoint::Net { host, .. } => Some(format!("http://{host}{}/", web::UI_PATH)),
        Endpoint::Serial { .. } => None,
    }
}

async fn is_reachable(url: &str) -> bool {
    let Ok(client) = reqwest::Client::builder()
        .timeout(REACHABILITY_TIMEOUT)
        .build()
    else {
        return false;
    };
    match client.get(url).send().await {
        Ok(response) => response.status().as_u16() < 400,
        Err(_) => false,
    }
}

fn open_browser(url: &str) -> anyhow::Result<()> {
    let (program, args) = browser_command(std::env::consts::OS, url)
        .with_context(|| format!("no known browser launcher on this platform; open {url} yourself"))?;
    tracing::debug!(program, "launching browser");
    Command::new(program)
        .args(args)
        .spawn()
        .with_context(|| format!("could not launch {program}; open {url} yourself"))?;
    Ok(())
}

fn browser_command(os: &str, url: &str) -> Option<(&'static str, Vec<String>)> {
    match os {
        "linux" => Some(("xdg-open", vec![url.to_string()])),
        "macos" => Some(("open", vec![url.to_string()])),
        "windows" => Some((
            "rundll32",
            vec!["url.dll,FileProtocolHandler".to_string(), url.to_string()],
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firmware_ui_only_for_network_instruments() {
        let net = Endpoint::Net {
            host: "lab-rack".to_string(),
            port: 5732,
        };
        assert_eq!(firmware_ui_url(&net).as_deref(), Some("http://lab-rack/ui/"));

        let serial = Endpoint::Serial {
            path: "/dev/ttyACM0".to_string(),
        };
        assert_eq!(firmware_ui_url(&serial), None);
    }

    #[test]
    fn browser_launchers_per_platform() {
        let (program, args) = browser_command("linux", "http://x").unwrap();
        assert_eq!(program, "xdg-open");
        assert_eq!(args, ["http://x"]);

        let (program, args) = browser_command("windows", "http://x").unwrap();
        assert_eq!(program, "rundll32");
        assert_eq!(args[0], "url.dll,FileProtocolHandler");

        assert!(browser_command("plan9", "http://x").is_none());
    }
}
