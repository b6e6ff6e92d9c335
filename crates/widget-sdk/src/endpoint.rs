//! Notification-channel endpoint derived from the webhook address.
//!
//! `https://api.<env>.canvas.twyla.ai/widget-hook/<workspace>/<project>`
//! maps to `wss://notification.<env>.canvas.twyla.ai/widget-notifications/<workspace>/<project>`.
//! Local development hooks keep their host and port.

use std::sync::OnceLock;

use cw_domain::error::{Error, Result};
use regex::Regex;
use url::{Host, Url};

const CANVAS_HOST: &str = "canvas.twyla.ai";
const NOTIFICATIONS_PATH: &str = "widget-notifications";

fn environment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(r"api\.(.*)\.canvas") {
        Ok(re) => re,
        Err(_) => unreachable!("static regex pattern is valid"),
    })
}

/// Where to open the notification channel for a given webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub channel_url: String,
    pub workspace_name: String,
    pub project_name: String,
}

/// Derive the channel endpoint from `hook_url`.
///
/// Pure: the same input always yields the same descriptor.
pub fn resolve(hook_url: &str) -> Result<EndpointDescriptor> {
    let url = Url::parse(hook_url)
        .map_err(|e| Error::InvalidEndpoint(format!("{hook_url}: {e}")))?;

    let tokens: Vec<&str> = hook_url.split('/').collect();
    let (workspace, project) = match (tokens.get(4), tokens.get(5)) {
        (Some(w), Some(p)) if !w.is_empty() && !p.is_empty() => (*w, *p),
        _ => {
            return Err(Error::InvalidEndpoint(format!(
                "{hook_url}: expected <scheme>://<host>/<hook>/<workspace>/<project>"
            )))
        }
    };

    let host = url
        .host()
        .ok_or_else(|| Error::InvalidEndpoint(format!("{hook_url}: missing host")))?;

    let base = if is_loopback(&host) {
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        let host_str = url.host_str().unwrap_or("localhost");
        match url.port() {
            Some(port) => format!("{scheme}://{host_str}:{port}"),
            None => format!("{scheme}://{host_str}"),
        }
    } else {
        let host_str = url.host_str().unwrap_or_default();
        match environment_regex()
            .captures(host_str)
            .and_then(|c| c.get(1))
        {
            Some(env) => format!("wss://notification.{}.{CANVAS_HOST}", env.as_str()),
            None => format!("wss://notification.{CANVAS_HOST}"),
        }
    };

    Ok(EndpointDescriptor {
        channel_url: format!("{base}/{NOTIFICATIONS_PATH}/{workspace}/{project}"),
        workspace_name: workspace.to_owned(),
        project_name: project.to_owned(),
    })
}

fn is_loopback(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(d) => d.eq_ignore_ascii_case("localhost"),
        Host::Ipv4(ip) => ip.is_loopback(),
        Host::Ipv6(ip) => ip.is_loopback(),
    }
}
