//! The conference focus process: joins a room's MUC on request, drives
//! Jingle signalling with each participant, and provisions COLIBRI
//! channels on videobridges (spec §1, §4.6).

mod conference_directory;
mod xmpp;

use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use focus_core::{
  bridge::{Bridge, StaticBridgeSelector},
  bridge_event_router::BridgeEventRouter,
  gateway::{Gateway, GatewayKind, StaticGatewaySelector},
  registry::{ConferenceRegistry, Services},
  FocusConfig,
};
use serde::Deserialize;
use structopt::StructOpt;
use tracing::{info, warn, Level};

use crate::{
  conference_directory::ConferenceDirectory,
  xmpp::{
    iq_surface::IqSurface,
    jingle_surface::JingleSurface,
    transport::{Authentication, Transport},
  },
};

#[derive(Debug, StructOpt)]
#[structopt(name = "focus", about = "Conference focus for Jitsi-style conferences")]
struct Opt {
  /// Path to a TOML settings file (connection details, bridges, gateways,
  /// and the orchestration config, spec §6 "Configuration surface").
  #[structopt(long, parse(from_os_str), default_value = "focus.toml")]
  config: PathBuf,

  /// Repeat for more verbose logging (info, debug, trace).
  #[structopt(short, long, parse(from_occurrences))]
  verbose: u8,

  #[structopt(long)]
  tls_insecure: bool,
}

#[derive(Debug, Deserialize)]
struct BridgeSettings {
  jid: String,
  region: Option<String>,
  relay_id: Option<String>,
  #[serde(default)]
  initial_load: u32,
}

#[derive(Debug, Deserialize)]
struct GatewaySettings {
  jid: String,
  kind: GatewaySettingsKind,
  #[serde(default)]
  initial_load: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum GatewaySettingsKind {
  Sip,
  Recording,
}

#[derive(Debug, Deserialize)]
struct Settings {
  websocket_url: String,
  xmpp_domain: String,
  xmpp_username: Option<String>,
  xmpp_password: Option<String>,
  #[serde(default = "default_nick")]
  nick: String,
  #[serde(default)]
  bridges: Vec<BridgeSettings>,
  #[serde(default)]
  gateways: Vec<GatewaySettings>,
  #[serde(flatten)]
  focus: FocusConfig,
}

fn default_nick() -> String {
  "focus".to_owned()
}

fn load_settings(path: &PathBuf) -> Result<Settings> {
  let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
  toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn build_bridge_selector(settings: &Settings) -> Result<StaticBridgeSelector> {
  let bridges = settings
    .bridges
    .iter()
    .map(|b| -> Result<(Bridge, u32)> {
      let jid = b.jid.parse().with_context(|| format!("invalid bridge jid {}", b.jid))?;
      Ok((Bridge { jid, relay_id: b.relay_id.clone(), region: b.region.clone() }, b.initial_load))
    })
    .collect::<Result<Vec<_>>>()?;
  if bridges.is_empty() {
    warn!("no bridges configured; conferences will fail with NO_BRIDGE_AVAILABLE");
  }
  Ok(StaticBridgeSelector::new(bridges))
}

fn build_gateway_selector(settings: &Settings) -> Result<Option<Arc<StaticGatewaySelector>>> {
  if settings.gateways.is_empty() {
    return Ok(None);
  }
  let gateways = settings
    .gateways
    .iter()
    .map(|g| -> Result<(Gateway, u32)> {
      let jid = g.jid.parse().with_context(|| format!("invalid gateway jid {}", g.jid))?;
      let kind = match g.kind {
        GatewaySettingsKind::Sip => GatewayKind::Sip,
        GatewaySettingsKind::Recording => GatewayKind::Recording,
      };
      Ok((Gateway { jid, kind }, g.initial_load))
    })
    .collect::<Result<Vec<_>>>()?;
  Ok(Some(Arc::new(StaticGatewaySelector::new(gateways))))
}

fn log_level(verbose: u8) -> Level {
  match verbose {
    0 => Level::INFO,
    1 => Level::DEBUG,
    _ => Level::TRACE,
  }
}

async fn main_inner() -> Result<()> {
  let opt = Opt::from_args();
  focus_core::init_tracing(log_level(opt.verbose));

  let settings = load_settings(&opt.config)?;
  let bridge_selector = Arc::new(build_bridge_selector(&settings)?);
  let gateway_selector = build_gateway_selector(&settings)?;

  let services = Services {
    bridge_selector,
    gateway_selector: gateway_selector.map(|g| g as Arc<dyn focus_core::gateway::GatewaySelector>),
    auth: None,
    config: settings.focus.clone(),
  };
  let registry = ConferenceRegistry::new(services);

  let auth = match (&settings.xmpp_username, &settings.xmpp_password) {
    (Some(username), Some(password)) => Authentication::Plain { username: username.clone(), password: password.clone() },
    _ => Authentication::Anonymous,
  };
  let (transport, background) =
    Transport::connect(&settings.websocket_url, &settings.xmpp_domain, auth, opt.tls_insecure).await?;
  let transport = Arc::new(transport);
  let background_task = tokio::spawn(background);

  transport.connected().await?;
  let focus_jid = transport.jid().await.context("XMPP bind did not complete")?;
  info!(%focus_jid, "focus connected");

  let bridge_events = BridgeEventRouter::new();
  let conferences =
    ConferenceDirectory::new(transport.clone(), settings.nick.clone(), focus_jid.clone(), registry.clone(), bridge_events);

  transport
    .add_stanza_filter(IqSurface {
      tx: transport.sender(),
      transport: transport.clone(),
      focus_jid: focus_jid.clone(),
      conferences: conferences.clone(),
      registry: registry.clone(),
    })
    .await;
  transport
    .add_stanza_filter(JingleSurface { tx: transport.sender(), focus_jid: focus_jid.clone(), conferences: conferences.clone() })
    .await;

  let idle_timeout = registry.services().config.idle_timeout;
  {
    let conferences = conferences.clone();
    let registry = registry.clone();
    tokio::spawn(async move {
      registry
        .run_idle_scan_loop(move |room| {
          let conferences = conferences.clone();
          tokio::spawn(async move {
            if let Some(conference) = conferences.get(&room).await {
              match conference.check_idle(idle_timeout).await {
                Ok(true) => conferences.remove(&room).await,
                Ok(false) => {},
                Err(e) => warn!(%room, "idle check failed: {:?}", e),
              }
            }
          });
        })
        .await;
    });
  }

  tokio::select! {
    _ = tokio::signal::ctrl_c() => {
      info!("received ctrl-c, shutting down gracefully");
      registry.enable_graceful_shutdown().await;
      for room in conferences.rooms().await {
        if let Some(conference) = conferences.get(&room).await {
          let _ = conference.stop().await;
        }
      }
    },
    res = background_task => {
      if let Err(e) = res {
        warn!("transport background task panicked: {:?}", e);
      }
    },
  }

  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  main_inner().await
}
