//! XMPP client connection the focus process authenticates to the XMPP
//! server with (spec §6 `XmppTransport`). Structurally the same
//! handshake state machine and websocket read/write loop as the
//! teacher's `JitsiConnection` (SASL → bind → disco), generalized from a
//! single conference-bound bot connection into a general-purpose
//! request/reply transport that `focus-core`'s boundary traits are
//! implemented against.

use std::{collections::HashMap, convert::TryFrom, fmt, future::Future, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use focus_core::{FocusError, FocusResult};
use futures::{
  sink::{Sink, SinkExt},
  stream::{Stream, StreamExt, TryStreamExt},
};
use rand::RngCore;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::{
  http::{Request, Uri},
  Message,
};
use tracing::{debug, error, info, warn};
use xmpp_parsers::{
  bind::{BindQuery, BindResponse},
  disco::{DiscoInfoQuery, DiscoInfoResult},
  iq::{Iq, IqType},
  sasl::{Auth, Mechanism, Success},
  websocket::Open,
  BareJid, Element, FullJid, Jid,
};

use crate::xmpp::{extdisco, pinger::Pinger, stanza_filter::StanzaFilter};

pub enum Authentication {
  Anonymous,
  Plain { username: String, password: String },
}

#[derive(Debug, Clone, Copy)]
enum State {
  OpeningPreAuth,
  ReceivingFeaturesPreAuth,
  Authenticating,
  OpeningPostAuth,
  ReceivingFeaturesPostAuth,
  Binding,
  Discovering,
  DiscoveringExternalServices,
  Ready,
}

type Handler = Box<dyn Fn(Element) -> Result<()> + Send + Sync>;

struct Inner {
  state: State,
  xmpp_domain: BareJid,
  jid: Option<FullJid>,
  external_services: Vec<extdisco::Service>,
  connected_tx: Option<oneshot::Sender<Result<()>>>,
  stanza_filters: Vec<Box<dyn StanzaFilter + Send + Sync>>,
  pending_replies: HashMap<String, oneshot::Sender<Element>>,
  handlers: Vec<((&'static str, &'static str), Handler)>,
}

impl fmt::Debug for Inner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Inner")
      .field("state", &self.state)
      .field("xmpp_domain", &self.xmpp_domain)
      .field("jid", &self.jid)
      .finish()
  }
}

/// The focus process's connection to the XMPP server (spec §6
/// `XmppTransport`).
#[derive(Clone)]
pub struct Transport {
  tx: mpsc::Sender<Element>,
  inner: Arc<Mutex<Inner>>,
  auth: Arc<Authentication>,
}

impl Transport {
  pub async fn connect(
    websocket_url: &str,
    xmpp_domain: &str,
    auth: Authentication,
    tls_insecure: bool,
  ) -> Result<(Self, impl Future<Output = ()>)> {
    let websocket_url: Uri = websocket_url.parse().context("invalid WebSocket URL")?;
    let xmpp_domain: BareJid = xmpp_domain.parse().context("invalid XMPP domain")?;

    info!("connecting XMPP websocket to {}", websocket_url);
    let connector = crate::xmpp::tls::wss_connector(tls_insecure)?;
    let mut key = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key);
    let request = Request::get(&websocket_url)
      .header("sec-websocket-protocol", "xmpp")
      .header("sec-websocket-key", base64::encode(key))
      .header("sec-websocket-version", "13")
      .header("host", websocket_url.host().context("invalid WebSocket URL: missing host")?)
      .header("connection", "Upgrade")
      .header("upgrade", "websocket")
      .body(())
      .context("failed to build websocket request")?;
    let (websocket, _response) =
      tokio_tungstenite::connect_async_tls_with_config(request, None, true, Some(connector))
        .await
        .context("failed to connect XMPP websocket")?;
    let (sink, stream) = websocket.split();
    let (tx, rx) = mpsc::channel(64);

    let inner = Arc::new(Mutex::new(Inner {
      state: State::OpeningPreAuth,
      xmpp_domain,
      jid: None,
      external_services: vec![],
      connected_tx: None,
      stanza_filters: vec![],
      pending_replies: HashMap::new(),
      handlers: vec![],
    }));

    let transport = Self { tx: tx.clone(), inner: inner.clone(), auth: Arc::new(auth) };

    let writer = Self::write_loop(rx, sink);
    let reader = Self::read_loop(inner, tx, stream, transport.auth.clone());
    let background = async move {
      tokio::select! {
        res = reader => if let Err(e) = res { error!("fatal (read loop): {:?}", e) },
        res = writer => if let Err(e) = res { error!("fatal (write loop): {:?}", e) },
      }
    };

    Ok((transport, background))
  }

  pub async fn connected(&self) -> Result<()> {
    let (tx, rx) = oneshot::channel();
    {
      let mut inner = self.inner.lock().await;
      inner.connected_tx = Some(tx);
      let open = Open::new(inner.xmpp_domain.clone());
      self.tx.send(open.into()).await?;
    }
    rx.await?
  }

  pub async fn jid(&self) -> Option<FullJid> {
    self.inner.lock().await.jid.clone()
  }

  pub async fn external_services(&self) -> Vec<extdisco::Service> {
    self.inner.lock().await.external_services.clone()
  }

  /// A clone of the outbound stanza channel, for a `StanzaFilter` that
  /// needs to send a reply outside of `send`/`send_and_await_reply`'s
  /// request/response bookkeeping (the same handle `Pinger` is built
  /// with internally).
  pub fn sender(&self) -> mpsc::Sender<Element> {
    self.tx.clone()
  }

  /// Registers a handler for every IQ/presence stanza matching
  /// `(element_name, namespace)` (spec §6 `XmppTransport`: "register
  /// stanza request handlers by (element, namespace, IQ type)").
  pub async fn register_handler(
    &self,
    element_name: &'static str,
    namespace: &'static str,
    handler: impl Fn(Element) -> Result<()> + Send + Sync + 'static,
  ) {
    self.inner.lock().await.handlers.push(((element_name, namespace), Box::new(handler)));
  }

  pub async fn add_stanza_filter(&self, filter: impl StanzaFilter + Send + Sync + 'static) {
    self.inner.lock().await.stanza_filters.push(Box::new(filter));
  }

  async fn write_loop<S>(rx: mpsc::Receiver<Element>, mut sink: S) -> Result<()>
  where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
  {
    let mut rx = ReceiverStream::new(rx);
    while let Some(element) = rx.next().await {
      let mut bytes = Vec::new();
      element.write_to(&mut bytes)?;
      let xml = String::from_utf8(bytes)?;
      debug!("XMPP    >>> {}", xml);
      sink.send(Message::Text(xml)).await?;
    }
    Ok(())
  }

  async fn read_loop<S>(
    inner: Arc<Mutex<Inner>>,
    tx: mpsc::Sender<Element>,
    mut stream: S,
    auth: Arc<Authentication>,
  ) -> Result<()>
  where
    S: Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
  {
    loop {
      let message = stream.try_next().await?.ok_or_else(|| anyhow!("unexpected EOF"))?;
      let element: Element = match message {
        Message::Text(xml) => {
          debug!("XMPP    <<< {}", xml);
          xml.parse()?
        },
        _ => {
          warn!("unexpected non-text websocket message: {:?}", message);
          continue;
        },
      };

      let mut locked = inner.lock().await;
      use State::*;
      match locked.state {
        OpeningPreAuth => {
          Open::try_from(element)?;
          info!("XMPP websocket open");
          locked.state = ReceivingFeaturesPreAuth;
        },
        ReceivingFeaturesPreAuth => {
          let auth_stanza = match auth.as_ref() {
            Authentication::Anonymous => Auth { mechanism: Mechanism::Anonymous, data: vec![] },
            Authentication::Plain { username, password } => Auth {
              mechanism: Mechanism::Plain,
              data: format!("\0{username}\0{password}").into_bytes(),
            },
          };
          tx.send(auth_stanza.into()).await?;
          locked.state = Authenticating;
        },
        Authenticating => {
          Success::try_from(element)?;
          let open = Open::new(locked.xmpp_domain.clone());
          tx.send(open.into()).await?;
          locked.state = OpeningPostAuth;
        },
        OpeningPostAuth => {
          Open::try_from(element)?;
          info!("authenticated");
          locked.state = ReceivingFeaturesPostAuth;
        },
        ReceivingFeaturesPostAuth => {
          let iq = Iq::from_set(focus_core::util::generate_id(), BindQuery::new(None));
          tx.send(iq.into()).await?;
          locked.state = Binding;
        },
        Binding => {
          let iq = Iq::try_from(element)?;
          let jid = if let IqType::Result(Some(element)) = iq.payload {
            FullJid::try_from(BindResponse::try_from(element)?)?
          }
          else {
            bail!("bind failed");
          };
          info!("focus JID: {}", jid);
          locked.jid = Some(jid.clone());
          locked.stanza_filters.push(Box::new(Pinger { jid: jid.clone(), tx: tx.clone() }));

          let iq = Iq::from_get(focus_core::util::generate_id(), DiscoInfoQuery { node: None })
            .with_from(Jid::Full(jid.clone()))
            .with_to(Jid::Bare(locked.xmpp_domain.clone()));
          tx.send(iq.into()).await?;
          locked.state = Discovering;
        },
        Discovering => {
          let iq = Iq::try_from(element)?;
          if let IqType::Result(Some(element)) = iq.payload {
            let _ = DiscoInfoResult::try_from(element)?;
          }
          else {
            bail!("disco failed");
          }
          let iq = Iq::from_get(focus_core::util::generate_id(), extdisco::ServicesQuery {})
            .with_from(Jid::Full(locked.jid.clone().context("missing jid")?))
            .with_to(Jid::Bare(locked.xmpp_domain.clone()));
          tx.send(iq.into()).await?;
          locked.state = DiscoveringExternalServices;
        },
        DiscoveringExternalServices => {
          if let Ok(iq) = Iq::try_from(element.clone()) {
            if let IqType::Result(Some(element)) = iq.payload {
              if let Ok(services) = extdisco::ServicesResult::try_from(element) {
                locked.external_services = services.services;
              }
            }
          }
          if let Some(tx) = locked.connected_tx.take() {
            tx.send(Ok(())).map_err(|_| anyhow!("channel closed"))?;
          }
          locked.state = Ready;
        },
        Ready => {
          if let Ok(iq) = Iq::try_from(element.clone()) {
            if let Some(reply_tx) = locked.pending_replies.remove(&iq.id) {
              let _ = reply_tx.send(element.clone());
              continue;
            }
          }
          let handlers_match: Vec<_> = locked
            .handlers
            .iter()
            .filter(|((name, ns), _)| element.is(*name, *ns))
            .collect();
          for ((_, _), handler) in handlers_match {
            if let Err(e) = handler(element.clone()) {
              warn!("stanza handler failed: {:?}", e);
            }
          }
          for filter in locked.stanza_filters.iter() {
            if filter.filter(&element) {
              let element = element.clone();
              let filter_take = filter.take(element);
              tokio::spawn(async move {
                if let Err(e) = filter_take.await {
                  warn!("stanza filter failed: {:?}", e);
                }
              });
            }
          }
        },
      }
    }
  }
}

#[async_trait]
impl focus_core::interfaces::XmppTransport for Transport {
  #[tracing::instrument(level = "trace", skip(self, stanza), err)]
  async fn send_and_await_reply(
    &self,
    to: &Jid,
    mut stanza: Element,
    timeout: Duration,
  ) -> FocusResult<Element> {
    let id = stanza.attr("id").map(ToOwned::to_owned).unwrap_or_else(focus_core::util::generate_id);
    stanza.set_attr("id", id.clone());
    stanza.set_attr("to", to.to_string());

    let (reply_tx, reply_rx) = oneshot::channel();
    self.inner.lock().await.pending_replies.insert(id, reply_tx);
    self.tx.send(stanza).await.map_err(|e| FocusError::Internal(anyhow!(e.to_string())))?;

    tokio::time::timeout(timeout, reply_rx)
      .await
      .map_err(|_| FocusError::Timeout)?
      .map_err(|e| FocusError::Internal(anyhow!(e)))
  }

  #[tracing::instrument(level = "trace", skip(self, stanza), err)]
  async fn send(&self, to: &Jid, mut stanza: Element) -> FocusResult<()> {
    stanza.set_attr("to", to.to_string());
    self.tx.send(stanza).await.map_err(|e| FocusError::Internal(anyhow!(e.to_string())))
  }
}
