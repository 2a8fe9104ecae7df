//! Gateway - owns the store, bus, dispatcher and background threads
//!
//! This is the surface the outer layers (HTTP handlers, CLI) talk to:
//! dispatch intents, subscribe to the event stream, read snapshots.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, SubscriberId, Subscription};
use crate::catalog::{ArticleFile, CatalogWatcher, LocoEntry, LocoFile, SwitchArticle};
use crate::config::GatewayConfig;
use crate::dispatch::{Ack, CommandDispatcher, FrameSink, Intent, UdpSender};
use crate::error::DispatchError;
use crate::listener::{InboundListener, ListenerHandle, ListenerState};
use crate::shutdown::Shutdown;
use crate::state::{LocoState, StateSnapshot, StateStore, SystemState, SWITCH_COUNT};

/// Status summary for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub system_state: SystemState,
    pub loco_count: usize,
    pub switch_count: usize,
    pub udp_target: String,
    pub version: &'static str,
}

/// Running gateway instance
pub struct Gateway {
    config: GatewayConfig,
    store: Arc<StateStore>,
    dispatcher: CommandDispatcher,
    shutdown: Shutdown,
    listener: Option<ListenerHandle>,
    watcher: Option<JoinHandle<()>>,
}

impl Gateway {
    /// Build a gateway sending frames over UDP to the configured device
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let target = config.target_addr()?;
        let sender = UdpSender::new(target)
            .with_context(|| format!("Failed to open UDP sender for {}", target))?;
        info!("Outbound CS2 frames go to {}", target);
        Ok(Self::with_sink(config, Arc::new(sender)))
    }

    /// Build a gateway with a custom outbound transport
    pub fn with_sink(config: GatewayConfig, sink: Arc<dyn FrameSink>) -> Self {
        let bus = Arc::new(EventBus::with_capacity(config.events.queue_capacity));
        let store = Arc::new(StateStore::new(bus));
        let dispatcher = CommandDispatcher::new(Arc::clone(&store), sink, config.udp.device_uid);
        Self {
            config,
            store,
            dispatcher,
            shutdown: Shutdown::new(),
            listener: None,
            watcher: None,
        }
    }

    /// Load the catalogs and start the listener and catalog watcher
    pub fn start(&mut self) -> Result<()> {
        if self.listener.is_some() {
            bail!("gateway already started");
        }

        self.load_catalogs();

        let listener = InboundListener::new(
            Arc::clone(&self.store),
            self.config.bind_addr()?,
            self.config.recv_timeout(),
            self.shutdown.clone(),
        )
        .spawn()
        .context("Failed to start CS2 listener thread")?;
        if listener.state() == ListenerState::Stopped {
            warn!("CS2 listener is not running; inbound status updates are disabled");
        }
        self.listener = Some(listener);

        let mut watcher = CatalogWatcher::new(
            LocoFile::new(self.config.loco_file()),
            Arc::clone(&self.store),
            self.config.poll_interval(),
            self.shutdown.clone(),
        );
        watcher.prime();
        self.watcher = Some(watcher.spawn().context("Failed to start catalog watcher thread")?);

        info!("Gateway started");
        Ok(())
    }

    fn load_catalogs(&self) {
        let locos = LocoFile::new(self.config.loco_file());
        match locos.read() {
            Ok(entries) => {
                info!("Loaded {} locomotives from {}", entries.len(), locos.path().display());
                self.store.replace_catalog(entries);
            }
            Err(e) => warn!("Error loading lokomotive.cs2: {}", e),
        }

        let articles = ArticleFile::new(self.config.article_file());
        match articles.read() {
            Ok(list) => self.store.set_switch_catalog(list),
            Err(e) => warn!("Error loading magnetartikel.cs2: {}", e),
        }
    }

    /// Apply an intent and send the matching frame
    pub fn dispatch(&self, intent: &Intent) -> Result<Ack, DispatchError> {
        self.dispatcher.dispatch(intent)
    }

    /// Subscribe to the event stream (starts with a full-state catch-up)
    pub fn subscribe(&self) -> Subscription {
        self.store.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.store.bus().unsubscribe(id);
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.store.snapshot()
    }

    pub fn snapshot_loco(&self, loc_id: u32) -> Option<LocoState> {
        self.store.snapshot_loco(loc_id)
    }

    pub fn snapshot_switches(&self) -> Vec<i64> {
        self.store.snapshot_switches()
    }

    pub fn loco_catalog(&self) -> Vec<LocoEntry> {
        self.store.loco_catalog()
    }

    pub fn switch_catalog(&self) -> Vec<SwitchArticle> {
        self.store.switch_catalog()
    }

    /// Override a loco icon; viewers get `loco_list_reloaded`
    pub fn set_icon_override(&self, uid: u32, icon: impl Into<String>) {
        self.store.set_icon_override(uid, icon);
    }

    /// Status summary
    pub fn health(&self) -> Health {
        Health {
            status: "ok",
            system_state: self.store.system_state(),
            loco_count: self.store.loco_count(),
            switch_count: SWITCH_COUNT,
            udp_target: self.config.target_display(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Listener lifecycle (`Idle` before start)
    pub fn listener_state(&self) -> ListenerState {
        self.listener
            .as_ref()
            .map_or(ListenerState::Idle, ListenerHandle::state)
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Token that stops the background threads
    pub fn shutdown_token(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Stop background threads and wait for them
    pub fn shutdown(&mut self) {
        self.shutdown.trigger();
        if let Some(listener) = self.listener.take() {
            listener.join();
        }
        if let Some(watcher) = self.watcher.take() {
            if watcher.join().is_err() {
                error!("Catalog watcher thread panicked");
            }
        }
        debug!("Gateway stopped");
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}
