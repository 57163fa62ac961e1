// src/subscription/transport.rs

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::StreamExt;
use solana_account_decoder::{UiAccountData, UiAccountEncoding};
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::rpc_config::RpcAccountInfoConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::monitoring::metrics;

/// Notification de compte reçue du canal push : octets décodés et slot
/// monotone du contexte.
#[derive(Debug, Clone)]
pub struct AccountUpdate {
    pub account: Pubkey,
    pub data: Vec<u8>,
    pub slot: u64,
}

/// Fabrique de connexions push. Une connexion multiplexe tous les
/// abonnements ; à la coupure, l'abonné en rouvre une et se réabonne.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn PushConnection>>;
}

/// Une connexion établie. `open` enregistre l'abonnement sur le fil — la
/// requête est partie quand le futur résout, ce qui fixe l'ordre — et
/// retourne le flux de notifications. La fin du flux signale la coupure.
#[async_trait]
pub trait PushConnection: Send + Sync {
    async fn open(&self, account: Pubkey) -> Result<mpsc::Receiver<AccountUpdate>>;
}

/// Transport de production : accountSubscribe JSON-RPC sur la connexion
/// websocket du client pubsub, données en base64, slot dans le contexte.
pub struct PubsubTransport {
    ws_url: String,
}

impl PubsubTransport {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self { ws_url: ws_url.into() }
    }
}

#[async_trait]
impl PushTransport for PubsubTransport {
    async fn connect(&self) -> Result<Arc<dyn PushConnection>> {
        let client = PubsubClient::new(&self.ws_url)
            .await
            .with_context(|| format!("websocket connection to {} failed", self.ws_url))?;
        Ok(Arc::new(PubsubConnection { client: Arc::new(client) }))
    }
}

struct PubsubConnection {
    client: Arc<PubsubClient>,
}

#[async_trait]
impl PushConnection for PubsubConnection {
    async fn open(&self, account: Pubkey) -> Result<mpsc::Receiver<AccountUpdate>> {
        let (tx, rx) = mpsc::channel(256);
        let (ready_tx, ready_rx) = oneshot::channel();
        let client = self.client.clone();

        tokio::spawn(async move {
            let config = RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                commitment: Some(CommitmentConfig::confirmed()),
                ..Default::default()
            };
            let subscribed = client.account_subscribe(&account, Some(config)).await;
            let (mut stream, _unsubscribe) = match subscribed {
                Ok(pair) => {
                    let _ = ready_tx.send(Ok(()));
                    pair
                }
                Err(error) => {
                    let _ = ready_tx.send(Err(anyhow!("accountSubscribe failed: {}", error)));
                    return;
                }
            };

            while let Some(response) = stream.next().await {
                metrics::PUSH_MESSAGES_RECEIVED.inc();
                let data = match response.value.data {
                    UiAccountData::Binary(encoded, _) => match STANDARD.decode(&encoded) {
                        Ok(bytes) => bytes,
                        Err(error) => {
                            warn!(%account, %error, "notification base64 illisible");
                            continue;
                        }
                    },
                    _ => continue,
                };
                let update = AccountUpdate { account, data, slot: response.context.slot };
                if tx.send(update).await.is_err() {
                    return; // récepteur parti
                }
            }
            // fin de flux : la connexion est morte, tx tombe et ferme rx
        });

        ready_rx.await.map_err(|_| anyhow!("subscription task died before registering"))??;
        Ok(rx)
    }
}

/// Abonné persistant : possède la table des abonnements, rouvre la
/// connexion sur coupure (ticker à délai configurable) et réabonne toutes
/// les souscriptions vivantes, dans l'ordre d'origine, avant d'accepter les
/// nouvelles. Les notifications perdues pendant la coupure ne sont pas
/// rejouées : les dépendants se resynchronisent à la prochaine lecture ou à
/// la notification suivante.
pub struct AccountSubscriber {
    transport: Arc<dyn PushTransport>,
    state: std::sync::Mutex<SubscriberState>,
    update_tx: mpsc::Sender<AccountUpdate>,
}

struct SubscriberState {
    connection: Option<Arc<dyn PushConnection>>,
    accounts: Vec<Pubkey>,
    connected: bool,
    generation: u64,
}

impl AccountSubscriber {
    pub fn new(transport: Arc<dyn PushTransport>, update_tx: mpsc::Sender<AccountUpdate>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            state: std::sync::Mutex::new(SubscriberState {
                connection: None,
                accounts: Vec::new(),
                connected: false,
                generation: 0,
            }),
            update_tx,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    /// Établit (ou rétablit) la connexion puis réabonne la table existante,
    /// séquentiellement et dans l'ordre d'arrivée d'origine. Le lien n'est
    /// marqué connecté qu'une fois la table entièrement réabonnée : un
    /// abonnement arrivé entre-temps est mis en file et passe après.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        let connection = self.transport.connect().await?;
        let generation = {
            let mut state = self.state.lock().unwrap();
            state.connection = Some(connection.clone());
            state.connected = false;
            state.generation += 1;
            state.generation
        };

        let mut opened = 0usize;
        loop {
            let batch: Vec<Pubkey> = {
                let mut state = self.state.lock().unwrap();
                if state.accounts.len() == opened {
                    state.connected = true;
                    break;
                }
                state.accounts[opened..].to_vec()
            };
            for account in batch {
                match connection.open(account).await {
                    Ok(rx) => self.spawn_forward(account, rx, generation),
                    Err(error) => {
                        // connexion inutilisable : on laisse le lien marqué
                        // coupé, le ticker retentera tout depuis le début
                        warn!(%account, %error, "échec de réabonnement");
                        return Err(error);
                    }
                }
                opened += 1;
            }
        }
        Ok(())
    }

    /// Abonne un compte. Hors connexion, il est enregistré et sera souscrit
    /// au retour du lien.
    pub async fn subscribe_account(self: &Arc<Self>, account: Pubkey) -> Result<()> {
        let connection = {
            let mut state = self.state.lock().unwrap();
            if state.accounts.contains(&account) {
                return Ok(());
            }
            state.accounts.push(account);
            if state.connected { state.connection.clone() } else { None }
        };
        if let Some(connection) = connection {
            let generation = self.state.lock().unwrap().generation;
            let rx = connection.open(account).await?;
            self.spawn_forward(account, rx, generation);
        }
        Ok(())
    }

    fn spawn_forward(
        self: &Arc<Self>,
        account: Pubkey,
        mut rx: mpsc::Receiver<AccountUpdate>,
        generation: u64,
    ) {
        let subscriber = self.clone();
        let tx = self.update_tx.clone();
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                if tx.send(update).await.is_err() {
                    return;
                }
            }
            // Flux clos : la connexion de cette génération est tombée.
            let mut state = subscriber.state.lock().unwrap();
            if state.generation == generation {
                state.connected = false;
                state.connection = None;
                tracing::debug!(%account, "flux push terminé, lien marqué coupé");
            }
        });
    }

    /// Boucle de surveillance : tant que le lien est coupé, tente une
    /// reconnexion à chaque tick.
    pub fn spawn_reconnect_loop(self: &Arc<Self>, delay: std::time::Duration) {
        let subscriber = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(delay);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if subscriber.is_connected() {
                    continue;
                }
                match subscriber.connect().await {
                    Ok(()) => info!("websocket reconnecté, abonnements restaurés"),
                    Err(error) => warn!(%error, "échec de reconnexion websocket"),
                }
            }
        });
    }
}
