// src/rpc/resilient_client.rs

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig},
    rpc_filter::{Memcmp, RpcFilterType},
    rpc_request::RpcError,
};
use solana_sdk::pubkey::Pubkey;
use tokio::time::sleep;

use crate::monitoring::metrics;
use crate::rpc::{GatewayAccount, MemcmpFilter, RateLimiter, SolanaGateway};

const MAX_BACKOFF_MS: u64 = 5_000;

/// Classement d'une erreur RPC : décide du sort de l'appel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeout, coupure réseau, rate-limit côté serveur : on réessaie avec
    /// backoff exponentiel jitté.
    Transient,
    /// Compte introuvable, adresse invalide : remonté tel quel.
    Permanent,
    /// Non classable : un seul réessai puis remontée.
    Unknown,
}

pub fn classify_error(error: &ClientError) -> ErrorClass {
    match &error.kind {
        ClientErrorKind::Reqwest(_) | ClientErrorKind::Io(_) => ErrorClass::Transient,
        ClientErrorKind::RpcError(rpc) => match rpc {
            RpcError::ForUser(_) => ErrorClass::Permanent,
            RpcError::ParseError(_) => ErrorClass::Permanent,
            RpcError::RpcRequestError(_) => ErrorClass::Transient,
            RpcError::RpcResponseError { .. } => ErrorClass::Transient,
        },
        ClientErrorKind::SerdeJson(_) => ErrorClass::Permanent,
        _ => ErrorClass::Unknown,
    }
}

/// Délai avant le réessai `attempt` (0-indexé) : exponentiel borné, avec un
/// jitter uniforme dans la moitié haute de la fenêtre.
pub fn backoff_delay(attempt: u8, base_delay_ms: u64) -> Duration {
    use rand::Rng;
    let exp = base_delay_ms.saturating_mul(1u64 << attempt.min(6)).min(MAX_BACKOFF_MS);
    let half = exp / 2;
    let jitter = if half > 0 {
        rand::thread_rng().gen_range(0..=half)
    } else {
        0
    };
    Duration::from_millis(half + jitter)
}

/// Client d'un endpoint unique : admission par seau à jetons, deadline par
/// appel, réessais pilotés par la classification d'erreur.
pub struct ResilientRpcClient {
    client: Arc<RpcClient>,
    limiter: RateLimiter,
    max_retries: u8,
    base_delay_ms: u64,
    request_timeout: Duration,
}

impl ResilientRpcClient {
    pub fn new(rpc_url: String, rate_limit_per_second: u32, max_retries: u8) -> Self {
        Self {
            client: Arc::new(RpcClient::new(rpc_url)),
            limiter: RateLimiter::new(rate_limit_per_second),
            max_retries,
            base_delay_ms: 250,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }

    async fn with_retry<T, Fut>(
        &self,
        method: &'static str,
        mut call: impl FnMut(Arc<RpcClient>) -> Fut,
    ) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, ClientError>>,
    {
        let mut attempt: u8 = 0;
        loop {
            self.limiter.acquire().await;

            let class = match tokio::time::timeout(self.request_timeout, call(self.client.clone())).await {
                Ok(Ok(value)) => {
                    metrics::RPC_REQUESTS_TOTAL
                        .with_label_values(&[method, "success"])
                        .inc();
                    return Ok(value);
                }
                Ok(Err(error)) => {
                    let class = classify_error(&error);
                    if class == ErrorClass::Permanent || attempt >= self.retry_budget(class) {
                        metrics::RPC_REQUESTS_TOTAL
                            .with_label_values(&[method, "failure"])
                            .inc();
                        return Err(error).with_context(|| format!("{} failed ({})", method, self.url()));
                    }
                    class
                }
                Err(_elapsed) => {
                    if attempt >= self.max_retries {
                        metrics::RPC_REQUESTS_TOTAL
                            .with_label_values(&[method, "timeout"])
                            .inc();
                        return Err(anyhow!(
                            "{} timed out after {:?} ({})",
                            method,
                            self.request_timeout,
                            self.url()
                        ));
                    }
                    ErrorClass::Transient
                }
            };

            tracing::debug!(method, attempt, ?class, "retrying RPC call");
            sleep(backoff_delay(attempt, self.base_delay_ms)).await;
            attempt += 1;
        }
    }

    fn retry_budget(&self, class: ErrorClass) -> u8 {
        match class {
            ErrorClass::Transient => self.max_retries,
            ErrorClass::Unknown => 1u8.min(self.max_retries),
            ErrorClass::Permanent => 0,
        }
    }
}

#[async_trait::async_trait]
impl SolanaGateway for ResilientRpcClient {
    async fn get_account(&self, address: &Pubkey) -> Result<GatewayAccount> {
        let address = *address;
        let account = self
            .with_retry("get_account", move |client| async move {
                client.get_account(&address).await
            })
            .await?;
        Ok(GatewayAccount {
            owner: account.owner,
            data: account.data,
        })
    }

    async fn get_account_data(&self, address: &Pubkey) -> Result<Vec<u8>> {
        let address = *address;
        self.with_retry("get_account_data", move |client| async move {
            client.get_account_data(&address).await
        })
        .await
    }

    async fn get_multiple_account_data(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        let addresses = addresses.to_vec();
        let accounts = self
            .with_retry("get_multiple_accounts", move |client| {
                let addresses = addresses.clone();
                async move { client.get_multiple_accounts(&addresses).await }
            })
            .await?;
        Ok(accounts
            .into_iter()
            .map(|maybe| maybe.map(|account| account.data))
            .collect())
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[MemcmpFilter],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>> {
        let program_id = *program_id;
        let rpc_filters: Vec<RpcFilterType> = filters
            .iter()
            .map(|f| RpcFilterType::Memcmp(Memcmp::new_raw_bytes(f.offset, f.bytes.clone())))
            .collect();

        let accounts = self
            .with_retry("get_program_accounts", move |client| {
                let config = RpcProgramAccountsConfig {
                    filters: Some(rpc_filters.clone()),
                    account_config: RpcAccountInfoConfig {
                        encoding: Some(UiAccountEncoding::Base64),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                async move {
                    client
                        .get_program_accounts_with_config(&program_id, config)
                        .await
                }
            })
            .await?;

        Ok(accounts
            .into_iter()
            .map(|(pubkey, account)| (pubkey, account.data))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_stays_bounded() {
        for attempt in 0..10u8 {
            let d = backoff_delay(attempt, 250);
            assert!(d <= Duration::from_millis(MAX_BACKOFF_MS));
        }
        // la fenêtre du 3e essai domine celle du 1er
        let early = backoff_delay(0, 250);
        assert!(early >= Duration::from_millis(125 / 2));
        assert!(early <= Duration::from_millis(250));
        let late = backoff_delay(3, 250);
        assert!(late >= Duration::from_millis(1_000));
    }

    #[test]
    fn for_user_errors_are_permanent() {
        let err: ClientError = RpcError::ForUser("AccountNotFound: pubkey=..".to_string()).into();
        assert_eq!(classify_error(&err), ErrorClass::Permanent);
    }

    #[test]
    fn request_errors_are_transient() {
        let err: ClientError = RpcError::RpcRequestError("503 Service Unavailable".to_string()).into();
        assert_eq!(classify_error(&err), ErrorClass::Transient);
    }
}
