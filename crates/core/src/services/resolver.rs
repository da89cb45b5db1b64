//! Account resolution - finds the escrow account a transaction touched.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use tracing::{debug, instrument, trace};

use crate::models::{Address, Discriminator};
use crate::ports::{ChainAccount, ChainSource};

/// Configuration for the account resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Program that must own the resolved account.
    pub program_id: Address,
    /// Maximum number of account keys probed per transaction.
    pub max_probes: usize,
    /// Number of probes in flight at once.
    pub probe_concurrency: usize,
    /// Timeout applied to each probe.
    pub probe_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            program_id: Address::ZERO,
            max_probes: 32,
            probe_concurrency: 4,
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// An account owned by the program whose data carries the expected tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAccount {
    pub address: Address,
    pub account: ChainAccount,
}

/// Probes a transaction's account keys for the program account it acted on.
pub struct AccountResolver<S: ChainSource> {
    config: ResolverConfig,
    chain: Arc<S>,
}

impl<S: ChainSource> AccountResolver<S> {
    pub fn new(config: ResolverConfig, chain: Arc<S>) -> Self {
        Self { config, chain }
    }

    /// Return the first key, in listed order, whose account is owned by the
    /// program and starts with `expected`.
    ///
    /// Probes run concurrently but are consumed in order. A probe that
    /// fails or times out counts as "not a match" and never cancels the
    /// others.
    #[instrument(skip_all, fields(keys = account_keys.len()))]
    pub async fn resolve(
        &self,
        account_keys: &[Address],
        expected: Discriminator,
    ) -> Option<ResolvedAccount> {
        let candidates = candidate_keys(account_keys, self.config.max_probes);

        let mut probes = stream::iter(candidates)
            .map(|address| self.probe(address, expected))
            .buffered(self.config.probe_concurrency.max(1));

        while let Some(result) = probes.next().await {
            if result.is_some() {
                return result;
            }
        }

        trace!("No matching account");
        None
    }

    async fn probe(&self, address: Address, expected: Discriminator) -> Option<ResolvedAccount> {
        let fetched =
            tokio::time::timeout(self.config.probe_timeout, self.chain.get_account(&address)).await;

        let account = match fetched {
            Ok(Ok(Some(account))) => account,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                debug!(account = %address.short(), error = ?e, "Account probe failed");
                return None;
            }
            Err(_) => {
                debug!(account = %address.short(), "Account probe timed out");
                return None;
            }
        };

        (account.owner == self.config.program_id && expected.matches(&account.data))
            .then_some(ResolvedAccount { address, account })
    }
}

/// Distinct keys in listed order, at most `max` of them.
pub(super) fn candidate_keys(account_keys: &[Address], max: usize) -> Vec<Address> {
    let mut seen = HashSet::new();
    account_keys
        .iter()
        .copied()
        .filter(|address| seen.insert(*address))
        .take(max)
        .collect()
}
