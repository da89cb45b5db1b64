//! Business logic services.

mod indexer;
mod resolver;

pub use indexer::{BatchReport, IndexerConfig, IndexerService, MAX_PAGE_SIZE};
pub use resolver::{AccountResolver, ResolvedAccount, ResolverConfig};
