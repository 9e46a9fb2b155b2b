use async_trait::async_trait;
use chrono::{DateTime, Utc};
use encore_core::{OptionId, OptionListing, PriceCatalog, StoreResult};
use std::collections::BTreeMap;

/// Fixed option listings, prices in minor units
#[derive(Debug, Clone, Default)]
pub struct StaticPriceCatalog {
    options: BTreeMap<OptionId, OptionListing>,
}

impl StaticPriceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Untitled option with an unbounded reservation window.
    pub fn with_price(self, option_id: OptionId, price: i64) -> Self {
        self.with_option(OptionListing {
            id: option_id,
            title: format!("Option {}", option_id),
            price,
            reserve_from: None,
            reserve_until: None,
        })
    }

    pub fn with_option(mut self, listing: OptionListing) -> Self {
        self.options.insert(listing.id, listing);
        self
    }
}

#[async_trait]
impl PriceCatalog for StaticPriceCatalog {
    async fn price_for(&self, option_id: OptionId) -> StoreResult<Option<i64>> {
        Ok(self.options.get(&option_id).map(|o| o.price))
    }

    async fn list_open_options(&self, at: DateTime<Utc>) -> StoreResult<Vec<OptionListing>> {
        Ok(self.options.values().filter(|o| o.is_open_at(at)).cloned().collect())
    }
}
