//! Product catalog for the paywall.
//!
//! Catalog loading talks to the purchase store, which may be unreachable.
//! That is reported to the caller and never blocks access decisions, which
//! only use locally persisted state.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A purchasable product as listed by the store
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Product {
    pub id: String,
    pub display_name: String,
    pub display_price: String,
}

/// Source of product listings
pub trait ProductCatalog {
    fn load_products(&self, ids: &[String]) -> Result<Vec<Product>>;
}

/// Catalog backed by a fixed list, typically from the config file
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    products: Vec<Product>,
    reachable: bool,
}

impl StaticCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self {
            products,
            reachable: true,
        }
    }

    /// A catalog whose every load fails as if the network were down
    pub fn offline() -> Self {
        Self {
            products: Vec::new(),
            reachable: false,
        }
    }
}

impl ProductCatalog for StaticCatalog {
    fn load_products(&self, ids: &[String]) -> Result<Vec<Product>> {
        if !self.reachable {
            return Err(Error::StoreUnavailable("product catalog is offline".into()));
        }
        Ok(self
            .products
            .iter()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }
}

/// Outcome of a catalog load
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CatalogStatus {
    Loaded(Vec<Product>),
    Unavailable(String),
}

/// Load products, turning any failure into [`CatalogStatus::Unavailable`]
pub fn load_catalog(catalog: &dyn ProductCatalog, ids: &[String]) -> CatalogStatus {
    match catalog.load_products(ids) {
        Ok(products) => {
            tracing::info!("Loaded {} products", products.len());
            for product in &products {
                tracing::debug!("Product: {} ({})", product.display_name, product.display_price);
            }
            CatalogStatus::Loaded(products)
        }
        Err(e) => {
            tracing::warn!("Failed to load products: {}", e);
            CatalogStatus::Unavailable(e.to_string())
        }
    }
}
