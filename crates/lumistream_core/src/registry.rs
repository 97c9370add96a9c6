//! Process-wide product schema registry.
//!
//! Every streamer file starts with an INIT header that lists the products
//! its events carry. The first header ever merged initializes the registry;
//! every later header must agree with what is already registered. Products
//! a header does not mention are kept, and new products are added until the
//! registry is frozen.
//!
//! The registry is shared between the reader and the downstream consumer as
//! a [`SharedRegistry`]. The consumer freezes it once the reader's start-up
//! phase has completed.

use crate::error::{CoreError, CoreResult};
use crate::streamer::{InitHeader, ProductDescriptor, SchemaFingerprint};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Registry shared between the reader and the consumer.
pub type SharedRegistry = Arc<RwLock<SchemaRegistry>>;

/// Result of merging one header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The header initialized an empty registry.
    Initialized {
        /// Number of products registered.
        products: usize,
    },
    /// Every product of the header was already registered.
    Unchanged,
    /// The header added products.
    Extended {
        /// Labels of the added products.
        added: Vec<String>,
    },
}

/// Schema registry merged from INIT headers.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    /// Registered products by label.
    products: BTreeMap<String, ProductDescriptor>,
    /// Process names in the order they were first seen.
    process_history: Vec<String>,
    /// Fingerprints of every merged header.
    fingerprints: BTreeSet<SchemaFingerprint>,
    initialized: bool,
    frozen: bool,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry ready to be shared.
    #[must_use]
    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Returns true once a header has been merged.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns true after [`freeze`](Self::freeze).
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Returns the number of registered products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.products.len()
    }

    /// Returns true if no product is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// Looks up a product by label.
    #[must_use]
    pub fn product(&self, label: &str) -> Option<&ProductDescriptor> {
        self.products.get(label)
    }

    /// Iterates over the registered products in label order.
    pub fn products(&self) -> impl Iterator<Item = &ProductDescriptor> {
        self.products.values()
    }

    /// Returns the names of the processes that wrote merged headers.
    #[must_use]
    pub fn process_history(&self) -> &[String] {
        &self.process_history
    }

    /// Returns true if a header with this schema was merged before.
    #[must_use]
    pub fn has_seen(&self, fingerprint: &SchemaFingerprint) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    /// Merges a header into the registry.
    ///
    /// `is_update` marks a header met inside an already opened file; such a
    /// header can never be the first one.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if:
    /// - `is_update` is set and the registry is still empty
    /// - a product label is registered with a different type or version
    /// - the header adds products after the registry was frozen
    ///
    /// The registry is left untouched when an error is returned.
    pub fn merge_header(&mut self, header: &InitHeader, is_update: bool) -> CoreResult<MergeOutcome> {
        if !self.initialized {
            if is_update {
                return Err(CoreError::schema(
                    "header update received before the registry was initialized",
                ));
            }
            self.check_self_consistent(header)?;
            for product in &header.products {
                self.products.insert(product.label.clone(), product.clone());
            }
            self.record_header(header);
            self.initialized = true;
            tracing::info!(
                products = self.products.len(),
                process = %header.process_name,
                "schema registry initialized"
            );
            return Ok(MergeOutcome::Initialized {
                products: self.products.len(),
            });
        }

        self.check_self_consistent(header)?;
        let mut added = Vec::new();
        for product in &header.products {
            match self.products.get(&product.label) {
                Some(existing) if existing == product => {}
                Some(existing) => {
                    return Err(CoreError::schema(format!(
                        "product '{}' registered as {} v{}, header declares {} v{}",
                        product.label,
                        existing.type_name,
                        existing.version,
                        product.type_name,
                        product.version
                    )));
                }
                None => added.push(product),
            }
        }

        if !added.is_empty() && self.frozen {
            return Err(CoreError::schema(format!(
                "registry is frozen, cannot add product '{}'",
                added[0].label
            )));
        }

        let added: Vec<String> = added
            .into_iter()
            .map(|product| {
                self.products.insert(product.label.clone(), product.clone());
                product.label.clone()
            })
            .collect();
        self.record_header(header);

        if added.is_empty() {
            Ok(MergeOutcome::Unchanged)
        } else {
            tracing::info!(added = ?added, "schema registry extended");
            Ok(MergeOutcome::Extended { added })
        }
    }

    /// Freezes the registry; no product can be added afterwards.
    ///
    /// # Errors
    ///
    /// Returns an invalid operation error if no header was merged yet.
    pub fn freeze(&mut self) -> CoreResult<()> {
        if !self.initialized {
            return Err(CoreError::invalid_operation(
                "cannot freeze an uninitialized schema registry",
            ));
        }
        if !self.frozen {
            self.frozen = true;
            tracing::debug!(products = self.products.len(), "schema registry frozen");
        }
        Ok(())
    }

    fn check_self_consistent(&self, header: &InitHeader) -> CoreResult<()> {
        let mut labels = BTreeMap::new();
        for product in &header.products {
            if let Some(previous) = labels.insert(product.label.as_str(), product) {
                if previous != product {
                    return Err(CoreError::schema(format!(
                        "header declares product '{}' twice with different layouts",
                        product.label
                    )));
                }
            }
        }
        Ok(())
    }

    fn record_header(&mut self, header: &InitHeader) {
        self.fingerprints.insert(header.fingerprint());
        if !self.process_history.contains(&header.process_name) {
            self.process_history.push(header.process_name.clone());
        }
    }
}
