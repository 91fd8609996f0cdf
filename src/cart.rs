use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::session::{self, SessionError, SessionStore};

pub const CART_KEY: &str = "cart_items";
pub const MAX_CART_ITEMS: usize = 100;

/// A selected product line. `unit_price` is in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CartItem {
    pub id: String,
    pub name: String,
    pub unit_price: i64,
    pub quantity: u32,
}

impl CartItem {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        unit_price: i64,
        quantity: u32,
    ) -> Result<Self, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        if unit_price < 0 {
            return Err(CartError::InvalidPrice(unit_price));
        }
        Ok(Self {
            id: id.into(),
            name: name.into(),
            unit_price,
            quantity,
        })
    }

    /// `None` when the line does not fit in an `i64`.
    pub fn line_total(&self) -> Option<i64> {
        self.unit_price.checked_mul(i64::from(self.quantity))
    }
}

#[derive(Debug, Error)]
pub enum CartError {
    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    #[error("Unit price must be non-negative, got {0}")]
    InvalidPrice(i64),

    #[error("Cart is full (max {MAX_CART_ITEMS} items)")]
    CartFull,

    #[error("Cart quantities or totals are out of range")]
    Overflow,

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Σ(unit price × quantity); zero for an empty cart, `None` on overflow.
pub fn cart_total(items: &[CartItem]) -> Option<i64> {
    items
        .iter()
        .try_fold(0i64, |total, item| total.checked_add(item.line_total()?))
}

/// The buyer's cart, persisted as one snapshot on every change.
#[derive(Clone)]
pub struct CartStore {
    store: Arc<dyn SessionStore>,
}

impl CartStore {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn get(&self) -> Result<Vec<CartItem>, CartError> {
        Ok(session::load_json(self.store.as_ref(), CART_KEY)?.unwrap_or_default())
    }

    pub fn set(&self, mut items: Vec<CartItem>) -> Result<(), CartError> {
        if items.len() > MAX_CART_ITEMS {
            tracing::warn!(
                lines = items.len(),
                "Cart limited to {} items",
                MAX_CART_ITEMS
            );
            items.truncate(MAX_CART_ITEMS);
        }
        session::save_json(self.store.as_ref(), CART_KEY, &items)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), CartError> {
        self.store.remove(CART_KEY)?;
        Ok(())
    }

    /// Adds a line, or increases the quantity of an existing line with the same id.
    pub fn add(&self, item: CartItem) -> Result<Vec<CartItem>, CartError> {
        if item.quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        let mut cart = self.get()?;
        let full = cart.len() >= MAX_CART_ITEMS;
        match cart.iter_mut().find(|line| line.id == item.id) {
            Some(existing) => {
                existing.quantity = existing
                    .quantity
                    .checked_add(item.quantity)
                    .ok_or(CartError::Overflow)?;
            }
            None if full => return Err(CartError::CartFull),
            None => cart.push(item),
        }
        self.set(cart.clone())?;
        Ok(cart)
    }

    /// Sets a line's quantity, never below 1. Unknown ids leave the cart unchanged.
    pub fn update_quantity(&self, id: &str, quantity: u32) -> Result<Vec<CartItem>, CartError> {
        let mut cart = self.get()?;
        if let Some(line) = cart.iter_mut().find(|line| line.id == id) {
            line.quantity = quantity.max(1);
            self.set(cart.clone())?;
        }
        Ok(cart)
    }

    pub fn remove(&self, id: &str) -> Result<Vec<CartItem>, CartError> {
        let cart: Vec<CartItem> = self
            .get()?
            .into_iter()
            .filter(|line| line.id != id)
            .collect();
        self.set(cart.clone())?;
        Ok(cart)
    }

    pub fn total(&self) -> Result<i64, CartError> {
        cart_total(&self.get()?).ok_or(CartError::Overflow)
    }

    pub fn item_count(&self) -> Result<u32, CartError> {
        self.get()?
            .iter()
            .try_fold(0u32, |count, line| count.checked_add(line.quantity))
            .ok_or(CartError::Overflow)
    }
}
