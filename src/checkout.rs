use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::session::{self, SessionError, SessionStore};

pub const CHECKOUT_KEY: &str = "checkout_data";
pub const ORDER_ID_KEY: &str = "checkout_order_id";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    pub country: String,
    pub state: String,
    pub county: String,
    pub city: String,
    pub address_line: String,
    pub zip_code: String,
}

/// Everything the buyer types on the checkout page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct CheckoutData {
    pub email: String,
    pub phone: String,
    pub other_contact: String,
    pub address: Address,
    pub note: Option<String>,
    pub payment_method: Option<String>,
}

impl CheckoutData {
    /// Name of the first required field that is still blank.
    pub fn missing_required_field(&self) -> Option<&'static str> {
        if self.email.trim().is_empty() {
            return Some("email");
        }
        None
    }
}

/// Persisted checkout form plus the order created from it.
#[derive(Clone)]
pub struct CheckoutSession {
    store: Arc<dyn SessionStore>,
}

impl CheckoutSession {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn get(&self) -> Result<Option<CheckoutData>, SessionError> {
        session::load_json(self.store.as_ref(), CHECKOUT_KEY)
    }

    pub fn set(&self, data: &CheckoutData) -> Result<(), SessionError> {
        session::save_json(self.store.as_ref(), CHECKOUT_KEY, data)
    }

    /// Applies one field edit and immediately writes the full snapshot back.
    pub fn update<F>(&self, edit: F) -> Result<CheckoutData, SessionError>
    where
        F: FnOnce(&mut CheckoutData),
    {
        let mut data = self.get()?.unwrap_or_default();
        edit(&mut data);
        self.set(&data)?;
        Ok(data)
    }

    /// Drops the form and the remembered order id.
    pub fn clear(&self) -> Result<(), SessionError> {
        self.store.remove(CHECKOUT_KEY)?;
        self.store.remove(ORDER_ID_KEY)
    }

    pub fn stored_order_id(&self) -> Result<Option<Uuid>, SessionError> {
        session::load_json(self.store.as_ref(), ORDER_ID_KEY)
    }

    pub fn store_order_id(&self, order_id: Uuid) -> Result<(), SessionError> {
        session::save_json(self.store.as_ref(), ORDER_ID_KEY, &order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;

    #[test]
    fn every_edit_writes_full_snapshot() {
        let store = Arc::new(MemorySessionStore::new());
        let checkout = CheckoutSession::new(store.clone());

        checkout.update(|d| d.email = "buyer@example.com".into()).unwrap();
        checkout.update(|d| d.address.city = "Nairobi".into()).unwrap();

        let raw = store.load(CHECKOUT_KEY).unwrap().unwrap();
        let persisted: CheckoutData = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.email, "buyer@example.com");
        assert_eq!(persisted.address.city, "Nairobi");
    }

    #[test]
    fn clear_drops_form_and_order_id() {
        let checkout = CheckoutSession::new(Arc::new(MemorySessionStore::new()));
        checkout.update(|d| d.email = "a@b.c".into()).unwrap();
        checkout.store_order_id(Uuid::new_v4()).unwrap();

        checkout.clear().unwrap();

        assert!(checkout.get().unwrap().is_none());
        assert!(checkout.stored_order_id().unwrap().is_none());
    }

    #[test]
    fn blank_email_is_reported_missing() {
        let data = CheckoutData {
            email: "   ".into(),
            ..Default::default()
        };
        assert_eq!(data.missing_required_field(), Some("email"));
    }
}
