use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::catalog::Product;
use crate::money::deserialize_amount;

/// One line of a shopping cart, keyed by product id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub id: String,
    pub name: String,
    #[serde(deserialize_with = "deserialize_amount")]
    pub price: BigDecimal,
    pub quantity: u32,
    #[serde(default)]
    pub image: String,
    pub seller_id: String,
}

impl CartItem {
    pub fn line_total(&self) -> BigDecimal {
        &self.price * BigDecimal::from(self.quantity)
    }
}

impl From<&Product> for CartItem {
    fn from(product: &Product) -> Self {
        Self {
            id: product.id.to_string(),
            name: product.name.to_string(),
            price: product.price(),
            quantity: 1,
            image: product.image.to_string(),
            seller_id: product.seller_id.to_string(),
        }
    }
}

/// Client-local cart state. Lines keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Adds one unit of `product`, incrementing the existing line if present.
    pub fn add_product(&mut self, product: &Product) {
        match self.items.iter_mut().find(|item| item.id == product.id) {
            Some(item) => item.quantity += 1,
            None => self.items.push(CartItem::from(product)),
        }
    }

    pub fn remove(&mut self, product_id: &str) -> Option<CartItem> {
        let index = self.items.iter().position(|item| item.id == product_id)?;
        Some(self.items.remove(index))
    }

    /// Returns false when the line is missing or `quantity` is zero.
    pub fn update_quantity(&mut self, product_id: &str, quantity: u32) -> bool {
        if quantity == 0 {
            return false;
        }
        match self.items.iter_mut().find(|item| item.id == product_id) {
            Some(item) => {
                item.quantity = quantity;
                true
            }
            None => false,
        }
    }

    pub fn total(&self) -> BigDecimal {
        self.items
            .iter()
            .fold(BigDecimal::from(0), |sum, item| sum + item.line_total())
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
