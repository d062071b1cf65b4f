use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ProductId, SellerId};

/// A seller's product as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Assigned by the store on creation, immutable afterwards.
    pub id: ProductId,
    pub seller_id: SellerId,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub quantity: u32,
    pub category: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by the seller when creating a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: f64,
    pub quantity: u32,
    pub category: String,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Reasons a product input is rejected before it reaches storage.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidProduct {
    #[error("name must not be empty")]
    EmptyName,

    #[error("category must not be empty")]
    EmptyCategory,

    #[error("price must be a non-negative number, got {0}")]
    InvalidPrice(f64),

    #[error("patch does not change any field")]
    EmptyPatch,
}

fn check_price(price: f64) -> Result<(), InvalidProduct> {
    if price.is_finite() && price >= 0.0 {
        Ok(())
    } else {
        Err(InvalidProduct::InvalidPrice(price))
    }
}

impl NewProduct {
    /// Checks the field constraints of a new product.
    pub fn validate(&self) -> Result<(), InvalidProduct> {
        if self.name.trim().is_empty() {
            return Err(InvalidProduct::EmptyName);
        }
        if self.category.trim().is_empty() {
            return Err(InvalidProduct::EmptyCategory);
        }
        check_price(self.price)
    }
}

impl ProductPatch {
    /// Patch that only sets the stock quantity.
    pub fn quantity(quantity: u32) -> Self {
        Self {
            quantity: Some(quantity),
            ..Self::default()
        }
    }

    /// Returns true when no field would be written.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.price.is_none()
            && self.quantity.is_none()
            && self.category.is_none()
    }

    /// Checks the constraints of every field present in the patch.
    pub fn validate(&self) -> Result<(), InvalidProduct> {
        if self.is_empty() {
            return Err(InvalidProduct::EmptyPatch);
        }
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(InvalidProduct::EmptyName);
        }
        if self.category.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(InvalidProduct::EmptyCategory);
        }
        match self.price {
            Some(price) => check_price(price),
            None => Ok(()),
        }
    }

    /// Applies the patch onto a product in place.
    pub fn apply_to(&self, product: &mut Product) {
        if let Some(name) = &self.name {
            product.name = name.clone();
        }
        if let Some(description) = &self.description {
            product.description = Some(description.clone());
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(quantity) = self.quantity {
            product.quantity = quantity;
        }
        if let Some(category) = &self.category {
            product.category = category.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_product() -> NewProduct {
        NewProduct {
            name: "Widget".to_string(),
            description: None,
            price: 12.5,
            quantity: 3,
            category: "tools".to_string(),
        }
    }

    #[test]
    fn new_product_validation() {
        assert!(new_product().validate().is_ok());

        let blank_name = NewProduct {
            name: "  ".to_string(),
            ..new_product()
        };
        assert_eq!(blank_name.validate(), Err(InvalidProduct::EmptyName));

        let blank_category = NewProduct {
            category: String::new(),
            ..new_product()
        };
        assert_eq!(blank_category.validate(), Err(InvalidProduct::EmptyCategory));

        let negative = NewProduct {
            price: -1.0,
            ..new_product()
        };
        assert!(matches!(
            negative.validate(),
            Err(InvalidProduct::InvalidPrice(_))
        ));

        let nan = NewProduct {
            price: f64::NAN,
            ..new_product()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn free_product_is_valid() {
        let free = NewProduct {
            price: 0.0,
            ..new_product()
        };
        assert!(free.validate().is_ok());
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert_eq!(
            ProductPatch::default().validate(),
            Err(InvalidProduct::EmptyPatch)
        );
        assert!(ProductPatch::quantity(0).validate().is_ok());
    }

    #[test]
    fn patch_applies_only_present_fields() {
        let now = Utc::now();
        let mut product = Product {
            id: ProductId::new(1),
            seller_id: SellerId::new("s1"),
            name: "Widget".to_string(),
            description: None,
            price: 10.0,
            quantity: 8,
            category: "tools".to_string(),
            created_at: now,
            updated_at: now,
        };

        let patch = ProductPatch {
            price: Some(11.0),
            quantity: Some(2),
            ..ProductPatch::default()
        };
        patch.apply_to(&mut product);

        assert_eq!(product.name, "Widget");
        assert_eq!(product.price, 11.0);
        assert_eq!(product.quantity, 2);
        assert_eq!(product.category, "tools");
    }

    #[test]
    fn patch_deserializes_with_missing_fields() {
        let patch: ProductPatch = serde_json::from_str(r#"{"quantity": 4}"#).unwrap();
        assert_eq!(patch, ProductPatch::quantity(4));
    }
}
