// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Revenue records.

use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

const PRODUCT_ID: &str = "$productId";
const QUANTITY: &str = "$quantity";
const PRICE: &str = "$price";
const REVENUE_TYPE: &str = "$revenueType";
const RECEIPT: &str = "$receipt";
const RECEIPT_SIG: &str = "$receiptSig";
const REVENUE: &str = "$revenue";

/// A purchase or other revenue-generating action.
///
/// Only `price` is required. `quantity` defaults to 1 and `revenue`
/// defaults to `price * quantity`.
#[derive(Debug, Clone, PartialEq)]
pub struct Revenue {
	product_id: Option<String>,
	price: Option<f64>,
	quantity: u32,
	revenue_type: Option<String>,
	receipt: Option<String>,
	receipt_sig: Option<String>,
	revenue: Option<f64>,
	properties: Map<String, Value>,
}

impl Default for Revenue {
	fn default() -> Self {
		Self {
			product_id: None,
			price: None,
			quantity: 1,
			revenue_type: None,
			receipt: None,
			receipt_sig: None,
			revenue: None,
			properties: Map::new(),
		}
	}
}

impl Revenue {
	/// Creates an empty revenue record.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the purchased product id.
	pub fn product_id(mut self, product_id: impl Into<String>) -> Self {
		self.product_id = Some(product_id.into());
		self
	}

	/// Sets the unit price. Required.
	pub fn price(mut self, price: f64) -> Self {
		self.price = Some(price);
		self
	}

	/// Sets the quantity. Defaults to 1.
	pub fn quantity(mut self, quantity: u32) -> Self {
		self.quantity = quantity;
		self
	}

	/// Sets the revenue type, e.g. `purchase` or `refund`.
	pub fn revenue_type(mut self, revenue_type: impl Into<String>) -> Self {
		self.revenue_type = Some(revenue_type.into());
		self
	}

	/// Attaches a store receipt and its signature.
	pub fn receipt(mut self, receipt: impl Into<String>, signature: impl Into<String>) -> Self {
		self.receipt = Some(receipt.into());
		self.receipt_sig = Some(signature.into());
		self
	}

	/// Overrides the computed `price * quantity` total.
	pub fn revenue(mut self, revenue: f64) -> Self {
		self.revenue = Some(revenue);
		self
	}

	/// Adds an extra event property.
	pub fn event_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.properties.insert(key.into(), value.into());
		self
	}

	/// Checks that the record can be sent.
	pub fn validate(&self) -> Result<()> {
		match self.price {
			Some(price) if price.is_finite() => Ok(()),
			_ => Err(CoreError::MissingRevenuePrice),
		}
	}

	/// Total revenue represented by this record.
	pub fn total(&self) -> Option<f64> {
		self.revenue
			.or_else(|| self.price.map(|price| price * f64::from(self.quantity)))
	}

	/// Event properties describing this record, merged over custom properties.
	pub fn event_properties(&self) -> Map<String, Value> {
		let mut props = self.properties.clone();
		if let Some(ref product_id) = self.product_id {
			props.insert(PRODUCT_ID.to_string(), Value::from(product_id.as_str()));
		}
		props.insert(QUANTITY.to_string(), Value::from(self.quantity));
		if let Some(price) = self.price {
			props.insert(PRICE.to_string(), Value::from(price));
		}
		if let Some(ref revenue_type) = self.revenue_type {
			props.insert(REVENUE_TYPE.to_string(), Value::from(revenue_type.as_str()));
		}
		if let Some(ref receipt) = self.receipt {
			props.insert(RECEIPT.to_string(), Value::from(receipt.as_str()));
		}
		if let Some(ref receipt_sig) = self.receipt_sig {
			props.insert(RECEIPT_SIG.to_string(), Value::from(receipt_sig.as_str()));
		}
		if let Some(total) = self.total() {
			props.insert(REVENUE.to_string(), Value::from(total));
		}
		props
	}
}
