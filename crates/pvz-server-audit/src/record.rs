// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle states of an order at the pickup point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	Accepted,
	Delivered,
	Returned,
	ClientRtn,
}

impl OrderStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::Accepted => "accepted",
			OrderStatus::Delivered => "delivered",
			OrderStatus::Returned => "returned",
			OrderStatus::ClientRtn => "client_rtn",
		}
	}
}

impl std::fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for OrderStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"accepted" => Ok(OrderStatus::Accepted),
			"delivered" => Ok(OrderStatus::Delivered),
			"returned" => Ok(OrderStatus::Returned),
			"client_rtn" => Ok(OrderStatus::ClientRtn),
			_ => Err(format!("unknown order status: {s}")),
		}
	}
}

/// One audited event. Built once at the call site, then shared read-only
/// between every sink that receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
	pub timestamp: DateTime<Utc>,
	/// Empty for collection-level operations.
	pub order_id: String,
	pub old_state: String,
	pub new_state: String,
	pub endpoint: String,
	pub request: String,
	pub response: String,
	pub message: String,
}

impl AuditRecord {
	pub fn builder(endpoint: impl Into<String>) -> AuditRecordBuilder {
		AuditRecordBuilder::new(endpoint)
	}

	/// Record emitted when a request reaches a handler.
	pub fn request_received(
		method: &str,
		uri: impl std::fmt::Display,
		endpoint: impl Into<String>,
	) -> Self {
		Self::builder(endpoint)
			.request(format!("{method} {uri}"))
			.message("Request received")
			.build()
	}

	/// Record emitted after an order changed state.
	pub fn status_transition(
		order_id: impl Into<String>,
		old: OrderStatus,
		new: OrderStatus,
		endpoint: impl Into<String>,
	) -> Self {
		Self::builder(endpoint)
			.order_id(order_id)
			.states(old.as_str(), new.as_str())
			.request("status transition")
			.response(format!("{old} -> {new}"))
			.message("status transition succeeded")
			.build()
	}
}

/// Builder for constructing audit records with a fluent API.
#[derive(Debug, Clone)]
pub struct AuditRecordBuilder {
	timestamp: Option<DateTime<Utc>>,
	order_id: String,
	old_state: String,
	new_state: String,
	endpoint: String,
	request: String,
	response: String,
	message: String,
}

impl AuditRecordBuilder {
	pub fn new(endpoint: impl Into<String>) -> Self {
		Self {
			timestamp: None,
			order_id: String::new(),
			old_state: String::new(),
			new_state: String::new(),
			endpoint: endpoint.into(),
			request: String::new(),
			response: String::new(),
			message: String::new(),
		}
	}

	/// Override the event time. Defaults to the time of [`Self::build`].
	pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
		self.timestamp = Some(timestamp);
		self
	}

	pub fn order_id(mut self, order_id: impl Into<String>) -> Self {
		self.order_id = order_id.into();
		self
	}

	pub fn states(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
		self.old_state = old.into();
		self.new_state = new.into();
		self
	}

	pub fn request(mut self, request: impl Into<String>) -> Self {
		self.request = request.into();
		self
	}

	pub fn response(mut self, response: impl Into<String>) -> Self {
		self.response = response.into();
		self
	}

	pub fn message(mut self, message: impl Into<String>) -> Self {
		self.message = message.into();
		self
	}

	pub fn build(self) -> AuditRecord {
		AuditRecord {
			timestamp: self.timestamp.unwrap_or_else(Utc::now),
			order_id: self.order_id,
			old_state: self.old_state,
			new_state: self.new_state,
			endpoint: self.endpoint,
			request: self.request,
			response: self.response,
			message: self.message,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_builder_defaults_to_empty_fields() {
		let record = AuditRecord::builder("/orders").build();
		assert_eq!(record.endpoint, "/orders");
		assert!(record.order_id.is_empty());
		assert!(record.old_state.is_empty());
		assert!(record.message.is_empty());
	}

	#[test]
	fn test_status_transition() {
		let record = AuditRecord::status_transition(
			"1001",
			OrderStatus::Accepted,
			OrderStatus::Delivered,
			"/orders/deliver",
		);
		assert_eq!(record.order_id, "1001");
		assert_eq!(record.old_state, "accepted");
		assert_eq!(record.new_state, "delivered");
		assert_eq!(record.request, "status transition");
		assert_eq!(record.response, "accepted -> delivered");
		assert_eq!(record.message, "status transition succeeded");
	}

	#[test]
	fn test_request_received() {
		let record = AuditRecord::request_received("POST", "/orders?id=7", "/orders");
		assert_eq!(record.request, "POST /orders?id=7");
		assert_eq!(record.message, "Request received");
		assert!(record.order_id.is_empty());
	}

	#[test]
	fn test_json_field_names() {
		let record = AuditRecord::builder("/returns")
			.order_id("9")
			.states("delivered", "client_rtn")
			.build();
		let value = serde_json::to_value(&record).unwrap();
		assert_eq!(value["order_id"], "9");
		assert_eq!(value["old_state"], "delivered");
		assert_eq!(value["new_state"], "client_rtn");
		assert!(value["timestamp"].is_string());
	}

	#[test]
	fn test_order_status_parse() {
		assert_eq!(
			"client_rtn".parse::<OrderStatus>().unwrap(),
			OrderStatus::ClientRtn
		);
		assert!("lost".parse::<OrderStatus>().is_err());
	}
}
