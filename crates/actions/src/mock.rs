//! In-memory stand-in for the commerce/subscription backend.
//!
//! Stateful: cancelling an order or pausing a subscription is visible to the
//! next lookup. Used by `deskpilot chat --mock-backend` and by the
//! end-to-end tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use deskpilot_core::error::ActionError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::backend::Backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Unfulfilled,
    InTransit,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub title: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub name: String,
    pub status: OrderStatus,
    pub tracking_url: Option<String>,
    pub created_at: String,
    pub items: Vec<OrderItem>,
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipping_address: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Money {
    pub amount: String,
    pub currency_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub email: String,
    pub name: String,
    pub store_credit: Money,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub customer_id: String,
    pub email: String,
    pub status: SubscriptionStatus,
    pub next_billing_date: String,
    pub product_title: String,
    pub interval: String,
}

struct Db {
    orders: BTreeMap<String, Order>,
    customers: BTreeMap<String, Customer>,
    subscriptions: BTreeMap<String, Subscription>,
}

impl Db {
    fn seeded() -> Self {
        let now = Utc::now();
        let mut orders = BTreeMap::new();
        orders.insert(
            "1001".to_string(),
            Order {
                id: "1001".into(),
                name: "#1001".into(),
                status: OrderStatus::InTransit,
                tracking_url: Some("https://fedex.com/track/123456789".into()),
                created_at: (now - Duration::days(2)).to_rfc3339(),
                items: vec![
                    OrderItem { title: "BuzzPatch Mosquito Repellent (60 Pack)".into(), quantity: 1 },
                    OrderItem { title: "ZenPatch Calming Stickers (24 Pack)".into(), quantity: 2 },
                ],
                customer_id: "cust_jane".into(),
                shipping_address: None,
            },
        );
        orders.insert(
            "999".to_string(),
            Order {
                id: "999".into(),
                name: "#999".into(),
                status: OrderStatus::Delivered,
                tracking_url: Some("https://fedex.com/track/987654321".into()),
                created_at: (now - Duration::days(30)).to_rfc3339(),
                items: vec![OrderItem {
                    title: "FocusPatch Concentration Stickers (24 Pack)".into(),
                    quantity: 1,
                }],
                customer_id: "cust_jane".into(),
                shipping_address: None,
            },
        );

        let mut customers = BTreeMap::new();
        customers.insert(
            "jane@example.com".to_string(),
            Customer {
                id: "cust_jane".into(),
                email: "jane@example.com".into(),
                name: "Jane Doe".into(),
                store_credit: Money { amount: "0.00".into(), currency_code: "USD".into() },
                tags: Vec::new(),
            },
        );

        let mut subscriptions = BTreeMap::new();
        subscriptions.insert(
            "sub_123".to_string(),
            Subscription {
                id: "sub_123".into(),
                customer_id: "cust_jane".into(),
                email: "jane@example.com".into(),
                status: SubscriptionStatus::Active,
                next_billing_date: (now + Duration::days(15)).to_rfc3339(),
                product_title: "Hair Growth Serum (3 Month Supply)".into(),
                interval: "3 Months".into(),
            },
        );

        Self { orders, customers, subscriptions }
    }

    fn order_mut(&mut self, id: &str) -> Result<&mut Order, ActionError> {
        let id = id.trim_start_matches('#');
        self.orders
            .get_mut(id)
            .ok_or_else(|| ActionError::Backend(format!("Order {id} not found")))
    }

    fn customer_mut(&mut self, key: &str) -> Option<&mut Customer> {
        self.customers
            .values_mut()
            .find(|c| c.email == key || c.id == key)
    }

    fn subscription_mut(&mut self, id: &str) -> Result<&mut Subscription, ActionError> {
        self.subscriptions
            .get_mut(id)
            .ok_or_else(|| ActionError::Backend(format!("Subscription {id} not found")))
    }
}

fn str_arg<'a>(body: &'a Value, key: &str) -> Result<&'a str, ActionError> {
    body.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ActionError::Backend(format!("Missing '{key}'")))
}

fn to_value<T: Serialize>(v: T) -> Result<Value, ActionError> {
    serde_json::to_value(v).map_err(|e| ActionError::Backend(e.to_string()))
}

/// The in-memory backend.
pub struct MockBackend {
    db: Mutex<Db>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self { db: Mutex::new(Db::seeded()) }
    }

    /// Restore the seeded data.
    pub async fn reset(&self) {
        *self.db.lock().await = Db::seeded();
    }

    pub async fn order(&self, id: &str) -> Option<Order> {
        self.db.lock().await.orders.get(id.trim_start_matches('#')).cloned()
    }

    pub async fn customer(&self, email: &str) -> Option<Customer> {
        self.db.lock().await.customers.get(email).cloned()
    }

    pub async fn subscription(&self, id: &str) -> Option<Subscription> {
        self.db.lock().await.subscriptions.get(id).cloned()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn call(&self, path: &str, body: Value) -> Result<Value, ActionError> {
        tracing::debug!(path, "Mock backend call");
        let mut db = self.db.lock().await;

        match path {
            "get_order_details" => to_value(db.order_mut(str_arg(&body, "orderId")?)?),
            "get_customer_orders" => {
                let email = str_arg(&body, "email")?;
                let limit = body.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
                let Some(customer_id) = db.customers.get(email).map(|c| c.id.clone()) else {
                    return Ok(json!({ "orders": [], "hasNextPage": false }));
                };
                let orders: Vec<&Order> = db
                    .orders
                    .values()
                    .filter(|o| o.customer_id == customer_id)
                    .take(limit)
                    .collect();
                Ok(json!({ "orders": orders, "hasNextPage": false }))
            }
            "update_order_shipping_address" => {
                let address = body.get("shippingAddress").cloned().unwrap_or(Value::Null);
                let order = db.order_mut(str_arg(&body, "orderId")?)?;
                if order.status != OrderStatus::Unfulfilled {
                    return Err(ActionError::Backend(format!(
                        "Order {} is already fulfilled; the address can no longer be changed",
                        order.id
                    )));
                }
                order.shipping_address = Some(address);
                to_value(order)
            }
            "cancel_order" => {
                let order = db.order_mut(str_arg(&body, "orderId")?)?;
                if order.status != OrderStatus::Unfulfilled {
                    return Err(ActionError::Backend(format!(
                        "Order {} cannot be cancelled: it is already fulfilled",
                        order.id
                    )));
                }
                order.status = OrderStatus::Cancelled;
                to_value(order)
            }
            "refund_order" => {
                let method = str_arg(&body, "refundMethod")?.to_string();
                let order = db.order_mut(str_arg(&body, "orderId")?)?;
                Ok(json!({ "orderId": order.id, "refundMethod": method, "status": "REFUNDED" }))
            }
            "create_return" => {
                let order = db.order_mut(str_arg(&body, "orderId")?)?;
                if order.status != OrderStatus::Delivered {
                    return Err(ActionError::Backend(format!(
                        "Order {} has not been delivered yet",
                        order.id
                    )));
                }
                Ok(json!({ "orderId": order.id, "returnId": format!("ret_{}", order.id), "status": "OPEN" }))
            }
            "create_store_credit" => {
                let key = str_arg(&body, "id")?.to_string();
                let credit = body.get("creditAmount").cloned().unwrap_or(Value::Null);
                let amount: f64 = match &credit["amount"] {
                    Value::String(s) => s.parse().unwrap_or(0.0),
                    Value::Number(n) => n.as_f64().unwrap_or(0.0),
                    _ => 0.0,
                };
                let currency = credit["currencyCode"].as_str().unwrap_or("USD").to_string();

                if db.customer_mut(&key).is_none() {
                    let name = key.split('@').next().unwrap_or(&key).to_string();
                    db.customers.insert(
                        key.clone(),
                        Customer {
                            id: format!("cust_{}", Utc::now().timestamp_millis()),
                            email: key.clone(),
                            name,
                            store_credit: Money { amount: "0.00".into(), currency_code: currency.clone() },
                            tags: Vec::new(),
                        },
                    );
                }
                let Some(customer) = db.customer_mut(&key) else {
                    return Err(ActionError::Backend(format!("Customer {key} not found")));
                };
                let balance: f64 = customer.store_credit.amount.parse().unwrap_or(0.0);
                customer.store_credit = Money {
                    amount: format!("{:.2}", balance + amount),
                    currency_code: currency,
                };
                to_value(customer)
            }
            "add_tags" => {
                let key = str_arg(&body, "id")?.to_string();
                let tags: Vec<String> = body
                    .get("tags")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(|t| t.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                let customer = db
                    .customer_mut(&key)
                    .ok_or_else(|| ActionError::Backend(format!("Customer {key} not found")))?;
                for tag in tags {
                    if !customer.tags.contains(&tag) {
                        customer.tags.push(tag);
                    }
                }
                to_value(customer)
            }
            "get-subscriptions" => {
                let email = str_arg(&body, "email")?;
                db.subscriptions
                    .values()
                    .find(|s| s.email == email)
                    .ok_or_else(|| ActionError::Backend(format!("No subscription found for {email}")))
                    .and_then(to_value)
            }
            "skip-next-order-subscription" => {
                let sub = db.subscription_mut(str_arg(&body, "subscriptionId")?)?;
                let next = chrono::DateTime::parse_from_rfc3339(&sub.next_billing_date)
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now());
                sub.next_billing_date = (next + Duration::days(30)).to_rfc3339();
                to_value(sub)
            }
            "pause-subscription" => {
                let until = str_arg(&body, "pausedUntil")?.to_string();
                let sub = db.subscription_mut(str_arg(&body, "subscriptionId")?)?;
                sub.status = SubscriptionStatus::Paused;
                sub.next_billing_date = until;
                to_value(sub)
            }
            "unpause-subscription" => {
                let sub = db.subscription_mut(str_arg(&body, "subscriptionId")?)?;
                sub.status = SubscriptionStatus::Active;
                to_value(sub)
            }
            "cancel-subscription" => {
                let sub = db.subscription_mut(str_arg(&body, "subscriptionId")?)?;
                sub.status = SubscriptionStatus::Cancelled;
                to_value(sub)
            }
            "create_discount_code" => {
                let kind = body.get("type").and_then(Value::as_str).unwrap_or("percentage");
                let value = body.get("value").and_then(Value::as_f64).unwrap_or(0.0);
                let hours = body.get("duration").and_then(Value::as_i64).unwrap_or(48);
                Ok(json!({
                    "code": format!("DESK{}", value.round() as i64),
                    "type": kind,
                    "value": value,
                    "expiresAt": (Utc::now() + Duration::hours(hours)).to_rfc3339(),
                }))
            }
            "get_product_details" => {
                let key = str_arg(&body, "queryKey")?;
                Ok(json!([{ "id": "prod_buzz", "title": "BuzzPatch Mosquito Repellent (60 Pack)", "match": key }]))
            }
            "get_product_recommendations" | "get_collection_recommendations" => Ok(json!([
                { "id": "prod_zen", "title": "ZenPatch Calming Stickers (24 Pack)" },
                { "id": "prod_focus", "title": "FocusPatch Concentration Stickers (24 Pack)" }
            ])),
            "get_related_knowledge_source" => Ok(json!({ "faqs": [], "pdfs": [], "blogArticles": [], "pages": [] })),
            other => Err(ActionError::Backend(format!("Unknown endpoint: {other}"))),
        }
    }
}
