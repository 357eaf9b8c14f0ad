//! The catalog of backend actions.
//!
//! Each entry names the action, the backend path it posts to, the argument
//! schema shown to the language model, and the arguments that must be
//! present before the backend is called at all.

use async_trait::async_trait;
use deskpilot_core::action::Action;
use deskpilot_core::error::ActionError;
use serde_json::{Map, Value, json};
use std::sync::Arc;

use crate::backend::Backend;

/// Static description of one backend action.
pub struct ActionSpec {
    pub name: &'static str,
    /// Path below `/hackathon/`
    pub path: &'static str,
    pub description: &'static str,
    pub required: &'static [&'static str],
    pub schema: fn() -> Value,
}

pub const ORDER_MANAGEMENT_ACTIONS: &[&str] = &[
    "shopify_get_order_details",
    "shopify_get_customer_orders",
    "shopify_update_order_shipping_address",
    "shopify_cancel_order",
];

pub const RESOLUTION_ACTIONS: &[&str] = &[
    "shopify_get_order_details",
    "shopify_create_store_credit",
    "shopify_refund_order",
    "shopify_create_return",
    "shopify_add_tags",
];

pub const SUBSCRIPTION_ACTIONS: &[&str] = &[
    "skio_get_subscription_status",
    "skio_skip_next_order_subscription",
    "skio_pause_subscription",
    "skio_unpause_subscription",
    "skio_cancel_subscription",
    "shopify_create_discount_code",
];

pub const SALES_ACTIONS: &[&str] = &[
    "shopify_get_product_details",
    "shopify_get_product_recommendations",
    "shopify_get_collection_recommendations",
    "shopify_get_related_knowledge_source",
    "shopify_create_discount_code",
];

pub const CATALOG: &[ActionSpec] = &[
    // --- Orders ---
    ActionSpec {
        name: "shopify_get_order_details",
        path: "get_order_details",
        description: "Get status, tracking link and items of a specific order by ID",
        required: &["orderId"],
        schema: || {
            json!({
                "type": "object",
                "properties": { "orderId": { "type": "string", "description": "Order number, e.g. 1001" } },
                "required": ["orderId"]
            })
        },
    },
    ActionSpec {
        name: "shopify_get_customer_orders",
        path: "get_customer_orders",
        description: "List recent orders for a customer email",
        required: &["email"],
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "email": { "type": "string" },
                    "after": { "type": ["string", "null"], "description": "Pagination cursor" },
                    "limit": { "type": "number" }
                },
                "required": ["email"]
            })
        },
    },
    ActionSpec {
        name: "shopify_update_order_shipping_address",
        path: "update_order_shipping_address",
        description: "Update the shipping address of an unfulfilled order",
        required: &["orderId", "shippingAddress"],
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "orderId": { "type": "string" },
                    "shippingAddress": {
                        "type": "object",
                        "properties": {
                            "firstName": { "type": "string" },
                            "lastName": { "type": "string" },
                            "company": { "type": "string" },
                            "phone": { "type": "string" },
                            "address1": { "type": "string" },
                            "address2": { "type": "string" },
                            "city": { "type": "string" },
                            "provinceCode": { "type": "string" },
                            "zip": { "type": "string" },
                            "country": { "type": "string" }
                        },
                        "required": ["address1", "city", "zip", "country"]
                    }
                },
                "required": ["orderId", "shippingAddress"]
            })
        },
    },
    ActionSpec {
        name: "shopify_cancel_order",
        path: "cancel_order",
        description: "Cancel an order that has not been fulfilled yet",
        required: &["orderId", "reason"],
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "orderId": { "type": "string" },
                    "reason": { "type": "string", "enum": ["CUSTOMER", "DECLINED", "FRAUD", "INVENTORY", "OTHER", "STAFF"] },
                    "notifyCustomer": { "type": "boolean" },
                    "restock": { "type": "boolean" },
                    "staffNote": { "type": "string" },
                    "refundMode": { "type": "string", "enum": ["ORIGINAL", "STORE_CREDIT"] }
                },
                "required": ["orderId", "reason"]
            })
        },
    },
    // --- Resolution ---
    ActionSpec {
        name: "shopify_create_store_credit",
        path: "create_store_credit",
        description: "Issue store credit to a customer",
        required: &["id", "creditAmount"],
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Customer ID or email" },
                    "creditAmount": {
                        "type": "object",
                        "properties": {
                            "amount": { "type": "string" },
                            "currencyCode": { "type": "string" }
                        },
                        "required": ["amount", "currencyCode"]
                    },
                    "expiresAt": { "type": ["string", "null"] }
                },
                "required": ["id", "creditAmount"]
            })
        },
    },
    ActionSpec {
        name: "shopify_refund_order",
        path: "refund_order",
        description: "Refund an order to the original payment method or as store credit",
        required: &["orderId", "refundMethod"],
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "orderId": { "type": "string" },
                    "refundMethod": { "type": "string", "enum": ["ORIGINAL_PAYMENT_METHODS", "STORE_CREDIT"] }
                },
                "required": ["orderId", "refundMethod"]
            })
        },
    },
    ActionSpec {
        name: "shopify_create_return",
        path: "create_return",
        description: "Open a return for a delivered order",
        required: &["orderId"],
        schema: || {
            json!({
                "type": "object",
                "properties": { "orderId": { "type": "string" } },
                "required": ["orderId"]
            })
        },
    },
    ActionSpec {
        name: "shopify_add_tags",
        path: "add_tags",
        description: "Tag a customer or order for follow-up",
        required: &["id", "tags"],
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["id", "tags"]
            })
        },
    },
    // --- Subscriptions ---
    ActionSpec {
        name: "skio_get_subscription_status",
        path: "get-subscriptions",
        description: "Look up the subscription of a customer email",
        required: &["email"],
        schema: || {
            json!({
                "type": "object",
                "properties": { "email": { "type": "string" } },
                "required": ["email"]
            })
        },
    },
    ActionSpec {
        name: "skio_skip_next_order_subscription",
        path: "skip-next-order-subscription",
        description: "Skip the next order of a subscription",
        required: &["subscriptionId"],
        schema: || {
            json!({
                "type": "object",
                "properties": { "subscriptionId": { "type": "string" } },
                "required": ["subscriptionId"]
            })
        },
    },
    ActionSpec {
        name: "skio_pause_subscription",
        path: "pause-subscription",
        description: "Pause a subscription until a date",
        required: &["subscriptionId", "pausedUntil"],
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "subscriptionId": { "type": "string" },
                    "pausedUntil": { "type": "string", "description": "YYYY-MM-DD" }
                },
                "required": ["subscriptionId", "pausedUntil"]
            })
        },
    },
    ActionSpec {
        name: "skio_unpause_subscription",
        path: "unpause-subscription",
        description: "Resume a paused subscription",
        required: &["subscriptionId"],
        schema: || {
            json!({
                "type": "object",
                "properties": { "subscriptionId": { "type": "string" } },
                "required": ["subscriptionId"]
            })
        },
    },
    ActionSpec {
        name: "skio_cancel_subscription",
        path: "cancel-subscription",
        description: "Cancel a subscription (only after retention offers were declined)",
        required: &["subscriptionId", "cancellationReasons"],
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "subscriptionId": { "type": "string" },
                    "cancellationReasons": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["subscriptionId", "cancellationReasons"]
            })
        },
    },
    // --- Sales ---
    ActionSpec {
        name: "shopify_create_discount_code",
        path: "create_discount_code",
        description: "Create a discount code",
        required: &["type", "value", "duration"],
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "type": { "type": "string", "enum": ["percentage", "fixed"] },
                    "value": { "type": "number" },
                    "duration": { "type": "number", "description": "Validity in hours" },
                    "productIds": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["type", "value", "duration"]
            })
        },
    },
    ActionSpec {
        name: "shopify_get_product_details",
        path: "get_product_details",
        description: "Get product details by id, name or key feature",
        required: &["queryType", "queryKey"],
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "queryType": { "type": "string", "enum": ["id", "name", "key feature"] },
                    "queryKey": { "type": "string" }
                },
                "required": ["queryType", "queryKey"]
            })
        },
    },
    ActionSpec {
        name: "shopify_get_product_recommendations",
        path: "get_product_recommendations",
        description: "Recommend products for a list of keywords",
        required: &["queryKeys"],
        schema: || {
            json!({
                "type": "object",
                "properties": { "queryKeys": { "type": "array", "items": { "type": "string" } } },
                "required": ["queryKeys"]
            })
        },
    },
    ActionSpec {
        name: "shopify_get_collection_recommendations",
        path: "get_collection_recommendations",
        description: "Recommend collections for a list of keywords",
        required: &["queryKeys"],
        schema: || {
            json!({
                "type": "object",
                "properties": { "queryKeys": { "type": "array", "items": { "type": "string" } } },
                "required": ["queryKeys"]
            })
        },
    },
    ActionSpec {
        name: "shopify_get_related_knowledge_source",
        path: "get_related_knowledge_source",
        description: "Find FAQs, PDFs and articles related to a question",
        required: &["question"],
        schema: || {
            json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string" },
                    "specificToProductId": { "type": ["string", "null"] }
                },
                "required": ["question"]
            })
        },
    },
];

/// Look up a catalog entry by action name.
pub fn spec(name: &str) -> Option<&'static ActionSpec> {
    CATALOG.iter().find(|s| s.name == name)
}

/// A catalog action bound to a backend.
pub struct BackendAction {
    spec: &'static ActionSpec,
    backend: Arc<dyn Backend>,
}

impl BackendAction {
    pub fn new(spec: &'static ActionSpec, backend: Arc<dyn Backend>) -> Self {
        Self { spec, backend }
    }
}

#[async_trait]
impl Action for BackendAction {
    fn name(&self) -> &str {
        self.spec.name
    }

    fn description(&self) -> &str {
        self.spec.description
    }

    fn parameters_schema(&self) -> Value {
        (self.spec.schema)()
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> Result<Value, ActionError> {
        if let Some(missing) = self
            .spec
            .required
            .iter()
            .find(|k| arguments.get(**k).is_none_or(Value::is_null))
        {
            return Err(ActionError::InvalidArguments(format!(
                "{} requires '{}'",
                self.spec.name, missing
            )));
        }
        self.backend
            .call(self.spec.path, Value::Object(arguments.clone()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl Backend for RecordingBackend {
        fn name(&self) -> &str {
            "recording"
        }
        async fn call(&self, path: &str, body: Value) -> Result<Value, ActionError> {
            self.calls.lock().await.push((path.to_string(), body));
            Ok(json!({ "ok": true }))
        }
    }

    #[test]
    fn catalog_names_are_unique_and_groups_resolve() {
        let names: HashSet<_> = CATALOG.iter().map(|s| s.name).collect();
        assert_eq!(names.len(), CATALOG.len());
        for group in [ORDER_MANAGEMENT_ACTIONS, RESOLUTION_ACTIONS, SUBSCRIPTION_ACTIONS, SALES_ACTIONS] {
            for name in group {
                assert!(spec(name).is_some(), "{name} missing from catalog");
            }
        }
    }

    #[test]
    fn schemas_list_required_arguments() {
        for s in CATALOG {
            let schema = (s.schema)();
            let required: Vec<&str> = schema["required"]
                .as_array()
                .unwrap()
                .iter()
                .filter_map(Value::as_str)
                .collect();
            assert_eq!(required, s.required, "schema/required mismatch for {}", s.name);
        }
    }

    #[tokio::test]
    async fn posts_to_catalog_path() {
        let backend = Arc::new(RecordingBackend::default());
        let action = BackendAction::new(spec("skio_pause_subscription").unwrap(), backend.clone());
        let args = json!({ "subscriptionId": "sub_123", "pausedUntil": "2026-12-01" });
        action.execute(args.as_object().unwrap()).await.unwrap();

        let calls = backend.calls.lock().await;
        assert_eq!(calls[0].0, "pause-subscription");
        assert_eq!(calls[0].1["subscriptionId"], "sub_123");
    }

    #[tokio::test]
    async fn missing_required_argument_skips_backend() {
        let backend = Arc::new(RecordingBackend::default());
        let action = BackendAction::new(spec("shopify_get_order_details").unwrap(), backend.clone());
        let err = action.execute(&Map::new()).await.unwrap_err();
        assert!(matches!(err, ActionError::InvalidArguments(ref m) if m.contains("orderId")));
        assert!(backend.calls.lock().await.is_empty());
    }
}
