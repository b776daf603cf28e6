//! Webhook route registry for HTTP proxy ingress.
//!
//! HTTP-bound proxy devices register here; the control plane's webhook
//! endpoint is the single runtime-dispatched route and consults the
//! registry to deliver request bodies.

use crate::mqtt_proxy::ProxyEvent;
use dashmap::DashMap;
use tokio::sync::mpsc;

/// Outcome of a webhook delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDelivery {
    /// Payload forwarded to the bound device.
    Accepted,
    /// No HTTP-bound proxy device with this id.
    NotFound,
    /// Body was not a JSON object; counted against the device and dropped.
    Rejected,
}

/// Device-id → event-channel registry.
#[derive(Default)]
pub struct WebhookRegistry {
    routes: DashMap<String, mpsc::UnboundedSender<ProxyEvent>>,
}

impl WebhookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The webhook path assigned to a device.
    pub fn path_for(device_id: &str) -> String {
        format!("/api/v1/webhooks/{}", device_id)
    }

    pub fn register(&self, device_id: &str, events: mpsc::UnboundedSender<ProxyEvent>) {
        self.routes.insert(device_id.to_string(), events);
    }

    pub fn unregister(&self, device_id: &str) {
        self.routes.remove(device_id);
    }

    pub fn is_registered(&self, device_id: &str) -> bool {
        self.routes.contains_key(device_id)
    }

    /// Routes one webhook body to its device.
    pub fn deliver(&self, device_id: &str, payload: serde_json::Value) -> WebhookDelivery {
        let Some(route) = self.routes.get(device_id) else {
            return WebhookDelivery::NotFound;
        };

        if payload.is_object() {
            let _ = route.send(ProxyEvent::Payload(payload));
            WebhookDelivery::Accepted
        } else {
            let _ = route.send(ProxyEvent::Dropped);
            WebhookDelivery::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_for() {
        assert_eq!(WebhookRegistry::path_for("p-0"), "/api/v1/webhooks/p-0");
    }

    #[tokio::test]
    async fn test_deliver_routes_to_registered_device() {
        let registry = WebhookRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register("p-0", tx);

        let outcome = registry.deliver("p-0", serde_json::json!({"temperature": 25.5}));
        assert_eq!(outcome, WebhookDelivery::Accepted);
        assert!(matches!(rx.recv().await, Some(ProxyEvent::Payload(_))));

        let outcome = registry.deliver("p-0", serde_json::json!([1, 2]));
        assert_eq!(outcome, WebhookDelivery::Rejected);
        assert!(matches!(rx.recv().await, Some(ProxyEvent::Dropped)));
    }

    #[test]
    fn test_deliver_unknown_device() {
        let registry = WebhookRegistry::new();
        let outcome = registry.deliver("ghost", serde_json::json!({}));
        assert_eq!(outcome, WebhookDelivery::NotFound);
    }

    #[tokio::test]
    async fn test_unregister_removes_route() {
        let registry = WebhookRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register("p-0", tx);
        assert!(registry.is_registered("p-0"));

        registry.unregister("p-0");
        assert!(!registry.is_registered("p-0"));
        assert_eq!(
            registry.deliver("p-0", serde_json::json!({})),
            WebhookDelivery::NotFound
        );
    }
}
